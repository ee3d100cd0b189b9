//! Judge oracle backed by an external command.
//!
//! The flattened prompt is written to the command's stdin and its stdout is
//! taken as the response text.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

use super::litellm::{
    Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage,
    DEFAULT_REQUEST_TIMEOUT,
};
use crate::error::LlmError;

pub struct CommandProvider {
    command: String,
    model: String,
    timeout: Duration,
}

impl CommandProvider {
    /// `model` is the identifier recorded on scores produced through this
    /// provider.
    pub fn new(command: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            model: model.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    async fn run(&self, prompt: &str) -> Result<String, LlmError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LlmError::CommandFailed(format!("Failed to spawn '{}': {}", self.command, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.shutdown().await.ok();
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(LlmError::CommandFailed(format!(
                "'{}' exited with {}: {}",
                self.command,
                output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl LlmProvider for CommandProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let prompt = request.flattened_prompt();
        debug!(command = %self.command, prompt_chars = prompt.len(), "Invoking oracle command");

        let text = tokio::time::timeout(self.timeout, self.run(&prompt))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout))??;

        let model = if request.model.is_empty() {
            self.model.clone()
        } else {
            request.model
        };

        Ok(GenerationResponse {
            id: Uuid::new_v4().to_string(),
            model,
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(text),
                finish_reason: "stop".to_string(),
            }],
            usage: Usage::default(),
        })
    }
}
