//! Judge oracle integration.
//!
//! The judge talks to its oracle through the [`LlmProvider`] trait. Two
//! implementations are provided:
//!
//! - [`LiteLlmClient`]: OpenAI-compatible HTTP API (LiteLLM, OpenRouter, ...)
//! - [`CommandProvider`]: an external CLI that reads the prompt on stdin
//!
//! ```ignore
//! use eval_forge::llm::{LiteLlmClient, LlmProvider, Message, GenerationRequest};
//!
//! let client = LiteLlmClient::from_env()?;
//! let request = GenerationRequest::new("", vec![Message::user("Score this")]);
//! let response = client.generate(request).await?;
//! ```

pub mod command;
pub mod litellm;

pub use command::CommandProvider;
pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
    DEFAULT_JUDGE_MODEL, DEFAULT_REQUEST_TIMEOUT,
};
