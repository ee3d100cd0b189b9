//! Warning collection shared across pipeline stages.
//!
//! Components receive a [`Diagnostics`] handle and report non-fatal
//! conditions through it instead of writing to a global output stream.
//! Every entry is mirrored to `tracing` and kept as data so callers can
//! inspect, print or persist it.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// A single non-fatal condition reported by a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Component that raised the warning (e.g. "validation", "judge").
    pub component: String,
    /// Human-readable message.
    pub message: String,
}

/// Cloneable handle to a shared warning list.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Arc<Mutex<Vec<Diagnostic>>>,
}

impl Diagnostics {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a warning from `component`.
    pub fn warn(&self, component: &str, message: impl Into<String>) {
        let message = message.into();
        warn!(component = component, "{}", message);
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(Diagnostic {
                component: component.to_string(),
                message,
            });
        }
    }

    /// Returns a copy of every warning recorded so far.
    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Returns the messages recorded by a single component.
    pub fn messages_for(&self, component: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|d| d.component == component)
            .map(|d| d.message)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }
}
