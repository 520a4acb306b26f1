// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The contract between the agent and keyword implementations.
//!
//! A deployment fills a [`KeywordRegistry`] at startup. The dispatcher looks
//! keywords up by name and runs them against a token's session.

pub mod builtin;
pub mod output;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::session::SessionState;
use output::{ErrorPayload, Output};

/// Properties handed to every keyword call.
pub type Properties = serde_json::Map<String, Value>;

/// `Ok` carries the optional success payload.
pub type KeywordResult = Result<Option<Value>, KeywordError>;

/// Ways a keyword call can fail.
#[derive(Debug, thiserror::Error)]
pub enum KeywordError {
    /// Failure reported by the keyword itself.
    #[error("{0}")]
    Failed(String),

    /// Failure with an underlying cause, reported as a structured error.
    #[error("{message}")]
    Caused { message: String, cause: String },

    /// The keyword panicked.
    #[error("{0}")]
    Fault(String),

    #[error("Timeout while processing request. Request execution interrupted.")]
    TimedOut(Duration),

    #[error("Keyword execution interrupted")]
    Interrupted,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KeywordError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn caused(message: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::Caused { message: message.into(), cause: cause.to_string() }
    }

    /// Wire form of this error.
    pub fn to_payload(&self) -> ErrorPayload {
        match self {
            Self::Caused { message, cause } => {
                ErrorPayload::Structured { message: message.clone(), cause: cause.clone() }
            }
            Self::Other(e) => {
                let causes: Vec<String> = e.chain().skip(1).map(|c| c.to_string()).collect();
                if causes.is_empty() {
                    ErrorPayload::Message(e.to_string())
                } else {
                    ErrorPayload::Structured { message: e.to_string(), cause: causes.join(": ") }
                }
            }
            other => ErrorPayload::Message(other.to_string()),
        }
    }
}

/// A named operation the agent can run against a token's session.
#[async_trait]
pub trait Keyword: Send + Sync {
    /// Run the keyword. Attachments and measurements go through `output`;
    /// state that must survive to the next call goes into `session`.
    async fn execute(
        &self,
        input: &Value,
        output: &mut Output,
        session: &mut SessionState,
        properties: &Properties,
    ) -> KeywordResult;
}

/// Diagnostic hook run when a keyword of the registry fails.
#[async_trait]
pub trait ErrorHook: Send + Sync {
    /// Capture diagnostics for `error` (e.g. attach a screenshot).
    ///
    /// Return `true` to report the failure to the caller, `false` to mark the
    /// call successful despite it.
    async fn on_error(
        &self,
        error: &KeywordError,
        input: &Value,
        output: &mut Output,
        session: &mut SessionState,
        properties: &Properties,
    ) -> anyhow::Result<bool>;
}

/// Name to keyword mapping, populated once at startup.
pub struct KeywordRegistry {
    source: String,
    keywords: HashMap<String, Arc<dyn Keyword>>,
    error_hook: Option<Arc<dyn ErrorHook>>,
}

impl KeywordRegistry {
    /// `source` names where the keywords come from and shows up in
    /// resolution errors.
    pub fn new(source: impl Into<String>) -> Self {
        Self { source: source.into(), keywords: HashMap::new(), error_hook: None }
    }

    /// Register a keyword, replacing any keyword with the same name.
    pub fn register(&mut self, name: impl Into<String>, keyword: impl Keyword + 'static) -> &mut Self {
        let name = name.into();
        tracing::debug!(keyword = %name, source = %self.source, "registering keyword");
        if self.keywords.insert(name.clone(), Arc::new(keyword)).is_some() {
            tracing::warn!(keyword = %name, "keyword registered twice; keeping the last one");
        }
        self
    }

    pub fn set_error_hook(&mut self, hook: impl ErrorHook + 'static) -> &mut Self {
        self.error_hook = Some(Arc::new(hook));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Keyword>> {
        self.keywords.get(name).cloned()
    }

    pub fn error_hook(&self) -> Option<Arc<dyn ErrorHook>> {
        self.error_hook.clone()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.keywords.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }
}

impl fmt::Debug for KeywordRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeywordRegistry")
            .field("source", &self.source)
            .field("keywords", &self.names())
            .field("error_hook", &self.error_hook.is_some())
            .finish()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
