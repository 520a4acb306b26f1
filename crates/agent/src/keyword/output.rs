// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keyword output handle and the structured result of a call.

use std::fmt::Write as _;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::keyword::KeywordError;
use crate::state::epoch_ms;

/// A named binary artifact produced during a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub hex_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, hex_content: impl Into<String>) -> Self {
        Self { name: name.into(), hex_content: hex_content.into(), description: None }
    }

    /// Hex-encode `bytes` as the attachment content.
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Self {
        let mut hex = String::with_capacity(bytes.len() * 2);
        for byte in bytes {
            let _ = write!(hex, "{byte:02X}");
        }
        Self::new(name, hex)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A timing recorded by a keyword.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measure {
    pub name: String,
    /// Start time, epoch millis.
    pub begin: u64,
    /// Duration in millis.
    pub duration: u64,
}

/// Error as returned to the caller: a plain message, or a message with cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorPayload {
    Message(String),
    Structured { message: String, cause: String },
}

impl ErrorPayload {
    pub fn message(&self) -> &str {
        match self {
            Self::Message(message) | Self::Structured { message, .. } => message,
        }
    }
}

/// Result of one keyword call. Carries a payload or an error, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub measures: Vec<Measure>,
}

impl DispatchResult {
    pub fn success(payload: Option<Value>, output: Output) -> Self {
        let (attachments, measures) = output.into_parts();
        Self { payload, error: None, attachments, measures }
    }

    pub fn failure(error: &KeywordError, output: Output) -> Self {
        let (attachments, measures) = output.into_parts();
        Self { payload: None, error: Some(error.to_payload()), attachments, measures }
    }

    /// Failure raised before any keyword ran.
    pub fn error_message(message: impl Into<String>) -> Self {
        Self {
            payload: None,
            error: Some(ErrorPayload::Message(message.into())),
            attachments: Vec::new(),
            measures: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Writable handle passed into a keyword call.
///
/// Attachments and measures are kept in call order and drained into the
/// [`DispatchResult`] once the call settles.
#[derive(Debug)]
pub struct Output {
    attachments: Vec<Attachment>,
    measures: Vec<Measure>,
    open_measure: Option<(String, u64, Instant)>,
    cancel: CancellationToken,
}

impl Output {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { attachments: Vec::new(), measures: Vec::new(), open_measure: None, cancel }
    }

    pub fn attach(&mut self, attachment: Attachment) {
        self.attachments.push(attachment);
    }

    pub fn attach_bytes(&mut self, name: impl Into<String>, bytes: &[u8]) {
        self.attach(Attachment::from_bytes(name, bytes));
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Record a measurement that ended now.
    pub fn add_measure(&mut self, name: impl Into<String>, duration: Duration) {
        let duration_ms = duration.as_millis() as u64;
        self.measures.push(Measure {
            name: name.into(),
            begin: epoch_ms().saturating_sub(duration_ms),
            duration: duration_ms,
        });
    }

    /// Start a measurement. An unfinished previous one is closed first.
    pub fn start_measure(&mut self, name: impl Into<String>) {
        self.stop_measure();
        self.open_measure = Some((name.into(), epoch_ms(), Instant::now()));
    }

    /// Close the measurement opened by [`Output::start_measure`].
    pub fn stop_measure(&mut self) -> Option<Duration> {
        let (name, begin, started) = self.open_measure.take()?;
        let elapsed = started.elapsed();
        self.measures.push(Measure { name, begin, duration: elapsed.as_millis() as u64 });
        Some(elapsed)
    }

    pub fn measures(&self) -> &[Measure] {
        &self.measures
    }

    /// Resolves when the call is interrupted or times out.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token for handing cancellation to tasks the keyword spawns.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn into_parts(mut self) -> (Vec<Attachment>, Vec<Measure>) {
        self.stop_measure();
        (self.attachments, self.measures)
    }
}

#[cfg(test)]
#[path = "output_tests.rs"]
mod tests;
