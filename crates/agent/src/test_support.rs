// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted keywords and fixtures shared by unit and integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;
use crate::keyword::output::{Attachment, Output};
use crate::keyword::{ErrorHook, Keyword, KeywordError, KeywordRegistry, KeywordResult, Properties};
use crate::session::{Resource, SessionState};
use crate::state::AgentContext;
use crate::token::{TokenConf, TokenGroupConf};

/// Context with one group of `capacity` plain tokens.
pub async fn test_context(capacity: usize) -> anyhow::Result<Arc<AgentContext>> {
    let context = AgentContext::new(
        "agent-test",
        "http://127.0.0.1:0",
        Properties::new(),
        CancellationToken::new(),
    );
    let group = TokenGroupConf { capacity, token_conf: TokenConf::default() };
    context.tokens.create_tokens(&context.agent_id, &[group]).await?;
    Ok(Arc::new(context))
}

pub fn test_dispatcher(
    context: Arc<AgentContext>,
    registry: KeywordRegistry,
    timeout: Option<Duration>,
) -> Dispatcher {
    Dispatcher::new(context, Arc::new(registry), timeout)
}

/// Attaches one attachment per `{names: [...]}` entry, then returns `{result: "OK"}`.
pub struct AttachThenSend;

#[async_trait]
impl Keyword for AttachThenSend {
    async fn execute(
        &self,
        input: &Value,
        output: &mut Output,
        _session: &mut SessionState,
        _properties: &Properties,
    ) -> KeywordResult {
        let names = input.get("names").and_then(Value::as_array).cloned().unwrap_or_default();
        for name in names.iter().filter_map(Value::as_str) {
            output.attach(Attachment::new(name, "AB12"));
        }
        Ok(Some(serde_json::json!({ "result": "OK" })))
    }
}

/// Attaches `partial.log`, then fails with `{message}`.
pub struct AttachThenFail;

#[async_trait]
impl Keyword for AttachThenFail {
    async fn execute(
        &self,
        input: &Value,
        output: &mut Output,
        _session: &mut SessionState,
        _properties: &Properties,
    ) -> KeywordResult {
        output.attach(Attachment::new("partial.log", "00"));
        let message = input.get("message").and_then(Value::as_str).unwrap_or("failed");
        Err(KeywordError::failed(message))
    }
}

/// Panics without settling.
pub struct Panics;

#[async_trait]
impl Keyword for Panics {
    #[allow(clippy::panic)]
    async fn execute(
        &self,
        _input: &Value,
        _output: &mut Output,
        _session: &mut SessionState,
        _properties: &Properties,
    ) -> KeywordResult {
        tokio::task::yield_now().await;
        panic!("element handle detached");
    }
}

/// Never settles unless dropped.
pub struct Hangs;

#[async_trait]
impl Keyword for Hangs {
    async fn execute(
        &self,
        _input: &Value,
        _output: &mut Output,
        _session: &mut SessionState,
        _properties: &Properties,
    ) -> KeywordResult {
        std::future::pending::<()>().await;
        Ok(None)
    }
}

/// Increments a counter kept in the session and returns the new value.
pub struct Count;

#[async_trait]
impl Keyword for Count {
    async fn execute(
        &self,
        _input: &Value,
        _output: &mut Output,
        session: &mut SessionState,
        _properties: &Properties,
    ) -> KeywordResult {
        let next = session.get::<u64>("count").copied().unwrap_or(0) + 1;
        session.insert("count", next);
        Ok(Some(serde_json::json!({ "count": next })))
    }
}

/// Returns the properties it was called with.
pub struct ShowProperties;

#[async_trait]
impl Keyword for ShowProperties {
    async fn execute(
        &self,
        _input: &Value,
        _output: &mut Output,
        _session: &mut SessionState,
        properties: &Properties,
    ) -> KeywordResult {
        Ok(Some(Value::Object(properties.clone())))
    }
}

/// Session resource that counts how often it was closed.
pub struct CountingResource(pub Arc<AtomicUsize>);

#[async_trait]
impl Resource for CountingResource {
    async fn close(&mut self) -> anyhow::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Opens a [`CountingResource`] in the session under `driver`.
pub struct OpenResource(pub Arc<AtomicUsize>);

#[async_trait]
impl Keyword for OpenResource {
    async fn execute(
        &self,
        _input: &Value,
        _output: &mut Output,
        session: &mut SessionState,
        _properties: &Properties,
    ) -> KeywordResult {
        session.insert_resource("driver", CountingResource(Arc::clone(&self.0)));
        Ok(None)
    }
}

/// What a [`ScriptedHook`] does once it has attached its screenshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookBehavior {
    Report,
    Swallow,
    Error,
    Panic,
}

/// Error hook that attaches `screenshot.png` and then follows its script.
pub struct ScriptedHook {
    pub behavior: HookBehavior,
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedHook {
    pub fn new(behavior: HookBehavior) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (Self { behavior, calls: Arc::clone(&calls) }, calls)
    }
}

#[async_trait]
impl ErrorHook for ScriptedHook {
    #[allow(clippy::panic)]
    async fn on_error(
        &self,
        _error: &KeywordError,
        _input: &Value,
        output: &mut Output,
        _session: &mut SessionState,
        _properties: &Properties,
    ) -> anyhow::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        output.attach(Attachment::new("screenshot.png", "FFD8"));
        match self.behavior {
            HookBehavior::Report => Ok(true),
            HookBehavior::Swallow => Ok(false),
            HookBehavior::Error => anyhow::bail!("screenshot failed"),
            HookBehavior::Panic => panic!("hook exploded"),
        }
    }
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
