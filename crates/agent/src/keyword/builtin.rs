// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keywords shipped with the agent binary, for smoke-testing a deployment.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::output::Output;
use super::{Keyword, KeywordError, KeywordRegistry, KeywordResult, Properties};
use crate::session::SessionState;

/// Registry holding every built-in keyword.
pub fn registry() -> KeywordRegistry {
    let mut registry = KeywordRegistry::new("builtin");
    registry
        .register("Echo", Echo)
        .register("Sleep", Sleep)
        .register("SessionPut", SessionPut)
        .register("SessionGet", SessionGet);
    registry
}

/// Returns its argument with the effective properties under `properties`.
pub struct Echo;

#[async_trait]
impl Keyword for Echo {
    async fn execute(
        &self,
        input: &Value,
        _output: &mut Output,
        _session: &mut SessionState,
        properties: &Properties,
    ) -> KeywordResult {
        let mut payload = match input {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            _ => return Err(KeywordError::failed("Echo expects an object argument")),
        };
        payload.insert("properties".to_owned(), Value::Object(properties.clone()));
        Ok(Some(Value::Object(payload)))
    }
}

/// Waits `{ms}` milliseconds, or until the call is interrupted.
pub struct Sleep;

#[async_trait]
impl Keyword for Sleep {
    async fn execute(
        &self,
        input: &Value,
        output: &mut Output,
        _session: &mut SessionState,
        _properties: &Properties,
    ) -> KeywordResult {
        let ms = input
            .get("ms")
            .and_then(Value::as_u64)
            .ok_or_else(|| KeywordError::failed("Sleep expects a numeric 'ms' argument"))?;
        tokio::select! {
            _ = output.cancelled() => Err(KeywordError::Interrupted),
            _ = tokio::time::sleep(Duration::from_millis(ms)) => {
                Ok(Some(serde_json::json!({ "slept": ms })))
            }
        }
    }
}

/// Stores `{value}` in the token session under `{key}`.
pub struct SessionPut;

#[async_trait]
impl Keyword for SessionPut {
    async fn execute(
        &self,
        input: &Value,
        _output: &mut Output,
        session: &mut SessionState,
        _properties: &Properties,
    ) -> KeywordResult {
        let key = session_key(input)?;
        let value = input.get("value").cloned().unwrap_or(Value::Null);
        session.insert(key, value);
        Ok(None)
    }
}

/// Reads back what [`SessionPut`] stored under `{key}`.
pub struct SessionGet;

#[async_trait]
impl Keyword for SessionGet {
    async fn execute(
        &self,
        input: &Value,
        _output: &mut Output,
        session: &mut SessionState,
        _properties: &Properties,
    ) -> KeywordResult {
        let key = session_key(input)?;
        let value = session.get::<Value>(key).cloned().unwrap_or(Value::Null);
        Ok(Some(serde_json::json!({ "value": value })))
    }
}

fn session_key(input: &Value) -> Result<&str, KeywordError> {
    input
        .get("key")
        .and_then(Value::as_str)
        .ok_or_else(|| KeywordError::failed("expected a string 'key' argument"))
}

#[cfg(test)]
#[path = "builtin_tests.rs"]
mod tests;
