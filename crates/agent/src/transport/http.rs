// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the agent API.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatch::DispatchRequest;
use crate::error::AgentError;
use crate::keyword::Properties;
use crate::state::AppState;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub agent_id: String,
    pub agent_url: String,
    pub token_count: usize,
    pub reserved_count: usize,
    pub in_flight: usize,
}

/// Body of `POST /token/{id}/process`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    /// Keyword name.
    pub function: String,
    #[serde(default, alias = "payload")]
    pub argument: Value,
    #[serde(default)]
    pub properties: Option<Properties>,
    /// Per-call timeout in milliseconds; 0 runs the call without a limit.
    #[serde(default)]
    pub call_timeout: Option<u64>,
}

impl From<ProcessRequest> for DispatchRequest {
    fn from(req: ProcessRequest) -> Self {
        Self {
            keyword: req.function,
            argument: req.argument,
            properties: req.properties.unwrap_or_default(),
            timeout: req.call_timeout.map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveResponse {
    pub token_id: String,
    pub reserved: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseResponse {
    pub token_id: String,
    /// False when the token was not reserved.
    pub released: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterruptResponse {
    pub token_id: String,
    /// False when nothing was running on the token.
    pub interrupted: bool,
}

fn error_response(code: AgentError, token_id: &str) -> Response {
    code.to_http_response(code.describe(token_id)).into_response()
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let context = &s.context;
    Json(HealthResponse {
        status: "running".to_owned(),
        agent_id: context.agent_id.clone(),
        agent_url: context.agent_url.clone(),
        token_count: context.tokens.len().await,
        reserved_count: context.tokens.reserved_count().await,
        in_flight: s.dispatcher.in_flight_count().await,
    })
}

/// `GET /tokens`, `GET /token/list`
pub async fn list_tokens(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    Json(s.context.tokens.statuses().await)
}

/// `GET /token/{id}/reserve`
pub async fn reserve_token(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match s.context.tokens.reserve(&id).await {
        Ok(()) => Json(ReserveResponse { token_id: id, reserved: true }).into_response(),
        Err(code) => error_response(code, &id),
    }
}

/// `GET /token/{id}/release`
pub async fn release_token(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match s.context.tokens.release(&id).await {
        Ok(released) => Json(ReleaseResponse { token_id: id, released }).into_response(),
        Err(code) => error_response(code, &id),
    }
}

/// `POST /token/{id}/process`
///
/// Keyword failures come back as 200 with an `error` in the result.
pub async fn process(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<ProcessRequest>, JsonRejection>,
) -> impl IntoResponse {
    let req = match body {
        Ok(Json(req)) => req,
        Err(e) => {
            tracing::debug!(token_id = %id, err = %e, "malformed process request");
            return AgentError::BadRequest.to_http_response(e.body_text()).into_response();
        }
    };
    match s.dispatcher.process(&id, req.into()).await {
        Ok(result) => Json(result).into_response(),
        Err(code) => error_response(code, &id),
    }
}

/// `GET|POST /token/{id}/interrupt-execution`
pub async fn interrupt_execution(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match s.dispatcher.interrupt(&id).await {
        Ok(interrupted) => Json(InterruptResponse { token_id: id, interrupted }).into_response(),
        Err(code) => error_response(code, &id),
    }
}
