// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport for the agent API.

pub mod http;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the axum `Router` with all agent routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::health))
        // Inventory; `/token/list` is the path the grid uses.
        .route("/tokens", get(http::list_tokens))
        .route("/token/list", get(http::list_tokens))
        // Token lifecycle (grid-facing)
        .route("/token/{id}/reserve", get(http::reserve_token))
        .route("/token/{id}/release", get(http::release_token))
        // Keyword calls (client-facing)
        .route("/token/{id}/process", post(http::process))
        .route(
            "/token/{id}/interrupt-execution",
            get(http::interrupt_execution).post(http::interrupt_execution),
        )
        // Middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
