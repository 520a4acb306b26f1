// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::*;
use crate::test_support::test_context;

/// Records every request body per path and answers with a fixed status.
#[derive(Clone)]
struct Capture {
    status: StatusCode,
    bodies: Arc<Mutex<Vec<(String, Value)>>>,
}

impl Capture {
    async fn count(&self, path: &str) -> usize {
        self.bodies.lock().await.iter().filter(|(p, _)| p == path).count()
    }

    async fn first(&self, path: &str) -> Option<Value> {
        self.bodies.lock().await.iter().find(|(p, _)| p == path).map(|(_, body)| body.clone())
    }
}

async fn record_register(State(capture): State<Capture>, Json(body): Json<Value>) -> StatusCode {
    capture.bodies.lock().await.push(("/grid/register".to_owned(), body));
    capture.status
}

async fn record_unregister(State(capture): State<Capture>, Json(body): Json<Value>) -> StatusCode {
    capture.bodies.lock().await.push(("/grid/unregister".to_owned(), body));
    capture.status
}

/// Start a fake grid on an ephemeral port. Returns its base URL.
async fn fake_grid(status: StatusCode) -> anyhow::Result<(String, Capture)> {
    let capture = Capture { status, bodies: Arc::new(Mutex::new(Vec::new())) };
    let router = Router::new()
        .route("/grid/register", post(record_register))
        .route("/grid/unregister", post(record_unregister))
        .with_state(capture.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok((format!("http://{addr}"), capture))
}

async fn wait_for(capture: &Capture, path: &str, at_least: usize) -> anyhow::Result<()> {
    for _ in 0..200 {
        if capture.count(path).await >= at_least {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("expected {at_least} requests to {path}, got {}", capture.count(path).await)
}

#[tokio::test]
async fn empty_inventory_still_registers() -> anyhow::Result<()> {
    let (url, capture) = fake_grid(StatusCode::OK).await?;
    let context = test_context(0).await?;
    let client = GridClient::new(url, Duration::from_secs(2));

    register_once(&context, &client).await?;

    let body = capture.first("/grid/register").await;
    assert_eq!(
        body,
        Some(json!({
            "agentRef": { "agentId": "agent-test", "agentUrl": "http://127.0.0.1:0" },
            "tokens": [],
        }))
    );
    Ok(())
}

#[tokio::test]
async fn registration_carries_tokens_with_attributes() -> anyhow::Result<()> {
    let (url, capture) = fake_grid(StatusCode::OK).await?;
    let context = test_context(2).await?;
    let client = GridClient::new(url, Duration::from_secs(2));

    register_once(&context, &client).await?;

    let body = capture.first("/grid/register").await.unwrap_or_default();
    let tokens = body["tokens"].as_array().cloned().unwrap_or_default();
    assert_eq!(tokens.len(), 2);
    for token in &tokens {
        assert_eq!(token["agentId"], "agent-test");
        assert_eq!(token["attributes"]["$agenttype"], "default");
    }
    Ok(())
}

#[tokio::test]
async fn rejected_registration_is_an_error() -> anyhow::Result<()> {
    let (url, _capture) = fake_grid(StatusCode::INTERNAL_SERVER_ERROR).await?;
    let context = test_context(0).await?;
    let client = GridClient::new(url, Duration::from_secs(2));
    assert!(register_once(&context, &client).await.is_err());
    Ok(())
}

#[tokio::test]
async fn heartbeat_keeps_ticking_after_failures() -> anyhow::Result<()> {
    let (url, capture) = fake_grid(StatusCode::INTERNAL_SERVER_ERROR).await?;
    let context = test_context(0).await?;
    let client = Arc::new(GridClient::new(url, Duration::from_secs(2)));

    let handle = spawn_registrar(Arc::clone(&context), client, Duration::from_millis(20));
    wait_for(&capture, "/grid/register", 3).await?;
    assert!(!handle.is_finished());

    context.shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle).await??;
    Ok(())
}

#[tokio::test]
async fn heartbeat_survives_unreachable_grid() -> anyhow::Result<()> {
    // Bind then drop to get a port nothing listens on.
    let addr = tokio::net::TcpListener::bind("127.0.0.1:0").await?.local_addr()?;
    let context = test_context(1).await?;
    let client = Arc::new(GridClient::new(format!("http://{addr}"), Duration::from_millis(200)));

    let handle = spawn_registrar(Arc::clone(&context), client, Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_finished());

    context.shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle).await??;
    Ok(())
}

#[tokio::test]
async fn unregister_sends_agent_ref() -> anyhow::Result<()> {
    let (url, capture) = fake_grid(StatusCode::OK).await?;
    let context = test_context(1).await?;
    let client = GridClient::new(format!("{url}/"), Duration::from_secs(2));

    unregister(&context, &client).await;

    assert_eq!(
        capture.first("/grid/unregister").await,
        Some(json!({ "agentRef": { "agentId": "agent-test", "agentUrl": "http://127.0.0.1:0" } }))
    );
    assert_eq!(capture.count("/grid/register").await, 0);
    Ok(())
}
