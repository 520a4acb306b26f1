// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the agent HTTP API.
//!
//! Uses `axum_test::TestServer`; no real TCP needed.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use clap::Parser;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use gridagent::config::AgentConfig;
use gridagent::dispatch::Dispatcher;
use gridagent::keyword::{builtin, KeywordRegistry};
use gridagent::state::AppState;
use gridagent::test_support::{test_context, AttachThenSend};
use gridagent::transport::build_router;

async fn test_state(capacity: usize, call_timeout: Option<Duration>) -> anyhow::Result<Arc<AppState>> {
    let context = test_context(capacity).await?;
    let mut registry = builtin::registry();
    registry.register("Shoot", AttachThenSend);
    let dispatcher = Dispatcher::new(Arc::clone(&context), Arc::new(registry), call_timeout);
    Ok(Arc::new(AppState { context, dispatcher: Arc::new(dispatcher) }))
}

fn test_server(state: Arc<AppState>) -> anyhow::Result<TestServer> {
    TestServer::new(build_router(state))
}

async fn first_token(state: &AppState) -> anyhow::Result<String> {
    state
        .context
        .tokens
        .tokens()
        .await
        .first()
        .map(|t| t.id.clone())
        .ok_or_else(|| anyhow::anyhow!("no tokens"))
}

#[tokio::test]
async fn health_reports_inventory() -> anyhow::Result<()> {
    let state = test_state(3, None).await?;
    let token = first_token(&state).await?;
    state.context.tokens.reserve(&token).await?;

    let server = test_server(state)?;
    let resp = server.get("/api/v1/health").await;
    resp.assert_status_ok();

    let body: Value = resp.json();
    assert_eq!(body["status"], "running");
    assert_eq!(body["agentId"], "agent-test");
    assert_eq!(body["tokenCount"], 3);
    assert_eq!(body["reservedCount"], 1);
    assert_eq!(body["inFlight"], 0);
    Ok(())
}

#[tokio::test]
async fn list_tokens_shows_reservation() -> anyhow::Result<()> {
    let state = test_state(2, None).await?;
    let token = first_token(&state).await?;
    let server = test_server(Arc::clone(&state))?;

    server.get(&format!("/token/{token}/reserve")).await.assert_status_ok();

    let list: Vec<Value> = server.get("/tokens").await.json();
    assert_eq!(list.len(), 2);
    let reserved: Vec<&str> =
        list.iter().filter(|t| t["reserved"] == true).filter_map(|t| t["id"].as_str()).collect();
    assert_eq!(reserved, [token.as_str()]);
    assert_eq!(list[0]["attributes"]["$agenttype"], "default");

    let grid_view: Vec<Value> = server.get("/token/list").await.json();
    assert_eq!(grid_view, list);
    Ok(())
}

#[tokio::test]
async fn echo_round_trip_over_a_lease() -> anyhow::Result<()> {
    let state = test_state(1, None).await?;
    let token = first_token(&state).await?;
    let server = test_server(Arc::clone(&state))?;

    let resp = server.get(&format!("/token/{token}/reserve")).await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<Value>(), json!({ "tokenId": token, "reserved": true }));

    let resp = server
        .post(&format!("/token/{token}/process"))
        .json(&json!({ "function": "Echo", "argument": { "q": "hi" }, "properties": { "env": "ci" } }))
        .await;
    resp.assert_status_ok();
    assert_eq!(
        resp.json::<Value>(),
        json!({ "payload": { "q": "hi", "properties": { "env": "ci" } }, "attachments": [] })
    );

    let resp = server.get(&format!("/token/{token}/release")).await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<Value>(), json!({ "tokenId": token, "released": true }));
    assert_eq!(state.context.tokens.reserved_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn attachments_are_returned_in_order() -> anyhow::Result<()> {
    let state = test_state(1, None).await?;
    let token = first_token(&state).await?;
    let server = test_server(state)?;

    let resp = server
        .post(&format!("/token/{token}/process"))
        .json(&json!({ "function": "Shoot", "payload": { "names": ["x.png"] } }))
        .await;
    resp.assert_status_ok();
    assert_eq!(
        resp.json::<Value>(),
        json!({
            "payload": { "result": "OK" },
            "attachments": [{ "name": "x.png", "hexContent": "AB12" }],
        })
    );
    Ok(())
}

#[tokio::test]
async fn unknown_keyword_is_a_failed_result_not_an_http_error() -> anyhow::Result<()> {
    let state = test_state(1, None).await?;
    let token = first_token(&state).await?;
    let server = test_server(state)?;

    let resp = server
        .post(&format!("/token/{token}/process"))
        .json(&json!({ "function": "Unknown", "argument": {} }))
        .await;
    resp.assert_status_ok();
    assert_eq!(
        resp.json::<Value>(),
        json!({ "error": "Unable to find keyword Unknown in builtin", "attachments": [] })
    );
    Ok(())
}

#[tokio::test]
async fn second_reserve_conflicts() -> anyhow::Result<()> {
    let state = test_state(1, None).await?;
    let token = first_token(&state).await?;
    let server = test_server(state)?;

    server.get(&format!("/token/{token}/reserve")).await.assert_status_ok();
    let resp = server.get(&format!("/token/{token}/reserve")).await;
    resp.assert_status(StatusCode::CONFLICT);
    let body: Value = resp.json();
    assert_eq!(body["error"]["code"], "TOKEN_RESERVED");
    Ok(())
}

#[tokio::test]
async fn release_of_free_token_is_a_no_op() -> anyhow::Result<()> {
    let state = test_state(1, None).await?;
    let token = first_token(&state).await?;
    let server = test_server(state)?;

    let resp = server.get(&format!("/token/{token}/release")).await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<Value>()["released"], false);
    Ok(())
}

#[yare::parameterized(
    reserve = { "reserve" },
    release = { "release" },
    interrupt = { "interrupt-execution" },
)]
#[test_macro(tokio::test)]
async fn unknown_token_is_not_found(action: &str) -> anyhow::Result<()> {
    let server = test_server(test_state(1, None).await?)?;
    let resp = server.get(&format!("/token/nope/{action}")).await;
    resp.assert_status(StatusCode::NOT_FOUND);
    let body: Value = resp.json();
    assert_eq!(body["error"]["code"], "TOKEN_NOT_FOUND");
    assert_eq!(body["error"]["message"], "No token found with id 'nope'");
    Ok(())
}

#[tokio::test]
async fn process_on_unknown_token_is_not_found() -> anyhow::Result<()> {
    let server = test_server(test_state(1, None).await?)?;
    let resp = server.post("/token/nope/process").json(&json!({ "function": "Echo" })).await;
    resp.assert_status(StatusCode::NOT_FOUND);
    Ok(())
}

#[yare::parameterized(
    empty_function = { json!({ "function": "" }) },
    missing_function = { json!({ "argument": {} }) },
)]
#[test_macro(tokio::test)]
async fn malformed_process_is_bad_request(body: Value) -> anyhow::Result<()> {
    let state = test_state(1, None).await?;
    let token = first_token(&state).await?;
    let server = test_server(state)?;

    let resp = server.post(&format!("/token/{token}/process")).json(&body).await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(resp.json::<Value>()["error"]["code"], "BAD_REQUEST");
    Ok(())
}

#[tokio::test]
async fn call_timeout_from_request_is_applied() -> anyhow::Result<()> {
    let state = test_state(1, None).await?;
    let token = first_token(&state).await?;
    let server = test_server(state)?;

    let resp = server
        .post(&format!("/token/{token}/process"))
        .json(&json!({ "function": "Sleep", "argument": { "ms": 5000 }, "callTimeout": 20 }))
        .await;
    resp.assert_status_ok();
    assert_eq!(
        resp.json::<Value>()["error"],
        "Timeout while processing request. Request execution interrupted."
    );
    Ok(())
}

#[tokio::test]
async fn zero_call_timeout_runs_without_limit() -> anyhow::Result<()> {
    let state = test_state(1, Some(Duration::from_millis(10))).await?;
    let token = first_token(&state).await?;
    let server = test_server(state)?;

    let resp = server
        .post(&format!("/token/{token}/process"))
        .json(&json!({ "function": "Sleep", "argument": { "ms": 30 }, "callTimeout": 0 }))
        .await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<Value>()["payload"], json!({ "slept": 30 }));
    Ok(())
}

#[tokio::test]
async fn interrupt_stops_a_running_keyword() -> anyhow::Result<()> {
    let state = test_state(1, None).await?;
    let token = first_token(&state).await?;
    let dispatcher = Arc::clone(&state.dispatcher);
    let server = test_server(state)?;

    let call = async {
        server
            .post(&format!("/token/{token}/process"))
            .json(&json!({ "function": "Sleep", "argument": { "ms": 60000 } }))
            .await
    };
    let interrupter = async {
        let mut attempts = 0;
        while dispatcher.in_flight(&token).await.is_none() {
            attempts += 1;
            anyhow::ensure!(attempts < 200, "call never started");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(server.post(&format!("/token/{token}/interrupt-execution")).await)
    };
    let (resp, interrupted) =
        tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(call, interrupter) })
            .await?;

    let interrupted = interrupted?;
    interrupted.assert_status_ok();
    assert_eq!(interrupted.json::<Value>()["interrupted"], true);
    resp.assert_status_ok();
    assert_eq!(resp.json::<Value>()["error"], "Keyword execution interrupted");
    Ok(())
}

#[tokio::test]
async fn agent_built_from_config_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("agent.json");
    std::fs::write(
        &path,
        serde_json::to_vec(&json!({
            "tokenGroups": [
                { "capacity": 2, "tokenConf": { "attributes": { "browser": "chrome" } } },
                {
                    "capacity": 1,
                    "tokenConf": {
                        "selectionPatterns": { "os": "linux|mac" },
                        "properties": { "headless": "true" },
                    },
                },
            ],
            "properties": { "region": "eu" },
        }))?,
    )?;
    let path = path.to_string_lossy().into_owned();
    let config = AgentConfig::try_parse_from(["gridagent", "--config", path.as_str()])?;

    let state = gridagent::build_state(
        &config,
        builtin::registry(),
        "http://agent:8000".to_owned(),
        CancellationToken::new(),
    )
    .await?;
    let server = test_server(Arc::clone(&state))?;

    let list: Vec<Value> = server.get("/tokens").await.json();
    assert_eq!(list.len(), 3);
    assert_eq!(list[0]["attributes"], json!({ "browser": "chrome", "$agenttype": "default" }));
    assert_eq!(
        list[2]["selectionPatterns"]["os"],
        json!({ "selectionPattern": "linux|mac", "mustMatch": true })
    );

    let token = list[2]["id"].as_str().unwrap_or_default().to_owned();
    let resp = server
        .post(&format!("/token/{token}/process"))
        .json(&json!({ "function": "Echo", "argument": {} }))
        .await;
    assert_eq!(
        resp.json::<Value>()["payload"]["properties"],
        json!({ "region": "eu", "headless": "true" })
    );
    Ok(())
}

#[tokio::test]
async fn invalid_selection_pattern_is_fatal() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("agent.json");
    std::fs::write(
        &path,
        r#"{"tokenGroups":[{"capacity":1,"tokenConf":{"selectionPatterns":{"os":"("}}}]}"#,
    )?;
    let path = path.to_string_lossy().into_owned();
    let config = AgentConfig::try_parse_from(["gridagent", "--config", path.as_str()])?;

    let result = gridagent::build_state(
        &config,
        KeywordRegistry::new("empty"),
        "http://agent:8000".to_owned(),
        CancellationToken::new(),
    )
    .await;
    assert!(result.is_err());
    Ok(())
}
