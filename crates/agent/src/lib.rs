// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gridagent: keyword execution agent for a distributed test grid.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod grid;
pub mod keyword;
pub mod session;
pub mod state;
pub mod test_support;
pub mod token;
pub mod transport;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::dispatch::Dispatcher;
use crate::grid::client::GridClient;
use crate::grid::registrar::{spawn_registrar, unregister};
use crate::keyword::KeywordRegistry;
use crate::state::{AgentContext, AppState};
use crate::transport::build_router;

/// Build the agent's shared state: context, tokens and dispatcher.
///
/// Fails on malformed token configuration.
pub async fn build_state(
    config: &AgentConfig,
    registry: KeywordRegistry,
    agent_url: String,
    shutdown: CancellationToken,
) -> anyhow::Result<Arc<AppState>> {
    let file_config = config.file_config()?;
    let agent_id = uuid::Uuid::new_v4().to_string();
    let context = AgentContext::new(agent_id, agent_url, file_config.properties, shutdown);
    context
        .tokens
        .create_tokens(&context.agent_id, &file_config.token_groups)
        .await
        .context("creating tokens")?;
    let context = Arc::new(context);

    tracing::info!(keywords = ?registry.names(), source = %registry.source(), "keywords loaded");
    let dispatcher =
        Dispatcher::new(Arc::clone(&context), Arc::new(registry), config.call_timeout());
    Ok(Arc::new(AppState { context, dispatcher: Arc::new(dispatcher) }))
}

/// Run the agent until Ctrl-C.
pub async fn run(config: AgentConfig, registry: KeywordRegistry) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let listener = TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
    let bound = listener.local_addr()?;
    let agent_url = config
        .agent_url
        .clone()
        .unwrap_or_else(|| format!("http://{}:{}", config.host, bound.port()));

    let state = build_state(&config, registry, agent_url, shutdown.clone()).await?;
    let context = Arc::clone(&state.context);

    let grid = config
        .grid_host
        .as_ref()
        .map(|host| Arc::new(GridClient::new(host.clone(), config.grid_timeout())));
    let registrar = grid.as_ref().map(|client| {
        spawn_registrar(Arc::clone(&context), Arc::clone(client), config.registration_interval())
    });
    if grid.is_none() {
        tracing::info!("no grid host configured; registration disabled");
    }

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
            }
            shutdown.cancel();
        });
    }

    tracing::info!(
        agent_id = %context.agent_id,
        agent_url = %context.agent_url,
        tokens = context.tokens.len().await,
        "gridagent listening on {bound}"
    );
    let router = build_router(state);
    axum::serve(listener, router).with_graceful_shutdown(shutdown.clone().cancelled_owned()).await?;
    shutdown.cancel();

    if let Some(handle) = registrar {
        let _ = handle.await;
    }
    if let Some(client) = grid {
        unregister(&context, &client).await;
    }
    context.tokens.teardown_sessions().await;
    tracing::info!("gridagent stopped");
    Ok(())
}
