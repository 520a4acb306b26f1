// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background heartbeat that keeps the grid's view of this agent current.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::client::GridClient;
use super::{RegistrationMessage, UnregistrationMessage};
use crate::state::AgentContext;

/// Send one registration with the current inventory.
pub async fn register_once(context: &AgentContext, client: &GridClient) -> anyhow::Result<()> {
    let message =
        RegistrationMessage { agent_ref: context.agent_ref(), tokens: context.tokens.tokens().await };
    client.register(&message).await
}

/// Spawn the heartbeat. It ticks every `interval` until the context's
/// shutdown token fires; a failed tick is logged and the next one retries.
pub fn spawn_registrar(
    context: Arc<AgentContext>,
    client: Arc<GridClient>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(grid = %client.base_url(), ?interval, "registrar started");

        loop {
            tokio::select! {
                _ = context.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            match register_once(&context, &client).await {
                Ok(()) => tracing::debug!(agent_id = %context.agent_id, "registered with grid"),
                Err(e) => tracing::warn!(grid = %client.base_url(), err = %e, "registration failed"),
            }
        }
        tracing::info!("registrar stopped");
    })
}

/// Tell the grid this agent is going away. Failures are logged, not returned.
pub async fn unregister(context: &AgentContext, client: &GridClient) {
    let message = UnregistrationMessage { agent_ref: context.agent_ref() };
    match client.unregister(&message).await {
        Ok(()) => tracing::info!(agent_id = %context.agent_id, "unregistered from grid"),
        Err(e) => tracing::warn!(grid = %client.base_url(), err = %e, "unregistration failed"),
    }
}

#[cfg(test)]
#[path = "registrar_tests.rs"]
mod tests;
