// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;
use crate::grid::AgentRef;
use crate::keyword::Properties;
use crate::token::TokenPool;

/// Process-wide agent state, built once at startup and handed to the token
/// pool, dispatcher and registrar.
pub struct AgentContext {
    pub agent_id: String,
    pub agent_url: String,
    /// Agent-wide properties merged into every keyword call.
    pub properties: Properties,
    pub tokens: TokenPool,
    pub shutdown: CancellationToken,
}

impl AgentContext {
    pub fn new(
        agent_id: impl Into<String>,
        agent_url: impl Into<String>,
        properties: Properties,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_url: agent_url.into(),
            properties,
            tokens: TokenPool::new(),
            shutdown,
        }
    }

    pub fn agent_ref(&self) -> AgentRef {
        AgentRef { agent_id: self.agent_id.clone(), agent_url: self.agent_url.clone() }
    }
}

/// State shared by the HTTP handlers.
pub struct AppState {
    pub context: Arc<AgentContext>,
    pub dispatcher: Arc<Dispatcher>,
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
