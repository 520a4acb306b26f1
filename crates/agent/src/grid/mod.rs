// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordinator ("grid") side of the agent: wire types, HTTP client and the
//! registration heartbeat.

pub mod client;
pub mod registrar;

use serde::{Deserialize, Serialize};

use crate::token::Token;

/// Identity the agent advertises to the grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRef {
    pub agent_id: String,
    pub agent_url: String,
}

/// Body of `POST /grid/register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationMessage {
    pub agent_ref: AgentRef,
    pub tokens: Vec<Token>,
}

/// Body of `POST /grid/unregister`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnregistrationMessage {
    pub agent_ref: AgentRef,
}
