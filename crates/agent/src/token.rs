// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token inventory and reservation state.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::AgentError;
use crate::keyword::Properties;
use crate::session::Session;

/// Attribute stamped on every token so the grid can tell agent flavours apart.
pub const AGENT_TYPE_KEY: &str = "$agenttype";
pub const AGENT_TYPE: &str = "default";

/// A unit of agent capacity as published to the grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub id: String,
    pub agent_id: String,
    pub attributes: BTreeMap<String, String>,
    pub selection_patterns: BTreeMap<String, Interest>,
}

/// A selection rule the grid applies when matching work to this token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interest {
    pub selection_pattern: String,
    pub must_match: bool,
}

/// One `tokenGroups` entry of the agent config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGroupConf {
    pub capacity: usize,
    #[serde(default)]
    pub token_conf: TokenConf,
}

/// Template shared by every token of a group.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenConf {
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub selection_patterns: BTreeMap<String, String>,
    #[serde(default)]
    pub properties: Properties,
}

/// A token together with its agent-local state.
pub struct TokenEntry {
    pub token: Token,
    /// Properties of the token's group, merged into every keyword call.
    pub properties: Properties,
    pub session: Arc<Session>,
    leased: AtomicBool,
}

impl TokenEntry {
    fn new(token: Token, properties: Properties) -> Self {
        let session = Arc::new(Session::new(token.id.clone()));
        Self { token, properties, session, leased: AtomicBool::new(false) }
    }

    pub fn id(&self) -> &str {
        &self.token.id
    }

    pub fn is_reserved(&self) -> bool {
        self.leased.load(Ordering::Acquire)
    }
}

/// Token as listed by the agent's inventory endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStatus {
    #[serde(flatten)]
    pub token: Token,
    pub reserved: bool,
}

/// Owns the agent's tokens, their sessions and their leases.
#[derive(Default)]
pub struct TokenPool {
    entries: RwLock<IndexMap<String, Arc<TokenEntry>>>,
}

impl TokenPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialize `capacity` tokens per group, each with a fresh id and an
    /// empty session. Returns the new token ids in creation order.
    ///
    /// Nothing is added if any group is malformed.
    pub async fn create_tokens(
        &self,
        agent_id: &str,
        groups: &[TokenGroupConf],
    ) -> anyhow::Result<Vec<String>> {
        let mut created = Vec::new();
        for (index, group) in groups.iter().enumerate() {
            let conf = &group.token_conf;
            let selection_patterns = compile_interests(&conf.selection_patterns)
                .with_context(|| format!("token group {index}"))?;
            let mut attributes = conf.attributes.clone();
            attributes.insert(AGENT_TYPE_KEY.to_owned(), AGENT_TYPE.to_owned());

            for _ in 0..group.capacity {
                let token = Token {
                    id: uuid::Uuid::new_v4().to_string(),
                    agent_id: agent_id.to_owned(),
                    attributes: attributes.clone(),
                    selection_patterns: selection_patterns.clone(),
                };
                created.push(TokenEntry::new(token, conf.properties.clone()));
            }
        }

        let mut entries = self.entries.write().await;
        let ids = created
            .into_iter()
            .map(|entry| {
                let id = entry.token.id.clone();
                entries.insert(id.clone(), Arc::new(entry));
                id
            })
            .collect::<Vec<_>>();
        tracing::info!(created = ids.len(), total = entries.len(), "tokens created");
        Ok(ids)
    }

    pub async fn get(&self, token_id: &str) -> Option<Arc<TokenEntry>> {
        self.entries.read().await.get(token_id).map(Arc::clone)
    }

    pub async fn session(&self, token_id: &str) -> Option<Arc<Session>> {
        self.get(token_id).await.map(|entry| Arc::clone(&entry.session))
    }

    /// Lease a token. Exactly one of any number of concurrent reservations of
    /// the same token succeeds; the rest get [`AgentError::TokenReserved`].
    pub async fn reserve(&self, token_id: &str) -> Result<(), AgentError> {
        let entry = self.get(token_id).await.ok_or(AgentError::TokenNotFound)?;
        match entry.leased.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                tracing::info!(token_id, "token reserved");
                Ok(())
            }
            Err(_) => {
                tracing::warn!(token_id, "token already reserved");
                Err(AgentError::TokenReserved)
            }
        }
    }

    /// Return a leased token to the pool and tear down its session.
    ///
    /// Releasing a token that is not leased changes nothing. Returns whether
    /// the token was leased.
    pub async fn release(&self, token_id: &str) -> Result<bool, AgentError> {
        let entry = self.get(token_id).await.ok_or(AgentError::TokenNotFound)?;
        if entry.leased.compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire).is_err() {
            tracing::debug!(token_id, "release of unreserved token ignored");
            return Ok(false);
        }
        entry.session.teardown().await;
        tracing::info!(token_id, "token released");
        Ok(true)
    }

    /// Snapshot of the inventory in creation order.
    pub async fn tokens(&self) -> Vec<Token> {
        self.entries.read().await.values().map(|entry| entry.token.clone()).collect()
    }

    pub async fn statuses(&self) -> Vec<TokenStatus> {
        self.entries
            .read()
            .await
            .values()
            .map(|entry| TokenStatus { token: entry.token.clone(), reserved: entry.is_reserved() })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn reserved_count(&self) -> usize {
        self.entries.read().await.values().filter(|entry| entry.is_reserved()).count()
    }

    /// Tear down every session once, on agent shutdown.
    pub async fn teardown_sessions(&self) {
        let entries: Vec<_> = self.entries.read().await.values().map(Arc::clone).collect();
        for entry in entries {
            entry.session.teardown().await;
        }
    }
}

fn compile_interests(
    patterns: &BTreeMap<String, String>,
) -> anyhow::Result<BTreeMap<String, Interest>> {
    patterns
        .iter()
        .map(|(key, pattern)| {
            regex::Regex::new(pattern)
                .with_context(|| format!("invalid selection pattern for {key:?}"))?;
            Ok((key.clone(), Interest { selection_pattern: pattern.clone(), must_match: true }))
        })
        .collect()
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
