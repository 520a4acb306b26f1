// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for the grid's registration endpoints.

use std::time::Duration;

use reqwest::Client;

use super::{RegistrationMessage, UnregistrationMessage};

/// HTTP client wrapper for one grid coordinator.
pub struct GridClient {
    base_url: String,
    client: Client,
}

impl GridClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        // reqwest is built without a bundled crypto provider.
        let _ = rustls::crypto::ring::default_provider().install_default();
        let client = Client::builder().timeout(timeout).build().unwrap_or_default();
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Push the agent's identity and inventory. The response body is ignored.
    pub async fn register(&self, message: &RegistrationMessage) -> anyhow::Result<()> {
        self.client.post(self.url("/grid/register")).json(message).send().await?.error_for_status()?;
        Ok(())
    }

    pub async fn unregister(&self, message: &UnregistrationMessage) -> anyhow::Result<()> {
        self.client.post(self.url("/grid/unregister")).json(message).send().await?.error_for_status()?;
        Ok(())
    }
}
