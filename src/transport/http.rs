//! HTTP transport to minions running the `minion` server.
//!
//! ## Configuration
//!
//! ```yaml
//! timeout_ms: 30000
//! token: "${MODCALL_TOKEN}"
//! minions:
//!   mac01: "http://10.0.0.5:4506"
//!   mac02: "http://10.0.0.6:4506"
//! ```
//!
//! Each request is a `POST {base_url}/run` with the JSON-encoded
//! `InvocationRequest`; the minion answers with an `InvocationResponse`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Transport, TransportError};
use crate::dispatch::request::{InvocationRequest, InvocationResponse, MinionId};
use crate::server::TOKEN_HEADER;

/// HTTP transport backed by a minion roster.
pub struct HttpTransport {
    client: reqwest::Client,
    roster: RwLock<HashMap<MinionId, String>>,
    token: Option<String>,
    timeout_ms: u64,
}

impl HttpTransport {
    /// Build a transport with a per-request timeout.
    pub fn new(timeout_ms: u64) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            roster: RwLock::new(HashMap::new()),
            token: None,
            timeout_ms,
        })
    }

    /// Send `x-modcall-token` with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Add (or re-point) a minion. The roster may change while calls run.
    pub fn add_minion(&self, id: MinionId, base_url: impl Into<String>) {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        log::debug!("HTTP transport: minion {} at {}", id, base_url);
        self.roster.write().insert(id, base_url);
    }

    pub fn remove_minion(&self, id: &MinionId) -> bool {
        self.roster.write().remove(id).is_some()
    }

    pub fn minions(&self) -> Vec<MinionId> {
        let mut ids: Vec<MinionId> = self.roster.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn run_url(&self, minion: &MinionId) -> Result<String, TransportError> {
        self.roster
            .read()
            .get(minion)
            .map(|base| format!("{}/run", base))
            .ok_or_else(|| TransportError::UnknownMinion(minion.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(
        &self,
        minion: &MinionId,
        request: &InvocationRequest,
    ) -> Result<InvocationResponse, TransportError> {
        let url = self.run_url(minion)?;

        let mut builder = self.client.post(&url).json(request);
        if let Some(token) = &self.token {
            builder = builder.header(TOKEN_HEADER, token.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(self.timeout_ms)
            } else {
                TransportError::ConnectionFailed(format!("{}: {}", url, e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Protocol(format!(
                "minion {} answered HTTP {}: {}",
                minion, status, body
            )));
        }

        response
            .json::<InvocationResponse>()
            .await
            .map_err(|e| TransportError::Serialization(e.to_string()))
    }
}
