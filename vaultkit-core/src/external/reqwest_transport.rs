//! Default `HttpTransport` implementation over `reqwest`, mirroring how
//! `bae-core` keeps `CloudStorage` pluggable but ships `S3CloudStorage` as
//! its default concrete impl. Gated behind the `reqwest-transport` feature
//! so hosts that bring their own client aren't forced to pull in reqwest.
use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use super::traits::{HttpMethod, HttpTransport, TransportError, TransportRequest, TransportResponse};

/// Supplies the bearer token for each outgoing request. The sync manager
/// calls through a key-request handler for `mk`/`ak`/`jwt`; this callback is
/// the transport-layer analogue for the `Authorization` header.
pub type AuthTokenProvider = Box<dyn Fn() -> Option<String> + Send + Sync>;

pub struct ReqwestTransport {
    client: reqwest::Client,
    api_version: String,
    auth_token: AuthTokenProvider,
}

impl ReqwestTransport {
    pub fn new(api_version: impl Into<String>, auth_token: AuthTokenProvider) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_version: api_version.into(),
            auth_token,
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Patch => self.client.patch(&request.url),
        };

        let mut query = request.query;
        query.entry("api_version".to_string()).or_insert_with(|| self.api_version.clone());
        builder = builder.query(&query);

        if let Some(token) = (self.auth_token)() {
            builder = builder.bearer_auth(token);
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(TransportError::NonSuccess { status, body: text });
        }

        let body: Value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| TransportError::InvalidJson(e.to_string()))?
        };

        Ok(TransportResponse { status, body })
    }
}
