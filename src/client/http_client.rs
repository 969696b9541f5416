//! REST path sharing the session's endpoint and authentication
//!
//! One-off HTTP calls against the same base URL. Each call fetches a fresh
//! token from the provider, sets the `Host` header explicitly from the
//! normalized endpoint and captures status, content type and body so the
//! response router can classify the reply like any other frame.

use crate::client::auth::TokenProvider;
use crate::client::responses::HttpReply;
use crate::config::{ClientConfig, Endpoint};
use crate::error::{HassError, Result};
use reqwest::header;
use reqwest::{Client, ClientBuilder, Method};
use serde_json::Value;
use tracing::{debug, warn};

/// A single REST call to be executed
#[derive(Debug, Clone)]
pub(crate) struct RestSpec {
    pub method: Method,
    /// Path relative to the normalized base; callers include `api/`
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

/// Thin reqwest wrapper bound to the client configuration
#[derive(Clone)]
pub(crate) struct RestClient {
    http: Client,
}

impl RestClient {
    /// Build the underlying HTTP client from the configuration
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut builder = ClientBuilder::new().timeout(config.request_timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        if !config.verify_tls {
            warn!("TLS verification disabled - this is insecure for production use");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder
            .build()
            .map_err(|e| HassError::connection(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    /// Execute one REST call and capture the raw reply
    pub async fn execute(
        &self,
        endpoint: &Endpoint,
        tokens: &dyn TokenProvider,
        spec: RestSpec,
    ) -> Result<HttpReply> {
        let token = tokens.access_token().await.map_err(|e| match e {
            unavailable @ HassError::TokenUnavailable(_) => unavailable,
            other => HassError::token_unavailable(other.to_string()),
        })?;

        let url = endpoint.rest_url(&spec.path, &spec.query)?;
        debug!(method = %spec.method, %url, "executing REST request");

        let mut request = self
            .http
            .request(spec.method, url)
            .header(header::HOST, endpoint.host_header())
            .bearer_auth(token);
        if let Some(body) = &spec.body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok(HttpReply {
            status,
            content_type,
            body,
        })
    }
}
