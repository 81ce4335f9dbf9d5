//! Authenticated Request Gateway
//!
//! Attaches the session's bearer token to outgoing requests and recovers from
//! a single 401 by refreshing and retrying once.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The session operations the gateway relies on.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    /// Current access token, read fresh on every call.
    fn access_token(&self) -> Option<String>;

    async fn refresh_access_token(&self);

    async fn logout(&self);
}

/// A replayable request
#[derive(Debug, Clone)]
pub struct AuthRequest {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl AuthRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Add a caller header. `Authorization` is always replaced by the
    /// session's token when the request is sent.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, GatewayError> {
        let bytes =
            serde_json::to_vec(body).map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
        self.headers
            .entry(CONTENT_TYPE)
            .or_insert(HeaderValue::from_static("application/json"));
        self.body = Some(bytes);
        Ok(self)
    }

}

#[derive(Clone)]
pub struct AuthGateway {
    client: reqwest::Client,
    session: Arc<dyn SessionHandle>,
}

impl AuthGateway {
    pub fn new(client: reqwest::Client, session: Arc<dyn SessionHandle>) -> Self {
        Self { client, session }
    }

    /// Send with the current access token.
    ///
    /// Issues at most two requests: the original and, only after a 401 and a
    /// completed refresh, one retry with the new token. The response of the
    /// last attempt is returned whatever its status.
    pub async fn send(&self, request: &AuthRequest) -> Result<reqwest::Response, GatewayError> {
        let Some(token) = self.session.access_token() else {
            warn!(url = %request.url, "No access token for authenticated request");
            self.session.logout().await;
            return Err(GatewayError::SessionExpired);
        };

        let response = self.issue(request, &token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        info!(url = %request.url, "Access token rejected, attempting refresh");
        self.session.refresh_access_token().await;

        let Some(new_token) = self.session.access_token() else {
            warn!(url = %request.url, "No access token after refresh");
            self.session.logout().await;
            return Err(GatewayError::SessionExpired);
        };

        debug!(url = %request.url, "Retrying with refreshed token");
        self.issue(request, &new_token).await
    }

    async fn issue(&self, request: &AuthRequest, token: &str) -> Result<reqwest::Response, GatewayError> {
        let mut headers = request.headers.clone();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
        headers.insert(AUTHORIZATION, bearer);

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(headers);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        builder
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))
    }
}

/// Gateway errors
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Session expired, please log in again")]
    SessionExpired,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
