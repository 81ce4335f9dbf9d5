//! API Sync Module
//!
//! HTTP communication with the Dry Weight Watchers API.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::auth::SessionManager;
use crate::config::{join_url, Config};
use crate::gateway::{AuthGateway, AuthRequest, GatewayError};
use crate::units::{convert_weight, WeightUnit};

/// Client for the unauthenticated endpoints (login, token refresh)
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    refresh_path: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            refresh_path: "/refresh-jwt/".to_string(),
            client,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Ok(Self::new(&config.api_base_url, config.http_timeout)?.with_refresh_path(&config.refresh_path))
    }

    pub fn with_refresh_path(mut self, path: &str) -> Self {
        self.refresh_path = path.to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Shared connection pool for the authenticated gateway
    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    /// Exchange credentials for a token pair
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let url = self.url("/login/");

        debug!("Logging in at: {}", url);

        let response = self
            .client
            .post(&url)
            .json(&LoginRequest { email, password })
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ApiError::from_response(response).await);
        }

        let data = response
            .json::<LoginResponse>()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))?;

        info!("Login accepted");
        Ok(data)
    }

    /// Trade a refresh token for a new access token
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        let url = self.url(&self.refresh_path);

        debug!("Refreshing access token at: {}", url);

        let response = self
            .client
            .post(&url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ApiError::from_response(response).await);
        }

        response
            .json::<RefreshResponse>()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))
    }
}

/// Patient endpoints, all behind the authenticated gateway
#[derive(Clone)]
pub struct PatientApi {
    base_url: String,
    gateway: AuthGateway,
    session: Arc<SessionManager>,
}

impl PatientApi {
    pub fn new(api: &ApiClient, session: Arc<SessionManager>) -> Self {
        Self {
            base_url: api.base_url().to_string(),
            gateway: AuthGateway::new(api.http().clone(), session.clone()),
            session,
        }
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    /// Fetch the profile and keep it as the session's user
    pub async fn profile(&self) -> Result<serde_json::Value, ApiError> {
        let response = self.gateway.send(&AuthRequest::get(self.url("/profile/"))).await?;

        if !response.status().is_success() {
            return Err(ApiError::from_response(response).await);
        }

        let profile = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ApiError::Parse(e.to_string()))?;

        self.session.set_user(profile.clone());
        Ok(profile)
    }

    /// Record a weight given in kilograms. The server stores pounds.
    pub async fn record_weight(&self, kg: f64) -> Result<(), ApiError> {
        if !kg.is_finite() || kg <= 0.0 {
            return Err(ApiError::Invalid(format!("weight must be positive, got {}", kg)));
        }

        let pounds = convert_weight(kg, WeightUnit::Metric, WeightUnit::Imperial);
        info!("Recording weight: {} lbs", pounds);

        let request =
            AuthRequest::post(self.url("/record_weight/")).json(&WeightSubmission { weight: pounds })?;
        let response = self.gateway.send(&request).await?;

        if !response.status().is_success() {
            let e = ApiError::from_response(response).await;
            error!("Failed to record weight: {}", e);
            return Err(e);
        }

        Ok(())
    }

    pub async fn update_unit_preference(&self, unit: WeightUnit) -> Result<(), ApiError> {
        let request = AuthRequest::post(self.url("/update-unit-preference/"))
            .json(&UnitPreference { unit_preference: unit })?;
        let response = self.gateway.send(&request).await?;

        if !response.status().is_success() {
            return Err(ApiError::from_response(response).await);
        }

        info!("Unit preference set to {}", unit);
        Ok(())
    }
}

// Request/Response types

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    #[serde(alias = "access")]
    pub access_token: String,
}

#[derive(Serialize)]
struct WeightSubmission {
    weight: f64,
}

#[derive(Serialize)]
struct UnitPreference {
    unit_preference: WeightUnit,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(alias = "error", alias = "detail")]
    message: String,
}

/// API errors
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl ApiError {
    async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let message = response
            .json::<ErrorResponse>()
            .await
            .map(|e| e.message)
            .unwrap_or_else(|_| format!("Status: {}", status));
        ApiError::Server {
            status: status.as_u16(),
            message,
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, ApiError::Gateway(GatewayError::SessionExpired))
    }
}
