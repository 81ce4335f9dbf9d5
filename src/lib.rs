//! Dry Weight Watchers client core
//!
//! Session lifecycle, authenticated API access and scale ingestion shared by
//! the patient and provider clients.

pub mod auth;
pub mod config;
pub mod gateway;
pub mod jwt;
pub mod logging;
pub mod scale;
pub mod storage;
pub mod sync;
pub mod units;

use std::sync::Arc;

use auth::SessionManager;
use config::Config;
use scale::{BleAdapter, PermissionProvider, Platform, ScaleLink};
use storage::{SecureStorage, TokenStore};
use sync::{ApiClient, ApiError, PatientApi};

/// Application state shared by the client's screens
pub struct AppState {
    pub config: Config,
    pub session: Arc<SessionManager>,
    pub api: PatientApi,
}

impl AppState {
    /// Wire up against the configured storage directory
    pub fn new(config: Config) -> Result<Self, ApiError> {
        let storage = Arc::new(SecureStorage::with_path(&config.storage_dir));
        Self::with_storage(config, storage)
    }

    pub fn with_storage(config: Config, storage: Arc<dyn TokenStore>) -> Result<Self, ApiError> {
        let client = ApiClient::from_config(&config)?;
        let session = Arc::new(SessionManager::new(storage, client.clone()));
        let api = PatientApi::new(&client, session.clone());

        Ok(Self {
            config,
            session,
            api,
        })
    }

    /// Scale link on the host's BLE stack, scanning for the configured window
    pub fn scale_link(
        &self,
        adapter: Arc<dyn BleAdapter>,
        permissions: Arc<dyn PermissionProvider>,
        platform: Platform,
    ) -> ScaleLink {
        ScaleLink::new(adapter, permissions, platform).with_scan_timeout(self.config.scan_timeout)
    }
}
