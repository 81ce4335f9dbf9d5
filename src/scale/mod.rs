//! Scale Link Module
//!
//! Finds a nearby BLE weight scale, configures it and streams decoded
//! readings. The platform BLE stack and runtime permission prompts sit behind
//! the traits below.

pub mod link;
pub mod protocol;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

pub use link::{ScaleConnection, ScaleLink};

/// A device seen during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub id: String,
    pub name: Option<String>,
}

/// One decoded measurement, stamped when it was received
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleReading {
    pub kg: f64,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

impl ScaleReading {
    pub fn now(kg: f64) -> Self {
        Self {
            kg,
            received_at: chrono::Utc::now(),
        }
    }
}

/// Lifecycle of one scan, connect, configure and stream cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleLinkState {
    Idle,
    Scanning,
    Connecting,
    Configuring,
    Streaming,
    TimedOut,
    Error,
}

/// Notification values, base64 encoded as delivered by the BLE stack
pub type Notifications = mpsc::Receiver<Result<String, ScaleError>>;

/// Scan results, in discovery order
pub type ScanEvents = mpsc::Receiver<Result<DiscoveredDevice, ScaleError>>;

#[async_trait]
pub trait BleAdapter: Send + Sync {
    /// Start an unfiltered scan.
    async fn start_scan(&self) -> Result<ScanEvents, ScaleError>;

    /// Halt any scan in progress. Safe to call when idle.
    async fn stop_scan(&self);

    async fn connect(&self, device: &DiscoveredDevice) -> Result<Arc<dyn BlePeripheral>, ScaleError>;
}

#[async_trait]
pub trait BlePeripheral: Send + Sync {
    /// Must complete before any read, write or subscribe.
    async fn discover_services(&self) -> Result<(), ScaleError>;

    async fn subscribe(&self, service: &str, characteristic: &str) -> Result<Notifications, ScaleError>;

    /// Write and wait for the peripheral's acknowledgment.
    async fn write_with_response(
        &self,
        service: &str,
        characteristic: &str,
        value: &str,
    ) -> Result<(), ScaleError>;

    async fn unsubscribe(&self, service: &str, characteristic: &str);

    async fn disconnect(&self);
}

/// Runtime capabilities the BLE stack may need
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    BluetoothScan,
    BluetoothConnect,
    CoarseLocation,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Permission::BluetoothScan => write!(f, "bluetooth_scan"),
            Permission::BluetoothConnect => write!(f, "bluetooth_connect"),
            Permission::CoarseLocation => write!(f, "coarse_location"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    Blocked,
    Unavailable,
}

#[async_trait]
pub trait PermissionProvider: Send + Sync {
    async fn check(&self, permission: Permission) -> PermissionStatus;

    async fn request(&self, permission: Permission) -> PermissionStatus;
}

/// Grants everything; for platforms without runtime prompts
pub struct NoPrompt;

#[async_trait]
impl PermissionProvider for NoPrompt {
    async fn check(&self, _permission: Permission) -> PermissionStatus {
        PermissionStatus::Granted
    }

    async fn request(&self, _permission: Permission) -> PermissionStatus {
        PermissionStatus::Granted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Android { api_level: u32 },
    Ios,
    Desktop,
}

impl Platform {
    /// Capabilities to check, in request order.
    pub fn required_permissions(&self) -> Vec<Permission> {
        match self {
            Platform::Android { api_level } if *api_level >= 31 => {
                vec![Permission::BluetoothScan, Permission::BluetoothConnect]
            }
            Platform::Android { .. } => vec![Permission::CoarseLocation],
            // iOS declares Bluetooth usage in the app manifest
            Platform::Ios | Platform::Desktop => Vec::new(),
        }
    }
}

/// Scale link errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScaleError {
    #[error("Bluetooth permission not granted: {0}")]
    PermissionDenied(Permission),

    #[error("Scan error: {0}")]
    Scan(String),

    #[error("Connect error: {0}")]
    Connect(String),

    #[error("Service discovery error: {0}")]
    Discovery(String),

    #[error("Subscribe error: {0}")]
    Subscribe(String),

    #[error("Write error: {0}")]
    Write(String),

    #[error("Device disconnected")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn android_12_needs_scan_and_connect() {
        assert_eq!(
            Platform::Android { api_level: 31 }.required_permissions(),
            vec![Permission::BluetoothScan, Permission::BluetoothConnect]
        );
    }

    #[test]
    fn older_android_needs_location() {
        assert_eq!(
            Platform::Android { api_level: 30 }.required_permissions(),
            vec![Permission::CoarseLocation]
        );
    }

    #[test]
    fn ios_and_desktop_need_nothing_at_runtime() {
        assert!(Platform::Ios.required_permissions().is_empty());
        assert!(Platform::Desktop.required_permissions().is_empty());
    }
}
