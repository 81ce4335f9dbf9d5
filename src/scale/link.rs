//! Scan, connect and configure a scale, then stream its readings.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::DEFAULT_SCAN_TIMEOUT_MS;

use super::protocol::{self, COMMAND_CHAR_UUID, RESULTS_CHAR_UUID, SERVICE_UUID};
use super::{
    BleAdapter, BlePeripheral, DiscoveredDevice, Notifications, Permission, PermissionProvider,
    PermissionStatus, Platform, ScaleError, ScaleLinkState, ScaleReading,
};

const READING_QUEUE_DEPTH: usize = 16;

pub struct ScaleLink {
    adapter: Arc<dyn BleAdapter>,
    permissions: Arc<dyn PermissionProvider>,
    platform: Platform,
    scan_timeout: Duration,
    state: Arc<watch::Sender<ScaleLinkState>>,
}

impl ScaleLink {
    pub fn new(
        adapter: Arc<dyn BleAdapter>,
        permissions: Arc<dyn PermissionProvider>,
        platform: Platform,
    ) -> Self {
        let (state, _) = watch::channel(ScaleLinkState::Idle);
        Self {
            adapter,
            permissions,
            platform,
            scan_timeout: Duration::from_millis(DEFAULT_SCAN_TIMEOUT_MS),
            state: Arc::new(state),
        }
    }

    /// Scan window used by [`connect_to_scale`](Self::connect_to_scale).
    pub fn with_scan_timeout(mut self, scan_timeout: Duration) -> Self {
        self.scan_timeout = scan_timeout;
        self
    }

    pub fn scan_timeout(&self) -> Duration {
        self.scan_timeout
    }

    /// Watch the link state.
    pub fn state(&self) -> watch::Receiver<ScaleLinkState> {
        self.state.subscribe()
    }

    pub fn current_state(&self) -> ScaleLinkState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ScaleLinkState) {
        debug!(?state, "Scale link state");
        self.state.send_replace(state);
    }

    /// Check, and if needed request, each capability the platform needs.
    /// Stops at the first denial.
    pub async fn request_permissions(&self) -> bool {
        self.first_denied_permission().await.is_none()
    }

    async fn first_denied_permission(&self) -> Option<Permission> {
        for permission in self.platform.required_permissions() {
            if self.permissions.check(permission).await == PermissionStatus::Granted {
                continue;
            }
            if self.permissions.request(permission).await != PermissionStatus::Granted {
                warn!(%permission, "Permission denied");
                return Some(permission);
            }
        }
        None
    }

    /// Scan for a supported scale and bring up its measurement stream.
    ///
    /// Resolves once the subscription is live and the configuration frames are
    /// acknowledged; weights arrive later through the returned connection.
    /// `Ok(None)` means no supported scale answered within the link's scan
    /// timeout.
    pub async fn connect_to_scale(&self) -> Result<Option<ScaleConnection>, ScaleError> {
        self.connect_to_scale_within(self.scan_timeout).await
    }

    /// [`connect_to_scale`](Self::connect_to_scale) with a one-off scan window.
    pub async fn connect_to_scale_within(
        &self,
        scan_timeout: Duration,
    ) -> Result<Option<ScaleConnection>, ScaleError> {
        if let Some(permission) = self.first_denied_permission().await {
            self.set_state(ScaleLinkState::Error);
            return Err(ScaleError::PermissionDenied(permission));
        }

        let Some(device) = self.scan(scan_timeout).await? else {
            return Ok(None);
        };

        info!(device = %device.id, name = ?device.name, "Connecting to scale");
        self.set_state(ScaleLinkState::Connecting);

        let peripheral = match self.adapter.connect(&device).await {
            Ok(peripheral) => peripheral,
            Err(e) => {
                error!("Failed to connect to scale: {}", e);
                self.set_state(ScaleLinkState::Error);
                return Err(e);
            }
        };

        match self.establish(device, peripheral.clone()).await {
            Ok(connection) => {
                self.set_state(ScaleLinkState::Streaming);
                Ok(Some(connection))
            }
            Err(e) => {
                error!("Scale setup failed: {}", e);
                peripheral.disconnect().await;
                self.set_state(ScaleLinkState::Error);
                Err(e)
            }
        }
    }

    /// Halt any scan in progress.
    pub async fn stop_scanning(&self) {
        self.adapter.stop_scan().await;
        if self.current_state() == ScaleLinkState::Scanning {
            self.set_state(ScaleLinkState::Idle);
        }
    }

    async fn scan(&self, scan_timeout: Duration) -> Result<Option<DiscoveredDevice>, ScaleError> {
        self.set_state(ScaleLinkState::Scanning);
        info!(timeout_ms = scan_timeout.as_millis() as u64, "Scanning for scale");

        let mut events = match self.adapter.start_scan().await {
            Ok(events) => events,
            Err(e) => {
                self.set_state(ScaleLinkState::Error);
                return Err(e);
            }
        };

        let matched = tokio::time::timeout(scan_timeout, async {
            while let Some(event) = events.recv().await {
                let device = event?;
                if protocol::is_supported_scale(device.name.as_deref()) {
                    return Ok(Some(device));
                }
                trace!(device = %device.id, name = ?device.name, "Ignoring device");
            }
            Ok::<_, ScaleError>(None)
        })
        .await;

        // First match wins; nothing after it is considered
        self.adapter.stop_scan().await;

        match matched {
            Ok(Ok(Some(device))) => Ok(Some(device)),
            Ok(Ok(None)) => {
                info!("Scan ended without finding a scale");
                self.set_state(ScaleLinkState::TimedOut);
                Ok(None)
            }
            Err(_) => {
                info!("Scan timed out without finding a scale");
                self.set_state(ScaleLinkState::TimedOut);
                Ok(None)
            }
            Ok(Err(e)) => {
                error!("Scan failed: {}", e);
                self.set_state(ScaleLinkState::Error);
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        device: DiscoveredDevice,
        peripheral: Arc<dyn BlePeripheral>,
    ) -> Result<ScaleConnection, ScaleError> {
        peripheral.discover_services().await?;

        // Subscribe before configuring; early notifications share the decode path
        let notifications = peripheral.subscribe(SERVICE_UUID, RESULTS_CHAR_UUID).await?;
        let (readings_tx, readings) = mpsc::channel(READING_QUEUE_DEPTH);
        let decoder = tokio::spawn(decode_notifications(notifications, readings_tx));

        self.set_state(ScaleLinkState::Configuring);
        if let Err(e) = configure(peripheral.as_ref()).await {
            decoder.abort();
            return Err(e);
        }

        info!(device = %device.id, "Scale configured, awaiting measurements");
        Ok(ScaleConnection {
            device,
            peripheral,
            readings,
            decoder,
            state: self.state.clone(),
            closed: false,
        })
    }
}

/// Unit command, then time sync. Each write is acknowledged before the next.
async fn configure(peripheral: &dyn BlePeripheral) -> Result<(), ScaleError> {
    let unit = protocol::encode_command(&protocol::unit_command());
    peripheral
        .write_with_response(SERVICE_UUID, COMMAND_CHAR_UUID, &unit)
        .await?;
    debug!("Unit command acknowledged");

    let now = chrono::Utc::now().timestamp();
    let time_sync = protocol::encode_command(&protocol::time_sync_command(now));
    peripheral
        .write_with_response(SERVICE_UUID, COMMAND_CHAR_UUID, &time_sync)
        .await?;
    debug!("Time sync acknowledged");

    Ok(())
}

async fn decode_notifications(mut notifications: Notifications, readings: mpsc::Sender<ScaleReading>) {
    while let Some(value) = notifications.recv().await {
        let value = match value {
            Ok(value) => value,
            Err(e) => {
                warn!("Measurement notification error: {}", e);
                continue;
            }
        };

        let Some(kg) = protocol::decode_notification(&value) else {
            trace!(%value, "Dropping unstable or malformed frame");
            continue;
        };

        info!(kg, "Stable weight received");
        if readings.send(ScaleReading::now(kg)).await.is_err() {
            break;
        }
    }
    debug!("Measurement stream ended");
}

/// Live measurement stream from a configured scale.
///
/// Prefer `close`. Dropping an unclosed connection stops decoding and tears
/// the link down in the background. There is no automatic reconnect.
pub struct ScaleConnection {
    device: DiscoveredDevice,
    peripheral: Arc<dyn BlePeripheral>,
    readings: mpsc::Receiver<ScaleReading>,
    decoder: JoinHandle<()>,
    state: Arc<watch::Sender<ScaleLinkState>>,
    closed: bool,
}

impl ScaleConnection {
    pub fn device(&self) -> &DiscoveredDevice {
        &self.device
    }

    /// Next stable reading; `None` once the link is gone.
    pub async fn next_reading(&mut self) -> Option<ScaleReading> {
        self.readings.recv().await
    }

    pub async fn close(mut self) {
        self.decoder.abort();
        teardown(self.peripheral.as_ref()).await;
        self.state.send_replace(ScaleLinkState::Idle);
        self.closed = true;
        info!(device = %self.device.id, "Scale link closed");
    }
}

async fn teardown(peripheral: &dyn BlePeripheral) {
    peripheral.unsubscribe(SERVICE_UUID, RESULTS_CHAR_UUID).await;
    peripheral.disconnect().await;
}

impl Drop for ScaleConnection {
    fn drop(&mut self) {
        self.decoder.abort();
        if self.closed {
            return;
        }

        warn!(device = %self.device.id, "Scale connection dropped without close");
        self.state.send_replace(ScaleLinkState::Idle);
        let peripheral = self.peripheral.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { teardown(peripheral.as_ref()).await });
            }
            Err(_) => error!("No runtime to disconnect the dropped scale connection"),
        }
    }
}
