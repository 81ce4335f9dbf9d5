use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use dww_companion::auth::SessionManager;
use dww_companion::scale::{
    BleAdapter, BlePeripheral, DiscoveredDevice, Notifications, Permission, PermissionProvider,
    PermissionStatus, ScaleError, ScanEvents,
};
use dww_companion::storage::{MemoryStorage, StorageError, TokenStore};
use dww_companion::sync::ApiClient;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

static TOKEN_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Unsigned token whose `exp` is `secs` from now. Every call yields a
/// distinct token.
#[allow(dead_code)]
pub fn token_expiring_in(secs: i64) -> String {
    let exp = chrono::Utc::now().timestamp() + secs;
    let jti = TOKEN_SEQ.fetch_add(1, Ordering::SeqCst);
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp},"jti":{jti}}}"#));
    format!("{header}.{payload}.sig")
}

#[allow(dead_code)]
pub fn valid_token() -> String {
    token_expiring_in(3600)
}

#[allow(dead_code)]
pub fn expired_token() -> String {
    token_expiring_in(-3600)
}

#[allow(dead_code)]
pub fn api_client(base_url: &str) -> ApiClient {
    ApiClient::new(base_url, Duration::from_secs(5)).unwrap()
}

#[allow(dead_code)]
pub fn session_manager(base_url: &str, storage: Arc<dyn TokenStore>) -> Arc<SessionManager> {
    Arc::new(SessionManager::new(storage, api_client(base_url)))
}

/// Memory storage that can be told to fail reads or writes of one slot.
#[allow(dead_code)]
#[derive(Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    fail_get: bool,
    fail_set: Option<&'static str>,
}

#[allow(dead_code)]
impl FlakyStorage {
    pub fn failing_reads() -> Self {
        Self {
            fail_get: true,
            ..Self::default()
        }
    }

    pub fn failing_writes_to(key: &'static str) -> Self {
        Self {
            fail_set: Some(key),
            ..Self::default()
        }
    }

    pub fn and_failing_writes_to(mut self, key: &'static str) -> Self {
        self.fail_set = Some(key);
        self
    }

    /// Seed a slot, bypassing the injected failures.
    pub fn with_slot(self, key: &str, value: &str) -> Self {
        self.inner.set(key, value).unwrap();
        self
    }

    /// Read a slot, bypassing the injected failures.
    pub fn slot(&self, key: &str) -> Option<String> {
        self.inner.get(key).unwrap()
    }
}

impl TokenStore for FlakyStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        if self.fail_get {
            return Err(StorageError::Io("read failed".into()));
        }
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.fail_set == Some(key) {
            return Err(StorageError::Io("disk full".into()));
        }
        self.inner.set(key, value)
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.delete(key)
    }
}

#[allow(dead_code)]
pub fn device(id: &str, name: Option<&str>) -> DiscoveredDevice {
    DiscoveredDevice {
        id: id.to_string(),
        name: name.map(str::to_string),
    }
}

#[allow(dead_code)]
pub fn encode(frame: &[u8]) -> String {
    STANDARD.encode(frame)
}

#[allow(dead_code)]
pub fn decode(value: &str) -> Vec<u8> {
    STANDARD.decode(value).unwrap()
}

/// Scripted peripheral recording every call in order.
#[allow(dead_code)]
#[derive(Default)]
pub struct MockPeripheral {
    pub calls: Mutex<Vec<String>>,
    pub writes: Mutex<Vec<(String, String, String)>>,
    notifier: Mutex<Option<mpsc::Sender<Result<String, ScaleError>>>>,
    early_notifications: Vec<String>,
    fail_discover: bool,
    fail_write: bool,
}

#[allow(dead_code)]
impl MockPeripheral {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications delivered as soon as the subscription exists
    pub fn with_early_notifications(frames: &[&[u8]]) -> Self {
        Self {
            early_notifications: frames.iter().map(|f| encode(f)).collect(),
            ..Self::default()
        }
    }

    pub fn failing_discovery() -> Self {
        Self {
            fail_discover: true,
            ..Self::default()
        }
    }

    pub fn failing_writes() -> Self {
        Self {
            fail_write: true,
            ..Self::default()
        }
    }

    pub async fn notify(&self, frame: &[u8]) {
        self.notify_raw(Ok(encode(frame))).await;
    }

    pub async fn notify_raw(&self, value: Result<String, ScaleError>) {
        let sender = self.notifier.lock().unwrap().clone();
        sender.expect("not subscribed").send(value).await.unwrap();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<(String, String, String)> {
        self.writes.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl BlePeripheral for MockPeripheral {
    async fn discover_services(&self) -> Result<(), ScaleError> {
        self.record("discover");
        if self.fail_discover {
            return Err(ScaleError::Discovery("gatt error".into()));
        }
        Ok(())
    }

    async fn subscribe(&self, service: &str, characteristic: &str) -> Result<Notifications, ScaleError> {
        self.record(&format!("subscribe {service} {characteristic}"));
        let (tx, rx) = mpsc::channel(32);
        for value in &self.early_notifications {
            tx.try_send(Ok(value.clone())).unwrap();
        }
        *self.notifier.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn write_with_response(
        &self,
        service: &str,
        characteristic: &str,
        value: &str,
    ) -> Result<(), ScaleError> {
        self.record("write");
        if self.fail_write {
            return Err(ScaleError::Write("not acknowledged".into()));
        }
        self.writes
            .lock()
            .unwrap()
            .push((service.to_string(), characteristic.to_string(), value.to_string()));
        Ok(())
    }

    async fn unsubscribe(&self, _service: &str, _characteristic: &str) {
        self.record("unsubscribe");
        self.notifier.lock().unwrap().take();
    }

    async fn disconnect(&self) {
        self.record("disconnect");
    }
}

/// Scripted adapter: a scan replays `events`, then stays open unless
/// `close_after_events` is set.
#[allow(dead_code)]
pub struct MockAdapter {
    events: Vec<Result<DiscoveredDevice, ScaleError>>,
    close_after_events: bool,
    open_scans: Mutex<Vec<mpsc::Sender<Result<DiscoveredDevice, ScaleError>>>>,
    pub peripheral: Arc<MockPeripheral>,
    pub scans_started: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pub connected: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl MockAdapter {
    pub fn new(events: Vec<Result<DiscoveredDevice, ScaleError>>, peripheral: MockPeripheral) -> Self {
        Self {
            events,
            close_after_events: false,
            open_scans: Mutex::new(Vec::new()),
            peripheral: Arc::new(peripheral),
            scans_started: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            connected: Mutex::new(Vec::new()),
        }
    }

    pub fn closing_after_events(mut self) -> Self {
        self.close_after_events = true;
        self
    }

    pub fn scans_started(&self) -> usize {
        self.scans_started.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn connected(&self) -> Vec<String> {
        self.connected.lock().unwrap().clone()
    }
}

#[async_trait]
impl BleAdapter for MockAdapter {
    async fn start_scan(&self) -> Result<ScanEvents, ScaleError> {
        self.scans_started.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(32);
        for event in &self.events {
            tx.try_send(event.clone()).unwrap();
        }
        if !self.close_after_events {
            self.open_scans.lock().unwrap().push(tx);
        }
        Ok(rx)
    }

    async fn stop_scan(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.open_scans.lock().unwrap().clear();
    }

    async fn connect(&self, device: &DiscoveredDevice) -> Result<Arc<dyn BlePeripheral>, ScaleError> {
        self.connected.lock().unwrap().push(device.id.clone());
        Ok(self.peripheral.clone())
    }
}

/// Permission provider with fixed answers, logging each call.
#[allow(dead_code)]
#[derive(Default)]
pub struct MockPermissions {
    checks: HashMap<Permission, PermissionStatus>,
    requests: HashMap<Permission, PermissionStatus>,
    pub log: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl MockPermissions {
    pub fn granted() -> Self {
        Self::default()
    }

    /// Not yet granted; the prompt answers `answer`.
    pub fn prompt(mut self, permission: Permission, answer: PermissionStatus) -> Self {
        self.checks.insert(permission, PermissionStatus::Denied);
        self.requests.insert(permission, answer);
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl PermissionProvider for MockPermissions {
    async fn check(&self, permission: Permission) -> PermissionStatus {
        self.log.lock().unwrap().push(format!("check {permission}"));
        self.checks
            .get(&permission)
            .copied()
            .unwrap_or(PermissionStatus::Granted)
    }

    async fn request(&self, permission: Permission) -> PermissionStatus {
        self.log.lock().unwrap().push(format!("request {permission}"));
        self.requests
            .get(&permission)
            .copied()
            .unwrap_or(PermissionStatus::Granted)
    }
}
