//! Authentication Module
//!
//! Owns the token pair: restores it at startup, refreshes the access token,
//! and clears everything on logout.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use crate::gateway::SessionHandle;
use crate::jwt;
use crate::storage::{StorageError, TokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use crate::sync::{ApiClient, ApiError};

/// In-memory session for one running client
#[derive(Debug, Clone, Default, Serialize)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub is_loading: bool,
    /// Last fetched profile, passed through untouched
    pub user: Option<serde_json::Value>,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Restoring,
    Unauthenticated,
    Authenticated,
    /// Authenticated with a refresh in flight
    Refreshing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Restored,
    LoggedIn,
    Refreshed,
    LoggedOut,
    /// The session could not be renewed; the user must log in again.
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// No refresh token held
    Skipped,
    Refreshed,
    /// Refresh failed and the session was logged out
    Expired,
}

const EVENT_CAPACITY: usize = 16;

pub struct SessionManager {
    storage: Arc<dyn TokenStore>,
    api: ApiClient,
    session: RwLock<Session>,
    refreshing: AtomicBool,
    /// Serializes refresh, login and logout
    refresh_lock: Mutex<()>,
    refresh_generation: AtomicU64,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    /// Starts in `Restoring`; call [`restore`](Self::restore) once at startup.
    pub fn new(storage: Arc<dyn TokenStore>, api: ApiClient) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            storage,
            api,
            session: RwLock::new(Session {
                is_loading: true,
                ..Session::default()
            }),
            refreshing: AtomicBool::new(false),
            refresh_lock: Mutex::new(()),
            refresh_generation: AtomicU64::new(0),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Read-only copy of the session
    pub fn snapshot(&self) -> Session {
        self.session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut Session)) {
        let mut session = self
            .session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut session);
    }

    pub fn access_token(&self) -> Option<String> {
        self.snapshot().access_token
    }

    pub fn is_authenticated(&self) -> bool {
        self.snapshot().is_authenticated()
    }

    pub fn state(&self) -> SessionState {
        let session = self.snapshot();
        if session.is_loading {
            SessionState::Restoring
        } else if !session.is_authenticated() {
            SessionState::Unauthenticated
        } else if self.refreshing.load(Ordering::SeqCst) {
            SessionState::Refreshing
        } else {
            SessionState::Authenticated
        }
    }

    pub fn set_user(&self, user: serde_json::Value) {
        self.update(|s| s.user = Some(user));
    }

    fn read_stored_tokens(&self) -> Result<(Option<String>, Option<String>), StorageError> {
        let access = self.storage.get(ACCESS_TOKEN_KEY)?;
        let refresh = self.storage.get(REFRESH_TOKEN_KEY)?;
        Ok((access, refresh))
    }

    /// Load persisted tokens and settle the session.
    ///
    /// An expired refresh token logs out; an expired or missing access token
    /// with a valid refresh token is refreshed before settling. Storage
    /// failures leave the session unauthenticated.
    pub async fn restore(&self) -> SessionState {
        debug!("Restoring session from secure storage");

        match self.read_stored_tokens() {
            Err(e) => {
                error!("Failed to read stored tokens: {}", e);
            }
            Ok((access, None)) => {
                info!("No stored session found");
                if access.is_some() {
                    // An access token is useless without its refresh token
                    if let Err(e) = self.storage.delete(ACCESS_TOKEN_KEY) {
                        warn!("Failed to delete orphaned access token: {}", e);
                    }
                }
            }
            Ok((_, Some(refresh))) if jwt::is_expired(&refresh) => {
                info!("Stored refresh token is expired");
                self.logout().await;
            }
            Ok((access, Some(refresh))) => {
                let access = access.filter(|token| !jwt::is_expired(token));
                let needs_refresh = access.is_none();
                self.update(|s| {
                    s.access_token = access;
                    s.refresh_token = Some(refresh);
                });

                if needs_refresh {
                    info!("Stored access token is expired, refreshing");
                    self.refresh_locked(false).await;
                } else {
                    info!("Stored session restored");
                }
            }
        }

        self.update(|s| s.is_loading = false);
        self.emit(SessionEvent::Restored);
        self.state()
    }

    /// Persist both tokens, then adopt them.
    ///
    /// If either write fails the slots are restored to their prior contents
    /// and the in-memory session is left untouched. Waits for any refresh in
    /// flight so its result cannot overwrite the new pair.
    pub async fn login(&self, access_token: &str, refresh_token: &str) -> Result<(), AuthError> {
        let _guard = self.refresh_lock.lock().await;

        let previous = match self.read_stored_tokens() {
            Ok(previous) => Some(previous),
            Err(e) => {
                warn!("Failed to read stored tokens before login: {}", e);
                None
            }
        };

        if let Err(e) = self.persist_pair(access_token, refresh_token) {
            error!("Failed to persist tokens, login aborted: {}", e);
            match previous {
                Some((previous_access, previous_refresh)) => {
                    self.rollback(ACCESS_TOKEN_KEY, previous_access.as_deref());
                    self.rollback(REFRESH_TOKEN_KEY, previous_refresh.as_deref());
                }
                None => warn!("Prior token slots unknown, skipping rollback"),
            }
            return Err(e.into());
        }

        self.update(|s| {
            s.access_token = Some(access_token.to_string());
            s.refresh_token = Some(refresh_token.to_string());
            s.user = None;
            s.is_loading = false;
        });

        info!("Logged in");
        self.emit(SessionEvent::LoggedIn);
        Ok(())
    }

    fn persist_pair(&self, access_token: &str, refresh_token: &str) -> Result<(), StorageError> {
        self.storage.set(ACCESS_TOKEN_KEY, access_token)?;
        self.storage.set(REFRESH_TOKEN_KEY, refresh_token)
    }

    fn rollback(&self, key: &str, previous: Option<&str>) {
        let result = match previous {
            Some(value) => self.storage.set(key, value),
            None => self.storage.delete(key),
        };
        if let Err(e) = result {
            warn!("Failed to roll back {}: {}", key, e);
        }
    }

    /// Credential login against the API, then [`login`](Self::login).
    pub async fn login_with_password(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let tokens = self.api.login(email, password).await?;
        self.login(&tokens.access_token, &tokens.refresh_token).await
    }

    /// Clear persisted and in-memory tokens. Never fails; safe from any state.
    ///
    /// A refresh in flight finishes first, so nothing it adopts survives.
    pub async fn logout(&self) {
        let _guard = self.refresh_lock.lock().await;
        self.clear_session();
    }

    fn clear_session(&self) {
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            if let Err(e) = self.storage.delete(key) {
                warn!("Failed to delete {}: {}", key, e);
            }
        }

        self.update(|s| {
            s.access_token = None;
            s.refresh_token = None;
            s.user = None;
        });

        info!("Session cleared");
        self.emit(SessionEvent::LoggedOut);
    }

    /// Trade the refresh token for a new access token.
    ///
    /// Concurrent callers share one in-flight refresh. Any failure logs out
    /// and emits [`SessionEvent::Expired`].
    pub async fn refresh_access_token(&self) -> RefreshOutcome {
        self.refresh_locked(true).await
    }

    async fn refresh_locked(&self, join_in_flight: bool) -> RefreshOutcome {
        let observed = self.refresh_generation.load(Ordering::SeqCst);
        let _guard = self.refresh_lock.lock().await;

        if join_in_flight && self.refresh_generation.load(Ordering::SeqCst) != observed {
            debug!("Joined a refresh that completed while waiting");
            return if self.is_authenticated() {
                RefreshOutcome::Refreshed
            } else {
                RefreshOutcome::Expired
            };
        }

        let Some(refresh_token) = self.snapshot().refresh_token else {
            debug!("No refresh token held, skipping refresh");
            return RefreshOutcome::Skipped;
        };

        let _refreshing = RefreshingFlag::raise(&self.refreshing);
        let outcome = match self.api.refresh(&refresh_token).await {
            Ok(response) => {
                if let Err(e) = self.storage.set(ACCESS_TOKEN_KEY, &response.access_token) {
                    // Still usable for this run; the next restore refreshes again
                    warn!("Failed to persist refreshed access token: {}", e);
                }
                self.update(|s| s.access_token = Some(response.access_token));
                info!("Access token refreshed");
                self.emit(SessionEvent::Refreshed);
                RefreshOutcome::Refreshed
            }
            Err(e) => {
                warn!("Token refresh failed: {}", e);
                self.clear_session();
                self.emit(SessionEvent::Expired);
                RefreshOutcome::Expired
            }
        };
        self.refresh_generation.fetch_add(1, Ordering::SeqCst);

        outcome
    }
}

/// Holds `refreshing` high until dropped, including when the refresh future
/// is cancelled mid-request.
struct RefreshingFlag<'a>(&'a AtomicBool);

impl<'a> RefreshingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RefreshingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionHandle for SessionManager {
    fn access_token(&self) -> Option<String> {
        SessionManager::access_token(self)
    }

    async fn refresh_access_token(&self) {
        SessionManager::refresh_access_token(self).await;
    }

    async fn logout(&self) {
        SessionManager::logout(self).await;
    }
}

/// Authentication errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),
}
