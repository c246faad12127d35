//! Auth session manager.
//!
//! Owns the access token. The API client only sees it through a
//! `watch::Receiver`, so there is exactly one writer. While logged in, a
//! background task refreshes the token shortly before it expires; a failed
//! refresh ends the session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::api::ApiClient;
use crate::config::ClientConfig;
use crate::errors::{ClientError, ClientResult, ErrorCategory};
use crate::events::{ClientEvent, Disposition, NotificationHub, Subscription};
use crate::models::{IssuedTokens, RegistrationForm, UserProfile};
use crate::storage::{next_origin, SessionStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY};

mod token;

const MIN_PASSWORD_LEN: usize = 8;

/// Observable phase of the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    LoggedOut,
    LoggingIn,
    LoggedIn {
        user: Option<UserProfile>,
        expires_at: DateTime<Utc>,
    },
    Refreshing {
        user: Option<UserProfile>,
        expires_at: DateTime<Utc>,
    },
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::LoggedIn { .. } | SessionState::Refreshing { .. })
    }

    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            SessionState::LoggedIn { user, .. } | SessionState::Refreshing { user, .. } => user.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    access_token: String,
    refresh_token: Option<String>,
    user: Option<UserProfile>,
    expires_at: DateTime<Utc>,
    /// Whether the refresh token is written to the store
    persist: bool,
}

struct Inner {
    api: ApiClient,
    store: Arc<dyn SessionStore>,
    token_tx: watch::Sender<Option<String>>,
    state_tx: watch::Sender<SessionState>,
    session: Mutex<Option<Session>>,
    refresh_task: Mutex<Option<(u64, JoinHandle<()>)>>,
    next_task_id: AtomicU64,
    origin: u64,
    token_lifetime: Duration,
    refresh_lead: Duration,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &*self.inner.state_tx.borrow())
            .field("origin", &self.inner.origin)
            .finish()
    }
}

impl SessionManager {
    /// `token_tx` must be the sender paired with the receiver the API client was built with.
    pub fn new(
        config: &ClientConfig,
        api: ApiClient,
        token_tx: watch::Sender<Option<String>>,
        store: Arc<dyn SessionStore>,
        hub: &NotificationHub,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::LoggedOut);
        let inner = Arc::new(Inner {
            api,
            store,
            token_tx,
            state_tx,
            session: Mutex::new(None),
            refresh_task: Mutex::new(None),
            next_task_id: AtomicU64::new(1),
            origin: next_origin(),
            token_lifetime: config.token_lifetime(),
            refresh_lead: config.refresh_lead(),
            subscriptions: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&inner);
        let subscription = hub.subscribe(move |event| {
            if let Some(inner) = weak.upgrade() {
                Inner::on_event(&inner, event);
            }
            Disposition::Continue
        });
        if let Ok(mut subs) = inner.subscriptions.lock() {
            subs.push(subscription);
        }

        Self { inner }
    }

    pub fn state(&self) -> SessionState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state_tx.borrow().is_authenticated()
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.inner.state_tx.borrow().user().cloned()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.token_tx.borrow().clone()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.inner
            .session
            .lock()
            .ok()
            .and_then(|s| s.as_ref().map(|s| s.expires_at))
    }

    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    /// Logs in. The access token is always cached; the refresh token is only
    /// written to the store when `persist` is set.
    #[instrument(skip(self, password))]
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        persist: bool,
    ) -> ClientResult<Option<UserProfile>> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(ClientError::validation("Email and password are required"));
        }

        self.inner.clear_local(true, "new login");
        self.inner.state_tx.send_replace(SessionState::LoggingIn);

        let tokens = match self.inner.api.login(email, password, persist).await {
            Ok(tokens) => tokens,
            Err(err) => {
                warn!("login failed: {}", err);
                self.inner.state_tx.send_replace(SessionState::LoggedOut);
                return Err(err);
            }
        };

        // Token is needed in the channel before the profile lookup
        self.inner.token_tx.send_replace(Some(tokens.access_token.clone()));
        let user = match tokens.user.clone() {
            Some(user) => Some(user),
            None => match self.inner.api.current_user().await {
                Ok(user) => Some(user),
                Err(err) => {
                    warn!("could not load profile after login: {}", err);
                    None
                }
            },
        };

        self.inner.establish(tokens, user.clone(), persist)?;
        info!(email = %email.trim(), "logged in");
        Ok(user)
    }

    /// Validates the form locally, then creates the account. Does not log in.
    #[instrument(skip(self, form), fields(email = %form.email))]
    pub async fn register(&self, form: &RegistrationForm) -> ClientResult<Value> {
        form.check().map_err(ClientError::Validation)?;
        self.inner.api.register(form).await
    }

    /// Resumes a cached session.
    ///
    /// Returns `Ok(false)` when there is nothing to resume or the cached
    /// tokens were rejected. Transport failures are returned as errors and
    /// leave the cache untouched.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> ClientResult<bool> {
        let store = &self.inner.store;
        let Some(access_token) = store.get(ACCESS_TOKEN_KEY) else {
            return Ok(false);
        };
        // Read before calling out: a 401 clears the store
        let refresh_token = store.get(REFRESH_TOKEN_KEY);

        self.inner.token_tx.send_replace(Some(access_token.clone()));
        match self.inner.api.current_user().await {
            Ok(user) => {
                let tokens = IssuedTokens {
                    access_token,
                    refresh_token: refresh_token.clone(),
                    user: None,
                };
                self.inner.establish(tokens, Some(user), refresh_token.is_some())?;
                info!("session restored");
                Ok(true)
            }
            Err(err) if err.category() == ErrorCategory::Network && err.status_code().is_none() => {
                self.inner.token_tx.send_replace(None);
                Err(err)
            }
            Err(err) => {
                debug!("cached token rejected: {}", err);
                match refresh_token {
                    Some(refresh_token) => {
                        self.inner.install_refresh_token(refresh_token);
                        Ok(self.refresh().await.is_ok())
                    }
                    None => {
                        self.inner.clear_local(true, "cached token rejected");
                        Ok(false)
                    }
                }
            }
        }
    }

    /// Exchanges the refresh token for a new access token.
    /// Any failure ends the session.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> ClientResult<()> {
        Inner::refresh(&self.inner).await
    }

    /// Revokes server-side when possible, then always clears local state.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        if self.inner.token_tx.borrow().is_some() {
            if let Err(err) = self.inner.api.logout().await {
                warn!("server-side logout failed, clearing local session anyway: {}", err);
            }
        }
        self.inner.clear_local(true, "logout");
        info!("logged out");
    }

    #[instrument(skip(self))]
    pub async fn request_password_reset(&self, email: &str) -> ClientResult<Option<String>> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(ClientError::validation("A valid email address is required"));
        }
        self.inner.api.forgot_password(email).await
    }

    #[instrument(skip(self, otp, new_password, confirmation))]
    pub async fn reset_password(
        &self,
        email: &str,
        otp: &str,
        new_password: &str,
        confirmation: &str,
    ) -> ClientResult<Option<String>> {
        if email.trim().is_empty() || otp.trim().is_empty() || new_password.is_empty() || confirmation.is_empty() {
            return Err(ClientError::validation("All fields are required"));
        }
        if new_password != confirmation {
            return Err(ClientError::validation("Passwords do not match"));
        }
        if new_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ClientError::validation("Password must be at least 8 characters"));
        }
        self.inner.api.reset_password(email, otp, new_password).await
    }
}

impl Inner {
    fn on_event(inner: &Arc<Inner>, event: &ClientEvent) {
        match event {
            ClientEvent::Unauthorized { path } => {
                if inner.token_tx.borrow().is_some() {
                    warn!(path = %path, "backend rejected the access token; ending session");
                    inner.clear_local(true, "unauthorized");
                }
            }
            ClientEvent::StorageChanged { key, value: None, origin }
                if key == ACCESS_TOKEN_KEY && *origin != inner.origin =>
            {
                if inner.token_tx.borrow().is_some() {
                    info!(origin, "access token removed by another session; logging out here too");
                    inner.clear_local(false, "removed elsewhere");
                }
            }
            _ => {}
        }
    }

    fn lock_session(&self) -> ClientResult<std::sync::MutexGuard<'_, Option<Session>>> {
        self.session
            .lock()
            .map_err(|_| ClientError::Internal("session lock poisoned".into()))
    }

    /// Stores tokens, publishes the new state and arms the refresh timer.
    fn establish(
        self: &Arc<Self>,
        tokens: IssuedTokens,
        user: Option<UserProfile>,
        persist: bool,
    ) -> ClientResult<()> {
        let expires_at = token::expiry_or_default(&tokens.access_token, Utc::now(), self.token_lifetime);

        self.store.set(ACCESS_TOKEN_KEY, &tokens.access_token, self.origin)?;
        match (&tokens.refresh_token, persist) {
            (Some(refresh), true) => self.store.set(REFRESH_TOKEN_KEY, refresh, self.origin)?,
            _ => self.store.remove(REFRESH_TOKEN_KEY, self.origin)?,
        }
        if let Some(user) = &user {
            self.store.set(USER_KEY, &serde_json::to_string(user)?, self.origin)?;
        }

        *self.lock_session()? = Some(Session {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token,
            user: user.clone(),
            expires_at,
            persist,
        });
        self.token_tx.send_replace(Some(tokens.access_token));
        self.state_tx
            .send_replace(SessionState::LoggedIn { user, expires_at });
        self.schedule_refresh(expires_at);
        Ok(())
    }

    /// Seeds a session that only has a refresh token, ahead of `refresh`.
    fn install_refresh_token(&self, refresh_token: String) {
        if let Ok(mut session) = self.session.lock() {
            *session = Some(Session {
                access_token: String::new(),
                refresh_token: Some(refresh_token),
                user: None,
                expires_at: Utc::now(),
                persist: true,
            });
        }
    }

    fn schedule_refresh(self: &Arc<Self>, expires_at: DateTime<Utc>) {
        let delay = token::refresh_delay(expires_at, Utc::now(), self.refresh_lead);
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let weak: Weak<Inner> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // Detach our own handle so the refresh below is never aborted mid-flight
            let current = match inner.refresh_task.lock() {
                Ok(mut slot) if slot.as_ref().map(|(slot_id, _)| *slot_id) == Some(id) => {
                    slot.take();
                    true
                }
                _ => false,
            };
            if current {
                debug!("scheduled token refresh firing");
                let _ = Inner::refresh(&inner).await;
            }
        });

        debug!(delay_secs = delay.as_secs(), "token refresh scheduled");
        if let Ok(mut slot) = self.refresh_task.lock() {
            if let Some((_, previous)) = slot.replace((id, handle)) {
                previous.abort();
            }
        }
    }

    fn cancel_refresh(&self) {
        if let Ok(mut slot) = self.refresh_task.lock() {
            if let Some((_, handle)) = slot.take() {
                handle.abort();
            }
        }
    }

    async fn refresh(inner: &Arc<Inner>) -> ClientResult<()> {
        let current = inner.lock_session()?.clone();
        let Some(current) = current else {
            return Err(ClientError::SessionExpired("No active session".into()));
        };
        let refresh_token = current
            .refresh_token
            .clone()
            .or_else(|| inner.store.get(REFRESH_TOKEN_KEY));
        let Some(refresh_token) = refresh_token else {
            inner.clear_local(true, "no refresh token");
            return Err(ClientError::SessionExpired("No refresh token available".into()));
        };

        inner.state_tx.send_replace(SessionState::Refreshing {
            user: current.user.clone(),
            expires_at: current.expires_at,
        });

        match inner.api.refresh_token(&refresh_token).await {
            Ok(mut tokens) => {
                tokens.refresh_token = tokens.refresh_token.or(Some(refresh_token));
                let user = tokens.user.take().or(current.user);
                inner.establish(tokens, user, current.persist)?;
                info!("access token refreshed");
                Ok(())
            }
            Err(err) => {
                warn!("token refresh failed, logging out: {}", err);
                inner.clear_local(true, "refresh failed");
                Err(ClientError::SessionExpired(err.user_message()))
            }
        }
    }

    /// Drops every trace of the session locally. Never blocks on the network.
    fn clear_local(&self, touch_store: bool, reason: &str) {
        self.cancel_refresh();
        let had_session = self
            .session
            .lock()
            .map(|mut s| s.take().is_some())
            .unwrap_or(false);
        self.token_tx.send_replace(None);

        if touch_store {
            for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY] {
                if let Err(err) = self.store.remove(key, self.origin) {
                    warn!(key, "failed to clear session cache: {}", err);
                }
            }
        }
        self.state_tx.send_replace(SessionState::LoggedOut);
        if had_session {
            debug!(reason, "local session cleared");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel_refresh();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use assert_matches::assert_matches;

    fn manager() -> (SessionManager, Arc<MemoryStore>, NotificationHub) {
        let hub = NotificationHub::new();
        let store = Arc::new(MemoryStore::new(hub.clone()));
        let (tx, rx) = watch::channel(None);
        let config = ClientConfig::new("http://127.0.0.1:9");
        let shared: Arc<dyn SessionStore> = store.clone();
        let api = ApiClient::new(&config, rx, hub.clone(), Some(shared)).unwrap();
        let manager = SessionManager::new(&config, api, tx, store.clone(), &hub);
        (manager, store, hub)
    }

    fn seed(manager: &SessionManager, token: &str) {
        manager
            .inner
            .establish(
                IssuedTokens {
                    access_token: token.into(),
                    refresh_token: Some("r".into()),
                    user: None,
                },
                None,
                true,
            )
            .unwrap();
    }

    #[tokio::test]
    async fn login_requires_credentials() {
        let (manager, _, _) = manager();
        assert_matches!(manager.login("", "secret", false).await, Err(ClientError::Validation(_)));
        assert_matches!(manager.login("a@b.c", "", false).await, Err(ClientError::Validation(_)));
        assert_eq!(manager.state(), SessionState::LoggedOut);
    }

    #[tokio::test]
    async fn reset_password_validation_order() {
        let (manager, _, _) = manager();
        assert_matches!(
            manager.reset_password("a@b.c", "", "longpassword", "longpassword").await,
            Err(ClientError::Validation(msg)) if msg == "All fields are required"
        );
        assert_matches!(
            manager.reset_password("a@b.c", "123456", "longpassword", "different1").await,
            Err(ClientError::Validation(msg)) if msg == "Passwords do not match"
        );
        assert_matches!(
            manager.reset_password("a@b.c", "123456", "short", "short").await,
            Err(ClientError::Validation(msg)) if msg.contains("at least 8")
        );
    }

    #[tokio::test]
    async fn register_mismatch_never_reaches_network() {
        let (manager, _, _) = manager();
        let form = RegistrationForm {
            full_name: "Ada".into(),
            email: "ada@example.com".into(),
            company_name: "Acme".into(),
            password: "password123".into(),
            confirm_password: "password124".into(),
        };
        assert_matches!(
            manager.register(&form).await,
            Err(ClientError::Validation(msg)) if msg == "Passwords do not match"
        );
    }

    #[tokio::test]
    async fn unauthorized_event_clears_session() {
        let (manager, store, hub) = manager();
        seed(&manager, "tok");
        assert!(manager.is_authenticated());
        assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("tok"));

        hub.publish(ClientEvent::Unauthorized { path: "/auth/me".into() });

        assert_eq!(manager.state(), SessionState::LoggedOut);
        assert_eq!(manager.access_token(), None);
        assert_eq!(store.get(ACCESS_TOKEN_KEY), None);
        assert_eq!(store.get(REFRESH_TOKEN_KEY), None);
    }

    #[tokio::test]
    async fn removal_by_other_session_logs_out_here() {
        let (manager, store, _) = manager();
        seed(&manager, "tok");

        let other_origin = next_origin();
        store.remove(ACCESS_TOKEN_KEY, other_origin).unwrap();

        assert!(!manager.is_authenticated());
        assert_eq!(manager.access_token(), None);
    }

    #[tokio::test]
    async fn own_writes_do_not_trigger_logout() {
        let (manager, _, _) = manager();
        seed(&manager, "first");
        seed(&manager, "second");
        assert!(manager.is_authenticated());
        assert_eq!(manager.access_token().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn refresh_without_session_fails() {
        let (manager, _, _) = manager();
        assert_matches!(manager.refresh().await, Err(ClientError::SessionExpired(_)));
    }
}
