//! ForecastAI client library
//!
//! Client layer for the ForecastAI sales forecasting backend: authenticated
//! HTTP access, session lifecycle, normalization of loosely shaped forecast
//! payloads, dashboard view state and CSV exports.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod api;
pub mod config;
pub mod dashboard;
pub mod dataset;
pub mod debounce;
pub mod errors;
pub mod events;
pub mod export;
pub mod models;
pub mod normalize;
pub mod session;
pub mod storage;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

pub use api::{ApiClient, ForecastBackend, UploadRequest};
pub use config::{init_tracing, load_config, ClientConfig};
pub use dashboard::{DashboardSnapshot, DashboardState, FilterOutcome};
pub use dataset::UploadedDataset;
pub use errors::{ClientError, ClientResult};
pub use events::{ClientEvent, Disposition, NotificationHub, Subscription};
pub use session::{SessionManager, SessionState};
pub use storage::{FileStore, MemoryStore, SessionStore};

/// Wires the hub, session store, API client and session manager together.
///
/// The session manager holds the only token sender; every clone of the API
/// client sees the current token through the paired receiver.
#[derive(Clone)]
pub struct ForecastClient {
    config: ClientConfig,
    hub: NotificationHub,
    store: Arc<dyn SessionStore>,
    api: ApiClient,
    session: Arc<SessionManager>,
}

impl std::fmt::Debug for ForecastClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForecastClient")
            .field("api", &self.api)
            .field("session", &self.session)
            .finish()
    }
}

impl ForecastClient {
    /// Uses a [`FileStore`] when `session_file` is configured, memory otherwise.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let hub = NotificationHub::new();
        let store: Arc<dyn SessionStore> = match &config.session_file {
            Some(path) => Arc::new(FileStore::new(path.clone(), hub.clone())),
            None => Arc::new(MemoryStore::new(hub.clone())),
        };
        Self::with_store(config, hub, store)
    }

    /// `store` must publish its changes on `hub`.
    pub fn with_store(
        config: ClientConfig,
        hub: NotificationHub,
        store: Arc<dyn SessionStore>,
    ) -> ClientResult<Self> {
        let (token_tx, token_rx) = watch::channel(None);
        let api = ApiClient::new(&config, token_rx, hub.clone(), Some(store.clone()))?;
        let session = SessionManager::new(&config, api.clone(), token_tx, store.clone(), &hub);
        info!(base_url = %api.base_url(), "forecast client ready");

        Ok(Self {
            config,
            hub,
            store,
            api,
            session: Arc::new(session),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// A fresh dashboard backed by this client's API connection.
    ///
    /// Dashboards are independent views; each one shows the paywall when the
    /// trial expires, whichever request triggered it.
    pub fn dashboard(&self) -> DashboardState {
        DashboardState::new(Arc::new(self.api.clone()), &self.config, &self.hub)
    }
}
