//! Dashboard view state.
//!
//! The dashboard is the only writer of the normalized snapshot. Every request
//! takes a generation number and its response is applied only if no newer
//! request has been dispatched since, so a slow response can never overwrite a
//! fresher one. Collections are swapped as one `Arc<ForecastBundle>`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::api::{ForecastBackend, UploadRequest};
use crate::config::ClientConfig;
use crate::dataset::{filter_historical, UploadedDataset};
use crate::debounce::Debouncer;
use crate::errors::{ClientError, ClientResult};
use crate::events::{ClientEvent, Disposition, NotificationHub, Subscription};
use crate::models::{DateRange, ForecastBundle, HistoricalRecord, TrialNotice};
use crate::normalize::normalize_bundle;

mod series;

pub use series::{forecast_series, historical_series, ChartPoint};

/// Identity of a filter selection, `"{from}-{to}-{store}"`.
pub fn filter_key(range: &DateRange, store: &str) -> String {
    format!("{}-{}-{}", range.from, range.to, store)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Info,
    Success,
    Error,
}

/// Banner shown to the user; dismissed automatically after a few seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusMessage {
    pub id: u64,
    pub kind: StatusKind,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterState {
    pub store: String,
    pub range: Option<DateRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    /// A request will be sent once edits settle
    Scheduled,
    /// Same as the applied or pending selection; nothing to do
    Unchanged,
}

/// Read-only copy of the view state for rendering.
#[derive(Debug, Clone)]
pub struct DashboardSnapshot {
    pub filter: FilterState,
    pub loading: bool,
    pub paywall: Option<TrialNotice>,
    pub status: Option<StatusMessage>,
    pub render_key: u64,
    pub last_filter_key: Option<String>,
    pub dataset_name: Option<String>,
    pub bundle: Arc<ForecastBundle>,
}

struct ViewState {
    filter: FilterState,
    /// Filter that produced the current bundle
    committed_filter: FilterState,
    dataset: Option<Arc<UploadedDataset>>,
    history: Arc<Vec<HistoricalRecord>>,
    in_flight: usize,
    /// An upload or sample request is outstanding
    replacing_dataset: bool,
    last_filter_key: Option<String>,
    pending_filter_key: Option<String>,
    paywall: Option<TrialNotice>,
    status: Option<StatusMessage>,
    render_key: u64,
    bundle: Arc<ForecastBundle>,
}

enum Dispatch {
    Upload {
        dataset: Arc<UploadedDataset>,
        history: Arc<Vec<HistoricalRecord>>,
        range: DateRange,
    },
    Sample,
    Filter {
        range: DateRange,
        store: String,
        key: String,
    },
}

impl Dispatch {
    fn label(&self) -> &'static str {
        match self {
            Dispatch::Upload { .. } => "upload",
            Dispatch::Sample => "sample",
            Dispatch::Filter { .. } => "filter",
        }
    }

    fn replaces_dataset(&self) -> bool {
        !matches!(self, Dispatch::Filter { .. })
    }
}

struct Inner {
    backend: Arc<dyn ForecastBackend>,
    view: Mutex<ViewState>,
    debouncer: Debouncer,
    generation: AtomicU64,
    next_status_id: AtomicU64,
    status_dismiss: Duration,
    revision: watch::Sender<u64>,
    subscription: Mutex<Option<Subscription>>,
}

#[derive(Clone)]
pub struct DashboardState {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DashboardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardState")
            .field("generation", &self.inner.generation.load(Ordering::SeqCst))
            .finish()
    }
}

impl DashboardState {
    /// Mounts the dashboard: subscribes to trial-expired notifications until dropped.
    ///
    /// Each dashboard shows the paywall and lets the notification continue, so
    /// any number of dashboards can share one hub.
    pub fn new(backend: Arc<dyn ForecastBackend>, config: &ClientConfig, hub: &NotificationHub) -> Self {
        let filter = FilterState {
            store: config.default_store.clone(),
            range: None,
        };
        let (revision, _) = watch::channel(0);
        let inner = Arc::new(Inner {
            backend,
            view: Mutex::new(ViewState {
                filter: filter.clone(),
                committed_filter: filter,
                dataset: None,
                history: Arc::new(Vec::new()),
                in_flight: 0,
                replacing_dataset: false,
                last_filter_key: None,
                pending_filter_key: None,
                paywall: None,
                status: None,
                render_key: 0,
                bundle: Arc::new(ForecastBundle::default()),
            }),
            debouncer: Debouncer::new(config.filter_debounce()),
            generation: AtomicU64::new(0),
            next_status_id: AtomicU64::new(1),
            status_dismiss: config.status_dismiss(),
            revision,
            subscription: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let subscription = hub.subscribe(move |event| match (event, weak.upgrade()) {
            (ClientEvent::TrialExpired(notice), Some(inner)) => {
                if let Ok(mut view) = inner.view.lock() {
                    view.paywall = Some(notice.clone());
                }
                Disposition::Continue
            }
            _ => Disposition::Continue,
        });
        if let Ok(mut slot) = inner.subscription.lock() {
            *slot = Some(subscription);
        }

        Self { inner }
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        match self.inner.view.lock() {
            Ok(view) => DashboardSnapshot {
                filter: view.filter.clone(),
                loading: view.in_flight > 0,
                paywall: view.paywall.clone(),
                status: view.status.clone(),
                render_key: view.render_key,
                last_filter_key: view.last_filter_key.clone(),
                dataset_name: view.dataset.as_ref().map(|d| d.file_name.clone()),
                bundle: view.bundle.clone(),
            },
            Err(poisoned) => {
                let view = poisoned.into_inner();
                DashboardSnapshot {
                    filter: view.filter.clone(),
                    loading: false,
                    paywall: view.paywall.clone(),
                    status: view.status.clone(),
                    render_key: view.render_key,
                    last_filter_key: view.last_filter_key.clone(),
                    dataset_name: None,
                    bundle: view.bundle.clone(),
                }
            }
        }
    }

    pub fn bundle(&self) -> Arc<ForecastBundle> {
        self.snapshot().bundle
    }

    pub fn is_loading(&self) -> bool {
        self.snapshot().loading
    }

    /// Ticks after every finished request, applied or not.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Sends a dataset and, on success, makes it the active one.
    ///
    /// The window comes from the dataset, or from the current filter for files
    /// whose dates cannot be read locally. Fails with `Busy` while another
    /// request is outstanding. A date filter still waiting out its debounce is
    /// dropped.
    #[instrument(skip(self, dataset), fields(file = %dataset.file_name))]
    pub async fn upload(&self, dataset: UploadedDataset) -> ClientResult<()> {
        let range = {
            let view = self.inner.lock_view()?;
            if view.in_flight > 0 {
                return Err(ClientError::Busy);
            }
            dataset.date_range.or(view.committed_filter.range)
        };
        let Some(range) = range else {
            let err = ClientError::validation("Please select a date range for this file");
            self.inner.post_error(&err);
            return Err(err);
        };

        let history = match dataset.historical_records() {
            Ok(records) => records,
            Err(err) => {
                warn!("could not parse history locally, continuing without it: {}", err);
                Vec::new()
            }
        };
        let dataset = Arc::new(dataset);
        self.inner
            .dispatch(Dispatch::Upload {
                dataset,
                history: Arc::new(history),
                range,
            })
            .await
    }

    /// Processes the backend's bundled sample data. There is no local dataset afterwards.
    pub async fn load_sample(&self) -> ClientResult<()> {
        self.inner.dispatch(Dispatch::Sample).await
    }

    /// Changes the date window (and optionally the store).
    ///
    /// Input is validated immediately. The request itself is debounced and
    /// skipped entirely when the selection matches what is applied or pending.
    /// Fails with `Busy` while a dataset upload is outstanding.
    #[instrument(skip(self))]
    pub fn apply_date_filter(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        store: Option<&str>,
    ) -> ClientResult<FilterOutcome> {
        if to < from {
            let err = ClientError::validation("End date must be on or after the start date");
            self.inner.post_error(&err);
            return Err(err);
        }
        let range = DateRange::new(from, to);

        let mut view = self.inner.lock_view()?;
        if view.replacing_dataset {
            return Err(ClientError::Busy);
        }
        if view.dataset.is_none() {
            drop(view);
            let err = ClientError::validation("Please upload a sales file before filtering");
            self.inner.post_error(&err);
            return Err(err);
        }

        let store = store
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| view.filter.store.clone());
        let key = filter_key(&range, &store);

        if view.pending_filter_key.as_deref() == Some(key.as_str()) {
            return Ok(FilterOutcome::Unchanged);
        }
        if view.last_filter_key.as_deref() == Some(key.as_str()) {
            if view.pending_filter_key.take().is_some() {
                // Back to the applied selection: drop the queued request and
                // retire any request already in flight
                self.inner.debouncer.cancel();
                self.inner.generation.fetch_add(1, Ordering::SeqCst);
                view.filter = view.committed_filter.clone();
            }
            return Ok(FilterOutcome::Unchanged);
        }

        view.filter = FilterState {
            store: store.clone(),
            range: Some(range),
        };
        view.pending_filter_key = Some(key.clone());
        drop(view);

        debug!(%key, "date filter scheduled");
        let inner = self.inner.clone();
        self.inner.debouncer.schedule(async move {
            let _ = inner.dispatch(Dispatch::Filter { range, store, key }).await;
        });
        Ok(FilterOutcome::Scheduled)
    }

    pub fn dismiss_status(&self) {
        if let Ok(mut view) = self.inner.view.lock() {
            view.status = None;
        }
    }

    pub fn dismiss_paywall(&self) {
        if let Ok(mut view) = self.inner.view.lock() {
            view.paywall = None;
        }
    }

    pub fn forecast_series(&self, sku: Option<&str>) -> Vec<ChartPoint> {
        series::forecast_series(&self.bundle(), sku)
    }

    pub fn historical_series(&self, sku: Option<&str>) -> Vec<ChartPoint> {
        series::historical_series(&self.bundle().historical, sku)
    }
}

impl Inner {
    fn lock_view(&self) -> ClientResult<MutexGuard<'_, ViewState>> {
        self.view
            .lock()
            .map_err(|_| ClientError::Internal("dashboard state lock poisoned".into()))
    }

    async fn dispatch(self: &Arc<Self>, request: Dispatch) -> ClientResult<()> {
        let (generation, upload) = {
            let mut view = self.lock_view()?;
            if request.replaces_dataset() {
                if view.in_flight > 0 {
                    return Err(ClientError::Busy);
                }
                // The old dataset's window must not reach the new one
                if self.debouncer.cancel() {
                    debug!("queued date filter dropped for new dataset");
                }
                if view.pending_filter_key.take().is_some() {
                    view.filter = view.committed_filter.clone();
                }
                view.replacing_dataset = true;
            }
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            view.in_flight += 1;
            let upload = match &request {
                Dispatch::Upload { dataset, range, .. } => Some(UploadRequest::new(
                    dataset.clone(),
                    *range,
                    dataset.store.clone(),
                )),
                Dispatch::Filter { range, store, .. } => match &view.dataset {
                    Some(dataset) => Some(UploadRequest::new(dataset.clone(), *range, store.clone())),
                    None => {
                        view.in_flight -= 1;
                        view.pending_filter_key = None;
                        return Ok(());
                    }
                },
                Dispatch::Sample => None,
            };
            (generation, upload)
        };

        let result = match upload {
            Some(upload) => self.backend.upload_and_process(upload).await,
            None => self.backend.upload_and_process_sample().await,
        };

        let outcome = self.apply(generation, request, result);
        self.revision.send_modify(|r| *r += 1);
        outcome
    }

    fn apply(
        self: &Arc<Self>,
        generation: u64,
        request: Dispatch,
        result: ClientResult<Value>,
    ) -> ClientResult<()> {
        let mut view = self.lock_view()?;
        view.in_flight = view.in_flight.saturating_sub(1);
        if request.replaces_dataset() {
            view.replacing_dataset = false;
        }

        if generation != self.generation.load(Ordering::SeqCst) {
            debug!(generation, request = request.label(), "discarding stale response");
            // A filter has a newer request behind it; a dataset the caller
            // waited on was never applied
            return match request {
                Dispatch::Filter { .. } => Ok(()),
                _ => Err(ClientError::Superseded),
            };
        }

        let value = match result {
            Ok(value) => value,
            Err(err) => {
                if let Dispatch::Filter { key, .. } = &request {
                    if view.pending_filter_key.as_deref() == Some(key.as_str()) {
                        view.pending_filter_key = None;
                    }
                    // Keep showing a newer selection that is still queued
                    if view.pending_filter_key.is_none() {
                        view.filter = view.committed_filter.clone();
                    }
                }
                match &err {
                    ClientError::TrialExpired(notice) => {
                        info!("trial expired; showing paywall");
                        view.paywall = Some(notice.clone());
                    }
                    other => {
                        warn!(request = request.label(), "forecast request failed: {}", other);
                        self.set_status(&mut view, StatusKind::Error, other.user_message());
                    }
                }
                return Err(err);
            }
        };

        let (history, filter) = match request {
            Dispatch::Upload {
                dataset,
                history,
                range,
            } => {
                let filter = FilterState {
                    store: dataset.store.clone(),
                    range: Some(range),
                };
                view.dataset = Some(dataset);
                view.history = history;
                view.pending_filter_key = None;
                (filter_historical(&view.history, &range, &filter.store), filter)
            }
            Dispatch::Filter { range, store, key } => {
                if view.pending_filter_key.as_deref() == Some(key.as_str()) {
                    view.pending_filter_key = None;
                }
                let filter = FilterState {
                    store,
                    range: Some(range),
                };
                (filter_historical(&view.history, &range, &filter.store), filter)
            }
            Dispatch::Sample => {
                view.dataset = None;
                view.history = Arc::new(Vec::new());
                view.pending_filter_key = None;
                let filter = FilterState {
                    store: view.filter.store.clone(),
                    range: None,
                };
                (Vec::new(), filter)
            }
        };

        let bundle = normalize_bundle(&value, history);
        let products = bundle.forecasts.len();
        view.last_filter_key = filter.range.map(|range| filter_key(&range, &filter.store));
        if view.pending_filter_key.is_none() {
            view.filter = filter.clone();
        }
        view.committed_filter = filter;
        view.bundle = Arc::new(bundle);
        view.render_key += 1;

        let text = if products == 0 {
            "No forecast data returned for the selected range".to_string()
        } else {
            format!("Forecast ready for {} products", products)
        };
        let kind = if products == 0 {
            StatusKind::Info
        } else {
            StatusKind::Success
        };
        self.set_status(&mut view, kind, text);
        info!(generation, products, render_key = view.render_key, "dashboard updated");
        Ok(())
    }

    fn post_error(self: &Arc<Self>, err: &ClientError) {
        if let Ok(mut view) = self.view.lock() {
            self.set_status(&mut view, StatusKind::Error, err.user_message());
        }
    }

    /// Replaces the banner and arms its dismissal; a newer banner is left alone.
    fn set_status(self: &Arc<Self>, view: &mut ViewState, kind: StatusKind, text: String) {
        let id = self.next_status_id.fetch_add(1, Ordering::Relaxed);
        view.status = Some(StatusMessage { id, kind, text });

        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        let weak = Arc::downgrade(self);
        let delay = self.status_dismiss;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                if let Ok(mut view) = inner.view.lock() {
                    if view.status.as_ref().map(|s| s.id) == Some(id) {
                        view.status = None;
                    }
                }
            }
        });
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.debouncer.cancel();
    }
}
