//! HTTP client for the forecasting backend.
//!
//! Every call goes through [`ApiClient::request`], which attaches the bearer
//! token published by the session manager, tags the request with an
//! `X-Request-Id`, logs the outcome and maps failures onto [`ClientError`].
//! A 402 is treated as a recoverable paywall signal rather than a plain error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::dataset::UploadedDataset;
use crate::errors::{ClientError, ClientResult};
use crate::events::{ClientEvent, NotificationHub};
use crate::models::DateRange;
use crate::normalize;
use crate::storage::{SessionStore, PAYWALL_KEY};

mod auth;
mod forecast;
mod trial;

pub use forecast::UploadRequest;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Read side of the access token channel owned by the session manager.
pub type TokenReceiver = watch::Receiver<Option<String>>;

/// Request body variants.
#[derive(Debug, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Multipart(reqwest::multipart::Form),
}

/// Per-call options for [`ApiClient::request`].
#[derive(Debug, Default)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    /// Skip the bearer token even when one is available
    pub anonymous: bool,
}

impl RequestOptions {
    pub fn json(body: Value) -> Self {
        Self {
            body: RequestBody::Json(body),
            ..Default::default()
        }
    }

    pub fn multipart(form: reqwest::multipart::Form) -> Self {
        Self {
            body: RequestBody::Multipart(form),
            ..Default::default()
        }
    }

    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Backend operations the dashboard depends on.
#[async_trait]
pub trait ForecastBackend: Send + Sync {
    /// Sends a dataset for processing and returns the raw response
    async fn upload_and_process(&self, request: UploadRequest) -> ClientResult<Value>;

    /// Processes the backend's bundled sample data
    async fn upload_and_process_sample(&self) -> ClientResult<Value>;
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    token: TokenReceiver,
    hub: NotificationHub,
    store: Option<Arc<dyn SessionStore>>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl ApiClient {
    /// Build a client using a reqwest client with the configured timeout.
    pub fn new(
        config: &ClientConfig,
        token: TokenReceiver,
        hub: NotificationHub,
        store: Option<Arc<dyn SessionStore>>,
    ) -> ClientResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Self::with_client(http, config.base_url(), token, hub, store)
    }

    /// Build a client from an existing reqwest client (useful for testing).
    pub fn with_client(
        http: Client,
        base_url: &str,
        token: TokenReceiver,
        hub: NotificationHub,
        store: Option<Arc<dyn SessionStore>>,
    ) -> ClientResult<Self> {
        // Trailing slash so relative joins keep any path prefix on the base
        let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))?;
        Ok(Self {
            http,
            base_url,
            token,
            hub,
            store,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    fn endpoint(&self, path: &str) -> ClientResult<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn bearer(&self) -> Option<String> {
        self.token
            .borrow()
            .as_ref()
            .filter(|t| !t.is_empty())
            .cloned()
    }

    /// Performs a request and returns the decoded JSON body.
    ///
    /// An empty successful body decodes to `Value::Null`.
    #[instrument(skip(self, options), fields(request_id))]
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> ClientResult<Value> {
        let url = self.endpoint(path)?;
        let request_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("request_id", request_id.as_str());

        let mut builder = self
            .http
            .request(method.clone(), url)
            .header(REQUEST_ID_HEADER, request_id.as_str());

        if !options.anonymous {
            if let Some(token) = self.bearer() {
                let value = HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|_| ClientError::validation("access token contains invalid characters"))?;
                builder = builder.header(AUTHORIZATION, value);
            }
        }

        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }

        builder = match options.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(&body),
            RequestBody::Multipart(form) => builder.multipart(form),
        };

        let started = Instant::now();
        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    %method,
                    path,
                    request_id = %request_id,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "request failed: {}",
                    err
                );
                return Err(ClientError::Network(err));
            }
        };

        let status = response.status();
        let text = response.text().await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        if status.is_success() {
            info!(%method, path, status = status.as_u16(), duration_ms, request_id = %request_id, "request completed");
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_str(&text)?);
        }

        warn!(%method, path, status = status.as_u16(), duration_ms, request_id = %request_id, "request rejected");
        let body: Option<Value> = serde_json::from_str(&text).ok();
        Err(self.map_failure(status, path, body))
    }

    fn map_failure(&self, status: StatusCode, path: &str, body: Option<Value>) -> ClientError {
        match status {
            StatusCode::PAYMENT_REQUIRED => {
                let notice = normalize::normalize_trial_notice(body.as_ref().unwrap_or(&Value::Null));
                warn!(upgrade_url = %notice.upgrade_url, "trial expired: {}", notice.message);
                if let Some(store) = &self.store {
                    match serde_json::to_string(&notice) {
                        Ok(payload) => {
                            if let Err(err) = store.set(PAYWALL_KEY, &payload, 0) {
                                warn!("failed to persist paywall notice: {}", err);
                            }
                        }
                        Err(err) => warn!("failed to encode paywall notice: {}", err),
                    }
                }
                let delivery = self.hub.publish(ClientEvent::TrialExpired(notice.clone()));
                if delivery.listeners == 0 {
                    warn!("trial expired notice raised with no paywall listener registered");
                }
                ClientError::TrialExpired(notice)
            }
            StatusCode::UNAUTHORIZED => {
                self.hub.publish(ClientEvent::Unauthorized {
                    path: path.to_string(),
                });
                let message = body
                    .as_ref()
                    .and_then(normalize::error_message)
                    .unwrap_or_else(|| "Invalid or expired token".to_string());
                ClientError::Unauthorized(message)
            }
            _ => ClientError::api(status, body.as_ref().and_then(normalize::error_message)),
        }
    }

    pub(crate) async fn get(&self, path: &str) -> ClientResult<Value> {
        self.request(Method::GET, path, RequestOptions::default())
            .await
    }

    pub(crate) async fn post(&self, path: &str, options: RequestOptions) -> ClientResult<Value> {
        self.request(Method::POST, path, options).await
    }
}

#[async_trait]
impl ForecastBackend for ApiClient {
    async fn upload_and_process(&self, request: UploadRequest) -> ClientResult<Value> {
        ApiClient::upload_and_process(self, &request).await
    }

    async fn upload_and_process_sample(&self) -> ClientResult<Value> {
        ApiClient::upload_and_process_sample(self).await
    }
}

/// Formats a date range as the backend's query parameters.
pub(crate) fn range_query(range: &DateRange) -> Vec<(String, String)> {
    vec![
        ("from_date".to_string(), range.from.format("%Y-%m-%d").to_string()),
        ("to_date".to_string(), range.to.format("%Y-%m-%d").to_string()),
    ]
}

/// Convenience for tests and callers without a session manager.
pub fn anonymous_token() -> TokenReceiver {
    let (_tx, rx) = watch::channel(None);
    rx
}

impl UploadRequest {
    pub fn new(dataset: Arc<UploadedDataset>, range: DateRange, store: impl Into<String>) -> Self {
        Self {
            dataset,
            range,
            store: store.into(),
            thresholds: None,
        }
    }
}
