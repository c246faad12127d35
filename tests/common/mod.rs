#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDate};
use forecastai_client::{
    dataset::UploadedDataset, ClientConfig, ForecastClient, MemoryStore, NotificationHub,
    SessionStore,
};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A client wired to a fresh mock backend with short timers.
pub struct TestClient {
    pub server: MockServer,
    pub client: ForecastClient,
    pub store: Arc<dyn SessionStore>,
}

impl TestClient {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut ClientConfig)) -> Self {
        let server = MockServer::start().await;
        let mut config = ClientConfig::new(server.uri());
        config.request_timeout_secs = 5;
        config.filter_debounce_ms = 50;
        adjust(&mut config);

        let hub = NotificationHub::new();
        let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new(hub.clone()));
        let client = ForecastClient::with_store(config, hub, store.clone())
            .expect("failed to build test client");
        Self {
            server,
            client,
            store,
        }
    }

    /// Mounts `/auth/login` and `/auth/me` for a user with the given tokens.
    pub async fn mount_login(&self, access_token: &str, refresh_token: &str) {
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": access_token,
                "refresh_token": refresh_token,
                "token_type": "bearer",
            })))
            .mount(&self.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(user_json()))
            .mount(&self.server)
            .await;
    }

    pub async fn login(&self) {
        self.client
            .session()
            .login("ana@example.com", "correct-horse", true)
            .await
            .expect("login should succeed");
    }
}

pub fn user_json() -> Value {
    json!({
        "full_name": "Ana Planner",
        "email": "ana@example.com",
        "company_name": "Acme Retail",
    })
}

pub fn day(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap() + ChronoDuration::days(offset)
}

/// `days` days of sales for `skus` products at one store.
pub fn sales_csv(days: i64, skus: usize, store: &str) -> String {
    let mut csv = String::from("date,sku,item_name,store,units_sold\n");
    for d in 0..days {
        for s in 0..skus {
            csv.push_str(&format!(
                "{},SKU-{:03},Product {},{},{}\n",
                day(d),
                s + 1,
                s + 1,
                store,
                10 + s as i64 + d % 3
            ));
        }
    }
    csv
}

pub fn sales_dataset(days: i64, skus: usize) -> UploadedDataset {
    UploadedDataset::from_bytes("sales.csv", sales_csv(days, skus, "Store A").into_bytes(), "Store A")
        .expect("valid sales file")
}

/// Backend response with one forecast, inventory row and action per SKU.
pub fn forecast_response(skus: usize, horizon: i64, start: NaiveDate) -> Value {
    let sku = |i: usize| format!("SKU-{:03}", i + 1);
    let forecasts: Vec<Value> = (0..skus)
        .map(|i| {
            let points: Vec<Value> = (0..horizon)
                .map(|h| {
                    json!({
                        "date": (start + ChronoDuration::days(h)).to_string(),
                        "predicted_units": 12.0 + h as f64,
                        "lower_bound": 9.0,
                        "upper_bound": 15.0 + h as f64,
                    })
                })
                .collect();
            json!({
                "sku": sku(i),
                "item_name": format!("Product {}", i + 1),
                "forecast": points,
                "accuracy": 91.5,
            })
        })
        .collect();
    let inventory: Vec<Value> = (0..skus)
        .map(|i| {
            let speed = if i == 0 { "FAST" } else { "SLOW" };
            json!({
                "sku": sku(i),
                "current_stock": 40,
                "recommended_stock": "85",
                "safety_stock": 12,
                "reorder_point": 30,
                "demand_speed": speed,
            })
        })
        .collect();
    let actions: Vec<Value> = (0..skus)
        .map(|i| {
            let priority = if i % 2 == 0 { "LOW" } else { "HIGH" };
            json!({
                "sku": sku(i),
                "item_name": format!("Product {}", i + 1),
                "priority": priority,
                "recommended_qty": 45,
                "revenue_risk": "$1,250.00",
                "roi_percent": 180,
            })
        })
        .collect();

    let total_records = skus * 30;
    json!({
        "message": "Forecast generated",
        "forecasts": forecasts,
        "inventory_recommendations": inventory,
        "priority_actions": actions,
        "summary": {
            "total_records": total_records,
            "unique_items": skus,
            "date_range": { "start": day(0).to_string(), "end": day(29).to_string() },
            "total_sales": 1500,
            "average_daily_sales": 50,
        },
    })
}

/// Polls until `check` holds or the deadline passes.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
