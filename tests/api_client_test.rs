mod common;

use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use common::TestClient;
use forecastai_client::{
    api::{anonymous_token, ApiClient},
    ClientError, ClientEvent, Disposition, NotificationHub,
};
use reqwest::StatusCode;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn validation_lists_are_joined_into_one_message() {
    let app = TestClient::new().await;
    app.mount_login("access-1", "refresh-1").await;
    Mock::given(method("POST"))
        .and(path("/api/trial/upgrade"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "detail": [
                { "loc": ["body", "plan_tier"], "msg": "unknown plan" },
                { "loc": ["body"], "msg": "upgrade not allowed" },
            ]
        })))
        .mount(&app.server)
        .await;
    app.login().await;

    let err = app.client.api().upgrade_trial("platinum").await.unwrap_err();
    assert_eq!(err.status_code(), Some(StatusCode::UNPROCESSABLE_ENTITY));
    assert_eq!(err.user_message(), "unknown plan; upgrade not allowed");
}

#[tokio::test]
async fn upgrade_posts_the_plan_tier() {
    let app = TestClient::new().await;
    app.mount_login("access-1", "refresh-1").await;
    Mock::given(method("POST"))
        .and(path("/api/trial/upgrade"))
        .and(body_json(json!({ "plan_tier": "pro" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "plan": "pro" })))
        .expect(1)
        .mount(&app.server)
        .await;
    app.login().await;

    assert_matches!(
        app.client.api().upgrade_trial("  ").await,
        Err(ClientError::Validation(_))
    );
    let response = app.client.api().upgrade_trial(" pro ").await.unwrap();
    assert_eq!(response["plan"], "pro");
}

#[tokio::test]
async fn payment_required_is_published_to_listeners() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/trial/info"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "message": "Trial over",
            "upgrade_url": "/billing",
        })))
        .mount(&server)
        .await;

    let hub = NotificationHub::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _subscription = hub.subscribe(move |event| {
        if let ClientEvent::TrialExpired(notice) = event {
            sink.lock().unwrap().push(notice.clone());
        }
        Disposition::Handled
    });

    let api = ApiClient::with_client(reqwest::Client::new(), &server.uri(), anonymous_token(), hub, None)
        .unwrap();
    let err = api.trial_info().await.unwrap_err();

    assert_matches!(err, ClientError::TrialExpired(ref notice) if notice.upgrade_url == "/billing");
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].message, "Trial over");
    assert_eq!(seen[0].status, 402);
}

#[tokio::test]
async fn empty_success_body_is_null() {
    let app = TestClient::new().await;
    app.mount_login("access-1", "refresh-1").await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&app.server)
        .await;
    app.login().await;

    app.client.api().logout().await.unwrap();
}

#[tokio::test]
async fn base_path_prefix_is_kept() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/api/forecast/sample-data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "rows": 3 })))
        .expect(1)
        .mount(&server)
        .await;

    let api = ApiClient::with_client(
        reqwest::Client::new(),
        &format!("{}/v2/", server.uri()),
        anonymous_token(),
        NotificationHub::new(),
        None,
    )
    .unwrap();
    assert_eq!(api.sample_data().await.unwrap()["rows"], 3);
}

#[tokio::test]
async fn unreachable_backend_is_a_network_error() {
    // Port 9 (discard) is closed on test machines
    let api = ApiClient::with_client(
        reqwest::Client::new(),
        "http://127.0.0.1:9",
        anonymous_token(),
        NotificationHub::new(),
        None,
    )
    .unwrap();
    let err = api.sample_data().await.unwrap_err();
    assert_matches!(err, ClientError::Network(_));
    assert_eq!(
        err.user_message(),
        "Unable to connect to the server. Please check your connection."
    );
}
