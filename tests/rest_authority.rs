use chrono::{TimeZone, Utc};
use focus_sync::remote::{
    PendingRemoteRecord, RemoteAuthority, RemoteError, RestAuthority, RestAuthorityConfig,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TABLE_PATH: &str = "/rest/v1/pomodoro_active_sessions";

fn authority(server: &MockServer, api_key: Option<&str>) -> RestAuthority {
    let mut config = RestAuthorityConfig::new(format!("{}/rest/v1/", server.uri()));
    config.api_key = api_key.map(str::to_string);
    RestAuthority::new(config).unwrap()
}

fn record() -> PendingRemoteRecord {
    PendingRemoteRecord {
        user_id: "ana".to_string(),
        category_id: "focus".to_string(),
        start_time: Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()),
        paused_at: None,
        accumulated_seconds: 120,
        is_running: true,
        total_duration_seconds: Some(1500),
        updated_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()),
    }
}

#[tokio::test]
async fn upsert_merges_on_user_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TABLE_PATH))
        .and(query_param("on_conflict", "user_id"))
        .and(header_exists("Prefer"))
        .and(header("apikey", "secret"))
        .and(header("Authorization", "Bearer secret"))
        .and(body_partial_json(json!({
            "user_id": "ana",
            "is_running": true,
            "accumulated_seconds": 120
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    authority(&server, Some("secret"))
        .upsert(&record())
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let prefer = requests[0].headers.get("Prefer").unwrap().to_str().unwrap();
    assert_eq!(prefer, "resolution=merge-duplicates,return=minimal");
}

#[tokio::test]
async fn fetch_returns_the_first_row() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TABLE_PATH))
        .and(query_param("user_id", "eq.ana"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "user_id": "ana",
            "category_id": "focus",
            "start_time": null,
            "paused_at": "2024-05-01T09:10:00Z",
            "accumulated_seconds": 600,
            "is_running": false
        }])))
        .expect(1)
        .mount(&server)
        .await;

    let row = authority(&server, None).fetch("ana").await.unwrap().unwrap();
    assert_eq!(row.accumulated_seconds, 600);
    assert_eq!(row.updated_at, None);
    assert_eq!(
        row.implied_last_updated(),
        Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 10, 0).unwrap())
    );
}

#[tokio::test]
async fn fetch_without_row_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TABLE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    assert!(authority(&server, None).fetch("ana").await.unwrap().is_none());
}

#[tokio::test]
async fn delete_filters_by_user() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(TABLE_PATH))
        .and(query_param("user_id", "eq.ana"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    authority(&server, None).delete("ana").await.unwrap();
}

#[tokio::test]
async fn server_errors_surface_as_http_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = authority(&server, None).upsert(&record()).await.unwrap_err();
    assert!(matches!(
        err,
        RemoteError::Http { status: 500, ref message } if message == "boom"
    ));
}
