mod support;

use std::time::Duration;

use coopx::prelude::{ApiClient, ApiResponse};
use serde::Deserialize;
use serde_json::{Value, json};

use support::{MockResponse, MockServer};

#[derive(Debug, Deserialize, PartialEq)]
struct Loan {
    id: u64,
    status: String,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn get_unwraps_data_and_sends_json_headers() {
    let server = MockServer::start(vec![MockResponse::json(
        200,
        json!({ "success": true, "data": { "id": 42, "status": "approved" }, "message": "ok" }),
    )]);
    let client = ApiClient::builder(server.api_url())
        .try_default_header("x-client", "member-portal")
        .expect("valid header")
        .build();
    client.set_token("member-token");

    let response: ApiResponse<Loan> = client
        .get("/loans/42")
        .query_pair("include", "schedule")
        .send_json()
        .await
        .expect("request settles");
    assert!(response.success);
    assert_eq!(response.status, 200);
    assert_eq!(response.message.as_deref(), Some("ok"));
    assert_eq!(
        response.data,
        Some(Loan {
            id: 42,
            status: "approved".to_owned()
        })
    );

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, "GET");
    assert_eq!(request.path, "/api/loans/42?include=schedule");
    assert_eq!(
        request.headers.get("authorization").map(String::as_str),
        Some("Bearer member-token")
    );
    assert_eq!(
        request.headers.get("accept").map(String::as_str),
        Some("application/json")
    );
    assert_eq!(
        request.headers.get("x-client").map(String::as_str),
        Some("member-portal")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn post_sends_json_body_and_surfaces_field_errors() {
    let server = MockServer::start(vec![MockResponse::json(
        422,
        json!({
            "success": false,
            "message": "Validation failed",
            "errors": { "amount": ["The amount field is required."] },
            "code": "VALIDATION_ERROR"
        }),
    )]);
    let client = ApiClient::builder(server.api_url()).build();

    let response = client
        .post("/loans")
        .json(&json!({ "purpose": "school fees" }))
        .expect("serialize payload")
        .send()
        .await
        .expect("request settles");
    assert!(!response.success);
    assert_eq!(response.status, 422);
    assert_eq!(response.code.as_deref(), Some("VALIDATION_ERROR"));
    assert_eq!(
        response.field_errors("amount"),
        ["The amount field is required.".to_owned()]
    );

    let request = &server.requests()[0];
    assert_eq!(request.method, "POST");
    let body: Value = serde_json::from_slice(&request.body).expect("json body");
    assert_eq!(body, json!({ "purpose": "school fees" }));
    assert_eq!(
        request.headers.get("content-type").map(String::as_str),
        Some("application/json")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_json_error_body_falls_back_to_status_table() {
    let server = MockServer::start(vec![MockResponse::text(
        502,
        "<html>upstream unavailable</html>",
    )]);
    let client = ApiClient::builder(server.api_url()).retries(1).build();

    let response = client.get("/dashboard").send().await.expect("settles");
    assert_eq!(response.status, 502);
    assert_eq!(
        response.message.as_deref(),
        Some("Bad gateway. The server is temporarily unavailable.")
    );
    assert_eq!(
        response.field_errors("general"),
        ["Bad gateway. The server is temporarily unavailable.".to_owned()]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expired_token_is_refreshed_through_the_refresh_endpoint() {
    let server = MockServer::start(vec![
        MockResponse::json(401, json!({ "message": "Unauthenticated." })),
        MockResponse::json(200, json!({ "success": true, "data": { "token": "fresh-token" } }))
            .header("Set-Cookie", "refresh_session=r2; Path=/; HttpOnly"),
        MockResponse::json(200, json!({ "success": true, "data": { "name": "Ada" } })),
    ]);
    let client = ApiClient::builder(server.api_url())
        .retry_delay(Duration::from_millis(1))
        .build();
    client.set_token("stale-token");

    let response = client.get("/members/me").send().await.expect("settles");
    assert!(response.success);
    assert_eq!(response.data, Some(json!({ "name": "Ada" })));
    assert_eq!(client.token().as_deref(), Some("fresh-token"));

    let requests = server.requests();
    let paths: Vec<&str> = requests.iter().map(|request| request.path.as_str()).collect();
    assert_eq!(paths, ["/api/members/me", "/api/auth/refresh", "/api/members/me"]);
    assert_eq!(requests[1].method, "POST");
    assert_eq!(
        requests[2].headers.get("authorization").map(String::as_str),
        Some("Bearer fresh-token")
    );
    assert_eq!(
        requests[2].headers.get("cookie").map(String::as_str),
        Some("refresh_session=r2")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_refresh_returns_session_expired_envelope() {
    let server = MockServer::start(vec![
        MockResponse::json(401, json!({ "message": "Unauthenticated." })),
        MockResponse::json(401, json!({ "message": "Refresh token expired." })),
    ]);
    let client = ApiClient::builder(server.api_url()).build();
    client.set_token("stale-token");
    let mut events = client.auth_events();

    let response = client.get("/members/me").send().await.expect("settles");
    assert_eq!(response.status, 401);
    assert_eq!(
        response.message.as_deref(),
        Some("Your session has expired. Please log in again.")
    );
    assert_eq!(client.token(), None);
    assert_eq!(
        events.recv().await.expect("auth event"),
        coopx::AuthEvent::Unauthenticated
    );
    assert_eq!(server.served_count(), 2);
}
