use std::sync::Arc;

use axum::{Json, Router, routing::post};
use chrono::{Duration as ChronoDuration, Utc};
use mailflow_api::app::build_app;
use mailflow_api::app::services::{AppServices, ServiceDeps};
use mailflow_infra::DispatchRuntime;
use mailflow_infra::mail::EtherealProvisioner;
use reqwest::StatusCode;
use serde_json::{Value, json};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
    _runtime: DispatchRuntime,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(EtherealProvisioner::with_endpoint("http://127.0.0.1:9/user")).await
    }

    async fn spawn_with(provisioner: EtherealProvisioner) -> Self {
        // Same router as prod, in-memory services, ephemeral port.
        let (services, runtime): (Arc<AppServices>, DispatchRuntime) =
            AppServices::start(ServiceDeps {
                provisioner,
                ..ServiceDeps::in_memory()
            });
        let app = build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            handle,
            _runtime: runtime,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Stand-in for the Ethereal account API.
async fn spawn_fake_ethereal() -> (String, tokio::task::JoinHandle<()>) {
    let app = Router::new().route(
        "/user",
        post(|| async {
            Json(json!({
                "status": "success",
                "user": "lena.test@ethereal.email",
                "pass": "s3cret",
                "smtp": { "host": "smtp.ethereal.email", "port": 587, "secure": false }
            }))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/user", addr), handle)
}

async fn login(client: &reqwest::Client, srv: &TestServer, email: &str) -> Value {
    let res = client
        .post(srv.url("/api/auth/google"))
        .json(&json!({ "email": email, "name": "Ada", "googleId": "g-123" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    res.json().await.unwrap()
}

async fn create_sender(client: &reqwest::Client, srv: &TestServer, user_id: &str) -> Value {
    let res = client
        .post(srv.url("/api/senders"))
        .json(&json!({
            "userId": user_id,
            "email": "Ada's Shop",
            "host": "smtp.example.test",
            "port": 587,
            "user": "ada@example.test",
            "pass": "pw",
            "hourlyLimit": 50
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    res.json().await.unwrap()
}

async fn get_json(client: &reqwest::Client, url: String) -> (StatusCode, Value) {
    let res = client.get(url).send().await.unwrap();
    let status = res.status();
    (status, res.json().await.unwrap())
}

#[tokio::test]
async fn health_reports_broker_down_without_redis() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(&client, srv.url("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok", "broker": "down" }));
}

#[tokio::test]
async fn unknown_route_returns_json_404() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(&client, srv.url("/api/nope?x=1")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Not Found");
    assert_eq!(body["path"], "/api/nope?x=1");
}

#[tokio::test]
async fn stats_require_user_id() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(&client, srv.url("/api/stats")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "userId required");
}

#[tokio::test]
async fn login_is_an_upsert_by_email() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let first = login(&client, &srv, "ada@example.test").await;
    let res = client
        .post(srv.url("/api/auth/google"))
        .json(&json!({ "email": "ada@example.test", "name": "Ada L." }))
        .send()
        .await
        .unwrap();
    let second: Value = res.json().await.unwrap();

    assert_eq!(first["id"], second["id"]);
    assert_eq!(second["name"], "Ada L.");
}

#[tokio::test]
async fn senders_are_listed_per_user_without_passwords() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let user = login(&client, &srv, "ada@example.test").await;
    let user_id = user["id"].as_str().unwrap();

    let sender = create_sender(&client, &srv, user_id).await;
    assert_eq!(sender["user"], "ada@example.test");
    assert_eq!(sender["hourlyLimit"], 50);
    assert!(sender.get("pass").is_none());

    let (status, listed) =
        get_json(&client, srv.url(&format!("/api/senders?userId={user_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["id"], sender["id"]);
}

#[tokio::test]
async fn ethereal_sender_gets_test_quota() {
    let (endpoint, fake) = spawn_fake_ethereal().await;
    let srv = TestServer::spawn_with(EtherealProvisioner::with_endpoint(endpoint)).await;
    let client = reqwest::Client::new();
    let user = login(&client, &srv, "ada@example.test").await;

    let res = client
        .post(srv.url("/api/sender/ethereal"))
        .json(&json!({ "userId": user["id"] }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let sender: Value = res.json().await.unwrap();
    assert_eq!(sender["hourlyLimit"], 10);
    assert_eq!(sender["host"], "smtp.ethereal.email");
    assert_eq!(sender["email"], "lena.test@ethereal.email");
    fake.abort();
}

#[tokio::test]
async fn ethereal_outage_is_a_bad_gateway() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let user = login(&client, &srv, "ada@example.test").await;

    let res = client
        .post(srv.url("/api/sender/ethereal"))
        .json(&json!({ "userId": user["id"] }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn campaign_without_recipients_is_rejected() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let user = login(&client, &srv, "ada@example.test").await;
    let sender = create_sender(&client, &srv, user["id"].as_str().unwrap()).await;

    let res = client
        .post(srv.url("/api/campaigns"))
        .json(&json!({
            "userId": user["id"],
            "name": "Empty",
            "subject": "Nothing",
            "body": "<p/>",
            "startTime": Utc::now().to_rfc3339(),
            "delay": 5,
            "recipients": [],
            "senderId": sender["id"]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn campaign_lifecycle_schedule_list_flag_delete() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let user = login(&client, &srv, "ada@example.test").await;
    let user_id = user["id"].as_str().unwrap().to_string();
    let sender = create_sender(&client, &srv, &user_id).await;

    // Far enough out that nothing fires during the test.
    let start = Utc::now() + ChronoDuration::days(1);
    let res = client
        .post(srv.url("/api/campaigns"))
        .json(&json!({
            "userId": user_id,
            "name": "Launch",
            "subject": "We are live",
            "body": "<h1>Hi</h1>",
            "startTime": start.to_rfc3339(),
            "delay": 5,
            "recipients": ["a@x.test", "b@x.test", "c@x.test"],
            "senderId": sender["id"]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let campaign: Value = res.json().await.unwrap();
    assert_eq!(campaign["name"], "Launch");
    assert_eq!(campaign["senderId"], sender["id"]);

    let (_, scheduled) = get_json(
        &client,
        srv.url(&format!("/api/emails/scheduled?userId={user_id}")),
    )
    .await;
    let scheduled = scheduled.as_array().unwrap().clone();
    let recipients: Vec<_> = scheduled.iter().map(|j| j["recipient"].clone()).collect();
    assert_eq!(recipients, vec![json!("a@x.test"), json!("b@x.test"), json!("c@x.test")]);
    assert!(scheduled.iter().all(|j| j["status"] == "PENDING"));
    assert_eq!(scheduled[0]["campaign"]["subject"], "We are live");

    let (_, stats) = get_json(&client, srv.url(&format!("/api/stats?userId={user_id}"))).await;
    assert_eq!(stats, json!({ "scheduled": 3, "sent": 0, "archived": 0 }));

    let first_id = scheduled[0]["id"].as_str().unwrap();
    let res = client
        .patch(srv.url(&format!("/api/emails/{first_id}")))
        .json(&json!({ "isStarred": true, "isArchived": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let patched: Value = res.json().await.unwrap();
    assert_eq!(patched["isStarred"], true);
    assert_eq!(patched["isArchived"], true);
    assert_eq!(patched["status"], "PENDING");

    let (_, archived) = get_json(
        &client,
        srv.url(&format!("/api/emails/archived?userId={user_id}")),
    )
    .await;
    assert_eq!(archived.as_array().unwrap().len(), 1);
    let (_, all) = get_json(&client, srv.url(&format!("/api/emails/all?userId={user_id}"))).await;
    assert_eq!(all.as_array().unwrap().len(), 2);

    let second_id = scheduled[1]["id"].as_str().unwrap();
    let res = client
        .delete(srv.url(&format!("/api/emails/{second_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "success": true }));

    let (_, stats) = get_json(&client, srv.url(&format!("/api/stats?userId={user_id}"))).await;
    assert_eq!(stats, json!({ "scheduled": 1, "sent": 0, "archived": 1 }));
}

#[tokio::test]
async fn patching_an_unknown_email_is_not_found() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .patch(srv.url(&format!("/api/emails/{}", uuid::Uuid::now_v7())))
        .json(&json!({ "isStarred": true }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
