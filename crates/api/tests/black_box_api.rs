use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::json;

use clientdesk_api::app::{
    build_app,
    services::{AppServices, Backends},
};
use clientdesk_auth::JwtClaims;
use clientdesk_core::UserId;
use clientdesk_infra::config::AppConfig;
use clientdesk_infra::jobs::{
    Job, JobCounts, JobId, JobOptions, JobQueue, JobState, QueueError, WorkerHandle,
};

const JWT_SECRET: &str = "black-box-secret";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
    worker: Option<WorkerHandle>,
}

fn test_config(extra: &[(&str, &str)]) -> AppConfig {
    let mut vars = vec![
        ("JWT_SECRET", JWT_SECRET),
        ("LOG_JOB_BACKOFF_MS", "0"),
        ("WORKER_POLL_INTERVAL_MS", "10"),
    ];
    vars.extend_from_slice(extra);
    AppConfig::from_lookup(|key| {
        vars.iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    })
    .expect("test config is valid")
}

impl TestServer {
    async fn spawn(backends: Backends, config: AppConfig, with_worker: bool) -> Self {
        let services = Arc::new(AppServices::new(&config, backends));
        let worker = with_worker.then(|| services.log_worker(&config.worker).spawn());

        // Same router as prod, bound to an ephemeral port.
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
            worker,
        }
    }

    async fn in_memory() -> Self {
        Self::spawn(Backends::in_memory(), test_config(&[]), true).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
        // Dropping the handle closes the shutdown channel; the worker exits on its own.
        self.worker.take();
    }
}

async fn login(client: &reqwest::Client, server: &TestServer, name: &str) -> String {
    let res = client
        .post(server.url("/auth/login"))
        .json(&json!({ "name": name }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let body: serde_json::Value = res.json().await.unwrap();
    body["access_token"].as_str().expect("access_token").to_string()
}

async fn logs_eventually(
    client: &reqwest::Client,
    server: &TestServer,
    token: &str,
    expected: u64,
) -> serde_json::Value {
    // Persistence is asynchronous (interceptor -> queue -> worker -> store).
    for _ in 0..200 {
        let res = client
            .get(server.url("/log?limit=100"))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let body: serde_json::Value = res.json().await.unwrap();
        if body["total"].as_u64() == Some(expected) {
            return body;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("expected {expected} log records within timeout");
}

#[tokio::test]
async fn health_is_public() {
    let server = TestServer::in_memory().await;
    let res = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn login_registers_once_and_issues_tokens() {
    let server = TestServer::in_memory().await;
    let client = reqwest::Client::new();

    let first = login(&client, &server, "ada").await;
    let second = login(&client, &server, "ada").await;

    let whoami = |token: String| {
        let client = client.clone();
        let url = server.url("/whoami");
        async move {
            let res = client.get(url).bearer_auth(token).send().await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
            res.json::<serde_json::Value>().await.unwrap()["user_id"].clone()
        }
    };

    assert_eq!(whoami(first).await, whoami(second).await);

    let res = client
        .post(server.url("/auth/login"))
        .json(&json!({ "name": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn protected_routes_require_a_valid_token() {
    let server = TestServer::in_memory().await;
    let client = reqwest::Client::new();

    let res = client.get(server.url("/client")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(server.url("/log"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // Well-signed token for a user that does not exist.
    let claims = JwtClaims::new(UserId::new(), Utc::now(), ChronoDuration::minutes(10));
    let token = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt");

    let res = client
        .get(server.url("/client"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn created_client_is_audited_exactly_once() {
    let server = TestServer::in_memory().await;
    let client = reqwest::Client::new();
    let token = login(&client, &server, "ada").await;

    let res = client
        .post(server.url("/client"))
        .bearer_auth(&token)
        .json(&json!({ "name": "Acme", "salary": 1000, "companyValue": 5000 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: serde_json::Value = res.json().await.unwrap();
    assert_eq!(created["name"], "Acme");

    let logs = logs_eventually(&client, &server, &token, 1).await;
    let record = &logs["items"][0];
    assert_eq!(record["action"], "create");
    assert_eq!(record["route"], "/client");
    assert_eq!(record["method"], "POST");
    assert_eq!(record["statusCode"], 201);
    assert_eq!(record["body"]["name"], "Acme");
    assert_eq!(record["response"]["id"], created["id"]);
    assert_eq!(record["userId"], created["createdBy"]);
    assert!(record["duration"].as_u64().is_some());

    // Give a redelivery a chance to show up; it must not.
    tokio::time::sleep(Duration::from_millis(100)).await;
    logs_eventually(&client, &server, &token, 1).await;

    let res = client
        .get(server.url("/admin/queues"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["queues"][0]["name"], "logs");
    assert_eq!(body["queues"][0]["counts"]["completed"], 1);
    assert_eq!(body["queues"][0]["counts"]["failed"], 0);
}

#[tokio::test]
async fn client_lifecycle_is_audited_per_action() {
    let server = TestServer::in_memory().await;
    let client = reqwest::Client::new();
    let token = login(&client, &server, "grace").await;

    let created: serde_json::Value = client
        .post(server.url("/client"))
        .bearer_auth(&token)
        .json(&json!({ "name": "Initech", "salary": 10.5, "companyValue": 20 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let res = client
        .get(server.url(&format!("/client/{id}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .patch(server.url(&format!("/client/{id}")))
        .bearer_auth(&token)
        .json(&json!({ "salary": 99 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let updated: serde_json::Value = res.json().await.unwrap();
    assert_eq!(updated["salary"], 99.0);
    assert_eq!(updated["name"], "Initech");

    let res = client
        .get(server.url("/client?page=1&limit=10"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let page: serde_json::Value = res.json().await.unwrap();
    assert_eq!(page["total"], 1);
    assert_eq!(page["clients"][0]["id"], id.as_str());

    let res = client
        .delete(server.url(&format!("/client/{id}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // Soft-deleted clients are gone; the 404 itself is not audited.
    let res = client
        .get(server.url(&format!("/client/{id}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let logs = logs_eventually(&client, &server, &token, 5).await;
    let mut actions = logs["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["action"].as_str().unwrap().to_string())
        .collect::<Vec<_>>();
    actions.sort();
    assert_eq!(actions, vec!["create", "delete", "getAll", "getById", "update"]);

    let get_by_id = logs["items"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["action"] == "getById")
        .unwrap();
    assert_eq!(get_by_id["params"]["id"], id.as_str());

    let delete = logs["items"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["action"] == "delete")
        .unwrap();
    assert!(delete["response"].is_null());
}

#[tokio::test]
async fn invalid_client_input_is_rejected_and_not_audited() {
    let server = TestServer::in_memory().await;
    let client = reqwest::Client::new();
    let token = login(&client, &server, "linus").await;

    let res = client
        .post(server.url("/client"))
        .bearer_auth(&token)
        .json(&json!({ "name": "Acme", "salary": -1, "companyValue": 0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(server.url("/client/not-a-uuid"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let res = client
        .get(server.url("/log"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["total"], 0);
}

/// Queue backend that is down: every call fails.
struct DownQueue;

#[async_trait]
impl JobQueue for DownQueue {
    async fn enqueue(
        &self,
        _queue: &str,
        _name: &str,
        _payload: serde_json::Value,
        _options: &JobOptions,
    ) -> Result<JobId, QueueError> {
        Err(QueueError::Unavailable("connection refused".to_string()))
    }

    async fn claim_next(&self, _queue: &str, _lease: Duration) -> Result<Option<Job>, QueueError> {
        Err(QueueError::Unavailable("connection refused".to_string()))
    }

    async fn settle(&self, _job: &Job) -> Result<(), QueueError> {
        Err(QueueError::Unavailable("connection refused".to_string()))
    }

    async fn recover_stalled(&self, _queue: &str) -> Result<usize, QueueError> {
        Err(QueueError::Unavailable("connection refused".to_string()))
    }

    async fn get(&self, _queue: &str, _id: JobId) -> Result<Option<Job>, QueueError> {
        Err(QueueError::Unavailable("connection refused".to_string()))
    }

    async fn counts(&self, _queue: &str) -> Result<JobCounts, QueueError> {
        Err(QueueError::Unavailable("connection refused".to_string()))
    }

    async fn list(&self, _queue: &str, _state: JobState, _limit: usize) -> Result<Vec<Job>, QueueError> {
        Err(QueueError::Unavailable("connection refused".to_string()))
    }

    async fn retry_failed(&self, _queue: &str, _id: JobId) -> Result<Job, QueueError> {
        Err(QueueError::Unavailable("connection refused".to_string()))
    }

    async fn close(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[tokio::test]
async fn queue_outage_does_not_change_responses() {
    let backends = Backends {
        queue: Arc::new(DownQueue),
        ..Backends::in_memory()
    };
    let server = TestServer::spawn(backends, test_config(&[]), false).await;
    let client = reqwest::Client::new();
    let token = login(&client, &server, "ada").await;

    let res = client
        .post(server.url("/client"))
        .bearer_auth(&token)
        .json(&json!({ "name": "Acme", "salary": 1, "companyValue": 2 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["name"], "Acme");
    assert_eq!(body["companyValue"], 2.0);

    // The dashboard reports the outage instead.
    let res = client
        .get(server.url("/admin/queues"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn dashboard_lists_and_retries_jobs() {
    // No worker: jobs stay waiting.
    let server = TestServer::spawn(Backends::in_memory(), test_config(&[]), false).await;
    let client = reqwest::Client::new();
    let token = login(&client, &server, "ada").await;

    let res = client
        .post(server.url("/client"))
        .bearer_auth(&token)
        .json(&json!({ "name": "Acme", "salary": 1, "companyValue": 2 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let mut waiting = serde_json::Value::Null;
    for _ in 0..100 {
        let res = client
            .get(server.url("/admin/queues/logs/jobs?state=waiting"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = res.json().await.unwrap();
        if body["jobs"].as_array().is_some_and(|jobs| !jobs.is_empty()) {
            waiting = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let job = &waiting["jobs"][0];
    assert_eq!(job["name"], "log");
    assert_eq!(job["payload"]["action"], "create");
    let job_id = job["id"].as_str().expect("job id").to_string();

    let res = client
        .get(server.url(&format!("/admin/queues/logs/jobs/{job_id}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // Only failed jobs can be retried.
    let res = client
        .post(server.url(&format!("/admin/queues/logs/jobs/{job_id}/retry")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = client
        .get(server.url("/admin/queues/other/jobs"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(server.url("/admin/queues/logs/jobs?state=sleeping"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}
