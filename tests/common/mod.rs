#![allow(dead_code)]

use std::process::{Child, Command, Stdio};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use yachtops_api::auth::{generate_jwt, Claims};
use yachtops_api::authz::Role;
use yachtops_api::config::AppConfig;
use yachtops_api::database::{EntityStore, MemoryStore};
use yachtops_api::{app, AppState};

/// Two vessels with a handful of rows each. `captain-y1` carries a denial
/// override and `former-crew` is soft-deleted.
pub fn seed() -> Value {
    json!({
        "tenants": [
            { "id": "Y1", "name": "Sea Breeze", "vessel_type": "motor", "deleted_at": null },
            { "id": "Y2", "name": "Blue Horizon", "vessel_type": "sail", "deleted_at": null }
        ],
        "users": [
            { "id": "owner-y1", "email": "owner@y1.test", "role": "OWNER", "tenant_id": "Y1", "permissions": null },
            { "id": "captain-y1", "email": "captain@y1.test", "role": "CAPTAIN", "tenant_id": "Y1",
              "permissions": "[\"-documents.delete\"]" },
            { "id": "manager-y1", "email": "manager@y1.test", "role": "MANAGER", "tenant_id": "Y1", "permissions": null },
            { "id": "crew-y1", "email": "crew@y1.test", "role": "CREW", "tenant_id": "Y1", "permissions": null },
            { "id": "former-crew", "email": "former@y1.test", "role": "CREW", "tenant_id": "Y1", "permissions": null,
              "deleted_at": "2026-01-01T00:00:00Z" },
            { "id": "owner-y2", "email": "owner@y2.test", "role": "OWNER", "tenant_id": "Y2", "permissions": null },
            { "id": "crew-y2", "email": "crew@y2.test", "role": "CREW", "tenant_id": "Y2", "permissions": null },
            { "id": "drifter", "email": "drifter@nowhere.test", "role": "CREW", "tenant_id": null, "permissions": null },
            { "id": "admin", "email": "admin@yachtops.test", "role": "ADMIN", "tenant_id": null, "permissions": null },
            { "id": "super", "email": "super@yachtops.test", "role": "SUPER_ADMIN", "tenant_id": null, "permissions": null }
        ],
        "expenses": [
            { "id": "e-y1-1", "tenant_id": "Y1", "title": "Diesel", "amount": 1200.0, "status": "pending",
              "submitted_by": "crew-y1", "deleted_at": null },
            { "id": "e-y1-2", "tenant_id": "Y1", "title": "Provisions", "amount": 300.0, "status": "approved",
              "submitted_by": "crew-y1", "approved_by": "owner-y1", "deleted_at": null },
            { "id": "e-y2-1", "tenant_id": "Y2", "title": "Sails", "amount": 5000.0, "status": "pending",
              "submitted_by": "crew-y2", "deleted_at": null }
        ],
        "inventory_items": [
            { "id": "i-y1-1", "tenant_id": "Y1", "name": "Oil filter", "quantity": 1, "min_level": 3 },
            { "id": "i-y1-2", "tenant_id": "Y1", "name": "Fenders", "quantity": 8, "min_level": 4 },
            { "id": "i-y2-1", "tenant_id": "Y2", "name": "Winch handle", "quantity": 2, "min_level": 1 }
        ],
        "maintenance_logs": [
            { "id": "ml-y1-1", "tenant_id": "Y1", "title": "Impeller swap", "deleted_at": null }
        ],
        "crew_documents": [
            { "id": "d-y1-1", "tenant_id": "Y1", "title": "STCW certificate", "user_id": "crew-y1", "deleted_at": null },
            { "id": "d-y2-1", "tenant_id": "Y2", "title": "Passport", "user_id": "crew-y2", "deleted_at": null }
        ],
        "tasks": [
            { "id": "t-y1-1", "tenant_id": "Y1", "title": "Wash down", "status": "open" },
            { "id": "t-y1-2", "tenant_id": "Y1", "title": "Polish brightwork", "status": "done" },
            { "id": "t-y2-1", "tenant_id": "Y2", "title": "Check rigging", "status": "open" }
        ],
        "messages": [
            { "id": "m-y1-1", "tenant_id": "Y1", "body": "Guests arrive at 1400", "sender_id": "captain-y1" }
        ]
    })
}

/// In-process application over a freshly seeded memory store.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

pub fn test_app() -> TestApp {
    let store = MemoryStore::from_seed(seed()).expect("seed data is valid");
    let state = AppState::new(AppConfig::development(), Arc::new(store));
    TestApp { router: app(state.clone()), state }
}

impl TestApp {
    /// Bearer token for a seeded user. The role and tenant claims are
    /// informational; the stored user record decides.
    pub fn token(&self, user_id: &str) -> String {
        self.token_with(Claims::with_ttl(
            user_id,
            format!("{}@token.test", user_id),
            &Role::Crew,
            None,
            chrono::Duration::hours(1),
        ))
    }

    /// Adds a row beyond the shared seed, for tests that need an unusual fixture.
    pub async fn insert(&self, table: &str, row: Value) {
        let record = row.as_object().cloned().expect("row is an object");
        self.state.store.insert(table, record).await.expect("row inserts");
    }

    pub fn token_with(&self, claims: Claims) -> String {
        generate_jwt(&claims, &self.state.config.security.jwt_secret).expect("token signs")
    }

    pub async fn request(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request builds");

        let response = self.router.clone().oneshot(request).await.expect("router is infallible");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body reads");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, body)
    }

    pub async fn get(&self, uri: &str, user_id: &str) -> (StatusCode, Value) {
        let token = self.token(user_id);
        self.request(Method::GET, uri, Some(&token), None).await
    }

    pub async fn send(&self, method: Method, uri: &str, user_id: &str, body: Value) -> (StatusCode, Value) {
        let token = self.token(user_id);
        self.request(method, uri, Some(&token), Some(body)).await
    }
}

/// Ids of the rows in a list response.
pub fn ids(body: &Value) -> Vec<String> {
    let mut ids: Vec<String> = body["data"]
        .as_array()
        .map(|rows| rows.iter().filter_map(|r| r["id"].as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    ids.sort();
    ids
}

static SERVER: OnceLock<TestServer> = OnceLock::new();

/// The real binary on a free port, backed by the memory store.
pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    child: Child,
}

impl TestServer {
    fn spawn() -> Result<Self> {
        // Pick an unused port for isolation
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);

        let mut cmd = Command::new(env!("CARGO_BIN_EXE_yachtops-api"));
        cmd.env("YACHTOPS_API_PORT", port.to_string())
            .env("APP_ENV", "development")
            .env("STORE_BACKEND", "memory")
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let child = cmd.spawn().context("failed to spawn server binary")?;

        Ok(Self { port, base_url, child })
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() > deadline {
                break;
            }
            let url = format!("{}/health", self.base_url);
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status() == reqwest::StatusCode::OK || resp.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }
}

pub async fn ensure_server() -> Result<&'static TestServer> {
    let server = SERVER.get_or_init(|| TestServer::spawn().expect("failed to spawn server binary"));
    server.wait_ready(Duration::from_secs(10)).await?;
    Ok(server)
}
