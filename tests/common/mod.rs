#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Method, Request},
    middleware,
    response::Response,
    Router,
};
use chrono::{DateTime, Utc};
use dealership_api::{
    config::AppConfig,
    db,
    entities::{spk, SpkStatus},
    events::{self, EventSender},
    services::spks::{CreateSpkRequest, SpkResponse, SpkService},
    AppState,
};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// Helper harness for spinning up an application state backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
    // Declared last so the pool is dropped before the directory is removed.
    _db_dir: Option<TempDir>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // A single connection keeps every query on the same in-memory database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.cors_allow_any_origin = true;
        customize(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
        let event_task = tokio::spawn(events::process_events(event_rx));
        let state = AppState::new(Arc::new(pool), cfg, EventSender::new(event_tx));

        let router = Router::new()
            .nest("/api/v1", dealership_api::api_v1_routes())
            .layer(middleware::from_fn(
                dealership_api::middleware_helpers::request_id_middleware,
            ))
            .with_state(state.clone());

        Self {
            router,
            state,
            _event_task: event_task,
            _db_dir: None,
        }
    }

    /// A SQLite file with a pool of `max_connections`, so transactions
    /// really run on separate connections and can overlap.
    pub async fn file_backed(max_connections: u32) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("dealership.db").display()
        );
        let mut app = Self::with_config(move |cfg| {
            cfg.database_url = url;
            cfg.db_max_connections = max_connections;
            cfg.db_min_connections = 1;
        })
        .await;
        app._db_dir = Some(dir);
        app
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.state.db
    }

    pub fn spks(&self) -> Arc<SpkService> {
        self.state.services.spks.clone()
    }

    /// Creates an SPK through the service with a fixed creation instant.
    pub async fn create_at(&self, customer: &str, now: DateTime<Utc>) -> SpkResponse {
        self.spks()
            .create_spk_at(
                CreateSpkRequest {
                    customer_name: customer.to_string(),
                    ..Default::default()
                },
                now,
            )
            .await
            .expect("create SPK")
    }

    /// Writes a row directly, bypassing numbering and the guard.
    pub async fn insert_raw(&self, spk_number: &str, created_at: DateTime<Utc>) -> spk::Model {
        spk::ActiveModel {
            id: Set(Uuid::new_v4()),
            spk_number: Set(spk_number.to_string()),
            status: Set(SpkStatus::OnProgress),
            is_editable: Set(true),
            customer_name: Set(format!("raw {spk_number}")),
            customer_phone: Set(None),
            customer_email: Set(None),
            notes: Set(None),
            sales_id: Set(None),
            branch_id: Set(None),
            vehicle_type_id: Set(None),
            created_at: Set(created_at),
            updated_at: Set(None),
            version: Set(1),
        }
        .insert(self.db())
        .await
        .expect("insert raw SPK")
    }

    /// Send a request against the router.
    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        self.request_with_headers(method, uri, body, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    use chrono::TimeZone;
    Utc.with_ymd_and_hms(year, month, day, 9, 30, 0)
        .single()
        .expect("valid test timestamp")
}
