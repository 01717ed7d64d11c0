#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use stageflow_api::{
    build_router,
    config::AppConfig,
    events::{Event, EventSender},
    models::{
        production_order::{CreateProductionOrder, NewStage},
        stage::ProcessType,
    },
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;

/// Configuration with short lock budgets so timeouts surface quickly.
pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::new("127.0.0.1".to_string(), 18_080, "test".to_string());
    cfg.stage_lock_timeout_ms = 500;
    cfg.revision_retry_interval_ms = 2;
    cfg
}

/// In-memory application state plus the receiving end of its event channel.
pub fn in_memory_state() -> (AppState, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(256);
    let state = AppState::in_memory(test_config(), Some(EventSender::new(tx)));
    (state, rx)
}

pub fn order_with(process_types: &[ProcessType]) -> CreateProductionOrder {
    CreateProductionOrder {
        order_number: "PO-2024-0001".to_string(),
        product_name: "Cotton single jersey".to_string(),
        company_id: "acme-textiles".to_string(),
        stages: process_types
            .iter()
            .map(|process_type| NewStage {
                process_type: *process_type,
                planned_start_time: None,
                planned_end_time: None,
            })
            .collect(),
    }
}

/// Knitting, dyeing, washing.
pub fn three_stage_order() -> CreateProductionOrder {
    order_with(&[
        ProcessType::Knitting,
        ProcessType::Dyeing,
        ProcessType::Washing,
    ])
}

/// Drains whatever is currently buffered in the event channel.
pub fn drain_events(rx: &mut mpsc::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Router-level harness for HTTP tests.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _events: mpsc::Receiver<Event>,
}

impl TestApp {
    pub fn new() -> Self {
        let (state, events) = in_memory_state();
        Self {
            router: build_router(state.clone()),
            state,
            _events: events,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router response");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("response body")
            .to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body)).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None).await
    }
}
