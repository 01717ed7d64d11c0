//! Stageflow API Library
//!
//! Production stage workflow for a manufacturing ERP: the per-stage state
//! machine, quantity ledger, production order aggregate and the mirror that
//! keeps process-module records in step with their stages.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod models;
pub mod repositories;
pub mod services;

use axum::{extract::State, response::Json, routing::get, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::events::EventSender;
use crate::repositories::{
    InMemoryProcessRecordRepository, InMemoryProductionOrderRepository, ProcessRecordRepository,
    ProductionOrderRepository,
};
use crate::services::{
    process_mirror::ProcessMirror, production_orders::ProductionOrderService,
    stage_locks::StageLocks,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: config::AppConfig,
    pub services: handlers::AppServices,
    pub event_sender: Option<EventSender>,
}

impl AppState {
    /// Wires the services over the given repositories.
    pub fn new(
        config: config::AppConfig,
        orders: Arc<dyn ProductionOrderRepository>,
        records: Arc<dyn ProcessRecordRepository>,
        event_sender: Option<EventSender>,
    ) -> Self {
        let locks = Arc::new(StageLocks::new(
            config.stage_lock_timeout(),
            config.lock_registry_prune_threshold,
        ));
        let production_orders = Arc::new(ProductionOrderService::new(
            orders,
            locks,
            config.revision_retry_interval(),
            event_sender.clone(),
        ));
        let process_mirror = Arc::new(ProcessMirror::new(
            production_orders.clone(),
            records,
            config.revision_retry_interval(),
            config.stage_lock_timeout(),
            event_sender.clone(),
        ));

        Self {
            config,
            services: handlers::AppServices::new(production_orders, process_mirror),
            event_sender,
        }
    }

    /// State backed by process-local storage
    pub fn in_memory(config: config::AppConfig, event_sender: Option<EventSender>) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryProductionOrderRepository::new()),
            Arc::new(InMemoryProcessRecordRepository::new()),
            event_sender,
        )
    }

    pub fn production_order_service(&self) -> Arc<ProductionOrderService> {
        self.services.production_orders.clone()
    }

    pub fn process_mirror(&self) -> Arc<ProcessMirror> {
        self.services.process_mirror.clone()
    }
}

// Common response wrappers
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: ResponseMeta::capture(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            meta: ResponseMeta::capture(),
        }
    }
}

/// Versioned API routes
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .nest(
            "/production-orders",
            handlers::production_orders::production_order_routes(),
        )
        .merge(handlers::process_records::process_record_routes())
}

/// Full application router with tracing, request ids and a request timeout
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_v1_routes())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    let health_data = json!({
        "status": "healthy",
        "service": "stageflow-api",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "storage_backend": state.config.storage_backend,
        "stage_locks": state.services.production_orders.locks().len(),
        "timestamp": Utc::now().to_rfc3339(),
    });

    Json(ApiResponse::success(health_data))
}
