pub mod process_records;
pub mod production_orders;

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde::Serialize;
use std::sync::Arc;
use validator::Validate;

use crate::errors::ServiceError;
use crate::services::{process_mirror::ProcessMirror, production_orders::ProductionOrderService};
use crate::ApiResponse;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub production_orders: Arc<ProductionOrderService>,
    pub process_mirror: Arc<ProcessMirror>,
}

impl AppServices {
    pub fn new(
        production_orders: Arc<ProductionOrderService>,
        process_mirror: Arc<ProcessMirror>,
    ) -> Self {
        Self {
            production_orders,
            process_mirror,
        }
    }
}

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse::success(data))).into_response()
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input.validate().map_err(ServiceError::from)
}
