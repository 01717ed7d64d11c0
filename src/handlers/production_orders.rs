use axum::{
    extract::{Json, Path, State},
    response::Response,
    routing::{get, post},
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::{created_response, success_response, validate_input, AppState};
use crate::errors::ServiceError;
use crate::models::{
    production_order::{CreateProductionOrder, NewStage},
    stage::HoldReason,
};
use crate::services::production_orders::StageTransitionData;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductionOrderRequest {
    #[validate(length(min = 1, max = 64))]
    pub order_number: String,
    #[validate(length(min = 1))]
    pub product_name: String,
    #[validate(length(min = 1))]
    pub company_id: String,
    #[validate(length(min = 1, max = 64))]
    pub stages: Vec<NewStage>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct HoldStageRequest {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
    #[serde(default)]
    pub operator: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CancelStageRequest {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
    #[serde(default)]
    pub operator: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecordInputRequest {
    pub quantity: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct RecordOutputRequest {
    pub output: Decimal,
    #[serde(default)]
    pub loss: Decimal,
}

type StagePath = Path<(Uuid, u32)>;

/// Create a production order
async fn create_production_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateProductionOrderRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;

    let order = state
        .services
        .production_orders
        .create_order(CreateProductionOrder {
            order_number: payload.order_number,
            product_name: payload.product_name,
            company_id: payload.company_id,
            stages: payload.stages,
        })
        .await?;

    info!("Production order created: {}", order.id());
    Ok(created_response(order.status_view()))
}

/// Get a production order with derived status and progress
async fn get_production_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let view = state
        .services
        .production_orders
        .get_order_status(order_id)
        .await?;
    Ok(success_response(view))
}

async fn start_stage(
    State(state): State<AppState>,
    Path((order_id, stage_number)): StagePath,
    Json(payload): Json<StageTransitionData>,
) -> Result<Response, ServiceError> {
    let stage = state
        .services
        .production_orders
        .start_stage(order_id, stage_number, payload)
        .await?;
    Ok(success_response(stage))
}

async fn complete_stage(
    State(state): State<AppState>,
    Path((order_id, stage_number)): StagePath,
    Json(payload): Json<StageTransitionData>,
) -> Result<Response, ServiceError> {
    let stage = state
        .services
        .production_orders
        .complete_stage(order_id, stage_number, payload)
        .await?;
    Ok(success_response(stage))
}

async fn hold_stage(
    State(state): State<AppState>,
    Path((order_id, stage_number)): StagePath,
    Json(payload): Json<HoldStageRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    let reason = HoldReason::parse(&payload.reason)?;

    let stage = state
        .services
        .production_orders
        .hold_stage(order_id, stage_number, reason, payload.operator)
        .await?;
    Ok(success_response(stage))
}

async fn resume_stage(
    State(state): State<AppState>,
    Path((order_id, stage_number)): StagePath,
    Json(payload): Json<StageTransitionData>,
) -> Result<Response, ServiceError> {
    let stage = state
        .services
        .production_orders
        .resume_stage(order_id, stage_number, payload)
        .await?;
    Ok(success_response(stage))
}

async fn cancel_stage(
    State(state): State<AppState>,
    Path((order_id, stage_number)): StagePath,
    Json(payload): Json<CancelStageRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;

    let stage = state
        .services
        .production_orders
        .cancel_stage(
            order_id,
            stage_number,
            payload.reason.trim().to_string(),
            payload.operator,
        )
        .await?;
    Ok(success_response(stage))
}

async fn record_stage_input(
    State(state): State<AppState>,
    Path((order_id, stage_number)): StagePath,
    Json(payload): Json<RecordInputRequest>,
) -> Result<Response, ServiceError> {
    let stage = state
        .services
        .production_orders
        .record_input(order_id, stage_number, payload.quantity)
        .await?;
    Ok(success_response(stage))
}

async fn record_stage_output(
    State(state): State<AppState>,
    Path((order_id, stage_number)): StagePath,
    Json(payload): Json<RecordOutputRequest>,
) -> Result<Response, ServiceError> {
    let stage = state
        .services
        .production_orders
        .record_output(order_id, stage_number, payload.output, payload.loss)
        .await?;
    Ok(success_response(stage))
}

/// Creates the router for production order endpoints
pub fn production_order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_production_order))
        .route("/:order_id", get(get_production_order))
        .route("/:order_id/stages/:stage_number/start", post(start_stage))
        .route("/:order_id/stages/:stage_number/complete", post(complete_stage))
        .route("/:order_id/stages/:stage_number/hold", post(hold_stage))
        .route("/:order_id/stages/:stage_number/resume", post(resume_stage))
        .route("/:order_id/stages/:stage_number/cancel", post(cancel_stage))
        .route("/:order_id/stages/:stage_number/input", post(record_stage_input))
        .route("/:order_id/stages/:stage_number/output", post(record_stage_output))
}
