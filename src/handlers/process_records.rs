use axum::{
    extract::{Json, Path, State},
    response::Response,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::{created_response, success_response, validate_input, AppState};
use crate::errors::ServiceError;
use crate::models::{
    measurement::StageMeasurement,
    process_record::{NewProcessRecord, ProcessRecord, QuantityMismatch},
    stage::ProcessType,
};
use crate::services::process_mirror::ProcessEvent;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProcessRecordRequest {
    pub order_id: Uuid,
    #[validate(range(min = 1))]
    pub stage_number: u32,
    pub process_type: ProcessType,
    #[validate(length(min = 1, max = 64))]
    pub lot_number: String,
    #[serde(default)]
    pub party_name: String,
    #[serde(default)]
    pub measurement: Option<StageMeasurement>,
}

/// Record plus its process-specific view.
#[derive(Debug, Serialize)]
pub struct ProcessRecordResponse {
    #[serde(flatten)]
    pub record: ProcessRecord,
    pub measurement: StageMeasurement,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mismatch: Option<QuantityMismatch>,
}

impl ProcessRecordResponse {
    fn new(record: ProcessRecord, mismatch: Option<QuantityMismatch>) -> Self {
        let measurement = record.measurement();
        Self {
            record,
            measurement,
            mismatch,
        }
    }
}

/// Create a process record and link it to its stage
async fn create_process_record(
    State(state): State<AppState>,
    Json(payload): Json<CreateProcessRecordRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;

    let record = state
        .services
        .process_mirror
        .create_record(NewProcessRecord {
            order_id: payload.order_id,
            stage_number: payload.stage_number,
            process_type: payload.process_type,
            lot_number: payload.lot_number,
            party_name: payload.party_name,
            measurement: payload.measurement,
        })
        .await?;

    info!("Process record created: {}", record.id);
    Ok(created_response(ProcessRecordResponse::new(record, None)))
}

async fn get_process_record(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let record = state.services.process_mirror.get_record(record_id).await?;
    Ok(success_response(ProcessRecordResponse::new(record, None)))
}

async fn record_measurement(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
    Json(payload): Json<StageMeasurement>,
) -> Result<Response, ServiceError> {
    let (record, mismatch) = state
        .services
        .process_mirror
        .record_measurement(record_id, payload)
        .await?;
    Ok(success_response(ProcessRecordResponse::new(record, mismatch)))
}

/// Apply a lifecycle event reported by a process module
async fn handle_process_event(
    State(state): State<AppState>,
    Json(payload): Json<ProcessEvent>,
) -> Result<Response, ServiceError> {
    let outcome = state.services.process_mirror.handle_event(payload).await?;
    Ok(success_response(outcome))
}

/// Creates the router for process record endpoints
pub fn process_record_routes() -> Router<AppState> {
    Router::new()
        .route("/process-records", post(create_process_record))
        .route("/process-records/:record_id", get(get_process_record))
        .route(
            "/process-records/:record_id/measurements",
            post(record_measurement),
        )
        .route("/process-events", post(handle_process_event))
}
