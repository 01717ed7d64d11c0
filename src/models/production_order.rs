//! Production order aggregate and its derived summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::stage::{ProcessType, Stage, StageStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Planned,
    InProgress,
    Completed,
    OnHold,
    Cancelled,
}

/// Stage definition supplied when an order is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStage {
    pub process_type: ProcessType,
    #[serde(default)]
    pub planned_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub planned_end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProductionOrder {
    pub order_number: String,
    pub product_name: String,
    pub company_id: String,
    pub stages: Vec<NewStage>,
}

/// A manufacturing order and its ordered stages.
///
/// This is the only place stages are mutated. `overall_status` and
/// `progress_percentage` are recomputed from the stage list inside the same
/// call that writes a stage and are never set from outside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionOrder {
    id: Uuid,
    order_number: String,
    product_name: String,
    company_id: String,
    stages: Vec<Stage>,
    overall_status: OrderStatus,
    progress_percentage: u8,
    revision: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Read model returned by `get_order_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusView {
    pub order_id: Uuid,
    pub overall_status: OrderStatus,
    pub progress_percentage: u8,
    pub out_of_sequence_stages: Vec<u32>,
    pub revision: u64,
    pub stages: Vec<Stage>,
}

impl ProductionOrder {
    pub fn create(input: CreateProductionOrder, now: DateTime<Utc>) -> Result<Self, ServiceError> {
        if input.order_number.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Order number cannot be empty".to_string(),
            ));
        }
        if input.stages.is_empty() {
            return Err(ServiceError::ValidationError(
                "A production order needs at least one stage".to_string(),
            ));
        }

        let mut stages = Vec::with_capacity(input.stages.len());
        for (index, definition) in input.stages.into_iter().enumerate() {
            let stage_number = index as u32 + 1;
            if let (Some(start), Some(end)) =
                (definition.planned_start_time, definition.planned_end_time)
            {
                if end < start {
                    return Err(ServiceError::ValidationError(format!(
                        "Stage {} planned end ({}) is before planned start ({})",
                        stage_number, end, start
                    )));
                }
            }

            let mut stage = Stage::new(stage_number, definition.process_type);
            stage.timing.planned_start_time = definition.planned_start_time;
            stage.timing.planned_end_time = definition.planned_end_time;
            stages.push(stage);
        }

        let mut order = Self {
            id: Uuid::new_v4(),
            order_number: input.order_number.trim().to_string(),
            product_name: input.product_name,
            company_id: input.company_id,
            stages,
            overall_status: OrderStatus::Planned,
            progress_percentage: 0,
            revision: 0,
            created_at: now,
            updated_at: now,
        };
        order.refresh_summary();
        Ok(order)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn product_name(&self) -> &str {
        &self.product_name
    }

    pub fn company_id(&self) -> &str {
        &self.company_id
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn overall_status(&self) -> OrderStatus {
        self.overall_status
    }

    pub fn progress_percentage(&self) -> u8 {
        self.progress_percentage
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn stage(&self, stage_number: u32) -> Result<&Stage, ServiceError> {
        stage_index(stage_number)
            .and_then(|index| self.stages.get(index))
            .ok_or_else(|| self.stage_not_found(stage_number))
    }

    /// Runs `mutation` against one stage. On success the stage and order
    /// revisions are bumped and the summary fields re-derived; on failure
    /// nothing changes.
    pub fn apply_to_stage<F>(
        &mut self,
        stage_number: u32,
        now: DateTime<Utc>,
        mutation: F,
    ) -> Result<&Stage, ServiceError>
    where
        F: FnOnce(&mut Stage) -> Result<(), ServiceError>,
    {
        let index = stage_index(stage_number)
            .filter(|index| *index < self.stages.len())
            .ok_or_else(|| self.stage_not_found(stage_number))?;

        let mut scratch = self.stages[index].clone();
        mutation(&mut scratch)?;
        scratch.revision += 1;

        self.stages[index] = scratch;
        self.revision += 1;
        self.updated_at = now;
        self.refresh_summary();
        Ok(&self.stages[index])
    }

    /// Stages completed while an earlier, non-cancelled stage was not.
    /// Reported, never enforced: factories do run stages out of order.
    pub fn out_of_sequence_stages(&self) -> Vec<u32> {
        let mut flagged = Vec::new();
        let mut earlier_open = false;
        for stage in &self.stages {
            if stage.status == StageStatus::Completed && earlier_open {
                flagged.push(stage.stage_number);
            }
            if !matches!(stage.status, StageStatus::Completed | StageStatus::Cancelled) {
                earlier_open = true;
            }
        }
        flagged
    }

    /// True when some earlier, non-cancelled stage has not completed yet.
    pub fn has_open_predecessor(&self, stage_number: u32) -> bool {
        self.stages
            .iter()
            .take_while(|stage| stage.stage_number < stage_number)
            .any(|stage| {
                !matches!(stage.status, StageStatus::Completed | StageStatus::Cancelled)
            })
    }

    pub fn status_view(&self) -> OrderStatusView {
        OrderStatusView {
            order_id: self.id,
            overall_status: self.overall_status,
            progress_percentage: self.progress_percentage,
            out_of_sequence_stages: self.out_of_sequence_stages(),
            revision: self.revision,
            stages: self.stages.clone(),
        }
    }

    /// Rejects documents whose stage list or ledgers are inconsistent.
    pub fn check_integrity(&self) -> Result<(), ServiceError> {
        for (index, stage) in self.stages.iter().enumerate() {
            if stage.stage_number as usize != index + 1 {
                return Err(ServiceError::InternalError(format!(
                    "Order {} has stage {} at position {}",
                    self.id,
                    stage.stage_number,
                    index + 1
                )));
            }
            if !stage.quantities.is_balanced() {
                return Err(ServiceError::InternalError(format!(
                    "Order {} stage {} quantities are not balanced",
                    self.id, stage.stage_number
                )));
            }
        }
        if self.overall_status != derive_overall_status(&self.stages)
            || self.progress_percentage != derive_progress_percentage(&self.stages)
        {
            return Err(ServiceError::InternalError(format!(
                "Order {} summary does not match its stages",
                self.id
            )));
        }
        Ok(())
    }

    fn refresh_summary(&mut self) {
        self.overall_status = derive_overall_status(&self.stages);
        self.progress_percentage = derive_progress_percentage(&self.stages);
    }

    fn stage_not_found(&self, stage_number: u32) -> ServiceError {
        ServiceError::NotFound(format!(
            "Stage {} not found on production order {}",
            stage_number, self.id
        ))
    }
}

fn stage_index(stage_number: u32) -> Option<usize> {
    (stage_number as usize).checked_sub(1)
}

/// Overall order status; first matching rule wins.
pub fn derive_overall_status(stages: &[Stage]) -> OrderStatus {
    let any = |wanted: &[StageStatus]| stages.iter().any(|s| wanted.contains(&s.status));

    if stages.iter().all(|s| s.status == StageStatus::Cancelled) {
        return OrderStatus::Cancelled;
    }
    if any(&[StageStatus::OnHold, StageStatus::QualityHold]) && !any(&[StageStatus::InProgress]) {
        return OrderStatus::OnHold;
    }
    if stages
        .iter()
        .filter(|s| s.status != StageStatus::Cancelled)
        .all(|s| s.status == StageStatus::Completed)
    {
        return OrderStatus::Completed;
    }
    if any(&[
        StageStatus::InProgress,
        StageStatus::Completed,
        StageStatus::OnHold,
        StageStatus::QualityHold,
    ]) {
        return OrderStatus::InProgress;
    }
    OrderStatus::Planned
}

/// Completed share of non-cancelled stages, rounded half up.
pub fn derive_progress_percentage(stages: &[Stage]) -> u8 {
    let active = stages
        .iter()
        .filter(|s| s.status != StageStatus::Cancelled)
        .count() as u64;
    if active == 0 {
        return 0;
    }
    let completed = stages
        .iter()
        .filter(|s| s.status == StageStatus::Completed)
        .count() as u64;

    ((completed * 200 + active) / (active * 2)) as u8
}
