//! Stage state machine.
//!
//! `StageStatus::next` is the transition table; `Stage` applies it together
//! with timing, hold and cancel bookkeeping.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::measurement::QuantityUpdate;
use crate::models::quantity::StageQuantities;

/// Processing step a stage performs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProcessType {
    Knitting,
    Dyeing,
    Printing,
    Washing,
    Finishing,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Completed,
    OnHold,
    QualityHold,
    Cancelled,
}

impl StageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Cancelled)
    }

    pub fn is_held(self) -> bool {
        matches!(self, StageStatus::OnHold | StageStatus::QualityHold)
    }

    /// Transition table. `None` means the action is illegal from `self`.
    pub fn next(self, action: StageAction) -> Option<StageStatus> {
        use StageAction as A;
        use StageStatus as S;

        match (self, action) {
            (S::Pending, A::Start) => Some(S::InProgress),
            (S::InProgress, A::Complete) => Some(S::Completed),
            (S::InProgress, A::Hold) => Some(S::OnHold),
            (S::InProgress, A::QualityHold) => Some(S::QualityHold),
            (S::OnHold | S::QualityHold, A::Resume) => Some(S::InProgress),
            (status, A::Cancel) if !status.is_terminal() => Some(S::Cancelled),
            _ => None,
        }
    }
}

/// Operations accepted by the stage state machine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StageAction {
    Start,
    Complete,
    Hold,
    QualityHold,
    Resume,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HoldKind {
    Operational,
    Quality,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldReason {
    pub kind: HoldKind,
    pub description: String,
}

impl HoldReason {
    /// Parses an operator-entered reason. Text starting with "quality"
    /// (e.g. `quality_hold`, `Quality: shade mismatch`) marks a quality hold.
    pub fn parse(raw: &str) -> Result<Self, ServiceError> {
        let description = raw.trim();
        if description.is_empty() {
            return Err(ServiceError::ValidationError(
                "Hold reason cannot be empty".to_string(),
            ));
        }

        let kind = if description.to_ascii_lowercase().starts_with("quality") {
            HoldKind::Quality
        } else {
            HoldKind::Operational
        };

        Ok(Self {
            kind,
            description: description.to_string(),
        })
    }

    pub fn operational(description: impl Into<String>) -> Self {
        Self {
            kind: HoldKind::Operational,
            description: description.into(),
        }
    }

    pub fn quality(description: impl Into<String>) -> Self {
        Self {
            kind: HoldKind::Quality,
            description: description.into(),
        }
    }

    pub fn action(&self) -> StageAction {
        match self.kind {
            HoldKind::Operational => StageAction::Hold,
            HoldKind::Quality => StageAction::QualityHold,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTiming {
    pub planned_start_time: Option<DateTime<Utc>>,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub planned_end_time: Option<DateTime<Utc>>,
    pub actual_end_time: Option<DateTime<Utc>>,
}

/// One ordered processing step of a production order.
///
/// The methods below are the whole state machine. Each either moves the
/// stage to a defined next state or returns `InvalidTransition` and leaves
/// the stage untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub stage_number: u32,
    pub process_type: ProcessType,
    pub status: StageStatus,
    pub timing: StageTiming,
    pub quantities: StageQuantities,
    pub hold_reason: Option<HoldReason>,
    pub cancel_reason: Option<String>,
    pub process_record_id: Option<Uuid>,
    pub last_operator: Option<String>,
    pub revision: u64,
}

impl Stage {
    pub fn new(stage_number: u32, process_type: ProcessType) -> Self {
        Self {
            stage_number,
            process_type,
            status: StageStatus::Pending,
            timing: StageTiming::default(),
            quantities: StageQuantities::default(),
            hold_reason: None,
            cancel_reason: None,
            process_record_id: None,
            last_operator: None,
            revision: 0,
        }
    }

    fn next_status(&self, action: StageAction) -> Result<StageStatus, ServiceError> {
        self.status
            .next(action)
            .ok_or(ServiceError::InvalidTransition {
                stage_number: self.stage_number,
                from: self.status,
                action,
            })
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), ServiceError> {
        self.status = self.next_status(StageAction::Start)?;
        self.timing.actual_start_time = Some(now);
        Ok(())
    }

    /// Completes the stage. Quantity data is applied to a scratch copy of the
    /// ledger first so a conservation failure leaves the stage unchanged.
    pub fn complete(
        &mut self,
        update: Option<&QuantityUpdate>,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let next = self.next_status(StageAction::Complete)?;

        let mut ledger = self.quantities;
        if let Some(update) = update {
            update.apply_to(&mut ledger)?;
        }

        self.quantities = ledger;
        self.status = next;
        self.timing.actual_end_time = Some(now);
        Ok(())
    }

    pub fn hold(&mut self, reason: HoldReason) -> Result<(), ServiceError> {
        self.status = self.next_status(reason.action())?;
        self.hold_reason = Some(reason);
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), ServiceError> {
        self.status = self.next_status(StageAction::Resume)?;
        self.hold_reason = None;
        Ok(())
    }

    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), ServiceError> {
        self.status = self.next_status(StageAction::Cancel)?;
        self.hold_reason = None;
        self.cancel_reason = Some(reason.into());
        Ok(())
    }

    /// Input is fixed once the stage leaves `pending`/`in_progress`.
    pub fn record_input(&mut self, quantity: Decimal) -> Result<(), ServiceError> {
        self.ensure_quantities_open(StageAction::Start)?;
        self.quantities.record_input(quantity)
    }

    pub fn record_output(&mut self, output: Decimal, loss: Decimal) -> Result<(), ServiceError> {
        self.ensure_quantities_open(StageAction::Complete)?;
        self.quantities.record_output(output, loss)
    }

    fn ensure_quantities_open(&self, action: StageAction) -> Result<(), ServiceError> {
        match self.status {
            StageStatus::Pending | StageStatus::InProgress => Ok(()),
            from => Err(ServiceError::InvalidTransition {
                stage_number: self.stage_number,
                from,
                action,
            }),
        }
    }
}
