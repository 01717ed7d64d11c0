//! Per-process records mirrored from process modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::measurement::StageMeasurement;
use crate::models::quantity::StageQuantities;
use crate::models::stage::{ProcessType, StageStatus};

/// Specialized per-process entry (dyeing batch, printing job, washing entry)
/// describing the same physical lot as one stage of a production order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub id: Uuid,
    pub order_id: Uuid,
    pub stage_number: u32,
    pub process_type: ProcessType,
    pub lot_number: String,
    pub party_name: String,
    pub quantities: StageQuantities,
    pub stage_status: StageStatus,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProcessRecord {
    pub order_id: Uuid,
    pub stage_number: u32,
    pub process_type: ProcessType,
    pub lot_number: String,
    pub party_name: String,
    #[serde(default)]
    pub measurement: Option<StageMeasurement>,
}

/// Divergence found between a stage and its process record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityMismatch {
    pub order_id: Uuid,
    pub stage_number: u32,
    pub record_id: Uuid,
    pub stage_quantities: StageQuantities,
    pub record_quantities: StageQuantities,
}

impl ProcessRecord {
    pub fn create(
        input: NewProcessRecord,
        stage_status: StageStatus,
        now: DateTime<Utc>,
    ) -> Result<Self, ServiceError> {
        if input.lot_number.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Lot number cannot be empty".to_string(),
            ));
        }

        let mut record = Self {
            id: Uuid::new_v4(),
            order_id: input.order_id,
            stage_number: input.stage_number,
            process_type: input.process_type,
            lot_number: input.lot_number.trim().to_string(),
            party_name: input.party_name,
            quantities: StageQuantities::default(),
            stage_status,
            revision: 0,
            created_at: now,
            updated_at: now,
        };

        if let Some(measurement) = &input.measurement {
            record.apply_measurement(measurement, now)?;
        }
        Ok(record)
    }

    /// Applies a process-module measurement through the ledger. Incoming
    /// input is refused once the mirrored stage has finished.
    pub fn apply_measurement(
        &mut self,
        measurement: &StageMeasurement,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let update = measurement.validate_for(self.process_type)?;

        if update.input.is_some() && self.stage_status.is_terminal() {
            return Err(ServiceError::QuantityInvariantViolation(format!(
                "Input for lot {} is fixed: stage {} is {}",
                self.lot_number, self.stage_number, self.stage_status
            )));
        }

        update.apply_to(&mut self.quantities)?;
        self.updated_at = now;
        Ok(())
    }

    /// Process-specific view of the record's quantities.
    pub fn measurement(&self) -> StageMeasurement {
        StageMeasurement::from_quantities(self.process_type, &self.quantities)
    }

    /// True when nothing has been measured on this record yet.
    pub fn is_unmeasured(&self) -> bool {
        self.quantities == StageQuantities::default()
    }

    pub fn mismatch_with(&self, stage_quantities: &StageQuantities) -> Option<QuantityMismatch> {
        if self.quantities == *stage_quantities {
            return None;
        }
        Some(QuantityMismatch {
            order_id: self.order_id,
            stage_number: self.stage_number,
            record_id: self.id,
            stage_quantities: *stage_quantities,
            record_quantities: self.quantities,
        })
    }
}
