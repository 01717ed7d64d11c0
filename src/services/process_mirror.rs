//! Synchronization between process modules, their records and the stages
//! they describe.

use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use strum::{Display, EnumString};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    models::{
        measurement::StageMeasurement,
        process_record::{NewProcessRecord, ProcessRecord, QuantityMismatch},
        stage::{HoldReason, Stage, StageAction, StageStatus},
    },
    repositories::ProcessRecordRepository,
    services::production_orders::{ProductionOrderService, StageTransitionData},
};

const DEFAULT_PAUSE_REASON: &str = "paused by process module";

/// Lifecycle signals emitted by a process module (dyeing house, washing
/// unit, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProcessEventKind {
    Begin,
    Finish,
    Pause,
    Continue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEvent {
    pub order_id: Uuid,
    pub stage_number: u32,
    pub event: ProcessEventKind,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub data: StageTransitionData,
}

#[derive(Debug, Clone, Serialize)]
pub struct MirrorOutcome {
    pub stage: Stage,
    pub applied: StageAction,
    pub mismatch: Option<QuantityMismatch>,
}

/// Keeps process records and the stages they describe in step.
///
/// Process-module events become stage transitions. After each one the
/// record's figures are compared with the stage's; the record is
/// authoritative unless the stage has been cancelled.
#[derive(Clone)]
pub struct ProcessMirror {
    orders: Arc<ProductionOrderService>,
    records: Arc<dyn ProcessRecordRepository>,
    retry_interval: Duration,
    retry_budget: Duration,
    event_sender: Option<EventSender>,
}

impl ProcessMirror {
    pub fn new(
        orders: Arc<ProductionOrderService>,
        records: Arc<dyn ProcessRecordRepository>,
        retry_interval: Duration,
        retry_budget: Duration,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            orders,
            records,
            retry_interval,
            retry_budget,
            event_sender,
        }
    }

    /// Applies a process-module event to its stage, then reconciles.
    #[instrument(
        skip(self, event),
        fields(
            order_id = %event.order_id,
            stage_number = event.stage_number,
            kind = %event.event
        )
    )]
    pub async fn handle_event(&self, event: ProcessEvent) -> Result<MirrorOutcome, ServiceError> {
        let ProcessEvent {
            order_id,
            stage_number,
            event,
            reason,
            data,
        } = event;

        let applied = match event {
            ProcessEventKind::Begin | ProcessEventKind::Continue => {
                self.begin_or_resume(order_id, stage_number, data).await?.1
            }
            ProcessEventKind::Pause => {
                let reason = HoldReason::parse(reason.as_deref().unwrap_or(DEFAULT_PAUSE_REASON))?;
                let action = reason.action();
                self.orders
                    .hold_stage(order_id, stage_number, reason, data.operator)
                    .await?;
                action
            }
            ProcessEventKind::Finish => {
                let measured = data.measurement.is_some();
                let stage = self
                    .orders
                    .complete_stage(order_id, stage_number, data)
                    .await?;
                if measured {
                    self.adopt_completed_stage(&stage, order_id).await?;
                }
                StageAction::Complete
            }
        };

        let (stage, mismatch) = self.reconcile(order_id, stage_number).await?;
        Ok(MirrorOutcome {
            stage,
            applied,
            mismatch,
        })
    }

    /// Resumes a held stage, or starts it when there is nothing to resume.
    pub async fn begin_or_resume(
        &self,
        order_id: Uuid,
        stage_number: u32,
        data: StageTransitionData,
    ) -> Result<(Stage, StageAction), ServiceError> {
        let status = self
            .orders
            .get_order(order_id)
            .await?
            .stage(stage_number)?
            .status;

        let action = begin_action(status);
        let stage = match action {
            StageAction::Resume => {
                self.orders
                    .resume_stage(order_id, stage_number, data)
                    .await?
            }
            _ => {
                debug!(%order_id, stage_number, %status, "nothing to resume, starting stage");
                self.orders.start_stage(order_id, stage_number, data).await?
            }
        };
        Ok((stage, action))
    }

    /// Creates the process record for a stage and links it.
    #[instrument(
        skip(self, input),
        fields(order_id = %input.order_id, stage_number = input.stage_number)
    )]
    pub async fn create_record(
        &self,
        input: NewProcessRecord,
    ) -> Result<ProcessRecord, ServiceError> {
        let order = self.orders.get_order(input.order_id).await?;
        let stage = order.stage(input.stage_number)?;
        if stage.process_type != input.process_type {
            return Err(ServiceError::ValidationError(format!(
                "Stage {} is a {} stage, not {}",
                stage.stage_number, stage.process_type, input.process_type
            )));
        }

        let (order_id, stage_number) = (input.order_id, input.stage_number);
        let record = ProcessRecord::create(input, stage.status, Utc::now())?;
        self.records.insert_record(&record).await?;
        self.orders
            .link_process_record(order_id, stage_number, record.id)
            .await?;

        info!(record_id = %record.id, lot_number = %record.lot_number, "Process record created");
        self.publish(Event::ProcessRecordCreated {
            record_id: record.id,
            order_id,
            stage_number,
        });

        if record.is_unmeasured() {
            return Ok(record);
        }
        self.reconcile(order_id, stage_number).await?;
        self.get_record(record.id).await
    }

    pub async fn get_record(&self, record_id: Uuid) -> Result<ProcessRecord, ServiceError> {
        self.records
            .load_record(record_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Process record {} not found", record_id))
            })
    }

    /// Applies an incremental measurement from the process module and pushes
    /// the result to the stage.
    #[instrument(skip(self, measurement))]
    pub async fn record_measurement(
        &self,
        record_id: Uuid,
        measurement: StageMeasurement,
    ) -> Result<(ProcessRecord, Option<QuantityMismatch>), ServiceError> {
        let record = self.measure(record_id, &measurement).await?;
        let (_, mismatch) = self.reconcile(record.order_id, record.stage_number).await?;
        Ok((self.get_record(record_id).await?, mismatch))
    }

    /// Compares a stage with its process record. The record wins: the
    /// stage's quantities are overwritten unless it is cancelled. The record's
    /// mirrored status is refreshed either way.
    #[instrument(skip(self))]
    pub async fn reconcile(
        &self,
        order_id: Uuid,
        stage_number: u32,
    ) -> Result<(Stage, Option<QuantityMismatch>), ServiceError> {
        let stage = self.orders.get_order(order_id).await?.stage(stage_number)?.clone();
        let Some(record) = self.records.find_for_stage(order_id, stage_number).await? else {
            return Ok((stage, None));
        };

        let mismatch = if record.is_unmeasured() {
            None
        } else {
            record.mismatch_with(&stage.quantities)
        };

        let stage = match &mismatch {
            Some(found) => {
                counter!("production.process.quantity_mismatches", 1);
                warn!(
                    %order_id,
                    stage_number,
                    record_id = %record.id,
                    stage_quantities = ?found.stage_quantities,
                    record_quantities = ?found.record_quantities,
                    "Stage quantities differ from process record"
                );
                self.publish(Event::QuantityMismatch(found.clone()));

                if stage.status == StageStatus::Cancelled {
                    debug!(%order_id, stage_number, "stage cancelled, keeping frozen quantities");
                    stage
                } else {
                    self.orders
                        .overwrite_quantities(order_id, stage_number, record.quantities)
                        .await?
                }
            }
            None => stage,
        };

        if record.stage_status != stage.status {
            let status = stage.status;
            let refreshed = self
                .update_record(record.id, |record| {
                    record.stage_status = status;
                    Ok(())
                })
                .await;
            if let Err(e) = refreshed {
                warn!(
                    record_id = %record.id,
                    error = %e,
                    "could not refresh mirrored stage status"
                );
            }
        }

        Ok((stage, mismatch))
    }

    /// Copies a just-completed stage onto its record. The finishing
    /// measurement was applied to the stage, so the record follows it.
    async fn adopt_completed_stage(
        &self,
        stage: &Stage,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        let Some(record) = self
            .records
            .find_for_stage(order_id, stage.stage_number)
            .await?
        else {
            return Ok(());
        };

        let record = self
            .update_record(record.id, |record| {
                record.stage_status = stage.status;
                record.quantities = stage.quantities;
                Ok(())
            })
            .await?;

        self.publish(Event::ProcessRecordMeasured {
            record_id: record.id,
            quantities: record.quantities,
        });
        Ok(())
    }

    /// Applies a measurement to a record after refreshing its mirrored stage
    /// status, so input is refused once the stage has finished.
    async fn measure(
        &self,
        record_id: Uuid,
        measurement: &StageMeasurement,
    ) -> Result<ProcessRecord, ServiceError> {
        let record = self.get_record(record_id).await?;
        let status = self
            .orders
            .get_order(record.order_id)
            .await?
            .stage(record.stage_number)?
            .status;

        let record = self
            .update_record(record_id, |record| {
                record.stage_status = status;
                record.apply_measurement(measurement, Utc::now())
            })
            .await?;

        self.publish(Event::ProcessRecordMeasured {
            record_id,
            quantities: record.quantities,
        });
        Ok(record)
    }

    /// Load-mutate-save on a record, retrying revision conflicts within the
    /// retry budget. An exhausted budget surfaces as `ConcurrencyTimeout`.
    async fn update_record<F>(
        &self,
        record_id: Uuid,
        mutation: F,
    ) -> Result<ProcessRecord, ServiceError>
    where
        F: Fn(&mut ProcessRecord) -> Result<(), ServiceError>,
    {
        let deadline = Instant::now() + self.retry_budget;
        loop {
            let mut record = self.get_record(record_id).await?;
            let expected_revision = record.revision;
            mutation(&mut record)?;
            record.revision += 1;
            record.updated_at = Utc::now();

            match self.records.save_record(&record, expected_revision).await {
                Ok(()) => return Ok(record),
                Err(ServiceError::ConcurrentModification(_))
                    if Instant::now() + self.retry_interval < deadline =>
                {
                    tokio::time::sleep(self.retry_interval).await;
                }
                Err(ServiceError::ConcurrentModification(_)) => {
                    warn!(%record_id, "gave up after repeated record revision conflicts");
                    return Err(ServiceError::ConcurrencyTimeout {
                        order_id: record.order_id,
                        stage_number: record.stage_number,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn publish(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.publish(event);
        }
    }
}

/// Transition a `Begin`/`Continue` event maps to for a stage in `status`.
fn begin_action(status: StageStatus) -> StageAction {
    if status.is_held() {
        StageAction::Resume
    } else {
        StageAction::Start
    }
}
