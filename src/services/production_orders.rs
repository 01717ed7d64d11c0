//! Operator-facing stage operations over the production order aggregate.

use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    models::{
        measurement::{QuantityUpdate, StageMeasurement},
        production_order::{CreateProductionOrder, OrderStatusView, ProductionOrder},
        quantity::StageQuantities,
        stage::{HoldReason, Stage, StageAction, StageStatus},
    },
    repositories::ProductionOrderRepository,
    services::stage_locks::StageLocks,
};

/// Optional data carried by a stage transition request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransitionData {
    #[serde(default)]
    pub input_quantity: Option<Decimal>,
    #[serde(default)]
    pub measurement: Option<StageMeasurement>,
    #[serde(default)]
    pub operator: Option<String>,
}

impl StageTransitionData {
    pub fn with_operator(operator: impl Into<String>) -> Self {
        Self {
            operator: Some(operator.into()),
            ..Self::default()
        }
    }

    /// Folds the bare input quantity and the tagged measurement into one
    /// ledger update for `stage`.
    pub fn quantity_update(&self, stage: &Stage) -> Result<Option<QuantityUpdate>, ServiceError> {
        let measured = self
            .measurement
            .as_ref()
            .map(|m| m.validate_for(stage.process_type))
            .transpose()?;

        match (self.input_quantity, measured) {
            (None, measured) => Ok(measured),
            (Some(input), None) => Ok(Some(QuantityUpdate::new(
                Some(input),
                stage.quantities.output(),
                stage.quantities.loss(),
            ))),
            (Some(input), Some(update)) => match update.input {
                Some(measured_input) if measured_input != input => {
                    Err(ServiceError::ValidationError(format!(
                        "Input quantity {} conflicts with measured input {}",
                        input, measured_input
                    )))
                }
                _ => Ok(Some(QuantityUpdate::new(
                    Some(input),
                    update.output,
                    update.loss,
                ))),
            },
        }
    }
}

/// Result of one committed stage mutation.
struct StageChange {
    stage: Stage,
    from: StageStatus,
    had_open_predecessor: bool,
}

/// Entry point for operator-driven stage transitions.
///
/// Each mutation holds the stage's lock, loads the order, applies the change
/// and saves it with a revision check. A revision conflict from a sibling
/// stage is retried until the lock budget runs out.
#[derive(Clone)]
pub struct ProductionOrderService {
    repository: Arc<dyn ProductionOrderRepository>,
    locks: Arc<StageLocks>,
    retry_interval: Duration,
    event_sender: Option<EventSender>,
}

impl ProductionOrderService {
    pub fn new(
        repository: Arc<dyn ProductionOrderRepository>,
        locks: Arc<StageLocks>,
        retry_interval: Duration,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            repository,
            locks,
            retry_interval,
            event_sender,
        }
    }

    pub fn locks(&self) -> &Arc<StageLocks> {
        &self.locks
    }

    /// Creates a production order with all stages pending
    #[instrument(skip(self, input), fields(order_number = %input.order_number))]
    pub async fn create_order(
        &self,
        input: CreateProductionOrder,
    ) -> Result<ProductionOrder, ServiceError> {
        let order = ProductionOrder::create(input, Utc::now())?;
        self.repository.insert_order(&order).await?;

        counter!("production.orders.created", 1);
        info!(
            order_id = %order.id(),
            stages = order.stages().len(),
            "Production order created"
        );
        self.publish(Event::ProductionOrderCreated {
            order_id: order.id(),
            order_number: order.order_number().to_string(),
            stage_count: order.stages().len(),
        });
        Ok(order)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<ProductionOrder, ServiceError> {
        self.repository
            .load_order(order_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Production order {} not found", order_id))
            })
    }

    pub async fn get_order_status(&self, order_id: Uuid) -> Result<OrderStatusView, ServiceError> {
        Ok(self.get_order(order_id).await?.status_view())
    }

    /// Starts a pending stage. Input quantity or a measurement in `data` is
    /// recorded once the stage is in progress.
    #[instrument(skip(self, data))]
    pub async fn start_stage(
        &self,
        order_id: Uuid,
        stage_number: u32,
        data: StageTransitionData,
    ) -> Result<Stage, ServiceError> {
        self.transition(order_id, stage_number, StageAction::Start, &data, |stage, now| {
            stage.start(now)?;
            if let Some(update) = data.quantity_update(stage)? {
                update.apply_to(&mut stage.quantities)?;
            }
            Ok(())
        })
        .await
    }

    /// Completes an in-progress stage, applying any quantity data first.
    #[instrument(skip(self, data))]
    pub async fn complete_stage(
        &self,
        order_id: Uuid,
        stage_number: u32,
        data: StageTransitionData,
    ) -> Result<Stage, ServiceError> {
        self.transition(order_id, stage_number, StageAction::Complete, &data, |stage, now| {
            let update = data.quantity_update(stage)?;
            stage.complete(update.as_ref(), now)
        })
        .await
    }

    #[instrument(skip(self, operator))]
    pub async fn hold_stage(
        &self,
        order_id: Uuid,
        stage_number: u32,
        reason: HoldReason,
        operator: Option<String>,
    ) -> Result<Stage, ServiceError> {
        let action = reason.action();
        let data = StageTransitionData {
            operator,
            ..StageTransitionData::default()
        };
        self.transition(order_id, stage_number, action, &data, |stage, _| {
            stage.hold(reason.clone())
        })
        .await
    }

    #[instrument(skip(self, data))]
    pub async fn resume_stage(
        &self,
        order_id: Uuid,
        stage_number: u32,
        data: StageTransitionData,
    ) -> Result<Stage, ServiceError> {
        self.transition(order_id, stage_number, StageAction::Resume, &data, |stage, _| {
            stage.resume()?;
            if let Some(update) = data.quantity_update(stage)? {
                update.apply_to(&mut stage.quantities)?;
            }
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, operator))]
    pub async fn cancel_stage(
        &self,
        order_id: Uuid,
        stage_number: u32,
        reason: String,
        operator: Option<String>,
    ) -> Result<Stage, ServiceError> {
        let data = StageTransitionData {
            operator,
            ..StageTransitionData::default()
        };
        self.transition(order_id, stage_number, StageAction::Cancel, &data, |stage, _| {
            stage.cancel(reason.clone())
        })
        .await
    }

    /// Records (or corrects) the stage's input quantity.
    #[instrument(skip(self))]
    pub async fn record_input(
        &self,
        order_id: Uuid,
        stage_number: u32,
        quantity: Decimal,
    ) -> Result<Stage, ServiceError> {
        let change = self
            .mutate_stage(order_id, stage_number, |stage, _| stage.record_input(quantity))
            .await?;
        self.publish_quantities(order_id, &change.stage);
        Ok(change.stage)
    }

    /// Records cumulative output and loss figures.
    #[instrument(skip(self))]
    pub async fn record_output(
        &self,
        order_id: Uuid,
        stage_number: u32,
        output: Decimal,
        loss: Decimal,
    ) -> Result<Stage, ServiceError> {
        let change = self
            .mutate_stage(order_id, stage_number, |stage, _| {
                stage.record_output(output, loss)
            })
            .await?;
        self.publish_quantities(order_id, &change.stage);
        Ok(change.stage)
    }

    /// Points the stage at its process record.
    pub async fn link_process_record(
        &self,
        order_id: Uuid,
        stage_number: u32,
        record_id: Uuid,
    ) -> Result<Stage, ServiceError> {
        let change = self
            .mutate_stage(order_id, stage_number, |stage, _| match stage.process_record_id {
                Some(existing) if existing != record_id => Err(ServiceError::ValidationError(
                    format!(
                        "Stage {} is already linked to process record {}",
                        stage.stage_number, existing
                    ),
                )),
                _ => {
                    stage.process_record_id = Some(record_id);
                    Ok(())
                }
            })
            .await?;
        Ok(change.stage)
    }

    /// Replaces the stage's quantities with figures reported by its process
    /// record. Cancelled stages are frozen.
    pub(crate) async fn overwrite_quantities(
        &self,
        order_id: Uuid,
        stage_number: u32,
        quantities: StageQuantities,
    ) -> Result<Stage, ServiceError> {
        let change = self
            .mutate_stage(order_id, stage_number, |stage, _| {
                if stage.status == StageStatus::Cancelled {
                    return Err(ServiceError::QuantityInvariantViolation(format!(
                        "Stage {} is cancelled; its quantities are frozen",
                        stage.stage_number
                    )));
                }
                if !quantities.is_balanced() {
                    return Err(ServiceError::QuantityInvariantViolation(format!(
                        "Reported quantities for stage {} do not balance",
                        stage.stage_number
                    )));
                }
                stage.quantities = quantities;
                Ok(())
            })
            .await?;
        self.publish_quantities(order_id, &change.stage);
        Ok(change.stage)
    }

    async fn transition<F>(
        &self,
        order_id: Uuid,
        stage_number: u32,
        action: StageAction,
        data: &StageTransitionData,
        mutation: F,
    ) -> Result<Stage, ServiceError>
    where
        F: Fn(&mut Stage, DateTime<Utc>) -> Result<(), ServiceError>,
    {
        let operator = data.operator.clone();
        let result = self
            .mutate_stage(order_id, stage_number, |stage, now| {
                mutation(stage, now)?;
                if operator.is_some() {
                    stage.last_operator = operator.clone();
                }
                Ok(())
            })
            .await;

        let change = match result {
            Ok(change) => change,
            Err(e) => {
                counter!(
                    "production.stage.transition_failures",
                    1,
                    "action" => action.to_string()
                );
                debug!(%order_id, stage_number, %action, error = %e, "stage transition rejected");
                return Err(e);
            }
        };

        counter!("production.stage.transitions", 1, "action" => action.to_string());
        if change.had_open_predecessor
            && matches!(action, StageAction::Start | StageAction::Complete)
        {
            info!(
                %order_id,
                stage_number,
                %action,
                "Stage moved while an earlier stage is still open"
            );
        }
        info!(
            %order_id,
            stage_number,
            from = %change.from,
            to = %change.stage.status,
            "Stage transitioned"
        );

        self.publish(Event::StageTransitioned {
            order_id,
            stage_number,
            action,
            from: change.from,
            to: change.stage.status,
            operator: data.operator.clone(),
            at: Utc::now(),
        });
        Ok(change.stage)
    }

    /// Serialized load-mutate-save for one stage.
    async fn mutate_stage<F>(
        &self,
        order_id: Uuid,
        stage_number: u32,
        mutation: F,
    ) -> Result<StageChange, ServiceError>
    where
        F: Fn(&mut Stage, DateTime<Utc>) -> Result<(), ServiceError>,
    {
        let guard = self.locks.acquire(order_id, stage_number).await?;
        let deadline = guard.acquired_at() + self.locks.timeout();

        loop {
            let mut order = self.get_order(order_id).await?;
            let expected_revision = order.revision();
            let from = order.stage(stage_number)?.status;
            let had_open_predecessor = order.has_open_predecessor(stage_number);

            let now = Utc::now();
            let stage = order
                .apply_to_stage(stage_number, now, |stage| mutation(stage, now))?
                .clone();

            match self.repository.save_order(&order, expected_revision).await {
                Ok(()) => {
                    return Ok(StageChange {
                        stage,
                        from,
                        had_open_predecessor,
                    })
                }
                Err(ServiceError::ConcurrentModification(_))
                    if Instant::now() + self.retry_interval < deadline =>
                {
                    debug!(
                        %order_id,
                        stage_number,
                        expected_revision,
                        "order revision moved, retrying"
                    );
                    tokio::time::sleep(self.retry_interval).await;
                }
                Err(ServiceError::ConcurrentModification(_)) => {
                    warn!(%order_id, stage_number, "gave up after repeated revision conflicts");
                    return Err(ServiceError::ConcurrencyTimeout {
                        order_id,
                        stage_number,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn publish_quantities(&self, order_id: Uuid, stage: &Stage) {
        self.publish(Event::StageQuantitiesRecorded {
            order_id,
            stage_number: stage.stage_number,
            quantities: stage.quantities,
        });
    }

    fn publish(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.publish(event);
        }
    }
}
