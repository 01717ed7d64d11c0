use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{
    process_record::QuantityMismatch,
    quantity::StageQuantities,
    stage::{StageAction, StageStatus},
};

/// Sender half of the audit/event channel.
///
/// Transitions publish through [`EventSender::publish`], which never waits and
/// never fails the caller: a full or closed channel is logged and dropped.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Fire-and-forget publish
    pub fn publish(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            warn!("Dropping audit event: {}", e);
        }
    }
}

// Events emitted by the production workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ProductionOrderCreated {
        order_id: Uuid,
        order_number: String,
        stage_count: usize,
    },
    StageTransitioned {
        order_id: Uuid,
        stage_number: u32,
        action: StageAction,
        from: StageStatus,
        to: StageStatus,
        operator: Option<String>,
        at: DateTime<Utc>,
    },
    StageQuantitiesRecorded {
        order_id: Uuid,
        stage_number: u32,
        quantities: StageQuantities,
    },
    ProcessRecordCreated {
        record_id: Uuid,
        order_id: Uuid,
        stage_number: u32,
    },
    ProcessRecordMeasured {
        record_id: Uuid,
        quantities: StageQuantities,
    },
    QuantityMismatch(QuantityMismatch),
}

impl Event {
    pub fn order_id(&self) -> Option<Uuid> {
        match self {
            Event::ProductionOrderCreated { order_id, .. }
            | Event::StageTransitioned { order_id, .. }
            | Event::StageQuantitiesRecorded { order_id, .. }
            | Event::ProcessRecordCreated { order_id, .. } => Some(*order_id),
            Event::QuantityMismatch(mismatch) => Some(mismatch.order_id),
            Event::ProcessRecordMeasured { .. } => None,
        }
    }
}

/// Drains the event channel into the structured log, which is the audit
/// trail until an external sink is attached.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::StageTransitioned {
                order_id,
                stage_number,
                action,
                from,
                to,
                operator,
                at,
            } => info!(
                target: "audit",
                %order_id,
                stage_number,
                %action,
                %from,
                %to,
                operator = operator.as_deref().unwrap_or("-"),
                %at,
                "stage transition"
            ),
            Event::QuantityMismatch(mismatch) => warn!(
                target: "audit",
                order_id = %mismatch.order_id,
                stage_number = mismatch.stage_number,
                record_id = %mismatch.record_id,
                "quantity mismatch reconciled from process record"
            ),
            other => info!(target: "audit", order_id = ?other.order_id(), event = ?other, "event"),
        }
    }

    info!("Event processing loop stopped");
}
