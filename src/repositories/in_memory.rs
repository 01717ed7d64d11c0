//! Process-local stores with the same revision contract as the database.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::{ProcessRecordRepository, ProductionOrderRepository};
use crate::errors::ServiceError;
use crate::models::{process_record::ProcessRecord, production_order::ProductionOrder};

/// Process-local order store. Each compare-and-swap runs under the map's
/// shard lock for that key.
#[derive(Debug, Default)]
pub struct InMemoryProductionOrderRepository {
    orders: DashMap<Uuid, ProductionOrder>,
}

impl InMemoryProductionOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[async_trait]
impl ProductionOrderRepository for InMemoryProductionOrderRepository {
    async fn insert_order(&self, order: &ProductionOrder) -> Result<(), ServiceError> {
        match self.orders.entry(order.id()) {
            Entry::Occupied(_) => Err(ServiceError::ValidationError(format!(
                "Production order {} already exists",
                order.id()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(order.clone());
                Ok(())
            }
        }
    }

    async fn load_order(&self, order_id: Uuid) -> Result<Option<ProductionOrder>, ServiceError> {
        Ok(self.orders.get(&order_id).map(|entry| entry.value().clone()))
    }

    async fn save_order(
        &self,
        order: &ProductionOrder,
        expected_revision: u64,
    ) -> Result<(), ServiceError> {
        let mut stored = self.orders.get_mut(&order.id()).ok_or_else(|| {
            ServiceError::NotFound(format!("Production order {} not found", order.id()))
        })?;

        if stored.revision() != expected_revision {
            return Err(ServiceError::ConcurrentModification(order.id()));
        }
        *stored = order.clone();
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryProcessRecordRepository {
    records: DashMap<Uuid, ProcessRecord>,
    by_stage: DashMap<(Uuid, u32), Uuid>,
}

impl InMemoryProcessRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessRecordRepository for InMemoryProcessRecordRepository {
    async fn insert_record(&self, record: &ProcessRecord) -> Result<(), ServiceError> {
        match self.by_stage.entry((record.order_id, record.stage_number)) {
            Entry::Occupied(existing) => Err(ServiceError::ValidationError(format!(
                "Stage {} of order {} already has process record {}",
                record.stage_number,
                record.order_id,
                existing.get()
            ))),
            Entry::Vacant(slot) => {
                self.records.insert(record.id, record.clone());
                slot.insert(record.id);
                Ok(())
            }
        }
    }

    async fn load_record(&self, record_id: Uuid) -> Result<Option<ProcessRecord>, ServiceError> {
        Ok(self.records.get(&record_id).map(|entry| entry.value().clone()))
    }

    async fn find_for_stage(
        &self,
        order_id: Uuid,
        stage_number: u32,
    ) -> Result<Option<ProcessRecord>, ServiceError> {
        let record_id = match self.by_stage.get(&(order_id, stage_number)) {
            Some(entry) => *entry.value(),
            None => return Ok(None),
        };
        self.load_record(record_id).await
    }

    async fn save_record(
        &self,
        record: &ProcessRecord,
        expected_revision: u64,
    ) -> Result<(), ServiceError> {
        let mut stored = self.records.get_mut(&record.id).ok_or_else(|| {
            ServiceError::NotFound(format!("Process record {} not found", record.id))
        })?;

        if stored.revision != expected_revision {
            return Err(ServiceError::ConcurrentModification(record.id));
        }
        *stored = record.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::production_order::{CreateProductionOrder, NewStage};
    use crate::models::stage::ProcessType;
    use assert_matches::assert_matches;
    use chrono::Utc;

    fn order() -> ProductionOrder {
        ProductionOrder::create(
            CreateProductionOrder {
                order_number: "PO-7".into(),
                product_name: "Rib".into(),
                company_id: "acme".into(),
                stages: vec![NewStage {
                    process_type: ProcessType::Dyeing,
                    planned_start_time: None,
                    planned_end_time: None,
                }],
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn stale_revision_is_rejected() {
        let repo = InMemoryProductionOrderRepository::new();
        let mut order = order();
        repo.insert_order(&order).await.unwrap();

        let now = Utc::now();
        order.apply_to_stage(1, now, |s| s.start(now)).unwrap();
        repo.save_order(&order, 0).await.unwrap();

        assert_matches!(
            repo.save_order(&order, 0).await,
            Err(ServiceError::ConcurrentModification(_))
        );
        let stored = repo.load_order(order.id()).await.unwrap().unwrap();
        assert_eq!(stored.revision(), 1);
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let repo = InMemoryProductionOrderRepository::new();
        let order = order();
        repo.insert_order(&order).await.unwrap();
        assert_matches!(
            repo.insert_order(&order).await,
            Err(ServiceError::ValidationError(_))
        );
        assert_eq!(repo.len(), 1);
    }
}
