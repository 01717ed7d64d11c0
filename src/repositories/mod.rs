use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{process_record::ProcessRecord, production_order::ProductionOrder};

pub mod in_memory;
pub mod process_record_repository;
pub mod production_order_repository;

pub use in_memory::{InMemoryProcessRecordRepository, InMemoryProductionOrderRepository};
pub use process_record_repository::ProcessRecordStore;
pub use production_order_repository::ProductionOrderStore;

/// Persistence for production orders, one document per order.
///
/// `save_order` is a compare-and-swap: it succeeds only while the stored
/// revision still equals `expected_revision`, otherwise it returns
/// `ServiceError::ConcurrentModification`.
#[async_trait]
pub trait ProductionOrderRepository: Send + Sync {
    async fn insert_order(&self, order: &ProductionOrder) -> Result<(), ServiceError>;

    async fn load_order(&self, order_id: Uuid) -> Result<Option<ProductionOrder>, ServiceError>;

    async fn save_order(
        &self,
        order: &ProductionOrder,
        expected_revision: u64,
    ) -> Result<(), ServiceError>;
}

/// Persistence for process records, with the same revision contract.
#[async_trait]
pub trait ProcessRecordRepository: Send + Sync {
    async fn insert_record(&self, record: &ProcessRecord) -> Result<(), ServiceError>;

    async fn load_record(&self, record_id: Uuid) -> Result<Option<ProcessRecord>, ServiceError>;

    async fn find_for_stage(
        &self,
        order_id: Uuid,
        stage_number: u32,
    ) -> Result<Option<ProcessRecord>, ServiceError>;

    async fn save_record(
        &self,
        record: &ProcessRecord,
        expected_revision: u64,
    ) -> Result<(), ServiceError>;
}

/// Shared handle for the database-backed stores
#[derive(Debug, Clone)]
pub struct BaseRepository {
    db: Arc<DatabaseConnection>,
}

impl BaseRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub fn get_db(&self) -> &DatabaseConnection {
        &self.db
    }
}
