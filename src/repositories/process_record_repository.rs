use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use super::{BaseRepository, ProcessRecordRepository};
use crate::entities::process_record::{self, Entity as ProcessRecordEntity};
use crate::errors::ServiceError;
use crate::models::process_record::ProcessRecord;

/// SeaORM-backed process record store.
#[derive(Debug, Clone)]
pub struct ProcessRecordStore {
    base: BaseRepository,
}

impl ProcessRecordStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    fn from_model(model: process_record::Model) -> Result<ProcessRecord, ServiceError> {
        let record: ProcessRecord = serde_json::from_value(model.document)?;
        if !record.quantities.is_balanced() {
            return Err(ServiceError::InternalError(format!(
                "Process record {} quantities are not balanced",
                record.id
            )));
        }
        Ok(record)
    }
}

#[async_trait]
impl ProcessRecordRepository for ProcessRecordStore {
    async fn insert_record(&self, record: &ProcessRecord) -> Result<(), ServiceError> {
        if self
            .find_for_stage(record.order_id, record.stage_number)
            .await?
            .is_some()
        {
            return Err(ServiceError::ValidationError(format!(
                "Stage {} of order {} already has a process record",
                record.stage_number, record.order_id
            )));
        }

        let model = process_record::ActiveModel {
            id: Set(record.id),
            order_id: Set(record.order_id),
            stage_number: Set(record.stage_number as i32),
            process_type: Set(record.process_type.to_string()),
            lot_number: Set(record.lot_number.clone()),
            revision: Set(record.revision as i64),
            document: Set(serde_json::to_value(record)?),
            created_at: Set(record.created_at),
            updated_at: Set(record.updated_at),
        };
        model.insert(self.base.get_db()).await?;
        Ok(())
    }

    async fn load_record(&self, record_id: Uuid) -> Result<Option<ProcessRecord>, ServiceError> {
        ProcessRecordEntity::find_by_id(record_id)
            .one(self.base.get_db())
            .await?
            .map(Self::from_model)
            .transpose()
    }

    async fn find_for_stage(
        &self,
        order_id: Uuid,
        stage_number: u32,
    ) -> Result<Option<ProcessRecord>, ServiceError> {
        ProcessRecordEntity::find()
            .filter(process_record::Column::OrderId.eq(order_id))
            .filter(process_record::Column::StageNumber.eq(stage_number as i32))
            .one(self.base.get_db())
            .await?
            .map(Self::from_model)
            .transpose()
    }

    async fn save_record(
        &self,
        record: &ProcessRecord,
        expected_revision: u64,
    ) -> Result<(), ServiceError> {
        let result = ProcessRecordEntity::update_many()
            .col_expr(
                process_record::Column::Document,
                Expr::value(serde_json::to_value(record)?),
            )
            .col_expr(
                process_record::Column::Revision,
                Expr::value(record.revision as i64),
            )
            .col_expr(
                process_record::Column::UpdatedAt,
                Expr::value(record.updated_at),
            )
            .filter(process_record::Column::Id.eq(record.id))
            .filter(process_record::Column::Revision.eq(expected_revision as i64))
            .exec(self.base.get_db())
            .await?;

        match result.rows_affected {
            1 => Ok(()),
            _ if self.load_record(record.id).await?.is_some() => {
                Err(ServiceError::ConcurrentModification(record.id))
            }
            _ => Err(ServiceError::NotFound(format!(
                "Process record {} not found",
                record.id
            ))),
        }
    }
}
