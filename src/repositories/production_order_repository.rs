use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{BaseRepository, ProductionOrderRepository};
use crate::entities::production_order::{self, Entity as ProductionOrderEntity};
use crate::errors::ServiceError;
use crate::models::production_order::ProductionOrder;

/// SeaORM-backed order store (SQLite or Postgres).
#[derive(Debug, Clone)]
pub struct ProductionOrderStore {
    base: BaseRepository,
}

impl ProductionOrderStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    fn to_document(order: &ProductionOrder) -> Result<serde_json::Value, ServiceError> {
        Ok(serde_json::to_value(order)?)
    }

    fn from_model(model: production_order::Model) -> Result<ProductionOrder, ServiceError> {
        let order: ProductionOrder = serde_json::from_value(model.document)?;
        if order.revision() as i64 != model.revision {
            return Err(ServiceError::InternalError(format!(
                "Production order {} document revision {} disagrees with row revision {}",
                model.id,
                order.revision(),
                model.revision
            )));
        }
        order.check_integrity()?;
        Ok(order)
    }
}

#[async_trait]
impl ProductionOrderRepository for ProductionOrderStore {
    #[instrument(skip(self, order), fields(order_id = %order.id()))]
    async fn insert_order(&self, order: &ProductionOrder) -> Result<(), ServiceError> {
        let model = production_order::ActiveModel {
            id: Set(order.id()),
            order_number: Set(order.order_number().to_string()),
            company_id: Set(order.company_id().to_string()),
            overall_status: Set(order.overall_status().to_string()),
            revision: Set(order.revision() as i64),
            document: Set(Self::to_document(order)?),
            created_at: Set(order.created_at()),
            updated_at: Set(order.updated_at()),
        };
        model.insert(self.base.get_db()).await?;
        Ok(())
    }

    async fn load_order(&self, order_id: Uuid) -> Result<Option<ProductionOrder>, ServiceError> {
        ProductionOrderEntity::find_by_id(order_id)
            .one(self.base.get_db())
            .await?
            .map(Self::from_model)
            .transpose()
    }

    #[instrument(skip(self, order), fields(order_id = %order.id()))]
    async fn save_order(
        &self,
        order: &ProductionOrder,
        expected_revision: u64,
    ) -> Result<(), ServiceError> {
        let result = ProductionOrderEntity::update_many()
            .col_expr(
                production_order::Column::Document,
                Expr::value(Self::to_document(order)?),
            )
            .col_expr(
                production_order::Column::OverallStatus,
                Expr::value(order.overall_status().to_string()),
            )
            .col_expr(
                production_order::Column::Revision,
                Expr::value(order.revision() as i64),
            )
            .col_expr(
                production_order::Column::UpdatedAt,
                Expr::value(order.updated_at()),
            )
            .filter(production_order::Column::Id.eq(order.id()))
            .filter(production_order::Column::Revision.eq(expected_revision as i64))
            .exec(self.base.get_db())
            .await?;

        if result.rows_affected == 1 {
            return Ok(());
        }

        let exists = ProductionOrderEntity::find_by_id(order.id())
            .one(self.base.get_db())
            .await?
            .is_some();
        if exists {
            debug!(expected_revision, "revision check failed");
            Err(ServiceError::ConcurrentModification(order.id()))
        } else {
            Err(ServiceError::NotFound(format!(
                "Production order {} not found",
                order.id()
            )))
        }
    }
}
