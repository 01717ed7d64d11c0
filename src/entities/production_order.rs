use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One production order stored as a JSON document. `revision` guards
/// compare-and-swap writes; the other columns are copies of document fields
/// kept for filtering.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "production_orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_number: String,
    pub company_id: String,
    pub overall_status: String,
    pub revision: i64,
    pub document: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::process_record::Entity")]
    ProcessRecords,
}

impl Related<super::process_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProcessRecords.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
