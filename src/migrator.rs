use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_production_orders_table::Migration),
            Box::new(m20240601_000002_create_process_records_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240601_000001_create_production_orders_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_production_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // One row per order; stages live inside the JSON document
            manager
                .create_table(
                    Table::create()
                        .table(ProductionOrders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ProductionOrders::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductionOrders::OrderNumber)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ProductionOrders::CompanyId).string().not_null())
                        .col(
                            ColumnDef::new(ProductionOrders::OverallStatus)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductionOrders::Revision)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(ProductionOrders::Document).json().not_null())
                        .col(
                            ColumnDef::new(ProductionOrders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductionOrders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_production_orders_company_status")
                        .table(ProductionOrders::Table)
                        .col(ProductionOrders::CompanyId)
                        .col(ProductionOrders::OverallStatus)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ProductionOrders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum ProductionOrders {
        Table,
        Id,
        OrderNumber,
        CompanyId,
        OverallStatus,
        Revision,
        Document,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000002_create_process_records_table {

    use super::m20240601_000001_create_production_orders_table::ProductionOrders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_process_records_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ProcessRecords::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ProcessRecords::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ProcessRecords::OrderId).uuid().not_null())
                        .col(
                            ColumnDef::new(ProcessRecords::StageNumber)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProcessRecords::ProcessType)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ProcessRecords::LotNumber).string().not_null())
                        .col(
                            ColumnDef::new(ProcessRecords::Revision)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(ProcessRecords::Document).json().not_null())
                        .col(
                            ColumnDef::new(ProcessRecords::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProcessRecords::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_process_records_order_id")
                                .from(ProcessRecords::Table, ProcessRecords::OrderId)
                                .to(ProductionOrders::Table, ProductionOrders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // At most one record per stage
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_process_records_order_stage")
                        .table(ProcessRecords::Table)
                        .col(ProcessRecords::OrderId)
                        .col(ProcessRecords::StageNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ProcessRecords::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ProcessRecords {
        Table,
        Id,
        OrderId,
        StageNumber,
        ProcessType,
        LotNumber,
        Revision,
        Document,
        CreatedAt,
        UpdatedAt,
    }
}
