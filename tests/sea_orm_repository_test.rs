mod common;

use assert_matches::assert_matches;
use chrono::Utc;
use rust_decimal_macros::dec;
use stageflow_api::{
    db::{establish_connection_with_config, run_migrations, DbConfig},
    errors::ServiceError,
    models::{
        measurement::StageMeasurement,
        process_record::{NewProcessRecord, ProcessRecord},
        production_order::ProductionOrder,
        stage::{ProcessType, StageStatus},
    },
    repositories::{
        ProcessRecordRepository, ProcessRecordStore, ProductionOrderRepository,
        ProductionOrderStore,
    },
    services::production_orders::StageTransitionData,
    AppState,
};
use std::sync::Arc;

use common::{test_config, three_stage_order};

async fn sqlite() -> Arc<sea_orm::DatabaseConnection> {
    // A single connection keeps every query on the same in-memory database.
    let config = DbConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        ..DbConfig::default()
    };
    let db = establish_connection_with_config(&config)
        .await
        .expect("sqlite connection");
    run_migrations(&db).await.expect("migrations");
    Arc::new(db)
}

#[tokio::test]
async fn order_store_round_trips_and_checks_revision() {
    let db = sqlite().await;
    let store = ProductionOrderStore::new(db);

    let mut order = ProductionOrder::create(three_stage_order(), Utc::now()).unwrap();
    store.insert_order(&order).await.unwrap();

    let loaded = store.load_order(order.id()).await.unwrap().expect("stored order");
    assert_eq!(loaded.id(), order.id());
    assert_eq!(loaded.stages(), order.stages());
    assert_eq!(loaded.revision(), 0);

    order
        .apply_to_stage(1, Utc::now(), |stage| stage.start(Utc::now()))
        .unwrap();
    store.save_order(&order, 0).await.unwrap();

    // A writer still holding revision 0 loses.
    assert_matches!(
        store.save_order(&order, 0).await,
        Err(ServiceError::ConcurrentModification(id)) if id == order.id()
    );

    let loaded = store.load_order(order.id()).await.unwrap().expect("stored order");
    assert_eq!(loaded.revision(), 1);
    assert_eq!(loaded.stage(1).unwrap().status, StageStatus::InProgress);
}

#[tokio::test]
async fn saving_an_unknown_order_is_not_found() {
    let store = ProductionOrderStore::new(sqlite().await);
    let order = ProductionOrder::create(three_stage_order(), Utc::now()).unwrap();

    assert_matches!(store.save_order(&order, 0).await, Err(ServiceError::NotFound(_)));
    assert!(store.load_order(order.id()).await.unwrap().is_none());
}

#[tokio::test]
async fn record_store_is_unique_per_stage() {
    let db = sqlite().await;
    let orders = ProductionOrderStore::new(db.clone());
    let records = ProcessRecordStore::new(db);

    let order = ProductionOrder::create(three_stage_order(), Utc::now()).unwrap();
    orders.insert_order(&order).await.unwrap();

    let new_record = || NewProcessRecord {
        order_id: order.id(),
        stage_number: 2,
        process_type: ProcessType::Dyeing,
        lot_number: "LOT-12".to_string(),
        party_name: "Riverside Dye House".to_string(),
        measurement: None,
    };

    let mut record = ProcessRecord::create(new_record(), StageStatus::Pending, Utc::now()).unwrap();
    records.insert_record(&record).await.unwrap();

    let duplicate = ProcessRecord::create(new_record(), StageStatus::Pending, Utc::now()).unwrap();
    assert_matches!(
        records.insert_record(&duplicate).await,
        Err(ServiceError::ValidationError(_))
    );

    let found = records
        .find_for_stage(order.id(), 2)
        .await
        .unwrap()
        .expect("record for stage 2");
    assert_eq!(found.id, record.id);
    assert!(records.find_for_stage(order.id(), 3).await.unwrap().is_none());

    record
        .apply_measurement(
            &StageMeasurement::Dyeing {
                received_meter: Some(dec!(60)),
                dyed_meter: dec!(55),
                rejected_meter: dec!(1),
            },
            Utc::now(),
        )
        .unwrap();
    record.revision += 1;
    records.save_record(&record, 0).await.unwrap();
    assert_matches!(
        records.save_record(&record, 0).await,
        Err(ServiceError::ConcurrentModification(_))
    );

    let loaded = records.load_record(record.id).await.unwrap().expect("record");
    assert_eq!(loaded.quantities, record.quantities);
    assert_eq!(loaded.quantities.pending(), dec!(4));
}

#[tokio::test]
async fn services_run_over_the_database_backend() {
    let db = sqlite().await;
    let state = AppState::new(
        test_config(),
        Arc::new(ProductionOrderStore::new(db.clone())),
        Arc::new(ProcessRecordStore::new(db)),
        None,
    );
    let service = state.production_order_service();

    let order = service.create_order(three_stage_order()).await.unwrap();
    service
        .start_stage(
            order.id(),
            1,
            StageTransitionData {
                input_quantity: Some(dec!(40)),
                ..StageTransitionData::default()
            },
        )
        .await
        .unwrap();
    let stage = service
        .complete_stage(
            order.id(),
            1,
            StageTransitionData {
                measurement: Some(StageMeasurement::Knitting {
                    yarn_issued_kg: None,
                    fabric_kg: dec!(38),
                    waste_kg: dec!(2),
                }),
                ..StageTransitionData::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(stage.status, StageStatus::Completed);

    let view = service.get_order_status(order.id()).await.unwrap();
    assert_eq!(view.progress_percentage, 33);
    assert_eq!(view.revision, 2);
}
