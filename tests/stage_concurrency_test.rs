mod common;

use futures::future::join_all;
use rust_decimal_macros::dec;
use stageflow_api::{
    errors::ServiceError,
    models::{measurement::StageMeasurement, stage::StageStatus},
    services::production_orders::StageTransitionData,
};
use std::sync::Arc;

use common::{in_memory_state, three_stage_order};

fn washing_finish(washed: rust_decimal::Decimal) -> StageTransitionData {
    StageTransitionData {
        measurement: Some(StageMeasurement::Washing {
            received_meter: Some(dec!(100)),
            washed_meter: washed,
            shrinkage_meter: dec!(4),
        }),
        ..StageTransitionData::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_completions_of_one_stage_have_a_single_winner() {
    let (state, _events) = in_memory_state();
    let service = state.production_order_service();
    let order = service.create_order(three_stage_order()).await.unwrap();
    service
        .start_stage(order.id(), 3, StageTransitionData::default())
        .await
        .unwrap();

    let attempts = (0..8).map(|i| {
        let service = Arc::clone(&service);
        let order_id = order.id();
        tokio::spawn(async move {
            service
                .complete_stage(
                    order_id,
                    3,
                    washing_finish(dec!(80) + rust_decimal::Decimal::from(i)),
                )
                .await
        })
    });

    let mut winners = 0;
    for result in join_all(attempts).await {
        match result.expect("task panicked") {
            Ok(stage) => {
                winners += 1;
                assert_eq!(stage.status, StageStatus::Completed);
            }
            Err(ServiceError::InvalidTransition { .. })
            | Err(ServiceError::ConcurrencyTimeout { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners, 1);

    let stage = service.get_order(order.id()).await.unwrap().stage(3).unwrap().clone();
    assert_eq!(stage.status, StageStatus::Completed);
    assert_eq!(stage.revision, 2);
    assert!(stage.quantities.is_balanced());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sibling_stages_commit_concurrently_without_lost_updates() {
    let (state, _events) = in_memory_state();
    let service = state.production_order_service();
    let order = service.create_order(three_stage_order()).await.unwrap();

    let starts = (1..=3).map(|stage_number| {
        let service = Arc::clone(&service);
        let order_id = order.id();
        tokio::spawn(async move {
            service
                .start_stage(order_id, stage_number, StageTransitionData::default())
                .await
        })
    });
    for result in join_all(starts).await {
        result.expect("task panicked").expect("start should succeed");
    }

    let order = service.get_order(order.id()).await.unwrap();
    assert_eq!(order.revision(), 3);
    assert!(order
        .stages()
        .iter()
        .all(|stage| stage.status == StageStatus::InProgress));
}

#[tokio::test]
async fn held_stage_lock_surfaces_concurrency_timeout() {
    let (state, _events) = in_memory_state();
    let service = state.production_order_service();
    let order = service.create_order(three_stage_order()).await.unwrap();

    let _guard = service.locks().acquire(order.id(), 1).await.unwrap();
    let result = service
        .start_stage(order.id(), 1, StageTransitionData::default())
        .await;
    assert!(matches!(
        result,
        Err(ServiceError::ConcurrencyTimeout { stage_number: 1, .. })
    ));

    // Other stages of the same order are unaffected.
    assert!(service
        .start_stage(order.id(), 2, StageTransitionData::default())
        .await
        .is_ok());
}
