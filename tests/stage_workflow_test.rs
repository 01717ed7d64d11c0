mod common;

use assert_matches::assert_matches;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use stageflow_api::{
    errors::ServiceError,
    events::Event,
    models::{
        measurement::StageMeasurement,
        production_order::OrderStatus,
        stage::{HoldKind, HoldReason, StageAction, StageStatus},
    },
    services::production_orders::StageTransitionData,
};

use common::{drain_events, in_memory_state, three_stage_order};

fn measured(measurement: StageMeasurement) -> StageTransitionData {
    StageTransitionData {
        measurement: Some(measurement),
        ..StageTransitionData::default()
    }
}

#[tokio::test]
async fn three_stage_order_reports_progress_as_stages_complete() {
    let (state, _events) = in_memory_state();
    let service = state.production_order_service();

    let order = service.create_order(three_stage_order()).await.unwrap();
    let view = service.get_order_status(order.id()).await.unwrap();
    assert_eq!(view.overall_status, OrderStatus::Planned);
    assert_eq!(view.progress_percentage, 0);
    assert!(view
        .stages
        .iter()
        .all(|stage| stage.status == StageStatus::Pending));

    let stage = service
        .start_stage(order.id(), 1, StageTransitionData::default())
        .await
        .unwrap();
    assert_eq!(stage.status, StageStatus::InProgress);
    assert!(stage.timing.actual_start_time.is_some());

    let view = service.get_order_status(order.id()).await.unwrap();
    assert_eq!(view.overall_status, OrderStatus::InProgress);
    assert_eq!(view.progress_percentage, 0);

    service.record_input(order.id(), 1, dec!(100)).await.unwrap();
    let stage = service
        .complete_stage(
            order.id(),
            1,
            measured(StageMeasurement::Knitting {
                yarn_issued_kg: None,
                fabric_kg: dec!(100),
                waste_kg: dec!(0),
            }),
        )
        .await
        .unwrap();
    assert_eq!(stage.status, StageStatus::Completed);
    assert_eq!(stage.quantities.pending(), Decimal::ZERO);
    assert!(stage.quantities.is_fully_consumed());
    assert!(stage.timing.actual_end_time.is_some());

    let view = service.get_order_status(order.id()).await.unwrap();
    assert_eq!(view.progress_percentage, 33);
    assert_eq!(view.overall_status, OrderStatus::InProgress);
}

#[tokio::test]
async fn partial_completion_leaves_pending_and_blocks_second_completion() {
    let (state, _events) = in_memory_state();
    let service = state.production_order_service();
    let order = service.create_order(three_stage_order()).await.unwrap();

    service.record_input(order.id(), 2, dec!(50)).await.unwrap();
    service
        .start_stage(order.id(), 2, StageTransitionData::default())
        .await
        .unwrap();

    let stage = service
        .complete_stage(
            order.id(),
            2,
            measured(StageMeasurement::Dyeing {
                received_meter: None,
                dyed_meter: dec!(30),
                rejected_meter: dec!(5),
            }),
        )
        .await
        .unwrap();
    assert_eq!(stage.status, StageStatus::Completed);
    assert_eq!(stage.quantities.pending(), dec!(15));

    let again = service
        .complete_stage(
            order.id(),
            2,
            measured(StageMeasurement::Dyeing {
                received_meter: None,
                dyed_meter: dec!(50),
                rejected_meter: dec!(5),
            }),
        )
        .await;
    assert_matches!(
        again,
        Err(ServiceError::InvalidTransition {
            stage_number: 2,
            from: StageStatus::Completed,
            action: StageAction::Complete,
        })
    );

    // The failed retry wrote nothing.
    let stage = service.get_order(order.id()).await.unwrap().stage(2).unwrap().clone();
    assert_eq!(stage.quantities.output(), dec!(30));
    assert_eq!(stage.quantities.pending(), dec!(15));
}

#[tokio::test]
async fn quality_hold_and_resume_round_trip() {
    let (state, _events) = in_memory_state();
    let service = state.production_order_service();
    let order = service.create_order(three_stage_order()).await.unwrap();
    service
        .start_stage(order.id(), 2, StageTransitionData::default())
        .await
        .unwrap();

    let held = service
        .hold_stage(
            order.id(),
            2,
            HoldReason::parse("quality_hold").unwrap(),
            Some("inspector-7".into()),
        )
        .await
        .unwrap();
    assert_eq!(held.status, StageStatus::QualityHold);
    assert_eq!(
        held.hold_reason.as_ref().map(|r| r.kind),
        Some(HoldKind::Quality)
    );
    assert_eq!(held.last_operator.as_deref(), Some("inspector-7"));

    let view = service.get_order_status(order.id()).await.unwrap();
    assert_eq!(view.overall_status, OrderStatus::OnHold);

    let resumed = service
        .resume_stage(order.id(), 2, StageTransitionData::default())
        .await
        .unwrap();
    assert_eq!(resumed.status, StageStatus::InProgress);
    assert!(resumed.hold_reason.is_none());
}

#[tokio::test]
async fn over_output_is_rejected_and_nothing_is_written() {
    let (state, _events) = in_memory_state();
    let service = state.production_order_service();
    let order = service.create_order(three_stage_order()).await.unwrap();
    service
        .start_stage(
            order.id(),
            3,
            StageTransitionData {
                input_quantity: Some(dec!(100)),
                ..StageTransitionData::default()
            },
        )
        .await
        .unwrap();
    let before = service.get_order(order.id()).await.unwrap();

    let result = service
        .complete_stage(
            order.id(),
            3,
            measured(StageMeasurement::Washing {
                received_meter: None,
                washed_meter: dec!(96),
                shrinkage_meter: dec!(5),
            }),
        )
        .await;
    assert_matches!(result, Err(ServiceError::QuantityInvariantViolation(_)));

    let after = service.get_order(order.id()).await.unwrap();
    assert_eq!(after.revision(), before.revision());
    assert_eq!(after.stage(3).unwrap().status, StageStatus::InProgress);

    // Boundary equality is fine.
    let stage = service
        .complete_stage(
            order.id(),
            3,
            measured(StageMeasurement::Washing {
                received_meter: None,
                washed_meter: dec!(95),
                shrinkage_meter: dec!(5),
            }),
        )
        .await
        .unwrap();
    assert_eq!(stage.quantities.pending(), Decimal::ZERO);
}

#[tokio::test]
async fn cancelled_stage_freezes_quantities_and_drops_out_of_progress() {
    let (state, _events) = in_memory_state();
    let service = state.production_order_service();
    let order = service.create_order(three_stage_order()).await.unwrap();

    service.record_input(order.id(), 3, dec!(40)).await.unwrap();
    let cancelled = service
        .cancel_stage(order.id(), 3, "washing outsourced".into(), None)
        .await
        .unwrap();
    assert_eq!(cancelled.status, StageStatus::Cancelled);
    assert_eq!(cancelled.cancel_reason.as_deref(), Some("washing outsourced"));

    assert_matches!(
        service.record_input(order.id(), 3, dec!(60)).await,
        Err(ServiceError::InvalidTransition { .. })
    );
    assert_matches!(
        service.record_output(order.id(), 3, dec!(10), dec!(0)).await,
        Err(ServiceError::InvalidTransition { .. })
    );

    for stage_number in [1, 2] {
        service
            .start_stage(order.id(), stage_number, StageTransitionData::default())
            .await
            .unwrap();
        service
            .complete_stage(order.id(), stage_number, StageTransitionData::default())
            .await
            .unwrap();
    }

    let view = service.get_order_status(order.id()).await.unwrap();
    assert_eq!(view.overall_status, OrderStatus::Completed);
    assert_eq!(view.progress_percentage, 100);
}

#[tokio::test]
async fn out_of_order_completion_is_flagged_not_blocked() {
    let (state, _events) = in_memory_state();
    let service = state.production_order_service();
    let order = service.create_order(three_stage_order()).await.unwrap();

    service
        .start_stage(order.id(), 2, StageTransitionData::default())
        .await
        .unwrap();
    service
        .complete_stage(order.id(), 2, StageTransitionData::default())
        .await
        .unwrap();

    let view = service.get_order_status(order.id()).await.unwrap();
    assert_eq!(view.out_of_sequence_stages, vec![2]);
    assert_eq!(view.progress_percentage, 33);
}

#[tokio::test]
async fn unknown_order_and_stage_are_not_found() {
    let (state, _events) = in_memory_state();
    let service = state.production_order_service();
    let order = service.create_order(three_stage_order()).await.unwrap();

    assert_matches!(
        service.get_order_status(uuid::Uuid::new_v4()).await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        service
            .start_stage(order.id(), 4, StageTransitionData::default())
            .await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn transitions_are_published_with_operator() {
    let (state, mut events) = in_memory_state();
    let service = state.production_order_service();
    let order = service.create_order(three_stage_order()).await.unwrap();

    service
        .start_stage(order.id(), 1, StageTransitionData::with_operator("op-12"))
        .await
        .unwrap();

    let events = drain_events(&mut events);
    assert_matches!(events.first(), Some(Event::ProductionOrderCreated { stage_count: 3, .. }));
    assert!(events.iter().any(|event| matches!(
        event,
        Event::StageTransitioned {
            stage_number: 1,
            action: StageAction::Start,
            from: StageStatus::Pending,
            to: StageStatus::InProgress,
            operator: Some(op),
            ..
        } if op == "op-12"
    )));
}

#[tokio::test]
async fn revisions_increase_with_every_mutation() {
    let (state, _events) = in_memory_state();
    let service = state.production_order_service();
    let order = service.create_order(three_stage_order()).await.unwrap();
    assert_eq!(order.revision(), 0);

    let started = service
        .start_stage(order.id(), 1, StageTransitionData::default())
        .await
        .unwrap();
    service.record_input(order.id(), 1, dec!(10)).await.unwrap();
    service
        .start_stage(order.id(), 2, StageTransitionData::default())
        .await
        .unwrap();

    let order = service.get_order(order.id()).await.unwrap();
    assert_eq!(order.revision(), 3);
    assert_eq!(started.revision, 1);
    assert_eq!(order.stage(1).unwrap().revision, 2);
    assert_eq!(order.stage(2).unwrap().revision, 1);
}
