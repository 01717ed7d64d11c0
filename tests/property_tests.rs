//! Property-based tests for the stage workflow core.
//!
//! These cover the ledger balance, the over-output boundary, closure of the
//! stage state machine and determinism of the order summary.

use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use stageflow_api::errors::ServiceError;
use stageflow_api::models::{
    production_order::{derive_overall_status, derive_progress_percentage},
    quantity::StageQuantities,
    stage::{HoldReason, ProcessType, Stage, StageAction, StageStatus},
};
use strum::IntoEnumIterator;

// Strategies for generating test data
fn quantity_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..100_000, 0u32..3).prop_map(|(units, scale)| Decimal::new(units, scale))
}

#[derive(Debug, Clone)]
enum LedgerOp {
    Input(Decimal),
    Output(Decimal, Decimal),
}

fn ledger_op_strategy() -> impl Strategy<Value = LedgerOp> {
    prop_oneof![
        quantity_strategy().prop_map(LedgerOp::Input),
        (quantity_strategy(), quantity_strategy()).prop_map(|(o, l)| LedgerOp::Output(o, l)),
    ]
}

fn action_strategy() -> impl Strategy<Value = StageAction> {
    prop::sample::select(StageAction::iter().collect::<Vec<_>>())
}

fn status_strategy() -> impl Strategy<Value = StageStatus> {
    prop::sample::select(StageStatus::iter().collect::<Vec<_>>())
}

fn apply_action(stage: &mut Stage, action: StageAction) -> Result<(), ServiceError> {
    match action {
        StageAction::Start => stage.start(Utc::now()),
        StageAction::Complete => stage.complete(None, Utc::now()),
        StageAction::Hold => stage.hold(HoldReason::operational("machine down")),
        StageAction::QualityHold => stage.hold(HoldReason::quality("shade off")),
        StageAction::Resume => stage.resume(),
        StageAction::Cancel => stage.cancel("order withdrawn"),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn ledger_stays_balanced_under_any_operation_sequence(
        ops in prop::collection::vec(ledger_op_strategy(), 1..30)
    ) {
        let mut ledger = StageQuantities::default();
        for op in ops {
            let before = ledger;
            let result = match op {
                LedgerOp::Input(q) => ledger.record_input(q),
                LedgerOp::Output(o, l) => ledger.record_output(o, l),
            };
            if result.is_err() {
                prop_assert_eq!(ledger, before, "failed operation changed the ledger");
            }
            prop_assert!(ledger.is_balanced());
            prop_assert_eq!(ledger.input(), ledger.output() + ledger.loss() + ledger.pending());
        }
    }

    #[test]
    fn output_is_accepted_exactly_when_it_fits_the_input(
        input in quantity_strategy(),
        output in quantity_strategy(),
        loss in quantity_strategy(),
    ) {
        let mut ledger = StageQuantities::default();
        ledger.record_input(input).unwrap();

        let result = ledger.record_output(output, loss);
        if output + loss <= input {
            prop_assert!(result.is_ok());
            prop_assert_eq!(ledger.pending(), input - output - loss);
        } else {
            let is_violation = matches!(result, Err(ServiceError::QuantityInvariantViolation(_)));
            prop_assert!(is_violation);
            prop_assert_eq!(ledger.output(), Decimal::ZERO);
        }
    }

    #[test]
    fn every_action_yields_the_table_state_or_invalid_transition(
        actions in prop::collection::vec(action_strategy(), 1..20)
    ) {
        let mut stage = Stage::new(1, ProcessType::Printing);
        for action in actions {
            let from = stage.status;
            match (apply_action(&mut stage, action), from.next(action)) {
                (Ok(()), Some(expected)) => prop_assert_eq!(stage.status, expected),
                (Err(ServiceError::InvalidTransition { from: reported, .. }), None) => {
                    prop_assert_eq!(reported, from);
                    prop_assert_eq!(stage.status, from);
                }
                (result, expected) => {
                    prop_assert!(
                        false,
                        "{:?} from {:?} gave {:?}, table says {:?}",
                        action,
                        from,
                        result,
                        expected
                    );
                }
            }
            prop_assert_eq!(stage.hold_reason.is_some(), stage.status.is_held());
        }
    }

    #[test]
    fn order_summary_ignores_stage_order(
        statuses in prop::collection::vec(status_strategy(), 1..12).prop_shuffle()
    ) {
        let stages: Vec<Stage> = statuses
            .iter()
            .enumerate()
            .map(|(i, status)| {
                let mut stage = Stage::new(i as u32 + 1, ProcessType::Dyeing);
                stage.status = *status;
                stage
            })
            .collect();
        let mut reversed = stages.clone();
        reversed.reverse();

        prop_assert_eq!(derive_overall_status(&stages), derive_overall_status(&reversed));
        prop_assert_eq!(derive_progress_percentage(&stages), derive_progress_percentage(&reversed));
        prop_assert!(derive_progress_percentage(&stages) <= 100);
    }
}
