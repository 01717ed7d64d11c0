//! Process-specific measurement payloads and their reduction to ledger updates.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;
use crate::models::quantity::StageQuantities;
use crate::models::stage::ProcessType;

/// Process-specific quantity payload, tagged by process type.
///
/// Operators report figures in the vocabulary of their process (washed
/// meter, shrinkage meter, ...). Each variant has a fixed schema and is
/// reduced to a [`QuantityUpdate`] before it reaches the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "process_type", rename_all = "snake_case")]
pub enum StageMeasurement {
    Knitting {
        #[serde(default)]
        yarn_issued_kg: Option<Decimal>,
        fabric_kg: Decimal,
        waste_kg: Decimal,
    },
    Dyeing {
        #[serde(default)]
        received_meter: Option<Decimal>,
        dyed_meter: Decimal,
        rejected_meter: Decimal,
    },
    Printing {
        #[serde(default)]
        received_meter: Option<Decimal>,
        printed_meter: Decimal,
        misprint_meter: Decimal,
    },
    Washing {
        #[serde(default)]
        received_meter: Option<Decimal>,
        washed_meter: Decimal,
        shrinkage_meter: Decimal,
    },
    Finishing {
        #[serde(default)]
        received_meter: Option<Decimal>,
        finished_meter: Decimal,
        wastage_meter: Decimal,
    },
}

impl StageMeasurement {
    pub fn process_type(&self) -> ProcessType {
        match self {
            StageMeasurement::Knitting { .. } => ProcessType::Knitting,
            StageMeasurement::Dyeing { .. } => ProcessType::Dyeing,
            StageMeasurement::Printing { .. } => ProcessType::Printing,
            StageMeasurement::Washing { .. } => ProcessType::Washing,
            StageMeasurement::Finishing { .. } => ProcessType::Finishing,
        }
    }

    /// Builds the process-specific view of a ledger.
    pub fn from_quantities(process_type: ProcessType, quantities: &StageQuantities) -> Self {
        let input = Some(quantities.input());
        let output = quantities.output();
        let loss = quantities.loss();

        match process_type {
            ProcessType::Knitting => StageMeasurement::Knitting {
                yarn_issued_kg: input,
                fabric_kg: output,
                waste_kg: loss,
            },
            ProcessType::Dyeing => StageMeasurement::Dyeing {
                received_meter: input,
                dyed_meter: output,
                rejected_meter: loss,
            },
            ProcessType::Printing => StageMeasurement::Printing {
                received_meter: input,
                printed_meter: output,
                misprint_meter: loss,
            },
            ProcessType::Washing => StageMeasurement::Washing {
                received_meter: input,
                washed_meter: output,
                shrinkage_meter: loss,
            },
            ProcessType::Finishing => StageMeasurement::Finishing {
                received_meter: input,
                finished_meter: output,
                wastage_meter: loss,
            },
        }
    }

    fn figures(&self) -> (Option<Decimal>, Decimal, Decimal) {
        match *self {
            StageMeasurement::Knitting {
                yarn_issued_kg,
                fabric_kg,
                waste_kg,
            } => (yarn_issued_kg, fabric_kg, waste_kg),
            StageMeasurement::Dyeing {
                received_meter,
                dyed_meter,
                rejected_meter,
            } => (received_meter, dyed_meter, rejected_meter),
            StageMeasurement::Printing {
                received_meter,
                printed_meter,
                misprint_meter,
            } => (received_meter, printed_meter, misprint_meter),
            StageMeasurement::Washing {
                received_meter,
                washed_meter,
                shrinkage_meter,
            } => (received_meter, washed_meter, shrinkage_meter),
            StageMeasurement::Finishing {
                received_meter,
                finished_meter,
                wastage_meter,
            } => (received_meter, finished_meter, wastage_meter),
        }
    }

    /// Checks the payload against the stage it targets and reduces it to a
    /// generic quantity update.
    pub fn validate_for(&self, expected: ProcessType) -> Result<QuantityUpdate, ServiceError> {
        if self.process_type() != expected {
            return Err(ServiceError::ValidationError(format!(
                "{} measurement cannot be applied to a {} stage",
                self.process_type(),
                expected
            )));
        }

        let (input, output, loss) = self.figures();
        let negative = input.into_iter().chain([output, loss]).any(|v| v < Decimal::ZERO);
        if negative {
            return Err(ServiceError::ValidationError(format!(
                "{} measurement contains a negative figure",
                expected
            )));
        }

        Ok(QuantityUpdate::new(input, output, loss))
    }
}

/// Generic quantity change handed to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantityUpdate {
    pub input: Option<Decimal>,
    pub output: Decimal,
    pub loss: Decimal,
}

impl QuantityUpdate {
    pub fn new(input: Option<Decimal>, output: Decimal, loss: Decimal) -> Self {
        Self {
            input,
            output,
            loss,
        }
    }

    /// Applies the update atomically. A full triple (input present) replaces
    /// all figures and is validated as a whole; otherwise output and loss are
    /// validated against the ledger's current input.
    pub fn apply_to(&self, ledger: &mut StageQuantities) -> Result<(), ServiceError> {
        let mut scratch = *ledger;
        if let Some(input) = self.input {
            scratch = StageQuantities::default();
            scratch.record_input(input)?;
        }
        scratch.record_output(self.output, self.loss)?;
        *ledger = scratch;
        Ok(())
    }
}
