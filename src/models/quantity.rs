//! Quantity ledger for a single stage or process record.
//!
//! Every figure is an absolute, cumulative value. The ledger keeps
//! `input == output + loss + pending` true after every operation; the fields
//! are private so nothing outside this module can break the balance.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageQuantities {
    input: Decimal,
    output: Decimal,
    loss: Decimal,
    pending: Decimal,
}

impl Default for StageQuantities {
    fn default() -> Self {
        Self {
            input: Decimal::ZERO,
            output: Decimal::ZERO,
            loss: Decimal::ZERO,
            pending: Decimal::ZERO,
        }
    }
}

impl StageQuantities {
    pub fn input(&self) -> Decimal {
        self.input
    }

    pub fn output(&self) -> Decimal {
        self.output
    }

    pub fn loss(&self) -> Decimal {
        self.loss
    }

    pub fn pending(&self) -> Decimal {
        self.pending
    }

    /// Sets the received input. The new input must still cover what has
    /// already been accounted for as output and loss.
    pub fn record_input(&mut self, quantity: Decimal) -> Result<(), ServiceError> {
        ensure_non_negative("input", quantity)?;

        let accounted = self.output + self.loss;
        if quantity < accounted {
            return Err(ServiceError::QuantityInvariantViolation(format!(
                "input {} is less than already recorded output {} + loss {}",
                quantity, self.output, self.loss
            )));
        }

        self.input = quantity;
        self.pending = quantity - accounted;
        Ok(())
    }

    /// Sets cumulative output and loss, validated against the current input.
    pub fn record_output(&mut self, output: Decimal, loss: Decimal) -> Result<(), ServiceError> {
        ensure_non_negative("output", output)?;
        ensure_non_negative("loss", loss)?;

        let accounted = output + loss;
        if accounted > self.input {
            return Err(ServiceError::QuantityInvariantViolation(format!(
                "output {} + loss {} exceeds recorded input {}",
                output, loss, self.input
            )));
        }

        self.output = output;
        self.loss = loss;
        self.pending = self.input - accounted;
        Ok(())
    }

    pub fn is_fully_consumed(&self) -> bool {
        self.pending.is_zero()
    }

    /// Checks the conservation law. Always true for values built through the
    /// ledger operations; used to vet documents loaded from storage.
    pub fn is_balanced(&self) -> bool {
        self.input == self.output + self.loss + self.pending
            && self.input >= Decimal::ZERO
            && self.output >= Decimal::ZERO
            && self.loss >= Decimal::ZERO
            && self.pending >= Decimal::ZERO
    }
}

fn ensure_non_negative(field: &str, value: Decimal) -> Result<(), ServiceError> {
    if value < Decimal::ZERO {
        return Err(ServiceError::QuantityInvariantViolation(format!(
            "{} must not be negative, got {}",
            field, value
        )));
    }
    Ok(())
}
