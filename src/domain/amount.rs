use crate::error::PurchaseError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Number of minor currency units in one major unit (kobo per naira, cents per dollar).
pub const MINOR_UNITS_PER_MAJOR: i64 = 100;

/// Represents a positive, currency-denominated purchase amount.
///
/// This is a wrapper around `rust_decimal::Decimal` so that settlement code
/// never sees a price worth less than one minor unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, PurchaseError> {
        let amount = Self(value);
        if value > Decimal::ZERO && amount.to_minor_units()? > 0 {
            Ok(amount)
        } else {
            Err(PurchaseError::InvalidAmount)
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Converts the amount to the gateway's minor-unit integer.
    ///
    /// Fractions of a minor unit are rounded half away from zero.
    pub fn to_minor_units(&self) -> Result<i64, PurchaseError> {
        (self.0 * Decimal::from(MINOR_UNITS_PER_MAJOR))
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .ok_or(PurchaseError::InvalidAmount)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = PurchaseError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
