//! Closed `[min, max]` interval used by every device constraint.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ContractError;

/// Value types that can bound a [`Limits`] interval.
pub trait LimitValue: Copy + PartialOrd + fmt::Display {
    /// Whether the value is a usable bound (finite for floats)
    fn is_finite_value(&self) -> bool;
}

impl LimitValue for f64 {
    fn is_finite_value(&self) -> bool {
        self.is_finite()
    }
}

impl LimitValue for usize {
    fn is_finite_value(&self) -> bool {
        true
    }
}

/// Inclusive interval with `min <= max` and finite bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits<T> {
    pub(crate) min: T,
    pub(crate) max: T,
}

impl<T: LimitValue> Limits<T> {
    /// Create a new interval
    ///
    /// # Errors
    /// `Configuration` if a bound is not finite or `min > max`
    pub fn new(min: T, max: T) -> Result<Self, ContractError> {
        let limits = Self { min, max };
        limits.check("limits")?;
        Ok(limits)
    }

    pub fn min(&self) -> T {
        self.min
    }

    pub fn max(&self) -> T {
        self.max
    }

    /// Re-check the ordering invariant, e.g. after deserialization.
    pub fn check(&self, field: &str) -> Result<(), ContractError> {
        if !self.min.is_finite_value() || !self.max.is_finite_value() {
            return Err(ContractError::configuration(
                field,
                format!("bounds must be finite, got [{}, {}]", self.min, self.max),
            ));
        }
        if self.min > self.max {
            return Err(ContractError::configuration(
                field,
                format!("min {} is greater than max {}", self.min, self.max),
            ));
        }
        Ok(())
    }

    pub fn contains(&self, value: T) -> bool {
        value >= self.min && value <= self.max
    }

    /// Clamp `value` into the interval
    pub fn clip(&self, value: T) -> T {
        if value < self.min {
            self.min
        } else if value > self.max {
            self.max
        } else {
            value
        }
    }

    /// Tightest interval satisfying both: `(max(lo1, lo2), min(hi1, hi2))`.
    ///
    /// # Errors
    /// `Configuration` if the two intervals do not overlap
    pub fn intersect(&self, other: &Self, field: &str) -> Result<Self, ContractError> {
        let min = if other.min > self.min { other.min } else { self.min };
        let max = if other.max < self.max { other.max } else { self.max };
        if min > max {
            return Err(ContractError::configuration(
                field,
                format!("combined limits are empty: [{min}, {max}]"),
            ));
        }
        Ok(Self { min, max })
    }

    /// Error unless `value` lies in the interval
    pub fn require(&self, field: &str, value: T) -> Result<T, ContractError> {
        if self.contains(value) {
            Ok(value)
        } else {
            Err(ContractError::configuration(
                field,
                format!("{value} is outside of [{}, {}]", self.min, self.max),
            ))
        }
    }
}

impl<T: fmt::Display> fmt::Display for Limits<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}
