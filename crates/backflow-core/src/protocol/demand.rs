//! The [`Demand`] budget type.
//!
//! Demand is the number of values a consumer currently authorizes a
//! producer to deliver: either a finite count or unlimited. Addition
//! saturates; subtracting below zero is illegal and asserted against in
//! debug builds (it cannot occur while the protocol invariants hold).

use core::fmt;
use core::ops::{Add, AddAssign, Sub, SubAssign};

/// A budget of values a consumer currently authorizes a producer to deliver.
///
/// `Finite(n)` permits exactly `n` further deliveries; [`Demand::Unbounded`]
/// permits any number. Producers decrement the budget by one per delivered
/// value and add back whatever the consumer's `on_next` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Demand {
    /// Finite demand with a remaining count.
    Finite(u64),
    /// Unlimited demand.
    Unbounded,
}

impl Demand {
    /// Zero demand: the producer may not deliver.
    pub const NONE: Self = Self::Finite(0);
    /// Unlimited demand.
    pub const UNBOUNDED: Self = Self::Unbounded;

    /// Finite demand of exactly `n` values.
    #[must_use]
    pub const fn of(n: u64) -> Self {
        Self::Finite(n)
    }

    /// Returns `true` if at least one further delivery is authorized.
    #[must_use]
    pub const fn has_demand(&self) -> bool {
        matches!(self, Self::Unbounded) || matches!(self, Self::Finite(n) if *n > 0)
    }

    /// Returns `true` if the demand is unlimited.
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        matches!(self, Self::Unbounded)
    }

    /// Returns the remaining finite count, or `None` when unlimited.
    #[must_use]
    pub const fn remaining(&self) -> Option<u64> {
        match self {
            Self::Finite(n) => Some(*n),
            Self::Unbounded => None,
        }
    }
}

impl Default for Demand {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for Demand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finite(n) => write!(f, "{n}"),
            Self::Unbounded => write!(f, "unbounded"),
        }
    }
}

impl Add for Demand {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        match (self, rhs) {
            (Self::Finite(a), Self::Finite(b)) => Self::Finite(a.saturating_add(b)),
            _ => Self::Unbounded,
        }
    }
}

impl AddAssign for Demand {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Demand {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        match (self, rhs) {
            (Self::Unbounded, _) => Self::Unbounded,
            (Self::Finite(a), Self::Finite(b)) => {
                debug_assert!(a >= b, "demand underflow: {a} - {b}");
                Self::Finite(a.saturating_sub(b))
            }
            (Self::Finite(_), Self::Unbounded) => {
                debug_assert!(false, "cannot subtract unbounded demand from finite demand");
                Self::NONE
            }
        }
    }
}

impl SubAssign for Demand {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}
