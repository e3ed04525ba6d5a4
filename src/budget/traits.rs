use std::fmt::Debug;

/// An amount of privacy loss that sub-computations can be charged.
pub trait Budget: Clone + Debug {
    /// Nothing to charge.
    fn zero() -> Self;
}

/// Caps the total privacy loss of the sub-computations drawn from it.
/// A filter lives for one query invocation.
pub trait Filter<B: Budget> {
    type Error;

    /// Filter with `capacity` available and nothing consumed yet.
    fn new(capacity: B) -> Result<Self, Self::Error>
    where
        Self: Sized;

    /// Whether `budget` still fits, without consuming it.
    fn can_consume(&self, budget: &B) -> Result<FilterStatus, Self::Error>;

    /// Consumes `budget` if it fits. A refused request leaves the filter
    /// unchanged.
    fn try_consume(&mut self, budget: &B) -> Result<FilterStatus, Self::Error>;

    fn remaining_budget(&self) -> Result<B, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStatus {
    Continue,
    OutOfBudget,
}
