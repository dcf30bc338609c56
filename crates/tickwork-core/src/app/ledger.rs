//! CostLedger - consumption against the current quantum's budget.

use std::sync::Arc;

use crate::ports::BudgetSignal;

/// Tracks what the running quantum has spent.
///
/// `remaining()` is conservative: when the host exposes its own estimate the
/// smaller of the two wins. The ledger never fails; it only answers.
pub struct CostLedger {
    budget: u64,
    safety_margin: u64,
    consumed: u64,
    signal: Option<Arc<dyn BudgetSignal>>,
}

impl CostLedger {
    pub fn new(budget: u64, safety_margin: u64) -> Self {
        Self {
            budget,
            safety_margin,
            consumed: 0,
            signal: None,
        }
    }

    pub fn with_signal(mut self, signal: Arc<dyn BudgetSignal>) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Start of a quantum.
    pub fn reset(&mut self) {
        self.consumed = 0;
    }

    pub fn consume(&mut self, units: u64) {
        self.consumed = self.consumed.saturating_add(units);
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn remaining(&self) -> u64 {
        let own = self.budget.saturating_sub(self.consumed);
        match &self.signal {
            Some(signal) => own.min(signal.remaining()),
            None => own,
        }
    }

    pub fn exhausted(&self, threshold: u64) -> bool {
        self.remaining() < threshold
    }

    /// Whether a step of `cost` still fits with the safety margin kept free.
    pub fn can_afford(&self, cost: u64) -> bool {
        !self.exhausted(self.safety_margin.saturating_add(cost))
    }
}
