//! BudgetSignal port - the host's own view of the remaining budget.

/// Estimate of operations left before the host forcibly ends the quantum.
///
/// Monotonically decreasing within a quantum, reset by the host at quantum
/// start. The host's accounting is authoritative; the scheduler only reads it.
pub trait BudgetSignal: Send + Sync {
    fn remaining(&self) -> u64;
}

impl<F> BudgetSignal for F
where
    F: Fn() -> u64 + Send + Sync,
{
    fn remaining(&self) -> u64 {
        self()
    }
}
