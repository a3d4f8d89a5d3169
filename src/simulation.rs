//! Common execution-engine surface
//!
//! Every engine owns its architectural state exclusively and advances it
//! one cycle per call. There is no internal suspension point: a step runs
//! to completion, and cancellation is the caller choosing not to step
//! again. `run` loops steps to termination and brackets the loop with the
//! wall-clock timer of the state's performance metrics.

use crate::metrics::PerformanceMetrics;

pub trait Simulation {
    type Error: std::error::Error;

    /// Advance the simulation by one cycle. Returns whether the engine
    /// did anything (false once the program has finished).
    fn step(&mut self) -> Result<bool, Self::Error>;

    /// Whether the program has run to completion
    fn is_done(&self) -> bool;

    fn performance_metrics_mut(&mut self) -> &mut PerformanceMetrics;

    /// Step until completion, timing the whole run. On error the timer is
    /// stopped and the error propagated; the state keeps whatever partial
    /// effects the failing cycle produced.
    fn run(&mut self) -> Result<(), Self::Error> {
        self.performance_metrics_mut().start_timer();
        let mut result = Ok(());
        while !self.is_done() {
            if let Err(e) = self.step() {
                result = Err(e);
                break;
            }
        }
        self.performance_metrics_mut().stop_timer();
        result
    }
}
