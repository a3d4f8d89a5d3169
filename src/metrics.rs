//! Performance counters
//!
//! Counts retired instructions, taken conditional branches, procedure
//! calls and elapsed cycles, and measures the wall-clock time of a run.
//! Counters are monotonic; they reset only when the owning state is
//! rebuilt.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    pub instruction_count: u64,
    pub branch_count: u64,
    pub procedure_count: u64,
    pub cycles: u64,
    execution_time: Duration,
    start: Option<Instant>,
}

impl PerformanceMetrics {
    pub fn start_timer(&mut self) {
        self.start = Some(Instant::now());
    }

    /// Add the time since the matching start_timer to the accumulated
    /// execution time. Does nothing if the timer was never started.
    pub fn stop_timer(&mut self) {
        if let Some(start) = self.start.take() {
            self.execution_time += start.elapsed();
        }
    }

    pub fn execution_time_s(&self) -> f64 {
        self.execution_time.as_secs_f64()
    }

    pub fn instructions_per_second(&self) -> f64 {
        let seconds = self.execution_time_s();
        if seconds > 0.0 {
            self.instruction_count as f64 / seconds
        } else {
            0.0
        }
    }
}
