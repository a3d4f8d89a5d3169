//! Toy execution engine
//!
//! Sequential fetch-execute over the toy instruction memory: one
//! instruction per cycle, no pipelining. Instructions advance the
//! program counter themselves (BRZ sets it outright), so the engine
//! only fetches, counts and delegates.

use std::convert::Infallible;

use log::trace;

use crate::metrics::PerformanceMetrics;
use crate::simulation::Simulation;
use crate::toy::state::ToyArchitecturalState;

#[derive(Debug, Default)]
pub struct ToySimulation {
    pub state: ToyArchitecturalState,
}

impl ToySimulation {
    pub fn new(state: ToyArchitecturalState) -> Self {
        Self { state }
    }
}

impl Simulation for ToySimulation {
    type Error = Infallible;

    fn step(&mut self) -> Result<bool, Self::Error> {
        if !self.state.instruction_at_pc() {
            return Ok(false);
        }
        let instruction = *self
            .state
            .instruction_memory
            .read(self.state.program_counter.into())
            .expect("pc points at an instruction");
        trace!(
            "executing `{instruction}` at {:#05x}",
            self.state.program_counter
        );
        self.state.performance_metrics.cycles += 1;
        self.state.performance_metrics.instruction_count += 1;
        instruction.behavior(&mut self.state);
        Ok(true)
    }

    fn is_done(&self) -> bool {
        !self.state.instruction_at_pc()
    }

    fn performance_metrics_mut(&mut self) -> &mut PerformanceMetrics {
        &mut self.state.performance_metrics
    }
}
