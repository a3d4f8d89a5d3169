//! 16-bit accumulator-based toy architecture: instruction set, state and
//! the sequential execution engine

pub mod instruction;
pub mod simulation;
pub mod state;

pub use instruction::ToyInstruction;
pub use simulation::ToySimulation;
pub use state::ToyArchitecturalState;
