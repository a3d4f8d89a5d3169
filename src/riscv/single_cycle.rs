//! Single-cycle execution engine
//!
//! Executes one whole instruction per cycle using the instructions'
//! monolithic `behavior`. This engine is the reference semantics: the
//! pipelined engine must leave identical architectural state for any
//! program it supports.

use log::trace;

use crate::instruction_memory::InstructionLength;
use crate::metrics::PerformanceMetrics;
use crate::riscv::state::ArchitecturalState;
use crate::riscv::InstructionExecutionError;
use crate::simulation::Simulation;

#[derive(Debug, Default)]
pub struct SingleCycleSimulation {
    pub state: ArchitecturalState,
}

impl SingleCycleSimulation {
    pub fn new(state: ArchitecturalState) -> Self {
        Self { state }
    }
}

impl Simulation for SingleCycleSimulation {
    type Error = InstructionExecutionError;

    fn step(&mut self) -> Result<bool, Self::Error> {
        if !self.state.instruction_at_pc() {
            return Ok(false);
        }
        let address = self.state.program_counter;
        let instruction = *self
            .state
            .instruction_memory
            .read(address)
            .expect("pc points at an instruction");
        trace!("executing `{instruction}` at 0x{address:08x}");

        self.state.performance_metrics.cycles += 1;
        self.state.performance_metrics.instruction_count += 1;
        instruction
            .behavior(&mut self.state)
            .map_err(|cause| InstructionExecutionError {
                address,
                instruction_repr: instruction.to_string(),
                cause,
            })?;
        // The pc advance lands after a successful execute, so the error
        // case above leaves the pc at the faulting instruction
        self.state.program_counter = self
            .state
            .program_counter
            .wrapping_add(instruction.length());
        Ok(true)
    }

    fn is_done(&self) -> bool {
        !self.state.instruction_at_pc()
    }

    fn performance_metrics_mut(&mut self) -> &mut PerformanceMetrics {
        &mut self.state.performance_metrics
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::memory::MemoryAddressError;
    use crate::riscv::instruction::Instruction;
    use crate::riscv::rv32i::ExecuteError;

    fn simulation_of(program: Vec<Instruction>) -> SingleCycleSimulation {
        let mut state = ArchitecturalState::new();
        state.instruction_memory.append_all(program);
        SingleCycleSimulation::new(state)
    }

    #[test]
    fn check_step_executes_one_instruction() {
        let mut sim = simulation_of(vec![
            Instruction::addi(1, 1, 1),
            Instruction::addi(1, 1, 1),
        ]);
        assert!(sim.step().unwrap());
        assert_eq!(sim.state.register_file.read(1), 1);
        assert_eq!(sim.state.program_counter, 4);
        assert!(sim.step().unwrap());
        assert_eq!(sim.state.register_file.read(1), 2);
        // Past the end of the program nothing happens
        assert!(!sim.step().unwrap());
        assert!(sim.is_done());
    }

    #[test]
    fn check_straight_line_run() {
        let mut sim = simulation_of(vec![Instruction::addi(1, 1, 1); 7]);
        sim.run().unwrap();
        assert_eq!(sim.state.register_file.read(1), 7);
        let metrics = &sim.state.performance_metrics;
        assert_eq!(metrics.instruction_count, 7);
        assert_eq!(metrics.cycles, 7);
        assert_eq!(metrics.branch_count, 0);
        assert_eq!(metrics.procedure_count, 0);
        assert!(metrics.execution_time_s() >= 0.0);
    }

    #[test]
    fn check_empty_program_run() {
        let mut sim = simulation_of(vec![]);
        sim.run().unwrap();
        assert_eq!(sim.state.performance_metrics.instruction_count, 0);
        assert_eq!(sim.state.register_file.read(0), 0);
    }

    #[test]
    fn check_loop_with_branches() {
        // x1 counts to 5, then a forward beq skips one instruction
        let mut sim = simulation_of(vec![
            Instruction::addi(2, 0, 5),
            Instruction::addi(1, 1, 1),
            Instruction::bne(1, 2, -2),
            Instruction::beq(0, 0, 4),
            Instruction::addi(0, 0, 0),
            Instruction::addi(3, 0, 64),
        ]);
        sim.run().unwrap();
        assert_eq!(sim.state.register_file.read(1), 5);
        assert_eq!(sim.state.register_file.read(2), 5);
        assert_eq!(sim.state.register_file.read(3), 64);
        let metrics = &sim.state.performance_metrics;
        assert_eq!(metrics.branch_count, 5);
        assert_eq!(metrics.instruction_count, 13);
        assert_eq!(metrics.procedure_count, 0);
    }

    #[test]
    fn check_procedure_calls_counted() {
        let mut sim = simulation_of(vec![
            Instruction::addi(3, 0, 8),
            Instruction::jal(2, 4), // skips the next instruction
            Instruction::addi(1, 1, 1),
            Instruction::beq(0, 0, 2),
            Instruction::jal(2, 2),
            Instruction::addi(1, 1, -10),
        ]);
        sim.run().unwrap();
        assert_eq!(sim.state.register_file.read(1), (-10i32) as u32);
        assert_eq!(sim.state.register_file.read(2), 20);
        assert_eq!(sim.state.register_file.read(3), 8);
        let metrics = &sim.state.performance_metrics;
        assert_eq!(metrics.branch_count, 1);
        assert_eq!(metrics.instruction_count, 5);
        assert_eq!(metrics.procedure_count, 2);
    }

    #[test]
    fn check_error_wraps_faulting_address() {
        let mut state = ArchitecturalState::with_data_segment(1 << 14);
        state.instruction_memory.append_all(vec![
            Instruction::addi(1, 1, 1),
            Instruction::lw(1, 0, 0),
        ]);
        let mut sim = SingleCycleSimulation::new(state);
        let err = sim.run().unwrap_err();
        assert_eq!(
            err,
            InstructionExecutionError {
                address: 4,
                instruction_repr: "lw x1, 0(x0)".to_string(),
                cause: ExecuteError::Memory(MemoryAddressError {
                    address: 0,
                    min_address_incl: 1 << 14,
                    max_address_incl: u32::MAX,
                    memory_type: "data memory",
                }),
            }
        );
        // The pc still points at the faulting instruction
        assert_eq!(sim.state.program_counter, 4);
    }

    #[test]
    fn check_fibonacci_program() {
        let mut sim = SingleCycleSimulation::new(fibonacci_state(10));
        sim.run().unwrap();
        assert_eq!(sim.state.register_file.read(10), 55);
        // fib is entered by exactly one jal per call: 1 + sum over the
        // call tree. For n = 10 that is 177 calls; the two base cases
        // take one taken beq each: F(9) + F(10) = 34 + 55
        let metrics = &sim.state.performance_metrics;
        assert_eq!(metrics.procedure_count, 177);
        assert_eq!(metrics.branch_count, 89);
    }

    #[test]
    fn check_fibonacci_program_layout() {
        // The hand-assembled jump targets above depend on this layout
        let state = fibonacci_state(10);
        assert_eq!(state.instruction_memory.len(), 23);
        assert_eq!(
            state.instruction_memory.read(0x00).unwrap().to_string(),
            "beq x10, x0, 68"
        );
        assert_eq!(
            state.instruction_memory.read(0x50).unwrap().to_string(),
            "addi x2, x0, 1024"
        );
        assert_eq!(
            state.instruction_memory.read(0x58).unwrap().to_string(),
            "jal x1, -88"
        );
    }
}

/// Recursive Fibonacci with the argument and result in x10 and a stack
/// in the data memory. The fib procedure sits at address 0 and main at
/// 0x50, so the initial call's return address (0x5c) lies past the
/// program and the run terminates on the final return. Execution starts
/// at main. Shared between the engine test suites.
#[cfg(test)]
pub(crate) fn fibonacci_state(n: i32) -> ArchitecturalState {
    use crate::riscv::instruction::Instruction;

    let program = vec![
        // 0x00: fib(x10)
        Instruction::beq(10, 0, 34), // n == 0 -> 0x44
        Instruction::addi(5, 0, 1),
        Instruction::beq(10, 5, 32), // n == 1 -> 0x48
        // 0x0c: recursive case
        Instruction::addi(2, 2, -8),
        Instruction::sw(2, 1, 4),
        Instruction::sw(2, 10, 0),
        Instruction::addi(10, 10, -1),
        Instruction::jal(1, -14), // fib(n - 1)
        Instruction::lw(5, 2, 0),
        Instruction::sw(2, 10, 0),
        Instruction::addi(10, 5, -2),
        Instruction::jal(1, -22), // fib(n - 2)
        Instruction::lw(5, 2, 0),
        Instruction::add(10, 10, 5),
        Instruction::lw(1, 2, 4),
        Instruction::addi(2, 2, 8),
        Instruction::jalr(0, 1, 0),
        // 0x44: fib(0) = 0 (x10 already 0)
        Instruction::jalr(0, 1, 0),
        // 0x48: fib(1) = 1
        Instruction::addi(10, 0, 1),
        Instruction::jalr(0, 1, 0),
        // 0x50: main
        Instruction::addi(2, 0, 1024),
        Instruction::addi(10, 0, n),
        Instruction::jal(1, -44), // fib(n), returns to 0x5c
    ];
    let mut state = ArchitecturalState::new();
    state.instruction_memory.append_all(program);
    state.program_counter = 0x50;
    state
}
