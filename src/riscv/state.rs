//! RISC-V architectural state
//!
//! Composes everything an instruction can observe or mutate: the general
//! purpose register file, the byte-addressed data memory, the CSR file,
//! the instruction memory and the program counter, plus the performance
//! counters. One engine owns one state exclusively for the lifetime of a
//! simulation.

use crate::instruction_memory::InstructionMemory;
use crate::memory::Memory;
use crate::metrics::PerformanceMetrics;
use crate::riscv::csr::CsrRegisterFile;
use crate::riscv::instruction::Instruction;
use crate::riscv::register_file::RegisterFile;

#[derive(Debug, Clone, Default)]
pub struct ArchitecturalState {
    pub instruction_memory: InstructionMemory<Instruction>,
    pub register_file: RegisterFile,
    pub memory: Memory,
    pub csr_registers: CsrRegisterFile,
    pub program_counter: u32,
    pub performance_metrics: PerformanceMetrics,
}

impl ArchitecturalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State whose data memory rejects accesses below min_bytes (the
    /// data-segment model: everything below the segment base belongs to
    /// the program text)
    pub fn with_data_segment(min_bytes: u32) -> Self {
        Self {
            memory: Memory::new(32, min_bytes),
            ..Self::default()
        }
    }

    pub fn privilege_level(&self) -> u8 {
        self.csr_registers.privilege_level()
    }

    pub fn change_privilege_level(&mut self, level: u8) {
        self.csr_registers.change_privilege_level(level);
    }

    /// Whether there is an instruction at the current program counter
    pub fn instruction_at_pc(&self) -> bool {
        self.instruction_memory.contains(self.program_counter)
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::riscv::csr::CsrError;

    #[test]
    fn check_fresh_state_is_empty() {
        let state = ArchitecturalState::new();
        assert_eq!(state.program_counter, 0);
        assert!(!state.instruction_at_pc());
        assert_eq!(state.privilege_level(), 0);
        assert_eq!(state.performance_metrics.instruction_count, 0);
    }

    #[test]
    fn check_privilege_level_change() {
        let mut state = ArchitecturalState::new();
        assert_eq!(state.csr_registers.read(0x105), Err(CsrError::PrivilegedCsr(0x105)));
        state.change_privilege_level(1);
        assert_eq!(state.privilege_level(), 1);
        assert_eq!(state.csr_registers.read(0x105), Ok(0));
    }

    #[test]
    fn check_data_segment_state_rejects_low_accesses() {
        let mut state = ArchitecturalState::with_data_segment(1 << 14);
        assert!(state.memory.write_word(0, 1).is_err());
        assert!(state.memory.write_word(1 << 14, 1).is_ok());
    }

    #[test]
    fn check_instruction_at_pc() {
        let mut state = ArchitecturalState::new();
        state.instruction_memory.append(Instruction::addi(1, 0, 1));
        assert!(state.instruction_at_pc());
        state.program_counter = 4;
        assert!(!state.instruction_at_pc());
    }
}
