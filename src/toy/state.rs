//! Toy architectural state
//!
//! A 16-bit program counter, the accumulator, a halfword-celled data
//! memory and the instruction memory. The data memory holds one 16-bit
//! value per 12-bit address (the toy architecture is halfword
//! addressed), so neighbouring variables never alias.

use std::collections::HashMap;

use crate::instruction_memory::InstructionMemory;
use crate::metrics::PerformanceMetrics;
use crate::toy::instruction::ToyInstruction;

/// Sparse halfword-addressed memory: one 16-bit cell per address.
/// Addresses are masked to the 12 bits an instruction can encode;
/// absent cells read as zero.
#[derive(Debug, Clone, Default)]
pub struct ToyDataMemory {
    cells: HashMap<u16, u16>,
}

impl ToyDataMemory {
    pub fn read_halfword(&self, address: u16) -> u16 {
        *self.cells.get(&(address & 0xfff)).unwrap_or(&0)
    }

    pub fn write_halfword(&mut self, address: u16, value: u16) {
        self.cells.insert(address & 0xfff, value);
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToyArchitecturalState {
    pub instruction_memory: InstructionMemory<ToyInstruction>,
    pub data_memory: ToyDataMemory,
    pub program_counter: u16,
    pub accu: u16,
    pub performance_metrics: PerformanceMetrics,
}

impl ToyArchitecturalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_pc(&mut self) {
        self.program_counter = self.program_counter.wrapping_add(1);
    }

    pub fn instruction_at_pc(&self) -> bool {
        self.instruction_memory.contains(self.program_counter.into())
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn check_memory_defaults_to_zero() {
        let memory = ToyDataMemory::default();
        assert_eq!(memory.read_halfword(0), 0);
        assert_eq!(memory.read_halfword(0xfff), 0);
    }

    #[test]
    fn check_memory_cells_do_not_alias() {
        let mut memory = ToyDataMemory::default();
        memory.write_halfword(0x400, 0xffff);
        memory.write_halfword(0x401, 0x1234);
        assert_eq!(memory.read_halfword(0x400), 0xffff);
        assert_eq!(memory.read_halfword(0x401), 0x1234);
    }

    #[test]
    fn check_address_masked_to_12_bits() {
        let mut memory = ToyDataMemory::default();
        memory.write_halfword(0x1400, 7);
        assert_eq!(memory.read_halfword(0x400), 7);
    }

    #[test]
    fn check_pc_wraps() {
        let mut state = ToyArchitecturalState::new();
        state.program_counter = u16::MAX;
        state.increment_pc();
        assert_eq!(state.program_counter, 0);
    }
}
