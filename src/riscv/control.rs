//! Control unit signals
//!
//! The control word generated in the decode stage. It steers the ALU
//! input muxes, the write-back mux and the memory ports of the pipelined
//! datapath, and tells the memory stage how an instruction may redirect
//! the program counter.

/// Source of the value written back to the register file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WbSrc {
    /// Address of the instruction plus its length (jal/jalr link value)
    PcPlusLength,
    /// Data read from memory (loads)
    MemoryReadData,
    /// ALU result
    AluResult,
    /// Immediate (lui)
    Imm,
}

/// Operation performed by the ALU, for display purposes. The ALU itself
/// is distributed over the instructions' `alu_compute` hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    Sll,
    Slt,
    Sltu,
    Xor,
    Srl,
    Sra,
    Or,
    And,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlUnitSignals {
    /// First ALU input: register read data 1 if set, otherwise the
    /// address of the instruction
    pub alu_src_1: bool,
    /// Second ALU input: immediate if set, otherwise register read data 2
    pub alu_src_2: bool,
    pub wb_src: Option<WbSrc>,
    pub reg_write: bool,
    pub mem_read: bool,
    pub mem_write: bool,
    pub branch: bool,
    pub jump: bool,
    /// The ALU result is a jump target (jalr)
    pub alu_to_pc: bool,
    pub alu_op: Option<AluOp>,
}
