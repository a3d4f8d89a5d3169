//! RV32I (+Zicsr) instruction semantics
//!
//! Each decoded instruction exposes two execution surfaces:
//!
//! * `behavior` is the monolithic reference semantics used by the
//!   single-cycle engine and the tests. It applies the instruction's
//!   whole effect to the architectural state in one call. Instructions
//!   that change the program counter pre-subtract their own length,
//!   because the engine adds the length back after every step.
//! * The datapath hooks (`access_register_file`, `control_unit_signals`,
//!   `alu_compute`, `memory_access`, `write_back`) split the same
//!   semantics across the five pipeline stages. Forms that do not
//!   participate in a stage inherit a no-effect default, which is what
//!   lets bubbles and system instructions flow through the pipeline.
//!
//! Arithmetic is bit-exact: u32 wrap-around, two's-complement reads for
//! signed comparisons and arithmetic shifts, and shift amounts masked to
//! the low 5 bits.

use thiserror::Error;

use crate::instruction_memory::InstructionLength;
use crate::memory::MemoryAddressError;
use crate::riscv::control::{AluOp, ControlUnitSignals, WbSrc};
use crate::riscv::csr::CsrError;
use crate::riscv::instruction::{BranchOp, CsrOp, IOp, Instruction, LoadOp, ROp, ShiftOp, StoreOp, UpperOp};
use crate::riscv::state::ArchitecturalState;
use crate::utils::{as_signed, as_unsigned, sign_extend};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecuteError {
    #[error(transparent)]
    Memory(#[from] MemoryAddressError),
    #[error(transparent)]
    Csr(#[from] CsrError),
    #[error("instruction {mnemonic} is not implemented")]
    NotImplemented { mnemonic: &'static str },
}

/// Register file access result of the decode stage:
/// (read address 1, read address 2, read data 1, read data 2, immediate)
pub type RegisterFileAccess = (Option<u8>, Option<u8>, Option<u32>, Option<u32>, Option<u32>);

/// ALU result for a register-register operation. Shift amounts use only
/// the low 5 bits of the right operand.
fn alu_result(op: ROp, left: u32, right: u32) -> u32 {
    match op {
        ROp::Add => left.wrapping_add(right),
        ROp::Sub => left.wrapping_sub(right),
        ROp::Sll => left << (0x1f & right),
        ROp::Slt => (as_signed(left) < as_signed(right)) as u32,
        ROp::Sltu => (left < right) as u32,
        ROp::Xor => left ^ right,
        ROp::Srl => left >> (0x1f & right),
        ROp::Sra => as_unsigned(as_signed(left) >> (0x1f & right)),
        ROp::Or => left | right,
        ROp::And => left & right,
    }
}

/// The register-register operation computing an immediate operation's
/// result once the immediate is on the second ALU input
fn reg_op_of_imm_op(op: IOp) -> Option<ROp> {
    match op {
        IOp::Addi => Some(ROp::Add),
        IOp::Slti => Some(ROp::Slt),
        IOp::Sltiu => Some(ROp::Sltu),
        IOp::Xori => Some(ROp::Xor),
        IOp::Ori => Some(ROp::Or),
        IOp::Andi => Some(ROp::And),
        IOp::Jalr | IOp::Ecall | IOp::Ebreak => None,
    }
}

fn reg_op_of_shift_op(op: ShiftOp) -> ROp {
    match op {
        ShiftOp::Slli => ROp::Sll,
        ShiftOp::Srli => ROp::Srl,
        ShiftOp::Srai => ROp::Sra,
    }
}

fn branch_taken(op: BranchOp, left: u32, right: u32) -> bool {
    match op {
        BranchOp::Beq => left == right,
        BranchOp::Bne => left != right,
        BranchOp::Blt => as_signed(left) < as_signed(right),
        BranchOp::Bge => as_signed(left) >= as_signed(right),
        BranchOp::Bltu => left < right,
        BranchOp::Bgeu => left >= right,
    }
}

fn load_value(
    op: LoadOp,
    address: u32,
    state: &ArchitecturalState,
) -> Result<u32, MemoryAddressError> {
    Ok(match op {
        LoadOp::Lb => sign_extend(state.memory.read_byte(address)?, 7),
        LoadOp::Lh => sign_extend(state.memory.read_halfword(address)?, 15),
        LoadOp::Lw => state.memory.read_word(address)?,
        LoadOp::Lbu => state.memory.read_byte(address)?.into(),
        LoadOp::Lhu => state.memory.read_halfword(address)?.into(),
    })
}

fn store_value(
    op: StoreOp,
    address: u32,
    value: u32,
    state: &mut ArchitecturalState,
) -> Result<(), MemoryAddressError> {
    match op {
        StoreOp::Sb => state.memory.write_byte(address, value as u8),
        StoreOp::Sh => state.memory.write_halfword(address, value as u16),
        StoreOp::Sw => state.memory.write_word(address, value),
    }
}

/// Read-modify-write of a CSR. The rs1/uimm operand is captured before
/// rd is written, so rd == rs1 reads the pre-instruction register value.
fn csr_read_modify_write(
    op: CsrOp,
    rd: u8,
    csr: u16,
    operand: u32,
    state: &mut ArchitecturalState,
) -> Result<(), ExecuteError> {
    let old = state.csr_registers.read(csr)?;
    state.register_file.write(rd.into(), old);
    let new = match op {
        CsrOp::ReadWrite => operand,
        CsrOp::ReadSet => old | operand,
        CsrOp::ReadClear => old & !operand,
    };
    state.csr_registers.write(csr, new)?;
    Ok(())
}

impl Instruction {
    /// Apply the whole effect of the instruction to the state. The
    /// engine adds the instruction length to the program counter after
    /// this returns, so control-transfer instructions pre-subtract it.
    pub fn behavior(&self, state: &mut ArchitecturalState) -> Result<(), ExecuteError> {
        match *self {
            Instruction::RType { op, rd, rs1, rs2 } => {
                let left = state.register_file.read(rs1.into());
                let right = state.register_file.read(rs2.into());
                state.register_file.write(rd.into(), alu_result(op, left, right));
                Ok(())
            }
            Instruction::IType { op, rd, rs1, imm } => match op {
                IOp::Jalr => {
                    let base = state.register_file.read(rs1.into());
                    let target =
                        0xffff_fffe & base.wrapping_add(as_unsigned(imm));
                    let return_address = state.program_counter.wrapping_add(4);
                    state.register_file.write(rd.into(), return_address);
                    state.program_counter = target.wrapping_sub(self.length());
                    Ok(())
                }
                IOp::Ecall | IOp::Ebreak => Err(ExecuteError::NotImplemented {
                    mnemonic: self.mnemonic(),
                }),
                _ => {
                    let reg_op = reg_op_of_imm_op(op).expect("arithmetic immediate op");
                    let left = state.register_file.read(rs1.into());
                    let right = as_unsigned(imm);
                    state
                        .register_file
                        .write(rd.into(), alu_result(reg_op, left, right));
                    Ok(())
                }
            },
            Instruction::ShiftIType { op, rd, rs1, shamt } => {
                let left = state.register_file.read(rs1.into());
                let value = alu_result(reg_op_of_shift_op(op), left, shamt.into());
                state.register_file.write(rd.into(), value);
                Ok(())
            }
            Instruction::MemIType { op, rd, rs1, imm } => {
                let base = state.register_file.read(rs1.into());
                let address = base.wrapping_add(as_unsigned(imm));
                let value = load_value(op, address, state)?;
                state.register_file.write(rd.into(), value);
                Ok(())
            }
            Instruction::SType { op, rs1, rs2, imm } => {
                let base = state.register_file.read(rs1.into());
                let address = base.wrapping_add(as_unsigned(imm));
                let value = state.register_file.read(rs2.into());
                store_value(op, address, value, state)?;
                Ok(())
            }
            Instruction::BType { op, rs1, rs2, imm } => {
                let left = state.register_file.read(rs1.into());
                let right = state.register_file.read(rs2.into());
                if branch_taken(op, left, right) {
                    let offset = (imm << 1).wrapping_sub(self.length() as i32);
                    state.program_counter = state
                        .program_counter
                        .wrapping_add(as_unsigned(offset));
                    state.performance_metrics.branch_count += 1;
                }
                Ok(())
            }
            Instruction::UType { op, rd, imm } => {
                let upper = as_unsigned(imm << 12);
                let value = match op {
                    UpperOp::Lui => upper,
                    UpperOp::Auipc => state.program_counter.wrapping_add(upper),
                };
                state.register_file.write(rd.into(), value);
                Ok(())
            }
            Instruction::JType { rd, imm } => {
                let return_address = state.program_counter.wrapping_add(4);
                state.register_file.write(rd.into(), return_address);
                let offset = (imm << 1).wrapping_sub(self.length() as i32);
                state.program_counter = state
                    .program_counter
                    .wrapping_add(as_unsigned(offset));
                state.performance_metrics.procedure_count += 1;
                Ok(())
            }
            Instruction::FenceType => Err(ExecuteError::NotImplemented {
                mnemonic: self.mnemonic(),
            }),
            Instruction::CsrType { op, rd, csr, rs1 } => {
                let operand = state.register_file.read(rs1.into());
                csr_read_modify_write(op, rd, csr, operand, state)
            }
            Instruction::CsrIType { op, rd, csr, uimm } => {
                csr_read_modify_write(op, rd, csr, uimm.into(), state)
            }
            Instruction::Empty => Ok(()),
        }
    }

    /// Decode-stage register file access. The second read port of store
    /// instructions delivers the store data already truncated to the
    /// access width.
    pub fn access_register_file(&self, state: &ArchitecturalState) -> RegisterFileAccess {
        match *self {
            Instruction::RType { rs1, rs2, .. } => (
                Some(rs1),
                Some(rs2),
                Some(state.register_file.read(rs1.into())),
                Some(state.register_file.read(rs2.into())),
                None,
            ),
            Instruction::IType { rs1, imm, .. } => (
                Some(rs1),
                None,
                Some(state.register_file.read(rs1.into())),
                None,
                Some(as_unsigned(imm)),
            ),
            Instruction::ShiftIType { rs1, shamt, .. } => (
                Some(rs1),
                None,
                Some(state.register_file.read(rs1.into())),
                None,
                Some(shamt.into()),
            ),
            Instruction::MemIType { rs1, imm, .. } => (
                Some(rs1),
                None,
                Some(state.register_file.read(rs1.into())),
                None,
                Some(as_unsigned(imm)),
            ),
            Instruction::SType { op, rs1, rs2, imm } => {
                let store_data = state.register_file.read(rs2.into());
                let store_data = match op {
                    StoreOp::Sb => store_data & 0xff,
                    StoreOp::Sh => store_data & 0xffff,
                    StoreOp::Sw => store_data,
                };
                (
                    Some(rs1),
                    Some(rs2),
                    Some(state.register_file.read(rs1.into())),
                    Some(store_data),
                    Some(as_unsigned(imm)),
                )
            }
            Instruction::BType { rs1, rs2, imm, .. } => (
                Some(rs1),
                Some(rs2),
                Some(state.register_file.read(rs1.into())),
                Some(state.register_file.read(rs2.into())),
                Some(as_unsigned(imm << 1)),
            ),
            Instruction::UType { imm, .. } => {
                (None, None, None, None, Some(as_unsigned(imm << 12)))
            }
            Instruction::JType { imm, .. } => {
                (None, None, None, None, Some(as_unsigned(imm << 1)))
            }
            Instruction::FenceType
            | Instruction::CsrType { .. }
            | Instruction::CsrIType { .. }
            | Instruction::Empty => (None, None, None, None, None),
        }
    }

    /// Execute-stage combinational logic: (branch comparison, result)
    pub fn alu_compute(
        &self,
        alu_in_1: Option<u32>,
        alu_in_2: Option<u32>,
    ) -> (Option<bool>, Option<u32>) {
        let (Some(left), Some(right)) = (alu_in_1, alu_in_2) else {
            return (None, None);
        };
        match *self {
            Instruction::RType { op, .. } => (None, Some(alu_result(op, left, right))),
            Instruction::IType { op, .. } => match op {
                IOp::Jalr => (None, Some(0xffff_fffe & left.wrapping_add(right))),
                IOp::Ecall | IOp::Ebreak => (None, None),
                _ => {
                    let reg_op = reg_op_of_imm_op(op).expect("arithmetic immediate op");
                    (None, Some(alu_result(reg_op, left, right)))
                }
            },
            Instruction::ShiftIType { op, .. } => {
                (None, Some(alu_result(reg_op_of_shift_op(op), left, right)))
            }
            // Loads and stores use the ALU for the address computation
            Instruction::MemIType { .. } | Instruction::SType { .. } => {
                (None, Some(left.wrapping_add(right)))
            }
            Instruction::BType { op, .. } => (Some(branch_taken(op, left, right)), None),
            Instruction::UType { op, .. } => match op {
                UpperOp::Auipc => (None, Some(left.wrapping_add(right))),
                UpperOp::Lui => (None, None),
            },
            Instruction::JType { .. }
            | Instruction::FenceType
            | Instruction::CsrType { .. }
            | Instruction::CsrIType { .. }
            | Instruction::Empty => (None, None),
        }
    }

    /// Memory-stage hook: loads return their (extended) read data, stores
    /// write and return nothing
    pub fn memory_access(
        &self,
        memory_address: Option<u32>,
        memory_write_data: Option<u32>,
        state: &mut ArchitecturalState,
    ) -> Result<Option<u32>, ExecuteError> {
        match *self {
            Instruction::MemIType { op, .. } => {
                let Some(address) = memory_address else {
                    return Ok(None);
                };
                Ok(Some(load_value(op, address, state)?))
            }
            Instruction::SType { op, .. } => {
                if let (Some(address), Some(value)) = (memory_address, memory_write_data) {
                    store_value(op, address, value, state)?;
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Write-back-stage hook
    pub fn write_back(
        &self,
        write_register: Option<u8>,
        register_write_data: Option<u32>,
        state: &mut ArchitecturalState,
    ) {
        match self {
            Instruction::RType { .. }
            | Instruction::IType { .. }
            | Instruction::ShiftIType { .. }
            | Instruction::MemIType { .. }
            | Instruction::UType { .. }
            | Instruction::JType { .. } => {
                if let (Some(rd), Some(value)) = (write_register, register_write_data) {
                    state.register_file.write(rd.into(), value);
                }
            }
            _ => (),
        }
    }

    /// Control word generated in the decode stage
    pub fn control_unit_signals(&self) -> ControlUnitSignals {
        match *self {
            Instruction::RType { op, .. } => ControlUnitSignals {
                alu_src_1: true,
                alu_src_2: false,
                wb_src: Some(WbSrc::AluResult),
                reg_write: true,
                alu_op: Some(alu_op_of_reg_op(op)),
                ..Default::default()
            },
            Instruction::IType { op, .. } => match op {
                IOp::Jalr => ControlUnitSignals {
                    alu_src_1: true,
                    alu_src_2: true,
                    wb_src: Some(WbSrc::PcPlusLength),
                    reg_write: true,
                    alu_to_pc: true,
                    ..Default::default()
                },
                IOp::Ecall | IOp::Ebreak => ControlUnitSignals::default(),
                _ => ControlUnitSignals {
                    alu_src_1: true,
                    alu_src_2: true,
                    wb_src: Some(WbSrc::AluResult),
                    reg_write: true,
                    alu_op: reg_op_of_imm_op(op).map(alu_op_of_reg_op),
                    ..Default::default()
                },
            },
            Instruction::ShiftIType { op, .. } => ControlUnitSignals {
                alu_src_1: true,
                alu_src_2: true,
                wb_src: Some(WbSrc::AluResult),
                reg_write: true,
                alu_op: Some(alu_op_of_reg_op(reg_op_of_shift_op(op))),
                ..Default::default()
            },
            Instruction::MemIType { .. } => ControlUnitSignals {
                alu_src_1: true,
                alu_src_2: true,
                wb_src: Some(WbSrc::MemoryReadData),
                reg_write: true,
                mem_read: true,
                alu_op: Some(AluOp::Add),
                ..Default::default()
            },
            Instruction::SType { .. } => ControlUnitSignals {
                alu_src_1: true,
                alu_src_2: true,
                mem_write: true,
                alu_op: Some(AluOp::Add),
                ..Default::default()
            },
            Instruction::BType { .. } => ControlUnitSignals {
                alu_src_1: true,
                alu_src_2: false,
                branch: true,
                ..Default::default()
            },
            Instruction::UType { op, .. } => match op {
                UpperOp::Lui => ControlUnitSignals {
                    wb_src: Some(WbSrc::Imm),
                    reg_write: true,
                    ..Default::default()
                },
                UpperOp::Auipc => ControlUnitSignals {
                    alu_src_1: false,
                    alu_src_2: true,
                    wb_src: Some(WbSrc::AluResult),
                    reg_write: true,
                    alu_op: Some(AluOp::Add),
                    ..Default::default()
                },
            },
            Instruction::JType { .. } => ControlUnitSignals {
                wb_src: Some(WbSrc::PcPlusLength),
                reg_write: true,
                jump: true,
                ..Default::default()
            },
            Instruction::FenceType
            | Instruction::CsrType { .. }
            | Instruction::CsrIType { .. }
            | Instruction::Empty => ControlUnitSignals::default(),
        }
    }
}

fn alu_op_of_reg_op(op: ROp) -> AluOp {
    match op {
        ROp::Add => AluOp::Add,
        ROp::Sub => AluOp::Sub,
        ROp::Sll => AluOp::Sll,
        ROp::Slt => AluOp::Slt,
        ROp::Sltu => AluOp::Sltu,
        ROp::Xor => AluOp::Xor,
        ROp::Srl => AluOp::Srl,
        ROp::Sra => AluOp::Sra,
        ROp::Or => AluOp::Or,
        ROp::And => AluOp::And,
    }
}
