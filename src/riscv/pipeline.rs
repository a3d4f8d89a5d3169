//! Five-stage pipelined execution engine
//!
//! Classic IF -> ID -> EX -> MEM -> WB pipeline over the datapath hooks
//! of the decoded instructions. Between the stages sit typed pipeline
//! registers; a bubble is an explicit register holding the Empty
//! instruction.
//!
//! Within a cycle the stages are evaluated back to front (WB first)
//! against a snapshot of last cycle's registers, so each stage consumes
//! its producer's previous output and the register file write of WB is
//! visible to the register read of ID in the same cycle.
//!
//! Branches are predicted statically not-taken: IF keeps fetching
//! sequentially, and the memory stage flushes the younger stages and
//! redirects the program counter when the prediction turns out wrong
//! (or on any jump). Data hazards are handled without forwarding: the
//! decode stage compares its read addresses against the write registers
//! of the instructions in flight and re-fetches itself until the
//! producer has left the pipeline.

use log::{debug, trace};

use crate::instruction_memory::InstructionLength;
use crate::metrics::PerformanceMetrics;
use crate::riscv::control::{ControlUnitSignals, WbSrc};
use crate::riscv::instruction::Instruction;
use crate::riscv::state::ArchitecturalState;
use crate::riscv::InstructionExecutionError;
use crate::simulation::Simulation;

/// Clear one or more pipeline registers and redirect the program counter
///
/// An inclusive flush also discards the output of the stage that raised
/// the signal (used by the hazard stall, which must retry its own
/// instruction); an exclusive flush only clears the younger stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushSignal {
    pub inclusive: bool,
    /// Address to continue fetching from
    pub address: u32,
}

#[derive(Debug, Clone, Default)]
pub struct FetchRegister {
    pub instruction: Instruction,
    pub address_of_instruction: Option<u32>,
    pub branch_prediction: Option<bool>,
    pub pc_plus_instruction_length: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct DecodeRegister {
    pub instruction: Instruction,
    pub register_read_addr_1: Option<u8>,
    pub register_read_addr_2: Option<u8>,
    pub register_read_data_1: Option<u32>,
    pub register_read_data_2: Option<u32>,
    pub imm: Option<u32>,
    pub write_register: Option<u8>,
    pub control_unit_signals: ControlUnitSignals,
    pub branch_prediction: Option<bool>,
    pub flush_signal: Option<FlushSignal>,
    pub pc_plus_instruction_length: Option<u32>,
    pub address_of_instruction: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteRegister {
    pub instruction: Instruction,
    pub alu_in_1: Option<u32>,
    pub alu_in_2: Option<u32>,
    pub register_read_data_1: Option<u32>,
    pub register_read_data_2: Option<u32>,
    pub imm: Option<u32>,
    pub result: Option<u32>,
    pub comparison: Option<bool>,
    pub write_register: Option<u8>,
    pub control_unit_signals: ControlUnitSignals,
    pub pc_plus_imm: Option<u32>,
    pub branch_prediction: Option<bool>,
    pub pc_plus_instruction_length: Option<u32>,
    pub address_of_instruction: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryRegister {
    pub instruction: Instruction,
    pub memory_address: Option<u32>,
    pub result: Option<u32>,
    pub memory_write_data: Option<u32>,
    pub memory_read_data: Option<u32>,
    pub comparison: Option<bool>,
    pub comparison_or_jump: bool,
    pub write_register: Option<u8>,
    pub control_unit_signals: ControlUnitSignals,
    pub pc_plus_imm: Option<u32>,
    pub flush_signal: Option<FlushSignal>,
    pub pc_plus_instruction_length: Option<u32>,
    pub imm: Option<u32>,
    pub address_of_instruction: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct WritebackRegister {
    pub instruction: Instruction,
    pub register_write_data: Option<u32>,
    pub write_register: Option<u8>,
    pub memory_read_data: Option<u32>,
    pub alu_result: Option<u32>,
    pub control_unit_signals: ControlUnitSignals,
    pub pc_plus_instruction_length: Option<u32>,
    pub imm: Option<u32>,
    pub address_of_instruction: Option<u32>,
}

/// One inter-stage latch. The variant tells which stage produced it;
/// a stage receiving an unexpected variant (a bubble, or the output of a
/// flushed predecessor) produces its own default register.
#[derive(Debug, Clone)]
pub enum PipelineRegister {
    Bubble,
    Fetch(FetchRegister),
    Decode(DecodeRegister),
    Execute(ExecuteRegister),
    Memory(MemoryRegister),
    Writeback(WritebackRegister),
}

impl Default for PipelineRegister {
    fn default() -> Self {
        PipelineRegister::Bubble
    }
}

impl PipelineRegister {
    pub fn instruction(&self) -> Instruction {
        match self {
            PipelineRegister::Bubble => Instruction::Empty,
            PipelineRegister::Fetch(r) => r.instruction,
            PipelineRegister::Decode(r) => r.instruction,
            PipelineRegister::Execute(r) => r.instruction,
            PipelineRegister::Memory(r) => r.instruction,
            PipelineRegister::Writeback(r) => r.instruction,
        }
    }

    fn flush_signal(&self) -> Option<FlushSignal> {
        match self {
            PipelineRegister::Decode(r) => r.flush_signal,
            PipelineRegister::Memory(r) => r.flush_signal,
            _ => None,
        }
    }
}

const STAGE_COUNT: usize = 5;

// Pipeline registers ahead of ID whose instructions have not yet passed
// write-back (those in EX, MEM and WB)
const STAGES_UNTIL_WRITEBACK: usize = 3;

#[derive(Debug, Default)]
pub struct PipelinedSimulation {
    pub state: ArchitecturalState,
    // registers[0] is the IF output, registers[4] the WB output
    registers: [PipelineRegister; STAGE_COUNT],
    detect_data_hazards: bool,
}

impl PipelinedSimulation {
    pub fn new(state: ArchitecturalState) -> Self {
        Self {
            state,
            registers: Default::default(),
            detect_data_hazards: true,
        }
    }

    /// Disable the interlock, letting dependent instructions read stale
    /// register values. Only useful for demonstrating hazards.
    pub fn set_detect_data_hazards(&mut self, detect: bool) {
        self.detect_data_hazards = detect;
    }

    /// Snapshot of the inter-stage registers, IF output first
    pub fn pipeline_registers(&self) -> &[PipelineRegister; STAGE_COUNT] {
        &self.registers
    }
}

impl Simulation for PipelinedSimulation {
    type Error = InstructionExecutionError;

    fn step(&mut self) -> Result<bool, Self::Error> {
        if self.is_done() {
            return Ok(false);
        }

        // Stages read last cycle's registers; the new registers are
        // produced into a separate buffer to avoid within-cycle tearing
        let snapshot = self.registers.clone();
        let writeback = writeback_stage(&snapshot[3], &mut self.state);
        let memory = memory_stage(&snapshot[2], &mut self.state)?;
        let execute = execute_stage(&snapshot[1]);
        let decode = decode_stage(
            &snapshot[0],
            &snapshot,
            &self.state,
            self.detect_data_hazards,
        );
        let fetch = fetch_stage(&mut self.state);
        let mut next = [fetch, decode, execute, memory, writeback];

        // Flush arbitration: the deepest stage signalling wins, since its
        // instruction is the earliest in program order and every younger
        // instruction is discarded anyway
        let flush = next
            .iter()
            .enumerate()
            .rev()
            .find_map(|(index, register)| {
                register.flush_signal().map(|signal| (index, signal))
            });
        if let Some((index, signal)) = flush {
            debug!(
                "flush from stage {index}: redirecting pc to 0x{:08x} (inclusive: {})",
                signal.address, signal.inclusive
            );
            let clear_until = if signal.inclusive { index + 1 } else { index };
            for register in &mut next[..clear_until] {
                *register = PipelineRegister::Bubble;
            }
            self.state.program_counter = signal.address;
        }

        self.registers = next;
        self.state.performance_metrics.cycles += 1;
        trace!("cycle {} complete", self.state.performance_metrics.cycles);
        Ok(true)
    }

    fn is_done(&self) -> bool {
        !self.state.instruction_at_pc()
            && self
                .registers
                .iter()
                .all(|register| register.instruction() == Instruction::Empty)
    }

    fn performance_metrics_mut(&mut self) -> &mut PerformanceMetrics {
        &mut self.state.performance_metrics
    }
}

/// IF: read the instruction at the pc and advance the pc by its length.
/// Branch prediction is static not-taken, so the pc just moves
/// sequentially; a wrong prediction is repaired by the memory stage.
fn fetch_stage(state: &mut ArchitecturalState) -> PipelineRegister {
    if !state.instruction_at_pc() {
        return PipelineRegister::Fetch(FetchRegister::default());
    }
    let address_of_instruction = state.program_counter;
    let instruction = *state
        .instruction_memory
        .read(address_of_instruction)
        .expect("pc points at an instruction");
    state.program_counter = address_of_instruction.wrapping_add(instruction.length());
    PipelineRegister::Fetch(FetchRegister {
        instruction,
        address_of_instruction: Some(address_of_instruction),
        branch_prediction: Some(false),
        pc_plus_instruction_length: Some(
            address_of_instruction.wrapping_add(instruction.length()),
        ),
    })
}

/// ID: read the register file, generate the control word, and stall on
/// data hazards by re-fetching the own instruction until the producer
/// has passed write-back
fn decode_stage(
    input: &PipelineRegister,
    snapshot: &[PipelineRegister; STAGE_COUNT],
    state: &ArchitecturalState,
    detect_data_hazards: bool,
) -> PipelineRegister {
    let PipelineRegister::Fetch(fetch) = input else {
        return PipelineRegister::Decode(DecodeRegister::default());
    };

    let (
        register_read_addr_1,
        register_read_addr_2,
        register_read_data_1,
        register_read_data_2,
        imm,
    ) = fetch.instruction.access_register_file(state);
    let write_register = fetch.instruction.write_register();

    let mut flush_signal = None;
    if detect_data_hazards {
        let write_registers_of_later_stages = snapshot[1..1 + STAGES_UNTIL_WRITEBACK]
            .iter()
            .map(|register| register.instruction().write_register());
        for register in write_registers_of_later_stages {
            // A hazard through x0 is no hazard
            let Some(register) = register.filter(|&r| r != 0) else {
                continue;
            };
            if register_read_addr_1 == Some(register) || register_read_addr_2 == Some(register)
            {
                let address = fetch
                    .address_of_instruction
                    .expect("hazardous instruction has an address");
                debug!(
                    "data hazard on x{register}: stalling `{}`",
                    fetch.instruction
                );
                flush_signal = Some(FlushSignal {
                    inclusive: true,
                    address,
                });
                break;
            }
        }
    }

    PipelineRegister::Decode(DecodeRegister {
        instruction: fetch.instruction,
        register_read_addr_1,
        register_read_addr_2,
        register_read_data_1,
        register_read_data_2,
        imm,
        write_register,
        control_unit_signals: fetch.instruction.control_unit_signals(),
        branch_prediction: fetch.branch_prediction,
        flush_signal,
        pc_plus_instruction_length: fetch.pc_plus_instruction_length,
        address_of_instruction: fetch.address_of_instruction,
    })
}

/// EX: select the ALU inputs according to the control word and run the
/// instruction's combinational logic; also compute pc + imm as the
/// branch/jump target for the memory stage
fn execute_stage(input: &PipelineRegister) -> PipelineRegister {
    let PipelineRegister::Decode(decode) = input else {
        return PipelineRegister::Execute(ExecuteRegister::default());
    };

    let signals = decode.control_unit_signals;
    let alu_in_1 = if signals.alu_src_1 {
        decode.register_read_data_1
    } else {
        decode.address_of_instruction
    };
    let alu_in_2 = if signals.alu_src_2 {
        decode.imm
    } else {
        decode.register_read_data_2
    };
    let (comparison, result) = decode.instruction.alu_compute(alu_in_1, alu_in_2);
    let pc_plus_imm = match (decode.imm, decode.address_of_instruction) {
        (Some(imm), Some(address)) => Some(address.wrapping_add(imm)),
        _ => None,
    };

    PipelineRegister::Execute(ExecuteRegister {
        instruction: decode.instruction,
        alu_in_1,
        alu_in_2,
        register_read_data_1: decode.register_read_data_1,
        register_read_data_2: decode.register_read_data_2,
        imm: decode.imm,
        result,
        comparison,
        write_register: decode.write_register,
        control_unit_signals: signals,
        pc_plus_imm,
        branch_prediction: decode.branch_prediction,
        pc_plus_instruction_length: decode.pc_plus_instruction_length,
        address_of_instruction: decode.address_of_instruction,
    })
}

/// MEM: perform the instruction's memory access and resolve control
/// transfers: a mispredicted branch or a jump flushes the younger stages
/// and redirects the pc to pc + imm; jalr redirects to the ALU result
fn memory_stage(
    input: &PipelineRegister,
    state: &mut ArchitecturalState,
) -> Result<PipelineRegister, InstructionExecutionError> {
    let PipelineRegister::Execute(execute) = input else {
        return Ok(PipelineRegister::Memory(MemoryRegister::default()));
    };

    let memory_address = execute.result;
    let memory_write_data = execute.register_read_data_2;
    let memory_read_data = execute
        .instruction
        .memory_access(memory_address, memory_write_data, state)
        .map_err(|cause| InstructionExecutionError {
            address: execute.address_of_instruction.unwrap_or_default(),
            instruction_repr: execute.instruction.to_string(),
            cause,
        })?;

    let signals = execute.control_unit_signals;
    let comparison_or_jump = signals.jump || execute.comparison.unwrap_or(false);
    let incorrect_branch_prediction =
        signals.branch && Some(comparison_or_jump) != execute.branch_prediction;

    let flush_signal = if incorrect_branch_prediction || signals.jump {
        // pc + imm should have been written to the pc
        Some(FlushSignal {
            inclusive: false,
            address: execute.pc_plus_imm.expect("control transfer has a target"),
        })
    } else if signals.alu_to_pc {
        // the ALU result should have been written to the pc
        Some(FlushSignal {
            inclusive: false,
            address: execute.result.expect("jalr computed a target"),
        })
    } else {
        None
    };

    if flush_signal.is_some() {
        match execute.instruction {
            Instruction::BType { .. } => state.performance_metrics.branch_count += 1,
            Instruction::JType { .. } => state.performance_metrics.procedure_count += 1,
            _ => (),
        }
    }

    Ok(PipelineRegister::Memory(MemoryRegister {
        instruction: execute.instruction,
        memory_address,
        result: execute.result,
        memory_write_data,
        memory_read_data,
        comparison: execute.comparison,
        comparison_or_jump,
        write_register: execute.write_register,
        control_unit_signals: signals,
        pc_plus_imm: execute.pc_plus_imm,
        flush_signal,
        pc_plus_instruction_length: execute.pc_plus_instruction_length,
        imm: execute.imm,
        address_of_instruction: execute.address_of_instruction,
    }))
}

/// WB: select the write-back value according to wb_src and hand it to
/// the instruction's write-back hook; retired instructions are counted
/// here, so flushed instructions never count
fn writeback_stage(
    input: &PipelineRegister,
    state: &mut ArchitecturalState,
) -> PipelineRegister {
    let PipelineRegister::Memory(memory) = input else {
        return PipelineRegister::Writeback(WritebackRegister::default());
    };

    if memory.instruction != Instruction::Empty {
        state.performance_metrics.instruction_count += 1;
    }

    let register_write_data = match memory.control_unit_signals.wb_src {
        Some(WbSrc::PcPlusLength) => memory.pc_plus_instruction_length,
        Some(WbSrc::MemoryReadData) => memory.memory_read_data,
        Some(WbSrc::AluResult) => memory.result,
        Some(WbSrc::Imm) => memory.imm,
        None => None,
    };
    memory
        .instruction
        .write_back(memory.write_register, register_write_data, state);

    PipelineRegister::Writeback(WritebackRegister {
        instruction: memory.instruction,
        register_write_data,
        write_register: memory.write_register,
        memory_read_data: memory.memory_read_data,
        alu_result: memory.result,
        control_unit_signals: memory.control_unit_signals,
        pc_plus_instruction_length: memory.pc_plus_instruction_length,
        imm: memory.imm,
        address_of_instruction: memory.address_of_instruction,
    })
}
