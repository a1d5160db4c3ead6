//! The execution engine.
//!
//! [`Machine`] owns the CPU state, the loaded program and the control-flow
//! bookkeeping (instruction pointer, call stack). One call to [`Machine::step`]
//! executes exactly one instruction record.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use slog::{debug, o, trace, warn, Discard, Logger};

use crate::{
    CompatibilityMode, ConfigError, ControlFlow, ExecutionError, InstructionRecord,
    MachineConfig, Mnemonic, Program, RunMode, RunStats, StopReason,
};

pub mod bus;
pub mod devices;
pub mod flags;
pub mod instructions;
pub mod operand;
pub mod policy;
pub mod registers;
pub mod state;

#[cfg(test)]
mod tests;

pub use devices::{KeyEvent, Lcd};
pub use flags::Flags;
pub use instructions::Dispatch;
pub use operand::{resolve, Operand, Width};
pub use registers::{Reg32, Reg8};
pub use state::CpuState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineState {
    Runnable,
    Halted,
    Faulted,
}

/// A serialisable copy of everything a debugger shows between steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuSnapshot {
    pub registers: [u32; registers::REGISTER_COUNT],
    pub flags: Flags,
    pub halted: bool,
    pub running: bool,
    pub instruction_pointer: usize,
    pub call_stack_depth: usize,
}

#[derive(Debug)]
pub struct Machine {
    cpu: CpuState,
    program: Vec<InstructionRecord>,
    labels: IndexMap<String, usize>,
    instruction_pointer: usize,
    call_stack: Vec<usize>,
    faulted: bool,
    running: bool,
    mode: CompatibilityMode,
    breakpoints: BTreeSet<u32>,
    logger: Logger,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Result<Self, ConfigError> {
        Self::with_logger(config, None)
    }

    pub fn with_logger<L>(config: MachineConfig, logger: L) -> Result<Self, ConfigError>
    where
        L: Into<Option<Logger>>,
    {
        config.validate()?;

        let logger = logger
            .into()
            .unwrap_or_else(|| Logger::root(Discard, o!()))
            .new(o!("memory_size" => config.memory_size, "mode" => config.mode.to_string()));

        Ok(Self {
            cpu: CpuState::new(&config),
            program: Vec::new(),
            labels: IndexMap::new(),
            instruction_pointer: 0,
            call_stack: Vec::new(),
            faulted: false,
            running: false,
            mode: config.mode,
            breakpoints: BTreeSet::new(),
            logger,
        })
    }

    /// Replaces the program. Registers and memory are left alone so callers can preload data.
    pub fn load(&mut self, program: Program) {
        debug!(self.logger, "load program";
            "instructions" => program.instructions.len(),
            "labels" => program.labels.len());

        self.program = program.instructions;
        self.labels = program.labels;
        self.instruction_pointer = 0;
        self.call_stack.clear();
        self.cpu.halted = false;
        self.faulted = false;
        self.running = false;
    }

    /// Back to power-on state. The console, breakpoints, mode and program survive.
    pub fn reset(&mut self) {
        debug!(self.logger, "reset");
        self.cpu.reset();
        self.instruction_pointer = 0;
        self.call_stack.clear();
        self.faulted = false;
        self.running = false;
    }

    pub fn state(&self) -> MachineState {
        if self.faulted {
            MachineState::Faulted
        } else if self.cpu.halted {
            MachineState::Halted
        } else {
            MachineState::Runnable
        }
    }

    pub fn is_halted(&self) -> bool {
        self.cpu.halted
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    fn halt(&mut self) {
        if !self.cpu.halted {
            debug!(self.logger, "halted"; "pointer" => self.instruction_pointer);
        }
        self.cpu.halted = true;
        self.running = false;
    }

    /// Executes the instruction at the pointer and returns its source line,
    /// or `None` once the machine is halted.
    pub fn step(&mut self) -> Result<Option<u32>, ExecutionError> {
        if self.faulted {
            return Err(ExecutionError::Faulted);
        }
        if self.cpu.halted {
            self.running = false;
            return Ok(None);
        }

        let ip = self.instruction_pointer;
        let Some(record) = self.program.get(ip) else {
            self.halt();
            return Ok(None);
        };
        let line = record.line;

        let mnemonic = record
            .mnemonic
            .parse::<Mnemonic>()
            .map_err(|_| ExecutionError::UnknownInstruction(record.mnemonic.clone()))?;
        let flow = mnemonic.control_flow();

        trace!(self.logger, "step";
            "line" => line, "pointer" => ip, "mnemonic" => %mnemonic);

        // Targets are resolved before anything runs, so a bad label mutates nothing.
        let target = match (flow, record.operands.as_slice()) {
            (Some(flow), [label]) if flow.has_target() => match self.labels.get(label) {
                Some(&index) => Some(index),
                None => {
                    warn!(self.logger, "undefined label"; "line" => line, "label" => label);
                    self.faulted = true;
                    self.running = false;
                    return Err(ExecutionError::UndefinedLabel {
                        mnemonic: mnemonic.to_string(),
                        label: label.clone(),
                    });
                }
            },
            _ => None,
        };

        let outcome = instructions::dispatch(
            &mut self.cpu,
            mnemonic,
            &record.operands,
            self.mode.policy(),
        )?;

        let redirect = |taken: bool| match (taken, target) {
            (true, Some(index)) => index,
            _ => ip + 1,
        };

        let next = match (outcome, flow) {
            (Dispatch::Skipped { expected, got }, _) => {
                debug!(self.logger, "wrong operand count, skipped";
                    "line" => line, "mnemonic" => %mnemonic,
                    "expected" => ?expected, "got" => got);
                ip + 1
            }
            (Dispatch::Executed, None) if self.cpu.halted => ip,
            (Dispatch::Executed, None) => ip + 1,
            (Dispatch::Executed, Some(ControlFlow::Jump(condition))) => {
                redirect(condition.map_or(true, |c| c.holds(self.cpu.flags)))
            }
            (Dispatch::Executed, Some(ControlFlow::Call)) => {
                self.call_stack.push(ip + 1);
                redirect(true)
            }
            (Dispatch::Executed, Some(ControlFlow::Return)) => {
                self.call_stack.pop().unwrap_or(ip + 1)
            }
            (Dispatch::Executed, Some(ControlFlow::Loop(kind))) => {
                let counter = self.cpu.registers.get(Reg32::Ecx);
                redirect(kind.should_repeat(counter, self.cpu.flags))
            }
        };

        self.instruction_pointer = next;
        if self.cpu.halted || next >= self.program.len() {
            self.halt();
        } else {
            self.running = true;
        }

        Ok(Some(line))
    }

    /// Runs a single record outside the loaded program. Control flow is not applied.
    pub fn execute_instruction(
        &mut self,
        record: &InstructionRecord,
    ) -> Result<Dispatch, ExecutionError> {
        let mnemonic = record
            .mnemonic
            .parse::<Mnemonic>()
            .map_err(|_| ExecutionError::UnknownInstruction(record.mnemonic.clone()))?;
        instructions::dispatch(&mut self.cpu, mnemonic, &record.operands, self.mode.policy())
    }

    pub fn execute(&mut self, run_mode: RunMode) -> Result<RunStats, ExecutionError> {
        let limit = match run_mode {
            RunMode::RunFor(steps) => Some(steps),
            RunMode::Run | RunMode::UntilBreakpoint => None,
        };

        let mut stats = RunStats {
            steps: 0,
            last_line: None,
            stop: StopReason::Halted,
        };

        loop {
            if limit.is_some_and(|limit| stats.steps >= limit) {
                stats.stop = StopReason::StepLimit;
                break;
            }

            let Some(line) = self.step()? else {
                stats.stop = StopReason::Halted;
                break;
            };
            stats.steps += 1;
            stats.last_line = Some(line);

            if self.cpu.halted {
                stats.stop = StopReason::Halted;
                break;
            }
            if run_mode == RunMode::UntilBreakpoint && self.breakpoints.contains(&line) {
                stats.stop = StopReason::Breakpoint(line);
                break;
            }
        }

        debug!(self.logger, "run finished";
            "steps" => stats.steps, "stop" => ?stats.stop);
        Ok(stats)
    }

    pub fn snapshot(&self) -> CpuSnapshot {
        CpuSnapshot {
            registers: self.cpu.registers.as_array(),
            flags: self.cpu.flags,
            halted: self.cpu.halted,
            running: self.running,
            instruction_pointer: self.instruction_pointer,
            call_stack_depth: self.call_stack.len(),
        }
    }

    pub fn print_state(&self) {
        println!();
        println!("========== VM STATE ===========");
        println!();
        println!("IP: {}", self.instruction_pointer);
        println!("State: {:?}", self.state());
        println!("Flags: {:#06x}", self.cpu.flags.bits());
        println!(
            "Registers: {:#?}",
            self.cpu
                .registers
                .as_array()
                .iter()
                .enumerate()
                .filter_map(|(i, v)| Reg32::from_index(i).map(|r| (r.to_string(), *v)))
                .collect::<BTreeMap<_, _>>()
        );
        println!("Call stack depth: {}", self.call_stack.len());
    }

    pub fn instruction_pointer(&self) -> usize {
        self.instruction_pointer
    }

    pub fn program(&self) -> &[InstructionRecord] {
        &self.program
    }

    pub fn labels(&self) -> &IndexMap<String, usize> {
        &self.labels
    }

    pub fn call_stack_depth(&self) -> usize {
        self.call_stack.len()
    }

    //
    // Registers and flags
    //

    pub fn register(&self, reg: Reg32) -> u32 {
        self.cpu.registers.get(reg)
    }

    pub fn set_register(&mut self, reg: Reg32, value: u32) {
        self.cpu.registers.set(reg, value);
    }

    pub fn register8(&self, reg: Reg8) -> u8 {
        self.cpu.registers.get8(reg)
    }

    pub fn set_register8(&mut self, reg: Reg8, value: u8) {
        self.cpu.registers.set8(reg, value);
    }

    /// Case-insensitive lookup over both the 32-bit and the 8-bit names.
    pub fn register_by_name(&self, name: &str) -> Option<u32> {
        if let Ok(reg) = name.parse::<Reg32>() {
            return Some(self.register(reg));
        }
        name.parse::<Reg8>()
            .ok()
            .map(|reg| u32::from(self.register8(reg)))
    }

    pub fn flags(&self) -> Flags {
        self.cpu.flags
    }

    pub fn set_flags(&mut self, flags: Flags) {
        self.cpu.flags = flags;
    }

    //
    // Memory
    //

    pub fn memory_a(&self, range: Range<u32>) -> &[u8] {
        self.cpu.bus.bank_a.slice(range)
    }

    pub fn memory_b(&self, range: Range<u32>) -> &[u8] {
        self.cpu.bus.bank_b.slice(range)
    }

    pub fn read_byte_a(&self, address: u32) -> u8 {
        self.cpu.bus.bank_a.read_byte(address)
    }

    pub fn write_byte_a(&mut self, address: u32, value: u8) -> Result<(), ExecutionError> {
        self.cpu.bus.bank_a.write_byte(address, value)
    }

    pub fn read_u32_a(&self, address: u32) -> u32 {
        self.cpu.bus.bank_a.read_u32(address)
    }

    pub fn write_u32_a(&mut self, address: u32, value: u32) -> Result<(), ExecutionError> {
        self.cpu.bus.bank_a.write_u32(address, value)
    }

    pub fn read_byte_b(&self, address: u32) -> u8 {
        self.cpu.bus.bank_b.read_byte(address)
    }

    pub fn write_byte_b(&mut self, address: u32, value: u8) -> Result<(), ExecutionError> {
        self.cpu.bus.bank_b.write_byte(address, value)
    }

    pub fn read_u32_b(&self, address: u32) -> u32 {
        self.cpu.bus.bank_b.read_u32(address)
    }

    pub fn write_u32_b(&mut self, address: u32, value: u32) -> Result<(), ExecutionError> {
        self.cpu.bus.bank_b.write_u32(address, value)
    }

    //
    // Devices
    //

    pub fn lcd(&self) -> &Lcd {
        &self.cpu.bus.lcd
    }

    pub fn push_key_event(&mut self, event: KeyEvent) {
        trace!(self.logger, "key event";
            "keycode" => event.keycode, "pressed" => event.pressed);
        self.cpu.bus.keyboard.push(event);
    }

    pub fn pop_key_event(&mut self) -> Option<KeyEvent> {
        self.cpu.bus.keyboard.pop()
    }

    pub fn keyboard_status(&self) -> u8 {
        self.cpu.bus.keyboard.status()
    }

    pub fn keyboard_keycode(&self) -> u8 {
        self.cpu.bus.keyboard.keycode()
    }

    pub fn keyboard_keystate(&self) -> u8 {
        self.cpu.bus.keyboard.keystate()
    }

    pub fn console_output(&self) -> &str {
        &self.cpu.console
    }

    pub fn clear_console(&mut self) {
        self.cpu.console.clear();
    }

    //
    // Debugger support
    //

    /// Breakpoints are source lines. `step` never consults them; `execute` does
    /// in [`RunMode::UntilBreakpoint`].
    pub fn add_breakpoint(&mut self, line: u32) -> bool {
        self.breakpoints.insert(line)
    }

    pub fn remove_breakpoint(&mut self, line: u32) -> bool {
        self.breakpoints.remove(&line)
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = u32> + '_ {
        self.breakpoints.iter().copied()
    }

    pub fn mode(&self) -> CompatibilityMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: CompatibilityMode) {
        debug!(self.logger, "mode changed"; "mode" => %mode);
        self.mode = mode;
    }
}
