use crate::{ExecutionError, MachineConfig, Mnemonic};

use super::{
    bus::Bus,
    flags::Flags,
    operand::{Operand, Width},
    registers::{Reg32, Registers},
};

/// Everything an instruction handler is allowed to touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuState {
    pub registers: Registers,
    pub flags: Flags,
    pub bus: Bus,
    /// Characters written by the console interrupts. Survives `reset`.
    pub console: String,
    pub halted: bool,
}

impl CpuState {
    pub fn new(config: &MachineConfig) -> Self {
        let mut state = Self {
            registers: Registers::default(),
            flags: Flags::default(),
            bus: Bus::new(config.memory_size, config.lcd_width, config.lcd_height),
            console: String::new(),
            halted: false,
        };
        state.reset();
        state
    }

    pub fn reset(&mut self) {
        self.registers = Registers::default();
        self.registers.set(Reg32::Esp, self.bus.bank_a.len());
        self.flags = Flags::default();
        self.bus.reset();
        self.halted = false;
    }

    pub fn read(&mut self, operand: &Operand, width: Width) -> Result<u32, ExecutionError> {
        match operand {
            Operand::Register(reg) => Ok(width.truncate(self.registers.get(*reg))),
            Operand::SubRegister(reg) => Ok(self.registers.get8(*reg) as u32),
            Operand::Immediate(value) => Ok(width.truncate(*value)),
            Operand::Memory(mem) => {
                let address = mem.effective_address(&self.registers);
                self.bus.read(address, width)
            }
        }
    }

    pub fn write(
        &mut self,
        mnemonic: Mnemonic,
        operand: &Operand,
        width: Width,
        value: u32,
    ) -> Result<(), ExecutionError> {
        match operand {
            Operand::Register(reg) => {
                self.registers.set(*reg, width.truncate(value));
                Ok(())
            }
            Operand::SubRegister(reg) => {
                self.registers.set8(*reg, value as u8);
                Ok(())
            }
            Operand::Memory(mem) => {
                let address = mem.effective_address(&self.registers);
                self.bus.write(address, width, value)
            }
            Operand::Immediate(_) => Err(ExecutionError::InvalidDestination(mnemonic)),
        }
    }

    pub fn push(&mut self, value: u32) -> Result<(), ExecutionError> {
        let sp = self.registers.get(Reg32::Esp).wrapping_sub(4);
        self.bus.write(sp, Width::Dword, value)?;
        self.registers.set(Reg32::Esp, sp);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<u32, ExecutionError> {
        let sp = self.registers.get(Reg32::Esp);
        let value = self.bus.read(sp, Width::Dword)?;
        self.registers.set(Reg32::Esp, sp.wrapping_add(4));
        Ok(value)
    }
}
