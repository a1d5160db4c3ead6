use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

mod mnemonic;
pub mod native;

pub use mnemonic::{Condition, ControlFlow, LoopKind, Mnemonic};

/// Size of a memory bank when nothing else is configured, and the upper bound
/// for bank A (the I/O window starts right after it).
pub const DEFAULT_MEMORY_SIZE: u32 = 0x1_0000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperandError {
    #[error("Invalid hexadecimal literal: {0}")]
    InvalidHex(String),
    #[error("Invalid binary literal: {0}")]
    InvalidBinary(String),
    #[error("Invalid decimal literal: {0}")]
    InvalidDecimal(String),
    #[error("Invalid character literal: {0}")]
    InvalidCharacter(String),
    #[error("Invalid memory expression: {0}")]
    InvalidMemoryExpression(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error(transparent)]
    Operand(#[from] OperandError),
    #[error("Unknown instruction: {0}")]
    UnknownInstruction(String),
    #[error("{mnemonic}: undefined label '{label}'")]
    UndefinedLabel { mnemonic: String, label: String },
    #[error("Memory-to-memory MOV not allowed")]
    MemoryToMemoryMove,
    #[error("Unknown I/O address (@{:#02x})", .0)]
    UnknownIoAddress(u32),
    #[error("Trying to write outside of memory (@{:#02x}/@{})", .0, .0)]
    InvalidMemoryLocation(u32),
    #[error("{0}: destination operand is not writable")]
    InvalidDestination(Mnemonic),
    #[error("The machine faulted and must be reset or reloaded")]
    Faulted,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("LCD {axis} must be a power of two between 2 and 256, got {value}")]
    LcdDimension { axis: &'static str, value: u32 },
    #[error("Memory size must be between 1 and {max:#x} bytes, got {value:#x}")]
    MemorySize { value: u32, max: u32 },
}

#[derive(Error, Debug)]
pub enum ProgramFileError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Encoding(#[from] bincode::Error),
}

/// Flag and legality profile used by the engine.
#[derive(
    Debug, Display, EnumString, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CompatibilityMode {
    /// Recomputes ZF/SF wherever that helps students see what happened.
    #[default]
    Teaching,
    /// Leaves flags alone where real hardware leaves them undefined.
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    pub memory_size: u32,
    pub lcd_width: u32,
    pub lcd_height: u32,
    pub mode: CompatibilityMode,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            memory_size: DEFAULT_MEMORY_SIZE,
            lcd_width: 32,
            lcd_height: 32,
            mode: CompatibilityMode::Teaching,
        }
    }
}

impl MachineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_size == 0 || self.memory_size > DEFAULT_MEMORY_SIZE {
            return Err(ConfigError::MemorySize {
                value: self.memory_size,
                max: DEFAULT_MEMORY_SIZE,
            });
        }
        for (axis, value) in [("width", self.lcd_width), ("height", self.lcd_height)] {
            if !(2..=256).contains(&value) || !value.is_power_of_two() {
                return Err(ConfigError::LcdDimension { axis, value });
            }
        }
        Ok(())
    }
}

/// One assembled source line. Produced by the assembler, never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionRecord {
    pub line: u32,
    pub mnemonic: String,
    pub operands: Vec<String>,
    pub text: String,
}

impl InstructionRecord {
    #[must_use]
    pub fn new(line: u32, mnemonic: &str, operands: &[&str]) -> Self {
        let text = if operands.is_empty() {
            mnemonic.to_string()
        } else {
            format!("{mnemonic} {}", operands.join(", "))
        };
        Self {
            line,
            mnemonic: mnemonic.to_string(),
            operands: operands.iter().map(|o| o.to_string()).collect(),
            text,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub instructions: Vec<InstructionRecord>,
    pub labels: IndexMap<String, usize>,
}

impl Program {
    #[must_use]
    pub fn new(instructions: Vec<InstructionRecord>, labels: IndexMap<String, usize>) -> Self {
        Self {
            instructions,
            labels,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ProgramFileHeader {
    pub source: String,
}

#[derive(Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ProgramFile {
    pub header: ProgramFileHeader,
    pub program: Program,
}

impl ProgramFile {
    #[must_use]
    pub fn new(program: Program) -> Self {
        Self {
            program,
            ..Default::default()
        }
    }
    pub fn load<P: AsRef<Path>>(p: P) -> Result<Self, ProgramFileError> {
        let reader = BufReader::new(File::open(p.as_ref())?);
        Ok(bincode::deserialize_from(reader)?)
    }
    pub fn save<P: AsRef<Path>>(&self, p: P) -> Result<(), ProgramFileError> {
        let writer = BufWriter::new(File::create(p.as_ref())?);
        Ok(bincode::serialize_into(writer, self)?)
    }
}

impl From<Program> for ProgramFile {
    fn from(value: Program) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Run,
    RunFor(usize),
    UntilBreakpoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Halted,
    StepLimit,
    Breakpoint(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub steps: usize,
    pub last_line: Option<u32>,
    pub stop: StopReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(MachineConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_lcd_dimensions_must_be_powers_of_two() {
        let config = MachineConfig {
            lcd_width: 48,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::LcdDimension {
                axis: "width",
                value: 48
            })
        );

        let config = MachineConfig {
            lcd_height: 512,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MachineConfig {
            lcd_width: 2,
            lcd_height: 256,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_memory_size_is_bounded() {
        let config = MachineConfig {
            memory_size: DEFAULT_MEMORY_SIZE + 1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MemorySize { .. })
        ));
    }

    #[test]
    fn test_mode_parses_case_insensitively() {
        assert_eq!(
            "STRICT".parse::<CompatibilityMode>().unwrap(),
            CompatibilityMode::Strict
        );
        assert_eq!(CompatibilityMode::Teaching.to_string(), "teaching");
    }

    #[test]
    fn test_record_text() {
        let record = InstructionRecord::new(3, "mov", &["eax", "5"]);
        assert_eq!(record.text, "mov eax, 5");
        assert_eq!(record.operands, vec!["eax", "5"]);
    }
}
