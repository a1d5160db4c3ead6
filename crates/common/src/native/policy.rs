use crate::CompatibilityMode;

use super::{flags::Flags, operand::Width};

/// The parts of the flag semantics that depend on the compatibility mode.
///
/// The engine picks one policy per step and hands it to the handlers.
pub trait FlagPolicy: Sync {
    fn mode(&self) -> CompatibilityMode;

    fn allows_memory_to_memory_move(&self) -> bool;

    /// Applied after CF/OF of a rotate have been computed.
    fn after_rotate(&self, flags: Flags, result: u32, width: Width) -> Flags;

    /// Applied after CF/OF of a multiply have been computed.
    fn after_multiply(&self, flags: Flags, low: u32, width: Width) -> Flags;

    fn after_divide(&self, flags: Flags, quotient: u32, width: Width) -> Flags;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TeachingFlags;

#[derive(Debug, Clone, Copy, Default)]
pub struct StrictFlags;

impl FlagPolicy for TeachingFlags {
    fn mode(&self) -> CompatibilityMode {
        CompatibilityMode::Teaching
    }

    fn allows_memory_to_memory_move(&self) -> bool {
        true
    }

    fn after_rotate(&self, flags: Flags, result: u32, width: Width) -> Flags {
        flags.with_result(result, width)
    }

    fn after_multiply(&self, flags: Flags, low: u32, width: Width) -> Flags {
        flags.with_result(low, width)
    }

    // CF/OF keep their prior value.
    fn after_divide(&self, flags: Flags, quotient: u32, width: Width) -> Flags {
        flags.with_result(quotient, width)
    }
}

impl FlagPolicy for StrictFlags {
    fn mode(&self) -> CompatibilityMode {
        CompatibilityMode::Strict
    }

    fn allows_memory_to_memory_move(&self) -> bool {
        false
    }

    // ZF/SF are undefined after a rotate on hardware; they keep their value.
    fn after_rotate(&self, flags: Flags, _result: u32, _width: Width) -> Flags {
        flags
    }

    fn after_multiply(&self, flags: Flags, _low: u32, _width: Width) -> Flags {
        flags.with_zero(false).with_sign(false)
    }

    fn after_divide(&self, flags: Flags, _quotient: u32, _width: Width) -> Flags {
        flags.with_carry(false).with_overflow(false)
    }
}

impl CompatibilityMode {
    pub fn policy(self) -> &'static dyn FlagPolicy {
        match self {
            CompatibilityMode::Teaching => &TeachingFlags,
            CompatibilityMode::Strict => &StrictFlags,
        }
    }
}
