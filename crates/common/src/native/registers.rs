use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

pub const REGISTER_COUNT: usize = 8;

#[derive(
    Debug,
    Display,
    EnumString,
    EnumIter,
    PartialEq,
    Eq,
    Hash,
    Copy,
    Clone,
    FromPrimitive,
    ToPrimitive,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[repr(u8)]
pub enum Reg32 {
    Eax = 0,
    Ecx = 1,
    Edx = 2,
    Ebx = 3,
    Esp = 4,
    Ebp = 5,
    Esi = 6,
    Edi = 7,
}

impl Reg32 {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::from_usize(index)
    }
}

/// Byte views over the low four registers.
#[derive(Debug, Display, EnumString, EnumIter, PartialEq, Eq, Hash, Copy, Clone)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Reg8 {
    Al,
    Cl,
    Dl,
    Bl,
    Ah,
    Ch,
    Dh,
    Bh,
}

impl Reg8 {
    pub fn parent(self) -> Reg32 {
        match self {
            Reg8::Al | Reg8::Ah => Reg32::Eax,
            Reg8::Cl | Reg8::Ch => Reg32::Ecx,
            Reg8::Dl | Reg8::Dh => Reg32::Edx,
            Reg8::Bl | Reg8::Bh => Reg32::Ebx,
        }
    }

    /// Bit offset of the byte inside its parent: 0 for the low byte, 8 for the high one.
    pub fn offset(self) -> u32 {
        match self {
            Reg8::Al | Reg8::Cl | Reg8::Dl | Reg8::Bl => 0,
            Reg8::Ah | Reg8::Ch | Reg8::Dh | Reg8::Bh => 8,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    values: [u32; REGISTER_COUNT],
}

impl Registers {
    pub fn get(&self, reg: Reg32) -> u32 {
        self.values[reg.index()]
    }

    pub fn set(&mut self, reg: Reg32, value: u32) {
        self.values[reg.index()] = value;
    }

    pub fn get8(&self, reg: Reg8) -> u8 {
        (self.get(reg.parent()) >> reg.offset()) as u8
    }

    pub fn set8(&mut self, reg: Reg8, value: u8) {
        let parent = reg.parent();
        let mask = 0xFF << reg.offset();
        let merged = (self.get(parent) & !mask) | ((value as u32) << reg.offset());
        self.set(parent, merged);
    }

    pub fn as_array(&self) -> [u32; REGISTER_COUNT] {
        self.values
    }
}
