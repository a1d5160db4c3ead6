use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};

use crate::ExecutionError;

use super::{
    devices::{Keyboard, Lcd},
    operand::Width,
};

/// First address of the I/O window. Everything below belongs to bank A.
pub const IO_BASE: u32 = 0x1_0000;

/// The LCD window always spans the largest supported panel (256×256); the
/// live pixels are the first `width * height` bytes of it.
pub const LCD_BASE: u32 = IO_BASE;
pub const LCD_WINDOW_SIZE: u32 = 256 * 256;

pub const KEYBOARD_STATUS: u32 = 0x2_0010;
pub const KEYBOARD_KEYCODE: u32 = 0x2_0011;
pub const KEYBOARD_KEYSTATE: u32 = 0x2_0012;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBank {
    bytes: Vec<u8>,
}

impl MemoryBank {
    pub fn new(size: u32) -> Self {
        Self {
            bytes: vec![0; size as usize],
        }
    }

    pub fn len(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The part of `range` that lies inside the bank.
    pub fn slice(&self, range: Range<u32>) -> &[u8] {
        let end = (range.end as usize).min(self.bytes.len());
        let start = (range.start as usize).min(end);
        &self.bytes[start..end]
    }

    /// Out-of-range reads yield 0.
    pub fn read_byte(&self, address: u32) -> u8 {
        self.bytes.get(address as usize).copied().unwrap_or(0)
    }

    pub fn write_byte(&mut self, address: u32, value: u8) -> Result<(), ExecutionError> {
        match self.bytes.get_mut(address as usize) {
            Some(byte) => {
                *byte = value;
                Ok(())
            }
            None => Err(ExecutionError::InvalidMemoryLocation(address)),
        }
    }

    pub fn read_u32(&self, address: u32) -> u32 {
        let mut buf = [0u8; 4];
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.read_byte(address.wrapping_add(i as u32));
        }
        LittleEndian::read_u32(&buf)
    }

    pub fn write_u32(&mut self, address: u32, value: u32) -> Result<(), ExecutionError> {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        for (i, byte) in buf.into_iter().enumerate() {
            self.write_byte(address.wrapping_add(i as u32), byte)?;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }
}

/// Routes byte accesses to bank A or to the memory-mapped devices.
///
/// Bank B lives here as well so that one value owns every piece of machine
/// memory, but no address reaches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bus {
    pub bank_a: MemoryBank,
    pub bank_b: MemoryBank,
    pub lcd: Lcd,
    pub keyboard: Keyboard,
}

impl Bus {
    pub fn new(memory_size: u32, lcd_width: u32, lcd_height: u32) -> Self {
        Self {
            bank_a: MemoryBank::new(memory_size),
            bank_b: MemoryBank::new(memory_size),
            lcd: Lcd::new(lcd_width, lcd_height),
            keyboard: Keyboard::default(),
        }
    }

    pub fn read_byte(&mut self, address: u32) -> Result<u8, ExecutionError> {
        if address >= IO_BASE {
            self.read_io(address)
        } else {
            Ok(self.bank_a.read_byte(address))
        }
    }

    pub fn write_byte(&mut self, address: u32, value: u8) -> Result<(), ExecutionError> {
        if address >= IO_BASE {
            self.write_io(address, value)
        } else {
            self.bank_a.write_byte(address, value)
        }
    }

    /// Dword accesses to memory are four independent byte accesses, little-endian.
    /// A device register is touched once whatever the width; only the low byte
    /// of a value moves.
    pub fn read(&mut self, address: u32, width: Width) -> Result<u32, ExecutionError> {
        match width {
            Width::Byte => self.read_byte(address).map(u32::from),
            Width::Dword if address >= IO_BASE => self.read_io(address).map(u32::from),
            Width::Dword => {
                let mut buf = [0u8; 4];
                for (i, byte) in buf.iter_mut().enumerate() {
                    *byte = self.read_byte(address.wrapping_add(i as u32))?;
                }
                Ok(LittleEndian::read_u32(&buf))
            }
        }
    }

    pub fn write(&mut self, address: u32, width: Width, value: u32) -> Result<(), ExecutionError> {
        match width {
            Width::Byte => self.write_byte(address, value as u8),
            Width::Dword if address >= IO_BASE => self.write_io(address, value as u8),
            Width::Dword => {
                let mut buf = [0u8; 4];
                LittleEndian::write_u32(&mut buf, value);
                for (i, byte) in buf.into_iter().enumerate() {
                    self.write_byte(address.wrapping_add(i as u32), byte)?;
                }
                Ok(())
            }
        }
    }

    pub fn read_io(&mut self, address: u32) -> Result<u8, ExecutionError> {
        match address {
            a if is_lcd(a) => Ok(0),
            KEYBOARD_STATUS => Ok(self.keyboard.status()),
            KEYBOARD_KEYCODE => Ok(self.keyboard.read_keycode_register()),
            KEYBOARD_KEYSTATE => Ok(self.keyboard.keystate()),
            _ => Err(ExecutionError::UnknownIoAddress(address)),
        }
    }

    pub fn write_io(&mut self, address: u32, value: u8) -> Result<(), ExecutionError> {
        match address {
            a if is_lcd(a) => {
                self.lcd.write(a - LCD_BASE, value);
                Ok(())
            }
            KEYBOARD_STATUS | KEYBOARD_KEYCODE | KEYBOARD_KEYSTATE => Ok(()),
            _ => Err(ExecutionError::UnknownIoAddress(address)),
        }
    }

    pub fn reset(&mut self) {
        self.bank_a.clear();
        self.bank_b.clear();
        self.lcd.clear();
        self.keyboard.clear();
    }
}

fn is_lcd(address: u32) -> bool {
    (LCD_BASE..LCD_BASE + LCD_WINDOW_SIZE).contains(&address)
}
