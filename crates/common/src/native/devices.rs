//! Memory-mapped devices: a write-only pixel display and a keyboard event queue.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lcd {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Lcd {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; (width * height) as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major, `width * height` bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get((y * self.width + x) as usize).copied()
    }

    /// Writes past the end of the panel are dropped.
    pub fn write(&mut self, offset: u32, value: u8) {
        if let Some(pixel) = self.pixels.get_mut(offset as usize) {
            *pixel = value;
        }
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub keycode: u8,
    pub pressed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    queue: VecDeque<KeyEvent>,
    last_keycode: u8,
    last_pressed: bool,
}

impl Keyboard {
    pub fn push(&mut self, event: KeyEvent) {
        self.queue.push_back(event);
    }

    /// Takes the oldest event and latches it into the keycode/state registers.
    pub fn pop(&mut self) -> Option<KeyEvent> {
        let event = self.queue.pop_front()?;
        self.last_keycode = event.keycode;
        self.last_pressed = event.pressed;
        Some(event)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn status(&self) -> u8 {
        u8::from(!self.queue.is_empty())
    }

    pub fn keycode(&self) -> u8 {
        self.last_keycode
    }

    pub fn keystate(&self) -> u8 {
        u8::from(self.last_pressed)
    }

    /// What a program sees when it reads the keycode register: the next
    /// event's code, or 0 when nothing is queued.
    pub fn read_keycode_register(&mut self) -> u8 {
        self.pop().map_or(0, |event| event.keycode)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lcd_drops_out_of_bounds_writes() {
        let mut lcd = Lcd::new(4, 2);
        lcd.write(5, 7);
        lcd.write(8, 9);
        lcd.write(u32::MAX, 9);
        assert_eq!(lcd.pixel(1, 1), Some(7));
        assert_eq!(lcd.pixel(4, 0), None);
        assert_eq!(lcd.pixels().iter().filter(|&&p| p != 0).count(), 1);

        lcd.clear();
        assert!(lcd.pixels().iter().all(|&p| p == 0));
    }

    #[test]
    fn test_keyboard_fifo() {
        let mut kb = Keyboard::default();
        assert_eq!(kb.status(), 0);

        kb.push(KeyEvent {
            keycode: b'A',
            pressed: true,
        });
        kb.push(KeyEvent {
            keycode: b'A',
            pressed: false,
        });
        assert_eq!(kb.status(), 1);
        assert_eq!(kb.pending(), 2);

        assert_eq!(kb.read_keycode_register(), b'A');
        assert_eq!(kb.keystate(), 1);
        assert_eq!(kb.read_keycode_register(), b'A');
        assert_eq!(kb.keystate(), 0);
        assert_eq!(kb.status(), 0);
    }

    #[test]
    fn test_empty_keyboard_keeps_last_event() {
        let mut kb = Keyboard::default();
        kb.push(KeyEvent {
            keycode: 13,
            pressed: true,
        });
        kb.pop();
        assert_eq!(kb.read_keycode_register(), 0);
        assert_eq!(kb.keycode(), 13);
        assert_eq!(kb.keystate(), 1);
    }
}
