//! Turns operand tokens into typed operands.
//!
//! Resolution is purely syntactic: registers are named, never read, because
//! the same operand can be a source or a destination depending on where it
//! appears in the instruction.

use crate::OperandError;

use super::registers::{Reg32, Reg8, Registers};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    Byte,
    Dword,
}

impl Width {
    pub const fn bits(self) -> u32 {
        match self {
            Width::Byte => 8,
            Width::Dword => 32,
        }
    }

    pub const fn mask(self) -> u32 {
        match self {
            Width::Byte => 0xFF,
            Width::Dword => u32::MAX,
        }
    }

    pub const fn sign_bit(self) -> u32 {
        1 << (self.bits() - 1)
    }

    pub const fn msb(self, value: u32) -> bool {
        value & self.sign_bit() != 0
    }

    pub const fn truncate(self, value: u32) -> u32 {
        value & self.mask()
    }

    pub const fn sign_extend(self, value: u32) -> i64 {
        match self {
            Width::Byte => value as u8 as i8 as i64,
            Width::Dword => value as i32 as i64,
        }
    }
}

/// `[base + index + displacement]`, optionally sized with `BYTE`/`DWORD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRef {
    pub base: Option<Reg32>,
    pub index: Option<Reg32>,
    pub displacement: u32,
    pub width: Option<Width>,
}

impl MemoryRef {
    pub fn absolute(address: u32) -> Self {
        Self {
            base: None,
            index: None,
            displacement: address,
            width: None,
        }
    }

    pub fn effective_address(&self, registers: &Registers) -> u32 {
        let base = self.base.map_or(0, |r| registers.get(r));
        let index = self.index.map_or(0, |r| registers.get(r));
        base.wrapping_add(index).wrapping_add(self.displacement)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Register(Reg32),
    SubRegister(Reg8),
    Immediate(u32),
    Memory(MemoryRef),
}

impl Operand {
    pub fn is_memory(&self) -> bool {
        matches!(self, Operand::Memory(_))
    }

    pub fn natural_width(&self) -> Option<Width> {
        match self {
            Operand::Register(_) => Some(Width::Dword),
            Operand::SubRegister(_) => Some(Width::Byte),
            Operand::Memory(mem) => mem.width,
            Operand::Immediate(_) => None,
        }
    }
}

/// Width of an operation: the first operand that carries a size decides, dword otherwise.
pub fn operation_width(operands: &[Operand]) -> Width {
    operands
        .iter()
        .find_map(Operand::natural_width)
        .unwrap_or(Width::Dword)
}

pub fn resolve(token: &str) -> Result<Operand, OperandError> {
    let token = token.trim();

    if token.starts_with('\'') {
        return parse_char(token).map(Operand::Immediate);
    }
    if let Some(mem) = parse_memory(token)? {
        return Ok(Operand::Memory(mem));
    }
    if let Ok(reg) = token.parse::<Reg8>() {
        return Ok(Operand::SubRegister(reg));
    }
    if let Ok(reg) = token.parse::<Reg32>() {
        return Ok(Operand::Register(reg));
    }
    parse_immediate(token).map(Operand::Immediate)
}

pub fn parse_immediate(text: &str) -> Result<u32, OperandError> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };

    let value = if let Some(hex) = strip_prefix_ignore_case(digits, "0x") {
        u32::from_str_radix(hex, 16).map_err(|_| OperandError::InvalidHex(text.to_string()))?
    } else if let Some(bin) = strip_prefix_ignore_case(digits, "0b") {
        u32::from_str_radix(bin, 2).map_err(|_| OperandError::InvalidBinary(text.to_string()))?
    } else {
        digits
            .parse::<u32>()
            .map_err(|_| OperandError::InvalidDecimal(text.to_string()))?
    };

    Ok(if negative { value.wrapping_neg() } else { value })
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &text[prefix.len()..])
}

fn parse_char(token: &str) -> Result<u32, OperandError> {
    let invalid = || OperandError::InvalidCharacter(token.to_string());

    let inner = token
        .strip_prefix('\'')
        .and_then(|t| t.strip_suffix('\''))
        .filter(|inner| !inner.is_empty())
        .ok_or_else(invalid)?;

    let c = match inner {
        "\\n" => '\n',
        "\\r" => '\r',
        "\\t" => '\t',
        "\\0" => '\0',
        "\\\\" => '\\',
        "\\'" => '\'',
        _ => {
            let mut chars = inner.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => return Err(invalid()),
            }
        }
    };

    u8::try_from(c).map(u32::from).map_err(|_| invalid())
}

fn split_size_prefix(token: &str) -> (Option<Width>, &str) {
    for (keyword, width) in [("BYTE", Width::Byte), ("DWORD", Width::Dword)] {
        if let Some(rest) = strip_prefix_ignore_case(token, keyword) {
            let rest = rest.trim_start();
            let rest = strip_prefix_ignore_case(rest, "PTR")
                .map(str::trim_start)
                .unwrap_or(rest);
            if rest.starts_with('[') {
                return (Some(width), rest);
            }
        }
    }
    (None, token)
}

fn parse_memory(token: &str) -> Result<Option<MemoryRef>, OperandError> {
    if !token.contains('[') {
        return Ok(None);
    }

    let invalid = || OperandError::InvalidMemoryExpression(token.to_string());

    let (width, body) = split_size_prefix(token);
    let inner = body
        .strip_prefix('[')
        .and_then(|b| b.strip_suffix(']'))
        .map(str::trim)
        .filter(|inner| !inner.is_empty())
        .ok_or_else(invalid)?;

    let mut terms = Vec::new();
    let mut negative = false;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        if c == '+' || c == '-' {
            let text = inner[start..i].trim();
            if text.is_empty() && !(i == 0 && c == '-') {
                return Err(invalid());
            }
            if !text.is_empty() {
                terms.push((negative, text));
            }
            negative = c == '-';
            start = i + 1;
        }
    }
    let last = inner[start..].trim();
    if last.is_empty() {
        return Err(invalid());
    }
    terms.push((negative, last));

    let mut mem = MemoryRef {
        base: None,
        index: None,
        displacement: 0,
        width,
    };

    for (negative, text) in terms {
        if let Ok(reg) = text.parse::<Reg32>() {
            if negative {
                return Err(invalid());
            }
            match (mem.base, mem.index) {
                (None, _) => mem.base = Some(reg),
                (Some(_), None) => mem.index = Some(reg),
                _ => return Err(invalid()),
            }
        } else if text.starts_with(|c: char| c.is_ascii_digit()) {
            let value = parse_immediate(text)?;
            mem.displacement = if negative {
                mem.displacement.wrapping_sub(value)
            } else {
                mem.displacement.wrapping_add(value)
            };
        } else {
            return Err(invalid());
        }
    }

    Ok(Some(mem))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem(base: Option<Reg32>, index: Option<Reg32>, displacement: u32) -> Operand {
        Operand::Memory(MemoryRef {
            base,
            index,
            displacement,
            width: None,
        })
    }

    #[test]
    fn test_registers() {
        assert_eq!(resolve("EAX"), Ok(Operand::Register(Reg32::Eax)));
        assert_eq!(resolve(" esi "), Ok(Operand::Register(Reg32::Esi)));
        assert_eq!(resolve("bh"), Ok(Operand::SubRegister(Reg8::Bh)));
    }

    #[test]
    fn test_immediates() {
        assert_eq!(resolve("42"), Ok(Operand::Immediate(42)));
        assert_eq!(resolve("0x1F"), Ok(Operand::Immediate(0x1F)));
        assert_eq!(resolve("0XfF"), Ok(Operand::Immediate(0xFF)));
        assert_eq!(resolve("0b1010"), Ok(Operand::Immediate(10)));
        assert_eq!(resolve("-1"), Ok(Operand::Immediate(u32::MAX)));
        assert_eq!(resolve("4294967295"), Ok(Operand::Immediate(u32::MAX)));
    }

    #[test]
    fn test_malformed_immediates() {
        assert_eq!(
            resolve("0xZZ"),
            Err(OperandError::InvalidHex("0xZZ".to_string()))
        );
        assert_eq!(
            resolve("0b102"),
            Err(OperandError::InvalidBinary("0b102".to_string()))
        );
        assert_eq!(
            resolve("12a"),
            Err(OperandError::InvalidDecimal("12a".to_string()))
        );
        assert!(resolve("4294967296").is_err());
        assert!(resolve("").is_err());
    }

    #[test]
    fn test_character_literals() {
        assert_eq!(resolve("'A'"), Ok(Operand::Immediate(65)));
        assert_eq!(resolve("' '"), Ok(Operand::Immediate(32)));
        assert_eq!(resolve("'\\n'"), Ok(Operand::Immediate(10)));
        assert_eq!(resolve("'\\''"), Ok(Operand::Immediate(39)));
        assert!(matches!(
            resolve("'AB'"),
            Err(OperandError::InvalidCharacter(_))
        ));
        assert!(matches!(resolve("'A"), Err(OperandError::InvalidCharacter(_))));
        assert!(matches!(resolve("''"), Err(OperandError::InvalidCharacter(_))));
    }

    #[test]
    fn test_memory_expressions() {
        assert_eq!(resolve("[EBX]"), Ok(mem(Some(Reg32::Ebx), None, 0)));
        assert_eq!(resolve("[ebp+8]"), Ok(mem(Some(Reg32::Ebp), None, 8)));
        assert_eq!(
            resolve("[EBP - 4]"),
            Ok(mem(Some(Reg32::Ebp), None, 4u32.wrapping_neg()))
        );
        assert_eq!(
            resolve("[esi+edi]"),
            Ok(mem(Some(Reg32::Esi), Some(Reg32::Edi), 0))
        );
        assert_eq!(
            resolve("[esi+edi+0x10]"),
            Ok(mem(Some(Reg32::Esi), Some(Reg32::Edi), 0x10))
        );
        assert_eq!(resolve("[0x1000]"), Ok(mem(None, None, 0x1000)));
    }

    #[test]
    fn test_sized_memory_expressions() {
        let Ok(Operand::Memory(m)) = resolve("BYTE [EAX]") else {
            panic!("expected a memory operand");
        };
        assert_eq!(m.width, Some(Width::Byte));
        assert_eq!(m.base, Some(Reg32::Eax));

        let Ok(Operand::Memory(m)) = resolve("dword ptr [0x20]") else {
            panic!("expected a memory operand");
        };
        assert_eq!(m.width, Some(Width::Dword));
        assert_eq!(m.displacement, 0x20);
    }

    #[test]
    fn test_unrecognized_memory_expressions() {
        for token in [
            "[]",
            "[EAX",
            "[EAX+]",
            "[AL]",
            "[EAX+EBX+ECX]",
            "[EAX-EBX]",
            "[foo]",
            "WORD [EAX]",
        ] {
            assert!(
                matches!(resolve(token), Err(OperandError::InvalidMemoryExpression(_))),
                "{token} should be rejected"
            );
        }
        assert!(matches!(
            resolve("[0xZZ]"),
            Err(OperandError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_effective_address_wraps() {
        let mut regs = Registers::default();
        regs.set(Reg32::Ebp, 0x100);
        regs.set(Reg32::Esi, 0x10);
        let Ok(Operand::Memory(m)) = resolve("[EBP+ESI-0x20]") else {
            panic!("expected a memory operand");
        };
        assert_eq!(m.effective_address(&regs), 0xF0);

        regs.set(Reg32::Ebp, u32::MAX);
        let Ok(Operand::Memory(m)) = resolve("[EBP+2]") else {
            panic!("expected a memory operand");
        };
        assert_eq!(m.effective_address(&regs), 1);
    }

    #[test]
    fn test_operation_width() {
        let al = Operand::SubRegister(Reg8::Al);
        let eax = Operand::Register(Reg32::Eax);
        let imm = Operand::Immediate(1);
        let byte_mem = Operand::Memory(MemoryRef {
            width: Some(Width::Byte),
            ..MemoryRef::absolute(0)
        });
        assert_eq!(operation_width(&[eax, imm]), Width::Dword);
        assert_eq!(operation_width(&[Operand::Memory(MemoryRef::absolute(0)), al]), Width::Byte);
        assert_eq!(operation_width(&[byte_mem, imm]), Width::Byte);
        assert_eq!(operation_width(&[imm]), Width::Dword);
    }
}
