//! Flag computation.
//!
//! Every instruction that touches flags goes through one of these functions,
//! so the meaning of each flag is defined in exactly one place. All functions
//! are pure: they take the flags as they were before the operation plus the
//! operation's inputs and outputs, and return the new flags.

use serde::{Deserialize, Serialize};

use super::{operand::Width, policy::FlagPolicy};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Flags(u32);

impl Flags {
    pub const CARRY: u32 = 1 << 0;
    pub const ZERO: u32 = 1 << 6;
    pub const SIGN: u32 = 1 << 7;
    pub const OVERFLOW: u32 = 1 << 11;
    const DEFINED: u32 = Self::CARRY | Self::ZERO | Self::SIGN | Self::OVERFLOW;

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & Self::DEFINED)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn carry(self) -> bool {
        self.0 & Self::CARRY != 0
    }

    pub const fn zero(self) -> bool {
        self.0 & Self::ZERO != 0
    }

    pub const fn sign(self) -> bool {
        self.0 & Self::SIGN != 0
    }

    pub const fn overflow(self) -> bool {
        self.0 & Self::OVERFLOW != 0
    }

    const fn with(self, bit: u32, set: bool) -> Self {
        if set {
            Self(self.0 | bit)
        } else {
            Self(self.0 & !bit)
        }
    }

    pub const fn with_carry(self, set: bool) -> Self {
        self.with(Self::CARRY, set)
    }

    pub const fn with_zero(self, set: bool) -> Self {
        self.with(Self::ZERO, set)
    }

    pub const fn with_sign(self, set: bool) -> Self {
        self.with(Self::SIGN, set)
    }

    pub const fn with_overflow(self, set: bool) -> Self {
        self.with(Self::OVERFLOW, set)
    }

    /// ZF and SF from a result of the given width.
    pub const fn with_result(self, result: u32, width: Width) -> Self {
        self.with_zero(width.truncate(result) == 0)
            .with_sign(width.msb(result))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
}

/// AND, OR, XOR and TEST.
pub fn logical(prior: Flags, result: u32, width: Width) -> Flags {
    prior
        .with_result(result, width)
        .with_carry(false)
        .with_overflow(false)
}

pub fn add(prior: Flags, dst: u32, src: u32, result: u32, width: Width) -> Flags {
    add_with_carry(prior, dst, src, false, result, width)
}

/// ADD/ADC. CF is the unsigned carry out of the operation width.
pub fn add_with_carry(
    prior: Flags,
    dst: u32,
    src: u32,
    carry_in: bool,
    result: u32,
    width: Width,
) -> Flags {
    let (dst, src, result) = (width.truncate(dst), width.truncate(src), width.truncate(result));
    let sum = dst as u64 + src as u64 + carry_in as u64;
    let carry = sum > width.mask() as u64;

    let (d, s, r) = (width.msb(dst), width.msb(src), width.msb(result));
    let overflow = d == s && r != d;

    prior
        .with_result(result, width)
        .with_carry(carry)
        .with_overflow(overflow)
}

pub fn sub(prior: Flags, dst: u32, src: u32, result: u32, width: Width) -> Flags {
    sub_with_borrow(prior, dst, src, false, result, width)
}

/// SUB/SBB/CMP. CF is the unsigned borrow.
pub fn sub_with_borrow(
    prior: Flags,
    dst: u32,
    src: u32,
    borrow_in: bool,
    result: u32,
    width: Width,
) -> Flags {
    let (dst, src, result) = (width.truncate(dst), width.truncate(src), width.truncate(result));
    let carry = src as u64 + borrow_in as u64 > dst as u64;

    let (d, s, r) = (width.msb(dst), width.msb(src), width.msb(result));
    let overflow = d != s && r != d;

    prior
        .with_result(result, width)
        .with_carry(carry)
        .with_overflow(overflow)
}

/// INC never touches CF.
pub fn inc(prior: Flags, dst: u32, result: u32, width: Width) -> Flags {
    add(prior, dst, 1, result, width).with_carry(prior.carry())
}

/// DEC never touches CF.
pub fn dec(prior: Flags, dst: u32, result: u32, width: Width) -> Flags {
    sub(prior, dst, 1, result, width).with_carry(prior.carry())
}

/// NEG is `0 - operand`, except that CF means "operand was non-zero".
pub fn neg(prior: Flags, operand: u32, result: u32, width: Width) -> Flags {
    sub(prior, 0, operand, result, width).with_carry(width.truncate(operand) != 0)
}

fn shift_count(raw_count: u32) -> u32 {
    raw_count & 0x1F
}

pub fn shl(prior: Flags, original: u32, result: u32, raw_count: u32, width: Width) -> Flags {
    let count = shift_count(raw_count);
    if count == 0 {
        return prior;
    }

    // CF follows the raw count, so SHL r,33 carries out bit 0 of a dword.
    let bits = width.bits();
    let carry_count = raw_count.min(32);
    let carry =
        carry_count <= bits && (width.truncate(original) as u64 >> (bits - carry_count)) & 1 == 1;
    let overflow = count == 1 && (width.msb(result) ^ carry);

    prior
        .with_result(result, width)
        .with_carry(carry)
        .with_overflow(overflow)
}

pub fn shr(prior: Flags, original: u32, result: u32, raw_count: u32, width: Width) -> Flags {
    let count = shift_count(raw_count);
    if count == 0 {
        return prior;
    }

    let carry = count <= width.bits() && (width.truncate(original) >> (count - 1)) & 1 == 1;
    let overflow = count == 1 && width.msb(original);

    prior
        .with_result(result, width)
        .with_carry(carry)
        .with_overflow(overflow)
}

pub fn sar(prior: Flags, original: u32, result: u32, raw_count: u32, width: Width) -> Flags {
    let count = shift_count(raw_count);
    if count == 0 {
        return prior;
    }

    // Past the width only copies of the sign bit are left to shift out.
    let carry = if count <= width.bits() {
        (width.truncate(original) >> (count - 1)) & 1 == 1
    } else {
        width.msb(original)
    };

    prior
        .with_result(result, width)
        .with_carry(carry)
        .with_overflow(false)
}

/// ROL/ROR/RCL/RCR. `carry` is the bit that ended up in CF.
pub fn rotate(
    prior: Flags,
    direction: Direction,
    result: u32,
    carry: bool,
    raw_count: u32,
    width: Width,
    policy: &dyn FlagPolicy,
) -> Flags {
    let count = shift_count(raw_count);
    if count == 0 {
        return prior;
    }

    let overflow = count == 1
        && match direction {
            Direction::Left => width.msb(result) ^ carry,
            Direction::Right => width.msb(result) ^ width.msb(result << 1),
        };

    let flags = prior.with_carry(carry).with_overflow(overflow);
    policy.after_rotate(flags, result, width)
}

/// MUL/IMUL. CF = OF = "the high half is not zero".
pub fn multiply(prior: Flags, low: u32, high: u32, width: Width, policy: &dyn FlagPolicy) -> Flags {
    let wide = width.truncate(high) != 0;
    let flags = prior.with_carry(wide).with_overflow(wide);
    policy.after_multiply(flags, low, width)
}

/// DIV/IDIV, including division by zero.
pub fn divide(prior: Flags, quotient: u32, width: Width, policy: &dyn FlagPolicy) -> Flags {
    policy.after_divide(prior, quotient, width)
}
