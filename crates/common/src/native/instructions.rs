//! The instruction table: one handler per mnemonic.
//!
//! [`Mnemonic::spec`] is an exhaustive match, so adding a mnemonic without a
//! handler does not compile. Handlers only see the CPU state and the resolved
//! operands; jumps, calls and returns are no-ops here because the stepper
//! owns the instruction pointer.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::{ExecutionError, Mnemonic};

use super::{
    flags::{self, Direction, Flags},
    operand::{operation_width, resolve, Operand, Width},
    policy::FlagPolicy,
    registers::{Reg32, Reg8},
    state::CpuState,
};

pub type Handler = fn(&mut CpuState, &Invocation) -> Result<(), ExecutionError>;

/// The read-only inputs of one instruction execution.
pub struct Invocation<'a> {
    pub mnemonic: Mnemonic,
    pub operands: &'a [Operand],
    pub policy: &'a dyn FlagPolicy,
}

#[derive(Clone, Copy)]
pub struct InstructionSpec {
    pub mnemonic: Mnemonic,
    /// Accepted operand counts.
    pub arity: &'static [usize],
    pub handler: Handler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Executed,
    /// Wrong operand count; nothing happened.
    Skipped {
        expected: &'static [usize],
        got: usize,
    },
}

const NONE: &[usize] = &[0];
const ONE: &[usize] = &[1];
const TWO: &[usize] = &[2];
const SHIFT: &[usize] = &[1, 2];
const IMUL: &[usize] = &[1, 2, 3];
const RET: &[usize] = &[0, 1];

impl Mnemonic {
    pub fn spec(self) -> InstructionSpec {
        use Mnemonic::*;

        let (arity, handler): (&'static [usize], Handler) = match self {
            Mov => (TWO, mov),
            Movzx => (TWO, movzx),
            Movsx => (TWO, movsx),
            Lea => (TWO, lea),
            Xchg => (TWO, xchg),

            Add => (TWO, add),
            Adc => (TWO, adc),
            Sub => (TWO, sub),
            Sbb => (TWO, sbb),
            Cmp => (TWO, cmp),
            Inc => (ONE, inc),
            Dec => (ONE, dec),
            Neg => (ONE, neg),
            Mul => (ONE, mul),
            Imul => (IMUL, imul),
            Div => (ONE, div),
            Idiv => (ONE, idiv),

            And => (TWO, and),
            Or => (TWO, or),
            Xor => (TWO, xor),
            Test => (TWO, test),
            Not => (ONE, not),
            Shl => (SHIFT, shl),
            Shr => (SHIFT, shr),
            Sar => (SHIFT, sar),
            Rol => (SHIFT, rol),
            Ror => (SHIFT, ror),
            Rcl => (SHIFT, rcl),
            Rcr => (SHIFT, rcr),

            Push => (ONE, push),
            Pop => (ONE, pop),

            Lodsb => (NONE, lodsb),
            Stosb => (NONE, stosb),
            Movsb => (NONE, movsb),
            Scasb => (NONE, scasb),
            Cmpsb => (NONE, cmpsb),

            Cmove | Cmovne | Cmovg | Cmovge | Cmovl | Cmovle | Cmova | Cmovae | Cmovb
            | Cmovbe | Cmovs | Cmovns | Cmovo | Cmovno => (TWO, cmov),

            Xadd => (TWO, xadd),
            Bsf => (TWO, bsf),
            Bsr => (TWO, bsr),
            Bswap => (ONE, bswap),
            Lahf => (NONE, lahf),
            Sahf => (NONE, sahf),
            Clc => (NONE, clc),
            Stc => (NONE, stc),
            Cmc => (NONE, cmc),
            Cdq => (NONE, cdq),

            Int => (ONE, int),
            Int3 | Hlt => (NONE, halt),
            Iret | Nop => (NONE, nop),

            Jmp | Je | Jne | Jg | Jge | Jl | Jle | Ja | Jae | Jb | Jbe | Js | Jns | Jc | Jnc
            | Jo | Jno | Call => (ONE, nop),
            Ret => (RET, nop),
            Loop | Loope | Loopz | Loopne | Loopnz => (ONE, decrement_counter),
        };

        InstructionSpec {
            mnemonic: self,
            arity,
            handler,
        }
    }
}

/// Checks the operand count, resolves the operand tokens and runs the handler.
///
/// Operands of control-flow instructions are label names and are left to the stepper.
pub fn dispatch(
    state: &mut CpuState,
    mnemonic: Mnemonic,
    tokens: &[String],
    policy: &dyn FlagPolicy,
) -> Result<Dispatch, ExecutionError> {
    let spec = mnemonic.spec();
    if !spec.arity.contains(&tokens.len()) {
        return Ok(Dispatch::Skipped {
            expected: spec.arity,
            got: tokens.len(),
        });
    }

    let operands = if mnemonic.control_flow().is_some() {
        Vec::new()
    } else {
        tokens
            .iter()
            .map(|token| resolve(token))
            .collect::<Result<Vec<_>, _>>()?
    };

    let invocation = Invocation {
        mnemonic,
        operands: &operands,
        policy,
    };
    (spec.handler)(state, &invocation)?;
    Ok(Dispatch::Executed)
}

//
// Data movement
//

fn mov(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    let [dst, src] = inv.operands else {
        return Ok(());
    };
    if dst.is_memory() && src.is_memory() && !inv.policy.allows_memory_to_memory_move() {
        return Err(ExecutionError::MemoryToMemoryMove);
    }
    let width = operation_width(inv.operands);
    let value = state.read(src, width)?;
    state.write(inv.mnemonic, dst, width, value)
}

fn source_width(src: &Operand) -> Width {
    src.natural_width().unwrap_or(Width::Byte)
}

fn movzx(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    let [dst, src] = inv.operands else {
        return Ok(());
    };
    let value = state.read(src, source_width(src))?;
    state.write(inv.mnemonic, dst, Width::Dword, value)
}

fn movsx(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    let [dst, src] = inv.operands else {
        return Ok(());
    };
    let width = source_width(src);
    let value = state.read(src, width)?;
    state.write(
        inv.mnemonic,
        dst,
        Width::Dword,
        width.sign_extend(value) as u32,
    )
}

fn lea(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    let [dst, Operand::Memory(mem)] = inv.operands else {
        return Ok(());
    };
    let address = mem.effective_address(&state.registers);
    state.write(inv.mnemonic, dst, Width::Dword, address)
}

fn xchg(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    let [a, b] = inv.operands else {
        return Ok(());
    };
    let width = operation_width(inv.operands);
    let first = state.read(a, width)?;
    let second = state.read(b, width)?;
    state.write(inv.mnemonic, a, width, second)?;
    state.write(inv.mnemonic, b, width, first)
}

//
// Arithmetic and logic on two operands
//

type BinaryOp = fn(Flags, u32, u32, Width) -> (u32, Flags);

fn binary(
    state: &mut CpuState,
    inv: &Invocation,
    store: bool,
    op: BinaryOp,
) -> Result<(), ExecutionError> {
    let [dst, src] = inv.operands else {
        return Ok(());
    };
    let width = operation_width(inv.operands);
    let a = state.read(dst, width)?;
    let b = state.read(src, width)?;
    let (result, new_flags) = op(state.flags, a, b, width);
    if store {
        state.write(inv.mnemonic, dst, width, result)?;
    }
    state.flags = new_flags;
    Ok(())
}

fn add_op(f: Flags, a: u32, b: u32, w: Width) -> (u32, Flags) {
    let r = w.truncate(a.wrapping_add(b));
    (r, flags::add(f, a, b, r, w))
}

fn adc_op(f: Flags, a: u32, b: u32, w: Width) -> (u32, Flags) {
    let carry = f.carry();
    let r = w.truncate(a.wrapping_add(b).wrapping_add(carry as u32));
    (r, flags::add_with_carry(f, a, b, carry, r, w))
}

fn sub_op(f: Flags, a: u32, b: u32, w: Width) -> (u32, Flags) {
    let r = w.truncate(a.wrapping_sub(b));
    (r, flags::sub(f, a, b, r, w))
}

fn sbb_op(f: Flags, a: u32, b: u32, w: Width) -> (u32, Flags) {
    let borrow = f.carry();
    let r = w.truncate(a.wrapping_sub(b).wrapping_sub(borrow as u32));
    (r, flags::sub_with_borrow(f, a, b, borrow, r, w))
}

fn and_op(f: Flags, a: u32, b: u32, w: Width) -> (u32, Flags) {
    let r = a & b;
    (r, flags::logical(f, r, w))
}

fn or_op(f: Flags, a: u32, b: u32, w: Width) -> (u32, Flags) {
    let r = a | b;
    (r, flags::logical(f, r, w))
}

fn xor_op(f: Flags, a: u32, b: u32, w: Width) -> (u32, Flags) {
    let r = a ^ b;
    (r, flags::logical(f, r, w))
}

fn add(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    binary(state, inv, true, add_op)
}

fn adc(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    binary(state, inv, true, adc_op)
}

fn sub(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    binary(state, inv, true, sub_op)
}

fn sbb(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    binary(state, inv, true, sbb_op)
}

fn cmp(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    binary(state, inv, false, sub_op)
}

fn and(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    binary(state, inv, true, and_op)
}

fn or(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    binary(state, inv, true, or_op)
}

fn xor(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    binary(state, inv, true, xor_op)
}

fn test(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    binary(state, inv, false, and_op)
}

//
// Single operand arithmetic
//

type UnaryOp = fn(Flags, u32, Width) -> (u32, Flags);

fn unary(state: &mut CpuState, inv: &Invocation, op: UnaryOp) -> Result<(), ExecutionError> {
    let [dst] = inv.operands else {
        return Ok(());
    };
    let width = operation_width(inv.operands);
    let value = state.read(dst, width)?;
    let (result, new_flags) = op(state.flags, value, width);
    state.write(inv.mnemonic, dst, width, result)?;
    state.flags = new_flags;
    Ok(())
}

fn inc(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    unary(state, inv, |f, v, w| {
        let r = w.truncate(v.wrapping_add(1));
        (r, flags::inc(f, v, r, w))
    })
}

fn dec(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    unary(state, inv, |f, v, w| {
        let r = w.truncate(v.wrapping_sub(1));
        (r, flags::dec(f, v, r, w))
    })
}

fn neg(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    unary(state, inv, |f, v, w| {
        let r = w.truncate(v.wrapping_neg());
        (r, flags::neg(f, v, r, w))
    })
}

fn not(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    unary(state, inv, |f, v, w| (w.truncate(!v), f))
}

//
// Multiply / divide
//

/// Stores a byte-sized double-width result into AX, leaving the upper half of EAX alone.
fn set_ax(state: &mut CpuState, value: u16) {
    state.registers.set8(Reg8::Al, value as u8);
    state.registers.set8(Reg8::Ah, (value >> 8) as u8);
}

fn mul(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    let [src] = inv.operands else {
        return Ok(());
    };
    let width = operation_width(inv.operands);
    let factor = state.read(src, width)?;

    let (low, high) = match width {
        Width::Dword => {
            let product = state.registers.get(Reg32::Eax) as u64 * factor as u64;
            let (low, high) = (product as u32, (product >> 32) as u32);
            state.registers.set(Reg32::Eax, low);
            state.registers.set(Reg32::Edx, high);
            (low, high)
        }
        Width::Byte => {
            let product = state.registers.get8(Reg8::Al) as u16 * factor as u16;
            set_ax(state, product);
            (product as u32 & 0xFF, (product >> 8) as u32)
        }
    };

    state.flags = flags::multiply(state.flags, low, high, width, inv.policy);
    Ok(())
}

/// Signed product of two values of `width`, split into (low, high) halves of that width.
fn signed_product(a: u32, b: u32, width: Width) -> (u32, u32) {
    let product = width.sign_extend(a) * width.sign_extend(b);
    let low = width.truncate(product as u32);
    let high = width.truncate((product >> width.bits()) as u32);
    (low, high)
}

fn imul(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    let width = operation_width(inv.operands);

    let (low, high) = match inv.operands {
        [src] => {
            let factor = state.read(src, width)?;
            match width {
                Width::Dword => {
                    let eax = state.registers.get(Reg32::Eax);
                    let (low, high) = signed_product(eax, factor, width);
                    state.registers.set(Reg32::Eax, low);
                    state.registers.set(Reg32::Edx, high);
                    (low, high)
                }
                Width::Byte => {
                    let al = state.registers.get8(Reg8::Al) as u32;
                    let (low, high) = signed_product(al, factor, width);
                    set_ax(state, ((high << 8) | low) as u16);
                    (low, high)
                }
            }
        }
        [dst, src] => {
            let a = state.read(dst, width)?;
            let b = state.read(src, width)?;
            let (low, high) = signed_product(a, b, width);
            state.write(inv.mnemonic, dst, width, low)?;
            (low, high)
        }
        [dst, src, imm] => {
            let a = state.read(src, width)?;
            let b = state.read(imm, width)?;
            let (low, high) = signed_product(a, b, width);
            state.write(inv.mnemonic, dst, width, low)?;
            (low, high)
        }
        _ => return Ok(()),
    };

    state.flags = flags::multiply(state.flags, low, high, width, inv.policy);
    Ok(())
}

// Division never faults: a zero divisor yields a zero quotient and remainder,
// and a quotient that does not fit the width is truncated.
fn div(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    let [src] = inv.operands else {
        return Ok(());
    };
    let width = operation_width(inv.operands);
    let divisor = state.read(src, width)?;

    let quotient = match width {
        Width::Dword => {
            let dividend = ((state.registers.get(Reg32::Edx) as u64) << 32)
                | state.registers.get(Reg32::Eax) as u64;
            let (q, r) = match divisor {
                0 => (0, 0),
                d => (dividend / d as u64, dividend % d as u64),
            };
            state.registers.set(Reg32::Eax, q as u32);
            state.registers.set(Reg32::Edx, r as u32);
            q as u32
        }
        Width::Byte => {
            let dividend = state.registers.get(Reg32::Eax) as u16;
            let (q, r) = match divisor as u16 {
                0 => (0, 0),
                d => (dividend / d, dividend % d),
            };
            state.registers.set8(Reg8::Al, q as u8);
            state.registers.set8(Reg8::Ah, r as u8);
            q as u32 & 0xFF
        }
    };

    state.flags = flags::divide(state.flags, quotient, width, inv.policy);
    Ok(())
}

fn idiv(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    let [src] = inv.operands else {
        return Ok(());
    };
    let width = operation_width(inv.operands);
    let divisor = width.sign_extend(state.read(src, width)?);

    let dividend = match width {
        Width::Dword => {
            (((state.registers.get(Reg32::Edx) as u64) << 32)
                | state.registers.get(Reg32::Eax) as u64) as i64
        }
        Width::Byte => state.registers.get(Reg32::Eax) as u16 as i16 as i64,
    };
    let (q, r) = match divisor {
        0 => (0, 0),
        d => (dividend.wrapping_div(d), dividend.wrapping_rem(d)),
    };

    match width {
        Width::Dword => {
            state.registers.set(Reg32::Eax, q as u32);
            state.registers.set(Reg32::Edx, r as u32);
        }
        Width::Byte => {
            state.registers.set8(Reg8::Al, q as u8);
            state.registers.set8(Reg8::Ah, r as u8);
        }
    }

    let quotient = width.truncate(q as u32);
    state.flags = flags::divide(state.flags, quotient, width, inv.policy);
    Ok(())
}

//
// Shifts and rotates
//

/// Destination, its width and the raw (unmasked) count. A missing count means 1.
fn shift_operands<'a>(
    state: &mut CpuState,
    inv: &'a Invocation,
) -> Result<Option<(&'a Operand, Width, u32)>, ExecutionError> {
    let (dst, count) = match inv.operands {
        [dst] => (dst, 1),
        [dst, count] => (dst, state.read(count, Width::Dword)?),
        _ => return Ok(None),
    };
    Ok(Some((dst, dst.natural_width().unwrap_or(Width::Dword), count)))
}

type ShiftOp = fn(Flags, u32, u32, Width, &dyn FlagPolicy) -> (u32, Flags);

fn shift(state: &mut CpuState, inv: &Invocation, op: ShiftOp) -> Result<(), ExecutionError> {
    let Some((dst, width, count)) = shift_operands(state, inv)? else {
        return Ok(());
    };
    if count & 0x1F == 0 {
        return Ok(());
    }
    let value = state.read(dst, width)?;
    let (result, new_flags) = op(state.flags, value, count, width, inv.policy);
    state.write(inv.mnemonic, dst, width, result)?;
    state.flags = new_flags;
    Ok(())
}

fn shl_op(f: Flags, v: u32, raw: u32, w: Width, _: &dyn FlagPolicy) -> (u32, Flags) {
    let count = raw & 0x1F;
    let r = if count >= w.bits() {
        0
    } else {
        w.truncate(v << count)
    };
    (r, flags::shl(f, v, r, raw, w))
}

fn shr_op(f: Flags, v: u32, raw: u32, w: Width, _: &dyn FlagPolicy) -> (u32, Flags) {
    let count = raw & 0x1F;
    let r = if count >= w.bits() {
        0
    } else {
        w.truncate(v) >> count
    };
    (r, flags::shr(f, v, r, raw, w))
}

fn sar_op(f: Flags, v: u32, raw: u32, w: Width, _: &dyn FlagPolicy) -> (u32, Flags) {
    let count = raw & 0x1F;
    let r = w.truncate((w.sign_extend(v) >> count) as u32);
    (r, flags::sar(f, v, r, raw, w))
}

fn rol_op(f: Flags, v: u32, raw: u32, w: Width, p: &dyn FlagPolicy) -> (u32, Flags) {
    let bits = w.bits();
    let n = (raw & 0x1F) % bits;
    let v = w.truncate(v);
    let r = if n == 0 {
        v
    } else {
        w.truncate((v << n) | (v >> (bits - n)))
    };
    let carry = r & 1 == 1;
    (r, flags::rotate(f, Direction::Left, r, carry, raw, w, p))
}

fn ror_op(f: Flags, v: u32, raw: u32, w: Width, p: &dyn FlagPolicy) -> (u32, Flags) {
    let bits = w.bits();
    let n = (raw & 0x1F) % bits;
    let v = w.truncate(v);
    let r = if n == 0 {
        v
    } else {
        w.truncate((v >> n) | (v << (bits - n)))
    };
    let carry = w.msb(r);
    (r, flags::rotate(f, Direction::Right, r, carry, raw, w, p))
}

/// Rotates `width + 1` bits: the value with CF glued on top.
fn rotate_through_carry(v: u32, carry: bool, raw: u32, w: Width, direction: Direction) -> (u32, bool) {
    let span = w.bits() as u64 + 1;
    let n = (raw & 0x1F) as u64 % span;
    let full = (1u64 << span) - 1;
    let wide = ((carry as u64) << w.bits()) | w.truncate(v) as u64;
    let rotated = match (n, direction) {
        (0, _) => wide,
        (n, Direction::Left) => ((wide << n) | (wide >> (span - n))) & full,
        (n, Direction::Right) => ((wide >> n) | (wide << (span - n))) & full,
    };
    (w.truncate(rotated as u32), (rotated >> w.bits()) & 1 == 1)
}

fn rcl_op(f: Flags, v: u32, raw: u32, w: Width, p: &dyn FlagPolicy) -> (u32, Flags) {
    let (r, carry) = rotate_through_carry(v, f.carry(), raw, w, Direction::Left);
    (r, flags::rotate(f, Direction::Left, r, carry, raw, w, p))
}

fn rcr_op(f: Flags, v: u32, raw: u32, w: Width, p: &dyn FlagPolicy) -> (u32, Flags) {
    let (r, carry) = rotate_through_carry(v, f.carry(), raw, w, Direction::Right);
    (r, flags::rotate(f, Direction::Right, r, carry, raw, w, p))
}

fn shl(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    shift(state, inv, shl_op)
}

fn shr(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    shift(state, inv, shr_op)
}

fn sar(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    shift(state, inv, sar_op)
}

fn rol(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    shift(state, inv, rol_op)
}

fn ror(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    shift(state, inv, ror_op)
}

fn rcl(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    shift(state, inv, rcl_op)
}

fn rcr(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    shift(state, inv, rcr_op)
}

//
// Stack
//

fn push(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    let [src] = inv.operands else {
        return Ok(());
    };
    let value = state.read(src, Width::Dword)?;
    state.push(value)
}

fn pop(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    let [dst] = inv.operands else {
        return Ok(());
    };
    let value = state.pop()?;
    let width = dst.natural_width().unwrap_or(Width::Dword);
    state.write(inv.mnemonic, dst, width, value)
}

//
// Strings
//

fn advance(state: &mut CpuState, reg: Reg32) {
    let value = state.registers.get(reg).wrapping_add(1);
    state.registers.set(reg, value);
}

fn read_string_byte(state: &mut CpuState, reg: Reg32) -> Result<u32, ExecutionError> {
    let address = state.registers.get(reg);
    state.bus.read(address, Width::Byte)
}

fn lodsb(state: &mut CpuState, _: &Invocation) -> Result<(), ExecutionError> {
    let value = read_string_byte(state, Reg32::Esi)?;
    state.registers.set8(Reg8::Al, value as u8);
    advance(state, Reg32::Esi);
    Ok(())
}

fn stosb(state: &mut CpuState, _: &Invocation) -> Result<(), ExecutionError> {
    let address = state.registers.get(Reg32::Edi);
    let al = state.registers.get8(Reg8::Al);
    state.bus.write_byte(address, al)?;
    advance(state, Reg32::Edi);
    Ok(())
}

fn movsb(state: &mut CpuState, _: &Invocation) -> Result<(), ExecutionError> {
    let value = read_string_byte(state, Reg32::Esi)?;
    let address = state.registers.get(Reg32::Edi);
    state.bus.write_byte(address, value as u8)?;
    advance(state, Reg32::Esi);
    advance(state, Reg32::Edi);
    Ok(())
}

fn scasb(state: &mut CpuState, _: &Invocation) -> Result<(), ExecutionError> {
    let value = read_string_byte(state, Reg32::Edi)?;
    let al = state.registers.get8(Reg8::Al) as u32;
    let (_, new_flags) = sub_op(state.flags, al, value, Width::Byte);
    state.flags = new_flags;
    advance(state, Reg32::Edi);
    Ok(())
}

fn cmpsb(state: &mut CpuState, _: &Invocation) -> Result<(), ExecutionError> {
    let a = read_string_byte(state, Reg32::Esi)?;
    let b = read_string_byte(state, Reg32::Edi)?;
    let (_, new_flags) = sub_op(state.flags, a, b, Width::Byte);
    state.flags = new_flags;
    advance(state, Reg32::Esi);
    advance(state, Reg32::Edi);
    Ok(())
}

//
// Register-only instructions
//

fn cmov(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    let [Operand::Register(dst), src] = inv.operands else {
        return Ok(());
    };
    if inv
        .mnemonic
        .condition()
        .is_some_and(|condition| condition.holds(state.flags))
    {
        let value = state.read(src, Width::Dword)?;
        state.registers.set(*dst, value);
    }
    Ok(())
}

fn xadd(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    let [dst, src] = inv.operands else {
        return Ok(());
    };
    let is_register = |op: &Operand| matches!(op, Operand::Register(_) | Operand::SubRegister(_));
    if !is_register(dst) || !is_register(src) {
        return Ok(());
    }
    let width = operation_width(inv.operands);
    let a = state.read(dst, width)?;
    let b = state.read(src, width)?;
    let (sum, new_flags) = add_op(state.flags, a, b, width);
    state.write(inv.mnemonic, src, width, a)?;
    state.write(inv.mnemonic, dst, width, sum)?;
    state.flags = new_flags;
    Ok(())
}

fn bit_scan(
    state: &mut CpuState,
    inv: &Invocation,
    index: fn(u32, Width) -> u32,
) -> Result<(), ExecutionError> {
    let [dst, src] = inv.operands else {
        return Ok(());
    };
    let width = operation_width(inv.operands);
    let value = state.read(src, width)?;
    if value == 0 {
        // The destination is undefined on hardware; it is left as it was.
        state.flags = state.flags.with_zero(true);
        return Ok(());
    }
    state.write(inv.mnemonic, dst, width, index(value, width))?;
    state.flags = state.flags.with_zero(false);
    Ok(())
}

fn bsf(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    bit_scan(state, inv, |v, _| v.trailing_zeros())
}

fn bsr(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    bit_scan(state, inv, |v, w| w.bits() - 1 - (w.truncate(v).leading_zeros() - (32 - w.bits())))
}

fn bswap(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    if let [Operand::Register(reg)] = inv.operands {
        let value = state.registers.get(*reg);
        state.registers.set(*reg, value.swap_bytes());
    }
    Ok(())
}

//
// Flags
//

fn lahf(state: &mut CpuState, _: &Invocation) -> Result<(), ExecutionError> {
    let f = state.flags;
    let ah = (f.sign() as u8) << 7 | (f.zero() as u8) << 6 | 1 << 1 | f.carry() as u8;
    state.registers.set8(Reg8::Ah, ah);
    Ok(())
}

fn sahf(state: &mut CpuState, _: &Invocation) -> Result<(), ExecutionError> {
    let ah = state.registers.get8(Reg8::Ah);
    state.flags = state
        .flags
        .with_carry(ah & 0x01 != 0)
        .with_zero(ah & 0x40 != 0)
        .with_sign(ah & 0x80 != 0);
    Ok(())
}

fn clc(state: &mut CpuState, _: &Invocation) -> Result<(), ExecutionError> {
    state.flags = state.flags.with_carry(false);
    Ok(())
}

fn stc(state: &mut CpuState, _: &Invocation) -> Result<(), ExecutionError> {
    state.flags = state.flags.with_carry(true);
    Ok(())
}

fn cmc(state: &mut CpuState, _: &Invocation) -> Result<(), ExecutionError> {
    state.flags = state.flags.with_carry(!state.flags.carry());
    Ok(())
}

fn cdq(state: &mut CpuState, _: &Invocation) -> Result<(), ExecutionError> {
    let eax = state.registers.get(Reg32::Eax);
    let edx = if Width::Dword.msb(eax) { u32::MAX } else { 0 };
    state.registers.set(Reg32::Edx, edx);
    Ok(())
}

//
// Interrupts and machine control
//

#[derive(Debug, PartialEq, Eq, Copy, Clone, FromPrimitive)]
enum InterruptVector {
    Video = 0x10,
    Terminate = 0x20,
    Dos = 0x21,
}

const VIDEO_TELETYPE: u8 = 0x0E;
const DOS_WRITE_CHAR: u8 = 0x02;

fn int(state: &mut CpuState, inv: &Invocation) -> Result<(), ExecutionError> {
    let [vector] = inv.operands else {
        return Ok(());
    };
    let vector = state.read(vector, Width::Dword)?;
    let function = state.registers.get8(Reg8::Ah);

    match InterruptVector::from_u32(vector) {
        Some(InterruptVector::Video) if function == VIDEO_TELETYPE => {
            let c = state.registers.get8(Reg8::Al);
            state.console.push(char::from(c));
        }
        Some(InterruptVector::Terminate) => state.halted = true,
        Some(InterruptVector::Dos) if function == DOS_WRITE_CHAR => {
            let c = state.registers.get8(Reg8::Dl);
            state.console.push(char::from(c));
        }
        _ => {}
    }
    Ok(())
}

fn halt(state: &mut CpuState, _: &Invocation) -> Result<(), ExecutionError> {
    state.halted = true;
    Ok(())
}

fn nop(_: &mut CpuState, _: &Invocation) -> Result<(), ExecutionError> {
    Ok(())
}

fn decrement_counter(state: &mut CpuState, _: &Invocation) -> Result<(), ExecutionError> {
    let ecx = state.registers.get(Reg32::Ecx).wrapping_sub(1);
    state.registers.set(Reg32::Ecx, ecx);
    Ok(())
}
