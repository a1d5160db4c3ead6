use strum::{Display, EnumIter, EnumString};

use crate::native::flags::Flags;

/// Every instruction the engine understands.
///
/// Parsing is case-insensitive and accepts the usual aliases (`SAL`, `JZ`,
/// `LODS`, ...). `Display` always prints the canonical upper-case spelling.
#[derive(Debug, Display, EnumString, EnumIter, PartialEq, Eq, Hash, Copy, Clone, PartialOrd, Ord)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Mnemonic {
    //
    // Data movement
    //
    Mov,
    Movzx,
    Movsx,
    Lea,
    Xchg,

    //
    // Arithmetic
    //
    Add,
    Adc,
    Sub,
    Sbb,
    Inc,
    Dec,
    Neg,
    Cmp,
    Mul,
    Imul,
    Div,
    Idiv,

    //
    // Bitwise / Logical
    //
    And,
    Or,
    Xor,
    Test,
    Not,
    #[strum(to_string = "SHL", serialize = "SAL")]
    Shl,
    Shr,
    Sar,
    Rol,
    Ror,
    Rcl,
    Rcr,

    //
    // Stack
    //
    Push,
    Pop,

    //
    // Strings (byte granularity, ESI/EDI implicit)
    //
    #[strum(to_string = "LODSB", serialize = "LODS")]
    Lodsb,
    #[strum(to_string = "STOSB", serialize = "STOS")]
    Stosb,
    #[strum(to_string = "MOVSB", serialize = "MOVS")]
    Movsb,
    #[strum(to_string = "SCASB", serialize = "SCAS")]
    Scasb,
    #[strum(to_string = "CMPSB", serialize = "CMPS")]
    Cmpsb,

    //
    // Conditional moves
    //
    #[strum(to_string = "CMOVE", serialize = "CMOVZ")]
    Cmove,
    #[strum(to_string = "CMOVNE", serialize = "CMOVNZ")]
    Cmovne,
    Cmovg,
    Cmovge,
    Cmovl,
    Cmovle,
    Cmova,
    Cmovae,
    Cmovb,
    Cmovbe,
    Cmovs,
    Cmovns,
    Cmovo,
    Cmovno,

    //
    // Bit manipulation / flags
    //
    Xadd,
    Bsf,
    Bsr,
    Bswap,
    Lahf,
    Sahf,
    Clc,
    Stc,
    Cmc,
    Cdq,

    //
    // Interrupts and machine control
    //
    Int,
    Int3,
    Iret,
    Hlt,
    Nop,

    //
    // Control flow (targets are resolved by the stepper)
    //
    Jmp,
    #[strum(to_string = "JE", serialize = "JZ")]
    Je,
    #[strum(to_string = "JNE", serialize = "JNZ")]
    Jne,
    Jg,
    Jge,
    Jl,
    Jle,
    Ja,
    Jae,
    Jb,
    Jbe,
    Js,
    Jns,
    Jc,
    Jnc,
    Jo,
    Jno,
    Call,
    Ret,
    Loop,
    Loope,
    Loopz,
    Loopne,
    Loopnz,
}

/// Flag predicates shared by conditional jumps and conditional moves.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Condition {
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    Above,
    AboveOrEqual,
    Below,
    BelowOrEqual,
    Sign,
    NotSign,
    Overflow,
    NotOverflow,
}

impl Condition {
    pub fn holds(self, flags: Flags) -> bool {
        let (zf, sf, cf, of) = (flags.zero(), flags.sign(), flags.carry(), flags.overflow());
        match self {
            // Signed conditions
            Condition::Equal => zf,
            Condition::NotEqual => !zf,
            Condition::Greater => !zf && (sf == of),
            Condition::GreaterOrEqual => sf == of,
            Condition::Less => sf != of,
            Condition::LessOrEqual => zf || (sf != of),

            // Unsigned conditions
            Condition::Above => !cf && !zf,
            Condition::AboveOrEqual => !cf,
            Condition::Below => cf,
            Condition::BelowOrEqual => cf || zf,

            // Other flag conditions
            Condition::Sign => sf,
            Condition::NotSign => !sf,
            Condition::Overflow => of,
            Condition::NotOverflow => !of,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum LoopKind {
    Counter,
    WhileZero,
    WhileNotZero,
}

impl LoopKind {
    pub fn should_repeat(self, counter: u32, flags: Flags) -> bool {
        counter != 0
            && match self {
                LoopKind::Counter => true,
                LoopKind::WhileZero => flags.zero(),
                LoopKind::WhileNotZero => !flags.zero(),
            }
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum ControlFlow {
    Jump(Option<Condition>),
    Call,
    Return,
    Loop(LoopKind),
}

impl ControlFlow {
    /// Whether the single operand of this instruction names a label.
    pub fn has_target(self) -> bool {
        !matches!(self, ControlFlow::Return)
    }
}

impl Mnemonic {
    pub fn condition(self) -> Option<Condition> {
        use Condition::*;
        Some(match self {
            Mnemonic::Je | Mnemonic::Cmove => Equal,
            Mnemonic::Jne | Mnemonic::Cmovne => NotEqual,
            Mnemonic::Jg | Mnemonic::Cmovg => Greater,
            Mnemonic::Jge | Mnemonic::Cmovge => GreaterOrEqual,
            Mnemonic::Jl | Mnemonic::Cmovl => Less,
            Mnemonic::Jle | Mnemonic::Cmovle => LessOrEqual,
            Mnemonic::Ja | Mnemonic::Cmova => Above,
            Mnemonic::Jae | Mnemonic::Jnc | Mnemonic::Cmovae => AboveOrEqual,
            Mnemonic::Jb | Mnemonic::Jc | Mnemonic::Cmovb => Below,
            Mnemonic::Jbe | Mnemonic::Cmovbe => BelowOrEqual,
            Mnemonic::Js | Mnemonic::Cmovs => Sign,
            Mnemonic::Jns | Mnemonic::Cmovns => NotSign,
            Mnemonic::Jo | Mnemonic::Cmovo => Overflow,
            Mnemonic::Jno | Mnemonic::Cmovno => NotOverflow,
            _ => return None,
        })
    }

    pub fn control_flow(self) -> Option<ControlFlow> {
        match self {
            Mnemonic::Jmp => Some(ControlFlow::Jump(None)),
            Mnemonic::Je
            | Mnemonic::Jne
            | Mnemonic::Jg
            | Mnemonic::Jge
            | Mnemonic::Jl
            | Mnemonic::Jle
            | Mnemonic::Ja
            | Mnemonic::Jae
            | Mnemonic::Jb
            | Mnemonic::Jbe
            | Mnemonic::Js
            | Mnemonic::Jns
            | Mnemonic::Jc
            | Mnemonic::Jnc
            | Mnemonic::Jo
            | Mnemonic::Jno => Some(ControlFlow::Jump(self.condition())),
            Mnemonic::Call => Some(ControlFlow::Call),
            Mnemonic::Ret => Some(ControlFlow::Return),
            Mnemonic::Loop => Some(ControlFlow::Loop(LoopKind::Counter)),
            Mnemonic::Loope | Mnemonic::Loopz => Some(ControlFlow::Loop(LoopKind::WhileZero)),
            Mnemonic::Loopne | Mnemonic::Loopnz => {
                Some(ControlFlow::Loop(LoopKind::WhileNotZero))
            }
            _ => None,
        }
    }
}
