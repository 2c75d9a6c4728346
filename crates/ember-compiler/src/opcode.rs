/// Register VM opcodes and instruction encoding.
///
/// Instruction format (32 bits):
/// - Bits 0-7: opcode
/// - Bits 8-15: A
/// - ABC form: C = bits 16-23, B = bits 24-31
/// - AD form: D = bits 16-31 (unsigned)
/// - Jumps store a signed displacement in D, biased by `JUMP_BIAS` and
///   relative to the instruction after the jump.
use std::fmt;

const SIZE_OP: u32 = 8;
const SIZE_A: u32 = 8;
const SIZE_B: u32 = 8;
const SIZE_C: u32 = 8;
const SIZE_D: u32 = 16;

const POS_OP: u32 = 0;
const POS_A: u32 = POS_OP + SIZE_OP; // 8
const POS_C: u32 = POS_A + SIZE_A; // 16
const POS_B: u32 = POS_C + SIZE_C; // 24
const POS_D: u32 = POS_C; // 16

const fn mask(n: u32) -> u32 {
    (1 << n) - 1
}

pub const MAX_A: u32 = mask(SIZE_A);
pub const MAX_B: u32 = mask(SIZE_B);
pub const MAX_C: u32 = mask(SIZE_C);
pub const MAX_D: u32 = mask(SIZE_D);

/// Bias added to jump displacements.
pub const JUMP_BIAS: i32 = 0x8000;
/// Largest forward displacement.
pub const MAX_JUMP: i32 = MAX_D as i32 - JUMP_BIAS;
/// Largest backward displacement.
pub const MIN_JUMP: i32 = -JUMP_BIAS;

/// Marker for "no register": used on test instructions whose value
/// destination is not decided yet.
pub const NO_REG: u8 = MAX_A as u8;

/// Primitive constants for `KPRI`, `ISEQP`, `USETP`.
pub const PRI_NIL: u16 = 0;
pub const PRI_FALSE: u16 = 1;
pub const PRI_TRUE: u16 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    // Comparisons: each is followed by a JMP taken when the test holds.
    IsLt = 0,
    IsGe,
    IsLe,
    IsGt,
    IsEqV,
    IsNeV,
    IsEqS,
    IsNeS,
    IsEqN,
    IsNeN,
    IsEqP,
    IsNeP,

    // Unary tests, with and without copy.
    IsTc,
    IsFc,
    IsT,
    IsF,

    // Unary ops.
    Mov,
    Not,
    Unm,
    Len,

    // Binary ops: VN = var op num, NV = num op var, VV = var op var.
    AddVN,
    SubVN,
    MulVN,
    DivVN,
    ModVN,
    AddNV,
    SubNV,
    MulNV,
    DivNV,
    ModNV,
    AddVV,
    SubVV,
    MulVV,
    DivVV,
    ModVV,
    Pow,
    Cat,

    // Constants.
    KStr,
    KShort,
    KNum,
    KPri,
    KNil,

    // Upvalues and closures.
    UGet,
    USetV,
    USetS,
    USetN,
    USetP,
    UClo,
    FNew,

    // Tables and globals.
    TNew,
    GGet,
    GSet,
    TGetV,
    TGetS,
    TGetB,
    TSetV,
    TSetS,
    TSetB,
    TSetM,

    // Calls and varargs.
    CallM,
    Call,
    CallMT,
    CallT,
    IterC,
    VArg,

    // Returns.
    RetM,
    Ret,
    Ret0,
    Ret1,

    // Loops and branches.
    ForI,
    ForL,
    IterL,
    Loop,
    Jmp,
}

/// How an operand field is interpreted, for listings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    None,
    Dst,
    Base,
    Var,
    RBase,
    Uv,
    Lit,
    LitS,
    Pri,
    Num,
    Str,
    Func,
    Jump,
}

impl Op {
    pub const COUNT: usize = Op::Jmp as usize + 1;

    const ALL: [Op; Op::COUNT] = {
        use Op::*;
        [
            IsLt, IsGe, IsLe, IsGt, IsEqV, IsNeV, IsEqS, IsNeS, IsEqN, IsNeN, IsEqP, IsNeP, IsTc,
            IsFc, IsT, IsF, Mov, Not, Unm, Len, AddVN, SubVN, MulVN, DivVN, ModVN, AddNV, SubNV,
            MulNV, DivNV, ModNV, AddVV, SubVV, MulVV, DivVV, ModVV, Pow, Cat, KStr, KShort, KNum,
            KPri, KNil, UGet, USetV, USetS, USetN, USetP, UClo, FNew, TNew, GGet, GSet, TGetV,
            TGetS, TGetB, TSetV, TSetS, TSetB, TSetM, CallM, Call, CallMT, CallT, IterC, VArg,
            RetM, Ret, Ret0, Ret1, ForI, ForL, IterL, Loop, Jmp,
        ]
    };

    pub fn from_u8(val: u8) -> Option<Op> {
        Self::ALL.get(val as usize).copied()
    }

    pub fn name(self) -> &'static str {
        use Op::*;
        match self {
            IsLt => "ISLT",
            IsGe => "ISGE",
            IsLe => "ISLE",
            IsGt => "ISGT",
            IsEqV => "ISEQV",
            IsNeV => "ISNEV",
            IsEqS => "ISEQS",
            IsNeS => "ISNES",
            IsEqN => "ISEQN",
            IsNeN => "ISNEN",
            IsEqP => "ISEQP",
            IsNeP => "ISNEP",
            IsTc => "ISTC",
            IsFc => "ISFC",
            IsT => "IST",
            IsF => "ISF",
            Mov => "MOV",
            Not => "NOT",
            Unm => "UNM",
            Len => "LEN",
            AddVN => "ADDVN",
            SubVN => "SUBVN",
            MulVN => "MULVN",
            DivVN => "DIVVN",
            ModVN => "MODVN",
            AddNV => "ADDNV",
            SubNV => "SUBNV",
            MulNV => "MULNV",
            DivNV => "DIVNV",
            ModNV => "MODNV",
            AddVV => "ADDVV",
            SubVV => "SUBVV",
            MulVV => "MULVV",
            DivVV => "DIVVV",
            ModVV => "MODVV",
            Pow => "POW",
            Cat => "CAT",
            KStr => "KSTR",
            KShort => "KSHORT",
            KNum => "KNUM",
            KPri => "KPRI",
            KNil => "KNIL",
            UGet => "UGET",
            USetV => "USETV",
            USetS => "USETS",
            USetN => "USETN",
            USetP => "USETP",
            UClo => "UCLO",
            FNew => "FNEW",
            TNew => "TNEW",
            GGet => "GGET",
            GSet => "GSET",
            TGetV => "TGETV",
            TGetS => "TGETS",
            TGetB => "TGETB",
            TSetV => "TSETV",
            TSetS => "TSETS",
            TSetB => "TSETB",
            TSetM => "TSETM",
            CallM => "CALLM",
            Call => "CALL",
            CallMT => "CALLMT",
            CallT => "CALLT",
            IterC => "ITERC",
            VArg => "VARG",
            RetM => "RETM",
            Ret => "RET",
            Ret0 => "RET0",
            Ret1 => "RET1",
            ForI => "FORI",
            ForL => "FORL",
            IterL => "ITERL",
            Loop => "LOOP",
            Jmp => "JMP",
        }
    }

    /// Operand modes (A, B, C-or-D). `B == Mode::None` means AD format.
    pub fn modes(self) -> (Mode, Mode, Mode) {
        use Mode::*;
        use Op::*;
        match self {
            IsLt | IsGe | IsLe | IsGt | IsEqV | IsNeV => (Var, None, Var),
            IsEqS | IsNeS => (Var, None, Str),
            IsEqN | IsNeN => (Var, None, Num),
            IsEqP | IsNeP => (Var, None, Pri),
            IsTc | IsFc => (Dst, None, Var),
            IsT | IsF => (None, None, Var),
            Mov | Not | Unm | Len => (Dst, None, Var),
            AddVN | SubVN | MulVN | DivVN | ModVN | AddNV | SubNV | MulNV | DivNV | ModNV => {
                (Dst, Var, Num)
            }
            AddVV | SubVV | MulVV | DivVV | ModVV | Pow => (Dst, Var, Var),
            Cat => (Dst, RBase, RBase),
            KStr => (Dst, None, Str),
            KShort => (Dst, None, LitS),
            KNum => (Dst, None, Num),
            KPri => (Dst, None, Pri),
            KNil => (Base, None, Base),
            UGet => (Dst, None, Uv),
            USetV => (Uv, None, Var),
            USetS => (Uv, None, Str),
            USetN => (Uv, None, Num),
            USetP => (Uv, None, Pri),
            UClo => (RBase, None, Jump),
            FNew => (Dst, None, Func),
            TNew => (Dst, None, Lit),
            GGet => (Dst, None, Str),
            GSet => (Var, None, Str),
            TGetV => (Dst, Var, Var),
            TGetS => (Dst, Var, Str),
            TGetB => (Dst, Var, Lit),
            TSetV => (Var, Var, Var),
            TSetS => (Var, Var, Str),
            TSetB => (Var, Var, Lit),
            TSetM => (Base, None, Num),
            CallM | Call | IterC | VArg => (Base, Lit, Lit),
            CallMT | CallT => (Base, None, Lit),
            RetM => (Base, None, Lit),
            Ret | Ret0 | Ret1 => (RBase, None, Lit),
            ForI | ForL | IterL => (Base, None, Jump),
            Loop | Jmp => (RBase, None, Jump),
        }
    }

    pub fn is_abc(self) -> bool {
        self.modes().1 != Mode::None
    }

    /// True when D holds a jump displacement.
    pub fn is_jump(self) -> bool {
        self.modes().2 == Mode::Jump
    }

    /// Comparison and unary test ops, always followed by a `JMP`.
    pub fn is_test(self) -> bool {
        (self as u8) <= (Op::IsF as u8)
    }

    /// The test with the opposite outcome.
    pub fn inverted(self) -> Option<Op> {
        use Op::*;
        Some(match self {
            IsLt => IsGe,
            IsGe => IsLt,
            IsLe => IsGt,
            IsGt => IsLe,
            IsEqV => IsNeV,
            IsNeV => IsEqV,
            IsEqS => IsNeS,
            IsNeS => IsEqS,
            IsEqN => IsNeN,
            IsNeN => IsEqN,
            IsEqP => IsNeP,
            IsNeP => IsEqP,
            IsTc => IsFc,
            IsFc => IsTc,
            IsT => IsF,
            IsF => IsT,
            _ => return None,
        })
    }

    pub fn is_return(self) -> bool {
        matches!(self, Op::RetM | Op::Ret | Op::Ret0 | Op::Ret1 | Op::CallT | Op::CallMT)
    }
}

/// A 32-bit instruction.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction(pub u32);

impl Instruction {
    // ---- Constructors ----

    pub fn abc(op: Op, a: u8, b: u8, c: u8) -> Self {
        let mut i = (op as u32) << POS_OP;
        i |= (a as u32) << POS_A;
        i |= (b as u32) << POS_B;
        i |= (c as u32) << POS_C;
        Instruction(i)
    }

    pub fn ad(op: Op, a: u8, d: u16) -> Self {
        let mut i = (op as u32) << POS_OP;
        i |= (a as u32) << POS_A;
        i |= (d as u32) << POS_D;
        Instruction(i)
    }

    /// Jump with a concrete displacement.
    pub fn aj(op: Op, a: u8, offset: i32) -> Self {
        debug_assert!(
            (MIN_JUMP..=MAX_JUMP).contains(&offset),
            "jump out of range: {offset}"
        );
        Self::ad(op, a, (offset + JUMP_BIAS) as u16)
    }

    // ---- Decoders ----

    pub fn op(&self) -> Op {
        let val = (self.0 >> POS_OP) & mask(SIZE_OP);
        Op::from_u8(val as u8).unwrap_or(Op::Jmp)
    }

    pub fn a(&self) -> u8 {
        ((self.0 >> POS_A) & mask(SIZE_A)) as u8
    }

    pub fn b(&self) -> u8 {
        ((self.0 >> POS_B) & mask(SIZE_B)) as u8
    }

    pub fn c(&self) -> u8 {
        ((self.0 >> POS_C) & mask(SIZE_C)) as u8
    }

    pub fn d(&self) -> u16 {
        ((self.0 >> POS_D) & mask(SIZE_D)) as u16
    }

    /// Signed jump displacement.
    pub fn j(&self) -> i32 {
        self.d() as i32 - JUMP_BIAS
    }

    /// Absolute target of a jump at `pc`.
    pub fn jump_target(&self, pc: usize) -> isize {
        pc as isize + 1 + self.j() as isize
    }

    // ---- Mutators (for backpatching) ----

    pub fn set_op(&mut self, op: Op) {
        self.0 = (self.0 & !(mask(SIZE_OP) << POS_OP)) | ((op as u32) << POS_OP);
    }

    pub fn set_a(&mut self, a: u8) {
        self.0 = (self.0 & !(mask(SIZE_A) << POS_A)) | ((a as u32) << POS_A);
    }

    pub fn set_b(&mut self, b: u8) {
        self.0 = (self.0 & !(mask(SIZE_B) << POS_B)) | ((b as u32) << POS_B);
    }

    pub fn set_c(&mut self, c: u8) {
        self.0 = (self.0 & !(mask(SIZE_C) << POS_C)) | ((c as u32) << POS_C);
    }

    pub fn set_d(&mut self, d: u16) {
        self.0 = (self.0 & !(mask(SIZE_D) << POS_D)) | ((d as u32) << POS_D);
    }

    pub fn set_j(&mut self, offset: i32) {
        debug_assert!((MIN_JUMP..=MAX_JUMP).contains(&offset));
        self.set_d((offset + JUMP_BIAS) as u16);
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = self.op();
        write!(f, "{} A={}", op.name(), self.a())?;
        if op.is_abc() {
            write!(f, " B={} C={}", self.b(), self.c())
        } else if op.is_jump() {
            write!(f, " J={}", self.j())
        } else {
            write!(f, " D={}", self.d())
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
