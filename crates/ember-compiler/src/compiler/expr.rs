/// Expression descriptors and operator tables.
use super::jumps::JumpList;
use crate::intern::StringId;
use crate::token::Token;

/// Describes where an expression's value currently lives.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ExprKind {
    /// No value (empty expression list).
    Void,
    Nil,
    True,
    False,
    Num(f64),
    Str(StringId),
    /// Active local in a register.
    Local(u8),
    /// Upvalue at the given index.
    Upval(u8),
    /// Global looked up by name.
    Global(StringId),
    /// Table in a register, indexed by `key`.
    Indexed { base: u8, key: IndexKey },
    /// Instruction at pc whose destination register is not yet set.
    Relocable(usize),
    /// Value pinned to a register.
    NonReloc(u8),
    /// Open call: `base` holds the callee and receives the results.
    Call { pc: usize, base: u8 },
    /// Open `...`.
    Vararg(usize),
    /// Result of a test; the jump sits at pc.
    Jmp(usize),
}

/// Key of an `Indexed` expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKey {
    /// Key in a register.
    Reg(u8),
    /// String constant index (fits the C operand).
    Str(u8),
    /// Small non-negative integer key.
    Byte(u8),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExprDesc {
    pub kind: ExprKind,
    /// Jumps taken when the expression is true.
    pub t: JumpList,
    /// Jumps taken when the expression is false.
    pub f: JumpList,
}

impl ExprDesc {
    pub fn new(kind: ExprKind) -> Self {
        ExprDesc {
            kind,
            t: JumpList::EMPTY,
            f: JumpList::EMPTY,
        }
    }

    pub fn void() -> Self {
        ExprDesc::new(ExprKind::Void)
    }

    pub fn has_jump(&self) -> bool {
        !self.t.is_empty() || !self.f.is_empty()
    }

    pub fn is_const(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Nil | ExprKind::True | ExprKind::False | ExprKind::Num(_) | ExprKind::Str(_)
        )
    }

    pub fn is_const_nojump(&self) -> bool {
        self.is_const() && !self.has_jump()
    }

    pub fn number(&self) -> Option<f64> {
        match self.kind {
            ExprKind::Num(n) => Some(n),
            _ => None,
        }
    }

    pub fn number_nojump(&self) -> Option<f64> {
        if self.has_jump() {
            None
        } else {
            self.number()
        }
    }

    /// Open call or vararg that can still produce several values.
    pub fn is_multi(&self) -> bool {
        matches!(self.kind, ExprKind::Call { .. } | ExprKind::Vararg(_))
    }

    /// Pc of the instruction that opened a multi-value expression.
    pub fn multi_pc(&self) -> Option<usize> {
        match self.kind {
            ExprKind::Call { pc, .. } | ExprKind::Vararg(pc) => Some(pc),
            _ => None,
        }
    }

    /// Can appear on the left of `=`.
    pub fn is_assignable(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Local(_) | ExprKind::Upval(_) | ExprKind::Global(_) | ExprKind::Indexed { .. }
        )
    }
}

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Ge,
    Le,
    Gt,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    And,
    Or,
    IfEmpty,
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
    Len,
    BNot,
}

/// Binding power of unary operators.
pub const UNARY_PRIORITY: u8 = 8;

/// Binding power of the ternary `? :>`.
pub const TERNARY_PRIORITY: u8 = 1;

impl BinOp {
    pub fn from_token(tok: &Token) -> Option<BinOp> {
        Some(match tok {
            Token::Plus => BinOp::Add,
            Token::Minus => BinOp::Sub,
            Token::Star => BinOp::Mul,
            Token::Slash => BinOp::Div,
            Token::Percent => BinOp::Mod,
            Token::Caret => BinOp::Pow,
            Token::DotDot => BinOp::Concat,
            Token::Equal => BinOp::Eq,
            Token::NotEqual => BinOp::Ne,
            Token::Less => BinOp::Lt,
            Token::GreaterEq => BinOp::Ge,
            Token::LessEq => BinOp::Le,
            Token::Greater => BinOp::Gt,
            Token::Ampersand => BinOp::BAnd,
            Token::Pipe => BinOp::BOr,
            Token::Tilde => BinOp::BXor,
            Token::ShiftLeft => BinOp::Shl,
            Token::ShiftRight => BinOp::Shr,
            Token::And => BinOp::And,
            Token::Or => BinOp::Or,
            Token::IfEmpty => BinOp::IfEmpty,
            _ => return None,
        })
    }

    /// Operator of a compound assignment token such as `+=`.
    pub fn from_compound(tok: &Token) -> Option<BinOp> {
        Some(match tok {
            Token::PlusAssign => BinOp::Add,
            Token::MinusAssign => BinOp::Sub,
            Token::StarAssign => BinOp::Mul,
            Token::SlashAssign => BinOp::Div,
            Token::PercentAssign => BinOp::Mod,
            Token::ConcatAssign => BinOp::Concat,
            _ => return None,
        })
    }

    /// (left, right) binding power.
    pub fn priority(self) -> (u8, u8) {
        match self {
            BinOp::Add | BinOp::Sub => (6, 6),
            BinOp::Mul | BinOp::Div | BinOp::Mod => (7, 7),
            BinOp::Pow => (10, 9),
            BinOp::Concat => (5, 4),
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Ge | BinOp::Le | BinOp::Gt => (3, 3),
            BinOp::BAnd => (5, 4),
            BinOp::BOr => (3, 2),
            BinOp::BXor => (4, 3),
            BinOp::Shl | BinOp::Shr => (7, 5),
            BinOp::And => (2, 2),
            BinOp::Or => (1, 1),
            BinOp::IfEmpty => (1, 1),
        }
    }

    pub fn is_arith(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Ge | BinOp::Le | BinOp::Gt
        )
    }

    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            BinOp::BAnd | BinOp::BOr | BinOp::BXor | BinOp::Shl | BinOp::Shr
        )
    }

    /// Name of the library function a bitwise operator lowers to.
    pub fn bit_function(self) -> &'static [u8] {
        match self {
            BinOp::BAnd => b"band",
            BinOp::BOr => b"bor",
            BinOp::BXor => b"bxor",
            BinOp::Shl => b"lshift",
            _ => b"rshift",
        }
    }
}

impl UnOp {
    pub fn from_token(tok: &Token) -> Option<UnOp> {
        Some(match tok {
            Token::Not => UnOp::Not,
            Token::Minus => UnOp::Neg,
            Token::Hash => UnOp::Len,
            Token::Tilde => UnOp::BNot,
            _ => return None,
        })
    }
}
