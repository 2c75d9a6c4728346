/// Operator emission.
///
/// Arithmetic folds numeric constants and picks the `VN`/`NV`/`VV` form,
/// comparisons produce `Jmp` descriptors, `and`/`or` merge jump lists.
/// Bitwise operators become calls into the configured bit library, and the
/// if-empty operators test against the configured falsy policy.
use super::expr::{BinOp, ExprDesc, ExprKind, UnOp};
use super::func_state::FuncState;
use super::jumps::JumpList;
use super::Compiler;
use crate::config::{ConstValue, FalsyValue};
use crate::error::Result;
use crate::opcode::{Instruction, Op, MAX_B, MAX_C, PRI_FALSE, PRI_NIL, PRI_TRUE};
use crate::token::TokenStream;

#[derive(Clone, Copy, PartialEq, Eq)]
enum ArithForm {
    /// Register op number constant.
    VN,
    /// Number constant op register.
    NV,
    /// Register op register.
    VV,
}

fn arith_op(op: BinOp, form: ArithForm) -> Op {
    use ArithForm::*;
    match (op, form) {
        (BinOp::Add, VN) => Op::AddVN,
        (BinOp::Sub, VN) => Op::SubVN,
        (BinOp::Mul, VN) => Op::MulVN,
        (BinOp::Div, VN) => Op::DivVN,
        (BinOp::Mod, VN) => Op::ModVN,
        (BinOp::Add, NV) => Op::AddNV,
        (BinOp::Sub, NV) => Op::SubNV,
        (BinOp::Mul, NV) => Op::MulNV,
        (BinOp::Div, NV) => Op::DivNV,
        (BinOp::Mod, NV) => Op::ModNV,
        (BinOp::Add, VV) => Op::AddVV,
        (BinOp::Sub, VV) => Op::SubVV,
        (BinOp::Mul, VV) => Op::MulVV,
        (BinOp::Div, VV) => Op::DivVV,
        (BinOp::Mod, VV) => Op::ModVV,
        _ => Op::Pow,
    }
}

/// Fold `a op b`. NaN and negative zero results are left to the VM.
pub fn fold_arith(op: BinOp, a: f64, b: f64) -> Option<f64> {
    let r = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::Mod => a - (a / b).floor() * b,
        BinOp::Pow => a.powf(b),
        _ => return None,
    };
    if r.is_nan() || (r == 0.0 && r.is_sign_negative()) {
        None
    } else {
        Some(r)
    }
}

impl FuncState {
    fn emit_arith(&mut self, op: BinOp, e1: &mut ExprDesc, e2: &mut ExprDesc) -> Result<()> {
        if let (Some(a), Some(b)) = (e1.number_nojump(), e2.number_nojump()) {
            if let Some(r) = fold_arith(op, a, b) {
                e1.kind = ExprKind::Num(r);
                return Ok(());
            }
        }
        let (inst, rb, rc) = if op == BinOp::Pow {
            let rc = self.to_any_reg(e2)?;
            let rb = self.to_any_reg(e1)?;
            (Op::Pow, rb, rc)
        } else {
            // The second operand first: an indexed load may release registers.
            self.to_val(e2)?;
            let mut form = ArithForm::VV;
            let mut rc = match e2.number_nojump() {
                Some(n) => {
                    let k = self.const_num(n)?;
                    if k <= MAX_C as u16 {
                        form = ArithForm::VN;
                        k as u8
                    } else {
                        self.to_any_reg(e2)?
                    }
                }
                None => self.to_any_reg(e2)?,
            };
            self.to_val(e1)?;
            let rb = match e1.number_nojump() {
                Some(n) if form == ArithForm::VV => {
                    let k = self.const_num(n)?;
                    if k <= MAX_B as u16 {
                        form = ArithForm::NV;
                        let rb = rc;
                        rc = k as u8;
                        rb
                    } else {
                        self.to_any_reg(e1)?
                    }
                }
                _ => self.to_any_reg(e1)?,
            };
            (arith_op(op, form), rb, rc)
        };
        self.drop_operand(e1);
        self.drop_operand(e2);
        let pc = self.emit_abc(inst, 0, rb, rc)?;
        e1.kind = ExprKind::Relocable(pc);
        Ok(())
    }

    fn emit_comp(&mut self, op: BinOp, e1: &mut ExprDesc, e2: &mut ExprDesc) -> Result<()> {
        self.to_val(e1)?;
        let ins = {
            let (x, y) = match op {
                BinOp::Eq | BinOp::Ne if e1.is_const() => (&mut *e2, &mut *e1),
                BinOp::Gt | BinOp::Ge => (&mut *e2, &mut *e1),
                _ => (&mut *e1, &mut *e2),
            };
            let ins = match op {
                BinOp::Eq | BinOp::Ne => {
                    let eq = op == BinOp::Eq;
                    let ra = self.to_any_reg(x)?;
                    self.to_val(y)?;
                    match y.kind {
                        ExprKind::Nil | ExprKind::False | ExprKind::True => {
                            let pri = match y.kind {
                                ExprKind::Nil => PRI_NIL,
                                ExprKind::False => PRI_FALSE,
                                _ => PRI_TRUE,
                            };
                            Instruction::ad(if eq { Op::IsEqP } else { Op::IsNeP }, ra, pri)
                        }
                        ExprKind::Str(s) => {
                            let k = self.const_str(s)?;
                            Instruction::ad(if eq { Op::IsEqS } else { Op::IsNeS }, ra, k)
                        }
                        ExprKind::Num(n) => {
                            let k = self.const_num(n)?;
                            Instruction::ad(if eq { Op::IsEqN } else { Op::IsNeN }, ra, k)
                        }
                        _ => {
                            let rd = self.to_any_reg(y)?;
                            Instruction::ad(if eq { Op::IsEqV } else { Op::IsNeV }, ra, rd as u16)
                        }
                    }
                }
                BinOp::Gt | BinOp::Ge => {
                    // `a > b` is `b < a`, `a >= b` is `b <= a`.
                    self.to_val(x)?;
                    let ra = self.to_any_reg(x)?;
                    let rd = self.to_any_reg(y)?;
                    let op = if op == BinOp::Gt { Op::IsLt } else { Op::IsLe };
                    Instruction::ad(op, ra, rd as u16)
                }
                _ => {
                    let rd = self.to_any_reg(y)?;
                    let ra = self.to_any_reg(x)?;
                    let op = if op == BinOp::Lt { Op::IsLt } else { Op::IsLe };
                    Instruction::ad(op, ra, rd as u16)
                }
            };
            self.drop_operand(x);
            self.drop_operand(y);
            ins
        };
        self.emit(ins)?;
        let pc = self.emit_test_jump()?;
        e1.kind = ExprKind::Jmp(pc);
        Ok(())
    }

    /// Prepare the left operand before the right one is parsed.
    pub fn binop_left(&mut self, op: BinOp, e: &mut ExprDesc) -> Result<()> {
        match op {
            BinOp::And => self.branch_true(e),
            BinOp::Or => self.branch_false(e),
            BinOp::Concat => self.to_next_reg(e),
            BinOp::Eq | BinOp::Ne => {
                if !e.is_const_nojump() {
                    self.to_any_reg(e)?;
                }
                Ok(())
            }
            _ => {
                if e.number_nojump().is_none() {
                    self.to_any_reg(e)?;
                }
                Ok(())
            }
        }
    }

    /// Combine both operands into `e1`.
    pub fn binop(&mut self, op: BinOp, e1: &mut ExprDesc, e2: &mut ExprDesc) -> Result<()> {
        match op {
            _ if op.is_arith() => self.emit_arith(op, e1, e2),
            _ if op.is_comparison() => self.emit_comp(op, e1, e2),
            BinOp::And => {
                debug_assert!(e1.t.is_empty(), "true list of `and` not closed");
                self.discharge(e2)?;
                let mut f = e2.f;
                self.append(&mut f, e1.f);
                e2.f = f;
                *e1 = *e2;
                Ok(())
            }
            BinOp::Or => {
                debug_assert!(e1.f.is_empty(), "false list of `or` not closed");
                self.discharge(e2)?;
                let mut t = e2.t;
                self.append(&mut t, e1.t);
                e2.t = t;
                *e1 = *e2;
                Ok(())
            }
            BinOp::Concat => {
                self.to_val(e2)?;
                let r1 = self.to_any_reg(e1)?;
                match e2.kind {
                    ExprKind::Relocable(pc) if self.code[pc].op() == Op::Cat => {
                        debug_assert_eq!(r1 + 1, self.code[pc].b(), "bad CAT operand layout");
                        self.free(e1);
                        self.code[pc].set_b(r1);
                        e1.kind = ExprKind::Relocable(pc);
                    }
                    _ => {
                        self.to_next_reg(e2)?;
                        let r2 = self.to_any_reg(e2)?;
                        self.free(e2);
                        self.free(e1);
                        let pc = self.emit_abc(Op::Cat, 0, r1, r2)?;
                        e1.kind = ExprKind::Relocable(pc);
                    }
                }
                Ok(())
            }
            _ => {
                debug_assert!(false, "{op:?} has its own emitter");
                Ok(())
            }
        }
    }

    /// `not`, `-` and `#`.
    pub fn emit_unop(&mut self, op: UnOp, e: &mut ExprDesc) -> Result<()> {
        let inst = match op {
            UnOp::Not => {
                std::mem::swap(&mut e.t, &mut e.f);
                self.drop_values(e.f);
                self.drop_values(e.t);
                self.discharge(e)?;
                match e.kind {
                    ExprKind::Nil | ExprKind::False => {
                        e.kind = ExprKind::True;
                        return Ok(());
                    }
                    ExprKind::True | ExprKind::Num(_) | ExprKind::Str(_) => {
                        e.kind = ExprKind::False;
                        return Ok(());
                    }
                    ExprKind::Jmp(pc) => {
                        self.invert_cond(pc);
                        return Ok(());
                    }
                    ExprKind::Relocable(pc) => {
                        let reg = self.reserve(1)?;
                        self.code[pc].set_a(reg);
                        e.kind = ExprKind::NonReloc(reg);
                    }
                    _ => debug_assert!(
                        matches!(e.kind, ExprKind::NonReloc(_)),
                        "bad operand of not: {:?}",
                        e.kind
                    ),
                }
                Op::Not
            }
            UnOp::Neg => {
                if let Some(n) = e.number_nojump() {
                    // -0 is left to the VM.
                    if n != 0.0 {
                        e.kind = ExprKind::Num(-n);
                        return Ok(());
                    }
                }
                self.to_any_reg(e)?;
                Op::Unm
            }
            UnOp::Len => {
                self.to_any_reg(e)?;
                Op::Len
            }
            UnOp::BNot => {
                debug_assert!(false, "`~x` is a library call");
                return Ok(());
            }
        };
        self.free(e);
        let ExprKind::NonReloc(reg) = e.kind else {
            return Ok(());
        };
        let pc = self.emit_ad(inst, 0, reg as u16)?;
        e.kind = ExprKind::Relocable(pc);
        Ok(())
    }

    /// Discharge `e` into `reg`, releasing the temporary it held.
    pub fn move_to(&mut self, e: &mut ExprDesc, reg: u8) -> Result<()> {
        self.discharge(e)?;
        self.free(e);
        self.to_reg(e, reg)
    }
}

/// Left operand of `??` once its tests are emitted.
pub(super) enum IfEmptyLeft {
    /// Constant empty value: the result is the right operand.
    Empty,
    /// Constant non-empty value: code of the right operand, emitted from
    /// `mark` on, is dropped. `pending` holds the jumps that were waiting
    /// for the next instruction at `mark`.
    Kept { mark: usize, pending: JumpList },
    /// Run-time value in `reg`; `skip` jumps over the right operand.
    Tested { reg: u8, skip: JumpList },
}

impl<S: TokenStream> Compiler<'_, S> {
    /// Compile-time value of a constant descriptor without pending jumps.
    fn const_value(&self, e: &ExprDesc) -> Option<ConstValue<'_>> {
        if e.has_jump() {
            return None;
        }
        Some(match e.kind {
            ExprKind::Nil => ConstValue::Nil,
            ExprKind::True => ConstValue::Bool(true),
            ExprKind::False => ConstValue::Bool(false),
            ExprKind::Num(n) => ConstValue::Num(n),
            ExprKind::Str(s) => ConstValue::Str(self.strings.get_bytes(s)),
            _ => return None,
        })
    }

    /// Put `e` into a temporary that may be overwritten with a result.
    fn to_scratch_reg(&mut self, e: &mut ExprDesc) -> Result<u8> {
        self.fs.discharge(e)?;
        match e.kind {
            ExprKind::NonReloc(reg) if self.fs.regs.is_top(reg) => {
                if e.has_jump() {
                    self.fs.to_reg(e, reg)?;
                }
                Ok(reg)
            }
            _ => {
                self.fs.to_next_reg(e)?;
                Ok(self.fs.free_reg() - 1)
            }
        }
    }

    /// Emit one equality test per empty value; the returned jumps are taken
    /// when `reg` holds an empty value.
    pub(super) fn emit_empty_checks(&mut self, reg: u8) -> Result<JumpList> {
        let mut list = JumpList::EMPTY;
        let policy = self.options.falsy;
        for value in policy.values() {
            let ins = match value {
                FalsyValue::Nil => Instruction::ad(Op::IsEqP, reg, PRI_NIL),
                FalsyValue::False => Instruction::ad(Op::IsEqP, reg, PRI_FALSE),
                FalsyValue::Zero => {
                    let k = self.fs.const_num(0.0)?;
                    Instruction::ad(Op::IsEqN, reg, k)
                }
                FalsyValue::EmptyString => {
                    let empty = self.strings.intern(b"");
                    let k = self.fs.const_str(empty)?;
                    Instruction::ad(Op::IsEqS, reg, k)
                }
            };
            self.fs.emit(ins)?;
            let pc = self.fs.emit_test_jump()?;
            self.fs.append(&mut list, JumpList::at(pc));
        }
        Ok(list)
    }

    /// Emit the tests of `lhs ?? ...` before the right operand is parsed.
    pub(super) fn if_empty_left(&mut self, e: &mut ExprDesc) -> Result<IfEmptyLeft> {
        self.fs.discharge(e)?;
        if let Some(value) = self.const_value(e) {
            if self.options.falsy.is_falsy(value) {
                return Ok(IfEmptyLeft::Empty);
            }
            let pending = std::mem::replace(&mut self.fs.jpc, JumpList::EMPTY);
            return Ok(IfEmptyLeft::Kept {
                mark: self.fs.pc(),
                pending,
            });
        }
        let reg = self.to_scratch_reg(e)?;
        let empty = self.emit_empty_checks(reg)?;
        let skip = self.fs.emit_jump()?;
        self.fs.patch_to_here(empty);
        Ok(IfEmptyLeft::Tested { reg, skip })
    }

    /// Finish `lhs ?? rhs` once the right operand is parsed.
    pub(super) fn if_empty_right(
        &mut self,
        e1: &mut ExprDesc,
        e2: &mut ExprDesc,
        left: IfEmptyLeft,
    ) -> Result<()> {
        match left {
            IfEmptyLeft::Empty => {
                self.fs.discharge(e2)?;
                *e1 = *e2;
            }
            IfEmptyLeft::Kept { mark, pending } => {
                self.fs.discharge(e2)?;
                self.fs.free(e2);
                self.fs.truncate(mark);
                self.fs.jpc = pending;
            }
            IfEmptyLeft::Tested { reg, skip } => {
                self.fs.move_to(e2, reg)?;
                self.fs.patch_to_here(skip);
                *e1 = ExprDesc::new(ExprKind::NonReloc(reg));
            }
        }
        Ok(())
    }

    /// Postfix `e??`: `true` unless `e` is empty under the policy.
    pub(super) fn presence_check(&mut self, e: &mut ExprDesc) -> Result<()> {
        self.fs.discharge(e)?;
        if let Some(value) = self.const_value(e) {
            let present = !self.options.falsy.is_falsy(value);
            *e = ExprDesc::new(if present { ExprKind::True } else { ExprKind::False });
            return Ok(());
        }
        let reg = self.to_scratch_reg(e)?;
        let empty = self.emit_empty_checks(reg)?;
        self.fs.emit_ad(Op::KPri, reg, PRI_TRUE)?;
        let skip = self.fs.emit_jump()?;
        self.fs.patch_to_here(empty);
        self.fs.emit_ad(Op::KPri, reg, PRI_FALSE)?;
        self.fs.patch_to_here(skip);
        *e = ExprDesc::new(ExprKind::NonReloc(reg));
        Ok(())
    }

    /// `cond ? a :> b`, with `?` consumed. The result lands in `cond`'s register.
    pub(super) fn ternary(&mut self, cond: &mut ExprDesc) -> Result<()> {
        let reg = self.to_scratch_reg(cond)?;
        let empty = self.emit_empty_checks(reg)?;
        let mut a = self.expr_binop(0)?;
        self.fs.move_to(&mut a, reg)?;
        let skip = self.fs.emit_jump()?;
        self.expect(&crate::token::Token::TernarySep)?;
        self.fs.patch_to_here(empty);
        let mut b = self.expr_binop(super::expr::TERNARY_PRIORITY)?;
        self.fs.move_to(&mut b, reg)?;
        self.fs.patch_to_here(skip);
        *cond = ExprDesc::new(ExprKind::NonReloc(reg));
        Ok(())
    }

    /// Call `<bit library>.<func>(args...)` and leave the result in a register.
    pub(super) fn bit_call(&mut self, func: &[u8], args: &mut [ExprDesc]) -> Result<ExprDesc> {
        for a in args.iter_mut().rev() {
            self.fs.to_val(a)?;
        }
        for a in args.iter().rev() {
            self.fs.free(a);
        }
        let n = args.len() as u8;
        let base = self.fs.reserve(1 + n as u32)?;
        // Highest first: each source sits below its destination.
        for (i, a) in args.iter_mut().enumerate().rev() {
            self.fs.to_reg(a, base + 1 + i as u8)?;
        }
        let lib = self.strings.intern(self.options.bit_library.as_bytes());
        let name = self.strings.intern(func);
        let k = self.fs.const_str(lib)?;
        self.fs.emit_ad(Op::GGet, base, k)?;
        let k = self.fs.const_str(name)?;
        if k <= MAX_C as u16 {
            self.fs.emit_abc(Op::TGetS, base, base, k as u8)?;
        } else {
            let tmp = self.fs.reserve(1)?;
            self.fs.emit_ad(Op::KStr, tmp, k)?;
            self.fs.emit_abc(Op::TGetV, base, base, tmp)?;
            self.fs.release(tmp);
        }
        self.fs.emit_abc(Op::Call, base, 2, n + 1)?;
        self.fs.regs.release_span(base + 1, n);
        Ok(ExprDesc::new(ExprKind::NonReloc(base)))
    }
}
