/// Moving expression values into registers, storing them, and branching on them.
use super::expr::{ExprDesc, ExprKind, IndexKey};
use super::func_state::FuncState;
use super::jumps::JumpList;
use crate::error::Result;
use crate::intern::StringId;
use crate::opcode::{Instruction, Op, MAX_C, NO_REG, PRI_FALSE, PRI_NIL, PRI_TRUE};

/// `n` as a `KSHORT` operand, if it is an exactly representable small integer.
fn short_int(n: f64) -> Option<i16> {
    let k = n as i16;
    if k as f64 == n && !(n == 0.0 && n.is_sign_negative()) {
        Some(k)
    } else {
        None
    }
}

impl FuncState {
    /// Resolve variable references into a register or a relocable load.
    pub fn discharge(&mut self, e: &mut ExprDesc) -> Result<()> {
        let inst = match e.kind {
            ExprKind::Upval(idx) => Instruction::ad(Op::UGet, 0, idx as u16),
            ExprKind::Global(name) => {
                let k = self.const_str(name)?;
                Instruction::ad(Op::GGet, 0, k)
            }
            ExprKind::Indexed { base, key } => {
                let inst = match key {
                    IndexKey::Str(k) => Instruction::abc(Op::TGetS, 0, base, k),
                    IndexKey::Byte(b) => Instruction::abc(Op::TGetB, 0, base, b),
                    IndexKey::Reg(r) => {
                        self.release(r);
                        Instruction::abc(Op::TGetV, 0, base, r)
                    }
                };
                self.release(base);
                inst
            }
            ExprKind::Call { base, .. } => {
                e.kind = ExprKind::NonReloc(base);
                return Ok(());
            }
            ExprKind::Vararg(pc) => {
                e.kind = ExprKind::NonReloc(self.code[pc].a());
                return Ok(());
            }
            ExprKind::Local(reg) => {
                e.kind = ExprKind::NonReloc(reg);
                return Ok(());
            }
            _ => return Ok(()),
        };
        let pc = self.emit(inst)?;
        e.kind = ExprKind::Relocable(pc);
        Ok(())
    }

    /// Set `n` registers from `from` to nil, merging with a preceding nil load.
    pub fn emit_nil(&mut self, from: u8, n: u8) -> Result<()> {
        let pc = self.pc();
        if pc > self.last_target && from != NO_REG {
            let prev = self.code[pc - 1];
            let pfrom = prev.a() as u32;
            let (from32, n32) = (from as u32, n as u32);
            let merged = match prev.op() {
                Op::KPri if prev.d() == PRI_NIL => {
                    if from32 == pfrom {
                        if n == 1 {
                            return Ok(());
                        }
                        Some((pfrom, from32 + n32 - 1))
                    } else if from32 == pfrom + 1 {
                        Some((pfrom, from32 + n32 - 1))
                    } else {
                        None
                    }
                }
                Op::KNil => {
                    let pto = prev.d() as u32;
                    if pfrom <= from32 && from32 <= pto + 1 {
                        Some((pfrom, pto.max(from32 + n32 - 1)))
                    } else {
                        None
                    }
                }
                _ => None,
            };
            if let Some((lo, hi)) = merged {
                self.code[pc - 1] = Instruction::ad(Op::KNil, lo as u8, hi as u16);
                return Ok(());
            }
        }
        if n == 1 {
            self.emit_ad(Op::KPri, from, PRI_NIL)?;
        } else {
            self.emit_ad(Op::KNil, from, (from as u16) + n as u16 - 1)?;
        }
        Ok(())
    }

    /// Put a value into `reg`, ignoring its jump lists.
    pub fn to_reg_nobranch(&mut self, e: &mut ExprDesc, reg: u8) -> Result<()> {
        self.discharge(e)?;
        let inst = match e.kind {
            ExprKind::Str(s) => {
                let k = self.const_str(s)?;
                Instruction::ad(Op::KStr, reg, k)
            }
            ExprKind::Num(n) => match short_int(n) {
                Some(k) => Instruction::ad(Op::KShort, reg, k as u16),
                None => {
                    let k = self.const_num(n)?;
                    Instruction::ad(Op::KNum, reg, k)
                }
            },
            ExprKind::Relocable(pc) => {
                self.code[pc].set_a(reg);
                e.kind = ExprKind::NonReloc(reg);
                return Ok(());
            }
            ExprKind::NonReloc(src) => {
                if src == reg {
                    return Ok(());
                }
                Instruction::ad(Op::Mov, reg, src as u16)
            }
            ExprKind::Nil => {
                self.emit_nil(reg, 1)?;
                e.kind = ExprKind::NonReloc(reg);
                return Ok(());
            }
            ExprKind::True => Instruction::ad(Op::KPri, reg, PRI_TRUE),
            ExprKind::False => Instruction::ad(Op::KPri, reg, PRI_FALSE),
            _ => {
                debug_assert!(
                    matches!(e.kind, ExprKind::Void | ExprKind::Jmp(_)),
                    "undischarged expression {:?}",
                    e.kind
                );
                return Ok(());
            }
        };
        self.emit(inst)?;
        e.kind = ExprKind::NonReloc(reg);
        Ok(())
    }

    /// Put a value into `reg`, resolving its jump lists.
    pub fn to_reg(&mut self, e: &mut ExprDesc, reg: u8) -> Result<()> {
        self.to_reg_nobranch(e, reg)?;
        if let ExprKind::Jmp(pc) = e.kind {
            let mut t = e.t;
            self.append(&mut t, JumpList::at(pc));
            e.t = t;
        }
        if e.has_jump() {
            let mut jfalse = None;
            let mut jtrue = None;
            if self.list_needs_value(e.t) || self.list_needs_value(e.f) {
                let jval = if matches!(e.kind, ExprKind::Jmp(_)) {
                    JumpList::EMPTY
                } else {
                    self.emit_jump()?
                };
                jfalse = Some(self.emit_ad(Op::KPri, reg, PRI_FALSE)?);
                let free = self.regs.free_reg;
                self.emit(Instruction::aj(Op::Jmp, free, 1))?;
                jtrue = Some(self.emit_ad(Op::KPri, reg, PRI_TRUE)?);
                self.patch_to_here(jval);
            }
            let end = self.pc();
            self.last_target = end;
            self.patch_with_value(e.f, end, reg, jfalse.unwrap_or(end))?;
            self.patch_with_value(e.t, end, reg, jtrue.unwrap_or(end))?;
        }
        e.t = JumpList::EMPTY;
        e.f = JumpList::EMPTY;
        e.kind = ExprKind::NonReloc(reg);
        Ok(())
    }

    /// Put a value into a newly reserved register.
    pub fn to_next_reg(&mut self, e: &mut ExprDesc) -> Result<()> {
        self.discharge(e)?;
        self.free(e);
        let reg = self.reserve(1)?;
        self.to_reg(e, reg)
    }

    /// Put a value into some register and return it.
    pub fn to_any_reg(&mut self, e: &mut ExprDesc) -> Result<u8> {
        self.discharge(e)?;
        if let ExprKind::NonReloc(reg) = e.kind {
            if !e.has_jump() {
                return Ok(reg);
            }
            if reg >= self.nactvar() {
                self.to_reg(e, reg)?;
                return Ok(reg);
            }
        }
        self.to_next_reg(e)?;
        match e.kind {
            ExprKind::NonReloc(reg) => Ok(reg),
            _ => Ok(self.regs.free_reg - 1),
        }
    }

    /// Materialize jumps; otherwise only discharge.
    pub fn to_val(&mut self, e: &mut ExprDesc) -> Result<()> {
        if e.has_jump() {
            self.to_any_reg(e)?;
        } else {
            self.discharge(e)?;
        }
        Ok(())
    }

    /// Store `e` into the variable `var`.
    pub fn store(&mut self, var: &ExprDesc, e: &mut ExprDesc) -> Result<()> {
        let inst = match var.kind {
            ExprKind::Local(reg) => {
                self.free(e);
                return self.to_reg(e, reg);
            }
            ExprKind::Upval(idx) => {
                self.to_val(e)?;
                match e.kind {
                    ExprKind::Nil => Instruction::ad(Op::USetP, idx, PRI_NIL),
                    ExprKind::False => Instruction::ad(Op::USetP, idx, PRI_FALSE),
                    ExprKind::True => Instruction::ad(Op::USetP, idx, PRI_TRUE),
                    ExprKind::Str(s) => {
                        let k = self.const_str(s)?;
                        Instruction::ad(Op::USetS, idx, k)
                    }
                    ExprKind::Num(n) => {
                        let k = self.const_num(n)?;
                        Instruction::ad(Op::USetN, idx, k)
                    }
                    _ => {
                        let reg = self.to_any_reg(e)?;
                        Instruction::ad(Op::USetV, idx, reg as u16)
                    }
                }
            }
            ExprKind::Global(name) => {
                let ra = self.to_any_reg(e)?;
                let k = self.const_str(name)?;
                Instruction::ad(Op::GSet, ra, k)
            }
            ExprKind::Indexed { base, key } => {
                let ra = self.to_any_reg(e)?;
                match key {
                    IndexKey::Str(k) => Instruction::abc(Op::TSetS, ra, base, k),
                    IndexKey::Byte(b) => Instruction::abc(Op::TSetB, ra, base, b),
                    IndexKey::Reg(rc) => {
                        // Key reserved above the value (table constructors).
                        if ra >= self.nactvar() && rc >= ra {
                            self.release(rc);
                        }
                        Instruction::abc(Op::TSetV, ra, base, rc)
                    }
                }
            }
            _ => {
                debug_assert!(false, "store to non-variable {:?}", var.kind);
                return Ok(());
            }
        };
        self.emit(inst)?;
        self.free(e);
        Ok(())
    }

    /// Turn `t` (already in a register) into `t[key]`.
    pub fn index(&mut self, t: &mut ExprDesc, key: &mut ExprDesc) -> Result<()> {
        let ExprKind::NonReloc(base) = t.kind else {
            debug_assert!(false, "indexing an undischarged table {:?}", t.kind);
            return Ok(());
        };
        let idx = match key.kind {
            ExprKind::Num(n) if !key.has_jump() && n >= 0.0 && n <= MAX_C as f64 && n.fract() == 0.0 => {
                IndexKey::Byte(n as u8)
            }
            ExprKind::Str(s) if !key.has_jump() => {
                let k = self.const_str(s)?;
                if k <= MAX_C as u16 {
                    IndexKey::Str(k as u8)
                } else {
                    IndexKey::Reg(self.to_any_reg(key)?)
                }
            }
            _ => IndexKey::Reg(self.to_any_reg(key)?),
        };
        t.kind = ExprKind::Indexed { base, key: idx };
        Ok(())
    }

    /// `obj:name` lookup: callee in a fresh register, `obj` right above it.
    pub fn emit_method(&mut self, e: &mut ExprDesc, name: StringId) -> Result<()> {
        let obj = self.to_any_reg(e)?;
        self.free(e);
        let func = self.regs.free_reg;
        self.emit_ad(Op::Mov, func + 1, obj as u16)?;
        let k = self.const_str(name)?;
        if k <= MAX_C as u16 {
            self.reserve(2)?;
            self.emit_abc(Op::TGetS, func, obj, k as u8)?;
        } else {
            self.reserve(3)?;
            self.emit_ad(Op::KStr, func + 2, k)?;
            self.emit_abc(Op::TGetV, func, obj, func + 2)?;
            self.release(func + 2);
        }
        e.kind = ExprKind::NonReloc(func);
        Ok(())
    }

    /// Emit a test of `e` followed by a jump taken when `e` is `cond`.
    fn emit_branch(&mut self, e: &mut ExprDesc, cond: bool) -> Result<JumpList> {
        if let ExprKind::Relocable(pc) = e.kind {
            if self.code[pc].op() == Op::Not {
                // `not x` used as a condition: test x directly.
                let src = self.code[pc].d();
                self.code[pc] = Instruction::ad(if cond { Op::IsF } else { Op::IsT }, 0, src);
                return self.emit_jump();
            }
        }
        if !matches!(e.kind, ExprKind::NonReloc(_)) {
            let reg = self.reserve(1)?;
            self.to_reg_nobranch(e, reg)?;
        }
        let ExprKind::NonReloc(reg) = e.kind else {
            return self.emit_jump();
        };
        let op = if cond { Op::IsTc } else { Op::IsFc };
        self.emit_ad(op, NO_REG, reg as u16)?;
        let j = self.emit_jump()?;
        self.free(e);
        Ok(j)
    }

    /// Fall through when `e` is true; collect the false exits in `e.f`.
    pub fn branch_true(&mut self, e: &mut ExprDesc) -> Result<()> {
        self.discharge(e)?;
        let j = match e.kind {
            ExprKind::Str(_) | ExprKind::Num(_) | ExprKind::True => JumpList::EMPTY,
            ExprKind::Jmp(pc) => {
                self.invert_cond(pc);
                JumpList::at(pc)
            }
            ExprKind::False | ExprKind::Nil => {
                self.to_reg_nobranch(e, NO_REG)?;
                self.emit_jump()?
            }
            _ => self.emit_branch(e, false)?,
        };
        let mut f = e.f;
        self.append(&mut f, j);
        e.f = f;
        self.patch_to_here(e.t);
        e.t = JumpList::EMPTY;
        Ok(())
    }

    /// Fall through when `e` is false; collect the true exits in `e.t`.
    pub fn branch_false(&mut self, e: &mut ExprDesc) -> Result<()> {
        self.discharge(e)?;
        let j = match e.kind {
            ExprKind::Nil | ExprKind::False => JumpList::EMPTY,
            ExprKind::Jmp(pc) => JumpList::at(pc),
            ExprKind::Str(_) | ExprKind::Num(_) | ExprKind::True => {
                self.to_reg_nobranch(e, NO_REG)?;
                self.emit_jump()?
            }
            _ => self.emit_branch(e, true)?,
        };
        let mut t = e.t;
        self.append(&mut t, j);
        e.t = t;
        self.patch_to_here(e.f);
        e.f = JumpList::EMPTY;
        Ok(())
    }
}
