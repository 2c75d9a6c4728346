/// Statements and blocks.
use super::expr::{BinOp, ExprDesc, ExprKind, IndexKey};
use super::func_state::FuncState;
use super::jumps::JumpList;
use super::scope::{EdgeName, VarKind, SCOPE_LOOP, SCOPE_REPEAT, SCOPE_UPVAL};
use super::Compiler;
use crate::error::{ErrorCode, Result};
use crate::intern::StringId;
use crate::opcode::{Instruction, Op};
use crate::token::{Token, TokenStream};

impl FuncState {
    /// Copy the table and key registers of an indexed target to the top of
    /// the frame. Loading through the copy leaves the originals for the store.
    fn duplicate_table_operands(&mut self, target: ExprDesc) -> Result<ExprDesc> {
        let ExprKind::Indexed { base, key } = target.kind else {
            return Ok(target);
        };
        let new_base = self.free_reg();
        self.emit_ad(Op::Mov, new_base, base as u16)?;
        self.reserve(1)?;
        let key = match key {
            IndexKey::Reg(reg) => {
                let new_key = self.free_reg();
                self.emit_ad(Op::Mov, new_key, reg as u16)?;
                self.reserve(1)?;
                IndexKey::Reg(new_key)
            }
            key => key,
        };
        Ok(ExprDesc::new(ExprKind::Indexed {
            base: new_base,
            key,
        }))
    }
}

impl<S: TokenStream> Compiler<'_, S> {
    /// Statements up to the end of the enclosing block.
    pub(super) fn block_body(&mut self) -> Result<()> {
        self.nested(|c| {
            let mut last = false;
            while !last && !c.tok().is_block_end() {
                last = c.statement()?;
                c.test_next(&Token::Semi)?;
                debug_assert!(
                    c.fs.regs.frame_size >= c.fs.free_reg() && c.fs.free_reg() >= c.fs.nactvar(),
                    "register frame out of balance after a statement"
                );
                c.fs.reset_temporaries();
            }
            Ok(())
        })
    }

    /// A block in its own scope.
    fn block(&mut self) -> Result<()> {
        self.enter_scope(0);
        self.block_body()?;
        self.leave_scope()
    }

    /// One statement. Returns true for statements that must end a block.
    fn statement(&mut self) -> Result<bool> {
        let line = self.line();
        match *self.tok() {
            Token::If => self.if_stmt(line)?,
            Token::While => self.while_stmt(line)?,
            Token::Do => {
                self.next()?;
                self.block()?;
                self.expect_match(&Token::End, &Token::Do, line)?;
            }
            Token::For => self.for_stmt(line)?,
            Token::Repeat => self.repeat_stmt(line)?,
            Token::Function => self.function_stmt(line)?,
            Token::Local => {
                self.next()?;
                self.local_stmt()?;
            }
            Token::Return => {
                self.next()?;
                self.return_stmt()?;
                return Ok(true);
            }
            Token::Break => {
                self.next()?;
                self.loop_exit_stmt(EdgeName::Break, line)?;
            }
            Token::Continue => {
                self.next()?;
                self.loop_exit_stmt(EdgeName::Continue, line)?;
            }
            Token::Goto => {
                self.next()?;
                self.goto_stmt(line)?;
            }
            Token::DoubleColon => {
                self.next()?;
                self.label_stmt(line)?;
            }
            Token::Defer => {
                self.next()?;
                self.defer_stmt(line)?;
            }
            Token::Semi => {
                self.next()?;
            }
            _ => self.expr_stmt()?,
        }
        Ok(false)
    }

    // ---- Control flow ----

    fn if_stmt(&mut self, line: u32) -> Result<()> {
        let mut escape = JumpList::EMPTY;
        let mut flist = self.then_block()?;
        while self.check(&Token::ElseIf) {
            let j = self.fs.emit_jump()?;
            self.fs.append(&mut escape, j);
            self.fs.patch_to_here(flist);
            flist = self.then_block()?;
        }
        if self.check(&Token::Else) {
            let j = self.fs.emit_jump()?;
            self.fs.append(&mut escape, j);
            self.fs.patch_to_here(flist);
            self.next()?;
            self.block()?;
        } else {
            self.fs.append(&mut escape, flist);
        }
        self.fs.patch_to_here(escape);
        self.expect_match(&Token::End, &Token::If, line)
    }

    /// `if cond then block` or `elseif cond then block`. Returns the jumps
    /// taken when the condition is false.
    fn then_block(&mut self) -> Result<JumpList> {
        self.next()?;
        let condexit = self.expr_cond()?;
        self.expect(&Token::Then)?;
        self.block()?;
        Ok(condexit)
    }

    fn while_stmt(&mut self, line: u32) -> Result<()> {
        self.next()?;
        let start = self.fs.pc();
        self.fs.last_target = start;
        let condexit = self.expr_cond()?;
        self.enter_scope(SCOPE_LOOP);
        self.expect(&Token::Do)?;
        let nact = self.fs.nactvar();
        let lp = self.fs.emit_pending(Instruction::aj(Op::Loop, nact, 0))?;
        self.block()?;
        let back = self.fs.emit_jump()?;
        self.fs.patch_to(back, start)?;
        self.expect_match(&Token::End, &Token::While, line)?;
        self.resolve_continue(start)?;
        self.leave_scope()?;
        self.fs.patch_to_here(condexit);
        let exit = self.fs.pc();
        self.fs.patch_ins(lp, exit)
    }

    fn repeat_stmt(&mut self, line: u32) -> Result<()> {
        let lp = self.fs.pc();
        self.fs.last_target = lp;
        self.enter_scope(SCOPE_LOOP | SCOPE_REPEAT);
        self.enter_scope(0);
        self.next()?;
        let nact = self.fs.nactvar();
        self.fs.emit_pending(Instruction::aj(Op::Loop, nact, 0))?;
        self.block_body()?;
        self.expect_match(&Token::Until, &Token::Repeat, line)?;
        let iter = self.fs.pc();
        // The condition sees the body's locals.
        let mut condexit = self.expr_cond()?;
        let body_level = self.fs.scopes.last().map_or(nact, |bl| bl.nactvar);
        let closes = self.fs.scopes.last().is_some_and(|bl| bl.flags & SCOPE_UPVAL != 0)
            || self.defers_above(body_level);
        if closes {
            // Exit through a break; looping back first closes the body.
            let exit_line = self.last_line;
            self.loop_exit_stmt(EdgeName::Break, exit_line)?;
            self.fs.patch_to_here(condexit);
        }
        self.leave_scope()?;
        if closes {
            condexit = self.fs.emit_jump()?;
        }
        self.fs.patch_to(condexit, lp)?;
        let exit = self.fs.pc();
        self.fs.patch_ins(lp, exit)?;
        self.resolve_continue(iter)?;
        self.leave_scope()
    }

    fn for_stmt(&mut self, line: u32) -> Result<()> {
        self.enter_scope(SCOPE_LOOP);
        self.next()?;
        let first = self.expect_name()?;
        match *self.tok() {
            Token::Assign => self.for_num(first, line)?,
            Token::Comma | Token::In => self.for_iter(first)?,
            _ => {
                return Err(self.error(
                    ErrorCode::ExpectedToken,
                    format!("'=' or 'in' expected near {}", self.near()),
                ))
            }
        }
        self.expect_match(&Token::End, &Token::For, line)?;
        self.leave_scope()
    }

    /// Evaluate an expression into the next free register.
    fn expr_next(&mut self) -> Result<()> {
        let mut e = self.expr()?;
        self.fs.to_next_reg(&mut e)
    }

    /// Loop body with `nvars` visible control variables.
    fn for_body(&mut self, nvars: usize) -> Result<()> {
        self.expect(&Token::Do)?;
        self.enter_scope(0);
        self.add_locals(nvars);
        self.fs.reserve(nvars as u32)?;
        self.block()?;
        self.leave_scope()
    }

    /// `for i = start, stop [, step] do ... end`
    fn for_num(&mut self, var: StringId, line: u32) -> Result<()> {
        let base = self.fs.free_reg();
        self.new_hidden(0, b"(for index)", VarKind::Local)?;
        self.new_hidden(1, b"(for limit)", VarKind::Local)?;
        self.new_hidden(2, b"(for step)", VarKind::Local)?;
        self.new_local(3, var)?;
        self.expect(&Token::Assign)?;
        self.expr_next()?;
        self.expect(&Token::Comma)?;
        self.expr_next()?;
        if self.test_next(&Token::Comma)? {
            self.expr_next()?;
        } else {
            let reg = self.fs.free_reg();
            self.fs.emit_ad(Op::KShort, reg, 1)?;
            self.fs.reserve(1)?;
        }
        self.add_locals(3);
        let lp = self.fs.emit_pending(Instruction::aj(Op::ForI, base, 0))?;
        self.for_body(1)?;
        let lend = self.fs.emit_pending(Instruction::aj(Op::ForL, base, 0))?;
        self.fs.lines[lend] = line;
        self.fs.patch_ins(lend, lp + 1)?;
        let exit = self.fs.pc();
        self.fs.patch_ins(lp, exit)?;
        self.resolve_continue(lend)
    }

    /// `for a, b, ... in explist do ... end`
    fn for_iter(&mut self, first: StringId) -> Result<()> {
        let base = self.fs.free_reg() + 3;
        self.new_hidden(0, b"(for generator)", VarKind::Local)?;
        self.new_hidden(1, b"(for state)", VarKind::Local)?;
        self.new_hidden(2, b"(for control)", VarKind::Local)?;
        self.new_local(3, first)?;
        let mut nvars = 4;
        while self.test_next(&Token::Comma)? {
            let name = self.expect_name()?;
            self.new_local(nvars, name)?;
            nvars += 1;
        }
        self.expect(&Token::In)?;
        let line = self.line();
        let (nexps, mut e) = self.expr_list()?;
        self.assign_adjust(3, nexps, &mut e)?;
        // Room for the iterator call frame.
        self.fs.bump(3)?;
        self.add_locals(3);
        let lp = self.fs.emit_pending(Instruction::aj(Op::Jmp, base, 0))?;
        self.for_body(nvars - 3)?;
        let call = self.fs.pc();
        self.fs.patch_ins(lp, call)?;
        self.fs.emit_abc(Op::IterC, base, (nvars - 3 + 1) as u8, 3)?;
        let lend = self.fs.emit_pending(Instruction::aj(Op::IterL, base, 0))?;
        self.fs.lines[call] = line;
        self.fs.lines[lend] = line;
        self.fs.patch_ins(lend, lp + 1)?;
        self.resolve_continue(call)
    }

    // ---- Declarations ----

    fn local_stmt(&mut self) -> Result<()> {
        if self.test_next(&Token::Function)? {
            let name = self.expect_name()?;
            self.new_local(0, name)?;
            let reg = self.fs.reserve(1)?;
            // Visible inside its own body, for recursion.
            self.add_locals(1);
            let line = self.line();
            let mut b = self.body(line, false)?;
            self.fs.free(&b);
            self.fs.to_reg(&mut b, reg)?;
            // Debug info treats the function as live once stored.
            let var = self.fs.active[reg as usize];
            self.vars[var].start_pc = self.fs.pc();
            return Ok(());
        }
        let mut nvars = 0;
        loop {
            let name = self.expect_name()?;
            self.new_local(nvars, name)?;
            nvars += 1;
            if !self.test_next(&Token::Comma)? {
                break;
            }
        }
        let (nexps, mut e) = if self.test_next(&Token::Assign)? {
            self.expr_list()?
        } else {
            (0, ExprDesc::void())
        };
        self.assign_adjust(nvars, nexps, &mut e)?;
        self.add_locals(nvars);
        Ok(())
    }

    /// `function a.b.c:m(...) ... end`
    fn function_stmt(&mut self, line: u32) -> Result<()> {
        self.next()?;
        let name = self.expect_name()?;
        let mut v = self.lookup_var(name)?;
        while self.check(&Token::Dot) {
            self.field(&mut v)?;
        }
        let needself = self.check(&Token::Colon);
        if needself {
            self.field(&mut v)?;
        }
        let mut b = self.body(line, needself)?;
        self.fs.store(&v, &mut b)?;
        let last = self.fs.pc() - 1;
        self.fs.lines[last] = line;
        Ok(())
    }

    /// `defer [(params)] block end [(args)]`
    ///
    /// The handler lands in a hidden local; arguments are evaluated now into
    /// the hidden locals above it.
    fn defer_stmt(&mut self, line: u32) -> Result<()> {
        let reg = self.fs.free_reg();
        self.new_hidden(0, b"(defer)", VarKind::Defer)?;
        self.fs.reserve(1)?;
        self.add_locals(1);
        let mut func = self.defer_body(line)?;
        self.fs.to_reg(&mut func, reg)?;
        if self.check(&Token::LParen) {
            let args_line = self.line();
            self.next()?;
            let mut nargs = 0;
            if !self.check(&Token::RParen) {
                loop {
                    self.expr_next()?;
                    nargs += 1;
                    if !self.test_next(&Token::Comma)? {
                        break;
                    }
                }
            }
            self.expect_match(&Token::RParen, &Token::LParen, args_line)?;
            for i in 0..nargs {
                self.new_hidden(i, b"(defer arg)", VarKind::DeferArg)?;
            }
            self.add_locals(nargs);
        }
        self.fs.regs.free_reg = self.fs.nactvar();
        Ok(())
    }

    // ---- Assignment ----

    /// Adjust the value count of an expression list to `nvars` registers.
    pub(super) fn assign_adjust(&mut self, nvars: usize, nexps: usize, e: &mut ExprDesc) -> Result<()> {
        let mut extra = nvars as i32 - nexps as i32;
        if let Some(pc) = e.multi_pc() {
            extra = (extra + 1).max(0);
            self.fs.code[pc].set_b((extra + 1) as u8);
            if extra > 1 {
                self.fs.reserve(extra as u32 - 1)?;
            }
        } else {
            if e.kind != ExprKind::Void {
                self.fs.to_next_reg(e)?;
            }
            if extra > 0 {
                let reg = self.fs.reserve(extra as u32)?;
                self.fs.emit_nil(reg, extra as u8)?;
            }
        }
        if nexps > nvars {
            let surplus = (nexps - nvars) as u8;
            let top = self.fs.free_reg();
            self.fs.regs.release_span(top - surplus, surplus);
        }
        Ok(())
    }

    fn check_assignable(&self, v: &ExprDesc) -> Result<()> {
        if v.is_assignable() {
            Ok(())
        } else {
            Err(self.error(
                ErrorCode::InvalidAssignment,
                format!("cannot assign to this expression near {}", self.near()),
            ))
        }
    }

    /// Call statement, assignment or one of the update forms.
    fn expr_stmt(&mut self) -> Result<()> {
        let v = self.expr_primary()?;
        if let ExprKind::Call { pc, .. } = v.kind {
            // No results wanted.
            self.fs.code[pc].set_b(1);
            return Ok(());
        }
        if let Some(op) = BinOp::from_compound(self.tok()) {
            self.next()?;
            return self.compound_assign(v, op, false);
        }
        match self.tok() {
            Token::IfEmptyAssign => {
                self.next()?;
                self.if_empty_assign(v)
            }
            Token::PlusPlus => {
                self.next()?;
                self.compound_assign(v, BinOp::Add, true)
            }
            _ => self.assignment(v),
        }
    }

    /// A local target may be the table or key of an earlier indexed target.
    /// Those see the old value through a copy.
    fn assign_hazard(&mut self, targets: &mut [ExprDesc], reg: u8) -> Result<()> {
        let tmp = self.fs.free_reg();
        let mut hazard = false;
        for t in targets.iter_mut() {
            if let ExprKind::Indexed { base, key } = &mut t.kind {
                if *base == reg {
                    *base = tmp;
                    hazard = true;
                }
                if *key == IndexKey::Reg(reg) {
                    *key = IndexKey::Reg(tmp);
                    hazard = true;
                }
            }
        }
        if hazard {
            self.fs.emit_ad(Op::Mov, tmp, reg as u16)?;
            self.fs.reserve(1)?;
        }
        Ok(())
    }

    /// `a, b.c, d[e] = explist`
    fn assignment(&mut self, first: ExprDesc) -> Result<()> {
        self.check_assignable(&first)?;
        let mut targets = vec![first];
        while self.test_next(&Token::Comma)? {
            let v = self.expr_primary()?;
            self.check_assignable(&v)?;
            if let ExprKind::Local(reg) = v.kind {
                self.assign_hazard(&mut targets, reg)?;
            }
            targets.push(v);
        }
        self.expect(&Token::Assign)?;
        let (nexps, mut e) = self.expr_list()?;
        let nvars = targets.len();
        let rest = if nexps == nvars {
            match e.kind {
                ExprKind::Vararg(pc) => {
                    self.fs.regs.free_reg -= 1;
                    e.kind = ExprKind::Relocable(pc);
                }
                ExprKind::Call { base, .. } => e.kind = ExprKind::NonReloc(base),
                _ => {}
            }
            self.fs.store(&targets[nvars - 1], &mut e)?;
            &targets[..nvars - 1]
        } else {
            self.assign_adjust(nvars, nexps, &mut e)?;
            &targets[..]
        };
        for target in rest.iter().rev() {
            let mut value = ExprDesc::new(ExprKind::NonReloc(self.fs.free_reg() - 1));
            self.fs.store(target, &mut value)?;
        }
        Ok(())
    }

    /// The single right-hand value of an update statement.
    fn update_value(&mut self, increment: bool) -> Result<ExprDesc> {
        if increment {
            return Ok(ExprDesc::new(ExprKind::Num(1.0)));
        }
        let (n, e) = self.expr_list()?;
        if n != 1 {
            return Err(self.error(
                ErrorCode::InvalidAssignment,
                "compound assignment takes a single value",
            ));
        }
        Ok(e)
    }

    /// `target op= value` and `target++`.
    fn compound_assign(&mut self, target: ExprDesc, op: BinOp, increment: bool) -> Result<()> {
        self.check_assignable(&target)?;
        let mut lhs = self.fs.duplicate_table_operands(target)?;
        let mut rhs = if op == BinOp::Concat {
            self.fs.binop_left(op, &mut lhs)?;
            self.update_value(increment)?
        } else {
            // The old value is read before the right side runs.
            self.fs.to_next_reg(&mut lhs)?;
            let rhs = self.update_value(increment)?;
            self.fs.binop_left(op, &mut lhs)?;
            rhs
        };
        self.fs.binop(op, &mut lhs, &mut rhs)?;
        self.fs.store(&target, &mut lhs)
    }

    /// `target ??= value`: assigns only when the current value is empty.
    fn if_empty_assign(&mut self, target: ExprDesc) -> Result<()> {
        self.check_assignable(&target)?;
        let mut lhs = self.fs.duplicate_table_operands(target)?;
        let reg = self.fs.to_any_reg(&mut lhs)?;
        let empty = self.emit_empty_checks(reg)?;
        let skip = self.fs.emit_jump()?;
        self.fs.patch_to_here(empty);
        let mut rhs = self.update_value(false)?;
        self.fs.store(&target, &mut rhs)?;
        self.fs.patch_to_here(skip);
        Ok(())
    }

    // ---- Return ----

    fn return_stmt(&mut self) -> Result<()> {
        self.fs.has_return = true;
        let bare = self.tok().is_block_end() || self.check(&Token::Semi);
        // Deferred calls get registers below the results, so an open
        // result list survives them.
        let window = if self.has_pending_defers() && !bare {
            let need = self.defer_window(0);
            Some(self.fs.reserve(need)?)
        } else {
            None
        };
        let first = match window {
            Some(_) => self.fs.free_reg(),
            None => self.fs.nactvar(),
        };
        let ins = if bare {
            Instruction::ad(Op::Ret0, 0, 1)
        } else {
            let (nret, mut e) = self.expr_list()?;
            match e.kind {
                ExprKind::Call { pc, .. }
                    if nret == 1 && window.is_none() && !self.fs.has_open_upvals() =>
                {
                    let call = self.fs.code[pc];
                    self.fs.pop_instruction();
                    let op = if call.op() == Op::CallM {
                        Op::CallMT
                    } else {
                        Op::CallT
                    };
                    Instruction::ad(op, call.a(), call.c() as u16)
                }
                ExprKind::Call { pc, base } => {
                    self.fs.code[pc].set_b(0);
                    Instruction::ad(Op::RetM, first, (base - first) as u16)
                }
                ExprKind::Vararg(pc) => {
                    self.fs.code[pc].set_b(0);
                    let base = self.fs.code[pc].a();
                    Instruction::ad(Op::RetM, first, (base - first) as u16)
                }
                _ if nret == 1 => {
                    let reg = self.fs.to_any_reg(&mut e)?;
                    Instruction::ad(Op::Ret1, reg, 2)
                }
                _ => {
                    self.fs.to_next_reg(&mut e)?;
                    Instruction::ad(Op::Ret, first, nret as u16 + 1)
                }
            }
        };
        let ins = match window {
            Some(base) => {
                let ins = self.snapshot_return(ins)?;
                self.run_defers_at(0, base)?;
                ins
            }
            None => {
                // A bare return still runs the defers.
                self.run_defers(0)?;
                ins
            }
        };
        if self.fs.has_child {
            self.fs.emit(Instruction::aj(Op::UClo, 0, 0))?;
        }
        self.fs.emit(ins)?;
        Ok(())
    }

    /// A single returned local is copied before defers run, which may
    /// assign to it.
    fn snapshot_return(&mut self, mut ins: Instruction) -> Result<Instruction> {
        if ins.op() == Op::Ret1 && ins.a() < self.fs.nactvar() {
            let dst = self.fs.reserve(1)?;
            self.fs.emit_ad(Op::Mov, dst, ins.a() as u16)?;
            ins.set_a(dst);
        }
        Ok(ins)
    }
}
