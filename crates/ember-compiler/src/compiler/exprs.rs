/// Expression parsing: primaries, suffixes, calls, table constructors,
/// function bodies and the precedence climber.
use super::expr::{BinOp, ExprDesc, ExprKind, UnOp, TERNARY_PRIORITY, UNARY_PRIORITY};
use super::jumps::JumpList;
use super::Compiler;
use crate::error::{ErrorCode, Result};
use crate::intern::StringId;
use crate::opcode::{Instruction, Op};
use crate::token::{Token, TokenStream};

/// Hash part size hint of `TNEW` for `n` keyed fields.
fn hash_bits(n: u32) -> u32 {
    match n {
        0 => 0,
        1 => 1,
        n => 32 - (n - 1).leading_zeros(),
    }
}

impl<S: TokenStream> Compiler<'_, S> {
    pub(super) fn expr(&mut self) -> Result<ExprDesc> {
        self.expr_binop(0)
    }

    /// Parse operators binding tighter than `limit`.
    pub(super) fn expr_binop(&mut self, limit: u8) -> Result<ExprDesc> {
        self.nested(|c| c.binop_chain(limit))
    }

    fn binop_chain(&mut self, limit: u8) -> Result<ExprDesc> {
        let mut v = self.expr_unop()?;
        loop {
            if self.check(&Token::Question) {
                if TERNARY_PRIORITY <= limit {
                    break;
                }
                self.next()?;
                self.ternary(&mut v)?;
                continue;
            }
            let Some(op) = BinOp::from_token(self.tok()) else {
                break;
            };
            let (left, right) = op.priority();
            // A bitwise operator does not chain into the right operand of
            // one with the same binding power.
            if left <= limit || (limit == right && op.is_bitwise()) {
                break;
            }
            self.next()?;
            if op == BinOp::IfEmpty {
                let pending = self.if_empty_left(&mut v)?;
                let mut rhs = self.expr_binop(right)?;
                self.if_empty_right(&mut v, &mut rhs, pending)?;
            } else if op.is_bitwise() {
                self.fs.binop_left(op, &mut v)?;
                let rhs = self.expr_binop(right)?;
                v = self.bit_call(op.bit_function(), &mut [v, rhs])?;
            } else {
                self.fs.binop_left(op, &mut v)?;
                let mut rhs = self.expr_binop(right)?;
                self.fs.binop(op, &mut v, &mut rhs)?;
            }
        }
        Ok(v)
    }

    fn expr_unop(&mut self) -> Result<ExprDesc> {
        let Some(op) = UnOp::from_token(self.tok()) else {
            let mut v = self.expr_simple()?;
            while self.check(&Token::IfEmpty) && self.postfix_presence()? {
                self.next()?;
                self.presence_check(&mut v)?;
            }
            return Ok(v);
        };
        self.next()?;
        let mut v = self.expr_binop(UNARY_PRIORITY)?;
        if op == UnOp::BNot {
            return self.bit_call(b"bnot", &mut [v]);
        }
        self.fs.emit_unop(op, &mut v)?;
        Ok(v)
    }

    /// `??` with no operand after it is the postfix presence check.
    fn postfix_presence(&mut self) -> Result<bool> {
        Ok(!self.ls.peek(1, self.strings)?.token.starts_operand())
    }

    fn expr_simple(&mut self) -> Result<ExprDesc> {
        let kind = match *self.tok() {
            Token::Number(n) => ExprKind::Num(n),
            Token::String(s) => ExprKind::Str(s),
            Token::Nil => ExprKind::Nil,
            Token::True => ExprKind::True,
            Token::False => ExprKind::False,
            Token::DotDotDot => {
                if !self.fs.is_vararg {
                    return Err(self.error(
                        ErrorCode::VarargOutsideVararg,
                        "cannot use '...' outside a vararg function near '...'",
                    ));
                }
                let base = self.fs.reserve(1)?;
                let nparams = self.fs.num_params;
                ExprKind::Vararg(self.fs.emit_abc(Op::VArg, base, 2, nparams)?)
            }
            Token::LBrace => return self.table(),
            Token::Function => {
                self.next()?;
                let line = self.line();
                return self.body(line, false);
            }
            _ => return self.expr_primary(),
        };
        self.next()?;
        Ok(ExprDesc::new(kind))
    }

    /// Name or parenthesized expression followed by field, index, method
    /// and call suffixes.
    pub(super) fn expr_primary(&mut self) -> Result<ExprDesc> {
        self.nested(|c| c.primary_suffixed())
    }

    fn primary_suffixed(&mut self) -> Result<ExprDesc> {
        let mut v = match *self.tok() {
            Token::LParen => {
                let line = self.line();
                self.next()?;
                let mut v = self.expr()?;
                self.expect_match(&Token::RParen, &Token::LParen, line)?;
                // Parentheses truncate calls and varargs to one value.
                self.fs.discharge(&mut v)?;
                v
            }
            Token::Name(name) => {
                self.next()?;
                self.lookup_var(name)?
            }
            _ => return Err(self.unexpected()),
        };
        loop {
            match *self.tok() {
                Token::Dot => self.field(&mut v)?,
                Token::LBracket => {
                    self.fs.to_any_reg(&mut v)?;
                    let mut key = self.bracket()?;
                    self.fs.index(&mut v, &mut key)?;
                }
                Token::Colon => {
                    self.next()?;
                    let name = self.expect_name()?;
                    self.fs.emit_method(&mut v, name)?;
                    self.call_args(&mut v)?;
                }
                Token::LParen | Token::String(_) | Token::LBrace => {
                    self.fs.to_next_reg(&mut v)?;
                    self.call_args(&mut v)?;
                }
                _ => return Ok(v),
            }
        }
    }

    /// `.name` or `:name` as an index of `v`.
    pub(super) fn field(&mut self, v: &mut ExprDesc) -> Result<()> {
        self.fs.to_any_reg(v)?;
        self.next()?;
        let name = self.expect_name()?;
        let mut key = ExprDesc::new(ExprKind::Str(name));
        self.fs.index(v, &mut key)
    }

    /// `[expr]`
    fn bracket(&mut self) -> Result<ExprDesc> {
        self.next()?;
        let mut key = self.expr()?;
        self.fs.to_val(&mut key)?;
        self.expect(&Token::RBracket)?;
        Ok(key)
    }

    /// First register of an open multi-value expression.
    fn multi_base(&self, e: &ExprDesc) -> Option<u8> {
        match e.kind {
            ExprKind::Call { base, .. } => Some(base),
            ExprKind::Vararg(pc) => Some(self.fs.code[pc].a()),
            _ => None,
        }
    }

    /// Parse call arguments and emit the call of the function in `e`.
    fn call_args(&mut self, e: &mut ExprDesc) -> Result<()> {
        self.nested(|c| c.call(e))
    }

    fn call(&mut self, e: &mut ExprDesc) -> Result<()> {
        let line = self.line();
        let mut args = match *self.tok() {
            Token::LParen => {
                if line != self.last_line {
                    return Err(self.error(
                        ErrorCode::AmbiguousSyntax,
                        "ambiguous syntax (function call x new statement) near '('",
                    ));
                }
                self.next()?;
                let args = if self.check(&Token::RParen) {
                    ExprDesc::void()
                } else {
                    let (_, last) = self.expr_list()?;
                    if let Some(pc) = last.multi_pc() {
                        // Forward all results.
                        self.fs.code[pc].set_b(0);
                    }
                    last
                };
                self.expect_match(&Token::RParen, &Token::LParen, line)?;
                args
            }
            Token::LBrace => self.table()?,
            Token::String(s) => {
                self.next()?;
                ExprDesc::new(ExprKind::Str(s))
            }
            _ => {
                return Err(self.error(
                    ErrorCode::ExpectedToken,
                    format!("function arguments expected near {}", self.near()),
                ))
            }
        };
        let ExprKind::NonReloc(base) = e.kind else {
            debug_assert!(false, "callee not in a register: {:?}", e.kind);
            return Ok(());
        };
        let inst = match self.multi_base(&args) {
            Some(last) => Instruction::abc(Op::CallM, base, 2, last - base - 1),
            None => {
                if args.kind != ExprKind::Void {
                    self.fs.to_next_reg(&mut args)?;
                }
                Instruction::abc(Op::Call, base, 2, self.fs.free_reg() - base)
            }
        };
        let pc = self.fs.emit(inst)?;
        self.fs.lines[pc] = line;
        // One result unless the caller widens it.
        let top = self.fs.free_reg();
        self.fs.regs.release_span(base + 1, top - base - 1);
        e.kind = ExprKind::Call { pc, base };
        Ok(())
    }

    /// Comma-separated expressions. All but the last are put in consecutive
    /// registers; the last is returned undischarged.
    pub(super) fn expr_list(&mut self) -> Result<(usize, ExprDesc)> {
        let mut v = self.expr()?;
        let mut n = 1;
        while self.test_next(&Token::Comma)? {
            self.fs.to_next_reg(&mut v)?;
            v = self.expr()?;
            n += 1;
        }
        Ok((n, v))
    }

    /// Condition of `if`/`while`/`until`; falls through when true and
    /// returns the jumps taken when false.
    pub(super) fn expr_cond(&mut self) -> Result<JumpList> {
        let mut v = self.expr()?;
        if v.kind == ExprKind::Nil {
            v.kind = ExprKind::False;
        }
        self.fs.branch_true(&mut v)?;
        Ok(v.f)
    }

    /// `{ ... }`
    fn table(&mut self) -> Result<ExprDesc> {
        self.nested(|c| c.table_constructor())
    }

    fn table_constructor(&mut self) -> Result<ExprDesc> {
        let line = self.line();
        let treg = self.fs.free_reg();
        let tnew = self.fs.emit_ad(Op::TNew, treg, 0)?;
        self.fs.reserve(1)?;
        let freg = treg + 1;
        self.expect(&Token::LBrace)?;
        let mut narr: u32 = 1;
        let mut nhash: u32 = 0;
        let mut needarr = false;
        let mut vcall = false;
        while !self.check(&Token::RBrace) {
            vcall = false;
            let mut t = ExprDesc::new(ExprKind::NonReloc(treg));
            let name_key = match *self.tok() {
                Token::Name(name) => {
                    (self.ls.peek(1, self.strings)?.token == Token::Assign).then_some(name)
                }
                _ => None,
            };
            let mut key = if let Some(name) = name_key {
                self.next()?;
                self.next()?;
                nhash += 1;
                ExprDesc::new(ExprKind::Str(name))
            } else if self.check(&Token::LBracket) {
                let mut key = self.bracket()?;
                if !key.is_const() {
                    self.fs.index(&mut t, &mut key)?;
                }
                if key.number() == Some(0.0) {
                    needarr = true;
                } else {
                    nhash += 1;
                }
                self.expect(&Token::Assign)?;
                key
            } else {
                let key = ExprDesc::new(ExprKind::Num(narr as f64));
                narr += 1;
                needarr = true;
                vcall = true;
                key
            };
            let mut val = self.expr()?;
            if !val.is_multi() {
                self.fs.to_any_reg(&mut val)?;
                vcall = false;
            }
            if key.is_const() {
                self.fs.index(&mut t, &mut key)?;
            }
            self.fs.store(&t, &mut val)?;
            let top = self.fs.free_reg();
            self.fs.regs.release_span(freg, top - freg);
            if !self.test_next(&Token::Comma)? && !self.test_next(&Token::Semi)? {
                break;
            }
        }
        self.expect_match(&Token::RBrace, &Token::LBrace, line)?;
        if vcall {
            // The trailing call or vararg fills the array part from index narr-1.
            let mut at = self.fs.pc() - 1;
            if narr > 256 {
                self.fs.pop_instruction();
                at -= 1;
            }
            debug_assert_eq!(self.fs.code[at - 1].a(), freg, "open value not above the table");
            let k = self.fs.const_num((narr - 1) as f64)?;
            self.fs.code[at] = Instruction::ad(Op::TSetM, freg, k);
            self.fs.code[at - 1].set_b(0);
        }
        let e = if tnew == self.fs.pc() - 1 {
            self.fs.release(treg);
            ExprDesc::new(ExprKind::Relocable(tnew))
        } else {
            ExprDesc::new(ExprKind::NonReloc(treg))
        };
        let narr = if needarr { narr.clamp(3, 0x7ff) } else { 0 };
        self.fs.code[tnew].set_d((narr | hash_bits(nhash) << 11) as u16);
        Ok(e)
    }

    /// Parameter list of a function, including the parentheses.
    fn params(&mut self, needself: bool) -> Result<()> {
        self.expect(&Token::LParen)?;
        let mut names: Vec<StringId> = Vec::new();
        if needself {
            let id = self.strings.intern(b"self");
            self.new_local(0, id)?;
            names.push(id);
        }
        let blank = self.strings.find(b"_");
        if !self.check(&Token::RParen) {
            loop {
                match *self.tok() {
                    Token::Name(name) => {
                        if names.contains(&name) && Some(name) != blank {
                            return Err(self.error(
                                ErrorCode::DuplicateParameter,
                                format!("duplicate parameter '{}'", self.strings.display(name)),
                            ));
                        }
                        self.next()?;
                        self.new_local(names.len(), name)?;
                        names.push(name);
                    }
                    Token::DotDotDot => {
                        self.next()?;
                        self.fs.is_vararg = true;
                        break;
                    }
                    _ => {
                        return Err(self.error(
                            ErrorCode::ExpectedToken,
                            format!("<name> expected near {}", self.near()),
                        ))
                    }
                }
                if !self.test_next(&Token::Comma)? {
                    break;
                }
            }
        }
        let n = names.len();
        self.add_locals(n);
        self.fs.num_params = n as u8;
        self.fs.reserve(n as u32)?;
        self.expect(&Token::RParen)
    }

    /// `(params) block end` of a function expression or statement.
    pub(super) fn body(&mut self, line: u32, needself: bool) -> Result<ExprDesc> {
        self.nested(|c| c.function_body(line, needself, false))
    }

    /// `[(params)] block end` of a defer handler.
    pub(super) fn defer_body(&mut self, line: u32) -> Result<ExprDesc> {
        self.nested(|c| c.function_body(line, false, true))
    }

    fn function_body(&mut self, line: u32, needself: bool, deferred: bool) -> Result<ExprDesc> {
        self.open_func(line);
        if !deferred || self.check(&Token::LParen) {
            self.params(needself)?;
        }
        self.block_body()?;
        let end_line = self.line();
        if !self.check(&Token::End) {
            let opener = if deferred { Token::Defer } else { Token::Function };
            self.expect_match(&Token::End, &opener, line)?;
        }
        let proto = self.finish_function(end_line)?;
        let idx = self.fs.add_proto(proto)?;
        self.fs.line = end_line;
        let pc = self.fs.emit_ad(Op::FNew, 0, idx)?;
        if !self.fs.has_child {
            if self.fs.has_return {
                self.fs.fixup_return = true;
            }
            self.fs.has_child = true;
        }
        self.next()?;
        Ok(ExprDesc::new(ExprKind::Relocable(pc)))
    }
}
