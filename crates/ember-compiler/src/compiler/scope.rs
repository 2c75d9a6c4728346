/// Block scopes, local variables, upvalues, goto/label edges and deferred calls.
use super::expr::{ExprDesc, ExprKind};
use super::func_state::{FuncState, UpvalDesc};
use super::jumps::JumpList;
use super::regalloc::{RegisterGuard, RegisterSpan};
use super::Compiler;
use crate::error::{CompileError, ErrorCode, Result};
use crate::intern::StringId;
use crate::opcode::{Instruction, Op};
use crate::proto::UpvalBinding;
use crate::token::{Token, TokenStream};
use tracing::trace;

pub const SCOPE_LOOP: u8 = 0x01;
/// A `break` inside the scope is waiting for the loop exit.
pub const SCOPE_BREAK: u8 = 0x02;
/// A `continue` inside the scope is waiting for the loop test.
pub const SCOPE_CONTINUE: u8 = 0x04;
/// A local of the scope is captured by a closure.
pub const SCOPE_UPVAL: u8 = 0x08;
/// Leaving the scope emits no `UCLO` and runs no defers.
pub const SCOPE_NOCLOSE: u8 = 0x10;
/// The scope has pending gotos or labels.
pub const SCOPE_GOLA: u8 = 0x20;
/// Loop whose exit test runs inside the body scope (`repeat ... until`).
pub const SCOPE_REPEAT: u8 = 0x40;

/// One lexical block of the function being compiled.
#[derive(Clone, Copy, Debug)]
pub struct FuncScope {
    /// Active locals on entry.
    pub nactvar: u8,
    /// Edge stack height on entry.
    pub vstart: usize,
    pub flags: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarKind {
    Local,
    /// Closure registered by `defer`.
    Defer,
    /// Argument value captured for the preceding defer.
    DeferArg,
}

/// A declared local. Entries stay on the stack until their function is
/// finished so the live ranges can go into the debug info.
#[derive(Clone, Copy, Debug)]
pub struct VarInfo {
    pub name: StringId,
    pub start_pc: usize,
    pub end_pc: usize,
    pub slot: u8,
    pub kind: VarKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeName {
    Break,
    Continue,
    Label(StringId),
}

/// A pending jump (`goto`, `break`, `continue`) or a label.
#[derive(Clone, Copy, Debug)]
pub struct Edge {
    pub name: EdgeName,
    pub is_label: bool,
    /// Jump pc, or label position.
    pub pc: usize,
    /// Active locals at the edge.
    pub slot: u8,
    pub line: u32,
    pub live: bool,
}

impl FuncState {
    pub fn scope_mut(&mut self) -> Option<&mut FuncScope> {
        self.scopes.last_mut()
    }

    /// Mark the block owning `slot` as having a captured local.
    pub fn mark_upval(&mut self, slot: u8) {
        if let Some(bl) = self.scopes.iter_mut().rev().find(|bl| bl.nactvar <= slot) {
            bl.flags |= SCOPE_UPVAL;
        }
    }

    /// Any enclosing block with captured locals.
    pub fn has_open_upvals(&self) -> bool {
        self.scopes.iter().any(|bl| bl.flags & SCOPE_UPVAL != 0)
    }

    fn find_or_add_upvalue(
        &mut self,
        var: usize,
        name: StringId,
        binding: UpvalBinding,
    ) -> Result<u8> {
        if let Some(i) = self.upvalues.iter().position(|uv| uv.var == var) {
            return Ok(i as u8);
        }
        if self.upvalues.len() >= self.limits.max_upvalues as usize {
            return Err(self.error(ErrorCode::TooManyUpvalues, "too many upvalues"));
        }
        self.upvalues.push(UpvalDesc { binding, name, var });
        Ok((self.upvalues.len() - 1) as u8)
    }
}

/// Innermost active local named `name`. Locals named `_` are never found.
fn find_local(
    fs: &FuncState,
    vars: &[VarInfo],
    name: StringId,
    blank: Option<StringId>,
) -> Option<u8> {
    if Some(name) == blank {
        return None;
    }
    (0..fs.nactvar())
        .rev()
        .find(|&slot| vars[fs.active[slot as usize]].name == name)
}

impl<S: TokenStream> Compiler<'_, S> {
    // ---- Variables ----

    /// Stage the `n`-th local of a declaration; it becomes visible with `add_locals`.
    pub(super) fn new_local(&mut self, n: usize, name: StringId) -> Result<()> {
        let slot = self.fs.nactvar() as usize + n;
        if slot >= self.options.limits.max_locals as usize {
            return Err(self.error(ErrorCode::TooManyLocals, "too many local variables"));
        }
        let idx = self.vars.len();
        self.vars.push(VarInfo {
            name,
            start_pc: 0,
            end_pc: 0,
            slot: slot as u8,
            kind: VarKind::Local,
        });
        if self.fs.active.len() <= slot {
            self.fs.active.resize(slot + 1, 0);
        }
        self.fs.active[slot] = idx;
        Ok(())
    }

    /// Stage a compiler-internal local.
    pub(super) fn new_hidden(&mut self, n: usize, name: &[u8], kind: VarKind) -> Result<()> {
        let id = self.strings.intern(name);
        self.new_local(n, id)?;
        if let Some(v) = self.vars.last_mut() {
            v.kind = kind;
        }
        Ok(())
    }

    /// Activate the next `n` staged locals.
    pub(super) fn add_locals(&mut self, n: usize) {
        let pc = self.fs.pc();
        for _ in 0..n {
            let slot = self.fs.nactvar();
            let v = &mut self.vars[self.fs.active[slot as usize]];
            v.start_pc = pc;
            v.slot = slot;
            self.fs.regs.active_locals += 1;
        }
    }

    /// Deactivate locals down to `level`.
    pub(super) fn remove_locals(&mut self, level: u8) {
        let pc = self.fs.pc();
        while self.fs.nactvar() > level {
            self.fs.regs.active_locals -= 1;
            let slot = self.fs.nactvar() as usize;
            self.vars[self.fs.active[slot]].end_pc = pc;
        }
        self.fs.active.truncate(level as usize);
    }

    /// Resolve a name to a local, an upvalue or a global.
    pub(super) fn lookup_var(&mut self, name: StringId) -> Result<ExprDesc> {
        let blank = self.strings.find(b"_");
        if let Some(slot) = find_local(&self.fs, &self.vars, name, blank) {
            return Ok(ExprDesc::new(ExprKind::Local(slot)));
        }
        let depth = self.parents.len();
        for level in (0..depth).rev() {
            let Some(slot) = find_local(&self.parents[level], &self.vars, name, blank) else {
                continue;
            };
            let parent = &mut self.parents[level];
            parent.mark_upval(slot);
            let var = parent.active[slot as usize];
            let mut binding = UpvalBinding::ParentLocal(slot);
            for fs in &mut self.parents[level + 1..] {
                let idx = fs.find_or_add_upvalue(var, name, binding)?;
                binding = UpvalBinding::ParentUpvalue(idx);
            }
            let idx = self.fs.find_or_add_upvalue(var, name, binding)?;
            return Ok(ExprDesc::new(ExprKind::Upval(idx)));
        }
        Ok(ExprDesc::new(ExprKind::Global(name)))
    }

    // ---- Scopes ----

    pub(super) fn enter_scope(&mut self, flags: u8) {
        debug_assert_eq!(self.fs.free_reg(), self.fs.nactvar(), "temporaries live across a scope");
        trace!(depth = self.fs.scopes.len(), flags, "enter scope");
        self.fs.scopes.push(FuncScope {
            nactvar: self.fs.nactvar(),
            vstart: self.edges.len(),
            flags,
        });
    }

    pub(super) fn leave_scope(&mut self) -> Result<()> {
        let Some(bl) = self.fs.scopes.last().copied() else {
            return Ok(());
        };
        trace!(depth = self.fs.scopes.len() - 1, flags = bl.flags, "leave scope");
        if bl.flags & SCOPE_NOCLOSE == 0 {
            self.run_defers(bl.nactvar)?;
        }
        self.fs.scopes.pop();
        self.remove_locals(bl.nactvar);
        self.fs.regs.free_reg = bl.nactvar;
        if bl.flags & (SCOPE_UPVAL | SCOPE_NOCLOSE) == SCOPE_UPVAL {
            self.fs.emit(Instruction::aj(Op::UClo, bl.nactvar, 0))?;
        }
        if bl.flags & SCOPE_BREAK != 0 {
            if bl.flags & SCOPE_LOOP != 0 {
                let exit = Edge {
                    name: EdgeName::Break,
                    is_label: true,
                    pc: self.fs.pc(),
                    slot: self.fs.nactvar(),
                    line: self.fs.line,
                    live: true,
                };
                self.resolve_edges(&bl, &exit)?;
            } else {
                return self.fixup_edges(&bl);
            }
        }
        if bl.flags & (SCOPE_GOLA | SCOPE_CONTINUE) != 0 {
            self.fixup_edges(&bl)?;
        }
        Ok(())
    }

    /// Resolve pending `continue` jumps of the innermost loop to `pos`.
    pub(super) fn resolve_continue(&mut self, pos: usize) -> Result<()> {
        let Some(bl) = self.fs.scopes.last_mut() else {
            return Ok(());
        };
        if bl.flags & SCOPE_CONTINUE == 0 {
            return Ok(());
        }
        bl.flags &= !SCOPE_CONTINUE;
        let bl = *bl;
        let target = Edge {
            name: EdgeName::Continue,
            is_label: true,
            pc: pos,
            slot: self.fs.nactvar(),
            line: self.fs.line,
            live: true,
        };
        self.resolve_edges(&bl, &target)
    }

    // ---- Edges ----

    fn push_edge(&mut self, name: EdgeName, is_label: bool, pc: usize, line: u32) -> usize {
        self.edges.push(Edge {
            name,
            is_label,
            pc,
            slot: self.fs.nactvar(),
            line,
            live: true,
        });
        self.edges.len() - 1
    }

    /// Point the jump of edge `idx` at the label `target`.
    fn patch_edge(&mut self, idx: usize, target: &Edge) -> Result<()> {
        let pc = self.edges[idx].pc;
        self.edges[idx].live = false;
        self.fs.code[pc].set_a(target.slot);
        self.fs.patch_to(JumpList::at(pc), target.pc)
    }

    /// Turn the jump of edge `idx` into a `UCLO` that also jumps.
    fn close_edge(&mut self, idx: usize) -> Result<()> {
        let edge = self.edges[idx];
        let pc = edge.pc;
        self.fs.code[pc].set_a(edge.slot);
        if self.fs.code[pc].op() == Op::Jmp {
            if let super::jumps::Link::Pending(next) = self.fs.links[pc] {
                self.fs.links[pc] = super::jumps::Link::Pending(JumpList::EMPTY);
                if !next.is_empty() {
                    self.fs.patch_to(next, pc)?;
                }
            }
            self.fs.code[pc].set_op(Op::UClo);
        }
        Ok(())
    }

    /// Resolve the pending jumps of block `bl` that match `target`.
    fn resolve_edges(&mut self, bl: &FuncScope, target: &Edge) -> Result<()> {
        for i in bl.vstart..self.edges.len() {
            let e = self.edges[i];
            if !e.live || e.is_label || e.name != target.name {
                continue;
            }
            if e.slot < target.slot {
                return Err(self.goto_into_scope(&e));
            }
            self.patch_edge(i, target)?;
        }
        Ok(())
    }

    fn goto_into_scope(&self, e: &Edge) -> CompileError {
        let local = self.vars[self.fs.active[e.slot as usize]].name;
        let label = match e.name {
            EdgeName::Label(name) => self.strings.display(name),
            EdgeName::Break => "break".to_string(),
            EdgeName::Continue => "continue".to_string(),
        };
        CompileError::new(
            ErrorCode::GotoIntoScope,
            e.line,
            format!(
                "<goto {label}> jumps into the scope of local '{}'",
                self.strings.display(local)
            ),
        )
    }

    /// Close out the edges of a block being left: labels die, and pending
    /// jumps move to the parent block or become errors at function level.
    fn fixup_edges(&mut self, bl: &FuncScope) -> Result<()> {
        for i in bl.vstart..self.edges.len() {
            let e = self.edges[i];
            if !e.live {
                continue;
            }
            if e.is_label {
                self.edges[i].live = false;
                // Backward gotos to this label.
                for j in i + 1..self.edges.len() {
                    let g = self.edges[j];
                    if g.live && !g.is_label && g.name == e.name {
                        if bl.flags & SCOPE_UPVAL != 0 && g.slot > e.slot {
                            self.close_edge(j)?;
                        }
                        self.patch_edge(j, &e)?;
                    }
                }
            } else if let Some(parent) = self.fs.scopes.last_mut() {
                parent.flags |= match e.name {
                    EdgeName::Break => SCOPE_BREAK,
                    EdgeName::Continue => SCOPE_CONTINUE,
                    EdgeName::Label(_) => SCOPE_GOLA,
                };
                self.edges[i].slot = bl.nactvar;
                if bl.flags & SCOPE_UPVAL != 0 {
                    self.close_edge(i)?;
                }
            } else {
                let (code, msg) = match e.name {
                    EdgeName::Break => (ErrorCode::BreakOutsideLoop, "no loop to break".to_string()),
                    EdgeName::Continue => {
                        (ErrorCode::ContinueOutsideLoop, "no loop to continue".to_string())
                    }
                    EdgeName::Label(name) => (
                        ErrorCode::UndefinedLabel,
                        format!("undefined label '{}'", self.strings.display(name)),
                    ),
                };
                return Err(CompileError::new(code, e.line, msg));
            }
        }
        Ok(())
    }

    /// Find a live label of the current block.
    fn find_label(&self, name: StringId) -> Option<usize> {
        let vstart = self.fs.scopes.last().map_or(self.fs.edge_base, |bl| bl.vstart);
        (vstart..self.edges.len()).find(|&i| {
            let e = &self.edges[i];
            e.live && e.is_label && e.name == EdgeName::Label(name)
        })
    }

    // ---- Statements that create edges ----

    /// `goto name`
    pub(super) fn goto_stmt(&mut self, line: u32) -> Result<()> {
        let name = self.expect_name()?;
        if let Some(bl) = self.fs.scope_mut() {
            bl.flags |= SCOPE_GOLA;
        }
        let j = self.fs.emit_jump()?;
        if let Some(pc) = j.head() {
            self.push_edge(EdgeName::Label(name), false, pc, line);
        }
        Ok(())
    }

    /// `::name::`, with the leading `::` already consumed.
    pub(super) fn label_stmt(&mut self, line: u32) -> Result<()> {
        let name = self.expect_name()?;
        if let Some(prev) = self.find_label(name) {
            let msg = format!(
                "duplicate label '{}' (previous at line {})",
                self.strings.display(name),
                self.edges[prev].line
            );
            return Err(CompileError::new(ErrorCode::DuplicateLabel, line, msg));
        }
        let pc = self.fs.pc();
        self.fs.last_target = pc;
        if let Some(bl) = self.fs.scope_mut() {
            bl.flags |= SCOPE_GOLA;
        }
        let idx = self.push_edge(EdgeName::Label(name), true, pc, line);
        self.expect(&Token::DoubleColon)?;
        // Labels and empty statements may follow without opening a new position.
        loop {
            match self.tok() {
                Token::DoubleColon => {
                    let line = self.line();
                    self.next()?;
                    self.nested(|c| c.label_stmt(line))?;
                }
                Token::Semi => {
                    self.next()?;
                }
                _ => break,
            }
        }
        let Some(bl) = self.fs.scopes.last().copied() else {
            return Ok(());
        };
        // A label at the end of a block is outside the scope of its locals.
        if self.tok().is_block_end() && *self.tok() != Token::Until {
            self.edges[idx].slot = bl.nactvar;
        }
        let target = self.edges[idx];
        self.resolve_edges(&bl, &target)
    }

    /// Level down to which a `break` or `continue` runs defers, or None
    /// outside loops.
    fn loop_level(&self, name: EdgeName) -> Option<u8> {
        let scopes = &self.fs.scopes;
        let idx = scopes.iter().rposition(|bl| bl.flags & SCOPE_LOOP != 0)?;
        if name == EdgeName::Continue && scopes[idx].flags & SCOPE_REPEAT != 0 {
            // The `until` test still sees the body, whose defers run after it.
            return Some(scopes.get(idx + 2).map_or(self.fs.nactvar(), |bl| bl.nactvar));
        }
        Some(scopes[idx].nactvar)
    }

    /// `break` and `continue`.
    pub(super) fn loop_exit_stmt(&mut self, name: EdgeName, line: u32) -> Result<()> {
        let Some(level) = self.loop_level(name) else {
            let (code, what) = match name {
                EdgeName::Continue => (ErrorCode::ContinueOutsideLoop, "continue"),
                _ => (ErrorCode::BreakOutsideLoop, "break"),
            };
            return Err(CompileError::new(code, line, format!("no loop to {what}")));
        };
        self.run_defers(level)?;
        if let Some(bl) = self.fs.scope_mut() {
            bl.flags |= if name == EdgeName::Continue {
                SCOPE_CONTINUE
            } else {
                SCOPE_BREAK
            };
        }
        let j = self.fs.emit_jump()?;
        if let Some(pc) = j.head() {
            self.push_edge(name, false, pc, line);
        }
        Ok(())
    }

    // ---- Deferred calls ----

    /// True when some active local of the function is a defer.
    pub(super) fn has_pending_defers(&self) -> bool {
        self.defers_above(0)
    }

    /// True when a defer is registered in a slot at or above `level`.
    pub(super) fn defers_above(&self, level: u8) -> bool {
        self.fs.active[level as usize..self.fs.nactvar() as usize]
            .iter()
            .any(|&v| self.vars[v].kind == VarKind::Defer)
    }

    /// Call the defers registered above `level`, most recent first.
    pub(super) fn run_defers(&mut self, level: u8) -> Result<()> {
        let need = self.defer_window(level);
        if need == 0 {
            return Ok(());
        }
        let vars = &self.vars;
        let mut fs = RegisterGuard::new(&mut self.fs);
        let below = fs.nactvar().saturating_sub(fs.free_reg());
        if below > 0 {
            fs.reserve(below as u32)?;
        }
        let mut window = RegisterSpan::reserve(&mut *fs, need as u8)?;
        let base = window.start();
        emit_deferred_calls(&mut window, vars, level, base)?;
        Ok(())
    }

    /// Like `run_defers`, into a window of `defer_window(level)` registers
    /// at `base` the caller has already reserved.
    pub(super) fn run_defers_at(&mut self, level: u8, base: u8) -> Result<()> {
        emit_deferred_calls(&mut self.fs, &self.vars, level, base)
    }

    /// Registers needed to call the defers above `level`. Calls run one at a
    /// time, so the largest call decides.
    pub(super) fn defer_window(&self, level: u8) -> u32 {
        let mut need = 0;
        let mut args = 0;
        for &v in self.fs.active[level as usize..self.fs.nactvar() as usize].iter().rev() {
            match self.vars[v].kind {
                VarKind::DeferArg => args += 1,
                VarKind::Defer => {
                    need = need.max(args + 1);
                    args = 0;
                }
                VarKind::Local => {}
            }
        }
        need
    }
}

/// Each call is placed at `base`, clobbering the registers up to its last
/// argument.
fn emit_deferred_calls(fs: &mut FuncState, vars: &[VarInfo], level: u8, base: u8) -> Result<()> {
    let mut args: Vec<u8> = Vec::new();
    let mut slot = fs.nactvar();
    while slot > level {
        slot -= 1;
        let v = vars[fs.active[slot as usize]];
        match v.kind {
            VarKind::DeferArg => args.push(v.slot),
            VarKind::Defer => {
                let argc = args.len() as u32;
                fs.emit_ad(Op::Mov, base, v.slot as u16)?;
                for (j, &src) in args.iter().rev().enumerate() {
                    fs.emit_ad(Op::Mov, base + 1 + j as u8, src as u16)?;
                }
                fs.emit_abc(Op::Call, base, 1, argc as u8 + 1)?;
                args.clear();
            }
            VarKind::Local => debug_assert!(args.is_empty(), "dangling defer arguments"),
        }
    }
    Ok(())
}
