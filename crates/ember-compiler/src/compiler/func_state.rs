/// Per-function compilation state.
use super::expr::{ExprDesc, ExprKind};
use super::jumps::{JumpList, Link};
use super::regalloc::{HasRegisters, RegisterFrame};
use super::scope::FuncScope;
use crate::config::Limits;
use crate::error::{CompileError, ErrorCode, Result};
use crate::intern::StringId;
use crate::opcode::{Instruction, Op};
use crate::proto::{Prototype, UpvalBinding};
use indexmap::IndexSet;
use rustc_hash::FxBuildHasher;

/// An upvalue of the function being compiled.
#[derive(Clone, Copy, Debug)]
pub struct UpvalDesc {
    pub binding: UpvalBinding,
    pub name: StringId,
    /// Index of the captured variable in the compiler's variable stack.
    pub var: usize,
}

/// State for a single function being compiled.
pub struct FuncState {
    pub code: Vec<Instruction>,
    /// Source line of each instruction.
    pub lines: Vec<u32>,
    /// Jump list links, parallel to `code`.
    pub links: Vec<Link>,
    pub regs: RegisterFrame,
    /// Number constants keyed by bit pattern.
    pub numbers: IndexSet<u64, FxBuildHasher>,
    pub strings: IndexSet<StringId, FxBuildHasher>,
    pub protos: Vec<Prototype>,
    pub upvalues: Vec<UpvalDesc>,
    pub scopes: Vec<FuncScope>,
    /// Variable stack index of each active local, by register.
    pub active: Vec<usize>,
    /// First entry of this function in the variable stack.
    pub var_base: usize,
    /// First entry of this function in the edge stack.
    pub edge_base: usize,
    /// Pc of the last jump target.
    pub last_target: usize,
    /// Jumps waiting for the next emitted instruction.
    pub jpc: JumpList,
    pub num_params: u8,
    pub is_vararg: bool,
    pub has_child: bool,
    pub has_return: bool,
    /// Returns emitted before the first closure must be routed through `UCLO`.
    pub fixup_return: bool,
    pub first_line: u32,
    /// Line attached to emitted instructions.
    pub line: u32,
    pub limits: Limits,
}

impl FuncState {
    pub fn new(limits: Limits, first_line: u32, var_base: usize, edge_base: usize) -> Self {
        FuncState {
            code: Vec::new(),
            lines: Vec::new(),
            links: Vec::new(),
            regs: RegisterFrame::new(limits.max_slots),
            numbers: IndexSet::default(),
            strings: IndexSet::default(),
            protos: Vec::new(),
            upvalues: Vec::new(),
            scopes: Vec::new(),
            active: Vec::new(),
            var_base,
            edge_base,
            last_target: 0,
            jpc: JumpList::EMPTY,
            num_params: 0,
            is_vararg: false,
            has_child: false,
            has_return: false,
            fixup_return: false,
            first_line,
            line: first_line,
            limits,
        }
    }

    pub fn pc(&self) -> usize {
        self.code.len()
    }

    /// Number of active locals.
    pub fn nactvar(&self) -> u8 {
        self.regs.active_locals
    }

    pub fn free_reg(&self) -> u8 {
        self.regs.free_reg
    }

    pub fn error(&self, code: ErrorCode, message: impl Into<String>) -> CompileError {
        CompileError::new(code, self.line, message)
    }

    // ---- Emission ----

    fn push(&mut self, inst: Instruction, link: Link) -> Result<usize> {
        let jpc = std::mem::replace(&mut self.jpc, JumpList::EMPTY);
        let pc = self.pc();
        self.patch_with_value(jpc, pc, crate::opcode::NO_REG, pc)?;
        self.code.push(inst);
        self.lines.push(self.line);
        self.links.push(link);
        Ok(pc)
    }

    /// Emit an instruction, resolving jumps that target it.
    pub fn emit(&mut self, inst: Instruction) -> Result<usize> {
        self.push(inst, Link::Resolved)
    }

    /// Emit a jump-mode instruction whose target is filled in later.
    pub fn emit_pending(&mut self, inst: Instruction) -> Result<usize> {
        self.push(inst, Link::Pending(JumpList::EMPTY))
    }

    pub fn emit_abc(&mut self, op: Op, a: u8, b: u8, c: u8) -> Result<usize> {
        self.emit(Instruction::abc(op, a, b, c))
    }

    pub fn emit_ad(&mut self, op: Op, a: u8, d: u16) -> Result<usize> {
        self.emit(Instruction::ad(op, a, d))
    }

    /// Drop the instructions from `pc` on. Only valid when no jump before
    /// `pc` targets them or waits in `jpc`.
    pub fn truncate(&mut self, pc: usize) {
        if self.code.len() > pc {
            self.code.truncate(pc);
            self.lines.truncate(pc);
            self.links.truncate(pc);
            self.jpc = JumpList::EMPTY;
            self.last_target = self.last_target.min(pc);
        }
    }

    /// Drop the last instruction. Only valid when nothing targets it.
    pub fn pop_instruction(&mut self) -> Option<Instruction> {
        self.lines.pop();
        self.links.pop();
        self.code.pop()
    }

    // ---- Constants ----

    pub fn const_num(&mut self, n: f64) -> Result<u16> {
        let (idx, _) = self.numbers.insert_full(n.to_bits());
        self.check_const(idx)
    }

    pub fn const_str(&mut self, s: StringId) -> Result<u16> {
        let (idx, _) = self.strings.insert_full(s);
        self.check_const(idx)
    }

    fn check_const(&self, idx: usize) -> Result<u16> {
        if idx >= self.limits.max_constants as usize || idx > u16::MAX as usize {
            return Err(self.error(ErrorCode::TooManyConstants, "too many constants"));
        }
        Ok(idx as u16)
    }

    /// Add a finished child prototype and return its index.
    pub fn add_proto(&mut self, proto: Prototype) -> Result<u16> {
        let idx = self.protos.len();
        self.check_const(idx)?;
        self.protos.push(proto);
        Ok(idx as u16)
    }

    // ---- Registers ----

    pub fn reserve(&mut self, n: u32) -> Result<u8> {
        let line = self.line;
        self.regs.reserve(n).map_err(|e| e.at_line(line))
    }

    pub fn bump(&mut self, n: u32) -> Result<()> {
        let line = self.line;
        self.regs.bump(n).map_err(|e| e.at_line(line))
    }

    pub fn release(&mut self, reg: u8) {
        self.regs.release(reg);
    }

    /// Release the register held by a `NonReloc` temporary.
    pub fn free(&mut self, e: &ExprDesc) {
        if let ExprKind::NonReloc(reg) = e.kind {
            self.regs.release(reg);
        }
    }

    /// Drop an operand register without the LIFO check, as binary
    /// operators do once both operands are encoded.
    pub(crate) fn drop_operand(&mut self, e: &ExprDesc) {
        if let ExprKind::NonReloc(reg) = e.kind {
            if reg >= self.regs.active_locals {
                self.regs.free_reg -= 1;
            }
        }
    }

    /// Reset the temporaries to the active locals.
    pub fn reset_temporaries(&mut self) {
        debug_assert!(self.regs.free_reg >= self.regs.active_locals);
        self.regs.free_reg = self.regs.active_locals;
    }
}

impl HasRegisters for FuncState {
    fn registers(&mut self) -> &mut RegisterFrame {
        &mut self.regs
    }
}
