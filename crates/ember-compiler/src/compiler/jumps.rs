/// Jump lists.
///
/// A pending jump is recorded in the `links` side table of its function:
/// `Link::Pending(next)` chains it to the next jump of the same list. The
/// displacement field of the instruction is only written once the target is
/// known.
use super::func_state::FuncState;
use crate::error::{ErrorCode, Result};
use crate::opcode::{Instruction, Op, MAX_JUMP, MIN_JUMP, NO_REG};
use tracing::trace;

/// Head of a chain of pending jumps, or empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JumpList(usize);

const NO_JUMP: usize = usize::MAX;

impl JumpList {
    pub const EMPTY: JumpList = JumpList(NO_JUMP);

    pub fn at(pc: usize) -> Self {
        JumpList(pc)
    }

    pub fn is_empty(self) -> bool {
        self.0 == NO_JUMP
    }

    pub fn head(self) -> Option<usize> {
        if self.is_empty() {
            None
        } else {
            Some(self.0)
        }
    }
}

/// Side-table entry for one instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Link {
    /// Not a pending jump.
    Resolved,
    /// Pending jump; the payload is the rest of its list.
    Pending(JumpList),
}

impl FuncState {
    fn jump_next(&self, pc: usize) -> JumpList {
        match self.links[pc] {
            Link::Pending(next) => next,
            Link::Resolved => {
                debug_assert!(false, "jump list walks into a resolved instruction at {pc}");
                JumpList::EMPTY
            }
        }
    }

    fn iter_list(&self, list: JumpList) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(list.head(), move |&pc| self.jump_next(pc).head())
    }

    /// The test guarding the jump at `pc`, or the jump itself.
    fn guard_pc(pc: usize) -> usize {
        pc.saturating_sub(1)
    }

    /// True if some jump of the list must produce a value in a register.
    pub fn list_needs_value(&self, list: JumpList) -> bool {
        self.iter_list(list).any(|pc| {
            let ins = self.code[Self::guard_pc(pc)];
            !(matches!(ins.op(), Op::IsTc | Op::IsFc) || ins.a() == NO_REG)
        })
    }

    /// Point the value-producing test before the jump at `pc` to `reg`.
    /// Returns false when the jump carries no such test.
    fn patch_test_reg(&mut self, pc: usize, reg: u8) -> bool {
        let g = Self::guard_pc(pc);
        let mut ins = self.code[g];
        let op = ins.op();
        if matches!(op, Op::IsTc | Op::IsFc) {
            if reg != NO_REG && reg as u16 != ins.d() {
                ins.set_a(reg);
            } else {
                // Nothing to copy: degrade to a plain test.
                ins.set_op(if op == Op::IsTc { Op::IsT } else { Op::IsF });
                ins.set_a(0);
            }
            self.code[g] = ins;
        } else if ins.a() == NO_REG {
            if reg == NO_REG {
                // A constant that is only tested: the load becomes a jump.
                self.code[g] = Instruction::aj(Op::Jmp, self.code[pc].a(), 0);
            } else {
                ins.set_a(reg);
                self.code[g] = ins;
                let next = g + 1;
                if reg >= self.code[next].a() {
                    self.code[next].set_a(reg + 1);
                }
            }
        } else {
            return false;
        }
        true
    }

    /// Turn the value-copying tests of a list into plain tests.
    pub fn drop_values(&mut self, list: JumpList) {
        let pcs: Vec<usize> = self.iter_list(list).collect();
        for pc in pcs {
            self.patch_test_reg(pc, NO_REG);
        }
    }

    /// Resolve the single jump at `pc` to `dest`.
    pub fn patch_ins(&mut self, pc: usize, dest: usize) -> Result<()> {
        let offset = dest as i64 - (pc as i64 + 1);
        if !(MIN_JUMP as i64..=MAX_JUMP as i64).contains(&offset) {
            return Err(self.error(ErrorCode::JumpTooFar, "control structure too long"));
        }
        self.code[pc].set_j(offset as i32);
        self.links[pc] = Link::Resolved;
        Ok(())
    }

    /// Append `other` to the list at `list`.
    pub fn append(&mut self, list: &mut JumpList, other: JumpList) {
        if other.is_empty() {
            return;
        }
        match self.iter_list(*list).last() {
            None => *list = other,
            Some(tail) => self.links[tail] = Link::Pending(other),
        }
    }

    /// Patch a list: value-producing jumps to `vtarget` with the value in
    /// `reg`, all others to `dtarget`.
    pub fn patch_with_value(
        &mut self,
        list: JumpList,
        vtarget: usize,
        reg: u8,
        dtarget: usize,
    ) -> Result<()> {
        let mut cur = list;
        while let Some(pc) = cur.head() {
            let next = self.jump_next(pc);
            if self.patch_test_reg(pc, reg) {
                self.patch_ins(pc, vtarget)?;
            } else {
                self.patch_ins(pc, dtarget)?;
            }
            cur = next;
        }
        Ok(())
    }

    /// Make a list jump to the next emitted instruction.
    pub fn patch_to_here(&mut self, list: JumpList) {
        if list.is_empty() {
            return;
        }
        trace!(pc = self.pc(), "patch jumps to here");
        self.last_target = self.pc();
        let mut jpc = self.jpc;
        self.append(&mut jpc, list);
        self.jpc = jpc;
    }

    /// Make a list jump to `target`.
    pub fn patch_to(&mut self, list: JumpList, target: usize) -> Result<()> {
        if target == self.pc() {
            self.patch_to_here(list);
            Ok(())
        } else {
            debug_assert!(target < self.pc(), "forward patch to unemitted code");
            trace!(target, "patch jumps");
            self.patch_with_value(list, target, NO_REG, target)
        }
    }

    /// Emit an unconditional jump. Jumps pending for this position are
    /// chained into it.
    pub fn emit_jump(&mut self) -> Result<JumpList> {
        let jpc = std::mem::replace(&mut self.jpc, JumpList::EMPTY);
        let pc = self.pc();
        let j = if pc > 0
            && pc - 1 >= self.last_target
            && self.code[pc - 1].op() == Op::UClo
            && self.links[pc - 1] == Link::Resolved
        {
            // Reuse the scope close as the jump.
            self.links[pc - 1] = Link::Pending(JumpList::EMPTY);
            self.last_target = pc;
            pc - 1
        } else {
            let free = self.regs.free_reg;
            self.emit_pending(Instruction::aj(Op::Jmp, free, 0))?
        };
        let mut list = JumpList::at(j);
        self.append(&mut list, jpc);
        Ok(list)
    }

    /// Emit the jump following a test instruction and return its pc.
    pub fn emit_test_jump(&mut self) -> Result<usize> {
        debug_assert!(self.jpc.is_empty(), "test jump with pending jumps");
        let free = self.regs.free_reg;
        self.emit_pending(Instruction::aj(Op::Jmp, free, 0))
    }

    /// Flip the test guarding the jump at `pc`.
    pub fn invert_cond(&mut self, pc: usize) {
        let g = Self::guard_pc(pc);
        let op = self.code[g].op();
        if let Some(inv) = op.inverted() {
            self.code[g].set_op(inv);
        }
    }
}
