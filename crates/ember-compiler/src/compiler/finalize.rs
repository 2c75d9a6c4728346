/// Closing a function: the final return, early-return fixups and the
/// prototype itself.
use super::func_state::FuncState;
use super::jumps::Link;
use super::scope::{SCOPE_NOCLOSE, SCOPE_UPVAL};
use super::Compiler;
use crate::error::{ErrorCode, Result};
use crate::opcode::{Instruction, Op, MAX_JUMP};
use crate::proto::{DebugInfo, Prototype, VarRange};
use crate::token::TokenStream;
use tracing::debug;

impl FuncState {
    /// Returns emitted before the first closure was created skip the
    /// `UCLO` later returns get. Each is moved to the end of the code and
    /// replaced by a `UCLO` that jumps to it.
    fn fixup_early_returns(&mut self, last_pc: usize) -> Result<()> {
        for pc in 0..last_pc {
            let ins = self.code[pc];
            match ins.op() {
                Op::CallMT | Op::CallT | Op::RetM | Op::Ret | Op::Ret0 | Op::Ret1 => {
                    let copy = self.emit(ins)?;
                    self.lines[copy] = self.lines[pc];
                    let offset = copy as i64 - (pc as i64 + 1);
                    if offset > MAX_JUMP as i64 {
                        return Err(self.error(ErrorCode::JumpTooFar, "control structure too long"));
                    }
                    self.code[pc] = Instruction::aj(Op::UClo, 0, offset as i32);
                }
                // Everything after the first close already closes.
                Op::UClo => return Ok(()),
                _ => {}
            }
        }
        Ok(())
    }
}

impl<S: TokenStream> Compiler<'_, S> {
    /// Finish the innermost function and return its prototype. The enclosing
    /// function becomes current again.
    pub(super) fn finish_function(&mut self, line: u32) -> Result<Prototype> {
        self.fs.line = line;
        let last_pc = self.fs.pc();
        let falls_off = last_pc <= self.fs.last_target
            || !self.fs.code.last().is_some_and(|i| i.op().is_return());
        if falls_off {
            self.run_defers(0)?;
            if self.fs.scopes.last().is_some_and(|bl| bl.flags & SCOPE_UPVAL != 0) {
                self.fs.emit(Instruction::aj(Op::UClo, 0, 0))?;
            }
            self.fs.emit_ad(Op::Ret0, 0, 1)?;
        }
        if let Some(bl) = self.fs.scope_mut() {
            bl.flags |= SCOPE_NOCLOSE;
        }
        self.leave_scope()?;
        debug_assert!(self.fs.scopes.is_empty(), "unbalanced scopes at function end");
        if self.fs.fixup_return {
            self.fs.fixup_early_returns(last_pc)?;
        }
        debug_assert!(
            self.fs.links.iter().all(|l| *l == Link::Resolved),
            "unresolved jumps at function end"
        );

        let fs = match self.parents.pop() {
            Some(parent) => std::mem::replace(&mut self.fs, parent),
            None => std::mem::replace(
                &mut self.fs,
                FuncState::new(self.options.limits, line, self.vars.len(), self.edges.len()),
            ),
        };
        let debug = if self.options.strip_debug {
            DebugInfo::default()
        } else {
            DebugInfo {
                line_info: fs.lines,
                var_info: self.vars[fs.var_base..]
                    .iter()
                    .map(|v| VarRange {
                        name: v.name,
                        start_pc: v.start_pc as u32,
                        end_pc: v.end_pc as u32,
                    })
                    .collect(),
                upvalue_names: fs.upvalues.iter().map(|uv| uv.name).collect(),
            }
        };
        self.vars.truncate(fs.var_base);
        self.edges.truncate(fs.edge_base);

        let proto = Prototype {
            code: fs.code,
            numbers: fs.numbers.into_iter().map(f64::from_bits).collect(),
            strings: fs.strings.into_iter().collect(),
            protos: fs.protos,
            upvalues: fs.upvalues.iter().map(|uv| uv.binding).collect(),
            num_params: fs.num_params,
            is_vararg: fs.is_vararg,
            has_child: fs.has_child,
            frame_size: fs.regs.frame_size,
            first_line: fs.first_line,
            num_lines: line.saturating_sub(fs.first_line),
            debug,
        };
        debug!(
            first_line = proto.first_line,
            instructions = proto.code.len(),
            constants = proto.numbers.len() + proto.strings.len(),
            upvalues = proto.upvalues.len(),
            frame_size = proto.frame_size,
            "function compiled"
        );
        Ok(proto)
    }
}
