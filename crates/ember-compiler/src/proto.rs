/// Function prototype: the immutable result of compiling one function.
use crate::intern::{StringId, StringInterner};
use crate::opcode::Instruction;

/// Where a closure finds one of its upvalues when it is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpvalBinding {
    /// A register of the enclosing activation.
    ParentLocal(u8),
    /// An upvalue of the enclosing closure.
    ParentUpvalue(u8),
}

/// Live range of a local variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VarRange {
    pub name: StringId,
    /// First pc where the variable is live.
    pub start_pc: u32,
    /// First pc where the variable is dead.
    pub end_pc: u32,
}

/// Optional debug tables. Empty when compiled with `strip_debug`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DebugInfo {
    /// Source line of each instruction.
    pub line_info: Vec<u32>,
    pub var_info: Vec<VarRange>,
    pub upvalue_names: Vec<StringId>,
}

impl DebugInfo {
    pub fn is_empty(&self) -> bool {
        self.line_info.is_empty() && self.var_info.is_empty() && self.upvalue_names.is_empty()
    }
}

/// A compiled function prototype.
#[derive(Clone, Debug, PartialEq)]
pub struct Prototype {
    pub code: Vec<Instruction>,
    /// Number constants, indexed by `KNUM`, `ISEQN`, arithmetic `VN`/`NV` forms.
    pub numbers: Vec<f64>,
    /// String constants, indexed by `KSTR`, `GGET`, `TGETS` and friends.
    pub strings: Vec<StringId>,
    /// Nested prototypes, indexed by `FNEW`.
    pub protos: Vec<Prototype>,
    pub upvalues: Vec<UpvalBinding>,
    pub num_params: u8,
    pub is_vararg: bool,
    /// True when the function creates closures.
    pub has_child: bool,
    pub frame_size: u8,
    pub first_line: u32,
    pub num_lines: u32,
    pub debug: DebugInfo,
}

impl Prototype {
    /// Source line of the instruction at `pc`, or 0 without debug info.
    pub fn line_of(&self, pc: usize) -> u32 {
        self.debug.line_info.get(pc).copied().unwrap_or(0)
    }

    /// Name of the local live in `slot` at `pc`, when debug info is present.
    pub fn local_name(&self, slot: usize, pc: usize) -> Option<StringId> {
        let pc = pc as u32;
        self.debug
            .var_info
            .iter()
            .filter(|v| v.start_pc <= pc && pc < v.end_pc)
            .nth(slot)
            .map(|v| v.name)
    }

    /// Iterate over this prototype and all nested ones, depth first.
    pub fn walk(&self) -> Vec<&Prototype> {
        let mut out = vec![self];
        let mut i = 0;
        while i < out.len() {
            let p = out[i];
            out.extend(p.protos.iter());
            i += 1;
        }
        out
    }
}

/// A compiled chunk: the main function plus the string table it refers to.
#[derive(Clone, Debug)]
pub struct Chunk {
    pub main: Prototype,
    pub strings: StringInterner,
}

impl Chunk {
    pub fn string(&self, id: StringId) -> &[u8] {
        self.strings.get_bytes(id)
    }
}
