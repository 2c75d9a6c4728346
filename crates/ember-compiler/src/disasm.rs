/// Bytecode listing (one line per instruction, nested functions after their parent).
use crate::intern::StringInterner;
use crate::opcode::{Instruction, Mode, PRI_FALSE, PRI_NIL, PRI_TRUE};
use crate::proto::{Chunk, Prototype, UpvalBinding};
use std::fmt;

/// Disassemble a chunk into a human-readable string.
pub fn disassemble(chunk: &Chunk) -> String {
    Listing {
        proto: &chunk.main,
        strings: &chunk.strings,
    }
    .to_string()
}

/// Display adapter for a prototype tree.
pub struct Listing<'a> {
    pub proto: &'a Prototype,
    pub strings: &'a StringInterner,
}

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_proto(f, self.proto, self.strings, "main")
    }
}

fn write_proto(
    f: &mut fmt::Formatter<'_>,
    proto: &Prototype,
    strings: &StringInterner,
    path: &str,
) -> fmt::Result {
    let vararg = if proto.is_vararg { "+" } else { "" };
    writeln!(
        f,
        "-- function {path} (line {}, {}{vararg} params, {} slots, {} upvalues, {} numbers, {} strings, {} functions)",
        proto.first_line,
        proto.num_params,
        proto.frame_size,
        proto.upvalues.len(),
        proto.numbers.len(),
        proto.strings.len(),
        proto.protos.len(),
    )?;

    for (pc, inst) in proto.code.iter().enumerate() {
        let line = proto.line_of(pc);
        if line > 0 {
            write!(f, "{pc:04} {line:>5}  ")?;
        } else {
            write!(f, "{pc:04}     -  ")?;
        }
        write_instruction(f, pc, inst, proto, strings)?;
        writeln!(f)?;
    }

    for (i, up) in proto.upvalues.iter().enumerate() {
        let name = proto
            .debug
            .upvalue_names
            .get(i)
            .map(|id| strings.display(*id))
            .unwrap_or_else(|| "-".to_string());
        match up {
            UpvalBinding::ParentLocal(slot) => writeln!(f, "  upvalue {i} {name}: local {slot}")?,
            UpvalBinding::ParentUpvalue(idx) => {
                writeln!(f, "  upvalue {i} {name}: upvalue {idx}")?
            }
        }
    }

    for (i, child) in proto.protos.iter().enumerate() {
        writeln!(f)?;
        write_proto(f, child, strings, &format!("{path}.{i}"))?;
    }
    Ok(())
}

/// Format one instruction with its operands and a constant/target comment.
pub fn write_instruction(
    f: &mut impl fmt::Write,
    pc: usize,
    inst: &Instruction,
    proto: &Prototype,
    strings: &StringInterner,
) -> fmt::Result {
    let op = inst.op();
    let (ma, _, mcd) = op.modes();
    write!(f, "{:<7}", op.name())?;
    if ma != Mode::None {
        write!(f, "{:>4}", inst.a())?;
    } else {
        write!(f, "    ")?;
    }
    let last = if op.is_abc() {
        write!(f, "{:>4}", inst.b())?;
        inst.c() as u16
    } else {
        inst.d()
    };
    if mcd == Mode::Jump {
        let target = inst.jump_target(pc);
        return write!(f, " => {target:04}");
    }
    if mcd != Mode::None {
        write!(f, "{:>5}", if mcd == Mode::LitS { last as i16 as i32 } else { last as i32 })?;
    }

    let idx = last as usize;
    match mcd {
        Mode::Str => match proto.strings.get(idx) {
            Some(id) => write!(f, "  ; {:?}", strings.display(*id)),
            None => write!(f, "  ; <bad string {idx}>"),
        },
        Mode::Num => match proto.numbers.get(idx) {
            Some(n) => write!(f, "  ; {n}"),
            None => write!(f, "  ; <bad number {idx}>"),
        },
        Mode::Pri => match last {
            PRI_NIL => write!(f, "  ; nil"),
            PRI_FALSE => write!(f, "  ; false"),
            PRI_TRUE => write!(f, "  ; true"),
            _ => Ok(()),
        },
        Mode::Func => write!(f, "  ; function {idx}"),
        _ => Ok(()),
    }
}
