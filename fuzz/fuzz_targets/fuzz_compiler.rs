#![no_main]

use ember_compiler::{compile, disassemble, CompileOptions, FalsyPolicy};
use libfuzzer_sys::fuzz_target;

// Errors are fine; panics and failed internal assertions are bugs.
fuzz_target!(|data: &[u8]| {
    let Some((&mode, source)) = data.split_first() else {
        return;
    };
    let mut options = CompileOptions::new("fuzz").strip_debug(mode & 1 != 0);
    if mode & 2 != 0 {
        options = options.falsy(FalsyPolicy::canonical());
    }
    if let Ok(chunk) = compile(source, &options) {
        for proto in chunk.main.walk() {
            let len = proto.code.len() as isize;
            for (pc, ins) in proto.code.iter().enumerate() {
                if ins.op().is_jump() {
                    assert!((0..len).contains(&ins.jump_target(pc)));
                }
            }
        }
        let _ = disassemble(&chunk);
    }
});
