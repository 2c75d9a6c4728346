//! Ember compiler: lexer and single-pass bytecode compiler for a Lua 5.1
//! dialect with `continue`, `defer`, `??`, ternaries, bitwise operators
//! and compound assignment.

pub mod compiler;
pub mod config;
pub mod disasm;
pub mod error;
pub mod intern;
pub mod lexer;
pub mod opcode;
pub mod proto;
pub mod token;

pub use compiler::{compile, compile_stream};
pub use config::{CompileOptions, FalsyPolicy, Limits};
pub use disasm::disassemble;
pub use error::{CompileError, ErrorCode, ErrorKind};
pub use proto::{Chunk, Prototype};
