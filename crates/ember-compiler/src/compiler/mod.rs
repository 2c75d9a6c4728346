/// Single-pass compiler: tokens in, prototypes out.
///
/// Every grammar production emits code as soon as it is recognized. The
/// pieces that make this possible live in the submodules: register
/// allocation, expression descriptors and their discharge, jump lists, and
/// block scopes.
mod discharge;
pub mod expr;
mod exprs;
mod finalize;
pub mod func_state;
pub mod jumps;
mod operators;
pub mod regalloc;
pub mod scope;
mod stmt;

use crate::config::CompileOptions;
use crate::error::{CompileError, ErrorCode, Result};
use crate::intern::{StringId, StringInterner};
use crate::lexer::Lexer;
use crate::proto::{Chunk, Prototype};
use crate::token::{Token, TokenStream};
use func_state::FuncState;
use scope::{Edge, VarInfo};
use std::ops::{Deref, DerefMut};
use tracing::debug;

/// Highest source line a chunk may reach.
const MAX_LINE: u32 = 0x7fff_ff00;

/// The compiler: token stream, interner and the stack of functions being built.
pub struct Compiler<'o, S: TokenStream> {
    ls: S,
    strings: &'o mut StringInterner,
    options: &'o CompileOptions,
    /// Innermost function being compiled.
    fs: FuncState,
    /// Enclosing functions, outermost first.
    parents: Vec<FuncState>,
    /// Declared locals of all open functions.
    vars: Vec<VarInfo>,
    /// Pending jumps and labels of all open functions.
    edges: Vec<Edge>,
    /// Syntactic nesting depth.
    level: u32,
    /// Line of the last consumed token.
    last_line: u32,
}

/// Holds one level of syntactic nesting while alive.
struct DepthGuard<'c, 'o, S: TokenStream> {
    compiler: &'c mut Compiler<'o, S>,
}

impl<'c, 'o, S: TokenStream> DepthGuard<'c, 'o, S> {
    fn enter(compiler: &'c mut Compiler<'o, S>) -> Result<Self> {
        if compiler.level >= compiler.options.limits.max_nesting {
            return Err(compiler.error(ErrorCode::NestingTooDeep, "chunk has too many syntax levels"));
        }
        compiler.level += 1;
        Ok(DepthGuard { compiler })
    }
}

impl<'o, S: TokenStream> Deref for DepthGuard<'_, 'o, S> {
    type Target = Compiler<'o, S>;
    fn deref(&self) -> &Self::Target {
        self.compiler
    }
}

impl<S: TokenStream> DerefMut for DepthGuard<'_, '_, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.compiler
    }
}

impl<S: TokenStream> Drop for DepthGuard<'_, '_, S> {
    fn drop(&mut self) {
        self.compiler.level -= 1;
    }
}

impl<'o, S: TokenStream> Compiler<'o, S> {
    fn new(ls: S, strings: &'o mut StringInterner, options: &'o CompileOptions) -> Self {
        let line = ls.line();
        Compiler {
            ls,
            strings,
            options,
            fs: FuncState::new(options.limits, 0, 0, 0),
            parents: Vec::new(),
            vars: Vec::new(),
            edges: Vec::new(),
            level: 0,
            last_line: line,
        }
    }

    // ---- Token helpers ----

    fn tok(&self) -> &Token {
        &self.ls.current_token().token
    }

    /// Line of the current token.
    fn line(&self) -> u32 {
        self.ls.line()
    }

    /// Consume the current token.
    fn next(&mut self) -> Result<Token> {
        let line = self.ls.line();
        self.last_line = line;
        self.fs.line = line;
        let st = self.ls.advance(self.strings)?;
        if self.ls.line() >= MAX_LINE {
            return Err(self.error(ErrorCode::TooManyLines, "chunk has too many lines"));
        }
        Ok(st.token)
    }

    fn check(&self, expected: &Token) -> bool {
        self.tok() == expected
    }

    fn test_next(&mut self, expected: &Token) -> Result<bool> {
        if self.check(expected) {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        if self.check(expected) {
            self.next()?;
            Ok(())
        } else {
            Err(self.error(
                ErrorCode::ExpectedToken,
                format!("'{expected}' expected near {}", self.near()),
            ))
        }
    }

    /// Expect the token closing `opener`, which sits at `line`.
    fn expect_match(&mut self, what: &Token, opener: &Token, line: u32) -> Result<()> {
        if self.test_next(what)? {
            return Ok(());
        }
        if line == self.line() {
            return self.expect(what);
        }
        Err(self.error(
            ErrorCode::UnmatchedBlock,
            format!(
                "'{what}' expected (to close '{opener}' at line {line}) near {}",
                self.near()
            ),
        ))
    }

    fn expect_name(&mut self) -> Result<StringId> {
        match *self.tok() {
            Token::Name(id) => {
                self.next()?;
                Ok(id)
            }
            _ => Err(self.error(
                ErrorCode::ExpectedToken,
                format!("<name> expected near {}", self.near()),
            )),
        }
    }

    /// The current token as quoted in messages.
    fn near(&self) -> String {
        match self.tok() {
            Token::Name(id) | Token::String(id) => format!("'{}'", self.strings.display(*id)),
            Token::Eof => "<eof>".to_string(),
            tok => format!("'{tok}'"),
        }
    }

    fn error(&self, code: ErrorCode, message: impl Into<String>) -> CompileError {
        CompileError::new(code, self.line(), message)
    }

    fn unexpected(&self) -> CompileError {
        self.error(
            ErrorCode::UnexpectedSymbol,
            format!("unexpected symbol near {}", self.near()),
        )
    }

    /// Run `f` one syntax level deeper.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let mut guard = DepthGuard::enter(self)?;
        f(&mut *guard)
    }

    // ---- Functions ----

    /// Start compiling a nested function.
    fn open_func(&mut self, line: u32) {
        let child = FuncState::new(self.options.limits, line, self.vars.len(), self.edges.len());
        let parent = std::mem::replace(&mut self.fs, child);
        self.parents.push(parent);
        self.fs.line = line;
        self.enter_scope(0);
    }

    /// Compile the whole chunk as a vararg function.
    fn main_chunk(&mut self) -> Result<Prototype> {
        self.fs.is_vararg = true;
        self.fs.line = self.line();
        self.enter_scope(0);
        self.block_body()?;
        if !self.check(&Token::Eof) {
            return Err(self.error(
                ErrorCode::ExpectedToken,
                format!("'<eof>' expected near {}", self.near()),
            ));
        }
        let line = self.line();
        self.finish_function(line)
    }
}

/// Compile `source` into a chunk.
pub fn compile(source: &[u8], options: &CompileOptions) -> Result<Chunk> {
    let mut strings = StringInterner::new();
    let lexer = Lexer::new(source, &mut strings).map_err(|e| e.in_chunk(&options.chunk_name))?;
    let main = compile_stream(lexer, &mut strings, options)?;
    Ok(Chunk { main, strings })
}

/// Compile the chunk produced by an arbitrary token stream.
pub fn compile_stream<S: TokenStream>(
    stream: S,
    strings: &mut StringInterner,
    options: &CompileOptions,
) -> Result<Prototype> {
    debug!(chunk = %options.chunk_name, "compile start");
    let mut compiler = Compiler::new(stream, strings, options);
    let main = compiler
        .main_chunk()
        .map_err(|e| e.in_chunk(&options.chunk_name))?;
    debug!(
        chunk = %options.chunk_name,
        instructions = main.code.len(),
        functions = main.walk().len(),
        "compile end"
    );
    Ok(main)
}
