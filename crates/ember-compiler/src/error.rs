/// Compile errors: a single structured type with a closed set of codes.
use thiserror::Error;

/// Broad classification of an error code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input: the token sequence does not match the grammar.
    Syntax,
    /// A fixed limit of the bytecode format or configuration was exceeded.
    ResourceLimit,
    /// Well-formed input that violates a static rule (labels, loops, targets).
    Semantic,
}

/// Closed set of error codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    // --- Syntax ---
    UnexpectedSymbol,
    ExpectedToken,
    UnmatchedBlock,
    MalformedNumber,
    UnfinishedString,
    UnfinishedLongString,
    UnfinishedComment,
    InvalidEscape,
    InvalidLongStringDelimiter,
    VarargOutsideVararg,
    AmbiguousSyntax,

    // --- Resource limits ---
    TooManySlots,
    TooManyConstants,
    TooManyUpvalues,
    TooManyLocals,
    NestingTooDeep,
    JumpTooFar,
    TooManyLines,

    // --- Semantic ---
    InvalidAssignment,
    BreakOutsideLoop,
    ContinueOutsideLoop,
    UndefinedLabel,
    DuplicateLabel,
    GotoIntoScope,
    DuplicateParameter,
}

impl ErrorCode {
    pub fn kind(self) -> ErrorKind {
        use ErrorCode::*;
        match self {
            UnexpectedSymbol | ExpectedToken | UnmatchedBlock | MalformedNumber
            | UnfinishedString | UnfinishedLongString | UnfinishedComment | InvalidEscape
            | InvalidLongStringDelimiter | VarargOutsideVararg | AmbiguousSyntax => {
                ErrorKind::Syntax
            }
            TooManySlots | TooManyConstants | TooManyUpvalues | TooManyLocals
            | NestingTooDeep | JumpTooFar | TooManyLines => ErrorKind::ResourceLimit,
            InvalidAssignment | BreakOutsideLoop | ContinueOutsideLoop | UndefinedLabel
            | DuplicateLabel | GotoIntoScope | DuplicateParameter => ErrorKind::Semantic,
        }
    }
}

/// A compile error with its source position.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("{chunk}:{line}: {message}")]
pub struct CompileError {
    pub chunk: String,
    pub line: u32,
    pub code: ErrorCode,
    pub message: String,
}

impl CompileError {
    pub fn new(code: ErrorCode, line: u32, message: impl Into<String>) -> Self {
        CompileError {
            chunk: String::new(),
            line,
            code,
            message: message.into(),
        }
    }

    /// Attach the chunk name used when rendering the error.
    pub fn in_chunk(mut self, chunk: &str) -> Self {
        if self.chunk.is_empty() {
            self.chunk = chunk.to_string();
        }
        self
    }

    /// Fill in the line when the error was raised without one.
    pub fn at_line(mut self, line: u32) -> Self {
        if self.line == 0 {
            self.line = line;
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }
}

pub type Result<T, E = CompileError> = std::result::Result<T, E>;
