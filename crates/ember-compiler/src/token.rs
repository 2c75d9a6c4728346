use crate::error::Result;
use crate::intern::{StringId, StringInterner};
use std::fmt;

/// Source location span.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

/// A token with its source location.
#[derive(Clone, Debug, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// All tokens of the dialect.
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    // --- Keywords ---
    And,
    Break,
    Continue,
    Defer,
    Do,
    Else,
    ElseIf,
    End,
    False,
    For,
    Function,
    Goto,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,

    // --- Literals ---
    Number(f64),
    String(StringId),
    Name(StringId),

    // --- Single-char operators/punctuation ---
    Plus,        // +
    Minus,       // -
    Star,        // *
    Slash,       // /
    Percent,     // %
    Caret,       // ^
    Hash,        // #
    Ampersand,   // &
    Tilde,       // ~
    Pipe,        // |
    Less,        // <
    Greater,     // >
    Assign,      // =
    LParen,      // (
    RParen,      // )
    LBrace,      // {
    RBrace,      // }
    LBracket,    // [
    RBracket,    // ]
    Semi,        // ;
    Colon,       // :
    Comma,       // ,
    Dot,         // .
    Question,    // ?

    // --- Multi-char operators ---
    DoubleColon,   // ::
    ShiftLeft,     // <<
    ShiftRight,    // >>
    Equal,         // ==
    NotEqual,      // ~= or !=
    LessEq,        // <=
    GreaterEq,     // >=
    DotDot,        // ..
    DotDotDot,     // ...
    IfEmpty,       // ??
    TernarySep,    // :>
    PlusPlus,      // ++
    PlusAssign,    // +=
    MinusAssign,   // -=
    StarAssign,    // *=
    SlashAssign,   // /=
    PercentAssign, // %=
    ConcatAssign,  // ..=
    IfEmptyAssign, // ??=

    // --- EOF ---
    Eof,
}

impl Token {
    /// Try to match a keyword from an identifier.
    pub fn keyword_from_bytes(s: &[u8]) -> Option<Token> {
        match s {
            b"and" => Some(Token::And),
            b"break" => Some(Token::Break),
            b"continue" => Some(Token::Continue),
            b"defer" => Some(Token::Defer),
            b"do" => Some(Token::Do),
            b"else" => Some(Token::Else),
            b"elseif" => Some(Token::ElseIf),
            b"end" => Some(Token::End),
            b"false" => Some(Token::False),
            b"for" => Some(Token::For),
            b"function" => Some(Token::Function),
            b"goto" => Some(Token::Goto),
            b"if" => Some(Token::If),
            b"in" => Some(Token::In),
            b"local" => Some(Token::Local),
            b"nil" => Some(Token::Nil),
            b"not" => Some(Token::Not),
            b"or" => Some(Token::Or),
            b"repeat" => Some(Token::Repeat),
            b"return" => Some(Token::Return),
            b"then" => Some(Token::Then),
            b"true" => Some(Token::True),
            b"until" => Some(Token::Until),
            b"while" => Some(Token::While),
            _ => None,
        }
    }

    /// True for tokens that close a block.
    pub fn is_block_end(&self) -> bool {
        matches!(
            self,
            Token::Else | Token::ElseIf | Token::End | Token::Until | Token::Eof
        )
    }

    /// True for tokens that can begin an operand.
    pub fn starts_operand(&self) -> bool {
        matches!(
            self,
            Token::Number(_)
                | Token::String(_)
                | Token::Name(_)
                | Token::Nil
                | Token::True
                | Token::False
                | Token::DotDotDot
                | Token::Function
                | Token::LBrace
                | Token::LParen
                | Token::Not
                | Token::PlusPlus
                | Token::Minus
                | Token::Tilde
                | Token::Hash
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Token::And => "and",
            Token::Break => "break",
            Token::Continue => "continue",
            Token::Defer => "defer",
            Token::Do => "do",
            Token::Else => "else",
            Token::ElseIf => "elseif",
            Token::End => "end",
            Token::False => "false",
            Token::For => "for",
            Token::Function => "function",
            Token::Goto => "goto",
            Token::If => "if",
            Token::In => "in",
            Token::Local => "local",
            Token::Nil => "nil",
            Token::Not => "not",
            Token::Or => "or",
            Token::Repeat => "repeat",
            Token::Return => "return",
            Token::Then => "then",
            Token::True => "true",
            Token::Until => "until",
            Token::While => "while",
            Token::Number(n) => return write!(f, "{n}"),
            Token::String(_) => "<string>",
            Token::Name(_) => "<name>",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Caret => "^",
            Token::Hash => "#",
            Token::Ampersand => "&",
            Token::Tilde => "~",
            Token::Pipe => "|",
            Token::Less => "<",
            Token::Greater => ">",
            Token::Assign => "=",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Semi => ";",
            Token::Colon => ":",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::Question => "?",
            Token::DoubleColon => "::",
            Token::ShiftLeft => "<<",
            Token::ShiftRight => ">>",
            Token::Equal => "==",
            Token::NotEqual => "~=",
            Token::LessEq => "<=",
            Token::GreaterEq => ">=",
            Token::DotDot => "..",
            Token::DotDotDot => "...",
            Token::IfEmpty => "??",
            Token::TernarySep => ":>",
            Token::PlusPlus => "++",
            Token::PlusAssign => "+=",
            Token::MinusAssign => "-=",
            Token::StarAssign => "*=",
            Token::SlashAssign => "/=",
            Token::PercentAssign => "%=",
            Token::ConcatAssign => "..=",
            Token::IfEmptyAssign => "??=",
            Token::Eof => "<eof>",
        };
        f.write_str(s)
    }
}

/// Pull-based token source consumed by the compiler.
///
/// String payloads are interned into the interner handed in by the caller,
/// so a stream never owns the string table of the chunk it feeds.
pub trait TokenStream {
    /// The token at the head of the stream.
    fn current_token(&self) -> &SpannedToken;

    /// Consume the head token and return it.
    fn advance(&mut self, strings: &mut StringInterner) -> Result<SpannedToken>;

    /// Look `n` tokens past the head; `peek(0)` is the head itself.
    fn peek(&mut self, n: usize, strings: &mut StringInterner) -> Result<&SpannedToken>;

    /// Line of the head token.
    fn line(&self) -> u32 {
        self.current_token().span.line
    }
}

/// A pre-scanned token sequence. Past the end it yields `Eof` forever.
pub struct TokenBuffer {
    tokens: Vec<SpannedToken>,
    pos: usize,
    eof: SpannedToken,
}

impl TokenBuffer {
    pub fn new(tokens: Vec<SpannedToken>) -> Self {
        let last_line = tokens.last().map_or(1, |t| t.span.line);
        TokenBuffer {
            tokens,
            pos: 0,
            eof: SpannedToken {
                token: Token::Eof,
                span: Span {
                    line: last_line,
                    column: 0,
                },
            },
        }
    }

    fn at(&self, idx: usize) -> &SpannedToken {
        self.tokens.get(idx).unwrap_or(&self.eof)
    }
}

impl TokenStream for TokenBuffer {
    fn current_token(&self) -> &SpannedToken {
        self.at(self.pos)
    }

    fn advance(&mut self, _strings: &mut StringInterner) -> Result<SpannedToken> {
        let tok = self.at(self.pos).clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        Ok(tok)
    }

    fn peek(&mut self, n: usize, _strings: &mut StringInterner) -> Result<&SpannedToken> {
        Ok(self.at(self.pos + n))
    }
}
