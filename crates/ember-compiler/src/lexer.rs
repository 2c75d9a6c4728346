use crate::error::{CompileError, ErrorCode, Result};
use crate::intern::StringInterner;
use crate::token::{Span, SpannedToken, Token, TokenStream};
use std::collections::VecDeque;

/// Pull-based lexer over a byte slice.
///
/// Holds the current token plus a small lookahead queue; names and string
/// literals are interned into the interner passed to each pull.
pub struct Lexer<'a> {
    source: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
    current: SpannedToken,
    lookahead: VecDeque<SpannedToken>,
}

impl<'a> Lexer<'a> {
    /// Create a lexer and scan the first token.
    pub fn new(source: &'a [u8], strings: &mut StringInterner) -> Result<Self> {
        let mut lexer = Lexer {
            source,
            pos: 0,
            line: 1,
            column: 1,
            current: SpannedToken {
                token: Token::Eof,
                span: Span::default(),
            },
            lookahead: VecDeque::new(),
        };
        // A leading `#` line is a shebang.
        if source.first() == Some(&b'#') {
            while let Some(ch) = lexer.peek_byte() {
                if ch == b'\n' || ch == b'\r' {
                    break;
                }
                lexer.advance_char();
            }
        }
        lexer.current = lexer.scan_token(strings)?;
        Ok(lexer)
    }

    // ---- Character level ----

    fn peek_byte(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    fn advance_char(&mut self) -> Option<u8> {
        let ch = self.peek_byte()?;
        self.pos += 1;
        match ch {
            b'\n' | b'\r' => {
                // \r\n and \n\r count as one newline
                if let Some(next) = self.peek_byte() {
                    if (next == b'\n' || next == b'\r') && next != ch {
                        self.pos += 1;
                    }
                }
                self.line += 1;
                self.column = 1;
            }
            _ => self.column += 1,
        }
        Some(ch)
    }

    fn error(&self, code: ErrorCode, line: u32, message: String) -> CompileError {
        CompileError::new(code, line, message)
    }

    fn malformed(&self, start: usize, line: u32) -> CompileError {
        let text = String::from_utf8_lossy(&self.source[start..self.pos]);
        self.error(
            ErrorCode::MalformedNumber,
            line,
            format!("malformed number near '{text}'"),
        )
    }

    fn invalid_escape(&self, start: usize, line: u32) -> CompileError {
        self.error(
            ErrorCode::InvalidEscape,
            line,
            format!("invalid escape sequence near {}", self.near(start)),
        )
    }

    fn near(&self, start: usize) -> String {
        let end = (self.pos + 1).min(self.source.len());
        let raw = &self.source[start.min(end)..end];
        let raw = if raw.len() > 40 { &raw[..40] } else { raw };
        format!("'{}'", String::from_utf8_lossy(raw))
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<()> {
        loop {
            while let Some(ch) = self.peek_byte() {
                if matches!(ch, b' ' | b'\t' | b'\n' | b'\r' | b'\x0B' | b'\x0C') {
                    self.advance_char();
                } else {
                    break;
                }
            }

            if self.peek_byte() == Some(b'-') && self.peek_at(1) == Some(b'-') {
                let line = self.line;
                self.advance_char();
                self.advance_char();
                if let Some(level) = self.long_bracket_level() {
                    self.skip_long_bracket_open(level);
                    self.scan_long_content(level, line, ErrorCode::UnfinishedComment)?;
                    continue;
                }
                while let Some(ch) = self.peek_byte() {
                    if ch == b'\n' || ch == b'\r' {
                        break;
                    }
                    self.advance_char();
                }
                continue;
            }
            return Ok(());
        }
    }

    /// Level of a `[=*[` opener at the current position.
    fn long_bracket_level(&self) -> Option<usize> {
        if self.peek_byte() != Some(b'[') {
            return None;
        }
        let mut level = 0;
        while self.peek_at(level + 1) == Some(b'=') {
            level += 1;
        }
        (self.peek_at(level + 1) == Some(b'[')).then_some(level)
    }

    fn skip_long_bracket_open(&mut self, level: usize) {
        for _ in 0..level + 2 {
            self.advance_char();
        }
    }

    // ---- Token level ----

    fn scan_token(&mut self, strings: &mut StringInterner) -> Result<SpannedToken> {
        self.skip_whitespace_and_comments()?;
        let span = Span {
            line: self.line,
            column: self.column,
        };
        let token = self.scan_token_inner(span, strings)?;
        Ok(SpannedToken { token, span })
    }

    /// Consume one char and yield `short`, or two chars and yield `long`
    /// when the second char is `next`.
    fn one_or_two(&mut self, next: u8, long: Token, short: Token) -> Token {
        self.advance_char();
        if self.peek_byte() == Some(next) {
            self.advance_char();
            long
        } else {
            short
        }
    }

    fn scan_token_inner(&mut self, span: Span, strings: &mut StringInterner) -> Result<Token> {
        let Some(ch) = self.peek_byte() else {
            return Ok(Token::Eof);
        };

        let token = match ch {
            b'+' => {
                self.advance_char();
                match self.peek_byte() {
                    Some(b'+') => {
                        self.advance_char();
                        Token::PlusPlus
                    }
                    Some(b'=') => {
                        self.advance_char();
                        Token::PlusAssign
                    }
                    _ => Token::Plus,
                }
            }
            b'-' => self.one_or_two(b'=', Token::MinusAssign, Token::Minus),
            b'*' => self.one_or_two(b'=', Token::StarAssign, Token::Star),
            b'/' => self.one_or_two(b'=', Token::SlashAssign, Token::Slash),
            b'%' => self.one_or_two(b'=', Token::PercentAssign, Token::Percent),
            b'=' => self.one_or_two(b'=', Token::Equal, Token::Assign),
            b'~' => self.one_or_two(b'=', Token::NotEqual, Token::Tilde),
            b'!' => {
                self.advance_char();
                if self.peek_byte() != Some(b'=') {
                    return Err(self.error(
                        ErrorCode::UnexpectedSymbol,
                        span.line,
                        "unexpected symbol near '!'".to_string(),
                    ));
                }
                self.advance_char();
                Token::NotEqual
            }
            b'<' => {
                self.advance_char();
                match self.peek_byte() {
                    Some(b'<') => {
                        self.advance_char();
                        Token::ShiftLeft
                    }
                    Some(b'=') => {
                        self.advance_char();
                        Token::LessEq
                    }
                    _ => Token::Less,
                }
            }
            b'>' => {
                self.advance_char();
                match self.peek_byte() {
                    Some(b'>') => {
                        self.advance_char();
                        Token::ShiftRight
                    }
                    Some(b'=') => {
                        self.advance_char();
                        Token::GreaterEq
                    }
                    _ => Token::Greater,
                }
            }
            b':' => {
                self.advance_char();
                match self.peek_byte() {
                    Some(b':') => {
                        self.advance_char();
                        Token::DoubleColon
                    }
                    Some(b'>') => {
                        self.advance_char();
                        Token::TernarySep
                    }
                    _ => Token::Colon,
                }
            }
            b'?' => {
                self.advance_char();
                if self.peek_byte() == Some(b'?') {
                    self.advance_char();
                    if self.peek_byte() == Some(b'=') {
                        self.advance_char();
                        Token::IfEmptyAssign
                    } else {
                        Token::IfEmpty
                    }
                } else {
                    Token::Question
                }
            }
            b'.' => {
                if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                    return self.scan_number(span);
                }
                self.advance_char();
                if self.peek_byte() == Some(b'.') {
                    self.advance_char();
                    match self.peek_byte() {
                        Some(b'.') => {
                            self.advance_char();
                            Token::DotDotDot
                        }
                        Some(b'=') => {
                            self.advance_char();
                            Token::ConcatAssign
                        }
                        _ => Token::DotDot,
                    }
                } else {
                    Token::Dot
                }
            }
            b'[' => {
                if let Some(level) = self.long_bracket_level() {
                    self.skip_long_bracket_open(level);
                    let content =
                        self.scan_long_content(level, span.line, ErrorCode::UnfinishedLongString)?;
                    return Ok(Token::String(strings.intern(&content)));
                }
                if self.peek_at(1) == Some(b'=') {
                    let start = self.pos;
                    while self.peek_at(1) == Some(b'=') {
                        self.advance_char();
                    }
                    return Err(self.error(
                        ErrorCode::InvalidLongStringDelimiter,
                        span.line,
                        format!("invalid long string delimiter near {}", self.near(start)),
                    ));
                }
                self.advance_char();
                Token::LBracket
            }
            b'^' | b'#' | b'&' | b'|' | b'(' | b')' | b'{' | b'}' | b']' | b';' | b',' => {
                self.advance_char();
                match ch {
                    b'^' => Token::Caret,
                    b'#' => Token::Hash,
                    b'&' => Token::Ampersand,
                    b'|' => Token::Pipe,
                    b'(' => Token::LParen,
                    b')' => Token::RParen,
                    b'{' => Token::LBrace,
                    b'}' => Token::RBrace,
                    b']' => Token::RBracket,
                    b';' => Token::Semi,
                    _ => Token::Comma,
                }
            }
            b'"' | b'\'' => return self.scan_short_string(span, strings),
            b'0'..=b'9' => return self.scan_number(span),
            _ if is_ident_start(ch) => {
                let start = self.pos;
                while self.peek_byte().is_some_and(is_ident_continue) {
                    self.advance_char();
                }
                let name = &self.source[start..self.pos];
                match Token::keyword_from_bytes(name) {
                    Some(kw) => kw,
                    None => Token::Name(strings.intern(name)),
                }
            }
            _ => {
                let near = if ch.is_ascii_graphic() {
                    format!("'{}'", ch as char)
                } else {
                    format!("'<\\{ch}>'")
                };
                return Err(self.error(
                    ErrorCode::UnexpectedSymbol,
                    span.line,
                    format!("unexpected symbol near {near}"),
                ));
            }
        };
        Ok(token)
    }

    fn scan_digits(&mut self, hex: bool) -> usize {
        let mut n = 0;
        while let Some(ch) = self.peek_byte() {
            let ok = if hex {
                ch.is_ascii_hexdigit()
            } else {
                ch.is_ascii_digit()
            };
            if !ok {
                break;
            }
            self.advance_char();
            n += 1;
        }
        n
    }

    fn glued_to_number(&self) -> bool {
        match self.peek_byte() {
            Some(b'.') => self.peek_at(1) != Some(b'.'),
            Some(c) => is_ident_continue(c),
            None => false,
        }
    }

    fn scan_number(&mut self, span: Span) -> Result<Token> {
        let start = self.pos;
        let hex = self.peek_byte() == Some(b'0')
            && self.peek_at(1).is_some_and(|c| c == b'x' || c == b'X');
        if hex {
            self.advance_char();
            self.advance_char();
        }
        let mut digits = self.scan_digits(hex);
        if self.peek_byte() == Some(b'.') && self.peek_at(1) != Some(b'.') {
            self.advance_char();
            digits += self.scan_digits(hex);
        }
        if digits == 0 {
            return Err(self.malformed(start, span.line));
        }
        let exp_marker: &[u8] = if hex { b"pP" } else { b"eE" };
        if self.peek_byte().is_some_and(|c| exp_marker.contains(&c)) {
            self.advance_char();
            if matches!(self.peek_byte(), Some(b'+') | Some(b'-')) {
                self.advance_char();
            }
            if self.scan_digits(false) == 0 {
                return Err(self.malformed(start, span.line));
            }
        }
        // A number glued to a name is malformed
        if self.glued_to_number() {
            while self.glued_to_number() {
                self.advance_char();
            }
            return Err(self.malformed(start, span.line));
        }

        let text = &self.source[start..self.pos];
        let value = if hex {
            parse_hex(&text[2..])
        } else {
            std::str::from_utf8(text)
                .ok()
                .and_then(|s| s.parse::<f64>().ok())
        };
        value
            .map(Token::Number)
            .ok_or_else(|| self.malformed(start, span.line))
    }

    fn scan_short_string(&mut self, span: Span, strings: &mut StringInterner) -> Result<Token> {
        let start = self.pos;
        let quote = self.peek_byte().unwrap_or(b'"');
        self.advance_char();
        let mut buf = Vec::new();

        loop {
            let Some(ch) = self.peek_byte() else {
                return Err(self.error(
                    ErrorCode::UnfinishedString,
                    span.line,
                    "unfinished string near <eof>".to_string(),
                ));
            };
            if ch == quote {
                self.advance_char();
                break;
            }
            match ch {
                b'\n' | b'\r' => {
                    return Err(self.error(
                        ErrorCode::UnfinishedString,
                        span.line,
                        format!("unfinished string near {}", self.near(start)),
                    ));
                }
                b'\\' => {
                    self.advance_char();
                    self.scan_escape(start, span, &mut buf)?;
                }
                _ => {
                    self.advance_char();
                    buf.push(ch);
                }
            }
        }

        Ok(Token::String(strings.intern(&buf)))
    }

    fn scan_escape(&mut self, start: usize, span: Span, buf: &mut Vec<u8>) -> Result<()> {
        let Some(ch) = self.peek_byte() else {
            return Err(self.error(
                ErrorCode::UnfinishedString,
                span.line,
                "unfinished string near <eof>".to_string(),
            ));
        };
        let simple = match ch {
            b'a' => Some(0x07),
            b'b' => Some(0x08),
            b'f' => Some(0x0C),
            b'n' => Some(b'\n'),
            b'r' => Some(b'\r'),
            b't' => Some(b'\t'),
            b'v' => Some(0x0B),
            b'\\' | b'"' | b'\'' => Some(ch),
            _ => None,
        };
        if let Some(byte) = simple {
            self.advance_char();
            buf.push(byte);
            return Ok(());
        }

        match ch {
            b'\n' | b'\r' => {
                self.advance_char();
                buf.push(b'\n');
            }
            b'x' => {
                self.advance_char();
                let mut value = 0u8;
                for _ in 0..2 {
                    match self.peek_byte() {
                        Some(d) if d.is_ascii_hexdigit() => {
                            self.advance_char();
                            value = (value << 4) | hex_value(d);
                        }
                        _ => return Err(self.invalid_escape(start, span.line)),
                    }
                }
                buf.push(value);
            }
            b'u' => {
                self.advance_char();
                if self.peek_byte() != Some(b'{') {
                    return Err(self.invalid_escape(start, span.line));
                }
                self.advance_char();
                let mut code: u32 = 0;
                let mut count = 0;
                loop {
                    match self.peek_byte() {
                        Some(b'}') if count > 0 => {
                            self.advance_char();
                            break;
                        }
                        Some(d) if d.is_ascii_hexdigit() => {
                            self.advance_char();
                            code = (code << 4) | hex_value(d) as u32;
                            count += 1;
                            if code > 0x10FFFF {
                                return Err(self.invalid_escape(start, span.line));
                            }
                        }
                        _ => return Err(self.invalid_escape(start, span.line)),
                    }
                }
                encode_utf8(code, buf);
            }
            b'z' => {
                self.advance_char();
                while self
                    .peek_byte()
                    .is_some_and(|c| matches!(c, b' ' | b'\t' | b'\n' | b'\r' | b'\x0B' | b'\x0C'))
                {
                    self.advance_char();
                }
            }
            b'0'..=b'9' => {
                let mut value: u32 = 0;
                for _ in 0..3 {
                    match self.peek_byte() {
                        Some(d) if d.is_ascii_digit() => {
                            self.advance_char();
                            value = value * 10 + (d - b'0') as u32;
                        }
                        _ => break,
                    }
                }
                if value > 255 {
                    return Err(self.invalid_escape(start, span.line));
                }
                buf.push(value as u8);
            }
            _ => return Err(self.invalid_escape(start, span.line)),
        }
        Ok(())
    }

    fn scan_long_content(&mut self, level: usize, line: u32, code: ErrorCode) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        // A newline right after the opener is skipped
        if matches!(self.peek_byte(), Some(b'\n') | Some(b'\r')) {
            self.advance_char();
        }
        loop {
            match self.peek_byte() {
                None => {
                    let what = if code == ErrorCode::UnfinishedComment {
                        "comment"
                    } else {
                        "long string"
                    };
                    return Err(self.error(code, line, format!("unfinished {what} near <eof>")));
                }
                Some(b']') if self.closes_long_bracket(level) => {
                    for _ in 0..level + 2 {
                        self.advance_char();
                    }
                    return Ok(buf);
                }
                Some(b'\n') | Some(b'\r') => {
                    self.advance_char();
                    buf.push(b'\n');
                }
                Some(ch) => {
                    self.advance_char();
                    buf.push(ch);
                }
            }
        }
    }

    fn closes_long_bracket(&self, level: usize) -> bool {
        (1..=level).all(|i| self.peek_at(i) == Some(b'=')) && self.peek_at(level + 1) == Some(b']')
    }
}

impl TokenStream for Lexer<'_> {
    fn current_token(&self) -> &SpannedToken {
        &self.current
    }

    fn advance(&mut self, strings: &mut StringInterner) -> Result<SpannedToken> {
        let next = match self.lookahead.pop_front() {
            Some(tok) => tok,
            None => self.scan_token(strings)?,
        };
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn peek(&mut self, n: usize, strings: &mut StringInterner) -> Result<&SpannedToken> {
        if n == 0 {
            return Ok(&self.current);
        }
        while self.lookahead.len() < n {
            let tok = self.scan_token(strings)?;
            self.lookahead.push_back(tok);
        }
        Ok(&self.lookahead[n - 1])
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}

fn encode_utf8(code: u32, buf: &mut Vec<u8>) {
    match char::from_u32(code) {
        Some(c) => {
            let mut tmp = [0u8; 4];
            buf.extend_from_slice(c.encode_utf8(&mut tmp).as_bytes());
        }
        // Surrogates: emit the raw three-byte form
        None => {
            buf.push(0xE0 | (code >> 12) as u8);
            buf.push(0x80 | ((code >> 6) & 0x3F) as u8);
            buf.push(0x80 | (code & 0x3F) as u8);
        }
    }
}

fn hex_value(ch: u8) -> u8 {
    match ch {
        b'0'..=b'9' => ch - b'0',
        b'a'..=b'f' => ch - b'a' + 10,
        b'A'..=b'F' => ch - b'A' + 10,
        _ => 0,
    }
}

/// Parse the part of a hex literal after `0x`: digits, optional fraction,
/// optional binary exponent. Integers wrap modulo 2^64 like the reference.
fn parse_hex(text: &[u8]) -> Option<f64> {
    let (mantissa, exponent) = match text.iter().position(|&c| c == b'p' || c == b'P') {
        Some(p) => (&text[..p], Some(&text[p + 1..])),
        None => (text, None),
    };
    let (int_part, frac_part) = match mantissa.iter().position(|&c| c == b'.') {
        Some(d) => (&mantissa[..d], &mantissa[d + 1..]),
        None => (mantissa, &[][..]),
    };

    let mut value = if frac_part.is_empty() && exponent.is_none() {
        let mut acc: u64 = 0;
        for &ch in int_part {
            acc = acc.wrapping_mul(16).wrapping_add(hex_value(ch) as u64);
        }
        acc as f64
    } else {
        int_part
            .iter()
            .fold(0.0f64, |acc, &ch| acc * 16.0 + hex_value(ch) as f64)
    };
    let mut place = 1.0 / 16.0;
    for &ch in frac_part {
        value += hex_value(ch) as f64 * place;
        place /= 16.0;
    }
    if let Some(exp) = exponent {
        let exp: i32 = std::str::from_utf8(exp).ok()?.parse().ok()?;
        value *= 2.0f64.powi(exp);
    }
    Some(value)
}
