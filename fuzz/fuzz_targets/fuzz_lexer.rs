#![no_main]

use ember_compiler::intern::StringInterner;
use ember_compiler::lexer::Lexer;
use ember_compiler::token::{Token, TokenStream};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut strings = StringInterner::new();
    let Ok(mut lexer) = Lexer::new(data, &mut strings) else {
        return;
    };
    let mut last_line = 0;
    while let Ok(tok) = lexer.advance(&mut strings) {
        assert!(tok.span.line >= last_line, "line numbers went backwards");
        last_line = tok.span.line;
        if tok.token == Token::Eof {
            break;
        }
    }
});
