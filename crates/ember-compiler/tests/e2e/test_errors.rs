use super::helpers::*;
use ember_compiler::{ErrorCode, ErrorKind};

#[test]
fn e2e_error_unfinished_string() {
    let err = compile_err("local x = \"hello");
    assert_eq!(err.code, ErrorCode::UnfinishedString);
    assert_eq!(err.kind(), ErrorKind::Syntax);
}

#[test]
fn e2e_error_unfinished_long_string() {
    let err = compile_err("local x = [[abc");
    assert_eq!(err.code, ErrorCode::UnfinishedLongString);
}

#[test]
fn e2e_error_message_carries_chunk_and_line() {
    let err = compile_err("local x = 1\nlocal y = 2\nbreak");
    assert_eq!(err.code, ErrorCode::BreakOutsideLoop);
    assert_eq!(err.line, 3);
    assert_eq!(err.kind(), ErrorKind::Semantic);
    assert!(err.to_string().starts_with("test:3:"), "{err}");
}

#[test]
fn e2e_error_break_in_function_inside_loop() {
    let err = compile_err("while true do\n local f = function() break end\nend");
    assert_eq!(err.code, ErrorCode::BreakOutsideLoop);
    assert_eq!(err.line, 2);
}

#[test]
fn e2e_error_continue_outside_loop() {
    let err = compile_err("if true then continue end");
    assert_eq!(err.code, ErrorCode::ContinueOutsideLoop);
}

#[test]
fn e2e_error_duplicate_label() {
    let err = compile_err("::x:: ::x::");
    assert_eq!(err.code, ErrorCode::DuplicateLabel);
}

#[test]
fn e2e_error_undefined_label() {
    let err = compile_err("do goto missing end");
    assert_eq!(err.code, ErrorCode::UndefinedLabel);
}

#[test]
fn e2e_error_unexpected_symbol() {
    let err = compile_err("return )");
    assert_eq!(err.code, ErrorCode::UnexpectedSymbol);
}

#[test]
fn e2e_error_malformed_number() {
    let err = compile_err("local x = 3x");
    assert_eq!(err.code, ErrorCode::MalformedNumber);
}

#[test]
fn e2e_error_unmatched_block() {
    let err = compile_err("if x then\n\nlocal y = 1");
    assert_eq!(err.code, ErrorCode::UnmatchedBlock);
}

#[test]
fn e2e_error_assign_to_parenthesized() {
    let err = compile_err("local t = {}; (t) = 1");
    assert_eq!(err.code, ErrorCode::InvalidAssignment);
}

#[test]
fn e2e_error_vararg_outside_vararg_function() {
    let err = compile_err("function f() return ... end");
    assert_eq!(err.code, ErrorCode::VarargOutsideVararg);
}

#[test]
fn e2e_error_statement_after_return() {
    let err = compile_err("return 1 local x = 2");
    assert_eq!(err.kind(), ErrorKind::Syntax);
}

#[test]
fn e2e_error_too_many_locals() {
    let mut src = String::new();
    for i in 0..250 {
        src.push_str(&format!("local v{i} = {i}\n"));
    }
    let err = compile_err(&src);
    assert_eq!(err.kind(), ErrorKind::ResourceLimit);
}

#[test]
fn e2e_runtime_errors_surface() {
    let msg = run_lua_err("local t = nil return t.x");
    assert!(msg.contains("attempt to index a nil value"), "{msg}");
    let msg = run_lua_err("error('boom')");
    assert_eq!(msg, "boom");
}

/// Compile on a thread with a 2 MB stack, the default for spawned threads.
fn compile_on_small_stack(src: String) -> Result<(), ErrorCode> {
    std::thread::Builder::new()
        .stack_size(2 << 20)
        .spawn(move || {
            ember_compiler::compile(src.as_bytes(), &ember_compiler::CompileOptions::default())
                .map(|_| ())
                .map_err(|e| e.code)
        })
        .unwrap()
        .join()
        .unwrap()
}

#[test]
fn e2e_error_deep_table_constructors_stay_on_stack() {
    let src = format!("return {}1{}", "{".repeat(199), "}".repeat(199));
    let r = compile_on_small_stack(src);
    assert!(matches!(r, Ok(()) | Err(ErrorCode::NestingTooDeep)), "{r:?}");
}

#[test]
fn e2e_error_deep_call_arguments_stay_on_stack() {
    let src = format!("return {}1{}", "f(".repeat(199), ")".repeat(199));
    let r = compile_on_small_stack(src);
    assert!(matches!(r, Ok(()) | Err(ErrorCode::NestingTooDeep)), "{r:?}");
}

#[test]
fn e2e_error_deep_parentheses_stay_on_stack() {
    let src = format!("return {}1{}", "(".repeat(199), ")".repeat(199));
    let r = compile_on_small_stack(src);
    assert!(matches!(r, Ok(()) | Err(ErrorCode::NestingTooDeep)), "{r:?}");
}

#[test]
fn e2e_moderate_nesting_compiles() {
    let tables = format!("return {}1{}", "{".repeat(40), "}".repeat(40));
    assert!(compile_on_small_stack(tables).is_ok());
    let calls = format!("return {}1{}", "f(".repeat(30), ")".repeat(30));
    assert!(compile_on_small_stack(calls).is_ok());
}
