use super::vm::{Value, Vm};
use ember_compiler::opcode::Op;
use ember_compiler::proto::{Chunk, Prototype};
use ember_compiler::{compile, CompileError, CompileOptions};

/// Compile a source string with default options.
pub fn compile_str(source: &str) -> Chunk {
    compile_with(source, &CompileOptions::new("test"))
}

pub fn compile_with(source: &str, options: &CompileOptions) -> Chunk {
    compile(source.as_bytes(), options).unwrap_or_else(|e| {
        panic!("compile failed: {e}\nsource:\n{source}");
    })
}

/// Compile a source string and expect an error.
pub fn compile_err(source: &str) -> CompileError {
    match compile(source.as_bytes(), &CompileOptions::new("test")) {
        Err(e) => e,
        Ok(_) => panic!("expected compile error, got success\nsource:\n{source}"),
    }
}

/// Check if a prototype contains a specific opcode.
pub fn has_op(proto: &Prototype, op: Op) -> bool {
    proto.code.iter().any(|i| i.op() == op)
}

/// Count occurrences of an opcode in a prototype.
pub fn count_op(proto: &Prototype, op: Op) -> usize {
    proto.code.iter().filter(|i| i.op() == op).count()
}

/// Find the first instruction with a given opcode.
#[allow(dead_code)]
pub fn find_op(proto: &Prototype, op: Op) -> Option<usize> {
    proto.code.iter().position(|i| i.op() == op)
}

pub fn ops(proto: &Prototype) -> Vec<Op> {
    proto.code.iter().map(|i| i.op()).collect()
}

/// Compile and execute source, returning its results.
pub fn run_lua(source: &str) -> Vec<Value> {
    run_with(source, &CompileOptions::new("=test")).0
}

/// Compile and execute, also returning everything `print` wrote.
pub fn run_with(source: &str, options: &CompileOptions) -> (Vec<Value>, Vec<String>) {
    let chunk = compile_with(source, options);
    let mut vm = Vm::new();
    let results = vm
        .run(&chunk)
        .unwrap_or_else(|e| panic!("runtime error: {e}\nsource:\n{source}"));
    (results, vm.output)
}

pub fn run_output(source: &str) -> Vec<String> {
    run_with(source, &CompileOptions::new("=test")).1
}

/// Compile and execute source, expecting a runtime error.
pub fn run_lua_err(source: &str) -> String {
    let chunk = compile_str(source);
    let mut vm = Vm::new();
    match vm.run(&chunk) {
        Err(e) => e,
        Ok(vals) => panic!("expected error, got {} results: {:?}", vals.len(), vals),
    }
}

/// Check that results[idx] is a number with the expected value.
pub fn assert_num(results: &[Value], idx: usize, expected: f64) {
    let val = &results[idx];
    let got = val
        .as_num()
        .unwrap_or_else(|| panic!("result[{idx}] = {:?}, expected number {expected}", val));
    assert!(
        (got - expected).abs() < 1e-10,
        "result[{idx}] = {got}, expected {expected}"
    );
}

/// Check that results[idx] is a boolean with the expected value.
pub fn assert_bool(results: &[Value], idx: usize, expected: bool) {
    assert_eq!(
        results[idx],
        Value::Bool(expected),
        "result[{idx}] = {:?}, expected bool {expected}",
        results[idx]
    );
}

/// Check that results[idx] is nil.
pub fn assert_nil(results: &[Value], idx: usize) {
    assert!(
        results[idx] == Value::Nil,
        "result[{idx}] = {:?}, expected nil",
        results[idx]
    );
}

/// Check that results[idx] is a string with the expected value.
pub fn assert_str(results: &[Value], idx: usize, expected: &str) {
    let val = &results[idx];
    let got = val
        .as_str()
        .unwrap_or_else(|| panic!("result[{idx}] = {:?}, expected string \"{expected}\"", val));
    assert_eq!(got, expected, "result[{idx}] = {got:?}, expected {expected:?}");
}
