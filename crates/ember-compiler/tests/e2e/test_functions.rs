use super::helpers::*;
use ember_compiler::opcode::Op;
use ember_compiler::proto::UpvalBinding;

#[test]
fn e2e_function_no_params() {
    let c = compile_str("function f() end");
    assert!(has_op(&c.main, Op::FNew));
    assert_eq!(c.main.protos.len(), 1);
    assert_eq!(c.main.protos[0].num_params, 0);
}

#[test]
fn e2e_function_vararg() {
    let c = compile_str("function f(...) return ... end");
    assert!(c.main.protos[0].is_vararg);
    assert!(has_op(&c.main.protos[0], Op::VArg));
    assert!(c.main.is_vararg);
}

#[test]
fn e2e_method_definition_adds_self() {
    let c = compile_str("local t = {} function t:m(x) return self, x end");
    assert_eq!(c.main.protos[0].num_params, 2);
}

#[test]
fn e2e_upvalue_bindings() {
    let c = compile_str("local x = 1\nlocal function f() return function() return x end end");
    let f = &c.main.protos[0];
    assert_eq!(f.upvalues, vec![UpvalBinding::ParentLocal(0)]);
    assert_eq!(f.protos[0].upvalues, vec![UpvalBinding::ParentUpvalue(0)]);
}

#[test]
fn e2e_call_results() {
    let r = run_lua("local function f(a, b) return a + b, a * b end return f(3, 4)");
    assert_num(&r, 0, 7.0);
    assert_num(&r, 1, 12.0);
}

#[test]
fn e2e_multiple_results_truncated_in_middle() {
    let src = "
        local function two() return 1, 2 end
        local t = {two(), two()}
        return #t
    ";
    assert_num(&run_lua(src), 0, 3.0);
}

#[test]
fn e2e_multiple_results_expand_at_end() {
    let r = run_lua("local function three() return 1, 2, 3 end return 0, three()");
    assert_eq!(r.len(), 4);
    assert_num(&r, 3, 3.0);
}

#[test]
fn e2e_parenthesized_call_yields_one_value() {
    let r = run_lua("local function two() return 1, 2 end return (two())");
    assert_eq!(r.len(), 1);
}

#[test]
fn e2e_varargs() {
    let src = "
        local function count(...) return select('#', ...) end
        local function second(...) local a, b = ... return b end
        return count(1, nil, 3), second('x', 'y', 'z')
    ";
    let r = run_lua(src);
    assert_num(&r, 0, 3.0);
    assert_str(&r, 1, "y");
}

#[test]
fn e2e_varargs_in_table() {
    let r = run_lua("local function pack(...) return {...} end local t = pack(5, 6, 7) return #t, t[3]");
    assert_num(&r, 0, 3.0);
    assert_num(&r, 1, 7.0);
}

#[test]
fn e2e_recursion() {
    let src = "
        local function fib(n) if n < 2 then return n end return fib(n - 1) + fib(n - 2) end
        return fib(15)
    ";
    assert_num(&run_lua(src), 0, 610.0);
}

#[test]
fn e2e_tail_call() {
    let c = compile_str("local function f(n) return g(n) end");
    assert!(has_op(&c.main.protos[0], Op::CallT));
    let src = "
        local function loop(n, acc) if n == 0 then return acc end return loop(n - 1, acc + n) end
        return loop(30, 0)
    ";
    assert_num(&run_lua(src), 0, 465.0);
}

#[test]
fn e2e_closure_counter() {
    let src = "
        local function counter()
            local n = 0
            return function() n = n + 1 return n end
        end
        local a, b = counter(), counter()
        a() a()
        return a(), b()
    ";
    let r = run_lua(src);
    assert_num(&r, 0, 3.0);
    assert_num(&r, 1, 1.0);
}

#[test]
fn e2e_closures_share_upvalue() {
    let src = "
        local get, set
        do
            local v = 1
            get = function() return v end
            set = function(x) v = x end
        end
        set(9)
        return get()
    ";
    assert_num(&run_lua(src), 0, 9.0);
}

#[test]
fn e2e_loop_closures_capture_fresh_variable() {
    let src = "
        local fs = {}
        for i = 1, 3 do fs[i] = function() return i end end
        return fs[1]() + fs[2]() * 10 + fs[3]() * 100
    ";
    assert_num(&run_lua(src), 0, 321.0);
}

#[test]
fn e2e_while_closures_capture_fresh_local() {
    let src = "
        local fs, i = {}, 0
        while i < 3 do
            i = i + 1
            local j = i
            fs[i] = function() return j end
        end
        return fs[1]() + fs[3]()
    ";
    assert_num(&run_lua(src), 0, 4.0);
}

#[test]
fn e2e_method_call_passes_self() {
    let src = "
        local acc = {total = 0}
        function acc:add(n) self.total = self.total + n return self end
        acc:add(2):add(5)
        return acc.total
    ";
    assert_num(&run_lua(src), 0, 7.0);
}

#[test]
fn e2e_string_call_sugar() {
    let r = run_lua("local function id(x) return x end return id 'hi', id {1}");
    assert_str(&r, 0, "hi");
}
