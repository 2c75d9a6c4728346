use super::helpers::*;
use ember_compiler::opcode::Op;
use ember_compiler::{CompileOptions, FalsyPolicy};

fn canonical() -> CompileOptions {
    CompileOptions::new("=test").falsy(FalsyPolicy::canonical())
}

// --- defer ---

#[test]
fn e2e_defer_runs_in_reverse_order() {
    let src = "
        local function f()
            defer print('a') end
            defer print('b') end
            print('body')
        end
        f()
    ";
    assert_eq!(run_output(src), vec!["body", "b", "a"]);
}

#[test]
fn e2e_defer_runs_at_block_exit() {
    let out = run_output("do defer print('inner') end print('in block') end print('after')");
    assert_eq!(out, vec!["in block", "inner", "after"]);
}

#[test]
fn e2e_defer_arguments_evaluated_at_declaration() {
    let out = run_output("local x = 1 defer (v) print(v, x) end (x) x = 2");
    assert_eq!(out, vec!["1\t2"]);
}

#[test]
fn e2e_defer_does_not_change_returned_value() {
    let src = "
        local function f()
            local x = 1
            defer x = 2 end
            return x
        end
        return f()
    ";
    assert_num(&run_lua(src), 0, 1.0);
}

#[test]
fn e2e_defer_runs_after_return_value_computed() {
    let src = "
        local function g() print('g') return 'value' end
        local function f()
            defer print('deferred') end
            return g()
        end
        print(f())
    ";
    assert_eq!(run_output(src), vec!["g", "deferred", "value"]);
}

#[test]
fn e2e_defer_suppresses_tail_call() {
    let c = compile_str("local function f() defer print(1) end return g() end");
    assert!(!has_op(&c.main.protos[0], Op::CallT));
    assert!(has_op(&c.main.protos[0], Op::Call));
}

#[test]
fn e2e_defer_per_iteration_and_on_break() {
    let src = "
        for i = 1, 3 do
            defer print('d' .. i) end
            if i == 2 then break end
            print('body' .. i)
        end
    ";
    assert_eq!(run_output(src), vec!["body1", "d1", "d2"]);
}

#[test]
fn e2e_defer_on_early_return() {
    let src = "
        local function f(early)
            defer print('cleanup') end
            if early then return 'early' end
            print('late')
            return 'late'
        end
        print(f(true))
        print(f(false))
    ";
    assert_eq!(
        run_output(src),
        vec!["cleanup", "early", "late", "cleanup", "late"]
    );
}

#[test]
fn e2e_defer_keeps_all_call_results() {
    let src = "
        local function f() return 1, 2 end
        local function g()
            defer print('d') end
            return f()
        end
        return g()
    ";
    let (r, out) = run_with(src, &CompileOptions::new("=test"));
    assert_eq!(r.len(), 2);
    assert_num(&r, 0, 1.0);
    assert_num(&r, 1, 2.0);
    assert_eq!(out, vec!["d"]);
}

#[test]
fn e2e_defer_keeps_varargs_and_leading_values() {
    let src = "
        local function g(...)
            defer (n) print(n) end (select('#', ...))
            return 'first', ...
        end
        return g(7, 8, 9)
    ";
    let (r, out) = run_with(src, &CompileOptions::new("=test"));
    assert_eq!(r.len(), 4);
    assert_str(&r, 0, "first");
    assert_num(&r, 1, 7.0);
    assert_num(&r, 3, 9.0);
    assert_eq!(out, vec!["3"]);
}

#[test]
fn e2e_defer_in_block_keeps_main_chunk_results() {
    let r = run_lua("local function f() return 1, 2 end do defer print('x') end end return f()");
    assert_eq!(r.len(), 2);
    assert_num(&r, 1, 2.0);
}

// --- continue ---

#[test]
fn e2e_continue_in_numeric_for() {
    let r = run_lua("local s = 0 for i = 1, 5 do if i % 2 == 0 then continue end s = s + i end return s");
    assert_num(&r, 0, 9.0);
}

#[test]
fn e2e_continue_in_while() {
    let src = "
        local i, s = 0, 0
        while i < 5 do
            i = i + 1
            if i == 3 then continue end
            s = s + i
        end
        return s
    ";
    assert_num(&run_lua(src), 0, 12.0);
}

#[test]
fn e2e_continue_in_repeat_reaches_condition() {
    let src = "
        local i, s = 0, 0
        repeat
            i = i + 1
            if i == 2 then continue end
            s = s + i
        until i >= 4
        return s
    ";
    assert_num(&run_lua(src), 0, 8.0);
}

#[test]
fn e2e_continue_in_generic_for() {
    let src = "
        local out = ''
        for _, v in ipairs({'a', 'b', 'c'}) do
            if v == 'b' then continue end
            out = out .. v
        end
        return out
    ";
    assert_str(&run_lua(src), 0, "ac");
}

#[test]
fn e2e_continue_runs_loop_body_defers() {
    let src = "
        for i = 1, 3 do
            defer print(i) end
            if i == 2 then continue end
            print('x' .. i)
        end
    ";
    assert_eq!(run_output(src), vec!["x1", "1", "2", "x3", "3"]);
}

#[test]
fn e2e_continue_closes_captured_locals() {
    let src = "
        local fs = {}
        for i = 1, 3 do
            local j = i * 10
            fs[i] = function() return j end
            if i < 3 then continue end
        end
        return fs[1]() + fs[2]() + fs[3]()
    ";
    assert_num(&run_lua(src), 0, 60.0);
}

// --- goto ---

#[test]
fn e2e_goto_backward() {
    let src = "
        local i = 1
        ::top::
        if i < 5 then i = i + 1 goto top end
        return i
    ";
    assert_num(&run_lua(src), 0, 5.0);
}

#[test]
fn e2e_goto_forward_skips_code() {
    let out = run_output("goto skip print('no') ::skip:: print('yes')");
    assert_eq!(out, vec!["yes"]);
}

#[test]
fn e2e_goto_out_of_nested_loops() {
    let src = "
        local found
        for i = 1, 3 do
            for j = 1, 3 do
                if i * j == 4 then found = i .. ',' .. j goto done end
            end
        end
        ::done::
        return found
    ";
    assert_str(&run_lua(src), 0, "2,2");
}

// --- compound assignment ---

#[test]
fn e2e_compound_assignment_locals() {
    let r = run_lua("local x = 10 x += 5 x -= 3 x *= 2 x /= 4 x %= 4 return x");
    assert_num(&r, 0, 2.0);
    let r = run_lua("local s = 'a' s ..= 'b' s ..= 1 return s");
    assert_str(&r, 0, "ab1");
}

#[test]
fn e2e_compound_assignment_fields_and_globals() {
    let src = "
        local t = {n = 1, list = {5}}
        t.n += 2
        t['n'] *= 3
        t.list[1] -= 1
        g = 1
        g += 41
        return t.n, t.list[1], g
    ";
    let r = run_lua(src);
    assert_num(&r, 0, 9.0);
    assert_num(&r, 1, 4.0);
    assert_num(&r, 2, 42.0);
}

#[test]
fn e2e_compound_assignment_evaluates_table_once() {
    let src = "
        local calls = 0
        local t = {v = 1}
        local function get() calls = calls + 1 return t end
        get().v += 10
        return t.v, calls
    ";
    let r = run_lua(src);
    assert_num(&r, 0, 11.0);
    assert_num(&r, 1, 1.0);
}

#[test]
fn e2e_increment() {
    let r = run_lua("local n = 1 n++ n++ local t = {c = 0} t.c++ return n, t.c");
    assert_num(&r, 0, 3.0);
    assert_num(&r, 1, 1.0);
}

// --- bitwise operators ---

#[test]
fn e2e_bitwise_operators() {
    let r = run_lua("local a, b = 5, 3 return a & b, a | b, a ~ b, ~a, 1 << 4, 256 >> 4");
    let expected = [1.0, 7.0, 6.0, -6.0, 16.0, 16.0];
    for (i, e) in expected.iter().enumerate() {
        assert_num(&r, i, *e);
    }
}

#[test]
fn e2e_bitwise_lowered_to_library_calls() {
    let c = compile_with(
        "local a return a & 1",
        &CompileOptions::new("=test").bit_library("bit32"),
    );
    assert!(has_op(&c.main, Op::GGet));
    assert!(has_op(&c.main, Op::TGetS));
    assert!(has_op(&c.main, Op::Call));
    let names: Vec<&[u8]> = c.main.strings.iter().map(|&id| c.string(id)).collect();
    assert!(names.contains(&b"bit32".as_slice()));
    assert!(names.contains(&b"band".as_slice()));
}

#[test]
fn e2e_bitwise_mixed_with_arithmetic() {
    let r = run_lua("local x = 6 return (x & 3) + 1, (x | 1) * 2");
    assert_num(&r, 0, 3.0);
    assert_num(&r, 1, 14.0);
}

// --- `??`, `??=` and the ternary ---

#[test]
fn e2e_if_empty_nil_takes_default() {
    let r = run_lua("local a return a ?? 'default', 'x' ?? 'default'");
    assert_str(&r, 0, "default");
    assert_str(&r, 1, "x");
}

#[test]
fn e2e_if_empty_follows_policy() {
    let src = "local z, s, f = 0, '', false return z ?? 'e', s ?? 'e', f ?? 'e'";
    let r = run_lua(src);
    assert_str(&r, 0, "e");
    assert_str(&r, 1, "e");
    assert_str(&r, 2, "e");

    let (r, _) = run_with(src, &canonical());
    assert_num(&r, 0, 0.0);
    assert_str(&r, 1, "");
    assert_str(&r, 2, "e");
}

#[test]
fn e2e_if_empty_right_side_not_evaluated() {
    let out = run_output("local function side() print('side') return 1 end local a = 2 local b = a ?? side() print(b)");
    assert_eq!(out, vec!["2"]);
}

#[test]
fn e2e_if_empty_constant_left_after_branch() {
    let src = "
        local function k(a)
            if a then a = 1 end
            local b = 'kept' ?? nil and g()
            return b, a
        end
        local x, y = k(nil)
        return x, y, k(true)
    ";
    let r = run_lua(src);
    assert_str(&r, 0, "kept");
    assert_nil(&r, 1);
    assert_str(&r, 2, "kept");
    assert_num(&r, 3, 1.0);
}

#[test]
fn e2e_if_empty_assign() {
    let src = "
        local a
        a ??= 5
        local b = 3
        b ??= 9
        local t = {}
        t.x ??= 1
        t.x ??= 2
        return a, b, t.x
    ";
    let r = run_lua(src);
    assert_num(&r, 0, 5.0);
    assert_num(&r, 1, 3.0);
    assert_num(&r, 2, 1.0);
}

#[test]
fn e2e_presence_check_follows_policy() {
    let src = "local z = 0 return z??";
    assert_bool(&run_lua(src), 0, false);
    let (r, _) = run_with(src, &canonical());
    assert_bool(&r, 0, true);
}

#[test]
fn e2e_presence_check_nil_and_constants() {
    let r = run_lua("local x return x??, 0??, ''??, 'k'??, false??");
    assert_bool(&r, 0, false);
    assert_bool(&r, 1, false);
    assert_bool(&r, 2, false);
    assert_bool(&r, 3, true);
    assert_bool(&r, 4, false);

    let (r, _) = run_with("return 0??, ''??, nil??", &canonical());
    assert_bool(&r, 0, true);
    assert_bool(&r, 1, true);
    assert_bool(&r, 2, false);
}

#[test]
fn e2e_presence_check_leaves_operand_alone() {
    let src = "
        local t = { v = 0, w = 'w' }
        local x = 5
        local p = x??
        if t.v?? then print('v') end
        if t.w?? then print('w') end
        return x, p, t.u ?? 'fallback'
    ";
    let (r, out) = run_with(src, &CompileOptions::new("=test"));
    assert_num(&r, 0, 5.0);
    assert_bool(&r, 1, true);
    assert_str(&r, 2, "fallback");
    assert_eq!(out, vec!["w"]);
}

#[test]
fn e2e_ternary() {
    let r = run_lua("local c, n = true, nil return c ? 'yes' :> 'no', n ? 'yes' :> 'no'");
    assert_str(&r, 0, "yes");
    assert_str(&r, 1, "no");
}

#[test]
fn e2e_ternary_follows_policy() {
    let src = "local z = 0 return z ? 'set' :> 'empty'";
    assert_str(&run_lua(src), 0, "empty");
    let (r, _) = run_with(src, &canonical());
    assert_str(&r, 0, "set");
}

#[test]
fn e2e_ternary_evaluates_one_branch() {
    let src = "
        local function a() print('a') return 1 end
        local function b() print('b') return 2 end
        local c = 1
        return c ? a() :> b()
    ";
    let (r, out) = run_with(src, &CompileOptions::new("=test"));
    assert_num(&r, 0, 1.0);
    assert_eq!(out, vec!["a"]);
}

#[test]
fn e2e_and_or_ignore_policy() {
    let r = run_lua("local z = 0 return z or 5, z and 'kept'");
    assert_num(&r, 0, 0.0);
    assert_str(&r, 1, "kept");
}
