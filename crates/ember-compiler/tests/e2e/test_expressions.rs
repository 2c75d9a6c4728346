use super::helpers::*;
use ember_compiler::opcode::{Op, PRI_FALSE, PRI_NIL, PRI_TRUE};

#[test]
fn e2e_return_primitives() {
    let c = compile_str("return nil");
    assert_eq!(c.main.code[0].op(), Op::KPri);
    assert_eq!(c.main.code[0].d(), PRI_NIL);
    let c = compile_str("return true");
    assert_eq!(c.main.code[0].d(), PRI_TRUE);
    let c = compile_str("return false");
    assert_eq!(c.main.code[0].d(), PRI_FALSE);
}

#[test]
fn e2e_small_integer_uses_short_load() {
    let c = compile_str("return 42");
    assert_eq!(c.main.code[0].op(), Op::KShort);
    assert!(c.main.numbers.is_empty());
    let c = compile_str("return -1");
    assert_eq!(c.main.code[0].op(), Op::KShort);
    assert_eq!(c.main.code[0].d() as i16, -1);
}

#[test]
fn e2e_large_and_fractional_numbers_use_pool() {
    let c = compile_str("return 3.25, 100000");
    assert_eq!(count_op(&c.main, Op::KNum), 2);
    assert_eq!(c.main.numbers, vec![3.25, 100000.0]);
}

#[test]
fn e2e_string_constant() {
    let c = compile_str("return \"hello world\"");
    assert_eq!(c.main.code[0].op(), Op::KStr);
    assert_eq!(c.string(c.main.strings[0]), b"hello world");
}

#[test]
fn e2e_constant_folding() {
    let c = compile_str("return 1 + 2 * 3");
    assert_eq!(ops(&c.main), vec![Op::KShort, Op::Ret1]);
    assert_eq!(c.main.code[0].d(), 7);
    let c = compile_str("return not nil");
    assert_eq!(ops(&c.main), vec![Op::KPri, Op::Ret1]);
    assert_eq!(c.main.code[0].d(), PRI_TRUE);
}

#[test]
fn e2e_division_by_zero_not_folded() {
    let c = compile_str("return 0 / 0");
    assert!(has_op(&c.main, Op::DivVN) || has_op(&c.main, Op::DivVV) || has_op(&c.main, Op::DivNV));
    let r = run_lua("local n = 0 / 0 return n ~= n");
    assert_bool(&r, 0, true);
}

#[test]
fn e2e_arithmetic() {
    let r = run_lua("local a, b = 7, 2 return a + b, a - b, a * b, a / b, a % b, a ^ b, -a");
    assert_num(&r, 0, 9.0);
    assert_num(&r, 1, 5.0);
    assert_num(&r, 2, 14.0);
    assert_num(&r, 3, 3.5);
    assert_num(&r, 4, 1.0);
    assert_num(&r, 5, 49.0);
    assert_num(&r, 6, -7.0);
}

#[test]
fn e2e_modulo_follows_divisor_sign() {
    let r = run_lua("local a = -7 return a % 3, 7 % -3");
    assert_num(&r, 0, 2.0);
    assert_num(&r, 1, -2.0);
}

#[test]
fn e2e_constant_on_left() {
    let c = compile_str("local a return 10 - a");
    assert!(has_op(&c.main, Op::SubNV));
    let r = run_lua("local a = 4 return 10 - a, 10 / a");
    assert_num(&r, 0, 6.0);
    assert_num(&r, 1, 2.5);
}

#[test]
fn e2e_comparisons() {
    let src = "local a, b = 1, 2 return a < b, a <= b, a > b, a >= b, a == b, a ~= b";
    let r = run_lua(src);
    let expected = [true, true, false, false, false, true];
    for (i, e) in expected.iter().enumerate() {
        assert_bool(&r, i, *e);
    }
}

#[test]
fn e2e_comparison_against_constants() {
    let c = compile_str("local a if a == 'x' then end if a ~= 3 then end if a == nil then end");
    assert!(has_op(&c.main, Op::IsNeS));
    assert!(has_op(&c.main, Op::IsEqN));
    assert!(has_op(&c.main, Op::IsNeP));
    let r = run_lua("local s = 'x' return s == 'x', s ~= 'x', s == 1, s == nil");
    assert_bool(&r, 0, true);
    assert_bool(&r, 1, false);
    assert_bool(&r, 2, false);
    assert_bool(&r, 3, false);
}

#[test]
fn e2e_string_comparison() {
    let r = run_lua("return 'abc' < 'abd', 'b' <= 'a'");
    assert_bool(&r, 0, true);
    assert_bool(&r, 1, false);
}

#[test]
fn e2e_and_or_values() {
    let r = run_lua("local n, f = nil, false return n or 1, f and 1, 2 and 3, nil or false");
    assert_num(&r, 0, 1.0);
    assert_bool(&r, 1, false);
    assert_num(&r, 2, 3.0);
    assert_bool(&r, 3, false);
}

#[test]
fn e2e_and_or_chain_as_condition() {
    let src = "
        local function check(a, b, c)
            if a and (b or c) then return 'yes' end
            return 'no'
        end
        return check(1, nil, 2), check(1, nil, nil), check(nil, 1, 1)
    ";
    let r = run_lua(src);
    assert_str(&r, 0, "yes");
    assert_str(&r, 1, "no");
    assert_str(&r, 2, "no");
}

#[test]
fn e2e_not_of_comparison() {
    let r = run_lua("local a = 3 return not (a > 2), not not a");
    assert_bool(&r, 0, false);
    assert_bool(&r, 1, true);
}

#[test]
fn e2e_table_constructor_shapes() {
    let c = compile_str("return {}");
    assert_eq!(ops(&c.main), vec![Op::TNew, Op::Ret1]);
    let r = run_lua("local t = {1, 2, x = 'a', [10] = 'b', 3} return #t, t.x, t[10], t[3]");
    assert_num(&r, 0, 3.0);
    assert_str(&r, 1, "a");
    assert_str(&r, 2, "b");
    assert_num(&r, 3, 3.0);
}

#[test]
fn e2e_table_constructor_trailing_call_expands() {
    let c = compile_str("local f return {1, f()}");
    assert!(has_op(&c.main, Op::TSetM));
    let r = run_lua("local function f() return 'a', 'b' end local t = {0, f()} return #t, t[3]");
    assert_num(&r, 0, 3.0);
    assert_str(&r, 1, "b");
}

#[test]
fn e2e_nested_tables() {
    let r = run_lua("local t = {a = {b = {c = 5}}} return t.a.b.c");
    assert_num(&r, 0, 5.0);
}

#[test]
fn e2e_concat_chain() {
    let c = compile_str("local a, b, c return a .. b .. c");
    assert_eq!(count_op(&c.main, Op::Cat), 1);
    let r = run_lua("local a = 'x' return a .. 1 .. 'y' .. 2.5");
    assert_str(&r, 0, "x1y2.5");
}

#[test]
fn e2e_length() {
    let r = run_lua("local t = {1, 2, 3, 4} return #t, #'hello'");
    assert_num(&r, 0, 4.0);
    assert_num(&r, 1, 5.0);
}

#[test]
fn e2e_power_is_right_associative() {
    let r = run_lua("local a = 2 return a ^ 3 ^ 2");
    assert_num(&r, 0, 512.0);
}

#[test]
fn e2e_unary_binds_tighter_than_binary() {
    let r = run_lua("local a = 2 return -a ^ 2, -a + 5");
    assert_num(&r, 0, -4.0);
    assert_num(&r, 1, 3.0);
}

#[test]
fn e2e_long_strings_and_escapes() {
    let r = run_lua("return [[a\nb]], 'tab\\tq\\'', #'\\65\\066'");
    assert_str(&r, 0, "a\nb");
    assert_str(&r, 1, "tab\tq'");
    assert_num(&r, 2, 2.0);
}

#[test]
fn e2e_short_circuit_skips_right_side_effects() {
    let src = "
        hits = 0
        local function bump(v) hits = hits + 1 return v end
        local f, t, n = false, true, nil
        local a = f and bump(1)
        local b = t or bump(2)
        local c = n or bump(3)
        local d = t and bump(4)
        return a, b, c, d, hits
    ";
    let r = run_lua(src);
    assert_bool(&r, 0, false);
    assert_bool(&r, 1, true);
    assert_num(&r, 2, 3.0);
    assert_num(&r, 3, 4.0);
    assert_num(&r, 4, 2.0);
}
