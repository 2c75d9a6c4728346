use super::helpers::*;

#[test]
fn e2e_program_fizzbuzz() {
    let src = "
        for i = 1, 15 do
            if i % 15 == 0 then print('FizzBuzz')
            elseif i % 3 == 0 then print('Fizz')
            elseif i % 5 == 0 then print('Buzz')
            else print(i) end
        end
    ";
    let out = run_output(src);
    assert_eq!(out.len(), 15);
    assert_eq!(out[2], "Fizz");
    assert_eq!(out[4], "Buzz");
    assert_eq!(out[13], "14");
    assert_eq!(out[14], "FizzBuzz");
}

#[test]
fn e2e_program_bubble_sort() {
    let src = "
        local t = {5, 3, 8, 1, 9, 2}
        local n = #t
        for i = 1, n - 1 do
            for j = 1, n - i do
                if t[j] > t[j + 1] then
                    t[j], t[j + 1] = t[j + 1], t[j]
                end
            end
        end
        return t[1], t[2], t[3], t[4], t[5], t[6]
    ";
    let r = run_lua(src);
    let expected = [1.0, 2.0, 3.0, 5.0, 8.0, 9.0];
    for (i, e) in expected.iter().enumerate() {
        assert_num(&r, i, *e);
    }
}

#[test]
fn e2e_program_string_builder() {
    let src = "
        local parts = {}
        for i = 1, 4 do parts[#parts + 1] = tostring(i * i) end
        local s = ''
        for _, p in ipairs(parts) do
            if s ~= '' then s = s .. ',' end
            s = s .. p
        end
        return s
    ";
    assert_str(&run_lua(src), 0, "1,4,9,16");
}

#[test]
fn e2e_program_memoized_fib() {
    let src = "
        local memo = {}
        local function fib(n)
            if n <= 2 then return 1 end
            local v = memo[n]
            if v then return v end
            v = fib(n - 1) + fib(n - 2)
            memo[n] = v
            return v
        end
        return fib(60)
    ";
    assert_num(&run_lua(src), 0, 1548008755920.0);
}

#[test]
fn e2e_program_object_with_closures() {
    let src = "
        local function Stack()
            local items, n = {}, 0
            local self = {}
            function self.push(v) n = n + 1 items[n] = v end
            function self.pop()
                local v = items[n]
                items[n] = nil
                n = n - 1
                return v
            end
            function self.size() return n end
            return self
        end
        local s = Stack()
        s.push('a') s.push('b') s.push('c')
        local top = s.pop()
        return top, s.size()
    ";
    let r = run_lua(src);
    assert_str(&r, 0, "c");
    assert_num(&r, 1, 2.0);
}

#[test]
fn e2e_program_while_with_counter() {
    let src = "
        local count, x = 0, 100
        while x > 1 do
            if x % 2 == 0 then x = x / 2 else x = 3 * x + 1 end
            count = count + 1
        end
        return count
    ";
    assert_num(&run_lua(src), 0, 25.0);
}

#[test]
fn e2e_program_word_count() {
    let src = "
        local words = {'a', 'b', 'a', 'c', 'b', 'a'}
        local counts = {}
        for _, w in ipairs(words) do counts[w] = (counts[w] or 0) + 1 end
        return counts.a, counts.b, counts.c
    ";
    let r = run_lua(src);
    assert_num(&r, 0, 3.0);
    assert_num(&r, 1, 2.0);
    assert_num(&r, 2, 1.0);
}

#[test]
fn e2e_program_varargs_sum() {
    let src = "
        local function sum(...)
            local total = 0
            for i = 1, select('#', ...) do total = total + select(i, ...) end
            return total
        end
        return sum(), sum(1), sum(1, 2, 3, 4)
    ";
    let r = run_lua(src);
    assert_num(&r, 0, 0.0);
    assert_num(&r, 1, 1.0);
    assert_num(&r, 2, 10.0);
}

#[test]
fn e2e_program_globals_across_functions() {
    let src = "
        counter = 0
        function bump(k) counter = counter + (k or 1) end
        bump() bump(5)
        return counter
    ";
    assert_num(&run_lua(src), 0, 6.0);
}

#[test]
fn e2e_program_print_multiple_values() {
    let out = run_output("print(1, 'two', nil, true)");
    assert_eq!(out, vec!["1\ttwo\tnil\ttrue".to_string()]);
}

#[test]
fn e2e_program_guarded_field_default() {
    let r = run_lua("local t = nil; local v = t and t.v or \"default\" return v");
    assert_str(&r, 0, "default");
    let r = run_lua("local t = {v = 'set'}; local v = t and t.v or \"default\" return v");
    assert_str(&r, 0, "set");
}
