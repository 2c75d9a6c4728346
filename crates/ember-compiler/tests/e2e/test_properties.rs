use super::helpers::*;
use super::vm::Value;
use ember_compiler::opcode::{Op, NO_REG};
use ember_compiler::proto::Prototype;
use proptest::array::uniform3;
use proptest::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Lit {
    Nil,
    False,
    True,
    Num(i8),
}

impl Lit {
    fn truthy(self) -> bool {
        !matches!(self, Lit::Nil | Lit::False)
    }

    fn source(self) -> String {
        match self {
            Lit::Nil => "nil".into(),
            Lit::False => "false".into(),
            Lit::True => "true".into(),
            Lit::Num(n) => format!("({n})"),
        }
    }

    fn value(self) -> Value {
        match self {
            Lit::Nil => Value::Nil,
            Lit::False => Value::Bool(false),
            Lit::True => Value::Bool(true),
            Lit::Num(n) => Value::Num(n as f64),
        }
    }
}

/// Boolean expression over three locals and literals.
#[derive(Clone, Debug)]
enum Cond {
    Lit(Lit),
    Var(usize),
    Not(Box<Cond>),
    And(Box<Cond>, Box<Cond>),
    Or(Box<Cond>, Box<Cond>),
    Less(usize, i8),
}

impl Cond {
    fn source(&self) -> String {
        match self {
            Cond::Lit(l) => l.source(),
            Cond::Var(i) => format!("v{i}"),
            Cond::Not(a) => format!("(not {})", a.source()),
            Cond::And(a, b) => format!("({} and {})", a.source(), b.source()),
            Cond::Or(a, b) => format!("({} or {})", a.source(), b.source()),
            Cond::Less(i, n) => format!("(n{i} < {n})"),
        }
    }

    fn eval(&self, vars: &[Lit; 3], nums: &[i8; 3]) -> Lit {
        let bool_lit = |b: bool| if b { Lit::True } else { Lit::False };
        match self {
            Cond::Lit(l) => *l,
            Cond::Var(i) => vars[*i],
            Cond::Not(a) => bool_lit(!a.eval(vars, nums).truthy()),
            Cond::And(a, b) => {
                let x = a.eval(vars, nums);
                if x.truthy() {
                    b.eval(vars, nums)
                } else {
                    x
                }
            }
            Cond::Or(a, b) => {
                let x = a.eval(vars, nums);
                if x.truthy() {
                    x
                } else {
                    b.eval(vars, nums)
                }
            }
            Cond::Less(i, n) => bool_lit(nums[*i] < *n),
        }
    }
}

/// Arithmetic tree over small integer literals.
#[derive(Clone, Debug)]
enum Arith {
    Leaf(i8),
    Bin(char, Box<Arith>, Box<Arith>),
    Neg(Box<Arith>),
}

impl Arith {
    fn source(&self, leaf: &dyn Fn(i8) -> String) -> String {
        match self {
            Arith::Leaf(n) => leaf(*n),
            Arith::Bin(op, a, b) => format!("({} {op} {})", a.source(leaf), b.source(leaf)),
            Arith::Neg(a) => format!("(-{})", a.source(leaf)),
        }
    }
}

fn lit_strategy() -> impl Strategy<Value = Lit> {
    prop_oneof![
        Just(Lit::Nil),
        Just(Lit::False),
        Just(Lit::True),
        (-3i8..=3).prop_map(Lit::Num),
    ]
}

fn cond_strategy() -> impl Strategy<Value = Cond> {
    let leaf = prop_oneof![
        lit_strategy().prop_map(Cond::Lit),
        (0..3usize).prop_map(Cond::Var),
        (0..3usize, -3i8..=3).prop_map(|(i, n)| Cond::Less(i, n)),
    ];
    leaf.prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            inner.clone().prop_map(|c| Cond::Not(Box::new(c))),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| Cond::And(Box::new(a), Box::new(b))),
            (inner.clone(), inner).prop_map(|(a, b)| Cond::Or(Box::new(a), Box::new(b))),
        ]
    })
}

fn arith_strategy() -> impl Strategy<Value = Arith> {
    let leaf = (-20i8..=20).prop_map(Arith::Leaf);
    leaf.prop_recursive(4, 16, 2, |inner| {
        prop_oneof![
            inner.clone().prop_map(|a| Arith::Neg(Box::new(a))),
            (prop_oneof![Just('+'), Just('-'), Just('*')], inner.clone(), inner)
                .prop_map(|(op, a, b)| Arith::Bin(op, Box::new(a), Box::new(b))),
        ]
    })
}

fn prelude(vars: &[Lit; 3], nums: &[i8; 3]) -> String {
    format!(
        "local v0, v1, v2 = {}, {}, {}\nlocal n0, n1, n2 = {}, {}, {}\n",
        vars[0].source(),
        vars[1].source(),
        vars[2].source(),
        nums[0],
        nums[1],
        nums[2]
    )
}

/// Every jump lands inside the code and every test is followed by a jump.
fn check_jumps(p: &Prototype) -> Result<(), TestCaseError> {
    let len = p.code.len() as isize;
    for (pc, ins) in p.code.iter().enumerate() {
        let op = ins.op();
        if op.is_jump() {
            let target = ins.jump_target(pc);
            prop_assert!((0..len).contains(&target), "jump at {pc} to {target}");
        }
        if op.is_test() {
            let next = p.code.get(pc + 1).map(|i| i.op());
            prop_assert!(matches!(next, Some(Op::Jmp) | Some(Op::UClo)), "test at {pc}");
        }
        if !matches!(op, Op::Jmp | Op::UClo | Op::Loop) && !op.is_test() {
            prop_assert!(ins.a() != NO_REG, "unpatched load at {pc}");
        }
    }
    for child in &p.protos {
        check_jumps(child)?;
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_short_circuit_value(
        cond in cond_strategy(),
        vars in uniform3(lit_strategy()),
        nums in uniform3(-3i8..=3),
    ) {
        let src = format!("{}return {}", prelude(&vars, &nums), cond.source());
        let r = run_lua(&src);
        prop_assert_eq!(r.len(), 1);
        prop_assert_eq!(&r[0], &cond.eval(&vars, &nums).value(), "{}", src);
    }

    #[test]
    fn prop_short_circuit_branch(
        cond in cond_strategy(),
        vars in uniform3(lit_strategy()),
        nums in uniform3(-3i8..=3),
    ) {
        let src = format!(
            "{}if {} then return 'T' else return 'F' end",
            prelude(&vars, &nums),
            cond.source()
        );
        let expected = if cond.eval(&vars, &nums).truthy() { "T" } else { "F" };
        let r = run_lua(&src);
        prop_assert_eq!(r[0].as_str(), Some(expected.to_string()), "{}", src);
    }

    #[test]
    fn prop_folding_matches_runtime(tree in arith_strategy()) {
        let folded = format!("return {}", tree.source(&|n| format!("({n})")));
        let runtime = format!(
            "local function id(x) return x end return {}",
            tree.source(&|n| format!("id({n})"))
        );
        let chunk = compile_str(&folded);
        for n in &chunk.main.numbers {
            prop_assert!(!n.is_nan() && !(*n == 0.0 && n.is_sign_negative()), "{}", folded);
        }
        let a = run_lua(&folded);
        let b = run_lua(&runtime);
        prop_assert_eq!(a[0].as_num(), b[0].as_num(), "{}", folded);
    }

    #[test]
    fn prop_jumps_in_range(
        cond in cond_strategy(),
        vars in uniform3(lit_strategy()),
        nums in uniform3(-3i8..=3),
    ) {
        let c = cond.source();
        let src = format!(
            "{}local x = {c}\nwhile {c} do if {c} then break end local y = {c} end\nrepeat local z = {c} until z or {c}\nreturn x ?? {c}",
            prelude(&vars, &nums),
        );
        let chunk = compile_str(&src);
        check_jumps(&chunk.main)?;
    }

    #[test]
    fn prop_scopes_release_registers(depth in 1usize..6, locals in 1usize..4) {
        let mut src = String::new();
        for d in 0..depth {
            for l in 0..locals {
                src.push_str(&format!("local a{d}_{l} = {l}\n"));
            }
            src.push_str(match d % 3 {
                0 => "do\n",
                1 => "if a0_0 then\n",
                _ => "for i = 1, 1 do\n",
            });
        }
        for _ in 0..depth {
            src.push_str("end\n");
        }
        src.push_str("local last = 7\nreturn last");
        let chunk = compile_str(&src);
        let ret = chunk.main.code[chunk.main.code.len() - 1];
        prop_assert_eq!(ret.op(), Op::Ret1);
        prop_assert_eq!(ret.a() as usize, locals);
        assert_num(&run_lua(&src), 0, 7.0);
    }
}
