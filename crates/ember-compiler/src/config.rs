/// Compiler configuration.

/// Hard limits enforced while compiling a single function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    /// Maximum frame size of one function (registers).
    pub max_slots: u32,
    /// Maximum number of upvalues captured by one function.
    pub max_upvalues: u32,
    /// Maximum number of active locals in one function.
    pub max_locals: u32,
    /// Maximum syntactic nesting depth.
    pub max_nesting: u32,
    /// Maximum entries in each constant pool.
    pub max_constants: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_slots: 250,
            max_upvalues: 60,
            max_locals: 200,
            max_nesting: 200,
            max_constants: 65536,
        }
    }
}

/// A value that may be treated as empty by `??`, `??=` and the ternary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FalsyValue {
    Nil,
    False,
    Zero,
    EmptyString,
}

/// Compile-time view of a constant, used to fold `??` and friends.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConstValue<'a> {
    Nil,
    Bool(bool),
    Num(f64),
    Str(&'a [u8]),
}

/// Which values count as empty for the if-empty operators.
///
/// `nil` and `false` are always empty. The constant folder and the emitted
/// runtime checks both derive from the same policy, so they cannot disagree.
/// `and`/`or` are unaffected and keep plain truthiness.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FalsyPolicy {
    pub zero: bool,
    pub empty_string: bool,
}

impl FalsyPolicy {
    /// Only `nil` and `false`.
    pub const fn canonical() -> Self {
        FalsyPolicy {
            zero: false,
            empty_string: false,
        }
    }

    /// `nil`, `false`, `0` and `""`.
    pub const fn extended() -> Self {
        FalsyPolicy {
            zero: true,
            empty_string: true,
        }
    }

    /// Runtime checks to emit, in order.
    pub fn values(&self) -> impl Iterator<Item = FalsyValue> {
        let extra = [
            (self.zero, FalsyValue::Zero),
            (self.empty_string, FalsyValue::EmptyString),
        ];
        [FalsyValue::Nil, FalsyValue::False].into_iter().chain(
            extra
                .into_iter()
                .filter_map(|(enabled, v)| enabled.then_some(v)),
        )
    }

    pub fn is_falsy(&self, value: ConstValue<'_>) -> bool {
        match value {
            ConstValue::Nil | ConstValue::Bool(false) => true,
            ConstValue::Bool(true) => false,
            ConstValue::Num(n) => self.zero && n == 0.0,
            ConstValue::Str(s) => self.empty_string && s.is_empty(),
        }
    }
}

impl Default for FalsyPolicy {
    fn default() -> Self {
        FalsyPolicy::extended()
    }
}

/// Options for one `compile` call.
#[derive(Clone, Debug, PartialEq)]
pub struct CompileOptions {
    pub chunk_name: String,
    /// Drop line, variable and upvalue-name tables from the output.
    pub strip_debug: bool,
    pub falsy: FalsyPolicy,
    /// Global table that provides `band`, `bor`, `bxor`, `lshift`, `rshift`, `bnot`.
    pub bit_library: String,
    pub limits: Limits,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            chunk_name: "?".to_string(),
            strip_debug: false,
            falsy: FalsyPolicy::default(),
            bit_library: "bit".to_string(),
            limits: Limits::default(),
        }
    }
}

impl CompileOptions {
    pub fn new(chunk_name: impl Into<String>) -> Self {
        CompileOptions {
            chunk_name: chunk_name.into(),
            ..Default::default()
        }
    }

    pub fn strip_debug(mut self, strip: bool) -> Self {
        self.strip_debug = strip;
        self
    }

    pub fn falsy(mut self, policy: FalsyPolicy) -> Self {
        self.falsy = policy;
        self
    }

    pub fn bit_library(mut self, name: impl Into<String>) -> Self {
        self.bit_library = name.into();
        self
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }
}
