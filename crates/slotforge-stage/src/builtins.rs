//! Built-in scalar functions and aggregates recognised by the execution engine.

/// Accepted argument counts for a built-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Range(usize, usize),
}

impl Arity {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Exact(k) => n == k,
            Arity::AtLeast(k) => n >= k,
            Arity::Range(lo, hi) => (lo..=hi).contains(&n),
        }
    }

    pub fn describe(self) -> String {
        match self {
            Arity::Exact(k) => k.to_string(),
            Arity::AtLeast(k) => format!("at least {k}"),
            Arity::Range(lo, hi) => format!("{lo} to {hi}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Builtin {
    pub name: &'static str,
    pub arity: Arity,
}

const fn b(name: &'static str, arity: Arity) -> Builtin {
    Builtin { name, arity }
}

static SCALARS: &[Builtin] = &[
    b("getField", Arity::Exact(2)),
    b("getElement", Arity::Exact(2)),
    b("getArraySize", Arity::Exact(1)),
    b("traverseP", Arity::Exact(3)),
    b("traverseF", Arity::Exact(3)),
    b("exists", Arity::Exact(1)),
    b("isArray", Arity::Exact(1)),
    b("isObject", Arity::Exact(1)),
    b("isString", Arity::Exact(1)),
    b("isNumber", Arity::Exact(1)),
    b("isNull", Arity::Exact(1)),
    b("isMember", Arity::Exact(2)),
    b("typeMatch", Arity::Exact(2)),
    b("coerceToBool", Arity::Exact(1)),
    b("abs", Arity::Exact(1)),
    b("concat", Arity::AtLeast(1)),
    b("newObj", Arity::AtLeast(0)),
    b("newArray", Arity::AtLeast(0)),
    b("shardFilter", Arity::Exact(2)),
    b("shardHash", Arity::Exact(1)),
    b("ks", Arity::AtLeast(3)),
];

static AGGREGATES: &[Builtin] = &[
    b("sum", Arity::Exact(1)),
    b("min", Arity::Exact(1)),
    b("max", Arity::Exact(1)),
    b("first", Arity::Exact(1)),
    b("last", Arity::Exact(1)),
    b("addToArray", Arity::Exact(1)),
    b("addToSet", Arity::Exact(1)),
    b("count", Arity::Range(0, 1)),
];

/// Scalar built-in by exact name.
pub fn lookup(name: &str) -> Option<&'static Builtin> {
    SCALARS.iter().find(|f| f.name == name)
}

/// Aggregate by its plan-level name (`$sum`) or engine name (`sum`).
pub fn lookup_aggregate(name: &str) -> Option<&'static Builtin> {
    let bare = name.strip_prefix('$').unwrap_or(name);
    AGGREGATES.iter().find(|f| f.name == bare)
}
