//! Typed constant values carried by the ABT and by lowered scalar expressions.
//!
//! A value keeps its exact type tag: an `Int32` never silently becomes an
//! `Int64`, a `Double` keeps its bits, a `Decimal` keeps its scale.

use std::cmp::Ordering;
use std::fmt;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Runtime type tags understood by the execution engine.
///
/// The discriminants are the integers `getParam(<id>, <tag>)` carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i32)]
pub enum TypeTag {
    Nothing = 0,
    Null = 1,
    Boolean = 2,
    NumberInt32 = 3,
    NumberInt64 = 4,
    NumberDouble = 5,
    NumberDecimal = 6,
    Date = 7,
    Timestamp = 8,
    String = 9,
    Array = 10,
    Object = 11,
    RecordId = 12,
    MinKey = 13,
    MaxKey = 14,
}

impl TypeTag {
    pub fn from_i32(v: i32) -> Option<Self> {
        use TypeTag::*;
        Some(match v {
            0 => Nothing,
            1 => Null,
            2 => Boolean,
            3 => NumberInt32,
            4 => NumberInt64,
            5 => NumberDouble,
            6 => NumberDecimal,
            7 => Date,
            8 => Timestamp,
            9 => String,
            10 => Array,
            11 => Object,
            12 => RecordId,
            13 => MinKey,
            14 => MaxKey,
            _ => return None,
        })
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_number(self) -> bool {
        matches!(
            self,
            TypeTag::NumberInt32
                | TypeTag::NumberInt64
                | TypeTag::NumberDouble
                | TypeTag::NumberDecimal
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Nothing,
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    /// Limited to a 96-bit mantissa (28 significant digits). Wider constants
    /// are rejected on construction instead of being rounded.
    Decimal(#[serde(with = "exact_decimal")] Decimal),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    /// Seconds in the high 32 bits, increment in the low 32 bits.
    Timestamp(u64),
    Str(String),
    Array(Vec<Value>),
    Object(Vec<(String, Value)>),
    RecordId(i64),
    MinKey,
    MaxKey,
}

impl Value {
    pub fn int32(v: i32) -> Self {
        Value::Int32(v)
    }

    pub fn int64(v: i64) -> Self {
        Value::Int64(v)
    }

    pub fn double(v: f64) -> Self {
        Value::Double(v)
    }

    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// Parse a decimal literal without rounding.
    pub fn decimal(s: &str) -> crate::Result<Self> {
        Decimal::from_str_exact(s)
            .map(Value::Decimal)
            .map_err(|e| crate::Error::Invariant(format!("decimal constant '{s}': {e}")))
    }

    pub fn boolean(b: bool) -> Self {
        Value::Bool(b)
    }

    pub fn date_millis(ms: i64) -> Self {
        Value::Date(ms)
    }

    pub fn timestamp(secs: u32, inc: u32) -> Self {
        Value::Timestamp(((secs as u64) << 32) | inc as u64)
    }

    pub fn timestamp_max() -> Self {
        Value::Timestamp(u64::MAX)
    }

    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Nothing => TypeTag::Nothing,
            Value::Null => TypeTag::Null,
            Value::Bool(_) => TypeTag::Boolean,
            Value::Int32(_) => TypeTag::NumberInt32,
            Value::Int64(_) => TypeTag::NumberInt64,
            Value::Double(_) => TypeTag::NumberDouble,
            Value::Decimal(_) => TypeTag::NumberDecimal,
            Value::Date(_) => TypeTag::Date,
            Value::Timestamp(_) => TypeTag::Timestamp,
            Value::Str(_) => TypeTag::String,
            Value::Array(_) => TypeTag::Array,
            Value::Object(_) => TypeTag::Object,
            Value::RecordId(_) => TypeTag::RecordId,
            Value::MinKey => TypeTag::MinKey,
            Value::MaxKey => TypeTag::MaxKey,
        }
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, Value::Nothing)
    }

    pub fn is_number(&self) -> bool {
        self.type_tag().is_number()
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Field lookup on an object value; `Nothing` for anything else.
    pub fn get_field(&self, name: &str) -> Value {
        match self {
            Value::Object(fields) => fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Nothing),
            _ => Value::Nothing,
        }
    }

    /// Compare two values of the same type family.
    ///
    /// Returns `None` for values that are not comparable (different families,
    /// NaN, arrays/objects). Numbers of different widths compare by value.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (a, b) if a.is_number() && b.is_number() => compare_numbers(a, b),
            (Null, Null) | (MinKey, MinKey) | (MaxKey, MaxKey) => Some(Ordering::Equal),
            (Bool(x), Bool(y)) => Some(x.cmp(y)),
            (Str(x), Str(y)) => Some(x.cmp(y)),
            (Date(x), Date(y)) => Some(x.cmp(y)),
            (Timestamp(x), Timestamp(y)) => Some(x.cmp(y)),
            (RecordId(x), RecordId(y)) => Some(x.cmp(y)),
            _ => None,
        }
    }

    /// Total order across all types: canonical type order first, then value.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        let by_type = canonical_type_order(self).cmp(&canonical_type_order(other));
        if by_type != Ordering::Equal {
            return by_type;
        }
        match (self, other) {
            (Value::Array(x), Value::Array(y)) => {
                for (a, b) in x.iter().zip(y.iter()) {
                    match a.total_cmp(b) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
                x.len().cmp(&y.len())
            }
            (Value::Object(x), Value::Object(y)) => {
                for ((ka, va), (kb, vb)) in x.iter().zip(y.iter()) {
                    match ka.cmp(kb).then_with(|| va.total_cmp(vb)) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
                x.len().cmp(&y.len())
            }
            _ => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }
}

/// Arithmetic operator applied by [`Value::arith`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl Value {
    /// Checked numeric arithmetic.
    ///
    /// Mixed widths promote to the wider operand (`Int32` < `Int64` <
    /// `Double`, with `Decimal` absorbing everything). Overflow, division by
    /// zero and non-numeric operands yield `None`.
    pub fn arith(&self, op: ArithOp, other: &Value) -> Option<Value> {
        match (self, other) {
            (Value::Int32(x), Value::Int32(y)) => int_op(*x, *y, op).map(Value::Int32),
            (Value::Int32(_) | Value::Int64(_), Value::Int32(_) | Value::Int64(_)) => {
                int_op(self.as_i64()?, other.as_i64()?, op).map(Value::Int64)
            }
            (Value::Decimal(_), _) | (_, Value::Decimal(_)) => {
                let (x, y) = (to_decimal(self)?, to_decimal(other)?);
                match op {
                    ArithOp::Add => x.checked_add(y),
                    ArithOp::Sub => x.checked_sub(y),
                    ArithOp::Mul => x.checked_mul(y),
                    ArithOp::Div => x.checked_div(y),
                }
                .map(Value::Decimal)
            }
            _ => {
                let (x, y) = (to_f64(self)?, to_f64(other)?);
                match op {
                    ArithOp::Add => Some(x + y),
                    ArithOp::Sub => Some(x - y),
                    ArithOp::Mul => Some(x * y),
                    ArithOp::Div if y == 0.0 => None,
                    ArithOp::Div => Some(x / y),
                }
                .map(Value::Double)
            }
        }
    }

    /// Checked negation preserving the type tag.
    pub fn negate(&self) -> Option<Value> {
        match self {
            Value::Int32(v) => v.checked_neg().map(Value::Int32),
            Value::Int64(v) => v.checked_neg().map(Value::Int64),
            Value::Double(v) => Some(Value::Double(-v)),
            Value::Decimal(v) => Some(Value::Decimal(-*v)),
            _ => None,
        }
    }
}

trait CheckedInt: Sized + Copy {
    fn add(self, o: Self) -> Option<Self>;
    fn sub(self, o: Self) -> Option<Self>;
    fn mul(self, o: Self) -> Option<Self>;
    fn div(self, o: Self) -> Option<Self>;
}

macro_rules! checked_int {
    ($($t:ty),*) => {
        $(impl CheckedInt for $t {
            fn add(self, o: Self) -> Option<Self> { self.checked_add(o) }
            fn sub(self, o: Self) -> Option<Self> { self.checked_sub(o) }
            fn mul(self, o: Self) -> Option<Self> { self.checked_mul(o) }
            fn div(self, o: Self) -> Option<Self> { self.checked_div(o) }
        })*
    };
}

checked_int!(i32, i64);

fn int_op<T: CheckedInt>(x: T, y: T, op: ArithOp) -> Option<T> {
    match op {
        ArithOp::Add => x.add(y),
        ArithOp::Sub => x.sub(y),
        ArithOp::Mul => x.mul(y),
        ArithOp::Div => x.div(y),
    }
}

fn compare_numbers(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(x.cmp(&y));
    }
    if matches!(a, Value::Decimal(_)) || matches!(b, Value::Decimal(_)) {
        let x = to_decimal(a)?;
        let y = to_decimal(b)?;
        return Some(x.cmp(&y));
    }
    let x = to_f64(a)?;
    let y = to_f64(b)?;
    x.partial_cmp(&y)
}

fn to_decimal(v: &Value) -> Option<Decimal> {
    match v {
        Value::Int32(i) => Some(Decimal::from(*i)),
        Value::Int64(i) => Some(Decimal::from(*i)),
        Value::Double(f) => Decimal::from_f64(*f),
        Value::Decimal(d) => Some(*d),
        _ => None,
    }
}

fn to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Int32(i) => Some(*i as f64),
        Value::Int64(i) => Some(*i as f64),
        Value::Double(f) => Some(*f),
        _ => None,
    }
}

/// Assign a numeric order to value families for mixed-type comparisons.
fn canonical_type_order(v: &Value) -> u8 {
    use Value::*;
    match v {
        MinKey => 0,
        Nothing => 1,
        Null => 2,
        Int32(_) | Int64(_) | Double(_) | Decimal(_) => 10,
        Str(_) => 15,
        Object(_) => 20,
        Array(_) => 25,
        RecordId(_) => 30,
        Bool(_) => 40,
        Date(_) => 45,
        Timestamp(_) => 47,
        MaxKey => 127,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nothing => write!(f, "Nothing"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}ll", v),
            Value::Double(v) => write!(f, "{}L", v),
            Value::Decimal(v) => write!(f, "{}nd", v),
            Value::Date(ms) => write!(f, "Date({})", ms),
            Value::Timestamp(ts) => write!(f, "Timestamp({}, {})", ts >> 32, ts & 0xffff_ffff),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Object(fields) => {
                write!(f, "{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?} : {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::RecordId(id) => write!(f, "RecordId({})", id),
            Value::MinKey => write!(f, "minKey"),
            Value::MaxKey => write!(f, "maxKey"),
        }
    }
}

/// Decimals travel as strings and must parse back exactly.
mod exact_decimal {
    use rust_decimal::Decimal;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Decimal, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(d)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Decimal, D::Error> {
        let text = String::deserialize(d)?;
        Decimal::from_str_exact(&text).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn type_tags_round_trip_through_param_encoding() {
        for tag in [TypeTag::NumberInt32, TypeTag::String, TypeTag::MaxKey] {
            assert_eq!(TypeTag::from_i32(tag.as_i32()), Some(tag));
        }
        assert_eq!(TypeTag::from_i32(99), None);
    }

    #[test]
    fn display_keeps_width_and_precision_markers() {
        assert_eq!(Value::int32(32).to_string(), "32");
        assert_eq!(Value::int64(100).to_string(), "100ll");
        assert_eq!(Value::double(3.14).to_string(), "3.14L");
        let d = Decimal::from_str("3.140").expect("decimal");
        assert_eq!(Value::Decimal(d).to_string(), "3.140nd");
        assert_eq!(Value::date_millis(100).to_string(), "Date(100)");
        assert_eq!(
            Value::timestamp_max().to_string(),
            "Timestamp(4294967295, 4294967295)"
        );
    }

    #[test]
    fn numbers_compare_across_widths_but_not_across_families() {
        assert_eq!(
            Value::int32(5).compare(&Value::int64(7)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::double(2.5).compare(&Value::int32(2)),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::int32(1).compare(&Value::str("1")), None);
        assert_eq!(Value::double(f64::NAN).compare(&Value::double(1.0)), None);
    }

    #[test]
    fn arithmetic_keeps_width_and_checks_overflow() {
        assert_eq!(
            Value::int32(2).arith(ArithOp::Add, &Value::int32(3)),
            Some(Value::int32(5))
        );
        assert_eq!(
            Value::int32(2).arith(ArithOp::Mul, &Value::int64(3)),
            Some(Value::int64(6))
        );
        assert_eq!(Value::int32(i32::MAX).arith(ArithOp::Add, &Value::int32(1)), None);
        assert_eq!(Value::int64(1).arith(ArithOp::Div, &Value::int64(0)), None);
        assert_eq!(Value::str("a").arith(ArithOp::Add, &Value::int32(1)), None);
        assert_eq!(Value::int32(4).negate(), Some(Value::int32(-4)));
    }

    #[test]
    fn decimal_constants_are_never_rounded() {
        let v = Value::decimal("3.140").unwrap();
        assert_eq!(v.to_string(), "3.140nd");
        assert!(Value::decimal("1.00000000000000000000000000000001").is_err());

        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"Decimal":"3.140"}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);

        let too_wide = r#"{"Decimal":"1.00000000000000000000000000000001"}"#;
        assert!(serde_json::from_str::<Value>(too_wide).is_err());
    }

    #[test]
    fn total_order_puts_numbers_before_strings() {
        assert_eq!(
            Value::int32(5).total_cmp(&Value::str("a")),
            Ordering::Less
        );
        assert_eq!(Value::MinKey.total_cmp(&Value::Null), Ordering::Less);
    }
}
