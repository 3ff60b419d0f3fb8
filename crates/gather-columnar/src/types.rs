#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Element kind of a column. Every column stores exactly one kind.
///
/// `Utf8` columns are dictionary-encoded: the buffer holds `u32` codes into a
/// shared dictionary of distinct strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElemKind {
    Int64,
    Float64,
    Bool,
    Utf8,
}

impl fmt::Display for ElemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElemKind::Int64 => "int64",
            ElemKind::Float64 => "float64",
            ElemKind::Bool => "bool",
            ElemKind::Utf8 => "utf8",
        };
        f.write_str(name)
    }
}

/// A single cell value.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Int(i64),
    Number(f64),
    Boolean(bool),
    Text(Arc<str>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value: `Int`/`Number`/`Boolean` coerce to `f64`,
    /// everything else (including NaN, which the engine treats as missing)
    /// is `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Number(v) if !v.is_nan() => Some(*v),
            Value::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Total ordering over values for key comparison: `Null` sorts first,
    /// then booleans, then numbers (ints and floats compare numerically),
    /// then text.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Boolean(_) => 1,
                Value::Int(_) | Value::Number(_) => 2,
                Value::Text(_) => 3,
            }
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Int(a), Value::Number(b)) => (*a as f64).total_cmp(b),
            (Value::Number(a), Value::Int(b)) => a.total_cmp(&(*b as f64)),
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.as_ref().cmp(b.as_ref()),
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            // Bit equality so NaN keys compare equal to themselves.
            (Value::Number(a), Value::Number(b)) => a.to_bits() == b.to_bits(),
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => state.write_u8(0),
            Value::Int(v) => {
                state.write_u8(1);
                v.hash(state);
            }
            Value::Number(v) => {
                state.write_u8(2);
                v.to_bits().hash(state);
            }
            Value::Boolean(v) => {
                state.write_u8(3);
                v.hash(state);
            }
            Value::Text(v) => {
                state.write_u8(4);
                v.hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Number(v) => write!(f, "{v}"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(Arc::<str>::from(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_puts_null_first() {
        let mut values = vec![
            Value::from("b"),
            Value::from(2.5),
            Value::Null,
            Value::from(1i64),
            Value::from(true),
        ];
        values.sort_by(|a, b| a.total_cmp(b));
        assert!(values[0].is_null());
        assert_eq!(values[1], Value::Boolean(true));
        assert_eq!(values[2], Value::Int(1));
        assert_eq!(values[3], Value::Number(2.5));
        assert_eq!(values[4], Value::from("b"));
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Boolean(true).as_f64(), Some(1.0));
        assert_eq!(Value::Number(f64::NAN).as_f64(), None);
        assert_eq!(Value::Null.as_f64(), None);
        assert_eq!(Value::from("x").as_f64(), None);
    }
}
