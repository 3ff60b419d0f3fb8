#![forbid(unsafe_code)]

use crate::bitmap::BitVec;
use crate::types::{ElemKind, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// The physical buffer behind a column.
#[derive(Clone, Debug)]
pub enum ColumnData {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Bool(BitVec),
    /// Dictionary-encoded strings: `codes[row]` indexes into `dictionary`.
    Dict {
        codes: Vec<u32>,
        dictionary: Arc<Vec<Arc<str>>>,
    },
}

/// One homogeneous column: a typed buffer plus an optional validity bitmap.
///
/// Columns are immutable once built and shared between tables via `Arc`;
/// replacing a column in a table swaps the `Arc`, never the buffer.
#[derive(Clone, Debug)]
pub struct Column {
    data: ColumnData,
    validity: Option<BitVec>,
}

impl Column {
    pub fn from_i64s(values: Vec<i64>) -> Self {
        Self {
            data: ColumnData::Int(values),
            validity: None,
        }
    }

    pub fn from_f64s(values: Vec<f64>) -> Self {
        Self {
            data: ColumnData::Float(values),
            validity: None,
        }
    }

    pub fn from_bools(values: &[bool]) -> Self {
        let mut bits = BitVec::with_capacity_bits(values.len());
        for v in values {
            bits.push(*v);
        }
        Self {
            data: ColumnData::Bool(bits),
            validity: None,
        }
    }

    pub fn from_strs<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut dictionary: Vec<Arc<str>> = Vec::new();
        let mut interned: HashMap<Arc<str>, u32> = HashMap::new();
        let mut codes = Vec::new();
        for v in values {
            let s = v.as_ref();
            let code = match interned.get(s) {
                Some(code) => *code,
                None => {
                    let code = dictionary.len() as u32;
                    let owned = Arc::<str>::from(s);
                    dictionary.push(owned.clone());
                    interned.insert(owned, code);
                    code
                }
            };
            codes.push(code);
        }
        Self {
            data: ColumnData::Dict {
                codes,
                dictionary: Arc::new(dictionary),
            },
            validity: None,
        }
    }

    pub fn from_opt_i64s(values: Vec<Option<i64>>) -> Self {
        let mut validity = BitVec::with_capacity_bits(values.len());
        let mut out = Vec::with_capacity(values.len());
        for v in values {
            validity.push(v.is_some());
            out.push(v.unwrap_or(0));
        }
        Self::from_i64s(out).with_validity(validity)
    }

    pub fn from_opt_f64s(values: Vec<Option<f64>>) -> Self {
        let mut validity = BitVec::with_capacity_bits(values.len());
        let mut out = Vec::with_capacity(values.len());
        for v in values {
            validity.push(v.is_some());
            out.push(v.unwrap_or(0.0));
        }
        Self::from_f64s(out).with_validity(validity)
    }

    pub fn from_opt_bools(values: Vec<Option<bool>>) -> Self {
        let mut validity = BitVec::with_capacity_bits(values.len());
        let mut bits = BitVec::with_capacity_bits(values.len());
        for v in values {
            validity.push(v.is_some());
            bits.push(v.unwrap_or(false));
        }
        Self {
            data: ColumnData::Bool(bits),
            validity: None,
        }
        .with_validity(validity)
    }

    /// Build a column of the given kind from row values; `Null` entries
    /// become invalid slots. Mismatched values are treated as null.
    pub fn from_values(kind: ElemKind, values: &[Value]) -> Self {
        match kind {
            ElemKind::Int64 => Self::from_opt_i64s(
                values
                    .iter()
                    .map(|v| match v {
                        Value::Int(v) => Some(*v),
                        _ => None,
                    })
                    .collect(),
            ),
            ElemKind::Float64 => Self::from_opt_f64s(
                values
                    .iter()
                    .map(|v| match v {
                        Value::Number(v) => Some(*v),
                        Value::Int(v) => Some(*v as f64),
                        _ => None,
                    })
                    .collect(),
            ),
            ElemKind::Bool => Self::from_opt_bools(
                values
                    .iter()
                    .map(|v| match v {
                        Value::Boolean(v) => Some(*v),
                        _ => None,
                    })
                    .collect(),
            ),
            ElemKind::Utf8 => {
                let mut validity = BitVec::with_capacity_bits(values.len());
                let strings: Vec<&str> = values
                    .iter()
                    .map(|v| match v {
                        Value::Text(s) => {
                            validity.push(true);
                            s.as_ref()
                        }
                        _ => {
                            validity.push(false);
                            ""
                        }
                    })
                    .collect();
                Self::from_strs(strings).with_validity(validity)
            }
        }
    }

    pub fn with_validity(mut self, validity: BitVec) -> Self {
        assert_eq!(
            validity.len(),
            self.len(),
            "validity length must match column length"
        );
        self.validity = if validity.all_true() {
            None
        } else {
            Some(validity)
        };
        self
    }

    pub fn len(&self) -> usize {
        match &self.data {
            ColumnData::Int(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::Bool(v) => v.len(),
            ColumnData::Dict { codes, .. } => codes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> ElemKind {
        match &self.data {
            ColumnData::Int(_) => ElemKind::Int64,
            ColumnData::Float(_) => ElemKind::Float64,
            ColumnData::Bool(_) => ElemKind::Bool,
            ColumnData::Dict { .. } => ElemKind::Utf8,
        }
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn validity(&self) -> Option<&BitVec> {
        self.validity.as_ref()
    }

    pub fn is_valid(&self, row: usize) -> bool {
        row < self.len() && self.validity.as_ref().map_or(true, |v| v.get(row))
    }

    pub fn null_count(&self) -> usize {
        match &self.validity {
            Some(v) => v.len() - v.count_ones(),
            None => 0,
        }
    }

    pub fn value(&self, row: usize) -> Value {
        if !self.is_valid(row) {
            return Value::Null;
        }
        match &self.data {
            ColumnData::Int(v) => Value::Int(v[row]),
            ColumnData::Float(v) => Value::Number(v[row]),
            ColumnData::Bool(v) => Value::Boolean(v.get(row)),
            ColumnData::Dict { codes, dictionary } => {
                Value::Text(dictionary[codes[row] as usize].clone())
            }
        }
    }

    /// Numeric lane view: invalid slots, NaN floats, and string columns all
    /// read as `None` (missing).
    pub fn lane_f64(&self, row: usize) -> Option<f64> {
        if !self.is_valid(row) {
            return None;
        }
        match &self.data {
            ColumnData::Int(v) => Some(v[row] as f64),
            ColumnData::Float(v) => {
                let x = v[row];
                (!x.is_nan()).then_some(x)
            }
            ColumnData::Bool(v) => Some(if v.get(row) { 1.0 } else { 0.0 }),
            ColumnData::Dict { .. } => None,
        }
    }

    /// Dictionary code view for `Utf8` columns (used for distinct counting).
    pub fn dict_code(&self, row: usize) -> Option<u32> {
        if !self.is_valid(row) {
            return None;
        }
        match &self.data {
            ColumnData::Dict { codes, .. } => Some(codes[row]),
            _ => None,
        }
    }
}
