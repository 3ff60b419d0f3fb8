use gather_columnar::ElemKind;

pub type AggResult<T> = Result<T, AggError>;

/// Errors raised by the aggregation compiler and driver.
///
/// Configuration-shape errors are detected eagerly, before any row is read;
/// per-row numeric edge cases (NaN/null) are resolved by the skip-na policy
/// and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum AggError {
    #[error("user function {name} cannot be decomposed: {reason}")]
    UnsupportedUserFunction { name: String, reason: String },

    #[error("{kind} is not supported on column {column} of type {elem}")]
    InvalidAggregateForColumnType {
        kind: String,
        column: String,
        elem: ElemKind,
    },

    #[error("{func}(): Cannot mix cumulative operations with other aggregation functions")]
    IncompatibleMixedKinds { func: String },

    #[error("invalid parameter: {what}")]
    InvalidParameter { what: String },

    #[error("unsupported transform function {name}")]
    UnsupportedTransform { name: String },

    #[error("aggregation requires at least one input column or row; none available")]
    EmptyGroupSet,

    #[error("column index {0} out of bounds")]
    UnknownColumn(usize),

    #[error("callback symbol {symbol} is already bound to different column types")]
    CallbackTypeMismatch { symbol: String },

    #[error("operator has been disposed")]
    OperatorDisposed,

    #[error("invalid operator state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },

    #[error(transparent)]
    Columnar(#[from] gather_columnar::ColumnarError),
}
