//! Columnar table substrate for the gather aggregation engine.
//!
//! This crate focuses on:
//! - Typed, immutable column buffers with optional validity bitmaps and
//!   dictionary-encoded strings.
//! - Tables whose columns are grouped into same-typed blocks, with a
//!   `(block, offset)` location computed per logical column at construction
//!   so bulk operations over same-typed columns avoid per-column dispatch.
//! - Shared column ownership: a column copied into several tables is held by
//!   reference count and freed when the last owning table goes away.
//!
//! Mutation is whole-column replacement only; a column buffer is never
//! modified in place once it is owned by a table.

#![forbid(unsafe_code)]

mod bitmap;
mod column;
mod table;
mod types;

pub use crate::bitmap::BitVec;
pub use crate::column::{Column, ColumnData};
pub use crate::table::{Block, ColumnLoc, ColumnarError, Table, TableBuilder};
pub use crate::types::{ElemKind, Value};
