#![forbid(unsafe_code)]

use crate::column::Column;
use crate::types::ElemKind;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ColumnarError {
    #[error("column {column} has {actual} rows, table has {expected}")]
    RowCountMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("index column has {actual} rows, table has {expected}")]
    IndexLengthMismatch { expected: usize, actual: usize },

    #[error("column index {0} out of bounds")]
    ColumnOutOfBounds(usize),

    #[error("replacement for column {column} changes kind from {from} to {to}")]
    KindMismatch {
        column: String,
        from: ElemKind,
        to: ElemKind,
    },
}

/// Location of a logical column inside a table's block storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnLoc {
    pub block: usize,
    pub offset: usize,
}

/// A list of same-typed columns stored together.
#[derive(Clone, Debug)]
pub struct Block {
    kind: ElemKind,
    columns: Vec<Arc<Column>>,
}

impl Block {
    pub fn kind(&self) -> ElemKind {
        self.kind
    }

    pub fn columns(&self) -> &[Arc<Column>] {
        &self.columns
    }
}

/// An ordered, named set of columns with equal row counts, grouped into
/// same-typed blocks, plus an optional row-identity index column.
///
/// The `(block, offset)` location of every logical column is computed once at
/// construction. Columns are shared (`Arc`) and replaced wholesale; the
/// buffers themselves are never mutated through a table.
#[derive(Clone, Debug)]
pub struct Table {
    names: Vec<String>,
    blocks: Vec<Block>,
    locs: Vec<ColumnLoc>,
    index: Option<Arc<Column>>,
    rows: usize,
}

impl Table {
    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.locs.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, col: usize) -> Option<&str> {
        self.names.get(col).map(|s| s.as_str())
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn loc(&self, col: usize) -> Option<ColumnLoc> {
        self.locs.get(col).copied()
    }

    pub fn column(&self, col: usize) -> Option<&Arc<Column>> {
        let loc = self.locs.get(col)?;
        Some(&self.blocks[loc.block].columns[loc.offset])
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Arc<Column>> {
        let idx = self.names.iter().position(|n| n == name)?;
        self.column(idx)
    }

    pub fn kind(&self, col: usize) -> Option<ElemKind> {
        self.column(col).map(|c| c.kind())
    }

    pub fn index(&self) -> Option<&Arc<Column>> {
        self.index.as_ref()
    }

    /// Replace one logical column with a new buffer of the same kind and row
    /// count. Returns a new table sharing every other column.
    pub fn with_column_replaced(
        &self,
        col: usize,
        column: Arc<Column>,
    ) -> Result<Table, ColumnarError> {
        let loc = self
            .locs
            .get(col)
            .copied()
            .ok_or(ColumnarError::ColumnOutOfBounds(col))?;
        let current = &self.blocks[loc.block].columns[loc.offset];
        if column.kind() != current.kind() {
            return Err(ColumnarError::KindMismatch {
                column: self.names[col].clone(),
                from: current.kind(),
                to: column.kind(),
            });
        }
        if column.len() != self.rows {
            return Err(ColumnarError::RowCountMismatch {
                column: self.names[col].clone(),
                expected: self.rows,
                actual: column.len(),
            });
        }

        let mut out = self.clone();
        out.blocks[loc.block].columns[loc.offset] = column;
        Ok(out)
    }

    /// Materialize only the listed columns (the table-interchange boundary:
    /// callers pass live column index lists so dead columns are never
    /// touched). The index is carried over when `keep_index` is set.
    pub fn project(&self, live: &[usize], keep_index: bool) -> Result<Table, ColumnarError> {
        let mut builder = TableBuilder::new();
        for &col in live {
            let column = self
                .column(col)
                .ok_or(ColumnarError::ColumnOutOfBounds(col))?;
            builder.push_column(self.names[col].clone(), column.clone());
        }
        if keep_index {
            if let Some(index) = &self.index {
                builder.set_index(index.clone());
            }
        }
        builder.build()
    }
}

/// Builds a [`Table`], grouping columns into same-typed blocks and computing
/// the per-column `(block, offset)` locations.
#[derive(Default)]
pub struct TableBuilder {
    names: Vec<String>,
    columns: Vec<Arc<Column>>,
    index: Option<Arc<Column>>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_column(&mut self, name: impl Into<String>, column: Arc<Column>) -> &mut Self {
        self.names.push(name.into());
        self.columns.push(column);
        self
    }

    pub fn set_index(&mut self, index: Arc<Column>) -> &mut Self {
        self.index = Some(index);
        self
    }

    pub fn build(self) -> Result<Table, ColumnarError> {
        let rows = self
            .columns
            .first()
            .map(|c| c.len())
            .or_else(|| self.index.as_ref().map(|c| c.len()))
            .unwrap_or(0);

        for (name, column) in self.names.iter().zip(&self.columns) {
            if column.len() != rows {
                return Err(ColumnarError::RowCountMismatch {
                    column: name.clone(),
                    expected: rows,
                    actual: column.len(),
                });
            }
        }
        if let Some(index) = &self.index {
            if index.len() != rows {
                return Err(ColumnarError::IndexLengthMismatch {
                    expected: rows,
                    actual: index.len(),
                });
            }
        }

        let mut blocks: Vec<Block> = Vec::new();
        let mut locs = Vec::with_capacity(self.columns.len());
        for column in self.columns {
            let kind = column.kind();
            let block = match blocks.iter().position(|b| b.kind == kind) {
                Some(idx) => idx,
                None => {
                    blocks.push(Block {
                        kind,
                        columns: Vec::new(),
                    });
                    blocks.len() - 1
                }
            };
            locs.push(ColumnLoc {
                block,
                offset: blocks[block].columns.len(),
            });
            blocks[block].columns.push(column);
        }

        Ok(Table {
            names: self.names,
            blocks,
            locs,
            index: self.index,
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use pretty_assertions::assert_eq;

    fn sample() -> Table {
        let mut builder = TableBuilder::new();
        builder
            .push_column("k", Arc::new(Column::from_strs(["a", "a", "b"])))
            .push_column("x", Arc::new(Column::from_f64s(vec![1.0, 2.0, 10.0])))
            .push_column("n", Arc::new(Column::from_i64s(vec![7, 8, 9])))
            .push_column("y", Arc::new(Column::from_f64s(vec![0.5, 0.25, 0.125])))
            .set_index(Arc::new(Column::from_i64s(vec![0, 1, 2])));
        builder.build().unwrap()
    }

    #[test]
    fn columns_group_into_typed_blocks() {
        let table = sample();
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.column_count(), 4);

        // Blocks in first-seen kind order: utf8, float64, int64. The two
        // float columns land in the same block at different offsets.
        assert_eq!(table.blocks().len(), 3);
        assert_eq!(table.loc(1), Some(ColumnLoc { block: 1, offset: 0 }));
        assert_eq!(table.loc(3), Some(ColumnLoc { block: 1, offset: 1 }));
        assert_eq!(table.kind(0), Some(ElemKind::Utf8));
        assert_eq!(table.column(2).unwrap().value(2), Value::Int(9));
    }

    #[test]
    fn replacement_is_whole_column_and_kind_checked() {
        let table = sample();
        let replaced = table
            .with_column_replaced(1, Arc::new(Column::from_f64s(vec![3.0, 4.0, 5.0])))
            .unwrap();
        assert_eq!(replaced.column(1).unwrap().value(0), Value::Number(3.0));
        // Untouched columns are shared, not copied.
        assert!(Arc::ptr_eq(
            table.column(0).unwrap(),
            replaced.column(0).unwrap()
        ));

        let err = table
            .with_column_replaced(1, Arc::new(Column::from_i64s(vec![1, 2, 3])))
            .unwrap_err();
        assert!(matches!(err, ColumnarError::KindMismatch { .. }));

        let err = table
            .with_column_replaced(1, Arc::new(Column::from_f64s(vec![1.0])))
            .unwrap_err();
        assert!(matches!(err, ColumnarError::RowCountMismatch { .. }));
    }

    #[test]
    fn projection_materializes_only_live_columns() {
        let table = sample();
        let projected = table.project(&[0, 3], true).unwrap();
        assert_eq!(projected.column_count(), 2);
        assert_eq!(projected.names(), &["k".to_string(), "y".to_string()]);
        assert!(projected.index().is_some());

        let no_index = table.project(&[2], false).unwrap();
        assert!(no_index.index().is_none());
        assert_eq!(no_index.row_count(), 3);
    }

    #[test]
    fn mismatched_row_counts_are_rejected() {
        let mut builder = TableBuilder::new();
        builder
            .push_column("a", Arc::new(Column::from_f64s(vec![1.0, 2.0])))
            .push_column("b", Arc::new(Column::from_f64s(vec![1.0])));
        assert!(matches!(
            builder.build(),
            Err(ColumnarError::RowCountMismatch { .. })
        ));
    }
}
