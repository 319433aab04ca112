//! Column buffers for building Arrow record batches
//!
//! Rows are accumulated column-wise in schema order and turned into a single
//! `RecordBatch` at the end of a flush. The conversion step produces typed
//! cells; this module only checks that each cell matches its column.

use std::sync::Arc;

use arrow::array::{ArrayRef, Decimal128Array, RecordBatch, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::SchemaRef;
use arrow::error::ArrowError;

use crate::catalog::{ColumnType, TableSchema};

/// Timezone attached to timestamp columns
const UTC: &str = "UTC";

/// A single typed value ready for a column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Utf8(String),
    /// Microseconds since the Unix epoch, UTC
    TimestampMicros(i64),
    /// Unscaled decimal mantissa at the column's scale
    Decimal(i128),
}

#[derive(Debug)]
enum ColumnBuffer {
    Utf8(Vec<String>),
    Timestamp(Vec<i64>),
    Decimal {
        values: Vec<i128>,
        precision: u8,
        scale: i8,
    },
}

impl ColumnBuffer {
    fn for_type(column_type: ColumnType, capacity: usize) -> Self {
        match column_type {
            ColumnType::String => Self::Utf8(Vec::with_capacity(capacity)),
            ColumnType::Timestamp => Self::Timestamp(Vec::with_capacity(capacity)),
            ColumnType::Decimal { precision, scale } => Self::Decimal {
                values: Vec::with_capacity(capacity),
                precision,
                scale,
            },
        }
    }

    fn accepts(&self, cell: &Cell) -> bool {
        matches!(
            (self, cell),
            (Self::Utf8(_), Cell::Utf8(_))
                | (Self::Timestamp(_), Cell::TimestampMicros(_))
                | (Self::Decimal { .. }, Cell::Decimal(_))
        )
    }

    fn push(&mut self, cell: Cell) {
        match (self, cell) {
            (Self::Utf8(v), Cell::Utf8(s)) => v.push(s),
            (Self::Timestamp(v), Cell::TimestampMicros(t)) => v.push(t),
            (Self::Decimal { values, .. }, Cell::Decimal(d)) => values.push(d),
            // checked by accepts() before any push
            _ => {}
        }
    }

    fn finish(self) -> Result<ArrayRef, ArrowError> {
        Ok(match self {
            Self::Utf8(v) => Arc::new(StringArray::from(v)),
            Self::Timestamp(v) => Arc::new(TimestampMicrosecondArray::from(v).with_timezone(UTC)),
            Self::Decimal {
                values,
                precision,
                scale,
            } => Arc::new(
                Decimal128Array::from(values).with_precision_and_scale(precision, scale)?,
            ),
        })
    }
}

/// Column-wise row accumulator for one table
#[derive(Debug)]
pub struct ColumnBuffers {
    schema: SchemaRef,
    columns: Vec<ColumnBuffer>,
    rows: usize,
}

impl ColumnBuffers {
    /// Empty buffers for the table's columns
    pub fn new(table: &TableSchema) -> Self {
        Self::with_capacity(table, 0)
    }

    /// Empty buffers with room for `capacity` rows
    pub fn with_capacity(table: &TableSchema, capacity: usize) -> Self {
        Self {
            schema: table.arrow_schema(),
            columns: table
                .columns
                .iter()
                .map(|c| ColumnBuffer::for_type(c.column_type, capacity))
                .collect(),
            rows: 0,
        }
    }

    /// Append one row
    ///
    /// The row must have one cell per column, in column order. A row that
    /// does not fit is rejected whole; no column is left half-written.
    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<(), ArrowError> {
        if row.len() != self.columns.len() {
            return Err(ArrowError::InvalidArgumentError(format!(
                "row has {} cells, table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        if let Some(i) = self
            .columns
            .iter()
            .zip(&row)
            .position(|(col, cell)| !col.accepts(cell))
        {
            return Err(ArrowError::InvalidArgumentError(format!(
                "cell type does not match column '{}'",
                self.schema.field(i).name()
            )));
        }

        for (col, cell) in self.columns.iter_mut().zip(row) {
            col.push(cell);
        }
        self.rows += 1;
        Ok(())
    }

    /// Rows buffered so far
    #[inline]
    pub fn len(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Arrow schema of the produced batch
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    /// Build the record batch
    pub fn finish(self) -> Result<RecordBatch, ArrowError> {
        let arrays = self
            .columns
            .into_iter()
            .map(ColumnBuffer::finish)
            .collect::<Result<Vec<_>, _>>()?;
        RecordBatch::try_new(self.schema, arrays)
    }
}
