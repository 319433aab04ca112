//! Table schemas consulted for record conversion
//!
//! The catalog is an external, read-only collaborator: the archiver asks it
//! for the named table's column layout and converts every buffered record
//! against that layout before writing Parquet.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};

/// Default table name for archived transactions
pub const DEFAULT_TABLE_NAME: &str = "transactions";

/// Column storage type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Non-empty UTF-8 string
    String,
    /// RFC 3339 timestamp, stored as microseconds since epoch in UTC
    Timestamp,
    /// Fixed-point decimal
    Decimal { precision: u8, scale: i8 },
}

impl ColumnType {
    /// Arrow data type for this column
    pub fn to_arrow(self) -> DataType {
        match self {
            Self::String => DataType::Utf8,
            Self::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            Self::Decimal { precision, scale } => DataType::Decimal128(precision, scale),
        }
    }

    /// Name used in conversion diagnostics
    pub fn describe(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Timestamp => "timestamp",
            Self::Decimal { .. } => "decimal",
        }
    }
}

/// One column of a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Named table layout
///
/// Every column is required: a record missing any column fails conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
}

impl TableSchema {
    /// Amount precision and scale of the built-in layout
    pub const AMOUNT_PRECISION: u8 = 18;
    pub const AMOUNT_SCALE: i8 = 2;

    /// The seven-column transactions layout
    pub fn transactions(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: vec![
                Column::new("transaction_id", ColumnType::String),
                Column::new("customer_id", ColumnType::String),
                Column::new("received_datetime", ColumnType::Timestamp),
                Column::new("requested_datetime", ColumnType::Timestamp),
                Column::new("source_account", ColumnType::String),
                Column::new("destination_account", ColumnType::String),
                Column::new(
                    "total_amount",
                    ColumnType::Decimal {
                        precision: Self::AMOUNT_PRECISION,
                        scale: Self::AMOUNT_SCALE,
                    },
                ),
            ],
        }
    }

    /// Look up a column by name
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Arrow schema in column order (all fields non-nullable)
    pub fn arrow_schema(&self) -> SchemaRef {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|c| Field::new(&c.name, c.column_type.to_arrow(), false))
            .collect();
        Arc::new(Schema::new(fields))
    }
}

/// Source of table schemas
pub trait Catalog: Send + Sync {
    /// Resolve a table by name
    fn table(&self, name: &str) -> Option<TableSchema>;
}

/// Catalog backed by a fixed set of schemas
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    tables: HashMap<String, TableSchema>,
}

impl StaticCatalog {
    /// Empty catalog
    pub fn empty() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    /// Add or replace a table
    pub fn with_table(mut self, schema: TableSchema) -> Self {
        self.tables.insert(schema.name.clone(), schema);
        self
    }
}

impl Default for StaticCatalog {
    /// Catalog containing the built-in `transactions` table
    fn default() -> Self {
        Self::empty().with_table(TableSchema::transactions(DEFAULT_TABLE_NAME))
    }
}

impl Catalog for StaticCatalog {
    fn table(&self, name: &str) -> Option<TableSchema> {
        self.tables.get(name).cloned()
    }
}
