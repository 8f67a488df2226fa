//! Column catalog of the comment service tables.
//!
//! Relational backends render DDL from it. The CSV backend uses it for the
//! header row of a table that has no file yet and to type the cells it reads.

use super::value::{Value, parse_datetime};
use super::{COMMENT_TABLE, COUNTER_TABLE, USERS_TABLE};

/// Logical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Integer.
    Int,
    /// Bounded text.
    Varchar(u16),
    /// Unbounded text.
    Text,
    /// Boolean flag.
    Bool,
    /// Timestamp (UTC, second precision).
    Timestamp,
}

impl ColumnType {
    /// Reads a non-empty CSV cell stored in a column of this type.
    ///
    /// Text columns keep the cell verbatim. Typed columns parse it and fall
    /// back to text when the cell does not fit the type.
    #[must_use]
    pub fn decode_cell(self, cell: &str) -> Value {
        let parsed = match self {
            Self::Varchar(_) | Self::Text => None,
            Self::Int => cell.parse().ok().map(Value::Int),
            Self::Bool => match cell {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => cell.parse().ok().map(Value::Int),
            },
            Self::Timestamp => parse_datetime(cell).map(Value::Date),
        };
        parsed.unwrap_or_else(|| Value::String(cell.to_string()))
    }
}

/// One column (the `id` key is implicit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name as written by the service.
    pub name: &'static str,
    /// Logical type.
    pub ty: ColumnType,
    /// Whether `NULL` is rejected.
    pub not_null: bool,
    /// Default value as a SQL literal, if any.
    pub default: Option<&'static str>,
}

const fn col(name: &'static str, ty: ColumnType) -> ColumnDef {
    ColumnDef {
        name,
        ty,
        not_null: false,
        default: None,
    }
}

const fn required(name: &'static str, ty: ColumnType, default: &'static str) -> ColumnDef {
    ColumnDef {
        name,
        ty,
        not_null: true,
        default: Some(default),
    }
}

const CREATED_AT: ColumnDef = col("createdAt", ColumnType::Timestamp);
const UPDATED_AT: ColumnDef = col("updatedAt", ColumnType::Timestamp);

const COMMENT_COLUMNS: &[ColumnDef] = &[
    col("user_id", ColumnType::Int),
    col("comment", ColumnType::Text),
    col("insertedAt", ColumnType::Timestamp),
    col("ip", ColumnType::Varchar(100)),
    col("link", ColumnType::Varchar(255)),
    col("mail", ColumnType::Varchar(255)),
    col("nick", ColumnType::Varchar(255)),
    col("pid", ColumnType::Int),
    col("rid", ColumnType::Int),
    col("sticky", ColumnType::Bool),
    required("status", ColumnType::Varchar(50), "''"),
    col("like", ColumnType::Int),
    col("ua", ColumnType::Text),
    col("url", ColumnType::Varchar(255)),
    CREATED_AT,
    UPDATED_AT,
];

const COUNTER_COLUMNS: &[ColumnDef] = &[
    col("time", ColumnType::Int),
    col("reaction0", ColumnType::Int),
    col("reaction1", ColumnType::Int),
    col("reaction2", ColumnType::Int),
    col("reaction3", ColumnType::Int),
    col("reaction4", ColumnType::Int),
    col("reaction5", ColumnType::Int),
    col("reaction6", ColumnType::Int),
    col("reaction7", ColumnType::Int),
    col("reaction8", ColumnType::Int),
    required("url", ColumnType::Varchar(255), "''"),
    CREATED_AT,
    UPDATED_AT,
];

const USERS_COLUMNS: &[ColumnDef] = &[
    required("display_name", ColumnType::Varchar(255), "''"),
    required("email", ColumnType::Varchar(255), "''"),
    required("password", ColumnType::Varchar(255), "''"),
    required("type", ColumnType::Varchar(50), "''"),
    col("label", ColumnType::Varchar(255)),
    col("url", ColumnType::Varchar(255)),
    col("avatar", ColumnType::Varchar(255)),
    col("github", ColumnType::Varchar(255)),
    col("twitter", ColumnType::Varchar(255)),
    col("facebook", ColumnType::Varchar(255)),
    col("google", ColumnType::Varchar(255)),
    col("weibo", ColumnType::Varchar(255)),
    col("qq", ColumnType::Varchar(255)),
    col("2fa", ColumnType::Varchar(32)),
    CREATED_AT,
    UPDATED_AT,
];

/// Columns of a known table, `None` for anything else.
#[must_use]
pub fn table_columns(table: &str) -> Option<&'static [ColumnDef]> {
    match table {
        COMMENT_TABLE => Some(COMMENT_COLUMNS),
        COUNTER_TABLE => Some(COUNTER_COLUMNS),
        USERS_TABLE => Some(USERS_COLUMNS),
        _ => None,
    }
}

/// Declared type of `column` in `table`, if both are known.
#[must_use]
pub fn column_type(table: &str, column: &str) -> Option<ColumnType> {
    table_columns(table)?
        .iter()
        .find(|c| c.name == column)
        .map(|c| c.ty)
}
