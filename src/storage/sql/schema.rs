//! Schema bootstrap for relational backends.
//!
//! Tables are created with `IF NOT EXISTS`, so bootstrapping an existing
//! database is a no-op. PostgreSQL keys draw from an explicit `<table>_seq`
//! sequence, which is what [`SqlBuilder::set_sequence`] restarts.
//!
//! [`SqlBuilder::set_sequence`]: super::SqlBuilder::set_sequence

use super::{Dialect, ID_COLUMN, SqlExecutor, Statement};
use crate::Result;
use crate::models::TABLES;
use crate::models::schema::{ColumnDef, ColumnType, table_columns};

fn column_type(dialect: Dialect, ty: ColumnType) -> String {
    match (dialect, ty) {
        (Dialect::Sqlite, ColumnType::Int | ColumnType::Bool) => "INTEGER".to_string(),
        (Dialect::Sqlite, ColumnType::Varchar(_) | ColumnType::Text) => "TEXT".to_string(),
        (Dialect::Sqlite, ColumnType::Timestamp) => "DATETIME".to_string(),
        (Dialect::MySql, ColumnType::Bool) => "TINYINT(1)".to_string(),
        (Dialect::Postgres, ColumnType::Bool) => "BOOLEAN".to_string(),
        (_, ColumnType::Int) => "INT".to_string(),
        (_, ColumnType::Varchar(n)) => format!("VARCHAR({n})"),
        (_, ColumnType::Text) => "TEXT".to_string(),
        (Dialect::MySql, ColumnType::Timestamp) => "TIMESTAMP NULL".to_string(),
        (Dialect::Postgres, ColumnType::Timestamp) => "TIMESTAMP(0) WITHOUT TIME ZONE".to_string(),
    }
}

fn column_sql(dialect: Dialect, column: &ColumnDef) -> String {
    let mut sql = format!(
        "{} {}",
        dialect.quote(column.name),
        column_type(dialect, column.ty)
    );
    if column.not_null {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = column.default {
        sql.push_str(" DEFAULT ");
        sql.push_str(default);
    } else if column.name == "insertedAt" {
        sql.push_str(" DEFAULT CURRENT_TIMESTAMP");
    }
    sql
}

/// DDL statements creating `table` under `physical` name.
///
/// Unknown tables get a bare key column plus the timestamp pair.
#[must_use]
pub fn create_table(dialect: Dialect, table: &str, physical: &str) -> Vec<Statement> {
    let id = dialect.quote(ID_COLUMN);
    let quoted = dialect.quote(physical);
    let mut statements = Vec::new();

    let key = match dialect {
        Dialect::MySql => format!("{id} INT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY"),
        Dialect::Sqlite => format!("{id} INTEGER PRIMARY KEY AUTOINCREMENT"),
        Dialect::Postgres => {
            let sequence = dialect.quote(&format!("{physical}_seq"));
            statements.push(statement(format!("CREATE SEQUENCE IF NOT EXISTS {sequence}")));
            format!("{id} INT NOT NULL DEFAULT nextval('{}') PRIMARY KEY", sequence.replace('\'', "''"))
        },
    };

    let fallback = [
        ColumnDef {
            name: "createdAt",
            ty: ColumnType::Timestamp,
            not_null: false,
            default: None,
        },
        ColumnDef {
            name: "updatedAt",
            ty: ColumnType::Timestamp,
            not_null: false,
            default: None,
        },
    ];
    let columns = table_columns(table).unwrap_or(&fallback[..]);

    let mut body = vec![key];
    body.extend(columns.iter().map(|c| column_sql(dialect, c)));
    let mut sql = format!(
        "CREATE TABLE IF NOT EXISTS {quoted} (\n  {}\n)",
        body.join(",\n  ")
    );
    if dialect == Dialect::MySql {
        sql.push_str(" ENGINE=InnoDB DEFAULT CHARSET=utf8mb4");
    }
    statements.push(statement(sql));
    statements
}

fn statement(sql: String) -> Statement {
    Statement {
        sql,
        params: Vec::new(),
    }
}

/// Creates every service table that does not exist yet.
///
/// # Errors
///
/// Returns an error if a DDL statement fails.
pub async fn ensure_schema<X: SqlExecutor + ?Sized>(executor: &X, prefix: &str) -> Result<()> {
    let dialect = executor.dialect();
    for table in TABLES {
        for stmt in create_table(dialect, table, &format!("{prefix}{table}")) {
            executor.execute(&stmt).await?;
        }
        tracing::info!(backend = dialect.as_str(), table, "Ensured table exists");
    }
    Ok(())
}
