//! Filter-to-SQL compilation.
//!
//! Every statement is rendered with positional placeholders and a parameter
//! list; values are never spliced into SQL text. Only identifiers (quoted
//! per dialect) and `LIMIT`/`OFFSET` integers are inlined.

use crate::models::{Condition, Filter, Logic, OBJECT_ID, QueryOptions, Record, Value};

/// Native primary key column.
pub const ID_COLUMN: &str = "id";

/// Escape character used in `LIKE ... ESCAPE`.
pub const LIKE_ESCAPE: char = '!';

/// Alias prefix for grouped count columns.
pub const GROUP_ALIAS_PREFIX: &str = "__g";

/// SQL flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// MySQL and `TiDB`.
    MySql,
    /// PostgreSQL.
    Postgres,
    /// `SQLite`.
    Sqlite,
}

impl Dialect {
    /// Quotes an identifier.
    ///
    /// PostgreSQL identifiers are lowercased first: tables are created with
    /// unquoted (folded) names.
    #[must_use]
    pub fn quote(self, ident: &str) -> String {
        match self {
            Self::MySql => format!("`{}`", ident.replace('`', "``")),
            Self::Postgres => format!("\"{}\"", ident.to_lowercase().replace('"', "\"\"")),
            Self::Sqlite => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Placeholder for the `n`-th (1-based) parameter.
    #[must_use]
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Self::Postgres => format!("${n}"),
            Self::MySql | Self::Sqlite => "?".to_string(),
        }
    }

    /// Case-sensitive `LIKE` operator.
    ///
    /// `SQLite` relies on `PRAGMA case_sensitive_like = ON` set per connection.
    #[must_use]
    pub const fn like_operator(self) -> &'static str {
        match self {
            Self::MySql => "LIKE BINARY",
            Self::Postgres | Self::Sqlite => "LIKE",
        }
    }

    /// Short name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgresql",
            Self::Sqlite => "sqlite",
        }
    }
}

/// A rendered statement with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text.
    pub sql: String,
    /// Positional parameters.
    pub params: Vec<Value>,
}

impl Statement {
    fn new(sql: String, params: Vec<Value>) -> Self {
        Self { sql, params }
    }
}

/// Converts an `objectId` to the integer key, if it is one.
#[must_use]
pub fn native_id(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Maps a field name to its column name.
fn column(field: &str) -> &str {
    if field == OBJECT_ID { ID_COLUMN } else { field }
}

/// Builds statements for one physical table.
#[derive(Debug, Clone)]
pub struct SqlBuilder {
    dialect: Dialect,
    table: String,
}

impl SqlBuilder {
    /// Creates a builder for `table` (already prefixed).
    #[must_use]
    pub fn new(dialect: Dialect, table: impl Into<String>) -> Self {
        Self {
            dialect,
            table: table.into(),
        }
    }

    /// The dialect.
    #[must_use]
    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// The physical table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    fn quoted_table(&self) -> String {
        self.dialect.quote(&self.table)
    }

    fn col(&self, field: &str) -> String {
        self.dialect.quote(column(field))
    }

    fn bind(&self, params: &mut Vec<Value>, value: Value) -> String {
        params.push(value);
        self.dialect.placeholder(params.len())
    }

    fn bind_list(&self, params: &mut Vec<Value>, values: impl IntoIterator<Item = Value>) -> String {
        values
            .into_iter()
            .map(|v| self.bind(params, v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Renders one condition; `None` means "no predicate".
    fn condition(&self, field: &str, cond: &Condition, params: &mut Vec<Value>) -> Option<String> {
        let is_id = field == OBJECT_ID;
        let col = self.col(field);
        // Identifier operands become integers; non-numeric ones cannot match any row.
        let operand = |v: &Value| -> Option<Value> {
            if is_id { native_id(v).map(Value::Int) } else { Some(v.clone()) }
        };
        let operands = |values: &[Value]| -> Vec<Value> { values.iter().filter_map(operand).collect() };

        match cond {
            Condition::Eq(v) if v.is_null() => Some(format!("{col} IS NULL")),
            Condition::Eq(v) => match operand(v) {
                Some(v) => Some(format!("{col} = {}", self.bind(params, v))),
                None => Some("1 = 0".to_string()),
            },
            Condition::IsNull => Some(format!("{col} IS NULL")),
            Condition::In(values) => {
                let values = operands(values);
                if values.is_empty() {
                    Some("1 = 0".to_string())
                } else {
                    Some(format!("{col} IN ({})", self.bind_list(params, values)))
                }
            },
            Condition::NotIn(values) => {
                let values = operands(values);
                if values.is_empty() {
                    None
                } else {
                    Some(format!(
                        "({col} IS NULL OR {col} NOT IN ({}))",
                        self.bind_list(params, values)
                    ))
                }
            },
            Condition::Like(pattern) => {
                let operand = self.bind(params, Value::String(pattern.to_sql(LIKE_ESCAPE)));
                Some(format!(
                    "{col} {} {operand} ESCAPE '{LIKE_ESCAPE}'",
                    self.dialect.like_operator()
                ))
            },
            Condition::Ne(v) if v.is_null() => Some(format!("{col} IS NOT NULL")),
            Condition::Ne(v) => operand(v)
                .map(|v| format!("({col} IS NULL OR {col} <> {})", self.bind(params, v))),
            Condition::Gt(v) => match operand(v) {
                Some(v) if !v.is_null() => Some(format!("{col} > {}", self.bind(params, v))),
                _ => Some("1 = 0".to_string()),
            },
            Condition::Unsupported { operator } => {
                tracing::debug!(field, operator = %operator, "Skipping unsupported filter operator");
                None
            },
        }
    }

    /// Renders ` WHERE ...`, or nothing for a filter matching everything.
    fn where_clause(&self, filter: &Filter, params: &mut Vec<Value>) -> String {
        let (logic, branches) = filter.branches();
        let rendered: Vec<Vec<String>> = branches
            .iter()
            .map(|branch| {
                branch
                    .iter()
                    .filter_map(|(field, cond)| self.condition(field, cond, params))
                    .collect()
            })
            .collect();

        if let [only] = rendered.as_slice() {
            return if only.is_empty() {
                String::new()
            } else {
                format!(" WHERE {}", only.join(" AND "))
            };
        }

        let joiner = match logic {
            Logic::And => " AND ",
            Logic::Or => " OR ",
        };
        let combined = rendered
            .iter()
            .map(|parts| {
                if parts.is_empty() {
                    "(1 = 1)".to_string()
                } else {
                    format!("({})", parts.join(" AND "))
                }
            })
            .collect::<Vec<_>>()
            .join(joiner);
        format!(" WHERE {combined}")
    }

    fn limit_clause(&self, options: &QueryOptions) -> String {
        match (options.limit, options.offset) {
            (Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
            (Some(limit), None) => format!(" LIMIT {limit}"),
            (None, Some(offset)) => match self.dialect {
                Dialect::MySql => format!(" LIMIT 18446744073709551615 OFFSET {offset}"),
                Dialect::Sqlite => format!(" LIMIT -1 OFFSET {offset}"),
                Dialect::Postgres => format!(" OFFSET {offset}"),
            },
            (None, None) => String::new(),
        }
    }

    /// `SELECT` honouring sort, paging and projection.
    #[must_use]
    pub fn select(&self, filter: &Filter, options: &QueryOptions) -> Statement {
        let mut params = Vec::new();
        let columns = match &options.field {
            Some(fields) => {
                let mut cols = vec![self.dialect.quote(ID_COLUMN)];
                for field in fields {
                    let col = self.col(field);
                    if !cols.contains(&col) {
                        cols.push(col);
                    }
                }
                cols.join(", ")
            },
            None => "*".to_string(),
        };
        let mut sql = format!("SELECT {columns} FROM {}", self.quoted_table());
        sql.push_str(&self.where_clause(filter, &mut params));
        if let Some(desc) = &options.desc {
            sql.push_str(&format!(" ORDER BY {} DESC", self.col(desc)));
        }
        sql.push_str(&self.limit_clause(options));
        Statement::new(sql, params)
    }

    /// `SELECT COUNT(*)`, grouped when `options.group` is set.
    ///
    /// Group columns are aliased `__g0`, `__g1`, ... in group order.
    #[must_use]
    pub fn count(&self, filter: &Filter, options: &QueryOptions) -> Statement {
        let mut params = Vec::new();
        let where_clause = self.where_clause(filter, &mut params);
        let sql = match options.group_fields() {
            None => format!(
                "SELECT COUNT(*) AS count FROM {}{where_clause}",
                self.quoted_table()
            ),
            Some(group) => {
                let cols: Vec<String> = group.iter().map(|g| self.col(g)).collect();
                let select = cols
                    .iter()
                    .enumerate()
                    .map(|(i, c)| format!("{c} AS {GROUP_ALIAS_PREFIX}{i}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "SELECT {select}, COUNT(*) AS count FROM {}{where_clause} GROUP BY {}",
                    self.quoted_table(),
                    cols.join(", ")
                )
            },
        };
        Statement::new(sql, params)
    }

    /// `INSERT` of every field; `objectId` must already be mapped to an integer `id`.
    ///
    /// PostgreSQL statements end with `RETURNING id`.
    #[must_use]
    pub fn insert(&self, record: &Record) -> Statement {
        let mut params = Vec::new();
        let table = self.quoted_table();
        let mut sql = if record.is_empty() {
            match self.dialect {
                Dialect::MySql => format!("INSERT INTO {table} () VALUES ()"),
                Dialect::Postgres | Dialect::Sqlite => {
                    format!("INSERT INTO {table} DEFAULT VALUES")
                },
            }
        } else {
            let cols = record
                .keys()
                .map(|k| self.col(k))
                .collect::<Vec<_>>()
                .join(", ");
            let values = self.bind_list(&mut params, record.iter().map(|(_, v)| v.clone()));
            format!("INSERT INTO {table} ({cols}) VALUES ({values})")
        };
        if self.dialect == Dialect::Postgres {
            sql.push_str(&format!(" RETURNING {}", self.dialect.quote(ID_COLUMN)));
        }
        Statement::new(sql, params)
    }

    /// `UPDATE ... WHERE id = ?`; `None` when there is nothing to set.
    #[must_use]
    pub fn update_by_id(&self, changes: &Record, id: i64) -> Option<Statement> {
        let mut params = Vec::new();
        let assignments = changes
            .iter()
            .filter(|(k, _)| k.as_str() != OBJECT_ID)
            .map(|(k, v)| format!("{} = {}", self.col(k), self.bind(&mut params, v.clone())))
            .collect::<Vec<_>>();
        if assignments.is_empty() {
            return None;
        }
        let id_param = self.bind(&mut params, Value::Int(id));
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = {id_param}",
            self.quoted_table(),
            assignments.join(", "),
            self.dialect.quote(ID_COLUMN)
        );
        Some(Statement::new(sql, params))
    }

    /// `DELETE` of every matching row.
    #[must_use]
    pub fn delete(&self, filter: &Filter) -> Statement {
        let mut params = Vec::new();
        let where_clause = self.where_clause(filter, &mut params);
        Statement::new(
            format!("DELETE FROM {}{where_clause}", self.quoted_table()),
            params,
        )
    }

    /// Resets the key sequence so the next insert receives `next_id`.
    #[must_use]
    pub fn set_sequence(&self, next_id: u64) -> Statement {
        let sql = match self.dialect {
            Dialect::MySql => format!(
                "ALTER TABLE {} AUTO_INCREMENT = {next_id}",
                self.quoted_table()
            ),
            Dialect::Postgres => format!(
                "ALTER SEQUENCE {} RESTART WITH {next_id}",
                self.dialect.quote(&format!("{}_seq", self.table))
            ),
            Dialect::Sqlite => {
                let mut params = Vec::new();
                let last = i64::try_from(next_id.saturating_sub(1)).unwrap_or(i64::MAX);
                let seq = self.bind(&mut params, Value::Int(last));
                let name = self.bind(&mut params, Value::String(self.table.clone()));
                return Statement::new(
                    format!("UPDATE sqlite_sequence SET seq = {seq} WHERE name = {name}"),
                    params,
                );
            },
        };
        Statement::new(sql, Vec::new())
    }
}
