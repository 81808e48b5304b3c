//! Document-store seam used by the agent tools.
//!
//! The agent only ever needs "insert a row" and "select rows matching simple
//! filters" against a handful of per-category tables, so the trait is kept to
//! exactly that. Rows travel as JSON objects; `SqliteStore` maps them onto
//! SQLite columns by name.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::{Map, Number, Value};
use uuid::Uuid;

use super::sqlite::{open_database, open_memory_database};
use super::DatabaseError;

/// A stored or to-be-stored row, keyed by column name.
pub type Row = Map<String, Value>;

/// Tables the agent reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    HealthRecords,
    Medicines,
    Appointments,
    ExecutionLogs,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HealthRecords => "health_records",
            Self::Medicines => "medicines",
            Self::Appointments => "appointments",
            Self::ExecutionLogs => "agent_execution_logs",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single column predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Exact match. A JSON null matches SQL NULL.
    Eq(String, Value),
    /// Case-insensitive LIKE; the caller supplies `%` wildcards.
    ILike(String, String),
    Gte(String, Value),
    Lte(String, Value),
}

impl Filter {
    fn column(&self) -> &str {
        match self {
            Self::Eq(c, _) | Self::ILike(c, _) | Self::Gte(c, _) | Self::Lte(c, _) => c,
        }
    }
}

/// Filtered, ordered, limited select against one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: Table,
    pub filters: Vec<Filter>,
    /// Column and `descending` flag.
    pub order_by: Option<(String, bool)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn table(table: Table) -> Self {
        Self {
            table,
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column.to_string(), value.into()));
        self
    }

    pub fn ilike(mut self, column: &str, pattern: impl Into<String>) -> Self {
        self.filters.push(Filter::ILike(column.to_string(), pattern.into()));
        self
    }

    pub fn gte(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Gte(column.to_string(), value.into()));
        self
    }

    pub fn lte(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Lte(column.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, column: &str, descending: bool) -> Self {
        self.order_by = Some((column.to_string(), descending));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Same query with every predicate on `column` removed.
    pub fn without(mut self, column: &str) -> Self {
        self.filters.retain(|f| f.column() != column);
        self
    }
}

/// Table-like access to the external record store.
///
/// Implementations may fail on transient errors; callers in the agent decide
/// how to degrade.
pub trait DocumentStore: Send + Sync {
    /// Insert a row and return it as stored (including generated `id`).
    fn insert(&self, table: Table, row: &Row) -> Result<Row, DatabaseError>;

    /// Return all rows matching the query.
    fn select(&self, query: &Query) -> Result<Vec<Row>, DatabaseError>;
}

/// SQLite-backed [`DocumentStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Wrap an already-migrated connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Open (and migrate) a database file.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self::new(open_database(path)?))
    }

    /// Fresh in-memory store (for testing).
    pub fn in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::new(open_memory_database()?))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }
}

impl DocumentStore for SqliteStore {
    fn insert(&self, table: Table, row: &Row) -> Result<Row, DatabaseError> {
        let mut row = row.clone();
        let id = match row.get("id").and_then(|v| v.as_str()) {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                row.insert("id".to_string(), Value::String(id.clone()));
                id
            }
        };

        let mut columns = Vec::with_capacity(row.len());
        let mut values = Vec::with_capacity(row.len());
        for (column, value) in &row {
            ensure_identifier(column)?;
            columns.push(column.as_str());
            values.push(json_to_sql(value));
        }
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.as_str(),
            columns.join(", "),
            placeholders.join(", ")
        );

        let conn = self.lock()?;
        conn.execute(&sql, params_from_iter(values.iter()))?;

        let stored = query_rows(
            &conn,
            &format!("SELECT * FROM {} WHERE id = ?1", table.as_str()),
            &[SqlValue::Text(id)],
        )?;
        Ok(stored.into_iter().next().unwrap_or(row))
    }

    fn select(&self, query: &Query) -> Result<Vec<Row>, DatabaseError> {
        let mut clauses = Vec::with_capacity(query.filters.len());
        let mut params = Vec::with_capacity(query.filters.len());

        for filter in &query.filters {
            ensure_identifier(filter.column())?;
            match filter {
                Filter::Eq(column, Value::Null) => clauses.push(format!("{column} IS NULL")),
                Filter::Eq(column, value) => {
                    params.push(json_to_sql(value));
                    clauses.push(format!("{column} = ?{}", params.len()));
                }
                Filter::ILike(column, pattern) => {
                    params.push(SqlValue::Text(pattern.clone()));
                    clauses.push(format!("LOWER({column}) LIKE LOWER(?{})", params.len()));
                }
                Filter::Gte(column, value) => {
                    params.push(json_to_sql(value));
                    clauses.push(format!("{column} >= ?{}", params.len()));
                }
                Filter::Lte(column, value) => {
                    params.push(json_to_sql(value));
                    clauses.push(format!("{column} <= ?{}", params.len()));
                }
            }
        }

        let mut sql = format!("SELECT * FROM {}", query.table.as_str());
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        if let Some((column, descending)) = &query.order_by {
            ensure_identifier(column)?;
            let direction = if *descending { "DESC" } else { "ASC" };
            sql.push_str(&format!(" ORDER BY {column} {direction}"));
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.lock()?;
        query_rows(&conn, &sql, &params)
    }
}

fn query_rows(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();

    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            let mut out = Row::new();
            for (idx, name) in names.iter().enumerate() {
                out.insert(name.clone(), sql_to_json(row.get_ref(idx)?));
            }
            Ok(out)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn ensure_identifier(name: &str) -> Result<(), DatabaseError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(DatabaseError::InvalidColumn(name.to_string()))
    }
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::run_migrations_up_to;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn seed_records(store: &SqliteStore) {
        for (metric, date, notes) in [
            ("weight", "2026-03-01", "Morning weigh-in"),
            ("weight", "2026-03-05", "After holiday"),
            ("symptom", "2026-03-05", "Headache (mild) | woke up with a headache"),
        ] {
            store
                .insert(
                    Table::HealthRecords,
                    &row(json!({
                        "user_id": "user-1",
                        "metric": metric,
                        "value": 70.5,
                        "date": date,
                        "notes": notes,
                    })),
                )
                .unwrap();
        }
    }

    #[test]
    fn insert_assigns_id_and_returns_defaults() {
        let store = SqliteStore::in_memory().unwrap();
        let stored = store
            .insert(
                Table::Medicines,
                &row(json!({"user_id": "user-1", "name": "Metformin", "dosage": "500mg"})),
            )
            .unwrap();

        let id = stored.get("id").and_then(|v| v.as_str()).unwrap();
        assert!(Uuid::parse_str(id).is_ok());
        assert_eq!(stored.get("is_active"), Some(&json!(1)));
        assert_eq!(stored.get("dose_count"), Some(&json!(1)));
        assert!(stored.get("created_at").and_then(|v| v.as_str()).is_some());
    }

    #[test]
    fn eq_filters_combine_with_and() {
        let store = SqliteStore::in_memory().unwrap();
        seed_records(&store);

        let rows = store
            .select(
                &Query::table(Table::HealthRecords)
                    .eq("user_id", "user-1")
                    .eq("metric", "weight")
                    .eq("date", "2026-03-05"),
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("notes"), Some(&json!("After holiday")));
    }

    #[test]
    fn ilike_is_case_insensitive_substring() {
        let store = SqliteStore::in_memory().unwrap();
        seed_records(&store);

        let rows = store
            .select(&Query::table(Table::HealthRecords).ilike("notes", "%HEADACHE%"))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("metric"), Some(&json!("symptom")));
    }

    #[test]
    fn range_order_and_limit() {
        let store = SqliteStore::in_memory().unwrap();
        seed_records(&store);

        let rows = store
            .select(
                &Query::table(Table::HealthRecords)
                    .gte("date", "2026-03-02")
                    .lte("date", "2026-03-31")
                    .order_by("notes", false)
                    .limit(1),
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("notes"), Some(&json!("After holiday")));
    }

    #[test]
    fn eq_null_matches_missing_values() {
        let store = SqliteStore::in_memory().unwrap();
        seed_records(&store);

        let rows = store
            .select(&Query::table(Table::HealthRecords).eq("member_id", Value::Null))
            .unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn without_drops_predicates_on_column() {
        let query = Query::table(Table::HealthRecords)
            .eq("user_id", "u")
            .eq("member_id", "m")
            .without("member_id");
        assert_eq!(query.filters, vec![Filter::Eq("user_id".into(), json!("u"))]);
    }

    #[test]
    fn invalid_column_names_are_rejected() {
        let store = SqliteStore::in_memory().unwrap();
        let err = store
            .select(&Query::table(Table::HealthRecords).eq("metric; DROP TABLE x", "a"))
            .unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidColumn(_)));

        let err = store
            .insert(Table::HealthRecords, &row(json!({"bad column": 1})))
            .unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidColumn(_)));
    }

    #[test]
    fn legacy_schema_rejects_newer_columns() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations_up_to(&conn, 1).unwrap();
        let store = SqliteStore::new(conn);

        let result = store.insert(
            Table::HealthRecords,
            &row(json!({
                "user_id": "user-1",
                "member_id": "member-1",
                "metric": "weight",
                "value": 70,
                "date": "2026-03-01",
            })),
        );
        assert!(matches!(result, Err(DatabaseError::Sqlite(_))));
    }
}
