//! Query executor abstraction.
//!
//! The storage engine never talks to SQLx directly: it issues parameterized
//! statements through [`QueryExecutor`] and reads back untyped [`Row`]s.
//! [`SqliteExecutor`] is the production implementation; tests can wrap or
//! replace it.

use crate::error::QueryError;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{ConnectOptions, Row as _, Sqlite, TypeInfo, ValueRef};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// A single bound parameter or column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Text(String),
}

macro_rules! impl_integer_value {
    ($($ty:ty),*) => {
        $(impl From<$ty> for SqlValue {
            fn from(value: $ty) -> Self {
                SqlValue::Integer(i64::from(value))
            }
        })*
    };
}

impl_integer_value!(i64, i32, u32, u16, u8, bool);

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<&String> for SqlValue {
    fn from(value: &String) -> Self {
        SqlValue::Text(value.clone())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

/// Build a `&[SqlValue]` parameter list from heterogeneous values.
macro_rules! params {
    ($($value:expr),* $(,)?) => {
        &[$($crate::db::SqlValue::from($value)),*]
    };
}

pub(crate) use params;

/// One result row, addressed by column index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row(Vec<SqlValue>);

impl Row {
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Read an integer column, narrowing it to `T`.
    pub fn int<T: TryFrom<i64>>(&self, column: usize) -> Result<T, QueryError> {
        match self.0.get(column) {
            Some(SqlValue::Integer(v)) => T::try_from(*v).map_err(|_| QueryError::Decode {
                column,
                expected: "integer in range",
            }),
            _ => Err(QueryError::Decode {
                column,
                expected: "integer",
            }),
        }
    }

    pub fn flag(&self, column: usize) -> Result<bool, QueryError> {
        Ok(self.int::<i64>(column)? != 0)
    }

    pub fn text(&self, column: usize) -> Result<String, QueryError> {
        match self.0.get(column) {
            Some(SqlValue::Text(v)) => Ok(v.clone()),
            _ => Err(QueryError::Decode {
                column,
                expected: "text",
            }),
        }
    }

    pub fn opt_text(&self, column: usize) -> Result<Option<String>, QueryError> {
        match self.0.get(column) {
            Some(SqlValue::Null) => Ok(None),
            _ => self.text(column).map(Some),
        }
    }

    pub fn opt_int<T: TryFrom<i64>>(&self, column: usize) -> Result<Option<T>, QueryError> {
        match self.0.get(column) {
            Some(SqlValue::Null) => Ok(None),
            _ => self.int(column).map(Some),
        }
    }
}

/// Executes statements against the backing store.
///
/// Implementations own a single connection: statements from one caller run
/// in order, and `begin`/`commit`/`rollback` bracket the statements issued
/// between them.
#[async_trait]
pub trait QueryExecutor: Send {
    /// Run a query and return every row.
    async fn fetch(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, QueryError>;

    /// Run a statement and return the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, QueryError>;

    /// Run an INSERT and return the generated key.
    async fn execute_insert(&mut self, sql: &str, params: &[SqlValue])
    -> Result<i64, QueryError>;

    async fn begin(&mut self) -> Result<(), QueryError> {
        self.execute("BEGIN", &[]).await.map(|_| ())
    }

    async fn commit(&mut self) -> Result<(), QueryError> {
        self.execute("COMMIT", &[]).await.map(|_| ())
    }

    async fn rollback(&mut self) -> Result<(), QueryError> {
        self.execute("ROLLBACK", &[]).await.map(|_| ())
    }

    /// Release the connection. Later calls fail with [`QueryError::Closed`].
    async fn close(&mut self) -> Result<(), QueryError>;
}

/// SQLite executor over a single SQLx connection.
pub struct SqliteExecutor {
    conn: Option<SqliteConnection>,
}

impl SqliteExecutor {
    /// Open (creating if missing) the database at `path`; `:memory:` opens a
    /// private in-memory database.
    pub async fn connect(path: &str) -> Result<Self, QueryError> {
        let options = if path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                tracing::warn!(path = %parent.display(), error = %e, "Failed to create database directory");
            }
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        };

        let mut conn = options.connect().await?;
        info!(path = %path, "Database connected");

        if path != ":memory:" {
            // WAL lets readers proceed while a flush is writing
            sqlx::query("PRAGMA journal_mode=WAL")
                .execute(&mut conn)
                .await?;
            sqlx::query("PRAGMA synchronous=NORMAL")
                .execute(&mut conn)
                .await?;
        }

        sqlx::query("PRAGMA foreign_keys=ON")
            .execute(&mut conn)
            .await?;

        let integrity: String = sqlx::query_scalar("PRAGMA integrity_check")
            .fetch_one(&mut conn)
            .await?;
        if integrity != "ok" {
            tracing::error!(integrity_check = %integrity, "Database integrity check FAILED");
            return Err(QueryError::Sqlx(sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Database integrity check failed: {}", integrity),
            ))));
        }

        Ok(Self { conn: Some(conn) })
    }

    fn conn(&mut self) -> Result<&mut SqliteConnection, QueryError> {
        self.conn.as_mut().ok_or(QueryError::Closed)
    }
}

fn bind_params<'q>(
    sql: &'q str,
    params: &'q [SqlValue],
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, param| match param {
            SqlValue::Null => query.bind(None::<i64>),
            SqlValue::Integer(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
        })
}

fn decode_row(row: &SqliteRow) -> Result<Row, QueryError> {
    let mut values = Vec::with_capacity(row.len());
    for index in 0..row.len() {
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            let is_integer = matches!(raw.type_info().name(), "INTEGER" | "BOOLEAN");
            if is_integer {
                SqlValue::Integer(row.try_get::<i64, _>(index)?)
            } else {
                SqlValue::Text(row.try_get::<String, _>(index)?)
            }
        };
        values.push(value);
    }
    Ok(Row(values))
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn fetch(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, QueryError> {
        let conn = self.conn()?;
        let rows = bind_params(sql, params).fetch_all(&mut *conn).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, QueryError> {
        let conn = self.conn()?;
        let result = bind_params(sql, params).execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }

    async fn execute_insert(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<i64, QueryError> {
        let conn = self.conn()?;
        let result = bind_params(sql, params).execute(&mut *conn).await?;
        Ok(result.last_insert_rowid())
    }

    async fn close(&mut self) -> Result<(), QueryError> {
        if let Some(conn) = self.conn.take() {
            use sqlx::Connection;
            conn.close().await?;
        }
        Ok(())
    }
}

/// Test executor that counts mutating statements passed to an inner executor.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    pub struct CountingExecutor {
        inner: SqliteExecutor,
        mutations: Arc<AtomicUsize>,
    }

    impl CountingExecutor {
        pub async fn in_memory() -> (Self, Arc<AtomicUsize>) {
            let mutations = Arc::new(AtomicUsize::new(0));
            let inner = SqliteExecutor::connect(":memory:").await.unwrap();
            (
                Self {
                    inner,
                    mutations: mutations.clone(),
                },
                mutations,
            )
        }

        fn count(&self, sql: &str) {
            let verb = sql.trim_start().to_ascii_uppercase();
            if verb.starts_with("INSERT") || verb.starts_with("UPDATE") || verb.starts_with("DELETE")
            {
                self.mutations.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[async_trait]
    impl QueryExecutor for CountingExecutor {
        async fn fetch(
            &mut self,
            sql: &str,
            params: &[SqlValue],
        ) -> Result<Vec<Row>, QueryError> {
            self.inner.fetch(sql, params).await
        }

        async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, QueryError> {
            self.count(sql);
            self.inner.execute(sql, params).await
        }

        async fn execute_insert(
            &mut self,
            sql: &str,
            params: &[SqlValue],
        ) -> Result<i64, QueryError> {
            self.count(sql);
            self.inner.execute_insert(sql, params).await
        }

        async fn close(&mut self) -> Result<(), QueryError> {
            self.inner.close().await
        }
    }

    /// Executor whose writes fail while the shared switch is on.
    pub struct FlakyExecutor {
        inner: SqliteExecutor,
        failing: Arc<AtomicBool>,
    }

    impl FlakyExecutor {
        pub async fn connect(path: &str) -> (Self, Arc<AtomicBool>) {
            let failing = Arc::new(AtomicBool::new(false));
            let inner = SqliteExecutor::connect(path).await.unwrap();
            (
                Self {
                    inner,
                    failing: failing.clone(),
                },
                failing,
            )
        }

        fn check(&self) -> Result<(), QueryError> {
            if self.failing.load(Ordering::SeqCst) {
                Err(QueryError::Sqlx(sqlx::Error::PoolTimedOut))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl QueryExecutor for FlakyExecutor {
        async fn fetch(
            &mut self,
            sql: &str,
            params: &[SqlValue],
        ) -> Result<Vec<Row>, QueryError> {
            self.inner.fetch(sql, params).await
        }

        async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, QueryError> {
            let verb = sql.trim_start().to_ascii_uppercase();
            // transaction control still works so rollbacks stay clean
            if !verb.starts_with("BEGIN")
                && !verb.starts_with("COMMIT")
                && !verb.starts_with("ROLLBACK")
            {
                self.check()?;
            }
            self.inner.execute(sql, params).await
        }

        async fn execute_insert(
            &mut self,
            sql: &str,
            params: &[SqlValue],
        ) -> Result<i64, QueryError> {
            self.check()?;
            self.inner.execute_insert(sql, params).await
        }

        async fn close(&mut self) -> Result<(), QueryError> {
            self.inner.close().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_and_fetch_round_trip_values() {
        let mut exec = SqliteExecutor::connect(":memory:").await.unwrap();
        exec.execute(
            "CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, note TEXT)",
            &[],
        )
        .await
        .unwrap();

        let id = exec
            .execute_insert(
                "INSERT INTO t (name, note) VALUES (?, ?)",
                params!["alpha", None::<String>],
            )
            .await
            .unwrap();
        assert_eq!(id, 1);

        let rows = exec
            .fetch("SELECT id, name, note FROM t WHERE name = ?", params!["alpha"])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].int::<i64>(0).unwrap(), 1);
        assert_eq!(rows[0].text(1).unwrap(), "alpha");
        assert_eq!(rows[0].opt_text(2).unwrap(), None);
        assert!(rows[0].text(2).is_err());
    }

    #[tokio::test]
    async fn rollback_discards_statements() {
        let mut exec = SqliteExecutor::connect(":memory:").await.unwrap();
        exec.execute("CREATE TABLE t (v INTEGER)", &[]).await.unwrap();

        exec.begin().await.unwrap();
        exec.execute("INSERT INTO t (v) VALUES (?)", params![7])
            .await
            .unwrap();
        exec.rollback().await.unwrap();

        let rows = exec.fetch("SELECT COUNT(*) FROM t", &[]).await.unwrap();
        assert_eq!(rows[0].int::<i64>(0).unwrap(), 0);
    }

    #[tokio::test]
    async fn closed_executor_rejects_statements() {
        let mut exec = SqliteExecutor::connect(":memory:").await.unwrap();
        exec.close().await.unwrap();
        assert!(matches!(
            exec.fetch("SELECT 1", &[]).await,
            Err(QueryError::Closed)
        ));
    }

    #[tokio::test]
    async fn file_database_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");
        let mut exec = SqliteExecutor::connect(path.to_str().unwrap())
            .await
            .unwrap();
        exec.execute("CREATE TABLE t (v INTEGER)", &[]).await.unwrap();
        exec.close().await.unwrap();
        assert!(path.exists());
    }

    #[test]
    fn narrowing_out_of_range_is_a_decode_error() {
        let row = Row::new(vec![SqlValue::Integer(70_000)]);
        assert!(row.int::<u16>(0).is_err());
        assert_eq!(row.int::<u32>(0).unwrap(), 70_000);
    }
}
