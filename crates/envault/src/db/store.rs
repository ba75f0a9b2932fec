//! SQLite store implementation.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::warn;

use super::{DataKey, StoreError, User};

/// SQLite-backed store for file metadata, wrapped data keys, and users.
///
/// Cheaply cloneable: all clones share one pool. The pool is capped at a
/// single connection, which sidesteps SQLite write-lock contention under
/// concurrent request handlers.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at `path` and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        Self::connect(options).await
    }

    /// Open an in-memory database, for tests.
    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new().in_memory(true);
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS files(
                id INTEGER PRIMARY KEY,
                generated_name TEXT NOT NULL UNIQUE,
                file_name BLOB NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS decs(
                id INTEGER PRIMARY KEY,
                value BLOB NOT NULL,
                creation_time INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users(
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                password_hash BLOB
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_gen_name ON files(generated_name)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // -----------------------------------------------------------------------
    // files
    // -----------------------------------------------------------------------

    /// Insert a file record mapping `generated_name` to its encrypted
    /// original filename.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UniqueViolation`] naming `files.generated_name`
    /// when the id is already taken, so the caller can retry with a fresh one.
    pub async fn add_file(
        &self,
        generated_name: &str,
        encrypted_filename: &[u8],
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO files(generated_name, file_name) VALUES (?1, ?2)")
            .bind(generated_name)
            .bind(encrypted_filename)
            .execute(&self.pool)
            .await
            .map_err(into_store_error)?;
        Ok(())
    }

    /// Look up the encrypted filename for a file id.
    pub async fn file_name(&self, generated_name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let row = sqlx::query("SELECT file_name FROM files WHERE generated_name = ?1 LIMIT 1")
            .bind(generated_name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>("file_name")))
    }

    /// Count rows in the `files` table, for consistency assertions in tests.
    #[cfg(test)]
    pub async fn file_count(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM files")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n"))
    }

    /// Delete a file record. Removing a row that does not exist is not an
    /// error, but it is logged: the caller believed the row was there.
    pub async fn remove_file(&self, generated_name: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM files WHERE generated_name = ?1")
            .bind(generated_name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            warn!(generated_name, "remove_file: no matching row");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // decs
    // -----------------------------------------------------------------------

    /// Insert a wrapped data key, returning the assigned monotonic id.
    pub async fn add_data_key(&self, wrapped: &[u8], created_at: i64) -> Result<i64, StoreError> {
        let result = sqlx::query("INSERT INTO decs(value, creation_time) VALUES (?1, ?2)")
            .bind(wrapped)
            .bind(created_at)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// Fetch a data key by id.
    pub async fn data_key(&self, id: i64) -> Result<Option<DataKey>, StoreError> {
        let key = sqlx::query_as::<_, DataKey>(
            "SELECT id, value AS wrapped_key, creation_time AS created_at
             FROM decs WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(key)
    }

    /// Fetch the newest data key: latest `creation_time`, ties broken by the
    /// higher id.
    pub async fn newest_data_key(&self) -> Result<Option<DataKey>, StoreError> {
        let key = sqlx::query_as::<_, DataKey>(
            "SELECT id, value AS wrapped_key, creation_time AS created_at
             FROM decs ORDER BY creation_time DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(key)
    }

    // -----------------------------------------------------------------------
    // users
    // -----------------------------------------------------------------------

    /// Insert a user, returning the assigned id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UniqueViolation`] on a duplicate name.
    pub async fn add_user(&self, name: &str, password_hash: &[u8]) -> Result<i64, StoreError> {
        let result = sqlx::query("INSERT INTO users(name, password_hash) VALUES (?1, ?2)")
            .bind(name)
            .bind(password_hash)
            .execute(&self.pool)
            .await
            .map_err(into_store_error)?;
        Ok(result.last_insert_rowid())
    }

    /// Look up a user by name.
    pub async fn user_by_name(&self, name: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, password_hash FROM users WHERE name = ?1 LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }
}

/// Translate a sqlx error into [`StoreError`], recognising UNIQUE constraint
/// violations. SQLite only reports the offending table and column inside the
/// message text (`UNIQUE constraint failed: files.generated_name`), so they
/// are parsed out of it.
fn into_store_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.kind() == sqlx::error::ErrorKind::UniqueViolation {
            let message = db_err.message();
            if let Some(rest) = message.strip_prefix("UNIQUE constraint failed: ") {
                if let Some((table, column)) = rest.split_once('.') {
                    return StoreError::UniqueViolation {
                        table: table.to_owned(),
                        column: column.to_owned(),
                    };
                }
            }
            return StoreError::UniqueViolation {
                table: String::new(),
                column: String::new(),
            };
        }
    }
    StoreError::Database(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_and_get_file() {
        let store = Store::open_in_memory().await.unwrap();
        store.add_file("uuid-1", b"enc-name").await.unwrap();
        let name = store.file_name("uuid-1").await.unwrap();
        assert_eq!(name.as_deref(), Some(b"enc-name".as_slice()));
    }

    #[tokio::test]
    async fn missing_file_is_none() {
        let store = Store::open_in_memory().await.unwrap();
        assert!(store.file_name("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_file_id_reports_column() {
        let store = Store::open_in_memory().await.unwrap();
        store.add_file("uuid-1", b"a").await.unwrap();
        let err = store.add_file("uuid-1", b"b").await.unwrap_err();
        match err {
            StoreError::UniqueViolation { table, column } => {
                assert_eq!(table, "files");
                assert_eq!(column, "generated_name");
            }
            other => panic!("expected unique violation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn remove_file_is_idempotent() {
        let store = Store::open_in_memory().await.unwrap();
        store.add_file("uuid-1", b"a").await.unwrap();
        store.remove_file("uuid-1").await.unwrap();
        // Second removal finds nothing but still succeeds.
        store.remove_file("uuid-1").await.unwrap();
        assert!(store.file_name("uuid-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn data_key_ids_are_monotonic() {
        let store = Store::open_in_memory().await.unwrap();
        let first = store.add_data_key(b"w1", 100).await.unwrap();
        let second = store.add_data_key(b"w2", 200).await.unwrap();
        assert!(second > first);

        let fetched = store.data_key(first).await.unwrap().unwrap();
        assert_eq!(fetched.wrapped_key, b"w1");
        assert_eq!(fetched.created_at, 100);
    }

    #[tokio::test]
    async fn newest_orders_by_creation_time_then_id() {
        let store = Store::open_in_memory().await.unwrap();
        store.add_data_key(b"old", 100).await.unwrap();
        let newest = store.add_data_key(b"new", 200).await.unwrap();
        assert_eq!(store.newest_data_key().await.unwrap().unwrap().id, newest);

        // Equal timestamps: the higher id wins.
        let tied = store.add_data_key(b"tied", 200).await.unwrap();
        assert_eq!(store.newest_data_key().await.unwrap().unwrap().id, tied);
    }

    #[tokio::test]
    async fn newest_on_empty_table_is_none() {
        let store = Store::open_in_memory().await.unwrap();
        assert!(store.newest_data_key().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn add_and_find_user() {
        let store = Store::open_in_memory().await.unwrap();
        let id = store.add_user("alice", b"hash").await.unwrap();
        let user = store.user_by_name("alice").await.unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.password_hash, b"hash");
        assert!(store.user_by_name("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_user_name_rejected() {
        let store = Store::open_in_memory().await.unwrap();
        store.add_user("alice", b"h1").await.unwrap();
        let err = store.add_user("alice", b"h2").await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { .. }));
    }
}
