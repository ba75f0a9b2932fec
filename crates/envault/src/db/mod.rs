//! Persistence layer: SQLite-backed tables for file metadata, wrapped data
//! keys, and user accounts.

pub mod store;

pub use store::Store;

use thiserror::Error;

/// Errors produced by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An insert hit a UNIQUE constraint. The table and column are parsed out
    /// so callers can decide whether the collision is retryable (a duplicate
    /// generated file id is; a duplicate user name is not).
    #[error("unique constraint violation: {table}.{column}")]
    UniqueViolation { table: String, column: String },

    /// Any other database failure.
    #[error("database access failed")]
    Database(#[from] sqlx::Error),
}

/// A wrapped data encryption key as stored in the `decs` table.
///
/// `wrapped_key` is exactly the KMS-returned ciphertext for a freshly
/// generated 32-byte key; rows are immutable and never deleted, since old
/// ciphertext blobs reference their minting key by id forever.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DataKey {
    pub id: i64,
    pub wrapped_key: Vec<u8>,
    /// Unix seconds at mint time.
    pub created_at: i64,
}

/// A registered user account.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub password_hash: Vec<u8>,
}
