/// Errors raised by the SQLite store.
///
/// Constraint violations are split out so the HTTP layer can answer 404/409
/// instead of a generic storage failure.
///
/// # Examples
///
/// ```rust
/// use sentinel_storage::error::StorageError;
///
/// let err = StorageError::Duplicate {
///     entity: "alert_rule",
///     key: "High error rate".to_string(),
/// };
/// assert!(err.to_string().contains("alert_rule"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found in the database.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// A unique column already holds this value.
    #[error("Storage: {entity} '{key}' already exists")]
    Duplicate { entity: &'static str, key: String },

    /// The row references a missing parent, or is still referenced by children.
    #[error("Storage: {entity} {id} violates a foreign key constraint")]
    ForeignKey { entity: &'static str, id: String },

    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization failure for context or channel config columns.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Extended SQLite result code of a constraint violation, if `err` is one.
pub(crate) fn constraint_code(err: &rusqlite::Error) -> Option<i32> {
    match err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Some(e.extended_code)
        }
        _ => None,
    }
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        constraint_code(err),
        Some(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE) | Some(rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    )
}

pub(crate) fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    constraint_code(err) == Some(rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY)
}
