use thiserror::Error;

/// Storage-layer error taxonomy. Repositories translate Postgres
/// constraint codes into `Conflict`/`Integrity` so callers can react
/// without parsing driver messages.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("row not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    /// Maps a driver error onto the taxonomy. Unique-violations become
    /// `Conflict`, check/FK violations become `Integrity`, everything
    /// else stays `Sqlx`.
    pub fn classify(err: sqlx::Error, what: &str) -> Self {
        if let sqlx::Error::Database(db) = &err {
            match db.code().as_deref() {
                Some("23505") => return DbError::Conflict(what.to_string()),
                Some("23503") | Some("23514") => return DbError::Integrity(what.to_string()),
                _ => {}
            }
        }
        DbError::Sqlx(err)
    }
}
