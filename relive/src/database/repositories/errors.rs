use thiserror::Error;

pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("constraint violation: {0}")]
    Constraint(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(error: sqlx::Error) -> Self {
        if let Some(db_error) = error.as_database_error()
            && db_error.is_unique_violation()
        {
            return Self::Constraint(db_error.message().to_string());
        }
        Self::Database(error)
    }
}

impl From<RepositoryError> for crate::Error {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(e) => crate::Error::DatabaseSqlx(e),
            RepositoryError::Constraint(msg) => crate::Error::Validation(msg),
        }
    }
}
