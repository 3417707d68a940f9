use thiserror::Error;

pub mod audit;
pub mod schema;

pub use audit::SqlAuditRepository;
pub use schema::PgSchemaSource;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}
