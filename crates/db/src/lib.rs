pub mod connection;
pub mod executor;
pub mod loader;
pub mod migrations;
pub mod repositories;

pub use connection::{connect_lazy_with_settings, connect_with_settings, DbPool};
pub use executor::PgStatementExecutor;
pub use loader::{load_supply_chain, read_dataset, CsvDataset, LoadSummary, LoaderError};
pub use repositories::{PgSchemaSource, RepositoryError, SqlAuditRepository};
