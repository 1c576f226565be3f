/// Storage layer for monitors and probe results.
///
/// Backs both sides of the core's persistence contract: the monitor
/// registry read at (re)scheduling time and the append-only probe result
/// sink.
pub mod migrations;
pub mod repository;

pub use repository::ProbeStore;

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
