use std::path::PathBuf;

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbPooledConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Resolve the SQLite database path, creating the data directory if needed.
///
/// Uses the configured data dir when set, otherwise the platform data
/// directory (`~/.local/share/airwave` on Linux).
pub fn resolve_db_path(data_dir: Option<&PathBuf>) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let dir = match data_dir {
        Some(dir) => dir.clone(),
        None => dirs::data_dir()
            .ok_or("Cannot determine platform data directory")?
            .join("airwave"),
    };

    std::fs::create_dir_all(&dir).map_err(|e| {
        format!(
            "Cannot create data directory at '{}': {}. Please check folder permissions.",
            dir.display(),
            e
        )
    })?;

    Ok(dir.join("airwave.db"))
}

/// Build the connection pool for the given database URL
pub fn create_pool(database_url: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(16)
        .build(manager)
        .map_err(|e| format!("Failed to create connection pool: {}", e))?;
    Ok(pool)
}

/// Establish a connection to the SQLite database with busy timeout
pub fn establish_connection(database_url: &str) -> Result<SqliteConnection, diesel::ConnectionError> {
    let mut conn = SqliteConnection::establish(database_url)?;

    // 5s busy timeout so concurrent writers back off instead of failing
    diesel::sql_query("PRAGMA busy_timeout = 5000")
        .execute(&mut conn)
        .map_err(|e| diesel::ConnectionError::BadConnection(format!("Failed to set busy_timeout: {}", e)))?;

    Ok(conn)
}

/// Run all pending migrations
pub fn run_migrations(
    conn: &mut SqliteConnection,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    conn.run_pending_migrations(MIGRATIONS)?;
    Ok(())
}
