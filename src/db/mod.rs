pub mod connection;
pub mod models;
pub mod schema;

pub use connection::{create_pool, establish_connection, resolve_db_path, run_migrations, DbPool, DbPooledConnection};
pub use models::{Channel, EventLogEntry, NewChannel, NewEventLog, NewPlayoutItem, PlayoutItemRow, Setting};
