use std::sync::Arc;

use crate::channel::ChannelManager;
use crate::config::Config;
use crate::db::{DbPool, DbPooledConnection};
use crate::playout::PlayoutQueue;
use crate::resolver::ResolverRegistry;
use crate::sessions::SessionManager;
use crate::watchdog::Watchdog;

/// Application state for the HTTP server.
///
/// The single core context: every shared component is created once at
/// startup and threaded through here; nothing hides behind globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pool: DbPool,
    pub sessions: Arc<SessionManager>,
    pub channels: Arc<ChannelManager>,
    pub queue: Arc<PlayoutQueue>,
    pub watchdog: Arc<Watchdog>,
    pub resolver: Arc<ResolverRegistry>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        pool: DbPool,
        sessions: Arc<SessionManager>,
        channels: Arc<ChannelManager>,
        queue: Arc<PlayoutQueue>,
        watchdog: Arc<Watchdog>,
        resolver: Arc<ResolverRegistry>,
    ) -> Self {
        Self {
            config,
            pool,
            sessions,
            channels,
            queue,
            watchdog,
            resolver,
        }
    }

    pub fn get_port(&self) -> u16 {
        self.config.port
    }

    /// Get a database connection from the pool
    pub fn get_connection(&self) -> Result<DbPooledConnection, r2d2::Error> {
        self.pool.get()
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}
