//! Airwave - self-hosted IPTV head-end
//!
//! Composes media libraries into continuously-playing virtual channels and
//! serves them as MPEG-TS over HTTP with a DVR-compatible tuner surface.

pub mod channel;
pub mod config;
pub mod db;
pub mod errors;
pub mod playout;
pub mod resolver;
pub mod scheduler;
pub mod screens;
pub mod server;
pub mod sessions;
pub mod throttle;
pub mod transcoder;
pub mod watchdog;

use std::sync::Arc;
use std::time::Duration;

use diesel::prelude::*;

use crate::channel::{wire_session_events, ChannelManager};
use crate::config::Config;
use crate::db::models::NewEventLog;
use crate::playout::PlayoutQueue;
use crate::resolver::{
    archive_org::ArchiveOrgResolver, jellyfin::JellyfinResolver, local::LocalFileResolver,
    plex::PlexResolver, youtube::YouTubeResolver, ResolverRegistry, SourceResolver,
};
use crate::scheduler::MaintenanceScheduler;
use crate::server::AppState;
use crate::sessions::SessionManager;
use crate::watchdog::Watchdog;

/// Build the resolver registry from configuration.
pub fn build_resolver_registry(config: &Config) -> ResolverRegistry {
    let jellyfin_servers: Vec<_> = config
        .jellyfin_servers
        .iter()
        .filter(|s| !s.is_emby)
        .cloned()
        .collect();
    let emby_servers: Vec<_> = config
        .jellyfin_servers
        .iter()
        .filter(|s| s.is_emby)
        .cloned()
        .collect();

    let resolvers: Vec<Arc<dyn SourceResolver>> = vec![
        Arc::new(YouTubeResolver::new(
            config.ytdlp_path.clone(),
            config.youtube_cookies_file.clone(),
            config.preferred_quality,
        )),
        Arc::new(ArchiveOrgResolver::new()),
        Arc::new(PlexResolver::new(config.plex_servers.clone())),
        Arc::new(JellyfinResolver::new(jellyfin_servers, false)),
        Arc::new(JellyfinResolver::new(emby_servers, true)),
        Arc::new(LocalFileResolver::new(config.allowed_media_paths.clone())),
    ];

    ResolverRegistry::new(resolvers, config.resolve_timeout())
}

fn log_startup_event(pool: &db::DbPool) {
    use crate::db::schema::event_log;
    if let Ok(mut conn) = pool.get() {
        let details = serde_json::json!({ "version": env!("CARGO_PKG_VERSION") });
        let _ = diesel::insert_into(event_log::table)
            .values(
                &NewEventLog::new(
                    "info",
                    "system",
                    format!("Airwave v{} started", env!("CARGO_PKG_VERSION")),
                )
                .with_details(details.to_string()),
            )
            .execute(&mut conn);
    }
}

/// Run the head-end until interrupted.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    let config = Arc::new(config);

    // Database
    let db_path = db::resolve_db_path(config.data_dir.as_ref())?;
    let database_url = db_path.to_string_lossy().to_string();
    let mut conn = db::establish_connection(&database_url)
        .map_err(|e| format!("Failed to connect to database: {}", e))?;
    db::run_migrations(&mut conn).map_err(|e| format!("Failed to run migrations: {}", e))?;
    let pool = db::create_pool(&database_url)?;
    log_startup_event(&pool);

    // Core components
    let resolver = Arc::new(build_resolver_registry(&config));
    let watchdog = Arc::new(Watchdog::new(
        config.watchdog_timeout(),
        Duration::from_secs(config.watchdog_check_interval_secs),
    ));
    let sessions = Arc::new(SessionManager::new(
        config.max_sessions_per_channel,
        Duration::from_secs(config.idle_timeout_secs),
        Duration::from_secs(config.cleanup_interval_secs),
        config.max_restarts_per_session,
    ));
    let queue = Arc::new(PlayoutQueue::new(pool.clone()));
    let channels = Arc::new(ChannelManager::new(
        config.clone(),
        pool.clone(),
        resolver.clone(),
        watchdog.clone(),
        queue.clone(),
    ));

    wire_session_events(&channels, &sessions);

    // Background workers
    let watchdog_task = watchdog.start();
    let cleanup_task = sessions.start();
    let maintenance = MaintenanceScheduler::new(
        config.clone(),
        resolver.clone(),
        queue.clone(),
        channels.clone(),
    );
    if let Err(e) = maintenance.start().await {
        tracing::error!(
            "Failed to start maintenance scheduler: {}. Proactive URL refresh will not run!",
            e
        );
    }

    channels.start_always_on();

    let state = AppState::new(
        config.clone(),
        pool,
        sessions.clone(),
        channels.clone(),
        queue,
        watchdog.clone(),
        resolver,
    );

    tokio::select! {
        result = server::start_server(state) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    // Graceful teardown: supervisors first so transcoders terminate
    channels.shutdown_all();
    watchdog.stop();
    sessions.stop();
    let _ = maintenance.stop().await;
    let _ = tokio::time::timeout(
        Duration::from_secs(10),
        futures::future::join(watchdog_task, cleanup_task),
    )
    .await;

    tracing::info!("Airwave stopped");
    Ok(())
}
