//! Integration tests for the Axum HTTP server
//!
//! These boot the full router (session manager, channel manager, playout
//! queue, resolver registry) against an in-memory SQLite database and an
//! ephemeral port, then drive it with a real HTTP client. Streaming bodies
//! are exercised up to the keepalive layer; no transcoder binary is needed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use diesel::prelude::*;
use futures_util::StreamExt;
use tokio::net::TcpListener;

use airwave_lib::channel::{wire_session_events, ChannelManager};
use airwave_lib::config::Config;
use airwave_lib::db::models::NewChannel;
use airwave_lib::playout::PlayoutQueue;
use airwave_lib::server::{routes::create_router, AppState};
use airwave_lib::sessions::SessionManager;
use airwave_lib::watchdog::Watchdog;

fn create_test_pool() -> airwave_lib::db::DbPool {
    use diesel::r2d2::{ConnectionManager, Pool};

    // In-memory SQLite: one connection only, since each :memory: connection
    // is its own database
    let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .expect("Failed to create test pool");

    let mut conn = pool.get().expect("Failed to get connection");
    airwave_lib::db::run_migrations(&mut conn).expect("Failed to run migrations");
    pool
}

fn seed_channel(pool: &airwave_lib::db::DbPool, number: i32, name: &str) {
    use airwave_lib::db::schema::channels;
    let mut conn = pool.get().unwrap();
    diesel::insert_into(channels::table)
        .values(&NewChannel::new(number, name))
        .execute(&mut conn)
        .unwrap();
}

fn create_test_app_state(config: Config) -> AppState {
    let config = Arc::new(config);
    let pool = create_test_pool();
    seed_channel(&pool, 1, "Retro Movies");
    seed_channel(&pool, 5, "Cartoons");

    let resolver = Arc::new(airwave_lib::build_resolver_registry(&config));
    let watchdog = Arc::new(Watchdog::new(
        Duration::from_secs(30),
        Duration::from_secs(5),
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

    AppState::new(config, pool, sessions, channels, queue, watchdog, resolver)
}

/// Start a test server on a random available port
async fn start_test_server(config: Config) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let state = create_test_app_state(config);
    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to port");
    let addr = listener.local_addr().expect("Failed to get local address");

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server error");
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    (addr, handle)
}

fn quiet_config() -> Config {
    Config {
        // Nonexistent binaries keep supervisors on their sleep fallback
        ffmpeg_path: "/nonexistent/ffmpeg".to_string(),
        ffprobe_path: "/nonexistent/ffprobe".to_string(),
        ytdlp_path: "/nonexistent/yt-dlp".to_string(),
        ..Config::default()
    }
}

#[tokio::test]
async fn test_health_endpoint_returns_200_with_stats() {
    let (addr, _handle) = start_test_server(quiet_config()).await;

    let response = reqwest::get(format!("http://{}/health", addr))
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert!(body["sessions"]["total_sessions"].is_number());
    assert!(body["watchdog"]["active_processes"].is_number());
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let (addr, _handle) = start_test_server(quiet_config()).await;

    let response = reqwest::get(format!("http://{}/definitely/not/here", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

// =============================================================================
// Tuner discovery
// =============================================================================

#[tokio::test]
async fn test_discover_json_shape() {
    let (addr, _handle) = start_test_server(quiet_config()).await;

    let response = reqwest::get(format!("http://{}/discover.json", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["FriendlyName"], "Airwave");
    assert!(body["DeviceID"].as_str().unwrap().starts_with("AIRWAVE"));
    assert!(body["LineupURL"].as_str().unwrap().ends_with("/lineup.json"));
    assert!(body["TunerCount"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn test_lineup_lists_seeded_channels() {
    let (addr, _handle) = start_test_server(quiet_config()).await;

    let response = reqwest::get(format!("http://{}/lineup.json", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Vec<serde_json::Value> = response.json().await.unwrap();
    assert_eq!(body.len(), 2);
    assert_eq!(body[0]["GuideNumber"], "1");
    assert_eq!(body[0]["GuideName"], "Retro Movies");
    assert!(body[0]["URL"].as_str().unwrap().contains("/stream/1"));
    assert_eq!(body[1]["GuideNumber"], "5");
}

#[tokio::test]
async fn test_lineup_status_is_static() {
    let (addr, _handle) = start_test_server(quiet_config()).await;

    let body: serde_json::Value = reqwest::get(format!("http://{}/lineup_status.json", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["ScanInProgress"], 0);
    assert_eq!(body["Source"], "Cable");
}

// =============================================================================
// Guide
// =============================================================================

#[tokio::test]
async fn test_epg_returns_xmltv_with_placeholders() {
    let (addr, _handle) = start_test_server(quiet_config()).await;

    let response = reqwest::get(format!("http://{}/epg.xml", addr)).await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("application/xml"));
    let etag = response.headers().get("etag").cloned();

    let body = response.text().await.unwrap();
    assert!(body.contains("<tv generator-info-name=\"Airwave\">"));
    assert!(body.contains("<channel id=\"airwave.1\">"));
    assert!(body.contains("<channel id=\"airwave.5\">"));
    // No scheduled items seeded, so placeholder blocks fill the guide
    assert!(body.contains("Live Programming"));

    // Conditional request with the returned ETag yields 304
    let etag = etag.expect("guide must carry an ETag");
    let client = reqwest::Client::new();
    let conditional = client
        .get(format!("http://{}/epg.xml", addr))
        .header("If-None-Match", etag)
        .send()
        .await
        .unwrap();
    assert_eq!(conditional.status(), 304);
}

// =============================================================================
// Streaming
// =============================================================================

#[tokio::test]
async fn test_stream_unknown_channel_returns_404() {
    let (addr, _handle) = start_test_server(quiet_config()).await;

    let response = reqwest::get(format!("http://{}/stream/999", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_stream_returns_mpegts_content_type() {
    let (addr, _handle) = start_test_server(quiet_config()).await;

    let response = reqwest::get(format!("http://{}/stream/1", addr)).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "video/mp2t"
    );
}

#[tokio::test]
async fn test_stream_emits_null_ts_keepalives_while_source_stalls() {
    let mut config = quiet_config();
    config.keepalive_interval_ms = 50;
    let (addr, _handle) = start_test_server(config).await;

    let response = reqwest::get(format!("http://{}/stream/1", addr)).await.unwrap();
    assert_eq!(response.status(), 200);

    // With no transcoder available the source stalls immediately; the
    // session worker must keep null TS packets flowing
    let mut stream = response.bytes_stream();
    let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("keepalive must arrive within the interval")
        .expect("body must stay open")
        .expect("chunk read");

    assert_eq!(first.len() % 188, 0, "keepalives are whole TS packets");
    assert_eq!(first[0], 0x47);
    assert_eq!(first[1], 0x1F);
    assert_eq!(first[2], 0xFF);
}

#[tokio::test]
async fn test_per_channel_capacity_enforced() {
    let mut config = quiet_config();
    config.max_sessions_per_channel = 2;
    config.keepalive_interval_ms = 50;
    let (addr, _handle) = start_test_server(config).await;

    let client = reqwest::Client::new();
    let first = client
        .get(format!("http://{}/stream/5", addr))
        .send()
        .await
        .unwrap();
    let second = client
        .get(format!("http://{}/stream/5", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(second.status(), 200);

    // Third attach is refused without disturbing the first two
    let third = client
        .get(format!("http://{}/stream/5", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(third.status(), 503);

    // Another channel is unaffected by channel 5 being full
    let other = client
        .get(format!("http://{}/stream/1", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(other.status(), 200);

    // Freeing a slot lets a new attach through once the worker notices the
    // disconnect (on its next keepalive write)
    drop(first);
    tokio::time::sleep(Duration::from_millis(600)).await;

    let fourth = client
        .get(format!("http://{}/stream/5", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(fourth.status(), 200);
}
