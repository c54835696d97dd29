//! HTTP request handlers
//!
//! The streaming endpoint attaches a session, subscribes to the channel's
//! broadcaster, and feeds the client through a per-session throttled
//! worker. Discovery endpoints read the channel registry and playout queue
//! only; they never touch the hot path.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::epg;
use super::hdhr;
use super::state::AppState;
use crate::channel::broadcast::RecvError;
use crate::sessions::SessionErrorKind;
use crate::throttle::{StreamThrottler, ThrottleConfig};

/// Health check response structure
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_supervisors: usize,
    pub sessions: crate::sessions::ManagerStats,
    pub watchdog: crate::watchdog::WatchdogStats,
    pub resolver_cache_entries: usize,
}

/// Health and stats endpoint; used by monitoring tools.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            active_supervisors: state.channels.active_supervisors(),
            sessions: state.sessions.stats(),
            watchdog: state.watchdog.stats(),
            resolver_cache_entries: state.resolver.global_cache_size(),
        }),
    )
}

/// Fallback handler for unknown routes
pub async fn fallback_handler() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Tuner discovery descriptor
pub async fn discover_json(State(state): State<AppState>) -> impl IntoResponse {
    let response = hdhr::generate_discover_response(
        &state.config.friendly_name,
        state.get_port(),
        state.config.max_sessions_per_channel,
    );
    Json(response)
}

/// Channel lineup for DVR clients
pub async fn lineup_json(State(state): State<AppState>) -> impl IntoResponse {
    let channels = state.channels.load_channels();
    Json(hdhr::generate_lineup(&channels, state.get_port()))
}

pub async fn lineup_status_json() -> impl IntoResponse {
    Json(hdhr::generate_lineup_status())
}

fn generate_etag(content: &str) -> String {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

/// XMLTV guide over the rolling window
pub async fn epg_xml(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let channels = state.channels.load_channels();
    let xml_content = epg::generate_guide(&channels, &state.queue, state.config.guide_days)
        .map_err(|e| {
            tracing::error!("Guide generation failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        })?;

    let etag = format!("\"{}\"", generate_etag(&xml_content));

    // Guides change slowly; a 304 saves clients a multi-megabyte download
    if let Some(client_etag) = headers.get(header::IF_NONE_MATCH) {
        if client_etag.to_str().map(|e| e == etag).unwrap_or(false) {
            let mut response_headers = HeaderMap::new();
            response_headers.insert(header::ETAG, HeaderValue::from_str(&etag).unwrap_or(HeaderValue::from_static("\"0\"")));
            response_headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static("public, max-age=300"),
            );
            return Ok((StatusCode::NOT_MODIFIED, response_headers, String::new()));
        }
    }

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/xml; charset=utf-8"),
    );
    response_headers.insert(header::ETAG, HeaderValue::from_str(&etag).unwrap_or(HeaderValue::from_static("\"0\"")));
    response_headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=300"),
    );

    Ok((StatusCode::OK, response_headers, xml_content))
}

/// MPEG-TS streaming endpoint.
///
/// 404 for unknown channels, 503 at the per-channel session cap; otherwise
/// a chunked `video/mp2t` body that flows until the client disconnects.
pub async fn stream_channel(
    State(state): State<AppState>,
    Path(channel_number): Path<i32>,
) -> Response {
    let channel = match state.channels.channel_by_number(channel_number) {
        Some(channel) => channel,
        None => {
            return (StatusCode::NOT_FOUND, "Unknown channel").into_response();
        }
    };

    let session = match state.sessions.create_session(channel.id, channel.number, None) {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!("Rejecting stream request: {}", e);
            return (StatusCode::SERVICE_UNAVAILABLE, "Channel at capacity").into_response();
        }
    };

    let supervisor = state.channels.ensure_supervisor(&channel);
    state.channels.notify_subscribed(channel.id);
    let subscriber = supervisor.broadcaster.subscribe();

    let (tx, body_rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(16);
    tokio::spawn(session_worker(
        state.clone(),
        session.session_id.clone(),
        channel.id,
        subscriber,
        tx,
    ));

    let body = Body::from_stream(ReceiverStream::new(body_rx));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp2t")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Per-client delivery worker: broadcaster -> throttle -> response body.
///
/// Ends the session when the client disconnects, the supervisor goes away,
/// or the worker is dropped.
async fn session_worker(
    state: AppState,
    session_id: String,
    channel_id: i32,
    mut subscriber: tokio::sync::broadcast::Receiver<Bytes>,
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
) {
    let config = &state.config;
    let mut throttler = StreamThrottler::new(
        ThrottleConfig {
            target_bitrate_bps: config.target_bitrate_bps,
            mode: config.throttle_mode,
            max_buffer_bytes: config.max_buffer_bytes,
            min_buffer_bytes: config.min_flush_bytes,
            keepalive_interval_ms: config.keepalive_interval_ms,
            ..ThrottleConfig::default()
        },
        Some(channel_id),
    );
    let keepalive_interval = Duration::from_millis(config.keepalive_interval_ms);

    let reason = 'worker: loop {
        match tokio::time::timeout(keepalive_interval, subscriber.recv()).await {
            Ok(Ok(chunk)) => {
                for piece in throttler.throttle(chunk).await {
                    let len = piece.len();
                    if tx.send(Ok(piece)).await.is_err() {
                        break 'worker "client_disconnect";
                    }
                    state.sessions.record_data(&session_id, len);
                }
            }
            Ok(Err(RecvError::Lagged(dropped))) => {
                // Whole-chunk drop-oldest; the session recovers at live
                state.sessions.record_error(
                    &session_id,
                    SessionErrorKind::ResourceExhausted,
                    format!("dropped {} chunks to catch up", dropped),
                    true,
                );
                continue;
            }
            Ok(Err(RecvError::Closed)) => break 'worker "channel_stopped",
            Err(_) => {
                // Source stall: keep the client's decoder fed
                if let Some(keepalive) = throttler.keepalive_if_due() {
                    if tx.send(Ok(keepalive)).await.is_err() {
                        break 'worker "client_disconnect";
                    }
                }
            }
        }
    };

    state.sessions.end_session(&session_id, reason);
}
