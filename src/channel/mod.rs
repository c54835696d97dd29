//! Channel supervision
//!
//! One supervisor task per active channel drives the playout queue forward:
//! resolve the current item, probe it, stream it through the transcoder,
//! fan chunks out to subscribers, and recover from failures via the retry
//! policy, filler playlist, and error screens.

pub mod broadcast;
pub mod recovery;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use diesel::prelude::*;
use tokio_util::sync::CancellationToken;

use crate::channel::broadcast::Broadcaster;
use crate::channel::recovery::{Attempt, RecoveryAction, RetryState};
use crate::config::Config;
use crate::db::models::NewEventLog;
use crate::db::DbPool;
use crate::errors::{classify, ErrorKind, StreamError};
use crate::playout::{PlayoutItem, PlayoutQueue};
use crate::resolver::{MediaRef, ResolvedUrl, ResolverRegistry};
use crate::screens::{build_screen_command, ScreenConfig, ScreenMessage, VisualMode};
use crate::sessions::SessionManager;
use crate::transcoder::{
    build_transcode_command, clamp_seek_offset, probe_stream, spawn_transcoder, TranscodeError,
    TranscodeOptions,
};
use crate::watchdog::Watchdog;

/// Gaps shorter than this are bridged without a buffering screen
const GAP_BRIDGE_SECS: i64 = 2;

/// How long an offline screen plays per cycle when nothing is scheduled
const OFFLINE_SCREEN_SECS: f64 = 30.0;

/// Channel registry entry decoded from the database row
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub id: i32,
    pub number: i32,
    pub name: String,
    pub always_on: bool,
    pub offline_image: Option<String>,
    pub filler: Vec<MediaRef>,
}

impl ChannelInfo {
    pub fn from_row(row: crate::db::models::Channel) -> Option<Self> {
        let filler = serde_json::from_str(&row.filler_refs).unwrap_or_default();
        Some(Self {
            id: row.id?,
            number: row.number,
            name: row.name,
            always_on: row.always_on != 0,
            offline_image: row.offline_image,
            filler,
        })
    }
}

/// Supervisor states, exposed for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    Idle,
    Starting,
    Playing,
    Buffering,
    Error,
    Ended,
}

enum PlayOutcome {
    /// Source ended cleanly
    Completed,
    Failed(StreamError),
    Cancelled,
}

/// Shared handle to a running channel supervisor
pub struct SupervisorHandle {
    pub channel: ChannelInfo,
    pub broadcaster: Arc<Broadcaster>,
    shutdown: CancellationToken,
    empty_since: Mutex<Option<Instant>>,
    restart_count: AtomicU32,
    state: Mutex<SupervisorState>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SupervisorHandle {
    pub fn state(&self) -> SupervisorState {
        *self.state.lock().unwrap()
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn set_state(&self, state: SupervisorState) {
        *self.state.lock().unwrap() = state;
    }

    fn mark_empty(&self) {
        let mut empty_since = self.empty_since.lock().unwrap();
        if empty_since.is_none() {
            *empty_since = Some(Instant::now());
        }
    }

    fn mark_subscribed(&self) {
        *self.empty_since.lock().unwrap() = None;
    }

    fn empty_for(&self) -> Option<Duration> {
        self.empty_since.lock().unwrap().map(|t| t.elapsed())
    }

    fn is_finished(&self) -> bool {
        self.task
            .lock()
            .unwrap()
            .as_ref()
            .map(|t| t.is_finished())
            .unwrap_or(true)
    }
}

/// Owns the supervisors for all channels and the resources they share.
pub struct ChannelManager {
    config: Arc<Config>,
    pool: DbPool,
    resolver: Arc<ResolverRegistry>,
    watchdog: Arc<Watchdog>,
    queue: Arc<PlayoutQueue>,
    supervisors: DashMap<i32, Arc<SupervisorHandle>>,
}

impl ChannelManager {
    pub fn new(
        config: Arc<Config>,
        pool: DbPool,
        resolver: Arc<ResolverRegistry>,
        watchdog: Arc<Watchdog>,
        queue: Arc<PlayoutQueue>,
    ) -> Self {
        Self {
            config,
            pool,
            resolver,
            watchdog,
            queue,
            supervisors: DashMap::new(),
        }
    }

    /// All channels from the registry, ordered by number.
    pub fn load_channels(&self) -> Vec<ChannelInfo> {
        use crate::db::schema::channels;
        let mut conn = match self.pool.get() {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!("Channel registry unavailable: {}", e);
                return Vec::new();
            }
        };
        let rows: Vec<crate::db::models::Channel> = channels::table
            .order(channels::number.asc())
            .load(&mut conn)
            .unwrap_or_default();
        rows.into_iter().filter_map(ChannelInfo::from_row).collect()
    }

    pub fn channel_by_number(&self, number: i32) -> Option<ChannelInfo> {
        self.load_channels().into_iter().find(|c| c.number == number)
    }

    /// Get (spawning if needed) the supervisor for a channel.
    pub fn ensure_supervisor(self: &Arc<Self>, channel: &ChannelInfo) -> Arc<SupervisorHandle> {
        use dashmap::mapref::entry::Entry;

        // The entry guard serializes concurrent first-subscribers so only
        // one supervisor spawns per channel
        match self.supervisors.entry(channel.id) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_finished() {
                    return occupied.get().clone();
                }
                let handle = self.spawn_supervisor(channel);
                occupied.insert(handle.clone());
                handle
            }
            Entry::Vacant(vacant) => {
                let handle = self.spawn_supervisor(channel);
                vacant.insert(handle.clone());
                handle
            }
        }
    }

    fn spawn_supervisor(self: &Arc<Self>, channel: &ChannelInfo) -> Arc<SupervisorHandle> {
        let handle = Arc::new(SupervisorHandle {
            channel: channel.clone(),
            broadcaster: Arc::new(Broadcaster::new(self.config.broadcast_capacity())),
            shutdown: CancellationToken::new(),
            empty_since: Mutex::new(None),
            restart_count: AtomicU32::new(0),
            state: Mutex::new(SupervisorState::Idle),
            task: Mutex::new(None),
        });

        let supervisor = Supervisor {
            manager: self.clone(),
            handle: handle.clone(),
            timeout_flag: Arc::new(AtomicBool::new(false)),
            filler_cursor: 0,
        };
        let task = tokio::spawn(supervisor.run());
        *handle.task.lock().unwrap() = Some(task);

        tracing::info!(
            "Started supervisor for channel {} ({})",
            channel.number,
            channel.name
        );
        handle
    }

    pub fn supervisor(&self, channel_id: i32) -> Option<Arc<SupervisorHandle>> {
        self.supervisors.get(&channel_id).map(|h| h.value().clone())
    }

    /// Session-manager channel-empty callback target: starts the idle-grace
    /// countdown for the supervisor.
    pub fn notify_channel_empty(&self, channel_id: i32) {
        if let Some(handle) = self.supervisors.get(&channel_id) {
            handle.mark_empty();
        }
    }

    pub fn notify_subscribed(&self, channel_id: i32) {
        if let Some(handle) = self.supervisors.get(&channel_id) {
            handle.mark_subscribed();
        }
    }

    /// Eagerly start supervisors for channels marked always-on.
    pub fn start_always_on(self: &Arc<Self>) {
        for channel in self.load_channels() {
            if channel.always_on {
                self.ensure_supervisor(&channel);
            }
        }
    }

    pub fn shutdown_all(&self) {
        for entry in self.supervisors.iter() {
            entry.shutdown();
        }
    }

    pub fn active_supervisors(&self) -> usize {
        self.supervisors
            .iter()
            .filter(|entry| !entry.is_finished())
            .count()
    }

    fn log_event(&self, level: &str, message: String) {
        use crate::db::schema::event_log;
        if let Ok(mut conn) = self.pool.get() {
            let _ = diesel::insert_into(event_log::table)
                .values(&NewEventLog::new(level, "streaming", message))
                .execute(&mut conn);
        }
    }
}

/// Register the session-manager callbacks that drive supervisor idle
/// teardown. Called once during startup wiring.
pub fn wire_session_events(manager: &Arc<ChannelManager>, sessions: &SessionManager) {
    let on_empty = manager.clone();
    sessions.on_channel_empty(Arc::new(move |channel_id| {
        on_empty.notify_channel_empty(channel_id);
    }));
}

struct Supervisor {
    manager: Arc<ChannelManager>,
    handle: Arc<SupervisorHandle>,
    /// Set by the watchdog callback when it kills our transcoder
    timeout_flag: Arc<AtomicBool>,
    filler_cursor: usize,
}

impl Supervisor {
    async fn run(mut self) {
        let channel = self.handle.channel.clone();
        self.handle.set_state(SupervisorState::Starting);

        loop {
            if self.handle.shutdown.is_cancelled() {
                break;
            }
            if self.should_tear_down() {
                tracing::info!(
                    "Channel {} idle past grace period, stopping supervisor",
                    channel.number
                );
                break;
            }

            match self.manager.queue.current(channel.id, Utc::now()) {
                Ok(Some((item, seek))) => self.run_item(item, seek).await,
                Ok(None) => self.run_gap().await,
                Err(e) => {
                    tracing::error!("Channel {}: playout queue error: {}", channel.number, e);
                    self.play_screen(
                        ScreenMessage {
                            error_code: Some("QUEUE_ERROR".to_string()),
                            ..ScreenMessage::default()
                        },
                        OFFLINE_SCREEN_SECS,
                    )
                    .await;
                }
            }
        }

        self.manager.watchdog.unregister(channel.id);
        self.handle.set_state(SupervisorState::Ended);
        // Only deregister our own handle; a replacement may already be live
        self.manager
            .supervisors
            .remove_if(&channel.id, |_, h| Arc::ptr_eq(h, &self.handle));
        tracing::info!("Supervisor for channel {} stopped", channel.number);
    }

    fn should_tear_down(&self) -> bool {
        if self.handle.channel.always_on {
            return false;
        }
        if self.handle.broadcaster.subscriber_count() > 0 {
            self.handle.mark_subscribed();
            return false;
        }
        match self.handle.empty_for() {
            Some(empty) => empty.as_secs() >= self.manager.config.idle_grace_secs,
            None => {
                // No subscriber has attached yet; start the countdown now
                self.handle.mark_empty();
                false
            }
        }
    }

    /// Play one scheduled item to completion, running the recovery policy on
    /// failures.
    async fn run_item(&mut self, item: PlayoutItem, seek: f64) {
        let channel = self.handle.channel.clone();
        let mut retry = RetryState::new();
        let mut attempt = Attempt::default();
        let mut seek = seek;

        loop {
            if self.handle.shutdown.is_cancelled() {
                return;
            }

            if !attempt.delay.is_zero() {
                self.handle.set_state(SupervisorState::Error);
                // Keep bytes flowing while we wait out the backoff
                self.play_screen_for_backoff(attempt.delay).await;
            }

            self.handle.set_state(SupervisorState::Starting);
            let outcome = self.play_media(&item.media, seek, attempt).await;

            match outcome {
                PlayOutcome::Completed => {
                    self.handle.restart_count.store(0, Ordering::Relaxed);
                    if let Err(e) = self.manager.queue.advance(&item) {
                        tracing::error!("Channel {}: failed to mark item consumed: {}", channel.number, e);
                    }
                    self.bridge_to_next(&item).await;
                    return;
                }
                PlayOutcome::Cancelled => return,
                PlayOutcome::Failed(error) => {
                    tracing::warn!(
                        "Channel {}: item {} failed ({}): {}",
                        channel.number,
                        item.id,
                        error.kind,
                        error.message
                    );

                    let restarts = self.handle.restart_count.fetch_add(1, Ordering::Relaxed) + 1;
                    if restarts >= self.manager.config.restart_cap {
                        self.pin_to_error_screen(&error).await;
                        self.handle.restart_count.store(0, Ordering::Relaxed);
                        return;
                    }

                    match retry.next_action(error.kind) {
                        RecoveryAction::Retry(next_attempt) => {
                            attempt = next_attempt;
                            // Rejoin live rather than replaying from the
                            // original join point
                            seek = item.seek_offset_at(Utc::now());
                            continue;
                        }
                        RecoveryAction::Abandon => {
                            self.manager.log_event(
                                "warning",
                                format!(
                                    "channel {}: abandoning item {} after {} attempts ({})",
                                    channel.number,
                                    item.id,
                                    retry.attempts(),
                                    error.kind
                                ),
                            );
                            if let Err(e) = self.manager.queue.advance(&item) {
                                tracing::error!(
                                    "Channel {}: failed to mark abandoned item consumed: {}",
                                    channel.number,
                                    e
                                );
                            }
                            self.after_abandon().await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Nothing scheduled right now: bridge to the next item, fall back to
    /// filler, or hold an offline slate.
    async fn run_gap(&mut self) {
        let channel = self.handle.channel.clone();

        if let Ok(Some(next)) = self.manager.queue.upcoming(channel.id, Utc::now()) {
            let gap = (next.scheduled_start - Utc::now()).num_seconds();
            if gap <= GAP_BRIDGE_SECS {
                tokio::time::sleep(Duration::from_millis(250)).await;
                return;
            }
            // Short waits show a buffering card; longer ones cycle filler
            if gap <= 60 {
                self.handle.set_state(SupervisorState::Buffering);
                self.play_screen(ScreenMessage::buffering(Some(channel.name.clone())), gap as f64)
                    .await;
                return;
            }
        }

        if !self.handle.channel.filler.is_empty() {
            let media = self.next_filler();
            self.handle.set_state(SupervisorState::Playing);
            match self.play_media(&media, 0.0, Attempt::default()).await {
                PlayOutcome::Completed | PlayOutcome::Cancelled => {}
                PlayOutcome::Failed(error) => {
                    tracing::warn!(
                        "Channel {}: filler failed ({}), holding offline screen",
                        channel.number,
                        error.kind
                    );
                    self.play_offline_screen().await;
                }
            }
            return;
        }

        self.play_offline_screen().await;
    }

    fn next_filler(&mut self) -> MediaRef {
        let filler = &self.handle.channel.filler;
        // Offset by restart count so repeated failures rotate the head
        let index = (self.filler_cursor + self.handle.restart_count() as usize) % filler.len();
        self.filler_cursor = self.filler_cursor.wrapping_add(1);
        filler[index].clone()
    }

    async fn after_abandon(&mut self) {
        let channel = self.handle.channel.clone();

        // Prefer the next scheduled item when it is imminent or already due
        if let Ok(Some(next)) = self.manager.queue.upcoming(channel.id, Utc::now()) {
            let gap = (next.scheduled_start - Utc::now()).num_seconds();
            if gap <= 60 {
                if gap > GAP_BRIDGE_SECS {
                    self.handle.set_state(SupervisorState::Buffering);
                    self.play_screen(
                        ScreenMessage::buffering(Some(channel.name.clone())),
                        gap as f64,
                    )
                    .await;
                }
                return;
            }
        }

        if !self.handle.channel.filler.is_empty() {
            let media = self.next_filler();
            if let PlayOutcome::Failed(_) = self.play_media(&media, 0.0, Attempt::default()).await {
                self.play_offline_screen().await;
            }
        } else {
            self.play_offline_screen().await;
        }
    }

    /// Resolve, probe, transcode, and broadcast one media ref.
    async fn play_media(&self, media: &MediaRef, seek: f64, attempt: Attempt) -> PlayOutcome {
        let channel = &self.handle.channel;
        let config = &self.manager.config;

        // Resolve, force-refreshing expiring URLs up front
        let resolved = match self.resolve_media(media, attempt.force_refresh).await {
            Ok(resolved) => resolved,
            Err(e) => {
                let classified = classify(&e.message, None);
                // The resolver's verdict on retryability is final; a
                // non-retryable resolution failure must abandon the item
                let error = if e.retryable || !classified.kind.retryable() {
                    classified
                } else {
                    StreamError::new(ErrorKind::Permission, e.message.clone())
                };
                return PlayOutcome::Failed(error);
            }
        };

        // Use pre-probed codec info when present, probing otherwise
        let codec_info = match &resolved.codec_info {
            Some(info) if !info.video_codec.is_empty() => info.clone(),
            _ => {
                probe_stream(&config.ffprobe_path, &resolved.url, config.probe_timeout()).await
            }
        };

        let duration = if codec_info.duration > 0.0 {
            codec_info.duration
        } else {
            media.duration_secs.unwrap_or(0.0)
        };
        let seek = clamp_seek_offset(seek, duration);

        let opts = TranscodeOptions {
            ffmpeg_path: config.ffmpeg_path.clone(),
            log_level: config.ffmpeg_log_level.clone(),
            threads: config.ffmpeg_threads,
            extra_flags: config.ffmpeg_extra_flags.clone(),
            hardware_acceleration: config.hardware_acceleration.clone(),
            // drop_cookies has no transcoder-side effect: cookies only feed
            // the extractor, so that step is a plain retry here
            minimal_headers: attempt.minimal_headers,
        };
        let argv = build_transcode_command(
            &opts,
            &resolved.url,
            &codec_info,
            resolved.source_kind,
            seek,
        );

        let (mut stream, handle) = match spawn_transcoder(&argv, config.chunk_size) {
            Ok(pair) => pair,
            Err(e) => {
                return PlayOutcome::Failed(classify(&e.to_string(), None));
            }
        };
        let process_handle = handle.clone();

        self.timeout_flag.store(false, Ordering::Release);
        let timeout_flag = self.timeout_flag.clone();
        self.manager
            .watchdog
            .register(
                channel.id,
                handle,
                Arc::new(move |_| {
                    timeout_flag.store(true, Ordering::Release);
                }),
            )
            .await;

        self.handle.set_state(SupervisorState::Playing);
        tracing::info!(
            "Channel {}: playing {} (seek {:.0}s, source {})",
            channel.number,
            media.title.as_deref().unwrap_or("untitled"),
            seek,
            resolved.source_kind
        );

        // Either the flag or the handle's cancellation marks a watchdog
        // kill; the flag alone can lag behind the stream ending
        let watchdog_killed =
            |flag: &AtomicBool| flag.load(Ordering::Acquire) || process_handle.was_cancelled();

        let outcome = loop {
            tokio::select! {
                _ = self.handle.shutdown.cancelled() => break PlayOutcome::Cancelled,
                chunk = stream.recv() => match chunk {
                    Some(Ok(bytes)) => {
                        self.manager.watchdog.report_output(channel.id, bytes.len());
                        self.handle.broadcaster.send(bytes);
                    }
                    Some(Err(TranscodeError::ProcessFailed { status, stderr_tail })) => {
                        if watchdog_killed(&self.timeout_flag) {
                            break PlayOutcome::Failed(StreamError::new(
                                ErrorKind::Network,
                                "stream timeout: no transcoder output within watchdog window",
                            ));
                        }
                        break PlayOutcome::Failed(classify(
                            &format!("transcoder exited with status {}: {}", status, stderr_tail),
                            None,
                        ));
                    }
                    Some(Err(e)) => break PlayOutcome::Failed(classify(&e.to_string(), None)),
                    None => {
                        if watchdog_killed(&self.timeout_flag) {
                            break PlayOutcome::Failed(StreamError::new(
                                ErrorKind::Network,
                                "stream timeout: transcoder killed by watchdog",
                            ));
                        }
                        break PlayOutcome::Completed;
                    }
                }
            }
        };

        self.manager.watchdog.unregister(channel.id);
        outcome
    }

    async fn resolve_media(
        &self,
        media: &MediaRef,
        force_refresh: bool,
    ) -> Result<ResolvedUrl, crate::resolver::ResolveError> {
        let threshold = chrono::Duration::minutes(self.manager.config.refresh_threshold_mins);

        if force_refresh {
            return self.manager.resolver.resolve(media, true).await;
        }

        let resolved = self.manager.resolver.resolve(media, false).await?;
        if resolved.is_expiring_soon(threshold) {
            tracing::info!(
                "Channel {}: URL expiring soon, refreshing before start",
                self.handle.channel.number
            );
            return self.manager.resolver.resolve(media, true).await;
        }
        Ok(resolved)
    }

    /// After a completed item: if the successor starts in the future, hold a
    /// buffering screen until its start.
    async fn bridge_to_next(&mut self, finished: &PlayoutItem) {
        let channel = self.handle.channel.clone();
        let next = match self.manager.queue.next_after(finished) {
            Ok(next) => next,
            Err(_) => None,
        };

        if let Some(next) = next {
            let gap = (next.scheduled_start - Utc::now()).num_seconds();
            if gap > GAP_BRIDGE_SECS {
                self.handle.set_state(SupervisorState::Buffering);
                self.play_screen(
                    ScreenMessage::buffering(Some(channel.name.clone())),
                    gap as f64,
                )
                .await;
            }
        }
    }

    /// Restart cap exceeded: hold a technical-difficulties slate for the
    /// cooldown before attempts resume.
    async fn pin_to_error_screen(&self, error: &StreamError) {
        let channel = &self.handle.channel;
        tracing::error!(
            "Channel {}: restart cap reached, pinning to error screen for {}s",
            channel.number,
            self.manager.config.restart_cooldown_secs
        );
        self.manager.log_event(
            "error",
            format!(
                "channel {}: restart cap reached ({}), cooling down",
                channel.number, error.kind
            ),
        );
        self.handle.set_state(SupervisorState::Error);

        let message = ScreenMessage {
            channel_name: Some(channel.name.clone()),
            channel_number: Some(channel.number),
            error_code: Some(error.kind.as_str().to_uppercase()),
            ..ScreenMessage::default()
        };
        self.play_screen(message, self.manager.config.restart_cooldown_secs as f64)
            .await;
    }

    async fn play_screen_for_backoff(&self, delay: Duration) {
        let message = ScreenMessage {
            channel_name: Some(self.handle.channel.name.clone()),
            channel_number: Some(self.handle.channel.number),
            ..ScreenMessage::default()
        };
        self.play_screen(message, delay.as_secs_f64().max(1.0)).await;
    }

    async fn play_offline_screen(&self) {
        let channel = &self.handle.channel;
        let message = ScreenMessage::off_air(Some(channel.name.clone()), Some(channel.number));
        self.play_screen(message, OFFLINE_SCREEN_SECS).await;
    }

    /// Stream a generated screen to subscribers for about `duration_secs`.
    ///
    /// Falls back to a plain sleep when the generator cannot start, so
    /// failure loops never spin hot.
    async fn play_screen(&self, message: ScreenMessage, duration_secs: f64) {
        let duration_secs = duration_secs.clamp(1.0, 3600.0);
        let config = &self.manager.config;

        let screen_config = ScreenConfig {
            visual_mode: match self.handle.channel.offline_image {
                Some(_) => VisualMode::CustomImage,
                None => VisualMode::Slate,
            },
            custom_image_path: self.handle.channel.offline_image.clone(),
            duration_secs: Some(duration_secs),
            ffmpeg_path: config.ffmpeg_path.clone(),
            ..ScreenConfig::default()
        };

        let argv = build_screen_command(&message, &screen_config);
        let spawned = spawn_transcoder(&argv, config.chunk_size);

        match spawned {
            Ok((mut stream, _handle)) => {
                let deadline =
                    tokio::time::Instant::now() + Duration::from_secs_f64(duration_secs + 5.0);
                loop {
                    tokio::select! {
                        _ = self.handle.shutdown.cancelled() => return,
                        _ = tokio::time::sleep_until(deadline) => return,
                        chunk = stream.recv() => match chunk {
                            Some(Ok(bytes)) => { self.handle.broadcaster.send(bytes); }
                            Some(Err(_)) | None => return,
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Screen generator unavailable ({}), idling instead", e);
                tokio::select! {
                    _ = self.handle.shutdown.cancelled() => {}
                    _ = tokio::time::sleep(Duration::from_secs_f64(duration_secs)) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_row(number: i32, filler: &str) -> crate::db::models::Channel {
        crate::db::models::Channel {
            id: Some(number),
            number,
            name: format!("Channel {}", number),
            always_on: 0,
            offline_image: None,
            filler_refs: filler.to_string(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_channel_info_parses_filler_refs() {
        let row = channel_row(4, r#"[{"id": 9, "url": "/media/filler.mp4"}]"#);
        let info = ChannelInfo::from_row(row).unwrap();
        assert_eq!(info.number, 4);
        assert_eq!(info.filler.len(), 1);
        assert_eq!(info.filler[0].id, 9);
    }

    #[test]
    fn test_channel_info_tolerates_malformed_filler() {
        let row = channel_row(4, "not json");
        let info = ChannelInfo::from_row(row).unwrap();
        assert!(info.filler.is_empty());
    }

    #[test]
    fn test_channel_info_requires_db_id() {
        let mut row = channel_row(4, "[]");
        row.id = None;
        assert!(ChannelInfo::from_row(row).is_none());
    }
}
