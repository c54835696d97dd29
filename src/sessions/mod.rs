//! Stream session tracking
//!
//! Authoritative registry of client connections across channels: enforces
//! the per-channel concurrent-session cap, counts bytes and errors, and
//! cleans up idle sessions. All state transitions take one internal lock;
//! callbacks run after the lock is released.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Errors kept per session, oldest dropped first
const ERROR_RING_CAPACITY: usize = 50;

/// A session is healthy while data flowed within this window
const HEALTHY_DATA_WINDOW_SECS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connecting,
    Active,
    Buffering,
    Paused,
    Error,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionErrorKind {
    ConnectionTimeout,
    StreamTimeout,
    TranscoderError,
    SourceError,
    ClientDisconnect,
    ResourceExhausted,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionError {
    pub kind: SessionErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
    pub recoverable: bool,
}

/// One client connection to a channel stream
#[derive(Debug, Clone)]
pub struct StreamSession {
    pub session_id: String,
    pub channel_id: i32,
    pub channel_number: i32,
    pub client_id: String,
    pub created_at: DateTime<Utc>,

    pub state: SessionState,
    pub last_activity_at: DateTime<Utc>,
    pub last_data_at: Option<DateTime<Utc>>,

    pub bytes_sent: u64,
    pub chunks_sent: u64,
    pub errors: VecDeque<SessionError>,
    pub restarts: u32,

    pub max_restarts: u32,
    pub idle_timeout: Duration,
}

impl StreamSession {
    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active | SessionState::Buffering)
    }

    /// Active with data flowing recently
    pub fn is_healthy(&self) -> bool {
        if !self.is_active() {
            return false;
        }
        match self.last_data_at {
            Some(at) => (Utc::now() - at).num_seconds() < HEALTHY_DATA_WINDOW_SECS,
            None => false,
        }
    }

    pub fn is_idle(&self) -> bool {
        let idle = Utc::now() - self.last_activity_at;
        idle.num_seconds() >= 0 && idle.to_std().unwrap_or_default() > self.idle_timeout
    }

    pub fn can_restart(&self) -> bool {
        self.restarts < self.max_restarts
    }

    pub fn duration_secs(&self) -> f64 {
        (Utc::now() - self.created_at).num_milliseconds() as f64 / 1000.0
    }

    fn record_data(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        self.chunks_sent += 1;
        let now = Utc::now();
        self.last_data_at = Some(now);
        self.last_activity_at = now;
        if self.state == SessionState::Buffering || self.state == SessionState::Connecting {
            self.state = SessionState::Active;
        }
    }

    fn record_error(&mut self, error: SessionError) {
        if self.errors.len() == ERROR_RING_CAPACITY {
            self.errors.pop_front();
        }
        if error.kind == SessionErrorKind::TranscoderError {
            self.state = SessionState::Error;
        }
        self.errors.push_back(error);
        self.last_activity_at = Utc::now();
    }
}

/// Channel is at its concurrent-session cap
#[derive(Debug, thiserror::Error)]
#[error("channel {channel_number} at capacity ({active}/{max})")]
pub struct CapacityError {
    pub channel_number: i32,
    pub active: usize,
    pub max: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelSessionStats {
    pub channel_id: i32,
    pub active_sessions: usize,
    pub total_sessions: usize,
    pub total_bytes_sent: u64,
    pub total_errors: usize,
    pub total_restarts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub healthy_sessions: usize,
    pub channels_with_sessions: usize,
    pub total_sessions_created: u64,
    pub total_sessions_cleaned: u64,
    pub max_sessions_per_channel: usize,
}

pub type SessionCallback = Arc<dyn Fn(&StreamSession) + Send + Sync>;
pub type ChannelEmptyCallback = Arc<dyn Fn(i32) + Send + Sync>;

#[derive(Default)]
struct Registry {
    sessions: HashMap<String, StreamSession>,
    channel_sessions: HashMap<i32, HashSet<String>>,
}

#[derive(Default)]
struct Callbacks {
    on_created: Vec<SessionCallback>,
    on_ended: Vec<SessionCallback>,
    on_channel_empty: Vec<ChannelEmptyCallback>,
}

pub struct SessionManager {
    registry: Mutex<Registry>,
    callbacks: Mutex<Callbacks>,

    max_sessions_per_channel: usize,
    idle_timeout: Duration,
    cleanup_interval: Duration,
    max_restarts: u32,

    created_total: AtomicU64,
    cleaned_total: AtomicU64,
    shutdown: CancellationToken,
}

impl SessionManager {
    pub fn new(
        max_sessions_per_channel: usize,
        idle_timeout: Duration,
        cleanup_interval: Duration,
        max_restarts: u32,
    ) -> Self {
        tracing::info!(
            "Session manager created: max_per_channel={}, idle_timeout={}s",
            max_sessions_per_channel,
            idle_timeout.as_secs()
        );
        Self {
            registry: Mutex::new(Registry::default()),
            callbacks: Mutex::new(Callbacks::default()),
            max_sessions_per_channel,
            idle_timeout,
            cleanup_interval,
            max_restarts,
            created_total: AtomicU64::new(0),
            cleaned_total: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn on_session_created(&self, callback: SessionCallback) {
        self.callbacks.lock().unwrap().on_created.push(callback);
    }

    pub fn on_session_ended(&self, callback: SessionCallback) {
        self.callbacks.lock().unwrap().on_ended.push(callback);
    }

    /// Fired once per channel when its last session departs
    pub fn on_channel_empty(&self, callback: ChannelEmptyCallback) {
        self.callbacks.lock().unwrap().on_channel_empty.push(callback);
    }

    /// Create a session, enforcing the per-channel cap.
    ///
    /// A rejected attempt mutates nothing.
    pub fn create_session(
        &self,
        channel_id: i32,
        channel_number: i32,
        client_id: Option<String>,
    ) -> Result<StreamSession, CapacityError> {
        let session = {
            let mut registry = self.registry.lock().unwrap();

            let active = registry
                .channel_sessions
                .get(&channel_id)
                .map(|ids| {
                    ids.iter()
                        .filter(|id| {
                            registry
                                .sessions
                                .get(*id)
                                .map(|s| s.is_active() || s.state == SessionState::Connecting)
                                .unwrap_or(false)
                        })
                        .count()
                })
                .unwrap_or(0);

            if active >= self.max_sessions_per_channel {
                return Err(CapacityError {
                    channel_number,
                    active,
                    max: self.max_sessions_per_channel,
                });
            }

            let now = Utc::now();
            let session = StreamSession {
                session_id: Uuid::new_v4().to_string(),
                channel_id,
                channel_number,
                client_id: client_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                created_at: now,
                state: SessionState::Connecting,
                last_activity_at: now,
                last_data_at: None,
                bytes_sent: 0,
                chunks_sent: 0,
                errors: VecDeque::new(),
                restarts: 0,
                max_restarts: self.max_restarts,
                idle_timeout: self.idle_timeout,
            };

            registry
                .sessions
                .insert(session.session_id.clone(), session.clone());
            registry
                .channel_sessions
                .entry(channel_id)
                .or_default()
                .insert(session.session_id.clone());

            self.created_total.fetch_add(1, Ordering::Relaxed);
            session
        };

        tracing::debug!(
            "Session created: {:.8} for channel {}",
            session.session_id,
            channel_number
        );

        let callbacks: Vec<SessionCallback> =
            self.callbacks.lock().unwrap().on_created.clone();
        for callback in callbacks {
            callback(&session);
        }

        Ok(session)
    }

    /// End a session; fires ended and (when applicable) channel-empty
    /// callbacks outside the lock.
    pub fn end_session(&self, session_id: &str, reason: &str) -> Option<StreamSession> {
        let (session, channel_emptied) = {
            let mut registry = self.registry.lock().unwrap();
            let mut session = registry.sessions.remove(session_id)?;
            session.state = SessionState::Disconnected;

            let mut emptied = None;
            if let Some(ids) = registry.channel_sessions.get_mut(&session.channel_id) {
                ids.remove(session_id);
                if ids.is_empty() {
                    registry.channel_sessions.remove(&session.channel_id);
                    emptied = Some(session.channel_id);
                }
            }
            (session, emptied)
        };

        tracing::info!(
            "Session {:.8} disconnected: {} (duration: {:.1}s, bytes: {}, errors: {})",
            session.session_id,
            reason,
            session.duration_secs(),
            session.bytes_sent,
            session.errors.len()
        );

        let (ended, empty): (Vec<SessionCallback>, Vec<ChannelEmptyCallback>) = {
            let callbacks = self.callbacks.lock().unwrap();
            (callbacks.on_ended.clone(), callbacks.on_channel_empty.clone())
        };
        for callback in ended {
            callback(&session);
        }
        if let Some(channel_id) = channel_emptied {
            for callback in empty {
                callback(channel_id);
            }
        }

        Some(session)
    }

    pub fn get_session(&self, session_id: &str) -> Option<StreamSession> {
        self.registry.lock().unwrap().sessions.get(session_id).cloned()
    }

    pub fn channel_sessions(&self, channel_id: i32) -> Vec<StreamSession> {
        let registry = self.registry.lock().unwrap();
        registry
            .channel_sessions
            .get(&channel_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| registry.sessions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Record bytes delivered to a session
    pub fn record_data(&self, session_id: &str, bytes: usize) -> bool {
        let mut registry = self.registry.lock().unwrap();
        match registry.sessions.get_mut(session_id) {
            Some(session) => {
                session.record_data(bytes);
                true
            }
            None => false,
        }
    }

    pub fn record_error(
        &self,
        session_id: &str,
        kind: SessionErrorKind,
        message: impl Into<String>,
        recoverable: bool,
    ) -> bool {
        let mut registry = self.registry.lock().unwrap();
        match registry.sessions.get_mut(session_id) {
            Some(session) => {
                session.record_error(SessionError {
                    kind,
                    message: message.into(),
                    at: Utc::now(),
                    recoverable,
                });
                true
            }
            None => false,
        }
    }

    /// Count a restart; false when the session exhausted its cap.
    pub fn record_restart(&self, session_id: &str) -> bool {
        let mut registry = self.registry.lock().unwrap();
        match registry.sessions.get_mut(session_id) {
            Some(session) => {
                session.restarts += 1;
                session.last_activity_at = Utc::now();
                if session.restarts > session.max_restarts {
                    tracing::warn!(
                        "Session {:.8} exceeded max restarts ({}/{})",
                        session_id,
                        session.restarts,
                        session.max_restarts
                    );
                    false
                } else {
                    true
                }
            }
            None => false,
        }
    }

    /// End sessions idle past the timeout. Returns how many were cleaned.
    pub fn cleanup_idle_sessions(&self) -> usize {
        let idle_ids: Vec<String> = {
            let registry = self.registry.lock().unwrap();
            registry
                .sessions
                .values()
                .filter(|s| s.is_idle() || s.state == SessionState::Disconnected)
                .map(|s| s.session_id.clone())
                .collect()
        };

        let mut cleaned = 0;
        for session_id in idle_ids {
            if self.end_session(&session_id, "idle").is_some() {
                cleaned += 1;
                self.cleaned_total.fetch_add(1, Ordering::Relaxed);
            }
        }

        if cleaned > 0 {
            tracing::info!("Cleaned up {} idle sessions", cleaned);
        }
        cleaned
    }

    /// Run the periodic cleanup ticker until `stop` is called.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.cleanup_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = manager.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.cleanup_idle_sessions();
                    }
                }
            }
        })
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn channel_stats(&self, channel_id: i32) -> ChannelSessionStats {
        let sessions = self.channel_sessions(channel_id);
        ChannelSessionStats {
            channel_id,
            active_sessions: sessions.iter().filter(|s| s.is_active()).count(),
            total_sessions: sessions.len(),
            total_bytes_sent: sessions.iter().map(|s| s.bytes_sent).sum(),
            total_errors: sessions.iter().map(|s| s.errors.len()).sum(),
            total_restarts: sessions.iter().map(|s| s.restarts).sum(),
        }
    }

    pub fn stats(&self) -> ManagerStats {
        let registry = self.registry.lock().unwrap();
        ManagerStats {
            total_sessions: registry.sessions.len(),
            active_sessions: registry.sessions.values().filter(|s| s.is_active()).count(),
            healthy_sessions: registry.sessions.values().filter(|s| s.is_healthy()).count(),
            channels_with_sessions: registry.channel_sessions.len(),
            total_sessions_created: self.created_total.load(Ordering::Relaxed),
            total_sessions_cleaned: self.cleaned_total.load(Ordering::Relaxed),
            max_sessions_per_channel: self.max_sessions_per_channel,
        }
    }
}
