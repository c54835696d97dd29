//! Transcoder process watchdog
//!
//! Detects transcoder processes that have stopped producing output and kills
//! them so the channel supervisor can recover. The supervisor calls
//! `report_output` on every chunk; a periodic check terminates anything
//! silent for longer than the timeout and fires its restart callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::transcoder::ProcessHandle;

/// Callback invoked with the channel id after a timed-out process is killed
pub type TimeoutCallback = Arc<dyn Fn(i32) + Send + Sync>;

struct WatchedProcess {
    handle: ProcessHandle,
    registered_at: Instant,
    last_output_at: Instant,
    bytes_output: u64,
    on_timeout: TimeoutCallback,
}

/// Per-check statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckStats {
    pub checked: usize,
    pub healthy: usize,
    pub killed: usize,
    pub already_dead: usize,
}

/// Snapshot of watchdog state for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct WatchdogStats {
    pub active_processes: usize,
    pub timeout_seconds: u64,
    pub total_kills: u64,
    pub total_timeouts: u64,
}

pub struct Watchdog {
    processes: DashMap<i32, WatchedProcess>,
    timeout: Duration,
    check_interval: Duration,
    kills: AtomicU64,
    timeouts: AtomicU64,
    shutdown: CancellationToken,
}

impl Watchdog {
    pub fn new(timeout: Duration, check_interval: Duration) -> Self {
        Self {
            processes: DashMap::new(),
            timeout,
            check_interval,
            kills: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register a process for monitoring.
    ///
    /// A channel that still has a live registered process gets the old one
    /// killed first; leaked processes from reentry bugs must not pile up.
    pub async fn register(&self, channel_id: i32, handle: ProcessHandle, on_timeout: TimeoutCallback) {
        if let Some((_, old)) = self.processes.remove(&channel_id) {
            if old.handle.is_running() {
                tracing::warn!("Replacing still-running process for channel {}", channel_id);
                old.handle.terminate().await;
            }
        }

        self.processes.insert(
            channel_id,
            WatchedProcess {
                handle,
                registered_at: Instant::now(),
                last_output_at: Instant::now(),
                bytes_output: 0,
                on_timeout,
            },
        );

        tracing::debug!("Registered transcoder process for channel {}", channel_id);
    }

    /// Record that output arrived for a channel; resets the timeout clock.
    pub fn report_output(&self, channel_id: i32, bytes: usize) {
        if let Some(mut watched) = self.processes.get_mut(&channel_id) {
            watched.last_output_at = Instant::now();
            watched.bytes_output += bytes as u64;
        }
    }

    pub fn unregister(&self, channel_id: i32) {
        if self.processes.remove(&channel_id).is_some() {
            tracing::debug!("Unregistered transcoder process for channel {}", channel_id);
        }
    }

    /// Check all registered processes, killing unresponsive ones.
    pub async fn check_all(&self) -> CheckStats {
        let mut stats = CheckStats::default();
        let mut timed_out: Vec<(i32, ProcessHandle, TimeoutCallback, f64)> = Vec::new();
        let mut dead: Vec<i32> = Vec::new();

        for entry in self.processes.iter() {
            stats.checked += 1;

            if !entry.handle.is_running() {
                stats.already_dead += 1;
                dead.push(*entry.key());
                continue;
            }

            // A process that never produced output times out against its
            // registration instant
            let silent_for = entry
                .last_output_at
                .max(entry.registered_at)
                .elapsed();
            if silent_for > self.timeout {
                timed_out.push((
                    *entry.key(),
                    entry.handle.clone(),
                    entry.on_timeout.clone(),
                    silent_for.as_secs_f64(),
                ));
            } else {
                stats.healthy += 1;
            }
        }

        // Already-exited processes are reaped silently
        for channel_id in dead {
            self.processes.remove(&channel_id);
        }

        for (channel_id, handle, on_timeout, silent_secs) in timed_out {
            tracing::warn!(
                "Transcoder for channel {} timed out ({:.1}s since last output)",
                channel_id,
                silent_secs
            );

            handle.terminate().await;
            self.processes.remove(&channel_id);
            stats.killed += 1;
            self.kills.fetch_add(1, Ordering::Relaxed);
            self.timeouts.fetch_add(1, Ordering::Relaxed);

            // Callback runs after the map entry is gone, outside any lock
            on_timeout(channel_id);
        }

        stats
    }

    /// Run the periodic check loop until `stop` is called.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let watchdog = self.clone();
        tracing::info!(
            "Transcoder watchdog started (timeout={}s, interval={}s)",
            watchdog.timeout.as_secs(),
            watchdog.check_interval.as_secs()
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(watchdog.check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = watchdog.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        watchdog.check_all().await;
                    }
                }
            }
            tracing::info!("Transcoder watchdog stopped");
        })
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn stats(&self) -> WatchdogStats {
        WatchdogStats {
            active_processes: self.processes.len(),
            timeout_seconds: self.timeout.as_secs(),
            total_kills: self.kills.load(Ordering::Relaxed),
            total_timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Seconds since the given channel last produced output
    pub fn seconds_since_output(&self, channel_id: i32) -> Option<f64> {
        self.processes
            .get(&channel_id)
            .map(|w| w.last_output_at.elapsed().as_secs_f64())
    }

    #[cfg(test)]
    fn backdate_last_output(&self, channel_id: i32, by: Duration) {
        if let Some(mut watched) = self.processes.get_mut(&channel_id) {
            watched.last_output_at = Instant::now() - by;
            watched.registered_at = Instant::now() - by;
        }
    }
}
