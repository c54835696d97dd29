//! Rate-limited MPEG-TS delivery
//!
//! Paces bytes toward each client at approximately the real-time bitrate
//! over a one second rolling window, with burst and adaptive variants, and
//! emits null TS keepalive packets when the source stalls so client
//! decoders stay alive.

use std::str::FromStr;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use serde::Serialize;

/// MPEG-TS packet size is always 188 bytes
pub const MPEG_TS_PACKET_SIZE: usize = 188;

/// Null packets sent per keepalive burst (about 1.3 KB)
pub const KEEPALIVE_PACKET_COUNT: usize = 7;

/// Build one null TS packet: sync byte 0x47, null PID 0x1FFF
fn null_ts_packet() -> [u8; MPEG_TS_PACKET_SIZE] {
    let mut packet = [0xFFu8; MPEG_TS_PACKET_SIZE];
    packet[0] = 0x47;
    packet[1] = 0x1F;
    packet[2] = 0xFF;
    packet[3] = 0x10;
    packet
}

/// A keepalive burst of null TS packets
pub fn keepalive_burst() -> Bytes {
    let packet = null_ts_packet();
    let mut burst = BytesMut::with_capacity(MPEG_TS_PACKET_SIZE * KEEPALIVE_PACKET_COUNT);
    for _ in 0..KEEPALIVE_PACKET_COUNT {
        burst.extend_from_slice(&packet);
    }
    burst.freeze()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThrottleMode {
    /// Match real-time playback rate (default)
    Realtime,
    /// Allow bursts up to the configured burst duration
    Burst,
    /// Adjust rate from client-reported delay feedback
    Adaptive,
    /// Pass-through
    Disabled,
}

impl FromStr for ThrottleMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "realtime" => Ok(ThrottleMode::Realtime),
            "burst" => Ok(ThrottleMode::Burst),
            "adaptive" => Ok(ThrottleMode::Adaptive),
            "disabled" => Ok(ThrottleMode::Disabled),
            other => Err(format!("unknown throttle mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Target bitrate in bits per second
    pub target_bitrate_bps: u64,
    pub mode: ThrottleMode,
    pub max_buffer_bytes: usize,
    pub min_buffer_bytes: usize,
    pub burst_duration_ms: u64,
    pub keepalive_interval_ms: u64,
    /// Rolling window for rate accounting
    pub window_ms: u64,
    /// Upper bound for the adaptive multiplier
    pub adaptive_factor: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            target_bitrate_bps: 4_000_000,
            mode: ThrottleMode::Realtime,
            max_buffer_bytes: 2 * 1024 * 1024,
            min_buffer_bytes: 64 * 1024,
            burst_duration_ms: 100,
            keepalive_interval_ms: 5000,
            window_ms: 1000,
            adaptive_factor: 1.2,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ThrottleMetrics {
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub keepalives_sent: u64,
    pub throttle_delays: u64,
    pub total_delay_ms: f64,
    pub current_bitrate_bps: f64,
    pub buffer_level_bytes: usize,
}

/// Paces one subscriber's outgoing byte stream.
pub struct StreamThrottler {
    config: ThrottleConfig,
    channel_id: Option<i32>,
    metrics: ThrottleMetrics,

    started_at: Instant,
    window_start: Option<Instant>,
    bytes_sent_window: u64,
    buffer: BytesMut,
    last_send: Option<Instant>,
    last_keepalive: Option<Instant>,

    adaptive_multiplier: f64,
}

impl StreamThrottler {
    pub fn new(config: ThrottleConfig, channel_id: Option<i32>) -> Self {
        Self {
            config,
            channel_id,
            metrics: ThrottleMetrics::default(),
            started_at: Instant::now(),
            window_start: None,
            bytes_sent_window: 0,
            buffer: BytesMut::new(),
            last_send: None,
            last_keepalive: None,
            adaptive_multiplier: 1.0,
        }
    }

    pub fn metrics(&self) -> &ThrottleMetrics {
        &self.metrics
    }

    pub fn target_bytes_per_second(&self) -> f64 {
        self.config.target_bitrate_bps as f64 / 8.0
    }

    fn effective_multiplier(&self) -> f64 {
        if self.config.mode == ThrottleMode::Adaptive {
            self.adaptive_multiplier
        } else {
            1.0
        }
    }

    fn record_send(&mut self, byte_count: usize) {
        self.bytes_sent_window += byte_count as u64;
        self.metrics.bytes_sent += byte_count as u64;
        self.metrics.packets_sent += (byte_count / MPEG_TS_PACKET_SIZE) as u64;
        self.last_send = Some(Instant::now());

        if let Some(window_start) = self.window_start {
            let elapsed = window_start.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                self.metrics.current_bitrate_bps = (self.bytes_sent_window * 8) as f64 / elapsed;
            }
        }
    }

    /// How many bytes the window allows right now
    fn allowed_bytes(&mut self, now: Instant) -> usize {
        if self.config.mode == ThrottleMode::Burst {
            let burst = self.target_bytes_per_second() * (self.config.burst_duration_ms as f64 / 1000.0);
            return (burst as usize).min(self.buffer.len());
        }

        let window_start = *self.window_start.get_or_insert(now);
        let elapsed = now.duration_since(window_start).as_secs_f64();
        let window_secs = self.config.window_ms as f64 / 1000.0;
        let rate = self.target_bytes_per_second() * self.effective_multiplier();

        if elapsed > window_secs {
            // Roll the window
            self.window_start = Some(now);
            self.bytes_sent_window = 0;
            return ((window_secs * rate) as usize).min(self.buffer.len());
        }

        let target_bytes = (elapsed * rate) as i64;
        let available = target_bytes - self.bytes_sent_window as i64;
        available.max(0).min(self.buffer.len() as i64) as usize
    }

    /// Delay needed before more bytes fit the window
    fn pacing_delay(&self, now: Instant) -> std::time::Duration {
        let rate = self.target_bytes_per_second() * self.effective_multiplier();
        let bytes_per_ms = rate / 1000.0;
        if bytes_per_ms <= 0.0 {
            return std::time::Duration::from_millis(100);
        }

        let elapsed_ms = self
            .window_start
            .map(|w| now.duration_since(w).as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        let expected = elapsed_ms * bytes_per_ms;
        let ahead = self.bytes_sent_window as f64 - expected;

        if ahead > 0.0 {
            let delay_ms = (ahead / bytes_per_ms).min(100.0);
            std::time::Duration::from_secs_f64(delay_ms / 1000.0)
        } else {
            std::time::Duration::ZERO
        }
    }

    /// Pace a chunk toward the client.
    ///
    /// Sleeps internally when ahead of the target rate; returns the chunks
    /// (possibly preceded by a keepalive burst) in delivery order. When the
    /// internal buffer overflows, the oldest bytes are dropped first so the
    /// client glitches back to live instead of falling permanently behind.
    pub async fn throttle(&mut self, data: Bytes) -> Vec<Bytes> {
        let mut out = Vec::new();

        // A long stall means client buffers are starving; pad with null
        // packets before the next real data
        if let Some(keepalive) = self.keepalive_if_due() {
            out.push(keepalive);
        }

        if self.config.mode == ThrottleMode::Disabled {
            self.record_send(data.len());
            out.push(data);
            return out;
        }

        self.buffer.extend_from_slice(&data);

        if self.buffer.len() > self.config.max_buffer_bytes {
            let overflow = self.buffer.len() - self.config.max_buffer_bytes;
            tracing::warn!(
                "Channel {:?}: buffer overflow, dropping {} oldest bytes",
                self.channel_id,
                overflow
            );
            let _ = self.buffer.split_to(overflow);
        }
        self.metrics.buffer_level_bytes = self.buffer.len();

        while self.buffer.len() >= self.config.min_buffer_bytes {
            let now = Instant::now();
            let allowed = self.allowed_bytes(now);

            if allowed == 0 {
                let delay = self.pacing_delay(now);
                if !delay.is_zero() {
                    self.metrics.throttle_delays += 1;
                    self.metrics.total_delay_ms += delay.as_secs_f64() * 1000.0;
                    tokio::time::sleep(delay).await;
                } else {
                    // The window has room only once more wall-clock passes
                    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                }
                continue;
            }

            let chunk = self.buffer.split_to(allowed.min(self.buffer.len())).freeze();
            self.record_send(chunk.len());
            out.push(chunk);
        }

        // Remainders below the flush floor go out immediately rather than
        // sitting across calls
        if !self.buffer.is_empty() {
            let rest = self.buffer.split().freeze();
            self.record_send(rest.len());
            out.push(rest);
        }
        self.metrics.buffer_level_bytes = 0;

        out
    }

    /// A keepalive burst, if no real data has gone out for the interval.
    ///
    /// Before any real data, the stall clock runs from construction: a
    /// client whose source never starts still needs its buffers fed.
    pub fn keepalive_if_due(&mut self) -> Option<Bytes> {
        let interval = std::time::Duration::from_millis(self.config.keepalive_interval_ms);
        let since_send = self.last_send.unwrap_or(self.started_at).elapsed();
        if since_send < interval {
            return None;
        }
        // Rate-limit the bursts themselves to the same interval
        if let Some(last) = self.last_keepalive {
            if last.elapsed() < interval {
                return None;
            }
        }

        self.last_keepalive = Some(Instant::now());
        self.metrics.keepalives_sent += 1;
        tracing::debug!("Channel {:?}: sending keepalive packets", self.channel_id);
        Some(keepalive_burst())
    }

    /// Feed a client-reported delay sample into the adaptive controller.
    ///
    /// Delays over 100 ms shrink the multiplier by 5%, under 20 ms grow it
    /// by 2%; the multiplier stays within [0.5, adaptive_factor].
    pub fn provide_feedback(&mut self, delay_ms: f64) {
        if self.config.mode != ThrottleMode::Adaptive {
            return;
        }

        if delay_ms > 100.0 {
            self.adaptive_multiplier = (self.adaptive_multiplier * 0.95).max(0.5);
        } else if delay_ms < 20.0 {
            self.adaptive_multiplier = (self.adaptive_multiplier * 1.02).min(self.config.adaptive_factor);
        }
    }

    pub fn adaptive_multiplier(&self) -> f64 {
        self.adaptive_multiplier
    }
}
