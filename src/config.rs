//! Runtime configuration
//!
//! One plain struct, loaded once at startup from `AIRWAVE_*` environment
//! variables (a `.env` file is honored via dotenvy). The core treats the
//! loaded configuration as immutable; there is no hot reload.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::throttle::ThrottleMode;

/// A configured media server (Plex or Jellyfin/Emby) the resolvers can use
#[derive(Debug, Clone, Deserialize)]
pub struct MediaServer {
    pub name: String,
    pub url: String,
    /// X-Plex-Token for Plex, api_key for Jellyfin/Emby
    pub token: String,
    /// Emby wants `X-Emby-Token`, Jellyfin wants an Authorization header
    #[serde(default)]
    pub is_emby: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub port: u16,
    pub bind_host: String,
    pub friendly_name: String,

    // Paths
    pub data_dir: Option<PathBuf>,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub ytdlp_path: String,
    pub allowed_media_paths: Vec<PathBuf>,
    pub youtube_cookies_file: Option<PathBuf>,

    // Transcode
    pub hardware_acceleration: String,
    pub ffmpeg_log_level: String,
    pub ffmpeg_threads: u32,
    pub ffmpeg_extra_flags: String,
    pub preferred_quality: u32,

    // Streaming / throttle
    pub target_bitrate_bps: u64,
    pub throttle_mode: ThrottleMode,
    pub max_buffer_bytes: usize,
    pub min_flush_bytes: usize,
    pub keepalive_interval_ms: u64,
    pub chunk_size: usize,

    // Sessions
    pub max_sessions_per_channel: usize,
    pub idle_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
    pub max_restarts_per_session: u32,

    // Watchdog
    pub watchdog_timeout_secs: u64,
    pub watchdog_check_interval_secs: u64,

    // Resolver
    pub refresh_threshold_mins: i64,
    pub resolve_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub plex_servers: Vec<MediaServer>,
    pub jellyfin_servers: Vec<MediaServer>,

    // Supervisor
    pub restart_cap: u32,
    pub restart_cooldown_secs: u64,
    pub idle_grace_secs: u64,

    // Guide
    pub guide_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5004,
            bind_host: "0.0.0.0".to_string(),
            friendly_name: "Airwave".to_string(),
            data_dir: None,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            ytdlp_path: "yt-dlp".to_string(),
            allowed_media_paths: Vec::new(),
            youtube_cookies_file: None,
            hardware_acceleration: "auto".to_string(),
            ffmpeg_log_level: "warning".to_string(),
            ffmpeg_threads: 0,
            ffmpeg_extra_flags: String::new(),
            preferred_quality: 720,
            target_bitrate_bps: 4_000_000,
            throttle_mode: ThrottleMode::Realtime,
            max_buffer_bytes: 2 * 1024 * 1024,
            min_flush_bytes: 64 * 1024,
            keepalive_interval_ms: 5000,
            chunk_size: 64 * 1024,
            max_sessions_per_channel: 50,
            idle_timeout_secs: 300,
            cleanup_interval_secs: 60,
            max_restarts_per_session: 10,
            watchdog_timeout_secs: 30,
            watchdog_check_interval_secs: 5,
            refresh_threshold_mins: 60,
            resolve_timeout_secs: 60,
            probe_timeout_secs: 30,
            plex_servers: Vec::new(),
            jellyfin_servers: Vec::new(),
            restart_cap: 10,
            restart_cooldown_secs: 120,
            idle_grace_secs: 60,
            guide_days: 7,
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env_var(key).and_then(|v| v.parse().ok()) {
        Some(v) => v,
        None => default,
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults.
    ///
    /// Server registries (`AIRWAVE_PLEX_SERVERS`, `AIRWAVE_JELLYFIN_SERVERS`)
    /// are JSON arrays of `{name, url, token, is_emby?}` objects.
    pub fn from_env() -> Self {
        // A missing .env file is fine; explicit env vars still apply.
        let _ = dotenvy::dotenv();

        let d = Config::default();

        let parse_servers = |key: &str| -> Vec<MediaServer> {
            match env_var(key) {
                Some(raw) => match serde_json::from_str(&raw) {
                    Ok(servers) => servers,
                    Err(e) => {
                        tracing::warn!("Ignoring malformed {}: {}", key, e);
                        Vec::new()
                    }
                },
                None => Vec::new(),
            }
        };

        Self {
            port: parse_var("AIRWAVE_PORT", d.port),
            bind_host: env_var("AIRWAVE_BIND_HOST").unwrap_or(d.bind_host),
            friendly_name: env_var("AIRWAVE_FRIENDLY_NAME").unwrap_or(d.friendly_name),
            data_dir: env_var("AIRWAVE_DATA_DIR").map(PathBuf::from),
            ffmpeg_path: env_var("AIRWAVE_FFMPEG_PATH").unwrap_or(d.ffmpeg_path),
            ffprobe_path: env_var("AIRWAVE_FFPROBE_PATH").unwrap_or(d.ffprobe_path),
            ytdlp_path: env_var("AIRWAVE_YTDLP_PATH").unwrap_or(d.ytdlp_path),
            allowed_media_paths: env_var("AIRWAVE_ALLOWED_MEDIA_PATHS")
                .map(|v| v.split(':').map(PathBuf::from).collect())
                .unwrap_or_default(),
            youtube_cookies_file: env_var("AIRWAVE_YOUTUBE_COOKIES").map(PathBuf::from),
            hardware_acceleration: env_var("AIRWAVE_HWACCEL").unwrap_or(d.hardware_acceleration),
            ffmpeg_log_level: env_var("AIRWAVE_FFMPEG_LOG_LEVEL").unwrap_or(d.ffmpeg_log_level),
            ffmpeg_threads: parse_var("AIRWAVE_FFMPEG_THREADS", d.ffmpeg_threads),
            ffmpeg_extra_flags: env_var("AIRWAVE_FFMPEG_EXTRA_FLAGS").unwrap_or_default(),
            preferred_quality: parse_var("AIRWAVE_PREFERRED_QUALITY", d.preferred_quality),
            target_bitrate_bps: parse_var("AIRWAVE_TARGET_BITRATE", d.target_bitrate_bps),
            throttle_mode: env_var("AIRWAVE_THROTTLE_MODE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(d.throttle_mode),
            max_buffer_bytes: parse_var("AIRWAVE_MAX_BUFFER_BYTES", d.max_buffer_bytes),
            min_flush_bytes: parse_var("AIRWAVE_MIN_FLUSH_BYTES", d.min_flush_bytes),
            keepalive_interval_ms: parse_var("AIRWAVE_KEEPALIVE_MS", d.keepalive_interval_ms),
            chunk_size: parse_var("AIRWAVE_CHUNK_SIZE", d.chunk_size),
            max_sessions_per_channel: parse_var(
                "AIRWAVE_MAX_SESSIONS_PER_CHANNEL",
                d.max_sessions_per_channel,
            ),
            idle_timeout_secs: parse_var("AIRWAVE_IDLE_TIMEOUT_SECS", d.idle_timeout_secs),
            cleanup_interval_secs: parse_var(
                "AIRWAVE_CLEANUP_INTERVAL_SECS",
                d.cleanup_interval_secs,
            ),
            max_restarts_per_session: parse_var(
                "AIRWAVE_MAX_RESTARTS_PER_SESSION",
                d.max_restarts_per_session,
            ),
            watchdog_timeout_secs: parse_var("AIRWAVE_WATCHDOG_TIMEOUT_SECS", d.watchdog_timeout_secs),
            watchdog_check_interval_secs: parse_var(
                "AIRWAVE_WATCHDOG_INTERVAL_SECS",
                d.watchdog_check_interval_secs,
            ),
            refresh_threshold_mins: parse_var(
                "AIRWAVE_REFRESH_THRESHOLD_MINS",
                d.refresh_threshold_mins,
            ),
            resolve_timeout_secs: parse_var("AIRWAVE_RESOLVE_TIMEOUT_SECS", d.resolve_timeout_secs),
            probe_timeout_secs: parse_var("AIRWAVE_PROBE_TIMEOUT_SECS", d.probe_timeout_secs),
            plex_servers: parse_servers("AIRWAVE_PLEX_SERVERS"),
            jellyfin_servers: parse_servers("AIRWAVE_JELLYFIN_SERVERS"),
            restart_cap: parse_var("AIRWAVE_RESTART_CAP", d.restart_cap),
            restart_cooldown_secs: parse_var(
                "AIRWAVE_RESTART_COOLDOWN_SECS",
                d.restart_cooldown_secs,
            ),
            idle_grace_secs: parse_var("AIRWAVE_IDLE_GRACE_SECS", d.idle_grace_secs),
            guide_days: parse_var("AIRWAVE_GUIDE_DAYS", d.guide_days),
        }
    }

    /// Explicit validation of cross-field constraints.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be non-zero".to_string());
        }
        if self.max_buffer_bytes < self.chunk_size {
            return Err(format!(
                "max_buffer_bytes ({}) must be at least chunk_size ({})",
                self.max_buffer_bytes, self.chunk_size
            ));
        }
        if self.target_bitrate_bps == 0 {
            return Err("target_bitrate_bps must be non-zero".to_string());
        }
        if self.guide_days < 1 {
            return Err("guide_days must be at least 1".to_string());
        }
        match self.hardware_acceleration.as_str() {
            "auto" | "none" | "videotoolbox" | "cuda" | "qsv" | "vaapi" => {}
            other => return Err(format!("unknown hardware_acceleration '{}'", other)),
        }
        for server in self.plex_servers.iter().chain(self.jellyfin_servers.iter()) {
            url::Url::parse(&server.url)
                .map_err(|e| format!("invalid URL for media server '{}': {}", server.name, e))?;
        }
        Ok(())
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_secs(self.watchdog_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    /// Broadcast capacity in whole chunks
    pub fn broadcast_capacity(&self) -> usize {
        (self.max_buffer_bytes / self.chunk_size).max(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port, 5004);
        assert_eq!(config.max_sessions_per_channel, 50);
        assert_eq!(config.target_bitrate_bps, 4_000_000);
        assert_eq!(config.watchdog_timeout_secs, 30);
        assert_eq!(config.idle_timeout_secs, 300);
    }

    #[test]
    fn test_broadcast_capacity_in_chunks() {
        let config = Config::default();
        // 2 MiB buffer over 64 KiB chunks
        assert_eq!(config.broadcast_capacity(), 32);
    }

    #[test]
    fn test_validate_rejects_tiny_buffer() {
        let config = Config {
            max_buffer_bytes: 1024,
            chunk_size: 65536,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_hwaccel() {
        let config = Config {
            hardware_acceleration: "gpu9000".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_malformed_server_url() {
        let config = Config {
            plex_servers: vec![MediaServer {
                name: "bad".to_string(),
                url: "not a url".to_string(),
                token: "t".to_string(),
                is_emby: false,
            }],
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_media_server_json_shape() {
        let servers: Vec<MediaServer> = serde_json::from_str(
            r#"[{"name":"den","url":"http://plex.local:32400","token":"abc"},
                {"name":"emby","url":"http://emby.local:8096","token":"k","is_emby":true}]"#,
        )
        .unwrap();
        assert_eq!(servers.len(), 2);
        assert!(!servers[0].is_emby);
        assert!(servers[1].is_emby);
    }
}
