//! Shared resolver data types
//!
//! `MediaRef` is the abstract library-side reference; `ResolvedUrl` is the
//! concrete streamable output with expiration tracking; `CachedUrl` wraps a
//! resolved entry with cache bookkeeping.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::transcoder::CodecInfo;

/// Media source kinds handled by the resolver registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Local,
    Plex,
    Jellyfin,
    Emby,
    #[serde(rename = "youtube")]
    YouTube,
    ArchiveOrg,
    Unknown,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Local => "local",
            SourceKind::Plex => "plex",
            SourceKind::Jellyfin => "jellyfin",
            SourceKind::Emby => "emby",
            SourceKind::YouTube => "youtube",
            SourceKind::ArchiveOrg => "archive_org",
            SourceKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Abstract reference to an item in an external library.
///
/// Created by the library layer; the core never mutates it. Source-specific
/// locators (Archive.org identifier/filename, Plex rating key, Jellyfin item
/// id, server name) live in the `extra` bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRef {
    pub id: i64,
    #[serde(default)]
    pub source_kind: Option<SourceKind>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub extra: serde_json::Value,
}

impl MediaRef {
    pub fn from_url(id: i64, url: impl Into<String>) -> Self {
        Self {
            id,
            source_kind: None,
            url: Some(url.into()),
            title: None,
            duration_secs: None,
            extra: serde_json::Value::Null,
        }
    }

    /// Read a string field from the locator bag
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
    }
}

/// A resolved, streamable URL with expiration tracking
#[derive(Debug, Clone)]
pub struct ResolvedUrl {
    pub url: String,
    pub source_kind: SourceKind,
    /// None means the URL never expires
    pub expires_at: Option<DateTime<Utc>>,
    pub media_id: i64,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    pub codec_info: Option<CodecInfo>,
    pub metadata: serde_json::Value,
}

impl ResolvedUrl {
    pub fn new(url: impl Into<String>, source_kind: SourceKind, media_id: i64) -> Self {
        Self {
            url: url.into(),
            source_kind,
            expires_at: None,
            media_id,
            headers: Vec::new(),
            cookies: Vec::new(),
            codec_info: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => Utc::now() >= at,
            None => false,
        }
    }

    pub fn expires_in(&self) -> Option<Duration> {
        self.expires_at.map(|at| at - Utc::now())
    }

    /// Whether the URL expires within the given threshold
    pub fn is_expiring_soon(&self, threshold: Duration) -> bool {
        match self.expires_at {
            Some(at) => at <= Utc::now() + threshold,
            None => false,
        }
    }
}

/// Cached URL entry with resolution bookkeeping
#[derive(Debug, Clone)]
pub struct CachedUrl {
    pub cache_key: String,
    pub resolved: ResolvedUrl,
    pub resolved_at: DateTime<Utc>,
    pub refresh_count: u32,
    pub last_error: Option<String>,
}

impl CachedUrl {
    pub fn new(cache_key: impl Into<String>, resolved: ResolvedUrl) -> Self {
        Self {
            cache_key: cache_key.into(),
            resolved,
            resolved_at: Utc::now(),
            refresh_count: 0,
            last_error: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.resolved.is_expired()
    }

    pub fn needs_refresh(&self, threshold: Duration) -> bool {
        self.resolved.is_expiring_soon(threshold)
    }
}

/// Error during URL resolution; retryability is carried, never inferred
#[derive(Debug, thiserror::Error)]
#[error("{source_kind} resolution failed: {message}")]
pub struct ResolveError {
    pub message: String,
    pub source_kind: SourceKind,
    pub retryable: bool,
}

impl ResolveError {
    pub fn permanent(source_kind: SourceKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source_kind,
            retryable: false,
        }
    }

    pub fn transient(source_kind: SourceKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source_kind,
            retryable: true,
        }
    }
}

/// Per-resolver cache statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expiring_soon: usize,
    pub expired_entries: usize,
}
