//! Stream error taxonomy and classification
//!
//! All streaming-path failures are reduced to a tagged `ErrorKind` with a
//! severity and a retryable flag. Resolvers and the transcoder classify and
//! raise; the channel supervisor is the single retry authority.

use std::fmt;

/// Classified error kinds for the streaming path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection failures, DNS errors, read timeouts
    Network,
    /// HTTP 401 Unauthorized
    Http401,
    /// HTTP 403 Forbidden (not recognized as an expired URL)
    Http403,
    /// HTTP 429 Too Many Requests
    Http429,
    /// HTTP 464 - Archive.org quota exceeded
    Http464,
    /// HTTP 500 Internal Server Error
    Http500,
    /// Other 4xx/5xx responses
    HttpOther,
    /// Cookie/token failures
    Auth,
    /// Signed URL expired (enhanced 403 detection)
    Expiration,
    /// Rate limiting / quota exhaustion
    RateLimit,
    /// Private video, geoblocked, access denied
    Permission,
    /// No acceptable format available
    Format,
    /// Encoder/decoder refused the stream
    Codec,
    /// Container/segment/playlist errors
    Stream,
    /// CDN/edge-specific issues
    Cdn,
    /// Unclassified
    Unknown,
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network_error",
            ErrorKind::Http401 => "http_401",
            ErrorKind::Http403 => "http_403",
            ErrorKind::Http429 => "http_429",
            ErrorKind::Http464 => "http_464",
            ErrorKind::Http500 => "http_500",
            ErrorKind::HttpOther => "http_other",
            ErrorKind::Auth => "authentication_error",
            ErrorKind::Expiration => "expiration_error",
            ErrorKind::RateLimit => "rate_limit_error",
            ErrorKind::Permission => "permission_error",
            ErrorKind::Format => "format_error",
            ErrorKind::Codec => "codec_error",
            ErrorKind::Stream => "stream_error",
            ErrorKind::Cdn => "cdn_error",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Default severity for this kind
    pub fn severity(&self) -> Severity {
        match self {
            ErrorKind::Network | ErrorKind::Http500 | ErrorKind::Cdn => Severity::Low,
            ErrorKind::Http401
            | ErrorKind::Http403
            | ErrorKind::HttpOther
            | ErrorKind::Auth
            | ErrorKind::Expiration
            | ErrorKind::Format
            | ErrorKind::Stream
            | ErrorKind::Unknown => Severity::Medium,
            ErrorKind::Http429
            | ErrorKind::Http464
            | ErrorKind::RateLimit
            | ErrorKind::Permission
            | ErrorKind::Codec => Severity::High,
        }
    }

    /// Whether the supervisor may retry this item at all
    pub fn retryable(&self) -> bool {
        !matches!(
            self,
            ErrorKind::Permission | ErrorKind::Format | ErrorKind::Codec
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified streaming error with its originating context
#[derive(Debug, Clone)]
pub struct StreamError {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
}

impl StreamError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            message: message.into(),
        }
    }

    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for StreamError {}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Classify an error message (and optional HTTP status) into a `StreamError`.
///
/// Matching order mirrors how the failure modes overlap: format problems are
/// checked before HTTP codes because extractor messages often embed both, and
/// 403s are promoted to `Expiration` when the text mentions expiry.
pub fn classify(message: &str, http_status: Option<u16>) -> StreamError {
    let text = message.to_lowercase();

    // HTTP status, when known, is authoritative for its own family.
    if let Some(status) = http_status {
        let kind = match status {
            401 => Some(ErrorKind::Http401),
            403 => {
                if contains_any(&text, &["expire", "expired", "expiration"]) {
                    Some(ErrorKind::Expiration)
                } else {
                    Some(ErrorKind::Http403)
                }
            }
            429 => Some(ErrorKind::Http429),
            464 => Some(ErrorKind::Http464),
            500 => Some(ErrorKind::Http500),
            s if (400..600).contains(&s) => Some(ErrorKind::HttpOther),
            _ => None,
        };
        if let Some(kind) = kind {
            return StreamError::new(kind, message);
        }
    }

    let kind = if contains_any(
        &text,
        &[
            "requested format is not available",
            "format is not available",
            "no suitable format",
            "format selection failed",
            "format not found",
        ],
    ) {
        ErrorKind::Format
    } else if contains_any(
        &text,
        &[
            "private video",
            "video is private",
            "geoblocked",
            "not available in your country",
            "region restricted",
            "access denied",
            "permission denied",
            "this video is not available",
        ],
    ) {
        ErrorKind::Permission
    } else if contains_any(&text, &["url expired", "url may have expired", "signature expired"])
        || (text.contains("403") && contains_any(&text, &["expire", "expired", "expiration"]))
    {
        ErrorKind::Expiration
    } else if contains_any(
        &text,
        &["rate limit", "too many requests", "429", "quota exceeded", "quota limit"],
    ) {
        ErrorKind::RateLimit
    } else if text.contains("401") || text.contains("unauthorized") {
        ErrorKind::Http401
    } else if text.contains("403") || text.contains("forbidden") {
        ErrorKind::Http403
    } else if text.contains("464") {
        ErrorKind::Http464
    } else if text.contains("500") || text.contains("internal server error") {
        ErrorKind::Http500
    } else if contains_any(&text, &["502", "503", "504", "404", "400"]) {
        ErrorKind::HttpOther
    } else if contains_any(
        &text,
        &[
            "timeout",
            "timed out",
            "connection",
            "network",
            "dns",
            "failed to resolve hostname",
            "cannot resolve hostname",
        ],
    ) {
        ErrorKind::Network
    } else if contains_any(&text, &["cookie", "token", "auth", "login", "credential"]) {
        ErrorKind::Auth
    } else if contains_any(&text, &["codec", "encoder", "decoder"]) {
        ErrorKind::Codec
    } else if contains_any(&text, &["m3u8", "playlist", "segment", "stream"]) {
        ErrorKind::Stream
    } else if contains_any(&text, &["cdn", "edge", "mirror"]) {
        ErrorKind::Cdn
    } else {
        ErrorKind::Unknown
    };

    StreamError::new(kind, message)
}
