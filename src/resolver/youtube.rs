//! YouTube resolver
//!
//! Shells out to a yt-dlp-compatible extractor to turn video ids into direct
//! CDN URLs. Format selection prefers H.264 + AAC at or below the configured
//! height so the transcoder can stream-copy; CDN URLs are treated as
//! expiring after six hours.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use regex::Regex;
use tokio::process::Command;

use crate::resolver::types::{CachedUrl, MediaRef, ResolveError, ResolvedUrl, SourceKind};
use crate::resolver::SourceResolver;
use crate::transcoder::CodecInfo;

/// YouTube CDN URLs typically expire after ~6 hours; stay conservative
const DEFAULT_EXPIRATION_HOURS: i64 = 6;

const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub struct YouTubeResolver {
    ytdlp_path: String,
    cookies_file: Option<PathBuf>,
    preferred_height: u32,
    id_patterns: Vec<Regex>,
    bare_id: Regex,
    cache: DashMap<String, CachedUrl>,
}

impl YouTubeResolver {
    pub fn new(ytdlp_path: String, cookies_file: Option<PathBuf>, preferred_height: u32) -> Self {
        let id_patterns = [
            r"(?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/embed/)([a-zA-Z0-9_-]{11})",
            r"youtube\.com/v/([a-zA-Z0-9_-]{11})",
            r"youtube\.com/shorts/([a-zA-Z0-9_-]{11})",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static pattern"))
        .collect();

        Self {
            ytdlp_path,
            cookies_file,
            preferred_height,
            id_patterns,
            bare_id: Regex::new(r"^[a-zA-Z0-9_-]{11}$").expect("static pattern"),
            cache: DashMap::new(),
        }
    }

    /// Extract the 11-character video id from any known URL form, or accept
    /// a bare id.
    pub fn extract_video_id(&self, input: &str) -> Option<String> {
        for pattern in &self.id_patterns {
            if let Some(captures) = pattern.captures(input) {
                return Some(captures[1].to_string());
            }
        }
        if self.bare_id.is_match(input) {
            return Some(input.to_string());
        }
        None
    }

    /// Format selector ladder: H.264+AAC at the height cap first, then
    /// progressively looser fallbacks.
    pub fn format_selector(&self) -> String {
        let height = self.preferred_height;
        [
            format!("bestvideo[height<={height}][vcodec^=avc]+bestaudio[acodec^=mp4a]/"),
            format!("bestvideo[height<={height}][vcodec^=avc]+bestaudio/"),
            format!("best[height<={height}][vcodec^=avc]/"),
            "bestvideo[vcodec^=avc]+bestaudio/".to_string(),
            "best[vcodec^=avc]/".to_string(),
            "bestvideo+bestaudio/best".to_string(),
        ]
        .concat()
    }

    fn media_url(media: &MediaRef) -> Option<&str> {
        media.url.as_deref().or_else(|| media.extra_str("video_id"))
    }

    fn classify_extractor_failure(&self, video_id: &str, stderr: &str) -> ResolveError {
        let text = stderr.to_lowercase();
        if text.contains("private video") || text.contains("video is private") {
            ResolveError::permanent(SourceKind::YouTube, format!("video is private: {}", video_id))
        } else if text.contains("video unavailable") {
            ResolveError::permanent(SourceKind::YouTube, format!("video unavailable: {}", video_id))
        } else if text.contains("sign in") || text.contains("confirm your age") {
            ResolveError::transient(
                SourceKind::YouTube,
                format!("authentication required for video: {}", video_id),
            )
        } else if text.contains("too many requests") || text.contains("rate limit") {
            ResolveError::transient(SourceKind::YouTube, format!("rate limited: {}", video_id))
        } else {
            ResolveError::transient(
                SourceKind::YouTube,
                format!("extractor failed for {}: {}", video_id, stderr.trim()),
            )
        }
    }

    async fn extract_info(&self, video_id: &str) -> Result<serde_json::Value, ResolveError> {
        let watch_url = format!("https://www.youtube.com/watch?v={}", video_id);

        let mut cmd = Command::new(&self.ytdlp_path);
        cmd.args(["-j", "--no-warnings", "-f", &self.format_selector()]);
        if let Some(cookies) = &self.cookies_file {
            if cookies.exists() {
                cmd.arg("--cookies");
                cmd.arg(cookies);
            }
        }
        cmd.arg(&watch_url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = cmd.output().await.map_err(|e| {
            ResolveError::permanent(
                SourceKind::YouTube,
                format!("extractor binary '{}' failed to run: {}", self.ytdlp_path, e),
            )
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.classify_extractor_failure(video_id, &stderr));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            ResolveError::transient(
                SourceKind::YouTube,
                format!("unreadable extractor output for {}: {}", video_id, e),
            )
        })
    }
}

#[async_trait]
impl SourceResolver for YouTubeResolver {
    fn kind(&self) -> SourceKind {
        SourceKind::YouTube
    }

    fn can_handle(&self, media: &MediaRef) -> bool {
        if media.source_kind == Some(SourceKind::YouTube) {
            return true;
        }
        match Self::media_url(media) {
            Some(url) => {
                let lower = url.to_lowercase();
                lower.contains("youtube.com") || lower.contains("youtu.be")
            }
            None => false,
        }
    }

    fn cache_key(&self, media: &MediaRef) -> Option<String> {
        Self::media_url(media)
            .and_then(|url| self.extract_video_id(url))
            .map(|id| format!("youtube:{}", id))
    }

    fn cache(&self) -> &DashMap<String, CachedUrl> {
        &self.cache
    }

    async fn resolve(&self, media: &MediaRef) -> Result<ResolvedUrl, ResolveError> {
        let url = Self::media_url(media).ok_or_else(|| {
            ResolveError::permanent(SourceKind::YouTube, "no URL found in media ref")
        })?;

        let video_id = self.extract_video_id(url).ok_or_else(|| {
            ResolveError::permanent(
                SourceKind::YouTube,
                format!("could not extract video id from URL: {}", url),
            )
        })?;

        let info = self.extract_info(&video_id).await?;

        let stream_url = info
            .get("url")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| {
                // Merged formats carry the URL on the last format entry
                info.get("formats")
                    .and_then(|f| f.as_array())
                    .and_then(|formats| formats.last())
                    .and_then(|f| f.get("url"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .ok_or_else(|| {
                ResolveError::transient(
                    SourceKind::YouTube,
                    format!("no stream URL found for video: {}", video_id),
                )
            })?;

        let codec_info = CodecInfo {
            video_codec: info
                .get("vcodec")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .split('.')
                .next()
                .unwrap_or("unknown")
                .to_string(),
            audio_codec: info
                .get("acodec")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .split('.')
                .next()
                .unwrap_or("unknown")
                .to_string(),
            width: info.get("width").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            height: info.get("height").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            framerate: info.get("fps").and_then(|v| v.as_f64()).unwrap_or(30.0),
            duration: info.get("duration").and_then(|v| v.as_f64()).unwrap_or(0.0),
            ..CodecInfo::default()
        };

        let mut resolved = ResolvedUrl::new(stream_url, SourceKind::YouTube, media.id);
        resolved.expires_at = Some(Utc::now() + Duration::hours(DEFAULT_EXPIRATION_HOURS));
        resolved.codec_info = Some(codec_info.clone());
        resolved.headers = vec![
            ("User-Agent".to_string(), DESKTOP_USER_AGENT.to_string()),
            ("Referer".to_string(), "https://www.youtube.com/".to_string()),
            ("Origin".to_string(), "https://www.youtube.com".to_string()),
        ];
        resolved.metadata = serde_json::json!({
            "video_id": video_id,
            "title": info.get("title"),
            "duration": info.get("duration"),
            "channel": info.get("channel"),
        });

        tracing::info!(
            "Resolved YouTube video {}: {}x{} (expires in {}h)",
            video_id,
            codec_info.width,
            codec_info.height,
            DEFAULT_EXPIRATION_HOURS
        );

        Ok(resolved)
    }
}
