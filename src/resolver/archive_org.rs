//! Archive.org resolver
//!
//! Pure URL construction: identifiers and filenames are extracted from URLs
//! or locator fields and assembled into direct download URLs. Archive.org
//! URLs are permanent and never expire.

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;

use crate::resolver::types::{CachedUrl, MediaRef, ResolveError, ResolvedUrl, SourceKind};
use crate::resolver::SourceResolver;

const DOWNLOAD_URL: &str = "https://archive.org/download";

const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub struct ArchiveOrgResolver {
    identifier_patterns: Vec<Regex>,
    filename_pattern: Regex,
    direct_ext: Regex,
    cache: DashMap<String, CachedUrl>,
}

impl Default for ArchiveOrgResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveOrgResolver {
    pub fn new() -> Self {
        let identifier_patterns = [
            r"archive\.org/details/([^/?\s]+)",
            r"archive\.org/download/([^/?\s]+)",
            r"archive\.org/embed/([^/?\s]+)",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static pattern"))
        .collect();

        Self {
            identifier_patterns,
            filename_pattern: Regex::new(r"archive\.org/download/[^/]+/([^?]+)")
                .expect("static pattern"),
            direct_ext: Regex::new(r"\.\w{2,4}(\?|$)").expect("static pattern"),
            cache: DashMap::new(),
        }
    }

    pub fn extract_identifier(&self, url: &str) -> Option<String> {
        for pattern in &self.identifier_patterns {
            if let Some(captures) = pattern.captures(url) {
                return Some(captures[1].to_string());
            }
        }
        None
    }

    pub fn extract_filename(&self, url: &str) -> Option<String> {
        self.filename_pattern
            .captures(url)
            .map(|c| c[1].to_string())
            .filter(|f| !f.is_empty())
    }

    fn is_direct_url(&self, url: &str) -> bool {
        url.contains("/download/") && self.direct_ext.is_match(url)
    }

    /// Percent-encode the filename portion of a download URL.
    ///
    /// Filenames often carry spaces and punctuation the transcoder's HTTP
    /// reader rejects; already-encoded filenames are decoded first so the
    /// result is never double-encoded.
    pub fn encode_archive_url(&self, url: &str) -> String {
        let Some((prefix, remainder)) = url.split_once("/download/") else {
            return url.to_string();
        };

        let Some((identifier, filename)) = remainder.split_once('/') else {
            return url.to_string();
        };

        let decoded = if filename.contains('%') {
            match urlencoding::decode(filename) {
                Ok(decoded) => decoded.into_owned(),
                Err(_) => filename.to_string(),
            }
        } else {
            filename.to_string()
        };

        format!(
            "{}/download/{}/{}",
            prefix,
            identifier,
            urlencoding::encode(&decoded)
        )
    }

    fn identifier_from_ref(&self, media: &MediaRef) -> Option<String> {
        for field in ["archive_org_identifier", "identifier"] {
            if let Some(value) = media.extra_str(field) {
                return Some(value.to_string());
            }
        }
        None
    }

    fn filename_from_ref(&self, media: &MediaRef) -> Option<String> {
        for field in ["archive_org_filename", "filename"] {
            if let Some(value) = media.extra_str(field) {
                return Some(value.to_string());
            }
        }
        // A crawled file list may carry candidate names
        media
            .extra
            .get("video_files")
            .and_then(|v| v.as_array())
            .and_then(|files| files.first())
            .and_then(|f| f.get("name"))
            .and_then(|n| n.as_str())
            .map(str::to_string)
    }

    fn build_resolved(&self, url: String, media: &MediaRef, identifier: Option<String>, filename: Option<String>) -> ResolvedUrl {
        let mut resolved = ResolvedUrl::new(url, SourceKind::ArchiveOrg, media.id);
        resolved.headers = vec![
            ("Referer".to_string(), "https://archive.org/".to_string()),
            ("User-Agent".to_string(), DESKTOP_USER_AGENT.to_string()),
        ];
        resolved.metadata = serde_json::json!({
            "identifier": identifier,
            "filename": filename,
        });
        resolved
    }
}

#[async_trait]
impl SourceResolver for ArchiveOrgResolver {
    fn kind(&self) -> SourceKind {
        SourceKind::ArchiveOrg
    }

    fn can_handle(&self, media: &MediaRef) -> bool {
        if media.source_kind == Some(SourceKind::ArchiveOrg) {
            return true;
        }
        if self.identifier_from_ref(media).is_some() {
            return true;
        }
        media
            .url
            .as_deref()
            .map(|u| u.to_lowercase().contains("archive.org"))
            .unwrap_or(false)
    }

    fn cache_key(&self, media: &MediaRef) -> Option<String> {
        let url = media.url.as_deref().unwrap_or("");
        let identifier = self
            .extract_identifier(url)
            .or_else(|| self.identifier_from_ref(media))?;
        match self.extract_filename(url).or_else(|| self.filename_from_ref(media)) {
            Some(filename) => Some(format!("archive_org:{}:{}", identifier, filename)),
            None => Some(format!("archive_org:{}", identifier)),
        }
    }

    fn cache(&self) -> &DashMap<String, CachedUrl> {
        &self.cache
    }

    async fn resolve(&self, media: &MediaRef) -> Result<ResolvedUrl, ResolveError> {
        let url = media.url.as_deref().unwrap_or("");

        // Already a direct download URL; just normalize the encoding
        if self.is_direct_url(url) {
            let encoded = self.encode_archive_url(url);
            let identifier = self.extract_identifier(url);
            let filename = self.extract_filename(url);
            return Ok(self.build_resolved(encoded, media, identifier, filename));
        }

        let identifier = self
            .extract_identifier(url)
            .or_else(|| self.identifier_from_ref(media))
            .ok_or_else(|| {
                ResolveError::permanent(
                    SourceKind::ArchiveOrg,
                    format!("could not extract identifier from URL: {}", url),
                )
            })?;

        let filename = self.extract_filename(url).or_else(|| self.filename_from_ref(media));

        let stream_url = match &filename {
            Some(filename) => {
                format!("{}/{}/{}", DOWNLOAD_URL, identifier, urlencoding::encode(filename))
            }
            None => {
                // A details page is not streamable; guess the common layout
                tracing::warn!(
                    "No filename found for Archive.org item {}. Attempting default URL pattern.",
                    identifier
                );
                format!("{}/{}/{}.mp4", DOWNLOAD_URL, identifier, identifier)
            }
        };

        tracing::info!("Resolved Archive.org item: {}", identifier);
        Ok(self.build_resolved(stream_url, media, Some(identifier), filename))
    }
}
