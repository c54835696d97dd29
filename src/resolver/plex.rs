//! Plex resolver
//!
//! Resolves rating keys to direct-file stream URLs by querying the Plex
//! metadata API and following `MediaContainer.Metadata[0].Media[0].Part[0]`.
//! Stream URLs are treated as expiring after two hours, well inside Plex's
//! actual token lifetime, to force proactive refresh.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use regex::Regex;

use crate::config::MediaServer;
use crate::resolver::types::{CachedUrl, MediaRef, ResolveError, ResolvedUrl, SourceKind};
use crate::resolver::SourceResolver;

const PLEX_URL_EXPIRY_HOURS: i64 = 2;

#[derive(Debug, Default, Clone)]
struct PlexInfo {
    rating_key: Option<String>,
    server_url: Option<String>,
    token: Option<String>,
}

pub struct PlexResolver {
    /// Named server registry from configuration; the first entry doubles as
    /// the global default
    servers: Vec<MediaServer>,
    client: reqwest::Client,
    rating_key_pattern: Regex,
    server_pattern: Regex,
    token_pattern: Regex,
    cache: DashMap<String, CachedUrl>,
}

impl PlexResolver {
    pub fn new(servers: Vec<MediaServer>) -> Self {
        Self {
            servers,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            rating_key_pattern: Regex::new(r"/library/metadata/(\d+)").expect("static pattern"),
            server_pattern: Regex::new(r"(https?://[^/]+)").expect("static pattern"),
            token_pattern: Regex::new(r"X-Plex-Token=([^&]+)").expect("static pattern"),
            cache: DashMap::new(),
        }
    }

    fn extract_info(&self, media: &MediaRef) -> PlexInfo {
        let mut info = PlexInfo::default();

        // Explicit locator fields first
        for field in ["rating_key", "ratingKey", "plex_rating_key"] {
            if let Some(value) = media.extra_str(field) {
                info.rating_key = Some(value.to_string());
                break;
            }
        }
        if let Some(value) = media.extra_str("server_url") {
            info.server_url = Some(value.trim_end_matches('/').to_string());
        }
        if let Some(value) = media.extra_str("token") {
            info.token = Some(value.to_string());
        }

        // URL-embedded values fill remaining gaps
        if let Some(url) = media.url.as_deref() {
            if info.rating_key.is_none() {
                if let Some(captures) = self.rating_key_pattern.captures(url) {
                    info.rating_key = Some(captures[1].to_string());
                }
            }
            if info.server_url.is_none() {
                if let Some(captures) = self.server_pattern.captures(url) {
                    info.server_url = Some(captures[1].to_string());
                }
            }
            if info.token.is_none() {
                if let Some(captures) = self.token_pattern.captures(url) {
                    info.token = Some(captures[1].to_string());
                }
            }
        }

        // Named library registry, then the global default
        if info.server_url.is_none() || info.token.is_none() {
            let named = media
                .extra_str("server")
                .and_then(|name| self.servers.iter().find(|s| s.name == name));
            if let Some(server) = named.or_else(|| self.servers.first()) {
                if info.server_url.is_none() {
                    info.server_url = Some(server.url.trim_end_matches('/').to_string());
                }
                if info.token.is_none() {
                    info.token = Some(server.token.clone());
                }
            }
        }

        info
    }

    /// Walk `MediaContainer.Metadata[0].Media[0].Part[0].key` out of a
    /// metadata response.
    pub fn extract_part_key(metadata: &serde_json::Value) -> Option<String> {
        metadata
            .get("MediaContainer")?
            .get("Metadata")?
            .as_array()?
            .first()?
            .get("Media")?
            .as_array()?
            .first()?
            .get("Part")?
            .as_array()?
            .first()?
            .get("key")?
            .as_str()
            .map(str::to_string)
    }

    async fn query_part_key(
        &self,
        server_url: &str,
        rating_key: &str,
        token: &str,
    ) -> Result<Option<String>, ResolveError> {
        let metadata_url = format!(
            "{}/library/metadata/{}?X-Plex-Token={}",
            server_url, rating_key, token
        );

        let response = self
            .client
            .get(&metadata_url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                ResolveError::transient(SourceKind::Plex, format!("metadata request failed: {}", e))
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ResolveError::permanent(
                SourceKind::Plex,
                format!("rating key {} not found on server", rating_key),
            ));
        }
        if !status.is_success() {
            // Auth and transient server failures are retried upstream
            return Err(ResolveError::transient(
                SourceKind::Plex,
                format!("metadata request returned HTTP {}", status.as_u16()),
            ));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            ResolveError::transient(SourceKind::Plex, format!("unreadable metadata response: {}", e))
        })?;

        Ok(Self::extract_part_key(&body))
    }
}

#[async_trait]
impl SourceResolver for PlexResolver {
    fn kind(&self) -> SourceKind {
        SourceKind::Plex
    }

    fn can_handle(&self, media: &MediaRef) -> bool {
        if media.source_kind == Some(SourceKind::Plex) {
            return true;
        }
        if media.extra_str("rating_key").is_some() || media.extra_str("plex_rating_key").is_some() {
            return true;
        }
        media
            .url
            .as_deref()
            .map(|u| {
                let lower = u.to_lowercase();
                lower.contains(":32400") || lower.contains("/library/metadata/")
            })
            .unwrap_or(false)
    }

    fn cache_key(&self, media: &MediaRef) -> Option<String> {
        let info = self.extract_info(media);
        let server = media.extra_str("server").unwrap_or("default");
        info.rating_key.map(|key| format!("plex:{}:{}", server, key))
    }

    fn cache(&self) -> &DashMap<String, CachedUrl> {
        &self.cache
    }

    async fn resolve(&self, media: &MediaRef) -> Result<ResolvedUrl, ResolveError> {
        let info = self.extract_info(media);

        let (rating_key, server_url, token) = match (&info.rating_key, &info.server_url, &info.token)
        {
            (Some(rating_key), Some(server_url), Some(token)) => (rating_key, server_url, token),
            _ => {
                return Err(ResolveError::permanent(
                    SourceKind::Plex,
                    "missing Plex connection info (server_url, token, or rating_key)",
                ))
            }
        };

        let stream_url = match self.query_part_key(server_url, rating_key, token).await {
            Ok(Some(part_key)) => {
                tracing::info!("Resolved Plex item {}", rating_key);
                format!("{}{}?X-Plex-Token={}", server_url, part_key, token)
            }
            Ok(None) => {
                // Older servers respond without Part entries; the legacy
                // file endpoint still works on some of them
                tracing::warn!(
                    "No part key found in Plex metadata for {}, using fallback URL format",
                    rating_key
                );
                format!(
                    "{}/library/metadata/{}/file?X-Plex-Token={}",
                    server_url, rating_key, token
                )
            }
            Err(e) => return Err(e),
        };

        let mut resolved = ResolvedUrl::new(stream_url, SourceKind::Plex, media.id);
        resolved.expires_at = Some(Utc::now() + Duration::hours(PLEX_URL_EXPIRY_HOURS));
        resolved.headers = vec![("X-Plex-Token".to_string(), token.clone())];
        resolved.metadata = serde_json::json!({
            "rating_key": rating_key,
            "server_url": server_url,
        });

        Ok(resolved)
    }
}
