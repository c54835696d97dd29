//! Jellyfin/Emby resolver
//!
//! Both servers share the `/Items/{id}/Download?api_key=` direct-download
//! surface; only the auth header differs. API-key URLs do not expire.

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;

use crate::config::MediaServer;
use crate::resolver::types::{CachedUrl, MediaRef, ResolveError, ResolvedUrl, SourceKind};
use crate::resolver::SourceResolver;

#[derive(Debug, Default, Clone)]
struct JellyfinInfo {
    item_id: Option<String>,
    server_url: Option<String>,
    api_key: Option<String>,
}

pub struct JellyfinResolver {
    servers: Vec<MediaServer>,
    is_emby: bool,
    item_pattern: Regex,
    server_pattern: Regex,
    key_pattern: Regex,
    cache: DashMap<String, CachedUrl>,
}

impl JellyfinResolver {
    pub fn new(servers: Vec<MediaServer>, is_emby: bool) -> Self {
        Self {
            servers,
            is_emby,
            item_pattern: Regex::new(r"(?i)/Items/([a-f0-9-]+)").expect("static pattern"),
            server_pattern: Regex::new(r"(https?://[^/]+)").expect("static pattern"),
            key_pattern: Regex::new(r"api_key=([^&]+)").expect("static pattern"),
            cache: DashMap::new(),
        }
    }

    fn extract_info(&self, media: &MediaRef) -> JellyfinInfo {
        let mut info = JellyfinInfo::default();

        for field in ["item_id", "Id"] {
            if let Some(value) = media.extra_str(field) {
                info.item_id = Some(value.to_string());
                break;
            }
        }
        if let Some(value) = media.extra_str("server_url") {
            info.server_url = Some(value.trim_end_matches('/').to_string());
        }
        if let Some(value) = media.extra_str("api_key") {
            info.api_key = Some(value.to_string());
        }

        if let Some(url) = media.url.as_deref() {
            if info.item_id.is_none() {
                if let Some(captures) = self.item_pattern.captures(url) {
                    info.item_id = Some(captures[1].to_string());
                }
            }
            if info.server_url.is_none() {
                if let Some(captures) = self.server_pattern.captures(url) {
                    info.server_url = Some(captures[1].to_string());
                }
            }
            if info.api_key.is_none() {
                if let Some(captures) = self.key_pattern.captures(url) {
                    info.api_key = Some(captures[1].to_string());
                }
            }
        }

        if info.server_url.is_none() || info.api_key.is_none() {
            let named = media
                .extra_str("server")
                .and_then(|name| self.servers.iter().find(|s| s.name == name));
            if let Some(server) = named.or_else(|| self.servers.first()) {
                if info.server_url.is_none() {
                    info.server_url = Some(server.url.trim_end_matches('/').to_string());
                }
                if info.api_key.is_none() {
                    info.api_key = Some(server.token.clone());
                }
            }
        }

        info
    }

    fn auth_header(&self, api_key: &str) -> (String, String) {
        if self.is_emby {
            ("X-Emby-Token".to_string(), api_key.to_string())
        } else {
            (
                "Authorization".to_string(),
                format!("MediaBrowser Token=\"{}\"", api_key),
            )
        }
    }
}

#[async_trait]
impl SourceResolver for JellyfinResolver {
    fn kind(&self) -> SourceKind {
        if self.is_emby {
            SourceKind::Emby
        } else {
            SourceKind::Jellyfin
        }
    }

    fn can_handle(&self, media: &MediaRef) -> bool {
        if media.source_kind == Some(self.kind()) {
            return true;
        }
        media
            .url
            .as_deref()
            .map(|u| {
                let lower = u.to_lowercase();
                lower.contains(":8096") || lower.contains("/items/")
            })
            .unwrap_or(false)
    }

    fn cache_key(&self, media: &MediaRef) -> Option<String> {
        let info = self.extract_info(media);
        let server = media.extra_str("server").unwrap_or("default");
        let prefix = if self.is_emby { "emby" } else { "jellyfin" };
        info.item_id.map(|id| format!("{}:{}:{}", prefix, server, id))
    }

    fn cache(&self) -> &DashMap<String, CachedUrl> {
        &self.cache
    }

    async fn resolve(&self, media: &MediaRef) -> Result<ResolvedUrl, ResolveError> {
        let info = self.extract_info(media);

        let (item_id, server_url, api_key) = match (&info.item_id, &info.server_url, &info.api_key) {
            (Some(item_id), Some(server_url), Some(api_key)) => (item_id, server_url, api_key),
            _ => {
                return Err(ResolveError::permanent(
                    self.kind(),
                    "missing connection info (server_url, api_key, or item_id)",
                ))
            }
        };

        let stream_url = format!("{}/Items/{}/Download?api_key={}", server_url, item_id, api_key);

        let mut resolved = ResolvedUrl::new(stream_url, self.kind(), media.id);
        resolved.headers = vec![self.auth_header(api_key)];
        resolved.metadata = serde_json::json!({
            "item_id": item_id,
            "server_url": server_url,
        });

        tracing::info!(
            "Resolved {} item {}",
            if self.is_emby { "Emby" } else { "Jellyfin" },
            item_id
        );
        Ok(resolved)
    }
}
