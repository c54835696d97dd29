//! URL resolution hub
//!
//! Routes media refs to source-specific resolvers and manages cached
//! resolutions with expiration tracking. Resolvers classify failures and
//! raise; retry cadence belongs to the channel supervisor.

pub mod archive_org;
pub mod jellyfin;
pub mod local;
pub mod plex;
pub mod types;
pub mod youtube;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use dashmap::DashMap;

pub use types::{CacheStats, CachedUrl, MediaRef, ResolveError, ResolvedUrl, SourceKind};

/// A resolver for one media source kind.
///
/// Implementations own a per-resolver cache keyed by source-specific stable
/// keys (video id, identifier+filename, rating key).
#[async_trait]
pub trait SourceResolver: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Whether this resolver recognizes the given media ref
    fn can_handle(&self, media: &MediaRef) -> bool;

    /// Source-specific stable cache key, when one can be derived
    fn cache_key(&self, media: &MediaRef) -> Option<String>;

    /// The per-resolver cache
    fn cache(&self) -> &DashMap<String, CachedUrl>;

    /// Resolve to a streamable URL, bypassing any caching (the trait's
    /// `resolve_cached` wrapper handles cache lookups).
    async fn resolve(&self, media: &MediaRef) -> Result<ResolvedUrl, ResolveError>;

    /// Cache-aware resolution entry point.
    async fn resolve_cached(
        &self,
        media: &MediaRef,
        force_refresh: bool,
    ) -> Result<ResolvedUrl, ResolveError> {
        let key = self
            .cache_key(media)
            .unwrap_or_else(|| format!("{}:{}", self.kind(), media.id));

        if !force_refresh {
            if let Some(entry) = self.cache().get(&key) {
                if entry.is_valid() {
                    return Ok(entry.resolved.clone());
                }
            }
            // Expired entries are evicted on read
            self.cache().remove(&key);
        }

        let resolved = self.resolve(media).await?;

        let refresh_count = self
            .cache()
            .get(&key)
            .map(|existing| existing.refresh_count + 1)
            .unwrap_or(0);
        let mut entry = CachedUrl::new(key.clone(), resolved.clone());
        entry.refresh_count = refresh_count;
        self.cache().insert(key, entry);

        Ok(resolved)
    }

    fn clear_cache(&self) -> usize {
        let count = self.cache().len();
        self.cache().clear();
        count
    }

    fn cache_stats(&self, threshold: Duration) -> CacheStats {
        let total = self.cache().len();
        let valid = self.cache().iter().filter(|e| e.is_valid()).count();
        let expiring = self.cache().iter().filter(|e| e.needs_refresh(threshold)).count();
        CacheStats {
            total_entries: total,
            valid_entries: valid,
            expiring_soon: expiring,
            expired_entries: total - valid,
        }
    }
}

/// Central resolver registry with a unified cache.
pub struct ResolverRegistry {
    resolvers: Vec<Arc<dyn SourceResolver>>,
    global_cache: DashMap<String, CachedUrl>,
    resolve_timeout: StdDuration,
}

impl ResolverRegistry {
    pub fn new(resolvers: Vec<Arc<dyn SourceResolver>>, resolve_timeout: StdDuration) -> Self {
        Self {
            resolvers,
            global_cache: DashMap::new(),
            resolve_timeout,
        }
    }

    /// Detect the source kind of a media ref.
    ///
    /// Order: explicit kind, Archive.org locator fields, URL patterns.
    pub fn detect_kind(&self, media: &MediaRef) -> SourceKind {
        if let Some(kind) = media.source_kind {
            if kind != SourceKind::Unknown {
                return kind;
            }
        }

        // Items imported from other systems often carry an Archive.org
        // identifier without a source tag
        for field in ["identifier", "archive_org_identifier", "archive_org_filename"] {
            if media.extra_str(field).is_some() {
                return SourceKind::ArchiveOrg;
            }
        }
        if let Some(collection) = media.extra_str("collection") {
            if collection.to_lowercase().contains("archive") {
                return SourceKind::ArchiveOrg;
            }
        }

        if let Some(url) = media.url.as_deref() {
            let lower = url.to_lowercase();
            if lower.contains("youtube.com") || lower.contains("youtu.be") {
                return SourceKind::YouTube;
            }
            if lower.contains("archive.org") {
                return SourceKind::ArchiveOrg;
            }
            if lower.starts_with('/') || lower.starts_with("file://") {
                return SourceKind::Local;
            }
            if lower.contains(":32400") || lower.contains("plex") {
                return SourceKind::Plex;
            }
            if lower.contains(":8096") || lower.contains("jellyfin") {
                return SourceKind::Jellyfin;
            }
        }

        SourceKind::Unknown
    }

    fn resolver_for(&self, kind: SourceKind, media: &MediaRef) -> Option<&Arc<dyn SourceResolver>> {
        self.resolvers
            .iter()
            .find(|r| r.kind() == kind)
            .or_else(|| self.resolvers.iter().find(|r| r.can_handle(media)))
    }

    fn global_key(&self, kind: SourceKind, media: &MediaRef) -> String {
        format!("{}:{}", kind, media.id)
    }

    /// Resolve a media ref to a streamable URL.
    pub async fn resolve(
        &self,
        media: &MediaRef,
        force_refresh: bool,
    ) -> Result<ResolvedUrl, ResolveError> {
        let kind = self.detect_kind(media);

        let resolver = match self.resolver_for(kind, media) {
            Some(resolver) => resolver,
            None => {
                // Last resort: treat the URL as the already-resolved stream
                if let Some(url) = media.url.as_deref() {
                    tracing::warn!(
                        "No resolver for {}, using URL directly: {:.50}",
                        kind,
                        url
                    );
                    let resolved = ResolvedUrl::new(url, kind, media.id);
                    self.global_cache.insert(
                        self.global_key(kind, media),
                        CachedUrl::new(self.global_key(kind, media), resolved.clone()),
                    );
                    return Ok(resolved);
                }
                return Err(ResolveError::permanent(
                    kind,
                    format!("no resolver available for source kind {}", kind),
                ));
            }
        };

        let resolved = tokio::time::timeout(
            self.resolve_timeout,
            resolver.resolve_cached(media, force_refresh),
        )
        .await
        .map_err(|_| {
            ResolveError::transient(
                kind,
                format!("resolution timed out after {:?}", self.resolve_timeout),
            )
        })??;

        debug_assert!(!resolved.is_expired(), "resolvers must emit future expiry");

        let key = self.global_key(resolved.source_kind, media);
        let refresh_count = self
            .global_cache
            .get(&key)
            .map(|e| e.refresh_count + 1)
            .unwrap_or(0);
        let mut entry = CachedUrl::new(key.clone(), resolved.clone());
        entry.refresh_count = refresh_count;
        self.global_cache.insert(key, entry);

        tracing::debug!(
            "Resolved {} URL for media {} (expires: {:?})",
            resolved.source_kind,
            media.id,
            resolved.expires_at
        );

        Ok(resolved)
    }

    /// Cached value, if present and still valid
    pub fn get_cached(&self, media: &MediaRef) -> Option<ResolvedUrl> {
        let kind = self.detect_kind(media);
        let key = self.global_key(kind, media);
        self.global_cache
            .get(&key)
            .filter(|e| e.is_valid())
            .map(|e| e.resolved.clone())
    }

    /// Re-resolve when the cached URL is expired or inside the threshold.
    ///
    /// Returns the new resolution, or None when no refresh was needed.
    pub async fn refresh_if_expiring(
        &self,
        media: &MediaRef,
        threshold: Duration,
    ) -> Result<Option<ResolvedUrl>, ResolveError> {
        let kind = self.detect_kind(media);
        let key = self.global_key(kind, media);

        let needs = match self.global_cache.get(&key) {
            None => return self.resolve(media, false).await.map(Some),
            Some(cached) => {
                if !cached.is_valid() {
                    tracing::info!("URL expired, refreshing: {}", key);
                    true
                } else if cached.needs_refresh(threshold) {
                    tracing::info!("URL expiring soon, proactively refreshing: {}", key);
                    true
                } else {
                    false
                }
            }
        };

        if needs {
            self.resolve(media, true).await.map(Some)
        } else {
            Ok(None)
        }
    }

    /// Entries due for proactive refresh
    pub fn expiring_entries(&self, threshold: Duration) -> Vec<CachedUrl> {
        self.global_cache
            .iter()
            .filter(|e| e.needs_refresh(threshold))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Remove a media ref's cached resolution unconditionally
    pub fn invalidate(&self, media: &MediaRef) {
        let kind = self.detect_kind(media);
        self.global_cache.remove(&self.global_key(kind, media));
        if let Some(resolver) = self.resolver_for(kind, media) {
            if let Some(key) = resolver.cache_key(media) {
                resolver.cache().remove(&key);
            }
        }
    }

    /// Clear every cache; returns the number of evicted global entries
    pub fn clear(&self) -> usize {
        let cleared = self.global_cache.len();
        self.global_cache.clear();
        for resolver in &self.resolvers {
            resolver.clear_cache();
        }
        cleared
    }

    /// Aggregate cache statistics per source kind
    pub fn stats(&self, threshold: Duration) -> Vec<(SourceKind, CacheStats)> {
        self.resolvers
            .iter()
            .map(|r| (r.kind(), r.cache_stats(threshold)))
            .collect()
    }

    pub fn global_cache_size(&self) -> usize {
        self.global_cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct FakeResolver {
        kind: SourceKind,
        cache: DashMap<String, CachedUrl>,
        calls: std::sync::atomic::AtomicU32,
        expiry_mins: Option<i64>,
    }

    impl FakeResolver {
        fn new(kind: SourceKind, expiry_mins: Option<i64>) -> Self {
            Self {
                kind,
                cache: DashMap::new(),
                calls: std::sync::atomic::AtomicU32::new(0),
                expiry_mins,
            }
        }
    }

    #[async_trait]
    impl SourceResolver for FakeResolver {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        fn can_handle(&self, media: &MediaRef) -> bool {
            media.source_kind == Some(self.kind)
        }

        fn cache_key(&self, media: &MediaRef) -> Option<String> {
            Some(format!("{}:{}", self.kind, media.id))
        }

        fn cache(&self) -> &DashMap<String, CachedUrl> {
            &self.cache
        }

        async fn resolve(&self, media: &MediaRef) -> Result<ResolvedUrl, ResolveError> {
            let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let mut resolved = ResolvedUrl::new(
                format!("http://cdn.example/{}/{}", media.id, n),
                self.kind,
                media.id,
            );
            resolved.expires_at = self.expiry_mins.map(|m| Utc::now() + Duration::minutes(m));
            Ok(resolved)
        }
    }

    fn registry_with(resolver: Arc<dyn SourceResolver>) -> ResolverRegistry {
        ResolverRegistry::new(vec![resolver], StdDuration::from_secs(5))
    }

    fn media(kind: SourceKind, id: i64) -> MediaRef {
        MediaRef {
            id,
            source_kind: Some(kind),
            url: None,
            title: None,
            duration_secs: None,
            extra: serde_json::Value::Null,
        }
    }

    // =========================================================================
    // Caching behavior
    // =========================================================================

    #[tokio::test]
    async fn test_resolve_uses_cache_until_forced() {
        let fake = Arc::new(FakeResolver::new(SourceKind::YouTube, Some(360)));
        let registry = registry_with(fake.clone());
        let media = media(SourceKind::YouTube, 1);

        let first = registry.resolve(&media, false).await.unwrap();
        let second = registry.resolve(&media, false).await.unwrap();
        assert_eq!(first.url, second.url, "second call must hit the cache");

        let third = registry.resolve(&media, true).await.unwrap();
        assert_ne!(first.url, third.url, "force refresh must bypass the cache");
    }

    #[tokio::test]
    async fn test_refresh_if_expiring_respects_threshold() {
        let fake = Arc::new(FakeResolver::new(SourceKind::YouTube, Some(30)));
        let registry = registry_with(fake);
        let media = media(SourceKind::YouTube, 2);

        registry.resolve(&media, false).await.unwrap();

        // 30 min left, 60 min threshold: refresh happens
        let refreshed = registry
            .refresh_if_expiring(&media, Duration::minutes(60))
            .await
            .unwrap();
        assert!(refreshed.is_some());

        // Fresh 30 min entry against a 5 min threshold: nothing to do
        let untouched = registry
            .refresh_if_expiring(&media, Duration::minutes(5))
            .await
            .unwrap();
        assert!(untouched.is_none());
    }

    #[tokio::test]
    async fn test_expiring_entries_enumeration() {
        let fake = Arc::new(FakeResolver::new(SourceKind::YouTube, Some(30)));
        let registry = registry_with(fake);

        registry.resolve(&media(SourceKind::YouTube, 1), false).await.unwrap();
        registry.resolve(&media(SourceKind::YouTube, 2), false).await.unwrap();

        assert_eq!(registry.expiring_entries(Duration::minutes(60)).len(), 2);
        assert_eq!(registry.expiring_entries(Duration::minutes(5)).len(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_removes_entry() {
        let fake = Arc::new(FakeResolver::new(SourceKind::YouTube, None));
        let registry = registry_with(fake);
        let media = media(SourceKind::YouTube, 3);

        let first = registry.resolve(&media, false).await.unwrap();
        registry.invalidate(&media);
        let second = registry.resolve(&media, false).await.unwrap();
        assert_ne!(first.url, second.url);
    }

    #[tokio::test]
    async fn test_clear_empties_all_caches() {
        let fake = Arc::new(FakeResolver::new(SourceKind::YouTube, None));
        let registry = registry_with(fake);
        registry.resolve(&media(SourceKind::YouTube, 4), false).await.unwrap();

        assert_eq!(registry.clear(), 1);
        assert_eq!(registry.global_cache_size(), 0);
    }

    // =========================================================================
    // Detection and fallback
    // =========================================================================

    #[tokio::test]
    async fn test_unknown_kind_with_url_passes_through() {
        let registry = ResolverRegistry::new(Vec::new(), StdDuration::from_secs(5));
        let media = MediaRef::from_url(9, "http://example.com/stream.ts");

        let resolved = registry.resolve(&media, false).await.unwrap();
        assert_eq!(resolved.url, "http://example.com/stream.ts");
        assert!(resolved.expires_at.is_none());
    }

    #[tokio::test]
    async fn test_unknown_kind_without_url_is_permanent_error() {
        let registry = ResolverRegistry::new(Vec::new(), StdDuration::from_secs(5));
        let media = media(SourceKind::Unknown, 10);

        let err = registry.resolve(&media, false).await.unwrap_err();
        assert!(!err.retryable);
    }

    #[test]
    fn test_detect_kind_from_archive_identifier_field() {
        let registry = ResolverRegistry::new(Vec::new(), StdDuration::from_secs(5));
        let media = MediaRef {
            id: 1,
            source_kind: None,
            url: None,
            title: None,
            duration_secs: None,
            extra: serde_json::json!({"identifier": "some_item"}),
        };
        assert_eq!(registry.detect_kind(&media), SourceKind::ArchiveOrg);
    }

    #[test]
    fn test_detect_kind_from_url_patterns() {
        let registry = ResolverRegistry::new(Vec::new(), StdDuration::from_secs(5));
        let cases = [
            ("https://www.youtube.com/watch?v=dQw4w9WgXcQ", SourceKind::YouTube),
            ("https://archive.org/details/night_of_the_living_dead", SourceKind::ArchiveOrg),
            ("/media/movies/film.mkv", SourceKind::Local),
            ("file:///media/movies/film.mkv", SourceKind::Local),
            ("http://server.local:32400/library/metadata/42", SourceKind::Plex),
            ("http://server.local:8096/Items/abc", SourceKind::Jellyfin),
        ];
        for (url, expected) in cases {
            assert_eq!(
                registry.detect_kind(&MediaRef::from_url(1, url)),
                expected,
                "url: {}",
                url
            );
        }
    }

    #[test]
    fn test_explicit_kind_wins_over_url() {
        let registry = ResolverRegistry::new(Vec::new(), StdDuration::from_secs(5));
        let mut media = MediaRef::from_url(1, "https://archive.org/details/x");
        media.source_kind = Some(SourceKind::Plex);
        assert_eq!(registry.detect_kind(&media), SourceKind::Plex);
    }
}
