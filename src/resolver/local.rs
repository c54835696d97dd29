//! Local file resolver
//!
//! Validates that a path exists, is a regular file, and (when a whitelist is
//! configured) sits under an allowed base directory. The absolute path is
//! returned as the "URL" for the transcoder to read directly.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::resolver::types::{CachedUrl, MediaRef, ResolveError, ResolvedUrl, SourceKind};
use crate::resolver::SourceResolver;

pub struct LocalFileResolver {
    /// Allowed base paths; empty means unrestricted
    allowed_paths: Vec<PathBuf>,
    cache: DashMap<String, CachedUrl>,
}

impl LocalFileResolver {
    pub fn new(allowed_paths: Vec<PathBuf>) -> Self {
        Self {
            allowed_paths,
            cache: DashMap::new(),
        }
    }

    fn media_path(media: &MediaRef) -> Option<&str> {
        media.url.as_deref().or_else(|| media.extra_str("path"))
    }

    /// Strip a `file://` prefix; the remainder is a plain path
    pub fn normalize_path(path: &str) -> &str {
        path.strip_prefix("file://").unwrap_or(path)
    }

    fn is_path_allowed(&self, path: &Path) -> bool {
        if self.allowed_paths.is_empty() {
            return true;
        }
        // Canonicalize so symlinks cannot escape the whitelist
        let resolved = match path.canonicalize() {
            Ok(resolved) => resolved,
            Err(_) => return false,
        };
        self.allowed_paths.iter().any(|allowed| {
            allowed
                .canonicalize()
                .map(|base| resolved.starts_with(base))
                .unwrap_or(false)
        })
    }
}

#[async_trait]
impl SourceResolver for LocalFileResolver {
    fn kind(&self) -> SourceKind {
        SourceKind::Local
    }

    fn can_handle(&self, media: &MediaRef) -> bool {
        if media.source_kind == Some(SourceKind::Local) {
            return true;
        }
        match Self::media_path(media) {
            Some(path) => path.starts_with('/') || path.starts_with("file://"),
            None => false,
        }
    }

    fn cache_key(&self, media: &MediaRef) -> Option<String> {
        Self::media_path(media).map(|p| format!("local:{}", Self::normalize_path(p)))
    }

    fn cache(&self) -> &DashMap<String, CachedUrl> {
        &self.cache
    }

    async fn resolve(&self, media: &MediaRef) -> Result<ResolvedUrl, ResolveError> {
        let raw = Self::media_path(media).ok_or_else(|| {
            ResolveError::permanent(SourceKind::Local, "no path found in media ref")
        })?;

        let path = PathBuf::from(Self::normalize_path(raw));

        let metadata = tokio::fs::metadata(&path).await.map_err(|e| {
            ResolveError::permanent(
                SourceKind::Local,
                format!("file not accessible: {}: {}", path.display(), e),
            )
        })?;

        if !metadata.is_file() {
            return Err(ResolveError::permanent(
                SourceKind::Local,
                format!("not a regular file: {}", path.display()),
            ));
        }

        if !self.is_path_allowed(&path) {
            return Err(ResolveError::permanent(
                SourceKind::Local,
                format!("path outside allowed directories: {}", path.display()),
            ));
        }

        let absolute = path
            .canonicalize()
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();

        Ok(ResolvedUrl::new(absolute, SourceKind::Local, media.id))
    }
}
