//! On-disk page snapshots keyed by a normalized URL.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use url::Url;

use crate::dom;
use crate::error::{LoginError, Result};
use crate::stability::fingerprint;
use crate::surface::Surface;
use crate::types::{CACHE_FILE_SUFFIX, PageSnapshot};

/// Owns one cache root for the lifetime of a run.
///
/// Two caches pointed at the same root will clobber each other: `initialize`
/// wipes whatever is there.
pub struct PageCache {
    root: PathBuf,
    snapshots: HashMap<String, PageSnapshot>,
    confirmed_stable: HashMap<String, DateTime<Utc>>,
}

impl PageCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            snapshots: HashMap::new(),
            confirmed_stable: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deletes and recreates the cache root. Calling this mid-session destroys
    /// every snapshot captured so far.
    pub fn initialize(&mut self) -> Result<()> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root).map_err(|source| LoginError::CacheWrite {
                path: self.root.clone(),
                source,
            })?;
        }
        std::fs::create_dir_all(&self.root).map_err(|source| LoginError::CacheWrite {
            path: self.root.clone(),
            source,
        })?;
        self.snapshots.clear();
        self.confirmed_stable.clear();
        info!(root = %self.root.display(), "cache initialized");
        Ok(())
    }

    pub fn path_for(&self, url: &str) -> PathBuf {
        self.root
            .join(format!("{}{}", dom::cache_key(url), CACHE_FILE_SUFFIX))
    }

    /// Records that `url` was just confirmed stable. Snapshots older than this
    /// are no longer served.
    pub fn confirm_stable(&mut self, url: &str) {
        self.confirmed_stable
            .insert(dom::cache_key(url), Utc::now());
    }

    /// Latest snapshot for `url`, unless a later stability confirmation made
    /// it stale.
    pub fn snapshot(&self, url: &str) -> Option<&PageSnapshot> {
        let key = dom::cache_key(url);
        let snapshot = self.snapshots.get(&key)?;
        match self.confirmed_stable.get(&key) {
            Some(confirmed) if snapshot.captured_at < *confirmed => None,
            _ => Some(snapshot),
        }
    }

    /// Navigates to `url` and snapshots what it renders.
    pub async fn capture(&mut self, surface: &dyn Surface, url: &str) -> Result<PageSnapshot> {
        surface.goto(url).await?;
        let markup = surface.content().await?;
        self.store(url, &markup)
    }

    /// Snapshots the page the surface is already on, without navigating.
    pub async fn capture_current(&mut self, surface: &dyn Surface) -> Result<PageSnapshot> {
        let url = surface.url().await?;
        let markup = surface.content().await?;
        self.store(&url, &markup)
    }

    /// Captures every distinct same-origin page linked from `base_url`,
    /// one after another.
    pub async fn capture_all(
        &mut self,
        surface: &dyn Surface,
        base_url: &str,
    ) -> Result<Vec<PageSnapshot>> {
        let base = Url::parse(base_url).map_err(|e| LoginError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        surface.goto(base_url).await?;
        let markup = surface.content().await?;

        let targets = dom::same_origin_links(&base, &markup);
        info!(base = %base, count = targets.len(), "capturing linked pages");

        let mut captured = Vec::with_capacity(targets.len());
        for target in targets {
            captured.push(self.capture(surface, target.as_str()).await?);
        }
        Ok(captured)
    }

    fn store(&mut self, url: &str, markup: &str) -> Result<PageSnapshot> {
        let path = self.path_for(url);
        let normalized = dom::normalize_markup(markup);

        if let Some(previous) = self.snapshots.get(&dom::cache_key(url)) {
            if previous.url != url {
                warn!(
                    previous = %previous.url,
                    current = %url,
                    "cache key collision, overwriting snapshot"
                );
            }
        }

        std::fs::write(&path, &normalized).map_err(|source| LoginError::CacheWrite {
            path: path.clone(),
            source,
        })?;

        let snapshot = PageSnapshot {
            url: url.to_string(),
            fingerprint: fingerprint(&normalized),
            markup: normalized,
            captured_at: Utc::now(),
            path,
        };
        debug!(url, path = %snapshot.path.display(), "snapshot written");
        self.snapshots
            .insert(dom::cache_key(url), snapshot.clone());
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_wipes_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("cache");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("stale_cached.html"), "old").unwrap();

        let mut cache = PageCache::new(&root);
        cache.initialize().unwrap();

        assert!(root.is_dir());
        assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
    }

    #[test]
    fn path_uses_key_and_suffix() {
        let cache = PageCache::new("/tmp/pages");
        assert_eq!(
            cache.path_for("https://www.example.com/login"),
            PathBuf::from("/tmp/pages/example.com_login_cached.html")
        );
    }

    #[test]
    fn confirmation_hides_older_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = PageCache::new(dir.path().join("c"));
        cache.initialize().unwrap();

        cache.store("https://example.com/", "<p>one</p>").unwrap();
        assert!(cache.snapshot("https://example.com/").is_some());

        std::thread::sleep(std::time::Duration::from_millis(5));
        cache.confirm_stable("https://example.com/");
        assert!(cache.snapshot("https://example.com/").is_none());

        cache.store("https://example.com/", "<p>two</p>").unwrap();
        let fresh = cache.snapshot("https://example.com/").unwrap();
        assert!(fresh.markup.contains("two"));
    }
}
