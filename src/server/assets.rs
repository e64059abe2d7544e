//! Static page and asset responder with a bounded in-memory cache

use crate::error::{BgRemovalError, Result};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// How a GET path maps onto the static directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetRoute {
    /// Explicitly not served
    NotFound,
    /// A named stylesheet or script
    Asset(String),
    /// Everything else falls back to the default page
    DefaultPage,
}

/// Map a request path to a route
///
/// Only the final path component of a `.css` or `.js` request is kept, so a
/// name can never reach outside the static directory.
#[must_use]
pub fn route(path: &str) -> AssetRoute {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    if path == "/favicon.ico" {
        return AssetRoute::NotFound;
    }

    let name = path
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".css") || lower.ends_with(".js") {
        if name.starts_with('.') || name.contains("..") {
            return AssetRoute::NotFound;
        }
        return AssetRoute::Asset(name.to_string());
    }
    AssetRoute::DefaultPage
}

/// Content type derived from the file extension
#[must_use]
pub fn content_type_for(name: &str) -> &'static str {
    let extension = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("css") => "text/css; charset=UTF-8",
        Some("js") => "application/javascript; charset=UTF-8",
        _ => "text/html; charset=UTF-8",
    }
}

/// Loaded file contents
#[derive(Debug, Clone)]
pub struct Asset {
    pub bytes: Arc<Vec<u8>>,
    pub content_type: &'static str,
}

/// LRU cache bounded by entry count and total bytes
#[derive(Debug)]
struct AssetCache {
    entries: HashMap<String, Arc<Vec<u8>>>,
    order: VecDeque<String>,
    total_bytes: usize,
    max_entries: usize,
    max_bytes: usize,
}

impl AssetCache {
    fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            total_bytes: 0,
            max_entries,
            max_bytes,
        }
    }

    fn get(&mut self, name: &str) -> Option<Arc<Vec<u8>>> {
        let bytes = self.entries.get(name).cloned()?;
        self.touch(name);
        Some(bytes)
    }

    fn touch(&mut self, name: &str) {
        if let Some(position) = self.order.iter().position(|n| n == name) {
            if let Some(key) = self.order.remove(position) {
                self.order.push_back(key);
            }
        }
    }

    fn insert(&mut self, name: &str, bytes: Arc<Vec<u8>>) {
        if self.max_entries == 0 || bytes.len() > self.max_bytes {
            return;
        }
        if let Some(previous) = self.entries.remove(name) {
            self.total_bytes -= previous.len();
            self.order.retain(|n| n != name);
        }

        while self.entries.len() >= self.max_entries
            || self.total_bytes + bytes.len() > self.max_bytes
        {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if let Some(evicted) = self.entries.remove(&oldest) {
                self.total_bytes -= evicted.len();
                log::trace!("Evicted {} from asset cache", oldest);
            }
        }

        self.total_bytes += bytes.len();
        self.entries.insert(name.to_string(), bytes);
        self.order.push_back(name.to_string());
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Serves files from one directory, never below or above it
#[derive(Debug)]
pub struct StaticAssets {
    root: PathBuf,
    default_page: String,
    cache: Mutex<AssetCache>,
}

impl StaticAssets {
    #[must_use]
    pub fn new<P: Into<PathBuf>, S: Into<String>>(
        root: P,
        default_page: S,
        max_entries: usize,
        max_bytes: usize,
    ) -> Self {
        Self {
            root: root.into(),
            default_page: default_page.into(),
            cache: Mutex::new(AssetCache::new(max_entries, max_bytes)),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load the default page
    ///
    /// # Errors
    /// I/O errors, including a missing page
    pub fn default_page(&self) -> Result<Asset> {
        let name = self.default_page.clone();
        self.load(&name)?.ok_or_else(|| {
            BgRemovalError::file_io_error(
                "read default page",
                self.root.join(&name),
                &std::io::Error::from(std::io::ErrorKind::NotFound),
            )
        })
    }

    /// Load a named file from the static directory; `Ok(None)` if it does not exist
    ///
    /// # Errors
    /// I/O errors other than a missing file
    pub fn load(&self, name: &str) -> Result<Option<Asset>> {
        let content_type = content_type_for(name);

        if let Some(bytes) = self.lock_cache().get(name) {
            return Ok(Some(Asset {
                bytes,
                content_type,
            }));
        }

        let path = self.root.join(name);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => Arc::new(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BgRemovalError::file_io_error("read asset", &path, &e)),
        };

        self.lock_cache().insert(name, Arc::clone(&bytes));
        Ok(Some(Asset {
            bytes,
            content_type,
        }))
    }

    /// Number of cached files
    #[must_use]
    pub fn cached_entries(&self) -> usize {
        self.lock_cache().len()
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, AssetCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn assets_in(dir: &TempDir, entries: usize, bytes: usize) -> StaticAssets {
        StaticAssets::new(dir.path(), "index.html", entries, bytes)
    }

    #[test]
    fn test_routing() {
        assert_eq!(route("/"), AssetRoute::DefaultPage);
        assert_eq!(route("/anything/else"), AssetRoute::DefaultPage);
        assert_eq!(route("/index.html"), AssetRoute::DefaultPage);
        assert_eq!(route("/favicon.ico"), AssetRoute::NotFound);
        assert_eq!(route("/style.css"), AssetRoute::Asset("style.css".into()));
        assert_eq!(route("/js/app.js?v=2"), AssetRoute::Asset("app.js".into()));
        assert_eq!(route("/APP.JS"), AssetRoute::Asset("APP.JS".into()));
    }

    #[test]
    fn test_traversal_reduced_to_base_name() {
        assert_eq!(route("/../../etc/passwd"), AssetRoute::DefaultPage);
        assert_eq!(
            route("/../../etc/secret.js"),
            AssetRoute::Asset("secret.js".into())
        );
        assert_eq!(
            route("/..\\..\\windows\\evil.css"),
            AssetRoute::Asset("evil.css".into())
        );
        assert_eq!(route("/static/..css"), AssetRoute::NotFound);
        assert_eq!(route("/.hidden.js"), AssetRoute::NotFound);
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("a.css"), "text/css; charset=UTF-8");
        assert_eq!(
            content_type_for("a.JS"),
            "application/javascript; charset=UTF-8"
        );
        assert_eq!(content_type_for("index.html"), "text/html; charset=UTF-8");
    }

    #[test]
    fn test_load_and_missing() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("index.html"), b"<html></html>").unwrap();
        fs::write(dir.path().join("app.js"), b"console.log(1)").unwrap();
        let assets = assets_in(&dir, 8, 1024);

        let page = assets.default_page().unwrap();
        assert_eq!(page.bytes.as_slice(), b"<html></html>");
        assert_eq!(page.content_type, "text/html; charset=UTF-8");

        let script = assets.load("app.js").unwrap().unwrap();
        assert_eq!(script.bytes.as_slice(), b"console.log(1)");
        assert!(assets.load("missing.css").unwrap().is_none());
        assert_eq!(assets.cached_entries(), 2);
    }

    #[test]
    fn test_missing_default_page_is_error() {
        let dir = TempDir::new().unwrap();
        let assets = assets_in(&dir, 8, 1024);
        assert!(matches!(
            assets.default_page().unwrap_err(),
            BgRemovalError::Io(_)
        ));
    }

    #[test]
    fn test_cache_serves_stale_bytes_until_evicted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.css");
        fs::write(&path, b"v1").unwrap();
        let assets = assets_in(&dir, 8, 1024);

        assert_eq!(assets.load("a.css").unwrap().unwrap().bytes.as_slice(), b"v1");
        fs::write(&path, b"v2").unwrap();
        assert_eq!(assets.load("a.css").unwrap().unwrap().bytes.as_slice(), b"v1");
    }

    #[test]
    fn test_lru_bounds() {
        let mut cache = AssetCache::new(2, 10);
        cache.insert("a", Arc::new(vec![0; 4]));
        cache.insert("b", Arc::new(vec![0; 4]));
        assert!(cache.get("a").is_some());

        // Entry bound evicts the least recently used ("b")
        cache.insert("c", Arc::new(vec![0; 1]));
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert_eq!(cache.len(), 2);

        // Byte bound
        cache.insert("d", Arc::new(vec![0; 8]));
        assert!(cache.total_bytes <= 10);
        assert!(cache.get("d").is_some());

        // Larger than the whole cache: never stored
        cache.insert("huge", Arc::new(vec![0; 11]));
        assert!(cache.get("huge").is_none());

        let mut disabled = AssetCache::new(0, 10);
        disabled.insert("a", Arc::new(vec![0; 1]));
        assert_eq!(disabled.len(), 0);
    }
}
