// src/cache.rs - TTL file cache keyed by opaque labels
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{ScanError, ScanResult};

/// Disk-backed cache for fetched artifacts (TLD lists, search pages,
/// API responses). Labels are arbitrary strings; each maps to one file
/// named by the label's SHA-256 so unsafe characters never reach the
/// filesystem.
#[derive(Debug, Clone)]
pub struct Cache {
    root: PathBuf,
}

impl Cache {
    pub fn new(root: impl Into<PathBuf>) -> ScanResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| ScanError::File {
            path: root.clone(),
            message: format!("could not create cache directory: {}", e),
        })?;
        Ok(Cache { root })
    }

    /// Default per-user cache location.
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("skopos")
    }

    fn path_for(&self, label: &str) -> PathBuf {
        let digest = Sha256::digest(label.as_bytes());
        self.root.join(format!("{:x}", digest))
    }

    /// Store `data` under `label`, replacing any previous entry. The write
    /// goes through a temp file in the same directory so readers never see
    /// a partial entry.
    pub fn put(&self, label: &str, data: &[u8]) -> ScanResult<()> {
        let path = self.path_for(label);
        let mut tmp = NamedTempFile::new_in(&self.root).map_err(|e| ScanError::File {
            path: self.root.clone(),
            message: format!("could not create temp file: {}", e),
        })?;
        std::io::Write::write_all(&mut tmp, data).map_err(|e| ScanError::File {
            path: path.clone(),
            message: format!("could not write cache entry: {}", e),
        })?;
        tmp.persist(&path).map_err(|e| ScanError::File {
            path: path.clone(),
            message: format!("could not persist cache entry: {}", e),
        })?;
        debug!(label, path = %path.display(), "cached entry");
        Ok(())
    }

    /// Fetch the raw entry for `label` if it exists and was written within
    /// the last `max_age_hours` hours. Payloads are opaque bytes; certs and
    /// keys land here too. An age limit of zero never hits, so callers can
    /// force a refresh with the same code path.
    pub fn get(&self, label: &str, max_age_hours: u64) -> Option<Vec<u8>> {
        if max_age_hours == 0 {
            return None;
        }
        let path = self.path_for(label);
        let meta = std::fs::metadata(&path).ok()?;
        let modified = meta.modified().ok()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age > Duration::from_secs(max_age_hours * 3600) {
            return None;
        }
        match std::fs::read(&path) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(label, "could not read cache entry: {}", e);
                None
            }
        }
    }

    /// Text view of [`Cache::get`] for entries known to be UTF-8.
    pub fn get_str(&self, label: &str, max_age_hours: u64) -> Option<String> {
        let data = self.get(label, max_age_hours)?;
        match String::from_utf8(data) {
            Ok(text) => Some(text),
            Err(_) => {
                warn!(label, "cache entry is not valid UTF-8");
                None
            }
        }
    }

    /// Remove the entry for `label` if present.
    pub fn flush(&self, label: &str) {
        let path = self.path_for(label);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(label, "could not remove cache entry: {}", e);
            }
        }
    }

    /// Remove every entry under the cache root.
    pub fn flush_all(&self) -> ScanResult<()> {
        for entry in std::fs::read_dir(&self.root).map_err(|e| ScanError::File {
            path: self.root.clone(),
            message: format!("could not list cache directory: {}", e),
        })? {
            let entry = entry.map_err(|e| ScanError::File {
                path: self.root.clone(),
                message: format!("could not list cache directory: {}", e),
            })?;
            if entry.path().is_file() {
                let _ = std::fs::remove_file(entry.path());
            }
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_put_then_get() {
        let dir = tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        cache.put("sf.tldlist", b"com\nnet\n").unwrap();
        assert_eq!(cache.get_str("sf.tldlist", 24), Some("com\nnet\n".to_string()));
    }

    #[test]
    fn test_zero_age_always_misses() {
        let dir = tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        cache.put("label", b"data").unwrap();
        assert_eq!(cache.get("label", 0), None);
        assert_eq!(cache.get_str("label", 1), Some("data".to_string()));
    }

    #[test]
    fn test_binary_payload_round_trips() {
        let dir = tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        // DER-style payload with bytes no UTF-8 string can hold.
        let der: Vec<u8> = vec![0x30, 0x82, 0x01, 0xff, 0x00, 0xfe, 0x80];
        cache.put("host.example.com.der", &der).unwrap();
        assert_eq!(cache.get("host.example.com.der", 24), Some(der));
        assert_eq!(cache.get_str("host.example.com.der", 24), None);
    }

    #[test]
    fn test_missing_label() {
        let dir = tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        assert_eq!(cache.get("nope", 24), None);
    }

    #[test]
    fn test_labels_with_unsafe_characters() {
        let dir = tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        let label = "https://example.com/a/b?q=1&r=2";
        cache.put(label, b"body").unwrap();
        assert_eq!(cache.get_str(label, 24), Some("body".to_string()));
    }

    #[test]
    fn test_overwrite_replaces() {
        let dir = tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        cache.put("k", b"one").unwrap();
        cache.put("k", b"two").unwrap();
        assert_eq!(cache.get_str("k", 24), Some("two".to_string()));
    }

    #[test]
    fn test_flush() {
        let dir = tempdir().unwrap();
        let cache = Cache::new(dir.path()).unwrap();
        cache.put("a", b"1").unwrap();
        cache.put("b", b"2").unwrap();
        cache.flush("a");
        assert_eq!(cache.get("a", 24), None);
        assert_eq!(cache.get_str("b", 24), Some("2".to_string()));
        cache.flush_all().unwrap();
        assert_eq!(cache.get("b", 24), None);
    }
}
