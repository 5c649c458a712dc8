//! Content-addressed cache for rendered output
//!
//! Cache key: (language, content hash, output extension)
//! Cache value: raw output bytes
//! Storage: {cache_dir}/{sanitized_lang}/{hash}.{ext}
//!
//! An entry's age is its file modification time. Expired entries read as
//! misses and stay on disk until [`Cache::sweep`] removes them.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

/// Hex length of the content hash (128 bits).
const HASH_HEX_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to create cache directory {}", path.display())]
    CreateDir { source: io::Error, path: PathBuf },

    #[error("failed to write cache file {}", path.display())]
    Write { source: io::Error, path: PathBuf },

    #[error("failed to scan cache directory {}", path.display())]
    Scan { source: io::Error, path: PathBuf },
}

/// On-disk output cache with time-based expiry.
#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
    duration: Duration,
}

impl Cache {
    /// Create a cache rooted at `dir` whose entries live for `duration`.
    ///
    /// A zero duration disables the cache: nothing is read or written.
    pub fn new(dir: PathBuf, duration: Duration) -> Self {
        Self { dir, duration }
    }

    pub fn is_enabled(&self) -> bool {
        !self.duration.is_zero()
    }

    /// Compute the content hash used in cache keys.
    pub fn hash_content(input: &str) -> String {
        let mut hex = blake3::hash(input.as_bytes()).to_hex().to_string();
        hex.truncate(HASH_HEX_LEN);
        hex
    }

    /// Path of the entry for (`lang`, `input`, `ext`).
    pub fn entry_path(&self, lang: &str, input: &str, ext: &str) -> PathBuf {
        let hash = Self::hash_content(input);
        self.dir
            .join(sanitize_component(lang))
            .join(format!("{hash}.{ext}"))
    }

    /// Return the cached output if present and not expired.
    ///
    /// Read failures of any kind are treated as a miss.
    pub fn get(&self, lang: &str, input: &str, ext: &str) -> Option<Vec<u8>> {
        if !self.is_enabled() {
            return None;
        }

        let path = self.entry_path(lang, input, ext);
        let modified = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
        if self.is_expired(modified, SystemTime::now()) {
            log::debug!("Cache entry expired: {}", path.display());
            return None;
        }

        match fs::read(&path) {
            Ok(data) => {
                log::debug!("Cache hit: {}", path.display());
                Some(data)
            }
            Err(e) => {
                log::debug!("Cache read failed for {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Store `data` for (`lang`, `input`, `ext`).
    ///
    /// The bytes land in a temporary file next to the entry and are renamed
    /// into place, so readers never see a partial entry.
    pub fn set(&self, lang: &str, input: &str, ext: &str, data: &[u8]) -> Result<(), CacheError> {
        if !self.is_enabled() {
            return Ok(());
        }

        let path = self.entry_path(lang, input, ext);
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        create_private_dir(parent).map_err(|source| CacheError::CreateDir {
            source,
            path: parent.to_path_buf(),
        })?;

        let write_err = |source: io::Error| CacheError::Write {
            source,
            path: path.clone(),
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(parent)
            .map_err(write_err)?;
        tmp.write_all(data).map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;

        log::debug!("Cached {} bytes at {}", data.len(), path.display());
        Ok(())
    }

    /// Remove every entry older than the cache duration.
    ///
    /// Per-entry failures are ignored; only a cache directory that exists
    /// but cannot be scanned is an error.
    pub fn sweep(&self) -> Result<usize, CacheError> {
        if !self.is_enabled() {
            return Ok(0);
        }

        match fs::read_dir(&self.dir) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(CacheError::Scan {
                    source,
                    path: self.dir.clone(),
                });
            }
        }

        let now = SystemTime::now();
        let mut removed = 0;
        for entry in WalkDir::new(&self.dir).min_depth(1).into_iter().flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(modified) = entry.metadata().map_err(io::Error::from).and_then(|m| m.modified()) else {
                continue;
            };
            if self.is_expired(modified, now) {
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) => log::debug!("Failed to remove {}: {}", entry.path().display(), e),
                }
            }
        }

        log::debug!("Swept {removed} expired cache entries from {}", self.dir.display());
        Ok(removed)
    }

    fn is_expired(&self, modified: SystemTime, now: SystemTime) -> bool {
        // Timestamps in the future count as fresh.
        now.duration_since(modified).is_ok_and(|age| age > self.duration)
    }
}

/// Make `value` safe to use as a single path component.
///
/// Separators, control characters and characters reserved on Windows are
/// replaced with `_`; `.`, `..` and the empty string become `_`.
pub fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| match c {
            '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(path)
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    fn set_age(path: &Path, age: Duration) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn test_cache_disabled() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::new(temp_dir.path().join("cache"), Duration::ZERO);

        cache.set("go", "package main", "png", b"data").unwrap();
        assert!(cache.get("go", "package main", "png").is_none());

        // Disabled cache never touches the filesystem
        assert!(!temp_dir.path().join("cache").exists());
        assert_eq!(cache.sweep().unwrap(), 0);
    }

    #[test]
    fn test_set_then_get() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::new(temp_dir.path().to_path_buf(), HOUR);

        let data = [0x89, b'P', b'N', b'G', 0x00, 0xff];
        cache.set("mermaid", "graph TD; A-->B", "png", &data).unwrap();

        assert_eq!(cache.get("mermaid", "graph TD; A-->B", "png"), Some(data.to_vec()));
    }

    #[test]
    fn test_cache_miss() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::new(temp_dir.path().to_path_buf(), HOUR);
        assert!(cache.get("go", "x", "png").is_none());
    }

    #[test]
    fn test_key_components_are_independent() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::new(temp_dir.path().to_path_buf(), HOUR);
        cache.set("go", "input", "png", b"go-png").unwrap();

        assert!(cache.get("go", "other input", "png").is_none());
        assert!(cache.get("rust", "input", "png").is_none());
        assert!(cache.get("go", "input", "svg").is_none());
        assert_eq!(cache.get("go", "input", "png").as_deref(), Some(&b"go-png"[..]));
    }

    #[test]
    fn test_overwrite_same_key() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::new(temp_dir.path().to_path_buf(), HOUR);
        cache.set("go", "input", "png", b"first").unwrap();
        cache.set("go", "input", "png", b"second").unwrap();
        assert_eq!(cache.get("go", "input", "png").as_deref(), Some(&b"second"[..]));

        // No temporary files left behind
        let files: Vec<_> = fs::read_dir(temp_dir.path().join("go")).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_expired_entry_is_miss_but_kept() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::new(temp_dir.path().to_path_buf(), HOUR);
        cache.set("go", "input", "png", b"old").unwrap();

        let path = cache.entry_path("go", "input", "png");
        set_age(&path, HOUR * 2);

        assert!(cache.get("go", "input", "png").is_none());
        assert!(path.exists());
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::new(temp_dir.path().to_path_buf(), HOUR);
        cache.set("go", "old", "png", b"old").unwrap();
        cache.set("rust", "fresh", "svg", b"fresh").unwrap();

        let old = cache.entry_path("go", "old", "png");
        let fresh = cache.entry_path("rust", "fresh", "svg");
        set_age(&old, HOUR * 3);

        assert_eq!(cache.sweep().unwrap(), 1);
        assert!(!old.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn test_sweep_missing_dir_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::new(temp_dir.path().join("never-created"), HOUR);
        assert_eq!(cache.sweep().unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_sweep_skips_entries_it_cannot_remove() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::new(temp_dir.path().to_path_buf(), HOUR);
        cache.set("go", "locked", "png", b"locked").unwrap();
        cache.set("rust", "old", "png", b"old").unwrap();
        let locked = cache.entry_path("go", "locked", "png");
        let old = cache.entry_path("rust", "old", "png");
        set_age(&locked, HOUR * 2);
        set_age(&old, HOUR * 2);

        let locked_dir = temp_dir.path().join("go");
        fs::set_permissions(&locked_dir, fs::Permissions::from_mode(0o500)).unwrap();
        let result = cache.sweep();
        let locked_survived = locked.exists();
        fs::set_permissions(&locked_dir, fs::Permissions::from_mode(0o700)).unwrap();

        // Root ignores directory permissions, so the locked entry may go too
        let removed = result.unwrap();
        assert_eq!(removed, if locked_survived { 1 } else { 2 });
        assert!(!old.exists());
    }

    #[test]
    fn test_concurrent_writers_same_key() {
        const LEN: usize = 256 * 1024;
        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::new(temp_dir.path().to_path_buf(), HOUR);

        let writers: Vec<_> = (0..8u8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.set("go", "same input", "png", &vec![i; LEN]))
            })
            .collect();
        for writer in writers {
            writer.join().unwrap().unwrap();
        }

        let data = cache.get("go", "same input", "png").unwrap();
        assert_eq!(data.len(), LEN);
        assert!(data.iter().all(|&b| b == data[0]), "entry mixes bytes from different writers");

        let names: Vec<_> = fs::read_dir(temp_dir.path().join("go"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1, "{names:?}");
    }

    #[test]
    fn test_hash_content() {
        let hash1 = Cache::hash_content("# Test");
        let hash2 = Cache::hash_content("# Test");
        let hash3 = Cache::hash_content("# Different");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), HASH_HEX_LEN);
        assert!(hash1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_is_stable_across_runs() {
        // blake3("") truncated to 128 bits
        assert_eq!(Cache::hash_content(""), "af1349b9f5f9a1a6a0404dea36dcc949");
    }

    #[test]
    fn test_entry_path_layout() {
        let cache = Cache::new(PathBuf::from("/cache"), HOUR);
        let path = cache.entry_path("c++/cli", "x", "svg");
        let hash = Cache::hash_content("x");
        assert_eq!(path, PathBuf::from(format!("/cache/c++_cli/{hash}.svg")));
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("python"), "python");
        assert_eq!(sanitize_component("c++"), "c++");
        assert_eq!(sanitize_component("../etc"), ".._etc");
        assert_eq!(sanitize_component("a\\b:c*d?"), "a_b_c_d_");
        assert_eq!(sanitize_component("tab\there"), "tab_here");
        assert_eq!(sanitize_component(""), "_");
        assert_eq!(sanitize_component("."), "_");
        assert_eq!(sanitize_component(".."), "_");
    }

    #[cfg(unix)]
    #[test]
    fn test_cache_dir_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let cache = Cache::new(temp_dir.path().join("cache"), HOUR);
        cache.set("go", "input", "png", b"x").unwrap();

        let dir_mode = fs::metadata(temp_dir.path().join("cache/go")).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);
        let file_mode = fs::metadata(cache.entry_path("go", "input", "png"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o777, 0o600);
    }
}
