//! Client-local cache of ciphertexts this client is entitled to.
//!
//! An entry exists because this client created the secret or was its first
//! reader. Entries never go stale: the server copy is gone after the first
//! consume, so there is nothing to revalidate against. The cache is private to
//! one device/profile and is never synced anywhere.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const CACHE_FILE_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("no data directory available for the default cache location")]
    NoDataDir,
}

/// Durable key-value substrate under [`SecretCache`].
///
/// Implementations must make a completed `set` visible to every later `get`,
/// including after a restart when the backend is durable.
pub trait CacheBackend: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<String>, CacheError>;

    fn set(&self, id: &str, ciphertext: &str) -> Result<(), CacheError>;

    fn has(&self, id: &str) -> Result<bool, CacheError> {
        Ok(self.get(id)?.is_some())
    }

    fn clear(&self) -> Result<usize, CacheError>;
}

/// Non-durable backend, for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for MemoryBackend {
    fn get(&self, id: &str) -> Result<Option<String>, CacheError> {
        Ok(lock(&self.entries).get(id).cloned())
    }

    fn set(&self, id: &str, ciphertext: &str) -> Result<(), CacheError> {
        lock(&self.entries).insert(id.to_string(), ciphertext.to_string());
        Ok(())
    }

    fn has(&self, id: &str) -> Result<bool, CacheError> {
        Ok(lock(&self.entries).contains_key(id))
    }

    fn clear(&self) -> Result<usize, CacheError> {
        let mut entries = lock(&self.entries);
        let count = entries.len();
        entries.clear();
        Ok(count)
    }
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: u8,
    entries: HashMap<String, String>,
}

/// JSON file backend. The whole map is rewritten on every mutation via a
/// temp file and rename, so a crash never leaves a half-written cache.
///
/// Several processes may share one file. Mutations hold an exclusive lock on
/// a sibling `.lock` file and merge with what is on disk before writing.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileBackend {
    /// Open the cache at `path`, creating nothing until the first write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        let entries = read_cache_file(&path)?;

        debug!("Opened cache at {} with {} entries", path.display(), entries.len());

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Open the cache at the platform data directory (`<data>/ember/cache.json`).
    pub fn open_default() -> Result<Self, CacheError> {
        Self::open(default_cache_path()?)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("json.lock")
    }

    /// Open the lock file and take the lock. Released when the file is dropped.
    fn lock_file(&self, exclusive: bool) -> Result<fs::File, CacheError> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;

        if exclusive {
            FileExt::lock_exclusive(&file)?;
        } else {
            FileExt::lock_shared(&file)?;
        }
        Ok(file)
    }

    /// Pick up entries written by other processes since this one last looked.
    fn reload(&self, entries: &mut HashMap<String, String>) -> Result<(), CacheError> {
        let _lock = self.lock_file(false)?;
        for (id, ciphertext) in read_cache_file(&self.path)? {
            entries.entry(id).or_insert(ciphertext);
        }
        Ok(())
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), CacheError> {
        let file = CacheFile {
            version: CACHE_FILE_VERSION,
            entries: entries.clone(),
        };
        let json = serde_json::to_vec(&file).map_err(|e| CacheError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut tmp = fs::File::create(&tmp_path)?;
            restrict_permissions(&tmp_path)?;
            tmp.write_all(&json)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        Ok(())
    }
}

impl CacheBackend for FileBackend {
    fn get(&self, id: &str) -> Result<Option<String>, CacheError> {
        let mut entries = lock(&self.entries);
        if let Some(ciphertext) = entries.get(id) {
            return Ok(Some(ciphertext.clone()));
        }

        self.reload(&mut entries)?;
        Ok(entries.get(id).cloned())
    }

    fn set(&self, id: &str, ciphertext: &str) -> Result<(), CacheError> {
        let mut entries = lock(&self.entries);
        let _lock = self.lock_file(true)?;

        let mut merged = read_cache_file(&self.path)?;
        merged.insert(id.to_string(), ciphertext.to_string());
        self.persist(&merged)?;

        *entries = merged;
        Ok(())
    }

    fn clear(&self) -> Result<usize, CacheError> {
        let mut entries = lock(&self.entries);
        let _lock = self.lock_file(true)?;

        let mut on_disk = read_cache_file(&self.path)?;
        on_disk.extend(entries.drain());
        let count = on_disk.len();

        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(count)
    }
}

fn read_cache_file(path: &Path) -> Result<HashMap<String, String>, CacheError> {
    match fs::read(path) {
        Ok(bytes) => parse_cache_file(path, &bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(e.into()),
    }
}

fn parse_cache_file(
    path: &Path,
    bytes: &[u8],
) -> Result<HashMap<String, String>, CacheError> {
    let file: CacheFile = serde_json::from_slice(bytes).map_err(|e| CacheError::Corrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if file.version != CACHE_FILE_VERSION {
        return Err(CacheError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("unsupported cache version {}", file.version),
        });
    }

    Ok(file.entries)
}

/// `<data dir>/ember/cache.json`
pub fn default_cache_path() -> Result<PathBuf, CacheError> {
    dirs::data_dir()
        .map(|dir| dir.join("ember").join("cache.json"))
        .ok_or(CacheError::NoDataDir)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), CacheError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), CacheError> {
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Permanent-freshness cache service injected into the lifecycle client.
#[derive(Debug)]
pub struct SecretCache<B> {
    backend: B,
}

impl<B: CacheBackend> SecretCache<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn has(&self, id: &str) -> Result<bool, CacheError> {
        self.backend.has(id)
    }

    pub fn get(&self, id: &str) -> Result<Option<String>, CacheError> {
        self.backend.get(id)
    }

    /// Store `ciphertext` for `id`. An existing entry wins and is left in place;
    /// returns whether a new entry was written.
    pub fn set(&self, id: &str, ciphertext: &str) -> Result<bool, CacheError> {
        if let Some(existing) = self.backend.get(id)? {
            if existing != ciphertext {
                warn!("Ignoring differing ciphertext for cached secret {id}");
            }
            return Ok(false);
        }

        self.backend.set(id, ciphertext)?;
        debug!("Cached secret {id}");
        Ok(true)
    }

    /// Drop every entry. Secrets whose server copy is gone become unreadable here.
    pub fn clear(&self) -> Result<usize, CacheError> {
        self.backend.clear()
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }
}
