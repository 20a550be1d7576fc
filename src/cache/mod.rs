// src/cache/mod.rs
//! Signed, TTL-bound, file-backed cache.
//!
//! One JSON file per key under the cache directory:
//!
//! ```text
//! {"data": <payload>, "created_at": <unix ms>, "expires_at": <unix ms>, "signature": "<hex>"}
//! ```
//!
//! `signature` is HMAC-SHA256 over the exact `data` bytes with the process
//! secret. Anything that does not verify (forged, truncated, expired,
//! unreadable) is a miss and its file is removed. Caching is an
//! optimization only, so no error from this module reaches callers.
//!
//! Keys: `[A-Za-z0-9_-]` is stored verbatim, every other byte is escaped
//! as `~xx`, so distinct keys never share a file. Very long keys are
//! stored under a SHA-256 name. On case-insensitive filesystems, keys
//! that differ only in case do collide; stick to one case.

mod cleanup;

pub use cleanup::{spawn_cleanup_task, CleanupHandle, DEFAULT_CLEANUP_INTERVAL};

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use hmac::{Hmac, Mac};
use metrics::counter;
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use sha2::{Digest, Sha256};

use crate::error::CacheError;

type HmacSha256 = Hmac<Sha256>;

pub const ENV_CACHE_SECRET: &str = "HARVEST_CACHE_SECRET";

const INSECURE_SECRET_LABEL: &str = "civic-events-harvester:insecure-default-cache-secret";
const MAX_NAME_LEN: usize = 120;
const ENTRY_EXT: &str = "json";
const STALE_TMP_AFTER: Duration = Duration::from_secs(3600);

#[derive(Serialize)]
struct EntryOut<'a> {
    data: &'a RawValue,
    created_at: i64,
    expires_at: i64,
    signature: String,
}

#[derive(Deserialize)]
struct EntryIn {
    data: Box<RawValue>,
    #[allow(dead_code)]
    created_at: i64,
    expires_at: i64,
    signature: String,
}

/// Just enough of an entry to decide expiry during a sweep.
#[derive(Deserialize)]
struct EntryHeader {
    expires_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entry files currently on disk (valid or not yet swept).
    pub size: usize,
    /// `hits / (hits + misses)`, 0.0 before any lookup.
    pub hit_rate: f64,
}

pub struct PersistentCache {
    dir: PathBuf,
    secret: Vec<u8>,
    hits: AtomicU64,
    misses: AtomicU64,
    tmp_seq: AtomicU64,
}

impl std::fmt::Debug for PersistentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentCache")
            .field("dir", &self.dir)
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl PersistentCache {
    /// Open (creating if needed) a cache directory signed with `secret`.
    pub fn open(dir: impl Into<PathBuf>, secret: impl AsRef<[u8]>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            secret: secret.as_ref().to_vec(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            tmp_seq: AtomicU64::new(0),
        })
    }

    /// Open with the secret from `$HARVEST_CACHE_SECRET` (see [`secret_from_env`]).
    pub fn open_with_env_secret(dir: impl Into<PathBuf>) -> io::Result<Self> {
        Self::open(dir, secret_from_env())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fresh, correctly signed value for `key`, or `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.path_for(key);
        let outcome = self
            .load_verified(&path)
            .and_then(|e| serde_json::from_str::<T>(e.data.get()).map_err(CacheError::from));

        match outcome {
            Ok(v) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                counter!("cache_hits_total").increment(1);
                tracing::debug!(target: "cache", key, "cache hit");
                Some(v)
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                counter!("cache_misses_total").increment(1);
                self.discard(key, &path, &e);
                None
            }
        }
    }

    /// Store `data` for `ttl`. Write failures are logged and swallowed.
    pub fn set<T: Serialize>(&self, key: &str, data: &T, ttl: Duration) {
        if let Err(e) = self.try_set(key, data, ttl) {
            tracing::warn!(target: "cache", key, error = %e, "cache write failed; continuing uncached");
        }
    }

    /// Same validity rules as [`get`](Self::get), without touching hit/miss counters.
    pub fn has(&self, key: &str) -> bool {
        let path = self.path_for(key);
        match self.load_verified(&path) {
            Ok(_) => true,
            Err(e) => {
                self.discard(key, &path, &e);
                false
            }
        }
    }

    /// Remove `key`. Returns whether a file was actually removed.
    pub fn delete(&self, key: &str) -> bool {
        remove_quiet(&self.path_for(key))
    }

    /// Sweep expired and unparseable entries (plus orphaned temp files).
    /// Returns the number of entries removed.
    pub fn cleanup(&self) -> usize {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(target: "cache", dir = %self.dir.display(), error = %e, "cleanup skipped");
                return 0;
            }
        };

        let now = Utc::now().timestamp_millis();
        let mut removed = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            if is_tmp_file(&path) {
                if is_older_than(&path, STALE_TMP_AFTER) {
                    remove_quiet(&path);
                }
                continue;
            }
            if path.extension().and_then(|s| s.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            // The file may vanish between listing and reading; that is fine.
            let raw = match fs::read(&path) {
                Ok(raw) => raw,
                Err(_) => continue,
            };
            let expired = match serde_json::from_slice::<EntryHeader>(&raw) {
                Ok(h) => now > h.expires_at,
                Err(_) => true,
            };
            if expired && remove_quiet(&path) {
                removed += 1;
            }
        }

        if removed > 0 {
            counter!("cache_cleanup_removed_total").increment(removed as u64);
            tracing::debug!(target: "cache", removed, "cache cleanup");
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            size: self.entry_count(),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    fn entry_count(&self) -> usize {
        fs::read_dir(&self.dir)
            .map(|rd| {
                rd.flatten()
                    .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some(ENTRY_EXT))
                    .count()
            })
            .unwrap_or(0)
    }

    fn try_set<T: Serialize>(&self, key: &str, data: &T, ttl: Duration) -> Result<(), CacheError> {
        let payload = serde_json::value::to_raw_value(data)?;
        let now = Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let entry = EntryOut {
            data: &*payload,
            created_at: now,
            expires_at: now.saturating_add(ttl_ms),
            signature: self.sign(payload.get().as_bytes()),
        };
        let bytes = serde_json::to_vec(&entry)?;

        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = self.dir.join(format!(
            ".{}.{}.{}.tmp",
            storage_name(key),
            std::process::id(),
            self.tmp_seq.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp, bytes)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            remove_quiet(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn load_verified(&self, path: &Path) -> Result<EntryIn, CacheError> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(CacheError::NotFound),
            Err(e) => return Err(e.into()),
        };
        let entry: EntryIn = serde_json::from_slice(&raw)?;
        if Utc::now().timestamp_millis() > entry.expires_at {
            return Err(CacheError::Expired);
        }
        self.verify(entry.data.get().as_bytes(), &entry.signature)?;
        Ok(entry)
    }

    fn sign(&self, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts keys of any length");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    fn verify(&self, payload: &[u8], signature_hex: &str) -> Result<(), CacheError> {
        let provided = hex::decode(signature_hex).map_err(|_| CacheError::Integrity)?;
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|_| CacheError::Integrity)?;
        mac.update(payload);
        // Constant-time comparison.
        mac.verify_slice(&provided).map_err(|_| CacheError::Integrity)
    }

    fn discard(&self, key: &str, path: &Path, why: &CacheError) {
        match why {
            CacheError::NotFound => {
                tracing::debug!(target: "cache", key, "cache miss");
                return;
            }
            CacheError::Integrity => {
                counter!("cache_integrity_failures_total").increment(1);
                tracing::warn!(target: "cache", key, "cache entry failed signature check; removing");
            }
            other => {
                tracing::debug!(target: "cache", key, reason = %other, "dropping cache entry");
            }
        }
        remove_quiet(path);
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", storage_name(key), ENTRY_EXT))
    }
}

/// Filesystem-safe, injective name for a cache key.
pub(crate) fn storage_name(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(b as char);
        } else {
            let _ = write!(out, "~{b:02x}");
        }
    }
    if out.is_empty() {
        // Escapes are always `~xx`, so a lone `~` cannot clash.
        out.push('~');
    }
    if out.len() > MAX_NAME_LEN {
        // `~~` never appears in escaped output.
        let digest = Sha256::digest(key.as_bytes());
        return format!("~~{}", hex::encode(digest));
    }
    out
}

/// Secret from `$HARVEST_CACHE_SECRET`. When unset, warns once and falls
/// back to a fixed value derived from a public label. That default keeps
/// the process running but offers no protection against tampering.
pub fn secret_from_env() -> Vec<u8> {
    match std::env::var(ENV_CACHE_SECRET) {
        Ok(s) if !s.trim().is_empty() => s.trim().as_bytes().to_vec(),
        _ => {
            static WARNED: OnceCell<()> = OnceCell::new();
            WARNED.get_or_init(|| {
                tracing::warn!(
                    target: "cache",
                    env = ENV_CACHE_SECRET,
                    "cache secret not configured; using insecure built-in default"
                );
            });
            Sha256::digest(INSECURE_SECRET_LABEL.as_bytes()).to_vec()
        }
    }
}

fn remove_quiet(path: &Path) -> bool {
    fs::remove_file(path).is_ok()
}

fn is_tmp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(".tmp"))
}

fn is_older_than(path: &Path, age: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| SystemTime::now().duration_since(t).ok())
        .is_some_and(|d| d > age)
}
