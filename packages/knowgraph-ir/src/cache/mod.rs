//! Content-addressed store of parsed modules.
//!
//! Entries live on disk under `{cache_dir}/{fp[0..2]}/{fp}.json` and are
//! written atomically (tmp file + rename), so a concurrent reader sees either
//! the old payload or the new one, never torn bytes. A `DashMap` index keeps
//! per-entry metadata; eviction runs under a separate mutex so it cannot race
//! with itself.
//!
//! Two eviction policies, applied independently:
//! 1. size cap: LRU entries are removed until usage drops to 90% of the cap;
//! 2. age cap: `cleanup(max_age)` removes entries created before the cutoff.

mod fingerprint;

pub use fingerprint::{content_fingerprint, fingerprint_with_version};

use crate::errors::Result;
use crate::ir::ParsedModule;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const EVICTION_TARGET_RATIO: f64 = 0.9;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub cache_dir: PathBuf,
    /// Total payload byte cap. Default 512 MiB.
    pub max_bytes: u64,
}

impl CacheConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            max_bytes: 512 * 1024 * 1024,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

struct EntryMeta {
    created_at: i64,
    last_used_at: AtomicI64,
    size_bytes: u64,
}

/// Age distribution of cache entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeHistogram {
    pub under_hour: usize,
    pub under_day: usize,
    pub under_week: usize,
    pub older: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub age_histogram: AgeHistogram,
}

/// Content-addressed, bounded store of parsed results.
pub struct ParseCache {
    config: CacheConfig,
    index: DashMap<String, EntryMeta>,
    total_bytes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    eviction: Mutex<()>,
}

impl ParseCache {
    /// Open (or create) a cache rooted at `config.cache_dir`, rebuilding the
    /// index from whatever entries already exist on disk.
    pub fn open(config: CacheConfig) -> Result<Self> {
        fs::create_dir_all(&config.cache_dir)?;
        let cache = Self {
            config,
            index: DashMap::new(),
            total_bytes: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            eviction: Mutex::new(()),
        };
        cache.load_index()?;
        Ok(cache)
    }

    fn load_index(&self) -> Result<()> {
        for shard in fs::read_dir(&self.config.cache_dir)? {
            let shard = shard?;
            if !shard.path().is_dir() {
                continue;
            }
            for entry in fs::read_dir(shard.path())? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Some(fp) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let meta = entry.metadata()?;
                let created = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or_else(now_secs);
                self.total_bytes.fetch_add(meta.len(), Ordering::Relaxed);
                self.index.insert(
                    fp.to_string(),
                    EntryMeta {
                        created_at: created,
                        last_used_at: AtomicI64::new(created),
                        size_bytes: meta.len(),
                    },
                );
            }
        }
        debug!(entries = self.index.len(), "cache index loaded");
        Ok(())
    }

    fn entry_path(&self, fingerprint: &str) -> PathBuf {
        let prefix = &fingerprint[..fingerprint.len().min(2)];
        self.config
            .cache_dir
            .join(prefix)
            .join(format!("{fingerprint}.json"))
    }

    /// Look up a parsed module by fingerprint.
    pub fn get(&self, fingerprint: &str) -> Option<ParsedModule> {
        let Some(meta) = self.index.get(fingerprint) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        meta.last_used_at.store(now_secs(), Ordering::Relaxed);
        drop(meta);

        let path = self.entry_path(fingerprint);
        match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(module) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    Some(module)
                }
                Err(e) => {
                    warn!(fingerprint, error = %e, "corrupt cache entry, dropping");
                    self.remove_entry(fingerprint);
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
            Err(_) => {
                // Evicted or removed out from under us.
                self.remove_entry(fingerprint);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a parsed module. A second write with the same fingerprint is a
    /// no-op on the payload; only `last_used_at` is refreshed.
    pub fn put(&self, fingerprint: &str, module: &ParsedModule) -> Result<()> {
        if let Some(meta) = self.index.get(fingerprint) {
            meta.last_used_at.store(now_secs(), Ordering::Relaxed);
            return Ok(());
        }

        let bytes = serde_json::to_vec(module)?;
        let path = self.entry_path(fingerprint);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        let now = now_secs();
        let size = bytes.len() as u64;
        self.index.insert(
            fingerprint.to_string(),
            EntryMeta {
                created_at: now,
                last_used_at: AtomicI64::new(now),
                size_bytes: size,
            },
        );
        let total = self.total_bytes.fetch_add(size, Ordering::Relaxed) + size;

        if total > self.config.max_bytes {
            self.evict_lru();
        }
        Ok(())
    }

    fn remove_entry(&self, fingerprint: &str) {
        if let Some((_, meta)) = self.index.remove(fingerprint) {
            self.total_bytes
                .fetch_sub(meta.size_bytes, Ordering::Relaxed);
            let _ = fs::remove_file(self.entry_path(fingerprint));
        }
    }

    /// Evict least-recently-used entries until usage is at 90% of the cap.
    fn evict_lru(&self) {
        let _guard = self.eviction.lock();
        let target = (self.config.max_bytes as f64 * EVICTION_TARGET_RATIO) as u64;
        if self.total_bytes.load(Ordering::Relaxed) <= target {
            return;
        }

        let mut entries: Vec<(String, i64)> = self
            .index
            .iter()
            .map(|e| (e.key().clone(), e.value().last_used_at.load(Ordering::Relaxed)))
            .collect();
        entries.sort_by_key(|(_, used)| *used);

        let mut removed = 0usize;
        for (fp, _) in entries {
            if self.total_bytes.load(Ordering::Relaxed) <= target {
                break;
            }
            self.remove_entry(&fp);
            removed += 1;
        }
        debug!(removed, "size-cap eviction complete");
    }

    /// Remove entries created more than `max_age` ago. Returns the number
    /// removed.
    pub fn cleanup(&self, max_age: std::time::Duration) -> usize {
        let _guard = self.eviction.lock();
        let cutoff = now_secs() - max_age.as_secs() as i64;
        let stale: Vec<String> = self
            .index
            .iter()
            .filter(|e| e.value().created_at < cutoff)
            .map(|e| e.key().clone())
            .collect();
        let count = stale.len();
        for fp in stale {
            self.remove_entry(&fp);
        }
        count
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let now = now_secs();

        let mut histogram = AgeHistogram::default();
        for entry in self.index.iter() {
            let age = now - entry.value().created_at;
            if age < 3600 {
                histogram.under_hour += 1;
            } else if age < 86_400 {
                histogram.under_day += 1;
            } else if age < 7 * 86_400 {
                histogram.under_week += 1;
            } else {
                histogram.older += 1;
            }
        }

        CacheStats {
            entries: self.index.len(),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            age_histogram: histogram,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl std::fmt::Debug for ParseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParseCache")
            .field("cache_dir", &self.config.cache_dir)
            .field("entries", &self.index.len())
            .finish()
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// Cache failures must never fail extraction; helper for best-effort writes.
pub(crate) fn put_best_effort(cache: &ParseCache, fingerprint: &str, module: &ParsedModule) {
    if let Err(e) = cache.put(fingerprint, module) {
        warn!(fingerprint, error = %e, "cache write failed");
    }
}
