//! Per-run result cache: BLAKE3 fingerprint keys, TTL expiry, best-effort.
//!
//! The cache memoizes a strategy's raw output before quality scoring and
//! metrics. It is best-effort by contract: callers treat any `Cache` error
//! as a miss and keep going.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::error::{EngineError, EngineResult};
use crate::protocol::{Protocol, StrategyOutput};

/// Compute the cache key for one (prompt, document, protocol, config) tuple.
///
/// Fields are length-prefixed before hashing so no two distinct tuples can
/// produce the same byte stream. `config_json` must be the serialization of
/// the *resolved* config, which makes the key independent of option-map
/// ordering and of keys the protocol does not recognize.
pub fn fingerprint(prompt: &str, document: &str, protocol: Protocol, config_json: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    for field in [prompt, document, protocol.as_str(), config_json] {
        hasher.update(&(field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

struct CacheEntry {
    value: StrategyOutput,
    expires_at: Instant,
}

/// Process-wide keyed store for strategy outputs.
///
/// Entries are overwritten on rewrite and silently dropped on expiry; an
/// expired read behaves as a miss and purges the entry.
pub struct ResultCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    default_ttl: Duration,
}

impl ResultCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    /// Fetch an unexpired value. Expired entries are purged and read as a
    /// miss.
    pub fn get(&self, key: &str) -> EngineResult<Option<StrategyOutput>> {
        {
            let entries = self
                .entries
                .read()
                .map_err(|e| EngineError::Cache(format!("read lock poisoned: {e}")))?;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // The entry exists but has expired; purge it.
        let mut entries = self
            .entries
            .write()
            .map_err(|e| EngineError::Cache(format!("write lock poisoned: {e}")))?;
        if let Some(entry) = entries.get(key) {
            if entry.expires_at <= Instant::now() {
                entries.remove(key);
            }
        }
        Ok(None)
    }

    /// Store a value under the default TTL, replacing any previous entry.
    pub fn set(&self, key: &str, value: StrategyOutput) -> EngineResult<()> {
        self.set_with_ttl(key, value, self.default_ttl)
    }

    pub fn set_with_ttl(
        &self,
        key: &str,
        value: StrategyOutput,
        ttl: Duration,
    ) -> EngineResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| EngineError::Cache(format!("write lock poisoned: {e}")))?;
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    /// Number of entries currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
