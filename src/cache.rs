//! An in-process, TTL'd key-value cache.
//!
//! Backed by [`dashmap`], an in-memory, sharded concurrent map, rather than
//! an on-disk store: nothing here needs to survive a restart. A cache that
//! is empty after a restart just means a few more DNS lookups get
//! re-attempted; it never affects correctness.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use foldhash::fast::RandomState;

//----------- CacheItem -------------------------------------------------------------

#[derive(Clone)]
struct CacheItem {
    value: String,
    expires: Option<Instant>,
}

impl CacheItem {
    fn valid(&self) -> bool {
        match self.expires {
            Some(exp) => Instant::now() < exp,
            None => true,
        }
    }
}

//----------- CacheType -------------------------------------------------------------

/// The named sub-databases kuang keeps in its cache.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CacheType {
    IpCache,
}

impl CacheType {
    fn name(self) -> &'static str {
        match self {
            CacheType::IpCache => "IPCache",
        }
    }
}

//----------- CacheDb ----------------------------------------------------------------

/// A single named sub-database within the [`Cache`].
pub struct CacheDb {
    name: CacheType,
    ttl: Option<Duration>,
    map: DashMap<String, CacheItem, RandomState>,
}

impl CacheDb {
    fn new(name: CacheType, ttl: Option<Duration>) -> Self {
        Self {
            name,
            ttl,
            map: DashMap::with_hasher(RandomState::default()),
        }
    }

    /// Begin a read ("rw = false") or read-write ("rw = true") transaction.
    ///
    /// This is a synchronous, in-memory operation, so there is no separate
    /// commit/abort step; the returned [`Tx`] operates directly on the
    /// underlying map for the duration of its borrow.
    pub fn tx(&self, rw: bool) -> Tx<'_> {
        Tx { db: self, rw }
    }

    /// Remove stale entries. If `complete` is `true`, remove every entry
    /// regardless of expiry.
    pub fn purge(&self, complete: bool) {
        let before = self.map.len();
        self.map.retain(|_, item| !complete && item.valid());
        tracing::debug!(
            "Purged {} ({} -> {} entries, complete={complete})",
            self.name.name(),
            before,
            self.map.len(),
        );
    }
}

//----------- Tx ---------------------------------------------------------------------

/// A transaction-scoped view onto a [`CacheDb`].
pub struct Tx<'a> {
    db: &'a CacheDb,
    rw: bool,
}

impl Tx<'_> {
    /// Look up `key`. A read-write transaction evicts the entry if it has
    /// expired; a read-only transaction just reports it as absent.
    pub fn get(&self, key: &str) -> Option<String> {
        let expired = match self.db.map.get(key) {
            Some(item) if item.valid() => return Some(item.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired && self.rw {
            self.db.map.remove(key);
        }
        None
    }

    /// Insert or overwrite `key`. Returns [`TxError::ReadOnly`] outside a
    /// read-write transaction.
    pub fn put(&self, key: &str, val: &str) -> Result<(), TxError> {
        if !self.rw {
            return Err(TxError::ReadOnly);
        }
        let expires = self.db.ttl.map(|ttl| Instant::now() + ttl);
        self.db.map.insert(
            key.to_string(),
            CacheItem {
                value: val.to_string(),
                expires,
            },
        );
        Ok(())
    }

    /// Remove `key` unconditionally. Returns [`TxError::ReadOnly`] outside a
    /// read-write transaction.
    pub fn delete(&self, key: &str) -> Result<(), TxError> {
        if !self.rw {
            return Err(TxError::ReadOnly);
        }
        self.db.map.remove(key);
        Ok(())
    }

    /// Return whether `key` is present and unexpired. A read-write
    /// transaction evicts the entry as a side effect if it has expired.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

//----------- TxError ----------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TxError {
    ReadOnly,
}

impl std::fmt::Display for TxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("cannot change the database in a read-only transaction")
    }
}

impl std::error::Error for TxError {}

//----------- Cache -------------------------------------------------------------------

/// The default time an entry stays valid once written: two hours.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7200);

/// Owns every named sub-database kuang uses.
pub struct Cache {
    ip_cache: CacheDb,
}

impl Cache {
    pub fn new() -> Self {
        Self {
            ip_cache: CacheDb::new(CacheType::IpCache, Some(DEFAULT_TTL)),
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ip_cache: CacheDb::new(CacheType::IpCache, Some(ttl)),
        }
    }

    /// Return the named sub-database.
    pub fn get_db(&self, name: CacheType) -> &CacheDb {
        match name {
            CacheType::IpCache => &self.ip_cache,
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_roundtrips() {
        let cache = Cache::new();
        let db = cache.get_db(CacheType::IpCache);
        let tx = db.tx(true);
        tx.put("10.1.1.1", "1").unwrap();
        assert_eq!(tx.get("10.1.1.1"), Some("1".to_string()));
    }

    #[test]
    fn readonly_tx_rejects_writes() {
        let cache = Cache::new();
        let db = cache.get_db(CacheType::IpCache);
        let tx = db.tx(false);
        assert_eq!(tx.put("x", "y"), Err(TxError::ReadOnly));
    }

    #[test]
    fn expired_entries_are_not_returned() {
        let cache = Cache::with_ttl(Duration::from_millis(1));
        let db = cache.get_db(CacheType::IpCache);
        let tx = db.tx(true);
        tx.put("10.1.1.1", "1").unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(tx.get("10.1.1.1"), None);
    }

    #[test]
    fn purge_complete_clears_everything() {
        let cache = Cache::new();
        let db = cache.get_db(CacheType::IpCache);
        db.tx(true).put("a", "1").unwrap();
        db.purge(true);
        assert!(!db.tx(false).contains("a"));
    }
}
