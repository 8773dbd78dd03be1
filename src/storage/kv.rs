// Low-latency in-memory KV store with sets, sorted sets, string payloads,
// and TTL lease keys. A whole batch of ops commits under one lock, so a
// logical write is all-or-nothing.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

/// f64 wrapper with total ordering so scores can live in a BTreeSet.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Score(f64);

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Default)]
struct ZSet {
    scores: HashMap<String, f64>,
    ordered: BTreeSet<(Score, String)>,
}

impl ZSet {
    fn insert(&mut self, member: String, score: f64) {
        if let Some(old) = self.scores.insert(member.clone(), score) {
            self.ordered.remove(&(Score(old), member.clone()));
        }
        self.ordered.insert((Score(score), member));
    }

    fn remove(&mut self, member: &str) {
        if let Some(old) = self.scores.remove(member) {
            self.ordered.remove(&(Score(old), member.to_string()));
        }
    }

    fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

#[derive(Debug, Clone)]
struct LeaseEntry {
    token: String,
    expires_at: Instant,
}

#[derive(Default)]
struct KvInner {
    strings: HashMap<String, String>,
    sets: HashMap<String, HashSet<String>>,
    zsets: HashMap<String, ZSet>,
    leases: HashMap<String, LeaseEntry>,
}

/// One mutation inside an atomic batch. `Del` clears a key from every
/// namespace it appears in.
#[derive(Debug, Clone)]
pub enum KvOp {
    Set { key: String, value: String },
    Del { key: String },
    SAdd { key: String, member: String },
    SRem { key: String, member: String },
    ZAdd { key: String, member: String, score: f64 },
    ZRem { key: String, member: String },
}

#[derive(Default)]
pub struct KvStore {
    inner: Mutex<KvInner>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, KvInner>> {
        self.inner
            .lock()
            .map_err(|e| anyhow!("kv store lock poisoned: {}", e))
    }

    /// Apply a batch of mutations atomically.
    pub fn exec(&self, ops: Vec<KvOp>) -> Result<()> {
        let mut inner = self.lock()?;
        for op in ops {
            match op {
                KvOp::Set { key, value } => {
                    inner.strings.insert(key, value);
                }
                KvOp::Del { key } => {
                    inner.strings.remove(&key);
                    inner.sets.remove(&key);
                    inner.zsets.remove(&key);
                }
                KvOp::SAdd { key, member } => {
                    inner.sets.entry(key).or_default().insert(member);
                }
                KvOp::SRem { key, member } => {
                    if let Some(set) = inner.sets.get_mut(&key) {
                        set.remove(&member);
                        if set.is_empty() {
                            inner.sets.remove(&key);
                        }
                    }
                }
                KvOp::ZAdd { key, member, score } => {
                    inner.zsets.entry(key).or_default().insert(member, score);
                }
                KvOp::ZRem { key, member } => {
                    if let Some(zset) = inner.zsets.get_mut(&key) {
                        zset.remove(&member);
                        if zset.is_empty() {
                            inner.zsets.remove(&key);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.strings.get(key).cloned())
    }

    pub fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self
            .lock()?
            .sets
            .get(key)
            .map(|s| s.contains(member))
            .unwrap_or(false))
    }

    pub fn smembers(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    pub fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        Ok(self
            .lock()?
            .zsets
            .get(key)
            .and_then(|z| z.scores.get(member).copied()))
    }

    pub fn zcard(&self, key: &str) -> Result<usize> {
        Ok(self.lock()?.zsets.get(key).map(|z| z.scores.len()).unwrap_or(0))
    }

    /// Members with scores, ordered by score (then member), from either end.
    pub fn zrange(&self, key: &str, descending: bool, limit: usize) -> Result<Vec<(String, f64)>> {
        let inner = self.lock()?;
        let Some(zset) = inner.zsets.get(key) else {
            return Ok(Vec::new());
        };
        let collect = |iter: &mut dyn Iterator<Item = &(Score, String)>| {
            iter.take(limit)
                .map(|(score, member)| (member.clone(), score.0))
                .collect::<Vec<_>>()
        };
        let result = if descending {
            collect(&mut zset.ordered.iter().rev())
        } else {
            collect(&mut zset.ordered.iter())
        };
        Ok(result)
    }

    // Lease keys: set-if-absent with a TTL, renewable only by the holder.
    // Expiry is checked lazily on access.

    pub fn lease_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.lock()?;
        let now = Instant::now();
        match inner.leases.get(key) {
            Some(entry) if entry.expires_at > now && entry.token != token => Ok(false),
            _ => {
                inner.leases.insert(
                    key.to_string(),
                    LeaseEntry { token: token.to_string(), expires_at: now + ttl },
                );
                Ok(true)
            }
        }
    }

    pub fn lease_renew(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.lock()?;
        let now = Instant::now();
        match inner.leases.get_mut(key) {
            Some(entry) if entry.token == token && entry.expires_at > now => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn lease_release(&self, key: &str, token: &str) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.leases.get(key).map(|e| e.token == token).unwrap_or(false) {
            inner.leases.remove(key);
        }
        Ok(())
    }

    pub fn lease_held_by(&self, key: &str, token: &str) -> Result<bool> {
        let inner = self.lock()?;
        Ok(inner
            .leases
            .get(key)
            .map(|e| e.token == token && e.expires_at > Instant::now())
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zrange_orders_by_score_then_member() {
        let kv = KvStore::new();
        kv.exec(vec![
            KvOp::ZAdd { key: "z".into(), member: "b".into(), score: 1.0 },
            KvOp::ZAdd { key: "z".into(), member: "a".into(), score: 1.0 },
            KvOp::ZAdd { key: "z".into(), member: "c".into(), score: 2.0 },
        ])
        .unwrap();

        let asc = kv.zrange("z", false, 10).unwrap();
        assert_eq!(asc.iter().map(|(m, _)| m.as_str()).collect::<Vec<_>>(), vec!["a", "b", "c"]);

        let desc = kv.zrange("z", true, 2).unwrap();
        assert_eq!(desc.iter().map(|(m, _)| m.as_str()).collect::<Vec<_>>(), vec!["c", "b"]);
    }

    #[test]
    fn test_zadd_rescore_replaces_member() {
        let kv = KvStore::new();
        kv.exec(vec![KvOp::ZAdd { key: "z".into(), member: "a".into(), score: 1.0 }]).unwrap();
        kv.exec(vec![KvOp::ZAdd { key: "z".into(), member: "a".into(), score: 5.0 }]).unwrap();
        assert_eq!(kv.zcard("z").unwrap(), 1);
        assert_eq!(kv.zscore("z", "a").unwrap(), Some(5.0));
    }

    #[test]
    fn test_del_clears_every_namespace() {
        let kv = KvStore::new();
        kv.exec(vec![
            KvOp::Set { key: "k".into(), value: "v".into() },
            KvOp::SAdd { key: "k".into(), member: "m".into() },
            KvOp::ZAdd { key: "k".into(), member: "m".into(), score: 0.0 },
        ])
        .unwrap();
        kv.exec(vec![KvOp::Del { key: "k".into() }]).unwrap();
        assert_eq!(kv.get("k").unwrap(), None);
        assert!(!kv.sismember("k", "m").unwrap());
        assert_eq!(kv.zcard("k").unwrap(), 0);
    }

    #[test]
    fn test_lease_exclusion_and_renewal() {
        let kv = KvStore::new();
        let ttl = Duration::from_millis(50);
        assert!(kv.lease_acquire("lock", "one", ttl).unwrap());
        assert!(!kv.lease_acquire("lock", "two", ttl).unwrap());
        assert!(kv.lease_renew("lock", "one", ttl).unwrap());
        assert!(!kv.lease_renew("lock", "two", ttl).unwrap());

        std::thread::sleep(Duration::from_millis(60));
        assert!(!kv.lease_held_by("lock", "one").unwrap());
        assert!(kv.lease_acquire("lock", "two", ttl).unwrap());
    }
}
