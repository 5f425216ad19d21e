//! Memoization cache for node results.
//!
//! Entries are keyed by [`CacheKey`] and bounded two ways: a capacity, enforced
//! on insert by evicting the least-hit entry, and a TTL, enforced by
//! [`NodeCache::sweep_expired`] and lazily on lookup.
//!
//! The cache also tracks the graph generation. Every graph update advances
//! it, and [`NodeCache::put_if_current`] refuses results computed against an
//! older generation, so an evaluation that outlives a graph swap cannot write
//! its result back.

use std::collections::{HashMap, HashSet};

use artifex_events::{EngineEvent, SharedNotifier};
use artifex_model::{CacheConfig, DataPacket};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::key::CacheKey;

/// A memoized evaluation result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub packets: Vec<DataPacket>,
  pub created_at: DateTime<Utc>,
  /// Ids of the input packets consulted while producing `packets`.
  pub dependency_ids: Vec<String>,
  pub hit_count: u64,
  seq: u64,
}

/// Summary of one entry, as reported by [`NodeCache::info`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntryInfo {
  pub key: String,
  pub node_id: String,
  pub hit_count: u64,
  pub age_ms: i64,
}

/// Snapshot of the cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheInfo {
  pub size: usize,
  pub max_entries: usize,
  pub ttl_secs: u64,
  pub total_hits: u64,
  pub entries: Vec<CacheEntryInfo>,
}

struct CacheState {
  entries: HashMap<CacheKey, CacheEntry>,
  max_entries: usize,
  next_seq: u64,
  generation: u64,
}

impl CacheState {
  /// Entry with the fewest hits; ties go to the oldest.
  fn victim(&self) -> Option<CacheKey> {
    self
      .entries
      .iter()
      .min_by(|(_, a), (_, b)| {
        a.hit_count
          .cmp(&b.hit_count)
          .then(a.created_at.cmp(&b.created_at))
          .then(a.seq.cmp(&b.seq))
      })
      .map(|(key, _)| key.clone())
  }

  /// Evict until `len() <= limit`.
  fn shrink_to(&mut self, limit: usize) -> Vec<CacheKey> {
    let mut evicted = Vec::new();
    while self.entries.len() > limit {
      let Some(victim) = self.victim() else {
        break;
      };
      self.entries.remove(&victim);
      evicted.push(victim);
    }
    evicted
  }
}

/// Thread-safe result cache shared by every evaluation.
pub struct NodeCache {
  state: Mutex<CacheState>,
  ttl: chrono::Duration,
  ttl_secs: u64,
  clock: SharedClock,
  notifier: SharedNotifier,
}

impl NodeCache {
  pub fn new(config: &CacheConfig, clock: SharedClock, notifier: SharedNotifier) -> Self {
    let ttl = chrono::Duration::from_std(config.ttl()).unwrap_or(chrono::Duration::MAX);
    Self {
      state: Mutex::new(CacheState {
        entries: HashMap::new(),
        max_entries: config.max_entries,
        next_seq: 0,
        generation: 0,
      }),
      ttl,
      ttl_secs: config.ttl_secs,
      clock,
      notifier,
    }
  }

  fn is_expired(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(created_at) > self.ttl
  }

  /// Look up a live entry and count the hit.
  ///
  /// An entry older than the TTL is dropped and reported as a miss.
  pub fn get(&self, key: &CacheKey) -> Option<Vec<DataPacket>> {
    let now = self.clock.now();
    let mut state = self.state.lock();
    let entry = state.entries.get_mut(key)?;
    if self.is_expired(entry.created_at, now) {
      state.entries.remove(key);
      debug!(key = %key, "cache_entry_expired");
      return None;
    }
    entry.hit_count += 1;
    Some(entry.packets.clone())
  }

  /// Store a result. A new key in a full cache evicts first.
  ///
  /// With a capacity of zero nothing is stored.
  pub fn put(&self, key: CacheKey, packets: Vec<DataPacket>, dependency_ids: Vec<String>) {
    let now = self.clock.now();
    let evicted = {
      let mut state = self.state.lock();
      Self::insert(&mut state, key, packets, dependency_ids, now)
    };
    self.report_evicted(evicted);
  }

  /// Store a result computed against graph `generation`.
  ///
  /// Returns `false` and stores nothing when the graph has been replaced since
  /// that generation was read.
  pub fn put_if_current(
    &self,
    generation: u64,
    key: CacheKey,
    packets: Vec<DataPacket>,
    dependency_ids: Vec<String>,
  ) -> bool {
    let now = self.clock.now();
    let evicted = {
      let mut state = self.state.lock();
      if state.generation != generation {
        debug!(
          key = %key,
          generation,
          current = state.generation,
          "cache_put_stale_generation"
        );
        return false;
      }
      Self::insert(&mut state, key, packets, dependency_ids, now)
    };
    self.report_evicted(evicted);
    true
  }

  fn insert(
    state: &mut CacheState,
    key: CacheKey,
    packets: Vec<DataPacket>,
    dependency_ids: Vec<String>,
    now: DateTime<Utc>,
  ) -> Vec<CacheKey> {
    if state.max_entries == 0 {
      return Vec::new();
    }
    let evicted = if state.entries.contains_key(&key) {
      Vec::new()
    } else {
      let limit = state.max_entries - 1;
      state.shrink_to(limit)
    };
    let seq = state.next_seq;
    state.next_seq += 1;
    state.entries.insert(
      key,
      CacheEntry {
        packets,
        created_at: now,
        dependency_ids,
        hit_count: 0,
        seq,
      },
    );
    evicted
  }

  /// Current graph generation.
  pub fn generation(&self) -> u64 {
    self.state.lock().generation
  }

  /// Start a new graph generation. Results of evaluations still running on
  /// the previous one are no longer accepted by [`NodeCache::put_if_current`].
  pub fn advance_generation(&self) -> u64 {
    let mut state = self.state.lock();
    state.generation += 1;
    state.generation
  }

  /// Remove the entry with the lowest hit count (oldest on ties).
  pub fn evict_one(&self) -> Option<CacheKey> {
    let victim = {
      let mut state = self.state.lock();
      let victim = state.victim()?;
      state.entries.remove(&victim);
      victim
    };
    self.report_evicted(vec![victim.clone()]);
    Some(victim)
  }

  fn report_evicted(&self, evicted: Vec<CacheKey>) {
    for key in evicted {
      debug!(key = %key, "cache_evicted");
      self.notifier.notify(EngineEvent::CacheEvicted {
        key: key.to_string(),
      });
    }
  }

  /// Remove every entry older than the TTL. Returns how many were removed.
  pub fn sweep_expired(&self) -> usize {
    let now = self.clock.now();
    let cleaned = {
      let mut state = self.state.lock();
      let before = state.entries.len();
      state
        .entries
        .retain(|_, entry| !self.is_expired(entry.created_at, now));
      before - state.entries.len()
    };
    if cleaned > 0 {
      info!(cleaned, "cache_cleanup");
      self.notifier.notify(EngineEvent::CacheCleanup { cleaned });
    }
    cleaned
  }

  /// Drop everything.
  pub fn invalidate_all(&self) -> usize {
    let cleared = {
      let mut state = self.state.lock();
      let cleared = state.entries.len();
      state.entries.clear();
      cleared
    };
    debug!(cleared, "cache_invalidated");
    self.notifier.notify(EngineEvent::CacheInvalidated { cleared });
    cleared
  }

  /// Drop the entries of `node_ids` and, transitively, every entry built from
  /// a dropped entry's packets.
  pub fn invalidate_nodes(&self, node_ids: &HashSet<String>) -> usize {
    let cleared = {
      let mut state = self.state.lock();
      let before = state.entries.len();

      let mut removed_packets: HashSet<String> = HashSet::new();
      let mut doomed: Vec<CacheKey> = state
        .entries
        .keys()
        .filter(|key| node_ids.contains(key.node_id()))
        .cloned()
        .collect();

      while !doomed.is_empty() {
        for key in doomed.drain(..) {
          if let Some(entry) = state.entries.remove(&key) {
            removed_packets.extend(entry.packets.into_iter().map(|p| p.id));
          }
        }
        doomed = state
          .entries
          .iter()
          .filter(|(_, entry)| {
            entry
              .dependency_ids
              .iter()
              .any(|id| removed_packets.contains(id))
          })
          .map(|(key, _)| key.clone())
          .collect();
      }

      before - state.entries.len()
    };
    debug!(cleared, dirty = node_ids.len(), "cache_invalidated");
    self.notifier.notify(EngineEvent::CacheInvalidated { cleared });
    cleared
  }

  /// Change the capacity, evicting until the cache fits.
  pub fn set_max_entries(&self, max_entries: usize) {
    let evicted = {
      let mut state = self.state.lock();
      state.max_entries = max_entries;
      state.shrink_to(max_entries)
    };
    self.report_evicted(evicted);
  }

  pub fn max_entries(&self) -> usize {
    self.state.lock().max_entries
  }

  pub fn len(&self) -> usize {
    self.state.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn contains(&self, key: &CacheKey) -> bool {
    self.state.lock().entries.contains_key(key)
  }

  /// Hit count of an entry, without counting a hit.
  pub fn hit_count(&self, key: &CacheKey) -> Option<u64> {
    self.state.lock().entries.get(key).map(|entry| entry.hit_count)
  }

  pub fn info(&self) -> CacheInfo {
    let now = self.clock.now();
    let state = self.state.lock();
    let mut entries: Vec<CacheEntryInfo> = state
      .entries
      .iter()
      .map(|(key, entry)| CacheEntryInfo {
        key: key.to_string(),
        node_id: key.node_id().to_string(),
        hit_count: entry.hit_count,
        age_ms: now.signed_duration_since(entry.created_at).num_milliseconds(),
      })
      .collect();
    entries.sort_by(|a, b| a.key.cmp(&b.key));

    CacheInfo {
      size: state.entries.len(),
      max_entries: state.max_entries,
      ttl_secs: self.ttl_secs,
      total_hits: state.entries.values().map(|entry| entry.hit_count).sum(),
      entries,
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::time::Duration;

  use artifex_events::ChannelNotifier;
  use artifex_model::{PacketKind, ProcessingContext};
  use tokio::sync::mpsc;

  use super::*;
  use crate::clock::ManualClock;

  struct Fixture {
    cache: NodeCache,
    clock: Arc<ManualClock>,
    events: mpsc::UnboundedReceiver<EngineEvent>,
  }

  fn fixture(max_entries: usize, ttl_secs: u64) -> Fixture {
    let clock = Arc::new(ManualClock::default());
    let (sender, events) = mpsc::unbounded_channel();
    let config = CacheConfig {
      max_entries,
      ttl_secs,
      ..CacheConfig::default()
    };
    let cache = NodeCache::new(&config, clock.clone(), Arc::new(ChannelNotifier::new(sender)));
    Fixture {
      cache,
      clock,
      events,
    }
  }

  fn key(node_id: &str) -> CacheKey {
    CacheKey::new(node_id, &ProcessingContext::at(0.0))
  }

  fn packet() -> DataPacket {
    DataPacket::new(PacketKind::Data, "json")
  }

  fn drain(events: &mut mpsc::UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
      out.push(event);
    }
    out
  }

  #[test]
  fn test_get_counts_hits() {
    let f = fixture(10, 60);
    f.cache.put(key("a"), vec![packet()], vec![]);

    assert!(f.cache.get(&key("a")).is_some());
    assert!(f.cache.get(&key("a")).is_some());
    assert_eq!(f.cache.hit_count(&key("a")), Some(2));
    assert!(f.cache.get(&key("b")).is_none());
  }

  #[test]
  fn test_full_cache_evicts_least_hit_before_insert() {
    let mut f = fixture(2, 60);
    f.cache.put(key("a"), vec![packet()], vec![]);
    f.cache.put(key("b"), vec![packet()], vec![]);
    f.cache.get(&key("a"));

    f.cache.put(key("c"), vec![packet()], vec![]);

    assert_eq!(f.cache.len(), 2);
    assert!(f.cache.contains(&key("a")));
    assert!(!f.cache.contains(&key("b")));
    assert!(f.cache.contains(&key("c")));
    assert_eq!(
      drain(&mut f.events),
      vec![EngineEvent::CacheEvicted {
        key: key("b").to_string()
      }]
    );
  }

  #[test]
  fn test_eviction_tie_goes_to_oldest() {
    let f = fixture(2, 600);
    f.cache.put(key("a"), vec![packet()], vec![]);
    f.clock.advance(Duration::from_secs(1));
    f.cache.put(key("b"), vec![packet()], vec![]);

    assert_eq!(f.cache.evict_one(), Some(key("a")));
  }

  #[test]
  fn test_overwrite_does_not_evict() {
    let mut f = fixture(1, 60);
    f.cache.put(key("a"), vec![packet()], vec![]);
    f.cache.put(key("a"), vec![packet()], vec![]);
    assert_eq!(f.cache.len(), 1);
    assert!(drain(&mut f.events).is_empty());
  }

  #[test]
  fn test_zero_capacity_stores_nothing() {
    let f = fixture(0, 60);
    f.cache.put(key("a"), vec![packet()], vec![]);
    assert!(f.cache.is_empty());
  }

  #[test]
  fn test_sweep_removes_only_expired() {
    let mut f = fixture(10, 5);
    f.cache.put(key("old"), vec![packet()], vec![]);
    f.clock.advance(Duration::from_secs(4));
    f.cache.put(key("new"), vec![packet()], vec![]);
    f.clock.advance(Duration::from_secs(2));

    assert_eq!(f.cache.sweep_expired(), 1);
    assert!(f.cache.contains(&key("new")));
    assert_eq!(
      drain(&mut f.events),
      vec![EngineEvent::CacheCleanup { cleaned: 1 }]
    );

    // Nothing expired, nothing emitted.
    assert_eq!(f.cache.sweep_expired(), 0);
    assert!(drain(&mut f.events).is_empty());
  }

  #[test]
  fn test_expired_entry_is_a_miss() {
    let f = fixture(10, 5);
    f.cache.put(key("a"), vec![packet()], vec![]);
    f.clock.advance(Duration::from_secs(6));

    assert!(f.cache.get(&key("a")).is_none());
    assert!(f.cache.is_empty());
  }

  #[test]
  fn test_invalidate_all() {
    let mut f = fixture(10, 60);
    f.cache.put(key("a"), vec![packet()], vec![]);
    f.cache.put(key("b"), vec![packet()], vec![]);

    assert_eq!(f.cache.invalidate_all(), 2);
    assert!(f.cache.is_empty());
    assert_eq!(
      drain(&mut f.events),
      vec![EngineEvent::CacheInvalidated { cleared: 2 }]
    );
  }

  #[test]
  fn test_invalidate_nodes_follows_dependencies() {
    let mut f = fixture(10, 60);
    let a = packet();
    let b = packet();
    let c = packet();
    let other = packet();
    f.cache.put(key("a"), vec![a.clone()], vec![]);
    f.cache.put(key("b"), vec![b.clone()], vec![a.id.clone()]);
    f.cache.put(key("c"), vec![c], vec![b.id.clone()]);
    f.cache.put(key("other"), vec![other], vec![]);

    let dirty = HashSet::from(["a".to_string()]);
    assert_eq!(f.cache.invalidate_nodes(&dirty), 3);
    assert!(f.cache.contains(&key("other")));
    assert_eq!(
      drain(&mut f.events),
      vec![EngineEvent::CacheInvalidated { cleared: 3 }]
    );
  }

  #[test]
  fn test_shrinking_capacity_evicts() {
    let f = fixture(5, 60);
    for id in ["a", "b", "c", "d"] {
      f.cache.put(key(id), vec![packet()], vec![]);
    }
    f.cache.set_max_entries(2);
    assert_eq!(f.cache.len(), 2);
    assert_eq!(f.cache.max_entries(), 2);
  }

  #[test]
  fn test_put_from_previous_generation_is_dropped() {
    let f = fixture(10, 60);
    let started_on = f.cache.generation();
    assert_eq!(f.cache.advance_generation(), started_on + 1);

    assert!(!f.cache.put_if_current(started_on, key("a"), vec![packet()], vec![]));
    assert!(f.cache.is_empty());

    assert!(f.cache.put_if_current(started_on + 1, key("a"), vec![packet()], vec![]));
    assert!(f.cache.contains(&key("a")));
  }

  #[test]
  fn test_info_reports_entries() {
    let f = fixture(5, 60);
    f.cache.put(key("a"), vec![packet()], vec![]);
    f.cache.get(&key("a"));
    f.clock.advance(Duration::from_millis(250));

    let info = f.cache.info();
    assert_eq!(info.size, 1);
    assert_eq!(info.max_entries, 5);
    assert_eq!(info.ttl_secs, 60);
    assert_eq!(info.total_hits, 1);
    assert_eq!(info.entries[0].node_id, "a");
    assert_eq!(info.entries[0].age_ms, 250);
  }
}
