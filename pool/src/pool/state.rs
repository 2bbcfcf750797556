use crate::config::PoolConfig;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

/// Cumulative counters for the lifetime of a pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub created: u64,
    pub destroyed: u64,
    pub borrowed: u64,
    pub returned: u64,
    pub evicted: u64,
    pub validation_failures: u64,
    pub creation_failures: u64,
}

#[derive(Debug)]
pub(crate) struct IdleClient<C> {
    pub(crate) id: u64,
    pub(crate) client: C,
    pub(crate) created_at: Instant,
    pub(crate) idle_since: Instant,
    pub(crate) borrow_count: u64,
}

/// Clients held under one key. `pending` counts slots reserved for clients being created or
/// probed, which still count against the caps. `warming` is the part of `pending` headed for
/// the idle set (top-ups and probes) rather than for a borrower.
#[derive(Debug)]
struct KeyedClients<C> {
    // front is the most recently returned client
    idle: VecDeque<IdleClient<C>>,
    active: HashSet<u64>,
    pending: usize,
    warming: usize,
}

impl<C> Default for KeyedClients<C> {
    fn default() -> Self {
        Self {
            idle: VecDeque::new(),
            active: HashSet::new(),
            pending: 0,
            warming: 0,
        }
    }
}

impl<C> KeyedClients<C> {
    fn total(&self) -> usize {
        self.idle.len() + self.active.len() + self.pending
    }

    fn release_pending(&mut self, warm: bool) {
        self.pending = self.pending.saturating_sub(1);
        if warm {
            self.warming = self.warming.saturating_sub(1);
        }
    }
}

#[derive(Debug)]
pub(crate) enum Reserve<C> {
    Granted,
    /// Slot granted after claiming the oldest idle client of another key, which must now be
    /// destroyed
    Reclaimed(String, IdleClient<C>),
    Exhausted,
}

/// All bookkeeping for a pool. Lives behind a single mutex and never awaits.
#[derive(Debug)]
pub(crate) struct PoolState<C> {
    keys: HashMap<String, KeyedClients<C>>,
    limits: PoolConfig,
    next_id: u64,
    closed: bool,
    stats: PoolStats,
}

impl<C> PoolState<C> {
    pub(crate) fn new(limits: PoolConfig) -> Self {
        Self {
            keys: HashMap::new(),
            limits,
            next_id: 0,
            closed: false,
            stats: PoolStats::default(),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn stats(&self) -> PoolStats {
        self.stats.clone()
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.keys.keys().cloned().collect()
    }

    pub(crate) fn idle_count(&self, key: &str) -> usize {
        self.keys.get(key).map_or(0, |entry| entry.idle.len())
    }

    pub(crate) fn active_count(&self, key: &str) -> usize {
        self.keys.get(key).map_or(0, |entry| entry.active.len())
    }

    pub(crate) fn pending_count(&self, key: &str) -> usize {
        self.keys.get(key).map_or(0, |entry| entry.pending)
    }

    /// Pending slots that will end up idle once their client is created or probed
    pub(crate) fn warming_count(&self, key: &str) -> usize {
        self.keys.get(key).map_or(0, |entry| entry.warming)
    }

    pub(crate) fn total_idle(&self) -> usize {
        self.keys.values().map(|entry| entry.idle.len()).sum()
    }

    pub(crate) fn total_active(&self) -> usize {
        self.keys.values().map(|entry| entry.active.len()).sum()
    }

    fn total(&self) -> usize {
        self.keys.values().map(KeyedClients::total).sum()
    }

    pub(crate) fn is_active(&self, key: &str, id: u64) -> bool {
        self.keys
            .get(key)
            .is_some_and(|entry| entry.active.contains(&id))
    }

    pub(crate) fn record_validation_failure(&mut self) {
        self.stats.validation_failures += 1;
    }

    pub(crate) fn record_creation_failure(&mut self) {
        self.stats.creation_failures += 1;
    }

    fn entry(&mut self, key: &str) -> &mut KeyedClients<C> {
        self.keys.entry(key.to_string()).or_default()
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Empty keys are forgotten unless the pool has to keep topping them up
    fn prune(&mut self, key: &str) {
        if self.limits.min_idle_per_key > 0 && !self.closed {
            return;
        }
        if self.keys.get(key).is_some_and(|entry| entry.total() == 0) {
            self.keys.remove(key);
        }
    }

    fn prune_all(&mut self) {
        if self.limits.min_idle_per_key > 0 && !self.closed {
            return;
        }
        self.keys.retain(|_, entry| entry.total() > 0);
    }

    /// Moves the most recently returned idle client of `key` into the active set
    pub(crate) fn claim_idle(&mut self, key: &str) -> Option<IdleClient<C>> {
        let entry = self.keys.get_mut(key)?;
        let idle = entry.idle.pop_front()?;
        entry.active.insert(idle.id);
        self.stats.borrowed += 1;
        Some(idle)
    }

    /// Reserves a pending slot under `key` if the caps allow it. With `reclaim`, a full pool
    /// gives up the oldest idle client of another key to make room.
    pub(crate) fn reserve(&mut self, key: &str, reclaim: bool) -> Reserve<C> {
        let per_key = self.keys.get(key).map_or(0, KeyedClients::total);
        if per_key >= self.limits.max_total_per_key {
            return Reserve::Exhausted;
        }
        if self.total() < self.limits.max_total {
            self.entry(key).pending += 1;
            return Reserve::Granted;
        }
        if !reclaim {
            return Reserve::Exhausted;
        }
        match self.take_oldest_idle_elsewhere(key) {
            Some((victim_key, victim)) => {
                self.stats.destroyed += 1;
                self.prune(&victim_key);
                self.entry(key).pending += 1;
                Reserve::Reclaimed(victim_key, victim)
            }
            None => Reserve::Exhausted,
        }
    }

    fn take_oldest_idle_elsewhere(&mut self, key: &str) -> Option<(String, IdleClient<C>)> {
        let (victim_key, index) = self
            .keys
            .iter()
            .filter(|(other, _)| other.as_str() != key)
            .flat_map(|(other, entry)| {
                entry
                    .idle
                    .iter()
                    .enumerate()
                    .map(move |(index, idle)| (other, index, idle.idle_since))
            })
            .min_by_key(|(_, _, idle_since)| *idle_since)
            .map(|(other, index, _)| (other.clone(), index))?;
        let victim = self.keys.get_mut(&victim_key)?.idle.remove(index)?;
        Some((victim_key, victim))
    }

    /// Reserves a pending slot for a client that will be installed idle, never reclaiming
    pub(crate) fn reserve_warm(&mut self, key: &str) -> bool {
        match self.reserve(key, false) {
            Reserve::Granted => {
                self.entry(key).warming += 1;
                true
            }
            Reserve::Reclaimed(..) | Reserve::Exhausted => false,
        }
    }

    /// Releases a pending slot without installing anything
    pub(crate) fn cancel_reservation(&mut self, key: &str, warm: bool) {
        if let Some(entry) = self.keys.get_mut(key) {
            entry.release_pending(warm);
        }
        self.prune(key);
    }

    /// Releases a pending slot whose client is being destroyed
    pub(crate) fn discard_reservation(&mut self, key: &str, warm: bool) {
        self.stats.destroyed += 1;
        self.cancel_reservation(key, warm);
    }

    /// Turns a pending slot into an active client, `None` once the pool is closed
    pub(crate) fn install_active(&mut self, key: &str) -> Option<u64> {
        self.stats.created += 1;
        if self.closed {
            self.discard_reservation(key, false);
            return None;
        }
        let id = self.next_id();
        let entry = self.entry(key);
        entry.release_pending(false);
        entry.active.insert(id);
        self.stats.borrowed += 1;
        Some(id)
    }

    /// Turns a pending slot into a freshly created idle client
    pub(crate) fn install_idle(&mut self, key: &str, client: C, now: Instant) -> Result<(), C> {
        self.stats.created += 1;
        let id = self.next_id();
        self.restore_idle(
            key,
            IdleClient {
                id,
                client,
                created_at: now,
                idle_since: now,
                borrow_count: 0,
            },
        )
    }

    /// Puts a probed client back into the idle set of its warming slot
    pub(crate) fn restore_idle(&mut self, key: &str, idle: IdleClient<C>) -> Result<(), C> {
        if self.closed {
            self.discard_reservation(key, true);
            return Err(idle.client);
        }
        let entry = self.entry(key);
        entry.release_pending(true);
        entry.idle.push_back(idle);
        Ok(())
    }

    /// Moves a returned client from active to idle. Gives the client back when it has to be
    /// destroyed instead.
    pub(crate) fn check_in(&mut self, key: &str, idle: IdleClient<C>) -> Result<(), C> {
        let max_idle = self.limits.max_idle_per_key;
        let closed = self.closed;
        self.stats.returned += 1;
        let entry = self.entry(key);
        entry.active.remove(&idle.id);
        if closed || entry.idle.len() >= max_idle {
            self.stats.destroyed += 1;
            self.prune(key);
            return Err(idle.client);
        }
        entry.idle.push_front(idle);
        Ok(())
    }

    /// Drops an active client from the bookkeeping, its slot is free again
    pub(crate) fn discard_active(&mut self, key: &str, id: u64) {
        if let Some(entry) = self.keys.get_mut(key) {
            if entry.active.remove(&id) {
                self.stats.destroyed += 1;
            }
        }
        self.prune(key);
    }

    /// Claims every idle client (or only those of `key`) for destruction
    ///
    /// Cleared keys left without clients are forgotten even with `min_idle_per_key` set, so the
    /// sweep stops topping them up until they are borrowed from again.
    pub(crate) fn drain_idle(&mut self, key: Option<&str>) -> Vec<(String, IdleClient<C>)> {
        let mut drained = Vec::new();
        for (name, entry) in self.keys.iter_mut() {
            if key.is_some_and(|key| key != name) {
                continue;
            }
            drained.extend(entry.idle.drain(..).map(|idle| (name.clone(), idle)));
        }
        self.stats.destroyed += drained.len() as u64;
        self.keys
            .retain(|name, entry| key.is_some_and(|key| key != name) || entry.total() > 0);
        drained
    }

    /// Claims idle clients that have been idle longer than `min_evictable_idle_duration`,
    /// oldest first, leaving at least `min_idle_per_key` idle clients per key
    pub(crate) fn take_evictable(&mut self, now: Instant) -> Vec<(String, IdleClient<C>)> {
        let min_idle = self.limits.min_idle_per_key;
        let min_evictable = self.limits.min_evictable_idle_duration;
        let mut evicted = Vec::new();
        for (key, entry) in self.keys.iter_mut() {
            let excess = entry.idle.len().saturating_sub(min_idle);
            if excess == 0 {
                continue;
            }
            let mut candidates: Vec<(usize, Instant)> = entry
                .idle
                .iter()
                .enumerate()
                .filter(|(_, idle)| now.saturating_duration_since(idle.idle_since) > min_evictable)
                .map(|(index, idle)| (index, idle.idle_since))
                .collect();
            candidates.sort_by_key(|(_, idle_since)| *idle_since);
            candidates.truncate(excess);
            let mut indices: Vec<usize> = candidates.into_iter().map(|(index, _)| index).collect();
            // remove from the back so earlier indices stay valid
            indices.sort_unstable_by(|a, b| b.cmp(a));
            for index in indices {
                if let Some(idle) = entry.idle.remove(index) {
                    evicted.push((key.clone(), idle));
                }
            }
        }
        self.stats.evicted += evicted.len() as u64;
        self.stats.destroyed += evicted.len() as u64;
        self.prune_all();
        evicted
    }

    /// Claims every idle client into a warming slot so it can be probed outside the lock
    pub(crate) fn claim_idle_for_probe(&mut self) -> Vec<(String, IdleClient<C>)> {
        let mut claimed = Vec::new();
        for (key, entry) in self.keys.iter_mut() {
            entry.pending += entry.idle.len();
            entry.warming += entry.idle.len();
            claimed.extend(entry.idle.drain(..).map(|idle| (key.clone(), idle)));
        }
        claimed
    }

    /// Marks the pool closed and claims every idle client for destruction
    pub(crate) fn close(&mut self) -> Vec<(String, IdleClient<C>)> {
        self.closed = true;
        self.drain_idle(None)
    }
}
