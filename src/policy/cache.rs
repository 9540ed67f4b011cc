use std::marker::PhantomData;

use crate::{
    error::PolicyError,
    request::Request,
    stats::{report_line, PolicyStats, Stats},
};

use super::{
    queue::{Entry, EvictionQueue},
    AccessResult, Discipline,
};

/// A single-capacity cache whose victims come off the tail of one eviction
/// queue. The discipline decides what a hit does to the order.
#[derive(Debug)]
pub struct QueueCache<D: Discipline> {
    capacity: u64,
    queue: EvictionQueue<()>,
    stats: Stats,
    dropped: u64,
    count_admissions: bool,
    _discipline: PhantomData<D>,
}

impl<D: Discipline> QueueCache<D> {
    pub fn new(capacity: u64, count_admissions: bool) -> Self {
        QueueCache {
            capacity,
            queue: EvictionQueue::new(),
            stats: Stats::default(),
            dropped: 0,
            count_admissions,
            _discipline: PhantomData,
        }
    }

    pub fn process(&mut self, req: &Request, warmup: bool) -> Result<AccessResult, PolicyError> {
        let size = req.size();
        if !warmup {
            self.stats.accesses += 1;
        }

        if let Some(id) = self.queue.slot(req.key) {
            let prior_size = self
                .queue
                .entry(id)
                .ok_or(PolicyError::DanglingIndex { key: req.key })?
                .size;

            if prior_size == size {
                if !warmup {
                    self.stats.hits += 1;
                }
                D::on_hit(&mut self.queue, id)?;
                return Ok(AccessResult::Hit);
            }

            self.discard(req.key, warmup)?;
        }

        while self.free()? < size {
            // The object cannot fit even in an empty cache.
            let Some(victim) = self.queue.pop_back()? else {
                self.dropped += 1;
                return Ok(AccessResult::Dropped);
            };
            self.stats.evicted(victim.size)?;
        }

        self.queue.push_front(Entry::new(req.key, size));
        self.stats.cache(size);

        if !warmup && self.count_admissions {
            self.stats.hits += 1;
        }
        Ok(AccessResult::Miss)
    }

    /// Drops a copy of `key` cached under a size it no longer has. The size
    /// changed, so the copy must have been replaced at some point, which
    /// implies a get miss in between that the trace does not show.
    pub fn discard(&mut self, key: u64, warmup: bool) -> Result<bool, PolicyError> {
        let Some(stale) = self.queue.remove(key)? else {
            return Ok(false);
        };
        self.stats.uncache(stale.size)?;
        if !warmup {
            self.stats.accesses += 1;
        }
        Ok(true)
    }

    /// Free bytes available to `req` once any stale copy of it is discarded.
    pub fn room_for(&self, req: &Request) -> Result<u64, PolicyError> {
        let free = self.free()?;
        let stale = match self.queue.get(req.key)? {
            Some(entry) if entry.size != req.size() => entry.size,
            _ => 0,
        };
        Ok(free + stale)
    }

    pub fn is_hit(&self, req: &Request) -> Result<bool, PolicyError> {
        Ok(self
            .queue
            .get(req.key)?
            .is_some_and(|entry| entry.size == req.size()))
    }

    fn free(&self) -> Result<u64, PolicyError> {
        self.capacity
            .checked_sub(self.stats.bytes_cached)
            .ok_or(PolicyError::OverCapacity {
                current: self.stats.bytes_cached,
                capacity: self.capacity,
            })
    }

    pub fn grow(&mut self, bytes: u64) {
        self.capacity += bytes;
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn current_size(&self) -> u64 {
        self.stats.bytes_cached
    }

    pub fn counters(&self) -> &Stats {
        &self.stats
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn check_invariants(&self) -> Result<(), PolicyError> {
        if self.stats.bytes_cached > self.capacity {
            return Err(PolicyError::OverCapacity {
                current: self.stats.bytes_cached,
                capacity: self.capacity,
            });
        }
        self.queue.validate(self.stats.bytes_cached)
    }

    pub fn report(&self) -> String {
        report_line(D::NAME, self.capacity, &self.stats)
    }

    pub fn stats(&self) -> PolicyStats {
        PolicyStats {
            policy: D::NAME.to_string(),
            capacity: self.capacity,
            counters: self.stats,
            utilization: self.stats.utilization(self.capacity),
            hit_rate: self.stats.hit_rate(),
            dropped: self.dropped,
            curve: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn keys(&self) -> Vec<u64> {
        self.queue.iter().map(|entry| entry.key).collect()
    }
}
