//! Stack-distance simulation of many LRU capacities in one pass.
//!
//! One recency stack holds every object that could still be resident under
//! the largest candidate capacity. Each entry carries a logical timestamp and
//! a Fenwick tree over timestamps holds entry sizes, so the bytes strictly more
//! recent than an entry are `total - prefix(stamp)`. An object is resident
//! under capacity `c` iff those bytes plus its own size are at most `c`.

use crate::{
    error::PolicyError,
    request::Request,
    stats::{fmt_ratio, CurvePoint, PolicyStats, Stats},
};

use super::{
    queue::{Entry, EvictionQueue},
    AccessResult,
};

const MIN_STAMPS: usize = 1024;

#[derive(Debug)]
struct Fenwick {
    tree: Vec<u64>,
}

impl Fenwick {
    fn new(len: usize) -> Self {
        Fenwick {
            tree: vec![0; len + 1],
        }
    }

    fn len(&self) -> usize {
        self.tree.len() - 1
    }

    fn add(&mut self, pos: usize, delta: u64) {
        let mut i = pos + 1;
        while i < self.tree.len() {
            self.tree[i] = self.tree[i].wrapping_add(delta);
            i += i & i.wrapping_neg();
        }
    }

    fn sub(&mut self, pos: usize, delta: u64) {
        self.add(pos, delta.wrapping_neg());
    }

    /// Sum over positions `0..=pos`.
    fn prefix(&self, pos: usize) -> u64 {
        let mut i = pos + 1;
        let mut sum = 0u64;
        while i > 0 {
            sum = sum.wrapping_add(self.tree[i]);
            i -= i & i.wrapping_neg();
        }
        sum
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Tally {
    accesses: u64,
    hits: u64,
}

/// LRU recency stack evaluated against a sorted set of candidate capacities.
#[derive(Debug)]
pub struct ShadowStack {
    candidates: Vec<u64>,
    limit: u64,
    stack: EvictionQueue<usize>,
    sizes: Fenwick,
    clock: usize,
    bytes: u64,
    tallies: Vec<Tally>,
    evicted: Stats,
    count_admissions: bool,
}

impl ShadowStack {
    /// `candidates` must be sorted, deduplicated and free of zeros.
    pub fn new(candidates: Vec<u64>, count_admissions: bool) -> Self {
        ShadowStack {
            limit: candidates.last().copied().unwrap_or(0),
            tallies: vec![Tally::default(); candidates.len()],
            candidates,
            stack: EvictionQueue::new(),
            sizes: Fenwick::new(MIN_STAMPS),
            clock: 0,
            bytes: 0,
            evicted: Stats::default(),
            count_admissions,
        }
    }

    pub fn candidates(&self) -> &[u64] {
        &self.candidates
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn process(
        &mut self,
        req: &Request,
        warmup: bool,
    ) -> Result<Vec<AccessResult>, PolicyError> {
        let size = req.size();
        let found = match self.stack.slot(req.key) {
            Some(id) => {
                let entry = self
                    .stack
                    .entry(id)
                    .ok_or(PolicyError::DanglingIndex { key: req.key })?;
                let newer = self.bytes - self.sizes.prefix(entry.meta);
                Some((entry.size, newer + entry.size))
            }
            None => None,
        };

        let mut outcomes = Vec::with_capacity(self.candidates.len());
        for (&capacity, tally) in self.candidates.iter().zip(&mut self.tallies) {
            let resident = found.filter(|&(_, distance)| distance <= capacity);
            let outcome = match resident {
                Some((prior, _)) if prior == size => {
                    if !warmup {
                        tally.accesses += 1;
                        tally.hits += 1;
                    }
                    AccessResult::Hit
                }
                resident => {
                    if !warmup {
                        // a resized object implies an unseen miss in between
                        tally.accesses += if resident.is_some() { 2 } else { 1 };
                    }
                    if size <= capacity {
                        if !warmup && self.count_admissions {
                            tally.hits += 1;
                        }
                        AccessResult::Miss
                    } else {
                        AccessResult::Dropped
                    }
                }
            };
            outcomes.push(outcome);
        }

        self.push(req.key, size)?;
        Ok(outcomes)
    }

    /// Removes `key` after a resize routed it to another stack. Every
    /// candidate that still held the old copy is charged the miss the trace
    /// does not show.
    pub fn discard(&mut self, key: u64, warmup: bool) -> Result<bool, PolicyError> {
        let Some(id) = self.stack.slot(key) else {
            return Ok(false);
        };
        let entry = self
            .stack
            .entry(id)
            .ok_or(PolicyError::DanglingIndex { key })?;
        let distance = self.bytes - self.sizes.prefix(entry.meta) + entry.size;

        if !warmup {
            for (&capacity, tally) in self.candidates.iter().zip(&mut self.tallies) {
                if distance <= capacity {
                    tally.accesses += 1;
                }
            }
        }
        if let Some(old) = self.stack.remove(key)? {
            self.forget(&old)?;
        }
        Ok(true)
    }

    fn push(&mut self, key: u64, size: u64) -> Result<(), PolicyError> {
        if let Some(old) = self.stack.remove(key)? {
            self.forget(&old)?;
        }

        if self.clock == self.sizes.len() {
            self.compact()?;
        }
        let stamp = self.clock;
        self.clock += 1;

        self.stack.push_front(Entry {
            key,
            size,
            meta: stamp,
        });
        self.sizes.add(stamp, size);
        self.bytes += size;

        while self.bytes > self.limit {
            let Some(victim) = self.stack.pop_back()? else {
                break;
            };
            self.forget(&victim)?;
            if victim.key != key {
                self.evicted.evicted_items += 1;
                self.evicted.evicted_bytes += victim.size;
            }
        }
        Ok(())
    }

    fn forget(&mut self, entry: &Entry<usize>) -> Result<(), PolicyError> {
        self.bytes = self
            .bytes
            .checked_sub(entry.size)
            .ok_or(PolicyError::Underflow {
                current: self.bytes,
                size: entry.size,
            })?;
        self.sizes.sub(entry.meta, entry.size);
        Ok(())
    }

    /// Renumbers live entries oldest-first and rebuilds the tree once the
    /// timestamps run out.
    fn compact(&mut self) -> Result<(), PolicyError> {
        let keys = self.stack.iter().map(|entry| entry.key).collect::<Vec<_>>();
        self.sizes = Fenwick::new((keys.len() * 2).max(MIN_STAMPS));

        for (stamp, &key) in keys.iter().rev().enumerate() {
            let entry = self
                .stack
                .slot(key)
                .and_then(|id| self.stack.entry_mut(id))
                .ok_or(PolicyError::DanglingIndex { key })?;
            entry.meta = stamp;
            self.sizes.add(stamp, entry.size);
        }
        self.clock = keys.len();
        Ok(())
    }

    /// Bytes cached under each candidate: the largest stack prefix that fits.
    fn cached(&self) -> Vec<u64> {
        let prefixes = self
            .stack
            .iter()
            .scan(0, |running, entry| {
                *running += entry.size;
                Some(*running)
            })
            .collect::<Vec<_>>();

        self.candidates
            .iter()
            .map(|&capacity| {
                match prefixes.partition_point(|&bytes| bytes <= capacity) {
                    0 => 0,
                    n => prefixes[n - 1],
                }
            })
            .collect()
    }

    pub fn curve(&self, class: Option<u64>) -> Vec<CurvePoint> {
        self.candidates
            .iter()
            .zip(&self.tallies)
            .zip(self.cached())
            .map(|((&capacity, tally), bytes_cached)| CurvePoint {
                class,
                capacity,
                accesses: tally.accesses,
                hits: tally.hits,
                bytes_cached,
                hit_rate: match tally.accesses {
                    0 => None,
                    accesses => Some(tally.hits as f64 / accesses as f64),
                },
            })
            .collect()
    }

    /// Counters of the largest candidate.
    pub fn counters(&self) -> Stats {
        let tally = self.tallies.last().copied().unwrap_or_default();
        Stats {
            accesses: tally.accesses,
            hits: tally.hits,
            bytes_cached: self.bytes,
            evicted_bytes: self.evicted.evicted_bytes,
            evicted_items: self.evicted.evicted_items,
        }
    }

    pub fn check_invariants(&self) -> Result<(), PolicyError> {
        if self.bytes > self.limit {
            return Err(PolicyError::OverCapacity {
                current: self.bytes,
                capacity: self.limit,
            });
        }
        self.stack.validate(self.bytes)?;

        let indexed = self.sizes.prefix(self.sizes.len() - 1);
        if indexed != self.bytes {
            return Err(PolicyError::SizeMismatch {
                accounted: self.bytes,
                actual: indexed,
            });
        }
        Ok(())
    }
}

pub fn curve_line(name: &str, point: &CurvePoint) -> String {
    let utilization = match point.capacity {
        0 => None,
        capacity => Some(point.bytes_cached as f64 / capacity as f64),
    };
    let class = point
        .class
        .map(|chunk| format!(" {chunk}"))
        .unwrap_or_default();
    format!(
        "{}{} {} {} {} {} {}",
        name,
        class,
        fmt_ratio(utilization),
        point.capacity,
        point.hits,
        point.accesses,
        fmt_ratio(point.hit_rate),
    )
}

/// Hit-rate curve of a single LRU cache over every candidate capacity.
#[derive(Debug)]
pub struct ShadowLru {
    stack: ShadowStack,
}

impl ShadowLru {
    pub fn new(candidates: Vec<u64>, count_admissions: bool) -> Self {
        ShadowLru {
            stack: ShadowStack::new(candidates, count_admissions),
        }
    }

    pub fn process(
        &mut self,
        req: &Request,
        warmup: bool,
    ) -> Result<Vec<AccessResult>, PolicyError> {
        self.stack.process(req, warmup)
    }

    pub fn capacity(&self) -> u64 {
        self.stack.limit
    }

    pub fn current_size(&self) -> u64 {
        self.stack.bytes()
    }

    pub fn check_invariants(&self) -> Result<(), PolicyError> {
        self.stack.check_invariants()
    }

    pub fn curve(&self) -> Vec<CurvePoint> {
        self.stack.curve(None)
    }

    pub fn report(&self) -> String {
        self.curve()
            .iter()
            .map(|point| curve_line("shadowlru", point))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn stats(&self) -> PolicyStats {
        let counters = self.stack.counters();
        PolicyStats {
            policy: "shadowlru".to_string(),
            capacity: self.capacity(),
            counters,
            utilization: counters.utilization(self.capacity()),
            hit_rate: counters.hit_rate(),
            dropped: 0,
            curve: self.curve(),
        }
    }
}
