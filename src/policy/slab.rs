use log::warn;

use crate::{
    error::{ConfigError, PolicyError},
    request::Request,
    stats::{report_line, PolicyStats, Stats},
};

use super::{cache::QueueCache, lru::Lru, AccessResult};

pub const MIN_CHUNK: u64 = 64;
pub const MAX_CHUNK: u64 = 1 << 20;
pub const DEFAULT_PAGE_SIZE: u64 = 1 << 20;

/// Bytes a production memcached allocator had handed to each of its
/// power-of-two classes (64 B .. 1 MiB) after a day of traffic.
pub const REFERENCE_ALLOCATION: [u64; 15] = [
    1664, 2304, 512, 17408, 266240, 16384, 73728, 188416, 442368, 3932160, 11665408, 34340864,
    262144, 0, 0,
];

pub fn reference_capacity() -> u64 {
    REFERENCE_ALLOCATION.iter().sum()
}

/// Chunk sizes growing by `factor` from `MIN_CHUNK`, with a last class of
/// exactly `MAX_CHUNK`.
pub fn geometric_chunks(factor: f64) -> Result<Vec<u64>, ConfigError> {
    if !factor.is_finite() || factor <= 1.0 {
        return Err(ConfigError::InvalidGrowthFactor(factor));
    }

    let mut chunks = vec![MIN_CHUNK];
    let mut chunk = MIN_CHUNK;
    loop {
        chunk = ((chunk as f64 * factor).ceil() as u64).max(chunk + 1);
        if chunk >= MAX_CHUNK {
            break;
        }
        chunks.push(chunk);
    }
    chunks.push(MAX_CHUNK);
    Ok(chunks)
}

pub fn fixed_chunks() -> Vec<u64> {
    (0..REFERENCE_ALLOCATION.len())
        .map(|i| MIN_CHUNK << i)
        .collect()
}

pub fn chunk_sizes(fixed: bool, factor: f64) -> Result<Vec<u64>, ConfigError> {
    if fixed {
        Ok(fixed_chunks())
    } else {
        geometric_chunks(factor)
    }
}

/// Index of the smallest class able to hold `size` bytes.
pub fn class_for(chunks: &[u64], size: u64) -> Option<usize> {
    let idx = chunks.partition_point(|&chunk| chunk < size);
    (idx < chunks.len()).then_some(idx)
}

/// Memory split into size classes that each evict independently. In paged
/// mode classes draw pages from a shared pool until it runs dry; with the
/// fixed table every class gets its share of the capacity up front.
#[derive(Debug)]
pub struct SlabPolicy {
    capacity: u64,
    chunks: Vec<u64>,
    classes: Vec<QueueCache<Lru>>,
    pool: u64,
    page_size: u64,
    dropped: u64,
    warned_unroutable: bool,
}

impl SlabPolicy {
    pub fn paged(
        capacity: u64,
        factor: f64,
        page_size: u64,
        count_admissions: bool,
    ) -> Result<Self, ConfigError> {
        if page_size == 0 {
            return Err(ConfigError::ZeroPageSize);
        }
        let chunks = geometric_chunks(factor)?;
        let classes = chunks
            .iter()
            .map(|_| QueueCache::new(0, count_admissions))
            .collect();

        Ok(SlabPolicy {
            capacity,
            chunks,
            classes,
            pool: capacity,
            page_size,
            dropped: 0,
            warned_unroutable: false,
        })
    }

    pub fn fixed(capacity: u64, count_admissions: bool) -> Self {
        let total = reference_capacity() as u128;
        let classes = REFERENCE_ALLOCATION
            .iter()
            .map(|&alloc| {
                QueueCache::new(
                    (alloc as u128 * capacity as u128 / total) as u64,
                    count_admissions,
                )
            })
            .collect();

        SlabPolicy {
            capacity,
            chunks: fixed_chunks(),
            classes,
            pool: 0,
            page_size: DEFAULT_PAGE_SIZE,
            dropped: 0,
            warned_unroutable: false,
        }
    }

    pub fn process(&mut self, req: &Request, warmup: bool) -> Result<AccessResult, PolicyError> {
        let size = req.size();
        let Some(idx) = class_for(&self.chunks, size) else {
            if !self.warned_unroutable {
                warn!("no slab class holds {size} byte objects, dropping requests like it");
                self.warned_unroutable = true;
            }
            self.dropped += 1;
            return Ok(AccessResult::Dropped);
        };

        // a resize may have moved the key out of the class holding its old copy
        for (other, class) in self.classes.iter_mut().enumerate() {
            if other != idx && class.discard(req.key, warmup)? {
                break;
            }
        }

        let class = &mut self.classes[idx];
        if self.pool > 0 && !class.is_hit(req)? {
            let mut room = class.room_for(req)?;
            while room < size && self.pool > 0 {
                let page = self.page_size.min(self.pool);
                class.grow(page);
                self.pool -= page;
                room += page;
            }
        }

        class.process(req, warmup)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn current_size(&self) -> u64 {
        self.classes
            .iter()
            .map(|class| class.current_size())
            .sum()
    }

    #[cfg(test)]
    fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn counters(&self) -> Stats {
        self.classes.iter().fold(Stats::default(), |mut total, class| {
            total.merge(class.counters());
            total
        })
    }

    pub fn check_invariants(&self) -> Result<(), PolicyError> {
        let mut allotted = self.pool;
        for class in &self.classes {
            class.check_invariants()?;
            allotted += class.capacity();
        }
        if allotted > self.capacity {
            return Err(PolicyError::OverCapacity {
                current: allotted,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    pub fn report(&self) -> String {
        report_line("slab", self.capacity, &self.counters())
    }

    pub fn stats(&self) -> PolicyStats {
        let counters = self.counters();
        PolicyStats {
            policy: "slab".to_string(),
            capacity: self.capacity,
            counters,
            utilization: counters.utilization(self.capacity),
            hit_rate: counters.hit_rate(),
            dropped: self.dropped + self.classes.iter().map(|c| c.dropped()).sum::<u64>(),
            curve: Vec::new(),
        }
    }

    #[cfg(test)]
    fn class_capacity(&self, idx: usize) -> u64 {
        self.classes[idx].capacity()
    }

    #[cfg(test)]
    fn class_counters(&self, idx: usize) -> &Stats {
        self.classes[idx].counters()
    }
}
