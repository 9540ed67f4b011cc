use log::warn;

use crate::{
    error::{ConfigError, PolicyError},
    request::Request,
    stats::{CurvePoint, PolicyStats, Stats},
};

use super::{
    shadow::{curve_line, ShadowStack},
    slab::{chunk_sizes, class_for},
    AccessResult,
};

/// One shadow LRU stack per slab class: a hit-rate curve for every class as
/// a function of the memory it would be given.
#[derive(Debug)]
pub struct ShadowSlab {
    chunks: Vec<u64>,
    classes: Vec<ShadowStack>,
    routed: Vec<u64>,
    limit: u64,
    dropped: u64,
    warned_unroutable: bool,
}

impl ShadowSlab {
    pub fn new(
        candidates: Vec<u64>,
        fixed: bool,
        factor: f64,
        count_admissions: bool,
    ) -> Result<Self, ConfigError> {
        let chunks = chunk_sizes(fixed, factor)?;
        let classes = chunks
            .iter()
            .map(|_| ShadowStack::new(candidates.clone(), count_admissions))
            .collect();

        Ok(ShadowSlab {
            routed: vec![0; chunks.len()],
            chunks,
            classes,
            limit: candidates.last().copied().unwrap_or(0),
            dropped: 0,
            warned_unroutable: false,
        })
    }

    pub fn process(
        &mut self,
        req: &Request,
        warmup: bool,
    ) -> Result<Vec<AccessResult>, PolicyError> {
        let size = req.size();
        let Some(idx) = class_for(&self.chunks, size) else {
            if !self.warned_unroutable {
                warn!("no slab class holds {size} byte objects, dropping requests like it");
                self.warned_unroutable = true;
            }
            self.dropped += 1;
            let candidates = self.classes.first().map_or(0, |c| c.candidates().len());
            return Ok(vec![AccessResult::Dropped; candidates]);
        };

        for (other, class) in self.classes.iter_mut().enumerate() {
            if other != idx && class.discard(req.key, warmup)? {
                break;
            }
        }

        self.routed[idx] += 1;
        self.classes[idx].process(req, warmup)
    }

    /// Largest candidate capacity.
    pub fn capacity(&self) -> u64 {
        self.limit
    }

    pub fn current_size(&self) -> u64 {
        self.classes.iter().map(ShadowStack::bytes).sum()
    }

    #[cfg(test)]
    fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn check_invariants(&self) -> Result<(), PolicyError> {
        self.classes.iter().try_for_each(ShadowStack::check_invariants)
    }

    /// Curves of every class that saw at least one request.
    pub fn curve(&self) -> Vec<CurvePoint> {
        self.chunks
            .iter()
            .zip(&self.classes)
            .zip(&self.routed)
            .filter(|(_, routed)| **routed > 0)
            .flat_map(|((&chunk, class), _)| class.curve(Some(chunk)))
            .collect()
    }

    pub fn report(&self) -> String {
        self.curve()
            .iter()
            .map(|point| curve_line("shadowslab", point))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn stats(&self) -> PolicyStats {
        let counters = self.classes.iter().fold(Stats::default(), |mut total, class| {
            total.merge(&class.counters());
            total
        });
        PolicyStats {
            policy: "shadowslab".to_string(),
            capacity: self.limit,
            counters,
            utilization: counters.utilization(self.limit),
            hit_rate: counters.hit_rate(),
            dropped: self.dropped,
            curve: self.curve(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        policy::slab::{fixed_chunks, MAX_CHUNK},
        request::get,
    };

    #[test]
    fn classes_are_simulated_independently() {
        let mut shadow = ShadowSlab::new(vec![128, 256], false, 2.0, false).unwrap();
        // two 64 byte objects fill the small class at 128 bytes
        shadow.process(&get(1, 64), false).unwrap();
        shadow.process(&get(2, 64), false).unwrap();
        // traffic in the 128 byte class does not push them out
        for key in 10..20 {
            shadow.process(&get(key, 100), false).unwrap();
        }
        let outcomes = shadow.process(&get(1, 64), false).unwrap();
        assert_eq!(outcomes, vec![AccessResult::Hit; 2]);
        shadow.check_invariants().unwrap();
    }

    #[test]
    fn curve_lists_only_classes_with_traffic() {
        let mut shadow = ShadowSlab::new(vec![1000, 2000], true, 1.25, true).unwrap();
        shadow.process(&get(1, 60), false).unwrap();
        shadow.process(&get(2, 500), false).unwrap();

        let chunks = fixed_chunks();
        let curve = shadow.curve();
        assert_eq!(curve.len(), 4);
        assert_eq!(curve[0].class, Some(chunks[0]));
        assert_eq!(curve[2].class, Some(chunks[3]));
        assert_eq!(shadow.report().lines().count(), 4);
        assert_eq!(shadow.current_size(), 560);
    }

    #[test]
    fn unroutable_request_is_dropped() {
        let mut shadow = ShadowSlab::new(vec![1 << 21], false, 2.0, true).unwrap();
        let outcomes = shadow.process(&get(1, (MAX_CHUNK + 1) as u32), false).unwrap();
        assert_eq!(outcomes, vec![AccessResult::Dropped]);
        assert_eq!(shadow.dropped(), 1);
        assert!(shadow.curve().is_empty());
        assert_eq!(shadow.stats().counters, Stats::default());
    }

    #[test]
    fn resized_key_leaves_its_old_class() {
        let mut shadow = ShadowSlab::new(vec![100, 4096], false, 2.0, false).unwrap();
        shadow.process(&get(1, 60), false).unwrap();
        shadow.process(&get(1, 120), false).unwrap();
        assert_eq!(shadow.current_size(), 120);

        let outcomes = shadow.process(&get(1, 60), false).unwrap();
        assert_eq!(outcomes, vec![AccessResult::Miss; 2]);
        assert_eq!(shadow.current_size(), 60);

        let counters = shadow.stats().counters;
        assert_eq!(counters.accesses, 5);
        assert_eq!(counters.hits, 0);
        assert_eq!(counters.evicted_items, 0);

        // the 120 byte copy never fit under 100 bytes, so only the larger
        // candidate pays for the unseen miss
        let curve = shadow.curve();
        assert_eq!(curve.len(), 4);
        assert_eq!((curve[2].capacity, curve[2].accesses), (100, 1));
        assert_eq!((curve[3].capacity, curve[3].accesses), (4096, 2));
        shadow.check_invariants().unwrap();
    }
}
