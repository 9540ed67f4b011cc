use crate::error::PolicyError;

use super::{
    queue::{EvictionQueue, SlotId},
    Discipline,
};

/// Arrival order only: a hit never moves an entry.
#[derive(Debug, Default)]
pub struct Fifo;

impl Discipline for Fifo {
    const NAME: &'static str = "fifo";

    fn on_hit<M>(_queue: &mut EvictionQueue<M>, _id: SlotId) -> Result<(), PolicyError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        policy::{cache::QueueCache, AccessResult},
        request::get,
    };

    use super::Fifo;

    fn fifo(capacity: u64) -> QueueCache<Fifo> {
        QueueCache::new(capacity, true)
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut cache = fifo(300);
        for key in [1, 2, 3] {
            assert_eq!(cache.process(&get(key, 100), false).unwrap(), AccessResult::Miss);
        }
        assert_eq!(cache.current_size(), 300);

        assert_eq!(cache.process(&get(4, 100), false).unwrap(), AccessResult::Miss);
        assert_eq!(cache.current_size(), 300);
        assert_eq!(cache.counters().evicted_items, 1);
        assert_eq!(cache.counters().evicted_bytes, 100);
        assert_eq!(cache.keys(), vec![4, 3, 2]);

        assert_eq!(cache.process(&get(2, 100), false).unwrap(), AccessResult::Hit);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn one_more_key_evicts_exactly_the_first() {
        let n = 8;
        let mut cache = fifo(800);
        for key in 0..n {
            cache.process(&get(key, 100), false).unwrap();
        }
        cache.process(&get(n, 100), false).unwrap();

        assert_eq!(cache.counters().evicted_items, 1);
        let mut keys = cache.keys();
        keys.sort();
        assert_eq!(keys, (1..=n).collect::<Vec<_>>());
    }

    #[test]
    fn hit_does_not_reorder() {
        let mut cache = fifo(200);
        cache.process(&get(1, 100), false).unwrap();
        cache.process(&get(2, 100), false).unwrap();
        cache.process(&get(1, 100), false).unwrap();
        cache.process(&get(3, 100), false).unwrap();
        assert_eq!(cache.keys(), vec![3, 2]);
    }

    #[test]
    fn oversized_object_is_dropped() {
        let mut cache = fifo(50);
        assert_eq!(cache.process(&get(5, 100), false).unwrap(), AccessResult::Dropped);
        assert_eq!(cache.current_size(), 0);
        assert_eq!(cache.counters().accesses, 1);
        assert_eq!(cache.counters().hits, 0);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn resize_counts_two_accesses_and_no_hit() {
        let mut cache = fifo(1000);
        cache.process(&get(1, 100), false).unwrap();
        cache.process(&get(2, 100), false).unwrap();
        let before = *cache.counters();

        let mut exact = QueueCache::<Fifo>::new(1000, false);
        exact.process(&get(1, 100), false).unwrap();
        exact.process(&get(1, 150), false).unwrap();
        assert_eq!(exact.counters().accesses, 3);
        assert_eq!(exact.counters().hits, 0);

        assert_eq!(cache.process(&get(1, 150), false).unwrap(), AccessResult::Miss);
        assert_eq!(cache.counters().accesses, before.accesses + 2);
        assert_eq!(cache.current_size(), 250);
        assert_eq!(cache.counters().evicted_items, 0);
        assert_eq!(cache.keys(), vec![1, 2]);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn warmup_fills_cache_without_counting() {
        let mut cache = fifo(1000);
        for key in [1, 2, 3] {
            cache.process(&get(key, 100), true).unwrap();
        }
        assert_eq!(cache.counters().accesses, 0);
        assert_eq!(cache.counters().hits, 0);
        assert_eq!(cache.current_size(), 300);

        assert_eq!(cache.process(&get(2, 100), false).unwrap(), AccessResult::Hit);
        cache.process(&get(4, 100), false).unwrap();
        assert_eq!(cache.counters().accesses, 2);
        assert_eq!(cache.current_size(), 400);
    }

    #[test]
    fn replay_is_deterministic() {
        let mut rng = fastrand::Rng::with_seed(7);
        let trace = (0..5_000)
            .map(|_| {
                let key = rng.u64(0..300);
                get(key, 1 + (key % 17) as u32 * 13)
            })
            .collect::<Vec<_>>();

        let run = || {
            let mut cache = fifo(4096);
            let outcomes = trace
                .iter()
                .map(|req| cache.process(req, false).unwrap())
                .collect::<Vec<_>>();
            cache.check_invariants().unwrap();
            (outcomes, *cache.counters())
        };
        assert_eq!(run(), run());
    }
}
