pub mod cache;
pub mod fifo;
pub mod lru;
pub mod queue;
pub mod shadow;
pub mod shadow_slab;
pub mod slab;

use std::{fmt, str::FromStr};

use log::warn;
use serde::Deserialize;

use crate::{
    error::{ConfigError, PolicyError},
    request::Request,
    stats::PolicyStats,
};

use self::{
    cache::QueueCache,
    fifo::Fifo,
    lru::Lru,
    queue::{EvictionQueue, SlotId},
    shadow::ShadowLru,
    shadow_slab::ShadowSlab,
    slab::{SlabPolicy, DEFAULT_PAGE_SIZE},
};

const DEFAULT_CURVE_POINTS: u64 = 20;

/// What a hit does to the eviction order of a queue cache.
pub trait Discipline: Default {
    const NAME: &'static str;

    fn on_hit<M>(queue: &mut EvictionQueue<M>, id: SlotId) -> Result<(), PolicyError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessResult {
    Hit,
    /// Not cached before, admitted now.
    Miss,
    /// Could not be cached at all.
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Single(AccessResult),
    /// One result per candidate capacity, smallest first.
    Curve(Vec<AccessResult>),
}

pub trait Policy {
    fn process(&mut self, req: &Request, warmup: bool) -> Result<Outcome, PolicyError>;
    fn capacity(&self) -> u64;
    fn current_size(&self) -> u64;
    fn report_header(&self) -> String;
    fn report(&self) -> String;
    fn stats(&self) -> PolicyStats;
    fn check_invariants(&self) -> Result<(), PolicyError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    ShadowLru,
    Fifo,
    Lru,
    Slab,
    ShadowSlab,
}

impl PolicyKind {
    pub fn name(&self) -> &'static str {
        match self {
            PolicyKind::ShadowLru => "shadowlru",
            PolicyKind::Fifo => Fifo::NAME,
            PolicyKind::Lru => Lru::NAME,
            PolicyKind::Slab => "slab",
            PolicyKind::ShadowSlab => "shadowslab",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PolicyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "shadowlru" => Ok(PolicyKind::ShadowLru),
            "1" | "fifo" => Ok(PolicyKind::Fifo),
            "2" | "lru" => Ok(PolicyKind::Lru),
            "3" | "slab" => Ok(PolicyKind::Slab),
            "4" | "shadowslab" => Ok(PolicyKind::ShadowSlab),
            other => Err(ConfigError::UnknownPolicy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub growth_factor: f64,
    pub fixed_classes: bool,
    pub candidate_capacities: Option<Vec<u64>>,
    pub count_admissions_as_hits: bool,
    pub slab_page_size: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            growth_factor: 1.25,
            fixed_classes: false,
            candidate_capacities: None,
            count_admissions_as_hits: true,
            slab_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PolicyConfig {
    /// Candidate capacities for the shadow policies, sorted and without
    /// duplicates or zeros. Defaults to evenly spaced fractions of `capacity`.
    pub fn candidates(&self, capacity: u64) -> Vec<u64> {
        let mut candidates = match &self.candidate_capacities {
            Some(list) if list.iter().any(|&c| c > 0) => list.clone(),
            _ => (1..=DEFAULT_CURVE_POINTS)
                .map(|i| capacity * i / DEFAULT_CURVE_POINTS)
                .collect(),
        };
        candidates.retain(|&c| c > 0);
        candidates.sort_unstable();
        candidates.dedup();
        candidates
    }
}

#[derive(Debug)]
pub enum AnyPolicy {
    Fifo(QueueCache<Fifo>),
    Lru(QueueCache<Lru>),
    Slab(SlabPolicy),
    ShadowLru(ShadowLru),
    ShadowSlab(ShadowSlab),
}

impl AnyPolicy {
    pub fn new(kind: PolicyKind, capacity: u64, config: &PolicyConfig) -> Result<Self, ConfigError> {
        let admissions = config.count_admissions_as_hits;
        let policy = match kind {
            PolicyKind::Fifo => AnyPolicy::Fifo(QueueCache::new(capacity, admissions)),
            PolicyKind::Lru => AnyPolicy::Lru(QueueCache::new(capacity, admissions)),
            PolicyKind::Slab if config.fixed_classes => {
                AnyPolicy::Slab(SlabPolicy::fixed(capacity, admissions))
            }
            PolicyKind::Slab => AnyPolicy::Slab(SlabPolicy::paged(
                capacity,
                config.growth_factor,
                config.slab_page_size,
                admissions,
            )?),
            PolicyKind::ShadowLru => {
                AnyPolicy::ShadowLru(ShadowLru::new(config.candidates(capacity), admissions))
            }
            PolicyKind::ShadowSlab => AnyPolicy::ShadowSlab(ShadowSlab::new(
                config.candidates(capacity),
                config.fixed_classes,
                config.growth_factor,
                admissions,
            )?),
        };

        if policy.capacity() == 0 {
            warn!("{kind} has no memory to work with, every request will be dropped");
        }
        Ok(policy)
    }

    pub fn kind(&self) -> PolicyKind {
        match self {
            AnyPolicy::Fifo(_) => PolicyKind::Fifo,
            AnyPolicy::Lru(_) => PolicyKind::Lru,
            AnyPolicy::Slab(_) => PolicyKind::Slab,
            AnyPolicy::ShadowLru(_) => PolicyKind::ShadowLru,
            AnyPolicy::ShadowSlab(_) => PolicyKind::ShadowSlab,
        }
    }
}

impl Policy for AnyPolicy {
    fn process(&mut self, req: &Request, warmup: bool) -> Result<Outcome, PolicyError> {
        match self {
            AnyPolicy::Fifo(p) => p.process(req, warmup).map(Outcome::Single),
            AnyPolicy::Lru(p) => p.process(req, warmup).map(Outcome::Single),
            AnyPolicy::Slab(p) => p.process(req, warmup).map(Outcome::Single),
            AnyPolicy::ShadowLru(p) => p.process(req, warmup).map(Outcome::Curve),
            AnyPolicy::ShadowSlab(p) => p.process(req, warmup).map(Outcome::Curve),
        }
    }

    fn capacity(&self) -> u64 {
        match self {
            AnyPolicy::Fifo(p) => p.capacity(),
            AnyPolicy::Lru(p) => p.capacity(),
            AnyPolicy::Slab(p) => p.capacity(),
            AnyPolicy::ShadowLru(p) => p.capacity(),
            AnyPolicy::ShadowSlab(p) => p.capacity(),
        }
    }

    fn current_size(&self) -> u64 {
        match self {
            AnyPolicy::Fifo(p) => p.current_size(),
            AnyPolicy::Lru(p) => p.current_size(),
            AnyPolicy::Slab(p) => p.current_size(),
            AnyPolicy::ShadowLru(p) => p.current_size(),
            AnyPolicy::ShadowSlab(p) => p.current_size(),
        }
    }

    fn report_header(&self) -> String {
        match self {
            AnyPolicy::ShadowSlab(_) => "policy class util cachesize hits accesses hitrate",
            _ => "policy util cachesize hits accesses hitrate",
        }
        .to_string()
    }

    fn report(&self) -> String {
        match self {
            AnyPolicy::Fifo(p) => p.report(),
            AnyPolicy::Lru(p) => p.report(),
            AnyPolicy::Slab(p) => p.report(),
            AnyPolicy::ShadowLru(p) => p.report(),
            AnyPolicy::ShadowSlab(p) => p.report(),
        }
    }

    fn stats(&self) -> PolicyStats {
        match self {
            AnyPolicy::Fifo(p) => p.stats(),
            AnyPolicy::Lru(p) => p.stats(),
            AnyPolicy::Slab(p) => p.stats(),
            AnyPolicy::ShadowLru(p) => p.stats(),
            AnyPolicy::ShadowSlab(p) => p.stats(),
        }
    }

    fn check_invariants(&self) -> Result<(), PolicyError> {
        match self {
            AnyPolicy::Fifo(p) => p.check_invariants(),
            AnyPolicy::Lru(p) => p.check_invariants(),
            AnyPolicy::Slab(p) => p.check_invariants(),
            AnyPolicy::ShadowLru(p) => p.check_invariants(),
            AnyPolicy::ShadowSlab(p) => p.check_invariants(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::get;

    #[test]
    fn parses_names_and_numbers() {
        assert_eq!("fifo".parse::<PolicyKind>().unwrap(), PolicyKind::Fifo);
        assert_eq!(" LRU ".parse::<PolicyKind>().unwrap(), PolicyKind::Lru);
        assert_eq!("0".parse::<PolicyKind>().unwrap(), PolicyKind::ShadowLru);
        assert_eq!("4".parse::<PolicyKind>().unwrap(), PolicyKind::ShadowSlab);
        assert_eq!(
            "arc".parse::<PolicyKind>(),
            Err(ConfigError::UnknownPolicy("arc".to_string()))
        );
    }

    #[test]
    fn default_candidates_span_capacity() {
        let config = PolicyConfig::default();
        let candidates = config.candidates(2_000);
        assert_eq!(candidates.len(), 20);
        assert_eq!(candidates[0], 100);
        assert_eq!(candidates.last(), Some(&2_000));
        assert!(config.candidates(0).is_empty());
    }

    #[test]
    fn configured_candidates_are_normalized() {
        let config = PolicyConfig {
            candidate_capacities: Some(vec![300, 0, 100, 300, 200]),
            ..PolicyConfig::default()
        };
        assert_eq!(config.candidates(5_000), vec![100, 200, 300]);
    }

    #[test]
    fn every_kind_processes_the_scenario() {
        let config = PolicyConfig {
            candidate_capacities: Some(vec![300]),
            slab_page_size: 100,
            ..PolicyConfig::default()
        };
        for kind in [
            PolicyKind::Fifo,
            PolicyKind::Lru,
            PolicyKind::Slab,
            PolicyKind::ShadowLru,
            PolicyKind::ShadowSlab,
        ] {
            let mut policy = AnyPolicy::new(kind, 300, &config).unwrap();
            assert_eq!(policy.kind(), kind);
            for key in [1, 2, 3, 4, 2] {
                policy.process(&get(key, 100), false).unwrap();
                policy.check_invariants().unwrap();
                assert!(policy.current_size() <= policy.capacity());
            }
            assert_eq!(policy.current_size(), 300, "{kind}");
            assert_eq!(policy.stats().counters.accesses, 5, "{kind}");
            assert!(!policy.report().is_empty());
            assert!(policy.report_header().starts_with("policy"));
        }
    }

    #[test]
    fn single_policies_return_single_outcomes() {
        let config = PolicyConfig::default();
        let mut fifo = AnyPolicy::new(PolicyKind::Fifo, 300, &config).unwrap();
        assert_eq!(
            fifo.process(&get(1, 100), false).unwrap(),
            Outcome::Single(AccessResult::Miss)
        );
        assert_eq!(
            fifo.process(&get(1, 100), false).unwrap(),
            Outcome::Single(AccessResult::Hit)
        );

        let mut shadow = AnyPolicy::new(PolicyKind::ShadowLru, 300, &config).unwrap();
        match shadow.process(&get(1, 100), false).unwrap() {
            Outcome::Curve(results) => assert_eq!(results.len(), 20),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn invalid_slab_config_fails_construction() {
        let config = PolicyConfig {
            growth_factor: 0.9,
            ..PolicyConfig::default()
        };
        assert!(AnyPolicy::new(PolicyKind::Slab, 1 << 20, &config).is_err());
        assert!(AnyPolicy::new(PolicyKind::ShadowSlab, 1 << 20, &config).is_err());
        assert!(AnyPolicy::new(PolicyKind::Fifo, 1 << 20, &config).is_ok());
    }
}
