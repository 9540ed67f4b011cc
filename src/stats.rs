use std::fmt::Write;

use serde::Serialize;

use crate::error::PolicyError;

pub const NO_DATA: &str = "-";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub accesses: u64,
    pub hits: u64,
    pub bytes_cached: u64,
    pub evicted_bytes: u64,
    pub evicted_items: u64,
}

impl Stats {
    pub fn hit_rate(&self) -> Option<f64> {
        match self.accesses {
            0 => None,
            accesses => Some(self.hits as f64 / accesses as f64),
        }
    }

    pub fn utilization(&self, capacity: u64) -> Option<f64> {
        match capacity {
            0 => None,
            capacity => Some(self.bytes_cached as f64 / capacity as f64),
        }
    }

    pub fn cache(&mut self, size: u64) {
        self.bytes_cached += size;
    }

    pub fn uncache(&mut self, size: u64) -> Result<(), PolicyError> {
        self.bytes_cached = self
            .bytes_cached
            .checked_sub(size)
            .ok_or(PolicyError::Underflow {
                current: self.bytes_cached,
                size,
            })?;
        Ok(())
    }

    pub fn evicted(&mut self, size: u64) -> Result<(), PolicyError> {
        self.uncache(size)?;
        self.evicted_items += 1;
        self.evicted_bytes += size;
        Ok(())
    }

    pub fn merge(&mut self, other: &Stats) {
        self.accesses += other.accesses;
        self.hits += other.hits;
        self.bytes_cached += other.bytes_cached;
        self.evicted_bytes += other.evicted_bytes;
        self.evicted_items += other.evicted_items;
    }
}

/// Result of one candidate capacity of a shadow policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurvePoint {
    /// Chunk size of the slab class the point belongs to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<u64>,
    pub capacity: u64,
    pub accesses: u64,
    pub hits: u64,
    pub bytes_cached: u64,
    pub hit_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyStats {
    pub policy: String,
    pub capacity: u64,
    #[serde(flatten)]
    pub counters: Stats,
    pub utilization: Option<f64>,
    pub hit_rate: Option<f64>,
    /// Requests that could not be cached under any circumstances.
    pub dropped: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub curve: Vec<CurvePoint>,
}

pub fn fmt_ratio(ratio: Option<f64>) -> String {
    match ratio {
        Some(ratio) => format!("{ratio:.6}"),
        None => NO_DATA.to_string(),
    }
}

pub fn report_line(name: &str, capacity: u64, stats: &Stats) -> String {
    let mut line = String::new();
    let _ = write!(
        line,
        "{} {} {} {} {} {}",
        name,
        fmt_ratio(stats.utilization(capacity)),
        capacity,
        stats.hits,
        stats.accesses,
        fmt_ratio(stats.hit_rate()),
    );
    line
}
