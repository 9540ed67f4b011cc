use std::io;

use thiserror::Error;

#[derive(Debug, PartialEq, Error)]
pub enum ConfigError {
    #[error("slab growth factor must be a finite number greater than 1.0, got {0}")]
    InvalidGrowthFactor(f64),

    #[error("unrecognized policy: {0}")]
    UnknownPolicy(String),

    #[error("at least one policy must be selected")]
    NoPolicies,

    #[error("the slab page size cannot be zero")]
    ZeroPageSize,

    #[error("invalid value for {flag}: {reason}")]
    InvalidArgument { flag: String, reason: String },

    #[error("could not parse configuration: {0}")]
    Parse(String),
}

/// Structural damage inside a policy. Statistics gathered after one of
/// these are meaningless, so the run is aborted.
#[derive(Debug, PartialEq, Error)]
pub enum PolicyError {
    #[error("index entry for key {key} points at a vacant slot")]
    DanglingIndex { key: u64 },

    #[error("byte accounting underflow: removing {size} bytes from {current}")]
    Underflow { current: u64, size: u64 },

    #[error("index holds {indexed} keys but the eviction order holds {ordered} entries")]
    Membership { indexed: usize, ordered: usize },

    #[error("accounted {accounted} bytes but entries sum to {actual}")]
    SizeMismatch { accounted: u64, actual: u64 },

    #[error("{current} bytes cached exceeds the capacity of {capacity}")]
    OverCapacity { current: u64, capacity: u64 },
}

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("could not read trace: {0}")]
    Io(#[from] io::Error),

    #[error("malformed trace line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error("could not write stats: {0}")]
    Output(#[from] io::Error),

    #[error("could not encode stats: {0}")]
    Encode(#[from] serde_json::Error),
}
