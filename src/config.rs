use std::{collections::HashSet, fmt::Display, fs, num::ParseIntError, path::PathBuf, str::FromStr};

use log::info;
use pico_args::Arguments;
use serde::Deserialize;

use crate::{
    error::ConfigError,
    policy::{slab::reference_capacity, PolicyConfig, PolicyKind},
    request::Filter,
};

pub const USAGE: &str = "\
-f <path>         trace file, .xz traces are decompressed on the fly
-p <list>         policies: shadowlru, fifo, lru, slab, shadowslab (or 0-4)
-s <bytes>        simulated cache size
-u <float>        utilization factor applied to the default cache size
-a <list>         app ids to evaluate (default all)
-w <secs>         count hits only from this timestamp on
-l <n>            stop after n eligible requests
-g <float>        slab growth factor
-M                use the fixed reference slab classes
-c <path>         JSON run configuration
--config <json>   inline JSON run configuration
--candidates <l>  cache sizes projected by the shadow policies
--exact-hits      do not count admissions as hits
--json <path>     write stats as JSON
-v                incremental progress output";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub trace: PathBuf,
    pub policies: Vec<PolicyKind>,
    pub capacity: Option<u64>,
    pub utilization: f64,
    pub warmup_until: f64,
    pub request_limit: u64,
    #[serde(flatten)]
    pub filter: Filter,
    #[serde(flatten)]
    pub policy: PolicyConfig,
    pub json: Option<PathBuf>,
    pub verbose: bool,
    pub buffer_size: usize,
    pub queue_size: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            trace: PathBuf::from("data/m.cap.out"),
            policies: vec![PolicyKind::ShadowLru],
            capacity: None,
            utilization: 1.0,
            warmup_until: 86400.0,
            request_limit: 0,
            filter: Filter::default(),
            policy: PolicyConfig::default(),
            json: None,
            verbose: false,
            buffer_size: 1024 * 16,
            queue_size: 32,
        }
    }
}

impl SimConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads the optional JSON configuration named on the command line and
    /// lets the remaining flags override it.
    pub fn from_args(args: &mut Arguments) -> Result<Self, ConfigError> {
        let mut config = match value::<String>(args, "--config")? {
            Some(json) => SimConfig::from_json(&json)?,
            None => match value::<PathBuf>(args, "-c")? {
                Some(path) => {
                    let json = fs::read_to_string(&path).map_err(|err| {
                        ConfigError::Parse(format!("{}: {err}", path.display()))
                    })?;
                    SimConfig::from_json(&json)?
                }
                None => SimConfig::default(),
            },
        };
        config.apply_args(args)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_args(&mut self, args: &mut Arguments) -> Result<(), ConfigError> {
        if let Some(trace) = value(args, "-f")? {
            self.trace = trace;
        }
        if let Some(policies) = list(args, "-p", parse_policies)? {
            self.policies = policies;
        }
        if let Some(capacity) = value(args, "-s")? {
            self.capacity = Some(capacity);
        }
        if let Some(utilization) = value(args, "-u")? {
            self.utilization = utilization;
        }
        if let Some(apps) = list(args, "-a", parse_apps)? {
            self.filter.apps = Some(apps);
        }
        if let Some(warmup) = value(args, "-w")? {
            self.warmup_until = warmup;
        }
        if let Some(limit) = value(args, "-l")? {
            self.request_limit = limit;
        }
        if let Some(factor) = value(args, "-g")? {
            self.policy.growth_factor = factor;
        }
        if let Some(candidates) = list(args, "--candidates", parse_sizes)? {
            self.policy.candidate_capacities = Some(candidates);
        }
        if let Some(json) = value(args, "--json")? {
            self.json = Some(json);
        }
        if args.contains("-M") {
            self.policy.fixed_classes = true;
        }
        if args.contains("--exact-hits") {
            self.policy.count_admissions_as_hits = false;
        }
        if args.contains("-v") {
            self.verbose = true;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.policies.is_empty() {
            return Err(ConfigError::NoPolicies);
        }
        if !self.utilization.is_finite() || self.utilization < 0.0 {
            return Err(ConfigError::InvalidArgument {
                flag: "-u".to_string(),
                reason: format!("utilization must be a non-negative number, got {}", self.utilization),
            });
        }
        if self.buffer_size == 0 || self.queue_size == 0 {
            return Err(ConfigError::InvalidArgument {
                flag: "buffer_size/queue_size".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Explicit size, or the reference slab allocation scaled by utilization.
    pub fn capacity(&self) -> u64 {
        self.capacity
            .unwrap_or_else(|| (reference_capacity() as f64 * self.utilization) as u64)
    }

    pub fn log_parameters(&self) {
        let apps = match &self.filter.apps {
            Some(apps) => {
                let mut apps = apps.iter().collect::<Vec<_>>();
                apps.sort();
                format!("{apps:?}")
            }
            None => "all".to_string(),
        };
        let policies = self
            .policies
            .iter()
            .map(PolicyKind::name)
            .collect::<Vec<_>>()
            .join(",");

        info!("performing trace analysis on apps: {apps}");
        info!("policies: {policies}");
        info!("using trace file: {}", self.trace.display());
        info!("utilization rate: {}", self.utilization);
        info!("start counting hits at t = {}", self.warmup_until);
        info!("request limit: {}", self.request_limit);
        info!("global mem: {}", self.capacity());
        if self.policy.fixed_classes {
            info!("slab classes: fixed reference table");
        } else {
            info!("slab growth factor: {}", self.policy.growth_factor);
        }
        if !self.policy.count_admissions_as_hits {
            info!("counting only genuine hits");
        }
    }
}

fn value<T>(args: &mut Arguments, flag: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    args.opt_value_from_str(flag)
        .map_err(|err| ConfigError::InvalidArgument {
            flag: flag.to_string(),
            reason: err.to_string(),
        })
}

fn list<T, E: Display>(
    args: &mut Arguments,
    flag: &'static str,
    parse: fn(&str) -> Result<T, E>,
) -> Result<Option<T>, ConfigError> {
    args.opt_value_from_fn(flag, parse)
        .map_err(|err| ConfigError::InvalidArgument {
            flag: flag.to_string(),
            reason: err.to_string(),
        })
}

fn parse_policies(s: &str) -> Result<Vec<PolicyKind>, ConfigError> {
    s.split(',').map(str::parse).collect()
}

fn parse_apps(s: &str) -> Result<HashSet<u32>, ParseIntError> {
    s.split(',').map(|app| app.trim().parse()).collect()
}

fn parse_sizes(s: &str) -> Result<Vec<u64>, ParseIntError> {
    s.split(',').map(|size| size.trim().parse()).collect()
}
