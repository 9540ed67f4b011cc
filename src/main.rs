mod config;
mod error;
mod policy;
mod request;
mod stats;
mod trace;

use std::{fs, process, time::Instant};

use log::{error, info, warn};

use crate::{
    config::{SimConfig, USAGE},
    error::{SimError, TraceError},
    policy::{AnyPolicy, Policy},
    trace::{Block, Trace},
};

const PROGRESS_MASK: u64 = (1 << 18) - 1;

fn main() {
    env_logger::builder().format_timestamp(None).init();

    if let Err(err) = run() {
        error!("{err}");
        process::exit(1);
    }
}

fn run() -> Result<(), SimError> {
    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        eprintln!("{USAGE}");
        return Ok(());
    }

    let config = SimConfig::from_args(&mut args)?;
    let unused = args.finish();
    if !unused.is_empty() {
        warn!("ignoring unrecognized arguments: {unused:?}");
    }
    config.log_parameters();

    let capacity = config.capacity();
    let mut policies = config
        .policies
        .iter()
        .map(|&kind| AnyPolicy::new(kind, capacity, &config.policy))
        .collect::<Result<Vec<_>, _>>()?;

    let trace = Trace::read(config.trace.clone(), config.buffer_size, config.queue_size)
        .map_err(TraceError::from)?;

    let start = Instant::now();
    let processed = simulate(&mut policies, &config, trace.rec.iter())?;
    info!(
        "processed {processed} requests in {:.3}s",
        start.elapsed().as_secs_f64()
    );

    for policy in &policies {
        info!(
            "{}: {} of {} bytes in use",
            policy.kind(),
            policy.current_size(),
            policy.capacity()
        );
        let dropped = policy.stats().dropped;
        if dropped > 0 {
            info!("{}: {dropped} requests could not be cached", policy.kind());
        }
        println!("{}", policy.report_header());
        println!("{}", policy.report());
    }

    if let Some(path) = &config.json {
        let stats = policies.iter().map(|p| p.stats()).collect::<Vec<_>>();
        let stats_file = fs::File::create(path)?;
        serde_json::to_writer_pretty(stats_file, &stats)?;
        info!("wrote stats to {}", path.display());
    }
    Ok(())
}

/// Feeds every eligible request to every policy and returns how many
/// requests were simulated.
fn simulate<I>(policies: &mut [AnyPolicy], config: &SimConfig, blocks: I) -> Result<u64, SimError>
where
    I: IntoIterator<Item = Block>,
{
    let mut processed = 0u64;
    let mut last_progress = Instant::now();

    'trace: for block in blocks {
        for req in block? {
            if config.request_limit != 0 && processed >= config.request_limit {
                break 'trace;
            }
            if !config.filter.admits(&req) {
                continue;
            }

            let warmup = req.time < config.warmup_until;
            for policy in policies.iter_mut() {
                policy.process(&req, warmup)?;
                if cfg!(debug_assertions) {
                    policy.check_invariants().inspect_err(|_| {
                        error!(
                            "{} broke after request {processed} (key {} at t = {})",
                            policy.kind(),
                            req.key,
                            req.time
                        )
                    })?;
                }
            }
            processed += 1;

            if config.verbose && processed & PROGRESS_MASK == 0 {
                let now = Instant::now();
                let rate = (PROGRESS_MASK + 1) as f64 / (now - last_progress).as_secs_f64();
                info!("progress: t = {} rate: {rate:.0} requests/s", req.time);
                last_progress = now;
            }
        }
    }

    for policy in policies.iter() {
        policy.check_invariants()?;
    }
    Ok(processed)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::{
        policy::{PolicyConfig, PolicyKind},
        request::{get, OpType, Request},
    };

    fn policies(kinds: &[PolicyKind], capacity: u64) -> Vec<AnyPolicy> {
        let config = PolicyConfig {
            candidate_capacities: Some(vec![capacity / 2, capacity]),
            slab_page_size: 100,
            ..PolicyConfig::default()
        };
        kinds
            .iter()
            .map(|&kind| AnyPolicy::new(kind, capacity, &config).unwrap())
            .collect()
    }

    fn at(time: f64, mut req: Request) -> Request {
        req.time = time;
        req
    }

    #[test]
    fn warmup_requests_fill_cache_without_counting() {
        let config = SimConfig {
            warmup_until: 3.0,
            ..SimConfig::default()
        };
        let mut policies = policies(&[PolicyKind::Fifo, PolicyKind::Lru], 1000);
        let trace = vec![
            at(0.0, get(1, 100)),
            at(1.0, get(2, 100)),
            at(2.0, get(3, 100)),
            at(3.0, get(1, 100)),
            at(4.0, get(4, 100)),
        ];

        let processed = simulate(&mut policies, &config, vec![Ok(trace)]).unwrap();
        assert_eq!(processed, 5);
        for policy in &policies {
            let stats = policy.stats();
            assert_eq!(stats.counters.accesses, 2);
            assert_eq!(policy.current_size(), 400);
        }
    }

    #[test]
    fn ineligible_requests_are_skipped() {
        let mut config = SimConfig {
            warmup_until: 0.0,
            ..SimConfig::default()
        };
        config.filter.apps = Some(HashSet::from([1]));

        let mut set = get(1, 100);
        set.op = OpType::Set;
        let mut other_app = get(2, 100);
        other_app.app_id = 9;

        let mut policies = policies(&[PolicyKind::Slab, PolicyKind::ShadowLru], 1000);
        let trace = vec![set, get(3, 0), other_app, get(4, 100)];
        let processed = simulate(&mut policies, &config, vec![Ok(trace)]).unwrap();

        assert_eq!(processed, 1);
        for policy in &policies {
            assert_eq!(policy.stats().counters.accesses, 1);
        }
    }

    #[test]
    fn request_limit_stops_the_run() {
        let config = SimConfig {
            warmup_until: 0.0,
            request_limit: 3,
            ..SimConfig::default()
        };
        let mut policies = policies(&[PolicyKind::Fifo], 1000);
        let blocks = vec![
            Ok(vec![get(1, 10), get(2, 10)]),
            Ok(vec![get(3, 10), get(4, 10)]),
        ];
        assert_eq!(simulate(&mut policies, &config, blocks).unwrap(), 3);
        assert_eq!(policies[0].current_size(), 30);
    }

    #[test]
    fn trace_error_aborts_the_run() {
        let config = SimConfig::default();
        let mut policies = policies(&[PolicyKind::Fifo], 1000);
        let blocks = vec![
            Ok(vec![get(1, 10)]),
            Err(TraceError::Parse {
                line: 2,
                reason: "bad".to_string(),
            }),
        ];
        assert!(matches!(
            simulate(&mut policies, &config, blocks),
            Err(SimError::Trace(TraceError::Parse { line: 2, .. }))
        ));
    }

    #[test]
    fn resizes_across_classes_keep_every_policy_consistent() {
        let config = SimConfig {
            warmup_until: 0.0,
            ..SimConfig::default()
        };
        let kinds = [
            PolicyKind::Fifo,
            PolicyKind::Lru,
            PolicyKind::Slab,
            PolicyKind::ShadowLru,
            PolicyKind::ShadowSlab,
        ];
        let mut policies = policies(&kinds, 2000);

        // keys keep changing size, often enough to change slab class
        let mut rng = fastrand::Rng::with_seed(11);
        let trace = (0..5_000)
            .map(|_| get(rng.u64(0..50), rng.u32(1..400)))
            .collect::<Vec<_>>();
        assert_eq!(simulate(&mut policies, &config, vec![Ok(trace)]).unwrap(), 5_000);

        for policy in &policies {
            let stats = policy.stats();
            assert!(stats.counters.accesses >= 5_000, "{}", policy.kind());
            assert!(stats.counters.hits <= stats.counters.accesses);
        }
    }
}
