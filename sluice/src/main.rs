#![forbid(unsafe_code)]

use clap::Parser;
use sluice_lib::config::{load_from_path, Config};
use sluice_lib::guard::Throttled;
use sluice_lib::rate_limit::{PolicyRegistry, RateLimiterService, ThrottlingPolicy, TimeUnit};
use sluice_lib::telemetry::{encode_metrics, init_metrics, init_tracing};
use sluice_lib::SluiceError;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Sluice per-identity rate limiter")]
struct Cli {
    /// Path to configuration TOML file
    #[arg(short, long, value_name = "FILE", env = "SLUICE_CONFIG")]
    config: Option<PathBuf>,

    /// Operation to drive calls through
    #[arg(short, long, default_value = "DemoService::compute")]
    operation: String,

    /// Context value of every call (client address, header value, ...)
    #[arg(long, default_value = "127.0.0.1")]
    context: String,

    /// Give every thread its own context value instead of sharing one
    #[arg(long)]
    per_thread_context: bool,

    /// Calls issued by each thread
    #[arg(long, default_value_t = 10)]
    calls: u32,

    /// Number of calling threads
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Pause between two calls of one thread, in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Limit per second used when the operation has no configured policy
    #[arg(long, default_value_t = 5)]
    limit: u32,

    /// Print metrics in the Prometheus text format when done
    #[arg(long)]
    metrics: bool,
}

fn main() {
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => match load_from_path(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                init_fallback_tracing();
                error!(%err, path = %path.display(), "failed to load configuration");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    if let Err(err) = init_tracing(&cfg.logging.level, cfg.logging.show_target) {
        eprintln!("failed to initialize tracing: {err}");
        std::process::exit(1);
    }

    if let Err(err) = run(&cli, cfg) {
        error!(%err, "simulation failed");
        std::process::exit(1);
    }
}

fn run(cli: &Cli, cfg: Config) -> sluice_lib::Result<()> {
    let telemetry = if cfg.telemetry.metrics_enabled || cli.metrics {
        let (metrics, registry) =
            init_metrics().map_err(|e| SluiceError::Metrics(format!("Failed to init metrics: {e}")))?;
        Some((metrics, registry))
    } else {
        None
    };

    let service = Arc::new(RateLimiterService::from_settings(
        &cfg.throttling,
        telemetry.as_ref().map(|(metrics, _)| Arc::clone(metrics)),
    )?);
    let policies = PolicyRegistry::new(cfg.policies)?;
    info!(
        capacity = cfg.throttling.lru_cache_capacity,
        policies = policies.len(),
        "rate limiter ready"
    );

    let policy = match policies.get(&cli.operation) {
        Some(policy) => policy,
        None => {
            warn!(operation = %cli.operation, limit = cli.limit, "no policy configured, using command line limit");
            Arc::new(ThrottlingPolicy::new(cli.operation.as_str(), cli.limit, TimeUnit::Seconds))
        }
    };

    let guard = Arc::new(Throttled::new(Arc::clone(&service), policy, |ctx: &String| Some(ctx.clone())));

    let started = Instant::now();
    let handles: Vec<_> = (0..cli.threads)
        .map(|n| {
            let guard = Arc::clone(&guard);
            let context = if cli.per_thread_context {
                format!("{}#{n}", cli.context)
            } else {
                cli.context.clone()
            };
            let calls = cli.calls;
            let interval = cli.interval_ms.map(Duration::from_millis);
            thread::spawn(move || {
                let mut admitted = 0u32;
                for _ in 0..calls {
                    if guard.call(&context, || ()).is_ok() {
                        admitted += 1;
                    }
                    if let Some(interval) = interval {
                        thread::sleep(interval);
                    }
                }
                admitted
            })
        })
        .collect();

    let mut admitted = 0u64;
    for handle in handles {
        match handle.join() {
            Ok(n) => admitted += u64::from(n),
            Err(_) => warn!("calling thread panicked"),
        }
    }

    let total = u64::from(cli.calls) * cli.threads as u64;
    let stats = service.cache_stats();
    info!(
        operation = %cli.operation,
        total,
        admitted,
        rejected = total - admitted,
        tracked_keys = service.tracked_keys(),
        cache_hits = stats.hits,
        cache_misses = stats.misses,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "simulation finished"
    );

    if let Some((_, registry)) = &telemetry {
        println!("{}", encode_metrics(registry)?);
    }

    Ok(())
}

fn init_fallback_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
