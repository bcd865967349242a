//! perfcollectd - Windows performance counter exporter daemon.
//!
//! Scrapes the enabled subsystems on an interval and writes the metrics in the
//! Prometheus text format to stdout or to a file.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use perfcollect::collector::{CollectError, MultiCollector, host, perfcounter};
use perfcollect::config::Config;
use perfcollect::metrics::{Metric, render_text};
#[cfg(not(windows))]
use perfcollect::pdh::MockPdh;
#[cfg(windows)]
use perfcollect::pdh::NativePdh;
use perfcollect::pdh::PdhApi;

/// Windows performance counter exporter.
#[derive(Parser)]
#[command(name = "perfcollectd", about = "Windows performance counter exporter", version)]
struct Args {
    /// Path to a JSON configuration file. Defaults apply when omitted.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Scrape interval in seconds.
    #[arg(short, long, default_value = "15")]
    interval: u64,

    /// Scrape once and exit. Exits non-zero if any collector failed.
    #[arg(long)]
    once: bool,

    /// Write metrics to this file (replaced atomically) instead of stdout.
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Logs go to stderr so stdout carries only metrics.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["perfcollectd", "perfcollect"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(windows)]
fn open_pdh() -> NativePdh {
    NativePdh::new()
}

#[cfg(not(windows))]
fn open_pdh() -> MockPdh {
    warn!("PDH is only available on Windows, serving the simulated host");
    MockPdh::typical_host()
}

/// Builds every enabled subsystem, closing the ones already built on failure.
fn build_subsystems<P>(api: &P, config: &Config) -> Result<Vec<MultiCollector>, CollectError>
where
    P: PdhApi + Clone + 'static,
{
    let mut subsystems: Vec<MultiCollector> = Vec::new();
    for name in &config.collectors.enabled {
        let mut multi = MultiCollector::new(config.namespace.as_str(), name.as_str());
        let result = match name.as_str() {
            host::SUBSYSTEM => multi.build(
                &config.host.enabled,
                host::registrations(api, &config.namespace),
            ),
            perfcounter::SUBSYSTEM => multi.build(
                &config.perfcounter.enabled_objects(),
                perfcounter::registrations(api, &config.namespace, &config.perfcounter),
            ),
            other => Err(CollectError::UnknownCollector {
                subsystem: "collectors".to_string(),
                name: other.to_string(),
                known: vec![host::SUBSYSTEM.to_string(), perfcounter::SUBSYSTEM.to_string()],
            }),
        };
        if let Err(e) = result {
            close_all(&mut subsystems);
            return Err(e);
        }
        subsystems.push(multi);
    }
    Ok(subsystems)
}

fn close_all(subsystems: &mut [MultiCollector]) {
    for multi in subsystems {
        if let Err(e) = multi.close() {
            warn!("Failed to close {}: {}", multi.subsystem(), e);
        }
    }
}

/// Scrapes every subsystem. Returns the metrics and whether all collectors succeeded.
fn scrape_all(subsystems: &[MultiCollector]) -> (Vec<Metric>, bool) {
    let mut metrics = Vec::new();
    let mut ok = true;
    for multi in subsystems {
        let scrape = multi.scrape();
        debug!(
            "Scraped {}: {} metrics in {:?}",
            multi.subsystem(),
            scrape.metrics.len(),
            scrape.duration
        );
        if let Some(e) = scrape.error {
            error!("Scrape of {} incomplete: {}", multi.subsystem(), e);
            ok = false;
        }
        metrics.extend(scrape.metrics);
    }
    (metrics, ok)
}

/// Replaces `path` with `content` via a temp file and rename.
fn write_atomically(path: &Path, content: &str) -> std::io::Result<()> {
    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    let mut file = fs::File::create(&temp_path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)
}

fn publish(output: Option<&Path>, text: &str) -> std::io::Result<()> {
    match output {
        Some(path) => write_atomically(path, text),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            stdout.flush()
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    info!("perfcollectd {} starting", env!("CARGO_PKG_VERSION"));

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Config: namespace={}, subsystems=[{}], interval={}s",
        config.namespace,
        config.collectors.enabled.join(", "),
        args.interval
    );

    let api = open_pdh();
    let mut subsystems = match build_subsystems(&api, &config) {
        Ok(subsystems) => subsystems,
        Err(e) => {
            error!("Failed to build collectors: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let interval = Duration::from_secs(args.interval.max(1));

    // Setup graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let mut exit = ExitCode::SUCCESS;
    let mut scrape_count: u64 = 0;

    info!("Starting scrape loop");

    while running.load(Ordering::SeqCst) {
        let (metrics, ok) = scrape_all(&subsystems);
        scrape_count += 1;

        match render_text(&metrics) {
            Ok(text) => {
                if let Err(e) = publish(args.output.as_deref(), &text) {
                    error!("Failed to write metrics: {}", e);
                    ok_or_fail(&mut exit, false);
                }
            }
            Err(e) => {
                error!("Failed to encode metrics: {}", e);
                ok_or_fail(&mut exit, false);
            }
        }
        info!(
            "Scrape #{} at {}: {} metrics",
            scrape_count,
            Utc::now().format("%H:%M:%S"),
            metrics.len()
        );

        if args.once {
            ok_or_fail(&mut exit, ok);
            break;
        }

        // Sleep with periodic checks for shutdown signal
        let sleep_interval = Duration::from_millis(100);
        let mut remaining = interval;
        while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
            let sleep_time = remaining.min(sleep_interval);
            std::thread::sleep(sleep_time);
            remaining = remaining.saturating_sub(sleep_time);
        }
    }

    info!("Shutting down...");
    close_all(&mut subsystems);
    info!("Shutdown complete");

    exit
}

fn ok_or_fail(exit: &mut ExitCode, ok: bool) {
    if !ok {
        *exit = ExitCode::FAILURE;
    }
}
