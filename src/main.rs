#![forbid(unsafe_code)]

//! `storagesage` — the daemon binary entry point.
//!
//! Wires the shared library pieces (config, platform detection, audit store,
//! metrics registry, health checker, metrics/health HTTP surface, signal
//! handling) into a [`storagesage::daemon::loop_main::Scheduler`] and either
//! runs one cleanup cycle (`--once`) or ticks forever until a shutdown
//! signal arrives.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use storagesage::audit::store::AuditStore;
use storagesage::core::config::Config;
use storagesage::core::errors::StorageSageError;
use storagesage::daemon::loop_main::Scheduler;
use storagesage::daemon::signals::SignalHandler;
use storagesage::health::HealthChecker;
use storagesage::platform::pal::detect_platform;

mod cli;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = cli::Cli::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("storagesage: {err}");
            ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(4))
        }
    }
}

fn run(args: &cli::Cli) -> Result<(), StorageSageError> {
    let mut config = Config::load(&args.config)?;
    if args.dry_run {
        config.dry_run = true;
    }

    let platform = detect_platform()?;
    let audit = Arc::new(AuditStore::open(&config.database_path)?);

    let metrics = Arc::new(storagesage::metrics::registry::Metrics::new(
        &config.metrics_prefix,
    )?);

    let mut health = HealthChecker::new(Arc::clone(&metrics));
    {
        let audit_for_check = Arc::clone(&audit);
        health.register("database", Duration::from_secs(5), move || {
            audit_for_check.integrity_check()
        });
    }
    health.register("config", Duration::from_secs(5), || Ok(()));
    // `metrics_server` dials the HTTP listener itself; registered against the
    // configured port rather than a handle address, so it can be added
    // before the server starts and still exercise the same loopback path a
    // real `/health` scraper would use.
    let metrics_port = config.metrics_port;
    health.register("metrics_server", Duration::from_secs(5), move || {
        std::net::TcpStream::connect_timeout(
            &std::net::SocketAddr::from(([127, 0, 0, 1], metrics_port)),
            Duration::from_secs(2),
        )
        .map(|_| ())
        .map_err(|source| StorageSageError::HealthCheckFailed {
            component: "metrics_server".to_string(),
            details: source.to_string(),
        })
    });

    let health = Arc::new(health);
    let signals = SignalHandler::new();

    #[cfg(feature = "metrics")]
    let _server_handle = {
        let handle = storagesage::metrics::server::serve(
            config.metrics_port,
            Arc::clone(&metrics),
            Arc::clone(&health),
        )?;
        let shutdown_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let _health_thread = Arc::clone(&health).spawn_periodic(Duration::from_secs(30), shutdown_flag);
        handle
    };

    let scheduler = Scheduler::new(config, platform, audit, metrics, signals)?;

    if args.once {
        scheduler.run_once();
    } else {
        scheduler.run_forever();
    }

    Ok(())
}
