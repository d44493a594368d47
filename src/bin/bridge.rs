use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use snmp_bridge::{
    actors::{
        listener::ListenerHandle,
        poller::{PollOrchestrator, PollSettings},
        scheduler::SchedulerHandle,
    },
    config::{Config, read_config_file},
    hec::Forwarder,
    snmp::{AsyncSnmpConnector, AsyncSnmpNotifications},
    util::{debug_enabled, get_default_config_file},
};
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short, long, default_value_t = get_default_config_file())]
    file: String,
}

fn init(debug: bool) {
    let level = if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = filter::Targets::new().with_targets(vec![
        ("snmp_bridge", level),
        ("async_snmp", LevelFilter::WARN),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false)
                .with_file(debug)
                .with_line_number(debug),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    init(debug_enabled());

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    trace!("started with args: {args:?}");
    info!("application started");

    let config = read_config_file(&args.file).context("failed to load config")?;
    let forwarder = Forwarder::from_config(&config.splunk)?;

    info!(enabled = config.trap.enabled, "trap receiver");
    let listener = if config.trap.enabled {
        match start_listener(&config, forwarder.clone()).await {
            Ok(handle) => Some(handle),
            // the process is still useful as long as polling runs
            Err(e) if config.poll.enabled => {
                error!("trap receiver disabled: {e:#}");
                None
            }
            Err(e) => return Err(e),
        }
    } else {
        None
    };

    info!(enabled = config.poll.enabled, "poller");
    let scheduler = if config.poll.enabled {
        Some(start_scheduler(&config, forwarder)?)
    } else {
        None
    };

    info!("waiting for traps or polling events");
    shutdown_signal().await;
    info!("received shutdown signal, stopping...");

    // in-flight work gets at most one cycle worth of time to finish
    let grace = config.poll.timeout() + config.splunk.delivery_timeout();

    if let Some(scheduler) = scheduler {
        if scheduler.shutdown().await.is_ok()
            && tokio::time::timeout(grace, scheduler.stopped()).await.is_err()
        {
            warn!("poll cycle still running after {}s, abandoning it", grace.as_secs());
        }
    }

    if let Some(listener) = listener {
        let _ = listener.shutdown().await;
        let _ = tokio::time::timeout(Duration::from_secs(1), listener.stopped()).await;
    }

    Ok(())
}

async fn start_listener(config: &Config, forwarder: Forwarder) -> anyhow::Result<ListenerHandle> {
    let addr = SocketAddr::new(config.trap.listen_addr, config.trap.trap_port);
    let principals = config.trap.principals()?;

    info!(
        "trap receiver enabled, starting on {addr} with {} user(s)",
        principals.len()
    );

    let source = AsyncSnmpNotifications::bind(addr, &principals).await?;
    info!("trap receiver listening on {}", source.local_addr());

    Ok(ListenerHandle::spawn(source, forwarder, config.device_names()))
}

fn start_scheduler(config: &Config, forwarder: Forwarder) -> anyhow::Result<SchedulerHandle> {
    let devices = config.device_descriptors()?;

    info!(
        "device polling enabled for {} device(s), starting with an interval of {} seconds",
        devices.len(),
        config.poll.interval
    );

    let orchestrator = PollOrchestrator::new(
        Arc::new(AsyncSnmpConnector),
        forwarder,
        PollSettings::from_config(&config.poll),
    );

    Ok(SchedulerHandle::spawn(
        orchestrator,
        devices,
        config.poll.interval(),
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
