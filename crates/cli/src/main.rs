use anyhow::Context;
use clap::Parser;
use config::Config;
use orchestrator::clock::SystemClock;
use orchestrator::firewall::PackageSet;
use orchestrator::notify::TracingNotifier;
use orchestrator::{ControlEvent, Services, SilentPort, Stores};
use serde_json::json;
use silentport::cli::{Cli, Command};
use silentport::platform::{LoggingTunnel, load_snapshot};
use silentport::signals::{SignalEvent, wait_for_signal};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_log::AsTrace;
use usage::{StaticUsageSource, UsageSnapshot};

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity.log_level_filter().as_trace())
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    debug!(config = ?cli);

    let config = load_config(cli.conffile.as_deref(), cli.statefile.as_deref())?;

    match cli.command {
        Command::Run { usage } => run(config, cli.conffile, cli.statefile, usage).await,
        command => oneshot(config, command).await,
    }
}

fn load_config(conffile: Option<&Path>, statefile: Option<&str>) -> anyhow::Result<Config> {
    let mut config = match conffile {
        Some(path) => Config::load(path)?,
        _ => Config::new(),
    };
    if let Some(statefile) = statefile {
        config.persistence.state_path = (!statefile.is_empty()).then(|| PathBuf::from(statefile));
    }
    Ok(config)
}

async fn build(
    config: Config,
    snapshot: UsageSnapshot,
) -> anyhow::Result<(SilentPort, Arc<StaticUsageSource>)> {
    let source = Arc::new(StaticUsageSource::new(snapshot));
    let services = Services {
        usage: source.clone(),
        tunnel: Arc::new(LoggingTunnel),
        notifier: Arc::new(TracingNotifier),
        clock: Arc::new(SystemClock),
    };
    let stores = Stores::open(&config.persistence)
        .await
        .context("failed to open state")?;
    let engine = SilentPort::build(config, services, stores).await?;
    Ok((engine, source))
}

async fn run(
    config: Config,
    conffile: Option<PathBuf>,
    statefile: Option<String>,
    usage: PathBuf,
) -> anyhow::Result<()> {
    let (mut engine, source) = build(config, load_snapshot(&usage)?).await?;

    let cancel = CancellationToken::new();
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let mut engine_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { engine.run_until(cancel, control_rx).await }
    });

    let (events_tx, events_rx) = flume::bounded(8);
    let mut signals = tokio::spawn(wait_for_signal(events_tx));
    info!("silentport running");

    loop {
        tokio::select! {
            res = &mut signals => {
                let res = res?;
                tracing::error!(error = ?res, "Error while waiting for signal");
                res?;
                anyhow::bail!("signal listener stopped");
            }
            res = &mut engine_task => {
                res??;
                return Ok(());
            }
            res = events_rx.recv_async() => {
                let event = res?;
                debug!(?event, "Received signal event");
                match event {
                    SignalEvent::DumpState => control_tx.send(ControlEvent::DumpState)?,
                    SignalEvent::Reload => {
                        source.replace(load_snapshot(&usage)?);
                        let config = load_config(conffile.as_deref(), statefile.as_deref())?;
                        control_tx.send(ControlEvent::Reload(config))?;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    cancel.cancel();
    engine_task.await??;
    Ok(())
}

async fn oneshot(config: Config, command: Command) -> anyhow::Result<()> {
    let snapshot = match &command {
        Command::Refresh { usage } => load_snapshot(usage)?,
        _ => UsageSnapshot::default(),
    };
    let (engine, _) = build(config, snapshot).await?;
    let controller = engine.controller();
    let packages = |packages: Vec<String>| -> Option<PackageSet> {
        (!packages.is_empty()).then(|| packages.into_iter().collect())
    };

    match command {
        Command::Run { .. } | Command::Status => {}
        Command::Refresh { .. } => {
            let report = engine.refresh_usage().await?;
            info!(?report, "refresh done");
        }
        Command::Enable { allow, packages: p } => {
            controller.enable(packages(p), allow).await?;
        }
        Command::Allow {
            duration,
            packages: p,
        } => {
            controller.allow_for_duration(duration, packages(p)).await?;
        }
        Command::BlockNow { packages: p } => {
            controller.block_now(packages(p)).await?;
        }
        Command::Block { packages: p } => {
            controller
                .apply_manual_block_list(p.into_iter().collect())
                .await?;
        }
        Command::Disable => {
            controller.disable().await?;
        }
        Command::Unblock { package, duration } => {
            controller.temporarily_unblock(&package, duration).await?;
        }
        Command::Whitelist { packages: p } => {
            controller
                .update_whitelisted_packages(p.into_iter().collect())
                .await?;
        }
        Command::Settings {
            allow_duration,
            manual_unblock,
        } => {
            if let Some(duration) = allow_duration {
                engine.settings().set_allow_duration(duration).await?;
            }
            if let Some(enabled) = manual_unblock {
                engine.settings().set_manual_firewall_unblock(enabled).await?;
            }
        }
    }

    print_status(&engine)
}

#[allow(clippy::print_stdout)]
fn print_status(engine: &SilentPort) -> anyhow::Result<()> {
    let state = engine.controller().state();
    let settings = engine.settings().current();
    let status = json!({
        "phase": format!("{:?}", state.phase()),
        "firewall": state,
        "settings": {
            "allow_duration_secs": settings.allow_duration.as_secs(),
            "manual_firewall_unblock": settings.manual_firewall_unblock,
        },
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
