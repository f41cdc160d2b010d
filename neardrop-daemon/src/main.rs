// NearDrop daemon: one-shot file transfer over an established direct link.

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use neardrop_core::ViewState;
use neardrop_daemon::config::{self, Config};
use neardrop_daemon::controller::EventBus;
use neardrop_daemon::receiver::FileReceiver;
use neardrop_daemon::sender::FileSender;
use neardrop_daemon::transfer::{self, JobSlot};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        println!("neardrop-daemon {VERSION}");
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = config::load();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match args.first().map(String::as_str) {
            Some("receive") => run_receive(config).await,
            Some("send") => {
                let host: IpAddr = args
                    .get(1)
                    .context("missing host address")?
                    .parse()
                    .context("invalid host address")?;
                let source = PathBuf::from(args.get(2).context("missing source file")?);
                run_send(config, host, source).await
            }
            _ => {
                eprintln!("usage: neardrop-daemon [--version] <receive | send <host> <file>>");
                std::process::exit(2);
            }
        }
    })
}

/// Arm the listener for one inbound file and report bus traffic until the
/// job reaches its outcome.
async fn run_receive(config: Config) -> anyhow::Result<()> {
    let bus = EventBus::new();
    let job = JobSlot::default();
    let receiver = FileReceiver::new(bus.clone(), config.cache_dir.clone(), job.clone());

    let mut view = bus.subscribe_view();
    let mut log = bus.subscribe_log();
    receiver.start_listening().await;

    tokio::select! {
        outcome = observe(&mut view, &mut log) => report(outcome),
        _ = shutdown_signal() => {
            transfer::cancel_job(&job).await;
            info!("interrupted, transfer cancelled");
        }
    }
    Ok(())
}

/// Send one file to the group owner at `host` and report bus traffic until
/// the job reaches its outcome.
async fn run_send(config: Config, host: IpAddr, source: PathBuf) -> anyhow::Result<()> {
    let bus = EventBus::new();
    let job = JobSlot::default();
    let sender = FileSender::new(bus.clone(), config.cache_dir.clone(), job.clone());

    let mut view = bus.subscribe_view();
    let mut log = bus.subscribe_log();
    sender.send(host, source).await;

    tokio::select! {
        outcome = observe(&mut view, &mut log) => report(outcome),
        _ = shutdown_signal() => {
            transfer::cancel_job(&job).await;
            info!("interrupted, transfer cancelled");
        }
    }
    Ok(())
}

/// Print the log stream and view states until the job's terminal state.
async fn observe(
    view: &mut broadcast::Receiver<ViewState>,
    log: &mut broadcast::Receiver<String>,
) -> ViewState {
    loop {
        tokio::select! {
            line = log.recv() => {
                if let Ok(line) = line {
                    info!("{line}");
                }
            }
            state = view.recv() => match state {
                Ok(state) => {
                    info!("state: {state:?}");
                    if state.is_terminal() {
                        return state;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return ViewState::Failed { reason: "bus closed".into() };
                }
            },
        }
    }
}

fn report(outcome: ViewState) {
    match outcome {
        ViewState::Success { path } => info!("done: {}", path.display()),
        ViewState::Failed { reason } => info!("failed: {reason}"),
        other => info!("stopped in {other:?}"),
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
