mod bridge;
mod cli;
mod host;
mod ipc;
mod prefs;
mod surface;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use cli::{Cli, Command};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use bridge::BridgeError;
use bridge::context::{Bridge, BridgeConfig};
use host::{ExecSurfaceHost, HostSet, NotifySend, XclipClipboard};
use prefs::{PrefStore, PrefsError};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            url,
            retry_secs,
            debug,
            viewer,
        } => {
            let config = BridgeConfig {
                url,
                retry_interval: Duration::from_secs(retry_secs),
                debug,
                ..BridgeConfig::default()
            };
            if let Err(e) = run_daemon(cli.prefs, config, viewer).await {
                tracing::error!(error = %e, "bridge failed");
                eprintln!("sessionlinkd run: {e}");
                std::process::exit(1);
            }
        }
        Command::Enable => exit_on_error("enable", set_pref(cli.prefs, |s| s.set_enabled(true))),
        Command::Disable => {
            exit_on_error("disable", set_pref(cli.prefs, |s| s.set_enabled(false)));
        }
        Command::Hidpi { on } => exit_on_error("hidpi", set_pref(cli.prefs, |s| s.set_hidpi(on))),
        Command::Prefs => exit_on_error("prefs", print_prefs(cli.prefs)),
    }
}

fn exit_on_error(command: &str, result: Result<(), PrefsError>) {
    if let Err(e) = result {
        tracing::error!(error = %e, command, "preferences update failed");
        eprintln!("sessionlinkd {command}: {e}");
        std::process::exit(1);
    }
}

fn open_prefs(path: Option<PathBuf>) -> Result<PrefStore, PrefsError> {
    let path = match path {
        Some(path) => path,
        None => prefs::resolve_prefs_path()?,
    };
    PrefStore::load(path)
}

async fn run_daemon(
    prefs_path: Option<PathBuf>,
    config: BridgeConfig,
    viewer: Vec<String>,
) -> Result<(), BridgeError> {
    let store = open_prefs(prefs_path)?;
    tracing::info!(path = ?store.path(), prefs = ?store.get(), "preferences loaded");

    let (host_tx, host_rx) = mpsc::unbounded_channel();
    let host = HostSet {
        clipboard: Arc::new(XclipClipboard::new()),
        surfaces: Box::new(ExecSurfaceHost::new(viewer, host_tx.clone())),
        notifier: Box::new(NotifySend::new(host_tx)),
    };
    let bridge = Bridge::new(config, store, host);
    bridge::run(bridge, host_rx).await
}

fn set_pref(
    path: Option<PathBuf>,
    update: impl FnOnce(&mut PrefStore) -> Result<bool, PrefsError>,
) -> Result<(), PrefsError> {
    let mut store = open_prefs(path)?;
    if update(&mut store)? {
        println!("updated; send SIGHUP to a running daemon to apply");
    } else {
        println!("unchanged");
    }
    Ok(())
}

fn print_prefs(path: Option<PathBuf>) -> Result<(), PrefsError> {
    let store = open_prefs(path)?;
    if let Some(path) = store.path() {
        println!("# {}", path.display());
    }
    print!("{}", toml::to_string_pretty(&store.get())?);
    Ok(())
}
