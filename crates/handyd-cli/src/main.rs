#![deny(unsafe_code)]

//! handyd CLI: serve local directories over HTTP through one shared daemon.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use handyd_core::control::ForwardError;
use handyd_core::request::normalize_alias;
use handyd_core::{NO_SERVER_REPLY, Request, StartError, Startup};

/// Expose directories as HTTP document roots without managing a server.
///
/// The first invocation becomes the daemon and keeps running; later invocations
/// forward their command to it.
#[derive(Parser, Debug)]
#[command(name = "handyd", version, about, long_about = None)]
struct Cli {
    /// Port to serve on. Defaults to the last port used.
    #[arg(short, long, value_name = "NUM")]
    port: Option<u16>,

    /// Directory served as document root. Defaults to the current directory.
    #[arg(short, long, value_name = "PATH")]
    dir: Option<PathBuf>,

    /// URL alias to serve under. Defaults to the directory's name.
    #[arg(short, long, value_name = "NAME")]
    alias: Option<String>,

    /// Stop serving the directory.
    #[arg(short, long, conflicts_with_all = ["list", "quit"])]
    remove: bool,

    /// List all running servers and served directories.
    #[arg(short, long, conflicts_with = "quit")]
    list: bool,

    /// Stop the daemon and every server it hosts.
    #[arg(short, long)]
    quit: bool,

    /// Path to configuration file.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).await?;
    handyd_core::logging::init(&config, cli.verbose);
    info!(
        port = ?cli.port,
        dir = ?cli.dir,
        alias = ?cli.alias,
        remove = cli.remove,
        list = cli.list,
        quit = cli.quit,
        "Parsed params"
    );

    let request = build_request(&cli, &std::env::current_dir()?)?;

    match handyd_core::start(&request, &config).await {
        Ok(Startup::Forwarded(reply)) => {
            print!("{reply}");
            Ok(ExitCode::SUCCESS)
        }
        Ok(Startup::NoServer) => {
            print!("{NO_SERVER_REPLY}");
            Ok(ExitCode::SUCCESS)
        }
        Ok(Startup::Daemon { reply, daemon }) => {
            print!("{reply}");
            std::io::stdout().flush()?;
            daemon.run().await?;
            Ok(ExitCode::SUCCESS)
        }
        Err(StartError::Forward(ForwardError::Rejected { status, body })) => {
            error!(status, "Daemon rejected the request");
            eprintln!("{body}");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            error!(error = %e, "Request failed");
            eprintln!("handyd: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Normalize parsed flags into a [`Request`], resolving paths against `cwd`.
fn build_request(cli: &Cli, cwd: &Path) -> Result<Request> {
    let root_dir = match &cli.dir {
        Some(dir) => cwd.join(dir),
        None => cwd.to_path_buf(),
    };
    let root_dir = std::path::absolute(&root_dir)
        .with_context(|| format!("cannot resolve directory {}", root_dir.display()))?;

    let alias = match &cli.alias {
        Some(alias) => normalize_alias(alias)
            .with_context(|| format!("alias {alias:?} is empty once slashes are removed"))?,
        None => default_alias(&root_dir),
    };

    Ok(Request {
        port: cli.port.filter(|port| *port != 0),
        root_dir,
        alias,
        remove: cli.remove,
        list: cli.list,
        quit: cli.quit,
    })
}

/// The directory's final component, or `root` for the filesystem root.
fn default_alias(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .and_then(|name| normalize_alias(&name))
        .unwrap_or_else(|| "root".to_string())
}

async fn load_config(path: Option<&Path>) -> Result<handyd_config::AppConfig> {
    match path {
        Some(path) if path.exists() => handyd_config::AppConfig::load(path)
            .await
            .with_context(|| format!("invalid config file {}", path.display())),
        Some(path) => {
            info!(path = %path.display(), "Config file not found, using defaults");
            Ok(handyd_config::AppConfig::default())
        }
        None => Ok(handyd_config::AppConfig::default()),
    }
}
