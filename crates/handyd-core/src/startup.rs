//! Bind-or-forward startup: turns one [`Request`] into either a forwarded
//! command or a new daemon.

use tracing::info;

use handyd_config::AppConfig;

use crate::control::{self, CommandError, ControlError, ForwardError, Role};
use crate::daemon::Daemon;
use crate::request::{Command, Request, Verb};

/// Reply printed when a command needs a daemon and none is running.
pub const NO_SERVER_REPLY: &str = "No server is running\n";

/// How an invocation ended up being handled.
pub enum Startup {
    /// A daemon was already running; this is its reply.
    Forwarded(String),
    /// No daemon was running and the request had nothing to start one for.
    NoServer,
    /// This process is now the daemon and has applied its own request.
    Daemon { reply: String, daemon: Daemon },
}

/// Errors from starting up.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Forward(#[from] ForwardError),

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Elect this process's role and act on `request` accordingly.
///
/// Must be called from within a Tokio runtime.
pub async fn start(request: &Request, config: &AppConfig) -> Result<Startup, StartError> {
    let command = request.command();

    let channel = match control::elect(&config.socket_path())? {
        Role::Client(forwarder) => {
            let reply = forwarder.forward(&command).await?;
            return Ok(Startup::Forwarded(reply));
        }
        Role::Daemon(channel) => channel,
    };

    match command {
        Command::Mutate(mutation) if mutation.verb == Verb::Add => {
            let daemon = Daemon::new(config.clone(), channel);
            // On failure the daemon is dropped, releasing the socket again.
            let reply = daemon.apply(&mutation)?;
            Ok(Startup::Daemon { reply, daemon })
        }
        other => {
            info!(command = ?other, "No daemon running, nothing to do");
            drop(channel);
            Ok(Startup::NoServer)
        }
    }
}
