//! Daemon process: command serving, signal handling, and ordered shutdown.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use handyd_config::AppConfig;

use crate::control::server::{self, CommandError, CommandState, lock_registry};
use crate::control::{ControlChannel, SocketGuard};
use crate::registry::ServerRegistry;
use crate::request::Mutation;

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// The daemon: owner of the control channel and every hosted server.
pub struct Daemon {
    config: AppConfig,
    channel: ControlChannel,
    registry: Arc<Mutex<ServerRegistry>>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

impl Daemon {
    /// Create a daemon around a freshly claimed control channel.
    pub fn new(config: AppConfig, channel: ControlChannel) -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);
        let registry = Arc::new(Mutex::new(ServerRegistry::from_config(&config)));
        Self {
            config,
            channel,
            registry,
            shutdown_tx,
        }
    }

    /// Apply a mutation locally, exactly as if it had arrived over the channel.
    pub fn apply(&self, mutation: &Mutation) -> Result<String, CommandError> {
        server::apply_mutation(&self.registry, mutation)
    }

    /// Handle on the shared registry.
    pub fn registry(&self) -> Arc<Mutex<ServerRegistry>> {
        Arc::clone(&self.registry)
    }

    /// A sender that triggers shutdown, as a `quit` command does.
    pub fn shutdown_handle(&self) -> broadcast::Sender<ShutdownSignal> {
        self.shutdown_tx.clone()
    }

    /// Serve commands until `quit` or a termination signal, then shut down.
    pub async fn run(self) -> Result<(), DaemonError> {
        info!(
            version = %crate::build_info::version_string(),
            socket = %self.channel.path().display(),
            pid = std::process::id(),
            "handyd daemon starting"
        );

        // Install handlers before serving so an early signal is not lost.
        let mut signals = TerminationSignals::install().map_err(DaemonError::Signal)?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let (listener, guard) = self.channel.into_tokio()?;
        let state = Arc::new(CommandState {
            registry: Arc::clone(&self.registry),
            shutdown_tx: self.shutdown_tx.clone(),
        });
        let (stop_tx, stop_rx) = oneshot::channel();
        let mut task = tokio::spawn(server::serve(listener, state, stop_rx));

        let finished = tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Quit command received, stopping daemon");
                false
            }
            name = signals.recv() => {
                warn!(signal = name, "Termination signal received, stopping daemon");
                false
            }
            result = &mut task => {
                match result {
                    Ok(Ok(())) => warn!("Command server exited unexpectedly"),
                    Ok(Err(e)) => warn!(error = %e, "Command server failed"),
                    Err(e) => warn!(error = %e, "Command server task panicked"),
                }
                true
            }
        };

        let control = ControlHandle {
            stop_tx: Some(stop_tx),
            task: (!finished).then_some(task),
            guard,
        };
        ShutdownCoordinator::new(self.config.shutdown_grace())
            .shutdown(control, &self.registry)
            .await;

        info!("Daemon stopped");
        Ok(())
    }
}

/// The running command server, as handed to the [`ShutdownCoordinator`].
pub struct ControlHandle {
    pub stop_tx: Option<oneshot::Sender<()>>,
    pub task: Option<JoinHandle<Result<(), std::io::Error>>>,
    pub guard: SocketGuard,
}

/// Tears the daemon down in order: control channel first, then every
/// hosted server, so a racing `add` cannot bring a listener back.
pub struct ShutdownCoordinator {
    grace: Duration,
}

impl ShutdownCoordinator {
    /// `grace` bounds how long each phase waits for in-flight work to drain.
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    pub async fn shutdown(&self, control: ControlHandle, registry: &Mutex<ServerRegistry>) {
        let ControlHandle {
            stop_tx,
            task,
            guard,
        } = control;

        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(());
        }
        if let Some(mut task) = task {
            if tokio::time::timeout(self.grace, &mut task).await.is_err() {
                warn!("Command server did not drain in time, aborting it");
                task.abort();
                let _ = task.await;
            }
        }
        drop(guard);
        info!("Control channel closed");

        let pending = lock_registry(registry).stop_all();
        let count = pending.len();
        let drained = tokio::time::timeout(self.grace, async move {
            for task in pending {
                let _ = task.await;
            }
        })
        .await;
        match drained {
            Ok(()) => info!(servers = count, "All file servers stopped"),
            Err(_) => warn!(servers = count, "File servers did not drain in time"),
        }
    }
}

/// SIGINT and SIGTERM listeners.
struct TerminationSignals {
    interrupt: Signal,
    terminate: Signal,
}

impl TerminationSignals {
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

/// Errors from the daemon runtime.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("failed to install signal handlers: {0}")]
    Signal(std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{Role, elect};
    use crate::request::Verb;
    use tempfile::TempDir;

    fn test_config(tmp: &TempDir, port: u16) -> AppConfig {
        let mut config = AppConfig::default();
        config.daemon.socket_path = Some(tmp.path().join("handyd.sock").display().to_string());
        config.daemon.bind_addr = "127.0.0.1".to_string();
        config.daemon.port_range_start = port;
        config.daemon.port_range_end = port;
        config.daemon.shutdown_grace_ms = 500;
        config
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind(("127.0.0.1", 0))
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn claim(config: &AppConfig) -> ControlChannel {
        match elect(&config.socket_path()).unwrap() {
            Role::Daemon(channel) => channel,
            Role::Client(_) => panic!("socket unexpectedly in use"),
        }
    }

    #[tokio::test]
    async fn test_quit_stops_control_then_servers() {
        let tmp = TempDir::new().unwrap();
        let port = free_port();
        let config = test_config(&tmp, port);
        let socket = config.socket_path();

        let daemon = Daemon::new(config.clone(), claim(&config));
        daemon
            .apply(&Mutation {
                verb: Verb::Add,
                alias: "a".to_string(),
                dir: "/srv/a".to_string(),
                port: None,
            })
            .unwrap();
        let registry = daemon.registry();
        let quit = daemon.shutdown_handle();

        let run = tokio::spawn(daemon.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        quit.send(ShutdownSignal).unwrap();
        run.await.unwrap().unwrap();

        assert!(!socket.exists());
        let registry = lock_registry(&registry);
        assert_eq!(registry.find(Some(port)).map(|s| s.is_listening()), Some(false));
        // The port is free again.
        assert!(std::net::TcpListener::bind(("127.0.0.1", port)).is_ok());
    }

    #[tokio::test]
    async fn test_coordinator_aborts_stuck_command_server() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, free_port());
        let socket = config.socket_path();
        let (_, guard) = claim(&config).into_tokio().unwrap();
        let registry = Mutex::new(ServerRegistry::from_config(&config));

        // A command server that never drains; its sender drops only when aborted.
        let (alive_tx, alive_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await;
            Ok(())
        });

        ShutdownCoordinator::new(Duration::from_millis(50))
            .shutdown(
                ControlHandle {
                    stop_tx: None,
                    task: Some(task),
                    guard,
                },
                &registry,
            )
            .await;

        let aborted = tokio::time::timeout(Duration::from_secs(1), alive_rx).await;
        assert!(matches!(aborted, Ok(Err(_))));
        assert!(!socket.exists());
        assert!(matches!(
            lock_registry(&registry).get_or_create(None),
            Err(crate::registry::RegistryError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_coordinator_without_running_task() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, free_port());
        let socket = config.socket_path();
        let (_, guard) = claim(&config).into_tokio().unwrap();
        let registry = Mutex::new(ServerRegistry::from_config(&config));

        ShutdownCoordinator::new(Duration::from_millis(100))
            .shutdown(
                ControlHandle {
                    stop_tx: None,
                    task: None,
                    guard,
                },
                &registry,
            )
            .await;
        assert!(!socket.exists());
    }
}
