//! Daemon test harness.
//!
//! [`TestEnv`] owns a temp directory holding the control socket, the log
//! file, and any document roots, and builds [`Request`]s against it the way
//! the CLI would.

use std::path::{Path, PathBuf};

use handyd_config::AppConfig;
use handyd_core::daemon::{DaemonError, ShutdownSignal};
use handyd_core::{Request, StartError, Startup};
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::TestConfigBuilder;

/// A test-scoped environment. The temp directory is deleted on drop.
pub struct TestEnv {
    pub config: AppConfig,
    temp_dir: TempDir,
}

impl TestEnv {
    /// An environment whose port range is exactly `port`.
    pub fn with_port(port: u16) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config = TestConfigBuilder::new()
            .socket_path(temp_dir.path().join("handyd.sock"))
            .log_file(temp_dir.path().join("handyd.log"))
            .port_range(port, port)
            .build();
        Self { config, temp_dir }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.config.socket_path()
    }

    /// Create a document root named `name` holding `index.html` with `content`.
    pub fn root(&self, name: &str, content: &str) -> PathBuf {
        let dir = self.temp_dir.path().join("roots").join(name);
        std::fs::create_dir_all(&dir).expect("failed to create root");
        std::fs::write(dir.join("index.html"), content).expect("failed to write index.html");
        dir
    }

    /// Run one invocation through the bind-or-forward startup.
    pub async fn invoke(&self, request: &Request) -> Result<Startup, StartError> {
        handyd_core::start(request, &self.config).await
    }

    /// Start a daemon by adding `root` as `alias`, and run it in the background.
    pub async fn spawn_daemon(&self, root: &Path, alias: &str) -> RunningDaemon {
        match self.invoke(&add(root, alias, None)).await {
            Ok(Startup::Daemon { reply, daemon }) => {
                let shutdown = daemon.shutdown_handle();
                RunningDaemon {
                    reply,
                    shutdown,
                    handle: tokio::spawn(daemon.run()),
                }
            }
            Ok(_) => panic!("expected this invocation to become the daemon"),
            Err(e) => panic!("daemon startup failed: {e}"),
        }
    }
}

/// A daemon running on a background task.
pub struct RunningDaemon {
    /// Reply to the request that started it.
    pub reply: String,
    pub shutdown: broadcast::Sender<ShutdownSignal>,
    pub handle: JoinHandle<Result<(), DaemonError>>,
}

impl RunningDaemon {
    /// Wait for the daemon to finish after a `quit`.
    pub async fn join(self) {
        self.handle
            .await
            .expect("daemon task panicked")
            .expect("daemon failed");
    }

    /// Trigger shutdown directly and wait for it.
    pub async fn stop(self) {
        let _ = self.shutdown.send(ShutdownSignal);
        self.join().await;
    }
}

fn base(root: &Path, alias: &str, port: Option<u16>) -> Request {
    Request {
        port,
        root_dir: root.to_path_buf(),
        alias: alias.to_string(),
        remove: false,
        list: false,
        quit: false,
    }
}

/// An `add` request.
pub fn add(root: &Path, alias: &str, port: Option<u16>) -> Request {
    base(root, alias, port)
}

/// A `remove` request.
pub fn remove(root: &Path, alias: &str, port: Option<u16>) -> Request {
    Request {
        remove: true,
        ..base(root, alias, port)
    }
}

/// A `list` request.
pub fn list() -> Request {
    Request {
        list: true,
        ..base(Path::new("/"), "root", None)
    }
}

/// A `quit` request.
pub fn quit() -> Request {
    Request {
        quit: true,
        ..base(Path::new("/"), "root", None)
    }
}
