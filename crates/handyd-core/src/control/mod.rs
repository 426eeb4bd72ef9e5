//! Control channel: the Unix socket that both elects the daemon and
//! carries commands to it.
//!
//! Binding the well-known socket path succeeds for exactly one process on
//! the host; that process becomes the daemon. Every later invocation finds
//! the path in use and forwards its command over the socket instead.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐        Unix socket         ┌────────────────┐
//! │  Forwarder  │───────────────────────────▶│ Command server │
//! │ (handyd ..) │   HTTP/1.1, plain text     │    (axum)      │
//! └─────────────┘                            └───────┬────────┘
//!                                                    │
//!                                            ┌───────▼────────┐
//!                                            │ ServerRegistry │──▶ HostedServer :port
//!                                            └────────────────┘
//! ```

pub mod client;
pub mod server;

use std::io;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

pub use client::{CommandForwarder, ForwardError};
pub use server::{CommandError, CommandState};

/// Errors from claiming the control channel.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("failed to bind control socket at {path}: {source}")]
    Bind { path: PathBuf, source: io::Error },
}

/// Outcome of the election: which role this process plays.
pub enum Role {
    /// This process owns the control channel.
    Daemon(ControlChannel),
    /// Another process owns it; commands go through the forwarder.
    Client(CommandForwarder),
}

/// Try to claim the control socket at `path`.
///
/// "Address in use" is the signal that a daemon is already running and
/// yields [`Role::Client`]; any other bind failure is an error. A socket
/// file left behind by a crashed daemon also yields [`Role::Client`], and
/// the forwarder then reports the daemon as unreachable.
pub fn elect(path: &Path) -> Result<Role, ControlError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    match UnixListener::bind(path) {
        Ok(listener) => {
            info!(path = %path.display(), "Claimed control socket, acting as daemon");
            Ok(Role::Daemon(ControlChannel {
                listener,
                guard: SocketGuard(path.to_path_buf()),
            }))
        }
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
            info!(path = %path.display(), "Control socket in use, forwarding to daemon");
            Ok(Role::Client(CommandForwarder::new(path)))
        }
        Err(source) => Err(ControlError::Bind {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// The bound control socket, owned by the daemon.
///
/// Dropping it (or its [`SocketGuard`]) removes the socket file, which
/// lets the next invocation become the daemon.
pub struct ControlChannel {
    listener: UnixListener,
    guard: SocketGuard,
}

impl ControlChannel {
    pub fn path(&self) -> &Path {
        &self.guard.0
    }

    /// Convert into a Tokio listener plus the guard that cleans up the
    /// socket file. Must be called from within a Tokio runtime.
    pub fn into_tokio(self) -> io::Result<(tokio::net::UnixListener, SocketGuard)> {
        self.listener.set_nonblocking(true)?;
        let listener = tokio::net::UnixListener::from_std(self.listener)?;
        Ok((listener, self.guard))
    }
}

/// Removes the control socket file when dropped.
#[derive(Debug)]
pub struct SocketGuard(PathBuf);

impl Drop for SocketGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => debug!(path = %self.0.display(), "Removed control socket"),
            Err(e) => debug!(path = %self.0.display(), error = %e, "Control socket already gone"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use tempfile::TempDir;

    #[test]
    fn test_first_bind_wins_second_forwards() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("handyd.sock");

        let first = elect(&path).unwrap();
        assert!(matches!(first, Role::Daemon(_)));
        assert!(path.exists());

        let second = elect(&path).unwrap();
        assert!(matches!(second, Role::Client(_)));

        // Releasing the channel removes the socket and reopens the election.
        drop(first);
        assert!(!path.exists());
        assert!(matches!(elect(&path).unwrap(), Role::Daemon(_)));
    }

    #[test]
    fn test_concurrent_election_is_exclusive() {
        let tmp = TempDir::new().unwrap();
        let path = Arc::new(tmp.path().join("handyd.sock"));
        let contenders = 8;
        let barrier = Arc::new(Barrier::new(contenders));

        let handles: Vec<_> = (0..contenders)
            .map(|_| {
                let path = Arc::clone(&path);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    elect(&path).unwrap()
                })
            })
            .collect();
        let roles: Vec<Role> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let daemons = roles.iter().filter(|r| matches!(r, Role::Daemon(_))).count();
        assert_eq!(daemons, 1);
        assert_eq!(roles.len() - daemons, contenders - 1);
    }

    #[test]
    fn test_unexpected_bind_failure_is_an_error() {
        let tmp = TempDir::new().unwrap();
        // A regular file as the parent directory cannot hold a socket.
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();

        let result = elect(&blocker.join("handyd.sock"));
        assert!(matches!(result, Err(ControlError::Bind { .. })));
    }
}
