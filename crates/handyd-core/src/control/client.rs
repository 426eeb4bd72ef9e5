//! Command forwarder: relays one command to the running daemon.
//!
//! Opens the control socket, performs a single HTTP/1.1 request/reply
//! exchange with `hyper`, and hands back the daemon's reply body. There
//! are no retries and no timeouts: a dead daemon shows up as a failed
//! connection.

use std::path::{Path, PathBuf};

use hyper::body::Bytes;
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tracing::debug;

use crate::request::Command;

/// Errors from forwarding a command.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error(
        "cannot reach the daemon at {path}: {reason} \
         (if no daemon is running, remove the stale socket file)"
    )]
    DaemonUnreachable { path: PathBuf, reason: String },

    #[error("failed to encode command: {0}")]
    Encode(String),

    #[error("{body}")]
    Rejected { status: u16, body: String },
}

/// Client side of the control channel.
#[derive(Debug, Clone)]
pub struct CommandForwarder {
    socket_path: PathBuf,
}

impl CommandForwarder {
    /// Create a forwarder targeting the given socket path.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send `command` to the daemon and return its reply body.
    pub async fn forward(&self, command: &Command) -> Result<String, ForwardError> {
        let path = command
            .path_and_query()
            .map_err(|e| ForwardError::Encode(e.to_string()))?;
        let (status, body) = self.get(&path).await?;

        let body = String::from_utf8_lossy(&body).into_owned();
        if !status.is_success() {
            return Err(ForwardError::Rejected {
                status: status.as_u16(),
                body: body.trim_end().to_string(),
            });
        }
        Ok(body)
    }

    fn unreachable(&self, reason: impl std::fmt::Display) -> ForwardError {
        ForwardError::DaemonUnreachable {
            path: self.socket_path.clone(),
            reason: reason.to_string(),
        }
    }

    /// Send a GET request over the Unix socket and return status and body.
    async fn get(&self, path: &str) -> Result<(hyper::StatusCode, Bytes), ForwardError> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| self.unreachable(e))?;
        let io = TokioIo::new(stream);

        let (mut sender, conn) =
            hyper::client::conn::http1::handshake::<_, http_body_util::Empty<Bytes>>(io)
                .await
                .map_err(|e| self.unreachable(format!("HTTP handshake failed: {e}")))?;

        // Drive the connection in the background
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::warn!(error = %e, "Control connection error");
            }
        });

        debug!(path, "Forwarding command");

        let req = hyper::Request::builder()
            .method(hyper::Method::GET)
            .uri(path)
            .header("host", "localhost")
            .body(http_body_util::Empty::<Bytes>::new())
            .map_err(|e| ForwardError::Encode(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| self.unreachable(format!("request failed: {e}")))?;
        let status = resp.status();

        let body = http_body_util::BodyExt::collect(resp.into_body())
            .await
            .map_err(|e| self.unreachable(format!("failed to read reply: {e}")))?
            .to_bytes();

        debug!(%status, "Daemon replied");
        Ok((status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tokio::sync::{broadcast, oneshot};

    use super::super::server::{self, CommandState, QUIT_REPLY};
    use crate::registry::ServerRegistry;
    use crate::request::{Mutation, Verb};

    #[tokio::test]
    async fn test_missing_socket_is_unreachable() {
        let tmp = TempDir::new().unwrap();
        let forwarder = CommandForwarder::new(tmp.path().join("absent.sock"));
        let result = forwarder.forward(&Command::List).await;
        assert!(matches!(
            result,
            Err(ForwardError::DaemonUnreachable { .. })
        ));
    }

    #[tokio::test]
    async fn test_stale_socket_is_unreachable() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("stale.sock");
        // Bound then dropped without unlinking: the file stays, nobody listens.
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let result = CommandForwarder::new(&path).forward(&Command::List).await;
        assert!(matches!(
            result,
            Err(ForwardError::DaemonUnreachable { .. })
        ));
    }

    #[tokio::test]
    async fn test_forward_against_live_server() {
        let tmp = TempDir::new().unwrap();
        let sock_path = tmp.path().join("handyd.sock");
        let listener = tokio::net::UnixListener::bind(&sock_path).unwrap();

        let (shutdown_tx, _) = broadcast::channel(1);
        let mut quit_rx = shutdown_tx.subscribe();
        let state = Arc::new(CommandState {
            registry: Arc::new(Mutex::new(ServerRegistry::new(
                [127, 0, 0, 1].into(),
                1..=1,
            ))),
            shutdown_tx,
        });

        let (stop_tx, stop_rx) = oneshot::channel();
        let server_handle = tokio::spawn(server::serve(listener, state, stop_rx));

        let forwarder = CommandForwarder::new(&sock_path);
        let listing = forwarder.forward(&Command::List).await.unwrap();
        assert_eq!(listing, "No directories are being served\n");

        // Missing dir reaches the daemon and is rejected verbatim.
        let bad = Command::Mutate(Mutation {
            verb: Verb::Remove,
            alias: "a".to_string(),
            dir: String::new(),
            port: None,
        });
        let err = forwarder.forward(&bad).await.unwrap_err();
        assert!(matches!(err, ForwardError::Rejected { status: 400, .. }));

        let reply = forwarder.forward(&Command::Quit).await.unwrap();
        assert_eq!(reply, QUIT_REPLY);
        assert!(quit_rx.recv().await.is_ok());

        stop_tx.send(()).unwrap();
        server_handle.await.unwrap().unwrap();
    }
}
