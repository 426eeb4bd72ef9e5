//! Command server: axum HTTP router over the control socket.
//!
//! Each connection carries one plain-text request/reply exchange:
//! `GET /list`, `GET /quit`, or `GET /?verb=..&alias=..&dir=..&port=..`.
//! Every mutation goes through [`apply_mutation`], which holds the registry
//! lock for the whole update so concurrent commands never interleave.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::UnixListener;
use tokio::sync::{broadcast, oneshot};
use tracing::{info, warn};

use crate::daemon::ShutdownSignal;
use crate::registry::{RegistryError, ServerRegistry};
use crate::request::{DecodeError, MutateQuery, Mutation, Verb};

/// Reply to a `quit` command.
pub const QUIT_REPLY: &str = "handyd is quitting now\n";

/// Shared state accessible to all command handlers.
pub struct CommandState {
    pub registry: Arc<Mutex<ServerRegistry>>,
    pub shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

/// Errors from dispatching a command, each mapped to a reply status.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("bad request: {0}")]
    BadRequest(#[from] DecodeError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl CommandError {
    pub fn status(&self) -> StatusCode {
        match self {
            CommandError::BadRequest(_) => StatusCode::BAD_REQUEST,
            CommandError::Registry(RegistryError::Bind(_)) => StatusCode::CONFLICT,
            CommandError::Registry(
                RegistryError::PortExhausted { .. } | RegistryError::ShuttingDown,
            ) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<crate::hosted::HostError> for CommandError {
    fn from(e: crate::hosted::HostError) -> Self {
        CommandError::Registry(RegistryError::Bind(e))
    }
}

impl IntoResponse for CommandError {
    fn into_response(self) -> Response {
        (self.status(), format!("{self}\n")).into_response()
    }
}

/// Lock the registry, recovering the data if a previous holder panicked.
pub fn lock_registry(registry: &Mutex<ServerRegistry>) -> MutexGuard<'_, ServerRegistry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Apply one mount mutation and return the confirmation line.
pub fn apply_mutation(
    registry: &Mutex<ServerRegistry>,
    mutation: &Mutation,
) -> Result<String, CommandError> {
    let Mutation {
        verb,
        alias,
        dir,
        port,
    } = mutation;
    let mut registry = lock_registry(registry);

    match verb {
        Verb::Add => {
            let server = registry.get_or_create(*port)?;
            // A mount is only recorded on a server that is accepting connections.
            server.ensure_listening()?;
            server.add_mount(alias, dir);
            Ok(format!(
                "{} dir {dir} as /{alias} on port {}\n",
                verb.past_tense(),
                server.port()
            ))
        }
        Verb::Remove => match registry.find_mut(*port) {
            Some(server) => {
                server.remove_mount(alias);
                Ok(format!(
                    "{} dir {dir} as /{alias} on port {}\n",
                    verb.past_tense(),
                    server.port()
                ))
            }
            None => {
                info!(alias, ?port, "Remove against a port with no server ignored");
                Ok(format!("nothing served as /{alias}, nothing removed\n"))
            }
        },
    }
}

/// Build the axum router with all command routes.
pub fn router(state: Arc<CommandState>) -> axum::Router {
    axum::Router::new()
        .route("/list", get(handle_list))
        .route("/quit", get(handle_quit))
        .route("/", get(handle_mutate))
        .with_state(state)
}

/// Serve commands on `listener` until `stop_rx` fires.
///
/// In-flight exchanges complete before this returns, so a `quit` reply is
/// always delivered.
pub async fn serve(
    listener: UnixListener,
    state: Arc<CommandState>,
    stop_rx: oneshot::Receiver<()>,
) -> Result<(), std::io::Error> {
    info!("Command server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = stop_rx.await;
            info!("Command server shutting down");
        })
        .await
}

// ── Route handlers ──────────────────────────────────────────────────────

async fn handle_list(State(state): State<Arc<CommandState>>) -> String {
    info!("Listing all ports per request");
    let listing = lock_registry(&state.registry).snapshot();
    listing.to_string()
}

async fn handle_quit(State(state): State<Arc<CommandState>>) -> &'static str {
    info!("Quit requested over control channel");
    if state.shutdown_tx.send(ShutdownSignal).is_err() {
        warn!("No shutdown coordinator is listening");
    }
    QUIT_REPLY
}

async fn handle_mutate(
    State(state): State<Arc<CommandState>>,
    Query(query): Query<MutateQuery>,
) -> Result<String, CommandError> {
    let mutation = Mutation::from_query(query).inspect_err(|e| {
        warn!(error = %e, "Rejected malformed command");
    })?;
    info!(
        verb = %mutation.verb,
        alias = %mutation.alias,
        dir = %mutation.dir,
        port = ?mutation.port,
        "Handling mount command"
    );
    apply_mutation(&state.registry, &mutation).inspect_err(|e| {
        warn!(error = %e, "Mount command failed");
    })
}
