#![deny(unsafe_code)]

//! handyd core: single-instance daemon election and multi-port file hosting.
//!
//! Every invocation tries to claim a well-known control socket. The winner
//! becomes the daemon and hosts any number of HTTP file servers, one per
//! port, each serving several directories under distinct URL prefixes.
//! Later invocations find the socket taken and forward their command to
//! the daemon instead.

/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Control socket election, command server, and command forwarder.
pub mod control;
/// Daemon runtime and ordered shutdown.
pub mod daemon;
/// One file server on one port with its mount table.
pub mod hosted;
/// Log sink setup.
pub mod logging;
/// Port-keyed table of hosted servers.
pub mod registry;
/// Normalized requests and control-channel commands.
pub mod request;
/// Bind-or-forward startup.
pub mod startup;

pub use control::{CommandForwarder, ControlChannel, Role, elect};
pub use daemon::{Daemon, ShutdownCoordinator};
pub use hosted::{HostedServer, MountTable};
pub use registry::{Listing, ServerRegistry};
pub use request::{Command, Mutation, Request, Verb};
pub use startup::{NO_SERVER_REPLY, StartError, Startup, start};
