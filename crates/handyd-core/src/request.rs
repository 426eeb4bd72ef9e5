//! Normalized user requests and the command messages carried over the
//! control channel.
//!
//! A [`Request`] is what one invocation asks for. It reduces to a single
//! [`Command`], which the forwarder encodes as a request path and the
//! command server decodes again from the query string.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// What a single invocation asks for, after flag parsing and defaulting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Target port; `None` means "the last port used".
    pub port: Option<u16>,
    /// Directory to mount or unmount.
    pub root_dir: PathBuf,
    /// URL alias the directory is served under (no slashes at either end).
    pub alias: String,
    pub remove: bool,
    pub list: bool,
    pub quit: bool,
}

impl Request {
    /// Reduce the request to the one command it stands for.
    ///
    /// `list` wins over `quit`, which wins over a mount mutation.
    pub fn command(&self) -> Command {
        if self.list {
            Command::List
        } else if self.quit {
            Command::Quit
        } else {
            Command::Mutate(Mutation {
                verb: if self.remove { Verb::Remove } else { Verb::Add },
                alias: self.alias.clone(),
                dir: self.root_dir.display().to_string(),
                port: self.port,
            })
        }
    }
}

/// A command understood by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Quit,
    Mutate(Mutation),
}

impl Command {
    /// Path and query the forwarder requests for this command.
    pub fn path_and_query(&self) -> Result<String, serde_urlencoded::ser::Error> {
        match self {
            Command::List => Ok("/list".to_string()),
            Command::Quit => Ok("/quit".to_string()),
            Command::Mutate(mutation) => {
                let query = serde_urlencoded::to_string(mutation.to_query())?;
                Ok(format!("/?{query}"))
            }
        }
    }
}

/// Mount mutation verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Add,
    Remove,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Add => "add",
            Verb::Remove => "remove",
        }
    }

    /// Past tense, as used in confirmation lines.
    pub fn past_tense(self) -> &'static str {
        match self {
            Verb::Add => "added",
            Verb::Remove => "removed",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Verb {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(Verb::Add),
            "remove" => Ok(Verb::Remove),
            other => Err(DecodeError::BadVerb(other.to_string())),
        }
    }
}

/// Add or remove one mount on one port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub verb: Verb,
    pub alias: String,
    pub dir: String,
    pub port: Option<u16>,
}

impl Mutation {
    fn to_query(&self) -> MutateQuery {
        MutateQuery {
            verb: Some(self.verb.as_str().to_string()),
            alias: Some(self.alias.clone()),
            dir: Some(self.dir.clone()),
            // 0 marks "unspecified" on the wire
            port: Some(self.port.unwrap_or(0).to_string()),
        }
    }

    /// Decode a mutation from its query parameters. Every field is required.
    pub fn from_query(query: MutateQuery) -> Result<Self, DecodeError> {
        let verb = query.verb.ok_or(DecodeError::Missing("verb"))?.parse()?;
        let alias = query.alias.ok_or(DecodeError::Missing("alias"))?;
        let dir = query.dir.ok_or(DecodeError::Missing("dir"))?;
        let port = query.port.ok_or(DecodeError::Missing("port"))?;

        let alias = normalize_alias(&alias).ok_or(DecodeError::EmptyAlias)?;
        if dir.is_empty() {
            return Err(DecodeError::Missing("dir"));
        }
        let port: u16 = port
            .trim()
            .parse()
            .map_err(|_| DecodeError::BadPort(port.clone()))?;

        Ok(Self {
            verb,
            alias,
            dir,
            port: (port != 0).then_some(port),
        })
    }
}

/// Raw query parameters of a mutation request, as found on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MutateQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verb: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

/// Reasons a mutation request cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("missing required parameter `{0}`")]
    Missing(&'static str),

    #[error("unknown verb {0:?} (expected \"add\" or \"remove\")")]
    BadVerb(String),

    #[error("invalid port {0:?}")]
    BadPort(String),

    #[error("alias must not be empty")]
    EmptyAlias,
}

/// Strip leading and trailing slashes from an alias. `None` if nothing is left.
pub fn normalize_alias(alias: &str) -> Option<String> {
    let trimmed = alias.trim().trim_matches('/');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
