//! Error types for MediaShade.
//!
//! Nothing here is ever surfaced to the host page: every boundary in the
//! pipeline turns these into a log line and carries on (fail open).

use std::path::PathBuf;

use thiserror::Error;

use crate::dom::NodeId;

/// Failures reported by a [`crate::dom::Dom`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    /// The handle refers to a node that was removed (or never existed).
    #[error("node {0} is no longer part of the document")]
    Detached(NodeId),

    /// The operation needs an element but the node is text, a comment, etc.
    #[error("node {0} is not an element")]
    NotAnElement(NodeId),

    /// The attribute rejects writes (sealed or proxied property).
    #[error("attribute `{name}` on node {node} is read-only")]
    Sealed { node: NodeId, name: String },

    /// The element lacks the requested capability (e.g. `pause`).
    #[error("node {node} does not support `{capability}`")]
    Unsupported {
        node: NodeId,
        capability: &'static str,
    },

    /// The insertion would make a node its own ancestor.
    #[error("cannot insert node {child} under node {parent}")]
    Hierarchy { parent: NodeId, child: NodeId },

    /// A selector query could not be evaluated against this subtree.
    #[error("selector query failed under node {0}")]
    Query(NodeId),
}

/// Failures of the external settings store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The host API is absent or refused the request.
    #[error("settings store unavailable: {0}")]
    Unavailable(String),

    #[error("settings store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings file parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("settings file serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Crate-level error, used by startup and the options surface.
#[derive(Debug, Error)]
pub enum ShieldError {
    #[error(transparent)]
    Dom(#[from] DomError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Startup could not complete (no document root, observer refused, ...).
    #[error("initialization failed: {0}")]
    Init(String),
}

pub type DomResult<T> = Result<T, DomError>;
pub type ShieldResult<T> = Result<T, ShieldError>;
