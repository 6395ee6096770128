use thiserror::Error;

use crate::id::NodeId;

/// Canonical result for the lowering pipeline.
pub type Result<T> = std::result::Result<T, Error>;

/// Every error raised while rewriting or lowering a plan.
///
/// All of them are internal: a malformed tree is an optimizer defect, so
/// nothing here is retried or recovered locally.
#[derive(Debug, Error)]
pub enum Error {
    #[error("only physical nodes can be lowered, got logical node '{0}'")]
    LogicalNode(&'static str),

    #[error("variable '{0}' is not bound to a slot")]
    UnboundVariable(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("function '{name}' expects {expected} argument(s), got {actual}")]
    FunctionArity {
        name: String,
        expected: String,
        actual: usize,
    },

    #[error("shard filter: {0}")]
    ShardKey(String),

    #[error("no lowering properties registered for node {0}")]
    MissingNodeProps(NodeId),

    #[error("no scan definition named '{0}'")]
    MissingScanDefinition(String),

    #[error("path expression reached scalar lowering: {0}")]
    PathNotLowered(String),

    #[error("rewrite fixpoint not reached after {rounds} round(s)")]
    RewriteLimit { rounds: usize },

    #[error("projection '{0}' is already bound to a slot")]
    DuplicateSlot(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("Hashing error: {0}")]
    Hash(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}

impl Error {
    /// Message reported to the client for any failure at this layer.
    pub fn user_message(&self) -> &'static str {
        "unable to plan this query"
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}
