use thiserror::Error;

/// Boxed failure returned by a step or router.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("node `{0}` is registered more than once")]
    DuplicateNode(String),

    #[error("`{0}` is reserved for the terminal marker and cannot name a node")]
    ReservedName(String),

    #[error("no entry point set")]
    MissingEntryPoint,

    #[error("entry point set more than once (`{first}`, then `{second}`)")]
    MultipleEntryPoints { first: String, second: String },

    #[error("edge `{from}` -> `{to}` references unknown node `{missing}`")]
    DanglingEdge {
        from: String,
        to: String,
        missing: String,
    },

    #[error("conditional edges registered on unknown node `{0}`")]
    DanglingRouter(String),

    #[error("node `{0}` has more than one outgoing transition")]
    AmbiguousTransition(String),

    #[error("router on `{from}` chose unknown node `{to}`")]
    UnknownNode { from: String, to: String },

    #[error("node `{node}` failed: {source}")]
    NodeFailed {
        node: String,
        #[source]
        source: BoxError,
    },

    #[error("router on `{node}` failed: {source}")]
    RouterFailed {
        node: String,
        #[source]
        source: BoxError,
    },

    #[error("workflow exceeded the limit of {0} steps")]
    StepLimitExceeded(usize),

    #[error("workflow cancelled")]
    Cancelled,
}

impl GraphError {
    /// The step or router failure underneath, if any.
    pub fn node_source(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::NodeFailed { source, .. } | Self::RouterFailed { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
