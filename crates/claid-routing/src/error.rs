/// Routing-layer errors for CLAID.
///
/// Every variant names the host, module or channel it is about, so a
/// dropped message can be explained from the log line alone.
/// [`RoutingError::kind`] folds the variants onto the coarse
/// invalid-argument / already-exists / not-found taxonomy callers branch on.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    // ── Addressing ─────────────────────────────────────────────────────
    #[error("invalid address \"{address}\": expected exactly one ':' between host and module")]
    InvalidAddress { address: String },

    #[error("message {message_id} has no target host")]
    MissingTargetHost { message_id: String },

    #[error("no route from host \"{from}\" to host \"{to}\" via the {router} router")]
    Unreachable {
        router: &'static str,
        from: String,
        to: String,
    },

    #[error("next hop \"{host}\" is ambiguous: {instances} connected instances, expected exactly one")]
    AmbiguousNextHop { host: String, instances: usize },

    // ── Topology ───────────────────────────────────────────────────────
    #[error("no hosts were specified")]
    EmptyTopology,

    #[error("invalid host description \"{host}\": {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("host \"{host}\" is configured to connect to itself")]
    SelfConnection { host: String },

    #[error("host \"{host}\" was specified more than once")]
    DuplicateHost { host: String },

    #[error("server address \"{address}\" is declared by both \"{first}\" and \"{second}\"")]
    DuplicateServerAddress {
        address: String,
        first: String,
        second: String,
    },

    #[error(
        "host \"{second}\" does not connect to any host, but \"{first}\" was already chosen as \
         routing tree root"
    )]
    MultipleRoots { first: String, second: String },

    #[error("no root host: every host connects to another host")]
    NoRoot,

    #[error("host \"{host}\" connects to \"{target}\", which is not a known host")]
    UnknownConnectTarget { host: String, target: String },

    #[error("host \"{host}\" connects to \"{target}\", which is not a server")]
    ConnectTargetNotServer { host: String, target: String },

    #[error("host \"{host}\" is not reachable from the routing tree root (connection cycle)")]
    ConnectionCycle { host: String },

    #[error("host \"{host}\" cannot change from {before} to {after} during a reload")]
    TopologyChanged {
        host: String,
        before: String,
        after: String,
    },

    // ── Lookups ────────────────────────────────────────────────────────
    #[error("unknown host \"{host}\"")]
    UnknownHost { host: String },

    #[error("unknown module \"{module}\"")]
    UnknownModule { module: String },

    #[error("module \"{module}\" has no channel \"{channel}\"")]
    UnknownChannel { module: String, channel: String },

    #[error("no connected instance of host \"{host}\"")]
    HostNotConnected { host: String },

    #[error("user \"{user_token}\" of host \"{host}\" is not connected")]
    UserNotConnected { host: String, user_token: String },

    // ── Registration ───────────────────────────────────────────────────
    #[error("module \"{module}\" was registered more than once")]
    DuplicateModule { module: String },

    #[error(
        "module \"{module}\" already maps channel \"{channel}\" to connection \"{existing}\", \
         cannot remap it to \"{requested}\""
    )]
    ChannelConflict {
        module: String,
        channel: String,
        existing: String,
        requested: String,
    },

    #[error("connection \"{connection}\" carries {expected} payloads, module \"{module}\" presented {found}")]
    ChannelTypeMismatch {
        connection: String,
        module: String,
        expected: String,
        found: String,
    },

    #[error("module \"{module}\" does not publish on channel \"{channel}\"")]
    NotAPublisher { module: String, channel: String },

    #[error("invalid channel sample for module \"{module}\": {reason}")]
    InvalidChannelSample { module: String, reason: String },

    #[error("user \"{user_token}\" of host \"{host}\" is already connected")]
    UserAlreadyConnected { host: String, user_token: String },

    // ── Lifecycle ──────────────────────────────────────────────────────
    #[error("queue is closed")]
    QueueClosed,

    #[error("{component} was already started")]
    AlreadyStarted { component: &'static str },

    #[error("{component} is not running")]
    NotStarted { component: &'static str },

    #[error("routing table has not been built")]
    RoutingTableNotBuilt,

    #[error("failed to spawn {component} thread: {source}")]
    Spawn {
        component: &'static str,
        #[source]
        source: std::io::Error,
    },

    // ── Configuration input ────────────────────────────────────────────
    #[error("failed to read configuration {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

/// Coarse error classes shared by every routing component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    AlreadyExists,
    NotFound,
    /// Closed queues and lifecycle misuse (start twice, stop before start).
    Unavailable,
}

impl RoutingError {
    pub fn kind(&self) -> ErrorKind {
        use RoutingError::*;
        match self {
            InvalidAddress { .. }
            | MissingTargetHost { .. }
            | Unreachable { .. }
            | AmbiguousNextHop { .. }
            | EmptyTopology
            | InvalidHost { .. }
            | SelfConnection { .. }
            | MultipleRoots { .. }
            | NoRoot
            | ConnectTargetNotServer { .. }
            | ConnectionCycle { .. }
            | TopologyChanged { .. }
            | ChannelTypeMismatch { .. }
            | NotAPublisher { .. }
            | InvalidChannelSample { .. }
            | ConfigParse(_) => ErrorKind::InvalidArgument,

            DuplicateHost { .. }
            | DuplicateServerAddress { .. }
            | DuplicateModule { .. }
            | ChannelConflict { .. }
            | UserAlreadyConnected { .. }
            | AlreadyStarted { .. } => ErrorKind::AlreadyExists,

            UnknownConnectTarget { .. }
            | UnknownHost { .. }
            | UnknownModule { .. }
            | UnknownChannel { .. }
            | HostNotConnected { .. }
            | UserNotConnected { .. }
            | ConfigIo { .. } => ErrorKind::NotFound,

            QueueClosed | NotStarted { .. } | RoutingTableNotBuilt | Spawn { .. } => {
                ErrorKind::Unavailable
            }
        }
    }
}
