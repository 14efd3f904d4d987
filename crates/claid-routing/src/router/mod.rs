/// Routing strategies.
///
/// A message is routed one Host-to-Host hop at a time. Each Host holds
/// three strategies, one per direction a message can leave it in, and a
/// routing table that maps every known Host name to the strategy that
/// reaches it:
///
/// - [`LocalRouter`]: the target Host is this Host; deliver to a Module.
/// - [`ClientRouter`]: the target is not below us; hand it to our server.
/// - [`ServerRouter`]: the target is below us; hand it to a connected client.
///
/// [`MasterRouter`] owns the table and the dispatch loop.
use std::fmt;

use crate::error::RoutingError;
use crate::message::Message;
use crate::stats::RouterStatsSnapshot;

mod client;
mod local;
mod master;
mod server;

pub use client::ClientRouter;
pub use local::LocalRouter;
pub use master::MasterRouter;
pub use server::ServerRouter;

/// One way of moving a message one hop closer to its target Host.
pub trait Router: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    fn start(&self) -> Result<(), RoutingError>;

    /// Queue `message` toward its next hop. Per-message failures are
    /// returned, never fatal to the router; a message the strategy accepts
    /// but cannot pass on (closed queue, client gone) is `Delivery::Dropped`.
    fn route_package(&self, message: Message) -> Result<Delivery, RoutingError>;

    /// Whether this strategy is the one that reaches `host` from here.
    fn can_reach_host(&self, host: &str) -> bool;

    fn stats(&self) -> RouterStatsSnapshot;
}

/// What a strategy did with a message it accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the next hop or a local Module.
    Forwarded,
    /// Logged and discarded.
    Dropped,
}

/// Which strategy a routing table entry selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RouteStrategy {
    Local,
    Client,
    Server,
}

impl fmt::Display for RouteStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteStrategy::Local => f.write_str("local"),
            RouteStrategy::Client => f.write_str("client"),
            RouteStrategy::Server => f.write_str("server"),
        }
    }
}
