//! CLAID routing layer.
//!
//! Hosts form a tree of servers and clients; every Host runs a
//! [`MasterRouter`] that moves each message one hop closer to its target
//! Host: to a local Module, up to its server, or down to a connected
//! client. The per-Host tables ([`ModuleTable`], [`HostUserTable`],
//! [`ClientTable`]) hold the queues the routers push into; the transport
//! that drains them lives outside this crate.

pub mod client_table;
pub mod config;
pub mod error;
pub mod host_user_table;
pub mod message;
pub mod module_table;
pub mod queue;
pub mod router;
pub mod stats;
pub mod tree;

pub use client_table::ClientTable;
pub use config::{Configuration, HostDescription, HostDescriptions, ModuleDescription, RouterConfig};
pub use error::{ErrorKind, RoutingError};
pub use host_user_table::HostUserTable;
pub use message::{
    message_queue, now_ms, Address, Body, ControlKind, ControlMessage, Message, MessageBuilder,
    MessageQueue, Payload,
};
pub use module_table::{ChannelBinding, ChannelEntry, ChannelRole, ModuleTable};
pub use queue::{QueueForwarder, QueueMerger, SharedQueue, DEFAULT_POLL_INTERVAL};
pub use router::{
    ClientRouter, Delivery, LocalRouter, MasterRouter, RouteStrategy, Router, ServerRouter,
};
pub use stats::{RouterStats, RouterStatsSnapshot};
pub use tree::{
    Direction, NodeIndex, Route, RoutingNode, RoutingTree, RoutingTreeParser, SharedTopology,
    SubTree,
};
