use std::sync::Arc;

use crate::client_table::ClientTable;
use crate::error::RoutingError;
use crate::message::Message;
use crate::router::{Delivery, Router};
use crate::stats::{RouterStats, RouterStatsSnapshot};
use crate::tree::{Direction, SharedTopology};

/// Hands messages to the server this Host connects to.
///
/// Reaches every Host whose route from here starts upward, which includes
/// Hosts in sibling subtrees: the server re-resolves on arrival.
pub struct ClientRouter {
    current_host: String,
    topology: SharedTopology,
    client_table: Arc<ClientTable>,
    stats: RouterStats,
}

impl ClientRouter {
    pub fn new(
        current_host: impl Into<String>,
        topology: SharedTopology,
        client_table: Arc<ClientTable>,
    ) -> Self {
        Self {
            current_host: current_host.into(),
            topology,
            client_table,
            stats: RouterStats::default(),
        }
    }
}

impl Router for ClientRouter {
    fn name(&self) -> &'static str {
        "client"
    }

    fn start(&self) -> Result<(), RoutingError> {
        tracing::info!(host = %self.current_host, "client router started");
        Ok(())
    }

    fn route_package(&self, message: Message) -> Result<Delivery, RoutingError> {
        if !self.can_reach_host(&message.target_host) {
            self.stats.record_dropped();
            return Err(RoutingError::Unreachable {
                router: self.name(),
                from: self.current_host.clone(),
                to: message.target_host,
            });
        }

        tracing::debug!(
            "client router: {} -> {} via upstream server ({})",
            message.source_address(),
            message.target_address(),
            message.id
        );
        let id = message.id.clone();
        if self.client_table.to_server_queue().push_back(message).is_err() {
            tracing::warn!("client router: upstream queue closed, dropping message {id}");
            self.stats.record_dropped();
            return Ok(Delivery::Dropped);
        }
        self.stats.record_routed();
        Ok(Delivery::Forwarded)
    }

    fn can_reach_host(&self, host: &str) -> bool {
        let Some(tree) = self.topology.get() else {
            return false;
        };
        tree.route_between(&self.current_host, host)
            .is_ok_and(|route| route.direction == Direction::Up)
    }

    fn stats(&self) -> RouterStatsSnapshot {
        self.stats.snapshot()
    }
}
