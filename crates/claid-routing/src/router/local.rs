use std::sync::Arc;

use crate::error::RoutingError;
use crate::message::Message;
use crate::module_table::ModuleTable;
use crate::router::{Delivery, Router};
use crate::stats::{RouterStats, RouterStatsSnapshot};

/// Delivers messages addressed to this Host to its Modules.
///
/// Control messages jump the queue: they go to the front of the module
/// table's control queue. A data message with a target Module goes to the
/// output queue of that Module's runtime; one without a target Module is a
/// publication and is fanned out to every subscriber of its channel.
pub struct LocalRouter {
    current_host: String,
    module_table: Arc<ModuleTable>,
    stats: RouterStats,
}

impl LocalRouter {
    pub fn new(current_host: impl Into<String>, module_table: Arc<ModuleTable>) -> Self {
        Self {
            current_host: current_host.into(),
            module_table,
            stats: RouterStats::default(),
        }
    }

    pub fn current_host(&self) -> &str {
        &self.current_host
    }

    fn route_control_package(&self, message: Message) -> Result<Delivery, RoutingError> {
        let id = message.id.clone();
        if self.module_table.control_queue().push_front(message).is_err() {
            tracing::warn!("local router: control queue closed, dropping control message {id}");
            self.stats.record_dropped();
            return Ok(Delivery::Dropped);
        }
        tracing::debug!("local router: queued control message {id}");
        self.stats.record_routed();
        Ok(Delivery::Forwarded)
    }

    fn publish(&self, message: Message) -> Result<Delivery, RoutingError> {
        let copies = self
            .module_table
            .forward_package_to_all_subscribers(&message)
            .inspect_err(|_| self.stats.record_dropped())?;
        tracing::debug!(
            "local router: message {} on {} fanned out to {copies} subscribers",
            message.id,
            message.channel
        );
        self.stats.record_routed();
        Ok(Delivery::Forwarded)
    }
}

impl Router for LocalRouter {
    fn name(&self) -> &'static str {
        "local"
    }

    fn start(&self) -> Result<(), RoutingError> {
        tracing::info!(host = %self.current_host, "local router started");
        Ok(())
    }

    fn route_package(&self, message: Message) -> Result<Delivery, RoutingError> {
        if message.is_control() {
            return self.route_control_package(message);
        }
        if message.target_module.is_empty() {
            return self.publish(message);
        }

        let Some(queue) = self.module_table.lookup_output_queue(&message.target_module) else {
            self.stats.record_dropped();
            return Err(RoutingError::UnknownModule {
                module: message.target_module,
            });
        };

        tracing::debug!(
            "local router: {} -> {} ({})",
            message.source_address(),
            message.target_module,
            message.id
        );
        // A closed runtime queue means the runtime is shutting down.
        let id = message.id.clone();
        if queue.push_back(message).is_err() {
            tracing::warn!("local router: runtime queue closed, dropping message {id}");
            self.stats.record_dropped();
            return Ok(Delivery::Dropped);
        }
        self.stats.record_routed();
        Ok(Delivery::Forwarded)
    }

    fn can_reach_host(&self, host: &str) -> bool {
        host == self.current_host
    }

    fn stats(&self) -> RouterStatsSnapshot {
        self.stats.snapshot()
    }
}
