use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::RoutingError;
use crate::host_user_table::HostUserTable;
use crate::message::Message;
use crate::router::{Delivery, Router};
use crate::stats::{RouterStats, RouterStatsSnapshot};
use crate::tree::{Direction, SharedTopology};

/// Hands messages down to clients connected to this Host.
///
/// Routes are resolved once per target Host and cached, including the
/// negative answer, so the tree is walked at most once per target until
/// the cache is cleared on rebuild.
pub struct ServerRouter {
    current_host: String,
    topology: SharedTopology,
    host_user_table: Arc<HostUserTable>,
    /// target host -> downward path, `None` if not below us.
    route_cache: Mutex<HashMap<String, Option<Vec<String>>>>,
    stats: RouterStats,
}

impl ServerRouter {
    pub fn new(
        current_host: impl Into<String>,
        topology: SharedTopology,
        host_user_table: Arc<HostUserTable>,
    ) -> Self {
        Self {
            current_host: current_host.into(),
            topology,
            host_user_table,
            route_cache: Mutex::new(HashMap::new()),
            stats: RouterStats::default(),
        }
    }

    /// Forget every cached route.
    pub fn clear_cache(&self) {
        self.route_cache.lock().clear();
    }

    pub fn cached_routes(&self) -> usize {
        self.route_cache.lock().len()
    }

    /// Downward path to `host`, from the cache when possible.
    fn resolve(&self, host: &str) -> Option<Vec<String>> {
        let mut cache = self.route_cache.lock();
        if let Some(route) = cache.get(host) {
            self.stats.record_cache_hit();
            return route.clone();
        }
        self.stats.record_cache_miss();

        // Nothing is cached before the first build, the answer would go stale.
        let tree = self.topology.get()?;
        let route = tree
            .route_between(&self.current_host, host)
            .ok()
            .filter(|route| route.direction == Direction::Down)
            .map(|route| route.path);
        cache.insert(host.to_string(), route.clone());
        route
    }

    fn drop_message(&self, message: &Message, reason: &RoutingError) {
        tracing::warn!(
            "server router: dropping message {} for {}: {reason}",
            message.id,
            message.target_address()
        );
        self.stats.record_dropped();
    }

    /// Target is connected to us directly: one copy per addressed user.
    fn route_to_direct_client(&self, message: Message) -> Result<Delivery, RoutingError> {
        let queues = if message.is_broadcast_to_users() {
            self.host_user_table
                .lookup_output_queues_for_host(&message.target_host)
        } else {
            self.host_user_table
                .lookup_output_queue_for_host_user(&message.target_host, &message.target_user_token)
                .map(|queue| vec![queue])
        };

        // The client may simply not be connected yet.
        let queues = match queues {
            Ok(queues) => queues,
            Err(e) => {
                self.drop_message(&message, &e);
                return Ok(Delivery::Dropped);
            }
        };

        tracing::debug!(
            "server router: {} -> {} to {} user queue(s) ({})",
            message.source_address(),
            message.target_address(),
            queues.len(),
            message.id
        );
        for queue in &queues {
            if queue.push_back(message.clone()).is_err() {
                tracing::warn!(
                    "server router: user queue of {} closed, skipping copy of {}",
                    message.target_host,
                    message.id
                );
            }
        }
        self.stats.record_routed();
        Ok(Delivery::Forwarded)
    }

    /// Target is further down: hand it to the one intermediate server on the path.
    fn route_via_intermediate(
        &self,
        message: Message,
        next_hop: &str,
    ) -> Result<Delivery, RoutingError> {
        let queues = match self.host_user_table.lookup_output_queues_for_host(next_hop) {
            Ok(queues) if !queues.is_empty() => queues,
            Ok(_) => {
                let e = RoutingError::HostNotConnected {
                    host: next_hop.to_string(),
                };
                self.drop_message(&message, &e);
                return Ok(Delivery::Dropped);
            }
            Err(e) => {
                self.drop_message(&message, &e);
                return Ok(Delivery::Dropped);
            }
        };
        if queues.len() > 1 {
            self.stats.record_dropped();
            return Err(RoutingError::AmbiguousNextHop {
                host: next_hop.to_string(),
                instances: queues.len(),
            });
        }

        tracing::debug!(
            "server router: {} -> {} via {next_hop} ({})",
            message.source_address(),
            message.target_address(),
            message.id
        );
        let id = message.id.clone();
        if queues[0].push_back(message).is_err() {
            tracing::warn!("server router: queue of {next_hop} closed, dropping message {id}");
            self.stats.record_dropped();
            return Ok(Delivery::Dropped);
        }
        self.stats.record_routed();
        Ok(Delivery::Forwarded)
    }
}

impl Router for ServerRouter {
    fn name(&self) -> &'static str {
        "server"
    }

    fn start(&self) -> Result<(), RoutingError> {
        tracing::info!(host = %self.current_host, "server router started");
        Ok(())
    }

    fn route_package(&self, message: Message) -> Result<Delivery, RoutingError> {
        let Some(path) = self.resolve(&message.target_host) else {
            self.stats.record_dropped();
            return Err(RoutingError::Unreachable {
                router: self.name(),
                from: self.current_host.clone(),
                to: message.target_host,
            });
        };

        match path.as_slice() {
            [_] => self.route_to_direct_client(message),
            [next_hop, ..] => self.route_via_intermediate(message, next_hop),
            [] => {
                self.stats.record_dropped();
                Err(RoutingError::Unreachable {
                    router: self.name(),
                    from: self.current_host.clone(),
                    to: message.target_host,
                })
            }
        }
    }

    fn can_reach_host(&self, host: &str) -> bool {
        self.resolve(host).is_some()
    }

    fn stats(&self) -> RouterStatsSnapshot {
        self.stats.snapshot()
    }
}
