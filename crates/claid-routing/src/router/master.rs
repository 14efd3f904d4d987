/// Per-Host routing entry point.
///
/// Merges every inbound source (local Modules, connected clients, the
/// upstream server) into one queue, and runs a dispatch thread that looks
/// up each message's target Host in the routing table and hands it to the
/// matching strategy. Per-message failures are logged and the message is
/// dropped; the loop keeps going.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::RwLock;

use crate::client_table::ClientTable;
use crate::config::{Configuration, HostDescriptions, RouterConfig};
use crate::error::RoutingError;
use crate::host_user_table::HostUserTable;
use crate::message::{message_queue, Message, MessageQueue};
use crate::module_table::ModuleTable;
use crate::queue::QueueMerger;
use crate::router::{ClientRouter, Delivery, LocalRouter, RouteStrategy, Router, ServerRouter};
use crate::stats::{RouterStats, RouterStatsSnapshot};
use crate::tree::{RoutingTree, SharedTopology};

struct Inner {
    current_host: String,
    topology: SharedTopology,
    routing_table: RwLock<BTreeMap<String, RouteStrategy>>,
    local: LocalRouter,
    client: ClientRouter,
    server: ServerRouter,
    inbound: MessageQueue,
    stats: RouterStats,
}

impl Inner {
    fn router(&self, strategy: RouteStrategy) -> &dyn Router {
        match strategy {
            RouteStrategy::Local => &self.local,
            RouteStrategy::Client => &self.client,
            RouteStrategy::Server => &self.server,
        }
    }

    /// Route and count: `routed` for a forwarded message, `dropped` for a
    /// strategy's own drop or any error.
    fn route_package(&self, message: Message) -> Result<Delivery, RoutingError> {
        match self.select_and_route(message) {
            Ok(Delivery::Forwarded) => {
                self.stats.record_routed();
                Ok(Delivery::Forwarded)
            }
            Ok(Delivery::Dropped) => {
                self.stats.record_dropped();
                Ok(Delivery::Dropped)
            }
            Err(e) => {
                self.stats.record_dropped();
                Err(e)
            }
        }
    }

    fn select_and_route(&self, message: Message) -> Result<Delivery, RoutingError> {
        if message.target_host.is_empty() {
            return Err(RoutingError::MissingTargetHost {
                message_id: message.id,
            });
        }

        let strategy = {
            let table = self.routing_table.read();
            if table.is_empty() {
                return Err(RoutingError::RoutingTableNotBuilt);
            }
            table.get(&message.target_host).copied()
        };
        let strategy = strategy.ok_or_else(|| RoutingError::UnknownHost {
            host: message.target_host.clone(),
        })?;

        tracing::debug!(
            "master router: {} -> {} via {strategy} router ({})",
            message.source_address(),
            message.target_address(),
            message.id
        );
        self.router(strategy).route_package(message)
    }

    fn dispatch_loop(&self) {
        while let Some(message) = self.inbound.pop_front() {
            let id = message.id.clone();
            if let Err(e) = self.route_package(message) {
                tracing::warn!("master router: dropping message {id}: {e}");
            }
        }
        tracing::debug!("master router: inbound queue closed, dispatch loop exiting");
    }
}

pub struct MasterRouter {
    inner: Arc<Inner>,
    module_table: Arc<ModuleTable>,
    host_user_table: Arc<HostUserTable>,
    client_table: Arc<ClientTable>,
    hosts: Option<HostDescriptions>,
    config: RouterConfig,
    merger: Option<QueueMerger<Message>>,
    dispatch_thread: Option<JoinHandle<()>>,
}

impl MasterRouter {
    pub fn new(
        current_host: impl Into<String>,
        module_table: Arc<ModuleTable>,
        host_user_table: Arc<HostUserTable>,
        client_table: Arc<ClientTable>,
        config: RouterConfig,
    ) -> Self {
        let current_host = current_host.into();
        let topology = SharedTopology::new();
        let inner = Inner {
            local: LocalRouter::new(current_host.clone(), Arc::clone(&module_table)),
            client: ClientRouter::new(
                current_host.clone(),
                topology.clone(),
                Arc::clone(&client_table),
            ),
            server: ServerRouter::new(
                current_host.clone(),
                topology.clone(),
                Arc::clone(&host_user_table),
            ),
            current_host,
            topology,
            routing_table: RwLock::new(BTreeMap::new()),
            inbound: message_queue(),
            stats: RouterStats::default(),
        };
        Self {
            inner: Arc::new(inner),
            module_table,
            host_user_table,
            client_table,
            hosts: None,
            config,
            merger: None,
            dispatch_thread: None,
        }
    }

    pub fn current_host(&self) -> &str {
        &self.inner.current_host
    }

    /// Parse `hosts` into the routing tree and classify every Host.
    ///
    /// This Host maps to the local strategy, Hosts below it to the server
    /// strategy, everything else to the client strategy. On error the
    /// previous table stays in place.
    pub fn build_routing_table(&mut self, hosts: &HostDescriptions) -> Result<(), RoutingError> {
        let current = self.inner.current_host.as_str();
        let tree = RoutingTree::from_hosts(hosts)?;
        let below: Vec<String> = tree.descendants_of(current)?;

        let mut table: BTreeMap<String, RouteStrategy> = tree
            .hosts()
            .map(|host| (host.to_string(), RouteStrategy::Client))
            .collect();
        for host in below {
            table.insert(host, RouteStrategy::Server);
        }
        table.insert(current.to_string(), RouteStrategy::Local);

        tracing::info!(
            host = current,
            hosts = tree.len(),
            "master router: routing tree built\n{tree}"
        );
        self.inner.topology.replace(tree);
        self.inner.server.clear_cache();
        *self.inner.routing_table.write() = table;
        self.hosts = Some(hosts.clone());
        Ok(())
    }

    /// Apply a full configuration: routing table plus this Host's Modules.
    ///
    /// After the first call, Hosts may not be added, removed or change
    /// role; only the Module set may change. A running router is stopped
    /// for the swap and restarted afterwards.
    pub fn reconfigure(&mut self, config: &Configuration) -> Result<(), RoutingError> {
        if let Some(current) = &self.hosts {
            current.ensure_same_topology(&config.hosts)?;
        }
        // Validate before touching anything that is live.
        RoutingTree::from_hosts(&config.hosts)?;

        let was_running = self.is_running();
        if was_running {
            self.stop()?;
        }

        self.build_routing_table(&config.hosts)?;
        self.module_table.clear();
        for module in config.modules_for_host(&self.inner.current_host) {
            self.module_table.register_module(module)?;
        }
        tracing::info!(
            host = %self.inner.current_host,
            modules = self.module_table.module_ids().len(),
            "master router: configuration applied"
        );

        if was_running {
            self.start()?;
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.dispatch_thread.is_some()
    }

    /// Start the strategies, the inbound merger and the dispatch thread.
    pub fn start(&mut self) -> Result<(), RoutingError> {
        if self.is_running() {
            return Err(RoutingError::AlreadyStarted {
                component: "master router",
            });
        }
        if self.inner.topology.get().is_none() {
            return Err(RoutingError::RoutingTableNotBuilt);
        }

        self.inner.local.start()?;
        self.inner.client.start()?;
        self.inner.server.start()?;

        let mut merger = QueueMerger::new(
            self.inner.inbound.clone(),
            [
                self.module_table.from_modules_queue(),
                self.host_user_table.from_clients_queue(),
                self.client_table.from_server_queue(),
            ],
            self.config.forwarder_poll_interval,
        );
        merger.start()?;

        let inner = Arc::clone(&self.inner);
        let spawned = std::thread::Builder::new()
            .name(self.config.dispatch_thread_name.clone())
            .spawn(move || inner.dispatch_loop());
        let handle = match spawned {
            Ok(handle) => handle,
            Err(source) => {
                merger.stop()?;
                return Err(RoutingError::Spawn {
                    component: "master router",
                    source,
                });
            }
        };

        self.merger = Some(merger);
        self.dispatch_thread = Some(handle);
        tracing::info!(host = %self.inner.current_host, "master router started");
        Ok(())
    }

    /// Stop the merger, let the dispatch loop drain the inbound queue, join it.
    pub fn stop(&mut self) -> Result<(), RoutingError> {
        let handle = self.dispatch_thread.take().ok_or(RoutingError::NotStarted {
            component: "master router",
        })?;
        if let Some(mut merger) = self.merger.take() {
            merger.stop()?;
        }

        self.inner.inbound.close();
        if handle.join().is_err() {
            tracing::error!("master router: dispatch thread panicked");
        }
        self.inner.inbound.reopen();
        tracing::info!(host = %self.inner.current_host, "master router stopped");
        Ok(())
    }

    /// Route one message right away, bypassing the inbound queue.
    pub fn route_package(&self, message: Message) -> Result<Delivery, RoutingError> {
        self.inner.route_package(message)
    }

    /// Whether the strategy the routing table picks for `host` can reach it.
    pub fn can_reach_host(&self, host: &str) -> bool {
        self.strategy_for(host)
            .is_some_and(|strategy| self.inner.router(strategy).can_reach_host(host))
    }

    pub fn strategy_for(&self, host: &str) -> Option<RouteStrategy> {
        self.inner.routing_table.read().get(host).copied()
    }

    /// Snapshot of `host name -> strategy`.
    pub fn routing_table(&self) -> BTreeMap<String, RouteStrategy> {
        self.inner.routing_table.read().clone()
    }

    pub fn routing_tree(&self) -> Option<Arc<RoutingTree>> {
        self.inner.topology.get()
    }

    /// Queue the dispatch loop drains. Transports may push into it directly.
    pub fn inbound_queue(&self) -> MessageQueue {
        self.inner.inbound.clone()
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn router_stats(&self, strategy: RouteStrategy) -> RouterStatsSnapshot {
        self.inner.router(strategy).stats()
    }
}

impl Drop for MasterRouter {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::{HostDescription, ModuleDescription};
    use crate::error::ErrorKind;
    use crate::message::{Address, MessageBuilder, Payload};

    fn hosts() -> HostDescriptions {
        vec![
            HostDescription::root("Server1", "s1:1"),
            HostDescription::server("Server2", "s2:1", "Server1"),
            HostDescription::client("Client1", "Server1"),
            HostDescription::client("Client2", "Server2"),
        ]
        .try_into()
        .unwrap()
    }

    fn router_at(host: &str) -> MasterRouter {
        MasterRouter::new(
            host,
            Arc::new(ModuleTable::new()),
            Arc::new(HostUserTable::new()),
            Arc::new(ClientTable::new()),
            RouterConfig::new().forwarder_poll_interval(Duration::from_millis(5)),
        )
    }

    fn to(host: &str, module: &str) -> Message {
        MessageBuilder::new("c")
            .source(Address::new("Server2", "Sender"))
            .target(Address::new(host, module))
            .payload(Payload::Bool(true))
            .build()
    }

    #[test]
    fn table_classifies_hosts() {
        let mut router = router_at("Server2");
        router.build_routing_table(&hosts()).unwrap();

        assert_eq!(router.strategy_for("Server2"), Some(RouteStrategy::Local));
        assert_eq!(router.strategy_for("Client2"), Some(RouteStrategy::Server));
        assert_eq!(router.strategy_for("Server1"), Some(RouteStrategy::Client));
        assert_eq!(router.strategy_for("Client1"), Some(RouteStrategy::Client));
        assert_eq!(router.strategy_for("Nowhere"), None);

        assert!(router.can_reach_host("Client1"));
        assert!(router.can_reach_host("Client2"));
        assert!(!router.can_reach_host("Nowhere"));
    }

    #[test]
    fn current_host_must_be_described() {
        let mut router = router_at("Stranger");
        let err = router.build_routing_table(&hosts()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(router.routing_table().is_empty());
    }

    #[test]
    fn routes_by_strategy() {
        let client_table = Arc::new(ClientTable::new());
        let mut router = MasterRouter::new(
            "Server2",
            Arc::new(ModuleTable::new()),
            Arc::new(HostUserTable::new()),
            Arc::clone(&client_table),
            RouterConfig::default(),
        );
        router.build_routing_table(&hosts()).unwrap();

        router.route_package(to("Client1", "M")).unwrap();
        assert_eq!(client_table.to_server_queue().len(), 1);
        assert_eq!(router.router_stats(RouteStrategy::Client).routed, 1);

        let err = router.route_package(to("Nowhere", "M")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = router.route_package(to("", "M")).unwrap_err();
        assert!(matches!(err, RoutingError::MissingTargetHost { .. }));
    }

    #[test]
    fn drop_by_strategy_is_not_counted_as_routed() {
        let mut router = router_at("Server2");
        router.build_routing_table(&hosts()).unwrap();

        // Client2 sits below Server2 but never connected.
        let delivery = router.route_package(to("Client2", "M")).unwrap();
        assert_eq!(delivery, Delivery::Dropped);

        let master = router.stats();
        assert_eq!((master.routed, master.dropped), (0, 1));
        assert_eq!(router.router_stats(RouteStrategy::Server).dropped, 1);

        router.route_package(to("Nowhere", "M")).unwrap_err();
        assert_eq!(router.stats().dropped, 2);
    }

    #[test]
    fn routing_before_build_fails() {
        let router = router_at("Server2");
        let err = router.route_package(to("Client1", "M")).unwrap_err();
        assert!(matches!(err, RoutingError::RoutingTableNotBuilt));
    }

    #[test]
    fn start_requires_table_and_rejects_double_start() {
        let mut router = router_at("Server2");
        assert!(matches!(
            router.start().unwrap_err(),
            RoutingError::RoutingTableNotBuilt
        ));
        assert_eq!(router.stop().unwrap_err().kind(), ErrorKind::Unavailable);

        router.build_routing_table(&hosts()).unwrap();
        router.start().unwrap();
        assert_eq!(router.start().unwrap_err().kind(), ErrorKind::AlreadyExists);
        router.stop().unwrap();
        assert!(!router.is_running());
    }

    #[test]
    fn dispatch_loop_survives_bad_messages() {
        let module_table = Arc::new(ModuleTable::new());
        module_table
            .register_module(&ModuleDescription::new("Sink", "Sink", "Server2"))
            .unwrap();
        module_table.add_module_to_runtime("Sink", "cpp").unwrap();

        let mut router = MasterRouter::new(
            "Server2",
            Arc::clone(&module_table),
            Arc::new(HostUserTable::new()),
            Arc::new(ClientTable::new()),
            RouterConfig::new().forwarder_poll_interval(Duration::from_millis(5)),
        );
        router.build_routing_table(&hosts()).unwrap();
        router.start().unwrap();

        let inbound = router.inbound_queue();
        inbound.push_back(to("Nowhere", "Sink")).unwrap();
        inbound.push_back(to("Server2", "Ghost")).unwrap();
        module_table
            .from_modules_queue()
            .push_back(to("Server2", "Sink"))
            .unwrap();

        let sink = module_table.lookup_output_queue("Sink").unwrap();
        let delivered = sink.pop_front_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(delivered.target_module, "Sink");

        router.stop().unwrap();
        let stats = router.stats();
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.routed, 1);
    }

    #[test]
    fn reconfigure_swaps_modules_but_not_hosts() {
        let mut router = router_at("Server2");
        let mut config = Configuration {
            hosts: hosts(),
            modules: vec![
                ModuleDescription::new("A", "ClassA", "Server2"),
                ModuleDescription::new("B", "ClassB", "Server1"),
            ],
        };
        router.reconfigure(&config).unwrap();
        assert_eq!(router.module_table.module_ids(), vec!["A"]);

        router.start().unwrap();
        config.modules = vec![ModuleDescription::new("C", "ClassC", "Server2")];
        router.reconfigure(&config).unwrap();
        assert!(router.is_running());
        assert_eq!(router.module_table.module_ids(), vec!["C"]);

        let mut changed = config.clone();
        changed.hosts = vec![
            HostDescription::root("Server1", "s1:1"),
            HostDescription::server("Server2", "s2:1", "Server1"),
            HostDescription::client("Client1", "Server1"),
            HostDescription::server("Client2", "c2:1", "Server2"),
        ]
        .try_into()
        .unwrap();
        let err = router.reconfigure(&changed).unwrap_err();
        assert!(matches!(err, RoutingError::TopologyChanged { ref host, .. } if host == "Client2"));
        assert!(router.is_running(), "rejected reload leaves the router running");
        router.stop().unwrap();
    }
}
