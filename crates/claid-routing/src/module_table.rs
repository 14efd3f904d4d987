/// Per-Host registry of local Modules and their Channels.
///
/// Modules are grouped into runtimes; all Modules of one runtime share a
/// single output queue that the runtime drains. Channels are bound per
/// Module under a local alias and resolve to a canonical connection name;
/// every publisher and subscriber on a connection must agree on one payload
/// type, fixed by the first sample or message seen.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use parking_lot::RwLock;

use crate::config::ModuleDescription;
use crate::error::RoutingError;
use crate::message::{message_queue, Message, MessageQueue};

/// Which side of a connection a Module binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelRole {
    Publisher,
    Subscriber,
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRole::Publisher => f.write_str("publisher"),
            ChannelRole::Subscriber => f.write_str("subscriber"),
        }
    }
}

/// A Module bound to a connection under its own channel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelBinding {
    pub module: String,
    pub alias: String,
}

/// Parties of one connection plus the payload type they agreed on.
#[derive(Debug, Clone, Default)]
pub struct ChannelEntry {
    pub publishers: BTreeSet<ChannelBinding>,
    pub subscribers: BTreeSet<ChannelBinding>,
    /// `None` until the first sample or message is seen.
    pub payload_tag: Option<String>,
}

#[derive(Debug, Clone)]
struct ModuleEntry {
    class: String,
    properties: BTreeMap<String, String>,
    runtime: Option<String>,
}

#[derive(Default)]
struct Modules {
    modules: BTreeMap<String, ModuleEntry>,
    runtime_queues: BTreeMap<String, MessageQueue>,
    /// module -> runtime, kept by `clear` for Modules that come back after a reload.
    parked_runtimes: BTreeMap<String, String>,
}

#[derive(Default)]
struct Channels {
    connections: BTreeMap<String, ChannelEntry>,
    /// (module, alias) -> (connection, role)
    aliases: HashMap<(String, String), (String, ChannelRole)>,
}

impl Channels {
    fn resolve(&self, module: &str, alias: &str) -> Option<&(String, ChannelRole)> {
        self.aliases.get(&(module.to_string(), alias.to_string()))
    }
}

pub struct ModuleTable {
    modules: RwLock<Modules>,
    channels: RwLock<Channels>,
    from_modules: MessageQueue,
    control: MessageQueue,
}

impl Default for ModuleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleTable {
    pub fn new() -> Self {
        Self {
            modules: RwLock::new(Modules::default()),
            channels: RwLock::new(Channels::default()),
            from_modules: message_queue(),
            control: message_queue(),
        }
    }

    // ── Modules and runtimes ───────────────────────────────────────────

    pub fn set_needed_module(
        &self,
        module: &str,
        class: &str,
        properties: BTreeMap<String, String>,
    ) -> Result<(), RoutingError> {
        let mut modules = self.modules.write();
        if modules.modules.contains_key(module) {
            return Err(RoutingError::DuplicateModule {
                module: module.to_string(),
            });
        }
        let runtime = modules.parked_runtimes.remove(module);
        modules.modules.insert(
            module.to_string(),
            ModuleEntry {
                class: class.to_string(),
                properties,
                runtime,
            },
        );
        Ok(())
    }

    /// Place `module` in `runtime`, creating the runtime's output queue on first use.
    pub fn add_module_to_runtime(&self, module: &str, runtime: &str) -> Result<(), RoutingError> {
        let mut guard = self.modules.write();
        let modules = &mut *guard;
        let entry = modules
            .modules
            .get_mut(module)
            .ok_or_else(|| RoutingError::UnknownModule {
                module: module.to_string(),
            })?;
        entry.runtime = Some(runtime.to_string());
        modules
            .runtime_queues
            .entry(runtime.to_string())
            .or_insert_with(message_queue);
        Ok(())
    }

    /// Output queue of the runtime `module` runs in.
    pub fn lookup_output_queue(&self, module: &str) -> Option<MessageQueue> {
        let modules = self.modules.read();
        let runtime = modules.modules.get(module)?.runtime.as_deref()?;
        modules.runtime_queues.get(runtime).cloned()
    }

    pub fn runtime_queue(&self, runtime: &str) -> Option<MessageQueue> {
        self.modules.read().runtime_queues.get(runtime).cloned()
    }

    pub fn contains_module(&self, module: &str) -> bool {
        self.modules.read().modules.contains_key(module)
    }

    pub fn module_class(&self, module: &str) -> Option<String> {
        self.modules.read().modules.get(module).map(|m| m.class.clone())
    }

    pub fn module_properties(&self, module: &str) -> Option<BTreeMap<String, String>> {
        self.modules
            .read()
            .modules
            .get(module)
            .map(|m| m.properties.clone())
    }

    pub fn module_ids(&self) -> Vec<String> {
        self.modules.read().modules.keys().cloned().collect()
    }

    /// Messages published by local Modules, waiting to be routed.
    pub fn from_modules_queue(&self) -> MessageQueue {
        self.from_modules.clone()
    }

    /// Control messages addressed to this Host.
    pub fn control_queue(&self) -> MessageQueue {
        self.control.clone()
    }

    // ── Channels ───────────────────────────────────────────────────────

    /// Bind `module`'s local `channel` name to `connection`.
    ///
    /// Re-binding the same alias to the same connection and role is a no-op.
    pub fn set_expected_channel(
        &self,
        module: &str,
        channel: &str,
        connection: &str,
        role: ChannelRole,
    ) -> Result<(), RoutingError> {
        if !self.contains_module(module) {
            return Err(RoutingError::UnknownModule {
                module: module.to_string(),
            });
        }

        let mut channels = self.channels.write();
        let key = (module.to_string(), channel.to_string());
        if let Some((existing, existing_role)) = channels.aliases.get(&key) {
            if existing == connection && *existing_role == role {
                return Ok(());
            }
            return Err(RoutingError::ChannelConflict {
                module: module.to_string(),
                channel: channel.to_string(),
                existing: format!("{existing} ({existing_role})"),
                requested: format!("{connection} ({role})"),
            });
        }

        channels
            .aliases
            .insert(key, (connection.to_string(), role));
        let entry = channels.connections.entry(connection.to_string()).or_default();
        let binding = ChannelBinding {
            module: module.to_string(),
            alias: channel.to_string(),
        };
        match role {
            ChannelRole::Publisher => entry.publishers.insert(binding),
            ChannelRole::Subscriber => entry.subscribers.insert(binding),
        };
        Ok(())
    }

    /// Register the payload types `module` presents on its channels.
    ///
    /// Each sample names the channel by the Module's local alias. The first
    /// sample on a connection fixes its type; later samples from any party
    /// must carry the same type. The whole batch is checked under one write
    /// lock, samples before a failing one stay applied.
    pub fn set_channel_types(&self, module: &str, samples: &[Message]) -> Result<(), RoutingError> {
        if module.is_empty() {
            return Err(RoutingError::InvalidChannelSample {
                module: String::new(),
                reason: "module id must not be empty".into(),
            });
        }

        let mut channels = self.channels.write();
        for sample in samples {
            if sample.is_control() {
                return Err(RoutingError::InvalidChannelSample {
                    module: module.to_string(),
                    reason: format!("control message on channel \"{}\"", sample.channel),
                });
            }
            if sample.source_module != module && sample.target_module != module {
                return Err(RoutingError::InvalidChannelSample {
                    module: module.to_string(),
                    reason: format!(
                        "sample on channel \"{}\" is neither from nor to this module",
                        sample.channel
                    ),
                });
            }

            let connection = channels
                .resolve(module, &sample.channel)
                .map(|(connection, _)| connection.clone())
                .ok_or_else(|| RoutingError::UnknownChannel {
                    module: module.to_string(),
                    channel: sample.channel.clone(),
                })?;
            let entry = channels.connections.entry(connection.clone()).or_default();
            agree_on_type(entry, &connection, module, sample.payload_tag())?;
        }
        Ok(())
    }

    /// Deliver one copy of `message` to every subscriber of the connection
    /// the sender publishes on.
    ///
    /// Each copy is addressed to the subscribing Module under its own
    /// channel alias. Returns the number of copies queued.
    pub fn forward_package_to_all_subscribers(&self, message: &Message) -> Result<usize, RoutingError> {
        let module = message.source_module.as_str();
        let unknown_channel = || RoutingError::UnknownChannel {
            module: module.to_string(),
            channel: message.channel.clone(),
        };
        let tag = message.payload_tag();

        let (connection, agreed, subscribers) = {
            let channels = self.channels.read();
            let connection = match channels.resolve(module, &message.channel) {
                Some((connection, ChannelRole::Publisher)) => connection.clone(),
                Some((_, ChannelRole::Subscriber)) => {
                    return Err(RoutingError::NotAPublisher {
                        module: module.to_string(),
                        channel: message.channel.clone(),
                    })
                }
                None => return Err(unknown_channel()),
            };
            let entry = channels.connections.get(&connection);
            let agreed = entry.and_then(|e| e.payload_tag.clone());
            let subscribers = entry.map(|e| e.subscribers.clone()).unwrap_or_default();
            (connection, agreed, subscribers)
        };

        let subscribers = match agreed {
            Some(expected) => {
                check_type(Some(&expected), &connection, module, tag)?;
                subscribers
            }
            // First message on this connection fixes its type. Another
            // publisher may have won the race, so check again under the lock.
            None => {
                let mut channels = self.channels.write();
                let entry = channels
                    .connections
                    .get_mut(&connection)
                    .ok_or_else(unknown_channel)?;
                agree_on_type(entry, &connection, module, tag)?;
                entry.subscribers.clone()
            }
        };

        let mut delivered = 0;
        for subscriber in subscribers {
            let Some(queue) = self.lookup_output_queue(&subscriber.module) else {
                tracing::warn!(
                    "module table: subscriber {} of {connection} has no runtime, skipping message {}",
                    subscriber.module,
                    message.id
                );
                continue;
            };
            let mut copy = message.clone();
            copy.target_host = message.source_host.clone();
            copy.target_module = subscriber.module;
            copy.channel = subscriber.alias;
            if queue.push_back(copy).is_ok() {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Whether `message` travels on a channel its sender publishes on, with
    /// the connection's agreed payload type.
    pub fn is_valid_channel(&self, message: &Message) -> bool {
        let channels = self.channels.read();
        let Some((connection, ChannelRole::Publisher)) =
            channels.resolve(&message.source_module, &message.channel)
        else {
            return false;
        };
        channels
            .connections
            .get(connection)
            .and_then(|e| e.payload_tag.as_deref())
            .is_some_and(|tag| tag == message.payload_tag())
    }

    /// Every known connection has an agreed payload type.
    pub fn ready(&self) -> bool {
        self.channels
            .read()
            .connections
            .values()
            .all(|e| e.payload_tag.is_some())
    }

    pub fn channel(&self, connection: &str) -> Option<ChannelEntry> {
        self.channels.read().connections.get(connection).cloned()
    }

    /// Connection and role `module` binds under its local `channel` name.
    pub fn resolve_channel(&self, module: &str, channel: &str) -> Option<(String, ChannelRole)> {
        self.channels.read().resolve(module, channel).cloned()
    }

    // ── Bulk operations ────────────────────────────────────────────────

    /// Register a Module and bind all its input and output channels.
    pub fn register_module(&self, description: &ModuleDescription) -> Result<(), RoutingError> {
        self.set_needed_module(
            &description.id,
            &description.class,
            description.properties.clone(),
        )?;
        for (channel, connection) in &description.output_channels {
            self.set_expected_channel(&description.id, channel, connection, ChannelRole::Publisher)?;
        }
        for (channel, connection) in &description.input_channels {
            self.set_expected_channel(&description.id, channel, connection, ChannelRole::Subscriber)?;
        }
        Ok(())
    }

    /// Forget every Module and channel for a reload.
    ///
    /// Runtime queues survive, and a Module registered again under the same
    /// id is placed back in the runtime it ran in.
    pub fn clear(&self) {
        let mut modules = self.modules.write();
        let parked: BTreeMap<String, String> = std::mem::take(&mut modules.modules)
            .into_iter()
            .filter_map(|(id, entry)| entry.runtime.map(|runtime| (id, runtime)))
            .collect();
        modules.parked_runtimes = parked;
        let mut channels = self.channels.write();
        channels.connections.clear();
        channels.aliases.clear();
    }
}

fn check_type(
    agreed: Option<&str>,
    connection: &str,
    module: &str,
    found: &str,
) -> Result<(), RoutingError> {
    match agreed {
        Some(expected) if expected != found => Err(RoutingError::ChannelTypeMismatch {
            connection: connection.to_string(),
            module: module.to_string(),
            expected: expected.to_string(),
            found: found.to_string(),
        }),
        _ => Ok(()),
    }
}

fn agree_on_type(
    entry: &mut ChannelEntry,
    connection: &str,
    module: &str,
    found: &str,
) -> Result<(), RoutingError> {
    check_type(entry.payload_tag.as_deref(), connection, module, found)?;
    if entry.payload_tag.is_none() {
        entry.payload_tag = Some(found.to_string());
    }
    Ok(())
}

impl fmt::Display for ModuleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let modules = self.modules.read();
        writeln!(f, "modules:")?;
        for (id, entry) in &modules.modules {
            let runtime = entry.runtime.as_deref().unwrap_or("-");
            writeln!(f, "  {id} ({}) runtime={runtime}", entry.class)?;
        }
        drop(modules);

        let channels = self.channels.read();
        writeln!(f, "channels:")?;
        for (connection, entry) in &channels.connections {
            let tag = entry.payload_tag.as_deref().unwrap_or("?");
            writeln!(f, "  {connection} [{tag}]")?;
            for b in &entry.publishers {
                writeln!(f, "    pub {}:{}", b.module, b.alias)?;
            }
            for b in &entry.subscribers {
                writeln!(f, "    sub {}:{}", b.module, b.alias)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::message::{Address, MessageBuilder, Payload};

    fn sample(module: &str, channel: &str, payload: Payload) -> Message {
        MessageBuilder::new(channel)
            .source(Address::new("host", module))
            .payload(payload)
            .build()
    }

    fn table_with_pubsub() -> ModuleTable {
        let table = ModuleTable::new();
        table
            .register_module(&ModuleDescription::new("Accel", "Collector", "host").output("out", "accel"))
            .unwrap();
        table
            .register_module(&ModuleDescription::new("Saver", "DataSaver", "host").input("in", "accel"))
            .unwrap();
        table
            .register_module(&ModuleDescription::new("Plot", "Plotter", "host").input("data", "accel"))
            .unwrap();
        table.add_module_to_runtime("Accel", "cpp").unwrap();
        table.add_module_to_runtime("Saver", "cpp").unwrap();
        table.add_module_to_runtime("Plot", "python").unwrap();
        table
    }

    #[test]
    fn modules_share_runtime_queue() {
        let table = table_with_pubsub();
        let a = table.lookup_output_queue("Accel").unwrap();
        let s = table.lookup_output_queue("Saver").unwrap();
        let p = table.lookup_output_queue("Plot").unwrap();
        assert!(std::sync::Arc::ptr_eq(&a, &s));
        assert!(!std::sync::Arc::ptr_eq(&a, &p));
        assert!(table.lookup_output_queue("Ghost").is_none());
        assert_eq!(table.module_class("Saver").as_deref(), Some("DataSaver"));
    }

    #[test]
    fn duplicate_module_rejected() {
        let table = ModuleTable::new();
        table.set_needed_module("M", "C", BTreeMap::new()).unwrap();
        let err = table.set_needed_module("M", "C", BTreeMap::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn runtime_requires_known_module() {
        let table = ModuleTable::new();
        let err = table.add_module_to_runtime("Ghost", "cpp").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn remapping_alias_conflicts() {
        let table = table_with_pubsub();
        table
            .set_expected_channel("Accel", "out", "accel", ChannelRole::Publisher)
            .unwrap();
        let err = table
            .set_expected_channel("Accel", "out", "gyro", ChannelRole::Publisher)
            .unwrap_err();
        assert!(matches!(err, RoutingError::ChannelConflict { .. }));
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn first_sample_fixes_type() {
        let table = table_with_pubsub();
        assert!(!table.ready());

        let number = sample("Accel", "out", Payload::Number(1.0));
        table.set_channel_types("Accel", &[number.clone()]).unwrap();
        table.set_channel_types("Accel", &[number]).unwrap();

        // Subscribers see the connection under their own alias.
        let mut sub = sample("Other", "in", Payload::Number(2.0));
        sub.target_module = "Saver".into();
        table.set_channel_types("Saver", &[sub]).unwrap();

        let mut wrong = sample("Other", "data", Payload::Text("x".into()));
        wrong.target_module = "Plot".into();
        let err = table.set_channel_types("Plot", &[wrong]).unwrap_err();
        assert!(matches!(err, RoutingError::ChannelTypeMismatch { ref expected, ref found, .. }
            if expected == "number" && found == "text"));

        assert!(table.ready());
        assert_eq!(table.channel("accel").unwrap().payload_tag.as_deref(), Some("number"));
    }

    #[test]
    fn invalid_samples_rejected() {
        let table = table_with_pubsub();
        let err = table.set_channel_types("", &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let foreign = sample("Saver", "out", Payload::Number(1.0));
        assert!(table.set_channel_types("Accel", &[foreign]).is_err());

        let unknown = sample("Accel", "nope", Payload::Number(1.0));
        let err = table.set_channel_types("Accel", &[unknown]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn fan_out_rewrites_target_and_alias() {
        let table = table_with_pubsub();
        let msg = sample("Accel", "out", Payload::Number(9.81));
        assert_eq!(table.forward_package_to_all_subscribers(&msg).unwrap(), 2);

        let cpp = table.runtime_queue("cpp").unwrap();
        let to_saver = cpp.try_pop_front().unwrap();
        assert_eq!(to_saver.target_module, "Saver");
        assert_eq!(to_saver.channel, "in");
        assert_eq!(to_saver.target_host, "host");
        assert!(cpp.is_empty());

        let python = table.runtime_queue("python").unwrap();
        let to_plot = python.try_pop_front().unwrap();
        assert_eq!(to_plot.target_module, "Plot");
        assert_eq!(to_plot.channel, "data");

        assert!(table.is_valid_channel(&msg));
    }

    #[test]
    fn fan_out_checks_publisher_and_type() {
        let table = table_with_pubsub();
        let from_subscriber = sample("Saver", "in", Payload::Number(1.0));
        let err = table.forward_package_to_all_subscribers(&from_subscriber).unwrap_err();
        assert!(matches!(err, RoutingError::NotAPublisher { .. }));

        table
            .forward_package_to_all_subscribers(&sample("Accel", "out", Payload::Bool(true)))
            .unwrap();
        let err = table
            .forward_package_to_all_subscribers(&sample("Accel", "out", Payload::Number(1.0)))
            .unwrap_err();
        assert!(matches!(err, RoutingError::ChannelTypeMismatch { .. }));
        assert!(!table.is_valid_channel(&sample("Accel", "out", Payload::Number(1.0))));
    }

    #[test]
    fn clear_keeps_runtime_queues() {
        let table = table_with_pubsub();
        let cpp = table.runtime_queue("cpp").unwrap();
        table.clear();
        assert!(table.module_ids().is_empty());
        assert!(table.channel("accel").is_none());
        assert!(std::sync::Arc::ptr_eq(&cpp, &table.runtime_queue("cpp").unwrap()));
    }

    #[test]
    fn reregistered_module_returns_to_its_runtime() {
        let table = table_with_pubsub();
        let cpp = table.runtime_queue("cpp").unwrap();
        table.clear();
        assert!(table.lookup_output_queue("Accel").is_none());

        table.set_needed_module("Accel", "Collector", BTreeMap::new()).unwrap();
        table.set_needed_module("Fresh", "Collector", BTreeMap::new()).unwrap();
        let queue = table.lookup_output_queue("Accel").unwrap();
        assert!(std::sync::Arc::ptr_eq(&cpp, &queue));
        assert!(table.lookup_output_queue("Fresh").is_none());

        // A Module left out of one reload loses its runtime.
        table.clear();
        table.clear();
        table.set_needed_module("Accel", "Collector", BTreeMap::new()).unwrap();
        assert!(table.lookup_output_queue("Accel").is_none());
    }

    #[test]
    fn display_lists_modules_and_channels() {
        let table = table_with_pubsub();
        let dump = table.to_string();
        assert!(dump.contains("Accel (Collector) runtime=cpp"));
        assert!(dump.contains("accel [?]"));
        assert!(dump.contains("pub Accel:out"));
        assert!(dump.contains("sub Plot:data"));
    }
}
