/// Registry of remote clients connected to this Host.
///
/// One Host name may be run by several users (or devices) at the same
/// time. Each `(host, user_token)` pair gets its own output queue that the
/// transport drains toward that client; a reverse index `host -> users`
/// serves "every user of this host" lookups.
use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use crate::error::RoutingError;
use crate::message::{message_queue, MessageQueue};

#[derive(Debug)]
struct RemoteUser {
    device_id: String,
    queue: MessageQueue,
}

#[derive(Debug, Default)]
struct Users {
    by_key: HashMap<(String, String), RemoteUser>,
    /// Connection order is kept so broadcast copies go out in a stable order.
    by_host: BTreeMap<String, Vec<String>>,
}

#[derive(Debug)]
pub struct HostUserTable {
    users: Mutex<Users>,
    from_clients: MessageQueue,
}

impl Default for HostUserTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HostUserTable {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(Users::default()),
            from_clients: message_queue(),
        }
    }

    /// Register a connected client and return the queue the transport should drain.
    pub fn add_remote_client(
        &self,
        host: &str,
        user_token: &str,
        device_id: &str,
    ) -> Result<MessageQueue, RoutingError> {
        let mut users = self.users.lock();
        let key = (host.to_string(), user_token.to_string());
        if users.by_key.contains_key(&key) {
            return Err(RoutingError::UserAlreadyConnected {
                host: host.to_string(),
                user_token: user_token.to_string(),
            });
        }

        let queue = message_queue();
        users.by_key.insert(
            key,
            RemoteUser {
                device_id: device_id.to_string(),
                queue: queue.clone(),
            },
        );
        users
            .by_host
            .entry(host.to_string())
            .or_default()
            .push(user_token.to_string());

        tracing::info!(host, user_token, device_id, "remote client connected");
        Ok(queue)
    }

    /// Unregister a client. Its queue is closed so the writer draining it stops.
    pub fn remove_remote_client(&self, host: &str, user_token: &str) -> Result<(), RoutingError> {
        let mut users = self.users.lock();
        let user = users
            .by_key
            .remove(&(host.to_string(), user_token.to_string()))
            .ok_or_else(|| RoutingError::UserNotConnected {
                host: host.to_string(),
                user_token: user_token.to_string(),
            })?;
        user.queue.close();

        if let Some(tokens) = users.by_host.get_mut(host) {
            tokens.retain(|t| t != user_token);
            if tokens.is_empty() {
                users.by_host.remove(host);
            }
        }

        tracing::info!(host, user_token, "remote client disconnected");
        Ok(())
    }

    pub fn lookup_output_queue_for_host_user(
        &self,
        host: &str,
        user_token: &str,
    ) -> Result<MessageQueue, RoutingError> {
        self.users
            .lock()
            .by_key
            .get(&(host.to_string(), user_token.to_string()))
            .map(|u| u.queue.clone())
            .ok_or_else(|| RoutingError::UserNotConnected {
                host: host.to_string(),
                user_token: user_token.to_string(),
            })
    }

    /// Queues of every user currently running `host`, in connection order.
    pub fn lookup_output_queues_for_host(&self, host: &str) -> Result<Vec<MessageQueue>, RoutingError> {
        let users = self.users.lock();
        let tokens = users
            .by_host
            .get(host)
            .ok_or_else(|| RoutingError::HostNotConnected {
                host: host.to_string(),
            })?;
        Ok(tokens
            .iter()
            .filter_map(|t| users.by_key.get(&(host.to_string(), t.clone())))
            .map(|u| u.queue.clone())
            .collect())
    }

    pub fn connected_users(&self, host: &str) -> Vec<String> {
        self.users
            .lock()
            .by_host
            .get(host)
            .cloned()
            .unwrap_or_default()
    }

    pub fn connected_hosts(&self) -> Vec<String> {
        self.users.lock().by_host.keys().cloned().collect()
    }

    pub fn device_id(&self, host: &str, user_token: &str) -> Option<String> {
        self.users
            .lock()
            .by_key
            .get(&(host.to_string(), user_token.to_string()))
            .map(|u| u.device_id.clone())
    }

    /// Messages received from connected clients, waiting to be routed.
    pub fn from_clients_queue(&self) -> MessageQueue {
        self.from_clients.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::message::{Address, MessageBuilder};

    #[test]
    fn add_and_lookup() {
        let table = HostUserTable::new();
        let alice = table.add_remote_client("Phone", "alice", "pixel-7").unwrap();
        let bob = table.add_remote_client("Phone", "bob", "iphone").unwrap();

        let found = table.lookup_output_queue_for_host_user("Phone", "alice").unwrap();
        assert!(std::sync::Arc::ptr_eq(&found, &alice));

        let all = table.lookup_output_queues_for_host("Phone").unwrap();
        assert_eq!(all.len(), 2);
        assert!(std::sync::Arc::ptr_eq(&all[0], &alice));
        assert!(std::sync::Arc::ptr_eq(&all[1], &bob));

        assert_eq!(table.connected_users("Phone"), vec!["alice", "bob"]);
        assert_eq!(table.device_id("Phone", "bob").as_deref(), Some("iphone"));
    }

    #[test]
    fn duplicate_user_rejected() {
        let table = HostUserTable::new();
        table.add_remote_client("Phone", "alice", "d1").unwrap();
        let err = table.add_remote_client("Phone", "alice", "d2").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        // Same token on another host is a different user.
        table.add_remote_client("Watch", "alice", "d3").unwrap();
    }

    #[test]
    fn remove_closes_queue_and_prunes_host() {
        let table = HostUserTable::new();
        let queue = table.add_remote_client("Phone", "alice", "d1").unwrap();
        table.remove_remote_client("Phone", "alice").unwrap();

        assert!(queue.is_closed());
        let msg = MessageBuilder::new("c").target(Address::new("Phone", "M")).build();
        assert!(queue.push_back(msg).is_err());
        assert!(table.connected_hosts().is_empty());

        let err = table.lookup_output_queues_for_host("Phone").unwrap_err();
        assert!(matches!(err, RoutingError::HostNotConnected { .. }));
        let err = table.remove_remote_client("Phone", "alice").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn unknown_user_lookup_fails() {
        let table = HostUserTable::new();
        table.add_remote_client("Phone", "alice", "d1").unwrap();
        let err = table
            .lookup_output_queue_for_host_user("Phone", "mallory")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
