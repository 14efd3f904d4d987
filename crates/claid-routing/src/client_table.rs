/// Queues toward the single upstream server this Host connects to.
///
/// The transport's reader pushes everything the server sends into
/// `from_server`; its writer drains `to_server`. Connection state belongs
/// to the transport, this table only holds the queues.
use crate::message::{message_queue, MessageQueue};

#[derive(Debug)]
pub struct ClientTable {
    from_server: MessageQueue,
    to_server: MessageQueue,
}

impl Default for ClientTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientTable {
    pub fn new() -> Self {
        Self {
            from_server: message_queue(),
            to_server: message_queue(),
        }
    }

    pub fn from_server_queue(&self) -> MessageQueue {
        self.from_server.clone()
    }

    pub fn to_server_queue(&self) -> MessageQueue {
        self.to_server.clone()
    }
}
