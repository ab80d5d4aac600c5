//! Node lifecycle notifications.
//!
//! Observers call [`EventBus::subscribe`] and receive every event published
//! afterwards on an unbounded channel. Closed receivers are pruned on the
//! next publish.

use std::net::SocketAddrV4;

use tokio::sync::mpsc;
use tracing::trace;

use crate::network::node::{ConnectionState, NodeId, NodeRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    NodeAdded {
        id: NodeId,
        address: SocketAddrV4,
    },
    NodeRemoved {
        id: NodeId,
    },
    NodeUpdated {
        id: NodeId,
        state: ConnectionState,
        role: NodeRole,
    },
}

#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<mpsc::UnboundedSender<NetworkEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<NetworkEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn publish(&mut self, event: NetworkEvent) {
        trace!(?event, subscribers = self.subscribers.len(), "Publishing event");
        self.subscribers.retain(|tx| tx.send(event).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_receivers_are_pruned() {
        let mut bus = EventBus::new();
        let mut kept = bus.subscribe();
        drop(bus.subscribe());

        let event = NetworkEvent::NodeRemoved { id: NodeId::new(4) };
        bus.publish(event);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_recv().unwrap(), event);
    }
}
