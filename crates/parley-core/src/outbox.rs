use parley_models::gateway::ServerEvent;
use parley_models::ids::ConnectionId;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Bounded outbound queue of a single connection. Delivery never waits:
/// a full queue drops the event, a closed one discards it.
#[derive(Debug, Clone)]
pub struct Outbox {
    connection_id: ConnectionId,
    tx: mpsc::Sender<ServerEvent>,
}

impl Outbox {
    pub fn channel(
        connection_id: ConnectionId,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { connection_id, tx }, rx)
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn deliver(&self, event: ServerEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::warn!(
                    connection_id = %self.connection_id,
                    event_type = event.name(),
                    "outbound queue full, dropping event"
                );
                false
            }
            Err(TrySendError::Closed(event)) => {
                tracing::debug!(
                    connection_id = %self.connection_id,
                    event_type = event.name(),
                    "connection gone, discarding event"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_drops_events() {
        let (outbox, mut rx) = Outbox::channel(ConnectionId::new(), 1);
        assert!(outbox.deliver(ServerEvent::error("first")));
        assert!(!outbox.deliver(ServerEvent::error("second")));
        assert_eq!(rx.try_recv().ok(), Some(ServerEvent::error("first")));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_queue_discards_events() {
        let (outbox, rx) = Outbox::channel(ConnectionId::new(), 4);
        drop(rx);
        assert!(!outbox.deliver(ServerEvent::error("late")));
    }
}
