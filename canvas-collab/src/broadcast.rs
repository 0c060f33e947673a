//! Per-artboard fan-out with backpressure.
//!
//! Each artboard owns two tokio broadcast channels: the *document*
//! channel carries `Applied` messages in version order, the *presence*
//! channel carries cursor/selection chatter. Keeping them apart means
//! a burst of cursor moves can never push an applied operation out of a
//! slow receiver's buffer.
//!
//! Messages are encoded once and shared as `Arc<Vec<u8>>`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use canvas_core::ClientId;
use tokio::sync::broadcast;

use crate::protocol::{AppliedUpdate, PresenceEvent, ProtocolError, ServerMessage};

/// One pre-encoded server frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Connection that caused the frame, if any. Presence frames are not
    /// echoed back to their origin.
    pub origin: Option<ClientId>,
    pub bytes: Arc<Vec<u8>>,
}

impl Frame {
    fn encode(origin: Option<ClientId>, msg: &ServerMessage) -> Result<Self, ProtocolError> {
        Ok(Self {
            origin,
            bytes: Arc::new(msg.encode()?),
        })
    }

    pub fn message(&self) -> Result<ServerMessage, ProtocolError> {
        ServerMessage::decode(&self.bytes)
    }
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub documents_sent: u64,
    pub presence_sent: u64,
    /// Messages skipped by lagging receivers.
    pub messages_dropped: u64,
    pub subscribers: usize,
}

/// Lock-free counters; read via [`BroadcastGroup::stats`].
struct AtomicBroadcastStats {
    documents_sent: AtomicU64,
    presence_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            documents_sent: AtomicU64::new(0),
            presence_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }
}

/// Receivers for one connection.
pub struct Subscription {
    pub document: broadcast::Receiver<Frame>,
    pub presence: broadcast::Receiver<Frame>,
}

/// The broadcast channels of a single artboard.
pub struct BroadcastGroup {
    document: broadcast::Sender<Frame>,
    presence: broadcast::Sender<Frame>,
    capacity: usize,
    atomic_stats: AtomicBroadcastStats,
}

impl BroadcastGroup {
    /// `capacity` is how many messages a receiver may fall behind before
    /// it starts losing them.
    pub fn new(capacity: usize) -> Self {
        let (document, _) = broadcast::channel(capacity);
        let (presence, _) = broadcast::channel(capacity);
        Self {
            document,
            presence,
            capacity,
            atomic_stats: AtomicBroadcastStats::new(),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            document: self.document.subscribe(),
            presence: self.presence.subscribe(),
        }
    }

    /// Fan out an applied operation. Returns the number of receivers.
    pub fn publish_applied(&self, update: AppliedUpdate) -> Result<usize, ProtocolError> {
        let frame = Frame::encode(None, &ServerMessage::Applied(update))?;
        let count = self.document.send(frame).unwrap_or(0);
        self.atomic_stats.documents_sent.fetch_add(1, Ordering::Relaxed);
        Ok(count)
    }

    pub fn publish_presence(&self, event: PresenceEvent) -> Result<usize, ProtocolError> {
        let origin = Some(event.client_id());
        let frame = Frame::encode(origin, &ServerMessage::Presence(event))?;
        let count = self.presence.send(frame).unwrap_or(0);
        self.atomic_stats.presence_sent.fetch_add(1, Ordering::Relaxed);
        Ok(count)
    }

    /// Called by receivers that reported `Lagged(n)`.
    pub fn record_lag(&self, skipped: u64) {
        self.atomic_stats.messages_dropped.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn subscriber_count(&self) -> usize {
        self.document.receiver_count()
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            documents_sent: self.atomic_stats.documents_sent.load(Ordering::Relaxed),
            presence_sent: self.atomic_stats.presence_sent.load(Ordering::Relaxed),
            messages_dropped: self.atomic_stats.messages_dropped.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canvas_core::{CanvasObject, Operation, Point};
    use tokio::sync::broadcast::error::RecvError;
    use uuid::Uuid;

    fn update(version: u64) -> AppliedUpdate {
        let obj = CanvasObject::rectangle(0.0, 0.0, 1.0, 1.0);
        AppliedUpdate {
            version,
            op: Operation::insert(format!("op-{version}"), Uuid::new_v4(), Uuid::new_v4(), version - 1, obj, 0),
            removed: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_applied_fan_out_in_order() {
        let group = BroadcastGroup::new(16);
        let mut a = group.subscribe();
        let mut b = group.subscribe();

        assert_eq!(group.publish_applied(update(1)).unwrap(), 2);
        group.publish_applied(update(2)).unwrap();

        for sub in [&mut a, &mut b] {
            for expected in 1..=2 {
                match sub.document.recv().await.unwrap().message().unwrap() {
                    ServerMessage::Applied(u) => assert_eq!(u.version, expected),
                    other => panic!("unexpected {other:?}"),
                }
            }
        }
    }

    #[tokio::test]
    async fn test_presence_frames_carry_origin() {
        let group = BroadcastGroup::new(16);
        let mut sub = group.subscribe();
        let client = Uuid::new_v4();
        group
            .publish_presence(PresenceEvent::Cursor {
                session_id: Uuid::new_v4(),
                client_id: client,
                position: Point::new(3.0, 4.0),
                seq: 1,
            })
            .unwrap();

        let frame = sub.presence.recv().await.unwrap();
        assert_eq!(frame.origin, Some(client));
        // Presence never lands on the document channel.
        assert!(sub.document.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_lagging_receiver_is_told() {
        let group = BroadcastGroup::new(2);
        let mut sub = group.subscribe();
        for v in 1..=5 {
            group.publish_applied(update(v)).unwrap();
        }
        match sub.document.recv().await {
            Err(RecvError::Lagged(n)) => {
                group.record_lag(n);
                assert_eq!(n, 3);
            }
            other => panic!("expected lag, got {other:?}"),
        }
        assert_eq!(group.stats().messages_dropped, 3);
    }

    #[tokio::test]
    async fn test_stats_without_subscribers() {
        let group = BroadcastGroup::new(8);
        assert_eq!(group.publish_applied(update(1)).unwrap(), 0);
        let stats = group.stats();
        assert_eq!(stats.documents_sent, 1);
        assert_eq!(stats.subscribers, 0);
        assert_eq!(group.capacity(), 8);
    }
}
