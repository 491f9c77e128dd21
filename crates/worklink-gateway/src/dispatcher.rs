use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use worklink_types::events::GatewayEvent;

/// Presence registry: tracks which users have a live gateway connection and
/// hands out the per-connection send channel for targeted delivery.
///
/// All operations are synchronous in-memory work under a std `RwLock`; they
/// never suspend. At most one connection is recorded per user — a reconnect
/// overwrites the previous entry (last-write-wins) without closing it, and
/// the old connection's eventual unregister is a no-op.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for events every connection should see
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Active connections: user_id -> (conn_id, targeted sender)
    connections: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to broadcast events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Record a connection for `user_id`, replacing any previous one, and
    /// broadcast the updated online-users snapshot.
    /// Returns (conn_id, targeted receiver).
    pub fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let snapshot = {
            let mut connections = self
                .inner
                .connections
                .write()
                .expect("presence lock poisoned");
            connections.insert(user_id, (conn_id, tx));
            connections.keys().copied().collect()
        };

        self.broadcast_snapshot(snapshot);
        (conn_id, rx)
    }

    /// Remove whichever user currently owns `conn_id` and broadcast the
    /// updated snapshot. A stale handle (the user reconnected under a new
    /// conn_id before this one signalled disconnect) is a no-op.
    pub fn unregister(&self, conn_id: Uuid) {
        let snapshot = {
            let mut connections = self
                .inner
                .connections
                .write()
                .expect("presence lock poisoned");

            let owner = connections
                .iter()
                .find(|(_, (cid, _))| *cid == conn_id)
                .map(|(uid, _)| *uid);

            match owner {
                Some(uid) => {
                    connections.remove(&uid);
                    connections.keys().copied().collect()
                }
                None => return,
            }
        };

        self.broadcast_snapshot(snapshot);
    }

    /// Targeted send channel for `user_id`, if they are online. Pure read.
    pub fn lookup(&self, user_id: Uuid) -> Option<mpsc::UnboundedSender<GatewayEvent>> {
        self.inner
            .connections
            .read()
            .expect("presence lock poisoned")
            .get(&user_id)
            .map(|(_, tx)| tx.clone())
    }

    /// Snapshot of every online user.
    pub fn online_users(&self) -> Vec<Uuid> {
        self.inner
            .connections
            .read()
            .expect("presence lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    fn broadcast_snapshot(&self, user_ids: Vec<Uuid>) {
        // No subscribers is fine (e.g. last connection just left)
        let _ = self
            .inner
            .broadcast_tx
            .send(GatewayEvent::OnlineUsers { user_ids });
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup_returns_live_channel() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (_conn, mut rx) = dispatcher.register(user);

        let tx = dispatcher.lookup(user).expect("user should be online");
        tx.send(GatewayEvent::Ready { user_id: user }).unwrap();
        assert!(matches!(rx.try_recv(), Ok(GatewayEvent::Ready { .. })));
    }

    #[test]
    fn reconnect_is_last_write_wins() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (_old_conn, mut old_rx) = dispatcher.register(user);
        let (_new_conn, mut new_rx) = dispatcher.register(user);

        let tx = dispatcher.lookup(user).expect("user should be online");
        tx.send(GatewayEvent::Ready { user_id: user }).unwrap();

        assert!(new_rx.try_recv().is_ok());
        assert!(old_rx.try_recv().is_err());
    }

    #[test]
    fn stale_unregister_is_a_noop() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (old_conn, _old_rx) = dispatcher.register(user);
        let (_new_conn, _new_rx) = dispatcher.register(user);

        // The old connection disconnects after the reconnect took over.
        dispatcher.unregister(old_conn);

        assert!(dispatcher.lookup(user).is_some());
        assert_eq!(dispatcher.online_users(), vec![user]);
    }

    #[test]
    fn current_unregister_goes_offline() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (conn, _rx) = dispatcher.register(user);
        dispatcher.unregister(conn);

        assert!(dispatcher.lookup(user).is_none());
        assert!(dispatcher.online_users().is_empty());
    }

    #[test]
    fn presence_changes_broadcast_snapshots() {
        let dispatcher = Dispatcher::new();
        let mut events = dispatcher.subscribe();
        let user = Uuid::new_v4();

        let (conn, _rx) = dispatcher.register(user);
        match events.try_recv() {
            Ok(GatewayEvent::OnlineUsers { user_ids }) => assert_eq!(user_ids, vec![user]),
            other => panic!("expected OnlineUsers snapshot, got {:?}", other),
        }

        dispatcher.unregister(conn);
        match events.try_recv() {
            Ok(GatewayEvent::OnlineUsers { user_ids }) => assert!(user_ids.is_empty()),
            other => panic!("expected OnlineUsers snapshot, got {:?}", other),
        }
    }

    #[test]
    fn stale_unregister_broadcasts_nothing() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (old_conn, _old_rx) = dispatcher.register(user);
        let (_new_conn, _new_rx) = dispatcher.register(user);

        let mut events = dispatcher.subscribe();
        dispatcher.unregister(old_conn);
        assert!(events.try_recv().is_err());
    }
}
