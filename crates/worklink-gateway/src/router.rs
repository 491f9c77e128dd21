use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

use worklink_db::Database;
use worklink_types::events::GatewayEvent;
use worklink_types::models::Message;

use crate::dispatcher::Dispatcher;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("message must contain text or an image")]
    EmptyMessage,

    #[error("receiver {0} does not exist")]
    UnknownReceiver(Uuid),

    #[error("message store failure: {0}")]
    Store(#[from] anyhow::Error),
}

/// Routes a newly sent message: persist first, then best-effort push to the
/// receiver's live connection if one is registered.
///
/// Persistence gates the push — a store failure means no push is attempted,
/// and a push failure never fails the send. The sender always gets back the
/// durable record; an offline or flaky receiver catches up via history.
#[derive(Clone)]
pub struct DeliveryRouter {
    db: Arc<Database>,
    dispatcher: Dispatcher,
}

impl DeliveryRouter {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher) -> Self {
        Self { db, dispatcher }
    }

    pub async fn send(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        text: Option<String>,
        image_url: Option<String>,
    ) -> Result<Message, SendError> {
        // Validate before any side effect. Whitespace-only counts as absent,
        // but present text is stored verbatim — no trimming on the way in.
        let text = text.filter(|t| !t.trim().is_empty());
        let image_url = image_url.filter(|u| !u.trim().is_empty());
        if text.is_none() && image_url.is_none() {
            return Err(SendError::EmptyMessage);
        }

        let message = Message {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            text,
            image_url,
            created_at: Utc::now(),
        };

        // Resolve the receiver and append in one blocking hop; the receiver
        // check runs before the insert so an unknown id mutates nothing.
        let db = self.db.clone();
        let record = message.clone();
        tokio::task::spawn_blocking(move || -> Result<(), SendError> {
            if db.get_user_by_id(&record.receiver_id.to_string())?.is_none() {
                return Err(SendError::UnknownReceiver(record.receiver_id));
            }
            db.insert_message(&record)?;
            Ok(())
        })
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            SendError::Store(anyhow::anyhow!("message store task failed: {}", e))
        })??;

        // Fire-and-forget live push. A dead channel means the connection is
        // being torn down; the message is already durable.
        if let Some(tx) = self.dispatcher.lookup(receiver_id) {
            let event = GatewayEvent::NewMessage {
                message: message.clone(),
            };
            if tx.send(event).is_err() {
                debug!("live push to {} failed, recipient will catch up via history", receiver_id);
            }
        }

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router_with_users(users: &[Uuid]) -> (DeliveryRouter, Arc<Database>, Dispatcher) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        for (i, id) in users.iter().enumerate() {
            db.create_user(&id.to_string(), &format!("user{}", i), "hash", None)
                .unwrap();
        }
        let dispatcher = Dispatcher::new();
        (DeliveryRouter::new(db.clone(), dispatcher.clone()), db, dispatcher)
    }

    #[tokio::test]
    async fn send_persists_and_returns_the_message() {
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let (router, db, _) = router_with_users(&[alice, bob]);

        let message = router
            .send(alice, bob, Some("hello".into()), None)
            .await
            .unwrap();

        assert_eq!(message.sender_id, alice);
        assert_eq!(message.receiver_id, bob);
        assert_eq!(message.text.as_deref(), Some("hello"));
        assert!(message.image_url.is_none());

        let rows = db.conversation_between(&alice.to_string(), &bob.to_string()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, message.id.to_string());
    }

    #[tokio::test]
    async fn empty_send_is_rejected_without_store_mutation() {
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let (router, db, _) = router_with_users(&[alice, bob]);

        let err = router.send(alice, bob, None, None).await.unwrap_err();
        assert!(matches!(err, SendError::EmptyMessage));

        // Whitespace-only text counts as absent.
        let err = router
            .send(alice, bob, Some("   ".into()), Some("".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::EmptyMessage));

        let rows = db.conversation_between(&alice.to_string(), &bob.to_string()).unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn unknown_receiver_is_rejected_before_any_insert() {
        let alice = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let (router, db, _) = router_with_users(&[alice]);

        let err = router
            .send(alice, stranger, Some("hi".into()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::UnknownReceiver(id) if id == stranger));

        let rows = db
            .conversation_between(&alice.to_string(), &stranger.to_string())
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn send_succeeds_while_receiver_is_offline() {
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let (router, db, _) = router_with_users(&[alice, bob]);

        // Bob never connected. The send must still persist and succeed.
        let message = router
            .send(alice, bob, Some("see you later".into()), None)
            .await
            .unwrap();

        let rows = db.conversation_between(&alice.to_string(), &bob.to_string()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, message.id.to_string());
    }

    #[tokio::test]
    async fn online_receiver_gets_a_live_push() {
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let (router, _, dispatcher) = router_with_users(&[alice, bob]);

        let (_conn, mut bob_rx) = dispatcher.register(bob);

        let sent = router
            .send(alice, bob, Some("hello".into()), None)
            .await
            .unwrap();

        match bob_rx.try_recv() {
            Ok(GatewayEvent::NewMessage { message }) => {
                assert_eq!(message.id, sent.id);
                assert_eq!(message.sender_id, alice);
                assert_eq!(message.receiver_id, bob);
                assert_eq!(message.text.as_deref(), Some("hello"));
                assert_eq!(message.created_at, sent.created_at);
            }
            other => panic!("expected NewMessage push, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn push_failure_does_not_fail_the_send() {
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let (router, db, dispatcher) = router_with_users(&[alice, bob]);

        // Register bob, then drop his receiver: the registry still holds the
        // handle but pushes to it fail.
        let (_conn, bob_rx) = dispatcher.register(bob);
        drop(bob_rx);

        let message = router
            .send(alice, bob, Some("anyone there?".into()), None)
            .await
            .unwrap();

        let rows = db.conversation_between(&alice.to_string(), &bob.to_string()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, message.id.to_string());
    }

    #[tokio::test]
    async fn text_is_stored_verbatim() {
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let (router, db, _) = router_with_users(&[alice, bob]);

        let message = router
            .send(alice, bob, Some("  spaced out \n".into()), None)
            .await
            .unwrap();
        assert_eq!(message.text.as_deref(), Some("  spaced out \n"));

        let rows = db.conversation_between(&alice.to_string(), &bob.to_string()).unwrap();
        assert_eq!(rows[0].text.as_deref(), Some("  spaced out \n"));
    }

    #[tokio::test]
    async fn delivery_follows_the_latest_connection() {
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let (router, db, dispatcher) = router_with_users(&[alice, bob]);

        // Bob reconnects, then the old connection's late disconnect fires.
        let (old_conn, mut old_rx) = dispatcher.register(bob);
        let (_new_conn, mut new_rx) = dispatcher.register(bob);
        dispatcher.unregister(old_conn);
        assert_eq!(dispatcher.online_users(), vec![bob]);

        let sent = router.send(alice, bob, Some("hello".into()), None).await.unwrap();

        match new_rx.try_recv() {
            Ok(GatewayEvent::NewMessage { message }) => assert_eq!(message.id, sent.id),
            other => panic!("expected NewMessage on the new connection, got {:?}", other),
        }
        assert!(old_rx.try_recv().is_err());

        // Both directions of the history see the persisted message.
        let a = db.conversation_between(&alice.to_string(), &bob.to_string()).unwrap();
        let b = db.conversation_between(&bob.to_string(), &alice.to_string()).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].id, sent.id.to_string());
        assert_eq!(b[0].id, sent.id.to_string());
    }

    #[tokio::test]
    async fn sequential_sends_keep_submission_order() {
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let (router, db, _) = router_with_users(&[alice, bob]);

        let first = router.send(alice, bob, Some("one".into()), None).await.unwrap();
        let second = router.send(alice, bob, Some("two".into()), None).await.unwrap();
        assert!(second.created_at >= first.created_at);

        let rows = db.conversation_between(&alice.to_string(), &bob.to_string()).unwrap();
        let texts: Vec<_> = rows.iter().map(|r| r.text.as_deref().unwrap()).collect();
        assert_eq!(texts, ["one", "two"]);
    }
}
