//! Chat engine — orchestrates the authoritative flow for every action:
//! load the current view, authorize, run the store mutation, then fan the
//! outcome out through the hub. All cross-admin coordination happens in
//! the store's conditional updates; the engine never holds its own locks.

use std::sync::Arc;

use tracing::info;

use deskline_protocol::{ChatState, ChatStatus, ChatSummary, Role, ServerMessage, UnreadCount};

use crate::auth::Identity;
use crate::error::ChatError;
use crate::hub::Hub;
use crate::notify::Notifier;
use crate::store::ChatStore;
use crate::transition::{self, Action, Outbound, Target};

pub struct ChatEngine {
    store: ChatStore,
    hub: Arc<Hub>,
    notifier: Option<Notifier>,
}

impl ChatEngine {
    pub fn new(store: ChatStore, hub: Arc<Hub>, notifier: Option<Notifier>) -> Self {
        Self {
            store,
            hub,
            notifier,
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    async fn execute(&self, effects: Vec<Outbound>) {
        for effect in effects {
            match effect.target {
                Target::Room(chat_id) => self.hub.broadcast_room(&chat_id, &effect.message).await,
                Target::Admins => self.hub.broadcast_admins(&effect.message).await,
            }
        }
    }

    async fn authorized_summary(
        &self,
        identity: &Identity,
        chat_id: &str,
        action: Action,
    ) -> Result<ChatSummary, ChatError> {
        let summary = self.store.get_summary(chat_id).await?;
        transition::authorize(identity, action, &summary)?;
        Ok(summary)
    }

    /// Fetch the calling customer's chat, creating it lazily on first
    /// access. Creation notifies all admins and fires the optional
    /// external paging hook.
    pub async fn get_or_create_chat(&self, identity: &Identity) -> Result<ChatState, ChatError> {
        if identity.role != Role::Customer {
            return Err(ChatError::NotCustomer);
        }

        let (chat, created) = self.store.get_or_create(&identity.id).await?;
        if created {
            info!(
                component = "engine",
                event = "chat.created",
                chat_id = %chat.id,
                customer_id = %identity.id,
                "Chat created"
            );
            let summary = chat.summary();
            self.execute(transition::created_effects(&summary)).await;
            if let Some(notifier) = &self.notifier {
                notifier.chat_created(&summary);
            }
        }
        Ok(chat)
    }

    pub async fn list_chats(
        &self,
        identity: &Identity,
        status: Option<ChatStatus>,
    ) -> Result<Vec<ChatSummary>, ChatError> {
        if identity.role != Role::Admin {
            return Err(ChatError::NotAdmin);
        }
        self.store.list(status).await
    }

    pub async fn get_chat(
        &self,
        identity: &Identity,
        chat_id: &str,
    ) -> Result<ChatState, ChatError> {
        self.authorized_summary(identity, chat_id, Action::View)
            .await?;
        self.store.get_state(chat_id).await
    }

    pub async fn claim(&self, identity: &Identity, chat_id: &str) -> Result<ChatSummary, ChatError> {
        self.authorized_summary(identity, chat_id, Action::Claim)
            .await?;
        // The store's conditional update is the arbiter when two claims
        // race past the check above.
        let chat = self.store.claim(chat_id, &identity.id).await?;
        info!(
            component = "engine",
            event = "chat.claimed",
            chat_id = %chat_id,
            admin_id = %identity.id,
            "Chat claimed"
        );
        self.execute(transition::claim_effects(&chat, &identity.id))
            .await;
        Ok(chat)
    }

    pub async fn takeover(
        &self,
        identity: &Identity,
        chat_id: &str,
    ) -> Result<ChatSummary, ChatError> {
        self.authorized_summary(identity, chat_id, Action::Takeover)
            .await?;
        let outcome = self.store.takeover(chat_id, &identity.id).await?;
        info!(
            component = "engine",
            event = "chat.takeover",
            chat_id = %chat_id,
            admin_id = %identity.id,
            previous_admin_id = ?outcome.previous_admin_id,
            "Chat taken over"
        );
        self.execute(transition::takeover_effects(&outcome, &identity.id))
            .await;
        Ok(outcome.chat)
    }

    pub async fn release(
        &self,
        identity: &Identity,
        chat_id: &str,
    ) -> Result<ChatSummary, ChatError> {
        self.authorized_summary(identity, chat_id, Action::Release)
            .await?;
        let chat = self.store.release(chat_id, &identity.id).await?;
        info!(
            component = "engine",
            event = "chat.released",
            chat_id = %chat_id,
            admin_id = %identity.id,
            "Chat released to the pool"
        );
        self.execute(transition::release_effects(&chat)).await;
        Ok(chat)
    }

    pub async fn resolve(
        &self,
        identity: &Identity,
        chat_id: &str,
    ) -> Result<ChatSummary, ChatError> {
        self.authorized_summary(identity, chat_id, Action::Resolve)
            .await?;
        let chat = self.store.resolve(chat_id, &identity.id).await?;
        info!(
            component = "engine",
            event = "chat.resolved",
            chat_id = %chat_id,
            admin_id = %identity.id,
            "Chat resolved"
        );
        self.execute(transition::resolve_effects(&chat)).await;
        Ok(chat)
    }

    /// Append a message. Admin sends to an unheld chat claim it in the
    /// same store transaction; customer sends to a resolved chat reopen
    /// it. If the recipient currently has the room open, the unread
    /// counter is immediately cleared again (auto-mark-read) so no badge
    /// accumulates on a conversation someone is already looking at.
    pub async fn send_message(
        &self,
        identity: &Identity,
        chat_id: &str,
        body: &str,
    ) -> Result<ChatSummary, ChatError> {
        self.authorized_summary(identity, chat_id, Action::Send)
            .await?;
        let outcome = self
            .store
            .append_message(chat_id, &identity.id, identity.role, body)
            .await?;
        self.execute(transition::send_effects(&outcome, &identity.id))
            .await;

        let recipient_role = identity.role.opposite();
        let recipient_id = match recipient_role {
            Role::Admin => outcome.chat.assigned_admin_id.clone(),
            Role::Customer => Some(outcome.chat.customer_id.clone()),
        };
        if let Some(recipient_id) = recipient_id {
            if self.hub.is_viewing(chat_id, &recipient_id) {
                let unread = self.store.mark_read(chat_id, recipient_role).await?;
                self.broadcast_read(chat_id, recipient_role, unread).await?;
            }
        }

        Ok(outcome.chat)
    }

    pub async fn mark_read(
        &self,
        identity: &Identity,
        chat_id: &str,
    ) -> Result<UnreadCount, ChatError> {
        self.authorized_summary(identity, chat_id, Action::MarkRead)
            .await?;
        let unread = self.store.mark_read(chat_id, identity.role).await?;
        self.broadcast_read(chat_id, identity.role, unread).await?;
        Ok(unread)
    }

    async fn broadcast_read(
        &self,
        chat_id: &str,
        reader_role: Role,
        unread: UnreadCount,
    ) -> Result<(), ChatError> {
        self.execute(transition::read_effects(chat_id, reader_role, unread))
            .await;
        // Unread counters feed the admin list badges
        let chat = self.store.get_summary(chat_id).await?;
        self.hub
            .broadcast_admins(&ServerMessage::ChatListChanged { chat })
            .await;
        Ok(())
    }

    pub async fn delete(&self, identity: &Identity, chat_id: &str) -> Result<(), ChatError> {
        self.authorized_summary(identity, chat_id, Action::Delete)
            .await?;
        self.store.delete(chat_id).await?;
        info!(
            component = "engine",
            event = "chat.deleted",
            chat_id = %chat_id,
            admin_id = %identity.id,
            "Chat deleted"
        );
        self.execute(transition::delete_effects(chat_id)).await;
        Ok(())
    }

    /// Relay a typing indicator to the rest of the room. Fire-and-forget:
    /// never persisted, never retried, no delivery guarantee.
    pub async fn typing(
        &self,
        identity: &Identity,
        conn_id: u64,
        chat_id: &str,
        started: bool,
    ) -> Result<(), ChatError> {
        self.authorized_summary(identity, chat_id, Action::Typing)
            .await?;
        self.hub
            .broadcast_room_except(
                chat_id,
                Some(conn_id),
                &ServerMessage::TypingChanged {
                    chat_id: chat_id.to_string(),
                    participant_id: identity.id.clone(),
                    role: identity.role,
                    started,
                },
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Member;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn customer(id: &str) -> Identity {
        Identity {
            id: id.to_string(),
            role: Role::Customer,
        }
    }

    fn admin(id: &str) -> Identity {
        Identity {
            id: id.to_string(),
            role: Role::Admin,
        }
    }

    fn test_engine() -> (TempDir, Arc<ChatEngine>) {
        let dir = TempDir::new().unwrap();
        let store = ChatStore::open(dir.path().join("deskline.db")).unwrap();
        let hub = Arc::new(Hub::new());
        (dir, Arc::new(ChatEngine::new(store, hub, None)))
    }

    fn join_room(
        engine: &ChatEngine,
        chat_id: &str,
        conn_id: u64,
        identity: &Identity,
    ) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(64);
        engine.hub().join(
            chat_id,
            Member {
                conn_id,
                participant_id: identity.id.clone(),
                role: identity.role,
                tx,
            },
        );
        rx
    }

    #[tokio::test]
    async fn happy_path_claim_send_read() {
        let (_dir, engine) = test_engine();
        let cust = customer("cust-1");
        let adm = admin("admin-a");

        let chat = engine.get_or_create_chat(&cust).await.unwrap();
        assert_eq!(chat.status, ChatStatus::Unassigned);

        let claimed = engine.claim(&adm, &chat.id).await.unwrap();
        assert_eq!(claimed.assigned_admin_id.as_deref(), Some("admin-a"));

        let after_send = engine.send_message(&adm, &chat.id, "Hello").await.unwrap();
        assert_eq!(after_send.unread.customer, 1);

        let unread = engine.mark_read(&cust, &chat.id).await.unwrap();
        assert_eq!(unread.customer, 0);
    }

    #[tokio::test]
    async fn contested_claim_has_one_winner() {
        let (_dir, engine) = test_engine();
        let chat = engine
            .get_or_create_chat(&customer("cust-1"))
            .await
            .unwrap();

        let a = {
            let engine = engine.clone();
            let id = chat.id.clone();
            tokio::spawn(async move { engine.claim(&admin("admin-a"), &id).await })
        };
        let b = {
            let engine = engine.clone();
            let id = chat.id.clone();
            tokio::spawn(async move { engine.claim(&admin("admin-b"), &id).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for r in &results {
            if let Err(e) = r {
                assert!(matches!(e, ChatError::AlreadyAssigned));
            }
        }
    }

    #[tokio::test]
    async fn takeover_notifies_room_distinctly() {
        let (_dir, engine) = test_engine();
        let cust = customer("cust-1");
        let chat = engine.get_or_create_chat(&cust).await.unwrap();
        engine.claim(&admin("admin-a"), &chat.id).await.unwrap();

        let mut room_rx = join_room(&engine, &chat.id, 1, &admin("admin-a"));
        engine.takeover(&admin("admin-b"), &chat.id).await.unwrap();

        let msg = room_rx.recv().await.unwrap();
        match msg {
            ServerMessage::TakeoverOccurred {
                previous_admin_id,
                admin_id,
                ..
            } => {
                assert_eq!(previous_admin_id, "admin-a");
                assert_eq!(admin_id, "admin-b");
            }
            other => panic!("expected takeover event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn viewing_recipient_triggers_auto_mark_read() {
        let (_dir, engine) = test_engine();
        let cust = customer("cust-1");
        let adm = admin("admin-a");
        let chat = engine.get_or_create_chat(&cust).await.unwrap();
        engine.claim(&adm, &chat.id).await.unwrap();

        // Admin has the chat open
        let mut room_rx = join_room(&engine, &chat.id, 1, &adm);

        engine
            .send_message(&cust, &chat.id, "are you there?")
            .await
            .unwrap();

        // MessageAppended first, then the auto-mark-read receipt
        let first = room_rx.recv().await.unwrap();
        assert!(matches!(first, ServerMessage::MessageAppended { .. }));
        let second = room_rx.recv().await.unwrap();
        match second {
            ServerMessage::ReadReceipts {
                reader_role,
                unread,
                ..
            } => {
                assert_eq!(reader_role, Role::Admin);
                assert_eq!(unread.admin, 0);
            }
            other => panic!("expected read receipts, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn absent_recipient_accumulates_unread() {
        let (_dir, engine) = test_engine();
        let cust = customer("cust-1");
        let adm = admin("admin-a");
        let chat = engine.get_or_create_chat(&cust).await.unwrap();
        engine.claim(&adm, &chat.id).await.unwrap();

        for _ in 0..2 {
            engine
                .send_message(&cust, &chat.id, "hello?")
                .await
                .unwrap();
        }
        let chats = engine.list_chats(&adm, None).await.unwrap();
        assert_eq!(chats[0].unread.admin, 2);
    }

    #[tokio::test]
    async fn delete_while_viewing_clears_projection() {
        let (_dir, engine) = test_engine();
        let cust = customer("cust-1");
        let chat = engine.get_or_create_chat(&cust).await.unwrap();
        engine.claim(&admin("admin-a"), &chat.id).await.unwrap();

        let mut viewer_rx = join_room(&engine, &chat.id, 1, &admin("admin-a"));
        engine.delete(&admin("admin-b"), &chat.id).await.unwrap();

        let msg = viewer_rx.recv().await.unwrap();
        assert!(matches!(msg, ServerMessage::ChatDeleted { .. }));

        let err = engine
            .get_chat(&admin("admin-a"), &chat.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound));
    }

    #[tokio::test]
    async fn customer_cannot_list_chats() {
        let (_dir, engine) = test_engine();
        let err = engine
            .list_chats(&customer("cust-1"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotAdmin));
    }

    #[tokio::test]
    async fn admin_cannot_get_or_create() {
        let (_dir, engine) = test_engine();
        let err = engine
            .get_or_create_chat(&admin("admin-a"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotCustomer));
    }
}
