//! Notification store.
//!
//! Holds the session's notifications and unread count. The REST fetch is the
//! authoritative list; pushes on the notification topics are prepended as they
//! arrive. Mark-read is applied locally first and confirmed with the server
//! afterwards; each entry carries a [`SyncState`] recording how that went.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bazaar_shared::{topics, Notification, NotificationEvent, NotificationType};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::alerts::{Alert, AlertSink};
use crate::api_client::NotificationApi;
use crate::session::AuthSession;
use crate::ws::{ConnectionManager, ConsumerId};

const CONSUMER: &str = "notification-store";

/// Agreement between the local read flag and the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Matches the last server response
    Confirmed,
    /// Changed locally, confirmation in flight
    PendingConfirmation,
    /// Changed locally, the server refused or was unreachable
    ConfirmFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredNotification {
    pub notification: Notification,
    pub sync: SyncState,
}

/// Point-in-time copy of the store, newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationSnapshot {
    pub notifications: Vec<StoredNotification>,
    pub unread_count: usize,
}

#[derive(Default)]
struct State {
    items: Vec<StoredNotification>,
    unread_count: usize,
    session: Option<AuthSession>,
}

impl State {
    fn recount(&mut self) {
        self.unread_count = self
            .items
            .iter()
            .filter(|i| !i.notification.read)
            .count();
    }

    fn settle(&mut self, ids: &[String], ok: bool) {
        let outcome = if ok {
            SyncState::Confirmed
        } else {
            SyncState::ConfirmFailed
        };
        for item in self.items.iter_mut() {
            if item.sync == SyncState::PendingConfirmation && ids.contains(&item.notification.id) {
                item.sync = outcome;
            }
        }
    }
}

pub struct NotificationStore {
    manager: ConnectionManager,
    api: Arc<dyn NotificationApi>,
    alerts: Arc<dyn AlertSink>,
    state: Mutex<State>,
    this: Weak<NotificationStore>,
}

fn topics_for(session: &AuthSession) -> Vec<&'static str> {
    let mut topics = vec![topics::USER_NOTIFICATIONS];
    if session.role.is_elevated() {
        topics.push(topics::ADMIN_NOTIFICATIONS);
    }
    topics
}

impl NotificationStore {
    pub fn new(
        manager: ConnectionManager,
        api: Arc<dyn NotificationApi>,
        alerts: Arc<dyn AlertSink>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            manager,
            api,
            alerts,
            state: Mutex::new(State::default()),
            this: this.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the local list with the server's. Skipped without a session.
    pub async fn fetch_notifications(&self) {
        if !self.manager.has_session() {
            tracing::debug!("No session, skipping notification fetch");
            return;
        }

        let page = match self.api.fetch_notifications().await {
            Ok(page) => page,
            Err(e) if e.is_auth_failure() => {
                tracing::warn!("Notification fetch refused, credential rejected: {}", e);
                return;
            }
            Err(e) => {
                tracing::error!("Failed to fetch notifications: {}", e);
                return;
            }
        };

        let mut state = self.lock();
        state.items = page
            .notifications
            .into_iter()
            .map(|notification| StoredNotification {
                notification,
                sync: SyncState::Confirmed,
            })
            .collect();
        state.recount();
        if state.unread_count as u64 != page.unread_count {
            tracing::debug!(
                "Server reports {} unread, list holds {}",
                page.unread_count,
                state.unread_count
            );
        }
        tracing::info!(
            "Loaded {} notification(s), {} unread",
            state.items.len(),
            state.unread_count
        );
    }

    /// Prepend a pushed notification and raise an alert for it.
    ///
    /// Returns false when a notification with the same id is already held.
    pub fn add_notification(&self, event: NotificationEvent) -> bool {
        let kind = event.kind.unwrap_or_default();
        let notification = Notification {
            id: event
                .id
                .unwrap_or_else(|| format!("local-{}", uuid::Uuid::new_v4())),
            title: event
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| kind.default_title().to_string()),
            message: event.message,
            kind,
            read: event.read.unwrap_or(false),
            created_at: event.created_at.unwrap_or_else(Utc::now),
            correlated_entity: event.correlated_entity,
        };

        {
            let mut state = self.lock();
            if state
                .items
                .iter()
                .any(|i| i.notification.id == notification.id)
            {
                tracing::debug!("Ignoring duplicate notification {}", notification.id);
                return false;
            }
            if !notification.read {
                state.unread_count += 1;
            }
            state.items.insert(
                0,
                StoredNotification {
                    notification: notification.clone(),
                    sync: SyncState::Confirmed,
                },
            );
        }

        self.alerts.alert(Alert {
            severity: kind.severity(),
            title: notification.title,
            message: notification.message,
        });
        true
    }

    /// Entry point for payloads delivered on the notification topics.
    pub fn handle_push(&self, payload: Value) {
        match serde_json::from_value::<NotificationEvent>(payload) {
            Ok(event) => {
                self.add_notification(event);
            }
            Err(e) => tracing::error!("Malformed notification payload: {}", e),
        }
    }

    /// Raise an alert without storing anything.
    pub fn announce(&self, kind: NotificationType, message: impl Into<String>) {
        self.alerts.alert(Alert {
            severity: kind.severity(),
            title: kind.default_title().to_string(),
            message: message.into(),
        });
    }

    /// Mark one notification read, then confirm with the server.
    ///
    /// Unknown ids and already-read entries are left alone. A failed
    /// confirmation keeps the local flag and marks the entry `ConfirmFailed`.
    pub async fn mark_as_read(&self, id: &str) {
        {
            let mut state = self.lock();
            let Some(item) = state.items.iter_mut().find(|i| i.notification.id == id) else {
                tracing::debug!("mark_as_read: unknown notification {}", id);
                return;
            };
            if item.notification.read {
                return;
            }
            item.notification.read = true;
            item.sync = SyncState::PendingConfirmation;
            state.unread_count = state.unread_count.saturating_sub(1);
        }

        let result = self.api.mark_as_read(id).await;
        if let Err(e) = &result {
            tracing::error!("Failed to mark notification {} as read: {}", id, e);
        }
        self.lock().settle(&[id.to_string()], result.is_ok());
    }

    /// Mark everything read with a single confirmation request.
    pub async fn mark_all_as_read(&self) {
        let flipped: Vec<String> = {
            let mut state = self.lock();
            let flipped = state
                .items
                .iter_mut()
                .filter(|i| !i.notification.read)
                .map(|i| {
                    i.notification.read = true;
                    i.sync = SyncState::PendingConfirmation;
                    i.notification.id.clone()
                })
                .collect();
            state.unread_count = 0;
            flipped
        };

        if flipped.is_empty() {
            tracing::debug!("mark_all_as_read: nothing unread");
            return;
        }

        let result = self.api.mark_all_as_read().await;
        if let Err(e) = &result {
            tracing::error!("Failed to mark all notifications as read: {}", e);
        }
        self.lock().settle(&flipped, result.is_ok());
    }

    /// Register the topics `session` is entitled to.
    pub fn mount(&self, session: &AuthSession) {
        let previous = self.lock().session.replace(session.clone());
        if let Some(previous) = previous {
            self.unsubscribe_topics(&previous);
        }

        let registry = self.manager.registry();
        for topic in topics_for(session) {
            let store = self.this.clone();
            registry.subscribe(topic, ConsumerId::new(CONSUMER), move |payload| {
                if let Some(store) = store.upgrade() {
                    store.handle_push(payload);
                }
            });
        }
        tracing::debug!(
            "Notification store mounted for {} ({:?})",
            session.user_id,
            session.role
        );
    }

    /// Release every topic registered by [`mount`](Self::mount).
    pub fn unmount(&self) {
        let session = self.lock().session.take();
        if let Some(session) = session {
            self.unsubscribe_topics(&session);
        }
    }

    fn unsubscribe_topics(&self, session: &AuthSession) {
        let consumer = ConsumerId::new(CONSUMER);
        for topic in topics_for(session) {
            self.manager.registry().unsubscribe(topic, &consumer);
        }
    }

    /// Re-evaluate registrations for a new session. Acts only when the
    /// identity changes; the old identity's notifications are discarded.
    pub fn set_session(&self, session: Option<&AuthSession>) {
        let current = self.lock().session.clone();
        match (current.as_ref(), session) {
            (Some(current), Some(next)) if current.same_identity(next) => return,
            (None, None) => return,
            _ => {}
        }

        self.unmount();
        {
            let mut state = self.lock();
            state.items.clear();
            state.unread_count = 0;
        }
        if let Some(session) = session {
            self.mount(session);
        }
    }

    /// Apply every change published on `sessions` until the sender goes away.
    pub fn follow_session(
        &self,
        mut sessions: watch::Receiver<Option<AuthSession>>,
    ) -> JoinHandle<()> {
        let store = self.this.clone();
        tokio::spawn(async move {
            loop {
                let session = sessions.borrow_and_update().clone();
                match store.upgrade() {
                    Some(store) => store.set_session(session.as_ref()),
                    None => return,
                }
                if sessions.changed().await.is_err() {
                    return;
                }
            }
        })
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.lock()
            .items
            .iter()
            .map(|i| i.notification.clone())
            .collect()
    }

    pub fn unread_count(&self) -> usize {
        self.lock().unread_count
    }

    pub fn sync_state(&self, id: &str) -> Option<SyncState> {
        self.lock()
            .items
            .iter()
            .find(|i| i.notification.id == id)
            .map(|i| i.sync)
    }

    pub fn snapshot(&self) -> NotificationSnapshot {
        let state = self.lock();
        NotificationSnapshot {
            notifications: state.items.clone(),
            unread_count: state.unread_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::ChannelAlerts;
    use crate::session::Role;
    use crate::ws::memory::MemoryBroker;
    use crate::ws::ReconnectConfig;
    use async_trait::async_trait;
    use bazaar_shared::{ApiError, NotificationPage, Severity};
    use futures_channel::mpsc::UnboundedReceiver;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeApi {
        page: Mutex<Option<NotificationPage>>,
        calls: Mutex<Vec<String>>,
        fail: AtomicBool,
        refuse: AtomicBool,
        /// When set, confirmations wait for a permit before answering
        hold: Mutex<Option<Arc<Notify>>>,
    }

    impl FakeApi {
        fn result(&self) -> Result<(), ApiError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(ApiError::Http {
                    status: 500,
                    body: String::new(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl NotificationApi for FakeApi {
        async fn fetch_notifications(&self) -> Result<NotificationPage, ApiError> {
            self.calls.lock().unwrap().push("fetch".into());
            if self.refuse.load(Ordering::SeqCst) {
                return Err(ApiError::Http {
                    status: 401,
                    body: String::new(),
                });
            }
            self.page
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| ApiError::Network("offline".into()))
        }

        async fn mark_as_read(&self, id: &str) -> Result<(), ApiError> {
            self.calls.lock().unwrap().push(format!("read {id}"));
            let hold = self.hold.lock().unwrap().clone();
            if let Some(gate) = hold {
                gate.notified().await;
            }
            self.result()
        }

        async fn mark_all_as_read(&self) -> Result<(), ApiError> {
            self.calls.lock().unwrap().push("read-all".into());
            self.result()
        }
    }

    fn store() -> (Arc<NotificationStore>, Arc<FakeApi>, UnboundedReceiver<Alert>, MemoryBroker) {
        let broker = MemoryBroker::new();
        let manager = ConnectionManager::new(broker.transport(), ReconnectConfig::default());
        let api = Arc::new(FakeApi::default());
        let (alerts, rx) = ChannelAlerts::channel();
        let store = NotificationStore::new(manager, api.clone(), Arc::new(alerts));
        (store, api, rx, broker)
    }

    fn unread(id: &str, message: &str) -> NotificationEvent {
        NotificationEvent {
            id: Some(id.into()),
            ..NotificationEvent::new(NotificationType::Info, message)
        }
    }

    fn assert_invariant(store: &NotificationStore) {
        let snapshot = store.snapshot();
        let unread = snapshot
            .notifications
            .iter()
            .filter(|i| !i.notification.read)
            .count();
        assert_eq!(snapshot.unread_count, unread);
    }

    #[test]
    fn stock_low_warning_on_empty_store() {
        let (store, _, mut alerts, _) = store();

        assert!(store.add_notification(NotificationEvent::new(
            NotificationType::Warning,
            "Stock low"
        )));

        let items = store.notifications();
        assert_eq!(items.len(), 1);
        assert!(!items[0].read);
        assert_eq!(items[0].message, "Stock low");
        assert_eq!(items[0].title, "Warning");
        assert!(items[0].id.starts_with("local-"));
        assert_eq!(store.unread_count(), 1);

        let alert = alerts.try_next().unwrap().unwrap();
        assert_eq!(alert.severity, Severity::Warning);
        assert_eq!(alert.message, "Stock low");
    }

    #[test]
    fn pushes_are_prepended_and_duplicates_ignored() {
        let (store, _, mut alerts, _) = store();
        store.add_notification(unread("1", "first"));
        store.add_notification(unread("2", "second"));
        assert!(!store.add_notification(unread("1", "first again")));

        let ids: Vec<_> = store.notifications().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["2", "1"]);
        assert_eq!(store.unread_count(), 2);

        assert!(alerts.try_next().unwrap().is_some());
        assert!(alerts.try_next().unwrap().is_some());
        assert!(alerts.try_next().is_err());
        assert_invariant(&store);
    }

    #[test]
    fn already_read_push_does_not_count() {
        let (store, _, _, _) = store();
        let mut event = unread("1", "seen elsewhere");
        event.read = Some(true);
        store.add_notification(event);
        assert_eq!(store.unread_count(), 0);
        assert_invariant(&store);
    }

    #[test]
    fn malformed_push_is_dropped() {
        let (store, _, _, _) = store();
        store.handle_push(serde_json::json!({"title": "no message"}));
        store.handle_push(serde_json::json!({"id": 7, "message": "ok", "type": "ORDER_STATUS"}));

        let items = store.notifications();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "7");
        assert_eq!(items[0].kind, NotificationType::OrderStatus);
    }

    #[tokio::test]
    async fn mark_as_read_twice_decrements_once() {
        let (store, api, _, _) = store();
        store.add_notification(unread("1", "a"));
        store.add_notification(unread("2", "b"));

        store.mark_as_read("1").await;
        store.mark_as_read("1").await;

        assert_eq!(store.unread_count(), 1);
        assert_eq!(store.sync_state("1"), Some(SyncState::Confirmed));
        assert_eq!(api.calls.lock().unwrap().as_slice(), &["read 1".to_string()]);
        assert_invariant(&store);
    }

    #[tokio::test]
    async fn mark_all_as_read_clears_three_unread() {
        let (store, api, _, _) = store();
        for id in ["1", "2", "3"] {
            store.add_notification(unread(id, id));
        }
        assert_eq!(store.unread_count(), 3);

        store.mark_all_as_read().await;

        assert_eq!(store.unread_count(), 0);
        assert!(store.notifications().iter().all(|n| n.read));
        assert_eq!(api.calls.lock().unwrap().as_slice(), &["read-all".to_string()]);
        assert_invariant(&store);
    }

    #[tokio::test]
    async fn failed_confirmation_keeps_the_local_flag() {
        let (store, api, _, _) = store();
        store.add_notification(unread("1", "a"));
        api.fail.store(true, Ordering::SeqCst);

        store.mark_as_read("1").await;

        assert_eq!(store.unread_count(), 0);
        assert!(store.notifications()[0].read);
        assert_eq!(store.sync_state("1"), Some(SyncState::ConfirmFailed));
    }

    #[tokio::test]
    async fn fetch_without_session_is_a_no_op() {
        let (store, api, _, _) = store();
        store.fetch_notifications().await;
        assert!(api.calls.lock().unwrap().is_empty());
    }

    fn stored(id: &str, read: bool) -> Notification {
        Notification {
            id: id.into(),
            title: "Order update".into(),
            message: format!("order {id}"),
            kind: NotificationType::OrderStatus,
            read,
            created_at: Utc::now(),
            correlated_entity: None,
        }
    }

    fn page(items: Vec<Notification>) -> NotificationPage {
        let unread_count = items.iter().filter(|n| !n.read).count() as u64;
        NotificationPage {
            notifications: items,
            unread_count,
        }
    }

    #[test]
    fn push_with_offsetless_timestamp_is_stored() {
        let (store, _, _, _) = store();
        store.handle_push(serde_json::json!({
            "id": 1,
            "message": "Order shipped",
            "type": "ORDER_STATUS",
            "createdAt": "2024-05-01T10:00:00.123456"
        }));
        store.handle_push(serde_json::json!({
            "id": 2,
            "message": "Order delivered",
            "createdAt": "sometime"
        }));

        let items = store.notifications();
        assert_eq!(items.len(), 2);
        assert_eq!(store.unread_count(), 2);
        assert_eq!(
            items[1].created_at,
            "2024-05-01T10:00:00.123456Z".parse::<chrono::DateTime<Utc>>().unwrap()
        );
    }

    #[tokio::test]
    async fn fetch_landing_during_pending_confirmation_keeps_the_count() {
        let (store, api, _, _broker) = store();
        store.manager.connect("token");
        *api.page.lock().unwrap() = Some(page(vec![stored("1", false), stored("2", false)]));
        store.fetch_notifications().await;
        assert_invariant(&store);

        let gate = Arc::new(Notify::new());
        *api.hold.lock().unwrap() = Some(gate.clone());
        let pending = {
            let store = store.clone();
            tokio::spawn(async move { store.mark_as_read("1").await })
        };
        while store.sync_state("1") != Some(SyncState::PendingConfirmation) {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.unread_count(), 1);
        assert_invariant(&store);

        // The server has not applied the read yet, so its list still has it unread.
        store.fetch_notifications().await;
        assert_eq!(store.unread_count(), 2);
        assert_eq!(store.sync_state("1"), Some(SyncState::Confirmed));
        assert_invariant(&store);

        gate.notify_one();
        pending.await.unwrap();
        assert_eq!(store.sync_state("1"), Some(SyncState::Confirmed));
        assert_eq!(store.unread_count(), 2);
        assert_invariant(&store);
    }

    #[tokio::test]
    async fn refused_fetch_keeps_the_current_list() {
        let (store, api, _, _broker) = store();
        store.manager.connect("token");
        *api.page.lock().unwrap() = Some(page(vec![stored("1", false), stored("2", true)]));
        store.fetch_notifications().await;

        api.refuse.store(true, Ordering::SeqCst);
        *api.page.lock().unwrap() = Some(page(vec![]));
        store.fetch_notifications().await;

        assert_eq!(store.notifications().len(), 2);
        assert_eq!(store.unread_count(), 1);
        assert_eq!(
            api.calls.lock().unwrap().as_slice(),
            &["fetch".to_string(), "fetch".to_string()]
        );
    }

    #[test]
    fn role_decides_the_topics() {
        let (store, _, _, _) = store();
        let registry = store.manager.registry().clone();

        store.mount(&AuthSession::new("u1", "t", Role::Customer));
        assert_eq!(registry.topics(), vec![topics::USER_NOTIFICATIONS.to_string()]);

        store.set_session(Some(&AuthSession::new("u1", "t2", Role::Customer)));
        assert_eq!(registry.topics().len(), 1);

        store.set_session(Some(&AuthSession::new("u1", "t2", Role::Admin)));
        assert_eq!(
            registry.topics(),
            vec![
                topics::ADMIN_NOTIFICATIONS.to_string(),
                topics::USER_NOTIFICATIONS.to_string()
            ]
        );

        store.set_session(None);
        assert!(registry.topics().is_empty());
    }
}
