//! Category-request workflow.
//!
//! Sellers ask for new categories, admins approve or reject them. Every event
//! on the category-request topics triggers a full re-fetch of the list and is
//! forwarded to the notification alerts; the pushed payload itself is not
//! merged into local state.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bazaar_shared::{
    topics, CategoryActionError, CategoryRequest, CategoryRequestEvent, Decision, TransitionError,
};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api_client::{CategoryRequestApi, RequestScope};
use crate::session::AuthSession;
use crate::stores::NotificationStore;
use crate::ws::{ConnectionManager, ConsumerId};

const CONSUMER: &str = "category-request-store";

#[derive(Default)]
struct State {
    requests: Vec<CategoryRequest>,
    session: Option<AuthSession>,
}

pub struct CategoryRequestStore {
    manager: ConnectionManager,
    api: Arc<dyn CategoryRequestApi>,
    notifications: Arc<NotificationStore>,
    state: Mutex<State>,
    this: Weak<CategoryRequestStore>,
}

fn topics_for(session: &AuthSession) -> Vec<&'static str> {
    let mut topics = vec![topics::USER_CATEGORY_REQUESTS];
    if session.role.is_elevated() {
        topics.push(topics::CATEGORY_REQUESTS);
    }
    topics
}

fn scope_for(session: &AuthSession) -> RequestScope {
    if session.role.is_elevated() {
        RequestScope::All
    } else {
        RequestScope::Own
    }
}

impl CategoryRequestStore {
    pub fn new(
        manager: ConnectionManager,
        api: Arc<dyn CategoryRequestApi>,
        notifications: Arc<NotificationStore>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            manager,
            api,
            notifications,
            state: Mutex::new(State::default()),
            this: this.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reload the list visible to the mounted session.
    pub async fn refresh(&self) {
        let Some(scope) = self.lock().session.as_ref().map(scope_for) else {
            tracing::debug!("Category requests not mounted, skipping refresh");
            return;
        };
        if !self.manager.has_session() {
            tracing::debug!("No session, skipping category request refresh");
            return;
        }

        match self.api.list_category_requests(scope).await {
            Ok(requests) => {
                tracing::debug!("Loaded {} category request(s)", requests.len());
                self.lock().requests = requests;
            }
            Err(e) if e.is_auth_failure() => {
                tracing::warn!("Category request list refused, credential rejected: {}", e)
            }
            Err(e) => tracing::error!("Failed to load category requests: {}", e),
        }
    }

    /// Entry point for payloads delivered on the category-request topics.
    ///
    /// Schedules a refresh on the current runtime and raises an alert.
    pub fn handle_event(&self, payload: Value) {
        match serde_json::from_value::<CategoryRequestEvent>(payload) {
            Ok(event) => {
                let store = self.this.clone();
                tokio::spawn(async move {
                    if let Some(store) = store.upgrade() {
                        store.refresh().await;
                    }
                });
                self.notifications
                    .announce(event.kind.unwrap_or_default(), event.message);
            }
            Err(e) => tracing::error!("Malformed category request event: {}", e),
        }
    }

    pub async fn approve(&self, id: &str) -> Result<(), CategoryActionError> {
        self.decide(id, Decision::Approve).await
    }

    pub async fn reject(&self, id: &str, reason: &str) -> Result<(), CategoryActionError> {
        self.decide(
            id,
            Decision::Reject {
                reason: reason.to_string(),
            },
        )
        .await
    }

    /// Submit `decision` if the request still offers it, then reload.
    async fn decide(&self, id: &str, decision: Decision) -> Result<(), CategoryActionError> {
        let request = self
            .request(id)
            .ok_or_else(|| CategoryActionError::NotFound(id.to_string()))?;

        let actions = request.available_actions();
        let offered = match decision {
            Decision::Approve => actions.approve,
            Decision::Reject { .. } => actions.reject,
        };
        if !offered {
            tracing::warn!(
                "Refusing {:?} on category request {} ({})",
                decision,
                id,
                request.status
            );
            return Err(TransitionError::Terminal(request.status).into());
        }
        request.status.apply(&decision)?;

        match &decision {
            Decision::Approve => self.api.approve_category_request(id).await,
            Decision::Reject { reason } => self.api.reject_category_request(id, reason).await,
        }
        .inspect_err(|e| tracing::error!("Category request {} action failed: {}", id, e))?;

        tracing::info!("Category request {} processed", id);
        self.refresh().await;
        Ok(())
    }

    pub fn mount(&self, session: &AuthSession) {
        let previous = self.lock().session.replace(session.clone());
        if let Some(previous) = previous {
            self.unsubscribe_topics(&previous);
        }

        for topic in topics_for(session) {
            let store = self.this.clone();
            self.manager
                .registry()
                .subscribe(topic, ConsumerId::new(CONSUMER), move |payload| {
                    if let Some(store) = store.upgrade() {
                        store.handle_event(payload);
                    }
                });
        }
    }

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

    /// Re-evaluate registrations when the session identity changes.
    pub fn set_session(&self, session: Option<&AuthSession>) {
        let current = self.lock().session.clone();
        match (current.as_ref(), session) {
            (Some(current), Some(next)) if current.same_identity(next) => return,
            (None, None) => return,
            _ => {}
        }

        self.unmount();
        self.lock().requests.clear();
        if let Some(session) = session {
            self.mount(session);
        }
    }

    /// Track the published session, remounting on every identity change.
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

    pub fn requests(&self) -> Vec<CategoryRequest> {
        self.lock().requests.clone()
    }

    pub fn request(&self, id: &str) -> Option<CategoryRequest> {
        self.lock().requests.iter().find(|r| r.id == id).cloned()
    }
}
