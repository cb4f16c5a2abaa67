//! Topic → consumer registry multiplexed over the single broker link.
//!
//! Consumers register interest in a topic at any time. While no link is
//! attached the registration is only stored; the connection manager hands each
//! new link to [`SubscriptionRegistry::attach_and_resubscribe`], so consumers
//! never have to re-subscribe after a reconnect.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bazaar_shared::{Command, Frame};
use serde_json::Value;

use super::connection::LinkHandle;

/// Callback invoked with the parsed JSON body of every message on a topic
pub type TopicCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Identity a consumer registers under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerId(String);

impl ConsumerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct Entry {
    consumer: ConsumerId,
    callback: TopicCallback,
    /// Broker-side subscription id while active on the current link
    handle: Option<String>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    link: Option<LinkHandle>,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Issue a SUBSCRIBE on `link` and return the new subscription id.
    ///
    /// Ids are unique for the lifetime of the registry, so a frame addressed to
    /// a subscription from an earlier link can never match a current one.
    fn activate(&self, link: &LinkHandle, topic: &str) -> Option<String> {
        let id = format!("sub-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        match link.subscribe(&id, topic) {
            Ok(()) => {
                tracing::debug!("Subscribed {} as {}", topic, id);
                Some(id)
            }
            Err(e) => {
                tracing::warn!("Could not subscribe {}: {}", topic, e);
                None
            }
        }
    }

    /// Register `callback` for `topic`, replacing any previous registration.
    ///
    /// Activated on the broker immediately when a link is attached, otherwise
    /// when the next link is attached.
    pub fn subscribe<F>(&self, topic: &str, consumer: ConsumerId, callback: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let mut inner = self.lock();

        if let Some(previous) = inner.entries.remove(topic) {
            tracing::debug!(
                "{} replaces {} as consumer of {}",
                consumer,
                previous.consumer,
                topic
            );
            if let (Some(handle), Some(link)) = (previous.handle, inner.link.as_ref()) {
                if let Err(e) = link.unsubscribe(&handle) {
                    tracing::warn!(
                        "Could not cancel {} ({}) on {}: {}",
                        handle,
                        previous.consumer,
                        topic,
                        e
                    );
                }
            }
        }

        let handle = match inner.link.as_ref() {
            Some(link) => self.activate(link, topic),
            None => {
                tracing::debug!("Deferring subscription to {} until connected", topic);
                None
            }
        };

        inner.entries.insert(
            topic.to_string(),
            Entry {
                consumer,
                callback: Arc::new(callback),
                handle,
            },
        );
    }

    /// Remove `consumer`'s registration for `topic`, cancelling it on the broker
    /// if active. Returns false when the topic belongs to someone else or is
    /// not registered.
    pub fn unsubscribe(&self, topic: &str, consumer: &ConsumerId) -> bool {
        let mut inner = self.lock();

        match inner.entries.get(topic) {
            Some(entry) if &entry.consumer == consumer => {}
            Some(entry) => {
                tracing::debug!(
                    "{} does not own {} (owned by {}), leaving it",
                    consumer,
                    topic,
                    entry.consumer
                );
                return false;
            }
            None => return false,
        }

        let entry = inner.entries.remove(topic);
        if let (Some(handle), Some(link)) = (entry.and_then(|e| e.handle), inner.link.as_ref()) {
            if let Err(e) = link.unsubscribe(&handle) {
                tracing::debug!("Unsubscribe of {} not sent: {}", topic, e);
            }
        }
        tracing::debug!("{} unsubscribed from {}", consumer, topic);
        true
    }

    /// Use `link` for all broker traffic from now on.
    ///
    /// Handles issued on a previous link are forgotten; entries stay inactive
    /// until re-issued.
    pub fn attach(&self, link: LinkHandle) {
        let mut inner = self.lock();
        for entry in inner.entries.values_mut() {
            entry.handle = None;
        }
        inner.link = Some(link);
    }

    /// Attach `link` and re-issue every registration on it in one step.
    ///
    /// A `subscribe` racing with a reconnect sees either the old state or the
    /// fully re-registered one, never a link whose entries are half issued.
    pub fn attach_and_resubscribe(&self, link: LinkHandle) {
        let mut inner = self.lock();
        for entry in inner.entries.values_mut() {
            entry.handle = None;
        }
        inner.link = Some(link.clone());
        let issued = self.reissue(&mut inner, &link);
        tracing::info!("Re-registered {} topic(s)", issued);
    }

    /// Forget the current link; every entry becomes inactive but stays registered.
    pub fn detach(&self) -> Option<LinkHandle> {
        let mut inner = self.lock();
        for entry in inner.entries.values_mut() {
            entry.handle = None;
        }
        inner.link.take()
    }

    /// Issue every registered topic that is not yet active on the attached link.
    pub fn resubscribe_all(&self) {
        let mut inner = self.lock();
        let Some(link) = inner.link.clone() else {
            tracing::warn!("resubscribe_all called without a link");
            return;
        };

        let issued = self.reissue(&mut inner, &link);
        tracing::info!("Re-registered {} topic(s)", issued);
    }

    /// Activate inactive entries on `link`; active ones keep their handle.
    fn reissue(&self, inner: &mut Inner, link: &LinkHandle) -> usize {
        let mut issued = 0;
        for (topic, entry) in inner.entries.iter_mut() {
            if entry.handle.is_some() {
                continue;
            }
            entry.handle = self.activate(link, topic);
            if entry.handle.is_some() {
                issued += 1;
            }
        }
        issued
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Route a MESSAGE frame to the callback registered for its destination.
    ///
    /// Unknown destinations, stale subscription ids and bodies that are not
    /// JSON are logged and dropped.
    pub fn dispatch(&self, frame: &Frame) {
        if frame.command != Command::Message {
            tracing::debug!("Registry ignores {} frame", frame.command);
            return;
        }
        let Some(topic) = frame.destination() else {
            tracing::warn!("MESSAGE without destination dropped");
            return;
        };

        let callback = {
            let inner = self.lock();
            let Some(entry) = inner.entries.get(topic) else {
                tracing::debug!("No consumer for {}, dropping message", topic);
                return;
            };
            if let Some(sub) = frame.subscription() {
                if entry.handle.as_deref() != Some(sub) {
                    tracing::debug!("Dropping stale message for {} from {}", topic, sub);
                    return;
                }
            }
            entry.callback.clone()
        };

        match serde_json::from_str::<Value>(&frame.body) {
            Ok(payload) => callback(payload),
            Err(e) => tracing::error!("Malformed payload on {}: {}", topic, e),
        }
    }

    /// Registered topics, active or not.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<_> = self.lock().entries.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Broker subscription id for `topic` if it is active on the current link.
    pub fn handle_for(&self, topic: &str) -> Option<String> {
        self.lock().entries.get(topic).and_then(|e| e.handle.clone())
    }

    pub fn is_active(&self, topic: &str) -> bool {
        self.handle_for(topic).is_some()
    }

    pub fn consumer_of(&self, topic: &str) -> Option<ConsumerId> {
        self.lock().entries.get(topic).map(|e| e.consumer.clone())
    }

    pub fn is_attached(&self) -> bool {
        self.lock().link.is_some()
    }
}
