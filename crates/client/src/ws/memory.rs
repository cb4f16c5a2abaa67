//! In-memory broker for testing
//!
//! [`MemoryBroker`] plays the broker side of STOMP inside the process:
//! it accepts links, tracks SUBSCRIBE/UNSUBSCRIBE per link and fans out
//! published messages to matching subscriptions. Tests use it to force
//! link loss, refuse connections and inspect what the client registered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bazaar_shared::{Command, Frame, TransportError, HEADER_DESTINATION, HEADER_ID};
use futures_channel::mpsc::{unbounded, UnboundedSender};
use futures_util::StreamExt;

use super::connection::{Link, LinkHandle, Transport};

struct Session {
    id: u64,
    to_client: UnboundedSender<Frame>,
    /// subscription id -> destination
    subscriptions: HashMap<String, String>,
    live: bool,
}

#[derive(Default)]
struct BrokerState {
    sessions: Vec<Session>,
    refuse: bool,
    open_calls: usize,
    credentials: Vec<String>,
    received: Vec<Command>,
    next_session: u64,
}

/// Process-local broker; clones share state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Transport that opens links to this broker
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            broker: self.clone(),
        }
    }

    /// Refuse (or accept again) new connections.
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse = refuse;
    }

    /// Close every live link from the broker side.
    pub fn drop_connections(&self) {
        let mut state = self.lock();
        for session in state.sessions.iter_mut().filter(|s| s.live) {
            session.live = false;
            session.to_client.close_channel();
        }
    }

    /// Deliver `body` to every live subscription on `destination`.
    /// Returns the number of deliveries.
    pub fn publish(&self, destination: &str, body: &str) -> usize {
        let state = self.lock();
        let mut delivered = 0;
        for session in state.sessions.iter().filter(|s| s.live) {
            for (sub_id, dest) in &session.subscriptions {
                if dest == destination
                    && session
                        .to_client
                        .unbounded_send(Frame::message(sub_id, destination, body))
                        .is_ok()
                {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Push a raw frame to every live link.
    pub fn inject(&self, frame: Frame) {
        let state = self.lock();
        for session in state.sessions.iter().filter(|s| s.live) {
            let _ = session.to_client.unbounded_send(frame.clone());
        }
    }

    /// `(subscription id, destination)` pairs on live links, sorted by destination.
    pub fn active_subscriptions(&self) -> Vec<(String, String)> {
        let state = self.lock();
        let mut subs: Vec<_> = state
            .sessions
            .iter()
            .filter(|s| s.live)
            .flat_map(|s| s.subscriptions.iter().map(|(id, d)| (id.clone(), d.clone())))
            .collect();
        subs.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        subs
    }

    /// Destinations with a live subscription, sorted.
    pub fn destinations(&self) -> Vec<String> {
        let mut dests: Vec<_> = self.active_subscriptions().into_iter().map(|(_, d)| d).collect();
        dests.dedup();
        dests
    }

    pub fn live_connections(&self) -> usize {
        self.lock().sessions.iter().filter(|s| s.live).count()
    }

    /// Every `open` call, accepted or refused.
    pub fn open_calls(&self) -> usize {
        self.lock().open_calls
    }

    /// Credentials presented on each accepted connection.
    pub fn credentials(&self) -> Vec<String> {
        self.lock().credentials.clone()
    }

    /// Commands received from clients, in order.
    pub fn received(&self) -> Vec<Command> {
        self.lock().received.clone()
    }

    fn handle_client_frame(&self, session_id: u64, frame: Frame) {
        let mut state = self.lock();
        state.received.push(frame.command);
        let Some(session) = state.sessions.iter_mut().find(|s| s.id == session_id) else {
            return;
        };

        match frame.command {
            Command::Subscribe => {
                if let (Some(id), Some(dest)) = (frame.get(HEADER_ID), frame.get(HEADER_DESTINATION)) {
                    session.subscriptions.insert(id.to_string(), dest.to_string());
                }
            }
            Command::Unsubscribe => {
                if let Some(id) = frame.get(HEADER_ID) {
                    session.subscriptions.remove(id);
                }
            }
            Command::Disconnect => {
                session.live = false;
                session.to_client.close_channel();
            }
            _ => {}
        }
    }

    fn end_session(&self, session_id: u64) {
        let mut state = self.lock();
        if let Some(session) = state.sessions.iter_mut().find(|s| s.id == session_id) {
            session.live = false;
            session.to_client.close_channel();
        }
    }
}

/// Transport half of [`MemoryBroker`]
#[derive(Clone)]
pub struct MemoryTransport {
    broker: MemoryBroker,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, credential: &str) -> Result<Link, TransportError> {
        let (to_broker, mut from_client) = unbounded::<Frame>();
        let (to_client, from_broker) = unbounded::<Frame>();

        let session_id = {
            let mut state = self.broker.lock();
            state.open_calls += 1;
            if state.refuse {
                return Err(TransportError::Connect("connection refused".into()));
            }
            state.credentials.push(credential.to_string());
            let id = state.next_session;
            state.next_session += 1;
            state.sessions.push(Session {
                id,
                to_client,
                subscriptions: HashMap::new(),
                live: true,
            });
            id
        };
        tracing::debug!("Memory broker accepted session {}", session_id);

        let broker = self.broker.clone();
        tokio::spawn(async move {
            while let Some(frame) = from_client.next().await {
                broker.handle_client_frame(session_id, frame);
            }
            broker.end_session(session_id);
        });

        Ok(Link {
            handle: LinkHandle::new(to_broker),
            inbound: from_broker,
        })
    }
}
