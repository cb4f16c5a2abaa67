//! Broker connection manager.
//!
//! Owns the connection lifecycle for one authenticated session: initial
//! connect, fixed-delay bounded reconnection and re-registration of every
//! topic in the [`SubscriptionRegistry`] after each successful connect.
//! Failures are logged and reflected in [`ConnectionState`]; nothing here
//! returns an error to the caller.

use std::sync::{Arc, Mutex, MutexGuard};

use bazaar_shared::{Command, Frame, HEADER_MESSAGE};
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::connection::{ConnectionState, Link, ReconnectConfig, Transport};
use super::registry::SubscriptionRegistry;

#[derive(Default)]
struct Control {
    credential: Option<String>,
    /// Bumped on every connect/disconnect; a retry loop only acts while its
    /// generation is current.
    generation: u64,
    driver: Option<JoinHandle<()>>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    registry: Arc<SubscriptionRegistry>,
    config: ReconnectConfig,
    state: watch::Sender<ConnectionState>,
    control: Mutex<Control>,
}

impl Inner {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: ConnectionState) {
        tracing::debug!("Connection state -> {:?}", state);
        self.state.send_replace(state);
    }

    /// Apply `state` only if `generation` is still the live one.
    fn transition(&self, generation: u64, state: ConnectionState) -> bool {
        let control = self.control();
        if control.generation != generation {
            return false;
        }
        self.set_state(state);
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        self.control().generation == generation
    }
}

/// Handle to the session's broker connection. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(transport: impl Transport, config: ReconnectConfig) -> Self {
        Self::with_registry(Arc::new(transport), config, Arc::new(SubscriptionRegistry::new()))
    }

    pub fn with_registry(
        transport: Arc<dyn Transport>,
        config: ReconnectConfig,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                transport,
                registry,
                config,
                state,
                control: Mutex::new(Control::default()),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// True while a credential is stored, i.e. between `connect` and `disconnect`.
    pub fn has_session(&self) -> bool {
        self.inner.control().credential.is_some()
    }

    /// Start connecting with `credential`. No-op while connected or connecting.
    ///
    /// From `Reconnecting` or `Failed` this cancels any pending retry and
    /// starts over from attempt zero. Must be called inside a tokio runtime.
    pub fn connect(&self, credential: impl Into<String>) {
        let mut control = self.inner.control();

        let current = self.state();
        if matches!(current, ConnectionState::Connected | ConnectionState::Connecting) {
            tracing::debug!("connect() ignored, already {:?}", current);
            return;
        }

        if let Some(driver) = control.driver.take() {
            driver.abort();
        }
        let credential = credential.into();
        control.credential = Some(credential.clone());
        control.generation += 1;
        let generation = control.generation;

        self.inner.set_state(ConnectionState::Connecting);
        control.driver = Some(tokio::spawn(drive(self.inner.clone(), generation, credential)));
    }

    /// Tear down the link, cancel pending retries and forget every subscription.
    pub fn disconnect(&self) {
        let mut control = self.inner.control();
        control.generation += 1;
        control.credential = None;
        if let Some(driver) = control.driver.take() {
            driver.abort();
        }

        if let Some(link) = self.inner.registry.detach() {
            if let Err(e) = link.disconnect() {
                tracing::debug!("DISCONNECT not sent: {}", e);
            }
        }
        self.inner.registry.clear();
        self.inner.set_state(ConnectionState::Disconnected);
        tracing::info!("Disconnected from broker");
    }
}

/// Connect/retry loop for one generation.
async fn drive(inner: Arc<Inner>, generation: u64, credential: String) {
    let mut attempt = 0u32;

    loop {
        match inner.transport.open(&credential).await {
            Ok(Link { handle, mut inbound }) => {
                {
                    let control = inner.control();
                    if control.generation != generation {
                        if let Err(e) = handle.disconnect() {
                            tracing::debug!("DISCONNECT for superseded link not sent: {}", e);
                        }
                        return;
                    }
                    inner.registry.attach_and_resubscribe(handle);
                    inner.set_state(ConnectionState::Connected);
                }
                attempt = 0;
                tracing::info!("Connected to broker");

                while let Some(frame) = inbound.next().await {
                    route(&inner, &frame);
                }

                if !inner.is_current(generation) {
                    return;
                }
                inner.registry.detach();
                tracing::warn!("Broker connection closed unexpectedly");
            }
            Err(e) => {
                tracing::error!("Broker connection failed: {}", e);
            }
        }

        if attempt >= inner.config.max_attempts {
            let reason = format!(
                "Max reconnect attempts ({}) exceeded",
                inner.config.max_attempts
            );
            tracing::error!("{}", reason);
            inner.transition(generation, ConnectionState::Failed { reason });
            return;
        }

        attempt += 1;
        if !inner.transition(generation, ConnectionState::Reconnecting { attempt }) {
            return;
        }
        tracing::info!(
            "Reconnecting in {:?} (attempt {}/{})",
            inner.config.delay,
            attempt,
            inner.config.max_attempts
        );
        tokio::time::sleep(inner.config.delay).await;
    }
}

fn route(inner: &Inner, frame: &Frame) {
    match frame.command {
        Command::Message => inner.registry.dispatch(frame),
        Command::Error => tracing::error!(
            "Broker error: {}",
            frame.get(HEADER_MESSAGE).unwrap_or(frame.body.as_str())
        ),
        other => tracing::debug!("Ignoring {} frame", other),
    }
}
