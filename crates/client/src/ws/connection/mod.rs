//! Broker connection types shared by every transport.
//!
//! A [`Transport`] knows how to open one [`Link`] to the broker. The link is a
//! pair of channels: frames pushed into the [`LinkHandle`] go out to the broker,
//! frames the broker sends arrive on `inbound`. When `inbound` yields `None` the
//! link is gone, whatever the cause (close frame, I/O error, missed heart-beats).

use std::time::Duration;

use async_trait::async_trait;
use bazaar_shared::{Frame, TransportError};
use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender};

/// Connection state of the broker link
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }
}

/// Configuration for auto-reconnect and heart-beating
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Automatic retries after a lost or failed connection before giving up
    pub max_attempts: u32,
    /// Fixed delay before each retry
    pub delay: Duration,
    /// Heart-beat interval offered in both directions
    pub heartbeat: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
            heartbeat: Duration::from_secs(4),
        }
    }
}

/// Handle for sending frames over a live link
#[derive(Clone, Debug)]
pub struct LinkHandle {
    sender: UnboundedSender<Frame>,
}

impl LinkHandle {
    pub fn new(sender: UnboundedSender<Frame>) -> Self {
        Self { sender }
    }

    /// Queue a frame for the broker
    pub fn send(&self, frame: Frame) -> Result<(), TransportError> {
        tracing::trace!("LinkHandle::send {}", frame.command);
        self.sender
            .unbounded_send(frame)
            .map_err(|_| TransportError::Closed)
    }

    pub fn subscribe(&self, id: &str, destination: &str) -> Result<(), TransportError> {
        self.send(Frame::subscribe(id, destination))
    }

    pub fn unsubscribe(&self, id: &str) -> Result<(), TransportError> {
        self.send(Frame::unsubscribe(id))
    }

    /// Politely end the STOMP session; the transport closes the socket afterwards.
    pub fn disconnect(&self) -> Result<(), TransportError> {
        let receipt = format!("disconnect-{}", uuid::Uuid::new_v4());
        self.send(Frame::disconnect(&receipt))
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// One established broker connection
pub struct Link {
    pub handle: LinkHandle,
    pub inbound: UnboundedReceiver<Frame>,
}

/// Opens links to the broker. The credential travels as a connection-time header.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, credential: &str) -> Result<Link, TransportError>;
}

mod connection_native;
pub use connection_native::StompWsTransport;

#[cfg(test)]
mod tests {
    use super::*;
    use futures_channel::mpsc::unbounded;
    use futures_util::StreamExt;

    #[test]
    fn default_reconnect_config_matches_reference_timings() {
        let config = ReconnectConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.delay, Duration::from_secs(5));
        assert_eq!(config.heartbeat, Duration::from_secs(4));
    }

    #[test]
    fn state_predicates() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(ConnectionState::Connecting.is_connecting());
        assert!(ConnectionState::Reconnecting { attempt: 2 }.is_connecting());
        assert!(!ConnectionState::Failed { reason: "x".into() }.is_connecting());
        assert!(!ConnectionState::Disconnected.is_connected());
    }

    #[tokio::test]
    async fn handle_queues_frames_until_receiver_drops() {
        let (tx, mut rx) = unbounded();
        let handle = LinkHandle::new(tx);

        handle.subscribe("sub-0", "/topic/a").unwrap();
        handle.unsubscribe("sub-0").unwrap();

        let first = rx.next().await.unwrap();
        assert_eq!(first.get("destination"), Some("/topic/a"));
        assert_eq!(rx.next().await.unwrap().get("id"), Some("sub-0"));

        drop(rx);
        assert_eq!(handle.subscribe("sub-1", "/topic/b"), Err(TransportError::Closed));
        assert!(handle.is_closed());
    }
}
