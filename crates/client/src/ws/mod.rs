//! Real-time delivery over a single multiplexed broker connection.
//!
//! This module provides:
//! - Connection management with fixed-delay, bounded auto-reconnect
//! - A topic registry that survives reconnects (consumers subscribe once)
//! - STOMP-over-WebSocket and in-memory transports
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 ConnectionManager                   │
//! │   (connect / retry loop, owns the ConnectionState)  │
//! └─────────────────────────────────────────────────────┘
//!            │ opens                     │ attach_and_resubscribe
//!            ▼                           ▼
//!   ┌─────────────────┐        ┌──────────────────────┐
//!   │    Transport    │ frames │ SubscriptionRegistry │
//!   │ (StompWs/Memory)│ ─────▶ │   topic -> callback  │
//!   └─────────────────┘        └──────────────────────┘
//!                                        │ dispatch
//!                         ┌──────────────┴──────────────┐
//!                         ▼                             ▼
//!               ┌───────────────────┐       ┌──────────────────────┐
//!               │ NotificationStore │       │ CategoryRequestStore │
//!               └───────────────────┘       └──────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let manager = ConnectionManager::new(transport, ReconnectConfig::default());
//! manager.registry().subscribe(topics::USER_NOTIFICATIONS, ConsumerId::new("me"), |payload| {
//!     println!("{payload}");
//! });
//! manager.connect(token);
//! ```

mod connection;
mod manager;
pub mod memory;
mod registry;

pub use connection::{
    ConnectionState, Link, LinkHandle, ReconnectConfig, StompWsTransport, Transport,
};
pub use manager::ConnectionManager;
pub use registry::{ConsumerId, SubscriptionRegistry, TopicCallback};
