//! Bazaar Client - real-time notification delivery
//!
//! This crate keeps one authenticated broker connection per session and fans
//! pushed events out to the notification store and the category-request
//! workflow, with REST as the source of truth behind both.

pub mod alerts;
pub mod api_client;
pub mod config;
pub mod session;
pub mod stores;
pub mod ws;

pub use alerts::{Alert, AlertSink, ChannelAlerts, LogAlerts};
pub use api_client::{ApiClient, CategoryRequestApi, NotificationApi, RequestScope};
pub use config::ClientConfig;
pub use session::{AuthSession, Role, SessionContext};
pub use stores::{CategoryRequestStore, NotificationStore, SyncState};
pub use ws::{ConnectionManager, ConnectionState};
