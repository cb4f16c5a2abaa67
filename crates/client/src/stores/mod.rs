//! Consumers of the real-time link holding per-session state.

pub mod category_requests;
pub mod notifications;

pub use category_requests::CategoryRequestStore;
pub use notifications::{NotificationSnapshot, NotificationStore, StoredNotification, SyncState};
