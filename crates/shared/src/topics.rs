//! Broker destinations consumed by the client.

/// Per-user notification queue.
pub const USER_NOTIFICATIONS: &str = "/user/queue/notifications";
/// Broadcast notifications, admins only.
pub const ADMIN_NOTIFICATIONS: &str = "/topic/admin-notifications";
/// Per-user category-request updates (sellers see their own requests).
pub const USER_CATEGORY_REQUESTS: &str = "/user/queue/category-requests";
/// Broadcast category-request updates, admins only.
pub const CATEGORY_REQUESTS: &str = "/topic/category-requests";
