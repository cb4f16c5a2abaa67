//! Authenticated session as seen by the notification subsystem.
//!
//! Session issuance happens elsewhere; here the credential is an opaque
//! bearer token and the role only decides which broadcast topics apply.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Customer,
    Seller,
    Admin,
}

impl Role {
    /// Elevated roles also receive the broadcast topics.
    pub fn is_elevated(&self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CUSTOMER" | "USER" => Some(Role::Customer),
            "SELLER" => Some(Role::Seller),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// Stored session data
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AuthSession {
    pub user_id: String,
    pub credential: String,
    pub role: Role,
}

impl AuthSession {
    pub fn new(user_id: impl Into<String>, credential: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            credential: credential.into(),
            role,
        }
    }

    /// Two sessions with the same identity subscribe to the same topics.
    pub fn same_identity(&self, other: &AuthSession) -> bool {
        self.user_id == other.user_id && self.role == other.role
    }
}

/// Publishes the current session to stores that follow it.
#[derive(Debug, Clone)]
pub struct SessionContext {
    sender: watch::Sender<Option<AuthSession>>,
}

impl SessionContext {
    pub fn new(initial: Option<AuthSession>) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    pub fn login(&self, session: AuthSession) {
        self.sender.send_replace(Some(session));
    }

    pub fn logout(&self) {
        self.sender.send_replace(None);
    }

    pub fn current(&self) -> Option<AuthSession> {
        self.sender.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<AuthSession>> {
        self.sender.subscribe()
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_admin_is_elevated() {
        assert!(Role::Admin.is_elevated());
        assert!(!Role::Seller.is_elevated());
        assert!(!Role::Customer.is_elevated());
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("user"), Some(Role::Customer));
        assert_eq!(Role::parse("root"), None);
    }

    #[test]
    fn identity_ignores_credential_rotation() {
        let a = AuthSession::new("u1", "token-a", Role::Seller);
        let b = AuthSession::new("u1", "token-b", Role::Seller);
        let c = AuthSession::new("u1", "token-b", Role::Admin);
        assert!(a.same_identity(&b));
        assert!(!b.same_identity(&c));
    }

    #[test]
    fn context_publishes_changes() {
        let ctx = SessionContext::default();
        let mut rx = ctx.watch();
        assert!(ctx.current().is_none());

        ctx.login(AuthSession::new("u1", "t", Role::Customer));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_ref().map(|s| s.user_id.as_str()), Some("u1"));

        ctx.logout();
        assert!(ctx.current().is_none());
    }
}
