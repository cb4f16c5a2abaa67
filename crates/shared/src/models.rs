//! Shared data models for notifications and the category-request workflow.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::error::TransitionError;

// --- Identifiers ---

/// The backend emits numeric ids on some endpoints and strings on others.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireId {
    Text(String),
    Number(i64),
}

impl From<WireId> for String {
    fn from(id: WireId) -> Self {
        match id {
            WireId::Text(s) => s,
            WireId::Number(n) => n.to_string(),
        }
    }
}

fn de_id<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    WireId::deserialize(de).map(String::from)
}

fn de_opt_id<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<WireId>::deserialize(de)?.map(String::from))
}

// --- Timestamps ---

/// RFC 3339, or a local date-time without offset (read as UTC) as Java
/// `LocalDateTime` serializes it.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| s.parse::<NaiveDateTime>().ok().map(|naive| naive.and_utc()))
}

fn de_timestamp<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(de)?;
    parse_timestamp(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp '{raw}'")))
}

/// Optional timestamp; anything unreadable counts as absent.
fn de_opt_timestamp<'de, D: Deserializer<'de>>(de: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    let raw = Option::<serde_json::Value>::deserialize(de)?;
    Ok(raw.as_ref().and_then(|v| v.as_str()).and_then(parse_timestamp))
}

// --- Notifications ---

/// Presentation severity used when alerting the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Success,
    Error,
    Warning,
    Info,
}

/// Notification category as sent by the backend.
///
/// Domain categories are upper snake case on the wire, presentation
/// categories are lowercase. Anything unrecognised reads as `Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationType {
    OrderStatus,
    Promotion,
    System,
    Review,
    Cart,
    SellerRegistration,
    #[default]
    Info,
    Success,
    Error,
    Warning,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::OrderStatus => "ORDER_STATUS",
            NotificationType::Promotion => "PROMOTION",
            NotificationType::System => "SYSTEM",
            NotificationType::Review => "REVIEW",
            NotificationType::Cart => "CART",
            NotificationType::SellerRegistration => "SELLER_REGISTRATION",
            NotificationType::Info => "info",
            NotificationType::Success => "success",
            NotificationType::Error => "error",
            NotificationType::Warning => "warning",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "ORDER_STATUS" => NotificationType::OrderStatus,
            "PROMOTION" => NotificationType::Promotion,
            "SYSTEM" => NotificationType::System,
            "REVIEW" => NotificationType::Review,
            "CART" => NotificationType::Cart,
            "SELLER_REGISTRATION" => NotificationType::SellerRegistration,
            "SUCCESS" => NotificationType::Success,
            "ERROR" => NotificationType::Error,
            "WARNING" => NotificationType::Warning,
            _ => NotificationType::Info,
        }
    }

    /// How an alert for this type should be presented.
    pub fn severity(&self) -> Severity {
        match self {
            NotificationType::Success | NotificationType::SellerRegistration => Severity::Success,
            NotificationType::Error => Severity::Error,
            NotificationType::Warning => Severity::Warning,
            _ => Severity::Info,
        }
    }

    /// Title used when a pushed event carries none.
    pub fn default_title(&self) -> &'static str {
        match self {
            NotificationType::OrderStatus => "Order update",
            NotificationType::Promotion => "Promotion",
            NotificationType::System => "System notice",
            NotificationType::Review => "New review",
            NotificationType::Cart => "Cart update",
            NotificationType::SellerRegistration => "Seller registration",
            NotificationType::Info => "Notification",
            NotificationType::Success => "Success",
            NotificationType::Error => "Error",
            NotificationType::Warning => "Warning",
        }
    }
}

impl From<String> for NotificationType {
    fn from(s: String) -> Self {
        NotificationType::parse(&s)
    }
}

impl From<NotificationType> for String {
    fn from(t: NotificationType) -> Self {
        t.as_str().to_string()
    }
}

/// Entity a notification refers to, if any.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CorrelatedEntity {
    CategoryRequestId(#[serde(deserialize_with = "de_id")] String),
    OrderId(#[serde(deserialize_with = "de_id")] String),
    SellerId(#[serde(deserialize_with = "de_id")] String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: NotificationType,
    #[serde(default)]
    pub read: bool,
    #[serde(deserialize_with = "de_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlated_entity: Option<CorrelatedEntity>,
}

/// Payload pushed on a notification topic. Only `message` is guaranteed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: Option<NotificationType>,
    #[serde(default)]
    pub read: Option<bool>,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub correlated_entity: Option<CorrelatedEntity>,
}

impl NotificationEvent {
    /// A bare event with just a message and a type.
    pub fn new(kind: NotificationType, message: impl Into<String>) -> Self {
        Self {
            id: None,
            title: None,
            message: message.into(),
            kind: Some(kind),
            read: None,
            created_at: None,
            correlated_entity: None,
        }
    }
}

/// `GET /api/notifications` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    #[serde(default)]
    pub unread_count: u64,
}

// --- Category Requests ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CategoryRequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for CategoryRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CategoryRequestStatus::Pending => "PENDING",
            CategoryRequestStatus::Approved => "APPROVED",
            CategoryRequestStatus::Rejected => "REJECTED",
        };
        f.write_str(s)
    }
}

/// An admin decision on a pending request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject { reason: String },
}

impl CategoryRequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CategoryRequestStatus::Pending)
    }

    /// Status after applying `decision`, or why it is not allowed.
    pub fn apply(self, decision: &Decision) -> Result<Self, TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::Terminal(self));
        }
        match decision {
            Decision::Approve => Ok(CategoryRequestStatus::Approved),
            Decision::Reject { reason } if reason.trim().is_empty() => {
                Err(TransitionError::MissingReason)
            }
            Decision::Reject { .. } => Ok(CategoryRequestStatus::Rejected),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRequest {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    pub category_name: String,
    #[serde(default)]
    pub description: String,
    pub status: CategoryRequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(deserialize_with = "de_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(
        default,
        deserialize_with = "de_opt_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub processed_at: Option<DateTime<Utc>>,
}

/// Which admin actions a request currently offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestActions {
    pub approve: bool,
    pub reject: bool,
}

impl CategoryRequest {
    pub fn available_actions(&self) -> RequestActions {
        let open = !self.status.is_terminal();
        RequestActions {
            approve: open,
            reject: open,
        }
    }
}

/// Body of `PUT /api/admin/category-requests/{id}/reject`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RejectRequest {
    pub reason: String,
}

/// Pushed on the category-request topics. Everything but `message` is opaque.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRequestEvent {
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: Option<NotificationType>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_type_reads_both_casings_and_unknowns() {
        assert_eq!(NotificationType::parse("ORDER_STATUS"), NotificationType::OrderStatus);
        assert_eq!(NotificationType::parse("warning"), NotificationType::Warning);
        assert_eq!(NotificationType::parse("Success"), NotificationType::Success);
        assert_eq!(NotificationType::parse("FLASH_SALE"), NotificationType::Info);

        let json = serde_json::to_string(&NotificationType::SellerRegistration).unwrap();
        assert_eq!(json, "\"SELLER_REGISTRATION\"");
        let json = serde_json::to_string(&NotificationType::Error).unwrap();
        assert_eq!(json, "\"error\"");
    }

    #[test]
    fn notification_accepts_numeric_ids_and_missing_fields() {
        let n: Notification = serde_json::from_value(serde_json::json!({
            "id": 42,
            "message": "Your order shipped",
            "type": "ORDER_STATUS",
            "createdAt": "2024-05-01T10:00:00Z",
            "correlatedEntity": { "orderId": 7 }
        }))
        .unwrap();

        assert_eq!(n.id, "42");
        assert_eq!(n.title, "");
        assert!(!n.read);
        assert_eq!(n.kind, NotificationType::OrderStatus);
        assert_eq!(n.correlated_entity, Some(CorrelatedEntity::OrderId("7".into())));
    }

    #[test]
    fn event_only_requires_message() {
        let ev: NotificationEvent =
            serde_json::from_str(r#"{"message":"Stock low","type":"warning"}"#).unwrap();
        assert_eq!(ev.id, None);
        assert_eq!(ev.kind, Some(NotificationType::Warning));
        assert_eq!(ev.read, None);

        assert!(serde_json::from_str::<NotificationEvent>(r#"{"title":"x"}"#).is_err());
    }

    #[test]
    fn timestamps_without_offset_read_as_utc() {
        let expected = "2024-05-01T10:00:00.123456Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(parse_timestamp("2024-05-01T10:00:00.123456"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01T12:00:00.123456+02:00"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);

        let page: NotificationPage = serde_json::from_value(serde_json::json!({
            "notifications": [
                { "id": 1, "message": "a", "createdAt": "2024-05-01T10:00:00" },
                { "id": 2, "message": "b", "createdAt": "2024-05-01T10:00:00Z" }
            ],
            "unreadCount": 2
        }))
        .unwrap();
        assert_eq!(page.notifications.len(), 2);
        assert_eq!(page.notifications[0].created_at, page.notifications[1].created_at);
    }

    #[test]
    fn unreadable_event_timestamp_is_treated_as_missing() {
        let ev: NotificationEvent = serde_json::from_value(serde_json::json!({
            "message": "Order shipped",
            "createdAt": "2024-05-01T10:00:00.123456"
        }))
        .unwrap();
        assert!(ev.created_at.is_some());

        for bad in [
            serde_json::json!("not a date"),
            serde_json::json!(1714557600),
            serde_json::Value::Null,
        ] {
            let ev: NotificationEvent = serde_json::from_value(serde_json::json!({
                "message": "Order shipped",
                "createdAt": bad
            }))
            .unwrap();
            assert_eq!(ev.created_at, None);
        }
    }

    #[test]
    fn pending_request_transitions() {
        let pending = CategoryRequestStatus::Pending;
        assert_eq!(pending.apply(&Decision::Approve), Ok(CategoryRequestStatus::Approved));
        assert_eq!(
            pending.apply(&Decision::Reject { reason: "duplicate".into() }),
            Ok(CategoryRequestStatus::Rejected)
        );
        assert_eq!(
            pending.apply(&Decision::Reject { reason: "   ".into() }),
            Err(TransitionError::MissingReason)
        );
    }

    #[test]
    fn terminal_states_refuse_every_decision() {
        for status in [CategoryRequestStatus::Approved, CategoryRequestStatus::Rejected] {
            assert!(status.is_terminal());
            assert_eq!(status.apply(&Decision::Approve), Err(TransitionError::Terminal(status)));
            assert_eq!(
                status.apply(&Decision::Reject { reason: "late".into() }),
                Err(TransitionError::Terminal(status))
            );
        }
    }

    #[test]
    fn rejected_request_disables_actions() {
        let req: CategoryRequest = serde_json::from_value(serde_json::json!({
            "id": 3,
            "categoryName": "Vinyl records",
            "description": "LPs and singles",
            "status": "REJECTED",
            "rejectionReason": "covered by Music",
            "createdAt": "2024-05-01T10:00:00Z",
            "processedAt": "2024-05-02T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(req.available_actions(), RequestActions { approve: false, reject: false });

        let pending = CategoryRequest {
            status: CategoryRequestStatus::Pending,
            rejection_reason: None,
            processed_at: None,
            ..req
        };
        assert_eq!(pending.available_actions(), RequestActions { approve: true, reject: true });
    }
}
