//! HTTP API client for the marketplace backend.

use async_trait::async_trait;
use bazaar_shared::{ApiError, CategoryRequest, NotificationPage, RejectRequest};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// HTTP client attaching the session's bearer credential to every request.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    credential: Option<String>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: String::new(),
            credential: None,
        }
    }

    /// Set the base URL for API requests
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Configure the bearer credential
    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential;
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if self.base_url.is_empty() {
            if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            }
        } else {
            let base = self.base_url.trim_end_matches('/');
            let path = path.trim_start_matches('/');
            format!("{base}/{path}")
        }
    }

    fn authorize(&self, rb: RequestBuilder) -> RequestBuilder {
        match &self.credential {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    async fn execute<TRes: DeserializeOwned>(&self, rb: RequestBuilder) -> Result<TRes, ApiError> {
        let resp = self
            .authorize(rb)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }

        if text.is_empty() {
            serde_json::from_str("null").map_err(|e| ApiError::Deserialize(e.to_string()))
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
        }
    }

    /// Make an authorized GET request
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        self.execute(self.client.get(self.url(path))).await
    }

    /// Make an authorized PUT request with JSON body
    pub async fn put_json<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        self.execute(self.client.put(self.url(path)).json(body)).await
    }

    /// Make an authorized PUT request without a body, ignoring any response content
    pub async fn put_empty(&self, path: &str) -> Result<(), ApiError> {
        self.execute::<serde_json::Value>(self.client.put(self.url(path)))
            .await
            .map(|_| ())
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Notification endpoints used by the notification store
#[async_trait]
pub trait NotificationApi: Send + Sync {
    async fn fetch_notifications(&self) -> Result<NotificationPage, ApiError>;
    async fn mark_as_read(&self, id: &str) -> Result<(), ApiError>;
    async fn mark_all_as_read(&self) -> Result<(), ApiError>;
}

/// Which category requests a listing returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestScope {
    /// The caller's own requests (sellers)
    Own,
    /// Every request (admins)
    All,
}

/// Category-request endpoints used by the workflow consumer
#[async_trait]
pub trait CategoryRequestApi: Send + Sync {
    async fn list_category_requests(
        &self,
        scope: RequestScope,
    ) -> Result<Vec<CategoryRequest>, ApiError>;
    async fn approve_category_request(&self, id: &str) -> Result<(), ApiError>;
    async fn reject_category_request(&self, id: &str, reason: &str) -> Result<(), ApiError>;
}

#[async_trait]
impl NotificationApi for ApiClient {
    async fn fetch_notifications(&self) -> Result<NotificationPage, ApiError> {
        self.get_json("/api/notifications").await
    }

    async fn mark_as_read(&self, id: &str) -> Result<(), ApiError> {
        self.put_empty(&format!("/api/notifications/{id}/read")).await
    }

    async fn mark_all_as_read(&self) -> Result<(), ApiError> {
        self.put_empty("/api/notifications/read-all").await
    }
}

#[async_trait]
impl CategoryRequestApi for ApiClient {
    async fn list_category_requests(
        &self,
        scope: RequestScope,
    ) -> Result<Vec<CategoryRequest>, ApiError> {
        match scope {
            RequestScope::Own => self.get_json("/api/category-requests").await,
            RequestScope::All => self.get_json("/api/admin/category-requests").await,
        }
    }

    async fn approve_category_request(&self, id: &str) -> Result<(), ApiError> {
        self.put_empty(&format!("/api/admin/category-requests/{id}/approve"))
            .await
    }

    async fn reject_category_request(&self, id: &str, reason: &str) -> Result<(), ApiError> {
        let body = RejectRequest {
            reason: reason.to_string(),
        };
        self.put_json::<_, serde_json::Value>(
            &format!("/api/admin/category-requests/{id}/reject"),
            &body,
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_base_and_path() {
        let api = ApiClient::new().with_base_url("http://localhost:8080/");
        assert_eq!(api.url("/api/notifications"), "http://localhost:8080/api/notifications");
        assert_eq!(api.url("api/notifications"), "http://localhost:8080/api/notifications");
        assert_eq!(api.url("https://other.example/x"), "https://other.example/x");

        let relative = ApiClient::new();
        assert_eq!(relative.url("api/x"), "/api/x");
        assert_eq!(relative.url("/api/x"), "/api/x");
    }
}
