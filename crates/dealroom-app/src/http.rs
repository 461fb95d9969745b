//! HTTP implementation of the request/response API.
//!
//! Endpoints, relative to the configured base URL:
//!
//! | Operation | Request |
//! |---|---|
//! | `list_conversations` | `GET /conversations` |
//! | `list_messages` | `GET /conversations/{id}/messages` |
//! | `send_message` | `POST /conversations/{id}/messages` |
//! | `mark_read` | `PUT /conversations/{id}/read` |
//! | `unread_count` | `GET /conversations/unread-count` |
//!
//! Every request carries `Authorization: Bearer <credential>` read from the
//! credential source at call time.

use std::sync::Arc;

use dealroom_core::CredentialSource;
use dealroom_proto::{Conversation, ConversationId, Message, SendMessagePayload};
use reqwest::{RequestBuilder, Response, header::AUTHORIZATION};
use serde_json::Value;

use crate::api::{ApiError, ConversationApi};

/// Longest error body kept in `ApiError::Status`.
const MAX_ERROR_BODY: usize = 512;

/// HTTP client for the conversation API.
#[derive(Clone)]
pub struct HttpApi {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialSource>,
}

impl HttpApi {
    /// Client for `base_url` authenticating with `credentials`.
    pub fn new(base_url: impl Into<String>, credentials: Arc<dyn CredentialSource>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http: reqwest::Client::new(), base_url, credentials }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        let credential = self.credentials.current().ok_or(ApiError::Unauthenticated)?;
        Ok(request.header(AUTHORIZATION, credential.authorization()))
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = self
            .authorize(request)?
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(floor_char_boundary(&body, MAX_ERROR_BODY));
            return Err(ApiError::Status { status: status.as_u16(), body });
        }

        Ok(response)
    }
}

impl ConversationApi for HttpApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let response = self.execute(self.http.get(self.url("/conversations"))).await?;
        response.json().await.map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, ApiError> {
        let url = self.url(&format!("/conversations/{conversation_id}/messages"));
        let response = self.execute(self.http.get(url)).await?;
        response.json().await.map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        payload: &SendMessagePayload,
    ) -> Result<Message, ApiError> {
        let url = self.url(&format!("/conversations/{conversation_id}/messages"));
        let response = self.execute(self.http.post(url).json(payload)).await?;
        response.json().await.map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn mark_read(&self, conversation_id: &ConversationId) -> Result<(), ApiError> {
        let url = self.url(&format!("/conversations/{conversation_id}/read"));
        self.execute(self.http.put(url)).await?;
        Ok(())
    }

    async fn unread_count(&self) -> Result<u32, ApiError> {
        let response = self.execute(self.http.get(self.url("/conversations/unread-count"))).await?;
        let value: Value = response.json().await.map_err(|e| ApiError::Decode(e.to_string()))?;
        unread_from(&value)
            .ok_or_else(|| ApiError::Decode(format!("unexpected unread count: {value}")))
    }
}

/// Accepts a bare number or an object with a `count`/`unreadCount` field.
fn unread_from(value: &Value) -> Option<u32> {
    let number = match value {
        Value::Object(fields) => fields.get("count").or_else(|| fields.get("unreadCount"))?,
        other => other,
    };
    number.as_u64().and_then(|n| u32::try_from(n).ok())
}

fn floor_char_boundary(text: &str, max: usize) -> usize {
    if text.len() <= max {
        return text.len();
    }
    (0..=max).rev().find(|&index| text.is_char_boundary(index)).unwrap_or(0)
}
