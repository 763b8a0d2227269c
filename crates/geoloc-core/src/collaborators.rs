//! External collaborators consumed by the stages.
//!
//! Implementations own their own lifecycle (model handles, connections,
//! HTTP clients) and are injected into the stages at construction time.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::data_model::{DetectedObject, Row};
use crate::error::GeolocError;

/// Reply used by generators when the backend answered without content.
pub const NO_VALID_RESPONSE: &str = "[No valid response]";
/// Prefix of the reply used by generators when the call itself failed.
pub const API_EXCEPTION_PREFIX: &str = "[API call exception]";

pub fn exception_sentinel(err: impl fmt::Display) -> String {
    format!("{} {}", API_EXCEPTION_PREFIX, err)
}

/// Whether a generator reply is a failure stand-in rather than content.
pub fn is_sentinel(text: &str) -> bool {
    let text = text.trim();
    text == NO_VALID_RESPONSE || text.starts_with(API_EXCEPTION_PREFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRole::System => write!(f, "system"),
            ChatRole::User => write!(f, "user"),
            ChatRole::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Chat-completion backend.
///
/// Transport failures should come back as a sentinel reply (see
/// [`exception_sentinel`]); `Err` is reserved for failures the implementation
/// cannot express that way.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, GeolocError>;

    fn name(&self) -> &str {
        "text-generator"
    }
}

/// Vision backend. Deterministic per image; may return nothing.
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    async fn detect(&self, image_ref: &str) -> Result<Vec<DetectedObject>, GeolocError>;

    fn name(&self) -> &str {
        "object-detector"
    }
}

/// Spatial database backend. Returns rows over the descriptor's declared
/// columns, or a single `{"error": ...}` row.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &str) -> Result<Vec<Row>, GeolocError>;

    fn name(&self) -> &str {
        "query-executor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels() {
        assert!(is_sentinel(NO_VALID_RESPONSE));
        assert!(is_sentinel(&exception_sentinel("timeout")));
        assert!(!is_sentinel("The photo was taken on the Bund."));
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_value(ChatMessage::system("hi")).unwrap();
        assert_eq!(json["role"], "system");
    }
}
