//! Canonical chat-completion schema shared by all provider translations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One chat turn. `content` is either a plain string or an array of
/// provider-shaped content blocks; both are forwarded as-is.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Value,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Value::String(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Value::String(text.into()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<Value>,
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            messages,
            system: None,
            max_tokens,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            tools: None,
            tool_choice: None,
            stream: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: Option<String>,
    pub model: String,
    pub content: Value,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

/// SSE-shaped canonical stream event.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StreamEvent {
    pub event: String,
    pub data: Value,
}

/// Token counters extracted from provider responses and stream events.
///
/// Some providers deliver usage in pieces (input counts in `message_start`,
/// cache counts in a later `message_delta`), so callers accumulate with
/// [`TokenUsage::merge`] instead of replacing whole values.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_5m_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_1h_input_tokens: Option<u64>,
}

impl TokenUsage {
    pub fn is_empty(&self) -> bool {
        self.input_tokens.is_none()
            && self.output_tokens.is_none()
            && self.cache_creation_input_tokens.is_none()
            && self.cache_read_input_tokens.is_none()
            && self.ephemeral_5m_input_tokens.is_none()
            && self.ephemeral_1h_input_tokens.is_none()
    }

    /// Field-wise merge: a later `Some` wins for its field, a `None` never
    /// erases a previously observed count.
    pub fn merge(&mut self, other: &TokenUsage) {
        if other.input_tokens.is_some() {
            self.input_tokens = other.input_tokens;
        }
        if other.output_tokens.is_some() {
            self.output_tokens = other.output_tokens;
        }
        if other.cache_creation_input_tokens.is_some() {
            self.cache_creation_input_tokens = other.cache_creation_input_tokens;
        }
        if other.cache_read_input_tokens.is_some() {
            self.cache_read_input_tokens = other.cache_read_input_tokens;
        }
        if other.ephemeral_5m_input_tokens.is_some() {
            self.ephemeral_5m_input_tokens = other.ephemeral_5m_input_tokens;
        }
        if other.ephemeral_1h_input_tokens.is_some() {
            self.ephemeral_1h_input_tokens = other.ephemeral_1h_input_tokens;
        }
    }

    /// Parse a provider `usage` object. Handles both flat counters and the
    /// nested `cache_creation` breakdown.
    pub fn from_value(value: &Value) -> Option<TokenUsage> {
        let obj = value.as_object()?;
        let mut usage = TokenUsage {
            input_tokens: obj.get("input_tokens").and_then(Value::as_u64),
            output_tokens: obj.get("output_tokens").and_then(Value::as_u64),
            cache_creation_input_tokens: obj
                .get("cache_creation_input_tokens")
                .and_then(Value::as_u64),
            cache_read_input_tokens: obj.get("cache_read_input_tokens").and_then(Value::as_u64),
            ephemeral_5m_input_tokens: None,
            ephemeral_1h_input_tokens: None,
        };
        if let Some(breakdown) = obj.get("cache_creation").and_then(Value::as_object) {
            usage.ephemeral_5m_input_tokens = breakdown
                .get("ephemeral_5m_input_tokens")
                .and_then(Value::as_u64);
            usage.ephemeral_1h_input_tokens = breakdown
                .get("ephemeral_1h_input_tokens")
                .and_then(Value::as_u64);
        }
        if usage.is_empty() { None } else { Some(usage) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_unions_fields_without_overwrite() {
        let mut usage = TokenUsage {
            input_tokens: Some(120),
            output_tokens: Some(1),
            ..TokenUsage::default()
        };
        usage.merge(&TokenUsage {
            output_tokens: Some(64),
            cache_read_input_tokens: Some(2048),
            ..TokenUsage::default()
        });

        assert_eq!(usage.input_tokens, Some(120));
        assert_eq!(usage.output_tokens, Some(64));
        assert_eq!(usage.cache_read_input_tokens, Some(2048));
    }

    #[test]
    fn parses_nested_cache_creation_breakdown() {
        let usage = TokenUsage::from_value(&json!({
            "input_tokens": 10,
            "cache_creation": {
                "ephemeral_5m_input_tokens": 100,
                "ephemeral_1h_input_tokens": 200
            }
        }))
        .expect("usage");
        assert_eq!(usage.ephemeral_5m_input_tokens, Some(100));
        assert_eq!(usage.ephemeral_1h_input_tokens, Some(200));
    }

    #[test]
    fn empty_usage_object_yields_none() {
        assert!(TokenUsage::from_value(&json!({})).is_none());
        assert!(TokenUsage::from_value(&json!("n/a")).is_none());
    }
}
