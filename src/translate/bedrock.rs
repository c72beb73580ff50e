//! Anthropic-on-Bedrock wire translation.
//!
//! Bedrock takes the Anthropic messages shape with an added
//! `anthropic_version` field; the model travels in the URL path, not the
//! body, and streaming selects a different invoke path.

use serde_json::{Map, Value, json};

use crate::account::Account;
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::sse::SseFrame;
use crate::types::{ChatRequest, ChatResponse, StreamEvent, TokenUsage};

use super::{ProviderTranslator, warn_unknown_model};

const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

/// Cross-region inference-profile ids for the human-readable names we
/// accept. Dated variants map the same as their short forms.
fn inference_profile_id(name: &str) -> Option<&'static str> {
    match name {
        "claude-3-5-haiku" | "claude-3-5-haiku-20241022" => {
            Some("us.anthropic.claude-3-5-haiku-20241022-v1:0")
        }
        "claude-3-5-sonnet" | "claude-3-5-sonnet-20241022" => {
            Some("us.anthropic.claude-3-5-sonnet-20241022-v2:0")
        }
        "claude-3-7-sonnet" | "claude-3-7-sonnet-20250219" => {
            Some("us.anthropic.claude-3-7-sonnet-20250219-v1:0")
        }
        "claude-sonnet-4" | "claude-sonnet-4-20250514" => {
            Some("us.anthropic.claude-sonnet-4-20250514-v1:0")
        }
        "claude-sonnet-4-5" | "claude-sonnet-4-5-20250929" => {
            Some("us.anthropic.claude-sonnet-4-5-20250929-v1:0")
        }
        "claude-opus-4-1" | "claude-opus-4-1-20250805" => {
            Some("us.anthropic.claude-opus-4-1-20250805-v1:0")
        }
        "claude-haiku-4-5" | "claude-haiku-4-5-20251001" => {
            Some("us.anthropic.claude-haiku-4-5-20251001-v1:0")
        }
        _ => None,
    }
}

fn is_native(name: &str) -> bool {
    name.contains("anthropic.") || name.starts_with("arn:")
}

const STREAM_EVENTS: &[&str] = &[
    "message_start",
    "content_block_start",
    "content_block_delta",
    "content_block_stop",
    "message_delta",
    "message_stop",
];

#[derive(Clone, Copy, Debug, Default)]
pub struct BedrockTranslator;

impl ProviderTranslator for BedrockTranslator {
    fn provider(&self) -> &'static str {
        "bedrock"
    }

    fn endpoint(
        &self,
        account: &Account,
        model: &str,
        config: &RelayConfig,
        stream: bool,
    ) -> String {
        let base = match account.base_endpoint.as_deref().filter(|b| !b.is_empty()) {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => {
                let region = super::resolve_region(account, model, config);
                format!("https://bedrock-runtime.{region}.amazonaws.com")
            }
        };
        let action = if stream {
            "invoke-with-response-stream"
        } else {
            "invoke"
        };
        format!("{base}/model/{model}/{action}")
    }

    fn map_model(&self, name: &str) -> String {
        if is_native(name) {
            return name.to_string();
        }
        match inference_profile_id(name) {
            Some(id) => id.to_string(),
            None => {
                warn_unknown_model(self.provider(), name);
                name.to_string()
            }
        }
    }

    fn to_wire(&self, request: &ChatRequest, _model: &str) -> Value {
        let mut body = Map::new();
        body.insert(
            "anthropic_version".to_string(),
            Value::String(ANTHROPIC_VERSION.to_string()),
        );
        body.insert("max_tokens".to_string(), json!(request.max_tokens));
        body.insert("messages".to_string(), json!(request.messages));
        if let Some(system) = &request.system {
            body.insert("system".to_string(), system.clone());
        }
        if let Some(temperature) = request.temperature {
            body.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(top_p) = request.top_p {
            body.insert("top_p".to_string(), json!(top_p));
        }
        if let Some(top_k) = request.top_k {
            body.insert("top_k".to_string(), json!(top_k));
        }
        if let Some(stops) = &request.stop_sequences {
            body.insert("stop_sequences".to_string(), json!(stops));
        }
        if let Some(tools) = &request.tools {
            body.insert("tools".to_string(), json!(tools));
        }
        if let Some(choice) = &request.tool_choice {
            body.insert("tool_choice".to_string(), choice.clone());
        }
        Value::Object(body)
    }

    fn response_from_wire(&self, raw: Value) -> Result<ChatResponse> {
        let obj = raw
            .as_object()
            .ok_or_else(|| RelayError::InvalidResponse("bedrock response is not an object".to_string()))?;
        let content = obj
            .get("content")
            .cloned()
            .ok_or_else(|| RelayError::InvalidResponse("bedrock response missing content".to_string()))?;
        Ok(ChatResponse {
            id: obj.get("id").and_then(Value::as_str).map(str::to_string),
            model: obj
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            content,
            stop_reason: obj
                .get("stop_reason")
                .and_then(Value::as_str)
                .map(str::to_string),
            usage: obj.get("usage").and_then(TokenUsage::from_value),
        })
    }

    fn stream_event_from_wire(&self, frame: &SseFrame) -> Option<StreamEvent> {
        let data: Value = serde_json::from_str(&frame.data).ok()?;
        let name = if frame.event.is_empty() {
            data.get("type")?.as_str()?.to_string()
        } else {
            frame.event.clone()
        };
        if !STREAM_EVENTS.contains(&name.as_str()) {
            return None;
        }
        Some(StreamEvent { event: name, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::test_account;
    use crate::types::Message;
    use serde_json::json;

    fn translator() -> BedrockTranslator {
        BedrockTranslator
    }

    #[test]
    fn human_name_maps_to_inference_profile() {
        assert_eq!(
            translator().map_model("claude-3-5-haiku"),
            "us.anthropic.claude-3-5-haiku-20241022-v1:0"
        );
    }

    #[test]
    fn native_names_are_identity() {
        let native = "us.anthropic.claude-sonnet-4-5-20250929-v1:0";
        assert_eq!(translator().map_model(native), native);
        let arn = "arn:aws:bedrock:us-east-1:123456789012:inference-profile/foo";
        assert_eq!(translator().map_model(arn), arn);
    }

    #[test]
    fn unknown_names_pass_through() {
        assert_eq!(translator().map_model("claude-next-9"), "claude-next-9");
    }

    #[test]
    fn endpoint_uses_account_region_and_stream_action() {
        let mut account = test_account("1", "a");
        account.region = Some("ap-northeast-1".to_string());
        let config = RelayConfig::default();
        let url = translator().endpoint(&account, "m-1", &config, true);
        assert_eq!(
            url,
            "https://bedrock-runtime.ap-northeast-1.amazonaws.com/model/m-1/invoke-with-response-stream"
        );
    }

    #[test]
    fn wire_body_carries_version_and_omits_model() {
        let mut request = ChatRequest::new("claude-3-5-haiku", vec![Message::user("hi")], 512);
        request.temperature = Some(0.2);
        let body = translator().to_wire(&request, "ignored");
        assert_eq!(body["anthropic_version"], ANTHROPIC_VERSION);
        assert_eq!(body["max_tokens"], 512);
        assert!(body.get("model").is_none());
        assert!(body.get("top_k").is_none());
    }

    #[test]
    fn response_round_trips_usage() {
        let raw = json!({
            "id": "msg_01",
            "model": "claude-sonnet-4-5",
            "content": [{"type": "text", "text": "hello"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 9, "output_tokens": 3}
        });
        let response = translator().response_from_wire(raw).expect("response");
        assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(response.usage.unwrap().input_tokens, Some(9));
    }

    #[test]
    fn unknown_stream_events_drop() {
        let ping = SseFrame {
            event: "ping".to_string(),
            data: "{\"type\":\"ping\"}".to_string(),
        };
        assert!(translator().stream_event_from_wire(&ping).is_none());

        let delta = SseFrame {
            event: "content_block_delta".to_string(),
            data: "{\"type\":\"content_block_delta\",\"delta\":{\"text\":\"x\"}}".to_string(),
        };
        let event = translator().stream_event_from_wire(&delta).expect("event");
        assert_eq!(event.event, "content_block_delta");
    }
}
