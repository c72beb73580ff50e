//! OpenAI Responses API (`/v1/responses`) translation.

use serde_json::{Map, Value, json};

use crate::account::Account;
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::sse::SseFrame;
use crate::types::{ChatRequest, ChatResponse, Message, Role, StreamEvent, TokenUsage};

use super::{ProviderTranslator, warn_unknown_model};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com";

fn is_native(name: &str) -> bool {
    name.starts_with("gpt-")
        || name.starts_with("o1")
        || name.starts_with("o3")
        || name.starts_with("o4")
        || name.starts_with("chatgpt-")
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ResponsesTranslator;

impl ResponsesTranslator {
    fn wire_input(request: &ChatRequest) -> Vec<Value> {
        request
            .messages
            .iter()
            .map(|Message { role, content }| {
                let (role_name, block_type) = match role {
                    Role::User => ("user", "input_text"),
                    Role::Assistant => ("assistant", "output_text"),
                };
                match content {
                    Value::String(text) => json!({
                        "role": role_name,
                        "content": [{"type": block_type, "text": text}]
                    }),
                    other => json!({"role": role_name, "content": other}),
                }
            })
            .collect()
    }

    fn output_text(output: &[Value]) -> String {
        let mut text = String::new();
        for item in output {
            if item.get("type").and_then(Value::as_str) != Some("message") {
                continue;
            }
            let Some(blocks) = item.get("content").and_then(Value::as_array) else {
                continue;
            };
            for block in blocks {
                if block.get("type").and_then(Value::as_str) == Some("output_text") {
                    if let Some(chunk) = block.get("text").and_then(Value::as_str) {
                        text.push_str(chunk);
                    }
                }
            }
        }
        text
    }
}

impl ProviderTranslator for ResponsesTranslator {
    fn provider(&self) -> &'static str {
        "responses"
    }

    fn endpoint(
        &self,
        account: &Account,
        _model: &str,
        _config: &RelayConfig,
        _stream: bool,
    ) -> String {
        let base = account
            .base_endpoint
            .as_deref()
            .filter(|b| !b.is_empty())
            .unwrap_or(DEFAULT_ENDPOINT)
            .trim_end_matches('/');
        format!("{base}/v1/responses")
    }

    fn map_model(&self, name: &str) -> String {
        if !is_native(name) {
            warn_unknown_model(self.provider(), name);
        }
        name.to_string()
    }

    fn to_wire(&self, request: &ChatRequest, model: &str) -> Value {
        let mut body = Map::new();
        body.insert("model".to_string(), Value::String(model.to_string()));
        body.insert("input".to_string(), json!(Self::wire_input(request)));
        body.insert("max_output_tokens".to_string(), json!(request.max_tokens));
        if let Some(system) = &request.system {
            body.insert("instructions".to_string(), system.clone());
        }
        if let Some(temperature) = request.temperature {
            body.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(top_p) = request.top_p {
            body.insert("top_p".to_string(), json!(top_p));
        }
        if let Some(tools) = &request.tools {
            body.insert("tools".to_string(), json!(tools));
        }
        if let Some(choice) = &request.tool_choice {
            body.insert("tool_choice".to_string(), choice.clone());
        }
        if request.stream {
            body.insert("stream".to_string(), Value::Bool(true));
        }
        Value::Object(body)
    }

    fn response_from_wire(&self, raw: Value) -> Result<ChatResponse> {
        let obj = raw.as_object().ok_or_else(|| {
            RelayError::InvalidResponse("responses payload is not an object".to_string())
        })?;
        let output = obj
            .get("output")
            .and_then(Value::as_array)
            .ok_or_else(|| RelayError::InvalidResponse("responses payload missing output".to_string()))?;

        let stop_reason = match obj.get("status").and_then(Value::as_str) {
            Some("completed") => Some("end_turn".to_string()),
            Some("incomplete") => {
                let reason = obj
                    .get("incomplete_details")
                    .and_then(|d| d.get("reason"))
                    .and_then(Value::as_str);
                Some(if reason == Some("max_output_tokens") {
                    "max_tokens".to_string()
                } else {
                    "end_turn".to_string()
                })
            }
            _ => None,
        };

        Ok(ChatResponse {
            id: obj.get("id").and_then(Value::as_str).map(str::to_string),
            model: obj
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            content: json!([{"type": "text", "text": Self::output_text(output)}]),
            stop_reason,
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
        match name.as_str() {
            "response.created" => Some(StreamEvent {
                event: "message_start".to_string(),
                data: json!({"type": "message_start", "message": {}}),
            }),
            "response.output_text.delta" => {
                let text = data.get("delta").and_then(Value::as_str)?;
                Some(StreamEvent {
                    event: "content_block_delta".to_string(),
                    data: json!({
                        "type": "content_block_delta",
                        "index": 0,
                        "delta": {"type": "text_delta", "text": text}
                    }),
                })
            }
            "response.completed" => {
                let usage = data
                    .get("response")
                    .and_then(|r| r.get("usage"))
                    .cloned()
                    .unwrap_or(Value::Null);
                Some(StreamEvent {
                    event: "message_delta".to_string(),
                    data: json!({
                        "type": "message_delta",
                        "delta": {"stop_reason": "end_turn"},
                        "usage": usage
                    }),
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::test_account;
    use serde_json::json;

    fn translator() -> ResponsesTranslator {
        ResponsesTranslator
    }

    #[test]
    fn endpoint_defaults_to_public_api() {
        let account = test_account("1", "a");
        let config = RelayConfig::default();
        assert_eq!(
            translator().endpoint(&account, "gpt-4o", &config, false),
            "https://api.openai.com/v1/responses"
        );
    }

    #[test]
    fn string_content_becomes_typed_blocks() {
        let request = ChatRequest::new(
            "gpt-4o",
            vec![Message::user("question"), Message::assistant("answer")],
            128,
        );
        let body = translator().to_wire(&request, "gpt-4o");
        let input = body["input"].as_array().unwrap();
        assert_eq!(input[0]["content"][0]["type"], "input_text");
        assert_eq!(input[1]["content"][0]["type"], "output_text");
        assert_eq!(body["max_output_tokens"], 128);
    }

    #[test]
    fn response_concatenates_output_text() {
        let raw = json!({
            "id": "resp_1",
            "model": "gpt-4o",
            "status": "completed",
            "output": [
                {"type": "reasoning", "content": []},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "hello "},
                    {"type": "output_text", "text": "world"}
                ]}
            ],
            "usage": {"input_tokens": 12, "output_tokens": 4}
        });
        let response = translator().response_from_wire(raw).expect("response");
        assert_eq!(response.content[0]["text"], "hello world");
        assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(response.usage.unwrap().output_tokens, Some(4));
    }

    #[test]
    fn completed_event_carries_usage_for_merging() {
        let frame = SseFrame {
            event: "response.completed".to_string(),
            data: json!({
                "type": "response.completed",
                "response": {"usage": {"input_tokens": 9, "output_tokens": 2}}
            })
            .to_string(),
        };
        let event = translator().stream_event_from_wire(&frame).expect("event");
        assert_eq!(event.event, "message_delta");
        assert_eq!(event.data["usage"]["input_tokens"], 9);
    }

    #[test]
    fn unmapped_events_drop() {
        let frame = SseFrame {
            event: "response.output_item.added".to_string(),
            data: "{\"type\":\"response.output_item.added\"}".to_string(),
        };
        assert!(translator().stream_event_from_wire(&frame).is_none());
    }
}
