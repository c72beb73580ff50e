//! OpenAI-compatible chat-completions translation for CCR-routed accounts.
//!
//! CCR accounts point at an OpenAI-shaped router; model names are passed
//! through verbatim (the router owns its own mapping), so the table here is
//! the identity. Vendor prefixes are already stripped before translation.

use serde_json::{Map, Value, json};

use crate::account::Account;
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::sse::SseFrame;
use crate::types::{ChatRequest, ChatResponse, Message, Role, StreamEvent, TokenUsage};

use super::ProviderTranslator;

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:3456";

fn stop_reason_from_finish(finish: &str) -> &'static str {
    match finish {
        "length" => "max_tokens",
        "tool_calls" => "tool_use",
        _ => "end_turn",
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CcrTranslator;

impl CcrTranslator {
    fn wire_messages(request: &ChatRequest) -> Vec<Value> {
        let mut out = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            // Anthropic-style system prompt becomes a leading system message.
            let content = match system {
                Value::String(_) => system.clone(),
                other => other.clone(),
            };
            out.push(json!({"role": "system", "content": content}));
        }
        for Message { role, content } in &request.messages {
            let role = match role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            out.push(json!({"role": role, "content": content}));
        }
        out
    }
}

impl ProviderTranslator for CcrTranslator {
    fn provider(&self) -> &'static str {
        "ccr"
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
        format!("{base}/v1/chat/completions")
    }

    fn map_model(&self, name: &str) -> String {
        name.to_string()
    }

    fn to_wire(&self, request: &ChatRequest, model: &str) -> Value {
        let mut body = Map::new();
        body.insert("model".to_string(), Value::String(model.to_string()));
        body.insert("messages".to_string(), json!(Self::wire_messages(request)));
        body.insert("max_tokens".to_string(), json!(request.max_tokens));
        if let Some(temperature) = request.temperature {
            body.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(top_p) = request.top_p {
            body.insert("top_p".to_string(), json!(top_p));
        }
        // top_k has no chat-completions equivalent and is dropped.
        if let Some(stops) = &request.stop_sequences {
            body.insert("stop".to_string(), json!(stops));
        }
        if let Some(tools) = &request.tools {
            body.insert("tools".to_string(), json!(tools));
        }
        if let Some(choice) = &request.tool_choice {
            body.insert("tool_choice".to_string(), choice.clone());
        }
        if request.stream {
            body.insert("stream".to_string(), Value::Bool(true));
            body.insert("stream_options".to_string(), json!({"include_usage": true}));
        }
        Value::Object(body)
    }

    fn response_from_wire(&self, raw: Value) -> Result<ChatResponse> {
        let obj = raw.as_object().ok_or_else(|| {
            RelayError::InvalidResponse("chat completion is not an object".to_string())
        })?;
        let message = obj
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .ok_or_else(|| {
                RelayError::InvalidResponse("chat completion has no choices".to_string())
            })?;
        let text = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let finish = obj["choices"][0]
            .get("finish_reason")
            .and_then(Value::as_str);

        let usage = obj.get("usage").and_then(|usage| {
            let input = usage.get("prompt_tokens").and_then(Value::as_u64);
            let output = usage.get("completion_tokens").and_then(Value::as_u64);
            if input.is_none() && output.is_none() {
                return None;
            }
            Some(TokenUsage {
                input_tokens: input,
                output_tokens: output,
                ..TokenUsage::default()
            })
        });

        Ok(ChatResponse {
            id: obj.get("id").and_then(Value::as_str).map(str::to_string),
            model: obj
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            content: json!([{"type": "text", "text": text}]),
            stop_reason: finish.map(|f| stop_reason_from_finish(f).to_string()),
            usage,
        })
    }

    fn stream_event_from_wire(&self, frame: &SseFrame) -> Option<StreamEvent> {
        let data: Value = serde_json::from_str(&frame.data).ok()?;

        // Usage-only terminal chunk (stream_options.include_usage).
        if data
            .get("choices")
            .and_then(Value::as_array)
            .is_none_or(|choices| choices.is_empty())
        {
            let usage = data.get("usage")?;
            let input = usage.get("prompt_tokens").and_then(Value::as_u64);
            let output = usage.get("completion_tokens").and_then(Value::as_u64);
            return Some(StreamEvent {
                event: "message_delta".to_string(),
                data: json!({
                    "type": "message_delta",
                    "delta": {},
                    "usage": {"input_tokens": input, "output_tokens": output}
                }),
            });
        }

        let choice = &data["choices"][0];
        if let Some(text) = choice
            .get("delta")
            .and_then(|delta| delta.get("content"))
            .and_then(Value::as_str)
        {
            return Some(StreamEvent {
                event: "content_block_delta".to_string(),
                data: json!({
                    "type": "content_block_delta",
                    "index": 0,
                    "delta": {"type": "text_delta", "text": text}
                }),
            });
        }
        if let Some(finish) = choice.get("finish_reason").and_then(Value::as_str) {
            return Some(StreamEvent {
                event: "message_delta".to_string(),
                data: json!({
                    "type": "message_delta",
                    "delta": {"stop_reason": stop_reason_from_finish(finish)}
                }),
            });
        }
        // Role-announcement and empty chunks have no canonical analog.
        None
    }
}
