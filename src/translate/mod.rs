//! Canonical-to-provider request translation.
//!
//! Model names resolve in a fixed order (account default, then request,
//! then service default) and are then mapped through a per-provider table.
//! Names already in provider-native form pass through unchanged; unknown
//! names pass through with a warning so new model releases keep working
//! without a code change.

mod bedrock;
mod ccr;
mod responses;

pub use bedrock::BedrockTranslator;
pub use ccr::CcrTranslator;
pub use responses::ResponsesTranslator;

use serde_json::Value;
use tracing::warn;

use crate::account::Account;
use crate::config::RelayConfig;
use crate::error::Result;
use crate::sse::SseFrame;
use crate::types::{ChatRequest, ChatResponse, StreamEvent, TokenUsage};

/// Wire translation seam. One implementation per upstream provider family.
pub trait ProviderTranslator: Send + Sync {
    fn provider(&self) -> &'static str;

    /// Full request URL for a resolved model. `stream` selects the streaming
    /// endpoint where the provider distinguishes one.
    fn endpoint(&self, account: &Account, model: &str, config: &RelayConfig, stream: bool)
    -> String;

    /// Map a human-readable model name to this provider's identifier.
    /// Identity for provider-native names; unknown names warn and pass
    /// through.
    fn map_model(&self, name: &str) -> String;

    fn to_wire(&self, request: &ChatRequest, model: &str) -> Value;

    fn response_from_wire(&self, raw: Value) -> Result<ChatResponse>;

    /// Map one upstream SSE frame to a canonical event, or `None` when the
    /// frame has no canonical analog (keepalives, provider-internal events).
    fn stream_event_from_wire(&self, frame: &SseFrame) -> Option<StreamEvent>;
}

/// Split an optional comma-separated vendor routing prefix off a model
/// string: `"ccr,gemini-2.5-pro"` becomes `(Some("ccr"), "gemini-2.5-pro")`.
pub fn parse_vendor_prefix(model: &str) -> (Option<&str>, &str) {
    match model.split_once(',') {
        Some((vendor, base)) if !vendor.trim().is_empty() => (Some(vendor.trim()), base.trim()),
        Some((_, base)) => (None, base.trim()),
        None => (None, model),
    }
}

/// Resolution order: account default model beats the request's model beats
/// the service default. The winning name still goes through the provider's
/// mapping table afterwards.
pub fn resolve_model<'a>(account: &'a Account, request: &'a ChatRequest, config: &'a RelayConfig) -> &'a str {
    if let Some(model) = account.default_model.as_deref().filter(|m| !m.trim().is_empty()) {
        return model;
    }
    let (_, base) = parse_vendor_prefix(&request.model);
    if !base.trim().is_empty() {
        return base;
    }
    &config.default_model
}

/// Account region beats the model-family default beats the service default.
/// The small/fast family may be pinned to its own region for capacity.
pub fn resolve_region(account: &Account, model: &str, config: &RelayConfig) -> String {
    if let Some(region) = account.region.as_deref().filter(|r| !r.trim().is_empty()) {
        return region.to_string();
    }
    if is_small_model(model) {
        if let Some(region) = config
            .small_model_region
            .as_deref()
            .filter(|r| !r.trim().is_empty())
        {
            return region.to_string();
        }
    }
    config.default_region.clone()
}

fn is_small_model(model: &str) -> bool {
    model.contains("haiku")
}

pub fn clamp_max_tokens(requested: u32, config: &RelayConfig) -> u32 {
    requested.min(config.max_tokens_limit)
}

pub(crate) fn warn_unknown_model(provider: &str, name: &str) {
    warn!(provider, model = name, "unmapped model name passed through");
}

/// Pull usage out of any stream event that carries it, wherever the
/// provider nests it. Callers merge the result, never replace.
pub fn usage_from_event(event: &StreamEvent) -> Option<TokenUsage> {
    for path in [
        event.data.get("usage"),
        event.data.get("message").and_then(|m| m.get("usage")),
        event.data.get("response").and_then(|r| r.get("usage")),
    ] {
        if let Some(usage) = path.and_then(TokenUsage::from_value) {
            return Some(usage);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::test_account;
    use serde_json::json;

    #[test]
    fn vendor_prefix_splits_on_comma() {
        assert_eq!(
            parse_vendor_prefix("ccr,gemini-2.5-pro"),
            (Some("ccr"), "gemini-2.5-pro")
        );
        assert_eq!(parse_vendor_prefix("gemini-2.5-pro"), (None, "gemini-2.5-pro"));
        assert_eq!(parse_vendor_prefix(",weird"), (None, "weird"));
    }

    #[test]
    fn account_default_model_beats_request() {
        let mut account = test_account("1", "a");
        account.default_model = Some("claude-sonnet-4-5".to_string());
        let request = ChatRequest::new("claude-3-5-haiku", vec![], 100);
        let config = RelayConfig::default();
        assert_eq!(resolve_model(&account, &request, &config), "claude-sonnet-4-5");
    }

    #[test]
    fn request_model_beats_service_default_and_sheds_prefix() {
        let account = test_account("1", "a");
        let request = ChatRequest::new("ccr,gemini-2.5-pro", vec![], 100);
        let config = RelayConfig::default();
        assert_eq!(resolve_model(&account, &request, &config), "gemini-2.5-pro");

        let empty = ChatRequest::new("", vec![], 100);
        assert_eq!(resolve_model(&account, &empty, &config), config.default_model);
    }

    #[test]
    fn region_resolution_order() {
        let config = RelayConfig {
            small_model_region: Some("us-west-2".to_string()),
            ..RelayConfig::default()
        };

        let mut pinned = test_account("1", "a");
        pinned.region = Some("eu-central-1".to_string());
        assert_eq!(resolve_region(&pinned, "claude-3-5-haiku", &config), "eu-central-1");

        let unpinned = test_account("2", "b");
        assert_eq!(resolve_region(&unpinned, "claude-3-5-haiku", &config), "us-west-2");
        assert_eq!(resolve_region(&unpinned, "claude-sonnet-4-5", &config), "us-east-1");
    }

    #[test]
    fn max_tokens_clamped_to_ceiling() {
        let config = RelayConfig {
            max_tokens_limit: 8192,
            ..RelayConfig::default()
        };
        assert_eq!(clamp_max_tokens(100_000, &config), 8192);
        assert_eq!(clamp_max_tokens(512, &config), 512);
    }

    #[test]
    fn usage_extracted_from_nested_locations() {
        let top = StreamEvent {
            event: "message_delta".to_string(),
            data: json!({"usage": {"output_tokens": 7}}),
        };
        assert_eq!(usage_from_event(&top).unwrap().output_tokens, Some(7));

        let nested = StreamEvent {
            event: "message_start".to_string(),
            data: json!({"message": {"usage": {"input_tokens": 11}}}),
        };
        assert_eq!(usage_from_event(&nested).unwrap().input_tokens, Some(11));

        let none = StreamEvent {
            event: "content_block_delta".to_string(),
            data: json!({"delta": {"text": "hi"}}),
        };
        assert!(usage_from_event(&none).is_none());
    }
}
