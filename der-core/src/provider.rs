//! The provider seam: the single point where this crate hands a prompt to
//! an external model and gets text back. Real network clients (gemini /
//! openai / anthropic HTTP calls) are out of scope — only the trait boundary
//! and deterministic test doubles live here.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokePayload {
    pub call_id: String,
    pub agent_id: String,
    pub model_id: String,
    pub provider: String,
    pub provider_model: String,
    pub system_text: String,
    pub user_text: String,
    pub params: serde_json::Value,
    pub timeout_s: u64,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// What a provider call produced: raw text output plus token usage, or an
/// error string in place of output (never both).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderOutcome {
    pub output: String,
    pub tokens: Option<TokenUsage>,
    pub error: Option<String>,
}

impl ProviderOutcome {
    pub fn ok(output: impl Into<String>, tokens: TokenUsage) -> Self {
        ProviderOutcome {
            output: output.into(),
            tokens: Some(tokens),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        ProviderOutcome {
            output: String::new(),
            tokens: None,
            error: Some(message.into()),
        }
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    async fn invoke(&self, payload: &InvokePayload) -> ProviderOutcome;
}

/// Returns a fixed, valid-JSON canned response regardless of the role being
/// called — useful for driving the pipeline end-to-end in tests without a
/// real model behind it.
pub struct StubProvider {
    response: String,
}

impl StubProvider {
    pub fn new(response: impl Into<String>) -> Self {
        StubProvider {
            response: response.into(),
        }
    }

    pub fn empty_architect() -> Self {
        StubProvider::new(r#"{"design_moves": []}"#)
    }

    pub fn empty_implementer() -> Self {
        StubProvider::new(r#"{"modules_added_and_updated": []}"#)
    }

    pub fn empty_chairman() -> Self {
        StubProvider::new(
            r#"{"approved_edits": [], "chairman_summary": {}, "scoring": {"architect": {"judge_score": 0.8, "cost_score": 0.5}, "implementer": {"judge_score": 0.8, "cost_score": 0.5}}}"#,
        )
    }
}

#[async_trait]
impl Provider for StubProvider {
    async fn invoke(&self, _payload: &InvokePayload) -> ProviderOutcome {
        ProviderOutcome::ok(self.response.clone(), TokenUsage::default())
    }
}

impl Default for TokenUsage {
    fn default() -> Self {
        TokenUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }
}

/// Dispatches to one of three canned responses by `payload.agent_id`
/// (`architect`/`implementer`/`chairman`) — the default provider the CLI
/// wires up for dry runs, since no real network provider is in scope here.
pub struct RoleRoutingStubProvider;

#[async_trait]
impl Provider for RoleRoutingStubProvider {
    async fn invoke(&self, payload: &InvokePayload) -> ProviderOutcome {
        let response = match payload.agent_id.as_str() {
            "architect" => StubProvider::empty_architect(),
            "implementer" => StubProvider::empty_implementer(),
            _ => StubProvider::empty_chairman(),
        };
        response.invoke(payload).await
    }
}

/// Always stalls past any reasonable deadline — exercises the timeout path.
pub struct NullProvider {
    pub delay: Duration,
}

impl Default for NullProvider {
    fn default() -> Self {
        NullProvider {
            delay: Duration::from_secs(3600),
        }
    }
}

#[async_trait]
impl Provider for NullProvider {
    async fn invoke(&self, _payload: &InvokePayload) -> ProviderOutcome {
        tokio::time::sleep(self.delay).await;
        ProviderOutcome::err("null provider never responds")
    }
}

/// Wraps a provider call with the call's own `timeout_s`, translating an
/// elapsed deadline into the same `(empty output, error)` shape a provider
/// error would produce.
pub async fn invoke_with_timeout(provider: &dyn Provider, payload: &InvokePayload) -> ProviderOutcome {
    match tokio::time::timeout(Duration::from_secs(payload.timeout_s), provider.invoke(payload)).await {
        Ok(outcome) => outcome,
        Err(_) => ProviderOutcome::err("timeout"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload(timeout_s: u64) -> InvokePayload {
        InvokePayload {
            call_id: "architect_M1".into(),
            agent_id: "architect".into(),
            model_id: "M1".into(),
            provider: "gemini".into(),
            provider_model: "gemini-2.5-pro".into(),
            system_text: String::new(),
            user_text: String::new(),
            params: serde_json::json!({"temperature": 0.0}),
            timeout_s,
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn stub_provider_returns_canned_response() {
        let provider = StubProvider::empty_architect();
        let outcome = provider.invoke(&sample_payload(1)).await;
        assert!(outcome.error.is_none());
        assert!(outcome.output.contains("design_moves"));
    }

    #[tokio::test]
    async fn role_routing_stub_dispatches_by_agent_id() {
        let provider = RoleRoutingStubProvider;
        let mut architect_payload = sample_payload(1);
        architect_payload.agent_id = "architect".into();
        let architect = provider.invoke(&architect_payload).await;
        assert!(architect.output.contains("design_moves"));

        let mut implementer_payload = sample_payload(1);
        implementer_payload.agent_id = "implementer".into();
        let implementer = provider.invoke(&implementer_payload).await;
        assert!(implementer.output.contains("modules_added_and_updated"));

        let mut chairman_payload = sample_payload(1);
        chairman_payload.agent_id = "chairman".into();
        let chairman = provider.invoke(&chairman_payload).await;
        assert!(chairman.output.contains("approved_edits"));
    }

    #[tokio::test]
    async fn timeout_wraps_slow_provider_into_error_outcome() {
        let provider = NullProvider {
            delay: Duration::from_secs(5),
        };
        let outcome = invoke_with_timeout(&provider, &sample_payload(0)).await;
        assert_eq!(outcome.error.as_deref(), Some("timeout"));
    }
}
