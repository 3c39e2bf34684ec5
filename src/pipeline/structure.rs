//! Structuring: flattened invoice text → [`StructuredInvoice`] via the
//! language model.
//!
//! This module is intentionally thin — all prompt engineering lives in
//! [`crate::prompts`] so it can change without touching call or parsing
//! logic here.
//!
//! ## Reply handling
//!
//! The prompt forbids code fences and prose, but a model is not a
//! contract: replies regularly arrive as ```` ```json {...} ``` ````.
//! [`parse_reply`] therefore strips one enclosing fence before parsing.
//! What it never does is repair: a reply that is not valid JSON after
//! fence-stripping is a [`DocumentError::ResponseParse`] carrying the raw
//! text, and a JSON object with a wrongly-typed field is a
//! [`DocumentError::SchemaValidation`] — guessing at financial figures is
//! worse than failing the document.

use crate::config::PipelineConfig;
use crate::error::{DocumentError, PipelineError};
use crate::prompts::render_extraction_prompt;
use crate::schema::StructuredInvoice;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

// ── Wire types (OpenAI-compatible chat completions) ──────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

// ── Client ───────────────────────────────────────────────────────────────

/// HTTP client for the structuring (chat completions) service.
pub struct StructuringClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl StructuringClient {
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| PipelineError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.structuring_base_url.clone(),
            api_key: config.structuring_api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    /// Structure one document's flattened text.
    ///
    /// One request-response, no streaming, no retry — a failed call is the
    /// document's error slot, not a batch failure.
    pub async fn structure(
        &self,
        name: &str,
        text: &str,
    ) -> Result<StructuredInvoice, DocumentError> {
        let prompt = render_extraction_prompt(text);
        debug!(name, prompt_chars = prompt.len(), model = %self.model, "structuring");

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            temperature: self.temperature,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| DocumentError::StructuringCall {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DocumentError::StructuringCall {
                name: name.to_string(),
                message: format!("HTTP {status}: {body}"),
            });
        }

        let reply: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| DocumentError::StructuringCall {
                    name: name.to_string(),
                    message: format!("malformed completion body: {e}"),
                })?;

        let raw = reply
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| DocumentError::StructuringCall {
                name: name.to_string(),
                message: "completion has no choices".into(),
            })?;

        debug!(name, raw = %raw, "model reply");
        parse_reply(name, &raw)
    }
}

// ── Reply parsing ────────────────────────────────────────────────────────

/// One enclosing code fence, optionally tagged with a language hint,
/// spanning the whole trimmed reply.
static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*\s*\n?(.*?)\n?\s*```$").unwrap());

/// Strip one enclosing code fence if present; otherwise trim only.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    match RE_OUTER_FENCE.captures(trimmed) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str().trim()),
        None => trimmed,
    }
}

/// Parse a raw model reply into a [`StructuredInvoice`].
///
/// Two failure modes, kept distinct because they point at different
/// culprits: [`DocumentError::ResponseParse`] (the reply is not JSON at
/// all) and [`DocumentError::SchemaValidation`] (it is JSON but not our
/// schema). Both carry the offending text. Unknown keys are ignored;
/// missing keys stay `None`.
pub fn parse_reply(name: &str, raw: &str) -> Result<StructuredInvoice, DocumentError> {
    let cleaned = strip_code_fence(raw);

    let value: serde_json::Value =
        serde_json::from_str(cleaned).map_err(|e| DocumentError::ResponseParse {
            name: name.to_string(),
            message: e.to_string(),
            raw: raw.to_string(),
        })?;

    serde_json::from_value(value.clone()).map_err(|e| DocumentError::SchemaValidation {
        name: name.to_string(),
        message: e.to_string(),
        raw: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BARE: &str = r#"{"总金额": 80.00, "收款单位": "XX医院"}"#;

    #[test]
    fn fence_variants_normalise_identically() {
        let tagged = format!("```json\n{BARE}\n```");
        let untagged = format!("```\n{BARE}\n```");
        let a = parse_reply("a.pdf", BARE).unwrap();
        let b = parse_reply("a.pdf", &tagged).unwrap();
        let c = parse_reply("a.pdf", &untagged).unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.total_amount, Some(80.0));
        assert_eq!(a.payee.as_deref(), Some("XX医院"));
    }

    #[test]
    fn fence_with_surrounding_whitespace_still_strips() {
        let raw = format!("\n  ```json\n{BARE}\n```  \n");
        assert!(parse_reply("a.pdf", &raw).is_ok());
    }

    #[test]
    fn unfenced_text_passes_through_strip() {
        assert_eq!(strip_code_fence("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn inner_backticks_do_not_confuse_the_stripper() {
        // A fence marker inside the reply body is content, not a wrapper.
        let raw = r#"{"收款单位": "``院``"}"#;
        let parsed = parse_reply("a.pdf", raw).unwrap();
        assert_eq!(parsed.payee.as_deref(), Some("``院``"));
    }

    #[test]
    fn non_json_reply_is_a_parse_error_with_the_raw_text() {
        let err = parse_reply("a.pdf", "抱歉，我无法处理该票据。").unwrap_err();
        match err {
            DocumentError::ResponseParse { raw, .. } => {
                assert!(raw.contains("抱歉"));
            }
            other => panic!("expected ResponseParse, got {other:?}"),
        }
    }

    #[test]
    fn wrongly_typed_field_is_a_schema_error_not_coerced() {
        let err = parse_reply("a.pdf", r#"{"总金额": "eighty"}"#).unwrap_err();
        assert!(matches!(err, DocumentError::SchemaValidation { .. }));
    }

    #[test]
    fn non_object_json_is_a_schema_error() {
        let err = parse_reply("a.pdf", "[1, 2, 3]").unwrap_err();
        assert!(matches!(err, DocumentError::SchemaValidation { .. }));
    }

    #[test]
    fn nulls_and_unknown_keys_are_tolerated() {
        let parsed = parse_reply(
            "a.pdf",
            r#"{"总金额": null, "说明": "门诊", "个人支付": 66.0}"#,
        )
        .unwrap();
        assert!(parsed.total_amount.is_none());
        assert_eq!(parsed.personal_payment, Some(66.0));
    }
}
