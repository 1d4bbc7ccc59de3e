//! Wire dialects of HTTP generation endpoints.
//!
//! A [`Dialect`] knows how to shape a request body for one family of
//! endpoints and how to pull normalized text out of the raw response bytes.
//! [`HttpProvider`](super::HttpProvider) holds one and never branches on the
//! endpoint family itself.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::traits::GenerationParams;
use crate::types::{Message, Usage};
use crate::{GenieError, Result};

/// Text and metadata extracted from a response body.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub text: String,
    pub model: Option<String>,
    pub usage: Option<Usage>,
}

/// Request/response shape of an endpoint family.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Short name used in config files and logs.
    fn name(&self) -> &'static str;

    /// JSON body for one generation request.
    fn build_body(&self, prompt: &str, params: &GenerationParams, system: Option<&str>) -> Value;

    /// Extract generated text from raw response bytes.
    ///
    /// Fails with [`GenieError::MalformedResponse`] when the body is not JSON
    /// or the text field is missing or blank.
    fn extract(&self, raw: &[u8]) -> Result<Extracted>;
}

/// Which dialect a configured provider speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    /// OpenAI-style `/chat/completions` (LM Studio, OpenRouter, vLLM, ...).
    #[default]
    Chat,
    /// Plain prompt completion (`/completions`, Ollama `/api/generate`).
    Completion,
}

impl DialectKind {
    pub fn dialect(self) -> Box<dyn Dialect> {
        match self {
            DialectKind::Chat => Box::new(ChatDialect),
            DialectKind::Completion => Box::new(CompletionDialect),
        }
    }
}

// ============================================================================
// Chat completions
// ============================================================================

/// OpenAI-style chat completions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatDialect;

impl Dialect for ChatDialect {
    fn name(&self) -> &'static str {
        "chat"
    }

    fn build_body(&self, prompt: &str, params: &GenerationParams, system: Option<&str>) -> Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(prompt));
        with_params(json!({ "messages": messages }), params)
    }

    fn extract(&self, raw: &[u8]) -> Result<Extracted> {
        let root = parse_json(raw)?;
        let text = root
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str);
        finish(&root, text, "choices[0].message.content")
    }
}

// ============================================================================
// Plain completions
// ============================================================================

/// Prompt-in, text-out completion endpoints.
///
/// Accepts both `choices[0].text` and a single top-level `response` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletionDialect;

impl Dialect for CompletionDialect {
    fn name(&self) -> &'static str {
        "completion"
    }

    fn build_body(&self, prompt: &str, params: &GenerationParams, system: Option<&str>) -> Value {
        let prompt = match system {
            Some(system) => format!("{system}\n\n{prompt}"),
            None => prompt.to_owned(),
        };
        with_params(json!({ "prompt": prompt }), params)
    }

    fn extract(&self, raw: &[u8]) -> Result<Extracted> {
        let root = parse_json(raw)?;
        let text = root
            .pointer("/choices/0/text")
            .or_else(|| root.get("response"))
            .and_then(Value::as_str);
        finish(&root, text, "choices[0].text or response")
    }
}

/// Add the shared generation fields to a body object.
fn with_params(mut body: Value, params: &GenerationParams) -> Value {
    if let Some(model) = &params.model {
        body["model"] = json!(model);
    }
    body["max_tokens"] = json!(params.max_tokens);
    body["temperature"] = json!(params.temperature);
    body["stream"] = json!(false);
    body
}

fn parse_json(raw: &[u8]) -> Result<Value> {
    serde_json::from_slice(raw)
        .map_err(|e| GenieError::MalformedResponse(format!("invalid JSON: {e}")))
}

fn finish(root: &Value, text: Option<&str>, field: &str) -> Result<Extracted> {
    let text = text
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| GenieError::MalformedResponse(format!("missing {field}")))?;
    let usage = root
        .get("usage")
        .and_then(|u| serde_json::from_value::<Usage>(u.clone()).ok());
    let model = root.get("model").and_then(Value::as_str).map(str::to_owned);
    Ok(Extracted {
        text: text.to_owned(),
        model,
        usage,
    })
}
