use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

pub mod openai_compat;

pub use openai_compat::OpenAiCompatibleTransport;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
    /// Non-2xx answer; `message` is the best-effort error text from the body.
    #[error("API call failed ({status}): {message}")]
    Status { status: u16, message: String },
    #[error("Response could not be parsed: {0}")]
    Decode(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::HttpClient(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Timeouts raised by the HTTP client itself rather than the orchestrator.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::HttpClient(e) if e.is_timeout())
    }
}

/// One POST to an OpenAI-compatible chat endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub endpoint: String,
    pub api_key: Option<String>,
    /// Provider-specific headers, applied after the defaults.
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Sends the request and returns the decoded JSON body of a 2xx answer.
    async fn post(&self, request: &ChatRequest) -> Result<Value, ApiError>;
}

/// Builds `{model, messages, temperature, max_tokens, stream: false, ...extra}`.
///
/// Temperature is clamped to [0, 2] and max tokens to at least 1. Extra
/// parameters are merged last and may override any of the defaults.
pub fn build_chat_body(
    model: &str,
    messages: &[Message],
    temperature: f64,
    max_tokens: u32,
    extra: &BTreeMap<String, Value>,
) -> Value {
    let (lo, hi) = crate::constants::AI_TEMPERATURE_RANGE;
    let temperature = if temperature.is_nan() {
        crate::constants::AI_DEFAULT_TEMPERATURE
    } else {
        temperature.clamp(lo, hi)
    };

    let mut body = json!({
        "model": model,
        "messages": messages,
        "temperature": temperature,
        "max_tokens": max_tokens.max(1),
        "stream": false
    });
    if let Some(object) = body.as_object_mut() {
        for (key, value) in extra {
            object.insert(key.clone(), value.clone());
        }
    }
    body
}

/// Pulls `choices[0].message.content`, trimmed. Empty content counts as absent.
pub fn extract_completion(response: &Value) -> Option<String> {
    let content = response
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()?
        .trim();
    if content.is_empty() {
        None
    } else {
        Some(content.to_string())
    }
}

/// Best-effort `error.message` or `message` from an error body.
pub fn error_message_from_body(body: &str) -> Option<String> {
    let value: Map<String, Value> = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(|e| e.get("message"))
        .or_else(|| value.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_clamps_and_merges_extra() {
        let mut extra = BTreeMap::new();
        extra.insert("top_p".to_string(), json!(0.9));
        let body = build_chat_body(
            "m",
            &[Message::system("s"), Message::user("u")],
            7.5,
            0,
            &extra,
        );
        assert_eq!(body["temperature"], json!(2.0));
        assert_eq!(body["max_tokens"], json!(1));
        assert_eq!(body["top_p"], json!(0.9));
        assert_eq!(body["messages"][0]["role"], json!("system"));
        assert_eq!(body["messages"][1]["content"], json!("u"));

        let body = build_chat_body("m", &[], -1.0, 10, &BTreeMap::new());
        assert_eq!(body["temperature"], json!(0.0));
    }

    #[test]
    fn test_extract_completion() {
        let ok = json!({"choices": [{"message": {"content": "  fixed \n"}}]});
        assert_eq!(extract_completion(&ok).as_deref(), Some("fixed"));

        let blank = json!({"choices": [{"message": {"content": "   "}}]});
        assert_eq!(extract_completion(&blank), None);
        assert_eq!(extract_completion(&json!({"choices": []})), None);
        assert_eq!(extract_completion(&json!({"id": "x"})), None);
    }

    #[test]
    fn test_error_message_from_body() {
        assert_eq!(
            error_message_from_body(r#"{"error":{"message":"bad key"}}"#).as_deref(),
            Some("bad key")
        );
        assert_eq!(
            error_message_from_body(r#"{"message":"slow down"}"#).as_deref(),
            Some("slow down")
        );
        assert_eq!(error_message_from_body("<html>"), None);
    }

    #[test]
    fn test_api_error_display() {
        let err = ApiError::Status {
            status: 401,
            message: "bad key".to_string(),
        };
        assert_eq!(format!("{}", err), "API call failed (401): bad key");
        assert_eq!(err.status(), Some(401));
        assert!(!err.is_timeout());
    }
}
