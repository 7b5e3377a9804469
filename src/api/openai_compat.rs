use crate::api::{error_message_from_body, ApiError, ChatRequest, ChatTransport};
use crate::constants::AI_REQUEST_TIMEOUT;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;

/// HTTP transport for providers speaking the OpenAI chat-completions contract.
#[derive(Clone)]
pub struct OpenAiCompatibleTransport {
    client: Client,
}

impl OpenAiCompatibleTransport {
    pub fn new() -> Result<Self, ApiError> {
        let client = Client::builder().timeout(AI_REQUEST_TIMEOUT).build()?;
        Ok(Self { client })
    }

    /// Default headers first, then the provider's own; a provider header
    /// replaces a default with the same name, `Authorization` included.
    fn headers(request: &ChatRequest) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(ref key) = request.api_key {
            let mut bearer = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| ApiError::Config(format!("invalid API key: {}", e)))?;
            bearer.set_sensitive(true);
            headers.insert(AUTHORIZATION, bearer);
        }
        for (key, value) in &request.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| ApiError::Config(format!("invalid header name '{}': {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ApiError::Config(format!("invalid value for '{}': {}", key, e)))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl ChatTransport for OpenAiCompatibleTransport {
    async fn post(&self, request: &ChatRequest) -> Result<Value, ApiError> {
        let response = self
            .client
            .post(&request.endpoint)
            .headers(Self::headers(request)?)
            .json(&request.body)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = error_message_from_body(&body).unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            });
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn request(headers: &[(&str, &str)]) -> ChatRequest {
        ChatRequest {
            endpoint: "http://localhost:9/v1/chat/completions".to_string(),
            api_key: Some("sk-test".to_string()),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            body: serde_json::json!({}),
        }
    }

    #[test]
    fn test_transport_new() {
        assert!(OpenAiCompatibleTransport::new().is_ok());
    }

    #[test]
    fn test_extra_headers_are_applied() {
        let headers =
            OpenAiCompatibleTransport::headers(&request(&[("anthropic-version", "2023-06-01")]))
                .unwrap();
        assert_eq!(headers["anthropic-version"], "2023-06-01");
        assert_eq!(headers[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_api_key_sent_as_bearer() {
        let headers = OpenAiCompatibleTransport::headers(&request(&[])).unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer sk-test");
    }

    #[test]
    fn test_provider_authorization_replaces_bearer() {
        let headers = OpenAiCompatibleTransport::headers(&request(&[(
            "Authorization",
            "Token custom-scheme",
        )]))
        .unwrap();
        let values: Vec<_> = headers.get_all(AUTHORIZATION).iter().collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0], "Token custom-scheme");
    }

    #[test]
    fn test_invalid_header_is_config_error() {
        let err = OpenAiCompatibleTransport::headers(&request(&[("bad header", "x")]))
            .unwrap_err();
        assert!(matches!(err, ApiError::Config(_)));
    }
}
