use std::fmt;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::error::LlmError;

/// API key for the hosted model. Never printed.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    /// Returns `None` for a blank key.
    pub fn new(key: impl Into<String>) -> Option<Self> {
        let key = key.into().trim().to_string();
        if key.is_empty() {
            None
        } else {
            Some(Self(key))
        }
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

// Structures matching the /chat/completions endpoint
#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize, Debug)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize, Debug)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize, Debug)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat-completion API.
#[derive(Clone, Debug)]
pub struct ChatClient {
    http: Client,
    base_url: String,
    model: String,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    /// Same endpoint and HTTP pool, different model.
    pub fn with_model(&self, model: impl Into<String>) -> Self {
        Self { http: self.http.clone(), base_url: self.base_url.clone(), model: model.into() }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Sends `messages` and returns the first choice's text, untrimmed.
    #[instrument(skip(self, credential, messages), fields(model = %self.model))]
    pub async fn complete(
        &self,
        credential: &Credential,
        messages: &[ChatMessage],
    ) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = CompletionRequest { model: &self.model, messages };

        let response = self
            .http
            .post(&url)
            .bearer_auth(credential.expose())
            .json(&payload)
            .send()
            .await
            .map_err(|source| LlmError::Transport { url: url.clone(), source })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %body, "Chat completion request failed");
            return Err(LlmError::Api { status: status.as_u16(), body });
        }

        let completion = response
            .json::<CompletionResponse>()
            .await
            .map_err(|e| LlmError::MalformedResponse(e.to_string()))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::MalformedResponse("no choices returned".to_string()))?
            .message
            .content
            .ok_or_else(|| LlmError::MalformedResponse("first choice has no content".to_string()))?;

        debug!(len = content.len(), "Received chat completion");
        Ok(content)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::completion_body;
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn key() -> Credential {
        Credential::new("sk-test").unwrap()
    }

    #[test]
    fn blank_credential_is_rejected() {
        assert!(Credential::new("   ").is_none());
        assert!(Credential::new("").is_none());
    }

    #[test]
    fn credential_debug_is_redacted() {
        let printed = format!("{:?}", key());
        assert!(!printed.contains("sk-test"));
    }

    #[tokio::test]
    async fn complete_returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o",
                "messages": [{ "role": "system", "content": "sys" }, { "role": "user", "content": "hi" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("  hello  ")))
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatClient::new(server.uri(), "gpt-4o");
        let text = client
            .complete(&key(), &[ChatMessage::system("sys"), ChatMessage::user("hi")])
            .await
            .unwrap();
        assert_eq!(text, "  hello  ");
    }

    #[tokio::test]
    async fn non_success_status_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let client = ChatClient::new(server.uri(), "gpt-4o");
        let err = client.complete(&key(), &[ChatMessage::user("hi")]).await.unwrap_err();
        match err {
            LlmError::Api { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("invalid api key"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_choices_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let client = ChatClient::new(server.uri(), "gpt-4o");
        let err = client.complete(&key(), &[ChatMessage::user("hi")]).await.unwrap_err();
        assert!(matches!(err, LlmError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_error() {
        // Port 9 (discard) is closed on test machines.
        let client = ChatClient::new("http://127.0.0.1:9", "gpt-4o");
        let err = client.complete(&key(), &[ChatMessage::user("hi")]).await.unwrap_err();
        assert!(matches!(err, LlmError::Transport { .. }));
    }
}
