//! Streaming chat-completions client.
//!
//! One client serves all three generation paths; they differ only in the
//! message payload they build and the sampling knobs they set.

use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared::agent_api::{Attachment, ChatMessage, StreamChunk};
use shared::settings::ReasoningConfig;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::error::ProviderError;
use crate::sse::{DeltaEvent, StreamDecoder};

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .pool_max_idle_per_host(2)
        .build()
        .expect("failed to build HTTP client")
});

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<serde_json::Value>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Per-request sampling adjustments layered onto the base payload.
#[derive(Debug, Clone, Default)]
pub struct SamplingKnobs {
    /// When set, asks the provider for elevated reasoning effort and applies
    /// the configured temperature / token ceiling.
    pub reasoning: Option<ReasoningConfig>,
    /// Explicit temperature override (used by the web-search path).
    pub temperature: Option<f32>,
}

/// Build the message payload for a plain chat turn: fixed system prompt,
/// prior turns oldest-first, then the new user prompt.
pub fn plain_messages(
    system: &str,
    history: &[ChatMessage],
    prompt: &str,
) -> Vec<serde_json::Value> {
    let mut out = Vec::with_capacity(history.len() + 2);
    out.push(serde_json::json!({ "role": "system", "content": system }));
    for m in history {
        out.push(serde_json::json!({ "role": m.role, "content": m.content }));
    }
    out.push(serde_json::json!({ "role": "user", "content": prompt }));
    out
}

/// Build the single-turn multi-part payload for a vision request: image
/// parts first, then the text prompt. No conversation history is included.
pub fn vision_messages(prompt: &str, attachments: &[Attachment]) -> Vec<serde_json::Value> {
    let mut content: Vec<serde_json::Value> = attachments
        .iter()
        .map(|att| {
            serde_json::json!({
                "type": "image_url",
                "image_url": { "url": att.data_uri }
            })
        })
        .collect();
    content.push(serde_json::json!({ "type": "text", "text": prompt }));

    vec![serde_json::json!({ "role": "user", "content": content })]
}

pub struct ChatClient {
    http: Client,
    base_url: String,
    api_key: String,
    /// Deadline for response headers; cleared the instant they arrive.
    header_timeout: Duration,
}

impl ChatClient {
    pub fn new(base_url: &str, api_key: &str, header_timeout: Duration) -> Self {
        Self {
            http: SHARED_HTTP.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            header_timeout,
        }
    }

    /// Issue a streaming completion and forward decoded deltas into `tx`.
    ///
    /// Contract: failures before any delta (connect, timeout, non-200)
    /// return `Err` without sending anything; once deltas flow, a read
    /// failure also returns `Err` and the caller forces stream-end. A
    /// `StreamChunk::Done` is always sent on clean termination, sentinel or
    /// not.
    pub async fn stream_completion(
        &self,
        model: &str,
        messages: Vec<serde_json::Value>,
        knobs: &SamplingKnobs,
        tx: &UnboundedSender<StreamChunk>,
    ) -> Result<(), ProviderError> {
        let req = self.build_request(model, messages, true, knobs);
        let resp = self.send(&req).await?;

        let mut decoder = StreamDecoder::new();
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(ProviderError::from_transport)?;
            for event in decoder.feed(&bytes) {
                match event {
                    DeltaEvent::Reasoning(text) => {
                        let _ = tx.send(StreamChunk::Reasoning(text));
                    }
                    DeltaEvent::Content(text) => {
                        let _ = tx.send(StreamChunk::Content(text));
                    }
                    DeltaEvent::Done => {
                        let _ = tx.send(StreamChunk::Done);
                        return Ok(());
                    }
                }
            }
        }

        // Some providers close the connection without the sentinel.
        let _ = tx.send(StreamChunk::Done);
        Ok(())
    }

    /// Non-streaming completion, used by the title task.
    pub async fn complete(
        &self,
        model: &str,
        messages: Vec<serde_json::Value>,
    ) -> Result<String, ProviderError> {
        let req = self.build_request(model, messages, false, &SamplingKnobs::default());
        let resp = self.send(&req).await?;
        let body: CompletionResponse = resp
            .json()
            .await
            .map_err(ProviderError::from_transport)?;
        Ok(body
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default())
    }

    fn build_request(
        &self,
        model: &str,
        messages: Vec<serde_json::Value>,
        stream: bool,
        knobs: &SamplingKnobs,
    ) -> CompletionRequest {
        let mut req = CompletionRequest {
            model: model.to_string(),
            messages,
            stream,
            thinking: None,
            reasoning_effort: None,
            temperature: knobs.temperature,
            max_tokens: None,
        };
        if let Some(reasoning) = &knobs.reasoning {
            req.thinking = Some(serde_json::json!({ "type": "enabled" }));
            req.reasoning_effort = Some(reasoning.effort.clone());
            req.temperature = Some(reasoning.temperature);
            req.max_tokens = Some(reasoning.max_tokens);
        }
        req
    }

    async fn send(&self, req: &CompletionRequest) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %req.model, stream = req.stream, "chat completion request");

        let pending = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(req)
            .send();

        let resp = match tokio::time::timeout(self.header_timeout, pending).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(err)) => return Err(ProviderError::from_transport(err)),
            Err(_) => return Err(ProviderError::Timeout),
        };

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &body));
        }
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_messages_shape() {
        let history = vec![
            ChatMessage::user("earlier question"),
            ChatMessage::assistant("earlier answer"),
        ];
        let msgs = plain_messages("You are a helpful AI assistant.", &history, "new question");
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[1]["content"], "earlier question");
        assert_eq!(msgs[2]["role"], "assistant");
        assert_eq!(msgs[3], serde_json::json!({ "role": "user", "content": "new question" }));
    }

    #[test]
    fn test_vision_messages_put_images_before_text() {
        let attachments = vec![
            Attachment {
                data_uri: "data:image/png;base64,AAAA".into(),
            },
            Attachment {
                data_uri: "data:image/jpeg;base64,BBBB".into(),
            },
        ];
        let msgs = vision_messages("what is this?", &attachments);
        assert_eq!(msgs.len(), 1);
        let content = msgs[0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 3);
        assert_eq!(content[0]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["url"], "data:image/jpeg;base64,BBBB");
        assert_eq!(content[2]["type"], "text");
    }

    #[test]
    fn test_reasoning_knobs_fill_payload() {
        let client = ChatClient::new("https://example.test/api/v3", "k", Duration::from_secs(15));
        let knobs = SamplingKnobs {
            reasoning: Some(ReasoningConfig::default()),
            temperature: None,
        };
        let req = client.build_request("m", vec![], true, &knobs);
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["thinking"]["type"], "enabled");
        assert_eq!(value["reasoning_effort"], "high");
        assert_eq!(value["max_tokens"], 4096);
    }

    #[test]
    fn test_default_knobs_omit_sampling_fields() {
        let client = ChatClient::new("https://example.test/api/v3/", "k", Duration::from_secs(15));
        let req = client.build_request("m", vec![], false, &SamplingKnobs::default());
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("thinking").is_none());
        assert!(value.get("temperature").is_none());
        assert_eq!(value["stream"], false);
    }
}
