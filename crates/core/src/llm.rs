use crate::error::ProviderError;
use async_trait::async_trait;
use bytes::BytesMut;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub format: ResponseFormat,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            format: ResponseFormat::Text,
        }
    }

    pub fn json(mut self) -> Self {
        self.format = ResponseFormat::Json;
        self
    }
}

pub type FragmentStream = BoxStream<'static, Result<String, ProviderError>>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &Prompt) -> Result<String, ProviderError>;

    /// Fragments in generation order. The stream is finite and ends after the
    /// last fragment or the first error.
    async fn generate_stream(&self, prompt: &Prompt) -> Result<FragmentStream, ProviderError>;
}

#[derive(Clone)]
pub struct OllamaChatModel {
    base_url: String,
    model: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

/// One decoded line of an Ollama chat stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub content: String,
    pub done: bool,
}

pub fn parse_chat_line(line: &str) -> Result<ChatLine, ProviderError> {
    let response: ChatResponse = serde_json::from_str(line)?;
    if let Some(error) = response.error {
        return Err(ProviderError::BackendResponse {
            backend: "ollama".to_string(),
            details: error,
        });
    }
    Ok(ChatLine {
        content: response
            .message
            .map(|message| message.content)
            .unwrap_or_default(),
        done: response.done,
    })
}

impl OllamaChatModel {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client: Client::new(),
        }
    }

    fn request<'a>(&'a self, prompt: &'a Prompt, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            stream,
            format: match prompt.format {
                ResponseFormat::Json => Some("json"),
                ResponseFormat::Text => None,
            },
        }
    }

    async fn send(&self, prompt: &Prompt, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&self.request(prompt, stream))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::BackendResponse {
                backend: "ollama".to_string(),
                details: format!("{status}: {body}"),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl LanguageModel for OllamaChatModel {
    async fn generate(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        let body = self.send(prompt, false).await?.text().await?;
        Ok(parse_chat_line(&body)?.content)
    }

    async fn generate_stream(&self, prompt: &Prompt) -> Result<FragmentStream, ProviderError> {
        let response = self.send(prompt, true).await?;
        Ok(ndjson_fragments(response.bytes_stream().boxed()))
    }
}

struct NdjsonState {
    bytes: BoxStream<'static, Result<bytes::Bytes, reqwest::Error>>,
    buffer: BytesMut,
    pending: VecDeque<Result<String, ProviderError>>,
    finished: bool,
}

impl NdjsonState {
    /// Decodes complete lines from the buffer; with `flush` the trailing
    /// partial line is decoded too.
    fn drain_lines(&mut self, flush: bool) {
        loop {
            let line = match self.buffer.iter().position(|&byte| byte == b'\n') {
                Some(position) => {
                    let line = self.buffer.split_to(position + 1);
                    line.freeze()
                }
                None if flush && !self.buffer.is_empty() => self.buffer.split().freeze(),
                None => return,
            };

            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }

            match parse_chat_line(text) {
                Ok(parsed) => {
                    if !parsed.content.is_empty() {
                        self.pending.push_back(Ok(parsed.content));
                    }
                    if parsed.done {
                        self.finished = true;
                        return;
                    }
                }
                Err(error) => {
                    self.pending.push_back(Err(error));
                    self.finished = true;
                    return;
                }
            }
        }
    }
}

fn ndjson_fragments(
    bytes: BoxStream<'static, Result<bytes::Bytes, reqwest::Error>>,
) -> FragmentStream {
    let state = NdjsonState {
        bytes,
        buffer: BytesMut::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(&chunk);
                    state.drain_lines(false);
                }
                Some(Err(error)) => {
                    state.finished = true;
                    state.pending.push_back(Err(ProviderError::Http(error)));
                }
                None => {
                    state.drain_lines(true);
                    if !state.finished {
                        state.finished = true;
                        state.pending.push_back(Err(ProviderError::BackendResponse {
                            backend: "ollama".to_string(),
                            details: "stream ended before generation finished".to_string(),
                        }));
                    }
                }
            }
        }
    })
    .boxed()
}
