//! Streaming LLM client and tool-call loop.
//!
//! Providers expose `chat` as an async event stream. Two wire dialects are
//! supported, Anthropic content blocks and OpenAI-compatible tool calls;
//! both normalize into [`types::LlmEvent`]. The tool-call loop drives
//! rounds of chat, executes requested tools, and feeds results back until
//! the model stops asking or the round cap is hit.

pub mod anthropic;
pub mod auth;
pub mod openai;
pub mod types;

use async_trait::async_trait;
use futures::StreamExt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use types::{
    ChatMessage, ChatOptions, ContentBlock, LlmEvent, ToolCall, ToolOutcome,
};

pub use auth::{Credentials, OAuthToken};

/// Maximum chat rounds in one tool-call loop.
const MAX_TOOL_ROUNDS: usize = 10;

const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Authentication required: {0}")]
    AuthRequired(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LlmError>;

pub type LlmStream = Pin<Box<dyn futures::Stream<Item = LlmEvent> + Send>>;

/// A streaming chat provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, messages: Vec<ChatMessage>, options: ChatOptions) -> Result<LlmStream>;
}

/// Drive a plain chat to completion and return the full response text.
pub async fn collect_text(
    provider: &dyn LlmProvider,
    messages: Vec<ChatMessage>,
    options: ChatOptions,
) -> Result<String> {
    let mut stream = provider.chat(messages, options).await?;
    let mut full = String::new();
    while let Some(event) = stream.next().await {
        match event {
            LlmEvent::Token { full_response, .. } => full = full_response,
            LlmEvent::Done { full_response } => return Ok(full_response),
            LlmEvent::Error { error, .. } => return Err(LlmError::Stream(error)),
            LlmEvent::ToolCall { .. } => {}
        }
    }
    Ok(full)
}

/// One round's harvest from a chat stream.
struct RoundResult {
    full_response: String,
    tool_calls: Vec<ToolCall>,
}

async fn drive_round(
    mut stream: LlmStream,
    on_token: &mut (dyn FnMut(String) + Send),
) -> Result<RoundResult> {
    let mut full = String::new();
    let mut tool_calls = Vec::new();

    while let Some(event) = stream.next().await {
        match event {
            LlmEvent::Token {
                content,
                full_response,
            } => {
                full = full_response;
                on_token(content);
            }
            LlmEvent::ToolCall {
                tool_calls: calls,
                full_response,
            } => {
                full = full_response;
                tool_calls = calls;
            }
            LlmEvent::Done { full_response } => {
                full = full_response;
                break;
            }
            LlmEvent::Error { error, .. } => return Err(LlmError::Stream(error)),
        }
    }

    Ok(RoundResult {
        full_response: full,
        tool_calls,
    })
}

/// The streaming tool-call loop.
///
/// Per round: stream a chat turn, forward tokens, collect tool calls. No
/// calls means the model is done. Otherwise every call is executed through
/// `exec` (which wraps failures so the model can see and recover), the
/// assistant turn and tool results are appended, and the next round starts.
pub async fn chat_with_tools<F, Fut>(
    provider: &dyn LlmProvider,
    mut messages: Vec<ChatMessage>,
    options: ChatOptions,
    exec: F,
    cancel: &CancellationToken,
    mut on_token: impl FnMut(String) + Send,
) -> Result<String>
where
    F: Fn(ToolCall) -> Fut,
    Fut: Future<Output = ToolOutcome>,
{
    let mut last_response = String::new();

    for round in 0..MAX_TOOL_ROUNDS {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }

        let stream = provider.chat(messages.clone(), options.clone()).await?;
        let round_result = drive_round(stream, &mut on_token).await?;
        last_response = round_result.full_response.clone();

        if round_result.tool_calls.is_empty() {
            debug!("Tool loop finished after {} round(s)", round + 1);
            return Ok(last_response);
        }

        debug!(
            "Round {}: executing {} tool call(s)",
            round,
            round_result.tool_calls.len()
        );

        let mut assistant_blocks = Vec::new();
        if !round_result.full_response.is_empty() {
            assistant_blocks.push(ContentBlock::Text {
                text: round_result.full_response.clone(),
            });
        }
        for call in &round_result.tool_calls {
            assistant_blocks.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.arguments.clone(),
            });
        }
        messages.push(ChatMessage::assistant_blocks(assistant_blocks));

        let mut result_blocks = Vec::new();
        for call in round_result.tool_calls {
            let outcome = exec(call).await;
            result_blocks.push(ContentBlock::ToolResult {
                tool_use_id: outcome.tool_use_id,
                content: outcome.output,
                is_error: outcome.is_error,
            });
        }
        messages.push(ChatMessage::tool_results(result_blocks));
    }

    warn!("Tool loop hit the {}-round cap", MAX_TOOL_ROUNDS);
    Ok(last_response)
}

/// Wire dialect spoken by an HTTP provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Anthropic,
    OpenAi,
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" => Ok(Dialect::Anthropic),
            "openai" | "openai-compatible" => Ok(Dialect::OpenAi),
            other => Err(format!("Unknown dialect: {}", other)),
        }
    }
}

/// HTTP streaming client for either dialect.
pub struct HttpLlmClient {
    http: reqwest::Client,
    dialect: Dialect,
    base_url: String,
    default_model: String,
    credentials: Arc<Mutex<Credentials>>,
    /// Extra headers injected by custom transports.
    extra_headers: Vec<(String, String)>,
}

impl HttpLlmClient {
    pub fn new(
        dialect: Dialect,
        base_url: impl Into<String>,
        default_model: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        HttpLlmClient {
            http: reqwest::Client::builder()
                .connect_timeout(std::time::Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            dialect,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: default_model.into(),
            credentials: Arc::new(Mutex::new(credentials)),
            extra_headers: Vec::new(),
        }
    }

    pub fn with_extra_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.extra_headers = headers;
        self
    }

    fn endpoint(&self) -> String {
        match self.dialect {
            Dialect::Anthropic => format!("{}/v1/messages", self.base_url),
            Dialect::OpenAi => format!("{}/v1/chat/completions", self.base_url),
        }
    }
}

#[async_trait]
impl LlmProvider for HttpLlmClient {
    async fn chat(&self, messages: Vec<ChatMessage>, options: ChatOptions) -> Result<LlmStream> {
        let model = options
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let max_tokens = options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);

        let body = match self.dialect {
            Dialect::Anthropic => anthropic::build_request(&messages, &options, &model, max_tokens),
            Dialect::OpenAi => openai::build_request(&messages, &options, &model),
        };

        let (auth_header, auth_value) = self
            .credentials
            .lock()
            .await
            .auth_header(&self.http)
            .await?;

        let mut request = self
            .http
            .post(self.endpoint())
            .header(auth_header, auth_value)
            .header("content-type", "application/json");
        if self.dialect == Dialect::Anthropic {
            request = request.header("anthropic-version", "2023-06-01");
        }
        for (name, value) in &self.extra_headers {
            request = request.header(name, value);
        }

        let response = request.json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!("LLM request failed with {}: {}", status, detail);
            return Err(LlmError::Http(format!("{}: {}", status, detail)));
        }

        let dialect = self.dialect;
        let (tx, rx) = futures::channel::mpsc::unbounded();
        tokio::spawn(async move {
            pump_sse(response, dialect, tx).await;
        });

        Ok(Box::pin(rx))
    }
}

/// Read the SSE body, feed the dialect decoder, forward normalized events.
async fn pump_sse(
    response: reqwest::Response,
    dialect: Dialect,
    tx: futures::channel::mpsc::UnboundedSender<LlmEvent>,
) {
    let mut anthropic_decoder = anthropic::StreamDecoder::new();
    let mut openai_decoder = openai::StreamDecoder::new();

    let mut buffer = String::new();
    let mut byte_stream = response.bytes_stream();
    let mut terminal = false;

    'outer: while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx.unbounded_send(LlmEvent::Error {
                    error: e.to_string(),
                    full_response: String::new(),
                });
                return;
            }
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(newline) = buffer.find('\n') {
            let line = buffer[..newline].trim_end_matches('\r').to_string();
            buffer.drain(..=newline);

            let data = match line.strip_prefix("data:") {
                Some(d) => d.trim(),
                None => continue,
            };

            if dialect == Dialect::OpenAi && data == "[DONE]" {
                terminal = true;
                break 'outer;
            }

            let value: serde_json::Value = match serde_json::from_str(data) {
                Ok(v) => v,
                Err(_) => continue,
            };

            let events = match dialect {
                Dialect::Anthropic => anthropic_decoder.feed(&value),
                Dialect::OpenAi => openai_decoder.feed(&value),
            };
            for event in events {
                if matches!(event, LlmEvent::Error { .. }) {
                    let _ = tx.unbounded_send(event);
                    return;
                }
                if tx.unbounded_send(event).is_err() {
                    return;
                }
            }

            if dialect == Dialect::Anthropic && anthropic_decoder.finished() {
                terminal = true;
                break 'outer;
            }
        }
    }

    if !terminal {
        debug!("SSE body ended without a terminal marker");
    }

    let final_events = match dialect {
        Dialect::Anthropic => anthropic_decoder.finish(),
        Dialect::OpenAi => openai_decoder.finish(),
    };
    for event in final_events {
        if tx.unbounded_send(event).is_err() {
            return;
        }
    }
}
