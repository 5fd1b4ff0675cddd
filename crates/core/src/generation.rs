use crate::{ChatError, ChatMessage};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio_stream::wrappers::LinesStream;
use tokio_util::io::StreamReader;
use url::Url;

/// Fragments in generation order; the stream ends when the model is done.
pub type TokenStream = BoxStream<'static, Result<String, ChatError>>;

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError>;

    async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream, ChatError>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, PartialEq)]
enum StreamLine {
    Token(String),
    Failure(String),
    Done,
    Skip,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiChatModel {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    timeout: Duration,
}

impl OpenAiChatModel {
    /// `timeout` bounds a blocking completion end to end. For streams it bounds
    /// connecting, the wait for response headers and each gap between lines, so a
    /// long answer that keeps producing tokens is never cut off.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: impl Into<String>,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self, ChatError> {
        let endpoint = Url::parse(&format!(
            "{}/chat/completions",
            base_url.trim_end_matches('/')
        ))
        .map_err(|error| ChatError::Generation(format!("invalid model base url: {error}")))?;
        let client = Client::builder().connect_timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            model: model.into(),
            temperature,
            timeout,
        })
    }

    async fn send(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response, ChatError> {
        let mut request = self.client.post(self.endpoint.clone()).json(&ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            stream,
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = if stream {
            tokio::time::timeout(self.timeout, request.send())
                .await
                .map_err(|_| ChatError::Generation("model endpoint did not respond in time".to_string()))??
        } else {
            request.timeout(self.timeout).send().await?
        };
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Generation(format!(
                "model endpoint returned {status}: {body}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ChatError> {
        let response = self.send(messages, false).await?;
        let parsed: ChatCompletionResponse = response.json().await?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ChatError::Generation("model response had no content".to_string()))
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream, ChatError> {
        let response = self.send(messages, true).await?;
        Ok(sse_tokens(response, self.timeout))
    }
}

/// Fragments are parsed lazily as the consumer polls; nothing is read ahead.
fn sse_tokens(response: reqwest::Response, idle_timeout: Duration) -> TokenStream {
    let byte_stream = response
        .bytes_stream()
        .map(|result| result.map_err(std::io::Error::other));
    let reader = tokio::io::BufReader::new(StreamReader::new(byte_stream));
    let lines = LinesStream::new(reader.lines());

    stream::unfold(Some(lines), move |lines| async move {
        let mut lines = lines?;
        loop {
            let line = match tokio::time::timeout(idle_timeout, lines.next()).await {
                Ok(Some(Ok(line))) => line,
                Ok(Some(Err(error))) => {
                    let failure = ChatError::Generation(format!("stream read failed: {error}"));
                    return Some((Err(failure), None));
                }
                Ok(None) => return None,
                Err(_) => {
                    let failure = ChatError::Generation(format!(
                        "model stream stalled for {}s",
                        idle_timeout.as_secs_f32()
                    ));
                    return Some((Err(failure), None));
                }
            };

            match parse_stream_line(&line) {
                StreamLine::Token(token) => return Some((Ok(token), Some(lines))),
                StreamLine::Failure(message) => {
                    return Some((Err(ChatError::Generation(message)), None))
                }
                StreamLine::Done => return None,
                StreamLine::Skip => {}
            }
        }
    })
    .boxed()
}

fn parse_stream_line(line: &str) -> StreamLine {
    let Some(data) = line.strip_prefix("data:") else {
        return StreamLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return StreamLine::Done;
    }

    let parsed: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(error) => return StreamLine::Failure(format!("malformed stream chunk: {error}")),
    };

    if let Some(error) = parsed.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return StreamLine::Failure(message);
    }

    match parsed
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
    {
        Some(token) if !token.is_empty() => StreamLine::Token(token.to_string()),
        _ => StreamLine::Skip,
    }
}
