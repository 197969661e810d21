//! Streaming Sources
//!
//! A [`StreamingSource`] turns one [`GenerationRequest`] into a sequence of
//! text fragments. Fragment boundaries carry no meaning: the engine
//! concatenates everything and parses once the stream has finished.

use crate::content::GenerationRequest;
use crate::error::SourceError;
use crate::prompt::PromptTemplates;
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use futures::{Stream, StreamExt, stream};
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// A stream of text fragments ending with success (stream end) or an error item.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, SourceError>> + Send>>;

/// Produces generated text for a request.
#[async_trait]
pub trait StreamingSource: Send + Sync {
    /// Opens a fragment stream. The caller always drains it to the end or to the first error.
    async fn open(&self, request: &GenerationRequest) -> Result<FragmentStream, SourceError>;
}

/// A `StreamingSource` for any OpenAI-compatible chat completion API.
///
/// If the streaming call fails before producing anything, and the failure is
/// not a rate limit, the source transparently falls back to one non-streaming
/// completion and emits it as a single fragment.
pub struct OpenAICompatibleSource {
    client: Client<OpenAIConfig>,
    model: String,
    prompts: PromptTemplates,
}

impl OpenAICompatibleSource {
    /// Creates a new source.
    ///
    /// # Arguments
    ///
    /// * `config` - API key and base URL of the service.
    /// * `model` - Model identifier used for chat completions (e.g., "gpt-4o").
    /// * `prompts` - Templates used to render the story prompt.
    pub fn new(config: OpenAIConfig, model: String, prompts: PromptTemplates) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            prompts,
        }
    }

    fn chat_request(
        &self,
        request: &GenerationRequest,
        stream: bool,
    ) -> Result<CreateChatCompletionRequest, OpenAIError> {
        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(self.prompts.system())
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(self.prompts.story(request))
                    .build()?
                    .into(),
            ])
            .stream(stream)
            .build()
    }

    async fn complete_once(&self, request: &GenerationRequest) -> Result<FragmentStream, SourceError> {
        let chat = self.chat_request(request, false).map_err(classify)?;
        let response = self.client.chat().create(chat).await.map_err(classify)?;
        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| SourceError::Transport("completion had no content".to_string()))?;
        Ok(Box::pin(stream::once(async move { Ok(content) })))
    }
}

#[async_trait]
impl StreamingSource for OpenAICompatibleSource {
    async fn open(&self, request: &GenerationRequest) -> Result<FragmentStream, SourceError> {
        let chat = self.chat_request(request, true).map_err(classify)?;
        let mut events = match self.client.chat().create_stream(chat).await {
            Ok(events) => events,
            Err(e) => return fallback_or_fail(self, request, classify(e)).await,
        };

        // The first event tells us whether the service accepted the stream.
        let first = match events.next().await {
            Some(Err(e)) => return fallback_or_fail(self, request, classify(e)).await,
            first => first,
        };

        let fragments = stream::iter(first).chain(events).filter_map(|event| async move {
            match event {
                Ok(response) => response
                    .choices
                    .first()
                    .and_then(|choice| choice.delta.content.clone())
                    .filter(|text| !text.is_empty())
                    .map(Ok),
                Err(e) => Some(Err(classify(e))),
            }
        });
        Ok(Box::pin(fragments))
    }
}

async fn fallback_or_fail(
    source: &OpenAICompatibleSource,
    request: &GenerationRequest,
    err: SourceError,
) -> Result<FragmentStream, SourceError> {
    if matches!(err, SourceError::RateLimited(_)) {
        return Err(err);
    }
    warn!(error = %err, "Streaming request failed; falling back to a single completion.");
    source.complete_once(request).await
}

/// Maps client errors onto the transport-level taxonomy.
fn classify(err: OpenAIError) -> SourceError {
    let rate_limited = match &err {
        OpenAIError::ApiError(api) => {
            api.code.as_deref() == Some("rate_limit_exceeded")
                || api
                    .r#type
                    .as_deref()
                    .is_some_and(|kind| kind.contains("rate_limit"))
                || api.message.contains("429")
        }
        other => other.to_string().contains("429"),
    };
    if rate_limited {
        SourceError::RateLimited(err.to_string())
    } else {
        SourceError::Transport(err.to_string())
    }
}

/// An offline `StreamingSource` for development and integration testing.
///
/// Composes a small but valid story document from the request's words and
/// streams it in fixed-size fragments.
#[derive(Debug, Clone)]
pub struct MockStreamingSource {
    fragment_len: usize,
    fragment_delay: Duration,
}

impl Default for MockStreamingSource {
    fn default() -> Self {
        Self {
            fragment_len: 48,
            fragment_delay: Duration::from_millis(40),
        }
    }
}

impl MockStreamingSource {
    pub fn new(fragment_len: usize, fragment_delay: Duration) -> Self {
        Self {
            fragment_len: fragment_len.max(1),
            fragment_delay,
        }
    }

    /// Builds the full document this source would stream for `request`.
    pub fn compose(request: &GenerationRequest) -> String {
        let highlighted: Vec<String> = request.words.iter().map(|w| format!("**{}**", w)).collect();
        let content = format!(
            "This is a {} story about {}. It uses {}.",
            request.level,
            request.topic,
            highlighted.join(", ")
        );
        let translation_map: serde_json::Map<String, serde_json::Value> = request
            .words
            .iter()
            .map(|w| (w.clone(), serde_json::Value::String(format!("<{}>", w))))
            .collect();
        let quiz: Vec<serde_json::Value> = request
            .words
            .iter()
            .take(3)
            .enumerate()
            .map(|(i, word)| {
                let mut options = vec![
                    word.clone(),
                    "none of these".to_string(),
                    "something else".to_string(),
                ];
                options.rotate_left(i % 3);
                serde_json::json!({
                    "question": format!("Which word is highlighted in the story about {}?", request.topic),
                    "options": options,
                    "answer": word,
                })
            })
            .collect();
        serde_json::json!({
            "content": content,
            "translation": format!("({} / {})", request.topic, request.level),
            "translation_map": translation_map,
            "quiz": quiz,
        })
        .to_string()
    }
}

#[async_trait]
impl StreamingSource for MockStreamingSource {
    async fn open(&self, request: &GenerationRequest) -> Result<FragmentStream, SourceError> {
        let document: Vec<char> = Self::compose(request).chars().collect();
        let fragments: Vec<String> = document
            .chunks(self.fragment_len)
            .map(|chunk| chunk.iter().collect())
            .collect();
        debug!(fragments = fragments.len(), cache_key = %request.cache_key, "Streaming mock document.");

        let delay = self.fragment_delay;
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            for fragment in fragments {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(Ok(fragment)).await.is_err() {
                    break;
                }
            }
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
