use crate::conversation::ConversationStore;
use crate::generation::{ChatModel, TokenStream};
use crate::prompt::assemble_messages;
use crate::retrieval::{format_context, Retriever};
use crate::{ChatError, ChatMessage};
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Token(String),
    Error(String),
    Done,
}

pub type AnswerStream = BoxStream<'static, StreamEvent>;

/// Retrieval, prompt assembly, generation and history update for one question.
pub struct ChatOrchestrator {
    retriever: Retriever,
    model: Arc<dyn ChatModel>,
    conversations: Arc<ConversationStore>,
}

impl ChatOrchestrator {
    pub fn new(
        retriever: Retriever,
        model: Arc<dyn ChatModel>,
        conversations: Arc<ConversationStore>,
    ) -> Self {
        Self {
            retriever,
            model,
            conversations,
        }
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    pub async fn clear_session(&self, session_id: &str) -> bool {
        self.conversations.clear(session_id).await
    }

    /// Builds the full message list for `question` against the session's current history.
    pub async fn prepare_messages(
        &self,
        session_id: &str,
        question: &str,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let history = self.conversations.get(session_id).await;
        let chunks = self.retriever.retrieve(question).await?;
        let context = format_context(&chunks);
        tracing::debug!(
            session_id,
            history_turns = history.len(),
            context_chunks = chunks.len(),
            "assembled prompt"
        );
        Ok(assemble_messages(&context, &history, question))
    }

    pub async fn answer(&self, session_id: &str, question: &str) -> Result<String, ChatError> {
        let messages = self.prepare_messages(session_id, question).await?;
        let answer = self.model.complete(&messages).await?;

        self.conversations
            .append(session_id, question, answer.clone())
            .await;
        tracing::info!(session_id, answer_chars = answer.len(), "answered question");
        Ok(answer)
    }

    /// Streams the answer token by token. `Done` is always the final event. The turn
    /// is recorded only once the consumer has polled past the model's last fragment,
    /// so dropping the stream early leaves the history untouched.
    pub async fn answer_stream(
        &self,
        session_id: &str,
        question: &str,
    ) -> Result<AnswerStream, ChatError> {
        let messages = self.prepare_messages(session_id, question).await?;
        let tokens = self.model.stream(&messages).await?;

        let relay = Relay::Streaming(PendingTurn {
            tokens,
            answer: String::new(),
            conversations: Arc::clone(&self.conversations),
            session_id: session_id.to_string(),
            question: question.to_string(),
        });

        Ok(stream::unfold(relay, Relay::advance).boxed())
    }
}

struct PendingTurn {
    tokens: TokenStream,
    answer: String,
    conversations: Arc<ConversationStore>,
    session_id: String,
    question: String,
}

enum Relay {
    Streaming(PendingTurn),
    Closing,
    Finished,
}

impl Relay {
    async fn advance(self) -> Option<(StreamEvent, Relay)> {
        let mut turn = match self {
            Relay::Streaming(turn) => turn,
            Relay::Closing => return Some((StreamEvent::Done, Relay::Finished)),
            Relay::Finished => return None,
        };

        match turn.tokens.next().await {
            Some(Ok(token)) => {
                turn.answer.push_str(&token);
                Some((StreamEvent::Token(token), Relay::Streaming(turn)))
            }
            Some(Err(error)) => {
                tracing::warn!(session_id = %turn.session_id, error = %error, "stream failed; turn discarded");
                Some((StreamEvent::Error(error.to_string()), Relay::Closing))
            }
            None => {
                turn.conversations
                    .append(&turn.session_id, turn.question, turn.answer)
                    .await;
                tracing::info!(session_id = %turn.session_id, "streamed answer recorded");
                Some((StreamEvent::Done, Relay::Finished))
            }
        }
    }
}
