use crate::{ChatMessage, Turn};

pub const FALLBACK_ANSWER: &str = "I don't know based on this document.";

const SYSTEM_TEMPLATE: &str = "You are a helpful assistant. Answer questions based ONLY on the context below.
If the answer isn't in the context, say \"I don't know based on this document.\"

Context:
{context}";

pub fn system_instruction(context: &str) -> String {
    SYSTEM_TEMPLATE.replace("{context}", context)
}

/// System instruction, then prior turns oldest first, then the new question.
pub fn assemble_messages(context: &str, history: &[Turn], question: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    messages.push(ChatMessage::system(system_instruction(context)));
    for turn in history {
        messages.push(ChatMessage::user(turn.question.clone()));
        messages.push(ChatMessage::assistant(turn.answer.clone()));
    }
    messages.push(ChatMessage::user(question));
    messages
}
