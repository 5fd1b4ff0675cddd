use crate::Turn;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

type SessionTurns = Arc<Mutex<Vec<Turn>>>;

/// Per-session turn history.
///
/// Sessions are created on first append and live until cleared. Appends to one
/// session are serialized by that session's mutex; different sessions only
/// share the map's read lock. An optional cap evicts the oldest turns first.
#[derive(Debug, Default)]
pub struct ConversationStore {
    sessions: RwLock<HashMap<String, SessionTurns>>,
    max_turns: Option<usize>,
}

impl ConversationStore {
    pub fn new(max_turns: Option<usize>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_turns: max_turns.filter(|cap| *cap > 0),
        }
    }

    /// Returns the session's turns in chronological order; empty for unknown sessions.
    pub async fn get(&self, session_id: &str) -> Vec<Turn> {
        let session = self.sessions.read().await.get(session_id).cloned();
        match session {
            Some(turns) => turns.lock().await.clone(),
            None => Vec::new(),
        }
    }

    pub async fn append(
        &self,
        session_id: &str,
        question: impl Into<String>,
        answer: impl Into<String>,
    ) {
        let turn = Turn::new(question, answer);
        {
            let sessions = self.sessions.read().await;
            if let Some(turns) = sessions.get(session_id) {
                self.push_capped(&mut *turns.lock().await, turn);
                return;
            }
        }

        let mut sessions = self.sessions.write().await;
        let turns = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())));
        self.push_capped(&mut *turns.lock().await, turn);
    }

    /// Removes the session entirely. Clearing an unknown session is a no-op.
    pub async fn clear(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id).is_some();
        if removed {
            tracing::debug!(session_id, "session cleared");
        }
        removed
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn turn_count(&self, session_id: &str) -> usize {
        let session = self.sessions.read().await.get(session_id).cloned();
        match session {
            Some(turns) => turns.lock().await.len(),
            None => 0,
        }
    }

    fn push_capped(&self, turns: &mut Vec<Turn>, turn: Turn) {
        turns.push(turn);
        if let Some(cap) = self.max_turns {
            if turns.len() > cap {
                let excess = turns.len() - cap;
                turns.drain(..excess);
            }
        }
    }
}
