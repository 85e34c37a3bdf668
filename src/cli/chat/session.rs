use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use super::conversation_state::{ConversationState, PracticeProblem};
use crate::graph::{CompiledGraph, GraphError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("message must not be empty")]
    EmptyMessage,

    #[error(transparent)]
    Workflow(#[from] GraphError),
}

/// What one turn hands back to the user.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub problem_solutions: Vec<PracticeProblem>,
    pub elapsed_time_ms: u64,
}

type SharedState = Arc<tokio::sync::Mutex<ConversationState>>;

/// Conversation state per session, each behind its own lock so that only one
/// workflow run touches a session at a time.
pub struct SessionStore {
    graph: CompiledGraph<ConversationState>,
    sessions: Mutex<HashMap<String, SharedState>>,
}

impl SessionStore {
    pub fn new(graph: CompiledGraph<ConversationState>) -> Self {
        Self {
            graph,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Opens an empty session and returns its id.
    pub fn new_session(&self) -> String {
        let id = Uuid::new_v4().to_string();
        self.entry(&id);
        id
    }

    /// Forgets a session. Returns whether it existed.
    pub fn reset(&self, session_id: &str) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
            .is_some()
    }

    fn entry(&self, session_id: &str) -> SharedState {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Runs one user message through the workflow.
    ///
    /// The session stays locked for the whole run. On success the accumulated
    /// practice problems move into the response; on failure they are discarded
    /// and the transcript keeps whatever the workflow wrote before it stopped.
    pub async fn run_turn(
        &self,
        session_id: &str,
        message: &str,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, SessionError> {
        if message.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        let shared = self.entry(session_id);
        let mut state = shared.lock().await;
        state.add_user_message(message);

        let started = Instant::now();
        let result = self.graph.invoke(cancel, &mut state).await;
        let elapsed_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if let Err(e) = result {
            // Problems belong to the run that produced them.
            let discarded = state.take_practice_problems();
            error!(
                session = %session_id,
                elapsed_time_ms,
                discarded = discarded.len(),
                error = %e,
                "Turn failed"
            );
            return Err(e.into());
        }

        let content = state
            .last_message()
            .map(|m| m.text().to_string())
            .unwrap_or_default();
        let problem_solutions = state.take_practice_problems();
        info!(
            session = %session_id,
            elapsed_time_ms,
            problems = problem_solutions.len(),
            "Turn completed"
        );

        Ok(ChatResponse {
            kind: "assistant".to_string(),
            content,
            problem_solutions,
            elapsed_time_ms,
        })
    }

    /// A copy of the session's state, if the session exists.
    pub async fn snapshot(&self, session_id: &str) -> Option<ConversationState> {
        let shared = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()?;
        let state = shared.lock().await;
        Some(state.clone())
    }
}
