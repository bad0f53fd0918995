use shared::domain::{ChatMessage, QueryRecord, ViewMode};

use crate::SEMANTIC_MODEL_PATHS;

/// Typed per-session record handed to every view handler. Starts with
/// defaults when the session opens and is dropped with it; nothing here is
/// ever persisted.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Persisted conversation log. Analyst echoes are response-only and never
    /// land here; only user messages do.
    pub messages: Vec<ChatMessage>,
    pub query_history: Vec<QueryRecord>,
    pub mode: ViewMode,
    /// The literal string the user typed at the gate; `None` until the gate
    /// has granted access.
    pub owner_email: Option<String>,
    pub semantic_model_path: String,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            query_history: Vec::new(),
            mode: ViewMode::default(),
            owner_email: None,
            semantic_model_path: SEMANTIC_MODEL_PATHS[0].to_string(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.owner_email.is_some()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
