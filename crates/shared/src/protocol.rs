use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::domain::{Capability, ChatRole, SessionId, ViewMode};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOpened {
    pub session_id: SessionId,
    pub semantic_model_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<String>,
    pub mode: ViewMode,
    pub semantic_model_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    pub role: ChatRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<Capability>,
    pub text: String,
}

/// One round of chat: the stored user message and the analyst echo that is
/// returned but never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub user: ChatMessagePayload,
    pub analyst: ChatMessagePayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationLog {
    pub messages: Vec<ChatMessagePayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableList {
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSlice {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
    pub row_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightsReport {
    pub slice: TableSlice,
    pub observation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastStatus {
    pub capability: Capability,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: String,
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryView {
    pub entries: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}
