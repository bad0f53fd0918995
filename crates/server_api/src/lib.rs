use chrono::Utc;
use shared::{
    domain::{Capability, ChatMessage, ChatRole, QueryRecord, ViewMode},
    error::{ApiError, ErrorCode},
    protocol::{
        ChatMessagePayload, ChatTurn, ForecastStatus, HistoryEntry, HistoryView, InsightsReport,
        TableList, TableSlice,
    },
};
use tracing::{info, warn};
use warehouse::Warehouse;

mod session;

pub use session::SessionState;

/// Fixed row cap on every dataset read; there is no pagination beyond it.
pub const DATASET_ROW_LIMIT: u32 = 1000;

/// The fixed set the semantic-model selector offers. A single entry, as in
/// the dashboard this replaces.
pub const SEMANTIC_MODEL_PATHS: &[&str] = &["semantic_models/license_usage.yaml"];

const INSIGHT_OBSERVATION: &str = "simulated insight: high usage in March and June";
const FORECAST_MESSAGE: &str = "forecast model not yet available";
const HISTORY_PLACEHOLDER: &str = "no queries yet";

#[derive(Clone)]
pub struct ApiContext {
    pub warehouse: Warehouse,
}

/// Access gate. On a match the literal typed email becomes the session
/// identity; on a miss the identity is left untouched and the caller may
/// simply resubmit.
pub async fn authorize_owner(
    ctx: &ApiContext,
    session: &mut SessionState,
    email: &str,
) -> Result<(), ApiError> {
    if email.trim().is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "email must not be empty",
        ));
    }

    let authorized = ctx
        .warehouse
        .authorized_owner_exists(email)
        .await
        .map_err(internal)?;
    if !authorized {
        warn!(%email, "gate denied unauthorized email");
        return Err(ApiError::new(
            ErrorCode::Unauthorized,
            "unauthorized email, access denied",
        ));
    }

    session.owner_email = Some(email.to_string());
    info!(owner = %email, "owner authorized");
    Ok(())
}

/// Records the user message and the query-history entry, then returns a
/// simulated analyst echo. The combined query text is recorded verbatim and
/// never executed anywhere.
pub fn submit_chat(session: &mut SessionState, input: &str) -> Result<ChatTurn, ApiError> {
    let owner = ensure_authorized(session)?;
    if input.trim().is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "chat input must not be empty",
        ));
    }

    let query = format!("{input} where app_owner_email_id = '{owner}'");
    session.messages.push(ChatMessage {
        role: ChatRole::User,
        text: query.clone(),
    });
    session.query_history.push(QueryRecord {
        query: query.clone(),
        timestamp: Utc::now(),
    });

    Ok(ChatTurn {
        user: ChatMessagePayload {
            role: ChatRole::User,
            capability: None,
            text: query.clone(),
        },
        analyst: ChatMessagePayload {
            role: ChatRole::Analyst,
            capability: Some(Capability::Simulated),
            text: format!("responding to query: {query}"),
        },
    })
}

pub fn conversation(session: &SessionState) -> Result<Vec<ChatMessagePayload>, ApiError> {
    ensure_authorized(session)?;
    Ok(session
        .messages
        .iter()
        .map(|message| ChatMessagePayload {
            role: message.role,
            capability: None,
            text: message.text.clone(),
        })
        .collect())
}

pub async fn list_dataset_tables(
    ctx: &ApiContext,
    session: &SessionState,
) -> Result<TableList, ApiError> {
    ensure_authorized(session)?;
    let tables = ctx.warehouse.list_tables().await.map_err(internal)?;
    Ok(TableList { tables })
}

pub async fn browse_dataset(
    ctx: &ApiContext,
    session: &SessionState,
    table: &str,
) -> Result<TableSlice, ApiError> {
    let owner = ensure_authorized(session)?;
    let rows = ctx
        .warehouse
        .fetch_owner_rows(table, &owner, DATASET_ROW_LIMIT)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "table not found"))?;
    Ok(TableSlice {
        table: table.to_string(),
        columns: rows.columns,
        rows: rows.rows,
        row_limit: DATASET_ROW_LIMIT,
    })
}

/// The observation string is hardcoded and returned unconditionally; it is
/// never derived from the displayed rows.
pub async fn insights(ctx: &ApiContext, session: &SessionState) -> Result<InsightsReport, ApiError> {
    let owner = ensure_authorized(session)?;
    let rows = ctx
        .warehouse
        .fetch_owner_rows(warehouse::USAGE_TABLE, &owner, DATASET_ROW_LIMIT)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            ApiError::new(ErrorCode::Internal, "usage table missing from warehouse")
        })?;
    Ok(InsightsReport {
        slice: TableSlice {
            table: warehouse::USAGE_TABLE.to_string(),
            columns: rows.columns,
            rows: rows.rows,
            row_limit: DATASET_ROW_LIMIT,
        },
        observation: INSIGHT_OBSERVATION.to_string(),
    })
}

pub fn forecast(session: &SessionState) -> Result<ForecastStatus, ApiError> {
    ensure_authorized(session)?;
    Ok(ForecastStatus {
        capability: Capability::NotImplemented,
        message: FORECAST_MESSAGE.to_string(),
    })
}

pub fn history(session: &SessionState) -> Result<HistoryView, ApiError> {
    ensure_authorized(session)?;
    let entries: Vec<HistoryEntry> = session
        .query_history
        .iter()
        .rev()
        .map(|record| HistoryEntry {
            timestamp: record.formatted_timestamp(),
            query: record.query.clone(),
        })
        .collect();
    let placeholder = entries
        .is_empty()
        .then(|| HISTORY_PLACEHOLDER.to_string());
    Ok(HistoryView {
        entries,
        placeholder,
    })
}

pub fn select_view(session: &mut SessionState, mode: ViewMode) -> Result<ViewMode, ApiError> {
    ensure_authorized(session)?;
    session.mode = mode;
    Ok(session.mode)
}

pub fn select_semantic_model(session: &mut SessionState, path: &str) -> Result<(), ApiError> {
    ensure_authorized(session)?;
    if !SEMANTIC_MODEL_PATHS.contains(&path) {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "unknown semantic model path",
        ));
    }
    session.semantic_model_path = path.to_string();
    Ok(())
}

fn ensure_authorized(session: &SessionState) -> Result<String, ApiError> {
    session
        .owner_email
        .clone()
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "owner email not authorized"))
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}
