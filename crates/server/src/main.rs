use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use server_api::{ApiContext, SessionState};
use shared::{
    domain::{SessionId, ViewMode},
    error::{ApiError, ErrorCode},
    protocol::{
        ChatTurn, ConversationLog, ForecastStatus, HistoryView, InsightsReport, SessionOpened,
        SessionSummary, TableList, TableSlice,
    },
};
use tokio::sync::Mutex;
use tracing::{error, info};
use warehouse::Warehouse;

mod config;

use config::{load_settings, prepare_warehouse_url};

struct AppState {
    api: ApiContext,
    sessions: Mutex<HashMap<SessionId, SessionState>>,
}

type Reject = (StatusCode, Json<ApiError>);

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session_id: SessionId,
}

#[derive(Debug, Deserialize)]
struct GateRequest {
    session_id: SessionId,
    email: String,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    session_id: SessionId,
    text: String,
}

#[derive(Debug, Deserialize)]
struct SelectViewRequest {
    session_id: SessionId,
    mode: ViewMode,
}

#[derive(Debug, Deserialize)]
struct SelectModelRequest {
    session_id: SessionId,
    path: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let warehouse_url = prepare_warehouse_url(&settings.warehouse_url)?;
    let warehouse = Warehouse::connect(&warehouse_url).await.map_err(|err| {
        error!(
            %warehouse_url,
            %err,
            "failed to open warehouse; verify the URL and filesystem permissions"
        );
        err
    })?;
    warehouse.health_check().await?;

    let state = AppState {
        api: ApiContext { warehouse },
        sessions: Mutex::new(HashMap::new()),
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "license patrol server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/session", post(open_session).get(session_summary))
        .route("/session/gate", post(gate))
        .route("/session/view", post(select_view))
        .route("/session/semantic_model", post(select_semantic_model))
        .route("/chat", post(submit_chat).get(conversation))
        .route("/tables", get(list_tables))
        .route("/tables/:table/rows", get(table_rows))
        .route("/insights", get(insights_view))
        .route("/forecast", get(forecast_view))
        .route("/history", get(history_view))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn open_session(State(state): State<Arc<AppState>>) -> Json<SessionOpened> {
    let session_id = SessionId::generate();
    let mut sessions = state.sessions.lock().await;
    sessions.insert(session_id, SessionState::new());
    Json(SessionOpened {
        session_id,
        semantic_model_paths: server_api::SEMANTIC_MODEL_PATHS
            .iter()
            .map(|path| path.to_string())
            .collect(),
    })
}

async fn session_summary(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SessionQuery>,
) -> Result<Json<SessionSummary>, Reject> {
    let sessions = state.sessions.lock().await;
    let session = sessions.get(&q.session_id).ok_or_else(unknown_session)?;
    Ok(Json(summarize(session)))
}

async fn gate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GateRequest>,
) -> Result<Json<SessionSummary>, Reject> {
    let mut sessions = state.sessions.lock().await;
    let session = sessions
        .get_mut(&req.session_id)
        .ok_or_else(unknown_session)?;
    server_api::authorize_owner(&state.api, session, &req.email)
        .await
        .map_err(reject)?;
    Ok(Json(summarize(session)))
}

async fn select_view(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SelectViewRequest>,
) -> Result<Json<SessionSummary>, Reject> {
    let mut sessions = state.sessions.lock().await;
    let session = sessions
        .get_mut(&req.session_id)
        .ok_or_else(unknown_session)?;
    server_api::select_view(session, req.mode).map_err(reject)?;
    Ok(Json(summarize(session)))
}

async fn select_semantic_model(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SelectModelRequest>,
) -> Result<Json<SessionSummary>, Reject> {
    let mut sessions = state.sessions.lock().await;
    let session = sessions
        .get_mut(&req.session_id)
        .ok_or_else(unknown_session)?;
    server_api::select_semantic_model(session, &req.path).map_err(reject)?;
    Ok(Json(summarize(session)))
}

async fn submit_chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatTurn>, Reject> {
    let mut sessions = state.sessions.lock().await;
    let session = sessions
        .get_mut(&req.session_id)
        .ok_or_else(unknown_session)?;
    let turn = server_api::submit_chat(session, &req.text).map_err(reject)?;
    Ok(Json(turn))
}

async fn conversation(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SessionQuery>,
) -> Result<Json<ConversationLog>, Reject> {
    let sessions = state.sessions.lock().await;
    let session = sessions.get(&q.session_id).ok_or_else(unknown_session)?;
    let messages = server_api::conversation(session).map_err(reject)?;
    Ok(Json(ConversationLog { messages }))
}

async fn list_tables(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SessionQuery>,
) -> Result<Json<TableList>, Reject> {
    let sessions = state.sessions.lock().await;
    let session = sessions.get(&q.session_id).ok_or_else(unknown_session)?;
    let tables = server_api::list_dataset_tables(&state.api, session)
        .await
        .map_err(reject)?;
    Ok(Json(tables))
}

async fn table_rows(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
    Query(q): Query<SessionQuery>,
) -> Result<Json<TableSlice>, Reject> {
    let sessions = state.sessions.lock().await;
    let session = sessions.get(&q.session_id).ok_or_else(unknown_session)?;
    let slice = server_api::browse_dataset(&state.api, session, &table)
        .await
        .map_err(reject)?;
    Ok(Json(slice))
}

async fn insights_view(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SessionQuery>,
) -> Result<Json<InsightsReport>, Reject> {
    let sessions = state.sessions.lock().await;
    let session = sessions.get(&q.session_id).ok_or_else(unknown_session)?;
    let report = server_api::insights(&state.api, session)
        .await
        .map_err(reject)?;
    Ok(Json(report))
}

async fn forecast_view(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SessionQuery>,
) -> Result<Json<ForecastStatus>, Reject> {
    let sessions = state.sessions.lock().await;
    let session = sessions.get(&q.session_id).ok_or_else(unknown_session)?;
    let status = server_api::forecast(session).map_err(reject)?;
    Ok(Json(status))
}

async fn history_view(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SessionQuery>,
) -> Result<Json<HistoryView>, Reject> {
    let sessions = state.sessions.lock().await;
    let session = sessions.get(&q.session_id).ok_or_else(unknown_session)?;
    let view = server_api::history(session).map_err(reject)?;
    Ok(Json(view))
}

fn summarize(session: &SessionState) -> SessionSummary {
    SessionSummary {
        authenticated: session.is_authenticated(),
        owner_email: session.owner_email.clone(),
        mode: session.mode,
        semantic_model_path: session.semantic_model_path.clone(),
    }
}

fn reject(error: ApiError) -> Reject {
    let status = match error.code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(error))
}

fn unknown_session() -> Reject {
    reject(ApiError::new(ErrorCode::Unauthorized, "unknown session"))
}
