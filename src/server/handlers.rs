use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

use super::AppState;
use super::error::{ApiError, ApiResult};
use super::models::{
    Cancelled, Cleared, CreateShare, Health, MessageList, SendMessage, SessionCreated,
    SharedView, UpdateSettings,
};
use crate::error::Error;
use crate::export::{ExportFormat, ExportedFile};
use crate::orchestrator::{SessionStats, TurnReply, UserInput};
use crate::session::ChatMode;
use crate::share::{ShareLink, ShareStats, ttl_from_hours};
use crate::upload::Upload;

pub(super) async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime: state.started.elapsed().as_secs(),
        sessions: state.orchestrator.sessions().len(),
        shares: state.orchestrator.shares().len(),
    })
}

pub(super) async fn create_session(
    State(state): State<AppState>,
) -> (StatusCode, Json<SessionCreated>) {
    let session_id = state.orchestrator.create_session();
    (StatusCode::CREATED, Json(SessionCreated { session_id }))
}

pub(super) async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.orchestrator.end_session(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageList>> {
    let messages = state.orchestrator.history(&id).await?;
    Ok(Json(MessageList {
        session_id: id,
        messages,
    }))
}

pub(super) async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SendMessage>,
) -> ApiResult<Json<TurnReply>> {
    let mut input = UserInput::text(body.text);
    if let Some(image) = body.image {
        input = input.with_image(Upload::from_base64(image.filename, &image.data)?);
    }
    let reply = state.orchestrator.send(&id, input).await?;
    Ok(Json(reply))
}

pub(super) async fn clear(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Cleared>> {
    let chat_id = state.orchestrator.clear(&id).await?;
    Ok(Json(Cleared { chat_id }))
}

pub(super) async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Cancelled>> {
    let cancelled = state.orchestrator.cancel(&id)?;
    Ok(Json(Cancelled { cancelled }))
}

pub(super) async fn update_settings(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateSettings>,
) -> ApiResult<Json<SessionStats>> {
    // Parse everything first so a bad mode does not leave a half-applied update.
    let mode = body.mode.as_deref().map(str::parse::<ChatMode>).transpose()?;
    if let Some(language) = &body.language {
        state.orchestrator.set_language(&id, language).await?;
    }
    if let Some(mode) = mode {
        state.orchestrator.set_mode(&id, mode).await?;
    }
    Ok(Json(state.orchestrator.stats(&id).await?))
}

pub(super) async fn stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionStats>> {
    Ok(Json(state.orchestrator.stats(&id).await?))
}

pub(super) async fn share(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<CreateShare>>,
) -> ApiResult<(StatusCode, Json<ShareLink>)> {
    let ttl = body
        .and_then(|Json(body)| body.hours)
        .map(ttl_from_hours)
        .transpose()?;
    let link = state.orchestrator.share(&id, ttl).await?;
    Ok((StatusCode::CREATED, Json(link)))
}

pub(super) async fn export(
    State(state): State<AppState>,
    Path((id, format)): Path<(String, String)>,
) -> ApiResult<Response> {
    let format: ExportFormat = format.parse()?;
    download(state.orchestrator.export(&id, format).await?)
}

pub(super) async fn view_shared(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<SharedView>> {
    let shared = state.orchestrator.resolve_share(&token)?;
    Ok(Json(SharedView {
        messages: shared.conversation.history().to_vec(),
        link: shared.link,
        view_count: shared.view_count,
    }))
}

pub(super) async fn shared_stats(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<ShareStats>> {
    Ok(Json(state.orchestrator.share_stats(&token)?))
}

pub(super) async fn export_shared(
    State(state): State<AppState>,
    Path((token, format)): Path<(String, String)>,
) -> ApiResult<Response> {
    let format: ExportFormat = format.parse()?;
    download(state.orchestrator.export_shared(&token, format)?)
}

fn download(file: ExportedFile) -> ApiResult<Response> {
    let disposition = format!("attachment; filename=\"{}\"", file.file_name());
    let disposition = HeaderValue::from_str(&disposition).map_err(|_| {
        ApiError(Error::validation(
            "conversation id cannot be used in a file name",
            Some("chat_id".to_string()),
        ))
    })?;
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(file.format.mime_type())),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.bytes,
    )
        .into_response())
}
