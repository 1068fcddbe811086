//! HTTP API
//!
//! Player endpoints under `/api/users`, admin endpoints under `/api/admin`
//! guarded by the plaintext admin password.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderName, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::error::{EngineError, ServiceError, StoreError};
use crate::progress::{LevelTier, PlayerProgress};
use crate::quest::definition::validate_catalog;
use crate::quest::{QuestTemplate, TemplateRegistry};
use crate::service::users::{CreateUser, UpdateUser};
use crate::service::{AdminService, AssignmentAction, BackupService, QuestService, UserLocks, UserService};
use crate::store::DocumentStore;

const ADMIN_HEADER: &str = "x-admin-password";

// ============================================================================
// App State
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub registry: Arc<TemplateRegistry>,
    pub quests: Arc<QuestService>,
    pub users: Arc<UserService>,
    pub backups: Arc<BackupService>,
    pub admin: Arc<AdminService>,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>, registry: Arc<TemplateRegistry>, admin_password: Option<String>) -> Self {
        let locks = Arc::new(UserLocks::new());
        Self {
            quests: Arc::new(QuestService::new(store.clone(), registry.clone(), locks.clone())),
            users: Arc::new(UserService::new(store.clone(), registry.clone(), locks.clone())),
            backups: Arc::new(BackupService::new(store.clone(), registry.clone(), locks)),
            admin: Arc::new(AdminService::new(store.clone(), admin_password)),
            store,
            registry,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Service error rendered as `{"success": false, "error": ...}`
pub struct ApiError(ServiceError);

impl<E: Into<ServiceError>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            ServiceError::Engine(e) => match e {
                EngineError::QuestNotFound(_) => StatusCode::NOT_FOUND,
                EngineError::InvalidGranularity(_) => StatusCode::BAD_REQUEST,
                EngineError::InconsistentState(_) | EngineError::QuestExpired(_) => StatusCode::CONFLICT,
            },
            ServiceError::Store(e) => match e {
                StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                StoreError::AlreadyExists(_) => StatusCode::CONFLICT,
                StoreError::Serialization(_) | StoreError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServiceError::UserNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::UserExists(_) => StatusCode::CONFLICT,
            ServiceError::Validation(_) | ServiceError::Catalog(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected ({}): {}", status.as_u16(), self.0);
        }
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn ok() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "success": true }))
}

// ============================================================================
// Request Bodies
// ============================================================================

/// Admin request body carrying an optional inline password
#[derive(Deserialize)]
struct AdminBody<T> {
    #[serde(rename = "adminPassword")]
    admin_password: Option<String>,
    #[serde(flatten)]
    inner: T,
}

#[derive(Deserialize)]
struct ProgressRequest {
    progress: u8,
}

#[derive(Deserialize)]
struct TemplatesRequest {
    templates: Vec<QuestTemplate>,
}

#[derive(Deserialize)]
struct PasswordRequest {
    password: String,
}

/// Progress plus the derived level tier
#[derive(Serialize)]
struct ProgressView {
    #[serde(flatten)]
    progress: PlayerProgress,
    tier: LevelTier,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CatalogResponse {
    success: bool,
    template_count: usize,
}

async fn authorize(state: &AppState, headers: &HeaderMap, body_password: Option<&str>) -> Result<(), ApiError> {
    let supplied = headers
        .get(ADMIN_HEADER)
        .and_then(|v| v.to_str().ok())
        .or(body_password);
    state.admin.verify(supplied).await?;
    Ok(())
}

// ============================================================================
// HTTP Handlers - Player
// ============================================================================

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "templates": state.registry.count().await,
        "timestamp": chrono::Utc::now().timestamp_millis()
    }))
}

async fn get_quests(State(state): State<AppState>, Path(user_id): Path<String>) -> Response {
    match state.quests.state(&user_id).await {
        Ok(quests) => Json(quests).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn get_quest_bucket(
    State(state): State<AppState>,
    Path((user_id, granularity)): Path<(String, String)>,
) -> Response {
    let quests = match state.quests.state(&user_id).await {
        Ok(quests) => quests,
        Err(e) => return ApiError(e).into_response(),
    };
    match quests.bucket_named(&granularity) {
        Ok(bucket) => Json(bucket).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

async fn toggle_quest(
    State(state): State<AppState>,
    Path((user_id, quest_id)): Path<(String, String)>,
) -> Response {
    match state.quests.toggle(&user_id, &quest_id).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn update_progress(
    State(state): State<AppState>,
    Path((user_id, quest_id)): Path<(String, String)>,
    Json(req): Json<ProgressRequest>,
) -> Response {
    match state.quests.record_progress(&user_id, &quest_id, req.progress).await {
        Ok(update) => Json(update).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn get_progress(State(state): State<AppState>, Path(user_id): Path<String>) -> Response {
    match state.quests.progress(&user_id).await {
        Ok(progress) => Json(ProgressView { tier: progress.tier(), progress }).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

// ============================================================================
// HTTP Handlers - Admin
// ============================================================================

async fn list_users(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(e) = authorize(&state, &headers, None).await {
        return e.into_response();
    }
    match state.users.list().await {
        Ok(users) => Json(users).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AdminBody<CreateUser>>,
) -> Response {
    if let Err(e) = authorize(&state, &headers, req.admin_password.as_deref()).await {
        return e.into_response();
    }
    match state.users.create(req.inner).await {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn get_user(State(state): State<AppState>, headers: HeaderMap, Path(user_id): Path<String>) -> Response {
    if let Err(e) = authorize(&state, &headers, None).await {
        return e.into_response();
    }
    match state.users.get(&user_id).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn update_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Json(req): Json<AdminBody<UpdateUser>>,
) -> Response {
    if let Err(e) = authorize(&state, &headers, req.admin_password.as_deref()).await {
        return e.into_response();
    }
    match state.users.update(&user_id, req.inner).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn delete_user(State(state): State<AppState>, headers: HeaderMap, Path(user_id): Path<String>) -> Response {
    if let Err(e) = authorize(&state, &headers, None).await {
        return e.into_response();
    }
    match state.users.delete(&user_id).await {
        Ok(()) => ok().into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn update_assignments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Json(req): Json<AdminBody<AssignmentAction>>,
) -> Response {
    if let Err(e) = authorize(&state, &headers, req.admin_password.as_deref()).await {
        return e.into_response();
    }
    match state.users.assign(&user_id, req.inner).await {
        Ok(record) => Json(record).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn get_templates(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Vec<QuestTemplate>> {
    authorize(&state, &headers, None).await?;
    Ok(Json(state.registry.snapshot().await.as_ref().clone()))
}

/// Replace the catalog; rejected as a whole if any template is invalid
async fn put_templates(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AdminBody<TemplatesRequest>>,
) -> ApiResult<CatalogResponse> {
    authorize(&state, &headers, req.admin_password.as_deref()).await?;

    let total = req.inner.templates.len();
    let (templates, rejected) = validate_catalog(req.inner.templates);
    if rejected > 0 {
        return Err(ServiceError::Catalog(format!("{} of {} templates rejected", rejected, total)).into());
    }

    let (count, _) = state.registry.replace(templates).await;
    state.registry.save_to_store(state.store.as_ref()).await?;
    info!("Template catalog replaced via admin API ({} templates)", count);

    Ok(Json(CatalogResponse { success: true, template_count: count }))
}

/// Reload the catalog from the TOML directory and persist it
async fn reload_templates(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<CatalogResponse> {
    authorize(&state, &headers, None).await?;

    let count = state.registry.load_all().await.map_err(ServiceError::Catalog)?;
    state.registry.save_to_store(state.store.as_ref()).await?;

    Ok(Json(CatalogResponse { success: true, template_count: count }))
}

async fn list_backups(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Vec<String>> {
    authorize(&state, &headers, None).await?;
    Ok(Json(state.backups.list().await?))
}

async fn create_backup(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    authorize(&state, &headers, None).await?;
    let summary = state.backups.create().await?;
    Ok((StatusCode::CREATED, Json(summary)).into_response())
}

async fn restore_backup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    authorize(&state, &headers, None).await?;
    let summary = state.backups.restore(&name).await?;
    Ok(Json(summary).into_response())
}

async fn change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AdminBody<PasswordRequest>>,
) -> ApiResult<serde_json::Value> {
    authorize(&state, &headers, req.admin_password.as_deref()).await?;
    state.admin.set_password(&req.inner.password).await?;
    Ok(ok())
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Player
        .route("/api/users/:id/quests", get(get_quests))
        .route("/api/users/:id/quests/:quest_id/toggle", post(toggle_quest))
        .route("/api/users/:id/quests/:quest_id/progress", post(update_progress))
        .route("/api/users/:id/buckets/:granularity", get(get_quest_bucket))
        .route("/api/users/:id/progress", get(get_progress))
        // Admin
        .route("/api/admin/users", get(list_users).post(create_user))
        .route("/api/admin/users/:id", get(get_user).put(update_user).delete(delete_user))
        .route("/api/admin/users/:id/assignments", post(update_assignments))
        .route("/api/admin/templates", get(get_templates).put(put_templates))
        .route("/api/admin/templates/reload", post(reload_templates))
        .route("/api/admin/backups", get(list_backups).post(create_backup))
        .route("/api/admin/backups/:name/restore", post(restore_backup))
        .route("/api/admin/password", put(change_password))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
                .allow_headers([
                    header::CONTENT_TYPE,
                    header::AUTHORIZATION,
                    HeaderName::from_static(ADMIN_HEADER),
                ]),
        )
        .with_state(state)
}
