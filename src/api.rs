use std::{sync::Arc, time::Instant};

use axum::{
    Json, Router,
    extract::{Path, Request, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use uuid::Uuid;

use crate::{
    error::{StudioError, StudioResult},
    metrics::MetricsRegistry,
    models::{
        BatchPushRequest, BatchResponse, CreateRenderResponse, DEFAULT_THEME, KNOWN_THEMES,
        ManifestResponse, MessageResponse, RenderRecord, RenderRequest, RenderStatus,
        ScenePush, ScenesResponse, SetThemeRequest, ThemeResponse, ThemesResponse,
        ValidateRequest, ValidateResponse,
    },
    pool::{PoolStats, SandboxPool},
    registry::{PushOutcome, SceneRegistry},
    render::{RenderJob, RenderStore, Scheduler},
    source_check::check_scene_source,
};

#[derive(Clone)]
pub struct AppState {
    pub registry: SceneRegistry,
    pub pool: Arc<SandboxPool>,
    pub scheduler: Scheduler,
    pub store: Arc<RenderStore>,
    pub metrics: Arc<MetricsRegistry>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/scenes", get(list_scenes))
        .route("/scenes/{id}", delete(delete_scene))
        .route("/push", post(push_scene))
        .route("/push-batch", post(push_batch))
        .route("/theme", get(get_theme).post(set_theme))
        .route("/themes", get(list_themes))
        .route("/manifest", get(get_manifest))
        .route("/validate", post(validate_source))
        .route("/pool", get(pool_stats))
        .route("/metrics", get(metrics))
        .route("/v1/renders", post(submit_render))
        .route("/v1/renders/{id}", get(get_render))
        // Older client paths.
        .route("/delete/{id}", delete(delete_scene))
        .route("/get-theme", get(get_theme))
        .route("/set-theme", post(set_theme))
        .route("/test/validate", post(validate_source))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

async fn log_requests(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let mut response = next.run(request).await;
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = %response.status(),
        latency_ms = started.elapsed().as_millis() as u64,
        "request completed"
    );
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

fn bad_json(rejection: JsonRejection) -> StudioError {
    StudioError::Validation(rejection.body_text())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render_prometheus(),
    )
}

async fn list_scenes(State(state): State<AppState>) -> Json<ScenesResponse> {
    let manifest = state.registry.load_manifest().await;
    Json(ScenesResponse {
        success: true,
        scenes: manifest.scenes.clone(),
        manifest,
    })
}

async fn push_scene(
    State(state): State<AppState>,
    payload: Result<Json<ScenePush>, JsonRejection>,
) -> StudioResult<Json<MessageResponse>> {
    let Json(push) = payload.map_err(bad_json)?;
    let name = push.name.clone();
    let verb = match state.registry.push_scene(push).await? {
        PushOutcome::Added => "added",
        PushOutcome::Updated => "updated",
    };
    Ok(Json(MessageResponse {
        success: true,
        message: format!("scene {name} {verb}"),
    }))
}

async fn push_batch(
    State(state): State<AppState>,
    payload: Result<Json<BatchPushRequest>, JsonRejection>,
) -> StudioResult<Json<BatchResponse>> {
    let Json(request) = payload.map_err(bad_json)?;
    let total = request.scenes.len();

    let mut pushes = Vec::with_capacity(total);
    for (index, entry) in request.scenes.into_iter().enumerate() {
        match serde_json::from_value::<ScenePush>(entry) {
            Ok(push) => pushes.push(push),
            Err(err) => tracing::warn!(index, error = %err, "malformed batch entry skipped"),
        }
    }
    let outcome = state.registry.push_batch(pushes).await;

    Ok(Json(BatchResponse {
        success: true,
        message: format!("{}/{} scenes pushed", outcome.success_count, total),
        success_count: outcome.success_count,
        total,
    }))
}

async fn delete_scene(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> StudioResult<Json<MessageResponse>> {
    let removed = state.registry.remove_scene(&id).await?;
    Ok(Json(MessageResponse {
        success: true,
        message: format!("scene {} deleted", removed.id),
    }))
}

async fn get_theme(State(state): State<AppState>) -> Json<ThemeResponse> {
    Json(ThemeResponse {
        success: true,
        theme: state.registry.get_theme().await,
    })
}

async fn set_theme(
    State(state): State<AppState>,
    payload: Result<Json<SetThemeRequest>, JsonRejection>,
) -> StudioResult<Json<MessageResponse>> {
    let Json(request) = payload.map_err(bad_json)?;
    state.registry.set_theme(&request.theme).await?;
    if !KNOWN_THEMES.contains(&request.theme.trim()) {
        tracing::info!(theme = %request.theme, "theme is not one of the presets");
    }
    Ok(Json(MessageResponse {
        success: true,
        message: format!("theme set to {}", request.theme.trim()),
    }))
}

async fn list_themes() -> Json<ThemesResponse> {
    Json(ThemesResponse {
        success: true,
        themes: KNOWN_THEMES.to_vec(),
        default: DEFAULT_THEME,
    })
}

async fn get_manifest(State(state): State<AppState>) -> Json<ManifestResponse> {
    Json(ManifestResponse {
        success: true,
        manifest: state.registry.load_manifest().await,
    })
}

async fn validate_source(
    payload: Result<Json<ValidateRequest>, JsonRejection>,
) -> StudioResult<Json<ValidateResponse>> {
    let Json(request) = payload.map_err(bad_json)?;
    if request.content.trim().is_empty() {
        return Err(StudioError::Validation("scene source is empty".to_string()));
    }
    let check = check_scene_source(&request.content);
    let message = if check.is_ok() {
        "scene source looks valid".to_string()
    } else {
        format!("{} problem(s) found", check.errors.len())
    };
    Ok(Json(ValidateResponse {
        success: check.is_ok(),
        message,
        errors: check.errors,
        warnings: check.warnings,
    }))
}

async fn pool_stats(State(state): State<AppState>) -> Json<PoolStats> {
    Json(state.pool.stats().await)
}

async fn submit_render(
    State(state): State<AppState>,
    payload: Result<Json<RenderRequest>, JsonRejection>,
) -> StudioResult<(StatusCode, Json<CreateRenderResponse>)> {
    let Json(request) = payload.map_err(bad_json)?;
    if request.scenes.is_empty() {
        return Err(StudioError::Validation(
            "render needs at least one scene".to_string(),
        ));
    }

    let id = Uuid::new_v4();
    state.store.create_record(id, &request);
    if let Err(err) = state.scheduler.submit(RenderJob { id, request }) {
        state.store.remove(&id);
        return Err(err);
    }
    tracing::info!(job_id = %id, "render queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateRenderResponse {
            id,
            status: RenderStatus::Queued,
        }),
    ))
}

async fn get_render(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> StudioResult<Json<RenderRecord>> {
    state
        .store
        .get(&id)
        .map(Json)
        .ok_or_else(|| StudioError::NotFound(format!("render {id}")))
}
