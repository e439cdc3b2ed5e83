//! HTTP surface: the upload form, its submission, and audio playback routes.
//!
//! Form submissions always answer `200`; failures of the translation
//! workflow are shown in the rendered result rather than as HTTP errors.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path as UrlPath, State};
use axum::http::{header, HeaderMap};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tracing::debug;

use crate::backend::SpeechTranslator;
use crate::chunker::AudioSplitter;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::languages::DEFAULT_TARGET;
use crate::render::render_page;
use crate::upload::{sanitize_filename, UploadedFile};
use crate::workflow::process_request;

/// Human-readable service name returned by the health endpoint.
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
/// Service version string returned by the health endpoint.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared state injected into all route handlers.
pub struct AppState {
    /// Runtime configuration loaded at startup.
    pub cfg: AppConfig,
    pub splitter: Arc<dyn AudioSplitter>,
    pub translator: Arc<dyn SpeechTranslator>,
}

impl AppState {
    /// Constructs shared handler state.
    pub fn new(
        cfg: AppConfig,
        splitter: Arc<dyn AudioSplitter>,
        translator: Arc<dyn SpeechTranslator>,
    ) -> Self {
        Self {
            cfg,
            splitter,
            translator,
        }
    }
}

/// Builds the Axum router for all public endpoints.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.cfg.max_upload_bytes;
    Router::new()
        .route("/", get(index).post(translate))
        .route("/health", get(health))
        .route("/uploads/:name", get(uploaded_audio))
        .route("/default-audio", get(default_audio))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Empty form (`GET /`).
pub async fn index() -> Html<String> {
    Html(render_page(None, None))
}

/// Status endpoint (`GET /health`).
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "name": APP_NAME,
        "version": APP_VERSION,
    }))
}

/// Form submission (`POST /`).
///
/// Answers with JSON instead of HTML when the client accepts `application/json`.
pub async fn translate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let form = parse_translate_form(&mut multipart).await?;
    debug!(
        target_language = %form.language,
        has_upload = form.audio.is_some(),
        "received translation form"
    );

    let outcome = process_request(
        &state.cfg,
        state.splitter.as_ref(),
        state.translator.as_ref(),
        &form.language,
        form.audio,
    )
    .await;

    if wants_json(&headers) {
        return Ok(Json(outcome).into_response());
    }
    Ok(Html(render_page(Some(&form.language), Some(&outcome))).into_response())
}

/// Serves a kept upload (`GET /uploads/:name`).
pub async fn uploaded_audio(
    State(state): State<Arc<AppState>>,
    UrlPath(name): UrlPath<String>,
) -> Result<Response, AppError> {
    if !state.cfg.persist_uploads || sanitize_filename(&name) != name {
        return Err(AppError::not_found(format!("no uploaded file named {name:?}")));
    }
    serve_wav(&state.cfg.upload_dir.join(&name)).await
}

/// Serves the fallback recording (`GET /default-audio`).
pub async fn default_audio(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    serve_wav(&state.cfg.default_audio).await
}

struct TranslateForm {
    language: String,
    audio: Option<UploadedFile>,
}

/// Reads the `language` and `audio` fields; unknown fields are skipped.
async fn parse_translate_form(multipart: &mut Multipart) -> Result<TranslateForm, AppError> {
    let mut language: Option<String> = None;
    let mut audio: Option<UploadedFile> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_multipart(format!("invalid multipart body: {err}")))?
    {
        let Some(name) = field.name().map(ToOwned::to_owned) else {
            continue;
        };

        match name.as_str() {
            "language" => {
                language = Some(
                    field
                        .text()
                        .await
                        .map_err(|err| {
                            AppError::bad_multipart(format!("invalid language field: {err}"))
                        })?
                        .trim()
                        .to_string(),
                )
                .filter(|v| !v.is_empty());
            }
            "audio" => {
                let filename = field.file_name().map(ToOwned::to_owned).unwrap_or_default();
                let bytes = field.bytes().await.map_err(|err| {
                    AppError::bad_multipart(format!("failed to read audio bytes: {err}"))
                })?;
                if !filename.is_empty() {
                    audio = Some(UploadedFile {
                        filename,
                        bytes: bytes.to_vec(),
                    });
                }
            }
            _ => {}
        }
    }

    Ok(TranslateForm {
        language: language.unwrap_or_else(|| DEFAULT_TARGET.to_string()),
        audio,
    })
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("application/json"))
}

async fn serve_wav(path: &Path) -> Result<Response, AppError> {
    let meta = tokio::fs::metadata(path).await.map_err(|err| match err.kind() {
        ErrorKind::NotFound => AppError::not_found(format!("{} not found", path.display())),
        _ => AppError::internal(format!("failed to stat {:?}: {err}", path)),
    })?;
    if !meta.is_file() {
        return Err(AppError::not_found(format!("{} not found", path.display())));
    }

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|err| AppError::internal(format!("failed to read {:?}: {err}", path)))?;
    Ok(([(header::CONTENT_TYPE, "audio/wav")], bytes).into_response())
}
