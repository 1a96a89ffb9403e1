use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, header};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::info;

use super::models::HealthResponse;
use super::overlay::{ServerError, overlay_request};
use super::state::ServerState;
use super::upload::read_form;
use crate::overlay::FontLibrary;
use crate::settings;

const FORM_FIELDS_ALLOWANCE: usize = 1024 * 1024;

pub async fn run_server(settings: settings::Settings) -> Result<()> {
    let fonts = FontLibrary::load(&settings.fonts)?;
    let addr = settings.bind_addr();
    let app = router(settings, fonts);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind server address {}", addr))?;
    info!("listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Builds the HTTP surface without binding, so tests can drive it directly.
pub fn router(settings: settings::Settings, fonts: FontLibrary) -> Router {
    let body_limit = settings.max_upload_bytes.saturating_add(FORM_FIELDS_ALLOWANCE);
    let state = Arc::new(ServerState { settings, fonts });
    Router::new()
        .route("/health", get(health))
        .route("/api/image/add-text", post(add_text))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(axum::middleware::from_fn(cors_middleware))
}

async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "UP",
            message: "Image overlay service is running".to_string(),
        }),
    )
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return Ok(response);
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    Ok(response)
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type"),
    );
}

async fn add_text(
    State(state): State<Arc<ServerState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, ServerError> {
    let multipart = multipart.map_err(|err| ServerError::upload(err.body_text()))?;
    let form = read_form(multipart, state.settings.max_upload_bytes).await?;
    let rendered = overlay_request(state.as_ref(), form).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static(rendered.mime()))],
        rendered.bytes,
    ))
}
