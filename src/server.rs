use crate::config::AppConfig;
use crate::geometry;
use crate::report::{self, ExportError};
use crate::snapshot::{self, HttpTileFetcher, TileFetcher};
use crate::store::PlotStore;
use crate::types::{Plot, PlotDraft};
use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get},
    Router,
};
use chrono::Utc;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

pub struct AppState {
    pub config: AppConfig,
    pub store: Mutex<PlotStore>,
    pub fetcher: Box<dyn TileFetcher>,
}

pub async fn start_server(config: AppConfig, store: PlotStore) -> Result<()> {
    let fetcher = HttpTileFetcher::new(&config.tiles.url_template);
    let port = config.server.port;
    let state = Arc::new(AppState {
        config,
        store: Mutex::new(store),
        fetcher: Box::new(fetcher),
    });

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    println!("Starting server on http://{}", addr);

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/config", get(config_handler))
        .route("/api/plots", get(list_plots).post(create_plot))
        .route("/api/plots/:id", delete(delete_plot))
        .route("/api/plots/:id/preview.png", get(preview_handler))
        .route("/api/export", get(export_handler))
        .nest_service("/", ServeDir::new("static"))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn config_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "centerLat": state.config.map.center_lat,
        "centerLng": state.config.map.center_lng,
        "zoom": state.config.map.zoom,
        "tileUrl": state.config.tiles.url_template,
    }))
}

async fn list_plots(State(state): State<Arc<AppState>>) -> Json<Vec<Plot>> {
    let store = state.store.lock().await;
    Json(store.plots().to_vec())
}

/// Capture a drawn plot: validate, measure, persist, and only then answer.
///
/// The record the page keeps is exactly the record the server stored, so a
/// write that fails never leaves a phantom plot on the map.
async fn create_plot(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<PlotDraft>,
) -> Response {
    let name = draft.name.trim().to_string();
    if name.is_empty() {
        return api_error(StatusCode::UNPROCESSABLE_ENTITY, "name is required");
    }
    let crop = draft.crop.trim().to_string();
    if crop.is_empty() {
        return api_error(StatusCode::UNPROCESSABLE_ENTITY, "crop is required");
    }
    let ring = match geometry::normalize_ring(&draft.coordinates) {
        Ok(ring) => ring,
        Err(err) => return api_error(StatusCode::UNPROCESSABLE_ENTITY, &err.to_string()),
    };
    let notes = draft
        .notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    let plot = Plot {
        id: Utc::now().timestamp_millis() as u64,
        name,
        crop,
        area: geometry::area_hectares(&ring),
        notes,
        coordinates: ring,
    };

    let mut store = state.store.lock().await;
    match store.append(plot.clone()) {
        Ok(()) => (StatusCode::CREATED, Json(plot)).into_response(),
        Err(err) => {
            tracing::warn!("failed to persist plot: {err}");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to persist plot")
        }
    }
}

async fn delete_plot(State(state): State<Arc<AppState>>, Path(id): Path<u64>) -> Response {
    let mut store = state.store.lock().await;
    match store.remove(id) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => api_error(StatusCode::NOT_FOUND, "unknown plot id"),
        Err(err) => {
            tracing::warn!("failed to persist removal: {err}");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to persist removal")
        }
    }
}

async fn preview_handler(State(state): State<Arc<AppState>>, Path(id): Path<u64>) -> Response {
    // Clone the record out so tile fetching happens outside the store lock.
    let plot = {
        let store = state.store.lock().await;
        match store.get(id) {
            Some(plot) => plot.clone(),
            None => return api_error(StatusCode::NOT_FOUND, "unknown plot id"),
        }
    };

    let preview = match snapshot::render(
        &plot,
        &state.config.preview,
        &state.config.tiles,
        state.fetcher.as_ref(),
    )
    .await
    {
        Ok(preview) => preview,
        Err(err) => return api_error(StatusCode::UNPROCESSABLE_ENTITY, &err.to_string()),
    };

    match preview.encode_png() {
        Ok(png) => ([(header::CONTENT_TYPE, "image/png")], png).into_response(),
        Err(err) => {
            tracing::warn!("failed to encode preview: {err}");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode preview")
        }
    }
}

async fn export_handler(State(state): State<Arc<AppState>>) -> Response {
    let plots = {
        let store = state.store.lock().await;
        store.plots().to_vec()
    };

    let outcome = match report::export_pdf(&plots, &state.config, state.fetcher.as_ref()).await {
        Ok(outcome) => outcome,
        Err(ExportError::NoPlots) => {
            return api_error(StatusCode::CONFLICT, "no plots to export")
        }
        Err(err) => {
            tracing::warn!("export failed: {err}");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
        }
    };
    for warning in &outcome.warnings {
        tracing::warn!("export: {warning}");
    }

    let mut response = (
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", report::EXPORT_FILENAME),
            ),
        ],
        outcome.pdf,
    )
        .into_response();
    if !outcome.warnings.is_empty() {
        let encoded = header_safe(&outcome.warnings.join("\n"));
        if let Ok(value) = HeaderValue::from_str(&encoded) {
            response.headers_mut().insert("x-export-warnings", value);
        }
    }
    response
}

fn api_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Percent-encode down to printable ASCII so warnings can travel in a
/// response header; the page undoes this with `decodeURIComponent`.
fn header_safe(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'%' => out.push_str("%25"),
            0x20..=0x7e => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
