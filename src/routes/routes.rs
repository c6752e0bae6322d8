//! Defines the HTTP surface.
//!
//! ## Structure
//! - **Authenticated API** (API key + CORS)
//!   - `POST   /api/upload`          — multipart upload, field `file`
//!   - `GET    /api/list`            — all records, newest first
//!   - `GET    /api/download?name=`  — download as attachment (also `HEAD`)
//!   - `DELETE /api/delete`          — delete by stored name
//! - **Open API** (CORS only)
//!   - `POST   /api/login`           — exchange UI credentials for the API key
//! - **Public**
//!   - `GET    /file/{name}`         — inline access by stored name (also `HEAD`)
//!   - `GET    /healthz`, `/readyz`  — probes
//!
//! Unmatched paths fall back to the static UI directory when one is configured.

use crate::{
    handlers::{
        auth_handlers::login,
        file_handlers::{
            MAX_UPLOAD_BYTES, delete_file, download_file, head_download_file, head_public_file,
            list_files, public_file, upload_file,
        },
        health_handlers::{healthz, readyz},
    },
    middleware::{cors, require_api_key},
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
};
use std::path::PathBuf;
use tower_http::{services::ServeDir, trace::TraceLayer};

/// Slack on top of the payload cap for multipart boundaries and part headers.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the application router with its state applied.
pub fn routes(state: AppState, assets_dir: Option<PathBuf>) -> Router {
    let api = Router::new()
        .route(
            "/api/upload",
            post(upload_file).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + MULTIPART_OVERHEAD)),
        )
        .route("/api/list", get(list_files))
        .route(
            "/api/download",
            get(download_file).head(head_download_file),
        )
        .route("/api/delete", delete(delete_file))
        // auth covers only the routes registered above
        .route_layer(from_fn_with_state(state.auth.clone(), require_api_key))
        .route("/api/login", post(login))
        .layer(from_fn(cors));

    let public = Router::new()
        .route("/file/{name}", get(public_file).head(head_public_file))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz));

    let mut app = api.merge(public);
    if let Some(dir) = assets_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.with_state(state).layer(TraceLayer::new_for_http())
}
