//! Read-only HTTP surface: HTML pages and a JSON API over the record store.

pub mod api;
pub mod pages;
pub mod render;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    http::{Method, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::error::DatabaseError;
use crate::store::RecordStore;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
}

/// Build the router with every page and API route.
pub fn router(store: Arc<dyn RecordStore>) -> Router {
    let state = AppState { store };
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET]);

    Router::new()
        .route("/health", get(health))
        .route("/", get(pages::overview))
        .route("/emails", get(pages::email_list))
        .route("/emails/{id}", get(pages::email_detail))
        .route("/categories", get(pages::category_list))
        .route("/categories/{name}", get(pages::category_detail))
        .route("/stats", get(pages::stats))
        .route("/api/emails", get(api::list_emails))
        .route("/api/emails/search", get(api::search_emails))
        .route("/api/emails/{id}", get(api::get_email))
        .route("/api/categories", get(api::list_categories))
        .route("/api/stats", get(api::stats))
        .layer(cors)
        .with_state(state)
}

/// Bind `addr` and serve until the process stops.
pub async fn serve(addr: SocketAddr, store: Arc<dyn RecordStore>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server started");
    axum::serve(listener, router(store)).await
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "mailstash"
    }))
}

// ── Errors ──────────────────────────────────────────────────────────

/// Failure of a JSON endpoint, rendered as `{"error": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: what.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound { entity, id } => Self::not_found(format!("{entity} {id} not found")),
            other => {
                error!(error = %other, "Store error in API handler");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "internal error".to_string(),
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

/// Failure of an HTML page.
#[derive(Debug)]
pub struct PageError {
    status: StatusCode,
    message: String,
}

impl PageError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<DatabaseError> for PageError {
    fn from(e: DatabaseError) -> Self {
        error!(error = %e, "Store error in page handler");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Something went wrong while reading the store.".to_string(),
        }
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let title = if self.status == StatusCode::NOT_FOUND {
            "Not found"
        } else {
            "Error"
        };
        let body = format!("<p>{}</p>", render::escape(&self.message));
        (self.status, Html(render::layout(title, &body))).into_response()
    }
}

/// Page number from a raw query value; anything below 1 is page 1.
pub(crate) fn page_number(raw: Option<i64>) -> u32 {
    raw.unwrap_or(1).clamp(1, i64::from(u32::MAX)) as u32
}

/// Page size from a raw query value, clamped to the store's maximum.
pub(crate) fn page_size(raw: Option<i64>, default: u32) -> u32 {
    let max = i64::from(crate::store::traits::MAX_PAGE_SIZE);
    raw.map_or(default, |n| n.clamp(1, max) as u32)
}
