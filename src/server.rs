//! Development document store.
//!
//! A small axum server exposing the same surface the fallback path talks to,
//! so sessions can be exercised without the real backend.
//!
//! | Route                                                                 | Method  |
//! |-----------------------------------------------------------------------|---------|
//! | `/collaboration/health`                                               | `GET`   |
//! | `/api/workspaces/{slug}/projects/{project}/pages/{id}/description/`   | `GET`, `PATCH`, `POST` |
//! | `/api/workspaces/{slug}/projects/{project}/issues/{id}/description/`  | `GET`, `PATCH`, `POST` |
//! | `/_dev/realtime`                                                      | `PUT`   |
//!
//! `PUT /_dev/realtime` with `{"up": false}` makes the health endpoint answer
//! `503`, which pushes connected sessions into degraded mode. `POST` on a
//! description merges the submitted binary into the stored one and answers
//! with the merged state.

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, put},
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{RwLock, oneshot};
use tower_http::cors::CorsLayer;

use crate::codec;
use crate::html;
use crate::liveness::HEALTH_PATH;
use crate::merge::{UpdateMerger, YrsMerger};
use crate::store::{ConflictResolutionRequest, DocumentId, DocumentKind, PersistedEnvelope};

pub const DEFAULT_PORT: u16 = 8000;

/// Last persisted state of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub binary: Vec<u8>,
    pub envelope: PersistedEnvelope,
}

#[derive(Debug)]
pub(crate) struct ServerState {
    pub(crate) documents: HashMap<DocumentId, StoredDocument>,
    pub(crate) realtime_up: bool,
    pub(crate) writes: u64,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            documents: HashMap::new(),
            realtime_up: true,
            writes: 0,
        }
    }
}

type SharedState = Arc<RwLock<ServerState>>;

/// In-memory document store served over HTTP.
pub struct DevServer {
    state: SharedState,
    dev_cors: bool,
    shutdown_tx: Option<oneshot::Sender<()>>,
    addr: Option<SocketAddr>,
}

impl Default for DevServer {
    fn default() -> Self {
        Self::new()
    }
}

impl DevServer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(ServerState::default())),
            dev_cors: false,
            shutdown_tx: None,
            addr: None,
        }
    }

    /// Allow cross-origin requests, for browser editors on another port.
    pub fn with_dev_cors(mut self, enabled: bool) -> Self {
        self.dev_cors = enabled;
        self
    }

    /// Bind and serve in the background. Port `0` picks a free port.
    ///
    /// Returns the base URL, usable both as live URL and API base URL.
    pub async fn start(&mut self, host: &str, port: u16) -> Result<String> {
        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind dev server to {}", addr))?;
        let local_addr = listener
            .local_addr()
            .context("Failed to get server address")?;
        self.addr = Some(local_addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let app = self.router();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                tracing::error!(error = %e, "dev server error");
            }
        });

        let url = format!("http://{}", local_addr);
        tracing::info!(%url, cors = self.dev_cors, "dev document store listening");
        Ok(url)
    }

    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.addr = None;
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn url(&self) -> Option<String> {
        self.addr.map(|addr| format!("http://{}", addr))
    }

    /// Simulate the realtime transport going down or coming back.
    pub async fn set_realtime_up(&self, up: bool) {
        self.state.write().await.realtime_up = up;
    }

    pub async fn document(&self, document: &DocumentId) -> Option<StoredDocument> {
        self.state.read().await.documents.get(document).cloned()
    }

    /// Seed a document, as if persisted earlier.
    pub async fn insert(&self, document: DocumentId, envelope: PersistedEnvelope) -> Result<()> {
        let binary = envelope
            .binary()
            .with_context(|| format!("Invalid binary for {}", document))?;
        self.state
            .write()
            .await
            .documents
            .insert(document, StoredDocument { binary, envelope });
        Ok(())
    }

    pub async fn write_count(&self) -> u64 {
        self.state.read().await.writes
    }

    fn router(&self) -> Router {
        let app = build_router(self.state.clone());
        if self.dev_cors {
            app.layer(CorsLayer::permissive())
        } else {
            app
        }
    }
}

/// Serve until Ctrl+C.
pub async fn serve_until_ctrl_c(host: &str, port: u16, dev_cors: bool) -> Result<()> {
    let mut server = DevServer::new().with_dev_cors(dev_cors);
    let url = server.start(host, port).await?;
    println!("docsync dev store running at {}", url);
    println!("  LIVE_URL={} API_BASE_URL={}", url, url);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install Ctrl+C handler")?;
    println!("\nShutting down...");
    server.stop().await;
    Ok(())
}

pub(crate) fn build_router(state: SharedState) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health_handler))
        .route(
            "/api/workspaces/{slug}/projects/{project}/pages/{id}/description/",
            get(get_page).patch(patch_page).post(resolve_page),
        )
        .route(
            "/api/workspaces/{slug}/projects/{project}/issues/{id}/description/",
            get(get_issue).patch(patch_issue).post(resolve_issue),
        )
        .route("/_dev/realtime", put(realtime_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<SharedState>) -> StatusCode {
    if state.read().await.realtime_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[derive(Debug, Deserialize)]
struct RealtimeToggle {
    up: bool,
}

async fn realtime_handler(
    State(state): State<SharedState>,
    Json(toggle): Json<RealtimeToggle>,
) -> StatusCode {
    state.write().await.realtime_up = toggle.up;
    tracing::info!(up = toggle.up, "realtime transport toggled");
    StatusCode::NO_CONTENT
}

fn document_id(kind: DocumentKind, (slug, project, id): (String, String, String)) -> DocumentId {
    DocumentId {
        workspace_slug: slug,
        project_id: project,
        kind,
        id,
    }
}

async fn get_page(
    State(state): State<SharedState>,
    Path(params): Path<(String, String, String)>,
) -> Response {
    read_description(state, document_id(DocumentKind::Page, params)).await
}

async fn get_issue(
    State(state): State<SharedState>,
    Path(params): Path<(String, String, String)>,
) -> Response {
    read_description(state, document_id(DocumentKind::IssueDescription, params)).await
}

async fn patch_page(
    State(state): State<SharedState>,
    Path(params): Path<(String, String, String)>,
    Json(envelope): Json<PersistedEnvelope>,
) -> Response {
    write_description(state, document_id(DocumentKind::Page, params), envelope).await
}

async fn patch_issue(
    State(state): State<SharedState>,
    Path(params): Path<(String, String, String)>,
    Json(envelope): Json<PersistedEnvelope>,
) -> Response {
    write_description(
        state,
        document_id(DocumentKind::IssueDescription, params),
        envelope,
    )
    .await
}

async fn resolve_page(
    State(state): State<SharedState>,
    Path(params): Path<(String, String, String)>,
    Json(request): Json<ConflictResolutionRequest>,
) -> Response {
    resolve_description(state, document_id(DocumentKind::Page, params), request).await
}

async fn resolve_issue(
    State(state): State<SharedState>,
    Path(params): Path<(String, String, String)>,
    Json(request): Json<ConflictResolutionRequest>,
) -> Response {
    resolve_description(
        state,
        document_id(DocumentKind::IssueDescription, params),
        request,
    )
    .await
}

fn bad_request(document: &DocumentId, error: impl std::fmt::Display) -> Response {
    tracing::warn!(document = %document, error = %error, "rejecting description update");
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": error.to_string()})),
    )
        .into_response()
}

fn octet_stream(binary: Vec<u8>) -> Response {
    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        binary,
    )
        .into_response()
}

/// Merge submitted state into the stored state, store the result with
/// regenerated HTML and JSON, and answer with the merged binary.
async fn resolve_description(
    state: SharedState,
    document: DocumentId,
    request: ConflictResolutionRequest,
) -> Response {
    let submitted = match codec::decode_persisted(Some(&request.description_binary)) {
        Ok(binary) => binary,
        Err(e) => return bad_request(&document, e),
    };

    let mut state = state.write().await;
    let stored = state
        .documents
        .get(&document)
        .map(|stored| stored.binary.clone())
        .unwrap_or_default();
    let merged = match YrsMerger.merge(&stored, &submitted) {
        Ok(merged) => merged,
        Err(e) => return bad_request(&document, e),
    };
    let rendered = match codec::render_html(&merged) {
        Ok(rendered) => rendered,
        Err(e) => return bad_request(&document, e),
    };
    let json = html::to_prosemirror_json(&rendered);

    state.writes += 1;
    tracing::debug!(document = %document, bytes = merged.len(), "resolved description conflicts");
    state.documents.insert(
        document,
        StoredDocument {
            binary: merged.clone(),
            envelope: PersistedEnvelope::new(&merged, rendered, json),
        },
    );
    octet_stream(merged)
}

/// Unknown documents answer with an empty body, meaning nothing saved yet.
async fn read_description(state: SharedState, document: DocumentId) -> Response {
    let binary = state
        .read()
        .await
        .documents
        .get(&document)
        .map(|stored| stored.binary.clone())
        .unwrap_or_default();
    octet_stream(binary)
}

async fn write_description(
    state: SharedState,
    document: DocumentId,
    envelope: PersistedEnvelope,
) -> Response {
    let binary = match envelope.binary() {
        Ok(binary) => binary,
        Err(e) => return bad_request(&document, e),
    };

    let mut state = state.write().await;
    state.writes += 1;
    tracing::debug!(document = %document, bytes = binary.len(), "stored description");
    state
        .documents
        .insert(document, StoredDocument { binary, envelope });
    StatusCode::NO_CONTENT.into_response()
}
