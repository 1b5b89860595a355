//! Localhost upload listener.
//!
//! Routes:
//! - `POST /` and `POST /text`: a `text` field, form-encoded or multipart.
//!   Multipart posts may carry an `audio` file field instead, which wins
//!   over `text` and is stored under its base name in the upload directory.
//! - `POST /audio?filename=<name>`: raw audio body, stored under its base
//!   name in the upload directory.
//!
//! Every response is plain text with permissive CORS headers so browser
//! pages on other origins can post to it.

use crate::config::IntakeConfig;
use crate::error::{LipSyncError, Result};
use crate::producers::Input;
use axum::{Form, Router};
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use bytes::Bytes;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
struct IntakeState {
    inputs: mpsc::Sender<Input>,
    upload_dir: Arc<PathBuf>,
}

#[derive(serde::Deserialize)]
struct TextForm {
    #[serde(default)]
    text: Option<String>,
}

#[derive(serde::Deserialize)]
struct AudioQuery {
    #[serde(default)]
    filename: Option<String>,
}

/// Running upload listener.
pub struct IntakeServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl IntakeServer {
    /// Bind `127.0.0.1:{config.port}` (port `0` picks a free port) and serve
    /// in a background task until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`LipSyncError::Intake`] if the listener cannot bind.
    pub async fn start(
        config: &IntakeConfig,
        inputs: mpsc::Sender<Input>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let state = IntakeState {
            inputs,
            upload_dir: Arc::new(config.upload_dir.clone()),
        };

        let app = Router::new()
            .route("/", post(handle_form).options(handle_preflight))
            .route("/text", post(handle_form).options(handle_preflight))
            .route("/audio", post(handle_audio).options(handle_preflight))
            .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
            .with_state(state);

        let listener = TcpListener::bind(("127.0.0.1", config.port))
            .await
            .map_err(|e| LipSyncError::Intake(format!("listener bind failed: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| LipSyncError::Intake(format!("failed to get local addr: {e}")))?;

        info!("intake listening on http://{addr}");

        let handle = tokio::spawn(async move {
            let shutdown = async move { cancel.cancelled().await };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!("intake server error: {e}");
            }
            info!("intake listener stopped");
        });

        Ok(Self { addr, handle })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Wait for the server task to finish after cancellation.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            warn!("intake server task failed: {e}");
        }
    }
}

fn reply(status: StatusCode, body: impl Into<String>) -> Response {
    (
        status,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "X-Requested-With, Content-Type"),
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
        ],
        body.into(),
    )
        .into_response()
}

async fn handle_preflight() -> Response {
    reply(StatusCode::OK, "")
}

async fn handle_form(State(state): State<IntakeState>, request: Request) -> Response {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    if is_multipart {
        match Multipart::from_request(request, &state).await {
            Ok(multipart) => handle_multipart(&state, multipart).await,
            Err(rejection) => reply(rejection.status(), rejection.body_text()),
        }
    } else {
        match Form::<TextForm>::from_request(request, &state).await {
            Ok(Form(form)) => handle_text(&state, form.text).await,
            Err(rejection) => reply(rejection.status(), rejection.body_text()),
        }
    }
}

async fn handle_text(state: &IntakeState, text: Option<String>) -> Response {
    let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
        warn!("text post without a text field");
        return reply(StatusCode::BAD_REQUEST, "missing text field");
    };
    info!(chars = text.len(), "received text");
    forward(state, Input::Text(text)).await
}

async fn handle_multipart(state: &IntakeState, mut multipart: Multipart) -> Response {
    let mut audio: Option<(Option<String>, Bytes)> = None;
    let mut text: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return reply(e.status(), e.body_text()),
        };
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("audio") => {
                let file_name = field.file_name().and_then(base_name);
                match field.bytes().await {
                    Ok(body) => audio = Some((file_name, body)),
                    Err(e) => return reply(e.status(), e.body_text()),
                }
            }
            Some("text") => match field.text().await {
                Ok(value) => text = Some(value),
                Err(e) => return reply(e.status(), e.body_text()),
            },
            other => warn!(field = ?other, "ignoring multipart field"),
        }
    }

    match audio {
        Some((Some(file_name), body)) => store_audio(state, &file_name, &body).await,
        Some((None, _)) => {
            warn!("audio field present but no file was uploaded");
            reply(StatusCode::BAD_REQUEST, "missing filename")
        }
        None => handle_text(state, text).await,
    }
}

async fn handle_audio(
    State(state): State<IntakeState>,
    Query(query): Query<AudioQuery>,
    body: Bytes,
) -> Response {
    let Some(file_name) = query.filename.as_deref().and_then(base_name) else {
        warn!("audio upload without a usable filename");
        return reply(StatusCode::BAD_REQUEST, "missing filename");
    };
    store_audio(&state, &file_name, &body).await
}

async fn store_audio(state: &IntakeState, file_name: &str, body: &[u8]) -> Response {
    if body.is_empty() {
        return reply(StatusCode::BAD_REQUEST, "empty audio body");
    }

    let path = state.upload_dir.join(file_name);
    if let Err(e) = save_upload(&path, body).await {
        error!(path = %path.display(), error = %e, "failed to store upload");
        return reply(StatusCode::INTERNAL_SERVER_ERROR, format!("internal server error: {e}"));
    }
    info!(path = %path.display(), bytes = body.len(), "received audio file");
    forward(state, Input::Audio(path)).await
}

async fn save_upload(path: &Path, body: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, body).await
}

async fn forward(state: &IntakeState, input: Input) -> Response {
    if state.inputs.send(input).await.is_err() {
        return reply(StatusCode::SERVICE_UNAVAILABLE, "content pipeline unavailable");
    }
    reply(StatusCode::OK, "request accepted")
}

/// Last path component of an uploaded name, accepting either separator.
fn base_name(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next()?.trim();
    if last.is_empty() || last == "." || last == ".." {
        return None;
    }
    Some(last.to_owned())
}
