use std::{io, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use blob_storage::{IdentifierError, MemoryStorage, MongoStorage, Storage};
use bytes::BytesMut;
use futures::{stream, StreamExt, TryStreamExt};
use serde::Serialize;
use tokio::{io::AsyncReadExt, net::TcpListener, signal};
use tokio_util::io::{ReaderStream, StreamReader};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::config::{AppConfig, BackendConfig};

/// Capacity of the pipe between a blob download and the response body.
const STREAM_BUFFER_BYTES: usize = 64 * 1024;

pub async fn run() -> Result<()> {
    let config = AppConfig::from_env()?;

    match config.backend {
        BackendConfig::Mongo(mongo) => {
            let storage = MongoStorage::start(&mongo)
                .await
                .context("failed to start MongoDB storage")?;
            let served = serve(config.listen_addr, Arc::new(storage.clone())).await;
            storage.stop().await;
            served
        }
        BackendConfig::Memory => {
            warn!("serving from in-memory storage; blobs are lost on shutdown");
            serve(config.listen_addr, Arc::new(MemoryStorage::new())).await
        }
    }
}

/// Serves the blob API on `addr` until SIGINT or SIGTERM, then drains
/// in-flight requests.
pub async fn serve(addr: SocketAddr, storage: Arc<dyn Storage>) -> Result<()> {
    let app = build_router(storage).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind listen socket {addr}"))?;

    info!(%addr, "blob-daemon listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server exited")?;
    info!("blob-daemon stopped");
    Ok(())
}

pub fn build_router(storage: Arc<dyn Storage>) -> Router {
    let state = Arc::new(AppState { storage });

    Router::new()
        .route(
            "/api/v1/file",
            post(post_file).get(list_files).fallback(unmatched),
        )
        .route(
            "/api/v1/file/:id",
            get(get_file).delete(delete_file).fallback(unmatched),
        )
        .fallback(unmatched)
        .with_state(state)
}

struct AppState {
    storage: Arc<dyn Storage>,
}

#[utoipa::path(
    post,
    path = "/api/v1/file",
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Identifier of the stored blob", body = String, content_type = "text/plain"),
        (status = 500, description = "Upload failed", body = ErrorBody)
    )
)]
async fn post_file(
    State(state): State<Arc<AppState>>,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let chunks = body
        .into_data_stream()
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err));
    let mut reader = StreamReader::new(chunks);

    let id = state
        .storage
        .post(&mut reader)
        .await
        .map_err(|err| ApiError::internal("post file", err))?;

    info!(%id, "file stored");
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], id))
}

#[utoipa::path(
    get,
    path = "/api/v1/file/{id}",
    params(("id" = String, Path, description = "Blob identifier")),
    responses(
        (status = 200, description = "Blob contents", body = Vec<u8>, content_type = "application/octet-stream"),
        (status = 400, description = "Ill-formed identifier", body = ErrorBody),
        (status = 404, description = "No blob with this identifier", body = ErrorBody),
        (status = 500, description = "Storage failure", body = ErrorBody)
    )
)]
async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let (mut reader, mut writer) = tokio::io::duplex(STREAM_BUFFER_BYTES);
    let storage = state.storage.clone();
    let copy_id = id.clone();
    let copy = tokio::spawn(async move { storage.get(&copy_id, &mut writer).await });

    // The writer is dropped when the copy task ends, so this returns either the
    // first chunk of the blob or end-of-stream once the outcome is known.
    let mut first = BytesMut::with_capacity(STREAM_BUFFER_BYTES);
    let read = match reader.read_buf(&mut first).await {
        Ok(read) => read,
        Err(err) => {
            copy.abort();
            return Err(ApiError::internal("get file", err));
        }
    };

    if read == 0 {
        copy.await
            .map_err(|err| ApiError::internal("get file", err))?
            .map_err(|err| ApiError::identifier("get file", err))?;
        return Ok(blob_response(Body::empty()));
    }

    // Headers are committed from here on; later failures truncate the body.
    tokio::spawn(async move {
        match copy.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(%id, error = %err, "file get failed mid-stream"),
            Err(err) => error!(%id, error = %err, "file get task failed mid-stream"),
        }
    });

    let head = stream::once(async move { Ok::<_, io::Error>(first.freeze()) });
    let body = Body::from_stream(head.chain(ReaderStream::new(reader)));
    Ok(blob_response(body))
}

fn blob_response(body: Body) -> Response {
    ([(header::CONTENT_TYPE, "application/octet-stream")], body).into_response()
}

#[utoipa::path(
    get,
    path = "/api/v1/file",
    responses(
        (status = 200, description = "Identifiers of all stored blobs", body = [String]),
        (status = 500, description = "Listing failed", body = ErrorBody)
    )
)]
async fn list_files(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>, ApiError> {
    let ids = state
        .storage
        .get_list()
        .await
        .map_err(|err| ApiError::internal("list files", err))?;
    Ok(Json(ids))
}

#[utoipa::path(
    delete,
    path = "/api/v1/file/{id}",
    params(("id" = String, Path, description = "Blob identifier")),
    responses(
        (status = 200, description = "Blob removed"),
        (status = 400, description = "Ill-formed identifier", body = ErrorBody),
        (status = 404, description = "No blob with this identifier", body = ErrorBody),
        (status = 500, description = "Storage failure", body = ErrorBody)
    )
)]
async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .storage
        .delete(&id)
        .await
        .map_err(|err| ApiError::identifier("delete file", err))?;

    info!(%id, "file deleted");
    Ok(StatusCode::OK)
}

async fn unmatched(method: Method, uri: Uri) -> StatusCode {
    warn!(%method, %uri, "no route for request");
    StatusCode::BAD_REQUEST
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            error!(%error, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                error!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

/// Failed request. The status line and a generic reason reach the client; the
/// underlying error is only logged.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    operation: &'static str,
    source: anyhow::Error,
}

impl ApiError {
    fn internal(operation: &'static str, err: impl Into<anyhow::Error>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            operation,
            source: err.into(),
        }
    }

    fn identifier(operation: &'static str, err: IdentifierError) -> Self {
        let status = match &err {
            IdentifierError::IllFormed(_) => StatusCode::BAD_REQUEST,
            IdentifierError::NotFound(_) => StatusCode::NOT_FOUND,
            IdentifierError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            operation,
            source: err.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let cause = format!("{:#}", self.source);
        if self.status.is_server_error() {
            error!(status = %self.status, operation = self.operation, error = %cause, "request failed");
        } else {
            warn!(status = %self.status, operation = self.operation, error = %cause, "request rejected");
        }

        let reason = self.status.canonical_reason().unwrap_or("error");
        let body = Json(ErrorBody {
            error: reason.to_ascii_lowercase(),
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize, ToSchema)]
struct ErrorBody {
    error: String,
}

pub mod docs {
    use super::*;
    use utoipa::OpenApi;

    #[derive(OpenApi)]
    #[openapi(
        info(title = "Blob Server API", version = "0.1.0"),
        paths(post_file, get_file, list_files, delete_file),
        components(schemas(ErrorBody))
    )]
    pub struct ApiDoc;
}
