// SPDX-License-Identifier: GPL-2.0-or-later
//
// The "virtual download" HTTP interceptor: one route, `GET
// /streams/:id/*filename`, that pops a registered download and streams
// it out. Grounded on `src/handler/handler.rs`'s
// `ReaderStream::new(body)` -> `Body::from_stream` pattern and
// `src/sentryshot/app.rs`'s `axum::serve(...).with_graceful_shutdown`
// wiring, trimmed down to the one route this binary needs.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use common::{ArcLogger, LogEntry, LogLevel};
use pipeline::{content_type_for_filename, DownloadRegistry};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::{io::ReaderStream, sync::CancellationToken};
use uuid::Uuid;

#[derive(Clone)]
struct AppState {
    registry: DownloadRegistry,
}

#[must_use]
pub fn router(registry: DownloadRegistry) -> Router {
    Router::new()
        .route("/streams/{id}/{*filename}", get(stream_download))
        .with_state(AppState { registry })
}

async fn stream_download(
    State(state): State<AppState>,
    Path((id, _filename)): Path<(Uuid, String)>,
) -> Response {
    let Some(download) = state.registry.pop(id) else {
        return (StatusCode::NOT_FOUND, "download not found or already served").into_response();
    };

    let mut response = Response::builder().status(StatusCode::OK).header(
        header::CONTENT_DISPOSITION,
        format!("attachment; filename=\"{}\"", download.filename),
    );
    response = response.header(
        header::CONTENT_TYPE,
        content_type_for_filename(&download.filename),
    );
    if let Some(len) = download.output.content_length() {
        response = response.header(header::CONTENT_LENGTH, len.to_string());
    }

    let stream = ReaderStream::new(download.output);
    let body = Body::from_stream(stream);
    response
        .body(body)
        .expect("response with a streamed body is always valid")
        .into_response()
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("bind {0}: {1}")]
    Bind(SocketAddr, std::io::Error),

    #[error("serve: {0}")]
    Serve(std::io::Error),
}

/// Binds and serves `router` on `0.0.0.0:{port}` until `cancel` fires,
/// then finishes in-flight responses before returning.
pub async fn serve(
    router: Router,
    port: u16,
    cancel: CancellationToken,
    logger: ArcLogger,
) -> Result<(), ServeError> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServeError::Bind(addr, e))?;

    logger.log(LogEntry::new(
        LogLevel::Info,
        "bilidwn",
        format!("serving streams on {addr}"),
    ));

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(ServeError::Serve)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use axum::extract::{Path as AxumPath, State as AxumState};
    use pipeline::{DownloadMode, PipelineOutput};
    use pretty_assertions::assert_eq;

    fn state_with(registry: DownloadRegistry) -> AxumState<AppState> {
        AxumState(AppState { registry })
    }

    #[tokio::test]
    async fn unknown_id_is_a_404() {
        let registry = DownloadRegistry::new();
        let response = stream_download(
            state_with(registry),
            AxumPath((Uuid::new_v4(), "whatever.mp4".to_owned())),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn registered_download_sets_headers_from_its_filename_and_length() {
        let registry = DownloadRegistry::new();
        let output = PipelineOutput::for_raw(PathBuf::from("/tmp/does-not-need-to-exist.mp4"), 1234);
        let id = registry.register("clip.mp4".to_owned(), DownloadMode::Raw, output);

        let response = stream_download(
            state_with(registry),
            AxumPath((id, "clip.mp4".to_owned())),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "video/mp4");
        assert_eq!(headers.get(header::CONTENT_LENGTH).unwrap(), "1234");
        assert_eq!(
            headers.get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"clip.mp4\""
        );
    }

    #[tokio::test]
    async fn a_download_can_only_be_popped_once() {
        let registry = DownloadRegistry::new();
        let output = PipelineOutput::for_raw(PathBuf::from("/tmp/does-not-need-to-exist.mp4"), 0);
        let id = registry.register("clip.mp4".to_owned(), DownloadMode::Raw, output);

        let first = stream_download(state_with(registry.clone()), AxumPath((id, "clip.mp4".to_owned()))).await;
        assert_eq!(first.status(), StatusCode::OK);

        let second = stream_download(state_with(registry), AxumPath((id, "clip.mp4".to_owned()))).await;
        assert_eq!(second.status(), StatusCode::NOT_FOUND);
    }
}
