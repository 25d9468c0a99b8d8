//! Finite-source seismogram endpoint
//!
//! `POST /finite_source` takes a fault-parameter file as the body and the
//! request options as query parameters. The response is streamed: every
//! receiver's seismograms are written as soon as they are extracted.
//!
//! Errors found before the first receiver is delivered (parsing, validation,
//! an unknown station query, a failed extraction, nothing to deliver) come
//! back as a plain-text status response. Once bytes have been sent the
//! status is committed, and a later failure aborts the body instead.

use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{header, StatusCode},
    response::Response,
};
use std::io;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::args::{FiniteSourceQuery, RequestArgs};
use crate::error::{FsError, FsResult};
use crate::orchestrator::{self, Chunk, StreamState};
use crate::AppState;

/// POST /finite_source
pub async fn post_finite_source(
    State(state): State<AppState>,
    Query(query): Query<FiniteSourceQuery>,
    body: Bytes,
) -> FsResult<Response> {
    let span = info_span!("finite_source", request_id = %Uuid::new_v4());
    async move {
        info!(body_bytes = body.len(), "Finite source request received");
        let result = stream_response(state, query, body).await;
        if let Err(e) = &result {
            warn!(status = %e.status(), "Finite source request rejected: {}", e);
        }
        result
    }
    .instrument(span)
    .await
}

async fn stream_response(
    state: AppState,
    query: FiniteSourceQuery,
    body: Bytes,
) -> FsResult<Response> {
    let args = RequestArgs::from_query(query, &state.config.default_label)?;
    let format = args.format;
    let filename = format!("{}.{}", args.label, format.file_extension());

    let ctx = orchestrator::initialize(args, body, &state.backend, &state.pool).await?;

    // Dropping the guard (handler abandoned or body dropped by the
    // connection) is what tells the orchestrator the client is gone.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();

    let (tx, mut rx) = mpsc::channel::<Chunk>(state.config.stream_buffer_chunks.max(1));
    tokio::spawn(
        orchestrator::run_to_sink(ctx, StreamState::new(format, cancel), tx).in_current_span(),
    );

    let first = match rx.recv().await {
        Some(Ok(chunk)) => chunk,
        Some(Err(e)) => return Err(e),
        None => {
            return Err(FsError::Internal(
                "stream ended before producing any output".to_string(),
            ))
        }
    };

    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok::<Bytes, io::Error>(first);
        while let Some(next) = rx.recv().await {
            match next {
                Ok(chunk) => yield Ok(chunk),
                Err(e) => {
                    yield Err(io::Error::other(e.to_string()));
                    break;
                }
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, format.content_type())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| FsError::Internal(format!("Build response failed: {}", e)))
}
