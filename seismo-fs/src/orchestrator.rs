//! Per-request streaming orchestration
//!
//! One request is driven by a single task that walks the receivers strictly
//! in enumeration order, extracts at most one receiver at a time on the
//! worker pool and hands each receiver's bytes to the response as one chunk.
//!
//! **States:** Init ([`initialize`]) → PerReceiver loop → Finalize, with an
//! early exit to Abort whenever the client has gone away.

use axum::body::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::archive::ArchiveWriter;
use crate::args::{OutputFormat, RequestArgs};
use crate::backend::{Backend, ExtractionRequest, Seismograms};
use crate::error::{FsError, FsResult};
use crate::phase::resolve_receiver_window;
use crate::pool::WorkerPool;
use crate::receivers::{enumerate_receivers, Receiver};
use crate::source::{prepare_finite_source, FiniteSource};
use crate::window::{resolve_time_window, TimeWindow};
use seismo_common::time::seconds_between;

/// One unit of response body, or the error that ends the response
pub type Chunk = FsResult<Bytes>;

/// Immutable inputs of one request's stream
pub struct StreamContext {
    pub args: RequestArgs,
    pub source: Arc<FiniteSource>,
    pub window: TimeWindow,
    pub receivers: Vec<Receiver>,
    pub backend: Backend,
    pub pool: WorkerPool,
}

/// Mutable per-request bookkeeping, owned by the orchestrating task
pub struct StreamState {
    delivered: usize,
    archive: Option<ArchiveWriter>,
    cancel: CancellationToken,
}

impl StreamState {
    /// Opens the archive writer when the format needs one
    pub fn new(format: OutputFormat, cancel: CancellationToken) -> Self {
        Self {
            delivered: 0,
            archive: format.is_archive().then(ArchiveWriter::new),
            cancel,
        }
    }

    /// Receivers whose seismograms were handed to the response
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    fn connection_closed(&self, sink: &mpsc::Sender<Chunk>) -> bool {
        self.cancel.is_cancelled() || sink.is_closed()
    }
}

/// How a stream ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed { delivered: usize },
    /// The client went away; whatever was already sent stays sent
    Cancelled { delivered: usize },
}

/// Init: prepare the source, resolve the time window and the receivers
pub async fn initialize(
    args: RequestArgs,
    body: Bytes,
    backend: &Backend,
    pool: &WorkerPool,
) -> FsResult<StreamContext> {
    let prepared = {
        let backend = backend.clone();
        pool.run(move || {
            prepare_finite_source(
                &body,
                &backend.info,
                backend.parser.as_ref(),
                backend.processor.as_ref(),
            )
        })
        .await??
    };

    let window = resolve_time_window(&args, &prepared, &backend.info)?;
    let receivers = enumerate_receivers(&args.receivers, &backend.stations)?;

    let mut source = prepared;
    source.origin_time = Some(window.earliest_start);

    info!(
        point_sources = source.point_sources.len(),
        receivers = receivers.len(),
        format = ?args.format,
        "Finite source request initialized"
    );

    Ok(StreamContext {
        args,
        source: Arc::new(source),
        window,
        receivers,
        backend: backend.clone(),
        pool: pool.clone(),
    })
}

/// PerReceiver loop and Finalize
///
/// Chunks are sent to `sink` as soon as a receiver is done. Returns an error
/// for the first failed extraction, or [`FsError::NoResults`] when every
/// receiver was skipped; a vanished client ends the loop with
/// [`StreamOutcome::Cancelled`].
pub async fn stream_seismograms(
    ctx: &StreamContext,
    state: &mut StreamState,
    sink: &mpsc::Sender<Chunk>,
) -> FsResult<StreamOutcome> {
    for (index, receiver) in ctx.receivers.iter().enumerate() {
        if state.connection_closed(sink) {
            return Ok(abort(state, sink, index));
        }

        let Some(receiver_window) = resolve_receiver_window(
            &ctx.window,
            &ctx.source,
            receiver,
            ctx.backend.travel_times.as_ref(),
        ) else {
            debug!(
                network = %receiver.network,
                station = %receiver.station,
                "No valid phase relative window, skipping receiver"
            );
            continue;
        };

        let request = ExtractionRequest {
            source: ctx.source.clone(),
            receiver: receiver.clone(),
            components: ctx.args.components.clone(),
            units: ctx.args.units,
            dt: ctx.args.dt,
            kernel_width: ctx.args.kernel_width,
            start_time: receiver_window.start,
            end_time: receiver_window.end,
            time_of_first_sample: ctx.window.time_of_first_sample,
            format: ctx.args.format,
            label: ctx.args.label.clone(),
        };
        debug!(
            network = %receiver.network,
            station = %receiver.station,
            duration = seconds_between(request.start_time, request.end_time),
            "Extracting seismograms"
        );
        let extractor = ctx.backend.extractor.clone();
        let extracted = ctx.pool.run(move || extractor.extract(&request)).await?;

        if state.connection_closed(sink) {
            return Ok(abort(state, sink, index));
        }

        let seismograms = extracted.map_err(|e| {
            warn!(
                network = %receiver.network,
                station = %receiver.station,
                "Seismogram extraction failed: {:#}",
                e
            );
            FsError::Extraction
        })?;

        let chunk = match (seismograms, state.archive.as_mut()) {
            (Seismograms::Sac(entries), Some(archive)) => {
                for entry in &entries {
                    archive.append(&entry.name, &entry.data)?;
                }
                archive.drain()?
            }
            (Seismograms::MiniSeed(data), None) => data,
            _ => {
                return Err(FsError::Internal(
                    "extractor returned a different format than requested".to_string(),
                ))
            }
        };

        if sink.send(Ok(chunk)).await.is_err() {
            return Ok(abort(state, sink, index));
        }
        state.delivered += 1;
    }

    if state.delivered == 0 {
        return Err(FsError::NoResults);
    }

    if let Some(archive) = state.archive.take() {
        let entries = archive.entries();
        let tail = archive.finish()?;
        if sink.send(Ok(tail)).await.is_err() {
            return Ok(abort(state, sink, ctx.receivers.len()));
        }
        debug!(entries, "Archive closed");
    }

    Ok(StreamOutcome::Completed {
        delivered: state.delivered,
    })
}

/// Abort: pass on archive bytes still buffered and stop without error
fn abort(state: &mut StreamState, sink: &mpsc::Sender<Chunk>, index: usize) -> StreamOutcome {
    if let Some(archive) = state.archive.as_ref() {
        if let Ok(pending) = archive.drain() {
            if !pending.is_empty() {
                let _ = sink.try_send(Ok(pending));
            }
        }
    }
    info!(
        receiver_index = index,
        delivered = state.delivered,
        "Client closed the connection, stopping stream"
    );
    StreamOutcome::Cancelled {
        delivered: state.delivered,
    }
}

/// Drive a whole stream into `sink`, forwarding a terminal error as the last chunk
pub async fn run_to_sink(
    ctx: StreamContext,
    mut state: StreamState,
    sink: mpsc::Sender<Chunk>,
) -> Option<StreamOutcome> {
    match stream_seismograms(&ctx, &mut state, &sink).await {
        Ok(outcome) => {
            info!(?outcome, "Finite source stream finished");
            Some(outcome)
        }
        Err(e) => {
            warn!(delivered = state.delivered(), "Finite source stream failed: {}", e);
            let _ = sink.send(Err(e)).await;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{Component, ReceiverSelection, TimeSetting, Units};
    use crate::backend::{DatabaseInfo, SacEntry, SeismogramExtractor, TravelTimeModel};
    use crate::receivers::StationInventory;
    use crate::source::test_support::{point_source, FixedParser, TrimProcessor};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct NoArrivals;

    impl TravelTimeModel for NoArrivals {
        fn first_arrival(&self, _phase: &str, _depth_km: f64, _distance_deg: f64) -> Option<f64> {
            None
        }
    }

    /// Encodes the station code as payload; optionally cancels or fails on a given call
    struct ScriptedExtractor {
        calls: AtomicUsize,
        cancel_on_call: Option<(usize, CancellationToken)>,
        fail_on_call: Option<usize>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedExtractor {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                cancel_on_call: None,
                fail_on_call: None,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl SeismogramExtractor for ScriptedExtractor {
        fn extract(&self, request: &ExtractionRequest) -> anyhow::Result<Seismograms> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.seen.lock().unwrap().push(request.receiver.station.clone());
            if let Some((n, token)) = &self.cancel_on_call {
                if *n == call {
                    token.cancel();
                }
            }
            if self.fail_on_call == Some(call) {
                anyhow::bail!("depth outside database");
            }
            Ok(match request.format {
                OutputFormat::MiniSeed => {
                    Seismograms::MiniSeed(Bytes::from(format!("<{}>", request.receiver.station)))
                }
                OutputFormat::SacZip => Seismograms::Sac(
                    request
                        .components
                        .iter()
                        .map(|&c| SacEntry {
                            name: request.sac_entry_name(c),
                            data: Bytes::from(format!("{}{}", request.receiver.station, c.as_char())),
                        })
                        .collect(),
                ),
            })
        }
    }

    fn receivers(n: usize) -> Vec<Receiver> {
        (0..n)
            .map(|i| Receiver::new(0.0, i as f64, "XX", &format!("S{}", i)))
            .collect()
    }

    fn args(format: OutputFormat) -> RequestArgs {
        RequestArgs {
            components: vec![Component::Z, Component::N, Component::E],
            units: Units::Displacement,
            dt: None,
            kernel_width: 12,
            label: "fs".to_string(),
            origin_time: None,
            start_time: Some(TimeSetting::Relative(0.0)),
            end_time: None,
            receivers: ReceiverSelection::Coordinates {
                latitude: 0.0,
                longitude: 0.0,
                network: "XX".to_string(),
                station: "SYN".to_string(),
            },
            format,
        }
    }

    async fn context(
        args: RequestArgs,
        receivers: Vec<Receiver>,
        extractor: Arc<ScriptedExtractor>,
    ) -> StreamContext {
        let backend = Backend {
            info: DatabaseInfo::new(5.0, 0.1, 36001),
            parser: Arc::new(FixedParser(FiniteSource::new(vec![point_source(0.0, 0.0, 0.0, 20)]))),
            processor: Arc::new(TrimProcessor),
            travel_times: Arc::new(NoArrivals),
            extractor,
            stations: Arc::new(StationInventory::default()),
        };
        let mut ctx = initialize(args, Bytes::from_static(b"param"), &backend, &WorkerPool::new(1))
            .await
            .unwrap();
        ctx.receivers = receivers;
        ctx
    }

    async fn run(
        ctx: &StreamContext,
        state: &mut StreamState,
    ) -> (FsResult<StreamOutcome>, Vec<Bytes>) {
        let (tx, mut rx) = mpsc::channel(64);
        let outcome = stream_seismograms(ctx, state, &tx).await;
        drop(tx);
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk.unwrap());
        }
        (outcome, chunks)
    }

    #[tokio::test]
    async fn test_initialize_sets_origin_to_earliest_start() {
        let extractor = Arc::new(ScriptedExtractor::new());
        let ctx = context(args(OutputFormat::MiniSeed), receivers(1), extractor).await;
        assert_eq!(ctx.source.origin_time, Some(ctx.window.earliest_start));
        assert!(ctx.source.hypocenter.is_some());
    }

    #[tokio::test]
    async fn test_miniseed_streams_one_chunk_per_receiver_in_order() {
        let extractor = Arc::new(ScriptedExtractor::new());
        let ctx = context(args(OutputFormat::MiniSeed), receivers(3), extractor).await;
        let mut state = StreamState::new(OutputFormat::MiniSeed, CancellationToken::new());

        let (outcome, chunks) = run(&ctx, &mut state).await;

        assert_eq!(outcome.unwrap(), StreamOutcome::Completed { delivered: 3 });
        assert_eq!(chunks, vec!["<S0>", "<S1>", "<S2>"]);
    }

    #[tokio::test]
    async fn test_saczip_has_three_entries_per_receiver_in_order() {
        let extractor = Arc::new(ScriptedExtractor::new());
        let ctx = context(args(OutputFormat::SacZip), receivers(2), extractor).await;
        let mut state = StreamState::new(OutputFormat::SacZip, CancellationToken::new());

        let (outcome, chunks) = run(&ctx, &mut state).await;
        assert_eq!(outcome.unwrap(), StreamOutcome::Completed { delivered: 2 });
        // One chunk per receiver plus the archive trailer
        assert_eq!(chunks.len(), 3);

        let bytes: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        let mut zip = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        let names: Vec<String> = (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "fs.XX.S0.Z.sac",
                "fs.XX.S0.N.sac",
                "fs.XX.S0.E.sac",
                "fs.XX.S1.Z.sac",
                "fs.XX.S1.N.sac",
                "fs.XX.S1.E.sac",
            ]
        );
    }

    #[tokio::test]
    async fn test_all_receivers_skipped_is_no_results() {
        let mut args = args(OutputFormat::MiniSeed);
        args.start_time = Some("P-10".parse().unwrap());
        let extractor = Arc::new(ScriptedExtractor::new());
        let ctx = context(args, receivers(4), extractor.clone()).await;
        let mut state = StreamState::new(OutputFormat::MiniSeed, CancellationToken::new());

        let (outcome, chunks) = run(&ctx, &mut state).await;

        assert!(matches!(outcome, Err(FsError::NoResults)));
        assert!(chunks.is_empty());
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_after_k_receivers_stops_quietly() {
        let token = CancellationToken::new();
        let extractor = Arc::new(ScriptedExtractor {
            cancel_on_call: Some((3, token.clone())),
            ..ScriptedExtractor::new()
        });
        let ctx = context(args(OutputFormat::MiniSeed), receivers(5), extractor.clone()).await;
        let mut state = StreamState::new(OutputFormat::MiniSeed, token);

        let (outcome, chunks) = run(&ctx, &mut state).await;

        assert_eq!(outcome.unwrap(), StreamOutcome::Cancelled { delivered: 2 });
        assert_eq!(chunks, vec!["<S0>", "<S1>"]);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_extracts_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let extractor = Arc::new(ScriptedExtractor::new());
        let ctx = context(args(OutputFormat::SacZip), receivers(3), extractor.clone()).await;
        let mut state = StreamState::new(OutputFormat::SacZip, token);

        let (outcome, chunks) = run(&ctx, &mut state).await;

        assert_eq!(outcome.unwrap(), StreamOutcome::Cancelled { delivered: 0 });
        assert!(chunks.is_empty());
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dropped_receiver_counts_as_disconnect() {
        let extractor = Arc::new(ScriptedExtractor::new());
        let ctx = context(args(OutputFormat::MiniSeed), receivers(3), extractor.clone()).await;
        let mut state = StreamState::new(OutputFormat::MiniSeed, CancellationToken::new());

        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let outcome = stream_seismograms(&ctx, &mut state, &tx).await.unwrap();

        assert_eq!(outcome, StreamOutcome::Cancelled { delivered: 0 });
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_extraction_failure_aborts_request() {
        let extractor = Arc::new(ScriptedExtractor {
            fail_on_call: Some(2),
            ..ScriptedExtractor::new()
        });
        let ctx = context(args(OutputFormat::MiniSeed), receivers(4), extractor.clone()).await;
        let mut state = StreamState::new(OutputFormat::MiniSeed, CancellationToken::new());

        let (outcome, chunks) = run(&ctx, &mut state).await;

        assert!(matches!(outcome, Err(FsError::Extraction)));
        assert_eq!(chunks, vec!["<S0>"]);
        assert_eq!(*extractor.seen.lock().unwrap(), vec!["S0", "S1"]);
    }

    #[tokio::test]
    async fn test_run_to_sink_forwards_terminal_error() {
        let mut args = args(OutputFormat::MiniSeed);
        args.start_time = Some("P".parse().unwrap());
        let extractor = Arc::new(ScriptedExtractor::new());
        let ctx = context(args, receivers(1), extractor).await;
        let state = StreamState::new(OutputFormat::MiniSeed, CancellationToken::new());

        let (tx, mut rx) = mpsc::channel(4);
        assert!(run_to_sink(ctx, state, tx).await.is_none());
        assert!(matches!(rx.recv().await, Some(Err(FsError::NoResults))));
        assert!(rx.recv().await.is_none());
    }
}
