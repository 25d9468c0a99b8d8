//! Shared fixtures for seismo-fs integration tests
//!
//! The mock backend understands a tiny fault-parameter format (one point
//! source per line: `lat lon depth_m time_shift`) and produces seismograms
//! whose bytes name the receiver, so tests can check order and content.

#![allow(dead_code)]

use axum::body::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use seismo_common::ServiceConfig;
use seismo_fs::args::OutputFormat;
use seismo_fs::backend::{
    Backend, DatabaseInfo, ExtractionRequest, FaultParser, ParseLimits, SacEntry, Seismograms,
    SeismogramExtractor, SlipRateProcessor, TravelTimeModel,
};
use seismo_fs::receivers::{Receiver, StationInventory};
use seismo_fs::source::{FiniteSource, PointSource, SlipRate};
use seismo_fs::{build_router, AppState};

/// Two point sources; the second one ruptures 1.5 s later
pub const FAULT_FILE: &str = "0.0 0.0 10000.0 0.0\n0.5 0.5 12000.0 1.5\n";

pub const INVENTORY: &str = r#"
[[station]]
network = "IU"
station = "ANMO"
latitude = 34.95
longitude = -106.46

[[station]]
network = "II"
station = "BFO"
latitude = 48.33
longitude = 8.33

[[station]]
network = "IU"
station = "ADK"
latitude = 51.88
longitude = -176.68

[[station]]
network = "ER"
station = "FAIL"
latitude = 10.0
longitude = 10.0
"#;

static TRACING: Once = Once::new();

/// Route service logs to the test harness output
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "seismo_fs=debug".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

pub struct LineParser;

impl FaultParser for LineParser {
    fn parse(&self, body: &[u8], _limits: &ParseLimits) -> anyhow::Result<FiniteSource> {
        let text = std::str::from_utf8(body)?;
        let mut point_sources = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let values = line
                .split_whitespace()
                .map(str::parse::<f64>)
                .collect::<Result<Vec<_>, _>>()?;
            anyhow::ensure!(values.len() == 4, "expected 4 values, got {}", values.len());
            point_sources.push(PointSource {
                latitude: values[0],
                longitude: values[1],
                depth_in_m: values[2],
                moment_tensor: [1e18, -1e18, 0.0, 0.0, 0.0, 0.0],
                time_shift: values[3],
                sliprate: SlipRate::new(0.1, vec![1.0; 20]),
            });
        }
        anyhow::ensure!(!point_sources.is_empty(), "no point sources");
        Ok(FiniteSource::new(point_sources))
    }
}

/// Identity filter; resampling zero-extends to the requested length
pub struct PaddingProcessor;

impl SlipRateProcessor for PaddingProcessor {
    fn lowpass_zero_phase(&self, _sliprate: &mut SlipRate, _freq: f64) -> anyhow::Result<()> {
        Ok(())
    }

    fn resample(&self, sliprate: &SlipRate, dt: f64, npts: usize) -> anyhow::Result<SlipRate> {
        let mut samples = sliprate.samples.clone();
        samples.resize(npts, 0.0);
        Ok(SlipRate::new(dt, samples))
    }
}

/// P arrives at 10 s per degree; no other phase exists
pub struct LinearTravelTimes;

impl TravelTimeModel for LinearTravelTimes {
    fn first_arrival(&self, phase: &str, _depth_km: f64, distance_deg: f64) -> Option<f64> {
        (phase == "P").then(|| distance_deg * 10.0)
    }
}

/// Labels its output with the receiver codes; fails for network `ER`
pub struct LabelExtractor;

impl SeismogramExtractor for LabelExtractor {
    fn extract(&self, request: &ExtractionRequest) -> anyhow::Result<Seismograms> {
        let receiver = &request.receiver;
        anyhow::ensure!(receiver.network != "ER", "receiver outside database coverage");

        Ok(match request.format {
            OutputFormat::MiniSeed => Seismograms::MiniSeed(Bytes::from(format!(
                "MSEED {}.{}\n",
                receiver.network, receiver.station
            ))),
            OutputFormat::SacZip => Seismograms::Sac(
                request
                    .components
                    .iter()
                    .map(|&c| SacEntry {
                        name: request.sac_entry_name(c),
                        data: Bytes::from(format!(
                            "SAC {}.{}.{}",
                            receiver.network,
                            receiver.station,
                            c.as_char()
                        )),
                    })
                    .collect(),
            ),
        })
    }
}

/// [`LabelExtractor`] that takes `delay` per receiver and counts its calls
pub struct SlowExtractor {
    pub calls: Arc<AtomicUsize>,
    pub delay: Duration,
}

impl SeismogramExtractor for SlowExtractor {
    fn extract(&self, request: &ExtractionRequest) -> anyhow::Result<Seismograms> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        LabelExtractor.extract(request)
    }
}

/// `count` stations of network `SY` along the equator, half a degree apart
pub fn equator_stations(count: usize) -> StationInventory {
    StationInventory::new(
        (0..count)
            .map(|i| Receiver::new(0.0, i as f64 * 0.5, "SY", &format!("S{:02}", i)))
            .collect(),
    )
}

pub fn mock_backend() -> Backend {
    Backend {
        info: DatabaseInfo::new(5.0, 0.1, 36001),
        parser: Arc::new(LineParser),
        processor: Arc::new(PaddingProcessor),
        travel_times: Arc::new(LinearTravelTimes),
        extractor: Arc::new(LabelExtractor),
        stations: Arc::new(StationInventory::from_toml_str(INVENTORY).unwrap()),
    }
}

pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        max_body_bytes: 64 * 1024,
        blocking_workers: 2,
        ..ServiceConfig::default()
    }
}

/// Router wired to the mock backend
pub fn setup_app() -> axum::Router {
    init_tracing();
    build_router(AppState::new(mock_backend(), test_config()))
}
