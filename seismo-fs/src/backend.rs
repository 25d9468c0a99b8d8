//! Collaborator interfaces
//!
//! The waveform database, the fault-parameter parser, the slip-rate signal
//! kernels and the travel-time model live outside this crate. They are
//! plugged in behind these traits and shared read-only across requests, so
//! implementations must tolerate concurrent calls.

use axum::body::Bytes;
use std::sync::Arc;

use crate::args::{Component, OutputFormat, Units};
use crate::receivers::{Receiver, StationInventory};
use crate::source::{FiniteSource, SlipRate};
use seismo_common::time::Timestamp;

/// Description of the waveform database the service extracts from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DatabaseInfo {
    /// Shortest period reliably resolved by the database (seconds)
    pub dominant_period: f64,
    /// Native sample interval (seconds)
    pub dt: f64,
    /// Number of samples per database trace
    pub npts: usize,
    /// Duration covered by a database trace (seconds)
    pub length: f64,
}

impl DatabaseInfo {
    /// Describe a database; `length` is the span from first to last sample
    pub fn new(dominant_period: f64, dt: f64, npts: usize) -> Self {
        Self {
            dominant_period,
            dt,
            npts,
            length: dt * npts.saturating_sub(1) as f64,
        }
    }
}

/// Bounds handed to the fault-parameter parser
///
/// 10000 samples at 10 Hz capture rise times down to one second and time
/// shifts up to 1000 seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParseLimits {
    pub npts: usize,
    pub dt: f64,
    pub trise_min: f64,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            npts: 10_000,
            dt: 0.1,
            trise_min: 1.0,
        }
    }
}

/// Turns a raw fault-parameter file into point sources
pub trait FaultParser: Send + Sync {
    fn parse(&self, body: &[u8], limits: &ParseLimits) -> anyhow::Result<FiniteSource>;
}

/// Signal kernels applied to slip-rate series during preparation
pub trait SlipRateProcessor: Send + Sync {
    /// Zero-phase low-pass filter in place; must not shift the series in time
    fn lowpass_zero_phase(&self, sliprate: &mut SlipRate, freq: f64) -> anyhow::Result<()>;

    /// Resample to `dt` producing exactly `npts` samples
    fn resample(&self, sliprate: &SlipRate, dt: f64, npts: usize) -> anyhow::Result<SlipRate>;
}

/// Seismic phase arrival times
pub trait TravelTimeModel: Send + Sync {
    /// Seconds after the origin at which `phase` first arrives, or `None` when
    /// the phase does not exist for this geometry (shadow zone, unknown phase)
    fn first_arrival(&self, phase: &str, source_depth_km: f64, distance_deg: f64) -> Option<f64>;
}

/// Everything the extractor needs for one receiver
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub source: Arc<FiniteSource>,
    pub receiver: Receiver,
    pub components: Vec<Component>,
    pub units: Units,
    pub dt: Option<f64>,
    pub kernel_width: u32,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub time_of_first_sample: Timestamp,
    pub format: OutputFormat,
    pub label: String,
}

impl ExtractionRequest {
    /// Archive entry name for one component of this receiver:
    /// `<label>.<network>.<station>.<component>.sac`
    pub fn sac_entry_name(&self, component: Component) -> String {
        format!(
            "{}.{}.{}.{}.sac",
            self.label,
            self.receiver.network,
            self.receiver.station,
            component.as_char()
        )
    }
}

/// One SAC file destined for the archive
#[derive(Debug, Clone, PartialEq)]
pub struct SacEntry {
    pub name: String,
    pub data: Bytes,
}

/// Encoded seismograms for one receiver
#[derive(Debug, Clone, PartialEq)]
pub enum Seismograms {
    /// Concatenated MiniSEED records, streamed as-is
    MiniSeed(Bytes),
    /// Named SAC files, appended to the archive in order
    Sac(Vec<SacEntry>),
}

/// Finite-source extraction, convolution and trace encoding
pub trait SeismogramExtractor: Send + Sync {
    fn extract(&self, request: &ExtractionRequest) -> anyhow::Result<Seismograms>;
}

/// The collaborators a running service is wired to
#[derive(Clone)]
pub struct Backend {
    pub info: DatabaseInfo,
    pub parser: Arc<dyn FaultParser>,
    pub processor: Arc<dyn SlipRateProcessor>,
    pub travel_times: Arc<dyn TravelTimeModel>,
    pub extractor: Arc<dyn SeismogramExtractor>,
    pub stations: Arc<StationInventory>,
}
