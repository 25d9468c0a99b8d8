//! Finite source model and its preparation for extraction
//!
//! Preparation pads every slip-rate series with silence so no energy from the
//! convolution wraps around the database edges, low-passes it against
//! aliasing, resamples it onto the database time base and locates the
//! hypocenter.

use tracing::{debug, warn};

use crate::backend::{DatabaseInfo, FaultParser, ParseLimits, SlipRateProcessor};
use crate::error::{FsError, FsResult, PARSE_MESSAGE};
use seismo_common::time::Timestamp;

/// Regularly sampled slip-rate function of one point source
#[derive(Debug, Clone, PartialEq)]
pub struct SlipRate {
    /// Sample interval (seconds)
    pub dt: f64,
    pub samples: Vec<f64>,
}

impl SlipRate {
    pub fn new(dt: f64, samples: Vec<f64>) -> Self {
        Self { dt, samples }
    }

    pub fn npts(&self) -> usize {
        self.samples.len()
    }

    /// Surround the series with `count` zero samples on each side
    pub fn pad_with_zeros(&mut self, count: usize) {
        let mut padded = Vec::with_capacity(self.samples.len() + 2 * count);
        padded.resize(count, 0.0);
        padded.extend_from_slice(&self.samples);
        padded.resize(padded.len() + count, 0.0);
        self.samples = padded;
    }
}

/// One elemental radiator of the finite source
#[derive(Debug, Clone, PartialEq)]
pub struct PointSource {
    pub latitude: f64,
    pub longitude: f64,
    pub depth_in_m: f64,
    /// Moment tensor components `[m_rr, m_tt, m_pp, m_rt, m_rp, m_tp]` (Nm)
    pub moment_tensor: [f64; 6],
    /// Rupture delay relative to the fault reference time (seconds)
    pub time_shift: f64,
    pub sliprate: SlipRate,
}

/// Reference point of the rupture
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hypocenter {
    pub latitude: f64,
    pub longitude: f64,
    pub depth_in_m: f64,
}

/// Earthquake described by many point sources
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FiniteSource {
    pub point_sources: Vec<PointSource>,
    /// Base time shift reported by the parser, before any padding
    pub time_shift: f64,
    /// Seconds of silence prepended during preparation
    pub additional_time_shift: f64,
    pub hypocenter: Option<Hypocenter>,
    /// Set by the orchestrator once the time window is known
    pub origin_time: Option<Timestamp>,
}

impl FiniteSource {
    pub fn new(point_sources: Vec<PointSource>) -> Self {
        Self {
            point_sources,
            ..Self::default()
        }
    }

    /// Point source with the earliest rupture time; the first one wins ties
    pub fn find_hypocenter(&mut self) -> Option<Hypocenter> {
        let first = self
            .point_sources
            .iter()
            .reduce(|best, ps| if ps.time_shift < best.time_shift { ps } else { best })?;

        let hypocenter = Hypocenter {
            latitude: first.latitude,
            longitude: first.longitude,
            depth_in_m: first.depth_in_m,
        };
        self.hypocenter = Some(hypocenter);
        Some(hypocenter)
    }
}

/// Samples of silence added on each side: two dominant periods plus one
pub fn padding_samples(info: &DatabaseInfo) -> usize {
    (2.0 * info.dominant_period / info.dt).ceil() as usize + 1
}

/// Pad every slip rate with `samples` zeros on both sides and delay every
/// point source accordingly. Returns the applied shift in seconds.
pub fn pad_sliprates(source: &mut FiniteSource, samples: usize, db_dt: f64) -> f64 {
    let shift = samples as f64 * db_dt;
    for ps in &mut source.point_sources {
        ps.sliprate.pad_with_zeros(samples);
        ps.time_shift += shift;
    }
    source.additional_time_shift = shift;
    shift
}

/// Parse the request body and bring the model onto the database time base
///
/// Blocking; callers run it on the worker pool.
pub fn prepare_finite_source(
    body: &[u8],
    info: &DatabaseInfo,
    parser: &dyn FaultParser,
    processor: &dyn SlipRateProcessor,
) -> FsResult<FiniteSource> {
    let mut source = parser.parse(body, &ParseLimits::default()).map_err(|e| {
        warn!("Fault parameter parsing failed: {:#}", e);
        FsError::Parse(PARSE_MESSAGE.to_string())
    })?;

    if source.point_sources.is_empty() {
        return Err(FsError::Parse(
            "The finite source does not contain any point sources.".to_string(),
        ));
    }

    let samples = padding_samples(info);
    let shift = pad_sliprates(&mut source, samples, info.dt);

    let cutoff = 1.0 / info.dominant_period;
    let target_npts = info.npts + 2 * samples;

    for (index, ps) in source.point_sources.iter_mut().enumerate() {
        processor
            .lowpass_zero_phase(&mut ps.sliprate, cutoff)
            .map_err(|e| preparation_error(index, "low-pass filtering", e))?;

        let resampled = processor
            .resample(&ps.sliprate, info.dt, target_npts)
            .map_err(|e| preparation_error(index, "resampling", e))?;

        if resampled.npts() != target_npts || (resampled.dt - info.dt).abs() > 1e-9 * info.dt {
            return Err(FsError::Parse(format!(
                "Resampling point source {} produced {} samples at dt={} instead of {} at dt={}.",
                index,
                resampled.npts(),
                resampled.dt,
                target_npts,
                info.dt
            )));
        }
        ps.sliprate = resampled;
    }

    source.find_hypocenter();

    debug!(
        point_sources = source.point_sources.len(),
        padding_samples = samples,
        additional_time_shift = shift,
        "Finite source prepared"
    );

    Ok(source)
}

fn preparation_error(index: usize, step: &str, err: anyhow::Error) -> FsError {
    warn!("Slip rate {} of point source {} failed: {:#}", step, index, err);
    FsError::Parse(format!(
        "Could not prepare the finite source: {} of point source {} failed.",
        step, index
    ))
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn info() -> DatabaseInfo {
        DatabaseInfo::new(5.0, 0.25, 1001)
    }

    #[test]
    fn test_padding_samples_two_periods_plus_one() {
        // ceil(2 * 5 / 0.25) + 1
        assert_eq!(padding_samples(&info()), 41);
        // ceil(2 * 5 / 0.3) + 1 = ceil(33.33) + 1
        assert_eq!(padding_samples(&DatabaseInfo::new(5.0, 0.3, 10)), 35);
    }

    #[test]
    fn test_pad_adds_zeros_on_both_sides() {
        let mut source = FiniteSource::new(vec![
            point_source(0.0, 0.0, 1.0, 3),
            point_source(0.0, 1.0, 2.0, 5),
        ]);
        let shift = pad_sliprates(&mut source, 4, 0.25);

        assert_eq!(shift, 1.0);
        assert_eq!(source.additional_time_shift, 1.0);
        for (ps, original) in source.point_sources.iter().zip([3usize, 5]) {
            assert_eq!(ps.sliprate.npts(), original + 8);
            assert!(ps.sliprate.samples[..4].iter().all(|&v| v == 0.0));
            assert!(ps.sliprate.samples[4 + original..].iter().all(|&v| v == 0.0));
            assert!(ps.sliprate.samples[4..4 + original].iter().all(|&v| v == 1.0));
        }
        assert_eq!(source.point_sources[0].time_shift, 2.0);
        assert_eq!(source.point_sources[1].time_shift, 3.0);
    }

    #[test]
    fn test_prepare_aligns_all_point_sources() {
        let parser = FixedParser(FiniteSource::new(vec![
            point_source(10.0, 20.0, 4.0, 50),
            point_source(11.0, 21.0, 0.5, 80),
            point_source(12.0, 22.0, 3.0, 10),
        ]));
        let info = info();
        let source = prepare_finite_source(b"param", &info, &parser, &TrimProcessor).unwrap();

        let samples = padding_samples(&info);
        let expected_npts = info.npts + 2 * samples;
        assert!(source
            .point_sources
            .iter()
            .all(|ps| ps.sliprate.npts() == expected_npts && ps.sliprate.dt == info.dt));
        assert_eq!(source.additional_time_shift, samples as f64 * info.dt);
        assert_eq!(source.point_sources[1].time_shift, 0.5 + samples as f64 * info.dt);
    }

    #[test]
    fn test_hypocenter_is_earliest_point_source() {
        let parser = FixedParser(FiniteSource::new(vec![
            point_source(10.0, 20.0, 4.0, 5),
            point_source(11.0, 21.0, 0.5, 5),
            point_source(12.0, 22.0, 0.5, 5),
        ]));
        let source = prepare_finite_source(b"param", &info(), &parser, &TrimProcessor).unwrap();
        let hypocenter = source.hypocenter.unwrap();
        assert_eq!((hypocenter.latitude, hypocenter.longitude), (11.0, 21.0));
    }

    #[test]
    fn test_parse_failure_is_client_error() {
        let parser = FixedParser(FiniteSource::new(vec![point_source(0.0, 0.0, 0.0, 5)]));
        let err = prepare_finite_source(b"", &info(), &parser, &TrimProcessor).unwrap_err();
        assert!(matches!(err, FsError::Parse(ref msg) if msg == PARSE_MESSAGE));
    }

    #[test]
    fn test_empty_model_rejected() {
        let parser = FixedParser(FiniteSource::default());
        let err = prepare_finite_source(b"param", &info(), &parser, &TrimProcessor).unwrap_err();
        assert!(matches!(err, FsError::Parse(_)));
    }

    struct ShortResampler;

    impl SlipRateProcessor for ShortResampler {
        fn lowpass_zero_phase(&self, _sliprate: &mut SlipRate, _freq: f64) -> anyhow::Result<()> {
            Ok(())
        }

        fn resample(&self, sliprate: &SlipRate, dt: f64, _npts: usize) -> anyhow::Result<SlipRate> {
            Ok(SlipRate::new(dt, sliprate.samples.clone()))
        }
    }

    #[test]
    fn test_wrong_resampled_length_rejected() {
        let parser = FixedParser(FiniteSource::new(vec![point_source(0.0, 0.0, 0.0, 5)]));
        let err = prepare_finite_source(b"param", &info(), &parser, &ShortResampler).unwrap_err();
        assert!(matches!(err, FsError::Parse(ref msg) if msg.contains("Resampling")));
    }
}
