//! Global time window of a finite-source request
//!
//! Computes the absolute range a synthetic seismogram can occupy given the
//! origin time, the source's own time shift, the padding added during
//! preparation and the database length. User supplied absolute start/end
//! times are validated here; phase-relative ones stay symbolic until each
//! receiver's geometry is known.

use chrono::{TimeZone, Utc};
use tracing::debug;

use crate::args::{PhaseOffset, RequestArgs, TimeSetting};
use crate::backend::DatabaseInfo;
use crate::error::{FsError, FsResult};
use crate::source::FiniteSource;
use seismo_common::time::{format_timestamp, shift_seconds, Timestamp};

/// How far before the earliest sample a seismogram may start (seconds)
pub const MAX_LEAD_TIME: f64 = 3600.0;

/// Relative tolerance below which a requested `dt` counts as the native one
const RESAMPLE_TOLERANCE: f64 = 1e-6;

/// Origin used when the request does not name one; only a relative anchor
pub fn default_origin_time() -> Timestamp {
    Utc.with_ymd_and_hms(1900, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Start of the requested seismograms
#[derive(Debug, Clone, PartialEq)]
pub enum WindowStart {
    Absolute(Timestamp),
    Phase(PhaseOffset),
}

/// End of the requested seismograms
#[derive(Debug, Clone, PartialEq)]
pub enum WindowEnd {
    Absolute(Timestamp),
    Phase(PhaseOffset),
    /// Seconds after a start that is only known per receiver
    AfterStart(f64),
}

/// Resolved window bounds, sample aligned to the source time base
#[derive(Debug, Clone, PartialEq)]
pub struct TimeWindow {
    pub origin_time: Timestamp,
    pub time_of_first_sample: Timestamp,
    pub earliest_start: Timestamp,
    pub latest_end: Timestamp,
    pub start: WindowStart,
    pub end: WindowEnd,
}

/// True when `dt` asks for a sample interval other than the database's own
pub fn resampling_requested(dt: Option<f64>, native_dt: f64) -> bool {
    dt.is_some_and(|dt| (dt / native_dt - 1.0).abs() > RESAMPLE_TOLERANCE)
}

/// Resolve origin/start/end settings against a prepared source
pub fn resolve_time_window(
    args: &RequestArgs,
    source: &FiniteSource,
    info: &DatabaseInfo,
) -> FsResult<TimeWindow> {
    let origin_time = args.origin_time.unwrap_or_else(default_origin_time);

    let start = match &args.start_time {
        None => WindowStart::Absolute(origin_time),
        Some(TimeSetting::Absolute(time)) => WindowStart::Absolute(*time),
        Some(TimeSetting::Relative(offset)) => {
            WindowStart::Absolute(shift_seconds(origin_time, *offset))
        }
        Some(TimeSetting::Phase(phase)) => WindowStart::Phase(phase.clone()),
    };

    let time_of_first_sample = shift_seconds(origin_time, -source.time_shift);
    // Exactly on a sample: the padding shift is a whole number of database samples.
    let earliest_start = shift_seconds(time_of_first_sample, source.additional_time_shift);
    let mut latest_end = shift_seconds(time_of_first_sample, info.length);
    if resampling_requested(args.dt, info.dt) {
        latest_end = shift_seconds(latest_end, -(args.kernel_width as f64 * info.dt));
    }

    let end = match (&args.end_time, &start) {
        (None, _) => WindowEnd::Absolute(latest_end),
        (Some(TimeSetting::Absolute(time)), _) => WindowEnd::Absolute(*time),
        (Some(TimeSetting::Relative(offset)), WindowStart::Absolute(start)) => {
            WindowEnd::Absolute(shift_seconds(*start, *offset))
        }
        (Some(TimeSetting::Relative(offset)), WindowStart::Phase(_)) => {
            WindowEnd::AfterStart(*offset)
        }
        (Some(TimeSetting::Phase(phase)), _) => WindowEnd::Phase(phase.clone()),
    };

    if let WindowStart::Absolute(start) = start {
        if start >= latest_end {
            return Err(FsError::Validation(
                "The `starttime` must be before the seismogram ends.".to_string(),
            ));
        }
        if start < shift_seconds(earliest_start, -MAX_LEAD_TIME) {
            return Err(FsError::Validation(
                "The seismogram can start at the maximum one hour before the origin time."
                    .to_string(),
            ));
        }
    }

    if let WindowEnd::Absolute(end) = end {
        if end < earliest_start || end > latest_end {
            return Err(FsError::Validation(format!(
                "The end time of the seismograms lies outside the allowed range of {} to {}.",
                format_timestamp(earliest_start),
                format_timestamp(latest_end)
            )));
        }
    }

    if let (WindowStart::Absolute(start), WindowEnd::Absolute(end)) = (&start, &end) {
        if end <= start {
            return Err(FsError::Validation(
                "The end time of the seismograms must be after the start time.".to_string(),
            ));
        }
    }

    debug!(
        origin = %format_timestamp(origin_time),
        first_sample = %format_timestamp(time_of_first_sample),
        earliest_start = %format_timestamp(earliest_start),
        latest_end = %format_timestamp(latest_end),
        "Time window resolved"
    );

    Ok(TimeWindow {
        origin_time,
        time_of_first_sample,
        earliest_start,
        latest_end,
        start,
        end,
    })
}
