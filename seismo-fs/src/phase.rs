//! Per-receiver resolution of phase-relative times
//!
//! Phase-relative start/end settings only become absolute once the
//! source-receiver geometry is known. A phase that does not arrive, or an
//! offset that pushes the window outside the valid range, means the receiver
//! is skipped without an error.

use crate::args::PhaseOffset;
use crate::backend::TravelTimeModel;
use crate::receivers::Receiver;
use crate::source::FiniteSource;
use crate::window::{TimeWindow, WindowEnd, WindowStart, MAX_LEAD_TIME};
use seismo_common::geo::epicentral_distance_deg;
use seismo_common::time::{shift_seconds, Timestamp};

/// Concrete seismogram window for one receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

/// Resolve the window of one receiver, or `None` to skip it
///
/// `window.earliest_start` and `window.latest_end` bound phase-derived times
/// with the same rules the global resolver applies to absolute ones. Pure
/// function of its inputs; safe to call concurrently.
pub fn resolve_receiver_window(
    window: &TimeWindow,
    source: &FiniteSource,
    receiver: &Receiver,
    travel_times: &dyn TravelTimeModel,
) -> Option<ReceiverWindow> {
    let min_start = window.earliest_start;
    let max_end = window.latest_end;

    let arrival = |phase: &PhaseOffset| -> Option<Timestamp> {
        let hypocenter = source.hypocenter?;
        let origin = source.origin_time.unwrap_or(window.origin_time);
        let distance = epicentral_distance_deg(
            hypocenter.latitude,
            hypocenter.longitude,
            receiver.latitude,
            receiver.longitude,
        );
        let travel_time =
            travel_times.first_arrival(&phase.phase, hypocenter.depth_in_m / 1000.0, distance)?;
        Some(shift_seconds(origin, travel_time + phase.offset))
    };

    let start = match &window.start {
        WindowStart::Absolute(time) => *time,
        WindowStart::Phase(phase) => {
            let start = arrival(phase)?;
            if start >= max_end || start < shift_seconds(min_start, -MAX_LEAD_TIME) {
                return None;
            }
            start
        }
    };

    let end = match &window.end {
        WindowEnd::Absolute(time) => *time,
        WindowEnd::Phase(phase) => arrival(phase)?,
        WindowEnd::AfterStart(offset) => shift_seconds(start, *offset),
    };
    if !matches!(window.end, WindowEnd::Absolute(_)) && (end < min_start || end > max_end) {
        return None;
    }

    if end <= start {
        return None;
    }

    Some(ReceiverWindow { start, end })
}
