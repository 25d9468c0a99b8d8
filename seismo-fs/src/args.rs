//! Request argument parsing
//!
//! Raw query parameters are turned into a fully typed [`RequestArgs`] before
//! any business logic runs. Illegal values and illegal combinations are
//! rejected here with a client error.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

use crate::error::{FsError, FsResult};
use seismo_common::geo::{is_valid_latitude, is_valid_longitude};
use seismo_common::time::{parse_timestamp, Timestamp};

/// Smallest sample interval a client may request (seconds)
pub const MIN_DT: f64 = 0.01;

/// Allowed interpolation kernel half-widths
pub const KERNEL_WIDTH_RANGE: std::ops::RangeInclusive<u32> = 1..=20;

const DEFAULT_KERNEL_WIDTH: u32 = 12;
const DEFAULT_NETWORK_CODE: &str = "XX";
const DEFAULT_STATION_CODE: &str = "SYN";

/// Raw query string of `POST /finite_source`
///
/// Everything arrives as text so that conversion failures produce our own
/// diagnostics instead of a generic rejection.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FiniteSourceQuery {
    pub components: Option<String>,
    pub units: Option<String>,
    pub dt: Option<String>,
    pub kernelwidth: Option<String>,
    pub label: Option<String>,
    pub origintime: Option<String>,
    pub starttime: Option<String>,
    pub endtime: Option<String>,
    pub receiverlatitude: Option<String>,
    pub receiverlongitude: Option<String>,
    pub networkcode: Option<String>,
    pub stationcode: Option<String>,
    pub network: Option<String>,
    pub station: Option<String>,
    pub format: Option<String>,
}

/// Motion component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Z,
    N,
    E,
    R,
    T,
}

impl Component {
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'Z' => Some(Component::Z),
            'N' => Some(Component::N),
            'E' => Some(Component::E),
            'R' => Some(Component::R),
            'T' => Some(Component::T),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Component::Z => 'Z',
            Component::N => 'N',
            Component::E => 'E',
            Component::R => 'R',
            Component::T => 'T',
        }
    }
}

/// Physical quantity of the seismograms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Units {
    Displacement,
    Velocity,
    Acceleration,
}

impl FromStr for Units {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "displacement" => Ok(Units::Displacement),
            "velocity" => Ok(Units::Velocity),
            "acceleration" => Ok(Units::Acceleration),
            _ => Err(FsError::Validation(
                "Unit must be one of 'displacement', 'velocity', or 'acceleration'.".to_string(),
            )),
        }
    }
}

/// Response encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One continuous MiniSEED byte stream
    MiniSeed,
    /// A zip archive with one SAC file per receiver and component
    SacZip,
}

impl OutputFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::MiniSeed => "application/vnd.fdsn.mseed",
            OutputFormat::SacZip => "application/zip",
        }
    }

    pub fn file_extension(self) -> &'static str {
        match self {
            OutputFormat::MiniSeed => "mseed",
            OutputFormat::SacZip => "zip",
        }
    }

    pub fn is_archive(self) -> bool {
        matches!(self, OutputFormat::SacZip)
    }
}

impl FromStr for OutputFormat {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "miniseed" => Ok(OutputFormat::MiniSeed),
            "saczip" => Ok(OutputFormat::SacZip),
            _ => Err(FsError::Validation(
                "Format must either be 'miniseed' or 'saczip'.".to_string(),
            )),
        }
    }
}

/// Offset from a named phase arrival, e.g. `P-10` or `SKS+2.5`
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseOffset {
    pub phase: String,
    pub offset: f64,
}

impl fmt::Display for PhaseOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:+}", self.phase, self.offset)
    }
}

/// A user supplied time
#[derive(Debug, Clone, PartialEq)]
pub enum TimeSetting {
    Absolute(Timestamp),
    /// Seconds relative to the origin time (or to the start, for end times)
    Relative(f64),
    Phase(PhaseOffset),
}

impl FromStr for TimeSetting {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(value) = s.parse::<f64>() {
            return if value.is_finite() {
                Ok(TimeSetting::Relative(value))
            } else {
                Err(())
            };
        }
        if let Some(time) = parse_timestamp(s) {
            return Ok(TimeSetting::Absolute(time));
        }
        parse_phase_offset(s).map(TimeSetting::Phase).ok_or(())
    }
}

fn parse_phase_offset(s: &str) -> Option<PhaseOffset> {
    let split = s
        .char_indices()
        .skip(1)
        .find(|&(_, c)| c == '+' || c == '-')
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let (phase, offset) = s.split_at(split);

    let phase_ok = !phase.is_empty()
        && phase.chars().any(|c| c.is_ascii_alphabetic())
        && phase
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '^' || c == '_');
    if !phase_ok {
        return None;
    }

    let offset = if offset.is_empty() {
        0.0
    } else {
        offset.parse::<f64>().ok().filter(|v| v.is_finite())?
    };

    Some(PhaseOffset {
        phase: phase.to_string(),
        offset,
    })
}

/// How the receivers of a request are chosen
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiverSelection {
    /// A single receiver at explicit coordinates
    Coordinates {
        latitude: f64,
        longitude: f64,
        network: String,
        station: String,
    },
    /// Station inventory lookup; each list holds wildcard patterns
    Query {
        networks: Vec<String>,
        stations: Vec<String>,
    },
}

/// Typed, validated arguments of one finite-source request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestArgs {
    pub components: Vec<Component>,
    pub units: Units,
    pub dt: Option<f64>,
    pub kernel_width: u32,
    pub label: String,
    pub origin_time: Option<Timestamp>,
    pub start_time: Option<TimeSetting>,
    pub end_time: Option<TimeSetting>,
    pub receivers: ReceiverSelection,
    pub format: OutputFormat,
}

impl RequestArgs {
    /// Convert and validate raw query parameters
    pub fn from_query(query: FiniteSourceQuery, default_label: &str) -> FsResult<Self> {
        let components = parse_components(query.components.as_deref().unwrap_or("ZNE"))?;

        let units = match query.units.as_deref() {
            Some(units) => units.parse()?,
            None => Units::Displacement,
        };

        let dt = query
            .dt
            .as_deref()
            .map(|v| parse_float("dt", v))
            .transpose()?;
        if let Some(dt) = dt {
            if dt < MIN_DT {
                return Err(FsError::Validation(format!(
                    "The smallest possible dt is {} seconds.",
                    MIN_DT
                )));
            }
        }

        let kernel_width = match query.kernelwidth.as_deref() {
            Some(v) => v.trim().parse::<u32>().map_err(|_| conversion_error("kernelwidth", "int"))?,
            None => DEFAULT_KERNEL_WIDTH,
        };
        if !KERNEL_WIDTH_RANGE.contains(&kernel_width) {
            return Err(FsError::Validation(format!(
                "`kernelwidth` must not be smaller than {} or larger than {}.",
                KERNEL_WIDTH_RANGE.start(),
                KERNEL_WIDTH_RANGE.end()
            )));
        }

        let label = query
            .label
            .as_deref()
            .map(|l| l.trim().to_string())
            .unwrap_or_else(|| default_label.to_string());
        if label.is_empty() || label.contains(['/', '\\']) {
            return Err(FsError::Validation(
                "`label` must be non-empty and must not contain path separators.".to_string(),
            ));
        }

        let origin_time = query
            .origintime
            .as_deref()
            .map(|v| parse_timestamp(v).ok_or_else(|| conversion_error("origintime", "Datetime String")))
            .transpose()?;
        let start_time = query
            .starttime
            .as_deref()
            .map(|v| parse_time_setting("starttime", v))
            .transpose()?;
        let end_time = query
            .endtime
            .as_deref()
            .map(|v| parse_time_setting("endtime", v))
            .transpose()?;

        let format = match query.format.as_deref() {
            Some(format) => format.parse()?,
            None => OutputFormat::SacZip,
        };

        let receivers = parse_receivers(&query)?;

        Ok(Self {
            components,
            units,
            dt,
            kernel_width,
            label,
            origin_time,
            start_time,
            end_time,
            receivers,
            format,
        })
    }
}

fn conversion_error(name: &str, kind: &str) -> FsError {
    FsError::Validation(format!(
        "Parameter '{}' could not be converted to '{}'.",
        name, kind
    ))
}

fn parse_float(name: &str, value: &str) -> FsResult<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| conversion_error(name, "float"))
}

fn parse_time_setting(name: &str, value: &str) -> FsResult<TimeSetting> {
    value
        .parse()
        .map_err(|_| conversion_error(name, "Datetime String/Float/Phase+-Offset"))
}

fn parse_components(value: &str) -> FsResult<Vec<Component>> {
    let mut components = Vec::new();
    for c in value.trim().chars() {
        let component = Component::from_char(c).ok_or_else(|| {
            FsError::Validation(format!(
                "Component '{}' is not valid. Valid components are 'Z', 'N', 'E', 'R', and 'T'.",
                c
            ))
        })?;
        if components.contains(&component) {
            return Err(FsError::Validation(format!(
                "Component '{}' was requested more than once.",
                component.as_char()
            )));
        }
        components.push(component);
    }
    if components.is_empty() {
        return Err(FsError::Validation(
            "At least one component must be requested.".to_string(),
        ));
    }
    Ok(components)
}

fn split_patterns(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|p| p.trim().to_ascii_uppercase())
        .filter(|p| !p.is_empty())
        .collect()
}

fn parse_receivers(query: &FiniteSourceQuery) -> FsResult<ReceiverSelection> {
    let has_coordinates = query.receiverlatitude.is_some() || query.receiverlongitude.is_some();
    let has_lookup = query.network.is_some() || query.station.is_some();

    if has_coordinates && has_lookup {
        return Err(FsError::Validation(
            "Receivers can be specified either via coordinates or via network/station, not both."
                .to_string(),
        ));
    }

    if has_lookup {
        let (Some(network), Some(station)) = (query.network.as_deref(), query.station.as_deref())
        else {
            return Err(FsError::Validation(
                "Parameters 'network' and 'station' must be given together.".to_string(),
            ));
        };
        let networks = split_patterns(network);
        let stations = split_patterns(station);
        if networks.is_empty() || stations.is_empty() {
            return Err(FsError::Validation(
                "Parameters 'network' and 'station' must not be empty.".to_string(),
            ));
        }
        return Ok(ReceiverSelection::Query { networks, stations });
    }

    let (Some(lat), Some(lon)) = (
        query.receiverlatitude.as_deref(),
        query.receiverlongitude.as_deref(),
    ) else {
        return Err(FsError::Validation(if has_coordinates {
            "Parameters 'receiverlatitude' and 'receiverlongitude' must be given together."
                .to_string()
        } else {
            "Receivers must be specified either via 'receiverlatitude'/'receiverlongitude' or \
             via 'network'/'station'."
                .to_string()
        }));
    };

    let latitude = parse_float("receiverlatitude", lat)?;
    let longitude = parse_float("receiverlongitude", lon)?;
    if !is_valid_latitude(latitude) {
        return Err(FsError::Validation(
            "Receiver latitude must be between -90 and 90 degrees.".to_string(),
        ));
    }
    if !is_valid_longitude(longitude) {
        return Err(FsError::Validation(
            "Receiver longitude must be between -180 and 180 degrees.".to_string(),
        ));
    }

    let network = query
        .networkcode
        .as_deref()
        .unwrap_or(DEFAULT_NETWORK_CODE)
        .trim()
        .to_string();
    let station = query
        .stationcode
        .as_deref()
        .unwrap_or(DEFAULT_STATION_CODE)
        .trim()
        .to_string();
    if network.len() > 2 {
        return Err(FsError::Validation(
            "The network code must not be longer than 2 characters.".to_string(),
        ));
    }
    if station.len() > 5 {
        return Err(FsError::Validation(
            "The station code must not be longer than 5 characters.".to_string(),
        ));
    }

    Ok(ReceiverSelection::Coordinates {
        latitude,
        longitude,
        network,
        station,
    })
}
