//! Receiver enumeration
//!
//! Receivers come either from explicit coordinates in the request or from a
//! station inventory lookup with wildcard patterns. Enumeration order is the
//! order seismograms appear in the response.

use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

use crate::args::ReceiverSelection;
use crate::error::{FsError, FsResult};
use seismo_common::geo::{is_valid_latitude, is_valid_longitude};

/// A seismic receiver at the surface
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Receiver {
    pub latitude: f64,
    pub longitude: f64,
    pub network: String,
    pub station: String,
}

impl Receiver {
    pub fn new(latitude: f64, longitude: f64, network: &str, station: &str) -> Self {
        Self {
            latitude,
            longitude,
            network: network.to_string(),
            station: station.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InventoryFile {
    #[serde(default)]
    station: Vec<Receiver>,
}

/// Known stations, in file order
#[derive(Debug, Clone, Default)]
pub struct StationInventory {
    stations: Vec<Receiver>,
}

impl StationInventory {
    pub fn new(stations: Vec<Receiver>) -> Self {
        Self { stations }
    }

    /// Parse a TOML list of `[[station]]` tables
    pub fn from_toml_str(content: &str) -> seismo_common::Result<Self> {
        let file: InventoryFile = toml::from_str(content).map_err(|e| {
            seismo_common::Error::Config(format!("Parse station inventory failed: {}", e))
        })?;

        for s in &file.station {
            if !is_valid_latitude(s.latitude) || !is_valid_longitude(s.longitude) {
                return Err(seismo_common::Error::Config(format!(
                    "Station {}.{} has invalid coordinates ({}, {})",
                    s.network, s.station, s.latitude, s.longitude
                )));
            }
        }

        Ok(Self::new(file.station))
    }

    /// Load a station inventory file
    pub fn load(path: &Path) -> seismo_common::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let inventory = Self::from_toml_str(&content)?;
        info!(
            "Loaded {} stations from {}",
            inventory.len(),
            path.display()
        );
        Ok(inventory)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Stations whose network and station codes match any of the patterns
    ///
    /// Matching is case-insensitive; `*` matches any run of characters and
    /// `?` exactly one.
    pub fn query(&self, networks: &[String], stations: &[String]) -> Vec<Receiver> {
        self.stations
            .iter()
            .filter(|s| {
                networks.iter().any(|p| wildcard_match(p, &s.network))
                    && stations.iter().any(|p| wildcard_match(p, &s.station))
            })
            .cloned()
            .collect()
    }
}

/// Case-insensitive glob match supporting `*` and `?`
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().map(|c| c.to_ascii_uppercase()).collect();
    let text: Vec<char> = text.chars().map(|c| c.to_ascii_uppercase()).collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = backtrack {
            p = star_p + 1;
            t = star_t + 1;
            backtrack = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Produce the ordered receivers of a request
pub fn enumerate_receivers(
    selection: &ReceiverSelection,
    inventory: &StationInventory,
) -> FsResult<Vec<Receiver>> {
    match selection {
        ReceiverSelection::Coordinates {
            latitude,
            longitude,
            network,
            station,
        } => Ok(vec![Receiver::new(*latitude, *longitude, network, station)]),
        ReceiverSelection::Query { networks, stations } => {
            let receivers = inventory.query(networks, stations);
            if receivers.is_empty() {
                return Err(FsError::NotFound(
                    "No coordinates found satisfying the query.".to_string(),
                ));
            }
            debug!(count = receivers.len(), "Station query resolved");
            Ok(receivers)
        }
    }
}
