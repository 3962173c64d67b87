use serde::{Deserialize, Serialize};

/// Waypoint list as written by hand or exported from a map tool.
///
/// ```toml
/// altitude_m = 10.0
///
/// [[waypoints]]
/// lat = 61.7825245
/// lon = 34.36732
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaypointFile {
    /// Altitude used for every waypoint (relative to home).
    pub altitude_m: Option<f32>,
    pub waypoints: Vec<Waypoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lon: f64,
}

impl WaypointFile {
    pub fn coords(&self) -> Vec<(f64, f64)> {
        self.waypoints.iter().map(|w| (w.lat, w.lon)).collect()
    }
}

/// One downloaded mission item, flattened for export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionRow {
    pub seq: u16,
    pub frame: u8,
    pub command: u16,
    pub current: bool,
    pub autocontinue: bool,
    pub param1: f32,
    pub param2: f32,
    pub param3: f32,
    pub param4: f32,
    pub lat: f64,
    pub lon: f64,
    pub alt_m: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MissionDump {
    pub items: Vec<MissionRow>,
}
