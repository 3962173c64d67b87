//! Mission protocol: item model plus upload/download transfers.

mod download;
mod upload;

pub use upload::{TransferConfig, UploadPhase, UploadReport};

use gcs_proto::geo::{deg_to_e7, e7_to_deg};
use gcs_proto::waypoints::MissionRow;
use mavlink::common::{MavCmd, MavFrame};
use tracing::info;

use crate::error::{FcError, Result};
use crate::msg::Outbound;
use crate::session::Session;
use crate::transport::Transport;

/// Acceptance radius put in param2 of generated waypoints, metres.
pub const WAYPOINT_ACCEPT_RADIUS_M: f32 = 2.0;

/// One MISSION_ITEM_INT worth of content.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MissionItem {
    pub seq: u16,
    pub frame: MavFrame,
    pub command: MavCmd,
    pub current: bool,
    pub autocontinue: bool,
    pub params: [f32; 4],
    /// Latitude, degE7.
    pub x: i32,
    /// Longitude, degE7.
    pub y: i32,
    /// Altitude, metres (meaning depends on `frame`).
    pub z: f32,
}

impl MissionItem {
    /// Plain NAV_WAYPOINT at a relative altitude.
    pub fn waypoint(seq: u16, lat: f64, lon: f64, alt_m: f32) -> Self {
        Self {
            seq,
            frame: MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT_INT,
            command: MavCmd::MAV_CMD_NAV_WAYPOINT,
            current: seq == 0,
            autocontinue: true,
            // hold 0 s, radius, pass-through 0, yaw 0
            params: [0.0, WAYPOINT_ACCEPT_RADIUS_M, 0.0, 0.0],
            x: deg_to_e7(lat),
            y: deg_to_e7(lon),
            z: alt_m,
        }
    }

    pub fn lat(&self) -> f64 {
        e7_to_deg(self.x)
    }

    pub fn lon(&self) -> f64 {
        e7_to_deg(self.y)
    }
}

impl From<&MissionItem> for MissionRow {
    fn from(i: &MissionItem) -> Self {
        MissionRow {
            seq: i.seq,
            frame: i.frame as u8,
            command: i.command as u16,
            current: i.current,
            autocontinue: i.autocontinue,
            param1: i.params[0],
            param2: i.params[1],
            param3: i.params[2],
            param4: i.params[3],
            lat: i.lat(),
            lon: i.lon(),
            alt_m: i.z,
        }
    }
}

/// Validated, immutable mission: `seq` matches position and exactly one item
/// is current (none when empty).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MissionList {
    items: Vec<MissionItem>,
}

impl MissionList {
    pub fn new(items: Vec<MissionItem>) -> Result<Self> {
        if items.len() > u16::MAX as usize {
            return Err(FcError::InvalidMission(format!("{} items, max {}", items.len(), u16::MAX)));
        }
        if let Some((pos, item)) = items.iter().enumerate().find(|(pos, i)| i.seq as usize != *pos) {
            return Err(FcError::InvalidMission(format!(
                "item at position {} has seq {}",
                pos, item.seq
            )));
        }
        let current = items.iter().filter(|i| i.current).count();
        if !items.is_empty() && current != 1 {
            return Err(FcError::InvalidMission(format!("{} current items, want exactly 1", current)));
        }
        Ok(Self { items })
    }

    /// Standard navigation list from `(lat, lon)` pairs, all at `alt_m`.
    pub fn waypoints(coords: &[(f64, f64)], alt_m: f32) -> Result<Self> {
        let items = coords
            .iter()
            .enumerate()
            .map(|(i, (lat, lon))| MissionItem::waypoint(i as u16, *lat, *lon, alt_m))
            .collect();
        Self::new(items)
    }

    pub fn items(&self) -> &[MissionItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Transport> Session<T> {
    /// MISSION_CLEAR_ALL, fire-and-forget.
    pub fn clear_mission(&mut self) -> Result<()> {
        info!("fc: clearing mission on {}", self.remote());
        let target = self.remote();
        self.send(Outbound::MissionClearAll { target })
    }
}
