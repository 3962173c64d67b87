//! Typed messages exchanged with the transport.
//!
//! Only the message kinds the protocol engines act on get their own variant;
//! everything else arrives as [`Inbound::Other`] and is discarded by the waits.

use mavlink::common::{
    GpsFixType, MavAutopilot, MavCmd, MavMissionResult, MavMissionType, MavModeFlag, MavResult,
    MavSeverity, MavType,
};

use crate::mission::MissionItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub system_id: u8,
    pub component_id: u8,
}

impl Identity {
    pub fn new(system_id: u8, component_id: u8) -> Self {
        Self { system_id, component_id }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.system_id, self.component_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Heartbeat {
    pub vehicle_type: MavType,
    pub autopilot: MavAutopilot,
    pub base_mode: MavModeFlag,
    pub custom_mode: u32,
}

impl Heartbeat {
    /// Same heuristic pymavlink uses before binding a target: ground stations,
    /// companions and peripherals also emit heartbeats.
    pub fn is_vehicle(&self) -> bool {
        if self.autopilot == MavAutopilot::MAV_AUTOPILOT_INVALID {
            return false;
        }
        !matches!(
            self.vehicle_type,
            MavType::MAV_TYPE_GCS
                | MavType::MAV_TYPE_ONBOARD_CONTROLLER
                | MavType::MAV_TYPE_GIMBAL
                | MavType::MAV_TYPE_ADSB
                | MavType::MAV_TYPE_CAMERA
        )
    }

    pub fn armed(&self) -> bool {
        self.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Heartbeat(Heartbeat),
    CommandAck {
        command: MavCmd,
        result: MavResult,
    },
    MissionCount {
        count: u16,
        mission_type: MavMissionType,
    },
    /// MISSION_REQUEST_INT, or the legacy float MISSION_REQUEST.
    MissionRequest {
        seq: u16,
        mission_type: MavMissionType,
    },
    MissionItem {
        item: MissionItem,
        mission_type: MavMissionType,
    },
    MissionAck {
        result: MavMissionResult,
        mission_type: MavMissionType,
    },
    StatusText {
        severity: MavSeverity,
        text: String,
    },
    Other {
        id: u32,
    },
}

/// An inbound message with the sender taken from the frame header.
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub source: Identity,
    pub msg: Inbound,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandRequest {
    pub target: Identity,
    pub command: MavCmd,
    pub confirmation: u8,
    pub params: [f32; 7],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HomePosition {
    pub lat_e7: i32,
    pub lon_e7: i32,
    pub alt_mm: i32,
    pub q: [f32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub time_usec: u64,
    pub fix_type: GpsFixType,
    pub lat_e7: i32,
    pub lon_e7: i32,
    pub alt_mm: i32,
    pub eph: u16,
    pub epv: u16,
    pub vel: u16,
    pub cog: u16,
    pub satellites_visible: u8,
}

/// Everything the core ever puts on the wire. Mission messages are always
/// tagged as mission type MISSION by the encoder.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Our own GCS heartbeat.
    Heartbeat,
    Command(CommandRequest),
    /// Custom-mode switch (MAV_MODE_FLAG_CUSTOM_MODE_ENABLED + mode id).
    SetMode {
        target: Identity,
        custom_mode: u32,
    },
    MissionClearAll {
        target: Identity,
    },
    MissionCount {
        target: Identity,
        count: u16,
    },
    MissionItem {
        target: Identity,
        item: MissionItem,
    },
    MissionRequestList {
        target: Identity,
    },
    MissionRequestInt {
        target: Identity,
        seq: u16,
    },
    MissionAck {
        target: Identity,
        result: MavMissionResult,
    },
    HomePosition(HomePosition),
    GpsFix(GpsFix),
}
