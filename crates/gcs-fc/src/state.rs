use std::time::Duration;

use mavlink::common::{MavAutopilot, MavType};
use tokio::time::Instant;

use crate::msg::Identity;
use crate::session::Session;
use crate::transport::Transport;

/// Snapshot of what the session knows about the vehicle.
#[derive(Debug, Clone)]
pub struct LinkStatus {
    pub local: Identity,
    pub remote: Identity,
    pub vehicle_type: Option<MavType>,
    pub autopilot: Option<MavAutopilot>,
    pub armed: bool,
    pub custom_mode: Option<u32>,
    /// Resolved through the mode table; `None` if the id is unknown.
    pub mode: Option<&'static str>,
    pub last_heartbeat: Option<Instant>,
}

impl LinkStatus {
    pub fn hb_age(&self) -> Option<Duration> {
        self.last_heartbeat.map(|t| t.elapsed())
    }
}

impl<T: Transport> Session<T> {
    pub fn status(&self) -> LinkStatus {
        let hb = self.last_heartbeat();
        LinkStatus {
            local: self.local(),
            remote: self.remote(),
            vehicle_type: hb.map(|h| h.vehicle_type),
            autopilot: hb.map(|h| h.autopilot),
            armed: hb.map(|h| h.armed()).unwrap_or(false),
            custom_mode: hb.map(|h| h.custom_mode),
            mode: self.current_mode(),
            last_heartbeat: self.last_heartbeat_at(),
        }
    }
}
