//! MAVLink command and mission-transfer core for a small ground station.
//!
//! A [`Session`] is bound to one vehicle over any [`Transport`]; the command,
//! mode, home and mission operations are methods on it.

pub mod autodetect;
pub mod command;
pub mod error;
pub mod home;
pub mod mav;
pub mod mission;
pub mod modes;
pub mod msg;
pub mod session;
pub mod state;
pub mod transport;

#[cfg(test)]
mod testing;

use std::time::Duration;

use serde::Deserialize;

pub use command::{AckPolicy, AckResult};
pub use error::{FcError, Result};
pub use mav::{MavlinkTransport, TransportOptions};
pub use mission::{MissionItem, MissionList, TransferConfig, UploadReport};
pub use modes::{ModeConfirm, ModeTable};
pub use msg::Identity;
pub use session::{CancelHandle, ConnectOptions, HeartbeatWait, Session};
pub use state::LinkStatus;
pub use transport::Transport;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinkConfig {
    /// pymavlink-style or mavlink crate endpoint, e.g. "tcp:127.0.0.1:5760".
    /// Empty means autodetect over the candidates below.
    pub endpoint: Option<String>,

    /// MAVLink ids we use (GCS side). 255/190 is the usual ground station.
    pub sys_id: Option<u8>,
    pub comp_id: Option<u8>,

    /// Only bind to heartbeats from this system.
    pub target_sys: Option<u8>,

    pub heartbeat_timeout_ms: Option<u64>,

    /// Wait forever for the first heartbeat (still interruptible by Ctrl-C).
    pub hard_wait: Option<bool>,

    /// GCS heartbeat rate. 0 disables.
    pub send_heartbeat_hz: Option<f32>,

    /// Baud for bare device paths.
    pub default_baud: Option<u32>,

    /// Autodetect candidates: explicit endpoints, then devs x bauds.
    pub candidate_endpoints: Option<Vec<String>>,
    pub candidate_devs: Option<Vec<String>>,
    pub candidate_bauds: Option<Vec<u32>>,

    /// Heartbeat wait per probe attempt.
    pub probe_timeout_ms: Option<u64>,
}

impl LinkConfig {
    pub fn local(&self) -> Identity {
        Identity::new(self.sys_id.unwrap_or(255), self.comp_id.unwrap_or(190))
    }

    pub fn heartbeat_wait(&self) -> HeartbeatWait {
        if self.hard_wait.unwrap_or(false) {
            HeartbeatWait::Unbounded
        } else {
            HeartbeatWait::Bounded(Duration::from_millis(self.heartbeat_timeout_ms.unwrap_or(5000)))
        }
    }

    pub fn transport(&self) -> TransportOptions {
        TransportOptions {
            default_baud: self.default_baud.unwrap_or(57600),
            send_heartbeat_hz: Some(self.send_heartbeat_hz.unwrap_or(1.0)),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.unwrap_or(1500))
    }

    pub fn candidates(&self) -> Vec<String> {
        autodetect::candidate_endpoints(
            self.candidate_endpoints.as_deref().unwrap_or_default(),
            &self
                .candidate_devs
                .clone()
                .unwrap_or_else(autodetect::default_candidate_devs),
            &self
                .candidate_bauds
                .clone()
                .unwrap_or_else(autodetect::default_candidate_bauds),
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandConfig {
    pub ack_timeout_ms: Option<u64>,
    /// Re-sends after an ack timeout, confirmation incremented each time.
    pub retries: Option<u8>,
}

impl CommandConfig {
    pub fn policy(&self) -> AckPolicy {
        AckPolicy {
            timeout: Duration::from_millis(self.ack_timeout_ms.unwrap_or(3000)),
            retries: self.retries.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModeConfig {
    pub timeout_ms: Option<u64>,
    /// Require the heartbeat to report the requested mode.
    pub strict: Option<bool>,
}

impl ModeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(5000))
    }

    pub fn confirm(&self) -> ModeConfirm {
        if self.strict.unwrap_or(false) {
            ModeConfirm::Strict
        } else {
            ModeConfirm::AnyHeartbeat
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MissionConfig {
    pub item_timeout_ms: Option<u64>,
    pub max_retries: Option<u8>,
    /// Altitude for waypoint files that do not carry one.
    pub default_altitude_m: Option<f32>,
}

impl MissionConfig {
    pub fn transfer(&self) -> TransferConfig {
        let d = TransferConfig::default();
        TransferConfig {
            item_timeout: self.item_timeout_ms.map(Duration::from_millis).unwrap_or(d.item_timeout),
            max_retries: self.max_retries.unwrap_or(d.max_retries),
        }
    }

    pub fn default_altitude(&self) -> f32 {
        self.default_altitude_m.unwrap_or(10.0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HomeConfig {
    pub lat: f64,
    pub lon: f64,
    /// Metres AMSL.
    pub alt: f64,
    pub ack_timeout_ms: Option<u64>,
}

impl HomeConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms.unwrap_or(5000))
    }
}
