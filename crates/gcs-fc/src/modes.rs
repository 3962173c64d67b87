//! Flight mode names <-> custom mode ids, and the mode switch itself.
//!
//! Ids are firmware specific, so the table is always resolved from the
//! bound vehicle's latest heartbeat, never assumed.

use std::time::Duration;

use mavlink::common::{MavAutopilot, MavType};
use tracing::{info, info_span, warn, Instrument};

use crate::error::{FcError, Result};
use crate::msg::{Inbound, Outbound};
use crate::session::Session;
use crate::transport::Transport;

const COPTER: &[(&str, u32)] = &[
    ("STABILIZE", 0),
    ("ACRO", 1),
    ("ALT_HOLD", 2),
    ("AUTO", 3),
    ("GUIDED", 4),
    ("LOITER", 5),
    ("RTL", 6),
    ("CIRCLE", 7),
    ("POSITION", 8),
    ("LAND", 9),
    ("OF_LOITER", 10),
    ("DRIFT", 11),
    ("SPORT", 13),
    ("FLIP", 14),
    ("AUTOTUNE", 15),
    ("POSHOLD", 16),
    ("BRAKE", 17),
    ("THROW", 18),
    ("AVOID_ADSB", 19),
    ("GUIDED_NOGPS", 20),
    ("SMART_RTL", 21),
    ("FLOWHOLD", 22),
    ("FOLLOW", 23),
    ("ZIGZAG", 24),
    ("SYSTEMID", 25),
    ("AUTOROTATE", 26),
    ("AUTO_RTL", 27),
    ("TURTLE", 28),
];

const PLANE: &[(&str, u32)] = &[
    ("MANUAL", 0),
    ("CIRCLE", 1),
    ("STABILIZE", 2),
    ("TRAINING", 3),
    ("ACRO", 4),
    ("FBWA", 5),
    ("FBWB", 6),
    ("CRUISE", 7),
    ("AUTOTUNE", 8),
    ("AUTO", 10),
    ("RTL", 11),
    ("LOITER", 12),
    ("TAKEOFF", 13),
    ("AVOID_ADSB", 14),
    ("GUIDED", 15),
    ("INITIALISING", 16),
    ("QSTABILIZE", 17),
    ("QHOVER", 18),
    ("QLOITER", 19),
    ("QLAND", 20),
    ("QRTL", 21),
    ("QAUTOTUNE", 22),
    ("QACRO", 23),
    ("THERMAL", 24),
    ("LOITERALTQLAND", 25),
];

const ROVER: &[(&str, u32)] = &[
    ("MANUAL", 0),
    ("ACRO", 1),
    ("LEARNING", 2),
    ("STEERING", 3),
    ("HOLD", 4),
    ("LOITER", 5),
    ("FOLLOW", 6),
    ("SIMPLE", 7),
    ("AUTO", 10),
    ("RTL", 11),
    ("SMART_RTL", 12),
    ("GUIDED", 15),
    ("INITIALISING", 16),
];

const SUB: &[(&str, u32)] = &[
    ("STABILIZE", 0),
    ("ACRO", 1),
    ("ALT_HOLD", 2),
    ("AUTO", 3),
    ("GUIDED", 4),
    ("CIRCLE", 7),
    ("SURFACE", 9),
    ("POSHOLD", 16),
    ("MANUAL", 19),
];

const TRACKER: &[(&str, u32)] = &[
    ("MANUAL", 0),
    ("STOP", 1),
    ("SCAN", 2),
    ("SERVO_TEST", 3),
    ("AUTO", 10),
    ("INITIALISING", 16),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeTable {
    entries: &'static [(&'static str, u32)],
}

impl ModeTable {
    /// Table for the given heartbeat identity. Non-ArduPilot autopilots get an
    /// empty table.
    pub fn for_vehicle(autopilot: MavAutopilot, vehicle_type: MavType) -> Self {
        let entries: &'static [(&'static str, u32)] = if autopilot != MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA {
            &[]
        } else {
            match vehicle_type {
                MavType::MAV_TYPE_QUADROTOR
                | MavType::MAV_TYPE_HELICOPTER
                | MavType::MAV_TYPE_HEXAROTOR
                | MavType::MAV_TYPE_OCTOROTOR
                | MavType::MAV_TYPE_COAXIAL
                | MavType::MAV_TYPE_TRICOPTER
                | MavType::MAV_TYPE_DODECAROTOR => COPTER,
                MavType::MAV_TYPE_FIXED_WING => PLANE,
                MavType::MAV_TYPE_GROUND_ROVER | MavType::MAV_TYPE_SURFACE_BOAT => ROVER,
                MavType::MAV_TYPE_SUBMARINE => SUB,
                MavType::MAV_TYPE_ANTENNA_TRACKER => TRACKER,
                _ => &[],
            }
        };
        Self { entries }
    }

    /// Case-insensitive lookup.
    pub fn id(&self, name: &str) -> Option<u32> {
        let name = name.trim().to_ascii_uppercase();
        self.entries.iter().find(|(n, _)| *n == name).map(|(_, id)| *id)
    }

    pub fn name(&self, id: u32) -> Option<&'static str> {
        self.entries.iter().find(|(_, i)| *i == id).map(|(n, _)| *n)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(n, _)| *n)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What counts as confirmation of a mode switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModeConfirm {
    /// Any heartbeat after the request. Tolerates firmware that reports the
    /// new mode late.
    #[default]
    AnyHeartbeat,
    /// A heartbeat reporting the requested custom mode.
    Strict,
}

impl<T: Transport> Session<T> {
    /// Mode table for the vehicle as of its latest heartbeat.
    pub fn mode_table(&self) -> ModeTable {
        match self.last_heartbeat() {
            Some(hb) => ModeTable::for_vehicle(hb.autopilot, hb.vehicle_type),
            None => ModeTable { entries: &[] },
        }
    }

    /// Name of the mode the vehicle last reported, if the table knows it.
    pub fn current_mode(&self) -> Option<&'static str> {
        let hb = self.last_heartbeat()?;
        self.mode_table().name(hb.custom_mode)
    }

    /// Request a mode switch by name. Returns the resolved custom mode id.
    pub async fn set_mode(&mut self, name: &str, timeout: Duration, confirm: ModeConfirm) -> Result<u32> {
        let table = self.mode_table();
        let Some(id) = table.id(name) else {
            warn!("fc: mode {} not available on this vehicle", name);
            return Err(FcError::UnknownMode { name: name.to_string() });
        };

        let token = self.begin_exchange().await?;
        let span = info_span!("mode", token = token.0, mode = %name.to_ascii_uppercase(), id);
        self.exchange_mode(id, timeout, confirm).instrument(span).await?;
        Ok(id)
    }

    async fn exchange_mode(&mut self, id: u32, timeout: Duration, confirm: ModeConfirm) -> Result<()> {
        info!("fc: requesting mode id {}", id);
        let target = self.remote();
        self.send(Outbound::SetMode { target, custom_mode: id })?;

        let mut reported = None;
        let got = self
            .wait_for(timeout, |m| match m {
                Inbound::Heartbeat(hb) => {
                    reported = Some(hb.custom_mode);
                    match confirm {
                        ModeConfirm::AnyHeartbeat => Some(hb.custom_mode),
                        ModeConfirm::Strict => (hb.custom_mode == id).then_some(hb.custom_mode),
                    }
                }
                _ => None,
            })
            .await?;

        let timeout_ms = timeout.as_millis() as u64;
        match (got, reported) {
            (Some(now), _) => {
                if now != id {
                    info!("fc: heartbeat after mode request still reports {}", now);
                }
                info!("fc: mode change confirmed");
                Ok(())
            }
            (None, None) => {
                warn!("fc: no heartbeat within {} ms of mode request", timeout_ms);
                Err(FcError::ModeTimeout { timeout_ms })
            }
            (None, Some(last)) => {
                warn!("fc: vehicle still reports mode {} (wanted {})", last, id);
                Err(FcError::ModeNotConfirmed { requested: id, reported: Some(last) })
            }
        }
    }

    pub async fn set_mode_guided(&mut self, timeout: Duration, confirm: ModeConfirm) -> Result<u32> {
        self.set_mode("GUIDED", timeout, confirm).await
    }

    pub async fn set_mode_auto(&mut self, timeout: Duration, confirm: ModeConfirm) -> Result<u32> {
        self.set_mode("AUTO", timeout, confirm).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::Received;
    use crate::testing::{heartbeat, reply, session_with, vehicle, ScriptedLink, Step, COMPANION};

    const WAIT: Duration = Duration::from_secs(5);

    fn set_modes(s: &Session<ScriptedLink>) -> Vec<u32> {
        s.transport()
            .sent
            .iter()
            .filter_map(|m| match m {
                Outbound::SetMode { custom_mode, .. } => Some(*custom_mode),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn table_follows_vehicle_kind() {
        let ap = MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA;
        assert_eq!(ModeTable::for_vehicle(ap, MavType::MAV_TYPE_QUADROTOR).id("guided"), Some(4));
        assert_eq!(ModeTable::for_vehicle(ap, MavType::MAV_TYPE_FIXED_WING).id("GUIDED"), Some(15));
        assert_eq!(ModeTable::for_vehicle(ap, MavType::MAV_TYPE_GROUND_ROVER).id("AUTO"), Some(10));
        assert_eq!(ModeTable::for_vehicle(ap, MavType::MAV_TYPE_SUBMARINE).id("SURFACE"), Some(9));
        assert_eq!(ModeTable::for_vehicle(ap, MavType::MAV_TYPE_QUADROTOR).name(6), Some("RTL"));
        assert!(ModeTable::for_vehicle(MavAutopilot::MAV_AUTOPILOT_PX4, MavType::MAV_TYPE_QUADROTOR).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_mode_sends_nothing() {
        let mut s = session_with(|_| vec![reply(vehicle(0))]).await;
        let err = s.set_mode("WARP_SPEED", WAIT, ModeConfirm::AnyHeartbeat).await.unwrap_err();
        assert!(matches!(err, FcError::UnknownMode { ref name } if name == "WARP_SPEED"));
        assert!(s.transport().sent.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn any_heartbeat_confirms_by_default() {
        // vehicle keeps reporting STABILIZE; the weak check still succeeds
        let mut s = session_with(|m| match m {
            Outbound::SetMode { .. } => vec![reply(vehicle(0))],
            _ => vec![],
        })
        .await;
        let id = s.set_mode_guided(WAIT, ModeConfirm::default()).await.unwrap();
        assert_eq!(id, 4);
        assert_eq!(set_modes(&s), vec![4]);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_heartbeat_does_not_confirm() {
        let mut s = session_with(|_| vec![Step::Silence]).await;
        // queued before the request: drained by the exchange
        s.link_mut().push(crate::testing::VEHICLE, vehicle(0));
        let err = s.set_mode_auto(WAIT, ModeConfirm::AnyHeartbeat).await.unwrap_err();
        assert!(matches!(err, FcError::ModeTimeout { timeout_ms: 5000 }));
        assert_eq!(set_modes(&s), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn companion_heartbeat_neither_confirms_nor_changes_table() {
        let companion = || {
            Step::Msg(Received {
                source: COMPANION,
                msg: heartbeat(MavType::MAV_TYPE_ONBOARD_CONTROLLER, MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA, 0),
            })
        };
        let mut s = session_with(move |m| match m {
            Outbound::SetMode { .. } => vec![companion()],
            _ => vec![],
        })
        .await;
        s.link_mut().push(
            COMPANION,
            heartbeat(MavType::MAV_TYPE_ONBOARD_CONTROLLER, MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA, 0),
        );
        assert!(!s.probe(Duration::from_millis(100)).await.unwrap());

        let err = s.set_mode("GUIDED", WAIT, ModeConfirm::AnyHeartbeat).await.unwrap_err();
        assert!(matches!(err, FcError::ModeTimeout { timeout_ms: 5000 }));
        assert_eq!(set_modes(&s), vec![4]);
        assert_eq!(s.status().vehicle_type, Some(MavType::MAV_TYPE_QUADROTOR));
    }

    #[tokio::test(start_paused = true)]
    async fn strict_rejects_other_mode() {
        let mut s = session_with(|m| match m {
            Outbound::SetMode { .. } => vec![reply(vehicle(0)), reply(vehicle(5))],
            _ => vec![],
        })
        .await;
        let err = s.set_mode("guided", WAIT, ModeConfirm::Strict).await.unwrap_err();
        assert!(matches!(err, FcError::ModeNotConfirmed { requested: 4, reported: Some(5) }));
    }

    #[tokio::test(start_paused = true)]
    async fn strict_accepts_requested_mode() {
        let mut s = session_with(|m| match m {
            Outbound::SetMode { custom_mode, .. } => vec![reply(vehicle(0)), reply(vehicle(*custom_mode))],
            _ => vec![],
        })
        .await;
        s.set_mode("Guided", WAIT, ModeConfirm::Strict).await.unwrap();
        assert_eq!(s.current_mode(), Some("GUIDED"));
    }

    #[tokio::test(start_paused = true)]
    async fn table_tracks_latest_heartbeat() {
        let mut s = session_with(|_| vec![]).await;
        s.link_mut().push(
            crate::testing::VEHICLE,
            heartbeat(MavType::MAV_TYPE_FIXED_WING, MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA, 10),
        );
        assert!(s.probe(Duration::from_millis(100)).await.unwrap());
        assert_eq!(s.current_mode(), Some("AUTO"));
        assert_eq!(s.mode_table().id("FBWA"), Some(5));
    }
}
