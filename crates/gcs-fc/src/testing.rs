//! Scripted in-memory vehicle for protocol tests.

use std::collections::VecDeque;
use std::time::Duration;

use mavlink::common::{MavAutopilot, MavCmd, MavModeFlag, MavResult, MavType};

use crate::error::Result;
use crate::msg::{Heartbeat, Identity, Inbound, Outbound, Received};
use crate::session::{ConnectOptions, HeartbeatWait, Session};
use crate::transport::Transport;

pub(crate) const VEHICLE: Identity = Identity { system_id: 1, component_id: 1 };
pub(crate) const GCS: Identity = Identity { system_id: 255, component_id: 190 };
/// Onboard computer sharing the vehicle's system id.
pub(crate) const COMPANION: Identity = Identity { system_id: 1, component_id: 191 };

pub(crate) enum Step {
    Msg(Received),
    /// One receive that times out.
    Silence,
}

type Responder = Box<dyn FnMut(&Outbound) -> Vec<Step> + Send>;

/// Plays the vehicle: a queue of inbound steps plus an optional responder
/// called for every outbound message. Records everything sent.
pub(crate) struct ScriptedLink {
    inbox: VecDeque<Step>,
    responder: Option<Responder>,
    pub sent: Vec<Outbound>,
}

impl ScriptedLink {
    pub fn new() -> Self {
        Self {
            inbox: VecDeque::new(),
            responder: None,
            sent: Vec::new(),
        }
    }

    pub fn queue(mut self, from: Identity, msg: Inbound) -> Self {
        self.push(from, msg);
        self
    }

    pub fn then(mut self, step: Step) -> Self {
        self.inbox.push_back(step);
        self
    }

    pub fn responding(mut self, f: impl FnMut(&Outbound) -> Vec<Step> + Send + 'static) -> Self {
        self.responder = Some(Box::new(f));
        self
    }

    pub fn push(&mut self, from: Identity, msg: Inbound) {
        self.inbox.push_back(Step::Msg(Received { source: from, msg }));
    }

    pub fn is_drained(&self) -> bool {
        self.inbox.is_empty()
    }

    pub fn count(&self, pred: impl Fn(&Outbound) -> bool) -> usize {
        self.sent.iter().filter(|m| pred(m)).count()
    }
}

impl Transport for ScriptedLink {
    fn send(&mut self, msg: &Outbound) -> Result<()> {
        self.sent.push(msg.clone());
        if let Some(r) = self.responder.as_mut() {
            let steps = r(msg);
            self.inbox.extend(steps);
        }
        Ok(())
    }

    async fn recv(&mut self, timeout: Duration) -> Result<Option<Received>> {
        if timeout.is_zero() {
            // only hand out what is already queued; silences belong to real waits
            if matches!(self.inbox.front(), Some(Step::Msg(_))) {
                if let Some(Step::Msg(m)) = self.inbox.pop_front() {
                    return Ok(Some(m));
                }
            }
            return Ok(None);
        }
        match self.inbox.pop_front() {
            Some(Step::Msg(m)) => Ok(Some(m)),
            Some(Step::Silence) | None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }
}

pub(crate) fn reply(msg: Inbound) -> Step {
    Step::Msg(Received { source: VEHICLE, msg })
}

pub(crate) fn heartbeat(vehicle_type: MavType, autopilot: MavAutopilot, custom_mode: u32) -> Inbound {
    Inbound::Heartbeat(Heartbeat {
        vehicle_type,
        autopilot,
        base_mode: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
        custom_mode,
    })
}

/// ArduCopter heartbeat in the given mode.
pub(crate) fn vehicle(custom_mode: u32) -> Inbound {
    heartbeat(MavType::MAV_TYPE_QUADROTOR, MavAutopilot::MAV_AUTOPILOT_ARDUPILOTMEGA, custom_mode)
}

pub(crate) fn ack(command: MavCmd, result: MavResult) -> Inbound {
    Inbound::CommandAck { command, result }
}

/// Session bound to [`VEHICLE`] (an ArduCopter in STABILIZE) with `f` as the
/// vehicle's responder.
pub(crate) async fn session_with(
    f: impl FnMut(&Outbound) -> Vec<Step> + Send + 'static,
) -> Session<ScriptedLink> {
    let link = ScriptedLink::new().queue(VEHICLE, vehicle(0)).responding(f);
    let opts = ConnectOptions {
        wait: HeartbeatWait::Bounded(Duration::from_secs(1)),
        ..Default::default()
    };
    match Session::establish(link, GCS, opts).await {
        Ok(s) => s,
        Err(e) => panic!("scripted session failed to connect: {}", e),
    }
}
