//! COMMAND_LONG / COMMAND_ACK engine and the simple flight commands built on it.

use std::time::Duration;

use mavlink::common::{MavCmd, MavResult};
use tracing::{info, info_span, warn, Instrument};

use crate::error::{FcError, Result};
use crate::msg::{CommandRequest, Inbound, Outbound};
use crate::session::{ExchangeToken, Session};
use crate::transport::Transport;

/// param2 of MAV_CMD_COMPONENT_ARM_DISARM that bypasses pre-arm/in-flight checks.
pub const FORCE_ARM_MAGIC: f32 = 21196.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AckResult {
    pub token: ExchangeToken,
    pub command: MavCmd,
    pub result: MavResult,
    /// Confirmation value of the attempt that got acknowledged.
    pub confirmation: u8,
}

/// Ack wait per attempt plus how many times to re-send on silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPolicy {
    pub timeout: Duration,
    pub retries: u8,
}

impl AckPolicy {
    pub fn once(timeout: Duration) -> Self {
        Self { timeout, retries: 0 }
    }
}

impl<T: Transport> Session<T> {
    /// Fire-and-forget COMMAND_LONG to the bound vehicle.
    pub fn send_command(&mut self, command: MavCmd, params: [f32; 7], confirmation: u8) -> Result<()> {
        let req = CommandRequest {
            target: self.remote(),
            command,
            confirmation,
            params,
        };
        self.send(Outbound::Command(req))
    }

    /// Send a command and wait for its COMMAND_ACK.
    ///
    /// Only MAV_RESULT_ACCEPTED is `Ok`; any other result is
    /// [`FcError::AckRejected`]. Acks for other commands are ignored.
    pub async fn command_ack(&mut self, command: MavCmd, params: [f32; 7], policy: AckPolicy) -> Result<AckResult> {
        let token = self.begin_exchange().await?;
        let span = info_span!("command", token = token.0, command = ?command);
        self.exchange_ack(token, command, params, policy).instrument(span).await
    }

    pub(crate) async fn exchange_ack(
        &mut self,
        token: ExchangeToken,
        command: MavCmd,
        params: [f32; 7],
        policy: AckPolicy,
    ) -> Result<AckResult> {
        let attempts = policy.retries.saturating_add(1);
        for confirmation in 0..attempts {
            if confirmation > 0 {
                warn!("fc: no ack for {:?}, re-sending (confirmation {})", command, confirmation);
            }
            self.send_command(command, params, confirmation)?;

            let got = self
                .wait_for(policy.timeout, |m| match m {
                    Inbound::CommandAck { command: c, result } if *c == command => Some(*result),
                    _ => None,
                })
                .await?;

            match got {
                Some(MavResult::MAV_RESULT_ACCEPTED) => {
                    info!("fc: {:?} accepted", command);
                    return Ok(AckResult {
                        token,
                        command,
                        result: MavResult::MAV_RESULT_ACCEPTED,
                        confirmation,
                    });
                }
                Some(result) => {
                    warn!("fc: {:?} rejected: {:?}", command, result);
                    return Err(FcError::AckRejected {
                        command,
                        result,
                        code: result as u8,
                    });
                }
                None => {}
            }
        }
        warn!("fc: {:?} timed out after {} attempt(s)", command, attempts);
        Err(FcError::AckTimeout { command, attempts })
    }

    pub async fn arm(&mut self, force: bool, policy: AckPolicy) -> Result<AckResult> {
        info!("FC: sending ARM{}", if force { " (forced)" } else { "" });
        self.command_ack(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, arm_params(true, force), policy)
            .await
    }

    pub async fn disarm(&mut self, force: bool, policy: AckPolicy) -> Result<AckResult> {
        info!("FC: sending DISARM{}", if force { " (forced)" } else { "" });
        self.command_ack(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, arm_params(false, force), policy)
            .await
    }

    /// Climb to `alt_m` (relative). Vehicle must already be armed in GUIDED.
    pub async fn takeoff(&mut self, alt_m: f32, policy: AckPolicy) -> Result<AckResult> {
        info!("FC: sending TAKEOFF to {}m", alt_m);
        let params = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, alt_m];
        self.command_ack(MavCmd::MAV_CMD_NAV_TAKEOFF, params, policy).await
    }

    /// Land at the current position.
    pub async fn land(&mut self, policy: AckPolicy) -> Result<AckResult> {
        info!("FC: sending LAND");
        self.command_ack(MavCmd::MAV_CMD_NAV_LAND, [0.0; 7], policy).await
    }
}

fn arm_params(arm: bool, force: bool) -> [f32; 7] {
    [
        if arm { 1.0 } else { 0.0 },
        if force { FORCE_ARM_MAGIC } else { 0.0 },
        0.0,
        0.0,
        0.0,
        0.0,
        0.0,
    ]
}
