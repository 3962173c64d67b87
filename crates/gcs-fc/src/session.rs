//! Connection manager: one [`Session`] per vehicle link.
//!
//! The session owns the transport, the identity bound from the first vehicle
//! heartbeat and the cancellation signal. Every protocol operation borrows it
//! mutably, so only one exchange is ever outstanding on a link.

use std::sync::Arc;
use std::time::Duration;

use mavlink::common::MavSeverity;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{FcError, Result};
use crate::msg::{Heartbeat, Identity, Inbound, Outbound, Received};
use crate::transport::Transport;

/// How long `connect` waits for the first vehicle heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatWait {
    Bounded(Duration),
    /// Block until a heartbeat arrives or the session is cancelled.
    Unbounded,
}

impl Default for HeartbeatWait {
    fn default() -> Self {
        HeartbeatWait::Bounded(Duration::from_secs(5))
    }
}

/// Latched cancellation signal. Clone it out of the session before starting
/// a long operation; `cancel()` aborts whatever wait is in flight.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self(Arc::new(tx))
    }

    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn reset(&self) {
        self.0.send_replace(false);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.0.subscribe()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub wait: HeartbeatWait,
    /// Only bind to heartbeats from this system id.
    pub target_sys: Option<u8>,
    pub cancel: CancelHandle,
}

/// Identifies one command exchange or mission transfer in logs and results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExchangeToken(pub u64);

impl std::fmt::Display for ExchangeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// Slice length for the unbounded heartbeat wait.
const HARD_WAIT_SLICE: Duration = Duration::from_secs(1);

pub struct Session<T: Transport> {
    link: T,
    local: Identity,
    remote: Identity,
    last_heartbeat: Option<Heartbeat>,
    last_heartbeat_at: Option<Instant>,
    next_token: u64,
    cancel: CancelHandle,
}

impl<T: Transport> Session<T> {
    /// Wait for the first vehicle heartbeat on `link` and bind its sender as
    /// the remote identity.
    pub async fn establish(mut link: T, local: Identity, opts: ConnectOptions) -> Result<Self> {
        let (deadline, timeout_ms) = match opts.wait {
            HeartbeatWait::Bounded(d) => (Some(Instant::now() + d), d.as_millis() as u64),
            HeartbeatWait::Unbounded => (None, 0),
        };

        loop {
            let slice = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Err(FcError::ConnectTimeout { timeout_ms });
                    }
                    d - now
                }
                None => HARD_WAIT_SLICE,
            };

            let Some(rx) = recv_or_cancel(&mut link, &opts.cancel, slice).await? else {
                continue;
            };
            let Inbound::Heartbeat(hb) = rx.msg else { continue };
            if !hb.is_vehicle() {
                debug!("fc: ignoring heartbeat from {} ({:?})", rx.source, hb.vehicle_type);
                continue;
            }
            if let Some(want) = opts.target_sys {
                if rx.source.system_id != want {
                    debug!("fc: ignoring heartbeat from system {} (want {})", rx.source.system_id, want);
                    continue;
                }
            }

            info!(
                "fc: connected to system {} component {} ({:?}, {:?})",
                rx.source.system_id, rx.source.component_id, hb.vehicle_type, hb.autopilot
            );
            return Ok(Self {
                link,
                local,
                remote: rx.source,
                last_heartbeat: Some(hb),
                last_heartbeat_at: Some(Instant::now()),
                next_token: 0,
                cancel: opts.cancel,
            });
        }
    }

    /// Release the transport. Nothing is sent to the vehicle.
    pub fn disconnect(mut self) {
        info!("fc: disconnecting from {}", self.remote);
        self.link.close();
    }

    pub fn local(&self) -> Identity {
        self.local
    }

    pub fn remote(&self) -> Identity {
        self.remote
    }

    pub fn last_heartbeat(&self) -> Option<&Heartbeat> {
        self.last_heartbeat.as_ref()
    }

    pub fn last_heartbeat_at(&self) -> Option<Instant> {
        self.last_heartbeat_at
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn transport(&self) -> &T {
        &self.link
    }

    /// Opportunistic liveness check: true if the vehicle heartbeats within
    /// `timeout`.
    pub async fn probe(&mut self, timeout: Duration) -> Result<bool> {
        let seen = self
            .wait_for(timeout, |m| matches!(m, Inbound::Heartbeat(_)).then_some(()))
            .await?;
        Ok(seen.is_some())
    }

    pub(crate) fn send(&mut self, msg: Outbound) -> Result<()> {
        self.link.send(&msg)
    }

    /// Start a new exchange: drop whatever is already queued so a late reply
    /// to an earlier exchange cannot satisfy this one.
    pub(crate) async fn begin_exchange(&mut self) -> Result<ExchangeToken> {
        if self.cancel.is_cancelled() {
            return Err(FcError::Cancelled);
        }
        let mut dropped = 0usize;
        while let Some(rx) = self.link.recv(Duration::ZERO).await? {
            self.observe(&rx);
            dropped += 1;
        }
        if dropped > 0 {
            debug!("fc: dropped {} stale message(s)", dropped);
        }
        self.next_token += 1;
        Ok(ExchangeToken(self.next_token))
    }

    /// Wait up to `timeout` for the first message from the remote system that
    /// `pick` accepts. Everything else is discarded; the deadline is fixed at
    /// entry and never extended by unrelated traffic. `pick` only ever sees
    /// heartbeats from the bound vehicle component.
    pub(crate) async fn wait_for<R>(
        &mut self,
        timeout: Duration,
        mut pick: impl FnMut(&Inbound) -> Option<R>,
    ) -> Result<Option<R>> {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let Some(rx) = recv_or_cancel(&mut self.link, &self.cancel, deadline - now).await? else {
                continue;
            };
            if !self.observe(&rx) {
                continue;
            }
            if let Some(r) = pick(&rx.msg) {
                return Ok(Some(r));
            }
        }
    }

    /// Track liveness and log vehicle text. False if `rx` is not ours to act on:
    /// another system, or a heartbeat from anything but the bound vehicle
    /// (a companion computer or gimbal sharing its system id).
    fn observe(&mut self, rx: &Received) -> bool {
        if rx.source.system_id != self.remote.system_id {
            return false;
        }
        match &rx.msg {
            Inbound::Heartbeat(hb) => {
                if rx.source != self.remote || !hb.is_vehicle() {
                    debug!("fc: ignoring heartbeat from {} ({:?})", rx.source, hb.vehicle_type);
                    return false;
                }
                self.last_heartbeat = Some(hb.clone());
                self.last_heartbeat_at = Some(Instant::now());
            }
            Inbound::StatusText { severity, text } => match severity {
                MavSeverity::MAV_SEVERITY_EMERGENCY
                | MavSeverity::MAV_SEVERITY_ALERT
                | MavSeverity::MAV_SEVERITY_CRITICAL
                | MavSeverity::MAV_SEVERITY_ERROR
                | MavSeverity::MAV_SEVERITY_WARNING => warn!("fc: vehicle says: {}", text),
                _ => info!("fc: vehicle says: {}", text),
            },
            _ => {}
        }
        true
    }
}

async fn recv_or_cancel<T: Transport>(
    link: &mut T,
    cancel: &CancelHandle,
    timeout: Duration,
) -> Result<Option<Received>> {
    let mut rx = cancel.subscribe();
    if *rx.borrow_and_update() {
        return Err(FcError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = rx.wait_for(|c| *c) => Err(FcError::Cancelled),
        r = link.recv(timeout) => r,
    }
}


#[cfg(test)]
impl<T: Transport> Session<T> {
    pub(crate) fn link_mut(&mut self) -> &mut T {
        &mut self.link
    }
}
