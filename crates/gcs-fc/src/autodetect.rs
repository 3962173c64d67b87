use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{FcError, Result};
use crate::mav::{MavlinkTransport, TransportOptions};
use crate::msg::Identity;
use crate::session::{CancelHandle, ConnectOptions, HeartbeatWait, Session};
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub endpoint: String,
    pub hb_seen: bool,
    pub elapsed_ms: u64,
    pub note: String,
}

#[derive(Debug, Clone)]
pub struct AutodetectResult {
    pub chosen: Option<String>,
    pub probes: Vec<ProbeResult>,
}

pub fn default_candidate_devs() -> Vec<String> {
    vec![
        "/dev/serial0".into(),
        "/dev/ttyAMA0".into(),
        "/dev/ttyS0".into(),
        "/dev/ttyUSB0".into(),
        "/dev/ttyUSB1".into(),
        "/dev/ttyACM0".into(),
        "/dev/ttyACM1".into(),
    ]
}

pub fn default_candidate_bauds() -> Vec<u32> {
    vec![57600, 115200, 230400, 921600]
}

/// Explicit endpoints first, then every device at every baud.
pub fn candidate_endpoints(explicit: &[String], devs: &[String], bauds: &[u32]) -> Vec<String> {
    let mut out: Vec<String> = explicit.to_vec();
    for dev in devs {
        for baud in bauds {
            out.push(format!("serial:{}:{}", dev, baud));
        }
    }
    out
}

/// Probe `candidates` in order with a bounded heartbeat wait each, stopping
/// at the first one that yields a vehicle heartbeat.
pub async fn autodetect_with<T, F, Fut>(
    candidates: &[String],
    heartbeat_timeout: Duration,
    local: Identity,
    cancel: CancelHandle,
    mut open: F,
) -> Result<AutodetectResult>
where
    T: Transport,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut probes = Vec::new();

    for endpoint in candidates {
        let start = Instant::now();
        let (hb_seen, note) = match open(endpoint.clone()).await {
            Ok(link) => {
                let opts = ConnectOptions {
                    wait: HeartbeatWait::Bounded(heartbeat_timeout),
                    target_sys: None,
                    cancel: cancel.clone(),
                };
                match Session::establish(link, local, opts).await {
                    Ok(session) => {
                        let note = format!("heartbeat from {}", session.remote());
                        session.disconnect();
                        (true, note)
                    }
                    Err(FcError::Cancelled) => return Err(FcError::Cancelled),
                    Err(_) => (false, "no heartbeat".to_string()),
                }
            }
            Err(e) => {
                warn!("fc autodetect probe failed endpoint={} err={}", endpoint, e);
                (false, format!("open/connect failed: {}", e))
            }
        };

        probes.push(ProbeResult {
            endpoint: endpoint.clone(),
            hb_seen,
            elapsed_ms: start.elapsed().as_millis() as u64,
            note,
        });
        if hb_seen {
            info!("fc autodetect: OK {}", endpoint);
            return Ok(AutodetectResult {
                chosen: Some(endpoint.clone()),
                probes,
            });
        }
    }

    Ok(AutodetectResult { chosen: None, probes })
}

/// [`autodetect_with`] over real MAVLink connections.
pub async fn autodetect(
    candidates: &[String],
    heartbeat_timeout: Duration,
    local: Identity,
    cancel: CancelHandle,
    opts: TransportOptions,
) -> Result<AutodetectResult> {
    autodetect_with(candidates, heartbeat_timeout, local, cancel, move |ep| async move {
        MavlinkTransport::open(&ep, local, &opts).await
    })
    .await
}
