use std::io::ErrorKind;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gcs_proto::geo::deg_to_e7;
use mavlink::{
    common::{
        MavAutopilot, MavCmd, MavMessage, MavMissionType, MavModeFlag, MavState, MavType, COMMAND_LONG_DATA,
        GPS_RAW_INT_DATA, HEARTBEAT_DATA, HOME_POSITION_DATA, MISSION_ACK_DATA, MISSION_CLEAR_ALL_DATA,
        MISSION_COUNT_DATA, MISSION_ITEM_INT_DATA, MISSION_REQUEST_INT_DATA, MISSION_REQUEST_LIST_DATA,
    },
    error::MessageReadError,
    MavConnection, MavHeader, Message,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::error::{FcError, Result};
use crate::mission::MissionItem;
use crate::msg::{CommandRequest, Heartbeat, Identity, Inbound, Outbound, Received};
use crate::session::{ConnectOptions, Session};
use crate::transport::{normalize_endpoint, serial_parts, Transport};

type Conn = Arc<dyn MavConnection<MavMessage> + Send + Sync>;

const INBOUND_QUEUE: usize = 256;
const MISSION: MavMissionType = MavMissionType::MAV_MISSION_TYPE_MISSION;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportOptions {
    /// Baud for bare device paths without `,baud`.
    pub default_baud: u32,
    /// GCS heartbeat rate; `None` or <= 0 disables it.
    pub send_heartbeat_hz: Option<f32>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            default_baud: 57600,
            send_heartbeat_hz: Some(1.0),
        }
    }
}

/// Local identity plus the shared frame sequence counter.
struct Framer {
    local: Identity,
    seq: AtomicU8,
}

impl Framer {
    fn header(&self) -> MavHeader {
        MavHeader {
            system_id: self.local.system_id,
            component_id: self.local.component_id,
            sequence: self.seq.fetch_add(1, Ordering::Relaxed),
        }
    }
}

/// [`Transport`] over a `mavlink` crate connection (serial, TCP or UDP).
///
/// The connection's `recv` blocks, so a `spawn_blocking` reader decodes
/// frames into a bounded channel; an optional task emits our heartbeat.
pub struct MavlinkTransport {
    endpoint: String,
    conn: Conn,
    framer: Arc<Framer>,
    rx: mpsc::Receiver<Received>,
    heartbeat: Option<JoinHandle<()>>,
}

impl MavlinkTransport {
    /// Open `endpoint` (any form [`normalize_endpoint`] accepts). Must be
    /// called from within a tokio runtime.
    pub async fn open(endpoint: &str, local: Identity, opts: &TransportOptions) -> Result<Self> {
        let url = normalize_endpoint(endpoint, opts.default_baud)?;

        if let Some((dev, baud)) = serial_parts(&url) {
            // quick validate device
            let _ = tokio_serial::new(dev, baud)
                .open_native_async()
                .map_err(|e| FcError::transport(format!("open serial device {}", dev), e))?;
        }

        let target = url.clone();
        let conn = tokio::task::spawn_blocking(move || mavlink::connect::<MavMessage>(&target))
            .await
            .map_err(|e| FcError::transport(format!("mavlink connect {}", url), e))?
            .map_err(|e| FcError::transport(format!("mavlink connect {}", url), e))?;
        let conn: Conn = Arc::from(conn);
        info!("fc: opened {} as {}", url, local);

        let framer = Arc::new(Framer {
            local,
            seq: AtomicU8::new(0),
        });

        let (tx, rx) = mpsc::channel(INBOUND_QUEUE);
        {
            let conn = conn.clone();
            let url = url.clone();
            tokio::task::spawn_blocking(move || read_loop(|| conn.recv(), tx, &url));
        }

        let heartbeat = match opts.send_heartbeat_hz {
            Some(hz) if hz > 0.0 => {
                let period = Duration::from_secs_f32(1.0 / hz);
                Some(tokio::spawn(heartbeat_loop(conn.clone(), framer.clone(), period)))
            }
            _ => None,
        };

        Ok(Self {
            endpoint: url,
            conn,
            framer,
            rx,
            heartbeat,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Session<MavlinkTransport> {
    /// Open `endpoint` and wait for the vehicle's first heartbeat.
    pub async fn connect(
        endpoint: &str,
        local: Identity,
        transport: &TransportOptions,
        opts: ConnectOptions,
    ) -> Result<Self> {
        let link = MavlinkTransport::open(endpoint, local, transport).await?;
        Session::establish(link, local, opts).await
    }
}

impl Transport for MavlinkTransport {
    fn send(&mut self, msg: &Outbound) -> Result<()> {
        let frame = encode(msg);
        self.conn
            .send(&self.framer.header(), &frame)
            .map_err(|e| FcError::transport(format!("mavlink send to {}", self.endpoint), e))?;
        Ok(())
    }

    async fn recv(&mut self, timeout: Duration) -> Result<Option<Received>> {
        if timeout.is_zero() {
            return match self.rx.try_recv() {
                Ok(m) => Ok(Some(m)),
                Err(mpsc::error::TryRecvError::Empty) => Ok(None),
                Err(mpsc::error::TryRecvError::Disconnected) => Err(FcError::LinkClosed),
            };
        }
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(m)) => Ok(Some(m)),
            Ok(None) => Err(FcError::LinkClosed),
            Err(_) => Ok(None),
        }
    }

    fn close(&mut self) {
        if let Some(h) = self.heartbeat.take() {
            h.abort();
        }
        // the blocking reader exits on its next frame or read error once `rx`
        // is closed; a UDP socket with no traffic at all keeps it parked in
        // recv until the runtime shuts down
        self.rx.close();
        debug!("fc: closed {}", self.endpoint);
    }
}

impl Drop for MavlinkTransport {
    fn drop(&mut self) {
        if let Some(h) = self.heartbeat.take() {
            h.abort();
        }
    }
}

/// Pump frames from `next` into `tx` until the receiving side is closed or
/// the link fails. Closure is checked after every frame and every read error.
fn read_loop(
    mut next: impl FnMut() -> std::result::Result<(MavHeader, MavMessage), MessageReadError>,
    tx: mpsc::Sender<Received>,
    url: &str,
) {
    while !tx.is_closed() {
        match next() {
            Ok((hdr, msg)) => {
                if tx.blocking_send(decode(&hdr, msg)).is_err() {
                    break;
                }
            }
            Err(MessageReadError::Io(e)) => match e.kind() {
                ErrorKind::WouldBlock | ErrorKind::TimedOut => std::thread::sleep(Duration::from_millis(5)),
                ErrorKind::Interrupted => {}
                _ => {
                    warn!("fc: read from {} failed: {}", url, e);
                    break;
                }
            },
            // corrupt or unknown frame
            Err(MessageReadError::Parse(_)) => {}
        }
    }
    debug!("fc: reader for {} stopped", url);
}

async fn heartbeat_loop(conn: Conn, framer: Arc<Framer>, period: Duration) {
    let mut tick = tokio::time::interval(period);
    loop {
        tick.tick().await;
        if let Err(e) = conn.send(&framer.header(), &encode(&Outbound::Heartbeat)) {
            warn!("fc: heartbeat send failed: {}", e);
        }
    }
}

/// Strip the NUL padding of a STATUSTEXT.
fn text_from_bytes(raw: &[u8]) -> String {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

pub(crate) fn decode(hdr: &MavHeader, msg: MavMessage) -> Received {
    let source = Identity::new(hdr.system_id, hdr.component_id);
    let msg = match msg {
        MavMessage::HEARTBEAT(h) => Inbound::Heartbeat(Heartbeat {
            vehicle_type: h.mavtype,
            autopilot: h.autopilot,
            base_mode: h.base_mode,
            custom_mode: h.custom_mode,
        }),
        MavMessage::COMMAND_ACK(a) => Inbound::CommandAck {
            command: a.command,
            result: a.result,
        },
        MavMessage::MISSION_COUNT(c) => Inbound::MissionCount {
            count: c.count,
            mission_type: c.mission_type,
        },
        MavMessage::MISSION_REQUEST_INT(r) => Inbound::MissionRequest {
            seq: r.seq,
            mission_type: r.mission_type,
        },
        MavMessage::MISSION_REQUEST(r) => Inbound::MissionRequest {
            seq: r.seq,
            mission_type: r.mission_type,
        },
        MavMessage::MISSION_ITEM_INT(i) => Inbound::MissionItem {
            item: MissionItem {
                seq: i.seq,
                frame: i.frame,
                command: i.command,
                current: i.current != 0,
                autocontinue: i.autocontinue != 0,
                params: [i.param1, i.param2, i.param3, i.param4],
                x: i.x,
                y: i.y,
                z: i.z,
            },
            mission_type: i.mission_type,
        },
        MavMessage::MISSION_ITEM(i) => Inbound::MissionItem {
            item: MissionItem {
                seq: i.seq,
                frame: i.frame,
                command: i.command,
                current: i.current != 0,
                autocontinue: i.autocontinue != 0,
                params: [i.param1, i.param2, i.param3, i.param4],
                x: deg_to_e7(i.x as f64),
                y: deg_to_e7(i.y as f64),
                z: i.z,
            },
            mission_type: i.mission_type,
        },
        MavMessage::MISSION_ACK(a) => Inbound::MissionAck {
            result: a.mavtype,
            mission_type: a.mission_type,
        },
        MavMessage::STATUSTEXT(s) => Inbound::StatusText {
            severity: s.severity,
            text: text_from_bytes(&s.text[..]),
        },
        other => Inbound::Other { id: other.message_id() },
    };
    Received { source, msg }
}

fn command_long(c: &CommandRequest) -> MavMessage {
    MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
        target_system: c.target.system_id,
        target_component: c.target.component_id,
        command: c.command,
        confirmation: c.confirmation,
        param1: c.params[0],
        param2: c.params[1],
        param3: c.params[2],
        param4: c.params[3],
        param5: c.params[4],
        param6: c.params[5],
        param7: c.params[6],
    })
}

pub(crate) fn encode(msg: &Outbound) -> MavMessage {
    match msg {
        Outbound::Heartbeat => MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_GCS,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::empty(),
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        }),
        Outbound::Command(c) => command_long(c),
        Outbound::SetMode { target, custom_mode } => command_long(&CommandRequest {
            target: *target,
            command: MavCmd::MAV_CMD_DO_SET_MODE,
            confirmation: 0,
            params: [
                MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32,
                *custom_mode as f32,
                0.0,
                0.0,
                0.0,
                0.0,
                0.0,
            ],
        }),
        Outbound::MissionClearAll { target } => MavMessage::MISSION_CLEAR_ALL(MISSION_CLEAR_ALL_DATA {
            target_system: target.system_id,
            target_component: target.component_id,
            mission_type: MISSION,
            ..Default::default()
        }),
        Outbound::MissionCount { target, count } => MavMessage::MISSION_COUNT(MISSION_COUNT_DATA {
            target_system: target.system_id,
            target_component: target.component_id,
            count: *count,
            mission_type: MISSION,
            ..Default::default()
        }),
        Outbound::MissionItem { target, item } => MavMessage::MISSION_ITEM_INT(MISSION_ITEM_INT_DATA {
            param1: item.params[0],
            param2: item.params[1],
            param3: item.params[2],
            param4: item.params[3],
            x: item.x,
            y: item.y,
            z: item.z,
            seq: item.seq,
            command: item.command,
            target_system: target.system_id,
            target_component: target.component_id,
            frame: item.frame,
            current: item.current as u8,
            autocontinue: item.autocontinue as u8,
            mission_type: MISSION,
            ..Default::default()
        }),
        Outbound::MissionRequestList { target } => MavMessage::MISSION_REQUEST_LIST(MISSION_REQUEST_LIST_DATA {
            target_system: target.system_id,
            target_component: target.component_id,
            mission_type: MISSION,
            ..Default::default()
        }),
        Outbound::MissionRequestInt { target, seq } => MavMessage::MISSION_REQUEST_INT(MISSION_REQUEST_INT_DATA {
            target_system: target.system_id,
            target_component: target.component_id,
            seq: *seq,
            mission_type: MISSION,
            ..Default::default()
        }),
        Outbound::MissionAck { target, result } => MavMessage::MISSION_ACK(MISSION_ACK_DATA {
            target_system: target.system_id,
            target_component: target.component_id,
            mavtype: *result,
            mission_type: MISSION,
            ..Default::default()
        }),
        Outbound::HomePosition(h) => MavMessage::HOME_POSITION(HOME_POSITION_DATA {
            latitude: h.lat_e7,
            longitude: h.lon_e7,
            altitude: h.alt_mm,
            q: h.q,
            ..Default::default()
        }),
        Outbound::GpsFix(f) => MavMessage::GPS_RAW_INT(GPS_RAW_INT_DATA {
            time_usec: f.time_usec,
            fix_type: f.fix_type,
            lat: f.lat_e7,
            lon: f.lon_e7,
            alt: f.alt_mm,
            eph: f.eph,
            epv: f.epv,
            vel: f.vel,
            cog: f.cog,
            satellites_visible: f.satellites_visible,
            ..Default::default()
        }),
    }
}
