use std::time::Duration;

use gcs_proto::geo::{alt_to_mm, deg_to_e7};
use mavlink::common::{GpsFixType, MavCmd};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::command::AckPolicy;
use crate::msg::{GpsFix, HomePosition, Outbound};
use crate::session::Session;
use crate::transport::Transport;

/// Synthetic GPS fixes broadcast after a home change.
pub const GPS_FIX_COUNT: usize = 10;
pub const GPS_FIX_SPACING: Duration = Duration::from_millis(100);

const GPS_SATELLITES: u8 = 10;
// eph/epv "unknown"
const GPS_ACCURACY_UNKNOWN: u16 = u16::MAX;

impl<T: Transport> Session<T> {
    /// Move the vehicle's home to an explicit location.
    ///
    /// Returns true only if the vehicle accepted MAV_CMD_DO_SET_HOME. Whatever
    /// the outcome, a HOME_POSITION and [`GPS_FIX_COUNT`] GPS_RAW_INT messages
    /// carrying the requested location follow, so observers on the link
    /// (e.g. a planner) show the attempted value.
    ///
    /// Cancellation aborts the ack wait only. The broadcast is bounded
    /// (about one second) and always runs to completion.
    pub async fn set_home(&mut self, lat: f64, lon: f64, alt: f64, timeout: Duration) -> bool {
        info!("fc: setting home to {:.7}, {:.7}, {}m", lat, lon, alt);
        // param1 = 0: use the location given, not the current one
        let params = [0.0, 0.0, 0.0, 0.0, lat as f32, lon as f32, alt as f32];
        let accepted = match self
            .command_ack(MavCmd::MAV_CMD_DO_SET_HOME, params, AckPolicy::once(timeout))
            .await
        {
            Ok(_) => {
                info!("fc: home accepted");
                true
            }
            Err(e) => {
                warn!("fc: home not set: {}", e);
                false
            }
        };

        let (lat_e7, lon_e7, alt_mm) = (deg_to_e7(lat), deg_to_e7(lon), alt_to_mm(alt));

        let home = HomePosition {
            lat_e7,
            lon_e7,
            alt_mm,
            q: [1.0, 0.0, 0.0, 0.0],
        };
        if let Err(e) = self.send(Outbound::HomePosition(home)) {
            warn!("fc: HOME_POSITION broadcast failed: {}", e);
        }

        for i in 0..GPS_FIX_COUNT {
            let fix = GpsFix {
                time_usec: wall_clock_usec(),
                fix_type: GpsFixType::GPS_FIX_TYPE_3D_FIX,
                lat_e7,
                lon_e7,
                alt_mm,
                eph: GPS_ACCURACY_UNKNOWN,
                epv: GPS_ACCURACY_UNKNOWN,
                vel: 0,
                cog: 0,
                satellites_visible: GPS_SATELLITES,
            };
            if let Err(e) = self.send(Outbound::GpsFix(fix)) {
                warn!("fc: GPS_RAW_INT {} failed: {}", i, e);
            }
            tokio::time::sleep(GPS_FIX_SPACING).await;
        }
        debug!("fc: home broadcast done");

        accepted
    }
}

fn wall_clock_usec() -> u64 {
    let usec = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000;
    u64::try_from(usec).unwrap_or(0)
}
