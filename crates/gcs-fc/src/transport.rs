use std::future::Future;
use std::time::Duration;

use crate::error::{FcError, Result};
use crate::msg::{Outbound, Received};

/// Typed link to the vehicle.
///
/// `recv` returns `Ok(None)` when nothing arrived within `timeout`; a zero
/// timeout only returns what is already queued.
pub trait Transport: Send {
    fn send(&mut self, msg: &Outbound) -> Result<()>;

    fn recv(&mut self, timeout: Duration) -> impl Future<Output = Result<Option<Received>>> + Send;

    /// Release the link. No wire-level teardown.
    fn close(&mut self) {}
}

const URL_PREFIXES: &[&str] = &["tcpout:", "tcpin:", "udpin:", "udpout:", "udpbcast:", "serial:", "file:"];

/// Turn a user-supplied endpoint into a `mavlink::connect` address.
///
/// Accepts the mavlink crate forms as-is plus the pymavlink shorthands:
/// `tcp:host:port`, `udp:host:port`, `/dev/ttyUSB0` and `/dev/ttyUSB0,57600`.
pub fn normalize_endpoint(raw: &str, default_baud: u32) -> Result<String> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(FcError::endpoint(raw, "empty"));
    }

    if URL_PREFIXES.iter().any(|p| s.starts_with(p)) {
        if s.starts_with("serial:") && serial_parts(s).is_none() {
            return Err(FcError::endpoint(raw, "expected serial:<device>:<baud>"));
        }
        return Ok(s.to_string());
    }
    if let Some(rest) = s.strip_prefix("tcp:") {
        return Ok(format!("tcpout:{}", rest));
    }
    if let Some(rest) = s.strip_prefix("udp:") {
        return Ok(format!("udpin:{}", rest));
    }
    if s.starts_with('/') || s.starts_with("COM") {
        return match s.split_once(',') {
            Some((dev, baud)) => {
                let baud: u32 = baud
                    .trim()
                    .parse()
                    .map_err(|_| FcError::endpoint(raw, "baud is not a number"))?;
                Ok(format!("serial:{}:{}", dev, baud))
            }
            None => Ok(format!("serial:{}:{}", s, default_baud)),
        };
    }

    Err(FcError::endpoint(raw, "unknown scheme"))
}

/// `serial:<device>:<baud>` -> (device, baud)
pub fn serial_parts(url: &str) -> Option<(&str, u32)> {
    let rest = url.strip_prefix("serial:")?;
    let (dev, baud) = rest.rsplit_once(':')?;
    if dev.is_empty() {
        return None;
    }
    Some((dev, baud.parse().ok()?))
}
