use mavlink::common::{MavCmd, MavResult};
use thiserror::Error;

use crate::mission::MissionItem;

pub type Result<T, E = FcError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum FcError {
    #[error("no vehicle heartbeat within {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },

    #[error("no COMMAND_ACK for {command:?} after {attempts} attempt(s)")]
    AckTimeout { command: MavCmd, attempts: u8 },

    #[error("{command:?} rejected: {result:?} (code {code})")]
    AckRejected {
        command: MavCmd,
        result: MavResult,
        code: u8,
    },

    #[error("mode {name} not offered by this vehicle")]
    UnknownMode { name: String },

    #[error("no heartbeat within {timeout_ms}ms after mode request")]
    ModeTimeout { timeout_ms: u64 },

    #[error("vehicle did not report mode {requested} (last reported {reported:?})")]
    ModeNotConfirmed { requested: u32, reported: Option<u32> },

    #[error("mission transfer timed out {stage} ({done}/{total})")]
    MissionTimeout {
        stage: &'static str,
        done: usize,
        total: usize,
    },

    /// Logged and skipped by the uploader, never returned.
    #[error("mission request for seq {seq} outside 0..{total}")]
    MissionMalformedRequest { seq: u16, total: usize },

    #[error("mission download incomplete: {} of {expected} items", .received.len())]
    MissionIncomplete {
        expected: usize,
        received: Vec<MissionItem>,
    },

    #[error("invalid mission: {0}")]
    InvalidMission(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("bad endpoint {endpoint:?}: {reason}")]
    Endpoint { endpoint: String, reason: String },

    #[error("{context}")]
    Transport {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("link closed")]
    LinkClosed,
}

impl FcError {
    pub(crate) fn transport(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        FcError::Transport {
            context: context.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn endpoint(endpoint: &str, reason: impl Into<String>) -> Self {
        FcError::Endpoint {
            endpoint: endpoint.to_string(),
            reason: reason.into(),
        }
    }
}
