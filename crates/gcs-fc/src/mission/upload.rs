use std::time::Duration;

use mavlink::common::{MavMissionResult, MavMissionType};
use tracing::{debug, info, info_span, warn, Instrument};

use super::MissionList;
use crate::error::{FcError, Result};
use crate::msg::{Inbound, Outbound};
use crate::session::{ExchangeToken, Session};
use crate::transport::Transport;

// Upper bound on waiting for the MISSION_ACK some autopilots send for CLEAR_ALL.
const CLEAR_ACK_WAIT: Duration = Duration::from_secs(1);

/// Timeouts and retry budget shared by upload and download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    /// Wait for each protocol message (request, item, count, ack).
    pub item_timeout: Duration,
    /// Consecutive timeouts tolerated before giving up.
    pub max_retries: u8,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            item_timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Idle,
    CountSent,
    AwaitingRequest,
    ItemSent,
    Done,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UploadReport {
    pub token: ExchangeToken,
    pub total: usize,
    /// Distinct items delivered.
    pub sent: usize,
    /// MISSION_ACK result, if the vehicle sent one. Diagnostic only.
    pub final_ack: Option<MavMissionResult>,
}

enum UploadEvent {
    Request(u16),
    Ack(MavMissionResult),
}

struct Phase(UploadPhase);

impl Phase {
    fn go(&mut self, next: UploadPhase) {
        if self.0 != next {
            debug!("fc: upload {:?} -> {:?}", self.0, next);
            self.0 = next;
        }
    }
}

impl<T: Transport> Session<T> {
    /// Replace the vehicle's mission with `mission`.
    ///
    /// Items are only ever sent in answer to a request, so pacing is up to the
    /// vehicle. A MISSION_ACK ends the transfer whatever its result.
    pub async fn upload_mission(&mut self, mission: &MissionList, cfg: TransferConfig) -> Result<UploadReport> {
        let token = self.begin_exchange().await?;
        let span = info_span!("upload", token = token.0, items = mission.len());
        self.exchange_upload(token, mission, cfg).instrument(span).await
    }

    /// Build the standard waypoint mission and upload it.
    pub async fn upload_waypoints(
        &mut self,
        coords: &[(f64, f64)],
        alt_m: f32,
        cfg: TransferConfig,
    ) -> Result<UploadReport> {
        if coords.is_empty() {
            return Err(FcError::InvalidMission("no waypoints".into()));
        }
        let mission = MissionList::waypoints(coords, alt_m)?;
        for (i, (lat, lon)) in coords.iter().enumerate() {
            debug!("fc: waypoint {}: {:.7}, {:.7} @ {}m", i + 1, lat, lon, alt_m);
        }
        self.upload_mission(&mission, cfg).await
    }

    async fn exchange_upload(
        &mut self,
        token: ExchangeToken,
        mission: &MissionList,
        cfg: TransferConfig,
    ) -> Result<UploadReport> {
        let total = mission.len();
        let target = self.remote();
        let mut phase = Phase(UploadPhase::Idle);

        self.send(Outbound::MissionClearAll { target })?;
        let clear_ack = self
            .wait_for(CLEAR_ACK_WAIT.min(cfg.item_timeout), |m| match m {
                Inbound::MissionAck { result, mission_type } if is_mission(*mission_type) => Some(*result),
                _ => None,
            })
            .await?;
        if let Some(r) = clear_ack {
            debug!("fc: clear acknowledged: {:?}", r);
        }

        self.send(Outbound::MissionCount { target, count: total as u16 })?;
        phase.go(UploadPhase::CountSent);
        info!("fc: announced {} mission item(s)", total);

        let mut delivered = vec![false; total];
        let mut sent = 0usize;
        let mut silences = 0u8;

        loop {
            phase.go(UploadPhase::AwaitingRequest);
            let event = self
                .wait_for(cfg.item_timeout, |m| match m {
                    Inbound::MissionRequest { seq, mission_type } if is_mission(*mission_type) => {
                        Some(UploadEvent::Request(*seq))
                    }
                    Inbound::MissionAck { result, mission_type } if is_mission(*mission_type) => {
                        Some(UploadEvent::Ack(*result))
                    }
                    _ => None,
                })
                .await?;

            match event {
                None => {
                    silences += 1;
                    if silences <= cfg.max_retries {
                        warn!("fc: no mission request ({}/{}), waiting again", silences, cfg.max_retries);
                        continue;
                    }
                    if sent < total {
                        phase.go(UploadPhase::Aborted);
                        warn!("fc: upload stalled after {}/{} items", sent, total);
                        return Err(FcError::MissionTimeout {
                            stage: "awaiting request",
                            done: sent,
                            total,
                        });
                    }
                    phase.go(UploadPhase::Done);
                    warn!("fc: all {} items delivered but no MISSION_ACK", total);
                    return Ok(UploadReport { token, total, sent, final_ack: None });
                }
                Some(UploadEvent::Request(seq)) => {
                    // a malformed request is not progress and keeps the silence count
                    let Some(item) = mission.items().get(seq as usize) else {
                        warn!("fc: {}", FcError::MissionMalformedRequest { seq, total });
                        continue;
                    };
                    silences = 0;
                    self.send(Outbound::MissionItem { target, item: *item })?;
                    phase.go(UploadPhase::ItemSent);
                    if !delivered[seq as usize] {
                        delivered[seq as usize] = true;
                        sent += 1;
                        debug!("fc: sent item {} ({}/{})", seq, sent, total);
                    } else {
                        debug!("fc: re-sent item {}", seq);
                    }
                }
                Some(UploadEvent::Ack(result)) => {
                    phase.go(UploadPhase::Done);
                    if result == MavMissionResult::MAV_MISSION_ACCEPTED {
                        info!("fc: mission upload accepted ({}/{} items)", sent, total);
                    } else {
                        warn!("fc: mission upload ended with {:?} ({}/{} items)", result, sent, total);
                    }
                    return Ok(UploadReport {
                        token,
                        total,
                        sent,
                        final_ack: Some(result),
                    });
                }
            }
        }
    }
}

pub(super) fn is_mission(t: MavMissionType) -> bool {
    t == MavMissionType::MAV_MISSION_TYPE_MISSION
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::MissionItem;
    use crate::testing::{reply, session_with, ScriptedLink, Step};

    const MISSION: MavMissionType = MavMissionType::MAV_MISSION_TYPE_MISSION;

    fn cfg() -> TransferConfig {
        TransferConfig {
            item_timeout: Duration::from_secs(2),
            max_retries: 2,
        }
    }

    fn three() -> MissionList {
        MissionList::waypoints(&[(61.0, 34.0), (61.1, 34.1), (61.2, 34.2)], 15.0).unwrap()
    }

    fn request(seq: u16) -> Step {
        reply(Inbound::MissionRequest { seq, mission_type: MISSION })
    }

    fn ack(result: MavMissionResult) -> Step {
        reply(Inbound::MissionAck { result, mission_type: MISSION })
    }

    fn items_sent(s: &Session<ScriptedLink>) -> Vec<MissionItem> {
        s.transport()
            .sent
            .iter()
            .filter_map(|m| match m {
                Outbound::MissionItem { item, .. } => Some(*item),
                _ => None,
            })
            .collect()
    }

    fn counts_sent(s: &Session<ScriptedLink>) -> Vec<u16> {
        s.transport()
            .sent
            .iter()
            .filter_map(|m| match m {
                Outbound::MissionCount { count, .. } => Some(*count),
                _ => None,
            })
            .collect()
    }

    /// Vehicle that requests every item in order and acks after the last.
    fn well_behaved(total: u16) -> impl FnMut(&Outbound) -> Vec<Step> + Send {
        move |m| match m {
            Outbound::MissionCount { count: 0, .. } => vec![ack(MavMissionResult::MAV_MISSION_ACCEPTED)],
            Outbound::MissionCount { .. } => vec![request(0)],
            Outbound::MissionItem { item, .. } if item.seq + 1 < total => vec![request(item.seq + 1)],
            Outbound::MissionItem { .. } => vec![ack(MavMissionResult::MAV_MISSION_ACCEPTED)],
            _ => vec![],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn clear_then_count_then_items_on_request() {
        let mission = three();
        let mut s = session_with(well_behaved(3)).await;
        let report = s.upload_mission(&mission, cfg()).await.unwrap();

        assert_eq!(
            report,
            UploadReport {
                token: report.token,
                total: 3,
                sent: 3,
                final_ack: Some(MavMissionResult::MAV_MISSION_ACCEPTED),
            }
        );
        assert!(matches!(s.transport().sent[0], Outbound::MissionClearAll { .. }));
        assert_eq!(counts_sent(&s), vec![3]);
        assert_eq!(items_sent(&s), mission.items().to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_ack_does_not_end_upload() {
        let mission = three();
        let mut inner = well_behaved(3);
        let mut s = session_with(move |m| match m {
            Outbound::MissionClearAll { .. } => vec![ack(MavMissionResult::MAV_MISSION_ACCEPTED)],
            other => inner(other),
        })
        .await;
        let report = s.upload_mission(&mission, cfg()).await.unwrap();
        assert_eq!(report.sent, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_mission_announces_zero() {
        let mut s = session_with(well_behaved(0)).await;
        let report = s.upload_mission(&MissionList::default(), cfg()).await.unwrap();
        assert_eq!(counts_sent(&s), vec![0]);
        assert_eq!(report.sent, 0);
        assert!(items_sent(&s).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_requests_resend_identical_item() {
        let mission = three();
        let mut s = session_with(|m| match m {
            Outbound::MissionCount { .. } => vec![request(0), request(1), request(1), request(0), request(2)],
            Outbound::MissionItem { item, .. } if item.seq == 2 => {
                vec![ack(MavMissionResult::MAV_MISSION_ACCEPTED)]
            }
            _ => vec![],
        })
        .await;
        let report = s.upload_mission(&mission, cfg()).await.unwrap();

        assert_eq!(report.sent, 3);
        let sent = items_sent(&s);
        assert_eq!(sent.len(), 5);
        assert_eq!(sent[1], sent[2]);
        assert_eq!(sent[0], sent[3]);
        assert_eq!(sent[1], mission.items()[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_requests_are_ignored() {
        let mission = three();
        let mut s = session_with(|m| match m {
            Outbound::MissionCount { .. } => vec![request(3), request(60000), request(0)],
            Outbound::MissionItem { item, .. } if item.seq < 2 => vec![request(item.seq + 1)],
            Outbound::MissionItem { .. } => vec![ack(MavMissionResult::MAV_MISSION_ACCEPTED)],
            _ => vec![],
        })
        .await;
        let report = s.upload_mission(&mission, cfg()).await.unwrap();
        assert_eq!(report.sent, 3);
        assert_eq!(items_sent(&s).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_requests_do_not_extend_the_retry_budget() {
        let mission = three();
        let mut s = session_with(|m| match m {
            Outbound::MissionCount { .. } => {
                let mut steps = Vec::new();
                for _ in 0..10 {
                    steps.push(Step::Silence);
                    steps.push(request(9));
                }
                steps
            }
            _ => vec![],
        })
        .await;

        let start = tokio::time::Instant::now();
        let err = s.upload_mission(&mission, cfg()).await.unwrap_err();
        assert!(matches!(
            err,
            FcError::MissionTimeout { stage: "awaiting request", done: 0, total: 3 }
        ));
        assert!(items_sent(&s).is_empty());
        // clear-ack grace plus max_retries + 1 silent waits, nothing more
        assert!(start.elapsed() < Duration::from_secs(1) + cfg().item_timeout * 4);
        assert!(!s.transport().is_drained());
    }

    #[tokio::test(start_paused = true)]
    async fn early_ack_ends_transfer() {
        let mission = three();
        let mut s = session_with(|m| match m {
            Outbound::MissionCount { .. } => vec![request(0)],
            Outbound::MissionItem { .. } => vec![ack(MavMissionResult::MAV_MISSION_NO_SPACE)],
            _ => vec![],
        })
        .await;
        let report = s.upload_mission(&mission, cfg()).await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(report.final_ack, Some(MavMissionResult::MAV_MISSION_NO_SPACE));
    }

    #[tokio::test(start_paused = true)]
    async fn silence_aborts_after_retry_budget() {
        let mission = three();
        let mut s = session_with(|m| match m {
            Outbound::MissionCount { .. } => vec![request(0)],
            _ => vec![],
        })
        .await;
        let err = s.upload_mission(&mission, cfg()).await.unwrap_err();
        assert!(matches!(
            err,
            FcError::MissionTimeout { stage: "awaiting request", done: 1, total: 3 }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_final_ack_after_full_delivery_is_success() {
        let mission = three();
        let mut s = session_with(|m| match m {
            Outbound::MissionCount { .. } => vec![request(0)],
            Outbound::MissionItem { item, .. } if item.seq < 2 => vec![request(item.seq + 1)],
            _ => vec![],
        })
        .await;
        let report = s.upload_mission(&mission, cfg()).await.unwrap();
        assert_eq!(report.sent, 3);
        assert_eq!(report.final_ack, None);
    }

    #[tokio::test(start_paused = true)]
    async fn other_mission_types_are_ignored() {
        let mission = three();
        let mut inner = well_behaved(3);
        let mut s = session_with(move |m| match m {
            Outbound::MissionCount { .. } => vec![
                reply(Inbound::MissionRequest { seq: 2, mission_type: MavMissionType::MAV_MISSION_TYPE_FENCE }),
                reply(Inbound::MissionAck {
                    result: MavMissionResult::MAV_MISSION_ACCEPTED,
                    mission_type: MavMissionType::MAV_MISSION_TYPE_RALLY,
                }),
                request(0),
            ],
            other => inner(other),
        })
        .await;
        let report = s.upload_mission(&mission, cfg()).await.unwrap();
        assert_eq!(items_sent(&s), mission.items().to_vec());
        assert_eq!(report.sent, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_waypoint_list_is_refused() {
        let mut s = session_with(|_| vec![]).await;
        let err = s.upload_waypoints(&[], 10.0, cfg()).await.unwrap_err();
        assert!(matches!(err, FcError::InvalidMission(_)));
        assert!(s.transport().sent.is_empty());
    }
}
