use mavlink::common::MavMissionResult;
use tracing::{info, info_span, warn, Instrument};

use super::upload::is_mission;
use super::{MissionItem, TransferConfig};
use crate::error::{FcError, Result};
use crate::msg::{Inbound, Outbound};
use crate::session::Session;
use crate::transport::Transport;

impl<T: Transport> Session<T> {
    /// Read the vehicle's mission.
    ///
    /// Every request is retried up to `cfg.max_retries` times. A missing count
    /// is [`FcError::MissionTimeout`]; a missing item is
    /// [`FcError::MissionIncomplete`] carrying what arrived, so an empty `Ok`
    /// always means an empty mission.
    pub async fn download_mission(&mut self, cfg: TransferConfig) -> Result<Vec<MissionItem>> {
        let token = self.begin_exchange().await?;
        let span = info_span!("download", token = token.0);
        self.exchange_download(cfg).instrument(span).await
    }

    async fn exchange_download(&mut self, cfg: TransferConfig) -> Result<Vec<MissionItem>> {
        let target = self.remote();
        let attempts = cfg.max_retries as u32 + 1;

        let mut count = None;
        for attempt in 1..=attempts {
            self.send(Outbound::MissionRequestList { target })?;
            count = self
                .wait_for(cfg.item_timeout, |m| match m {
                    Inbound::MissionCount { count, mission_type } if is_mission(*mission_type) => Some(*count),
                    _ => None,
                })
                .await?;
            if count.is_some() {
                break;
            }
            warn!("fc: no MISSION_COUNT (attempt {}/{})", attempt, attempts);
        }
        let Some(count) = count else {
            return Err(FcError::MissionTimeout {
                stage: "awaiting count",
                done: 0,
                total: 0,
            });
        };
        info!("fc: vehicle reports {} mission item(s)", count);

        let mut items = Vec::with_capacity(count as usize);
        for seq in 0..count {
            let mut got = None;
            for attempt in 1..=attempts {
                self.send(Outbound::MissionRequestInt { target, seq })?;
                got = self
                    .wait_for(cfg.item_timeout, |m| match m {
                        Inbound::MissionItem { item, mission_type } if is_mission(*mission_type) && item.seq == seq => {
                            Some(*item)
                        }
                        _ => None,
                    })
                    .await?;
                if got.is_some() {
                    break;
                }
                warn!("fc: no item {} (attempt {}/{})", seq, attempt, attempts);
            }

            match got {
                Some(item) => items.push(item),
                None => {
                    warn!("fc: giving up on item {}; {} of {} received", seq, items.len(), count);
                    self.send(Outbound::MissionAck {
                        target,
                        result: MavMissionResult::MAV_MISSION_OPERATION_CANCELLED,
                    })?;
                    return Err(FcError::MissionIncomplete {
                        expected: count as usize,
                        received: items,
                    });
                }
            }
        }

        self.send(Outbound::MissionAck {
            target,
            result: MavMissionResult::MAV_MISSION_ACCEPTED,
        })?;
        info!("fc: downloaded {} mission item(s)", items.len());
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mavlink::common::MavMissionType;

    use super::*;
    use crate::mission::MissionList;
    use crate::testing::{reply, session_with, ScriptedLink, Step};

    const MISSION: MavMissionType = MavMissionType::MAV_MISSION_TYPE_MISSION;

    fn cfg() -> TransferConfig {
        TransferConfig {
            item_timeout: Duration::from_secs(2),
            max_retries: 2,
        }
    }

    fn stored() -> Vec<MissionItem> {
        MissionList::waypoints(&[(61.0, 34.0), (61.1, 34.1), (61.2, 34.2)], 30.0)
            .unwrap()
            .items()
            .to_vec()
    }

    fn count(n: u16) -> Step {
        reply(Inbound::MissionCount { count: n, mission_type: MISSION })
    }

    fn item(i: MissionItem) -> Step {
        reply(Inbound::MissionItem { item: i, mission_type: MISSION })
    }

    fn item_requests(s: &Session<ScriptedLink>) -> usize {
        s.transport().count(|m| matches!(m, Outbound::MissionRequestInt { .. }))
    }

    fn final_acks(s: &Session<ScriptedLink>) -> Vec<MavMissionResult> {
        s.transport()
            .sent
            .iter()
            .filter_map(|m| match m {
                Outbound::MissionAck { result, .. } => Some(*result),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn reads_every_item_and_acks() {
        let items = stored();
        let served = items.clone();
        let mut s = session_with(move |m| match m {
            Outbound::MissionRequestList { .. } => vec![count(served.len() as u16)],
            Outbound::MissionRequestInt { seq, .. } => vec![item(served[*seq as usize])],
            _ => vec![],
        })
        .await;

        let got = s.download_mission(cfg()).await.unwrap();
        assert_eq!(got, items);
        assert_eq!(item_requests(&s), 3);
        assert_eq!(final_acks(&s), vec![MavMissionResult::MAV_MISSION_ACCEPTED]);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_mission_needs_no_item_requests() {
        let mut s = session_with(|m| match m {
            Outbound::MissionRequestList { .. } => vec![count(0)],
            _ => vec![],
        })
        .await;
        let got = s.download_mission(cfg()).await.unwrap();
        assert!(got.is_empty());
        assert_eq!(item_requests(&s), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_count_is_a_timeout_not_an_empty_mission() {
        let mut s = session_with(|_| vec![Step::Silence]).await;
        let err = s.download_mission(cfg()).await.unwrap_err();
        assert!(matches!(err, FcError::MissionTimeout { stage: "awaiting count", .. }));
        assert_eq!(s.transport().count(|m| matches!(m, Outbound::MissionRequestList { .. })), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_item_is_recovered_by_retry() {
        let items = stored();
        let served = items.clone();
        let mut dropped = false;
        let mut s = session_with(move |m| match m {
            Outbound::MissionRequestList { .. } => vec![count(3)],
            Outbound::MissionRequestInt { seq: 1, .. } if !dropped => {
                dropped = true;
                vec![Step::Silence]
            }
            Outbound::MissionRequestInt { seq, .. } => vec![item(served[*seq as usize])],
            _ => vec![],
        })
        .await;

        let got = s.download_mission(cfg()).await.unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(got, items);
        assert_eq!(item_requests(&s), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn item_lost_for_good_is_reported_as_incomplete() {
        let served = stored();
        let mut s = session_with(move |m| match m {
            Outbound::MissionRequestList { .. } => vec![count(3)],
            Outbound::MissionRequestInt { seq: 1, .. } => vec![Step::Silence],
            Outbound::MissionRequestInt { seq, .. } => vec![item(served[*seq as usize])],
            _ => vec![],
        })
        .await;

        match s.download_mission(cfg()).await {
            Err(FcError::MissionIncomplete { expected, received }) => {
                assert_eq!(expected, 3);
                assert_eq!(received.len(), 1);
                assert_eq!(received[0].seq, 0);
            }
            other => panic!("expected MissionIncomplete, got {:?}", other),
        }
        assert_eq!(final_acks(&s), vec![MavMissionResult::MAV_MISSION_OPERATION_CANCELLED]);
    }

    #[tokio::test(start_paused = true)]
    async fn item_with_wrong_seq_is_not_accepted() {
        let served = stored();
        let mut s = session_with(move |m| match m {
            Outbound::MissionRequestList { .. } => vec![count(2)],
            // always answers with item 0
            Outbound::MissionRequestInt { .. } => vec![item(served[0])],
            _ => vec![],
        })
        .await;
        let err = s.download_mission(cfg()).await.unwrap_err();
        assert!(matches!(err, FcError::MissionIncomplete { expected: 2, .. }));
    }
}
