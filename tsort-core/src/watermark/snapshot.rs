//! Checkpoint encoding of the watermark state. The blob is opaque to the caller, who stores it
//! wherever it wants and hands it back on recovery. The wire format is protobuf.

use bytes::Bytes;
use chrono::DateTime;
use prost::Message as ProtoMessage;

use crate::error::Error;
use crate::policy::PolicyState;
use crate::watermark::{Timestamp, WatermarkState};

/// Bumped whenever the layout of [CheckpointProto] changes incompatibly.
const CHECKPOINT_VERSION: u32 = 1;

const POLICY_KIND_STATELESS: u32 = 0;
const POLICY_KIND_EXPONENTIAL: u32 = 1;
const POLICY_KIND_WINDOW: u32 = 2;

#[derive(Clone, PartialEq, ::prost::Message)]
struct CheckpointProto {
    #[prost(uint32, tag = "1")]
    version: u32,
    #[prost(int64, optional, tag = "2")]
    hwm_micros: Option<i64>,
    #[prost(int64, optional, tag = "3")]
    last_event_time_micros: Option<i64>,
    #[prost(message, optional, tag = "4")]
    policy: Option<PolicyStateProto>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct PolicyStateProto {
    #[prost(uint32, tag = "1")]
    kind: u32,
    #[prost(double, optional, tag = "2")]
    average_micros: Option<f64>,
    #[prost(int64, repeated, tag = "3")]
    samples_micros: Vec<i64>,
}

/// Opaque snapshot of a classifier's state, produced by [crate::Classifier::snapshot] and
/// consumed by [crate::Classifier::restore].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatermarkStateBlob(Bytes);

impl WatermarkStateBlob {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Bytes> for WatermarkStateBlob {
    fn from(bytes: Bytes) -> Self {
        WatermarkStateBlob(bytes)
    }
}

impl From<Vec<u8>> for WatermarkStateBlob {
    fn from(bytes: Vec<u8>) -> Self {
        WatermarkStateBlob(Bytes::from(bytes))
    }
}

/// Decoded contents of a [WatermarkStateBlob].
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Checkpoint {
    pub(crate) state: WatermarkState,
    pub(crate) policy: PolicyState,
}

impl From<&Checkpoint> for WatermarkStateBlob {
    fn from(checkpoint: &Checkpoint) -> Self {
        let policy = match &checkpoint.policy {
            PolicyState::Stateless => None,
            PolicyState::Exponential { average_micros } => Some(PolicyStateProto {
                kind: POLICY_KIND_EXPONENTIAL,
                average_micros: *average_micros,
                samples_micros: vec![],
            }),
            PolicyState::Window { samples_micros } => Some(PolicyStateProto {
                kind: POLICY_KIND_WINDOW,
                average_micros: None,
                samples_micros: samples_micros.clone(),
            }),
        };

        let proto = CheckpointProto {
            version: CHECKPOINT_VERSION,
            hwm_micros: checkpoint.state.current_hwm().map(|t| t.timestamp_micros()),
            last_event_time_micros: checkpoint
                .state
                .last_event_time()
                .map(|t| t.timestamp_micros()),
            policy,
        };

        WatermarkStateBlob(Bytes::from(proto.encode_to_vec()))
    }
}

impl TryFrom<&WatermarkStateBlob> for Checkpoint {
    type Error = Error;

    fn try_from(blob: &WatermarkStateBlob) -> Result<Self, Self::Error> {
        let proto = CheckpointProto::decode(blob.0.clone())
            .map_err(|e| Error::Snapshot(format!("undecodable checkpoint: {e}")))?;

        if proto.version != CHECKPOINT_VERSION {
            return Err(Error::Snapshot(format!(
                "unsupported checkpoint version {} (expected {})",
                proto.version, CHECKPOINT_VERSION
            )));
        }

        let hwm = proto.hwm_micros.map(from_micros).transpose()?;
        let last_event_time = proto.last_event_time_micros.map(from_micros).transpose()?;

        let policy = match proto.policy {
            None => PolicyState::Stateless,
            Some(p) => match p.kind {
                POLICY_KIND_STATELESS => PolicyState::Stateless,
                POLICY_KIND_EXPONENTIAL => PolicyState::Exponential {
                    average_micros: p.average_micros,
                },
                POLICY_KIND_WINDOW => PolicyState::Window {
                    samples_micros: p.samples_micros,
                },
                other => {
                    return Err(Error::Snapshot(format!("unknown policy state kind {other}")));
                }
            },
        };

        Ok(Checkpoint {
            state: WatermarkState::from_parts(hwm, last_event_time),
            policy,
        })
    }
}

fn from_micros(micros: i64) -> crate::Result<Timestamp> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| Error::Snapshot(format!("timestamp out of range: {micros}")))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(h: u32, m: u32) -> Timestamp {
        chrono::Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_checkpoint_with_window_state() {
        let checkpoint = Checkpoint {
            state: WatermarkState::from_parts(Some(at(10, 4)), Some(at(18, 0))),
            policy: PolicyState::Window {
                samples_micros: vec![at(10, 2).timestamp_micros(), at(10, 4).timestamp_micros()],
            },
        };

        let blob = WatermarkStateBlob::from(&checkpoint);
        let decoded = Checkpoint::try_from(&blob).unwrap();
        assert_eq!(decoded, checkpoint);
    }

    #[test]
    fn test_empty_checkpoint() {
        let checkpoint = Checkpoint {
            state: WatermarkState::new(),
            policy: PolicyState::Stateless,
        };

        let blob = WatermarkStateBlob::from(&checkpoint);
        let decoded = Checkpoint::try_from(&blob).unwrap();
        assert_eq!(decoded.state.current_hwm(), None);
        assert_eq!(decoded.state.last_event_time(), None);
        assert_eq!(decoded.policy, PolicyState::Stateless);
    }

    #[test]
    fn test_garbage_is_rejected() {
        let blob = WatermarkStateBlob::from(vec![0xff, 0xff, 0xff, 0xff]);
        assert!(matches!(Checkpoint::try_from(&blob), Err(Error::Snapshot(_))));
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let proto = CheckpointProto {
            version: CHECKPOINT_VERSION + 1,
            hwm_micros: Some(0),
            last_event_time_micros: None,
            policy: None,
        };
        let blob = WatermarkStateBlob::from(proto.encode_to_vec());
        assert!(matches!(
            Checkpoint::try_from(&blob),
            Err(Error::Snapshot(_))
        ));
    }
}
