//! Control message vocabulary (spec §3/§6).
//!
//! Grounded on the teacher's `protocol.rs` request/response structs,
//! generalized from libp2p's `request_response::Codec` request/response
//! pairing to a tagged JSON enum carried as its own transport frame, per
//! spec §3: "A control message is distinguished from a data packet by
//! the first payload byte being `{`".

use serde::{Deserialize, Serialize};

use crate::manifest::Manifest;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ControlMessage {
    #[serde(rename = "MANIFEST")]
    Manifest { manifest: Manifest },

    #[serde(rename = "TRANSFER_READY")]
    TransferReady,

    #[serde(rename = "TRANSFER_STARTED")]
    TransferStarted,

    #[serde(rename = "TRANSFER_STARTING")]
    TransferStarting,

    #[serde(rename = "QUEUED")]
    Queued { message: String, position: usize },

    #[serde(rename = "READY_FOR_DOWNLOAD")]
    ReadyForDownload { message: String },

    #[serde(rename = "DOWNLOAD_COMPLETE")]
    DownloadComplete,

    #[serde(rename = "KEEP_ALIVE")]
    KeepAlive,
}

impl ControlMessage {
    /// Marker byte that distinguishes a control frame from a data packet
    /// when the transport doesn't expose a text/binary flag (spec §4.1).
    pub const MARKER_BYTE: u8 = b'{';

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Heuristic fallback used when the transport carries no text/binary
    /// flag: control frames are JSON objects, so they start with `{`.
    pub fn looks_like_control(bytes: &[u8]) -> bool {
        bytes.first() == Some(&Self::MARKER_BYTE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;

    #[test]
    fn round_trips_each_variant() {
        let manifest = Manifest::for_inputs(
            "t1".to_string(),
            "folder".to_string(),
            true,
            &[("a.txt".to_string(), 10), ("b.txt".to_string(), 20)],
            false,
        );
        let variants = vec![
            ControlMessage::Manifest { manifest },
            ControlMessage::TransferReady,
            ControlMessage::TransferStarted,
            ControlMessage::TransferStarting,
            ControlMessage::Queued {
                message: "queued".into(),
                position: 1,
            },
            ControlMessage::ReadyForDownload {
                message: "ready".into(),
            },
            ControlMessage::DownloadComplete,
            ControlMessage::KeepAlive,
        ];
        for v in variants {
            let json = v.to_json().unwrap();
            assert!(ControlMessage::looks_like_control(&json));
            let back = ControlMessage::from_json(&json).unwrap();
            assert_eq!(back, v);
        }
    }

    #[test]
    fn data_packet_bytes_do_not_look_like_control() {
        let data = [0u8, 1, 2, 3];
        assert!(!ControlMessage::looks_like_control(&data));
    }
}
