//! Error taxonomy for the transfer engine (spec §7).
//!
//! Expected conditions (late packets, duplicates, a full room) are
//! recovered locally by the component that sees them and are only
//! observed through events/logs; they never reach this enum. Everything
//! here is either fatal to one peer's session or fatal to the transfer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("signaling unavailable: {0}")]
    SignalingUnavailable(String),

    #[error("room is full")]
    RoomFull,

    #[error("peer {0} did not connect within the timeout")]
    PeerTimeout(String),

    #[error("peer {0} closed")]
    PeerClosed(String),

    #[error("corrupt packet: {0}")]
    CorruptPacket(String),

    #[error("reorder buffer overflow")]
    BufferOverflow,

    #[error("decryption failed for chunk {chunk_index}")]
    DecryptFailure { chunk_index: u32 },

    #[error("write to destination sink failed: {0}")]
    SinkWriteFailure(String),

    #[error("user cancelled the transfer")]
    UserCancelled,

    #[error("receiver missed the transfer start")]
    TransferMissed,

    #[error("archive error: {0}")]
    Archive(String),

    #[error("control message codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransferError>;
