//! Packet Codec (C1): the 18-byte framed data packet, little-endian.
//!
//! Grounded on the teacher's length-prefixed framing in
//! `network.rs::TransferCodec` (4-byte big-endian length then a CBOR
//! body) and `send_chunks_over_stream`/`receive_chunks_from_stream`,
//! generalized to a fixed binary header carrying the offset/index
//! fields the CBOR `FileChunk` left implicit.

use crate::error::TransferError;

/// Size of the packet header in bytes (spec §3).
pub const HEADER_LEN: usize = 18;

/// Reserved `file_id` marking the end-of-stream packet.
pub const EOS_FILE_ID: u16 = 0xFFFF;

/// One decoded data packet: an 18-byte header plus its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub file_id: u16,
    pub chunk_index: u32,
    pub byte_offset: u64,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn is_eos(&self) -> bool {
        self.file_id == EOS_FILE_ID
    }

    /// Build the end-of-stream packet for the given chunk index.
    pub fn eos(chunk_index: u32, byte_offset: u64) -> Self {
        Self {
            file_id: EOS_FILE_ID,
            chunk_index,
            byte_offset,
            payload: Vec::new(),
        }
    }

    /// Encode this packet as an 18-byte header followed by its payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.file_id.to_le_bytes());
        out.extend_from_slice(&self.chunk_index.to_le_bytes());
        out.extend_from_slice(&self.byte_offset.to_le_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decode a packet from `bytes`, validating header/length consistency.
    pub fn decode(bytes: &[u8]) -> Result<Self, TransferError> {
        if bytes.len() < HEADER_LEN {
            return Err(TransferError::CorruptPacket(format!(
                "packet too short: {} bytes",
                bytes.len()
            )));
        }

        let file_id = u16::from_le_bytes([bytes[0], bytes[1]]);
        let chunk_index = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        let byte_offset = u64::from_le_bytes([
            bytes[6], bytes[7], bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13],
        ]);
        let payload_len =
            u32::from_le_bytes([bytes[14], bytes[15], bytes[16], bytes[17]]) as usize;

        if bytes.len() != HEADER_LEN + payload_len {
            return Err(TransferError::CorruptPacket(format!(
                "payload_len={} does not match frame size {} (expected {})",
                payload_len,
                bytes.len(),
                HEADER_LEN + payload_len
            )));
        }

        // EOS carries no meaningful payload regardless of what's on the wire.
        let payload = if file_id == EOS_FILE_ID {
            Vec::new()
        } else {
            bytes[HEADER_LEN..].to_vec()
        };

        Ok(Self {
            file_id,
            chunk_index,
            byte_offset,
            payload,
        })
    }
}
