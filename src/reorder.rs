//! Reordering Buffer (C2): reassembles byte-offset-tagged payloads into
//! a strictly sequential stream (spec §4.2).
//!
//! With a single ordered, reliable channel this is a fast pass-through;
//! it exists as a safety net for multi-substream delivery. New logic —
//! no direct teacher analogue — structured the way the teacher
//! structures stateful single-owner components (`FileReceiver` in
//! `transfer.rs`): a plain struct with `&mut self` operations, no
//! interior mutability, owned by exactly one `ReceiverWriter`.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::config::TransferConfig;
use crate::error::TransferError;

struct Pending {
    payload: Vec<u8>,
    inserted_at: Instant,
}

/// Reassembles out-of-order `(payload, byte_offset)` pushes into the
/// strictly sequential order the sender emitted them in.
pub struct ReorderBuffer {
    next_expected_offset: u64,
    pending: BTreeMap<u64, Pending>,
    bytes_buffered: usize,
    cap: usize,
    ttl: Duration,
}

impl ReorderBuffer {
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            next_expected_offset: 0,
            pending: BTreeMap::new(),
            bytes_buffered: 0,
            cap: config.reorder_buffer_cap,
            ttl: config.reorder_ttl,
        }
    }

    pub fn bytes_buffered(&self) -> usize {
        self.bytes_buffered
    }

    /// Push one payload at `offset`. Returns the sequence of payloads
    /// that are now safe to write, in order, which may include payloads
    /// pushed earlier that were waiting on this one to close a gap.
    pub fn push(&mut self, payload: Vec<u8>, offset: u64) -> Result<Vec<Vec<u8>>, TransferError> {
        if offset < self.next_expected_offset {
            // Duplicate or late arrival: already emitted, drop silently.
            warn!(offset, next_expected = self.next_expected_offset, "dropping late/duplicate payload");
            return Ok(Vec::new());
        }

        if offset == self.next_expected_offset {
            let mut out = vec![payload_len_advance(&mut self.next_expected_offset, payload)];
            self.drain_contiguous(&mut out);
            return Ok(out);
        }

        // Gap: buffer it, enforcing the overall byte cap.
        if self.pending.contains_key(&offset) {
            return Ok(Vec::new());
        }
        if self.bytes_buffered + payload.len() > self.cap {
            return Err(TransferError::BufferOverflow);
        }
        self.bytes_buffered += payload.len();
        self.pending.insert(
            offset,
            Pending {
                payload,
                inserted_at: Instant::now(),
            },
        );
        Ok(Vec::new())
    }

    fn drain_contiguous(&mut self, out: &mut Vec<Vec<u8>>) {
        while let Some(entry) = self.pending.remove(&self.next_expected_offset) {
            self.bytes_buffered -= entry.payload.len();
            out.push(payload_len_advance(&mut self.next_expected_offset, entry.payload));
        }
    }

    /// Drop any pending entries older than the configured TTL. Called by
    /// a periodic sweeper every `REORDER_SWEEP_INTERVAL` (spec §4.2).
    pub fn sweep_expired(&mut self) {
        let ttl = self.ttl;
        let now = Instant::now();
        let expired: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.inserted_at) > ttl)
            .map(|(offset, _)| *offset)
            .collect();
        for offset in expired {
            if let Some(entry) = self.pending.remove(&offset) {
                self.bytes_buffered -= entry.payload.len();
                warn!(offset, "dropping stale reorder-buffer entry past TTL");
            }
        }
    }

    /// Emit all remaining pending payloads in offset order regardless of
    /// gaps, and clear state. Used only at transfer finalize when a
    /// trailing gap would otherwise lose data (spec §4.2).
    pub fn force_flush_all(&mut self) -> Vec<Vec<u8>> {
        let mut out = Vec::with_capacity(self.pending.len());
        for (offset, entry) in std::mem::take(&mut self.pending) {
            if offset >= self.next_expected_offset {
                self.next_expected_offset = offset + entry.payload.len() as u64;
            }
            out.push(entry.payload);
        }
        self.bytes_buffered = 0;
        out
    }
}

fn payload_len_advance(next_expected_offset: &mut u64, payload: Vec<u8>) -> Vec<u8> {
    *next_expected_offset += payload.len() as u64;
    payload
}
