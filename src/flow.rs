//! Flow Controller (C7): paces batch requests off the transport's
//! outbound buffer depth and adapts batch size (spec §4.7).
//!
//! Grounded on the pack's `haven-fast-transfer/sender.rs`
//! (`other_examples/ad630712_...`), which tracks `rate_bps: AtomicU64`
//! and other pacing state as atomics read across threads without a
//! lock — the same shape used here for `buffered_amount` and
//! `target_batch_size`, since the batch-send loop (owned by the
//! Coordinator) and the channel's `drain` callback both need to touch
//! this state without blocking each other.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::config::TransferConfig;

/// Per-peer (or per-current-batch) pacing state.
pub struct FlowController {
    buffered_amount: AtomicU64,
    target_batch_size: AtomicUsize,
    target_chunk_size: AtomicUsize,
    low_watermark: u64,
    high_watermark: u64,
    max_buffer: u64,
    min_batch: usize,
    max_batch: usize,
    min_chunk: usize,
    max_chunk: usize,
}

impl FlowController {
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            buffered_amount: AtomicU64::new(0),
            target_batch_size: AtomicUsize::new(config.default_batch_size),
            target_chunk_size: AtomicUsize::new(config.default_chunk_size),
            low_watermark: config.low_watermark,
            high_watermark: config.high_watermark,
            max_buffer: config.max_buffer,
            min_batch: config.min_batch_size,
            max_batch: config.max_batch_size,
            min_chunk: config.min_chunk_size,
            max_chunk: config.max_chunk_size,
        }
    }

    /// Record the transport's latest reported buffered-amount.
    pub fn observe_buffered_amount(&self, bytes: u64) {
        self.buffered_amount.store(bytes, Ordering::Relaxed);
    }

    pub fn buffered_amount(&self) -> u64 {
        self.buffered_amount.load(Ordering::Relaxed)
    }

    /// Should the Coordinator ask the Sender Pipeline for another batch
    /// right now?
    pub fn should_request_batch(&self) -> bool {
        self.buffered_amount() < self.high_watermark
    }

    /// Would sending `batch_bytes` more push the buffer past the hard
    /// cap? If so the caller must await drain down to `0.5 * max_buffer`
    /// before sending (spec §4.7).
    pub fn would_exceed_max_buffer(&self, batch_bytes: u64) -> bool {
        self.buffered_amount() + batch_bytes > self.max_buffer
    }

    pub fn drain_target(&self) -> u64 {
        self.max_buffer / 2
    }

    pub fn target_batch_size(&self) -> usize {
        self.target_batch_size.load(Ordering::Relaxed)
    }

    /// AIMD-like adjustment: halve (floored at `min_batch`) under
    /// sustained high utilization, +1 (capped at `max_batch`) under
    /// sustained low utilization.
    pub fn adapt_batch_size(&self) {
        let buffered = self.buffered_amount();
        if buffered >= self.high_watermark {
            self.target_batch_size
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                    Some((cur / 2).max(self.min_batch))
                })
                .ok();
        } else if buffered <= self.low_watermark {
            self.target_batch_size
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                    Some((cur + 1).min(self.max_batch))
                })
                .ok();
        }
    }

    pub fn target_chunk_size(&self) -> usize {
        self.target_chunk_size.load(Ordering::Relaxed)
    }

    /// Same AIMD shape as `adapt_batch_size`, applied to the per-packet
    /// payload size (spec §4.5: "target chunk size and batch count are
    /// parameters controlled by the Flow Controller").
    pub fn adapt_chunk_size(&self) {
        let buffered = self.buffered_amount();
        if buffered >= self.high_watermark {
            self.target_chunk_size
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                    Some((cur / 2).max(self.min_chunk))
                })
                .ok();
        } else if buffered <= self.low_watermark {
            self.target_chunk_size
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                    Some((cur + 4096).min(self.max_chunk))
                })
                .ok();
        }
    }
}
