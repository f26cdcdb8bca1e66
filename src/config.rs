//! Centralized tunables for the transfer engine.
//!
//! The teacher scatters `CHUNK_SIZE`/`MAX_FILE_SIZE`/etc. as top-level
//! `pub const`s in `protocol.rs`; this module keeps the same constants
//! (as defaults) but also exposes a `TransferConfig` struct so a
//! coordinator can be built with non-default watermarks in tests.

use std::time::Duration;

/// Minimum adaptive chunk size (spec §4.5).
pub const MIN_CHUNK_SIZE: usize = 16 * 1024;
/// Maximum adaptive chunk size (spec §4.5).
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;
/// Default chunk size before the flow controller adapts it.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Minimum packets requested per `process_batch` call.
pub const MIN_BATCH_SIZE: usize = 64;
/// Maximum packets requested per `process_batch` call.
pub const MAX_BATCH_SIZE: usize = 256;
/// Default batch size before the flow controller adapts it.
pub const DEFAULT_BATCH_SIZE: usize = 128;

/// Transport outbound-buffer low watermark (spec §4.7 / GLOSSARY).
pub const LOW_WATERMARK: u64 = 8 * 1024 * 1024;
/// Transport outbound-buffer high watermark.
pub const HIGH_WATERMARK: u64 = 24 * 1024 * 1024;
/// Hard cap on transport outbound buffer before the sender awaits drain.
pub const MAX_BUFFER: u64 = 32 * 1024 * 1024;

/// Sender prefetch double-buffer cap, in bytes of encoded packets.
pub const PREFETCH_CAP: usize = 8 * 1024 * 1024;

/// Archiver internal output queue high watermark (push_input blocks above).
pub const ARCHIVE_QUEUE_HIGH: usize = 32 * 1024 * 1024;
/// Archiver internal output queue low watermark (push_input resumes below).
pub const ARCHIVE_QUEUE_LOW: usize = 8 * 1024 * 1024;

/// Reordering buffer byte cap (spec §3 lifecycle).
pub const REORDER_BUFFER_CAP: usize = 64 * 1024 * 1024;
/// Reordering buffer entry time-to-live.
pub const REORDER_TTL: Duration = Duration::from_secs(30);
/// Reordering buffer TTL sweep interval.
pub const REORDER_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Receiver write-batch flush threshold.
pub const WRITE_BATCH_SIZE: usize = 8 * 1024 * 1024;
/// Receiver progress event throttle.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);
/// Receiver backpressure PAUSE threshold on `pending_in_memory`.
pub const RECEIVER_PAUSE_THRESHOLD: u64 = 32 * 1024 * 1024;
/// Receiver backpressure RESUME threshold on `pending_in_memory`.
pub const RECEIVER_RESUME_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Swarm capacity: maximum concurrently admitted peers.
pub const SWARM_CAPACITY: usize = 3;
/// Partial-readiness countdown before starting with whoever is ready.
pub const READY_COUNTDOWN: Duration = Duration::from_secs(10);
/// Grace period before draining the queue into a fresh batch.
pub const QUEUE_DRAIN_GRACE: Duration = Duration::from_secs(1);
/// Keep-alive interval while connected and not transferring.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(5);
/// Wait after sender-pipeline completion drains peer buffers before EOS.
pub const EOS_DRAIN_GRACE: Duration = Duration::from_millis(500);
/// Connection establishment timeout per peer.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Receiver's signal-to-start timeout after sending TRANSFER_READY.
pub const SIGNAL_TO_START_TIMEOUT: Duration = Duration::from_secs(15);
/// Disconnect grace before the initiator issues a restart offer.
pub const RECONNECT_GRACE: Duration = Duration::from_secs(2);
/// `DOWNLOAD_COMPLETE` repeat count and spacing, for reliability over a
/// channel that might drop a control message (spec §6).
pub const DOWNLOAD_COMPLETE_REPEATS: usize = 3;
pub const DOWNLOAD_COMPLETE_SPACING: Duration = Duration::from_millis(100);

/// Source file extensions the archiver stores instead of deflating,
/// because they are already compressed (spec §4.3).
pub const STORE_EXTENSIONS: &[&str] = &[
    "zip", "rar", "7z", "gz", "jpg", "jpeg", "png", "gif", "webp", "mp4", "mkv", "avi", "mov",
    "webm", "mp3", "wav", "ogg", "flac", "pdf", "docx", "xlsx", "pptx",
];

/// Bundles the tunables above so components can be constructed with
/// non-default values in tests without touching the global constants.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub default_chunk_size: usize,
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    pub default_batch_size: usize,
    pub low_watermark: u64,
    pub high_watermark: u64,
    pub max_buffer: u64,
    pub prefetch_cap: usize,
    pub archive_queue_high: usize,
    pub archive_queue_low: usize,
    pub reorder_buffer_cap: usize,
    pub reorder_ttl: Duration,
    pub write_batch_size: usize,
    pub swarm_capacity: usize,
    pub ready_countdown: Duration,
    pub queue_drain_grace: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            min_chunk_size: MIN_CHUNK_SIZE,
            max_chunk_size: MAX_CHUNK_SIZE,
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            min_batch_size: MIN_BATCH_SIZE,
            max_batch_size: MAX_BATCH_SIZE,
            default_batch_size: DEFAULT_BATCH_SIZE,
            low_watermark: LOW_WATERMARK,
            high_watermark: HIGH_WATERMARK,
            max_buffer: MAX_BUFFER,
            prefetch_cap: PREFETCH_CAP,
            archive_queue_high: ARCHIVE_QUEUE_HIGH,
            archive_queue_low: ARCHIVE_QUEUE_LOW,
            reorder_buffer_cap: REORDER_BUFFER_CAP,
            reorder_ttl: REORDER_TTL,
            write_batch_size: WRITE_BATCH_SIZE,
            swarm_capacity: SWARM_CAPACITY,
            ready_countdown: READY_COUNTDOWN,
            queue_drain_grace: QUEUE_DRAIN_GRACE,
        }
    }
}

/// Should this file extension be stored instead of deflated?
pub fn should_store(extension: &str) -> bool {
    let lower = extension.to_ascii_lowercase();
    STORE_EXTENSIONS.contains(&lower.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_extensions_are_case_insensitive() {
        assert!(should_store("JPG"));
        assert!(should_store("jpg"));
        assert!(!should_store("txt"));
        assert!(!should_store("rs"));
    }

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = TransferConfig::default();
        assert_eq!(cfg.default_chunk_size, 64 * 1024);
        assert_eq!(cfg.default_batch_size, 128);
        assert_eq!(cfg.swarm_capacity, 3);
    }
}
