//! Swarm Coordinator (C9): admits receivers, drives the readiness and
//! batch-transfer state machine, and serializes transfers when one
//! sender serves several receivers (spec §4.9). The most complex
//! component in the engine.
//!
//! No teacher analogue exists (the teacher is strictly one-sender-one-
//! receiver over libp2p `request_response`); this is new logic built
//! the way the teacher structures its swarm event loop in
//! `main.rs`/`network.rs` — a single owner mutating a handful of
//! collections in response to one event at a time, never shared
//! directly with other tasks (spec §5: "All mutations happen on a
//! single logical actor").

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::TransferConfig;
use crate::control::ControlMessage;
use crate::crypto::TransferKey;
use crate::error::TransferError;
use crate::manifest::Manifest;
use crate::packet::Packet;
use crate::pipeline::SenderPipeline;
use crate::ports::{PeerChannel, PeerId, RoomId, Signaling};
use crate::session::{PeerSession, Role};

/// Built by the caller for every (re)start of the Sender Pipeline: once
/// for the initial batch and once per queue-drain restart, since file
/// sources must be re-opened from scratch (spec §9 Open Question).
pub type PipelineFactory = Box<dyn Fn() -> SenderPipeline + Send + Sync>;

/// Decision produced by `peer_ready`, kept separate from its side
/// effects so the readiness state machine (spec §4.9) is testable
/// without a real transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessAction {
    /// Already transferring or already completed; nothing to do besides
    /// the state mutation already applied.
    None,
    /// `p` was appended to `queue`; notify it of its position.
    Queued { peer_id: PeerId, position: usize },
    /// A countdown should be (re)armed if not already running.
    ArmCountdown,
    /// Start immediately with exactly these peers.
    Start { peer_ids: Vec<PeerId> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Draining { queued_count: usize },
    Idle { completed_count: usize, waiting_count: usize },
}

struct Slot {
    session: PeerSession,
}

/// Sender-side swarm state (spec §3 "Swarm state" and §4.9).
pub struct SwarmCoordinator {
    room_id: RoomId,
    capacity: usize,
    peer_order: Vec<PeerId>,
    peers: HashMap<PeerId, Slot>,
    current_batch: HashSet<PeerId>,
    queue: Vec<PeerId>,
    ready_session: HashSet<PeerId>,
    completed_session: HashSet<PeerId>,
    room_members: Option<Vec<PeerId>>,
    transferring: bool,
    countdown_active: bool,
    manifest: Manifest,
    key: Option<TransferKey>,
    config: TransferConfig,
    make_pipeline: PipelineFactory,
}

impl SwarmCoordinator {
    pub fn new(room_id: RoomId, manifest: Manifest, key: Option<TransferKey>, config: TransferConfig, make_pipeline: PipelineFactory) -> Self {
        Self {
            room_id,
            capacity: config.swarm_capacity,
            peer_order: Vec::new(),
            peers: HashMap::new(),
            current_batch: HashSet::new(),
            queue: Vec::new(),
            ready_session: HashSet::new(),
            completed_session: HashSet::new(),
            room_members: None,
            transferring: false,
            countdown_active: false,
            manifest,
            key,
            config,
            make_pipeline,
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peer_order.len()
    }

    pub fn is_transferring(&self) -> bool {
        self.transferring
    }

    fn room_user_count(&self) -> usize {
        match &self.room_members {
            Some(members) => members.len(),
            None => self.peer_order.len(),
        }
    }

    fn pending_count(&self) -> usize {
        self.room_user_count().saturating_sub(self.completed_session.len())
    }

    /// Drop any local peer whose channel is dead or who is absent from
    /// the authoritative room member list (spec §4.9 Peer admission).
    fn sweep_zombies(&mut self) {
        let members = self.room_members.clone();
        let dead: Vec<PeerId> = self
            .peer_order
            .iter()
            .filter(|id| {
                let slot = &self.peers[*id];
                let channel_dead = !slot.session.is_alive();
                let absent = members
                    .as_ref()
                    .is_some_and(|m| !m.contains(id));
                channel_dead || absent
            })
            .cloned()
            .collect();
        for id in dead {
            self.remove_peer(&id);
        }
    }

    fn remove_peer(&mut self, peer_id: &PeerId) {
        self.peer_order.retain(|id| id != peer_id);
        self.peers.remove(peer_id);
        self.current_batch.remove(peer_id);
        self.ready_session.remove(peer_id);
        self.queue.retain(|id| id != peer_id);
    }

    /// Accept or reject a join (spec §4.9 Peer admission).
    pub fn admit_peer(&mut self, peer_id: PeerId, channel: Arc<dyn PeerChannel>, signaling: Arc<dyn Signaling>) -> Result<(), TransferError> {
        if self.peers.contains_key(&peer_id) {
            return Ok(()); // already known; idempotent
        }
        if self.peer_order.len() >= self.capacity {
            self.sweep_zombies();
        }
        if self.peer_order.len() >= self.capacity {
            return Err(TransferError::RoomFull);
        }
        // The share-link holder (this coordinator) always issues the offer
        // to a newly joined peer, per spec §4.8.
        let mut session = PeerSession::new(peer_id.clone(), self.room_id.clone(), Role::Initiator, channel, signaling);
        session.mark_connected();
        self.peer_order.push(peer_id.clone());
        self.peers.insert(peer_id, Slot { session });
        Ok(())
    }

    pub fn on_room_members(&mut self, members: Vec<PeerId>) {
        self.room_members = Some(members);
        self.sweep_zombies();
    }

    pub fn on_peer_left(&mut self, peer_id: &PeerId) {
        self.remove_peer(peer_id);
        if self.current_batch.is_empty() && self.transferring {
            info!("current batch emptied by peer departure; treating as batch-complete");
        }
    }

    /// Spec §4.9 "Readiness and start" state machine.
    pub fn peer_ready(&mut self, peer_id: PeerId) -> ReadinessAction {
        if self.completed_session.contains(&peer_id) {
            return ReadinessAction::None;
        }

        if self.transferring {
            if !self.queue.contains(&peer_id) {
                self.queue.push(peer_id.clone());
            }
            let position = self.queue.iter().position(|p| p == &peer_id).unwrap_or(0) + 1;
            return ReadinessAction::Queued { peer_id, position };
        }

        self.ready_session.insert(peer_id);

        if self.room_members.is_none() {
            // spec: schedule a 1s re-check; caller is responsible for the timer.
            return ReadinessAction::ArmCountdown;
        }

        let pending = self.pending_count();
        let ready = self.ready_session.len();

        if pending == 1 && ready == 1 {
            return self.start_batch_action();
        }
        if pending > 1 && ready == pending {
            return self.start_batch_action();
        }

        self.countdown_active = true;
        ReadinessAction::ArmCountdown
    }

    /// Spec §4.9 countdown elapse: start with whoever is ready.
    pub fn countdown_elapsed(&mut self) -> ReadinessAction {
        self.countdown_active = false;
        if self.ready_session.is_empty() {
            return ReadinessAction::None;
        }
        self.start_batch_action()
    }

    fn start_batch_action(&mut self) -> ReadinessAction {
        self.countdown_active = false;
        let peer_ids: Vec<PeerId> = self.ready_session.drain().collect();
        for id in &peer_ids {
            self.current_batch.insert(id.clone());
            if let Some(slot) = self.peers.get_mut(id) {
                slot.session.set_ready(true);
            }
        }
        self.transferring = true;
        ReadinessAction::Start { peer_ids }
    }

    /// Send `MANIFEST` + `TRANSFER_STARTED` to each peer in `peer_ids`
    /// (spec §4.9 "Start").
    pub async fn announce_start(&self, peer_ids: &[PeerId]) -> Result<(), TransferError> {
        for id in peer_ids {
            if let Some(slot) = self.peers.get(id) {
                slot.session
                    .send_control(&ControlMessage::Manifest { manifest: self.manifest.clone() })
                    .await?;
                slot.session.send_control(&ControlMessage::TransferStarted).await?;
            }
        }
        Ok(())
    }

    /// `DOWNLOAD_COMPLETE` from `peer_id` (spec §4.9 Batch send loop).
    pub fn download_complete(&mut self, peer_id: &PeerId) -> bool {
        self.current_batch.remove(peer_id);
        self.completed_session.insert(peer_id.clone());
        if let Some(slot) = self.peers.get_mut(peer_id) {
            slot.session.set_ready(false);
        }
        self.current_batch.is_empty()
    }

    /// Spec §4.9 "Queue draining": called once `current_batch` empties.
    pub fn batch_complete(&mut self) -> BatchOutcome {
        self.transferring = false;
        if self.queue.is_empty() {
            return BatchOutcome::Idle {
                completed_count: self.completed_session.len(),
                waiting_count: self.pending_count(),
            };
        }
        BatchOutcome::Draining { queued_count: self.queue.len() }
    }

    /// After the 1-second grace period, move valid queued peers into a
    /// fresh batch and restart the Sender Pipeline (spec §4.9).
    pub async fn drain_queue(&mut self) -> Result<(Vec<PeerId>, SenderPipeline), TransferError> {
        let valid: Vec<PeerId> = self
            .queue
            .drain(..)
            .filter(|id| {
                self.peers
                    .get(id)
                    .is_some_and(|slot| slot.session.is_alive())
                    && !self.completed_session.contains(id)
            })
            .collect();

        for id in &valid {
            self.current_batch.insert(id.clone());
            if let Some(slot) = self.peers.get_mut(id) {
                slot.session.set_ready(true);
            }
        }
        self.transferring = true;

        for id in &valid {
            if let Some(slot) = self.peers.get(id) {
                slot.session
                    .send_control(&ControlMessage::Manifest { manifest: self.manifest.clone() })
                    .await?;
                slot.session.send_control(&ControlMessage::TransferStarting).await?;
            }
        }

        let pipeline = (self.make_pipeline)();
        Ok((valid, pipeline))
    }

    /// Broadcast `packet` to every peer in `current_batch`, in insertion
    /// order, dropping any peer whose send fails (spec §4.9 / §5).
    pub async fn broadcast(&mut self, packet: &Packet) {
        let mut failed = Vec::new();
        for id in self.peer_order.clone() {
            if !self.current_batch.contains(&id) {
                continue;
            }
            if let Some(slot) = self.peers.get(&id) {
                if slot.session.send_packet(packet).await.is_err() {
                    warn!(peer_id = %id, "send failed, dropping from current batch");
                    failed.push(id);
                }
            }
        }
        for id in failed {
            self.current_batch.remove(&id);
        }
    }

    pub fn current_batch_peer_ids(&self) -> Vec<PeerId> {
        self.current_batch.iter().cloned().collect()
    }

    pub fn highest_buffered_amount(&self) -> u64 {
        self.current_batch
            .iter()
            .filter_map(|id| self.peers.get(id))
            .map(|slot| slot.session.buffered_amount())
            .max()
            .unwrap_or(0)
    }

    /// Run one Sender Pipeline to completion against `current_batch`,
    /// then send the EOS packet per spec §4.9 "End-of-stream packet".
    pub async fn run_batch(&mut self, mut pipeline: SenderPipeline, high_watermark: u64) -> Result<(), TransferError> {
        loop {
            if self.highest_buffered_amount() >= high_watermark {
                tokio::time::sleep(Duration::from_millis(5)).await;
                continue;
            }
            let batch = pipeline.process_batch(self.config.default_batch_size).await;
            for packet in &batch.packets {
                self.broadcast(packet).await;
            }
            if batch.completed {
                break;
            }
        }
        pipeline.join().await?;

        while self.highest_buffered_amount() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(crate::config::EOS_DRAIN_GRACE).await;

        let final_chunk_index = u32::MAX; // sentinel; EOS carries no data invariant to renumber
        let eos = Packet::eos(final_chunk_index, 0);
        self.broadcast(&eos).await;
        info!("sent EOS to current batch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{LocalSignaling, LoopbackChannel};

    fn coordinator(capacity: usize) -> SwarmCoordinator {
        let manifest = Manifest::for_inputs("t1".into(), "f.bin".into(), false, &[("f.bin".into(), 10)], false);
        let config = TransferConfig {
            swarm_capacity: capacity,
            ..TransferConfig::default()
        };
        SwarmCoordinator::new(
            "ROOM01".to_string(),
            manifest,
            None,
            config,
            Box::new(|| unreachable!("pipeline factory not exercised in this test")),
        )
    }

    fn admit(coord: &mut SwarmCoordinator, peer_id: &str) {
        let (chan, _rx) = LoopbackChannel::pair();
        let signaling: Arc<dyn Signaling> = Arc::new(LocalSignaling::new());
        coord.admit_peer(peer_id.to_string(), Arc::new(chan), signaling).unwrap();
    }

    #[test]
    fn admits_up_to_capacity_then_rejects() {
        let mut coord = coordinator(2);
        admit(&mut coord, "a");
        admit(&mut coord, "b");
        let (chan, _rx) = LoopbackChannel::pair();
        let signaling: Arc<dyn Signaling> = Arc::new(LocalSignaling::new());
        let err = coord.admit_peer("c".to_string(), Arc::new(chan), signaling).unwrap_err();
        assert!(matches!(err, TransferError::RoomFull));
    }

    #[test]
    fn one_to_one_starts_immediately() {
        let mut coord = coordinator(3);
        admit(&mut coord, "a");
        coord.on_room_members(vec!["a".to_string()]);
        let action = coord.peer_ready("a".to_string());
        assert_eq!(action, ReadinessAction::Start { peer_ids: vec!["a".to_string()] });
        assert!(coord.is_transferring());
    }

    #[test]
    fn all_ready_among_multiple_starts_immediately() {
        let mut coord = coordinator(3);
        admit(&mut coord, "a");
        admit(&mut coord, "b");
        coord.on_room_members(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(coord.peer_ready("a".to_string()), ReadinessAction::ArmCountdown);
        let action = coord.peer_ready("b".to_string());
        match action {
            ReadinessAction::Start { mut peer_ids } => {
                peer_ids.sort();
                assert_eq!(peer_ids, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected Start, got {other:?}"),
        }
    }

    #[test]
    fn partial_readiness_arms_countdown_until_elapsed() {
        let mut coord = coordinator(3);
        admit(&mut coord, "a");
        admit(&mut coord, "b");
        admit(&mut coord, "c");
        coord.on_room_members(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(coord.peer_ready("a".to_string()), ReadinessAction::ArmCountdown);
        assert!(!coord.is_transferring());
        let action = coord.countdown_elapsed();
        assert_eq!(action, ReadinessAction::Start { peer_ids: vec!["a".to_string()] });
    }

    #[test]
    fn ready_while_transferring_is_queued_not_started() {
        let mut coord = coordinator(3);
        admit(&mut coord, "a");
        admit(&mut coord, "b");
        coord.on_room_members(vec!["a".to_string()]);
        coord.peer_ready("a".to_string());
        assert!(coord.is_transferring());

        let action = coord.peer_ready("b".to_string());
        assert_eq!(action, ReadinessAction::Queued { peer_id: "b".to_string(), position: 1 });
    }

    #[test]
    fn download_complete_drains_batch_then_idles_with_empty_queue() {
        let mut coord = coordinator(3);
        admit(&mut coord, "a");
        coord.on_room_members(vec!["a".to_string()]);
        coord.peer_ready("a".to_string());

        let empty = coord.download_complete(&"a".to_string());
        assert!(empty);
        let outcome = coord.batch_complete();
        assert_eq!(outcome, BatchOutcome::Idle { completed_count: 1, waiting_count: 0 });
        assert!(!coord.is_transferring());
    }

    #[test]
    fn batch_complete_with_queue_reports_draining() {
        let mut coord = coordinator(3);
        admit(&mut coord, "a");
        admit(&mut coord, "b");
        coord.on_room_members(vec!["a".to_string()]);
        coord.peer_ready("a".to_string());
        coord.peer_ready("b".to_string()); // queued, a is already transferring

        coord.download_complete(&"a".to_string());
        let outcome = coord.batch_complete();
        assert_eq!(outcome, BatchOutcome::Draining { queued_count: 1 });
    }

    #[test]
    fn zombie_sweep_removes_peers_absent_from_room_members() {
        let mut coord = coordinator(3);
        admit(&mut coord, "a");
        admit(&mut coord, "b");
        assert_eq!(coord.peer_count(), 2);
        coord.on_room_members(vec!["a".to_string()]);
        assert_eq!(coord.peer_count(), 1);
    }

    #[test]
    fn completed_peer_ignores_late_ready_event() {
        let mut coord = coordinator(3);
        admit(&mut coord, "a");
        coord.on_room_members(vec!["a".to_string()]);
        coord.peer_ready("a".to_string());
        coord.download_complete(&"a".to_string());
        coord.batch_complete();

        let action = coord.peer_ready("a".to_string());
        assert_eq!(action, ReadinessAction::None);
    }

    // Exercises the wire-level half (`announce_start`/`broadcast`/
    // `run_batch`/`drain_queue`) against real `LoopbackChannel` peers and
    // a real `SenderPipeline`, covering spec §8's S4/S5/S6 scenarios end
    // to end rather than only through the pure readiness state machine.
    mod wire_integration {
        use super::*;
        use crate::flow::FlowController;
        use crate::writer::ReceiverWriter;
        use tokio::sync::mpsc;

        struct TempFile(std::path::PathBuf);

        impl TempFile {
            fn with_contents(bytes: &[u8]) -> Self {
                let path = std::env::temp_dir().join(format!(
                    "ponswarp-coord-test-{}-{}",
                    std::process::id(),
                    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos()
                ));
                std::fs::write(&path, bytes).unwrap();
                Self(path)
            }
        }

        impl Drop for TempFile {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.0);
            }
        }

        fn coordinator_with_pipeline(capacity: usize, path: std::path::PathBuf, total_bytes: u64) -> SwarmCoordinator {
            let manifest = Manifest::for_inputs("t1".into(), "f.bin".into(), false, &[("f.bin".into(), total_bytes)], false);
            let config = TransferConfig {
                swarm_capacity: capacity,
                ..TransferConfig::default()
            };
            SwarmCoordinator::new(
                "ROOM01".to_string(),
                manifest,
                None,
                config,
                Box::new(move || {
                    let flow = Arc::new(FlowController::new(&TransferConfig::default()));
                    SenderPipeline::start_single_file(path.clone(), total_bytes, None, flow, &TransferConfig::default())
                }),
            )
        }

        fn admit_with_rx(coord: &mut SwarmCoordinator, peer_id: &str) -> mpsc::UnboundedReceiver<Vec<u8>> {
            let (chan, rx) = LoopbackChannel::pair();
            let signaling: Arc<dyn Signaling> = Arc::new(LocalSignaling::new());
            coord.admit_peer(peer_id.to_string(), Arc::new(chan), signaling).unwrap();
            rx
        }

        async fn drain_into_writer(mut rx: mpsc::UnboundedReceiver<Vec<u8>>, total_bytes: u64) -> Vec<u8> {
            let sink = crate::ports::SequentialSink::new(Vec::new());
            let mut writer = ReceiverWriter::new(sink, None, total_bytes, false, &TransferConfig::default());
            while let Some(bytes) = rx.recv().await {
                let packet = match crate::session::PeerSession::route_inbound(&bytes).unwrap() {
                    crate::session::RoutedMessage::Control(_) => continue,
                    crate::session::RoutedMessage::Data(p) => p,
                };
                let is_eos = packet.is_eos();
                let outcome = writer.write_packet(packet).await.unwrap();
                if is_eos {
                    assert!(outcome.completed.is_some());
                    break;
                }
            }
            writer.into_sink().into_inner()
        }

        #[tokio::test]
        async fn all_ready_receivers_get_the_full_file_in_one_batch() {
            let data: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
            let file = TempFile::with_contents(&data);
            let mut coord = coordinator_with_pipeline(3, file.0.clone(), data.len() as u64);

            let rx_a = admit_with_rx(&mut coord, "a");
            let rx_b = admit_with_rx(&mut coord, "b");
            coord.on_room_members(vec!["a".to_string(), "b".to_string()]);
            coord.peer_ready("a".to_string());
            let action = coord.peer_ready("b".to_string());
            let peer_ids = match action {
                ReadinessAction::Start { peer_ids } => peer_ids,
                other => panic!("expected Start, got {other:?}"),
            };

            coord.announce_start(&peer_ids).await.unwrap();
            let pipeline = (coord.make_pipeline)();
            coord.run_batch(pipeline, coord.config.high_watermark).await.unwrap();

            let (got_a, got_b) = tokio::join!(
                drain_into_writer(rx_a, data.len() as u64),
                drain_into_writer(rx_b, data.len() as u64),
            );
            assert_eq!(got_a, data);
            assert_eq!(got_b, data);
        }

        #[tokio::test]
        async fn queued_receiver_gets_a_fresh_batch_via_drain_queue() {
            let data: Vec<u8> = (0..150_000u32).map(|i| (i % 197) as u8).collect();
            let file = TempFile::with_contents(&data);
            let mut coord = coordinator_with_pipeline(3, file.0.clone(), data.len() as u64);

            let rx_a = admit_with_rx(&mut coord, "a");
            coord.on_room_members(vec!["a".to_string()]);
            let action = coord.peer_ready("a".to_string());
            let peer_ids = match action {
                ReadinessAction::Start { peer_ids } => peer_ids,
                other => panic!("expected Start, got {other:?}"),
            };
            coord.announce_start(&peer_ids).await.unwrap();

            // "b" joins and becomes ready while "a"'s batch is still
            // transferring (before `a` signals DOWNLOAD_COMPLETE), so it
            // queues rather than joining the in-progress batch.
            let rx_b = admit_with_rx(&mut coord, "b");
            coord.on_room_members(vec!["a".to_string(), "b".to_string()]);
            let queued_action = coord.peer_ready("b".to_string());
            assert!(matches!(queued_action, ReadinessAction::Queued { .. }));

            let pipeline = (coord.make_pipeline)();
            coord.run_batch(pipeline, coord.config.high_watermark).await.unwrap();
            let got_a = drain_into_writer(rx_a, data.len() as u64).await;
            assert_eq!(got_a, data);

            coord.download_complete(&"a".to_string());
            let outcome = coord.batch_complete();
            assert_eq!(outcome, BatchOutcome::Draining { queued_count: 1 });

            let (peer_ids, pipeline) = coord.drain_queue().await.unwrap();
            assert_eq!(peer_ids, vec!["b".to_string()]);
            coord.run_batch(pipeline, coord.config.high_watermark).await.unwrap();

            let got_b = drain_into_writer(rx_b, data.len() as u64).await;
            assert_eq!(got_b, data);
        }
    }
}
