//! Peer Session (C8): wraps one `PeerChannel`, routes inbound bytes
//! between control and data, and runs the connection-recovery and
//! keep-alive policies (spec §4.8).
//!
//! The teacher has no direct analogue (libp2p owns connection lifecycle
//! internally), so this is modeled on the spec's explicit state table
//! (§3 Peer Session state) the way the teacher models `FileReceiver` as
//! a plain struct owned by one caller: state lives here, but transitions
//! are driven by the Swarm Coordinator calling `on_*` methods rather
//! than the session subscribing to channel events itself (§5: "event
//! callbacks from the transport post messages to the Coordinator rather
//! than mutating shared state").

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config;
use crate::control::ControlMessage;
use crate::error::TransferError;
use crate::packet::Packet;
use crate::ports::{PeerChannel, PeerId, RoomId, Signaling};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Closed,
    Failed,
}

/// Snapshot of spec §3's "Peer Session state" tuple.
#[derive(Debug, Clone)]
pub struct PeerSessionState {
    pub peer_id: PeerId,
    pub role: Role,
    pub connection_state: ConnectionState,
    pub ready: bool,
    pub bytes_buffered: u64,
}

/// What an inbound transport frame decodes to (spec §4.1's `{` marker
/// rule, applied by `route_inbound`).
#[derive(Debug, Clone)]
pub enum RoutedMessage {
    Control(ControlMessage),
    Data(Packet),
}

pub struct PeerSession {
    peer_id: PeerId,
    room_id: RoomId,
    role: Role,
    connection_state: ConnectionState,
    ready: bool,
    channel: Arc<dyn PeerChannel>,
    signaling: Arc<dyn Signaling>,
}

impl PeerSession {
    pub fn new(peer_id: PeerId, room_id: RoomId, role: Role, channel: Arc<dyn PeerChannel>, signaling: Arc<dyn Signaling>) -> Self {
        Self {
            peer_id,
            room_id,
            role,
            connection_state: ConnectionState::New,
            ready: false,
            channel,
            signaling,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn is_alive(&self) -> bool {
        matches!(self.connection_state, ConnectionState::New | ConnectionState::Connecting | ConnectionState::Connected)
    }

    pub fn buffered_amount(&self) -> u64 {
        self.channel.buffered_amount()
    }

    pub fn snapshot(&self) -> PeerSessionState {
        PeerSessionState {
            peer_id: self.peer_id.clone(),
            role: self.role,
            connection_state: self.connection_state,
            ready: self.ready,
            bytes_buffered: self.buffered_amount(),
        }
    }

    /// Begin the connection: only the initiator emits an offer blob
    /// (spec §4.8); the responder waits for one via signaling and then
    /// answers (driven externally by the Coordinator when it observes
    /// the offer event — not modeled here since `Signaling`'s inbound
    /// event stream is outside this core's abstraction boundary).
    pub async fn negotiate(&mut self, offer_or_answer_blob: Vec<u8>) -> Result<(), TransferError> {
        self.connection_state = ConnectionState::Connecting;
        match self.role {
            Role::Initiator => {
                self.signaling
                    .send_offer(&self.room_id, offer_or_answer_blob, Some(self.peer_id.clone()))
                    .await?;
            }
            Role::Responder => {
                self.signaling
                    .send_answer(&self.room_id, offer_or_answer_blob, Some(self.peer_id.clone()))
                    .await?;
            }
        }
        Ok(())
    }

    pub fn mark_connected(&mut self) {
        self.connection_state = ConnectionState::Connected;
    }

    pub fn mark_failed(&mut self) {
        self.connection_state = ConnectionState::Failed;
    }

    pub fn mark_closed(&mut self) {
        self.connection_state = ConnectionState::Closed;
    }

    /// Send one data packet (encoded per §4.1) to this peer.
    pub async fn send_packet(&self, packet: &Packet) -> Result<(), TransferError> {
        self.channel.send(packet.encode(), false).await
    }

    /// Send one control message as a text frame.
    pub async fn send_control(&self, message: &ControlMessage) -> Result<(), TransferError> {
        let json = message.to_json()?;
        self.channel.send(json, true).await
    }

    /// Classify an inbound frame as control or data (spec §4.1/§4.8).
    pub fn route_inbound(bytes: &[u8]) -> Result<RoutedMessage, TransferError> {
        if ControlMessage::looks_like_control(bytes) {
            Ok(RoutedMessage::Control(ControlMessage::from_json(bytes)?))
        } else {
            Ok(RoutedMessage::Data(Packet::decode(bytes)?))
        }
    }

    /// React to the transport reporting `disconnected`: wait up to
    /// `RECONNECT_GRACE` for auto-recovery. Returns `true` if the
    /// initiator issued a restart offer because recovery did not happen
    /// in time (spec §4.8).
    pub async fn handle_disconnected(&mut self) -> Result<bool, TransferError> {
        tokio::time::sleep(config::RECONNECT_GRACE).await;
        if self.connection_state == ConnectionState::Connected {
            // Reconnected during the grace window (caller already called
            // `mark_connected` from the transport's `reconnected` event).
            return Ok(false);
        }
        if self.role == Role::Initiator {
            warn!(peer_id = %self.peer_id, "issuing restart offer after disconnect grace");
            self.signaling
                .send_offer(&self.room_id, Vec::new(), Some(self.peer_id.clone()))
                .await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Emit one `KEEP_ALIVE` control message; the Coordinator schedules
    /// this on a 5-second interval while connected and not transferring
    /// (spec §4.9 Keep-alive).
    pub async fn tick_keep_alive(&self) -> Result<(), TransferError> {
        debug!(peer_id = %self.peer_id, "keep-alive");
        self.send_control(&ControlMessage::KeepAlive).await
    }
}

pub const KEEP_ALIVE_INTERVAL: Duration = config::KEEP_ALIVE_INTERVAL;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::LoopbackChannel;
    use crate::ports::LocalSignaling;

    fn session() -> (PeerSession, tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>) {
        let (chan, rx) = LoopbackChannel::pair();
        let signaling: Arc<dyn Signaling> = Arc::new(LocalSignaling::new());
        let channel: Arc<dyn PeerChannel> = Arc::new(chan);
        let session = PeerSession::new(
            "peer-a".to_string(),
            "ROOM01".to_string(),
            Role::Initiator,
            channel,
            signaling,
        );
        (session, rx)
    }

    #[test]
    fn route_inbound_distinguishes_control_from_data() {
        let control = ControlMessage::KeepAlive.to_json().unwrap();
        assert!(matches!(
            PeerSession::route_inbound(&control).unwrap(),
            RoutedMessage::Control(ControlMessage::KeepAlive)
        ));

        let data = Packet { file_id: 0, chunk_index: 0, byte_offset: 0, payload: vec![1, 2, 3] }.encode();
        assert!(matches!(
            PeerSession::route_inbound(&data).unwrap(),
            RoutedMessage::Data(_)
        ));
    }

    #[tokio::test]
    async fn send_packet_and_control_go_over_the_channel() {
        let (session, mut rx) = session();
        session
            .send_packet(&Packet { file_id: 0, chunk_index: 0, byte_offset: 0, payload: vec![9] })
            .await
            .unwrap();
        let bytes = rx.recv().await.unwrap();
        assert!(matches!(PeerSession::route_inbound(&bytes).unwrap(), RoutedMessage::Data(_)));

        session.send_control(&ControlMessage::TransferReady).await.unwrap();
        let bytes = rx.recv().await.unwrap();
        assert!(matches!(
            PeerSession::route_inbound(&bytes).unwrap(),
            RoutedMessage::Control(ControlMessage::TransferReady)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_grace_reconnect_suppresses_restart_offer() {
        let (mut session, _rx) = session();
        session.mark_connected();
        let handle = tokio::spawn(async move {
            let restarted = session.handle_disconnected().await.unwrap();
            (session, restarted)
        });
        // simulate reconnection happening before the grace window elapses
        tokio::time::advance(Duration::from_millis(1)).await;
        tokio::time::advance(config::RECONNECT_GRACE).await;
        let (_session, restarted) = handle.await.unwrap();
        assert!(!restarted);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_grace_timeout_issues_restart_offer() {
        let (mut session, _rx) = session();
        session.mark_failed();
        let handle = tokio::spawn(async move {
            let restarted = session.handle_disconnected().await.unwrap();
            restarted
        });
        tokio::time::advance(config::RECONNECT_GRACE + Duration::from_millis(10)).await;
        let restarted = handle.await.unwrap();
        assert!(restarted);
    }
}
