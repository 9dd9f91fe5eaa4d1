//! HDLC link state machine
//!
//! One [`HdlcLink`] exists per connection. Frames to transmit leave through the
//! outbound channel, frames from the peer are fed in with
//! [`HdlcLink::handle_frame`] (or [`HdlcLink::handle_bytes`] for raw input) and
//! everything the owner should react to arrives on the event channel.
//!
//! `connect`, `disconnect` and `send_data` are the only operations that wait
//! for the peer. Each parks its frame in the [`SendWindow`] and waits for the
//! matching reply for at most `response_timeout`.

use crate::hdlc::config::HdlcConfig;
use crate::hdlc::events::HdlcEvent;
use crate::hdlc::frame::{FrameType, HdlcFrame, next_sequence};
use crate::hdlc::state::LinkState;
use crate::hdlc::statistics::HdlcStatistics;
use crate::hdlc::window::{PendingKey, SendWindow};
use bytes::Bytes;
use dlms_core::{DlmsError, DlmsResult};
use tokio::sync::{Mutex, MutexGuard, Notify, mpsc, oneshot};
use tokio::time::timeout;

/// Receiving ends handed to the owner of a link
#[derive(Debug)]
pub struct LinkChannels {
    /// Frames the link wants transmitted to the peer
    pub outbound: mpsc::UnboundedReceiver<HdlcFrame>,
    /// State changes, received data and failures
    pub events: mpsc::UnboundedReceiver<HdlcEvent>,
}

#[derive(Debug)]
struct LinkInner {
    state: LinkState,
    /// V(S): N(S) of the next information frame
    send_seq: u8,
    /// V(R): count of in-sequence information frames accepted, modulo 8
    recv_seq: u8,
    peer_busy: bool,
    window: SendWindow,
    statistics: HdlcStatistics,
}

impl LinkInner {
    fn is_up(&self) -> bool {
        matches!(self.state, LinkState::Connected | LinkState::Disconnecting)
    }

    fn reset_sequences(&mut self) {
        self.send_seq = 0;
        self.recv_seq = 0;
        self.peer_busy = false;
    }
}

/// HDLC link endpoint
#[derive(Debug)]
pub struct HdlcLink {
    config: HdlcConfig,
    inner: Mutex<LinkInner>,
    window_space: Notify,
    outbound: mpsc::UnboundedSender<HdlcFrame>,
    events: mpsc::UnboundedSender<HdlcEvent>,
}

impl HdlcLink {
    /// Create a disconnected link and the channels its owner listens on
    pub fn new(config: HdlcConfig) -> (Self, LinkChannels) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let link = Self {
            inner: Mutex::new(LinkInner {
                state: LinkState::Disconnected,
                send_seq: 0,
                recv_seq: 0,
                peer_busy: false,
                window: SendWindow::new(config.effective_window_size()),
                statistics: HdlcStatistics::new(),
            }),
            config,
            window_space: Notify::new(),
            outbound: outbound_tx,
            events: events_tx,
        };
        (
            link,
            LinkChannels {
                outbound: outbound_rx,
                events: events_rx,
            },
        )
    }

    pub fn config(&self) -> &HdlcConfig {
        &self.config
    }

    pub async fn state(&self) -> LinkState {
        self.inner.lock().await.state
    }

    pub async fn send_seq(&self) -> u8 {
        self.inner.lock().await.send_seq
    }

    pub async fn recv_seq(&self) -> u8 {
        self.inner.lock().await.recv_seq
    }

    pub async fn is_peer_busy(&self) -> bool {
        self.inner.lock().await.peer_busy
    }

    pub async fn statistics(&self) -> HdlcStatistics {
        self.inner.lock().await.statistics.clone()
    }

    /// Establish the link with SNRM/UA.
    ///
    /// # Errors
    ///
    /// - [`DlmsError::InvalidState`] unless the link is disconnected
    /// - [`DlmsError::ResponseTimeout`] if no UA arrives in time
    /// - [`DlmsError::UnexpectedResponse`] if the peer answers with anything but UA
    pub async fn connect(&self) -> DlmsResult<()> {
        let reply = {
            let mut inner = self.inner.lock().await;
            if inner.state != LinkState::Disconnected {
                return Err(DlmsError::InvalidState(format!(
                    "connect requires a disconnected link, link is {}",
                    inner.state
                )));
            }
            inner.state = LinkState::Connecting;
            inner.reset_sequences();
            let snrm = self.unnumbered(FrameType::SetNormalResponseMode);
            let reply = inner.window.register(PendingKey::Unnumbered, snrm.clone());
            self.transmit(&mut inner, snrm);
            reply
        };

        let response = self.await_reply(reply, PendingKey::Unnumbered).await?;
        let mut inner = self.inner.lock().await;
        if response.frame_type != FrameType::UnnumberedAcknowledge {
            let error = DlmsError::UnexpectedResponse(format!(
                "{} in reply to SNRM",
                response.frame_type
            ));
            return Err(self.fail(&mut inner, error));
        }
        match inner.state {
            LinkState::Connecting => {}
            // the peer's own SNRM crossed ours and already brought the link up
            LinkState::Connected => return Ok(()),
            _ => return Err(DlmsError::LinkClosed),
        }
        inner.state = LinkState::Connected;
        log::info!(
            "HDLC link {} -> {} connected",
            self.config.local_address,
            self.config.remote_address
        );
        self.emit(HdlcEvent::Connected);
        Ok(())
    }

    /// Release the link with DISC/UA.
    ///
    /// The link ends up disconnected whatever the peer does; a missing or
    /// unexpected reply is still reported to the caller.
    pub async fn disconnect(&self) -> DlmsResult<()> {
        let reply = {
            let mut inner = self.inner.lock().await;
            if inner.state != LinkState::Connected {
                return Err(DlmsError::InvalidState(format!(
                    "disconnect requires a connected link, link is {}",
                    inner.state
                )));
            }
            inner.state = LinkState::Disconnecting;
            let disc = self.unnumbered(FrameType::Disconnect);
            let reply = inner.window.register(PendingKey::Unnumbered, disc.clone());
            self.transmit(&mut inner, disc);
            reply
        };

        let outcome = match timeout(self.config.response_timeout, reply).await {
            Ok(Ok(response))
                if matches!(
                    response.frame_type,
                    FrameType::UnnumberedAcknowledge | FrameType::DisconnectMode
                ) =>
            {
                Ok(())
            }
            Ok(Ok(response)) => Err(DlmsError::UnexpectedResponse(format!(
                "{} in reply to DISC",
                response.frame_type
            ))),
            // torn down by the peer in the meantime
            Ok(Err(_)) => Ok(()),
            Err(_) => Err(DlmsError::ResponseTimeout),
        };

        let mut inner = self.inner.lock().await;
        match outcome {
            Ok(()) => {
                if inner.state != LinkState::Disconnected {
                    self.teardown(&mut inner);
                    self.emit(HdlcEvent::Disconnected);
                }
                log::info!("HDLC link {} released", self.config.remote_address);
                Ok(())
            }
            Err(error) => {
                if error == DlmsError::ResponseTimeout {
                    inner.statistics.timeouts += 1;
                }
                Err(self.fail(&mut inner, error))
            }
        }
    }

    /// Send `payload` in an information frame and wait for the peer's RR.
    ///
    /// Waits for room first when the window is full or the peer signalled RNR.
    pub async fn send_data(&self, payload: impl Into<Bytes>) -> DlmsResult<()> {
        let payload = payload.into();
        if payload.len() > usize::from(self.config.max_info_length) {
            return Err(DlmsError::InvalidData(format!(
                "payload of {} bytes exceeds the maximum information length {}",
                payload.len(),
                self.config.max_info_length
            )));
        }

        let (seq, reply) = loop {
            let mut inner = self.inner.lock().await;
            if inner.state != LinkState::Connected {
                return Err(DlmsError::InvalidState(format!(
                    "send_data requires a connected link, link is {}",
                    inner.state
                )));
            }
            if !inner.peer_busy && inner.window.can_send() {
                let seq = inner.send_seq;
                let frame = HdlcFrame::information(
                    self.config.remote_address,
                    self.config.local_address,
                    seq,
                    inner.recv_seq,
                    payload.clone(),
                );
                inner.send_seq = next_sequence(seq);
                let reply = inner.window.register(PendingKey::Sequence(seq), frame.clone());
                inner.statistics.information_frames_sent += 1;
                self.transmit(&mut inner, frame);
                break (seq, reply);
            }

            let space = self.window_space.notified();
            tokio::pin!(space);
            space.as_mut().enable();
            drop(inner);
            space.await;
        };

        self.await_reply(reply, PendingKey::Sequence(seq)).await?;
        log::trace!("HDLC I-frame {} acknowledged", seq);
        Ok(())
    }

    /// Decode raw bytes from the transport and process the frame.
    pub async fn handle_bytes(&self, raw: &[u8]) -> DlmsResult<()> {
        match HdlcFrame::decode(raw) {
            Ok(frame) => {
                self.handle_frame(frame).await;
                Ok(())
            }
            Err(error) => {
                self.inner.lock().await.statistics.invalid_frames += 1;
                log::warn!("HDLC discarding undecodable input: {}", error);
                Err(error)
            }
        }
    }

    /// Process one frame received from the peer.
    pub async fn handle_frame(&self, frame: HdlcFrame) {
        let mut inner = self.inner.lock().await;
        inner.statistics.frames_received += 1;
        inner.statistics.bytes_received += frame.payload.len() as u64;

        if frame.destination != self.config.local_address
            || frame.source != self.config.remote_address
        {
            log::warn!("HDLC dropping {} not addressed to this link", frame);
            return;
        }
        log::debug!("HDLC <- {}", frame);

        match frame.frame_type {
            FrameType::Information => self.on_information(&mut inner, frame),
            FrameType::ReceiveReady => self.on_receive_ready(&mut inner, frame),
            FrameType::ReceiveNotReady => {
                inner.peer_busy = true;
                self.emit(HdlcEvent::PeerBusy);
            }
            FrameType::Reject => self.on_reject(&mut inner, frame.recv_seq),
            FrameType::SetNormalResponseMode => self.on_set_normal_response_mode(&mut inner),
            FrameType::Disconnect => {
                let ua = self.unnumbered(FrameType::UnnumberedAcknowledge);
                self.transmit(&mut inner, ua);
                self.drop_link(&mut inner);
            }
            FrameType::UnnumberedAcknowledge => {
                if !inner.window.resolve(PendingKey::Unnumbered, frame) {
                    log::debug!("HDLC ignoring unsolicited UA");
                }
            }
            FrameType::DisconnectMode => {
                inner.window.resolve(PendingKey::Unnumbered, frame);
                self.drop_link(&mut inner);
            }
            FrameType::FrameReject => {
                inner.statistics.frames_rejected += 1;
                log::warn!("HDLC peer {} rejected a frame", self.config.remote_address);
                self.emit(HdlcEvent::FrameRejected);
                if matches!(inner.state, LinkState::Connecting | LinkState::Disconnecting) {
                    inner.window.resolve(PendingKey::Unnumbered, frame);
                }
            }
        }
    }

    /// Tear the link down without talking to the peer.
    ///
    /// Every waiting request completes with [`DlmsError::LinkClosed`], which
    /// also cancels its response timer.
    pub async fn abort(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != LinkState::Disconnected || !inner.window.is_empty() {
            log::debug!("HDLC link {} aborted", self.config.remote_address);
        }
        self.drop_link(&mut inner);
    }

    fn on_information(&self, inner: &mut LinkInner, frame: HdlcFrame) {
        if inner.state != LinkState::Connected {
            log::warn!("HDLC dropping {} while {}", frame, inner.state);
            return;
        }
        inner.statistics.information_frames_received += 1;

        if frame.recv_seq != inner.send_seq {
            let mismatch = DlmsError::SequenceMismatch {
                expected: inner.send_seq,
                actual: frame.recv_seq,
            };
            log::warn!("HDLC rejecting {}: {}", frame, mismatch);
            inner.statistics.sequence_errors += 1;
            inner.statistics.rejects_sent += 1;
            let rej = self.supervisory(FrameType::Reject, inner.recv_seq);
            self.transmit(inner, rej);
            return;
        }

        inner.recv_seq = next_sequence(inner.recv_seq);
        let rr = self.supervisory(FrameType::ReceiveReady, frame.send_seq);
        self.transmit(inner, rr);
        self.emit(HdlcEvent::DataReceived(frame.payload));
    }

    fn on_receive_ready(&self, inner: &mut LinkInner, frame: HdlcFrame) {
        let acknowledged = frame.recv_seq;
        if inner.peer_busy {
            log::debug!("HDLC peer {} ready again", self.config.remote_address);
            inner.peer_busy = false;
        }
        if !inner.window.resolve(PendingKey::Sequence(acknowledged), frame) {
            log::debug!("HDLC RR({}) acknowledges nothing pending", acknowledged);
        }
        self.window_space.notify_waiters();
    }

    fn on_reject(&self, inner: &mut LinkInner, seq: u8) {
        inner.statistics.rejects_received += 1;
        self.emit(HdlcEvent::Rejected(seq));

        let recv_seq = inner.recv_seq;
        inner.window.refresh_recv_seq(recv_seq);
        let resend = inner.window.frames_from(seq);
        if resend.is_empty() {
            log::debug!("HDLC REJ({}) matches no pending frame", seq);
            return;
        }
        for frame in resend {
            inner.statistics.retransmissions += 1;
            self.transmit(inner, frame);
        }
    }

    fn on_set_normal_response_mode(&self, inner: &mut LinkInner) {
        let ua = self.unnumbered(FrameType::UnnumberedAcknowledge);
        self.transmit(inner, ua);

        match inner.state {
            LinkState::Disconnected | LinkState::Connected => {
                let was_connected = inner.state == LinkState::Connected;
                inner.window.clear();
                inner.reset_sequences();
                inner.state = LinkState::Connected;
                self.window_space.notify_waiters();
                if !was_connected {
                    log::info!("HDLC link accepted from {}", self.config.remote_address);
                    self.emit(HdlcEvent::Connected);
                }
            }
            LinkState::Connecting => {
                inner.reset_sequences();
                inner.state = LinkState::Connected;
                let ua = self.unnumbered(FrameType::UnnumberedAcknowledge);
                inner.window.resolve(PendingKey::Unnumbered, ua);
                log::info!("HDLC link {} connected by crossing SNRM", self.config.remote_address);
                self.emit(HdlcEvent::Connected);
            }
            state => log::debug!("HDLC answered SNRM while {}", state),
        }
    }

    /// Fail the link with a link-level error
    fn fail(&self, inner: &mut LinkInner, error: DlmsError) -> DlmsError {
        log::warn!("HDLC link {} failed: {}", self.config.remote_address, error);
        let was_up = inner.is_up();
        self.teardown(inner);
        self.emit(HdlcEvent::Error(error.clone()));
        if was_up {
            self.emit(HdlcEvent::Disconnected);
        }
        error
    }

    fn drop_link(&self, inner: &mut LinkInner) {
        let was_up = inner.is_up();
        self.teardown(inner);
        if was_up {
            self.emit(HdlcEvent::Disconnected);
        }
    }

    fn teardown(&self, inner: &mut LinkInner) {
        inner.state = LinkState::Disconnected;
        inner.window.clear();
        inner.reset_sequences();
        self.window_space.notify_waiters();
    }

    async fn await_reply(
        &self,
        reply: oneshot::Receiver<HdlcFrame>,
        key: PendingKey,
    ) -> DlmsResult<HdlcFrame> {
        match timeout(self.config.response_timeout, reply).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(DlmsError::LinkClosed),
            Err(_) => {
                let mut inner: MutexGuard<'_, LinkInner> = self.inner.lock().await;
                if !inner.window.remove(key) {
                    return Err(DlmsError::LinkClosed);
                }
                inner.statistics.timeouts += 1;
                Err(self.fail(&mut inner, DlmsError::ResponseTimeout))
            }
        }
    }

    fn unnumbered(&self, frame_type: FrameType) -> HdlcFrame {
        HdlcFrame::unnumbered(frame_type, self.config.remote_address, self.config.local_address)
    }

    fn supervisory(&self, frame_type: FrameType, recv_seq: u8) -> HdlcFrame {
        HdlcFrame::supervisory(
            frame_type,
            self.config.remote_address,
            self.config.local_address,
            recv_seq,
        )
    }

    fn transmit(&self, inner: &mut LinkInner, frame: HdlcFrame) {
        inner.statistics.frames_sent += 1;
        inner.statistics.bytes_sent += frame.payload.len() as u64;
        log::debug!("HDLC -> {}", frame);
        if self.outbound.send(frame).is_err() {
            log::debug!("HDLC outbound channel closed, frame dropped");
        }
    }

    fn emit(&self, event: HdlcEvent) {
        // the owner may have stopped listening
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hdlc::address::HdlcAddress;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc::error::TryRecvError;

    const LOCAL: HdlcAddress = HdlcAddress::new(0x01, 0x11);
    const REMOTE: HdlcAddress = HdlcAddress::client(0x10);

    fn config() -> HdlcConfig {
        HdlcConfig::new(LOCAL, REMOTE).with_response_timeout(Duration::from_millis(500))
    }

    fn peer_unnumbered(frame_type: FrameType) -> HdlcFrame {
        HdlcFrame::unnumbered(frame_type, LOCAL, REMOTE)
    }

    fn peer_supervisory(frame_type: FrameType, recv_seq: u8) -> HdlcFrame {
        HdlcFrame::supervisory(frame_type, LOCAL, REMOTE, recv_seq)
    }

    fn peer_information(send_seq: u8, recv_seq: u8, payload: &'static [u8]) -> HdlcFrame {
        HdlcFrame::information(LOCAL, REMOTE, send_seq, recv_seq, Bytes::from_static(payload))
    }

    async fn connected_link(config: HdlcConfig) -> (Arc<HdlcLink>, LinkChannels) {
        let (link, mut channels) = HdlcLink::new(config);
        let link = Arc::new(link);
        let connecting = tokio::spawn({
            let link = link.clone();
            async move { link.connect().await }
        });
        let snrm = channels.outbound.recv().await.unwrap();
        assert_eq!(snrm.frame_type, FrameType::SetNormalResponseMode);
        link.handle_frame(peer_unnumbered(FrameType::UnnumberedAcknowledge)).await;
        connecting.await.unwrap().unwrap();
        assert_eq!(channels.events.recv().await, Some(HdlcEvent::Connected));
        (link, channels)
    }

    fn spawn_send(link: &Arc<HdlcLink>, payload: &'static [u8]) -> tokio::task::JoinHandle<DlmsResult<()>> {
        let link = link.clone();
        tokio::spawn(async move { link.send_data(payload).await })
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_connect_moves_through_connecting() {
        let (link, mut channels) = HdlcLink::new(config());
        let link = Arc::new(link);
        let connecting = tokio::spawn({
            let link = link.clone();
            async move { link.connect().await }
        });

        let snrm = channels.outbound.recv().await.unwrap();
        assert_eq!(snrm.destination, REMOTE);
        assert_eq!(snrm.source, LOCAL);
        assert_eq!(link.state().await, LinkState::Connecting);

        link.handle_frame(peer_unnumbered(FrameType::UnnumberedAcknowledge)).await;
        connecting.await.unwrap().unwrap();
        assert_eq!(link.state().await, LinkState::Connected);
        assert_eq!(channels.events.recv().await, Some(HdlcEvent::Connected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out_without_ua() {
        let (link, mut channels) = HdlcLink::new(config());
        assert_eq!(link.connect().await, Err(DlmsError::ResponseTimeout));
        assert_eq!(link.state().await, LinkState::Disconnected);
        assert_eq!(
            channels.events.recv().await,
            Some(HdlcEvent::Error(DlmsError::ResponseTimeout))
        );
        assert_eq!(link.statistics().await.timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ua_from_wrong_address_is_ignored() {
        let (link, mut channels) = HdlcLink::new(config());
        let link = Arc::new(link);
        let connecting = tokio::spawn({
            let link = link.clone();
            async move { link.connect().await }
        });
        channels.outbound.recv().await.unwrap();
        let stranger = HdlcFrame::unnumbered(FrameType::UnnumberedAcknowledge, LOCAL, HdlcAddress::client(0x20));
        link.handle_frame(stranger).await;

        assert_eq!(connecting.await.unwrap(), Err(DlmsError::ResponseTimeout));
        assert_eq!(link.state().await, LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_dm_in_reply_to_snrm_is_unexpected() {
        let (link, mut channels) = HdlcLink::new(config());
        let link = Arc::new(link);
        let connecting = tokio::spawn({
            let link = link.clone();
            async move { link.connect().await }
        });
        channels.outbound.recv().await.unwrap();
        link.handle_frame(peer_unnumbered(FrameType::DisconnectMode)).await;

        assert!(matches!(
            connecting.await.unwrap(),
            Err(DlmsError::UnexpectedResponse(_))
        ));
        assert_eq!(link.state().await, LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_operations_require_matching_state() {
        let (link, _channels) = HdlcLink::new(config());
        assert!(matches!(link.send_data(&b"x"[..]).await, Err(DlmsError::InvalidState(_))));
        assert!(matches!(link.disconnect().await, Err(DlmsError::InvalidState(_))));

        let (link, _channels) = connected_link(config()).await;
        assert!(matches!(link.connect().await, Err(DlmsError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_send_sequence_wraps_after_eight_frames() {
        let (link, channels) = connected_link(config()).await;
        let peer = tokio::spawn({
            let link = link.clone();
            let mut outbound = channels.outbound;
            async move {
                while let Some(frame) = outbound.recv().await {
                    if frame.frame_type == FrameType::Information {
                        link.handle_frame(peer_supervisory(FrameType::ReceiveReady, frame.send_seq))
                            .await;
                    }
                }
            }
        });

        let initial = link.send_seq().await;
        for _ in 0..8 {
            link.send_data(&b"\xC0\x01"[..]).await.unwrap();
        }
        assert_eq!(link.send_seq().await, initial);
        assert_eq!(link.statistics().await.information_frames_sent, 8);
        peer.abort();
    }

    #[tokio::test]
    async fn test_out_of_sequence_information_frame_is_rejected() {
        let (link, mut channels) = connected_link(config()).await;

        link.handle_frame(peer_information(0, 3, b"bad")).await;
        let rej = channels.outbound.recv().await.unwrap();
        assert_eq!(rej.frame_type, FrameType::Reject);
        assert_eq!(rej.recv_seq, 0);
        assert_eq!(link.recv_seq().await, 0);
        assert_eq!(link.statistics().await.sequence_errors, 1);

        link.handle_frame(peer_information(0, 0, b"get")).await;
        let rr = channels.outbound.recv().await.unwrap();
        assert_eq!(rr.frame_type, FrameType::ReceiveReady);
        assert_eq!(link.recv_seq().await, 1);
        assert_eq!(
            channels.events.recv().await,
            Some(HdlcEvent::DataReceived(Bytes::from_static(b"get")))
        );
    }

    #[tokio::test]
    async fn test_full_window_holds_back_sends() {
        let (link, mut channels) = connected_link(config().with_window_size(1)).await;

        let first = spawn_send(&link, b"one");
        let frame = channels.outbound.recv().await.unwrap();
        assert_eq!(frame.send_seq, 0);

        let second = spawn_send(&link, b"two");
        settle().await;
        assert!(matches!(channels.outbound.try_recv(), Err(TryRecvError::Empty)));

        link.handle_frame(peer_supervisory(FrameType::ReceiveReady, 0)).await;
        first.await.unwrap().unwrap();
        let frame = channels.outbound.recv().await.unwrap();
        assert_eq!(frame.send_seq, 1);
        assert_eq!(frame.payload, Bytes::from_static(b"two"));

        link.handle_frame(peer_supervisory(FrameType::ReceiveReady, 1)).await;
        second.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_receive_not_ready_pauses_until_rr() {
        let (link, mut channels) = connected_link(config()).await;
        link.handle_frame(peer_supervisory(FrameType::ReceiveNotReady, 0)).await;
        assert_eq!(channels.events.recv().await, Some(HdlcEvent::PeerBusy));
        assert!(link.is_peer_busy().await);

        let sending = spawn_send(&link, b"data");
        settle().await;
        assert!(matches!(channels.outbound.try_recv(), Err(TryRecvError::Empty)));

        link.handle_frame(peer_supervisory(FrameType::ReceiveReady, 7)).await;
        let frame = channels.outbound.recv().await.unwrap();
        assert_eq!(frame.frame_type, FrameType::Information);
        link.handle_frame(peer_supervisory(FrameType::ReceiveReady, frame.send_seq)).await;
        sending.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_reject_retransmits_pending_frame() {
        let (link, mut channels) = connected_link(config()).await;
        let sending = spawn_send(&link, b"data");
        let original = channels.outbound.recv().await.unwrap();

        link.handle_frame(peer_supervisory(FrameType::Reject, original.send_seq)).await;
        let resent = channels.outbound.recv().await.unwrap();
        assert_eq!(resent.send_seq, original.send_seq);
        assert_eq!(resent.payload, original.payload);
        assert_eq!(channels.events.recv().await, Some(HdlcEvent::Rejected(0)));
        assert_eq!(link.statistics().await.retransmissions, 1);

        link.handle_frame(peer_supervisory(FrameType::ReceiveReady, 0)).await;
        sending.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_with_ua() {
        let (link, mut channels) = connected_link(config()).await;
        let releasing = tokio::spawn({
            let link = link.clone();
            async move { link.disconnect().await }
        });
        let disc = channels.outbound.recv().await.unwrap();
        assert_eq!(disc.frame_type, FrameType::Disconnect);
        assert_eq!(link.state().await, LinkState::Disconnecting);

        link.handle_frame(peer_unnumbered(FrameType::UnnumberedAcknowledge)).await;
        releasing.await.unwrap().unwrap();
        assert_eq!(link.state().await, LinkState::Disconnected);
        assert_eq!(channels.events.recv().await, Some(HdlcEvent::Disconnected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_timeout_still_tears_down() {
        let (link, _channels) = connected_link(config()).await;
        assert_eq!(link.disconnect().await, Err(DlmsError::ResponseTimeout));
        assert_eq!(link.state().await, LinkState::Disconnected);
        assert_eq!(link.send_seq().await, 0);
    }

    #[tokio::test]
    async fn test_peer_disc_closes_pending_send() {
        let (link, mut channels) = connected_link(config()).await;
        let sending = spawn_send(&link, b"data");
        channels.outbound.recv().await.unwrap();

        link.handle_frame(peer_unnumbered(FrameType::Disconnect)).await;
        let ua = channels.outbound.recv().await.unwrap();
        assert_eq!(ua.frame_type, FrameType::UnnumberedAcknowledge);
        assert_eq!(sending.await.unwrap(), Err(DlmsError::LinkClosed));
        assert_eq!(link.state().await, LinkState::Disconnected);
        assert_eq!(channels.events.recv().await, Some(HdlcEvent::Disconnected));
    }

    #[tokio::test]
    async fn test_peer_snrm_is_answered_with_ua() {
        let (link, mut channels) = HdlcLink::new(config());
        link.handle_frame(peer_unnumbered(FrameType::SetNormalResponseMode)).await;

        let ua = channels.outbound.recv().await.unwrap();
        assert_eq!(ua.frame_type, FrameType::UnnumberedAcknowledge);
        assert_eq!(ua.source, LOCAL);
        assert_eq!(ua.destination, REMOTE);
        assert_eq!(link.state().await, LinkState::Connected);
        assert_eq!(channels.events.recv().await, Some(HdlcEvent::Connected));
    }

    #[tokio::test]
    async fn test_peer_snrm_during_connect_completes_it() {
        let (link, mut channels) = HdlcLink::new(config());
        let link = Arc::new(link);
        let connecting = tokio::spawn({
            let link = link.clone();
            async move { link.connect().await }
        });
        let snrm = channels.outbound.recv().await.unwrap();
        assert_eq!(snrm.frame_type, FrameType::SetNormalResponseMode);

        link.handle_frame(peer_unnumbered(FrameType::SetNormalResponseMode)).await;
        let ua = channels.outbound.recv().await.unwrap();
        assert_eq!(ua.frame_type, FrameType::UnnumberedAcknowledge);

        assert_eq!(connecting.await.unwrap(), Ok(()));
        assert_eq!(link.state().await, LinkState::Connected);
        assert_eq!(channels.events.recv().await, Some(HdlcEvent::Connected));
        assert!(matches!(channels.events.try_recv(), Err(TryRecvError::Empty)));

        // the peer's late UA to our SNRM changes nothing
        link.handle_frame(peer_unnumbered(FrameType::UnnumberedAcknowledge)).await;
        assert_eq!(link.state().await, LinkState::Connected);
    }

    #[tokio::test]
    async fn test_frame_reject_keeps_state() {
        let (link, mut channels) = connected_link(config()).await;
        link.handle_frame(peer_unnumbered(FrameType::FrameReject)).await;
        assert_eq!(link.state().await, LinkState::Connected);
        assert_eq!(channels.events.recv().await, Some(HdlcEvent::FrameRejected));
        assert_eq!(link.statistics().await.frames_rejected, 1);
    }

    #[tokio::test]
    async fn test_abort_cancels_pending_request() {
        let (link, mut channels) = connected_link(config()).await;
        let sending = spawn_send(&link, b"data");
        channels.outbound.recv().await.unwrap();

        link.abort().await;
        assert_eq!(sending.await.unwrap(), Err(DlmsError::LinkClosed));
        assert_eq!(link.state().await, LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_handle_bytes_decodes_wire_frames() {
        let (link, mut channels) = HdlcLink::new(config());
        let wire = peer_unnumbered(FrameType::SetNormalResponseMode).encode();
        link.handle_bytes(&wire).await.unwrap();
        assert_eq!(
            channels.outbound.recv().await.unwrap().frame_type,
            FrameType::UnnumberedAcknowledge
        );

        assert!(link.handle_bytes(&[0x7E, 0x01, 0x7E]).await.is_err());
        assert_eq!(link.statistics().await.invalid_frames, 1);
    }
}
