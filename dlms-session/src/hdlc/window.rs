//! Outstanding requests awaiting a reply from the peer
//!
//! Every request that waits for the peer (SNRM, DISC, information frames) is
//! parked here together with a one-shot reply slot. The waiting caller owns
//! the response timer; resolving, removing or clearing an entry completes the
//! caller and thereby cancels its timer.

use crate::hdlc::frame::{FrameType, HdlcFrame};
use tokio::sync::oneshot;

/// Key of a pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingKey {
    /// The SNRM or DISC awaiting UA; at most one exists
    Unnumbered,
    /// Information frame awaiting RR, keyed by its N(S)
    Sequence(u8),
}

#[derive(Debug)]
struct PendingFrame {
    key: PendingKey,
    frame: HdlcFrame,
    reply: oneshot::Sender<HdlcFrame>,
}

/// Send window over pending frames, in transmission order
#[derive(Debug)]
pub struct SendWindow {
    pending: Vec<PendingFrame>,
    window_size: usize,
}

impl SendWindow {
    pub fn new(window_size: usize) -> Self {
        Self {
            pending: Vec::new(),
            window_size: window_size.max(1),
        }
    }

    /// Check if another information frame fits in the window
    pub fn can_send(&self) -> bool {
        self.outstanding() < self.window_size
    }

    /// Number of unacknowledged information frames
    pub fn outstanding(&self) -> usize {
        self.pending
            .iter()
            .filter(|p| matches!(p.key, PendingKey::Sequence(_)))
            .count()
    }

    pub fn contains(&self, key: PendingKey) -> bool {
        self.pending.iter().any(|p| p.key == key)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Park `frame` under `key` and return the slot its reply arrives in.
    ///
    /// An existing entry under the same key is replaced; its waiter sees the
    /// slot close.
    pub fn register(&mut self, key: PendingKey, frame: HdlcFrame) -> oneshot::Receiver<HdlcFrame> {
        self.remove(key);
        let (reply, receiver) = oneshot::channel();
        self.pending.push(PendingFrame { key, frame, reply });
        receiver
    }

    /// Hand `reply` to the request under `key`. Returns false if none was pending.
    pub fn resolve(&mut self, key: PendingKey, reply: HdlcFrame) -> bool {
        match self.pending.iter().position(|p| p.key == key) {
            Some(index) => {
                let entry = self.pending.remove(index);
                // the waiter may already have given up
                let _ = entry.reply.send(reply);
                true
            }
            None => false,
        }
    }

    /// Drop the request under `key`, e.g. after its timer fired
    pub fn remove(&mut self, key: PendingKey) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.key != key);
        before != self.pending.len()
    }

    /// Information frames from N(S) == `seq` onwards, in transmission order
    pub fn frames_from(&self, seq: u8) -> Vec<HdlcFrame> {
        let information: Vec<&PendingFrame> = self
            .pending
            .iter()
            .filter(|p| p.frame.frame_type == FrameType::Information)
            .collect();
        match information
            .iter()
            .position(|p| p.key == PendingKey::Sequence(seq))
        {
            Some(start) => information[start..].iter().map(|p| p.frame.clone()).collect(),
            None => Vec::new(),
        }
    }

    /// Update the N(R) carried by pending information frames before they are resent
    pub fn refresh_recv_seq(&mut self, recv_seq: u8) {
        for entry in &mut self.pending {
            if entry.frame.frame_type == FrameType::Information {
                entry.frame.recv_seq = recv_seq;
            }
        }
    }

    /// Drop every pending request; all waiters see their slot close
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
