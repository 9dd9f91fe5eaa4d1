//! HDLC statistics collection

/// Counters for one HDLC link
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HdlcStatistics {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub information_frames_sent: u64,
    pub information_frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Information frames sent again after a REJ
    pub retransmissions: u64,
    pub rejects_sent: u64,
    pub rejects_received: u64,
    /// FRMR frames received from the peer
    pub frames_rejected: u64,
    /// Raw input that failed to decode
    pub invalid_frames: u64,
    pub timeouts: u64,
    pub sequence_errors: u64,
}

impl HdlcStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all counters
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Share of traffic that ended in an error, as a percentage
    pub fn error_rate(&self) -> f64 {
        let errors = self.frames_rejected + self.invalid_frames + self.sequence_errors + self.timeouts;
        let total = self.frames_received + self.frames_sent;
        if total == 0 {
            0.0
        } else {
            errors as f64 / total as f64 * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_rate() {
        let mut stats = HdlcStatistics::new();
        assert_eq!(stats.error_rate(), 0.0);
        stats.frames_sent = 6;
        stats.frames_received = 4;
        stats.sequence_errors = 1;
        assert!((stats.error_rate() - 10.0).abs() < f64::EPSILON);
        stats.clear();
        assert_eq!(stats, HdlcStatistics::default());
    }
}
