//! HDLC session layer module

pub mod address;
pub mod config;
pub mod events;
pub mod fcs;
pub mod frame;
pub mod link;
pub mod state;
pub mod statistics;
pub mod window;

pub use address::{HdlcAddress, reserved};
pub use config::{HdlcConfig, MAX_WINDOW_SIZE};
pub use events::HdlcEvent;
pub use fcs::{FcsCalc, crc16};
pub use frame::{FLAG, FrameFormat, FrameType, HdlcFrame, next_sequence};
pub use link::{HdlcLink, LinkChannels};
pub use state::LinkState;
pub use statistics::HdlcStatistics;
pub use window::{PendingKey, SendWindow};
