//! Application layer module for DLMS/COSEM protocol
//!
//! This crate provides the association side of the simulated meter: client
//! sessions and their limits, the connections that own HDLC links, and the
//! service that keeps both in step.
//!
//! # TODO
//!
//! ## 关联管理
//! - [x] 会话数量限制（总数 / 每个客户端）
//! - [x] 关联状态与失败统计
//! - [x] 非活动会话与连接清理
//! - [x] 链路故障 -> 关联失败事件
//! - [x] SNRM/UA 建链后关联生效, DISC 后释放
//! - [x] 每个客户端的 Association LN 对象
//! - [ ] AARQ/AARE 编码（由外部 API 层处理）

pub mod association;
pub mod connection;
pub mod service;

pub use association::{
    AssociationEvent, AssociationLimits, AssociationManager, AssociationSession, AssociationState,
    SessionRequest, SessionStatistics,
};
pub use connection::{ConnectionInfo, ConnectionManager, ConnectionStatistics, LinkEventSink};
pub use service::{
    ApduHandler, AssociationHandle, AssociationService, ServiceStatistics, SessionInfo,
};
