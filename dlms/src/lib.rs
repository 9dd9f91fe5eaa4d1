//! DLMS/COSEM smart-meter endpoint simulator
//!
//! This library simulates the meter side of DLMS/COSEM: a COSEM object model
//! addressed by OBIS codes, reached over an HDLC link and guarded by
//! associations and per-client access rights.
//!
//! # Architecture
//!
//! This library is organized as a workspace with multiple crates:
//!
//! - `dlms-core`: errors, OBIS codes and the `DataObject` value union
//! - `dlms-session`: HDLC link layer (frames, FCS, link state machine)
//! - `dlms-security`: access control, audit log, key material
//! - `dlms-application`: associations, sessions and connections
//! - `dlms-interface`: COSEM interface classes and the object registry
//! - `dlms-server`: the simulated logical device and its GET/SET/ACTION services
//!
//! # Implementation Status
//!
//! ## ✅ 已完成
//! - 核心数据类型（DataObject, ObisCode）
//! - HDLC 会话层（地址、帧、FCS、连接、滑动窗口）
//! - 安全层（访问控制、审计日志、密钥管理）
//! - 关联与连接管理
//! - 接口类（Data, Register, Extended Register, Clock, Script Table,
//!   Association LN, Activity Calendar, Profile Generic, Push Setup, Security Setup）
//! - 服务器（标准对象集，带访问控制的 GET/SET/ACTION）
//!
//! ## 📋 不在范围内
//! - 真实的串口 / TCP 传输
//! - APDU 编解码与 REST API 层
//!
//! # Usage
//!
//! ```no_run
//! use dlms::server::{DlmsServer, ServerConfig};
//! use dlms::application::SessionRequest;
//! use dlms::interface::Register;
//! use dlms::ObisCode;
//!
//! # async fn demo(snrm_from_peer: &[u8]) -> dlms::DlmsResult<()> {
//! let server = DlmsServer::new(ServerConfig::default()).await?;
//! server.grant_all(16).await?;
//! let handle = server.open_association(SessionRequest::new(16)).await?;
//! // served once the peer's SNRM has connected the link
//! server.receive(handle.connection_id, snrm_from_peer).await?;
//! let energy = server
//!     .get(handle.session_id, Register::CLASS_ID, ObisCode::new(1, 0, 1, 8, 0, 255), 2)
//!     .await?;
//! # Ok(())
//! # }
//! ```

// Re-export core types
pub use dlms_core::{BitString, DataObject, DataObjectType, DlmsError, DlmsResult, ObisCode};

// Re-export HDLC link layer
pub mod session {
    pub use dlms_session::*;
}

// Re-export security layer
pub mod security {
    pub use dlms_security::*;
}

// Re-export association layer
pub mod application {
    pub use dlms_application::*;
}

// Re-export interface classes
pub mod interface {
    pub use dlms_interface::*;
}

// Re-export server API
pub mod server {
    pub use dlms_server::*;
}
