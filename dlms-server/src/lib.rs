//! DLMS/COSEM server implementation
//!
//! This crate provides the simulated meter itself: one logical device with
//! its standard object set, reachable through associations and guarded by
//! per-client access rights.
//!
//! # TODO
//!
//! ## 服务器基础
//! - [x] 服务器配置管理
//! - [x] COSEM 对象注册表
//! - [x] 标准对象集（时钟、电能、瞬时值、计费曲线、块负荷曲线、推送、安全、脚本、费率日历）
//! - [x] 关联管理（Association）
//! - [ ] 多逻辑设备
//!
//! ## 请求处理
//! - [x] GET / SET / ACTION 请求处理
//! - [x] 请求验证和授权
//! - [ ] APDU 编解码（由外部 API 层处理）

pub mod objects;
pub mod server;

pub use objects::StandardObjects;
pub use server::{DlmsServer, ServerConfig};
