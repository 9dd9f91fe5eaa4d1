//! Session layer module for DLMS/COSEM protocol
//!
//! This crate provides the HDLC link layer a simulated meter endpoint talks
//! over: frame codec, sequence numbering, send window and the link state
//! machine.
//!
//! # TODO
//!
//! ## HDLC 会话层
//! - [x] HDLC 地址编码/解码
//! - [x] HDLC 帧编码/解码
//! - [x] FCS / HCS 计算和验证
//! - [x] SNRM/UA 连接建立, DISC/UA 连接释放
//! - [x] 滑动窗口 (RR / RNR / REJ)
//! - [x] HDLC统计信息收集
//! - [ ] 信息字段分段 (segmentation bit in the format field)

pub mod hdlc;

pub use hdlc::*;
