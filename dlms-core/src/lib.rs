//! Core types and utilities for the DLMS/COSEM meter simulator
//!
//! This crate provides the fundamental building blocks shared by every other
//! crate in the workspace:
//!
//! - [`DlmsError`] / [`DlmsResult`]: the single error taxonomy
//! - [`ObisCode`]: six byte object identifiers with wildcard matching
//! - [`DataObject`]: the closed union of attribute values

pub mod datatypes;
pub mod error;
pub mod obis_code;

pub use datatypes::{BitString, DataObject, DataObjectType};
pub use error::{DlmsError, DlmsResult};
pub use obis_code::ObisCode;
