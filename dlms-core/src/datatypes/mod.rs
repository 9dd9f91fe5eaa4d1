//! Data types used by COSEM attributes

pub mod bit_string;
pub mod data_object;

pub use bit_string::BitString;
pub use data_object::{DataObject, DataObjectType};
