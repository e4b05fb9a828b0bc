//! Core definitions relied upon by all unimem-* crates: the error taxonomy,
//! the process-wide result codes and the per-thread native error slot.

pub mod error;
pub mod native_error;
pub mod result;

pub use error::{Error, ErrorKind, ResultCode};
pub use result::Result;
