//! # Error Handling
//!
//! Error handling for the resource builder. Every phase of a build wraps the
//! errors of its sub-components with a short context prefix, so the rendered
//! chain reads outermost-first while [`Error::root_cause`] yields the short
//! message that belongs in a status field.

pub mod types;

pub use types::{Error, ErrorKind, Result, ResultExt};
