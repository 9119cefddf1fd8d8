//! Common utilities and types shared across Switchboard components.

pub mod error;
pub mod logging;

pub use error::{Error, ErrorBody, Result};
