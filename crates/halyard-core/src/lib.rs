//! halyard-core: ADC protocol and auto-search core for the halyard
//! client.
//!
//! This crate provides:
//! - The ADC line codec and typed command dispatch
//! - The auto-search item model, scheduler and result matcher
//! - Atomic persistence of the auto-search store
//! - Logging setup shared by the client binaries

pub mod constants;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod search;

pub use error::{Error, Result};
pub use logging::{init_logging, LogFormat};
