//! Verification helpers for the logs a token transaction emits.
//!
//! [`event`] holds the decoder itself; [`assert`] wraps it in extension
//! traits so tests read as `receipt.emitted(&transfer)?.with_args(&args)`.
mod assert;
mod error;
pub mod event;

pub use assert::{Emitted, EventExt};
pub use error::{Error, Result};
pub use event::{event_spec, signature_hash, verify, Arg};
