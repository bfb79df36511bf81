use alloy_primitives::Address;
use token_dapp::{abi::EventSpec, contract::LogRecord, Receipt};

use crate::{
    error::Result,
    event::{check_args, decode_args, find_event, Arg},
};

/// Extension trait for asserting an event gets emitted.
pub trait EventExt {
    /// Finds the first log of `spec`.
    ///
    /// # Errors
    ///
    /// May fail if the event was not emitted.
    fn emitted<'a>(&'a self, spec: &'a EventSpec) -> Result<Emitted<'a>>;

    /// Whether `spec` was emitted with `expected` arguments.
    fn emits(&self, spec: &EventSpec, expected: &[Arg]) -> bool {
        self.emitted(spec).and_then(|event| event.with_args(expected)).is_ok()
    }
}

/// A log matched against an event signature.
#[derive(Debug, Clone, Copy)]
pub struct Emitted<'a> {
    spec: &'a EventSpec,
    log: &'a LogRecord,
}

impl<'a> Emitted<'a> {
    /// The matched log.
    #[must_use]
    pub fn log(&self) -> &'a LogRecord {
        self.log
    }

    /// Decoded arguments.
    ///
    /// # Errors
    ///
    /// May fail if the data payload is malformed.
    pub fn args(&self) -> Result<Vec<Arg>> {
        decode_args(self.spec, self.log)
    }

    /// Asserts the event carries exactly `expected`.
    ///
    /// # Errors
    ///
    /// May fail if the arguments differ or can't be decoded.
    pub fn with_args(&self, expected: &[Arg]) -> Result<()> {
        check_args(expected, self.args()?)
    }
}

impl EventExt for Receipt {
    fn emitted<'a>(&'a self, spec: &'a EventSpec) -> Result<Emitted<'a>> {
        let log = find_event(spec, &self.logs)?;
        Ok(Emitted { spec, log })
    }
}

/// Only logs emitted by the contract at the given address are considered.
impl EventExt for (Receipt, Address) {
    fn emitted<'a>(&'a self, spec: &'a EventSpec) -> Result<Emitted<'a>> {
        let (receipt, address) = self;
        let log = find_event(
            spec,
            receipt.logs.iter().filter(|log| log.address == *address),
        )?;
        Ok(Emitted { spec, log })
    }
}
