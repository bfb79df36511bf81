use crate::event::Arg;

/// Result alias for event verification.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Why an event could not be verified.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No log carries the event's signature hash.
    #[error("event `{0}` was not emitted")]
    EventNotEmitted(String),
    /// The event was emitted with other arguments.
    #[error("event arguments mismatch: expected [{}], got [{}]", join(.expected), join(.actual))]
    EventArgsMismatch {
        /// Arguments the caller asked for.
        expected: Vec<Arg>,
        /// Arguments decoded from the log.
        actual: Vec<Arg>,
    },
    /// The contract ABI declares no such event.
    #[error("event `{0}` is not declared in the contract ABI")]
    UnknownEvent(String),
    /// The data payload is empty or doesn't fit a single 256-bit word.
    #[error("event data is {len} bytes, expected 1 to 32")]
    MalformedData {
        /// Payload length.
        len: usize,
    },
}

fn join(args: &[Arg]) -> String {
    args.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}
