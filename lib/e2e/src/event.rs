//! Event signature hashing and log decoding.
//!
//! Indexed arguments are read from topics 1.. as their low 20 bytes, which
//! covers `address` parameters. A single trailing non-indexed argument is read
//! from the data payload as a 256-bit unsigned integer. Anything richer needs
//! a full ABI decoder.
use std::fmt;

use alloy_primitives::{hex, Address, B256, U256};
use tiny_keccak::{Hasher, Keccak};
use token_dapp::{
    abi::{Artifact, EventSpec},
    contract::LogRecord,
};

use crate::error::{Error, Result};

/// A decoded (or expected) event argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// An indexed word, as `0x`-prefixed lower-case hex of its low 20 bytes.
    Word(String),
    /// An unsigned integer from the data payload.
    Uint(U256),
}

impl Arg {
    /// Compares words case-insensitively and integers by value.
    #[must_use]
    pub fn matches(&self, other: &Arg) -> bool {
        match (self, other) {
            (Self::Word(a), Self::Word(b)) => a.eq_ignore_ascii_case(b),
            (Self::Uint(a), Self::Uint(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Word(word) => f.write_str(word),
            Self::Uint(value) => write!(f, "{value}"),
        }
    }
}

impl From<Address> for Arg {
    fn from(address: Address) -> Self {
        Self::Word(format!("0x{}", hex::encode(address)))
    }
}

impl From<&str> for Arg {
    fn from(word: &str) -> Self {
        Self::Word(word.to_lowercase())
    }
}

impl From<U256> for Arg {
    fn from(value: U256) -> Self {
        Self::Uint(value)
    }
}

impl From<u64> for Arg {
    fn from(value: u64) -> Self {
        Self::Uint(U256::from(value))
    }
}

/// Canonical signature, e.g. `Transfer(address,address,uint256)`.
#[must_use]
pub fn event_signature(spec: &EventSpec) -> String {
    format!("{}({})", spec.name, spec.arg_types.join(","))
}

/// Keccak-256 of the canonical signature: the event's first topic.
#[must_use]
pub fn signature_hash(spec: &EventSpec) -> B256 {
    let mut output = [0u8; 32];
    let mut hasher = Keccak::v256();
    hasher.update(event_signature(spec).as_bytes());
    hasher.finalize(&mut output);
    B256::from(output)
}

/// Derives the [`EventSpec`] of `name` from a contract artifact.
///
/// # Errors
///
/// * [`Error::UnknownEvent`] if the ABI declares no such event.
pub fn event_spec(artifact: &Artifact, name: &str) -> Result<EventSpec> {
    artifact.event(name).ok_or_else(|| Error::UnknownEvent(name.to_owned()))
}

/// First log whose topic 0 is the signature hash of `spec`.
///
/// # Errors
///
/// * [`Error::EventNotEmitted`] if no log matches.
pub fn find_event<'a, I>(spec: &EventSpec, logs: I) -> Result<&'a LogRecord>
where
    I: IntoIterator<Item = &'a LogRecord>,
{
    let hash = signature_hash(spec);
    logs.into_iter()
        .find(|log| log.topics.first() == Some(&hash))
        .ok_or_else(|| Error::EventNotEmitted(spec.name.clone()))
}

/// Decodes the arguments of `log` as an instance of `spec`.
///
/// # Errors
///
/// * [`Error::MalformedData`] if a trailing argument is expected and the
///   payload is empty or wider than one word.
pub fn decode_args(spec: &EventSpec, log: &LogRecord) -> Result<Vec<Arg>> {
    let mut args: Vec<Arg> = log
        .topics
        .iter()
        .skip(1)
        .map(|topic| Arg::from(Address::from_word(*topic)))
        .collect();

    if spec.arg_types.len() > args.len() {
        let value = Some(&log.data)
            .filter(|data| !data.is_empty())
            .and_then(|data| U256::try_from_be_slice(data))
            .ok_or(Error::MalformedData { len: log.data.len() })?;
        args.push(Arg::Uint(value));
    }
    Ok(args)
}

/// Checks that `logs` contain `spec` emitted with `expected` arguments.
///
/// # Errors
///
/// * [`Error::EventNotEmitted`] if no log carries the signature hash.
/// * [`Error::EventArgsMismatch`] if the first matching log decodes to other
///   arguments.
/// * [`Error::MalformedData`] if the data payload can't be decoded.
pub fn verify<'a, I>(spec: &EventSpec, logs: I, expected: &[Arg]) -> Result<()>
where
    I: IntoIterator<Item = &'a LogRecord>,
{
    let log = find_event(spec, logs)?;
    check_args(expected, decode_args(spec, log)?)
}

pub(crate) fn check_args(expected: &[Arg], actual: Vec<Arg>) -> Result<()> {
    let matches = expected.len() == actual.len()
        && expected.iter().zip(&actual).all(|(e, a)| e.matches(a));
    if matches {
        return Ok(());
    }

    tracing::debug!(?expected, ?actual, "event arguments differ");
    Err(Error::EventArgsMismatch { expected: expected.to_vec(), actual })
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, b256, Bytes};
    use proptest::prelude::*;

    use super::*;

    const ALICE: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");
    const BOB: Address = address!("70997970C51812dc3A010C7d01b50e0d17dc79C8");

    fn transfer_spec() -> EventSpec {
        EventSpec::new("Transfer", ["address", "address", "uint256"])
    }

    fn transfer_log(from: Address, to: Address, amount: U256) -> LogRecord {
        LogRecord {
            address: Address::ZERO,
            topics: vec![
                signature_hash(&transfer_spec()),
                from.into_word(),
                to.into_word(),
            ],
            data: Bytes::from(amount.to_be_bytes::<32>().to_vec()),
        }
    }

    #[test]
    fn hashes_canonical_signature() {
        assert_eq!(
            event_signature(&transfer_spec()),
            "Transfer(address,address,uint256)"
        );
        assert_eq!(
            signature_hash(&transfer_spec()),
            b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef")
        );
    }

    #[test]
    fn verifies_transfer_amount_exactly() {
        let logs = [transfer_log(ALICE, BOB, U256::from(50))];
        let spec = transfer_spec();

        verify(&spec, &logs, &[ALICE.into(), BOB.into(), 50u64.into()]).unwrap();

        let err = verify(&spec, &logs, &[ALICE.into(), BOB.into(), 51u64.into()])
            .unwrap_err();
        assert_eq!(
            err,
            Error::EventArgsMismatch {
                expected: vec![ALICE.into(), BOB.into(), 51u64.into()],
                actual: vec![ALICE.into(), BOB.into(), 50u64.into()],
            }
        );
    }

    #[test]
    fn words_compare_case_insensitively() {
        let logs = [transfer_log(ALICE, BOB, U256::from(1))];
        let expected = [
            Arg::Word("0xF39FD6E51AAD88F6F4CE6AB8827279CFFFB92266".to_owned()),
            "0x70997970C51812dc3A010C7d01b50e0d17dc79C8".into(),
            1u64.into(),
        ];
        verify(&transfer_spec(), &logs, &expected).unwrap();
    }

    #[test]
    fn missing_event_is_reported() {
        let approval = EventSpec::new("Approval", ["address", "address", "uint256"]);
        let logs = [transfer_log(ALICE, BOB, U256::from(1))];
        assert_eq!(
            verify(&approval, &logs, &[]),
            Err(Error::EventNotEmitted("Approval".to_owned()))
        );
    }

    #[test]
    fn argument_count_must_match() {
        let logs = [transfer_log(ALICE, BOB, U256::from(1))];
        assert!(matches!(
            verify(&transfer_spec(), &logs, &[ALICE.into(), BOB.into()]),
            Err(Error::EventArgsMismatch { .. })
        ));
    }

    #[test]
    fn first_matching_log_wins() {
        let logs = [
            LogRecord::default(),
            transfer_log(ALICE, BOB, U256::from(1)),
            transfer_log(BOB, ALICE, U256::from(2)),
        ];
        let log = find_event(&transfer_spec(), &logs).unwrap();
        assert_eq!(log, &logs[1]);
    }

    #[test]
    fn oversized_data_is_malformed() {
        let mut log = transfer_log(ALICE, BOB, U256::from(1));
        log.data = Bytes::from(vec![0u8; 64]);
        assert_eq!(
            decode_args(&transfer_spec(), &log),
            Err(Error::MalformedData { len: 64 })
        );
    }

    #[test]
    fn empty_data_is_malformed() {
        let mut log = transfer_log(ALICE, BOB, U256::from(1));
        log.data = Bytes::new();
        assert_eq!(
            decode_args(&transfer_spec(), &log),
            Err(Error::MalformedData { len: 0 })
        );
        assert_eq!(
            verify(&transfer_spec(), [&log], &[ALICE.into(), BOB.into(), 0u64.into()]),
            Err(Error::MalformedData { len: 0 })
        );
    }

    #[test]
    fn all_indexed_event_ignores_data() {
        let spec = EventSpec::new("Ping", ["address"]);
        let log = LogRecord {
            address: Address::ZERO,
            topics: vec![signature_hash(&spec), ALICE.into_word()],
            data: Bytes::from(vec![0u8; 64]),
        };
        assert_eq!(decode_args(&spec, &log), Ok(vec![ALICE.into()]));
    }

    #[test]
    fn unknown_event_in_artifact() {
        let artifact = Artifact::default();
        assert_eq!(
            event_spec(&artifact, "Transfer"),
            Err(Error::UnknownEvent("Transfer".to_owned()))
        );
    }

    proptest! {
        #[test]
        fn decodes_any_transfer(from: [u8; 20], to: [u8; 20], amount: [u8; 32]) {
            let (from, to) = (Address::from(from), Address::from(to));
            let amount = U256::from_be_bytes(amount);
            let logs = [transfer_log(from, to, amount)];

            prop_assert_eq!(
                decode_args(&transfer_spec(), &logs[0]),
                Ok(vec![from.into(), to.into(), amount.into()])
            );
            let expected: [Arg; 3] = [from.into(), to.into(), amount.into()];
            prop_assert!(verify(&transfer_spec(), &logs, &expected).is_ok());
        }

        #[test]
        fn rejects_any_other_amount(amount: u64, delta in 1u64..) {
            let logs = [transfer_log(ALICE, BOB, U256::from(amount))];
            let other = U256::from(amount) + U256::from(delta);
            let expected: [Arg; 3] = [ALICE.into(), BOB.into(), other.into()];
            prop_assert!(verify(&transfer_spec(), &logs, &expected).is_err());
        }
    }
}
