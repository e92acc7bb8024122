//! Non-panicking error taxonomy of the host boundary.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmigaError {
    /// A configuration value outside the enumerated set. No state change.
    #[error("configuration rejected: {option} = {value}")]
    ConfigRejected { option: &'static str, value: i64 },

    /// Power-on attempted without the required ROMs installed.
    #[error("not ready to power up: {0}")]
    NotReady(&'static str),

    /// A feature the machine does not emulate (e.g. HD drives).
    #[error("unsupported: {0}")]
    UnsupportedFeature(&'static str),

    /// A snapshot with an out-of-range size field or bad header.
    #[error("snapshot corrupt: {0}")]
    SnapshotCorrupt(&'static str),

    /// Operation requires a different emulator state.
    #[error("invalid emulator state for this operation")]
    WrongState,

    /// No snapshot stored under the given index.
    #[error("no such snapshot: {0}")]
    NoSuchSnapshot(usize),
}
