//! Keeper event surface: `TamperDetected` and `HeartbeatSaved`.
//!
//! Modeled as plain data passed to registered callbacks, invoked synchronously from
//! whichever thread drives the transition — the "language-native event pattern" note
//! carried over from the source as a `Vec<Box<dyn Fn(..) + Send>>` rather than a full
//! pub/sub crate, since no dynamic unsubscribe is required.

use curfew_store::{CipherError, CodecError};

/// Why the prior blob was judged unreadable, when that's the cause of locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionCause {
    /// Decryption or authentication of the prior blob failed.
    Cipher(CipherError),
    /// The decrypted plaintext failed to parse as a `State` record.
    Codec(CodecError),
    /// The Store could not even be read (not a `NotFound`, a genuine I/O failure).
    Unreadable,
}

/// Emitted at most once per Keeper instance, at the moment LOCKED is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TamperEvent {
    pub mono_elapsed_ms: u64,
    pub wall_elapsed_ms: i64,
    pub discrepancy_ms: u64,
    pub corruption_cause: Option<CorruptionCause>,
}

/// Emitted after every successful persist driven by the heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatEvent {
    pub remaining_ms: u64,
    pub heartbeat_count: u64,
}
