//! Error taxonomy for the building blocks in this crate.
//!
//! Each component gets its own enum, mirroring the granularity the teacher repo used for
//! `ShmError`: plain, comparable variants rather than one catch-all error type. `thiserror`
//! gives each a `Display`/`std::error::Error` impl so the daemon layer can wrap them in
//! `anyhow` without writing that boilerplate by hand.

use thiserror::Error;

/// Failure modes of [`crate::clock::ClockSource`] construction and reads.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    /// The platform could not supply the requested clock reading.
    #[error("clock source unavailable (errno {0})")]
    Unavailable(i32),
}

/// Failure modes of [`crate::cipher::Cipher`] decryption.
///
/// All three variants collapse to a single observable `integrity-violation` once they
/// reach the Keeper layer (spec.md §4.2, §7); they stay distinct here so unit tests can
/// assert on the specific cause.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    /// Input shorter than the nonce prefix.
    #[error("ciphertext shorter than the nonce prefix")]
    TooShort,
    /// AEAD authentication failed: wrong key, bit-flip, or truncated ciphertext body.
    #[error("ciphertext failed authentication")]
    AuthFailure,
}

/// Failure modes of [`crate::codec::State`] decoding.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The buffer is not the exact length of the canonical encoding.
    #[error("state record has the wrong length: expected {expected}, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    /// A field decoded to a value outside its valid range (e.g. `tampered` not 0/1).
    #[error("state record field out of range: {0}")]
    MalformedState(&'static str),
}

/// Failure modes of [`crate::store::Store`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No prior blob exists at the configured path.
    #[error("no state file at the configured path")]
    NotFound,
    /// A filesystem operation failed.
    #[error("state file I/O error: {0}")]
    Io(#[from] std::io::Error),
}
