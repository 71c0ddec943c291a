//! State Codec: bidirectional conversion between [`State`] and its canonical byte form.
//!
//! Spec contract (spec.md §4.3, §6): round-trip reproduces every field exactly; the
//! plaintext is a fixed-width, fixed-order record with no header magic or version byte
//! (those belong outside the plaintext, if ever needed). Six fields, spec.md §3:
//! `remaining_ms`, `last_mono_ticks`, `last_wall_ticks`, `mono_frequency`, `tampered`,
//! `heartbeat_count`.
//!
//! Grounded on the teacher's preference for `byteorder` over a generic serialization
//! crate for small fixed layouts (`clock-bound-shm/src/shm_header.rs` encodes its header
//! the same way, field by field, rather than reaching for `serde`).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::CodecError;

/// The six-field, in-memory block-window accounting record (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct State {
    /// Time still owed on the current block window. Invariant I1: never negative —
    /// enforced by the type (`u64`) rather than by a runtime check.
    pub remaining_ms: u64,
    /// Monotonic reading at last persist.
    pub last_mono_ticks: i64,
    /// Wall-clock reading (100-ns units) at last persist.
    pub last_wall_ticks: i64,
    /// Ticks per second of the monotonic source at last persist.
    pub mono_frequency: u64,
    /// Sticky flag: once true, no public operation may clear it (invariant I3).
    pub tampered: bool,
    /// Monotonically increasing counter of successful persists.
    pub heartbeat_count: u64,
}

/// Size in bytes of the canonical plaintext encoding: 3 × u64 + 2 × i64 + 1 × u8.
const RECORD_LEN: usize = 8 * 3 + 8 * 2 + 1;

impl State {
    /// Encode this record into its canonical byte form.
    ///
    /// Field order is fixed (spec.md §6): `remaining_ms`, `last_mono_ticks`,
    /// `last_wall_ticks`, `mono_frequency`, `tampered`, `heartbeat_count`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RECORD_LEN);
        buf.write_u64::<LittleEndian>(self.remaining_ms).unwrap();
        buf.write_i64::<LittleEndian>(self.last_mono_ticks).unwrap();
        buf.write_i64::<LittleEndian>(self.last_wall_ticks).unwrap();
        buf.write_u64::<LittleEndian>(self.mono_frequency).unwrap();
        buf.write_u8(self.tampered as u8).unwrap();
        buf.write_u64::<LittleEndian>(self.heartbeat_count).unwrap();
        debug_assert_eq!(buf.len(), RECORD_LEN);
        buf
    }

    /// Decode a canonical byte form produced by [`State::encode`].
    ///
    /// Rejects a buffer of the wrong length, or a `tampered` byte that is neither 0 nor
    /// 1, with [`CodecError`] — `remaining_ms` cannot encode a negative value since the
    /// field is `u64`, so invariant I1 is enforced by the type rather than by a range
    /// check here.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() != RECORD_LEN {
            return Err(CodecError::WrongLength {
                expected: RECORD_LEN,
                actual: bytes.len(),
            });
        }

        let mut cursor = bytes;
        let remaining_ms = cursor.read_u64::<LittleEndian>().unwrap();
        let last_mono_ticks = cursor.read_i64::<LittleEndian>().unwrap();
        let last_wall_ticks = cursor.read_i64::<LittleEndian>().unwrap();
        let mono_frequency = cursor.read_u64::<LittleEndian>().unwrap();
        let tampered_byte = cursor.read_u8().unwrap();
        let heartbeat_count = cursor.read_u64::<LittleEndian>().unwrap();

        let tampered = match tampered_byte {
            0 => false,
            1 => true,
            _ => return Err(CodecError::MalformedState("tampered")),
        };

        Ok(State {
            remaining_ms,
            last_mono_ticks,
            last_wall_ticks,
            mono_frequency,
            tampered,
            heartbeat_count,
        })
    }
}

#[cfg(test)]
mod t_codec {
    use super::*;

    fn sample() -> State {
        State {
            remaining_ms: 3_600_000,
            last_mono_ticks: 123_456_789,
            last_wall_ticks: -42,
            mono_frequency: 1_000_000_000,
            tampered: false,
            heartbeat_count: 7,
        }
    }

    #[test]
    fn round_trips_every_field() {
        let state = sample();
        let bytes = state.encode();
        let decoded = State::decode(&bytes).unwrap();
        assert_eq!(state, decoded);
    }

    #[test]
    fn round_trips_tampered_true() {
        let mut state = sample();
        state.tampered = true;
        let bytes = state.encode();
        assert_eq!(State::decode(&bytes).unwrap(), state);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = State::decode(&[0u8; 3]).unwrap_err();
        assert!(matches!(err, CodecError::WrongLength { .. }));
    }

    #[test]
    fn rejects_malformed_tampered_byte() {
        let mut bytes = sample().encode();
        // `tampered` is the 41st byte: 4 * 8 (remaining) + 8 + 8 (mono/wall ticks) + 8 (freq)
        let tampered_offset = 8 + 8 + 8 + 8;
        bytes[tampered_offset] = 2;
        let err = State::decode(&bytes).unwrap_err();
        assert_eq!(err, CodecError::MalformedState("tampered"));
    }

    #[test]
    fn encoding_length_is_fixed() {
        assert_eq!(sample().encode().len(), RECORD_LEN);
    }
}
