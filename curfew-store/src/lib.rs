// SPDX-License-Identifier: Apache-2.0

//! Curfew Store
//!
//! This crate implements the low-level, reusable building blocks behind the curfew
//! block-window timekeeper: a clock abstraction, an authenticated cipher, the on-disk
//! `State` record and its codec, and a crash-atomic file store. It owns no policy — the
//! state machine that decides when to lock, debit, or persist lives in `curfewd`.

pub mod cipher;
pub mod clock;
pub mod codec;
pub mod error;
pub mod store;

pub use cipher::{Cipher, Kdf, Sha256Kdf};
pub use clock::{ClockSource, SystemClock};
pub use codec::State;
pub use error::{CipherError, ClockError, CodecError, StoreError};
pub use store::{FileStore, Store};
