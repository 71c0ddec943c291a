//! Error taxonomy exposed by the `Keeper`'s public API.
//!
//! Mirrors the granularity of `curfew_store::error`: a plain, matchable enum rather
//! than `anyhow`, so an adapter can branch on the specific failure without depending on
//! this binary's error-handling stack. `anyhow` stays the boundary type for `main.rs`
//! and `thread_manager.rs`, same split the teacher draws between its library code and
//! `clock-bound-d`'s own `Cargo.toml` use of `anyhow`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeeperError {
    /// `set_budget` was called while the Keeper is LOCKED.
    #[error("set_budget refused: keeper is locked")]
    RefusedWhileTampered,
}
