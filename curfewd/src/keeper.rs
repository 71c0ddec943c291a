//! Keeper: the policy brain of the block-window timekeeper.
//!
//! Owns the in-memory `State`, runs the startup handshake, debits `remaining_ms`
//! against monotonic elapsed time, enforces the tamper freeze, and drives the
//! heartbeat's persists. `Keeper<C: ClockSource, S: Store>` is generic over its two
//! collaborators, the same shape as `ShmUpdater<W: ShmWrite>` in the teacher's
//! `shm_writer.rs`, so unit tests inject a `MockClockSource` and an in-memory `Store`
//! without touching the filesystem or a real clock.
//!
//! Mutation is serialized behind a single `Mutex<Inner>` (the concurrency model's
//! option (a)): the heartbeat thread and every public method acquire the same lock,
//! held only across the in-memory update and the one blocking `Store::save` call, never
//! released and re-acquired mid-operation.

mod fsm;

use std::sync::Mutex;

use tracing::{debug, info, warn};

use curfew_store::{Cipher, ClockSource, Kdf, Sha256Kdf, State, Store, StoreError};

use crate::error::KeeperError;
use crate::events::{CorruptionCause, HeartbeatEvent, TamperEvent};
use fsm::{FSMState, HandshakeOutcome, KeeperFsm};

/// Reference tolerance: the source's handshake used 30 s, within the mandated
/// `5_000..=60_000` range.
pub const DEFAULT_TOLERANCE_MS: u64 = 30_000;
pub const MIN_TOLERANCE_MS: u64 = 5_000;
pub const MAX_TOLERANCE_MS: u64 = 60_000;

/// Wall-clock ticks (100-ns units) per millisecond.
const WALL_TICKS_PER_MS: i64 = 10_000;

struct Inner {
    state: State,
    /// In-memory-only anchor `debit()` measures elapsed time against. Distinct from
    /// `state.last_mono_ticks`, which I5 only refreshes at persist time — `debit()`
    /// must account for time even between persists, so it keeps its own anchor.
    session_anchor_mono_ticks: i64,
    fsm: Box<dyn FSMState + Send>,
}

/// The result of the startup handshake (spec.md §4.5), computed as a pure function of
/// the prior `State` and the current clock readings so it can be unit tested without a
/// `Keeper` in scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HandshakeResult {
    mono_elapsed_ms: u64,
    wall_elapsed_ms: i64,
    discrepancy_ms: u64,
    outcome: HandshakeOutcome,
    remaining_ms: u64,
}

fn mono_elapsed_ms(anchor_ticks: i64, now_ticks: i64, frequency: u64) -> u64 {
    let delta = i128::from(now_ticks) - i128::from(anchor_ticks);
    let frequency = i128::from(frequency.max(1));
    let elapsed = (delta * 1000) / frequency;
    elapsed.max(0) as u64
}

fn compute_handshake(
    prior: &State,
    mono_now: i64,
    wall_now: i64,
    frequency: u64,
    tolerance_ms: u64,
) -> HandshakeResult {
    let mono_elapsed_ms = mono_elapsed_ms(prior.last_mono_ticks, mono_now, frequency);

    let wall_elapsed_ms =
        (i128::from(wall_now) - i128::from(prior.last_wall_ticks)) / i128::from(WALL_TICKS_PER_MS);
    let wall_elapsed_ms = wall_elapsed_ms as i64;

    let discrepancy_ms = (wall_elapsed_ms - mono_elapsed_ms as i64).unsigned_abs();

    if discrepancy_ms > tolerance_ms {
        HandshakeResult {
            mono_elapsed_ms,
            wall_elapsed_ms,
            discrepancy_ms,
            outcome: HandshakeOutcome::Failed,
            remaining_ms: prior.remaining_ms,
        }
    } else {
        HandshakeResult {
            mono_elapsed_ms,
            wall_elapsed_ms,
            discrepancy_ms,
            outcome: HandshakeOutcome::Ok,
            remaining_ms: prior.remaining_ms.saturating_sub(mono_elapsed_ms),
        }
    }
}

/// The tamper-resistant block-window timekeeper.
pub struct Keeper<C: ClockSource, S: Store, K: Kdf = Sha256Kdf> {
    clock: C,
    store: S,
    passphrase: Vec<u8>,
    cipher: Cipher<K>,
    tolerance_ms: u64,
    inner: Mutex<Inner>,
    on_tamper: Mutex<Vec<Box<dyn Fn(TamperEvent) + Send>>>,
    on_heartbeat: Mutex<Vec<Box<dyn Fn(HeartbeatEvent) + Send>>>,
}

impl<C: ClockSource, S: Store> Keeper<C, S, Sha256Kdf> {
    /// Build a Keeper with the default key derivation, the reference tolerance.
    pub fn new(clock: C, store: S, passphrase: Vec<u8>) -> Self {
        Self::with_tolerance(clock, store, passphrase, DEFAULT_TOLERANCE_MS)
    }

    pub fn with_tolerance(clock: C, store: S, passphrase: Vec<u8>, tolerance_ms: u64) -> Self {
        Self::with_kdf(clock, store, passphrase, Sha256Kdf, tolerance_ms)
    }
}

impl<C: ClockSource, S: Store, K: Kdf> Keeper<C, S, K> {
    pub fn with_kdf(clock: C, store: S, passphrase: Vec<u8>, kdf: K, tolerance_ms: u64) -> Self {
        let tolerance_ms = tolerance_ms.clamp(MIN_TOLERANCE_MS, MAX_TOLERANCE_MS);
        Keeper {
            clock,
            store,
            passphrase,
            cipher: Cipher::with_kdf(kdf),
            tolerance_ms,
            inner: Mutex::new(Inner {
                state: State {
                    remaining_ms: 0,
                    last_mono_ticks: 0,
                    last_wall_ticks: 0,
                    mono_frequency: 1,
                    tampered: false,
                    heartbeat_count: 0,
                },
                session_anchor_mono_ticks: 0,
                fsm: Box::<KeeperFsm>::default(),
            }),
            on_tamper: Mutex::new(Vec::new()),
            on_heartbeat: Mutex::new(Vec::new()),
        }
    }

    /// Register a callback invoked synchronously when LOCKED is entered. Register
    /// before calling `initialize` — `TamperDetected` fires at most once, at entry.
    pub fn on_tamper_detected(&self, callback: impl Fn(TamperEvent) + Send + 'static) {
        self.on_tamper.lock().unwrap().push(Box::new(callback));
    }

    /// Register a callback invoked after every successful heartbeat persist.
    pub fn on_heartbeat_saved(&self, callback: impl Fn(HeartbeatEvent) + Send + 'static) {
        self.on_heartbeat.lock().unwrap().push(Box::new(callback));
    }

    fn emit_tamper(&self, event: TamperEvent) {
        for cb in self.on_tamper.lock().unwrap().iter() {
            cb(event);
        }
    }

    fn emit_heartbeat(&self, event: HeartbeatEvent) {
        for cb in self.on_heartbeat.lock().unwrap().iter() {
            cb(event);
        }
    }

    /// Must be called exactly once per Keeper instance before any other operation.
    pub fn initialize(&self, initial_budget_ms: u64) {
        let mut inner = self.inner.lock().unwrap();

        match self.store.load() {
            Err(StoreError::NotFound) => {
                debug!("No prior state file, starting fresh");
                inner.state = State {
                    remaining_ms: initial_budget_ms,
                    last_mono_ticks: 0,
                    last_wall_ticks: 0,
                    mono_frequency: self.clock.mono_frequency(),
                    tampered: false,
                    heartbeat_count: 0,
                };
                inner.session_anchor_mono_ticks = self.clock.mono_now();
                self.persist(&mut inner, false);
            }
            Err(StoreError::Io(e)) => {
                warn!("State file unreadable, entering locked state: {e}");
                self.enter_locked(&mut inner, initial_budget_ms, Some(CorruptionCause::Unreadable));
            }
            Ok(blob) => match self.decode_blob(&blob) {
                Err(cause) => {
                    warn!("Prior state failed integrity checks, entering locked state");
                    self.enter_locked(&mut inner, initial_budget_ms, Some(cause));
                }
                Ok(prior) => {
                    let mono_now = self.clock.mono_now();
                    let wall_now = self.clock.wall_now();
                    let frequency = self.clock.mono_frequency();
                    let result =
                        compute_handshake(&prior, mono_now, wall_now, frequency, self.tolerance_ms);

                    inner.fsm = inner.fsm.apply(result.outcome);
                    inner.session_anchor_mono_ticks = mono_now;

                    match result.outcome {
                        HandshakeOutcome::Ok => {
                            // Invariant I3: once `prior.tampered` is true it stays true, and
                            // no public operation — including this restart handshake — may
                            // decrease `remaining_ms` while tampered.
                            inner.state = State {
                                remaining_ms: if prior.tampered {
                                    prior.remaining_ms
                                } else {
                                    result.remaining_ms
                                },
                                tampered: prior.tampered,
                                ..prior
                            };
                            self.persist(&mut inner, false);
                        }
                        HandshakeOutcome::Failed => {
                            inner.state = State { tampered: true, ..prior };
                            self.persist(&mut inner, false);
                            self.emit_tamper(TamperEvent {
                                mono_elapsed_ms: result.mono_elapsed_ms,
                                wall_elapsed_ms: result.wall_elapsed_ms,
                                discrepancy_ms: result.discrepancy_ms,
                                corruption_cause: None,
                            });
                        }
                    }
                }
            },
        }
    }

    fn enter_locked(
        &self,
        inner: &mut Inner,
        initial_budget_ms: u64,
        corruption_cause: Option<CorruptionCause>,
    ) {
        inner.state = State {
            remaining_ms: initial_budget_ms,
            last_mono_ticks: 0,
            last_wall_ticks: 0,
            mono_frequency: self.clock.mono_frequency(),
            tampered: true,
            heartbeat_count: 0,
        };
        inner.session_anchor_mono_ticks = self.clock.mono_now();
        inner.fsm = inner.fsm.apply(HandshakeOutcome::Failed);
        self.persist(inner, false);
        self.emit_tamper(TamperEvent {
            mono_elapsed_ms: 0,
            wall_elapsed_ms: 0,
            discrepancy_ms: 0,
            corruption_cause,
        });
    }

    fn decode_blob(&self, blob: &[u8]) -> Result<State, CorruptionCause> {
        let plaintext = self
            .cipher
            .decrypt(&self.passphrase, blob)
            .map_err(CorruptionCause::Cipher)?;
        State::decode(&plaintext).map_err(CorruptionCause::Codec)
    }

    /// Assign a new budget. Refused while LOCKED.
    pub fn set_budget(&self, new_ms: u64) -> Result<(), KeeperError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state.tampered {
            return Err(KeeperError::RefusedWhileTampered);
        }
        inner.state.remaining_ms = new_ms;
        inner.session_anchor_mono_ticks = self.clock.mono_now();
        self.persist(&mut inner, false);
        Ok(())
    }

    /// Debit `remaining_ms` by monotonic time elapsed since the last debit. A no-op
    /// while LOCKED. Does not persist — the heartbeat and `dispose` do that.
    pub fn debit(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.debit_locked(&mut inner);
    }

    fn debit_locked(&self, inner: &mut Inner) {
        if inner.state.tampered {
            return;
        }
        let now = self.clock.mono_now();
        let elapsed_ms =
            mono_elapsed_ms(inner.session_anchor_mono_ticks, now, self.clock.mono_frequency());
        inner.state.remaining_ms = inner.state.remaining_ms.saturating_sub(elapsed_ms);
        inner.session_anchor_mono_ticks = now;
    }

    /// Current remaining budget, in milliseconds.
    pub fn remaining(&self) -> u64 {
        self.inner.lock().unwrap().state.remaining_ms
    }

    /// Whether the Keeper has entered the sticky LOCKED state.
    pub fn is_tampered(&self) -> bool {
        self.inner.lock().unwrap().state.tampered
    }

    /// Called by the heartbeat thread on every tick: debit, then persist, then emit
    /// `HeartbeatSaved` on success.
    pub fn heartbeat_tick(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.debit_locked(&mut inner);
        self.persist(&mut inner, true);
    }

    /// Stop the heartbeat (caller's responsibility via `thread_manager`), run a final
    /// debit and persist. Idempotent.
    pub fn dispose(&self) {
        let mut inner = self.inner.lock().unwrap();
        self.debit_locked(&mut inner);
        self.persist(&mut inner, false);
        info!("Keeper disposed, final state persisted");
    }

    /// Encode, encrypt and write the in-memory `State`. Refreshes the persisted clock
    /// readings (I5) on every call. A write failure is logged and swallowed — the
    /// in-memory `State` stays authoritative and the next heartbeat retries.
    fn persist(&self, inner: &mut Inner, is_heartbeat: bool) {
        inner.state.last_mono_ticks = self.clock.mono_now();
        inner.state.last_wall_ticks = self.clock.wall_now();
        inner.state.mono_frequency = self.clock.mono_frequency();
        if is_heartbeat {
            inner.state.heartbeat_count += 1;
        }

        let plaintext = inner.state.encode();
        let blob = self.cipher.encrypt(&self.passphrase, &plaintext);

        match self.store.save(&blob) {
            Ok(()) => {
                if is_heartbeat {
                    self.emit_heartbeat(HeartbeatEvent {
                        remaining_ms: inner.state.remaining_ms,
                        heartbeat_count: inner.state.heartbeat_count,
                    });
                }
            }
            Err(e) => {
                warn!("state persist failed, will retry on next heartbeat: {e}");
            }
        }
    }
}
