//! Finite State Machine implementation of the Keeper's Fresh/Running/Locked phase.
//!
//! The implementation leverages zero-sized types to represent the states of the FSM,
//! the same approach `shm_writer/clock_state_fsm.rs` uses for the clock status written
//! to the SHM segment in the teacher: each state is a distinct type, transitions are
//! driven by applying an outcome to the current state, and pattern matching makes sure
//! every combination is covered. Here the axis being tracked is Fresh -> Running ->
//! Locked rather than clock-sync-disruption, and Locked is wired as a true absorbing
//! state: every transition out of it returns Locked regardless of the input, encoding
//! invariant I3 ("once tampered, stays tampered") at the type level.

/// The outcome that drives a transition: did the handshake/integrity check pass?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Ok,
    Failed,
}

/// The phase value exposed to callers, independent of the marker type parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeeperPhase {
    Fresh,
    Running,
    Locked,
}

/// Internal trait to model a FSM transition.
///
/// This trait is a bound on FSMState, which is the public interface. This means this
/// FSMTransition trait has to be marked public too. An alternative implementation would
/// be to have `transition()` be part of FSMState; having this internal trait instead
/// lets us write a blanket implementation of the FSMTransition trait.
pub trait FSMTransition {
    /// Applying `transition()` on a state returns the next state. Because `transition()`
    /// may return more than one type, the return type is boxed.
    fn transition(&self, outcome: HandshakeOutcome) -> Box<dyn FSMState + Send>;
}

/// External trait to execute the FSM that drives the Keeper's phase.
///
/// `Send` is part of the trait object bound (not just an impl detail) because a
/// `Box<dyn FSMState + Send>` lives inside `Keeper`'s `Mutex<Inner>`, and `Keeper` is
/// shared with the heartbeat thread behind an `Arc`.
pub trait FSMState: FSMTransition + Send {
    /// Apply a handshake/integrity outcome to the FSM, possibly changing state.
    fn apply(&self, outcome: HandshakeOutcome) -> Box<dyn FSMState + Send>;

    /// Return the phase this FSM state represents.
    fn phase(&self) -> KeeperPhase;
}

/// Define the possible states of the FSM. These zero-sized unit structs parameterize
/// the more generic `KeeperFsm<T>` struct.
pub struct Fresh;
pub struct Running;
pub struct Locked;

/// The state the FSM is currently in.
///
/// Note the default type parameter is `Fresh`, the state a Keeper starts `initialize()`
/// in before a prior blob has been consulted.
pub struct KeeperFsm<State = Fresh> {
    _state: std::marker::PhantomData<State>,
    phase: KeeperPhase,
}

impl Default for KeeperFsm {
    fn default() -> Self {
        KeeperFsm::<Fresh> {
            _state: std::marker::PhantomData::<Fresh>,
            phase: KeeperPhase::Fresh,
        }
    }
}

/// Macro to generate the per-state constructor, storing the matching phase value.
macro_rules! keeper_fsm_impl {
    ($state:ty, $phase:expr) => {
        impl KeeperFsm<$state> {
            fn new() -> Self {
                KeeperFsm {
                    _state: std::marker::PhantomData::<$state>,
                    phase: $phase,
                }
            }
        }
    };
}

keeper_fsm_impl!(Fresh, KeeperPhase::Fresh);
keeper_fsm_impl!(Running, KeeperPhase::Running);
keeper_fsm_impl!(Locked, KeeperPhase::Locked);

/// Blanket implementation of the external FSMState trait for all KeeperFsm<T>.
impl<T> FSMState for KeeperFsm<T>
where
    KeeperFsm<T>: FSMTransition,
{
    fn phase(&self) -> KeeperPhase {
        self.phase
    }

    fn apply(&self, outcome: HandshakeOutcome) -> Box<dyn FSMState + Send> {
        self.transition(outcome)
    }
}

/// Macro to create a boxed KeeperFsm from a type parameter.
macro_rules! bstate {
    ($state:ty) => {
        Box::new(KeeperFsm::<$state>::new())
    };
}

impl FSMTransition for KeeperFsm<Fresh> {
    fn transition(&self, outcome: HandshakeOutcome) -> Box<dyn FSMState + Send> {
        match outcome {
            HandshakeOutcome::Ok => bstate!(Running),
            HandshakeOutcome::Failed => bstate!(Locked),
        }
    }
}

impl FSMTransition for KeeperFsm<Running> {
    fn transition(&self, outcome: HandshakeOutcome) -> Box<dyn FSMState + Send> {
        match outcome {
            HandshakeOutcome::Ok => bstate!(Running),
            HandshakeOutcome::Failed => bstate!(Locked),
        }
    }
}

impl FSMTransition for KeeperFsm<Locked> {
    /// Locked is absorbing: any outcome, including a further `Ok`, leaves it Locked.
    fn transition(&self, _outcome: HandshakeOutcome) -> Box<dyn FSMState + Send> {
        bstate!(Locked)
    }
}

#[cfg(test)]
mod t_fsm {
    use super::*;

    #[test]
    fn default_starts_fresh() {
        let fsm = KeeperFsm::default();
        assert_eq!(fsm.phase(), KeeperPhase::Fresh);
    }

    #[test]
    fn fresh_ok_moves_to_running() {
        let fsm = bstate!(Fresh);
        let fsm = fsm.apply(HandshakeOutcome::Ok);
        assert_eq!(fsm.phase(), KeeperPhase::Running);
    }

    #[test]
    fn fresh_failed_moves_to_locked() {
        let fsm = bstate!(Fresh);
        let fsm = fsm.apply(HandshakeOutcome::Failed);
        assert_eq!(fsm.phase(), KeeperPhase::Locked);
    }

    #[test]
    fn running_ok_stays_running() {
        let fsm = bstate!(Running);
        let fsm = fsm.apply(HandshakeOutcome::Ok);
        assert_eq!(fsm.phase(), KeeperPhase::Running);
    }

    #[test]
    fn running_failed_moves_to_locked() {
        let fsm = bstate!(Running);
        let fsm = fsm.apply(HandshakeOutcome::Failed);
        assert_eq!(fsm.phase(), KeeperPhase::Locked);
    }

    #[test]
    fn locked_is_absorbing() {
        let fsm = bstate!(Locked);
        let fsm = fsm.apply(HandshakeOutcome::Ok);
        assert_eq!(fsm.phase(), KeeperPhase::Locked);
        let fsm = fsm.apply(HandshakeOutcome::Failed);
        assert_eq!(fsm.phase(), KeeperPhase::Locked);
    }
}
