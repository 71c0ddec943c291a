// SPDX-License-Identifier: Apache-2.0

//! curfewd
//!
//! This crate implements the block-window enforcement daemon: the `Keeper` state
//! machine that owns the tamper-resistant budget, the heartbeat/signal threading that
//! drives it, and the CLI binary in `main.rs`.

pub mod channels;
pub mod error;
pub mod events;
pub mod keeper;
pub mod signal;
pub mod thread_manager;

/// The set of unique channel IDs for message passing between threads.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum ChannelId {
    /// The main thread.
    MainThread,

    /// The thread that owns the Keeper and drives its periodic heartbeat.
    Heartbeat,
}

/// The type of messages exchanged between threads.
///
/// The variant names loosely follow the convention that the name starts with the
/// thread/component that originates the message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Message {
    /// A thread signalling it has terminated.
    ThreadTerminate(ChannelId),

    /// A thread signalling it has panicked.
    ThreadPanic(ChannelId),

    /// Stop all threads and processing.
    ThreadAbort,
}
