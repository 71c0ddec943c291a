use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{panicking, spawn};
use std::time::Duration;

use tracing::{debug, error, info};

use curfew_store::{ClockSource, Kdf, Store};

use crate::channels::{self, DispatchBox};
use crate::keeper::Keeper;
use crate::{ChannelId, Message};

/// Context passed to newly spawned threads
///
/// This structure encapsulate context information passed to threads. This include the
/// mailbox/dispatch box MPSC information for threads to communicate, and can be extended.
pub struct Context {
    /// The channel identifier for this thread
    pub channel_id: ChannelId,

    /// The receiving end of the MPSC channel the thread receives on.
    pub mbox: Receiver<Message>,

    /// The DispatchBox to send message to any other thread.
    pub dbox: DispatchBox<ChannelId, Message>,
}

impl Drop for Context {
    /// A context is passed to each thread, implementing Drop gives an opportunity to gracefully
    /// shut everything down, or recover. Before the context is finally dropped, send a message
    /// back to the main thread and let it "do the right thing".
    fn drop(&mut self) {
        // Distinguish between a panic and a "normal" termination of the thread.
        let message = if panicking() {
            Message::ThreadPanic(self.channel_id.clone())
        } else {
            Message::ThreadTerminate(self.channel_id.clone())
        };

        match self.dbox.send(&ChannelId::MainThread, message) {
            Ok(()) => debug!(
                "Thread {:?} signalled the main thread it Drop'ed",
                self.channel_id
            ),
            Err(_) => error!(
                "Thread {:?} failed to signal back to the main thread",
                self.channel_id
            ),
        }
    }
}

/// Send an Abort message to all threads
///
/// Iterate over the DispatchBox to send an Abort message to every thread. This effectively asks
/// every thread to terminate gracefully.
fn broadcast_abort(dispatchbox: DispatchBox<ChannelId, Message>) {
    // The main thread is filtered out (no need to signal to it), but no attempt is made to
    // prevent sending to a thread that may already be dead; that failure is silently ignored.
    debug!("Broadcasting Abort message to all threads");
    let _res: Vec<_> = dispatchbox
        .keys()
        .filter(|chan| **chan != ChannelId::MainThread)
        .map(|chan| dispatchbox.send(chan, Message::ThreadAbort))
        .collect();
}

/// Drive the Keeper's periodic heartbeat: tick, then wait up to `period` for an abort.
///
/// Scheduling follows the `recv_timeout` idiom: the wait doubles as the sleep between ticks and
/// as the wake-up channel for `ThreadAbort`, so `dispose()` returns within one heartbeat period
/// rather than waiting out a plain `thread::sleep`.
fn run_heartbeat<C, S, K>(ctx: Context, keeper: Arc<Keeper<C, S, K>>, period: Duration)
where
    C: ClockSource + Send + Sync + 'static,
    S: Store + Send + Sync + 'static,
    K: Kdf + Send + Sync + 'static,
{
    let mut keep_running = true;
    while keep_running {
        keeper.heartbeat_tick();

        match ctx.mbox.recv_timeout(period) {
            Ok(Message::ThreadAbort) => {
                info!("Received message to stop the heartbeat");
                keep_running = false;
            }
            Ok(msg) => info!("Received unexpected message {:?}", msg),
            Err(mpsc::RecvTimeoutError::Timeout) => (),
            Err(e) => error!("Error reading from MPSC channel: {:?}", e),
        }
    }
}

/// Spawn the heartbeat thread and run the main thread's supervision loop until shutdown.
///
/// `ready` is invoked with the freshly built `DispatchBox` before the (blocking) supervision
/// loop starts, so the caller can stash it somewhere a signal handler can reach — signal
/// callbacks are bare `fn` pointers with no captures, so there is no other way to hand them a
/// way to wake the heartbeat thread early.
pub fn run<C, S, K>(
    keeper: Arc<Keeper<C, S, K>>,
    heartbeat_period: Duration,
    ready: impl FnOnce(DispatchBox<ChannelId, Message>),
) where
    C: ClockSource + Send + Sync + 'static,
    S: Store + Send + Sync + 'static,
    K: Kdf + Send + Sync + 'static,
{
    let ids = vec![ChannelId::MainThread, ChannelId::Heartbeat];
    let (mut mailbox, dispatchbox) = channels::new_channel_web::<ChannelId, Message>(ids);

    let mbox = mailbox
        .get_mailbox(&ChannelId::Heartbeat)
        .expect("Heartbeat channel missing from the channel web");
    let ctx = Context {
        mbox,
        dbox: dispatchbox.clone(),
        channel_id: ChannelId::Heartbeat,
    };
    let heartbeat_handle = spawn(move || run_heartbeat(ctx, keeper, heartbeat_period));

    ready(dispatchbox.clone());

    let mbox = mailbox
        .get_mailbox(&ChannelId::MainThread)
        .expect("MainThread channel missing from the channel web");
    loop {
        match mbox.recv() {
            Ok(Message::ThreadTerminate(channel_id)) => {
                info!("Received terminate message from {:?}", channel_id);
                broadcast_abort(dispatchbox.clone());
                break;
            }
            Ok(Message::ThreadPanic(channel_id)) => {
                error!("Received panic message from {:?}", channel_id);
                broadcast_abort(dispatchbox.clone());
                break;
            }
            Ok(_) => (),
            Err(e) => {
                error!("Lost communication with the heartbeat thread, {:?}", e);
                broadcast_abort(dispatchbox.clone());
                break;
            }
        }
    }

    let _ = heartbeat_handle.join();

    info!("curfewd is exiting");
}
