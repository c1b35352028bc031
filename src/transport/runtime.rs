//! Background receive thread for one transport.
//!
//! Each attached transport owns a named thread that polls its medium,
//! runs the inbound pipeline, applies accepted records to the store and
//! forwards packets that still have TTL. The thread holds only a weak
//! reference to the store so dropping the last store handle ends it.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::TransportCore;
use crate::error::TransportError;
use crate::knowledge::WeakKnowledgeBase;

/// Upper bound on a single blocking receive.
pub(crate) const RECEIVE_POLL: Duration = Duration::from_millis(20);

pub(crate) struct ReceiveLoop {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ReceiveLoop {
    pub(crate) fn start(core: Arc<TransportCore>, kb: WeakKnowledgeBase) -> Result<Self, TransportError> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let name = format!("swarmkb-recv-{}", core.id());
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || run(&core, &kb, &thread_stop))
            .map_err(|e| TransportError::ConnectionFailed {
                message: format!("failed to spawn receive thread: {e}"),
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub(crate) fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Wait for the thread to exit. A no-op when called from the thread itself,
    /// which happens if the receive loop held the last store handle.
    pub(crate) fn join(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let name = handle.thread().name().unwrap_or("receive").to_string();
                if let Err(payload) = handle.join() {
                    warn!(
                        thread = %name,
                        panic = %panic_message(payload.as_ref()),
                        "receive thread panicked"
                    );
                }
            }
        }
    }
}

impl Drop for ReceiveLoop {
    fn drop(&mut self) {
        self.join();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

fn run(core: &TransportCore, kb: &WeakKnowledgeBase, stop: &AtomicBool) {
    debug!(transport = %core.id(), "receive loop started");
    while !stop.load(Ordering::Acquire) {
        let packet = match core.medium().recv(RECEIVE_POLL) {
            Ok(Some(packet)) => packet,
            Ok(None) => continue,
            Err(TransportError::Closed) => break,
            Err(e) => {
                warn!(transport = %core.id(), error = %e, "receive failed");
                thread::sleep(RECEIVE_POLL);
                continue;
            }
        };

        let Some(inbound) = core.receive(&packet) else {
            continue;
        };
        let Some(store) = kb.upgrade() else {
            break;
        };
        match store.apply_remote(&inbound.records, inbound.clock()) {
            Ok(applied) => trace!(transport = %core.id(), applied, "applied inbound records"),
            Err(e) => warn!(transport = %core.id(), error = %e, "failed to apply inbound records"),
        }
        drop(store);

        if let Err(e) = core.rebroadcast(&inbound) {
            debug!(transport = %core.id(), error = %e, "rebroadcast failed");
        }
    }
    debug!(transport = %core.id(), "receive loop stopped");
}
