use std::sync::atomic::{AtomicBool, Ordering};
use std::{borrow::BorrowMut, sync::Arc};

use tokio::sync::broadcast::{Receiver, Sender};
use tokio::sync::Mutex;

/// Requests cooperative cancellation of whatever work its listeners belong to.
///
/// The queue holds one handle per active run. Cancelling is a broadcast, so every listener
/// derived from the same handle observes the same request.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Sender<()>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        Self {
            sender: tokio::sync::broadcast::channel(1).0,
        }
    }

    pub fn cancel(&self) {
        if let Err(e) = self.sender.send(()) {
            // Will fail if nobody is listening for a cancellation signal, in which case the
            // log message can be ignored.
            log::warn!("Failed to send cancellation signal: {e:?}");
        }
    }

    pub fn new_listener(&self) -> DelegatedCancelListener {
        DelegatedCancelListener::new(self.sender.subscribe())
    }
}

/// A listener on one run's cancellation. Clones share the observation: once any clone has seen
/// the signal, every checkpoint downstream reports cancelled too.
#[derive(Clone, Debug)]
pub struct DelegatedCancelListener {
    receiver: Arc<Mutex<Receiver<()>>>,
    cancelled: Arc<AtomicBool>,
}

impl DelegatedCancelListener {
    pub(crate) fn new(receiver: Receiver<()>) -> Self {
        Self {
            receiver: Arc::new(Mutex::new(receiver)),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Point in time check whether cancellation has been requested. If this returns true then
    /// work must be stopped at the next safe point so the run can reach its terminal state.
    pub fn should_cancel(&mut self) -> bool {
        if self.cancelled.load(Ordering::SeqCst) {
            return true;
        }

        match self.receiver.try_lock() {
            Ok(mut guard) => {
                match guard.try_recv() {
                    Ok(_) => {
                        self.cancelled.store(true, Ordering::SeqCst);
                        true
                    }
                    // A closed channel means the handle was dropped after the run settled,
                    // which is not a cancellation; empty and lagged mean keep going.
                    Err(_) => false,
                }
            }
            Err(_) => false,
        }
    }

    /// Wait for the cancellation signal to be received. It is safe to race this with another
    /// future so that the signal can be used to cancel other work in progress.
    pub async fn wait_for_cancel(&mut self) {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }

        self.receiver
            .borrow_mut()
            .lock()
            .await
            .recv()
            .await
            .expect("Failed to receive cancellation signal");
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Marker error carried out of a run when the operator cancels it.
///
/// Cancellation is not a failure; callers check for this type to take the CANCELLED transition
/// instead of FAILED.
#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct RunCancelledError {
    msg: String,
}

impl Default for RunCancelledError {
    fn default() -> Self {
        Self {
            msg: "Run cancelled by operator request".to_string(),
        }
    }
}
