// Receiver lifecycle - state machine plus in-flight poll tracking
use super::ReceiverState;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use tokio::sync::Notify;

const STOPPED: u8 = 0;
const RUNNING: u8 = 1;
const DRAINING: u8 = 2;

pub(super) struct Lifecycle {
    state: AtomicU8,
    closed: AtomicBool,
    /// `run_once` calls currently executing
    polls: AtomicUsize,
    polls_done: Notify,
}

impl Lifecycle {
    pub(super) fn new() -> Self {
        Self {
            state: AtomicU8::new(STOPPED),
            closed: AtomicBool::new(false),
            polls: AtomicUsize::new(0),
            polls_done: Notify::new(),
        }
    }

    pub(super) fn state(&self) -> ReceiverState {
        match self.state.load(Ordering::SeqCst) {
            RUNNING => ReceiverState::Running,
            DRAINING => ReceiverState::Draining,
            _ => ReceiverState::Stopped,
        }
    }

    pub(super) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Register a poll; must come before the closed check so a drain waits for it
    pub(super) fn enter(&self) -> PollGuard<'_> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        PollGuard(self)
    }

    /// Stopped -> Running; true on the call that made the move
    pub(super) fn start(&self) -> bool {
        self.state
            .compare_exchange(STOPPED, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Refuse new polls; true if this call moved Running to Draining
    pub(super) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.state
            .compare_exchange(RUNNING, DRAINING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(super) async fn wait_polls(&self) {
        loop {
            let notified = self.polls_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.polls.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub(super) fn in_flight(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// Mark stopped; true if it was not already
    pub(super) fn finish(&self) -> bool {
        self.state.swap(STOPPED, Ordering::SeqCst) != STOPPED
    }
}

pub(super) struct PollGuard<'a>(&'a Lifecycle);

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        if self.0.polls.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.polls_done.notify_waiters();
        }
    }
}
