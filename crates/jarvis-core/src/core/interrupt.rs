use std::pin::pin;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tokio::sync::Notify;

static INTERRUPT: OnceLock<InterruptSignal> = OnceLock::new();

fn global() -> &'static InterruptSignal {
    INTERRUPT.get_or_init(InterruptSignal::new)
}

#[derive(Debug)]
pub struct InterruptedError;

impl std::fmt::Display for InterruptedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Interrupted")
    }
}

impl std::error::Error for InterruptedError {}

/// A sticky flag paired with a wakeup for async waiters.
#[derive(Debug, Default)]
pub struct InterruptSignal {
    flag: AtomicBool,
    notify: Notify,
}

impl InterruptSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes every waiter. Returns whether it was
    /// already set.
    pub fn trigger(&self) -> bool {
        let was_set = self.flag.swap(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        was_set
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Resolves once the flag is set.
    pub async fn wait(&self) {
        loop {
            // Register before checking the flag: `notify_waiters` stores no permit.
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

/// Installs the Ctrl+C handler.
///
/// The handler only sets a flag and wakes waiters; printing is left to
/// the renderer.
///
/// # Errors
/// Returns an error if a handler is already installed.
pub fn init() -> Result<()> {
    ctrlc::set_handler(trigger_ctrl_c).context("install Ctrl+C handler")
}

/// Triggers an interrupt, force-exiting on a second Ctrl+C.
pub fn trigger_ctrl_c() {
    if global().trigger() {
        std::process::exit(130);
    }
}

pub fn is_interrupted() -> bool {
    global().is_set()
}

/// Waits until an interrupt is triggered.
pub async fn wait_for_interrupt() {
    global().wait().await;
}

/// Clears the flag so the next Ctrl+C cancels instead of exiting.
pub fn reset() {
    global().reset();
}
