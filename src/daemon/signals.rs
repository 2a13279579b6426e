//! Signal handling: SIGTERM/SIGINT graceful shutdown, SIGUSR1 manual trigger.
//!
//! Uses the `signal-hook` crate for safe signal registration. The scheduler
//! polls [`SignalHandler`] flags each loop iteration rather than blocking on
//! signals: the cancellation model in spec §5 is cooperative, not
//! preemptive — in-flight syscalls finish, the cycle ends at the next check
//! between root directories.
//!
//! There is no SIGHUP/config-reload path here. Changing the config requires
//! a process restart; the pipeline has no mutable config state to reload in
//! place.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGINT, SIGTERM};

/// Thread-safe signal state shared between the OS signal handler and the
/// scheduler loop. Both flags use `Ordering::Relaxed`: the loop polls them
/// every iteration and exact ordering with other atomics isn't required.
#[derive(Clone)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
    manual_trigger_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Register SIGTERM/SIGINT (shutdown) and, on Unix, SIGUSR1 (manual
    /// cleanup trigger). Registration is best-effort; a failure is logged to
    /// stderr but not fatal — the daemon still responds to whichever
    /// signals it did manage to register.
    #[must_use]
    pub fn new() -> Self {
        let handler = Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            manual_trigger_flag: Arc::new(AtomicBool::new(false)),
        };
        handler.register_signals();
        handler
    }

    #[must_use]
    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// A manual trigger coalesces: at most one pending trigger survives
    /// until the next tick consumes it.
    #[must_use]
    pub fn take_manual_trigger(&self) -> bool {
        self.manual_trigger_flag.swap(false, Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_manual_trigger(&self) {
        self.manual_trigger_flag.store(true, Ordering::Relaxed);
    }

    fn register_signals(&self) {
        if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&self.shutdown_flag)) {
            eprintln!("storagesage: failed to register SIGTERM: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&self.shutdown_flag)) {
            eprintln!("storagesage: failed to register SIGINT: {e}");
        }
        #[cfg(unix)]
        {
            use signal_hook::consts::SIGUSR1;
            if let Err(e) =
                signal_hook::flag::register(SIGUSR1, Arc::clone(&self.manual_trigger_flag))
            {
                eprintln!("storagesage: failed to register SIGUSR1: {e}");
            }
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}
