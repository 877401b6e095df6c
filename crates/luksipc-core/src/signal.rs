//! A single shared flag, flipped by the OS signal handler and polled by the
//! copy loop at well-defined checkpoints. This is the only concurrent agent
//! in the whole engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};

/// Installs handlers for SIGINT/SIGTERM/SIGHUP that set a shared flag rather
/// than doing any work inline, keeping the handler body async-signal-safe.
/// Returns a handle whose `requested()` the copy loop polls.
pub struct ShutdownFlag {
    flag: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn install() -> Result<Self, std::io::Error> {
        let flag = Arc::new(AtomicBool::new(false));
        for signal in [SIGINT, SIGTERM, SIGHUP] {
            signal_hook::flag::register(signal, Arc::clone(&flag))?;
        }
        Ok(Self { flag })
    }

    pub fn requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Exposed for tests and for the fault-injection hooks that simulate a
    /// mid-copy interruption without sending a real signal.
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Build a flag without touching process-wide signal state, for tests
    /// that only need to simulate a shutdown request.
    pub fn bare() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }
}
