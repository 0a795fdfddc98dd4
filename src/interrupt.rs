//! Cooperative cancellation for the polling loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{AuthError, Result};

const SLICE: Duration = Duration::from_millis(50);

/// Shared flag raised by Ctrl-C (or a test) and checked between network
/// round trips.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire the flag to Ctrl-C. A second Ctrl-C exits at once, for the
    /// calls that never look at the flag: a blocked terminal read or a
    /// hardware key waiting for touch.
    ///
    /// A second installation in the same process fails inside `ctrlc`; the
    /// flag then simply never fires.
    pub fn install() -> Self {
        let interrupt = Self::new();
        let remote = interrupt.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            if remote.raise() {
                eprintln!();
                std::process::exit(130);
            }
        }) {
            log::warn!("unable to install Ctrl-C handler: {}", e);
        }
        interrupt
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    fn raise(&self) -> bool {
        self.flag.swap(true, Ordering::SeqCst)
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_triggered() {
            Err(AuthError::UserCancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early with `UserCancelled` if the flag
    /// is raised meanwhile.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep(SLICE.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_returns_when_not_triggered() {
        let interrupt = Interrupt::new();
        assert!(interrupt.sleep(Duration::from_millis(5)).is_ok());
    }

    #[test]
    fn sleep_wakes_up_on_trigger() {
        let interrupt = Interrupt::new();
        let remote = interrupt.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.trigger();
        });

        let started = Instant::now();
        let result = interrupt.sleep(Duration::from_secs(30));
        handle.join().unwrap();

        assert!(matches!(result, Err(AuthError::UserCancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn second_raise_is_reported() {
        let interrupt = Interrupt::new();
        assert!(!interrupt.raise());
        assert!(interrupt.is_triggered());
        assert!(interrupt.raise());
    }
}
