//! Reentrancy guard for session configuration.
//!
//! One atomic value encodes both "a configuration is in flight" and "start
//! once it finishes", so the two can never disagree. Transitions:
//!
//! ```text
//! OPEN --try_acquire--> CONFIGURING --request_start--> CONFIGURING_START
//!   ^                        |  ^------cancel_start----------|
//!   +-------finish/abort-----+-------------------------------+
//! ```
//!
//! `finish` swaps back to OPEN and reports the pending start in the same
//! atomic step: a start request either lands before the swap (and is
//! returned) or after it (and sees OPEN), never in between.

use std::sync::atomic::{AtomicU8, Ordering};

const OPEN: u8 = 0;
const CONFIGURING: u8 = 1;
const CONFIGURING_START: u8 = 2;

#[derive(Debug, Default)]
pub struct ConfigGate {
    state: AtomicU8,
}

impl ConfigGate {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(OPEN),
        }
    }

    /// Claim the gate for one configuration.
    ///
    /// Returns false when a configuration is already in flight; in that case
    /// `start_after` is OR-ed into the pending start.
    pub fn try_acquire(&self, start_after: bool) -> bool {
        let claimed = if start_after {
            CONFIGURING_START
        } else {
            CONFIGURING
        };
        loop {
            match self
                .state
                .compare_exchange(OPEN, claimed, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(_) if !start_after => return false,
                Err(_) => {
                    if self.defer_start() {
                        return false;
                    }
                    // Released between the two exchanges; claim it instead.
                }
            }
        }
    }

    /// Record a start for the in-flight configuration.
    ///
    /// Returns false when no configuration is in flight, in which case the
    /// caller must start the session itself.
    pub fn request_start(&self) -> bool {
        self.defer_start()
    }

    /// Drop a pending start. Returns true when a configuration is in flight
    /// (whether or not a start was pending).
    pub fn cancel_start(&self) -> bool {
        match self.state.compare_exchange(
            CONFIGURING_START,
            CONFIGURING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(current) => current == CONFIGURING,
        }
    }

    /// Release after a committed configuration; returns whether to start.
    pub fn finish(&self) -> bool {
        self.state.swap(OPEN, Ordering::AcqRel) == CONFIGURING_START
    }

    /// Release after a failed configuration, discarding any pending start.
    pub fn abort(&self) {
        self.state.store(OPEN, Ordering::Release);
    }

    pub fn is_configuring(&self) -> bool {
        self.state.load(Ordering::Acquire) != OPEN
    }

    pub fn start_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == CONFIGURING_START
    }

    fn defer_start(&self) -> bool {
        match self.state.compare_exchange(
            CONFIGURING,
            CONFIGURING_START,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(current) => current == CONFIGURING_START,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn second_acquire_records_start_intent() {
        let gate = ConfigGate::new();
        assert!(gate.try_acquire(false));
        assert!(!gate.start_pending());

        assert!(!gate.try_acquire(true));
        assert!(gate.start_pending());

        // OR semantics: a later non-starting request does not clear it.
        assert!(!gate.try_acquire(false));
        assert!(gate.start_pending());

        assert!(gate.finish());
        assert!(!gate.is_configuring());
    }

    #[test]
    fn request_start_only_defers_while_configuring() {
        let gate = ConfigGate::new();
        assert!(!gate.request_start());
        assert!(!gate.is_configuring());

        assert!(gate.try_acquire(false));
        assert!(gate.request_start());
        assert!(gate.finish());
        assert!(!gate.finish());
    }

    #[test]
    fn cancel_start_clears_intent_but_keeps_gate() {
        let gate = ConfigGate::new();
        assert!(!gate.cancel_start());

        assert!(gate.try_acquire(true));
        assert!(gate.cancel_start());
        assert!(gate.is_configuring());
        assert!(!gate.finish());
    }

    #[test]
    fn abort_discards_pending_start() {
        let gate = ConfigGate::new();
        assert!(gate.try_acquire(true));
        gate.abort();
        assert!(!gate.is_configuring());
        assert!(gate.try_acquire(false));
        assert!(!gate.finish());
    }

    #[test]
    fn exactly_one_concurrent_acquire_wins() {
        let gate = Arc::new(ConfigGate::new());
        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let gate = gate.clone();
                    scope.spawn(move || gate.try_acquire(i % 2 == 0) as usize)
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(winners, 1);
        assert!(gate.start_pending());
    }
}
