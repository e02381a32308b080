//! Waitable flags shared between the supervisor and the menu worker
//!
//! Three independent booleans live behind one mutex and one condition variable,
//! so a waiter can block on any combination of them without polling.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// One of the three daemon flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Show the menu
    Wake,
    /// The open database is stale and must be re-read on the next wake
    CacheExpired,
    /// Shut the daemon down
    Kill,
}

#[derive(Debug, Default)]
struct FlagState {
    wake: bool,
    cache_expired: bool,
    kill: bool,
}

impl FlagState {
    fn slot(&mut self, flag: Flag) -> &mut bool {
        match flag {
            Flag::Wake => &mut self.wake,
            Flag::CacheExpired => &mut self.cache_expired,
            Flag::Kill => &mut self.kill,
        }
    }

    fn get(&self, flag: Flag) -> bool {
        match flag {
            Flag::Wake => self.wake,
            Flag::CacheExpired => self.cache_expired,
            Flag::Kill => self.kill,
        }
    }
}

/// Hub holding the wake, cache-expired and kill flags
#[derive(Debug, Default)]
pub struct Signals {
    state: Mutex<FlagState>,
    changed: Condvar,
}

impl Signals {
    /// All flags clear
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags as the supervisor starts them: `Wake` set so the first pass runs
    pub fn starting() -> Self {
        let signals = Self::new();
        signals.set(Flag::Wake);
        signals
    }

    fn lock(&self) -> MutexGuard<'_, FlagState> {
        // A panicking holder cannot leave a bool half-written
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set a flag and wake every waiter
    pub fn set(&self, flag: Flag) {
        *self.lock().slot(flag) = true;
        self.changed.notify_all();
    }

    /// Clear a flag
    pub fn clear(&self, flag: Flag) {
        *self.lock().slot(flag) = false;
        self.changed.notify_all();
    }

    /// Current value of a flag
    pub fn is_set(&self, flag: Flag) -> bool {
        self.lock().get(flag)
    }

    /// Block until `flag` is set
    pub fn wait(&self, flag: Flag) {
        self.wait_any(&[flag]);
    }

    /// Block until one of `flags` is set and return the first one found, in
    /// the order given
    pub fn wait_any(&self, flags: &[Flag]) -> Flag {
        let mut state = self.lock();
        loop {
            if let Some(flag) = flags.iter().copied().find(|f| state.get(*f)) {
                return flag;
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Atomically read and clear a flag, returning its previous value
    pub fn take(&self, flag: Flag) -> bool {
        let mut state = self.lock();
        let slot = state.slot(flag);
        let was_set = *slot;
        *slot = false;
        was_set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_flags_start_clear() {
        let signals = Signals::new();
        assert!(!signals.is_set(Flag::Wake));
        assert!(!signals.is_set(Flag::CacheExpired));
        assert!(!signals.is_set(Flag::Kill));
    }

    #[test]
    fn test_starting_sets_wake_only() {
        let signals = Signals::starting();
        assert!(signals.is_set(Flag::Wake));
        assert!(!signals.is_set(Flag::CacheExpired));
        assert!(!signals.is_set(Flag::Kill));
    }

    #[test]
    fn test_flags_are_independent() {
        let signals = Signals::new();
        signals.set(Flag::CacheExpired);
        assert!(signals.is_set(Flag::CacheExpired));
        assert!(!signals.is_set(Flag::Wake));

        signals.set(Flag::Wake);
        signals.clear(Flag::CacheExpired);
        assert!(signals.is_set(Flag::Wake));
        assert!(!signals.is_set(Flag::CacheExpired));
    }

    #[test]
    fn test_take_clears() {
        let signals = Signals::new();
        assert!(!signals.take(Flag::CacheExpired));
        signals.set(Flag::CacheExpired);
        assert!(signals.take(Flag::CacheExpired));
        assert!(!signals.is_set(Flag::CacheExpired));
    }

    #[test]
    fn test_wait_returns_immediately_when_set() {
        let signals = Signals::new();
        signals.set(Flag::Kill);
        signals.wait(Flag::Kill);
    }

    #[test]
    fn test_wait_blocks_until_set_from_other_thread() {
        let signals = Arc::new(Signals::new());
        let setter = Arc::clone(&signals);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            setter.set(Flag::Wake);
        });

        let flag = signals.wait_any(&[Flag::Wake, Flag::Kill]);
        assert_eq!(flag, Flag::Wake);
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_any_prefers_order() {
        let signals = Signals::new();
        signals.set(Flag::Wake);
        signals.set(Flag::Kill);
        assert_eq!(signals.wait_any(&[Flag::Kill, Flag::Wake]), Flag::Kill);
    }
}
