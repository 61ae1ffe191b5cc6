//! Process-wide pause switch

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

lazy_static::lazy_static! {
    static ref GLOBAL: PauseFlag = PauseFlag::default();
}

/// Level-triggered pause signal shared by every strip updater
///
/// While paused, updaters blank and disconnect their strips and stop writing to them.
#[derive(Debug, Clone, Default)]
pub struct PauseFlag(Arc<AtomicBool>);

impl PauseFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// The flag shared by the whole process
    pub fn global() -> Self {
        GLOBAL.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, paused: bool) {
        self.0.store(paused, Ordering::Release);
    }

    pub fn pause(&self) {
        self.set(true);
    }

    pub fn resume(&self) {
        self.set(false);
    }

    /// Flip the flag, returning the new state
    pub fn toggle(&self) -> bool {
        !self.0.fetch_xor(true, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_flips_state() {
        let flag = PauseFlag::new();
        assert!(!flag.is_paused());
        assert!(flag.toggle());
        assert!(flag.is_paused());
        assert!(!flag.toggle());
        assert!(!flag.is_paused());
    }

    #[test]
    fn clones_share_state() {
        let flag = PauseFlag::new();
        let other = flag.clone();
        other.pause();
        assert!(flag.is_paused());
        flag.resume();
        assert!(!other.is_paused());
    }

    #[test]
    fn global_is_shared() {
        assert!(Arc::ptr_eq(&PauseFlag::global().0, &PauseFlag::global().0));
        assert!(!Arc::ptr_eq(&PauseFlag::global().0, &PauseFlag::new().0));
    }
}
