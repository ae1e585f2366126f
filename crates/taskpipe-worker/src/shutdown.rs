use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Stop flag shared between a worker's cycle and its shutdown listener.
///
/// Starts cleared, is set at most once and is never reset. Clones observe
/// the same flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns `true` only for the call that actually set it;
    /// later calls are no-ops.
    pub fn trigger(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_is_idempotent() {
        let flag = ShutdownFlag::new();
        assert!(!flag.is_set());
        assert!(flag.trigger());
        assert!(!flag.trigger(), "second trigger reports already set");
        assert!(flag.is_set());
    }

    #[test]
    fn clones_share_state() {
        let flag = ShutdownFlag::new();
        let other = flag.clone();
        std::thread::spawn(move || other.trigger()).join().unwrap();
        assert!(flag.is_set());
    }
}
