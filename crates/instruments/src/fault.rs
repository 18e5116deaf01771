//! One-shot fault injection for the simulated devices

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a panicking holder poisoned it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Faults armed for the next matching call. Each arm fires once.
#[derive(Debug)]
pub(crate) struct FaultSet<F> {
    armed: Mutex<Vec<F>>,
}

impl<F: Copy + PartialEq> FaultSet<F> {
    pub(crate) fn new() -> Self {
        Self {
            armed: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn arm(&self, fault: F) {
        lock(&self.armed).push(fault);
    }

    /// Consume one armed instance of `fault`
    pub(crate) fn take(&self, fault: F) -> bool {
        let mut armed = lock(&self.armed);
        match armed.iter().position(|f| *f == fault) {
            Some(idx) => {
                armed.remove(idx);
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear(&self) {
        lock(&self.armed).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_fires_once_per_arm() {
        let faults = FaultSet::new();
        faults.arm(1u8);
        faults.arm(1u8);
        assert!(!faults.take(2));
        assert!(faults.take(1));
        assert!(faults.take(1));
        assert!(!faults.take(1));
    }

    #[test]
    fn test_clear() {
        let faults = FaultSet::new();
        faults.arm('x');
        faults.clear();
        assert!(!faults.take('x'));
    }
}
