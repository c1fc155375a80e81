use std::sync::atomic::{AtomicBool, Ordering};

/// Holds a projector's single-runner flag until dropped.
#[derive(Debug)]
pub(super) struct RunnerGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunnerGuard<'a> {
    /// Take the flag, or `None` if another caller already holds it.
    pub(super) fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunnerGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_held() {
        let flag = AtomicBool::new(false);

        let guard = RunnerGuard::acquire(&flag);
        assert!(guard.is_some());
        assert!(RunnerGuard::acquire(&flag).is_none());

        drop(guard);
        assert!(RunnerGuard::acquire(&flag).is_some());
    }
}
