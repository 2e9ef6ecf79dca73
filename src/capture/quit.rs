//! Force-quit requests and the active supervisor slot
//!
//! An interrupt can arrive on another thread at any time, including while
//! the supervisor is being torn down. The interrupt path never touches the
//! supervisor itself: it clones the [`QuitHandle`] out of a mutex-protected
//! slot, releases the lock, and then signals the handle.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

const NOT_REQUESTED: u8 = 0;
const REQUESTED: u8 = 1;
const REQUESTED_SILENT: u8 = 2;

#[derive(Debug, Default)]
struct QuitSignal {
    state: AtomicU8,
    notify: Notify,
}

/// Cloneable handle used to ask a running supervisor to quit
#[derive(Debug, Clone, Default)]
pub struct QuitHandle {
    inner: Arc<QuitSignal>,
}

impl QuitHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a forced quit; only the first request counts
    pub fn force_quit(&self, silent: bool) {
        let requested = if silent { REQUESTED_SILENT } else { REQUESTED };
        if self
            .inner
            .state
            .compare_exchange(NOT_REQUESTED, requested, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::debug!("Force quit requested (silent: {})", silent);
        }
        self.inner.notify.notify_one();
    }

    /// `Some(silent)` once a quit was requested
    pub fn request(&self) -> Option<bool> {
        match self.inner.state.load(Ordering::Acquire) {
            REQUESTED => Some(false),
            REQUESTED_SILENT => Some(true),
            _ => None,
        }
    }

    pub fn is_requested(&self) -> bool {
        self.request().is_some()
    }

    /// Resolve once a quit is requested, yielding whether it was silent
    pub async fn requested(&self) -> bool {
        loop {
            if let Some(silent) = self.request() {
                return silent;
            }
            self.inner.notify.notified().await;
        }
    }

    fn same_as(&self, other: &QuitHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

static ACTIVE: Mutex<Option<QuitHandle>> = Mutex::new(None);

/// Clears the active slot when dropped, if it still holds this handle
#[must_use = "the slot is cleared when the guard is dropped"]
pub struct ActiveGuard {
    handle: QuitHandle,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut slot = ACTIVE.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|active| active.same_as(&self.handle)) {
            *slot = None;
        }
    }
}

/// Make `handle` the target of [`interrupt_active`]
pub fn activate(handle: QuitHandle) -> ActiveGuard {
    *ACTIVE.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle.clone());
    ActiveGuard { handle }
}

/// Forward an interrupt to the active supervisor; false if there is none
pub fn interrupt_active(silent: bool) -> bool {
    let handle = ACTIVE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    match handle {
        Some(handle) => {
            handle.force_quit(silent);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_request_wins() {
        let handle = QuitHandle::new();
        assert_eq!(handle.request(), None);

        handle.force_quit(true);
        handle.force_quit(false);
        assert_eq!(handle.request(), Some(true));
    }

    #[tokio::test]
    async fn test_request_before_wait_is_not_lost() {
        let handle = QuitHandle::new();
        handle.clone().force_quit(false);

        let silent = tokio::time::timeout(Duration::from_secs(1), handle.requested())
            .await
            .unwrap();
        assert!(!silent);
    }

    #[tokio::test]
    async fn test_request_from_other_thread_wakes_waiter() {
        let handle = QuitHandle::new();
        let remote = handle.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.force_quit(true);
        });

        let silent = tokio::time::timeout(Duration::from_secs(2), handle.requested())
            .await
            .unwrap();
        assert!(silent);
    }

    #[test]
    fn test_active_slot_lifecycle() {
        let first = QuitHandle::new();
        let second = QuitHandle::new();

        let first_guard = activate(first.clone());
        let second_guard = activate(second.clone());
        // Dropping a stale guard leaves the newer registration alone
        drop(first_guard);

        assert!(interrupt_active(false));
        assert!(second.is_requested());
        assert!(!first.is_requested());

        drop(second_guard);
        assert!(!interrupt_active(false));
    }
}
