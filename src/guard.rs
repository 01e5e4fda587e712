//! Per-URL exclusive sections.
//!
//! [`KeyedGuard`] hands out at most one [`KeyedSection`] per URL at a time.
//! Sections for different URLs never wait on each other. Each URL gets a
//! one-permit [`Semaphore`] created on demand; the map entry is removed
//! again when the last holder releases and nobody is queued behind it.
//!
//! A section is an RAII value: dropping it releases the URL, whether the
//! holder returned normally, returned an error, or had its future
//! cancelled (for example by a `tokio::time::timeout`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use docmerge_core::ReconcileError;

#[derive(Default)]
struct Sections {
    by_key: HashMap<String, Arc<Semaphore>>,
    closed: bool,
}

/// Keyed exclusion over URLs. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct KeyedGuard {
    sections: Arc<Mutex<Sections>>,
}

impl KeyedGuard {
    pub fn new() -> Self {
        Self::default()
    }

    // The map lock is only ever held for a few non-blocking operations, so a
    // poisoned lock still holds a consistent map.
    fn sections(&self) -> MutexGuard<'_, Sections> {
        self.sections.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait for exclusive access to `key`.
    ///
    /// Fails with [`ReconcileError::Guard`] if the guard is closed before or
    /// while waiting.
    pub async fn lock(&self, key: &str) -> Result<KeyedSection, ReconcileError> {
        let semaphore = {
            let mut sections = self.sections();
            if sections.closed {
                return Err(closed_error(key));
            }
            sections
                .by_key
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| closed_error(key))?;
        trace!(url = key, "section acquired");

        Ok(KeyedSection {
            key: key.to_string(),
            semaphore,
            permit: Some(permit),
            sections: Arc::clone(&self.sections),
        })
    }

    /// Refuse new sections and fail everyone currently waiting.
    ///
    /// Sections already held stay valid until dropped.
    pub fn close(&self) {
        let mut sections = self.sections();
        sections.closed = true;
        for semaphore in sections.by_key.values() {
            semaphore.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sections().closed
    }

    /// Number of URLs that currently have a holder or a waiter.
    pub fn active_keys(&self) -> usize {
        self.sections().by_key.len()
    }
}

fn closed_error(key: &str) -> ReconcileError {
    ReconcileError::Guard(format!("guard closed while acquiring section for {}", key))
}

/// Exclusive access to one URL. Released on drop.
pub struct KeyedSection {
    key: String,
    semaphore: Arc<Semaphore>,
    permit: Option<OwnedSemaphorePermit>,
    sections: Arc<Mutex<Sections>>,
}

impl Drop for KeyedSection {
    fn drop(&mut self) {
        // Release first so a queued waiter can proceed immediately.
        drop(self.permit.take());

        let mut sections = self.sections.lock().unwrap_or_else(|e| e.into_inner());
        // Remaining references: the map entry and `self.semaphore`. Anything
        // above two is a waiter that cloned the entry and still needs it.
        let idle = sections
            .by_key
            .get(&self.key)
            .is_some_and(|s| Arc::ptr_eq(s, &self.semaphore) && Arc::strong_count(s) == 2);
        if idle {
            sections.by_key.remove(&self.key);
        }
        trace!(url = %self.key, pruned = idle, "section released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn same_key_waits_for_release() {
        let guard = KeyedGuard::new();
        let first = guard.lock("u1").await.unwrap();

        let blocked = timeout(Duration::from_millis(50), guard.lock("u1")).await;
        assert!(blocked.is_err(), "second lock on u1 should still be waiting");

        drop(first);
        let _second = timeout(Duration::from_millis(500), guard.lock("u1"))
            .await
            .expect("released section should be acquirable")
            .unwrap();
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let guard = KeyedGuard::new();
        let _a = guard.lock("a").await.unwrap();
        let b = timeout(Duration::from_millis(500), guard.lock("b")).await;
        assert!(b.is_ok(), "independent URLs must not wait on each other");
        assert_eq!(guard.active_keys(), 2);
    }

    #[tokio::test]
    async fn idle_entries_are_pruned() {
        let guard = KeyedGuard::new();
        {
            let _a = guard.lock("a").await.unwrap();
            let _b = guard.lock("b").await.unwrap();
            assert_eq!(guard.active_keys(), 2);
        }
        assert_eq!(guard.active_keys(), 0);
    }

    #[tokio::test]
    async fn entry_survives_while_a_waiter_is_queued() {
        let guard = KeyedGuard::new();
        let held = guard.lock("u1").await.unwrap();

        let g2 = guard.clone();
        let waiter = tokio::spawn(async move {
            let _s = g2.lock("u1").await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(held);
        assert_eq!(guard.active_keys(), 1);

        waiter.await.unwrap();
        assert_eq!(guard.active_keys(), 0);
    }

    #[tokio::test]
    async fn cancelled_holder_releases_section() {
        let guard = KeyedGuard::new();
        let g2 = guard.clone();
        let holder = async move {
            let _s = g2.lock("u1").await.unwrap();
            tokio::time::sleep(Duration::from_secs(3600)).await;
        };
        assert!(timeout(Duration::from_millis(20), holder).await.is_err());

        let again = timeout(Duration::from_millis(500), guard.lock("u1")).await;
        assert!(again.is_ok(), "section must be released when its holder is dropped");
    }

    #[tokio::test]
    async fn close_fails_waiters_and_new_lockers() {
        let guard = KeyedGuard::new();
        let held = guard.lock("u1").await.unwrap();

        let g2 = guard.clone();
        let waiter = tokio::spawn(async move { g2.lock("u1").await.map(|_| ()) });
        tokio::time::sleep(Duration::from_millis(20)).await;

        guard.close();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, ReconcileError::Guard(_)));
        assert!(matches!(
            guard.lock("other").await,
            Err(ReconcileError::Guard(_))
        ));
        assert!(guard.is_closed());

        drop(held);
    }
}
