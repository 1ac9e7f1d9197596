//! Cancellation cookies shared between the page view and the worker.
//!
//! A cookie is a slot in the worker's cookie jar holding an abort flag. The
//! page view writes the flag directly, without a round trip through the
//! worker; the worker polls it at its own checkpoints.

use super::{Worker, WorkerResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Handle to a worker-side abort flag.
#[derive(Debug, Clone)]
pub struct Cookie {
    id: u32,
    abort: Arc<AtomicBool>,
}

impl Cookie {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Ask the worker to stop the operation this cookie was passed to.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::Release);
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }
}

/// Worker-side table of live cookies.
pub struct CookieJar {
    slots: Mutex<HashMap<u32, Cookie>>,
    next_id: AtomicU32,
}

impl CookieJar {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
        }
    }

    pub fn create(&self) -> Cookie {
        let cookie = Cookie {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            abort: Arc::new(AtomicBool::new(false)),
        };
        self.slots.lock().insert(cookie.id, cookie.clone());
        cookie
    }

    /// Release a cookie's slot. Returns `false` if it was already released.
    pub fn delete(&self, cookie: &Cookie) -> bool {
        self.slots.lock().remove(&cookie.id).is_some()
    }

    /// Number of cookies allocated and not yet released.
    pub fn live(&self) -> usize {
        self.slots.lock().len()
    }
}

impl Default for CookieJar {
    fn default() -> Self {
        Self::new()
    }
}

/// A cookie borrowed from a worker for the duration of one draw call.
///
/// Dropping the lease releases the cookie, so every exit path of the draw
/// (success, abort, error, stale result) gives the slot back.
pub struct CookieLease {
    worker: Arc<dyn Worker>,
    cookie: Cookie,
}

impl CookieLease {
    pub async fn acquire(worker: Arc<dyn Worker>) -> WorkerResult<Self> {
        let cookie = worker.create_cookie().await?;
        Ok(Self { worker, cookie })
    }

    pub fn cookie(&self) -> &Cookie {
        &self.cookie
    }
}

impl Drop for CookieLease {
    fn drop(&mut self) {
        self.worker.delete_cookie(&self.cookie);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_jar_lifecycle() {
        let jar = CookieJar::new();
        let a = jar.create();
        let b = jar.create();
        assert_ne!(a.id(), b.id());
        assert_eq!(jar.live(), 2);

        assert!(jar.delete(&a));
        assert!(!jar.delete(&a));
        assert_eq!(jar.live(), 1);
    }

    #[test]
    fn test_abort_is_shared_between_clones() {
        let jar = CookieJar::new();
        let cookie = jar.create();
        let seen_by_worker = cookie.clone();

        assert!(!seen_by_worker.is_aborted());
        cookie.abort();
        assert!(seen_by_worker.is_aborted());
    }
}
