//! Keyed coalescing of concurrent identical calls
//!
//! The first caller for a key runs the work; callers that arrive while it is
//! in flight wait on the same cell and receive a clone of its result. The key
//! is released once the result is available, so failures are never cached.
//! If the running caller is dropped mid-flight, a waiting caller takes over.

use ahash::AHashMap;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

pub struct SingleFlight<T> {
    calls: Mutex<AHashMap<String, Arc<OnceCell<T>>>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        SingleFlight {
            calls: Mutex::new(AHashMap::new()),
        }
    }
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run<F, Fut>(&self, key: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let cell = {
            let mut calls = self.calls.lock();
            calls
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = cell.get_or_init(work).await.clone();

        let mut calls = self.calls.lock();
        if calls.get(key).is_some_and(|current| Arc::ptr_eq(current, &cell)) {
            calls.remove(key);
        }
        result
    }

    /// Keys with a call in flight
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}
