//! Stale-while-revalidate cache keyed by request target.
//!
//! Each key owns a [`CacheEntry`] published through a watch channel and at
//! most one in-flight fetch. Readers that arrive while a fetch is running
//! attach to it instead of starting another.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::error::ClientError;

pub type FetchResult<T> = Result<T, ClientError>;

/// A fetch shared by every reader of one key.
pub type InFlight<T> = Shared<BoxFuture<'static, FetchResult<T>>>;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub data: Option<T>,
    /// Message of the last failed fetch; cleared by the next successful one.
    pub error: Option<String>,
    pub is_validating: bool,
}

impl<T> Default for CacheEntry<T> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            is_validating: false,
        }
    }
}

impl<T> CacheEntry<T> {
    /// Nothing to show yet, or a refresh is running.
    pub fn is_loading(&self) -> bool {
        (self.data.is_none() && self.error.is_none()) || self.is_validating
    }
}

struct Slot<T> {
    entry: watch::Sender<CacheEntry<T>>,
    in_flight: Option<(u64, InFlight<T>)>,
    next_seq: u64,
}

impl<T> Slot<T> {
    fn new() -> Self {
        let (entry, _) = watch::channel(CacheEntry::default());
        Self {
            entry,
            in_flight: None,
            next_seq: 0,
        }
    }
}

pub struct SwrCache<T> {
    slots: Arc<Mutex<HashMap<String, Slot<T>>>>,
}

impl<T> Clone for SwrCache<T> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<T> Default for SwrCache<T> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> SwrCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, key: &str) -> CacheEntry<T> {
        self.slots
            .lock()
            .get(key)
            .map(|slot| slot.entry.borrow().clone())
            .unwrap_or_default()
    }

    pub fn subscribe(&self, key: &str) -> watch::Receiver<CacheEntry<T>> {
        self.slots
            .lock()
            .entry(key.to_string())
            .or_insert_with(Slot::new)
            .entry
            .subscribe()
    }

    /// Join the in-flight fetch for `key`, or start one with `fetch`.
    ///
    /// `fetch` runs under the cache lock and must only build the future.
    pub fn revalidate<F, Fut>(&self, key: &str, fetch: F) -> InFlight<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult<T>> + Send + 'static,
    {
        let mut slots = self.slots.lock();
        let slot = slots.entry(key.to_string()).or_insert_with(Slot::new);
        if let Some((seq, in_flight)) = &slot.in_flight {
            debug!(key, seq, "joining in-flight fetch");
            return in_flight.clone();
        }
        self.start(slot, key, fetch())
    }

    /// Start a fetch for `key` even if one is running. Results of fetches
    /// started earlier are discarded, so whoever awaits this observes state
    /// read strictly after the call.
    pub fn invalidate<F, Fut>(&self, key: &str, fetch: F) -> InFlight<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult<T>> + Send + 'static,
    {
        let mut slots = self.slots.lock();
        let slot = slots.entry(key.to_string()).or_insert_with(Slot::new);
        self.start(slot, key, fetch())
    }

    fn start<Fut>(&self, slot: &mut Slot<T>, key: &str, fetch: Fut) -> InFlight<T>
    where
        Fut: Future<Output = FetchResult<T>> + Send + 'static,
    {
        let seq = slot.next_seq;
        slot.next_seq += 1;

        let slots = Arc::clone(&self.slots);
        let owned_key = key.to_string();
        let task = async move {
            let result = fetch.await;
            let mut guard = slots.lock();
            if let Some(slot) = guard.get_mut(&owned_key) {
                let current = slot.in_flight.as_ref().map(|(s, _)| *s) == Some(seq);
                if current {
                    slot.in_flight = None;
                    slot.entry.send_modify(|e| {
                        match &result {
                            Ok(data) => {
                                e.data = Some(data.clone());
                                e.error = None;
                            }
                            Err(err) => e.error = Some(err.to_string()),
                        }
                        e.is_validating = false;
                    });
                } else {
                    debug!(key = %owned_key, seq, "superseded fetch finished; result dropped");
                }
            }
            result
        }
        .boxed()
        .shared();

        debug!(key, seq, "fetch started");
        slot.in_flight = Some((seq, task.clone()));
        slot.entry.send_modify(|e| e.is_validating = true);
        task
    }
}
