//! The response cache and its startup-only `wait_ready` variant.
//!
//! `ResponseCache` is the single piece of shared mutable state three
//! refresh loops write to and the listener reads from (spec §5) -- modeled,
//! per SPEC_FULL §9, as a small value guarded by a lock rather than threaded
//! through the component graph as references.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

/// The three cacheable upstream response kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Info,
    Players,
    Rules,
}

impl CacheKey {
    const ALL: [CacheKey; 3] = [CacheKey::Info, CacheKey::Players, CacheKey::Rules];

    fn index(self) -> usize {
        match self {
            CacheKey::Info => 0,
            CacheKey::Players => 1,
            CacheKey::Rules => 2,
        }
    }
}

/// Most recently received raw upstream bytes for each key, ready to forward
/// verbatim. A value present here is always a syntactically valid,
/// non-fragmented response packet (spec §3 invariant) -- the refresh loops
/// only ever store bytes that already passed `codec::decode_response`.
#[derive(Default)]
pub struct ResponseCache {
    slots: [Option<Vec<u8>>; 3],
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: CacheKey) -> Option<&[u8]> {
        self.slots[key.index()].as_deref()
    }

    pub fn set(&mut self, key: CacheKey, value: Vec<u8>) {
        self.slots[key.index()] = Some(value);
    }
}

/// One-shot signal used by `AwaitableCache::get_wait`. A bootstrap-only
/// primitive -- do not reuse once `wait_ready` completes (SPEC_FULL §9).
struct OneShot {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl OneShot {
    fn new() -> Self {
        let (tx, rx) = bounded(1);
        OneShot { tx, rx }
    }

    fn fire(&self) {
        // Best-effort: a full channel means it already fired.
        let _ = self.tx.try_send(());
    }

    fn wait(&self, deadline: Instant) -> bool {
        match deadline.checked_duration_since(Instant::now()) {
            Some(remaining) => self.rx.recv_timeout(remaining).is_ok(),
            None => false,
        }
    }
}

/// Wraps `ResponseCache` during startup so `wait_ready` can block until
/// every required key has been populated at least once, then hands a plain
/// `ResponseCache` back for the rest of the proxy's lifetime.
pub struct AwaitableCache {
    cache: Mutex<ResponseCache>,
    signals: [OneShot; 3],
}

impl AwaitableCache {
    pub fn new() -> Arc<Self> {
        Arc::new(AwaitableCache {
            cache: Mutex::new(ResponseCache::new()),
            signals: [OneShot::new(), OneShot::new(), OneShot::new()],
        })
    }

    pub fn set(&self, key: CacheKey, value: Vec<u8>) {
        self.cache.lock().set(key, value);
        self.signals[key.index()].fire();
    }

    pub fn get(&self, key: CacheKey) -> Option<Vec<u8>> {
        self.cache.lock().get(key).map(<[u8]>::to_vec)
    }

    /// Block until `key` has been populated at least once, or `deadline`
    /// passes. Returns whether the key became ready.
    pub fn wait(&self, key: CacheKey, deadline: Instant) -> bool {
        if self.get(key).is_some() {
            return true;
        }
        self.signals[key.index()].wait(deadline)
    }

    pub fn keys() -> [CacheKey; 3] {
        CacheKey::ALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn get_wait_returns_immediately_once_set() {
        let cache = AwaitableCache::new();
        cache.set(CacheKey::Info, b"hello".to_vec());
        let deadline = Instant::now() + Duration::from_millis(10);
        assert!(cache.wait(CacheKey::Info, deadline));
    }

    #[test]
    fn get_wait_blocks_until_set_from_another_thread() {
        let cache = AwaitableCache::new();
        let writer = Arc::clone(&cache);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.set(CacheKey::Players, b"ok".to_vec());
        });

        let deadline = Instant::now() + Duration::from_secs(1);
        assert!(cache.wait(CacheKey::Players, deadline));
    }

    #[test]
    fn get_wait_respects_deadline() {
        let cache = AwaitableCache::new();
        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(!cache.wait(CacheKey::Rules, deadline));
    }
}
