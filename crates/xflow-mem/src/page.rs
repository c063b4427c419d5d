//! Scratch page pool and quota-enforcing accessors.
//!
//! Every page a stream holds is a `PageGuard`; dropping it returns the page to
//! the pool and to the stream's quota. Streams only see their own
//! `QuotaPageAccessor`, created when the stream is added to a graph.
//!
//! `release_all` takes back every page of one accessor at once. Guards handed
//! out before it become stale: dropping them later returns nothing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::tracking::HighWater;

struct PoolInner {
    page_size: usize,
    capacity: usize,
    used: AtomicUsize,
    high_water: HighWater,
}

impl PoolInner {
    fn try_reserve(&self) -> bool {
        loop {
            let cur = self.used.load(Ordering::Relaxed);
            if cur >= self.capacity {
                return false;
            }
            if self
                .used
                .compare_exchange(cur, cur + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.high_water.record(cur + 1);
                return true;
            }
        }
    }

    fn release(&self, pages: usize) {
        self.used.fetch_sub(pages, Ordering::AcqRel);
    }
}

/// Fixed-size pages shared by all streams of a kernel instance.
#[derive(Clone)]
pub struct PagePool {
    inner: Arc<PoolInner>,
}

impl PagePool {
    pub fn new(capacity_pages: usize, page_size: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                page_size,
                capacity: capacity_pages,
                used: AtomicUsize::new(0),
                high_water: HighWater::new(),
            }),
        }
    }

    pub fn page_size(&self) -> usize {
        self.inner.page_size
    }

    pub fn capacity_pages(&self) -> usize {
        self.inner.capacity
    }

    pub fn used_pages(&self) -> usize {
        self.inner.used.load(Ordering::Relaxed)
    }

    pub fn peak_pages(&self) -> usize {
        self.inner.high_water.peak()
    }

    /// Accessor for one stream. Quota starts at zero until a grant arrives.
    pub fn accessor(&self, stream: impl Into<String>, enforce_quota: bool) -> QuotaPageAccessor {
        QuotaPageAccessor {
            pool: self.clone(),
            quota: Arc::new(QuotaState {
                stream: stream.into(),
                enforce: enforce_quota,
                limit: AtomicUsize::new(0),
                ledger: Mutex::new(Ledger::default()),
            }),
        }
    }
}

#[derive(Default)]
struct Ledger {
    held: usize,
    epoch: u64,
}

struct QuotaState {
    stream: String,
    enforce: bool,
    limit: AtomicUsize,
    ledger: Mutex<Ledger>,
}

impl QuotaState {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One stream's window onto the pool.
#[derive(Clone)]
pub struct QuotaPageAccessor {
    pool: PagePool,
    quota: Arc<QuotaState>,
}

impl QuotaPageAccessor {
    pub fn stream(&self) -> &str {
        &self.quota.stream
    }

    pub fn page_size(&self) -> usize {
        self.pool.page_size()
    }

    pub fn enforces_quota(&self) -> bool {
        self.quota.enforce
    }

    pub fn set_quota(&self, pages: usize) {
        self.quota.limit.store(pages, Ordering::Release);
    }

    pub fn quota(&self) -> usize {
        self.quota.limit.load(Ordering::Acquire)
    }

    /// Pages this stream currently holds.
    pub fn held(&self) -> usize {
        self.quota.ledger().held
    }

    pub fn allocate_page(&self) -> Result<PageGuard> {
        let mut ledger = self.quota.ledger();
        if self.quota.enforce && ledger.held >= self.quota() {
            return Err(Error::QuotaExceeded {
                stream: self.quota.stream.clone(),
                quota: self.quota(),
            });
        }
        if !self.pool.inner.try_reserve() {
            return Err(Error::PoolExhausted {
                capacity: self.pool.capacity_pages(),
            });
        }
        ledger.held += 1;
        Ok(PageGuard {
            pool: Arc::clone(&self.pool.inner),
            quota: Arc::clone(&self.quota),
            epoch: ledger.epoch,
        })
    }

    /// Return every page this accessor handed out to the pool, whether or not
    /// the guards are still alive. Returns the number of pages reclaimed.
    pub fn release_all(&self) -> usize {
        let mut ledger = self.quota.ledger();
        let reclaimed = ledger.held;
        ledger.held = 0;
        ledger.epoch += 1;
        if reclaimed > 0 {
            self.pool.inner.release(reclaimed);
        }
        reclaimed
    }
}

/// RAII handle for one scratch page.
pub struct PageGuard {
    pool: Arc<PoolInner>,
    quota: Arc<QuotaState>,
    epoch: u64,
}

impl PageGuard {
    pub fn size(&self) -> usize {
        self.pool.page_size
    }

    /// False once the owning accessor reclaimed its pages.
    pub fn is_live(&self) -> bool {
        self.quota.ledger().epoch == self.epoch
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        let mut ledger = self.quota.ledger();
        if ledger.epoch == self.epoch {
            ledger.held -= 1;
            self.pool.release(1);
        }
    }
}

impl std::fmt::Debug for PageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("stream", &self.quota.stream)
            .field("size", &self.pool.page_size)
            .finish()
    }
}
