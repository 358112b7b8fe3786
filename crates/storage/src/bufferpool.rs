//! Pool of reusable, fixed-size buffers, grounded on the bucketed
//! allocator the original proxy used to avoid a malloc per frame on the
//! splice hot path.
//!
//! Unlike the original (which is explicitly documented as not
//! thread-safe apart from its statistics accessor), this pool is shared
//! behind an `Arc` across session tasks, so each bucket guards its free
//! list with a `Mutex`; the mutex is only ever held for a `Vec::pop`/`push`.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// One allocation-count / high-water triple per configured bucket size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferAllocationStat {
    pub buffer_size: usize,
    pub current_allocation: u64,
    pub highwater_mark: u64,
}

#[derive(Debug, Default)]
pub struct PoolStatistics {
    pub buckets: Vec<BufferAllocationStat>,
    pub spillover_count: u64,
}

struct BufferSource {
    buffer_size: usize,
    free_list: Mutex<Vec<Vec<u8>>>,
    alloc_count: AtomicU64,
    dealloc_count: AtomicU64,
    high_water: AtomicU64,
}

impl BufferSource {
    fn new(buffer_size: usize) -> Self {
        BufferSource {
            buffer_size,
            free_list: Mutex::new(Vec::new()),
            alloc_count: AtomicU64::new(0),
            dealloc_count: AtomicU64::new(0),
            high_water: AtomicU64::new(0),
        }
    }

    fn acquire(&self) -> Vec<u8> {
        let reused = self.free_list.lock().unwrap().pop();
        let buf = reused.unwrap_or_else(|| vec![0u8; self.buffer_size]);

        let outstanding = self.alloc_count.fetch_add(1, Ordering::Relaxed) + 1
            - self.dealloc_count.load(Ordering::Relaxed);
        self.high_water.fetch_max(outstanding, Ordering::Relaxed);
        buf
    }

    fn release(&self, mut buf: Vec<u8>) {
        self.dealloc_count.fetch_add(1, Ordering::Relaxed);
        buf.clear();
        buf.resize(self.buffer_size, 0);
        self.free_list.lock().unwrap().push(buf);
    }

    fn stats(&self) -> BufferAllocationStat {
        let alloc = self.alloc_count.load(Ordering::Relaxed);
        let dealloc = self.dealloc_count.load(Ordering::Relaxed);
        BufferAllocationStat {
            buffer_size: self.buffer_size,
            current_allocation: alloc.saturating_sub(dealloc),
            highwater_mark: self.high_water.load(Ordering::Relaxed),
        }
    }
}

/// Pool of buffers drawn from a range of fixed-size buckets, with
/// one-off spillover allocation for requests larger than every bucket.
pub struct BufferPool {
    sources: Vec<Arc<BufferSource>>,
    spillover: AtomicU64,
}

impl BufferPool {
    /// Construct the pool with the given bucket sizes; they are sorted
    /// ascending so `acquire` can pick the smallest bucket that fits.
    pub fn new(buckets: &[usize]) -> Arc<Self> {
        let mut sizes = buckets.to_vec();
        sizes.sort_unstable();
        sizes.dedup();
        let sources = sizes.into_iter().map(|s| Arc::new(BufferSource::new(s))).collect();
        Arc::new(BufferPool {
            sources,
            spillover: AtomicU64::new(0),
        })
    }

    /// Acquire a buffer able to hold at least `sz` bytes.
    pub fn acquire(self: &Arc<Self>, sz: usize) -> BufferHandle {
        for source in &self.sources {
            if sz <= source.buffer_size {
                let buf = source.acquire();
                return BufferHandle {
                    buf,
                    len: sz,
                    source: Some(source.clone()),
                };
            }
        }

        self.spillover.fetch_add(1, Ordering::Relaxed);
        BufferHandle {
            buf: vec![0u8; sz],
            len: sz,
            source: None,
        }
    }

    pub fn statistics(&self) -> PoolStatistics {
        PoolStatistics {
            buckets: self.sources.iter().map(|s| s.stats()).collect(),
            spillover_count: self.spillover.load(Ordering::Relaxed),
        }
    }
}

/// A buffer on loan from a [`BufferPool`]. Returns to its source bucket's
/// free list on drop; spillover buffers are simply dropped.
pub struct BufferHandle {
    buf: Vec<u8>,
    len: usize,
    source: Option<Arc<BufferSource>>,
}

impl Deref for BufferHandle {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl DerefMut for BufferHandle {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }
}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        if let Some(source) = self.source.take() {
            source.release(std::mem::take(&mut self.buf));
        }
    }
}
