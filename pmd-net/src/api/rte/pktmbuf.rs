// pktmbuf API
// See: rte_mbuf.h, rte_mempool.h

use std::ffi::CString;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use pmd_net_sys::ffi;

use super::mbuf::Mbuf;
use crate::api::{Errno, Result, rte_errno};

/// Bytes reserved in front of the packet data of every fresh mbuf.
pub const MBUF_HEADROOM: u16 = ffi::RTE_PKTMBUF_HEADROOM;

/// Default data room, excluding headroom.
pub const MBUF_DEFAULT_DATAROOM: u16 = ffi::RTE_MBUF_DEFAULT_DATAROOM;

/// Largest allowed per-lcore cache.
pub const MEMPOOL_CACHE_MAX_SIZE: u32 = ffi::RTE_MEMPOOL_CACHE_MAX_SIZE;

/// Socket id meaning "no preference".
pub const SOCKET_ID_ANY: i32 = ffi::SOCKET_ID_ANY;

/// Configuration for creating a MemPool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemPoolConfig {
    /// Number of mbufs in the pool (optimum: 2^q - 1)
    pub num_mbufs: u32,
    /// Per-lcore cache size (0 to disable caching)
    pub cache_size: u32,
    /// Data room size including MBUF_HEADROOM
    pub data_room_size: u16,
    /// NUMA socket ID (-1 for SOCKET_ID_ANY)
    pub socket_id: i32,
}

impl Default for MemPoolConfig {
    fn default() -> Self {
        Self {
            num_mbufs: 8191, // 2^13 - 1
            cache_size: 250,
            data_room_size: MBUF_DEFAULT_DATAROOM + MBUF_HEADROOM,
            socket_id: SOCKET_ID_ANY,
        }
    }
}

impl MemPoolConfig {
    /// Create a new MemPoolConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of mbufs in the pool.
    ///
    /// Optimum value is 2^q - 1 (e.g., 8191, 16383, 32767).
    pub fn num_mbufs(mut self, n: u32) -> Self {
        self.num_mbufs = n;
        self
    }

    /// Set the per-lcore cache size.
    ///
    /// Set to 0 to disable caching. Must not exceed num_mbufs / 1.5.
    pub fn cache_size(mut self, size: u32) -> Self {
        self.cache_size = size;
        self
    }

    /// Set the data room size (including MBUF_HEADROOM).
    pub fn data_room_size(mut self, size: u16) -> Self {
        self.data_room_size = size;
        self
    }

    /// Set the NUMA socket ID.
    pub fn socket_id(mut self, id: i32) -> Self {
        self.socket_id = id;
        self
    }

    /// The checks `rte_pktmbuf_pool_create` would fail on, done up front so
    /// a bad config never reaches the EAL heap.
    pub fn validate(&self) -> Result<()> {
        if self.num_mbufs == 0 || self.data_room_size <= MBUF_HEADROOM {
            return Err(Errno::EINVAL);
        }
        // cache * 1.5 must fit in the pool
        let flush_threshold = u64::from(self.cache_size) * 3 / 2;
        if self.cache_size > MEMPOOL_CACHE_MAX_SIZE || flush_threshold > u64::from(self.num_mbufs)
        {
            return Err(Errno::EINVAL);
        }
        Ok(())
    }
}

struct PoolInner {
    ptr: NonNull<ffi::rte_mempool>,
    name: String,
    config: MemPoolConfig,
    alloc_failures: AtomicU64,
}

// DPDK mempools are thread-safe
unsafe impl Send for PoolInner {}
unsafe impl Sync for PoolInner {}

impl Drop for PoolInner {
    fn drop(&mut self) {
        let in_use = unsafe { ffi::rte_mempool_in_use_count(self.ptr.as_ptr()) };
        if in_use != 0 {
            // A device queue or a stray handle still points into the pool.
            tracing::warn!(name = %self.name, in_use, "Mempool leaked with mbufs in use");
            return;
        }
        unsafe { ffi::rte_mempool_free(self.ptr.as_ptr()) };
    }
}

/// Packet buffer pool (owning, cheap to clone).
///
/// All clones share one `rte_mempool`, freed when the last clone is dropped
/// with every mbuf back in the pool.
#[derive(Clone)]
pub struct MemPool {
    inner: Arc<PoolInner>,
}

impl MemPool {
    /// Create a new pktmbuf pool, reserving all buffer memory up front.
    ///
    /// Fails with `EINVAL` on a bad configuration, otherwise with the
    /// `rte_errno` of `rte_pktmbuf_pool_create` (`ENOMEM`, `EEXIST` for a
    /// name already in use).
    pub fn create<S: Into<String>>(name: S, config: &MemPoolConfig) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Errno::EINVAL);
        }
        config.validate()?;
        let c_name = CString::new(name.as_str()).map_err(|_| Errno::EINVAL)?;

        let ptr = unsafe {
            ffi::rte_pktmbuf_pool_create(
                c_name.as_ptr(),
                config.num_mbufs,
                config.cache_size,
                0,
                config.data_room_size,
                config.socket_id,
            )
        };
        let ptr = NonNull::new(ptr).ok_or_else(rte_errno)?;

        tracing::debug!(
            name = %name,
            num_mbufs = config.num_mbufs,
            cache_size = config.cache_size,
            data_room_size = config.data_room_size,
            socket_id = config.socket_id,
            "Mempool created"
        );

        Ok(MemPool {
            inner: Arc::new(PoolInner {
                ptr,
                name,
                config: config.clone(),
                alloc_failures: AtomicU64::new(0),
            }),
        })
    }

    /// Create a mempool with default configuration
    pub fn create_default<S: Into<String>>(name: S, num_mbufs: u32) -> Result<Self> {
        let config = MemPoolConfig {
            num_mbufs,
            ..Default::default()
        };
        Self::create(name, &config)
    }

    /// Get the raw pointer to the underlying rte_mempool
    #[inline]
    pub fn as_ptr(&self) -> *mut ffi::rte_mempool {
        self.inner.ptr.as_ptr()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Total number of mbufs the pool was created with.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.inner.config.num_mbufs
    }

    /// Number of free mbufs, including those parked in lcore caches.
    #[inline]
    pub fn avail_count(&self) -> u32 {
        unsafe { ffi::rte_mempool_avail_count(self.as_ptr()) }
    }

    /// Number of mbufs currently held outside the pool.
    #[inline]
    pub fn in_use_count(&self) -> u32 {
        unsafe { ffi::rte_mempool_in_use_count(self.as_ptr()) }
    }

    pub fn is_full(&self) -> bool {
        self.avail_count() == self.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.avail_count() == 0
    }

    /// Number of allocation attempts that found the pool exhausted.
    pub fn alloc_failures(&self) -> u64 {
        self.inner.alloc_failures.load(Ordering::Relaxed)
    }

    pub fn socket_id(&self) -> i32 {
        self.inner.config.socket_id
    }

    /// Try to allocate an mbuf from this pool.
    ///
    /// Returns `None` if the pool is exhausted.
    #[inline]
    pub fn try_alloc(&self) -> Option<Mbuf> {
        let mbuf = Mbuf::alloc(self);
        if mbuf.is_none() {
            self.inner.alloc_failures.fetch_add(1, Ordering::Relaxed);
        }
        mbuf
    }

    /// Fill a batch of mbufs up to the remaining capacity of the ArrayVec.
    ///
    /// Returns the number of mbufs allocated.
    #[inline]
    pub fn fill_batch<const N: usize>(&self, batch: &mut arrayvec::ArrayVec<Mbuf, N>) -> usize {
        let mut count = 0;
        while batch.len() < batch.capacity() {
            match self.try_alloc() {
                Some(mbuf) => {
                    batch.push(mbuf);
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// Get the data room size for mbufs in this pool.
    #[inline]
    pub fn data_room_size(&self) -> u16 {
        unsafe { ffi::rust_pktmbuf_data_room_size(self.as_ptr()) }
    }
}

impl fmt::Debug for MemPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemPool")
            .field("name", &self.inner.name)
            .field("capacity", &self.capacity())
            .field("avail", &self.avail_count())
            .finish()
    }
}
