// Ring API
// See: rte_ring.h, rte_eth_ring.h
//
// Mbuf rings created outside a port, and ring-backed ports built on top of
// them with rte_eth_from_rings. The test harness uses these to stand on the
// far side of a port: what the port transmits lands in its TX ring, and
// whatever is enqueued on its RX ring is what the port receives.

use std::ffi::CString;
use std::ptr::NonNull;

use pmd_net_sys::ffi;

use super::eth::PortId;
use super::mbuf::Mbuf;
use crate::api::{Errno, Result, rte_errno};

/// Largest burst moved through a ring in one call
const RING_BURST: usize = 64;

/// A multi-producer, multi-consumer ring of mbufs with an exact capacity.
pub struct Ring {
    ptr: NonNull<ffi::rte_ring>,
    name: String,
    capacity: u32,
}

// rte_ring is MP/MC safe unless created with the single-producer/consumer flags.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    /// Create a ring holding exactly `capacity` mbufs.
    ///
    /// Names share the EAL memzone namespace and must be unique.
    pub fn create(name: &str, capacity: u32, socket_id: i32) -> Result<Self> {
        if capacity == 0 {
            return Err(Errno::EINVAL);
        }
        let c_name = CString::new(name).map_err(|_| Errno::EINVAL)?;
        let ptr = unsafe {
            ffi::rte_ring_create(c_name.as_ptr(), capacity, socket_id, ffi::RING_F_EXACT_SZ)
        };
        let ptr = NonNull::new(ptr).ok_or_else(rte_errno)?;
        Ok(Self {
            ptr,
            name: name.to_string(),
            capacity,
        })
    }

    pub fn as_ptr(&self) -> *mut ffi::rte_ring {
        self.ptr.as_ptr()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of mbufs currently queued
    pub fn count(&self) -> u32 {
        unsafe { ffi::rust_ring_count(self.ptr.as_ptr()) }
    }

    /// Number of free slots
    pub fn free_count(&self) -> u32 {
        unsafe { ffi::rust_ring_free_count(self.ptr.as_ptr()) }
    }

    /// Enqueue a single mbuf, handing it back when the ring is full.
    pub fn enqueue(&self, mbuf: Mbuf) -> std::result::Result<(), Mbuf> {
        let mut raw = mbuf.as_ptr();
        let n = unsafe { ffi::rust_ring_enqueue_burst(self.ptr.as_ptr(), &mut raw, 1) };
        if n == 1 {
            let _ = mbuf.into_raw();
            Ok(())
        } else {
            Err(mbuf)
        }
    }

    /// Enqueue as many mbufs as fit, removing them from the front of `mbufs`.
    pub fn enqueue_burst(&self, mbufs: &mut Vec<Mbuf>) -> usize {
        let mut total = 0;
        while !mbufs.is_empty() {
            let n = mbufs.len().min(RING_BURST);
            let mut raw: [*mut ffi::rte_mbuf; RING_BURST] = [std::ptr::null_mut(); RING_BURST];
            for (slot, m) in raw.iter_mut().zip(mbufs.iter()) {
                *slot = m.as_ptr();
            }
            let done = unsafe {
                ffi::rust_ring_enqueue_burst(self.ptr.as_ptr(), raw.as_mut_ptr(), n as u32)
            } as usize;
            for m in mbufs.drain(..done) {
                let _ = m.into_raw();
            }
            total += done;
            if done < n {
                break;
            }
        }
        total
    }

    /// Dequeue up to `max` mbufs.
    pub fn dequeue_burst(&self, max: usize) -> Vec<Mbuf> {
        let mut out = Vec::new();
        while out.len() < max {
            let n = (max - out.len()).min(RING_BURST);
            let mut raw: [*mut ffi::rte_mbuf; RING_BURST] = [std::ptr::null_mut(); RING_BURST];
            let got = unsafe {
                ffi::rust_ring_dequeue_burst(self.ptr.as_ptr(), raw.as_mut_ptr(), n as u32)
            } as usize;
            out.extend(
                raw.iter()
                    .take(got)
                    .filter_map(|p| unsafe { Mbuf::from_raw(*p) }),
            );
            if got < n {
                break;
            }
        }
        out
    }

    /// Free every queued mbuf, returning how many were dropped.
    pub fn drain(&self) -> usize {
        let mut dropped = 0;
        loop {
            let batch = self.dequeue_burst(RING_BURST);
            if batch.is_empty() {
                return dropped;
            }
            dropped += batch.len();
        }
    }
}

impl Drop for Ring {
    fn drop(&mut self) {
        self.drain();
        unsafe { ffi::rte_ring_free(self.ptr.as_ptr()) };
    }
}

impl std::fmt::Debug for Ring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ring")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("count", &self.count())
            .finish()
    }
}

/// Create an ethdev whose RX queue `i` dequeues from `rx[i]` and whose TX
/// queue `i` enqueues onto `tx[i]`.
///
/// The rings must outlive the port: close the port before dropping them.
pub fn eth_from_rings(name: &str, rx: &[Ring], tx: &[Ring], socket_id: u32) -> Result<PortId> {
    if rx.is_empty() || tx.is_empty() {
        return Err(Errno::EINVAL);
    }
    let c_name = CString::new(name).map_err(|_| Errno::EINVAL)?;
    let rx_ptrs: Vec<*mut ffi::rte_ring> = rx.iter().map(Ring::as_ptr).collect();
    let tx_ptrs: Vec<*mut ffi::rte_ring> = tx.iter().map(Ring::as_ptr).collect();
    let ret = unsafe {
        ffi::rte_eth_from_rings(
            c_name.as_ptr(),
            rx_ptrs.as_ptr(),
            rx_ptrs.len() as u32,
            tx_ptrs.as_ptr(),
            tx_ptrs.len() as u32,
            socket_id,
        )
    };
    if ret < 0 {
        return Err(rte_errno());
    }
    PortId::try_from(ret).map_err(|_| Errno::ERANGE)
}
