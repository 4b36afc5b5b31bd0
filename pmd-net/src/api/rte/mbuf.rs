// Mbuf
// See: rte_mbuf.h
//
// One packet buffer borrowed from a MemPool. The handle is move-only: whoever
// holds it owns the buffer, and dropping it is the only way to give it back.

use std::ptr::NonNull;

use pmd_net_sys::ffi;

use super::eth::PortId;
use super::pktmbuf::MemPool;

/// `port` of an mbuf that has not been received on any port.
pub const MBUF_PORT_INVALID: PortId = u16::MAX;

/// A single-segment packet buffer.
///
/// This provides a buffer-like interface for packet data.
/// The buffer is returned to its pool when dropped.
pub struct Mbuf {
    inner: NonNull<ffi::rte_mbuf>,
}

// An mbuf has exactly one owner at a time.
unsafe impl Send for Mbuf {}

impl Mbuf {
    /// Allocate a new mbuf from the given mempool.
    ///
    /// Returns `None` if allocation fails (pool exhausted).
    #[inline]
    pub fn alloc(mempool: &MemPool) -> Option<Self> {
        let ptr = unsafe { ffi::rust_pktmbuf_alloc(mempool.as_ptr()) };
        unsafe { Self::from_raw(ptr) }
    }

    /// Take ownership of a raw mbuf pointer.
    ///
    /// # Safety
    /// `ptr` must be null or a valid mbuf that nothing else will free.
    #[inline]
    pub unsafe fn from_raw(ptr: *mut ffi::rte_mbuf) -> Option<Self> {
        NonNull::new(ptr).map(|inner| Mbuf { inner })
    }

    /// Give up ownership without freeing, e.g. after the mbuf was handed to
    /// a TX queue or a ring.
    #[inline]
    pub fn into_raw(self) -> *mut ffi::rte_mbuf {
        let ptr = self.inner.as_ptr();
        std::mem::forget(self);
        ptr
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut ffi::rte_mbuf {
        self.inner.as_ptr()
    }

    /// Give the buffer back to its pool.
    #[inline]
    pub fn free(self) {
        drop(self)
    }

    /// Input port, set by the receive path.
    #[inline]
    pub fn port(&self) -> PortId {
        unsafe { ffi::rust_pktmbuf_port(self.as_ptr()) }
    }

    #[inline]
    pub fn set_port(&mut self, port: PortId) {
        unsafe { ffi::rust_pktmbuf_set_port(self.as_ptr(), port) }
    }

    /// Get the current data length (bytes of valid data).
    #[inline]
    pub fn data_len(&self) -> usize {
        usize::from(unsafe { ffi::rust_pktmbuf_data_len(self.as_ptr()) })
    }

    /// Get the total packet length. Mbufs are never chained here, so this
    /// equals `data_len`.
    #[inline]
    pub fn pkt_len(&self) -> usize {
        unsafe { ffi::rust_pktmbuf_pkt_len(self.as_ptr()) as usize }
    }

    /// Get the headroom (unused space at the front of the buffer).
    #[inline]
    pub fn headroom(&self) -> usize {
        usize::from(unsafe { ffi::rust_pktmbuf_headroom(self.as_ptr()) })
    }

    /// Get the tailroom (unused space at the end of the buffer).
    #[inline]
    pub fn tailroom(&self) -> usize {
        usize::from(unsafe { ffi::rust_pktmbuf_tailroom(self.as_ptr()) })
    }

    /// Get the total capacity (data_len + tailroom).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data_len() + self.tailroom()
    }

    /// Get an immutable slice of the packet data.
    #[inline]
    pub fn data(&self) -> &[u8] {
        unsafe {
            let ptr = ffi::rust_pktmbuf_mtod(self.as_ptr());
            std::slice::from_raw_parts(ptr, self.data_len())
        }
    }

    /// Get a mutable slice of the packet data.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        unsafe {
            let ptr = ffi::rust_pktmbuf_mtod(self.as_ptr());
            std::slice::from_raw_parts_mut(ptr, self.data_len())
        }
    }

    /// Append space to the end of the packet data.
    ///
    /// Returns a mutable slice to the newly appended region,
    /// or `None` if there's not enough tailroom.
    #[inline]
    pub fn append(&mut self, len: usize) -> Option<&mut [u8]> {
        let len16 = u16::try_from(len).ok()?;
        let ptr = unsafe { ffi::rust_pktmbuf_append(self.as_ptr(), len16) };
        if ptr.is_null() {
            return None;
        }
        Some(unsafe { std::slice::from_raw_parts_mut(ptr as *mut u8, len) })
    }

    /// Prepend space to the front of the packet data.
    ///
    /// Returns a mutable slice to the newly prepended region,
    /// or `None` if there's not enough headroom.
    #[inline]
    pub fn prepend(&mut self, len: usize) -> Option<&mut [u8]> {
        let len16 = u16::try_from(len).ok()?;
        let ptr = unsafe { ffi::rust_pktmbuf_prepend(self.as_ptr(), len16) };
        if ptr.is_null() {
            return None;
        }
        Some(unsafe { std::slice::from_raw_parts_mut(ptr as *mut u8, len) })
    }

    /// Remove bytes from the beginning of the packet data.
    ///
    /// Returns `false` if len > data_len.
    #[inline]
    pub fn adj(&mut self, len: usize) -> bool {
        match u16::try_from(len) {
            Ok(len) => !unsafe { ffi::rust_pktmbuf_adj(self.as_ptr(), len) }.is_null(),
            Err(_) => false,
        }
    }

    /// Remove bytes from the end of the packet data.
    ///
    /// Returns `false` if len > data_len.
    #[inline]
    pub fn trim(&mut self, len: usize) -> bool {
        match u16::try_from(len) {
            Ok(len) => unsafe { ffi::rust_pktmbuf_trim(self.as_ptr(), len) == 0 },
            Err(_) => false,
        }
    }

    /// Reset the mbuf to its initial state: empty, default headroom and
    /// `MBUF_PORT_INVALID`.
    #[inline]
    pub fn reset(&mut self) {
        unsafe { ffi::rust_pktmbuf_reset(self.as_ptr()) }
    }

    /// Copy data from a slice, resetting the mbuf first.
    pub fn copy_from_slice(&mut self, data: &[u8]) -> bool {
        self.reset();
        match self.append(data.len()) {
            Some(buf) => {
                buf.copy_from_slice(data);
                true
            }
            None => false,
        }
    }
}

impl Drop for Mbuf {
    fn drop(&mut self) {
        unsafe { ffi::rust_pktmbuf_free(self.inner.as_ptr()) }
    }
}

impl AsRef<[u8]> for Mbuf {
    fn as_ref(&self) -> &[u8] {
        self.data()
    }
}

impl AsMut<[u8]> for Mbuf {
    fn as_mut(&mut self) -> &mut [u8] {
        self.data_mut()
    }
}

impl std::fmt::Debug for Mbuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mbuf")
            .field("port", &self.port())
            .field("data_len", &self.data_len())
            .field("headroom", &self.headroom())
            .field("tailroom", &self.tailroom())
            .finish()
    }
}
