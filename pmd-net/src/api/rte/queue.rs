// RX/TX Queue API
// See: rte_ethdev.h
//
// Queue handles are claimed from an EthDev and are the only way to run
// bursts. Each handle is move-only and releases its claim on drop, so a
// queue is polled by exactly one owner at a time.

use arrayvec::ArrayVec;
use pmd_net_sys::ffi;

use super::eth::{self, PortId, QueueId};
use super::mbuf::Mbuf;
use crate::api::Result;

/// Maximum burst size for RX/TX operations
pub const MAX_BURST_SIZE: usize = 64;

/// RX Queue handle for receiving packets
pub struct RxQueue {
    port_id: PortId,
    queue_id: QueueId,
}

impl RxQueue {
    pub(crate) fn claim(port_id: PortId, queue_id: QueueId) -> Result<Self> {
        eth::claim_rx(port_id, queue_id)?;
        Ok(Self { port_id, queue_id })
    }

    /// Get the port ID
    #[inline]
    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    /// Get the queue ID
    #[inline]
    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    /// Receive a burst of packets into the provided buffer.
    ///
    /// Returns the number of packets received, never blocking.
    /// Packets are appended to the `mbufs` vector (up to its remaining capacity).
    #[inline]
    pub fn rx<const N: usize>(&self, mbufs: &mut ArrayVec<Mbuf, N>) -> usize {
        self.rx_max(mbufs, MAX_BURST_SIZE)
    }

    /// Like [`rx`](Self::rx) but receives at most `nb_pkts` packets.
    #[inline]
    pub fn rx_max<const N: usize>(&self, mbufs: &mut ArrayVec<Mbuf, N>, nb_pkts: usize) -> usize {
        // A stopped port has no fast-path ops.
        if !eth::is_started(self.port_id) {
            return 0;
        }
        let nb_pkts = mbufs.remaining_capacity().min(nb_pkts).min(MAX_BURST_SIZE);
        if nb_pkts == 0 {
            return 0;
        }

        let mut raw_mbufs: [*mut ffi::rte_mbuf; MAX_BURST_SIZE] =
            [std::ptr::null_mut(); MAX_BURST_SIZE];

        let received = unsafe {
            ffi::rust_eth_rx_burst(
                self.port_id,
                self.queue_id,
                raw_mbufs.as_mut_ptr(),
                nb_pkts as u16,
            )
        };

        for raw_mbuf in raw_mbufs.iter().take(usize::from(received)) {
            if let Some(mbuf) = unsafe { Mbuf::from_raw(*raw_mbuf) } {
                // Cannot fail: nb_pkts was capped at the remaining capacity.
                let _ = mbufs.try_push(mbuf);
            }
        }

        usize::from(received)
    }

    /// Receive a burst of packets, returning them as a new ArrayVec.
    #[inline]
    pub fn rx_burst<const N: usize>(&self) -> ArrayVec<Mbuf, N> {
        let mut mbufs = ArrayVec::new();
        self.rx(&mut mbufs);
        mbufs
    }
}

impl Drop for RxQueue {
    fn drop(&mut self) {
        eth::release_rx(self.port_id, self.queue_id);
    }
}

impl std::fmt::Debug for RxQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RxQueue")
            .field("port_id", &self.port_id)
            .field("queue_id", &self.queue_id)
            .finish()
    }
}

/// TX Queue handle for transmitting packets
pub struct TxQueue {
    port_id: PortId,
    queue_id: QueueId,
}

impl TxQueue {
    pub(crate) fn claim(port_id: PortId, queue_id: QueueId) -> Result<Self> {
        eth::claim_tx(port_id, queue_id)?;
        Ok(Self { port_id, queue_id })
    }

    /// Get the port ID
    #[inline]
    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    /// Get the queue ID
    #[inline]
    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    /// Transmit a burst of packets from the provided buffer.
    ///
    /// Successfully transmitted packets are removed from the front of `mbufs`.
    /// Returns the number of packets transmitted, which may be anything from
    /// 0 to `mbufs.len()` when the ring is congested.
    ///
    /// Note: Packets that are transmitted are freed by the driver. Packets
    /// that fail to transmit remain in the buffer in their original order;
    /// the caller decides whether to retry or drop them.
    #[inline]
    pub fn tx<const N: usize>(&self, mbufs: &mut ArrayVec<Mbuf, N>) -> usize {
        if mbufs.is_empty() || !eth::is_started(self.port_id) {
            return 0;
        }

        let nb_pkts = mbufs.len().min(MAX_BURST_SIZE);

        // Build array of raw pointers (without consuming the Mbufs yet)
        let mut raw_mbufs: [*mut ffi::rte_mbuf; MAX_BURST_SIZE] =
            [std::ptr::null_mut(); MAX_BURST_SIZE];
        for (raw, mbuf) in raw_mbufs.iter_mut().zip(mbufs.iter().take(nb_pkts)) {
            *raw = mbuf.as_ptr();
        }

        let sent = unsafe {
            ffi::rust_eth_tx_burst(
                self.port_id,
                self.queue_id,
                raw_mbufs.as_mut_ptr(),
                nb_pkts as u16,
            )
        };
        let sent = usize::from(sent);

        // The driver owns the sent prefix now.
        for mbuf in mbufs.drain(..sent) {
            let _ = mbuf.into_raw();
        }

        sent
    }

    /// Transmit a single packet.
    ///
    /// On success the mbuf is consumed and `None` is returned.
    /// On failure, the mbuf is returned via the Option.
    #[inline]
    pub fn tx_one(&self, mbuf: Mbuf) -> Option<Mbuf> {
        if !eth::is_started(self.port_id) {
            return Some(mbuf);
        }
        let mut raw_mbuf = mbuf.as_ptr();
        let sent =
            unsafe { ffi::rust_eth_tx_burst(self.port_id, self.queue_id, &mut raw_mbuf, 1) };
        if sent == 1 {
            let _ = mbuf.into_raw();
            None
        } else {
            Some(mbuf)
        }
    }
}

impl Drop for TxQueue {
    fn drop(&mut self) {
        eth::release_tx(self.port_id, self.queue_id);
    }
}

impl std::fmt::Debug for TxQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxQueue")
            .field("port_id", &self.port_id)
            .field("queue_id", &self.queue_id)
            .finish()
    }
}
