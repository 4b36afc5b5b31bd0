//! The far side of a ring-backed port.
//!
//! A [`Wire`] owns the rings a port was built on with `rte_eth_from_rings`.
//! Frames injected on the wire are what the port receives; frames the port
//! transmits are collected from the wire. A looped wire hands the same rings
//! to both directions, so everything transmitted comes straight back in.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use pmd_net::api::Errno;
use pmd_net::api::rte::eth::{EthDev, PortId, QueueId};
use pmd_net::api::rte::pktmbuf::MemPool;
use pmd_net::api::rte::ring::{Ring, eth_from_rings};
use tracing::{debug, warn};

/// Keeps ring and port names unique within the process.
static NEXT_WIRE: AtomicU32 = AtomicU32::new(0);

struct WireInner {
    port_id: PortId,
    mempool: MemPool,
    rx: Vec<Ring>,
    tx: Vec<Ring>,
    looped: bool,
}

/// Shared handle to a port's rings. Cheap to clone and usable from any thread.
#[derive(Clone)]
pub struct Wire {
    inner: Arc<WireInner>,
}

impl Wire {
    /// Create a port with `nb_rx` RX and `nb_tx` TX rings.
    ///
    /// Frames are injected with mbufs from `mempool`.
    pub fn create(
        nb_rx: u16,
        nb_tx: u16,
        rx_ring_size: u32,
        tx_ring_size: u32,
        mempool: &MemPool,
    ) -> Result<Self, Errno> {
        let id = NEXT_WIRE.fetch_add(1, Ordering::Relaxed);
        let rx = create_rings(id, "rx", nb_rx, rx_ring_size)?;
        let tx = create_rings(id, "tx", nb_tx, tx_ring_size)?;
        Self::attach(id, rx, tx, false, mempool)
    }

    /// Create a port whose TX queue `i` feeds RX queue `i`.
    pub fn looped(nb_queues: u16, ring_size: u32, mempool: &MemPool) -> Result<Self, Errno> {
        let id = NEXT_WIRE.fetch_add(1, Ordering::Relaxed);
        let rings = create_rings(id, "lo", nb_queues, ring_size)?;
        Self::attach(id, rings, Vec::new(), true, mempool)
    }

    fn attach(
        id: u32,
        rx: Vec<Ring>,
        tx: Vec<Ring>,
        looped: bool,
        mempool: &MemPool,
    ) -> Result<Self, Errno> {
        let name = format!("net_wire{id}");
        let tx_rings = if looped { &rx } else { &tx };
        let port_id = eth_from_rings(&name, &rx, tx_rings, mempool.socket_id().max(0) as u32)?;
        debug!(port_id, name, looped, "Wire attached");
        Ok(Self {
            inner: Arc::new(WireInner {
                port_id,
                mempool: mempool.clone(),
                rx,
                tx,
                looped,
            }),
        })
    }

    pub fn port_id(&self) -> PortId {
        self.inner.port_id
    }

    fn link_up(&self) -> bool {
        EthDev::new(self.inner.port_id)
            .map(|dev| dev.link_status().is_up())
            .unwrap_or(false)
    }

    /// Put `frame` on RX queue 0. Returns `false` if the link is down, the
    /// pool is exhausted or the ring is full.
    pub fn inject(&self, frame: &[u8]) -> bool {
        self.inject_queue(0, frame)
    }

    pub fn inject_queue(&self, queue_id: QueueId, frame: &[u8]) -> bool {
        let Some(ring) = self.inner.rx.get(usize::from(queue_id)) else {
            return false;
        };
        if !self.link_up() {
            return false;
        }
        let Some(mut mbuf) = self.inner.mempool.try_alloc() else {
            return false;
        };
        if !mbuf.copy_from_slice(frame) {
            return false;
        }
        ring.enqueue(mbuf).is_ok()
    }

    fn tx_rings(&self) -> &[Ring] {
        if self.inner.looped {
            &self.inner.rx
        } else {
            &self.inner.tx
        }
    }

    /// Take every frame the port has transmitted, queue by queue.
    pub fn collect(&self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for ring in self.tx_rings() {
            loop {
                let batch = ring.dequeue_burst(64);
                if batch.is_empty() {
                    break;
                }
                frames.extend(batch.iter().map(|m| m.data().to_vec()));
            }
        }
        frames
    }

    /// Free every transmitted frame, returning how many there were.
    pub fn discard(&self) -> usize {
        self.tx_rings().iter().map(Ring::drain).sum()
    }

    /// Frames waiting for the port to receive them
    pub fn rx_pending(&self) -> u32 {
        self.inner.rx.iter().map(Ring::count).sum()
    }

    /// Frames transmitted and not yet collected
    pub fn tx_pending(&self) -> u32 {
        self.tx_rings().iter().map(Ring::count).sum()
    }
}

impl std::fmt::Debug for Wire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wire")
            .field("port_id", &self.inner.port_id)
            .field("looped", &self.inner.looped)
            .finish()
    }
}

impl Drop for WireInner {
    fn drop(&mut self) {
        let closed = EthDev::new(self.port_id).and_then(|dev| {
            dev.stop()?;
            dev.close()
        });
        // ENODEV: the port was already closed by its owner.
        if let Err(e) = closed.or_else(|e| if e == Errno::ENODEV { Ok(()) } else { Err(e) }) {
            // The port may still reference the rings.
            warn!(port_id = self.port_id, error = %e, "Wire port not closed, leaking its rings");
            std::mem::forget(std::mem::take(&mut self.rx));
            std::mem::forget(std::mem::take(&mut self.tx));
        }
    }
}

fn create_rings(id: u32, dir: &str, n: u16, size: u32) -> Result<Vec<Ring>, Errno> {
    (0..n)
        .map(|q| Ring::create(&format!("w{id}_{dir}{q}"), size, -1))
        .collect()
}
