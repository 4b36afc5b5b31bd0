use crate::api::rte::eth::{EthDev, PortId, QueueId};
use crate::api::rte::pktmbuf::MemPool;
use crate::api::rte::queue::TxQueue;
use crate::api::{Errno, Result};

/// Transmit path for frames built outside the worker loop.
///
/// Owns its own TX queue, so it never competes with a worker for one. `send`
/// takes `&self` and may be called from the pipeline on any lcore.
#[derive(Debug)]
pub struct Egress {
    txq: TxQueue,
    pool: MemPool,
}

impl Egress {
    pub fn new(txq: TxQueue, pool: MemPool) -> Self {
        Self { txq, pool }
    }

    /// Claim TX queue `queue_id` of `dev`, allocating from `pool`.
    pub fn claim(dev: &EthDev, queue_id: QueueId, pool: &MemPool) -> Result<Self> {
        Ok(Self::new(dev.tx_queue(queue_id)?, pool.clone()))
    }

    pub fn port_id(&self) -> PortId {
        self.txq.port_id()
    }

    pub fn queue_id(&self) -> QueueId {
        self.txq.queue_id()
    }

    /// Copy `frame` into a fresh mbuf and transmit it.
    ///
    /// Errors:
    /// - `ENOBUFS`: the pool is exhausted
    /// - `EMSGSIZE`: the frame does not fit in one mbuf
    /// - `EAGAIN`: the TX ring is full; the mbuf has been freed
    pub fn send(&self, frame: &[u8]) -> Result<()> {
        let mut mbuf = self.pool.try_alloc().ok_or(Errno::ENOBUFS)?;
        if !mbuf.copy_from_slice(frame) {
            return Err(Errno::EMSGSIZE);
        }
        mbuf.set_port(self.port_id());
        match self.txq.tx_one(mbuf) {
            None => Ok(()),
            Some(_unsent) => Err(Errno::EAGAIN),
        }
    }
}
