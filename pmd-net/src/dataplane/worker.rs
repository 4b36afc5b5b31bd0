use std::sync::Arc;

use arrayvec::ArrayVec;
use tracing::{debug, info};

use super::dispatch::{PacketDispatch, Verdict};
use super::shutdown::StopToken;
use crate::api::rte::eth::{EthDev, PortId, QueueId};
use crate::api::rte::mbuf::Mbuf;
use crate::api::rte::queue::{MAX_BURST_SIZE, RxQueue, TxQueue};
use crate::api::{Errno, Result};

/// Default number of packets pulled per RX burst.
pub const BURST_SIZE: usize = 32;

/// The queue pair a worker polls on one port.
#[derive(Debug)]
pub struct PortQueues {
    rxq: RxQueue,
    txq: TxQueue,
}

impl PortQueues {
    /// Pair an RX and a TX queue. Both must belong to the same port.
    pub fn new(rxq: RxQueue, txq: TxQueue) -> Result<Self> {
        if rxq.port_id() != txq.port_id() {
            return Err(Errno::EINVAL);
        }
        Ok(Self { rxq, txq })
    }

    /// Claim RX and TX queue `queue_id` of `dev`.
    pub fn claim(dev: &EthDev, queue_id: QueueId) -> Result<Self> {
        Self::new(dev.rx_queue(queue_id)?, dev.tx_queue(queue_id)?)
    }

    pub fn port_id(&self) -> PortId {
        self.rxq.port_id()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Packets per RX burst, clamped to `1..=MAX_BURST_SIZE`.
    pub burst_size: usize,
    /// Extra TX attempts for a partially sent burst before the rest is freed.
    pub tx_retries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            burst_size: BURST_SIZE,
            tx_retries: 0,
        }
    }
}

/// Everything one worker lcore owns for the lifetime of the loop.
pub struct WorkerContext<D> {
    pub lcore_id: u32,
    pub ports: Vec<PortQueues>,
    pub stop: StopToken,
    pub dispatch: Arc<D>,
    pub config: WorkerConfig,
}

/// Per-worker counters, returned when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Completed round-robin passes over the owned ports
    pub passes: u64,
    /// Port visits that received nothing
    pub idle_polls: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    /// Forwarded packets the TX queue refused, freed by the worker
    pub tx_dropped: u64,
    /// Packets the dispatch asked to free
    pub dispatch_freed: u64,
}

impl std::ops::AddAssign for WorkerStats {
    fn add_assign(&mut self, rhs: Self) {
        self.passes += rhs.passes;
        self.idle_polls += rhs.idle_polls;
        self.rx_packets += rhs.rx_packets;
        self.tx_packets += rhs.tx_packets;
        self.tx_dropped += rhs.tx_dropped;
        self.dispatch_freed += rhs.dispatch_freed;
    }
}

/// Where a worker is in its life: `Running` until the stop token is seen,
/// `Draining` while what it still holds goes back to the pools, then
/// `Stopped`. There is no way back to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Draining,
    Stopped,
}

/// Poll-mode loop of one lcore.
///
/// Every mbuf received is, before the next port is visited, either accepted
/// by the TX queue or returned to its pool. Nothing is carried between bursts.
pub struct Worker<D> {
    ctx: WorkerContext<D>,
    batch: ArrayVec<Mbuf, MAX_BURST_SIZE>,
    stats: WorkerStats,
    state: WorkerState,
}

impl<D: PacketDispatch> Worker<D> {
    pub fn new(mut ctx: WorkerContext<D>) -> Self {
        ctx.config.burst_size = ctx.config.burst_size.clamp(1, MAX_BURST_SIZE);
        Self {
            ctx,
            batch: ArrayVec::new(),
            stats: WorkerStats::default(),
            state: WorkerState::Running,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Poll until the stop token is set, then drain.
    ///
    /// The token is checked before each port visit; a burst that has been
    /// received is always fully transmitted or freed first. The worker is
    /// `Stopped` when this returns.
    pub fn run(&mut self) -> WorkerStats {
        let ports: Vec<PortId> = self.ctx.ports.iter().map(PortQueues::port_id).collect();
        info!(lcore = self.ctx.lcore_id, ?ports, "Worker loop started");

        while self.state == WorkerState::Running {
            if self.poll_pass() == 0 {
                std::hint::spin_loop();
            }
        }
        self.finish()
    }

    /// One round-robin pass over the owned ports. Returns packets received.
    ///
    /// Stops early, between ports, once the stop token is set, leaving the
    /// worker `Draining`. Does nothing unless the worker is `Running`.
    pub fn poll_pass(&mut self) -> usize {
        let mut received = 0;
        if self.state != WorkerState::Running {
            return received;
        }
        for idx in 0..self.ctx.ports.len() {
            if self.ctx.stop.is_stopped() {
                self.state = WorkerState::Draining;
                return received;
            }
            received += self.poll_port(idx);
        }
        self.stats.passes += 1;
        if self.ctx.stop.is_stopped() {
            self.state = WorkerState::Draining;
        }
        received
    }

    /// Receive, dispatch, transmit and reclaim one burst on port `idx`.
    fn poll_port(&mut self, idx: usize) -> usize {
        let port = &self.ctx.ports[idx];
        let nb_rx = port.rxq.rx_max(&mut self.batch, self.ctx.config.burst_size);
        if nb_rx == 0 {
            self.stats.idle_polls += 1;
            return 0;
        }
        self.stats.rx_packets += nb_rx as u64;

        let port_id = port.port_id();
        let dispatch = &self.ctx.dispatch;
        let mut freed = 0u64;
        self.batch.retain(|mbuf| match dispatch.dispatch(port_id, mbuf) {
            Verdict::Forward => true,
            Verdict::Free => {
                freed += 1;
                false
            }
        });
        self.stats.dispatch_freed += freed;

        let mut nb_tx = port.txq.tx(&mut self.batch);
        let mut retries = 0;
        while !self.batch.is_empty() && retries < self.ctx.config.tx_retries {
            nb_tx += port.txq.tx(&mut self.batch);
            retries += 1;
        }
        self.stats.tx_packets += nb_tx as u64;

        if !self.batch.is_empty() {
            self.stats.tx_dropped += self.batch.len() as u64;
            // Unsent mbufs go back to their pool.
            self.batch.clear();
        }
        nb_rx
    }

    /// Free anything still held and move to `Stopped`.
    ///
    /// Also stops a worker that was still `Running`, as when its owner gives
    /// up on it without setting the token.
    pub fn finish(&mut self) -> WorkerStats {
        if self.state == WorkerState::Stopped {
            return self.stats;
        }
        self.state = WorkerState::Draining;
        if !self.batch.is_empty() {
            debug!(lcore = self.ctx.lcore_id, n = self.batch.len(), "Freeing held mbufs");
            self.batch.clear();
        }
        self.state = WorkerState::Stopped;
        info!(
            lcore = self.ctx.lcore_id,
            rx = self.stats.rx_packets,
            tx = self.stats.tx_packets,
            tx_dropped = self.stats.tx_dropped,
            "Worker loop stopped"
        );
        self.stats
    }
}
