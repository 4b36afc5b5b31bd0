//! Test harness
//!
//! Provides reusable pieces for dataplane tests:
//! - `PmdTestContext` - RAII struct holding EAL, mempool and EthDev
//! - `create_test_context()` - one `net_ring0` vdev behind a single-lcore EAL
//! - `Peer` - drives a port's wire from a separate thread
//!
//! DPDK cannot bring the EAL back after `rte_eal_cleanup`, so a context can
//! be created once per test process.
//!
//! For whole-application tests, prefer `PmdApp` from `pmd-net-util`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use pmd_net::api::Errno;
use pmd_net::api::rte::eal::Eal;
use pmd_net::api::rte::eth::EthDev;
use pmd_net::api::rte::pktmbuf::MemPool;

use crate::eth_dev_config::EthDevConfig;
use crate::util::test_eal;
use crate::wire::Wire;

/// Test context holding all resources needed for a test.
///
/// Resources are dropped in reverse order: EthDev -> MemPool -> EAL.
pub struct PmdTestContext {
    /// The EAL instance (must be dropped last)
    _eal: Eal,
    mempool: MemPool,
    eth_dev: EthDev,
}

impl PmdTestContext {
    /// Create a context from pre-initialized components.
    pub fn from_parts(eal: Eal, mempool: MemPool, eth_dev: EthDev) -> Self {
        Self {
            _eal: eal,
            mempool,
            eth_dev,
        }
    }

    pub fn eth_dev(&self) -> &EthDev {
        &self.eth_dev
    }

    pub fn mempool(&self) -> &MemPool {
        &self.mempool
    }
}

impl Drop for PmdTestContext {
    fn drop(&mut self) {
        if let Err(e) = self.eth_dev.stop() {
            eprintln!("Warning: Failed to stop eth device: {:?}", e);
        }
        if let Err(e) = self.eth_dev.close() {
            eprintln!("Warning: Failed to close eth device: {:?}", e);
        }
    }
}

/// Create a test context with one `net_ring0` port on lcore 0.
///
/// The vdev is created by the EAL with no rings of its own to hand out, so
/// every queue loops its TX back into its RX.
///
/// # Example
/// ```no_run
/// use pmd_net_test::pmd_test::create_test_context;
///
/// let ctx = create_test_context().expect("Failed to create test context");
/// assert!(ctx.eth_dev().is_started());
/// ```
pub fn create_test_context() -> Result<PmdTestContext, Errno> {
    let eal = test_eal("0").vdev("net_ring0").init()?;

    let (mempool, eth_dev) = EthDevConfig::new().mempool_name("test_mempool").build()?;
    Ok(PmdTestContext::from_parts(eal, mempool, eth_dev))
}

/// The far end of a port's cable, run on its own thread.
///
/// Injects `count` frames and collects everything the port transmits until
/// stopped. Collected frames are passed to `on_frame`.
pub struct Peer {
    stop: Arc<AtomicBool>,
    sent: Arc<AtomicU64>,
    received: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl Peer {
    pub fn spawn<F>(wire: Wire, frames: Vec<Vec<u8>>, mut on_frame: F) -> Self
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let sent = Arc::new(AtomicU64::new(0));
        let received = Arc::new(AtomicU64::new(0));
        let handle = {
            let stop = stop.clone();
            let sent = sent.clone();
            let received = received.clone();
            std::thread::Builder::new()
                .name(format!("peer-{}", wire.port_id()))
                .spawn(move || {
                    let mut pending = frames.into_iter().peekable();
                    while !stop.load(Ordering::Acquire) {
                        // Back off while the port is congested.
                        while let Some(frame) = pending.peek() {
                            if !wire.inject(frame) {
                                break;
                            }
                            pending.next();
                            sent.fetch_add(1, Ordering::Relaxed);
                        }
                        for frame in wire.collect() {
                            on_frame(&frame);
                            received.fetch_add(1, Ordering::Relaxed);
                        }
                        std::thread::yield_now();
                    }
                    tracing::debug!(
                        port_id = wire.port_id(),
                        sent = sent.load(Ordering::Relaxed),
                        received = received.load(Ordering::Relaxed),
                        "Peer stopped"
                    );
                })
                .expect("failed to spawn peer thread")
        };
        Self {
            stop,
            sent,
            received,
            handle: Some(handle),
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Stop the peer thread and wait for it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
