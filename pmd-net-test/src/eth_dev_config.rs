//! Shared Ethernet device configuration for tests.
//!
//! `EthDevConfig` bundles what a test needs to bring up a port: the mbuf pool
//! and the device configuration. Ports can be `--vdev` devices attached by the
//! EAL (`build`) or ring-backed ports created at runtime together with their
//! [`Wire`] (`build_wire`), so a test can feed and drain them.

use pmd_net::api::Errno;
use pmd_net::api::rte::eth::{EthConf, EthDev, EthDevBuilder, RxQueueConf, TxQueueConf};
use pmd_net::api::rte::pktmbuf::{MBUF_DEFAULT_DATAROOM, MBUF_HEADROOM, MemPool, MemPoolConfig};
use pmd_net::dataplane::PortQueues;

use crate::wire::Wire;

/// Default MTU for devices
pub const DEFAULT_MTU: u32 = 1500;

/// Default number of mbufs in the pool
pub const DEFAULT_NUM_MBUFS: u32 = 8191;

/// Default number of descriptors per queue, and ring slots of a wire
pub const DEFAULT_NB_DESC: u16 = 1024;

/// Default mbuf data room: 2048 bytes of data behind the headroom
pub const DEFAULT_MBUF_DATA_ROOM_SIZE: u16 = MBUF_DEFAULT_DATAROOM + MBUF_HEADROOM;

/// Configuration for creating test pools and ethernet devices.
///
/// # Example
/// ```no_run
/// use pmd_net_test::eth_dev_config::EthDevConfig;
///
/// let (mempool, eth_dev, wire) = EthDevConfig::new()
///     .mempool_name("my_pool")
///     .num_mbufs(4096)
///     .build_wire()
///     .expect("Failed to build");
/// assert!(wire.inject(&[0u8; 64]));
/// ```
#[derive(Clone)]
pub struct EthDevConfig {
    pub(crate) mempool_name: String,
    pub(crate) num_mbufs: u32,
    pub(crate) cache_size: u32,
    pub(crate) data_room_size: u16,
    pub(crate) nb_rx_queues: u16,
    pub(crate) nb_tx_queues: u16,
    pub(crate) rx_desc: u16,
    pub(crate) tx_desc: u16,
    pub(crate) mtu: u32,
    pub(crate) port_id: u16,
    pub(crate) eth_conf: Option<EthConf>,
    pub(crate) promiscuous: bool,
    pub(crate) looped: bool,
}

impl Default for EthDevConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EthDevConfig {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Self {
            mempool_name: "test_mempool".to_string(),
            num_mbufs: DEFAULT_NUM_MBUFS,
            cache_size: 0,
            data_room_size: DEFAULT_MBUF_DATA_ROOM_SIZE,
            nb_rx_queues: 1,
            nb_tx_queues: 1,
            rx_desc: DEFAULT_NB_DESC,
            tx_desc: DEFAULT_NB_DESC,
            mtu: DEFAULT_MTU,
            port_id: 0,
            eth_conf: None,
            promiscuous: true,
            looped: false,
        }
    }

    pub fn mempool_name(mut self, name: impl Into<String>) -> Self {
        self.mempool_name = name.into();
        self
    }

    pub fn num_mbufs(mut self, n: u32) -> Self {
        self.num_mbufs = n;
        self
    }

    /// Per-lcore cache size (default 0, so pool counts are exact in tests).
    pub fn cache_size(mut self, n: u32) -> Self {
        self.cache_size = n;
        self
    }

    pub fn data_room_size(mut self, size: u16) -> Self {
        self.data_room_size = size;
        self
    }

    /// Set the number of RX and TX queues (symmetric).
    pub fn nb_queues(mut self, n: u16) -> Self {
        self.nb_rx_queues = n;
        self.nb_tx_queues = n;
        self
    }

    pub fn nb_tx_queues(mut self, n: u16) -> Self {
        self.nb_tx_queues = n;
        self
    }

    pub fn rx_desc(mut self, n: u16) -> Self {
        self.rx_desc = n;
        self
    }

    pub fn tx_desc(mut self, n: u16) -> Self {
        self.tx_desc = n;
        self
    }

    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    /// Wire TX queue `i` back into RX queue `i` (`build_wire` only).
    pub fn looped(mut self, enable: bool) -> Self {
        self.looped = enable;
        self
    }

    /// Port to configure with [`build`](Self::build).
    pub fn port_id(mut self, id: u16) -> Self {
        self.port_id = id;
        self
    }

    /// Set custom ethernet configuration. The MTU set here is applied on top.
    pub fn eth_conf(mut self, conf: EthConf) -> Self {
        self.eth_conf = Some(conf);
        self
    }

    pub fn promiscuous(mut self, enable: bool) -> Self {
        self.promiscuous = enable;
        self
    }

    /// Usable bytes per mbuf.
    pub fn mbuf_capacity(&self) -> usize {
        usize::from(self.data_room_size - MBUF_HEADROOM)
    }

    pub fn create_mempool(&self) -> Result<MemPool, Errno> {
        let config = MemPoolConfig::new()
            .num_mbufs(self.num_mbufs)
            .cache_size(self.cache_size)
            .data_room_size(self.data_room_size);
        MemPool::create(self.mempool_name.clone(), &config)
    }

    /// Build the pool and configure the EAL port `port_id`.
    pub fn build(self) -> Result<(MemPool, EthDev), Errno> {
        let mempool = self.create_mempool()?;
        let eth_dev = self.configure(EthDevBuilder::new(self.port_id), &mempool)?;
        Ok((mempool, eth_dev))
    }

    /// Build the pool and a ring-backed port, returning the port's wire.
    ///
    /// The wire has `rx_desc` slots per RX ring and `tx_desc` per TX ring.
    pub fn build_wire(self) -> Result<(MemPool, EthDev, Wire), Errno> {
        let mempool = self.create_mempool()?;
        let (eth_dev, wire) = self.build_wire_on(&mempool)?;
        Ok((mempool, eth_dev, wire))
    }

    /// Configure and start another ring-backed port on an existing pool.
    pub fn build_wire_on(&self, mempool: &MemPool) -> Result<(EthDev, Wire), Errno> {
        let wire = if self.looped {
            Wire::looped(self.nb_rx_queues, u32::from(self.rx_desc), mempool)?
        } else {
            Wire::create(
                self.nb_rx_queues,
                self.nb_tx_queues,
                u32::from(self.rx_desc),
                u32::from(self.tx_desc),
                mempool,
            )?
        };
        let eth_dev = self.configure(EthDevBuilder::new(wire.port_id()), mempool)?;
        Ok((eth_dev, wire))
    }

    fn configure(&self, builder: EthDevBuilder, mempool: &MemPool) -> Result<EthDev, Errno> {
        let eth_conf = self.eth_conf.clone().unwrap_or_default().mtu(self.mtu);
        let mut builder = builder
            .eth_conf(eth_conf)
            .nb_rx_queues(self.nb_rx_queues)
            .nb_tx_queues(self.nb_tx_queues)
            .rx_queue_conf(RxQueueConf::new().nb_desc(self.rx_desc))
            .tx_queue_conf(TxQueueConf::new().nb_desc(self.tx_desc));
        if self.promiscuous {
            builder = builder.promiscuous();
        }
        builder.build(mempool)
    }

    /// Claim the RX/TX queue pair `queue_id` for a worker.
    pub fn create_queues(eth_dev: &EthDev, queue_id: u16) -> Result<PortQueues, Errno> {
        PortQueues::claim(eth_dev, queue_id)
    }
}
