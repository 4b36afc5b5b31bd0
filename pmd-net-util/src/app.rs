//! PmdApp builder and runner.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use pmd_net::api::rte::eal::Eal;
use pmd_net::api::rte::eth::{
    ETHER_OVERHEAD, EthConf, EthDev, EthDevBuilder, LinkStatus, PortId, RxQueueConf, TxQueueConf,
    format_mac_addr,
};
use pmd_net::api::rte::lcore::Lcore;
use pmd_net::api::rte::pktmbuf::{MBUF_DEFAULT_DATAROOM, MBUF_HEADROOM, MemPool, MemPoolConfig};
use pmd_net::api::rte::queue::MAX_BURST_SIZE;
use pmd_net::api::{Errno, Result as ApiResult};
use pmd_net::dataplane::{
    BURST_SIZE, Egress, PacketDispatch, PortQueues, PortStatsReport, ShutdownController,
    StopToken, Worker, WorkerConfig, WorkerContext, WorkerStats, read_counters,
};
use tracing::{debug, info, warn};

use crate::error::Error;

/// Default MTU
const DEFAULT_MTU: u32 = 1500;

/// Mbufs reserved per port when the pool is sized.
const DEFAULT_MBUFS_PER_PORT: u32 = 8191;

/// Per-lcore mempool cache size
const DEFAULT_CACHE_SIZE: u32 = 250;

const DEFAULT_RX_DESC: u16 = 1024;
const DEFAULT_TX_DESC: u16 = 1024;

/// Bursts per port a pool must hold beyond a full RX ring: one being
/// forwarded and one waiting in the driver.
const POOL_BURSTS_PER_PORT: u32 = 2;

/// Suffix for pool names, unique within the process.
static NEXT_POOL: AtomicU32 = AtomicU32::new(0);

/// Builder for configuring and running a poll-mode application.
///
/// Every port gets one RX and one TX queue polled by exactly one worker
/// lcore; ports are dealt to the worker lcores round robin. Extra TX queues
/// can be requested for [`Egress`] handles.
///
/// # Example
///
/// ```no_run
/// use pmd_net::api::rte::eal::Eal;
/// use pmd_net::dataplane::PipelineHandoff;
/// use pmd_net_util::PmdApp;
///
/// let _eal = Eal::init(["app", "-l", "0-1", "--no-huge", "--vdev=net_ring0"]).unwrap();
///
/// PmdApp::new()
///     .mbufs_per_port(4096)
///     .burst_size(16)
///     .run(|_ports| PipelineHandoff::new(|port_id: u16, packet: &[u8]| {
///         println!("port {port_id}: {} bytes", packet.len());
///     }))
///     .unwrap();
/// ```
pub struct PmdApp {
    ports: Option<Vec<PortId>>,
    mbufs_per_port: u32,
    cache_size: u32,
    rx_desc: u16,
    tx_desc: u16,
    burst_size: usize,
    mtu: u32,
    link_speed: u32,
    loopback: bool,
    promiscuous: bool,
    tx_retries: u32,
    egress_queues: u16,
    handle_signals: bool,
    stats_on_signal: bool,
    stop: StopToken,
}

impl Default for PmdApp {
    fn default() -> Self {
        Self::new()
    }
}

impl PmdApp {
    /// Create a new PmdApp builder.
    pub fn new() -> Self {
        Self {
            ports: None,
            mbufs_per_port: DEFAULT_MBUFS_PER_PORT,
            cache_size: DEFAULT_CACHE_SIZE,
            rx_desc: DEFAULT_RX_DESC,
            tx_desc: DEFAULT_TX_DESC,
            burst_size: BURST_SIZE,
            mtu: DEFAULT_MTU,
            link_speed: 0,
            loopback: false,
            promiscuous: true,
            tx_retries: 0,
            egress_queues: 0,
            handle_signals: true,
            stats_on_signal: false,
            stop: StopToken::new(),
        }
    }

    /// Only run these ports (default: every available port).
    pub fn ports(mut self, ports: impl IntoIterator<Item = PortId>) -> Self {
        self.ports = Some(ports.into_iter().collect());
        self
    }

    /// Set mbufs per port (default: 8191).
    pub fn mbufs_per_port(mut self, count: u32) -> Self {
        self.mbufs_per_port = count;
        self
    }

    /// Set the per-lcore pool cache size (default: 250).
    pub fn cache_size(mut self, size: u32) -> Self {
        self.cache_size = size;
        self
    }

    /// Set RX/TX descriptors (default: 1024).
    pub fn descriptors(mut self, rx: u16, tx: u16) -> Self {
        self.rx_desc = rx;
        self.tx_desc = tx;
        self
    }

    /// Set the RX burst size (default: 32).
    pub fn burst_size(mut self, n: usize) -> Self {
        self.burst_size = n;
        self
    }

    /// Set the MTU (default: 1500). The pool's data room grows to fit it.
    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    /// Request a link speed in Mbps (default: driver default).
    pub fn link_speed(mut self, mbps: u32) -> Self {
        self.link_speed = mbps;
        self
    }

    /// Enable device loopback: TX feeds straight back into RX.
    pub fn loopback(mut self, enable: bool) -> Self {
        self.loopback = enable;
        self
    }

    /// Enable promiscuous mode (default: true).
    pub fn promiscuous(mut self, enable: bool) -> Self {
        self.promiscuous = enable;
        self
    }

    /// Immediate TX retries before unsent mbufs are freed (default: 0).
    pub fn tx_retries(mut self, n: u32) -> Self {
        self.tx_retries = n;
        self
    }

    /// Extra TX queues per port, claimable through [`ReadyPorts::egress`].
    pub fn egress_queues(mut self, n: u16) -> Self {
        self.egress_queues = n;
        self
    }

    /// Install the SIGINT/SIGTERM handler (default: true).
    ///
    /// A process can only install it once; disable it when the run is stopped
    /// through [`stop_token`](Self::stop_token) instead.
    pub fn handle_signals(mut self, enable: bool) -> Self {
        self.handle_signals = enable;
        self
    }

    /// Print per-port counters from the signal handler (default: false).
    pub fn stats_on_signal(mut self, enable: bool) -> Self {
        self.stats_on_signal = enable;
        self
    }

    /// Use an externally owned stop token.
    pub fn stop_token(mut self, stop: StopToken) -> Self {
        self.stop = stop;
        self
    }

    /// Run the application.
    ///
    /// Blocks until the stop token is set and every worker has drained.
    ///
    /// # Arguments
    ///
    /// * `make_dispatch` - Builds the packet dispatch once all ports are up.
    ///   It receives the [`ReadyPorts`] so a pipeline can claim its egress
    ///   queues.
    ///
    /// # Errors
    ///
    /// The first fatal error of the bootstrap sequence; see [`Error`].
    pub fn run<D, F>(self, make_dispatch: F) -> Result<RunReport, Error>
    where
        D: PacketDispatch + 'static,
        F: FnOnce(&ReadyPorts) -> D,
    {
        if !Eal::is_initialized() {
            return Err(Error::Eal(Errno::ENODEV));
        }
        let port_ids = match &self.ports {
            Some(ids) => ids.clone(),
            None => (0..EthDev::count_avail()).collect(),
        };
        if port_ids.is_empty() {
            return Err(Error::NoPorts);
        }
        info!(nb_ports = port_ids.len(), "PmdApp starting");

        let mempool = self.create_pool(port_ids.len()).map_err(Error::Pool)?;

        let mut devs = Vec::with_capacity(port_ids.len());
        for &port_id in &port_ids {
            match self.init_port(port_id, &mempool) {
                Ok(dev) => devs.push(dev),
                Err(e) => {
                    stop_ports(&devs);
                    return Err(Error::port(port_id)(e));
                }
            }
        }

        let workers = self.run_ports(&devs, &mempool, make_dispatch);
        stop_ports(&devs);
        let workers = workers?;

        let ports: Vec<PortStatsReport> = devs.iter().map(read_counters).collect();
        for p in &ports {
            info!(port_id = p.port_id, rx = p.rx, tx = p.tx, dropped = p.dropped, "Port stats");
        }
        info!(
            in_use = mempool.in_use_count(),
            alloc_failures = mempool.alloc_failures(),
            "PmdApp shutdown complete"
        );
        Ok(RunReport { workers, ports })
    }

    /// Everything between port bring-up and port stop.
    fn run_ports<D, F>(
        &self,
        devs: &[EthDev],
        mempool: &MemPool,
        make_dispatch: F,
    ) -> Result<Vec<(u32, WorkerStats)>, Error>
    where
        D: PacketDispatch + 'static,
        F: FnOnce(&ReadyPorts) -> D,
    {
        report_links(devs)?;

        let ready = ReadyPorts {
            devs: devs.to_vec(),
            mempool: mempool.clone(),
            egress_queues: self.egress_queues,
        };
        let dispatch = Arc::new(make_dispatch(&ready));

        if self.handle_signals {
            ShutdownController::new(self.stop.clone(), devs.to_vec())
                .print_stats_on_signal(self.stats_on_signal)
                .install()?;
        }

        self.run_workers(devs, dispatch)
    }

    /// Size the shared pool for `nb_ports` ports.
    ///
    /// `EINVAL` if `mbufs_per_port` cannot cover a full RX ring plus
    /// [`POOL_BURSTS_PER_PORT`] bursts on every port, or if the MTU does not
    /// fit an mbuf.
    fn pool_config(&self, nb_ports: usize) -> ApiResult<MemPoolConfig> {
        let nb_ports = u32::try_from(nb_ports).map_err(|_| Errno::EINVAL)?;
        let num_mbufs = nb_ports
            .checked_mul(self.mbufs_per_port)
            .ok_or(Errno::EINVAL)?;
        let burst = self.burst_size.clamp(1, MAX_BURST_SIZE) as u32;
        let needed = nb_ports
            .checked_mul(u32::from(self.rx_desc) + burst * POOL_BURSTS_PER_PORT)
            .ok_or(Errno::EINVAL)?;
        if num_mbufs < needed {
            warn!(num_mbufs, needed, "Pool too small for the RX rings");
            return Err(Errno::EINVAL);
        }

        let data_room = (self.mtu + ETHER_OVERHEAD + u32::from(MBUF_HEADROOM))
            .max(u32::from(MBUF_DEFAULT_DATAROOM) + u32::from(MBUF_HEADROOM));
        let data_room = u16::try_from(data_room).map_err(|_| Errno::EINVAL)?;

        let config = MemPoolConfig::new()
            .num_mbufs(num_mbufs)
            .cache_size(self.cache_size)
            .data_room_size(data_room);
        config.validate()?;
        Ok(config)
    }

    fn create_pool(&self, nb_ports: usize) -> ApiResult<MemPool> {
        let config = self
            .pool_config(nb_ports)?
            .socket_id(Lcore::main().socket_id() as i32);
        let name = format!("pmd_pool_{}", NEXT_POOL.fetch_add(1, Ordering::Relaxed));
        MemPool::create(name, &config)
    }

    fn init_port(&self, port_id: PortId, mempool: &MemPool) -> ApiResult<EthDev> {
        let mut eth_conf = EthConf::new().mtu(self.mtu).link_speed(self.link_speed);
        if self.loopback {
            eth_conf = eth_conf.loopback();
        }
        let mut builder = EthDevBuilder::new(port_id)
            .eth_conf(eth_conf)
            .nb_rx_queues(1)
            .nb_tx_queues(1 + self.egress_queues)
            .rx_queue_conf(RxQueueConf::new().nb_desc(self.rx_desc))
            .tx_queue_conf(TxQueueConf::new().nb_desc(self.tx_desc));
        if self.promiscuous {
            builder = builder.promiscuous();
        }
        let dev = builder.build(mempool)?;
        // Counters describe this run only.
        dev.stats_reset()?;
        Ok(dev)
    }

    /// Deal the ports to the worker lcores and block until every worker returns.
    fn run_workers<D>(
        &self,
        devs: &[EthDev],
        dispatch: Arc<D>,
    ) -> Result<Vec<(u32, WorkerStats)>, Error>
    where
        D: PacketDispatch + 'static,
    {
        let config = WorkerConfig {
            burst_size: self.burst_size,
            tx_retries: self.tx_retries,
        };
        let lcores: Vec<Lcore> = Lcore::workers().collect();

        if lcores.is_empty() {
            // No worker lcores: the main lcore polls everything itself.
            let ports = devs
                .iter()
                .map(|dev| PortQueues::claim(dev, 0).map_err(Error::port(dev.port_id())))
                .collect::<Result<Vec<_>, _>>()?;
            let lcore_id = Lcore::main().id();
            info!(lcore = lcore_id, "No worker lcores, polling on the main lcore");
            let mut worker = Worker::new(WorkerContext {
                lcore_id,
                ports,
                stop: self.stop.clone(),
                dispatch,
                config,
            });
            let stats = worker.run();
            return Ok(vec![(lcore_id, stats)]);
        }

        let mut assigned: Vec<Vec<PortQueues>> = lcores.iter().map(|_| Vec::new()).collect();
        for (i, dev) in devs.iter().enumerate() {
            let queues = PortQueues::claim(dev, 0).map_err(Error::port(dev.port_id()))?;
            assigned[i % lcores.len()].push(queues);
        }

        let results = Arc::new(Mutex::new(Vec::with_capacity(lcores.len())));
        let mut launched = Vec::new();
        let mut failure = None;
        for (lcore, ports) in lcores.into_iter().zip(assigned) {
            if ports.is_empty() {
                debug!(lcore = lcore.id(), "No ports assigned, lcore stays idle");
                continue;
            }
            let ctx = WorkerContext {
                lcore_id: lcore.id(),
                ports,
                stop: self.stop.clone(),
                dispatch: dispatch.clone(),
                config,
            };
            let results = results.clone();
            let launch = lcore.launch(move || {
                let lcore_id = ctx.lcore_id;
                let mut worker = Worker::new(ctx);
                let stats = worker.run();
                results
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push((lcore_id, stats));
                0
            });
            match launch {
                Ok(()) => launched.push(lcore),
                Err(e) => {
                    // Bring down the workers already running before reporting.
                    self.stop.stop();
                    failure = Some(Error::Launch(e));
                    break;
                }
            }
        }

        info!(workers = launched.len(), "Workers launched");
        for lcore in &launched {
            let ret = lcore.wait();
            if ret != 0 {
                warn!(lcore = lcore.id(), ret, "Worker returned an error");
            }
        }
        info!("All workers finished");

        if let Some(e) = failure {
            return Err(e);
        }
        let mut results = std::mem::take(&mut *results.lock().unwrap_or_else(|e| e.into_inner()));
        results.sort_by_key(|(lcore_id, _)| *lcore_id);
        Ok(results)
    }
}

/// The ports of a run, configured and started, before any worker launches.
pub struct ReadyPorts {
    devs: Vec<EthDev>,
    mempool: MemPool,
    egress_queues: u16,
}

impl ReadyPorts {
    pub fn ports(&self) -> &[EthDev] {
        &self.devs
    }

    pub fn mempool(&self) -> &MemPool {
        &self.mempool
    }

    /// Claim egress queue `index` (`0..egress_queues`) of `port_id`.
    pub fn egress(&self, port_id: PortId, index: u16) -> Result<Egress, Error> {
        let dev = self
            .devs
            .iter()
            .find(|d| d.port_id() == port_id)
            .ok_or(Error::Port {
                port_id,
                source: Errno::ENODEV,
            })?;
        if index >= self.egress_queues {
            return Err(Error::Port {
                port_id,
                source: Errno::EINVAL,
            });
        }
        Egress::claim(dev, 1 + index, &self.mempool).map_err(Error::port(port_id))
    }
}

/// What a finished run leaves behind.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Per worker lcore, sorted by lcore id
    pub workers: Vec<(u32, WorkerStats)>,
    /// Final per-port counters
    pub ports: Vec<PortStatsReport>,
}

impl RunReport {
    /// Worker counters summed over every lcore.
    pub fn total(&self) -> WorkerStats {
        let mut total = WorkerStats::default();
        for (_, stats) in &self.workers {
            total += *stats;
        }
        total
    }
}

/// Log the MAC and link state of every port.
///
/// A port that is down is only a warning; the run goes ahead and the port
/// simply stays quiet. Returns how many ports are down.
pub fn report_links(devs: &[EthDev]) -> Result<usize, Error> {
    let mut down = 0;
    for dev in devs {
        let port_id = dev.port_id();
        let mac = dev.mac_addr().map_err(Error::port(port_id))?;
        match dev.link_status() {
            LinkStatus::Up(speed) => {
                info!(port_id, mac = %format_mac_addr(&mac), speed, "Link up")
            }
            LinkStatus::Down => {
                warn!(port_id, mac = %format_mac_addr(&mac), "Link down");
                down += 1;
            }
        }
    }
    if down > 0 {
        warn!(down, "Some ports are down");
    }
    Ok(down)
}

fn stop_ports(devs: &[EthDev]) {
    for dev in devs {
        if let Err(e) = dev.stop() {
            warn!(port_id = dev.port_id(), error = %e, "Failed to stop port");
        }
    }
}
