// Ethernet Device API
// See: rte_ethdev.h
//
// The control-plane calls follow the ethdev lifecycle: configure, queue
// setup, start, then optional promiscuous mode. Data-plane access goes
// through the move-only queue handles in `queue`, which are claimed here.

use std::ffi::{CStr, c_char};
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, Ordering};

use pmd_net_sys::ffi;
use smoltcp::wire::EthernetAddress;

use super::pktmbuf::{MBUF_HEADROOM, MemPool, SOCKET_ID_ANY};
use super::queue::{RxQueue, TxQueue};
use crate::api::{Errno, Result, check_success};

/// Ethernet device port ID
pub type PortId = u16;

/// Queue ID for RX/TX queues
pub type QueueId = u16;

/// Ethernet header plus CRC, added to the MTU to get the largest frame.
pub const ETHER_OVERHEAD: u32 = 18;

/// RTE_MAX_ETHPORTS of the default build config.
pub const MAX_PORTS: usize = 32;

/// Queues per direction that can be claimed on one port.
pub const MAX_QUEUES: u16 = 64;

const ETH_NAME_MAX_LEN: usize = 64;
const ETH_LINK_SPEED_FIXED: u32 = 1;
const ETH_LINK_FULL_DUPLEX: i32 = 1;

/// Bookkeeping DPDK does not expose: whether the port runs, its configured
/// queue counts and which queues have an owner.
struct PortState {
    started: AtomicBool,
    nb_rx_queues: AtomicU16,
    nb_tx_queues: AtomicU16,
    max_rx_pktlen: AtomicU32,
    rx_claims: AtomicU64,
    tx_claims: AtomicU64,
}

impl PortState {
    const fn new() -> Self {
        PortState {
            started: AtomicBool::new(false),
            nb_rx_queues: AtomicU16::new(0),
            nb_tx_queues: AtomicU16::new(0),
            max_rx_pktlen: AtomicU32::new(0),
            rx_claims: AtomicU64::new(0),
            tx_claims: AtomicU64::new(0),
        }
    }

    fn claimed(&self) -> bool {
        self.rx_claims.load(Ordering::Acquire) != 0 || self.tx_claims.load(Ordering::Acquire) != 0
    }
}

static PORTS: [PortState; MAX_PORTS] = [const { PortState::new() }; MAX_PORTS];

#[inline]
fn state(port_id: PortId) -> &'static PortState {
    // EthDev::new only hands out ids below MAX_PORTS.
    &PORTS[usize::from(port_id) % MAX_PORTS]
}

#[inline]
pub(crate) fn is_started(port_id: PortId) -> bool {
    state(port_id).started.load(Ordering::Acquire)
}

pub(crate) fn claim_rx(port_id: PortId, queue_id: QueueId) -> Result<()> {
    let st = state(port_id);
    claim(&st.rx_claims, queue_id, st.nb_rx_queues.load(Ordering::Acquire))
}

pub(crate) fn claim_tx(port_id: PortId, queue_id: QueueId) -> Result<()> {
    let st = state(port_id);
    claim(&st.tx_claims, queue_id, st.nb_tx_queues.load(Ordering::Acquire))
}

pub(crate) fn release_rx(port_id: PortId, queue_id: QueueId) {
    state(port_id)
        .rx_claims
        .fetch_and(!(1u64 << queue_id), Ordering::AcqRel);
}

pub(crate) fn release_tx(port_id: PortId, queue_id: QueueId) {
    state(port_id)
        .tx_claims
        .fetch_and(!(1u64 << queue_id), Ordering::AcqRel);
}

fn claim(claims: &AtomicU64, queue_id: QueueId, nb_queues: u16) -> Result<()> {
    if queue_id >= nb_queues {
        return Err(Errno::EINVAL);
    }
    let bit = 1u64 << queue_id;
    if claims.fetch_or(bit, Ordering::AcqRel) & bit != 0 {
        return Err(Errno::EBUSY);
    }
    Ok(())
}

/// RX mode configuration
#[derive(Debug, Clone)]
pub struct RxMode {
    /// Maximum Transfer Unit
    pub mtu: u32,
}

impl Default for RxMode {
    fn default() -> Self {
        Self { mtu: 1500 }
    }
}

/// Ethernet device configuration
#[derive(Debug, Clone, Default)]
pub struct EthConf {
    /// Fixed link speed in Mbps (0 for autoneg)
    pub link_speeds: u32,
    /// RX mode configuration
    pub rx_mode: RxMode,
    /// Loopback mode (0 = disabled)
    pub loopback_mode: u32,
}

impl EthConf {
    /// Create a simple configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set MTU
    pub fn mtu(mut self, mtu: u32) -> Self {
        self.rx_mode.mtu = mtu;
        self
    }

    /// Force the link speed (Mbps)
    pub fn link_speed(mut self, mbps: u32) -> Self {
        self.link_speeds = mbps;
        self
    }

    /// Enable the NIC's loopback mode (`lpbk_mode`). Drivers without one
    /// ignore it; `net_ring` ports loop back by construction.
    pub fn loopback(mut self) -> Self {
        self.loopback_mode = 1;
        self
    }

    /// Largest frame accepted on receive.
    pub fn max_rx_pktlen(&self) -> u32 {
        self.rx_mode.mtu + ETHER_OVERHEAD
    }

    /// Convert to raw rte_eth_conf
    fn to_raw(&self) -> ffi::rte_eth_conf {
        let mut conf: ffi::rte_eth_conf = unsafe { std::mem::zeroed() };
        if self.link_speeds != 0 {
            conf.link_speeds = ETH_LINK_SPEED_FIXED
                | unsafe { ffi::rte_eth_speed_bitflag(self.link_speeds, ETH_LINK_FULL_DUPLEX) };
        }
        conf.rxmode.mtu = self.rx_mode.mtu;
        conf.lpbk_mode = self.loopback_mode;
        conf
    }
}

/// RX queue configuration
#[derive(Debug, Clone)]
pub struct RxQueueConf {
    /// Number of descriptors
    pub nb_desc: u16,
    /// NUMA socket ID (-1 for the port's socket)
    pub socket_id: i32,
}

impl Default for RxQueueConf {
    fn default() -> Self {
        Self {
            nb_desc: 1024,
            socket_id: SOCKET_ID_ANY,
        }
    }
}

impl RxQueueConf {
    /// Create a new RxQueueConf with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of descriptors for the RX ring.
    pub fn nb_desc(mut self, n: u16) -> Self {
        self.nb_desc = n;
        self
    }

    /// Set the NUMA socket ID.
    pub fn socket_id(mut self, id: i32) -> Self {
        self.socket_id = id;
        self
    }
}

/// TX queue configuration
#[derive(Debug, Clone)]
pub struct TxQueueConf {
    /// Number of descriptors
    pub nb_desc: u16,
    /// NUMA socket ID (-1 for the port's socket)
    pub socket_id: i32,
}

impl Default for TxQueueConf {
    fn default() -> Self {
        Self {
            nb_desc: 1024,
            socket_id: SOCKET_ID_ANY,
        }
    }
}

impl TxQueueConf {
    /// Create a new TxQueueConf with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of descriptors for the TX ring.
    pub fn nb_desc(mut self, n: u16) -> Self {
        self.nb_desc = n;
        self
    }

    /// Set the NUMA socket ID.
    pub fn socket_id(mut self, id: i32) -> Self {
        self.socket_id = id;
        self
    }
}

/// Link state as reported by `link_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Link is up at the given speed in Mbps.
    Up(u32),
    Down,
}

impl LinkStatus {
    pub fn is_up(&self) -> bool {
        matches!(self, LinkStatus::Up(_))
    }
}

/// Snapshot of the port counters.
///
/// The driver fills them while traffic may be flowing, so a snapshot is
/// only eventually consistent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EthStats {
    /// Packets handed to the application by RX bursts
    pub ipackets: u64,
    /// Packets accepted by TX bursts
    pub opackets: u64,
    pub ibytes: u64,
    pub obytes: u64,
    /// Frames the NIC dropped because the RX ring was full
    pub imissed: u64,
    pub ierrors: u64,
    /// Frames a TX burst failed to hand to the device
    pub oerrors: u64,
    /// RX mbuf allocation failures
    pub rx_nombuf: u64,
}

impl From<&ffi::rte_eth_stats> for EthStats {
    fn from(s: &ffi::rte_eth_stats) -> Self {
        EthStats {
            ipackets: s.ipackets,
            opackets: s.opackets,
            ibytes: s.ibytes,
            obytes: s.obytes,
            imissed: s.imissed,
            ierrors: s.ierrors,
            oerrors: s.oerrors,
            rx_nombuf: s.rx_nombuf,
        }
    }
}

/// Device information.
#[derive(Debug, Clone)]
pub struct DevInfo {
    pub driver_name: String,
    pub max_rx_queues: u16,
    pub max_tx_queues: u16,
    pub min_mtu: u32,
    pub max_mtu: u32,
    pub nb_rx_queues: u16,
    pub nb_tx_queues: u16,
    pub max_rx_pktlen: u32,
}

/// Handle to one ethdev port. Cheap to copy; all state lives in DPDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthDev {
    port_id: PortId,
}

impl EthDev {
    /// Fails with `ENODEV` unless `port_id` names an attached port.
    pub fn new(port_id: PortId) -> Result<Self> {
        if usize::from(port_id) < MAX_PORTS
            && unsafe { ffi::rte_eth_dev_is_valid_port(port_id) } != 0
        {
            Ok(EthDev { port_id })
        } else {
            Err(Errno::ENODEV)
        }
    }

    #[inline]
    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    /// Get the number of available Ethernet devices
    pub fn count_avail() -> u16 {
        unsafe { ffi::rte_eth_dev_count_avail() }
    }

    /// Device name, e.g. `net_ring0` or a PCI address.
    pub fn name(&self) -> Result<String> {
        let mut buf = [0 as c_char; ETH_NAME_MAX_LEN];
        let ret = unsafe { ffi::rte_eth_dev_get_name_by_port(self.port_id, buf.as_mut_ptr()) };
        check_success(ret)?;
        let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
        Ok(name.to_string_lossy().into_owned())
    }

    pub fn info(&self) -> Result<DevInfo> {
        let mut info = MaybeUninit::<ffi::rte_eth_dev_info>::uninit();
        let ret = unsafe { ffi::rte_eth_dev_info_get(self.port_id, info.as_mut_ptr()) };
        check_success(ret)?;
        let info = unsafe { info.assume_init() };
        let driver_name = if info.driver_name.is_null() {
            String::new()
        } else {
            unsafe { CStr::from_ptr(info.driver_name) }
                .to_string_lossy()
                .into_owned()
        };
        Ok(DevInfo {
            driver_name,
            max_rx_queues: info.max_rx_queues,
            max_tx_queues: info.max_tx_queues,
            min_mtu: u32::from(info.min_mtu),
            max_mtu: u32::from(info.max_mtu),
            nb_rx_queues: info.nb_rx_queues,
            nb_tx_queues: info.nb_tx_queues,
            max_rx_pktlen: info.max_rx_pktlen,
        })
    }

    /// Get the NUMA socket ID of the device
    pub fn socket_id(&self) -> i32 {
        unsafe { ffi::rte_eth_dev_socket_id(self.port_id) }
    }

    pub fn mac_addr(&self) -> Result<EthernetAddress> {
        let mut addr = MaybeUninit::<ffi::rte_ether_addr>::uninit();
        let ret = unsafe { ffi::rte_eth_macaddr_get(self.port_id, addr.as_mut_ptr()) };
        check_success(ret)?;
        let addr = unsafe { addr.assume_init() };
        Ok(EthernetAddress(addr.addr_bytes))
    }

    pub fn stats(&self) -> Result<EthStats> {
        let mut stats = MaybeUninit::<ffi::rte_eth_stats>::uninit();
        let ret = unsafe { ffi::rte_eth_stats_get(self.port_id, stats.as_mut_ptr()) };
        check_success(ret)?;
        Ok(EthStats::from(unsafe { &stats.assume_init() }))
    }

    pub fn stats_reset(&self) -> Result<()> {
        check_success(unsafe { ffi::rte_eth_stats_reset(self.port_id) })
    }

    /// Configure the device.
    ///
    /// `EBUSY` while the port runs or one of its queues is claimed.
    pub fn configure(&self, nb_rx_queues: u16, nb_tx_queues: u16, conf: &EthConf) -> Result<()> {
        let st = state(self.port_id);
        if st.started.load(Ordering::Acquire) || st.claimed() {
            return Err(Errno::EBUSY);
        }
        if nb_rx_queues > MAX_QUEUES || nb_tx_queues > MAX_QUEUES {
            return Err(Errno::EINVAL);
        }
        let raw_conf = conf.to_raw();
        let ret = unsafe {
            ffi::rte_eth_dev_configure(self.port_id, nb_rx_queues, nb_tx_queues, &raw_conf)
        };
        check_success(ret)?;
        st.nb_rx_queues.store(nb_rx_queues, Ordering::Release);
        st.nb_tx_queues.store(nb_tx_queues, Ordering::Release);
        st.max_rx_pktlen.store(conf.max_rx_pktlen(), Ordering::Release);
        tracing::debug!(
            port_id = self.port_id,
            nb_rx_queues,
            nb_tx_queues,
            mtu = conf.rx_mode.mtu,
            "Port configured"
        );
        Ok(())
    }

    /// Setup an RX queue.
    ///
    /// `EINVAL` when a full-size frame does not fit the pool's data room.
    pub fn rx_queue_setup(
        &self,
        queue_id: QueueId,
        mempool: &MemPool,
        conf: &RxQueueConf,
    ) -> Result<()> {
        let st = state(self.port_id);
        if conf.nb_desc == 0 {
            return Err(Errno::EINVAL);
        }
        let usable = u32::from(mempool.data_room_size().saturating_sub(MBUF_HEADROOM));
        if st.max_rx_pktlen.load(Ordering::Acquire) > usable {
            return Err(Errno::EINVAL);
        }
        let ret = unsafe {
            ffi::rte_eth_rx_queue_setup(
                self.port_id,
                queue_id,
                conf.nb_desc,
                self.queue_socket(conf.socket_id),
                std::ptr::null(),
                mempool.as_ptr(),
            )
        };
        check_success(ret)
    }

    /// Setup a TX queue
    pub fn tx_queue_setup(&self, queue_id: QueueId, conf: &TxQueueConf) -> Result<()> {
        if conf.nb_desc == 0 {
            return Err(Errno::EINVAL);
        }
        let ret = unsafe {
            ffi::rte_eth_tx_queue_setup(
                self.port_id,
                queue_id,
                conf.nb_desc,
                self.queue_socket(conf.socket_id),
                std::ptr::null(),
            )
        };
        check_success(ret)
    }

    fn queue_socket(&self, socket_id: i32) -> u32 {
        if socket_id < 0 {
            // SOCKET_ID_ANY passes through as u32::MAX
            self.socket_id() as u32
        } else {
            socket_id as u32
        }
    }

    /// Start the device
    pub fn start(&self) -> Result<()> {
        check_success(unsafe { ffi::rte_eth_dev_start(self.port_id) })?;
        state(self.port_id).started.store(true, Ordering::Release);
        tracing::debug!(port_id = self.port_id, "Port started");
        Ok(())
    }

    /// Stop the device. Bursts on its queues return 0 from here on.
    pub fn stop(&self) -> Result<()> {
        let st = state(self.port_id);
        st.started.store(false, Ordering::Release);
        check_success(unsafe { ffi::rte_eth_dev_stop(self.port_id) })
    }

    /// Close and release the device. `EBUSY` while it runs or a queue is
    /// claimed.
    pub fn close(&self) -> Result<()> {
        let st = state(self.port_id);
        if st.started.load(Ordering::Acquire) || st.claimed() {
            return Err(Errno::EBUSY);
        }
        check_success(unsafe { ffi::rte_eth_dev_close(self.port_id) })?;
        st.nb_rx_queues.store(0, Ordering::Release);
        st.nb_tx_queues.store(0, Ordering::Release);
        st.max_rx_pktlen.store(0, Ordering::Release);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        is_started(self.port_id)
    }

    /// Enable promiscuous mode. A driver without the control accepts every
    /// frame anyway, so `ENOTSUP` is only a warning.
    pub fn promiscuous_enable(&self) -> Result<()> {
        let ret = unsafe { ffi::rte_eth_promiscuous_enable(self.port_id) };
        if ret == -(Errno::ENOTSUP as i32) {
            tracing::warn!(port_id = self.port_id, "Promiscuous mode not supported");
            return Ok(());
        }
        check_success(ret)
    }

    pub fn promiscuous_disable(&self) -> Result<()> {
        check_success(unsafe { ffi::rte_eth_promiscuous_disable(self.port_id) })
    }

    pub fn is_promiscuous(&self) -> bool {
        unsafe { ffi::rte_eth_promiscuous_get(self.port_id) == 1 }
    }

    /// Non-blocking link query. A failed query reads as `Down`.
    pub fn link_status(&self) -> LinkStatus {
        let mut speed = 0u32;
        let mut up = 0i32;
        let ret = unsafe { ffi::rust_eth_link_get_nowait(self.port_id, &mut speed, &mut up) };
        if ret == 0 && up != 0 {
            LinkStatus::Up(speed)
        } else {
            LinkStatus::Down
        }
    }

    pub fn set_link_up(&self) -> Result<()> {
        check_success(unsafe { ffi::rte_eth_dev_set_link_up(self.port_id) })
    }

    pub fn set_link_down(&self) -> Result<()> {
        check_success(unsafe { ffi::rte_eth_dev_set_link_down(self.port_id) })
    }

    /// Claim RX queue `queue_id`. `EINVAL` if it was not configured, `EBUSY`
    /// if another handle owns it.
    pub fn rx_queue(&self, queue_id: QueueId) -> Result<RxQueue> {
        RxQueue::claim(self.port_id, queue_id)
    }

    /// Claim TX queue `queue_id`. `EINVAL` if it was not configured, `EBUSY`
    /// if another handle owns it.
    pub fn tx_queue(&self, queue_id: QueueId) -> Result<TxQueue> {
        TxQueue::claim(self.port_id, queue_id)
    }
}

/// Builder for configuring and starting an Ethernet device
pub struct EthDevBuilder {
    port_id: PortId,
    eth_conf: EthConf,
    nb_rx_queues: u16,
    nb_tx_queues: u16,
    rx_queue_conf: RxQueueConf,
    tx_queue_conf: TxQueueConf,
    promiscuous: bool,
}

impl EthDevBuilder {
    /// Create a new builder for the given port
    pub fn new(port_id: PortId) -> Self {
        Self {
            port_id,
            eth_conf: EthConf::default(),
            nb_rx_queues: 1,
            nb_tx_queues: 1,
            rx_queue_conf: RxQueueConf::default(),
            tx_queue_conf: TxQueueConf::default(),
            promiscuous: false,
        }
    }

    /// Set device configuration
    pub fn eth_conf(mut self, conf: EthConf) -> Self {
        self.eth_conf = conf;
        self
    }

    /// Set number of RX queues
    pub fn nb_rx_queues(mut self, n: u16) -> Self {
        self.nb_rx_queues = n;
        self
    }

    /// Set number of TX queues
    pub fn nb_tx_queues(mut self, n: u16) -> Self {
        self.nb_tx_queues = n;
        self
    }

    /// Set RX queue configuration (applied to all queues)
    pub fn rx_queue_conf(mut self, conf: RxQueueConf) -> Self {
        self.rx_queue_conf = conf;
        self
    }

    /// Set TX queue configuration (applied to all queues)
    pub fn tx_queue_conf(mut self, conf: TxQueueConf) -> Self {
        self.tx_queue_conf = conf;
        self
    }

    /// Enable promiscuous mode
    pub fn promiscuous(mut self) -> Self {
        self.promiscuous = true;
        self
    }

    /// Build and start the device
    ///
    /// This will:
    /// 1. Configure the device
    /// 2. Setup all RX queues
    /// 3. Setup all TX queues
    /// 4. Start the device
    /// 5. Enable promiscuous mode (if set)
    ///
    /// Stops at the first failing step.
    pub fn build(self, mempool: &MemPool) -> Result<EthDev> {
        let dev = EthDev::new(self.port_id)?;

        dev.configure(self.nb_rx_queues, self.nb_tx_queues, &self.eth_conf)?;

        for q in 0..self.nb_rx_queues {
            dev.rx_queue_setup(q, mempool, &self.rx_queue_conf)?;
        }

        for q in 0..self.nb_tx_queues {
            dev.tx_queue_setup(q, &self.tx_queue_conf)?;
        }

        dev.start()?;

        if self.promiscuous {
            dev.promiscuous_enable()?;
        }

        Ok(dev)
    }
}

/// Iterate over attached port IDs
pub fn iter_ports() -> impl Iterator<Item = PortId> {
    (0..MAX_PORTS as PortId).filter(|&id| EthDev::new(id).is_ok())
}

/// Format MAC address as string
pub fn format_mac_addr(addr: &EthernetAddress) -> String {
    let b = addr.as_bytes();
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        b[0], b[1], b[2], b[3], b[4], b[5]
    )
}
