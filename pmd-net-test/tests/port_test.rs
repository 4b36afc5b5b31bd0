//! Port, ring and mbuf tests on EAL-attached vdevs.
//!
//! `net_ring0` is created by the EAL with its own rings, so each of its TX
//! queues loops back into the RX queue of the same index. `net_null0` accepts
//! every transmitted frame and drops it, and its RX hands out fresh 64-byte
//! frames from the queue's pool. Closing a vdev port releases it for
//! the rest of the process, so these tests only ever stop them.
//!
//! Note: EAL is initialized once globally since it can only be initialized once per process.

use std::sync::OnceLock;

use arrayvec::ArrayVec;
use pmd_net::api::Errno;
use pmd_net::api::rte::eal::Eal;
use pmd_net::api::rte::eth::{EthConf, EthDev, EthDevBuilder, LinkStatus, iter_ports};
use pmd_net::api::rte::mbuf::{MBUF_PORT_INVALID, Mbuf};
use pmd_net::api::rte::pktmbuf::MemPool;
use pmd_net::api::rte::queue::MAX_BURST_SIZE;
use pmd_net::api::rte::ring::Ring;
use pmd_net_test::eth_dev_config::{DEFAULT_MBUF_DATA_ROOM_SIZE, EthDevConfig};
use pmd_net_test::util::{init_tracing, test_eal};

static GLOBAL_EAL: OnceLock<Eal> = OnceLock::new();

fn init_eal() -> &'static Eal {
    GLOBAL_EAL.get_or_init(|| {
        init_tracing();
        test_eal("0")
            .vdev("net_ring0")
            .vdev("net_null0")
            .init()
            .expect("Failed to initialize EAL")
    })
}

const RING_PORT: u16 = 0;
const NULL_PORT: u16 = 1;

fn pool(name: &str, n: u32) -> MemPool {
    EthDevConfig::new()
        .mempool_name(name)
        .num_mbufs(n)
        .create_mempool()
        .unwrap()
}

fn filled(pool: &MemPool, byte: u8, len: usize) -> Mbuf {
    let mut m = pool.try_alloc().unwrap();
    assert!(m.copy_from_slice(&vec![byte; len]));
    m
}

#[test]
#[serial_test::serial]
fn test_vdevs_are_attached_in_order() {
    let eal = init_eal();
    assert!(Eal::is_initialized());
    assert!(eal.port_count() >= 2);
    assert_eq!(EthDev::new(RING_PORT).unwrap().name().unwrap(), "net_ring0");
    assert_eq!(EthDev::new(NULL_PORT).unwrap().name().unwrap(), "net_null0");
    assert!(iter_ports().take(2).eq([RING_PORT, NULL_PORT]));
    assert_eq!(EthDev::new(31).unwrap_err(), Errno::ENODEV);
    assert_eq!(EthDev::new(1000).unwrap_err(), Errno::ENODEV);

    let info = EthDev::new(RING_PORT).unwrap().info().unwrap();
    assert_eq!(info.driver_name, "net_ring");
    assert!(info.max_rx_queues >= 1);
}

#[test]
#[serial_test::serial]
fn test_second_init_is_refused() {
    init_eal();
    assert_eq!(test_eal("0").init().unwrap_err(), Errno::EALREADY);
    assert!(Eal::is_initialized());
}

#[test]
#[serial_test::serial]
fn test_ring_vdev_loops_back() {
    init_eal();
    let (pool, dev) = EthDevConfig::new()
        .mempool_name("p_loop")
        .num_mbufs(64)
        .port_id(RING_PORT)
        .build()
        .unwrap();
    assert!(dev.is_started());
    assert!(dev.link_status().is_up());
    dev.stats_reset().unwrap();

    let rxq = dev.rx_queue(0).unwrap();
    let txq = dev.tx_queue(0).unwrap();
    let mut out: ArrayVec<Mbuf, MAX_BURST_SIZE> = (0..5u8).map(|i| filled(&pool, i, 60)).collect();
    assert_eq!(txq.tx(&mut out), 5);
    assert!(out.is_empty());

    let back: ArrayVec<Mbuf, MAX_BURST_SIZE> = rxq.rx_burst();
    assert_eq!(back.len(), 5);
    for (i, m) in back.iter().enumerate() {
        assert_eq!(m.data(), vec![i as u8; 60].as_slice());
    }
    drop(back);
    assert!(pool.is_full());

    let stats = dev.stats().unwrap();
    assert_eq!((stats.ipackets, stats.opackets), (5, 5));
    dev.stats_reset().unwrap();
    assert_eq!(dev.stats().unwrap().ipackets, 0);

    drop((rxq, txq));
    dev.stop().unwrap();
}

#[test]
#[serial_test::serial]
fn test_null_vdev_swallows_tx() {
    init_eal();
    let (pool, dev) = EthDevConfig::new()
        .mempool_name("p_null")
        .num_mbufs(64)
        .port_id(NULL_PORT)
        .build()
        .unwrap();
    let txq = dev.tx_queue(0).unwrap();
    let mut out: ArrayVec<Mbuf, MAX_BURST_SIZE> = (0..8u8).map(|i| filled(&pool, i, 60)).collect();
    assert_eq!(txq.tx(&mut out), 8);
    assert!(pool.is_full());
    assert!(txq.tx_one(filled(&pool, 9, 60)).is_none());

    let rxq = dev.rx_queue(0).unwrap();
    let mut batch: ArrayVec<Mbuf, 8> = ArrayVec::new();
    assert_eq!(rxq.rx(&mut batch), 8);
    assert!(batch.iter().all(|m| m.data_len() == 64));
    assert_eq!(pool.in_use_count(), 8);
    drop(batch);
    assert!(pool.is_full());

    drop((rxq, txq));
    dev.stop().unwrap();
}

#[test]
#[serial_test::serial]
fn test_lifecycle_rules() {
    init_eal();
    let pool = pool("p_life", 64);
    let dev = EthDev::new(RING_PORT).unwrap();
    let conf = EthConf::new();

    dev.configure(1, 2, &conf).unwrap();
    // Queues beyond the configured count cannot be claimed.
    assert_eq!(dev.tx_queue(2).unwrap_err(), Errno::EINVAL);
    dev.rx_queue_setup(0, &pool, &Default::default()).unwrap();
    for q in 0..2 {
        dev.tx_queue_setup(q, &Default::default()).unwrap();
    }
    dev.start().unwrap();
    assert_eq!(dev.configure(1, 1, &conf).unwrap_err(), Errno::EBUSY);
    assert_eq!(dev.close().unwrap_err(), Errno::EBUSY);

    let rxq = dev.rx_queue(0).unwrap();
    assert_eq!(dev.rx_queue(0).unwrap_err(), Errno::EBUSY);

    dev.stop().unwrap();
    assert!(!dev.is_started());
    // A stopped port's queues are silent.
    let mut batch: ArrayVec<Mbuf, 8> = ArrayVec::new();
    assert_eq!(rxq.rx(&mut batch), 0);
    // Still claimed.
    assert_eq!(dev.close().unwrap_err(), Errno::EBUSY);
    assert_eq!(dev.configure(1, 1, &conf).unwrap_err(), Errno::EBUSY);
    drop(rxq);
    dev.configure(1, 1, &conf).unwrap();
}

#[test]
#[serial_test::serial]
fn test_mtu_must_fit_the_data_room() {
    init_eal();
    let pool = pool("p_mtu", 16);
    assert_eq!(pool.data_room_size(), DEFAULT_MBUF_DATA_ROOM_SIZE);

    let err = EthDevBuilder::new(RING_PORT)
        .eth_conf(EthConf::new().mtu(9000))
        .build(&pool)
        .unwrap_err();
    assert_eq!(err, Errno::EINVAL);
    assert!(!EthDev::new(RING_PORT).unwrap().is_started());
}

#[test]
#[serial_test::serial]
fn test_link_control() {
    init_eal();
    let (_pool, dev) = EthDevConfig::new()
        .mempool_name("p_link")
        .num_mbufs(16)
        .port_id(RING_PORT)
        .build()
        .unwrap();
    assert!(matches!(dev.link_status(), LinkStatus::Up(_)));
    dev.set_link_down().unwrap();
    assert_eq!(dev.link_status(), LinkStatus::Down);
    dev.set_link_up().unwrap();
    assert!(dev.link_status().is_up());
    dev.promiscuous_enable().unwrap();
    dev.stop().unwrap();
}

#[test]
#[serial_test::serial]
fn test_ring_holds_its_exact_capacity() {
    init_eal();
    let pool = pool("p_ring", 16);
    let ring = Ring::create("p_ring_r", 3, -1).unwrap();
    assert_eq!(ring.capacity(), 3);
    assert_eq!(ring.free_count(), 3);

    let mut mbufs: Vec<Mbuf> = (0..5u8).map(|i| filled(&pool, i, 10)).collect();
    assert_eq!(ring.enqueue_burst(&mut mbufs), 3);
    assert_eq!(mbufs.len(), 2);
    // The leftovers are the ones that did not fit, in order.
    assert_eq!(mbufs[0].data()[0], 3);
    let refused = ring.enqueue(mbufs.remove(0)).unwrap_err();
    assert_eq!(refused.data()[0], 3);
    drop((refused, mbufs));

    let out = ring.dequeue_burst(2);
    assert_eq!(out.iter().map(|m| m.data()[0]).collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(ring.count(), 1);
    drop(out);
    drop(ring);
    assert!(pool.is_full());

    assert_eq!(Ring::create("p_ring_0", 0, -1).unwrap_err(), Errno::EINVAL);
}

#[test]
#[serial_test::serial]
fn test_mbuf_data_ops() {
    init_eal();
    let pool = pool("p_mbuf", 4);
    let mut m = pool.try_alloc().unwrap();
    assert_eq!(m.data_len(), 0);
    assert_eq!(m.headroom(), 128);
    assert_eq!(m.capacity(), 2048);
    assert_eq!(m.port(), MBUF_PORT_INVALID);

    m.append(4).unwrap().copy_from_slice(&[1, 2, 3, 4]);
    m.prepend(2).unwrap().copy_from_slice(&[9, 9]);
    assert_eq!(m.data(), &[9, 9, 1, 2, 3, 4]);
    assert_eq!(m.headroom(), 126);
    assert!(m.adj(2));
    assert!(m.trim(1));
    assert_eq!(m.data(), &[1, 2, 3]);
    assert_eq!(m.pkt_len(), 3);
    assert!(!m.adj(10));
    assert!(m.append(4096).is_none());

    m.set_port(3);
    assert_eq!(m.port(), 3);
    m.reset();
    assert_eq!(m.data_len(), 0);
    assert_eq!(m.port(), MBUF_PORT_INVALID);

    assert!(m.copy_from_slice(&[7; 100]));
    assert_eq!(m.data(), &[7; 100][..]);
    assert!(!m.copy_from_slice(&[0; 4096]));

    assert_eq!(pool.in_use_count(), 1);
    drop(m);
    assert!(pool.is_full());
}
