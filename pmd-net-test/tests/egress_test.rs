//! Egress and shutdown tests over ring-backed ports.
//!
//! Note: EAL is initialized once globally since it can only be initialized once per process.

use std::sync::OnceLock;

use pmd_net::api::Errno;
use pmd_net::api::rte::eal::Eal;
use pmd_net::dataplane::{Egress, PortStatsReport, ShutdownController, StopToken, read_counters};
use pmd_net_test::eth_dev_config::EthDevConfig;
use pmd_net_test::util::{init_tracing, test_eal};

static GLOBAL_EAL: OnceLock<Eal> = OnceLock::new();

fn init_eal() -> &'static Eal {
    GLOBAL_EAL.get_or_init(|| {
        init_tracing();
        test_eal("0").init().expect("Failed to initialize EAL")
    })
}

fn egress_config(name: &str, num_mbufs: u32, tx_desc: u16) -> EthDevConfig {
    init_eal();
    EthDevConfig::new()
        .mempool_name(name)
        .num_mbufs(num_mbufs)
        .nb_tx_queues(2)
        .tx_desc(tx_desc)
}

#[test]
#[serial_test::serial]
fn test_send_reaches_the_wire() {
    let (pool, dev, wire) = egress_config("e_send", 8, 16).build_wire().unwrap();
    let egress = Egress::claim(&dev, 1, &pool).unwrap();
    assert_eq!((egress.port_id(), egress.queue_id()), (dev.port_id(), 1));

    egress.send(&[0xab; 60]).unwrap();
    assert_eq!(wire.collect(), vec![vec![0xab; 60]]);
    assert!(pool.is_full());
    assert_eq!(dev.stats().unwrap().opackets, 1);
}

#[test]
#[serial_test::serial]
fn test_send_errors() {
    let (pool, dev, wire) = egress_config("e_errors", 4, 2).build_wire().unwrap();
    let egress = Egress::claim(&dev, 1, &pool).unwrap();

    assert_eq!(egress.send(&[0u8; 4096]), Err(Errno::EMSGSIZE));
    egress.send(&[1; 60]).unwrap();
    egress.send(&[2; 60]).unwrap();
    assert_eq!(egress.send(&[3; 60]), Err(Errno::EAGAIN));
    // Refused frames do not leak.
    assert_eq!(pool.in_use_count(), 2);

    let held: Vec<_> = std::iter::from_fn(|| pool.try_alloc()).collect();
    assert_eq!(held.len(), 2);
    assert_eq!(egress.send(&[4; 60]), Err(Errno::ENOBUFS));
    assert_eq!(pool.alloc_failures(), 2);

    drop(held);
    assert_eq!(wire.discard(), 2);
    assert!(pool.is_full());
}

#[test]
#[serial_test::serial]
fn test_queue_is_exclusive() {
    let (pool, dev, _wire) = egress_config("e_claim", 4, 4).build_wire().unwrap();
    let egress = Egress::claim(&dev, 1, &pool).unwrap();
    assert_eq!(Egress::claim(&dev, 1, &pool).unwrap_err(), Errno::EBUSY);
    assert_eq!(Egress::claim(&dev, 2, &pool).unwrap_err(), Errno::EINVAL);
    drop(egress);
    Egress::claim(&dev, 1, &pool).unwrap();
}

#[test]
#[serial_test::serial]
fn test_send_on_stopped_port_is_refused() {
    let (pool, dev, wire) = egress_config("e_stopped", 4, 4).build_wire().unwrap();
    let egress = Egress::claim(&dev, 1, &pool).unwrap();
    dev.stop().unwrap();
    assert_eq!(egress.send(&[5; 60]), Err(Errno::EAGAIN));
    assert_eq!(wire.tx_pending(), 0);
    assert!(pool.is_full());
}

#[test]
#[serial_test::serial]
fn test_on_signal_stops_and_reads_counters() {
    let (_pool, dev, wire) = egress_config("e_signal", 8, 16).build_wire().unwrap();
    assert!(wire.inject(&[0xff; 64]));

    let token = StopToken::new();
    let ctl = ShutdownController::new(token.clone(), vec![dev]);
    assert!(!ctl.stop_token().is_stopped());
    ctl.on_signal();
    assert!(token.is_stopped());
    assert_eq!(
        ctl.report(),
        vec![PortStatsReport {
            port_id: dev.port_id(),
            ..Default::default()
        }]
    );
    // The handler never drains anything.
    assert_eq!(wire.rx_pending(), 1);
}

#[test]
#[serial_test::serial]
fn test_read_counters_after_traffic() {
    let (pool, dev, wire) = egress_config("e_counters", 8, 16).build_wire().unwrap();
    let egress = Egress::claim(&dev, 0, &pool).unwrap();
    egress.send(&[0x11; 60]).unwrap();
    egress.send(&[0x22; 60]).unwrap();
    let report = read_counters(&dev);
    assert_eq!(report.port_id, dev.port_id());
    assert_eq!(report.tx, 2);
    assert_eq!(report.rx, 0);
    assert_eq!(wire.discard(), 2);
}
