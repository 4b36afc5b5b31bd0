//! Poll-mode forwarder - MAC swap or pipeline handoff
//!
//! Brings up every `--vdev` port with one RX and one TX queue, deals the
//! ports to the worker lcores and polls them until SIGINT/SIGTERM.
//!
//! Supports two modes:
//! - **macswap**: swap source and destination MAC and send each frame back
//!   out of the port it came in on
//! - **pipeline**: hand each frame to a counting pipeline and free it
//!
//! Ring ports have no traffic of their own. `--prime N` sends N UDP frames out
//! of TX queue 0 of every port once the ports are up. A `net_ring` vdev
//! delivers them to its RX queue 0, where the forwarder keeps them circulating
//! until shutdown. Physical ports are attached with `--allow`.
//!
//! # Usage
//!
//! ```bash
//! # Two ports, two workers, frames bouncing forever
//! pmd-macswap -l 0-2 --vdev net_ring0 --vdev net_ring1 --prime 512
//!
//! # Stop by itself after 5 seconds
//! pmd-macswap --prime 64 --duration 5
//!
//! # A physical NIC instead of the ring vdevs
//! pmd-macswap --vdev= --allow 0000:00:04.0
//! ```
//!
//! # Exit codes
//!
//! 0 on a clean shutdown, 1 if the EAL cannot be initialized, otherwise the
//! code of the failed bootstrap step (see `pmd_net_util::Error::exit_code`).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arrayvec::ArrayVec;
use clap::{Parser, ValueEnum};
use pmd_net::api::rte::eal::EalBuilder;
use pmd_net::api::rte::eth::PortId;
use pmd_net::api::rte::mbuf::Mbuf;
use pmd_net::api::rte::queue::MAX_BURST_SIZE;
use pmd_net::dataplane::{MacSwap, PacketDispatch, PipelineHandoff, StopToken, Verdict, WorkerStats};
use pmd_net_test::frames::UdpFrameBuilder;
use pmd_net_util::{PmdApp, ReadyPorts, RunReport};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Swap MAC addresses and forward back out of the RX port
    Macswap,
    /// Count frames in a pipeline and free them
    Pipeline,
}

#[derive(Parser, Debug)]
#[command(name = "pmd-macswap")]
#[command(about = "Poll-mode MAC swap forwarder over DPDK ports")]
struct Args {
    /// Dispatch mode
    #[arg(short, long, value_enum, default_value = "macswap")]
    mode: Mode,

    /// EAL core list; the first core is the main lcore
    #[arg(short = 'l', long, default_value = "0-1")]
    lcores: String,

    /// Virtual devices, one port each, numbered in order
    #[arg(long = "vdev", default_values_t = [String::from("net_ring0"), String::from("net_ring1")])]
    vdevs: Vec<String>,

    /// PCI devices to attach; without any, PCI scanning is disabled
    #[arg(long = "allow")]
    allow: Vec<String>,

    /// Run without hugepages
    #[arg(long)]
    no_huge: bool,

    /// Mbufs reserved per port
    #[arg(long, default_value = "8191")]
    mbufs_per_port: u32,

    /// RX burst size
    #[arg(short, long, default_value = "32")]
    burst: usize,

    /// MTU
    #[arg(long, default_value = "1500")]
    mtu: u32,

    /// Immediate TX retries before unsent frames are dropped
    #[arg(long, default_value = "0")]
    tx_retries: u32,

    /// Request the NIC's loopback mode (ignored by ring vdevs)
    #[arg(long)]
    loopback: bool,

    /// Frames to send out of each port at startup
    #[arg(long, default_value = "0")]
    prime: usize,

    /// Stop after this many seconds instead of waiting for a signal
    #[arg(long)]
    duration: Option<u64>,
}

/// Pipeline mode: count what arrives.
#[derive(Default)]
struct Counter {
    frames: AtomicU64,
    bytes: AtomicU64,
}

impl Counter {
    fn receive(&self, _port_id: PortId, packet: &[u8]) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(packet.len() as u64, Ordering::Relaxed);
    }
}

type BoxedPipeline = Box<dyn Fn(PortId, &[u8]) + Send + Sync>;

/// The dispatch chosen on the command line.
enum Dispatch {
    MacSwap(MacSwap),
    Pipeline(PipelineHandoff<BoxedPipeline>),
}

impl PacketDispatch for Dispatch {
    #[inline]
    fn dispatch(&self, port_id: PortId, mbuf: &mut Mbuf) -> Verdict {
        match self {
            Dispatch::MacSwap(d) => d.dispatch(port_id, mbuf),
            Dispatch::Pipeline(d) => d.dispatch(port_id, mbuf),
        }
    }
}

/// Send `count` frames out of TX queue 0 of every port, before the workers
/// claim it.
fn prime(ports: &ReadyPorts, count: usize) {
    let builder = UdpFrameBuilder::new();
    for dev in ports.ports() {
        let txq = match dev.tx_queue(0) {
            Ok(txq) => txq,
            Err(e) => {
                warn!(port_id = dev.port_id(), error = %e, "Cannot prime port");
                continue;
            }
        };
        let mut sent = 0;
        let mut burst: ArrayVec<Mbuf, MAX_BURST_SIZE> = ArrayVec::new();
        for i in 0..count {
            let Some(mut mbuf) = ports.mempool().try_alloc() else {
                break;
            };
            let frame = builder
                .ports(1024 + (i % 1024) as u16, 9)
                .build(&(i as u64).to_be_bytes());
            if !mbuf.copy_from_slice(&frame) {
                break;
            }
            burst.push(mbuf);
            if burst.is_full() {
                sent += txq.tx(&mut burst);
                burst.clear();
            }
        }
        sent += txq.tx(&mut burst);
        if sent < count {
            warn!(port_id = dev.port_id(), sent, requested = count, "Port refused frames");
        } else {
            info!(port_id = dev.port_id(), sent, "Port primed");
        }
    }
}

fn print_report(report: &RunReport) {
    for (lcore_id, stats) in &report.workers {
        let WorkerStats {
            passes,
            idle_polls,
            rx_packets,
            tx_packets,
            tx_dropped,
            dispatch_freed,
        } = *stats;
        info!(
            lcore_id,
            passes, idle_polls, rx_packets, tx_packets, tx_dropped, dispatch_freed, "Worker stats"
        );
    }
    for port in &report.ports {
        println!("{port}");
    }
}

fn main() {
    // Initialize tracing - respects RUST_LOG, defaults to info if not set
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .init();

    let args = Args::parse();

    let mut eal = EalBuilder::new()
        .program_name("pmd-macswap")
        .core_list(&args.lcores);
    if args.no_huge {
        eal = eal.no_huge();
    }
    if args.allow.is_empty() {
        eal = eal.no_pci();
    }
    for addr in &args.allow {
        eal = eal.allow(addr);
    }
    for vdev in args.vdevs.iter().filter(|v| !v.is_empty()) {
        eal = eal.vdev(vdev);
    }
    let _eal = match eal.init() {
        Ok(eal) => eal,
        Err(e) => {
            error!(error = %e, "Cannot init EAL");
            std::process::exit(1);
        }
    };

    let stop = StopToken::new();
    if let Some(secs) = args.duration {
        let stop = stop.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(secs));
            info!(secs, "Duration elapsed, stopping");
            stop.stop();
        });
    }

    let counter = Arc::new(Counter::default());
    let app = PmdApp::new()
        .mbufs_per_port(args.mbufs_per_port)
        .burst_size(args.burst)
        .mtu(args.mtu)
        .tx_retries(args.tx_retries)
        .loopback(args.loopback)
        .stats_on_signal(true)
        .stop_token(stop);

    info!(mode = ?args.mode, lcores = %args.lcores, vdevs = ?args.vdevs, allow = ?args.allow, "Starting forwarder");
    let mode = args.mode;
    let count = args.prime;
    let pipeline_counter = counter.clone();
    let result = app.run(move |ports| {
        prime(ports, count);
        match mode {
            Mode::Macswap => Dispatch::MacSwap(MacSwap),
            Mode::Pipeline => {
                let pipeline: BoxedPipeline = Box::new(move |port_id: PortId, packet: &[u8]| {
                    pipeline_counter.receive(port_id, packet)
                });
                Dispatch::Pipeline(PipelineHandoff::new(pipeline))
            }
        }
    });

    match result {
        Ok(report) => {
            print_report(&report);
            if let Mode::Pipeline = mode {
                info!(
                    frames = counter.frames.load(Ordering::Relaxed),
                    bytes = counter.bytes.load(Ordering::Relaxed),
                    "Pipeline totals"
                );
            }
        }
        Err(e) => {
            error!(error = %e, "Forwarder failed");
            std::process::exit(e.exit_code());
        }
    }
}
