use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::api::rte::eth::{EthDev, PortId};

/// Cooperative stop flag shared by the shutdown controller and the workers.
///
/// Set once, never cleared. Workers check it between port visits.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    stopped: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Rx/Tx/dropped counters of one port, as printed on shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortStatsReport {
    pub port_id: PortId,
    pub rx: u64,
    pub tx: u64,
    pub dropped: u64,
}

impl fmt::Display for PortStatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Statistics for port {}", self.port_id)?;
        write!(f, "Rx:{:>9} Tx:{:>9} dropped:{:>9}", self.rx, self.tx, self.dropped)
    }
}

/// Non-blocking counter snapshot. Safe to call while traffic is flowing.
pub fn read_counters(dev: &EthDev) -> PortStatsReport {
    let stats = dev.stats().unwrap_or_default();
    PortStatsReport {
        port_id: dev.port_id(),
        rx: stats.ipackets,
        tx: stats.opackets,
        dropped: stats.imissed,
    }
}

/// Turns SIGINT/SIGTERM into a stop request.
///
/// The handler only sets the stop token and, when asked to, prints the port
/// counters. It never touches a pool or a queue.
pub struct ShutdownController {
    stop: StopToken,
    ports: Vec<EthDev>,
    print_stats: bool,
}

impl ShutdownController {
    pub fn new(stop: StopToken, ports: Vec<EthDev>) -> Self {
        Self {
            stop,
            ports,
            print_stats: false,
        }
    }

    /// Print per-port counters when a signal arrives (standalone mode).
    pub fn print_stats_on_signal(mut self, enable: bool) -> Self {
        self.print_stats = enable;
        self
    }

    pub fn stop_token(&self) -> &StopToken {
        &self.stop
    }

    pub fn report(&self) -> Vec<PortStatsReport> {
        self.ports.iter().map(read_counters).collect()
    }

    pub fn print_report(&self) {
        for report in self.report() {
            println!("{report}");
        }
    }

    /// What the signal handler does.
    pub fn on_signal(&self) {
        tracing::info!("Signal received, preparing to exit...");
        self.stop.stop();
        if self.print_stats {
            self.print_report();
        }
    }

    /// Register the handler for SIGINT and SIGTERM.
    ///
    /// Can only succeed once per process.
    pub fn install(self) -> Result<(), ctrlc::Error> {
        ctrlc::set_handler(move || self.on_signal())
    }
}
