//! Application runner for `pmd-net` dataplanes.
//!
//! Wraps the bootstrap sequence every poll-mode application repeats: create
//! the mbuf pool, bring up each port, report link state, hand the ports to
//! worker lcores and wait for them to stop.
//!
//! # Quick start
//!
//! ```no_run
//! use pmd_net::api::rte::eal::EalBuilder;
//! use pmd_net::dataplane::MacSwap;
//! use pmd_net_util::PmdApp;
//!
//! let _eal = EalBuilder::new()
//!     .no_huge()
//!     .core_list("0-2")
//!     .vdev("net_ring0")
//!     .vdev("net_ring1")
//!     .init()
//!     .expect("EAL init failed");
//!
//! let report = PmdApp::new().run(|_ports| MacSwap).unwrap();
//! for port in &report.ports {
//!     println!("{port}");
//! }
//! ```

pub mod app;
pub mod error;

pub use app::{PmdApp, ReadyPorts, RunReport, report_links};
pub use error::Error;
