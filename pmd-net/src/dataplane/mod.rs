//! Poll-mode dataplane.
//!
//! One [`Worker`] runs per lcore and round-robins over the ports it owns:
//! receive a burst, hand each mbuf to the [`PacketDispatch`], transmit what
//! survived, reclaim what the TX ring refused. Workers never block and never
//! sleep; they leave the loop when the shared [`StopToken`] is set, which the
//! [`ShutdownController`] does on SIGINT/SIGTERM.

pub mod dispatch;
pub mod egress;
pub mod shutdown;
pub mod worker;

pub use dispatch::{MacSwap, PacketDispatch, Pipeline, PipelineHandoff, Verdict};
pub use egress::Egress;
pub use shutdown::{PortStatsReport, ShutdownController, StopToken, read_counters};
pub use worker::{
    BURST_SIZE, PortQueues, Worker, WorkerConfig, WorkerContext, WorkerState, WorkerStats,
};
