pub mod eth_dev_config;
pub mod frames;
pub mod pmd_test;
pub mod wire;

pub mod util {
    use std::time::{Duration, Instant};

    use pmd_net::api::rte::eal::EalBuilder;
    use tracing_subscriber::EnvFilter;

    pub const TEST_MBUF_COUNT: u32 = 8191;

    /// Heap for a test EAL without hugepages, in MB
    pub const TEST_EAL_MEMORY_MB: u32 = 1024;

    /// EAL options every test process uses: no hugepages, no PCI scan and
    /// nothing shared under /var/run, so test binaries can run side by side.
    pub fn test_eal(core_list: &str) -> EalBuilder {
        EalBuilder::new()
            .no_huge()
            .no_pci()
            .in_memory()
            .memory(TEST_EAL_MEMORY_MB)
            .core_list(core_list)
    }

    /// Route `tracing` output to the test harness, filtered by `RUST_LOG`.
    ///
    /// Safe to call from every test; only the first call installs anything.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    }

    /// Poll `cond` every millisecond until it holds or `timeout` elapses.
    pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        cond()
    }
}
