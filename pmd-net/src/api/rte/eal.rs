// rte EAL (Environment Abstraction Layer) API
// See: rte_eal.h

use std::ffi::CString;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};

use pmd_net_sys::ffi;

use crate::api::{Errno, Result, rte_errno};

/// Global flag to track if EAL has been initialized
static EAL_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Well-known EAL options as strongly-typed enum variants.
#[derive(Debug, Clone)]
pub enum EalOption {
    /// Don't use hugepages (--no-huge)
    NoHuge,
    /// Don't scan PCI bus (--no-pci)
    NoPci,
    /// Add a virtual device (--vdev=<device>)
    Vdev(String),
    /// Core mask in hex (e.g., "0xf" for cores 0-3)
    CoreMask(String),
    /// Core list (e.g., "0-3" or "0,2,4")
    CoreList(String),
    /// Main lcore id (--main-lcore=<id>)
    MainLcore(u32),
    /// Memory to preallocate in MB (-m <mb>)
    Memory(u32),
    /// File prefix for the runtime directory (--file-prefix=<prefix>)
    FilePrefix(String),
    /// Log level (--log-level=<level>)
    LogLevel(LogLevel),
    /// In-memory mode, no persistent files (--in-memory)
    InMemory,
    /// Allow a PCI device (-a <pci_addr>)
    Allow(String),
    /// Custom argument (pass-through)
    Custom(String),
}

impl EalOption {
    /// Convert to command-line argument strings
    fn to_args(&self) -> Vec<String> {
        match self {
            EalOption::NoHuge => vec!["--no-huge".to_string()],
            EalOption::NoPci => vec!["--no-pci".to_string()],
            EalOption::Vdev(dev) => vec![format!("--vdev={}", dev)],
            EalOption::CoreMask(mask) => vec!["-c".to_string(), mask.clone()],
            EalOption::CoreList(list) => vec!["-l".to_string(), list.clone()],
            EalOption::MainLcore(id) => vec![format!("--main-lcore={}", id)],
            EalOption::Memory(mb) => vec!["-m".to_string(), mb.to_string()],
            EalOption::FilePrefix(prefix) => vec![format!("--file-prefix={}", prefix)],
            EalOption::LogLevel(level) => vec![format!("--log-level={}", level.as_str())],
            EalOption::InMemory => vec!["--in-memory".to_string()],
            EalOption::Allow(pci_addr) => vec!["-a".to_string(), pci_addr.clone()],
            EalOption::Custom(arg) => vec![arg.clone()],
        }
    }
}

/// DPDK log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "4",
            LogLevel::Warning => "5",
            LogLevel::Notice => "6",
            LogLevel::Info => "7",
            LogLevel::Debug => "8",
        }
    }
}

/// Builder for EAL initialization options.
///
/// # Example
/// ```no_run
/// use pmd_net::api::rte::eal::EalBuilder;
///
/// fn main() -> Result<(), nix::errno::Errno> {
///     let _eal = EalBuilder::new()
///         .no_huge()
///         .no_pci()
///         .core_list("0-3")
///         .vdev("net_ring0")
///         .init()?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct EalBuilder {
    program_name: Option<String>,
    options: Vec<EalOption>,
}

impl EalBuilder {
    /// Create a new EAL builder.
    ///
    /// Program name is auto-detected from `std::env::args()`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the program name (first argument)
    pub fn program_name(mut self, name: impl Into<String>) -> Self {
        self.program_name = Some(name.into());
        self
    }

    /// Add --no-huge option (don't use hugepages)
    pub fn no_huge(mut self) -> Self {
        self.options.push(EalOption::NoHuge);
        self
    }

    /// Add --no-pci option (don't scan PCI bus)
    pub fn no_pci(mut self) -> Self {
        self.options.push(EalOption::NoPci);
        self
    }

    /// Add a virtual device (--vdev=<device>)
    pub fn vdev(mut self, device: impl Into<String>) -> Self {
        self.options.push(EalOption::Vdev(device.into()));
        self
    }

    /// Set core mask in hex (-c <mask>)
    pub fn core_mask(mut self, mask: impl Into<String>) -> Self {
        self.options.push(EalOption::CoreMask(mask.into()));
        self
    }

    /// Set core list (-l <list>)
    pub fn core_list(mut self, list: impl Into<String>) -> Self {
        self.options.push(EalOption::CoreList(list.into()));
        self
    }

    /// Set the main lcore (--main-lcore=<id>)
    pub fn main_lcore(mut self, id: u32) -> Self {
        self.options.push(EalOption::MainLcore(id));
        self
    }

    /// Preallocate memory in MB (-m <mb>). Sizes the heap under --no-huge.
    pub fn memory(mut self, mb: u32) -> Self {
        self.options.push(EalOption::Memory(mb));
        self
    }

    /// Set file prefix for the runtime directory (--file-prefix=<prefix>)
    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.options.push(EalOption::FilePrefix(prefix.into()));
        self
    }

    /// Set log level (--log-level=<level>)
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.options.push(EalOption::LogLevel(level));
        self
    }

    /// Enable in-memory mode (--in-memory)
    pub fn in_memory(mut self) -> Self {
        self.options.push(EalOption::InMemory);
        self
    }

    /// Allow a PCI device (-a <pci_addr>)
    pub fn allow(mut self, pci_addr: impl Into<String>) -> Self {
        self.options.push(EalOption::Allow(pci_addr.into()));
        self
    }

    /// Add a custom option
    pub fn option(mut self, opt: EalOption) -> Self {
        self.options.push(opt);
        self
    }

    /// Add a custom raw argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.options.push(EalOption::Custom(arg.into()));
        self
    }

    /// Build the argument list
    fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        let program_name = self.program_name.clone().unwrap_or_else(|| {
            std::env::args()
                .next()
                .unwrap_or_else(|| "pmd-app".to_string())
        });
        args.push(program_name);

        for opt in &self.options {
            args.extend(opt.to_args());
        }

        args
    }

    /// Initialize EAL with the configured options.
    ///
    /// Returns an RAII guard that cleans up EAL on drop.
    pub fn init(self) -> Result<Eal> {
        let args = self.build_args();
        tracing::info!(args = ?args, "Initializing EAL");
        Eal::init(args)
    }
}

/// RAII guard for the EAL environment.
///
/// When dropped, calls `rte_eal_cleanup()`, which waits for the worker lcores
/// and releases the devices. EAL cannot be reinitialized after cleanup within
/// the same process.
///
/// # Example
/// ```no_run
/// use pmd_net::api::rte::eal::Eal;
///
/// fn main() -> Result<(), nix::errno::Errno> {
///     let _eal = Eal::init(["prog", "-l", "0-1", "--no-huge", "--vdev=net_ring0"])?;
///     Ok(())
/// }
/// ```
pub struct Eal {
    // EAL is global state and DPDK functions are internally thread-safe.
    _marker: PhantomData<()>,
}

impl Eal {
    /// Initialize the EAL environment and return an RAII guard.
    ///
    /// The first argument should be the program name (can be anything).
    /// The calling thread becomes the main lcore.
    ///
    /// # Errors
    /// `EALREADY` if an EAL is already initialized, `EINVAL` for an argument
    /// containing a NUL byte, otherwise the `rte_errno` left by `rte_eal_init`.
    pub fn init<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if EAL_INITIALIZED.swap(true, Ordering::SeqCst) {
            return Err(Errno::EALREADY);
        }

        let args: std::result::Result<Vec<CString>, _> =
            args.into_iter().map(|s| CString::new(s.as_ref())).collect();
        let args = match args {
            Ok(args) => args,
            Err(_) => {
                EAL_INITIALIZED.store(false, Ordering::SeqCst);
                return Err(Errno::EINVAL);
            }
        };

        let argc = args.len() as i32;
        let mut argv: Vec<*mut std::ffi::c_char> = args
            .iter()
            .map(|s| s.as_ptr() as *mut std::ffi::c_char)
            .collect();
        argv.push(std::ptr::null_mut());

        let ret = unsafe { ffi::rte_eal_init(argc, argv.as_mut_ptr()) };
        if ret < 0 {
            // Reset flag on failure so user can retry
            EAL_INITIALIZED.store(false, Ordering::SeqCst);
            return Err(rte_errno());
        }

        tracing::info!(
            lcores = unsafe { ffi::rte_lcore_count() },
            nb_ports = port_count(),
            "EAL initialized"
        );
        Ok(Eal {
            _marker: PhantomData,
        })
    }

    /// Check if EAL has been initialized.
    pub fn is_initialized() -> bool {
        EAL_INITIALIZED.load(Ordering::SeqCst)
    }

    /// Number of usable ports: `--vdev` devices, bound NICs and ports
    /// created at runtime.
    pub fn port_count(&self) -> u16 {
        port_count()
    }
}

pub(crate) fn port_count() -> u16 {
    unsafe { ffi::rte_eth_dev_count_avail() }
}

impl Drop for Eal {
    fn drop(&mut self) {
        // Best effort cleanup - ignore errors during drop
        let _ = unsafe { ffi::rte_eal_cleanup() };
        EAL_INITIALIZED.store(false, Ordering::SeqCst);
    }
}
