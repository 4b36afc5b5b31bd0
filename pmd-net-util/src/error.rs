use std::fmt;

use pmd_net::BoxError;
use pmd_net::api::Errno;
use pmd_net::api::rte::eth::PortId;

/// Error type for pmd-net-util operations.
///
/// Every variant is fatal for the run and maps to its own process exit code.
#[derive(Debug)]
pub enum Error {
    /// The EAL is not initialized or failed to initialize.
    Eal(Errno),
    /// No ports are available.
    NoPorts,
    /// The mbuf pool could not be created.
    Pool(Errno),
    /// A port failed to configure, set up a queue or start.
    Port { port_id: PortId, source: Errno },
    /// Installing the SIGINT/SIGTERM handler failed.
    Signal(ctrlc::Error),
    /// A worker lcore could not be launched.
    Launch(BoxError),
}

impl Error {
    pub fn port(port_id: PortId) -> impl FnOnce(Errno) -> Self {
        move |source| Error::Port { port_id, source }
    }

    /// Process exit code for this error. A clean run exits 0.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Eal(_) => 1,
            Error::NoPorts => 2,
            Error::Pool(_) => 3,
            Error::Port { .. } => 4,
            Error::Signal(_) => 5,
            Error::Launch(_) => 6,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Eal(e) => write!(f, "EAL initialization failed: {e}"),
            Error::NoPorts => write!(f, "no ports available"),
            Error::Pool(e) => write!(f, "cannot create mbuf pool: {e}"),
            Error::Port { port_id, source } => {
                write!(f, "cannot init port {port_id}: {source}")
            }
            Error::Signal(e) => write!(f, "cannot install signal handler: {e}"),
            Error::Launch(e) => write!(f, "cannot launch worker: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Eal(e) | Error::Pool(e) => Some(e),
            Error::Port { source, .. } => Some(source),
            Error::Signal(e) => Some(e),
            Error::Launch(e) => Some(e.as_ref()),
            Error::NoPorts => None,
        }
    }
}

impl From<ctrlc::Error> for Error {
    fn from(e: ctrlc::Error) -> Self {
        Error::Signal(e)
    }
}
