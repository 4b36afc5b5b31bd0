//! Lcore (logical core) APIs.
//!
//! # Overview
//!
//! DPDK lcores are EAL-managed threads pinned to specific CPU cores. The
//! thread that calls `Eal::init` becomes the main lcore; every other core in
//! the EAL core list is a worker that runs one launched closure at a time.
//! This module provides:
//! - Querying lcore information (ID, CPU, role, state)
//! - Launching closures on worker lcores
//! - Waiting for lcore completion
//!
//! # Example
//!
//! ```no_run
//! use pmd_net::api::rte::lcore::Lcore;
//!
//! // Get the main lcore
//! let main = Lcore::main();
//! println!("Main lcore {} on socket {}", main.id(), main.socket_id());
//!
//! // Launch work on all workers
//! for worker in Lcore::workers() {
//!     worker.launch(|| {
//!         println!("Hello from worker!");
//!         0
//!     }).unwrap();
//! }
//!
//! // Wait for all workers
//! Lcore::wait_all_workers();
//! ```

use std::ffi::c_void;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use pmd_net_sys::ffi;

use crate::Result;
use crate::api::errno_from;

/// Special value indicating "any lcore" or "not an lcore thread"
pub const LCORE_ID_ANY: u32 = ffi::LCORE_ID_ANY;

/// Role of an lcore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Role {
    /// Regular EAL thread (RTE role)
    Rte = 0,
    /// Off - lcore is not used
    Off = 1,
    /// Service core
    Service = 2,
    /// Non-EAL thread (registered via rte_thread_register)
    NonEal = 3,
}

impl TryFrom<u32> for Role {
    type Error = ();

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Rte),
            1 => Ok(Self::Off),
            2 => Ok(Self::Service),
            3 => Ok(Self::NonEal),
            _ => Err(()),
        }
    }
}

/// State of an lcore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum State {
    /// Lcore is waiting for new command
    Wait = 0,
    /// Lcore is running a function
    Running = 1,
    /// Lcore has finished, waiting for ack
    Finished = 2,
}

impl From<i32> for State {
    fn from(value: i32) -> Self {
        match value {
            0 => Self::Wait,
            1 => Self::Running,
            2 => Self::Finished,
            _ => Self::Wait,
        }
    }
}

/// A handle to a DPDK logical core (lcore).
///
/// This type is `Copy`, `Send`, and `Sync` - it's just a lightweight
/// handle to an lcore, not the lcore itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lcore {
    id: u32,
}

impl Lcore {
    // ==================== Constructors ====================

    /// Create an Lcore handle from an ID.
    ///
    /// Returns `None` if the lcore ID is invalid or not enabled.
    pub fn from_id(id: u32) -> Option<Self> {
        if id < ffi::RTE_MAX_LCORE && unsafe { ffi::rte_lcore_is_enabled(id) != 0 } {
            Some(Self { id })
        } else {
            None
        }
    }

    /// Get the current thread's lcore.
    ///
    /// Returns `None` if called from a non-EAL thread.
    pub fn current() -> Option<Self> {
        let id = unsafe { ffi::rust_rte_lcore_id() };
        if id == LCORE_ID_ANY {
            None
        } else {
            Some(Self { id })
        }
    }

    /// Get the main (initial) lcore.
    ///
    /// This is the lcore that called `rte_eal_init()`.
    pub fn main() -> Self {
        Self {
            id: unsafe { ffi::rust_rte_get_main_lcore() },
        }
    }

    // ==================== Iterators ====================

    /// Iterate over all enabled lcores (including main).
    pub fn all() -> LcoreIter {
        LcoreIter {
            current: u32::MAX,
            skip_main: false,
        }
    }

    /// Iterate over worker lcores (excluding main).
    ///
    /// # Example
    ///
    /// ```no_run
    /// use pmd_net::api::rte::lcore::Lcore;
    ///
    /// for worker in Lcore::workers() {
    ///     println!("Worker lcore: {}", worker.id());
    /// }
    /// ```
    pub fn workers() -> LcoreIter {
        LcoreIter {
            current: u32::MAX,
            skip_main: true,
        }
    }

    /// Get the total number of enabled lcores.
    pub fn count() -> u32 {
        unsafe { ffi::rte_lcore_count() }
    }

    // ==================== Properties ====================

    /// Get this lcore's ID.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Check if this is the main lcore.
    #[inline]
    pub fn is_main(&self) -> bool {
        self.id == unsafe { ffi::rust_rte_get_main_lcore() }
    }

    /// Get the role of this lcore.
    #[inline]
    pub fn role(&self) -> Role {
        let role = unsafe { ffi::rte_eal_lcore_role(self.id) };
        Role::try_from(role as u32).unwrap_or(Role::Off)
    }

    /// Get the NUMA socket ID for this lcore.
    #[inline]
    pub fn socket_id(&self) -> u32 {
        unsafe { ffi::rte_lcore_to_socket_id(self.id) }
    }

    /// Get the physical CPU ID this lcore is pinned to.
    #[inline]
    pub fn cpu_id(&self) -> Option<i32> {
        let cpu = unsafe { ffi::rte_lcore_to_cpu_id(self.id as i32) };
        if cpu < 0 { None } else { Some(cpu) }
    }

    /// Get the current state of this lcore.
    #[inline]
    pub fn state(&self) -> State {
        let state = unsafe { ffi::rte_eal_get_lcore_state(self.id) };
        State::from(state as i32)
    }

    /// Check if this lcore is currently available (in Wait state).
    #[inline]
    pub fn is_available(&self) -> bool {
        self.state() == State::Wait
    }

    // ==================== Launch & Wait ====================

    /// Launch a closure on this lcore.
    ///
    /// The closure runs on this lcore's pinned thread. The lcore must be a
    /// worker in the `Wait` state (not currently running another task). A
    /// panic inside the closure is caught on the lcore and reported as -1
    /// by [`Lcore::wait`].
    ///
    /// # Returns
    ///
    /// * `Ok(())` if the launch was successful
    /// * `Err` if the lcore is busy, the main lcore, or not enabled
    pub fn launch<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        struct LaunchContext<F> {
            func: F,
        }

        unsafe extern "C" fn trampoline<F>(arg: *mut c_void) -> i32
        where
            F: FnOnce() -> i32 + Send,
        {
            let ctx = unsafe { Box::from_raw(arg as *mut LaunchContext<F>) };
            // Unwinding must not cross the C frame.
            catch_unwind(AssertUnwindSafe(ctx.func)).unwrap_or_else(|_| {
                tracing::error!(lcore = unsafe { ffi::rust_rte_lcore_id() }, "Lcore function panicked");
                -1
            })
        }

        if self.is_main() {
            return Err(format!("Cannot launch on main lcore {}", self.id).into());
        }

        let ctx = Box::new(LaunchContext { func: f });
        let arg = Box::into_raw(ctx) as *mut c_void;

        let ret = unsafe { ffi::rte_eal_remote_launch(Some(trampoline::<F>), arg, self.id) };

        if ret == 0 {
            Ok(())
        } else {
            // Launch failed, reclaim the context to avoid a leak
            drop(unsafe { Box::from_raw(arg as *mut LaunchContext<F>) });
            Err(format!(
                "Failed to launch on lcore {}: {}",
                self.id,
                errno_from(ret)
            )
            .into())
        }
    }

    /// Wait for this lcore to finish its current task.
    ///
    /// Blocks until the launched function returns and gives back its return
    /// value. Returns 0 if nothing was launched.
    pub fn wait(&self) -> i32 {
        unsafe { ffi::rte_eal_wait_lcore(self.id) }
    }

    /// Launch a closure and wait for it to complete.
    pub fn run<F>(&self, f: F) -> Result<i32>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        self.launch(f)?;
        Ok(self.wait())
    }

    // ==================== Bulk Operations ====================

    /// Wait for all worker lcores to finish.
    ///
    /// Note: Does NOT return the individual return values.
    pub fn wait_all_workers() {
        unsafe { ffi::rte_eal_mp_wait_lcore() };
    }

    /// Launch a closure on all worker lcores.
    pub fn launch_on_workers<F>(f: F) -> Result<()>
    where
        F: Fn(Lcore) -> i32 + Send + Sync + 'static,
    {
        let f = Arc::new(f);

        for worker in Self::workers() {
            let f = f.clone();
            worker.launch(move || f(worker))?;
        }

        Ok(())
    }
}

/// Iterator over lcores.
pub struct LcoreIter {
    current: u32,
    skip_main: bool,
}

impl Iterator for LcoreIter {
    type Item = Lcore;

    fn next(&mut self) -> Option<Self::Item> {
        let next =
            unsafe { ffi::rte_get_next_lcore(self.current, self.skip_main as i32, 0) };
        if next >= ffi::RTE_MAX_LCORE {
            None
        } else {
            self.current = next;
            Some(Lcore { id: next })
        }
    }
}

/// Builder for launching work on multiple lcores with filtering.
///
/// # Example
///
/// ```no_run
/// use pmd_net::api::rte::lcore::LaunchBuilder;
///
/// let results = LaunchBuilder::workers()
///     .take(2)
///     .run(|lcore| lcore.id() as i32)
///     .unwrap();
///
/// for (lcore, result) in results {
///     println!("Lcore {} returned {}", lcore.id(), result);
/// }
/// ```
pub struct LaunchBuilder {
    lcores: Vec<Lcore>,
}

impl LaunchBuilder {
    /// Create a builder targeting all workers.
    pub fn workers() -> Self {
        Self {
            lcores: Lcore::workers().collect(),
        }
    }

    /// Create a builder targeting specific lcores.
    pub fn with_lcores(lcores: impl IntoIterator<Item = Lcore>) -> Self {
        Self {
            lcores: lcores.into_iter().collect(),
        }
    }

    /// Filter lcores by a custom predicate.
    pub fn filter<P: FnMut(&Lcore) -> bool>(mut self, mut predicate: P) -> Self {
        self.lcores.retain(|lcore| predicate(lcore));
        self
    }

    /// Keep only the first N lcores.
    pub fn take(mut self, n: usize) -> Self {
        self.lcores.truncate(n);
        self
    }

    /// Get the targeted lcores.
    pub fn lcores(&self) -> &[Lcore] {
        &self.lcores
    }

    /// Launch on all targeted lcores (non-blocking).
    ///
    /// On a failed launch the lcores already started are waited for before
    /// the error is returned.
    pub fn launch<F>(self, f: F) -> Result<LaunchHandle>
    where
        F: Fn(Lcore) -> i32 + Send + Sync + 'static,
    {
        let f = Arc::new(f);

        for (i, &lcore) in self.lcores.iter().enumerate() {
            let f = f.clone();
            if let Err(e) = lcore.launch(move || f(lcore)) {
                for started in &self.lcores[..i] {
                    started.wait();
                }
                return Err(e);
            }
        }

        Ok(LaunchHandle {
            lcores: self.lcores,
        })
    }

    /// Launch and wait for all to complete.
    ///
    /// Returns (Lcore, return_value) pairs.
    pub fn run<F>(self, f: F) -> Result<Vec<(Lcore, i32)>>
    where
        F: Fn(Lcore) -> i32 + Send + Sync + 'static,
    {
        let handle = self.launch(f)?;
        Ok(handle.wait())
    }
}

/// Handle to a set of launched lcores.
pub struct LaunchHandle {
    lcores: Vec<Lcore>,
}

impl LaunchHandle {
    /// Wait for all launched lcores to complete.
    ///
    /// Returns (Lcore, return_value) pairs.
    pub fn wait(self) -> Vec<(Lcore, i32)> {
        self.lcores
            .into_iter()
            .map(|lcore| {
                let result = lcore.wait();
                (lcore, result)
            })
            .collect()
    }

    /// Check if all lcores have finished.
    pub fn is_done(&self) -> bool {
        self.lcores
            .iter()
            .all(|lcore| lcore.state() != State::Running)
    }

    /// Get the lcores being tracked.
    pub fn lcores(&self) -> &[Lcore] {
        &self.lcores
    }
}
