pub type Errno = nix::errno::Errno;

/// Result type alias using nix's Errno for DPDK operations
pub type Result<T> = std::result::Result<T, Errno>;

/// The calling lcore's `rte_errno`.
pub fn rte_errno() -> Errno {
    let num = unsafe { pmd_net_sys::ffi::rust_get_rte_errno() };
    Errno::from_raw(num)
}

/// For calls that return -1 and report the cause through `rte_errno`.
pub fn check_rte_success(ret: i32) -> Result<()> {
    if ret < 0 { Err(rte_errno()) } else { Ok(()) }
}

/// Map a negative errno return code (the ethdev convention) to an Errno.
pub fn errno_from(ret: i32) -> Errno {
    Errno::from_raw(ret.saturating_abs())
}

/// ethdev and lcore functions return 0 on success and `-errno` on failure.
pub fn check_success(ret: i32) -> Result<()> {
    if ret < 0 { Err(errno_from(ret)) } else { Ok(()) }
}
