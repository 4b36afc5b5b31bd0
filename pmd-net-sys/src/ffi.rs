#![allow(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    dead_code,
    clippy::all
)]

include!(concat!(env!("OUT_DIR"), "/dpdk_bindings.rs"));

// The generated binding for rte_eal_remote_launch takes
// `*mut lcore_function_t` instead of the function pointer by value.
// Declared by hand with the correct ABI.
/// Launch a function on another lcore.
///
/// # Safety
/// Caller must ensure `arg` points to valid data for the duration
/// of the remote call.
pub unsafe fn rte_eal_remote_launch(
    f: Option<unsafe extern "C" fn(arg: *mut core::ffi::c_void) -> i32>,
    arg: *mut core::ffi::c_void,
    worker_id: u32,
) -> i32 {
    unsafe {
        #[allow(clashing_extern_declarations)]
        unsafe extern "C" {
            fn rte_eal_remote_launch(
                f: Option<unsafe extern "C" fn(*mut core::ffi::c_void) -> i32>,
                arg: *mut core::ffi::c_void,
                worker_id: core::ffi::c_uint,
            ) -> core::ffi::c_int;
        }
        rte_eal_remote_launch(f, arg, worker_id)
    }
}

// Build-config constants from rte_build_config.h, which bindgen
// cannot evaluate.
pub const RTE_MAX_LCORE: u32 = 128;
pub const RTE_PKTMBUF_HEADROOM: u16 = 128;
pub const RTE_MBUF_DEFAULT_DATAROOM: u16 = 2048;
pub const RTE_MEMPOOL_CACHE_MAX_SIZE: u32 = 512;
pub const LCORE_ID_ANY: u32 = u32::MAX;
pub const SOCKET_ID_ANY: i32 = -1;
