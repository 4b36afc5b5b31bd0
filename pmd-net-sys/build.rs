use std::path::PathBuf;

fn main() {
    // Rebuild if wrapper files change
    println!("cargo:rerun-if-changed=include/wrapper.h");
    println!("cargo:rerun-if-changed=src/wrapper.c");

    // Use pkg-config to find DPDK with static linking preferred
    let cfg = pkg_config::Config::new()
        .atleast_version("23.11.0")
        .statik(true)
        .cargo_metadata(false)
        .probe("libdpdk")
        .unwrap();

    // Use pkgconf to emit cargo metadata.
    pkgconf::PkgConfigParser::new()
        .probe_and_emit(["libdpdk"], None)
        .unwrap();

    generate_bindings(&cfg.include_paths);
}

fn generate_bindings(include_dirs: &[PathBuf]) {
    let outdir = PathBuf::from(std::env::var("OUT_DIR").unwrap());

    // Static inlines (rx/tx burst, mbuf accessors, ring ops) go through wrapper.c
    let mut cc_builder = cc::Build::new();
    cc_builder.file("src/wrapper.c");
    cc_builder.include("include");
    for path in include_dirs {
        cc_builder.include(path);
    }
    // Matches DPDK's cpu_instruction_set=generic
    cc_builder.flag("-march=corei7");
    cc_builder.compile("dpdk_wrapper");

    let mut bgbuilder = bindgen::builder();
    for path in include_dirs {
        bgbuilder = bgbuilder.clang_arg(format!("-I{}", path.display()));
    }

    let bgbuilder = bgbuilder
        // our C shims over static inline functions
        .allowlist_function("rust_.*")
        .allowlist_function("rte_strerror")
        // eal
        .allowlist_function("rte_eal_init")
        .allowlist_function("rte_eal_cleanup")
        // mempool / mbuf
        .allowlist_function("rte_pktmbuf_pool_create")
        .allowlist_function("rte_mempool_free")
        .allowlist_function("rte_mempool_avail_count")
        .allowlist_function("rte_mempool_in_use_count")
        // ethdev
        .allowlist_function("rte_eth_dev_info_get")
        .allowlist_function("rte_eth_dev_count_avail")
        .allowlist_function("rte_eth_dev_is_valid_port")
        .allowlist_function("rte_eth_dev_get_name_by_port")
        .allowlist_function("rte_eth_macaddr_get")
        .allowlist_function("rte_eth_stats_get")
        .allowlist_function("rte_eth_stats_reset")
        .allowlist_function("rte_eth_dev_socket_id")
        .allowlist_function("rte_eth_dev_configure")
        .allowlist_function("rte_eth_dev_start")
        .allowlist_function("rte_eth_dev_stop")
        .allowlist_function("rte_eth_dev_close")
        .allowlist_function("rte_eth_rx_queue_setup")
        .allowlist_function("rte_eth_tx_queue_setup")
        .allowlist_function("rte_eth_promiscuous_enable")
        .allowlist_function("rte_eth_promiscuous_disable")
        .allowlist_function("rte_eth_promiscuous_get")
        .allowlist_function("rte_eth_dev_set_link_up")
        .allowlist_function("rte_eth_dev_set_link_down")
        .allowlist_function("rte_eth_speed_bitflag")
        // ring and the ring PMD
        .allowlist_function("rte_ring_create")
        .allowlist_function("rte_ring_free")
        .allowlist_function("rte_eth_from_rings")
        // lcore management
        .allowlist_function("rte_eal_mp_wait_lcore")
        .allowlist_function("rte_eal_wait_lcore")
        .allowlist_function("rte_eal_get_lcore_state")
        .allowlist_function("rte_eal_lcore_role")
        .allowlist_function("rte_lcore_count")
        .allowlist_function("rte_lcore_is_enabled")
        .allowlist_function("rte_lcore_to_socket_id")
        .allowlist_function("rte_lcore_to_cpu_id")
        .allowlist_function("rte_get_next_lcore")
        // types
        .allowlist_type("rte_eth_conf")
        .allowlist_type("rte_eth_dev_info")
        .allowlist_type("rte_ether_addr")
        .allowlist_type("rte_mempool")
        .allowlist_type("rte_mbuf")
        .allowlist_type("rte_ring")
        .allowlist_type("rte_eth_stats")
        .allowlist_type("rte_lcore_state_t")
        .allowlist_type("rte_lcore_role_t")
        .allowlist_var("RING_F_.*")
        .header("include/wrapper.h");

    let bindings = bgbuilder
        .generate()
        .expect("Unable to generate DPDK bindings");

    bindings
        .write_to_file(outdir.join("dpdk_bindings.rs"))
        .expect("Couldn't write bindings!");
}
