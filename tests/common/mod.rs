//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use provd::config::KernelConfig;
use std::net::TcpListener;
use std::path::Path;
use std::time::{Duration, Instant};

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// A configuration suited to tests: fast ticks, short timeouts, loopback
/// services, and the pipeline saved under `dir`.
pub fn test_config(dir: &Path) -> KernelConfig {
    KernelConfig {
        host_id: "hostA".to_string(),
        listen_address: "127.0.0.1".to_string(),
        query_port: 0,
        sketch_port: 0,
        tick_interval_ms: 1,
        flush_timeout_ms: 5_000,
        remote_timeout_ms: 2_000,
        pipeline_config: Some(dir.join("pipeline.conf")),
        log_dir: Some(dir.to_path_buf()),
        ..Default::default()
    }
}

/// A loopback port nothing is listening on right now.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
