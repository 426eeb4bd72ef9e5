//! Configuration builders for tests.
//!
//! [`TestConfigBuilder`] produces an [`AppConfig`] that keeps every test
//! on loopback, with its own control socket and port range.

use std::path::Path;

use handyd_config::AppConfig;

/// Fluent builder for [`AppConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .socket_path(tmp.path().join("handyd.sock"))
///     .port_range(port, port)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    /// Loopback binding and a short shutdown grace period.
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.daemon.bind_addr = "127.0.0.1".to_string();
        config.daemon.shutdown_grace_ms = 500;
        Self { config }
    }

    pub fn socket_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.daemon.socket_path = Some(path.as_ref().display().to_string());
        self
    }

    pub fn port_range(mut self, start: u16, end: u16) -> Self {
        self.config.daemon.port_range_start = start;
        self.config.daemon.port_range_end = end;
        self
    }

    pub fn log_file(mut self, path: impl AsRef<Path>) -> Self {
        self.config.logging.file = Some(path.as_ref().display().to_string());
        self
    }

    pub fn shutdown_grace_ms(mut self, ms: u64) -> Self {
        self.config.daemon.shutdown_grace_ms = ms;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A loopback port that was free a moment ago.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind(("127.0.0.1", 0))
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("failed to find a free port")
}
