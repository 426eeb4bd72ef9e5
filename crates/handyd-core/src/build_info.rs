//! Build metadata embedded by the build script.

/// Short git commit hash at build time, or `unknown` outside a checkout.
pub const GIT_HASH: &str = env!("HANDYD_GIT_HASH");

/// Cargo profile the binary was built with.
pub const BUILD_PROFILE: &str = env!("HANDYD_BUILD_PROFILE");

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version plus commit and profile, e.g. `0.1.0 (abc1234, release)`.
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}
