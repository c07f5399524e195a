//! Build metadata embedded by the build script, reported by `/health` and
//! `pollwire --version`.

/// Short git commit hash at build time, or `unknown` outside a checkout.
pub const GIT_HASH: &str = env!("POLLWIRE_GIT_HASH");

/// Cargo profile the crate was built with.
pub const BUILD_PROFILE: &str = env!("POLLWIRE_BUILD_PROFILE");

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version with git hash and profile, e.g. `"0.1.0 (abc1234, debug)"`.
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}
