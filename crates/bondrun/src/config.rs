//! Bootstrap configuration.
//!
//! ```rust
//! # use std::time::Duration;
//! # use bondrun::BootstrapConfig;
//! let config = BootstrapConfig::new()
//!     .name("renderer")
//!     .interface_version(3)
//!     .handshake_timeout(Duration::from_secs(5));
//! assert_eq!(config.interface_version, 3);
//! ```

use std::time::Duration;

/// Settings for one `Bootstrap`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// Label carried by every log line for this channel.
    pub name: String,
    /// Version reported to the peer's `QueryVersion` and checked against
    /// its `RequireVersion`.
    pub interface_version: u32,
    /// Give up on the handshake after this long. `None` waits forever.
    pub handshake_timeout: Option<Duration>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            name: "bond".to_string(),
            interface_version: 0,
            handshake_timeout: None,
        }
    }
}

impl BootstrapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn interface_version(mut self, version: u32) -> Self {
        self.interface_version = version;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }
}
