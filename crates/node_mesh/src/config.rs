//! Mesh configuration, passed explicitly at construction.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::membership::PeerIdentity;

const MAX_SERVICE_NAME_LEN: usize = 15;
const MAX_DISPLAY_NAME_BYTES: usize = 63;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid service name {name:?}: {reason}")]
    InvalidServiceName { name: String, reason: &'static str },
    #[error("display name must be 1 to 63 bytes, got {0}")]
    InvalidDisplayName(usize),
    #[error("invite timeout must be non-zero")]
    ZeroInviteTimeout,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeshConfig {
    /// Service type shared by every participant of this mesh.
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Human-readable name of the local peer.
    #[serde(default = "default_display_name")]
    pub display_name: String,
    #[serde(default = "default_invite_timeout")]
    pub invite_timeout_secs: u64,
    /// Whether an advertising node accepts invitations.
    #[serde(default = "default_true")]
    pub auto_accept: bool,
}

fn default_service_name() -> String {
    "mpc-svc".into()
}
fn default_display_name() -> String {
    "meshlink-node".into()
}
fn default_invite_timeout() -> u64 {
    10
}
fn default_true() -> bool {
    true
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            display_name: default_display_name(),
            invite_timeout_secs: default_invite_timeout(),
            auto_accept: true,
        }
    }
}

impl MeshConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_service_name(&self.service_name)?;
        let len = self.display_name.len();
        if len == 0 || len > MAX_DISPLAY_NAME_BYTES {
            return Err(ConfigError::InvalidDisplayName(len));
        }
        if self.invite_timeout_secs == 0 {
            return Err(ConfigError::ZeroInviteTimeout);
        }
        Ok(())
    }

    pub fn invite_timeout(&self) -> Duration {
        Duration::from_secs(self.invite_timeout_secs)
    }

    /// Mint a fresh identity for the local peer.
    pub fn local_identity(&self) -> PeerIdentity {
        PeerIdentity::new(&self.display_name)
    }
}

/// 1-15 chars of lowercase ASCII letters, digits and hyphens; hyphens only
/// between two other characters.
fn validate_service_name(name: &str) -> Result<(), ConfigError> {
    let invalid = |reason| ConfigError::InvalidServiceName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() || name.len() > MAX_SERVICE_NAME_LEN {
        return Err(invalid("must be 1-15 characters"));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(invalid("only lowercase letters, digits and hyphens allowed"));
    }
    if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
        return Err(invalid("hyphens must separate other characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = MeshConfig::default();
        assert_eq!(config.service_name, "mpc-svc");
        assert_eq!(config.invite_timeout(), Duration::from_secs(10));
        assert!(config.auto_accept);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_service_names() {
        for name in ["", "Mesh", "mesh_svc", "-mesh", "mesh-", "me--sh", "abcdefghijklmnop"] {
            let config = MeshConfig {
                service_name: name.into(),
                ..MeshConfig::default()
            };
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidServiceName { .. })),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_empty_display_name() {
        let config = MeshConfig {
            display_name: String::new(),
            ..MeshConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidDisplayName(0)));
    }

    #[test]
    fn rejects_zero_timeout() {
        let config = MeshConfig {
            invite_timeout_secs: 0,
            ..MeshConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroInviteTimeout));
    }

    #[test]
    fn local_identity_uses_display_name() {
        let config = MeshConfig {
            display_name: "den-laptop".into(),
            ..MeshConfig::default()
        };
        let a = config.local_identity();
        let b = config.local_identity();
        assert_eq!(a.display_name(), "den-laptop");
        assert_ne!(a, b);
    }
}
