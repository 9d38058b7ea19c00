//! Channel configuration

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, VchanError},
    memory::Namespace,
};

/// Environment variable overriding [`VchanConfig::root`]
pub const ROOT_ENV: &str = "VCHAN_ROOT";
/// Environment variable overriding [`VchanConfig::local_domain`]
pub const LOCAL_DOMAIN_ENV: &str = "VCHAN_LOCAL_DOMAIN";

/// Platform settings shared by every channel a process opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VchanConfig {
    /// Namespace root holding every (domain, port) directory
    pub root: PathBuf,
    /// Domain id of this participant
    pub local_domain: u32,
    /// Longest suspension before the peer endpoint is re-probed
    pub liveness_interval_ms: u64,
    /// Attempts a blocking connect makes before giving up
    pub connect_retries: u32,
    /// Pause between blocking connect attempts
    pub connect_retry_interval_ms: u64,
    /// Mode of created files (Unix permissions)
    pub permissions: u32,
}

impl Default for VchanConfig {
    fn default() -> Self {
        let root = std::env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
            .join("vchan");

        Self {
            root,
            local_domain: 0,
            liveness_interval_ms: 100,
            connect_retries: 50,
            connect_retry_interval_ms: 100,
            permissions: 0o600,
        }
    }
}

impl VchanConfig {
    /// Configuration rooted at `root`, defaults elsewhere
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Defaults overridden by `VCHAN_ROOT` and `VCHAN_LOCAL_DOMAIN`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(root) = std::env::var_os(ROOT_ENV) {
            config.root = PathBuf::from(root);
        }

        if let Ok(domain) = std::env::var(LOCAL_DOMAIN_ENV) {
            config.local_domain = domain.trim().parse().map_err(|_| {
                VchanError::invalid_parameter(
                    LOCAL_DOMAIN_ENV,
                    format!("'{}' is not a domain id", domain),
                )
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the namespace root
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Set the local domain id
    pub fn with_local_domain(mut self, domain: u32) -> Self {
        self.local_domain = domain;
        self
    }

    /// Set the liveness re-probe interval
    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the blocking connect budget
    pub fn with_connect_retries(mut self, retries: u32, interval: Duration) -> Self {
        self.connect_retries = retries;
        self.connect_retry_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the mode of created files
    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    pub fn connect_retry_interval(&self) -> Duration {
        Duration::from_millis(self.connect_retry_interval_ms)
    }

    pub fn namespace(&self) -> Namespace {
        Namespace::new(&self.root, self.local_domain)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(VchanError::invalid_parameter(
                "root",
                "Namespace root cannot be empty",
            ));
        }

        if self.liveness_interval_ms == 0 {
            return Err(VchanError::invalid_parameter(
                "liveness_interval_ms",
                "Liveness interval cannot be zero",
            ));
        }

        if self.connect_retries == 0 {
            return Err(VchanError::invalid_parameter(
                "connect_retries",
                "At least one connect attempt is required",
            ));
        }

        if self.permissions & !0o777 != 0 || self.permissions & 0o600 != 0o600 {
            return Err(VchanError::invalid_parameter(
                "permissions",
                format!("{:#o} must be a file mode readable and writable by the owner", self.permissions),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = VchanConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.root.ends_with("vchan"));
        assert_eq!(config.liveness_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_builder_and_validation() {
        let config = VchanConfig::new("/tmp/x")
            .with_local_domain(3)
            .with_connect_retries(2, Duration::from_millis(5))
            .with_permissions(0o660);
        assert!(config.validate().is_ok());
        assert_eq!(config.namespace().local_domain(), 3);

        assert!(VchanConfig::new("").validate().is_err());
        assert!(VchanConfig::new("/tmp/x")
            .with_liveness_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(VchanConfig::new("/tmp/x")
            .with_connect_retries(0, Duration::ZERO)
            .validate()
            .is_err());
        assert!(VchanConfig::new("/tmp/x")
            .with_permissions(0o400)
            .validate()
            .is_err());
    }

    #[test]
    fn test_serde_fills_missing_fields() {
        let config: VchanConfig =
            serde_json::from_str(r#"{"root": "/run/v", "local_domain": 7}"#).unwrap();
        assert_eq!(config.root, PathBuf::from("/run/v"));
        assert_eq!(config.local_domain, 7);
        assert_eq!(config.connect_retries, 50);

        let text = serde_json::to_string(&config).unwrap();
        let back: VchanConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
