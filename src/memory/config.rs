//! Configuration types for shared memory regions

use std::path::PathBuf;

use crate::error::{Result, VchanError};

/// Configuration for creating a file-backed shared memory region
#[derive(Debug, Clone)]
pub struct RegionConfig {
    /// Path of the backing file
    pub path: PathBuf,
    /// Total size of the region in bytes
    pub size: usize,
    /// Permissions for the backing file (Unix permissions)
    pub permissions: u32,
}

impl RegionConfig {
    /// Create a new region configuration
    pub fn new(path: impl Into<PathBuf>, size: usize) -> Self {
        Self {
            path: path.into(),
            size,
            permissions: 0o600,
        }
    }

    /// Set the permissions for the region
    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(VchanError::invalid_parameter(
                "path",
                "Region path cannot be empty",
            ));
        }

        if self.size == 0 {
            return Err(VchanError::invalid_parameter(
                "size",
                "Region size must be greater than 0",
            ));
        }

        if self.permissions & !0o777 != 0 {
            return Err(VchanError::invalid_parameter(
                "permissions",
                format!("{:#o} is not a file mode", self.permissions),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_config_validation() {
        assert!(RegionConfig::new("/tmp/x", 4096).validate().is_ok());
        assert!(RegionConfig::new("", 4096).validate().is_err());
        assert!(RegionConfig::new("/tmp/x", 0).validate().is_err());
        assert!(RegionConfig::new("/tmp/x", 4096)
            .with_permissions(0o4755)
            .validate()
            .is_err());
    }
}
