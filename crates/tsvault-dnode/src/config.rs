//! Data node configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DnodeError, DnodeResult};

/// Settings consumed by the management subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DnodeConfig {
    /// Root data directory; each vnode repository lives in `vnode<vgroup>` below it.
    pub data_dir: PathBuf,
    /// Maximum number of vnodes this node may host (vnode registry capacity).
    pub max_vnodes: usize,
    /// Delay between the end of one status report and the start of the next.
    pub status_interval_secs: u64,
    /// Delay before the first status report after startup.
    pub status_initial_delay_ms: u64,
    /// Software version reported in the census.
    pub version: u32,
    /// Private address reported in the census.
    pub private_ip: String,
    /// Public address reported in the census.
    pub public_ip: String,
    /// Alternative role advertised to the controller (0 = any).
    pub alternative_role: u8,
}

impl Default for DnodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/tsvault/data"),
            max_vnodes: 1024,
            status_interval_secs: 1,
            status_initial_delay_ms: 500,
            version: 1,
            private_ip: String::from("127.0.0.1"),
            public_ip: String::from("127.0.0.1"),
            alternative_role: 0,
        }
    }
}

impl DnodeConfig {
    /// Loads a config from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: DnodeConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the management subsystem cannot run with.
    pub fn validate(&self) -> DnodeResult<()> {
        if self.max_vnodes == 0 {
            return Err(DnodeError::Config("max_vnodes must be positive".to_string()));
        }
        if self.status_interval_secs == 0 {
            return Err(DnodeError::Config(
                "status_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Repository root for a vgroup.
    pub fn vnode_dir(&self, vgroup_id: crate::types::VgroupId) -> PathBuf {
        self.data_dir.join(vgroup_id.dir_name())
    }

    /// Status report re-arm interval.
    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    /// Delay before the first status report.
    pub fn status_initial_delay(&self) -> Duration {
        Duration::from_millis(self.status_initial_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VgroupId;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = DnodeConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/tsvault/data"));
        assert_eq!(config.max_vnodes, 1024);
        assert_eq!(config.status_interval(), Duration::from_secs(1));
        assert_eq!(config.status_initial_delay(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_vnode_dir() {
        let config = DnodeConfig {
            data_dir: PathBuf::from("/data"),
            ..Default::default()
        };
        assert_eq!(
            config.vnode_dir(VgroupId::new(7)),
            PathBuf::from("/data/vnode7")
        );
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = DnodeConfig {
            max_vnodes: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DnodeError::Config(_))));

        let config = DnodeConfig {
            status_interval_secs: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(DnodeError::Config(_))));
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
data_dir = "/toml/data"
max_vnodes = 16
status_interval_secs = 5
private_ip = "10.0.0.1"
            "#
        )
        .unwrap();

        let config = DnodeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/toml/data"));
        assert_eq!(config.max_vnodes, 16);
        assert_eq!(config.status_interval_secs, 5);
        assert_eq!(config.private_ip, "10.0.0.1");
        assert_eq!(config.status_initial_delay_ms, 500);
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(
            file,
            r#"{{"data_dir": "/json/data", "max_vnodes": 8, "status_interval_secs": 2}}"#
        )
        .unwrap();

        let config = DnodeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/json/data"));
        assert_eq!(config.max_vnodes, 8);
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "max_vnodes = 0").unwrap();
        assert!(DnodeConfig::from_file(file.path()).is_err());

        let file = NamedTempFile::with_suffix(".yaml").unwrap();
        assert!(DnodeConfig::from_file(file.path()).is_err());
    }
}
