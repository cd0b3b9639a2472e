//! CLI configuration.
//!
//! Stored as JSON at `~/.config/cloudsh/config.json`. Command-line flags
//! override whatever the file holds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use cloudsh_transfer::TransferConfig;
use serde::{Deserialize, Serialize};

/// Persisted account and tuning settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CliConfig {
    /// Root URL of the metadata API, e.g. `https://cloud.example.com/api/v1`.
    pub base_url: String,

    /// Bearer token sent on metadata-API calls.
    pub access_token: String,

    /// Workspace new uploads are registered in; `0` is the personal one.
    pub workspace_id: i64,

    #[serde(skip_serializing_if = "TransferOverrides::is_empty")]
    pub transfer: TransferOverrides,
}

/// Optional engine tunables. Unset fields keep the engine defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multipart_threshold: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

impl TransferOverrides {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl CliConfig {
    /// Loads the configuration from its default location.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Missing file → defaults. Unparseable file → warning + defaults.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str::<Self>(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config, using defaults"
                );
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, &json)?;
        set_permissions_0600(path);

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Engine configuration with the file's overrides applied.
    pub fn transfer_config(&self) -> TransferConfig {
        let mut config = TransferConfig::default();
        let o = &self.transfer;
        if let Some(threshold) = o.multipart_threshold {
            config.multipart_threshold = threshold;
        }
        if let Some(part_size) = o.part_size.filter(|&n| n > 0) {
            config.part_size = part_size;
        }
        if let Some(batch_size) = o.batch_size.filter(|&n| n > 0) {
            config.batch_size = batch_size;
        }
        if let Some(secs) = o.request_timeout_secs.filter(|&n| n > 0) {
            config.request_timeout = Duration::from_secs(secs);
        }
        config
    }
}

fn set_permissions_0600(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

pub fn config_path() -> anyhow::Result<PathBuf> {
    Ok(config_base_dir()?.join("cloudsh").join("config.json"))
}

fn config_base_dir() -> anyhow::Result<PathBuf> {
    if let Ok(dir) = std::env::var("XDG_CONFIG_HOME")
        && !dir.is_empty()
    {
        return Ok(PathBuf::from(dir));
    }

    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA")
            .map_err(|_| anyhow::anyhow!("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
        Ok(PathBuf::from(home).join(".config"))
    }
}
