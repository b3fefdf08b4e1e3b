use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const APP_DIR_NAME: &str = "printhost";

/// Per-platform directories this agent reads and writes.
///
/// Resolved with `dirs` rather than the hand-rolled `XDG_CONFIG_HOME`/`HOME`
/// lookup this crate's config loading used to do, because the agent needs
/// three distinct roots (config, downloads, logs) instead of just one.
#[derive(Debug, Clone)]
pub struct HostPaths {
    pub config_dir: PathBuf,
    pub downloads_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl HostPaths {
    pub fn resolve() -> anyhow::Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("no config directory for this platform"))?
            .join(APP_DIR_NAME);
        let downloads_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("no local data directory for this platform"))?
            .join(APP_DIR_NAME)
            .join("downloads");
        let log_dir = dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .ok_or_else(|| anyhow::anyhow!("no state/log directory for this platform"))?
            .join(APP_DIR_NAME)
            .join("logs");
        Ok(Self {
            config_dir,
            downloads_dir,
            log_dir,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }
}

/// On-disk host configuration: server address, credentials, and overrides.
///
/// CLI flags and environment variables take precedence over this file; the
/// file exists so a host doesn't need both supplied on every invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub server_url: Option<String>,
    /// Identity assigned by the server during the `CreateHostRequest` /
    /// `GetHostRequest` auth flow; used to derive the push channel name
    /// (`private-hosts.<host_id>`).
    #[serde(default)]
    pub host_id: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub downloads_dir: Option<PathBuf>,
}

impl HostConfig {
    fn normalize(&mut self) {
        for field in [
            &mut self.server_url,
            &mut self.host_id,
            &mut self.access_token,
            &mut self.refresh_token,
        ] {
            if let Some(v) = field {
                let trimmed = v.trim().to_string();
                if trimmed.is_empty() {
                    *field = None;
                } else {
                    *v = trimmed;
                }
            }
        }
    }

    /// Load the config file if present; `Ok(None)` if it does not exist yet.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        let mut cfg: Self = toml::from_str(&raw)?;
        cfg.normalize();
        Ok(Some(cfg))
    }

    /// Persist the config file atomically (write to a `.tmp` sibling, then
    /// rename over the target).
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("invalid config path: {}", path.display()))?;
        std::fs::create_dir_all(dir)?;

        let mut cfg = self.clone();
        cfg.normalize();

        let rendered = toml::to_string_pretty(&cfg)?;
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, rendered)?;
        std::fs::rename(tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_empties_blank_fields() {
        let mut cfg = HostConfig {
            server_url: Some("  https://example.test  ".into()),
            access_token: Some("   ".into()),
            ..Default::default()
        };
        cfg.normalize();
        assert_eq!(cfg.server_url.as_deref(), Some("https://example.test"));
        assert_eq!(cfg.access_token, None);
    }

    #[test]
    fn load_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.toml");
        assert!(HostConfig::load(&path).unwrap().is_none());
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let cfg = HostConfig {
            server_url: Some("https://example.test".into()),
            access_token: Some("token-abc".into()),
            ..Default::default()
        };
        cfg.save(&path).unwrap();

        let loaded = HostConfig::load(&path).unwrap().expect("file exists");
        assert_eq!(loaded.server_url.as_deref(), Some("https://example.test"));
        assert_eq!(loaded.access_token.as_deref(), Some("token-abc"));
    }
}
