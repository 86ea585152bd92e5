//! Persistent CLI profile configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use quill_core::util::normalize_text_option;
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "cli-config.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfilesConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub active_profile: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, CliProfile>,
}

#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfile {
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

impl fmt::Debug for CliProfile {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("CliProfile")
            .field("api_base_url", &self.api_base_url)
            .field("owner_id", &self.owner_id)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

const fn default_config_version() -> u32 {
    1
}

pub fn default_config_path() -> Result<PathBuf, String> {
    dirs::config_dir()
        .map(|dir| dir.join("quill").join(CONFIG_FILE_NAME))
        .ok_or_else(|| "Failed to resolve CLI config directory".to_string())
}

pub fn normalize_profile_name(value: Option<&str>) -> Option<String> {
    let value = value?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

impl CliProfilesConfig {
    pub fn load() -> Result<Self, String> {
        Self::load_from_path(&default_config_path()?)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
        let mut config = serde_json::from_str::<Self>(&raw)
            .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))?;
        config.normalize();
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, String> {
        let path = default_config_path()?;
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    error
                )
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)
            .map_err(|error| format!("Failed to serialize config: {error}"))?;
        std::fs::write(path, serialized)
            .map_err(|error| format!("Failed to write config at {}: {}", path.display(), error))
    }

    /// Explicit name, then `QUILL_PROFILE`, then the active profile, then `default`
    pub fn resolve_profile_name(&self, explicit: Option<&str>) -> String {
        self.resolve_profile_name_with(explicit, std::env::var("QUILL_PROFILE").ok())
    }

    fn resolve_profile_name_with(&self, explicit: Option<&str>, env_value: Option<String>) -> String {
        normalize_profile_name(explicit)
            .or_else(|| normalize_profile_name(env_value.as_deref()))
            .or_else(|| normalize_profile_name(self.active_profile.as_deref()))
            .unwrap_or_else(|| "default".to_string())
    }

    pub fn profile(&self, name: &str) -> Option<&CliProfile> {
        self.profiles.get(name)
    }

    pub fn profile_mut_or_default(&mut self, name: &str) -> &mut CliProfile {
        self.profiles.entry(name.to_string()).or_default()
    }

    fn normalize(&mut self) {
        self.active_profile = normalize_profile_name(self.active_profile.as_deref());
        for profile in self.profiles.values_mut() {
            profile.normalize();
        }
    }
}

impl CliProfile {
    /// API URL, owner, and token, when all three are set
    pub fn remote_settings(&self) -> Option<(String, String, String)> {
        Some((
            self.api_base_url.clone()?,
            self.owner_id.clone()?,
            self.access_token.clone()?,
        ))
    }

    fn normalize(&mut self) {
        self.api_base_url = normalize_text_option(self.api_base_url.take())
            .map(|url| url.trim_end_matches('/').to_string());
        self.owner_id = normalize_text_option(self.owner_id.take());
        self.access_token = normalize_text_option(self.access_token.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_profile_name_rejects_empty() {
        assert_eq!(normalize_profile_name(None), None);
        assert_eq!(normalize_profile_name(Some(" ")), None);
        assert_eq!(normalize_profile_name(Some(" work ")), Some("work".to_string()));
    }

    #[test]
    fn config_roundtrip_normalizes_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let mut config = CliProfilesConfig {
            version: 1,
            active_profile: Some(" default ".to_string()),
            profiles: BTreeMap::new(),
        };
        config.profiles.insert(
            "default".to_string(),
            CliProfile {
                api_base_url: Some(" https://api.example.com/ ".to_string()),
                owner_id: Some(" user-1 ".to_string()),
                access_token: Some("   ".to_string()),
            },
        );

        config.save_to_path(&path).unwrap();
        let loaded = CliProfilesConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded.active_profile.as_deref(), Some("default"));
        let profile = loaded.profile("default").unwrap();
        assert_eq!(
            profile.api_base_url.as_deref(),
            Some("https://api.example.com")
        );
        assert_eq!(profile.owner_id.as_deref(), Some("user-1"));
        assert_eq!(profile.access_token, None);
        assert_eq!(profile.remote_settings(), None);
    }

    #[test]
    fn missing_config_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliProfilesConfig::load_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, CliProfilesConfig::default());
    }

    #[test]
    fn resolve_profile_name_prefers_explicit_then_env_then_active() {
        let config = CliProfilesConfig {
            version: 1,
            active_profile: Some("work".to_string()),
            profiles: BTreeMap::new(),
        };
        assert_eq!(
            config.resolve_profile_name_with(Some("mobile"), Some("env".to_string())),
            "mobile"
        );
        assert_eq!(
            config.resolve_profile_name_with(None, Some("env".to_string())),
            "env"
        );
        assert_eq!(config.resolve_profile_name_with(None, None), "work");
        assert_eq!(
            CliProfilesConfig::default().resolve_profile_name_with(None, None),
            "default"
        );
    }

    #[test]
    fn profile_debug_redacts_token() {
        let profile = CliProfile {
            api_base_url: None,
            owner_id: Some("user-1".to_string()),
            access_token: Some("secret-token".to_string()),
        };
        let output = format!("{profile:?}");
        assert!(!output.contains("secret-token"));
        assert!(output.contains("[REDACTED]"));
    }
}
