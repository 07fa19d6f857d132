use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use updraft_platform::AppPaths;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdaterSettings {
    #[serde(default)]
    pub owner: String,

    #[serde(default)]
    pub repo: String,

    #[serde(default)]
    pub auth_token: Option<String>,

    #[serde(default = "default_registry_base_url")]
    pub registry_base_url: String,

    #[serde(default = "default_accept_header")]
    pub accept_header: String,

    /// Defaults to `<data_dir>/plugins` when unset.
    #[serde(default)]
    pub plugins_root: Option<PathBuf>,

    #[serde(default)]
    pub canonical_name: String,

    /// Where the package lives when its directory does not carry the
    /// canonical name yet, e.g. `plugins/clothing-form-2.5.9`.
    #[serde(default)]
    pub install_dir: Option<PathBuf>,

    #[serde(default)]
    pub entry_file: Option<String>,

    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_check_interval")]
    pub check_interval_hours: u64,

    #[serde(default = "default_debounce")]
    pub debounce_secs: u64,

    #[serde(default)]
    pub activation_command: Option<String>,

    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,
}

fn default_registry_base_url() -> String {
    updraft_core::registry::DEFAULT_REGISTRY_URL.to_string()
}

fn default_accept_header() -> String {
    updraft_core::registry::DEFAULT_ACCEPT.to_string()
}

fn default_manifest_file() -> String {
    "VERSION".to_string()
}

fn default_http_timeout() -> u64 {
    15
}

fn default_cache_ttl() -> u64 {
    12 * 60 * 60
}

fn default_check_interval() -> u64 {
    24
}

fn default_debounce() -> u64 {
    10
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Default for UpdaterSettings {
    fn default() -> Self {
        Self {
            owner: String::new(),
            repo: String::new(),
            auth_token: None,
            registry_base_url: default_registry_base_url(),
            accept_header: default_accept_header(),
            plugins_root: None,
            canonical_name: String::new(),
            install_dir: None,
            entry_file: None,
            manifest_file: default_manifest_file(),
            http_timeout_secs: default_http_timeout(),
            cache_ttl_secs: default_cache_ttl(),
            check_interval_hours: default_check_interval(),
            debounce_secs: default_debounce(),
            activation_command: None,
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
        }
    }
}

impl UpdaterSettings {
    pub fn load(paths: &AppPaths) -> Self {
        Self::load_from(&paths.settings_file())
    }

    pub fn load_from(settings_path: &Path) -> Self {
        if settings_path.exists() {
            match std::fs::read_to_string(settings_path) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
                Err(_) => Self::default(),
            }
        } else {
            Self::default()
        }
    }

    pub fn save(&self, paths: &AppPaths) -> Result<(), std::io::Error> {
        paths.ensure_dirs()?;

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.settings_file(), content)?;
        Ok(())
    }

    pub fn plugins_root(&self, paths: &AppPaths) -> PathBuf {
        self.plugins_root
            .clone()
            .unwrap_or_else(|| paths.plugins_dir())
    }

    /// `<plugins-root>/<canonical-name>`.
    pub fn live_dir(&self, paths: &AppPaths) -> PathBuf {
        self.plugins_root(paths).join(&self.canonical_name)
    }

    /// The first required field that is still blank.
    pub fn missing_field(&self) -> Option<&'static str> {
        [
            ("owner", &self.owner),
            ("repo", &self.repo),
            ("canonical_name", &self.canonical_name),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }
}
