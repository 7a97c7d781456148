use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::config::themes::ThemeRegistry;

pub mod themes;

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "GroceryList";
const APP_NAME: &str = "grocery";

pub const DEFAULT_STORAGE_KEY: &str = "localItems";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn from_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AppConfig::default();
            default_cfg.post_load(&self.paths)?;
            self.write_default_config(&default_cfg)?;
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths)?;
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub storage_path: PathBuf,
    pub cache_dir: PathBuf,
    pub offline_cache_path: PathBuf,
    pub asset_dir: PathBuf,
    pub log_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var("GROCERY_CONFIG").ok().map(PathBuf::from);
        let override_data = env::var("GROCERY_DATA").ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let data_root = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
        let cache_dir = project_dirs.cache_dir().to_path_buf();
        let state_dir = project_dirs
            .state_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_root.join("state"));

        Ok(Self::rooted(config_dir, config_file, data_root, cache_dir, state_dir))
    }

    /// Lays every path out under a single directory. Used by tests and by
    /// `--data-dir` style overrides that want a self-contained tree.
    pub fn under(root: &Path) -> Self {
        let config_dir = root.join("config");
        let config_file = config_dir.join("config.toml");
        Self::rooted(
            config_dir,
            config_file,
            root.join("data"),
            root.join("cache"),
            root.join("state"),
        )
    }

    fn rooted(
        config_dir: PathBuf,
        config_file: PathBuf,
        data_dir: PathBuf,
        cache_dir: PathBuf,
        state_dir: PathBuf,
    ) -> Self {
        Self {
            storage_path: data_dir.join("local-storage.db"),
            asset_dir: data_dir.join("public"),
            offline_cache_path: cache_dir.join("offline-cache.db"),
            log_dir: state_dir.join("logs"),
            config_dir,
            config_file,
            data_dir,
            cache_dir,
            state_dir,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.config_dir,
            &self.data_dir,
            &self.cache_dir,
            &self.log_dir,
            &self.state_dir,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub theme: ThemeName,
    pub list: ListOptions,
    pub display: DisplayOptions,
    pub storage: StorageOptions,
    pub offline: OfflineOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            theme: ThemeName::Dark,
            list: ListOptions::default(),
            display: DisplayOptions::default(),
            storage: StorageOptions::default(),
            offline: OfflineOptions::default(),
        }
    }
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) -> Result<()> {
        self.storage
            .resolve(paths)
            .context("resolving storage paths")?;
        self.offline.resolve(paths);
        if !ThemeRegistry::default().contains(&self.theme) {
            tracing::warn!(?self.theme, "unknown theme in config, falling back to Dark");
            self.theme = ThemeName::Dark;
        }
        if self.list.storage_key.trim().is_empty() {
            tracing::warn!("empty storage key in config, using {DEFAULT_STORAGE_KEY}");
            self.list.storage_key = DEFAULT_STORAGE_KEY.to_string();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListOptions {
    /// Key the list is persisted under
    pub storage_key: String,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayOptions {
    pub wrap_long_words: bool,
    pub relative_time: bool,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            wrap_long_words: true,
            relative_time: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    #[serde(skip)]
    pub storage_path: PathBuf,
    /// Upper bound on stored key + value bytes (0 = unlimited)
    pub quota_bytes: u64,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::new(),
            quota_bytes: 5 * 1024 * 1024,
        }
    }
}

impl StorageOptions {
    fn resolve(&mut self, paths: &ConfigPaths) -> Result<()> {
        if self.storage_path.as_os_str().is_empty() {
            self.storage_path = paths.storage_path.clone();
        }
        Ok(())
    }

    pub fn quota(&self) -> Option<u64> {
        if self.quota_bytes == 0 {
            None
        } else {
            Some(self.quota_bytes)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineOptions {
    pub cache_prefix: String,
    pub version: String,
    /// Origin the application is served from; URLs on it are cached by path
    pub origin: String,
    pub static_assets: Vec<String>,
    /// Development-server URL fragments that bypass the cache entirely
    pub passthrough_patterns: Vec<String>,
    pub font_hosts: Vec<String>,
    #[serde(skip)]
    pub asset_dir: PathBuf,
    #[serde(skip)]
    pub cache_path: PathBuf,
}

impl Default for OfflineOptions {
    fn default() -> Self {
        Self {
            cache_prefix: "grocery-".to_string(),
            version: "v1".to_string(),
            origin: "http://localhost:5173".to_string(),
            static_assets: [
                "/",
                "/index.html",
                "/manifest.json",
                "/android-chrome-192x192.png",
                "/android-chrome-512x512.png",
                "/favicon.ico",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            passthrough_patterns: ["@vite", "@react-refresh", "src/", "node_modules/"]
                .into_iter()
                .map(String::from)
                .collect(),
            font_hosts: ["fonts.googleapis.com", "fonts.gstatic.com"]
                .into_iter()
                .map(String::from)
                .collect(),
            asset_dir: PathBuf::new(),
            cache_path: PathBuf::new(),
        }
    }
}

impl OfflineOptions {
    fn resolve(&mut self, paths: &ConfigPaths) {
        if self.asset_dir.as_os_str().is_empty() {
            self.asset_dir = paths.asset_dir.clone();
        }
        if self.cache_path.as_os_str().is_empty() {
            self.cache_path = paths.offline_cache_path.clone();
        }
    }

    pub fn static_cache_name(&self) -> String {
        format!("{}static-{}", self.cache_prefix, self.version)
    }

    pub fn dynamic_cache_name(&self) -> String {
        format!("{}dynamic-{}", self.cache_prefix, self.version)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, std::hash::Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ThemeName {
    Dark,
    Light,
    HighContrast,
    Solarized,
}

impl Default for ThemeName {
    fn default() -> Self {
        ThemeName::Dark
    }
}
