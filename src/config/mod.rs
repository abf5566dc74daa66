use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::timekey::ArchiveZone;

const APP_DOMAIN: &str = "org";
const APP_ORG: &str = "Slacklog";
const APP_NAME: &str = "slacklog";

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
    /// Root of the archive: `channels.json`, `users.json` and one directory per channel.
    pub data_dir: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var("SLACKLOG_CONFIG").ok().map(PathBuf::from);
        let override_data = env::var("SLACKLOG_DATA").ok().map(PathBuf::from);

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

        let data_dir = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());

        Ok(Self {
            config_dir,
            config_file,
            data_dir,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.data_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Suffix the renderer appends to edited messages.
    pub edited_suffix: String,
    pub storage: StorageOptions,
    pub index: IndexOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            edited_suffix: "(edited)".to_string(),
            storage: StorageOptions::default(),
            index: IndexOptions::default(),
        }
    }
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) -> Result<()> {
        self.storage
            .resolve(paths)
            .context("resolving storage options")?;
        if self.index.workers == 0 {
            tracing::warn!("index.workers is 0 in config, using 1");
            self.index.workers = 1;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    #[serde(skip)]
    pub data_dir: PathBuf,
    #[serde(skip)]
    pub zone: ArchiveZone,
    /// Fixed UTC offset (`+09:00`) used to cut day and month buckets.
    pub time_zone: String,
    /// Channel names to load; `"*"` loads every channel.
    pub channels: Vec<String>,
    /// Emoji name to URL map, relative to the data directory. Optional.
    pub emoji_json: PathBuf,
    /// Keep hidden subtypes and thread replies in the month buckets.
    pub include_all_subtypes: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        let zone = ArchiveZone::default();
        Self {
            data_dir: PathBuf::new(),
            zone,
            time_zone: zone.to_string(),
            channels: vec!["*".to_string()],
            emoji_json: PathBuf::from("emojis.json"),
            include_all_subtypes: false,
        }
    }
}

impl StorageOptions {
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    fn resolve(&mut self, paths: &ConfigPaths) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            self.data_dir = paths.data_dir.clone();
        }
        self.zone = self
            .time_zone
            .parse()
            .with_context(|| format!("parsing time_zone {:?}", self.time_zone))?;
        Ok(())
    }

    pub fn emoji_path(&self) -> PathBuf {
        self.data_dir.join(&self.emoji_json)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexOptions {
    /// Channels loaded in parallel before the index is built.
    pub workers: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self { workers: 4 }
    }
}
