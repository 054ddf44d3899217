use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use directories::ProjectDirs;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::annotate::{IndentRule, KeyTransform, Windows};

const LOCAL_CONFIG: &str = "opnote.toml";

/// Dispatch layouts the annotator knows how to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// `case` at any indentation, literal used as the key
    #[default]
    Flat,
    /// `case` indented exactly twelve spaces
    Nested,
    /// 16-bit compatibility codes, keyed by their low byte
    Compat16,
}

impl Preset {
    pub fn indent(self) -> IndentRule {
        match self {
            Preset::Flat | Preset::Compat16 => IndentRule::Any,
            Preset::Nested => IndentRule::Exact(12),
        }
    }

    pub fn transform(self) -> KeyTransform {
        match self {
            Preset::Flat | Preset::Nested => KeyTransform::Identity,
            Preset::Compat16 => KeyTransform::LastTwoDigits,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Write the extracted tables as JSON for inspection
    pub dump: bool,
    pub preset: Preset,
    pub paths: PathsConfig,
    pub windows: WindowsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub reference: PathBuf,
    pub target: PathBuf,
    pub output: PathBuf,
    pub one_byte_dump: PathBuf,
    pub two_byte_dump: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            reference: PathBuf::from("x86opcodes.xml"),
            target: PathBuf::from("cpux86-ta.js"),
            output: PathBuf::from("cpux86-ta-auto-annotated.js"),
            one_byte_dump: PathBuf::from("onebyte_dict.json"),
            two_byte_dump: PathBuf::from("twobyte_dict.json"),
        }
    }
}

/// 0-based line indices bounding the two dispatch windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowsConfig {
    pub onebyte_start: usize,
    pub twobyte_start: usize,
    pub twobyte_end: usize,
}

impl Default for WindowsConfig {
    fn default() -> Self {
        Self {
            onebyte_start: 5662,
            twobyte_start: 7551,
            twobyte_end: 8291,
        }
    }
}

impl WindowsConfig {
    pub fn to_windows(self) -> Result<Windows> {
        Windows::new(self.onebyte_start, self.twobyte_start, self.twobyte_end)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dump: true,
            preset: Preset::default(),
            paths: PathsConfig::default(),
            windows: WindowsConfig::default(),
        }
    }
}

impl Config {
    /// Load from an explicit file, `./opnote.toml`, or the user config dir,
    /// falling back to defaults when none exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            return Self::load_from(path);
        }

        let local = PathBuf::from(LOCAL_CONFIG);
        if local.exists() {
            return Self::load_from(&local);
        }

        if let Some(user) = Self::user_config_path() {
            if user.exists() {
                return Self::load_from(&user);
            }
        }

        debug!("No config file found, using defaults");
        Ok(Config::default())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    fn user_config_path() -> Option<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "opnote", "opnote")?;
        Some(proj_dirs.config_dir().join("config.toml"))
    }
}
