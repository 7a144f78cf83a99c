use crate::ui::color::{Background, ColorMode};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "feedcat";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// IANA zone name; unset means the system zone.
    pub timezone: Option<String>,
    pub display: DisplayConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Unset: ask the terminal.
    pub screen_cols: Option<usize>,
    pub font_height: u32,
    pub color_mode: u32,
    pub background: Background,
    pub no_color: bool,
    pub output_codeset: Option<String>,
    pub hide_protected: bool,
    pub no_image: bool,
    pub max_concurrent_images: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            screen_cols: None,
            font_height: 14,
            color_mode: 256,
            background: Background::Dark,
            no_color: false,
            output_codeset: None,
            hide_protected: false,
            no_image: false,
            max_concurrent_images: 4,
        }
    }
}

impl DisplayConfig {
    pub fn color_mode(&self) -> ColorMode {
        ColorMode::from_depth(self.color_mode)
    }

    /// Avatar size in pixels: about three text lines, a multiple of six.
    pub fn icon_size(&self) -> u32 {
        (self.font_height * 3).saturating_sub(1) / 6 * 6
    }

    /// Preview size in pixels: about nine text lines, a multiple of six.
    pub fn image_size(&self) -> u32 {
        (self.font_height * 9).saturating_sub(1) / 6 * 6
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub cache_dir: Option<PathBuf>,
    pub ngword_file: Option<PathBuf>,
    pub mute_file: Option<PathBuf>,
    pub record_file: Option<PathBuf>,
    /// Converter program; found on `PATH` when unset.
    pub converter: Option<PathBuf>,
    pub colormap_dir: Option<PathBuf>,
}

fn app_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR))
}

impl PathsConfig {
    pub fn cache_dir(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(dirs::cache_dir()
                .context("could not determine cache directory")?
                .join(APP_DIR)),
        }
    }

    pub fn ngword_file(&self) -> Option<PathBuf> {
        self.ngword_file
            .clone()
            .or_else(|| app_config_dir().map(|d| d.join("ngword.json")))
    }

    pub fn mute_file(&self) -> Option<PathBuf> {
        self.mute_file
            .clone()
            .or_else(|| app_config_dir().map(|d| d.join("mute.json")))
    }

    pub fn colormap_dir(&self) -> Option<PathBuf> {
        self.colormap_dir.clone().or_else(app_config_dir)
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        app_config_dir().map(|d| d.join("config.toml"))
    }

    /// Load `path`, or the default location. Only an explicitly named file
    /// has to exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) if !p.exists() => bail!("config file {} not found", p.display()),
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}
