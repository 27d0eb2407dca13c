use std::collections::HashMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::fs;
use anyhow::{Context, Result, anyhow};

use crate::types::Dataset;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub years: YearsConfig,
    #[serde(default)]
    pub color: ColorConfig,
    #[serde(default)]
    pub meteomatics: MeteomaticsConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub skin_cancer_csv: PathBuf,
    pub avg_uv_csv: PathBuf,
    pub boundaries: PathBuf, // .geojson/.json or .shp
    #[serde(default = "default_name_property")]
    pub name_property: String,
    // Alternate spelling -> name used by the boundary file
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct YearsConfig {
    pub min: i32,
    pub max: i32,
    pub default: i32,
}

impl YearsConfig {
    pub fn contains(&self, year: i32) -> bool {
        (self.min..=self.max).contains(&year)
    }
}

impl Default for YearsConfig {
    fn default() -> Self {
        Self { min: 2004, max: 2011, default: 2008 }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DegeneratePolicy {
    /// Every value of a zero-width range takes the start color.
    #[default]
    Minimum,
    /// Every value of a zero-width range takes the neutral color.
    Fallback,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ColorConfig {
    #[serde(default)]
    pub degenerate: DegeneratePolicy,
    #[serde(default = "default_legend_stops")]
    pub legend_stops: usize,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self { degenerate: DegeneratePolicy::default(), legend_stops: default_legend_stops() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MeteomaticsConfig {
    pub login_url: String,
    pub api_url: String,
    pub model: String,
    pub username_env: String,
    pub password_env: String,
}

impl Default for MeteomaticsConfig {
    fn default() -> Self {
        Self {
            login_url: "https://login.meteomatics.com/api/v1/token".to_string(),
            api_url: "https://api.meteomatics.com".to_string(),
            model: "mix".to_string(),
            username_env: "METEOMATIC_USERNAME".to_string(),
            password_env: "METEOMATIC_PASSWORD".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub width: u32,
    pub height: u32,
    // [west, south, east, north] in degrees
    #[serde(default = "default_extent")]
    pub extent: [f64; 4],
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { dir: PathBuf::from("output"), width: 1024, height: 1024, extent: default_extent() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000, static_dir: default_static_dir() }
    }
}

fn default_name_property() -> String {
    "name".to_string()
}

fn default_legend_stops() -> usize {
    5
}

fn default_extent() -> [f64; 4] {
    [-25.0, 34.0, 45.0, 72.0]
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("public")
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let years = &self.years;
        if years.min > years.max {
            return Err(anyhow!("years.min ({}) is after years.max ({})", years.min, years.max));
        }
        if !years.contains(years.default) {
            return Err(anyhow!("years.default ({}) is outside {}..={}", years.default, years.min, years.max));
        }
        let [west, south, east, north] = self.output.extent;
        if west >= east || south >= north || south <= -85.0 || north >= 85.0 {
            return Err(anyhow!("output.extent must be [west, south, east, north] within Web Mercator latitudes"));
        }
        if self.output.width == 0 || self.output.height == 0 {
            return Err(anyhow!("output.width and output.height must be positive"));
        }
        if self.color.legend_stops < 2 {
            return Err(anyhow!("color.legend_stops must be at least 2"));
        }
        Ok(())
    }

    pub fn dataset_path(&self, dataset: Dataset) -> &Path {
        match dataset {
            Dataset::SkinCancer => &self.input.skin_cancer_csv,
            Dataset::AvgUv => &self.input.avg_uv_csv,
        }
    }
}
