use crate::cli::ServeArgs;
use crate::error::{CliError, Result};
use directories::ProjectDirs;
use overlay::core::io::formats::StructureFormat;
use overlay::core::models::color::Color;
use overlay::engine::config::{
    self as core_config, SourceTemplate, ViewerConfig, ViewerConfigBuilder,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
struct PartialStructureSource {
    format: String,
    url: String,
}

impl TryFrom<PartialStructureSource> for SourceTemplate {
    type Error = CliError;

    fn try_from(p: PartialStructureSource) -> Result<Self> {
        let format: StructureFormat = p
            .format
            .parse()
            .map_err(|e| CliError::Config(format!("structure-sources: {}", e)))?;
        Ok(SourceTemplate::new(format, p.url))
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct PartialViewerConfig {
    palette: Option<Vec<String>>,
    iso_value: Option<f64>,
    translation_epsilon: Option<f64>,
    min_superposition_pairs: Option<usize>,
    structure_sources: Option<Vec<PartialStructureSource>>,
    map_sources: Option<Vec<String>>,
}

/// `<config dir>/config.toml` for the current user, if a home directory exists.
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "overlay", "overlay").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

fn parse_palette(colors: &[String]) -> Result<Vec<Color>> {
    colors
        .iter()
        .map(|c| {
            c.parse::<Color>()
                .map_err(|e| CliError::Config(format!("palette: {}", e)))
        })
        .collect()
}

impl PartialViewerConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Loads the explicit `--config` file, else the per-user file when it exists,
    /// else nothing.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match default_config_path() {
            Some(path) if path.is_file() => {
                info!("Using configuration file {:?}", path);
                Self::from_file(&path)
            }
            _ => {
                debug!("No configuration file found; using defaults.");
                Ok(Self::default())
            }
        }
    }

    /// Applies command-line overrides on top of the file and fills the rest with
    /// defaults.
    pub fn merge_with_cli(self, args: &ServeArgs) -> Result<ViewerConfig> {
        let palette = match args.palette.as_ref().or(self.palette.as_ref()) {
            Some(colors) => parse_palette(colors)?,
            None => core_config::ViewerConfig::default().palette,
        };
        let structure_sources = match self.structure_sources {
            Some(sources) => sources
                .into_iter()
                .map(SourceTemplate::try_from)
                .collect::<Result<Vec<_>>>()?,
            None => core_config::default_structure_sources(),
        };

        let mut builder = ViewerConfigBuilder::new()
            .palette(palette)
            .structure_sources(structure_sources)
            .map_sources(
                self.map_sources
                    .unwrap_or_else(core_config::default_map_sources),
            );
        if let Some(iso) = args.iso_value.or(self.iso_value) {
            builder = builder.default_iso_value(iso);
        }
        if let Some(epsilon) = args.translation_epsilon.or(self.translation_epsilon) {
            builder = builder.translation_epsilon(epsilon);
        }
        if let Some(pairs) = args.min_pairs.or(self.min_superposition_pairs) {
            builder = builder.min_superposition_pairs(pairs);
        }
        Ok(builder.build()?)
    }
}
