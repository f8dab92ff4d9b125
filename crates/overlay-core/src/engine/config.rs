use crate::core::io::formats::StructureFormat;
use crate::core::models::color::{Color, DEFAULT_PALETTE};
use thiserror::Error;

/// Placeholder substituted with the item's identifier in source templates.
pub const ID_PLACEHOLDER: &str = "{id}";

pub const DEFAULT_ISO_VALUE: f64 = 1.5;
pub const DEFAULT_TRANSLATION_EPSILON: f64 = 0.1;
pub const DEFAULT_MIN_SUPERPOSITION_PAIRS: usize = 3;

/// Fewest point pairs that still define a unique rigid superposition.
pub const MIN_SUPERPOSITION_PAIRS_FLOOR: usize = 3;

pub const RCSB_MMCIF_TEMPLATE: &str = "https://files.rcsb.org/download/{id}.cif";
pub const RCSB_PDB_TEMPLATE: &str = "https://files.rcsb.org/download/{id}.pdb";
pub const EBI_EMDB_TEMPLATE: &str =
    "https://ftp.ebi.ac.uk/pub/databases/emdb/structures/EMD-{id}/map/emd_{id}.map.gz";
pub const WWPDB_EMDB_TEMPLATE: &str =
    "https://files.wwpdb.org/pub/emdb/structures/EMD-{id}/map/emd_{id}.map.gz";

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for '{parameter}': {reason}")]
    Invalid {
        parameter: &'static str,
        reason: String,
    },
}

/// One candidate location for a structure, tried in list order.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTemplate {
    pub format: StructureFormat,
    pub url: String,
}

impl SourceTemplate {
    pub fn new(format: StructureFormat, url: impl Into<String>) -> Self {
        Self {
            format,
            url: url.into(),
        }
    }
}

pub fn expand_template(template: &str, id: &str) -> String {
    template.replace(ID_PLACEHOLDER, id)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewerConfig {
    pub palette: Vec<Color>,
    /// Relative (sigma-unit) threshold used when a map load does not name one.
    pub default_iso_value: f64,
    /// Volume/structure centering translations shorter than this (Angstroms) are skipped.
    pub translation_epsilon: f64,
    pub min_superposition_pairs: usize,
    pub structure_sources: Vec<SourceTemplate>,
    pub map_sources: Vec<String>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            palette: DEFAULT_PALETTE.to_vec(),
            default_iso_value: DEFAULT_ISO_VALUE,
            translation_epsilon: DEFAULT_TRANSLATION_EPSILON,
            min_superposition_pairs: DEFAULT_MIN_SUPERPOSITION_PAIRS,
            structure_sources: default_structure_sources(),
            map_sources: default_map_sources(),
        }
    }
}

pub fn default_structure_sources() -> Vec<SourceTemplate> {
    vec![
        SourceTemplate::new(StructureFormat::Mmcif, RCSB_MMCIF_TEMPLATE),
        SourceTemplate::new(StructureFormat::Pdb, RCSB_PDB_TEMPLATE),
    ]
}

pub fn default_map_sources() -> Vec<String> {
    vec![EBI_EMDB_TEMPLATE.to_string(), WWPDB_EMDB_TEMPLATE.to_string()]
}

impl ViewerConfig {
    pub fn builder() -> ViewerConfigBuilder {
        ViewerConfigBuilder::new()
    }
}

/// Builds a [`ViewerConfig`].
///
/// The palette and both source lists are required; numeric settings fall back to
/// their defaults.
#[derive(Default)]
pub struct ViewerConfigBuilder {
    palette: Option<Vec<Color>>,
    default_iso_value: Option<f64>,
    translation_epsilon: Option<f64>,
    min_superposition_pairs: Option<usize>,
    structure_sources: Option<Vec<SourceTemplate>>,
    map_sources: Option<Vec<String>>,
}

impl ViewerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn palette(mut self, palette: Vec<Color>) -> Self {
        self.palette = Some(palette);
        self
    }
    pub fn default_iso_value(mut self, value: f64) -> Self {
        self.default_iso_value = Some(value);
        self
    }
    pub fn translation_epsilon(mut self, epsilon: f64) -> Self {
        self.translation_epsilon = Some(epsilon);
        self
    }
    pub fn min_superposition_pairs(mut self, pairs: usize) -> Self {
        self.min_superposition_pairs = Some(pairs);
        self
    }
    pub fn structure_sources(mut self, sources: Vec<SourceTemplate>) -> Self {
        self.structure_sources = Some(sources);
        self
    }
    pub fn map_sources(mut self, sources: Vec<String>) -> Self {
        self.map_sources = Some(sources);
        self
    }

    pub fn build(self) -> Result<ViewerConfig, ConfigError> {
        let config = ViewerConfig {
            palette: self
                .palette
                .ok_or(ConfigError::MissingParameter("palette"))?,
            default_iso_value: self.default_iso_value.unwrap_or(DEFAULT_ISO_VALUE),
            translation_epsilon: self
                .translation_epsilon
                .unwrap_or(DEFAULT_TRANSLATION_EPSILON),
            min_superposition_pairs: self
                .min_superposition_pairs
                .unwrap_or(DEFAULT_MIN_SUPERPOSITION_PAIRS),
            structure_sources: self
                .structure_sources
                .ok_or(ConfigError::MissingParameter("structure_sources"))?,
            map_sources: self
                .map_sources
                .ok_or(ConfigError::MissingParameter("map_sources"))?,
        };
        validate(&config)?;
        Ok(config)
    }
}

fn invalid(parameter: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        parameter,
        reason: reason.into(),
    }
}

fn validate(config: &ViewerConfig) -> Result<(), ConfigError> {
    if config.palette.is_empty() {
        return Err(invalid("palette", "at least one color is required"));
    }
    if !config.default_iso_value.is_finite() {
        return Err(invalid("default_iso_value", "must be finite"));
    }
    if !(config.translation_epsilon.is_finite() && config.translation_epsilon >= 0.0) {
        return Err(invalid("translation_epsilon", "must be a non-negative number"));
    }
    if config.min_superposition_pairs < MIN_SUPERPOSITION_PAIRS_FLOOR {
        return Err(invalid(
            "min_superposition_pairs",
            format!("must be at least {}", MIN_SUPERPOSITION_PAIRS_FLOOR),
        ));
    }
    if config.structure_sources.is_empty() {
        return Err(invalid("structure_sources", "at least one template is required"));
    }
    if config.map_sources.is_empty() {
        return Err(invalid("map_sources", "at least one template is required"));
    }
    let templates = config
        .structure_sources
        .iter()
        .map(|s| ("structure_sources", s.url.as_str()))
        .chain(config.map_sources.iter().map(|s| ("map_sources", s.as_str())));
    for (parameter, template) in templates {
        if !template.contains(ID_PLACEHOLDER) {
            return Err(invalid(
                parameter,
                format!("template '{}' has no {} placeholder", template, ID_PLACEHOLDER),
            ));
        }
    }
    Ok(())
}
