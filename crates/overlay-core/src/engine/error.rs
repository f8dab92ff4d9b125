use thiserror::Error;

use super::config::ConfigError;
use super::threshold::ThresholdError;
use crate::core::models::ids::ItemId;
use crate::core::scene::SceneError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Could not load '{item}' from any of {attempts} source(s); last failure: {last}")]
    SourcesExhausted {
        item: ItemId,
        attempts: usize,
        last: String,
    },

    #[error("An item with id '{0}' is already loaded")]
    DuplicateItem(ItemId),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Density map '{0}' contains no finite values")]
    EmptyVolume(ItemId),

    #[error("Scene operation failed: {source}")]
    Scene {
        #[from]
        source: SceneError,
    },

    #[error("Threshold conversion failed: {source}")]
    Threshold {
        #[from]
        source: ThresholdError,
    },

    #[error("Invalid configuration: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },
}
