use std::collections::HashMap;
use std::future::Future;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Nothing found at {0}")]
    NotFound(String),
    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },
}

/// Retrieves raw file payloads for loads.
///
/// Implementations are driven from a single-threaded executor, so the returned
/// future does not need to be `Send`.
pub trait SourceProvider {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, SourceError>>;
}

/// An in-memory provider keyed by exact URL.
#[derive(Debug, Clone, Default)]
pub struct MemorySources {
    entries: HashMap<String, Vec<u8>>,
}

impl MemorySources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(url, bytes);
        self
    }

    pub fn insert(&mut self, url: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.entries.insert(url.into(), bytes.into());
    }
}

impl SourceProvider for MemorySources {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        self.entries
            .get(url)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(url.to_string()))
    }
}
