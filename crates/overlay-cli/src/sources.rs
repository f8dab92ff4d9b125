use crate::error::Result;
use overlay::engine::source::{SourceError, SourceProvider};
use std::path::Path;
use tracing::{debug, info};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const FILE_SCHEME: &str = "file://";

/// Fetches payloads over HTTP(S), or from the local filesystem for `file://`
/// URLs and bare paths.
#[derive(Debug, Clone)]
pub struct HttpSources {
    client: reqwest::Client,
}

#[derive(Debug, PartialEq, Eq)]
enum Location<'a> {
    Remote(&'a str),
    Local(&'a Path),
}

fn classify(url: &str) -> Location<'_> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Location::Remote(url)
    } else {
        Location::Local(Path::new(url.strip_prefix(FILE_SCHEME).unwrap_or(url)))
    }
}

impl HttpSources {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { client })
    }

    async fn download(&self, url: &str) -> std::result::Result<Vec<u8>, SourceError> {
        info!("Sending request to {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(url, &e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(url.to_string()));
        }
        let response = response.error_for_status().map_err(|e| fetch_error(url, &e))?;
        let bytes = response.bytes().await.map_err(|e| fetch_error(url, &e))?;
        debug!("Received {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }
}

fn fetch_error(url: &str, error: &dyn std::fmt::Display) -> SourceError {
    SourceError::Fetch {
        url: url.to_string(),
        reason: error.to_string(),
    }
}

async fn read_local(url: &str, path: &Path) -> std::result::Result<Vec<u8>, SourceError> {
    debug!("Reading local file {:?}", path);
    tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => SourceError::NotFound(url.to_string()),
        _ => fetch_error(url, &e),
    })
}

impl SourceProvider for HttpSources {
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, SourceError> {
        match classify(url) {
            Location::Remote(remote) => self.download(remote).await,
            Location::Local(path) => read_local(url, path).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn urls_are_classified_by_scheme() {
        assert_eq!(
            classify("https://files.rcsb.org/download/1CRN.cif"),
            Location::Remote("https://files.rcsb.org/download/1CRN.cif")
        );
        assert_eq!(
            classify("file:///data/maps/emd_6057.map.gz"),
            Location::Local(Path::new("/data/maps/emd_6057.map.gz"))
        );
        assert_eq!(classify("local/model.pdb"), Location::Local(Path::new("local/model.pdb")));
    }

    #[tokio::test]
    async fn local_files_are_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"HEADER    TEST").unwrap();
        let url = format!("{}{}", FILE_SCHEME, file.path().display());

        let sources = HttpSources::new().unwrap();
        assert_eq!(sources.fetch(&url).await.unwrap(), b"HEADER    TEST".to_vec());
    }

    #[tokio::test]
    async fn missing_local_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.pdb");
        let url = missing.display().to_string();

        let sources = HttpSources::new().unwrap();
        assert_eq!(sources.fetch(&url).await, Err(SourceError::NotFound(url.clone())));
    }
}
