use super::error::FormatError;
use flate2::read::GzDecoder;
use std::borrow::Cow;
use std::io::{BufRead, Cursor, Read};
use std::path::Path;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Defines the interface for decoding one file format into an in-memory model.
///
/// Implementors only parse from a buffered reader; the provided methods handle
/// raw byte payloads (gzip-compressed or not) and file paths.
pub trait FormatReader {
    /// The model produced by a successful read.
    type Output;

    /// Reads a model from a buffered reader.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails or the reader fails.
    fn read_from(reader: &mut impl BufRead) -> Result<Self::Output, FormatError>;

    /// Reads a model from an in-memory payload, gunzipping it first when it
    /// starts with the gzip magic bytes.
    fn read_bytes(bytes: &[u8]) -> Result<Self::Output, FormatError> {
        let payload = decode_payload(bytes)?;
        Self::read_from(&mut Cursor::new(payload.as_ref()))
    }

    /// Reads a model from a file path.
    fn read_from_path<P: AsRef<Path>>(path: P) -> Result<Self::Output, FormatError> {
        let bytes = std::fs::read(path)?;
        Self::read_bytes(&bytes)
    }
}

pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// Returns the payload unchanged, or its decompressed content for gzip input.
pub fn decode_payload(bytes: &[u8]) -> Result<Cow<'_, [u8]>, FormatError> {
    if !is_gzip(bytes) {
        return Ok(Cow::Borrowed(bytes));
    }
    let mut decoded = Vec::with_capacity(bytes.len() * 4);
    GzDecoder::new(bytes).read_to_end(&mut decoded)?;
    Ok(Cow::Owned(decoded))
}
