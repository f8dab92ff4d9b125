use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error on line {line}: {kind}")]
    Parse { line: usize, kind: ParseErrorKind },
    #[error("Invalid map header: {0}")]
    Header(String),
    #[error("Inconsistent data: {0}")]
    Inconsistency(String),
    #[error("Missing required record: {0}")]
    MissingRecord(String),
    #[error("Unknown format label '{0}'")]
    UnknownFormat(String),
}

#[derive(Debug, Error)]
pub enum ParseErrorKind {
    #[error("Invalid integer format in {field} (value: '{value}')")]
    InvalidInt { field: String, value: String },
    #[error("Invalid float format in {field} (value: '{value}')")]
    InvalidFloat { field: String, value: String },
    #[error("Required field {field} is empty")]
    MissingRequiredField { field: String },
    #[error("Line is too short for ATOM/HETATM record (must be at least 54 chars)")]
    LineTooShort,
    #[error("Unterminated quoted value")]
    UnterminatedQuote,
}
