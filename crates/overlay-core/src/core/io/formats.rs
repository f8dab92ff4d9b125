use super::error::FormatError;
use super::mmcif::MmcifFile;
use super::pdb::PdbFile;
use super::traits::FormatReader;
use crate::core::models::structure::StructureModel;
use phf::{Map, phf_map};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Structure file formats the viewer can parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureFormat {
    Pdb,
    Mmcif,
}

static FORMAT_ALIASES: Map<&'static str, StructureFormat> = phf_map! {
    "pdb" => StructureFormat::Pdb,
    "ent" => StructureFormat::Pdb,
    "cif" => StructureFormat::Mmcif,
    "mmcif" => StructureFormat::Mmcif,
    "pdbx" => StructureFormat::Mmcif,
};

/// File extensions recognized as CCP4/MRC density maps.
static MAP_EXTENSIONS: phf::Set<&'static str> = phf::phf_set! {
    "map",
    "ccp4",
    "mrc",
};

impl StructureFormat {
    pub fn label(self) -> &'static str {
        match self {
            StructureFormat::Pdb => "pdb",
            StructureFormat::Mmcif => "mmcif",
        }
    }

    /// Resolves a format label or file extension, case-insensitively.
    pub fn from_alias(alias: &str) -> Option<Self> {
        FORMAT_ALIASES
            .get(alias.trim().to_ascii_lowercase().as_str())
            .copied()
    }

    /// Guesses the format from a file name, ignoring a trailing `.gz`.
    pub fn from_path(path: &Path) -> Option<Self> {
        Self::from_alias(&significant_extension(path)?)
    }

    pub fn read_bytes(self, bytes: &[u8]) -> Result<StructureModel, FormatError> {
        match self {
            StructureFormat::Pdb => PdbFile::read_bytes(bytes),
            StructureFormat::Mmcif => MmcifFile::read_bytes(bytes),
        }
    }
}

impl FromStr for StructureFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_alias(s).ok_or_else(|| FormatError::UnknownFormat(s.to_string()))
    }
}

impl fmt::Display for StructureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn significant_extension(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?.to_ascii_lowercase();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    let (_, ext) = name.rsplit_once('.')?;
    Some(ext.to_string())
}

/// Returns `true` when the file name looks like a CCP4/MRC map (optionally gzipped).
pub fn is_map_path(path: &Path) -> bool {
    significant_extension(path).is_some_and(|ext| MAP_EXTENSIONS.contains(ext.as_str()))
}
