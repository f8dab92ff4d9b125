//! # I/O Module
//!
//! Readers for the structure and density formats the viewer can load.
//!
//! - [`pdb`] - fixed-column PDB `ATOM`/`HETATM` records
//! - [`mmcif`] - the `_atom_site` loop of PDBx/mmCIF files
//! - [`ccp4`] - CCP4/MRC density maps (reader and a float-mode writer)
//! - [`formats`] - format labels and dispatch from bytes to models
//! - [`traits`] - the shared reader trait with transparent gzip decoding

pub mod ccp4;
pub mod error;
pub mod formats;
pub mod mmcif;
pub mod pdb;
pub mod traits;

pub use error::{FormatError, ParseErrorKind};
pub use formats::StructureFormat;
pub use traits::FormatReader;
