//! # Core Module
//!
//! Stateless building blocks used by the engine.
//!
//! - **Item Representation** ([`models`]) - identifiers, colors, items, structure models, volume grids
//! - **File I/O** ([`io`]) - PDB, mmCIF and CCP4/MRC readers with transparent gzip decoding
//! - **Geometry** ([`utils`]) - rigid superposition, RMSD, bounding spheres
//! - **Scene** ([`scene`]) - the rendering collaborator boundary and its headless arena

pub mod io;
pub mod models;
pub mod scene;
pub mod utils;
