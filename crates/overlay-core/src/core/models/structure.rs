use crate::core::utils::geometry::{BoundingSphere, bounding_sphere};
use nalgebra::{Matrix4, Point3};
use std::collections::{BTreeMap, BTreeSet};

/// Atom name used to pick one representative point per residue for superposition.
pub const TRACE_ATOM_NAME: &str = "CA";

/// Key identifying a residue across two models: `(chain, residue number)`.
pub type ResidueKey = (String, i32);

/// A single atom record parsed from a structure file.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomSite {
    /// Atom name as written in the file (e.g., `CA`, `OG1`).
    pub name: String,
    /// Three-letter residue or component name.
    pub residue_name: String,
    /// Chain identifier (author chain when available).
    pub chain_id: String,
    /// Residue sequence number.
    pub residue_number: i32,
    /// Element symbol, upper-cased.
    pub element: String,
    /// `true` for HETATM records (ligands, ions, waters).
    pub hetero: bool,
    /// Cartesian position in Angstroms.
    pub position: Point3<f64>,
}

/// An ordered collection of atoms making up one loaded structure.
///
/// The model is what the reference & alignment engine works on: its trace atoms
/// drive superposition and its bounding sphere drives volume centering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructureModel {
    atoms: Vec<AtomSite>,
}

impl StructureModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_atoms(atoms: Vec<AtomSite>) -> Self {
        Self { atoms }
    }

    pub fn push(&mut self, atom: AtomSite) {
        self.atoms.push(atom);
    }

    pub fn atoms(&self) -> &[AtomSite] {
        &self.atoms
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn positions(&self) -> Vec<Point3<f64>> {
        self.atoms.iter().map(|atom| atom.position).collect()
    }

    pub fn has_polymer_atoms(&self) -> bool {
        self.atoms.iter().any(|atom| !atom.hetero)
    }

    pub fn has_hetero_atoms(&self) -> bool {
        self.atoms.iter().any(|atom| atom.hetero)
    }

    pub fn residue_count(&self) -> usize {
        self.atoms
            .iter()
            .map(|atom| (atom.chain_id.as_str(), atom.residue_number))
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn chain_count(&self) -> usize {
        self.atoms
            .iter()
            .map(|atom| atom.chain_id.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Returns the first trace atom of every polymer residue, keyed by residue.
    pub fn trace_atoms(&self) -> BTreeMap<ResidueKey, Point3<f64>> {
        let mut trace = BTreeMap::new();
        for atom in self
            .atoms
            .iter()
            .filter(|atom| !atom.hetero && atom.name == TRACE_ATOM_NAME)
        {
            trace
                .entry((atom.chain_id.clone(), atom.residue_number))
                .or_insert(atom.position);
        }
        trace
    }

    pub fn bounding_sphere(&self) -> Option<BoundingSphere> {
        bounding_sphere(&self.positions())
    }

    /// Applies a homogeneous rigid transform to every atom position in place.
    pub fn transform(&mut self, transform: &Matrix4<f64>) {
        for atom in &mut self.atoms {
            atom.position = transform.transform_point(&atom.position);
        }
    }
}
