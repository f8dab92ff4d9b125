use crate::core::models::ids::ItemId;
use crate::core::models::structure::{ResidueKey, StructureModel};
use crate::core::models::volume::GridGeometry;
use crate::core::utils::geometry::{self, bounding_sphere, translation_matrix};
use nalgebra::{Matrix4, Point3};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Which item, if any, defines the shared spatial frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReferenceState {
    #[default]
    Empty,
    /// Later structures are superposed onto this structure; later volumes are
    /// centered on it.
    StructureAnchored(ItemId),
    /// Later structures are centered on this volume.
    VolumeAnchored(ItemId),
}

impl ReferenceState {
    pub fn anchor(&self) -> Option<&ItemId> {
        match self {
            ReferenceState::Empty => None,
            ReferenceState::StructureAnchored(id) | ReferenceState::VolumeAnchored(id) => Some(id),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ReferenceState::Empty => "none",
            ReferenceState::StructureAnchored(_) => "structure",
            ReferenceState::VolumeAnchored(_) => "volume",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlignmentFailure {
    TooFewPairs { found: usize, required: usize },
    Degenerate,
    InvalidRmsd(f64),
    NoGeometry,
}

impl fmt::Display for AlignmentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlignmentFailure::TooFewPairs { found, required } => write!(
                f,
                "only {} matching trace atoms, at least {} required",
                found, required
            ),
            AlignmentFailure::Degenerate => write!(f, "superposition did not converge"),
            AlignmentFailure::InvalidRmsd(rmsd) => write!(f, "superposition produced RMSD {}", rmsd),
            AlignmentFailure::NoGeometry => write!(f, "no coordinates to align"),
        }
    }
}

/// How a newly loaded item was placed relative to the current anchor.
#[derive(Debug, Clone, PartialEq)]
pub enum Placement {
    /// The item becomes the anchor.
    Anchor,
    Superposed { rmsd: f64, pairs: usize },
    /// Translated onto the anchor's center; `moved` is `false` when the offset
    /// was below the translation epsilon.
    Centered { distance: f64, moved: bool },
    Unaligned(AlignmentFailure),
    /// Volume onto volume: no relative placement is defined.
    PassThrough,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentPlan {
    /// Transform to insert above the item's scene node, if any.
    pub transform: Option<Matrix4<f64>>,
    pub placement: Placement,
}

impl AlignmentPlan {
    fn unmoved(placement: Placement) -> Self {
        Self {
            transform: None,
            placement,
        }
    }

    pub fn becomes_anchor(&self) -> bool {
        self.placement == Placement::Anchor
    }

    /// The transform to record for the item: identity when nothing is applied.
    pub fn recorded_transform(&self) -> Matrix4<f64> {
        self.transform.unwrap_or_else(Matrix4::identity)
    }
}

/// What forgetting an item did to the reference state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forgotten {
    StructureReference,
    VolumeAnchor,
    Other,
}

/// World-space geometry kept for every placed item, so any of them can serve as
/// the anchor later.
#[derive(Debug, Clone)]
enum AnchorGeometry {
    Structure {
        trace: BTreeMap<ResidueKey, Point3<f64>>,
        center: Option<Point3<f64>>,
    },
    Volume {
        center: Point3<f64>,
    },
}

/// The reference state machine together with the per-structure transform records.
#[derive(Debug, Clone)]
pub struct ReferenceEngine {
    state: ReferenceState,
    geometry: HashMap<ItemId, AnchorGeometry>,
    transforms: HashMap<ItemId, Matrix4<f64>>,
    min_pairs: usize,
    translation_epsilon: f64,
}

impl ReferenceEngine {
    pub fn new(min_pairs: usize, translation_epsilon: f64) -> Self {
        Self {
            state: ReferenceState::Empty,
            geometry: HashMap::new(),
            transforms: HashMap::new(),
            min_pairs,
            translation_epsilon,
        }
    }

    pub fn state(&self) -> &ReferenceState {
        &self.state
    }

    pub fn transform(&self, id: &ItemId) -> Option<&Matrix4<f64>> {
        self.transforms.get(id)
    }

    pub fn plan_structure(&self, model: &StructureModel) -> AlignmentPlan {
        match &self.state {
            ReferenceState::Empty => AlignmentPlan::unmoved(Placement::Anchor),
            ReferenceState::StructureAnchored(anchor) => match self.geometry.get(anchor) {
                Some(AnchorGeometry::Structure { trace, .. }) => self.superpose_onto(trace, model),
                _ => AlignmentPlan::unmoved(Placement::Unaligned(AlignmentFailure::NoGeometry)),
            },
            ReferenceState::VolumeAnchored(anchor) => {
                let target = match self.geometry.get(anchor) {
                    Some(AnchorGeometry::Volume { center }) => *center,
                    _ => {
                        return AlignmentPlan::unmoved(Placement::Unaligned(
                            AlignmentFailure::NoGeometry,
                        ));
                    }
                };
                match model.bounding_sphere() {
                    Some(sphere) => self.center_onto(sphere.center, target),
                    None => AlignmentPlan::unmoved(Placement::Unaligned(AlignmentFailure::NoGeometry)),
                }
            }
        }
    }

    pub fn plan_volume(&self, grid: &GridGeometry) -> AlignmentPlan {
        match &self.state {
            ReferenceState::Empty => AlignmentPlan::unmoved(Placement::Anchor),
            ReferenceState::StructureAnchored(anchor) => match self.geometry.get(anchor) {
                Some(AnchorGeometry::Structure {
                    center: Some(center),
                    ..
                }) => self.center_onto(grid.center(), *center),
                _ => AlignmentPlan::unmoved(Placement::Unaligned(AlignmentFailure::NoGeometry)),
            },
            ReferenceState::VolumeAnchored(_) => AlignmentPlan::unmoved(Placement::PassThrough),
        }
    }

    fn superpose_onto(
        &self,
        target_trace: &BTreeMap<ResidueKey, Point3<f64>>,
        model: &StructureModel,
    ) -> AlignmentPlan {
        let (mobile, target): (Vec<_>, Vec<_>) = model
            .trace_atoms()
            .into_iter()
            .filter_map(|(key, point)| target_trace.get(&key).map(|t| (point, *t)))
            .unzip();

        if mobile.len() < self.min_pairs {
            return AlignmentPlan::unmoved(Placement::Unaligned(AlignmentFailure::TooFewPairs {
                found: mobile.len(),
                required: self.min_pairs,
            }));
        }
        let Some(fit) = geometry::superpose(&mobile, &target) else {
            return AlignmentPlan::unmoved(Placement::Unaligned(AlignmentFailure::Degenerate));
        };
        if !fit.rmsd.is_finite() || fit.transform.iter().any(|v| !v.is_finite()) {
            return AlignmentPlan::unmoved(Placement::Unaligned(AlignmentFailure::InvalidRmsd(
                fit.rmsd,
            )));
        }
        AlignmentPlan {
            transform: Some(fit.transform),
            placement: Placement::Superposed {
                rmsd: fit.rmsd,
                pairs: fit.pairs,
            },
        }
    }

    fn center_onto(&self, from: Point3<f64>, to: Point3<f64>) -> AlignmentPlan {
        let offset = to - from;
        let distance = offset.norm();
        if distance < self.translation_epsilon {
            return AlignmentPlan::unmoved(Placement::Centered {
                distance,
                moved: false,
            });
        }
        AlignmentPlan {
            transform: Some(translation_matrix(&offset)),
            placement: Placement::Centered {
                distance,
                moved: true,
            },
        }
    }

    /// Records a placed structure; `model` is in file coordinates.
    pub fn commit_structure(&mut self, id: &ItemId, model: &StructureModel, plan: &AlignmentPlan) {
        let transform = plan.recorded_transform();
        let trace = model
            .trace_atoms()
            .into_iter()
            .map(|(key, point)| (key, transform.transform_point(&point)))
            .collect();
        let placed: Vec<Point3<f64>> = model
            .atoms()
            .iter()
            .map(|atom| transform.transform_point(&atom.position))
            .collect();
        let center = bounding_sphere(&placed).map(|sphere| sphere.center);

        self.geometry
            .insert(id.clone(), AnchorGeometry::Structure { trace, center });
        self.transforms.insert(id.clone(), transform);
        if plan.becomes_anchor() {
            self.state = ReferenceState::StructureAnchored(id.clone());
        }
    }

    /// Records a placed volume; `grid` is the geometry read from the file.
    pub fn commit_volume(&mut self, id: &ItemId, grid: &GridGeometry, plan: &AlignmentPlan) {
        let center = plan.recorded_transform().transform_point(&grid.center());
        self.geometry
            .insert(id.clone(), AnchorGeometry::Volume { center });
        if plan.becomes_anchor() {
            self.state = ReferenceState::VolumeAnchored(id.clone());
        }
    }

    /// Drops everything recorded for `id`. Removing the anchor empties the state.
    pub fn forget(&mut self, id: &ItemId) -> Forgotten {
        self.geometry.remove(id);
        self.transforms.remove(id);
        match &self.state {
            ReferenceState::StructureAnchored(anchor) if anchor == id => {
                self.state = ReferenceState::Empty;
                Forgotten::StructureReference
            }
            ReferenceState::VolumeAnchored(anchor) if anchor == id => {
                self.state = ReferenceState::Empty;
                Forgotten::VolumeAnchor
            }
            _ => Forgotten::Other,
        }
    }

    /// Makes a placed structure the anchor. Volumes are never promoted.
    pub fn promote(&mut self, id: &ItemId) -> bool {
        match self.geometry.get(id) {
            Some(AnchorGeometry::Structure { .. }) => {
                self.state = ReferenceState::StructureAnchored(id.clone());
                true
            }
            _ => false,
        }
    }

    pub fn reset(&mut self) {
        self.state = ReferenceState::Empty;
        self.geometry.clear();
        self.transforms.clear();
    }
}
