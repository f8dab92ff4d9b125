use super::alignment::{AlignmentPlan, Forgotten, Placement, ReferenceEngine, ReferenceState};
use super::colors::ColorAssigner;
use super::config::{ViewerConfig, expand_template};
use super::error::EngineError;
use super::notify::{ChangeBus, Subscription};
use super::registry::ItemRegistry;
use super::source::SourceProvider;
use super::threshold::{self, absolute_to_relative, relative_to_absolute, resolve_iso_value};
use crate::core::io::FormatError;
use crate::core::io::ccp4::Ccp4Map;
use crate::core::io::formats::StructureFormat;
use crate::core::io::traits::FormatReader;
use crate::core::models::color::Color;
use crate::core::models::ids::{ItemId, NodeId};
use crate::core::models::item::{Item, MapItem, StructureItem};
use crate::core::models::structure::StructureModel;
use crate::core::models::volume::VolumeData;
use crate::core::scene::{SceneBackend, SceneError, SceneGraph};
use nalgebra::Matrix4;
use std::cell::RefCell;
use tracing::{debug, info, instrument, warn};

/// Where a structure comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum StructureRequest {
    /// A PDB entry, fetched through the configured structure source templates.
    Pdb { pdb_id: String },
    Url { url: String, format: StructureFormat },
}

/// Where a density map comes from. `iso_value` is in sigma units; the configured
/// default applies when it is absent.
#[derive(Debug, Clone, PartialEq)]
pub enum MapRequest {
    Emdb {
        emdb_id: String,
        iso_value: Option<f64>,
    },
    Url {
        url: String,
        iso_value: Option<f64>,
    },
}

struct SourceCandidate<K> {
    url: String,
    kind: K,
}

struct ViewerState<B> {
    registry: ItemRegistry,
    reference: ReferenceEngine,
    colors: ColorAssigner,
    scene: B,
}

/// The explicit viewer context: owns the registry, the reference engine, the color
/// cursor and the scene, and orchestrates every operation on them.
///
/// All methods take `&self`. Loads suspend only while fetching and parsing; the
/// state is touched in one synchronous commit afterwards, so whichever load
/// commits first becomes the reference.
pub struct Viewer<P: SourceProvider, B: SceneBackend = SceneGraph> {
    config: ViewerConfig,
    sources: P,
    state: RefCell<ViewerState<B>>,
    bus: ChangeBus,
}

impl<P: SourceProvider> Viewer<P, SceneGraph> {
    /// A viewer drawing into a fresh headless [`SceneGraph`].
    pub fn headless(config: ViewerConfig, sources: P) -> Self {
        Self::new(config, sources, SceneGraph::new())
    }
}

impl<P: SourceProvider, B: SceneBackend> Viewer<P, B> {
    pub fn new(config: ViewerConfig, sources: P, scene: B) -> Self {
        let state = ViewerState {
            registry: ItemRegistry::new(),
            reference: ReferenceEngine::new(
                config.min_superposition_pairs,
                config.translation_epsilon,
            ),
            colors: ColorAssigner::new(config.palette.clone()),
            scene,
        };
        Self {
            config,
            sources,
            state: RefCell::new(state),
            bus: ChangeBus::new(),
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    #[instrument(skip(self), fields(item = tracing::field::Empty))]
    pub async fn load_structure(&self, request: StructureRequest) -> Result<Item, EngineError> {
        let (id, candidates) = self.structure_candidates(&request)?;
        tracing::Span::current().record("item", id.as_str());
        self.ensure_absent(&id)?;

        let (model, format) = self
            .fetch_first(&id, &candidates, |format, bytes| format.read_bytes(bytes))
            .await?;
        let item = self.commit_structure(id, &model, format)?;
        self.notify();
        Ok(item)
    }

    #[instrument(skip(self), fields(item = tracing::field::Empty))]
    pub async fn load_map(&self, request: MapRequest) -> Result<Item, EngineError> {
        let (id, candidates, requested) = self.map_candidates(&request)?;
        tracing::Span::current().record("item", id.as_str());
        self.ensure_absent(&id)?;

        let (volume, ()) = self
            .fetch_first(&id, &candidates, |(), bytes| Ccp4Map::read_bytes(bytes))
            .await?;
        let item = self.commit_map(id, &volume, requested)?;
        self.notify();
        Ok(item)
    }

    /// Shows or hides every representation of an item. Unknown ids are ignored.
    pub fn set_visibility(&self, id: &ItemId, visible: bool) -> Result<bool, EngineError> {
        let changed = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let Some(item) = state.registry.get_mut(id) else {
                debug!(item = %id, "Visibility change for unknown item ignored");
                return Ok(false);
            };
            if item.visible() == visible {
                false
            } else {
                let previous = !visible;
                set_all(
                    &mut state.scene,
                    &representation_nodes(item),
                    visible,
                    previous,
                    B::set_visibility,
                )?;
                match item {
                    Item::Structure(s) => s.visible = visible,
                    Item::Map(m) => m.visible = visible,
                }
                true
            }
        };
        if changed {
            self.notify();
        }
        Ok(changed)
    }

    /// Recolors every representation of an item. Unknown ids are ignored.
    pub fn set_color(&self, id: &ItemId, color: Color) -> Result<bool, EngineError> {
        let changed = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let Some(item) = state.registry.get_mut(id) else {
                debug!(item = %id, "Color change for unknown item ignored");
                return Ok(false);
            };
            if item.color() == color {
                false
            } else {
                let previous = item.color();
                set_all(
                    &mut state.scene,
                    &representation_nodes(item),
                    color,
                    previous,
                    B::set_color,
                )?;
                match item {
                    Item::Structure(s) => s.color = color,
                    Item::Map(m) => m.color = color,
                }
                true
            }
        };
        if changed {
            self.notify();
        }
        Ok(changed)
    }

    /// Sets a map's threshold in sigma units. Structures and unknown ids are
    /// ignored.
    pub fn set_iso_value(&self, id: &ItemId, iso_value: f64) -> Result<bool, EngineError> {
        let changed = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let Some(Item::Map(map)) = state.registry.get_mut(id) else {
                debug!(item = %id, "Threshold change for a non-map item ignored");
                return Ok(false);
            };
            let iso = resolve_iso_value(iso_value, map.is_inverted)?;
            if iso.stored == map.iso_value {
                false
            } else {
                let level = relative_to_absolute(iso.applied, &map.stats);
                state.scene.set_iso_level(map.surface_node, level)?;
                map.iso_value = iso.stored;
                debug!(item = %id, relative = iso.stored, absolute = level, "Threshold updated");
                true
            }
        };
        if changed {
            self.notify();
        }
        Ok(changed)
    }

    /// Sets a map's threshold from an absolute density value.
    pub fn set_iso_value_absolute(&self, id: &ItemId, absolute: f64) -> Result<bool, EngineError> {
        let stats = match self.state.borrow().registry.get(id) {
            Some(Item::Map(map)) => map.stats,
            _ => return Ok(false),
        };
        let relative = absolute_to_relative(absolute, &stats)?;
        self.set_iso_value(id, relative)
    }

    /// Removes an item and its scene nodes. Deleting the reference structure promotes
    /// the earliest remaining structure. Unknown ids are ignored.
    pub fn delete(&self, id: &ItemId) -> Result<bool, EngineError> {
        {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let Some(node) = state.registry.get(id).map(root_node) else {
                debug!(item = %id, "Delete of unknown item ignored");
                return Ok(false);
            };
            state.scene.remove(node)?;
            state.registry.remove(id);

            match state.reference.forget(id) {
                Forgotten::StructureReference => match state.registry.first_structure_id() {
                    Some(next) => {
                        state.reference.promote(&next);
                        state.registry.mark_reference(&next);
                        info!(removed = %id, reference = %next, "Reference structure replaced");
                    }
                    None => info!(removed = %id, "Reference structure removed; no structure left to promote"),
                },
                Forgotten::VolumeAnchor => info!(removed = %id, "Anchor volume removed"),
                Forgotten::Other => info!(removed = %id, "Item removed"),
            }
        }
        self.notify();
        Ok(true)
    }

    /// Removes everything and resets the reference state and the color cursor.
    pub fn clear(&self) {
        {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            state.scene.clear();
            state.registry.clear();
            state.reference.reset();
            state.colors.reset();
        }
        info!("Viewer cleared");
        self.notify();
    }

    /// All items in load order.
    pub fn items(&self) -> Vec<Item> {
        self.state.borrow().registry.snapshot()
    }

    pub fn item(&self, id: &ItemId) -> Option<Item> {
        self.state.borrow().registry.get(id).cloned()
    }

    pub fn reference_state(&self) -> ReferenceState {
        self.state.borrow().reference.state().clone()
    }

    /// The transform applied to a structure at load time.
    pub fn transform(&self, id: &ItemId) -> Option<Matrix4<f64>> {
        self.state.borrow().reference.transform(id).copied()
    }

    pub fn color_cursor(&self) -> u64 {
        self.state.borrow().colors.cursor()
    }

    /// Runs `f` against the scene. `f` must not call back into the viewer.
    pub fn with_scene<R>(&self, f: impl FnOnce(&B) -> R) -> R {
        f(&self.state.borrow().scene)
    }

    pub fn subscribe(&self, callback: impl Fn(&[Item]) + 'static) -> Subscription {
        self.bus.subscribe(callback)
    }

    fn notify(&self) {
        let snapshot = self.items();
        self.bus.publish(&snapshot);
    }

    fn ensure_absent(&self, id: &ItemId) -> Result<(), EngineError> {
        if self.state.borrow().registry.contains(id) {
            return Err(EngineError::DuplicateItem(id.clone()));
        }
        Ok(())
    }

    fn structure_candidates(
        &self,
        request: &StructureRequest,
    ) -> Result<(ItemId, Vec<SourceCandidate<StructureFormat>>), EngineError> {
        match request {
            StructureRequest::Pdb { pdb_id } => {
                let code = normalize_pdb_id(pdb_id)?;
                let candidates = self
                    .config
                    .structure_sources
                    .iter()
                    .map(|source| SourceCandidate {
                        url: expand_template(&source.url, &code),
                        kind: source.format,
                    })
                    .collect();
                Ok((ItemId::new(code), candidates))
            }
            StructureRequest::Url { url, format } => Ok((
                id_from_url(url)?,
                vec![SourceCandidate {
                    url: url.clone(),
                    kind: *format,
                }],
            )),
        }
    }

    fn map_candidates(
        &self,
        request: &MapRequest,
    ) -> Result<(ItemId, Vec<SourceCandidate<()>>, f64), EngineError> {
        match request {
            MapRequest::Emdb { emdb_id, iso_value } => {
                let number = normalize_emdb_id(emdb_id)?;
                let candidates = self
                    .config
                    .map_sources
                    .iter()
                    .map(|template| SourceCandidate {
                        url: expand_template(template, &number),
                        kind: (),
                    })
                    .collect();
                Ok((
                    ItemId::new(format!("EMD-{}", number)),
                    candidates,
                    iso_value.unwrap_or(self.config.default_iso_value),
                ))
            }
            MapRequest::Url { url, iso_value } => Ok((
                id_from_url(url)?,
                vec![SourceCandidate {
                    url: url.clone(),
                    kind: (),
                }],
                iso_value.unwrap_or(self.config.default_iso_value),
            )),
        }
    }

    /// Tries each candidate in order; the first one that fetches and parses wins.
    async fn fetch_first<K: Copy, T>(
        &self,
        id: &ItemId,
        candidates: &[SourceCandidate<K>],
        parse: impl Fn(K, &[u8]) -> Result<T, FormatError>,
    ) -> Result<(T, K), EngineError> {
        let mut last = None;
        for (attempt, candidate) in candidates.iter().enumerate() {
            debug!(item = %id, url = %candidate.url, attempt = attempt + 1, "Trying source");
            let outcome = match self.sources.fetch(&candidate.url).await {
                Ok(bytes) => parse(candidate.kind, &bytes).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match outcome {
                Ok(value) => return Ok((value, candidate.kind)),
                Err(reason) => {
                    debug!(item = %id, url = %candidate.url, %reason, "Source failed");
                    last = Some(format!("{}: {}", candidate.url, reason));
                }
            }
        }
        Err(EngineError::SourcesExhausted {
            item: id.clone(),
            attempts: candidates.len(),
            last: last.unwrap_or_else(|| "no candidate sources configured".to_string()),
        })
    }

    fn commit_structure(
        &self,
        id: ItemId,
        model: &StructureModel,
        format: StructureFormat,
    ) -> Result<Item, EngineError> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        if state.registry.contains(&id) {
            return Err(EngineError::DuplicateItem(id));
        }

        let plan = state.reference.plan_structure(model);
        let color = state.colors.peek();
        let handles = state.scene.add_structure(id.as_str(), model, color)?;
        place_node(&mut state.scene, handles.model, &plan)?;
        state.colors.advance();
        state.reference.commit_structure(&id, model, &plan);
        log_placement(&id, &plan.placement);

        let item = StructureItem {
            id,
            model_node: handles.model,
            representations: handles.representations,
            visible: true,
            color,
            format,
            is_reference: plan.becomes_anchor(),
        };
        state.registry.upsert(item.clone().into());
        Ok(Item::Structure(item))
    }

    fn commit_map(
        &self,
        id: ItemId,
        volume: &VolumeData,
        requested: f64,
    ) -> Result<Item, EngineError> {
        let stats = volume
            .stats()
            .ok_or_else(|| EngineError::EmptyVolume(id.clone()))?;
        let is_inverted = threshold::is_inverted(&stats);
        let iso = resolve_iso_value(requested, is_inverted)?;
        let level = relative_to_absolute(iso.applied, &stats);

        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        if state.registry.contains(&id) {
            return Err(EngineError::DuplicateItem(id));
        }

        let plan = state.reference.plan_volume(volume.geometry());
        let color = state.colors.peek();
        let handles = state.scene.add_volume(id.as_str(), volume, color, level)?;
        place_node(&mut state.scene, handles.data, &plan)?;
        state.colors.advance();
        state.reference.commit_volume(&id, volume.geometry(), &plan);
        log_placement(&id, &plan.placement);
        if is_inverted {
            info!(item = %id, min = stats.min, max = stats.max, "Map uses inverted density; contouring at negative threshold");
        }

        let item = MapItem {
            id,
            data_node: handles.data,
            surface_node: handles.surface,
            visible: true,
            color,
            iso_value: iso.stored,
            stats,
            is_inverted,
        };
        state.registry.upsert(item.clone().into());
        Ok(Item::Map(item))
    }
}

/// Inserts the plan's transform above `node`; on failure the freshly added nodes
/// are removed again so nothing half-built stays in the scene.
fn place_node<B: SceneBackend>(
    scene: &mut B,
    node: NodeId,
    plan: &AlignmentPlan,
) -> Result<(), EngineError> {
    let Some(transform) = &plan.transform else {
        return Ok(());
    };
    if let Err(e) = scene.apply_transform(node, transform) {
        if let Err(cleanup) = scene.remove(node) {
            warn!(error = %cleanup, "Failed to remove nodes of an aborted load");
        }
        return Err(e.into());
    }
    Ok(())
}

/// Applies `value` to every node. When one node fails, the nodes already changed are
/// set back to `previous` so the scene keeps matching the registry.
fn set_all<B: SceneBackend, V: Copy>(
    scene: &mut B,
    nodes: &[NodeId],
    value: V,
    previous: V,
    set: impl Fn(&mut B, NodeId, V) -> Result<(), SceneError>,
) -> Result<(), EngineError> {
    for (done, &node) in nodes.iter().enumerate() {
        if let Err(e) = set(scene, node, value) {
            for &applied in &nodes[..done] {
                if let Err(undo) = set(scene, applied, previous) {
                    warn!(error = %undo, "Failed to restore a representation");
                }
            }
            return Err(e.into());
        }
    }
    Ok(())
}

fn log_placement(id: &ItemId, placement: &Placement) {
    match placement {
        Placement::Anchor => info!(item = %id, "Item is the new spatial reference"),
        Placement::Superposed { rmsd, pairs } => {
            info!(item = %id, rmsd = *rmsd, pairs = *pairs, "Superposed onto reference")
        }
        Placement::Centered { distance, moved } => {
            info!(item = %id, distance = *distance, moved = *moved, "Centered on reference")
        }
        Placement::Unaligned(reason) => {
            warn!(item = %id, %reason, "Alignment failed; item loaded unaligned")
        }
        Placement::PassThrough => {
            debug!(item = %id, "No relative placement between volumes")
        }
    }
}

fn representation_nodes(item: &Item) -> Vec<NodeId> {
    match item {
        Item::Structure(s) => s.representations.clone(),
        Item::Map(m) => vec![m.surface_node],
    }
}

fn root_node(item: &Item) -> NodeId {
    match item {
        Item::Structure(s) => s.model_node,
        Item::Map(m) => m.data_node,
    }
}

fn normalize_pdb_id(raw: &str) -> Result<String, EngineError> {
    let code = raw.trim().to_ascii_uppercase();
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(EngineError::InvalidRequest(format!(
            "'{}' is not a PDB identifier",
            raw
        )));
    }
    Ok(code)
}

/// Accepts `6057`, `EMD-6057` or `emd_6057` and returns the numeric part.
fn normalize_emdb_id(raw: &str) -> Result<String, EngineError> {
    let trimmed = raw.trim();
    let upper = trimmed.to_ascii_uppercase();
    let number = upper
        .strip_prefix("EMD-")
        .or_else(|| upper.strip_prefix("EMD_"))
        .unwrap_or(&upper);
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return Err(EngineError::InvalidRequest(format!(
            "'{}' is not an EMDB identifier",
            raw
        )));
    }
    Ok(number.to_string())
}

/// The last path segment of a URL or file path, ignoring query and fragment.
fn id_from_url(url: &str) -> Result<ItemId, EngineError> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit(['/', '\\'])
        .find(|segment| !segment.is_empty())
        .filter(|segment| !segment.ends_with(':'))
        .map(ItemId::from)
        .ok_or_else(|| EngineError::InvalidRequest(format!("cannot derive an item id from '{}'", url)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::models::color::DEFAULT_PALETTE;
    use crate::core::models::volume::{GridGeometry, VolumeStats};
    use crate::core::scene::{RepresentationStyle, StructureHandles, VolumeHandles};
    use crate::core::utils::geometry::is_identity;
    use crate::engine::config::{EBI_EMDB_TEMPLATE, RCSB_PDB_TEMPLATE};
    use crate::engine::source::{MemorySources, SourceError};
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use nalgebra::{Point3, Rotation3, Unit, Vector3};
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::io::Write;
    use std::rc::Rc;
    use tokio::sync::Notify;

    pub(crate) const CA_TRACE: [[f64; 3]; 6] = [
        [0.0, 0.0, 0.0],
        [3.8, 0.0, 0.0],
        [5.1, 3.5, 0.2],
        [3.0, 6.1, 1.9],
        [-0.4, 5.2, 3.3],
        [-1.7, 1.9, 4.8],
    ];

    pub(crate) fn moved_trace() -> Vec<[f64; 3]> {
        let rotation =
            Rotation3::from_axis_angle(&Unit::new_normalize(Vector3::new(0.3, 1.0, -0.2)), 1.1);
        let shift = Vector3::new(20.0, -5.0, 3.0);
        CA_TRACE
            .iter()
            .map(|p| {
                let q = rotation * Point3::new(p[0], p[1], p[2]) + shift;
                [q.x, q.y, q.z]
            })
            .collect()
    }

    pub(crate) fn pdb_text(chain: char, points: &[[f64; 3]]) -> String {
        points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                format!(
                    "{:<6}{:>5} {:<4}{}{:>3} {}{:>4}    {:>8.3}{:>8.3}{:>8.3}{:>6.2}{:>6.2}          {:>2}",
                    "ATOM", i + 1, "CA", ' ', "ALA", chain, i + 1, p[0], p[1], p[2], 1.0, 0.0, "C"
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 30 voxels: one 10, five -2 and zeros. Stats are {min -2, max 10, mean 0, sigma 2}.
    pub(crate) fn scenario_map_values() -> Vec<f32> {
        let mut values = vec![0.0f32; 30];
        values[0] = 10.0;
        for v in &mut values[1..6] {
            *v = -2.0;
        }
        values
    }

    pub(crate) fn map_bytes(values: Vec<f32>, origin: Point3<f64>) -> Vec<u8> {
        let volume = VolumeData::new(GridGeometry::axis_aligned([2, 3, 5], 1.0, origin), values)
            .unwrap();
        Ccp4Map::to_bytes(&volume).unwrap()
    }

    pub(crate) fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    pub(crate) fn pdb_url(id: &str) -> String {
        expand_template(RCSB_PDB_TEMPLATE, id)
    }

    pub(crate) fn emdb_url(number: &str) -> String {
        expand_template(EBI_EMDB_TEMPLATE, number)
    }

    /// Sources for the 3J7Z / 6VXX / EMD-6057 walkthrough. Only the PDB-format
    /// mirror has the structures, so the mmCIF candidate fails first.
    pub(crate) fn scenario_sources() -> MemorySources {
        MemorySources::new()
            .with(pdb_url("3J7Z"), pdb_text('A', &CA_TRACE))
            .with(pdb_url("6VXX"), pdb_text('A', &moved_trace()))
            .with(
                emdb_url("6057"),
                gzip(&map_bytes(scenario_map_values(), Point3::new(40.0, 40.0, 40.0))),
            )
    }

    fn viewer(sources: MemorySources) -> Viewer<MemorySources> {
        Viewer::headless(ViewerConfig::default(), sources)
    }

    fn pdb(id: &str) -> StructureRequest {
        StructureRequest::Pdb {
            pdb_id: id.to_string(),
        }
    }

    fn emdb(id: &str, iso_value: Option<f64>) -> MapRequest {
        MapRequest::Emdb {
            emdb_id: id.to_string(),
            iso_value,
        }
    }

    fn reference_count(viewer: &Viewer<impl SourceProvider, impl SceneBackend>) -> usize {
        viewer.items().iter().filter(|item| item.is_reference()).count()
    }

    fn change_counter(viewer: &Viewer<impl SourceProvider, impl SceneBackend>) -> (Rc<Cell<usize>>, Subscription) {
        let count = Rc::new(Cell::new(0));
        let inner = count.clone();
        let subscription = viewer.subscribe(move |_| inner.set(inner.get() + 1));
        (count, subscription)
    }

    #[tokio::test]
    async fn reference_scenario_walkthrough() {
        let viewer = viewer(scenario_sources());
        let (changes, _subscription) = change_counter(&viewer);

        let first = viewer.load_structure(pdb("3j7z")).await.unwrap();
        assert_eq!(first.id().as_str(), "3J7Z");
        assert!(first.is_reference());
        assert_eq!(first.color(), DEFAULT_PALETTE[0]);
        assert_eq!(first.as_structure().unwrap().format, StructureFormat::Pdb);
        assert!(is_identity(&viewer.transform(first.id()).unwrap(), 0.0));
        assert_eq!(
            viewer.reference_state(),
            ReferenceState::StructureAnchored(ItemId::from("3J7Z"))
        );

        let second = viewer.load_structure(pdb("6VXX")).await.unwrap();
        assert!(!second.is_reference());
        assert_eq!(second.color(), DEFAULT_PALETTE[1]);
        assert!(!is_identity(&viewer.transform(second.id()).unwrap(), 1e-3));

        let map = viewer.load_map(emdb("EMD-6057", Some(1.5))).await.unwrap();
        let map_item = map.as_map().unwrap();
        assert_eq!(map_item.id.as_str(), "EMD-6057");
        assert_eq!(map_item.color, DEFAULT_PALETTE[2]);
        assert_eq!(map_item.iso_value, 1.5);
        assert_eq!(
            map_item.stats,
            VolumeStats {
                min: -2.0,
                max: 10.0,
                mean: 0.0,
                sigma: 2.0
            }
        );
        assert!(!map_item.is_inverted);
        let level = viewer.with_scene(|scene| scene.representation(map_item.surface_node).unwrap().iso_level);
        assert_eq!(level, Some(3.0));
        assert_eq!(reference_count(&viewer), 1);

        assert!(viewer.delete(&ItemId::from("3J7Z")).unwrap());
        assert!(viewer.item(&ItemId::from("6VXX")).unwrap().is_reference());
        assert_eq!(reference_count(&viewer), 1);
        assert!(viewer.transform(&ItemId::from("3J7Z")).is_none());
        assert_eq!(
            viewer.reference_state(),
            ReferenceState::StructureAnchored(ItemId::from("6VXX"))
        );

        viewer.clear();
        assert!(viewer.items().is_empty());
        assert_eq!(viewer.color_cursor(), 0);
        assert_eq!(viewer.reference_state(), ReferenceState::Empty);
        assert!(viewer.with_scene(|scene| scene.is_empty()));

        let again = viewer.load_structure(pdb("6VXX")).await.unwrap();
        assert_eq!(again.color(), DEFAULT_PALETTE[0]);
        assert!(again.is_reference());

        // three loads, one delete, one clear, one load
        assert_eq!(changes.get(), 6);
    }

    #[tokio::test]
    async fn colors_follow_load_order_across_kinds() {
        let sources = scenario_sources().with(
            "file:///maps/second.map",
            map_bytes(scenario_map_values(), Point3::origin()),
        );
        let viewer = viewer(sources);

        let map = viewer.load_map(emdb("6057", None)).await.unwrap();
        let structure = viewer.load_structure(pdb("3J7Z")).await.unwrap();
        let other_map = viewer
            .load_map(MapRequest::Url {
                url: "file:///maps/second.map".to_string(),
                iso_value: None,
            })
            .await
            .unwrap();

        assert_eq!(map.color(), DEFAULT_PALETTE[0]);
        assert_eq!(structure.color(), DEFAULT_PALETTE[1]);
        assert_eq!(other_map.color(), DEFAULT_PALETTE[2]);
        assert_eq!(other_map.id().as_str(), "second.map");
        assert_eq!(other_map.as_map().unwrap().iso_value, 1.5);
        assert_eq!(viewer.color_cursor(), 3);
    }

    #[tokio::test]
    async fn volume_anchor_centers_structures_and_is_never_promoted() {
        let viewer = viewer(scenario_sources());
        viewer.load_map(emdb("6057", None)).await.unwrap();
        assert_eq!(
            viewer.reference_state(),
            ReferenceState::VolumeAnchored(ItemId::from("EMD-6057"))
        );

        let structure = viewer.load_structure(pdb("3J7Z")).await.unwrap();
        assert!(!structure.is_reference());
        let transform = viewer.transform(structure.id()).unwrap();
        assert_eq!(transform.fixed_view::<3, 3>(0, 0).into_owned(), nalgebra::Matrix3::identity());
        assert!(transform[(0, 3)] > 30.0);

        assert!(viewer.delete(&ItemId::from("EMD-6057")).unwrap());
        assert_eq!(viewer.reference_state(), ReferenceState::Empty);
        assert_eq!(reference_count(&viewer), 0);

        let next = viewer.load_structure(pdb("6VXX")).await.unwrap();
        assert!(next.is_reference());
        assert_eq!(reference_count(&viewer), 1);
    }

    #[tokio::test]
    async fn inverted_maps_contour_below_the_mean() {
        let mut values = vec![0.0f32; 30];
        values[0] = -10.0;
        values[1] = 2.0;
        let stats = VolumeStats::from_values(&values).unwrap();
        let sources = MemorySources::new().with("https://maps.example/inv.map", map_bytes(values, Point3::origin()));
        let viewer = viewer(sources);

        let item = viewer
            .load_map(MapRequest::Url {
                url: "https://maps.example/inv.map".to_string(),
                iso_value: Some(-2.0),
            })
            .await
            .unwrap();
        let map = item.as_map().unwrap();
        assert!(map.is_inverted);
        assert_eq!(map.iso_value, 2.0);
        let level = viewer.with_scene(|scene| scene.representation(map.surface_node).unwrap().iso_level);
        assert_eq!(level, Some(relative_to_absolute(-2.0, &stats)));

        assert!(viewer.set_iso_value(&map.id, 1.0).unwrap());
        let level = viewer.with_scene(|scene| scene.representation(map.surface_node).unwrap().iso_level);
        assert_eq!(level, Some(relative_to_absolute(-1.0, &stats)));
    }

    #[tokio::test]
    async fn mutations_update_scene_and_notify_only_on_change() {
        let viewer = viewer(scenario_sources());
        let structure = viewer.load_structure(pdb("3J7Z")).await.unwrap();
        let map = viewer.load_map(emdb("6057", Some(1.5))).await.unwrap();
        let (changes, _subscription) = change_counter(&viewer);

        assert!(viewer.set_visibility(structure.id(), false).unwrap());
        assert!(!viewer.set_visibility(structure.id(), false).unwrap());
        let reps = structure.as_structure().unwrap().representations.clone();
        assert!(viewer.with_scene(|scene| reps.iter().all(|r| !scene.representation(*r).unwrap().visible)));
        assert!(!viewer.item(structure.id()).unwrap().visible());

        let red = Color::from_rgb(255, 0, 0);
        assert!(viewer.set_color(map.id(), red).unwrap());
        let surface = map.as_map().unwrap().surface_node;
        assert_eq!(viewer.with_scene(|scene| scene.representation(surface).unwrap().color), red);

        assert!(viewer.set_iso_value(map.id(), 2.5).unwrap());
        assert_eq!(viewer.with_scene(|scene| scene.representation(surface).unwrap().iso_level), Some(5.0));
        assert!(!viewer.set_iso_value(map.id(), 2.5).unwrap());

        assert!(viewer.set_iso_value_absolute(map.id(), 4.0).unwrap());
        assert_eq!(viewer.item(map.id()).unwrap().as_map().unwrap().iso_value, 2.0);

        assert_eq!(changes.get(), 4);
    }

    #[tokio::test]
    async fn operations_on_missing_or_wrong_items_are_silent() {
        let viewer = viewer(scenario_sources());
        let structure = viewer.load_structure(pdb("3J7Z")).await.unwrap();
        let (changes, _subscription) = change_counter(&viewer);
        let missing = ItemId::from("NOPE");

        assert!(!viewer.set_visibility(&missing, false).unwrap());
        assert!(!viewer.set_color(&missing, DEFAULT_PALETTE[3]).unwrap());
        assert!(!viewer.set_iso_value(&missing, 1.0).unwrap());
        assert!(!viewer.set_iso_value(structure.id(), 1.0).unwrap());
        assert!(!viewer.set_iso_value_absolute(structure.id(), 1.0).unwrap());
        assert!(!viewer.delete(&missing).unwrap());
        assert_eq!(changes.get(), 0);

        assert!(viewer.delete(structure.id()).unwrap());
        assert_eq!(viewer.reference_state(), ReferenceState::Empty);
        assert_eq!(changes.get(), 1);
    }

    #[tokio::test]
    async fn degenerate_maps_reject_absolute_thresholds() {
        let sources = MemorySources::new().with("mem://flat.map", map_bytes(vec![1.0; 30], Point3::origin()));
        let viewer = viewer(sources);
        let map = viewer
            .load_map(MapRequest::Url {
                url: "mem://flat.map".to_string(),
                iso_value: None,
            })
            .await
            .unwrap();

        assert!(matches!(
            viewer.set_iso_value_absolute(map.id(), 2.0),
            Err(EngineError::Threshold { .. })
        ));
        assert!(matches!(
            viewer.set_iso_value(map.id(), f64::NAN),
            Err(EngineError::Threshold { .. })
        ));
    }

    #[tokio::test]
    async fn exhausted_sources_report_the_last_failure() {
        let sources = MemorySources::new().with(pdb_url("1BAD"), "not a structure");
        let viewer = viewer(sources);

        let err = viewer.load_structure(pdb("1bad")).await.unwrap_err();
        match err {
            EngineError::SourcesExhausted { item, attempts, last } => {
                assert_eq!(item.as_str(), "1BAD");
                assert_eq!(attempts, 2);
                assert!(last.starts_with(&pdb_url("1BAD")));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(viewer.items().is_empty());
        assert_eq!(viewer.color_cursor(), 0);
    }

    #[tokio::test]
    async fn malformed_requests_are_rejected_before_fetching() {
        let viewer = viewer(MemorySources::new());
        assert!(matches!(
            viewer.load_structure(pdb("../x")).await,
            Err(EngineError::InvalidRequest(_))
        ));
        assert!(matches!(
            viewer.load_map(emdb("EMD-abc", None)).await,
            Err(EngineError::InvalidRequest(_))
        ));
        assert!(matches!(
            viewer
                .load_structure(StructureRequest::Url {
                    url: "https://".to_string(),
                    format: StructureFormat::Pdb
                })
                .await,
            Err(EngineError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn unalignable_structure_still_loads() {
        let sources = scenario_sources().with(pdb_url("9ZZZ"), pdb_text('Q', &moved_trace()));
        let viewer = viewer(sources);
        viewer.load_structure(pdb("3J7Z")).await.unwrap();

        let loose = viewer.load_structure(pdb("9ZZZ")).await.unwrap();
        assert!(!loose.is_reference());
        assert!(is_identity(&viewer.transform(loose.id()).unwrap(), 0.0));
        assert_eq!(viewer.items().len(), 2);
    }

    #[tokio::test]
    async fn structures_get_representations_in_scene() {
        let viewer = viewer(scenario_sources());
        let item = viewer.load_structure(pdb("3J7Z")).await.unwrap();
        let structure = item.as_structure().unwrap();

        let styles: Vec<_> = viewer.with_scene(|scene| {
            structure
                .representations
                .iter()
                .map(|r| scene.representation(*r).unwrap().style)
                .collect()
        });
        assert_eq!(styles, vec![RepresentationStyle::Cartoon]);
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let viewer = viewer(scenario_sources());
        viewer.load_structure(pdb("3J7Z")).await.unwrap();

        assert!(matches!(
            viewer.load_structure(pdb("3j7z")).await,
            Err(EngineError::DuplicateItem(id)) if id.as_str() == "3J7Z"
        ));
        assert_eq!(viewer.color_cursor(), 1);
        assert_eq!(viewer.items().len(), 1);
    }

    /// Holds back fetches of selected URLs until released.
    struct GatedSources {
        inner: MemorySources,
        gates: HashMap<String, Notify>,
    }

    impl GatedSources {
        fn new(inner: MemorySources, gated: &[String]) -> Self {
            Self {
                inner,
                gates: gated.iter().map(|url| (url.clone(), Notify::new())).collect(),
            }
        }

        fn release(&self, url: &str) {
            if let Some(gate) = self.gates.get(url) {
                gate.notify_one();
            }
        }
    }

    impl SourceProvider for GatedSources {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, SourceError> {
            if let Some(gate) = self.gates.get(url) {
                gate.notified().await;
            }
            self.inner.fetch(url).await
        }
    }

    #[tokio::test]
    async fn first_load_to_commit_becomes_reference() {
        let sources = GatedSources::new(scenario_sources(), &[pdb_url("3J7Z")]);
        let viewer = Viewer::headless(ViewerConfig::default(), sources);

        let (slow, fast) = tokio::join!(viewer.load_structure(pdb("3J7Z")), async {
            let loaded = viewer.load_structure(pdb("6VXX")).await;
            viewer.sources.release(&pdb_url("3J7Z"));
            loaded
        });

        let (slow, fast) = (slow.unwrap(), fast.unwrap());
        assert!(fast.is_reference());
        assert_eq!(fast.color(), DEFAULT_PALETTE[0]);
        assert!(!slow.is_reference());
        assert_eq!(slow.color(), DEFAULT_PALETTE[1]);
        assert!(!is_identity(&viewer.transform(slow.id()).unwrap(), 1e-3));
        let order: Vec<String> = viewer.items().iter().map(|i| i.id().to_string()).collect();
        assert_eq!(order, vec!["6VXX", "3J7Z"]);
    }

    #[tokio::test]
    async fn late_duplicate_is_rejected_at_commit_without_side_effects() {
        let sources = GatedSources::new(
            scenario_sources().with("https://mirror.example/3J7Z", pdb_text('A', &CA_TRACE)),
            &[pdb_url("3J7Z")],
        );
        let viewer = Viewer::headless(ViewerConfig::default(), sources);

        let (late, early) = tokio::join!(viewer.load_structure(pdb("3J7Z")), async {
            let loaded = viewer
                .load_structure(StructureRequest::Url {
                    url: "https://mirror.example/3J7Z".to_string(),
                    format: StructureFormat::Pdb,
                })
                .await;
            viewer.sources.release(&pdb_url("3J7Z"));
            loaded
        });

        assert!(early.is_ok());
        assert!(matches!(late, Err(EngineError::DuplicateItem(_))));
        assert_eq!(viewer.color_cursor(), 1);
        assert_eq!(viewer.items().len(), 1);
        // root, model, cartoon
        assert_eq!(viewer.with_scene(|scene| scene.len()), 3);
    }

    /// A scene that refuses to touch one chosen representation.
    #[derive(Default)]
    struct StubbornScene {
        inner: SceneGraph,
        refuse: Cell<Option<NodeId>>,
    }

    impl StubbornScene {
        fn check(&self, node: NodeId) -> Result<(), SceneError> {
            match self.refuse.get() {
                Some(refused) if refused == node => Err(SceneError::NodeNotFound(node)),
                _ => Ok(()),
            }
        }
    }

    impl SceneBackend for StubbornScene {
        fn add_structure(
            &mut self,
            label: &str,
            model: &StructureModel,
            color: Color,
        ) -> Result<StructureHandles, SceneError> {
            self.inner.add_structure(label, model, color)
        }

        fn add_volume(
            &mut self,
            label: &str,
            volume: &VolumeData,
            color: Color,
            iso_level: f64,
        ) -> Result<VolumeHandles, SceneError> {
            self.inner.add_volume(label, volume, color, iso_level)
        }

        fn apply_transform(
            &mut self,
            node: NodeId,
            transform: &Matrix4<f64>,
        ) -> Result<NodeId, SceneError> {
            self.inner.apply_transform(node, transform)
        }

        fn set_visibility(&mut self, node: NodeId, visible: bool) -> Result<(), SceneError> {
            self.check(node)?;
            self.inner.set_visibility(node, visible)
        }

        fn set_color(&mut self, node: NodeId, color: Color) -> Result<(), SceneError> {
            self.check(node)?;
            self.inner.set_color(node, color)
        }

        fn set_iso_level(&mut self, node: NodeId, level: f64) -> Result<(), SceneError> {
            self.inner.set_iso_level(node, level)
        }

        fn remove(&mut self, node: NodeId) -> Result<(), SceneError> {
            self.inner.remove(node)
        }

        fn clear(&mut self) {
            self.inner.clear()
        }
    }

    fn ligand_pdb() -> String {
        format!(
            "{}\n{:<6}{:>5} {:<4}{}{:>3} {}{:>4}    {:>8.3}{:>8.3}{:>8.3}{:>6.2}{:>6.2}          {:>2}",
            pdb_text('A', &CA_TRACE),
            "HETATM", 7, "ZN", ' ', "ZN", 'A', 101, 1.0, 1.0, 1.0, 1.0, 0.0, "ZN"
        )
    }

    #[tokio::test]
    async fn failed_scene_update_leaves_representations_consistent() {
        let sources = MemorySources::new().with(pdb_url("1HET"), ligand_pdb());
        let viewer = Viewer::new(ViewerConfig::default(), sources, StubbornScene::default());
        let item = viewer.load_structure(pdb("1HET")).await.unwrap();
        let reps = item.as_structure().unwrap().representations.clone();
        assert_eq!(reps.len(), 2);
        viewer.with_scene(|scene| scene.refuse.set(Some(reps[1])));

        assert!(viewer.set_color(item.id(), Color::from_rgb(255, 0, 0)).is_err());
        assert!(viewer.set_visibility(item.id(), false).is_err());

        viewer.with_scene(|scene| {
            for rep in &reps {
                let rep = scene.inner.representation(*rep).unwrap();
                assert_eq!(rep.color, DEFAULT_PALETTE[0]);
                assert!(rep.visible);
            }
        });
        let stored = viewer.item(item.id()).unwrap();
        assert_eq!(stored.color(), DEFAULT_PALETTE[0]);
        assert!(stored.visible());
    }
}
