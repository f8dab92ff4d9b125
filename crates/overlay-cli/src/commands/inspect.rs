use crate::cli::{InspectArgs, InspectFormat};
use crate::error::{CliError, Result};
use overlay::core::io::FormatError;
use overlay::core::io::ccp4::Ccp4Map;
use overlay::core::io::formats::{StructureFormat, is_map_path};
use overlay::core::io::traits::FormatReader;
use overlay::core::models::structure::StructureModel;
use overlay::core::models::volume::VolumeData;
use overlay::engine::config::DEFAULT_ISO_VALUE;
use overlay::engine::error::EngineError;
use overlay::engine::threshold::{is_inverted, relative_to_absolute, resolve_iso_value};
use std::fmt::Write;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Structure(StructureFormat),
    Map,
}

fn detect_kind(path: &Path, forced: Option<InspectFormat>) -> Result<FileKind> {
    match forced {
        Some(InspectFormat::Pdb) => return Ok(FileKind::Structure(StructureFormat::Pdb)),
        Some(InspectFormat::Mmcif) => return Ok(FileKind::Structure(StructureFormat::Mmcif)),
        Some(InspectFormat::Ccp4) => return Ok(FileKind::Map),
        None => {}
    }
    if let Some(format) = StructureFormat::from_path(path) {
        return Ok(FileKind::Structure(format));
    }
    if is_map_path(path) {
        return Ok(FileKind::Map);
    }
    Err(CliError::Argument(format!(
        "cannot tell the format of {:?}; pass --format",
        path
    )))
}

fn parse_error(path: &Path, e: FormatError) -> CliError {
    CliError::FileParsing {
        path: path.to_path_buf(),
        source: e.into(),
    }
}

pub fn run(args: InspectArgs) -> Result<()> {
    let kind = detect_kind(&args.path, args.format)?;
    info!("Inspecting {:?} as {:?}", args.path, kind);
    let bytes = std::fs::read(&args.path)?;

    let report = match kind {
        FileKind::Structure(format) => {
            let model = format
                .read_bytes(&bytes)
                .map_err(|e| parse_error(&args.path, e))?;
            describe_structure(format, &model)
        }
        FileKind::Map => {
            let volume = Ccp4Map::read_bytes(&bytes).map_err(|e| parse_error(&args.path, e))?;
            describe_map(&volume, args.iso_value.unwrap_or(DEFAULT_ISO_VALUE))?
        }
    };
    print!("{}", report);
    Ok(())
}

pub fn describe_structure(format: StructureFormat, model: &StructureModel) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Format:      {}", format);
    let _ = writeln!(out, "Atoms:       {}", model.len());
    let _ = writeln!(out, "Residues:    {}", model.residue_count());
    let _ = writeln!(out, "Chains:      {}", model.chain_count());
    let _ = writeln!(out, "Trace atoms: {}", model.trace_atoms().len());
    if let Some(sphere) = model.bounding_sphere() {
        let c = sphere.center;
        let _ = writeln!(
            out,
            "Center:      ({:.3}, {:.3}, {:.3})  radius {:.3}",
            c.x, c.y, c.z, sphere.radius
        );
    }
    out
}

/// Summarizes a map and the absolute contour level a relative threshold maps to.
pub fn describe_map(volume: &VolumeData, iso_value: f64) -> Result<String> {
    let stats = volume.stats().ok_or_else(|| {
        CliError::Argument("map contains no finite density values".to_string())
    })?;
    let inverted = is_inverted(&stats);
    let threshold = resolve_iso_value(iso_value, inverted).map_err(EngineError::from)?;
    let [nx, ny, nz] = volume.geometry().dimensions;
    let center = volume.geometry().center();

    let mut out = String::new();
    let _ = writeln!(out, "Dimensions:  {} x {} x {}", nx, ny, nz);
    let _ = writeln!(
        out,
        "Center:      ({:.3}, {:.3}, {:.3})",
        center.x, center.y, center.z
    );
    let _ = writeln!(
        out,
        "Density:     min {:.4}  max {:.4}  mean {:.4}  sigma {:.4}",
        stats.min, stats.max, stats.mean, stats.sigma
    );
    let _ = writeln!(out, "Inverted:    {}", if inverted { "yes" } else { "no" });
    let _ = writeln!(
        out,
        "Threshold:   {} sigma = {:.4} absolute",
        threshold.stored,
        relative_to_absolute(threshold.applied, &stats)
    );
    Ok(out)
}
