//! Conversion between relative (sigma-unit) and absolute isosurface thresholds.

use thiserror::Error;

pub use crate::core::models::volume::VolumeStats;

/// A grid is inverted when its maximum is below this fraction of `|min|`.
pub const INVERSION_RATIO: f64 = 0.5;

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum ThresholdError {
    #[error("Grid standard deviation is zero; relative thresholds are undefined")]
    DegenerateSigma,
    #[error("Threshold must be a finite number, got {0}")]
    NonFinite(f64),
}

/// The two faces of a map threshold: what the caller asked for and what is
/// actually contoured.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IsoThreshold {
    /// Relative value kept on the item and reported back to hosts.
    pub stored: f64,
    /// Relative value used to compute the contour level.
    pub applied: f64,
}

pub fn relative_to_absolute(relative: f64, stats: &VolumeStats) -> f64 {
    stats.mean + relative * stats.sigma
}

pub fn absolute_to_relative(absolute: f64, stats: &VolumeStats) -> Result<f64, ThresholdError> {
    if !absolute.is_finite() {
        return Err(ThresholdError::NonFinite(absolute));
    }
    if stats.sigma == 0.0 || !stats.sigma.is_finite() {
        return Err(ThresholdError::DegenerateSigma);
    }
    Ok((absolute - stats.mean) / stats.sigma)
}

pub fn is_inverted(stats: &VolumeStats) -> bool {
    stats.max < INVERSION_RATIO * stats.min.abs()
}

/// Inverted maps keep the magnitude of the request and contour at its negation.
pub fn resolve_iso_value(requested: f64, inverted: bool) -> Result<IsoThreshold, ThresholdError> {
    if !requested.is_finite() {
        return Err(ThresholdError::NonFinite(requested));
    }
    Ok(if inverted {
        let magnitude = requested.abs();
        IsoThreshold {
            stored: magnitude,
            applied: -magnitude,
        }
    } else {
        IsoThreshold {
            stored: requested,
            applied: requested,
        }
    })
}

/// Absolute contour level of a stored relative threshold.
pub fn contour_level(stored: f64, inverted: bool, stats: &VolumeStats) -> f64 {
    let applied = if inverted { -stored.abs() } else { stored };
    relative_to_absolute(applied, stats)
}
