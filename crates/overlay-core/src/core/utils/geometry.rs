use nalgebra::{Matrix3, Matrix4, Point3, Vector3};

/// Smallest sphere-like bound used for centering: the center of the axis-aligned
/// box and the largest distance from it to any point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Point3<f64>,
    pub radius: f64,
}

/// Result of a least-squares rigid superposition.
#[derive(Debug, Clone, PartialEq)]
pub struct Superposition {
    /// Homogeneous transform mapping mobile coordinates onto the target frame.
    pub transform: Matrix4<f64>,
    /// Root-mean-square deviation after applying `transform`.
    pub rmsd: f64,
    /// Number of point pairs used.
    pub pairs: usize,
}

pub fn centroid(points: &[Point3<f64>]) -> Option<Point3<f64>> {
    if points.is_empty() {
        return None;
    }
    let sum = points
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords);
    Some(Point3::from(sum / points.len() as f64))
}

pub fn bounding_sphere(points: &[Point3<f64>]) -> Option<BoundingSphere> {
    let first = points.first()?;
    let (mut lo, mut hi) = (first.coords, first.coords);
    for p in points {
        lo = lo.inf(&p.coords);
        hi = hi.sup(&p.coords);
    }
    let center = Point3::from((lo + hi) / 2.0);
    let radius = points
        .iter()
        .map(|p| (p - center).norm())
        .fold(0.0, f64::max);
    Some(BoundingSphere { center, radius })
}

pub fn calculate_rmsd(coords1: &[Point3<f64>], coords2: &[Point3<f64>]) -> Option<f64> {
    if coords1.len() != coords2.len() || coords1.is_empty() {
        return None;
    }
    let n = coords1.len() as f64;
    let squared_dist_sum: f64 = coords1
        .iter()
        .zip(coords2.iter())
        .map(|(p1, p2)| (p1 - p2).norm_squared())
        .sum();
    Some((squared_dist_sum / n).sqrt())
}

/// Finds the rotation + translation minimizing the RMSD between paired points
/// (Kabsch). `mobile[i]` is paired with `target[i]`.
///
/// Returns `None` when the inputs are empty, differ in length, or the SVD does not
/// converge. The returned RMSD may be NaN for non-finite inputs; callers decide
/// whether that is acceptable.
pub fn superpose(mobile: &[Point3<f64>], target: &[Point3<f64>]) -> Option<Superposition> {
    if mobile.len() != target.len() || mobile.is_empty() {
        return None;
    }
    let mobile_center = centroid(mobile)?;
    let target_center = centroid(target)?;

    let covariance = mobile
        .iter()
        .zip(target.iter())
        .fold(Matrix3::zeros(), |acc, (m, t)| {
            acc + (m - mobile_center) * (t - target_center).transpose()
        });

    let svd = covariance.try_svd(true, true, f64::EPSILON, 0)?;
    let u = svd.u?;
    let v = svd.v_t?.transpose();

    // Flip the axis of the smallest singular value to avoid a reflection.
    let mut correction = Matrix3::identity();
    if (v * u.transpose()).determinant() < 0.0 {
        correction[(2, 2)] = -1.0;
    }
    let rotation = v * correction * u.transpose();
    let translation = target_center.coords - rotation * mobile_center.coords;

    let mut transform = rotation.to_homogeneous();
    transform
        .fixed_view_mut::<3, 1>(0, 3)
        .copy_from(&translation);

    let moved: Vec<Point3<f64>> = mobile
        .iter()
        .map(|p| transform.transform_point(p))
        .collect();
    let rmsd = calculate_rmsd(&moved, target)?;

    Some(Superposition {
        transform,
        rmsd,
        pairs: mobile.len(),
    })
}

pub fn translation_matrix(offset: &Vector3<f64>) -> Matrix4<f64> {
    Matrix4::new_translation(offset)
}

pub fn is_identity(transform: &Matrix4<f64>, tolerance: f64) -> bool {
    (transform - Matrix4::identity()).amax() <= tolerance
}
