//! Robust planar homography estimation.
//!
//! Minimal 4-point DLT solves inside a RANSAC or least-median loop, with
//! adaptive iteration count and a final refit over the inlier set. Points
//! are Hartley-normalized before each solve.

use nalgebra::{DMatrix, Matrix3, Point2, SymmetricEigen, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::settings::HomographyMethod;

/// Seed for the sampling loop; fixed so repeated runs are bit-stable.
const RANSAC_SEED: u64 = 0x853c49e6748fea9b;

const SAMPLE_SIZE: usize = 4;

/// Configuration for the robust fit.
#[derive(Debug, Clone)]
pub struct RobustConfig {
    pub method: HomographyMethod,
    /// Inlier threshold in pixels (RANSAC only).
    pub reproj_threshold: f64,
    pub max_iterations: usize,
    /// Desired probability of sampling one outlier-free set.
    pub probability: f64,
}

impl Default for RobustConfig {
    fn default() -> Self {
        Self {
            method: HomographyMethod::Ransac,
            reproj_threshold: 3.0,
            max_iterations: 2000,
            probability: 0.995,
        }
    }
}

/// Result of a robust fit: the homography and the per-match inlier mask.
#[derive(Debug, Clone)]
pub struct HomographyResult {
    pub h: Matrix3<f64>,
    pub inlier_mask: Vec<bool>,
}

impl HomographyResult {
    pub fn num_inliers(&self) -> usize {
        self.inlier_mask.iter().filter(|m| **m).count()
    }
}

/// Map a point through `h`; `None` when the point lands near the plane at
/// infinity.
pub fn apply_homography(h: &Matrix3<f64>, p: &Point2<f64>) -> Option<Point2<f64>> {
    let v = h * Vector3::new(p.x, p.y, 1.0);
    if !v.z.is_finite() || v.z.abs() < 1e-12 || !v.x.is_finite() || !v.y.is_finite() {
        return None;
    }
    Some(Point2::new(v.x / v.z, v.y / v.z))
}

/// Estimate the homography mapping `src` onto `dst`.
///
/// Requires at least four correspondences. Returns `None` when every
/// sampled model was degenerate or, under RANSAC, no model reached four
/// inliers.
pub fn find_homography(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    config: &RobustConfig,
) -> Option<HomographyResult> {
    let n = src.len();
    if n < SAMPLE_SIZE || n != dst.len() {
        return None;
    }
    if n == SAMPLE_SIZE {
        let h = solve_dlt(src, dst)?;
        return Some(HomographyResult {
            h,
            inlier_mask: vec![true; n],
        });
    }
    match config.method {
        HomographyMethod::Ransac => ransac(src, dst, config),
        HomographyMethod::LeastMedian => least_median(src, dst, config),
    }
}

fn ransac(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    config: &RobustConfig,
) -> Option<HomographyResult> {
    let n = src.len();
    let thr_sq = config.reproj_threshold * config.reproj_threshold;
    let mut rng = StdRng::seed_from_u64(RANSAC_SEED);

    let mut best_mask: Option<Vec<bool>> = None;
    let mut best_h = Matrix3::identity();
    let mut best_inliers = 0usize;
    let mut max_iter = config.max_iterations;

    let mut iteration = 0usize;
    while iteration < max_iter {
        iteration += 1;
        let indices = sample_indices(&mut rng, n);
        let sample_src: Vec<_> = indices.iter().map(|&i| src[i]).collect();
        let sample_dst: Vec<_> = indices.iter().map(|&i| dst[i]).collect();
        let Some(h) = solve_dlt(&sample_src, &sample_dst) else {
            continue;
        };

        let mask: Vec<bool> = (0..n)
            .map(|i| reproj_error_sq(&h, &src[i], &dst[i]) <= thr_sq)
            .collect();
        let inliers = mask.iter().filter(|m| **m).count();
        if inliers > best_inliers {
            best_inliers = inliers;
            best_h = h;
            best_mask = Some(mask);

            let ratio = inliers as f64 / n as f64;
            max_iter = max_iter.min(iteration + adaptive_iterations(ratio, config.probability));
        }
    }

    let mask = best_mask?;
    if best_inliers < SAMPLE_SIZE {
        return None;
    }

    // refit over all inliers; keep it only when it does not lose support
    let refit = refit_on_mask(src, dst, &mask);
    if let Some(h) = refit {
        let new_mask: Vec<bool> = (0..n)
            .map(|i| reproj_error_sq(&h, &src[i], &dst[i]) <= thr_sq)
            .collect();
        let new_inliers = new_mask.iter().filter(|m| **m).count();
        if new_inliers >= best_inliers {
            return Some(HomographyResult {
                h,
                inlier_mask: new_mask,
            });
        }
    }
    Some(HomographyResult {
        h: best_h,
        inlier_mask: mask,
    })
}

fn least_median(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    config: &RobustConfig,
) -> Option<HomographyResult> {
    let n = src.len();
    let mut rng = StdRng::seed_from_u64(RANSAC_SEED);

    let mut best_median = f64::INFINITY;
    let mut best_h: Option<Matrix3<f64>> = None;

    for _ in 0..config.max_iterations.min(512) {
        let indices = sample_indices(&mut rng, n);
        let sample_src: Vec<_> = indices.iter().map(|&i| src[i]).collect();
        let sample_dst: Vec<_> = indices.iter().map(|&i| dst[i]).collect();
        let Some(h) = solve_dlt(&sample_src, &sample_dst) else {
            continue;
        };

        let mut errors: Vec<f64> = (0..n)
            .map(|i| reproj_error_sq(&h, &src[i], &dst[i]))
            .collect();
        errors.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let median = errors[n / 2];
        if median < best_median {
            best_median = median;
            best_h = Some(h);
        }
    }

    let h = best_h?;
    // robust scale from the minimal median (Rousseeuw's factor)
    let sigma = 2.5 * 1.4826 * (1.0 + 5.0 / (n - SAMPLE_SIZE) as f64) * best_median.sqrt();
    let cutoff_sq = (sigma * sigma).max(1e-6);
    let mask: Vec<bool> = (0..n)
        .map(|i| reproj_error_sq(&h, &src[i], &dst[i]) <= cutoff_sq)
        .collect();
    if mask.iter().filter(|m| **m).count() < SAMPLE_SIZE {
        return None;
    }

    let h = refit_on_mask(src, dst, &mask).unwrap_or(h);
    Some(HomographyResult {
        h,
        inlier_mask: mask,
    })
}

fn refit_on_mask(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    mask: &[bool],
) -> Option<Matrix3<f64>> {
    let inlier_src: Vec<_> = src
        .iter()
        .zip(mask)
        .filter_map(|(p, m)| m.then_some(*p))
        .collect();
    let inlier_dst: Vec<_> = dst
        .iter()
        .zip(mask)
        .filter_map(|(p, m)| m.then_some(*p))
        .collect();
    if inlier_src.len() < SAMPLE_SIZE {
        return None;
    }
    solve_dlt(&inlier_src, &inlier_dst)
}

pub(crate) fn reproj_error_sq(h: &Matrix3<f64>, s: &Point2<f64>, d: &Point2<f64>) -> f64 {
    match apply_homography(h, s) {
        Some(p) => (p - d).norm_squared(),
        None => f64::INFINITY,
    }
}

/// Direct linear transform over all given correspondences.
fn solve_dlt(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    let n = src.len();
    let (t1, src_n) = normalize_points(src)?;
    let (t2, dst_n) = normalize_points(dst)?;

    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for i in 0..n {
        let (x, y) = (src_n[i].x, src_n[i].y);
        let (u, v) = (dst_n[i].x, dst_n[i].y);
        let r0 = [-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u];
        let r1 = [0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v];
        for c in 0..9 {
            a[(2 * i, c)] = r0[c];
            a[(2 * i + 1, c)] = r1[c];
        }
    }

    // null space via the smallest eigenpair of AᵀA (A can be 8x9, where a
    // thin SVD would not expose the null vector)
    let ata = a.transpose() * &a;
    let eig = SymmetricEigen::new(ata);
    let mut min_idx = 0;
    for i in 1..eig.eigenvalues.len() {
        if eig.eigenvalues[i] < eig.eigenvalues[min_idx] {
            min_idx = i;
        }
    }
    let hv = eig.eigenvectors.column(min_idx);

    let hn = Matrix3::new(
        hv[0], hv[1], hv[2], hv[3], hv[4], hv[5], hv[6], hv[7], hv[8],
    );
    let h = t2.try_inverse()? * hn * t1;

    let scale = h[(2, 2)];
    let h = if scale.abs() > 1e-12 {
        h / scale
    } else {
        let norm = h.norm();
        if norm < 1e-12 {
            return None;
        }
        h / norm
    };
    if h.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(h)
}

/// Hartley normalization: centroid at the origin, mean distance √2.
fn normalize_points(points: &[Point2<f64>]) -> Option<(Matrix3<f64>, Vec<Point2<f64>>)> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < 1e-12 {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = points
        .iter()
        .map(|p| Point2::new(s * (p.x - cx), s * (p.y - cy)))
        .collect();
    Some((t, normalized))
}

fn sample_indices(rng: &mut StdRng, n: usize) -> [usize; SAMPLE_SIZE] {
    let mut indices = [0usize; SAMPLE_SIZE];
    for i in 0..SAMPLE_SIZE {
        loop {
            let candidate = rng.gen_range(0..n);
            if !indices[..i].contains(&candidate) {
                indices[i] = candidate;
                break;
            }
        }
    }
    indices
}

/// Iterations needed to hit an outlier-free 4-sample with `probability`.
fn adaptive_iterations(inlier_ratio: f64, probability: f64) -> usize {
    if inlier_ratio <= 0.0 {
        return usize::MAX;
    }
    if inlier_ratio >= 1.0 {
        return 1;
    }
    let w_n = inlier_ratio.powi(SAMPLE_SIZE as i32);
    let log_denom = (1.0 - w_n).ln();
    if log_denom.abs() < 1e-10 {
        return 1;
    }
    let k = (1.0 - probability).ln() / log_denom;
    (k.ceil() as usize).max(1)
}
