//! Plane-to-image homographies from four point correspondences

use nalgebra::{Matrix3, Point2, SMatrix, SVector, Vector3};

/// Estimates `H` such that `dst ~ H * src` for exactly four correspondences.
///
/// Solves the 8x8 linear system obtained by fixing `H[(2, 2)] = 1`. Returns
/// `None` for degenerate configurations (three collinear points).
pub fn homography_from_points(src: &[Point2<f64>; 4], dst: &[Point2<f64>; 4]) -> Option<Matrix3<f64>> {
    if has_collinear_triple(src) || has_collinear_triple(dst) {
        return None;
    }

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for (i, (s, d)) in src.iter().zip(dst.iter()).enumerate() {
        let (x, y) = (s.x, s.y);
        let (u, v) = (d.x, d.y);
        let r0 = 2 * i;
        let r1 = 2 * i + 1;

        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        b[r0] = u;

        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        b[r1] = v;
    }

    let h = a.lu().solve(&b)?;
    if h.iter().any(|v| !v.is_finite()) {
        return None;
    }

    Some(Matrix3::new(
        h[0], h[1], h[2], //
        h[3], h[4], h[5], //
        h[6], h[7], 1.0,
    ))
}

fn has_collinear_triple(points: &[Point2<f64>; 4]) -> bool {
    let extent = points
        .iter()
        .flat_map(|p| [p.x.abs(), p.y.abs()])
        .fold(1.0_f64, f64::max);
    let tolerance = 1e-9 * extent * extent;

    const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    TRIPLES.iter().any(|&[i, j, k]| {
        let e1 = points[j] - points[i];
        let e2 = points[k] - points[i];
        (e1.x * e2.y - e1.y * e2.x).abs() <= tolerance
    })
}

/// Maps a point through a homography
pub fn project(h: &Matrix3<f64>, p: Point2<f64>) -> Point2<f64> {
    let q = h * Vector3::new(p.x, p.y, 1.0);
    Point2::new(q.x / q.z, q.y / q.z)
}
