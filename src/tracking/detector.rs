//! Square marker detection
//!
//! Finds dark, closed square borders in a luma image and reads the pattern
//! printed inside them:
//!
//! 1. Threshold the image and label 4-connected dark components
//! 2. Drop components touching the image edge or smaller than `min_area`
//! 3. Fit a quadrilateral to each remaining component
//! 4. Check that the band just inside the quad outline is dark
//! 5. Sample the inner pattern area through the quad's homography and
//!    correlate it against the reference pattern

use nalgebra::{Matrix3, Point2};

use super::homography::{homography_from_points, project};
use super::pattern::{MarkerPattern, PatternMatch};
use crate::config::SessionConfig;

/// Tunables of the detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorParams {
    /// Luma values below this are treated as part of a marker border
    pub threshold: u8,
    /// Smallest component, in pixels, considered a marker
    pub min_area: usize,
    /// Lowest pattern correlation reported as a detection
    pub min_confidence: f32,
    /// Edge length of the pattern area relative to the whole marker
    pub pattern_ratio: f64,
    /// Share of border samples that have to be dark
    pub min_border_darkness: f32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            threshold: 100,
            min_area: 400,
            min_confidence: 0.5,
            pattern_ratio: 0.5,
            min_border_darkness: 0.9,
        }
    }
}

impl From<&SessionConfig> for DetectorParams {
    fn from(config: &SessionConfig) -> Self {
        Self {
            threshold: config.threshold,
            min_area: config.min_marker_area,
            min_confidence: config.min_confidence,
            ..Self::default()
        }
    }
}

/// A dark quadrilateral that might be a marker
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerCandidate {
    /// Outline corners in image pixels, clockwise on screen
    pub corners: [Point2<f64>; 4],
    /// Pixel count of the dark component
    pub area: usize,
}

/// A candidate whose interior matched the pattern
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Corners of the upright pattern: top-left, top-right, bottom-right, bottom-left
    pub corners: [Point2<f64>; 4],
    pub pattern_match: PatternMatch,
}

/// Borrowed single channel image
#[derive(Debug, Clone, Copy)]
pub struct LumaView<'a> {
    pub width: u32,
    pub height: u32,
    pub data: &'a [u8],
}

impl LumaView<'_> {
    fn at(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    /// Value of the pixel containing `p`, if inside the image
    fn sample(&self, p: Point2<f64>) -> Option<u8> {
        if !(p.x.is_finite() && p.y.is_finite()) || p.x < 0.0 || p.y < 0.0 {
            return None;
        }
        let (x, y) = (p.x.floor() as u32, p.y.floor() as u32);
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.at(x, y))
    }
}

/// Runs the whole detection pipeline and returns every pattern match
pub fn detect_markers(
    image: LumaView<'_>,
    pattern: &MarkerPattern,
    params: &DetectorParams,
) -> Vec<Detection> {
    let candidates = find_candidates(image, params);
    log::trace!("{} marker candidates", candidates.len());

    candidates
        .iter()
        .filter_map(|candidate| {
            let h = unit_square_homography(&candidate.corners)?;
            if border_darkness(image, &h, params.threshold) < params.min_border_darkness {
                return None;
            }

            let samples = sample_pattern(image, &h, pattern.size(), params.pattern_ratio)?;
            let found = pattern.match_samples(&samples)?;
            if found.confidence < params.min_confidence {
                return None;
            }

            let d = found.direction;
            let corners = std::array::from_fn(|i| candidate.corners[(i + 4 - d) % 4]);
            Some(Detection {
                corners,
                pattern_match: found,
            })
        })
        .collect()
}

/// Dark components that look like quadrilaterals
pub fn find_candidates(image: LumaView<'_>, params: &DetectorParams) -> Vec<MarkerCandidate> {
    dark_components(image, params.threshold)
        .into_iter()
        .filter(|c| !c.touches_edge && c.pixels.len() >= params.min_area)
        .filter_map(|c| {
            let corners = fit_quad(&c.pixels)?;
            Some(MarkerCandidate {
                corners,
                area: c.pixels.len(),
            })
        })
        .collect()
}

struct Component {
    pixels: Vec<Point2<f64>>,
    touches_edge: bool,
}

fn dark_components(image: LumaView<'_>, threshold: u8) -> Vec<Component> {
    let (w, h) = (image.width, image.height);
    let mut visited = vec![false; w as usize * h as usize];
    let mut components = Vec::new();
    let mut stack = Vec::new();

    for start_y in 0..h {
        for start_x in 0..w {
            let start = start_y as usize * w as usize + start_x as usize;
            if visited[start] || image.data[start] >= threshold {
                continue;
            }

            visited[start] = true;
            stack.push((start_x, start_y));
            let mut component = Component {
                pixels: Vec::new(),
                touches_edge: false,
            };

            while let Some((x, y)) = stack.pop() {
                component
                    .pixels
                    .push(Point2::new(x as f64 + 0.5, y as f64 + 0.5));
                if x == 0 || y == 0 || x == w - 1 || y == h - 1 {
                    component.touches_edge = true;
                }

                let neighbours = [
                    (x.wrapping_sub(1), y),
                    (x + 1, y),
                    (x, y.wrapping_sub(1)),
                    (x, y + 1),
                ];
                for (nx, ny) in neighbours {
                    if nx >= w || ny >= h {
                        continue;
                    }
                    let i = ny as usize * w as usize + nx as usize;
                    if !visited[i] && image.data[i] < threshold {
                        visited[i] = true;
                        stack.push((nx, ny));
                    }
                }
            }

            components.push(component);
        }
    }

    components
}

/// Fits four corners to a point set
///
/// The first corner is the point farthest from the centroid, the opposite one
/// the point farthest from it, and the remaining two the points farthest from
/// that diagonal on either side. Corners come back clockwise on screen,
/// starting at the one closest to the image origin.
fn fit_quad(points: &[Point2<f64>]) -> Option<[Point2<f64>; 4]> {
    if points.len() < 4 {
        return None;
    }

    let n = points.len() as f64;
    let centroid = points
        .iter()
        .fold(Point2::origin(), |acc: Point2<f64>, p| acc + p.coords / n);

    let farthest_from = |anchor: Point2<f64>| {
        points
            .iter()
            .copied()
            .max_by(|a, b| (a - anchor).norm_squared().total_cmp(&(b - anchor).norm_squared()))
    };
    let p0 = farthest_from(centroid)?;
    let p2 = farthest_from(p0)?;

    let diagonal = p2 - p0;
    if diagonal.norm() < 2.0 {
        return None;
    }
    let side = |p: &Point2<f64>| {
        let v = p - p0;
        diagonal.x * v.y - diagonal.y * v.x
    };
    let p1 = points.iter().copied().max_by(|a, b| side(a).total_cmp(&side(b)))?;
    let p3 = points.iter().copied().min_by(|a, b| side(a).total_cmp(&side(b)))?;

    // `side` is the distance from the diagonal scaled by its length
    let min_offset = 0.1 * diagonal.norm_squared();
    if side(&p1) < min_offset || -side(&p3) < min_offset {
        return None;
    }

    let mut corners = [p0, p1, p2, p3];
    if signed_area(&corners) < 0.0 {
        corners = [p0, p3, p2, p1];
    }

    let first = (0..4)
        .min_by(|&a, &b| {
            let ka = corners[a].x + corners[a].y;
            let kb = corners[b].x + corners[b].y;
            ka.total_cmp(&kb)
        })
        .unwrap_or(0);
    corners.rotate_left(first);
    Some(corners)
}

/// Shoelace area, positive for clockwise winding with Y pointing down
fn signed_area(corners: &[Point2<f64>; 4]) -> f64 {
    (0..4)
        .map(|i| {
            let a = corners[i];
            let b = corners[(i + 1) % 4];
            a.x * b.y - b.x * a.y
        })
        .sum::<f64>()
        * 0.5
}

fn unit_square_homography(corners: &[Point2<f64>; 4]) -> Option<Matrix3<f64>> {
    let unit = [
        Point2::new(0.0, 0.0),
        Point2::new(1.0, 0.0),
        Point2::new(1.0, 1.0),
        Point2::new(0.0, 1.0),
    ];
    homography_from_points(&unit, corners)
}

const BORDER_DEPTH: f64 = 0.125;
const BORDER_SAMPLES_PER_SIDE: usize = 16;

/// Share of dark samples along a band inset from the quad outline
fn border_darkness(image: LumaView<'_>, h: &Matrix3<f64>, threshold: u8) -> f32 {
    let lo = BORDER_DEPTH;
    let hi = 1.0 - BORDER_DEPTH;
    let mut dark = 0;
    let mut total = 0;

    for i in 0..BORDER_SAMPLES_PER_SIDE {
        let t = lo + (hi - lo) * (i as f64 + 0.5) / BORDER_SAMPLES_PER_SIDE as f64;
        for (u, v) in [(t, lo), (hi, t), (t, hi), (lo, t)] {
            total += 1;
            if let Some(value) = image.sample(project(h, Point2::new(u, v))) {
                if value < threshold {
                    dark += 1;
                }
            }
        }
    }

    dark as f32 / total as f32
}

/// Reads `size x size` cell values from the pattern area, row major
///
/// Rows run from the quad's first edge towards its third. Returns `None` if
/// any cell falls outside the image.
pub fn sample_pattern(
    image: LumaView<'_>,
    h: &Matrix3<f64>,
    size: usize,
    pattern_ratio: f64,
) -> Option<Vec<f32>> {
    let margin = (1.0 - pattern_ratio) * 0.5;
    let cell = pattern_ratio / size as f64;

    let mut samples = Vec::with_capacity(size * size);
    for row in 0..size {
        let v = margin + (row as f64 + 0.5) * cell;
        for col in 0..size {
            let u = margin + (col as f64 + 0.5) * cell;
            let value = image.sample(project(h, Point2::new(u, v)))?;
            samples.push(value as f32);
        }
    }
    Some(samples)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::tracking::pattern::rotate_ccw;
    use crate::video::VideoFrame;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    pub(crate) const FRAME_WIDTH: u32 = 320;
    pub(crate) const FRAME_HEIGHT: u32 = 240;

    /// Random black and white 16x16 grid
    pub(crate) fn random_grid(seed: u64) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..256)
            .map(|_| if rng.random_bool(0.5) { 0 } else { 255 })
            .collect()
    }

    /// Draws a 160 pixel marker at (80, 40) whose interior shows `grid`
    pub(crate) fn marker_frame(grid: &[u8]) -> VideoFrame {
        let mut frame = VideoFrame::filled(FRAME_WIDTH, FRAME_HEIGHT, [255, 255, 255, 255]);
        for y in 40..200 {
            for x in 80..240 {
                frame.set_pixel(x, y, [0, 0, 0, 255]);
            }
        }
        for y in 80..160 {
            for x in 120..200 {
                let cell = ((y - 80) / 5) as usize * 16 + ((x - 120) / 5) as usize;
                let v = grid[cell];
                frame.set_pixel(x, y, [v, v, v, 255]);
            }
        }
        frame
    }

    /// Draws the same marker as [`marker_frame`] mapped onto an arbitrary quad
    ///
    /// `corners` are the marker's top-left, top-right, bottom-right and
    /// bottom-left corners in frame pixels.
    pub(crate) fn warped_marker_frame(grid: &[u8], corners: [[f64; 2]; 4]) -> VideoFrame {
        let quad = corners.map(|[x, y]| Point2::new(x, y));
        let unit = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 1.0),
        ];
        let frame_to_marker = homography_from_points(&quad, &unit).unwrap();

        let mut frame = VideoFrame::filled(FRAME_WIDTH, FRAME_HEIGHT, [255, 255, 255, 255]);
        for y in 0..FRAME_HEIGHT {
            for x in 0..FRAME_WIDTH {
                let p = project(&frame_to_marker, Point2::new(x as f64 + 0.5, y as f64 + 0.5));
                if !(0.0..1.0).contains(&p.x) || !(0.0..1.0).contains(&p.y) {
                    continue;
                }
                let (u, v) = ((p.x - 0.25) / 0.5, (p.y - 0.25) / 0.5);
                let value = if (0.0..1.0).contains(&u) && (0.0..1.0).contains(&v) {
                    grid[(v * 16.0) as usize * 16 + (u * 16.0) as usize]
                } else {
                    0
                };
                frame.set_pixel(x, y, [value, value, value, 255]);
            }
        }
        frame
    }

    /// Corners of a square of half-size `half` centred in the frame, turned by `degrees`
    fn rotated_square(half: f64, degrees: f64) -> [[f64; 2]; 4] {
        let (sin, cos) = degrees.to_radians().sin_cos();
        let centre = (FRAME_WIDTH as f64 / 2.0, FRAME_HEIGHT as f64 / 2.0);
        [(-half, -half), (half, -half), (half, half), (-half, half)]
            .map(|(dx, dy)| [centre.0 + cos * dx - sin * dy, centre.1 + sin * dx + cos * dy])
    }

    fn assert_near(actual: Point2<f64>, expected: [f64; 2], tolerance: f64) {
        let distance = (actual - Point2::new(expected[0], expected[1])).norm();
        assert!(
            distance < tolerance,
            "corner {:?} is {:.2} px from {:?}",
            actual,
            distance,
            expected
        );
    }

    fn luma_of(frame: &VideoFrame) -> Vec<u8> {
        frame.to_luma()
    }

    fn view(luma: &[u8]) -> LumaView<'_> {
        LumaView {
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
            data: luma,
        }
    }

    fn best(detections: &[Detection]) -> &Detection {
        detections
            .iter()
            .max_by(|a, b| {
                a.pattern_match
                    .confidence
                    .total_cmp(&b.pattern_match.confidence)
            })
            .unwrap()
    }

    #[test]
    fn test_fit_quad_orders_corners_clockwise() {
        let square: Vec<Point2<f64>> = (0..20)
            .flat_map(|y| (0..20).map(move |x| Point2::new(x as f64 + 10.5, y as f64 + 5.5)))
            .collect();
        let corners = fit_quad(&square).unwrap();
        assert_eq!(corners[0], Point2::new(10.5, 5.5));
        assert_eq!(corners[1], Point2::new(29.5, 5.5));
        assert_eq!(corners[2], Point2::new(29.5, 24.5));
        assert_eq!(corners[3], Point2::new(10.5, 24.5));
    }

    #[test]
    fn test_components_touching_edge_are_skipped() {
        let mut frame = VideoFrame::filled(FRAME_WIDTH, FRAME_HEIGHT, [255, 255, 255, 255]);
        for y in 0..100 {
            for x in 0..100 {
                frame.set_pixel(x, y, [0, 0, 0, 255]);
            }
        }
        let luma = luma_of(&frame);
        assert!(find_candidates(view(&luma), &DetectorParams::default()).is_empty());
    }

    #[test]
    fn test_small_components_are_skipped() {
        let mut frame = VideoFrame::filled(FRAME_WIDTH, FRAME_HEIGHT, [255, 255, 255, 255]);
        for y in 50..60 {
            for x in 50..60 {
                frame.set_pixel(x, y, [0, 0, 0, 255]);
            }
        }
        let luma = luma_of(&frame);
        assert!(find_candidates(view(&luma), &DetectorParams::default()).is_empty());
    }

    #[test]
    fn test_detects_upright_marker() {
        let grid = random_grid(7);
        let pattern = MarkerPattern::from_grid(16, &grid).unwrap();
        let luma = luma_of(&marker_frame(&grid));

        let detections = detect_markers(view(&luma), &pattern, &DetectorParams::default());
        let found = best(&detections);
        assert_eq!(found.pattern_match.direction, 0);
        assert!(found.pattern_match.confidence > 0.95);
        assert_eq!(found.corners[0], Point2::new(80.5, 40.5));
        assert_eq!(found.corners[2], Point2::new(239.5, 199.5));
    }

    #[test]
    fn test_detects_turned_marker() {
        let grid = random_grid(11);
        let pattern = MarkerPattern::from_grid(16, &grid).unwrap();
        let turned = rotate_ccw(&grid, 16);
        let luma = luma_of(&marker_frame(&turned));

        let detections = detect_markers(view(&luma), &pattern, &DetectorParams::default());
        let found = best(&detections);
        assert_eq!(found.pattern_match.direction, 1);
        // Upright top-left now sits at the bottom-left of the image
        assert_eq!(found.corners[0], Point2::new(80.5, 199.5));
        assert_eq!(found.corners[1], Point2::new(80.5, 40.5));
    }

    #[test]
    fn test_other_pattern_is_rejected() {
        let pattern = MarkerPattern::from_grid(16, &random_grid(1)).unwrap();
        let luma = luma_of(&marker_frame(&random_grid(2)));

        let params = DetectorParams {
            min_confidence: 0.8,
            ..DetectorParams::default()
        };
        assert!(detect_markers(view(&luma), &pattern, &params).is_empty());
    }

    #[test]
    fn test_detects_marker_under_perspective() {
        let grid = random_grid(13);
        let pattern = MarkerPattern::from_grid(16, &grid).unwrap();
        let corners = [[120.0, 50.0], [230.0, 80.0], [215.0, 190.0], [95.0, 170.0]];
        let luma = luma_of(&warped_marker_frame(&grid, corners));

        let detections = detect_markers(view(&luma), &pattern, &DetectorParams::default());
        let found = best(&detections);
        assert_eq!(found.pattern_match.direction, 0);
        assert!(found.pattern_match.confidence > 0.8);
        for (actual, expected) in found.corners.iter().zip(corners) {
            assert_near(*actual, expected, 2.5);
        }
    }

    #[test]
    fn test_detects_marker_turned_in_plane() {
        let grid = random_grid(17);
        let pattern = MarkerPattern::from_grid(16, &grid).unwrap();

        for degrees in [30.0, 45.0, 100.0] {
            let corners = rotated_square(65.0, degrees);
            let luma = luma_of(&warped_marker_frame(&grid, corners));

            let detections = detect_markers(view(&luma), &pattern, &DetectorParams::default());
            assert!(!detections.is_empty(), "nothing found at {} degrees", degrees);
            let found = best(&detections);
            assert!(
                found.pattern_match.confidence > 0.8,
                "confidence {} at {} degrees",
                found.pattern_match.confidence,
                degrees
            );
            // Corners follow the printed pattern, not the image axes
            for (actual, expected) in found.corners.iter().zip(corners) {
                assert_near(*actual, expected, 2.5);
            }
        }
    }
}
