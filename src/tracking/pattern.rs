//! Marker patterns
//!
//! An ARToolKit `.patt` file stores the marker's inner image four times, once
//! per quarter turn, each as three colour planes of `N x N` values (16 x 16 for
//! the stock markers). Matching is done on the mean of the three planes.
//!
//! Orientation `d` holds the upright pattern turned `d` quarter turns
//! counter-clockwise, the order ARToolKit writes them in.

use std::path::Path;

use crate::error::{ArError, Result};

const ORIENTATIONS: usize = 4;
const CHANNELS: usize = 3;

/// Result of comparing a sampled marker interior against a pattern
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternMatch {
    /// Quarter turns counter-clockwise of the pattern as it appears in the image
    pub direction: usize,
    /// Zero-mean normalized cross correlation, in `-1..=1`
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerPattern {
    size: usize,
    orientations: [Vec<f32>; ORIENTATIONS],
}

impl MarkerPattern {
    /// Loads a `.patt` file
    pub async fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ArError::io(path, e))?;
        let pattern = Self::parse(&text)?;
        log::debug!(
            "Loaded marker pattern {} ({}x{})",
            path.display(),
            pattern.size,
            pattern.size
        );
        Ok(pattern)
    }

    /// Parses the whitespace separated text layout
    pub fn parse(text: &str) -> Result<Self> {
        let values = text
            .split_whitespace()
            .enumerate()
            .map(|(i, token)| match token.parse::<u16>() {
                Ok(v) if v <= 255 => Ok(v as f32),
                _ => Err(ArError::Pattern(format!(
                    "value {} is not in 0..=255: {:?}",
                    i, token
                ))),
            })
            .collect::<Result<Vec<f32>>>()?;

        let per_plane = values.len() / (ORIENTATIONS * CHANNELS);
        let size = (per_plane as f64).sqrt().round() as usize;
        if size < 4 || size * size * ORIENTATIONS * CHANNELS != values.len() {
            return Err(ArError::Pattern(format!(
                "{} values do not form 4 orientations of 3 square planes",
                values.len()
            )));
        }

        let plane = size * size;
        let orientations = std::array::from_fn(|dir| {
            (0..plane)
                .map(|i| {
                    let sum: f32 = (0..CHANNELS)
                        .map(|ch| values[(dir * CHANNELS + ch) * plane + i])
                        .sum();
                    sum / CHANNELS as f32
                })
                .collect()
        });

        Ok(Self { size, orientations })
    }

    /// Builds a pattern from an upright grayscale grid, row major
    pub fn from_grid(size: usize, grid: &[u8]) -> Result<Self> {
        if size < 4 || grid.len() != size * size {
            return Err(ArError::Pattern(format!(
                "grid of {} values is not {}x{}",
                grid.len(),
                size,
                size
            )));
        }

        let upright: Vec<f32> = grid.iter().map(|&v| v as f32).collect();
        let mut orientations: [Vec<f32>; ORIENTATIONS] = Default::default();
        orientations[0] = upright;
        for dir in 1..ORIENTATIONS {
            orientations[dir] = rotate_ccw(&orientations[dir - 1], size);
        }

        Ok(Self { size, orientations })
    }

    /// Writes the text layout, repeating the mono values on all colour planes
    pub fn to_patt_string(&self) -> String {
        let mut out = String::new();
        for values in &self.orientations {
            for _ in 0..CHANNELS {
                for row in values.chunks(self.size) {
                    let line: Vec<String> =
                        row.iter().map(|v| format!("{:4}", v.round() as u8)).collect();
                    out.push_str(&line.join(""));
                    out.push('\n');
                }
            }
            out.push('\n');
        }
        out
    }

    /// Edge length of the pattern grid
    pub fn size(&self) -> usize {
        self.size
    }

    /// Mono values of one orientation, row major
    pub fn orientation(&self, direction: usize) -> &[f32] {
        &self.orientations[direction % ORIENTATIONS]
    }

    /// Finds the orientation that best explains `samples`
    ///
    /// Returns `None` when the samples (or the pattern) have no contrast.
    pub fn match_samples(&self, samples: &[f32]) -> Option<PatternMatch> {
        if samples.len() != self.size * self.size {
            return None;
        }

        self.orientations
            .iter()
            .enumerate()
            .filter_map(|(direction, reference)| {
                correlation(reference, samples).map(|confidence| PatternMatch {
                    direction,
                    confidence,
                })
            })
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }
}

/// Quarter turn counter-clockwise of a square grid
pub(crate) fn rotate_ccw<T: Copy>(grid: &[T], size: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(grid.len());
    for row in 0..size {
        for col in 0..size {
            out.push(grid[col * size + (size - 1 - row)]);
        }
    }
    out
}

fn correlation(a: &[f32], b: &[f32]) -> Option<f32> {
    let n = a.len() as f32;
    let mean_a = a.iter().sum::<f32>() / n;
    let mean_b = b.iter().sum::<f32>() / n;

    let mut cross = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (&x, &y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cross += dx * dy;
        norm_a += dx * dx;
        norm_b += dy * dy;
    }

    let denom = (norm_a * norm_b).sqrt();
    if denom < 1e-3 {
        return None;
    }
    Some(cross / denom)
}
