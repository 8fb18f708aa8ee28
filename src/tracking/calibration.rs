//! Camera calibration profile
//!
//! Reads ARToolKit `camera_para.dat` files and turns the intrinsics they hold
//! into the projection matrix used to overlay the scene on the video.
//!
//! The file is big-endian: `i32 xsize`, `i32 ysize`, a 3x4 `f64` camera
//! matrix, then 4, 9 or 17 `f64` distortion factors depending on the
//! ARToolKit version that wrote it.

use std::path::Path;

use cgmath::{Matrix4, Vector4};
use nalgebra::Matrix3;

use crate::error::{ArError, Result};

const HEADER_LEN: usize = 8;
const MATRIX_LEN: usize = 12 * 8;
const DISTORTION_FACTOR_COUNTS: [usize; 3] = [4, 9, 17];

/// Pinhole intrinsics in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub skew: f64,
}

impl Intrinsics {
    /// The 3x3 camera matrix `K`
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, self.skew, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }
}

/// Calibration of the camera the marker is seen through
#[derive(Debug, Clone, PartialEq)]
pub struct CameraParameters {
    /// Image width the calibration was made at
    pub xsize: u32,
    /// Image height the calibration was made at
    pub ysize: u32,
    /// Camera matrix `K [I | 0]`, row major
    pub mat: [[f64; 4]; 3],
    /// Lens distortion factors as stored in the file
    pub dist_factor: Vec<f64>,
}

impl CameraParameters {
    /// Loads a calibration file
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| ArError::io(path, e))?;
        let params = Self::from_bytes(&bytes)?;
        log::debug!(
            "Loaded camera parameters {} ({}x{}, {} distortion factors)",
            path.display(),
            params.xsize,
            params.ysize,
            params.dist_factor.len()
        );
        Ok(params)
    }

    /// Parses the binary ARToolKit layout
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let factor_count = DISTORTION_FACTOR_COUNTS
            .iter()
            .copied()
            .find(|n| bytes.len() == HEADER_LEN + MATRIX_LEN + n * 8)
            .ok_or_else(|| {
                ArError::Calibration(format!("unexpected file size of {} bytes", bytes.len()))
            })?;

        let mut reader = BigEndianReader { bytes, offset: 0 };
        let xsize = reader.read_i32();
        let ysize = reader.read_i32();
        if xsize <= 0 || ysize <= 0 {
            return Err(ArError::Calibration(format!(
                "invalid image size {}x{}",
                xsize, ysize
            )));
        }

        let mut mat = [[0.0; 4]; 3];
        for row in mat.iter_mut() {
            for value in row.iter_mut() {
                *value = reader.read_f64();
            }
        }

        let dist_factor = (0..factor_count).map(|_| reader.read_f64()).collect();

        let params = Self {
            xsize: xsize as u32,
            ysize: ysize as u32,
            mat,
            dist_factor,
        };

        let scale = params.mat[2][2];
        if !scale.is_finite() || scale.abs() < f64::EPSILON {
            return Err(ArError::Calibration("camera matrix has no scale".into()));
        }
        let k = params.intrinsics();
        if k.fx.abs() < f64::EPSILON || k.fy.abs() < f64::EPSILON {
            return Err(ArError::Calibration("camera matrix has a zero focal length".into()));
        }

        Ok(params)
    }

    /// Serializes into the ARToolKit layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + MATRIX_LEN + self.dist_factor.len() * 8);
        bytes.extend_from_slice(&(self.xsize as i32).to_be_bytes());
        bytes.extend_from_slice(&(self.ysize as i32).to_be_bytes());
        for value in self.mat.iter().flatten().chain(self.dist_factor.iter()) {
            bytes.extend_from_slice(&value.to_be_bytes());
        }
        bytes
    }

    /// Builds a distortion-free calibration from pinhole intrinsics
    pub fn from_intrinsics(xsize: u32, ysize: u32, k: Intrinsics) -> Self {
        Self {
            xsize,
            ysize,
            mat: [
                [k.fx, k.skew, k.cx, 0.0],
                [0.0, k.fy, k.cy, 0.0],
                [0.0, 0.0, 1.0, 0.0],
            ],
            dist_factor: vec![k.cx, k.cy, 0.0, 1.0],
        }
    }

    pub fn intrinsics(&self) -> Intrinsics {
        let s = self.mat[2][2];
        Intrinsics {
            fx: self.mat[0][0] / s,
            fy: self.mat[1][1] / s,
            cx: self.mat[0][2] / s,
            cy: self.mat[1][2] / s,
            skew: self.mat[0][1] / s,
        }
    }

    /// Rescales the calibration to a different frame size
    pub fn scaled_to(&self, width: u32, height: u32) -> Self {
        let sx = width as f64 / self.xsize as f64;
        let sy = height as f64 / self.ysize as f64;

        let mut mat = self.mat;
        for value in mat[0].iter_mut() {
            *value *= sx;
        }
        for value in mat[1].iter_mut() {
            *value *= sy;
        }

        Self {
            xsize: width,
            ysize: height,
            mat,
            dist_factor: self.dist_factor.clone(),
        }
    }

    /// Projection matrix matching the calibrated camera
    ///
    /// Right-handed view space looking down -Z, clip depth in `0..1`.
    /// A point projects to the same pixel the calibrated camera would image
    /// it at, with pixel rows growing downwards.
    pub fn projection_matrix(&self, near: f32, far: f32) -> Matrix4<f32> {
        let k = self.intrinsics();
        let w = self.xsize as f64;
        let h = self.ysize as f64;
        let (near, far) = (near as f64, far as f64);

        let c0 = Vector4::new((2.0 * k.fx / w) as f32, 0.0, 0.0, 0.0);
        let c1 = Vector4::new((-2.0 * k.skew / w) as f32, (2.0 * k.fy / h) as f32, 0.0, 0.0);
        let c2 = Vector4::new(
            (1.0 - 2.0 * k.cx / w) as f32,
            (2.0 * k.cy / h - 1.0) as f32,
            (far / (near - far)) as f32,
            -1.0,
        );
        let c3 = Vector4::new(0.0, 0.0, (far * near / (near - far)) as f32, 0.0);

        Matrix4::from_cols(c0, c1, c2, c3)
    }
}

struct BigEndianReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl BigEndianReader<'_> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[self.offset..self.offset + N]);
        self.offset += N;
        out
    }

    fn read_i32(&mut self) -> i32 {
        i32::from_be_bytes(self.take())
    }

    fn read_f64(&mut self) -> f64 {
        f64::from_be_bytes(self.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CameraParameters {
        CameraParameters::from_intrinsics(
            640,
            480,
            Intrinsics {
                fx: 560.0,
                fy: 550.0,
                cx: 318.0,
                cy: 242.0,
                skew: 0.0,
            },
        )
    }

    #[test]
    fn test_parse_round_trips_binary_layout() {
        let params = sample();
        let bytes = params.to_bytes();
        assert_eq!(bytes.len(), 136);

        let parsed = CameraParameters::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, params);
    }

    #[test]
    fn test_rejects_truncated_file() {
        let bytes = sample().to_bytes();
        let err = CameraParameters::from_bytes(&bytes[..100]).unwrap_err();
        assert!(matches!(err, ArError::Calibration(_)));
    }

    #[test]
    fn test_scaled_to_halves_intrinsics() {
        let half = sample().scaled_to(320, 240);
        let k = half.intrinsics();
        assert_eq!((half.xsize, half.ysize), (320, 240));
        assert_eq!(k.fx, 280.0);
        assert_eq!(k.fy, 275.0);
        assert_eq!(k.cx, 159.0);
        assert_eq!(k.cy, 121.0);
    }

    #[test]
    fn test_projection_matches_pinhole_model() {
        let params = sample();
        let k = params.intrinsics();
        let projection = params.projection_matrix(0.1, 1000.0);

        // View space point, camera looking down -Z with Y up
        let (x, y, z) = (0.3_f64, -0.2_f64, -2.5_f64);
        let clip = projection * Vector4::new(x as f32, y as f32, z as f32, 1.0);
        let ndc_x = (clip.x / clip.w) as f64;
        let ndc_y = (clip.y / clip.w) as f64;
        let u = (ndc_x + 1.0) * 0.5 * 640.0;
        let v = (1.0 - ndc_y) * 0.5 * 480.0;

        let depth = -z;
        let expected_u = k.fx * x / depth + k.cx;
        let expected_v = k.fy * -y / depth + k.cy;
        assert!((u - expected_u).abs() < 1e-2, "u {} vs {}", u, expected_u);
        assert!((v - expected_v).abs() < 1e-2, "v {} vs {}", v, expected_v);
    }

    #[test]
    fn test_projection_depth_range() {
        let projection = sample().projection_matrix(0.1, 1000.0);
        let near = projection * Vector4::new(0.0, 0.0, -0.1, 1.0);
        let far = projection * Vector4::new(0.0, 0.0, -1000.0, 1.0);
        assert!((near.z / near.w).abs() < 1e-4);
        assert!((far.z / far.w - 1.0).abs() < 1e-4);
    }
}
