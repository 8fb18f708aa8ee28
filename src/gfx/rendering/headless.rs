//! CPU renderer for running without a window
//!
//! Rasterizes into an RGBA8 buffer with a depth buffer, following the same
//! conventions as the GPU pipelines: clip depth in `0..1`, depth test `Less`,
//! no face culling, colour from the view-space normal.

use std::path::Path;

use cgmath::{Matrix4, Vector3, Vector4};
use image::{Rgba, RgbaImage};

use super::{ModelUniform, RenderView, Renderer, CLEAR_COLOR};
use crate::error::{ArError, Result};
use crate::gfx::scene::Vertex3D;
use crate::video::VideoFrame;

pub struct HeadlessRenderer {
    width: u32,
    height: u32,
    color: Vec<u8>,
    depth: Vec<f32>,
    frames_rendered: u64,
}

struct ScreenVertex {
    x: f32,
    y: f32,
    z: f32,
    normal: Vector3<f32>,
}

impl HeadlessRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        let mut renderer = Self {
            width: 0,
            height: 0,
            color: Vec::new(),
            depth: Vec::new(),
            frames_rendered: 0,
        };
        renderer.allocate(width, height);
        renderer
    }

    fn allocate(&mut self, width: u32, height: u32) {
        let len = width as usize * height as usize;
        self.width = width;
        self.height = height;
        self.color = vec![0; len * 4];
        self.depth = vec![1.0; len];
    }

    /// RGBA8 contents of the last frame, row major
    pub fn pixels(&self) -> &[u8] {
        &self.color
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.color[i],
            self.color[i + 1],
            self.color[i + 2],
            self.color[i + 3],
        ]
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn to_image(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width, self.height, |x, y| Rgba(self.pixel(x, y)))
    }

    /// Writes the last frame as a PNG file
    pub fn save_png(&self, path: &Path) -> Result<()> {
        self.to_image()
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|source| ArError::Image {
                path: path.to_path_buf(),
                source,
            })?;
        log::info!("Saved frame to {}", path.display());
        Ok(())
    }

    fn clear(&mut self) {
        let clear = CLEAR_COLOR.map(|c| (c * 255.0).round() as u8);
        for pixel in self.color.chunks_exact_mut(4) {
            pixel.copy_from_slice(&clear);
        }
        self.depth.fill(1.0);
    }

    /// Nearest-neighbour sampling of the visible part of the frame
    fn draw_background(&mut self, frame: &VideoFrame, uv_min: [f32; 2], uv_max: [f32; 2]) {
        let (fw, fh) = frame.size();
        for y in 0..self.height {
            let v = uv_min[1] + (y as f32 + 0.5) / self.height as f32 * (uv_max[1] - uv_min[1]);
            let sy = ((v * fh as f32) as i64).clamp(0, fh as i64 - 1) as u32;
            for x in 0..self.width {
                let u = uv_min[0] + (x as f32 + 0.5) / self.width as f32 * (uv_max[0] - uv_min[0]);
                let sx = ((u * fw as f32) as i64).clamp(0, fw as i64 - 1) as u32;

                let [r, g, b, _] = frame.pixel(sx, sy);
                let i = (y as usize * self.width as usize + x as usize) * 4;
                self.color[i..i + 4].copy_from_slice(&[r, g, b, 255]);
            }
        }
    }

    fn draw_mesh(
        &mut self,
        clip_from_model: Matrix4<f32>,
        model: &ModelUniform,
        vertices: &[Vertex3D],
        indices: &[u32],
    ) {
        let normal_matrix = Matrix4::from(model.normal_matrix);

        for triangle in indices.chunks_exact(3) {
            let mut screen = Vec::with_capacity(3);
            for &index in triangle {
                let Some(vertex) = vertices.get(index as usize) else {
                    break;
                };
                let p = vertex.position;
                let clip = clip_from_model * Vector4::new(p[0], p[1], p[2], 1.0);
                // Triangles crossing the camera plane are dropped rather than clipped
                if clip.w <= f32::EPSILON {
                    break;
                }
                let n = vertex.normal;
                let normal = (normal_matrix * Vector4::new(n[0], n[1], n[2], 0.0)).truncate();
                screen.push(ScreenVertex {
                    x: (clip.x / clip.w + 1.0) * 0.5 * self.width as f32,
                    y: (1.0 - clip.y / clip.w) * 0.5 * self.height as f32,
                    z: clip.z / clip.w,
                    normal,
                });
            }
            if let [a, b, c] = screen.as_slice() {
                self.fill_triangle(a, b, c);
            }
        }
    }

    fn fill_triangle(&mut self, a: &ScreenVertex, b: &ScreenVertex, c: &ScreenVertex) {
        let edge = |p: &ScreenVertex, q: &ScreenVertex, x: f32, y: f32| {
            (q.x - p.x) * (y - p.y) - (q.y - p.y) * (x - p.x)
        };
        let area = edge(a, b, c.x, c.y);
        if area.abs() < f32::EPSILON {
            return;
        }

        let min_x = a.x.min(b.x).min(c.x).floor().max(0.0) as u32;
        let min_y = a.y.min(b.y).min(c.y).floor().max(0.0) as u32;
        let max_x = (a.x.max(b.x).max(c.x).ceil().max(0.0) as u32).min(self.width);
        let max_y = (a.y.max(b.y).max(c.y).ceil().max(0.0) as u32).min(self.height);

        for y in min_y..max_y {
            for x in min_x..max_x {
                let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
                let w0 = edge(b, c, px, py) / area;
                let w1 = edge(c, a, px, py) / area;
                let w2 = edge(a, b, px, py) / area;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }

                let z = w0 * a.z + w1 * b.z + w2 * c.z;
                let i = y as usize * self.width as usize + x as usize;
                if !(0.0..=1.0).contains(&z) || z >= self.depth[i] {
                    continue;
                }
                self.depth[i] = z;

                let normal = a.normal * w0 + b.normal * w1 + c.normal * w2;
                let length = (normal.x * normal.x + normal.y * normal.y + normal.z * normal.z).sqrt();
                let normal = if length > 0.0 { normal / length } else { normal };
                let shade = |v: f32| ((v * 0.5 + 0.5).clamp(0.0, 1.0) * 255.0).round() as u8;
                self.color[i * 4..i * 4 + 4].copy_from_slice(&[
                    shade(normal.x),
                    shade(normal.y),
                    shade(normal.z),
                    255,
                ]);
            }
        }
    }
}

impl Renderer for HeadlessRenderer {
    fn resize(&mut self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 || (width, height) == (self.width, self.height) {
            return false;
        }
        self.allocate(width, height);
        log::debug!("Headless surface resized to {}x{}", width, height);
        true
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn render(&mut self, view: &RenderView<'_>) -> Result<()> {
        self.clear();

        if let Some(background) = view.background {
            let (uv_min, uv_max) = view.fit.uv_rect();
            self.draw_background(background.frame, uv_min, uv_max);
        }

        let clip_from_view = view.fit.clip_scale() * view.camera.projection();
        for instance in view.scene.visible_meshes() {
            let Some(mesh) = view.scene.mesh(instance.mesh) else {
                continue;
            };
            let model = ModelUniform::new(instance.world);
            self.draw_mesh(clip_from_view * instance.world, &model, &mesh.vertices, &mesh.indices);
        }

        self.frames_rendered += 1;
        log::trace!("Headless frame {} rendered", self.frames_rendered);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::camera::ArCamera;
    use crate::gfx::geometry::generate_cube;
    use crate::gfx::rendering::Background;
    use crate::gfx::scene::Scene;
    use crate::video::{fit_cover, DisplayFit, Viewport};

    fn perspective_camera() -> ArCamera {
        let mut camera = ArCamera::new();
        let proj = cgmath::perspective(cgmath::Deg(60.0), 1.0, 0.1, 100.0);
        // OpenGL depth (-1..1) to wgpu depth (0..1)
        let to_wgpu = Matrix4::from_translation(Vector3::new(0.0, 0.0, 0.5))
            * Matrix4::from_nonuniform_scale(1.0, 1.0, 0.5);
        camera.set_projection(to_wgpu * proj).unwrap();
        camera
    }

    fn view<'a>(scene: &'a Scene, camera: &'a ArCamera) -> RenderView<'a> {
        RenderView {
            scene,
            camera,
            fit: DisplayFit::identity(Viewport::new(64, 64)),
            background: None,
        }
    }

    #[test]
    fn test_empty_scene_is_transparent() {
        let mut renderer = HeadlessRenderer::new(64, 64);
        let scene = Scene::new();
        let camera = ArCamera::new();

        renderer.render(&view(&scene, &camera)).unwrap();
        assert!(renderer.pixels().chunks_exact(4).all(|p| p[3] == 0));
        assert_eq!(renderer.pixel(10, 10), [211, 211, 211, 0]);
    }

    #[test]
    fn test_cube_in_front_of_camera_is_drawn() {
        let mut renderer = HeadlessRenderer::new(64, 64);
        let mut scene = Scene::new();
        let cube = scene.add_mesh("cube", None, &generate_cube());
        scene.set_transform(cube, Matrix4::from_translation(Vector3::new(0.0, 0.0, -3.0)));
        let camera = perspective_camera();

        renderer.render(&view(&scene, &camera)).unwrap();
        // Front face normal is +Z, which shades as (128, 128, 255)
        assert_eq!(renderer.pixel(32, 32), [128, 128, 255, 255]);
        assert_eq!(renderer.pixel(0, 0)[3], 0);
    }

    #[test]
    fn test_hidden_mesh_is_not_drawn() {
        let mut renderer = HeadlessRenderer::new(64, 64);
        let mut scene = Scene::new();
        let anchor = scene.add_group("anchor", None);
        let cube = scene.add_mesh("cube", Some(anchor), &generate_cube());
        scene.set_transform(cube, Matrix4::from_translation(Vector3::new(0.0, 0.0, -3.0)));
        scene.set_visible(anchor, false);
        let camera = perspective_camera();

        renderer.render(&view(&scene, &camera)).unwrap();
        assert!(renderer.pixels().chunks_exact(4).all(|p| p[3] == 0));
    }

    #[test]
    fn test_background_is_cropped_to_cover() {
        // Left half black, right half white
        let mut frame = VideoFrame::filled(8, 4, [255, 255, 255, 255]);
        for y in 0..4 {
            for x in 0..4 {
                frame.set_pixel(x, y, [0, 0, 0, 255]);
            }
        }
        let mut renderer = HeadlessRenderer::new(4, 4);
        let scene = Scene::new();
        let camera = ArCamera::new();
        let background = Background {
            frame: &frame,
            serial: 0,
        };
        let view = RenderView {
            scene: &scene,
            camera: &camera,
            fit: fit_cover(frame.size(), Viewport::new(4, 4)),
            background: Some(background),
        };

        renderer.render(&view).unwrap();
        // The centre half of the frame fills the square surface
        assert_eq!(renderer.pixel(0, 0), [0, 0, 0, 255]);
        assert_eq!(renderer.pixel(1, 0), [0, 0, 0, 255]);
        assert_eq!(renderer.pixel(2, 0), [255, 255, 255, 255]);
        assert_eq!(renderer.pixel(3, 3), [255, 255, 255, 255]);
    }

    #[test]
    fn test_resize_is_idempotent() {
        let mut renderer = HeadlessRenderer::new(64, 64);
        assert!(renderer.resize(100, 50));
        assert!(!renderer.resize(100, 50));
        assert!(!renderer.resize(0, 50));
        assert_eq!(renderer.surface_size(), (100, 50));
        assert_eq!(renderer.pixels().len(), 100 * 50 * 4);
    }
}
