//! WGPU-based rendering engine
//!
//! Draws into a window surface in a single pass: the video background as a
//! fullscreen triangle without depth, then every visible mesh with depth
//! testing, coloured by its view-space normals.

use std::collections::HashMap;
use std::sync::Arc;

use wgpu::util::DeviceExt;
use wgpu::Device;

use super::pipeline_manager::{PipelineConfig, PipelineManager};
use super::{Background, ModelUniform, RenderView, Renderer, CLEAR_COLOR};
use crate::error::{ArError, Result};
use crate::gfx::{
    camera::CameraUniform,
    resources::texture_resource::TextureResource,
    scene::{Mesh, MeshId, MeshInstance},
};
use crate::wgpu_utils::{binding_types, UniformBuffer};

const BACKGROUND_PIPELINE: &str = "Background";
const NORMAL_PIPELINE: &str = "Normal";

/// Visible part of the video texture, matches `BackgroundParams` in the shader
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct BackgroundUniform {
    uv_min: [f32; 2],
    uv_max: [f32; 2],
}

struct VideoTexture {
    texture: TextureResource,
    bind_group: wgpu::BindGroup,
    serial: u64,
}

struct GpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

impl GpuMesh {
    fn new(device: &Device, mesh: &Mesh) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Mesh Vertex Buffer"),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Mesh Index Buffer"),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
        }
    }
}

struct ModelBinding {
    buffer: UniformBuffer<ModelUniform>,
    bind_group: wgpu::BindGroup,
}

/// Core rendering engine managing GPU resources and draw calls
pub struct RenderEngine {
    surface: wgpu::Surface<'static>,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    config: wgpu::SurfaceConfiguration,
    depth_texture: TextureResource,
    pipeline_manager: PipelineManager,

    camera_buffer: UniformBuffer<CameraUniform>,
    camera_bind_group: wgpu::BindGroup,

    model_layout: wgpu::BindGroupLayout,
    model_bindings: Vec<ModelBinding>,

    background_layout: wgpu::BindGroupLayout,
    background_params: UniformBuffer<BackgroundUniform>,
    video: Option<VideoTexture>,

    meshes: HashMap<MeshId, GpuMesh>,
}

impl RenderEngine {
    /// Creates a new render engine for the given window
    pub async fn new(
        window: impl Into<wgpu::SurfaceTarget<'static>>,
        width: u32,
        height: u32,
    ) -> Result<RenderEngine> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window)
            .map_err(|e| ArError::Gpu(format!("failed to create surface: {}", e)))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| ArError::Gpu(format!("no suitable adapter: {}", e)))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("WGPU Device"),
                required_features: wgpu::Features::default(),
                required_limits: wgpu::Limits {
                    max_texture_dimension_2d: 4096,
                    ..wgpu::Limits::downlevel_defaults()
                },
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| ArError::Gpu(format!("failed to request device: {}", e)))?;

        let surface_capabilities = surface.get_capabilities(&adapter);
        let format = surface_capabilities
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| surface_capabilities.formats.first().copied())
            .ok_or_else(|| ArError::Gpu("surface supports no formats".into()))?;

        // Prefer a mode that keeps the transparent clear colour
        let alpha_mode = [
            wgpu::CompositeAlphaMode::PreMultiplied,
            wgpu::CompositeAlphaMode::PostMultiplied,
        ]
        .into_iter()
        .find(|mode| surface_capabilities.alpha_modes.contains(mode))
        .or_else(|| surface_capabilities.alpha_modes.first().copied())
        .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let depth_texture =
            TextureResource::create_depth_texture(&device, &config, "depth_texture");

        let camera_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Camera Bind Group Layout"),
            entries: &[binding_types::entry(
                0,
                wgpu::ShaderStages::VERTEX,
                binding_types::uniform(),
            )],
        });
        let camera_buffer = UniformBuffer::new_with_data(&device, &CameraUniform::default());
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Camera Bind Group"),
            layout: &camera_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.binding_resource(),
            }],
        });

        let model_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Model Bind Group Layout"),
            entries: &[binding_types::entry(
                0,
                wgpu::ShaderStages::VERTEX,
                binding_types::uniform(),
            )],
        });

        let background_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Background Bind Group Layout"),
                entries: &[
                    binding_types::entry(
                        0,
                        wgpu::ShaderStages::FRAGMENT,
                        binding_types::texture_2d(),
                    ),
                    binding_types::entry(
                        1,
                        wgpu::ShaderStages::FRAGMENT,
                        binding_types::sampler(wgpu::SamplerBindingType::Filtering),
                    ),
                    binding_types::entry(
                        2,
                        wgpu::ShaderStages::VERTEX,
                        binding_types::uniform(),
                    ),
                ],
            });
        let background_params = UniformBuffer::new_with_data(
            &device,
            &BackgroundUniform {
                uv_min: [0.0, 0.0],
                uv_max: [1.0, 1.0],
            },
        );

        let color_targets = vec![Some(wgpu::ColorTargetState {
            format,
            blend: Some(wgpu::BlendState::REPLACE),
            write_mask: wgpu::ColorWrites::ALL,
        })];

        let device_handle: Arc<Device> = device.into();
        let queue_handle: Arc<wgpu::Queue> = queue.into();
        let mut pipeline_manager = PipelineManager::new(device_handle.clone());

        pipeline_manager.load_shader("background", include_str!("shaders/background.wgsl"));
        pipeline_manager.load_shader("normal", include_str!("shaders/normal.wgsl"));

        pipeline_manager.register_pipeline(
            BACKGROUND_PIPELINE,
            PipelineConfig::default()
                .with_label("BACKGROUND")
                .with_shader("background")
                .with_bind_group_layouts(vec![background_layout.clone()])
                .with_color_targets(color_targets.clone())
                .with_depth_stencil(TextureResource::DEPTH_FORMAT)
                .with_depth_ignored()
                .with_no_vertex_buffers(),
        );

        pipeline_manager.register_pipeline(
            NORMAL_PIPELINE,
            PipelineConfig::default()
                .with_label("NORMAL")
                .with_shader("normal")
                .with_bind_group_layouts(vec![camera_layout, model_layout.clone()])
                .with_color_targets(color_targets)
                .with_depth_stencil(TextureResource::DEPTH_FORMAT)
                .with_cull_mode(None),
        );

        pipeline_manager
            .create_all_pipelines()
            .map_err(|errors| ArError::Gpu(errors.join("; ")))?;

        log::info!(
            "Render engine ready: {}x{}, {:?}, alpha {:?}",
            config.width,
            config.height,
            format,
            alpha_mode
        );

        Ok(RenderEngine {
            surface,
            device: device_handle,
            queue: queue_handle,
            config,
            depth_texture,
            pipeline_manager,
            camera_buffer,
            camera_bind_group,
            model_layout,
            model_bindings: Vec::new(),
            background_layout,
            background_params,
            video: None,
            meshes: HashMap::new(),
        })
    }

    fn reconfigure(&mut self) {
        self.surface.configure(&self.device, &self.config);
        self.depth_texture =
            TextureResource::create_depth_texture(&self.device, &self.config, "depth_texture");
    }

    /// Uploads the background frame if it is new, recreating the texture on size changes
    fn upload_background(&mut self, background: &Background<'_>) {
        let frame = background.frame;
        let reuse = self
            .video
            .as_ref()
            .is_some_and(|video| video.texture.size() == frame.size());

        if !reuse {
            let texture = TextureResource::create_video_texture(
                &self.device,
                frame.width(),
                frame.height(),
                "video_texture",
            );
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Background Bind Group"),
                layout: &self.background_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&texture.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&texture.sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: self.background_params.binding_resource(),
                    },
                ],
            });
            texture.write_rgba(&self.queue, frame.pixels());
            log::debug!("Video texture created at {}x{}", frame.width(), frame.height());
            self.video = Some(VideoTexture {
                texture,
                bind_group,
                serial: background.serial,
            });
            return;
        }

        if let Some(video) = self.video.as_mut() {
            if video.serial != background.serial {
                video.texture.write_rgba(&self.queue, frame.pixels());
                video.serial = background.serial;
            }
        }
    }

    /// Makes sure every drawn mesh has buffers and a model binding
    fn prepare_meshes(&mut self, view: &RenderView<'_>, instances: &[MeshInstance]) {
        for instance in instances {
            if !self.meshes.contains_key(&instance.mesh) {
                if let Some(mesh) = view.scene.mesh(instance.mesh) {
                    self.meshes
                        .insert(instance.mesh, GpuMesh::new(&self.device, mesh));
                }
            }
        }

        while self.model_bindings.len() < instances.len() {
            let buffer = UniformBuffer::new_with_data(
                &self.device,
                &ModelUniform::new(cgmath::SquareMatrix::identity()),
            );
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Model Bind Group"),
                layout: &self.model_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.binding_resource(),
                }],
            });
            self.model_bindings.push(ModelBinding { buffer, bind_group });
        }

        for (binding, instance) in self.model_bindings.iter_mut().zip(instances) {
            binding
                .buffer
                .update_content(&self.queue, ModelUniform::new(instance.world));
        }
    }
}

impl Renderer for RenderEngine {
    /// Resizes the surface and recreates the depth buffer
    fn resize(&mut self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 || (width, height) == (self.config.width, self.config.height)
        {
            return false;
        }

        self.config.width = width;
        self.config.height = height;
        self.reconfigure();
        log::debug!("Surface resized to {}x{}", width, height);
        true
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn render(&mut self, view: &RenderView<'_>) -> Result<()> {
        let surface_texture = match self.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::warn!("Surface lost or outdated, reconfiguring");
                self.reconfigure();
                return Ok(());
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                return Err(ArError::Gpu("out of memory acquiring surface texture".into()));
            }
            Err(e) => {
                log::warn!("Skipping frame: {}", e);
                return Ok(());
            }
        };

        let surface_texture_view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        if let Some(background) = &view.background {
            self.upload_background(background);
        }
        let (uv_min, uv_max) = view.fit.uv_rect();
        self.background_params
            .update_content(&self.queue, BackgroundUniform { uv_min, uv_max });
        self.camera_buffer
            .update_content(&self.queue, view.camera.uniform(view.fit.clip_scale()));

        let instances = view.scene.visible_meshes();
        self.prepare_meshes(view, &instances);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        {
            let [r, g, b, a] = CLEAR_COLOR.map(f64::from);
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Main Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &surface_texture_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_texture.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            if let (Some(video), true) = (&self.video, view.background.is_some()) {
                if let Some(pipeline) = self.pipeline_manager.get_pipeline(BACKGROUND_PIPELINE) {
                    render_pass.set_pipeline(pipeline);
                    render_pass.set_bind_group(0, &video.bind_group, &[]);
                    render_pass.draw(0..3, 0..1);
                }
            }

            if let Some(pipeline) = self.pipeline_manager.get_pipeline(NORMAL_PIPELINE) {
                render_pass.set_pipeline(pipeline);
                render_pass.set_bind_group(0, &self.camera_bind_group, &[]);

                for (instance, binding) in instances.iter().zip(&self.model_bindings) {
                    let Some(mesh) = self.meshes.get(&instance.mesh) else {
                        continue;
                    };
                    render_pass.set_bind_group(1, &binding.bind_group, &[]);
                    render_pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                    render_pass
                        .set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                    render_pass.draw_indexed(0..mesh.index_count, 0, 0..1);
                }
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        surface_texture.present();
        Ok(())
    }
}
