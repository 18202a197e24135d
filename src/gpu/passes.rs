// ============================================================================
// SCENE PASSES — grid backdrop, element quads, selection outline, brush cursor
// ============================================================================
//
// Each pass owns its pipeline(s) and uniform buffers. Uniforms are written in
// a `prepare` step before the encoder opens a render pass; `draw` only records
// commands. Per-draw uniform slots are grown lazily and reused across frames
// via `queue.write_buffer()`.
//
// Bind groups:
//   group 0 — `View` (grid: its own `GridUniforms`)
//   group 1 — per-draw uniforms
//   group 2 — texture + sampler (image pass only)

use std::marker::PhantomData;

use bytemuck::Pod;
use tracing::debug;
use wgpu::util::DeviceExt;

use super::plan::{BrushUniforms, GridUniforms, ImageDraw, ImageSource, OutlineDraw, QuadUniforms};
use super::texture::TEXTURE_FORMAT;
use crate::error::RenderError;

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

// ============================================================================
// SHARED LAYOUTS & UNIFORM STORAGE
// ============================================================================

/// Bind group layouts shared by every pass.
pub struct SharedLayouts {
    /// One uniform buffer at binding 0.
    pub uniform: wgpu::BindGroupLayout,
    /// Filterable 2D texture at binding 0, sampler at binding 1.
    pub texture: wgpu::BindGroupLayout,
}

impl SharedLayouts {
    pub fn new(device: &wgpu::Device) -> Self {
        let uniform = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform_bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let texture = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("texture_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        Self { uniform, texture }
    }
}

/// A uniform buffer and the bind group exposing it.
pub struct UniformBinding {
    pub buffer: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
}

impl UniformBinding {
    pub fn new<U: Pod>(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, label: &str, value: &U) -> Self {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::bytes_of(value),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        Self { buffer, bind_group }
    }

    pub fn write<U: Pod>(&self, queue: &wgpu::Queue, value: &U) {
        queue.write_buffer(&self.buffer, 0, bytemuck::bytes_of(value));
    }
}

/// One uniform slot per draw, grown to the largest draw count seen.
pub struct UniformSlots<U> {
    label: &'static str,
    slots: Vec<UniformBinding>,
    _marker: PhantomData<U>,
}

impl<U: Pod> UniformSlots<U> {
    pub fn new(label: &'static str) -> Self {
        Self { label, slots: Vec::new(), _marker: PhantomData }
    }

    pub fn upload(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        layout: &wgpu::BindGroupLayout,
        values: impl IntoIterator<Item = U>,
    ) {
        for (i, value) in values.into_iter().enumerate() {
            if i < self.slots.len() {
                self.slots[i].write(queue, &value);
            } else {
                self.slots.push(UniformBinding::new(device, layout, self.label, &value));
            }
        }
    }

    pub fn bind_group(&self, index: usize) -> Option<&wgpu::BindGroup> {
        self.slots.get(index).map(|slot| &slot.bind_group)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

// ============================================================================
// PROGRAM BINDING CACHE
// ============================================================================

/// Programs a render pass can switch between.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassId {
    Grid,
    Image,
    ImageOffscreen,
    Selection,
    MaskComposite,
    Brush,
    StrokeMask,
    StrokeAlpha,
}

/// Tracks the pipeline bound in the current render pass so consecutive
/// draws of the same program skip `set_pipeline` and the group-0 rebind.
#[derive(Debug, Default)]
pub struct DrawState {
    current: Option<PassId>,
    switches: u32,
}

impl DrawState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when `id` is not already bound; the caller must then set
    /// its pipeline and group 0.
    pub fn bind(&mut self, id: PassId) -> bool {
        if self.current == Some(id) {
            return false;
        }
        self.current = Some(id);
        self.switches += 1;
        true
    }

    pub fn current(&self) -> Option<PassId> {
        self.current
    }

    /// Number of pipeline switches recorded so far.
    pub fn switches(&self) -> u32 {
        self.switches
    }
}

// ============================================================================
// PIPELINE CONSTRUCTION HELPERS
// ============================================================================

pub(crate) struct PipelineDesc<'a> {
    pub label: &'static str,
    pub shader: &'a wgpu::ShaderModule,
    pub layouts: &'a [&'a wgpu::BindGroupLayout],
    pub buffers: &'a [wgpu::VertexBufferLayout<'a>],
    pub blend: Option<wgpu::BlendState>,
    pub write_mask: wgpu::ColorWrites,
    pub depth: Option<wgpu::DepthStencilState>,
}

pub(crate) fn shader_module(device: &wgpu::Device, label: &'static str, source: &'static str) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    })
}

pub(crate) fn build_pipeline(device: &wgpu::Device, desc: PipelineDesc<'_>) -> wgpu::RenderPipeline {
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(desc.label),
        bind_group_layouts: desc.layouts,
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(desc.label),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: desc.shader,
            entry_point: "vs_main",
            buffers: desc.buffers,
            compilation_options: Default::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: desc.depth,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: desc.shader,
            entry_point: "fs_main",
            targets: &[Some(wgpu::ColorTargetState {
                format: TEXTURE_FORMAT,
                blend: desc.blend,
                write_mask: desc.write_mask,
            })],
            compilation_options: Default::default(),
        }),
        multiview: None,
    })
}

pub(crate) fn depth_state(write: bool, compare: wgpu::CompareFunction) -> Option<wgpu::DepthStencilState> {
    Some(wgpu::DepthStencilState {
        format: DEPTH_FORMAT,
        depth_write_enabled: write,
        depth_compare: compare,
        stencil: wgpu::StencilState::default(),
        bias: wgpu::DepthBiasState::default(),
    })
}

/// Overlay drawn inside the depth-attached main pass without touching depth.
pub(crate) fn overlay_depth() -> Option<wgpu::DepthStencilState> {
    depth_state(false, wgpu::CompareFunction::Always)
}

/// Run `build` inside a validation error scope so a bad shader or layout
/// comes back as `RenderError::Pipeline` instead of a device panic.
pub fn checked<T>(device: &wgpu::Device, label: &'static str, build: impl FnOnce() -> T) -> Result<T, RenderError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = build();
    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => Err(RenderError::Pipeline {
            label,
            message: err.to_string(),
        }),
        None => {
            debug!(label, "pipeline ready");
            Ok(value)
        }
    }
}

// ============================================================================
// GRID PASS
// ============================================================================

/// Fullscreen triangle at far depth; writes depth so everything else is
/// tested against it.
pub struct GridPass {
    pipeline: wgpu::RenderPipeline,
    uniforms: UniformBinding,
}

impl GridPass {
    pub fn new(device: &wgpu::Device, layouts: &SharedLayouts) -> Self {
        let shader = shader_module(device, "grid_shader", super::shaders::GRID_SHADER);
        let pipeline = build_pipeline(
            device,
            PipelineDesc {
                label: "grid_pipeline",
                shader: &shader,
                layouts: &[&layouts.uniform],
                buffers: &[],
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
                depth: depth_state(true, wgpu::CompareFunction::LessEqual),
            },
        );
        let uniforms = UniformBinding::new(device, &layouts.uniform, "grid_uniforms", &GridUniforms { params: [0.0; 4] });
        Self { pipeline, uniforms }
    }

    pub fn prepare(&self, queue: &wgpu::Queue, grid: &GridUniforms) {
        self.uniforms.write(queue, grid);
    }

    pub fn draw<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>, state: &mut DrawState) {
        if state.bind(PassId::Grid) {
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.uniforms.bind_group, &[]);
        }
        pass.draw(0..3, 0..1);
    }
}

// ============================================================================
// IMAGE PASS
// ============================================================================

/// Element quads, drawn back-to-front with depth test and write. Blending is
/// off: texels land as stored, alpha included. The offscreen variant has no
/// depth attachment and is used for mask extraction.
pub struct ImagePass {
    main: wgpu::RenderPipeline,
    offscreen: wgpu::RenderPipeline,
    slots: UniformSlots<QuadUniforms>,
}

impl ImagePass {
    pub fn new(device: &wgpu::Device, layouts: &SharedLayouts) -> Self {
        let shader = shader_module(device, "image_shader", super::shaders::IMAGE_SHADER);
        let bgls = [&layouts.uniform, &layouts.uniform, &layouts.texture];
        let desc = |label: &'static str, depth: Option<wgpu::DepthStencilState>| PipelineDesc {
            label,
            shader: &shader,
            layouts: &bgls,
            buffers: &[],
            blend: None,
            write_mask: wgpu::ColorWrites::ALL,
            depth,
        };
        let main = build_pipeline(device, desc("image_pipeline", depth_state(true, wgpu::CompareFunction::LessEqual)));
        let offscreen = build_pipeline(device, desc("image_offscreen_pipeline", None));
        Self {
            main,
            offscreen,
            slots: UniformSlots::new("quad_uniforms"),
        }
    }

    pub fn prepare(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, layouts: &SharedLayouts, draws: &[ImageDraw]) {
        self.slots.upload(device, queue, &layouts.uniform, draws.iter().map(|d| d.uniforms));
    }

    /// `texture` maps each draw's source to its (texture, sampler) group;
    /// draws it cannot resolve are skipped.
    pub fn draw<'a>(
        &'a self,
        pass: &mut wgpu::RenderPass<'a>,
        state: &mut DrawState,
        view: &'a wgpu::BindGroup,
        draws: &[ImageDraw],
        offscreen: bool,
        texture: impl Fn(ImageSource) -> Option<&'a wgpu::BindGroup>,
    ) {
        let (id, pipeline) = if offscreen {
            (PassId::ImageOffscreen, &self.offscreen)
        } else {
            (PassId::Image, &self.main)
        };
        for (i, draw) in draws.iter().enumerate() {
            let (Some(uniforms), Some(texture)) = (self.slots.bind_group(i), texture(draw.source)) else {
                continue;
            };
            if state.bind(id) {
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, view, &[]);
            }
            pass.set_bind_group(1, uniforms, &[]);
            pass.set_bind_group(2, texture, &[]);
            pass.draw(0..6, 0..1);
        }
    }
}

// ============================================================================
// SELECTION PASS
// ============================================================================

/// Hover/selection outline with a constant on-screen border width.
pub struct SelectionPass {
    pipeline: wgpu::RenderPipeline,
    slots: UniformSlots<super::plan::OutlineUniforms>,
}

impl SelectionPass {
    pub fn new(device: &wgpu::Device, layouts: &SharedLayouts) -> Self {
        let shader = shader_module(device, "selection_shader", super::shaders::SELECTION_SHADER);
        let pipeline = build_pipeline(
            device,
            PipelineDesc {
                label: "selection_pipeline",
                shader: &shader,
                layouts: &[&layouts.uniform, &layouts.uniform],
                buffers: &[],
                blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
                depth: overlay_depth(),
            },
        );
        Self {
            pipeline,
            slots: UniformSlots::new("outline_uniforms"),
        }
    }

    pub fn prepare(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, layouts: &SharedLayouts, draws: &[OutlineDraw]) {
        self.slots.upload(device, queue, &layouts.uniform, draws.iter().map(|d| d.uniforms));
    }

    pub fn draw<'a>(
        &'a self,
        pass: &mut wgpu::RenderPass<'a>,
        state: &mut DrawState,
        view: &'a wgpu::BindGroup,
        count: usize,
    ) {
        for i in 0..count {
            let Some(uniforms) = self.slots.bind_group(i) else {
                break;
            };
            if state.bind(PassId::Selection) {
                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, view, &[]);
            }
            pass.set_bind_group(1, uniforms, &[]);
            pass.draw(0..6, 0..1);
        }
    }
}

// ============================================================================
// BRUSH CURSOR PASS
// ============================================================================

pub struct BrushPass {
    pipeline: wgpu::RenderPipeline,
    uniforms: UniformBinding,
}

impl BrushPass {
    pub fn new(device: &wgpu::Device, layouts: &SharedLayouts) -> Self {
        let shader = shader_module(device, "brush_shader", super::shaders::BRUSH_SHADER);
        let pipeline = build_pipeline(
            device,
            PipelineDesc {
                label: "brush_pipeline",
                shader: &shader,
                layouts: &[&layouts.uniform, &layouts.uniform],
                buffers: &[],
                blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
                depth: overlay_depth(),
            },
        );
        let zero = BrushUniforms { world: [0.0; 4], tc: [0.0; 4], params: [0.0; 4] };
        let uniforms = UniformBinding::new(device, &layouts.uniform, "brush_uniforms", &zero);
        Self { pipeline, uniforms }
    }

    pub fn prepare(&self, queue: &wgpu::Queue, brush: &BrushUniforms) {
        self.uniforms.write(queue, brush);
    }

    pub fn draw<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>, state: &mut DrawState, view: &'a wgpu::BindGroup) {
        if state.bind(PassId::Brush) {
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, view, &[]);
        }
        pass.set_bind_group(1, &self.uniforms.bind_group, &[]);
        pass.draw(0..6, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_state_skips_redundant_binds() {
        let mut state = DrawState::new();
        assert!(state.bind(PassId::Grid));
        assert!(state.bind(PassId::Image));
        assert!(!state.bind(PassId::Image));
        assert!(!state.bind(PassId::Image));
        assert!(state.bind(PassId::Selection));
        assert!(state.bind(PassId::Image));
        assert_eq!(state.switches(), 4);
        assert_eq!(state.current(), Some(PassId::Image));
    }

    #[test]
    fn uniform_sizes_are_sixteen_byte_multiples() {
        use super::super::plan::{OutlineUniforms, StrokeStyle, ViewUniforms};
        for size in [
            std::mem::size_of::<ViewUniforms>(),
            std::mem::size_of::<GridUniforms>(),
            std::mem::size_of::<QuadUniforms>(),
            std::mem::size_of::<OutlineUniforms>(),
            std::mem::size_of::<BrushUniforms>(),
            std::mem::size_of::<StrokeStyle>(),
        ] {
            assert_eq!(size % 16, 0, "uniform of {size} bytes");
        }
    }
}
