// ============================================================================
// MASK — instanced stroke ribbons, mask scratch target, mask composite
// ============================================================================
//
// Strokes are drawn as one instanced draw per stroke. The ribbon mesh is a
// unit quad plus two half-disc caps; each instance is a segment whose two
// endpoints come from the same point buffer bound twice, the second binding
// offset by one point:
//
//   slot 0: ribbon mesh (per vertex)     location 0: vec3 pos
//   slot 1: points[..]  (per instance)   location 1: point0
//   slot 2: points[1..] (per instance)   location 2: point1
//
// With blending off, strokes overwrite in paint order: brush clears the mask
// (alpha 0), eraser restores it (alpha 1).

use std::f32::consts::PI;

use tracing::debug;
use wgpu::util::DeviceExt;

use super::passes::{
    DrawState, PassId, PipelineDesc, SharedLayouts, UniformBinding, build_pipeline, overlay_depth, shader_module,
};
use super::plan::{StrokeDraw, StrokeStyle};
use super::texture::{TEXTURE_FORMAT, texture_bind_group};
use crate::scene::Tool;

/// Triangles per round cap.
pub const CAP_SEGMENTS: usize = 16;
/// Vertices in the ribbon mesh: the body quad plus two caps.
pub const RIBBON_VERTEX_COUNT: u32 = (6 + 2 * CAP_SEGMENTS * 3) as u32;

const POINT_STRIDE: wgpu::BufferAddress = std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress;
const MIN_POINT_CAPACITY: u64 = 256;

const MESH_ATTRS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];
const POINT0_ATTRS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![1 => Float32x2];
const POINT1_ATTRS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![2 => Float32x2];

/// Ribbon mesh in segment space: x along the segment, y across it (both in
/// units of thickness), z selects the endpoint (0 = point0, 1 = point1).
pub fn ribbon_vertices() -> Vec<[f32; 3]> {
    let mut vertices = vec![
        [0.0, -0.5, 0.0],
        [0.0, -0.5, 1.0],
        [0.0, 0.5, 1.0],
        [0.0, -0.5, 0.0],
        [0.0, 0.5, 1.0],
        [0.0, 0.5, 0.0],
    ];
    // start cap sweeps the back half, end cap the front half
    for (start, z) in [(PI / 2.0, 0.0), (3.0 * PI / 2.0, 1.0)] {
        for i in 0..CAP_SEGMENTS {
            let a0 = start + PI * i as f32 / CAP_SEGMENTS as f32;
            let a1 = start + PI * (i + 1) as f32 / CAP_SEGMENTS as f32;
            vertices.push([0.0, 0.0, z]);
            vertices.push([0.5 * a0.cos(), 0.5 * a0.sin(), z]);
            vertices.push([0.5 * a1.cos(), 0.5 * a1.sin(), z]);
        }
    }
    vertices
}

/// Point capacity after growing to hold `needed` points.
pub fn grown_capacity(current: u64, needed: u64) -> u64 {
    if needed <= current {
        current
    } else {
        needed.next_power_of_two().max(MIN_POINT_CAPACITY)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrokeTarget {
    /// Display mask: full colour writes.
    Mask,
    /// Mask extraction: only the alpha channel is touched.
    AlphaOnly,
}

// ============================================================================
// STROKE PASS
// ============================================================================

pub struct StrokePass {
    mask: wgpu::RenderPipeline,
    alpha_only: wgpu::RenderPipeline,
    mesh: wgpu::Buffer,
    points: wgpu::Buffer,
    /// In points.
    capacity: u64,
    brush_style: UniformBinding,
    eraser_style: UniformBinding,
}

impl StrokePass {
    pub fn new(device: &wgpu::Device, layouts: &SharedLayouts) -> Self {
        let shader = shader_module(device, "stroke_shader", super::shaders::STROKE_SHADER);
        let buffers = [
            wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &MESH_ATTRS,
            },
            wgpu::VertexBufferLayout {
                array_stride: POINT_STRIDE,
                step_mode: wgpu::VertexStepMode::Instance,
                attributes: &POINT0_ATTRS,
            },
            wgpu::VertexBufferLayout {
                array_stride: POINT_STRIDE,
                step_mode: wgpu::VertexStepMode::Instance,
                attributes: &POINT1_ATTRS,
            },
        ];
        let bgls = [&layouts.uniform, &layouts.uniform];
        let desc = |label: &'static str, write_mask: wgpu::ColorWrites| PipelineDesc {
            label,
            shader: &shader,
            layouts: &bgls,
            buffers: &buffers,
            blend: None,
            write_mask,
            depth: None,
        };
        let mask = build_pipeline(device, desc("stroke_mask_pipeline", wgpu::ColorWrites::ALL));
        let alpha_only = build_pipeline(device, desc("stroke_alpha_pipeline", wgpu::ColorWrites::ALPHA));

        let mesh = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("ribbon_mesh"),
            contents: bytemuck::cast_slice(&ribbon_vertices()),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let capacity = MIN_POINT_CAPACITY;
        let points = Self::point_buffer(device, capacity);

        let brush_style = UniformBinding::new(device, &layouts.uniform, "brush_stroke_style", &StrokeStyle::for_tool(Tool::Brush));
        let eraser_style =
            UniformBinding::new(device, &layouts.uniform, "eraser_stroke_style", &StrokeStyle::for_tool(Tool::Eraser));

        Self {
            mask,
            alpha_only,
            mesh,
            points,
            capacity,
            brush_style,
            eraser_style,
        }
    }

    fn point_buffer(device: &wgpu::Device, capacity: u64) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("stroke_points"),
            size: capacity * POINT_STRIDE,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Upload every stroke point for this frame, growing the buffer if needed.
    pub fn prepare(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, points: &[[f32; 2]]) {
        let needed = points.len() as u64;
        let capacity = grown_capacity(self.capacity, needed);
        if capacity != self.capacity {
            debug!(from = self.capacity, to = capacity, "growing stroke point buffer");
            self.points = Self::point_buffer(device, capacity);
            self.capacity = capacity;
        }
        if !points.is_empty() {
            queue.write_buffer(&self.points, 0, bytemuck::cast_slice(points));
        }
    }

    fn style(&self, tool: Tool) -> &wgpu::BindGroup {
        match tool {
            Tool::Eraser => &self.eraser_style.bind_group,
            Tool::Brush | Tool::Select => &self.brush_style.bind_group,
        }
    }

    /// One instanced draw per stroke, in paint order.
    pub fn draw<'a>(
        &'a self,
        pass: &mut wgpu::RenderPass<'a>,
        state: &mut DrawState,
        view: &'a wgpu::BindGroup,
        strokes: &[StrokeDraw],
        target: StrokeTarget,
    ) {
        let (id, pipeline) = match target {
            StrokeTarget::Mask => (PassId::StrokeMask, &self.mask),
            StrokeTarget::AlphaOnly => (PassId::StrokeAlpha, &self.alpha_only),
        };
        let mut bound_tool = None;
        for stroke in strokes {
            if stroke.instances.is_empty() {
                continue;
            }
            if state.bind(id) {
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, view, &[]);
                pass.set_vertex_buffer(0, self.mesh.slice(..));
                pass.set_vertex_buffer(1, self.points.slice(..));
                pass.set_vertex_buffer(2, self.points.slice(POINT_STRIDE..));
                bound_tool = None;
            }
            if bound_tool != Some(stroke.tool) {
                pass.set_bind_group(1, self.style(stroke.tool), &[]);
                bound_tool = Some(stroke.tool);
            }
            pass.draw(0..RIBBON_VERTEX_COUNT, stroke.instances.clone());
        }
    }
}

// ============================================================================
// MASK TARGET
// ============================================================================

/// Viewport-sized scratch colour target the display strokes render into.
pub struct MaskTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    /// Samples this target in the composite pass.
    pub bind_group: wgpu::BindGroup,
    pub width: u32,
    pub height: u32,
}

impl MaskTarget {
    fn new(device: &wgpu::Device, layouts: &SharedLayouts, sampler: &wgpu::Sampler, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("mask_target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = texture_bind_group(device, &layouts.texture, &view, sampler, "mask_target_bg");
        Self {
            texture,
            view,
            bind_group,
            width,
            height,
        }
    }

    pub fn matches(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }
}

// ============================================================================
// MASK COMPOSITE PASS
// ============================================================================

/// Darkens the main target wherever the mask has been painted. Owns the
/// mask scratch target so it can rebind it after a resize.
pub struct MaskCompositePass {
    pipeline: wgpu::RenderPipeline,
    sampler: wgpu::Sampler,
    target: Option<MaskTarget>,
}

impl MaskCompositePass {
    pub fn new(device: &wgpu::Device, layouts: &SharedLayouts) -> Self {
        let shader = shader_module(device, "mask_composite_shader", super::shaders::MASK_COMPOSITE_SHADER);
        let pipeline = build_pipeline(
            device,
            PipelineDesc {
                label: "mask_composite_pipeline",
                shader: &shader,
                layouts: &[&layouts.texture],
                buffers: &[],
                blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
                depth: overlay_depth(),
            },
        );
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("mask_sampler"),
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        Self {
            pipeline,
            sampler,
            target: None,
        }
    }

    /// The scratch target at `width` x `height`, recreated when the size
    /// changed since the last frame.
    pub fn ensure_target(&mut self, device: &wgpu::Device, layouts: &SharedLayouts, width: u32, height: u32) -> &MaskTarget {
        if self.target.as_ref().is_some_and(|t| !t.matches(width, height)) {
            debug!(width, height, "mask target resized");
            // release the stale texture before allocating the new one
            self.target = None;
        }
        self.target
            .get_or_insert_with(|| MaskTarget::new(device, layouts, &self.sampler, width, height))
    }

    pub fn target(&self) -> Option<&MaskTarget> {
        self.target.as_ref()
    }

    pub fn draw<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>, state: &mut DrawState) {
        let Some(target) = &self.target else {
            return;
        };
        if state.bind(PassId::MaskComposite) {
            pass.set_pipeline(&self.pipeline);
        }
        pass.set_bind_group(0, &target.bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}
