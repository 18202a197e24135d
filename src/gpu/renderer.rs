// ============================================================================
// SCENE RENDERER — per-frame orchestration, readback and mask extraction
// ============================================================================
//
// One frame:
//   1. synchronise the texture cache with the scene (uploads land here)
//   2. plan the frame (pure, see plan.rs)
//   3. write every uniform / point buffer
//   4. mask pass   → scratch target: clear white, strokes
//   5. main pass   → frame target:   grid, images, outlines, mask composite,
//                                    brush cursor
//   6. copy the frame target to a staging buffer and read it back
//
// The whole frame runs inside a validation error scope. Errors found there
// are logged and the frame is still returned; they never abort the app.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::cache::{SyncReport, TextureCache};
use super::context::GpuContext;
use super::loader::{ImageLoader, Preview, UrlResolver};
use super::mask::{MaskCompositePass, StrokePass, StrokeTarget};
use super::passes::{
    BrushPass, DEPTH_FORMAT, DrawState, GridPass, ImagePass, SelectionPass, SharedLayouts, UniformBinding, checked,
};
use super::plan::{FramePlan, ImageSource, ViewUniforms};
use super::texture::{MipmapPipeline, SceneTexture, TEXTURE_FORMAT};
use crate::error::{RenderError, SceneError};
use crate::geometry::ViewTransform;
use crate::scene::{ElementId, Scene};
use crate::schedule::FrameScheduler;

/// A read-back frame, tightly packed RGBA8, top row first.
#[derive(Clone, Copy, Debug)]
pub struct Frame<'a> {
    pub width: u32,
    pub height: u32,
    pub pixels: &'a [u8],
}

/// Extracted element crop. Colour channels carry the composited images;
/// alpha is the mask (0 where painted).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaskImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl MaskImage {
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y * self.width + x) * 4) as usize;
        self.pixels.get(i..i + 4).and_then(|p| p.try_into().ok())
    }

    pub fn into_image(self) -> Option<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.pixels)
    }
}

/// What the last `render` drew.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub textured: usize,
    pub placeholders: usize,
    pub outlines: usize,
    pub stroke_draws: usize,
    pub segments: u32,
    pub brush: bool,
    pub pipeline_switches: u32,
}

/// Offscreen colour target with an optional depth attachment.
struct RenderTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    depth: Option<wgpu::TextureView>,
    width: u32,
    height: u32,
}

impl RenderTarget {
    fn new(device: &wgpu::Device, width: u32, height: u32, with_depth: bool, label: &str) -> Self {
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let depth = with_depth.then(|| {
            device
                .create_texture(&wgpu::TextureDescriptor {
                    label: Some("frame_depth"),
                    size,
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: DEPTH_FORMAT,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                    view_formats: &[],
                })
                .create_view(&wgpu::TextureViewDescriptor::default())
        });
        Self {
            texture,
            view,
            depth,
            width,
            height,
        }
    }
}

pub struct SceneRenderer {
    ctx: GpuContext,
    layouts: SharedLayouts,
    mipmaps: MipmapPipeline,
    image_sampler: wgpu::Sampler,
    placeholder: SceneTexture,
    display_view: UniformBinding,
    extract_view: UniformBinding,
    grid: GridPass,
    images: ImagePass,
    selection: SelectionPass,
    brush: BrushPass,
    strokes: StrokePass,
    composite: MaskCompositePass,
    frame_target: Option<RenderTarget>,
    /// Cached staging buffer for readback, reused while large enough.
    staging: Option<(wgpu::Buffer, u64)>,
    cache: TextureCache<SceneTexture>,
    resolver: UrlResolver,
    preview: Preview,
    scheduler: FrameScheduler,
    frame: Vec<u8>,
    last_stats: FrameStats,
}

impl SceneRenderer {
    /// Acquire a device and build every pass. Any failure here means the
    /// canvas is unavailable (`RenderError::is_construction`).
    pub fn new(
        preferred_gpu: &str,
        resolver: UrlResolver,
        loader: Arc<dyn ImageLoader>,
        scheduler: FrameScheduler,
    ) -> Result<Self, RenderError> {
        let ctx = GpuContext::new(preferred_gpu)?;
        Self::with_context(ctx, resolver, loader, scheduler)
    }

    pub fn with_context(
        ctx: GpuContext,
        resolver: UrlResolver,
        loader: Arc<dyn ImageLoader>,
        scheduler: FrameScheduler,
    ) -> Result<Self, RenderError> {
        let device = &ctx.device;
        device.on_uncaptured_error(Box::new(|err: wgpu::Error| error!("uncaptured GPU error: {err}")));

        let layouts = SharedLayouts::new(device);
        let mipmaps = checked(device, "mipmap pipeline", || MipmapPipeline::new(device))?;
        let grid = checked(device, "grid pass", || GridPass::new(device, &layouts))?;
        let images = checked(device, "image pass", || ImagePass::new(device, &layouts))?;
        let selection = checked(device, "selection pass", || SelectionPass::new(device, &layouts))?;
        let brush = checked(device, "brush pass", || BrushPass::new(device, &layouts))?;
        let strokes = checked(device, "stroke pass", || StrokePass::new(device, &layouts))?;
        let composite = checked(device, "mask composite pass", || MaskCompositePass::new(device, &layouts))?;

        let placeholder_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("placeholder_sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let image_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("image_sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let placeholder = checked(device, "placeholder texture", || {
            SceneTexture::checkerboard(device, &ctx.queue, &layouts.texture, &placeholder_sampler, &mipmaps)
        })?;

        let identity = ViewUniforms::new(ViewTransform::IDENTITY, 1, 1);
        let display_view = UniformBinding::new(device, &layouts.uniform, "display_view", &identity);
        let extract_view = UniformBinding::new(device, &layouts.uniform, "extract_view", &identity);

        info!(adapter = %ctx.adapter_name, "scene renderer ready");

        Ok(Self {
            layouts,
            mipmaps,
            image_sampler,
            placeholder,
            display_view,
            extract_view,
            grid,
            images,
            selection,
            brush,
            strokes,
            composite,
            frame_target: None,
            staging: None,
            cache: TextureCache::new(loader, scheduler.clone()),
            resolver,
            preview: Preview::default(),
            scheduler,
            frame: Vec::new(),
            last_stats: FrameStats::default(),
            ctx,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.ctx.adapter_name
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    pub fn resolver(&self) -> &UrlResolver {
        &self.resolver
    }

    pub fn last_stats(&self) -> FrameStats {
        self.last_stats
    }

    pub fn has_texture(&self, id: ElementId) -> bool {
        self.cache.has_texture(id)
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    pub fn mask_target_size(&self) -> Option<(u32, u32)> {
        self.composite.target().map(|t| (t.width, t.height))
    }

    // ========================================================================
    // EXTERNAL CONTROLS
    // ========================================================================

    pub fn request_render(&self) {
        self.scheduler.request_render();
    }

    /// Drop every cached texture; the next frame reloads what it needs.
    pub fn clear_texture_cache(&mut self) {
        self.cache.clear();
        self.request_render();
    }

    /// Live preview image for the generating element (`None` to stop).
    pub fn set_preview_url(&mut self, url: Option<String>) {
        if self.preview.url != url {
            self.preview.url = url;
            self.request_render();
        }
    }

    pub fn set_generator_id(&mut self, id: Option<ElementId>) {
        if self.preview.generator_id != id {
            self.preview.generator_id = id;
            self.request_render();
        }
    }

    /// Image paths are user-scoped, so switching users invalidates the cache.
    pub fn set_user(&mut self, user: &str) {
        if self.resolver.user != user {
            info!(user, "switching image user");
            self.resolver.user = user.to_string();
            self.clear_texture_cache();
        }
    }

    pub fn set_server_url(&mut self, base_url: &str) {
        if self.resolver.base_url != base_url {
            self.resolver.base_url = base_url.to_string();
            self.clear_texture_cache();
        }
    }

    /// Start loads for the scene without drawing.
    pub fn prefetch(&mut self, scene: &Scene) -> SyncReport {
        self.synchronize(scene)
    }

    /// Block until in-flight loads finish or `timeout` passes. Finished
    /// loads are applied on the next `render` / `generate_mask`.
    pub fn wait_for_textures(&mut self, timeout: Duration) -> bool {
        let pending = self.cache.in_flight();
        self.cache.wait_for_loads(pending, timeout) == pending
    }

    fn synchronize(&mut self, scene: &Scene) -> SyncReport {
        let ctx = &self.ctx;
        let layouts = &self.layouts;
        let sampler = &self.image_sampler;
        let mipmaps = &self.mipmaps;
        self.cache.synchronize(scene.elements(), &self.resolver, &self.preview, |id, image| {
            if !ctx.supports_size(image.width, image.height) {
                warn!(%id, image.width, image.height, "image too large for GPU, keeping placeholder");
                return None;
            }
            Some(SceneTexture::new(
                &ctx.device,
                &ctx.queue,
                &layouts.texture,
                sampler,
                image.width,
                image.height,
                &image.pixels,
                Some(mipmaps),
            ))
        })
    }

    // ========================================================================
    // FRAME
    // ========================================================================

    /// Render one frame of `scene` at `width` x `height` physical pixels.
    pub fn render(&mut self, scene: &Scene, width: u32, height: u32) -> Result<Frame<'_>, RenderError> {
        if !self.ctx.supports_size(width, height) {
            return Err(RenderError::IncompleteTarget {
                width,
                height,
                reason: "viewport size not supported by the device".into(),
            });
        }

        self.synchronize(scene);
        let cache = &self.cache;
        let plan = FramePlan::display(scene, width, height, |id| cache.has_texture(id));

        self.ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let result = self.encode_frame(&plan);
        if let Some(err) = pollster::block_on(self.ctx.device.pop_error_scope()) {
            error!("{}", RenderError::Frame(err.to_string()));
        }
        let pixels = result?;
        self.frame = pixels;
        Ok(Frame {
            width,
            height,
            pixels: &self.frame,
        })
    }

    fn encode_frame(&mut self, plan: &FramePlan) -> Result<Vec<u8>, RenderError> {
        let (width, height) = (plan.width, plan.height);
        let device = &self.ctx.device;
        let queue = &self.ctx.queue;

        if self.frame_target.as_ref().is_none_or(|t| t.width != width || t.height != height) {
            debug!(width, height, "frame target resized");
            self.frame_target = None;
            self.frame_target = Some(RenderTarget::new(device, width, height, true, "frame_target"));
        }
        self.composite.ensure_target(device, &self.layouts, width, height);

        self.display_view.write(queue, &plan.view);
        self.grid.prepare(queue, &plan.grid);
        self.images.prepare(device, queue, &self.layouts, &plan.images);
        self.selection.prepare(device, queue, &self.layouts, &plan.outlines);
        if let Some(brush) = &plan.brush {
            self.brush.prepare(queue, brush);
        }
        self.strokes.prepare(device, queue, &plan.points);

        let (Some(target), Some(mask)) = (&self.frame_target, self.composite.target()) else {
            return Err(RenderError::IncompleteTarget {
                width,
                height,
                reason: "frame targets missing".into(),
            });
        };
        let view = &self.display_view.bind_group;

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame_encoder"),
        });

        let mut mask_state = DrawState::new();
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("mask_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &mask.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::WHITE),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            self.strokes
                .draw(&mut pass, &mut mask_state, view, &plan.strokes, StrokeTarget::Mask);
        }

        let mut state = DrawState::new();
        {
            let Some(depth) = &target.depth else {
                return Err(RenderError::IncompleteTarget {
                    width,
                    height,
                    reason: "frame target has no depth attachment".into(),
                });
            };
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("main_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Discard,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            self.grid.draw(&mut pass, &mut state);

            let cache = &self.cache;
            let placeholder = &self.placeholder;
            self.images.draw(&mut pass, &mut state, view, &plan.images, false, |source| match source {
                ImageSource::Texture(id) => cache.texture(id).map(|t| &t.bind_group),
                ImageSource::Placeholder => Some(&placeholder.bind_group),
            });

            self.selection.draw(&mut pass, &mut state, view, plan.outlines.len());
            self.composite.draw(&mut pass, &mut state);
            if plan.brush.is_some() {
                self.brush.draw(&mut pass, &mut state, view);
            }
        }
        self.ctx.submit_one(encoder);

        self.last_stats = FrameStats {
            textured: plan.images.iter().filter(|d| d.source != ImageSource::Placeholder).count(),
            placeholders: plan.images.iter().filter(|d| d.source == ImageSource::Placeholder).count(),
            outlines: plan.outlines.len(),
            stroke_draws: plan.strokes.len(),
            segments: plan.segment_count(),
            brush: plan.brush.is_some(),
            pipeline_switches: mask_state.switches() + state.switches(),
        };

        readback_texture(&self.ctx, &target.texture, width, height, &mut self.staging)
    }

    // ========================================================================
    // MASK EXTRACTION
    // ========================================================================

    /// Render element `id`'s box 1:1 into an offscreen target: textured
    /// elements in colour, then every stroke into alpha only.
    ///
    /// wgpu textures have a top-left origin, so row 0 of the result is the
    /// element's top edge without any flip.
    pub fn generate_mask(&mut self, scene: &Scene, id: ElementId) -> Result<MaskImage, RenderError> {
        let element = scene.element(id).ok_or(SceneError::UnknownElement(id))?;
        let bounds = element.bounds();
        let (w, h) = (bounds.width.round(), bounds.height.round());
        let width = if w.is_finite() && w >= 1.0 { w as u32 } else { 0 };
        let height = if h.is_finite() && h >= 1.0 { h as u32 } else { 0 };
        if !self.ctx.supports_size(width, height) {
            let err = RenderError::IncompleteTarget {
                width,
                height,
                reason: format!("element size {}x{} cannot back a render target", bounds.width, bounds.height),
            };
            error!(%id, "mask extraction failed: {err}");
            return Err(err);
        }

        self.synchronize(scene);
        let cache = &self.cache;
        let plan = FramePlan::mask_extraction(scene, bounds, width, height, |id| cache.has_texture(id));

        self.ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let result = self.encode_extraction(&plan);
        let scope = pollster::block_on(self.ctx.device.pop_error_scope());

        let pixels = match (result, scope) {
            (Ok(pixels), None) => pixels,
            (_, Some(err)) => {
                let err = RenderError::IncompleteTarget {
                    width,
                    height,
                    reason: err.to_string(),
                };
                error!(%id, "mask extraction failed: {err}");
                return Err(err);
            }
            (Err(err), None) => {
                error!(%id, "mask extraction failed: {err}");
                return Err(err);
            }
        };

        info!(%id, width, height, "mask extracted");
        Ok(MaskImage { width, height, pixels })
    }

    fn encode_extraction(&mut self, plan: &FramePlan) -> Result<Vec<u8>, RenderError> {
        let device = &self.ctx.device;
        let queue = &self.ctx.queue;
        let target = RenderTarget::new(device, plan.width, plan.height, false, "mask_extraction_target");

        self.extract_view.write(queue, &plan.view);
        self.images.prepare(device, queue, &self.layouts, &plan.images);
        self.strokes.prepare(device, queue, &plan.points);

        let view = &self.extract_view.bind_group;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("mask_extraction_encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("mask_extraction_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            let mut state = DrawState::new();
            let cache = &self.cache;
            self.images.draw(&mut pass, &mut state, view, &plan.images, true, |source| match source {
                ImageSource::Texture(id) => cache.texture(id).map(|t| &t.bind_group),
                ImageSource::Placeholder => None,
            });
            self.strokes
                .draw(&mut pass, &mut state, view, &plan.strokes, StrokeTarget::AlphaOnly);
        }
        self.ctx.submit_one(encoder);

        readback_texture(&self.ctx, &target.texture, plan.width, plan.height, &mut self.staging)
    }
}

impl Drop for SceneRenderer {
    fn drop(&mut self) {
        self.cache.clear();
        self.frame_target = None;
        self.staging = None;
        debug!("scene renderer released");
    }
}

// ============================================================================
// READBACK
// ============================================================================

fn aligned_bytes_per_row(width: u32) -> u32 {
    (width * 4).div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
}

/// Copy `texture` into the cached staging buffer and return tightly packed
/// RGBA rows.
fn readback_texture(
    ctx: &GpuContext,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
    cached_staging: &mut Option<(wgpu::Buffer, u64)>,
) -> Result<Vec<u8>, RenderError> {
    let device = &ctx.device;
    let bytes_per_row = aligned_bytes_per_row(width);
    let buffer_size = bytes_per_row as u64 * height as u64;

    if cached_staging.as_ref().is_none_or(|(_, size)| *size < buffer_size) {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_staging"),
            size: buffer_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        *cached_staging = Some((buffer, buffer_size));
    }
    let Some((staging, _)) = cached_staging.as_ref() else {
        return Err(RenderError::Readback("staging buffer unavailable".into()));
    };

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback_encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: staging,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    ctx.submit_one(encoder);

    let slice = staging.slice(..buffer_size);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    match rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(RenderError::Readback(format!("map failed: {e}"))),
        Err(e) => return Err(RenderError::Readback(format!("map callback dropped: {e}"))),
    }

    let mapped = slice.get_mapped_range();
    let row = (width * 4) as usize;
    let mut pixels = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        let start = y * bytes_per_row as usize;
        pixels.extend_from_slice(&mapped[start..start + row]);
    }
    drop(mapped);
    staging.unmap();

    Ok(pixels)
}
