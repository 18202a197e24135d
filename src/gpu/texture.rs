// ============================================================================
// SCENE TEXTURE — sampled GPU texture for an element image or the placeholder
// ============================================================================

use super::passes::shader_module;
use super::plan::{CHECKER_SQUARE, CHECKER_TEXTURE_SIZE};

/// Colour-target format used for every texture the renderer creates.
pub const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// An uploaded RGBA8 texture with a ready-to-bind (texture, sampler) group.
///
/// Dropping it releases the GPU texture; the cache relies on that for
/// eviction and replacement.
pub struct SceneTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub bind_group: wgpu::BindGroup,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
}

impl SceneTexture {
    /// Upload `data` (tightly packed RGBA8, top row first). Mipmaps are
    /// generated on the GPU when `mip_pipeline` is given.
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        bind_group_layout: &wgpu::BindGroupLayout,
        sampler: &wgpu::Sampler,
        width: u32,
        height: u32,
        data: &[u8],
        mip_pipeline: Option<&MipmapPipeline>,
    ) -> Self {
        debug_assert_eq!(data.len(), (width * height * 4) as usize);
        let mip_levels = if mip_pipeline.is_some() {
            Self::mip_level_count(width, height)
        } else {
            1
        };

        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
        if mip_levels > 1 {
            usage |= wgpu::TextureUsages::STORAGE_BINDING;
        }

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("SceneTexture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage,
            view_formats: &[],
        });

        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );

        if let Some(mip) = mip_pipeline
            && mip_levels > 1
        {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("scene_texture_mips"),
            });
            mip.encode(device, &mut encoder, &texture);
            queue.submit(std::iter::once(encoder.finish()));
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = texture_bind_group(device, bind_group_layout, &view, sampler, "SceneTexture bind group");

        Self {
            texture,
            view,
            bind_group,
            width,
            height,
            mip_levels,
        }
    }

    /// The tiled checkerboard shown while an element has no texture.
    pub fn checkerboard(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        bind_group_layout: &wgpu::BindGroupLayout,
        sampler: &wgpu::Sampler,
        mip_pipeline: &MipmapPipeline,
    ) -> Self {
        let size = CHECKER_TEXTURE_SIZE;
        Self::new(
            device,
            queue,
            bind_group_layout,
            sampler,
            size,
            size,
            &checkerboard_pixels(),
            Some(mip_pipeline),
        )
    }

    /// How many mip levels a full chain down to 1x1 needs.
    pub fn mip_level_count(width: u32, height: u32) -> u32 {
        mip_sizes(width, height).count() as u32
    }
}

/// Two-tone grey checkerboard, `CHECKER_TEXTURE_SIZE` square, RGBA8.
pub fn checkerboard_pixels() -> Vec<u8> {
    const LIGHT: u8 = 211;
    const DARK: u8 = 169;
    let size = CHECKER_TEXTURE_SIZE;
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for j in 0..size {
        for i in 0..size {
            let odd = ((i / CHECKER_SQUARE) ^ (j / CHECKER_SQUARE)) & 1 == 1;
            let v = if odd { DARK } else { LIGHT };
            pixels.extend_from_slice(&[v, v, v, 255]);
        }
    }
    pixels
}

/// (texture, sampler) bind group matching `SharedLayouts::texture`.
pub fn texture_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    view: &wgpu::TextureView,
    sampler: &wgpu::Sampler,
    label: &str,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    })
}

/// Level sizes from `width` x `height` down to 1x1.
pub fn mip_sizes(width: u32, height: u32) -> impl Iterator<Item = (u32, u32)> {
    std::iter::successors(Some((width.max(1), height.max(1))), |&(w, h)| {
        (w > 1 || h > 1).then(|| ((w / 2).max(1), (h / 2).max(1)))
    })
}

fn level_view(texture: &wgpu::Texture, level: u32) -> wgpu::TextureView {
    texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some("mip_level_view"),
        base_mip_level: level,
        mip_level_count: Some(1),
        ..Default::default()
    })
}

// ============================================================================
// MIPMAP GENERATION
// ============================================================================

/// Compute downsampler that fills a texture's mip chain from level 0.
pub struct MipmapPipeline {
    pipeline: wgpu::ComputePipeline,
    levels_layout: wgpu::BindGroupLayout,
}

impl MipmapPipeline {
    pub fn new(device: &wgpu::Device) -> Self {
        let module = shader_module(device, "mipmap_shader", super::shaders::MIPMAP_SHADER);
        let levels_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("mip_levels_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: TEXTURE_FORMAT,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("mip_downsample_layout"),
            bind_group_layouts: &[&levels_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("mip_downsample"),
            layout: Some(&layout),
            module: &module,
            entry_point: "cs_downsample",
            compilation_options: Default::default(),
        });
        Self { pipeline, levels_layout }
    }

    /// Record one dispatch per level `1..` of `texture`, each reading the
    /// level above it.
    pub fn encode(&self, device: &wgpu::Device, encoder: &mut wgpu::CommandEncoder, texture: &wgpu::Texture) {
        let size = texture.size();
        let levels = texture.mip_level_count();
        let chain = mip_sizes(size.width, size.height).take(levels as usize);

        for (level, (w, h)) in (0u32..).zip(chain).skip(1) {
            let upper = level_view(texture, level - 1);
            let lower = level_view(texture, level);
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("mip_levels_bg"),
                layout: &self.levels_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&upper),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&lower),
                    },
                ],
            });

            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("mip_downsample_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(w.div_ceil(8), h.div_ceil(8), 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_chain_reaches_one_texel() {
        assert_eq!(SceneTexture::mip_level_count(1, 1), 1);
        assert_eq!(SceneTexture::mip_level_count(16, 16), 5);
        assert_eq!(SceneTexture::mip_level_count(512, 768), 10);
        assert_eq!(SceneTexture::mip_level_count(0, 0), 1);
    }

    #[test]
    fn mip_sizes_halve_each_axis_independently() {
        let sizes: Vec<_> = mip_sizes(8, 2).collect();
        assert_eq!(sizes, vec![(8, 2), (4, 1), (2, 1), (1, 1)]);
    }

    #[test]
    fn checkerboard_alternates_eight_texel_squares() {
        let pixels = checkerboard_pixels();
        let size = CHECKER_TEXTURE_SIZE as usize;
        assert_eq!(pixels.len(), size * size * 4);
        let at = |i: usize, j: usize| pixels[(j * size + i) * 4];
        assert_eq!(at(0, 0), 211);
        assert_eq!(at(7, 7), 211);
        assert_eq!(at(8, 0), 169);
        assert_eq!(at(0, 8), 169);
        assert_eq!(at(15, 15), 211);
        assert!(pixels.chunks(4).all(|p| p[0] == p[1] && p[1] == p[2] && p[3] == 255));
    }
}
