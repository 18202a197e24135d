// ============================================================================
// GPU MODULE — wgpu rendering engine for the canvas scene
// ============================================================================
//
// Architecture:
//   context.rs   — wgpu Device, Queue, adapter init (hardware → software)
//   shaders.rs   — all WGSL shader source (inline strings)
//   texture.rs   — SceneTexture upload + mipmaps, checkerboard placeholder
//   loader.rs    — ImageLoader trait, HTTP/file loader, URL resolution
//   cache.rs     — element id → texture cache, sync / eviction / stale loads
//   plan.rs      — pure per-frame draw planning and uniform math
//   passes.rs    — grid, image, selection and brush cursor passes
//   mask.rs      — stroke ribbons, mask scratch target, mask composite
//   renderer.rs  — SceneRenderer: frame orchestration, readback, masks
// ============================================================================

pub mod cache;
pub mod context;
pub mod loader;
pub mod mask;
pub mod passes;
pub mod plan;
pub mod renderer;
pub mod shaders;
pub mod texture;

pub use loader::{DecodedImage, HttpImageLoader, ImageLoader, Preview, UrlResolver};
pub use renderer::{Frame, FrameStats, MaskImage, SceneRenderer};
