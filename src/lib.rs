//! Canvas scene engine: scene model, input handling, texture cache and the
//! wgpu render pipeline that draws elements, strokes and inpainting masks.

#![allow(clippy::too_many_arguments)]

pub mod error;
pub mod geometry;
pub mod gpu;
pub mod input;
pub mod logger;
pub mod scene;
pub mod schedule;
pub mod settings;
pub mod store;

pub use error::{LoadError, RenderError, SceneError, SettingsError, StoreError};
pub use geometry::{Rect, Vec2, ViewTransform};
pub use input::InputController;
pub use scene::{CanvasElement, CanvasImage, CanvasStroke, ElementId, Scene, Tool};
pub use schedule::FrameScheduler;
