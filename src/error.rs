// ============================================================================
// ERRORS — one enum per failure domain
// ============================================================================

use crate::scene::ElementId;

/// Failures raised by the GPU renderer.
///
/// Construction failures (`NoAdapter`, `RequestDevice`, `Pipeline`) mean the
/// canvas cannot run at all and callers should show an "unavailable" state
/// instead of retrying. The remaining variants are per-request.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    #[error("failed to open GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("failed to build {label}: {message}")]
    Pipeline { label: &'static str, message: String },

    #[error("offscreen target {width}x{height} is incomplete: {reason}")]
    IncompleteTarget {
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("texture readback failed: {0}")]
    Readback(String),

    #[error("frame validation error: {0}")]
    Frame(String),

    #[error(transparent)]
    Scene(#[from] SceneError),
}

impl RenderError {
    /// True when the renderer itself could not be constructed.
    pub fn is_construction(&self) -> bool {
        matches!(
            self,
            RenderError::NoAdapter | RenderError::RequestDevice(_) | RenderError::Pipeline { .. }
        )
    }
}

/// Failures while fetching or decoding an element image.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered with status {0}")]
    Status(u16),

    #[error("failed to read image file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("unsupported image url: {0}")]
    UnsupportedUrl(String),

    #[error("image loader panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SceneError {
    #[error("scene already holds the maximum of {limit} elements")]
    TooManyElements { limit: usize },

    #[error("no element with id {0}")]
    UnknownElement(ElementId),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("scene file i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("scene file is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings file could not be parsed: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("settings could not be serialized: {0}")]
    Serialize(#[from] toml::ser::Error),
}
