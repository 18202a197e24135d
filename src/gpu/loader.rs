// ============================================================================
// IMAGE LOADER — URL resolution, fetch and decode for element textures
// ============================================================================

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use crate::error::LoadError;
use crate::scene::{CanvasElement, ElementId};

/// Decoded RGBA8 pixels, ready for upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        let rgba = image::load_from_memory(bytes)?.into_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self { width, height, pixels: rgba.into_raw() })
    }
}

/// Fetches and decodes the image behind a URL. Called from worker threads.
pub trait ImageLoader: Send + Sync {
    fn load(&self, url: &str) -> Result<DecodedImage, LoadError>;
}

/// Loader for `http(s)://` URLs, `file://` URLs and plain filesystem paths.
pub struct HttpImageLoader {
    client: reqwest::blocking::Client,
}

impl HttpImageLoader {
    pub fn new() -> Result<Self, LoadError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>, LoadError> {
        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::Status(status.as_u16()));
        }
        Ok(response.bytes()?.to_vec())
    }

    fn read_file(path: &Path) -> Result<Vec<u8>, LoadError> {
        let mut bytes = Vec::new();
        std::fs::File::open(path)?.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

impl ImageLoader for HttpImageLoader {
    fn load(&self, url: &str) -> Result<DecodedImage, LoadError> {
        let bytes = if url.starts_with("http://") || url.starts_with("https://") {
            self.fetch(url)?
        } else if let Some(path) = url.strip_prefix("file://") {
            Self::read_file(Path::new(path))?
        } else if url.contains("://") {
            return Err(LoadError::UnsupportedUrl(url.to_string()));
        } else {
            Self::read_file(Path::new(url))?
        };
        DecodedImage::from_bytes(&bytes)
    }
}

// ============================================================================
// URL RESOLUTION
// ============================================================================

/// Builds `{base}/images/{user}/{path}`. Paths are user-scoped, which is why
/// switching users must clear the texture cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlResolver {
    pub base_url: String,
    pub user: String,
}

impl UrlResolver {
    pub fn new(base_url: impl Into<String>, user: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), user: user.into() }
    }

    pub fn resolve(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.is_empty() {
            format!("images/{}/{}", self.user, path)
        } else {
            format!("{}/images/{}/{}", base, self.user, path)
        }
    }
}

/// Live preview override for the element currently generating.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Preview {
    pub generator_id: Option<ElementId>,
    pub url: Option<String>,
}

/// URL an element should display right now.
pub fn desired_url(element: &CanvasElement, resolver: &UrlResolver, preview: &Preview) -> Option<String> {
    if preview.generator_id == Some(element.id)
        && let Some(url) = &preview.url
    {
        return Some(url.clone());
    }
    element.current_image_path().map(|path| resolver.resolve(path))
}
