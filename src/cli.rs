// ============================================================================
// SeedCanvas CLI — headless mask export via command-line arguments
// ============================================================================
//
// Usage:
//   seed-canvas --scene scene.json --element 0 --output mask.png
//   seed-canvas --scene scene.json --element 6f1c…-uuid --output m.png \
//               --server http://gpu-box:5000 --user alice --wait-ms 20000
//
// No window is opened. The scene's images are fetched, the element's crop is
// rendered offscreen and the result (colour + mask alpha) is written as PNG.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{info, warn};

use seed_canvas::error::{LoadError, RenderError, StoreError};
use seed_canvas::gpu::{HttpImageLoader, SceneRenderer, UrlResolver};
use seed_canvas::scene::{ElementId, Scene};
use seed_canvas::schedule::FrameScheduler;
use seed_canvas::settings::AppSettings;
use seed_canvas::store;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// SeedCanvas headless mask exporter.
#[derive(Parser, Debug)]
#[command(
    name = "seed-canvas",
    about = "Export an element's inpainting mask from a saved canvas scene",
    long_about = "Render one element of a saved scene offscreen and write its crop as PNG.\n\
                  Colour channels hold the element's images, alpha holds the mask\n\
                  (0 where brush strokes cover the element).\n\n\
                  Example:\n  \
                  seed-canvas --scene scene.json --element 0 --output mask.png"
)]
pub struct CliArgs {
    /// Scene JSON file.
    #[arg(long, value_name = "FILE")]
    pub scene: PathBuf,

    /// Element id (UUID) or its index in the layer list (0 = topmost).
    #[arg(short, long, value_name = "ID|INDEX")]
    pub element: String,

    /// Output PNG path.
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Image server base URL. Defaults to the saved settings.
    #[arg(long, value_name = "URL")]
    pub server: Option<String>,

    /// Image namespace on the server. Defaults to the saved settings.
    #[arg(long, value_name = "NAME")]
    pub user: Option<String>,

    /// How long to wait for element images before rendering anyway.
    #[arg(long, default_value_t = 10_000, value_name = "MS")]
    pub wait_ms: u64,

    /// Print timing information.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// Returns `true` when any CLI-mode flag is present in the real process arguments.
    /// Used by `main()` to route before creating an eframe window.
    pub fn is_cli_mode() -> bool {
        std::env::args().any(|a| a == "--scene" || a.starts_with("--scene=") || a == "--help" || a == "-h")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("could not read scene: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Render(#[from] RenderError),

    #[error("could not create image loader: {0}")]
    Loader(#[from] LoadError),

    #[error("{0}")]
    Element(String),

    #[error("could not write mask: {0}")]
    Encode(#[from] image::ImageError),
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the export and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    let start = Instant::now();
    match export_mask(&args) {
        Ok((width, height)) => {
            if args.verbose {
                eprintln!(
                    "wrote {}x{} mask to {} in {:.0} ms",
                    width,
                    height,
                    args.output.display(),
                    start.elapsed().as_secs_f64() * 1000.0
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn export_mask(args: &CliArgs) -> Result<(u32, u32), CliError> {
    let settings = AppSettings::load();
    let resolver = UrlResolver::new(
        args.server.clone().unwrap_or(settings.server_url),
        args.user.clone().unwrap_or(settings.user),
    );

    let scene = store::load_scene(&args.scene)?;
    let id = resolve_element(&scene, &args.element)?;

    let loader = Arc::new(HttpImageLoader::new()?);
    let mut renderer = SceneRenderer::new(&settings.preferred_gpu, resolver, loader, FrameScheduler::new())?;
    info!(adapter = renderer.adapter_name(), "headless renderer ready");

    let report = renderer.prefetch(&scene);
    if !report.started.is_empty() && !renderer.wait_for_textures(Duration::from_millis(args.wait_ms)) {
        warn!(wait_ms = args.wait_ms, "not every image loaded in time; rendering what arrived");
    }

    let mask = renderer.generate_mask(&scene, id)?;
    let (width, height) = (mask.width, mask.height);
    let image = mask
        .into_image()
        .ok_or_else(|| CliError::Element("mask buffer does not match its dimensions".into()))?;
    image.save_with_format(&args.output, image::ImageFormat::Png)?;
    info!(output = %args.output.display(), width, height, "mask written");
    Ok((width, height))
}

/// Accept a UUID or a layer index.
fn resolve_element(scene: &Scene, selector: &str) -> Result<ElementId, CliError> {
    if let Ok(id) = selector.parse::<ElementId>() {
        return scene
            .element(id)
            .map(|e| e.id)
            .ok_or_else(|| CliError::Element(format!("no element with id {id}")));
    }
    let index: usize = selector
        .parse()
        .map_err(|_| CliError::Element(format!("'{selector}' is neither an element id nor an index")))?;
    scene.elements().get(index).map(|e| e.id).ok_or_else(|| {
        CliError::Element(format!(
            "index {index} out of range (scene has {} elements)",
            scene.elements().len()
        ))
    })
}
