// ============================================================================
// SCENE STORE — JSON persistence of the canvas document
// ============================================================================

use std::fs;
use std::io::Write;
use std::path::Path;

use tracing::{debug, info};

use crate::error::StoreError;
use crate::scene::Scene;

/// Read a scene document. Out-of-range image indices and dangling
/// selection/hover ids are repaired on the way in.
pub fn load_scene(path: &Path) -> Result<Scene, StoreError> {
    let text = fs::read_to_string(path)?;
    let mut scene: Scene = serde_json::from_str(&text)?;
    scene.repair();
    info!(
        path = %path.display(),
        elements = scene.elements().len(),
        strokes = scene.strokes().len(),
        "scene loaded"
    );
    Ok(scene)
}

/// Load `path` if it exists, otherwise start from an empty scene.
pub fn load_or_default(path: &Path) -> Result<Scene, StoreError> {
    if path.exists() {
        load_scene(path)
    } else {
        debug!(path = %path.display(), "no scene file, starting empty");
        Ok(Scene::new())
    }
}

/// Write the scene next to `path` and rename it into place, so a crash
/// mid-write never leaves a truncated document.
pub fn save_scene(path: &Path, scene: &Scene) -> Result<(), StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(scene)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);
    {
        let mut file = fs::File::create(tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
    }
    fs::rename(tmp, path)?;
    debug!(path = %path.display(), bytes = json.len(), "scene saved");
    Ok(())
}
