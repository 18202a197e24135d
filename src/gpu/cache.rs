// ============================================================================
// TEXTURE CACHE — element id → lazily loaded GPU texture
// ============================================================================
//
// Synchronised once per frame against the scene, before any draw:
//
//   1. every element's desired URL is re-derived from the scene (preview
//      override first, then the displayed image path);
//   2. a changed URL starts a background load, keeping the old texture
//      visible until the new one lands;
//   3. entries whose id is no longer in the scene are dropped;
//   4. finished loads are applied, but only if their URL is still the one
//      the entry wants. Anything else is stale and discarded.
//
// Loads run on the rayon pool and report back over an mpsc channel, the same
// worker/receiver split the host app uses for its own background jobs.
//
// `T` is the GPU texture type. Dropping a `T` releases its GPU resources.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc;

use tracing::{debug, info, warn};

use super::loader::{DecodedImage, ImageLoader, Preview, UrlResolver, desired_url};
use crate::error::LoadError;
use crate::scene::{CanvasElement, ElementId};
use crate::schedule::FrameScheduler;

/// A finished background load.
pub struct LoadResult {
    pub id: ElementId,
    pub url: String,
    /// Cache epoch at load start; bumped by `clear`.
    epoch: u64,
    pub result: Result<DecodedImage, LoadError>,
}

#[derive(Debug)]
pub struct CacheEntry<T> {
    /// URL most recently requested for this element.
    pub url: Option<String>,
    pub texture: Option<T>,
}

impl<T> Default for CacheEntry<T> {
    fn default() -> Self {
        Self { url: None, texture: None }
    }
}

/// What one synchronisation pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub started: Vec<(ElementId, String)>,
    pub evicted: usize,
    pub applied: usize,
    pub discarded: usize,
    pub failed: usize,
}

pub struct TextureCache<T> {
    entries: HashMap<ElementId, CacheEntry<T>>,
    loader: Arc<dyn ImageLoader>,
    scheduler: FrameScheduler,
    tx: mpsc::Sender<LoadResult>,
    rx: mpsc::Receiver<LoadResult>,
    epoch: u64,
    in_flight: usize,
}

impl<T> TextureCache<T> {
    pub fn new(loader: Arc<dyn ImageLoader>, scheduler: FrameScheduler) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            entries: HashMap::new(),
            loader,
            scheduler,
            tx,
            rx,
            epoch: 0,
            in_flight: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, id: ElementId) -> Option<&CacheEntry<T>> {
        self.entries.get(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = ElementId> + '_ {
        self.entries.keys().copied()
    }

    pub fn texture(&self, id: ElementId) -> Option<&T> {
        self.entries.get(&id).and_then(|e| e.texture.as_ref())
    }

    /// A texture is drawable only while its entry still wants a URL.
    pub fn has_texture(&self, id: ElementId) -> bool {
        self.entries.get(&id).is_some_and(|e| e.url.is_some() && e.texture.is_some())
    }

    /// Loads started but not yet applied or discarded.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Drop every entry and texture. In-flight loads from before the clear
    /// are ignored when they arrive.
    pub fn clear(&mut self) {
        let dropped = self.entries.len();
        self.entries.clear();
        self.epoch += 1;
        info!(dropped, "texture cache cleared");
    }

    /// Bring the cache in line with `elements`. `upload` turns decoded
    /// pixels into a texture; returning `None` leaves the entry without one.
    pub fn synchronize(
        &mut self,
        elements: &[CanvasElement],
        resolver: &UrlResolver,
        preview: &Preview,
        mut upload: impl FnMut(ElementId, &DecodedImage) -> Option<T>,
    ) -> SyncReport {
        let mut report = SyncReport::default();
        let mut touched = HashSet::with_capacity(elements.len());

        for element in elements {
            touched.insert(element.id);
            let url = desired_url(element, resolver, preview);
            let entry = self.entries.entry(element.id).or_default();
            if entry.url == url {
                continue;
            }
            entry.url = url.clone();
            match url {
                Some(url) => {
                    report.started.push((element.id, url.clone()));
                    self.spawn_load(element.id, url);
                }
                // nothing to show any more
                None => entry.texture = None,
            }
        }

        let before = self.entries.len();
        self.entries.retain(|id, _| touched.contains(id));
        report.evicted = before - self.entries.len();

        self.drain_completed(&mut report, &mut upload);

        if report.evicted > 0 || !report.started.is_empty() {
            debug!(
                started = report.started.len(),
                evicted = report.evicted,
                applied = report.applied,
                "texture cache synchronized"
            );
        }
        report
    }

    fn spawn_load(&mut self, id: ElementId, url: String) {
        let loader = Arc::clone(&self.loader);
        let tx = self.tx.clone();
        let scheduler = self.scheduler.clone();
        let epoch = self.epoch;
        self.in_flight += 1;
        debug!(%id, %url, "loading texture");
        rayon::spawn(move || {
            // a panicking loader still has to report, or in_flight never drains
            let result = panic::catch_unwind(AssertUnwindSafe(|| loader.load(&url)))
                .unwrap_or_else(|payload| Err(LoadError::Panicked(panic_message(payload.as_ref()))));
            let _ = tx.send(LoadResult { id, url, epoch, result });
            scheduler.request_render();
        });
    }

    fn drain_completed(
        &mut self,
        report: &mut SyncReport,
        upload: &mut impl FnMut(ElementId, &DecodedImage) -> Option<T>,
    ) {
        while let Ok(done) = self.rx.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            self.apply(done, report, upload);
        }
    }

    fn apply(
        &mut self,
        done: LoadResult,
        report: &mut SyncReport,
        upload: &mut impl FnMut(ElementId, &DecodedImage) -> Option<T>,
    ) {
        let current = self
            .entries
            .get_mut(&done.id)
            .filter(|entry| done.epoch == self.epoch && entry.url.as_deref() == Some(done.url.as_str()));
        let Some(entry) = current else {
            debug!(id = %done.id, url = %done.url, "discarding stale texture load");
            report.discarded += 1;
            return;
        };

        match done.result {
            Ok(image) => {
                // release the old texture before creating its replacement
                entry.texture = None;
                entry.texture = upload(done.id, &image);
                if entry.texture.is_some() {
                    report.applied += 1;
                } else {
                    report.failed += 1;
                }
            }
            Err(err) => {
                warn!(id = %done.id, url = %done.url, "texture load failed: {err}");
                report.failed += 1;
            }
        }
    }

    /// Block until `count` loads have finished, queueing them for the next
    /// synchronisation. Returns how many arrived before `timeout`.
    pub fn wait_for_loads(&mut self, count: usize, timeout: std::time::Duration) -> usize {
        let deadline = std::time::Instant::now() + timeout;
        let mut received = Vec::new();
        while received.len() < count {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(done) => received.push(done),
                Err(_) => break,
            }
        }
        let arrived = received.len();
        for done in received {
            // re-queue so the next synchronize applies them in order
            let _ = self.tx.send(done);
        }
        arrived
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{CanvasImage, Scene};
    use std::sync::{Condvar, Mutex};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    type Gate = Arc<(Mutex<bool>, Condvar)>;

    /// Loader that returns a 1x1 image whose red channel is the URL length.
    /// URLs containing "broken" fail, "crash" panics, and "slow" blocks
    /// until the gate opens.
    struct FakeLoader {
        gate: Gate,
    }

    impl ImageLoader for FakeLoader {
        fn load(&self, url: &str) -> Result<DecodedImage, LoadError> {
            if url.contains("slow") {
                let (open, cvar) = &*self.gate;
                let mut open = open.lock().unwrap();
                while !*open {
                    open = cvar.wait(open).unwrap();
                }
            }
            if url.contains("broken") {
                return Err(LoadError::Status(404));
            }
            if url.contains("crash") {
                panic!("decoder blew up on {url}");
            }
            Ok(DecodedImage { width: 1, height: 1, pixels: vec![url.len() as u8, 0, 0, 255] })
        }
    }

    /// Texture stand-in that counts drops.
    struct FakeTexture {
        url_len: u8,
        drops: Arc<AtomicUsize>,
    }

    impl Drop for FakeTexture {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        cache: TextureCache<FakeTexture>,
        drops: Arc<AtomicUsize>,
        resolver: UrlResolver,
        preview: Preview,
        gate: Gate,
    }

    impl Harness {
        fn new() -> Self {
            let gate: Gate = Arc::new((Mutex::new(false), Condvar::new()));
            let loader = FakeLoader { gate: gate.clone() };
            Self {
                cache: TextureCache::new(Arc::new(loader), FrameScheduler::new()),
                gate,
                drops: Arc::new(AtomicUsize::new(0)),
                resolver: UrlResolver::new("http://h", "alice"),
                preview: Preview::default(),
            }
        }

        fn sync(&mut self, scene: &Scene) -> SyncReport {
            let drops = self.drops.clone();
            self.cache.synchronize(scene.elements(), &self.resolver, &self.preview, |_, image| {
                Some(FakeTexture { url_len: image.pixels[0], drops: drops.clone() })
            })
        }

        fn open_gate(&self) {
            let (open, cvar) = &*self.gate;
            *open.lock().unwrap() = true;
            cvar.notify_all();
        }

        /// Wait for outstanding loads, then sync so they are applied.
        fn settle(&mut self, scene: &Scene) -> SyncReport {
            let pending = self.cache.in_flight();
            assert_eq!(self.cache.wait_for_loads(pending, Duration::from_secs(5)), pending);
            self.sync(scene)
        }
    }

    fn element_with(paths: &[&str]) -> CanvasElement {
        let mut element = CanvasElement::default();
        element.images = paths.iter().map(|p| CanvasImage { path: p.to_string() }).collect();
        element
    }

    #[test]
    fn element_without_image_gets_empty_entry() {
        let mut h = Harness::new();
        let mut scene = Scene::new();
        let id = scene.push_element(CanvasElement::new(0.0, 0.0, 512.0, 512.0)).unwrap();

        let report = h.sync(&scene);
        assert!(report.started.is_empty());
        assert_eq!(h.cache.len(), 1);
        let entry = h.cache.entry(id).unwrap();
        assert!(entry.url.is_none() && entry.texture.is_none());
        assert!(!h.cache.has_texture(id));
    }

    #[test]
    fn load_applies_on_a_later_sync() {
        let mut h = Harness::new();
        let mut scene = Scene::new();
        let id = scene.push_element(element_with(&["a.png"])).unwrap();

        let first = h.sync(&scene);
        assert_eq!(first.started, vec![(id, "http://h/images/alice/a.png".to_string())]);
        assert!(!h.cache.has_texture(id));

        let second = h.settle(&scene);
        assert!(second.started.is_empty());
        assert_eq!(second.applied, 1);
        assert!(h.cache.has_texture(id));
    }

    #[test]
    fn unchanged_url_does_not_reload() {
        let mut h = Harness::new();
        let mut scene = Scene::new();
        scene.push_element(element_with(&["a.png"])).unwrap();
        h.sync(&scene);
        h.settle(&scene);
        let report = h.sync(&scene);
        assert!(report.started.is_empty());
        assert_eq!(h.cache.in_flight(), 0);
    }

    #[test]
    fn eviction_tracks_scene_membership() {
        let mut h = Harness::new();
        let mut scene = Scene::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(scene.push_element(element_with(&[&format!("{i}.png")])).unwrap());
        }
        h.sync(&scene);
        h.settle(&scene);

        for step in 0..6 {
            if step % 2 == 0 {
                let victim = ids.remove(0);
                scene.remove_element(victim);
            } else {
                ids.push(scene.push_element(CanvasElement::default()).unwrap());
            }
            h.sync(&scene);
            let cached: HashSet<_> = h.cache.ids().collect();
            let live: HashSet<_> = scene.elements().iter().map(|e| e.id).collect();
            assert_eq!(cached, live, "after step {step}");
        }
    }

    #[test]
    fn evicted_texture_is_dropped_once() {
        let mut h = Harness::new();
        let mut scene = Scene::new();
        let id = scene.push_element(element_with(&["a.png"])).unwrap();
        h.sync(&scene);
        h.settle(&scene);
        assert_eq!(h.drops.load(Ordering::SeqCst), 0);

        scene.remove_element(id);
        let report = h.sync(&scene);
        assert_eq!(report.evicted, 1);
        assert_eq!(h.drops.load(Ordering::SeqCst), 1);
        h.sync(&scene);
        assert_eq!(h.drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn old_texture_stays_until_replacement_lands() {
        let mut h = Harness::new();
        let mut scene = Scene::new();
        let id = scene.push_element(element_with(&["a.png", "slow.png"])).unwrap();
        h.sync(&scene);
        h.settle(&scene);
        let first_len = h.cache.texture(id).unwrap().url_len;

        scene.select_image(id, 1);
        let report = h.sync(&scene);
        assert_eq!(report.started.len(), 1);
        h.sync(&scene);
        assert_eq!(h.cache.texture(id).unwrap().url_len, first_len);

        h.open_gate();
        h.settle(&scene);
        assert_eq!(h.cache.texture(id).unwrap().url_len, first_len + 3);
        assert_eq!(h.drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn superseded_load_is_discarded() {
        let mut h = Harness::new();
        let mut scene = Scene::new();
        let id = scene.push_element(element_with(&["a.png", "bbbb.png"])).unwrap();
        h.sync(&scene);
        scene.select_image(id, 1);
        h.sync(&scene);
        h.settle(&scene);
        let expected = "http://h/images/alice/bbbb.png".len() as u8;
        assert_eq!(h.cache.texture(id).unwrap().url_len, expected);

        // a late result for the previous URL must not overwrite
        let late = LoadResult {
            id,
            url: "http://h/images/alice/a.png".into(),
            epoch: h.cache.epoch,
            result: Ok(DecodedImage { width: 1, height: 1, pixels: vec![1, 0, 0, 255] }),
        };
        h.cache.tx.send(late).unwrap();
        let report = h.sync(&scene);
        assert_eq!(report.discarded, 1);
        assert_eq!(h.cache.texture(id).unwrap().url_len, expected);
        assert_eq!(h.cache.entry(id).unwrap().url.as_deref(), Some("http://h/images/alice/bbbb.png"));
    }

    #[test]
    fn failed_load_leaves_placeholder() {
        let mut h = Harness::new();
        let mut scene = Scene::new();
        let id = scene.push_element(element_with(&["broken.png"])).unwrap();
        h.sync(&scene);
        let report = h.settle(&scene);
        assert_eq!(report.failed, 1);
        assert!(!h.cache.has_texture(id));
        // no automatic retry
        assert!(h.sync(&scene).started.is_empty());
    }

    #[test]
    fn preview_url_overrides_generator_image() {
        let mut h = Harness::new();
        let mut scene = Scene::new();
        let id = scene.add_generator(None).unwrap();
        assert!(scene.append_outputs(id, ["done.png"]));
        h.preview = Preview { generator_id: Some(id), url: Some("http://h/preview.jpg".into()) };

        let report = h.sync(&scene);
        assert_eq!(report.started, vec![(id, "http://h/preview.jpg".to_string())]);

        h.preview.url = None;
        let report = h.sync(&scene);
        assert_eq!(report.started, vec![(id, "http://h/images/alice/done.png".to_string())]);
    }

    #[test]
    fn clearing_forces_fresh_load_for_same_path() {
        let mut h = Harness::new();
        let mut scene = Scene::new();
        let id = scene.push_element(element_with(&["shared.png"])).unwrap();
        h.sync(&scene);
        h.settle(&scene);
        assert!(h.cache.has_texture(id));

        h.cache.clear();
        h.resolver.user = "bob".into();
        assert!(h.cache.is_empty());
        assert_eq!(h.drops.load(Ordering::SeqCst), 1);

        let report = h.sync(&scene);
        assert_eq!(report.started, vec![(id, "http://h/images/bob/shared.png".to_string())]);
    }

    #[test]
    fn clearing_with_same_user_still_reloads() {
        let mut h = Harness::new();
        let mut scene = Scene::new();
        let id = scene.push_element(element_with(&["p.png"])).unwrap();
        h.sync(&scene);
        h.settle(&scene);
        h.cache.clear();
        let report = h.sync(&scene);
        assert_eq!(report.started.len(), 1);
        assert_eq!(report.started[0].0, id);
    }

    #[test]
    fn loads_from_before_clear_are_ignored() {
        let mut h = Harness::new();
        let mut scene = Scene::new();
        let id = scene.push_element(element_with(&["slow.png"])).unwrap();
        h.sync(&scene);
        h.cache.clear();
        // same URL requested again after the clear
        h.sync(&scene);
        h.open_gate();
        let report = h.settle(&scene);
        assert_eq!(report.discarded, 1);
        assert_eq!(report.applied, 1);
        assert!(h.cache.has_texture(id));
    }

    #[test]
    fn image_index_out_of_range_drops_texture() {
        let mut h = Harness::new();
        let mut scene = Scene::new();
        let id = scene.push_element(element_with(&["a.png"])).unwrap();
        h.sync(&scene);
        h.settle(&scene);
        scene.element_mut(id).unwrap().images.clear();
        h.sync(&scene);
        assert!(!h.cache.has_texture(id));
        assert!(h.cache.entry(id).is_some());
    }

    #[test]
    fn panicking_loader_counts_as_failed_load() {
        let mut h = Harness::new();
        let mut scene = Scene::new();
        let id = scene.push_element(element_with(&["crash.png"])).unwrap();
        h.sync(&scene);
        assert_eq!(h.cache.in_flight(), 1);

        assert_eq!(h.cache.wait_for_loads(1, Duration::from_secs(5)), 1);
        let report = h.sync(&scene);
        assert_eq!(report.failed, 1);
        assert_eq!(h.cache.in_flight(), 0);
        assert!(!h.cache.has_texture(id));
    }

    #[test]
    fn panic_payloads_become_messages() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let literal: Box<dyn Any + Send> = Box::new("literal");
        assert_eq!(panic_message(literal.as_ref()), "literal");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
