// ============================================================================
// INPUT CONTROLLER — pointer / wheel / key events → scene mutations
// ============================================================================
//
// Events arrive in screen pixels relative to the canvas widget's top-left.
// Every conversion goes through the scene's `ViewTransform` so hit-testing
// and rendering agree on one transform law.
//
// Transient gesture state (captured element, pan flag, drag anchors) lives
// here and is never persisted with the scene.

use crate::geometry::{Vec2, ViewTransform};
use crate::scene::{ElementId, Scene, Tool};

/// Dragged elements land on multiples of this many scene units.
pub const SNAP_GRID: f32 = 8.0;
/// Scale factor per wheel unit.
pub const ZOOM_RATE: f32 = 1.005;
/// Largest wheel delta honoured by a single event.
pub const MAX_WHEEL_STEPS: f32 = 32.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Backspace,
    Delete,
    Other,
}

#[derive(Debug, Default)]
pub struct InputController {
    captured: Option<ElementId>,
    panning: bool,
    stroking: bool,
    /// Scene-space pointer position at pointer-down.
    start_scene_pos: Option<Vec2>,
    /// Position of the captured element at pointer-down.
    start_element_pos: Vec2,
}

impl InputController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn captured(&self) -> Option<ElementId> {
        self.captured
    }

    pub fn is_panning(&self) -> bool {
        self.panning
    }

    /// True while a pointer-down gesture is in progress.
    pub fn is_active(&self) -> bool {
        self.captured.is_some() || self.panning || self.stroking
    }

    pub fn screen_to_scene(scene: &Scene, p: Vec2) -> Vec2 {
        scene.view().screen_to_scene(p)
    }

    pub fn scene_to_screen(scene: &Scene, p: Vec2) -> Vec2 {
        scene.view().scene_to_screen(p)
    }

    /// First element (front-most wins) whose box contains the scene point.
    pub fn closest_element(scene: &Scene, p: Vec2) -> Option<ElementId> {
        scene.element_at(p).map(|e| e.id)
    }

    pub fn pointer_down(&mut self, scene: &mut Scene, screen: Vec2) {
        let p = Self::screen_to_scene(scene, screen);
        match scene.tool() {
            Tool::Select => match scene.element_at(p) {
                Some(element) => {
                    let id = element.id;
                    self.start_element_pos = element.position();
                    self.captured = Some(id);
                    scene.select(Some(id));
                }
                None => {
                    scene.select(None);
                    self.panning = true;
                }
            },
            tool @ (Tool::Brush | Tool::Eraser) => {
                scene.begin_stroke(tool, p);
                self.stroking = true;
            }
        }
        self.start_scene_pos = Some(p);
        if scene.tool().paints() {
            scene.set_cursor_pos(Some(p));
        }
    }

    pub fn pointer_move(&mut self, scene: &mut Scene, screen: Vec2) {
        let p = Self::screen_to_scene(scene, screen);

        if let (Some(id), Some(start)) = (self.captured, self.start_scene_pos) {
            let target = self.start_element_pos + (p - start);
            scene.move_element(id, target.snapped(SNAP_GRID));
        } else if let (true, Some(start)) = (self.panning, self.start_scene_pos) {
            scene.pan_by(p - start);
        } else if scene.tool() == Tool::Select {
            let hovered = Self::closest_element(scene, p);
            scene.set_hovered(hovered);
        } else if self.stroking {
            scene.extend_stroke(p);
        }

        if scene.tool().paints() {
            scene.set_cursor_pos(Some(p));
        }
    }

    /// Release any capture, pan or stroke. Safe to call repeatedly.
    pub fn pointer_up(&mut self) {
        self.captured = None;
        self.panning = false;
        self.stroking = false;
        self.start_scene_pos = None;
    }

    pub fn pointer_leave(&mut self, scene: &mut Scene) {
        scene.set_cursor_pos(None);
    }

    /// Zoom about the pointer. Browser convention: positive `delta_y`
    /// scrolls down and zooms in.
    pub fn wheel(&mut self, scene: &mut Scene, screen: Vec2, delta_y: f32) {
        let old = scene.view();
        let before = old.screen_to_scene(screen);

        let rate = if delta_y > 0.0 { ZOOM_RATE } else { 1.0 / ZOOM_RATE };
        let steps = delta_y.abs().min(MAX_WHEEL_STEPS);
        let scale = old.scale * rate.powf(steps);

        let after = ViewTransform::new(old.translate, scale).screen_to_scene(screen);
        scene.set_view(old.translate + (after - before), scale);

        if scene.tool().paints() {
            scene.set_cursor_pos(Some(Self::screen_to_scene(scene, screen)));
        }
    }

    pub fn key_down(&mut self, scene: &mut Scene, key: Key) {
        if !matches!(key, Key::Backspace | Key::Delete) {
            return;
        }
        if let Some(removed) = scene.remove_selected()
            && self.captured == Some(removed.id)
        {
            self.pointer_up();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::CanvasElement;

    fn scene_with(elements: &[(f32, f32, f32, f32)]) -> (Scene, Vec<ElementId>) {
        let mut scene = Scene::new();
        let mut ids = Vec::new();
        for &(x, y, w, h) in elements {
            ids.push(scene.push_element(CanvasElement::new(x, y, w, h)).unwrap());
        }
        (scene, ids)
    }

    fn close(a: Vec2, b: Vec2, tol: f32) -> bool {
        (a - b).length() <= tol
    }

    #[test]
    fn closest_element_uses_inclusive_bounds() {
        let (scene, ids) = scene_with(&[(10.0, 10.0, 100.0, 50.0)]);
        let hit = |x, y| InputController::closest_element(&scene, Vec2::new(x, y));
        assert_eq!(hit(10.0, 10.0), Some(ids[0]));
        assert_eq!(hit(110.0, 60.0), Some(ids[0]));
        assert_eq!(hit(60.0, 35.0), Some(ids[0]));
        assert_eq!(hit(110.5, 60.0), None);
        assert_eq!(hit(9.5, 35.0), None);
        assert_eq!(hit(60.0, 61.0), None);
    }

    #[test]
    fn overlapping_hit_prefers_earlier_element() {
        let (scene, ids) = scene_with(&[(0.0, 0.0, 100.0, 100.0), (50.0, 50.0, 100.0, 100.0)]);
        let p = Vec2::new(75.0, 75.0);
        assert_eq!(InputController::closest_element(&scene, p), Some(ids[0]));
        assert_eq!(InputController::closest_element(&scene, Vec2::new(140.0, 140.0)), Some(ids[1]));
    }

    #[test]
    fn drag_snaps_to_grid() {
        let (mut scene, ids) = scene_with(&[(0.0, 0.0, 64.0, 64.0)]);
        let mut input = InputController::new();

        let offsets = [(3.0, 5.0), (-13.0, 21.7), (100.2, -4.1), (0.0, 3.99), (-0.5, 4.5)];
        for (dx, dy) in offsets {
            let start = scene.element(ids[0]).unwrap().position();
            let grab = start + Vec2::new(10.0, 10.0);
            input.pointer_down(&mut scene, grab);
            input.pointer_move(&mut scene, grab + Vec2::new(dx, dy));
            input.pointer_up();

            let target = start + Vec2::new(dx, dy);
            let element = scene.element(ids[0]).unwrap();
            assert_eq!(element.x, (target.x / 8.0).round() * 8.0);
            assert_eq!(element.y, (target.y / 8.0).round() * 8.0);
            assert_eq!(element.x % 8.0, 0.0);
            assert_eq!(element.y % 8.0, 0.0);
        }
    }

    #[test]
    fn drag_is_measured_from_pointer_down() {
        let (mut scene, ids) = scene_with(&[(0.0, 0.0, 64.0, 64.0)]);
        let mut input = InputController::new();
        input.pointer_down(&mut scene, Vec2::new(32.0, 32.0));
        input.pointer_move(&mut scene, Vec2::new(36.0, 32.0));
        input.pointer_move(&mut scene, Vec2::new(72.0, 50.0));
        let element = scene.element(ids[0]).unwrap();
        assert_eq!(element.position(), Vec2::new(40.0, 16.0));
        assert_eq!(scene.selected_id(), Some(ids[0]));
    }

    #[test]
    fn empty_click_clears_selection_and_pans() {
        let (mut scene, ids) = scene_with(&[(0.0, 0.0, 64.0, 64.0)]);
        scene.select(Some(ids[0]));
        let mut input = InputController::new();

        input.pointer_down(&mut scene, Vec2::new(200.0, 200.0));
        assert_eq!(scene.selected_id(), None);
        assert!(input.is_panning());

        input.pointer_move(&mut scene, Vec2::new(230.0, 190.0));
        assert_eq!(scene.translate(), Vec2::new(30.0, -10.0));
    }

    #[test]
    fn panning_keeps_grabbed_point_under_pointer() {
        let mut scene = Scene::new();
        scene.set_view(Vec2::new(15.0, -40.0), 2.5);
        let mut input = InputController::new();

        let down = Vec2::new(100.0, 80.0);
        let grabbed = InputController::screen_to_scene(&scene, down);
        input.pointer_down(&mut scene, down);
        for screen in [Vec2::new(120.0, 70.0), Vec2::new(300.0, 10.0), Vec2::new(-50.0, 400.0)] {
            input.pointer_move(&mut scene, screen);
            let under = InputController::screen_to_scene(&scene, screen);
            assert!(close(under, grabbed, 1e-3), "{under:?} != {grabbed:?}");
        }
    }

    #[test]
    fn hover_follows_pointer_in_select_mode() {
        let (mut scene, ids) = scene_with(&[(0.0, 0.0, 64.0, 64.0)]);
        let mut input = InputController::new();
        input.pointer_move(&mut scene, Vec2::new(10.0, 10.0));
        assert_eq!(scene.hovered_id(), Some(ids[0]));
        input.pointer_move(&mut scene, Vec2::new(100.0, 10.0));
        assert_eq!(scene.hovered_id(), None);
        assert_eq!(scene.cursor_pos(), None);
    }

    #[test]
    fn brush_gesture_records_stroke_and_cursor() {
        let mut scene = Scene::new();
        scene.set_tool(Tool::Brush);
        let mut input = InputController::new();

        input.pointer_move(&mut scene, Vec2::new(5.0, 5.0));
        assert!(scene.strokes().is_empty());
        assert_eq!(scene.cursor_pos(), Some(Vec2::new(5.0, 5.0)));

        input.pointer_down(&mut scene, Vec2::new(0.0, 0.0));
        input.pointer_move(&mut scene, Vec2::new(10.0, 0.0));
        input.pointer_move(&mut scene, Vec2::new(10.0, 10.0));
        input.pointer_up();
        input.pointer_move(&mut scene, Vec2::new(50.0, 50.0));

        assert_eq!(scene.strokes().len(), 1);
        let stroke = &scene.strokes()[0];
        assert_eq!(stroke.tool, Tool::Brush);
        assert_eq!(stroke.segments, vec![0.0, 0.0, 10.0, 0.0, 10.0, 10.0]);
        assert_eq!(scene.cursor_pos(), Some(Vec2::new(50.0, 50.0)));

        input.pointer_leave(&mut scene);
        assert_eq!(scene.cursor_pos(), None);
    }

    #[test]
    fn eraser_strokes_are_tagged() {
        let mut scene = Scene::new();
        scene.set_tool(Tool::Eraser);
        let mut input = InputController::new();
        input.pointer_down(&mut scene, Vec2::new(1.0, 1.0));
        input.pointer_up();
        assert_eq!(scene.strokes()[0].tool, Tool::Eraser);
        assert_eq!(scene.strokes()[0].segment_count(), 0);
    }

    #[test]
    fn wheel_zoom_keeps_point_under_cursor() {
        let mut input = InputController::new();
        let deltas = [1.0, -1.0, 3.5, -12.0, 100.0, -250.0];
        let pointers = [Vec2::ZERO, Vec2::new(400.0, 300.0), Vec2::new(1270.0, 3.0)];
        for delta in deltas {
            for s in pointers {
                let mut scene = Scene::new();
                scene.set_view(Vec2::new(-37.0, 112.0), 0.8);
                let before = InputController::screen_to_scene(&scene, s);
                input.wheel(&mut scene, s, delta);
                let after = InputController::screen_to_scene(&scene, s);
                assert!(close(before, after, 1e-2), "delta {delta} at {s:?}: {before:?} vs {after:?}");
            }
        }
    }

    #[test]
    fn wheel_delta_is_clamped() {
        let mut input = InputController::new();
        let mut a = Scene::new();
        let mut b = Scene::new();
        input.wheel(&mut a, Vec2::ZERO, 32.0);
        input.wheel(&mut b, Vec2::ZERO, 5000.0);
        assert_eq!(a.scale(), b.scale());
        assert!((a.scale() - ZOOM_RATE.powf(32.0)).abs() < 1e-5);

        let mut c = Scene::new();
        input.wheel(&mut c, Vec2::ZERO, -1.0);
        assert!(c.scale() < 1.0);
    }

    #[test]
    fn wheel_updates_cursor_only_when_painting() {
        let mut input = InputController::new();
        let mut scene = Scene::new();
        input.wheel(&mut scene, Vec2::new(10.0, 10.0), 4.0);
        assert_eq!(scene.cursor_pos(), None);

        scene.set_tool(Tool::Brush);
        input.wheel(&mut scene, Vec2::new(10.0, 10.0), 4.0);
        let expected = InputController::screen_to_scene(&scene, Vec2::new(10.0, 10.0));
        assert_eq!(scene.cursor_pos(), Some(expected));
    }

    #[test]
    fn pointer_up_is_idempotent() {
        let (mut scene, _) = scene_with(&[(0.0, 0.0, 64.0, 64.0)]);
        let mut input = InputController::new();
        input.pointer_up();
        input.pointer_up();
        assert!(!input.is_active());

        input.pointer_down(&mut scene, Vec2::new(10.0, 10.0));
        assert!(input.captured().is_some());
        input.pointer_up();
        input.pointer_up();
        assert!(!input.is_active());
        assert_eq!(input.captured(), None);
    }

    #[test]
    fn delete_key_removes_selection_then_click_finds_back_element() {
        let (mut scene, ids) = scene_with(&[(0.0, 0.0, 100.0, 100.0), (50.0, 50.0, 100.0, 100.0)]);
        let (front, back) = (ids[0], ids[1]);
        let mut input = InputController::new();
        let overlap = Vec2::new(75.0, 75.0);

        input.pointer_down(&mut scene, overlap);
        input.pointer_up();
        assert_eq!(scene.selected_id(), Some(front));

        input.key_down(&mut scene, Key::Backspace);
        assert!(scene.element(front).is_none());

        input.pointer_down(&mut scene, overlap);
        input.pointer_up();
        assert_eq!(scene.selected_id(), Some(back));
    }

    #[test]
    fn delete_without_selection_is_noop() {
        let (mut scene, _) = scene_with(&[(0.0, 0.0, 10.0, 10.0)]);
        let mut input = InputController::new();
        input.key_down(&mut scene, Key::Delete);
        input.key_down(&mut scene, Key::Other);
        assert_eq!(scene.elements().len(), 1);
    }

    #[test]
    fn deleting_captured_element_releases_drag() {
        let (mut scene, _) = scene_with(&[(0.0, 0.0, 64.0, 64.0)]);
        let mut input = InputController::new();
        input.pointer_down(&mut scene, Vec2::new(5.0, 5.0));
        input.key_down(&mut scene, Key::Delete);
        assert!(!input.is_active());
        input.pointer_move(&mut scene, Vec2::new(40.0, 40.0));
        assert!(scene.elements().is_empty());
    }
}
