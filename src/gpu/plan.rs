// ============================================================================
// FRAME PLAN — what each pass draws this frame, computed without the GPU
// ============================================================================
//
// The renderer builds a `FramePlan` from the scene and the texture cache
// state, then hands it to the passes. Keeping the planning pure means the
// ordering, depth allocation and uniform math are testable headless.

use std::ops::Range;

use bytemuck::{Pod, Zeroable};

use crate::geometry::{Rect, Vec2, ViewTransform};
use crate::scene::{ElementId, Scene, Tool};

/// Grid cell size in scene units.
pub const GRID_SIZE: f32 = 64.0;
/// Side of the checkerboard placeholder texture in texels.
pub const CHECKER_TEXTURE_SIZE: u32 = 16;
/// Side of one checker square in texels.
pub const CHECKER_SQUARE: u32 = 8;
/// Stroke ribbon width in scene units.
pub const STROKE_THICKNESS: f32 = 64.0;
/// Half-width of the selection border, in screen pixels.
pub const OUTLINE_PX: f32 = 2.0;
/// Brush cursor ring radius, in screen pixels.
pub const BRUSH_CURSOR_RADIUS_PX: f32 = 32.0;
/// Distinct depth values available to elements. Slot 0 is the grid.
pub const DEPTH_SLOTS: u32 = 1 << 20;

pub const HOVERED_COLOR: [f32; 4] = [59.0 / 255.0, 130.0 / 255.0, 246.0 / 255.0, 1.0];
pub const SELECTED_COLOR: [f32; 4] = [37.0 / 255.0, 99.0 / 255.0, 235.0 / 255.0, 1.0];

/// Brush strokes clear the red channel and alpha; eraser strokes restore
/// the cleared value. Blending is off, so later strokes overwrite earlier ones.
pub const BRUSH_STROKE_COLOR: [f32; 4] = [0.0, 1.0, 1.0, 0.0];
pub const ERASER_STROKE_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

/// Depth for a slot. Larger slots are nearer; every value is exact in f32.
pub fn depth_value(slot: u32) -> f32 {
    1.0 - slot.min(DEPTH_SLOTS) as f32 / DEPTH_SLOTS as f32
}

pub fn stroke_color(tool: Tool) -> [f32; 4] {
    match tool {
        Tool::Eraser => ERASER_STROKE_COLOR,
        Tool::Brush | Tool::Select => BRUSH_STROKE_COLOR,
    }
}

// ============================================================================
// UNIFORM TYPES
// ============================================================================

/// Scene → clip transform shared by every scene-space pass (group 0).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ViewUniforms {
    pub transform: [f32; 4],
    pub inv_scale: f32,
    pub _pad: [f32; 3],
}

impl ViewUniforms {
    pub fn new(view: ViewTransform, viewport_width: u32, viewport_height: u32) -> Self {
        let vw = viewport_width.max(1) as f32;
        let vh = viewport_height.max(1) as f32;
        let sx = 2.0 / vw * view.scale;
        let sy = -2.0 / vh * view.scale;
        Self {
            transform: [sx, sy, sx * view.translate.x - 1.0, sy * view.translate.y + 1.0],
            inv_scale: 1.0 / view.scale,
            _pad: [0.0; 3],
        }
    }

    /// Apply the transform on the CPU. Used by tests and hit diagnostics.
    pub fn to_clip(&self, p: Vec2) -> Vec2 {
        Vec2::new(
            p.x * self.transform[0] + self.transform[2],
            p.y * self.transform[1] + self.transform[3],
        )
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GridUniforms {
    pub params: [f32; 4],
}

impl GridUniforms {
    pub fn new(view: ViewTransform, viewport_width: u32, viewport_height: u32) -> Self {
        Self {
            params: [
                viewport_width as f32 / view.scale / GRID_SIZE,
                viewport_height as f32 / view.scale / GRID_SIZE,
                (0.5 - view.translate.x) / GRID_SIZE,
                (0.5 - view.translate.y) / GRID_SIZE,
            ],
        }
    }
}

/// One textured element quad.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct QuadUniforms {
    pub world: [f32; 4],
    pub tc: [f32; 4],
    pub depth: f32,
    pub _pad: [f32; 3],
}

impl QuadUniforms {
    pub fn image(rect: Rect, depth: f32) -> Self {
        Self {
            world: [rect.width, rect.height, rect.x, rect.y],
            tc: [1.0, 1.0, 0.0, 0.0],
            depth,
            _pad: [0.0; 3],
        }
    }

    /// Checkerboard tiled in scene units and anchored to the scene grid,
    /// so it tiles per element size rather than per viewport.
    pub fn placeholder(rect: Rect, depth: f32) -> Self {
        let tile = CHECKER_TEXTURE_SIZE as f32;
        Self {
            world: [rect.width, rect.height, rect.x, rect.y],
            tc: [
                rect.width / tile,
                rect.height / tile,
                rect.x.rem_euclid(tile) / tile,
                rect.y.rem_euclid(tile) / tile,
            ],
            depth,
            _pad: [0.0; 3],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct OutlineUniforms {
    pub world: [f32; 4],
    pub tc: [f32; 4],
    pub params: [f32; 4],
    pub color: [f32; 4],
}

impl OutlineUniforms {
    pub fn new(rect: Rect, scale: f32, color: [f32; 4]) -> Self {
        let t = OUTLINE_PX / scale;
        let outer = rect.inflated(t);
        Self {
            world: [outer.width, outer.height, outer.x, outer.y],
            tc: [outer.width, outer.height, -rect.width / 2.0 - t, -rect.height / 2.0 - t],
            params: [rect.width / 2.0, rect.height / 2.0, 1.0 / scale, t],
            color,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct BrushUniforms {
    pub world: [f32; 4],
    pub tc: [f32; 4],
    pub params: [f32; 4],
}

impl BrushUniforms {
    pub fn new(center: Vec2, scale: f32) -> Self {
        let r = BRUSH_CURSOR_RADIUS_PX / scale;
        let t = OUTLINE_PX / scale;
        let extent = r + t;
        Self {
            world: [2.0 * extent, 2.0 * extent, center.x - extent, center.y - extent],
            tc: [2.0 * extent, 2.0 * extent, -extent, -extent],
            params: [r, r, 1.0 / scale, t],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct StrokeStyle {
    pub color: [f32; 4],
    pub thickness: f32,
    pub _pad: [f32; 3],
}

impl StrokeStyle {
    pub fn for_tool(tool: Tool) -> Self {
        Self { color: stroke_color(tool), thickness: STROKE_THICKNESS, _pad: [0.0; 3] }
    }
}

// ============================================================================
// DRAW LISTS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageSource {
    /// The element's cached texture.
    Texture(ElementId),
    /// Shared checkerboard.
    Placeholder,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImageDraw {
    pub id: ElementId,
    pub source: ImageSource,
    pub uniforms: QuadUniforms,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Highlight {
    Hovered,
    Selected,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OutlineDraw {
    pub id: ElementId,
    pub highlight: Highlight,
    pub uniforms: OutlineUniforms,
}

/// One instanced draw: instance `i` is the segment between points `i` and
/// `i + 1` of the frame's shared point buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StrokeDraw {
    pub tool: Tool,
    pub instances: Range<u32>,
}

impl StrokeDraw {
    pub fn segment_count(&self) -> u32 {
        self.instances.end - self.instances.start
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanKind {
    /// On-screen frame: placeholders, outlines and cursor included.
    Display,
    /// Mask extraction crop: only elements with a loaded texture.
    MaskExtraction,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FramePlan {
    pub width: u32,
    pub height: u32,
    pub view: ViewUniforms,
    pub grid: GridUniforms,
    /// Back-to-front.
    pub images: Vec<ImageDraw>,
    pub outlines: Vec<OutlineDraw>,
    pub strokes: Vec<StrokeDraw>,
    pub points: Vec<[f32; 2]>,
    pub brush: Option<BrushUniforms>,
}

impl FramePlan {
    /// Plan the on-screen frame for a `width` x `height` viewport.
    pub fn display(
        scene: &Scene,
        width: u32,
        height: u32,
        has_texture: impl Fn(ElementId) -> bool,
    ) -> Self {
        Self::build(scene, scene.view(), width, height, PlanKind::Display, has_texture)
    }

    /// Plan a 1:1 crop of `crop`'s region, with the crop's top-left at the
    /// target origin.
    pub fn mask_extraction(
        scene: &Scene,
        crop: Rect,
        width: u32,
        height: u32,
        has_texture: impl Fn(ElementId) -> bool,
    ) -> Self {
        let view = ViewTransform::new(-crop.origin(), 1.0);
        Self::build(scene, view, width, height, PlanKind::MaskExtraction, has_texture)
    }

    pub fn build(
        scene: &Scene,
        view: ViewTransform,
        width: u32,
        height: u32,
        kind: PlanKind,
        has_texture: impl Fn(ElementId) -> bool,
    ) -> Self {
        let elements = scene.elements();
        let count = elements.len();

        let mut images = Vec::with_capacity(count);
        for (index, element) in elements.iter().enumerate().rev() {
            // front element (index 0) gets the nearest slot
            let slot = (count - index).min(DEPTH_SLOTS as usize) as u32;
            let depth = depth_value(slot);
            let rect = element.bounds();
            if has_texture(element.id) {
                images.push(ImageDraw {
                    id: element.id,
                    source: ImageSource::Texture(element.id),
                    uniforms: QuadUniforms::image(rect, depth),
                });
            } else if kind == PlanKind::Display {
                images.push(ImageDraw {
                    id: element.id,
                    source: ImageSource::Placeholder,
                    uniforms: QuadUniforms::placeholder(rect, depth),
                });
            }
        }

        let mut outlines = Vec::new();
        if kind == PlanKind::Display {
            for element in elements {
                let highlight = if scene.hovered_id() == Some(element.id) {
                    Highlight::Hovered
                } else if scene.selected_id() == Some(element.id) {
                    Highlight::Selected
                } else {
                    continue;
                };
                let color = match highlight {
                    Highlight::Hovered => HOVERED_COLOR,
                    Highlight::Selected => SELECTED_COLOR,
                };
                outlines.push(OutlineDraw {
                    id: element.id,
                    highlight,
                    uniforms: OutlineUniforms::new(element.bounds(), view.scale, color),
                });
            }
        }

        let mut strokes = Vec::new();
        let mut points = Vec::new();
        for stroke in scene.strokes() {
            if stroke.segment_count() == 0 {
                continue;
            }
            let first = points.len() as u32;
            points.extend(stroke.points().map(Vec2::to_array));
            strokes.push(StrokeDraw {
                tool: stroke.tool,
                instances: first..first + stroke.segment_count() as u32,
            });
        }

        let brush = match kind {
            PlanKind::Display => scene.cursor_pos().map(|c| BrushUniforms::new(c, view.scale)),
            PlanKind::MaskExtraction => None,
        };

        Self {
            width,
            height,
            view: ViewUniforms::new(view, width, height),
            grid: GridUniforms::new(view, width, height),
            images,
            outlines,
            strokes,
            points,
            brush,
        }
    }

    pub fn segment_count(&self) -> u32 {
        self.strokes.iter().map(StrokeDraw::segment_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::CanvasElement;

    fn near(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn depth_slots_are_distinct_and_ordered() {
        assert_eq!(depth_value(0), 1.0);
        assert_eq!(depth_value(DEPTH_SLOTS), 0.0);
        let mut prev = depth_value(0);
        for slot in (1..=70_000).chain(DEPTH_SLOTS - 10..=DEPTH_SLOTS) {
            let d = depth_value(slot);
            assert!(d < prev, "slot {slot} not nearer than slot {}", slot - 1);
            prev = d;
        }
    }

    #[test]
    fn view_uniforms_match_transform_law() {
        let view = ViewTransform::new(Vec2::new(-100.0, 40.0), 2.0);
        let u = ViewUniforms::new(view, 800, 600);
        let scene_point = Vec2::new(150.0, 20.0);
        let screen = view.scene_to_screen(scene_point);
        let clip = u.to_clip(scene_point);
        assert!(near(clip.x, screen.x / 800.0 * 2.0 - 1.0));
        assert!(near(clip.y, 1.0 - screen.y / 600.0 * 2.0));
        assert!(near(u.inv_scale, 0.5));

        let origin = u.to_clip(view.screen_to_scene(Vec2::ZERO));
        assert!(near(origin.x, -1.0) && near(origin.y, 1.0));
    }

    #[test]
    fn grid_params_follow_view() {
        let view = ViewTransform::new(Vec2::new(32.5, -64.0), 0.5);
        let g = GridUniforms::new(view, 1024, 512);
        assert_eq!(g.params, [32.0, 16.0, (0.5 - 32.5) / 64.0, (0.5 + 64.0) / 64.0]);
    }

    #[test]
    fn placeholder_tiles_per_element() {
        let u = QuadUniforms::placeholder(Rect::new(0.0, 0.0, 512.0, 512.0), 0.5);
        assert_eq!(u.world, [512.0, 512.0, 0.0, 0.0]);
        assert_eq!(u.tc, [32.0, 32.0, 0.0, 0.0]);

        let shifted = QuadUniforms::placeholder(Rect::new(-24.0, 40.0, 64.0, 32.0), 0.5);
        assert_eq!(shifted.tc, [4.0, 2.0, 8.0 / 16.0, 8.0 / 16.0]);
    }

    #[test]
    fn outline_thickness_is_constant_on_screen() {
        let rect = Rect::new(0.0, 0.0, 100.0, 50.0);
        for scale in [0.25, 1.0, 4.0] {
            let u = OutlineUniforms::new(rect, scale, SELECTED_COLOR);
            assert!(near(u.params[3] * scale, OUTLINE_PX));
            assert!(near(u.params[2] * scale, 1.0));
            assert!(near(u.world[0], 100.0 + 2.0 * OUTLINE_PX / scale));
        }
    }

    #[test]
    fn brush_cursor_is_fixed_screen_size() {
        for scale in [0.5, 1.0, 3.0] {
            let u = BrushUniforms::new(Vec2::new(10.0, 10.0), scale);
            assert!(near(u.params[0] * scale, BRUSH_CURSOR_RADIUS_PX));
            assert!(near(u.world[2] + u.world[0] / 2.0, 10.0));
        }
    }

    #[test]
    fn placeholder_element_plan() {
        let mut scene = Scene::new();
        let id = scene.push_element(CanvasElement::new(0.0, 0.0, 512.0, 512.0)).unwrap();
        let plan = FramePlan::display(&scene, 1280, 720, |_| false);

        assert_eq!(plan.images.len(), 1);
        let draw = &plan.images[0];
        assert_eq!(draw.id, id);
        assert_eq!(draw.source, ImageSource::Placeholder);
        assert_eq!(draw.uniforms.world, [512.0, 512.0, 0.0, 0.0]);
        assert_eq!(draw.uniforms.tc[..2], [32.0, 32.0]);
    }

    #[test]
    fn images_draw_back_to_front_with_nearer_depth_in_front() {
        let mut scene = Scene::new();
        let back = scene.add_generator(None).unwrap();
        let front = scene.add_generator(None).unwrap();
        let plan = FramePlan::display(&scene, 100, 100, |id| id == front);

        assert_eq!(plan.images[0].id, back);
        assert_eq!(plan.images[1].id, front);
        assert_eq!(plan.images[1].source, ImageSource::Texture(front));
        assert!(plan.images[1].uniforms.depth < plan.images[0].uniforms.depth);
        assert!(plan.images[0].uniforms.depth < depth_value(0));
    }

    #[test]
    fn strokes_plan_segment_instances() {
        let mut scene = Scene::new();
        scene.begin_stroke(Tool::Brush, Vec2::new(0.0, 0.0));
        scene.extend_stroke(Vec2::new(10.0, 0.0));
        scene.extend_stroke(Vec2::new(10.0, 10.0));
        scene.begin_stroke(Tool::Eraser, Vec2::new(5.0, 5.0));
        scene.begin_stroke(Tool::Eraser, Vec2::new(1.0, 1.0));
        scene.extend_stroke(Vec2::new(2.0, 2.0));

        let plan = FramePlan::display(&scene, 100, 100, |_| false);
        assert_eq!(plan.strokes.len(), 2);
        assert_eq!(plan.strokes[0], StrokeDraw { tool: Tool::Brush, instances: 0..2 });
        assert_eq!(plan.strokes[1], StrokeDraw { tool: Tool::Eraser, instances: 3..4 });
        assert_eq!(plan.points.len(), 5);
        assert_eq!(plan.segment_count(), 3);
        assert_eq!(plan.points[2], [10.0, 10.0]);
    }

    #[test]
    fn empty_strokes_plan_nothing() {
        let mut scene = Scene::new();
        scene.begin_stroke(Tool::Brush, Vec2::new(0.0, 0.0));
        let plan = FramePlan::display(&scene, 100, 100, |_| false);
        assert!(plan.strokes.is_empty());
        assert!(plan.points.is_empty());
    }

    #[test]
    fn outlines_prefer_hover_colour() {
        let mut scene = Scene::new();
        let a = scene.add_generator(None).unwrap();
        let b = scene.add_generator(None).unwrap();
        scene.select(Some(a));
        scene.set_hovered(Some(b));
        let plan = FramePlan::display(&scene, 100, 100, |_| false);
        assert_eq!(plan.outlines.len(), 2);
        let of = |id| plan.outlines.iter().find(|o| o.id == id).unwrap();
        assert_eq!(of(a).highlight, Highlight::Selected);
        assert_eq!(of(b).highlight, Highlight::Hovered);
        assert_eq!(of(b).uniforms.color, HOVERED_COLOR);

        scene.set_hovered(Some(a));
        let plan = FramePlan::display(&scene, 100, 100, |_| false);
        assert_eq!(plan.outlines.len(), 1);
        assert_eq!(plan.outlines[0].highlight, Highlight::Hovered);
    }

    #[test]
    fn cursor_only_in_display_plan() {
        let mut scene = Scene::new();
        scene.set_tool(Tool::Brush);
        scene.set_cursor_pos(Some(Vec2::new(3.0, 4.0)));
        let rect = Rect::new(0.0, 0.0, 64.0, 64.0);
        assert!(FramePlan::display(&scene, 10, 10, |_| false).brush.is_some());
        assert!(FramePlan::mask_extraction(&scene, rect, 64, 64, |_| false).brush.is_none());
    }

    #[test]
    fn mask_plan_crops_to_element_and_skips_placeholders() {
        let mut scene = Scene::new();
        let plain = scene.push_element(CanvasElement::new(0.0, 0.0, 64.0, 64.0)).unwrap();
        let loaded = scene.push_element(CanvasElement::new(96.0, 32.0, 128.0, 64.0)).unwrap();
        scene.select(Some(loaded));
        let crop = scene.element(loaded).unwrap().bounds();

        let plan = FramePlan::mask_extraction(&scene, crop, 128, 64, |id| id == loaded);
        assert_eq!(plan.images.len(), 1);
        assert_eq!(plan.images[0].id, loaded);
        assert!(plan.images.iter().all(|d| d.id != plain));
        assert!(plan.outlines.is_empty());

        let top_left = plan.view.to_clip(Vec2::new(96.0, 32.0));
        let bottom_right = plan.view.to_clip(Vec2::new(224.0, 96.0));
        assert!(near(top_left.x, -1.0) && near(top_left.y, 1.0));
        assert!(near(bottom_right.x, 1.0) && near(bottom_right.y, -1.0));
    }
}
