// ============================================================================
// SCENE — canvas document: elements, strokes, view transform, tool state
// ============================================================================
//
// The scene is the single source of truth for the canvas. The input
// controller and the generation-complete hook mutate it; the renderer only
// reads it. Every mutating method raises the dirty flag, which the frame
// loop consumes once per tick to decide whether a render is needed.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::SceneError;
use crate::geometry::{Rect, Vec2, ViewTransform};

pub type ElementId = Uuid;

/// Upper bound on simultaneous elements. Matches the number of distinct
/// depth slots the renderer allocates.
pub const MAX_ELEMENTS: usize = 1 << 20;

/// Default box size for new generator elements.
pub const DEFAULT_ELEMENT_SIZE: f32 = 512.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Select,
    Brush,
    Eraser,
}

impl Tool {
    pub fn label(self) -> &'static str {
        match self {
            Tool::Select => "Select",
            Tool::Brush => "Brush",
            Tool::Eraser => "Eraser",
        }
    }

    pub fn paints(self) -> bool {
        !matches!(self, Tool::Select)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasImage {
    pub path: String,
}

// ============================================================================
// ELEMENT
// ============================================================================

/// One positioned box on the canvas: a plain image, or a generator slot
/// when `generation` is present.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CanvasElement {
    pub id: ElementId,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Generation parameters, kept as the opaque document subtree the
    /// parameter forms edit.
    pub generation: Option<Value>,
    pub images: Vec<CanvasImage>,
    pub image_index: usize,
}

impl Default for CanvasElement {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            x: 0.0,
            y: 0.0,
            width: DEFAULT_ELEMENT_SIZE,
            height: DEFAULT_ELEMENT_SIZE,
            generation: None,
            images: Vec::new(),
            image_index: 0,
        }
    }
}

impl CanvasElement {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height, ..Default::default() }
    }

    pub fn generator(generation: Value) -> Self {
        let mut element = Self { generation: Some(generation), ..Default::default() };
        element.sync_size_from_generation();
        element
    }

    pub fn is_generator(&self) -> bool {
        self.generation.is_some()
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    /// Path of the displayed image, if `image_index` points at one.
    pub fn current_image_path(&self) -> Option<&str> {
        self.images.get(self.image_index).map(|img| img.path.as_str())
    }

    /// Copy `general.width` / `general.height` from the generation
    /// parameters into the box size. Plain image elements are untouched.
    pub fn sync_size_from_generation(&mut self) -> bool {
        let Some(general) = self.generation.as_ref().and_then(|g| g.get("general")) else {
            return false;
        };
        let w = general.get("width").and_then(Value::as_f64);
        let h = general.get("height").and_then(Value::as_f64);
        let mut changed = false;
        if let Some(w) = w
            && w as f32 != self.width
        {
            self.width = w as f32;
            changed = true;
        }
        if let Some(h) = h
            && h as f32 != self.height
        {
            self.height = h as f32;
            changed = true;
        }
        changed
    }

    /// Prompt text for generator elements, used as the layer label.
    pub fn prompt(&self) -> Option<&str> {
        self.generation
            .as_ref()?
            .get("prompt")?
            .get("prompt")?
            .as_str()
    }

    fn repair_image_index(&mut self) {
        if self.image_index >= self.images.len() {
            self.image_index = 0;
        }
    }
}

/// Generation parameters for a freshly created generator.
pub fn default_generation() -> Value {
    json!({
        "prompt": { "prompt": "" },
        "general": { "width": DEFAULT_ELEMENT_SIZE, "height": DEFAULT_ELEMENT_SIZE },
    })
}

// ============================================================================
// STROKE
// ============================================================================

/// One freehand gesture. `segments` is a flat list of x,y pairs in scene
/// space.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasStroke {
    pub tool: Tool,
    pub segments: Vec<f32>,
}

impl CanvasStroke {
    pub fn new(tool: Tool, start: Vec2) -> Self {
        Self { tool, segments: vec![start.x, start.y] }
    }

    pub fn push(&mut self, p: Vec2) {
        self.segments.push(p.x);
        self.segments.push(p.y);
    }

    pub fn point_count(&self) -> usize {
        self.segments.len() / 2
    }

    /// Number of line segments this stroke renders as.
    pub fn segment_count(&self) -> usize {
        self.point_count().saturating_sub(1)
    }

    pub fn points(&self) -> impl Iterator<Item = Vec2> + '_ {
        self.segments.chunks_exact(2).map(|c| Vec2::new(c[0], c[1]))
    }
}

// ============================================================================
// SCENE
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Scene {
    translate: Vec2,
    scale: f32,
    cursor_pos: Option<Vec2>,
    tool: Tool,
    /// Index 0 is the frontmost element.
    elements: Vec<CanvasElement>,
    strokes: Vec<CanvasStroke>,
    selected_id: Option<ElementId>,
    hovered_id: Option<ElementId>,
    #[serde(skip)]
    dirty: bool,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            translate: Vec2::ZERO,
            scale: 1.0,
            cursor_pos: None,
            tool: Tool::Select,
            elements: Vec::new(),
            strokes: Vec::new(),
            selected_id: None,
            hovered_id: None,
            dirty: true,
        }
    }
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    // -- read access ---------------------------------------------------

    pub fn translate(&self) -> Vec2 {
        self.translate
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn view(&self) -> ViewTransform {
        ViewTransform::new(self.translate, self.scale)
    }

    pub fn cursor_pos(&self) -> Option<Vec2> {
        self.cursor_pos
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn elements(&self) -> &[CanvasElement] {
        &self.elements
    }

    pub fn strokes(&self) -> &[CanvasStroke] {
        &self.strokes
    }

    pub fn selected_id(&self) -> Option<ElementId> {
        self.selected_id
    }

    pub fn hovered_id(&self) -> Option<ElementId> {
        self.hovered_id
    }

    pub fn element(&self, id: ElementId) -> Option<&CanvasElement> {
        self.elements.iter().find(|e| e.id == id)
    }

    pub fn element_index(&self, id: ElementId) -> Option<usize> {
        self.elements.iter().position(|e| e.id == id)
    }

    pub fn selected(&self) -> Option<&CanvasElement> {
        self.selected_id.and_then(|id| self.element(id))
    }

    /// First element in front-to-back order whose box contains `p`.
    pub fn element_at(&self, p: Vec2) -> Option<&CanvasElement> {
        self.elements.iter().find(|e| e.bounds().contains(p))
    }

    // -- dirty tracking ------------------------------------------------

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Return and clear the dirty flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    // -- view ----------------------------------------------------------

    pub fn set_view(&mut self, translate: Vec2, scale: f32) {
        if self.translate != translate || self.scale != scale {
            self.translate = translate;
            self.scale = scale;
            self.dirty = true;
        }
    }

    pub fn pan_by(&mut self, delta: Vec2) {
        if delta != Vec2::ZERO {
            self.translate += delta;
            self.dirty = true;
        }
    }

    pub fn set_cursor_pos(&mut self, pos: Option<Vec2>) {
        if self.cursor_pos != pos {
            self.cursor_pos = pos;
            self.dirty = true;
        }
    }

    pub fn set_tool(&mut self, tool: Tool) {
        if self.tool == tool {
            return;
        }
        self.tool = tool;
        if !tool.paints() {
            self.cursor_pos = None;
        }
        self.dirty = true;
    }

    // -- selection -----------------------------------------------------

    /// Select an element by id. Unknown ids clear the selection.
    pub fn select(&mut self, id: Option<ElementId>) {
        let id = id.filter(|id| self.element(*id).is_some());
        if self.selected_id != id {
            self.selected_id = id;
            self.dirty = true;
        }
    }

    pub fn set_hovered(&mut self, id: Option<ElementId>) {
        let id = id.filter(|id| self.element(*id).is_some());
        if self.hovered_id != id {
            self.hovered_id = id;
            self.dirty = true;
        }
    }

    // -- elements ------------------------------------------------------

    /// Mutable access to one element. Raises the dirty flag when found.
    pub fn element_mut(&mut self, id: ElementId) -> Option<&mut CanvasElement> {
        let element = self.elements.iter_mut().find(|e| e.id == id)?;
        self.dirty = true;
        Some(element)
    }

    /// Insert at the front of the stack (topmost).
    pub fn insert_element(&mut self, mut element: CanvasElement) -> Result<ElementId, SceneError> {
        if self.elements.len() >= MAX_ELEMENTS {
            return Err(SceneError::TooManyElements { limit: MAX_ELEMENTS });
        }
        element.repair_image_index();
        let id = element.id;
        self.elements.insert(0, element);
        self.dirty = true;
        Ok(id)
    }

    /// Append at the back of the stack (bottommost).
    pub fn push_element(&mut self, mut element: CanvasElement) -> Result<ElementId, SceneError> {
        if self.elements.len() >= MAX_ELEMENTS {
            return Err(SceneError::TooManyElements { limit: MAX_ELEMENTS });
        }
        element.repair_image_index();
        let id = element.id;
        self.elements.push(element);
        self.dirty = true;
        Ok(id)
    }

    /// New generator on top of the stack, sized from its parameters.
    pub fn add_generator(&mut self, generation: Option<Value>) -> Result<ElementId, SceneError> {
        let element = CanvasElement::generator(generation.unwrap_or_else(default_generation));
        self.insert_element(element)
    }

    /// New plain image element on top of the stack.
    pub fn add_image_element(
        &mut self,
        path: impl Into<String>,
        width: f32,
        height: f32,
    ) -> Result<ElementId, SceneError> {
        let mut element = CanvasElement::new(0.0, 0.0, width, height);
        element.images.push(CanvasImage { path: path.into() });
        self.insert_element(element)
    }

    pub fn remove_element(&mut self, id: ElementId) -> Option<CanvasElement> {
        let index = self.element_index(id)?;
        let removed = self.elements.remove(index);
        if self.selected_id == Some(id) {
            self.selected_id = None;
        }
        if self.hovered_id == Some(id) {
            self.hovered_id = None;
        }
        self.dirty = true;
        Some(removed)
    }

    pub fn remove_selected(&mut self) -> Option<CanvasElement> {
        let id = self.selected_id?;
        self.remove_element(id)
    }

    pub fn move_element(&mut self, id: ElementId, pos: Vec2) {
        if let Some(element) = self.elements.iter_mut().find(|e| e.id == id)
            && element.position() != pos
        {
            element.x = pos.x;
            element.y = pos.y;
            self.dirty = true;
        }
    }

    /// Generation-complete hook: append output images to a generator.
    /// Unknown ids are ignored. Returns whether anything was appended.
    pub fn append_outputs<I, S>(&mut self, id: ElementId, paths: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let Some(element) = self.elements.iter_mut().find(|e| e.id == id) else {
            return false;
        };
        let before = element.images.len();
        element.images.extend(paths.into_iter().map(|p| CanvasImage { path: p.into() }));
        let appended = element.images.len() > before;
        if appended {
            self.dirty = true;
        }
        appended
    }

    /// Replace a generator's parameters and resize its box to match.
    pub fn set_generation(&mut self, id: ElementId, generation: Value) -> bool {
        let Some(element) = self.elements.iter_mut().find(|e| e.id == id) else {
            return false;
        };
        if element.generation.as_ref() != Some(&generation) {
            element.generation = Some(generation);
            element.sync_size_from_generation();
            self.dirty = true;
        }
        true
    }

    /// Change the displayed image. Out-of-range indices are ignored.
    pub fn select_image(&mut self, id: ElementId, index: usize) -> bool {
        match self.elements.iter_mut().find(|e| e.id == id) {
            Some(element) if index < element.images.len() => {
                if element.image_index != index {
                    element.image_index = index;
                    self.dirty = true;
                }
                true
            }
            _ => false,
        }
    }

    // -- strokes -------------------------------------------------------

    pub fn begin_stroke(&mut self, tool: Tool, start: Vec2) {
        self.strokes.push(CanvasStroke::new(tool, start));
        self.dirty = true;
    }

    /// Append a point to the most recent stroke.
    pub fn extend_stroke(&mut self, p: Vec2) -> bool {
        match self.strokes.last_mut() {
            Some(stroke) => {
                stroke.push(p);
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn clear_strokes(&mut self) {
        if !self.strokes.is_empty() {
            self.strokes.clear();
            self.dirty = true;
        }
    }

    /// Restore invariants after loading a document from disk.
    pub fn repair(&mut self) {
        if !self.scale.is_finite() || self.scale <= 0.0 {
            self.scale = 1.0;
        }
        for element in &mut self.elements {
            element.repair_image_index();
        }
        self.elements.truncate(MAX_ELEMENTS);
        if let Some(id) = self.selected_id
            && self.element(id).is_none()
        {
            self.selected_id = None;
        }
        if let Some(id) = self.hovered_id
            && self.element(id).is_none()
        {
            self.hovered_id = None;
        }
        self.dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_generator_goes_to_front_with_generation_size() {
        let mut scene = Scene::new();
        let back = scene.add_image_element("a.png", 100.0, 100.0).unwrap();
        let params = json!({ "general": { "width": 768, "height": 640 } });
        let front = scene.add_generator(Some(params)).unwrap();

        assert_eq!(scene.elements()[0].id, front);
        assert_eq!(scene.elements()[1].id, back);
        let generator = scene.element(front).unwrap();
        assert!(generator.is_generator());
        assert_eq!((generator.width, generator.height), (768.0, 640.0));
    }

    #[test]
    fn default_generator_is_512() {
        let mut scene = Scene::new();
        let id = scene.add_generator(None).unwrap();
        let element = scene.element(id).unwrap();
        assert_eq!((element.width, element.height), (512.0, 512.0));
        assert_eq!(element.prompt(), Some(""));
        assert_eq!(element.current_image_path(), None);
    }

    #[test]
    fn append_outputs_targets_the_generator() {
        let mut scene = Scene::new();
        let id = scene.add_generator(None).unwrap();
        scene.take_dirty();

        assert!(scene.append_outputs(id, ["out/1.png", "out/2.png"]));
        assert!(scene.take_dirty());
        let element = scene.element(id).unwrap();
        assert_eq!(element.images.len(), 2);
        assert_eq!(element.current_image_path(), Some("out/1.png"));

    }

    #[test]
    fn append_outputs_for_deleted_element_is_a_no_op() {
        let mut scene = Scene::new();
        let id = scene.add_generator(None).unwrap();
        scene.remove_element(id);
        scene.take_dirty();

        assert!(!scene.append_outputs(id, ["late.png"]));
        assert!(!scene.take_dirty());
        assert!(scene.elements().is_empty());

        let keep = scene.add_generator(None).unwrap();
        scene.take_dirty();
        assert!(!scene.append_outputs(keep, Vec::<String>::new()));
        assert!(!scene.take_dirty());
    }

    #[test]
    fn changing_generation_resizes_the_box() {
        let mut scene = Scene::new();
        let id = scene.add_generator(None).unwrap();
        scene.take_dirty();

        let params = json!({ "general": { "width": 1024, "height": 576 }, "prompt": { "prompt": "dunes" } });
        assert!(scene.set_generation(id, params.clone()));
        assert!(scene.take_dirty());
        let element = scene.element(id).unwrap();
        assert_eq!((element.width, element.height), (1024.0, 576.0));
        assert_eq!(element.prompt(), Some("dunes"));

        assert!(scene.set_generation(id, params));
        assert!(!scene.take_dirty());
        assert!(!scene.set_generation(Uuid::new_v4(), json!({})));
    }

    #[test]
    fn select_image_ignores_out_of_range() {
        let mut scene = Scene::new();
        let id = scene.add_generator(None).unwrap();
        assert!(scene.append_outputs(id, ["a.png", "b.png"]));
        assert!(scene.select_image(id, 1));
        assert_eq!(scene.element(id).unwrap().current_image_path(), Some("b.png"));
        assert!(!scene.select_image(id, 2));
        assert_eq!(scene.element(id).unwrap().image_index, 1);
    }

    #[test]
    fn removing_element_clears_references() {
        let mut scene = Scene::new();
        let id = scene.add_generator(None).unwrap();
        scene.select(Some(id));
        scene.set_hovered(Some(id));
        assert!(scene.remove_selected().is_some());
        assert_eq!(scene.selected_id(), None);
        assert_eq!(scene.hovered_id(), None);
        assert!(scene.remove_selected().is_none());
    }

    #[test]
    fn selecting_unknown_id_clears_selection() {
        let mut scene = Scene::new();
        let id = scene.add_generator(None).unwrap();
        scene.select(Some(id));
        scene.select(Some(Uuid::new_v4()));
        assert_eq!(scene.selected_id(), None);
    }

    #[test]
    fn stroke_segments_are_flat_pairs() {
        let mut scene = Scene::new();
        assert!(!scene.extend_stroke(Vec2::new(1.0, 1.0)));
        scene.begin_stroke(Tool::Brush, Vec2::new(0.0, 0.0));
        scene.extend_stroke(Vec2::new(10.0, 0.0));
        scene.extend_stroke(Vec2::new(10.0, 10.0));

        let stroke = &scene.strokes()[0];
        assert_eq!(stroke.segments, vec![0.0, 0.0, 10.0, 0.0, 10.0, 10.0]);
        assert_eq!(stroke.point_count(), 3);
        assert_eq!(stroke.segment_count(), 2);

        scene.clear_strokes();
        assert!(scene.strokes().is_empty());
    }

    #[test]
    fn empty_stroke_has_no_segments() {
        let stroke = CanvasStroke::default();
        assert_eq!(stroke.segment_count(), 0);
        let single = CanvasStroke::new(Tool::Eraser, Vec2::new(5.0, 5.0));
        assert_eq!(single.segment_count(), 0);
    }

    #[test]
    fn switching_to_select_drops_cursor() {
        let mut scene = Scene::new();
        scene.set_tool(Tool::Brush);
        scene.set_cursor_pos(Some(Vec2::new(4.0, 4.0)));
        scene.set_tool(Tool::Select);
        assert_eq!(scene.cursor_pos(), None);
    }

    #[test]
    fn unchanged_hover_does_not_dirty() {
        let mut scene = Scene::new();
        let id = scene.add_generator(None).unwrap();
        scene.set_hovered(Some(id));
        scene.take_dirty();
        scene.set_hovered(Some(id));
        assert!(!scene.is_dirty());
    }

    #[test]
    fn json_uses_document_field_names() {
        let mut scene = Scene::new();
        let id = scene.add_image_element("img/a.png", 64.0, 32.0).unwrap();
        scene.select(Some(id));
        scene.begin_stroke(Tool::Eraser, Vec2::new(1.0, 2.0));

        let value = serde_json::to_value(&scene).unwrap();
        assert_eq!(value["scale"], json!(1.0));
        assert_eq!(value["selectedId"], json!(id.to_string()));
        assert_eq!(value["elements"][0]["imageIndex"], json!(0));
        assert_eq!(value["elements"][0]["images"][0]["path"], json!("img/a.png"));
        assert_eq!(value["strokes"][0]["tool"], json!("eraser"));
        assert!(value.get("dirty").is_none());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let scene: Scene = serde_json::from_str(r#"{ "elements": [ { "x": 8 } ] }"#).unwrap();
        assert_eq!(scene.scale(), 1.0);
        assert_eq!(scene.tool(), Tool::Select);
        let element = &scene.elements()[0];
        assert_eq!((element.x, element.width, element.height), (8.0, 512.0, 512.0));
    }

    #[test]
    fn repair_fixes_index_and_dangling_ids() {
        let text = r#"{
            "scale": 0,
            "selectedId": "7d8f2b1e-0c2a-4d4e-9a51-1f1c2b3d4e5f",
            "elements": [ { "images": [ { "path": "a.png" } ], "imageIndex": 4 } ]
        }"#;
        let mut scene: Scene = serde_json::from_str(text).unwrap();
        scene.repair();
        assert_eq!(scene.scale(), 1.0);
        assert_eq!(scene.selected_id(), None);
        assert_eq!(scene.elements()[0].image_index, 0);
    }
}
