// ============================================================================
// SEED CANVAS APP — eframe host: toolbar, layer panel, canvas widget
// ============================================================================
//
// The canvas widget forwards raw egui pointer/wheel/key events to the
// InputController in physical pixels. The scene's dirty flag and the
// FrameScheduler decide when SceneRenderer draws; the read-back frame is
// shown as a single egui texture stretched over the widget.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use eframe::egui;
use tracing::{error, info, warn};

use seed_canvas::error::RenderError;
use seed_canvas::geometry::Vec2;
use seed_canvas::gpu::{HttpImageLoader, SceneRenderer};
use seed_canvas::input::{InputController, Key};
use seed_canvas::scene::{ElementId, Scene, Tool};
use seed_canvas::schedule::FrameScheduler;
use seed_canvas::settings::AppSettings;
use seed_canvas::store;

/// Deferred layer-panel edits, applied after the panel releases its borrow
/// of the scene.
enum LayerAction {
    Select(ElementId),
    ShowImage(ElementId, usize),
    Delete(ElementId),
}

pub struct SeedCanvasApp {
    settings: AppSettings,
    scene: Scene,
    scene_path: PathBuf,
    input: InputController,
    scheduler: FrameScheduler,
    /// `None` when the GPU could not be initialised; the canvas shows
    /// `renderer_error` instead.
    renderer: Option<SceneRenderer>,
    renderer_error: Option<String>,
    frame_texture: Option<egui::TextureHandle>,
    frame_size: (u32, u32),

    needs_save: bool,
    last_autosave: Instant,
    pending_delete: Option<ElementId>,
    show_settings: bool,
    server_edit: String,
    user_edit: String,
    status: String,
}

impl SeedCanvasApp {
    pub fn new(cc: &eframe::CreationContext<'_>) -> Self {
        let settings = AppSettings::load();
        let scene_path = settings.scene_file();
        let mut status = String::new();
        let mut scene = match store::load_or_default(&scene_path) {
            Ok(scene) => scene,
            Err(e) => {
                warn!("could not load scene {}: {e}", scene_path.display());
                status = format!("Scene not loaded: {e}");
                Scene::new()
            }
        };
        // freshly loaded, nothing to autosave yet
        scene.take_dirty();

        let repaint_ctx = cc.egui_ctx.clone();
        let scheduler = FrameScheduler::with_waker(move || repaint_ctx.request_repaint());

        let (renderer, renderer_error) = match create_renderer(&settings, scheduler.clone()) {
            Ok(renderer) => {
                info!(adapter = renderer.adapter_name(), "canvas renderer ready");
                (Some(renderer), None)
            }
            Err(e) => {
                error!("canvas disabled: {e}");
                (None, Some(e))
            }
        };
        scheduler.request_render();

        Self {
            server_edit: settings.server_url.clone(),
            user_edit: settings.user.clone(),
            settings,
            scene,
            scene_path,
            input: InputController::new(),
            scheduler,
            renderer,
            renderer_error,
            frame_texture: None,
            frame_size: (0, 0),
            needs_save: false,
            last_autosave: Instant::now(),
            pending_delete: None,
            show_settings: false,
            status,
        }
    }

    // ========================================================================
    // TOOLBAR
    // ========================================================================

    fn show_toolbar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                let mut tool = self.scene.tool();
                for candidate in [Tool::Select, Tool::Brush, Tool::Eraser] {
                    ui.selectable_value(&mut tool, candidate, candidate.label());
                }
                if tool != self.scene.tool() {
                    self.scene.set_tool(tool);
                }

                ui.separator();
                if ui.button("Clear strokes").clicked() {
                    self.scene.clear_strokes();
                }
                if ui.button("New generator").clicked() {
                    match self.scene.add_generator(None) {
                        Ok(id) => self.scene.select(Some(id)),
                        Err(e) => self.status = e.to_string(),
                    }
                }
                let can_export = self.renderer.is_some() && self.scene.selected_id().is_some();
                if ui
                    .add_enabled(can_export, egui::Button::new("Export mask"))
                    .on_disabled_hover_text("Select an element first")
                    .clicked()
                {
                    self.export_selected_mask();
                }

                ui.separator();
                if ui.button("Server…").clicked() {
                    self.show_settings = !self.show_settings;
                }
                if !self.status.is_empty() {
                    ui.separator();
                    ui.label(self.status.as_str());
                }
            });
        });
    }

    fn export_selected_mask(&mut self) {
        let (Some(renderer), Some(id)) = (self.renderer.as_mut(), self.scene.selected_id()) else {
            return;
        };
        let Some(path) = rfd::FileDialog::new()
            .add_filter("PNG", &["png"])
            .set_file_name("mask.png")
            .save_file()
        else {
            return;
        };

        let result = renderer
            .generate_mask(&self.scene, id)
            .map_err(|e| e.to_string())
            .and_then(|mask| {
                mask.into_image()
                    .ok_or_else(|| "mask buffer does not match its dimensions".to_string())
            })
            .and_then(|image| {
                image
                    .save_with_format(&path, image::ImageFormat::Png)
                    .map_err(|e| e.to_string())
            });
        self.status = match result {
            Ok(()) => {
                info!(path = %path.display(), "mask exported");
                format!("Mask saved to {}", path.display())
            }
            Err(e) => {
                error!("mask export failed: {e}");
                format!("Mask export failed: {e}")
            }
        };
    }

    fn show_settings_window(&mut self, ctx: &egui::Context) {
        let mut open = self.show_settings;
        let mut apply = false;
        egui::Window::new("Server")
            .open(&mut open)
            .resizable(false)
            .show(ctx, |ui| {
                egui::Grid::new("server_settings").num_columns(2).show(ui, |ui| {
                    ui.label("URL");
                    ui.text_edit_singleline(&mut self.server_edit);
                    ui.end_row();
                    ui.label("User");
                    ui.text_edit_singleline(&mut self.user_edit);
                    ui.end_row();
                });
                apply = ui.button("Apply").clicked();
            });
        self.show_settings = open;

        if apply {
            let server = self.server_edit.trim().to_string();
            let user = self.user_edit.trim().to_string();
            if let Some(renderer) = self.renderer.as_mut() {
                renderer.set_server_url(&server);
                renderer.set_user(&user);
            }
            self.settings.server_url = server;
            self.settings.user = user;
            if let Err(e) = self.settings.save() {
                warn!("could not save settings: {e}");
                self.status = format!("Settings not saved: {e}");
            }
        }
    }

    // ========================================================================
    // LAYER PANEL
    // ========================================================================

    fn show_layer_panel(&mut self, ctx: &egui::Context) {
        let mut actions = Vec::new();
        egui::SidePanel::left("layers").default_width(220.0).show(ctx, |ui| {
            ui.heading("Layers");
            ui.separator();
            egui::ScrollArea::vertical().show(ui, |ui| {
                if self.scene.elements().is_empty() {
                    ui.weak("Empty canvas");
                }
                let selected = self.scene.selected_id();
                for element in self.scene.elements() {
                    let label = element.prompt().filter(|p| !p.is_empty()).unwrap_or("Image");
                    ui.horizontal(|ui| {
                        if ui
                            .selectable_label(selected == Some(element.id), truncate(label, 28))
                            .clicked()
                        {
                            actions.push(LayerAction::Select(element.id));
                        }
                        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                            if ui.small_button("🗑").on_hover_text("Delete").clicked() {
                                actions.push(LayerAction::Delete(element.id));
                            }
                        });
                    });
                    if element.images.len() > 1 {
                        ui.horizontal_wrapped(|ui| {
                            for index in 0..element.images.len() {
                                let current = index == element.image_index;
                                if ui.selectable_label(current, (index + 1).to_string()).clicked() {
                                    actions.push(LayerAction::ShowImage(element.id, index));
                                }
                            }
                        });
                    }
                    ui.separator();
                }
            });
        });

        for action in actions {
            match action {
                LayerAction::Select(id) => self.scene.select(Some(id)),
                LayerAction::ShowImage(id, index) => {
                    self.scene.select_image(id, index);
                }
                LayerAction::Delete(id) => self.pending_delete = Some(id),
            }
        }
    }

    fn show_delete_dialog(&mut self, ctx: &egui::Context) {
        let Some(id) = self.pending_delete else {
            return;
        };
        let mut decided = None;
        egui::Window::new("Delete element?")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::Vec2::ZERO)
            .show(ctx, |ui| {
                ui.label("The element and its images will be removed from the canvas.");
                ui.horizontal(|ui| {
                    if ui.button("Delete").clicked() {
                        decided = Some(true);
                    }
                    if ui.button("Cancel").clicked() {
                        decided = Some(false);
                    }
                });
            });
        match decided {
            Some(true) => {
                delete_element(&mut self.scene, &mut self.input, &self.scheduler, id);
                self.pending_delete = None;
            }
            Some(false) => self.pending_delete = None,
            None => {}
        }
    }

    // ========================================================================
    // CANVAS
    // ========================================================================

    fn show_canvas(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| {
                let (rect, _response) = ui.allocate_exact_size(ui.available_size(), egui::Sense::click_and_drag());

                if self.renderer.is_none() {
                    let reason = self.renderer_error.as_deref().unwrap_or("no GPU available");
                    ui.painter().text(
                        rect.center(),
                        egui::Align2::CENTER_CENTER,
                        format!("Canvas unavailable: {reason}"),
                        egui::FontId::proportional(16.0),
                        ui.visuals().warn_fg_color,
                    );
                    return;
                }

                let ppp = ctx.pixels_per_point();
                self.forward_input(ctx, rect, ppp);

                let size = (
                    (rect.width() * ppp).round().max(0.0) as u32,
                    (rect.height() * ppp).round().max(0.0) as u32,
                );
                if size != self.frame_size {
                    self.frame_size = size;
                    self.scheduler.request_render();
                }
                if self.scene.take_dirty() {
                    self.needs_save = true;
                    self.scheduler.request_render();
                }
                if self.scheduler.take_pending() {
                    self.render_frame(ctx);
                }

                if let Some(texture) = &self.frame_texture {
                    let uv = egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0));
                    ui.painter().image(texture.id(), rect, uv, egui::Color32::WHITE);
                }
            });
    }

    /// Translate this frame's egui events into controller calls.
    fn forward_input(&mut self, ctx: &egui::Context, rect: egui::Rect, ppp: f32) {
        let events = ctx.input(|i| i.events.clone());
        let keyboard_free = ctx.memory(|m| m.focus().is_none()) && self.pending_delete.is_none();
        let to_screen = |pos: egui::Pos2| {
            let local = (pos - rect.min) * ppp;
            Vec2::new(local.x, local.y)
        };

        for event in events {
            match event {
                egui::Event::PointerButton {
                    pos,
                    button: egui::PointerButton::Primary,
                    pressed,
                    ..
                } => {
                    if pressed && rect.contains(pos) {
                        self.input.pointer_down(&mut self.scene, to_screen(pos));
                    } else if !pressed {
                        self.input.pointer_up();
                    }
                }
                egui::Event::PointerMoved(pos) => {
                    if rect.contains(pos) || self.input.is_active() {
                        self.input.pointer_move(&mut self.scene, to_screen(pos));
                    } else {
                        self.input.pointer_leave(&mut self.scene);
                    }
                }
                egui::Event::PointerGone => self.input.pointer_leave(&mut self.scene),
                egui::Event::Scroll(delta) => {
                    if let Some(pos) = ctx.input(|i| i.pointer.hover_pos())
                        && rect.contains(pos)
                    {
                        // egui reports "content moves down" as positive; the
                        // controller expects positive = scroll down.
                        self.input.wheel(&mut self.scene, to_screen(pos), -delta.y);
                    }
                }
                egui::Event::Key { key, pressed: true, .. } if keyboard_free => {
                    let key = match key {
                        egui::Key::Backspace => Key::Backspace,
                        egui::Key::Delete => Key::Delete,
                        _ => Key::Other,
                    };
                    self.input.key_down(&mut self.scene, key);
                }
                _ => {}
            }
        }
    }

    fn render_frame(&mut self, ctx: &egui::Context) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        let (width, height) = self.frame_size;
        if width == 0 || height == 0 {
            return;
        }
        match renderer.render(&self.scene, width, height) {
            Ok(frame) => {
                let image = egui::ColorImage::from_rgba_unmultiplied(
                    [frame.width as usize, frame.height as usize],
                    frame.pixels,
                );
                match &mut self.frame_texture {
                    Some(handle) => handle.set(image, egui::TextureOptions::NEAREST),
                    None => {
                        self.frame_texture = Some(ctx.load_texture("canvas_frame", image, egui::TextureOptions::NEAREST));
                    }
                }
            }
            Err(RenderError::IncompleteTarget { width, height, reason }) => {
                warn!(width, height, "canvas frame skipped: {reason}");
            }
            Err(e) => {
                error!("canvas frame failed: {e}");
                self.status = format!("Render failed: {e}");
            }
        }
    }

    // ========================================================================
    // PERSISTENCE
    // ========================================================================

    fn autosave(&mut self, ctx: &egui::Context, force: bool) {
        if !self.needs_save {
            return;
        }
        let interval = Duration::from_secs(self.settings.autosave_secs);
        if !force && (interval.is_zero() || self.last_autosave.elapsed() < interval) {
            if !interval.is_zero() {
                ctx.request_repaint_after(interval);
            }
            return;
        }
        self.last_autosave = Instant::now();
        match store::save_scene(&self.scene_path, &self.scene) {
            Ok(()) => self.needs_save = false,
            Err(e) => {
                warn!("autosave to {} failed: {e}", self.scene_path.display());
                self.status = format!("Autosave failed: {e}");
            }
        }
    }
}

impl eframe::App for SeedCanvasApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let title = if self.needs_save { "SeedCanvas*" } else { "SeedCanvas" };
        ctx.send_viewport_cmd(egui::ViewportCommand::Title(title.to_string()));

        self.show_toolbar(ctx);
        self.show_layer_panel(ctx);
        self.show_canvas(ctx);
        self.show_delete_dialog(ctx);
        if self.show_settings {
            self.show_settings_window(ctx);
        }

        let closing = ctx.input(|i| i.viewport().close_requested());
        self.autosave(ctx, closing);
    }
}

/// Both failures leave the canvas disabled with the message on screen.
fn create_renderer(settings: &AppSettings, scheduler: FrameScheduler) -> Result<SceneRenderer, String> {
    let loader = HttpImageLoader::new().map_err(|e| format!("image loader: {e}"))?;
    SceneRenderer::new(&settings.preferred_gpu, settings.resolver(), Arc::new(loader), scheduler)
        .map_err(|e| e.to_string())
}

/// Confirmed delete. Runs after the canvas has drawn this frame, so it has
/// to ask for the next one itself.
fn delete_element(scene: &mut Scene, input: &mut InputController, scheduler: &FrameScheduler, id: ElementId) -> bool {
    if input.captured() == Some(id) {
        input.pointer_up();
    }
    let removed = scene.remove_element(id).is_some();
    if removed {
        scheduler.request_render();
    }
    removed
}

fn truncate(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() { format!("{head}…") } else { head }
}
