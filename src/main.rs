// Release builds on Windows are GUI-subsystem binaries; the headless export
// is meant to be scripted from a debug build or a non-Windows host.
#![cfg_attr(all(windows, not(debug_assertions)), windows_subsystem = "windows")]

mod app;
mod cli;

use std::process::ExitCode;

use app::SeedCanvasApp;
use clap::Parser;
use eframe::egui;
use seed_canvas::logger;

fn main() -> ExitCode {
    // Session log (overwrites the previous session's log)
    logger::init();

    if cli::CliArgs::is_cli_mode() {
        return cli::run(cli::CliArgs::parse());
    }

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 800.0])
            .with_min_inner_size([640.0, 400.0])
            .with_title("SeedCanvas"),
        ..Default::default()
    };

    match eframe::run_native(
        "SeedCanvas",
        options,
        Box::new(|cc| Box::new(SeedCanvasApp::new(cc))),
    ) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("window closed with error: {e}");
            ExitCode::FAILURE
        }
    }
}
