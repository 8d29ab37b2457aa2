//! Strata demo application
//!
//! Opens a window, clears it to grey with a highlighted inset rectangle and
//! logs the frame rate once per second.

use std::cell::RefCell;
use std::rc::Rc;

use strata_engine::prelude::*;
use strata_engine::vk;
use thiserror::Error;

const CONFIG_PATH: &str = "strata.toml";
const BACKGROUND: [f32; 4] = [0.25, 0.25, 0.25, 0.0];
const HIGHLIGHT: [f32; 4] = [0.85, 0.45, 0.1, 1.0];

#[derive(Error, Debug)]
enum DemoError {
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Logs the smoothed frame rate at a fixed interval
struct FrameTelemetry {
    elapsed: f32,
    frames: u32,
}

impl FrameTelemetry {
    const REPORT_INTERVAL: f32 = 1.0;

    fn new() -> Self {
        Self { elapsed: 0.0, frames: 0 }
    }
}

impl Updatable for FrameTelemetry {
    fn update(&mut self, delta_time: f32) -> Result<(), EngineError> {
        self.elapsed += delta_time;
        self.frames += 1;
        if self.elapsed >= Self::REPORT_INTERVAL {
            log::info!(
                "{} frames in {:.2}s ({:.1} fps)",
                self.frames,
                self.elapsed,
                self.frames as f32 / self.elapsed
            );
            self.elapsed = 0.0;
            self.frames = 0;
        }
        Ok(())
    }
}

struct DemoApp;

impl Application for DemoApp {
    fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError> {
        log::info!("Initializing demo...");

        engine.add_stage(Box::new(ClearStage::new().with_color(BACKGROUND).with_depth(1.0)))?;

        let window = &engine.config().window;
        let inset = vk::Rect2D {
            offset: vk::Offset2D {
                x: (window.width / 4) as i32,
                y: (window.height / 4) as i32,
            },
            extent: vk::Extent2D {
                width: window.width / 2,
                height: window.height / 2,
            },
        };
        engine.add_stage(Box::new(ClearStage::new().with_color(HIGHLIGHT).with_region(inset)))?;

        let telemetry: UpdateHandle = Rc::new(RefCell::new(FrameTelemetry::new()));
        engine.register(telemetry, UpdateStage::PostRender)?;
        Ok(())
    }

    fn cleanup(&mut self, engine: &mut Engine) {
        log::info!("Demo finished at {:.1} fps", engine.frames_per_second());
    }
}

fn run() -> Result<(), DemoError> {
    let config = EngineConfig::load_or_default(CONFIG_PATH).map_err(EngineError::from)?;
    Engine::run(config, &mut DemoApp)?;
    Ok(())
}

fn main() {
    logging::init();

    if let Err(e) = run() {
        log::error!("Demo failed: {e}");
        std::process::exit(1);
    }
}
