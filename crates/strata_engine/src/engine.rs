//! Host loop
//!
//! [`Engine::run`] wires the window, the Vulkan instance, the frame
//! orchestrator and the frame scheduler together, then runs frames until the
//! window closes or the application calls [`Engine::quit`].

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use thiserror::Error;

use crate::application::Application;
use crate::config::{ConfigError, EngineConfig};
use crate::render::error::VulkanError;
use crate::render::gpu::GpuInstance;
use crate::render::orchestrator::FrameOrchestrator;
use crate::render::stage::{RenderStage, StageId};
use crate::render::vulkan::{VulkanGpu, VulkanInstance, Window, WindowError, WindowSignal};
use crate::schedule::{DeregisterHandle, FrameScheduler, ScheduleError, UpdateHandle, UpdateStage, Updatable};

/// Engine-level errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Rendering failure
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] VulkanError),

    /// Scheduler misuse
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    /// Window system failure
    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    /// Configuration could not be read or written
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Run state changed out of order
    #[error("Invalid engine state transition: {from:?} -> {to:?}")]
    InvalidStateTransition {
        /// State the engine was in
        from: RunState,
        /// State that was requested
        to: RunState,
    },

    /// Error raised by application code
    #[error("Application error: {0}")]
    Application(String),
}

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Subsystems not yet created
    PreInitialise,
    /// Subsystems created, application initialised
    Initialised,
    /// Host loop running
    Running,
    /// Tearing down
    Stopping,
    /// Everything released
    Stopped,
}

impl RunState {
    /// The only state this one may move to
    pub fn next(self) -> Option<Self> {
        match self {
            Self::PreInitialise => Some(Self::Initialised),
            Self::Initialised => Some(Self::Running),
            Self::Running => Some(Self::Stopping),
            Self::Stopping => Some(Self::Stopped),
            Self::Stopped => None,
        }
    }

    /// Move to `to`, which must be the next state
    pub fn transition(&mut self, to: Self) -> Result<(), EngineError> {
        if self.next() != Some(to) {
            return Err(EngineError::InvalidStateTransition { from: *self, to });
        }
        log::debug!("Engine state {self:?} -> {to:?}");
        *self = to;
        Ok(())
    }
}

/// What the host loop does with an error from a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRecovery {
    /// Rebuild the swapchain and keep running
    RecreateSwapchain,
    /// Stop the loop and return the error
    Fatal,
}

impl FrameRecovery {
    /// Classify a frame error
    pub fn for_error(error: &EngineError) -> Self {
        match error {
            EngineError::Vulkan(VulkanError::SwapchainOutOfDate) => Self::RecreateSwapchain,
            _ => Self::Fatal,
        }
    }
}

/// Source of window signals, pumped once per frame
pub trait SignalSource {
    /// Process pending platform events and return what happened
    fn pump(&mut self) -> Vec<WindowSignal>;
}

impl SignalSource for Window {
    fn pump(&mut self) -> Vec<WindowSignal> {
        self.poll_events();
        self.drain_events()
    }
}

/// Forwards window signals to the orchestrator and latches close requests
pub struct WindowPump<S: SignalSource, I: GpuInstance> {
    source: Rc<RefCell<S>>,
    orchestrator: Rc<RefCell<FrameOrchestrator<I>>>,
    close_requested: Rc<Cell<bool>>,
}

impl<S: SignalSource, I: GpuInstance> WindowPump<S, I> {
    /// Pump `source` into `orchestrator`, setting `close_requested` on close
    pub fn new(
        source: Rc<RefCell<S>>,
        orchestrator: Rc<RefCell<FrameOrchestrator<I>>>,
        close_requested: Rc<Cell<bool>>,
    ) -> Self {
        Self {
            source,
            orchestrator,
            close_requested,
        }
    }
}

impl<S: SignalSource, I: GpuInstance> Updatable for WindowPump<S, I> {
    fn update(&mut self, _delta_time: f32) -> Result<(), EngineError> {
        let signals = self.source.borrow_mut().pump();
        for signal in signals {
            match signal {
                WindowSignal::Resized(width, height) => {
                    self.orchestrator.borrow_mut().window_resized(width, height);
                }
                WindowSignal::CloseRequested => {
                    log::info!("Window close requested");
                    self.close_requested.set(true);
                }
            }
        }
        Ok(())
    }
}

/// Running engine handed to the [`Application`]
///
/// Fields drop in declaration order: the scheduler releases its handles
/// before the orchestrator tears down, and the window outlives its surface.
pub struct Engine {
    scheduler: FrameScheduler,
    orchestrator: Rc<RefCell<FrameOrchestrator<VulkanInstance>>>,
    window: Rc<RefCell<Window>>,
    config: EngineConfig,
    state: RunState,
    quit: Rc<Cell<bool>>,
}

impl Engine {
    /// Create the window, the Vulkan instance, the orchestrator and the scheduler
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        log::info!("Initializing engine for '{}'", config.application_name);
        let mut state = RunState::PreInitialise;

        let window = Window::new(&config.window)?;
        let extensions = window.required_instance_extensions()?;
        let instance = VulkanInstance::new(&config.application_name, &extensions, &config.renderer)?;

        state.transition(RunState::Initialised)?;
        Ok(Self {
            scheduler: FrameScheduler::new(),
            orchestrator: Rc::new(RefCell::new(FrameOrchestrator::new(instance))),
            window: Rc::new(RefCell::new(window)),
            config,
            state,
            quit: Rc::new(Cell::new(false)),
        })
    }

    /// Run `app` until the window closes or [`Engine::quit`] is called
    ///
    /// Any fatal error stops the loop; the engine still shuts down cleanly
    /// before the error is returned.
    pub fn run<A: Application>(config: EngineConfig, app: &mut A) -> Result<(), EngineError> {
        let mut engine = Self::new(config)?;

        app.initialize(&mut engine)
            .map_err(|e| EngineError::Application(format!("App initialization: {e}")))?;

        let result = engine.start().and_then(|()| engine.main_loop(app));
        if let Err(e) = &result {
            log::error!("Stopping after fatal error: {e}");
        }

        let shutdown = engine.shutdown(app);
        result.and(shutdown)
    }

    fn start(&mut self) -> Result<(), EngineError> {
        self.state.transition(RunState::Running)?;
        self.orchestrator.borrow_mut().start(&mut *self.window.borrow_mut())?;

        let pump: UpdateHandle = Rc::new(RefCell::new(WindowPump::new(
            Rc::clone(&self.window),
            Rc::clone(&self.orchestrator),
            Rc::clone(&self.quit),
        )));
        self.scheduler.register(pump, UpdateStage::PreUpdate)?;
        let orchestrator: UpdateHandle = self.orchestrator.clone();
        self.scheduler.register(orchestrator, UpdateStage::Render)?;

        self.scheduler.start();
        log::info!("Starting main loop");
        Ok(())
    }

    fn main_loop<A: Application>(&mut self, app: &mut A) -> Result<(), EngineError> {
        while !self.should_stop() {
            if let Err(error) = self.scheduler.run_frame() {
                match FrameRecovery::for_error(&error) {
                    FrameRecovery::RecreateSwapchain => self.recreate_swapchain()?,
                    FrameRecovery::Fatal => return Err(error),
                }
            }

            let delta_time = self.scheduler.delta_time();
            app.update(self, delta_time)
                .map_err(|e| EngineError::Application(format!("App update: {e}")))?;
        }
        Ok(())
    }

    fn recreate_swapchain(&mut self) -> Result<(), EngineError> {
        let (width, height) = self.window.borrow().framebuffer_size();
        let mut orchestrator = self.orchestrator.borrow_mut();
        orchestrator.window_resized(width, height);
        if width > 0 && height > 0 {
            orchestrator.recreate_swapchain()?;
        }
        Ok(())
    }

    fn shutdown<A: Application>(&mut self, app: &mut A) -> Result<(), EngineError> {
        self.state.transition(RunState::Stopping)?;
        app.cleanup(self);
        self.orchestrator.borrow_mut().stop();
        self.state.transition(RunState::Stopped)?;
        log::info!(
            "Engine shutdown complete after {} frame(s)",
            self.scheduler.frame_count()
        );
        Ok(())
    }

    fn should_stop(&self) -> bool {
        self.quit.get() || self.window.borrow().should_close()
    }

    /// Ask the host loop to stop after the current iteration
    pub fn quit(&mut self) {
        self.quit.set(true);
    }

    /// Current lifecycle state
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Configuration the engine was started with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Append a render stage to every frame
    pub fn add_stage(&mut self, stage: Box<dyn RenderStage<VulkanGpu>>) -> Result<StageId, EngineError> {
        Ok(self.orchestrator.borrow_mut().add_stage(stage)?)
    }

    /// Run `updatable` once per frame in `stage`
    pub fn register(&mut self, updatable: UpdateHandle, stage: UpdateStage) -> Result<(), EngineError> {
        Ok(self.scheduler.register(updatable, stage)?)
    }

    /// Handle that removes updatables, usable from inside an update
    pub fn deregister_handle(&self) -> DeregisterHandle {
        self.scheduler.deregister_handle()
    }

    /// Seconds between the last two frames
    pub fn delta_time(&self) -> f32 {
        self.scheduler.delta_time()
    }

    /// Frame rate averaged over recent frames
    pub fn frames_per_second(&self) -> f32 {
        self.scheduler.frames_per_second()
    }

    /// Shared orchestrator, for inspection or explicit recreation
    pub fn orchestrator(&self) -> &Rc<RefCell<FrameOrchestrator<VulkanInstance>>> {
        &self.orchestrator
    }
}
