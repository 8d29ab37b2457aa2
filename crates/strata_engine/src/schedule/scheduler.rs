//! Frame scheduler
//!
//! Runs registered updatables once per frame, stage by stage. Stage order is
//! the declaration order of [`UpdateStage`]; within a stage, updatables run in
//! registration order.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use thiserror::Error;

use crate::engine::EngineError;
use crate::foundation::time::{DeltaWindow, FrameClock, MonotonicClock};

/// Fixed phases of one frame, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UpdateStage {
    /// Not a valid registration target
    None,
    /// Input and window events
    PreUpdate,
    /// Game and simulation logic
    Update,
    /// Work that depends on the results of `Update`
    PostUpdate,
    /// Preparation of render data
    PreRender,
    /// Frame submission
    Render,
    /// Telemetry and cleanup after submission
    PostRender,
}

/// Component driven once per frame by the scheduler
pub trait Updatable {
    /// Advance by `delta_time` seconds
    fn update(&mut self, delta_time: f32) -> Result<(), EngineError>;
}

/// Shared handle to a registered updatable
pub type UpdateHandle = Rc<RefCell<dyn Updatable>>;

/// Scheduling misuse
#[derive(Error, Debug)]
pub enum ScheduleError {
    /// Registration against a stage that never runs
    #[error("Cannot register an updatable against stage {0:?}")]
    InvalidStage(UpdateStage),

    /// An updatable was already mutably borrowed when its turn came
    #[error("Updatable in stage {0:?} is already borrowed")]
    Reentrant(UpdateStage),
}

/// Queues deregistrations from anywhere that can hold a clone
///
/// Removals take effect at the scheduler's next drain point: the start of a
/// frame or the end of the stage currently running.
#[derive(Clone)]
pub struct DeregisterHandle {
    pending: Rc<RefCell<Vec<UpdateHandle>>>,
}

impl DeregisterHandle {
    /// Mark `updatable` for removal from every stage
    pub fn deregister(&self, updatable: &UpdateHandle) {
        self.pending.borrow_mut().push(Rc::clone(updatable));
    }
}

fn same_updatable(a: &UpdateHandle, b: &UpdateHandle) -> bool {
    std::ptr::eq(Rc::as_ptr(a).cast::<()>(), Rc::as_ptr(b).cast::<()>())
}

/// Runs every registered updatable once per frame
pub struct FrameScheduler<C: FrameClock = MonotonicClock> {
    clock: C,
    stages: Vec<(UpdateStage, Vec<UpdateHandle>)>,
    pending: Rc<RefCell<Vec<UpdateHandle>>>,
    last_timestamp: Duration,
    delta_time: f32,
    deltas: DeltaWindow,
    frame_count: u64,
}

impl Default for FrameScheduler<MonotonicClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameScheduler<MonotonicClock> {
    /// Scheduler timed by the wall clock
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::new())
    }
}

impl<C: FrameClock> FrameScheduler<C> {
    /// Scheduler timed by `clock`
    pub fn with_clock(clock: C) -> Self {
        let last_timestamp = clock.now();
        Self {
            clock,
            stages: Vec::new(),
            pending: Rc::default(),
            last_timestamp,
            delta_time: 0.0,
            deltas: DeltaWindow::new(),
            frame_count: 0,
        }
    }

    /// Reset the frame timer so the first frame does not include setup time
    pub fn start(&mut self) {
        self.last_timestamp = self.clock.now();
        log::debug!("Frame scheduler started");
    }

    /// Append `updatable` to `stage`
    ///
    /// The first registration for a stage inserts it into the sorted stage
    /// list; frames never sort.
    pub fn register(&mut self, updatable: UpdateHandle, stage: UpdateStage) -> Result<(), ScheduleError> {
        if stage == UpdateStage::None {
            return Err(ScheduleError::InvalidStage(stage));
        }

        match self.stages.binary_search_by(|(existing, _)| existing.cmp(&stage)) {
            Ok(index) => self.stages[index].1.push(updatable),
            Err(index) => {
                log::trace!("First registration for {stage:?}");
                self.stages.insert(index, (stage, vec![updatable]));
            }
        }
        Ok(())
    }

    /// Mark `updatable` for removal from every stage
    pub fn deregister(&self, updatable: &UpdateHandle) {
        self.pending.borrow_mut().push(Rc::clone(updatable));
    }

    /// Handle that can deregister while the scheduler is borrowed
    pub fn deregister_handle(&self) -> DeregisterHandle {
        DeregisterHandle {
            pending: Rc::clone(&self.pending),
        }
    }

    /// Measure the frame delta and run every stage in order
    ///
    /// The first updatable error aborts the rest of the frame. Removals
    /// requested before the error still take effect.
    pub fn run_frame(&mut self) -> Result<(), EngineError> {
        let now = self.clock.now();
        self.delta_time = now.saturating_sub(self.last_timestamp).as_secs_f32();
        self.last_timestamp = now;
        self.deltas.push(self.delta_time);
        self.frame_count += 1;

        self.purge_pending();

        let delta_time = self.delta_time;
        for index in 0..self.stages.len() {
            let result = self.run_stage(index, delta_time);
            self.purge_pending();
            result?;
        }
        Ok(())
    }

    fn run_stage(&self, index: usize, delta_time: f32) -> Result<(), EngineError> {
        let (stage, updatables) = &self.stages[index];
        for updatable in updatables {
            let mut updatable = updatable
                .try_borrow_mut()
                .map_err(|_| ScheduleError::Reentrant(*stage))?;
            updatable.update(delta_time)?;
        }
        Ok(())
    }

    /// Seconds between the last two frames
    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    /// Mean delta over the rolling window
    pub fn average_delta(&self) -> f32 {
        self.deltas.average()
    }

    /// Frame rate derived from the average delta; zero before any timed frame
    pub fn frames_per_second(&self) -> f32 {
        let average = self.average_delta();
        if average > 0.0 {
            1.0 / average
        } else {
            0.0
        }
    }

    /// Frames run so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Recent deltas, oldest first
    pub fn delta_samples(&self) -> impl Iterator<Item = f32> + '_ {
        self.deltas.samples()
    }

    /// Stages that have at least one registration, in execution order
    pub fn registered_stages(&self) -> Vec<UpdateStage> {
        self.stages.iter().map(|(stage, _)| *stage).collect()
    }

    /// Whether `updatable` is currently registered in any stage
    pub fn is_registered(&self, updatable: &UpdateHandle) -> bool {
        self.stages
            .iter()
            .any(|(_, updatables)| updatables.iter().any(|u| same_updatable(u, updatable)))
    }

    fn purge_pending(&mut self) {
        let pending: Vec<UpdateHandle> = self.pending.borrow_mut().drain(..).collect();
        if pending.is_empty() {
            return;
        }

        for (_, updatables) in &mut self.stages {
            updatables.retain(|u| !pending.iter().any(|p| same_updatable(u, p)));
        }
        log::trace!("Purged {} deregistered updatable(s)", pending.len());
    }
}
