//! Per-frame update scheduling
//!
//! Updatable components register against a fixed, ordered set of update
//! stages. Once per host loop iteration the scheduler measures the frame
//! delta and runs every stage in order.

pub mod scheduler;

pub use scheduler::{
    DeregisterHandle, FrameScheduler, ScheduleError, Updatable, UpdateHandle, UpdateStage,
};
