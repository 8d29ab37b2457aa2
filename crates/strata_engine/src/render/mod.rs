//! Rendering core
//!
//! The [`orchestrator::FrameOrchestrator`] owns the image chain, the per-frame
//! command set and the semaphore chain, and drives registered
//! [`stage::RenderStage`]s once per frame. Everything device-facing goes
//! through the [`gpu::Gpu`] trait.

pub mod commands;
pub mod error;
pub mod gpu;
pub mod orchestrator;
pub mod stage;
pub mod sync;
pub mod transfer;
pub mod vulkan;

#[cfg(test)]
pub(crate) mod mock;

pub use error::{VulkanError, VulkanResult};
pub use gpu::{Gpu, GpuInstance, PresentationTarget, QueueRole};
pub use orchestrator::{FrameOrchestrator, FrameStatus, OrchestratorState};
pub use stage::{ClearStage, RenderStage, StageId};
pub use transfer::{DeviceBuffer, DeviceImage, TransferManager};
