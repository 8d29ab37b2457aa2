//! Render stages: pluggable units of GPU work recorded into each frame

use ash::vk;

use crate::render::error::VulkanResult;
use crate::render::gpu::{Gpu, GpuCommand};
use crate::render::transfer::TransferManager;

/// Stable index of a stage inside the orchestrator
///
/// Stages are never removed, so an id stays valid for the orchestrator's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(pub usize);

/// Unit of GPU work contributing commands to every frame
pub trait RenderStage<G: Gpu> {
    /// Called once the device exists, before the stage is first bound
    fn initialise(&mut self, gpu: &G, transfer: &mut TransferManager<G>) -> VulkanResult<()>;

    /// Record this stage's commands inside the active render pass
    ///
    /// Called on every command set rebuild. `extent` is the current target
    /// size; stages owning extent-dependent objects must rebuild them here
    /// when it changes. Command buffers must not be retained.
    fn bind(
        &mut self,
        gpu: &G,
        render_pass: vk::RenderPass,
        command_buffer: vk::CommandBuffer,
        extent: vk::Extent2D,
    ) -> VulkanResult<()>;

    /// Refresh GPU-visible per-frame state
    fn update(&mut self, _transfer: &mut TransferManager<G>) -> VulkanResult<()> {
        Ok(())
    }

    /// Name used in log output
    fn name(&self) -> &str {
        "render stage"
    }
}

/// Clears the color attachment (and optionally depth) inside a region
#[derive(Debug, Clone)]
pub struct ClearStage {
    color: [f32; 4],
    depth: Option<f32>,
    region: Option<vk::Rect2D>,
    bound_extent: Option<vk::Extent2D>,
}

impl Default for ClearStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ClearStage {
    /// Clear the full target to opaque black
    pub fn new() -> Self {
        Self {
            color: [0.0, 0.0, 0.0, 1.0],
            depth: None,
            region: None,
            bound_extent: None,
        }
    }

    /// Set the clear color
    #[must_use]
    pub fn with_color(mut self, color: [f32; 4]) -> Self {
        self.color = color;
        self
    }

    /// Also clear the depth attachment to `depth`
    #[must_use]
    pub fn with_depth(mut self, depth: f32) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Restrict the clear to `region`
    #[must_use]
    pub fn with_region(mut self, region: vk::Rect2D) -> Self {
        self.region = Some(region);
        self
    }

    /// Current clear color
    pub fn color(&self) -> [f32; 4] {
        self.color
    }

    /// Extent seen by the last bind
    pub fn bound_extent(&self) -> Option<vk::Extent2D> {
        self.bound_extent
    }
}

/// Clamp an optional clear region to the target; `None` means the whole target
pub fn clamp_clear_rect(region: Option<vk::Rect2D>, extent: vk::Extent2D) -> vk::Rect2D {
    let Some(region) = region else {
        return vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
    };

    let x = u32::try_from(region.offset.x).unwrap_or(0).min(extent.width);
    let y = u32::try_from(region.offset.y).unwrap_or(0).min(extent.height);
    vk::Rect2D {
        offset: vk::Offset2D {
            x: x as i32,
            y: y as i32,
        },
        extent: vk::Extent2D {
            width: region.extent.width.min(extent.width - x),
            height: region.extent.height.min(extent.height - y),
        },
    }
}

impl<G: Gpu> RenderStage<G> for ClearStage {
    fn initialise(&mut self, _gpu: &G, _transfer: &mut TransferManager<G>) -> VulkanResult<()> {
        Ok(())
    }

    fn bind(
        &mut self,
        gpu: &G,
        _render_pass: vk::RenderPass,
        command_buffer: vk::CommandBuffer,
        extent: vk::Extent2D,
    ) -> VulkanResult<()> {
        if self.bound_extent.map_or(true, |e| e.width != extent.width || e.height != extent.height) {
            log::debug!("Clear stage bound at {}x{}", extent.width, extent.height);
            self.bound_extent = Some(extent);
        }

        let rect = clamp_clear_rect(self.region, extent);
        if rect.extent.width == 0 || rect.extent.height == 0 {
            return Ok(());
        }

        gpu.record(
            command_buffer,
            &[GpuCommand::ClearAttachments {
                color: Some(self.color),
                depth: self.depth,
                rect,
            }],
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "clear"
    }
}
