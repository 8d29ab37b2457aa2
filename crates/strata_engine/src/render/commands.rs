//! Per-frame command buffer set
//!
//! For every presentable image the set holds a begin buffer (clear and move
//! the attachments into render layouts), one buffer per render stage, and an
//! end buffer (move the color image to the present layout). The set records
//! the stage count and image-chain generation it was built for; whenever
//! either differs from the orchestrator's current values it is stale.

use ash::vk;

use crate::render::error::VulkanResult;
use crate::render::gpu::{Gpu, GpuCommand, ImageBarrier};

/// Color the begin buffer clears each image to
pub const FRAME_CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Depth the begin buffer clears each depth image to
pub const FRAME_CLEAR_DEPTH: f32 = 1.0;

/// Inputs a command set was recorded against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSetKey {
    /// Number of render stages
    pub stage_count: usize,
    /// Image chain generation
    pub generation: u64,
}

/// Command buffers for one presentable image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCommands {
    /// Clears and transitions to render layouts
    pub begin: vk::CommandBuffer,
    /// One buffer per render stage, in stage order
    pub stages: Vec<vk::CommandBuffer>,
    /// Transition to the present layout
    pub end: vk::CommandBuffer,
}

/// Command buffers for every presentable image
#[derive(Debug, Default)]
pub struct FrameCommandSet {
    frames: Vec<FrameCommands>,
    built_for: Option<CommandSetKey>,
}

impl FrameCommandSet {
    /// Empty set; stale for any key
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the set must be rebuilt before submitting against `current`
    pub fn is_stale(&self, current: CommandSetKey) -> bool {
        self.built_for != Some(current)
    }

    /// Buffers for one image
    pub fn frame(&self, image_index: usize) -> Option<&FrameCommands> {
        self.frames.get(image_index)
    }

    /// Number of images with buffers
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Free every buffer and forget the build key
    pub fn release<G: Gpu>(&mut self, gpu: &G, pool: vk::CommandPool) {
        let buffers: Vec<vk::CommandBuffer> = self
            .frames
            .drain(..)
            .flat_map(|frame| {
                std::iter::once(frame.begin)
                    .chain(frame.stages)
                    .chain(std::iter::once(frame.end))
            })
            .collect();
        if !buffers.is_empty() {
            gpu.free_command_buffers(pool, &buffers);
        }
        self.built_for = None;
    }

    /// Allocate fresh buffers for `image_count` images and `stage_count` stages
    ///
    /// Any previous buffers are freed first.
    pub fn allocate<G: Gpu>(
        &mut self,
        gpu: &G,
        pool: vk::CommandPool,
        image_count: usize,
        stage_count: usize,
    ) -> VulkanResult<()> {
        self.release(gpu, pool);

        let per_frame = stage_count + 2;
        let buffers = gpu.allocate_command_buffers(pool, (image_count * per_frame) as u32)?;
        self.frames = buffers
            .chunks_exact(per_frame)
            .map(|chunk| FrameCommands {
                begin: chunk[0],
                stages: chunk[1..=stage_count].to_vec(),
                end: chunk[per_frame - 1],
            })
            .collect();
        Ok(())
    }

    /// Record that the current buffers match `key`
    pub fn mark_built(&mut self, key: CommandSetKey) {
        self.built_for = Some(key);
    }

    /// Keep the buffers but require a re-record
    pub fn invalidate(&mut self) {
        self.built_for = None;
    }
}

/// Commands that prepare one image pair for rendering
pub fn begin_frame_commands(
    color_image: vk::Image,
    depth_image: vk::Image,
    depth_aspect: vk::ImageAspectFlags,
) -> [GpuCommand; 6] {
    let to_transfer_dst = |image, aspect| ImageBarrier {
        image,
        old_layout: vk::ImageLayout::UNDEFINED,
        new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        src_access: vk::AccessFlags::empty(),
        dst_access: vk::AccessFlags::TRANSFER_WRITE,
        src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
        dst_stage: vk::PipelineStageFlags::TRANSFER,
        aspect,
    };

    [
        GpuCommand::Barrier(to_transfer_dst(color_image, vk::ImageAspectFlags::COLOR)),
        GpuCommand::Barrier(to_transfer_dst(depth_image, depth_aspect)),
        GpuCommand::ClearColorImage {
            image: color_image,
            color: FRAME_CLEAR_COLOR,
        },
        GpuCommand::ClearDepthStencilImage {
            image: depth_image,
            aspect: depth_aspect,
            depth: FRAME_CLEAR_DEPTH,
            stencil: 0,
        },
        GpuCommand::Barrier(ImageBarrier {
            image: color_image,
            old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            new_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            aspect: vk::ImageAspectFlags::COLOR,
        }),
        GpuCommand::Barrier(ImageBarrier {
            image: depth_image,
            old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            new_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            aspect: depth_aspect,
        }),
    ]
}

/// Command that hands the color image over to presentation
pub fn end_frame_commands(color_image: vk::Image) -> [GpuCommand; 1] {
    [GpuCommand::Barrier(ImageBarrier {
        image: color_image,
        old_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        dst_access: vk::AccessFlags::MEMORY_READ,
        src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        aspect: vk::ImageAspectFlags::COLOR,
    })]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::mock::{GpuEvent, MockGpu};
    use ash::vk::Handle;

    fn key(stage_count: usize, generation: u64) -> CommandSetKey {
        CommandSetKey {
            stage_count,
            generation,
        }
    }

    #[test]
    fn test_new_set_is_stale() {
        let set = FrameCommandSet::new();
        assert!(set.is_stale(key(0, 0)));
    }

    #[test]
    fn test_staleness_follows_stage_count_and_generation() {
        let mut set = FrameCommandSet::new();
        set.mark_built(key(2, 1));
        assert!(!set.is_stale(key(2, 1)));
        assert!(set.is_stale(key(3, 1)));
        assert!(set.is_stale(key(2, 2)));

        set.invalidate();
        assert!(set.is_stale(key(2, 1)));
    }

    #[test]
    fn test_allocate_splits_buffers_per_image() {
        let gpu = MockGpu::new();
        let mut set = FrameCommandSet::new();
        set.allocate(&gpu, vk::CommandPool::null(), 3, 2).unwrap();

        assert_eq!(set.frame_count(), 3);
        let frame = set.frame(1).unwrap();
        assert_eq!(frame.stages.len(), 2);
        assert_ne!(frame.begin, frame.end);
        assert!(set.frame(3).is_none());
    }

    #[test]
    fn test_reallocate_frees_previous_buffers() {
        let gpu = MockGpu::new();
        let mut set = FrameCommandSet::new();
        set.allocate(&gpu, vk::CommandPool::null(), 2, 0).unwrap();
        set.mark_built(key(0, 0));
        set.allocate(&gpu, vk::CommandPool::null(), 2, 1).unwrap();

        let freed: usize = gpu
            .events()
            .iter()
            .map(|e| match e {
                GpuEvent::FreeCommandBuffers(buffers) => buffers.len(),
                _ => 0,
            })
            .sum();
        assert_eq!(freed, 4);
        assert!(set.is_stale(key(0, 0)));
    }

    #[test]
    fn test_begin_commands_clear_then_enter_render_layouts() {
        let color = vk::Image::from_raw(1);
        let depth = vk::Image::from_raw(2);
        let commands = begin_frame_commands(color, depth, vk::ImageAspectFlags::DEPTH);

        assert!(matches!(commands[2], GpuCommand::ClearColorImage { color, .. } if color == FRAME_CLEAR_COLOR));
        match (commands[4], commands[5]) {
            (GpuCommand::Barrier(color_barrier), GpuCommand::Barrier(depth_barrier)) => {
                assert_eq!(color_barrier.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
                assert_eq!(color_barrier.dst_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
                assert_eq!(depth_barrier.new_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
                assert_eq!(depth_barrier.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
            }
            other => panic!("unexpected commands {other:?}"),
        }
    }

    #[test]
    fn test_end_command_targets_present_layout() {
        let [command] = end_frame_commands(vk::Image::from_raw(9));
        match command {
            GpuCommand::Barrier(barrier) => {
                assert_eq!(barrier.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
                assert_eq!(barrier.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
                assert_eq!(barrier.dst_access, vk::AccessFlags::MEMORY_READ);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
