//! Semaphore chain linking the submissions of one frame
//!
//! A frame is submitted as a strict line: begin buffer, then one buffer per
//! render stage, then the end buffer. Each submission waits on the semaphore
//! the previous one signals, so no two stages overlap on the graphics queue.
//! The begin buffer clears the acquired image with a transfer command, so it
//! waits for the image at the transfer stage; everything after it waits at
//! color attachment output.
//!
//! ```text
//! acquire ──image_available──▶ begin ──render_begin──▶ stage 0 ──s0──▶ stage 1 ──s1──▶ end ──render_end──▶ present
//! ```

use std::rc::Rc;

use ash::vk;

use crate::render::error::{VulkanError, VulkanResult};
use crate::render::gpu::{Gpu, Submission};

/// Stage the begin submission waits at for the acquired image
pub const BEGIN_WAIT_STAGE: vk::PipelineStageFlags = vk::PipelineStageFlags::TRANSFER;

/// Stage the stage and end submissions wait at
pub const FRAME_WAIT_STAGE: vk::PipelineStageFlags = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;

/// Fixed frame semaphores plus one per render stage
pub struct SemaphoreChain<G: Gpu> {
    gpu: Rc<G>,
    image_available: vk::Semaphore,
    render_begin: vk::Semaphore,
    render_end: vk::Semaphore,
    stage_semaphores: Vec<vk::Semaphore>,
}

impl<G: Gpu> SemaphoreChain<G> {
    /// Create the three fixed semaphores
    ///
    /// On failure the ones already created are destroyed.
    pub fn new(gpu: Rc<G>) -> VulkanResult<Self> {
        let mut chain = Self {
            gpu,
            image_available: vk::Semaphore::null(),
            render_begin: vk::Semaphore::null(),
            render_end: vk::Semaphore::null(),
            stage_semaphores: Vec::new(),
        };
        chain.image_available = chain.gpu.create_semaphore()?;
        chain.render_begin = chain.gpu.create_semaphore()?;
        chain.render_end = chain.gpu.create_semaphore()?;
        Ok(chain)
    }

    /// Signalled when the acquired image is ready to be written
    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available
    }

    /// Signalled when the last submission of the frame completes
    pub fn render_end(&self) -> vk::Semaphore {
        self.render_end
    }

    /// Number of per-stage semaphores currently allocated
    pub fn stage_semaphore_count(&self) -> usize {
        self.stage_semaphores.len()
    }

    /// Grow the per-stage semaphores to at least `count`
    pub fn ensure_stage_count(&mut self, count: usize) -> VulkanResult<()> {
        while self.stage_semaphores.len() < count {
            let semaphore = self.gpu.create_semaphore()?;
            self.stage_semaphores.push(semaphore);
        }
        Ok(())
    }

    /// Build the frame's submissions in order
    pub fn submissions(
        &self,
        begin: vk::CommandBuffer,
        stages: &[vk::CommandBuffer],
        end: vk::CommandBuffer,
    ) -> VulkanResult<Vec<Submission>> {
        if stages.len() > self.stage_semaphores.len() {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "{} stage buffers but only {} stage semaphores",
                    stages.len(),
                    self.stage_semaphores.len()
                ),
            });
        }

        let link = |command_buffer, wait_semaphore, signal_semaphore| Submission {
            command_buffer,
            wait_semaphore,
            wait_stage: FRAME_WAIT_STAGE,
            signal_semaphore,
        };

        let mut submissions = Vec::with_capacity(stages.len() + 2);
        submissions.push(Submission {
            wait_stage: BEGIN_WAIT_STAGE,
            ..link(begin, self.image_available, self.render_begin)
        });

        let mut previous = self.render_begin;
        for (&command_buffer, &signal) in stages.iter().zip(&self.stage_semaphores) {
            submissions.push(link(command_buffer, previous, signal));
            previous = signal;
        }

        submissions.push(link(end, previous, self.render_end));
        Ok(submissions)
    }
}

impl<G: Gpu> Drop for SemaphoreChain<G> {
    fn drop(&mut self) {
        for &semaphore in &self.stage_semaphores {
            self.gpu.destroy_semaphore(semaphore);
        }
        for semaphore in [self.render_end, self.render_begin, self.image_available] {
            if semaphore != vk::Semaphore::null() {
                self.gpu.destroy_semaphore(semaphore);
            }
        }
    }
}
