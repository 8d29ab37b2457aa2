//! Frame orchestrator
//!
//! Owns the presentable image chain and everything sized by it (color views,
//! one depth image per presentable image, the render pass and framebuffers),
//! the per-frame command set and the semaphore chain. Render stages are kept
//! in one ordered, grow-only list and driven through `initialise`, `bind` and
//! `update`.
//!
//! Lifecycle: `Created → SurfaceBound → DeviceReady → Running`, with
//! `Resizing` entered for a swapchain recreation and kept after a failed one
//! until a retry succeeds, and `Stopped` as the terminal state.

use std::rc::Rc;

use ash::vk;

use crate::engine::EngineError;
use crate::render::commands::{begin_frame_commands, end_frame_commands, CommandSetKey, FrameCommandSet};
use crate::render::error::{VulkanError, VulkanResult};
use crate::render::gpu::{Gpu, GpuInstance, ImageDesc, PresentStatus, PresentationTarget, QueueRole};
use crate::render::stage::{RenderStage, StageId};
use crate::render::sync::SemaphoreChain;
use crate::render::transfer::{depth_aspect, DeviceImage, TransferManager};
use crate::schedule::Updatable;

/// Orchestrator lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Nothing bound yet
    Created,
    /// Presentation surface exists
    SurfaceBound,
    /// Logical device exists, frame resources are being built
    DeviceReady,
    /// Frames can be rendered
    Running,
    /// Swapchain recreation in progress, or failed and awaiting a retry
    Resizing,
    /// Shut down; terminal
    Stopped,
}

/// Outcome of one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was submitted and presented
    Presented {
        /// Swapchain image the frame was rendered into
        image_index: u32,
        /// Whether the swapchain still matches the surface
        present: PresentStatus,
    },
    /// The window has no area; nothing was submitted
    Minimized,
}

/// Swapchain images and every resource sized by them
///
/// Partially built chains clean up whatever they hold on drop.
struct ImageChain<G: Gpu> {
    gpu: Rc<G>,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    color_format: vk::Format,
    extent: vk::Extent2D,
    color_views: Vec<vk::ImageView>,
    depth_format: vk::Format,
    depth_images: Vec<DeviceImage<G>>,
    depth_views: Vec<vk::ImageView>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
}

impl<G: Gpu> ImageChain<G> {
    /// Create the swapchain and its color views, retiring `previous`
    fn create(gpu: &Rc<G>, window_extent: vk::Extent2D, previous: Option<Self>) -> VulkanResult<Self> {
        let old_swapchain = previous.as_ref().map_or_else(vk::SwapchainKHR::null, |chain| chain.swapchain);
        let created = gpu.create_swapchain(window_extent, old_swapchain)?;
        drop(previous);

        let mut chain = Self {
            gpu: Rc::clone(gpu),
            swapchain: created.swapchain,
            images: created.images,
            color_format: created.format,
            extent: created.extent,
            color_views: Vec::new(),
            depth_format: vk::Format::UNDEFINED,
            depth_images: Vec::new(),
            depth_views: Vec::new(),
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
        };

        for index in 0..chain.images.len() {
            let view = chain
                .gpu
                .create_image_view(chain.images[index], chain.color_format, vk::ImageAspectFlags::COLOR)?;
            chain.color_views.push(view);
        }

        log::info!(
            "Created swapchain {}x{} with {} images ({:?})",
            chain.extent.width,
            chain.extent.height,
            chain.images.len(),
            chain.color_format
        );
        Ok(chain)
    }

    /// Depth resources, render pass and framebuffers
    fn build_targets(&mut self, transfer: &TransferManager<G>) -> VulkanResult<()> {
        self.depth_format = self.gpu.depth_format()?;
        let aspect = depth_aspect(self.depth_format);

        for _ in 0..self.images.len() {
            let depth = transfer.create_image(&ImageDesc {
                width: self.extent.width,
                height: self.extent.height,
                format: self.depth_format,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
                memory_properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                preinitialised: false,
            })?;
            transfer.transition_image_layout(
                &depth,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            )?;
            let view = self.gpu.create_image_view(depth.handle(), self.depth_format, aspect)?;
            self.depth_images.push(depth);
            self.depth_views.push(view);
        }

        self.render_pass = self.gpu.create_render_pass(self.color_format, self.depth_format)?;

        for index in 0..self.images.len() {
            let attachments = [self.color_views[index], self.depth_views[index]];
            let framebuffer = self.gpu.create_framebuffer(self.render_pass, &attachments, self.extent)?;
            self.framebuffers.push(framebuffer);
        }

        log::debug!("Built depth resources and framebuffers with {:?}", self.depth_format);
        Ok(())
    }

    fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl<G: Gpu> Drop for ImageChain<G> {
    fn drop(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            self.gpu.destroy_framebuffer(framebuffer);
        }
        if self.render_pass != vk::RenderPass::null() {
            self.gpu.destroy_render_pass(self.render_pass);
        }
        for view in self.depth_views.drain(..) {
            self.gpu.destroy_image_view(view);
        }
        self.depth_images.clear();
        for view in self.color_views.drain(..) {
            self.gpu.destroy_image_view(view);
        }
        if self.swapchain != vk::SwapchainKHR::null() {
            self.gpu.destroy_swapchain(self.swapchain);
        }
    }
}

/// Everything that exists only while a device does
///
/// Fields drop in declaration order, so the device handle goes last.
struct FrameRuntime<G: Gpu> {
    command_pool: vk::CommandPool,
    commands: FrameCommandSet,
    semaphores: Option<SemaphoreChain<G>>,
    transfer: TransferManager<G>,
    chain: Option<ImageChain<G>>,
    gpu: Rc<G>,
}

impl<G: Gpu> FrameRuntime<G> {
    fn chain(&self) -> VulkanResult<&ImageChain<G>> {
        self.chain.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "image chain is not built".to_string(),
        })
    }

    fn semaphores(&self) -> VulkanResult<&SemaphoreChain<G>> {
        self.semaphores.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "frame semaphores are not created".to_string(),
        })
    }

    fn build_targets(&mut self) -> VulkanResult<()> {
        let chain = self.chain.as_mut().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "image chain is not built".to_string(),
        })?;
        chain.build_targets(&self.transfer)
    }
}

impl<G: Gpu> Drop for FrameRuntime<G> {
    fn drop(&mut self) {
        self.commands.release(&*self.gpu, self.command_pool);
        self.gpu.destroy_command_pool(self.command_pool);
    }
}

/// Drives render stages against the presentable image chain
pub struct FrameOrchestrator<I: GpuInstance> {
    instance: I,
    state: OrchestratorState,
    stages: Vec<Box<dyn RenderStage<I::Gpu>>>,
    runtime: Option<FrameRuntime<I::Gpu>>,
    window_extent: vk::Extent2D,
    resize_pending: bool,
    generation: u64,
    last_frame_status: Option<FrameStatus>,
}

impl<I: GpuInstance> FrameOrchestrator<I> {
    /// Wrap an instance; nothing is created until [`FrameOrchestrator::start`]
    pub fn new(instance: I) -> Self {
        Self {
            instance,
            state: OrchestratorState::Created,
            stages: Vec::new(),
            runtime: None,
            window_extent: vk::Extent2D::default(),
            resize_pending: false,
            generation: 0,
            last_frame_status: None,
        }
    }

    /// Bind the surface, open the device and build every frame resource
    ///
    /// Setup order: image chain, command pool, depth resources, render pass,
    /// framebuffers, semaphores, then stage initialisation. Any failure is
    /// fatal; resources built so far are released.
    pub fn start(&mut self, target: &mut dyn PresentationTarget) -> VulkanResult<()> {
        if self.state != OrchestratorState::Created {
            return Err(VulkanError::InvalidOperation {
                reason: format!("cannot start orchestrator in state {:?}", self.state),
            });
        }

        self.window_extent = target.framebuffer_extent();
        self.instance.bind_surface(target)?;
        self.state = OrchestratorState::SurfaceBound;

        let gpu = Rc::new(self.instance.create_device()?);
        self.state = OrchestratorState::DeviceReady;

        let transfer = TransferManager::new(Rc::clone(&gpu));
        let chain = ImageChain::create(&gpu, self.window_extent, None)?;
        let command_pool = gpu.create_command_pool(QueueRole::Graphics)?;
        let mut runtime = FrameRuntime {
            command_pool,
            commands: FrameCommandSet::new(),
            semaphores: None,
            transfer,
            chain: Some(chain),
            gpu,
        };
        runtime.build_targets()?;
        runtime.semaphores = Some(SemaphoreChain::new(Rc::clone(&runtime.gpu))?);

        for stage in &mut self.stages {
            log::debug!("Initialising render stage '{}'", stage.name());
            stage.initialise(&*runtime.gpu, &mut runtime.transfer)?;
        }

        self.runtime = Some(runtime);
        self.generation = 1;
        self.resize_pending = false;
        self.state = OrchestratorState::Running;
        log::info!(
            "Frame orchestrator running at {}x{} with {} render stage(s)",
            self.window_extent.width,
            self.window_extent.height,
            self.stages.len()
        );
        Ok(())
    }

    /// Append a render stage, initialising it at once if the device exists
    ///
    /// The command set becomes stale because the stage count changed.
    pub fn add_stage(&mut self, mut stage: Box<dyn RenderStage<I::Gpu>>) -> VulkanResult<StageId> {
        if self.state == OrchestratorState::Stopped {
            return Err(VulkanError::InvalidOperation {
                reason: "cannot add a render stage after stop".to_string(),
            });
        }

        if let Some(runtime) = self.runtime.as_mut() {
            stage.initialise(&*runtime.gpu, &mut runtime.transfer)?;
        }

        let id = StageId(self.stages.len());
        log::info!("Added render stage '{}' as #{}", stage.name(), id.0);
        self.stages.push(stage);
        Ok(id)
    }

    /// Record new window dimensions; the chain is rebuilt before the next frame
    pub fn window_resized(&mut self, width: u32, height: u32) {
        log::debug!("Window resized to {width}x{height}");
        self.window_extent = vk::Extent2D { width, height };
        self.resize_pending = true;
    }

    /// Rebuild the chain before the next frame without new dimensions
    pub fn request_swapchain_recreation(&mut self) {
        self.resize_pending = true;
    }

    /// Tear down and rebuild the image chain, depth resources, render pass
    /// and framebuffers now
    ///
    /// The command pool and the stages survive. The generation advances, so
    /// the command set is stale until the next frame rebuilds it. On failure
    /// the state stays `Resizing` with the request still pending, and the
    /// next frame retries.
    pub fn recreate_swapchain(&mut self) -> VulkanResult<()> {
        if !matches!(self.state, OrchestratorState::Running | OrchestratorState::Resizing) {
            return Err(VulkanError::InvalidOperation {
                reason: format!("cannot recreate swapchain in state {:?}", self.state),
            });
        }

        self.state = OrchestratorState::Resizing;
        if let Err(e) = self.rebuild_image_chain() {
            self.resize_pending = true;
            log::warn!("Swapchain recreation failed; retrying before the next frame: {e}");
            return Err(e);
        }

        self.state = OrchestratorState::Running;
        self.resize_pending = false;
        self.generation += 1;
        log::info!("Swapchain recreated, generation {}", self.generation);
        Ok(())
    }

    fn rebuild_image_chain(&mut self) -> VulkanResult<()> {
        let window_extent = self.window_extent;
        let runtime = self.runtime.as_mut().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "no device".to_string(),
        })?;

        runtime.gpu.wait_device_idle()?;
        let previous = runtime.chain.take();
        runtime.chain = Some(ImageChain::create(&runtime.gpu, window_extent, previous)?);
        runtime.build_targets()
    }

    /// Render and present one frame
    ///
    /// Handles a pending resize, rebuilds a stale command set, updates every
    /// stage, acquires an image, submits the semaphore-chained buffers and
    /// presents. Acquire and present failures are returned unchanged.
    pub fn render_frame(&mut self) -> VulkanResult<FrameStatus> {
        if !matches!(self.state, OrchestratorState::Running | OrchestratorState::Resizing) {
            return Err(VulkanError::InvalidOperation {
                reason: format!("cannot render in state {:?}", self.state),
            });
        }

        if self.resize_pending || self.state == OrchestratorState::Resizing {
            if self.window_extent.width == 0 || self.window_extent.height == 0 {
                log::warn!("Window is minimized; skipping frame");
                self.last_frame_status = Some(FrameStatus::Minimized);
                return Ok(FrameStatus::Minimized);
            }
            self.recreate_swapchain()?;
        }

        if self.is_command_set_stale() {
            self.rebuild_command_set()?;
        }

        let runtime = self.runtime.as_mut().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "no device".to_string(),
        })?;

        for stage in &mut self.stages {
            stage.update(&mut runtime.transfer)?;
        }

        let chain = runtime.chain()?;
        let semaphores = runtime.semaphores()?;
        let gpu = &runtime.gpu;

        let acquired = gpu.acquire_next_image(chain.swapchain, semaphores.image_available())?;
        let frame = runtime
            .commands
            .frame(acquired.index as usize)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("no command buffers for image {}", acquired.index),
            })?;

        for submission in semaphores.submissions(frame.begin, &frame.stages, frame.end)? {
            gpu.submit(QueueRole::Graphics, &submission)?;
        }

        gpu.wait_queue_idle(QueueRole::Present)?;
        let mut present = gpu.present(chain.swapchain, acquired.index, semaphores.render_end())?;
        if acquired.suboptimal {
            present = PresentStatus::Suboptimal;
        }

        let status = FrameStatus::Presented {
            image_index: acquired.index,
            present,
        };
        self.last_frame_status = Some(status);
        Ok(status)
    }

    /// Re-record every frame's begin, stage and end buffers
    fn rebuild_command_set(&mut self) -> VulkanResult<()> {
        let key = self.command_set_key();
        let runtime = self.runtime.as_mut().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "no device".to_string(),
        })?;

        if runtime.commands.frame_count() > 0 {
            runtime.gpu.wait_device_idle()?;
        }

        let image_count = runtime.chain()?.image_count();
        runtime
            .commands
            .allocate(&*runtime.gpu, runtime.command_pool, image_count, self.stages.len())?;
        if let Some(semaphores) = runtime.semaphores.as_mut() {
            semaphores.ensure_stage_count(self.stages.len())?;
        }

        let chain = runtime.chain()?;
        let gpu = &*runtime.gpu;
        let aspect = depth_aspect(chain.depth_format);

        for image_index in 0..image_count {
            let frame = runtime
                .commands
                .frame(image_index)
                .ok_or_else(|| VulkanError::InvalidOperation {
                    reason: format!("no command buffers for image {image_index}"),
                })?;
            let color_image = chain.images[image_index];

            gpu.begin_command_buffer(frame.begin)?;
            gpu.record(
                frame.begin,
                &begin_frame_commands(color_image, chain.depth_images[image_index].handle(), aspect),
            );
            gpu.end_command_buffer(frame.begin)?;

            for (stage, &command_buffer) in self.stages.iter_mut().zip(&frame.stages) {
                gpu.begin_command_buffer(command_buffer)?;
                gpu.begin_render_pass(
                    command_buffer,
                    chain.render_pass,
                    chain.framebuffers[image_index],
                    chain.extent,
                );
                stage.bind(gpu, chain.render_pass, command_buffer, chain.extent)?;
                gpu.end_render_pass(command_buffer);
                gpu.end_command_buffer(command_buffer)?;
            }

            gpu.begin_command_buffer(frame.end)?;
            gpu.record(frame.end, &end_frame_commands(color_image));
            gpu.end_command_buffer(frame.end)?;
        }

        runtime.commands.mark_built(key);
        log::debug!(
            "Recorded command set for {} image(s) and {} stage(s)",
            image_count,
            key.stage_count
        );
        Ok(())
    }

    /// Force the command set to be re-recorded before the next frame
    pub fn invalidate_command_set(&mut self) {
        if let Some(runtime) = self.runtime.as_mut() {
            runtime.commands.invalidate();
        }
    }

    /// Wait for the device, release everything and destroy the image chain,
    /// the surface and the diagnostic hook in that order
    ///
    /// Calling it again does nothing.
    pub fn stop(&mut self) {
        if self.state == OrchestratorState::Stopped {
            return;
        }

        if let Some(runtime) = self.runtime.take() {
            if let Err(e) = runtime.gpu.wait_device_idle() {
                log::warn!("Device did not go idle before shutdown: {e}");
            }
            self.stages.clear();
            drop(runtime);
        }
        self.stages.clear();
        self.instance.destroy_surface();
        self.instance.destroy_debug_hook();

        self.state = OrchestratorState::Stopped;
        log::info!("Frame orchestrator stopped");
    }

    fn command_set_key(&self) -> CommandSetKey {
        CommandSetKey {
            stage_count: self.stages.len(),
            generation: self.generation,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Image chain generation; zero before start, incremented per recreation
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the command set must be rebuilt before the next submission
    pub fn is_command_set_stale(&self) -> bool {
        self.runtime
            .as_ref()
            .map_or(true, |runtime| runtime.commands.is_stale(self.command_set_key()))
    }

    /// Number of registered render stages
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Extent of the current image chain, or the last known window extent
    pub fn extent(&self) -> vk::Extent2D {
        self.runtime
            .as_ref()
            .and_then(|runtime| runtime.chain.as_ref())
            .map_or(self.window_extent, |chain| chain.extent)
    }

    /// Whether a resize or recreation request is waiting for the next frame
    pub fn is_resize_pending(&self) -> bool {
        self.resize_pending
    }

    /// Result of the most recent frame
    pub fn last_frame_status(&self) -> Option<FrameStatus> {
        self.last_frame_status
    }

    /// Device, once started
    ///
    /// Borrowed so that no handle to it outlives the orchestrator, which
    /// destroys the device in [`FrameOrchestrator::stop`].
    pub fn gpu(&self) -> Option<&I::Gpu> {
        self.runtime.as_ref().map(|runtime| &*runtime.gpu)
    }
}

impl<I: GpuInstance> Updatable for FrameOrchestrator<I> {
    fn update(&mut self, _delta_time: f32) -> Result<(), EngineError> {
        if let FrameStatus::Presented {
            present: PresentStatus::Suboptimal,
            ..
        } = self.render_frame()?
        {
            log::warn!("Presented to a suboptimal swapchain; recreating before the next frame");
            self.request_swapchain_recreation();
        }
        Ok(())
    }
}

impl<I: GpuInstance> Drop for FrameOrchestrator<I> {
    fn drop(&mut self) {
        self.stop();
    }
}
