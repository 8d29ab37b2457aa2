//! Device abstraction used by the transfer manager and the frame orchestrator
//!
//! The orchestrator and transfer manager only talk to the GPU through the
//! [`Gpu`] and [`GpuInstance`] traits. The ash-backed implementation lives in
//! [`crate::render::vulkan`]; tests substitute a recording mock.
//!
//! Handles are plain `ash::vk` handles so the Vulkan implementation can pass
//! them straight through without translation.

use ash::vk;

use crate::render::error::VulkanResult;

/// Queue a submission or idle wait targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    /// Graphics-capable queue; also used for layout barriers needing shader stages
    Graphics,
    /// Queue that presents to the surface
    Present,
    /// Transfer queue, a dedicated family when the device has one
    Transfer,
}

/// Buffer together with its dedicated memory allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferAllocation {
    /// Buffer handle
    pub buffer: vk::Buffer,
    /// Memory bound at offset 0
    pub memory: vk::DeviceMemory,
    /// Requested buffer size in bytes
    pub size: vk::DeviceSize,
}

/// Parameters for a 2D, single-mip, single-layer image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Texel format
    pub format: vk::Format,
    /// Linear or optimal tiling
    pub tiling: vk::ImageTiling,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Required memory properties
    pub memory_properties: vk::MemoryPropertyFlags,
    /// Start in PREINITIALIZED instead of UNDEFINED
    pub preinitialised: bool,
}

/// Image together with its dedicated memory allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageAllocation {
    /// Image handle
    pub image: vk::Image,
    /// Memory bound at offset 0
    pub memory: vk::DeviceMemory,
    /// Texel format the image was created with
    pub format: vk::Format,
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Bytes of memory backing the image
    pub size: vk::DeviceSize,
}

/// Single image memory barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    /// Image being transitioned
    pub image: vk::Image,
    /// Current layout
    pub old_layout: vk::ImageLayout,
    /// Target layout
    pub new_layout: vk::ImageLayout,
    /// Accesses that must complete first
    pub src_access: vk::AccessFlags,
    /// Accesses that wait on the transition
    pub dst_access: vk::AccessFlags,
    /// Stage the source accesses happen in
    pub src_stage: vk::PipelineStageFlags,
    /// Stage the destination accesses happen in
    pub dst_stage: vk::PipelineStageFlags,
    /// Aspects covered by the barrier
    pub aspect: vk::ImageAspectFlags,
}

/// Engine-level command recorded into a command buffer
#[derive(Debug, Clone, Copy)]
pub enum GpuCommand {
    /// Copy a byte range between buffers
    CopyBuffer {
        /// Source buffer
        src: vk::Buffer,
        /// Destination buffer
        dst: vk::Buffer,
        /// Offset into the source
        src_offset: vk::DeviceSize,
        /// Offset into the destination
        dst_offset: vk::DeviceSize,
        /// Bytes to copy
        size: vk::DeviceSize,
    },
    /// Copy the first color layer of one image into another
    CopyImage {
        /// Source image, in TRANSFER_SRC_OPTIMAL
        src: vk::Image,
        /// Destination image, in TRANSFER_DST_OPTIMAL
        dst: vk::Image,
        /// Region width
        width: u32,
        /// Region height
        height: u32,
    },
    /// Pipeline barrier with one image memory barrier
    Barrier(ImageBarrier),
    /// Clear a color image in TRANSFER_DST_OPTIMAL
    ClearColorImage {
        /// Target image
        image: vk::Image,
        /// RGBA clear value
        color: [f32; 4],
    },
    /// Clear a depth(/stencil) image in TRANSFER_DST_OPTIMAL
    ClearDepthStencilImage {
        /// Target image
        image: vk::Image,
        /// Aspects to clear
        aspect: vk::ImageAspectFlags,
        /// Depth clear value
        depth: f32,
        /// Stencil clear value
        stencil: u32,
    },
    /// Clear attachments of the active render pass inside a rectangle
    ClearAttachments {
        /// Color for attachment 0, if cleared
        color: Option<[f32; 4]>,
        /// Depth for the depth attachment, if cleared
        depth: Option<f32>,
        /// Region to clear
        rect: vk::Rect2D,
    },
}

/// One queue submission of a single command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    /// Command buffer to execute
    pub command_buffer: vk::CommandBuffer,
    /// Semaphore waited on before execution
    pub wait_semaphore: vk::Semaphore,
    /// Stage at which the wait applies
    pub wait_stage: vk::PipelineStageFlags,
    /// Semaphore signalled on completion
    pub signal_semaphore: vk::Semaphore,
}

/// Freshly created presentable image chain
#[derive(Debug, Clone)]
pub struct SwapchainImages {
    /// Swapchain handle
    pub swapchain: vk::SwapchainKHR,
    /// Images owned by the swapchain
    pub images: Vec<vk::Image>,
    /// Chosen color format
    pub format: vk::Format,
    /// Chosen extent
    pub extent: vk::Extent2D,
}

/// Result of acquiring the next presentable image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    /// Index into the swapchain images
    pub index: u32,
    /// The swapchain still works but no longer matches the surface exactly
    pub suboptimal: bool,
}

/// Outcome of a successful present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    /// Presented and the swapchain matches the surface
    Optimal,
    /// Presented but the swapchain should be recreated
    Suboptimal,
}

/// Windowing collaborator that owns the native window
pub trait PresentationTarget {
    /// Create a presentation surface for `instance`
    fn create_surface(&mut self, instance: vk::Instance) -> VulkanResult<vk::SurfaceKHR>;

    /// Current framebuffer size in pixels
    fn framebuffer_extent(&self) -> vk::Extent2D;
}

/// Instance-level entry point: owns the surface and the diagnostic hook
pub trait GpuInstance {
    /// Device type produced by [`GpuInstance::create_device`]
    type Gpu: Gpu;

    /// Create and remember the presentation surface
    fn bind_surface(&mut self, target: &mut dyn PresentationTarget) -> VulkanResult<()>;

    /// Select a physical device for the bound surface and open a logical device on it
    fn create_device(&mut self) -> VulkanResult<Self::Gpu>;

    /// Destroy the presentation surface
    fn destroy_surface(&mut self);

    /// Destroy the validation message hook, if one was installed
    fn destroy_debug_hook(&mut self);
}

/// Logical device operations
///
/// Every call blocks until its effect is visible to the host where the
/// underlying API call blocks; nothing here is asynchronous.
pub trait Gpu {
    /// Create a buffer with its own memory allocation bound at offset 0
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<BufferAllocation>;

    /// Destroy a buffer and free its memory
    fn destroy_buffer(&self, allocation: &BufferAllocation);

    /// Create an image with its own memory allocation bound at offset 0
    fn create_image(&self, desc: &ImageDesc) -> VulkanResult<ImageAllocation>;

    /// Destroy an image and free its memory
    fn destroy_image(&self, allocation: &ImageAllocation);

    /// Placement of the color subresource of a linear image in its memory
    fn image_subresource_layout(&self, allocation: &ImageAllocation) -> vk::SubresourceLayout;

    /// Map host-visible memory at `offset`, copy `bytes` in and unmap
    ///
    /// Fails with [`crate::render::error::VulkanError::TransferOutOfBounds`]
    /// when the range does not fit the allocation.
    fn write_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, bytes: &[u8]) -> VulkanResult<()>;

    /// Record `commands` into a one-time command buffer, submit it on `role`
    /// and block until that queue is idle
    fn execute_transient(&self, role: QueueRole, commands: &[GpuCommand]) -> VulkanResult<()>;

    /// Best depth attachment format the device supports
    fn depth_format(&self) -> VulkanResult<vk::Format>;

    /// Create the presentable image chain, retiring `old_swapchain` if not null
    fn create_swapchain(
        &self,
        window_extent: vk::Extent2D,
        old_swapchain: vk::SwapchainKHR,
    ) -> VulkanResult<SwapchainImages>;

    /// Destroy a swapchain
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    /// Create a 2D view over an image
    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> VulkanResult<vk::ImageView>;

    /// Destroy an image view
    fn destroy_image_view(&self, view: vk::ImageView);

    /// Create the color + depth render pass
    fn create_render_pass(&self, color_format: vk::Format, depth_format: vk::Format) -> VulkanResult<vk::RenderPass>;

    /// Destroy a render pass
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);

    /// Create a framebuffer over `attachments`
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<vk::Framebuffer>;

    /// Destroy a framebuffer
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    /// Create a command pool on the queue family behind `role`
    fn create_command_pool(&self, role: QueueRole) -> VulkanResult<vk::CommandPool>;

    /// Destroy a command pool and every buffer allocated from it
    fn destroy_command_pool(&self, pool: vk::CommandPool);

    /// Allocate primary command buffers
    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>>;

    /// Return command buffers to their pool
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);

    /// Begin recording a reusable (simultaneous-use) command buffer
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()>;

    /// Record engine commands
    fn record(&self, command_buffer: vk::CommandBuffer, commands: &[GpuCommand]);

    /// Begin `render_pass` on `framebuffer` covering the whole extent
    fn begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    );

    /// End the active render pass
    fn end_render_pass(&self, command_buffer: vk::CommandBuffer);

    /// Finish recording
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()>;

    /// Create a binary semaphore
    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore>;

    /// Destroy a semaphore
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Acquire the next presentable image, waiting without a timeout
    fn acquire_next_image(&self, swapchain: vk::SwapchainKHR, signal: vk::Semaphore) -> VulkanResult<AcquiredImage>;

    /// Submit one command buffer
    fn submit(&self, role: QueueRole, submission: &Submission) -> VulkanResult<()>;

    /// Block until the queue behind `role` is idle
    fn wait_queue_idle(&self, role: QueueRole) -> VulkanResult<()>;

    /// Present `image_index` once `wait` is signalled
    fn present(&self, swapchain: vk::SwapchainKHR, image_index: u32, wait: vk::Semaphore) -> VulkanResult<PresentStatus>;

    /// Block until the whole device is idle
    fn wait_device_idle(&self) -> VulkanResult<()>;
}
