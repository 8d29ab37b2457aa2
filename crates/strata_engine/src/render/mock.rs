//! Recording GPU used by unit tests

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use ash::vk::{self, Handle};

use crate::render::error::{check_range, VulkanError, VulkanResult};
use crate::render::gpu::{
    AcquiredImage, BufferAllocation, Gpu, GpuCommand, GpuInstance, ImageAllocation, ImageDesc, PresentStatus,
    PresentationTarget, QueueRole, Submission, SwapchainImages,
};

/// Everything the mock was asked to do, in order
#[derive(Debug, Clone)]
pub enum GpuEvent {
    CreateBuffer { buffer: vk::Buffer, size: vk::DeviceSize },
    DestroyBuffer(vk::Buffer),
    CreateImage { image: vk::Image, desc: ImageDesc },
    DestroyImage(vk::Image),
    WriteMemory { memory: vk::DeviceMemory, offset: vk::DeviceSize, len: usize },
    Transient { role: QueueRole, commands: Vec<GpuCommand> },
    CreateSwapchain { swapchain: vk::SwapchainKHR, extent: vk::Extent2D, old: vk::SwapchainKHR },
    DestroySwapchain(vk::SwapchainKHR),
    CreateImageView(vk::ImageView),
    DestroyImageView(vk::ImageView),
    CreateRenderPass(vk::RenderPass),
    DestroyRenderPass(vk::RenderPass),
    CreateFramebuffer(vk::Framebuffer),
    DestroyFramebuffer(vk::Framebuffer),
    CreateCommandPool(vk::CommandPool),
    DestroyCommandPool(vk::CommandPool),
    AllocateCommandBuffers(Vec<vk::CommandBuffer>),
    FreeCommandBuffers(Vec<vk::CommandBuffer>),
    BeginCommandBuffer(vk::CommandBuffer),
    Record { command_buffer: vk::CommandBuffer, commands: Vec<GpuCommand> },
    BeginRenderPass { command_buffer: vk::CommandBuffer, framebuffer: vk::Framebuffer, extent: vk::Extent2D },
    EndRenderPass(vk::CommandBuffer),
    EndCommandBuffer(vk::CommandBuffer),
    CreateSemaphore(vk::Semaphore),
    DestroySemaphore(vk::Semaphore),
    Acquire { index: u32, signal: vk::Semaphore },
    Submit { role: QueueRole, submission: Submission },
    WaitQueueIdle(QueueRole),
    Present { image_index: u32, wait: vk::Semaphore },
    WaitDeviceIdle,
    DeviceDestroyed,
    SurfaceBound,
    SurfaceDestroyed,
    DebugHookDestroyed,
}

/// Shared, ordered event log
pub type EventLog = Rc<RefCell<Vec<GpuEvent>>>;

/// Scripted outcome for the next present call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockPresent {
    Optimal,
    Suboptimal,
    OutOfDate,
}

/// GPU that hands out synthetic handles and logs every call
pub struct MockGpu {
    log: EventLog,
    next_handle: Cell<u64>,
    image_count: usize,
    next_image: Cell<u32>,
    live_semaphores: Cell<usize>,
    present_script: RefCell<VecDeque<MockPresent>>,
    memory_sizes: RefCell<HashMap<vk::DeviceMemory, vk::DeviceSize>>,
    row_padding: Cell<vk::DeviceSize>,
    failure: RefCell<Option<(&'static str, usize)>>,
}

/// Bytes per texel assumed for every mock image
const MOCK_TEXEL_SIZE: vk::DeviceSize = 4;

impl MockGpu {
    pub fn new() -> Self {
        Self::with_log(EventLog::default())
    }

    pub fn with_log(log: EventLog) -> Self {
        Self {
            log,
            next_handle: Cell::new(1),
            image_count: 3,
            next_image: Cell::new(0),
            live_semaphores: Cell::new(0),
            present_script: RefCell::new(VecDeque::new()),
            memory_sizes: RefCell::new(HashMap::new()),
            row_padding: Cell::new(0),
            failure: RefCell::new(None),
        }
    }

    /// Let `skip` calls to `op` succeed, then fail the next one once
    pub fn fail_call(&self, op: &'static str, skip: usize) {
        *self.failure.borrow_mut() = Some((op, skip));
    }

    /// Pad every row of images created from now on by `padding` bytes
    pub fn set_row_padding(&self, padding: vk::DeviceSize) {
        self.row_padding.set(padding);
    }

    pub fn count(&self, predicate: impl Fn(&GpuEvent) -> bool) -> usize {
        self.log.borrow().iter().filter(|e| predicate(e)).count()
    }

    fn check(&self, op: &'static str) -> VulkanResult<()> {
        let mut failure = self.failure.borrow_mut();
        match *failure {
            Some((target, 0)) if target == op => {
                *failure = None;
                Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
            }
            Some((target, skip)) if target == op => {
                *failure = Some((target, skip - 1));
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn row_pitch(&self, width: u32) -> vk::DeviceSize {
        vk::DeviceSize::from(width) * MOCK_TEXEL_SIZE + self.row_padding.get()
    }

    pub fn events(&self) -> Vec<GpuEvent> {
        self.log.borrow().clone()
    }

    pub fn clear_events(&self) {
        self.log.borrow_mut().clear();
    }

    pub fn transient_commands(&self) -> Vec<(QueueRole, Vec<GpuCommand>)> {
        self.log
            .borrow()
            .iter()
            .filter_map(|e| match e {
                GpuEvent::Transient { role, commands } => Some((*role, commands.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.log
            .borrow()
            .iter()
            .filter_map(|e| match e {
                GpuEvent::Submit { submission, .. } => Some(*submission),
                _ => None,
            })
            .collect()
    }

    pub fn last_created_buffer(&self) -> vk::Buffer {
        self.log
            .borrow()
            .iter()
            .rev()
            .find_map(|e| match e {
                GpuEvent::CreateBuffer { buffer, .. } => Some(*buffer),
                _ => None,
            })
            .unwrap_or_else(vk::Buffer::null)
    }

    pub fn live_semaphores(&self) -> usize {
        self.live_semaphores.get()
    }

    pub fn script_present(&self, outcome: MockPresent) {
        self.present_script.borrow_mut().push_back(outcome);
    }

    fn handle(&self) -> u64 {
        let handle = self.next_handle.get();
        self.next_handle.set(handle + 1);
        handle
    }

    fn push(&self, event: GpuEvent) {
        self.log.borrow_mut().push(event);
    }
}

impl Default for MockGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MockGpu {
    fn drop(&mut self) {
        self.push(GpuEvent::DeviceDestroyed);
    }
}

impl Gpu for MockGpu {
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        _usage: vk::BufferUsageFlags,
        _properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<BufferAllocation> {
        self.check("create_buffer")?;
        let buffer = vk::Buffer::from_raw(self.handle());
        let memory = vk::DeviceMemory::from_raw(self.handle());
        self.memory_sizes.borrow_mut().insert(memory, size);
        self.push(GpuEvent::CreateBuffer { buffer, size });
        Ok(BufferAllocation { buffer, memory, size })
    }

    fn destroy_buffer(&self, allocation: &BufferAllocation) {
        self.memory_sizes.borrow_mut().remove(&allocation.memory);
        self.push(GpuEvent::DestroyBuffer(allocation.buffer));
    }

    fn create_image(&self, desc: &ImageDesc) -> VulkanResult<ImageAllocation> {
        self.check("create_image")?;
        let image = vk::Image::from_raw(self.handle());
        let memory = vk::DeviceMemory::from_raw(self.handle());
        let size = self.row_pitch(desc.width) * vk::DeviceSize::from(desc.height);
        self.memory_sizes.borrow_mut().insert(memory, size);
        self.push(GpuEvent::CreateImage { image, desc: *desc });
        Ok(ImageAllocation {
            image,
            memory,
            format: desc.format,
            width: desc.width,
            height: desc.height,
            size,
        })
    }

    fn destroy_image(&self, allocation: &ImageAllocation) {
        self.memory_sizes.borrow_mut().remove(&allocation.memory);
        self.push(GpuEvent::DestroyImage(allocation.image));
    }

    fn image_subresource_layout(&self, allocation: &ImageAllocation) -> vk::SubresourceLayout {
        let row_pitch = self.row_pitch(allocation.width);
        vk::SubresourceLayout {
            offset: 0,
            size: allocation.size,
            row_pitch,
            array_pitch: allocation.size,
            depth_pitch: allocation.size,
        }
    }

    fn write_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, bytes: &[u8]) -> VulkanResult<()> {
        let capacity = self
            .memory_sizes
            .borrow()
            .get(&memory)
            .copied()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "write to unknown memory".to_string(),
            })?;
        check_range(offset, bytes.len() as vk::DeviceSize, capacity)?;
        self.push(GpuEvent::WriteMemory {
            memory,
            offset,
            len: bytes.len(),
        });
        Ok(())
    }

    fn execute_transient(&self, role: QueueRole, commands: &[GpuCommand]) -> VulkanResult<()> {
        self.check("execute_transient")?;
        self.push(GpuEvent::Transient {
            role,
            commands: commands.to_vec(),
        });
        Ok(())
    }

    fn depth_format(&self) -> VulkanResult<vk::Format> {
        Ok(vk::Format::D32_SFLOAT)
    }

    fn create_swapchain(&self, window_extent: vk::Extent2D, old: vk::SwapchainKHR) -> VulkanResult<SwapchainImages> {
        self.check("create_swapchain")?;
        let swapchain = vk::SwapchainKHR::from_raw(self.handle());
        let images = (0..self.image_count).map(|_| vk::Image::from_raw(self.handle())).collect();
        self.next_image.set(0);
        self.push(GpuEvent::CreateSwapchain {
            swapchain,
            extent: window_extent,
            old,
        });
        Ok(SwapchainImages {
            swapchain,
            images,
            format: vk::Format::B8G8R8A8_UNORM,
            extent: window_extent,
        })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.push(GpuEvent::DestroySwapchain(swapchain));
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> VulkanResult<vk::ImageView> {
        self.check("create_image_view")?;
        let view = vk::ImageView::from_raw(self.handle());
        self.push(GpuEvent::CreateImageView(view));
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.push(GpuEvent::DestroyImageView(view));
    }

    fn create_render_pass(&self, _color_format: vk::Format, _depth_format: vk::Format) -> VulkanResult<vk::RenderPass> {
        self.check("create_render_pass")?;
        let render_pass = vk::RenderPass::from_raw(self.handle());
        self.push(GpuEvent::CreateRenderPass(render_pass));
        Ok(render_pass)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.push(GpuEvent::DestroyRenderPass(render_pass));
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        _attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> VulkanResult<vk::Framebuffer> {
        self.check("create_framebuffer")?;
        let framebuffer = vk::Framebuffer::from_raw(self.handle());
        self.push(GpuEvent::CreateFramebuffer(framebuffer));
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.push(GpuEvent::DestroyFramebuffer(framebuffer));
    }

    fn create_command_pool(&self, _role: QueueRole) -> VulkanResult<vk::CommandPool> {
        self.check("create_command_pool")?;
        let pool = vk::CommandPool::from_raw(self.handle());
        self.push(GpuEvent::CreateCommandPool(pool));
        Ok(pool)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.push(GpuEvent::DestroyCommandPool(pool));
    }

    fn allocate_command_buffers(&self, _pool: vk::CommandPool, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        self.check("allocate_command_buffers")?;
        let buffers: Vec<_> = (0..count).map(|_| vk::CommandBuffer::from_raw(self.handle())).collect();
        self.push(GpuEvent::AllocateCommandBuffers(buffers.clone()));
        Ok(buffers)
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        self.push(GpuEvent::FreeCommandBuffers(buffers.to_vec()));
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.push(GpuEvent::BeginCommandBuffer(command_buffer));
        Ok(())
    }

    fn record(&self, command_buffer: vk::CommandBuffer, commands: &[GpuCommand]) {
        self.push(GpuEvent::Record {
            command_buffer,
            commands: commands.to_vec(),
        });
    }

    fn begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    ) {
        self.push(GpuEvent::BeginRenderPass {
            command_buffer,
            framebuffer,
            extent,
        });
    }

    fn end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        self.push(GpuEvent::EndRenderPass(command_buffer));
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.push(GpuEvent::EndCommandBuffer(command_buffer));
        Ok(())
    }

    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore> {
        self.check("create_semaphore")?;
        let semaphore = vk::Semaphore::from_raw(self.handle());
        self.live_semaphores.set(self.live_semaphores.get() + 1);
        self.push(GpuEvent::CreateSemaphore(semaphore));
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.live_semaphores.set(self.live_semaphores.get() - 1);
        self.push(GpuEvent::DestroySemaphore(semaphore));
    }

    fn acquire_next_image(&self, _swapchain: vk::SwapchainKHR, signal: vk::Semaphore) -> VulkanResult<AcquiredImage> {
        self.check("acquire_next_image")?;
        let index = self.next_image.get();
        self.next_image.set((index + 1) % self.image_count as u32);
        self.push(GpuEvent::Acquire { index, signal });
        Ok(AcquiredImage {
            index,
            suboptimal: false,
        })
    }

    fn submit(&self, role: QueueRole, submission: &Submission) -> VulkanResult<()> {
        self.check("submit")?;
        self.push(GpuEvent::Submit {
            role,
            submission: *submission,
        });
        Ok(())
    }

    fn wait_queue_idle(&self, role: QueueRole) -> VulkanResult<()> {
        self.push(GpuEvent::WaitQueueIdle(role));
        Ok(())
    }

    fn present(&self, _swapchain: vk::SwapchainKHR, image_index: u32, wait: vk::Semaphore) -> VulkanResult<PresentStatus> {
        self.push(GpuEvent::Present { image_index, wait });
        match self.present_script.borrow_mut().pop_front() {
            None | Some(MockPresent::Optimal) => Ok(PresentStatus::Optimal),
            Some(MockPresent::Suboptimal) => Ok(PresentStatus::Suboptimal),
            Some(MockPresent::OutOfDate) => Err(VulkanError::SwapchainOutOfDate),
        }
    }

    fn wait_device_idle(&self) -> VulkanResult<()> {
        self.push(GpuEvent::WaitDeviceIdle);
        Ok(())
    }
}

/// Instance that produces [`MockGpu`]s sharing its event log
pub struct MockInstance {
    log: EventLog,
    surface: Option<vk::SurfaceKHR>,
    pub fail_device_selection: bool,
    /// Forwarded to [`MockGpu::fail_call`] on the next created device
    pub fail_gpu_call: Option<(&'static str, usize)>,
}

impl MockInstance {
    pub fn new() -> Self {
        Self {
            log: EventLog::default(),
            surface: None,
            fail_device_selection: false,
            fail_gpu_call: None,
        }
    }

    pub fn log(&self) -> EventLog {
        Rc::clone(&self.log)
    }
}

impl GpuInstance for MockInstance {
    type Gpu = MockGpu;

    fn bind_surface(&mut self, target: &mut dyn PresentationTarget) -> VulkanResult<()> {
        self.surface = Some(target.create_surface(vk::Instance::from_raw(1))?);
        self.log.borrow_mut().push(GpuEvent::SurfaceBound);
        Ok(())
    }

    fn create_device(&mut self) -> VulkanResult<MockGpu> {
        if self.surface.is_none() {
            return Err(VulkanError::InvalidOperation {
                reason: "no surface bound".to_string(),
            });
        }
        if self.fail_device_selection {
            return Err(VulkanError::NoSuitableDevice);
        }
        let gpu = MockGpu::with_log(Rc::clone(&self.log));
        if let Some((op, skip)) = self.fail_gpu_call.take() {
            gpu.fail_call(op, skip);
        }
        Ok(gpu)
    }

    fn destroy_surface(&mut self) {
        if self.surface.take().is_some() {
            self.log.borrow_mut().push(GpuEvent::SurfaceDestroyed);
        }
    }

    fn destroy_debug_hook(&mut self) {
        self.log.borrow_mut().push(GpuEvent::DebugHookDestroyed);
    }
}

/// Window stand-in with a fixed framebuffer size
pub struct MockTarget {
    pub extent: vk::Extent2D,
}

impl MockTarget {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            extent: vk::Extent2D { width, height },
        }
    }
}

impl PresentationTarget for MockTarget {
    fn create_surface(&mut self, _instance: vk::Instance) -> VulkanResult<vk::SurfaceKHR> {
        Ok(vk::SurfaceKHR::from_raw(7))
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        self.extent
    }
}
