//! Physical device selection and the ash-backed [`Gpu`]

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::CStr;

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Instance};

use crate::render::error::{check_range, VulkanError, VulkanResult};
use crate::render::gpu::{
    AcquiredImage, BufferAllocation, Gpu, GpuCommand, ImageAllocation, ImageDesc, PresentStatus, QueueRole,
    Submission, SwapchainImages,
};
use crate::render::vulkan::memory::{find_memory_type, sharing_for};
use crate::render::vulkan::render_pass::{create_render_pass, pick_depth_format};
use crate::render::vulkan::swapchain::{choose_extent, choose_present_mode, choose_surface_format, desired_image_count};

/// Queue family chosen for each role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// First family with graphics support
    pub graphics: u32,
    /// First family that can present to the surface
    pub present: u32,
    /// A transfer-only family when one exists, the graphics family otherwise
    pub transfer: u32,
}

impl QueueFamilyIndices {
    /// Pick families from per-family capability flags and surface support
    pub fn select(families: &[vk::QueueFlags], present_support: &[bool]) -> Option<Self> {
        let graphics = families.iter().position(|flags| flags.contains(vk::QueueFlags::GRAPHICS))?;
        let present = present_support.iter().position(|&supported| supported)?;
        let transfer = families
            .iter()
            .position(|flags| flags.contains(vk::QueueFlags::TRANSFER) && !flags.contains(vk::QueueFlags::GRAPHICS))
            .unwrap_or(graphics);

        Some(Self {
            graphics: graphics as u32,
            present: present as u32,
            transfer: transfer as u32,
        })
    }

    /// Distinct families, each needing one queue
    pub fn unique(&self) -> Vec<u32> {
        let mut unique = vec![self.graphics];
        for family in [self.present, self.transfer] {
            if !unique.contains(&family) {
                unique.push(family);
            }
        }
        unique
    }
}

/// Pick the first physical device with every required queue family and
/// swapchain support
pub fn select_physical_device(
    instance: &Instance,
    surface_loader: &Surface,
    surface: vk::SurfaceKHR,
) -> VulkanResult<(vk::PhysicalDevice, QueueFamilyIndices)> {
    let devices = unsafe { instance.enumerate_physical_devices().map_err(VulkanError::Api)? };

    for device in devices {
        let families: Vec<vk::QueueFlags> = unsafe { instance.get_physical_device_queue_family_properties(device) }
            .iter()
            .map(|family| family.queue_flags)
            .collect();

        let mut present_support = Vec::with_capacity(families.len());
        for index in 0..families.len() {
            let supported = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, index as u32, surface)
                    .map_err(VulkanError::Api)?
            };
            present_support.push(supported);
        }

        let Some(indices) = QueueFamilyIndices::select(&families, &present_support) else {
            continue;
        };

        let extensions = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map_err(VulkanError::Api)?
        };
        let has_swapchain = extensions.iter().any(|available| {
            let name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
            name == SwapchainLoader::name()
        });
        if !has_swapchain {
            continue;
        }

        let properties = unsafe { instance.get_physical_device_properties(device) };
        log::info!(
            "Selected GPU: {} (graphics {}, present {}, transfer {})",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy(),
            indices.graphics,
            indices.present,
            indices.transfer
        );
        return Ok((device, indices));
    }

    Err(VulkanError::NoSuitableDevice)
}

/// Run `release` when binding memory to a fresh resource failed
fn bind_or_release(bound: Result<(), vk::Result>, release: impl FnOnce()) -> VulkanResult<()> {
    bound.map_err(|result| {
        release();
        VulkanError::Api(result)
    })
}

/// Logical device with its queues and transient command pools
pub struct VulkanGpu {
    instance: Instance,
    physical_device: vk::PhysicalDevice,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    device: Device,
    families: QueueFamilyIndices,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    transfer_queue: vk::Queue,
    surface_loader: Surface,
    surface: vk::SurfaceKHR,
    swapchain_loader: SwapchainLoader,
    transfer_pool: vk::CommandPool,
    barrier_pool: vk::CommandPool,
    prefer_mailbox: bool,
    allocation_sizes: RefCell<HashMap<vk::DeviceMemory, vk::DeviceSize>>,
}

impl VulkanGpu {
    /// Open a logical device with one queue per distinct family
    pub fn new(
        instance: &Instance,
        surface_loader: Surface,
        surface: vk::SurfaceKHR,
        prefer_mailbox: bool,
    ) -> VulkanResult<Self> {
        let (physical_device, families) = select_physical_device(instance, &surface_loader, surface)?;

        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extensions = [SwapchainLoader::name().as_ptr()];
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions);

        let device = unsafe {
            instance
                .create_device(physical_device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let (graphics_queue, present_queue, transfer_queue) = unsafe {
            (
                device.get_device_queue(families.graphics, 0),
                device.get_device_queue(families.present, 0),
                device.get_device_queue(families.transfer, 0),
            )
        };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let swapchain_loader = SwapchainLoader::new(instance, &device);

        let mut gpu = Self {
            instance: instance.clone(),
            physical_device,
            memory_properties,
            device,
            families,
            graphics_queue,
            present_queue,
            transfer_queue,
            surface_loader,
            surface,
            swapchain_loader,
            transfer_pool: vk::CommandPool::null(),
            barrier_pool: vk::CommandPool::null(),
            prefer_mailbox,
            allocation_sizes: RefCell::new(HashMap::new()),
        };
        gpu.transfer_pool = gpu.create_pool(families.transfer, vk::CommandPoolCreateFlags::TRANSIENT)?;
        gpu.barrier_pool = gpu.create_pool(families.graphics, vk::CommandPoolCreateFlags::TRANSIENT)?;

        log::debug!("Logical device created");
        Ok(gpu)
    }

    /// Queue family indices in use
    pub fn families(&self) -> QueueFamilyIndices {
        self.families
    }

    fn create_pool(&self, family: u32, flags: vk::CommandPoolCreateFlags) -> VulkanResult<vk::CommandPool> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(family)
            .flags(flags);
        unsafe { self.device.create_command_pool(&create_info, None).map_err(VulkanError::Api) }
    }

    fn queue(&self, role: QueueRole) -> vk::Queue {
        match role {
            QueueRole::Graphics => self.graphics_queue,
            QueueRole::Present => self.present_queue,
            QueueRole::Transfer => self.transfer_queue,
        }
    }

    fn family(&self, role: QueueRole) -> u32 {
        match role {
            QueueRole::Graphics => self.families.graphics,
            QueueRole::Present => self.families.present,
            QueueRole::Transfer => self.families.transfer,
        }
    }

    /// Resources are written on the transfer queue and read on the graphics queue
    fn resource_sharing(&self) -> (vk::SharingMode, Vec<u32>) {
        sharing_for(&[self.families.graphics, self.families.transfer])
    }

    fn allocate_memory(&self, requirements: vk::MemoryRequirements, properties: vk::MemoryPropertyFlags) -> VulkanResult<vk::DeviceMemory> {
        let memory_type_index = find_memory_type(&self.memory_properties, requirements.memory_type_bits, properties)?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let memory = unsafe { self.device.allocate_memory(&alloc_info, None).map_err(VulkanError::Api)? };
        self.allocation_sizes.borrow_mut().insert(memory, requirements.size);
        Ok(memory)
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        self.allocation_sizes.borrow_mut().remove(&memory);
        unsafe { self.device.free_memory(memory, None) };
    }

    fn record_command(&self, command_buffer: vk::CommandBuffer, command: &GpuCommand) {
        let color_layer = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let whole_image = |aspect_mask| vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };

        unsafe {
            match *command {
                GpuCommand::CopyBuffer {
                    src,
                    dst,
                    src_offset,
                    dst_offset,
                    size,
                } => {
                    let region = vk::BufferCopy {
                        src_offset,
                        dst_offset,
                        size,
                    };
                    self.device.cmd_copy_buffer(command_buffer, src, dst, &[region]);
                }
                GpuCommand::CopyImage { src, dst, width, height } => {
                    let region = vk::ImageCopy {
                        src_subresource: color_layer,
                        src_offset: vk::Offset3D::default(),
                        dst_subresource: color_layer,
                        dst_offset: vk::Offset3D::default(),
                        extent: vk::Extent3D { width, height, depth: 1 },
                    };
                    self.device.cmd_copy_image(
                        command_buffer,
                        src,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        dst,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                }
                GpuCommand::Barrier(barrier) => {
                    let image_barrier = vk::ImageMemoryBarrier::builder()
                        .old_layout(barrier.old_layout)
                        .new_layout(barrier.new_layout)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .image(barrier.image)
                        .subresource_range(whole_image(barrier.aspect))
                        .src_access_mask(barrier.src_access)
                        .dst_access_mask(barrier.dst_access)
                        .build();
                    self.device.cmd_pipeline_barrier(
                        command_buffer,
                        barrier.src_stage,
                        barrier.dst_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[image_barrier],
                    );
                }
                GpuCommand::ClearColorImage { image, color } => {
                    self.device.cmd_clear_color_image(
                        command_buffer,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &vk::ClearColorValue { float32: color },
                        &[whole_image(vk::ImageAspectFlags::COLOR)],
                    );
                }
                GpuCommand::ClearDepthStencilImage {
                    image,
                    aspect,
                    depth,
                    stencil,
                } => {
                    self.device.cmd_clear_depth_stencil_image(
                        command_buffer,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &vk::ClearDepthStencilValue { depth, stencil },
                        &[whole_image(aspect)],
                    );
                }
                GpuCommand::ClearAttachments { color, depth, rect } => {
                    let mut attachments = Vec::with_capacity(2);
                    if let Some(color) = color {
                        attachments.push(vk::ClearAttachment {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            color_attachment: 0,
                            clear_value: vk::ClearValue {
                                color: vk::ClearColorValue { float32: color },
                            },
                        });
                    }
                    if let Some(depth) = depth {
                        attachments.push(vk::ClearAttachment {
                            aspect_mask: vk::ImageAspectFlags::DEPTH,
                            color_attachment: 0,
                            clear_value: vk::ClearValue {
                                depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
                            },
                        });
                    }
                    if !attachments.is_empty() {
                        let rects = [vk::ClearRect {
                            rect,
                            base_array_layer: 0,
                            layer_count: 1,
                        }];
                        self.device.cmd_clear_attachments(command_buffer, &attachments, &rects);
                    }
                }
            }
        }
    }
}

impl Gpu for VulkanGpu {
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<BufferAllocation> {
        let (sharing_mode, families) = self.resource_sharing();
        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(sharing_mode)
            .queue_family_indices(&families);

        let buffer = unsafe { self.device.create_buffer(&create_info, None).map_err(VulkanError::Api)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let memory = match self.allocate_memory(requirements, properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        bind_or_release(unsafe { self.device.bind_buffer_memory(buffer, memory, 0) }, || {
            unsafe { self.device.destroy_buffer(buffer, None) };
            self.free_memory(memory);
        })?;
        Ok(BufferAllocation { buffer, memory, size })
    }

    fn destroy_buffer(&self, allocation: &BufferAllocation) {
        unsafe { self.device.destroy_buffer(allocation.buffer, None) };
        self.free_memory(allocation.memory);
    }

    fn create_image(&self, desc: &ImageDesc) -> VulkanResult<ImageAllocation> {
        let (sharing_mode, families) = self.resource_sharing();
        let initial_layout = if desc.preinitialised {
            vk::ImageLayout::PREINITIALIZED
        } else {
            vk::ImageLayout::UNDEFINED
        };
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(desc.format)
            .tiling(desc.tiling)
            .initial_layout(initial_layout)
            .usage(desc.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(sharing_mode)
            .queue_family_indices(&families);

        let image = unsafe { self.device.create_image(&create_info, None).map_err(VulkanError::Api)? };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let memory = match self.allocate_memory(requirements, desc.memory_properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        bind_or_release(unsafe { self.device.bind_image_memory(image, memory, 0) }, || {
            unsafe { self.device.destroy_image(image, None) };
            self.free_memory(memory);
        })?;
        Ok(ImageAllocation {
            image,
            memory,
            format: desc.format,
            width: desc.width,
            height: desc.height,
            size: requirements.size,
        })
    }

    fn destroy_image(&self, allocation: &ImageAllocation) {
        unsafe { self.device.destroy_image(allocation.image, None) };
        self.free_memory(allocation.memory);
    }

    fn image_subresource_layout(&self, allocation: &ImageAllocation) -> vk::SubresourceLayout {
        let subresource = vk::ImageSubresource {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            array_layer: 0,
        };
        unsafe { self.device.get_image_subresource_layout(allocation.image, subresource) }
    }

    fn write_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, bytes: &[u8]) -> VulkanResult<()> {
        let capacity = self
            .allocation_sizes
            .borrow()
            .get(&memory)
            .copied()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "write to memory not allocated by this device".to_string(),
            })?;
        check_range(offset, bytes.len() as vk::DeviceSize, capacity)?;

        unsafe {
            let ptr = self
                .device
                .map_memory(memory, offset, bytes.len() as vk::DeviceSize, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
            self.device.unmap_memory(memory);
        }
        Ok(())
    }

    fn execute_transient(&self, role: QueueRole, commands: &[GpuCommand]) -> VulkanResult<()> {
        let pool = match role {
            QueueRole::Transfer => self.transfer_pool,
            QueueRole::Graphics => self.barrier_pool,
            QueueRole::Present => {
                return Err(VulkanError::InvalidOperation {
                    reason: "transient work cannot target the present queue".to_string(),
                })
            }
        };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffers = unsafe {
            self.device
                .allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)?
        };

        let result = (|| -> VulkanResult<()> {
            let command_buffer = command_buffers[0];
            let begin_info =
                vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe {
                self.device
                    .begin_command_buffer(command_buffer, &begin_info)
                    .map_err(VulkanError::Api)?;
            }
            for command in commands {
                self.record_command(command_buffer, command);
            }
            unsafe {
                self.device.end_command_buffer(command_buffer).map_err(VulkanError::Api)?;
                let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
                let queue = self.queue(role);
                self.device
                    .queue_submit(queue, &[submit_info], vk::Fence::null())
                    .map_err(VulkanError::Api)?;
                self.device.queue_wait_idle(queue).map_err(VulkanError::Api)
            }
        })();

        unsafe { self.device.free_command_buffers(pool, &command_buffers) };
        result
    }

    fn depth_format(&self) -> VulkanResult<vk::Format> {
        pick_depth_format(|format| unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
                .optimal_tiling_features
        })
    }

    fn create_swapchain(&self, window_extent: vk::Extent2D, old_swapchain: vk::SwapchainKHR) -> VulkanResult<SwapchainImages> {
        let (capabilities, formats, present_modes) = unsafe {
            (
                self.surface_loader
                    .get_physical_device_surface_capabilities(self.physical_device, self.surface)
                    .map_err(VulkanError::Api)?,
                self.surface_loader
                    .get_physical_device_surface_formats(self.physical_device, self.surface)
                    .map_err(VulkanError::Api)?,
                self.surface_loader
                    .get_physical_device_surface_present_modes(self.physical_device, self.surface)
                    .map_err(VulkanError::Api)?,
            )
        };

        let format = choose_surface_format(&formats)?;
        let present_mode = choose_present_mode(&present_modes, self.prefer_mailbox);
        let extent = choose_extent(&capabilities, window_extent);
        let image_count = desired_image_count(&capabilities);
        let (sharing_mode, families) = sharing_for(&[self.families.graphics, self.families.present]);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&families)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe {
            self.swapchain_loader
                .create_swapchain(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        let images = unsafe {
            self.swapchain_loader
                .get_swapchain_images(swapchain)
                .map_err(VulkanError::Api)?
        };

        log::debug!("Swapchain present mode {present_mode:?}, {} image(s)", images.len());
        Ok(SwapchainImages {
            swapchain,
            images,
            format: format.format,
            extent,
        })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> VulkanResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        unsafe { self.device.create_image_view(&create_info, None).map_err(VulkanError::Api) }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn create_render_pass(&self, color_format: vk::Format, depth_format: vk::Format) -> VulkanResult<vk::RenderPass> {
        create_render_pass(&self.device, color_format, depth_format)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VulkanResult<vk::Framebuffer> {
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        unsafe { self.device.create_framebuffer(&create_info, None).map_err(VulkanError::Api) }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn create_command_pool(&self, role: QueueRole) -> VulkanResult<vk::CommandPool> {
        self.create_pool(self.family(role), vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffers(&self, pool: vk::CommandPool, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        unsafe { self.device.allocate_command_buffers(&alloc_info).map_err(VulkanError::Api) }
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(pool, buffers) };
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
        unsafe {
            self.device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)
        }
    }

    fn record(&self, command_buffer: vk::CommandBuffer, commands: &[GpuCommand]) {
        for command in commands {
            self.record_command(command_buffer, command);
        }
    }

    fn begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    ) {
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            });
        unsafe {
            self.device
                .cmd_begin_render_pass(command_buffer, &begin_info, vk::SubpassContents::INLINE);
        }
    }

    fn end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(command_buffer) };
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        unsafe { self.device.end_command_buffer(command_buffer).map_err(VulkanError::Api) }
    }

    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        unsafe { self.device.create_semaphore(&create_info, None).map_err(VulkanError::Api) }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn acquire_next_image(&self, swapchain: vk::SwapchainKHR, signal: vk::Semaphore) -> VulkanResult<AcquiredImage> {
        let (index, suboptimal) = unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null())?
        };
        Ok(AcquiredImage { index, suboptimal })
    }

    fn submit(&self, role: QueueRole, submission: &Submission) -> VulkanResult<()> {
        let wait_semaphores = [submission.wait_semaphore];
        let wait_stages = [submission.wait_stage];
        let command_buffers = [submission.command_buffer];
        let signal_semaphores = [submission.signal_semaphore];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device
                .queue_submit(self.queue(role), &[submit_info], vk::Fence::null())
                .map_err(VulkanError::Api)
        }
    }

    fn wait_queue_idle(&self, role: QueueRole) -> VulkanResult<()> {
        unsafe { self.device.queue_wait_idle(self.queue(role)).map_err(VulkanError::Api) }
    }

    fn present(&self, swapchain: vk::SwapchainKHR, image_index: u32, wait: vk::Semaphore) -> VulkanResult<PresentStatus> {
        let wait_semaphores = [wait];
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let suboptimal = unsafe { self.swapchain_loader.queue_present(self.present_queue, &present_info)? };
        Ok(if suboptimal {
            PresentStatus::Suboptimal
        } else {
            PresentStatus::Optimal
        })
    }

    fn wait_device_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device_wait_idle().map_err(VulkanError::Api) }
    }
}

impl Drop for VulkanGpu {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::warn!("Device wait idle failed during teardown: {e:?}");
            }
            self.device.destroy_command_pool(self.barrier_pool, None);
            self.device.destroy_command_pool(self.transfer_pool, None);
            self.device.destroy_device(None);
        }
        log::debug!("Logical device destroyed");
    }
}
