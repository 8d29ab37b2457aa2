//! Host-to-device transfers through a growable staging buffer
//!
//! Every resource gets its own dedicated memory allocation bound at offset 0.
//! Uploads go through a single host-visible staging buffer that only ever
//! grows, and each copy or layout transition is recorded into a one-time
//! command buffer and waited on before returning. Nothing here is meant to be
//! called from more than one thread or re-entrantly.

use std::rc::Rc;

use ash::vk;
use bytemuck::Pod;

use crate::render::error::{check_range, VulkanError, VulkanResult};
use crate::render::gpu::{BufferAllocation, Gpu, GpuCommand, ImageAllocation, ImageBarrier, ImageDesc, QueueRole};

/// Device buffer that frees itself on drop
pub struct DeviceBuffer<G: Gpu> {
    gpu: Rc<G>,
    allocation: BufferAllocation,
}

impl<G: Gpu> DeviceBuffer<G> {
    /// Buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.allocation.buffer
    }

    /// Backing memory
    pub fn memory(&self) -> vk::DeviceMemory {
        self.allocation.memory
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.allocation.size
    }
}

impl<G: Gpu> Drop for DeviceBuffer<G> {
    fn drop(&mut self) {
        self.gpu.destroy_buffer(&self.allocation);
    }
}

/// Device image that frees itself on drop
pub struct DeviceImage<G: Gpu> {
    gpu: Rc<G>,
    allocation: ImageAllocation,
    memory_properties: vk::MemoryPropertyFlags,
}

impl<G: Gpu> DeviceImage<G> {
    /// Image handle
    pub fn handle(&self) -> vk::Image {
        self.allocation.image
    }

    /// Texel format
    pub fn format(&self) -> vk::Format {
        self.allocation.format
    }

    /// Width in texels
    pub fn width(&self) -> u32 {
        self.allocation.width
    }

    /// Height in texels
    pub fn height(&self) -> u32 {
        self.allocation.height
    }
}

impl<G: Gpu> Drop for DeviceImage<G> {
    fn drop(&mut self) {
        self.gpu.destroy_image(&self.allocation);
    }
}

/// Access masks and stages for one supported layout transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    /// Accesses made before the barrier
    pub src_access: vk::AccessFlags,
    /// Accesses made after the barrier
    pub dst_access: vk::AccessFlags,
    /// Stage of the source accesses
    pub src_stage: vk::PipelineStageFlags,
    /// Stage of the destination accesses
    pub dst_stage: vk::PipelineStageFlags,
    /// Queue able to execute both stages
    pub queue: QueueRole,
}

/// Look up the barrier parameters for `old -> new`
///
/// Only the pairs listed here are supported; anything else is an error so
/// that no barrier with guessed masks is ever recorded.
pub fn plan_layout_transition(old: vk::ImageLayout, new: vk::ImageLayout) -> VulkanResult<LayoutTransition> {
    use vk::ImageLayout as L;

    let transfer = |src_access, src_stage, dst_access| LayoutTransition {
        src_access,
        dst_access,
        src_stage,
        dst_stage: vk::PipelineStageFlags::TRANSFER,
        queue: QueueRole::Transfer,
    };
    let shader_read = |src_access| LayoutTransition {
        src_access,
        dst_access: vk::AccessFlags::SHADER_READ,
        src_stage: vk::PipelineStageFlags::TRANSFER,
        dst_stage: vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER,
        queue: QueueRole::Graphics,
    };

    let plan = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => transfer(
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
        (L::PREINITIALIZED, L::TRANSFER_SRC_OPTIMAL) => transfer(
            vk::AccessFlags::HOST_WRITE,
            vk::PipelineStageFlags::HOST,
            vk::AccessFlags::TRANSFER_READ,
        ),
        (L::PREINITIALIZED, L::TRANSFER_DST_OPTIMAL) => transfer(
            vk::AccessFlags::HOST_WRITE,
            vk::PipelineStageFlags::HOST,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => shader_read(vk::AccessFlags::TRANSFER_WRITE),
        (L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => shader_read(vk::AccessFlags::TRANSFER_READ),
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => LayoutTransition {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            queue: QueueRole::Graphics,
        },
        _ => return Err(VulkanError::UnsupportedLayoutTransition { old, new }),
    };

    Ok(plan)
}

/// Whether a depth format carries a stencil component
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT
    )
}

/// Aspects a barrier into `new_layout` must cover for an image of `format`
pub fn transition_aspect(format: vk::Format, new_layout: vk::ImageLayout) -> vk::ImageAspectFlags {
    if new_layout == vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL {
        depth_aspect(format)
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Depth aspect, plus stencil when the format has one
pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil_component(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

/// Creates device resources and moves data into them
pub struct TransferManager<G: Gpu> {
    gpu: Rc<G>,
    staging: Option<DeviceBuffer<G>>,
}

impl<G: Gpu> TransferManager<G> {
    /// Create a manager with no staging buffer yet
    pub fn new(gpu: Rc<G>) -> Self {
        Self { gpu, staging: None }
    }

    /// Device the manager allocates on
    pub fn gpu(&self) -> &Rc<G> {
        &self.gpu
    }

    /// Current staging buffer size, zero before the first upload
    pub fn staging_capacity(&self) -> vk::DeviceSize {
        self.staging.as_ref().map_or(0, DeviceBuffer::size)
    }

    /// Create a buffer with dedicated memory
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<DeviceBuffer<G>> {
        let allocation = self.gpu.create_buffer(size, usage, memory_properties)?;
        Ok(DeviceBuffer {
            gpu: Rc::clone(&self.gpu),
            allocation,
        })
    }

    /// Create a buffer sized for `count` elements of `T`
    pub fn create_buffer_for<T: Pod>(
        &self,
        count: usize,
        usage: vk::BufferUsageFlags,
        memory_properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<DeviceBuffer<G>> {
        let size = count
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("{count} elements of {} bytes overflow a buffer size", std::mem::size_of::<T>()),
            })?;
        self.create_buffer(size as vk::DeviceSize, usage, memory_properties)
    }

    /// Create a 2D image with dedicated memory
    pub fn create_image(&self, desc: &ImageDesc) -> VulkanResult<DeviceImage<G>> {
        let allocation = self.gpu.create_image(desc)?;
        Ok(DeviceImage {
            gpu: Rc::clone(&self.gpu),
            allocation,
            memory_properties: desc.memory_properties,
        })
    }

    /// Upload `data` into `dst` starting at `byte_offset`
    ///
    /// Blocks until the transfer queue has finished the copy.
    pub fn update_buffer(&mut self, dst: &DeviceBuffer<G>, data: &[u8], byte_offset: vk::DeviceSize) -> VulkanResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let size = data.len() as vk::DeviceSize;
        check_range(byte_offset, size, dst.size())?;

        let staging = self.ensure_staging(byte_offset + size)?;
        self.gpu.write_memory(staging.memory, byte_offset, data)?;
        self.gpu.execute_transient(
            QueueRole::Transfer,
            &[GpuCommand::CopyBuffer {
                src: staging.buffer,
                dst: dst.handle(),
                src_offset: byte_offset,
                dst_offset: byte_offset,
                size,
            }],
        )
    }

    /// Upload `data` as elements starting at element index `element_offset`
    pub fn update_slice<T: Pod>(&mut self, dst: &DeviceBuffer<G>, data: &[T], element_offset: usize) -> VulkanResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let byte_offset = element_offset
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(VulkanError::TransferOutOfBounds {
                offset: vk::DeviceSize::MAX,
                size: bytes.len() as vk::DeviceSize,
                capacity: dst.size(),
            })?;
        self.update_buffer(dst, bytes, byte_offset as vk::DeviceSize)
    }

    /// Upload a single value at element index `element_offset`
    pub fn update_value<T: Pod>(&mut self, dst: &DeviceBuffer<G>, value: &T, element_offset: usize) -> VulkanResult<()> {
        self.update_slice(dst, std::slice::from_ref(value), element_offset)
    }

    /// Write tightly packed texel rows straight into a host-visible
    /// (linear, preinitialised) image
    ///
    /// Rows are placed at the driver's row pitch, so `bytes` must split
    /// evenly into `height` rows.
    pub fn write_host_image(&self, image: &DeviceImage<G>, bytes: &[u8]) -> VulkanResult<()> {
        if !image.memory_properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            return Err(VulkanError::InvalidOperation {
                reason: "image memory is not host visible".to_string(),
            });
        }

        let capacity = image.allocation.size;
        check_range(0, bytes.len() as vk::DeviceSize, capacity)?;
        if bytes.is_empty() {
            return Ok(());
        }

        let rows = image.height() as usize;
        if rows == 0 || bytes.len() % rows != 0 {
            return Err(VulkanError::InvalidOperation {
                reason: format!("{} bytes do not split into {rows} rows", bytes.len()),
            });
        }
        let row_len = (bytes.len() / rows) as vk::DeviceSize;
        let layout = self.gpu.image_subresource_layout(&image.allocation);

        if layout.row_pitch == row_len {
            return self.gpu.write_memory(image.allocation.memory, layout.offset, bytes);
        }

        check_range(0, row_len, layout.row_pitch)?;
        let last_row = (rows as vk::DeviceSize - 1)
            .checked_mul(layout.row_pitch)
            .and_then(|start| start.checked_add(layout.offset))
            .ok_or(VulkanError::TransferOutOfBounds {
                offset: vk::DeviceSize::MAX,
                size: row_len,
                capacity,
            })?;
        check_range(last_row, row_len, capacity)?;

        for (index, row) in bytes.chunks_exact(row_len as usize).enumerate() {
            let offset = layout.offset + index as vk::DeviceSize * layout.row_pitch;
            self.gpu.write_memory(image.allocation.memory, offset, row)?;
        }
        Ok(())
    }

    /// Copy a byte range between two buffers
    pub fn copy_buffer(
        &self,
        src: &DeviceBuffer<G>,
        dst: &DeviceBuffer<G>,
        src_offset: vk::DeviceSize,
        dst_offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VulkanResult<()> {
        if size == 0 {
            return Ok(());
        }
        check_range(src_offset, size, src.size())?;
        check_range(dst_offset, size, dst.size())?;

        self.gpu.execute_transient(
            QueueRole::Transfer,
            &[GpuCommand::CopyBuffer {
                src: src.handle(),
                dst: dst.handle(),
                src_offset,
                dst_offset,
                size,
            }],
        )
    }

    /// Copy a `width` x `height` color region from `src` (TRANSFER_SRC_OPTIMAL)
    /// into `dst` (TRANSFER_DST_OPTIMAL)
    ///
    /// An empty region is a no-op; one larger than either image is rejected.
    pub fn copy_image(&self, src: &DeviceImage<G>, dst: &DeviceImage<G>, width: u32, height: u32) -> VulkanResult<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        let image_width = src.width().min(dst.width());
        let image_height = src.height().min(dst.height());
        if width > image_width || height > image_height {
            return Err(VulkanError::ImageRegionOutOfBounds {
                width,
                height,
                image_width,
                image_height,
            });
        }

        self.gpu.execute_transient(
            QueueRole::Transfer,
            &[GpuCommand::CopyImage {
                src: src.handle(),
                dst: dst.handle(),
                width,
                height,
            }],
        )
    }

    /// Transition an owned image between layouts
    pub fn transition_image_layout(
        &self,
        image: &DeviceImage<G>,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> VulkanResult<()> {
        self.transition_layout(image.handle(), image.format(), old, new)
    }

    /// Transition any image between layouts and wait for completion
    ///
    /// Unsupported pairs fail before anything is recorded.
    pub fn transition_layout(
        &self,
        image: vk::Image,
        format: vk::Format,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> VulkanResult<()> {
        let plan = plan_layout_transition(old, new)?;
        let barrier = ImageBarrier {
            image,
            old_layout: old,
            new_layout: new,
            src_access: plan.src_access,
            dst_access: plan.dst_access,
            src_stage: plan.src_stage,
            dst_stage: plan.dst_stage,
            aspect: transition_aspect(format, new),
        };
        self.gpu.execute_transient(plan.queue, &[GpuCommand::Barrier(barrier)])
    }

    /// Make sure the staging buffer holds at least `required` bytes
    fn ensure_staging(&mut self, required: vk::DeviceSize) -> VulkanResult<BufferAllocation> {
        if let Some(staging) = self.staging.as_ref().filter(|s| s.size() >= required) {
            return Ok(staging.allocation);
        }

        // Old buffer goes first so peak usage never holds both.
        self.staging = None;
        log::debug!("Growing staging buffer to {} bytes", required);
        let staging = self.create_buffer(
            required,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let allocation = staging.allocation;
        self.staging = Some(staging);
        Ok(allocation)
    }
}
