//! GPU memory management.
//!
//! Buffers and images own exactly one `VkDeviceMemory` each. The resource handle
//! and its memory are created together and released together, handle first.

use crate::device::LogicalDevice;
use crate::error::{GpuError, Result, VkResultExt};
use ash::vk;
use std::ptr::NonNull;
use std::sync::Arc;

/// Find the first memory type allowed by `type_bits` whose flags include `properties`.
pub fn memory_type_from_properties(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    memory_properties
        .memory_types
        .iter()
        .take(memory_properties.memory_type_count as usize)
        .enumerate()
        .find(|(index, memory_type)| {
            type_bits & (1 << index) != 0 && memory_type.property_flags.contains(properties)
        })
        .map(|(index, _)| index as u32)
}

/// Reject uploads that do not fit into `capacity` bytes.
pub fn check_upload_size(len: u64, capacity: u64) -> Result<()> {
    if len > capacity {
        return Err(GpuError::illegal_argument(format!(
            "upload of {len} bytes exceeds buffer capacity of {capacity} bytes"
        )));
    }
    Ok(())
}

/// Reject host access to memory whose type is not host-visible.
pub fn check_host_visible(memory_flags: vk::MemoryPropertyFlags) -> Result<()> {
    if !memory_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
        return Err(GpuError::illegal_state(format!(
            "memory with {memory_flags:?} is not host-visible and cannot be mapped"
        )));
    }
    Ok(())
}

/// Allocate memory satisfying `requirements` with the given property flags.
///
/// Returns the memory and the full property flags of the chosen type.
pub(crate) fn allocate_memory(
    device: &LogicalDevice,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> Result<(vk::DeviceMemory, vk::MemoryPropertyFlags)> {
    let memory_type_index = device
        .memory_type_from_properties(requirements.memory_type_bits, properties)
        .ok_or_else(|| {
            GpuError::illegal_state(format!(
                "no memory type matches bits {:#b} with {:?}",
                requirements.memory_type_bits, properties
            ))
        })?;

    let allocate_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    let memory = unsafe {
        device
            .raw()
            .allocate_memory(&allocate_info, None)
            .context("vkAllocateMemory")?
    };
    let memory_flags =
        device.memory_properties().memory_types[memory_type_index as usize].property_flags;
    Ok((memory, memory_flags))
}

/// A buffer with its backing memory.
pub struct Buffer {
    device: Arc<LogicalDevice>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    memory_flags: vk::MemoryPropertyFlags,
    size: u64,
    usage: vk::BufferUsageFlags,
    bound: bool,
}

impl Buffer {
    /// Create an unbound buffer and allocate memory for it.
    pub(crate) fn new(
        device: &Arc<LogicalDevice>,
        size: u64,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        if size == 0 {
            return Err(GpuError::illegal_argument("buffer size must be non-zero"));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            device
                .raw()
                .create_buffer(&buffer_info, None)
                .context("vkCreateBuffer")?
        };

        let requirements = unsafe { device.raw().get_buffer_memory_requirements(buffer) };
        let (memory, memory_flags) = match allocate_memory(device, requirements, properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.raw().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        Ok(Self {
            device: device.clone(),
            buffer,
            memory,
            memory_flags,
            size,
            usage,
            bound: false,
        })
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Property flags of the memory type backing the buffer.
    pub fn memory_flags(&self) -> vk::MemoryPropertyFlags {
        self.memory_flags
    }

    /// Capacity in bytes as requested at creation.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Associate the memory with the buffer. Allowed once.
    pub fn bind(&mut self) -> Result<()> {
        if self.bound {
            return Err(GpuError::illegal_state("buffer memory is already bound"));
        }
        unsafe {
            self.device
                .raw()
                .bind_buffer_memory(self.buffer, self.memory, 0)
                .context("vkBindBufferMemory")?;
        }
        self.bound = true;
        Ok(())
    }

    /// Map the whole buffer. The memory is unmapped when the guard drops.
    ///
    /// Fails with an illegal-state error when the memory is not host-visible.
    pub fn map(&self) -> Result<Mapping<'_>> {
        check_host_visible(self.memory_flags)?;
        let ptr = unsafe {
            self.device
                .raw()
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .context("vkMapMemory")?
        };
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| GpuError::illegal_state("vkMapMemory returned a null pointer"))?;

        Ok(Mapping { buffer: self, ptr })
    }

    /// Copy `data` into the start of the buffer through a map/copy/unmap cycle.
    pub fn load(&self, data: &[u8]) -> Result<()> {
        check_upload_size(data.len() as u64, self.size)?;
        let mut mapping = self.map()?;
        mapping.write(0, data)
    }

    /// Copy a slice of plain-old-data values into the buffer.
    pub fn load_pod<T: bytemuck::Pod>(&self, data: &[T]) -> Result<()> {
        self.load(bytemuck::cast_slice(data))
    }

    /// Descriptor info covering the whole buffer.
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::default()
            .buffer(self.buffer)
            .offset(0)
            .range(self.size)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_buffer(self.buffer, None);
            self.device.raw().free_memory(self.memory, None);
        }
    }
}

/// A host mapping of a [`Buffer`]'s memory.
pub struct Mapping<'a> {
    buffer: &'a Buffer,
    ptr: NonNull<u8>,
}

impl Mapping<'_> {
    /// Write raw bytes at `offset`.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| GpuError::illegal_argument("write range overflows"))?;
        check_upload_size(end, self.buffer.size)?;

        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.ptr.as_ptr().add(offset as usize),
                data.len(),
            );
        }
        Ok(())
    }

    /// Raw pointer to the start of the mapping.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for Mapping<'_> {
    fn drop(&mut self) {
        unsafe {
            self.buffer.device.raw().unmap_memory(self.buffer.memory);
        }
    }
}

/// An image with its backing memory.
pub struct Image {
    device: Arc<LogicalDevice>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    format: vk::Format,
    extent: vk::Extent3D,
    bound: bool,
}

impl Image {
    /// Create an unbound image and allocate memory for it.
    pub(crate) fn new(
        device: &Arc<LogicalDevice>,
        create_info: &vk::ImageCreateInfo<'_>,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let image = unsafe {
            device
                .raw()
                .create_image(create_info, None)
                .context("vkCreateImage")?
        };

        let requirements = unsafe { device.raw().get_image_memory_requirements(image) };
        let (memory, _) = match allocate_memory(device, requirements, properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.raw().destroy_image(image, None) };
                return Err(e);
            }
        };

        Ok(Self {
            device: device.clone(),
            image,
            memory,
            format: create_info.format,
            extent: create_info.extent,
            bound: false,
        })
    }

    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Associate the memory with the image. Allowed once.
    pub fn bind(&mut self) -> Result<()> {
        if self.bound {
            return Err(GpuError::illegal_state("image memory is already bound"));
        }
        unsafe {
            self.device
                .raw()
                .bind_image_memory(self.image, self.memory, 0)
                .context("vkBindImageMemory")?;
        }
        self.bound = true;
        Ok(())
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_image(self.image, None);
            self.device.raw().free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn memory_table(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (slot, &property_flags) in properties.memory_types.iter_mut().zip(flags) {
            slot.property_flags = property_flags;
        }
        properties
    }

    #[test]
    fn first_matching_type_wins() {
        let table = memory_table(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);

        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(memory_type_from_properties(&table, 0b111, host), Some(1));
        // Repeated lookups are deterministic.
        assert_eq!(memory_type_from_properties(&table, 0b111, host), Some(1));
    }

    #[test]
    fn type_bits_restrict_candidates() {
        let table = memory_table(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);

        assert_eq!(
            memory_type_from_properties(&table, 0b10, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Some(1)
        );
    }

    #[test]
    fn superset_flags_match_and_missing_flags_do_not() {
        let table = memory_table(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);

        assert_eq!(
            memory_type_from_properties(&table, 0b1, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(0)
        );
        assert_eq!(
            memory_type_from_properties(&table, 0b1, vk::MemoryPropertyFlags::HOST_CACHED),
            None
        );
    }

    #[test]
    fn types_beyond_count_are_ignored() {
        let mut table = memory_table(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        table.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;

        assert_eq!(
            memory_type_from_properties(&table, 0b11, vk::MemoryPropertyFlags::HOST_VISIBLE),
            None
        );
    }

    #[test]
    fn upload_of_exact_capacity_is_allowed() {
        assert!(check_upload_size(256, 256).is_ok());
        assert!(check_upload_size(0, 256).is_ok());
    }

    #[test]
    fn device_local_memory_cannot_be_mapped() {
        let err = check_host_visible(vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalState);

        assert!(check_host_visible(
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE
        )
        .is_ok());
    }

    #[test]
    fn oversized_upload_is_illegal_argument() {
        let err = check_upload_size(257, 256).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalArgument);
    }
}
