//! Per-adapter capability snapshots.

use crate::error::{Result, VkResultExt};
use crate::instance::Instance;
use crate::surface::SurfaceSupport;
use ash::vk;
use bitflags::bitflags;
use std::collections::HashSet;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

bitflags! {
    /// Boolean core features that can be requested from an adapter, one flag per
    /// `VkPhysicalDeviceFeatures` member in declaration order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DeviceFeatures: u64 {
        const ROBUST_BUFFER_ACCESS = 1 << 0;
        const FULL_DRAW_INDEX_UINT32 = 1 << 1;
        const IMAGE_CUBE_ARRAY = 1 << 2;
        const INDEPENDENT_BLEND = 1 << 3;
        const GEOMETRY_SHADER = 1 << 4;
        const TESSELLATION_SHADER = 1 << 5;
        const SAMPLE_RATE_SHADING = 1 << 6;
        const DUAL_SRC_BLEND = 1 << 7;
        const LOGIC_OP = 1 << 8;
        const MULTI_DRAW_INDIRECT = 1 << 9;
        const DRAW_INDIRECT_FIRST_INSTANCE = 1 << 10;
        const DEPTH_CLAMP = 1 << 11;
        const DEPTH_BIAS_CLAMP = 1 << 12;
        const FILL_MODE_NON_SOLID = 1 << 13;
        const DEPTH_BOUNDS = 1 << 14;
        const WIDE_LINES = 1 << 15;
        const LARGE_POINTS = 1 << 16;
        const ALPHA_TO_ONE = 1 << 17;
        const MULTI_VIEWPORT = 1 << 18;
        const SAMPLER_ANISOTROPY = 1 << 19;
        const TEXTURE_COMPRESSION_ETC2 = 1 << 20;
        const TEXTURE_COMPRESSION_ASTC_LDR = 1 << 21;
        const TEXTURE_COMPRESSION_BC = 1 << 22;
        const OCCLUSION_QUERY_PRECISE = 1 << 23;
        const PIPELINE_STATISTICS_QUERY = 1 << 24;
        const VERTEX_PIPELINE_STORES_AND_ATOMICS = 1 << 25;
        const FRAGMENT_STORES_AND_ATOMICS = 1 << 26;
        const SHADER_TESSELLATION_AND_GEOMETRY_POINT_SIZE = 1 << 27;
        const SHADER_IMAGE_GATHER_EXTENDED = 1 << 28;
        const SHADER_STORAGE_IMAGE_EXTENDED_FORMATS = 1 << 29;
        const SHADER_STORAGE_IMAGE_MULTISAMPLE = 1 << 30;
        const SHADER_STORAGE_IMAGE_READ_WITHOUT_FORMAT = 1 << 31;
        const SHADER_STORAGE_IMAGE_WRITE_WITHOUT_FORMAT = 1 << 32;
        const SHADER_UNIFORM_BUFFER_ARRAY_DYNAMIC_INDEXING = 1 << 33;
        const SHADER_SAMPLED_IMAGE_ARRAY_DYNAMIC_INDEXING = 1 << 34;
        const SHADER_STORAGE_BUFFER_ARRAY_DYNAMIC_INDEXING = 1 << 35;
        const SHADER_STORAGE_IMAGE_ARRAY_DYNAMIC_INDEXING = 1 << 36;
        const SHADER_CLIP_DISTANCE = 1 << 37;
        const SHADER_CULL_DISTANCE = 1 << 38;
        const SHADER_FLOAT64 = 1 << 39;
        const SHADER_INT64 = 1 << 40;
        const SHADER_INT16 = 1 << 41;
        const SHADER_RESOURCE_RESIDENCY = 1 << 42;
        const SHADER_RESOURCE_MIN_LOD = 1 << 43;
        const SPARSE_BINDING = 1 << 44;
        const SPARSE_RESIDENCY_BUFFER = 1 << 45;
        const SPARSE_RESIDENCY_IMAGE_2D = 1 << 46;
        const SPARSE_RESIDENCY_IMAGE_3D = 1 << 47;
        const SPARSE_RESIDENCY_2_SAMPLES = 1 << 48;
        const SPARSE_RESIDENCY_4_SAMPLES = 1 << 49;
        const SPARSE_RESIDENCY_8_SAMPLES = 1 << 50;
        const SPARSE_RESIDENCY_16_SAMPLES = 1 << 51;
        const SPARSE_RESIDENCY_ALIASED = 1 << 52;
        const VARIABLE_MULTISAMPLE_RATE = 1 << 53;
        const INHERITED_QUERIES = 1 << 54;
    }
}

macro_rules! feature_fields {
    ($($flag:ident => $field:ident),* $(,)?) => {
        impl DeviceFeatures {
            /// Collect the enabled flags from a Vulkan feature struct.
            pub fn from_vk(features: &vk::PhysicalDeviceFeatures) -> Self {
                let mut out = Self::empty();
                $(
                    if features.$field == vk::TRUE {
                        out |= Self::$flag;
                    }
                )*
                out
            }

            /// Expand into a Vulkan feature struct for device creation.
            pub fn to_vk(self) -> vk::PhysicalDeviceFeatures {
                let mut out = vk::PhysicalDeviceFeatures::default();
                $(
                    if self.contains(Self::$flag) {
                        out.$field = vk::TRUE;
                    }
                )*
                out
            }
        }
    };
}

feature_fields! {
    ROBUST_BUFFER_ACCESS => robust_buffer_access,
    FULL_DRAW_INDEX_UINT32 => full_draw_index_uint32,
    IMAGE_CUBE_ARRAY => image_cube_array,
    INDEPENDENT_BLEND => independent_blend,
    GEOMETRY_SHADER => geometry_shader,
    TESSELLATION_SHADER => tessellation_shader,
    SAMPLE_RATE_SHADING => sample_rate_shading,
    DUAL_SRC_BLEND => dual_src_blend,
    LOGIC_OP => logic_op,
    MULTI_DRAW_INDIRECT => multi_draw_indirect,
    DRAW_INDIRECT_FIRST_INSTANCE => draw_indirect_first_instance,
    DEPTH_CLAMP => depth_clamp,
    DEPTH_BIAS_CLAMP => depth_bias_clamp,
    FILL_MODE_NON_SOLID => fill_mode_non_solid,
    DEPTH_BOUNDS => depth_bounds,
    WIDE_LINES => wide_lines,
    LARGE_POINTS => large_points,
    ALPHA_TO_ONE => alpha_to_one,
    MULTI_VIEWPORT => multi_viewport,
    SAMPLER_ANISOTROPY => sampler_anisotropy,
    TEXTURE_COMPRESSION_ETC2 => texture_compression_etc2,
    TEXTURE_COMPRESSION_ASTC_LDR => texture_compression_astc_ldr,
    TEXTURE_COMPRESSION_BC => texture_compression_bc,
    OCCLUSION_QUERY_PRECISE => occlusion_query_precise,
    PIPELINE_STATISTICS_QUERY => pipeline_statistics_query,
    VERTEX_PIPELINE_STORES_AND_ATOMICS => vertex_pipeline_stores_and_atomics,
    FRAGMENT_STORES_AND_ATOMICS => fragment_stores_and_atomics,
    SHADER_TESSELLATION_AND_GEOMETRY_POINT_SIZE => shader_tessellation_and_geometry_point_size,
    SHADER_IMAGE_GATHER_EXTENDED => shader_image_gather_extended,
    SHADER_STORAGE_IMAGE_EXTENDED_FORMATS => shader_storage_image_extended_formats,
    SHADER_STORAGE_IMAGE_MULTISAMPLE => shader_storage_image_multisample,
    SHADER_STORAGE_IMAGE_READ_WITHOUT_FORMAT => shader_storage_image_read_without_format,
    SHADER_STORAGE_IMAGE_WRITE_WITHOUT_FORMAT => shader_storage_image_write_without_format,
    SHADER_UNIFORM_BUFFER_ARRAY_DYNAMIC_INDEXING => shader_uniform_buffer_array_dynamic_indexing,
    SHADER_SAMPLED_IMAGE_ARRAY_DYNAMIC_INDEXING => shader_sampled_image_array_dynamic_indexing,
    SHADER_STORAGE_BUFFER_ARRAY_DYNAMIC_INDEXING => shader_storage_buffer_array_dynamic_indexing,
    SHADER_STORAGE_IMAGE_ARRAY_DYNAMIC_INDEXING => shader_storage_image_array_dynamic_indexing,
    SHADER_CLIP_DISTANCE => shader_clip_distance,
    SHADER_CULL_DISTANCE => shader_cull_distance,
    SHADER_FLOAT64 => shader_float64,
    SHADER_INT64 => shader_int64,
    SHADER_INT16 => shader_int16,
    SHADER_RESOURCE_RESIDENCY => shader_resource_residency,
    SHADER_RESOURCE_MIN_LOD => shader_resource_min_lod,
    SPARSE_BINDING => sparse_binding,
    SPARSE_RESIDENCY_BUFFER => sparse_residency_buffer,
    SPARSE_RESIDENCY_IMAGE_2D => sparse_residency_image2_d,
    SPARSE_RESIDENCY_IMAGE_3D => sparse_residency_image3_d,
    SPARSE_RESIDENCY_2_SAMPLES => sparse_residency2_samples,
    SPARSE_RESIDENCY_4_SAMPLES => sparse_residency4_samples,
    SPARSE_RESIDENCY_8_SAMPLES => sparse_residency8_samples,
    SPARSE_RESIDENCY_16_SAMPLES => sparse_residency16_samples,
    SPARSE_RESIDENCY_ALIASED => sparse_residency_aliased,
    VARIABLE_MULTISAMPLE_RATE => variable_multisample_rate,
    INHERITED_QUERIES => inherited_queries,
}

/// One queue family of an adapter.
#[derive(Debug, Clone)]
pub struct QueueFamilyInfo {
    /// Family index on the adapter.
    pub index: u32,
    /// Raw family properties.
    pub properties: vk::QueueFamilyProperties,
    /// Priorities of the queues created from this family.
    pub priorities: Vec<f32>,
    /// Whether the family can present to the context surface.
    pub supports_present: bool,
}

impl QueueFamilyInfo {
    pub fn new(index: u32, properties: vk::QueueFamilyProperties, supports_present: bool) -> Self {
        Self {
            index,
            properties,
            priorities: vec![1.0],
            supports_present,
        }
    }

    pub fn flags(&self) -> vk::QueueFlags {
        self.properties.queue_flags
    }

    pub fn supports(&self, flags: vk::QueueFlags) -> bool {
        self.properties.queue_flags.contains(flags)
    }
}

/// Everything queried from one adapter during context initialization.
///
/// Built once and never mutated; queue-family choices are recorded on
/// [`AdapterSelection`](crate::selection::AdapterSelection) instead.
#[derive(Debug, Clone)]
pub struct DeviceCapabilitySnapshot {
    pub physical_device: vk::PhysicalDevice,
    pub vendor: GpuVendor,
    pub device_name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub driver_version: u32,
    pub limits: vk::PhysicalDeviceLimits,
    pub features: DeviceFeatures,
    pub extensions: HashSet<String>,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: Vec<QueueFamilyInfo>,
    pub surface: SurfaceSupport,
}

impl DeviceCapabilitySnapshot {
    /// Query every capability of `physical_device` against the context surface.
    ///
    /// # Safety
    /// The instance, its surface and the physical device must be valid.
    pub unsafe fn query(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        framebuffer_size: (u32, u32),
    ) -> Result<Self> {
        let raw = instance.raw();
        let properties = raw.get_physical_device_properties(physical_device);
        let features = raw.get_physical_device_features(physical_device);
        let memory_properties = raw.get_physical_device_memory_properties(physical_device);

        let extensions: HashSet<String> = raw
            .enumerate_device_extension_properties(physical_device)
            .context("vkEnumerateDeviceExtensionProperties")?
            .iter()
            .filter_map(|ext| {
                CStr::from_ptr(ext.extension_name.as_ptr())
                    .to_str()
                    .ok()
                    .map(String::from)
            })
            .collect();

        let device_name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        let queue_families = raw
            .get_physical_device_queue_family_properties(physical_device)
            .into_iter()
            .enumerate()
            .map(|(index, family)| {
                let index = index as u32;
                let supports_present = instance.supports_present(physical_device, index)?;
                Ok(QueueFamilyInfo::new(index, family, supports_present))
            })
            .collect::<Result<Vec<_>>>()?;

        let surface = SurfaceSupport::query(instance, physical_device, framebuffer_size)?;

        Ok(Self {
            physical_device,
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            device_type: properties.device_type,
            api_version: properties.api_version,
            driver_version: properties.driver_version,
            limits: properties.limits,
            features: DeviceFeatures::from_vk(&features),
            extensions,
            memory_properties,
            queue_families,
            surface,
        })
    }

    /// Whether the adapter exposes the named device extension.
    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }

    /// Device-local memory in MB.
    pub fn device_local_memory_mb(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum()
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn features_survive_vk_conversion() {
        let requested = DeviceFeatures::SAMPLER_ANISOTROPY
            | DeviceFeatures::FILL_MODE_NON_SOLID
            | DeviceFeatures::SHADER_INT16;
        let raw = requested.to_vk();

        assert_eq!(raw.sampler_anisotropy, vk::TRUE);
        assert_eq!(raw.fill_mode_non_solid, vk::TRUE);
        assert_eq!(raw.geometry_shader, vk::FALSE);
        assert_eq!(DeviceFeatures::from_vk(&raw), requested);
    }

    #[test]
    fn every_core_feature_has_a_flag() {
        let all = DeviceFeatures::all();
        assert_eq!(all.bits().count_ones(), 55);

        let raw = all.to_vk();
        assert_eq!(raw.shader_storage_image_write_without_format, vk::TRUE);
        assert_eq!(raw.sparse_binding, vk::TRUE);
        assert_eq!(raw.sparse_residency_image3_d, vk::TRUE);
        assert_eq!(raw.inherited_queries, vk::TRUE);
        assert_eq!(DeviceFeatures::from_vk(&raw), all);
    }

    #[test]
    fn queue_family_capabilities() {
        let properties = vk::QueueFamilyProperties {
            queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER,
            queue_count: 4,
            ..Default::default()
        };
        let family = QueueFamilyInfo::new(2, properties, true);

        assert!(family.supports(vk::QueueFlags::GRAPHICS));
        assert!(!family.supports(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE));
        assert_eq!(family.priorities, vec![1.0]);
    }
}
