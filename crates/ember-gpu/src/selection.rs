//! Adapter and queue-family selection.
//!
//! Matching is first-fit: multi-adapter device groups are tried in enumeration
//! order, then single adapters in enumeration order, and the first candidate
//! that satisfies every requirement wins. Nothing here touches the driver, so
//! the whole policy runs against plain snapshots.

use crate::capabilities::{DeviceCapabilitySnapshot, DeviceFeatures, QueueFamilyInfo};
use ash::vk;
use std::ffi::CStr;

/// Each single-bit capability in `flags`, lowest bit first.
fn capability_bits(flags: vk::QueueFlags) -> impl Iterator<Item = vk::QueueFlags> {
    let raw = flags.as_raw();
    (0..u32::BITS)
        .map(|bit| 1u32 << bit)
        .filter(move |mask| raw & mask != 0)
        .map(vk::QueueFlags::from_raw)
}

/// What the application needs from a logical device.
#[derive(Debug, Clone)]
pub struct DeviceRequirements {
    /// Minimum adapter API version.
    pub min_api_version: u32,
    /// Core features that must be supported (and are enabled).
    pub features: DeviceFeatures,
    /// Device extensions that must be present (and are enabled).
    pub extensions: Vec<String>,
    /// Each flag must be exposed by at least one queue family.
    pub queue_capabilities: vk::QueueFlags,
}

impl Default for DeviceRequirements {
    fn default() -> Self {
        Self {
            min_api_version: vk::API_VERSION_1_1,
            features: DeviceFeatures::empty(),
            extensions: vec![extension_name(ash::khr::swapchain::NAME)],
            queue_capabilities: vk::QueueFlags::GRAPHICS,
        }
    }
}

impl DeviceRequirements {
    /// Create the default requirements (Vulkan 1.1, swapchain, graphics queue).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum API version.
    pub fn min_api_version(mut self, version: u32) -> Self {
        self.min_api_version = version;
        self
    }

    /// Require additional core features.
    pub fn features(mut self, features: DeviceFeatures) -> Self {
        self.features |= features;
        self
    }

    /// Require a device extension.
    pub fn extension(mut self, name: &CStr) -> Self {
        let name = extension_name(name);
        if !self.extensions.contains(&name) {
            self.extensions.push(name);
        }
        self
    }

    /// Require queue capabilities.
    pub fn queue_capabilities(mut self, flags: vk::QueueFlags) -> Self {
        self.queue_capabilities |= flags;
        self
    }
}

fn extension_name(name: &CStr) -> String {
    name.to_string_lossy().into_owned()
}

/// A device group as enumerated by the instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceGroupInfo {
    /// Indices into the context's adapter list, in group order.
    pub adapters: Vec<usize>,
}

/// Queue families chosen for a logical device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueFamilySelection {
    pub graphics: u32,
    pub present: u32,
    /// Families added for requested capabilities the primary pair lacks.
    pub additional: Vec<u32>,
}

impl QueueFamilySelection {
    /// Distinct family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = vec![self.graphics];
        for &family in std::iter::once(&self.present).chain(&self.additional) {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }

    /// Whether graphics and present share one family.
    pub fn shares_present(&self) -> bool {
        self.graphics == self.present
    }
}

/// Result of matching requirements against the enumerated adapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterSelection {
    /// Index of the adapter whose snapshot drives device creation.
    pub adapter: usize,
    /// Every adapter in the chosen device group (just `adapter` when single).
    pub group: Vec<usize>,
    pub queue_families: QueueFamilySelection,
}

impl AdapterSelection {
    /// Whether the logical device spans several physical devices.
    pub fn is_device_group(&self) -> bool {
        self.group.len() > 1
    }
}

/// Why an adapter was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    ApiVersion { required: u32, found: u32 },
    Features(DeviceFeatures),
    Extensions(Vec<String>),
    QueueCapabilities(vk::QueueFlags),
    NoPresentQueue,
}

/// Choose queue families per the graphics/present/additional policy.
///
/// Prefers one family that does both graphics and presentation; otherwise the
/// first graphics family and the first presenting family. Each requested
/// capability not yet covered adds the first family exposing it.
pub fn select_queue_families(
    families: &[QueueFamilyInfo],
    required: vk::QueueFlags,
) -> Option<QueueFamilySelection> {
    let combined = families
        .iter()
        .find(|f| f.supports(vk::QueueFlags::GRAPHICS) && f.supports_present);

    let (graphics, present) = match combined {
        Some(family) => (family.index, family.index),
        None => {
            let graphics = families
                .iter()
                .find(|f| f.supports(vk::QueueFlags::GRAPHICS))?;
            let present = families.iter().find(|f| f.supports_present)?;
            (graphics.index, present.index)
        }
    };

    let mut chosen = vec![graphics];
    if present != graphics {
        chosen.push(present);
    }

    let mut additional = Vec::new();
    for capability in capability_bits(required) {
        let covered = families
            .iter()
            .filter(|f| chosen.contains(&f.index))
            .any(|f| f.supports(capability));
        if covered {
            continue;
        }

        let family = families.iter().find(|f| f.supports(capability))?;
        chosen.push(family.index);
        additional.push(family.index);
    }

    Some(QueueFamilySelection {
        graphics,
        present,
        additional,
    })
}

/// Check one adapter against the requirements.
pub fn evaluate_adapter(
    snapshot: &DeviceCapabilitySnapshot,
    requirements: &DeviceRequirements,
) -> Result<QueueFamilySelection, Mismatch> {
    if snapshot.api_version < requirements.min_api_version {
        return Err(Mismatch::ApiVersion {
            required: requirements.min_api_version,
            found: snapshot.api_version,
        });
    }

    let missing_features = requirements.features - snapshot.features;
    if !missing_features.is_empty() {
        return Err(Mismatch::Features(missing_features));
    }

    let missing_extensions: Vec<String> = requirements
        .extensions
        .iter()
        .filter(|name| !snapshot.has_extension(name))
        .cloned()
        .collect();
    if !missing_extensions.is_empty() {
        return Err(Mismatch::Extensions(missing_extensions));
    }

    let exposed = snapshot
        .queue_families
        .iter()
        .fold(vk::QueueFlags::empty(), |acc, f| acc | f.flags());
    let missing_queues = capability_bits(requirements.queue_capabilities)
        .filter(|&cap| !exposed.contains(cap))
        .fold(vk::QueueFlags::empty(), |acc, cap| acc | cap);
    if !missing_queues.is_empty() {
        return Err(Mismatch::QueueCapabilities(missing_queues));
    }

    select_queue_families(&snapshot.queue_families, requirements.queue_capabilities)
        .ok_or(Mismatch::NoPresentQueue)
}

/// First-fit adapter selection.
///
/// Device groups with more than one member are considered first; every member
/// must satisfy the requirements and the first member drives queue selection.
pub fn select_adapter(
    adapters: &[DeviceCapabilitySnapshot],
    groups: &[DeviceGroupInfo],
    requirements: &DeviceRequirements,
) -> Option<AdapterSelection> {
    for group in groups.iter().filter(|g| g.adapters.len() > 1) {
        let lead = group.adapters[0];
        let Some(queue_families) = adapters
            .get(lead)
            .and_then(|snapshot| evaluate_adapter(snapshot, requirements).ok())
        else {
            continue;
        };

        let all_match = group.adapters.iter().all(|&index| {
            adapters
                .get(index)
                .is_some_and(|snapshot| evaluate_adapter(snapshot, requirements).is_ok())
        });
        if all_match {
            return Some(AdapterSelection {
                adapter: lead,
                group: group.adapters.clone(),
                queue_families,
            });
        }
    }

    for (index, snapshot) in adapters.iter().enumerate() {
        match evaluate_adapter(snapshot, requirements) {
            Ok(queue_families) => {
                return Some(AdapterSelection {
                    adapter: index,
                    group: vec![index],
                    queue_families,
                });
            }
            Err(reason) => {
                tracing::debug!("Rejected adapter {}: {:?}", snapshot.device_name, reason);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::GpuVendor;
    use crate::surface::SurfaceSupport;
    use ash::vk::Handle;

    fn family(index: u32, flags: vk::QueueFlags, present: bool) -> QueueFamilyInfo {
        let properties = vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        };
        QueueFamilyInfo::new(index, properties, present)
    }

    fn adapter(
        name: &str,
        api_version: u32,
        extensions: &[&str],
        families: Vec<QueueFamilyInfo>,
    ) -> DeviceCapabilitySnapshot {
        DeviceCapabilitySnapshot {
            physical_device: vk::PhysicalDevice::from_raw(name.len() as u64),
            vendor: GpuVendor::Other(0),
            device_name: name.to_string(),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            api_version,
            driver_version: 0,
            limits: vk::PhysicalDeviceLimits::default(),
            features: DeviceFeatures::SAMPLER_ANISOTROPY,
            extensions: extensions.iter().map(|s| (*s).to_string()).collect(),
            memory_properties: vk::PhysicalDeviceMemoryProperties::default(),
            queue_families: families,
            surface: SurfaceSupport::default(),
        }
    }

    const SWAPCHAIN: &str = "VK_KHR_swapchain";

    fn graphics_present() -> Vec<QueueFamilyInfo> {
        vec![family(0, vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, true)]
    }

    #[test]
    fn single_adapter_shares_graphics_and_present() {
        let adapters = [adapter("gpu", vk::API_VERSION_1_1, &[SWAPCHAIN], graphics_present())];
        let selection = select_adapter(&adapters, &[], &DeviceRequirements::new()).unwrap();

        assert_eq!(selection.adapter, 0);
        assert!(selection.queue_families.shares_present());
        assert_eq!(selection.queue_families.unique_families(), vec![0]);
        assert!(!selection.is_device_group());
    }

    #[test]
    fn first_adapter_without_swapchain_is_skipped() {
        let adapters = [
            adapter("first", vk::API_VERSION_1_3, &[], graphics_present()),
            adapter("second", vk::API_VERSION_1_1, &[SWAPCHAIN], graphics_present()),
        ];
        let selection = select_adapter(&adapters, &[], &DeviceRequirements::new()).unwrap();
        assert_eq!(selection.adapter, 1);
    }

    #[test]
    fn first_fit_not_best_fit() {
        let adapters = [
            adapter("older", vk::API_VERSION_1_1, &[SWAPCHAIN], graphics_present()),
            adapter("newer", vk::API_VERSION_1_3, &[SWAPCHAIN], graphics_present()),
        ];
        let selection = select_adapter(&adapters, &[], &DeviceRequirements::new()).unwrap();
        assert_eq!(selection.adapter, 0);
    }

    #[test]
    fn api_version_and_features_filter() {
        let adapters = [
            adapter("old", vk::API_VERSION_1_0, &[SWAPCHAIN], graphics_present()),
            adapter("ok", vk::API_VERSION_1_2, &[SWAPCHAIN], graphics_present()),
        ];
        let requirements = DeviceRequirements::new().features(DeviceFeatures::SAMPLER_ANISOTROPY);
        assert_eq!(
            select_adapter(&adapters, &[], &requirements).map(|s| s.adapter),
            Some(1)
        );

        let requirements = requirements.features(DeviceFeatures::GEOMETRY_SHADER);
        assert_eq!(select_adapter(&adapters, &[], &requirements), None);
        assert_eq!(
            evaluate_adapter(&adapters[1], &requirements),
            Err(Mismatch::Features(DeviceFeatures::GEOMETRY_SHADER))
        );
    }

    #[test]
    fn missing_queue_capability_rejects() {
        let adapters = [adapter("gpu", vk::API_VERSION_1_1, &[SWAPCHAIN], graphics_present())];
        let requirements = DeviceRequirements::new().queue_capabilities(vk::QueueFlags::COMPUTE);

        assert_eq!(
            evaluate_adapter(&adapters[0], &requirements),
            Err(Mismatch::QueueCapabilities(vk::QueueFlags::COMPUTE))
        );
    }

    #[test]
    fn capabilities_outside_the_core_set_are_checked() {
        let adapters = [adapter("gpu", vk::API_VERSION_1_1, &[SWAPCHAIN], graphics_present())];
        let requirements =
            DeviceRequirements::new().queue_capabilities(vk::QueueFlags::VIDEO_DECODE_KHR);

        assert_eq!(
            evaluate_adapter(&adapters[0], &requirements),
            Err(Mismatch::QueueCapabilities(vk::QueueFlags::VIDEO_DECODE_KHR))
        );
        assert_eq!(select_adapter(&adapters, &[], &requirements), None);
    }

    #[test]
    fn extension_queue_capability_gets_its_own_family() {
        let families = vec![
            family(0, vk::QueueFlags::GRAPHICS, true),
            family(1, vk::QueueFlags::VIDEO_DECODE_KHR | vk::QueueFlags::TRANSFER, false),
        ];
        let selection = select_queue_families(
            &families,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::VIDEO_DECODE_KHR,
        )
        .unwrap();

        assert_eq!(selection.graphics, 0);
        assert_eq!(selection.additional, vec![1]);
    }

    #[test]
    fn no_presenting_family_rejects() {
        let families = vec![family(0, vk::QueueFlags::GRAPHICS, false)];
        let adapters = [adapter("gpu", vk::API_VERSION_1_1, &[SWAPCHAIN], families)];

        assert_eq!(
            evaluate_adapter(&adapters[0], &DeviceRequirements::new()),
            Err(Mismatch::NoPresentQueue)
        );
    }

    #[test]
    fn device_groups_take_precedence() {
        let adapters = [
            adapter("solo", vk::API_VERSION_1_1, &[SWAPCHAIN], graphics_present()),
            adapter("linked-a", vk::API_VERSION_1_1, &[SWAPCHAIN], graphics_present()),
            adapter("linked-b", vk::API_VERSION_1_1, &[SWAPCHAIN], graphics_present()),
        ];
        let groups = [
            DeviceGroupInfo { adapters: vec![0] },
            DeviceGroupInfo {
                adapters: vec![1, 2],
            },
        ];

        let selection = select_adapter(&adapters, &groups, &DeviceRequirements::new()).unwrap();
        assert_eq!(selection.adapter, 1);
        assert_eq!(selection.group, vec![1, 2]);
        assert!(selection.is_device_group());
    }

    #[test]
    fn group_with_failing_member_falls_back_to_single() {
        let adapters = [
            adapter("solo", vk::API_VERSION_1_1, &[SWAPCHAIN], graphics_present()),
            adapter("linked-a", vk::API_VERSION_1_1, &[SWAPCHAIN], graphics_present()),
            adapter("linked-b", vk::API_VERSION_1_1, &[], graphics_present()),
        ];
        let groups = [DeviceGroupInfo {
            adapters: vec![1, 2],
        }];

        let selection = select_adapter(&adapters, &groups, &DeviceRequirements::new()).unwrap();
        assert_eq!(selection.adapter, 0);
        assert_eq!(selection.group, vec![0]);
    }

    #[test]
    fn split_graphics_and_present_families() {
        let families = vec![
            family(0, vk::QueueFlags::GRAPHICS, false),
            family(1, vk::QueueFlags::TRANSFER, true),
            family(2, vk::QueueFlags::GRAPHICS, false),
        ];
        let selection = select_queue_families(&families, vk::QueueFlags::GRAPHICS).unwrap();

        assert_eq!(selection.graphics, 0);
        assert_eq!(selection.present, 1);
        assert!(selection.additional.is_empty());
        assert_eq!(selection.unique_families(), vec![0, 1]);
    }

    #[test]
    fn combined_family_preferred_over_earlier_split() {
        let families = vec![
            family(0, vk::QueueFlags::GRAPHICS, false),
            family(1, vk::QueueFlags::COMPUTE, true),
            family(2, vk::QueueFlags::GRAPHICS, true),
        ];
        let selection = select_queue_families(&families, vk::QueueFlags::GRAPHICS).unwrap();

        assert_eq!(selection.graphics, 2);
        assert_eq!(selection.present, 2);
    }

    #[test]
    fn covered_capabilities_add_nothing() {
        let families = vec![family(
            0,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            true,
        )];
        let required = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
        let selection = select_queue_families(&families, required).unwrap();

        assert!(selection.additional.is_empty());
        assert_eq!(selection.unique_families(), vec![0]);
    }

    #[test]
    fn one_family_per_uncovered_capability() {
        let families = vec![
            family(0, vk::QueueFlags::GRAPHICS, true),
            family(1, vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, false),
            family(2, vk::QueueFlags::COMPUTE, false),
            family(3, vk::QueueFlags::SPARSE_BINDING, false),
        ];
        let required = vk::QueueFlags::GRAPHICS
            | vk::QueueFlags::COMPUTE
            | vk::QueueFlags::TRANSFER
            | vk::QueueFlags::SPARSE_BINDING;
        let selection = select_queue_families(&families, required).unwrap();

        // Family 1 covers both compute and transfer.
        assert_eq!(selection.additional, vec![1, 3]);
        assert_eq!(selection.unique_families(), vec![0, 1, 3]);
    }

    #[test]
    fn requirements_builder_deduplicates_extensions() {
        let requirements = DeviceRequirements::new()
            .extension(ash::khr::swapchain::NAME)
            .extension(c"VK_KHR_maintenance1");

        assert_eq!(requirements.extensions, vec![SWAPCHAIN, "VK_KHR_maintenance1"]);
    }
}
