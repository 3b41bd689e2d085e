//! Shader modules, render passes, framebuffers and graphics pipelines.

use crate::device::LogicalDevice;
use crate::error::{GpuError, Result, VkResultExt};
use crate::object::{Framebuffer, ImageView, Pipeline, PipelineLayout, RenderPass, ShaderModule};
use ash::vk;
use std::sync::Arc;

/// Graphics pipeline configuration.
#[derive(Debug, Clone)]
pub struct GraphicsPipelineConfig {
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    pub alpha_blend: bool,
    /// Number of color attachments in the target subpass.
    pub color_attachment_count: u32,
    pub subpass: u32,
}

impl Default for GraphicsPipelineConfig {
    fn default() -> Self {
        Self {
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            depth_write: true,
            alpha_blend: false,
            color_attachment_count: 1,
            subpass: 0,
        }
    }
}

/// A shader module paired with the stage it runs in.
#[derive(Clone, Copy)]
pub struct ShaderStage<'a> {
    pub stage: vk::ShaderStageFlags,
    pub module: &'a ShaderModule,
}

/// Blend state for one color attachment.
pub fn color_blend_attachment(alpha_blend: bool) -> vk::PipelineColorBlendAttachmentState {
    let state = vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA);

    if alpha_blend {
        state
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
    } else {
        state.blend_enable(false)
    }
}

/// Attachments for a single-subpass pass rendering into a presentable image.
///
/// The color attachment is cleared and ends in PRESENT_SRC. The depth
/// attachment, when present, is cleared and discarded.
pub fn swapchain_attachments(
    color_format: vk::Format,
    depth_format: Option<vk::Format>,
) -> Vec<vk::AttachmentDescription> {
    let mut attachments = vec![vk::AttachmentDescription::default()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)];

    if let Some(depth_format) = depth_format {
        attachments.push(
            vk::AttachmentDescription::default()
                .format(depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        );
    }

    attachments
}

impl ShaderModule {
    /// Create a module from SPIR-V words.
    pub(crate) fn new(device: &Arc<LogicalDevice>, code: &[u32]) -> Result<Self> {
        if code.is_empty() {
            return Err(GpuError::illegal_argument("shader code is empty"));
        }
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        let raw = unsafe {
            device
                .raw()
                .create_shader_module(&create_info, None)
                .context("vkCreateShaderModule")?
        };
        Ok(Self::from_raw(device, raw))
    }
}

impl PipelineLayout {
    pub(crate) fn new(
        device: &Arc<LogicalDevice>,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<Self> {
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let raw = unsafe {
            device
                .raw()
                .create_pipeline_layout(&layout_info, None)
                .context("vkCreatePipelineLayout")?
        };
        Ok(Self::from_raw(device, raw))
    }
}

impl RenderPass {
    pub(crate) fn new(
        device: &Arc<LogicalDevice>,
        create_info: &vk::RenderPassCreateInfo<'_>,
    ) -> Result<Self> {
        let raw = unsafe {
            device
                .raw()
                .create_render_pass(create_info, None)
                .context("vkCreateRenderPass")?
        };
        Ok(Self::from_raw(device, raw))
    }

    /// Single-subpass pass over [`swapchain_attachments`].
    pub(crate) fn for_swapchain(
        device: &Arc<LogicalDevice>,
        color_format: vk::Format,
        depth_format: Option<vk::Format>,
    ) -> Result<Self> {
        let attachments = swapchain_attachments(color_format, depth_format);

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if depth_format.is_some() {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }

        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .dst_stage_mask(stages)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            );

        let subpasses = [subpass];
        let dependencies = [dependency];
        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        Self::new(device, &create_info)
    }
}

impl Framebuffer {
    pub(crate) fn new(
        device: &Arc<LogicalDevice>,
        render_pass: &RenderPass,
        attachments: &[&ImageView],
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let views: Vec<vk::ImageView> = attachments.iter().map(|v| v.handle()).collect();
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.handle())
            .attachments(&views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let raw = unsafe {
            device
                .raw()
                .create_framebuffer(&create_info, None)
                .context("vkCreateFramebuffer")?
        };
        Ok(Self::from_raw(device, raw))
    }
}

impl Pipeline {
    /// Create a graphics pipeline for `render_pass` with dynamic viewport and scissor.
    pub(crate) fn graphics(
        device: &Arc<LogicalDevice>,
        config: &GraphicsPipelineConfig,
        stages: &[ShaderStage<'_>],
        layout: &PipelineLayout,
        render_pass: &RenderPass,
    ) -> Result<Self> {
        if stages.is_empty() {
            return Err(GpuError::illegal_argument(
                "graphics pipeline needs at least one shader stage",
            ));
        }

        let shader_stages: Vec<_> = stages
            .iter()
            .map(|s| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(s.stage)
                    .module(s.module.handle())
                    .name(c"main")
            })
            .collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&config.vertex_bindings)
            .vertex_attribute_descriptions(&config.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(config.topology)
            .primitive_restart_enable(false);

        // Viewport and scissor are dynamic
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(config.polygon_mode)
            .cull_mode(config.cull_mode)
            .front_face(config.front_face)
            .depth_bias_enable(false)
            .line_width(1.0);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(config.depth_test)
            .depth_write_enable(config.depth_write)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments =
            vec![color_blend_attachment(config.alpha_blend); config.color_attachment_count as usize];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .render_pass(render_pass.handle())
            .subpass(config.subpass);

        let pipelines = unsafe {
            device
                .raw()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, e)| e)
                .context("vkCreateGraphicsPipelines")?
        };

        let raw = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| GpuError::illegal_state("driver returned no pipeline"))?;
        Ok(Self::from_raw(device, raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_attachment_ends_presentable() {
        let attachments = swapchain_attachments(vk::Format::B8G8R8A8_UNORM, None);
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachments[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn depth_attachment_is_appended() {
        let attachments =
            swapchain_attachments(vk::Format::B8G8R8A8_UNORM, Some(vk::Format::D32_SFLOAT));
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[1].format, vk::Format::D32_SFLOAT);
        assert_eq!(
            attachments[1].final_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn opaque_blend_is_disabled() {
        let state = color_blend_attachment(false);
        assert_eq!(state.blend_enable, vk::FALSE);
        assert_eq!(state.color_write_mask, vk::ColorComponentFlags::RGBA);

        let state = color_blend_attachment(true);
        assert_eq!(state.blend_enable, vk::TRUE);
        assert_eq!(state.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
    }
}
