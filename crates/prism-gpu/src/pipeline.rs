//! Reflection-driven pipeline creation.
//!
//! Shader stages are reflected from their SPIR-V words, merged into a
//! [`PipelineLayout`](crate::layout::PipelineLayout), and the Vulkan objects
//! (set layouts, pipeline layout, pipeline) are created from that merged
//! interface. Callers never spell out descriptor bindings or push-constant
//! ranges by hand.

use std::ffi::CString;

use ash::vk;
use prism_reflect::{ShaderStage, ShaderStageReflection};
use tracing::debug;

use crate::error::{GpuError, Result};
use crate::layout::{stage_flags, PipelineLayout, PipelineLayoutBuilder};
use crate::render_pass::RenderPassLayout;

/// Whether a pipeline binds to the graphics or compute bind point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

impl PipelineKind {
    pub fn bind_point(self) -> vk::PipelineBindPoint {
        match self {
            Self::Graphics => vk::PipelineBindPoint::GRAPHICS,
            Self::Compute => vk::PipelineBindPoint::COMPUTE,
        }
    }
}

/// Fixed-function configuration for a graphics pipeline. Shader interface
/// state comes from reflection and is not configurable here.
#[derive(Clone)]
pub struct GraphicsPipelineConfig {
    pub shaders: Vec<Vec<u32>>,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub patch_control_points: u32,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    pub samples: vk::SampleCountFlags,
}

impl Default for GraphicsPipelineConfig {
    fn default() -> Self {
        Self {
            shaders: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            patch_control_points: 3,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            depth_write: true,
            samples: vk::SampleCountFlags::TYPE_1,
        }
    }
}

/// Checks that are independent of any device: stage uniqueness and the
/// topology/tessellation pairing.
fn validate_graphics_stages(
    topology: vk::PrimitiveTopology,
    reflections: &[ShaderStageReflection],
) -> Result<()> {
    if reflections.is_empty() {
        return Err(GpuError::PipelineCreation(
            "graphics pipeline needs at least one shader stage".to_owned(),
        ));
    }

    let mut seen = vk::ShaderStageFlags::empty();
    for reflection in reflections {
        let stage = stage_flags(reflection.stage);
        if seen.contains(stage) {
            return Err(GpuError::PipelineCreation(format!(
                "stage {stage:?} supplied more than once"
            )));
        }
        seen |= stage;
    }

    let has_tessellation = seen.contains(vk::ShaderStageFlags::TESSELLATION_CONTROL)
        || seen.contains(vk::ShaderStageFlags::TESSELLATION_EVALUATION);
    if topology == vk::PrimitiveTopology::PATCH_LIST && !has_tessellation {
        return Err(GpuError::PipelineCreation(
            "patch list topology requires tessellation shader stages".to_owned(),
        ));
    }
    if has_tessellation && topology != vk::PrimitiveTopology::PATCH_LIST {
        return Err(GpuError::PipelineCreation(
            "tessellation shader stages require patch list topology".to_owned(),
        ));
    }

    Ok(())
}

fn entry_point(reflection: &ShaderStageReflection) -> Result<CString> {
    let name = reflection
        .entry_points
        .first()
        .ok_or(prism_reflect::ReflectError::MissingEntryPoint)?;
    CString::new(name.as_str())
        .map_err(|_| GpuError::ShaderModuleCreation(format!("entry point {name:?} contains NUL")))
}

/// A pipeline plus the Vulkan layout objects created from its reflected
/// shader interface.
pub struct Pipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    shader_layout: PipelineLayout,
    kind: PipelineKind,
}

impl Pipeline {
    /// Create a graphics pipeline for one subpass of a render pass.
    ///
    /// Each entry of `config.shaders` is reflected; the stage comes from the
    /// module's entry point, so callers never label binaries by hand.
    ///
    /// # Safety
    /// The device must be valid, the shader words must be valid SPIR-V, and
    /// `render_pass` must have been created from `pass_layout`.
    pub unsafe fn graphics(
        device: &ash::Device,
        config: &GraphicsPipelineConfig,
        render_pass: vk::RenderPass,
        pass_layout: &RenderPassLayout,
        subpass: u32,
    ) -> Result<Self> {
        let reflections = config
            .shaders
            .iter()
            .map(|words| ShaderStageReflection::from_words(words))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        validate_graphics_stages(config.topology, &reflections)?;

        let mut builder = PipelineLayoutBuilder::new(PipelineKind::Graphics);
        for reflection in &reflections {
            builder.add_stage(reflection)?;
        }
        let shader_layout = builder.build()?;

        let set_layouts = shader_layout.create_set_layouts(device)?;
        let layout = shader_layout.create_pipeline_layout(device, &set_layouts)?;

        let entry_names = reflections
            .iter()
            .map(entry_point)
            .collect::<Result<Vec<_>>>()?;

        let mut modules = Vec::with_capacity(config.shaders.len());
        for words in &config.shaders {
            let module_info = vk::ShaderModuleCreateInfo::default().code(words);
            let module = device
                .create_shader_module(&module_info, None)
                .map_err(|e| GpuError::ShaderModuleCreation(e.to_string()))?;
            modules.push(module);
        }

        let stages: Vec<vk::PipelineShaderStageCreateInfo<'_>> = reflections
            .iter()
            .zip(&modules)
            .zip(&entry_names)
            .map(|((reflection, module), name)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(stage_flags(reflection.stage))
                    .module(*module)
                    .name(name)
            })
            .collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&config.vertex_bindings)
            .vertex_attribute_descriptions(&config.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(config.topology)
            .primitive_restart_enable(false);

        let tessellation = vk::PipelineTessellationStateCreateInfo::default()
            .patch_control_points(config.patch_control_points);

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
            .rasterization_samples(config.samples)
            .sample_shading_enable(false);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(config.depth_test)
            .depth_write_enable(config.depth_write)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        // One blend attachment per color reference of the target subpass.
        let color_count = pass_layout
            .subpasses()
            .get(subpass as usize)
            .map_or(0, |sub| sub.color.len());
        let color_blend_attachments: Vec<_> = (0..color_count)
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(false)
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
            })
            .collect();
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [
            vk::DynamicState::VIEWPORT,
            vk::DynamicState::SCISSOR,
            vk::DynamicState::LINE_WIDTH,
        ];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let mut pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(subpass);
        if config.topology == vk::PrimitiveTopology::PATCH_LIST {
            pipeline_info = pipeline_info.tessellation_state(&tessellation);
        }

        let pipelines = device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_pipelines, e)| GpuError::PipelineCreation(e.to_string()));

        for module in modules {
            device.destroy_shader_module(module, None);
        }
        let pipelines = match pipelines {
            Ok(pipelines) => pipelines,
            Err(e) => {
                device.destroy_pipeline_layout(layout, None);
                for set_layout in set_layouts {
                    device.destroy_descriptor_set_layout(set_layout, None);
                }
                return Err(e);
            }
        };

        debug!(
            stages = shader_layout.stages().as_raw(),
            subpass, "created graphics pipeline"
        );

        Ok(Self {
            pipeline: pipelines[0],
            layout,
            set_layouts,
            shader_layout,
            kind: PipelineKind::Graphics,
        })
    }

    /// Create a compute pipeline from a single reflected compute shader.
    ///
    /// # Safety
    /// The device must be valid and the shader words must be valid SPIR-V.
    pub unsafe fn compute(device: &ash::Device, shader: &[u32]) -> Result<Self> {
        let reflection = ShaderStageReflection::from_words(shader)?;
        if reflection.stage != ShaderStage::Compute {
            return Err(GpuError::PipelineCreation(format!(
                "expected a compute shader, reflected {:?}",
                reflection.stage
            )));
        }

        let mut builder = PipelineLayoutBuilder::new(PipelineKind::Compute);
        builder.add_stage(&reflection)?;
        let shader_layout = builder.build()?;

        let set_layouts = shader_layout.create_set_layouts(device)?;
        let layout = shader_layout.create_pipeline_layout(device, &set_layouts)?;

        let module_info = vk::ShaderModuleCreateInfo::default().code(shader);
        let module = device
            .create_shader_module(&module_info, None)
            .map_err(|e| GpuError::ShaderModuleCreation(e.to_string()))?;

        let entry_name = entry_point(&reflection)?;
        let stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(&entry_name);

        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage_info)
            .layout(layout);

        let pipelines = device
            .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_pipelines, e)| GpuError::PipelineCreation(e.to_string()));

        device.destroy_shader_module(module, None);
        let pipelines = match pipelines {
            Ok(pipelines) => pipelines,
            Err(e) => {
                device.destroy_pipeline_layout(layout, None);
                for set_layout in set_layouts {
                    device.destroy_descriptor_set_layout(set_layout, None);
                }
                return Err(e);
            }
        };

        Ok(Self {
            pipeline: pipelines[0],
            layout,
            set_layouts,
            shader_layout,
            kind: PipelineKind::Compute,
        })
    }

    /// Get the raw pipeline handle.
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// The Vulkan pipeline layout handle.
    pub fn layout_handle(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Descriptor set layouts, one per populated set in ascending order.
    pub fn set_layouts(&self) -> &[vk::DescriptorSetLayout] {
        &self.set_layouts
    }

    /// The merged shader interface this pipeline was created from.
    pub fn shader_layout(&self) -> &PipelineLayout {
        &self.shader_layout
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.kind.bind_point()
    }

    /// Destroy the pipeline and its layout objects.
    ///
    /// # Safety
    /// The device must be valid and the pipeline must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.layout, None);
        for set_layout in &self.set_layouts {
            device.destroy_descriptor_set_layout(*set_layout, None);
        }
    }
}
