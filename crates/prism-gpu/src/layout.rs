//! Cross-stage aggregation of reflected shader interfaces into a pipeline
//! layout.
//!
//! Each shader stage contributes its push-constant members and descriptor
//! bindings; the builder merges them by name and by (set, binding), ORing
//! stage flags together where the same resource is visible from several
//! stages.

use std::collections::BTreeMap;

use ash::vk;
use prism_reflect::{DescriptorKind, ShaderStage, ShaderStageReflection};
use tracing::debug;

use crate::error::{GpuError, Result};
use crate::pipeline::PipelineKind;

/// Map a reflected stage onto its Vulkan stage flag.
pub fn stage_flags(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::TessellationControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
        ShaderStage::TessellationEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

/// Map a reflected descriptor kind onto its Vulkan descriptor type.
pub fn descriptor_type(kind: DescriptorKind) -> vk::DescriptorType {
    match kind {
        DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        DescriptorKind::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorKind::Sampler => vk::DescriptorType::SAMPLER,
        DescriptorKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        DescriptorKind::InputAttachment => vk::DescriptorType::INPUT_ATTACHMENT,
    }
}

/// One binding in a descriptor set layout, with the accumulated set of stages
/// that reference it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub ty: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

/// The merged shader interface of a pipeline: named push-constant ranges and
/// per-set descriptor bindings. Built once at pipeline-construction time and
/// immutable afterward.
#[derive(Debug, Clone, Default)]
pub struct PipelineLayout {
    push_constants: BTreeMap<String, vk::PushConstantRange>,
    sets: BTreeMap<u32, Vec<DescriptorBinding>>,
    stages: vk::ShaderStageFlags,
}

impl PipelineLayout {
    /// Look up a push-constant range by the name it carried in the shader.
    pub fn push_constant_range(&self, name: &str) -> Result<vk::PushConstantRange> {
        self.push_constants
            .get(name)
            .copied()
            .ok_or_else(|| GpuError::UnknownPushConstant(name.to_owned()))
    }

    /// All push-constant ranges, in name order.
    pub fn push_constant_ranges(&self) -> Vec<vk::PushConstantRange> {
        self.push_constants.values().copied().collect()
    }

    /// Populated set indices, ascending.
    pub fn set_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.sets.keys().copied()
    }

    /// Bindings of one descriptor set, in the order stages declared them.
    pub fn bindings(&self, set: u32) -> Option<&[DescriptorBinding]> {
        self.sets.get(&set).map(Vec::as_slice)
    }

    /// The union of stage flags across all attached shader stages.
    pub fn stages(&self) -> vk::ShaderStageFlags {
        self.stages
    }

    /// Whether a particular stage was attached (e.g. "does this pipeline have
    /// a geometry shader").
    pub fn has_stage(&self, stage: vk::ShaderStageFlags) -> bool {
        self.stages.contains(stage)
    }

    /// Pool sizes large enough for one allocation of the given set, or `None`
    /// if the set index is unpopulated.
    pub fn pool_sizes_for_set(&self, set: u32) -> Option<Vec<vk::DescriptorPoolSize>> {
        self.sets.get(&set).map(|bindings| {
            bindings
                .iter()
                .map(|binding| vk::DescriptorPoolSize {
                    ty: binding.ty,
                    descriptor_count: binding.count,
                })
                .collect()
        })
    }

    /// Create one `vk::DescriptorSetLayout` per populated set, in ascending
    /// set-index order.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn create_set_layouts(
        &self,
        device: &ash::Device,
    ) -> Result<Vec<vk::DescriptorSetLayout>> {
        let mut layouts = Vec::with_capacity(self.sets.len());
        for bindings in self.sets.values() {
            let vk_bindings: Vec<vk::DescriptorSetLayoutBinding<'_>> = bindings
                .iter()
                .map(|binding| {
                    vk::DescriptorSetLayoutBinding::default()
                        .binding(binding.binding)
                        .descriptor_type(binding.ty)
                        .descriptor_count(binding.count)
                        .stage_flags(binding.stages)
                })
                .collect();

            let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
            let layout = device.create_descriptor_set_layout(&layout_info, None)?;
            layouts.push(layout);
        }
        Ok(layouts)
    }

    /// Create the `vk::PipelineLayout` from previously created set layouts
    /// plus the aggregated push-constant ranges.
    ///
    /// # Safety
    /// The device must be valid and `set_layouts` must come from
    /// [`Self::create_set_layouts`] on the same layout.
    pub unsafe fn create_pipeline_layout(
        &self,
        device: &ash::Device,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> Result<vk::PipelineLayout> {
        let ranges = self.push_constant_ranges();
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(&ranges);

        let layout = device.create_pipeline_layout(&layout_info, None)?;
        Ok(layout)
    }
}

/// Accumulates per-stage reflections into a [`PipelineLayout`].
#[derive(Debug)]
pub struct PipelineLayoutBuilder {
    kind: PipelineKind,
    layout: PipelineLayout,
}

impl PipelineLayoutBuilder {
    pub fn new(kind: PipelineKind) -> Self {
        Self {
            kind,
            layout: PipelineLayout::default(),
        }
    }

    /// Merge one stage's reflected interface into the accumulating layout.
    ///
    /// A push constant already present under the same name must agree on
    /// (offset, size); its stage flags are then ORed in. A disagreement is a
    /// configuration error. Descriptors already present at the same
    /// (set, binding) get the new stage's flag ORed in.
    pub fn add_stage(&mut self, reflection: &ShaderStageReflection) -> Result<&mut Self> {
        let stage = stage_flags(reflection.stage);
        self.layout.stages |= stage;

        for push_constant in &reflection.push_constants {
            match self.layout.push_constants.get_mut(&push_constant.name) {
                None => {
                    self.layout.push_constants.insert(
                        push_constant.name.clone(),
                        vk::PushConstantRange {
                            stage_flags: stage,
                            offset: push_constant.offset,
                            size: push_constant.size,
                        },
                    );
                }
                Some(existing)
                    if existing.offset == push_constant.offset
                        && existing.size == push_constant.size =>
                {
                    existing.stage_flags |= stage;
                }
                Some(existing) => {
                    return Err(GpuError::PushConstantNameCollision {
                        name: push_constant.name.clone(),
                        existing_offset: existing.offset,
                        existing_size: existing.size,
                        new_offset: push_constant.offset,
                        new_size: push_constant.size,
                    });
                }
            }
        }

        for descriptor in &reflection.descriptors {
            let bindings = self.layout.sets.entry(descriptor.set).or_default();
            match bindings
                .iter_mut()
                .find(|binding| binding.binding == descriptor.binding)
            {
                Some(existing) => existing.stages |= stage,
                None => bindings.push(DescriptorBinding {
                    binding: descriptor.binding,
                    ty: descriptor_type(descriptor.kind),
                    count: descriptor.count,
                    stages: stage,
                }),
            }
        }

        Ok(self)
    }

    /// Finish the merge. Graphics layouts require a vertex stage; compute
    /// layouts require the compute stage.
    pub fn build(self) -> Result<PipelineLayout> {
        match self.kind {
            PipelineKind::Graphics => {
                if !self.layout.has_stage(vk::ShaderStageFlags::VERTEX) {
                    return Err(GpuError::MissingVertexStage);
                }
            }
            PipelineKind::Compute => {
                if !self.layout.has_stage(vk::ShaderStageFlags::COMPUTE) {
                    return Err(GpuError::PipelineCreation(
                        "compute pipeline built without a compute stage".to_owned(),
                    ));
                }
            }
        }

        debug!(
            sets = self.layout.sets.len(),
            push_constants = self.layout.push_constants.len(),
            stages = ?self.layout.stages,
            "built pipeline layout"
        );

        Ok(self.layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_reflect::{Descriptor, PushConstant};

    fn reflection(stage: ShaderStage) -> ShaderStageReflection {
        ShaderStageReflection {
            stage,
            entry_points: vec!["main".to_owned()],
            push_constants: Vec::new(),
            descriptors: Vec::new(),
        }
    }

    fn push_constant(name: &str, offset: u32, size: u32) -> PushConstant {
        PushConstant {
            name: name.to_owned(),
            offset,
            size,
        }
    }

    fn descriptor(set: u32, binding: u32, kind: DescriptorKind) -> Descriptor {
        Descriptor {
            set,
            binding,
            kind,
            count: 1,
            name: String::new(),
        }
    }

    #[test]
    fn merges_identical_push_constants_across_stages() {
        let mut vertex = reflection(ShaderStage::Vertex);
        vertex.push_constants.push(push_constant("time", 0, 4));
        let mut fragment = reflection(ShaderStage::Fragment);
        fragment.push_constants.push(push_constant("time", 0, 4));

        let mut builder = PipelineLayoutBuilder::new(PipelineKind::Graphics);
        builder.add_stage(&vertex).unwrap();
        builder.add_stage(&fragment).unwrap();
        let layout = builder.build().unwrap();

        let ranges = layout.push_constant_ranges();
        assert_eq!(ranges.len(), 1);
        assert_eq!(
            ranges[0].stage_flags,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(ranges[0].offset, 0);
        assert_eq!(ranges[0].size, 4);
    }

    #[test]
    fn conflicting_push_constant_range_is_rejected() {
        let mut vertex = reflection(ShaderStage::Vertex);
        vertex.push_constants.push(push_constant("time", 0, 4));
        let mut fragment = reflection(ShaderStage::Fragment);
        fragment.push_constants.push(push_constant("time", 8, 4));

        let mut builder = PipelineLayoutBuilder::new(PipelineKind::Graphics);
        builder.add_stage(&vertex).unwrap();
        let err = builder.add_stage(&fragment).unwrap_err();
        assert!(matches!(
            err,
            GpuError::PushConstantNameCollision {
                existing_offset: 0,
                new_offset: 8,
                ..
            }
        ));
    }

    #[test]
    fn merges_descriptors_into_one_set() {
        let mut vertex = reflection(ShaderStage::Vertex);
        vertex
            .descriptors
            .push(descriptor(0, 0, DescriptorKind::UniformBuffer));
        let mut fragment = reflection(ShaderStage::Fragment);
        fragment
            .descriptors
            .push(descriptor(0, 1, DescriptorKind::CombinedImageSampler));

        let mut builder = PipelineLayoutBuilder::new(PipelineKind::Graphics);
        builder.add_stage(&vertex).unwrap();
        builder.add_stage(&fragment).unwrap();
        let layout = builder.build().unwrap();

        assert_eq!(layout.set_indices().collect::<Vec<_>>(), vec![0]);
        let bindings = layout.bindings(0).unwrap();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(bindings[0].stages, vk::ShaderStageFlags::VERTEX);
        assert_eq!(bindings[1].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(bindings[1].stages, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn shared_binding_accumulates_stage_flags() {
        let mut vertex = reflection(ShaderStage::Vertex);
        vertex
            .descriptors
            .push(descriptor(0, 0, DescriptorKind::UniformBuffer));
        let mut fragment = reflection(ShaderStage::Fragment);
        fragment
            .descriptors
            .push(descriptor(0, 0, DescriptorKind::UniformBuffer));

        let mut builder = PipelineLayoutBuilder::new(PipelineKind::Graphics);
        builder.add_stage(&vertex).unwrap();
        builder.add_stage(&fragment).unwrap();
        let layout = builder.build().unwrap();

        let bindings = layout.bindings(0).unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(
            bindings[0].stages,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn graphics_layout_requires_a_vertex_stage() {
        let fragment = reflection(ShaderStage::Fragment);
        let mut builder = PipelineLayoutBuilder::new(PipelineKind::Graphics);
        builder.add_stage(&fragment).unwrap();
        assert!(matches!(
            builder.build(),
            Err(GpuError::MissingVertexStage)
        ));
    }

    #[test]
    fn compute_layout_requires_the_compute_stage() {
        let builder = PipelineLayoutBuilder::new(PipelineKind::Compute);
        assert!(matches!(
            builder.build(),
            Err(GpuError::PipelineCreation(_))
        ));
    }

    #[test]
    fn merge_is_deterministic_and_idempotent() {
        let mut vertex = reflection(ShaderStage::Vertex);
        vertex
            .descriptors
            .push(descriptor(1, 2, DescriptorKind::StorageBuffer));
        vertex.push_constants.push(push_constant("model", 0, 64));

        let build = || {
            let mut builder = PipelineLayoutBuilder::new(PipelineKind::Graphics);
            builder.add_stage(&vertex).unwrap();
            builder.build().unwrap()
        };

        let first = build();
        let second = build();
        let range_fields = |layout: &PipelineLayout| {
            layout
                .push_constant_ranges()
                .iter()
                .map(|range| (range.stage_flags, range.offset, range.size))
                .collect::<Vec<_>>()
        };
        assert_eq!(range_fields(&first), range_fields(&second));
        assert_eq!(first.bindings(1), second.bindings(1));
        assert_eq!(
            first.set_indices().collect::<Vec<_>>(),
            second.set_indices().collect::<Vec<_>>()
        );
    }

    #[test]
    fn push_constant_lookup_by_name() {
        let mut vertex = reflection(ShaderStage::Vertex);
        vertex.push_constants.push(push_constant("model", 16, 64));

        let mut builder = PipelineLayoutBuilder::new(PipelineKind::Graphics);
        builder.add_stage(&vertex).unwrap();
        let layout = builder.build().unwrap();

        let range = layout.push_constant_range("model").unwrap();
        assert_eq!((range.offset, range.size), (16, 64));
        assert!(matches!(
            layout.push_constant_range("missing"),
            Err(GpuError::UnknownPushConstant(_))
        ));
    }

    #[test]
    fn pool_sizes_match_set_bindings() {
        let mut vertex = reflection(ShaderStage::Vertex);
        vertex
            .descriptors
            .push(descriptor(0, 0, DescriptorKind::UniformBuffer));
        vertex
            .descriptors
            .push(descriptor(0, 1, DescriptorKind::CombinedImageSampler));

        let mut builder = PipelineLayoutBuilder::new(PipelineKind::Graphics);
        builder.add_stage(&vertex).unwrap();
        let layout = builder.build().unwrap();

        let sizes = layout.pool_sizes_for_set(0).unwrap();
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 1);
        assert!(layout.pool_sizes_for_set(7).is_none());
    }
}
