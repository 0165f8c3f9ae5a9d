//! Named-attachment render pass construction.
//!
//! Attachments are registered by name in insertion order; the position in
//! that table is the attachment's index for the lifetime of the builder.
//! Subpasses are recorded between `begin_subpass_record` and
//! `end_subpass_record` and reference attachments by name and category. The
//! builder resolves everything into an owned [`RenderPassLayout`] which a
//! device call then materializes.

use std::collections::HashSet;

use ash::vk;
use tracing::debug;

use crate::error::{GpuError, Result};
use crate::format::is_depth_format;

/// How a subpass uses an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentCategory {
    Color,
    Resolve,
    DepthStencil,
    Input,
    Preserve,
}

impl AttachmentCategory {
    /// The image layout an attachment reference of this category defaults to.
    pub fn default_layout(self) -> vk::ImageLayout {
        match self {
            Self::Color | Self::Resolve | Self::Input | Self::Preserve => {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            }
            Self::DepthStencil => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    }
}

#[derive(Debug, Default)]
struct SubpassRecord {
    color: Vec<String>,
    resolve: Vec<String>,
    depth_stencil: Option<String>,
    input: Vec<String>,
    preserve: Vec<String>,
}

/// One resolved subpass: attachment references in table-index form.
#[derive(Debug, Default, Clone)]
pub struct SubpassLayout {
    pub color: Vec<vk::AttachmentReference>,
    pub resolve: Vec<vk::AttachmentReference>,
    pub depth_stencil: Option<vk::AttachmentReference>,
    pub input: Vec<vk::AttachmentReference>,
    pub preserve: Vec<u32>,
}

/// Device-free description of a complete render pass.
///
/// Attachment descriptions appear in registration order. Framebuffers built
/// against this layout must supply their image views in exactly that order.
#[derive(Debug, Clone)]
pub struct RenderPassLayout {
    names: Vec<String>,
    attachments: Vec<vk::AttachmentDescription>,
    subpasses: Vec<SubpassLayout>,
    dependencies: Vec<vk::SubpassDependency>,
}

impl RenderPassLayout {
    pub fn attachments(&self) -> &[vk::AttachmentDescription] {
        &self.attachments
    }

    pub fn subpasses(&self) -> &[SubpassLayout] {
        &self.subpasses
    }

    pub fn dependencies(&self) -> &[vk::SubpassDependency] {
        &self.dependencies
    }

    /// The stable index assigned to a registered attachment name.
    pub fn attachment_index(&self, name: &str) -> Result<u32> {
        self.names
            .iter()
            .position(|registered| registered == name)
            .map(|index| u32::try_from(index).unwrap_or(u32::MAX))
            .ok_or_else(|| GpuError::UnknownAttachment(name.to_owned()))
    }

    /// Create the `vk::RenderPass`.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn create(&self, device: &ash::Device) -> Result<vk::RenderPass> {
        let descriptions: Vec<vk::SubpassDescription<'_>> = self
            .subpasses
            .iter()
            .map(|subpass| {
                let mut description = vk::SubpassDescription::default()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .color_attachments(&subpass.color)
                    .input_attachments(&subpass.input)
                    .preserve_attachments(&subpass.preserve);
                if !subpass.resolve.is_empty() {
                    description = description.resolve_attachments(&subpass.resolve);
                }
                if let Some(depth_stencil) = &subpass.depth_stencil {
                    description = description.depth_stencil_attachment(depth_stencil);
                }
                description
            })
            .collect();

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&self.attachments)
            .subpasses(&descriptions)
            .dependencies(&self.dependencies);

        let render_pass = device.create_render_pass(&create_info, None)?;
        debug!(
            attachments = self.attachments.len(),
            subpasses = self.subpasses.len(),
            "created render pass"
        );
        Ok(render_pass)
    }

    /// Create a framebuffer whose image views correspond one-to-one, in
    /// order, with the registered attachment table.
    ///
    /// # Safety
    /// The device must be valid and `render_pass` must have been created from
    /// this layout.
    pub unsafe fn create_framebuffer(
        &self,
        device: &ash::Device,
        render_pass: vk::RenderPass,
        image_views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        if image_views.len() != self.attachments.len() {
            return Err(GpuError::InvalidAttachment(format!(
                "framebuffer needs {} image views in attachment table order, got {}",
                self.attachments.len(),
                image_views.len()
            )));
        }

        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(image_views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = device.create_framebuffer(&create_info, None)?;
        Ok(framebuffer)
    }
}

/// Builds a [`RenderPassLayout`] from named attachments and recorded
/// subpasses.
#[derive(Debug, Default)]
pub struct AttachmentGraphBuilder {
    names: Vec<String>,
    attachments: Vec<vk::AttachmentDescription>,
    subpasses: Vec<SubpassRecord>,
    dependencies: Vec<vk::SubpassDependency>,
    open: Option<SubpassRecord>,
}

impl AttachmentGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an attachment under a unique name. Its index is its position
    /// in registration order and never changes.
    pub fn add_attachment(
        &mut self,
        name: &str,
        description: vk::AttachmentDescription,
    ) -> Result<&mut Self> {
        if self.names.iter().any(|registered| registered == name) {
            return Err(GpuError::DuplicateAttachmentName(name.to_owned()));
        }
        self.names.push(name.to_owned());
        self.attachments.push(description);
        Ok(self)
    }

    /// Register a single-sampled color attachment that is cleared on load and
    /// presented at the end of the pass.
    pub fn add_color_present(&mut self, name: &str, format: vk::Format) -> Result<&mut Self> {
        self.add_attachment(
            name,
            vk::AttachmentDescription::default()
                .format(format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
        )
    }

    /// Register a transient multisampled color attachment whose contents are
    /// discarded after the pass (resolve targets hold the result).
    pub fn add_color_transient(
        &mut self,
        name: &str,
        format: vk::Format,
        samples: vk::SampleCountFlags,
    ) -> Result<&mut Self> {
        self.add_attachment(
            name,
            vk::AttachmentDescription::default()
                .format(format)
                .samples(samples)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        )
    }

    /// Register a depth-stencil attachment. The format must have a depth
    /// component.
    pub fn add_depth_stencil(&mut self, name: &str, format: vk::Format) -> Result<&mut Self> {
        if !is_depth_format(format) {
            return Err(GpuError::InvalidAttachment(format!(
                "{name:?} declared as depth-stencil but {format:?} has no depth component"
            )));
        }
        self.add_attachment(
            name,
            vk::AttachmentDescription::default()
                .format(format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        )
    }

    /// Open a subpass record.
    pub fn begin_subpass_record(&mut self) -> Result<&mut Self> {
        if self.open.is_some() {
            return Err(GpuError::InvalidRecordingState(
                "a subpass record is already open".to_owned(),
            ));
        }
        self.open = Some(SubpassRecord::default());
        Ok(self)
    }

    /// Reference a registered attachment from the open subpass.
    pub fn append_attachment_to_subpass(
        &mut self,
        name: &str,
        category: AttachmentCategory,
    ) -> Result<&mut Self> {
        if !self.names.iter().any(|registered| registered == name) {
            return Err(GpuError::UnknownAttachment(name.to_owned()));
        }
        let subpass = self.open.as_mut().ok_or(GpuError::NotRecording)?;
        match category {
            AttachmentCategory::Color => subpass.color.push(name.to_owned()),
            AttachmentCategory::Resolve => subpass.resolve.push(name.to_owned()),
            AttachmentCategory::DepthStencil => {
                if let Some(existing) = &subpass.depth_stencil {
                    return Err(GpuError::InvalidAttachment(format!(
                        "subpass already has depth-stencil attachment {existing:?}"
                    )));
                }
                subpass.depth_stencil = Some(name.to_owned());
            }
            AttachmentCategory::Input => subpass.input.push(name.to_owned()),
            AttachmentCategory::Preserve => subpass.preserve.push(name.to_owned()),
        }
        Ok(self)
    }

    /// Close the open subpass. With no explicit dependency, an
    /// external-to-this-subpass dependency on color attachment output is
    /// synthesized.
    pub fn end_subpass_record(
        &mut self,
        dependency: Option<vk::SubpassDependency>,
    ) -> Result<&mut Self> {
        let subpass = self.open.take().ok_or(GpuError::NotRecording)?;
        let index = u32::try_from(self.subpasses.len()).unwrap_or(u32::MAX);

        let dependency = dependency.unwrap_or(vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: index,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ
                | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dependency_flags: vk::DependencyFlags::empty(),
        });

        self.subpasses.push(subpass);
        self.dependencies.push(dependency);
        Ok(self)
    }

    /// Resolve all recorded subpasses against the attachment table.
    pub fn build(self) -> Result<RenderPassLayout> {
        if self.open.is_some() {
            return Err(GpuError::InvalidRecordingState(
                "a subpass record is still open".to_owned(),
            ));
        }
        if self.subpasses.is_empty() {
            return Err(GpuError::InvalidAttachment(
                "a render pass needs at least one recorded subpass".to_owned(),
            ));
        }

        let index_of = |name: &str| -> u32 {
            // Names were validated at append time.
            let position = self
                .names
                .iter()
                .position(|registered| registered == name)
                .unwrap_or(usize::MAX);
            u32::try_from(position).unwrap_or(u32::MAX)
        };
        let reference = |name: &str, category: AttachmentCategory| vk::AttachmentReference {
            attachment: index_of(name),
            layout: category.default_layout(),
        };

        let referenced: HashSet<&str> = self
            .subpasses
            .iter()
            .flat_map(|record| {
                record
                    .color
                    .iter()
                    .chain(&record.resolve)
                    .chain(&record.depth_stencil)
                    .chain(&record.input)
                    .chain(&record.preserve)
                    .map(String::as_str)
            })
            .collect();
        for name in &self.names {
            if !referenced.contains(name.as_str()) {
                debug!(attachment = %name, "registered attachment is never referenced");
            }
        }

        let subpasses = self
            .subpasses
            .iter()
            .map(|record| SubpassLayout {
                color: record
                    .color
                    .iter()
                    .map(|name| reference(name, AttachmentCategory::Color))
                    .collect(),
                resolve: record
                    .resolve
                    .iter()
                    .map(|name| reference(name, AttachmentCategory::Resolve))
                    .collect(),
                depth_stencil: record
                    .depth_stencil
                    .as_deref()
                    .map(|name| reference(name, AttachmentCategory::DepthStencil)),
                input: record
                    .input
                    .iter()
                    .map(|name| reference(name, AttachmentCategory::Input))
                    .collect(),
                preserve: record.preserve.iter().map(|name| index_of(name)).collect(),
            })
            .collect();

        Ok(RenderPassLayout {
            names: self.names,
            attachments: self.attachments,
            subpasses,
            dependencies: self.dependencies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color_description() -> vk::AttachmentDescription {
        vk::AttachmentDescription::default()
            .format(vk::Format::B8G8R8A8_SRGB)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
    }

    #[test]
    fn duplicate_attachment_name_is_rejected() {
        let mut builder = AttachmentGraphBuilder::new();
        builder.add_attachment("color_a", color_description()).unwrap();
        assert!(matches!(
            builder.add_attachment("color_a", color_description()),
            Err(GpuError::DuplicateAttachmentName(_))
        ));
    }

    #[test]
    fn append_outside_subpass_record_is_rejected() {
        let mut builder = AttachmentGraphBuilder::new();
        builder.add_attachment("color_a", color_description()).unwrap();
        assert!(matches!(
            builder.append_attachment_to_subpass("color_a", AttachmentCategory::Color),
            Err(GpuError::NotRecording)
        ));
    }

    #[test]
    fn unknown_attachment_is_rejected_at_append_time() {
        let mut builder = AttachmentGraphBuilder::new();
        builder.begin_subpass_record().unwrap();
        assert!(matches!(
            builder.append_attachment_to_subpass("missing", AttachmentCategory::Color),
            Err(GpuError::UnknownAttachment(_))
        ));
    }

    #[test]
    fn indices_follow_registration_order() {
        let mut builder = AttachmentGraphBuilder::new();
        builder.add_color_present("color_a", vk::Format::B8G8R8A8_SRGB).unwrap();
        builder.add_depth_stencil("depth", vk::Format::D32_SFLOAT).unwrap();
        builder.begin_subpass_record().unwrap();
        builder
            .append_attachment_to_subpass("color_a", AttachmentCategory::Color)
            .unwrap();
        builder
            .append_attachment_to_subpass("depth", AttachmentCategory::DepthStencil)
            .unwrap();
        builder.end_subpass_record(None).unwrap();

        let layout = builder.build().unwrap();
        assert_eq!(layout.attachment_index("depth").unwrap(), 1);

        let subpass = &layout.subpasses()[0];
        assert_eq!(subpass.color[0].attachment, 0);
        assert_eq!(
            subpass.color[0].layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        let depth = subpass.depth_stencil.unwrap();
        assert_eq!(depth.attachment, 1);
        assert_eq!(
            depth.layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn default_dependency_targets_the_closed_subpass() {
        let mut builder = AttachmentGraphBuilder::new();
        builder.add_color_present("color_a", vk::Format::B8G8R8A8_SRGB).unwrap();
        builder.begin_subpass_record().unwrap();
        builder
            .append_attachment_to_subpass("color_a", AttachmentCategory::Color)
            .unwrap();
        builder.end_subpass_record(None).unwrap();
        let layout = builder.build().unwrap();

        let dependency = layout.dependencies()[0];
        assert_eq!(dependency.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dependency.dst_subpass, 0);
        assert_eq!(
            dependency.src_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(
            dependency.dst_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(dependency.src_access_mask, vk::AccessFlags::empty());
        assert_eq!(
            dependency.dst_access_mask,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
    }

    #[test]
    fn explicit_dependency_is_kept_verbatim() {
        let mut builder = AttachmentGraphBuilder::new();
        builder.add_color_present("color_a", vk::Format::B8G8R8A8_SRGB).unwrap();
        builder.begin_subpass_record().unwrap();
        builder
            .append_attachment_to_subpass("color_a", AttachmentCategory::Color)
            .unwrap();
        let dependency = vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::SHADER_READ,
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dependency_flags: vk::DependencyFlags::BY_REGION,
        };
        builder.end_subpass_record(Some(dependency)).unwrap();
        let layout = builder.build().unwrap();
        assert_eq!(
            layout.dependencies()[0].src_stage_mask,
            vk::PipelineStageFlags::FRAGMENT_SHADER
        );
        assert_eq!(
            layout.dependencies()[0].dependency_flags,
            vk::DependencyFlags::BY_REGION
        );
    }

    #[test]
    fn subpass_protocol_violations() {
        let mut builder = AttachmentGraphBuilder::new();
        assert!(matches!(
            builder.end_subpass_record(None),
            Err(GpuError::NotRecording)
        ));
        builder.begin_subpass_record().unwrap();
        assert!(matches!(
            builder.begin_subpass_record(),
            Err(GpuError::InvalidRecordingState(_))
        ));
        assert!(matches!(
            builder.build(),
            Err(GpuError::InvalidRecordingState(_))
        ));
    }

    #[test]
    fn second_depth_stencil_in_one_subpass_is_rejected() {
        let mut builder = AttachmentGraphBuilder::new();
        builder.add_depth_stencil("depth_a", vk::Format::D32_SFLOAT).unwrap();
        builder.add_depth_stencil("depth_b", vk::Format::D16_UNORM).unwrap();
        builder.begin_subpass_record().unwrap();
        builder
            .append_attachment_to_subpass("depth_a", AttachmentCategory::DepthStencil)
            .unwrap();
        assert!(matches!(
            builder.append_attachment_to_subpass("depth_b", AttachmentCategory::DepthStencil),
            Err(GpuError::InvalidAttachment(_))
        ));
    }

    #[test]
    fn depth_stencil_requires_a_depth_format() {
        let mut builder = AttachmentGraphBuilder::new();
        assert!(matches!(
            builder.add_depth_stencil("depth", vk::Format::R8G8B8A8_UNORM),
            Err(GpuError::InvalidAttachment(_))
        ));
    }

    #[test]
    fn preserve_references_are_bare_indices() {
        let mut builder = AttachmentGraphBuilder::new();
        builder.add_color_present("color_a", vk::Format::B8G8R8A8_SRGB).unwrap();
        builder.add_color_present("color_b", vk::Format::B8G8R8A8_SRGB).unwrap();
        builder.begin_subpass_record().unwrap();
        builder
            .append_attachment_to_subpass("color_a", AttachmentCategory::Color)
            .unwrap();
        builder
            .append_attachment_to_subpass("color_b", AttachmentCategory::Preserve)
            .unwrap();
        builder.end_subpass_record(None).unwrap();
        let layout = builder.build().unwrap();
        assert_eq!(layout.subpasses()[0].preserve, vec![1]);
    }

    #[test]
    fn build_without_subpasses_is_rejected() {
        let mut builder = AttachmentGraphBuilder::new();
        builder.add_color_present("color_a", vk::Format::B8G8R8A8_SRGB).unwrap();
        assert!(matches!(
            builder.build(),
            Err(GpuError::InvalidAttachment(_))
        ));
    }
}
