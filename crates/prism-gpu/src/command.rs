//! Validated command recording.
//!
//! A [`CommandRecorder`] is a state machine over
//! `Initial -> Recording -> Ended`, with an inside-render-pass flag while a
//! pass is open. Every call is validated when it is made and recorded as
//! data; nothing touches a device until [`CommandRecorder::record_into`]
//! replays the validated sequence onto a raw command buffer. Layout
//! transitions are the safety-critical part: access masks come from a fixed
//! per-layout table, the image's declared usage must support both sides, and
//! the tracked layout is updated exactly once per successful transition.

use ash::vk;
use tracing::warn;

use crate::error::{GpuError, Result};
use crate::format::is_depth_format;
use crate::image::ImageState;
use crate::layout::PipelineLayout;

/// The access mask implied by an image layout, or `None` for layouts this
/// recorder refuses to transition through.
fn layout_access_mask(layout: vk::ImageLayout) -> Option<vk::AccessFlags> {
    match layout {
        vk::ImageLayout::UNDEFINED | vk::ImageLayout::GENERAL => Some(vk::AccessFlags::empty()),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => {
            Some(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        }
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => Some(
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL => {
            Some(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ)
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => Some(vk::AccessFlags::SHADER_READ),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => Some(vk::AccessFlags::TRANSFER_READ),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => Some(vk::AccessFlags::TRANSFER_WRITE),
        vk::ImageLayout::PREINITIALIZED => Some(vk::AccessFlags::HOST_WRITE),
        _ => None,
    }
}

/// The pipeline stages that produce or consume an image in a given layout.
fn layout_stage_mask(layout: vk::ImageLayout) -> vk::PipelineStageFlags {
    match layout {
        vk::ImageLayout::UNDEFINED => vk::PipelineStageFlags::TOP_OF_PIPE,
        vk::ImageLayout::PREINITIALIZED => vk::PipelineStageFlags::HOST,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => {
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        }
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL => {
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER
        }
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL | vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
            vk::PipelineStageFlags::TRANSFER
        }
        _ => vk::PipelineStageFlags::ALL_COMMANDS,
    }
}

/// Whether the usage flags an image was created with permit it to be in the
/// given layout at all.
fn usage_supports_layout(usage: vk::ImageUsageFlags, layout: vk::ImageLayout) -> bool {
    match layout {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => {
            usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        }
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL => {
            usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            usage.intersects(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::INPUT_ATTACHMENT)
        }
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => {
            usage.contains(vk::ImageUsageFlags::TRANSFER_SRC)
        }
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
            usage.contains(vk::ImageUsageFlags::TRANSFER_DST)
        }
        _ => true,
    }
}

/// Producer/consumer pairs over buffer or global memory. Each maps to one
/// fixed barrier tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hazard {
    /// Compute wrote a storage buffer that compute reads next.
    ComputeWriteToComputeRead,
    /// Compute read a buffer that compute overwrites next (execution
    /// dependency only, no memory access to flush).
    ComputeReadToComputeWrite,
    /// Compute wrote a buffer consumed as an index buffer.
    ComputeWriteToIndexRead,
    /// Compute wrote a buffer consumed by indirect draw commands.
    ComputeWriteToIndirectDraw,
}

impl Hazard {
    /// (src stage, dst stage, src access, dst access) for this hazard.
    pub fn masks(
        self,
    ) -> (
        vk::PipelineStageFlags,
        vk::PipelineStageFlags,
        vk::AccessFlags,
        vk::AccessFlags,
    ) {
        match self {
            Self::ComputeWriteToComputeRead => (
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::AccessFlags::SHADER_WRITE,
                vk::AccessFlags::SHADER_READ,
            ),
            Self::ComputeReadToComputeWrite => (
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::AccessFlags::empty(),
                vk::AccessFlags::empty(),
            ),
            Self::ComputeWriteToIndexRead => (
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::VERTEX_INPUT,
                vk::AccessFlags::SHADER_WRITE,
                vk::AccessFlags::INDEX_READ,
            ),
            Self::ComputeWriteToIndirectDraw => (
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::DRAW_INDIRECT,
                vk::AccessFlags::SHADER_WRITE,
                vk::AccessFlags::INDIRECT_COMMAND_READ,
            ),
        }
    }
}

/// Producer/consumer pairs over an image. These carry a target layout and
/// update the image's tracked layout on record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageHazard {
    /// Compute wrote a storage image that graphics samples next.
    ComputeWriteToGraphicsSample,
    /// Graphics wrote a color attachment that compute samples next.
    ColorWriteToComputeSample,
    /// Graphics wrote a depth attachment that a later shader samples.
    DepthWriteToShaderSample,
    /// Graphics wrote a color attachment that a later graphics pass samples.
    ColorWriteToGraphicsSample,
}

impl ImageHazard {
    /// (src stage, dst stage, src access, dst access) for this hazard.
    pub fn masks(
        self,
    ) -> (
        vk::PipelineStageFlags,
        vk::PipelineStageFlags,
        vk::AccessFlags,
        vk::AccessFlags,
    ) {
        match self {
            Self::ComputeWriteToGraphicsSample => (
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::AccessFlags::SHADER_WRITE,
                vk::AccessFlags::SHADER_READ,
            ),
            Self::ColorWriteToComputeSample => (
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                vk::AccessFlags::SHADER_READ,
            ),
            Self::DepthWriteToShaderSample => (
                vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                vk::PipelineStageFlags::FRAGMENT_SHADER
                    | vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                vk::AccessFlags::SHADER_READ,
            ),
            Self::ColorWriteToGraphicsSample => (
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                vk::AccessFlags::SHADER_READ,
            ),
        }
    }

    /// The layout the image is left in after this hazard barrier.
    pub fn target_layout(self) -> vk::ImageLayout {
        match self {
            Self::ComputeWriteToGraphicsSample
            | Self::ColorWriteToComputeSample
            | Self::ColorWriteToGraphicsSample => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Self::DepthWriteToShaderSample => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        }
    }
}

#[derive(Clone, Copy)]
struct ImageBarrier {
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_queue_family: u32,
    dst_queue_family: u32,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
}

enum Command {
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_values: Vec<vk::ClearValue>,
    },
    NextSubpass,
    EndRenderPass,
    BindPipeline {
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<vk::Buffer>,
        offsets: Vec<vk::DeviceSize>,
    },
    BindIndexBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    },
    BindDescriptorSets {
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
    },
    PushConstants {
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: Vec<u8>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    Dispatch {
        group_count_x: u32,
        group_count_y: u32,
        group_count_z: u32,
    },
    SetLineWidth(f32),
    SetViewport(vk::Viewport),
    SetScissor(vk::Rect2D),
    MemoryBarrier {
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
    },
    ImageBarrier {
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: ImageBarrier,
    },
    ClearColorImage {
        image: vk::Image,
        layout: vk::ImageLayout,
        color: vk::ClearColorValue,
        range: vk::ImageSubresourceRange,
    },
    ClearDepthStencilImage {
        image: vk::Image,
        layout: vk::ImageLayout,
        value: vk::ClearDepthStencilValue,
        range: vk::ImageSubresourceRange,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecorderState {
    Initial,
    Recording,
    Ended,
}

/// Records a validated command sequence for later replay onto a raw
/// `vk::CommandBuffer`.
pub struct CommandRecorder {
    state: RecorderState,
    inside_render_pass: bool,
    commands: Vec<Command>,
    line_width_range: [f32; 2],
}

impl CommandRecorder {
    /// Recorder with no device limits known; line widths clamp to 1.0.
    pub fn new() -> Self {
        Self {
            state: RecorderState::Initial,
            inside_render_pass: false,
            commands: Vec::new(),
            line_width_range: [1.0, 1.0],
        }
    }

    /// Recorder that clamps line widths to the device's supported range.
    pub fn with_limits(limits: &vk::PhysicalDeviceLimits) -> Self {
        Self {
            line_width_range: limits.line_width_range,
            ..Self::new()
        }
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    fn require_recording(&self) -> Result<()> {
        match self.state {
            RecorderState::Recording => Ok(()),
            RecorderState::Initial => Err(GpuError::InvalidRecordingState(
                "recording has not begun".to_owned(),
            )),
            RecorderState::Ended => Err(GpuError::InvalidRecordingState(
                "recording has already ended".to_owned(),
            )),
        }
    }

    fn require_outside_render_pass(&self) -> Result<()> {
        self.require_recording()?;
        if self.inside_render_pass {
            return Err(GpuError::InvalidRecordingState(
                "not allowed inside a render pass".to_owned(),
            ));
        }
        Ok(())
    }

    fn require_inside_render_pass(&self) -> Result<()> {
        self.require_recording()?;
        if !self.inside_render_pass {
            return Err(GpuError::InvalidRecordingState(
                "only allowed inside a render pass".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn begin(&mut self) -> Result<&mut Self> {
        match self.state {
            RecorderState::Initial => {
                self.state = RecorderState::Recording;
                Ok(self)
            }
            RecorderState::Recording => Err(GpuError::InvalidRecordingState(
                "begin called while already recording".to_owned(),
            )),
            RecorderState::Ended => Err(GpuError::InvalidRecordingState(
                "recorder has already ended".to_owned(),
            )),
        }
    }

    pub fn end(&mut self) -> Result<&mut Self> {
        self.require_recording()?;
        if self.inside_render_pass {
            return Err(GpuError::InvalidRecordingState(
                "end called inside a render pass".to_owned(),
            ));
        }
        self.state = RecorderState::Ended;
        Ok(self)
    }

    pub fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        render_area: vk::Rect2D,
        clear_values: Vec<vk::ClearValue>,
    ) -> Result<&mut Self> {
        self.require_recording()?;
        if self.inside_render_pass {
            return Err(GpuError::InvalidRecordingState(
                "render passes cannot nest".to_owned(),
            ));
        }
        self.inside_render_pass = true;
        self.commands.push(Command::BeginRenderPass {
            render_pass,
            framebuffer,
            render_area,
            clear_values,
        });
        Ok(self)
    }

    pub fn next_subpass(&mut self) -> Result<&mut Self> {
        self.require_inside_render_pass()?;
        self.commands.push(Command::NextSubpass);
        Ok(self)
    }

    pub fn end_render_pass(&mut self) -> Result<&mut Self> {
        self.require_inside_render_pass()?;
        self.inside_render_pass = false;
        self.commands.push(Command::EndRenderPass);
        Ok(self)
    }

    pub fn bind_pipeline(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) -> Result<&mut Self> {
        self.require_recording()?;
        self.commands.push(Command::BindPipeline {
            bind_point,
            pipeline,
        });
        Ok(self)
    }

    pub fn bind_vertex_buffers(
        &mut self,
        first_binding: u32,
        buffers: Vec<vk::Buffer>,
        offsets: Vec<vk::DeviceSize>,
    ) -> Result<&mut Self> {
        self.require_recording()?;
        if buffers.len() != offsets.len() {
            return Err(GpuError::InvalidRecordingState(format!(
                "{} vertex buffers but {} offsets",
                buffers.len(),
                offsets.len()
            )));
        }
        self.commands.push(Command::BindVertexBuffers {
            first_binding,
            buffers,
            offsets,
        });
        Ok(self)
    }

    pub fn bind_index_buffer(
        &mut self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) -> Result<&mut Self> {
        self.require_recording()?;
        self.commands.push(Command::BindIndexBuffer {
            buffer,
            offset,
            index_type,
        });
        Ok(self)
    }

    pub fn bind_descriptor_sets(
        &mut self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
    ) -> Result<&mut Self> {
        self.require_recording()?;
        self.commands.push(Command::BindDescriptorSets {
            bind_point,
            layout,
            first_set,
            sets,
        });
        Ok(self)
    }

    /// Record a push-constant update addressed by the name the member carried
    /// in the shader. Offset, size, and stage flags come from the reflected
    /// layout; the data length must match the reflected size exactly.
    pub fn push_constants(
        &mut self,
        layout: vk::PipelineLayout,
        shader_layout: &PipelineLayout,
        name: &str,
        data: &[u8],
    ) -> Result<&mut Self> {
        self.require_recording()?;
        let range = shader_layout.push_constant_range(name)?;
        let actual = u32::try_from(data.len()).unwrap_or(u32::MAX);
        if actual != range.size {
            return Err(GpuError::PushConstantSizeMismatch {
                name: name.to_owned(),
                expected: range.size,
                actual,
            });
        }
        self.commands.push(Command::PushConstants {
            layout,
            stages: range.stage_flags,
            offset: range.offset,
            data: data.to_vec(),
        });
        Ok(self)
    }

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<&mut Self> {
        self.require_inside_render_pass()?;
        self.commands.push(Command::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
        Ok(self)
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<&mut Self> {
        self.require_inside_render_pass()?;
        self.commands.push(Command::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
        Ok(self)
    }

    pub fn dispatch(
        &mut self,
        group_count_x: u32,
        group_count_y: u32,
        group_count_z: u32,
    ) -> Result<&mut Self> {
        self.require_outside_render_pass()?;
        self.commands.push(Command::Dispatch {
            group_count_x,
            group_count_y,
            group_count_z,
        });
        Ok(self)
    }

    /// Record a line-width change, clamped to the device limit range.
    pub fn set_line_width(&mut self, width: f32) -> Result<&mut Self> {
        self.require_recording()?;
        let [min, max] = self.line_width_range;
        let clamped = width.clamp(min, max);
        if (clamped - width).abs() > f32::EPSILON {
            warn!(requested = width, clamped, "line width clamped to device range");
        }
        self.commands.push(Command::SetLineWidth(clamped));
        Ok(self)
    }

    pub fn set_viewport(&mut self, viewport: vk::Viewport) -> Result<&mut Self> {
        self.require_recording()?;
        self.commands.push(Command::SetViewport(viewport));
        Ok(self)
    }

    pub fn set_scissor(&mut self, scissor: vk::Rect2D) -> Result<&mut Self> {
        self.require_recording()?;
        self.commands.push(Command::SetScissor(scissor));
        Ok(self)
    }

    /// Record a layout transition barrier with ignored queue-family indices
    /// (no ownership transfer).
    pub fn transition_image_layout(
        &mut self,
        image: &mut ImageState,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
        range: vk::ImageSubresourceRange,
    ) -> Result<&mut Self> {
        self.transition_inner(
            image,
            from,
            to,
            range,
            vk::QUEUE_FAMILY_IGNORED,
            vk::QUEUE_FAMILY_IGNORED,
        )
    }

    /// Record a layout transition that also transfers queue-family ownership.
    pub fn transition_image_layout_with_ownership(
        &mut self,
        image: &mut ImageState,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
        range: vk::ImageSubresourceRange,
        src_queue_family: u32,
        dst_queue_family: u32,
    ) -> Result<&mut Self> {
        self.transition_inner(image, from, to, range, src_queue_family, dst_queue_family)
    }

    fn transition_inner(
        &mut self,
        image: &mut ImageState,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
        range: vk::ImageSubresourceRange,
        src_queue_family: u32,
        dst_queue_family: u32,
    ) -> Result<&mut Self> {
        self.require_outside_render_pass()?;

        if from != image.current_layout() {
            return Err(GpuError::UnsupportedLayoutTransition(format!(
                "transition from {from:?} but the image is tracked in {:?}",
                image.current_layout()
            )));
        }
        if matches!(
            to,
            vk::ImageLayout::UNDEFINED | vk::ImageLayout::PREINITIALIZED
        ) {
            return Err(GpuError::UnsupportedLayoutTransition(format!(
                "{to:?} is not a valid destination layout"
            )));
        }

        let src_access = layout_access_mask(from).ok_or_else(|| {
            GpuError::UnsupportedLayoutTransition(format!("{from:?} is not a supported source"))
        })?;
        let dst_access = layout_access_mask(to).ok_or_else(|| {
            GpuError::UnsupportedLayoutTransition(format!("{to:?} is not a supported destination"))
        })?;

        for layout in [from, to] {
            if !usage_supports_layout(image.usage(), layout) {
                return Err(GpuError::UnsupportedLayoutTransition(format!(
                    "image usage {:?} does not permit layout {layout:?}",
                    image.usage()
                )));
            }
        }

        self.commands.push(Command::ImageBarrier {
            src_stage: layout_stage_mask(from),
            dst_stage: layout_stage_mask(to),
            barrier: ImageBarrier {
                src_access,
                dst_access,
                old_layout: from,
                new_layout: to,
                src_queue_family,
                dst_queue_family,
                image: image.handle(),
                range,
            },
        });
        image.set_layout(to);
        Ok(self)
    }

    /// Record a global memory barrier for a known buffer hazard.
    pub fn hazard_barrier(&mut self, hazard: Hazard) -> Result<&mut Self> {
        self.require_outside_render_pass()?;
        let (src_stage, dst_stage, src_access, dst_access) = hazard.masks();
        self.commands.push(Command::MemoryBarrier {
            src_stage,
            dst_stage,
            src_access,
            dst_access,
        });
        Ok(self)
    }

    /// Record an image barrier for a known image hazard, moving the image
    /// into the hazard's target layout.
    pub fn image_hazard_barrier(
        &mut self,
        hazard: ImageHazard,
        image: &mut ImageState,
        range: vk::ImageSubresourceRange,
    ) -> Result<&mut Self> {
        self.require_outside_render_pass()?;
        let target = hazard.target_layout();
        if !usage_supports_layout(image.usage(), target) {
            return Err(GpuError::UnsupportedLayoutTransition(format!(
                "image usage {:?} does not permit layout {target:?}",
                image.usage()
            )));
        }

        let (src_stage, dst_stage, src_access, dst_access) = hazard.masks();
        self.commands.push(Command::ImageBarrier {
            src_stage,
            dst_stage,
            barrier: ImageBarrier {
                src_access,
                dst_access,
                old_layout: image.current_layout(),
                new_layout: target,
                src_queue_family: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family: vk::QUEUE_FAMILY_IGNORED,
                image: image.handle(),
                range,
            },
        });
        image.set_layout(target);
        Ok(self)
    }

    /// Record a color clear. The image must be a color image currently in
    /// `GENERAL` or `TRANSFER_DST_OPTIMAL` layout.
    pub fn clear_color_image(
        &mut self,
        image: &ImageState,
        color: vk::ClearColorValue,
        range: vk::ImageSubresourceRange,
    ) -> Result<&mut Self> {
        self.require_outside_render_pass()?;
        if is_depth_format(image.format()) {
            return Err(GpuError::IncompatibleFormat(format!(
                "color clear on depth format {:?}",
                image.format()
            )));
        }
        self.check_clear_layout(image)?;
        self.commands.push(Command::ClearColorImage {
            image: image.handle(),
            layout: image.current_layout(),
            color,
            range,
        });
        Ok(self)
    }

    /// Record a depth-stencil clear. The image must have a depth format and
    /// currently be in `GENERAL` or `TRANSFER_DST_OPTIMAL` layout.
    pub fn clear_depth_stencil_image(
        &mut self,
        image: &ImageState,
        value: vk::ClearDepthStencilValue,
        range: vk::ImageSubresourceRange,
    ) -> Result<&mut Self> {
        self.require_outside_render_pass()?;
        if !is_depth_format(image.format()) {
            return Err(GpuError::IncompatibleFormat(format!(
                "depth clear on color format {:?}",
                image.format()
            )));
        }
        self.check_clear_layout(image)?;
        self.commands.push(Command::ClearDepthStencilImage {
            image: image.handle(),
            layout: image.current_layout(),
            value,
            range,
        });
        Ok(self)
    }

    fn check_clear_layout(&self, image: &ImageState) -> Result<()> {
        match image.current_layout() {
            vk::ImageLayout::GENERAL | vk::ImageLayout::TRANSFER_DST_OPTIMAL => Ok(()),
            other => Err(GpuError::UnsupportedLayoutTransition(format!(
                "clears require GENERAL or TRANSFER_DST_OPTIMAL, image is in {other:?}"
            ))),
        }
    }

    /// Replay the recorded sequence onto a raw command buffer. The recorder
    /// must have been ended.
    ///
    /// # Safety
    /// The device and command buffer must be valid, the command buffer must
    /// be in the recording state, and every handle recorded into this
    /// sequence must still be alive.
    pub unsafe fn record_into(&self, device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
        if self.state != RecorderState::Ended {
            return Err(GpuError::InvalidRecordingState(
                "record_into requires an ended recorder".to_owned(),
            ));
        }

        for command in &self.commands {
            match command {
                Command::BeginRenderPass {
                    render_pass,
                    framebuffer,
                    render_area,
                    clear_values,
                } => {
                    let begin_info = vk::RenderPassBeginInfo::default()
                        .render_pass(*render_pass)
                        .framebuffer(*framebuffer)
                        .render_area(*render_area)
                        .clear_values(clear_values);
                    device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
                }
                Command::NextSubpass => {
                    device.cmd_next_subpass(cmd, vk::SubpassContents::INLINE);
                }
                Command::EndRenderPass => device.cmd_end_render_pass(cmd),
                Command::BindPipeline {
                    bind_point,
                    pipeline,
                } => device.cmd_bind_pipeline(cmd, *bind_point, *pipeline),
                Command::BindVertexBuffers {
                    first_binding,
                    buffers,
                    offsets,
                } => device.cmd_bind_vertex_buffers(cmd, *first_binding, buffers, offsets),
                Command::BindIndexBuffer {
                    buffer,
                    offset,
                    index_type,
                } => device.cmd_bind_index_buffer(cmd, *buffer, *offset, *index_type),
                Command::BindDescriptorSets {
                    bind_point,
                    layout,
                    first_set,
                    sets,
                } => device.cmd_bind_descriptor_sets(
                    cmd,
                    *bind_point,
                    *layout,
                    *first_set,
                    sets,
                    &[],
                ),
                Command::PushConstants {
                    layout,
                    stages,
                    offset,
                    data,
                } => device.cmd_push_constants(cmd, *layout, *stages, *offset, data),
                Command::Draw {
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                } => device.cmd_draw(
                    cmd,
                    *vertex_count,
                    *instance_count,
                    *first_vertex,
                    *first_instance,
                ),
                Command::DrawIndexed {
                    index_count,
                    instance_count,
                    first_index,
                    vertex_offset,
                    first_instance,
                } => device.cmd_draw_indexed(
                    cmd,
                    *index_count,
                    *instance_count,
                    *first_index,
                    *vertex_offset,
                    *first_instance,
                ),
                Command::Dispatch {
                    group_count_x,
                    group_count_y,
                    group_count_z,
                } => device.cmd_dispatch(cmd, *group_count_x, *group_count_y, *group_count_z),
                Command::SetLineWidth(width) => device.cmd_set_line_width(cmd, *width),
                Command::SetViewport(viewport) => device.cmd_set_viewport(cmd, 0, &[*viewport]),
                Command::SetScissor(scissor) => device.cmd_set_scissor(cmd, 0, &[*scissor]),
                Command::MemoryBarrier {
                    src_stage,
                    dst_stage,
                    src_access,
                    dst_access,
                } => {
                    let barrier = vk::MemoryBarrier::default()
                        .src_access_mask(*src_access)
                        .dst_access_mask(*dst_access);
                    device.cmd_pipeline_barrier(
                        cmd,
                        *src_stage,
                        *dst_stage,
                        vk::DependencyFlags::empty(),
                        &[barrier],
                        &[],
                        &[],
                    );
                }
                Command::ImageBarrier {
                    src_stage,
                    dst_stage,
                    barrier,
                } => {
                    let image_barrier = vk::ImageMemoryBarrier::default()
                        .src_access_mask(barrier.src_access)
                        .dst_access_mask(barrier.dst_access)
                        .old_layout(barrier.old_layout)
                        .new_layout(barrier.new_layout)
                        .src_queue_family_index(barrier.src_queue_family)
                        .dst_queue_family_index(barrier.dst_queue_family)
                        .image(barrier.image)
                        .subresource_range(barrier.range);
                    device.cmd_pipeline_barrier(
                        cmd,
                        *src_stage,
                        *dst_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[image_barrier],
                    );
                }
                Command::ClearColorImage {
                    image,
                    layout,
                    color,
                    range,
                } => device.cmd_clear_color_image(cmd, *image, *layout, color, &[*range]),
                Command::ClearDepthStencilImage {
                    image,
                    layout,
                    value,
                    range,
                } => {
                    device.cmd_clear_depth_stencil_image(cmd, *image, *layout, value, &[*range]);
                }
            }
        }

        Ok(())
    }
}

impl Default for CommandRecorder {
    fn default() -> Self {
        Self::new()
    }
}
