//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
///
/// Every variant represents a programmer or configuration error discovered at
/// build or first-use time. None of them are retried internally.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Shader reflection failed.
    #[error("Shader reflection failed: {0}")]
    Reflection(#[from] prism_reflect::ReflectError),

    /// Graphics pipeline built without a vertex-stage shader.
    #[error("At least one vertex shader stage is required to build a graphics pipeline")]
    MissingVertexStage,

    /// The same push-constant name was declared with conflicting ranges in
    /// two shader stages.
    #[error(
        "Push constant {name:?} redeclared with a conflicting range: \
         existing offset {existing_offset}/size {existing_size}, \
         new offset {new_offset}/size {new_size}"
    )]
    PushConstantNameCollision {
        name: String,
        existing_offset: u32,
        existing_size: u32,
        new_offset: u32,
        new_size: u32,
    },

    /// Push constant name not found in the pipeline layout.
    #[error("Push constant with name {0:?} not found")]
    UnknownPushConstant(String),

    /// Push constant data does not match the reflected range size.
    #[error("Push constant {name:?} expects {expected} bytes, got {actual}")]
    PushConstantSizeMismatch {
        name: String,
        expected: u32,
        actual: u32,
    },

    /// Image format class does not permit the requested operation.
    #[error("Incompatible format: {0}")]
    IncompatibleFormat(String),

    /// Attachment name registered twice on the same builder.
    #[error("Attachment names must be unique: {0:?} already exists")]
    DuplicateAttachmentName(String),

    /// Attachment name referenced but never registered.
    #[error("Attachment {0:?} was never registered")]
    UnknownAttachment(String),

    /// Subpass command issued outside a begin/end subpass bracket.
    #[error("No subpass is being recorded; call begin_subpass_record first")]
    NotRecording,

    /// Attachment or subpass configuration is invalid.
    #[error("Invalid attachment: {0}")]
    InvalidAttachment(String),

    /// Image layout pair invalid, or usage flags incompatible with the
    /// requested layout.
    #[error("Unsupported layout transition: {0}")]
    UnsupportedLayoutTransition(String),

    /// Descriptor or set demand exceeds the remaining pool budget.
    #[error("Descriptor pool exhausted: {0}")]
    PoolExhausted(String),

    /// Command recorder protocol violation.
    #[error("Invalid recording state: {0}")]
    InvalidRecordingState(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Shader module creation failed.
    #[error("Shader module creation failed: {0}")]
    ShaderModuleCreation(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
