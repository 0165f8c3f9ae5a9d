//! Vulkan device-object layer for Prism.
//!
//! This crate provides:
//! - reflection-driven pipeline layout aggregation
//! - named-attachment render pass construction
//! - validated command recording with layout-transition barriers
//! - descriptor pool budgeting

pub mod command;
pub mod descriptors;
pub mod error;
pub mod format;
pub mod image;
pub mod layout;
pub mod pipeline;
pub mod render_pass;

pub use command::{CommandRecorder, Hazard, ImageHazard};
pub use descriptors::{BudgetedDescriptorPool, PoolBudget};
pub use error::{GpuError, Result};
pub use format::{format_to_aspect_mask, is_depth_format, is_stencil_format, sample_count_to_flags};
pub use image::ImageState;
pub use layout::{DescriptorBinding, PipelineLayout, PipelineLayoutBuilder};
pub use pipeline::{GraphicsPipelineConfig, Pipeline, PipelineKind};
pub use render_pass::{AttachmentCategory, AttachmentGraphBuilder, RenderPassLayout, SubpassLayout};
