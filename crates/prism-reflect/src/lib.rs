//! SPIR-V parsing and shader interface reflection for Prism.
//!
//! This crate turns a raw shader binary into typed metadata:
//! - the shader stage, from the module's execution model
//! - push-constant block members (name, offset, size)
//! - descriptor bindings (set, binding, kind)
//!
//! It deliberately has no GPU dependency; the device layer consumes the
//! reflected metadata when aggregating pipeline layouts.

pub mod error;
pub mod parse;
pub mod reflect;

pub use error::{ParseError, ReflectError, Result};
pub use parse::{Instruction, Spirv};
pub use reflect::{Descriptor, DescriptorKind, PushConstant, ShaderStage, ShaderStageReflection};
