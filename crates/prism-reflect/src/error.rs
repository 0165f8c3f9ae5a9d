//! Reflection error types.

use thiserror::Error;

/// Errors produced while decoding the raw SPIR-V word stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Byte length is not a multiple of the 32-bit code word size.
    #[error("Shader binary length {0} is not a multiple of the code word size")]
    MalformedBinary(usize),

    /// Module is too short to contain a header.
    #[error("Shader binary is missing the SPIR-V header")]
    MissingHeader,

    /// Header is present but the magic number is wrong.
    #[error("Shader binary does not start with the SPIR-V magic number")]
    WrongHeader,

    /// An instruction's declared word count overruns the stream.
    #[error("Truncated instruction in shader binary")]
    IncompleteInstruction,

    #[error("Unknown execution model: {0}")]
    UnknownExecutionModel(u32),

    #[error("Unknown storage class: {0}")]
    UnknownStorageClass(u32),

    #[error("Unknown image dimensionality: {0}")]
    UnknownDim(u32),
}

/// Errors produced while reflecting a parsed module's interface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReflectError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The module declares no entry point.
    #[error("Shader module declares no entry point")]
    MissingEntryPoint,

    /// A resource variable lacks a required decoration.
    #[error("Resource {name:?} (id {id}) is missing the {decoration} decoration")]
    MissingDecoration {
        id: u32,
        name: String,
        decoration: &'static str,
    },

    /// A push-constant member is not 4-byte aligned.
    #[error(
        "Push constant {name:?} has offset {offset} and size {size}; both must be divisible by 4"
    )]
    MisalignedPushConstant {
        name: String,
        offset: u32,
        size: u32,
    },

    /// A variable references a type id that does not exist in the module.
    #[error("Dangling type reference: id {0}")]
    DanglingTypeId(u32),

    /// A type chain references itself; the module is malformed.
    #[error("Cyclic type reference at id {0}")]
    CyclicType(u32),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, ReflectError>;
