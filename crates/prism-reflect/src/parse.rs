//! Word-level SPIR-V decoding.
//!
//! Only the instructions needed to reflect a module's external interface are
//! decoded; everything else is preserved as [`Instruction::Unknown`] so the
//! stream stays walkable.

use crate::error::ParseError;

/// The SPIR-V magic number, in host order.
pub const MAGIC_NUMBER: u32 = 0x0723_0203;

/// A parsed SPIR-V module.
#[derive(Debug, Clone)]
pub struct Spirv {
    /// (major, minor) version from the module header.
    pub version: (u8, u8),
    /// Upper bound on the ids used in the module.
    pub bound: u32,
    pub instructions: Vec<Instruction>,
}

/// Parse a SPIR-V module from raw bytes.
///
/// The byte length must be a multiple of the 32-bit code word size. Both
/// endiannesses are accepted; the magic number decides which one is in use.
pub fn parse_bytes(data: &[u8]) -> Result<Spirv, ParseError> {
    if data.len() % 4 != 0 {
        return Err(ParseError::MalformedBinary(data.len()));
    }
    if data.len() < 20 {
        return Err(ParseError::MissingHeader);
    }

    let words: Vec<u32> = if data[0] == 0x07 && data[1] == 0x23 && data[2] == 0x02 && data[3] == 0x03
    {
        data.chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    } else if data[3] == 0x07 && data[2] == 0x23 && data[1] == 0x02 && data[0] == 0x03 {
        data.chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    } else {
        return Err(ParseError::MissingHeader);
    };

    parse_words(&words)
}

/// Parse a SPIR-V module from a code-word slice already in host order.
pub fn parse_words(words: &[u32]) -> Result<Spirv, ParseError> {
    if words.len() < 5 {
        return Err(ParseError::MissingHeader);
    }
    if words[0] != MAGIC_NUMBER {
        return Err(ParseError::WrongHeader);
    }

    let version = (
        ((words[1] & 0x00ff_0000) >> 16) as u8,
        ((words[1] & 0x0000_ff00) >> 8) as u8,
    );

    let mut instructions = Vec::new();
    let mut rest = &words[5..];
    while !rest.is_empty() {
        let (instruction, remaining) = parse_instruction(rest)?;
        instructions.push(instruction);
        rest = remaining;
    }

    Ok(Spirv {
        version,
        bound: words[3],
        instructions,
    })
}

fn parse_instruction(words: &[u32]) -> Result<(Instruction, &[u32]), ParseError> {
    let word_count = (words[0] >> 16) as usize;
    let opcode = (words[0] & 0xffff) as u16;

    if word_count < 1 || words.len() < word_count {
        return Err(ParseError::IncompleteInstruction);
    }

    let instruction = decode_instruction(opcode, &words[1..word_count])?;
    Ok((instruction, &words[word_count..]))
}

/// A single decoded instruction. Operand names follow the SPIR-V spec.
#[derive(Debug, Clone)]
pub enum Instruction {
    Unknown(u16, Vec<u32>),
    Nop,
    Name {
        target_id: u32,
        name: String,
    },
    MemberName {
        target_id: u32,
        member: u32,
        name: String,
    },
    EntryPoint {
        execution: ExecutionModel,
        id: u32,
        name: String,
        interface: Vec<u32>,
    },
    TypeVoid {
        result_id: u32,
    },
    TypeBool {
        result_id: u32,
    },
    TypeInt {
        result_id: u32,
        width: u32,
        signedness: bool,
    },
    TypeFloat {
        result_id: u32,
        width: u32,
    },
    TypeVector {
        result_id: u32,
        component_id: u32,
        count: u32,
    },
    TypeMatrix {
        result_id: u32,
        column_type_id: u32,
        column_count: u32,
    },
    TypeImage {
        result_id: u32,
        sampled_type_id: u32,
        dim: Dim,
        depth: u32,
        arrayed: u32,
        multisampled: u32,
        sampled: u32,
        format: u32,
    },
    TypeSampler {
        result_id: u32,
    },
    TypeSampledImage {
        result_id: u32,
        image_type_id: u32,
    },
    TypeArray {
        result_id: u32,
        type_id: u32,
        length_id: u32,
    },
    TypeRuntimeArray {
        result_id: u32,
        type_id: u32,
    },
    TypeStruct {
        result_id: u32,
        member_type_ids: Vec<u32>,
    },
    TypePointer {
        result_id: u32,
        storage_class: StorageClass,
        type_id: u32,
    },
    Constant {
        result_type_id: u32,
        result_id: u32,
        value: Vec<u32>,
    },
    Variable {
        result_type_id: u32,
        result_id: u32,
        storage_class: StorageClass,
        initializer: Option<u32>,
    },
    Decorate {
        target_id: u32,
        decoration: u32,
        operands: Vec<u32>,
    },
    MemberDecorate {
        target_id: u32,
        member: u32,
        decoration: u32,
        operands: Vec<u32>,
    },
}

fn decode_instruction(opcode: u16, operands: &[u32]) -> Result<Instruction, ParseError> {
    let operand = |index: usize| -> Result<u32, ParseError> {
        operands
            .get(index)
            .copied()
            .ok_or(ParseError::IncompleteInstruction)
    };

    Ok(match opcode {
        0 => Instruction::Nop,
        5 => Instruction::Name {
            target_id: operand(0)?,
            name: parse_string(&operands[1..]).0,
        },
        6 => Instruction::MemberName {
            target_id: operand(0)?,
            member: operand(1)?,
            name: parse_string(&operands[2..]).0,
        },
        15 => {
            let (name, interface) = parse_string(&operands[2..]);
            Instruction::EntryPoint {
                execution: ExecutionModel::from_word(operand(0)?)?,
                id: operand(1)?,
                name,
                interface: interface.to_owned(),
            }
        }
        19 => Instruction::TypeVoid {
            result_id: operand(0)?,
        },
        20 => Instruction::TypeBool {
            result_id: operand(0)?,
        },
        21 => Instruction::TypeInt {
            result_id: operand(0)?,
            width: operand(1)?,
            signedness: operand(2)? != 0,
        },
        22 => Instruction::TypeFloat {
            result_id: operand(0)?,
            width: operand(1)?,
        },
        23 => Instruction::TypeVector {
            result_id: operand(0)?,
            component_id: operand(1)?,
            count: operand(2)?,
        },
        24 => Instruction::TypeMatrix {
            result_id: operand(0)?,
            column_type_id: operand(1)?,
            column_count: operand(2)?,
        },
        25 => Instruction::TypeImage {
            result_id: operand(0)?,
            sampled_type_id: operand(1)?,
            dim: Dim::from_word(operand(2)?)?,
            depth: operand(3)?,
            arrayed: operand(4)?,
            multisampled: operand(5)?,
            sampled: operand(6)?,
            format: operand(7)?,
        },
        26 => Instruction::TypeSampler {
            result_id: operand(0)?,
        },
        27 => Instruction::TypeSampledImage {
            result_id: operand(0)?,
            image_type_id: operand(1)?,
        },
        28 => Instruction::TypeArray {
            result_id: operand(0)?,
            type_id: operand(1)?,
            length_id: operand(2)?,
        },
        29 => Instruction::TypeRuntimeArray {
            result_id: operand(0)?,
            type_id: operand(1)?,
        },
        30 => Instruction::TypeStruct {
            result_id: operand(0)?,
            member_type_ids: operands.get(1..).unwrap_or(&[]).to_owned(),
        },
        32 => Instruction::TypePointer {
            result_id: operand(0)?,
            storage_class: StorageClass::from_word(operand(1)?)?,
            type_id: operand(2)?,
        },
        43 => Instruction::Constant {
            result_type_id: operand(0)?,
            result_id: operand(1)?,
            value: operands.get(2..).unwrap_or(&[]).to_owned(),
        },
        59 => Instruction::Variable {
            result_type_id: operand(0)?,
            result_id: operand(1)?,
            storage_class: StorageClass::from_word(operand(2)?)?,
            initializer: operands.get(3).copied(),
        },
        71 => Instruction::Decorate {
            target_id: operand(0)?,
            decoration: operand(1)?,
            operands: operands.get(2..).unwrap_or(&[]).to_owned(),
        },
        72 => Instruction::MemberDecorate {
            target_id: operand(0)?,
            member: operand(1)?,
            decoration: operand(2)?,
            operands: operands.get(3..).unwrap_or(&[]).to_owned(),
        },
        _ => Instruction::Unknown(opcode, operands.to_owned()),
    })
}

/// Decode a NUL-terminated, word-padded literal string, returning the string
/// and the operands that follow it.
fn parse_string(words: &[u32]) -> (String, &[u32]) {
    let bytes: Vec<u8> = words
        .iter()
        .flat_map(|&w| w.to_le_bytes())
        .take_while(|&b| b != 0)
        .collect();

    let words_consumed = bytes.len() / 4 + 1;
    let string = String::from_utf8_lossy(&bytes).into_owned();

    (string, words.get(words_consumed..).unwrap_or(&[]))
}

/// Decoration numbers this crate cares about.
pub mod decoration {
    pub const BLOCK: u32 = 2;
    pub const BUFFER_BLOCK: u32 = 3;
    pub const LOCATION: u32 = 30;
    pub const BINDING: u32 = 33;
    pub const DESCRIPTOR_SET: u32 = 34;
    pub const OFFSET: u32 = 35;
}

/// Execution model declared by an `OpEntryPoint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionModel {
    Vertex,
    TessellationControl,
    TessellationEvaluation,
    Geometry,
    Fragment,
    GlCompute,
    Kernel,
}

impl ExecutionModel {
    fn from_word(word: u32) -> Result<Self, ParseError> {
        match word {
            0 => Ok(Self::Vertex),
            1 => Ok(Self::TessellationControl),
            2 => Ok(Self::TessellationEvaluation),
            3 => Ok(Self::Geometry),
            4 => Ok(Self::Fragment),
            5 => Ok(Self::GlCompute),
            6 => Ok(Self::Kernel),
            other => Err(ParseError::UnknownExecutionModel(other)),
        }
    }
}

/// Storage class of a pointer type or variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    UniformConstant,
    Input,
    Uniform,
    Output,
    Workgroup,
    CrossWorkgroup,
    Private,
    Function,
    Generic,
    PushConstant,
    AtomicCounter,
    Image,
    StorageBuffer,
}

impl StorageClass {
    fn from_word(word: u32) -> Result<Self, ParseError> {
        match word {
            0 => Ok(Self::UniformConstant),
            1 => Ok(Self::Input),
            2 => Ok(Self::Uniform),
            3 => Ok(Self::Output),
            4 => Ok(Self::Workgroup),
            5 => Ok(Self::CrossWorkgroup),
            6 => Ok(Self::Private),
            7 => Ok(Self::Function),
            8 => Ok(Self::Generic),
            9 => Ok(Self::PushConstant),
            10 => Ok(Self::AtomicCounter),
            11 => Ok(Self::Image),
            12 => Ok(Self::StorageBuffer),
            other => Err(ParseError::UnknownStorageClass(other)),
        }
    }
}

/// Image dimensionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dim {
    One,
    Two,
    Three,
    Cube,
    Rect,
    Buffer,
    SubpassData,
}

impl Dim {
    fn from_word(word: u32) -> Result<Self, ParseError> {
        match word {
            0 => Ok(Self::One),
            1 => Ok(Self::Two),
            2 => Ok(Self::Three),
            3 => Ok(Self::Cube),
            4 => Ok(Self::Rect),
            5 => Ok(Self::Buffer),
            6 => Ok(Self::SubpassData),
            other => Err(ParseError::UnknownDim(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<u32> {
        // magic, version 1.0, generator, bound, schema
        vec![MAGIC_NUMBER, 0x0001_0000, 0, 8, 0]
    }

    fn op(opcode: u16, operands: &[u32]) -> Vec<u32> {
        let mut words = vec![(((operands.len() + 1) as u32) << 16) | u32::from(opcode)];
        words.extend_from_slice(operands);
        words
    }

    #[test]
    fn rejects_unaligned_byte_length() {
        let err = parse_bytes(&[0x03, 0x02, 0x23]).unwrap_err();
        assert!(matches!(err, ParseError::MalformedBinary(3)));
    }

    #[test]
    fn rejects_bad_magic() {
        let words = vec![0xdead_beef, 0, 0, 0, 0];
        assert!(matches!(parse_words(&words), Err(ParseError::WrongHeader)));
    }

    #[test]
    fn decodes_little_endian_bytes() {
        let mut words = header();
        words.extend(op(19, &[1])); // OpTypeVoid %1
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();

        let module = parse_bytes(&bytes).unwrap();
        assert_eq!(module.version, (1, 0));
        assert!(matches!(
            module.instructions[0],
            Instruction::TypeVoid { result_id: 1 }
        ));
    }

    #[test]
    fn decodes_entry_point_name() {
        let mut words = header();
        // OpEntryPoint Fragment %2 "main"
        let mut operands = vec![4, 2];
        operands.extend_from_slice(&[u32::from_le_bytes(*b"main"), 0]);
        words.extend(op(15, &operands));

        let module = parse_words(&words).unwrap();
        match &module.instructions[0] {
            Instruction::EntryPoint {
                execution, name, ..
            } => {
                assert_eq!(*execution, ExecutionModel::Fragment);
                assert_eq!(name, "main");
            }
            other => panic!("unexpected instruction: {other:?}"),
        }
    }

    #[test]
    fn truncated_instruction_fails() {
        let mut words = header();
        words.push((4 << 16) | 71); // OpDecorate claiming 4 words, but stream ends
        assert!(matches!(
            parse_words(&words),
            Err(ParseError::IncompleteInstruction)
        ));
    }

    #[test]
    fn unknown_opcodes_are_preserved() {
        let mut words = header();
        words.extend(op(1234, &[7, 7]));
        let module = parse_words(&words).unwrap();
        assert!(matches!(
            module.instructions[0],
            Instruction::Unknown(1234, _)
        ));
    }
}
