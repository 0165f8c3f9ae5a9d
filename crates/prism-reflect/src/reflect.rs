//! Shader interface reflection.
//!
//! Walks a parsed module and extracts the pieces a pipeline cares about: the
//! stage, entry points, push-constant block members, and descriptor bindings.

use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::error::{ReflectError, Result};
use crate::parse::{self, decoration, Dim, ExecutionModel, Instruction, Spirv, StorageClass};

/// Shader stage derived from the module's execution model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    TessellationControl,
    TessellationEvaluation,
    Geometry,
    Fragment,
    Compute,
}

impl From<ExecutionModel> for ShaderStage {
    fn from(model: ExecutionModel) -> Self {
        match model {
            ExecutionModel::Vertex => Self::Vertex,
            ExecutionModel::TessellationControl => Self::TessellationControl,
            ExecutionModel::TessellationEvaluation => Self::TessellationEvaluation,
            ExecutionModel::Geometry => Self::Geometry,
            ExecutionModel::Fragment => Self::Fragment,
            ExecutionModel::GlCompute | ExecutionModel::Kernel => Self::Compute,
        }
    }
}

/// The kind of resource a descriptor binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    UniformBuffer,
    StorageBuffer,
    CombinedImageSampler,
    SampledImage,
    Sampler,
    StorageImage,
    InputAttachment,
}

/// One member of the module's push-constant block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushConstant {
    pub name: String,
    pub offset: u32,
    /// Byte size computed from the member's scalar type and row/column
    /// dimensions. Unsupported base types (structs, arrays, images) report 0.
    pub size: u32,
}

/// One descriptor binding declared by the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub set: u32,
    pub binding: u32,
    pub kind: DescriptorKind,
    /// Always 1: array descriptor counts are not parsed from reflection.
    pub count: u32,
    pub name: String,
}

/// The reflected interface of a single shader stage.
///
/// Created once per parsed binary and immutable thereafter.
#[derive(Debug, Clone)]
pub struct ShaderStageReflection {
    pub stage: ShaderStage,
    pub entry_points: Vec<String>,
    pub push_constants: Vec<PushConstant>,
    pub descriptors: Vec<Descriptor>,
}

impl ShaderStageReflection {
    /// Reflect a shader binary given as raw bytes.
    ///
    /// The byte length must be a multiple of the 32-bit code word size.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let module = parse::parse_bytes(bytes)?;
        Self::from_module(&module)
    }

    /// Reflect a shader binary given as host-order code words.
    pub fn from_words(words: &[u32]) -> Result<Self> {
        let module = parse::parse_words(words)?;
        Self::from_module(&module)
    }

    fn from_module(module: &Spirv) -> Result<Self> {
        let index = ModuleIndex::build(module);

        let first_entry = index
            .entry_points
            .first()
            .ok_or(ReflectError::MissingEntryPoint)?;
        let stage = ShaderStage::from(first_entry.0);
        let entry_points = index
            .entry_points
            .iter()
            .map(|(_, name)| (*name).clone())
            .collect();

        let mut push_constants = Vec::new();
        let mut descriptors = Vec::new();

        for &(type_id, var_id, storage_class) in &index.variables {
            match storage_class {
                StorageClass::PushConstant => {
                    index.reflect_push_constants(type_id, &mut push_constants)?;
                }
                StorageClass::Uniform
                | StorageClass::UniformConstant
                | StorageClass::StorageBuffer => {
                    if let Some(kind) = index.descriptor_kind(type_id, storage_class)? {
                        descriptors.push(index.reflect_descriptor(var_id, kind)?);
                    }
                }
                _ => {}
            }
        }

        trace!(
            ?stage,
            push_constants = push_constants.len(),
            descriptors = descriptors.len(),
            "reflected shader stage"
        );

        Ok(Self {
            stage,
            entry_points,
            push_constants,
            descriptors,
        })
    }
}

/// Id-indexed view of a module, built in one pass over the instruction stream.
struct ModuleIndex<'a> {
    names: HashMap<u32, &'a str>,
    member_names: HashMap<(u32, u32), &'a str>,
    decorations: HashMap<(u32, u32), &'a [u32]>,
    member_decorations: HashMap<(u32, u32, u32), &'a [u32]>,
    types: HashMap<u32, &'a Instruction>,
    entry_points: Vec<(ExecutionModel, &'a String)>,
    variables: Vec<(u32, u32, StorageClass)>,
}

impl<'a> ModuleIndex<'a> {
    fn build(module: &'a Spirv) -> Self {
        let mut index = Self {
            names: HashMap::new(),
            member_names: HashMap::new(),
            decorations: HashMap::new(),
            member_decorations: HashMap::new(),
            types: HashMap::new(),
            entry_points: Vec::new(),
            variables: Vec::new(),
        };

        for instruction in &module.instructions {
            match instruction {
                Instruction::Name { target_id, name } => {
                    index.names.insert(*target_id, name.as_str());
                }
                Instruction::MemberName {
                    target_id,
                    member,
                    name,
                } => {
                    index.member_names.insert((*target_id, *member), name);
                }
                Instruction::Decorate {
                    target_id,
                    decoration,
                    operands,
                } => {
                    index.decorations.insert((*target_id, *decoration), operands);
                }
                Instruction::MemberDecorate {
                    target_id,
                    member,
                    decoration,
                    operands,
                } => {
                    index
                        .member_decorations
                        .insert((*target_id, *member, *decoration), operands);
                }
                Instruction::EntryPoint {
                    execution, name, ..
                } => {
                    index.entry_points.push((*execution, name));
                }
                Instruction::Variable {
                    result_type_id,
                    result_id,
                    storage_class,
                    ..
                } => {
                    index
                        .variables
                        .push((*result_type_id, *result_id, *storage_class));
                }
                Instruction::TypeVoid { result_id }
                | Instruction::TypeBool { result_id }
                | Instruction::TypeInt { result_id, .. }
                | Instruction::TypeFloat { result_id, .. }
                | Instruction::TypeVector { result_id, .. }
                | Instruction::TypeMatrix { result_id, .. }
                | Instruction::TypeImage { result_id, .. }
                | Instruction::TypeSampler { result_id }
                | Instruction::TypeSampledImage { result_id, .. }
                | Instruction::TypeArray { result_id, .. }
                | Instruction::TypeRuntimeArray { result_id, .. }
                | Instruction::TypeStruct { result_id, .. }
                | Instruction::TypePointer { result_id, .. } => {
                    index.types.insert(*result_id, instruction);
                }
                _ => {}
            }
        }

        index
    }

    fn type_of(&self, id: u32) -> Result<&'a Instruction> {
        self.types
            .get(&id)
            .copied()
            .ok_or(ReflectError::DanglingTypeId(id))
    }

    /// Follow a pointer type to its pointee, then unwrap any array nesting.
    ///
    /// Malformed modules can make a type chain loop back on itself; a
    /// revisited id is an error, not an endless walk.
    fn pointee(&self, type_id: u32) -> Result<&'a Instruction> {
        let mut visited = HashSet::new();
        let mut current_id = type_id;
        loop {
            if !visited.insert(current_id) {
                return Err(ReflectError::CyclicType(current_id));
            }
            match self.type_of(current_id)? {
                Instruction::TypePointer { type_id, .. }
                | Instruction::TypeArray { type_id, .. }
                | Instruction::TypeRuntimeArray { type_id, .. } => current_id = *type_id,
                other => return Ok(other),
            }
        }
    }

    /// Byte size of a scalar/vector/matrix member type: base scalar width
    /// times the row and column dimensions. Anything else reports 0.
    fn member_size(&self, type_id: u32) -> Result<u32> {
        self.member_size_guarded(type_id, &mut HashSet::new())
    }

    fn member_size_guarded(&self, type_id: u32, visited: &mut HashSet<u32>) -> Result<u32> {
        if !visited.insert(type_id) {
            return Err(ReflectError::CyclicType(type_id));
        }
        Ok(match self.type_of(type_id)? {
            Instruction::TypeFloat { width, .. } | Instruction::TypeInt { width, .. } => width / 8,
            Instruction::TypeBool { .. } => 1,
            Instruction::TypeVector {
                component_id,
                count,
                ..
            } => self.member_size_guarded(*component_id, visited)? * count,
            Instruction::TypeMatrix {
                column_type_id,
                column_count,
                ..
            } => self.member_size_guarded(*column_type_id, visited)? * column_count,
            _ => 0,
        })
    }

    fn reflect_push_constants(&self, type_id: u32, out: &mut Vec<PushConstant>) -> Result<()> {
        let Instruction::TypeStruct {
            result_id,
            member_type_ids,
        } = self.pointee(type_id)?
        else {
            // A push-constant variable always points at a block struct.
            return Ok(());
        };

        for (member, &member_type_id) in member_type_ids.iter().enumerate() {
            let member = member as u32;
            let name = self
                .member_names
                .get(&(*result_id, member))
                .copied()
                .unwrap_or_default()
                .to_owned();

            let offset = self
                .member_decorations
                .get(&(*result_id, member, decoration::OFFSET))
                .and_then(|operands| operands.first().copied())
                .ok_or_else(|| ReflectError::MissingDecoration {
                    id: *result_id,
                    name: name.clone(),
                    decoration: "Offset",
                })?;

            let size = self.member_size(member_type_id)?;

            if offset % 4 != 0 || size % 4 != 0 {
                return Err(ReflectError::MisalignedPushConstant { name, offset, size });
            }

            out.push(PushConstant { name, offset, size });
        }

        Ok(())
    }

    /// Classify the resource behind a variable's pointer type, or `None` for
    /// opaque types this layer does not bind (and therefore skips).
    fn descriptor_kind(
        &self,
        type_id: u32,
        storage_class: StorageClass,
    ) -> Result<Option<DescriptorKind>> {
        let pointee = self.pointee(type_id)?;

        let kind = match (storage_class, pointee) {
            (StorageClass::Uniform, Instruction::TypeStruct { result_id, .. }) => {
                if self
                    .decorations
                    .contains_key(&(*result_id, decoration::BUFFER_BLOCK))
                {
                    DescriptorKind::StorageBuffer
                } else {
                    DescriptorKind::UniformBuffer
                }
            }
            (StorageClass::StorageBuffer, Instruction::TypeStruct { .. }) => {
                DescriptorKind::StorageBuffer
            }
            (StorageClass::UniformConstant, Instruction::TypeSampledImage { .. }) => {
                DescriptorKind::CombinedImageSampler
            }
            (StorageClass::UniformConstant, Instruction::TypeSampler { .. }) => {
                DescriptorKind::Sampler
            }
            (StorageClass::UniformConstant, Instruction::TypeImage { dim, sampled, .. }) => {
                if *dim == Dim::SubpassData {
                    DescriptorKind::InputAttachment
                } else if *sampled == 2 {
                    DescriptorKind::StorageImage
                } else {
                    DescriptorKind::SampledImage
                }
            }
            _ => {
                trace!(type_id, ?storage_class, "skipping unbindable resource type");
                return Ok(None);
            }
        };

        Ok(Some(kind))
    }

    fn reflect_descriptor(&self, var_id: u32, kind: DescriptorKind) -> Result<Descriptor> {
        let name = self.names.get(&var_id).copied().unwrap_or_default();

        let lookup = |decoration: u32, label: &'static str| -> Result<u32> {
            self.decorations
                .get(&(var_id, decoration))
                .and_then(|operands| operands.first().copied())
                .ok_or(ReflectError::MissingDecoration {
                    id: var_id,
                    name: name.to_owned(),
                    decoration: label,
                })
        };

        Ok(Descriptor {
            set: lookup(decoration::DESCRIPTOR_SET, "DescriptorSet")?,
            binding: lookup(decoration::BINDING, "Binding")?,
            kind,
            count: 1,
            name: name.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::MAGIC_NUMBER;

    fn header() -> Vec<u32> {
        vec![MAGIC_NUMBER, 0x0001_0000, 0, 64, 0]
    }

    fn op(words: &mut Vec<u32>, opcode: u16, operands: &[u32]) {
        words.push((((operands.len() + 1) as u32) << 16) | u32::from(opcode));
        words.extend_from_slice(operands);
    }

    fn str_words(s: &str) -> Vec<u32> {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    fn entry_point(words: &mut Vec<u32>, model: u32, name: &str) {
        let mut operands = vec![model, 1];
        operands.extend(str_words(name));
        op(words, 15, &operands);
    }

    fn name(words: &mut Vec<u32>, id: u32, text: &str) {
        let mut operands = vec![id];
        operands.extend(str_words(text));
        op(words, 5, &operands);
    }

    fn member_name(words: &mut Vec<u32>, id: u32, member: u32, text: &str) {
        let mut operands = vec![id, member];
        operands.extend(str_words(text));
        op(words, 6, &operands);
    }

    // %20 f32, %21 vec4<f32>
    fn scalar_types(words: &mut Vec<u32>) {
        op(words, 22, &[20, 32]);
        op(words, 23, &[21, 20, 4]);
    }

    #[test]
    fn stage_and_entry_point() {
        let mut words = header();
        entry_point(&mut words, 0, "main");

        let reflection = ShaderStageReflection::from_words(&words).unwrap();
        assert_eq!(reflection.stage, ShaderStage::Vertex);
        assert_eq!(reflection.entry_points, vec!["main".to_owned()]);
        assert!(reflection.push_constants.is_empty());
        assert!(reflection.descriptors.is_empty());
    }

    #[test]
    fn missing_entry_point_fails() {
        let words = header();
        assert!(matches!(
            ShaderStageReflection::from_words(&words),
            Err(ReflectError::MissingEntryPoint)
        ));
    }

    #[test]
    fn unaligned_binary_fails() {
        let err = ShaderStageReflection::from_bytes(&[1, 2, 3, 4, 5]).unwrap_err();
        assert!(matches!(
            err,
            ReflectError::Parse(crate::ParseError::MalformedBinary(5))
        ));
    }

    #[test]
    fn push_constant_members() {
        let mut words = header();
        entry_point(&mut words, 0, "main");
        scalar_types(&mut words);
        op(&mut words, 30, &[22, 20, 21]); // %22 struct { f32, vec4 }
        member_name(&mut words, 22, 0, "time");
        member_name(&mut words, 22, 1, "tint");
        op(&mut words, 72, &[22, 0, decoration::OFFSET, 0]);
        op(&mut words, 72, &[22, 1, decoration::OFFSET, 16]);
        op(&mut words, 71, &[22, decoration::BLOCK]);
        op(&mut words, 32, &[23, 9, 22]); // %23 ptr PushConstant %22
        op(&mut words, 59, &[23, 24, 9]); // %24 variable

        let reflection = ShaderStageReflection::from_words(&words).unwrap();
        assert_eq!(
            reflection.push_constants,
            vec![
                PushConstant {
                    name: "time".to_owned(),
                    offset: 0,
                    size: 4,
                },
                PushConstant {
                    name: "tint".to_owned(),
                    offset: 16,
                    size: 16,
                },
            ]
        );
    }

    #[test]
    fn push_constant_missing_offset_fails() {
        let mut words = header();
        entry_point(&mut words, 0, "main");
        scalar_types(&mut words);
        op(&mut words, 30, &[22, 20]);
        member_name(&mut words, 22, 0, "time");
        op(&mut words, 32, &[23, 9, 22]);
        op(&mut words, 59, &[23, 24, 9]);

        assert!(matches!(
            ShaderStageReflection::from_words(&words),
            Err(ReflectError::MissingDecoration {
                decoration: "Offset",
                ..
            })
        ));
    }

    #[test]
    fn misaligned_push_constant_fails() {
        let mut words = header();
        entry_point(&mut words, 0, "main");
        scalar_types(&mut words);
        op(&mut words, 30, &[22, 20]);
        member_name(&mut words, 22, 0, "time");
        op(&mut words, 72, &[22, 0, decoration::OFFSET, 2]);
        op(&mut words, 32, &[23, 9, 22]);
        op(&mut words, 59, &[23, 24, 9]);

        assert!(matches!(
            ShaderStageReflection::from_words(&words),
            Err(ReflectError::MisalignedPushConstant { offset: 2, .. })
        ));
    }

    #[test]
    fn self_referential_pointer_type_fails() {
        let mut words = header();
        entry_point(&mut words, 0, "main");
        op(&mut words, 32, &[23, 9, 23]); // %23 ptr PushConstant %23
        op(&mut words, 59, &[23, 24, 9]);

        assert!(matches!(
            ShaderStageReflection::from_words(&words),
            Err(ReflectError::CyclicType(23))
        ));
    }

    #[test]
    fn self_referential_member_type_fails() {
        let mut words = header();
        entry_point(&mut words, 0, "main");
        op(&mut words, 23, &[21, 21, 4]); // %21 vec4 whose component is itself
        op(&mut words, 30, &[22, 21]);
        member_name(&mut words, 22, 0, "time");
        op(&mut words, 72, &[22, 0, decoration::OFFSET, 0]);
        op(&mut words, 32, &[23, 9, 22]);
        op(&mut words, 59, &[23, 24, 9]);

        assert!(matches!(
            ShaderStageReflection::from_words(&words),
            Err(ReflectError::CyclicType(21))
        ));
    }

    #[test]
    fn uniform_buffer_descriptor() {
        let mut words = header();
        entry_point(&mut words, 0, "main");
        scalar_types(&mut words);
        op(&mut words, 30, &[30, 21]); // %30 struct { vec4 }
        op(&mut words, 71, &[30, decoration::BLOCK]);
        op(&mut words, 32, &[31, 2, 30]); // ptr Uniform
        op(&mut words, 59, &[31, 32, 2]);
        name(&mut words, 32, "camera");
        op(&mut words, 71, &[32, decoration::DESCRIPTOR_SET, 0]);
        op(&mut words, 71, &[32, decoration::BINDING, 0]);

        let reflection = ShaderStageReflection::from_words(&words).unwrap();
        assert_eq!(
            reflection.descriptors,
            vec![Descriptor {
                set: 0,
                binding: 0,
                kind: DescriptorKind::UniformBuffer,
                count: 1,
                name: "camera".to_owned(),
            }]
        );
    }

    #[test]
    fn buffer_block_is_a_storage_buffer() {
        let mut words = header();
        entry_point(&mut words, 5, "main");
        scalar_types(&mut words);
        op(&mut words, 30, &[30, 21]);
        op(&mut words, 71, &[30, decoration::BUFFER_BLOCK]);
        op(&mut words, 32, &[31, 2, 30]);
        op(&mut words, 59, &[31, 32, 2]);
        op(&mut words, 71, &[32, decoration::DESCRIPTOR_SET, 0]);
        op(&mut words, 71, &[32, decoration::BINDING, 3]);

        let reflection = ShaderStageReflection::from_words(&words).unwrap();
        assert_eq!(reflection.stage, ShaderStage::Compute);
        assert_eq!(reflection.descriptors[0].kind, DescriptorKind::StorageBuffer);
        assert_eq!(reflection.descriptors[0].binding, 3);
    }

    #[test]
    fn image_descriptor_kinds() {
        let mut words = header();
        entry_point(&mut words, 4, "main");
        scalar_types(&mut words);
        op(&mut words, 25, &[40, 20, 1, 0, 0, 0, 1, 0]); // %40 image 2D sampled
        op(&mut words, 27, &[41, 40]); // %41 sampled image
        op(&mut words, 32, &[42, 0, 41]); // ptr UniformConstant
        op(&mut words, 59, &[42, 43, 0]);
        op(&mut words, 71, &[43, decoration::DESCRIPTOR_SET, 0]);
        op(&mut words, 71, &[43, decoration::BINDING, 1]);

        op(&mut words, 25, &[44, 20, 1, 0, 0, 0, 2, 0]); // %44 storage image
        op(&mut words, 32, &[45, 0, 44]);
        op(&mut words, 59, &[45, 46, 0]);
        op(&mut words, 71, &[46, decoration::DESCRIPTOR_SET, 1]);
        op(&mut words, 71, &[46, decoration::BINDING, 0]);

        op(&mut words, 25, &[47, 20, 6, 0, 0, 0, 2, 0]); // %47 subpass input
        op(&mut words, 32, &[48, 0, 47]);
        op(&mut words, 59, &[48, 49, 0]);
        op(&mut words, 71, &[49, decoration::DESCRIPTOR_SET, 1]);
        op(&mut words, 71, &[49, decoration::BINDING, 1]);

        let reflection = ShaderStageReflection::from_words(&words).unwrap();
        let kinds: Vec<_> = reflection.descriptors.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DescriptorKind::CombinedImageSampler,
                DescriptorKind::StorageImage,
                DescriptorKind::InputAttachment,
            ]
        );
        assert!(reflection.descriptors.iter().all(|d| d.count == 1));
    }

    #[test]
    fn missing_binding_decoration_fails() {
        let mut words = header();
        entry_point(&mut words, 4, "main");
        scalar_types(&mut words);
        op(&mut words, 25, &[40, 20, 1, 0, 0, 0, 1, 0]);
        op(&mut words, 27, &[41, 40]);
        op(&mut words, 32, &[42, 0, 41]);
        op(&mut words, 59, &[42, 43, 0]);
        op(&mut words, 71, &[43, decoration::DESCRIPTOR_SET, 0]);

        assert!(matches!(
            ShaderStageReflection::from_words(&words),
            Err(ReflectError::MissingDecoration {
                decoration: "Binding",
                ..
            })
        ));
    }
}
