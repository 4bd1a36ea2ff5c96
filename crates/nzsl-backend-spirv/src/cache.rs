//! Shared type/constant interning for the SPIR-V writer.
//!
//! Every structurally-equal type or constant gets exactly one result id; the
//! cache records declarations in registration order, which is already a valid
//! dependency order because component ids are registered before the composite
//! that uses them.

use std::collections::HashMap;
use std::hash::Hash;

use crate::ops;
use crate::section::Section;

/// A SPIR-V type, keyed structurally. Component references are result ids,
/// so equal trees intern to the same id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SpirvType {
    Void,
    Bool,
    Int { signed: bool },
    Float,
    Vector { component: u32, count: u32 },
    Matrix { column: u32, count: u32 },
    Array {
        element: u32,
        length: u32,
        /// std140 stride; `Some` marks a block-context array that gets an
        /// `ArrayStride` decoration (a distinct type from the plain one).
        stride: Option<u32>,
    },
    Struct {
        members: Vec<u32>,
        /// std140 member offsets; `Some` marks a Block-decorated struct.
        offsets: Option<Vec<u32>>,
        /// Matrix members need a stride decoration inside blocks.
        matrix_strides: Vec<Option<u32>>,
    },
    Pointer { storage: u32, pointee: u32 },
    Function { ret: u32, params: Vec<u32> },
    Image { sampled: u32, dim: u32, arrayed: bool },
    SampledImage { image: u32 },
}

/// A SPIR-V constant, keyed by type id and value words.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SpirvConstant {
    Bool { ty: u32, value: bool },
    Scalar { ty: u32, word: u32 },
    Composite { ty: u32, parts: Vec<u32> },
}

/// A module-scope variable (interface globals, uniforms, samplers).
pub struct GlobalVariable {
    pub id: u32,
    pub pointer_type: u32,
    pub storage: u32,
    pub name: String,
}

/// Deduplicating id assignment for types and constants.
///
/// `next_id` is the single id allocator for the whole module: labels and
/// instruction results draw from the same counter so the final bound is just
/// the next unallocated id.
#[derive(Default)]
pub struct ConstantCache {
    next_id: u32,
    types: Vec<(SpirvType, u32)>,
    type_ids: HashMap<SpirvType, u32>,
    constants: Vec<(SpirvConstant, u32)>,
    constant_ids: HashMap<SpirvConstant, u32>,
    globals: Vec<GlobalVariable>,
}

impl ConstantCache {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// Allocates a fresh result id.
    pub fn allocate(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// The module bound (one past the largest allocated id).
    pub fn bound(&self) -> u32 {
        self.next_id
    }

    /// Interns a type, returning the existing id on a repeat registration.
    pub fn register_type(&mut self, ty: SpirvType) -> u32 {
        if let Some(&id) = self.type_ids.get(&ty) {
            return id;
        }
        let id = self.allocate();
        self.type_ids.insert(ty.clone(), id);
        self.types.push((ty, id));
        id
    }

    /// Interns a constant.
    pub fn register_constant(&mut self, constant: SpirvConstant) -> u32 {
        if let Some(&id) = self.constant_ids.get(&constant) {
            return id;
        }
        let id = self.allocate();
        self.constant_ids.insert(constant.clone(), id);
        self.constants.push((constant, id));
        id
    }

    /// Registers a module-scope variable (no deduplication: each global is
    /// its own object).
    pub fn register_global(&mut self, pointer_type: u32, storage: u32, name: &str) -> u32 {
        let id = self.allocate();
        self.globals.push(GlobalVariable {
            id,
            pointer_type,
            storage,
            name: name.to_owned(),
        });
        id
    }

    pub fn globals(&self) -> &[GlobalVariable] {
        &self.globals
    }

    /// Emits all interned declarations, in registration order, into the
    /// declaration and annotation sections.
    pub fn write(&self, declarations: &mut Section, annotations: &mut Section, debug: &mut Section) {
        for (ty, id) in &self.types {
            let id = *id;
            match ty {
                SpirvType::Void => declarations.instruction(ops::OP_TYPE_VOID, &[id]),
                SpirvType::Bool => declarations.instruction(ops::OP_TYPE_BOOL, &[id]),
                SpirvType::Int { signed } => declarations.instruction(
                    ops::OP_TYPE_INT,
                    &[id, 32, u32::from(*signed)],
                ),
                SpirvType::Float => declarations.instruction(ops::OP_TYPE_FLOAT, &[id, 32]),
                SpirvType::Vector { component, count } => {
                    declarations.instruction(ops::OP_TYPE_VECTOR, &[id, *component, *count])
                }
                SpirvType::Matrix { column, count } => {
                    declarations.instruction(ops::OP_TYPE_MATRIX, &[id, *column, *count])
                }
                SpirvType::Array {
                    element,
                    length,
                    stride,
                } => {
                    declarations.instruction(ops::OP_TYPE_ARRAY, &[id, *element, *length]);
                    if let Some(stride) = stride {
                        annotations.instruction(
                            ops::OP_DECORATE,
                            &[id, ops::DECORATION_ARRAY_STRIDE, *stride],
                        );
                    }
                }
                SpirvType::Struct {
                    members,
                    offsets,
                    matrix_strides,
                } => {
                    let mut operands = vec![id];
                    operands.extend_from_slice(members);
                    declarations.instruction(ops::OP_TYPE_STRUCT, &operands);
                    if let Some(offsets) = offsets {
                        annotations.instruction(ops::OP_DECORATE, &[id, ops::DECORATION_BLOCK]);
                        for (member, offset) in offsets.iter().enumerate() {
                            annotations.instruction(
                                ops::OP_MEMBER_DECORATE,
                                &[id, member as u32, ops::DECORATION_OFFSET, *offset],
                            );
                        }
                        for (member, stride) in matrix_strides.iter().enumerate() {
                            if let Some(stride) = stride {
                                annotations.instruction(
                                    ops::OP_MEMBER_DECORATE,
                                    &[id, member as u32, ops::DECORATION_COL_MAJOR],
                                );
                                annotations.instruction(
                                    ops::OP_MEMBER_DECORATE,
                                    &[id, member as u32, ops::DECORATION_MATRIX_STRIDE, *stride],
                                );
                            }
                        }
                    }
                }
                SpirvType::Pointer { storage, pointee } => {
                    declarations.instruction(ops::OP_TYPE_POINTER, &[id, *storage, *pointee])
                }
                SpirvType::Function { ret, params } => {
                    let mut operands = vec![id, *ret];
                    operands.extend_from_slice(params);
                    declarations.instruction(ops::OP_TYPE_FUNCTION, &operands);
                }
                SpirvType::Image {
                    sampled,
                    dim,
                    arrayed,
                } => declarations.instruction(
                    ops::OP_TYPE_IMAGE,
                    &[id, *sampled, *dim, 0, u32::from(*arrayed), 0, 1, 0],
                ),
                SpirvType::SampledImage { image } => {
                    declarations.instruction(ops::OP_TYPE_SAMPLED_IMAGE, &[id, *image])
                }
            }
        }

        for (constant, id) in &self.constants {
            let id = *id;
            match constant {
                SpirvConstant::Bool { ty, value } => {
                    let opcode = if *value {
                        ops::OP_CONSTANT_TRUE
                    } else {
                        ops::OP_CONSTANT_FALSE
                    };
                    declarations.instruction(opcode, &[*ty, id]);
                }
                SpirvConstant::Scalar { ty, word } => {
                    declarations.instruction(ops::OP_CONSTANT, &[*ty, id, *word])
                }
                SpirvConstant::Composite { ty, parts } => {
                    let mut operands = vec![*ty, id];
                    operands.extend_from_slice(parts);
                    declarations.instruction(ops::OP_CONSTANT_COMPOSITE, &operands);
                }
            }
        }

        for global in &self.globals {
            declarations.instruction(
                ops::OP_VARIABLE,
                &[global.pointer_type, global.id, global.storage],
            );
            debug.instruction_str(ops::OP_NAME, &[global.id], &global.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_types_share_one_id() {
        let mut cache = ConstantCache::new();
        let float = cache.register_type(SpirvType::Float);
        let float_again = cache.register_type(SpirvType::Float);
        assert_eq!(float, float_again);
        let vec4 = cache.register_type(SpirvType::Vector {
            component: float,
            count: 4,
        });
        assert_ne!(float, vec4);
        assert_eq!(cache.bound(), vec4 + 1);
    }

    #[test]
    fn equal_constants_share_one_id() {
        let mut cache = ConstantCache::new();
        let float = cache.register_type(SpirvType::Float);
        let one = cache.register_constant(SpirvConstant::Scalar {
            ty: float,
            word: 1.0f32.to_bits(),
        });
        let one_again = cache.register_constant(SpirvConstant::Scalar {
            ty: float,
            word: 1.0f32.to_bits(),
        });
        assert_eq!(one, one_again);
    }

    #[test]
    fn write_emits_registration_order() {
        let mut cache = ConstantCache::new();
        let void = cache.register_type(SpirvType::Void);
        let float = cache.register_type(SpirvType::Float);
        let mut declarations = Section::new();
        let mut annotations = Section::new();
        let mut debug = Section::new();
        cache.write(&mut declarations, &mut annotations, &mut debug);
        let words = declarations.words();
        // OpTypeVoid %void first, OpTypeFloat %float 32 second
        assert_eq!(words[0] & 0xFFFF, u32::from(ops::OP_TYPE_VOID));
        assert_eq!(words[1], void);
        assert_eq!(words[2] & 0xFFFF, u32::from(ops::OP_TYPE_FLOAT));
        assert_eq!(words[3], float);
    }

    #[test]
    fn block_struct_gets_offset_decorations() {
        let mut cache = ConstantCache::new();
        let float = cache.register_type(SpirvType::Float);
        cache.register_type(SpirvType::Struct {
            members: vec![float],
            offsets: Some(vec![0]),
            matrix_strides: vec![None],
        });
        let mut declarations = Section::new();
        let mut annotations = Section::new();
        let mut debug = Section::new();
        cache.write(&mut declarations, &mut annotations, &mut debug);
        let words = annotations.words();
        assert_eq!(words[0] & 0xFFFF, u32::from(ops::OP_DECORATE));
        assert_eq!(words[2], ops::DECORATION_BLOCK);
    }
}
