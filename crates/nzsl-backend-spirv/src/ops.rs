//! SPIR-V opcode and enumerant values (core 1.0 subset used by the writer).

pub const MAGIC: u32 = 0x0723_0203;

// instructions
pub const OP_NAME: u16 = 5;
pub const OP_EXT_INST_IMPORT: u16 = 11;
pub const OP_EXT_INST: u16 = 12;
pub const OP_MEMORY_MODEL: u16 = 14;
pub const OP_ENTRY_POINT: u16 = 15;
pub const OP_EXECUTION_MODE: u16 = 16;
pub const OP_CAPABILITY: u16 = 17;
pub const OP_TYPE_VOID: u16 = 19;
pub const OP_TYPE_BOOL: u16 = 20;
pub const OP_TYPE_INT: u16 = 21;
pub const OP_TYPE_FLOAT: u16 = 22;
pub const OP_TYPE_VECTOR: u16 = 23;
pub const OP_TYPE_MATRIX: u16 = 24;
pub const OP_TYPE_IMAGE: u16 = 25;
pub const OP_TYPE_SAMPLED_IMAGE: u16 = 27;
pub const OP_TYPE_ARRAY: u16 = 28;
pub const OP_TYPE_STRUCT: u16 = 30;
pub const OP_TYPE_POINTER: u16 = 32;
pub const OP_TYPE_FUNCTION: u16 = 33;
pub const OP_CONSTANT_TRUE: u16 = 41;
pub const OP_CONSTANT_FALSE: u16 = 42;
pub const OP_CONSTANT: u16 = 43;
pub const OP_CONSTANT_COMPOSITE: u16 = 44;
pub const OP_FUNCTION: u16 = 54;
pub const OP_FUNCTION_PARAMETER: u16 = 55;
pub const OP_FUNCTION_END: u16 = 56;
pub const OP_FUNCTION_CALL: u16 = 57;
pub const OP_VARIABLE: u16 = 59;
pub const OP_LOAD: u16 = 61;
pub const OP_STORE: u16 = 62;
pub const OP_ACCESS_CHAIN: u16 = 65;
pub const OP_DECORATE: u16 = 71;
pub const OP_MEMBER_DECORATE: u16 = 72;
pub const OP_VECTOR_SHUFFLE: u16 = 79;
pub const OP_COMPOSITE_CONSTRUCT: u16 = 80;
pub const OP_COMPOSITE_EXTRACT: u16 = 81;
pub const OP_IMAGE_SAMPLE_IMPLICIT_LOD: u16 = 87;
pub const OP_CONVERT_F_TO_U: u16 = 109;
pub const OP_CONVERT_F_TO_S: u16 = 110;
pub const OP_CONVERT_S_TO_F: u16 = 111;
pub const OP_CONVERT_U_TO_F: u16 = 112;
pub const OP_BITCAST: u16 = 124;
pub const OP_S_NEGATE: u16 = 126;
pub const OP_F_NEGATE: u16 = 127;
pub const OP_I_ADD: u16 = 128;
pub const OP_F_ADD: u16 = 129;
pub const OP_I_SUB: u16 = 130;
pub const OP_F_SUB: u16 = 131;
pub const OP_I_MUL: u16 = 132;
pub const OP_F_MUL: u16 = 133;
pub const OP_U_DIV: u16 = 134;
pub const OP_S_DIV: u16 = 135;
pub const OP_F_DIV: u16 = 136;
pub const OP_U_MOD: u16 = 137;
pub const OP_S_REM: u16 = 139;
pub const OP_F_MOD: u16 = 141;
pub const OP_VECTOR_TIMES_SCALAR: u16 = 142;
pub const OP_MATRIX_TIMES_SCALAR: u16 = 143;
pub const OP_MATRIX_TIMES_VECTOR: u16 = 145;
pub const OP_MATRIX_TIMES_MATRIX: u16 = 146;
pub const OP_DOT: u16 = 148;
pub const OP_LOGICAL_OR: u16 = 166;
pub const OP_LOGICAL_AND: u16 = 167;
pub const OP_LOGICAL_NOT: u16 = 168;
pub const OP_I_EQUAL: u16 = 170;
pub const OP_I_NOT_EQUAL: u16 = 171;
pub const OP_U_GREATER_THAN: u16 = 172;
pub const OP_S_GREATER_THAN: u16 = 173;
pub const OP_U_GREATER_THAN_EQUAL: u16 = 174;
pub const OP_S_GREATER_THAN_EQUAL: u16 = 175;
pub const OP_U_LESS_THAN: u16 = 176;
pub const OP_S_LESS_THAN: u16 = 177;
pub const OP_U_LESS_THAN_EQUAL: u16 = 178;
pub const OP_S_LESS_THAN_EQUAL: u16 = 179;
pub const OP_F_ORD_EQUAL: u16 = 180;
pub const OP_F_ORD_NOT_EQUAL: u16 = 182;
pub const OP_F_ORD_LESS_THAN: u16 = 184;
pub const OP_F_ORD_GREATER_THAN: u16 = 186;
pub const OP_F_ORD_LESS_THAN_EQUAL: u16 = 188;
pub const OP_F_ORD_GREATER_THAN_EQUAL: u16 = 190;
pub const OP_LOGICAL_EQUAL: u16 = 164;
pub const OP_LOGICAL_NOT_EQUAL: u16 = 165;
pub const OP_LOOP_MERGE: u16 = 246;
pub const OP_SELECTION_MERGE: u16 = 247;
pub const OP_LABEL: u16 = 248;
pub const OP_BRANCH: u16 = 249;
pub const OP_BRANCH_CONDITIONAL: u16 = 250;
pub const OP_KILL: u16 = 252;
pub const OP_RETURN: u16 = 253;
pub const OP_RETURN_VALUE: u16 = 254;

// enumerants
pub const CAPABILITY_SHADER: u32 = 1;
pub const ADDRESSING_LOGICAL: u32 = 0;
pub const MEMORY_MODEL_GLSL450: u32 = 1;
pub const EXECUTION_MODEL_VERTEX: u32 = 0;
pub const EXECUTION_MODEL_FRAGMENT: u32 = 4;
pub const EXECUTION_MODE_ORIGIN_UPPER_LEFT: u32 = 7;
pub const EXECUTION_MODE_EARLY_FRAGMENT_TESTS: u32 = 9;
pub const EXECUTION_MODE_DEPTH_REPLACING: u32 = 12;
pub const EXECUTION_MODE_DEPTH_GREATER: u32 = 14;
pub const EXECUTION_MODE_DEPTH_LESS: u32 = 15;
pub const EXECUTION_MODE_DEPTH_UNCHANGED: u32 = 16;

pub const STORAGE_UNIFORM_CONSTANT: u32 = 0;
pub const STORAGE_INPUT: u32 = 1;
pub const STORAGE_UNIFORM: u32 = 2;
pub const STORAGE_OUTPUT: u32 = 3;
pub const STORAGE_FUNCTION: u32 = 7;

pub const DECORATION_BLOCK: u32 = 2;
pub const DECORATION_COL_MAJOR: u32 = 5;
pub const DECORATION_MATRIX_STRIDE: u32 = 7;
pub const DECORATION_BUILTIN: u32 = 11;
pub const DECORATION_LOCATION: u32 = 30;
pub const DECORATION_BINDING: u32 = 33;
pub const DECORATION_DESCRIPTOR_SET: u32 = 34;
pub const DECORATION_OFFSET: u32 = 35;
pub const DECORATION_ARRAY_STRIDE: u32 = 6;

pub const BUILTIN_POSITION: u32 = 0;
pub const BUILTIN_FRAG_COORD: u32 = 15;
pub const BUILTIN_FRAG_DEPTH: u32 = 22;

pub const DIM_1D: u32 = 0;
pub const DIM_2D: u32 = 1;
pub const DIM_3D: u32 = 2;
pub const DIM_CUBE: u32 = 3;

pub const FUNCTION_CONTROL_NONE: u32 = 0;
pub const SELECTION_CONTROL_NONE: u32 = 0;
pub const LOOP_CONTROL_NONE: u32 = 0;

// GLSL.std.450 extended instructions
pub const GLSL_STD_450: &str = "GLSL.std.450";
pub const GLSL_POW: u32 = 26;
pub const GLSL_EXP: u32 = 27;
pub const GLSL_F_MIN: u32 = 37;
pub const GLSL_U_MIN: u32 = 38;
pub const GLSL_S_MIN: u32 = 39;
pub const GLSL_F_MAX: u32 = 40;
pub const GLSL_U_MAX: u32 = 41;
pub const GLSL_S_MAX: u32 = 42;
pub const GLSL_LENGTH: u32 = 66;
pub const GLSL_CROSS: u32 = 68;
pub const GLSL_NORMALIZE: u32 = 69;
pub const GLSL_REFLECT: u32 = 71;
