//! SPIR-V writer (Vulkan 1.0 baseline).
//!
//! Pipeline: the input module is sanitized with the full rewrite set (loop
//! lowering, branch splitting, alias/const/option/matrix-cast removal), then
//! a pre-pass interns every needed type and constant through the shared
//! [`cache::ConstantCache`], globals are laid out (uniform blocks with std140
//! offsets, sampled images, entry-point interface variables), and function
//! bodies are emitted in a single linear pass.

mod cache;
mod ops;
mod section;

pub use cache::{ConstantCache, SpirvConstant, SpirvType};
pub use section::Section;

use std::collections::HashMap;

use bytes::BufMut;

use nzsl_ast::{
    AssignOp, BinaryOp, BuiltinEntry, ConstantValue, DepthWriteMode, ExprValue, Expression,
    ExpressionKind, ExpressionType, FunctionDeclaration, FunctionIndex, ImageDim, IntrinsicType,
    Module, PrimitiveType, ShaderStage, ShaderStageFlags, Statement, StatementKind, StructIndex,
    UnaryOp, VariableIndex,
};
use nzsl_backend_core::{Writer, WriterError, WriterOutput, WriterStates};

/// Target SPIR-V environment.
#[derive(Clone, Copy, Debug)]
pub struct SpirvEnv {
    pub spv_major: u32,
    pub spv_minor: u32,
}

impl Default for SpirvEnv {
    fn default() -> Self {
        Self {
            spv_major: 1,
            spv_minor: 0,
        }
    }
}

/// The SPIR-V writer.
#[derive(Default)]
pub struct SpirvWriter {
    pub env: SpirvEnv,
}

impl Writer for SpirvWriter {
    fn name(&self) -> &str {
        "SPIR-V"
    }

    fn targets(&self) -> &[&str] {
        &["spirv", "spv"]
    }

    fn generate(
        &self,
        module: &Module,
        states: &WriterStates,
    ) -> Result<WriterOutput, WriterError> {
        let sanitized;
        let module = if states.sanitized {
            module
        } else {
            let mut options = states.sanitizer_options();
            options.reduce_loops_to_while = true;
            options.remove_aliases = true;
            options.remove_compound_assignments = true;
            options.remove_const_declaration = true;
            options.remove_matrix_cast = true;
            options.remove_option_declaration = true;
            options.remove_scalar_swizzling = true;
            options.split_multiple_branches = true;
            sanitized = nzsl_sanitizer::sanitize(module, &options)?;
            &sanitized
        };

        let optimized;
        let module = if states.optimize {
            let propagated = nzsl_opt::propagate_constants(module)?;
            optimized = nzsl_opt::eliminate_unused(
                &propagated,
                &nzsl_opt::DependencyConfig {
                    used_shader_stages: ShaderStageFlags::ALL,
                },
            );
            &optimized
        } else {
            module
        };

        let words = Emitter::new(module, self.env).generate()?;
        let mut bytes = bytes::BytesMut::with_capacity(words.len() * 4);
        for word in words {
            bytes.put_u32_le(word);
        }
        Ok(WriterOutput::binary("shader.spv", bytes.to_vec()))
    }
}

/// Generates the raw word stream for a sanitized module.
pub fn generate_words(module: &Module, env: SpirvEnv) -> Result<Vec<u32>, WriterError> {
    Emitter::new(module, env).generate()
}

struct StructInfo {
    members: Vec<(String, ExpressionType)>,
}

struct FuncInfo {
    id: u32,
    return_type: ExpressionType,
}

#[derive(Clone, Copy)]
enum VarSlot {
    /// Module-scope pointer (uniform, sampler, entry IO).
    Global { id: u32, storage: u32 },
    /// Function-scope pointer.
    Local { id: u32 },
    /// SSA value (function parameters are passed by value).
    Value { id: u32 },
}

struct EntryIo {
    global: u32,
    ty: ExpressionType,
}

struct Emitter<'m> {
    module: &'m Module,
    env: SpirvEnv,
    cache: ConstantCache,
    structs: HashMap<StructIndex, StructInfo>,
    functions: HashMap<FunctionIndex, FuncInfo>,
    globals: HashMap<VariableIndex, (u32, u32, ExpressionType)>,
    glsl_ext: Option<u32>,

    debug: Section,
    annotations: Section,
    body: Section,
    /// `OpEntryPoint` / `OpExecutionMode` payloads gathered while emitting.
    entry_points: Vec<(ShaderStage, u32, String, Vec<u32>, Vec<Vec<u32>>)>,

    // per-function state
    locals: HashMap<VariableIndex, VarSlot>,
    terminated: bool,
    loop_targets: Vec<(u32, u32)>,
}

impl<'m> Emitter<'m> {
    fn new(module: &'m Module, env: SpirvEnv) -> Self {
        Self {
            module,
            env,
            cache: ConstantCache::new(),
            structs: HashMap::new(),
            functions: HashMap::new(),
            globals: HashMap::new(),
            glsl_ext: None,
            debug: Section::new(),
            annotations: Section::new(),
            body: Section::new(),
            entry_points: Vec::new(),
            locals: HashMap::new(),
            terminated: false,
            loop_targets: Vec::new(),
        }
    }

    fn generate(mut self) -> Result<Vec<u32>, WriterError> {
        // declaration registry pre-pass
        for statement in all_statements(self.module) {
            if let StatementKind::DeclareStruct {
                struct_index: Some(index),
                description,
                ..
            } = &statement.kind
            {
                self.structs.insert(
                    *index,
                    StructInfo {
                        members: description
                            .members
                            .iter()
                            .map(|m| {
                                (
                                    m.name.clone(),
                                    m.ty.resolved().cloned().unwrap_or(ExpressionType::NoType),
                                )
                            })
                            .collect(),
                    },
                );
            }
        }

        // module-scope variables with their binding decorations
        let statements: Vec<&Statement> = all_statements(self.module).collect();
        for statement in &statements {
            if let StatementKind::DeclareExternal { variables, .. } = &statement.kind {
                for var in variables {
                    let Some(index) = var.variable_index else { continue };
                    let ty = var.ty.resolved().cloned().unwrap_or(ExpressionType::NoType);
                    let (pointee, storage) = match &ty {
                        ExpressionType::Uniform(struct_index) => (
                            self.struct_type_id(*struct_index, true)?,
                            ops::STORAGE_UNIFORM,
                        ),
                        ExpressionType::Sampler { .. } => {
                            (self.type_id(&ty, false)?, ops::STORAGE_UNIFORM_CONSTANT)
                        }
                        other => (self.type_id(other, true)?, ops::STORAGE_UNIFORM),
                    };
                    let pointer = self.cache.register_type(SpirvType::Pointer {
                        storage,
                        pointee,
                    });
                    let id = self.cache.register_global(pointer, storage, &var.name);
                    let binding = var
                        .binding_index
                        .as_ref()
                        .and_then(|b| b.resolved())
                        .copied()
                        .unwrap_or(0);
                    let set = var
                        .binding_set
                        .as_ref()
                        .and_then(|b| b.resolved())
                        .copied()
                        .unwrap_or(0);
                    self.annotations.instruction(
                        ops::OP_DECORATE,
                        &[id, ops::DECORATION_BINDING, binding],
                    );
                    self.annotations.instruction(
                        ops::OP_DECORATE,
                        &[id, ops::DECORATION_DESCRIPTOR_SET, set],
                    );
                    self.globals.insert(index, (id, storage, ty));
                }
            }
        }

        // function ids first so forward calls resolve
        for statement in &statements {
            if let StatementKind::DeclareFunction(func) = &statement.kind {
                if let Some(index) = func.func_index {
                    let id = self.cache.allocate();
                    self.functions.insert(
                        index,
                        FuncInfo {
                            id,
                            return_type: func
                                .return_type
                                .as_ref()
                                .and_then(|t| t.resolved())
                                .cloned()
                                .unwrap_or(ExpressionType::NoType),
                        },
                    );
                    self.debug.instruction_str(ops::OP_NAME, &[id], &func.name);
                }
            }
        }

        for statement in &statements {
            if let StatementKind::DeclareFunction(func) = &statement.kind {
                self.emit_function(func)?;
            }
        }

        // header assembles last: the id bound is only known now
        let mut output = Vec::new();
        output.push(ops::MAGIC);
        output.push((self.env.spv_major << 16) | (self.env.spv_minor << 8));
        output.push(0); // generator
        output.push(self.cache.bound());
        output.push(0); // schema

        let mut header = Section::new();
        header.instruction(ops::OP_CAPABILITY, &[ops::CAPABILITY_SHADER]);
        if let Some(ext) = self.glsl_ext {
            header.instruction_str(ops::OP_EXT_INST_IMPORT, &[ext], ops::GLSL_STD_450);
        }
        header.instruction(
            ops::OP_MEMORY_MODEL,
            &[ops::ADDRESSING_LOGICAL, ops::MEMORY_MODEL_GLSL450],
        );
        for (stage, id, name, interface, modes) in &self.entry_points {
            let model = match stage {
                ShaderStage::Fragment => ops::EXECUTION_MODEL_FRAGMENT,
                ShaderStage::Vertex => ops::EXECUTION_MODEL_VERTEX,
            };
            let mut operands = vec![model, *id];
            let name_words = section::encode_string(name);
            operands.extend(name_words);
            operands.extend(interface);
            header.instruction(ops::OP_ENTRY_POINT, &operands);
            for mode in modes {
                let mut operands = vec![*id];
                operands.extend(mode);
                header.instruction(ops::OP_EXECUTION_MODE, &operands);
            }
        }
        let mut declarations = Section::new();
        let mut annotations = self.annotations;
        let mut debug = Section::new();
        self.cache.write(&mut declarations, &mut annotations, &mut debug);

        header.merge_into(&mut output);
        self.debug.merge_into(&mut output);
        debug.merge_into(&mut output);
        annotations.merge_into(&mut output);
        declarations.merge_into(&mut output);
        self.body.merge_into(&mut output);
        Ok(output)
    }

    // ---- types and constants ----

    fn struct_type_id(&mut self, index: StructIndex, layout: bool) -> Result<u32, WriterError> {
        let members = self
            .structs
            .get(&index)
            .ok_or_else(|| WriterError::Unsupported(format!("unknown struct #{index}")))?
            .members
            .clone();
        let member_types: Vec<ExpressionType> = members.iter().map(|(_, ty)| ty.clone()).collect();
        let mut ids = Vec::with_capacity(members.len());
        for ty in &member_types {
            ids.push(self.type_id(ty, layout)?);
        }

        let (offsets, matrix_strides) = if layout {
            let layout_info = nzsl_ast::types::std140_struct(&member_types, &|_| {
                nzsl_ast::types::Std140Struct {
                    offsets: Vec::new(),
                    size: 16,
                    align: 16,
                }
            });
            let strides = member_types
                .iter()
                .map(|ty| match ty {
                    ExpressionType::Matrix { .. } => Some(16),
                    _ => None,
                })
                .collect();
            (Some(layout_info.offsets), strides)
        } else {
            (None, members.iter().map(|_| None).collect())
        };

        Ok(self.cache.register_type(SpirvType::Struct {
            members: ids,
            offsets,
            matrix_strides,
        }))
    }

    fn type_id(&mut self, ty: &ExpressionType, layout: bool) -> Result<u32, WriterError> {
        Ok(match ty {
            ExpressionType::NoType => self.cache.register_type(SpirvType::Void),
            ExpressionType::Primitive(PrimitiveType::Boolean) => {
                self.cache.register_type(SpirvType::Bool)
            }
            ExpressionType::Primitive(PrimitiveType::Float32) => {
                self.cache.register_type(SpirvType::Float)
            }
            ExpressionType::Primitive(PrimitiveType::Int32) => {
                self.cache.register_type(SpirvType::Int { signed: true })
            }
            ExpressionType::Primitive(PrimitiveType::UInt32) => {
                self.cache.register_type(SpirvType::Int { signed: false })
            }
            ExpressionType::Vector { prim, components } => {
                let component = self.type_id(&ExpressionType::Primitive(*prim), layout)?;
                self.cache.register_type(SpirvType::Vector {
                    component,
                    count: *components,
                })
            }
            ExpressionType::Matrix {
                prim,
                columns,
                rows,
            } => {
                let column = self.type_id(
                    &ExpressionType::Vector {
                        prim: *prim,
                        components: *rows,
                    },
                    layout,
                )?;
                self.cache.register_type(SpirvType::Matrix {
                    column,
                    count: *columns,
                })
            }
            ExpressionType::Array {
                element,
                length: Some(length),
            } => {
                let element_id = self.type_id(element, layout)?;
                let uint = self.cache.register_type(SpirvType::Int { signed: false });
                let length_id = self.cache.register_constant(SpirvConstant::Scalar {
                    ty: uint,
                    word: *length,
                });
                let stride = layout.then(|| {
                    let field =
                        nzsl_ast::types::std140_layout(element, &|_| nzsl_ast::types::Std140Struct {
                            offsets: Vec::new(),
                            size: 16,
                            align: 16,
                        });
                    field.size.max(field.align).div_ceil(16) * 16
                });
                self.cache.register_type(SpirvType::Array {
                    element: element_id,
                    length: length_id,
                    stride,
                })
            }
            ExpressionType::Struct(index) => self.struct_type_id(*index, layout)?,
            ExpressionType::Uniform(index) => self.struct_type_id(*index, true)?,
            ExpressionType::Sampler { sampled, dim } => {
                let component = self.type_id(&ExpressionType::Primitive(*sampled), false)?;
                let (dim_value, arrayed) = match dim {
                    ImageDim::Dim1D => (ops::DIM_1D, false),
                    ImageDim::Dim1DArray => (ops::DIM_1D, true),
                    ImageDim::Dim2D => (ops::DIM_2D, false),
                    ImageDim::Dim2DArray => (ops::DIM_2D, true),
                    ImageDim::Dim3D => (ops::DIM_3D, false),
                    ImageDim::Cubemap => (ops::DIM_CUBE, false),
                };
                let image = self.cache.register_type(SpirvType::Image {
                    sampled: component,
                    dim: dim_value,
                    arrayed,
                });
                self.cache.register_type(SpirvType::SampledImage { image })
            }
            other => {
                return Err(WriterError::Unsupported(format!(
                    "type not representable in SPIR-V: {other}"
                )))
            }
        })
    }

    fn constant_id(&mut self, value: &ConstantValue) -> Result<u32, WriterError> {
        Ok(match value {
            ConstantValue::Bool(v) => {
                let ty = self.cache.register_type(SpirvType::Bool);
                self.cache
                    .register_constant(SpirvConstant::Bool { ty, value: *v })
            }
            ConstantValue::Float32(v) => {
                let ty = self.cache.register_type(SpirvType::Float);
                self.cache.register_constant(SpirvConstant::Scalar {
                    ty,
                    word: v.to_bits(),
                })
            }
            ConstantValue::Int32(v) => {
                let ty = self.cache.register_type(SpirvType::Int { signed: true });
                self.cache.register_constant(SpirvConstant::Scalar {
                    ty,
                    word: *v as u32,
                })
            }
            ConstantValue::UInt32(v) => {
                let ty = self.cache.register_type(SpirvType::Int { signed: false });
                self.cache
                    .register_constant(SpirvConstant::Scalar { ty, word: *v })
            }
            ConstantValue::String(_) => {
                return Err(WriterError::Unsupported("string constant".into()))
            }
            other => {
                let (scalars, ty) = match other {
                    ConstantValue::Vec2F32(v) => (
                        vec![
                            ConstantValue::Float32(v.x),
                            ConstantValue::Float32(v.y),
                        ],
                        other.expression_type(),
                    ),
                    ConstantValue::Vec3F32(v) => (
                        vec![
                            ConstantValue::Float32(v.x),
                            ConstantValue::Float32(v.y),
                            ConstantValue::Float32(v.z),
                        ],
                        other.expression_type(),
                    ),
                    ConstantValue::Vec4F32(v) => (
                        vec![
                            ConstantValue::Float32(v.x),
                            ConstantValue::Float32(v.y),
                            ConstantValue::Float32(v.z),
                            ConstantValue::Float32(v.w),
                        ],
                        other.expression_type(),
                    ),
                    ConstantValue::Vec2I32(v) => (
                        vec![ConstantValue::Int32(v.x), ConstantValue::Int32(v.y)],
                        other.expression_type(),
                    ),
                    ConstantValue::Vec3I32(v) => (
                        vec![
                            ConstantValue::Int32(v.x),
                            ConstantValue::Int32(v.y),
                            ConstantValue::Int32(v.z),
                        ],
                        other.expression_type(),
                    ),
                    ConstantValue::Vec4I32(v) => (
                        vec![
                            ConstantValue::Int32(v.x),
                            ConstantValue::Int32(v.y),
                            ConstantValue::Int32(v.z),
                            ConstantValue::Int32(v.w),
                        ],
                        other.expression_type(),
                    ),
                    _ => unreachable!("scalar constants handled above"),
                };
                let ty_id = self.type_id(&ty, false)?;
                let mut parts = Vec::with_capacity(scalars.len());
                for scalar in &scalars {
                    parts.push(self.constant_id(scalar)?);
                }
                self.cache
                    .register_constant(SpirvConstant::Composite { ty: ty_id, parts })
            }
        })
    }

    fn glsl_ext_id(&mut self) -> u32 {
        if let Some(id) = self.glsl_ext {
            return id;
        }
        let id = self.cache.allocate();
        self.glsl_ext = Some(id);
        id
    }

    // ---- functions ----

    fn emit_function(&mut self, func: &FunctionDeclaration) -> Result<(), WriterError> {
        self.locals.clear();
        self.terminated = false;
        self.loop_targets.clear();

        let index = func
            .func_index
            .ok_or_else(|| WriterError::Unsupported("unindexed function".into()))?;
        let info_id = self.functions[&index].id;
        let entry_stage = func.entry_stage.as_ref().and_then(|s| s.resolved()).copied();

        match entry_stage {
            Some(stage) => self.emit_entry_function(func, info_id, stage),
            None => self.emit_plain_function(func, info_id),
        }
    }

    fn emit_plain_function(
        &mut self,
        func: &FunctionDeclaration,
        id: u32,
    ) -> Result<(), WriterError> {
        let return_type = func
            .return_type
            .as_ref()
            .and_then(|t| t.resolved())
            .cloned()
            .unwrap_or(ExpressionType::NoType);
        let ret_id = self.type_id(&return_type, false)?;
        let mut param_ids = Vec::with_capacity(func.parameters.len());
        for param in &func.parameters {
            let ty = param
                .ty
                .resolved()
                .cloned()
                .unwrap_or(ExpressionType::NoType);
            param_ids.push(self.type_id(&ty, false)?);
        }
        let fn_type = self.cache.register_type(SpirvType::Function {
            ret: ret_id,
            params: param_ids.clone(),
        });

        self.body.instruction(
            ops::OP_FUNCTION,
            &[ret_id, id, ops::FUNCTION_CONTROL_NONE, fn_type],
        );
        for (param, type_id) in func.parameters.iter().zip(param_ids) {
            let param_id = self.cache.allocate();
            self.body
                .instruction(ops::OP_FUNCTION_PARAMETER, &[type_id, param_id]);
            if let Some(index) = param.variable_index {
                self.locals.insert(index, VarSlot::Value { id: param_id });
            }
        }

        let label = self.cache.allocate();
        self.body.instruction(ops::OP_LABEL, &[label]);
        self.emit_local_variables(&func.statements)?;
        for statement in &func.statements {
            self.emit_statement(statement, None)?;
        }
        if !self.terminated {
            self.body.instruction(ops::OP_RETURN, &[]);
        }
        self.body.instruction(ops::OP_FUNCTION_END, &[]);
        Ok(())
    }

    fn emit_entry_function(
        &mut self,
        func: &FunctionDeclaration,
        id: u32,
        stage: ShaderStage,
    ) -> Result<(), WriterError> {
        let void = self.cache.register_type(SpirvType::Void);
        let fn_type = self.cache.register_type(SpirvType::Function {
            ret: void,
            params: Vec::new(),
        });

        // interface variables
        let mut interface = Vec::new();
        let mut inputs: Vec<EntryIo> = Vec::new();
        let input_type = func.parameters.first().and_then(|p| p.ty.resolved()).cloned();
        if let Some(ExpressionType::Struct(index)) = &input_type {
            for (io, global) in self.entry_io_variables(*index, ops::STORAGE_INPUT, stage)? {
                interface.push(global);
                inputs.push(io);
            }
        }
        let mut outputs: Vec<EntryIo> = Vec::new();
        let output_type = func.return_type.as_ref().and_then(|t| t.resolved()).cloned();
        if let Some(ExpressionType::Struct(index)) = &output_type {
            for (io, global) in self.entry_io_variables(*index, ops::STORAGE_OUTPUT, stage)? {
                interface.push(global);
                outputs.push(io);
            }
        }

        // execution modes
        let mut modes: Vec<Vec<u32>> = Vec::new();
        if stage == ShaderStage::Fragment {
            modes.push(vec![ops::EXECUTION_MODE_ORIGIN_UPPER_LEFT]);
            if func
                .early_fragment_tests
                .as_ref()
                .and_then(|v| v.resolved())
                .copied()
                .unwrap_or(false)
            {
                modes.push(vec![ops::EXECUTION_MODE_EARLY_FRAGMENT_TESTS]);
            }
            if let Some(mode) = func.depth_write.as_ref().and_then(|m| m.resolved()) {
                modes.push(vec![ops::EXECUTION_MODE_DEPTH_REPLACING]);
                match mode {
                    DepthWriteMode::Replace => {}
                    DepthWriteMode::Greater => {
                        modes.push(vec![ops::EXECUTION_MODE_DEPTH_GREATER])
                    }
                    DepthWriteMode::Less => modes.push(vec![ops::EXECUTION_MODE_DEPTH_LESS]),
                    DepthWriteMode::Unchanged => {
                        modes.push(vec![ops::EXECUTION_MODE_DEPTH_UNCHANGED])
                    }
                }
            }
        }
        self.entry_points
            .push((stage, id, func.name.clone(), interface, modes));

        self.body.instruction(
            ops::OP_FUNCTION,
            &[void, id, ops::FUNCTION_CONTROL_NONE, fn_type],
        );
        let label = self.cache.allocate();
        self.body.instruction(ops::OP_LABEL, &[label]);

        // the input struct parameter becomes a function-local variable fed
        // from the interface inputs
        let param_local = match (&input_type, func.parameters.first()) {
            (Some(ty), Some(param)) => {
                let type_id = self.type_id(ty, false)?;
                let pointer = self.cache.register_type(SpirvType::Pointer {
                    storage: ops::STORAGE_FUNCTION,
                    pointee: type_id,
                });
                let var_id = self.cache.allocate();
                self.body.instruction(
                    ops::OP_VARIABLE,
                    &[pointer, var_id, ops::STORAGE_FUNCTION],
                );
                if let Some(index) = param.variable_index {
                    self.locals.insert(index, VarSlot::Local { id: var_id });
                }
                Some((var_id, type_id))
            }
            _ => None,
        };
        self.emit_local_variables(&func.statements)?;

        if let Some((var_id, type_id)) = param_local {
            let mut member_values = Vec::with_capacity(inputs.len());
            for input in &inputs {
                let member_type = self.type_id(&input.ty, false)?;
                let value = self.cache.allocate();
                self.body
                    .instruction(ops::OP_LOAD, &[member_type, value, input.global]);
                member_values.push(value);
            }
            let composed = self.cache.allocate();
            let mut operands = vec![type_id, composed];
            operands.extend(member_values);
            self.body.instruction(ops::OP_COMPOSITE_CONSTRUCT, &operands);
            self.body.instruction(ops::OP_STORE, &[var_id, composed]);
        }

        for statement in &func.statements {
            self.emit_statement(statement, Some(&outputs))?;
        }
        if !self.terminated {
            self.body.instruction(ops::OP_RETURN, &[]);
        }
        self.body.instruction(ops::OP_FUNCTION_END, &[]);
        Ok(())
    }

    /// Interface variables for one entry IO struct, with their decorations.
    fn entry_io_variables(
        &mut self,
        index: StructIndex,
        storage: u32,
        stage: ShaderStage,
    ) -> Result<Vec<(EntryIo, u32)>, WriterError> {
        let mut result = Vec::new();
        let statements: Vec<&Statement> = all_statements(self.module).collect();
        for statement in statements {
            let StatementKind::DeclareStruct {
                struct_index: Some(struct_index),
                description,
                ..
            } = &statement.kind
            else {
                continue;
            };
            if *struct_index != index {
                continue;
            }
            for member in &description.members {
                let ty = member
                    .ty
                    .resolved()
                    .cloned()
                    .unwrap_or(ExpressionType::NoType);
                let builtin = member.builtin.as_ref().and_then(|b| b.resolved()).copied();
                if let Some(builtin) = builtin {
                    // stage-incompatible builtins are skipped, matching the
                    // sanitizer's access rules
                    if !builtin
                        .compatible_stages()
                        .contains(ShaderStageFlags::from(stage))
                    {
                        continue;
                    }
                }
                let type_id = self.type_id(&ty, false)?;
                let pointer = self.cache.register_type(SpirvType::Pointer {
                    storage,
                    pointee: type_id,
                });
                let global = self.cache.register_global(pointer, storage, &member.name);
                match builtin {
                    Some(builtin) => {
                        let value = match builtin {
                            BuiltinEntry::FragCoord => ops::BUILTIN_FRAG_COORD,
                            BuiltinEntry::FragDepth => ops::BUILTIN_FRAG_DEPTH,
                            BuiltinEntry::VertexPosition => ops::BUILTIN_POSITION,
                        };
                        self.annotations.instruction(
                            ops::OP_DECORATE,
                            &[global, ops::DECORATION_BUILTIN, value],
                        );
                    }
                    None => {
                        let location = member
                            .location_index
                            .as_ref()
                            .and_then(|l| l.resolved())
                            .copied()
                            .unwrap_or(0);
                        self.annotations.instruction(
                            ops::OP_DECORATE,
                            &[global, ops::DECORATION_LOCATION, location],
                        );
                    }
                }
                result.push((EntryIo { global, ty }, global));
            }
        }
        Ok(result)
    }

    fn emit_local_variables(&mut self, statements: &[Statement]) -> Result<(), WriterError> {
        let mut declarations = Vec::new();
        collect_variable_declarations(statements, &mut declarations);
        for (index, ty) in declarations {
            let type_id = self.type_id(&ty, false)?;
            let pointer = self.cache.register_type(SpirvType::Pointer {
                storage: ops::STORAGE_FUNCTION,
                pointee: type_id,
            });
            let id = self.cache.allocate();
            self.body
                .instruction(ops::OP_VARIABLE, &[pointer, id, ops::STORAGE_FUNCTION]);
            self.locals.insert(index, VarSlot::Local { id });
        }
        Ok(())
    }

    // ---- statements ----

    fn emit_statement(
        &mut self,
        statement: &Statement,
        outputs: Option<&[EntryIo]>,
    ) -> Result<(), WriterError> {
        if self.terminated {
            // unreachable statements after return/discard are dropped
            return Ok(());
        }
        match &statement.kind {
            StatementKind::NoOp => Ok(()),
            StatementKind::Multi { statements } => {
                for statement in statements {
                    self.emit_statement(statement, outputs)?;
                }
                Ok(())
            }
            StatementKind::Scoped { statement } => self.emit_statement(statement, outputs),
            StatementKind::DeclareVariable {
                variable_index: Some(index),
                initial,
                ..
            } => {
                if let Some(initial) = initial {
                    let value = self.emit_value(initial)?;
                    let VarSlot::Local { id } = self.locals[index] else {
                        return Err(WriterError::Unsupported("uninitialized local".into()));
                    };
                    self.body.instruction(ops::OP_STORE, &[id, value]);
                }
                Ok(())
            }
            StatementKind::DeclareVariable { .. } => Ok(()),
            StatementKind::Expression { expression } => {
                self.emit_value(expression)?;
                Ok(())
            }
            StatementKind::Return { expression } => {
                match (outputs, expression) {
                    (Some(outputs), Some(expression)) => {
                        let value = self.emit_value(expression)?;
                        for (member, output) in outputs.iter().enumerate() {
                            let member_type = self.type_id(&output.ty, false)?;
                            let extracted = self.cache.allocate();
                            self.body.instruction(
                                ops::OP_COMPOSITE_EXTRACT,
                                &[member_type, extracted, value, member as u32],
                            );
                            self.body
                                .instruction(ops::OP_STORE, &[output.global, extracted]);
                        }
                        self.body.instruction(ops::OP_RETURN, &[]);
                    }
                    (Some(_), None) | (None, None) => {
                        self.body.instruction(ops::OP_RETURN, &[]);
                    }
                    (None, Some(expression)) => {
                        let value = self.emit_value(expression)?;
                        self.body.instruction(ops::OP_RETURN_VALUE, &[value]);
                    }
                }
                self.terminated = true;
                Ok(())
            }
            StatementKind::Discard => {
                self.body.instruction(ops::OP_KILL, &[]);
                self.terminated = true;
                Ok(())
            }
            StatementKind::Branch {
                branches,
                else_statement,
                ..
            } => self.emit_branch(branches, else_statement.as_deref(), outputs),
            StatementKind::While {
                condition, body, ..
            } => {
                let header = self.cache.allocate();
                let cond_block = self.cache.allocate();
                let body_block = self.cache.allocate();
                let continue_block = self.cache.allocate();
                let merge = self.cache.allocate();

                self.body.instruction(ops::OP_BRANCH, &[header]);
                self.body.instruction(ops::OP_LABEL, &[header]);
                self.body.instruction(
                    ops::OP_LOOP_MERGE,
                    &[merge, continue_block, ops::LOOP_CONTROL_NONE],
                );
                self.body.instruction(ops::OP_BRANCH, &[cond_block]);

                self.body.instruction(ops::OP_LABEL, &[cond_block]);
                let condition = self.emit_value(condition)?;
                self.body.instruction(
                    ops::OP_BRANCH_CONDITIONAL,
                    &[condition, body_block, merge],
                );

                self.body.instruction(ops::OP_LABEL, &[body_block]);
                self.loop_targets.push((merge, continue_block));
                self.emit_statement(body, outputs)?;
                self.loop_targets.pop();
                if !self.terminated {
                    self.body.instruction(ops::OP_BRANCH, &[continue_block]);
                }
                self.terminated = false;

                self.body.instruction(ops::OP_LABEL, &[continue_block]);
                self.body.instruction(ops::OP_BRANCH, &[header]);
                self.body.instruction(ops::OP_LABEL, &[merge]);
                Ok(())
            }
            StatementKind::Break => {
                let (merge, _) = *self
                    .loop_targets
                    .last()
                    .ok_or_else(|| WriterError::Unsupported("break outside of loop".into()))?;
                self.body.instruction(ops::OP_BRANCH, &[merge]);
                self.terminated = true;
                Ok(())
            }
            StatementKind::Continue => {
                let (_, continue_block) = *self
                    .loop_targets
                    .last()
                    .ok_or_else(|| WriterError::Unsupported("continue outside of loop".into()))?;
                self.body.instruction(ops::OP_BRANCH, &[continue_block]);
                self.terminated = true;
                Ok(())
            }
            other => Err(WriterError::Unsupported(format!(
                "statement not representable in SPIR-V: {other:?}"
            ))),
        }
    }

    fn emit_branch(
        &mut self,
        branches: &[nzsl_ast::CondStatement],
        else_statement: Option<&Statement>,
        outputs: Option<&[EntryIo]>,
    ) -> Result<(), WriterError> {
        let Some((first, rest)) = branches.split_first() else {
            if let Some(else_statement) = else_statement {
                return self.emit_statement(else_statement, outputs);
            }
            return Ok(());
        };

        let condition = self.emit_value(&first.condition)?;
        let then_block = self.cache.allocate();
        let else_block = self.cache.allocate();
        let merge = self.cache.allocate();

        self.body.instruction(
            ops::OP_SELECTION_MERGE,
            &[merge, ops::SELECTION_CONTROL_NONE],
        );
        self.body.instruction(
            ops::OP_BRANCH_CONDITIONAL,
            &[condition, then_block, else_block],
        );

        self.body.instruction(ops::OP_LABEL, &[then_block]);
        self.emit_statement(&first.statement, outputs)?;
        if !self.terminated {
            self.body.instruction(ops::OP_BRANCH, &[merge]);
        }
        self.terminated = false;

        self.body.instruction(ops::OP_LABEL, &[else_block]);
        if rest.is_empty() {
            if let Some(else_statement) = else_statement {
                self.emit_statement(else_statement, outputs)?;
            }
        } else {
            self.emit_branch(rest, else_statement, outputs)?;
        }
        if !self.terminated {
            self.body.instruction(ops::OP_BRANCH, &[merge]);
        }
        self.terminated = false;

        self.body.instruction(ops::OP_LABEL, &[merge]);
        Ok(())
    }

    // ---- expressions ----

    fn expression_type(&self, expr: &Expression) -> Result<ExpressionType, WriterError> {
        expr.cached_type
            .clone()
            .ok_or_else(|| WriterError::Unsupported("expression without a resolved type".into()))
    }

    fn is_pointer_expression(&self, expr: &Expression) -> bool {
        match &expr.kind {
            ExpressionKind::VariableValue { variable } => !matches!(
                self.locals.get(variable),
                Some(VarSlot::Value { .. })
            ),
            ExpressionKind::AccessIndex { expr, .. } | ExpressionKind::Swizzle { expr, .. } => {
                self.is_pointer_expression(expr)
            }
            _ => false,
        }
    }

    fn emit_pointer(&mut self, expr: &Expression) -> Result<(u32, u32), WriterError> {
        match &expr.kind {
            ExpressionKind::VariableValue { variable } => {
                if let Some(slot) = self.locals.get(variable) {
                    return match *slot {
                        VarSlot::Local { id } => Ok((id, ops::STORAGE_FUNCTION)),
                        VarSlot::Global { id, storage } => Ok((id, storage)),
                        VarSlot::Value { .. } => Err(WriterError::Unsupported(
                            "parameter is not addressable".into(),
                        )),
                    };
                }
                if let Some((id, storage, _)) = self.globals.get(variable) {
                    return Ok((*id, *storage));
                }
                Err(WriterError::Unsupported(format!(
                    "unknown variable #{variable}"
                )))
            }
            ExpressionKind::AccessIndex { expr: base, indices } => {
                let (base_id, storage) = self.emit_pointer(base)?;
                let result_type = self.expression_type(expr)?;
                let pointee = self.type_id(&result_type, storage == ops::STORAGE_UNIFORM)?;
                let pointer_type = self.cache.register_type(SpirvType::Pointer {
                    storage,
                    pointee,
                });
                let mut operands = vec![pointer_type, 0, base_id];
                for index in indices {
                    let index_id = self.emit_value(index)?;
                    operands.push(index_id);
                }
                let id = self.cache.allocate();
                operands[1] = id;
                self.body.instruction(ops::OP_ACCESS_CHAIN, &operands);
                Ok((id, storage))
            }
            ExpressionKind::Swizzle { expr: base, pattern } if pattern.count == 1 => {
                let (base_id, storage) = self.emit_pointer(base)?;
                let result_type = self.expression_type(expr)?;
                let pointee = self.type_id(&result_type, false)?;
                let pointer_type = self.cache.register_type(SpirvType::Pointer {
                    storage,
                    pointee,
                });
                let component =
                    self.constant_id(&ConstantValue::UInt32(u32::from(pattern.components[0])))?;
                let id = self.cache.allocate();
                self.body.instruction(
                    ops::OP_ACCESS_CHAIN,
                    &[pointer_type, id, base_id, component],
                );
                Ok((id, storage))
            }
            other => Err(WriterError::Unsupported(format!(
                "expression is not addressable: {other:?}"
            ))),
        }
    }

    fn emit_value(&mut self, expr: &Expression) -> Result<u32, WriterError> {
        match &expr.kind {
            ExpressionKind::ConstantValue { value } => self.constant_id(value),
            ExpressionKind::VariableValue { variable } => {
                if let Some(VarSlot::Value { id }) = self.locals.get(variable) {
                    return Ok(*id);
                }
                let ty = self.expression_type(expr)?;
                let (pointer, storage) = self.emit_pointer(expr)?;
                let type_id = self.type_id(&ty, storage == ops::STORAGE_UNIFORM)?;
                let id = self.cache.allocate();
                self.body.instruction(ops::OP_LOAD, &[type_id, id, pointer]);
                Ok(id)
            }
            ExpressionKind::AccessIndex { expr: base, indices } => {
                if self.is_pointer_expression(expr) {
                    let ty = self.expression_type(expr)?;
                    let (pointer, storage) = self.emit_pointer(expr)?;
                    let type_id = self.type_id(&ty, storage == ops::STORAGE_UNIFORM)?;
                    let id = self.cache.allocate();
                    self.body.instruction(ops::OP_LOAD, &[type_id, id, pointer]);
                    return Ok(id);
                }
                // rvalue composite access needs literal indices
                let base_id = self.emit_value(base)?;
                let ty = self.expression_type(expr)?;
                let type_id = self.type_id(&ty, false)?;
                let mut operands = vec![type_id, 0, base_id];
                for index in indices {
                    let literal = constant_u32(index).ok_or_else(|| {
                        WriterError::Unsupported("dynamic index on a value".into())
                    })?;
                    operands.push(literal);
                }
                let id = self.cache.allocate();
                operands[1] = id;
                self.body.instruction(ops::OP_COMPOSITE_EXTRACT, &operands);
                Ok(id)
            }
            ExpressionKind::Swizzle { expr: base, pattern } => {
                let base_value = self.emit_value(base)?;
                let base_type = self.expression_type(base)?;
                let ty = self.expression_type(expr)?;
                let type_id = self.type_id(&ty, false)?;
                let id = self.cache.allocate();
                if pattern.count == 1 {
                    self.body.instruction(
                        ops::OP_COMPOSITE_EXTRACT,
                        &[type_id, id, base_value, u32::from(pattern.components[0])],
                    );
                } else if matches!(base_type, ExpressionType::Primitive(_)) {
                    // scalar broadcast: construct the vector directly
                    let mut operands = vec![type_id, id];
                    operands.extend(std::iter::repeat_n(base_value, pattern.count));
                    self.body.instruction(ops::OP_COMPOSITE_CONSTRUCT, &operands);
                } else {
                    let mut operands = vec![type_id, id, base_value, base_value];
                    operands.extend(pattern.components().iter().map(|&c| u32::from(c)));
                    self.body.instruction(ops::OP_VECTOR_SHUFFLE, &operands);
                }
                Ok(id)
            }
            ExpressionKind::Assign { op, left, right } => {
                if *op != AssignOp::Simple {
                    return Err(WriterError::Unsupported(
                        "compound assignment must be removed before SPIR-V generation".into(),
                    ));
                }
                let value = self.emit_value(right)?;
                let (pointer, _) = self.emit_pointer(left)?;
                self.body.instruction(ops::OP_STORE, &[pointer, value]);
                Ok(value)
            }
            ExpressionKind::Binary { op, left, right } => self.emit_binary(*op, left, right, expr),
            ExpressionKind::Unary { op, expr: inner } => {
                let value = self.emit_value(inner)?;
                let ty = self.expression_type(expr)?;
                let type_id = self.type_id(&ty, false)?;
                let opcode = match (op, scalar_kind(&ty)) {
                    (UnaryOp::Plus, _) => return Ok(value),
                    (UnaryOp::Minus, ScalarKind::Float) => ops::OP_F_NEGATE,
                    (UnaryOp::Minus, _) => ops::OP_S_NEGATE,
                    (UnaryOp::LogicalNot, _) => ops::OP_LOGICAL_NOT,
                };
                let id = self.cache.allocate();
                self.body.instruction(opcode, &[type_id, id, value]);
                Ok(id)
            }
            ExpressionKind::CallFunction { target, parameters } => {
                let ExpressionKind::Function { function } = &target.kind else {
                    return Err(WriterError::Unsupported("indirect call".into()));
                };
                let info_id = self.functions[function].id;
                let return_type = self.functions[function].return_type.clone();
                let type_id = self.type_id(&return_type, false)?;
                let mut operands = vec![type_id, 0, info_id];
                for param in parameters {
                    operands.push(self.emit_value(param)?);
                }
                let id = self.cache.allocate();
                operands[1] = id;
                self.body.instruction(ops::OP_FUNCTION_CALL, &operands);
                Ok(id)
            }
            ExpressionKind::Cast { target, expressions } => {
                let ExprValue::Resolved(target) = target else {
                    return Err(WriterError::Unsupported("unresolved cast".into()));
                };
                self.emit_cast(target, expressions)
            }
            ExpressionKind::Intrinsic {
                intrinsic,
                parameters,
            } => self.emit_intrinsic(*intrinsic, parameters, expr),
            other => Err(WriterError::Unsupported(format!(
                "expression not representable in SPIR-V: {other:?}"
            ))),
        }
    }

    fn emit_binary(
        &mut self,
        op: BinaryOp,
        left: &Expression,
        right: &Expression,
        whole: &Expression,
    ) -> Result<u32, WriterError> {
        let left_type = self.expression_type(left)?;
        let right_type = self.expression_type(right)?;
        let result_type = self.expression_type(whole)?;
        let left_id = self.emit_value(left)?;
        let right_id = self.emit_value(right)?;
        let type_id = self.type_id(&result_type, false)?;

        // matrix and vector/scalar mixes use the dedicated multiplies
        if op == BinaryOp::Multiply {
            let opcode = match (&left_type, &right_type) {
                (ExpressionType::Vector { .. }, ExpressionType::Primitive(_)) => {
                    Some(ops::OP_VECTOR_TIMES_SCALAR)
                }
                (ExpressionType::Primitive(_), ExpressionType::Vector { .. }) => {
                    // scalar * vector: swap to VectorTimesScalar operand order
                    let id = self.cache.allocate();
                    self.body.instruction(
                        ops::OP_VECTOR_TIMES_SCALAR,
                        &[type_id, id, right_id, left_id],
                    );
                    return Ok(id);
                }
                (ExpressionType::Matrix { .. }, ExpressionType::Primitive(_)) => {
                    Some(ops::OP_MATRIX_TIMES_SCALAR)
                }
                (ExpressionType::Matrix { .. }, ExpressionType::Vector { .. }) => {
                    Some(ops::OP_MATRIX_TIMES_VECTOR)
                }
                (ExpressionType::Matrix { .. }, ExpressionType::Matrix { .. }) => {
                    Some(ops::OP_MATRIX_TIMES_MATRIX)
                }
                _ => None,
            };
            if let Some(opcode) = opcode {
                let id = self.cache.allocate();
                self.body
                    .instruction(opcode, &[type_id, id, left_id, right_id]);
                return Ok(id);
            }
        }

        // vector op scalar broadcasts the scalar
        let (left_id, right_id) = match (&left_type, &right_type) {
            (ExpressionType::Vector { components, .. }, ExpressionType::Primitive(_)) => {
                let vec_type = self.type_id(&left_type, false)?;
                let id = self.cache.allocate();
                let mut operands = vec![vec_type, id];
                operands.extend(std::iter::repeat_n(right_id, *components as usize));
                self.body.instruction(ops::OP_COMPOSITE_CONSTRUCT, &operands);
                (left_id, id)
            }
            _ => (left_id, right_id),
        };

        let kind = scalar_kind(&left_type);
        let opcode = match (op, kind) {
            (BinaryOp::Add, ScalarKind::Float) => ops::OP_F_ADD,
            (BinaryOp::Add, _) => ops::OP_I_ADD,
            (BinaryOp::Subtract, ScalarKind::Float) => ops::OP_F_SUB,
            (BinaryOp::Subtract, _) => ops::OP_I_SUB,
            (BinaryOp::Multiply, ScalarKind::Float) => ops::OP_F_MUL,
            (BinaryOp::Multiply, _) => ops::OP_I_MUL,
            (BinaryOp::Divide, ScalarKind::Float) => ops::OP_F_DIV,
            (BinaryOp::Divide, ScalarKind::Signed) => ops::OP_S_DIV,
            (BinaryOp::Divide, _) => ops::OP_U_DIV,
            (BinaryOp::Modulo, ScalarKind::Float) => ops::OP_F_MOD,
            (BinaryOp::Modulo, ScalarKind::Signed) => ops::OP_S_REM,
            (BinaryOp::Modulo, _) => ops::OP_U_MOD,
            (BinaryOp::CompEq, ScalarKind::Float) => ops::OP_F_ORD_EQUAL,
            (BinaryOp::CompEq, ScalarKind::Bool) => ops::OP_LOGICAL_EQUAL,
            (BinaryOp::CompEq, _) => ops::OP_I_EQUAL,
            (BinaryOp::CompNe, ScalarKind::Float) => ops::OP_F_ORD_NOT_EQUAL,
            (BinaryOp::CompNe, ScalarKind::Bool) => ops::OP_LOGICAL_NOT_EQUAL,
            (BinaryOp::CompNe, _) => ops::OP_I_NOT_EQUAL,
            (BinaryOp::CompLt, ScalarKind::Float) => ops::OP_F_ORD_LESS_THAN,
            (BinaryOp::CompLt, ScalarKind::Signed) => ops::OP_S_LESS_THAN,
            (BinaryOp::CompLt, _) => ops::OP_U_LESS_THAN,
            (BinaryOp::CompLe, ScalarKind::Float) => ops::OP_F_ORD_LESS_THAN_EQUAL,
            (BinaryOp::CompLe, ScalarKind::Signed) => ops::OP_S_LESS_THAN_EQUAL,
            (BinaryOp::CompLe, _) => ops::OP_U_LESS_THAN_EQUAL,
            (BinaryOp::CompGt, ScalarKind::Float) => ops::OP_F_ORD_GREATER_THAN,
            (BinaryOp::CompGt, ScalarKind::Signed) => ops::OP_S_GREATER_THAN,
            (BinaryOp::CompGt, _) => ops::OP_U_GREATER_THAN,
            (BinaryOp::CompGe, ScalarKind::Float) => ops::OP_F_ORD_GREATER_THAN_EQUAL,
            (BinaryOp::CompGe, ScalarKind::Signed) => ops::OP_S_GREATER_THAN_EQUAL,
            (BinaryOp::CompGe, _) => ops::OP_U_GREATER_THAN_EQUAL,
            (BinaryOp::LogicalAnd, _) => ops::OP_LOGICAL_AND,
            (BinaryOp::LogicalOr, _) => ops::OP_LOGICAL_OR,
        };
        let id = self.cache.allocate();
        self.body
            .instruction(opcode, &[type_id, id, left_id, right_id]);
        Ok(id)
    }

    fn emit_cast(
        &mut self,
        target: &ExpressionType,
        expressions: &[Expression],
    ) -> Result<u32, WriterError> {
        let type_id = self.type_id(target, false)?;

        // scalar conversion
        if let (ExpressionType::Primitive(to), [expr]) = (target, expressions) {
            let from = self.expression_type(expr)?;
            let value = self.emit_value(expr)?;
            let from_prim = match from {
                ExpressionType::Primitive(prim) => prim,
                _ => {
                    return Err(WriterError::Unsupported(
                        "non-scalar source in scalar cast".into(),
                    ))
                }
            };
            if from_prim == *to {
                return Ok(value);
            }
            let opcode = match (from_prim, to) {
                (PrimitiveType::Float32, PrimitiveType::Int32) => ops::OP_CONVERT_F_TO_S,
                (PrimitiveType::Float32, PrimitiveType::UInt32) => ops::OP_CONVERT_F_TO_U,
                (PrimitiveType::Int32, PrimitiveType::Float32)
                | (PrimitiveType::UInt32, PrimitiveType::Float32) => {
                    if from_prim == PrimitiveType::Int32 {
                        ops::OP_CONVERT_S_TO_F
                    } else {
                        ops::OP_CONVERT_U_TO_F
                    }
                }
                (PrimitiveType::Int32, PrimitiveType::UInt32)
                | (PrimitiveType::UInt32, PrimitiveType::Int32) => ops::OP_BITCAST,
                _ => {
                    return Err(WriterError::Unsupported(format!(
                        "scalar conversion {from_prim} to {to}"
                    )))
                }
            };
            let id = self.cache.allocate();
            self.body.instruction(opcode, &[type_id, id, value]);
            return Ok(id);
        }

        // composite construction (vectors, matrices, arrays)
        let mut operands = vec![type_id, 0];
        for expr in expressions {
            operands.push(self.emit_value(expr)?);
        }
        let id = self.cache.allocate();
        operands[1] = id;
        self.body.instruction(ops::OP_COMPOSITE_CONSTRUCT, &operands);
        Ok(id)
    }

    fn emit_intrinsic(
        &mut self,
        intrinsic: IntrinsicType,
        parameters: &[Expression],
        whole: &Expression,
    ) -> Result<u32, WriterError> {
        let result_type = self.expression_type(whole)?;
        let type_id = self.type_id(&result_type, false)?;

        if intrinsic == IntrinsicType::SampleTexture {
            let sampled = self.emit_value(&parameters[0])?;
            let coords = self.emit_value(&parameters[1])?;
            let id = self.cache.allocate();
            self.body.instruction(
                ops::OP_IMAGE_SAMPLE_IMPLICIT_LOD,
                &[type_id, id, sampled, coords],
            );
            return Ok(id);
        }

        if intrinsic == IntrinsicType::DotProduct {
            let a = self.emit_value(&parameters[0])?;
            let b = self.emit_value(&parameters[1])?;
            let id = self.cache.allocate();
            self.body.instruction(ops::OP_DOT, &[type_id, id, a, b]);
            return Ok(id);
        }

        // everything else comes from GLSL.std.450
        let kind = scalar_kind(&result_type);
        let instruction = match intrinsic {
            IntrinsicType::CrossProduct => ops::GLSL_CROSS,
            IntrinsicType::Exp => ops::GLSL_EXP,
            IntrinsicType::Length => ops::GLSL_LENGTH,
            IntrinsicType::Max => match kind {
                ScalarKind::Float => ops::GLSL_F_MAX,
                ScalarKind::Signed => ops::GLSL_S_MAX,
                _ => ops::GLSL_U_MAX,
            },
            IntrinsicType::Min => match kind {
                ScalarKind::Float => ops::GLSL_F_MIN,
                ScalarKind::Signed => ops::GLSL_S_MIN,
                _ => ops::GLSL_U_MIN,
            },
            IntrinsicType::Normalize => ops::GLSL_NORMALIZE,
            IntrinsicType::Pow => ops::GLSL_POW,
            IntrinsicType::Reflect => ops::GLSL_REFLECT,
            IntrinsicType::DotProduct | IntrinsicType::SampleTexture => {
                unreachable!("handled above")
            }
        };
        let ext = self.glsl_ext_id();
        let mut operands = vec![type_id, 0, ext, instruction];
        for param in parameters {
            operands.push(self.emit_value(param)?);
        }
        let id = self.cache.allocate();
        operands[1] = id;
        self.body.instruction(ops::OP_EXT_INST, &operands);
        Ok(id)
    }
}

#[derive(Clone, Copy, PartialEq)]
enum ScalarKind {
    Bool,
    Float,
    Signed,
    Unsigned,
}

fn scalar_kind(ty: &ExpressionType) -> ScalarKind {
    let prim = match ty {
        ExpressionType::Primitive(prim) => *prim,
        ExpressionType::Vector { prim, .. } => *prim,
        ExpressionType::Matrix { prim, .. } => *prim,
        _ => return ScalarKind::Float,
    };
    match prim {
        PrimitiveType::Boolean => ScalarKind::Bool,
        PrimitiveType::Float32 => ScalarKind::Float,
        PrimitiveType::Int32 => ScalarKind::Signed,
        PrimitiveType::UInt32 | PrimitiveType::String => ScalarKind::Unsigned,
    }
}

fn constant_u32(expr: &Expression) -> Option<u32> {
    match &expr.kind {
        ExpressionKind::ConstantValue {
            value: ConstantValue::Int32(v),
        } if *v >= 0 => Some(*v as u32),
        ExpressionKind::ConstantValue {
            value: ConstantValue::UInt32(v),
        } => Some(*v),
        _ => None,
    }
}

fn root_statements(root: &Statement) -> &[Statement] {
    match &root.kind {
        StatementKind::Multi { statements } => statements,
        _ => std::slice::from_ref(root),
    }
}

fn all_statements(module: &Module) -> impl Iterator<Item = &Statement> {
    module
        .imported_modules
        .iter()
        .flat_map(|m| root_statements(&m.module.root))
        .chain(root_statements(&module.root))
}

fn collect_variable_declarations(
    statements: &[Statement],
    out: &mut Vec<(VariableIndex, ExpressionType)>,
) {
    for statement in statements {
        match &statement.kind {
            StatementKind::DeclareVariable {
                variable_index: Some(index),
                ty,
                ..
            } => {
                if let Some(ty) = ty.as_ref().and_then(|t| t.resolved()) {
                    out.push((*index, ty.clone()));
                }
            }
            StatementKind::Multi { statements } => collect_variable_declarations(statements, out),
            StatementKind::Scoped { statement } => {
                collect_variable_declarations(std::slice::from_ref(statement), out)
            }
            StatementKind::Branch {
                branches,
                else_statement,
                ..
            } => {
                for branch in branches {
                    collect_variable_declarations(std::slice::from_ref(&branch.statement), out);
                }
                if let Some(else_statement) = else_statement {
                    collect_variable_declarations(std::slice::from_ref(else_statement), out);
                }
            }
            StatementKind::While { body, .. } => {
                collect_variable_declarations(std::slice::from_ref(body), out)
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nzsl_backend_core::OutputContent;

    const SHADER: &str = r#"
[nzsl_version("1.0")]
module;

struct InputData
{
    value: f32
}

external
{
    [set(0), binding(0)] data: uniform[InputData]
}

struct Output
{
    [location(0)] color: vec4[f32]
}

[entry(frag)]
fn main() -> Output
{
    let output: Output;
    output.color = (data.value).xxxx;
    return output;
}
"#;

    fn generate(source: &str) -> Vec<u32> {
        let module = nzsl_parser::parse(source).expect("parse failed");
        let output = SpirvWriter::default()
            .generate(&module, &WriterStates::default())
            .expect("generation failed");
        let OutputContent::Binary(bytes) = &output.files[0].content else {
            panic!("expected binary output");
        };
        bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
            .collect()
    }

    fn opcodes(words: &[u32]) -> Vec<u16> {
        let mut result = Vec::new();
        let mut position = 5; // skip the header
        while position < words.len() {
            let word = words[position];
            result.push((word & 0xFFFF) as u16);
            position += (word >> 16) as usize;
        }
        result
    }

    #[test]
    fn header_fields() {
        let words = generate(SHADER);
        assert_eq!(words[0], ops::MAGIC);
        assert_eq!(words[1], 1 << 16); // version 1.0
        assert_eq!(words[2], 0); // generator
        assert!(words[3] > 1); // bound
        assert_eq!(words[4], 0); // schema
    }

    #[test]
    fn module_structure() {
        let words = generate(SHADER);
        let ops_list = opcodes(&words);
        assert_eq!(ops_list[0], ops::OP_CAPABILITY);
        assert!(ops_list.contains(&ops::OP_MEMORY_MODEL));
        assert!(ops_list.contains(&ops::OP_ENTRY_POINT));
        assert!(ops_list.contains(&ops::OP_EXECUTION_MODE)); // OriginUpperLeft
        assert!(ops_list.contains(&ops::OP_TYPE_STRUCT));
        assert!(ops_list.contains(&ops::OP_FUNCTION));
        assert!(ops_list.contains(&ops::OP_FUNCTION_END));
        assert!(ops_list.contains(&ops::OP_RETURN));
    }

    #[test]
    fn uniform_access_goes_through_access_chain() {
        let words = generate(SHADER);
        let ops_list = opcodes(&words);
        assert!(ops_list.contains(&ops::OP_ACCESS_CHAIN));
        assert!(ops_list.contains(&ops::OP_LOAD));
        assert!(ops_list.contains(&ops::OP_STORE));
    }

    #[test]
    fn no_ext_inst_import_without_intrinsics() {
        let words = generate(SHADER);
        let ops_list = opcodes(&words);
        assert!(!ops_list.contains(&ops::OP_EXT_INST_IMPORT));
    }

    #[test]
    fn intrinsics_pull_in_glsl_std() {
        let source = r#"
[nzsl_version("1.0")]
module;

struct Output
{
    [location(0)] color: vec4[f32]
}

[entry(frag)]
fn main() -> Output
{
    let v = vec3[f32](1.0, 0.0, 0.0);
    let c = cross(v, normalize(v));
    let output: Output;
    output.color = vec4[f32](c, length(c));
    return output;
}
"#;
        let words = generate(source);
        let ops_list = opcodes(&words);
        assert!(ops_list.contains(&ops::OP_EXT_INST_IMPORT));
        assert!(ops_list.contains(&ops::OP_EXT_INST));
    }

    #[test]
    fn discard_emits_kill() {
        let source = r#"
[nzsl_version("1.0")]
module;

struct Input
{
    [location(0)] value: f32
}

[entry(frag)]
fn main(input: Input)
{
    if (input.value < 0.5)
        discard;
}
"#;
        let words = generate(source);
        let ops_list = opcodes(&words);
        assert!(ops_list.contains(&ops::OP_KILL));
        assert!(ops_list.contains(&ops::OP_SELECTION_MERGE));
        assert!(ops_list.contains(&ops::OP_BRANCH_CONDITIONAL));
    }

    #[test]
    fn loops_emit_structured_control_flow() {
        let source = r#"
[nzsl_version("1.0")]
module;

struct Output
{
    [location(0)] color: vec4[f32]
}

[entry(frag)]
fn main() -> Output
{
    let sum = 0.0;
    for i in 0 -> 4
    {
        sum = sum + 1.0;
    }
    let output: Output;
    output.color = (sum).xxxx;
    return output;
}
"#;
        let words = generate(source);
        let ops_list = opcodes(&words);
        assert!(ops_list.contains(&ops::OP_LOOP_MERGE));
        assert!(ops_list.contains(&ops::OP_BRANCH_CONDITIONAL));
    }

    #[test]
    fn function_calls_are_emitted() {
        let source = r#"
[nzsl_version("1.0")]
module;

fn helper(v: f32) -> f32
{
    return v * 2.0;
}

struct Output
{
    [location(0)] color: vec4[f32]
}

[entry(frag)]
fn main() -> Output
{
    let output: Output;
    output.color = (helper(2.0)).xxxx;
    return output;
}
"#;
        let words = generate(source);
        let ops_list = opcodes(&words);
        assert!(ops_list.contains(&ops::OP_FUNCTION_CALL));
        assert!(ops_list.contains(&ops::OP_FUNCTION_PARAMETER));
        assert!(ops_list.contains(&ops::OP_RETURN_VALUE));
    }

    #[test]
    fn equal_constants_are_interned_once() {
        let words = generate(SHADER);
        // count OpConstant instructions declaring a float 0x3f800000 (1.0):
        // the swizzle rewrite references the same scalar repeatedly but it
        // must be declared at most once
        let mut position = 5;
        let mut float_constants = Vec::new();
        while position < words.len() {
            let word = words[position];
            let opcode = (word & 0xFFFF) as u16;
            let count = (word >> 16) as usize;
            if opcode == ops::OP_CONSTANT {
                float_constants.push(words[position + 3]);
            }
            position += count;
        }
        let mut sorted = float_constants.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), float_constants.len(), "duplicate constants");
    }
}
