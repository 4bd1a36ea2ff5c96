//! Binary serialization of sanitized modules (`.nzslb`).
//!
//! Little-endian, length-prefixed, tag-based. Layout: magic, packed format
//! version, then the module tree. Strings are interned: the first occurrence
//! writes the bytes under a fresh index, later uses write the index alone.
//!
//! Round-trip law: `deserialize_module(&serialize_module(m)) == m`.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};

use crate::constant::ConstantValue;
use crate::expr::{
    AccessEntry, AssignOp, BinaryOp, ExprValue, Expression, ExpressionKind, IntrinsicType,
    SwizzlePattern, UnaryOp,
};
use crate::index::Index;
use crate::location::SourceLocation;
use crate::module::{ImportedModule, LangVersion, Metadata, Module, ModuleFeature};
use crate::stmt::{
    BuiltinEntry, CondStatement, DepthWriteMode, ExternalVar, FunctionDeclaration,
    FunctionParameter, ImportSymbol, LoopUnroll, MemoryLayout, ShaderStage, Statement,
    StatementKind, StructDescription, StructMember,
};
use crate::types::{ExpressionType, ImageDim, PrimitiveType};
use crate::vector::{Vector2, Vector3, Vector4};

const MAGIC: u32 = u32::from_le_bytes(*b"NZSB");
const VERSION: u32 = 1 << 8; // 0.1.0 packed as major<<16 | minor<<8 | patch

/// Deserialization failures.
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("unexpected end of stream")]
    UnexpectedEof,
    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),
    #[error("unsupported format version {0:#x}")]
    UnsupportedVersion(u32),
    #[error("invalid {what} tag {tag}")]
    InvalidTag { what: &'static str, tag: u32 },
    #[error("string index {0} out of range")]
    InvalidStringIndex(u32),
    #[error("invalid UTF-8 in string")]
    InvalidUtf8,
}

/// Serializes a module to its binary form.
pub fn serialize_module(module: &Module) -> Vec<u8> {
    let mut writer = Writer {
        buf: BytesMut::new(),
        strings: HashMap::new(),
    };
    writer.buf.put_u32_le(MAGIC);
    writer.buf.put_u32_le(VERSION);
    writer.module(module);
    writer.buf.to_vec()
}

/// Reconstructs a module from its binary form.
pub fn deserialize_module(data: &[u8]) -> Result<Module, SerializeError> {
    let mut reader = Reader {
        data,
        pos: 0,
        strings: Vec::new(),
    };
    let magic = reader.u32()?;
    if magic != MAGIC {
        return Err(SerializeError::BadMagic(magic));
    }
    let version = reader.u32()?;
    if version > VERSION {
        return Err(SerializeError::UnsupportedVersion(version));
    }
    reader.module()
}

struct Writer {
    buf: BytesMut,
    strings: HashMap<String, u32>,
}

impl Writer {
    fn u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    fn u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    fn i32(&mut self, v: i32) {
        self.buf.put_i32_le(v);
    }

    fn f32(&mut self, v: f32) {
        self.buf.put_f32_le(v);
    }

    fn boolean(&mut self, v: bool) {
        self.u8(v as u8);
    }

    fn string(&mut self, s: &str) {
        if let Some(&index) = self.strings.get(s) {
            self.u32(index);
            return;
        }
        let index = self.strings.len() as u32;
        self.strings.insert(s.to_owned(), index);
        self.u32(index);
        self.u32(s.len() as u32);
        self.buf.put_slice(s.as_bytes());
    }

    fn opt<T>(&mut self, value: &Option<T>, f: impl FnOnce(&mut Self, &T)) {
        match value {
            Some(value) => {
                self.u8(1);
                f(self, value);
            }
            None => self.u8(0),
        }
    }

    fn index<T>(&mut self, index: Index<T>) {
        self.u32(index.get());
    }

    fn location(&mut self, loc: &SourceLocation) {
        self.opt(&loc.file.as_deref().map(str::to_owned), |w, f| w.string(f));
        self.u32(loc.start_line);
        self.u32(loc.start_column);
        self.u32(loc.end_line);
        self.u32(loc.end_column);
    }

    fn expr_value<T>(&mut self, value: &ExprValue<T>, f: impl FnOnce(&mut Self, &T)) {
        match value {
            ExprValue::Expr(expr) => {
                self.u8(0);
                self.expression(expr);
            }
            ExprValue::Resolved(v) => {
                self.u8(1);
                f(self, v);
            }
        }
    }

    fn ty(&mut self, ty: &ExpressionType) {
        match ty {
            ExpressionType::Primitive(p) => {
                self.u8(1);
                self.u8(primitive_tag(*p));
            }
            ExpressionType::Vector { prim, components } => {
                self.u8(2);
                self.u8(primitive_tag(*prim));
                self.u32(*components);
            }
            ExpressionType::Matrix {
                prim,
                columns,
                rows,
            } => {
                self.u8(3);
                self.u8(primitive_tag(*prim));
                self.u32(*columns);
                self.u32(*rows);
            }
            ExpressionType::Sampler { sampled, dim } => {
                self.u8(4);
                self.u8(primitive_tag(*sampled));
                self.u8(match dim {
                    ImageDim::Dim1D => 0,
                    ImageDim::Dim1DArray => 1,
                    ImageDim::Dim2D => 2,
                    ImageDim::Dim2DArray => 3,
                    ImageDim::Dim3D => 4,
                    ImageDim::Cubemap => 5,
                });
            }
            ExpressionType::Array { element, length } => {
                self.u8(5);
                self.ty(element);
                self.opt(length, |w, len| w.u32(*len));
            }
            ExpressionType::Struct(index) => {
                self.u8(6);
                self.index(*index);
            }
            ExpressionType::Uniform(index) => {
                self.u8(7);
                self.index(*index);
            }
            ExpressionType::Alias(index) => {
                self.u8(8);
                self.index(*index);
            }
            ExpressionType::Function(index) => {
                self.u8(9);
                self.index(*index);
            }
            ExpressionType::Method { object, method } => {
                self.u8(10);
                self.ty(object);
                self.u32(*method);
            }
            ExpressionType::IntrinsicFunction => self.u8(11),
            ExpressionType::Type(inner) => {
                self.u8(12);
                self.ty(inner);
            }
            ExpressionType::NoType => self.u8(13),
        }
    }

    fn constant_value(&mut self, value: &ConstantValue) {
        match value {
            ConstantValue::Bool(v) => {
                self.u8(1);
                self.boolean(*v);
            }
            ConstantValue::Float32(v) => {
                self.u8(2);
                self.f32(*v);
            }
            ConstantValue::Int32(v) => {
                self.u8(3);
                self.i32(*v);
            }
            ConstantValue::UInt32(v) => {
                self.u8(4);
                self.u32(*v);
            }
            ConstantValue::String(v) => {
                self.u8(5);
                self.string(v);
            }
            ConstantValue::Vec2F32(v) => {
                self.u8(6);
                self.f32(v.x);
                self.f32(v.y);
            }
            ConstantValue::Vec3F32(v) => {
                self.u8(7);
                self.f32(v.x);
                self.f32(v.y);
                self.f32(v.z);
            }
            ConstantValue::Vec4F32(v) => {
                self.u8(8);
                self.f32(v.x);
                self.f32(v.y);
                self.f32(v.z);
                self.f32(v.w);
            }
            ConstantValue::Vec2I32(v) => {
                self.u8(9);
                self.i32(v.x);
                self.i32(v.y);
            }
            ConstantValue::Vec3I32(v) => {
                self.u8(10);
                self.i32(v.x);
                self.i32(v.y);
                self.i32(v.z);
            }
            ConstantValue::Vec4I32(v) => {
                self.u8(11);
                self.i32(v.x);
                self.i32(v.y);
                self.i32(v.z);
                self.i32(v.w);
            }
        }
    }

    fn expression(&mut self, expr: &Expression) {
        self.location(&expr.location);
        self.opt(&expr.cached_type, |w, ty| w.ty(ty));
        match &expr.kind {
            ExpressionKind::AccessIdentifier { expr, identifiers } => {
                self.u8(1);
                self.expression(expr);
                self.u32(identifiers.len() as u32);
                for entry in identifiers {
                    self.string(&entry.identifier);
                    self.location(&entry.location);
                }
            }
            ExpressionKind::AccessIndex { expr, indices } => {
                self.u8(2);
                self.expression(expr);
                self.u32(indices.len() as u32);
                for index in indices {
                    self.expression(index);
                }
            }
            ExpressionKind::AliasValue { alias } => {
                self.u8(3);
                self.index(*alias);
            }
            ExpressionKind::Assign { op, left, right } => {
                self.u8(4);
                self.u8(assign_tag(*op));
                self.expression(left);
                self.expression(right);
            }
            ExpressionKind::Binary { op, left, right } => {
                self.u8(5);
                self.u8(binary_tag(*op));
                self.expression(left);
                self.expression(right);
            }
            ExpressionKind::CallFunction { target, parameters } => {
                self.u8(6);
                self.expression(target);
                self.u32(parameters.len() as u32);
                for param in parameters {
                    self.expression(param);
                }
            }
            ExpressionKind::CallMethod {
                object,
                method,
                parameters,
            } => {
                self.u8(7);
                self.expression(object);
                self.string(method);
                self.u32(parameters.len() as u32);
                for param in parameters {
                    self.expression(param);
                }
            }
            ExpressionKind::Cast {
                target,
                expressions,
            } => {
                self.u8(8);
                self.expr_value(target, |w, ty| w.ty(ty));
                self.u32(expressions.len() as u32);
                for expr in expressions {
                    self.expression(expr);
                }
            }
            ExpressionKind::Conditional {
                condition,
                true_path,
                false_path,
            } => {
                self.u8(9);
                self.expression(condition);
                self.expression(true_path);
                self.expression(false_path);
            }
            ExpressionKind::Constant { constant } => {
                self.u8(10);
                self.index(*constant);
            }
            ExpressionKind::ConstantValue { value } => {
                self.u8(11);
                self.constant_value(value);
            }
            ExpressionKind::Function { function } => {
                self.u8(12);
                self.index(*function);
            }
            ExpressionKind::Identifier { name } => {
                self.u8(13);
                self.string(name);
            }
            ExpressionKind::Intrinsic {
                intrinsic,
                parameters,
            } => {
                self.u8(14);
                self.u8(intrinsic_tag(*intrinsic));
                self.u32(parameters.len() as u32);
                for param in parameters {
                    self.expression(param);
                }
            }
            ExpressionKind::IntrinsicFunction { intrinsic } => {
                self.u8(15);
                self.u8(intrinsic_tag(*intrinsic));
            }
            ExpressionKind::StructType { struct_index } => {
                self.u8(16);
                self.index(*struct_index);
            }
            ExpressionKind::Swizzle { expr, pattern } => {
                self.u8(17);
                self.expression(expr);
                self.u8(pattern.count as u8);
                for &c in pattern.components() {
                    self.u8(c);
                }
            }
            ExpressionKind::Type { ty } => {
                self.u8(18);
                self.ty(ty);
            }
            ExpressionKind::VariableValue { variable } => {
                self.u8(19);
                self.index(*variable);
            }
            ExpressionKind::Unary { op, expr } => {
                self.u8(20);
                self.u8(match op {
                    UnaryOp::LogicalNot => 0,
                    UnaryOp::Minus => 1,
                    UnaryOp::Plus => 2,
                });
                self.expression(expr);
            }
        }
    }

    fn statement(&mut self, stmt: &Statement) {
        self.location(&stmt.location);
        match &stmt.kind {
            StatementKind::Branch {
                branches,
                else_statement,
                is_const,
            } => {
                self.u8(1);
                self.boolean(*is_const);
                self.u32(branches.len() as u32);
                for branch in branches {
                    self.expression(&branch.condition);
                    self.statement(&branch.statement);
                }
                self.opt(else_statement, |w, s| w.statement(s));
            }
            StatementKind::Break => self.u8(2),
            StatementKind::Conditional {
                condition,
                statement,
            } => {
                self.u8(3);
                self.expression(condition);
                self.statement(statement);
            }
            StatementKind::Continue => self.u8(4),
            StatementKind::DeclareAlias {
                alias_index,
                name,
                expression,
            } => {
                self.u8(5);
                self.opt(alias_index, |w, i| w.index(*i));
                self.string(name);
                self.expression(expression);
            }
            StatementKind::DeclareConst {
                const_index,
                name,
                ty,
                expression,
            } => {
                self.u8(6);
                self.opt(const_index, |w, i| w.index(*i));
                self.string(name);
                self.opt(ty, |w, ty| w.expr_value(ty, |w, ty| w.ty(ty)));
                self.expression(expression);
            }
            StatementKind::DeclareExternal {
                binding_set,
                variables,
            } => {
                self.u8(7);
                self.opt(binding_set, |w, v| w.expr_value(v, |w, v| w.u32(*v)));
                self.u32(variables.len() as u32);
                for var in variables {
                    self.opt(&var.variable_index, |w, i| w.index(*i));
                    self.string(&var.name);
                    self.expr_value(&var.ty, |w, ty| w.ty(ty));
                    self.opt(&var.binding_index, |w, v| {
                        w.expr_value(v, |w, v| w.u32(*v))
                    });
                    self.opt(&var.binding_set, |w, v| w.expr_value(v, |w, v| w.u32(*v)));
                    self.location(&var.location);
                }
            }
            StatementKind::DeclareFunction(func) => {
                self.u8(8);
                self.opt(&func.func_index, |w, i| w.index(*i));
                self.string(&func.name);
                self.u32(func.parameters.len() as u32);
                for param in &func.parameters {
                    self.opt(&param.variable_index, |w, i| w.index(*i));
                    self.string(&param.name);
                    self.expr_value(&param.ty, |w, ty| w.ty(ty));
                    self.location(&param.location);
                }
                self.u32(func.statements.len() as u32);
                for statement in &func.statements {
                    self.statement(statement);
                }
                self.opt(&func.return_type, |w, ty| {
                    w.expr_value(ty, |w, ty| w.ty(ty))
                });
                self.opt(&func.entry_stage, |w, stage| {
                    w.expr_value(stage, |w, stage| {
                        w.u8(match stage {
                            ShaderStage::Fragment => 0,
                            ShaderStage::Vertex => 1,
                        })
                    })
                });
                self.opt(&func.depth_write, |w, mode| {
                    w.expr_value(mode, |w, mode| {
                        w.u8(match mode {
                            DepthWriteMode::Greater => 0,
                            DepthWriteMode::Less => 1,
                            DepthWriteMode::Replace => 2,
                            DepthWriteMode::Unchanged => 3,
                        })
                    })
                });
                self.opt(&func.early_fragment_tests, |w, v| {
                    w.expr_value(v, |w, v| w.boolean(*v))
                });
                self.boolean(func.exported);
            }
            StatementKind::DeclareOption {
                option_index,
                name,
                ty,
                default_value,
            } => {
                self.u8(9);
                self.opt(option_index, |w, i| w.index(*i));
                self.string(name);
                self.expr_value(ty, |w, ty| w.ty(ty));
                self.opt(default_value, |w, v| w.expression(v));
            }
            StatementKind::DeclareStruct {
                struct_index,
                exported,
                description,
            } => {
                self.u8(10);
                self.opt(struct_index, |w, i| w.index(*i));
                self.boolean(*exported);
                self.string(&description.name);
                self.opt(&description.layout, |w, layout| {
                    w.expr_value(layout, |w, layout| {
                        w.u8(match layout {
                            MemoryLayout::Std140 => 0,
                        })
                    })
                });
                self.u32(description.members.len() as u32);
                for member in &description.members {
                    self.string(&member.name);
                    self.expr_value(&member.ty, |w, ty| w.ty(ty));
                    self.opt(&member.builtin, |w, b| {
                        w.expr_value(b, |w, b| {
                            w.u8(match b {
                                BuiltinEntry::FragCoord => 0,
                                BuiltinEntry::FragDepth => 1,
                                BuiltinEntry::VertexPosition => 2,
                            })
                        })
                    });
                    self.opt(&member.location_index, |w, v| {
                        w.expr_value(v, |w, v| w.u32(*v))
                    });
                    self.opt(&member.cond, |w, cond| w.expression(cond));
                    self.location(&member.location);
                }
            }
            StatementKind::DeclareVariable {
                variable_index,
                name,
                ty,
                initial,
            } => {
                self.u8(11);
                self.opt(variable_index, |w, i| w.index(*i));
                self.string(name);
                self.opt(ty, |w, ty| w.expr_value(ty, |w, ty| w.ty(ty)));
                self.opt(initial, |w, v| w.expression(v));
            }
            StatementKind::Discard => self.u8(12),
            StatementKind::Expression { expression } => {
                self.u8(13);
                self.expression(expression);
            }
            StatementKind::For {
                variable_index,
                name,
                from,
                to,
                step,
                unroll,
                body,
            } => {
                self.u8(14);
                self.opt(variable_index, |w, i| w.index(*i));
                self.string(name);
                self.expression(from);
                self.expression(to);
                self.opt(step, |w, v| w.expression(v));
                self.unroll(unroll);
                self.statement(body);
            }
            StatementKind::ForEach {
                variable_index,
                name,
                expression,
                unroll,
                body,
            } => {
                self.u8(15);
                self.opt(variable_index, |w, i| w.index(*i));
                self.string(name);
                self.expression(expression);
                self.unroll(unroll);
                self.statement(body);
            }
            StatementKind::Import {
                module_name,
                imports,
            } => {
                self.u8(16);
                self.string(module_name);
                self.u32(imports.len() as u32);
                for sym in imports {
                    self.string(&sym.identifier);
                    self.opt(&sym.rename, |w, s| w.string(s));
                    self.location(&sym.location);
                }
            }
            StatementKind::Multi { statements } => {
                self.u8(17);
                self.u32(statements.len() as u32);
                for statement in statements {
                    self.statement(statement);
                }
            }
            StatementKind::NoOp => self.u8(18),
            StatementKind::Return { expression } => {
                self.u8(19);
                self.opt(expression, |w, v| w.expression(v));
            }
            StatementKind::Scoped { statement } => {
                self.u8(20);
                self.statement(statement);
            }
            StatementKind::While {
                condition,
                unroll,
                body,
            } => {
                self.u8(21);
                self.expression(condition);
                self.unroll(unroll);
                self.statement(body);
            }
        }
    }

    fn unroll(&mut self, unroll: &Option<ExprValue<LoopUnroll>>) {
        self.opt(unroll, |w, u| {
            w.expr_value(u, |w, u| {
                w.u8(match u {
                    LoopUnroll::Always => 0,
                    LoopUnroll::Hint => 1,
                    LoopUnroll::Never => 2,
                })
            })
        });
    }

    fn module(&mut self, module: &Module) {
        let meta = &module.metadata;
        self.string(&meta.module_name);
        self.u32(meta.lang_version.major);
        self.u32(meta.lang_version.minor);
        self.string(&meta.author);
        self.string(&meta.description);
        self.string(&meta.license);
        self.u32(meta.enabled_features.len() as u32);
        for feature in &meta.enabled_features {
            self.u8(match feature {
                ModuleFeature::PrimitiveExternals => 0,
            });
        }
        self.u32(module.imported_modules.len() as u32);
        for imported in &module.imported_modules {
            self.string(&imported.identifier);
            self.module(&imported.module);
        }
        self.statement(&module.root);
    }
}

fn primitive_tag(p: PrimitiveType) -> u8 {
    match p {
        PrimitiveType::Boolean => 0,
        PrimitiveType::Float32 => 1,
        PrimitiveType::Int32 => 2,
        PrimitiveType::UInt32 => 3,
        PrimitiveType::String => 4,
    }
}

fn assign_tag(op: AssignOp) -> u8 {
    match op {
        AssignOp::Simple => 0,
        AssignOp::CompoundAdd => 1,
        AssignOp::CompoundSubtract => 2,
        AssignOp::CompoundMultiply => 3,
        AssignOp::CompoundDivide => 4,
        AssignOp::CompoundLogicalAnd => 5,
        AssignOp::CompoundLogicalOr => 6,
    }
}

fn binary_tag(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Add => 0,
        BinaryOp::Subtract => 1,
        BinaryOp::Multiply => 2,
        BinaryOp::Divide => 3,
        BinaryOp::Modulo => 4,
        BinaryOp::CompEq => 5,
        BinaryOp::CompGe => 6,
        BinaryOp::CompGt => 7,
        BinaryOp::CompLe => 8,
        BinaryOp::CompLt => 9,
        BinaryOp::CompNe => 10,
        BinaryOp::LogicalAnd => 11,
        BinaryOp::LogicalOr => 12,
    }
}

fn intrinsic_tag(i: IntrinsicType) -> u8 {
    match i {
        IntrinsicType::CrossProduct => 0,
        IntrinsicType::DotProduct => 1,
        IntrinsicType::Exp => 2,
        IntrinsicType::Length => 3,
        IntrinsicType::Max => 4,
        IntrinsicType::Min => 5,
        IntrinsicType::Normalize => 6,
        IntrinsicType::Pow => 7,
        IntrinsicType::Reflect => 8,
        IntrinsicType::SampleTexture => 9,
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    strings: Vec<String>,
}

impl Reader<'_> {
    fn take(&mut self, count: usize) -> Result<&[u8], SerializeError> {
        let end = self
            .pos
            .checked_add(count)
            .filter(|&end| end <= self.data.len())
            .ok_or(SerializeError::UnexpectedEof)?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, SerializeError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, SerializeError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32, SerializeError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn f32(&mut self) -> Result<f32, SerializeError> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn boolean(&mut self) -> Result<bool, SerializeError> {
        Ok(self.u8()? != 0)
    }

    fn string(&mut self) -> Result<String, SerializeError> {
        let index = self.u32()?;
        if (index as usize) < self.strings.len() {
            return Ok(self.strings[index as usize].clone());
        }
        if index as usize != self.strings.len() {
            return Err(SerializeError::InvalidStringIndex(index));
        }
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        let text =
            std::str::from_utf8(bytes).map_err(|_| SerializeError::InvalidUtf8)?.to_owned();
        self.strings.push(text.clone());
        Ok(text)
    }

    fn opt<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, SerializeError>,
    ) -> Result<Option<T>, SerializeError> {
        if self.boolean()? {
            Ok(Some(f(self)?))
        } else {
            Ok(None)
        }
    }

    fn index<T>(&mut self) -> Result<Index<T>, SerializeError> {
        Ok(Index::new(self.u32()?))
    }

    fn location(&mut self) -> Result<SourceLocation, SerializeError> {
        let file = self.opt(|r| r.string())?.map(Arc::from);
        Ok(SourceLocation {
            file,
            start_line: self.u32()?,
            start_column: self.u32()?,
            end_line: self.u32()?,
            end_column: self.u32()?,
        })
    }

    fn expr_value<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, SerializeError>,
    ) -> Result<ExprValue<T>, SerializeError> {
        match self.u8()? {
            0 => Ok(ExprValue::Expr(Box::new(self.expression()?))),
            1 => Ok(ExprValue::Resolved(f(self)?)),
            tag => Err(SerializeError::InvalidTag {
                what: "expression value",
                tag: tag.into(),
            }),
        }
    }

    fn primitive(&mut self) -> Result<PrimitiveType, SerializeError> {
        Ok(match self.u8()? {
            0 => PrimitiveType::Boolean,
            1 => PrimitiveType::Float32,
            2 => PrimitiveType::Int32,
            3 => PrimitiveType::UInt32,
            4 => PrimitiveType::String,
            tag => {
                return Err(SerializeError::InvalidTag {
                    what: "primitive",
                    tag: tag.into(),
                })
            }
        })
    }

    fn ty(&mut self) -> Result<ExpressionType, SerializeError> {
        Ok(match self.u8()? {
            1 => ExpressionType::Primitive(self.primitive()?),
            2 => ExpressionType::Vector {
                prim: self.primitive()?,
                components: self.u32()?,
            },
            3 => ExpressionType::Matrix {
                prim: self.primitive()?,
                columns: self.u32()?,
                rows: self.u32()?,
            },
            4 => ExpressionType::Sampler {
                sampled: self.primitive()?,
                dim: match self.u8()? {
                    0 => ImageDim::Dim1D,
                    1 => ImageDim::Dim1DArray,
                    2 => ImageDim::Dim2D,
                    3 => ImageDim::Dim2DArray,
                    4 => ImageDim::Dim3D,
                    5 => ImageDim::Cubemap,
                    tag => {
                        return Err(SerializeError::InvalidTag {
                            what: "image dimension",
                            tag: tag.into(),
                        })
                    }
                },
            },
            5 => ExpressionType::Array {
                element: Box::new(self.ty()?),
                length: self.opt(|r| r.u32())?,
            },
            6 => ExpressionType::Struct(self.index()?),
            7 => ExpressionType::Uniform(self.index()?),
            8 => ExpressionType::Alias(self.index()?),
            9 => ExpressionType::Function(self.index()?),
            10 => ExpressionType::Method {
                object: Box::new(self.ty()?),
                method: self.u32()?,
            },
            11 => ExpressionType::IntrinsicFunction,
            12 => ExpressionType::Type(Box::new(self.ty()?)),
            13 => ExpressionType::NoType,
            tag => {
                return Err(SerializeError::InvalidTag {
                    what: "type",
                    tag: tag.into(),
                })
            }
        })
    }

    fn constant_value(&mut self) -> Result<ConstantValue, SerializeError> {
        Ok(match self.u8()? {
            1 => ConstantValue::Bool(self.boolean()?),
            2 => ConstantValue::Float32(self.f32()?),
            3 => ConstantValue::Int32(self.i32()?),
            4 => ConstantValue::UInt32(self.u32()?),
            5 => ConstantValue::String(self.string()?),
            6 => ConstantValue::Vec2F32(Vector2::new(self.f32()?, self.f32()?)),
            7 => ConstantValue::Vec3F32(Vector3::new(self.f32()?, self.f32()?, self.f32()?)),
            8 => ConstantValue::Vec4F32(Vector4::new(
                self.f32()?,
                self.f32()?,
                self.f32()?,
                self.f32()?,
            )),
            9 => ConstantValue::Vec2I32(Vector2::new(self.i32()?, self.i32()?)),
            10 => ConstantValue::Vec3I32(Vector3::new(self.i32()?, self.i32()?, self.i32()?)),
            11 => ConstantValue::Vec4I32(Vector4::new(
                self.i32()?,
                self.i32()?,
                self.i32()?,
                self.i32()?,
            )),
            tag => {
                return Err(SerializeError::InvalidTag {
                    what: "constant",
                    tag: tag.into(),
                })
            }
        })
    }

    fn expressions(&mut self) -> Result<Vec<Expression>, SerializeError> {
        let count = self.u32()? as usize;
        let mut exprs = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            exprs.push(self.expression()?);
        }
        Ok(exprs)
    }

    fn expression(&mut self) -> Result<Expression, SerializeError> {
        let location = self.location()?;
        let cached_type = self.opt(|r| r.ty())?;
        let kind = match self.u8()? {
            1 => {
                let expr = Box::new(self.expression()?);
                let count = self.u32()? as usize;
                let mut identifiers = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    identifiers.push(AccessEntry {
                        identifier: self.string()?,
                        location: self.location()?,
                    });
                }
                ExpressionKind::AccessIdentifier { expr, identifiers }
            }
            2 => ExpressionKind::AccessIndex {
                expr: Box::new(self.expression()?),
                indices: self.expressions()?,
            },
            3 => ExpressionKind::AliasValue {
                alias: self.index()?,
            },
            4 => ExpressionKind::Assign {
                op: match self.u8()? {
                    0 => AssignOp::Simple,
                    1 => AssignOp::CompoundAdd,
                    2 => AssignOp::CompoundSubtract,
                    3 => AssignOp::CompoundMultiply,
                    4 => AssignOp::CompoundDivide,
                    5 => AssignOp::CompoundLogicalAnd,
                    6 => AssignOp::CompoundLogicalOr,
                    tag => {
                        return Err(SerializeError::InvalidTag {
                            what: "assign op",
                            tag: tag.into(),
                        })
                    }
                },
                left: Box::new(self.expression()?),
                right: Box::new(self.expression()?),
            },
            5 => ExpressionKind::Binary {
                op: match self.u8()? {
                    0 => BinaryOp::Add,
                    1 => BinaryOp::Subtract,
                    2 => BinaryOp::Multiply,
                    3 => BinaryOp::Divide,
                    4 => BinaryOp::Modulo,
                    5 => BinaryOp::CompEq,
                    6 => BinaryOp::CompGe,
                    7 => BinaryOp::CompGt,
                    8 => BinaryOp::CompLe,
                    9 => BinaryOp::CompLt,
                    10 => BinaryOp::CompNe,
                    11 => BinaryOp::LogicalAnd,
                    12 => BinaryOp::LogicalOr,
                    tag => {
                        return Err(SerializeError::InvalidTag {
                            what: "binary op",
                            tag: tag.into(),
                        })
                    }
                },
                left: Box::new(self.expression()?),
                right: Box::new(self.expression()?),
            },
            6 => ExpressionKind::CallFunction {
                target: Box::new(self.expression()?),
                parameters: self.expressions()?,
            },
            7 => ExpressionKind::CallMethod {
                object: Box::new(self.expression()?),
                method: self.string()?,
                parameters: self.expressions()?,
            },
            8 => ExpressionKind::Cast {
                target: self.expr_value(|r| r.ty())?,
                expressions: self.expressions()?,
            },
            9 => ExpressionKind::Conditional {
                condition: Box::new(self.expression()?),
                true_path: Box::new(self.expression()?),
                false_path: Box::new(self.expression()?),
            },
            10 => ExpressionKind::Constant {
                constant: self.index()?,
            },
            11 => ExpressionKind::ConstantValue {
                value: self.constant_value()?,
            },
            12 => ExpressionKind::Function {
                function: self.index()?,
            },
            13 => ExpressionKind::Identifier {
                name: self.string()?,
            },
            14 => ExpressionKind::Intrinsic {
                intrinsic: self.intrinsic()?,
                parameters: self.expressions()?,
            },
            15 => ExpressionKind::IntrinsicFunction {
                intrinsic: self.intrinsic()?,
            },
            16 => ExpressionKind::StructType {
                struct_index: self.index()?,
            },
            17 => {
                let expr = Box::new(self.expression()?);
                let count = self.u8()? as usize;
                if count > 4 {
                    return Err(SerializeError::InvalidTag {
                        what: "swizzle count",
                        tag: count as u32,
                    });
                }
                let mut components = [0u8; 4];
                for slot in components.iter_mut().take(count) {
                    *slot = self.u8()?;
                }
                ExpressionKind::Swizzle {
                    expr,
                    pattern: SwizzlePattern { components, count },
                }
            }
            18 => ExpressionKind::Type { ty: self.ty()? },
            19 => ExpressionKind::VariableValue {
                variable: self.index()?,
            },
            20 => ExpressionKind::Unary {
                op: match self.u8()? {
                    0 => UnaryOp::LogicalNot,
                    1 => UnaryOp::Minus,
                    2 => UnaryOp::Plus,
                    tag => {
                        return Err(SerializeError::InvalidTag {
                            what: "unary op",
                            tag: tag.into(),
                        })
                    }
                },
                expr: Box::new(self.expression()?),
            },
            tag => {
                return Err(SerializeError::InvalidTag {
                    what: "expression",
                    tag: tag.into(),
                })
            }
        };
        Ok(Expression {
            location,
            cached_type,
            kind,
        })
    }

    fn intrinsic(&mut self) -> Result<IntrinsicType, SerializeError> {
        Ok(match self.u8()? {
            0 => IntrinsicType::CrossProduct,
            1 => IntrinsicType::DotProduct,
            2 => IntrinsicType::Exp,
            3 => IntrinsicType::Length,
            4 => IntrinsicType::Max,
            5 => IntrinsicType::Min,
            6 => IntrinsicType::Normalize,
            7 => IntrinsicType::Pow,
            8 => IntrinsicType::Reflect,
            9 => IntrinsicType::SampleTexture,
            tag => {
                return Err(SerializeError::InvalidTag {
                    what: "intrinsic",
                    tag: tag.into(),
                })
            }
        })
    }

    fn statements(&mut self) -> Result<Vec<Statement>, SerializeError> {
        let count = self.u32()? as usize;
        let mut stmts = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            stmts.push(self.statement()?);
        }
        Ok(stmts)
    }

    fn statement(&mut self) -> Result<Statement, SerializeError> {
        let location = self.location()?;
        let kind = match self.u8()? {
            1 => {
                let is_const = self.boolean()?;
                let count = self.u32()? as usize;
                let mut branches = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    branches.push(CondStatement {
                        condition: Box::new(self.expression()?),
                        statement: Box::new(self.statement()?),
                    });
                }
                StatementKind::Branch {
                    branches,
                    else_statement: self.opt(|r| r.statement())?.map(Box::new),
                    is_const,
                }
            }
            2 => StatementKind::Break,
            3 => StatementKind::Conditional {
                condition: Box::new(self.expression()?),
                statement: Box::new(self.statement()?),
            },
            4 => StatementKind::Continue,
            5 => StatementKind::DeclareAlias {
                alias_index: self.opt(|r| r.index())?,
                name: self.string()?,
                expression: Box::new(self.expression()?),
            },
            6 => StatementKind::DeclareConst {
                const_index: self.opt(|r| r.index())?,
                name: self.string()?,
                ty: self.opt(|r| r.expr_value(|r| r.ty()))?,
                expression: Box::new(self.expression()?),
            },
            7 => {
                let binding_set = self.opt(|r| r.expr_value(|r| r.u32()))?;
                let count = self.u32()? as usize;
                let mut variables = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    variables.push(ExternalVar {
                        variable_index: self.opt(|r| r.index())?,
                        name: self.string()?,
                        ty: self.expr_value(|r| r.ty())?,
                        binding_index: self.opt(|r| r.expr_value(|r| r.u32()))?,
                        binding_set: self.opt(|r| r.expr_value(|r| r.u32()))?,
                        location: self.location()?,
                    });
                }
                StatementKind::DeclareExternal {
                    binding_set,
                    variables,
                }
            }
            8 => {
                let func_index = self.opt(|r| r.index())?;
                let name = self.string()?;
                let count = self.u32()? as usize;
                let mut parameters = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    parameters.push(FunctionParameter {
                        variable_index: self.opt(|r| r.index())?,
                        name: self.string()?,
                        ty: self.expr_value(|r| r.ty())?,
                        location: self.location()?,
                    });
                }
                let statements = self.statements()?;
                let return_type = self.opt(|r| r.expr_value(|r| r.ty()))?;
                let entry_stage = self.opt(|r| {
                    r.expr_value(|r| match r.u8()? {
                        0 => Ok(ShaderStage::Fragment),
                        1 => Ok(ShaderStage::Vertex),
                        tag => Err(SerializeError::InvalidTag {
                            what: "shader stage",
                            tag: tag.into(),
                        }),
                    })
                })?;
                let depth_write = self.opt(|r| {
                    r.expr_value(|r| match r.u8()? {
                        0 => Ok(DepthWriteMode::Greater),
                        1 => Ok(DepthWriteMode::Less),
                        2 => Ok(DepthWriteMode::Replace),
                        3 => Ok(DepthWriteMode::Unchanged),
                        tag => Err(SerializeError::InvalidTag {
                            what: "depth write mode",
                            tag: tag.into(),
                        }),
                    })
                })?;
                let early_fragment_tests = self.opt(|r| r.expr_value(|r| r.boolean()))?;
                let exported = self.boolean()?;
                StatementKind::DeclareFunction(Box::new(FunctionDeclaration {
                    func_index,
                    name,
                    parameters,
                    statements,
                    return_type,
                    entry_stage,
                    depth_write,
                    early_fragment_tests,
                    exported,
                }))
            }
            9 => StatementKind::DeclareOption {
                option_index: self.opt(|r| r.index())?,
                name: self.string()?,
                ty: self.expr_value(|r| r.ty())?,
                default_value: self.opt(|r| r.expression())?.map(Box::new),
            },
            10 => {
                let struct_index = self.opt(|r| r.index())?;
                let exported = self.boolean()?;
                let name = self.string()?;
                let layout = self.opt(|r| {
                    r.expr_value(|r| match r.u8()? {
                        0 => Ok(MemoryLayout::Std140),
                        tag => Err(SerializeError::InvalidTag {
                            what: "memory layout",
                            tag: tag.into(),
                        }),
                    })
                })?;
                let count = self.u32()? as usize;
                let mut members = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    members.push(StructMember {
                        name: self.string()?,
                        ty: self.expr_value(|r| r.ty())?,
                        builtin: self.opt(|r| {
                            r.expr_value(|r| match r.u8()? {
                                0 => Ok(BuiltinEntry::FragCoord),
                                1 => Ok(BuiltinEntry::FragDepth),
                                2 => Ok(BuiltinEntry::VertexPosition),
                                tag => Err(SerializeError::InvalidTag {
                                    what: "builtin",
                                    tag: tag.into(),
                                }),
                            })
                        })?,
                        location_index: self.opt(|r| r.expr_value(|r| r.u32()))?,
                        cond: self.opt(|r| r.expression())?.map(Box::new),
                        location: self.location()?,
                    });
                }
                StatementKind::DeclareStruct {
                    struct_index,
                    exported,
                    description: StructDescription {
                        name,
                        layout,
                        members,
                    },
                }
            }
            11 => StatementKind::DeclareVariable {
                variable_index: self.opt(|r| r.index())?,
                name: self.string()?,
                ty: self.opt(|r| r.expr_value(|r| r.ty()))?,
                initial: self.opt(|r| r.expression())?.map(Box::new),
            },
            12 => StatementKind::Discard,
            13 => StatementKind::Expression {
                expression: Box::new(self.expression()?),
            },
            14 => StatementKind::For {
                variable_index: self.opt(|r| r.index())?,
                name: self.string()?,
                from: Box::new(self.expression()?),
                to: Box::new(self.expression()?),
                step: self.opt(|r| r.expression())?.map(Box::new),
                unroll: self.unroll()?,
                body: Box::new(self.statement()?),
            },
            15 => StatementKind::ForEach {
                variable_index: self.opt(|r| r.index())?,
                name: self.string()?,
                expression: Box::new(self.expression()?),
                unroll: self.unroll()?,
                body: Box::new(self.statement()?),
            },
            16 => {
                let module_name = self.string()?;
                let count = self.u32()? as usize;
                let mut imports = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    imports.push(ImportSymbol {
                        identifier: self.string()?,
                        rename: self.opt(|r| r.string())?,
                        location: self.location()?,
                    });
                }
                StatementKind::Import {
                    module_name,
                    imports,
                }
            }
            17 => StatementKind::Multi {
                statements: self.statements()?,
            },
            18 => StatementKind::NoOp,
            19 => StatementKind::Return {
                expression: self.opt(|r| r.expression())?.map(Box::new),
            },
            20 => StatementKind::Scoped {
                statement: Box::new(self.statement()?),
            },
            21 => StatementKind::While {
                condition: Box::new(self.expression()?),
                unroll: self.unroll()?,
                body: Box::new(self.statement()?),
            },
            tag => {
                return Err(SerializeError::InvalidTag {
                    what: "statement",
                    tag: tag.into(),
                })
            }
        };
        Ok(Statement { location, kind })
    }

    fn unroll(&mut self) -> Result<Option<ExprValue<LoopUnroll>>, SerializeError> {
        self.opt(|r| {
            r.expr_value(|r| match r.u8()? {
                0 => Ok(LoopUnroll::Always),
                1 => Ok(LoopUnroll::Hint),
                2 => Ok(LoopUnroll::Never),
                tag => Err(SerializeError::InvalidTag {
                    what: "unroll mode",
                    tag: tag.into(),
                }),
            })
        })
    }

    fn module(&mut self) -> Result<Module, SerializeError> {
        let module_name = self.string()?;
        let lang_version = LangVersion {
            major: self.u32()?,
            minor: self.u32()?,
        };
        let author = self.string()?;
        let description = self.string()?;
        let license = self.string()?;
        let feature_count = self.u32()? as usize;
        let mut enabled_features = Vec::with_capacity(feature_count.min(16));
        for _ in 0..feature_count {
            enabled_features.push(match self.u8()? {
                0 => ModuleFeature::PrimitiveExternals,
                tag => {
                    return Err(SerializeError::InvalidTag {
                        what: "module feature",
                        tag: tag.into(),
                    })
                }
            });
        }
        let import_count = self.u32()? as usize;
        let mut imported_modules = Vec::with_capacity(import_count.min(256));
        for _ in 0..import_count {
            imported_modules.push(ImportedModule {
                identifier: self.string()?,
                module: self.module()?,
            });
        }
        let root = self.statement()?;
        Ok(Module {
            metadata: Arc::new(Metadata {
                module_name,
                lang_version,
                author,
                description,
                license,
                enabled_features,
            }),
            imported_modules,
            root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Metadata;

    fn literal(value: ConstantValue) -> Expression {
        Expression::constant(value, SourceLocation::span(1, 1, 1, 4))
    }

    fn sample_module() -> Module {
        let mut module = Module::new(Metadata {
            module_name: "Shader.Sample".into(),
            lang_version: LangVersion::CURRENT,
            author: "tests".into(),
            ..Metadata::default()
        });
        let init = Expression::new(
            ExpressionKind::Binary {
                op: BinaryOp::Multiply,
                left: Box::new(literal(ConstantValue::Float32(2.0))),
                right: Box::new(literal(ConstantValue::Float32(21.0))),
            },
            SourceLocation::span(3, 1, 3, 10),
        );
        let decl = Statement::new(
            StatementKind::DeclareVariable {
                variable_index: Some(Index::new(0)),
                name: "value".into(),
                ty: Some(ExprValue::Resolved(ExpressionType::Primitive(
                    PrimitiveType::Float32,
                ))),
                initial: Some(Box::new(init)),
            },
            SourceLocation::span(3, 1, 3, 10),
        );
        module.root = Statement::new(
            StatementKind::Multi {
                statements: vec![decl, Statement::no_op()],
            },
            SourceLocation::default(),
        );
        module
    }

    #[test]
    fn round_trip_preserves_module() {
        let module = sample_module();
        let bytes = serialize_module(&module);
        let restored = deserialize_module(&bytes).unwrap();
        assert_eq!(restored, module);
    }

    #[test]
    fn string_interning_reuses_indices() {
        let mut module = sample_module();
        // two statements sharing the same name should intern the string once
        let dup = module.root_statements()[0].clone();
        if let StatementKind::Multi { statements } = &mut module.root.kind {
            statements.push(dup);
        }
        let bytes = serialize_module(&module);
        let occurrences = bytes
            .windows(b"value".len())
            .filter(|w| w == b"value")
            .count();
        assert_eq!(occurrences, 1);
        assert_eq!(deserialize_module(&bytes).unwrap(), module);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = serialize_module(&sample_module());
        bytes[0] ^= 0xFF;
        assert!(matches!(
            deserialize_module(&bytes),
            Err(SerializeError::BadMagic(_))
        ));
    }

    #[test]
    fn rejects_future_version() {
        let mut bytes = serialize_module(&sample_module());
        bytes[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            deserialize_module(&bytes),
            Err(SerializeError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn rejects_truncated_stream() {
        let bytes = serialize_module(&sample_module());
        let truncated = &bytes[..bytes.len() / 2];
        assert!(deserialize_module(truncated).is_err());
    }

    #[test]
    fn round_trip_imported_modules() {
        let mut module = sample_module();
        module.imported_modules.push(ImportedModule {
            identifier: "_Dep".into(),
            module: sample_module(),
        });
        let bytes = serialize_module(&module);
        assert_eq!(deserialize_module(&bytes).unwrap(), module);
    }
}
