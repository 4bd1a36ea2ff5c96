//! Expression sanitization: name resolution, bottom-up type inference, and
//! the expression-level rewrites (matrix casts, scalar swizzles, compound
//! assignments).

use nzsl_ast::{
    AccessEntry, AssignOp, BinaryOp, BuiltinEntry, CompilerError, ConstantValue, Error,
    ExprValue, Expression, ExpressionKind, ExpressionType, ImageDim, IntrinsicType,
    PrimitiveType, SourceLocation, Statement, StatementKind, SwizzlePattern, UnaryOp,
};

use crate::scope::IdentifierKind;
use crate::{RestrictionKind, Sanitizer, StageRestriction, VariableData};

/// Built-in type names and partial type constructors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TypeKeyword {
    Primitive(PrimitiveType),
    Vector(u32),
    Matrix(u32, u32),
    Array,
    Uniform,
    Sampler(ImageDim),
}

pub(crate) fn type_keyword(name: &str) -> Option<TypeKeyword> {
    Some(match name {
        "bool" => TypeKeyword::Primitive(PrimitiveType::Boolean),
        "f32" => TypeKeyword::Primitive(PrimitiveType::Float32),
        "i32" => TypeKeyword::Primitive(PrimitiveType::Int32),
        "u32" => TypeKeyword::Primitive(PrimitiveType::UInt32),
        "str" => TypeKeyword::Primitive(PrimitiveType::String),
        "vec2" => TypeKeyword::Vector(2),
        "vec3" => TypeKeyword::Vector(3),
        "vec4" => TypeKeyword::Vector(4),
        "mat2" => TypeKeyword::Matrix(2, 2),
        "mat3" => TypeKeyword::Matrix(3, 3),
        "mat4" => TypeKeyword::Matrix(4, 4),
        "mat2x2" => TypeKeyword::Matrix(2, 2),
        "mat2x3" => TypeKeyword::Matrix(2, 3),
        "mat2x4" => TypeKeyword::Matrix(2, 4),
        "mat3x2" => TypeKeyword::Matrix(3, 2),
        "mat3x3" => TypeKeyword::Matrix(3, 3),
        "mat3x4" => TypeKeyword::Matrix(3, 4),
        "mat4x2" => TypeKeyword::Matrix(4, 2),
        "mat4x3" => TypeKeyword::Matrix(4, 3),
        "mat4x4" => TypeKeyword::Matrix(4, 4),
        "array" => TypeKeyword::Array,
        "uniform" => TypeKeyword::Uniform,
        "sampler1D" => TypeKeyword::Sampler(ImageDim::Dim1D),
        "sampler1DArray" => TypeKeyword::Sampler(ImageDim::Dim1DArray),
        "sampler2D" => TypeKeyword::Sampler(ImageDim::Dim2D),
        "sampler2DArray" => TypeKeyword::Sampler(ImageDim::Dim2DArray),
        "sampler3D" => TypeKeyword::Sampler(ImageDim::Dim3D),
        "samplerCube" => TypeKeyword::Sampler(ImageDim::Cubemap),
        _ => return None,
    })
}

enum ResolvedName {
    Expr(Expression),
    Keyword(TypeKeyword),
    Module(usize),
    Unresolved,
}

impl Sanitizer<'_> {
    // ---- name resolution ----

    fn resolve_identifier(
        &mut self,
        name: &str,
        location: &SourceLocation,
    ) -> Result<ResolvedName, Error> {
        if let Some(kind) = self.scopes.find(name) {
            let expr = match kind {
                IdentifierKind::Variable(index) => {
                    let ty = self
                        .variables
                        .get(&index)
                        .map(|data| data.ty.clone());
                    Expression {
                        location: location.clone(),
                        cached_type: ty,
                        kind: ExpressionKind::VariableValue { variable: index },
                    }
                }
                IdentifierKind::Constant(index) => {
                    let data = self.constants.get(&index);
                    let ty = data.map(|data| data.ty.clone());
                    if self.options.remove_const_declaration {
                        if let Some(value) = data.and_then(|data| data.value.clone()) {
                            return Ok(ResolvedName::Expr(Expression::constant(
                                value,
                                location.clone(),
                            )));
                        }
                    }
                    Expression {
                        location: location.clone(),
                        cached_type: ty,
                        kind: ExpressionKind::Constant { constant: index },
                    }
                }
                IdentifierKind::Function(index) => Expression::typed(
                    ExpressionKind::Function { function: index },
                    ExpressionType::Function(index),
                    location.clone(),
                ),
                IdentifierKind::Struct(index) => Expression::typed(
                    ExpressionKind::StructType {
                        struct_index: index,
                    },
                    ExpressionType::Type(Box::new(ExpressionType::Struct(index))),
                    location.clone(),
                ),
                IdentifierKind::Alias(index) => {
                    if self.options.remove_aliases {
                        let mut target = self.alias_target_deep(index);
                        target.location = location.clone();
                        target
                    } else {
                        let ty = self
                            .aliases
                            .get(&index)
                            .and_then(|data| data.target.cached_type.clone());
                        Expression {
                            location: location.clone(),
                            cached_type: ty,
                            kind: ExpressionKind::AliasValue { alias: index },
                        }
                    }
                }
            };
            return Ok(ResolvedName::Expr(expr));
        }

        if let Some(position) = self.find_module(name) {
            return Ok(ResolvedName::Module(position));
        }

        if let Some(intrinsic) = Self::intrinsic_by_name(name) {
            return Ok(ResolvedName::Expr(Expression::typed(
                ExpressionKind::IntrinsicFunction { intrinsic },
                ExpressionType::IntrinsicFunction,
                location.clone(),
            )));
        }

        if let Some(keyword) = type_keyword(name) {
            if let TypeKeyword::Primitive(prim) = keyword {
                return Ok(ResolvedName::Expr(Expression::typed(
                    ExpressionKind::Type {
                        ty: ExpressionType::Primitive(prim),
                    },
                    ExpressionType::Type(Box::new(ExpressionType::Primitive(prim))),
                    location.clone(),
                )));
            }
            return Ok(ResolvedName::Keyword(keyword));
        }

        if self.options.allow_partial_sanitization {
            return Ok(ResolvedName::Unresolved);
        }
        Err(CompilerError::UnknownIdentifier {
            name: name.to_owned(),
        }
        .at(location.clone()))
    }

    /// Follows an alias chain to its underlying target expression.
    pub(crate) fn alias_target_deep(&self, index: nzsl_ast::AliasIndex) -> Expression {
        let mut index = index;
        loop {
            let Some(data) = self.aliases.get(&index) else {
                return Expression::new(
                    ExpressionKind::AliasValue { alias: index },
                    SourceLocation::default(),
                );
            };
            match &data.target.kind {
                ExpressionKind::AliasValue { alias } => index = *alias,
                _ => return data.target.clone(),
            }
        }
    }

    // ---- type resolution ----

    /// Resolves a declared-type position.
    pub(crate) fn resolve_type_value(
        &mut self,
        value: &ExprValue<ExpressionType>,
        size_required: bool,
        location: &SourceLocation,
    ) -> Result<ExpressionType, Error> {
        let ty = match value {
            ExprValue::Resolved(ty) => ty.clone(),
            ExprValue::Expr(expr) => self.resolve_type_expr(expr, location)?,
        };
        if size_required {
            if let ExpressionType::Array { length: None, .. } = &ty {
                return Err(CompilerError::ArrayLengthRequired.at(location.clone()));
            }
        }
        Ok(ty)
    }

    /// Resolves type syntax, which parses as expression syntax.
    pub(crate) fn resolve_type_expr(
        &mut self,
        expr: &Expression,
        err_location: &SourceLocation,
    ) -> Result<ExpressionType, Error> {
        match &expr.kind {
            ExpressionKind::Identifier { name } => {
                match self.resolve_identifier(name, &expr.location)? {
                    ResolvedName::Expr(resolved) => self.type_from_expression(&resolved),
                    ResolvedName::Keyword(_) | ResolvedName::Module(_) => {
                        Err(CompilerError::TypeExpected { got: name.clone() }
                            .at(expr.location.clone()))
                    }
                    ResolvedName::Unresolved => Err(CompilerError::UnknownIdentifier {
                        name: name.clone(),
                    }
                    .at(expr.location.clone())),
                }
            }
            ExpressionKind::AccessIndex {
                expr: inner,
                indices,
            } => {
                let ExpressionKind::Identifier { name } = &inner.kind else {
                    return Err(CompilerError::TypeExpected {
                        got: "<expression>".into(),
                    }
                    .at(expr.location.clone()));
                };
                let Some(keyword) = type_keyword(name) else {
                    return Err(CompilerError::TypeExpected { got: name.clone() }
                        .at(inner.location.clone()));
                };
                self.resolve_type_constructor(keyword, indices, &expr.location, err_location)
            }
            ExpressionKind::AccessIdentifier {
                expr: inner,
                identifiers,
            } => {
                // module-qualified type reference, e.g. `_Module.Struct`
                let resolved = self.resolve_qualified(inner, identifiers)?;
                self.type_from_expression(&resolved)
            }
            ExpressionKind::Type { ty } => Ok(ty.clone()),
            _ => Err(CompilerError::TypeExpected {
                got: "<expression>".into(),
            }
            .at(expr.location.clone())),
        }
    }

    fn type_from_expression(&self, expr: &Expression) -> Result<ExpressionType, Error> {
        match &expr.kind {
            ExpressionKind::StructType { struct_index } => {
                Ok(ExpressionType::Struct(*struct_index))
            }
            ExpressionKind::Type { ty } => Ok(ty.clone()),
            ExpressionKind::AliasValue { alias } => {
                let target = self.alias_target_deep(*alias);
                match &target.kind {
                    ExpressionKind::StructType { struct_index } => {
                        Ok(ExpressionType::Struct(*struct_index))
                    }
                    ExpressionKind::Type { ty } => Ok(ty.clone()),
                    _ => Err(CompilerError::TypeExpected {
                        got: "<alias>".into(),
                    }
                    .at(expr.location.clone())),
                }
            }
            _ => Err(CompilerError::TypeExpected {
                got: self.type_name(
                    expr.cached_type
                        .as_ref()
                        .unwrap_or(&ExpressionType::NoType),
                ),
            }
            .at(expr.location.clone())),
        }
    }

    fn resolve_type_constructor(
        &mut self,
        keyword: TypeKeyword,
        indices: &[Expression],
        location: &SourceLocation,
        err_location: &SourceLocation,
    ) -> Result<ExpressionType, Error> {
        let expect_primitive = |sanitizer: &mut Self, expr: &Expression| {
            match sanitizer.resolve_type_expr(expr, err_location)? {
                ExpressionType::Primitive(prim) => Ok(prim),
                other => Err(CompilerError::TypeExpected {
                    got: sanitizer.type_name(&other),
                }
                .at(expr.location.clone())),
            }
        };

        match keyword {
            TypeKeyword::Vector(components) => {
                let [prim_expr] = indices else {
                    return Err(CompilerError::TypeExpected {
                        got: "vector element type".into(),
                    }
                    .at(location.clone()));
                };
                let prim = expect_primitive(self, prim_expr)?;
                Ok(ExpressionType::Vector { prim, components })
            }
            TypeKeyword::Matrix(columns, rows) => {
                let [prim_expr] = indices else {
                    return Err(CompilerError::TypeExpected {
                        got: "matrix element type".into(),
                    }
                    .at(location.clone()));
                };
                let prim = expect_primitive(self, prim_expr)?;
                Ok(ExpressionType::Matrix {
                    prim,
                    columns,
                    rows,
                })
            }
            TypeKeyword::Array => {
                let Some(element_expr) = indices.first() else {
                    return Err(CompilerError::TypeExpected {
                        got: "array element type".into(),
                    }
                    .at(location.clone()));
                };
                let element = self.resolve_type_expr(element_expr, err_location)?;
                if let ExpressionType::Array { length: None, .. } = element {
                    return Err(CompilerError::ArrayLengthRequired.at(element_expr.location.clone()));
                }
                let length = match indices.get(1) {
                    Some(length_expr) => self.eval_u32_constant(length_expr)?,
                    None => None,
                };
                Ok(ExpressionType::Array {
                    element: Box::new(element),
                    length,
                })
            }
            TypeKeyword::Uniform => {
                let [inner] = indices else {
                    return Err(CompilerError::TypeExpected {
                        got: "uniform content type".into(),
                    }
                    .at(location.clone()));
                };
                match self.resolve_type_expr(inner, err_location)? {
                    ExpressionType::Struct(index) => Ok(ExpressionType::Uniform(index)),
                    other => Err(CompilerError::TypeExpected {
                        got: self.type_name(&other),
                    }
                    .at(inner.location.clone())),
                }
            }
            TypeKeyword::Sampler(dim) => {
                let [prim_expr] = indices else {
                    return Err(CompilerError::TypeExpected {
                        got: "sampled type".into(),
                    }
                    .at(location.clone()));
                };
                let sampled = expect_primitive(self, prim_expr)?;
                Ok(ExpressionType::Sampler { sampled, dim })
            }
            TypeKeyword::Primitive(prim) => {
                if indices.is_empty() {
                    Ok(ExpressionType::Primitive(prim))
                } else {
                    Err(CompilerError::TypeExpected {
                        got: prim.to_string(),
                    }
                    .at(location.clone()))
                }
            }
        }
    }

    /// Resolves `Module.member` into the member's reference expression.
    fn resolve_qualified(
        &mut self,
        base: &Expression,
        entries: &[AccessEntry],
    ) -> Result<Expression, Error> {
        let ExpressionKind::Identifier { name } = &base.kind else {
            return Err(CompilerError::TypeExpected {
                got: "<expression>".into(),
            }
            .at(base.location.clone()));
        };
        let ResolvedName::Module(position) = self.resolve_identifier(name, &base.location)? else {
            return Err(CompilerError::UnknownIdentifier { name: name.clone() }
                .at(base.location.clone()));
        };
        let [entry] = entries else {
            return Err(CompilerError::UnknownIdentifier {
                name: entries
                    .first()
                    .map(|e| e.identifier.clone())
                    .unwrap_or_default(),
            }
            .at(base.location.clone()));
        };
        let mut member = self.module_member(position, &entry.identifier).ok_or_else(|| {
            CompilerError::UnknownIdentifier {
                name: entry.identifier.clone(),
            }
            .at(entry.location.clone())
        })?;
        member.location = entry.location.clone();
        Ok(member)
    }

    // ---- expressions ----

    pub(crate) fn sanitize_expression(&mut self, expr: &Expression) -> Result<Expression, Error> {
        let location = expr.location.clone();
        match &expr.kind {
            ExpressionKind::ConstantValue { value } => {
                Ok(Expression::constant(value.clone(), location))
            }
            ExpressionKind::Identifier { name } => {
                match self.resolve_identifier(name, &location)? {
                    ResolvedName::Expr(resolved) => Ok(resolved),
                    ResolvedName::Unresolved => Ok(Expression::new(
                        ExpressionKind::Identifier { name: name.clone() },
                        location,
                    )),
                    ResolvedName::Keyword(_) | ResolvedName::Module(_) => {
                        Err(CompilerError::TypeExpected { got: name.clone() }.at(location))
                    }
                }
            }
            ExpressionKind::AccessIdentifier { expr, identifiers } => {
                self.sanitize_access_identifier(expr, identifiers, location)
            }
            ExpressionKind::AccessIndex { expr, indices } => {
                self.sanitize_access_index(expr, indices, location)
            }
            ExpressionKind::Swizzle { expr, pattern } => {
                let inner = self.sanitize_expression(expr)?;
                self.apply_swizzle(inner, *pattern, &location)
            }
            ExpressionKind::Assign { op, left, right } => {
                self.sanitize_assign(*op, left, right, location)
            }
            ExpressionKind::Binary { op, left, right } => {
                let left = self.sanitize_expression(left)?;
                let right = self.sanitize_expression(right)?;
                let ty = match (&left.cached_type, &right.cached_type) {
                    (Some(lt), Some(rt)) => Some(self.validate_binary(*op, lt, rt, &location)?),
                    _ if self.options.allow_partial_sanitization => None,
                    _ => None,
                };
                Ok(Expression {
                    location,
                    cached_type: ty,
                    kind: ExpressionKind::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                })
            }
            ExpressionKind::Unary { op, expr } => {
                let inner = self.sanitize_expression(expr)?;
                let ty = match &inner.cached_type {
                    Some(ty) => Some(self.validate_unary(*op, ty, &location)?),
                    None => None,
                };
                Ok(Expression {
                    location,
                    cached_type: ty,
                    kind: ExpressionKind::Unary {
                        op: *op,
                        expr: Box::new(inner),
                    },
                })
            }
            ExpressionKind::CallFunction { target, parameters } => {
                self.sanitize_call(target, parameters, location)
            }
            ExpressionKind::CallMethod {
                object,
                method,
                parameters,
            } => self.sanitize_method_call(object, method, parameters, location),
            ExpressionKind::Cast {
                target,
                expressions,
            } => self.sanitize_cast(target, expressions, location),
            ExpressionKind::Conditional {
                condition,
                true_path,
                false_path,
            } => {
                let (folded, value) = self.eval_constant(condition)?;
                match value {
                    Some(ConstantValue::Bool(true)) => self.sanitize_expression(true_path),
                    Some(ConstantValue::Bool(false)) => self.sanitize_expression(false_path),
                    Some(_) => Err(CompilerError::ConditionExpectedBool {
                        got: folded
                            .cached_type
                            .as_ref()
                            .map(|ty| self.type_name(ty))
                            .unwrap_or_default(),
                    }
                    .at(folded.location)),
                    None if self.options.allow_partial_sanitization => Ok(Expression {
                        location,
                        cached_type: None,
                        kind: ExpressionKind::Conditional {
                            condition: Box::new(folded),
                            true_path: Box::new(self.sanitize_expression(true_path)?),
                            false_path: Box::new(self.sanitize_expression(false_path)?),
                        },
                    }),
                    None => Err(CompilerError::ConstantExpressionRequired.at(folded.location)),
                }
            }

            // pre-resolved references re-derive their cached type from the
            // registries so sanitization stays idempotent
            ExpressionKind::VariableValue { variable } => {
                let ty = self
                    .variables
                    .get(variable)
                    .map(|data| data.ty.clone())
                    .or_else(|| expr.cached_type.clone());
                Ok(Expression {
                    location,
                    cached_type: ty,
                    kind: ExpressionKind::VariableValue {
                        variable: *variable,
                    },
                })
            }
            ExpressionKind::Constant { constant } => {
                let data = self.constants.get(constant);
                if self.options.remove_const_declaration {
                    if let Some(value) = data.and_then(|data| data.value.clone()) {
                        return Ok(Expression::constant(value, location));
                    }
                }
                let ty = data
                    .map(|data| data.ty.clone())
                    .or_else(|| expr.cached_type.clone());
                Ok(Expression {
                    location,
                    cached_type: ty,
                    kind: ExpressionKind::Constant {
                        constant: *constant,
                    },
                })
            }
            ExpressionKind::Function { function } => Ok(Expression::typed(
                ExpressionKind::Function {
                    function: *function,
                },
                ExpressionType::Function(*function),
                location,
            )),
            ExpressionKind::StructType { struct_index } => Ok(Expression::typed(
                ExpressionKind::StructType {
                    struct_index: *struct_index,
                },
                ExpressionType::Type(Box::new(ExpressionType::Struct(*struct_index))),
                location,
            )),
            ExpressionKind::AliasValue { alias } => {
                if self.options.remove_aliases {
                    let mut target = self.alias_target_deep(*alias);
                    target.location = location;
                    return Ok(target);
                }
                let ty = self
                    .aliases
                    .get(alias)
                    .and_then(|data| data.target.cached_type.clone())
                    .or_else(|| expr.cached_type.clone());
                Ok(Expression {
                    location,
                    cached_type: ty,
                    kind: ExpressionKind::AliasValue { alias: *alias },
                })
            }
            ExpressionKind::IntrinsicFunction { intrinsic } => Ok(Expression::typed(
                ExpressionKind::IntrinsicFunction {
                    intrinsic: *intrinsic,
                },
                ExpressionType::IntrinsicFunction,
                location,
            )),
            ExpressionKind::Intrinsic {
                intrinsic,
                parameters,
            } => {
                let parameters = parameters
                    .iter()
                    .map(|p| self.sanitize_expression(p))
                    .collect::<Result<Vec<_>, _>>()?;
                let ty = self.validate_intrinsic(*intrinsic, &parameters, &location)?;
                Ok(Expression {
                    location,
                    cached_type: Some(ty),
                    kind: ExpressionKind::Intrinsic {
                        intrinsic: *intrinsic,
                        parameters,
                    },
                })
            }
            ExpressionKind::Type { ty } => Ok(Expression::typed(
                ExpressionKind::Type { ty: ty.clone() },
                ExpressionType::Type(Box::new(ty.clone())),
                location,
            )),
        }
    }

    // ---- member access ----

    fn sanitize_access_identifier(
        &mut self,
        base: &Expression,
        entries: &[AccessEntry],
        _location: SourceLocation,
    ) -> Result<Expression, Error> {
        // module-qualified reference
        if let ExpressionKind::Identifier { name } = &base.kind {
            if self.find_module(name).is_some() {
                let (first, rest) = entries.split_first().expect("access chain cannot be empty");
                let mut current = self.resolve_qualified(base, std::slice::from_ref(first))?;
                for entry in rest {
                    current = self.access_step(current, entry)?;
                }
                return Ok(current);
            }
        }

        let mut current = self.sanitize_expression(base)?;
        for entry in entries {
            current = self.access_step(current, entry)?;
        }
        Ok(current)
    }

    /// One `.name` step over a value.
    fn access_step(&mut self, current: Expression, entry: &AccessEntry) -> Result<Expression, Error> {
        let Some(base_type) = current.cached_type.clone() else {
            // unresolved base in partial mode: keep the access textual
            let location = current.location.extended_to(&entry.location);
            return Ok(Expression::new(
                ExpressionKind::AccessIdentifier {
                    expr: Box::new(current),
                    identifiers: vec![entry.clone()],
                },
                location,
            ));
        };

        let struct_index = match &base_type {
            ExpressionType::Struct(index) | ExpressionType::Uniform(index) => Some(*index),
            _ => None,
        };
        if let Some(index) = struct_index {
            let Some(data) = self.structs.get(&index) else {
                return Err(CompilerError::UnknownIdentifier {
                    name: entry.identifier.clone(),
                }
                .at(entry.location.clone()));
            };
            let Some((position, member)) = data
                .description
                .members
                .iter()
                .enumerate()
                .find(|(_, member)| member.name == entry.identifier)
            else {
                return Err(CompilerError::UnknownIdentifier {
                    name: entry.identifier.clone(),
                }
                .at(entry.location.clone()));
            };
            let member_type = member
                .ty
                .resolved()
                .cloned()
                .unwrap_or(ExpressionType::NoType);
            let builtin = member
                .builtin
                .as_ref()
                .and_then(|b| b.resolved().copied());

            if let Some(builtin) = builtin {
                self.record_builtin_use(builtin, &entry.location);
            }

            let location = current.location.extended_to(&entry.location);
            if self.options.use_identifier_accesses_for_structs {
                return Ok(Expression {
                    location,
                    cached_type: Some(member_type),
                    kind: ExpressionKind::AccessIdentifier {
                        expr: Box::new(current),
                        identifiers: vec![entry.clone()],
                    },
                });
            }
            return Ok(Expression {
                location: location.clone(),
                cached_type: Some(member_type),
                kind: ExpressionKind::AccessIndex {
                    expr: Box::new(current),
                    indices: vec![Expression::constant(
                        ConstantValue::Int32(position as i32),
                        entry.location.clone(),
                    )],
                },
            });
        }

        // vector and scalar swizzles
        match &base_type {
            ExpressionType::Vector { .. } | ExpressionType::Primitive(_) => {
                let Some(pattern) = SwizzlePattern::parse(&entry.identifier) else {
                    return Err(CompilerError::SwizzleInvalid {
                        swizzle: entry.identifier.clone(),
                    }
                    .at(entry.location.clone()));
                };
                self.apply_swizzle(current, pattern, &entry.location)
            }
            other => Err(CompilerError::SwizzleUnexpectedType {
                ty: self.type_name(other),
            }
            .at(entry.location.clone())),
        }
    }

    fn record_builtin_use(&mut self, builtin: BuiltinEntry, location: &SourceLocation) {
        if let Some(ctx) = self.func_stack.last() {
            let index = ctx.index;
            if let Some(data) = self.functions.get_mut(&index) {
                data.restrictions.push(StageRestriction {
                    kind: RestrictionKind::Builtin(builtin),
                    location: location.clone(),
                });
            }
        }
    }

    fn apply_swizzle(
        &mut self,
        base: Expression,
        pattern: SwizzlePattern,
        location: &SourceLocation,
    ) -> Result<Expression, Error> {
        let base_type = base.cached_type.clone();
        let (prim, component_count) = match &base_type {
            Some(ExpressionType::Vector { prim, components }) => (*prim, *components),
            Some(ExpressionType::Primitive(prim)) if prim.is_numeric() => (*prim, 1),
            None if self.options.allow_partial_sanitization => {
                let span = base.location.extended_to(location);
                return Ok(Expression::new(
                    ExpressionKind::Swizzle {
                        expr: Box::new(base),
                        pattern,
                    },
                    span,
                ));
            }
            other => {
                return Err(CompilerError::SwizzleUnexpectedType {
                    ty: other
                        .as_ref()
                        .map(|ty| self.type_name(ty))
                        .unwrap_or_else(|| "<unresolved>".into()),
                }
                .at(location.clone()))
            }
        };
        if u32::from(pattern.max_component()) >= component_count {
            return Err(CompilerError::SwizzleInvalid {
                swizzle: pattern.to_string(),
            }
            .at(location.clone()));
        }

        let result_type = if pattern.count == 1 {
            ExpressionType::Primitive(prim)
        } else {
            ExpressionType::Vector {
                prim,
                components: pattern.count as u32,
            }
        };

        // scalar vectorization rewrites into an explicit cast
        if component_count == 1 && self.options.remove_scalar_swizzling {
            if pattern.count == 1 {
                return Ok(base);
            }
            let source = self.single_evaluation(base, "cachedResult")?;
            let expressions = (0..pattern.count).map(|_| source.clone()).collect();
            let span = source.location.extended_to(location);
            return Ok(Expression {
                location: span,
                cached_type: Some(result_type.clone()),
                kind: ExpressionKind::Cast {
                    target: ExprValue::Resolved(result_type),
                    expressions,
                },
            });
        }

        let span = base.location.extended_to(location);
        Ok(Expression {
            location: span,
            cached_type: Some(result_type),
            kind: ExpressionKind::Swizzle {
                expr: Box::new(base),
                pattern,
            },
        })
    }

    /// Guarantees an expression is evaluated once by hoisting anything
    /// non-trivial into a temporary.
    fn single_evaluation(
        &mut self,
        expr: Expression,
        name_hint: &str,
    ) -> Result<Expression, Error> {
        match &expr.kind {
            ExpressionKind::ConstantValue { .. } | ExpressionKind::VariableValue { .. } => Ok(expr),
            _ => self.hoist_to_temp(expr, name_hint),
        }
    }

    fn hoist_to_temp(&mut self, expr: Expression, name_hint: &str) -> Result<Expression, Error> {
        let ty = expr
            .cached_type
            .clone()
            .unwrap_or(ExpressionType::NoType);
        let location = expr.location.clone();
        let index = self.alloc_variable(None);
        let out_name = self.output_name(name_hint);
        self.variables.insert(
            index,
            VariableData {
                ty: ty.clone(),
            },
        );
        self.pending.push(Statement::new(
            StatementKind::DeclareVariable {
                variable_index: Some(index),
                name: out_name,
                ty: Some(ExprValue::Resolved(ty.clone())),
                initial: Some(Box::new(expr)),
            },
            location.clone(),
        ));
        Ok(Expression::typed(
            ExpressionKind::VariableValue { variable: index },
            ty,
            location,
        ))
    }

    // ---- indexing ----

    fn sanitize_access_index(
        &mut self,
        base: &Expression,
        indices: &[Expression],
        location: SourceLocation,
    ) -> Result<Expression, Error> {
        // type-constructor syntax (`vec3[f32]`, `array[T, N]`) in expression
        // position resolves to a type value
        if let ExpressionKind::Identifier { name } = &base.kind {
            if type_keyword(name).is_some() && self.scopes.find(name).is_none() {
                let whole = Expression::new(
                    ExpressionKind::AccessIndex {
                        expr: Box::new(base.clone()),
                        indices: indices.to_vec(),
                    },
                    location.clone(),
                );
                let ty = self.resolve_type_expr(&whole, &location)?;
                return Ok(Expression::typed(
                    ExpressionKind::Type { ty: ty.clone() },
                    ExpressionType::Type(Box::new(ty)),
                    location,
                ));
            }
        }

        let base = self.sanitize_expression(base)?;
        let mut result_type = base.cached_type.clone();
        let mut sanitized_indices = Vec::with_capacity(indices.len());
        for index in indices {
            let index = self.sanitize_expression(index)?;
            result_type = match result_type {
                Some(ty) => Some(self.step_index_type(&ty, &index)?),
                None => None,
            };
            sanitized_indices.push(index);
        }

        Ok(Expression {
            location,
            cached_type: result_type,
            kind: ExpressionKind::AccessIndex {
                expr: Box::new(base),
                indices: sanitized_indices,
            },
        })
    }

    fn step_index_type(
        &self,
        base: &ExpressionType,
        index: &Expression,
    ) -> Result<ExpressionType, Error> {
        let index_type = index.cached_type.as_ref();
        let is_integer = matches!(
            index_type,
            Some(ExpressionType::Primitive(prim)) if prim.is_integer()
        ) || index_type.is_none();
        if !is_integer {
            return Err(CompilerError::IndexExpectedInteger {
                got: index_type
                    .map(|ty| self.type_name(ty))
                    .unwrap_or_default(),
            }
            .at(index.location.clone()));
        }

        match base {
            ExpressionType::Array { element, .. } => Ok((**element).clone()),
            ExpressionType::Vector { prim, .. } => Ok(ExpressionType::Primitive(*prim)),
            ExpressionType::Matrix { prim, rows, .. } => Ok(ExpressionType::Vector {
                prim: *prim,
                components: *rows,
            }),
            ExpressionType::Struct(struct_index) | ExpressionType::Uniform(struct_index) => {
                // lowered member accesses index structs with literal positions
                let position = match &index.kind {
                    ExpressionKind::ConstantValue {
                        value: ConstantValue::Int32(v),
                    } if *v >= 0 => *v as usize,
                    ExpressionKind::ConstantValue {
                        value: ConstantValue::UInt32(v),
                    } => *v as usize,
                    _ => {
                        return Err(CompilerError::IndexUnexpectedType {
                            ty: self.type_name(base),
                        }
                        .at(index.location.clone()))
                    }
                };
                let member_type = self
                    .structs
                    .get(struct_index)
                    .and_then(|data| data.description.members.get(position))
                    .and_then(|member| member.ty.resolved().cloned());
                member_type.ok_or_else(|| {
                    CompilerError::IndexUnexpectedType {
                        ty: self.type_name(base),
                    }
                    .at(index.location.clone())
                })
            }
            other => Err(CompilerError::IndexUnexpectedType {
                ty: self.type_name(other),
            }
            .at(index.location.clone())),
        }
    }

    // ---- assignment ----

    fn sanitize_assign(
        &mut self,
        op: AssignOp,
        left: &Expression,
        right: &Expression,
        location: SourceLocation,
    ) -> Result<Expression, Error> {
        let left = self.sanitize_expression(left)?;
        let right = self.sanitize_expression(right)?;

        if let (Some(lt), Some(rt)) = (&left.cached_type, &right.cached_type) {
            let compatible = match op.binary_op() {
                Some(binary) => self.validate_binary(binary, lt, rt, &location).is_ok(),
                None => lt == rt,
            };
            if !compatible {
                return Err(CompilerError::UnmatchingTypes {
                    left: self.type_name(lt),
                    right: self.type_name(rt),
                }
                .at(location));
            }
        }

        let result_type = left.cached_type.clone();

        if self.options.remove_compound_assignments {
            if let Some(binary) = op.binary_op() {
                // the left side must be evaluated once: hoist computed indices
                let left = self.hoist_lvalue_indices(left)?;
                let expanded = Expression {
                    location: location.clone(),
                    cached_type: result_type.clone(),
                    kind: ExpressionKind::Binary {
                        op: binary,
                        left: Box::new(left.clone()),
                        right: Box::new(right),
                    },
                };
                return Ok(Expression {
                    location,
                    cached_type: result_type,
                    kind: ExpressionKind::Assign {
                        op: AssignOp::Simple,
                        left: Box::new(left),
                        right: Box::new(expanded),
                    },
                });
            }
        }

        Ok(Expression {
            location,
            cached_type: result_type,
            kind: ExpressionKind::Assign {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
        })
    }

    fn hoist_lvalue_indices(&mut self, expr: Expression) -> Result<Expression, Error> {
        let Expression {
            location,
            cached_type,
            kind,
        } = expr;
        let kind = match kind {
            ExpressionKind::AccessIndex { expr, indices } => {
                let expr = Box::new(self.hoist_lvalue_indices(*expr)?);
                let indices = indices
                    .into_iter()
                    .map(|index| self.single_evaluation(index, "index"))
                    .collect::<Result<Vec<_>, _>>()?;
                ExpressionKind::AccessIndex { expr, indices }
            }
            ExpressionKind::Swizzle { expr, pattern } => ExpressionKind::Swizzle {
                expr: Box::new(self.hoist_lvalue_indices(*expr)?),
                pattern,
            },
            other => other,
        };
        Ok(Expression {
            location,
            cached_type,
            kind,
        })
    }

    // ---- calls ----

    fn sanitize_call(
        &mut self,
        target: &Expression,
        parameters: &[Expression],
        location: SourceLocation,
    ) -> Result<Expression, Error> {
        let target = self.sanitize_expression(target)?;
        // aliases dispatch through their target but stay in the output
        let dispatch = match &target.kind {
            ExpressionKind::AliasValue { alias } => self.alias_target_deep(*alias),
            _ => target.clone(),
        };

        let parameters = parameters
            .iter()
            .map(|p| self.sanitize_expression(p))
            .collect::<Result<Vec<_>, _>>()?;

        match &dispatch.kind {
            ExpressionKind::Function { function } => {
                let function = *function;
                let (name, expected, return_type) = match self.functions.get(&function) {
                    Some(data) => (
                        data.name.clone(),
                        data.parameters.clone(),
                        data.return_type.clone(),
                    ),
                    None => {
                        return Err(CompilerError::UnknownIdentifier {
                            name: format!("function #{function}"),
                        }
                        .at(location))
                    }
                };
                if parameters.len() != expected.len() {
                    return Err(CompilerError::CallUnmatchingParameterCount {
                        function: name,
                        expected: expected.len(),
                        got: parameters.len(),
                    }
                    .at(location));
                }
                for (i, (param, expected_ty)) in parameters.iter().zip(&expected).enumerate() {
                    if let Some(ty) = &param.cached_type {
                        if ty != expected_ty {
                            return Err(CompilerError::CallUnmatchingParameterType {
                                index: i,
                                expected: self.type_name(expected_ty),
                                got: self.type_name(ty),
                            }
                            .at(param.location.clone()));
                        }
                    }
                }

                // call edges feed the stage-flow analysis
                if let Some(ctx) = self.func_stack.last() {
                    let caller = ctx.index;
                    if let Some(data) = self.functions.get_mut(&caller) {
                        data.calls.push(function);
                    }
                }

                Ok(Expression {
                    location,
                    cached_type: Some(return_type),
                    kind: ExpressionKind::CallFunction {
                        target: Box::new(target),
                        parameters,
                    },
                })
            }
            ExpressionKind::IntrinsicFunction { intrinsic } => {
                let intrinsic = *intrinsic;
                let ty = self.validate_intrinsic(intrinsic, &parameters, &location)?;
                Ok(Expression {
                    location,
                    cached_type: Some(ty),
                    kind: ExpressionKind::Intrinsic {
                        intrinsic,
                        parameters,
                    },
                })
            }
            ExpressionKind::Type { ty } => {
                let ty = ty.clone();
                self.finish_cast(ty, parameters, location)
            }
            ExpressionKind::Identifier { .. } => Ok(Expression::new(
                ExpressionKind::CallFunction {
                    target: Box::new(target),
                    parameters,
                },
                location,
            )),
            _ => Err(CompilerError::TypeExpected {
                got: self.type_name(
                    target
                        .cached_type
                        .as_ref()
                        .unwrap_or(&ExpressionType::NoType),
                ),
            }
            .at(target.location)),
        }
    }

    fn sanitize_method_call(
        &mut self,
        object: &Expression,
        method: &str,
        parameters: &[Expression],
        location: SourceLocation,
    ) -> Result<Expression, Error> {
        // module-qualified function calls parse as method calls
        if let ExpressionKind::Identifier { name } = &object.kind {
            if let Some(position) = self.find_module(name) {
                let member = self.module_member(position, method).ok_or_else(|| {
                    CompilerError::UnknownIdentifier {
                        name: method.to_owned(),
                    }
                    .at(location.clone())
                })?;
                return self.sanitize_call_resolved(member, parameters, location);
            }
        }

        let object = self.sanitize_expression(object)?;
        let object_type = object.cached_type.clone();
        match (&object_type, method) {
            (Some(ExpressionType::Sampler { sampled, dim }), "Sample") => {
                let sampled = *sampled;
                let coords = *dim;
                let parameters = parameters
                    .iter()
                    .map(|p| self.sanitize_expression(p))
                    .collect::<Result<Vec<_>, _>>()?;
                if parameters.len() != 1 {
                    return Err(CompilerError::CallUnmatchingParameterCount {
                        function: "Sample".into(),
                        expected: 1,
                        got: parameters.len(),
                    }
                    .at(location));
                }
                let expected = match coords.coordinate_components() {
                    1 => ExpressionType::Primitive(PrimitiveType::Float32),
                    components => ExpressionType::Vector {
                        prim: PrimitiveType::Float32,
                        components,
                    },
                };
                if let Some(ty) = &parameters[0].cached_type {
                    if *ty != expected {
                        return Err(CompilerError::IntrinsicExpectedType {
                            index: 0,
                            expected: self.type_name(&expected),
                            got: self.type_name(ty),
                        }
                        .at(parameters[0].location.clone()));
                    }
                }
                let mut args = vec![object];
                args.extend(parameters);
                Ok(Expression {
                    location,
                    cached_type: Some(ExpressionType::Vector {
                        prim: sampled,
                        components: 4,
                    }),
                    kind: ExpressionKind::Intrinsic {
                        intrinsic: IntrinsicType::SampleTexture,
                        parameters: args,
                    },
                })
            }
            (Some(other), _) => Err(CompilerError::MethodNotFound {
                method: method.to_owned(),
                ty: self.type_name(other),
            }
            .at(location)),
            (None, _) => Ok(Expression::new(
                ExpressionKind::CallMethod {
                    object: Box::new(object),
                    method: method.to_owned(),
                    parameters: parameters
                        .iter()
                        .map(|p| self.sanitize_expression(p))
                        .collect::<Result<Vec<_>, _>>()?,
                },
                location,
            )),
        }
    }

    fn sanitize_call_resolved(
        &mut self,
        target: Expression,
        parameters: &[Expression],
        location: SourceLocation,
    ) -> Result<Expression, Error> {
        let call = Expression::new(
            ExpressionKind::CallFunction {
                target: Box::new(target),
                parameters: parameters.to_vec(),
            },
            location,
        );
        self.sanitize_expression(&call)
    }

    // ---- casts ----

    fn sanitize_cast(
        &mut self,
        target: &ExprValue<ExpressionType>,
        expressions: &[Expression],
        location: SourceLocation,
    ) -> Result<Expression, Error> {
        let target_type = match target {
            ExprValue::Resolved(ty) => ty.clone(),
            ExprValue::Expr(expr) => self.resolve_type_expr(expr, &location)?,
        };
        let expressions = expressions
            .iter()
            .map(|e| self.sanitize_expression(e))
            .collect::<Result<Vec<_>, _>>()?;
        self.finish_cast(target_type, expressions, location)
    }

    fn finish_cast(
        &mut self,
        target: ExpressionType,
        expressions: Vec<Expression>,
        location: SourceLocation,
    ) -> Result<Expression, Error> {
        let build = |target: ExpressionType, expressions: Vec<Expression>, location| Expression {
            location,
            cached_type: Some(target.clone()),
            kind: ExpressionKind::Cast {
                target: ExprValue::Resolved(target),
                expressions,
            },
        };

        match &target {
            ExpressionType::Primitive(prim) => {
                if expressions.len() != 1 {
                    return Err(CompilerError::CastComponentMismatch {
                        got: expressions.len() as u32,
                        expected: 1,
                    }
                    .at(location));
                }
                if let Some(ty) = &expressions[0].cached_type {
                    let convertible = matches!(
                        ty,
                        ExpressionType::Primitive(from) if from.is_numeric() && prim.is_numeric()
                    ) || ty == &target;
                    if !convertible {
                        return Err(CompilerError::UnmatchingTypes {
                            left: self.type_name(ty),
                            right: self.type_name(&target),
                        }
                        .at(expressions[0].location.clone()));
                    }
                }
                Ok(build(target, expressions, location))
            }
            ExpressionType::Vector { prim, components } => {
                // single same-size vector: component-wise conversion
                if expressions.len() == 1 {
                    if let Some(ExpressionType::Vector {
                        components: from, ..
                    }) = &expressions[0].cached_type
                    {
                        if from == components {
                            return Ok(build(target, expressions, location));
                        }
                    }
                }
                let mut total = 0u32;
                for expr in &expressions {
                    match &expr.cached_type {
                        Some(ExpressionType::Primitive(p)) if p == prim => total += 1,
                        Some(ExpressionType::Vector { prim: p, components }) if p == prim => {
                            total += components
                        }
                        Some(other) => {
                            return Err(CompilerError::UnmatchingTypes {
                                left: self.type_name(other),
                                right: prim.to_string(),
                            }
                            .at(expr.location.clone()))
                        }
                        None => return Ok(build(target, expressions, location)),
                    }
                }
                if total != *components {
                    return Err(CompilerError::CastComponentMismatch {
                        got: total,
                        expected: *components,
                    }
                    .at(location));
                }
                Ok(build(target, expressions, location))
            }
            ExpressionType::Matrix {
                prim,
                columns,
                rows,
            } => {
                // matrix-from-matrix: the resizing cast
                if expressions.len() == 1 {
                    if let Some(ExpressionType::Matrix {
                        columns: from_columns,
                        rows: from_rows,
                        prim: from_prim,
                    }) = expressions[0].cached_type.clone()
                    {
                        if from_prim != *prim {
                            return Err(CompilerError::UnmatchingTypes {
                                left: from_prim.to_string(),
                                right: prim.to_string(),
                            }
                            .at(expressions[0].location.clone()));
                        }
                        if self.options.remove_matrix_cast
                            && *prim == PrimitiveType::Float32
                            && !self.func_stack.is_empty()
                        {
                            let mut expressions = expressions;
                            return self.rewrite_matrix_cast(
                                expressions.pop().expect("length checked"),
                                (from_columns, from_rows),
                                (*columns, *rows),
                                location,
                            );
                        }
                        return Ok(build(target, expressions, location));
                    }
                }
                if expressions.len() as u32 != *columns {
                    return Err(CompilerError::CastComponentMismatch {
                        got: expressions.len() as u32,
                        expected: *columns,
                    }
                    .at(location));
                }
                for expr in &expressions {
                    match &expr.cached_type {
                        Some(ExpressionType::Vector { components, .. }) => {
                            if components != rows {
                                return Err(
                                    CompilerError::CastMatrixVectorComponentMismatch {
                                        got: *components,
                                        expected: *rows,
                                    }
                                    .at(expr.location.clone()),
                                );
                            }
                        }
                        Some(other) => {
                            return Err(CompilerError::UnmatchingTypes {
                                left: self.type_name(other),
                                right: format!("vec{rows}[{prim}]"),
                            }
                            .at(expr.location.clone()))
                        }
                        None => {}
                    }
                }
                Ok(build(target, expressions, location))
            }
            ExpressionType::Array { element, length } => {
                for expr in &expressions {
                    if let Some(ty) = &expr.cached_type {
                        if ty != element.as_ref() {
                            return Err(CompilerError::UnmatchingTypes {
                                left: self.type_name(ty),
                                right: self.type_name(element),
                            }
                            .at(expr.location.clone()));
                        }
                    }
                }
                let final_length = match length {
                    Some(length) => {
                        if expressions.len() as u32 != *length {
                            return Err(CompilerError::CastComponentMismatch {
                                got: expressions.len() as u32,
                                expected: *length,
                            }
                            .at(location));
                        }
                        *length
                    }
                    // the literal's element count sizes the array
                    None => expressions.len() as u32,
                };
                Ok(build(
                    ExpressionType::Array {
                        element: element.clone(),
                        length: Some(final_length),
                    },
                    expressions,
                    location,
                ))
            }
            other => Err(CompilerError::TypeExpected {
                got: self.type_name(other),
            }
            .at(location)),
        }
    }

    /// Rewrites `matN[f32](m)` column by column through a temporary.
    fn rewrite_matrix_cast(
        &mut self,
        source: Expression,
        (from_columns, from_rows): (u32, u32),
        (to_columns, to_rows): (u32, u32),
        location: SourceLocation,
    ) -> Result<Expression, Error> {
        if from_columns == to_columns && from_rows == to_rows {
            return Ok(source);
        }

        let prim = PrimitiveType::Float32;
        let target = ExpressionType::Matrix {
            prim,
            columns: to_columns,
            rows: to_rows,
        };
        let column_type = ExpressionType::Vector {
            prim,
            components: to_rows,
        };

        let source = self.single_evaluation(source, "cachedResult")?;

        // the filled temporary stands in for the cast
        let temp_index = self.alloc_variable(None);
        let temp_name = self.output_name("temp");
        self.variables.insert(
            temp_index,
            VariableData {
                ty: target.clone(),
            },
        );
        self.pending.push(Statement::new(
            StatementKind::DeclareVariable {
                variable_index: Some(temp_index),
                name: temp_name,
                ty: Some(ExprValue::Resolved(target.clone())),
                initial: None,
            },
            location.clone(),
        ));
        let temp = Expression::typed(
            ExpressionKind::VariableValue {
                variable: temp_index,
            },
            target.clone(),
            location.clone(),
        );

        for column in 0..to_columns {
            let value = if column < from_columns {
                let source_column = Expression::typed(
                    ExpressionKind::AccessIndex {
                        expr: Box::new(source.clone()),
                        indices: vec![Expression::constant(
                            ConstantValue::Int32(column as i32),
                            location.clone(),
                        )],
                    },
                    ExpressionType::Vector {
                        prim,
                        components: from_rows,
                    },
                    location.clone(),
                );
                match to_rows.cmp(&from_rows) {
                    std::cmp::Ordering::Equal => source_column,
                    std::cmp::Ordering::Less => {
                        // shrink: keep the first rows with a .xy / .xyz swizzle
                        let mut components = [0u8; 4];
                        for (i, slot) in components.iter_mut().enumerate().take(to_rows as usize) {
                            *slot = i as u8;
                        }
                        Expression::typed(
                            ExpressionKind::Swizzle {
                                expr: Box::new(source_column),
                                pattern: SwizzlePattern {
                                    components,
                                    count: to_rows as usize,
                                },
                            },
                            column_type.clone(),
                            location.clone(),
                        )
                    }
                    std::cmp::Ordering::Greater => {
                        // grow: pad with the identity pattern
                        let mut expressions = vec![source_column];
                        for row in from_rows..to_rows {
                            let pad = if row == column { 1.0 } else { 0.0 };
                            expressions.push(Expression::constant(
                                ConstantValue::Float32(pad),
                                location.clone(),
                            ));
                        }
                        Expression {
                            location: location.clone(),
                            cached_type: Some(column_type.clone()),
                            kind: ExpressionKind::Cast {
                                target: ExprValue::Resolved(column_type.clone()),
                                expressions,
                            },
                        }
                    }
                }
            } else {
                // synthesized identity column
                let mut expressions = Vec::with_capacity(to_rows as usize);
                for row in 0..to_rows {
                    let value = if row == column { 1.0 } else { 0.0 };
                    expressions.push(Expression::constant(
                        ConstantValue::Float32(value),
                        location.clone(),
                    ));
                }
                Expression {
                    location: location.clone(),
                    cached_type: Some(column_type.clone()),
                    kind: ExpressionKind::Cast {
                        target: ExprValue::Resolved(column_type.clone()),
                        expressions,
                    },
                }
            };

            let temp_column = Expression::typed(
                ExpressionKind::AccessIndex {
                    expr: Box::new(temp.clone()),
                    indices: vec![Expression::constant(
                        ConstantValue::Int32(column as i32),
                        location.clone(),
                    )],
                },
                column_type.clone(),
                location.clone(),
            );
            self.pending.push(Statement::new(
                StatementKind::Expression {
                    expression: Box::new(Expression {
                        location: location.clone(),
                        cached_type: Some(column_type.clone()),
                        kind: ExpressionKind::Assign {
                            op: AssignOp::Simple,
                            left: Box::new(temp_column),
                            right: Box::new(value),
                        },
                    }),
                },
                location.clone(),
            ));
        }

        Ok(temp)
    }

    // ---- operator and intrinsic typing ----

    pub(crate) fn validate_binary(
        &self,
        op: BinaryOp,
        left: &ExpressionType,
        right: &ExpressionType,
        location: &SourceLocation,
    ) -> Result<ExpressionType, Error> {
        use ExpressionType as T;

        let incompatible = || {
            CompilerError::BinaryIncompatibleTypes {
                left: self.type_name(left),
                right: self.type_name(right),
            }
            .at(location.clone())
        };

        if op.is_comparison() {
            if left != right {
                return Err(CompilerError::UnmatchingTypes {
                    left: self.type_name(left),
                    right: self.type_name(right),
                }
                .at(location.clone()));
            }
            let equality = matches!(op, BinaryOp::CompEq | BinaryOp::CompNe);
            let ordered = matches!(
                left,
                T::Primitive(prim) if prim.is_numeric()
            );
            if equality || ordered {
                return Ok(T::Primitive(PrimitiveType::Boolean));
            }
            return Err(incompatible());
        }

        if op.is_logical() {
            if matches!(left, T::Primitive(PrimitiveType::Boolean))
                && matches!(right, T::Primitive(PrimitiveType::Boolean))
            {
                return Ok(T::Primitive(PrimitiveType::Boolean));
            }
            return Err(incompatible());
        }

        match (left, right) {
            (T::Primitive(a), T::Primitive(b)) if a == b && a.is_numeric() => Ok(left.clone()),
            (T::Vector { prim: a, components: ca }, T::Vector { prim: b, components: cb })
                if a == b && ca == cb && a.is_numeric() =>
            {
                Ok(left.clone())
            }
            (T::Vector { prim, .. }, T::Primitive(scalar))
                if prim == scalar
                    && prim.is_numeric()
                    && matches!(op, BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo) =>
            {
                Ok(left.clone())
            }
            (T::Primitive(scalar), T::Vector { prim, .. })
                if prim == scalar && prim.is_numeric() && op == BinaryOp::Multiply =>
            {
                Ok(right.clone())
            }
            (
                T::Matrix {
                    prim: a,
                    columns: ca,
                    rows: ra,
                },
                T::Matrix {
                    prim: b,
                    columns: cb,
                    rows: rb,
                },
            ) if a == b => match op {
                BinaryOp::Add | BinaryOp::Subtract if ca == cb && ra == rb => Ok(left.clone()),
                BinaryOp::Multiply if ca == rb => Ok(T::Matrix {
                    prim: *a,
                    columns: *cb,
                    rows: *ra,
                }),
                _ => Err(incompatible()),
            },
            (
                T::Matrix {
                    prim: a,
                    columns,
                    rows,
                },
                T::Vector { prim: b, components },
            ) if a == b && op == BinaryOp::Multiply && components == columns => Ok(T::Vector {
                prim: *a,
                components: *rows,
            }),
            (T::Matrix { .. }, T::Primitive(b)) if op == BinaryOp::Multiply && b.is_numeric() => {
                Ok(left.clone())
            }
            _ => Err(incompatible()),
        }
    }

    fn validate_unary(
        &self,
        op: UnaryOp,
        ty: &ExpressionType,
        location: &SourceLocation,
    ) -> Result<ExpressionType, Error> {
        use ExpressionType as T;
        let ok = match op {
            UnaryOp::Minus | UnaryOp::Plus => matches!(
                ty,
                T::Primitive(prim) if prim.is_numeric()
            ) || matches!(ty, T::Vector { prim, .. } if prim.is_numeric())
                || matches!(ty, T::Matrix { .. }),
            UnaryOp::LogicalNot => matches!(ty, T::Primitive(PrimitiveType::Boolean)),
        };
        if ok {
            Ok(ty.clone())
        } else {
            Err(CompilerError::UnaryUnsupported {
                ty: self.type_name(ty),
            }
            .at(location.clone()))
        }
    }

    pub(crate) fn validate_intrinsic(
        &self,
        intrinsic: IntrinsicType,
        parameters: &[Expression],
        location: &SourceLocation,
    ) -> Result<ExpressionType, Error> {
        use ExpressionType as T;

        let name = intrinsic.name().unwrap_or("Sample");
        let expect_count = |count: usize| -> Result<(), Error> {
            if parameters.len() != count {
                return Err(CompilerError::CallUnmatchingParameterCount {
                    function: name.to_owned(),
                    expected: count,
                    got: parameters.len(),
                }
                .at(location.clone()));
            }
            Ok(())
        };
        let param_type = |index: usize| -> Option<&ExpressionType> {
            parameters.get(index).and_then(|p| p.cached_type.as_ref())
        };
        let mismatch = |index: usize, expected: &str| -> Error {
            CompilerError::IntrinsicExpectedType {
                index,
                expected: expected.to_owned(),
                got: param_type(index)
                    .map(|ty| self.type_name(ty))
                    .unwrap_or_else(|| "<unresolved>".into()),
            }
            .at(parameters[index].location.clone())
        };
        let float_vector = |ty: &T| {
            matches!(ty, T::Vector { prim: PrimitiveType::Float32, .. })
        };
        let float_like = |ty: &T| {
            float_vector(ty) || matches!(ty, T::Primitive(PrimitiveType::Float32))
        };
        let numeric = |ty: &T| {
            matches!(ty, T::Primitive(prim) if prim.is_numeric())
                || matches!(ty, T::Vector { prim, .. } if prim.is_numeric())
        };

        match intrinsic {
            IntrinsicType::CrossProduct => {
                expect_count(2)?;
                let vec3 = T::Vector {
                    prim: PrimitiveType::Float32,
                    components: 3,
                };
                for index in 0..2 {
                    match param_type(index) {
                        Some(ty) if *ty == vec3 => {}
                        Some(_) => return Err(mismatch(index, "vec3[f32]")),
                        None => {}
                    }
                }
                Ok(vec3)
            }
            IntrinsicType::DotProduct => {
                expect_count(2)?;
                match (param_type(0), param_type(1)) {
                    (Some(a), Some(b)) if a == b && float_vector(a) => match a {
                        T::Vector { prim, .. } => Ok(T::Primitive(*prim)),
                        _ => unreachable!("float_vector only matches vectors"),
                    },
                    (Some(a), _) if !float_vector(a) => Err(mismatch(0, "vector")),
                    _ => Err(mismatch(1, "matching vector")),
                }
            }
            IntrinsicType::Exp => {
                expect_count(1)?;
                match param_type(0) {
                    Some(ty) if float_like(ty) => Ok(ty.clone()),
                    Some(_) => Err(mismatch(0, "f32 or float vector")),
                    None => Ok(T::NoType),
                }
            }
            IntrinsicType::Length => {
                expect_count(1)?;
                match param_type(0) {
                    Some(ty) if float_vector(ty) => Ok(T::Primitive(PrimitiveType::Float32)),
                    Some(_) => Err(mismatch(0, "float vector")),
                    None => Ok(T::Primitive(PrimitiveType::Float32)),
                }
            }
            IntrinsicType::Max | IntrinsicType::Min => {
                expect_count(2)?;
                match (param_type(0), param_type(1)) {
                    (Some(a), Some(b)) if a == b && numeric(a) => Ok(a.clone()),
                    (Some(a), _) if !numeric(a) => Err(mismatch(0, "numeric value")),
                    _ => Err(mismatch(1, "matching numeric value")),
                }
            }
            IntrinsicType::Normalize => {
                expect_count(1)?;
                match param_type(0) {
                    Some(ty) if float_vector(ty) => Ok(ty.clone()),
                    Some(_) => Err(mismatch(0, "float vector")),
                    None => Ok(T::NoType),
                }
            }
            IntrinsicType::Pow => {
                expect_count(2)?;
                match (param_type(0), param_type(1)) {
                    (Some(a), Some(b)) if a == b && float_like(a) => Ok(a.clone()),
                    (Some(a), _) if !float_like(a) => Err(mismatch(0, "f32 or float vector")),
                    _ => Err(mismatch(1, "matching value")),
                }
            }
            IntrinsicType::Reflect => {
                expect_count(2)?;
                match (param_type(0), param_type(1)) {
                    (Some(a), Some(b)) if a == b && float_vector(a) => Ok(a.clone()),
                    (Some(a), _) if !float_vector(a) => Err(mismatch(0, "float vector")),
                    _ => Err(mismatch(1, "matching vector")),
                }
            }
            IntrinsicType::SampleTexture => {
                expect_count(2)?;
                match param_type(0) {
                    Some(T::Sampler { sampled, .. }) => Ok(T::Vector {
                        prim: *sampled,
                        components: 4,
                    }),
                    Some(_) => Err(mismatch(0, "sampler")),
                    None => Ok(T::NoType),
                }
            }
        }
    }
}
