//! Constant propagation.
//!
//! Bottom-up rewrite over expressions: operators on literal operands fold to
//! literals with the exact semantics of the declared numeric types, constant
//! swizzles collapse, swizzle chains over unknown bases compose into a single
//! pattern, and branches with constant conditions reduce to the selected arm.
//! Integral division or modulo by a literal zero is a compile-time error.

use std::collections::HashMap;

use nzsl_ast::{
    BinaryOp, CompilerError, ConstantIndex, ConstantValue, Error, Expression, ExpressionKind,
    ImportedModule, Module, PrimitiveType, SourceLocation, Statement, StatementKind,
    SwizzlePattern, UnaryOp, Vector2, Vector3, Vector4,
};

use crate::Pass;

/// Lookup for referenced `const` declarations.
pub type ConstantQuery<'a> = dyn Fn(ConstantIndex) -> Option<ConstantValue> + 'a;

/// Propagates constants through a whole module, resolving constant references
/// against the module's own `const` declarations.
pub fn propagate_constants(module: &Module) -> Result<Module, Error> {
    let mut constants = HashMap::new();
    collect_constants(&module.root, &mut constants);
    for imported in &module.imported_modules {
        collect_constants(&imported.module.root, &mut constants);
    }
    let query = move |index: ConstantIndex| constants.get(&index).cloned();

    let mut result = module.clone();
    result.root = propagate_statement(result.root, Some(&query))?;
    let mut imported_modules = Vec::with_capacity(result.imported_modules.len());
    for imported in result.imported_modules {
        let mut module = imported.module;
        module.root = propagate_statement(module.root, Some(&query))?;
        imported_modules.push(ImportedModule {
            identifier: imported.identifier,
            module,
        });
    }
    result.imported_modules = imported_modules;
    Ok(result)
}

fn collect_constants(root: &Statement, constants: &mut HashMap<ConstantIndex, ConstantValue>) {
    let statements = match &root.kind {
        StatementKind::Multi { statements } => statements.as_slice(),
        _ => std::slice::from_ref(root),
    };
    for statement in statements {
        if let StatementKind::DeclareConst {
            const_index: Some(index),
            expression,
            ..
        } = &statement.kind
        {
            if let ExpressionKind::ConstantValue { value } = &expression.kind {
                constants.insert(*index, value.clone());
            }
        }
    }
}

/// The [`Pass`] wrapper around [`propagate_constants`].
pub struct ConstantPropagation;

impl Pass for ConstantPropagation {
    fn name(&self) -> &str {
        "constant-propagation"
    }

    fn run(&self, module: &mut Module) -> Result<bool, Error> {
        let propagated = propagate_constants(module)?;
        let changed = propagated != *module;
        *module = propagated;
        Ok(changed)
    }
}

/// Propagates constants through one expression tree.
pub fn propagate_expression(
    expr: Expression,
    query: Option<&ConstantQuery>,
) -> Result<Expression, Error> {
    let Expression {
        location,
        cached_type,
        kind,
    } = expr;

    let kind = match kind {
        ExpressionKind::Binary { op, left, right } => {
            let left = propagate_expression(*left, query)?;
            let right = propagate_expression(*right, query)?;
            if let (
                ExpressionKind::ConstantValue { value: lhs },
                ExpressionKind::ConstantValue { value: rhs },
            ) = (&left.kind, &right.kind)
            {
                if let Some(value) = fold_binary(op, lhs, rhs, &location)? {
                    return Ok(Expression::constant(value, location));
                }
            }
            ExpressionKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            }
        }
        ExpressionKind::Unary { op, expr } => {
            let expr = propagate_expression(*expr, query)?;
            if let ExpressionKind::ConstantValue { value } = &expr.kind {
                if let Some(value) = fold_unary(op, value) {
                    return Ok(Expression::constant(value, location));
                }
            }
            ExpressionKind::Unary {
                op,
                expr: Box::new(expr),
            }
        }
        ExpressionKind::Cast {
            target,
            expressions,
        } => {
            let expressions = expressions
                .into_iter()
                .map(|e| propagate_expression(e, query))
                .collect::<Result<Vec<_>, _>>()?;
            if let nzsl_ast::ExprValue::Resolved(ty) = &target {
                let values: Option<Vec<&ConstantValue>> = expressions
                    .iter()
                    .map(|e| match &e.kind {
                        ExpressionKind::ConstantValue { value } => Some(value),
                        _ => None,
                    })
                    .collect();
                if let Some(values) = values {
                    if let Some(folded) = fold_cast(ty, &values) {
                        return Ok(Expression::constant(folded, location));
                    }
                }
            }
            ExpressionKind::Cast {
                target,
                expressions,
            }
        }
        ExpressionKind::Swizzle { expr, pattern } => {
            let expr = propagate_expression(*expr, query)?;
            match expr.kind {
                // swizzle of a literal extracts components
                ExpressionKind::ConstantValue { value } => {
                    if let Some(folded) = fold_swizzle(&pattern, &value) {
                        return Ok(Expression::constant(folded, location));
                    }
                    ExpressionKind::Swizzle {
                        expr: Box::new(Expression::constant(value, location.clone())),
                        pattern,
                    }
                }
                // swizzle of a swizzle composes into a single pattern
                ExpressionKind::Swizzle {
                    expr: inner,
                    pattern: inner_pattern,
                } => {
                    let mut components = [0u8; 4];
                    for (i, &selector) in pattern.components().iter().enumerate() {
                        components[i] = inner_pattern.components[selector as usize];
                    }
                    ExpressionKind::Swizzle {
                        expr: inner,
                        pattern: SwizzlePattern {
                            components,
                            count: pattern.count,
                        },
                    }
                }
                other => ExpressionKind::Swizzle {
                    expr: Box::new(Expression {
                        location: expr.location,
                        cached_type: expr.cached_type,
                        kind: other,
                    }),
                    pattern,
                },
            }
        }
        ExpressionKind::Conditional {
            condition,
            true_path,
            false_path,
        } => {
            let condition = propagate_expression(*condition, query)?;
            if let ExpressionKind::ConstantValue {
                value: ConstantValue::Bool(selected),
            } = &condition.kind
            {
                let chosen = if *selected { *true_path } else { *false_path };
                return propagate_expression(chosen, query);
            }
            ExpressionKind::Conditional {
                condition: Box::new(condition),
                true_path: Box::new(propagate_expression(*true_path, query)?),
                false_path: Box::new(propagate_expression(*false_path, query)?),
            }
        }
        ExpressionKind::Constant { constant } => {
            if let Some(value) = query.and_then(|q| q(constant)) {
                return Ok(Expression::constant(value, location));
            }
            ExpressionKind::Constant { constant }
        }
        ExpressionKind::AccessIndex { expr, indices } => ExpressionKind::AccessIndex {
            expr: Box::new(propagate_expression(*expr, query)?),
            indices: indices
                .into_iter()
                .map(|e| propagate_expression(e, query))
                .collect::<Result<Vec<_>, _>>()?,
        },
        ExpressionKind::AccessIdentifier { expr, identifiers } => {
            ExpressionKind::AccessIdentifier {
                expr: Box::new(propagate_expression(*expr, query)?),
                identifiers,
            }
        }
        ExpressionKind::Assign { op, left, right } => ExpressionKind::Assign {
            op,
            left: Box::new(propagate_expression(*left, query)?),
            right: Box::new(propagate_expression(*right, query)?),
        },
        ExpressionKind::CallFunction { target, parameters } => ExpressionKind::CallFunction {
            target: Box::new(propagate_expression(*target, query)?),
            parameters: parameters
                .into_iter()
                .map(|e| propagate_expression(e, query))
                .collect::<Result<Vec<_>, _>>()?,
        },
        ExpressionKind::CallMethod {
            object,
            method,
            parameters,
        } => ExpressionKind::CallMethod {
            object: Box::new(propagate_expression(*object, query)?),
            method,
            parameters: parameters
                .into_iter()
                .map(|e| propagate_expression(e, query))
                .collect::<Result<Vec<_>, _>>()?,
        },
        ExpressionKind::Intrinsic {
            intrinsic,
            parameters,
        } => ExpressionKind::Intrinsic {
            intrinsic,
            parameters: parameters
                .into_iter()
                .map(|e| propagate_expression(e, query))
                .collect::<Result<Vec<_>, _>>()?,
        },
        other @ (ExpressionKind::AliasValue { .. }
        | ExpressionKind::ConstantValue { .. }
        | ExpressionKind::Function { .. }
        | ExpressionKind::Identifier { .. }
        | ExpressionKind::IntrinsicFunction { .. }
        | ExpressionKind::StructType { .. }
        | ExpressionKind::Type { .. }
        | ExpressionKind::VariableValue { .. }) => other,
    };

    Ok(Expression {
        location,
        cached_type,
        kind,
    })
}

/// Propagates constants through one statement tree.
pub fn propagate_statement(
    stmt: Statement,
    query: Option<&ConstantQuery>,
) -> Result<Statement, Error> {
    let Statement { location, kind } = stmt;

    let kind = match kind {
        StatementKind::Branch {
            branches,
            else_statement,
            is_const,
        } => {
            let mut kept = Vec::with_capacity(branches.len());
            for branch in branches {
                let condition = propagate_expression(*branch.condition, query)?;
                match &condition.kind {
                    ExpressionKind::ConstantValue {
                        value: ConstantValue::Bool(false),
                    } => continue,
                    ExpressionKind::ConstantValue {
                        value: ConstantValue::Bool(true),
                    } => {
                        let statement = propagate_statement(*branch.statement, query)?;
                        if kept.is_empty() {
                            // the branch reduces to this arm alone
                            return Ok(unscope(statement));
                        }
                        // a later arm that is always taken becomes the else
                        return Ok(Statement::new(
                            StatementKind::Branch {
                                branches: kept,
                                else_statement: Some(Box::new(statement)),
                                is_const,
                            },
                            location,
                        ));
                    }
                    _ => kept.push(nzsl_ast::CondStatement {
                        condition: Box::new(condition),
                        statement: Box::new(propagate_statement(*branch.statement, query)?),
                    }),
                }
            }

            let else_statement = match else_statement {
                Some(statement) => Some(propagate_statement(*statement, query)?),
                None => None,
            };
            if kept.is_empty() {
                return Ok(match else_statement {
                    Some(statement) => unscope(statement),
                    None => Statement::new(StatementKind::NoOp, location),
                });
            }
            StatementKind::Branch {
                branches: kept,
                else_statement: else_statement.map(Box::new),
                is_const,
            }
        }
        StatementKind::Conditional {
            condition,
            statement,
        } => {
            let condition = propagate_expression(*condition, query)?;
            match &condition.kind {
                ExpressionKind::ConstantValue {
                    value: ConstantValue::Bool(true),
                } => return propagate_statement(*statement, query),
                ExpressionKind::ConstantValue {
                    value: ConstantValue::Bool(false),
                } => return Ok(Statement::new(StatementKind::NoOp, location)),
                _ => StatementKind::Conditional {
                    condition: Box::new(condition),
                    statement: Box::new(propagate_statement(*statement, query)?),
                },
            }
        }
        StatementKind::DeclareConst {
            const_index,
            name,
            ty,
            expression,
        } => StatementKind::DeclareConst {
            const_index,
            name,
            ty,
            expression: Box::new(propagate_expression(*expression, query)?),
        },
        StatementKind::DeclareVariable {
            variable_index,
            name,
            ty,
            initial,
        } => StatementKind::DeclareVariable {
            variable_index,
            name,
            ty,
            initial: match initial {
                Some(expr) => Some(Box::new(propagate_expression(*expr, query)?)),
                None => None,
            },
        },
        StatementKind::DeclareOption {
            option_index,
            name,
            ty,
            default_value,
        } => StatementKind::DeclareOption {
            option_index,
            name,
            ty,
            default_value: match default_value {
                Some(expr) => Some(Box::new(propagate_expression(*expr, query)?)),
                None => None,
            },
        },
        StatementKind::DeclareFunction(mut func) => {
            func.statements = func
                .statements
                .into_iter()
                .map(|s| propagate_statement(s, query))
                .collect::<Result<Vec<_>, _>>()?;
            StatementKind::DeclareFunction(func)
        }
        StatementKind::Expression { expression } => StatementKind::Expression {
            expression: Box::new(propagate_expression(*expression, query)?),
        },
        StatementKind::For {
            variable_index,
            name,
            from,
            to,
            step,
            unroll,
            body,
        } => StatementKind::For {
            variable_index,
            name,
            from: Box::new(propagate_expression(*from, query)?),
            to: Box::new(propagate_expression(*to, query)?),
            step: match step {
                Some(expr) => Some(Box::new(propagate_expression(*expr, query)?)),
                None => None,
            },
            unroll,
            body: Box::new(propagate_statement(*body, query)?),
        },
        StatementKind::ForEach {
            variable_index,
            name,
            expression,
            unroll,
            body,
        } => StatementKind::ForEach {
            variable_index,
            name,
            expression: Box::new(propagate_expression(*expression, query)?),
            unroll,
            body: Box::new(propagate_statement(*body, query)?),
        },
        StatementKind::Multi { statements } => StatementKind::Multi {
            statements: statements
                .into_iter()
                .map(|s| propagate_statement(s, query))
                .collect::<Result<Vec<_>, _>>()?,
        },
        StatementKind::Return { expression } => StatementKind::Return {
            expression: match expression {
                Some(expr) => Some(Box::new(propagate_expression(*expr, query)?)),
                None => None,
            },
        },
        StatementKind::Scoped { statement } => StatementKind::Scoped {
            statement: Box::new(propagate_statement(*statement, query)?),
        },
        StatementKind::While {
            condition,
            unroll,
            body,
        } => StatementKind::While {
            condition: Box::new(propagate_expression(*condition, query)?),
            unroll,
            body: Box::new(propagate_statement(*body, query)?),
        },
        other => other,
    };

    Ok(Statement { location, kind })
}

/// Unwraps `{ ... }` so a collapsed branch arm splices into its parent.
fn unscope(statement: Statement) -> Statement {
    match statement.kind {
        StatementKind::Scoped { statement } => *statement,
        _ => statement,
    }
}

fn fold_binary(
    op: BinaryOp,
    lhs: &ConstantValue,
    rhs: &ConstantValue,
    location: &SourceLocation,
) -> Result<Option<ConstantValue>, Error> {
    use ConstantValue as V;

    let zero_division = |is_modulo: bool| -> Error {
        let expr = format!("{lhs} {} {rhs}", op.token());
        let kind = if is_modulo {
            CompilerError::IntegralModuloByZero { expr }
        } else {
            CompilerError::IntegralDivisionByZero { expr }
        };
        kind.at(location.clone())
    };

    let value = match (lhs, rhs) {
        (V::Float32(l), V::Float32(r)) => fold_f32(op, *l, *r),
        (V::Int32(l), V::Int32(r)) => {
            if *r == 0 && matches!(op, BinaryOp::Divide) {
                return Err(zero_division(false));
            }
            if *r == 0 && matches!(op, BinaryOp::Modulo) {
                return Err(zero_division(true));
            }
            fold_i32(op, *l, *r)
        }
        (V::UInt32(l), V::UInt32(r)) => {
            if *r == 0 && matches!(op, BinaryOp::Divide) {
                return Err(zero_division(false));
            }
            if *r == 0 && matches!(op, BinaryOp::Modulo) {
                return Err(zero_division(true));
            }
            fold_u32(op, *l, *r)
        }
        (V::Bool(l), V::Bool(r)) => fold_bool(op, *l, *r),

        // component-wise vector arithmetic
        (V::Vec2F32(l), V::Vec2F32(r)) => fold_vec_f32(op, l.zip_with(*r, pair)).map(V::Vec2F32),
        (V::Vec3F32(l), V::Vec3F32(r)) => fold_vec_f32(op, l.zip_with(*r, pair)).map(V::Vec3F32),
        (V::Vec4F32(l), V::Vec4F32(r)) => fold_vec_f32(op, l.zip_with(*r, pair)).map(V::Vec4F32),
        (V::Vec2I32(l), V::Vec2I32(r)) => {
            check_vec_zero(op, &[r.x, r.y], lhs, rhs, location)?;
            fold_vec_i32(op, l.zip_with(*r, pair)).map(V::Vec2I32)
        }
        (V::Vec3I32(l), V::Vec3I32(r)) => {
            check_vec_zero(op, &[r.x, r.y, r.z], lhs, rhs, location)?;
            fold_vec_i32(op, l.zip_with(*r, pair)).map(V::Vec3I32)
        }
        (V::Vec4I32(l), V::Vec4I32(r)) => {
            check_vec_zero(op, &[r.x, r.y, r.z, r.w], lhs, rhs, location)?;
            fold_vec_i32(op, l.zip_with(*r, pair)).map(V::Vec4I32)
        }

        // vector/scalar broadcasts
        (V::Vec2F32(l), V::Float32(r)) => {
            fold_vec_f32(op, l.zip_with(Vector2::splat(*r), pair)).map(V::Vec2F32)
        }
        (V::Vec3F32(l), V::Float32(r)) => {
            fold_vec_f32(op, l.zip_with(Vector3::splat(*r), pair)).map(V::Vec3F32)
        }
        (V::Vec4F32(l), V::Float32(r)) => {
            fold_vec_f32(op, l.zip_with(Vector4::splat(*r), pair)).map(V::Vec4F32)
        }
        (V::Float32(l), V::Vec2F32(r)) => {
            fold_vec_f32(op, Vector2::splat(*l).zip_with(*r, pair)).map(V::Vec2F32)
        }
        (V::Float32(l), V::Vec3F32(r)) => {
            fold_vec_f32(op, Vector3::splat(*l).zip_with(*r, pair)).map(V::Vec3F32)
        }
        (V::Float32(l), V::Vec4F32(r)) => {
            fold_vec_f32(op, Vector4::splat(*l).zip_with(*r, pair)).map(V::Vec4F32)
        }
        (V::Vec2I32(l), V::Int32(r)) => {
            if *r == 0 {
                check_vec_zero(op, &[*r], lhs, rhs, location)?;
            }
            fold_vec_i32(op, l.zip_with(Vector2::splat(*r), pair)).map(V::Vec2I32)
        }
        (V::Vec3I32(l), V::Int32(r)) => {
            if *r == 0 {
                check_vec_zero(op, &[*r], lhs, rhs, location)?;
            }
            fold_vec_i32(op, l.zip_with(Vector3::splat(*r), pair)).map(V::Vec3I32)
        }
        (V::Vec4I32(l), V::Int32(r)) => {
            if *r == 0 {
                check_vec_zero(op, &[*r], lhs, rhs, location)?;
            }
            fold_vec_i32(op, l.zip_with(Vector4::splat(*r), pair)).map(V::Vec4I32)
        }
        _ => None,
    };
    Ok(value)
}

fn pair<T>(a: T, b: T) -> (T, T) {
    (a, b)
}

fn check_vec_zero(
    op: BinaryOp,
    components: &[i32],
    lhs: &ConstantValue,
    rhs: &ConstantValue,
    location: &SourceLocation,
) -> Result<(), Error> {
    if !components.contains(&0) {
        return Ok(());
    }
    let expr = format!("{lhs} {} {rhs}", op.token());
    let kind = match op {
        BinaryOp::Divide => CompilerError::IntegralDivisionByZero { expr },
        BinaryOp::Modulo => CompilerError::IntegralModuloByZero { expr },
        _ => return Ok(()),
    };
    Err(kind.at(location.clone()))
}

fn fold_f32(op: BinaryOp, l: f32, r: f32) -> Option<ConstantValue> {
    Some(match op {
        BinaryOp::Add => ConstantValue::Float32(l + r),
        BinaryOp::Subtract => ConstantValue::Float32(l - r),
        BinaryOp::Multiply => ConstantValue::Float32(l * r),
        BinaryOp::Divide => ConstantValue::Float32(l / r),
        BinaryOp::Modulo => ConstantValue::Float32(l % r),
        BinaryOp::CompEq => ConstantValue::Bool(l == r),
        BinaryOp::CompNe => ConstantValue::Bool(l != r),
        BinaryOp::CompLt => ConstantValue::Bool(l < r),
        BinaryOp::CompLe => ConstantValue::Bool(l <= r),
        BinaryOp::CompGt => ConstantValue::Bool(l > r),
        BinaryOp::CompGe => ConstantValue::Bool(l >= r),
        _ => return None,
    })
}

fn fold_i32(op: BinaryOp, l: i32, r: i32) -> Option<ConstantValue> {
    Some(match op {
        BinaryOp::Add => ConstantValue::Int32(l.wrapping_add(r)),
        BinaryOp::Subtract => ConstantValue::Int32(l.wrapping_sub(r)),
        BinaryOp::Multiply => ConstantValue::Int32(l.wrapping_mul(r)),
        BinaryOp::Divide => ConstantValue::Int32(l.wrapping_div(r)),
        BinaryOp::Modulo => ConstantValue::Int32(l.wrapping_rem(r)),
        BinaryOp::CompEq => ConstantValue::Bool(l == r),
        BinaryOp::CompNe => ConstantValue::Bool(l != r),
        BinaryOp::CompLt => ConstantValue::Bool(l < r),
        BinaryOp::CompLe => ConstantValue::Bool(l <= r),
        BinaryOp::CompGt => ConstantValue::Bool(l > r),
        BinaryOp::CompGe => ConstantValue::Bool(l >= r),
        _ => return None,
    })
}

fn fold_u32(op: BinaryOp, l: u32, r: u32) -> Option<ConstantValue> {
    Some(match op {
        BinaryOp::Add => ConstantValue::UInt32(l.wrapping_add(r)),
        BinaryOp::Subtract => ConstantValue::UInt32(l.wrapping_sub(r)),
        BinaryOp::Multiply => ConstantValue::UInt32(l.wrapping_mul(r)),
        BinaryOp::Divide => ConstantValue::UInt32(l / r),
        BinaryOp::Modulo => ConstantValue::UInt32(l % r),
        BinaryOp::CompEq => ConstantValue::Bool(l == r),
        BinaryOp::CompNe => ConstantValue::Bool(l != r),
        BinaryOp::CompLt => ConstantValue::Bool(l < r),
        BinaryOp::CompLe => ConstantValue::Bool(l <= r),
        BinaryOp::CompGt => ConstantValue::Bool(l > r),
        BinaryOp::CompGe => ConstantValue::Bool(l >= r),
        _ => return None,
    })
}

fn fold_bool(op: BinaryOp, l: bool, r: bool) -> Option<ConstantValue> {
    Some(match op {
        BinaryOp::CompEq => ConstantValue::Bool(l == r),
        BinaryOp::CompNe => ConstantValue::Bool(l != r),
        BinaryOp::LogicalAnd => ConstantValue::Bool(l && r),
        BinaryOp::LogicalOr => ConstantValue::Bool(l || r),
        _ => return None,
    })
}

fn fold_component_f32(op: BinaryOp, (l, r): (f32, f32)) -> Option<f32> {
    Some(match op {
        BinaryOp::Add => l + r,
        BinaryOp::Subtract => l - r,
        BinaryOp::Multiply => l * r,
        BinaryOp::Divide => l / r,
        BinaryOp::Modulo => l % r,
        _ => return None,
    })
}

fn fold_component_i32(op: BinaryOp, (l, r): (i32, i32)) -> Option<i32> {
    Some(match op {
        BinaryOp::Add => l.wrapping_add(r),
        BinaryOp::Subtract => l.wrapping_sub(r),
        BinaryOp::Multiply => l.wrapping_mul(r),
        BinaryOp::Divide => l.wrapping_div(r),
        BinaryOp::Modulo => l.wrapping_rem(r),
        _ => return None,
    })
}

macro_rules! fold_vector {
    ($name:ident, $component:ident, $elem:ty) => {
        fn $name<V: VectorFold<$elem>>(op: BinaryOp, pairs: V) -> Option<V::Output> {
            pairs.try_fold(|p| $component(op, p))
        }
    };
}

/// Component-wise folding over one of the vector shapes.
trait VectorFold<T> {
    type Output;
    fn try_fold(self, f: impl Fn((T, T)) -> Option<T>) -> Option<Self::Output>;
}

macro_rules! impl_vector_fold {
    ($vector:ident, $($field:ident),+) => {
        impl<T> VectorFold<T> for $vector<(T, T)> {
            type Output = $vector<T>;
            fn try_fold(self, f: impl Fn((T, T)) -> Option<T>) -> Option<Self::Output> {
                Some($vector { $($field: f(self.$field)?,)+ })
            }
        }
    };
}

impl_vector_fold!(Vector2, x, y);
impl_vector_fold!(Vector3, x, y, z);
impl_vector_fold!(Vector4, x, y, z, w);

fold_vector!(fold_vec_f32, fold_component_f32, f32);
fold_vector!(fold_vec_i32, fold_component_i32, i32);

fn fold_unary(op: UnaryOp, value: &ConstantValue) -> Option<ConstantValue> {
    use ConstantValue as V;
    Some(match (op, value) {
        (UnaryOp::Minus, V::Float32(v)) => V::Float32(-v),
        (UnaryOp::Minus, V::Int32(v)) => V::Int32(v.wrapping_neg()),
        (UnaryOp::Minus, V::Vec2F32(v)) => V::Vec2F32(v.map(|c| -c)),
        (UnaryOp::Minus, V::Vec3F32(v)) => V::Vec3F32(v.map(|c| -c)),
        (UnaryOp::Minus, V::Vec4F32(v)) => V::Vec4F32(v.map(|c| -c)),
        (UnaryOp::Minus, V::Vec2I32(v)) => V::Vec2I32(v.map(|c| c.wrapping_neg())),
        (UnaryOp::Minus, V::Vec3I32(v)) => V::Vec3I32(v.map(|c| c.wrapping_neg())),
        (UnaryOp::Minus, V::Vec4I32(v)) => V::Vec4I32(v.map(|c| c.wrapping_neg())),
        (UnaryOp::Plus, v) => v.clone(),
        (UnaryOp::LogicalNot, V::Bool(v)) => V::Bool(!v),
        _ => return None,
    })
}

fn fold_swizzle(pattern: &SwizzlePattern, value: &ConstantValue) -> Option<ConstantValue> {
    use ConstantValue as V;

    fn components_f32(value: &ConstantValue) -> Option<Vec<f32>> {
        Some(match value {
            V::Float32(v) => vec![*v],
            V::Vec2F32(v) => vec![v.x, v.y],
            V::Vec3F32(v) => vec![v.x, v.y, v.z],
            V::Vec4F32(v) => vec![v.x, v.y, v.z, v.w],
            _ => return None,
        })
    }

    fn components_i32(value: &ConstantValue) -> Option<Vec<i32>> {
        Some(match value {
            V::Int32(v) => vec![*v],
            V::Vec2I32(v) => vec![v.x, v.y],
            V::Vec3I32(v) => vec![v.x, v.y, v.z],
            V::Vec4I32(v) => vec![v.x, v.y, v.z, v.w],
            _ => return None,
        })
    }

    if let Some(components) = components_f32(value) {
        let selected: Vec<f32> = pattern
            .components()
            .iter()
            .map(|&c| components.get(c as usize).copied())
            .collect::<Option<_>>()?;
        return Some(match selected.as_slice() {
            [x] => V::Float32(*x),
            [x, y] => V::Vec2F32(Vector2::new(*x, *y)),
            [x, y, z] => V::Vec3F32(Vector3::new(*x, *y, *z)),
            [x, y, z, w] => V::Vec4F32(Vector4::new(*x, *y, *z, *w)),
            _ => return None,
        });
    }

    if let Some(components) = components_i32(value) {
        let selected: Vec<i32> = pattern
            .components()
            .iter()
            .map(|&c| components.get(c as usize).copied())
            .collect::<Option<_>>()?;
        return Some(match selected.as_slice() {
            [x] => V::Int32(*x),
            [x, y] => V::Vec2I32(Vector2::new(*x, *y)),
            [x, y, z] => V::Vec3I32(Vector3::new(*x, *y, *z)),
            [x, y, z, w] => V::Vec4I32(Vector4::new(*x, *y, *z, *w)),
            _ => return None,
        });
    }

    None
}

fn fold_cast(ty: &nzsl_ast::ExpressionType, values: &[&ConstantValue]) -> Option<ConstantValue> {
    use nzsl_ast::ExpressionType as T;
    use ConstantValue as V;

    match ty {
        T::Primitive(prim) => {
            let [value] = values else { return None };
            match (prim, value) {
                (PrimitiveType::Float32, V::Float32(v)) => Some(V::Float32(*v)),
                (PrimitiveType::Float32, V::Int32(v)) => Some(V::Float32(*v as f32)),
                (PrimitiveType::Float32, V::UInt32(v)) => Some(V::Float32(*v as f32)),
                (PrimitiveType::Int32, V::Int32(v)) => Some(V::Int32(*v)),
                (PrimitiveType::Int32, V::Float32(v)) => Some(V::Int32(*v as i32)),
                (PrimitiveType::Int32, V::UInt32(v)) => Some(V::Int32(*v as i32)),
                (PrimitiveType::UInt32, V::UInt32(v)) => Some(V::UInt32(*v)),
                (PrimitiveType::UInt32, V::Int32(v)) if *v >= 0 => Some(V::UInt32(*v as u32)),
                (PrimitiveType::UInt32, V::Float32(v)) if *v >= 0.0 => Some(V::UInt32(*v as u32)),
                (PrimitiveType::Boolean, V::Bool(v)) => Some(V::Bool(*v)),
                _ => None,
            }
        }
        T::Vector { prim, components } => match prim {
            PrimitiveType::Float32 => {
                let mut flat = Vec::new();
                for value in values {
                    match value {
                        V::Float32(v) => flat.push(*v),
                        V::Vec2F32(v) => flat.extend([v.x, v.y]),
                        V::Vec3F32(v) => flat.extend([v.x, v.y, v.z]),
                        V::Vec4F32(v) => flat.extend([v.x, v.y, v.z, v.w]),
                        _ => return None,
                    }
                }
                build_vec_f32(*components, &flat)
            }
            PrimitiveType::Int32 => {
                let mut flat = Vec::new();
                for value in values {
                    match value {
                        V::Int32(v) => flat.push(*v),
                        V::Vec2I32(v) => flat.extend([v.x, v.y]),
                        V::Vec3I32(v) => flat.extend([v.x, v.y, v.z]),
                        V::Vec4I32(v) => flat.extend([v.x, v.y, v.z, v.w]),
                        _ => return None,
                    }
                }
                build_vec_i32(*components, &flat)
            }
            _ => None,
        },
        _ => None,
    }
}

fn build_vec_f32(components: u32, flat: &[f32]) -> Option<ConstantValue> {
    match (components, flat) {
        (2, [x, y]) => Some(ConstantValue::Vec2F32(Vector2::new(*x, *y))),
        (3, [x, y, z]) => Some(ConstantValue::Vec3F32(Vector3::new(*x, *y, *z))),
        (4, [x, y, z, w]) => Some(ConstantValue::Vec4F32(Vector4::new(*x, *y, *z, *w))),
        _ => None,
    }
}

fn build_vec_i32(components: u32, flat: &[i32]) -> Option<ConstantValue> {
    match (components, flat) {
        (2, [x, y]) => Some(ConstantValue::Vec2I32(Vector2::new(*x, *y))),
        (3, [x, y, z]) => Some(ConstantValue::Vec3I32(Vector3::new(*x, *y, *z))),
        (4, [x, y, z, w]) => Some(ConstantValue::Vec4I32(Vector4::new(*x, *y, *z, *w))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nzsl_ast::ExpressionType;

    fn literal(value: ConstantValue) -> Expression {
        Expression::constant(value, SourceLocation::at(1, 1))
    }

    fn binary(op: BinaryOp, left: Expression, right: Expression) -> Expression {
        Expression::new(
            ExpressionKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            SourceLocation::at(1, 1),
        )
    }

    fn expect_value(expr: Expression) -> ConstantValue {
        match propagate_expression(expr, None).unwrap().kind {
            ExpressionKind::ConstantValue { value } => value,
            other => panic!("expected folded constant, got {other:?}"),
        }
    }

    #[test]
    fn folds_float_arithmetic() {
        // 8.0 * (7.0 + 5.0) * 2.0 / 4.0 - 6.0 % 7.0
        let product = binary(
            BinaryOp::Divide,
            binary(
                BinaryOp::Multiply,
                binary(
                    BinaryOp::Multiply,
                    literal(ConstantValue::Float32(8.0)),
                    binary(
                        BinaryOp::Add,
                        literal(ConstantValue::Float32(7.0)),
                        literal(ConstantValue::Float32(5.0)),
                    ),
                ),
                literal(ConstantValue::Float32(2.0)),
            ),
            literal(ConstantValue::Float32(4.0)),
        );
        let expr = binary(
            BinaryOp::Subtract,
            product,
            binary(
                BinaryOp::Modulo,
                literal(ConstantValue::Float32(6.0)),
                literal(ConstantValue::Float32(7.0)),
            ),
        );
        assert_eq!(expect_value(expr), ConstantValue::Float32(42.0));
    }

    #[test]
    fn folds_integer_arithmetic() {
        // 8 * (7 + 5) * 2 / 4 - 6 % 7
        let product = binary(
            BinaryOp::Divide,
            binary(
                BinaryOp::Multiply,
                binary(
                    BinaryOp::Multiply,
                    literal(ConstantValue::Int32(8)),
                    binary(
                        BinaryOp::Add,
                        literal(ConstantValue::Int32(7)),
                        literal(ConstantValue::Int32(5)),
                    ),
                ),
                literal(ConstantValue::Int32(2)),
            ),
            literal(ConstantValue::Int32(4)),
        );
        let expr = binary(
            BinaryOp::Subtract,
            product,
            binary(
                BinaryOp::Modulo,
                literal(ConstantValue::Int32(6)),
                literal(ConstantValue::Int32(7)),
            ),
        );
        assert_eq!(expect_value(expr), ConstantValue::Int32(42));
    }

    #[test]
    fn division_by_zero_is_reported() {
        let expr = binary(
            BinaryOp::Divide,
            literal(ConstantValue::Int32(42)),
            binary(
                BinaryOp::Subtract,
                literal(ConstantValue::Int32(9)),
                literal(ConstantValue::Int32(9)),
            ),
        );
        let err = propagate_expression(expr, None).unwrap_err();
        assert!(err
            .to_string()
            .contains("CIntegralDivisionByZero error: integral division by zero in expression (42 / 0)"));
    }

    #[test]
    fn vector_division_by_zero_is_reported() {
        let expr = binary(
            BinaryOp::Divide,
            literal(ConstantValue::Vec4I32(Vector4::new(7, 6, 5, 4))),
            literal(ConstantValue::Vec4I32(Vector4::new(3, 2, 1, 0))),
        );
        let err = propagate_expression(expr, None).unwrap_err();
        assert!(err.to_string().contains(
            "integral division by zero in expression (vec4[i32](7, 6, 5, 4) / vec4[i32](3, 2, 1, 0))"
        ));
    }

    #[test]
    fn folds_vector_scalar_broadcast() {
        let expr = binary(
            BinaryOp::Multiply,
            literal(ConstantValue::Vec4F32(Vector4::new(8.0, 2.0, -7.0, 0.0))),
            literal(ConstantValue::Float32(12.0)),
        );
        assert_eq!(
            expect_value(expr),
            ConstantValue::Vec4F32(Vector4::new(96.0, 24.0, -84.0, 0.0))
        );
    }

    #[test]
    fn folds_constant_swizzle() {
        let expr = Expression::new(
            ExpressionKind::Swizzle {
                expr: Box::new(literal(ConstantValue::Vec4F32(Vector4::new(
                    3.0, 0.0, 1.0, 2.0,
                )))),
                pattern: SwizzlePattern::parse("yzwx").unwrap(),
            },
            SourceLocation::at(1, 1),
        );
        assert_eq!(
            expect_value(expr),
            ConstantValue::Vec4F32(Vector4::new(0.0, 1.0, 2.0, 3.0))
        );
    }

    #[test]
    fn swizzle_chains_compose_over_unknown_base() {
        // e.xyz.yz.y.x.xxxx over an opaque vec4 base reduces to e.zzzz
        let base = Expression::typed(
            ExpressionKind::VariableValue {
                variable: nzsl_ast::VariableIndex::new(0),
            },
            ExpressionType::Vector {
                prim: PrimitiveType::Float32,
                components: 4,
            },
            SourceLocation::at(1, 1),
        );
        let mut expr = base;
        for pattern in ["xyz", "yz", "y", "x", "xxxx"] {
            expr = Expression::new(
                ExpressionKind::Swizzle {
                    expr: Box::new(expr),
                    pattern: SwizzlePattern::parse(pattern).unwrap(),
                },
                SourceLocation::at(1, 1),
            );
        }
        let folded = propagate_expression(expr, None).unwrap();
        match folded.kind {
            ExpressionKind::Swizzle { expr, pattern } => {
                assert_eq!(pattern.to_string(), "zzzz");
                assert!(matches!(expr.kind, ExpressionKind::VariableValue { .. }));
            }
            other => panic!("expected composed swizzle, got {other:?}"),
        }
    }

    #[test]
    fn scalar_swizzle_to_vector() {
        let expr = Expression::new(
            ExpressionKind::Swizzle {
                expr: Box::new(literal(ConstantValue::Float32(42.0))),
                pattern: SwizzlePattern::parse("xxxx").unwrap(),
            },
            SourceLocation::at(1, 1),
        );
        assert_eq!(
            expect_value(expr),
            ConstantValue::Vec4F32(Vector4::splat(42.0))
        );
    }

    #[test]
    fn collapses_constant_branch() {
        // if (false) discard;  → removed
        let branch = Statement::new(
            StatementKind::Branch {
                branches: vec![nzsl_ast::CondStatement {
                    condition: Box::new(literal(ConstantValue::Bool(false))),
                    statement: Box::new(Statement::new(
                        StatementKind::Discard,
                        SourceLocation::at(1, 1),
                    )),
                }],
                else_statement: None,
                is_const: false,
            },
            SourceLocation::at(1, 1),
        );
        let result = propagate_statement(branch, None).unwrap();
        assert!(matches!(result.kind, StatementKind::NoOp));
    }

    #[test]
    fn selects_true_arm() {
        let branch = Statement::new(
            StatementKind::Branch {
                branches: vec![
                    nzsl_ast::CondStatement {
                        condition: Box::new(literal(ConstantValue::Bool(false))),
                        statement: Box::new(Statement::new(
                            StatementKind::Discard,
                            SourceLocation::at(1, 1),
                        )),
                    },
                    nzsl_ast::CondStatement {
                        condition: Box::new(literal(ConstantValue::Bool(true))),
                        statement: Box::new(Statement::new(
                            StatementKind::Return { expression: None },
                            SourceLocation::at(1, 1),
                        )),
                    },
                ],
                else_statement: None,
                is_const: false,
            },
            SourceLocation::at(1, 1),
        );
        let result = propagate_statement(branch, None).unwrap();
        assert!(matches!(result.kind, StatementKind::Return { .. }));
    }

    #[test]
    fn substitutes_known_constants() {
        let expr = Expression::new(
            ExpressionKind::Constant {
                constant: ConstantIndex::new(0),
            },
            SourceLocation::at(1, 1),
        );
        let query = |index: ConstantIndex| {
            (index == ConstantIndex::new(0)).then(|| ConstantValue::Int32(3))
        };
        let folded = propagate_expression(expr, Some(&query)).unwrap();
        assert!(matches!(
            folded.kind,
            ExpressionKind::ConstantValue {
                value: ConstantValue::Int32(3)
            }
        ));
    }

    #[test]
    fn propagation_is_a_fixpoint() {
        let expr = binary(
            BinaryOp::Add,
            literal(ConstantValue::Int32(1)),
            literal(ConstantValue::Int32(2)),
        );
        let once = propagate_expression(expr, None).unwrap();
        let twice = propagate_expression(once.clone(), None).unwrap();
        assert_eq!(once, twice);
    }
}
