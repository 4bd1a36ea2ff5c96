//! Read-only recursive traversal over the AST.
//!
//! [`AstVisitor`] provides default traversal for every variant; implementors
//! override only the hooks they care about and call [`walk_expression`] /
//! [`walk_statement`] to recurse into children.

use crate::expr::{ExprValue, Expression, ExpressionKind};
use crate::stmt::{Statement, StatementKind};

/// A visitor with default full traversal.
pub trait AstVisitor {
    fn visit_expression(&mut self, expr: &Expression) {
        walk_expression(self, expr);
    }

    fn visit_statement(&mut self, stmt: &Statement) {
        walk_statement(self, stmt);
    }
}

fn visit_expr_value<V: AstVisitor + ?Sized, T>(visitor: &mut V, value: &ExprValue<T>) {
    if let ExprValue::Expr(expr) = value {
        visitor.visit_expression(expr);
    }
}

fn visit_opt_expr_value<V: AstVisitor + ?Sized, T>(visitor: &mut V, value: &Option<ExprValue<T>>) {
    if let Some(value) = value {
        visit_expr_value(visitor, value);
    }
}

/// Visits every child expression of `expr`.
pub fn walk_expression<V: AstVisitor + ?Sized>(visitor: &mut V, expr: &Expression) {
    match &expr.kind {
        ExpressionKind::AccessIdentifier { expr, .. } => visitor.visit_expression(expr),
        ExpressionKind::AccessIndex { expr, indices } => {
            visitor.visit_expression(expr);
            for index in indices {
                visitor.visit_expression(index);
            }
        }
        ExpressionKind::Assign { left, right, .. } | ExpressionKind::Binary { left, right, .. } => {
            visitor.visit_expression(left);
            visitor.visit_expression(right);
        }
        ExpressionKind::CallFunction { target, parameters } => {
            visitor.visit_expression(target);
            for param in parameters {
                visitor.visit_expression(param);
            }
        }
        ExpressionKind::CallMethod {
            object, parameters, ..
        } => {
            visitor.visit_expression(object);
            for param in parameters {
                visitor.visit_expression(param);
            }
        }
        ExpressionKind::Cast {
            target,
            expressions,
        } => {
            visit_expr_value(visitor, target);
            for expr in expressions {
                visitor.visit_expression(expr);
            }
        }
        ExpressionKind::Conditional {
            condition,
            true_path,
            false_path,
        } => {
            visitor.visit_expression(condition);
            visitor.visit_expression(true_path);
            visitor.visit_expression(false_path);
        }
        ExpressionKind::Intrinsic { parameters, .. } => {
            for param in parameters {
                visitor.visit_expression(param);
            }
        }
        ExpressionKind::Swizzle { expr, .. } | ExpressionKind::Unary { expr, .. } => {
            visitor.visit_expression(expr);
        }
        ExpressionKind::AliasValue { .. }
        | ExpressionKind::Constant { .. }
        | ExpressionKind::ConstantValue { .. }
        | ExpressionKind::Function { .. }
        | ExpressionKind::Identifier { .. }
        | ExpressionKind::IntrinsicFunction { .. }
        | ExpressionKind::StructType { .. }
        | ExpressionKind::Type { .. }
        | ExpressionKind::VariableValue { .. } => {}
    }
}

/// Visits every child statement and expression of `stmt`.
pub fn walk_statement<V: AstVisitor + ?Sized>(visitor: &mut V, stmt: &Statement) {
    match &stmt.kind {
        StatementKind::Branch {
            branches,
            else_statement,
            ..
        } => {
            for branch in branches {
                visitor.visit_expression(&branch.condition);
                visitor.visit_statement(&branch.statement);
            }
            if let Some(else_statement) = else_statement {
                visitor.visit_statement(else_statement);
            }
        }
        StatementKind::Conditional {
            condition,
            statement,
        } => {
            visitor.visit_expression(condition);
            visitor.visit_statement(statement);
        }
        StatementKind::DeclareAlias { expression, .. } => visitor.visit_expression(expression),
        StatementKind::DeclareConst { ty, expression, .. } => {
            visit_opt_expr_value(visitor, ty);
            visitor.visit_expression(expression);
        }
        StatementKind::DeclareExternal {
            binding_set,
            variables,
        } => {
            visit_opt_expr_value(visitor, binding_set);
            for var in variables {
                visit_expr_value(visitor, &var.ty);
                visit_opt_expr_value(visitor, &var.binding_index);
                visit_opt_expr_value(visitor, &var.binding_set);
            }
        }
        StatementKind::DeclareFunction(func) => {
            for param in &func.parameters {
                visit_expr_value(visitor, &param.ty);
            }
            visit_opt_expr_value(visitor, &func.return_type);
            for statement in &func.statements {
                visitor.visit_statement(statement);
            }
        }
        StatementKind::DeclareOption {
            ty, default_value, ..
        } => {
            visit_expr_value(visitor, ty);
            if let Some(default_value) = default_value {
                visitor.visit_expression(default_value);
            }
        }
        StatementKind::DeclareStruct { description, .. } => {
            for member in &description.members {
                visit_expr_value(visitor, &member.ty);
                if let Some(cond) = &member.cond {
                    visitor.visit_expression(cond);
                }
            }
        }
        StatementKind::DeclareVariable { ty, initial, .. } => {
            visit_opt_expr_value(visitor, ty);
            if let Some(initial) = initial {
                visitor.visit_expression(initial);
            }
        }
        StatementKind::Expression { expression } => visitor.visit_expression(expression),
        StatementKind::For {
            from,
            to,
            step,
            body,
            ..
        } => {
            visitor.visit_expression(from);
            visitor.visit_expression(to);
            if let Some(step) = step {
                visitor.visit_expression(step);
            }
            visitor.visit_statement(body);
        }
        StatementKind::ForEach {
            expression, body, ..
        } => {
            visitor.visit_expression(expression);
            visitor.visit_statement(body);
        }
        StatementKind::Multi { statements } => {
            for statement in statements {
                visitor.visit_statement(statement);
            }
        }
        StatementKind::Return { expression } => {
            if let Some(expression) = expression {
                visitor.visit_expression(expression);
            }
        }
        StatementKind::Scoped { statement } => visitor.visit_statement(statement),
        StatementKind::While {
            condition, body, ..
        } => {
            visitor.visit_expression(condition);
            visitor.visit_statement(body);
        }
        StatementKind::Break
        | StatementKind::Continue
        | StatementKind::Discard
        | StatementKind::Import { .. }
        | StatementKind::NoOp => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::ConstantValue;
    use crate::expr::BinaryOp;
    use crate::location::SourceLocation;

    struct LiteralCounter(usize);

    impl AstVisitor for LiteralCounter {
        fn visit_expression(&mut self, expr: &Expression) {
            if matches!(expr.kind, ExpressionKind::ConstantValue { .. }) {
                self.0 += 1;
            }
            walk_expression(self, expr);
        }
    }

    fn literal(value: f32) -> Expression {
        Expression::constant(ConstantValue::Float32(value), SourceLocation::default())
    }

    #[test]
    fn traversal_reaches_nested_expressions() {
        let expr = Expression::new(
            ExpressionKind::Binary {
                op: BinaryOp::Add,
                left: Box::new(literal(1.0)),
                right: Box::new(Expression::new(
                    ExpressionKind::Binary {
                        op: BinaryOp::Multiply,
                        left: Box::new(literal(2.0)),
                        right: Box::new(literal(3.0)),
                    },
                    SourceLocation::default(),
                )),
            },
            SourceLocation::default(),
        );

        let mut counter = LiteralCounter(0);
        counter.visit_expression(&expr);
        assert_eq!(counter.0, 3);
    }

    #[test]
    fn traversal_reaches_statement_children() {
        let stmt = Statement::new(
            StatementKind::Return {
                expression: Some(Box::new(literal(4.0))),
            },
            SourceLocation::default(),
        );
        let block = Statement::new(
            StatementKind::Multi {
                statements: vec![Statement::no_op(), stmt],
            },
            SourceLocation::default(),
        );

        let mut counter = LiteralCounter(0);
        counter.visit_statement(&block);
        assert_eq!(counter.0, 1);
    }
}
