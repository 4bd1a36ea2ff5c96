//! Statement sanitization and the statement-level rewrites.

use nzsl_ast::{
    AssignOp, BinaryOp, BuiltinEntry, CompilerError, CondStatement, ConstantValue, Error,
    ExprValue, Expression, ExpressionKind, ExpressionType, ExternalVar, FunctionDeclaration,
    FunctionParameter, LoopUnroll, PrimitiveType, SourceLocation, Statement, StatementKind,
    StructDescription, StructMember,
};

use crate::scope::IdentifierKind;
use crate::{
    ConstantData, FunctionContext, FunctionData, RestrictionKind, Sanitizer, StageRestriction,
    StructData, VariableData,
};

impl Sanitizer<'_> {
    /// Sanitizes a root multi-statement.
    pub(crate) fn sanitize_root(&mut self, root: &Statement) -> Result<Statement, Error> {
        let statements = match &root.kind {
            StatementKind::Multi { statements } => statements.as_slice(),
            _ => std::slice::from_ref(root),
        };
        let mut out = Vec::with_capacity(statements.len());
        for statement in statements {
            out.extend(self.sanitize_statement(statement)?);
        }
        Ok(Statement::new(
            StatementKind::Multi { statements: out },
            root.location.clone(),
        ))
    }

    /// Sanitizes one statement into the statements that replace it (rewrites
    /// may expand a statement or prune it entirely).
    pub(crate) fn sanitize_statement(&mut self, stmt: &Statement) -> Result<Vec<Statement>, Error> {
        let location = stmt.location.clone();
        match &stmt.kind {
            StatementKind::Multi { statements } => {
                let mut out = Vec::with_capacity(statements.len());
                for statement in statements {
                    out.extend(self.sanitize_statement(statement)?);
                }
                Ok(vec![Statement::new(
                    StatementKind::Multi { statements: out },
                    location,
                )])
            }
            StatementKind::Scoped { statement } => {
                self.scopes.push_scope();
                let inner = self.sanitize_single(statement)?;
                self.scopes.pop_scope();
                Ok(vec![Statement::new(
                    StatementKind::Scoped {
                        statement: Box::new(inner),
                    },
                    location,
                )])
            }
            StatementKind::NoOp => Ok(vec![Statement::new(StatementKind::NoOp, location)]),
            StatementKind::Conditional {
                condition,
                statement,
            } => {
                let (folded, value) = self.eval_constant(condition)?;
                match value {
                    Some(ConstantValue::Bool(true)) => self.sanitize_statement(statement),
                    Some(ConstantValue::Bool(false)) => Ok(vec![]),
                    Some(_) => Err(CompilerError::ConditionExpectedBool {
                        got: self.type_name(
                            folded
                                .cached_type
                                .as_ref()
                                .unwrap_or(&ExpressionType::NoType),
                        ),
                    }
                    .at(folded.location)),
                    None if self.options.allow_partial_sanitization => {
                        let inner = self.sanitize_single(statement)?;
                        Ok(vec![Statement::new(
                            StatementKind::Conditional {
                                condition: Box::new(folded),
                                statement: Box::new(inner),
                            },
                            location,
                        )])
                    }
                    None => Err(CompilerError::ConstantExpressionRequired.at(folded.location)),
                }
            }
            StatementKind::Import {
                module_name,
                imports,
            } => self.sanitize_import(&location, module_name, imports),
            StatementKind::Branch {
                branches,
                else_statement,
                is_const,
            } => {
                if *is_const {
                    self.sanitize_const_branch(branches, else_statement.as_deref())
                } else {
                    self.sanitize_branch(branches, else_statement.as_deref(), location)
                }
            }
            StatementKind::DeclareVariable {
                variable_index,
                name,
                ty,
                initial,
            } => self.sanitize_variable_declaration(
                location,
                *variable_index,
                name,
                ty.as_ref(),
                initial.as_deref(),
            ),
            StatementKind::DeclareConst {
                const_index,
                name,
                ty,
                expression,
            } => self.sanitize_const_declaration(
                location,
                *const_index,
                name,
                ty.as_ref(),
                expression,
            ),
            StatementKind::DeclareOption {
                option_index,
                name,
                ty,
                default_value,
            } => self.sanitize_option_declaration(
                location,
                *option_index,
                name,
                ty,
                default_value.as_deref(),
            ),
            StatementKind::DeclareAlias {
                alias_index,
                name,
                expression,
            } => self.sanitize_alias_declaration(location, *alias_index, name, expression),
            StatementKind::DeclareStruct {
                struct_index,
                exported,
                description,
            } => self.sanitize_struct_declaration(location, *struct_index, *exported, description),
            StatementKind::DeclareExternal {
                binding_set,
                variables,
            } => self.sanitize_external_declaration(location, binding_set.as_ref(), variables),
            StatementKind::DeclareFunction(func) => {
                self.sanitize_function_declaration(location, func)
            }
            StatementKind::Discard => {
                if let Some(ctx) = self.func_stack.last() {
                    let index = ctx.index;
                    if let Some(data) = self.functions.get_mut(&index) {
                        data.restrictions.push(StageRestriction {
                            kind: RestrictionKind::Discard,
                            location: location.clone(),
                        });
                    }
                }
                Ok(vec![Statement::new(StatementKind::Discard, location)])
            }
            StatementKind::Break => {
                if self.func_stack.last().is_none_or(|ctx| ctx.loop_depth == 0) {
                    return Err(CompilerError::LoopControlOutsideOfLoop {
                        control: "break".into(),
                    }
                    .at(location));
                }
                Ok(vec![Statement::new(StatementKind::Break, location)])
            }
            StatementKind::Continue => {
                if self.func_stack.last().is_none_or(|ctx| ctx.loop_depth == 0) {
                    return Err(CompilerError::LoopControlOutsideOfLoop {
                        control: "continue".into(),
                    }
                    .at(location));
                }
                Ok(vec![Statement::new(StatementKind::Continue, location)])
            }
            StatementKind::Return { expression } => {
                let expression = match expression {
                    Some(expr) => Some(Box::new(self.sanitize_expression(expr)?)),
                    None => None,
                };
                let got = expression
                    .as_deref()
                    .and_then(|e| e.cached_type.clone())
                    .unwrap_or(ExpressionType::NoType);
                if let Some(ctx) = self.func_stack.last() {
                    if ctx.return_type != got
                        && !(self.options.allow_partial_sanitization
                            && expression
                                .as_deref()
                                .is_some_and(|e| e.cached_type.is_none()))
                    {
                        return Err(CompilerError::ReturnTypeMismatch {
                            expected: self.type_name(&ctx.return_type),
                            got: self.type_name(&got),
                        }
                        .at(location));
                    }
                }
                let mut out = Vec::new();
                out.append(&mut self.pending);
                out.push(Statement::new(StatementKind::Return { expression }, location));
                Ok(out)
            }
            StatementKind::Expression { expression } => {
                let expression = self.sanitize_expression(expression)?;
                let mut out = Vec::new();
                out.append(&mut self.pending);
                out.push(Statement::new(
                    StatementKind::Expression {
                        expression: Box::new(expression),
                    },
                    location,
                ));
                Ok(out)
            }
            StatementKind::While {
                condition,
                unroll,
                body,
            } => {
                let condition = self.sanitize_expression(condition)?;
                self.expect_boolean(&condition)?;
                let mut out = Vec::new();
                out.append(&mut self.pending);

                self.enter_loop();
                let body = self.sanitize_single(body);
                self.exit_loop();
                out.push(Statement::new(
                    StatementKind::While {
                        condition: Box::new(condition),
                        unroll: unroll.clone(),
                        body: Box::new(body?),
                    },
                    location,
                ));
                Ok(out)
            }
            StatementKind::For {
                variable_index,
                name,
                from,
                to,
                step,
                unroll,
                body,
            } => self.sanitize_for(
                location,
                *variable_index,
                name,
                from,
                to,
                step.as_deref(),
                unroll.as_ref(),
                body,
            ),
            StatementKind::ForEach {
                variable_index,
                name,
                expression,
                unroll,
                body,
            } => self.sanitize_for_each(
                location,
                *variable_index,
                name,
                expression,
                unroll.as_ref(),
                body,
            ),
        }
    }

    /// Sanitizes a statement that must stay a single statement (branch arms,
    /// loop bodies): multiple replacements fold into a multi-statement.
    pub(crate) fn sanitize_single(&mut self, stmt: &Statement) -> Result<Statement, Error> {
        let mut statements = self.sanitize_statement(stmt)?;
        Ok(match statements.len() {
            1 => statements.pop().expect("length checked"),
            _ => Statement::new(StatementKind::Multi { statements }, stmt.location.clone()),
        })
    }

    fn enter_loop(&mut self) {
        if let Some(ctx) = self.func_stack.last_mut() {
            ctx.loop_depth += 1;
        }
    }

    fn exit_loop(&mut self) {
        if let Some(ctx) = self.func_stack.last_mut() {
            ctx.loop_depth -= 1;
        }
    }

    pub(crate) fn expect_boolean(&self, condition: &Expression) -> Result<(), Error> {
        match &condition.cached_type {
            Some(ExpressionType::Primitive(PrimitiveType::Boolean)) => Ok(()),
            None if self.options.allow_partial_sanitization => Ok(()),
            other => Err(CompilerError::ConditionExpectedBool {
                got: other
                    .as_ref()
                    .map(|ty| self.type_name(ty))
                    .unwrap_or_else(|| "<unresolved>".into()),
            }
            .at(condition.location.clone())),
        }
    }

    // ---- branches ----

    /// `const if`: exactly one arm is selected at compile time and inlined.
    fn sanitize_const_branch(
        &mut self,
        branches: &[CondStatement],
        else_statement: Option<&Statement>,
    ) -> Result<Vec<Statement>, Error> {
        for branch in branches {
            let (folded, value) = self.eval_constant(&branch.condition)?;
            match value {
                Some(ConstantValue::Bool(true)) => {
                    let selected = self.sanitize_single(&branch.statement)?;
                    return Ok(vec![unscope(selected)]);
                }
                Some(ConstantValue::Bool(false)) => continue,
                Some(_) => {
                    return Err(CompilerError::ConditionExpectedBool {
                        got: folded
                            .cached_type
                            .as_ref()
                            .map(|ty| self.type_name(ty))
                            .unwrap_or_default(),
                    }
                    .at(folded.location))
                }
                None => {
                    return Err(CompilerError::ConstantExpressionRequired.at(folded.location))
                }
            }
        }
        match else_statement {
            Some(statement) => {
                let selected = self.sanitize_single(statement)?;
                Ok(vec![unscope(selected)])
            }
            None => Ok(vec![]),
        }
    }

    fn sanitize_branch(
        &mut self,
        branches: &[CondStatement],
        else_statement: Option<&Statement>,
        location: SourceLocation,
    ) -> Result<Vec<Statement>, Error> {
        let mut sanitized = Vec::with_capacity(branches.len());
        for branch in branches {
            let condition = self.sanitize_expression(&branch.condition)?;
            self.expect_boolean(&condition)?;
            let statement = self.sanitize_single(&branch.statement)?;
            sanitized.push(CondStatement {
                condition: Box::new(condition),
                statement: Box::new(statement),
            });
        }
        let else_statement = match else_statement {
            Some(statement) => Some(Box::new(self.sanitize_single(statement)?)),
            None => None,
        };

        // if/else-if chains become nested two-way branches
        if self.options.split_multiple_branches && sanitized.len() > 1 {
            let mut rest = sanitized.split_off(1);
            rest.reverse();
            let mut current_else = else_statement;
            for branch in rest {
                let inner = Statement::new(
                    StatementKind::Branch {
                        branches: vec![branch],
                        else_statement: current_else,
                        is_const: false,
                    },
                    location.clone(),
                );
                current_else = Some(Box::new(Statement::new(
                    StatementKind::Scoped {
                        statement: Box::new(Statement::new(
                            StatementKind::Multi {
                                statements: vec![inner],
                            },
                            location.clone(),
                        )),
                    },
                    location.clone(),
                )));
            }
            return Ok(vec![Statement::new(
                StatementKind::Branch {
                    branches: sanitized,
                    else_statement: current_else,
                    is_const: false,
                },
                location,
            )]);
        }

        Ok(vec![Statement::new(
            StatementKind::Branch {
                branches: sanitized,
                else_statement,
                is_const: false,
            },
            location,
        )])
    }

    // ---- declarations ----

    fn sanitize_variable_declaration(
        &mut self,
        location: SourceLocation,
        variable_index: Option<nzsl_ast::VariableIndex>,
        name: &str,
        ty: Option<&ExprValue<ExpressionType>>,
        initial: Option<&Expression>,
    ) -> Result<Vec<Statement>, Error> {
        let initial = match initial {
            Some(expr) => Some(self.sanitize_expression(expr)?),
            None => None,
        };
        let init_type = initial.as_ref().and_then(|e| e.cached_type.clone());

        let declared = match ty {
            Some(tv) => Some(self.resolve_type_value(tv, false, &location)?),
            None => None,
        };

        // an unresolvable initializer leaves the declaration untyped in
        // partial mode
        let partial_untyped = self.options.allow_partial_sanitization
            && declared.is_none()
            && initial.is_some()
            && init_type.is_none();

        let final_type = match (declared, &init_type) {
            (None, None) if partial_untyped => ExpressionType::NoType,
            (Some(ExpressionType::Array { element, length: None }), Some(init)) => {
                // unsized array declarations take their length from the literal
                match init {
                    ExpressionType::Array {
                        element: init_elem,
                        length: Some(len),
                    } if *init_elem == element => ExpressionType::Array {
                        element,
                        length: Some(*len),
                    },
                    other => {
                        return Err(CompilerError::VarDeclarationTypeUnmatching {
                            got: self.type_name(other),
                            expected: self.type_name(&ExpressionType::Array {
                                element,
                                length: None,
                            }),
                        }
                        .at(location))
                    }
                }
            }
            (Some(ExpressionType::Array { length: None, .. }), None) => {
                return Err(CompilerError::ArrayLengthRequired.at(location))
            }
            (Some(declared), Some(init)) => {
                if declared != *init && !self.options.allow_partial_sanitization {
                    return Err(CompilerError::VarDeclarationTypeUnmatching {
                        got: self.type_name(init),
                        expected: self.type_name(&declared),
                    }
                    .at(location));
                }
                declared
            }
            (Some(declared), None) => declared,
            (None, Some(init)) => init.clone(),
            (None, None) => {
                return Err(CompilerError::TypeExpected {
                    got: name.to_owned(),
                }
                .at(location))
            }
        };

        let index = self.alloc_variable(variable_index);
        let out_name = self.output_name(name);
        self.variables.insert(
            index,
            VariableData {
                ty: final_type.clone(),
            },
        );
        self.scopes
            .register(name, IdentifierKind::Variable(index), &location)?;

        let mut out = Vec::new();
        out.append(&mut self.pending);
        out.push(Statement::new(
            StatementKind::DeclareVariable {
                variable_index: Some(index),
                name: out_name,
                ty: (!partial_untyped).then_some(ExprValue::Resolved(final_type)),
                initial: initial.map(Box::new),
            },
            location,
        ));
        Ok(out)
    }

    fn sanitize_const_declaration(
        &mut self,
        location: SourceLocation,
        const_index: Option<nzsl_ast::ConstantIndex>,
        name: &str,
        ty: Option<&ExprValue<ExpressionType>>,
        expression: &Expression,
    ) -> Result<Vec<Statement>, Error> {
        let (folded, value) = self.eval_constant(expression)?;
        let init_type = folded
            .cached_type
            .clone()
            .unwrap_or(ExpressionType::NoType);

        // array literals are accepted as constants even though they have no
        // scalar value
        let is_array_literal = matches!(
            (&folded.kind, &init_type),
            (ExpressionKind::Cast { .. }, ExpressionType::Array { .. })
        );
        if value.is_none() && !is_array_literal && !self.options.allow_partial_sanitization {
            return Err(CompilerError::ConstantExpressionRequired.at(folded.location));
        }

        let final_type = match ty {
            Some(tv) => {
                let declared = self.resolve_type_value(tv, false, &location)?;
                if declared != init_type {
                    return Err(CompilerError::VarDeclarationTypeUnmatching {
                        got: self.type_name(&init_type),
                        expected: self.type_name(&declared),
                    }
                    .at(folded.location));
                }
                declared
            }
            None => init_type,
        };

        let index = self.alloc_constant(const_index);
        self.constants.insert(
            index,
            ConstantData {
                value: value.clone(),
                ty: final_type.clone(),
            },
        );
        self.scopes
            .register(name, IdentifierKind::Constant(index), &location)?;

        if self.options.remove_const_declaration && value.is_some() {
            return Ok(vec![]);
        }
        Ok(vec![Statement::new(
            StatementKind::DeclareConst {
                const_index: Some(index),
                name: name.to_owned(),
                ty: Some(ExprValue::Resolved(final_type)),
                expression: Box::new(folded),
            },
            location,
        )])
    }

    fn sanitize_option_declaration(
        &mut self,
        location: SourceLocation,
        option_index: Option<nzsl_ast::OptionIndex>,
        name: &str,
        ty: &ExprValue<ExpressionType>,
        default_value: Option<&Expression>,
    ) -> Result<Vec<Statement>, Error> {
        let option_type = self.resolve_type_value(ty, true, &location)?;

        let default = match default_value {
            Some(expr) => Some(self.eval_constant(expr)?),
            None => None,
        };

        let hash = nzsl_ast::checksum::option_hash(name);
        let effective = match self.options.option_values.get(&hash) {
            Some(value) => Some(value.clone()),
            None => default.as_ref().and_then(|(_, value)| value.clone()),
        };
        let Some(effective) = effective else {
            return Err(CompilerError::ConstantExpressionRequired.at(location));
        };
        if effective.expression_type() != option_type {
            return Err(CompilerError::VarDeclarationTypeUnmatching {
                got: self.type_name(&effective.expression_type()),
                expected: self.type_name(&option_type),
            }
            .at(location));
        }

        let index = self.alloc_option(option_index);
        let constant_index = self.alloc_constant(None);
        self.constants.insert(
            constant_index,
            ConstantData {
                value: Some(effective),
                ty: option_type.clone(),
            },
        );
        self.scopes
            .register(name, IdentifierKind::Constant(constant_index), &location)?;

        if self.options.remove_option_declaration {
            return Ok(vec![]);
        }
        Ok(vec![Statement::new(
            StatementKind::DeclareOption {
                option_index: Some(index),
                name: name.to_owned(),
                ty: ExprValue::Resolved(option_type),
                default_value: default.map(|(folded, _)| Box::new(folded)),
            },
            location,
        )])
    }

    fn sanitize_alias_declaration(
        &mut self,
        location: SourceLocation,
        alias_index: Option<nzsl_ast::AliasIndex>,
        name: &str,
        expression: &Expression,
    ) -> Result<Vec<Statement>, Error> {
        let target = self.sanitize_expression(expression)?;
        match &target.kind {
            ExpressionKind::StructType { .. }
            | ExpressionKind::Function { .. }
            | ExpressionKind::Constant { .. }
            | ExpressionKind::AliasValue { .. }
            | ExpressionKind::Type { .. } => {}
            _ => {
                return Err(CompilerError::TypeExpected {
                    got: self.type_name(
                        target
                            .cached_type
                            .as_ref()
                            .unwrap_or(&ExpressionType::NoType),
                    ),
                }
                .at(target.location))
            }
        }

        let index = self.alloc_alias(alias_index);
        self.aliases.insert(
            index,
            crate::AliasData {
                target: target.clone(),
            },
        );
        self.scopes
            .register(name, IdentifierKind::Alias(index), &location)?;

        if self.options.remove_aliases {
            return Ok(vec![]);
        }
        Ok(vec![Statement::new(
            StatementKind::DeclareAlias {
                alias_index: Some(index),
                name: name.to_owned(),
                expression: Box::new(target),
            },
            location,
        )])
    }

    fn sanitize_struct_declaration(
        &mut self,
        location: SourceLocation,
        struct_index: Option<nzsl_ast::StructIndex>,
        exported: bool,
        description: &StructDescription,
    ) -> Result<Vec<Statement>, Error> {
        let mut members = Vec::with_capacity(description.members.len());
        for member in &description.members {
            // false-valued cond members are pruned before resolution
            if let Some(cond) = &member.cond {
                let (folded, value) = self.eval_constant(cond)?;
                match value {
                    Some(ConstantValue::Bool(false)) => continue,
                    Some(ConstantValue::Bool(true)) => {}
                    Some(_) => {
                        return Err(CompilerError::ConditionExpectedBool {
                            got: folded
                                .cached_type
                                .as_ref()
                                .map(|ty| self.type_name(ty))
                                .unwrap_or_default(),
                        }
                        .at(folded.location))
                    }
                    None => {
                        return Err(
                            CompilerError::ConstantExpressionRequired.at(folded.location)
                        )
                    }
                }
            }

            let ty = self.resolve_type_value(&member.ty, true, &member.location)?;

            let builtin = match &member.builtin {
                Some(ExprValue::Resolved(builtin)) => Some(*builtin),
                Some(ExprValue::Expr(expr)) => match &expr.kind {
                    ExpressionKind::Identifier { name } => {
                        Some(BuiltinEntry::from_keyword(name).ok_or_else(|| {
                            CompilerError::UnknownIdentifier { name: name.clone() }
                                .at(expr.location.clone())
                        })?)
                    }
                    _ => {
                        return Err(CompilerError::TypeExpected {
                            got: "<expression>".into(),
                        }
                        .at(expr.location.clone()))
                    }
                },
                None => None,
            };
            if let Some(builtin) = builtin {
                let expected = builtin.expected_type();
                if ty != expected {
                    return Err(CompilerError::BuiltinUnexpectedType {
                        builtin: builtin.keyword().to_owned(),
                        expected: self.type_name(&expected),
                        got: self.type_name(&ty),
                    }
                    .at(member.location.clone()));
                }
            }

            let location_index = match &member.location_index {
                Some(ExprValue::Resolved(index)) => Some(*index),
                Some(ExprValue::Expr(expr)) => self.eval_u32_constant(expr)?,
                None => None,
            };

            members.push(StructMember {
                name: member.name.clone(),
                ty: ExprValue::Resolved(ty),
                builtin: builtin.map(ExprValue::Resolved),
                location_index: location_index.map(ExprValue::Resolved),
                cond: None,
                location: member.location.clone(),
            });
        }

        let index = self.alloc_struct(struct_index);
        let sanitized = StructDescription {
            name: description.name.clone(),
            layout: description.layout.clone(),
            members,
        };
        self.structs.insert(
            index,
            StructData {
                name: description.name.clone(),
                description: sanitized.clone(),
            },
        );
        self.scopes
            .register(&description.name, IdentifierKind::Struct(index), &location)?;

        Ok(vec![Statement::new(
            StatementKind::DeclareStruct {
                struct_index: Some(index),
                exported,
                description: sanitized,
            },
            location,
        )])
    }

    fn sanitize_external_declaration(
        &mut self,
        location: SourceLocation,
        binding_set: Option<&ExprValue<u32>>,
        variables: &[ExternalVar],
    ) -> Result<Vec<Statement>, Error> {
        let block_set = match binding_set {
            Some(value) => Some(self.resolve_u32_value(value)?),
            None => None,
        };

        let mut out_vars = Vec::with_capacity(variables.len());
        for var in variables {
            let ty = self.resolve_type_value(&var.ty, true, &var.location)?;
            let allowed = match &ty {
                ExpressionType::Uniform(_) | ExpressionType::Sampler { .. } => true,
                ExpressionType::Primitive(_)
                | ExpressionType::Vector { .. }
                | ExpressionType::Matrix { .. } => self
                    .current_metadata()
                    .enabled_features
                    .contains(&nzsl_ast::ModuleFeature::PrimitiveExternals),
                _ => false,
            };
            if !allowed {
                return Err(CompilerError::ExtTypeNotAllowed {
                    name: var.name.clone(),
                    ty: self.type_name(&ty),
                }
                .at(var.location.clone()));
            }

            let set = match &var.binding_set {
                Some(value) => self.resolve_u32_value(value)?,
                None => block_set.unwrap_or(0),
            };
            let binding = match &var.binding_index {
                Some(value) => self.resolve_u32_value(value)?,
                None => self.next_auto_binding(set),
            };
            self.note_binding(set, binding);

            let index = self.alloc_variable(var.variable_index);
            let out_name = self.output_name(&var.name);
            self.variables.insert(
                index,
                VariableData {
                    ty: ty.clone(),
                },
            );
            self.scopes
                .register(&var.name, IdentifierKind::Variable(index), &var.location)?;

            out_vars.push(ExternalVar {
                variable_index: Some(index),
                name: out_name,
                ty: ExprValue::Resolved(ty),
                binding_index: Some(ExprValue::Resolved(binding)),
                binding_set: Some(ExprValue::Resolved(set)),
                location: var.location.clone(),
            });
        }

        Ok(vec![Statement::new(
            StatementKind::DeclareExternal {
                binding_set: block_set.map(ExprValue::Resolved),
                variables: out_vars,
            },
            location,
        )])
    }

    fn resolve_u32_value(&mut self, value: &ExprValue<u32>) -> Result<u32, Error> {
        match value {
            ExprValue::Resolved(v) => Ok(*v),
            ExprValue::Expr(expr) => self
                .eval_u32_constant(expr)?
                .ok_or_else(|| {
                    CompilerError::ConstantExpressionRequired.at(expr.location.clone())
                }),
        }
    }

    fn sanitize_function_declaration(
        &mut self,
        location: SourceLocation,
        func: &FunctionDeclaration,
    ) -> Result<Vec<Statement>, Error> {
        let entry_stage = func
            .entry_stage
            .as_ref()
            .and_then(|stage| stage.resolved().copied());

        let mut param_types = Vec::with_capacity(func.parameters.len());
        for param in &func.parameters {
            param_types.push(self.resolve_type_value(&param.ty, true, &param.location)?);
        }
        let return_type = match &func.return_type {
            Some(tv) => self.resolve_type_value(tv, true, &location)?,
            None => ExpressionType::NoType,
        };

        let index = self.alloc_function(func.func_index);

        if let Some(stage) = entry_stage {
            self.register_entry_point(stage, index, &location)?;
            if func.parameters.len() > 1 {
                return Err(
                    CompilerError::EntryFunctionParameter.at(func.parameters[1].location.clone())
                );
            }
            if let (Some(param), Some(ty)) = (func.parameters.first(), param_types.first()) {
                self.check_entry_io_struct(ty)
                    .map_err(|kind| kind.at(param.location.clone()))?;
            }
            if !return_type.is_no_type() {
                match &return_type {
                    ExpressionType::Struct(_) => {
                        self.check_entry_io_struct(&return_type)
                            .map_err(|_| CompilerError::EntryFunctionReturnType.at(location.clone()))?;
                    }
                    _ => {
                        return Err(CompilerError::EntryFunctionReturnType.at(location.clone()))
                    }
                }
            }
        }

        let mut restrictions = Vec::new();
        if func.depth_write.is_some() {
            // writing depth is a fragment-only capability
            restrictions.push(StageRestriction {
                kind: RestrictionKind::Builtin(BuiltinEntry::FragDepth),
                location: location.clone(),
            });
        }

        self.functions.insert(
            index,
            FunctionData {
                name: func.name.clone(),
                parameters: param_types.clone(),
                return_type: return_type.clone(),
                entry_stage,
                calls: Vec::new(),
                restrictions,
            },
        );
        self.scopes
            .register(&func.name, IdentifierKind::Function(index), &location)?;

        self.func_stack.push(FunctionContext {
            index,
            loop_depth: 0,
            return_type: return_type.clone(),
        });
        self.scopes.push_scope();

        let mut parameters = Vec::with_capacity(func.parameters.len());
        for (param, ty) in func.parameters.iter().zip(param_types) {
            let var_index = self.alloc_variable(param.variable_index);
            let out_name = self.output_name(&param.name);
            self.variables.insert(
                var_index,
                VariableData {
                    ty: ty.clone(),
                },
            );
            self.scopes.register(
                &param.name,
                IdentifierKind::Variable(var_index),
                &param.location,
            )?;
            parameters.push(FunctionParameter {
                variable_index: Some(var_index),
                name: out_name,
                ty: ExprValue::Resolved(ty),
                location: param.location.clone(),
            });
        }

        let mut statements = Vec::with_capacity(func.statements.len());
        for statement in &func.statements {
            statements.extend(self.sanitize_statement(statement)?);
        }

        self.scopes.pop_scope();
        self.func_stack.pop();

        Ok(vec![Statement::new(
            StatementKind::DeclareFunction(Box::new(FunctionDeclaration {
                func_index: Some(index),
                name: func.name.clone(),
                parameters,
                statements,
                return_type: func
                    .return_type
                    .as_ref()
                    .map(|_| ExprValue::Resolved(return_type)),
                entry_stage: entry_stage.map(ExprValue::Resolved),
                depth_write: func.depth_write.clone(),
                early_fragment_tests: func.early_fragment_tests.clone(),
                exported: func.exported,
            })),
            location,
        )])
    }

    /// Entry-point IO must be a struct whose members carry a location or a
    /// builtin.
    fn check_entry_io_struct(&self, ty: &ExpressionType) -> Result<(), CompilerError> {
        let ExpressionType::Struct(index) = ty else {
            return Err(CompilerError::EntryFunctionParameter);
        };
        let Some(data) = self.structs.get(index) else {
            return Err(CompilerError::EntryFunctionParameter);
        };
        for member in &data.description.members {
            if member.builtin.is_none() && member.location_index.is_none() {
                return Err(CompilerError::EntryFunctionParameter);
            }
        }
        Ok(())
    }

    // ---- loops ----

    #[allow(clippy::too_many_arguments)]
    fn sanitize_for(
        &mut self,
        location: SourceLocation,
        variable_index: Option<nzsl_ast::VariableIndex>,
        name: &str,
        from: &Expression,
        to: &Expression,
        step: Option<&Expression>,
        unroll: Option<&ExprValue<LoopUnroll>>,
        body: &Statement,
    ) -> Result<Vec<Statement>, Error> {
        let unroll_mode = unroll.and_then(|u| u.resolved().copied());

        if unroll_mode == Some(LoopUnroll::Always) {
            let (_, from_value) = self.eval_constant(from)?;
            let (_, to_value) = self.eval_constant(to)?;
            let step_value = match step {
                Some(expr) => self.eval_constant(expr)?.1,
                None => Some(ConstantValue::Int32(1)),
            };
            if let (Some(from_value), Some(to_value), Some(step_value)) =
                (from_value, to_value, step_value)
            {
                return self.unroll_numeric_for(location, name, from_value, to_value, step_value, body);
            }
            return Err(CompilerError::ConstantExpressionRequired.at(from.location.clone()));
        }

        let from = self.sanitize_expression(from)?;
        let to = self.sanitize_expression(to)?;
        let step = match step {
            Some(expr) => Some(self.sanitize_expression(expr)?),
            None => None,
        };
        let counter_type = from
            .cached_type
            .clone()
            .unwrap_or(ExpressionType::Primitive(PrimitiveType::Int32));
        match &counter_type {
            ExpressionType::Primitive(prim) if prim.is_integer() => {}
            _ if self.options.allow_partial_sanitization => {}
            other => {
                return Err(CompilerError::IndexExpectedInteger {
                    got: self.type_name(other),
                }
                .at(from.location.clone()))
            }
        }

        if self.options.reduce_loops_to_while {
            // for i in a -> b : s   ==>   let i = a; while (i < b) { ...; i += s; }
            self.scopes.push_scope();
            let index = self.alloc_variable(variable_index);
            let out_name = self.output_name(name);
            self.variables.insert(
                index,
                VariableData {
                    ty: counter_type.clone(),
                },
            );
            self.scopes
                .register(name, IdentifierKind::Variable(index), &location)?;

            let decl = Statement::new(
                StatementKind::DeclareVariable {
                    variable_index: Some(index),
                    name: out_name,
                    ty: Some(ExprValue::Resolved(counter_type.clone())),
                    initial: Some(Box::new(from)),
                },
                location.clone(),
            );

            let counter = Expression::typed(
                ExpressionKind::VariableValue { variable: index },
                counter_type.clone(),
                location.clone(),
            );
            let condition = Expression::typed(
                ExpressionKind::Binary {
                    op: BinaryOp::CompLt,
                    left: Box::new(counter.clone()),
                    right: Box::new(to),
                },
                ExpressionType::Primitive(PrimitiveType::Boolean),
                location.clone(),
            );

            self.enter_loop();
            let body = self.sanitize_single(body);
            self.exit_loop();
            let mut body_statements = unscope_statements(body?);

            let step_expr = step.unwrap_or_else(|| {
                Expression::typed(
                    ExpressionKind::ConstantValue {
                        value: integer_one(&counter_type),
                    },
                    counter_type.clone(),
                    location.clone(),
                )
            });
            body_statements.push(self.increment_statement(counter, step_expr, &location));

            self.scopes.pop_scope();

            let while_stmt = Statement::new(
                StatementKind::While {
                    condition: Box::new(condition),
                    unroll: None,
                    body: Box::new(Statement::new(
                        StatementKind::Scoped {
                            statement: Box::new(Statement::new(
                                StatementKind::Multi {
                                    statements: body_statements,
                                },
                                location.clone(),
                            )),
                        },
                        location.clone(),
                    )),
                },
                location,
            );
            return Ok(vec![decl, while_stmt]);
        }

        self.scopes.push_scope();
        let index = self.alloc_variable(variable_index);
        let out_name = self.output_name(name);
        self.variables.insert(
            index,
            VariableData {
                ty: counter_type,
            },
        );
        self.scopes
            .register(name, IdentifierKind::Variable(index), &location)?;
        self.enter_loop();
        let body = self.sanitize_single(body);
        self.exit_loop();
        self.scopes.pop_scope();

        Ok(vec![Statement::new(
            StatementKind::For {
                variable_index: Some(index),
                name: out_name,
                from: Box::new(from),
                to: Box::new(to),
                step: step.map(Box::new),
                unroll: unroll.cloned(),
                body: Box::new(body?),
            },
            location,
        )])
    }

    /// Expands an `[unroll]` numeric loop: one scoped copy per iteration,
    /// with the loop variable declared as a literal. The copies are not a
    /// loop, so `break`/`continue` inside them are rejected.
    fn unroll_numeric_for(
        &mut self,
        location: SourceLocation,
        name: &str,
        from: ConstantValue,
        to: ConstantValue,
        step: ConstantValue,
        body: &Statement,
    ) -> Result<Vec<Statement>, Error> {
        let (mut current, end, step_by, counter_type) = match (&from, &to, &step) {
            (ConstantValue::Int32(f), ConstantValue::Int32(t), ConstantValue::Int32(s)) => (
                i64::from(*f),
                i64::from(*t),
                i64::from(*s),
                ExpressionType::Primitive(PrimitiveType::Int32),
            ),
            (ConstantValue::UInt32(f), ConstantValue::UInt32(t), ConstantValue::UInt32(s)) => (
                i64::from(*f),
                i64::from(*t),
                i64::from(*s),
                ExpressionType::Primitive(PrimitiveType::UInt32),
            ),
            _ => {
                return Err(CompilerError::ConstantExpressionRequired.at(location));
            }
        };
        if step_by <= 0 {
            return Err(CompilerError::ConstantExpressionRequired.at(location));
        }

        let mut out = Vec::new();
        while current < end {
            let value = match counter_type {
                ExpressionType::Primitive(PrimitiveType::UInt32) => {
                    ConstantValue::UInt32(current as u32)
                }
                _ => ConstantValue::Int32(current as i32),
            };
            out.push(self.unrolled_iteration(&location, name, &counter_type, value, None, body)?);
            current += step_by;
        }
        Ok(out)
    }

    /// One unrolled copy: `{ let <name> = <value or element>; <body...> }`.
    fn unrolled_iteration(
        &mut self,
        location: &SourceLocation,
        name: &str,
        var_type: &ExpressionType,
        value: ConstantValue,
        element: Option<Expression>,
        body: &Statement,
    ) -> Result<Statement, Error> {
        self.scopes.push_scope();
        let index = self.alloc_variable(None);
        let out_name = self.output_name(name);
        self.variables.insert(
            index,
            VariableData {
                ty: var_type.clone(),
            },
        );
        self.scopes
            .register(name, IdentifierKind::Variable(index), location)?;

        let initial = match element {
            Some(expr) => expr,
            None => Expression::typed(
                ExpressionKind::ConstantValue { value },
                var_type.clone(),
                location.clone(),
            ),
        };
        let decl = Statement::new(
            StatementKind::DeclareVariable {
                variable_index: Some(index),
                name: out_name,
                ty: Some(ExprValue::Resolved(var_type.clone())),
                initial: Some(Box::new(initial)),
            },
            location.clone(),
        );

        // no loop frame here: loop control inside the expansion is an error
        let body = self.sanitize_single(body)?;
        self.scopes.pop_scope();

        let mut statements = vec![decl];
        statements.extend(unscope_statements(body));
        Ok(Statement::new(
            StatementKind::Scoped {
                statement: Box::new(Statement::new(
                    StatementKind::Multi { statements },
                    location.clone(),
                )),
            },
            location.clone(),
        ))
    }

    fn sanitize_for_each(
        &mut self,
        location: SourceLocation,
        variable_index: Option<nzsl_ast::VariableIndex>,
        name: &str,
        expression: &Expression,
        unroll: Option<&ExprValue<LoopUnroll>>,
        body: &Statement,
    ) -> Result<Vec<Statement>, Error> {
        let container = self.sanitize_expression(expression)?;
        let (element_type, length) = match &container.cached_type {
            Some(ExpressionType::Array {
                element,
                length: Some(length),
            }) => ((**element).clone(), *length),
            None if self.options.allow_partial_sanitization => {
                let body = self.sanitize_single(body)?;
                return Ok(vec![Statement::new(
                    StatementKind::ForEach {
                        variable_index,
                        name: name.to_owned(),
                        expression: Box::new(container),
                        unroll: unroll.cloned(),
                        body: Box::new(body),
                    },
                    location,
                )]);
            }
            other => {
                return Err(CompilerError::ForEachUnsupportedType {
                    got: other
                        .as_ref()
                        .map(|ty| self.type_name(ty))
                        .unwrap_or_else(|| "<unresolved>".into()),
                }
                .at(container.location.clone()))
            }
        };

        let unroll_mode = unroll.and_then(|u| u.resolved().copied());
        if unroll_mode == Some(LoopUnroll::Always) {
            let mut out = Vec::with_capacity(length as usize);
            for i in 0..length {
                let element = Expression::typed(
                    ExpressionKind::AccessIndex {
                        expr: Box::new(container.clone()),
                        indices: vec![Expression::constant(
                            ConstantValue::UInt32(i),
                            location.clone(),
                        )],
                    },
                    element_type.clone(),
                    location.clone(),
                );
                out.push(self.unrolled_iteration(
                    &location,
                    name,
                    &element_type,
                    ConstantValue::UInt32(i),
                    Some(element),
                    body,
                )?);
            }
            return Ok(out);
        }

        if self.options.reduce_loops_to_while {
            // for v in arr  ==>  let i: u32 = 0; while (i < N) { let v = arr[i]; ...; i += 1; }
            let u32_type = ExpressionType::Primitive(PrimitiveType::UInt32);
            self.scopes.push_scope();

            let counter_index = self.alloc_variable(None);
            let counter_name = self.output_name("i");
            self.variables.insert(
                counter_index,
                VariableData {
                    ty: u32_type.clone(),
                },
            );
            let counter = Expression::typed(
                ExpressionKind::VariableValue {
                    variable: counter_index,
                },
                u32_type.clone(),
                location.clone(),
            );
            let counter_decl = Statement::new(
                StatementKind::DeclareVariable {
                    variable_index: Some(counter_index),
                    name: counter_name,
                    ty: Some(ExprValue::Resolved(u32_type.clone())),
                    initial: Some(Box::new(Expression::constant(
                        ConstantValue::UInt32(0),
                        location.clone(),
                    ))),
                },
                location.clone(),
            );

            let condition = Expression::typed(
                ExpressionKind::Binary {
                    op: BinaryOp::CompLt,
                    left: Box::new(counter.clone()),
                    right: Box::new(Expression::constant(
                        ConstantValue::UInt32(length),
                        location.clone(),
                    )),
                },
                ExpressionType::Primitive(PrimitiveType::Boolean),
                location.clone(),
            );

            // element binding inside the loop body
            let element_index = self.alloc_variable(variable_index);
            let element_name = self.output_name(name);
            self.variables.insert(
                element_index,
                VariableData {
                    ty: element_type.clone(),
                },
            );
            self.scopes
                .register(name, IdentifierKind::Variable(element_index), &location)?;
            let element_decl = Statement::new(
                StatementKind::DeclareVariable {
                    variable_index: Some(element_index),
                    name: element_name,
                    ty: Some(ExprValue::Resolved(element_type.clone())),
                    initial: Some(Box::new(Expression::typed(
                        ExpressionKind::AccessIndex {
                            expr: Box::new(container),
                            indices: vec![counter.clone()],
                        },
                        element_type,
                        location.clone(),
                    ))),
                },
                location.clone(),
            );

            self.enter_loop();
            let body = self.sanitize_single(body);
            self.exit_loop();

            let mut body_statements = vec![element_decl];
            body_statements.extend(unscope_statements(body?));
            let one = Expression::constant(ConstantValue::UInt32(1), location.clone());
            body_statements.push(self.increment_statement(counter, one, &location));

            self.scopes.pop_scope();

            let while_stmt = Statement::new(
                StatementKind::While {
                    condition: Box::new(condition),
                    unroll: None,
                    body: Box::new(Statement::new(
                        StatementKind::Scoped {
                            statement: Box::new(Statement::new(
                                StatementKind::Multi {
                                    statements: body_statements,
                                },
                                location.clone(),
                            )),
                        },
                        location.clone(),
                    )),
                },
                location,
            );
            return Ok(vec![counter_decl, while_stmt]);
        }

        self.scopes.push_scope();
        let index = self.alloc_variable(variable_index);
        let out_name = self.output_name(name);
        self.variables.insert(
            index,
            VariableData {
                ty: element_type,
            },
        );
        self.scopes
            .register(name, IdentifierKind::Variable(index), &location)?;
        self.enter_loop();
        let body = self.sanitize_single(body);
        self.exit_loop();
        self.scopes.pop_scope();

        Ok(vec![Statement::new(
            StatementKind::ForEach {
                variable_index: Some(index),
                name: out_name,
                expression: Box::new(container),
                unroll: unroll.cloned(),
                body: Box::new(body?),
            },
            location,
        )])
    }

    /// `counter += step`, expanded when compound assignments are disabled.
    fn increment_statement(
        &self,
        counter: Expression,
        step: Expression,
        location: &SourceLocation,
    ) -> Statement {
        let counter_type = counter.cached_type.clone();
        let kind = if self.options.remove_compound_assignments {
            ExpressionKind::Assign {
                op: AssignOp::Simple,
                left: Box::new(counter.clone()),
                right: Box::new(Expression {
                    location: location.clone(),
                    cached_type: counter_type.clone(),
                    kind: ExpressionKind::Binary {
                        op: BinaryOp::Add,
                        left: Box::new(counter),
                        right: Box::new(step),
                    },
                }),
            }
        } else {
            ExpressionKind::Assign {
                op: AssignOp::CompoundAdd,
                left: Box::new(counter),
                right: Box::new(step),
            }
        };
        Statement::new(
            StatementKind::Expression {
                expression: Box::new(Expression {
                    location: location.clone(),
                    cached_type: counter_type,
                    kind,
                }),
            },
            location.clone(),
        )
    }
}

/// Splices `{ ... }` or a multi-statement into its statement list.
fn unscope_statements(statement: Statement) -> Vec<Statement> {
    match statement.kind {
        StatementKind::Scoped { statement } => unscope_statements(*statement),
        StatementKind::Multi { statements } => statements,
        _ => vec![statement],
    }
}

/// Unwraps a scoped statement (the `const if` inlining rule).
fn unscope(statement: Statement) -> Statement {
    match statement.kind {
        StatementKind::Scoped { statement } => *statement,
        _ => statement,
    }
}

fn integer_one(ty: &ExpressionType) -> ConstantValue {
    match ty {
        ExpressionType::Primitive(PrimitiveType::UInt32) => ConstantValue::UInt32(1),
        _ => ConstantValue::Int32(1),
    }
}
