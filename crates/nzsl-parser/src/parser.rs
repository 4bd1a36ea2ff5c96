//! Recursive-descent parser producing a surface [`Module`].
//!
//! The parser resolves nothing: identifiers, declared types and attribute
//! parameters stay as expressions for the sanitizer. Attribute placement and
//! uniqueness are enforced here, which is where every `P*` error originates.

use nzsl_ast::{
    AccessEntry, AssignOp, BinaryOp, CondStatement, ConstantValue, Error, ExprValue, Expression,
    ExpressionKind, ExternalVar, FunctionDeclaration, FunctionParameter, ImportSymbol,
    LangVersion, LoopUnroll, MemoryLayout, Metadata, Module, ModuleFeature, ParserError,
    ShaderStage, SourceLocation, Statement, StatementKind, StructDescription, StructMember,
    UnaryOp,
};

use crate::lexer::{Token, TokenKind};

/// Parses a token stream into a surface module.
pub fn parse_tokens(tokens: &[Token]) -> Result<Module, Error> {
    Parser { tokens, pos: 0 }.parse_module()
}

/// One parsed `[name(params)]` attribute.
#[derive(Clone, Debug)]
struct Attribute {
    name: String,
    /// Span of the attribute name alone.
    name_location: SourceLocation,
    /// Span of the attribute including its parameter list.
    location: SourceLocation,
    args: Vec<Expression>,
}

impl Attribute {
    fn single_arg(&self) -> Result<&Expression, Error> {
        match self.args.as_slice() {
            [arg] => Ok(arg),
            _ => Err(ParserError::AttributeMissingParameter {
                attribute: self.name.clone(),
            }
            .at(self.name_location.clone())),
        }
    }

    fn string_arg(&self) -> Result<String, Error> {
        match &self.single_arg()?.kind {
            ExpressionKind::ConstantValue {
                value: ConstantValue::String(text),
            } => Ok(text.clone()),
            _ => Err(self.invalid_parameter("<expression>")),
        }
    }

    fn identifier_arg(&self) -> Result<(String, SourceLocation), Error> {
        let arg = self.single_arg()?;
        match &arg.kind {
            ExpressionKind::Identifier { name } => Ok((name.clone(), arg.location.clone())),
            _ => Err(self.invalid_parameter("<expression>")),
        }
    }

    fn u32_arg(&self) -> Result<u32, Error> {
        match &self.single_arg()?.kind {
            ExpressionKind::ConstantValue {
                value: ConstantValue::Int32(value),
            } if *value >= 0 => Ok(*value as u32),
            _ => Err(self.invalid_parameter("<expression>")),
        }
    }

    fn invalid_parameter(&self, parameter: &str) -> Error {
        ParserError::AttributeInvalidParameter {
            attribute: self.name.clone(),
            parameter: parameter.to_owned(),
        }
        .at(self.location.clone())
    }
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn prev_location(&self) -> SourceLocation {
        self.tokens[self.pos.saturating_sub(1)].location.clone()
    }

    fn check(&mut self, kind: &TokenKind) -> bool {
        if std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<Token, Error> {
        if std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected())
        }
    }

    fn expect_identifier(&mut self) -> Result<(String, SourceLocation), Error> {
        match self.peek_kind().clone() {
            TokenKind::Identifier(name) => {
                let token = self.advance();
                Ok((name, token.location))
            }
            _ => Err(self.unexpected()),
        }
    }

    fn unexpected(&self) -> Error {
        let token = self.peek();
        ParserError::UnexpectedToken {
            token: token.kind.name().to_owned(),
        }
        .at(token.location.clone())
    }

    // ---- attributes ----

    fn parse_attribute_groups(&mut self) -> Result<Vec<Attribute>, Error> {
        let mut attributes = Vec::new();
        while matches!(self.peek_kind(), TokenKind::OpenSquareBracket) {
            self.advance();
            loop {
                let (name, name_location) = self.expect_identifier()?;
                let mut args = Vec::new();
                let mut location = name_location.clone();
                if matches!(self.peek_kind(), TokenKind::OpenParenthesis) {
                    self.advance();
                    if !matches!(self.peek_kind(), TokenKind::ClosingParenthesis) {
                        loop {
                            args.push(self.parse_expression()?);
                            if !self.check(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    let close = self.expect(&TokenKind::ClosingParenthesis)?;
                    location = location.extended_to(&close.location);
                }
                attributes.push(Attribute {
                    name,
                    name_location,
                    location,
                    args,
                });
                if !self.check(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::ClosingSquareBracket)?;
        }
        Ok(attributes)
    }

    /// Rejects any attribute whose name is not in `allowed`.
    fn reject_attributes(attributes: &[Attribute], allowed: &[&str]) -> Result<(), Error> {
        for attribute in attributes {
            if !allowed.contains(&attribute.name.as_str()) {
                return Err(ParserError::UnexpectedAttribute {
                    attribute: attribute.name.clone(),
                }
                .at(attribute.location.clone()));
            }
        }
        Ok(())
    }

    fn find_attribute<'a>(attributes: &'a [Attribute], name: &str) -> Option<&'a Attribute> {
        attributes.iter().find(|a| a.name == name)
    }

    // ---- module ----

    fn parse_module(&mut self) -> Result<Module, Error> {
        let attributes = self.parse_attribute_groups()?;
        let module_token = self.expect(&TokenKind::Module)?;
        let mut metadata = self.module_metadata(&attributes, &module_token)?;

        if let TokenKind::Identifier(_) = self.peek_kind() {
            metadata.module_name = self.parse_dotted_identifier()?.0;
        }
        self.expect(&TokenKind::Semicolon)?;

        let mut statements = Vec::new();
        let mut imported_modules = Vec::new();
        while !matches!(self.peek_kind(), TokenKind::EndOfStream) {
            let attributes = self.parse_attribute_groups()?;
            // sanitized output prints inlined imports as nested module blocks
            if matches!(self.peek_kind(), TokenKind::Module) {
                imported_modules.push(self.parse_nested_module(&attributes)?);
                continue;
            }
            statements.push(self.parse_statement_with(&attributes)?);
        }

        let mut module = Module::new(metadata);
        module.imported_modules = imported_modules;
        module.root = Statement::new(
            StatementKind::Multi { statements },
            SourceLocation::default(),
        );
        Ok(module)
    }

    fn parse_nested_module(
        &mut self,
        attributes: &[Attribute],
    ) -> Result<nzsl_ast::ImportedModule, Error> {
        let module_token = self.expect(&TokenKind::Module)?;
        let mut metadata = self.module_metadata(attributes, &module_token)?;
        let (name, _) = self.parse_dotted_identifier()?;
        metadata.module_name = name.clone();

        self.expect(&TokenKind::OpenCurlyBracket)?;
        let mut statements = Vec::new();
        while !matches!(self.peek_kind(), TokenKind::ClosingCurlyBracket) {
            if matches!(self.peek_kind(), TokenKind::EndOfStream) {
                return Err(self.unexpected());
            }
            statements.push(self.parse_statement()?);
        }
        self.advance();

        let mut module = Module::new(metadata);
        module.root = Statement::new(
            StatementKind::Multi { statements },
            SourceLocation::default(),
        );
        Ok(nzsl_ast::ImportedModule {
            identifier: name,
            module,
        })
    }

    fn module_metadata(
        &mut self,
        attributes: &[Attribute],
        module_token: &Token,
    ) -> Result<Metadata, Error> {
        let mut metadata = Metadata::default();
        let mut seen: Vec<&str> = Vec::new();
        let mut version_seen = false;
        for attribute in attributes {
            let unique = |seen: &mut Vec<&str>, name: &'static str| -> Result<(), Error> {
                if seen.contains(&name) {
                    return Err(ParserError::AttributeMultipleUnique {
                        attribute: name.to_owned(),
                    }
                    .at(attribute.location.clone()));
                }
                seen.push(name);
                Ok(())
            };
            match attribute.name.as_str() {
                "nzsl_version" => {
                    unique(&mut seen, "nzsl_version")?;
                    let text = attribute.string_arg()?;
                    metadata.lang_version = LangVersion::parse(&text)
                        .ok_or_else(|| attribute.invalid_parameter(&text))?;
                    version_seen = true;
                }
                "author" => {
                    unique(&mut seen, "author")?;
                    metadata.author = attribute.string_arg()?;
                }
                "desc" => {
                    unique(&mut seen, "desc")?;
                    metadata.description = attribute.string_arg()?;
                }
                "license" => {
                    unique(&mut seen, "license")?;
                    metadata.license = attribute.string_arg()?;
                }
                "feature" => {
                    let (name, arg_location) = attribute.identifier_arg()?;
                    let feature = ModuleFeature::from_keyword(&name).ok_or_else(|| {
                        ParserError::AttributeInvalidParameter {
                            attribute: "feature".to_owned(),
                            parameter: name.clone(),
                        }
                        .at(arg_location)
                    })?;
                    if metadata.enabled_features.contains(&feature) {
                        return Err(ParserError::ModuleFeatureMultipleUnique { feature: name }
                            .at(attribute.location.clone()));
                    }
                    metadata.enabled_features.push(feature);
                }
                other => {
                    return Err(ParserError::UnexpectedAttribute {
                        attribute: other.to_owned(),
                    }
                    .at(attribute.location.clone()))
                }
            }
        }
        if !version_seen {
            return Err(ParserError::MissingAttribute {
                attribute: "nzsl_version".to_owned(),
            }
            .at(module_token.location.clone()));
        }
        Ok(metadata)
    }

    fn parse_dotted_identifier(&mut self) -> Result<(String, SourceLocation), Error> {
        let (mut name, mut location) = self.expect_identifier()?;
        while matches!(self.peek_kind(), TokenKind::Dot) {
            // a dotted continuation only belongs to the name if an identifier follows
            let Some(next) = self.tokens.get(self.pos + 1) else {
                break;
            };
            if !matches!(next.kind, TokenKind::Identifier(_)) {
                break;
            }
            self.advance();
            let (part, part_location) = self.expect_identifier()?;
            name.push('.');
            name.push_str(&part);
            location = location.extended_to(&part_location);
        }
        Ok((name, location))
    }

    // ---- statements ----

    fn parse_statement(&mut self) -> Result<Statement, Error> {
        let attributes = self.parse_attribute_groups()?;
        self.parse_statement_with(&attributes)
    }

    fn parse_statement_with(&mut self, attributes: &[Attribute]) -> Result<Statement, Error> {
        match self.peek_kind() {
            TokenKind::Import => {
                Self::reject_attributes(&attributes, &[])?;
                self.parse_import()
            }
            TokenKind::Option => {
                Self::reject_attributes(&attributes, &[])?;
                self.parse_option()
            }
            TokenKind::Alias => {
                Self::reject_attributes(&attributes, &[])?;
                self.parse_alias()
            }
            TokenKind::Const => {
                if matches!(
                    self.tokens.get(self.pos + 1).map(|t| &t.kind),
                    Some(TokenKind::If)
                ) {
                    Self::reject_attributes(&attributes, &[])?;
                    self.advance(); // const
                    self.parse_branch(true)
                } else {
                    Self::reject_attributes(&attributes, &["cond"])?;
                    self.parse_const_declaration(&attributes)
                }
            }
            TokenKind::Struct => {
                Self::reject_attributes(&attributes, &["layout", "cond", "export"])?;
                self.parse_struct(&attributes)
            }
            TokenKind::External => {
                Self::reject_attributes(&attributes, &["set", "cond"])?;
                self.parse_external(&attributes)
            }
            TokenKind::FunctionDeclaration => {
                Self::reject_attributes(
                    &attributes,
                    &[
                        "entry",
                        "export",
                        "cond",
                        "depth_write",
                        "early_fragment_tests",
                    ],
                )?;
                self.parse_function(&attributes)
            }
            TokenKind::Let => {
                Self::reject_attributes(&attributes, &[])?;
                self.parse_let()
            }
            TokenKind::If => {
                Self::reject_attributes(&attributes, &[])?;
                self.parse_branch(false)
            }
            TokenKind::For => {
                Self::reject_attributes(&attributes, &["unroll"])?;
                self.parse_for(&attributes)
            }
            TokenKind::While => {
                Self::reject_attributes(&attributes, &["unroll"])?;
                self.parse_while(&attributes)
            }
            TokenKind::Discard => {
                Self::reject_attributes(&attributes, &[])?;
                let token = self.advance();
                let end = self.expect(&TokenKind::Semicolon)?;
                // the reported span excludes the terminating semicolon
                let _ = end;
                Ok(Statement::new(StatementKind::Discard, token.location))
            }
            TokenKind::Break => {
                Self::reject_attributes(&attributes, &[])?;
                let token = self.advance();
                self.expect(&TokenKind::Semicolon)?;
                Ok(Statement::new(StatementKind::Break, token.location))
            }
            TokenKind::Continue => {
                Self::reject_attributes(&attributes, &[])?;
                let token = self.advance();
                self.expect(&TokenKind::Semicolon)?;
                Ok(Statement::new(StatementKind::Continue, token.location))
            }
            TokenKind::Return => {
                Self::reject_attributes(&attributes, &[])?;
                let token = self.advance();
                let expression = if matches!(self.peek_kind(), TokenKind::Semicolon) {
                    None
                } else {
                    Some(Box::new(self.parse_expression()?))
                };
                self.expect(&TokenKind::Semicolon)?;
                let location = token.location.extended_to(&self.prev_location());
                Ok(Statement::new(StatementKind::Return { expression }, location))
            }
            TokenKind::OpenCurlyBracket => {
                Self::reject_attributes(&attributes, &[])?;
                self.parse_block()
            }
            _ => {
                Self::reject_attributes(&attributes, &[])?;
                let expression = self.parse_expression()?;
                self.expect(&TokenKind::Semicolon)?;
                let location = expression.location.clone();
                Ok(Statement::new(
                    StatementKind::Expression {
                        expression: Box::new(expression),
                    },
                    location,
                ))
            }
        }
        .map(|statement| Self::apply_cond(&attributes, statement))
    }

    /// Wraps a statement in a compile-time conditional if `[cond(expr)]` was
    /// present.
    fn apply_cond(attributes: &[Attribute], statement: Statement) -> Statement {
        let Some(attribute) = Self::find_attribute(attributes, "cond") else {
            return statement;
        };
        let Some(condition) = attribute.args.first() else {
            return statement;
        };
        let location = statement.location.clone();
        Statement::new(
            StatementKind::Conditional {
                condition: Box::new(condition.clone()),
                statement: Box::new(statement),
            },
            location,
        )
    }

    fn parse_block(&mut self) -> Result<Statement, Error> {
        let open = self.expect(&TokenKind::OpenCurlyBracket)?;
        let mut statements = Vec::new();
        while !matches!(self.peek_kind(), TokenKind::ClosingCurlyBracket) {
            if matches!(self.peek_kind(), TokenKind::EndOfStream) {
                return Err(self.unexpected());
            }
            statements.push(self.parse_statement()?);
        }
        let close = self.advance();
        let location = open.location.extended_to(&close.location);
        let multi = Statement::new(StatementKind::Multi { statements }, location.clone());
        Ok(Statement::new(
            StatementKind::Scoped {
                statement: Box::new(multi),
            },
            location,
        ))
    }

    fn parse_import(&mut self) -> Result<Statement, Error> {
        let import_token = self.advance();

        let mut symbols = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::Multiply => {
                    let token = self.advance();
                    let mut symbol = ImportSymbol {
                        identifier: "*".into(),
                        rename: None,
                        location: token.location,
                    };
                    if self.check(&TokenKind::As) {
                        let (rename, rename_location) = self.expect_identifier()?;
                        symbol.rename = Some(rename);
                        symbol.location = symbol.location.extended_to(&rename_location);
                    }
                    symbols.push(symbol);
                }
                TokenKind::Identifier(_) => {
                    let (identifier, location) = self.parse_dotted_identifier()?;
                    let mut symbol = ImportSymbol {
                        identifier,
                        rename: None,
                        location,
                    };
                    if self.check(&TokenKind::As) {
                        let (rename, rename_location) = self.expect_identifier()?;
                        symbol.rename = Some(rename);
                        symbol.location = symbol.location.extended_to(&rename_location);
                    }
                    symbols.push(symbol);
                }
                _ => return Err(self.unexpected()),
            }
            if !self.check(&TokenKind::Comma) {
                break;
            }
        }

        let (module_name, imports) = if self.check(&TokenKind::From) {
            let (module_name, _) = self.parse_dotted_identifier()?;
            (module_name, symbols)
        } else {
            // `import Module;` — the single "symbol" is the module name
            if symbols.len() != 1 || symbols[0].is_wildcard() || symbols[0].rename.is_some() {
                return Err(self.unexpected());
            }
            (symbols.remove(0).identifier, Vec::new())
        };

        self.expect(&TokenKind::Semicolon)?;
        let location = import_token.location.extended_to(&self.prev_location());
        Ok(Statement::new(
            StatementKind::Import {
                module_name,
                imports,
            },
            location,
        ))
    }

    fn parse_option(&mut self) -> Result<Statement, Error> {
        let option_token = self.advance();
        let (name, _) = self.expect_identifier()?;
        self.expect(&TokenKind::Colon)?;
        let ty = self.parse_type()?;
        let default_value = if self.check(&TokenKind::Assign) {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        self.expect(&TokenKind::Semicolon)?;
        let location = option_token.location.extended_to(&self.prev_location());
        Ok(Statement::new(
            StatementKind::DeclareOption {
                option_index: None,
                name,
                ty,
                default_value,
            },
            location,
        ))
    }

    fn parse_alias(&mut self) -> Result<Statement, Error> {
        let alias_token = self.advance();
        let (name, _) = self.expect_identifier()?;
        self.expect(&TokenKind::Assign)?;
        let expression = self.parse_expression()?;
        self.expect(&TokenKind::Semicolon)?;
        let location = alias_token.location.extended_to(&self.prev_location());
        Ok(Statement::new(
            StatementKind::DeclareAlias {
                alias_index: None,
                name,
                expression: Box::new(expression),
            },
            location,
        ))
    }

    fn parse_const_declaration(&mut self, attributes: &[Attribute]) -> Result<Statement, Error> {
        let _ = attributes;
        let const_token = self.advance();
        let (name, _) = self.expect_identifier()?;
        let ty = if self.check(&TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(&TokenKind::Assign)?;
        let expression = self.parse_expression()?;
        self.expect(&TokenKind::Semicolon)?;
        let location = const_token.location.extended_to(&self.prev_location());
        Ok(Statement::new(
            StatementKind::DeclareConst {
                const_index: None,
                name,
                ty,
                expression: Box::new(expression),
            },
            location,
        ))
    }

    fn parse_struct(&mut self, attributes: &[Attribute]) -> Result<Statement, Error> {
        let struct_token = self.advance();
        let (name, _) = self.expect_identifier()?;

        let layout = match Self::find_attribute(attributes, "layout") {
            Some(attribute) => {
                let (value, arg_location) = attribute.identifier_arg()?;
                match value.as_str() {
                    "std140" => Some(ExprValue::Resolved(MemoryLayout::Std140)),
                    _ => {
                        return Err(ParserError::AttributeInvalidParameter {
                            attribute: "layout".to_owned(),
                            parameter: value,
                        }
                        .at(arg_location))
                    }
                }
            }
            None => None,
        };
        let exported = Self::find_attribute(attributes, "export").is_some();

        self.expect(&TokenKind::OpenCurlyBracket)?;
        let mut members = Vec::new();
        while !matches!(self.peek_kind(), TokenKind::ClosingCurlyBracket) {
            let member_attributes = self.parse_attribute_groups()?;
            Self::reject_attributes(&member_attributes, &["location", "builtin", "cond"])?;

            let (member_name, name_location) = self.expect_identifier()?;
            self.expect(&TokenKind::Colon)?;
            let ty_expr = self.parse_type_expression()?;
            let location = name_location.extended_to(&ty_expr.location);

            let builtin = match Self::find_attribute(&member_attributes, "builtin") {
                Some(attribute) => {
                    let (value, _) = attribute.identifier_arg()?;
                    Some(ExprValue::Expr(Box::new(Expression::new(
                        ExpressionKind::Identifier { name: value },
                        attribute.location.clone(),
                    ))))
                }
                None => None,
            };
            let location_index = match Self::find_attribute(&member_attributes, "location") {
                Some(attribute) => Some(ExprValue::Resolved(attribute.u32_arg()?)),
                None => None,
            };
            let cond = Self::find_attribute(&member_attributes, "cond")
                .and_then(|attribute| attribute.args.first().cloned())
                .map(Box::new);

            members.push(StructMember {
                name: member_name,
                ty: ExprValue::Expr(Box::new(ty_expr)),
                builtin,
                location_index,
                cond,
                location,
            });

            if !self.check(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::ClosingCurlyBracket)?;

        let location = struct_token.location.extended_to(&self.prev_location());
        Ok(Statement::new(
            StatementKind::DeclareStruct {
                struct_index: None,
                exported,
                description: StructDescription {
                    name,
                    layout,
                    members,
                },
            },
            location,
        ))
    }

    fn parse_external(&mut self, attributes: &[Attribute]) -> Result<Statement, Error> {
        let external_token = self.advance();
        let binding_set = match Self::find_attribute(attributes, "set") {
            Some(attribute) => Some(ExprValue::Resolved(attribute.u32_arg()?)),
            None => None,
        };

        self.expect(&TokenKind::OpenCurlyBracket)?;
        let mut variables = Vec::new();
        while !matches!(self.peek_kind(), TokenKind::ClosingCurlyBracket) {
            let var_attributes = self.parse_attribute_groups()?;
            Self::reject_attributes(&var_attributes, &["set", "binding"])?;

            let (name, name_location) = self.expect_identifier()?;
            self.expect(&TokenKind::Colon)?;
            let ty_expr = self.parse_type_expression()?;
            let location = name_location.extended_to(&ty_expr.location);

            let binding_index = match Self::find_attribute(&var_attributes, "binding") {
                Some(attribute) => Some(ExprValue::Resolved(attribute.u32_arg()?)),
                None => None,
            };
            let var_set = match Self::find_attribute(&var_attributes, "set") {
                Some(attribute) => Some(ExprValue::Resolved(attribute.u32_arg()?)),
                None => None,
            };

            variables.push(ExternalVar {
                variable_index: None,
                name,
                ty: ExprValue::Expr(Box::new(ty_expr)),
                binding_index,
                binding_set: var_set,
                location,
            });

            if !self.check(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::ClosingCurlyBracket)?;

        let location = external_token.location.extended_to(&self.prev_location());
        Ok(Statement::new(
            StatementKind::DeclareExternal {
                binding_set,
                variables,
            },
            location,
        ))
    }

    fn parse_function(&mut self, attributes: &[Attribute]) -> Result<Statement, Error> {
        let fn_token = self.advance();
        let (name, _) = self.expect_identifier()?;

        let entry_stage = match Self::find_attribute(attributes, "entry") {
            Some(attribute) => {
                let (value, arg_location) = attribute.identifier_arg()?;
                let stage = match value.as_str() {
                    "frag" => ShaderStage::Fragment,
                    "vert" => ShaderStage::Vertex,
                    _ => {
                        return Err(ParserError::AttributeInvalidParameter {
                            attribute: "entry".to_owned(),
                            parameter: value,
                        }
                        .at(arg_location))
                    }
                };
                Some(ExprValue::Resolved(stage))
            }
            None => None,
        };
        let depth_write = match Self::find_attribute(attributes, "depth_write") {
            Some(attribute) => {
                let (value, arg_location) = attribute.identifier_arg()?;
                let mode = match value.as_str() {
                    "greater" => nzsl_ast::DepthWriteMode::Greater,
                    "less" => nzsl_ast::DepthWriteMode::Less,
                    "replace" => nzsl_ast::DepthWriteMode::Replace,
                    "unchanged" => nzsl_ast::DepthWriteMode::Unchanged,
                    _ => {
                        return Err(ParserError::AttributeInvalidParameter {
                            attribute: "depth_write".to_owned(),
                            parameter: value,
                        }
                        .at(arg_location))
                    }
                };
                Some(ExprValue::Resolved(mode))
            }
            None => None,
        };
        let early_fragment_tests = match Self::find_attribute(attributes, "early_fragment_tests") {
            Some(attribute) if attribute.args.is_empty() => Some(ExprValue::Resolved(true)),
            Some(attribute) => match &attribute.single_arg()?.kind {
                ExpressionKind::ConstantValue {
                    value: ConstantValue::Bool(value),
                } => Some(ExprValue::Resolved(*value)),
                _ => return Err(attribute.invalid_parameter("<expression>")),
            },
            None => None,
        };
        let exported = Self::find_attribute(attributes, "export").is_some();

        self.expect(&TokenKind::OpenParenthesis)?;
        let mut parameters = Vec::new();
        while !matches!(self.peek_kind(), TokenKind::ClosingParenthesis) {
            let (param_name, param_location) = self.expect_identifier()?;
            self.expect(&TokenKind::Colon)?;
            let ty_expr = self.parse_type_expression()?;
            let location = param_location.extended_to(&ty_expr.location);
            parameters.push(FunctionParameter {
                variable_index: None,
                name: param_name,
                ty: ExprValue::Expr(Box::new(ty_expr)),
                location,
            });
            if !self.check(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::ClosingParenthesis)?;

        let return_type = if self.check(&TokenKind::Arrow) {
            Some(self.parse_type()?)
        } else {
            None
        };

        let body = self.parse_block()?;
        let statements = match body.kind {
            StatementKind::Scoped { statement } => match statement.kind {
                StatementKind::Multi { statements } => statements,
                other => vec![Statement::new(other, statement.location)],
            },
            other => vec![Statement::new(other, body.location)],
        };

        let location = fn_token.location.extended_to(&self.prev_location());
        Ok(Statement::new(
            StatementKind::DeclareFunction(Box::new(FunctionDeclaration {
                func_index: None,
                name,
                parameters,
                statements,
                return_type,
                entry_stage,
                depth_write,
                early_fragment_tests,
                exported,
            })),
            location,
        ))
    }

    fn parse_let(&mut self) -> Result<Statement, Error> {
        let let_token = self.advance();
        let (name, _) = self.expect_identifier()?;
        let ty = if self.check(&TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let initial = if self.check(&TokenKind::Assign) {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        self.expect(&TokenKind::Semicolon)?;
        let location = let_token.location.extended_to(&self.prev_location());
        Ok(Statement::new(
            StatementKind::DeclareVariable {
                variable_index: None,
                name,
                ty,
                initial,
            },
            location,
        ))
    }

    fn parse_branch(&mut self, is_const: bool) -> Result<Statement, Error> {
        let if_token = self.expect(&TokenKind::If)?;
        let mut branches = Vec::new();
        let mut else_statement = None;

        loop {
            self.expect(&TokenKind::OpenParenthesis)?;
            let condition = self.parse_expression()?;
            self.expect(&TokenKind::ClosingParenthesis)?;
            let statement = self.parse_statement()?;
            branches.push(CondStatement {
                condition: Box::new(condition),
                statement: Box::new(statement),
            });

            if !self.check(&TokenKind::Else) {
                break;
            }
            if matches!(self.peek_kind(), TokenKind::If) {
                self.advance();
                continue;
            }
            else_statement = Some(Box::new(self.parse_statement()?));
            break;
        }

        let location = if_token.location.extended_to(&self.prev_location());
        Ok(Statement::new(
            StatementKind::Branch {
                branches,
                else_statement,
                is_const,
            },
            location,
        ))
    }

    fn parse_unroll(attributes: &[Attribute]) -> Result<Option<ExprValue<LoopUnroll>>, Error> {
        let Some(attribute) = Self::find_attribute(attributes, "unroll") else {
            return Ok(None);
        };
        if attribute.args.is_empty() {
            return Ok(Some(ExprValue::Resolved(LoopUnroll::Always)));
        }
        let (value, arg_location) = attribute.identifier_arg()?;
        let mode = match value.as_str() {
            "always" => LoopUnroll::Always,
            "hint" => LoopUnroll::Hint,
            "never" => LoopUnroll::Never,
            _ => {
                return Err(ParserError::AttributeInvalidParameter {
                    attribute: "unroll".to_owned(),
                    parameter: value,
                }
                .at(arg_location))
            }
        };
        Ok(Some(ExprValue::Resolved(mode)))
    }

    fn parse_for(&mut self, attributes: &[Attribute]) -> Result<Statement, Error> {
        let for_token = self.advance();
        let unroll = Self::parse_unroll(attributes)?;
        let (name, _) = self.expect_identifier()?;
        self.expect(&TokenKind::In)?;
        let first = self.parse_expression()?;

        if self.check(&TokenKind::Arrow) {
            let to = self.parse_expression()?;
            let step = if self.check(&TokenKind::Colon) {
                Some(Box::new(self.parse_expression()?))
            } else {
                None
            };
            let body = self.parse_statement()?;
            let location = for_token.location.extended_to(&body.location);
            Ok(Statement::new(
                StatementKind::For {
                    variable_index: None,
                    name,
                    from: Box::new(first),
                    to: Box::new(to),
                    step,
                    unroll,
                    body: Box::new(body),
                },
                location,
            ))
        } else {
            let body = self.parse_statement()?;
            let location = for_token.location.extended_to(&body.location);
            Ok(Statement::new(
                StatementKind::ForEach {
                    variable_index: None,
                    name,
                    expression: Box::new(first),
                    unroll,
                    body: Box::new(body),
                },
                location,
            ))
        }
    }

    fn parse_while(&mut self, attributes: &[Attribute]) -> Result<Statement, Error> {
        let while_token = self.advance();
        let unroll = Self::parse_unroll(attributes)?;
        self.expect(&TokenKind::OpenParenthesis)?;
        let condition = self.parse_expression()?;
        self.expect(&TokenKind::ClosingParenthesis)?;
        let body = self.parse_statement()?;
        let location = while_token.location.extended_to(&body.location);
        Ok(Statement::new(
            StatementKind::While {
                condition: Box::new(condition),
                unroll,
                body: Box::new(body),
            },
            location,
        ))
    }

    // ---- types ----

    /// Parses a type position into an unresolved `ExprValue`.
    fn parse_type(&mut self) -> Result<ExprValue<nzsl_ast::ExpressionType>, Error> {
        Ok(ExprValue::Expr(Box::new(self.parse_type_expression()?)))
    }

    /// Type syntax is expression syntax (`vec3[f32]`, `array[T, N]`), so a
    /// type position parses as a postfix expression without calls.
    fn parse_type_expression(&mut self) -> Result<Expression, Error> {
        let (name, location) = self.expect_identifier()?;
        let mut expr = Expression::new(ExpressionKind::Identifier { name }, location);
        loop {
            match self.peek_kind() {
                TokenKind::OpenSquareBracket => {
                    self.advance();
                    let mut indices = Vec::new();
                    if !matches!(self.peek_kind(), TokenKind::ClosingSquareBracket) {
                        loop {
                            indices.push(self.parse_expression()?);
                            if !self.check(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    let close = self.expect(&TokenKind::ClosingSquareBracket)?;
                    let location = expr.location.extended_to(&close.location);
                    expr = Expression::new(
                        ExpressionKind::AccessIndex {
                            expr: Box::new(expr),
                            indices,
                        },
                        location,
                    );
                }
                TokenKind::Dot => {
                    self.advance();
                    let (name, name_location) = self.expect_identifier()?;
                    expr = Self::push_access(expr, name, name_location);
                }
                _ => return Ok(expr),
            }
        }
    }

    // ---- expressions ----

    fn parse_expression(&mut self) -> Result<Expression, Error> {
        let left = self.parse_binary(0)?;
        let op = match self.peek_kind() {
            TokenKind::Assign => AssignOp::Simple,
            TokenKind::PlusAssign => AssignOp::CompoundAdd,
            TokenKind::MinusAssign => AssignOp::CompoundSubtract,
            TokenKind::MultiplyAssign => AssignOp::CompoundMultiply,
            TokenKind::DivideAssign => AssignOp::CompoundDivide,
            TokenKind::LogicalAndAssign => AssignOp::CompoundLogicalAnd,
            TokenKind::LogicalOrAssign => AssignOp::CompoundLogicalOr,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_expression()?;
        let location = left.location.extended_to(&right.location);
        Ok(Expression::new(
            ExpressionKind::Assign {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            location,
        ))
    }

    fn binary_op(kind: &TokenKind) -> Option<(BinaryOp, u8)> {
        Some(match kind {
            TokenKind::LogicalOr => (BinaryOp::LogicalOr, 1),
            TokenKind::LogicalAnd => (BinaryOp::LogicalAnd, 2),
            TokenKind::Equal => (BinaryOp::CompEq, 3),
            TokenKind::NotEqual => (BinaryOp::CompNe, 3),
            TokenKind::LessThan => (BinaryOp::CompLt, 3),
            TokenKind::LessThanEqual => (BinaryOp::CompLe, 3),
            TokenKind::GreaterThan => (BinaryOp::CompGt, 3),
            TokenKind::GreaterThanEqual => (BinaryOp::CompGe, 3),
            TokenKind::Plus => (BinaryOp::Add, 4),
            TokenKind::Minus => (BinaryOp::Subtract, 4),
            TokenKind::Multiply => (BinaryOp::Multiply, 5),
            TokenKind::Divide => (BinaryOp::Divide, 5),
            TokenKind::Modulo => (BinaryOp::Modulo, 5),
            _ => return None,
        })
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expression, Error> {
        let mut left = self.parse_unary()?;
        while let Some((op, precedence)) = Self::binary_op(self.peek_kind()) {
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let right = self.parse_binary(precedence + 1)?;
            let location = left.location.extended_to(&right.location);
            left = Expression::new(
                ExpressionKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                location,
            );
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression, Error> {
        let op = match self.peek_kind() {
            TokenKind::Not => Some(UnaryOp::LogicalNot),
            TokenKind::Minus => Some(UnaryOp::Minus),
            TokenKind::Plus => Some(UnaryOp::Plus),
            _ => None,
        };
        if let Some(op) = op {
            let token = self.advance();
            let expr = self.parse_unary()?;
            let location = token.location.extended_to(&expr.location);
            return Ok(Expression::new(
                ExpressionKind::Unary {
                    op,
                    expr: Box::new(expr),
                },
                location,
            ));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expression, Error> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::Dot => {
                    self.advance();
                    let (name, name_location) = self.expect_identifier()?;
                    expr = Self::push_access(expr, name, name_location);
                }
                TokenKind::OpenSquareBracket => {
                    self.advance();
                    let mut indices = Vec::new();
                    if !matches!(self.peek_kind(), TokenKind::ClosingSquareBracket) {
                        loop {
                            indices.push(self.parse_expression()?);
                            if !self.check(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    let close = self.expect(&TokenKind::ClosingSquareBracket)?;
                    let location = expr.location.extended_to(&close.location);
                    expr = Expression::new(
                        ExpressionKind::AccessIndex {
                            expr: Box::new(expr),
                            indices,
                        },
                        location,
                    );
                }
                TokenKind::OpenParenthesis => {
                    self.advance();
                    let mut parameters = Vec::new();
                    if !matches!(self.peek_kind(), TokenKind::ClosingParenthesis) {
                        loop {
                            parameters.push(self.parse_expression()?);
                            if !self.check(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    let close = self.expect(&TokenKind::ClosingParenthesis)?;
                    let location = expr.location.extended_to(&close.location);

                    // `object.Method(args)` — the last access entry names the
                    // method; everything before it is the receiver
                    expr = if let ExpressionKind::AccessIdentifier {
                        expr: inner,
                        mut identifiers,
                    } = expr.kind
                    {
                        let method = identifiers.pop().expect("access chain cannot be empty");
                        let object = if identifiers.is_empty() {
                            *inner
                        } else {
                            let location = inner
                                .location
                                .extended_to(&identifiers.last().unwrap().location);
                            Expression::new(
                                ExpressionKind::AccessIdentifier {
                                    expr: inner,
                                    identifiers,
                                },
                                location,
                            )
                        };
                        Expression::new(
                            ExpressionKind::CallMethod {
                                object: Box::new(object),
                                method: method.identifier,
                                parameters,
                            },
                            location,
                        )
                    } else {
                        Expression::new(
                            ExpressionKind::CallFunction {
                                target: Box::new(expr),
                                parameters,
                            },
                            location,
                        )
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn push_access(expr: Expression, name: String, name_location: SourceLocation) -> Expression {
        let location = expr.location.extended_to(&name_location);
        if let ExpressionKind::AccessIdentifier {
            expr: inner,
            mut identifiers,
        } = expr.kind
        {
            identifiers.push(AccessEntry {
                identifier: name,
                location: name_location,
            });
            Expression::new(
                ExpressionKind::AccessIdentifier {
                    expr: inner,
                    identifiers,
                },
                location,
            )
        } else {
            Expression::new(
                ExpressionKind::AccessIdentifier {
                    expr: Box::new(expr),
                    identifiers: vec![AccessEntry {
                        identifier: name,
                        location: name_location,
                    }],
                },
                location,
            )
        }
    }

    fn parse_primary(&mut self) -> Result<Expression, Error> {
        match self.peek_kind().clone() {
            TokenKind::IntValue(value) => {
                let token = self.advance();
                Ok(Expression::constant(
                    ConstantValue::Int32(value),
                    token.location,
                ))
            }
            TokenKind::FloatValue(value) => {
                let token = self.advance();
                Ok(Expression::constant(
                    ConstantValue::Float32(value),
                    token.location,
                ))
            }
            TokenKind::StringValue(value) => {
                let token = self.advance();
                Ok(Expression::constant(
                    ConstantValue::String(value),
                    token.location,
                ))
            }
            TokenKind::BoolTrue => {
                let token = self.advance();
                Ok(Expression::constant(
                    ConstantValue::Bool(true),
                    token.location,
                ))
            }
            TokenKind::BoolFalse => {
                let token = self.advance();
                Ok(Expression::constant(
                    ConstantValue::Bool(false),
                    token.location,
                ))
            }
            TokenKind::Identifier(name) => {
                let token = self.advance();
                Ok(Expression::new(
                    ExpressionKind::Identifier { name },
                    token.location,
                ))
            }
            TokenKind::OpenParenthesis => {
                self.advance();
                let mut expr = self.parse_expression()?;
                let close = self.expect(&TokenKind::ClosingParenthesis)?;
                expr.location = expr.location.extended_to(&close.location);
                Ok(expr)
            }
            _ => Err(self.unexpected()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse(source: &str) -> Result<Module, Error> {
        parse_tokens(&tokenize(source)?)
    }

    #[test]
    fn minimal_module() {
        let module = parse("[nzsl_version(\"1.0\")]\nmodule;").unwrap();
        assert_eq!(module.metadata.lang_version, LangVersion::CURRENT);
        assert!(module.root_statements().is_empty());
    }

    #[test]
    fn named_module_with_metadata() {
        let module = parse(
            "[nzsl_version(\"1.0\"), author(\"Lynn\"), desc(\"Test\"), license(\"MIT\")]\nmodule Engine.Fullscreen;",
        )
        .unwrap();
        assert_eq!(module.metadata.module_name, "Engine.Fullscreen");
        assert_eq!(module.metadata.author, "Lynn");
    }

    #[test]
    fn unexpected_leading_token() {
        let err = parse("nazara").unwrap_err();
        assert_eq!(
            err.to_string(),
            "(1,1 -> 6): PUnexpectedToken error: unexpected token Identifier"
        );
    }

    #[test]
    fn missing_version_attribute() {
        let err = parse("module;").unwrap_err();
        assert_eq!(
            err.to_string(),
            "(1,1 -> 6): PMissingAttribute error: missing attribute nzsl_version"
        );
    }

    #[test]
    fn version_requires_parameter() {
        let err = parse("[nzsl_version] module;").unwrap_err();
        assert_eq!(
            err.to_string(),
            "(1,2 -> 13): PAttributeMissingParameter error: attribute nzsl_version requires a parameter"
        );
    }

    #[test]
    fn duplicate_unique_attributes() {
        let err = parse("[nzsl_version(\"1.0\"), nzsl_version(\"1.0\")] module;").unwrap_err();
        assert_eq!(
            err.to_string(),
            "(1,23 -> 41): PAttributeMultipleUnique error: attribute nzsl_version can only be present once"
        );

        let err = parse(
            "[nzsl_version(\"1.0\"), author(\"Lynix\"), author(\"Sir Lynix\")] module;",
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "(1,40 -> 58): PAttributeMultipleUnique error: attribute author can only be present once"
        );
    }

    #[test]
    fn invalid_feature() {
        let err = parse("[nzsl_version(\"1.0\")]\n[feature(non_existent)]\nmodule;").unwrap_err();
        assert_eq!(
            err.to_string(),
            "(2,10 -> 21): PAttributeInvalidParameter error: invalid parameter non_existent for attribute feature"
        );
    }

    #[test]
    fn duplicate_feature() {
        let err = parse(
            "[nzsl_version(\"1.0\")]\n[feature(primitive_externals)]\n[feature(primitive_externals)]\nmodule;",
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "(3,2 -> 29): PModuleFeatureMultipleUnique error: module feature primitive_externals has already been specified"
        );
    }

    #[test]
    fn cond_rejected_on_alias() {
        let err = parse(
            "[nzsl_version(\"1.0\")]\nmodule;\n\n[cond(false)]\nalias vec3f32 = vec3[f32];",
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "(4,2 -> 12): PUnexpectedAttribute error: unexpected attribute cond"
        );
    }

    #[test]
    fn cond_rejected_on_import_and_option() {
        let err =
            parse("[nzsl_version(\"1.0\")]\nmodule;\n\n[cond(true)]\nimport Stuff;").unwrap_err();
        assert_eq!(
            err.to_string(),
            "(4,2 -> 11): PUnexpectedAttribute error: unexpected attribute cond"
        );

        let err = parse(
            "[nzsl_version(\"1.0\")]\nmodule;\n\n[cond(false)]\noption enable: bool;",
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "(4,2 -> 12): PUnexpectedAttribute error: unexpected attribute cond"
        );
    }

    #[test]
    fn trailing_attribute_without_statement() {
        let err = parse("[nzsl_version(\"1.0\")]\nmodule;\n\n[cond(true)]\n").unwrap_err();
        assert!(err
            .to_string()
            .contains("PUnexpectedToken error: unexpected token EndOfStream"));
    }

    #[test]
    fn parses_function_and_struct() {
        let module = parse(
            r#"
[nzsl_version("1.0")]
module;

struct Input
{
    [location(0)] uv: vec2[f32],
    [builtin(position)] pos: vec4[f32]
}

[entry(frag)]
fn main(input: Input) -> Input
{
    let x = input.uv.x * 2.0;
    return input;
}
"#,
        )
        .unwrap();
        let statements = module.root_statements();
        assert_eq!(statements.len(), 2);
        assert!(matches!(
            statements[0].kind,
            StatementKind::DeclareStruct { .. }
        ));
        match &statements[1].kind {
            StatementKind::DeclareFunction(func) => {
                assert_eq!(func.name, "main");
                assert_eq!(
                    func.entry_stage,
                    Some(ExprValue::Resolved(ShaderStage::Fragment))
                );
                assert_eq!(func.parameters.len(), 1);
                assert_eq!(func.statements.len(), 2);
            }
            other => panic!("expected function declaration, got {other:?}"),
        }
    }

    #[test]
    fn parses_import_forms() {
        let module = parse(
            "[nzsl_version(\"1.0\")]\nmodule;\nimport Simple.Module;\nimport X, Y as Z, * from Other;",
        )
        .unwrap();
        let statements = module.root_statements();
        match &statements[0].kind {
            StatementKind::Import {
                module_name,
                imports,
            } => {
                assert_eq!(module_name, "Simple.Module");
                assert!(imports.is_empty());
            }
            other => panic!("expected import, got {other:?}"),
        }
        match &statements[1].kind {
            StatementKind::Import {
                module_name,
                imports,
            } => {
                assert_eq!(module_name, "Other");
                assert_eq!(imports.len(), 3);
                assert_eq!(imports[1].rename.as_deref(), Some("Z"));
                assert!(imports[2].is_wildcard());
            }
            other => panic!("expected import, got {other:?}"),
        }
    }

    #[test]
    fn parses_for_variants() {
        let module = parse(
            "[nzsl_version(\"1.0\")]\nmodule;\nfn f()\n{\n[unroll]\nfor i in 0 -> 10 : 2\n{\n}\nfor v in data\n{\n}\n}",
        )
        .unwrap();
        match &module.root_statements()[0].kind {
            StatementKind::DeclareFunction(func) => {
                assert!(matches!(
                    func.statements[0].kind,
                    StatementKind::For {
                        unroll: Some(ExprValue::Resolved(LoopUnroll::Always)),
                        step: Some(_),
                        ..
                    }
                ));
                assert!(matches!(
                    func.statements[1].kind,
                    StatementKind::ForEach { .. }
                ));
            }
            other => panic!("expected function, got {other:?}"),
        }
    }

    #[test]
    fn method_call_parses_as_call_method() {
        let module = parse(
            "[nzsl_version(\"1.0\")]\nmodule;\nfn f()\n{\nlet c = tex.Sample(uv);\n}",
        )
        .unwrap();
        match &module.root_statements()[0].kind {
            StatementKind::DeclareFunction(func) => match &func.statements[0].kind {
                StatementKind::DeclareVariable {
                    initial: Some(init),
                    ..
                } => {
                    assert!(matches!(
                        &init.kind,
                        ExpressionKind::CallMethod { method, .. } if method == "Sample"
                    ));
                }
                other => panic!("expected variable declaration, got {other:?}"),
            },
            other => panic!("expected function, got {other:?}"),
        }
    }

    #[test]
    fn operator_precedence() {
        let module = parse("[nzsl_version(\"1.0\")]\nmodule;\nconst V = 1 + 2 * 3;").unwrap();
        match &module.root_statements()[0].kind {
            StatementKind::DeclareConst { expression, .. } => match &expression.kind {
                ExpressionKind::Binary { op, right, .. } => {
                    assert_eq!(*op, BinaryOp::Add);
                    assert!(matches!(
                        &right.kind,
                        ExpressionKind::Binary {
                            op: BinaryOp::Multiply,
                            ..
                        }
                    ));
                }
                other => panic!("expected binary, got {other:?}"),
            },
            other => panic!("expected const, got {other:?}"),
        }
    }
}
