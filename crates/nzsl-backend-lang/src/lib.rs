//! NZSL source writer.
//!
//! Pretty-prints a module back to surface syntax. On a sanitized module the
//! output re-parses and re-sanitizes to an equivalent module, which is the
//! round-trip property the integration suites lean on.

use std::collections::HashMap;
use std::fmt::Write as _;

use nzsl_ast::{
    AliasIndex, BinaryOp, ConstantIndex, ExprValue, Expression, ExpressionKind, ExpressionType,
    FunctionIndex, IntrinsicType, Module, Statement, StatementKind, StructIndex, UnaryOp,
    VariableIndex,
};
use nzsl_backend_core::{Writer, WriterError, WriterOutput, WriterStates};

/// The NZSL writer.
pub struct LangWriter;

impl Writer for LangWriter {
    fn name(&self) -> &str {
        "NZSL"
    }

    fn targets(&self) -> &[&str] {
        &["nzsl", "lang"]
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
            options.use_identifier_accesses_for_structs = true;
            sanitized = nzsl_sanitizer::sanitize(module, &options)?;
            &sanitized
        };
        Ok(WriterOutput::text("shader.nzsl", write_module(module)))
    }
}

/// Prints a sanitized module to NZSL source text.
pub fn write_module(module: &Module) -> String {
    let mut printer = Printer::new(module);
    printer.module(module);
    printer.out
}

/// Declaration owner: the root module or one of the inlined imports.
type Owner = Option<usize>;

struct Printer {
    out: String,
    indent: usize,
    /// Which module is currently being printed (affects qualification).
    current_owner: Owner,
    module_identifiers: Vec<String>,
    struct_names: HashMap<StructIndex, (Owner, String)>,
    struct_members: HashMap<StructIndex, Vec<String>>,
    function_names: HashMap<FunctionIndex, (Owner, String)>,
    constant_names: HashMap<ConstantIndex, (Owner, String)>,
    alias_names: HashMap<AliasIndex, (Owner, String)>,
    variable_names: HashMap<VariableIndex, String>,
}

impl Printer {
    fn new(module: &Module) -> Self {
        let mut printer = Self {
            out: String::new(),
            indent: 0,
            current_owner: None,
            module_identifiers: module
                .imported_modules
                .iter()
                .map(|m| m.identifier.clone())
                .collect(),
            struct_names: HashMap::new(),
            struct_members: HashMap::new(),
            function_names: HashMap::new(),
            constant_names: HashMap::new(),
            alias_names: HashMap::new(),
            variable_names: HashMap::new(),
        };
        for (position, imported) in module.imported_modules.iter().enumerate() {
            printer.collect_names(&imported.module.root, Some(position));
        }
        printer.collect_names(&module.root, None);
        printer
    }

    fn collect_names(&mut self, root: &Statement, owner: Owner) {
        let statements = match &root.kind {
            StatementKind::Multi { statements } => statements.as_slice(),
            _ => std::slice::from_ref(root),
        };
        for statement in statements {
            self.collect_statement_names(statement, owner);
        }
    }

    fn collect_statement_names(&mut self, statement: &Statement, owner: Owner) {
        match &statement.kind {
            StatementKind::DeclareStruct {
                struct_index: Some(index),
                description,
                ..
            } => {
                self.struct_names
                    .insert(*index, (owner, description.name.clone()));
                self.struct_members.insert(
                    *index,
                    description.members.iter().map(|m| m.name.clone()).collect(),
                );
            }
            StatementKind::DeclareFunction(func) => {
                if let Some(index) = func.func_index {
                    self.function_names.insert(index, (owner, func.name.clone()));
                }
                for param in &func.parameters {
                    if let Some(index) = param.variable_index {
                        self.variable_names.insert(index, param.name.clone());
                    }
                }
                for statement in &func.statements {
                    self.collect_statement_names(statement, owner);
                }
            }
            StatementKind::DeclareConst {
                const_index: Some(index),
                name,
                ..
            } => {
                self.constant_names.insert(*index, (owner, name.clone()));
            }
            StatementKind::DeclareAlias {
                alias_index: Some(index),
                name,
                ..
            } => {
                self.alias_names.insert(*index, (owner, name.clone()));
            }
            StatementKind::DeclareExternal { variables, .. } => {
                for var in variables {
                    if let Some(index) = var.variable_index {
                        self.variable_names.insert(index, var.name.clone());
                    }
                }
            }
            StatementKind::DeclareVariable {
                variable_index: Some(index),
                name,
                ..
            } => {
                self.variable_names.insert(*index, name.clone());
            }
            StatementKind::Branch {
                branches,
                else_statement,
                ..
            } => {
                for branch in branches {
                    self.collect_statement_names(&branch.statement, owner);
                }
                if let Some(else_statement) = else_statement {
                    self.collect_statement_names(else_statement, owner);
                }
            }
            StatementKind::Multi { statements } => {
                for statement in statements {
                    self.collect_statement_names(statement, owner);
                }
            }
            StatementKind::Scoped { statement }
            | StatementKind::Conditional { statement, .. } => {
                self.collect_statement_names(statement, owner);
            }
            StatementKind::For { variable_index, name, body, .. }
            | StatementKind::ForEach { variable_index, name, body, .. } => {
                if let Some(index) = variable_index {
                    self.variable_names.insert(*index, name.clone());
                }
                self.collect_statement_names(body, owner);
            }
            StatementKind::While { body, .. } => self.collect_statement_names(body, owner),
            _ => {}
        }
    }

    fn qualified(&self, owner: Owner, name: &str) -> String {
        match owner {
            Some(position) if self.current_owner != Some(position) => {
                format!("{}.{name}", self.module_identifiers[position])
            }
            _ => name.to_owned(),
        }
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push('\t');
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }

    // ---- module ----

    fn module(&mut self, module: &Module) {
        self.module_header(module, false);
        self.blank();

        for (position, imported) in module.imported_modules.iter().enumerate() {
            self.current_owner = Some(position);
            self.module_header(&imported.module, true);
            self.line("{");
            self.indent += 1;
            self.statements_of(&imported.module.root);
            self.indent -= 1;
            self.line("}");
        }
        self.current_owner = None;

        self.statements_of(&module.root);
    }

    fn module_header(&mut self, module: &Module, nested: bool) {
        let meta = &module.metadata;
        self.line(&format!("[nzsl_version(\"{}\")]", meta.lang_version));
        if !meta.author.is_empty() {
            self.line(&format!("[author(\"{}\")]", meta.author));
        }
        if !meta.description.is_empty() {
            self.line(&format!("[desc(\"{}\")]", meta.description));
        }
        if !meta.license.is_empty() {
            self.line(&format!("[license(\"{}\")]", meta.license));
        }
        for feature in &meta.enabled_features {
            self.line(&format!("[feature({feature})]"));
        }
        if nested {
            self.line(&format!("module {}", meta.module_name));
        } else if meta.module_name.is_empty() {
            self.line("module;");
        } else {
            self.line(&format!("module {};", meta.module_name));
        }
    }

    fn statements_of(&mut self, root: &Statement) {
        let statements = match &root.kind {
            StatementKind::Multi { statements } => statements.as_slice(),
            _ => std::slice::from_ref(root),
        };
        for statement in statements {
            self.statement(statement);
        }
    }

    // ---- statements ----

    fn statement(&mut self, statement: &Statement) {
        match &statement.kind {
            StatementKind::NoOp => {}
            StatementKind::Multi { statements } => {
                for statement in statements {
                    self.statement(statement);
                }
            }
            StatementKind::Scoped { statement } => {
                self.line("{");
                self.indent += 1;
                self.statement(statement);
                self.indent -= 1;
                self.line("}");
                self.blank();
            }
            StatementKind::Conditional {
                condition,
                statement,
            } => {
                let condition = self.expression(condition, 0);
                self.line(&format!("[cond({condition})]"));
                self.statement(statement);
            }
            StatementKind::Import {
                module_name,
                imports,
            } => {
                if imports.is_empty() {
                    self.line(&format!("import {module_name};"));
                } else {
                    let list = imports
                        .iter()
                        .map(|symbol| match &symbol.rename {
                            Some(rename) => format!("{} as {rename}", symbol.identifier),
                            None => symbol.identifier.clone(),
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    self.line(&format!("import {list} from {module_name};"));
                }
            }
            StatementKind::DeclareAlias { name, expression, .. } => {
                let target = self.expression(expression, 0);
                self.line(&format!("alias {name} = {target};"));
                self.blank();
            }
            StatementKind::DeclareConst {
                name,
                ty,
                expression,
                ..
            } => {
                let ty = match ty.as_ref().and_then(|t| t.resolved()) {
                    Some(ty) => format!(": {}", self.type_syntax(ty)),
                    None => String::new(),
                };
                let value = self.expression(expression, 0);
                self.line(&format!("const {name}{ty} = {value};"));
                self.blank();
            }
            StatementKind::DeclareOption {
                name,
                ty,
                default_value,
                ..
            } => {
                let ty = match ty.resolved() {
                    Some(ty) => self.type_syntax(ty),
                    None => "<unresolved>".into(),
                };
                match default_value {
                    Some(default) => {
                        let default = self.expression(default, 0);
                        self.line(&format!("option {name}: {ty} = {default};"));
                    }
                    None => self.line(&format!("option {name}: {ty};")),
                }
                self.blank();
            }
            StatementKind::DeclareStruct {
                exported,
                description,
                ..
            } => {
                if *exported {
                    self.line("[export]");
                }
                if description.layout.is_some() {
                    self.line("[layout(std140)]");
                }
                self.line(&format!("struct {}", description.name));
                self.line("{");
                self.indent += 1;
                for (i, member) in description.members.iter().enumerate() {
                    let mut attrs = String::new();
                    if let Some(location) = member.location_index.as_ref().and_then(|l| l.resolved())
                    {
                        let _ = write!(attrs, "[location({location})] ");
                    }
                    if let Some(builtin) = member.builtin.as_ref().and_then(|b| b.resolved()) {
                        let _ = write!(attrs, "[builtin({})] ", builtin.keyword());
                    }
                    let ty = match member.ty.resolved() {
                        Some(ty) => self.type_syntax(ty),
                        None => "<unresolved>".into(),
                    };
                    let comma = if i + 1 < description.members.len() { "," } else { "" };
                    self.line(&format!("{attrs}{}: {ty}{comma}", member.name));
                }
                self.indent -= 1;
                self.line("}");
                self.blank();
            }
            StatementKind::DeclareExternal { variables, .. } => {
                self.line("external");
                self.line("{");
                self.indent += 1;
                for (i, var) in variables.iter().enumerate() {
                    let set = var
                        .binding_set
                        .as_ref()
                        .and_then(|v| v.resolved())
                        .copied()
                        .unwrap_or(0);
                    let binding = var
                        .binding_index
                        .as_ref()
                        .and_then(|v| v.resolved())
                        .copied()
                        .unwrap_or(0);
                    let ty = match var.ty.resolved() {
                        Some(ty) => self.type_syntax(ty),
                        None => "<unresolved>".into(),
                    };
                    let comma = if i + 1 < variables.len() { "," } else { "" };
                    self.line(&format!(
                        "[set({set}), binding({binding})] {}: {ty}{comma}",
                        var.name
                    ));
                }
                self.indent -= 1;
                self.line("}");
                self.blank();
            }
            StatementKind::DeclareFunction(func) => {
                if let Some(stage) = func.entry_stage.as_ref().and_then(|s| s.resolved()) {
                    self.line(&format!("[entry({})]", stage.keyword()));
                }
                if let Some(mode) = func.depth_write.as_ref().and_then(|m| m.resolved()) {
                    self.line(&format!("[depth_write({})]", mode.keyword()));
                }
                if func
                    .early_fragment_tests
                    .as_ref()
                    .and_then(|v| v.resolved())
                    .copied()
                    .unwrap_or(false)
                {
                    self.line("[early_fragment_tests]");
                }
                if func.exported {
                    self.line("[export]");
                }
                let params = func
                    .parameters
                    .iter()
                    .map(|param| {
                        let ty = match param.ty.resolved() {
                            Some(ty) => self.type_syntax(ty),
                            None => "<unresolved>".into(),
                        };
                        format!("{}: {ty}", param.name)
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                let ret = match func.return_type.as_ref().and_then(|t| t.resolved()) {
                    Some(ty) if !ty.is_no_type() => format!(" -> {}", self.type_syntax(ty)),
                    _ => String::new(),
                };
                self.line(&format!("fn {}({params}){ret}", func.name));
                self.line("{");
                self.indent += 1;
                for statement in &func.statements {
                    self.statement(statement);
                }
                self.indent -= 1;
                self.line("}");
                self.blank();
            }
            StatementKind::DeclareVariable {
                name, ty, initial, ..
            } => {
                let ty = match ty.as_ref().and_then(|t| t.resolved()) {
                    Some(ty) => format!(": {}", self.type_syntax(ty)),
                    None => String::new(),
                };
                match initial {
                    Some(initial) => {
                        let value = self.expression(initial, 0);
                        self.line(&format!("let {name}{ty} = {value};"));
                    }
                    None => self.line(&format!("let {name}{ty};")),
                }
            }
            StatementKind::Branch {
                branches,
                else_statement,
                is_const,
            } => {
                let keyword = if *is_const { "const if" } else { "if" };
                for (i, branch) in branches.iter().enumerate() {
                    let condition = self.expression(&branch.condition, 0);
                    if i == 0 {
                        self.line(&format!("{keyword} ({condition})"));
                    } else {
                        self.line(&format!("else if ({condition})"));
                    }
                    self.braced_body(&branch.statement);
                }
                if let Some(else_statement) = else_statement {
                    self.line("else");
                    self.braced_body(else_statement);
                }
                self.blank();
            }
            StatementKind::While {
                condition, unroll, body, ..
            } => {
                if unroll.is_some() {
                    self.line("[unroll]");
                }
                let condition = self.expression(condition, 0);
                self.line(&format!("while ({condition})"));
                self.braced_body(body);
                self.blank();
            }
            StatementKind::For {
                name,
                from,
                to,
                step,
                unroll,
                body,
                ..
            } => {
                if unroll.is_some() {
                    self.line("[unroll]");
                }
                let from = self.expression(from, 0);
                let to = self.expression(to, 0);
                let step = match step {
                    Some(step) => format!(" : {}", self.expression(step, 0)),
                    None => String::new(),
                };
                self.line(&format!("for {name} in {from} -> {to}{step}"));
                self.braced_body(body);
                self.blank();
            }
            StatementKind::ForEach {
                name,
                expression,
                unroll,
                body,
                ..
            } => {
                if unroll.is_some() {
                    self.line("[unroll]");
                }
                let container = self.expression(expression, 0);
                self.line(&format!("for {name} in {container}"));
                self.braced_body(body);
                self.blank();
            }
            StatementKind::Return { expression } => match expression {
                Some(expression) => {
                    let value = self.expression(expression, 0);
                    self.line(&format!("return {value};"));
                }
                None => self.line("return;"),
            },
            StatementKind::Discard => self.line("discard;"),
            StatementKind::Break => self.line("break;"),
            StatementKind::Continue => self.line("continue;"),
            StatementKind::Expression { expression } => {
                let text = self.expression(expression, 0);
                self.line(&format!("{text};"));
            }
        }
    }

    /// Branch arms and loop bodies always print braced.
    fn braced_body(&mut self, body: &Statement) {
        self.line("{");
        self.indent += 1;
        match &body.kind {
            StatementKind::Scoped { statement } => self.statement(statement),
            _ => self.statement(body),
        }
        self.indent -= 1;
        self.line("}");
    }

    // ---- types ----

    fn type_syntax(&self, ty: &ExpressionType) -> String {
        match ty {
            ExpressionType::Struct(index) => match self.struct_names.get(index) {
                Some((owner, name)) => self.qualified(*owner, name),
                None => ty.to_string(),
            },
            ExpressionType::Uniform(index) => match self.struct_names.get(index) {
                Some((owner, name)) => format!("uniform[{}]", self.qualified(*owner, name)),
                None => ty.to_string(),
            },
            ExpressionType::Alias(index) => match self.alias_names.get(index) {
                Some((owner, name)) => self.qualified(*owner, name),
                None => ty.to_string(),
            },
            ExpressionType::Array { element, length } => match length {
                Some(length) => format!("array[{}, {length}]", self.type_syntax(element)),
                None => format!("array[{}]", self.type_syntax(element)),
            },
            other => other.to_string(),
        }
    }

    // ---- expressions ----

    /// Precedence levels used for minimal parenthesization.
    fn precedence(kind: &ExpressionKind) -> u8 {
        match kind {
            ExpressionKind::Assign { .. } => 1,
            ExpressionKind::Binary { op, .. } => match op {
                BinaryOp::LogicalOr => 2,
                BinaryOp::LogicalAnd => 3,
                BinaryOp::CompEq
                | BinaryOp::CompGe
                | BinaryOp::CompGt
                | BinaryOp::CompLe
                | BinaryOp::CompLt
                | BinaryOp::CompNe => 4,
                BinaryOp::Add | BinaryOp::Subtract => 5,
                BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => 6,
            },
            ExpressionKind::Unary { .. } => 7,
            ExpressionKind::Conditional { .. } => 8,
            _ => 9,
        }
    }

    fn expression(&self, expr: &Expression, min_precedence: u8) -> String {
        let precedence = Self::precedence(&expr.kind);
        let text = self.expression_inner(expr);
        if precedence < min_precedence {
            format!("({text})")
        } else {
            text
        }
    }

    fn expression_inner(&self, expr: &Expression) -> String {
        match &expr.kind {
            // u32 literals print as casts so the strict typing re-parses
            ExpressionKind::ConstantValue {
                value: nzsl_ast::ConstantValue::UInt32(v),
            } => format!("u32({v})"),
            ExpressionKind::ConstantValue { value } => value.to_string(),
            ExpressionKind::Identifier { name } => name.clone(),
            ExpressionKind::VariableValue { variable } => self
                .variable_names
                .get(variable)
                .cloned()
                .unwrap_or_else(|| format!("var_{variable}")),
            ExpressionKind::Constant { constant } => match self.constant_names.get(constant) {
                Some((owner, name)) => self.qualified(*owner, name),
                None => format!("const_{constant}"),
            },
            ExpressionKind::Function { function } => match self.function_names.get(function) {
                Some((owner, name)) => self.qualified(*owner, name),
                None => format!("fn_{function}"),
            },
            ExpressionKind::StructType { struct_index } => {
                match self.struct_names.get(struct_index) {
                    Some((owner, name)) => self.qualified(*owner, name),
                    None => format!("struct_{struct_index}"),
                }
            }
            ExpressionKind::AliasValue { alias } => match self.alias_names.get(alias) {
                Some((owner, name)) => self.qualified(*owner, name),
                None => format!("alias_{alias}"),
            },
            ExpressionKind::IntrinsicFunction { intrinsic } => {
                intrinsic.name().unwrap_or("Sample").to_owned()
            }
            ExpressionKind::Type { ty } => self.type_syntax(ty),
            ExpressionKind::AccessIdentifier { expr, identifiers } => {
                let mut text = self.expression(expr, 9);
                for entry in identifiers {
                    text.push('.');
                    text.push_str(&entry.identifier);
                }
                text
            }
            ExpressionKind::AccessIndex { expr, indices } => {
                let mut text = self.expression(expr, 9);
                let mut base_type = expr.cached_type.clone();
                for index in indices {
                    // struct accesses print as members, everything else as indexing
                    let struct_index = match &base_type {
                        Some(ExpressionType::Struct(index))
                        | Some(ExpressionType::Uniform(index)) => Some(*index),
                        _ => None,
                    };
                    let position = match &index.kind {
                        ExpressionKind::ConstantValue {
                            value: nzsl_ast::ConstantValue::Int32(v),
                        } if *v >= 0 => Some(*v as usize),
                        ExpressionKind::ConstantValue {
                            value: nzsl_ast::ConstantValue::UInt32(v),
                        } => Some(*v as usize),
                        _ => None,
                    };
                    if let (Some(struct_index), Some(position)) = (struct_index, position) {
                        if let Some(member) = self
                            .struct_members
                            .get(&struct_index)
                            .and_then(|members| members.get(position))
                        {
                            text.push('.');
                            text.push_str(member);
                            base_type = None;
                            continue;
                        }
                    }
                    let _ = write!(text, "[{}]", self.expression(index, 0));
                    base_type = None;
                }
                text
            }
            ExpressionKind::Swizzle { expr, pattern } => {
                format!("{}.{pattern}", self.expression(expr, 9))
            }
            ExpressionKind::Assign { op, left, right } => {
                let token = match op {
                    nzsl_ast::AssignOp::Simple => "=",
                    nzsl_ast::AssignOp::CompoundAdd => "+=",
                    nzsl_ast::AssignOp::CompoundSubtract => "-=",
                    nzsl_ast::AssignOp::CompoundMultiply => "*=",
                    nzsl_ast::AssignOp::CompoundDivide => "/=",
                    nzsl_ast::AssignOp::CompoundLogicalAnd => "&&=",
                    nzsl_ast::AssignOp::CompoundLogicalOr => "||=",
                };
                format!(
                    "{} {token} {}",
                    self.expression(left, 2),
                    self.expression(right, 1)
                )
            }
            ExpressionKind::Binary { op, left, right } => {
                let precedence = Self::precedence(&expr.kind);
                format!(
                    "{} {op} {}",
                    self.expression(left, precedence),
                    self.expression(right, precedence + 1)
                )
            }
            ExpressionKind::Unary { op, expr } => {
                let token = match op {
                    UnaryOp::LogicalNot => "!",
                    UnaryOp::Minus => "-",
                    UnaryOp::Plus => "+",
                };
                format!("{token}{}", self.expression(expr, 7))
            }
            ExpressionKind::CallFunction { target, parameters } => {
                let args = parameters
                    .iter()
                    .map(|p| self.expression(p, 0))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}({args})", self.expression(target, 9))
            }
            ExpressionKind::CallMethod {
                object,
                method,
                parameters,
            } => {
                let args = parameters
                    .iter()
                    .map(|p| self.expression(p, 0))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}.{method}({args})", self.expression(object, 9))
            }
            ExpressionKind::Cast {
                target,
                expressions,
            } => {
                let target = match target {
                    ExprValue::Resolved(ty) => self.type_syntax(ty),
                    ExprValue::Expr(expr) => self.expression(expr, 9),
                };
                let args = expressions
                    .iter()
                    .map(|e| self.expression(e, 0))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{target}({args})")
            }
            ExpressionKind::Intrinsic {
                intrinsic,
                parameters,
            } => {
                if *intrinsic == IntrinsicType::SampleTexture {
                    let (receiver, rest) = parameters
                        .split_first()
                        .expect("texture sampling always has a receiver");
                    let args = rest
                        .iter()
                        .map(|p| self.expression(p, 0))
                        .collect::<Vec<_>>()
                        .join(", ");
                    return format!("{}.Sample({args})", self.expression(receiver, 9));
                }
                let args = parameters
                    .iter()
                    .map(|p| self.expression(p, 0))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}({args})", intrinsic.name().unwrap_or("Sample"))
            }
            ExpressionKind::Conditional {
                condition,
                true_path,
                false_path,
            } => format!(
                "select({}, {}, {})",
                self.expression(condition, 0),
                self.expression(true_path, 0),
                self.expression(false_path, 0)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nzsl_sanitizer::Options;

    fn roundtrip(source: &str) -> (Module, String) {
        let module = nzsl_parser::parse(source).expect("parse failed");
        let sanitized = nzsl_sanitizer::sanitize(&module, &Options::default()).expect("sanitize");
        let printed = write_module(&sanitized);
        (sanitized, printed)
    }

    const SHADER: &str = r#"
[nzsl_version("1.0")]
module;

struct Input
{
    value: f32
}

external
{
    [set(0), binding(0)] data: uniform[Input]
}

[entry(frag)]
fn main()
{
    let x: f32 = data.value * 2.0;
}
"#;

    #[test]
    fn printed_output_reparses() {
        let (_, printed) = roundtrip(SHADER);
        let reparsed = nzsl_parser::parse(&printed)
            .unwrap_or_else(|err| panic!("printed output failed to parse: {err}\n{printed}"));
        nzsl_sanitizer::sanitize(&reparsed, &Options::default())
            .unwrap_or_else(|err| panic!("printed output failed to sanitize: {err}\n{printed}"));
    }

    #[test]
    fn print_reparse_sanitize_is_stable() {
        let (sanitized, printed) = roundtrip(SHADER);
        let reparsed = nzsl_parser::parse(&printed).expect("reparse failed");
        let resanitized =
            nzsl_sanitizer::sanitize(&reparsed, &Options::default()).expect("resanitize failed");
        assert_eq!(write_module(&resanitized), write_module(&sanitized));
        let _ = sanitized;
    }

    #[test]
    fn member_access_prints_by_name() {
        let (_, printed) = roundtrip(SHADER);
        assert!(printed.contains("data.value"), "output:\n{printed}");
        assert!(printed.contains("let x: f32 = data.value * 2.0;"));
    }

    #[test]
    fn module_header_round_trips_metadata() {
        let source = r#"
[nzsl_version("1.0"), author("Lynn"), desc("Test"), license("MIT")]
module Engine.Test;
"#;
        let (_, printed) = roundtrip(source);
        assert!(printed.contains("[nzsl_version(\"1.0\")]"));
        assert!(printed.contains("[author(\"Lynn\")]"));
        assert!(printed.contains("[desc(\"Test\")]"));
        assert!(printed.contains("[license(\"MIT\")]"));
        assert!(printed.contains("module Engine.Test;"));
    }

    #[test]
    fn floats_print_with_decimal_point() {
        let (_, printed) = roundtrip(
            "[nzsl_version(\"1.0\")]\nmodule;\nfn f()\n{\nlet a = 42.0;\nlet b = 0.5;\n}",
        );
        assert!(printed.contains("let a: f32 = 42.0;"));
        assert!(printed.contains("let b: f32 = 0.5;"));
    }
}
