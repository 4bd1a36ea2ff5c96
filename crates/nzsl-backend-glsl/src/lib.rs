//! GLSL writer.
//!
//! Emits OpenGL / OpenGL ES shading language from a module. The writer
//! always runs its own sanitization pass (loop lowering, alias and option
//! removal, unique names against the GLSL keyword set), selects one entry
//! point per generation, flattens entry-point IO structs to `in`/`out`
//! globals, and wraps uniform-typed externals in std140 blocks.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use nzsl_ast::{
    BuiltinEntry, ConstantValue, ExprValue, Expression, ExpressionKind, ExpressionType,
    FunctionIndex, ImageDim, IntrinsicType, Module, PrimitiveType, ShaderStage,
    ShaderStageFlags, Statement, StatementKind, StructIndex, VariableIndex,
};
use nzsl_backend_core::{Writer, WriterError, WriterOutput, WriterStates};

/// Target OpenGL environment.
#[derive(Clone, Copy, Debug)]
pub struct GlslEnv {
    pub gl_major: u32,
    pub gl_minor: u32,
    pub gl_es: bool,
    /// Permit enabling `GL_ARB_*` extensions on older desktop targets.
    pub allow_extensions: bool,
}

impl Default for GlslEnv {
    fn default() -> Self {
        Self {
            gl_major: 3,
            gl_minor: 0,
            gl_es: false,
            allow_extensions: true,
        }
    }
}

impl GlslEnv {
    fn version_number(&self) -> u32 {
        self.gl_major * 100 + self.gl_minor * 10
    }
}

/// The GLSL writer.
#[derive(Default)]
pub struct GlslWriter {
    pub env: GlslEnv,
    /// Entry-point stage to generate; defaults to the only entry present.
    pub stage: Option<ShaderStage>,
}

impl Writer for GlslWriter {
    fn name(&self) -> &str {
        "GLSL"
    }

    fn targets(&self) -> &[&str] {
        &["glsl", "glsl-es"]
    }

    fn generate(
        &self,
        module: &Module,
        states: &WriterStates,
    ) -> Result<WriterOutput, WriterError> {
        // always sanitize: the GLSL keyword set must be kept out of the
        // output even when the input is already canonical
        let mut options = states.sanitizer_options();
        options.reduce_loops_to_while = true;
        options.remove_aliases = true;
        options.remove_const_declaration = true;
        options.remove_option_declaration = true;
        options.remove_scalar_swizzling = true;
        options.make_variable_name_unique = true;
        options.reserved_identifiers = reserved_identifiers();
        let mut module = nzsl_sanitizer::sanitize(module, &options)?;

        let stage = self
            .stage
            .or_else(|| single_entry_stage(&module))
            .ok_or_else(|| WriterError::MissingEntryPoint("GLSL".into()))?;

        if states.optimize {
            module = nzsl_opt::propagate_constants(&module)?;
            module = nzsl_opt::eliminate_unused(
                &module,
                &nzsl_opt::DependencyConfig {
                    used_shader_stages: ShaderStageFlags::from(stage),
                },
            );
        }

        let mut printer = GlslPrinter::new(&module, self.env, stage);
        let output = printer.generate()?;
        let extension = match stage {
            ShaderStage::Fragment => "frag.glsl",
            ShaderStage::Vertex => "vert.glsl",
        };
        Ok(WriterOutput::text(format!("shader.{extension}"), output))
    }
}

fn single_entry_stage(module: &Module) -> Option<ShaderStage> {
    let mut found = None;
    for statement in module.root_statements() {
        if let StatementKind::DeclareFunction(func) = &statement.kind {
            if let Some(stage) = func.entry_stage.as_ref().and_then(|s| s.resolved()) {
                if found.is_some() {
                    return None;
                }
                found = Some(*stage);
            }
        }
    }
    found
}

/// GLSL keywords rewritten away by sanitization (GLSL ES 3.2 reserved set,
/// abbreviated to the identifiers shader code plausibly collides with).
fn reserved_identifiers() -> HashSet<String> {
    [
        "active", "asm", "attribute", "bool", "break", "buffer", "case", "cast", "centroid",
        "class", "coherent", "common", "const", "continue", "default", "discard", "do", "double",
        "dvec2", "dvec3", "dvec4", "else", "enum", "extern", "external", "false", "filter",
        "fixed", "flat", "float", "for", "goto", "half", "highp", "if", "in", "inline", "inout",
        "input", "int", "interface", "invariant", "ivec2", "ivec3", "ivec4", "layout", "long",
        "lowp", "mat2", "mat3", "mat4", "mediump", "namespace", "noinline", "noperspective",
        "out", "output", "partition", "patch", "precise", "precision", "public", "readonly",
        "resource", "restrict", "return", "sample", "sampler1D", "sampler2D", "sampler3D",
        "samplerCube", "short", "sizeof", "smooth", "static", "struct", "subroutine", "switch",
        "template", "this", "true", "typedef", "uint", "uniform", "union", "unsigned", "using",
        "uvec2", "uvec3", "uvec4", "varying", "vec2", "vec3", "vec4", "void", "volatile", "while",
        "writeonly",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

struct GlslPrinter<'m> {
    module: &'m Module,
    env: GlslEnv,
    stage: ShaderStage,
    out: String,
    indent: usize,
    struct_names: HashMap<StructIndex, String>,
    struct_members: HashMap<StructIndex, Vec<(String, ExpressionType)>>,
    function_names: HashMap<FunctionIndex, String>,
    variable_names: HashMap<VariableIndex, String>,
}

impl<'m> GlslPrinter<'m> {
    fn new(module: &'m Module, env: GlslEnv, stage: ShaderStage) -> Self {
        let mut printer = Self {
            module,
            env,
            stage,
            out: String::new(),
            indent: 0,
            struct_names: HashMap::new(),
            struct_members: HashMap::new(),
            function_names: HashMap::new(),
            variable_names: HashMap::new(),
        };
        for imported in &module.imported_modules {
            let suffix = imported.identifier.trim_start_matches('_').replace('.', "_");
            printer.collect_names(&imported.module.root, Some(&suffix));
        }
        printer.collect_names(&module.root, None);
        printer
    }

    fn collect_names(&mut self, root: &Statement, suffix: Option<&str>) {
        for statement in root_statements(root) {
            match &statement.kind {
                StatementKind::DeclareStruct {
                    struct_index: Some(index),
                    description,
                    ..
                } => {
                    let name = match suffix {
                        Some(suffix) => format!("{}_{suffix}", description.name),
                        None => description.name.clone(),
                    };
                    self.struct_names.insert(*index, name);
                    self.struct_members.insert(
                        *index,
                        description
                            .members
                            .iter()
                            .map(|m| {
                                (
                                    m.name.clone(),
                                    m.ty.resolved().cloned().unwrap_or(ExpressionType::NoType),
                                )
                            })
                            .collect(),
                    );
                }
                StatementKind::DeclareFunction(func) => {
                    if let Some(index) = func.func_index {
                        let name = match suffix {
                            Some(suffix) => format!("{}_{suffix}", func.name),
                            None => func.name.clone(),
                        };
                        self.function_names.insert(index, name);
                    }
                    for param in &func.parameters {
                        if let Some(index) = param.variable_index {
                            self.variable_names.insert(index, param.name.clone());
                        }
                    }
                    self.collect_locals(&func.statements);
                }
                StatementKind::DeclareExternal { variables, .. } => {
                    for var in variables {
                        if let Some(index) = var.variable_index {
                            self.variable_names.insert(index, var.name.clone());
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn collect_locals(&mut self, statements: &[Statement]) {
        use nzsl_ast::visit::{walk_statement, AstVisitor};
        struct Locals<'a>(&'a mut HashMap<VariableIndex, String>);
        impl AstVisitor for Locals<'_> {
            fn visit_statement(&mut self, stmt: &Statement) {
                match &stmt.kind {
                    StatementKind::DeclareVariable {
                        variable_index: Some(index),
                        name,
                        ..
                    } => {
                        self.0.insert(*index, name.clone());
                    }
                    StatementKind::For {
                        variable_index: Some(index),
                        name,
                        ..
                    }
                    | StatementKind::ForEach {
                        variable_index: Some(index),
                        name,
                        ..
                    } => {
                        self.0.insert(*index, name.clone());
                    }
                    _ => {}
                }
                walk_statement(self, stmt);
            }
        }
        let mut locals = Locals(&mut self.variable_names);
        for statement in statements {
            locals.visit_statement(statement);
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

    // ---- top level ----

    fn generate(&mut self) -> Result<String, WriterError> {
        let module = self.module;
        self.header();

        for imported in &module.imported_modules {
            self.line(&format!(
                "// Module {}",
                imported.module.metadata.module_name
            ));
            self.blank();
            self.declarations(&imported.module.root)?;
        }

        self.line("// Main file");
        self.blank();
        self.declarations(&module.root)?;

        let entry = self
            .entry_function()
            .ok_or_else(|| WriterError::MissingEntryPoint(self.stage.to_string()))?;
        self.entry_point(entry)?;
        Ok(std::mem::take(&mut self.out))
    }

    fn header(&mut self) {
        let version = self.env.version_number();
        if self.env.gl_es {
            self.line(&format!("#version {version} es"));
        } else {
            self.line(&format!("#version {version}"));
        }

        if !self.env.gl_es && self.env.allow_extensions {
            if version < 420 {
                self.line("#extension GL_ARB_shading_language_420pack : require");
            }
            if version < 410 {
                self.line("#extension GL_ARB_separate_shader_objects : require");
            }
        }
        self.blank();
        if self.env.gl_es {
            self.line("precision highp float;");
            self.blank();
        }
    }

    fn entry_function(&self) -> Option<&'m nzsl_ast::FunctionDeclaration> {
        for statement in self.module.root_statements() {
            if let StatementKind::DeclareFunction(func) = &statement.kind {
                if func.entry_stage.as_ref().and_then(|s| s.resolved()) == Some(&self.stage) {
                    return Some(func);
                }
            }
        }
        None
    }

    fn declarations(&mut self, root: &Statement) -> Result<(), WriterError> {
        let statements: Vec<Statement> = root_statements(root).to_vec();
        for statement in &statements {
            match &statement.kind {
                StatementKind::DeclareStruct {
                    struct_index: Some(index),
                    ..
                } => self.struct_declaration(*index)?,
                StatementKind::DeclareExternal { variables, .. } => {
                    for var in variables.clone() {
                        self.external_declaration(&var)?;
                    }
                    self.blank();
                }
                StatementKind::DeclareFunction(func) => {
                    if func.entry_stage.is_none() {
                        self.function_declaration(func)?;
                    }
                }
                // aliases, consts and options are gone after sanitization
                _ => {}
            }
        }
        Ok(())
    }

    fn struct_declaration(&mut self, index: StructIndex) -> Result<(), WriterError> {
        let name = self.struct_names[&index].clone();
        let members = self.struct_members[&index].clone();
        self.line(&format!("struct {name}"));
        self.line("{");
        self.indent += 1;
        for (member_name, member_type) in &members {
            let decl = self.variable_declaration(member_type, member_name)?;
            self.line(&format!("{decl};"));
        }
        self.indent -= 1;
        self.line("};");
        self.blank();
        Ok(())
    }

    fn external_declaration(&mut self, var: &nzsl_ast::ExternalVar) -> Result<(), WriterError> {
        let ty = var.ty.resolved().cloned().unwrap_or(ExpressionType::NoType);
        match ty {
            ExpressionType::Uniform(index) => {
                let members = self.struct_members[&index].clone();
                self.line(&format!("layout(std140) uniform _Binding_{}", var.name));
                self.line("{");
                self.indent += 1;
                for (member_name, member_type) in &members {
                    let decl = self.variable_declaration(member_type, member_name)?;
                    self.line(&format!("{decl};"));
                }
                self.indent -= 1;
                self.line(&format!("}} {};", var.name));
            }
            ExpressionType::Sampler { .. } => {
                let ty = self.type_syntax(&ty)?;
                self.line(&format!("uniform {ty} {};", var.name));
            }
            other => {
                let decl = self.variable_declaration(&other, &var.name)?;
                self.line(&format!("uniform {decl};"));
            }
        }
        Ok(())
    }

    fn function_declaration(
        &mut self,
        func: &nzsl_ast::FunctionDeclaration,
    ) -> Result<(), WriterError> {
        let name = func
            .func_index
            .and_then(|index| self.function_names.get(&index).cloned())
            .unwrap_or_else(|| func.name.clone());
        let ret = match func.return_type.as_ref().and_then(|t| t.resolved()) {
            Some(ty) if !ty.is_no_type() => self.type_syntax(ty)?,
            _ => "void".into(),
        };
        let params = func
            .parameters
            .iter()
            .map(|param| {
                let ty = param
                    .ty
                    .resolved()
                    .cloned()
                    .unwrap_or(ExpressionType::NoType);
                self.variable_declaration(&ty, &param.name)
            })
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");
        self.line(&format!("{ret} {name}({params})"));
        self.line("{");
        self.indent += 1;
        for statement in &func.statements {
            self.statement(statement)?;
        }
        self.indent -= 1;
        self.line("}");
        self.blank();
        Ok(())
    }

    // ---- entry point ----

    fn io_members(&self, ty: Option<&ExpressionType>) -> Vec<(String, ExpressionType, Option<BuiltinEntry>)> {
        let Some(ExpressionType::Struct(index)) = ty else {
            return Vec::new();
        };
        let mut members = Vec::new();
        for statement in all_statements(self.module) {
            if let StatementKind::DeclareStruct {
                struct_index: Some(struct_index),
                description,
                ..
            } = &statement.kind
            {
                if struct_index == index {
                    for member in &description.members {
                        members.push((
                            member.name.clone(),
                            member.ty.resolved().cloned().unwrap_or(ExpressionType::NoType),
                            member.builtin.as_ref().and_then(|b| b.resolved()).copied(),
                        ));
                    }
                }
            }
        }
        members
    }

    fn builtin_name(builtin: BuiltinEntry) -> &'static str {
        match builtin {
            BuiltinEntry::FragCoord => "gl_FragCoord",
            BuiltinEntry::FragDepth => "gl_FragDepth",
            BuiltinEntry::VertexPosition => "gl_Position",
        }
    }

    fn entry_point(
        &mut self,
        func: &nzsl_ast::FunctionDeclaration,
    ) -> Result<(), WriterError> {
        let input_param = func.parameters.first();
        let input_type = input_param.and_then(|p| p.ty.resolved()).cloned();
        let inputs = self.io_members(input_type.as_ref());
        let output_type = func.return_type.as_ref().and_then(|t| t.resolved()).cloned();
        let outputs = self.io_members(output_type.as_ref());

        if !inputs.is_empty() {
            self.line("/**************** Inputs ****************/");
            for (name, ty, builtin) in &inputs {
                if builtin.is_none() {
                    let decl = self.variable_declaration(ty, &format!("_In_{name}"))?;
                    self.line(&format!("in {decl};"));
                }
            }
            self.blank();
        }
        if !outputs.is_empty() {
            self.line("/*************** Outputs ***************/");
            for (name, ty, builtin) in &outputs {
                if builtin.is_none() {
                    let decl = self.variable_declaration(ty, &format!("_Out_{name}"))?;
                    self.line(&format!("out {decl};"));
                }
            }
            self.blank();
        }

        self.line("void main()");
        self.line("{");
        self.indent += 1;

        if let (Some(param), Some(ty)) = (input_param, input_type.as_ref()) {
            let decl = self.variable_declaration(ty, &param.name)?;
            self.line(&format!("{decl};"));
            for (name, _, builtin) in &inputs {
                let source = match builtin {
                    Some(builtin) => Self::builtin_name(*builtin).to_owned(),
                    None => format!("_In_{name}"),
                };
                self.line(&format!("{}.{name} = {source};", param.name));
            }
            self.blank();
        }

        for statement in &func.statements {
            self.entry_statement(statement, &outputs)?;
        }

        self.indent -= 1;
        self.line("}");
        Ok(())
    }

    /// Entry bodies rewrite `return value;` into output copies.
    fn entry_statement(
        &mut self,
        statement: &Statement,
        outputs: &[(String, ExpressionType, Option<BuiltinEntry>)],
    ) -> Result<(), WriterError> {
        match &statement.kind {
            StatementKind::Return {
                expression: Some(expression),
            } => {
                let value = self.expression(expression, 0)?;
                // single evaluation of the returned struct
                let source = match &expression.kind {
                    ExpressionKind::VariableValue { .. } => value,
                    _ => {
                        let ty = expression
                            .cached_type
                            .as_ref()
                            .ok_or_else(|| WriterError::Unsupported("untyped return".into()))?
                            .clone();
                        let decl = self.variable_declaration(&ty, "_return_value")?;
                        self.line(&format!("{decl} = {value};"));
                        "_return_value".to_owned()
                    }
                };
                self.blank();
                for (name, _, builtin) in outputs {
                    let target = match builtin {
                        Some(builtin) => Self::builtin_name(*builtin).to_owned(),
                        None => format!("_Out_{name}"),
                    };
                    self.line(&format!("{target} = {source}.{name};"));
                }
                self.line("return;");
                Ok(())
            }
            StatementKind::Multi { statements } => {
                for statement in statements {
                    self.entry_statement(statement, outputs)?;
                }
                Ok(())
            }
            StatementKind::Scoped { statement } => {
                self.line("{");
                self.indent += 1;
                self.entry_statement(statement, outputs)?;
                self.indent -= 1;
                self.line("}");
                Ok(())
            }
            StatementKind::Branch {
                branches,
                else_statement,
                ..
            } => {
                for (i, branch) in branches.iter().enumerate() {
                    let condition = self.expression(&branch.condition, 0)?;
                    let keyword = if i == 0 { "if" } else { "else if" };
                    self.line(&format!("{keyword} ({condition})"));
                    self.line("{");
                    self.indent += 1;
                    self.entry_statement(unscoped(&branch.statement), outputs)?;
                    self.indent -= 1;
                    self.line("}");
                }
                if let Some(else_statement) = else_statement {
                    self.line("else");
                    self.line("{");
                    self.indent += 1;
                    self.entry_statement(unscoped(else_statement), outputs)?;
                    self.indent -= 1;
                    self.line("}");
                }
                Ok(())
            }
            _ => self.statement(statement),
        }
    }

    // ---- statements ----

    fn statement(&mut self, statement: &Statement) -> Result<(), WriterError> {
        match &statement.kind {
            StatementKind::NoOp => Ok(()),
            StatementKind::Multi { statements } => {
                for statement in statements {
                    self.statement(statement)?;
                }
                Ok(())
            }
            StatementKind::Scoped { statement } => {
                self.line("{");
                self.indent += 1;
                self.statement(statement)?;
                self.indent -= 1;
                self.line("}");
                Ok(())
            }
            StatementKind::DeclareVariable {
                name, ty, initial, ..
            } => {
                let ty = ty
                    .as_ref()
                    .and_then(|t| t.resolved())
                    .cloned()
                    .unwrap_or(ExpressionType::NoType);
                let decl = self.variable_declaration(&ty, name)?;
                match initial {
                    Some(initial) => {
                        let value = self.expression(initial, 0)?;
                        self.line(&format!("{decl} = {value};"));
                    }
                    None => self.line(&format!("{decl};")),
                }
                Ok(())
            }
            StatementKind::Branch {
                branches,
                else_statement,
                ..
            } => {
                for (i, branch) in branches.iter().enumerate() {
                    let condition = self.expression(&branch.condition, 0)?;
                    let keyword = if i == 0 { "if" } else { "else if" };
                    self.line(&format!("{keyword} ({condition})"));
                    self.line("{");
                    self.indent += 1;
                    self.statement(unscoped(&branch.statement))?;
                    self.indent -= 1;
                    self.line("}");
                }
                if let Some(else_statement) = else_statement {
                    self.line("else");
                    self.line("{");
                    self.indent += 1;
                    self.statement(unscoped(else_statement))?;
                    self.indent -= 1;
                    self.line("}");
                }
                Ok(())
            }
            StatementKind::While {
                condition, body, ..
            } => {
                let condition = self.expression(condition, 0)?;
                self.line(&format!("while ({condition})"));
                self.line("{");
                self.indent += 1;
                self.statement(unscoped(body))?;
                self.indent -= 1;
                self.line("}");
                Ok(())
            }
            StatementKind::Return { expression } => {
                match expression {
                    Some(expression) => {
                        let value = self.expression(expression, 0)?;
                        self.line(&format!("return {value};"));
                    }
                    None => self.line("return;"),
                }
                Ok(())
            }
            StatementKind::Discard => {
                self.line("discard;");
                Ok(())
            }
            StatementKind::Break => {
                self.line("break;");
                Ok(())
            }
            StatementKind::Continue => {
                self.line("continue;");
                Ok(())
            }
            StatementKind::Expression { expression } => {
                let text = self.expression(expression, 0)?;
                self.line(&format!("{text};"));
                Ok(())
            }
            other => Err(WriterError::Unsupported(format!(
                "statement not representable in GLSL: {other:?}"
            ))),
        }
    }

    // ---- types ----

    fn type_syntax(&self, ty: &ExpressionType) -> Result<String, WriterError> {
        Ok(match ty {
            ExpressionType::Primitive(PrimitiveType::Boolean) => "bool".into(),
            ExpressionType::Primitive(PrimitiveType::Float32) => "float".into(),
            ExpressionType::Primitive(PrimitiveType::Int32) => "int".into(),
            ExpressionType::Primitive(PrimitiveType::UInt32) => "uint".into(),
            ExpressionType::Vector { prim, components } => {
                let prefix = match prim {
                    PrimitiveType::Float32 => "vec",
                    PrimitiveType::Int32 => "ivec",
                    PrimitiveType::UInt32 => "uvec",
                    PrimitiveType::Boolean => "bvec",
                    PrimitiveType::String => {
                        return Err(WriterError::Unsupported("string vector".into()))
                    }
                };
                format!("{prefix}{components}")
            }
            ExpressionType::Matrix { columns, rows, .. } => {
                if columns == rows {
                    format!("mat{columns}")
                } else {
                    format!("mat{columns}x{rows}")
                }
            }
            ExpressionType::Sampler { dim, .. } => match dim {
                ImageDim::Dim1D => "sampler1D".into(),
                ImageDim::Dim1DArray => "sampler1DArray".into(),
                ImageDim::Dim2D => "sampler2D".into(),
                ImageDim::Dim2DArray => "sampler2DArray".into(),
                ImageDim::Dim3D => "sampler3D".into(),
                ImageDim::Cubemap => "samplerCube".into(),
            },
            ExpressionType::Struct(index) | ExpressionType::Uniform(index) => self
                .struct_names
                .get(index)
                .cloned()
                .unwrap_or_else(|| format!("struct_{index}")),
            ExpressionType::Array { element, .. } => self.type_syntax(element)?,
            other => {
                return Err(WriterError::Unsupported(format!(
                    "type not representable in GLSL: {other}"
                )))
            }
        })
    }

    /// GLSL array declarators put the extent after the name.
    fn variable_declaration(&self, ty: &ExpressionType, name: &str) -> Result<String, WriterError> {
        match ty {
            ExpressionType::Array { element, length } => {
                let element = self.type_syntax(element)?;
                match length {
                    Some(length) => Ok(format!("{element} {name}[{length}]")),
                    None => Ok(format!("{element} {name}[]")),
                }
            }
            _ => Ok(format!("{} {name}", self.type_syntax(ty)?)),
        }
    }

    // ---- expressions ----

    fn precedence(kind: &ExpressionKind) -> u8 {
        match kind {
            ExpressionKind::Assign { .. } => 1,
            ExpressionKind::Binary { op, .. } => match op {
                nzsl_ast::BinaryOp::LogicalOr => 2,
                nzsl_ast::BinaryOp::LogicalAnd => 3,
                nzsl_ast::BinaryOp::CompEq
                | nzsl_ast::BinaryOp::CompGe
                | nzsl_ast::BinaryOp::CompGt
                | nzsl_ast::BinaryOp::CompLe
                | nzsl_ast::BinaryOp::CompLt
                | nzsl_ast::BinaryOp::CompNe => 4,
                nzsl_ast::BinaryOp::Add | nzsl_ast::BinaryOp::Subtract => 5,
                nzsl_ast::BinaryOp::Multiply
                | nzsl_ast::BinaryOp::Divide
                | nzsl_ast::BinaryOp::Modulo => 6,
            },
            ExpressionKind::Unary { .. } => 7,
            _ => 9,
        }
    }

    fn expression(&self, expr: &Expression, min_precedence: u8) -> Result<String, WriterError> {
        let precedence = Self::precedence(&expr.kind);
        let text = self.expression_inner(expr)?;
        Ok(if precedence < min_precedence {
            format!("({text})")
        } else {
            text
        })
    }

    fn expression_inner(&self, expr: &Expression) -> Result<String, WriterError> {
        Ok(match &expr.kind {
            ExpressionKind::ConstantValue { value } => self.constant(value)?,
            ExpressionKind::VariableValue { variable } => self
                .variable_names
                .get(variable)
                .cloned()
                .unwrap_or_else(|| format!("var_{variable}")),
            ExpressionKind::Function { function } => self
                .function_names
                .get(function)
                .cloned()
                .unwrap_or_else(|| format!("fn_{function}")),
            ExpressionKind::AccessIndex { expr: base, indices } => {
                let mut text = self.expression(base, 9)?;
                let mut base_type = base.cached_type.clone();
                for index in indices {
                    let struct_index = match &base_type {
                        Some(ExpressionType::Struct(index))
                        | Some(ExpressionType::Uniform(index)) => Some(*index),
                        _ => None,
                    };
                    let position = constant_index(index);
                    if let (Some(struct_index), Some(position)) = (struct_index, position) {
                        if let Some((member, member_type)) = self
                            .struct_members
                            .get(&struct_index)
                            .and_then(|members| members.get(position))
                        {
                            // uniform block members are addressed through the
                            // block instance, which text already names
                            text.push('.');
                            text.push_str(member);
                            base_type = Some(member_type.clone());
                            continue;
                        }
                    }
                    let _ = write!(text, "[{}]", self.expression(index, 0)?);
                    base_type = match base_type {
                        Some(ExpressionType::Array { element, .. }) => Some(*element),
                        Some(ExpressionType::Matrix { prim, rows, .. }) => {
                            Some(ExpressionType::Vector {
                                prim,
                                components: rows,
                            })
                        }
                        Some(ExpressionType::Vector { prim, .. }) => {
                            Some(ExpressionType::Primitive(prim))
                        }
                        _ => None,
                    };
                }
                text
            }
            ExpressionKind::AccessIdentifier { expr: base, identifiers } => {
                let mut text = self.expression(base, 9)?;
                for entry in identifiers {
                    text.push('.');
                    text.push_str(&entry.identifier);
                }
                text
            }
            ExpressionKind::Swizzle { expr: base, pattern } => {
                format!("{}.{pattern}", self.expression(base, 9)?)
            }
            ExpressionKind::Assign { op, left, right } => {
                let token = match op {
                    nzsl_ast::AssignOp::Simple => "=",
                    nzsl_ast::AssignOp::CompoundAdd => "+=",
                    nzsl_ast::AssignOp::CompoundSubtract => "-=",
                    nzsl_ast::AssignOp::CompoundMultiply => "*=",
                    nzsl_ast::AssignOp::CompoundDivide => "/=",
                    nzsl_ast::AssignOp::CompoundLogicalAnd | nzsl_ast::AssignOp::CompoundLogicalOr => {
                        return Err(WriterError::Unsupported(
                            "logical compound assignment in GLSL".into(),
                        ))
                    }
                };
                format!(
                    "{} {token} {}",
                    self.expression(left, 2)?,
                    self.expression(right, 1)?
                )
            }
            ExpressionKind::Binary { op, left, right } => {
                let precedence = Self::precedence(&expr.kind);
                format!(
                    "{} {op} {}",
                    self.expression(left, precedence)?,
                    self.expression(right, precedence + 1)?
                )
            }
            ExpressionKind::Unary { op, expr: inner } => {
                let token = match op {
                    nzsl_ast::UnaryOp::LogicalNot => "!",
                    nzsl_ast::UnaryOp::Minus => "-",
                    nzsl_ast::UnaryOp::Plus => "+",
                };
                format!("{token}{}", self.expression(inner, 7)?)
            }
            ExpressionKind::CallFunction { target, parameters } => {
                let args = parameters
                    .iter()
                    .map(|p| self.expression(p, 0))
                    .collect::<Result<Vec<_>, _>>()?
                    .join(", ");
                format!("{}({args})", self.expression(target, 9)?)
            }
            ExpressionKind::Cast { target, expressions } => {
                let ty = match target {
                    ExprValue::Resolved(ty) => ty.clone(),
                    ExprValue::Expr(_) => {
                        return Err(WriterError::Unsupported("unresolved cast".into()))
                    }
                };
                let args = expressions
                    .iter()
                    .map(|e| self.expression(e, 0))
                    .collect::<Result<Vec<_>, _>>()?
                    .join(", ");
                match &ty {
                    ExpressionType::Array {
                        element,
                        length: Some(length),
                    } => {
                        format!("{}[{length}]({args})", self.type_syntax(element)?)
                    }
                    _ => format!("{}({args})", self.type_syntax(&ty)?),
                }
            }
            ExpressionKind::Intrinsic {
                intrinsic,
                parameters,
            } => {
                let name = match intrinsic {
                    IntrinsicType::CrossProduct => "cross",
                    IntrinsicType::DotProduct => "dot",
                    IntrinsicType::Exp => "exp",
                    IntrinsicType::Length => "length",
                    IntrinsicType::Max => "max",
                    IntrinsicType::Min => "min",
                    IntrinsicType::Normalize => "normalize",
                    IntrinsicType::Pow => "pow",
                    IntrinsicType::Reflect => "reflect",
                    IntrinsicType::SampleTexture => "texture",
                };
                let args = parameters
                    .iter()
                    .map(|p| self.expression(p, 0))
                    .collect::<Result<Vec<_>, _>>()?
                    .join(", ");
                format!("{name}({args})")
            }
            other => {
                return Err(WriterError::Unsupported(format!(
                    "expression not representable in GLSL: {other:?}"
                )))
            }
        })
    }

    fn constant(&self, value: &ConstantValue) -> Result<String, WriterError> {
        Ok(match value {
            ConstantValue::Bool(v) => v.to_string(),
            ConstantValue::Float32(v) => nzsl_ast::format_f32(*v),
            ConstantValue::Int32(v) => v.to_string(),
            ConstantValue::UInt32(v) => format!("{v}u"),
            ConstantValue::String(_) => {
                return Err(WriterError::Unsupported("string constant in GLSL".into()))
            }
            ConstantValue::Vec2F32(v) => format!(
                "vec2({}, {})",
                nzsl_ast::format_f32(v.x),
                nzsl_ast::format_f32(v.y)
            ),
            ConstantValue::Vec3F32(v) => format!(
                "vec3({}, {}, {})",
                nzsl_ast::format_f32(v.x),
                nzsl_ast::format_f32(v.y),
                nzsl_ast::format_f32(v.z)
            ),
            ConstantValue::Vec4F32(v) => format!(
                "vec4({}, {}, {}, {})",
                nzsl_ast::format_f32(v.x),
                nzsl_ast::format_f32(v.y),
                nzsl_ast::format_f32(v.z),
                nzsl_ast::format_f32(v.w)
            ),
            ConstantValue::Vec2I32(v) => format!("ivec2({}, {})", v.x, v.y),
            ConstantValue::Vec3I32(v) => format!("ivec3({}, {}, {})", v.x, v.y, v.z),
            ConstantValue::Vec4I32(v) => format!("ivec4({}, {}, {}, {})", v.x, v.y, v.z, v.w),
        })
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
        .chain(module.root_statements())
}

fn unscoped(statement: &Statement) -> &Statement {
    match &statement.kind {
        StatementKind::Scoped { statement } => statement,
        _ => statement,
    }
}

fn constant_index(expr: &Expression) -> Option<usize> {
    match &expr.kind {
        ExpressionKind::ConstantValue {
            value: ConstantValue::Int32(v),
        } if *v >= 0 => Some(*v as usize),
        ExpressionKind::ConstantValue {
            value: ConstantValue::UInt32(v),
        } => Some(*v as usize),
        _ => None,
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

    fn generate(source: &str) -> String {
        let module = nzsl_parser::parse(source).expect("parse failed");
        let output = GlslWriter::default()
            .generate(&module, &WriterStates::default())
            .expect("generation failed");
        match &output.files[0].content {
            OutputContent::Text(text) => text.clone(),
            OutputContent::Binary(_) => panic!("expected text output"),
        }
    }

    #[test]
    fn emits_version_and_uniform_block() {
        let glsl = generate(SHADER);
        assert!(glsl.starts_with("#version 300\n"), "output:\n{glsl}");
        assert!(glsl.contains("layout(std140) uniform _Binding_data"));
        assert!(glsl.contains("} data;"));
        assert!(glsl.contains("out vec4 _Out_color;"));
        assert!(glsl.contains("void main()"));
        // `output` is a reserved GLSL identifier, so the local gets renamed
        assert!(glsl.contains("_Out_color = output_2.color;"), "output:\n{glsl}");
    }

    #[test]
    fn scalar_swizzle_becomes_constructor() {
        let glsl = generate(SHADER);
        // (data.value).xxxx hoists its operand once and splats it through an
        // explicit vec4 constructor
        assert!(
            glsl.contains("float cachedResult = data.value;"),
            "output:\n{glsl}"
        );
        assert!(
            glsl.contains("vec4(cachedResult, cachedResult, cachedResult, cachedResult)"),
            "output:\n{glsl}"
        );
    }

    #[test]
    fn extensions_follow_version_thresholds() {
        let module = nzsl_parser::parse(SHADER).expect("parse failed");
        let writer = GlslWriter {
            env: GlslEnv {
                gl_major: 4,
                gl_minor: 0,
                gl_es: false,
                allow_extensions: true,
            },
            stage: None,
        };
        let output = writer
            .generate(&module, &WriterStates::default())
            .expect("generation failed");
        let OutputContent::Text(glsl) = &output.files[0].content else {
            panic!("expected text");
        };
        assert!(glsl.contains("#extension GL_ARB_shading_language_420pack : require"));
        assert!(glsl.contains("#extension GL_ARB_separate_shader_objects : require"));
    }

    #[test]
    fn es_profile_appends_suffix_and_precision() {
        let module = nzsl_parser::parse(SHADER).expect("parse failed");
        let writer = GlslWriter {
            env: GlslEnv {
                gl_major: 3,
                gl_minor: 0,
                gl_es: true,
                allow_extensions: false,
            },
            stage: None,
        };
        let output = writer
            .generate(&module, &WriterStates::default())
            .expect("generation failed");
        let OutputContent::Text(glsl) = &output.files[0].content else {
            panic!("expected text");
        };
        assert!(glsl.starts_with("#version 300 es\n"));
        assert!(glsl.contains("precision highp float;"));
        assert!(!glsl.contains("#extension"));
    }

    #[test]
    fn missing_entry_point_is_reported() {
        let module = nzsl_parser::parse("[nzsl_version(\"1.0\")]\nmodule;").expect("parse failed");
        let err = GlslWriter::default()
            .generate(&module, &WriterStates::default())
            .unwrap_err();
        assert!(matches!(err, WriterError::MissingEntryPoint(_)));
    }

    #[test]
    fn reserved_identifier_is_renamed() {
        let source = r#"
[nzsl_version("1.0")]
module;

[entry(frag)]
fn main()
{
    let input = 1.0;
    let x = input * 2.0;
}
"#;
        let glsl = generate(source);
        assert!(!glsl.contains("float input "), "output:\n{glsl}");
        assert!(glsl.contains("input_2") || glsl.contains("input_"), "output:\n{glsl}");
    }
}
