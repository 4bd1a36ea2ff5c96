//! The sanitizer: NZSL's name-and-type resolver.
//!
//! Turns a surface AST into a canonical one: identifiers become index-based
//! references, every expression gets a cached resolved type, imported modules
//! are inlined under renamed namespaces, compile-time conditions are pruned,
//! and the configurable structural rewrites (branch splitting, loop lowering,
//! matrix-cast removal, ...) are applied.
//!
//! Given identical inputs and options the output AST is byte-identical.

mod exprs;
mod scope;
mod stages;
mod stmts;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use nzsl_ast::{
    AliasIndex, CompilerError, ConstantIndex, ConstantValue, Error, Expression, ExpressionKind,
    ExpressionType, FunctionIndex, ImportedModule, IntrinsicType, Metadata, Module,
    ModuleResolver, OptionIndex, ShaderStage, SourceLocation, Statement, StatementKind,
    StructDescription, StructIndex, VariableIndex,
};

use scope::{IdentifierKind, ScopeStack};

/// Sanitizer configuration.
#[derive(Clone, Default)]
pub struct Options {
    /// Resolver queried for `import` statements.
    pub module_resolver: Option<Arc<dyn ModuleResolver>>,
    /// Option overrides, keyed by [`nzsl_ast::checksum::option_hash`] of the
    /// option name.
    pub option_values: HashMap<u32, ConstantValue>,
    /// Leave unresolvable identifiers and imports in place instead of
    /// failing.
    pub allow_partial_sanitization: bool,
    /// Names forbidden in the output (target-language keywords).
    pub reserved_identifiers: HashSet<String>,

    pub make_variable_name_unique: bool,
    pub reduce_loops_to_while: bool,
    pub remove_aliases: bool,
    pub remove_compound_assignments: bool,
    pub remove_const_declaration: bool,
    pub remove_matrix_cast: bool,
    pub remove_option_declaration: bool,
    pub remove_scalar_swizzling: bool,
    pub split_multiple_branches: bool,
    pub use_identifier_accesses_for_structs: bool,
}

/// Sanitizes a module with default options.
pub fn sanitize_default(module: &Module) -> Result<Module, Error> {
    sanitize(module, &Options::default())
}

/// Sanitizes a module, producing a newly-owned canonical module.
pub fn sanitize(module: &Module, options: &Options) -> Result<Module, Error> {
    let mut sanitizer = Sanitizer::new(options);
    sanitizer.metadata_stack.push(module.metadata.clone());

    sanitizer.scopes.push_module_scope();

    // modules already inlined by a previous sanitization re-register their
    // declarations (sanitize is idempotent)
    for imported in &module.imported_modules {
        sanitizer.resanitize_imported(imported)?;
    }

    let root = sanitizer.sanitize_root(&module.root)?;
    sanitizer.scopes.pop_scope();

    sanitizer.resolve_stages()?;

    Ok(Module {
        metadata: module.metadata.clone(),
        imported_modules: std::mem::take(&mut sanitizer.imported),
        root,
    })
}

pub(crate) struct ConstantData {
    /// `None` for constants without a scalar/vector value (array literals).
    pub value: Option<ConstantValue>,
    pub ty: ExpressionType,
}

pub(crate) struct VariableData {
    pub ty: ExpressionType,
}

pub(crate) struct FunctionData {
    pub name: String,
    pub parameters: Vec<ExpressionType>,
    pub return_type: ExpressionType,
    pub entry_stage: Option<ShaderStage>,
    pub calls: Vec<FunctionIndex>,
    pub restrictions: Vec<StageRestriction>,
}

pub(crate) struct StructData {
    pub name: String,
    pub description: StructDescription,
}

pub(crate) struct AliasData {
    /// Resolved target expression (struct/function/constant/type reference).
    pub target: Expression,
}

/// A stage-restricted operation recorded during resolution and checked once
/// the call graph is known.
pub(crate) struct StageRestriction {
    pub kind: RestrictionKind,
    pub location: SourceLocation,
}

pub(crate) enum RestrictionKind {
    Discard,
    Builtin(nzsl_ast::BuiltinEntry),
}

pub(crate) struct FunctionContext {
    pub index: FunctionIndex,
    pub loop_depth: u32,
    pub return_type: ExpressionType,
}

pub(crate) struct Sanitizer<'o> {
    pub(crate) options: &'o Options,
    pub(crate) scopes: ScopeStack,

    pub(crate) constants: HashMap<ConstantIndex, ConstantData>,
    pub(crate) variables: HashMap<VariableIndex, VariableData>,
    pub(crate) functions: HashMap<FunctionIndex, FunctionData>,
    pub(crate) structs: HashMap<StructIndex, StructData>,
    pub(crate) aliases: HashMap<AliasIndex, AliasData>,

    next_constant: u32,
    next_variable: u32,
    next_function: u32,
    next_struct: u32,
    next_alias: u32,
    next_option: u32,

    pub(crate) imported: Vec<ImportedModule>,
    /// Module name → position in `imported`, for repeat imports.
    import_cache: HashMap<String, usize>,
    /// Inlined namespace identifier (`_Name`) → position in `imported`.
    /// Module identifiers are visible from every module scope.
    module_identifiers: HashMap<String, usize>,
    pub(crate) metadata_stack: Vec<Arc<Metadata>>,
    pub(crate) func_stack: Vec<FunctionContext>,
    entry_points: HashMap<ShaderStage, FunctionIndex>,
    /// Statements to emit before the one currently being sanitized.
    pub(crate) pending: Vec<Statement>,
    used_names: HashSet<String>,
    /// Per-set next free external binding index.
    ext_bindings: HashMap<u32, u32>,
}

impl<'o> Sanitizer<'o> {
    fn new(options: &'o Options) -> Self {
        Self {
            options,
            scopes: ScopeStack::new(),
            constants: HashMap::new(),
            variables: HashMap::new(),
            functions: HashMap::new(),
            structs: HashMap::new(),
            aliases: HashMap::new(),
            next_constant: 0,
            next_variable: 0,
            next_function: 0,
            next_struct: 0,
            next_alias: 0,
            next_option: 0,
            imported: Vec::new(),
            import_cache: HashMap::new(),
            module_identifiers: HashMap::new(),
            metadata_stack: Vec::new(),
            func_stack: Vec::new(),
            entry_points: HashMap::new(),
            pending: Vec::new(),
            used_names: HashSet::new(),
            ext_bindings: HashMap::new(),
        }
    }

    /// Next unassigned binding index in a descriptor set.
    pub(crate) fn next_auto_binding(&self, set: u32) -> u32 {
        self.ext_bindings.get(&set).copied().unwrap_or(0)
    }

    pub(crate) fn note_binding(&mut self, set: u32, binding: u32) {
        let next = self.ext_bindings.entry(set).or_insert(0);
        *next = (*next).max(binding + 1);
    }

    // ---- index allocation (reuses indices of re-sanitized declarations) ----

    pub(crate) fn alloc_constant(&mut self, existing: Option<ConstantIndex>) -> ConstantIndex {
        match existing {
            Some(index) => {
                self.next_constant = self.next_constant.max(index.get() + 1);
                index
            }
            None => {
                let index = ConstantIndex::new(self.next_constant);
                self.next_constant += 1;
                index
            }
        }
    }

    pub(crate) fn alloc_variable(&mut self, existing: Option<VariableIndex>) -> VariableIndex {
        match existing {
            Some(index) => {
                self.next_variable = self.next_variable.max(index.get() + 1);
                index
            }
            None => {
                let index = VariableIndex::new(self.next_variable);
                self.next_variable += 1;
                index
            }
        }
    }

    pub(crate) fn alloc_function(&mut self, existing: Option<FunctionIndex>) -> FunctionIndex {
        match existing {
            Some(index) => {
                self.next_function = self.next_function.max(index.get() + 1);
                index
            }
            None => {
                let index = FunctionIndex::new(self.next_function);
                self.next_function += 1;
                index
            }
        }
    }

    pub(crate) fn alloc_struct(&mut self, existing: Option<StructIndex>) -> StructIndex {
        match existing {
            Some(index) => {
                self.next_struct = self.next_struct.max(index.get() + 1);
                index
            }
            None => {
                let index = StructIndex::new(self.next_struct);
                self.next_struct += 1;
                index
            }
        }
    }

    pub(crate) fn alloc_alias(&mut self, existing: Option<AliasIndex>) -> AliasIndex {
        match existing {
            Some(index) => {
                self.next_alias = self.next_alias.max(index.get() + 1);
                index
            }
            None => {
                let index = AliasIndex::new(self.next_alias);
                self.next_alias += 1;
                index
            }
        }
    }

    pub(crate) fn alloc_option(&mut self, existing: Option<OptionIndex>) -> OptionIndex {
        match existing {
            Some(index) => {
                self.next_option = self.next_option.max(index.get() + 1);
                index
            }
            None => {
                let index = OptionIndex::new(self.next_option);
                self.next_option += 1;
                index
            }
        }
    }

    /// Picks an output name for a declaration, avoiding reserved identifiers
    /// and (when `make_variable_name_unique` is set) every name used so far.
    pub(crate) fn output_name(&mut self, base: &str) -> String {
        let reserved = |name: &str| self.options.reserved_identifiers.contains(name);
        if !self.options.make_variable_name_unique {
            if !reserved(base) {
                return base.to_owned();
            }
            let mut candidate = format!("{base}_");
            while reserved(&candidate) {
                candidate.push('_');
            }
            return candidate;
        }

        let mut candidate = base.to_owned();
        let mut counter = 1u32;
        while reserved(&candidate) || self.used_names.contains(&candidate) {
            counter += 1;
            candidate = format!("{base}_{counter}");
        }
        self.used_names.insert(candidate.clone());
        candidate
    }

    pub(crate) fn current_metadata(&self) -> &Arc<Metadata> {
        self.metadata_stack
            .last()
            .expect("metadata stack is never empty during sanitization")
    }

    /// Constant lookup callback used for compile-time evaluation.
    pub(crate) fn eval_constant_value(&self, expr: Expression) -> Result<Expression, Error> {
        let constants = &self.constants;
        let query = move |index: ConstantIndex| {
            constants.get(&index).and_then(|data| data.value.clone())
        };
        nzsl_opt::propagate_expression(expr, Some(&query))
    }

    /// Sanitizes and fully evaluates an expression; errors when no constant
    /// value comes out of it (unless partial sanitization allows deferring).
    pub(crate) fn eval_constant(
        &mut self,
        expr: &Expression,
    ) -> Result<(Expression, Option<ConstantValue>), Error> {
        let sanitized = self.sanitize_expression(expr)?;
        let folded = self.eval_constant_value(sanitized)?;
        let value = match &folded.kind {
            ExpressionKind::ConstantValue { value } => Some(value.clone()),
            _ => None,
        };
        Ok((folded, value))
    }

    pub(crate) fn eval_u32_constant(&mut self, expr: &Expression) -> Result<Option<u32>, Error> {
        let (folded, value) = self.eval_constant(expr)?;
        match value {
            Some(value) => match value.as_u32() {
                Some(v) => Ok(Some(v)),
                None => Err(CompilerError::ConstantExpressionRequired.at(folded.location)),
            },
            None => Ok(None),
        }
    }

    /// Formats a type for error messages, substituting declared names for
    /// struct indices.
    pub(crate) fn type_name(&self, ty: &ExpressionType) -> String {
        match ty {
            ExpressionType::Struct(index) => match self.structs.get(index) {
                Some(data) => data.name.clone(),
                None => ty.to_string(),
            },
            ExpressionType::Uniform(index) => match self.structs.get(index) {
                Some(data) => format!("uniform[{}]", data.name),
                None => ty.to_string(),
            },
            ExpressionType::Array { element, length } => {
                let element = self.type_name(element);
                match length {
                    Some(len) => format!("array[{element}, {len}]"),
                    None => format!("array[{element}]"),
                }
            }
            _ => ty.to_string(),
        }
    }

    // ---- imports ----

    /// Re-registers a module inlined by a previous sanitization.
    fn resanitize_imported(&mut self, imported: &ImportedModule) -> Result<(), Error> {
        self.metadata_stack
            .push(imported.module.metadata.clone());
        self.scopes.push_module_scope();
        let root = self.sanitize_root(&imported.module.root)?;
        self.scopes.pop_scope();
        self.metadata_stack.pop();

        let position = self.imported.len();
        self.imported.push(ImportedModule {
            identifier: imported.identifier.clone(),
            module: Module {
                metadata: imported.module.metadata.clone(),
                imported_modules: Vec::new(),
                root,
            },
        });
        self.import_cache.insert(
            imported.module.metadata.module_name.clone(),
            position,
        );
        // also key by the inlined identifier so re-parsed references resolve
        self.import_cache
            .insert(imported.identifier.clone(), position);
        self.module_identifiers
            .insert(imported.identifier.clone(), position);
        Ok(())
    }

    /// Looks up an inlined module namespace by identifier.
    pub(crate) fn find_module(&self, name: &str) -> Option<usize> {
        if self.scopes.find(name).is_some() {
            return None;
        }
        self.module_identifiers.get(name).copied()
    }

    /// Processes one `import` statement, returning the alias declarations
    /// that replace it.
    pub(crate) fn sanitize_import(
        &mut self,
        location: &SourceLocation,
        module_name: &str,
        imports: &[nzsl_ast::ImportSymbol],
    ) -> Result<Vec<Statement>, Error> {
        // wildcard rules are checked before any resolution
        let mut wildcard_seen = false;
        let mut seen_identifiers: Vec<&str> = Vec::new();
        for symbol in imports {
            if symbol.is_wildcard() {
                if symbol.rename.is_some() {
                    return Err(CompilerError::ImportWildcardRename.at(symbol.location.clone()));
                }
                if wildcard_seen {
                    return Err(
                        CompilerError::ImportMultipleWildcard.at(symbol.location.clone())
                    );
                }
                wildcard_seen = true;
                continue;
            }
            if seen_identifiers.contains(&symbol.identifier.as_str()) {
                return Err(CompilerError::ImportIdentifierAlreadyPresent {
                    name: symbol.identifier.clone(),
                }
                .at(symbol.location.clone()));
            }
            seen_identifiers.push(&symbol.identifier);
        }

        let Some(resolver) = self.options.module_resolver.clone() else {
            if self.options.allow_partial_sanitization {
                return Ok(vec![Statement::new(
                    StatementKind::Import {
                        module_name: module_name.to_owned(),
                        imports: imports.to_vec(),
                    },
                    location.clone(),
                )]);
            }
            return Err(CompilerError::ModuleResolverMissing.at(location.clone()));
        };

        let position = match self.import_cache.get(module_name) {
            Some(&position) => position,
            None => {
                let resolved = resolver.resolve(module_name).map_err(|err| {
                    CompilerError::ModuleNotFound {
                        module: module_name.to_owned(),
                        reason: err.to_string(),
                    }
                    .at(location.clone())
                })?;

                // an imported module may not require features its importer
                // does not enable
                let importer = self.current_metadata().clone();
                for feature in &resolved.metadata.enabled_features {
                    if !importer.enabled_features.contains(feature) {
                        return Err(CompilerError::ModuleFeatureMismatch {
                            module: module_name.to_owned(),
                            feature: feature.keyword().to_owned(),
                        }
                        .at(location.clone()));
                    }
                }

                let identifier = format!("_{}", module_name.replace('.', "_"));
                log::debug!("inlining module {module_name} as {identifier}");

                self.metadata_stack.push(resolved.metadata.clone());
                self.scopes.push_module_scope();
                let root = self.sanitize_root(&resolved.root)?;
                self.scopes.pop_scope();
                self.metadata_stack.pop();

                let position = self.imported.len();
                self.imported.push(ImportedModule {
                    identifier: identifier.clone(),
                    module: Module {
                        metadata: resolved.metadata.clone(),
                        imported_modules: Vec::new(),
                        root,
                    },
                });
                self.import_cache.insert(module_name.to_owned(), position);
                self.module_identifiers.insert(identifier, position);
                position
            }
        };

        // gather the requested exports
        let exports = self.module_exports(position);
        let mut requested: Vec<(String, Expression)> = Vec::new();
        let wildcard = imports.is_empty() || imports.iter().any(|s| s.is_wildcard());
        for symbol in imports.iter().filter(|s| !s.is_wildcard()) {
            let Some((_, target)) = exports.iter().find(|(name, _)| *name == symbol.identifier)
            else {
                return Err(CompilerError::ImportIdentifierNotFound {
                    name: symbol.identifier.clone(),
                    module: module_name.to_owned(),
                }
                .at(symbol.location.clone()));
            };
            let alias_name = symbol.rename.clone().unwrap_or_else(|| {
                symbol.identifier.clone()
            });
            requested.push((alias_name, target.clone()));
        }
        if wildcard {
            for (name, target) in &exports {
                if imports.iter().any(|s| s.identifier == *name) {
                    continue;
                }
                requested.push((name.clone(), target.clone()));
            }
        }

        // one alias declaration per imported identifier
        let mut statements = Vec::with_capacity(requested.len());
        for (name, target) in requested {
            if let Some(existing) = self.scopes.find(&name) {
                // repeat imports of the same symbol are free
                if let IdentifierKind::Alias(index) = existing {
                    if self
                        .aliases
                        .get(&index)
                        .is_some_and(|data| data.target.kind == target.kind)
                    {
                        continue;
                    }
                }
                return Err(
                    CompilerError::ImportIdentifierAlreadyPresent { name }.at(location.clone())
                );
            }

            let alias_index = self.alloc_alias(None);
            self.aliases.insert(
                alias_index,
                AliasData {
                    target: target.clone(),
                },
            );
            self.scopes
                .register(&name, IdentifierKind::Alias(alias_index), location)?;
            statements.push(Statement::new(
                StatementKind::DeclareAlias {
                    alias_index: Some(alias_index),
                    name,
                    expression: Box::new(target),
                },
                location.clone(),
            ));
        }
        Ok(statements)
    }

    /// Exported declarations of an inlined module, in declaration order.
    fn module_exports(&self, position: usize) -> Vec<(String, Expression)> {
        let module = &self.imported[position].module;
        let mut exports = Vec::new();
        for statement in module.root_statements() {
            match &statement.kind {
                StatementKind::DeclareStruct {
                    struct_index: Some(index),
                    exported: true,
                    description,
                } => {
                    exports.push((
                        description.name.clone(),
                        Expression::typed(
                            ExpressionKind::StructType {
                                struct_index: *index,
                            },
                            ExpressionType::Type(Box::new(ExpressionType::Struct(*index))),
                            SourceLocation::default(),
                        ),
                    ));
                }
                StatementKind::DeclareFunction(func) => {
                    if func.exported {
                        if let Some(index) = func.func_index {
                            exports.push((
                                func.name.clone(),
                                Expression::typed(
                                    ExpressionKind::Function { function: index },
                                    ExpressionType::Function(index),
                                    SourceLocation::default(),
                                ),
                            ));
                        }
                    }
                }
                _ => {}
            }
        }
        exports
    }

    /// Looks up a declaration of an inlined module by name (used for
    /// module-qualified accesses in re-parsed output).
    pub(crate) fn module_member(&self, position: usize, name: &str) -> Option<Expression> {
        let module = &self.imported[position].module;
        for statement in module.root_statements() {
            match &statement.kind {
                StatementKind::DeclareStruct {
                    struct_index: Some(index),
                    description,
                    ..
                } if description.name == name => {
                    return Some(Expression::typed(
                        ExpressionKind::StructType {
                            struct_index: *index,
                        },
                        ExpressionType::Type(Box::new(ExpressionType::Struct(*index))),
                        SourceLocation::default(),
                    ));
                }
                StatementKind::DeclareFunction(func) if func.name == name => {
                    let index = func.func_index?;
                    return Some(Expression::typed(
                        ExpressionKind::Function { function: index },
                        ExpressionType::Function(index),
                        SourceLocation::default(),
                    ));
                }
                StatementKind::DeclareConst {
                    const_index: Some(index),
                    name: const_name,
                    ..
                } if const_name == name => {
                    let ty = self.constants.get(index).map(|c| c.ty.clone())?;
                    return Some(Expression::typed(
                        ExpressionKind::Constant { constant: *index },
                        ty,
                        SourceLocation::default(),
                    ));
                }
                StatementKind::DeclareAlias {
                    alias_index: Some(index),
                    name: alias_name,
                    ..
                } if alias_name == name => {
                    return self.aliases.get(index).map(|data| data.target.clone());
                }
                _ => {}
            }
        }
        None
    }

    /// Registers an entry point, rejecting duplicate stages.
    pub(crate) fn register_entry_point(
        &mut self,
        stage: ShaderStage,
        index: FunctionIndex,
        location: &SourceLocation,
    ) -> Result<(), Error> {
        if let Some(existing) = self.entry_points.get(&stage) {
            if *existing != index {
                return Err(CompilerError::EntryPointAlreadyDefined {
                    stage: stage.to_string(),
                }
                .at(location.clone()));
            }
        }
        self.entry_points.insert(stage, index);
        Ok(())
    }

    /// Base intrinsics addressable by name.
    pub(crate) fn intrinsic_by_name(name: &str) -> Option<IntrinsicType> {
        IntrinsicType::NAMED
            .into_iter()
            .find(|intrinsic| intrinsic.name() == Some(name))
    }
}
