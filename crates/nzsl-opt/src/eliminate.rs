//! Unused-declaration elimination.
//!
//! Builds the transitive use-set seeded by the entry points kept by
//! [`DependencyConfig::used_shader_stages`], then rebuilds the module keeping
//! only declarations whose indices appear in the set, in source order.
//! Within kept functions, local variables that are never read are dropped
//! (together with their initializers), and unused external members are
//! removed individually.

use std::collections::HashSet;

use nzsl_ast::visit::{walk_expression, walk_statement, AstVisitor};
use nzsl_ast::{
    AliasIndex, ConstantIndex, Error, ExprValue, Expression, ExpressionKind, ExpressionType,
    FunctionIndex, ImportedModule, Module, ShaderStageFlags, Statement, StatementKind,
    StructIndex, VariableIndex,
};

use crate::Pass;

/// Configuration for [`eliminate_unused`].
#[derive(Clone, Copy, Debug)]
pub struct DependencyConfig {
    /// Entry points of these stages seed the use-set.
    pub used_shader_stages: ShaderStageFlags,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            used_shader_stages: ShaderStageFlags::ALL,
        }
    }
}

/// The [`Pass`] wrapper around [`eliminate_unused`].
pub struct EliminateUnused {
    config: DependencyConfig,
}

impl EliminateUnused {
    pub fn new(config: DependencyConfig) -> Self {
        Self { config }
    }
}

impl Pass for EliminateUnused {
    fn name(&self) -> &str {
        "eliminate-unused"
    }

    fn run(&self, module: &mut Module) -> Result<bool, Error> {
        let eliminated = eliminate_unused(module, &self.config);
        let changed = eliminated != *module;
        *module = eliminated;
        Ok(changed)
    }
}

#[derive(Default)]
struct UsageSet {
    functions: HashSet<FunctionIndex>,
    structs: HashSet<StructIndex>,
    variables: HashSet<VariableIndex>,
    constants: HashSet<ConstantIndex>,
    aliases: HashSet<AliasIndex>,
}

/// Removes every declaration not transitively referenced from a kept entry
/// point.
pub fn eliminate_unused(module: &Module, config: &DependencyConfig) -> Module {
    let mut declarations = Declarations::default();
    declarations.collect(&module.root);
    for imported in &module.imported_modules {
        declarations.collect(&imported.module.root);
    }

    // seed with the entry points of the requested stages
    let mut usage = UsageSet::default();
    let mut worklist: Vec<FunctionIndex> = Vec::new();
    for (index, func) in &declarations.functions {
        if let Some(ExprValue::Resolved(stage)) = &func.entry_stage {
            if config
                .used_shader_stages
                .contains(ShaderStageFlags::from(*stage))
            {
                usage.functions.insert(*index);
                worklist.push(*index);
            }
        }
    }

    // transitive closure over function bodies
    while let Some(index) = worklist.pop() {
        let Some(func) = declarations.functions.iter().find(|(i, _)| *i == index) else {
            continue;
        };
        let refs = function_references(&func.1);
        for called in refs.functions {
            if usage.functions.insert(called) {
                worklist.push(called);
            }
        }
        usage.structs.extend(refs.structs);
        usage.variables.extend(refs.variables);
        usage.constants.extend(refs.constants);
        for alias in refs.aliases {
            mark_alias(alias, &declarations, &mut usage);
        }
    }

    // structs referenced by kept structs and kept external variables
    let mut struct_worklist: Vec<StructIndex> = usage.structs.iter().copied().collect();
    while let Some(index) = struct_worklist.pop() {
        if let Some((_, description)) = declarations.structs.iter().find(|(i, _)| *i == index) {
            for member in &description.members {
                if let ExprValue::Resolved(ty) = &member.ty {
                    for nested in struct_references(ty) {
                        if usage.structs.insert(nested) {
                            struct_worklist.push(nested);
                        }
                    }
                }
            }
        }
    }

    let mut result = module.clone();
    result.root = filter_root(&module.root, &usage);
    result.imported_modules = module
        .imported_modules
        .iter()
        .map(|imported| {
            let mut inner = imported.module.clone();
            inner.root = filter_root(&imported.module.root, &usage);
            ImportedModule {
                identifier: imported.identifier.clone(),
                module: inner,
            }
        })
        .collect();
    result
}

fn mark_alias(index: AliasIndex, declarations: &Declarations, usage: &mut UsageSet) {
    if !usage.aliases.insert(index) {
        return;
    }
    if let Some((_, target)) = declarations.aliases.iter().find(|(i, _)| *i == index) {
        match &target.kind {
            ExpressionKind::StructType { struct_index } => {
                usage.structs.insert(*struct_index);
            }
            ExpressionKind::Function { function } => {
                usage.functions.insert(*function);
            }
            ExpressionKind::Constant { constant } => {
                usage.constants.insert(*constant);
            }
            ExpressionKind::AliasValue { alias } => mark_alias(*alias, declarations, usage),
            ExpressionKind::Type { ty } => {
                for nested in struct_references(ty) {
                    usage.structs.insert(nested);
                }
            }
            _ => {}
        }
    }
}

#[derive(Default)]
struct Declarations {
    functions: Vec<(FunctionIndex, nzsl_ast::FunctionDeclaration)>,
    structs: Vec<(StructIndex, nzsl_ast::StructDescription)>,
    aliases: Vec<(AliasIndex, Expression)>,
}

impl Declarations {
    fn collect(&mut self, root: &Statement) {
        for statement in root_statements(root) {
            match &statement.kind {
                StatementKind::DeclareFunction(func) => {
                    if let Some(index) = func.func_index {
                        self.functions.push((index, (**func).clone()));
                    }
                }
                StatementKind::DeclareStruct {
                    struct_index: Some(index),
                    description,
                    ..
                } => {
                    self.structs.push((*index, description.clone()));
                }
                StatementKind::DeclareAlias {
                    alias_index: Some(index),
                    expression,
                    ..
                } => {
                    self.aliases.push((*index, (**expression).clone()));
                }
                _ => {}
            }
        }
    }
}

fn root_statements(root: &Statement) -> &[Statement] {
    match &root.kind {
        StatementKind::Multi { statements } => statements,
        _ => std::slice::from_ref(root),
    }
}

/// Everything one function body (after local-variable liveness) refers to.
struct References {
    functions: HashSet<FunctionIndex>,
    structs: HashSet<StructIndex>,
    variables: HashSet<VariableIndex>,
    constants: HashSet<ConstantIndex>,
    aliases: HashSet<AliasIndex>,
}

fn function_references(func: &nzsl_ast::FunctionDeclaration) -> References {
    let live = live_local_variables(func);

    let mut collector = ReferenceCollector {
        refs: References {
            functions: HashSet::new(),
            structs: HashSet::new(),
            variables: HashSet::new(),
            constants: HashSet::new(),
            aliases: HashSet::new(),
        },
        live_locals: &live,
    };

    for param in &func.parameters {
        if let ExprValue::Resolved(ty) = &param.ty {
            collector.refs.structs.extend(struct_references(ty));
        }
    }
    if let Some(ExprValue::Resolved(ty)) = &func.return_type {
        collector.refs.structs.extend(struct_references(ty));
    }
    for statement in &func.statements {
        collector.visit_statement(statement);
    }
    collector.refs
}

/// Locals that are read somewhere in the function.
///
/// Runs to a fixpoint: dropping a dead declaration also drops the reads its
/// initializer performed, which can kill further declarations.
fn live_local_variables(func: &nzsl_ast::FunctionDeclaration) -> HashSet<VariableIndex> {
    // parameters are always live
    let params: HashSet<VariableIndex> = func
        .parameters
        .iter()
        .filter_map(|p| p.variable_index)
        .collect();

    let mut dead: HashSet<VariableIndex> = HashSet::new();
    loop {
        let reads = {
            let mut collector = ReadCollector {
                reads: HashSet::new(),
                dead: &dead,
            };
            for statement in &func.statements {
                collector.visit_statement(statement);
            }
            collector.reads
        };

        let mut changed = false;
        let mut decls = DeclCollector(Vec::new());
        for statement in &func.statements {
            decls.visit_statement(statement);
        }
        for index in decls.0 {
            if params.contains(&index) || reads.contains(&index) {
                continue;
            }
            if dead.insert(index) {
                changed = true;
            }
        }
        if !changed {
            let mut live = reads;
            live.extend(params);
            return live;
        }
    }
}

struct DeclCollector(Vec<VariableIndex>);

impl AstVisitor for DeclCollector {
    fn visit_statement(&mut self, stmt: &Statement) {
        if let StatementKind::DeclareVariable {
            variable_index: Some(index),
            ..
        } = &stmt.kind
        {
            self.0.push(*index);
        }
        walk_statement(self, stmt);
    }
}

/// Collects variable reads, skipping the initializers of dead declarations.
struct ReadCollector<'a> {
    reads: HashSet<VariableIndex>,
    dead: &'a HashSet<VariableIndex>,
}

impl AstVisitor for ReadCollector<'_> {
    fn visit_statement(&mut self, stmt: &Statement) {
        if let StatementKind::DeclareVariable {
            variable_index: Some(index),
            ..
        } = &stmt.kind
        {
            if self.dead.contains(index) {
                return;
            }
        }
        walk_statement(self, stmt);
    }

    fn visit_expression(&mut self, expr: &Expression) {
        if let ExpressionKind::VariableValue { variable } = &expr.kind {
            self.reads.insert(*variable);
        }
        walk_expression(self, expr);
    }
}

struct ReferenceCollector<'a> {
    refs: References,
    live_locals: &'a HashSet<VariableIndex>,
}

impl AstVisitor for ReferenceCollector<'_> {
    fn visit_statement(&mut self, stmt: &Statement) {
        match &stmt.kind {
            StatementKind::DeclareVariable {
                variable_index: Some(index),
                ..
            } if !self.live_locals.contains(index) => {
                // dead declaration: its initializer references nothing
            }
            StatementKind::DeclareVariable { ty, .. } => {
                if let Some(ExprValue::Resolved(ty)) = ty {
                    self.refs.structs.extend(struct_references(ty));
                }
                walk_statement(self, stmt);
            }
            _ => walk_statement(self, stmt),
        }
    }

    fn visit_expression(&mut self, expr: &Expression) {
        match &expr.kind {
            ExpressionKind::VariableValue { variable } => {
                self.refs.variables.insert(*variable);
            }
            ExpressionKind::Function { function } => {
                self.refs.functions.insert(*function);
            }
            ExpressionKind::Constant { constant } => {
                self.refs.constants.insert(*constant);
            }
            ExpressionKind::AliasValue { alias } => {
                self.refs.aliases.insert(*alias);
            }
            ExpressionKind::StructType { struct_index } => {
                self.refs.structs.insert(*struct_index);
            }
            _ => {}
        }
        if let Some(ty) = &expr.cached_type {
            self.refs.structs.extend(struct_references(ty));
        }
        walk_expression(self, expr);
    }
}

fn struct_references(ty: &ExpressionType) -> Vec<StructIndex> {
    match ty {
        ExpressionType::Struct(index) | ExpressionType::Uniform(index) => vec![*index],
        ExpressionType::Array { element, .. } => struct_references(element),
        ExpressionType::Type(inner) => struct_references(inner),
        _ => vec![],
    }
}

fn filter_root(root: &Statement, usage: &UsageSet) -> Statement {
    let statements = root_statements(root)
        .iter()
        .filter_map(|statement| filter_statement(statement, usage))
        .collect();
    Statement::new(
        StatementKind::Multi { statements },
        root.location.clone(),
    )
}

fn filter_statement(statement: &Statement, usage: &UsageSet) -> Option<Statement> {
    match &statement.kind {
        StatementKind::DeclareFunction(func) => {
            let index = func.func_index?;
            if !usage.functions.contains(&index) {
                return None;
            }
            let live = live_local_variables(func);
            let mut kept = (**func).clone();
            kept.statements = kept
                .statements
                .into_iter()
                .filter(|s| {
                    !matches!(
                        &s.kind,
                        StatementKind::DeclareVariable {
                            variable_index: Some(index),
                            ..
                        } if !live.contains(index)
                    )
                })
                .collect();
            Some(Statement::new(
                StatementKind::DeclareFunction(Box::new(kept)),
                statement.location.clone(),
            ))
        }
        StatementKind::DeclareStruct {
            struct_index: Some(index),
            ..
        } => usage
            .structs
            .contains(index)
            .then(|| statement.clone()),
        StatementKind::DeclareAlias {
            alias_index: Some(index),
            ..
        } => usage.aliases.contains(index).then(|| statement.clone()),
        StatementKind::DeclareConst {
            const_index: Some(index),
            ..
        } => usage.constants.contains(index).then(|| statement.clone()),
        StatementKind::DeclareExternal {
            binding_set,
            variables,
        } => {
            // unused external members are removed individually
            let kept: Vec<_> = variables
                .iter()
                .filter(|var| {
                    var.variable_index
                        .is_some_and(|index| usage.variables.contains(&index))
                })
                .cloned()
                .collect();
            if kept.is_empty() {
                return None;
            }
            Some(Statement::new(
                StatementKind::DeclareExternal {
                    binding_set: binding_set.clone(),
                    variables: kept,
                },
                statement.location.clone(),
            ))
        }
        _ => Some(statement.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nzsl_ast::{
        ConstantValue, FunctionDeclaration, Metadata, ShaderStage, SourceLocation,
    };

    fn loc() -> SourceLocation {
        SourceLocation::default()
    }

    fn entry_function(index: u32, statements: Vec<Statement>) -> Statement {
        Statement::new(
            StatementKind::DeclareFunction(Box::new(FunctionDeclaration {
                func_index: Some(FunctionIndex::new(index)),
                name: "main".into(),
                parameters: vec![],
                statements,
                return_type: None,
                entry_stage: Some(ExprValue::Resolved(ShaderStage::Fragment)),
                depth_write: None,
                early_fragment_tests: None,
                exported: false,
            })),
            loc(),
        )
    }

    fn helper_function(index: u32, statements: Vec<Statement>) -> Statement {
        Statement::new(
            StatementKind::DeclareFunction(Box::new(FunctionDeclaration {
                func_index: Some(FunctionIndex::new(index)),
                name: format!("helper{index}"),
                parameters: vec![],
                statements,
                return_type: None,
                entry_stage: None,
                depth_write: None,
                early_fragment_tests: None,
                exported: false,
            })),
            loc(),
        )
    }

    fn call(function: u32) -> Statement {
        Statement::new(
            StatementKind::Expression {
                expression: Box::new(Expression::new(
                    ExpressionKind::CallFunction {
                        target: Box::new(Expression::new(
                            ExpressionKind::Function {
                                function: FunctionIndex::new(function),
                            },
                            loc(),
                        )),
                        parameters: vec![],
                    },
                    loc(),
                )),
            },
            loc(),
        )
    }

    fn module_with(statements: Vec<Statement>) -> Module {
        let mut module = Module::new(Metadata::default());
        module.root = Statement::new(StatementKind::Multi { statements }, loc());
        module
    }

    fn declaration_count(module: &Module) -> usize {
        module.root_statements().len()
    }

    #[test]
    fn keeps_transitively_called_functions() {
        let module = module_with(vec![
            helper_function(0, vec![]),
            helper_function(1, vec![call(0)]),
            helper_function(2, vec![]),
            entry_function(3, vec![call(1)]),
        ]);
        let result = eliminate_unused(&module, &DependencyConfig::default());
        // helper2 is unreachable, the rest stays in source order
        assert_eq!(declaration_count(&result), 3);
        let names: Vec<_> = result
            .root_statements()
            .iter()
            .map(|s| match &s.kind {
                StatementKind::DeclareFunction(f) => f.name.clone(),
                other => panic!("unexpected statement {other:?}"),
            })
            .collect();
        assert_eq!(names, vec!["helper0", "helper1", "main"]);
    }

    #[test]
    fn drops_entry_points_of_excluded_stages() {
        let module = module_with(vec![entry_function(0, vec![])]);
        let result = eliminate_unused(
            &module,
            &DependencyConfig {
                used_shader_stages: ShaderStageFlags::VERTEX,
            },
        );
        assert_eq!(declaration_count(&result), 0);
    }

    #[test]
    fn drops_unread_local_and_its_call() {
        // let unused = helper(); — both the local and the helper disappear
        let unused_decl = Statement::new(
            StatementKind::DeclareVariable {
                variable_index: Some(VariableIndex::new(0)),
                name: "unused".into(),
                ty: None,
                initial: Some(Box::new(Expression::new(
                    ExpressionKind::CallFunction {
                        target: Box::new(Expression::new(
                            ExpressionKind::Function {
                                function: FunctionIndex::new(0),
                            },
                            loc(),
                        )),
                        parameters: vec![],
                    },
                    loc(),
                ))),
            },
            loc(),
        );
        let module = module_with(vec![
            helper_function(0, vec![]),
            entry_function(1, vec![unused_decl]),
        ]);
        let result = eliminate_unused(&module, &DependencyConfig::default());
        assert_eq!(declaration_count(&result), 1);
        match &result.root_statements()[0].kind {
            StatementKind::DeclareFunction(func) => {
                assert_eq!(func.name, "main");
                assert!(func.statements.is_empty());
            }
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn keeps_read_local() {
        let decl = Statement::new(
            StatementKind::DeclareVariable {
                variable_index: Some(VariableIndex::new(0)),
                name: "x".into(),
                ty: None,
                initial: Some(Box::new(Expression::constant(
                    ConstantValue::Float32(1.0),
                    loc(),
                ))),
            },
            loc(),
        );
        let read = Statement::new(
            StatementKind::Return {
                expression: Some(Box::new(Expression::new(
                    ExpressionKind::VariableValue {
                        variable: VariableIndex::new(0),
                    },
                    loc(),
                ))),
            },
            loc(),
        );
        let module = module_with(vec![entry_function(0, vec![decl, read])]);
        let result = eliminate_unused(&module, &DependencyConfig::default());
        match &result.root_statements()[0].kind {
            StatementKind::DeclareFunction(func) => assert_eq!(func.statements.len(), 2),
            other => panic!("unexpected statement {other:?}"),
        }
    }
}
