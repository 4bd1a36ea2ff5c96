//! Stage-flow analysis.
//!
//! During resolution every function records its direct calls and its
//! stage-restricted operations (`discard`, depth writes, per-stage builtins).
//! Once the whole module is resolved, entry-point stages propagate over the
//! call graph and each recorded operation is checked against the set of
//! stages its function is reachable from.

use std::collections::HashMap;

use nzsl_ast::{CompilerError, Error, FunctionIndex, ShaderStage, ShaderStageFlags};

use crate::{RestrictionKind, Sanitizer};

impl Sanitizer<'_> {
    pub(crate) fn resolve_stages(&self) -> Result<(), Error> {
        // propagate entry stages down the static call graph
        let mut called_from: HashMap<FunctionIndex, ShaderStageFlags> = HashMap::new();
        let mut worklist: Vec<(FunctionIndex, ShaderStageFlags)> = Vec::new();
        let mut entries: Vec<_> = self
            .functions
            .iter()
            .filter_map(|(index, data)| data.entry_stage.map(|stage| (*index, stage)))
            .collect();
        entries.sort_by_key(|(index, _)| *index);
        for (index, stage) in entries {
            worklist.push((index, ShaderStageFlags::from(stage)));
        }

        while let Some((index, flags)) = worklist.pop() {
            let merged = called_from
                .get(&index)
                .copied()
                .unwrap_or(ShaderStageFlags::EMPTY)
                | flags;
            if called_from.get(&index) == Some(&merged) {
                continue;
            }
            called_from.insert(index, merged);
            if let Some(data) = self.functions.get(&index) {
                for callee in &data.calls {
                    worklist.push((*callee, merged));
                }
            }
        }

        // check recorded restrictions in declaration order
        let mut indices: Vec<_> = self.functions.keys().copied().collect();
        indices.sort();
        for index in indices {
            let Some(flags) = called_from.get(&index) else {
                // never reached from an entry point: nothing to enforce
                continue;
            };
            let data = &self.functions[&index];
            for restriction in &data.restrictions {
                match &restriction.kind {
                    RestrictionKind::Discard => {
                        if flags.contains(ShaderStageFlags::VERTEX) {
                            return Err(CompilerError::InvalidStageDependency {
                                stage: ShaderStage::Vertex.to_string(),
                            }
                            .at(restriction.location.clone()));
                        }
                    }
                    RestrictionKind::Builtin(builtin) => {
                        let allowed = builtin.compatible_stages();
                        for stage in flags.stages() {
                            if !allowed.contains(ShaderStageFlags::from(stage)) {
                                return Err(CompilerError::BuiltinUnsupportedStage {
                                    builtin: builtin.keyword().to_owned(),
                                    stage: stage.to_string(),
                                }
                                .at(restriction.location.clone()));
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
