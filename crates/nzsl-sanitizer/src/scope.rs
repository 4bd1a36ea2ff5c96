//! Named-scope stack.
//!
//! Each module gets its own boundary frame; lookups walk frames innermost
//! first and stop once a module boundary has been searched, so modules only
//! interact through explicit imports.

use nzsl_ast::{
    AliasIndex, CompilerError, ConstantIndex, Error, FunctionIndex, SourceLocation, StructIndex,
    VariableIndex,
};

/// What a name resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentifierKind {
    Alias(AliasIndex),
    Constant(ConstantIndex),
    Function(FunctionIndex),
    Struct(StructIndex),
    Variable(VariableIndex),
}

struct Frame {
    module_boundary: bool,
    identifiers: Vec<(String, IdentifierKind)>,
}

/// The scope stack.
pub struct ScopeStack {
    frames: Vec<Frame>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    pub fn push_scope(&mut self) {
        self.frames.push(Frame {
            module_boundary: false,
            identifiers: Vec::new(),
        });
    }

    /// Opens the global frame of a module.
    pub fn push_module_scope(&mut self) {
        self.frames.push(Frame {
            module_boundary: true,
            identifiers: Vec::new(),
        });
    }

    pub fn pop_scope(&mut self) {
        self.frames.pop();
    }

    /// Registers a name in the innermost frame; duplicate names within one
    /// frame are an error.
    pub fn register(
        &mut self,
        name: &str,
        kind: IdentifierKind,
        location: &SourceLocation,
    ) -> Result<(), Error> {
        let frame = self
            .frames
            .last_mut()
            .expect("no scope frame to register into");
        if frame.identifiers.iter().any(|(n, _)| n == name) {
            return Err(CompilerError::IdentifierAlreadyUsed {
                name: name.to_owned(),
            }
            .at(location.clone()));
        }
        frame.identifiers.push((name.to_owned(), kind));
        Ok(())
    }

    /// Finds a name, walking frames innermost-first up to and including the
    /// nearest module boundary.
    pub fn find(&self, name: &str) -> Option<IdentifierKind> {
        for frame in self.frames.iter().rev() {
            if let Some((_, kind)) = frame.identifiers.iter().rev().find(|(n, _)| n == name) {
                return Some(*kind);
            }
            if frame.module_boundary {
                break;
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_scopes_shadow() {
        let mut scopes = ScopeStack::new();
        scopes.push_module_scope();
        scopes
            .register(
                "x",
                IdentifierKind::Variable(VariableIndex::new(0)),
                &SourceLocation::default(),
            )
            .unwrap();
        scopes.push_scope();
        scopes
            .register(
                "x",
                IdentifierKind::Variable(VariableIndex::new(1)),
                &SourceLocation::default(),
            )
            .unwrap();
        assert_eq!(
            scopes.find("x"),
            Some(IdentifierKind::Variable(VariableIndex::new(1)))
        );
        scopes.pop_scope();
        assert_eq!(
            scopes.find("x"),
            Some(IdentifierKind::Variable(VariableIndex::new(0)))
        );
    }

    #[test]
    fn module_boundary_hides_outer_names() {
        let mut scopes = ScopeStack::new();
        scopes.push_module_scope();
        scopes
            .register(
                "outer",
                IdentifierKind::Variable(VariableIndex::new(0)),
                &SourceLocation::default(),
            )
            .unwrap();
        scopes.push_module_scope();
        assert_eq!(scopes.find("outer"), None);
        scopes.pop_scope();
        assert!(scopes.find("outer").is_some());
    }

    #[test]
    fn duplicate_in_same_frame_errors() {
        let mut scopes = ScopeStack::new();
        scopes.push_module_scope();
        scopes
            .register(
                "x",
                IdentifierKind::Variable(VariableIndex::new(0)),
                &SourceLocation::default(),
            )
            .unwrap();
        let err = scopes
            .register(
                "x",
                IdentifierKind::Variable(VariableIndex::new(1)),
                &SourceLocation::default(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("CIdentifierAlreadyUsed"));
    }
}
