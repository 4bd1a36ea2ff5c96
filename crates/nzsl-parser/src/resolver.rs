//! Filesystem-backed module resolver.
//!
//! Maps dotted module names to `.nzsl` (parsed) or `.nzslb` (deserialized)
//! files under registered directories. Resolved modules are cached by name;
//! modules can also be registered directly from source text or ASTs, which is
//! what the tests and embedded uses rely on.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use nzsl_ast::{serialize, Module, ModuleResolver, ResolveError};

/// Extension of text modules.
pub const MODULE_EXTENSION: &str = "nzsl";
/// Extension of pre-compiled binary modules.
pub const COMPILED_MODULE_EXTENSION: &str = "nzslb";

/// A [`ModuleResolver`] over registered directories and modules.
#[derive(Default)]
pub struct FilesystemModuleResolver {
    directories: Vec<PathBuf>,
    modules: Mutex<HashMap<String, Arc<Module>>>,
}

impl FilesystemModuleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a directory to search for `<name as path>.nzsl[b]` files.
    pub fn register_directory(&mut self, path: impl Into<PathBuf>) {
        self.directories.push(path.into());
    }

    /// Parses and registers a module from source text; the module must be
    /// named.
    pub fn register_module_source(&self, source: &str) -> Result<(), ResolveError> {
        let module = crate::parse(source).map_err(|err| ResolveError::Invalid {
            name: "<source>".into(),
            reason: err.to_string(),
        })?;
        self.register_module(Arc::new(module))
    }

    /// Registers an already-built module under its declared name.
    pub fn register_module(&self, module: Arc<Module>) -> Result<(), ResolveError> {
        let name = module.metadata.module_name.clone();
        if name.is_empty() {
            return Err(ResolveError::Invalid {
                name: "<anonymous>".into(),
                reason: "only named modules can be registered".into(),
            });
        }
        self.modules
            .lock()
            .expect("resolver cache poisoned")
            .insert(name, module);
        Ok(())
    }

    fn load_file(&self, name: &str, path: &Path) -> Option<Result<Module, ResolveError>> {
        let text_path = path.with_extension(MODULE_EXTENSION);
        if text_path.is_file() {
            let load = std::fs::read_to_string(&text_path)
                .map_err(|err| ResolveError::Invalid {
                    name: name.to_owned(),
                    reason: err.to_string(),
                })
                .and_then(|source| {
                    crate::parse_with_file(&source, &text_path.display().to_string()).map_err(
                        |err| ResolveError::Invalid {
                            name: name.to_owned(),
                            reason: err.to_string(),
                        },
                    )
                });
            return Some(load);
        }

        let binary_path = path.with_extension(COMPILED_MODULE_EXTENSION);
        if binary_path.is_file() {
            let load = std::fs::read(&binary_path)
                .map_err(|err| ResolveError::Invalid {
                    name: name.to_owned(),
                    reason: err.to_string(),
                })
                .and_then(|data| {
                    serialize::deserialize_module(&data).map_err(|err| ResolveError::Invalid {
                        name: name.to_owned(),
                        reason: err.to_string(),
                    })
                });
            return Some(load);
        }

        None
    }
}

impl ModuleResolver for FilesystemModuleResolver {
    fn resolve(&self, module_name: &str) -> Result<Arc<Module>, ResolveError> {
        if let Some(module) = self
            .modules
            .lock()
            .expect("resolver cache poisoned")
            .get(module_name)
        {
            log::trace!("module {module_name} resolved from cache");
            return Ok(module.clone());
        }

        let relative: PathBuf = module_name.split('.').collect();
        for directory in &self.directories {
            let candidate = directory.join(&relative);
            if let Some(result) = self.load_file(module_name, &candidate) {
                let module = Arc::new(result?);
                if module.metadata.module_name != module_name {
                    return Err(ResolveError::Invalid {
                        name: module_name.to_owned(),
                        reason: format!(
                            "file declares module {} instead",
                            module.metadata.module_name
                        ),
                    });
                }
                log::debug!("module {module_name} loaded from {}", candidate.display());
                self.modules
                    .lock()
                    .expect("resolver cache poisoned")
                    .insert(module_name.to_owned(), module.clone());
                return Ok(module);
            }
        }

        Err(ResolveError::NotFound(module_name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE_MODULE: &str = r#"
[nzsl_version("1.0")]
module Simple;

[export]
struct Data
{
    value: f32
}
"#;

    #[test]
    fn resolves_registered_source() {
        let resolver = FilesystemModuleResolver::new();
        resolver.register_module_source(SIMPLE_MODULE).unwrap();
        let module = resolver.resolve("Simple").unwrap();
        assert_eq!(module.metadata.module_name, "Simple");
    }

    #[test]
    fn unknown_module_errors() {
        let resolver = FilesystemModuleResolver::new();
        assert!(matches!(
            resolver.resolve("Missing"),
            Err(ResolveError::NotFound(name)) if name == "Missing"
        ));
    }

    #[test]
    fn rejects_anonymous_module() {
        let resolver = FilesystemModuleResolver::new();
        let err = resolver
            .register_module_source("[nzsl_version(\"1.0\")]\nmodule;")
            .unwrap_err();
        assert!(matches!(err, ResolveError::Invalid { .. }));
    }

    #[test]
    fn resolves_from_directory() {
        let dir = std::env::temp_dir().join(format!(
            "nzsl-resolver-test-{}",
            std::process::id()
        ));
        let nested = dir.join("Pkg");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            nested.join("Inner.nzsl"),
            "[nzsl_version(\"1.0\")]\nmodule Pkg.Inner;\n",
        )
        .unwrap();

        let mut resolver = FilesystemModuleResolver::new();
        resolver.register_directory(&dir);
        let module = resolver.resolve("Pkg.Inner").unwrap();
        assert_eq!(module.metadata.module_name, "Pkg.Inner");

        // second resolution hits the cache even after removal
        std::fs::remove_dir_all(&dir).unwrap();
        assert!(resolver.resolve("Pkg.Inner").is_ok());
    }
}
