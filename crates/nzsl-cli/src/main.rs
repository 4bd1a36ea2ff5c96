use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use miette::{Context, IntoDiagnostic};

use nzsl_ast::checksum::option_hash;
use nzsl_ast::{ConstantValue, Module, ShaderStage};
use nzsl_backend_core::{OutputContent, WriterRegistry, WriterStates};
use nzsl_backend_glsl::{GlslEnv, GlslWriter};
use nzsl_backend_lang::LangWriter;
use nzsl_backend_spirv::SpirvWriter;
use nzsl_parser::FilesystemModuleResolver;

/// nzslc — tool for validating and compiling NZSL shaders
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Input shader (.nzsl source or .nzslb pre-compiled module)
    input: Option<PathBuf>,

    /// Target writer (default: nzsl)
    #[arg(short, long, default_value = "nzsl")]
    target: String,

    /// Output path (default: stdout for text, required for binary)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Sanitize and serialize the module to .nzslb next to the input
    #[arg(short, long)]
    compile: bool,

    /// Allow partial sanitization (unresolved imports stay in place)
    #[arg(short, long)]
    partial: bool,

    /// Run constant propagation and unused-declaration elimination
    #[arg(long)]
    optimize: bool,

    /// Directory searched for imported modules (repeatable)
    #[arg(long = "module-dir")]
    module_dirs: Vec<PathBuf>,

    /// Option override, e.g. --option UseInt=true (repeatable)
    #[arg(long = "option", value_parser = parse_option_value)]
    options: Vec<(String, ConstantValue)>,

    /// Entry stage for GLSL generation: frag or vert
    #[arg(long, value_parser = parse_stage)]
    stage: Option<ShaderStage>,

    /// Target OpenGL version for GLSL generation, e.g. 3.0 or 4.5
    #[arg(long, default_value = "3.0", value_parser = parse_gl_version)]
    gl_version: (u32, u32),

    /// Generate GLSL ES instead of desktop GLSL
    #[arg(long)]
    gl_es: bool,

    /// List all available targets and exit
    #[arg(long)]
    list_targets: bool,
}

fn parse_option_value(s: &str) -> Result<(String, ConstantValue), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid option '{s}', expected name=value"))?;
    let value = if value == "true" {
        ConstantValue::Bool(true)
    } else if value == "false" {
        ConstantValue::Bool(false)
    } else if let Ok(int) = value.parse::<i32>() {
        ConstantValue::Int32(int)
    } else if let Ok(float) = value.parse::<f32>() {
        ConstantValue::Float32(float)
    } else {
        return Err(format!("invalid option value '{value}'"));
    };
    Ok((name.to_owned(), value))
}

fn parse_stage(s: &str) -> Result<ShaderStage, String> {
    match s {
        "frag" => Ok(ShaderStage::Fragment),
        "vert" => Ok(ShaderStage::Vertex),
        _ => Err(format!("invalid stage '{s}', expected frag or vert")),
    }
}

fn parse_gl_version(s: &str) -> Result<(u32, u32), String> {
    let (major, minor) = s
        .split_once('.')
        .ok_or_else(|| format!("invalid GL version '{s}', expected major.minor"))?;
    let major = major
        .parse()
        .map_err(|_| format!("invalid GL major version in '{s}'"))?;
    let minor = minor
        .parse()
        .map_err(|_| format!("invalid GL minor version in '{s}'"))?;
    Ok((major, minor))
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn build_registry(cli: &Cli) -> WriterRegistry {
    let mut registry = WriterRegistry::new();
    registry.register(Box::new(LangWriter));
    registry.register(Box::new(GlslWriter {
        env: GlslEnv {
            gl_major: cli.gl_version.0,
            gl_minor: cli.gl_version.1,
            gl_es: cli.gl_es,
            allow_extensions: true,
        },
        stage: cli.stage,
    }));
    registry.register(Box::new(SpirvWriter::default()));
    registry
}

fn run() -> miette::Result<()> {
    env_logger::try_init().ok();

    let cli = Cli::parse();

    if cli.list_targets {
        let registry = build_registry(&cli);
        for target in registry.list_targets() {
            println!("{target}");
        }
        return Ok(());
    }

    let input = cli.input.clone().ok_or_else(|| {
        miette::miette!("input file is required (use --list-targets to list writers)")
    })?;

    // 1. Load the module, from source or pre-compiled form.
    let module: Module = match input.extension().and_then(|ext| ext.to_str()) {
        Some(nzsl_parser::MODULE_EXTENSION) => {
            let source = std::fs::read_to_string(&input)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to read {}", input.display()))?;
            nzsl_parser::parse_with_file(&source, &input.display().to_string())
                .map_err(|err| miette::miette!("{err}"))
                .wrap_err("parsing failed")?
        }
        Some(nzsl_parser::COMPILED_MODULE_EXTENSION) => {
            let data = std::fs::read(&input)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to read {}", input.display()))?;
            nzsl_ast::serialize::deserialize_module(&data)
                .map_err(|err| miette::miette!("{err}"))
                .wrap_err("deserialization failed")?
        }
        _ => {
            return Err(miette::miette!(
                "{} has an unknown extension (expected .nzsl or .nzslb)",
                input.display()
            ))
        }
    };

    // 2. Set up the module resolver and option overrides.
    let mut resolver = FilesystemModuleResolver::new();
    for dir in &cli.module_dirs {
        resolver.register_directory(dir);
    }
    let resolver: Arc<dyn nzsl_ast::ModuleResolver> = Arc::new(resolver);
    let option_values: HashMap<u32, ConstantValue> = cli
        .options
        .iter()
        .map(|(name, value)| (option_hash(name), value.clone()))
        .collect();

    // 3. --compile: sanitize and emit the binary module.
    if cli.compile {
        let options = nzsl_sanitizer::Options {
            module_resolver: Some(resolver.clone()),
            option_values: option_values.clone(),
            allow_partial_sanitization: cli.partial,
            ..nzsl_sanitizer::Options::default()
        };
        let sanitized = nzsl_sanitizer::sanitize(&module, &options)
            .map_err(|err| miette::miette!("{err}"))
            .wrap_err("sanitization failed")?;
        let data = nzsl_ast::serialize::serialize_module(&sanitized);
        let output_path = cli
            .output
            .clone()
            .unwrap_or_else(|| input.with_extension(nzsl_parser::COMPILED_MODULE_EXTENSION));
        std::fs::write(&output_path, data)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to write {}", output_path.display()))?;
        log::info!("compiled module written to {}", output_path.display());
        return Ok(());
    }

    // 4. Writer dispatch.
    let registry = build_registry(&cli);
    let writer = registry.find(&cli.target).ok_or_else(|| {
        let available = registry.list_targets().join(", ");
        miette::miette!("unknown target '{}' (available: {})", cli.target, available)
    })?;

    let states = WriterStates {
        sanitized: false,
        optimize: cli.optimize,
        option_values,
        module_resolver: Some(resolver),
    };
    let output = writer
        .generate(&module, &states)
        .map_err(|err| miette::miette!("{err}"))
        .wrap_err("code generation failed")?;

    // 5. Write results.
    if let Some(base) = &cli.output {
        for file in &output.files {
            let destination = if output.files.len() > 1 {
                base.join(&file.name)
            } else {
                base.clone()
            };
            match &file.content {
                OutputContent::Text(text) => std::fs::write(&destination, text),
                OutputContent::Binary(data) => std::fs::write(&destination, data),
            }
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to write {}", destination.display()))?;
        }
    } else {
        for file in &output.files {
            match &file.content {
                OutputContent::Text(text) => print!("{text}"),
                OutputContent::Binary(_) => {
                    return Err(miette::miette!(
                        "target '{}' produces binary output but no --output path was specified",
                        cli.target
                    ))
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::try_parse_from(["nzslc", "shader.nzsl"]).unwrap();
        assert_eq!(cli.input.unwrap(), PathBuf::from("shader.nzsl"));
        assert_eq!(cli.target, "nzsl");
        assert!(cli.output.is_none());
        assert!(!cli.compile);
        assert!(!cli.partial);
        assert!(!cli.optimize);
        assert_eq!(cli.gl_version, (3, 0));
        assert!(!cli.gl_es);
    }

    #[test]
    fn cli_all_flags() {
        let cli = Cli::try_parse_from([
            "nzslc",
            "shader.nzsl",
            "--target",
            "glsl",
            "--output",
            "out.glsl",
            "--optimize",
            "--stage",
            "frag",
            "--gl-version",
            "4.5",
            "--option",
            "UseInt=true",
        ])
        .unwrap();
        assert_eq!(cli.target, "glsl");
        assert_eq!(cli.gl_version, (4, 5));
        assert_eq!(cli.stage, Some(ShaderStage::Fragment));
        assert_eq!(cli.options.len(), 1);
        assert_eq!(cli.options[0].0, "UseInt");
        assert_eq!(cli.options[0].1, ConstantValue::Bool(true));
    }

    #[test]
    fn cli_list_targets_without_input() {
        let cli = Cli::try_parse_from(["nzslc", "--list-targets"]).unwrap();
        assert!(cli.list_targets);
        assert!(cli.input.is_none());
    }

    #[test]
    fn option_value_parsing() {
        assert_eq!(
            parse_option_value("Enable=true").unwrap().1,
            ConstantValue::Bool(true)
        );
        assert_eq!(
            parse_option_value("Count=3").unwrap().1,
            ConstantValue::Int32(3)
        );
        assert_eq!(
            parse_option_value("Scale=0.5").unwrap().1,
            ConstantValue::Float32(0.5)
        );
        assert!(parse_option_value("Missing").is_err());
        assert!(parse_option_value("Bad=x y").is_err());
    }

    #[test]
    fn stage_parsing() {
        assert_eq!(parse_stage("frag").unwrap(), ShaderStage::Fragment);
        assert_eq!(parse_stage("vert").unwrap(), ShaderStage::Vertex);
        assert!(parse_stage("compute").is_err());
    }

    #[test]
    fn gl_version_parsing() {
        assert_eq!(parse_gl_version("4.5").unwrap(), (4, 5));
        assert!(parse_gl_version("45").is_err());
        assert!(parse_gl_version("a.b").is_err());
    }

    #[test]
    fn registry_has_builtin_targets() {
        let cli = Cli::try_parse_from(["nzslc", "--list-targets"]).unwrap();
        let registry = build_registry(&cli);
        assert!(registry.find("nzsl").is_some());
        assert!(registry.find("glsl").is_some());
        assert!(registry.find("spirv").is_some());
        assert!(registry.find("bogus").is_none());
    }
}
