//! CLI command implementations.

use anyhow::{Context, Result, bail};
use forge_config::{ConfigError, Engine, ResolvedTree, VariableContextBuilder};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

/// Global flags that shape the engine.
pub struct EngineArgs<'a> {
    pub schemas: Option<&'a Path>,
    pub vars: &'a [String],
    pub no_env: bool,
    pub parallel: bool,
}

pub fn engine(args: &EngineArgs<'_>) -> Result<Engine> {
    let mut variables = VariableContextBuilder::new();
    if !args.no_env {
        variables = variables.with_process_env();
    }
    for var in args.vars {
        let (key, value) = parse_var(var)?;
        variables = variables.with_override(key, value);
    }

    let mut builder = Engine::builder()
        .with_variables(variables.build())
        .parallel(args.parallel);
    if let Some(dir) = args.schemas {
        builder = builder.with_schema_dir(dir);
    }
    Ok(builder.build())
}

fn parse_var(var: &str) -> Result<(&str, &str)> {
    match var.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value)),
        _ => bail!("invalid variable '{}', expected KEY=VALUE", var),
    }
}

/// Load, build and resolve; resolution errors are all printed before exiting.
fn resolve_tree(engine: &Engine, entry: &Path) -> Result<ResolvedTree> {
    debug!(entry = %entry.display(), "resolving solution");
    let document = engine
        .load(entry)
        .with_context(|| format!("failed to load {}", entry.display()))?;
    let graph = engine
        .build_graph(&document)
        .with_context(|| format!("invalid solution layout in {}", entry.display()))?;

    match engine.resolve(&graph) {
        Ok(tree) => Ok(tree),
        Err(ConfigError::Resolve(errors)) => {
            for error in &errors {
                eprintln!("error: {}", error);
            }
            eprintln!("{} resolution error(s) in {}", errors.len(), entry.display());
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

fn print_value(value: &Value) -> Result<()> {
    match value {
        Value::String(s) => println!("{}", s),
        other => println!("{}", serde_json::to_string_pretty(other)?),
    }
    Ok(())
}

pub fn resolve(engine: &Engine, entry: &Path, solution: Option<&str>) -> Result<()> {
    let tree = resolve_tree(engine, entry)?;
    match solution {
        Some(name) => {
            let value = tree
                .solution_value(name)
                .with_context(|| format!("no solution named '{}'", name))?;
            print_value(value)
        }
        None => {
            println!("{}", tree.to_json_pretty()?);
            Ok(())
        }
    }
}

pub fn get(engine: &Engine, entry: &Path, path: &str) -> Result<()> {
    let tree = resolve_tree(engine, entry)?;
    let value = tree.lookup(path)?;
    print_value(value)
}

pub fn configs(engine: &Engine, entry: &Path, solution: &str, project: &str) -> Result<()> {
    let tree = resolve_tree(engine, entry)?;
    let names = tree.list_configurations(solution, project);
    if names.is_empty() {
        println!("No configurations found for {}/{}", solution, project);
    }
    for name in names {
        println!("{}", name);
    }
    Ok(())
}

pub fn validate(engine: &Engine, entry: &Path, schema_version: Option<&str>) -> Result<()> {
    if !engine.has_schemas() {
        bail!("no schema directory configured, pass --schemas or set FORGE_SCHEMAS_DIR");
    }
    let tree = resolve_tree(engine, entry)?;
    let violations = engine.validate(&tree, schema_version)?;

    if violations.is_empty() {
        println!("Solution is valid");
        return Ok(());
    }
    for violation in &violations {
        println!("Validation error: {}", violation);
    }
    println!("{} violation(s)", violations.len());
    std::process::exit(1);
}
