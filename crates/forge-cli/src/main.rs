//! Forge CLI tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

/// Log filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Parser)]
#[command(name = "forge")]
#[command(about = "Resolve and validate Forge solution files", long_about = None)]
struct Cli {
    /// Directory holding versioned schemas (<dir>/<version>/solution.json)
    #[arg(long, env = "FORGE_SCHEMAS_DIR", global = true)]
    schemas: Option<PathBuf>,

    /// Variable override applied while loading, as KEY=VALUE
    #[arg(long = "var", value_name = "KEY=VALUE", global = true)]
    vars: Vec<String>,

    /// Do not expand variables from the process environment
    #[arg(long, global = true)]
    no_env: bool,

    /// Resolve independent solutions in parallel
    #[arg(long, global = true)]
    parallel: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the fully resolved solution tree
    Resolve {
        /// Solution entry file
        entry: PathBuf,
        /// Only print this solution
        #[arg(long)]
        solution: Option<String>,
    },
    /// Print one resolved value
    Get {
        /// Solution entry file
        entry: PathBuf,
        /// Qualified path, e.g. solutions[S].projects[P].configurations[C].board
        path: String,
    },
    /// List the enabled configurations of a project
    Configs {
        /// Solution entry file
        entry: PathBuf,
        /// Solution name
        solution: String,
        /// Project name
        project: String,
    },
    /// Resolve and validate against the schema directory
    Validate {
        /// Solution entry file
        #[arg(default_value = "solution.jsonc")]
        entry: PathBuf,
        /// Schema version; defaults to each solution's own `schema` key
        #[arg(long)]
        schema_version: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr, resolved output to stdout
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let engine = commands::engine(&commands::EngineArgs {
        schemas: cli.schemas.as_deref(),
        vars: &cli.vars,
        no_env: cli.no_env,
        parallel: cli.parallel,
    })?;

    match cli.command {
        Commands::Resolve { entry, solution } => {
            commands::resolve(&engine, &entry, solution.as_deref())?;
        }
        Commands::Get { entry, path } => {
            commands::get(&engine, &entry, &path)?;
        }
        Commands::Configs {
            entry,
            solution,
            project,
        } => {
            commands::configs(&engine, &entry, &solution, &project)?;
        }
        Commands::Validate {
            entry,
            schema_version,
        } => {
            commands::validate(&engine, &entry, schema_version.as_deref())?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_default_log_filter_is_info() {
        let filter = EnvFilter::new(DEFAULT_LOG_FILTER);
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::INFO));
    }

    #[test]
    fn test_cli_parses_global_flags() {
        let cli = Cli::try_parse_from([
            "forge", "--var", "A=1", "--parallel", "get", "s.jsonc", "solutions[S].k",
        ])
        .unwrap();
        assert_eq!(cli.vars, vec!["A=1"]);
        assert!(cli.parallel);
        assert!(matches!(cli.command, Commands::Get { .. }));
    }
}
