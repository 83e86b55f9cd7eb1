//! CORA: dependency-aware module scaffolding and compliance certification.
//!
//! CORA assembles a project from a catalog of self-contained modules and
//! then certifies the result against the rules those modules are expected
//! to follow.
//!
//! # Pipeline
//!
//! 1. **Registry** (`core::registry`): load one descriptor per module from
//!    the catalog. The registry is an immutable value built once and passed
//!    by reference.
//! 2. **Resolver** (`core::resolver`): transitive closure plus a
//!    deterministic topological order; cycles and tier violations abort.
//! 3. **Config merge** (`core::merge`): fold each module's config fragment in
//!    installation order, honouring locked keys.
//! 4. **Scaffold** (`core::scaffold`): copy modules into the target and write
//!    the lock file and merged config.
//!
//! # Certification
//!
//! Four read-only validators live under [`validators`]:
//!
//! - `structure`: module layout, manifests, declared exports and tables
//! - `portability`: hardcoded account ids, regions, hosts and credentials
//! - `schema`: queried tables/columns against a live or declared schema
//! - `api-contract`: frontend calls, gateway routes and backend handlers
//!
//! The orchestrator (`core::orchestrator`) runs them behind one adapter
//! interface, degrades failures to UNAVAILABLE, and derives a
//! BRONZE/SILVER/GOLD level.
//!
//! # Examples
//!
//! ```bash
//! cora resolve --catalog ./catalog mgmt
//! cora scaffold --catalog ./catalog --dir ./my-app mgmt
//! cora validate ./my-app --format json --min-level silver
//! ```

pub mod core;
pub mod validators;

use crate::core::{
    certification::Level,
    config::ProjectConfig,
    error::CoraError,
    logging, merge,
    orchestrator::Orchestrator,
    registry::Registry,
    render::{self, OutputFormat},
    resolver,
    scaffold::{self, ScaffoldOptions},
};

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[clap(
    name = "cora",
    version = env!("CARGO_PKG_VERSION"),
    about = "Module scaffolding and compliance certification"
)]
struct Cli {
    /// Debug-level diagnostics on stderr
    #[clap(short, long, global = true)]
    verbose: bool,
    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct CatalogArgs {
    /// Directory holding one sub-directory per module
    #[clap(long, default_value = "catalog")]
    catalog: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the modules in a catalog
    #[clap(name = "modules", visible_alias = "ls")]
    Modules {
        #[clap(flatten)]
        catalog: CatalogArgs,
        #[clap(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Print the installation order for the requested modules
    #[clap(name = "resolve", visible_alias = "r")]
    Resolve {
        #[clap(flatten)]
        catalog: CatalogArgs,
        #[clap(required = true)]
        modules: Vec<String>,
        #[clap(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Materialize the requested modules into a project directory
    #[clap(name = "scaffold", visible_alias = "s")]
    Scaffold {
        #[clap(flatten)]
        catalog: CatalogArgs,
        /// Project directory to write into
        #[clap(long, default_value = ".")]
        dir: PathBuf,
        /// Module container directory (defaults to cora.toml or `packages`)
        #[clap(long)]
        modules_dir: Option<String>,
        /// Overwrite existing files
        #[clap(long)]
        force: bool,
        /// Show what would be written without touching the filesystem
        #[clap(long)]
        dry_run: bool,
        #[clap(required = true)]
        modules: Vec<String>,
    },
    /// Run a single validator
    #[clap(name = "check", visible_alias = "c")]
    Check {
        /// structure, portability, schema or api-contract
        validator: String,
        #[clap(default_value = ".")]
        target: PathBuf,
        #[clap(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Run all validators and derive a certification level
    #[clap(name = "validate", visible_alias = "v")]
    Validate(ValidateCli),
}

#[derive(clap::Args, Debug)]
struct ValidateCli {
    #[clap(default_value = ".")]
    target: PathBuf,
    /// Comma-separated subset of validators (default: all)
    #[clap(long, value_delimiter = ',')]
    validators: Vec<String>,
    #[clap(long, value_enum, default_value = "text")]
    format: OutputFormat,
    /// Lowest acceptable level (defaults to cora.toml, then bronze)
    #[clap(long, value_enum)]
    min_level: Option<Level>,
    /// Overall deadline for the run
    #[clap(long)]
    timeout_secs: Option<u64>,
    /// Run validators one at a time
    #[clap(long)]
    sequential: bool,
    /// Omit the run id so repeated runs print identical output
    #[clap(long)]
    deterministic: bool,
}

pub fn run() -> Result<(), CoraError> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Command::Modules { catalog, format } => run_modules(&catalog.catalog, format),
        Command::Resolve {
            catalog,
            modules,
            format,
        } => run_resolve(&catalog.catalog, &modules, format),
        Command::Scaffold {
            catalog,
            dir,
            modules_dir,
            force,
            dry_run,
            modules,
        } => run_scaffold(&catalog.catalog, dir, modules_dir, force, dry_run, &modules),
        Command::Check {
            validator,
            target,
            format,
        } => run_check(&validator, &target, format),
        Command::Validate(args) => run_validate(args),
    }
}

fn run_modules(catalog: &Path, format: OutputFormat) -> Result<(), CoraError> {
    let registry = Registry::load_all(catalog)?;
    if format == OutputFormat::Json {
        let modules: Vec<_> = registry.iter().collect();
        println!("{}", serde_json::to_string_pretty(&modules)?);
        return Ok(());
    }

    for m in registry.iter() {
        let deps = if m.dependencies.is_empty() {
            "-".to_string()
        } else {
            m.dependencies.iter().cloned().collect::<Vec<_>>().join(", ")
        };
        match format {
            OutputFormat::Markdown => {
                println!("| {} | {} | {} | {} |", m.name, m.tier, m.version, deps)
            }
            _ => println!(
                "  {} {} tier={} deps={}",
                m.name.bright_white().bold(),
                m.version.dimmed(),
                m.tier,
                deps
            ),
        }
    }
    if format == OutputFormat::Text {
        println!("{} module(s) in {}", registry.len(), catalog.display());
    }
    Ok(())
}

fn run_resolve(catalog: &Path, modules: &[String], format: OutputFormat) -> Result<(), CoraError> {
    let registry = Registry::load_all(catalog)?;
    let resolved = resolver::resolve(modules, &registry)?;

    if format == OutputFormat::Json {
        let body = serde_json::json!({
            "fingerprint": resolved.fingerprint(),
            "modules": resolved.entries(),
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    for (i, entry) in resolved.entries().iter().enumerate() {
        let marker = if entry.requested { "●" } else { "○" };
        println!(
            "  {:>2}. {} {} (tier {}, {})",
            i + 1,
            marker.bright_green(),
            entry.name,
            entry.tier,
            entry.version
        );
    }
    println!("fingerprint {}", resolved.fingerprint().dimmed());
    Ok(())
}

fn run_scaffold(
    catalog: &Path,
    dir: PathBuf,
    modules_dir: Option<String>,
    force: bool,
    dry_run: bool,
    modules: &[String],
) -> Result<(), CoraError> {
    let registry = Registry::load_all(catalog)?;
    let resolved = resolver::resolve(modules, &registry)?;
    let merged = merge::merge(&resolved, &registry.config_fragments())?;

    let project = ProjectConfig::load(&dir)?;
    let opts = ScaffoldOptions {
        target_dir: dir,
        modules_dir: modules_dir.unwrap_or(project.structure.modules_dir),
        force,
        dry_run,
    };
    let summary = scaffold::scaffold_project(&opts, &resolved, &merged)?;

    println!(
        "{} {} file(s) {}, {} skipped, fingerprint {}",
        "✓".bright_green(),
        summary.written.len(),
        if dry_run { "planned" } else { "written" },
        summary.skipped.len(),
        summary.fingerprint.dimmed()
    );
    Ok(())
}

fn run_check(validator: &str, target: &Path, format: OutputFormat) -> Result<(), CoraError> {
    if !validators::is_known(validator) {
        return Err(CoraError::ConfigError(format!(
            "unknown validator '{}' (available: {})",
            validator,
            validators::ALL.join(", ")
        )));
    }
    let config = ProjectConfig::load(target)?;
    let selected: BTreeSet<String> = [validator.to_string()].into_iter().collect();
    let result = Orchestrator::from_config(&config)
        .deterministic(true)
        .run_all(target, &selected)?;

    let report = result.reports.get(validator).ok_or_else(|| {
        CoraError::ValidationError(format!("validator '{}' produced no report", validator))
    })?;
    print!("{}", render::render_report(report, format)?);
    if format == OutputFormat::Json {
        println!();
    }

    if !report.is_available() {
        return Err(CoraError::unavailable(
            validator,
            report.unavailable_reason().unwrap_or("unknown"),
        ));
    }
    if report.error_count() > 0 {
        return Err(CoraError::ValidationError(format!(
            "{} reported {} error(s)",
            validator,
            report.error_count()
        )));
    }
    Ok(())
}

fn run_validate(args: ValidateCli) -> Result<(), CoraError> {
    let mut config = ProjectConfig::load(&args.target)?;
    if let Some(secs) = args.timeout_secs {
        config.validate.timeout_secs = secs;
    }
    let min_level = match args.min_level {
        Some(level) => level,
        None => config
            .validate
            .min_level
            .parse::<Level>()
            .map_err(CoraError::ConfigError)?,
    };

    let selected: BTreeSet<String> = args
        .validators
        .iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();

    let result = Orchestrator::from_config(&config)
        .parallel(config.validate.parallel && !args.sequential)
        .deterministic(args.deterministic)
        .run_all(&args.target, &selected)?;

    print!("{}", render::render_certification(&result, args.format)?);
    if args.format == OutputFormat::Json {
        println!();
    }

    if !result.meets(min_level) {
        return Err(CoraError::ValidationError(format!(
            "certification level {} is below the required {}",
            result.level, min_level
        )));
    }
    Ok(())
}
