//! Project scaffolding from a resolved module set.
//!
//! This module materializes a project from the catalog:
//! - Copies each resolved module into `<target>/<modules_dir>/<name>/`
//! - Writes `cora.lock.json` (installation order + fingerprint)
//! - Writes `cora.config.json` (merged configuration with provenance)
//!
//! Refuses to overwrite existing paths unless `force` is set; `dry_run`
//! reports what would change without touching the filesystem.

use crate::core::error::CoraError;
use crate::core::merge::MergedConfig;
use crate::core::resolver::ResolvedModuleSet;
use crate::core::walk;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

pub const LOCK_FILE: &str = "cora.lock.json";
pub const MERGED_CONFIG_FILE: &str = "cora.config.json";

/// Scaffolding operation configuration.
pub struct ScaffoldOptions {
    /// Target directory for scaffold output (usually project root)
    pub target_dir: PathBuf,
    /// Directory under the target that holds module copies
    pub modules_dir: String,
    /// Force overwrite of existing files
    pub force: bool,
    /// Preview mode - report actions without writing files
    pub dry_run: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct ScaffoldSummary {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub fingerprint: String,
}

#[derive(Serialize)]
struct LockFile<'a> {
    fingerprint: String,
    modules: Vec<crate::core::resolver::ResolvedEntry<'a>>,
}

#[derive(Serialize)]
struct MergedConfigFile<'a> {
    config: serde_json::Value,
    provenance: std::collections::BTreeMap<&'a str, &'a str>,
    locked: Vec<&'a str>,
}

fn ensure_parent(path: &Path) -> Result<(), CoraError> {
    if let Some(p) = path.parent() {
        fs::create_dir_all(p)?;
    }
    Ok(())
}

fn write_file(
    opts: &ScaffoldOptions,
    rel_path: &Path,
    content: &[u8],
    summary: &mut ScaffoldSummary,
) -> Result<(), CoraError> {
    let dest = opts.target_dir.join(rel_path);

    if dest.exists() && !opts.force {
        if opts.dry_run {
            println!(
                "  would-skip: {} (exists; pass --force to overwrite)",
                dest.display()
            );
            summary.skipped.push(dest);
            return Ok(());
        }
        return Err(CoraError::ValidationError(format!(
            "Refusing to overwrite existing path without --force: {}",
            dest.display()
        )));
    }

    if opts.dry_run {
        println!("  would-write: {}", dest.display());
        summary.written.push(dest);
        return Ok(());
    }

    ensure_parent(&dest)?;
    fs::write(&dest, content)?;
    println!("  wrote: {}", dest.display());
    summary.written.push(dest);
    Ok(())
}

/// Files of one module directory, paired with their destination under
/// `rel_dest`. Nothing is written here.
fn plan_module_tree(source_dir: &Path, rel_dest: &Path) -> Result<Vec<(PathBuf, Vec<u8>)>, CoraError> {
    let walker = WalkDir::new(source_dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| walk::SKIP_DIRS.contains(&name))
        });

    let mut planned = Vec::new();
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = walk::relative(source_dir, entry.path());
        planned.push((rel_dest.join(rel), fs::read(entry.path())?));
    }
    Ok(planned)
}

pub fn scaffold_project(
    opts: &ScaffoldOptions,
    resolved: &ResolvedModuleSet<'_>,
    merged: &MergedConfig,
) -> Result<ScaffoldSummary, CoraError> {
    println!(
        "Scaffolding {} module(s) into {}",
        resolved.len(),
        opts.target_dir.display()
    );

    let mut summary = ScaffoldSummary {
        fingerprint: resolved.fingerprint(),
        ..Default::default()
    };

    let mut planned: Vec<(PathBuf, Vec<u8>)> = Vec::new();
    for module in resolved.modules() {
        let Some(source_dir) = module.source.parent() else {
            continue;
        };
        let rel_dest = Path::new(&opts.modules_dir).join(&module.name);
        planned.extend(plan_module_tree(source_dir, &rel_dest)?);
    }

    let lock = LockFile {
        fingerprint: summary.fingerprint.clone(),
        modules: resolved.entries(),
    };
    planned.push((PathBuf::from(LOCK_FILE), serde_json::to_vec_pretty(&lock)?));

    let config_file = MergedConfigFile {
        config: merged.to_tree(),
        provenance: merged
            .entries()
            .iter()
            .map(|(k, e)| (k.as_str(), e.set_by.as_str()))
            .collect(),
        locked: merged
            .entries()
            .iter()
            .filter(|(_, e)| e.locked)
            .map(|(k, _)| k.as_str())
            .collect(),
    };
    planned.push((
        PathBuf::from(MERGED_CONFIG_FILE),
        serde_json::to_vec_pretty(&config_file)?,
    ));

    // All or nothing: refuse before the first write.
    if !opts.force && !opts.dry_run {
        if let Some((rel, _)) = planned.iter().find(|(rel, _)| opts.target_dir.join(rel).exists()) {
            return Err(CoraError::ValidationError(format!(
                "Refusing to overwrite existing path without --force: {}",
                opts.target_dir.join(rel).display()
            )));
        }
    }

    for (rel, content) in &planned {
        write_file(opts, rel, content, &mut summary)?;
    }

    info!(
        written = summary.written.len(),
        skipped = summary.skipped.len(),
        dry_run = opts.dry_run,
        "scaffold complete"
    );
    Ok(summary)
}
