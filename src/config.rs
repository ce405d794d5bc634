use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

use crate::cli::Cli;
use crate::task::BundleTask;

pub const WORK_DIR_ENV: &str = "BUNDLE_FORGE_WORK_DIR";

/// Where staging directories are created: flag, then environment, then the
/// user cache directory, then the system temp directory.
pub fn resolve_work_dir(cli: &Cli) -> PathBuf {
    if let Some(p) = cli.work_dir.clone() {
        return p;
    }

    if let Ok(p) = env::var(WORK_DIR_ENV)
        && !p.trim().is_empty()
    {
        return PathBuf::from(p);
    }

    dirs::cache_dir()
        .map(|d| d.join("bundle-forge"))
        .unwrap_or_else(|| env::temp_dir().join("bundle-forge"))
}

/// JSON form of a build task, for hosts that prefer a file over flags.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskFile {
    pub jar: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub descriptor: Option<PathBuf>,
    pub attributes: IndexMap<String, String>,
    pub classpath: Vec<PathBuf>,
    pub sourcepath: Vec<PathBuf>,
    pub base_name: Option<String>,
    pub version: Option<String>,
    pub project_dir: Option<PathBuf>,
}

pub fn load_task_file(path: &Path) -> Result<TaskFile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read task file: {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse task file: {}", path.display()))
}

/// Parses a `KEY=VALUE` command-line attribute.
pub fn parse_attribute(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

/// Combines an optional task file with flags; flags win.
pub fn build_task(file: Option<TaskFile>, flags: TaskFile, work_dir: PathBuf) -> Result<BundleTask> {
    let file = file.unwrap_or_default();
    let jar = flags
        .jar
        .or(file.jar)
        .context("No input archive given (use --jar or \"jar\" in the task file)")?;

    let base_name = flags
        .base_name
        .or(file.base_name)
        .or_else(|| {
            jar.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
        })
        .unwrap_or_default();

    let mut attributes = file.attributes;
    attributes.extend(flags.attributes);

    let mut classpath = file.classpath;
    classpath.extend(flags.classpath);
    let mut sourcepath = file.sourcepath;
    sourcepath.extend(flags.sourcepath);

    Ok(BundleTask {
        output: flags.output.or(file.output).unwrap_or_else(|| jar.clone()),
        jar,
        descriptor: flags.descriptor.or(file.descriptor),
        attributes,
        classpath,
        sourcepath,
        base_name,
        version: flags.version.or(file.version),
        project_dir: flags.project_dir.or(file.project_dir),
        work_dir,
    })
}
