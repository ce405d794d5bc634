//! One bundle build, from a pre-built archive to the finished bundle.
//!
//! The build moves through `Init → PropertiesLoaded → StubPrepared →
//! PathsResolved → Analyzed → Written → Done`. Any failure after `Init`
//! removes the output archive, so a stale or half-written bundle is never left
//! behind.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::analyzer::{Analyzer, BinaryAnalyzer};
use crate::builder::{BUNDLE_SYMBOLICNAME, BUNDLE_VERSION, BundleBuilder, Preparation};
use crate::classpath::{join_paths, resolve_classpath, resolve_sourcepath};
use crate::diagnostics::{Diagnostic, Severity, report};
use crate::error::BuildError;
use crate::jar::Bundle;
use crate::properties::{PropertySet, merge};
use crate::version::parse_maven_version;

const STAGED_PROPERTIES: &str = "bnd.bnd";

/// Inputs handed over by the host build.
#[derive(Debug, Clone, Default)]
pub struct BundleTask {
    /// Archive produced by the host build.
    pub jar: PathBuf,
    /// Final bundle location; may equal `jar`.
    pub output: PathBuf,
    pub descriptor: Option<PathBuf>,
    pub attributes: IndexMap<String, String>,
    pub classpath: Vec<PathBuf>,
    pub sourcepath: Vec<PathBuf>,
    pub base_name: String,
    pub version: Option<String>,
    pub project_dir: Option<PathBuf>,
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Built,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub jar: String,
    pub status: BuildStatus,
    pub headers: IndexMap<String, String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Init,
    PropertiesLoaded,
    StubPrepared,
    PathsResolved,
    Analyzed,
    Written,
    Done,
}

struct Progress<'a> {
    jar: &'a str,
    stage: Stage,
}

impl Progress<'_> {
    fn advance(&mut self, next: Stage) {
        log::debug!("{}: {:?} -> {:?}", self.jar, self.stage, next);
        self.stage = next;
    }
}

/// Deletes the output archive on drop unless disarmed.
struct OutputGuard<'a> {
    path: &'a Path,
    armed: bool,
}

impl OutputGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for OutputGuard<'_> {
    fn drop(&mut self) {
        if !self.armed || !self.path.exists() {
            return;
        }
        match std::fs::remove_file(self.path) {
            Ok(()) => log::debug!("removed output {}", self.path.display()),
            Err(e) => log::error!("failed to remove output {}: {e}", self.path.display()),
        }
    }
}

impl BundleTask {
    pub fn build(&self) -> Result<BuildReport, BuildError> {
        self.build_with(&mut BinaryAnalyzer)
    }

    pub fn build_with(&self, analyzer: &mut dyn Analyzer) -> Result<BuildReport, BuildError> {
        let mut guard = OutputGuard {
            path: &self.output,
            armed: true,
        };
        let result = self.run(analyzer);
        if result.is_ok() {
            guard.disarm();
        }
        result
    }

    fn jar_name(&self) -> String {
        self.output.display().to_string()
    }

    fn run(&self, analyzer: &mut dyn Analyzer) -> Result<BuildReport, BuildError> {
        let jar = self.jar_name();
        let io = |source: anyhow::Error| BuildError::Io {
            jar: jar.clone(),
            source,
        };
        let mut progress = Progress {
            jar: &jar,
            stage: Stage::Init,
        };

        std::fs::create_dir_all(&self.work_dir)
            .with_context(|| format!("Failed to create work directory: {}", self.work_dir.display()))
            .map_err(io)?;
        let staging = tempfile::Builder::new()
            .prefix("bundle-forge-")
            .tempdir_in(&self.work_dir)
            .with_context(|| format!("Failed to create staging directory in {}", self.work_dir.display()))
            .map_err(io)?;

        let staged =
            stage_properties(staging.path(), &self.attributes, self.descriptor.as_deref()).map_err(io)?;
        let properties = PropertySet::load(&staged).map_err(io)?;
        progress.advance(Stage::PropertiesLoaded);

        let mut bundle = Bundle::stage(&self.jar, &staging.path().join("jar")).map_err(io)?;
        progress.advance(Stage::StubPrepared);

        let base_dir = self.base_dir();
        let mut builder = BundleBuilder::new(properties, &base_dir, analyzer)
            .with_descriptor(self.descriptor.as_deref());
        let classpath = resolve_classpath(&self.classpath);
        let sourcepath = resolve_sourcepath(&self.sourcepath);
        log::debug!("{jar}: buildpath {}", join_paths(&classpath));
        log::debug!("{jar}: sourcepath {}", join_paths(&sourcepath));
        builder.set_paths(classpath, sourcepath);
        progress.advance(Stage::PathsResolved);

        let mut warnings = Vec::new();
        match builder.prepare() {
            Err(e) => {
                flush(&mut builder, &jar, &mut warnings);
                return Err(io(e));
            }
            Ok(Preparation::Skip) => {
                flush(&mut builder, &jar, &mut warnings);
                log::info!("{jar}: -nobundles is set, no bundle produced");
                progress.advance(Stage::Done);
                return Ok(BuildReport {
                    jar,
                    status: BuildStatus::Skipped,
                    headers: IndexMap::new(),
                    warnings,
                });
            }
            Ok(Preparation::Unsupported(message)) => {
                flush(&mut builder, &jar, &mut warnings);
                return Err(BuildError::Configuration { jar, message });
            }
            Ok(Preparation::Build) => {}
        }

        self.apply_defaults(&mut builder);

        if let Err(e) = builder.build(&mut bundle) {
            flush(&mut builder, &jar, &mut warnings);
            return Err(io(e));
        }
        progress.advance(Stage::Analyzed);

        let errors = flush(&mut builder, &jar, &mut warnings);
        if !errors.is_empty() {
            return Err(BuildError::Failed { jar, errors });
        }

        builder.write(&mut bundle, &self.output);
        progress.advance(Stage::Written);

        let errors = flush(&mut builder, &jar, &mut warnings);
        if !errors.is_empty() {
            return Err(BuildError::Failed { jar, errors });
        }
        progress.advance(Stage::Done);

        let headers = bundle
            .manifest
            .headers()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        log::info!("{jar}: bundle written");
        Ok(BuildReport {
            jar,
            status: BuildStatus::Built,
            headers,
            warnings,
        })
    }

    fn apply_defaults(&self, builder: &mut BundleBuilder<'_>) {
        if builder.is_unset(BUNDLE_SYMBOLICNAME) {
            builder.set_property(BUNDLE_SYMBOLICNAME, self.base_name.clone());
        }
        if builder.is_unset(BUNDLE_VERSION) {
            let version = parse_maven_version(self.version.as_deref());
            builder.set_property(BUNDLE_VERSION, version.to_string());
        }
    }

    fn base_dir(&self) -> PathBuf {
        self.descriptor
            .as_deref()
            .and_then(Path::parent)
            .or(self.project_dir.as_deref())
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Merges task attributes with the descriptor and writes the staged copy the
/// builder reads from: the merged set, followed by the descriptor's own text.
fn stage_properties(
    staging: &Path,
    attributes: &IndexMap<String, String>,
    descriptor: Option<&Path>,
) -> Result<PathBuf> {
    let merged = merge(attributes, descriptor)?;
    let path = staging.join(STAGED_PROPERTIES);
    let mut file = std::fs::File::create(&path)
        .with_context(|| format!("Failed to create staged properties: {}", path.display()))?;
    merged.write_to(&mut file)?;
    if let Some(d) = descriptor.filter(|d| d.is_file()) {
        let text = std::fs::read_to_string(d)
            .with_context(|| format!("Failed to read descriptor: {}", d.display()))?;
        writeln!(file)?;
        file.write_all(text.as_bytes())?;
    }
    log::debug!("staged properties at {}", path.display());
    Ok(path)
}

/// Drains and reports a checkpoint; returns its errors.
fn flush(builder: &mut BundleBuilder<'_>, jar: &str, warnings: &mut Vec<String>) -> Vec<Diagnostic> {
    let checkpoint = builder.checkpoint();
    report(jar, &checkpoint.diagnostics);
    let (errors, warns): (Vec<_>, Vec<_>) = checkpoint
        .diagnostics
        .into_iter()
        .partition(|d| d.severity == Severity::Error);
    warnings.extend(warns.into_iter().map(|d| d.message));
    errors
}
