//! Package-level analysis of a bundle's class files.
//!
//! [`Analyzer`] is the seam the bundle builder drives; [`BinaryAnalyzer`] is the
//! built-in implementation. It reads every class in the bundle, works out
//! which packages the bundle contains and which it references, and turns the
//! `Export-Package` / `Import-Package` instructions into concrete clauses.

use anyhow::Result;
use ignore::WalkBuilder;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::clazz::{package_of, parse_class};
use crate::diagnostics::Reporter;
use crate::header::{Clause, Instructions};
use crate::jar::{Bundle, CLASS_SUFFIX, Jar};
use crate::properties::PropertySet;
use crate::version::Version;

pub const EXPORT_PACKAGE: &str = "Export-Package";
pub const IMPORT_PACKAGE: &str = "Import-Package";
pub const REQUIRE_CAPABILITY: &str = "Require-Capability";
pub const NOEE: &str = "-noee";

/// Everything the analyzer may consult besides the bundle itself.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisInput<'a> {
    pub properties: &'a PropertySet,
    pub classpath: &'a [PathBuf],
    pub sourcepath: &'a [PathBuf],
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageAnalysis {
    pub contained: BTreeSet<String>,
    pub exports: Vec<Clause>,
    pub imports: Vec<Clause>,
    pub capabilities: Vec<Clause>,
}

pub trait Analyzer {
    fn analyze(
        &mut self,
        bundle: &mut Bundle,
        input: &AnalysisInput<'_>,
        reporter: &mut Reporter,
    ) -> Result<PackageAnalysis>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryAnalyzer;

#[derive(Debug, Default)]
struct BundleScan {
    contained: BTreeSet<String>,
    /// package → packages its classes reference
    references: BTreeMap<String, BTreeSet<String>>,
    /// referenced package → classes referring to it
    referrers: BTreeMap<String, BTreeSet<String>>,
    max_major: Option<u16>,
}

#[derive(Debug, Default)]
struct ClasspathIndex {
    packages: BTreeSet<String>,
    exported_versions: BTreeMap<String, Version>,
}

impl Analyzer for BinaryAnalyzer {
    fn analyze(
        &mut self,
        bundle: &mut Bundle,
        input: &AnalysisInput<'_>,
        reporter: &mut Reporter,
    ) -> Result<PackageAnalysis> {
        let scan = scan_bundle(bundle.source_mut(), reporter)?;
        let index = index_classpath(input.classpath, reporter);
        log::debug!(
            "bundle contains {} package(s), classpath provides {}",
            scan.contained.len(),
            index.packages.len()
        );

        let exports = compute_exports(bundle.source_mut(), &scan, input.properties, reporter)?;
        let imports = compute_imports(&scan, &index, input.properties, reporter);

        let mut capabilities = Vec::new();
        if !input.properties.is_true(NOEE)
            && let Some(ee) = scan.max_major.and_then(execution_environment)
        {
            capabilities.push(ee);
        }

        Ok(PackageAnalysis {
            contained: scan.contained,
            exports,
            imports,
            capabilities,
        })
    }
}

fn scan_bundle(jar: &mut Jar, reporter: &mut Reporter) -> Result<BundleScan> {
    let mut scan = BundleScan::default();
    let mut default_package = false;

    for name in jar.class_names() {
        if name.starts_with("META-INF/") {
            continue;
        }
        let bytes = jar.read(&name)?;
        let info = match parse_class(&name, &bytes) {
            Ok(info) => info,
            Err(e) => {
                reporter.error(format!("{e:#}"));
                continue;
            }
        };
        if info.is_module_info() {
            continue;
        }

        scan.max_major = scan.max_major.max(Some(info.major_version));
        if info.package.is_empty() {
            default_package = true;
        } else {
            scan.contained.insert(info.package.clone());
        }

        let refs = scan.references.entry(info.package.clone()).or_default();
        for pkg in &info.referenced_packages {
            refs.insert(pkg.clone());
            scan.referrers
                .entry(pkg.clone())
                .or_default()
                .insert(info.name.clone());
        }
    }

    if default_package {
        reporter.warning("Classes found in the default package; they cannot be imported or exported");
    }
    Ok(scan)
}

fn index_classpath(classpath: &[PathBuf], reporter: &mut Reporter) -> ClasspathIndex {
    let mut index = ClasspathIndex::default();
    for entry in classpath {
        let result = if entry.is_dir() {
            index_directory(entry, &mut index);
            Ok(())
        } else {
            index_archive(entry, &mut index)
        };
        if let Err(e) = result {
            reporter.warning(format!(
                "Failed to read classpath entry {}: {e:#}",
                entry.display()
            ));
        }
    }
    index
}

fn index_directory(root: &Path, index: &mut ClasspathIndex) {
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .build();

    for entry in walker.flatten() {
        let path = entry.path();
        if !path.extension().is_some_and(|e| e == "class") {
            continue;
        }
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        let package = package_of(&rel);
        if !package.is_empty() {
            index.packages.insert(package);
        }
    }
}

fn index_archive(path: &Path, index: &mut ClasspathIndex) -> Result<()> {
    let mut jar = Jar::open(path)?;
    for name in jar.class_names() {
        let package = package_of(name.trim_end_matches(CLASS_SUFFIX));
        if !package.is_empty() && !name.starts_with("META-INF/") {
            index.packages.insert(package);
        }
    }

    let Some(manifest) = jar.manifest()? else {
        return Ok(());
    };
    if let Some(exports) = manifest.get(EXPORT_PACKAGE) {
        for clause in crate::header::parse_header(exports) {
            let version = clause
                .attr("version")
                .and_then(|v| Version::parse(v).ok())
                .unwrap_or_default();
            index.packages.insert(clause.name.clone());
            index.exported_versions.entry(clause.name).or_insert(version);
        }
    }
    Ok(())
}

fn compute_exports(
    jar: &mut Jar,
    scan: &BundleScan,
    properties: &PropertySet,
    reporter: &mut Reporter,
) -> Result<Vec<Clause>> {
    let Some(raw) = properties.get(EXPORT_PACKAGE) else {
        return Ok(Vec::new());
    };
    let instructions = Instructions::parse(raw);

    let mut exports = Vec::new();
    for package in &scan.contained {
        let Some(instruction) = instructions.selects(package) else {
            continue;
        };
        let mut clause = instruction.clone();
        clause.name = package.clone();

        match clause.attr("version").map(str::to_string) {
            Some(v) => {
                if let Err(e) = Version::parse(&v) {
                    reporter.error(format!("Export-Package {package} has an invalid version: {e:#}"));
                }
            }
            None => {
                if let Some(v) = packageinfo_version(jar, package, reporter)? {
                    clause.attrs.insert("version".to_string(), v.to_string());
                }
            }
        }

        let uses = uses_for(package, scan);
        if !uses.is_empty() {
            clause.attrs.insert("uses:".to_string(), uses.join(","));
        }
        exports.push(clause);
    }

    let unused: Vec<&str> = instructions
        .iter()
        .filter(|(ins, _)| ins.is_literal() && !ins.is_negated())
        .filter(|(ins, _)| !scan.contained.contains(ins.pattern()))
        .map(|(ins, _)| ins.pattern())
        .collect();
    if !unused.is_empty() {
        reporter.warning(format!(
            "Unused Export-Package instructions: [{}]",
            unused.join(", ")
        ));
    }
    Ok(exports)
}

fn packageinfo_version(
    jar: &mut Jar,
    package: &str,
    reporter: &mut Reporter,
) -> Result<Option<Version>> {
    let path = format!("{}/packageinfo", package.replace('.', "/"));
    if !jar.contains(&path) {
        return Ok(None);
    }
    let text = String::from_utf8_lossy(&jar.read(&path)?).into_owned();
    for line in text.lines() {
        if let Some(v) = line.trim().strip_prefix("version") {
            return match Version::parse(v.trim()) {
                Ok(version) => Ok(Some(version)),
                Err(e) => {
                    reporter.error(format!("Invalid version in {path}: {e:#}"));
                    Ok(None)
                }
            };
        }
    }
    Ok(None)
}

fn uses_for(package: &str, scan: &BundleScan) -> Vec<String> {
    scan.references
        .get(package)
        .map(|refs| {
            refs.iter()
                .filter(|p| !is_java_package(p) && p.as_str() != package)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

fn compute_imports(
    scan: &BundleScan,
    index: &ClasspathIndex,
    properties: &PropertySet,
    reporter: &mut Reporter,
) -> Vec<Clause> {
    let instructions = Instructions::parse(properties.get(IMPORT_PACKAGE).unwrap_or("*"));
    let referenced: BTreeSet<&String> = scan
        .referrers
        .keys()
        .filter(|p| !is_java_package(p) && !scan.contained.contains(*p))
        .collect();

    let mut imports = Vec::new();
    let mut unresolved = Vec::new();
    for package in &referenced {
        let Some(instruction) = instructions.selects(package) else {
            continue;
        };
        let mut clause = instruction.clone();
        clause.name = (*package).clone();
        if clause.attr("version").is_none()
            && let Some(v) = index.exported_versions.get(*package)
            && *v != Version::default()
        {
            clause.attrs.insert("version".to_string(), v.consumer_range());
        }
        let optional = clause.directive("resolution") == Some("optional");
        if !optional && !index.packages.contains(*package) {
            unresolved.push((*package).clone());
        }
        imports.push(clause);
    }

    for (instruction, clause) in instructions.iter() {
        if !instruction.is_literal() || instruction.is_negated() {
            continue;
        }
        let name = instruction.pattern();
        if referenced.iter().any(|p| p.as_str() == name) || scan.contained.contains(name) {
            continue;
        }
        reporter.warning(format!(
            "Importing packages that are never referred to by any class in the bundle: {name}"
        ));
        let mut clause = clause.clone();
        clause.name = name.to_string();
        imports.push(clause);
    }

    if !unresolved.is_empty() {
        let classes: BTreeSet<&String> = unresolved
            .iter()
            .filter_map(|p| scan.referrers.get(p))
            .flatten()
            .collect();
        reporter.warning(format!(
            "Unresolved references to [{}] by class(es) in the bundle: [{}]",
            unresolved.join(", "),
            classes.into_iter().cloned().collect::<Vec<_>>().join(", ")
        ));
    }
    imports
}

fn execution_environment(major: u16) -> Option<Clause> {
    let version = match major {
        0..=48 => return None,
        49..=52 => format!("1.{}", major - 44),
        _ => (major - 44).to_string(),
    };
    Some(Clause::new("osgi.ee").with_attr(
        "filter:",
        format!("(&(osgi.ee=JavaSE)(version={version}))"),
    ))
}

fn is_java_package(package: &str) -> bool {
    package == "java" || package.starts_with("java.")
}
