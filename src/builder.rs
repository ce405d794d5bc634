//! Drives an [`Analyzer`] over a staged bundle and assembles its manifest.
//!
//! The builder owns the merged properties and the diagnostics for one build.
//! Health is read at two points: after [`BundleBuilder::build`] and after
//! [`BundleBuilder::write`], since writing can raise errors of its own.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::analyzer::{
    AnalysisInput, Analyzer, EXPORT_PACKAGE, IMPORT_PACKAGE, PackageAnalysis, REQUIRE_CAPABILITY,
};
use crate::classpath::join_paths;
use crate::diagnostics::{Diagnostic, Reporter, Severity};
use crate::header::{Instructions, parse_header, print_header, wildcard_match};
use crate::jar::{Bundle, Jar};
use crate::properties::{MANIFEST_VERSION, PropertySet};
use crate::version::Version;

pub const BUNDLE_SYMBOLICNAME: &str = "Bundle-SymbolicName";
pub const BUNDLE_VERSION: &str = "Bundle-Version";
pub const BUNDLE_MANIFESTVERSION: &str = "Bundle-ManifestVersion";
pub const TOOL: &str = "Tool";

pub const NOBUNDLES: &str = "-nobundles";
pub const SUB: &str = "-sub";
pub const FIXUPMESSAGES: &str = "-fixupmessages";
pub const SOURCES: &str = "-sources";
pub const REMOVEHEADERS: &str = "-removeheaders";

pub const BUILDPATH_KEY: &str = "project.buildpath";
pub const SOURCEPATH_KEY: &str = "project.sourcepath";

/// Marks a header as deliberately empty; treated like an absent one.
pub const EMPTY_HEADER: &str = "<<EMPTY>>";

const INSTRUCTION_HEADERS: [&str; 3] = [EXPORT_PACKAGE, IMPORT_PACKAGE, MANIFEST_VERSION];

/// Outcome of the configuration checks that precede a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preparation {
    Build,
    /// `-nobundles` is set; nothing is produced.
    Skip,
    /// The descriptor declares more than one sub-bundle.
    Unsupported(String),
}

/// Diagnostics drained at one health checkpoint.
#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    pub diagnostics: Vec<Diagnostic>,
}

impl Checkpoint {
    pub fn is_ok(&self) -> bool {
        !self
            .diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }
}

pub struct BundleBuilder<'a> {
    properties: PropertySet,
    base_dir: PathBuf,
    descriptor: Option<PathBuf>,
    classpath: Vec<PathBuf>,
    sourcepath: Vec<PathBuf>,
    analyzer: &'a mut dyn Analyzer,
    reporter: Reporter,
}

impl<'a> BundleBuilder<'a> {
    /// `base_dir` anchors `-sub` patterns, normally the descriptor's directory.
    pub fn new(properties: PropertySet, base_dir: &Path, analyzer: &'a mut dyn Analyzer) -> Self {
        let reporter = Reporter::new().with_fixups(properties.get(FIXUPMESSAGES));
        Self {
            properties,
            base_dir: base_dir.to_path_buf(),
            descriptor: None,
            classpath: Vec::new(),
            sourcepath: Vec::new(),
            analyzer,
            reporter,
        }
    }

    /// The descriptor the properties came from; never counted as a sub-bundle.
    pub fn with_descriptor(mut self, descriptor: Option<&Path>) -> Self {
        self.descriptor = descriptor.map(Path::to_path_buf);
        self
    }

    pub fn properties(&self) -> &PropertySet {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key)
    }

    pub fn set_property(&mut self, key: &str, value: impl Into<String>) {
        self.properties.set(key, value);
    }

    /// True when `key` is absent, blank or the empty sentinel.
    pub fn is_unset(&self, key: &str) -> bool {
        self.property(key)
            .map(str::trim)
            .is_none_or(|v| v.is_empty() || v == EMPTY_HEADER)
    }

    /// Installs the search paths and publishes them for reporting.
    pub fn set_paths(&mut self, classpath: Vec<PathBuf>, sourcepath: Vec<PathBuf>) {
        self.properties.set(BUILDPATH_KEY, join_paths(&classpath));
        self.properties.set(SOURCEPATH_KEY, join_paths(&sourcepath));
        self.classpath = classpath;
        self.sourcepath = sourcepath;
    }

    pub fn classpath(&self) -> &[PathBuf] {
        &self.classpath
    }

    pub fn sourcepath(&self) -> &[PathBuf] {
        &self.sourcepath
    }

    /// Checks `-nobundles` and `-sub`. A single sub-bundle descriptor is
    /// layered over the current properties, and its own `-nobundles` and
    /// `-fixupmessages` take effect.
    pub fn prepare(&mut self) -> Result<Preparation> {
        if self.properties.is_true(NOBUNDLES) {
            return Ok(Preparation::Skip);
        }

        let Some(raw) = self.properties.get(SUB).map(str::to_string) else {
            return Ok(Preparation::Build);
        };
        let subs = self.sub_descriptors(&raw)?;
        match subs.as_slice() {
            [] => {
                self.reporter
                    .warning(format!("{SUB} {raw} matches no descriptor files"));
                Ok(Preparation::Build)
            }
            [single] => {
                log::debug!("layering sub-bundle descriptor {}", single.display());
                let sub = PropertySet::load(single)?;
                self.properties.overlay(&sub);
                self.reporter = std::mem::take(&mut self.reporter)
                    .with_fixups(self.properties.get(FIXUPMESSAGES));
                if self.properties.is_true(NOBUNDLES) {
                    return Ok(Preparation::Skip);
                }
                Ok(Preparation::Build)
            }
            many => Ok(Preparation::Unsupported(format!(
                "Sub-bundles are not supported; {SUB} matched {} descriptors: {}",
                many.len(),
                many.iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    fn sub_descriptors(&self, raw: &str) -> Result<Vec<PathBuf>> {
        let patterns: Vec<String> = parse_header(raw).into_iter().map(|c| c.name).collect();
        if !self.base_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut matched = Vec::new();
        for entry in std::fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if !path.is_file() || self.is_descriptor(&path) {
                continue;
            }
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if patterns.iter().any(|p| wildcard_match(p, &name)) {
                matched.push(path);
            }
        }
        matched.sort();
        Ok(matched)
    }

    fn is_descriptor(&self, path: &Path) -> bool {
        let Some(descriptor) = &self.descriptor else {
            return false;
        };
        match (descriptor.canonicalize(), path.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => descriptor == path,
        }
    }

    /// Runs the analyzer and fills the bundle's manifest.
    pub fn build(&mut self, bundle: &mut Bundle) -> Result<()> {
        log::debug!("merged properties:\n{}", self.properties.to_text());
        if bundle.source().is_empty() {
            self.reporter.warning(format!(
                "The JAR is empty: {}",
                bundle.source().path().display()
            ));
        }

        let input = AnalysisInput {
            properties: &self.properties,
            classpath: &self.classpath,
            sourcepath: &self.sourcepath,
        };
        let analysis = self.analyzer.analyze(bundle, &input, &mut self.reporter)?;

        self.fill_manifest(bundle, &analysis);
        if self.properties.is_true(SOURCES) {
            self.add_sources(bundle, &analysis)?;
        }
        Ok(())
    }

    fn fill_manifest(&mut self, bundle: &mut Bundle, analysis: &PackageAnalysis) {
        let manifest = &mut bundle.manifest;
        manifest.set(BUNDLE_MANIFESTVERSION, "2");

        for (key, value) in self.properties.iter() {
            let is_header = key.chars().next().is_some_and(|c| c.is_ascii_uppercase());
            if !is_header || INSTRUCTION_HEADERS.contains(&key) || key == REQUIRE_CAPABILITY {
                continue;
            }
            if value.contains(['\r', '\n']) {
                self.reporter.warning(format!(
                    "Header {key} contains line breaks; they were replaced by spaces"
                ));
                manifest.set(key, single_line(value));
            } else {
                manifest.set(key, value);
            }
        }

        match manifest.get(BUNDLE_SYMBOLICNAME).map(str::trim) {
            Some(bsn) if !bsn.is_empty() && bsn != EMPTY_HEADER => {}
            _ => self
                .reporter
                .error(format!("{BUNDLE_SYMBOLICNAME} is not set")),
        }
        if let Some(v) = manifest.get(BUNDLE_VERSION)
            && let Err(e) = Version::parse(v)
        {
            self.reporter
                .error(format!("{BUNDLE_VERSION} {v:?} is not a valid OSGi version: {e:#}"));
        }

        if !analysis.exports.is_empty() {
            manifest.set(EXPORT_PACKAGE, print_header(&analysis.exports));
        }
        if !analysis.imports.is_empty() {
            manifest.set(IMPORT_PACKAGE, print_header(&analysis.imports));
        }

        let mut capabilities = self
            .properties
            .get(REQUIRE_CAPABILITY)
            .map(parse_header)
            .unwrap_or_default();
        if !capabilities.iter().any(|c| c.name == "osgi.ee") {
            capabilities.extend(analysis.capabilities.iter().cloned());
        }
        if !capabilities.is_empty() {
            manifest.set(REQUIRE_CAPABILITY, print_header(&capabilities));
        }

        manifest.set(TOOL, concat!("bundle-forge ", env!("CARGO_PKG_VERSION")));

        if let Some(raw) = self.properties.get(REMOVEHEADERS) {
            let remove = Instructions::parse(raw);
            manifest.retain_headers(|k| remove.selects(k).is_none());
        }
    }

    fn add_sources(&mut self, bundle: &mut Bundle, analysis: &PackageAnalysis) -> Result<()> {
        for package in &analysis.contained {
            let rel = package.replace('.', "/");
            for root in &self.sourcepath {
                let dir = root.join(&rel);
                if !dir.is_dir() {
                    continue;
                }
                for entry in std::fs::read_dir(&dir)? {
                    let path = entry?.path();
                    if !path.is_file() {
                        continue;
                    }
                    let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().into_owned())
                    else {
                        continue;
                    };
                    let bytes = std::fs::read(&path)?;
                    bundle.add_resource(format!("OSGI-OPT/src/{rel}/{file_name}"), bytes);
                }
            }
        }
        Ok(())
    }

    /// Writes the bundle; failures become diagnostics for the next checkpoint.
    pub fn write(&mut self, bundle: &mut Bundle, out: &Path) {
        if let Err(e) = bundle.write(out) {
            self.reporter
                .error(format!("Failed to write {}: {e:#}", out.display()));
            return;
        }
        self.verify(bundle, out);
    }

    fn verify(&mut self, bundle: &Bundle, out: &Path) {
        let written = Jar::open(out).and_then(|mut jar| jar.manifest());
        match written {
            Ok(Some(manifest)) => {
                let expected = bundle.manifest.get(BUNDLE_SYMBOLICNAME);
                if manifest.get(BUNDLE_SYMBOLICNAME) != expected {
                    self.reporter.error(format!(
                        "Written manifest of {} does not carry {BUNDLE_SYMBOLICNAME} {:?}",
                        out.display(),
                        expected.unwrap_or_default()
                    ));
                }
            }
            Ok(None) => self
                .reporter
                .error(format!("Written archive {} has no manifest", out.display())),
            Err(e) => self
                .reporter
                .error(format!("Written archive {} is unreadable: {e:#}", out.display())),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.reporter.is_ok()
    }

    /// Drains diagnostics raised since the previous checkpoint.
    pub fn checkpoint(&mut self) -> Checkpoint {
        Checkpoint {
            diagnostics: self.reporter.drain(),
        }
    }
}

/// Manifest values cannot span lines; each run of line breaks becomes a space.
fn single_line(value: &str) -> String {
    value
        .split(['\r', '\n'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::BinaryAnalyzer;
    use crate::clazz::tests::class_bytes;
    use crate::jar::tests::write_jar;

    fn props(pairs: &[(&str, &str)]) -> PropertySet {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn nobundles_skips() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut analyzer = BinaryAnalyzer;
        let mut builder = BundleBuilder::new(
            props(&[(NOBUNDLES, "true")]),
            dir.path(),
            &mut analyzer,
        );
        assert_eq!(builder.prepare()?, Preparation::Skip);
        Ok(())
    }

    #[test]
    fn multiple_sub_bundles_are_unsupported() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("a.bnd"), "Bundle-Name: A\n")?;
        std::fs::write(dir.path().join("b.bnd"), "Bundle-Name: B\n")?;
        let mut analyzer = BinaryAnalyzer;
        let mut builder = BundleBuilder::new(props(&[(SUB, "*.bnd")]), dir.path(), &mut analyzer);
        assert!(matches!(builder.prepare()?, Preparation::Unsupported(_)));
        Ok(())
    }

    #[test]
    fn single_sub_bundle_is_layered() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("only.bnd"), "Bundle-Name: Only\n")?;
        std::fs::write(dir.path().join("notes.txt"), "x")?;
        let mut analyzer = BinaryAnalyzer;
        let mut builder = BundleBuilder::new(
            props(&[(SUB, "*.bnd"), ("Bundle-Name", "Main")]),
            dir.path(),
            &mut analyzer,
        );
        assert_eq!(builder.prepare()?, Preparation::Build);
        assert_eq!(builder.property("Bundle-Name"), Some("Only"));
        Ok(())
    }

    #[test]
    fn sub_glob_skips_own_descriptor() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let descriptor = dir.path().join("bnd.bnd");
        std::fs::write(&descriptor, "-sub: *.bnd\n")?;
        std::fs::write(dir.path().join("api.bnd"), "Bundle-Name: Api\n")?;
        let mut analyzer = BinaryAnalyzer;
        let mut builder = BundleBuilder::new(props(&[(SUB, "*.bnd")]), dir.path(), &mut analyzer)
            .with_descriptor(Some(&descriptor));
        assert_eq!(builder.prepare()?, Preparation::Build);
        assert_eq!(builder.property("Bundle-Name"), Some("Api"));
        Ok(())
    }

    #[test]
    fn sub_descriptor_nobundles_skips() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("only.bnd"), "-nobundles: true\n")?;
        let mut analyzer = BinaryAnalyzer;
        let mut builder = BundleBuilder::new(props(&[(SUB, "*.bnd")]), dir.path(), &mut analyzer);
        assert_eq!(builder.prepare()?, Preparation::Skip);
        Ok(())
    }

    #[test]
    fn sub_descriptor_fixups_apply() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(
            dir.path().join("only.bnd"),
            "-fixupmessages: The JAR is empty;is:=error\n",
        )?;
        let jar = dir.path().join("empty.jar");
        write_jar(&jar, &[])?;
        let mut bundle = Bundle::stage(&jar, &dir.path().join("work"))?;
        let mut analyzer = BinaryAnalyzer;
        let mut builder = BundleBuilder::new(
            props(&[(SUB, "*.bnd"), (BUNDLE_SYMBOLICNAME, "empty")]),
            dir.path(),
            &mut analyzer,
        );
        assert_eq!(builder.prepare()?, Preparation::Build);
        builder.build(&mut bundle)?;
        let checkpoint = builder.checkpoint();
        assert!(!checkpoint.is_ok(), "{:?}", checkpoint.diagnostics);
        assert!(checkpoint.diagnostics[0].message.starts_with("The JAR is empty"));
        Ok(())
    }

    #[test]
    fn header_line_breaks_become_spaces() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let jar = dir.path().join("in.jar");
        write_jar(&jar, &[("a/A.class", &class_bytes("a/A", None, &[], None, 52))])?;
        let mut bundle = Bundle::stage(&jar, &dir.path().join("work"))?;
        let mut analyzer = BinaryAnalyzer;
        let mut builder = BundleBuilder::new(
            props(&[(BUNDLE_SYMBOLICNAME, "a"), ("Bundle-Description", "first\r\nsecond\nthird")]),
            dir.path(),
            &mut analyzer,
        );
        builder.build(&mut bundle)?;
        assert_eq!(bundle.manifest.get("Bundle-Description"), Some("first second third"));
        let checkpoint = builder.checkpoint();
        assert!(checkpoint.is_ok());
        assert!(
            checkpoint
                .diagnostics
                .iter()
                .any(|d| d.message.contains("Bundle-Description contains line breaks"))
        );

        let out = dir.path().join("out.jar");
        builder.write(&mut bundle, &out);
        assert!(builder.checkpoint().is_ok());
        let written = Jar::open(&out)?.manifest()?.expect("manifest present");
        assert_eq!(written.get("Bundle-Description"), Some("first second third"));
        Ok(())
    }

    #[test]
    fn unset_detects_blank_and_sentinel() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut analyzer = BinaryAnalyzer;
        let mut builder = BundleBuilder::new(
            props(&[("A", " "), ("B", EMPTY_HEADER), ("C", "value")]),
            dir.path(),
            &mut analyzer,
        );
        assert!(builder.is_unset("A"));
        assert!(builder.is_unset("B"));
        assert!(!builder.is_unset("C"));
        assert!(builder.is_unset("D"));
        builder.set_property("D", "x");
        assert!(!builder.is_unset("D"));
        Ok(())
    }

    #[test]
    fn build_fills_manifest_and_removes_headers() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let jar = dir.path().join("in.jar");
        let main = class_bytes("com/acme/Main", Some("java/lang/Object"), &[], None, 52);
        write_jar(&jar, &[("com/acme/Main.class", &main)])?;
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("com/acme"))?;
        std::fs::write(src.join("com/acme/Main.java"), "class Main {}")?;

        let mut bundle = Bundle::stage(&jar, &dir.path().join("work"))?;
        let mut analyzer = BinaryAnalyzer;
        let mut builder = BundleBuilder::new(
            props(&[
                (BUNDLE_SYMBOLICNAME, "com.acme"),
                (BUNDLE_VERSION, "1.0.0"),
                ("Bundle-Name", "Acme"),
                ("Private-Note", "drop me"),
                (EXPORT_PACKAGE, "com.acme"),
                (REMOVEHEADERS, "Private-*"),
                (SOURCES, "true"),
                ("-internal", "never a header"),
            ]),
            dir.path(),
            &mut analyzer,
        );
        builder.set_paths(Vec::new(), vec![src.clone()]);
        builder.build(&mut bundle)?;
        let checkpoint = builder.checkpoint();
        assert!(checkpoint.is_ok(), "{:?}", checkpoint.diagnostics);

        let m = &bundle.manifest;
        assert_eq!(m.get(BUNDLE_MANIFESTVERSION), Some("2"));
        assert_eq!(m.get("Bundle-Name"), Some("Acme"));
        assert_eq!(m.get(EXPORT_PACKAGE), Some("com.acme"));
        assert_eq!(m.get("Private-Note"), None);
        assert_eq!(m.get("-internal"), None);
        assert!(m.get(REQUIRE_CAPABILITY).is_some_and(|v| v.contains("version=1.8")));
        assert!(
            bundle
                .added_resources()
                .any(|r| r == "OSGI-OPT/src/com/acme/Main.java")
        );
        assert_eq!(builder.property(SOURCEPATH_KEY), Some(src.to_string_lossy().as_ref()));
        Ok(())
    }

    #[test]
    fn invalid_version_fails_health() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let jar = dir.path().join("in.jar");
        write_jar(&jar, &[("a/A.class", &class_bytes("a/A", None, &[], None, 52))])?;
        let mut bundle = Bundle::stage(&jar, &dir.path().join("work"))?;
        let mut analyzer = BinaryAnalyzer;
        let mut builder = BundleBuilder::new(
            props(&[(BUNDLE_SYMBOLICNAME, "a"), (BUNDLE_VERSION, "one")]),
            dir.path(),
            &mut analyzer,
        );
        builder.build(&mut bundle)?;
        assert!(!builder.is_ok());
        assert!(!builder.checkpoint().is_ok());
        assert!(builder.is_ok());
        Ok(())
    }

    #[test]
    fn write_failure_is_reported_at_checkpoint() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let jar = dir.path().join("in.jar");
        write_jar(&jar, &[("a/A.class", &class_bytes("a/A", None, &[], None, 52))])?;
        let mut bundle = Bundle::stage(&jar, &dir.path().join("work"))?;
        let mut analyzer = BinaryAnalyzer;
        let mut builder =
            BundleBuilder::new(props(&[(BUNDLE_SYMBOLICNAME, "a")]), dir.path(), &mut analyzer);
        builder.build(&mut bundle)?;
        assert!(builder.checkpoint().is_ok());

        // a regular file where the output directory should be
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x")?;
        builder.write(&mut bundle, &blocker.join("out.jar"));
        let after = builder.checkpoint();
        assert!(!after.is_ok());
        assert!(after.diagnostics[0].message.contains("Failed to write"));
        Ok(())
    }
}
