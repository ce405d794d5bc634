//! Archive access: reading entries of a JAR and writing the finished bundle.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Local, Timelike};
use memmap2::Mmap;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::manifest::{MANIFEST_PATH, Manifest};

pub const CLASS_SUFFIX: &str = ".class";

/// A read-only, memory-mapped archive.
pub struct Jar {
    path: PathBuf,
    names: Vec<String>,
    archive: ZipArchive<Cursor<Mmap>>,
}

impl std::fmt::Debug for Jar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jar")
            .field("path", &self.path)
            .field("entries", &self.names.len())
            .finish()
    }
}

impl Jar {
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open jar: {}", path.display()))?;
        // SAFETY: The file is opened read-only and the map is owned by the archive
        // reader, so it is released together with the Jar.
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Failed to mmap jar: {}", path.display()))?;
        let mut archive = ZipArchive::new(Cursor::new(mmap))
            .with_context(|| format!("Failed to read zip structure: {}", path.display()))?;

        let mut names = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let entry = archive
                .by_index_raw(i)
                .with_context(|| format!("Corrupt entry #{i} in {}", path.display()))?;
            names.push(entry.name().to_string());
        }

        Ok(Self {
            path: path.to_path_buf(),
            names,
            archive,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.len() == 0
    }

    /// Entry names in archive order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Class entries, sorted by name.
    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .names
            .iter()
            .filter(|n| n.ends_with(CLASS_SUFFIX))
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn read(&mut self, name: &str) -> Result<Vec<u8>> {
        let mut entry = self
            .archive
            .by_name(name)
            .with_context(|| format!("No entry {name} in {}", self.path.display()))?;
        let mut buf = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        entry
            .read_to_end(&mut buf)
            .with_context(|| format!("Failed to read {name} from {}", self.path.display()))?;
        Ok(buf)
    }

    pub fn manifest(&mut self) -> Result<Option<Manifest>> {
        if !self.contains(MANIFEST_PATH) {
            return Ok(None);
        }
        Ok(Some(Manifest::parse(&self.read(MANIFEST_PATH)?)))
    }
}

/// The in-progress bundle: original entries of a staged archive, a manifest
/// under construction and any resources added during analysis.
#[derive(Debug)]
pub struct Bundle {
    source: Jar,
    pub manifest: Manifest,
    pub last_modified: SystemTime,
    added: BTreeMap<String, Vec<u8>>,
}

impl Bundle {
    /// Copies `jar` into `work_dir` and wraps the copy with an empty manifest.
    pub fn stage(jar: &Path, work_dir: &Path) -> Result<Self> {
        let last_modified = jar
            .metadata()
            .and_then(|m| m.modified())
            .with_context(|| format!("Failed to read modification time: {}", jar.display()))?;

        std::fs::create_dir_all(work_dir)
            .with_context(|| format!("Failed to create work directory: {}", work_dir.display()))?;
        let file_name = jar.file_name().unwrap_or_else(|| OsStr::new("bundle.jar"));
        let staged = work_dir.join(file_name);
        std::fs::copy(jar, &staged).with_context(|| {
            format!(
                "Failed to stage archive: {} -> {}",
                jar.display(),
                staged.display()
            )
        })?;

        Ok(Self {
            source: Jar::open(&staged)?,
            manifest: Manifest::new(),
            last_modified,
            added: BTreeMap::new(),
        })
    }

    pub fn source(&self) -> &Jar {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut Jar {
        &mut self.source
    }

    pub fn add_resource(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.added.insert(name.into(), bytes);
    }

    pub fn added_resources(&self) -> impl Iterator<Item = &str> {
        self.added.keys().map(String::as_str)
    }

    /// Writes manifest first, then the original entries, then added resources.
    ///
    /// The archive is assembled next to `out` and renamed into place.
    pub fn write(&mut self, out: &Path) -> Result<()> {
        let parent = out
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
        {
            let mut zip = ZipWriter::new(tmp.as_file_mut());
            let stamp = zip_timestamp(self.last_modified);
            let options = FileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .last_modified_time(stamp);

            zip.add_directory("META-INF/", options)?;
            zip.start_file(MANIFEST_PATH, options)?;
            zip.write_all(&self.manifest.to_bytes())?;

            for i in 0..self.source.archive.len() {
                let entry = self.source.archive.by_index_raw(i)?;
                let name = entry.name().to_string();
                if is_manifest_entry(&name) || self.added.contains_key(&name) {
                    continue;
                }
                zip.raw_copy_file(entry)
                    .with_context(|| format!("Failed to copy entry {name}"))?;
            }

            for (name, bytes) in &self.added {
                zip.start_file(name.as_str(), options)?;
                zip.write_all(bytes)?;
            }
            zip.finish()
                .with_context(|| format!("Failed to finish archive: {}", out.display()))?;
        }

        tmp.persist(out)
            .with_context(|| format!("Failed to write bundle: {}", out.display()))?;
        Ok(())
    }
}

fn is_manifest_entry(name: &str) -> bool {
    name.eq_ignore_ascii_case(MANIFEST_PATH) || name.eq_ignore_ascii_case("META-INF/")
}

fn zip_timestamp(time: SystemTime) -> zip::DateTime {
    let local: DateTime<Local> = time.into();
    u16::try_from(local.year())
        .ok()
        .and_then(|year| {
            zip::DateTime::from_date_and_time(
                year,
                local.month() as u8,
                local.day() as u8,
                local.hour() as u8,
                local.minute() as u8,
                local.second() as u8,
            )
            .ok()
        })
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn write_jar(path: &Path, entries: &[(&str, &[u8])]) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        let mut zip = ZipWriter::new(file);
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, content) in entries {
            zip.start_file(*name, options)?;
            zip.write_all(content)?;
        }
        zip.finish()?;
        Ok(())
    }

    #[test]
    fn open_lists_entries_and_reads_manifest() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let jar_path = dir.path().join("a.jar");
        write_jar(
            &jar_path,
            &[
                ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\r\nBundle-Name: A\r\n\r\n"),
                ("org/example/B.class", b""),
                ("org/example/A.class", b""),
                ("readme.txt", b"hi"),
            ],
        )?;

        let mut jar = Jar::open(&jar_path)?;
        assert_eq!(jar.len(), 4);
        assert_eq!(
            jar.class_names(),
            vec!["org/example/A.class", "org/example/B.class"]
        );
        assert_eq!(jar.read("readme.txt")?, b"hi");
        let manifest = jar.manifest()?.expect("manifest present");
        assert_eq!(manifest.get("Bundle-Name"), Some("A"));
        Ok(())
    }

    #[test]
    fn open_rejects_non_archive() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fake = dir.path().join("fake.jar");
        std::fs::write(&fake, "<project/>")?;
        assert!(Jar::open(&fake).is_err());
        Ok(())
    }

    #[test]
    fn staged_bundle_writes_new_manifest_and_keeps_entries() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let jar_path = dir.path().join("in.jar");
        write_jar(
            &jar_path,
            &[
                ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\r\nOld: yes\r\n\r\n"),
                ("org/example/A.class", b"bytes"),
            ],
        )?;

        let mut bundle = Bundle::stage(&jar_path, &dir.path().join("work"))?;
        assert!(bundle.manifest.is_empty());
        bundle.manifest.set("Bundle-SymbolicName", "example");
        bundle.add_resource("OSGI-OPT/src/org/example/A.java", b"class A {}".to_vec());

        let out = dir.path().join("out").join("bundle.jar");
        bundle.write(&out)?;

        let mut written = Jar::open(&out)?;
        let names = written.names().to_vec();
        assert_eq!(names[0], "META-INF/");
        assert_eq!(names[1], "META-INF/MANIFEST.MF");
        assert!(names.contains(&"org/example/A.class".to_string()));
        assert!(names.contains(&"OSGI-OPT/src/org/example/A.java".to_string()));
        assert_eq!(written.read("org/example/A.class")?, b"bytes");

        let manifest = written.manifest()?.expect("manifest present");
        assert_eq!(manifest.get("Bundle-SymbolicName"), Some("example"));
        assert_eq!(manifest.get("Old"), None);
        Ok(())
    }
}
