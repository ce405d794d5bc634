//! JAR manifest reading and writing.
//!
//! Lines are limited to 72 bytes; longer values continue on lines that start
//! with a single space. `Manifest-Version` is always written first.

use indexmap::IndexMap;

use crate::properties::MANIFEST_VERSION;

pub const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

const MAX_LINE_BYTES: usize = 72;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    main: IndexMap<String, String>,
    sections: IndexMap<String, IndexMap<String, String>>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.main.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.main.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.main.shift_remove(name)
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.main.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn section(&self, name: &str) -> Option<&IndexMap<String, String>> {
        self.sections.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.main.is_empty() && self.sections.is_empty()
    }

    pub fn retain_headers(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.main.retain(|k, _| keep(k));
    }

    pub fn parse(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        let mut manifest = Self::new();
        let mut current: Option<IndexMap<String, String>> = None;
        let mut in_main = true;
        let mut last_key: Option<String> = None;

        for line in text.split('\n').map(|l| l.trim_end_matches('\r')) {
            if line.is_empty() {
                if let Some(section) = current.take() {
                    manifest.push_section(section);
                }
                in_main = false;
                last_key = None;
                continue;
            }

            if let Some(cont) = line.strip_prefix(' ') {
                if let Some(key) = &last_key {
                    let target = if in_main {
                        manifest.main.get_mut(key)
                    } else {
                        current.as_mut().and_then(|s| s.get_mut(key))
                    };
                    if let Some(value) = target {
                        value.push_str(cont);
                    }
                }
                continue;
            }

            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_string();
            let value = value.strip_prefix(' ').unwrap_or(value).to_string();
            if in_main {
                manifest.main.insert(key.clone(), value);
            } else {
                current.get_or_insert_with(IndexMap::new).insert(key.clone(), value);
            }
            last_key = Some(key);
        }

        if let Some(section) = current.take() {
            manifest.push_section(section);
        }
        manifest
    }

    fn push_section(&mut self, mut section: IndexMap<String, String>) {
        if let Some(name) = section.shift_remove("Name") {
            self.sections.insert(name, section);
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        let version = self.get(MANIFEST_VERSION).unwrap_or("1.0");
        write_header(&mut out, MANIFEST_VERSION, version);
        for (k, v) in self.headers().filter(|(k, _)| *k != MANIFEST_VERSION) {
            write_header(&mut out, k, v);
        }
        out.push_str("\r\n");

        for (name, attrs) in &self.sections {
            write_header(&mut out, "Name", name);
            for (k, v) in attrs {
                write_header(&mut out, k, v);
            }
            out.push_str("\r\n");
        }
        out.into_bytes()
    }
}

fn write_header(out: &mut String, name: &str, value: &str) {
    let line = format!("{name}: {value}");
    let mut budget = MAX_LINE_BYTES;
    let mut used = 0usize;

    for c in line.chars() {
        let width = c.len_utf8();
        if used + width > budget {
            out.push_str("\r\n ");
            // continuation lines lose one byte to the leading space
            budget = MAX_LINE_BYTES - 1;
            used = 0;
        }
        out.push(c);
        used += width;
    }
    out.push_str("\r\n");
}
