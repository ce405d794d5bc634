//! Ordered `key=value` property sets and the layered merge that feeds the analyzer.
//!
//! Sources are applied least to most specific: host task attributes first, then
//! the user's descriptor file. Later layers win on conflicting keys.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use std::io::Write;
use std::path::Path;

/// Reserved by the manifest format and always computed by the writer.
pub const MANIFEST_VERSION: &str = "Manifest-Version";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertySet {
    entries: IndexMap<String, String>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// True when the key holds `true`, case-insensitively.
    pub fn is_true(&self, key: &str) -> bool {
        self.get(key)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }

    /// Applies `other` on top of `self`; values from `other` win.
    pub fn overlay(&mut self, other: &PropertySet) {
        for (k, v) in other.iter() {
            self.set(k, v);
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read properties file: {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let mut props = Self::new();
        for line in logical_lines(text) {
            let (key, value) = split_key_value(&line);
            props.set(unescape(key), unescape(value));
        }
        props
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        for (k, v) in self.iter() {
            writeln!(out, "{}={}", escape(k, true), escape(v, false))?;
        }
        Ok(())
    }

    pub fn to_text(&self) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PropertySet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Self::new();
        for (k, v) in iter {
            props.set(k, v);
        }
        props
    }
}

/// Merges host task attributes with an optional descriptor file.
///
/// The manifest-version marker is never taken from the task attributes. A
/// descriptor path that does not name a regular file contributes nothing.
pub fn merge(task_attributes: &IndexMap<String, String>, descriptor: Option<&Path>) -> Result<PropertySet> {
    let mut merged = task_layer(task_attributes);
    if let Some(path) = descriptor.filter(|p| p.is_file()) {
        merged.overlay(&PropertySet::load(path)?);
    }
    Ok(merged)
}

/// The task attribute layer on its own, minus reserved keys.
pub fn task_layer(task_attributes: &IndexMap<String, String>) -> PropertySet {
    task_attributes
        .iter()
        .filter(|(k, _)| k.as_str() != MANIFEST_VERSION)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn logical_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current: Option<String> = None;

    for raw in text.lines() {
        let line = match current {
            Some(_) => raw.trim_start(),
            None => {
                let trimmed = raw.trim_start();
                if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
                    continue;
                }
                trimmed
            }
        };

        let continued = ends_with_continuation(line);
        let content = if continued { &line[..line.len() - 1] } else { line };
        let acc = current.get_or_insert_with(String::new);
        acc.push_str(content);

        if !continued {
            lines.extend(current.take());
        }
    }

    lines.extend(current.take());
    lines
}

fn ends_with_continuation(line: &str) -> bool {
    let trailing = line.chars().rev().take_while(|c| *c == '\\').count();
    trailing % 2 == 1
}

fn split_key_value(line: &str) -> (&str, &str) {
    let mut escaped = false;
    let mut key_end = line.len();
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' | ' ' | '\t' | '\x0c' => {
                key_end = i;
                break;
            }
            _ => {}
        }
    }

    let key = &line[..key_end];
    let mut rest = line[key_end..].trim_start_matches([' ', '\t', '\x0c']);
    if let Some(r) = rest.strip_prefix(['=', ':']) {
        rest = r.trim_start_matches([' ', '\t', '\x0c']);
    }
    (key, rest)
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\x0c'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push('u');
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn escape(raw: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for (i, c) in raw.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x0c' => out.push_str("\\f"),
            '=' | ':' | '#' | '!' if is_key => {
                out.push('\\');
                out.push(c);
            }
            ' ' if is_key || i == 0 => out.push_str("\\ "),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn attrs(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn merge_without_descriptor_drops_manifest_version() -> Result<()> {
        let task = attrs(&[
            ("Manifest-Version", "1.0"),
            ("Bundle-Name", "Foo"),
            ("Bundle-Vendor", "Acme"),
        ]);
        let merged = merge(&task, None)?;
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get("Bundle-Name"), Some("Foo"));
        assert!(!merged.contains_key(MANIFEST_VERSION));
        Ok(())
    }

    #[test]
    fn descriptor_overrides_task_attributes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let bnd = dir.path().join("bnd.bnd");
        let mut f = std::fs::File::create(&bnd)?;
        writeln!(f, "# user overrides")?;
        writeln!(f, "Bundle-Name: Bar")?;
        writeln!(f, "Export-Package: com.acme.api,\\")?;
        writeln!(f, "    com.acme.spi")?;
        drop(f);

        let task = attrs(&[("Bundle-Name", "Foo"), ("Bundle-Vendor", "Acme")]);
        let merged = merge(&task, Some(&bnd))?;
        assert_eq!(merged.get("Bundle-Name"), Some("Bar"));
        assert_eq!(merged.get("Bundle-Vendor"), Some("Acme"));
        assert_eq!(merged.get("Export-Package"), Some("com.acme.api,com.acme.spi"));
        Ok(())
    }

    #[test]
    fn missing_descriptor_contributes_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let task = attrs(&[("Bundle-Name", "Foo")]);
        let merged = merge(&task, Some(&dir.path().join("absent.bnd")))?;
        assert_eq!(merged, merge(&task, None)?);

        // a directory is not a descriptor either
        let merged = merge(&task, Some(dir.path()))?;
        assert_eq!(merged.len(), 1);
        Ok(())
    }

    #[test]
    fn parse_handles_separators_and_escapes() {
        let props = PropertySet::parse(
            "a=1\nb : 2\nc 3\n! comment\nd\\=e=4\nf=line\\nbreak\ng=\\u00e9t\\u00e9\nempty\n",
        );
        assert_eq!(props.get("a"), Some("1"));
        assert_eq!(props.get("b"), Some("2"));
        assert_eq!(props.get("c"), Some("3"));
        assert_eq!(props.get("d=e"), Some("4"));
        assert_eq!(props.get("f"), Some("line\nbreak"));
        assert_eq!(props.get("g"), Some("été"));
        assert_eq!(props.get("empty"), Some(""));
    }

    #[test]
    fn written_text_parses_back_in_order() {
        let props: PropertySet = [("-sub", "*.bnd"), ("key with space", " lead"), ("x", "a\\b")]
            .into_iter()
            .collect();
        let reparsed = PropertySet::parse(&props.to_text());
        assert_eq!(reparsed, props);
        let keys: Vec<&str> = reparsed.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["-sub", "key with space", "x"]);
    }
}
