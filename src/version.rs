//! OSGi versions and normalization of free-form build versions.
//!
//! Build tools hand out versions like `1.0-SNAPSHOT`, `2.1` or `unspecified`.
//! OSGi requires `major.minor.micro[.qualifier]` with a restricted qualifier
//! alphabet, so [`parse_maven_version`] maps anything onto a valid [`Version`].

use anyhow::{Result, bail};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
    pub qualifier: Option<String>,
}

impl Version {
    pub fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            major,
            minor,
            micro,
            qualifier: None,
        }
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        let q = qualifier.into();
        self.qualifier = if q.is_empty() { None } else { Some(q) };
        self
    }

    /// Strict OSGi parse: one to three numeric segments and an optional qualifier.
    pub fn parse(raw: &str) -> Result<Self> {
        let s = raw.trim();
        if s.is_empty() {
            bail!("empty version string");
        }

        let mut parts = s.splitn(4, '.');
        let mut numbers = [0u32; 3];
        for (idx, slot) in numbers.iter_mut().enumerate() {
            match parts.next() {
                Some(p) => {
                    *slot = p
                        .parse::<u32>()
                        .map_err(|_| anyhow::anyhow!("invalid version segment {p:?} in {s:?}"))?;
                }
                None if idx == 0 => bail!("invalid version {s:?}"),
                None => break,
            }
        }

        let qualifier = match parts.next() {
            Some(q) if q.is_empty() => bail!("empty qualifier in version {s:?}"),
            Some(q) if !q.chars().all(is_qualifier_char) => {
                bail!("invalid qualifier {q:?} in version {s:?}")
            }
            Some(q) => Some(q.to_string()),
            None => None,
        };

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            micro: numbers[2],
            qualifier,
        })
    }

    /// The import range a consumer of a package exported at this version uses.
    pub fn consumer_range(&self) -> String {
        format!(
            "[{}.{},{})",
            self.major,
            self.minor,
            self.major.saturating_add(1)
        )
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)?;
        if let Some(q) = &self.qualifier {
            write!(f, ".{q}")?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.micro.cmp(&other.micro))
            .then_with(|| {
                let a = self.qualifier.as_deref().unwrap_or("");
                let b = other.qualifier.as_deref().unwrap_or("");
                a.cmp(b)
            })
    }
}

/// Maps an arbitrary build version onto a valid OSGi version.
///
/// Up to three leading numeric segments are taken as-is, missing ones are zero.
/// Whatever follows (after an optional `.`, `-` or `_` separator) becomes the
/// qualifier, with characters OSGi does not allow replaced by `_`.
pub fn parse_maven_version(raw: Option<&str>) -> Version {
    let Some(s) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Version::default();
    };
    if s == "unspecified" {
        return Version::default();
    }

    let bytes = s.as_bytes();
    let mut numbers = [0u32; 3];
    let mut segments = 0usize;
    let mut pos = 0usize;

    while segments < 3 {
        let start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        if start == pos {
            break;
        }
        let Ok(n) = s[start..pos].parse::<u32>() else {
            pos = start;
            break;
        };
        numbers[segments] = n;
        segments += 1;

        let continues = segments < 3
            && pos + 1 < bytes.len()
            && bytes[pos] == b'.'
            && bytes[pos + 1].is_ascii_digit();
        if !continues {
            break;
        }
        pos += 1;
    }

    if segments == 0 {
        return Version::default().with_qualifier(clean_qualifier(s));
    }

    let mut rest = &s[pos..];
    if let Some(stripped) = rest.strip_prefix(['.', '-', '_']) {
        rest = stripped;
    }

    Version {
        major: numbers[0],
        minor: numbers[1],
        micro: numbers[2],
        qualifier: None,
    }
    .with_qualifier(clean_qualifier(rest))
}

fn is_qualifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn clean_qualifier(raw: &str) -> String {
    raw.chars()
        .map(|c| if is_qualifier_char(c) { c } else { '_' })
        .collect()
}
