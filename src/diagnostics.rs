//! Warnings and errors accumulated while a bundle is analyzed and written.

use serde::Serialize;
use std::fmt;

use crate::header::{parse_header, wildcard_match};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Severity::Warning => write!(f, "warning: {}", self.message),
            Severity::Error => write!(f, "error: {}", self.message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FixupAction {
    Error,
    Warning,
    Ignore,
}

#[derive(Debug, Clone)]
struct Fixup {
    pattern: String,
    action: FixupAction,
}

/// Collects diagnostics in the order they are raised.
#[derive(Debug, Default)]
pub struct Reporter {
    diagnostics: Vec<Diagnostic>,
    fixups: Vec<Fixup>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `-fixupmessages` rules: `pattern;is:=error|warning|ignore`.
    ///
    /// A rule without `is:` drops the matching message.
    pub fn with_fixups(mut self, raw: Option<&str>) -> Self {
        self.fixups = raw
            .map(parse_header)
            .unwrap_or_default()
            .into_iter()
            .map(|clause| {
                let action = match clause.directive("is").map(str::trim) {
                    Some(v) if v.eq_ignore_ascii_case("error") => FixupAction::Error,
                    Some(v) if v.eq_ignore_ascii_case("warning") => FixupAction::Warning,
                    _ => FixupAction::Ignore,
                };
                Fixup {
                    pattern: clause.name,
                    action,
                }
            })
            .collect();
        self
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.push(Severity::Warning, message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(Severity::Error, message.into());
    }

    fn push(&mut self, severity: Severity, message: String) {
        let matched = self
            .fixups
            .iter()
            .find(|f| message.contains(&f.pattern) || wildcard_match(&f.pattern, &message));
        let severity = match matched.map(|f| f.action) {
            Some(FixupAction::Ignore) => return,
            Some(FixupAction::Error) => Severity::Error,
            Some(FixupAction::Warning) => Severity::Warning,
            None => severity,
        };
        self.diagnostics.push(Diagnostic { severity, message });
    }

    pub fn is_ok(&self) -> bool {
        !self
            .diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Hands out everything raised since the last drain.
    pub fn drain(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

/// Emits diagnostics through the `log` facade, prefixed by the archive name.
pub fn report(jar: &str, diagnostics: &[Diagnostic]) {
    for d in diagnostics {
        match d.severity {
            Severity::Warning => log::warn!("{jar}: {}", d.message),
            Severity::Error => log::error!("{jar}: {}", d.message),
        }
    }
}
