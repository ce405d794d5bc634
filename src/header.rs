//! OSGi header syntax: `name(;name)*(;key=value|;key:=value)*` clauses joined by commas.
//!
//! Directives are stored with a trailing `:` on the key (`resolution:`), the
//! same way the header distinguishes them on the wire.

use indexmap::IndexMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clause {
    pub name: String,
    pub attrs: IndexMap<String, String>,
}

impl Clause {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: IndexMap::new(),
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    pub fn directive(&self, key: &str) -> Option<&str> {
        self.attrs.get(&format!("{key}:")).map(String::as_str)
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }
}

pub fn parse_header(raw: &str) -> Vec<Clause> {
    let mut clauses = Vec::new();
    for clause_text in split_unquoted(raw, ',') {
        let mut names = Vec::new();
        let mut attrs = IndexMap::new();
        for part in split_unquoted(&clause_text, ';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match split_assignment(part) {
                Some((key, value)) => {
                    attrs.insert(key, unquote(value.trim()));
                }
                None => names.push(part.to_string()),
            }
        }
        for name in names {
            clauses.push(Clause {
                name,
                attrs: attrs.clone(),
            });
        }
    }
    clauses
}

pub fn print_header(clauses: &[Clause]) -> String {
    clauses
        .iter()
        .map(print_clause)
        .collect::<Vec<_>>()
        .join(",")
}

fn print_clause(clause: &Clause) -> String {
    let mut out = clause.name.clone();
    for (k, v) in &clause.attrs {
        out.push(';');
        match k.strip_suffix(':') {
            Some(directive) => {
                out.push_str(directive);
                out.push_str(":=");
            }
            None => {
                out.push_str(k);
                out.push('=');
            }
        }
        if needs_quotes(v) {
            out.push('"');
            out.push_str(v);
            out.push('"');
        } else {
            out.push_str(v);
        }
    }
    out
}

fn needs_quotes(value: &str) -> bool {
    value.is_empty()
        || value
            .chars()
            .any(|c| matches!(c, ',' | ';' | '=' | ':' | '"' | '(' | '[') || c.is_whitespace())
}

fn split_assignment(part: &str) -> Option<(String, &str)> {
    let eq = find_unquoted(part, '=')?;
    let (key, value) = (&part[..eq], &part[eq + 1..]);
    let key = key.trim();
    let key = match key.strip_suffix(':') {
        Some(directive) => format!("{}:", directive.trim()),
        None => key.to_string(),
    };
    Some((key, value))
}

fn find_unquoted(s: &str, needle: char) -> Option<usize> {
    let mut quoted = false;
    for (i, c) in s.char_indices() {
        match c {
            '"' => quoted = !quoted,
            c if c == needle && !quoted => return Some(i),
            _ => {}
        }
    }
    None
}

fn split_unquoted(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in s.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            c if c == sep && !quoted => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

fn unquote(value: &str) -> String {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
        .to_string()
}

/// A name pattern from an instruction header such as `Export-Package`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pattern: String,
    negated: bool,
}

impl Instruction {
    pub fn new(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.strip_prefix('!') {
            Some(rest) => Self {
                pattern: rest.trim().to_string(),
                negated: true,
            },
            None => Self {
                pattern: raw.to_string(),
                negated: false,
            },
        }
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    pub fn is_literal(&self) -> bool {
        !self.pattern.contains('*')
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, name: &str) -> bool {
        // `com.acme.*` covers `com.acme` itself as well as its subpackages
        if let Some(prefix) = self.pattern.strip_suffix(".*")
            && name == prefix
        {
            return true;
        }
        wildcard_match(&self.pattern, name)
    }
}

/// Ordered instructions; the first matching one decides.
#[derive(Debug, Clone, Default)]
pub struct Instructions {
    entries: Vec<(Instruction, Clause)>,
}

impl Instructions {
    pub fn parse(raw: &str) -> Self {
        let entries = parse_header(raw)
            .into_iter()
            .map(|clause| (Instruction::new(&clause.name), clause))
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Instruction, Clause)> {
        self.entries.iter()
    }

    pub fn first_match(&self, name: &str) -> Option<&(Instruction, Clause)> {
        self.entries.iter().find(|(ins, _)| ins.matches(name))
    }

    /// The clause selecting `name`, or `None` when unmatched or negated.
    pub fn selects(&self, name: &str) -> Option<&Clause> {
        match self.first_match(name) {
            Some((ins, clause)) if !ins.is_negated() => Some(clause),
            _ => None,
        }
    }
}

/// `*` matches any run of characters, everything else matches literally.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}
