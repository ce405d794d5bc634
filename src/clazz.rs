//! Minimal JVM class-file reader.
//!
//! Only what package analysis needs is decoded: the constant pool, the class's
//! own name and supertypes, and the descriptors of its fields and methods.
//! Code attributes are skipped.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::collections::BTreeSet;

const MAGIC: u32 = 0xCAFE_BABE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassInfo {
    /// Archive entry the class was read from.
    pub path: String,
    pub name: String,
    pub package: String,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    pub major_version: u16,
    pub minor_version: u16,
    pub access_flags: u16,
    pub referenced_packages: BTreeSet<String>,
}

impl ClassInfo {
    pub fn is_module_info(&self) -> bool {
        self.name == "module-info"
    }
}

#[derive(Debug, Clone)]
enum Constant {
    Unused,
    Utf8(String),
    Class(u16),
    NameAndType { descriptor: u16 },
    MethodType(u16),
    Other,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|e| *e <= self.bytes.len());
        let Some(end) = end else {
            bail!("truncated class file at offset {}", self.pos);
        };
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u1(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u2(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u4(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn skip_attributes(&mut self) -> Result<()> {
        let count = self.u2()?;
        for _ in 0..count {
            let _name = self.u2()?;
            let len = self.u4()? as usize;
            self.take(len)?;
        }
        Ok(())
    }
}

pub fn parse_class(path: &str, bytes: &[u8]) -> Result<ClassInfo> {
    parse_inner(path, bytes).with_context(|| format!("Invalid class file: {path}"))
}

fn parse_inner(path: &str, bytes: &[u8]) -> Result<ClassInfo> {
    let mut r = Reader::new(bytes);
    let magic = r.u4()?;
    if magic != MAGIC {
        bail!("bad magic {magic:#010x}");
    }
    let minor_version = r.u2()?;
    let major_version = r.u2()?;
    let pool = read_constant_pool(&mut r)?;

    let access_flags = r.u2()?;
    let this_class = class_name_at(&pool, r.u2()?)?
        .context("missing this_class")?;
    let super_class = class_name_at(&pool, r.u2()?)?;

    let interface_count = r.u2()?;
    let mut interfaces = Vec::with_capacity(interface_count as usize);
    for _ in 0..interface_count {
        if let Some(name) = class_name_at(&pool, r.u2()?)? {
            interfaces.push(name);
        }
    }

    let mut member_descriptors = Vec::new();
    for _ in 0..2 {
        let count = r.u2()?;
        for _ in 0..count {
            let _access = r.u2()?;
            let _name = r.u2()?;
            member_descriptors.push(r.u2()?);
            r.skip_attributes()?;
        }
    }
    r.skip_attributes()?;

    let mut referenced = BTreeSet::new();
    for constant in &pool {
        match constant {
            Constant::Class(idx) => {
                if let Some(name) = utf8_at(&pool, *idx)? {
                    add_class_reference(&mut referenced, name);
                }
            }
            Constant::NameAndType { descriptor } | Constant::MethodType(descriptor) => {
                if let Some(desc) = utf8_at(&pool, *descriptor)? {
                    add_descriptor_references(&mut referenced, desc);
                }
            }
            _ => {}
        }
    }
    for idx in member_descriptors {
        if let Some(desc) = utf8_at(&pool, idx)? {
            add_descriptor_references(&mut referenced, desc);
        }
    }

    let package = package_of(&this_class);
    referenced.remove(&package);

    Ok(ClassInfo {
        path: path.to_string(),
        name: this_class.replace('/', "."),
        package,
        super_class: super_class.map(|s| s.replace('/', ".")),
        interfaces: interfaces.into_iter().map(|s| s.replace('/', ".")).collect(),
        major_version,
        minor_version,
        access_flags,
        referenced_packages: referenced,
    })
}

fn read_constant_pool(r: &mut Reader<'_>) -> Result<Vec<Constant>> {
    let count = r.u2()? as usize;
    let mut pool = Vec::with_capacity(count);
    pool.push(Constant::Unused);

    while pool.len() < count {
        let tag = r.u1()?;
        let constant = match tag {
            1 => {
                let len = r.u2()? as usize;
                Constant::Utf8(String::from_utf8_lossy(r.take(len)?).into_owned())
            }
            3 | 4 => {
                r.take(4)?;
                Constant::Other
            }
            5 | 6 => {
                r.take(8)?;
                pool.push(Constant::Other);
                // eight-byte constants occupy two slots
                Constant::Unused
            }
            7 => Constant::Class(r.u2()?),
            8 => {
                r.u2()?;
                Constant::Other
            }
            16 => Constant::MethodType(r.u2()?),
            9 | 10 | 11 | 17 | 18 => {
                r.take(4)?;
                Constant::Other
            }
            12 => {
                let _name = r.u2()?;
                Constant::NameAndType {
                    descriptor: r.u2()?,
                }
            }
            15 => {
                r.take(3)?;
                Constant::Other
            }
            19 | 20 => {
                r.u2()?;
                Constant::Other
            }
            other => bail!("unknown constant pool tag {other} at entry {}", pool.len()),
        };
        pool.push(constant);
    }
    Ok(pool)
}

fn utf8_at(pool: &[Constant], idx: u16) -> Result<Option<&str>> {
    match pool.get(idx as usize) {
        Some(Constant::Utf8(s)) => Ok(Some(s.as_str())),
        Some(_) if idx == 0 => Ok(None),
        Some(_) => bail!("constant #{idx} is not a Utf8 entry"),
        None => bail!("constant #{idx} out of range"),
    }
}

fn class_name_at(pool: &[Constant], idx: u16) -> Result<Option<String>> {
    if idx == 0 {
        return Ok(None);
    }
    match pool.get(idx as usize) {
        Some(Constant::Class(name_idx)) => Ok(utf8_at(pool, *name_idx)?.map(str::to_string)),
        _ => bail!("constant #{idx} is not a Class entry"),
    }
}

fn add_class_reference(out: &mut BTreeSet<String>, internal: &str) {
    if internal.starts_with('[') {
        add_descriptor_references(out, internal);
        return;
    }
    let package = package_of(internal);
    if !package.is_empty() {
        out.insert(package);
    }
}

fn add_descriptor_references(out: &mut BTreeSet<String>, descriptor: &str) {
    let mut rest = descriptor;
    while let Some(start) = rest.find('L') {
        let after = &rest[start + 1..];
        let Some(end) = after.find(';') else {
            break;
        };
        add_class_reference(out, &after[..end]);
        rest = &after[end + 1..];
    }
}

/// `a/b/C` or `a.b.C` → `a.b`; the default package is the empty string.
pub fn package_of(class_name: &str) -> String {
    match class_name.rfind(['/', '.']) {
        Some(idx) => class_name[..idx].replace('/', "."),
        None => String::new(),
    }
}
