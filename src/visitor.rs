//! Walks every class in a list of archives for ad-hoc inspection.
//!
//! Unlike [`crate::classpath::resolve_classpath`], nothing is filtered here: an
//! archive that fails to open or a class that fails to parse is an error for
//! the caller.

use anyhow::Result;
use std::path::Path;

use crate::clazz::{ClassInfo, parse_class};
use crate::jar::Jar;

/// Calls `visitor` for each class entry, archive by archive.
///
/// The visitor returns `Ok(false)` to stop; no further classes are visited in
/// that archive or any later one. Returns the number of classes visited.
pub fn visit_classes<P, F>(entries: &[P], mut visitor: F) -> Result<usize>
where
    P: AsRef<Path>,
    F: FnMut(&ClassInfo) -> Result<bool>,
{
    let mut visited = 0usize;
    for entry in entries {
        let mut jar = Jar::open(entry.as_ref())?;
        for name in jar.class_names() {
            let bytes = jar.read(&name)?;
            let info = parse_class(&name, &bytes)?;
            visited += 1;
            if !visitor(&info)? {
                return Ok(visited);
            }
        }
    }
    Ok(visited)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clazz::tests::class_bytes;
    use crate::jar::tests::write_jar;

    #[test]
    fn visits_every_class_in_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let a = dir.path().join("a.jar");
        let b = dir.path().join("b.jar");
        write_jar(
            &a,
            &[
                ("p/A.class", &class_bytes("p/A", Some("java/lang/Object"), &[], None, 52)),
                ("p/readme.txt", b"not a class"),
            ],
        )?;
        write_jar(
            &b,
            &[("q/B.class", &class_bytes("q/B", Some("p/A"), &[], None, 52))],
        )?;

        let mut seen = Vec::new();
        let count = visit_classes(&[&a, &b], |c| {
            seen.push(c.name.clone());
            Ok(true)
        })?;
        assert_eq!(count, 2);
        assert_eq!(seen, vec!["p.A", "q.B"]);
        Ok(())
    }

    #[test]
    fn stop_aborts_remaining_visits() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let a = dir.path().join("a.jar");
        write_jar(
            &a,
            &[
                ("p/A.class", &class_bytes("p/A", None, &[], None, 52)),
                ("p/B.class", &class_bytes("p/B", None, &[], None, 52)),
            ],
        )?;
        let count = visit_classes(&[&a, &a], |_| Ok(false))?;
        assert_eq!(count, 1);
        Ok(())
    }

    #[test]
    fn visitor_errors_propagate() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let a = dir.path().join("a.jar");
        write_jar(&a, &[("p/A.class", &class_bytes("p/A", None, &[], None, 52))])?;
        let result = visit_classes(&[&a], |_| anyhow::bail!("boom"));
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn bad_inputs_are_errors_not_skipped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let fake = dir.path().join("fake.jar");
        std::fs::write(&fake, "text")?;
        assert!(visit_classes(&[&fake], |_| Ok(true)).is_err());

        let broken = dir.path().join("broken.jar");
        write_jar(&broken, &[("p/A.class", b"\xca\xfe")])?;
        assert!(visit_classes(&[&broken], |_| Ok(true)).is_err());
        Ok(())
    }
}
