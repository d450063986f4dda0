//! Path parsing. Paths follow `<digit> ':' '/' <name> ('/' <name>)*`, e.g.
//! `0:/bin/blank.elf`: a disk id prefix and at least one name component.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::error::KernelError;

pub const MAX_PATH: usize = 108;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPath {
    pub disk_id: u32,
    pub parts: Vec<String>,
}

fn valid_name(part: &str) -> bool {
    !part.is_empty()
        && part
            .bytes()
            .all(|byte| byte.is_ascii_graphic() && byte != b'/' && byte != b':')
}

pub fn parse(path: &str) -> Result<ParsedPath, KernelError> {
    if path.len() > MAX_PATH {
        return Err(KernelError::InvalidArg);
    }

    let mut chars = path.chars();

    let disk_id = chars
        .next()
        .and_then(|c| c.to_digit(10))
        .ok_or(KernelError::InvalidArg)?;

    if chars.next() != Some(':') || chars.next() != Some('/') {
        return Err(KernelError::InvalidArg);
    }

    let rest = chars.as_str();
    if rest.is_empty() {
        return Err(KernelError::InvalidArg);
    }

    let mut parts = Vec::new();
    for part in rest.split('/') {
        if !valid_name(part) {
            return Err(KernelError::InvalidArg);
        }
        parts.push(part.to_string());
    }

    Ok(ParsedPath { disk_id, parts })
}

/// Canonical `D:/a/b` form; `parse(format(p)) == p`.
pub fn format(path: &ParsedPath) -> String {
    let mut out = String::new();
    out.push((b'0' + path.disk_id as u8) as char);
    out.push_str(":/");
    out.push_str(&path.parts.join("/"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn parses_nested_paths() {
        let parsed = parse("0:/a/b/c").unwrap();
        assert_eq!(parsed.disk_id, 0);
        assert_eq!(parsed.parts, vec!["a", "b", "c"]);
    }

    #[test]
    fn parses_single_component() {
        let parsed = parse("3:/HELLO.TXT").unwrap();
        assert_eq!(parsed.disk_id, 3);
        assert_eq!(parsed.parts, vec!["HELLO.TXT"]);
    }

    #[test]
    fn rejects_missing_disk_prefix() {
        assert_eq!(parse("/a"), Err(KernelError::InvalidArg));
        assert_eq!(parse("a/b"), Err(KernelError::InvalidArg));
        assert_eq!(parse(":/a"), Err(KernelError::InvalidArg));
    }

    #[test]
    fn rejects_degenerate_shapes() {
        assert_eq!(parse(""), Err(KernelError::InvalidArg));
        assert_eq!(parse("0:"), Err(KernelError::InvalidArg));
        assert_eq!(parse("0:/"), Err(KernelError::InvalidArg));
        assert_eq!(parse("0:/a//b"), Err(KernelError::InvalidArg));
        assert_eq!(parse("0:/a/"), Err(KernelError::InvalidArg));
        assert_eq!(parse("0:/a b"), Err(KernelError::InvalidArg));
    }

    #[test]
    fn rejects_overlong_paths() {
        let long = alloc::format!("0:/{}", "x".repeat(MAX_PATH));
        assert_eq!(parse(&long), Err(KernelError::InvalidArg));
    }

    #[test]
    fn format_round_trips() {
        for path in ["0:/a/b/c", "5:/BLANK.ELF", "1:/x"] {
            let parsed = parse(path).unwrap();
            assert_eq!(format(&parsed), path);
            assert_eq!(parse(&format(&parsed)).unwrap(), parsed);
        }
    }
}
