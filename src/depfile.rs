//! Parsing of Makefile syntax as found in `.d` files emitted by C
//! compilers, for `--depfile`.

use crate::scanner::{ParseResult, Scanner};
use anyhow::anyhow;
use std::path::Path;

/// Skip spaces and backslashed newlines.
fn skip_spaces(scanner: &mut Scanner) -> ParseResult<()> {
    loop {
        match scanner.read() {
            ' ' => {}
            '\\' => match scanner.read() {
                '\n' => {}
                _ => return scanner.parse_error("invalid backslash escape"),
            },
            _ => {
                scanner.back();
                break;
            }
        }
    }
    Ok(())
}

/// Read one path from the input scanner.
fn read_path<'a>(scanner: &mut Scanner<'a>) -> ParseResult<Option<&'a str>> {
    skip_spaces(scanner)?;
    let start = scanner.ofs;
    loop {
        match scanner.read() {
            '\0' | ' ' | '\n' => {
                scanner.back();
                break;
            }
            '\\' => {
                if scanner.peek() == '\n' {
                    scanner.back();
                    break;
                }
            }
            _ => {}
        }
    }
    let end = scanner.ofs;
    if end == start {
        return Ok(None);
    }
    Ok(Some(scanner.slice(start, end)))
}

/// Parse a `.d` file into a list of `(target, deps)` pairs.
pub fn parse<'a>(scanner: &mut Scanner<'a>) -> ParseResult<Vec<(&'a str, Vec<&'a str>)>> {
    let mut result = Vec::new();
    loop {
        while matches!(scanner.peek(), ' ' | '\n') {
            scanner.next();
        }
        let target = match read_path(scanner)? {
            None => break,
            Some(o) => o,
        };
        scanner.skip_spaces();
        let target = match target.strip_suffix(':') {
            None => {
                scanner.expect(':')?;
                target
            }
            Some(target) => target,
        };
        let mut deps = Vec::new();
        while let Some(p) = read_path(scanner)? {
            deps.push(p);
        }
        result.push((target, deps));
    }
    scanner.expect('\0')?;

    Ok(result)
}

/// Read a depfile and return every listed dependency, in order, deduplicated.
pub fn read_deps(path: &Path) -> anyhow::Result<Vec<String>> {
    let mut bytes = std::fs::read(path)
        .map_err(|err| anyhow!("read {}: {}", path.display(), err))?;
    bytes.push(0);
    let mut scanner = Scanner::new(&bytes);
    let parsed = parse(&mut scanner)
        .map_err(|err| anyhow!(scanner.format_parse_error(path, err)))?;
    let mut seen = std::collections::HashSet::new();
    let mut deps = Vec::new();
    for (_, target_deps) in parsed {
        for dep in target_deps {
            if seen.insert(dep) {
                deps.push(dep.to_string());
            }
        }
    }
    Ok(deps)
}
