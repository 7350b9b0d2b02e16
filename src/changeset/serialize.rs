//! Canonical textual serialization of a change-set (spec §4.2, §6).
//!
//! Stanzas are printed in a fixed group order (deletes, renames, adds, then
//! patches), each group sorted lexicographically by its primary path, with
//! identifiers as 40-character lowercase hex and quoted strings escaping
//! only `"` and `\`. Parsing is the exact inverse.

use std::fmt::Write as _;

use super::{ChangeSet, Delta};
use crate::error::PcdvError;
use crate::ident::FileId;
use crate::path::{split_path, RepoPath};

/// Render `cs` in the canonical textual form.
#[must_use]
pub fn print(cs: &ChangeSet) -> String {
    const INFALLIBLE: &str = "writing to a String cannot fail";
    let mut out = String::new();
    for path in &cs.rearrangement.deleted_files {
        writeln!(out, "delete_file  {}", quote(&path.to_string())).expect(INFALLIBLE);
    }
    for path in &cs.rearrangement.deleted_dirs {
        writeln!(out, "delete_dir   {}", quote(&path.to_string())).expect(INFALLIBLE);
    }
    for (src, dst) in &cs.rearrangement.renamed_files {
        writeln!(out, "rename_file  {}", quote(&src.to_string())).expect(INFALLIBLE);
        writeln!(out, "      to     {}", quote(&dst.to_string())).expect(INFALLIBLE);
    }
    for (src, dst) in &cs.rearrangement.renamed_dirs {
        writeln!(out, "rename_dir   {}", quote(&src.to_string())).expect(INFALLIBLE);
        writeln!(out, "      to     {}", quote(&dst.to_string())).expect(INFALLIBLE);
    }
    for path in &cs.rearrangement.added_files {
        writeln!(out, "add_file     {}", quote(&path.to_string())).expect(INFALLIBLE);
    }
    for (path, delta) in &cs.deltas {
        writeln!(out, "patch        {}", quote(&path.to_string())).expect(INFALLIBLE);
        writeln!(out, "      from   [{}]", delta.src.to_hex()).expect(INFALLIBLE);
        writeln!(out, "      to     [{}]", delta.dst.to_hex()).expect(INFALLIBLE);
    }
    out
}

/// Parse the canonical textual form back into a change-set.
///
/// # Errors
/// [`PcdvError::Decoding`] on any malformed stanza.
pub fn parse(text: &str) -> Result<ChangeSet, PcdvError> {
    let mut cs = ChangeSet::empty();
    let mut lines = text.lines();
    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("delete_file") {
            cs.rearrangement.deleted_files.insert(parse_path(rest)?);
        } else if let Some(rest) = trimmed.strip_prefix("delete_dir") {
            cs.rearrangement.deleted_dirs.insert(parse_path(rest)?);
        } else if let Some(rest) = trimmed.strip_prefix("rename_file") {
            let src = parse_path(rest)?;
            let dst = parse_to_line(next_line(&mut lines)?)?;
            cs.rearrangement.renamed_files.insert(src, dst);
        } else if let Some(rest) = trimmed.strip_prefix("rename_dir") {
            let src = parse_path(rest)?;
            let dst = parse_to_line(next_line(&mut lines)?)?;
            cs.rearrangement.renamed_dirs.insert(src, dst);
        } else if let Some(rest) = trimmed.strip_prefix("add_file") {
            cs.rearrangement.added_files.insert(parse_path(rest)?);
        } else if let Some(rest) = trimmed.strip_prefix("patch") {
            let path = parse_path(rest)?;
            let src = parse_id_line(next_line(&mut lines)?, "from")?;
            let dst = parse_id_line(next_line(&mut lines)?, "to")?;
            cs.deltas.insert(path, Delta { src, dst });
        } else {
            return Err(PcdvError::decoding(
                "change-set",
                format!("unrecognized stanza: {trimmed}"),
            ));
        }
    }
    Ok(cs)
}

fn next_line<'a>(lines: &mut std::str::Lines<'a>) -> Result<&'a str, PcdvError> {
    lines
        .next()
        .ok_or_else(|| PcdvError::decoding("change-set", "unexpected end of input"))
}

fn parse_path(rest: &str) -> Result<RepoPath, PcdvError> {
    let s = unquote(rest)?;
    split_path(&s)
}

fn parse_to_line(line: &str) -> Result<RepoPath, PcdvError> {
    let trimmed = line.trim();
    let rest = trimmed
        .strip_prefix("to")
        .ok_or_else(|| PcdvError::decoding("change-set", format!("expected 'to' line, got: {trimmed}")))?;
    parse_path(rest)
}

fn parse_id_line(line: &str, keyword: &str) -> Result<FileId, PcdvError> {
    let trimmed = line.trim();
    let rest = trimmed.strip_prefix(keyword).ok_or_else(|| {
        PcdvError::decoding(
            "change-set",
            format!("expected '{keyword}' line, got: {trimmed}"),
        )
    })?;
    parse_bracketed_id(rest)
}

fn parse_bracketed_id(rest: &str) -> Result<FileId, PcdvError> {
    let s = rest.trim();
    if !s.starts_with('[') || !s.ends_with(']') || s.len() < 2 {
        return Err(PcdvError::decoding(
            "identifier",
            format!("expected bracketed hex identifier, got: {s}"),
        ));
    }
    FileId::from_hex(&s[1..s.len() - 1])
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn unquote(rest: &str) -> Result<String, PcdvError> {
    let s = rest.trim();
    if !s.starts_with('"') || !s.ends_with('"') || s.len() < 2 {
        return Err(PcdvError::decoding(
            "quoted string",
            format!("malformed quoted string: {s}"),
        ));
    }
    let inner = &s[1..s.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next @ ('"' | '\\')) => out.push(next),
                Some(_) | None => {
                    return Err(PcdvError::decoding("quoted string", "invalid escape sequence"))
                }
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}
