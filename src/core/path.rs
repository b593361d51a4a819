//! idShortPath grammar and Submodel tree navigation.
//!
//! Grammar: `segment ( ("." segment) | ("[" integer "]") )*` where `segment`
//! is an idShort. Dots descend into collections by idShort; bracketed
//! integers index into an ordered `SubmodelElementList`.

use serde_json::Value;

use crate::core::error::{TitanError, TitanResult};

/// One step of an idShortPath.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Match a child by its `idShort`
    IdShort(String),
    /// Index into an ordered list
    Index(usize),
}

/// Parse an idShortPath into segments.
pub fn parse_id_short_path(path: &str) -> TitanResult<Vec<PathSegment>> {
    if path.is_empty() {
        return Err(TitanError::invalid_path(path, "empty path"));
    }

    let mut segments = Vec::new();
    let mut chars = path.chars();
    let mut current = String::new();
    let mut expect_segment = true;

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if current.is_empty() && segments.is_empty() {
                    return Err(TitanError::invalid_path(path, "leading dot"));
                }
                flush_segment(path, &mut current, &mut segments, expect_segment)?;
                expect_segment = true;
            }
            '[' => {
                flush_segment(path, &mut current, &mut segments, expect_segment)?;
                expect_segment = false;

                let mut digits = String::new();
                let mut closed = false;
                for d in chars.by_ref() {
                    if d == ']' {
                        closed = true;
                        break;
                    }
                    digits.push(d);
                }
                if !closed {
                    return Err(TitanError::invalid_path(path, "unterminated index"));
                }
                let index: usize = digits
                    .parse()
                    .map_err(|_| TitanError::invalid_path(path, "index is not an integer"))?;
                segments.push(PathSegment::Index(index));
            }
            ']' => {
                return Err(TitanError::invalid_path(path, "unmatched ']'"));
            }
            _ => {
                if !expect_segment && current.is_empty() {
                    // A segment directly after "]" must be introduced by "."
                    return Err(TitanError::invalid_path(path, "missing '.' after index"));
                }
                current.push(c);
            }
        }
    }

    if !current.is_empty() {
        segments.push(PathSegment::IdShort(std::mem::take(&mut current)));
    } else if expect_segment {
        return Err(TitanError::invalid_path(path, "trailing dot"));
    }

    Ok(segments)
}

fn flush_segment(
    path: &str,
    current: &mut String,
    segments: &mut Vec<PathSegment>,
    expect_segment: bool,
) -> TitanResult<()> {
    if current.is_empty() {
        if expect_segment {
            return Err(TitanError::invalid_path(path, "empty segment"));
        }
        return Ok(());
    }
    segments.push(PathSegment::IdShort(std::mem::take(current)));
    Ok(())
}

/// Render segments back into the canonical idShortPath string.
pub fn path_to_string(segments: &[PathSegment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            PathSegment::IdShort(s) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(s);
            }
            PathSegment::Index(i) => {
                out.push('[');
                out.push_str(&i.to_string());
                out.push(']');
            }
        }
    }
    out
}

/// The child array of a node: `submodelElements` at the Submodel root,
/// `value` inside containers.
pub fn children_of(node: &Value) -> Option<&Vec<Value>> {
    node.get("submodelElements")
        .or_else(|| node.get("value"))
        .and_then(Value::as_array)
}

/// Resolve an idShortPath against a Submodel document.
///
/// Returns `None` when any segment fails to match.
pub fn navigate<'a>(doc: &'a Value, segments: &[PathSegment]) -> Option<&'a Value> {
    let mut current = doc;
    for segment in segments {
        let children = children_of(current)?;
        current = match segment {
            PathSegment::IdShort(name) => children
                .iter()
                .find(|child| child.get("idShort").and_then(Value::as_str) == Some(name))?,
            PathSegment::Index(i) => children.get(*i)?,
        };
    }
    Some(current)
}

/// Parse and resolve in one step, mapping a miss to `ElementNotFound`.
pub fn resolve<'a>(doc: &'a Value, path: &str) -> TitanResult<&'a Value> {
    let segments = parse_id_short_path(path)?;
    navigate(doc, &segments).ok_or_else(|| TitanError::ElementNotFound { path: path.to_string() })
}
