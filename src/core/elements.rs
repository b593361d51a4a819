//! SubmodelElement operations.
//!
//! Pure functions over Submodel documents. Every operation returns a new
//! document and leaves its input untouched; persistence of the result is the
//! caller's concern. Collections enforce idShort uniqueness, ordered lists
//! do not.

use serde_json::Value;

use crate::core::error::{TitanError, TitanResult};
use crate::core::model::{validate_element, ElementKind};
use crate::core::path::{parse_id_short_path, path_to_string, PathSegment};

/// Insert a new element at the Submodel root (`parent_path` = `None`) or
/// into the container addressed by `parent_path`.
pub fn insert(doc: &Value, parent_path: Option<&str>, element: &Value) -> TitanResult<Value> {
    validate_element(element)?;
    let mut result = doc.clone();
    let id_short = element.get("idShort").and_then(Value::as_str);

    match parent_path {
        None | Some("") => {
            let id_short = id_short.ok_or_else(|| {
                TitanError::InvalidDocument("element must have an idShort".into())
            })?;
            let elements = root_elements_mut(&mut result)?;
            if find_by_id_short(elements, id_short).is_some() {
                return Err(TitanError::ElementAlreadyExists {
                    path: id_short.to_string(),
                });
            }
            elements.push(element.clone());
        }
        Some(path) => {
            let segments = parse_id_short_path(path)?;
            let container = navigate_mut(&mut result, &segments)
                .ok_or_else(|| TitanError::invalid_path(path, "parent container not found"))?;

            match ElementKind::of(container) {
                ElementKind::SubmodelElementCollection => {
                    let id_short = id_short.ok_or_else(|| {
                        TitanError::InvalidDocument("element must have an idShort".into())
                    })?;
                    let children = container_children_mut(container)?;
                    if find_by_id_short(children, id_short).is_some() {
                        return Err(TitanError::ElementAlreadyExists {
                            path: format!("{path}.{id_short}"),
                        });
                    }
                    children.push(element.clone());
                }
                ElementKind::SubmodelElementList => {
                    // Lists permit duplicates and ignore idShort
                    container_children_mut(container)?.push(element.clone());
                }
                _ => return Err(TitanError::invalid_path(path, "target is not a container")),
            }
        }
    }

    Ok(result)
}

/// Replace the element at `path` with a new element.
pub fn replace(doc: &Value, path: &str, element: &Value) -> TitanResult<Value> {
    validate_element(element)?;
    with_target(doc, path, |elements, target| {
        let index = locate(elements, target)
            .ok_or_else(|| TitanError::ElementNotFound { path: path.to_string() })?;
        elements[index] = element.clone();
        Ok(())
    })
}

/// Shallow-merge `updates` into the element at `path`.
pub fn patch(doc: &Value, path: &str, updates: &Value) -> TitanResult<Value> {
    let updates = updates
        .as_object()
        .ok_or_else(|| TitanError::InvalidDocument("patch body must be a JSON object".into()))?;
    with_target(doc, path, |elements, target| {
        let index = locate(elements, target)
            .ok_or_else(|| TitanError::ElementNotFound { path: path.to_string() })?;
        let element = elements[index]
            .as_object_mut()
            .ok_or_else(|| TitanError::InvalidDocument("element is not an object".into()))?;
        for (key, value) in updates {
            element.insert(key.clone(), value.clone());
        }
        Ok(())
    })
}

/// Patch only the `value` field of the element at `path`.
pub fn update_value(doc: &Value, path: &str, value: &Value) -> TitanResult<Value> {
    with_target(doc, path, |elements, target| {
        let index = locate(elements, target)
            .ok_or_else(|| TitanError::ElementNotFound { path: path.to_string() })?;
        let element = elements[index]
            .as_object_mut()
            .ok_or_else(|| TitanError::InvalidDocument("element is not an object".into()))?;
        element.insert("value".to_string(), value.clone());
        Ok(())
    })
}

/// Remove the element at `path`.
pub fn delete(doc: &Value, path: &str) -> TitanResult<Value> {
    with_target(doc, path, |elements, target| {
        let index = locate(elements, target)
            .ok_or_else(|| TitanError::ElementNotFound { path: path.to_string() })?;
        elements.remove(index);
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Tree plumbing
// ---------------------------------------------------------------------------

/// Run `op` against the sibling array containing the element addressed by
/// `path`, returning the modified document.
fn with_target<F>(doc: &Value, path: &str, op: F) -> TitanResult<Value>
where
    F: FnOnce(&mut Vec<Value>, &PathSegment) -> TitanResult<()>,
{
    let segments = parse_id_short_path(path)?;
    let (parent_segments, target) = match segments.split_last() {
        Some((target, parents)) => (parents, target),
        None => return Err(TitanError::invalid_path(path, "empty path")),
    };

    let mut result = doc.clone();
    let elements = if parent_segments.is_empty() {
        root_elements_mut(&mut result)?
    } else {
        let container = navigate_mut(&mut result, parent_segments).ok_or_else(|| {
            TitanError::ElementNotFound {
                path: path_to_string(parent_segments),
            }
        })?;
        container_children_mut(container)?
    };

    op(elements, target)?;
    Ok(result)
}

fn root_elements_mut(doc: &mut Value) -> TitanResult<&mut Vec<Value>> {
    array_entry_mut(doc, "submodelElements")
}

fn container_children_mut(container: &mut Value) -> TitanResult<&mut Vec<Value>> {
    array_entry_mut(container, "value")
}

fn array_entry_mut<'a>(node: &'a mut Value, key: &str) -> TitanResult<&'a mut Vec<Value>> {
    let obj = node
        .as_object_mut()
        .ok_or_else(|| TitanError::InvalidDocument("document must be a JSON object".into()))?;
    obj.entry(key).or_insert_with(|| Value::Array(Vec::new()));
    obj.get_mut(key)
        .and_then(Value::as_array_mut)
        .ok_or_else(|| TitanError::InvalidDocument(format!("'{key}' must be an array")))
}

fn navigate_mut<'a>(doc: &'a mut Value, segments: &[PathSegment]) -> Option<&'a mut Value> {
    let mut current = doc;
    for segment in segments {
        let key = if current.get("submodelElements").is_some() {
            "submodelElements"
        } else {
            "value"
        };
        let children = current.get_mut(key)?.as_array_mut()?;
        let index = match segment {
            PathSegment::IdShort(name) => children
                .iter()
                .position(|c| c.get("idShort").and_then(Value::as_str) == Some(name))?,
            PathSegment::Index(i) => {
                if *i >= children.len() {
                    return None;
                }
                *i
            }
        };
        current = &mut children[index];
    }
    Some(current)
}

fn find_by_id_short<'a>(elements: &'a [Value], id_short: &str) -> Option<&'a Value> {
    elements
        .iter()
        .find(|e| e.get("idShort").and_then(Value::as_str) == Some(id_short))
}

fn locate(elements: &[Value], target: &PathSegment) -> Option<usize> {
    match target {
        PathSegment::IdShort(name) => elements
            .iter()
            .position(|e| e.get("idShort").and_then(Value::as_str) == Some(name)),
        PathSegment::Index(i) => {
            if *i < elements.len() {
                Some(*i)
            } else {
                None
            }
        }
    }
}
