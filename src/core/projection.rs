//! Read-time projections.
//!
//! Four content modifiers transform a stored document when it is read:
//! `$value` (value-only form), `$metadata` (structural skeleton),
//! `$reference` (a ModelReference to the document), and `$path` (the
//! resolved idShortPath). The `level` modifier controls subtree depth and
//! `extent` controls Blob payload inclusion.

use serde_json::{json, Map, Value};

use crate::core::error::{TitanError, TitanResult};
use crate::core::model::ElementKind;

/// Subtree depth modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Level {
    /// Strip nested `submodelElements`
    Core,
    /// Preserve the whole subtree
    #[default]
    Deep,
}

impl Level {
    pub fn parse(s: &str) -> TitanResult<Level> {
        match s {
            "core" => Ok(Level::Core),
            "deep" => Ok(Level::Deep),
            other => Err(TitanError::InvalidDocument(format!(
                "invalid level modifier: {other}"
            ))),
        }
    }
}

/// Blob payload modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Extent {
    /// Keep `Blob` element values
    #[default]
    WithBlobValue,
    /// Drop the `value` field of every `Blob` element
    WithoutBlobValue,
}

impl Extent {
    pub fn parse(s: &str) -> TitanResult<Extent> {
        match s {
            "withBlobValue" => Ok(Extent::WithBlobValue),
            "withoutBlobValue" => Ok(Extent::WithoutBlobValue),
            other => Err(TitanError::InvalidDocument(format!(
                "invalid extent modifier: {other}"
            ))),
        }
    }
}

/// Content modifier carried as a trailing path token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentModifier {
    /// Full document
    #[default]
    Normal,
    /// `$value`
    Value,
    /// `$metadata`
    Metadata,
    /// `$reference`
    Reference,
    /// `$path`
    Path,
}

impl ContentModifier {
    /// Split a trailing `$...` token off an idShortPath, if present.
    pub fn split_path(path: &str) -> (&str, ContentModifier) {
        for (suffix, modifier) in [
            ("/$value", ContentModifier::Value),
            ("/$metadata", ContentModifier::Metadata),
            ("/$reference", ContentModifier::Reference),
            ("/$path", ContentModifier::Path),
        ] {
            if let Some(stripped) = path.strip_suffix(suffix) {
                return (stripped, modifier);
            }
        }
        (path, ContentModifier::Normal)
    }
}

/// The full modifier set applied to a read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionModifiers {
    pub level: Level,
    pub extent: Extent,
    pub content: ContentModifier,
}

impl ProjectionModifiers {
    /// Whether the read can stream stored bytes without parsing.
    pub fn is_fast_path(&self) -> bool {
        self.level == Level::Deep
            && self.extent == Extent::WithBlobValue
            && self.content == ContentModifier::Normal
    }
}

// ---------------------------------------------------------------------------
// $value
// ---------------------------------------------------------------------------

/// Value-only form of a SubmodelElement.
pub fn extract_value(element: &Value) -> Value {
    match ElementKind::of(element) {
        ElementKind::Property => element.get("value").cloned().unwrap_or(Value::Null),
        ElementKind::MultiLanguageProperty => {
            element.get("value").cloned().unwrap_or_else(|| json!([]))
        }
        ElementKind::Range => {
            let mut out = Map::new();
            if let Some(min) = element.get("min") {
                out.insert("min".into(), min.clone());
            }
            if let Some(max) = element.get("max") {
                out.insert("max".into(), max.clone());
            }
            Value::Object(out)
        }
        ElementKind::Blob | ElementKind::File => {
            let mut out = Map::new();
            if let Some(ct) = element.get("contentType") {
                out.insert("contentType".into(), ct.clone());
            }
            if let Some(v) = element.get("value") {
                out.insert("value".into(), v.clone());
            }
            Value::Object(out)
        }
        ElementKind::ReferenceElement => element.get("value").cloned().unwrap_or(Value::Null),
        ElementKind::RelationshipElement => json!({
            "first": element.get("first").cloned().unwrap_or(Value::Null),
            "second": element.get("second").cloned().unwrap_or(Value::Null),
        }),
        ElementKind::AnnotatedRelationshipElement => {
            let mut out = Map::new();
            out.insert(
                "first".into(),
                element.get("first").cloned().unwrap_or(Value::Null),
            );
            out.insert(
                "second".into(),
                element.get("second").cloned().unwrap_or(Value::Null),
            );
            if let Some(annotations) = element.get("annotations").and_then(Value::as_array) {
                out.insert(
                    "annotations".into(),
                    Value::Array(annotations.iter().map(extract_value).collect()),
                );
            }
            Value::Object(out)
        }
        ElementKind::SubmodelElementCollection | ElementKind::SubmodelElementList => {
            let children = element
                .get("value")
                .and_then(Value::as_array)
                .map(|items| items.iter().map(extract_value).collect())
                .unwrap_or_default();
            Value::Array(children)
        }
        ElementKind::Entity => {
            let mut out = Map::new();
            out.insert(
                "entityType".into(),
                element.get("entityType").cloned().unwrap_or(Value::Null),
            );
            if let Some(gid) = element.get("globalAssetId") {
                out.insert("globalAssetId".into(), gid.clone());
            }
            if let Some(statements) = element.get("statements").and_then(Value::as_array) {
                out.insert(
                    "statements".into(),
                    Value::Array(statements.iter().map(extract_value).collect()),
                );
            }
            Value::Object(out)
        }
        ElementKind::BasicEventElement => element.get("observed").cloned().unwrap_or(Value::Null),
        // Operations and capabilities have no runtime value
        ElementKind::Operation | ElementKind::Capability => Value::Null,
        ElementKind::Unrecognized(_) => element.get("value").cloned().unwrap_or(Value::Null),
    }
}

/// `$value` of a whole Submodel: the value form of each root element.
pub fn extract_submodel_value(doc: &Value) -> Value {
    let values = doc
        .get("submodelElements")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(extract_value).collect())
        .unwrap_or_default();
    Value::Array(values)
}

// ---------------------------------------------------------------------------
// $metadata
// ---------------------------------------------------------------------------

const METADATA_FIELDS: &[&str] = &[
    "modelType",
    "idShort",
    "id",
    "category",
    "displayName",
    "description",
    "semanticId",
    "supplementalSemanticIds",
    "qualifiers",
    "kind",
    "valueType",
    "administration",
    "contentType",
    "entityType",
    "orderRelevant",
    "typeValueListElement",
    "valueTypeListElement",
];

/// Structural skeleton of an element without runtime values.
pub fn extract_metadata(element: &Value) -> Value {
    let Some(obj) = element.as_object() else {
        return element.clone();
    };

    let mut out = Map::new();
    for (key, value) in obj {
        if METADATA_FIELDS.contains(&key.as_str()) {
            out.insert(key.clone(), value.clone());
        }
    }

    // Containers keep their structure with child metadata
    if ElementKind::of(element).is_container() {
        if let Some(children) = element.get("value").and_then(Value::as_array) {
            out.insert(
                "value".into(),
                Value::Array(children.iter().map(extract_metadata).collect()),
            );
        }
    }
    if let Some(children) = element.get("submodelElements").and_then(Value::as_array) {
        out.insert(
            "submodelElements".into(),
            Value::Array(children.iter().map(extract_metadata).collect()),
        );
    }

    Value::Object(out)
}

// ---------------------------------------------------------------------------
// $reference and $path
// ---------------------------------------------------------------------------

/// ModelReference to an AAS.
pub fn reference_for_aas(identifier: &str) -> Value {
    json!({
        "type": "ModelReference",
        "keys": [{"type": "AssetAdministrationShell", "value": identifier}]
    })
}

/// ModelReference to a Submodel.
pub fn reference_for_submodel(identifier: &str) -> Value {
    json!({
        "type": "ModelReference",
        "keys": [{"type": "Submodel", "value": identifier}]
    })
}

/// ModelReference to an element inside a Submodel. The second key's type is
/// the resolved element kind and its value is the idShortPath.
pub fn reference_for_element(submodel_id: &str, id_short_path: &str, element: &Value) -> Value {
    let key_type = ElementKind::of(element).reference_key_type().to_string();
    json!({
        "type": "ModelReference",
        "keys": [
            {"type": "Submodel", "value": submodel_id},
            {"type": key_type, "value": id_short_path}
        ]
    })
}

/// `$path` form of a resolved element.
pub fn extract_path(id_short_path: &str) -> Value {
    json!({"idShortPath": id_short_path})
}

// ---------------------------------------------------------------------------
// level / extent
// ---------------------------------------------------------------------------

/// Apply the `level` and `extent` modifiers to a document.
pub fn apply_projection(doc: &Value, modifiers: &ProjectionModifiers) -> Value {
    let mut out = doc.clone();

    if modifiers.level == Level::Core {
        if let Some(obj) = out.as_object_mut() {
            obj.remove("submodelElements");
        }
    }

    if modifiers.extent == Extent::WithoutBlobValue {
        strip_blob_values(&mut out);
    }

    out
}

fn strip_blob_values(node: &mut Value) {
    if let Some(obj) = node.as_object_mut() {
        if obj.get("modelType").and_then(Value::as_str) == Some("Blob") {
            obj.remove("value");
            return;
        }
    }
    let key = if node.get("submodelElements").is_some() {
        "submodelElements"
    } else {
        "value"
    };
    if let Some(children) = node.get_mut(key).and_then(Value::as_array_mut) {
        for child in children {
            if child.is_object() {
                strip_blob_values(child);
            }
        }
    }
}

/// Look up an element's parent chain to confirm the path exists, then apply
/// the content modifier to the resolved element.
pub fn project_element(
    element: &Value,
    submodel_id: &str,
    id_short_path: &str,
    modifiers: &ProjectionModifiers,
) -> Value {
    match modifiers.content {
        ContentModifier::Normal => apply_projection(element, modifiers),
        ContentModifier::Value => extract_value(element),
        ContentModifier::Metadata => extract_metadata(element),
        ContentModifier::Reference => reference_for_element(submodel_id, id_short_path, element),
        ContentModifier::Path => extract_path(id_short_path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_property_value() {
        let element = json!({
            "modelType": "Property",
            "idShort": "Temperature",
            "valueType": "xs:double",
            "value": "25.5"
        });
        assert_eq!(extract_value(&element), json!("25.5"));
    }

    #[test]
    fn test_range_value() {
        let element = json!({
            "modelType": "Range",
            "idShort": "TemperatureRange",
            "valueType": "xs:double",
            "min": "10.0",
            "max": "50.0"
        });
        assert_eq!(extract_value(&element), json!({"min": "10.0", "max": "50.0"}));
    }

    #[test]
    fn test_collection_value_recurses() {
        let element = json!({
            "modelType": "SubmodelElementCollection",
            "idShort": "Measurements",
            "value": [
                {"modelType": "Property", "idShort": "Temp", "value": "25"},
                {"modelType": "Property", "idShort": "Pressure", "value": "101.3"}
            ]
        });
        assert_eq!(extract_value(&element), json!(["25", "101.3"]));
    }

    #[test]
    fn test_entity_value() {
        let element = json!({
            "modelType": "Entity",
            "idShort": "Motor",
            "entityType": "SelfManagedEntity",
            "globalAssetId": "urn:example:asset:motor-001"
        });
        let value = extract_value(&element);
        assert_eq!(value["entityType"], "SelfManagedEntity");
        assert_eq!(value["globalAssetId"], "urn:example:asset:motor-001");
    }

    #[test]
    fn test_unrecognized_element_value_passthrough() {
        let element = json!({"modelType": "FutureElement", "value": {"x": 1}});
        assert_eq!(extract_value(&element), json!({"x": 1}));
    }

    #[test]
    fn test_metadata_drops_runtime_values() {
        let element = json!({
            "modelType": "Property",
            "idShort": "Temperature",
            "valueType": "xs:double",
            "value": "25.5",
            "semanticId": {
                "type": "ExternalReference",
                "keys": [{"type": "GlobalReference", "value": "0173-1#02-AAB994#007"}]
            }
        });
        let meta = extract_metadata(&element);
        assert_eq!(meta["modelType"], "Property");
        assert_eq!(meta["idShort"], "Temperature");
        assert_eq!(meta["valueType"], "xs:double");
        assert_eq!(meta["semanticId"]["type"], "ExternalReference");
        assert!(meta.get("value").is_none());
    }

    #[test]
    fn test_metadata_recurses_into_containers() {
        let element = json!({
            "modelType": "SubmodelElementCollection",
            "idShort": "Measurements",
            "value": [
                {"modelType": "Property", "idShort": "Temp", "value": "25", "valueType": "xs:double"}
            ]
        });
        let meta = extract_metadata(&element);
        assert_eq!(meta["value"][0]["idShort"], "Temp");
        assert!(meta["value"][0].get("value").is_none());
    }

    #[test]
    fn test_submodel_metadata_preserves_identity() {
        let doc = json!({
            "id": "urn:example:submodel:tech-data",
            "idShort": "TechnicalData",
            "kind": "Instance",
            "submodelElements": [
                {"modelType": "Property", "idShort": "MaxPayload", "value": "16.0"}
            ]
        });
        let meta = extract_metadata(&doc);
        assert_eq!(meta["id"], "urn:example:submodel:tech-data");
        assert_eq!(meta["kind"], "Instance");
        assert_eq!(meta["submodelElements"][0]["idShort"], "MaxPayload");
        assert!(meta["submodelElements"][0].get("value").is_none());
    }

    #[test]
    fn test_reference_for_element() {
        let element = json!({"modelType": "Property", "idShort": "SerialNumber"});
        let reference =
            reference_for_element("urn:example:submodel:nameplate", "Identification.SerialNumber", &element);
        assert_eq!(reference["type"], "ModelReference");
        assert_eq!(reference["keys"][0], json!({"type": "Submodel", "value": "urn:example:submodel:nameplate"}));
        assert_eq!(
            reference["keys"][1],
            json!({"type": "Property", "value": "Identification.SerialNumber"})
        );
    }

    #[test]
    fn test_reference_for_aas() {
        let reference = reference_for_aas("urn:example:aas:robot-001");
        assert_eq!(reference["keys"][0]["type"], "AssetAdministrationShell");
        assert_eq!(reference["keys"][0]["value"], "urn:example:aas:robot-001");
    }

    #[test]
    fn test_path_projection() {
        assert_eq!(
            extract_path("Measurements[0].Value"),
            json!({"idShortPath": "Measurements[0].Value"})
        );
    }

    #[test]
    fn test_core_level_strips_elements() {
        let doc = json!({
            "id": "urn:example:submodel:001",
            "idShort": "Test",
            "submodelElements": [{"modelType": "Property", "idShort": "P1"}]
        });
        let modifiers = ProjectionModifiers {
            level: Level::Core,
            ..Default::default()
        };
        let projected = apply_projection(&doc, &modifiers);
        assert!(projected.get("id").is_some());
        assert!(projected.get("submodelElements").is_none());
    }

    #[test]
    fn test_without_blob_value_strips_only_blobs() {
        let doc = json!({
            "submodelElements": [
                {"modelType": "Blob", "idShort": "Image", "contentType": "image/png", "value": "base64data"},
                {"modelType": "Property", "idShort": "Name", "value": "test"}
            ]
        });
        let modifiers = ProjectionModifiers {
            extent: Extent::WithoutBlobValue,
            ..Default::default()
        };
        let projected = apply_projection(&doc, &modifiers);
        assert!(projected["submodelElements"][0].get("value").is_none());
        assert_eq!(projected["submodelElements"][1]["value"], "test");
    }

    #[test]
    fn test_fast_path_detection() {
        assert!(ProjectionModifiers::default().is_fast_path());
        assert!(!ProjectionModifiers {
            level: Level::Core,
            ..Default::default()
        }
        .is_fast_path());
        assert!(!ProjectionModifiers {
            content: ContentModifier::Value,
            ..Default::default()
        }
        .is_fast_path());
    }

    #[test]
    fn test_content_modifier_path_split() {
        assert_eq!(
            ContentModifier::split_path("Outer.P/$value"),
            ("Outer.P", ContentModifier::Value)
        );
        assert_eq!(
            ContentModifier::split_path("Outer.P"),
            ("Outer.P", ContentModifier::Normal)
        );
        assert_eq!(
            ContentModifier::split_path("Items[0]/$path"),
            ("Items[0]", ContentModifier::Path)
        );
    }
}
