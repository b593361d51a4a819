//! Entity model and `modelType` dispatch.
//!
//! Documents are stored as schemaless JSON; this module provides the typed
//! views the rest of the server needs. SubmodelElement polymorphism is a
//! tagged sum keyed by the `modelType` string, with unknown types preserved
//! as an opaque `Unrecognized` variant so forward-compatible documents round
//! trip unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{TitanError, TitanResult};

/// First-class entity classes stored by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Asset Administration Shell (Repository)
    Aas,
    /// Submodel (Repository)
    Submodel,
    /// Concept Description (Repository)
    ConceptDescription,
    /// Shell descriptor (Registry)
    AasDescriptor,
    /// Submodel descriptor (Registry)
    SubmodelDescriptor,
}

impl EntityKind {
    /// Wire name used in events, cache keys, and invalidation messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Aas => "aas",
            EntityKind::Submodel => "submodel",
            EntityKind::ConceptDescription => "concept_description",
            EntityKind::AasDescriptor => "aas_descriptor",
            EntityKind::SubmodelDescriptor => "submodel_descriptor",
        }
    }

    /// Human-readable entity class name used in error bodies.
    pub fn display_name(&self) -> &'static str {
        match self {
            EntityKind::Aas => "AssetAdministrationShell",
            EntityKind::Submodel => "Submodel",
            EntityKind::ConceptDescription => "ConceptDescription",
            EntityKind::AasDescriptor => "AssetAdministrationShellDescriptor",
            EntityKind::SubmodelDescriptor => "SubmodelDescriptor",
        }
    }

    /// All entity kinds, in persistence layout order.
    pub fn all() -> [EntityKind; 5] {
        [
            EntityKind::Aas,
            EntityKind::Submodel,
            EntityKind::ConceptDescription,
            EntityKind::AasDescriptor,
            EntityKind::SubmodelDescriptor,
        ]
    }
}

/// SubmodelElement kinds, discriminated on the `modelType` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementKind {
    Property,
    MultiLanguageProperty,
    Range,
    Blob,
    File,
    ReferenceElement,
    RelationshipElement,
    AnnotatedRelationshipElement,
    SubmodelElementCollection,
    SubmodelElementList,
    Entity,
    Operation,
    Capability,
    BasicEventElement,
    /// Unknown `modelType`; the element is carried through untouched.
    Unrecognized(String),
}

impl ElementKind {
    /// Dispatch on a `modelType` string.
    pub fn from_model_type(model_type: &str) -> ElementKind {
        match model_type {
            "Property" => ElementKind::Property,
            "MultiLanguageProperty" => ElementKind::MultiLanguageProperty,
            "Range" => ElementKind::Range,
            "Blob" => ElementKind::Blob,
            "File" => ElementKind::File,
            "ReferenceElement" => ElementKind::ReferenceElement,
            "RelationshipElement" => ElementKind::RelationshipElement,
            "AnnotatedRelationshipElement" => ElementKind::AnnotatedRelationshipElement,
            "SubmodelElementCollection" => ElementKind::SubmodelElementCollection,
            "SubmodelElementList" => ElementKind::SubmodelElementList,
            "Entity" => ElementKind::Entity,
            "Operation" => ElementKind::Operation,
            "Capability" => ElementKind::Capability,
            "BasicEventElement" => ElementKind::BasicEventElement,
            other => ElementKind::Unrecognized(other.to_string()),
        }
    }

    /// Dispatch on an element document.
    pub fn of(element: &Value) -> ElementKind {
        match element.get("modelType").and_then(Value::as_str) {
            Some(mt) => ElementKind::from_model_type(mt),
            None => ElementKind::Unrecognized(String::new()),
        }
    }

    /// Key type used when building a `ModelReference` to an element of this
    /// kind.
    pub fn reference_key_type(&self) -> &str {
        match self {
            ElementKind::Property => "Property",
            ElementKind::MultiLanguageProperty => "MultiLanguageProperty",
            ElementKind::Range => "Range",
            ElementKind::Blob => "Blob",
            ElementKind::File => "File",
            ElementKind::ReferenceElement => "ReferenceElement",
            ElementKind::RelationshipElement => "RelationshipElement",
            ElementKind::AnnotatedRelationshipElement => "AnnotatedRelationshipElement",
            ElementKind::SubmodelElementCollection => "SubmodelElementCollection",
            ElementKind::SubmodelElementList => "SubmodelElementList",
            ElementKind::Entity => "Entity",
            ElementKind::Operation => "Operation",
            ElementKind::Capability => "Capability",
            ElementKind::BasicEventElement => "BasicEventElement",
            ElementKind::Unrecognized(_) => "SubmodelElement",
        }
    }

    /// Whether elements of this kind contain child elements in `value`.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            ElementKind::SubmodelElementCollection | ElementKind::SubmodelElementList
        )
    }
}

// ---------------------------------------------------------------------------
// Secondary attribute extraction
// ---------------------------------------------------------------------------

/// The primary identifier of any entity document.
pub fn identifier_of(doc: &Value) -> TitanResult<&str> {
    doc.get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TitanError::InvalidDocument("missing required string field 'id'".into()))
}

/// `assetInformation.globalAssetId`, indexed for discovery on shells and
/// shell descriptors.
pub fn extract_global_asset_id(doc: &Value) -> Option<String> {
    doc.get("assetInformation")
        .and_then(|ai| ai.get("globalAssetId"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            // Descriptors carry globalAssetId at the top level
            doc.get("globalAssetId").and_then(Value::as_str).map(str::to_string)
        })
}

/// The value of the last key of `semanticId`, indexed for semantic queries
/// on submodels and submodel descriptors.
pub fn extract_semantic_id(doc: &Value) -> Option<String> {
    doc.get("semanticId")
        .and_then(|s| s.get("keys"))
        .and_then(Value::as_array)
        .and_then(|keys| keys.last())
        .and_then(|k| k.get("value"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// `assetInformation.specificAssetIds` as `(name, value)` pairs.
pub fn extract_specific_asset_ids(doc: &Value) -> Vec<(String, String)> {
    doc.get("assetInformation")
        .and_then(|ai| ai.get("specificAssetIds"))
        .or_else(|| doc.get("specificAssetIds"))
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(|entry| {
                    let name = entry.get("name").and_then(Value::as_str)?;
                    let value = entry.get("value").and_then(Value::as_str)?;
                    Some((name.to_string(), value.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// All key values in `isCaseOf` references of a ConceptDescription.
pub fn extract_is_case_of_values(doc: &Value) -> Vec<String> {
    reference_key_values(doc.get("isCaseOf"))
}

/// All `dataSpecification` key values of a ConceptDescription's embedded
/// data specifications.
pub fn extract_data_specification_refs(doc: &Value) -> Vec<String> {
    doc.get("embeddedDataSpecifications")
        .and_then(Value::as_array)
        .map(|specs| {
            specs
                .iter()
                .filter_map(|s| s.get("dataSpecification"))
                .filter_map(|r| r.get("keys").and_then(Value::as_array))
                .flatten()
                .filter_map(|k| k.get("value").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn reference_key_values(refs: Option<&Value>) -> Vec<String> {
    refs.and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|r| r.get("keys").and_then(Value::as_array))
                .flatten()
                .filter_map(|k| k.get("value").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Structural validation
// ---------------------------------------------------------------------------

/// Validate the structural minimum the schema dictates for an entity class.
///
/// This is deliberately shallow. Full content validation belongs to the
/// schema layer; the store only needs the fields it indexes and navigates.
pub fn validate_entity(kind: EntityKind, doc: &Value) -> TitanResult<()> {
    if !doc.is_object() {
        return Err(TitanError::InvalidDocument("document must be a JSON object".into()));
    }
    identifier_of(doc)?;

    match kind {
        EntityKind::Aas => {
            let info = doc.get("assetInformation").ok_or_else(|| {
                TitanError::InvalidDocument("missing required field 'assetInformation'".into())
            })?;
            if !info.is_object() {
                return Err(TitanError::InvalidDocument(
                    "'assetInformation' must be an object".into(),
                ));
            }
        }
        EntityKind::Submodel => {
            if let Some(elements) = doc.get("submodelElements") {
                validate_element_array(elements)?;
            }
        }
        EntityKind::ConceptDescription
        | EntityKind::AasDescriptor
        | EntityKind::SubmodelDescriptor => {}
    }
    Ok(())
}

/// Validate a single SubmodelElement document.
pub fn validate_element(element: &Value) -> TitanResult<()> {
    let obj = element
        .as_object()
        .ok_or_else(|| TitanError::InvalidDocument("element must be a JSON object".into()))?;
    if !obj.get("modelType").map(Value::is_string).unwrap_or(false) {
        return Err(TitanError::InvalidDocument(
            "element missing required string field 'modelType'".into(),
        ));
    }
    if ElementKind::of(element).is_container() {
        if let Some(children) = element.get("value") {
            validate_element_array(children)?;
        }
    }
    Ok(())
}

fn validate_element_array(elements: &Value) -> TitanResult<()> {
    let arr = elements
        .as_array()
        .ok_or_else(|| TitanError::InvalidDocument("element container must be an array".into()))?;
    for element in arr {
        validate_element(element)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_element_kind_dispatch() {
        assert_eq!(ElementKind::from_model_type("Property"), ElementKind::Property);
        assert_eq!(
            ElementKind::from_model_type("SubmodelElementList"),
            ElementKind::SubmodelElementList
        );
        assert_eq!(
            ElementKind::from_model_type("FutureElement"),
            ElementKind::Unrecognized("FutureElement".to_string())
        );
    }

    #[test]
    fn test_unrecognized_reference_key_type() {
        let kind = ElementKind::from_model_type("FutureElement");
        assert_eq!(kind.reference_key_type(), "SubmodelElement");
    }

    #[test]
    fn test_extract_global_asset_id() {
        let doc = json!({
            "id": "urn:x:aas",
            "assetInformation": {"assetKind": "Instance", "globalAssetId": "urn:asset:1"}
        });
        assert_eq!(extract_global_asset_id(&doc).as_deref(), Some("urn:asset:1"));
    }

    #[test]
    fn test_extract_global_asset_id_from_descriptor() {
        let doc = json!({"id": "urn:x:d", "globalAssetId": "urn:asset:2"});
        assert_eq!(extract_global_asset_id(&doc).as_deref(), Some("urn:asset:2"));
    }

    #[test]
    fn test_extract_semantic_id_uses_last_key() {
        let doc = json!({
            "id": "urn:x:sm",
            "semanticId": {
                "type": "ModelReference",
                "keys": [
                    {"type": "Submodel", "value": "urn:tmpl:outer"},
                    {"type": "GlobalReference", "value": "urn:sem:inner"}
                ]
            }
        });
        assert_eq!(extract_semantic_id(&doc).as_deref(), Some("urn:sem:inner"));
    }

    #[test]
    fn test_extract_specific_asset_ids() {
        let doc = json!({
            "assetInformation": {
                "specificAssetIds": [
                    {"name": "serial", "value": "SN-1"},
                    {"name": "batch", "value": "B-7"}
                ]
            }
        });
        let ids = extract_specific_asset_ids(&doc);
        assert_eq!(ids, vec![("serial".into(), "SN-1".into()), ("batch".into(), "B-7".into())]);
    }

    #[test]
    fn test_validate_aas_requires_asset_information() {
        let doc = json!({"id": "urn:x:1", "idShort": "A"});
        assert!(validate_entity(EntityKind::Aas, &doc).is_err());

        let doc = json!({"id": "urn:x:1", "assetInformation": {"assetKind": "Instance"}});
        assert!(validate_entity(EntityKind::Aas, &doc).is_ok());
    }

    #[test]
    fn test_validate_submodel_rejects_untyped_elements() {
        let doc = json!({
            "id": "urn:x:sm",
            "submodelElements": [{"idShort": "NoType"}]
        });
        assert!(validate_entity(EntityKind::Submodel, &doc).is_err());
    }

    #[test]
    fn test_validate_requires_id() {
        let doc = json!({"idShort": "A"});
        assert!(validate_entity(EntityKind::ConceptDescription, &doc).is_err());
    }

    #[test]
    fn test_is_case_of_extraction() {
        let doc = json!({
            "id": "urn:x:cd",
            "isCaseOf": [
                {"type": "ExternalReference", "keys": [{"type": "GlobalReference", "value": "0173-1#01"}]}
            ]
        });
        assert_eq!(extract_is_case_of_values(&doc), vec!["0173-1#01".to_string()]);
    }
}
