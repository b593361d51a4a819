//! Cache key schema.
//!
//! Top-level entities: `titan:{entity_type}:{id_b64}`
//! Cached element values: `titan:submodel:{id_b64}:element:{idShortPath}`

use crate::core::model::EntityKind;

/// Prefix shared by every cache key.
pub const KEY_PREFIX: &str = "titan";

/// Key for a top-level entity's byte image.
pub fn entity_key(kind: EntityKind, identifier_b64: &str) -> String {
    format!("{KEY_PREFIX}:{}:{identifier_b64}", kind.as_str())
}

/// Key for a cached element value inside a submodel.
pub fn element_key(submodel_b64: &str, id_short_path: &str) -> String {
    format!("{KEY_PREFIX}:submodel:{submodel_b64}:element:{id_short_path}")
}

/// Match pattern for every cached element value of a submodel.
pub fn element_pattern(submodel_b64: &str) -> String {
    format!("{KEY_PREFIX}:submodel:{submodel_b64}:element:*")
}

/// Match pattern for every key the server owns.
pub fn all_pattern() -> String {
    format!("{KEY_PREFIX}:*")
}

/// Prefix-match used by the embedded cache, which has no glob scan.
pub fn element_key_prefix(submodel_b64: &str) -> String {
    format!("{KEY_PREFIX}:submodel:{submodel_b64}:element:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shapes() {
        assert_eq!(entity_key(EntityKind::Aas, "dXJuOng6MQ"), "titan:aas:dXJuOng6MQ");
        assert_eq!(
            entity_key(EntityKind::Submodel, "c20"),
            "titan:submodel:c20"
        );
        assert_eq!(
            element_key("c20", "Outer.P"),
            "titan:submodel:c20:element:Outer.P"
        );
        assert_eq!(element_pattern("c20"), "titan:submodel:c20:element:*");
        assert_eq!(all_pattern(), "titan:*");
    }

    #[test]
    fn test_element_pattern_matches_its_keys() {
        let key = element_key("c20", "A.B[2]");
        assert!(key.starts_with(&element_key_prefix("c20")));
    }
}
