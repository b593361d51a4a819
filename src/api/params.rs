//! Query parameter handling.

use serde::Deserialize;

use crate::core::error::{TitanError, TitanResult};
use crate::core::projection::{Extent, Level, ProjectionModifiers};

/// Default page size.
pub const DEFAULT_LIMIT: usize = 100;
/// Largest permitted page size.
pub const MAX_LIMIT: usize = 1000;

/// Common query parameters accepted by collection and entity reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadQuery {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
    pub level: Option<String>,
    pub extent: Option<String>,

    // Discovery filters
    #[serde(rename = "idShort")]
    pub id_short: Option<String>,
    #[serde(rename = "semanticId")]
    pub semantic_id: Option<String>,
    #[serde(rename = "globalAssetId")]
    pub global_asset_id: Option<String>,
    #[serde(rename = "assetIdName")]
    pub asset_id_name: Option<String>,
    #[serde(rename = "assetIdValue")]
    pub asset_id_value: Option<String>,
    #[serde(rename = "isCaseOf")]
    pub is_case_of: Option<String>,
    #[serde(rename = "dataSpecificationRef")]
    pub data_specification_ref: Option<String>,
}

impl ReadQuery {
    /// Validate and resolve the page size. Zero is allowed and yields an
    /// empty page whose cursor reports whether rows exist.
    pub fn resolve_limit(&self) -> TitanResult<usize> {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if limit > MAX_LIMIT {
            return Err(TitanError::InvalidDocument(format!(
                "limit must be at most {MAX_LIMIT}"
            )));
        }
        Ok(limit)
    }

    /// Parse the level/extent modifiers, defaulting to the identity
    /// projection.
    pub fn modifiers(&self) -> TitanResult<ProjectionModifiers> {
        let level = match self.level.as_deref() {
            Some(s) => Level::parse(s)?,
            None => Level::default(),
        };
        let extent = match self.extent.as_deref() {
            Some(s) => Extent::parse(s)?,
            None => Extent::default(),
        };
        Ok(ProjectionModifiers {
            level,
            extent,
            ..Default::default()
        })
    }

    /// Build the store-level filter from the discovery parameters.
    pub fn filter(&self) -> crate::persistence::store::ListFilter {
        crate::persistence::store::ListFilter {
            id_short: self.id_short.clone(),
            semantic_id: self.semantic_id.clone(),
            global_asset_id: self.global_asset_id.clone(),
            specific_asset_id: match (&self.asset_id_name, &self.asset_id_value) {
                (Some(name), Some(value)) => Some((name.clone(), value.clone())),
                _ => None,
            },
            is_case_of: self.is_case_of.clone(),
            data_specification_ref: self.data_specification_ref.clone(),
        }
    }
}

/// Compare a conditional-request header against the current ETag. Matches
/// the quoted form, the bare form, and the `*` wildcard.
pub fn etag_matches(header_value: &str, etag: &str) -> bool {
    let candidate = header_value.trim().trim_matches('"');
    candidate == "*" || candidate == etag
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::projection::ContentModifier;

    #[test]
    fn test_limit_defaults_and_bounds() {
        let query = ReadQuery::default();
        assert_eq!(query.resolve_limit().unwrap(), 100);

        let query = ReadQuery {
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(query.resolve_limit().unwrap(), 0);

        let query = ReadQuery {
            limit: Some(1001),
            ..Default::default()
        };
        assert!(query.resolve_limit().is_err());
    }

    #[test]
    fn test_modifiers_parse() {
        let query = ReadQuery {
            level: Some("core".into()),
            extent: Some("withoutBlobValue".into()),
            ..Default::default()
        };
        let modifiers = query.modifiers().unwrap();
        assert_eq!(modifiers.level, Level::Core);
        assert_eq!(modifiers.extent, Extent::WithoutBlobValue);
        assert_eq!(modifiers.content, ContentModifier::Normal);
        assert!(!modifiers.is_fast_path());
    }

    #[test]
    fn test_invalid_modifier_is_rejected() {
        let query = ReadQuery {
            level: Some("shallow".into()),
            ..Default::default()
        };
        assert!(query.modifiers().is_err());
    }

    #[test]
    fn test_etag_matching() {
        assert!(etag_matches("\"abc\"", "abc"));
        assert!(etag_matches("abc", "abc"));
        assert!(etag_matches("*", "anything"));
        assert!(!etag_matches("\"abc\"", "def"));
    }
}
