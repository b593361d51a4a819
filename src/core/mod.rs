//! # Core Domain Logic
//!
//! Pure domain logic shared by every layer of the server:
//! - Identifier codec (unpadded Base64URL at the API boundary)
//! - Canonical JSON byte images and content-addressed ETags
//! - Entity model, `modelType` dispatch, and secondary attribute extraction
//! - idShortPath grammar and Submodel tree navigation
//! - Projection modifiers (`$value`, `$metadata`, `$reference`, `$path`)
//! - SubmodelElement operations (insert, replace, patch, delete)
//!
//! Everything in this module is side-effect free. Persistence, caching, and
//! event fan-out build on these primitives but are defined elsewhere.

pub mod canonical;
pub mod elements;
pub mod error;
pub mod ids;
pub mod model;
pub mod path;
pub mod projection;

pub use canonical::{canonical_bytes, canonical_triple, etag_of};
pub use error::{TitanError, TitanResult};
pub use ids::{decode_id, encode_id, MAX_IDENTIFIER_BYTES};
pub use model::{ElementKind, EntityKind};
pub use path::{parse_id_short_path, PathSegment};
pub use projection::{ContentModifier, Extent, Level, ProjectionModifiers};
