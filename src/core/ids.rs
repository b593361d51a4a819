//! Identifier codec.
//!
//! AAS identifiers are URNs or URIs of arbitrary length. In URL path
//! segments they travel as unpadded Base64URL; invalid encodings are
//! rejected before any store is touched.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::core::error::{TitanError, TitanResult};

/// Maximum identifier length in bytes. Longer identifiers are rejected at
/// the persistence layer.
pub const MAX_IDENTIFIER_BYTES: usize = 4096;

/// Encode an identifier as unpadded Base64URL of its UTF-8 bytes.
pub fn encode_id(identifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(identifier.as_bytes())
}

/// Decode an unpadded Base64URL path segment back into the identifier.
///
/// Fails with `InvalidIdentifierEncoding` if the input contains characters
/// outside the Base64URL alphabet, has an invalid length, or does not decode
/// to UTF-8.
pub fn decode_id(encoded: &str) -> TitanResult<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| TitanError::InvalidIdentifierEncoding(encoded.to_string()))?;
    String::from_utf8(bytes).map_err(|_| TitanError::InvalidIdentifierEncoding(encoded.to_string()))
}

/// Check an identifier against the length cap.
pub fn validate_identifier_length(identifier: &str) -> TitanResult<()> {
    if identifier.len() > MAX_IDENTIFIER_BYTES {
        return Err(TitanError::InvalidDocument(format!(
            "identifier exceeds {MAX_IDENTIFIER_BYTES} bytes"
        )));
    }
    Ok(())
}
