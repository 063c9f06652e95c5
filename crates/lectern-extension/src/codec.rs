//! Text and binary codecs.

use crate::error::{ExtensionError, ExtensionResult};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters left untouched by [`url_encode`] (RFC 3986 unreserved set).
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Encode bytes as standard padded base64.
pub fn base64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode base64, accepting padded, unpadded and URL-safe alphabets.
pub fn base64_decode(text: &str) -> ExtensionResult<Vec<u8>> {
    let text = text.trim();
    [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(text).ok())
        .ok_or_else(|| ExtensionError::Decode("invalid base64 input".to_string()))
}

/// Encode bytes as lower-case hex.
pub fn hex_encode(data: &[u8]) -> String {
    hex::encode(data)
}

/// Decode hex (either case).
pub fn hex_decode(text: &str) -> ExtensionResult<Vec<u8>> {
    hex::decode(text.trim()).map_err(|e| ExtensionError::Decode(e.to_string()))
}

/// Percent-encode a URL component.
pub fn url_encode(text: &str) -> String {
    utf8_percent_encode(text, COMPONENT).to_string()
}

/// Decode a percent-encoded component. `+` is treated as a space.
pub fn url_decode(text: &str) -> ExtensionResult<String> {
    let spaced = text.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| ExtensionError::Decode(e.to_string()))
}

/// UTF-8 bytes of a string.
pub fn utf8_bytes(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_variants() {
        assert_eq!(base64_encode(b"lectern"), "bGVjdGVybg==");
        assert_eq!(base64_decode("bGVjdGVybg==").unwrap(), b"lectern");
        assert_eq!(base64_decode("bGVjdGVybg").unwrap(), b"lectern");
        assert!(base64_decode("***").is_err());
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex_encode(&[0xde, 0xad]), "dead");
        assert_eq!(hex_decode("DEAD").unwrap(), vec![0xde, 0xad]);
        assert!(hex_decode("xyz").is_err());
    }

    #[test]
    fn test_url_codec() {
        assert_eq!(url_encode("a b/c~"), "a%20b%2Fc~");
        assert_eq!(url_decode("a+b%2Fc").unwrap(), "a b/c");
        assert_eq!(url_decode(&url_encode("标题")).unwrap(), "标题");
        assert!(url_decode("%ff").is_err());
    }
}
