//! Encoding detection and transcoding.
//!
//! Implements BOM sniffing per XML 1.0 Appendix F and bridges to
//! `encoding_rs` for character encoding conversion. The input buffer layers
//! the rest of the detection pipeline on top of this module: explicit stream
//! encoding (certain) → BOM sniff → UTF-8 default → declared-encoding
//! override once the XML/text declaration has been read.

use std::fmt;

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};

/// An error that occurs during encoding detection or transcoding.
#[derive(Debug, Clone)]
pub struct EncodingError {
    /// A human-readable description of the encoding error.
    pub message: String,
}

impl EncodingError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for EncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "encoding error: {}", self.message)
    }
}

impl std::error::Error for EncodingError {}

/// The outcome of sniffing the first bytes of an input.
#[derive(Debug, Clone, Copy)]
pub struct SniffedEncoding {
    /// The encoding indicated by the byte-order mark, or UTF-8 by default.
    pub encoding: &'static Encoding,
    /// Number of BOM bytes to skip before decoding.
    pub bom_length: usize,
    /// True when a BOM was actually present. A sniffed BOM pins the byte
    /// order, so a later declaration can refine but not contradict it.
    pub certain: bool,
}

/// Sniffs the encoding of an XML byte stream from its byte-order mark.
///
/// Per XML 1.0 Appendix F:
/// - `EF BB BF` → UTF-8
/// - `FE FF`    → UTF-16 BE
/// - `FF FE`    → UTF-16 LE
/// - no BOM     → UTF-8 default, not certain
///
/// # Examples
///
/// ```
/// use domoxide::encoding::sniff;
///
/// let sniffed = sniff(b"\xEF\xBB\xBF<r/>");
/// assert_eq!(sniffed.encoding.name(), "UTF-8");
/// assert_eq!(sniffed.bom_length, 3);
/// assert!(sniffed.certain);
///
/// let sniffed = sniff(b"<r/>");
/// assert_eq!(sniffed.bom_length, 0);
/// assert!(!sniffed.certain);
/// ```
#[must_use]
pub fn sniff(bytes: &[u8]) -> SniffedEncoding {
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        SniffedEncoding {
            encoding: UTF_8,
            bom_length: 3,
            certain: true,
        }
    } else if bytes.starts_with(&[0xFE, 0xFF]) {
        SniffedEncoding {
            encoding: UTF_16BE,
            bom_length: 2,
            certain: true,
        }
    } else if bytes.starts_with(&[0xFF, 0xFE]) {
        SniffedEncoding {
            encoding: UTF_16LE,
            bom_length: 2,
            certain: true,
        }
    } else {
        SniffedEncoding {
            encoding: UTF_8,
            bom_length: 0,
            certain: false,
        }
    }
}

/// Resolves an IANA encoding label to an `encoding_rs` encoding.
///
/// # Errors
///
/// Returns `EncodingError` when the label is not recognized.
pub fn for_label(label: &str) -> Result<&'static Encoding, EncodingError> {
    Encoding::for_label(label.as_bytes())
        .ok_or_else(|| EncodingError::new(format!("unsupported encoding: {label}")))
}

/// Decodes a byte slice into a UTF-8 `String` with the given encoding.
///
/// # Errors
///
/// Returns `EncodingError` when the input contains byte sequences that are
/// malformed for the encoding.
pub fn decode(bytes: &[u8], encoding: &'static Encoding) -> Result<String, EncodingError> {
    let (text, _actual, had_errors) = encoding.decode(bytes);
    if had_errors {
        return Err(EncodingError::new(format!(
            "malformed byte sequence for encoding {}",
            encoding.name()
        )));
    }
    Ok(text.into_owned())
}

/// Returns `true` when a declared label names an encoding compatible with
/// the sniffed one, meaning no re-decode is needed.
///
/// `UTF-16` without a byte-order suffix is compatible with either UTF-16
/// variant, since the BOM already fixed the byte order.
#[must_use]
pub fn labels_compatible(declared: &'static Encoding, sniffed: &'static Encoding) -> bool {
    declared == sniffed
        || (declared == encoding_rs::UTF_16LE && sniffed == UTF_16BE)
        || (declared == UTF_16BE && sniffed == UTF_16LE)
        || declared.name().eq_ignore_ascii_case(sniffed.name())
}

/// Returns `true` when the encoding is a Unicode transform able to encode
/// any XML character directly. Non-Unicode targets fall back to numeric
/// character references for unencodable characters during serialization.
#[must_use]
pub fn is_unicode_transform(encoding: &'static Encoding) -> bool {
    encoding == UTF_8 || encoding == UTF_16BE || encoding == UTF_16LE
}

/// Extracts the `encoding` pseudo-attribute from raw bytes treated as ASCII.
///
/// Used as a fallback when the input is not valid UTF-8 and carries no BOM:
/// the XML declaration itself is restricted to ASCII-compatible characters,
/// so it can be scanned before the real decode. Returns `None` when no
/// declaration or no encoding attribute is found.
#[must_use]
pub fn declared_label_from_ascii(bytes: &[u8]) -> Option<String> {
    // The declaration must open the document; 200 bytes is ample.
    let scan = &bytes[..bytes.len().min(200)];
    if !scan.starts_with(b"<?xml") {
        return None;
    }
    let decl_end = scan.windows(2).position(|w| w == b"?>")?;
    let decl = &scan[..decl_end];

    let needle = b"encoding";
    let enc_pos = decl.windows(needle.len()).position(|w| w == needle)?;
    let rest = skip_ascii_whitespace(&decl[enc_pos + needle.len()..]);
    let rest = skip_ascii_whitespace(rest.strip_prefix(b"=")?);

    let quote = *rest.first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let value = &rest[1..];
    let end = value.iter().position(|&b| b == quote)?;
    let label = &value[..end];
    if label.iter().all(u8::is_ascii) {
        Some(String::from_utf8_lossy(label).into_owned())
    } else {
        None
    }
}

fn skip_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let skip = bytes
        .iter()
        .take_while(|&&b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
        .count();
    &bytes[skip..]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_utf8_bom() {
        let sniffed = sniff(b"\xEF\xBB\xBF<?xml version=\"1.0\"?><root/>");
        assert_eq!(sniffed.encoding, UTF_8);
        assert_eq!(sniffed.bom_length, 3);
        assert!(sniffed.certain);
    }

    #[test]
    fn test_sniff_utf16le_bom() {
        let sniffed = sniff(b"\xFF\xFE<\x00r\x00/\x00>\x00");
        assert_eq!(sniffed.encoding, UTF_16LE);
        assert_eq!(sniffed.bom_length, 2);
    }

    #[test]
    fn test_sniff_utf16be_bom() {
        let sniffed = sniff(b"\xFE\xFF\x00<\x00r\x00/\x00>");
        assert_eq!(sniffed.encoding, UTF_16BE);
        assert_eq!(sniffed.bom_length, 2);
    }

    #[test]
    fn test_sniff_no_bom_defaults_utf8() {
        let sniffed = sniff(b"<root/>");
        assert_eq!(sniffed.encoding, UTF_8);
        assert_eq!(sniffed.bom_length, 0);
        assert!(!sniffed.certain);
    }

    #[test]
    fn test_sniff_empty_and_partial() {
        assert_eq!(sniff(b"").bom_length, 0);
        assert_eq!(sniff(b"\xEF").bom_length, 0);
    }

    #[test]
    fn test_for_label_known() {
        assert_eq!(for_label("utf-8").unwrap(), UTF_8);
        assert_eq!(for_label("ISO-8859-1").unwrap().name(), "windows-1252");
    }

    #[test]
    fn test_for_label_unknown() {
        let err = for_label("NO-SUCH-ENCODING-42").unwrap_err();
        assert!(err.message.contains("unsupported encoding"));
    }

    #[test]
    fn test_decode_utf8() {
        let text = decode(b"<root>hello</root>", UTF_8).unwrap();
        assert_eq!(text, "<root>hello</root>");
    }

    #[test]
    fn test_decode_latin1() {
        // 0xE9 is 'e with acute' in ISO-8859-1.
        let enc = for_label("ISO-8859-1").unwrap();
        let text = decode(b"caf\xE9", enc).unwrap();
        assert_eq!(text, "caf\u{00E9}");
    }

    #[test]
    fn test_decode_utf16le() {
        let text = decode(b"<\x00r\x00/\x00>\x00", UTF_16LE).unwrap();
        assert_eq!(text, "<r/>");
    }

    #[test]
    fn test_declared_label_from_ascii() {
        let bytes = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><r/>";
        assert_eq!(
            declared_label_from_ascii(bytes),
            Some("ISO-8859-1".to_string())
        );
    }

    #[test]
    fn test_declared_label_single_quotes() {
        let bytes = b"<?xml version='1.0' encoding='Shift_JIS'?><r/>";
        assert_eq!(
            declared_label_from_ascii(bytes),
            Some("Shift_JIS".to_string())
        );
    }

    #[test]
    fn test_declared_label_absent() {
        assert_eq!(declared_label_from_ascii(b"<?xml version=\"1.0\"?><r/>"), None);
        assert_eq!(declared_label_from_ascii(b"<root/>"), None);
    }

    #[test]
    fn test_is_unicode_transform() {
        assert!(is_unicode_transform(UTF_8));
        assert!(is_unicode_transform(UTF_16LE));
        assert!(!is_unicode_transform(for_label("ISO-8859-1").unwrap()));
    }

    #[test]
    fn test_encoding_error_display() {
        let err = EncodingError::new("test error");
        assert_eq!(err.to_string(), "encoding error: test error");
    }
}
