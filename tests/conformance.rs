//! Well-formedness conformance checks.
//!
//! Table-driven acceptance and rejection cases covering the XML 1.0
//! productions the parser implements, plus recovery-mode behavior over
//! the rejection cases.

#![allow(clippy::unwrap_used)]

use domoxide::error::ErrorSeverity;
use domoxide::parser::{parse_bytes, parse_str, parse_str_with_options, ParseOptions};
use domoxide::Document;

/// Documents that must parse without diagnostics.
const WELL_FORMED: &[&str] = &[
    "<doc/>",
    "<doc></doc>",
    "<doc>text</doc>",
    "<doc a=\"1\" b='2'/>",
    "<?xml version=\"1.0\"?><doc/>",
    "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?><doc/>",
    "<?xml version=\"1.1\"?><doc/>",
    "<!-- leading --><doc/><!-- trailing -->",
    "<?pi some data?><doc><?inner?></doc>",
    "<doc><![CDATA[<not-markup> & such]]></doc>",
    "<doc>&lt;&gt;&amp;&apos;&quot;</doc>",
    "<doc>&#65;&#x42;</doc>",
    "<doc xmlns=\"urn:d\"><child/></doc>",
    "<p:doc xmlns:p=\"urn:p\" p:a=\"1\"/>",
    "<doc xml:lang=\"en\" xml:space=\"preserve\"/>",
    "<!DOCTYPE doc><doc/>",
    "<!DOCTYPE doc SYSTEM \"doc.dtd\"><doc/>",
    "<!DOCTYPE doc [<!ENTITY e \"v\">]><doc>&e;</doc>",
    "<!DOCTYPE doc [<!ELEMENT doc (#PCDATA)><!ATTLIST doc a CDATA #IMPLIED>]><doc a=\"x\"/>",
    "<doc>\u{3053}\u{3093}\u{306b}\u{3061}\u{306f}</doc>",
    "<doc.name-with_chars\u{00E9}/>",
    "<doc><deeply><nested><tree>ok</tree></nested></deeply></doc>",
];

/// Documents the parser must reject in strict mode.
const NOT_WELL_FORMED: &[&str] = &[
    "",
    "   ",
    "just text",
    "<doc>",
    "<doc></other>",
    "<doc></doc></doc>",
    "<doc><a></doc></a>",
    "<doc/><doc/>",
    "<doc/>junk",
    "<doc a=1/>",
    "<doc a=\"1\" a=\"2\"/>",
    "<doc a=\"un&closed\"/>bad;",
    "<doc><a b=\"<\"/></doc>",
    "<doc>&#0;</doc>",
    "<doc>&#xD800;</doc>",
    "<doc>&#xFFFFFFFF;</doc>",
    "<doc>&undeclared;</doc>",
    "<doc>]]></doc>",
    "<doc><![CDATA[unterminated</doc>",
    "<doc><!-- double -- hyphen --></doc>",
    "<doc><?xml not-allowed?></doc>",
    "<1doc/>",
    "<doc 1a=\"v\"/>",
    "<?xml version=\"1.0\"?",
    "<!DOCTYPE doc <doc/>",
];

#[test]
fn test_well_formed_documents_accepted() {
    for input in WELL_FORMED {
        let doc = parse_str(input)
            .unwrap_or_else(|e| panic!("should accept {input:?}: {e}"));
        assert!(
            doc.diagnostics.is_empty(),
            "no diagnostics expected for {input:?}: {:?}",
            doc.diagnostics
        );
    }
}

#[test]
fn test_not_well_formed_documents_rejected() {
    for input in NOT_WELL_FORMED {
        assert!(
            parse_str(input).is_err(),
            "should reject {input:?}"
        );
    }
}

#[test]
fn test_rejection_reports_location() {
    let err = parse_str("<doc>\n  <a>\n</doc>").unwrap_err();
    assert!(err.location.line >= 2, "location: {}", err.location);
}

#[test]
fn test_recovery_produces_partial_trees() {
    let options = ParseOptions::default().recover(true);
    for input in NOT_WELL_FORMED {
        // Fatal conditions stay fatal even in recovery; recoverable ones
        // must yield a document plus diagnostics.
        if let Ok(doc) = parse_str_with_options(input, &options) {
            assert!(
                !doc.diagnostics.is_empty(),
                "recovered document for {input:?} should carry diagnostics"
            );
            assert!(doc
                .diagnostics
                .iter()
                .any(|d| d.severity >= ErrorSeverity::Error));
        }
    }
}

#[test]
fn test_recovery_keeps_both_duplicate_free_roots() {
    let options = ParseOptions::default().recover(true);
    let doc = parse_str_with_options("<doc a=\"1\" a=\"2\"/>", &options).unwrap();
    let root = doc.root_element().unwrap();
    // First occurrence wins.
    assert_eq!(doc.attribute_value(root, "a").as_deref(), Some("1"));
    assert_eq!(doc.diagnostics.len(), 1);
}

#[test]
fn test_attribute_value_normalization() {
    let doc = parse_str("<doc a=\"one\ttwo\nthree\"/>").unwrap();
    let root = doc.root_element().unwrap();
    assert_eq!(
        doc.attribute_value(root, "a").as_deref(),
        Some("one two three")
    );
}

#[test]
fn test_line_end_normalization() {
    let doc = parse_str("<doc>a\r\nb\rc</doc>").unwrap();
    let root = doc.root_element().unwrap();
    assert_eq!(doc.text_content(root), "a\nb\nc");
}

#[test]
fn test_xml_11_line_ends_and_characters() {
    let doc = parse_str("<?xml version=\"1.1\"?><doc>a\u{85}b&#1;</doc>").unwrap();
    let root = doc.root_element().unwrap();
    assert_eq!(doc.text_content(root), "a\nb\u{1}");
}

#[test]
fn test_control_character_rejected_in_10() {
    assert!(parse_str("<doc>&#1;</doc>").is_err());
}

#[test]
fn test_utf16_input_with_bom() {
    let text = "<?xml version=\"1.0\"?><doc>caf\u{e9}</doc>";
    let mut bytes = vec![0xFF, 0xFE];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    let doc = parse_bytes(&bytes).unwrap();
    let root = doc.root_element().unwrap();
    assert_eq!(doc.text_content(root), "caf\u{e9}");
}

#[test]
fn test_latin1_input_with_declared_encoding() {
    let bytes = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><doc>caf\xE9</doc>";
    let doc = parse_bytes(bytes).unwrap();
    let root = doc.root_element().unwrap();
    assert_eq!(doc.text_content(root), "caf\u{e9}");
    assert_eq!(doc.encoding.as_deref(), Some("ISO-8859-1"));
}

#[test]
fn test_document_metadata_captured() {
    let doc = Document::parse_str(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?><doc/>",
    )
    .unwrap();
    assert_eq!(doc.version.as_deref(), Some("1.0"));
    assert_eq!(doc.encoding.as_deref(), Some("UTF-8"));
    assert_eq!(doc.standalone, Some(true));
}

#[test]
fn test_doctype_identifiers_captured() {
    let doc = parse_str(
        "<!DOCTYPE doc PUBLIC \"-//X//DTD T//EN\" \"doc.dtd\"><doc/>",
    )
    .unwrap();
    let doctype = doc.doctype().unwrap();
    match &doc.node(doctype).kind {
        domoxide::NodeKind::DocumentType {
            name,
            public_id,
            system_id,
            ..
        } => {
            assert_eq!(name, "doc");
            assert_eq!(public_id.as_deref(), Some("-//X//DTD T//EN"));
            assert_eq!(system_id.as_deref(), Some("doc.dtd"));
        }
        _ => panic!("expected a DocumentType node"),
    }
}
