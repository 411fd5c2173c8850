//! Canonical-form output: determinism across logically equivalent
//! inputs, and stability under reparse.

#![allow(clippy::unwrap_used)]

use domoxide::config::DomConfig;
use domoxide::parser::parse_str;
use domoxide::serial::write_with_config;

fn canonical(input: &str) -> String {
    let doc = parse_str(input).unwrap();
    let mut config = DomConfig::new();
    config.set("canonical-form", true).unwrap();
    assert!(config.is_canonical());
    write_with_config(&doc, &config).unwrap()
}

#[test]
fn test_equivalent_documents_canonicalize_identically() {
    // Attribute order, entity references vs literals, CDATA vs text,
    // and redundant namespace declarations are all non-information.
    let variants = [
        "<r b=\"2\" a=\"1\"><c>x</c></r>",
        "<?xml version=\"1.0\"?><r a=\"1\" b=\"2\"><c>x</c></r>",
        "<!DOCTYPE r [<!ENTITY e \"x\">]><r a=\"1\" b=\"2\"><c>&e;</c></r>",
        "<r a=\"1\" b=\"2\"><c><![CDATA[x]]></c></r>",
    ];
    let expected = "<r a=\"1\" b=\"2\"><c>x</c></r>";
    for input in &variants {
        assert_eq!(canonical(input), expected, "for input {input:?}");
    }
}

#[test]
fn test_canonical_is_a_fixpoint() {
    let inputs = [
        "<r z=\"1\" a=\"2\"><empty/>text<!-- gone --></r>",
        "<p:r xmlns:p=\"urn:p\" xmlns:a=\"urn:a\" a:k=\"v\" p:k=\"v\"/>",
        "<!DOCTYPE r [<!ENTITY e \"<b>x</b>\">]><r>&e;</r>",
    ];
    for input in &inputs {
        let first = canonical(input);
        let second = canonical(&first);
        assert_eq!(first, second, "for input {input:?}");
    }
}

#[test]
fn test_canonical_drops_declaration_and_doctype() {
    let out = canonical(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <!DOCTYPE r SYSTEM \"r.dtd\"><r/>",
    );
    assert_eq!(out, "<r></r>");
}

#[test]
fn test_canonical_attribute_order_is_total() {
    let out = canonical(
        "<r xmlns:b=\"urn:b\" xmlns:a=\"urn:a\" b:k=\"1\" a:k=\"2\" \
         z=\"3\" a=\"4\" xmlns=\"urn:d\"/>",
    );
    assert_eq!(
        out,
        "<r xmlns=\"urn:d\" xmlns:a=\"urn:a\" xmlns:b=\"urn:b\" \
         a=\"4\" z=\"3\" a:k=\"2\" b:k=\"1\"></r>"
    );
}

#[test]
fn test_canonical_escapes_cdata_content() {
    let out = canonical("<r><![CDATA[a < b & c]]></r>");
    assert_eq!(out, "<r>a &lt; b &amp; c</r>");
}

#[test]
fn test_canonical_keeps_comments_unless_disabled() {
    assert_eq!(
        canonical("<r><!-- note -->kept</r>"),
        "<r><!-- note -->kept</r>"
    );

    let doc = parse_str("<r><!-- note -->kept</r>").unwrap();
    let mut config = DomConfig::new();
    config.set("canonical-form", true).unwrap();
    config.set("comments", false).unwrap();
    assert_eq!(write_with_config(&doc, &config).unwrap(), "<r>kept</r>");
}
