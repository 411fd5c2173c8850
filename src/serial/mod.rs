//! Configuration-driven XML serialization.
//!
//! The serializer is the write-side mirror of the normalizer: the same
//! [`DomConfig`] parameters that rewrite a tree in place here shape the
//! output text instead, without touching the tree. Namespace fixup is
//! computed on the fly, so a tree built through the API serializes with
//! the declarations it needs even when nobody normalized it first.
//!
//! Output destinations are a `String`, encoded bytes (unencodable
//! characters fall back to numeric character references), or a URI
//! (file write or HTTP PUT).

use encoding_rs::{UTF_16BE, UTF_16LE};

use crate::config::DomConfig;
use crate::encoding;
use crate::error::{handle_error, DomError, ErrorSeverity};
use crate::parser::input::NamespaceResolver;
use crate::tree::{ContentModel, Document, NodeId, NodeKind};

/// Serializes a document under its own configuration.
///
/// # Errors
///
/// Returns the condition that stopped serialization: a recoverable
/// well-formedness problem the error handler refused, or a fatal one.
pub fn write_to_string(doc: &Document) -> Result<String, DomError> {
    write_with_config(doc, &doc.config)
}

/// Serializes a document under an explicit configuration.
///
/// # Errors
///
/// As [`write_to_string`].
pub fn write_with_config(doc: &Document, config: &DomConfig) -> Result<String, DomError> {
    let mut serializer = Serializer::new(doc, config, doc.encoding.as_deref());
    serializer.write_document()?;
    Ok(serializer.out)
}

/// Serializes a single node and its subtree.
///
/// Document and document-fragment nodes serialize their children;
/// attribute nodes serialize their value as escaped text.
///
/// # Errors
///
/// As [`write_to_string`].
pub fn write_node_to_string(
    doc: &Document,
    node: NodeId,
    config: &DomConfig,
) -> Result<String, DomError> {
    let mut serializer = Serializer::new(doc, config, None);
    match &doc.node(node).kind {
        NodeKind::Document | NodeKind::DocumentFragment => {
            let kids: Vec<NodeId> = doc.children(node).collect();
            for kid in kids {
                serializer.write_node(kid, 0)?;
            }
        }
        NodeKind::Attribute { .. } => {
            let value = doc.attribute_node_value(node);
            escape_text(&mut serializer.out, &value);
        }
        _ => serializer.write_node(node, 0)?,
    }
    Ok(serializer.out)
}

/// Serializes a document to bytes in the given encoding, or in the
/// document's own encoding (UTF-8 when it has none).
///
/// UTF-16 output carries a byte-order mark. For encodings that cannot
/// represent every XML character, unencodable characters are written as
/// decimal character references.
///
/// # Errors
///
/// Fails on an unknown encoding label, or as [`write_to_string`].
pub fn write_to_bytes(doc: &Document, label: Option<&str>) -> Result<Vec<u8>, DomError> {
    let label = label
        .map(str::to_string)
        .or_else(|| doc.encoding.clone())
        .unwrap_or_else(|| "UTF-8".to_string());
    let target = encoding::for_label(&label).map_err(|e| {
        DomError::new(ErrorSeverity::Fatal, "unsupported-encoding", e.message)
    })?;

    let mut serializer = Serializer::new(doc, &doc.config, Some(target.name()));
    serializer.write_document()?;
    let text = serializer.out;

    if target == UTF_16LE {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        Ok(bytes)
    } else if target == UTF_16BE {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        Ok(bytes)
    } else {
        // encoding_rs substitutes decimal character references for
        // unmappable characters, which is the documented fallback.
        let (bytes, _, _) = target.encode(&text);
        Ok(bytes.into_owned())
    }
}

/// Serializes a document to a URI: `http`/`https` URIs are PUT to,
/// anything else is treated as a filesystem path (with an optional
/// `file://` prefix).
///
/// # Errors
///
/// As [`write_to_bytes`], plus I/O or HTTP failures.
pub fn write_to_uri(doc: &Document, uri: &str) -> Result<(), DomError> {
    let bytes = write_to_bytes(doc, None)?;
    let io_error =
        |message: String| DomError::new(ErrorSeverity::Fatal, "io-error", message);

    if uri.starts_with("http://") || uri.starts_with("https://") {
        let response = reqwest::blocking::Client::new()
            .put(uri)
            .header("Content-Type", "application/xml")
            .body(bytes)
            .send()
            .map_err(|e| io_error(format!("PUT {uri} failed: {e}")))?;
        if !response.status().is_success() {
            return Err(io_error(format!(
                "PUT {uri} returned status {}",
                response.status()
            )));
        }
        Ok(())
    } else {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        std::fs::write(path, bytes).map_err(|e| io_error(format!("write {path}: {e}")))
    }
}

/// One attribute as it will appear in the output, after namespace fixup
/// and default-content filtering.
struct AttrOut {
    prefix: Option<String>,
    name: String,
    value: String,
    namespace: Option<String>,
}

impl AttrOut {
    fn is_default_decl(&self) -> bool {
        self.prefix.is_none() && self.name == "xmlns"
    }

    fn is_prefix_decl(&self) -> bool {
        self.prefix.as_deref() == Some("xmlns")
    }

    /// Canonical sort key: declarations first (default, then by prefix),
    /// then remaining attributes by (namespace URI, local name).
    fn sort_key(&self) -> (u8, u8, String, String) {
        if self.is_default_decl() {
            (0, 0, String::new(), String::new())
        } else if self.is_prefix_decl() {
            (0, 1, String::new(), self.name.clone())
        } else {
            (
                1,
                0,
                self.namespace.clone().unwrap_or_default(),
                self.name.clone(),
            )
        }
    }
}

struct Serializer<'a> {
    doc: &'a Document,
    config: &'a DomConfig,
    encoding_label: Option<&'a str>,
    ns: NamespaceResolver,
    out: String,
}

impl<'a> Serializer<'a> {
    fn new(doc: &'a Document, config: &'a DomConfig, encoding_label: Option<&'a str>) -> Self {
        Self {
            doc,
            config,
            encoding_label,
            ns: NamespaceResolver::new(),
            out: String::new(),
        }
    }

    fn report(
        &self,
        severity: ErrorSeverity,
        type_tag: &'static str,
        message: impl Into<String>,
    ) -> Result<(), DomError> {
        let error = DomError::new(severity, type_tag, message);
        if handle_error(self.config.error_handler(), &error) {
            Ok(())
        } else {
            Err(error)
        }
    }

    fn write_document(&mut self) -> Result<(), DomError> {
        let canonical = self.config.is_canonical();
        if self.config.xml_declaration && !canonical {
            self.write_declaration();
        } else if self.doc.version.as_deref().map_or(false, |v| v != "1.0")
            || self.doc.standalone.is_some()
        {
            self.report(
                ErrorSeverity::Warning,
                "xml-declaration-needed",
                "document has a non-default version or standalone status \
                 but the XML declaration is suppressed",
            )?;
        }

        let root = self.doc.root();
        let kids: Vec<NodeId> = self.doc.children(root).collect();
        for kid in kids {
            self.write_node(kid, 0)?;
        }
        Ok(())
    }

    fn write_declaration(&mut self) {
        self.out.push_str("<?xml version=\"");
        self.out.push_str(self.doc.version.as_deref().unwrap_or("1.0"));
        self.out.push('"');
        if let Some(label) = self
            .encoding_label
            .or(self.doc.encoding.as_deref())
        {
            self.out.push_str(" encoding=\"");
            self.out.push_str(label);
            self.out.push('"');
        }
        if let Some(standalone) = self.doc.standalone {
            self.out.push_str(" standalone=\"");
            self.out.push_str(if standalone { "yes" } else { "no" });
            self.out.push('"');
        }
        self.out.push_str("?>\n");
    }

    fn write_node(&mut self, node: NodeId, depth: usize) -> Result<(), DomError> {
        match &self.doc.node(node).kind {
            NodeKind::Element { .. } => self.write_element(node, depth),
            NodeKind::Text { content } => {
                escape_text(&mut self.out, content);
                Ok(())
            }
            NodeKind::CData { content } => {
                let content = content.clone();
                self.write_cdata(&content)
            }
            NodeKind::Comment { content } => {
                if self.config.comments {
                    self.out.push_str("<!--");
                    self.out.push_str(content);
                    self.out.push_str("-->");
                }
                Ok(())
            }
            NodeKind::ProcessingInstruction { target, data } => {
                self.out.push_str("<?");
                self.out.push_str(target);
                if let Some(data) = data {
                    self.out.push(' ');
                    self.out.push_str(data);
                }
                self.out.push_str("?>");
                Ok(())
            }
            NodeKind::EntityRef { name } => {
                let name = name.clone();
                self.write_entity_ref(node, &name, depth)
            }
            NodeKind::DocumentType { .. } => {
                if !self.config.is_canonical() {
                    self.write_doctype(node);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// An entity reference is written back as `&name;` unless the
    /// configuration calls for expansion, in which case its materialized
    /// content is serialized instead. A reference with no content always
    /// stays a reference.
    fn write_entity_ref(
        &mut self,
        node: NodeId,
        name: &str,
        depth: usize,
    ) -> Result<(), DomError> {
        let expand = !self.config.entities || self.config.is_canonical();
        let kids: Vec<NodeId> = self.doc.children(node).collect();
        if expand && !kids.is_empty() {
            for kid in kids {
                self.write_node(kid, depth)?;
            }
        } else {
            self.out.push('&');
            self.out.push_str(name);
            self.out.push(';');
        }
        Ok(())
    }

    fn write_doctype(&mut self, node: NodeId) {
        let NodeKind::DocumentType {
            name,
            public_id,
            system_id,
            internal_subset,
            ..
        } = &self.doc.node(node).kind
        else {
            return;
        };
        self.out.push_str("<!DOCTYPE ");
        self.out.push_str(name);
        match (public_id, system_id) {
            (Some(public), Some(system)) => {
                self.out.push_str(" PUBLIC \"");
                self.out.push_str(public);
                self.out.push_str("\" \"");
                self.out.push_str(system);
                self.out.push('"');
            }
            (None, Some(system)) => {
                self.out.push_str(" SYSTEM \"");
                self.out.push_str(system);
                self.out.push('"');
            }
            _ => {}
        }
        if let Some(subset) = internal_subset {
            self.out.push_str(" [");
            self.out.push_str(subset);
            self.out.push(']');
        }
        self.out.push_str(">\n");
    }

    fn write_cdata(&mut self, content: &str) -> Result<(), DomError> {
        if !self.config.cdata_sections || self.config.is_canonical() {
            escape_text(&mut self.out, content);
            return Ok(());
        }
        if !content.contains("]]>") && !content.contains('\r') {
            self.emit_cdata(content);
            return Ok(());
        }
        if !self.config.split_cdata_sections {
            self.report(
                ErrorSeverity::Error,
                "invalid-data-in-cdata-section",
                "CDATA section contains ']]>' or a carriage return \
                 and splitting is disabled",
            )?;
            // The handler elected to continue; escaped text keeps the
            // output well-formed.
            escape_text(&mut self.out, content);
            return Ok(());
        }
        self.report(
            ErrorSeverity::Warning,
            "cdata-sections-splitted",
            "CDATA section was split to stay well-formed",
        )?;
        let mut rest = content;
        loop {
            match (rest.find("]]>"), rest.find('\r')) {
                (Some(m), cr) if cr.map_or(true, |c| m < c) => {
                    self.emit_cdata(&format!("{}]]", &rest[..m]));
                    // The '>' opens the next section.
                    rest = &rest[m + 2..];
                }
                (_, Some(c)) => {
                    if c > 0 {
                        let (before, _) = rest.split_at(c);
                        self.emit_cdata(before);
                    }
                    self.out.push_str("&#13;");
                    rest = &rest[c + 1..];
                }
                (_, None) => {
                    if !rest.is_empty() {
                        self.emit_cdata(rest);
                    }
                    return Ok(());
                }
            }
        }
    }

    fn emit_cdata(&mut self, content: &str) {
        self.out.push_str("<![CDATA[");
        self.out.push_str(content);
        self.out.push_str("]]>");
    }

    fn write_element(&mut self, elem: NodeId, depth: usize) -> Result<(), DomError> {
        let canonical = self.config.is_canonical();
        let qname = self
            .doc
            .qualified_name(elem)
            .unwrap_or_default();

        let mut attrs = self.prepare_attributes(elem)?;
        if canonical {
            attrs.sort_by_key(AttrOut::sort_key);
        }

        self.out.push('<');
        self.out.push_str(&qname);
        for attr in &attrs {
            self.out.push(' ');
            if let Some(prefix) = &attr.prefix {
                self.out.push_str(prefix);
                self.out.push(':');
            }
            self.out.push_str(&attr.name);
            self.out.push_str("=\"");
            escape_attr(&mut self.out, &attr.value);
            self.out.push('"');
        }

        let kids = self.content_children(elem);
        if kids.is_empty() && !canonical {
            self.out.push_str("/>");
            self.ns.pop_scope();
            return Ok(());
        }
        self.out.push('>');

        let pretty = self.config.format_pretty_print && !canonical;
        let single_text = kids.len() == 1
            && matches!(self.doc.node(kids[0]).kind, NodeKind::Text { .. });
        if pretty && !kids.is_empty() && !single_text {
            for kid in kids {
                self.out.push('\n');
                for _ in 0..=depth {
                    self.out.push_str("  ");
                }
                self.write_node(kid, depth + 1)?;
            }
            self.out.push('\n');
            for _ in 0..depth {
                self.out.push_str("  ");
            }
        } else {
            for kid in kids {
                self.write_node(kid, depth + 1)?;
            }
        }

        self.out.push_str("</");
        self.out.push_str(&qname);
        self.out.push('>');
        self.ns.pop_scope();
        Ok(())
    }

    /// The children that will actually be written, with element-content
    /// whitespace filtered out when the configuration excludes it.
    fn content_children(&self, elem: NodeId) -> Vec<NodeId> {
        let kids: Vec<NodeId> = self.doc.children(elem).collect();
        if self.config.element_content_whitespace {
            return kids;
        }
        let model = self
            .doc
            .qualified_name(elem)
            .and_then(|qname| {
                self.doc
                    .doctype_decls()
                    .and_then(|d| d.element_decls.get(&qname).copied())
            });
        if model != Some(ContentModel::ElementOnly) {
            return kids;
        }
        kids.into_iter()
            .filter(|&kid| match &self.doc.node(kid).kind {
                NodeKind::Text { content } => {
                    !content.chars().all(|c| matches!(c, ' ' | '\t' | '\n' | '\r'))
                }
                _ => true,
            })
            .collect()
    }

    /// Collects the element's output attributes and pushes its namespace
    /// scope: existing declarations (canonical form drops redundant ones),
    /// declarations synthesized for unbound prefixes, and the regular
    /// attributes. The caller pops the scope after the end tag.
    fn prepare_attributes(&mut self, elem: NodeId) -> Result<Vec<AttrOut>, DomError> {
        let canonical = self.config.is_canonical();
        let mut decls: Vec<AttrOut> = Vec::new();
        let mut regular: Vec<(NodeId, Option<String>, String, Option<String>)> = Vec::new();

        for &attr in self.doc.attributes(elem) {
            let NodeKind::Attribute {
                name,
                prefix,
                namespace,
                specified,
                ..
            } = &self.doc.node(attr).kind
            else {
                continue;
            };
            let is_decl = prefix.as_deref() == Some("xmlns")
                || (prefix.is_none() && name == "xmlns");
            if is_decl {
                decls.push(AttrOut {
                    prefix: prefix.clone(),
                    name: name.clone(),
                    value: self.doc.attribute_node_value(attr),
                    namespace: namespace.clone(),
                });
            } else {
                if self.config.discard_default_content && !specified {
                    continue;
                }
                regular.push((attr, prefix.clone(), name.clone(), namespace.clone()));
            }
        }

        if canonical {
            decls.retain(|decl| {
                let declared = decl.prefix.as_ref().map(|_| decl.name.as_str());
                if decl.value.is_empty() {
                    self.ns.resolve(declared).is_some()
                } else {
                    !self.ns.is_bound(declared, &decl.value)
                }
            });
        }

        self.ns.push_scope();
        for decl in &decls {
            let declared = decl.prefix.as_ref().map(|_| decl.name.clone());
            self.ns.bind(declared, decl.value.clone());
        }

        if self.config.namespaces {
            self.fixup_element_namespace(elem, &mut decls);
            self.fixup_attribute_prefixes(&mut regular, &mut decls);
        }

        let mut attrs = if self.config.namespace_declarations {
            decls
        } else {
            Vec::new()
        };
        for (attr, prefix, name, namespace) in regular {
            attrs.push(AttrOut {
                prefix,
                name,
                value: self.doc.attribute_node_value(attr),
                namespace,
            });
        }
        Ok(attrs)
    }

    fn fixup_element_namespace(&mut self, elem: NodeId, decls: &mut Vec<AttrOut>) {
        let NodeKind::Element {
            prefix, namespace, ..
        } = &self.doc.node(elem).kind
        else {
            return;
        };
        match namespace {
            Some(uri) => {
                if !self.ns.is_bound(prefix.as_deref(), uri) {
                    decls.push(synthesized_decl(prefix.clone(), uri.clone()));
                    self.ns.bind(prefix.clone(), uri.clone());
                }
            }
            None => {
                if prefix.is_none() && self.ns.resolve(None).is_some() {
                    decls.push(synthesized_decl(None, String::new()));
                    self.ns.bind(None, String::new());
                }
            }
        }
    }

    fn fixup_attribute_prefixes(
        &mut self,
        regular: &mut [(NodeId, Option<String>, String, Option<String>)],
        decls: &mut Vec<AttrOut>,
    ) {
        for (_, prefix, _, namespace) in regular.iter_mut() {
            let (Some(p), Some(uri)) = (prefix.clone(), namespace.clone()) else {
                continue;
            };
            if p == "xml" {
                continue;
            }
            if self.ns.resolve(Some(&p)) == Some(uri.as_str()) {
                continue;
            }
            if self.ns.resolve(Some(&p)).is_none() {
                decls.push(synthesized_decl(Some(p.clone()), uri.clone()));
                self.ns.bind(Some(p), uri);
                continue;
            }
            // The prefix is bound elsewhere; reuse an in-scope prefix for
            // the URI or mint a fresh one.
            let reusable = match self.ns.prefix_for(&uri) {
                Some(Some(existing)) => Some(existing.to_string()),
                _ => None,
            };
            if let Some(existing) = reusable {
                *prefix = Some(existing);
            } else {
                let fresh = self.fresh_prefix();
                decls.push(synthesized_decl(Some(fresh.clone()), uri.clone()));
                self.ns.bind(Some(fresh.clone()), uri);
                *prefix = Some(fresh);
            }
        }
    }

    fn fresh_prefix(&self) -> String {
        let mut n = 1u32;
        loop {
            let candidate = format!("ns{n}");
            if self.ns.resolve(Some(&candidate)).is_none() {
                return candidate;
            }
            n += 1;
        }
    }
}

fn synthesized_decl(prefix: Option<String>, uri: String) -> AttrOut {
    match prefix {
        Some(p) => AttrOut {
            prefix: Some("xmlns".to_string()),
            name: p,
            value: uri,
            namespace: None,
        },
        None => AttrOut {
            prefix: None,
            name: "xmlns".to_string(),
            value: uri,
            namespace: None,
        },
    }
}

/// Escapes character data: `&` and `<` always, `>` for symmetry, and a
/// bare carriage return as a reference so it survives line-end
/// normalization on reparse.
fn escape_text(out: &mut String, content: &str) {
    for c in content.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
}

/// Escapes an attribute value for double-quoted output: markup characters
/// as entity references, whitespace control characters as numeric
/// references so they survive attribute-value normalization.
fn escape_attr(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#9;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::config::DomConfig;
    use crate::error::ErrorSeverity;
    use crate::parser::parse_str;
    use crate::tree::Document;

    fn config_with(pairs: &[(&str, bool)]) -> DomConfig {
        let mut config = DomConfig::new();
        for (name, value) in pairs {
            config.set(name, *value).unwrap();
        }
        config
    }

    #[test]
    fn test_basic_roundtrip() {
        let doc = parse_str("<r a=\"1\"><b>text</b><c/></r>").unwrap();
        let xml = write_to_string(&doc).unwrap();
        assert_eq!(
            xml,
            "<?xml version=\"1.0\"?>\n<r a=\"1\"><b>text</b><c/></r>"
        );
    }

    #[test]
    fn test_declaration_suppressed() {
        let doc = parse_str("<r/>").unwrap();
        let config = config_with(&[("xml-declaration", false)]);
        assert_eq!(write_with_config(&doc, &config).unwrap(), "<r/>");
    }

    #[test]
    fn test_declaration_preserves_version_and_standalone() {
        let doc =
            parse_str("<?xml version=\"1.1\" standalone=\"yes\"?><r/>").unwrap();
        let xml = write_to_string(&doc).unwrap();
        assert_eq!(xml, "<?xml version=\"1.1\" standalone=\"yes\"?>\n<r/>");
    }

    #[test]
    fn test_suppressed_declaration_warns_for_standalone() {
        let doc = parse_str("<?xml version=\"1.0\" standalone=\"yes\"?><r/>").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut config = config_with(&[("xml-declaration", false)]);
        config.set_error_handler(Some(Arc::new(move |e| {
            sink.lock().unwrap().push(e.severity);
            None
        })));

        let xml = write_with_config(&doc, &config).unwrap();
        assert_eq!(xml, "<r/>");
        assert_eq!(seen.lock().unwrap().as_slice(), &[ErrorSeverity::Warning]);
    }

    #[test]
    fn test_text_escaping() {
        let mut doc = Document::new();
        let root = doc.create_element("r").unwrap();
        let doc_node = doc.root();
        doc.append_child(doc_node, root).unwrap();
        let text = doc.create_text_node("a<b&c>d\re");
        doc.append_child(root, text).unwrap();

        let config = config_with(&[("xml-declaration", false)]);
        assert_eq!(
            write_with_config(&doc, &config).unwrap(),
            "<r>a&lt;b&amp;c&gt;d&#13;e</r>"
        );
    }

    #[test]
    fn test_attribute_escaping() {
        let mut doc = Document::new();
        let root = doc.create_element("r").unwrap();
        let doc_node = doc.root();
        doc.append_child(doc_node, root).unwrap();
        doc.set_attribute(root, "a", "say \"hi\"\n<&").unwrap();

        let config = config_with(&[("xml-declaration", false)]);
        assert_eq!(
            write_with_config(&doc, &config).unwrap(),
            "<r a=\"say &quot;hi&quot;&#10;&lt;&amp;\"/>"
        );
    }

    #[test]
    fn test_comments_suppressed() {
        let doc = parse_str("<r>a<!-- note -->b</r>").unwrap();
        let config = config_with(&[("xml-declaration", false), ("comments", false)]);
        assert_eq!(write_with_config(&doc, &config).unwrap(), "<r>ab</r>");
    }

    #[test]
    fn test_cdata_as_text_when_disabled() {
        let doc = parse_str("<r><![CDATA[a<b]]></r>").unwrap();
        let config =
            config_with(&[("xml-declaration", false), ("cdata-sections", false)]);
        assert_eq!(write_with_config(&doc, &config).unwrap(), "<r>a&lt;b</r>");
    }

    #[test]
    fn test_cdata_split_on_terminator() {
        let mut doc = Document::new();
        let root = doc.create_element("r").unwrap();
        let doc_node = doc.root();
        doc.append_child(doc_node, root).unwrap();
        let cdata = doc.create_cdata_section("a]]>b");
        doc.append_child(root, cdata).unwrap();

        let config = config_with(&[("xml-declaration", false)]);
        assert_eq!(
            write_with_config(&doc, &config).unwrap(),
            "<r><![CDATA[a]]]]><![CDATA[>b]]></r>"
        );
    }

    #[test]
    fn test_cdata_carriage_return_escaped_between_sections() {
        let mut doc = Document::new();
        let root = doc.create_element("r").unwrap();
        let doc_node = doc.root();
        doc.append_child(doc_node, root).unwrap();
        let cdata = doc.create_cdata_section("a\rb");
        doc.append_child(root, cdata).unwrap();

        let config = config_with(&[("xml-declaration", false)]);
        assert_eq!(
            write_with_config(&doc, &config).unwrap(),
            "<r><![CDATA[a]]>&#13;<![CDATA[b]]></r>"
        );
    }

    #[test]
    fn test_cdata_terminator_error_when_splitting_disabled() {
        let mut doc = Document::new();
        let root = doc.create_element("r").unwrap();
        let doc_node = doc.root();
        doc.append_child(doc_node, root).unwrap();
        let cdata = doc.create_cdata_section("a]]>b");
        doc.append_child(root, cdata).unwrap();

        let config = config_with(&[("split-cdata-sections", false)]);
        let err = write_with_config(&doc, &config).unwrap_err();
        assert_eq!(err.severity, ErrorSeverity::Error);
    }

    #[test]
    fn test_entity_reference_written_back() {
        let input = "<!DOCTYPE r [<!ENTITY e \"x\">]><r>&e;</r>";
        let doc = parse_str(input).unwrap();
        let config = config_with(&[("xml-declaration", false)]);
        let xml = write_with_config(&doc, &config).unwrap();
        assert!(xml.ends_with("<r>&e;</r>"));
        assert!(xml.contains("<!DOCTYPE r [<!ENTITY e \"x\">]>"));
    }

    #[test]
    fn test_entity_reference_expanded_when_disabled() {
        let input = "<!DOCTYPE r [<!ENTITY e \"<b>in</b>\">]><r>&e;</r>";
        let doc = parse_str(input).unwrap();
        let config = config_with(&[("xml-declaration", false), ("entities", false)]);
        let xml = write_with_config(&doc, &config).unwrap();
        assert!(xml.ends_with("<r><b>in</b></r>"));
    }

    #[test]
    fn test_canonical_output() {
        let input = "<!DOCTYPE r [<!ENTITY e \"x\">]>\
                     <r b=\"2\" a=\"1\">&e;<c/></r>";
        let doc = parse_str(input).unwrap();
        let mut config = DomConfig::new();
        config.set("canonical-form", true).unwrap();
        let xml = write_with_config(&doc, &config).unwrap();
        assert_eq!(xml, "<r a=\"1\" b=\"2\">x<c></c></r>");
    }

    #[test]
    fn test_canonical_drops_redundant_declarations() {
        let input = "<a:x xmlns:a=\"urn:t\"><a:y xmlns:a=\"urn:t\"/></a:x>";
        let doc = parse_str(input).unwrap();
        let mut config = DomConfig::new();
        config.set("canonical-form", true).unwrap();
        let xml = write_with_config(&doc, &config).unwrap();
        assert_eq!(xml, "<a:x xmlns:a=\"urn:t\"><a:y></a:y></a:x>");
    }

    #[test]
    fn test_pretty_print() {
        let doc = parse_str("<r><a>t</a><b/></r>").unwrap();
        let config = config_with(&[
            ("xml-declaration", false),
            ("format-pretty-print", true),
        ]);
        assert_eq!(
            write_with_config(&doc, &config).unwrap(),
            "<r>\n  <a>t</a>\n  <b/>\n</r>"
        );
    }

    #[test]
    fn test_pretty_print_keeps_single_text_inline() {
        let doc = parse_str("<r><a>only text</a></r>").unwrap();
        let config = config_with(&[
            ("xml-declaration", false),
            ("format-pretty-print", true),
        ]);
        assert_eq!(
            write_with_config(&doc, &config).unwrap(),
            "<r>\n  <a>only text</a>\n</r>"
        );
    }

    #[test]
    fn test_namespace_declaration_synthesized() {
        let mut doc = Document::new();
        let root = doc.create_element_ns(Some("urn:e"), "p:r").unwrap();
        let doc_node = doc.root();
        doc.append_child(doc_node, root).unwrap();

        let config = config_with(&[("xml-declaration", false)]);
        assert_eq!(
            write_with_config(&doc, &config).unwrap(),
            "<p:r xmlns:p=\"urn:e\"/>"
        );
    }

    #[test]
    fn test_namespace_declarations_omitted() {
        let doc = parse_str("<a:x xmlns:a=\"urn:t\"><a:y/></a:x>").unwrap();
        let config = config_with(&[
            ("xml-declaration", false),
            ("namespace-declarations", false),
        ]);
        assert_eq!(
            write_with_config(&doc, &config).unwrap(),
            "<a:x><a:y/></a:x>"
        );
    }

    #[test]
    fn test_default_attributes_discarded() {
        let input = "<!DOCTYPE r [<!ATTLIST r a CDATA \"dflt\">]><r b=\"1\"/>";
        let doc = parse_str(input).unwrap();
        let config = config_with(&[
            ("xml-declaration", false),
            ("discard-default-content", true),
        ]);
        let xml = write_with_config(&doc, &config).unwrap();
        // The verbatim internal subset still mentions the default; only
        // the element tag must be free of it.
        assert!(xml.ends_with("<r b=\"1\"/>"), "got: {xml}");
        assert!(!xml.contains("a=\"dflt\""), "got: {xml}");
    }

    #[test]
    fn test_element_content_whitespace_excluded() {
        let input = "<!DOCTYPE r [<!ELEMENT r (a)*>]><r>\n  <a/>\n</r>";
        let doc = parse_str(input).unwrap();
        let config = config_with(&[
            ("xml-declaration", false),
            ("element-content-whitespace", false),
        ]);
        let xml = write_with_config(&doc, &config).unwrap();
        assert!(xml.ends_with("<r><a/></r>"));
    }

    #[test]
    fn test_write_node_to_string_subtree() {
        let doc = parse_str("<r><b a=\"1\">t</b></r>").unwrap();
        let root = doc.root_element().unwrap();
        let child = doc.first_child(root).unwrap();
        let xml = write_node_to_string(&doc, child, &DomConfig::new()).unwrap();
        assert_eq!(xml, "<b a=\"1\">t</b>");
    }

    #[test]
    fn test_write_to_bytes_latin1_with_reference_fallback() {
        let mut doc = parse_str("<r>caf\u{e9} \u{2192}</r>").unwrap();
        doc.encoding = Some("ISO-8859-1".to_string());
        doc.config.set("xml-declaration", false).unwrap();
        let bytes = write_to_bytes(&doc, None).unwrap();
        assert_eq!(bytes, b"<r>caf\xE9 &#8594;</r>".to_vec());
    }

    #[test]
    fn test_write_to_bytes_utf16le_bom() {
        let doc = parse_str("<r/>").unwrap();
        let bytes = write_to_bytes(&doc, Some("UTF-16LE")).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xFE]);
        assert_eq!(&bytes[2..10], b"<\0?\0x\0m\0");
    }

    #[test]
    fn test_write_to_bytes_unknown_label() {
        let doc = parse_str("<r/>").unwrap();
        let err = write_to_bytes(&doc, Some("NO-SUCH-ENCODING")).unwrap_err();
        assert_eq!(err.severity, ErrorSeverity::Fatal);
    }
}
