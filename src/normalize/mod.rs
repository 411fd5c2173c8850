//! Configuration-driven tree normalization.
//!
//! [`normalize_with`] rewrites a document in place under a [`DomConfig`]:
//! entity references are expanded, CDATA sections converted or re-split,
//! comments dropped, adjacent text coalesced, element-content whitespace
//! removed, and namespace declarations synthesized, stripped, or (in
//! canonical form) deduplicated and ordered. The pass works children
//! first, so every rule sees its subtree already in normal form.
//!
//! Recoverable conditions go through the configured error handler; a
//! handler (or the default severity policy) saying stop aborts the pass
//! with the offending [`DomError`].

use crate::config::DomConfig;
use crate::error::{handle_error, DomError, ErrorSeverity};
use crate::parser::input::{NamespaceResolver, XMLNS_NAMESPACE};
use crate::tree::{ContentModel, Document, NodeId, NodeKind};

/// Normalizes `doc` in place under its own configuration.
///
/// # Errors
///
/// Returns the condition that stopped the pass: a fatal condition, or a
/// recoverable one the error handler refused.
pub fn normalize_document(doc: &mut Document) -> Result<(), DomError> {
    let config = doc.config.clone();
    normalize_with(doc, &config)
}

/// Normalizes `doc` in place under an explicit configuration.
///
/// # Errors
///
/// As [`normalize_document`].
pub fn normalize_with(doc: &mut Document, config: &DomConfig) -> Result<(), DomError> {
    Normalizer {
        doc,
        config,
        ns: NamespaceResolver::new(),
    }
    .run()
}

struct Normalizer<'a> {
    doc: &'a mut Document,
    config: &'a DomConfig,
    ns: NamespaceResolver,
}

impl Normalizer<'_> {
    fn run(&mut self) -> Result<(), DomError> {
        if self.config.is_canonical() {
            if let Some(doctype) = self.doc.doctype() {
                self.doc.detach(doctype);
            }
        }
        let root = self.doc.root();
        self.normalize_children(root)
    }

    fn report(
        &mut self,
        severity: ErrorSeverity,
        type_tag: &'static str,
        message: impl Into<String>,
    ) -> Result<(), DomError> {
        let error = DomError::new(severity, type_tag, message);
        let proceed = handle_error(self.config.error_handler(), &error);
        self.doc.diagnostics.push(error.to_diagnostic());
        if proceed {
            Ok(())
        } else {
            Err(error)
        }
    }

    fn normalize_element(&mut self, elem: NodeId) -> Result<(), DomError> {
        let mut decls = self.collect_declarations(elem);
        if self.config.is_canonical() {
            // A declaration identical to the in-scope binding carries no
            // information in canonical form.
            decls.retain(|(attr, prefix, uri)| {
                let redundant = if uri.is_empty() {
                    self.ns.resolve(prefix.as_deref()).is_none()
                } else {
                    self.ns.is_bound(prefix.as_deref(), uri)
                };
                if redundant {
                    let _ = self.doc.remove_attribute_node(elem, *attr);
                }
                !redundant
            });
        }

        self.ns.push_scope();
        for (_, prefix, uri) in &decls {
            self.ns.bind(prefix.clone(), uri.clone());
        }

        self.normalize_children(elem)?;

        if self.config.namespaces {
            self.fixup_namespaces(elem)?;
        }
        if self.config.is_canonical() {
            self.order_attributes(elem);
        }
        if !self.config.namespace_declarations {
            self.strip_declarations(elem);
        }

        self.ns.pop_scope();
        Ok(())
    }

    /// The `xmlns` / `xmlns:prefix` attributes of an element, as
    /// `(attribute, declared prefix, URI)`.
    fn collect_declarations(&self, elem: NodeId) -> Vec<(NodeId, Option<String>, String)> {
        let mut decls = Vec::new();
        for &attr in self.doc.attributes(elem) {
            let NodeKind::Attribute { name, prefix, .. } = &self.doc.node(attr).kind else {
                continue;
            };
            let declared = if prefix.as_deref() == Some("xmlns") {
                Some(Some(name.clone()))
            } else if prefix.is_none() && name == "xmlns" {
                Some(None)
            } else {
                None
            };
            if let Some(declared) = declared {
                decls.push((attr, declared, self.doc.attribute_node_value(attr)));
            }
        }
        decls
    }

    fn normalize_children(&mut self, parent: NodeId) -> Result<(), DomError> {
        if !self.config.entities {
            self.expand_entity_references(parent);
        }

        let kids: Vec<NodeId> = self.doc.children(parent).collect();
        for kid in kids {
            match &self.doc.node(kid).kind {
                NodeKind::Element { .. } => self.normalize_element(kid)?,
                NodeKind::Comment { .. } if !self.config.comments => self.doc.detach(kid),
                NodeKind::CData { .. } => self.normalize_cdata(parent, kid)?,
                _ => {}
            }
        }

        self.coalesce_text(parent);
        if !self.config.element_content_whitespace {
            self.drop_element_content_whitespace(parent);
        }
        Ok(())
    }

    /// Splices the materialized content of entity-reference children into
    /// the parent. Spliced content is rescanned, so nested references
    /// expand too.
    fn expand_entity_references(&mut self, parent: NodeId) {
        loop {
            let reference = self
                .doc
                .children(parent)
                .find(|&kid| matches!(self.doc.node(kid).kind, NodeKind::EntityRef { .. }));
            let Some(reference) = reference else {
                return;
            };
            let content: Vec<NodeId> = self.doc.children(reference).collect();
            for node in content {
                self.doc.detach(node);
                self.doc.force_insert_before(parent, node, reference);
            }
            self.doc.detach(reference);
        }
    }

    fn normalize_cdata(&mut self, parent: NodeId, cdata: NodeId) -> Result<(), DomError> {
        let content = match &self.doc.node(cdata).kind {
            NodeKind::CData { content } => content.clone(),
            _ => return Ok(()),
        };
        if !self.config.cdata_sections {
            let text = self.doc.create_text_node(&content);
            self.doc.force_insert_before(parent, text, cdata);
            self.doc.detach(cdata);
            return Ok(());
        }
        if content.contains("]]>") {
            if !self.config.split_cdata_sections {
                return self.report(
                    ErrorSeverity::Error,
                    "invalid-data-in-cdata-section",
                    "CDATA section contains ']]>' and splitting is disabled",
                );
            }
            for part in split_cdata(&content) {
                let section = self.doc.create_cdata_section(&part);
                self.doc.force_insert_before(parent, section, cdata);
            }
            self.doc.detach(cdata);
            self.report(
                ErrorSeverity::Warning,
                "cdata-sections-splitted",
                "CDATA section containing ']]>' was split",
            )?;
        }
        Ok(())
    }

    /// Merges adjacent Text siblings and drops empty Text nodes.
    fn coalesce_text(&mut self, parent: NodeId) {
        let kids: Vec<NodeId> = self.doc.children(parent).collect();
        let mut previous: Option<NodeId> = None;
        for kid in kids {
            match &self.doc.node(kid).kind {
                NodeKind::Text { content } if content.is_empty() => {
                    self.doc.detach(kid);
                }
                NodeKind::Text { content } => match previous {
                    Some(prev) => {
                        let content = content.clone();
                        if let NodeKind::Text { content: existing } =
                            &mut self.doc.node_mut(prev).kind
                        {
                            existing.push_str(&content);
                        }
                        self.doc.detach(kid);
                    }
                    None => previous = Some(kid),
                },
                _ => previous = None,
            }
        }
    }

    /// Drops whitespace-only Text children of elements declared with
    /// element-only content. Undeclared elements are assumed to hold any
    /// content, so their whitespace stays.
    fn drop_element_content_whitespace(&mut self, parent: NodeId) {
        if !matches!(self.doc.node(parent).kind, NodeKind::Element { .. }) {
            return;
        }
        let Some(qname) = self.doc.qualified_name(parent) else {
            return;
        };
        let model = self
            .doc
            .doctype_decls()
            .and_then(|d| d.element_decls.get(&qname).copied());
        if model != Some(ContentModel::ElementOnly) {
            return;
        }
        let kids: Vec<NodeId> = self.doc.children(parent).collect();
        for kid in kids {
            if let NodeKind::Text { content } = &self.doc.node(kid).kind {
                if content.chars().all(|c| matches!(c, ' ' | '\t' | '\n' | '\r')) {
                    self.doc.detach(kid);
                }
            }
        }
    }

    /// Synthesizes declarations so every prefix and namespace in use on
    /// the element is bound in scope.
    fn fixup_namespaces(&mut self, elem: NodeId) -> Result<(), DomError> {
        let (elem_prefix, elem_namespace) = match &self.doc.node(elem).kind {
            NodeKind::Element {
                prefix, namespace, ..
            } => (prefix.clone(), namespace.clone()),
            _ => return Ok(()),
        };

        match &elem_namespace {
            Some(uri) => {
                if !self.ns.is_bound(elem_prefix.as_deref(), uri) {
                    self.declare(elem, elem_prefix.clone(), uri.clone())?;
                }
            }
            None => {
                // An element outside any namespace under an inherited
                // default binding needs xmlns="" to stay that way.
                if elem_prefix.is_none() && self.ns.resolve(None).is_some() {
                    self.declare(elem, None, String::new())?;
                }
            }
        }

        let attrs: Vec<NodeId> = self.doc.attributes(elem).to_vec();
        for attr in attrs {
            let (prefix, namespace) = match &self.doc.node(attr).kind {
                NodeKind::Attribute {
                    prefix, namespace, ..
                } => (prefix.clone(), namespace.clone()),
                _ => continue,
            };
            let (Some(prefix), Some(uri)) = (prefix, namespace) else {
                continue;
            };
            if prefix == "xmlns" || prefix == "xml" {
                continue;
            }
            if self.ns.resolve(Some(&prefix)) == Some(uri.as_str()) {
                continue;
            }
            if self.ns.resolve(Some(&prefix)).is_none() {
                self.declare(elem, Some(prefix), uri)?;
                continue;
            }
            // The prefix is taken; reuse an in-scope binding for the URI
            // when one exists, otherwise mint a new prefix.
            let reusable = match self.ns.prefix_for(&uri) {
                Some(Some(existing)) => Some(existing.to_string()),
                _ => None,
            };
            if let Some(existing) = reusable {
                self.set_attr_prefix(attr, &existing);
            } else {
                let fresh = self.fresh_prefix();
                self.set_attr_prefix(attr, &fresh);
                self.declare(elem, Some(fresh), uri)?;
            }
        }
        Ok(())
    }

    fn set_attr_prefix(&mut self, attr: NodeId, new_prefix: &str) {
        if let NodeKind::Attribute { prefix, .. } = &mut self.doc.node_mut(attr).kind {
            *prefix = Some(new_prefix.to_string());
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

    fn declare(
        &mut self,
        elem: NodeId,
        prefix: Option<String>,
        uri: String,
    ) -> Result<(), DomError> {
        let qname = match &prefix {
            Some(p) => format!("xmlns:{p}"),
            None => "xmlns".to_string(),
        };
        self.doc
            .set_attribute_ns(elem, Some(XMLNS_NAMESPACE), &qname, &uri)
            .map_err(|e| {
                DomError::new(ErrorSeverity::Fatal, "namespace-fixup", e.to_string())
            })?;
        self.ns.bind(prefix, uri);
        Ok(())
    }

    /// Canonical attribute order: namespace declarations first (the
    /// default declaration, then by prefix), then remaining attributes by
    /// (namespace URI, local name).
    fn order_attributes(&mut self, elem: NodeId) {
        let mut attrs: Vec<NodeId> = self.doc.attributes(elem).to_vec();
        attrs.sort_by_key(|&attr| match &self.doc.node(attr).kind {
            NodeKind::Attribute {
                name,
                prefix,
                namespace,
                ..
            } => {
                if prefix.as_deref() == Some("xmlns") {
                    (0u8, 1u8, String::new(), name.clone())
                } else if prefix.is_none() && name == "xmlns" {
                    (0, 0, String::new(), String::new())
                } else {
                    (
                        1,
                        0,
                        namespace.clone().unwrap_or_default(),
                        name.clone(),
                    )
                }
            }
            _ => (2, 0, String::new(), String::new()),
        });
        if let NodeKind::Element { attributes, .. } = &mut self.doc.node_mut(elem).kind {
            *attributes = attrs;
        }
    }

    fn strip_declarations(&mut self, elem: NodeId) {
        for (attr, _, _) in self.collect_declarations(elem) {
            let _ = self.doc.remove_attribute_node(elem, attr);
        }
    }
}

/// Splits CDATA content containing `]]>` into sections that each stay
/// well-formed: the marker ends one section after `]]` and starts the
/// next with `>`.
fn split_cdata(content: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = content;
    while let Some(pos) = rest.find("]]>") {
        parts.push(format!("{}]]", &rest[..pos]));
        rest = &rest[pos + 2..];
    }
    parts.push(rest.to_string());
    parts
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::DomConfig;
    use crate::parser::{parse_str, parse_str_with_options, ParseOptions};
    use crate::tree::NodeKind;

    fn config_with(pairs: &[(&str, bool)]) -> DomConfig {
        let mut config = DomConfig::new();
        for (name, value) in pairs {
            config.set(name, *value).unwrap();
        }
        config
    }

    #[test]
    fn test_entity_references_expanded() {
        let mut doc = parse_str("<!DOCTYPE r [<!ENTITY e \"A&amp;B\">]><r>x&e;y</r>").unwrap();
        normalize_with(&mut doc, &config_with(&[("entities", false)])).unwrap();
        let root = doc.root_element().unwrap();
        let kids: Vec<_> = doc.children(root).collect();
        assert_eq!(kids.len(), 1);
        assert_eq!(doc.node_text(kids[0]), Some("xA&By"));
    }

    #[test]
    fn test_nested_entity_references_expanded() {
        let input = "<!DOCTYPE r [<!ENTITY a \"1\"><!ENTITY b \"x&a;y\">]><r>&b;</r>";
        let mut doc = parse_str(input).unwrap();
        normalize_with(&mut doc, &config_with(&[("entities", false)])).unwrap();
        let root = doc.root_element().unwrap();
        assert_eq!(doc.children(root).count(), 1);
        assert_eq!(doc.text_content(root), "x1y");
    }

    #[test]
    fn test_comments_dropped() {
        let mut doc = parse_str("<r>a<!-- gone -->b</r>").unwrap();
        normalize_with(&mut doc, &config_with(&[("comments", false)])).unwrap();
        let root = doc.root_element().unwrap();
        let kids: Vec<_> = doc.children(root).collect();
        assert_eq!(kids.len(), 1);
        assert_eq!(doc.node_text(kids[0]), Some("ab"));
    }

    #[test]
    fn test_cdata_converted_to_text() {
        let mut doc = parse_str("<r>a<![CDATA[<b>]]>c</r>").unwrap();
        normalize_with(&mut doc, &config_with(&[("cdata-sections", false)])).unwrap();
        let root = doc.root_element().unwrap();
        let kids: Vec<_> = doc.children(root).collect();
        assert_eq!(kids.len(), 1);
        assert_eq!(doc.node_text(kids[0]), Some("a<b>c"));
    }

    #[test]
    fn test_cdata_with_terminator_split() {
        let mut doc = Document::new();
        let root = doc.create_element("r").unwrap();
        let doc_node = doc.root();
        doc.append_child(doc_node, root).unwrap();
        let cdata = doc.create_cdata_section("a]]>b");
        doc.append_child(root, cdata).unwrap();

        normalize_with(&mut doc, &DomConfig::new()).unwrap();
        let kids: Vec<_> = doc.children(root).collect();
        assert_eq!(kids.len(), 2);
        match (&doc.node(kids[0]).kind, &doc.node(kids[1]).kind) {
            (NodeKind::CData { content: a }, NodeKind::CData { content: b }) => {
                assert_eq!(a, "a]]");
                assert_eq!(b, ">b");
            }
            _ => panic!("expected two CDATA sections"),
        }
    }

    #[test]
    fn test_cdata_with_terminator_errors_when_splitting_disabled() {
        let mut doc = Document::new();
        let root = doc.create_element("r").unwrap();
        let doc_node = doc.root();
        doc.append_child(doc_node, root).unwrap();
        let cdata = doc.create_cdata_section("a]]>b");
        doc.append_child(root, cdata).unwrap();

        let config = config_with(&[("split-cdata-sections", false)]);
        assert!(normalize_with(&mut doc, &config).is_err());
    }

    #[test]
    fn test_adjacent_text_coalesced_and_empty_dropped() {
        let mut doc = Document::new();
        let root = doc.create_element("r").unwrap();
        let doc_node = doc.root();
        doc.append_child(doc_node, root).unwrap();
        for content in ["a", "", "b", "c"] {
            let text = doc.create_text_node(content);
            doc.append_child(root, text).unwrap();
        }

        normalize_with(&mut doc, &DomConfig::new()).unwrap();
        let kids: Vec<_> = doc.children(root).collect();
        assert_eq!(kids.len(), 1);
        assert_eq!(doc.node_text(kids[0]), Some("abc"));
    }

    #[test]
    fn test_element_content_whitespace_dropped() {
        let input = "<!DOCTYPE r [<!ELEMENT r (a)*>]><r>\n  <a/>\n  <a/>\n</r>";
        let mut doc = parse_str(input).unwrap();
        let config = config_with(&[("element-content-whitespace", false)]);
        normalize_with(&mut doc, &config).unwrap();
        let root = doc.root_element().unwrap();
        let kids: Vec<_> = doc.children(root).collect();
        assert_eq!(kids.len(), 2);
        assert!(kids
            .iter()
            .all(|&k| matches!(doc.node(k).kind, NodeKind::Element { .. })));
    }

    #[test]
    fn test_mixed_content_whitespace_kept() {
        let input = "<!DOCTYPE r [<!ELEMENT r (#PCDATA | a)*>]><r>\n  <a/>\n</r>";
        let mut doc = parse_str(input).unwrap();
        let config = config_with(&[("element-content-whitespace", false)]);
        normalize_with(&mut doc, &config).unwrap();
        let root = doc.root_element().unwrap();
        assert_eq!(doc.children(root).count(), 3);
    }

    #[test]
    fn test_declarations_stripped_but_namespaces_kept() {
        let mut doc = parse_str("<a:x xmlns:a=\"urn:t\"><a:y/></a:x>").unwrap();
        let config = config_with(&[("namespace-declarations", false)]);
        normalize_with(&mut doc, &config).unwrap();
        let root = doc.root_element().unwrap();
        assert!(doc.attributes(root).is_empty());
        assert_eq!(doc.node_namespace(root), Some("urn:t"));
        let child = doc.first_child(root).unwrap();
        assert_eq!(doc.node_namespace(child), Some("urn:t"));
    }

    #[test]
    fn test_missing_declaration_synthesized() {
        let mut doc = Document::new();
        let root = doc.create_element_ns(Some("urn:e"), "p:r").unwrap();
        let doc_node = doc.root();
        doc.append_child(doc_node, root).unwrap();

        normalize_with(&mut doc, &DomConfig::new()).unwrap();
        assert_eq!(
            doc.attribute_value(root, "xmlns:p").as_deref(),
            Some("urn:e")
        );
    }

    #[test]
    fn test_default_namespace_undeclared_for_unqualified_child() {
        let mut doc = parse_str("<r xmlns=\"urn:d\"/>").unwrap();
        let root = doc.root_element().unwrap();
        let child = doc.create_element("plain").unwrap();
        doc.append_child(root, child).unwrap();

        normalize_with(&mut doc, &DomConfig::new()).unwrap();
        assert_eq!(doc.attribute_value(child, "xmlns").as_deref(), Some(""));
        assert_eq!(doc.node_namespace(child), None);
    }

    #[test]
    fn test_canonical_removes_doctype_and_redundant_declarations() {
        let input = "<!DOCTYPE x [<!ENTITY e \"v\">]>\
                     <a:x xmlns:a=\"urn:t\"><a:y xmlns:a=\"urn:t\"/></a:x>";
        let mut doc = parse_str(input).unwrap();
        let mut config = DomConfig::new();
        config.set("canonical-form", true).unwrap();
        normalize_with(&mut doc, &config).unwrap();

        assert!(doc.doctype().is_none());
        let root = doc.root_element().unwrap();
        let child = doc.first_child(root).unwrap();
        assert!(doc.attributes(child).is_empty());
        assert_eq!(doc.node_namespace(child), Some("urn:t"));
    }

    #[test]
    fn test_canonical_orders_attributes() {
        let mut doc = parse_str(
            "<r xmlns:b=\"urn:b\" z=\"1\" xmlns:a=\"urn:a\" b:k=\"2\" a=\"3\" xmlns=\"urn:d\"/>",
        )
        .unwrap();
        let mut config = DomConfig::new();
        config.set("canonical-form", true).unwrap();
        normalize_with(&mut doc, &config).unwrap();

        let root = doc.root_element().unwrap();
        let names: Vec<String> = doc
            .attributes(root)
            .iter()
            .map(|&a| doc.qualified_name(a).unwrap())
            .collect();
        assert_eq!(
            names,
            vec!["xmlns", "xmlns:a", "xmlns:b", "a", "z", "b:k"]
        );
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let input = "<!DOCTYPE r [<!ENTITY e \"<b>in</b>\">]>\
                     <r a=\"1\">text&e;<![CDATA[data]]><!-- note --></r>";
        let options = ParseOptions::default();
        let mut doc = parse_str_with_options(input, &options).unwrap();
        let config = config_with(&[("entities", false), ("comments", false)]);
        normalize_with(&mut doc, &config).unwrap();

        let once = doc.clone();
        normalize_with(&mut doc, &config).unwrap();
        let a = once.root();
        let b = doc.root();
        assert!(once.is_equal_node(a, &doc, b));
    }
}
