//! XML 1.0/1.1 parser.
//!
//! A hand-rolled recursive descent parser building a `Document` tree.
//! Hand-rolled rather than combinator-based because:
//! 1. Error recovery requires fine-grained control over parse state
//! 2. Entity expansion nests input buffers mid-production
//! 3. Performance — no abstraction overhead
//!
//! Behavior is driven by the document's [`DomConfig`]: `entities` controls
//! whether references stay in the tree, `cdata-sections` and `comments`
//! control which node kinds are built, `namespaces` switches prefix
//! resolution on and off. A [`NodeFilter`] can prune or cut short the
//! build while parsing.

pub(crate) mod input;
mod xml;

use std::sync::Arc;

use crate::config::DomConfig;
use crate::error::{ParseError, SourceLocation};
use crate::tree::{Document, NodeId};

use input::{
    DEFAULT_MAX_ATTRIBUTES, DEFAULT_MAX_DEPTH, DEFAULT_MAX_ENTITY_EXPANSIONS,
    DEFAULT_MAX_EXPANSION_SIZE, DEFAULT_MAX_NAME_LENGTH,
};

/// The verdict of a [`NodeFilter`] for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    /// Keep the node (and, at start, parse into it).
    Accept,
    /// Drop the node and its whole subtree.
    Reject,
    /// Drop the node but splice its children into its place.
    Skip,
    /// Stop parsing; the document built so far is returned.
    Interrupt,
}

/// When a [`NodeFilter`] is consulted for an element.
///
/// Elements are offered twice: at `Start` right after their start tag
/// (attributes already present, no children yet), and at `Complete` when
/// the subtree is fully built. Leaf kinds are only offered at `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPhase {
    /// The element's start tag has been read.
    Start,
    /// The node and its subtree are complete.
    Complete,
}

/// A streaming node filter consulted while the tree is built.
///
/// The callback sees the node already materialized in the document under
/// construction and returns what to do with it.
pub type NodeFilter = Arc<dyn Fn(&Document, NodeId, FilterPhase) -> FilterAction + Send + Sync>;

/// How [`parse_with_context`] splices the parsed content relative to the
/// context node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextAction {
    /// Append the parsed nodes as the last children of the context node.
    AppendAsChildren,
    /// Remove the context node's children first, then append.
    ReplaceChildren,
    /// Insert the parsed nodes before the context node.
    InsertBefore,
    /// Insert the parsed nodes after the context node.
    InsertAfter,
    /// Insert the parsed nodes in place of the context node.
    Replace,
}

/// Parse options: the tree-shaping configuration plus security limits and
/// the optional streaming filter.
///
/// ```
/// use domoxide::parser::ParseOptions;
///
/// let opts = ParseOptions::default().recover(true).max_depth(128);
/// ```
pub struct ParseOptions {
    /// If true, recoverable errors are collected as diagnostics and a
    /// (possibly partial) tree is still produced.
    pub recover: bool,
    /// Tree-shaping configuration. The parser consults `entities`,
    /// `cdata-sections`, `comments`, `namespaces`, `disallow-doctype`,
    /// and the error handler and resource resolver hooks.
    pub config: DomConfig,
    /// Optional streaming filter consulted as nodes are built.
    pub filter: Option<NodeFilter>,
    /// If true, system identifiers the resolver does not handle (or all of
    /// them, when no resolver is installed) are opened directly as URIs.
    /// Off by default: parsing untrusted input must not touch the network
    /// or filesystem.
    pub fetch_external: bool,

    // -- Security limits --
    /// Maximum element nesting depth (default: 256).
    pub max_depth: u32,
    /// Maximum number of attributes on a single element (default: 256).
    pub max_attributes: u32,
    /// Maximum length of an element or attribute name (default: 50,000).
    pub max_name_length: usize,
    /// Maximum number of entity expansions per document (default: 10,000).
    pub max_entity_expansions: u32,
    /// Maximum total characters produced by entity expansion
    /// (default: 10 MB).
    pub max_expansion_size: usize,
}

impl Clone for ParseOptions {
    fn clone(&self) -> Self {
        Self {
            recover: self.recover,
            config: self.config.clone(),
            filter: self.filter.clone(),
            fetch_external: self.fetch_external,
            max_depth: self.max_depth,
            max_attributes: self.max_attributes,
            max_name_length: self.max_name_length,
            max_entity_expansions: self.max_entity_expansions,
            max_expansion_size: self.max_expansion_size,
        }
    }
}

impl std::fmt::Debug for ParseOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParseOptions")
            .field("recover", &self.recover)
            .field("config", &self.config)
            .field("filter", &self.filter.as_ref().map(|_| "..."))
            .field("fetch_external", &self.fetch_external)
            .field("max_depth", &self.max_depth)
            .field("max_attributes", &self.max_attributes)
            .field("max_name_length", &self.max_name_length)
            .field("max_entity_expansions", &self.max_entity_expansions)
            .field("max_expansion_size", &self.max_expansion_size)
            .finish()
    }
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            recover: false,
            config: DomConfig::new(),
            filter: None,
            fetch_external: false,
            max_depth: DEFAULT_MAX_DEPTH,
            max_attributes: DEFAULT_MAX_ATTRIBUTES,
            max_name_length: DEFAULT_MAX_NAME_LENGTH,
            max_entity_expansions: DEFAULT_MAX_ENTITY_EXPANSIONS,
            max_expansion_size: DEFAULT_MAX_EXPANSION_SIZE,
        }
    }
}

impl ParseOptions {
    /// Enables or disables error recovery mode.
    #[must_use]
    pub fn recover(mut self, yes: bool) -> Self {
        self.recover = yes;
        self
    }

    /// Replaces the tree-shaping configuration.
    #[must_use]
    pub fn config(mut self, config: DomConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the streaming node filter.
    #[must_use]
    pub fn filter(
        mut self,
        filter: impl Fn(&Document, NodeId, FilterPhase) -> FilterAction + Send + Sync + 'static,
    ) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Enables opening unresolved system identifiers directly as URIs.
    #[must_use]
    pub fn fetch_external(mut self, yes: bool) -> Self {
        self.fetch_external = yes;
        self
    }

    /// Sets the maximum element nesting depth.
    #[must_use]
    pub fn max_depth(mut self, max: u32) -> Self {
        self.max_depth = max;
        self
    }

    /// Sets the maximum number of attributes per element.
    #[must_use]
    pub fn max_attributes(mut self, max: u32) -> Self {
        self.max_attributes = max;
        self
    }

    /// Sets the maximum element/attribute name length.
    #[must_use]
    pub fn max_name_length(mut self, max: usize) -> Self {
        self.max_name_length = max;
        self
    }

    /// Sets the maximum number of entity expansions.
    #[must_use]
    pub fn max_entity_expansions(mut self, max: u32) -> Self {
        self.max_entity_expansions = max;
        self
    }

    /// Sets the maximum total size of entity expansion output.
    #[must_use]
    pub fn max_expansion_size(mut self, max: usize) -> Self {
        self.max_expansion_size = max;
        self
    }
}

/// Parses an XML string with default options.
///
/// # Errors
///
/// Returns `ParseError` if the input is not well-formed XML.
pub fn parse_str(input: &str) -> Result<Document, ParseError> {
    parse_str_with_options(input, &ParseOptions::default())
}

/// Parses an XML string with the given options.
///
/// # Errors
///
/// Returns `ParseError` if the input is not well-formed XML and recovery
/// mode is not enabled.
pub fn parse_str_with_options(input: &str, options: &ParseOptions) -> Result<Document, ParseError> {
    let buffer = input::InputBuffer::from_str(input);
    xml::XmlParser::new(buffer, options).parse()
}

/// Parses raw bytes, auto-detecting the encoding from the BOM and the
/// declaration.
///
/// # Errors
///
/// Returns `ParseError` when decoding fails or the input is not
/// well-formed.
pub fn parse_bytes(input: &[u8]) -> Result<Document, ParseError> {
    parse_bytes_with_options(input, &ParseOptions::default())
}

/// Parses raw bytes with the given options.
///
/// # Errors
///
/// Returns `ParseError` when decoding fails or the input is not
/// well-formed and recovery mode is not enabled.
pub fn parse_bytes_with_options(
    input: &[u8],
    options: &ParseOptions,
) -> Result<Document, ParseError> {
    let buffer = input::InputBuffer::from_bytes(input).map_err(|e| ParseError {
        message: e.to_string(),
        location: SourceLocation::default(),
        diagnostics: vec![],
    })?;
    xml::XmlParser::new(buffer, options).parse()
}

/// Parses a document from a URI: a filesystem path, a `file://` URI, or
/// an `http(s)://` URL.
///
/// # Errors
///
/// Returns `ParseError` when the resource cannot be read, decoded, or
/// parsed.
pub fn parse_uri(uri: &str) -> Result<Document, ParseError> {
    parse_uri_with_options(uri, &ParseOptions::default())
}

/// Parses a document from a URI with the given options.
///
/// # Errors
///
/// As [`parse_uri`].
pub fn parse_uri_with_options(uri: &str, options: &ParseOptions) -> Result<Document, ParseError> {
    let bytes = read_uri(uri).map_err(|message| ParseError {
        message,
        location: SourceLocation::default(),
        diagnostics: vec![],
    })?;
    let mut doc = parse_bytes_with_options(&bytes, options)?;
    doc.document_uri = Some(uri.to_string());
    Ok(doc)
}

/// Parses `input` as element content in the namespace context of
/// `context` and splices the resulting nodes per `action`. Returns the
/// first spliced node, or `None` when the input held no content.
///
/// # Errors
///
/// Returns `ParseError` when the fragment is not well-formed, or when the
/// context node cannot legally receive the content (reported as a parse
/// error carrying the structural message).
pub fn parse_with_context(
    doc: &mut Document,
    context: NodeId,
    action: ContextAction,
    input: &str,
    options: &ParseOptions,
) -> Result<Option<NodeId>, ParseError> {
    let buffer = input::InputBuffer::from_str(input);
    let nodes = xml::XmlParser::new(buffer, options).parse_fragment(doc, context)?;
    let first = nodes.first().copied();

    let structural = |e: crate::error::DomException| ParseError {
        message: e.to_string(),
        location: SourceLocation::default(),
        diagnostics: vec![],
    };

    match action {
        ContextAction::AppendAsChildren => {
            for node in nodes {
                doc.append_child(context, node).map_err(structural)?;
            }
        }
        ContextAction::ReplaceChildren => {
            let old: Vec<NodeId> = doc.children(context).collect();
            for child in old {
                doc.detach(child);
            }
            for node in nodes {
                doc.append_child(context, node).map_err(structural)?;
            }
        }
        ContextAction::InsertBefore | ContextAction::InsertAfter | ContextAction::Replace => {
            let parent = doc.parent(context).ok_or_else(|| ParseError {
                message: "context node has no parent to splice into".to_string(),
                location: SourceLocation::default(),
                diagnostics: vec![],
            })?;
            let anchor = if action == ContextAction::InsertAfter {
                doc.next_sibling(context)
            } else {
                Some(context)
            };
            for node in nodes {
                doc.insert_before(parent, node, anchor).map_err(structural)?;
            }
            if action == ContextAction::Replace {
                doc.detach(context);
            }
        }
    }
    Ok(first)
}

/// Reads the bytes behind a URI: local paths, `file://` URIs, and
/// `http(s)://` URLs.
pub(crate) fn read_uri(uri: &str) -> Result<Vec<u8>, String> {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        let response = reqwest::blocking::get(uri)
            .map_err(|e| format!("failed to fetch {uri}: {e}"))?
            .error_for_status()
            .map_err(|e| format!("failed to fetch {uri}: {e}"))?;
        let bytes = response
            .bytes()
            .map_err(|e| format!("failed to read {uri}: {e}"))?;
        Ok(bytes.to_vec())
    } else {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        std::fs::read(path).map_err(|e| format!("failed to read {path}: {e}"))
    }
}

/// Resolves a possibly relative system identifier against a base URI.
/// Minimal resolution: absolute URIs and rooted paths pass through;
/// otherwise the reference replaces the last segment of the base.
pub(crate) fn resolve_uri(base: Option<&str>, reference: &str) -> String {
    if reference.contains("://") || reference.starts_with('/') {
        return reference.to_string();
    }
    match base {
        Some(base) => match base.rfind('/') {
            Some(pos) => format!("{}/{}", &base[..pos], reference),
            None => reference.to_string(),
        },
        None => reference.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options_builder() {
        let opts = ParseOptions::default()
            .recover(true)
            .max_depth(64)
            .max_entity_expansions(100);
        assert!(opts.recover);
        assert_eq!(opts.max_depth, 64);
        assert_eq!(opts.max_entity_expansions, 100);
    }

    #[test]
    fn test_resolve_uri() {
        assert_eq!(resolve_uri(None, "dtd/doc.dtd"), "dtd/doc.dtd");
        assert_eq!(
            resolve_uri(Some("http://h/a/b.xml"), "doc.dtd"),
            "http://h/a/doc.dtd"
        );
        assert_eq!(
            resolve_uri(Some("http://h/a/b.xml"), "http://x/doc.dtd"),
            "http://x/doc.dtd"
        );
        assert_eq!(resolve_uri(Some("/tmp/a.xml"), "/etc/doc.dtd"), "/etc/doc.dtd");
    }

    #[test]
    fn test_parse_with_context_append() {
        let mut doc = crate::tree::Document::parse_str("<root><a/></root>").unwrap();
        let root = doc.root_element().unwrap();
        let first = parse_with_context(
            &mut doc,
            root,
            ContextAction::AppendAsChildren,
            "<b/>text",
            &ParseOptions::default(),
        )
        .unwrap();
        assert!(first.is_some());
        let names: Vec<Option<String>> = doc
            .children(root)
            .map(|c| doc.node_name(c).map(str::to_string))
            .collect();
        assert_eq!(names.len(), 3);
        assert_eq!(names[1].as_deref(), Some("b"));
    }

    #[test]
    fn test_parse_with_context_replace() {
        let mut doc = crate::tree::Document::parse_str("<root><old/></root>").unwrap();
        let root = doc.root_element().unwrap();
        let old = doc.first_child(root).unwrap();
        parse_with_context(
            &mut doc,
            old,
            ContextAction::Replace,
            "<new/>",
            &ParseOptions::default(),
        )
        .unwrap();
        let children: Vec<NodeId> = doc.children(root).collect();
        assert_eq!(children.len(), 1);
        assert_eq!(doc.node_name(children[0]), Some("new"));
    }

    #[test]
    fn test_parse_with_context_replace_children() {
        let mut doc = crate::tree::Document::parse_str("<root><a/><b/></root>").unwrap();
        let root = doc.root_element().unwrap();
        parse_with_context(
            &mut doc,
            root,
            ContextAction::ReplaceChildren,
            "only",
            &ParseOptions::default(),
        )
        .unwrap();
        assert_eq!(doc.text_content(root), "only");
        assert_eq!(doc.children(root).count(), 1);
    }

    #[test]
    fn test_parse_with_context_uses_namespace_scope() {
        let mut doc =
            crate::tree::Document::parse_str("<root xmlns:p=\"urn:p\"><a/></root>").unwrap();
        let root = doc.root_element().unwrap();
        let first = parse_with_context(
            &mut doc,
            root,
            ContextAction::AppendAsChildren,
            "<p:item/>",
            &ParseOptions::default(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(doc.node_namespace(first), Some("urn:p"));
    }
}
