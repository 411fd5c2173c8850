//! The in-memory document tree.
//!
//! Nodes live in an arena owned by [`Document`]; a [`NodeId`] is a stable
//! handle (document tag + index) into that arena. Parent, sibling, and
//! child references are plain handles, never owning pointers, so the
//! child→parent and attribute→owner back-references cost nothing to keep
//! consistent. A node is reachable only through its owning document; a
//! detached subtree stays in the arena but is no longer visible from any
//! traversal and is dropped with the document.
//!
//! All structural mutation funnels through the attach/detach primitives,
//! which keep the sibling links consistent and stamp a change sequence on
//! the mutated node and each of its ancestors. Cached views such as
//! [`LiveList`] use the stamps to revalidate lazily.

pub mod node;

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::config::DomConfig;
use crate::error::{DomException, DomExceptionCode, ParseDiagnostic, ParseError};
use crate::parser::input::{is_valid_name, is_valid_qname, split_name, XMLNS_NAMESPACE, XML_NAMESPACE};

pub use node::{AttlistDecl, AttributeType, ContentModel, DefaultDecl, DtdDeclarations, NodeKind};

/// `compare_document_position`: the two nodes share no tree.
pub const POSITION_DISCONNECTED: u16 = 0x01;
/// `compare_document_position`: the other node precedes this one.
pub const POSITION_PRECEDING: u16 = 0x02;
/// `compare_document_position`: the other node follows this one.
pub const POSITION_FOLLOWING: u16 = 0x04;
/// `compare_document_position`: the other node contains this one.
pub const POSITION_CONTAINS: u16 = 0x08;
/// `compare_document_position`: the other node is contained by this one.
pub const POSITION_CONTAINED_BY: u16 = 0x10;
/// `compare_document_position`: the ordering is implementation-specific.
pub const POSITION_IMPLEMENTATION_SPECIFIC: u16 = 0x20;

static NEXT_DOC_TAG: AtomicU32 = AtomicU32::new(1);

/// A stable handle to a node in a document arena.
///
/// Carries the owning document's tag so that a handle from one document
/// can never silently address a node in another; cross-document use of a
/// mutator fails with `WRONG_DOCUMENT_ERR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    doc: u32,
    index: NonZeroU32,
}

impl NodeId {
    fn new(doc: u32, index: usize) -> Self {
        debug_assert!(index > 0 && index <= u32::MAX as usize);
        #[allow(clippy::cast_possible_truncation)]
        let raw = index as u32;
        Self {
            doc,
            // Index 0 is the permanent placeholder slot, never handed out.
            index: NonZeroU32::new(raw).unwrap_or(NonZeroU32::MIN),
        }
    }

    fn as_index(self) -> usize {
        self.index.get() as usize
    }
}

/// Arena storage for one node: its kind plus navigation links.
#[derive(Debug, Clone)]
pub struct NodeData {
    /// The node kind and payload.
    pub kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) first_child: Option<NodeId>,
    pub(crate) last_child: Option<NodeId>,
    pub(crate) prev_sibling: Option<NodeId>,
    pub(crate) next_sibling: Option<NodeId>,
    pub(crate) sequence: u64,
}

impl NodeData {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            parent: None,
            first_child: None,
            last_child: None,
            prev_sibling: None,
            next_sibling: None,
            sequence: 0,
        }
    }
}

/// An XML document: the arena, the root node, and document-wide state.
///
/// # Examples
///
/// ```
/// use domoxide::Document;
///
/// let doc = Document::parse_str("<root><child>Hello</child></root>").unwrap();
/// let root = doc.root_element().unwrap();
/// assert_eq!(doc.node_name(root), Some("root"));
/// ```
#[derive(Debug, Clone)]
pub struct Document {
    doc_tag: u32,
    nodes: Vec<NodeData>,
    root: NodeId,
    /// XML version from the declaration (`"1.0"` / `"1.1"`), if declared.
    pub version: Option<String>,
    /// Encoding label from the declaration, if declared.
    pub encoding: Option<String>,
    /// Standalone flag from the declaration, if declared.
    pub standalone: Option<bool>,
    /// The URI this document was read from, if any.
    pub document_uri: Option<String>,
    /// The configuration consumed by the normalizer and serializer.
    pub config: DomConfig,
    /// Diagnostics collected during parsing in recovery mode.
    pub diagnostics: Vec<ParseDiagnostic>,
    id_map: HashMap<String, NodeId>,
    change_counter: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Creates an empty document containing only the document node.
    #[must_use]
    pub fn new() -> Self {
        let doc_tag = NEXT_DOC_TAG.fetch_add(1, Ordering::Relaxed);
        let mut nodes = Vec::with_capacity(16);
        // Slot 0 is a placeholder so NodeId can be NonZero-backed.
        nodes.push(NodeData::new(NodeKind::Document));
        nodes.push(NodeData::new(NodeKind::Document));
        Self {
            doc_tag,
            nodes,
            root: NodeId::new(doc_tag, 1),
            version: None,
            encoding: None,
            standalone: None,
            document_uri: None,
            config: DomConfig::new(),
            diagnostics: Vec::new(),
            id_map: HashMap::new(),
            change_counter: 0,
        }
    }

    /// Parses a UTF-8 string into a document with the default options.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] when the input is not well-formed.
    pub fn parse_str(input: &str) -> Result<Self, ParseError> {
        crate::parser::parse_str(input)
    }

    /// Parses raw bytes, auto-detecting the encoding.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] when decoding fails or the input is not
    /// well-formed.
    pub fn parse_bytes(input: &[u8]) -> Result<Self, ParseError> {
        crate::parser::parse_bytes(input)
    }

    // -- Raw accessors ------------------------------------------------------

    /// The document node.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Borrows a node's storage.
    ///
    /// # Panics
    ///
    /// Panics if the handle belongs to a different document.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &NodeData {
        assert_eq!(id.doc, self.doc_tag, "node handle from another document");
        &self.nodes[id.as_index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut NodeData {
        assert_eq!(id.doc, self.doc_tag, "node handle from another document");
        &mut self.nodes[id.as_index()]
    }

    /// True when the handle belongs to this document.
    #[must_use]
    pub fn owns(&self, id: NodeId) -> bool {
        id.doc == self.doc_tag && id.as_index() < self.nodes.len()
    }

    /// The number of allocated nodes, including detached ones.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len() - 1
    }

    /// The document-wide change counter. Incremented by every structural
    /// mutation.
    #[must_use]
    pub fn change_counter(&self) -> u64 {
        self.change_counter
    }

    /// The change-sequence stamp of a node: the counter value of the last
    /// mutation in its subtree.
    #[must_use]
    pub fn sequence(&self, id: NodeId) -> u64 {
        self.node(id).sequence
    }

    fn bump(&mut self, id: NodeId) {
        self.change_counter += 1;
        let stamp = self.change_counter;
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let data = self.node_mut(current);
            data.sequence = stamp;
            cursor = data.parent;
        }
    }

    pub(crate) fn allocate(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId::new(self.doc_tag, self.nodes.len());
        self.nodes.push(NodeData::new(kind));
        id
    }

    // -- Creation factories -------------------------------------------------

    /// Creates a Level-1 element carrying the full name without namespace
    /// awareness.
    ///
    /// # Errors
    ///
    /// `INVALID_CHARACTER_ERR` when the name violates the Name production.
    pub fn create_element(&mut self, name: &str) -> Result<NodeId, DomException> {
        check_name(name)?;
        Ok(self.allocate(NodeKind::Element {
            name: name.to_string(),
            prefix: None,
            namespace: None,
            attributes: vec![],
        }))
    }

    /// Creates a namespace-aware element from a namespace URI and a
    /// qualified name.
    ///
    /// # Errors
    ///
    /// `INVALID_CHARACTER_ERR` for an invalid name, `NAMESPACE_ERR` for an
    /// inconsistent prefix/namespace combination.
    pub fn create_element_ns(
        &mut self,
        namespace: Option<&str>,
        qname: &str,
    ) -> Result<NodeId, DomException> {
        let (prefix, local) = check_qname(namespace, qname)?;
        Ok(self.allocate(NodeKind::Element {
            name: local,
            prefix,
            namespace: namespace.map(str::to_string),
            attributes: vec![],
        }))
    }

    /// Creates a Level-1 attribute node with no children.
    ///
    /// # Errors
    ///
    /// `INVALID_CHARACTER_ERR` when the name violates the Name production.
    pub fn create_attribute(&mut self, name: &str) -> Result<NodeId, DomException> {
        check_name(name)?;
        Ok(self.allocate(NodeKind::Attribute {
            name: name.to_string(),
            prefix: None,
            namespace: None,
            specified: true,
            is_id: false,
        }))
    }

    /// Creates a namespace-aware attribute node with no children.
    ///
    /// # Errors
    ///
    /// `INVALID_CHARACTER_ERR` for an invalid name, `NAMESPACE_ERR` for an
    /// inconsistent prefix/namespace combination.
    pub fn create_attribute_ns(
        &mut self,
        namespace: Option<&str>,
        qname: &str,
    ) -> Result<NodeId, DomException> {
        let (prefix, local) = check_qname(namespace, qname)?;
        if (qname == "xmlns" || prefix.as_deref() == Some("xmlns"))
            && namespace != Some(XMLNS_NAMESPACE)
        {
            return Err(DomException::new(
                DomExceptionCode::Namespace,
                "xmlns attributes must use the xmlns namespace",
            ));
        }
        Ok(self.allocate(NodeKind::Attribute {
            name: local,
            prefix,
            namespace: namespace.map(str::to_string),
            specified: true,
            is_id: false,
        }))
    }

    /// Creates a text node.
    pub fn create_text_node(&mut self, content: &str) -> NodeId {
        self.allocate(NodeKind::Text {
            content: content.to_string(),
        })
    }

    /// Creates a CDATA section node.
    pub fn create_cdata_section(&mut self, content: &str) -> NodeId {
        self.allocate(NodeKind::CData {
            content: content.to_string(),
        })
    }

    /// Creates a comment node.
    pub fn create_comment(&mut self, content: &str) -> NodeId {
        self.allocate(NodeKind::Comment {
            content: content.to_string(),
        })
    }

    /// Creates a processing instruction node.
    ///
    /// # Errors
    ///
    /// `INVALID_CHARACTER_ERR` when the target violates the Name production.
    pub fn create_processing_instruction(
        &mut self,
        target: &str,
        data: Option<&str>,
    ) -> Result<NodeId, DomException> {
        check_name(target)?;
        Ok(self.allocate(NodeKind::ProcessingInstruction {
            target: target.to_string(),
            data: data.map(str::to_string),
        }))
    }

    /// Creates an empty document fragment.
    pub fn create_document_fragment(&mut self) -> NodeId {
        self.allocate(NodeKind::DocumentFragment)
    }

    /// Creates an entity reference. When the document's DOCTYPE declares
    /// the entity, the reference's children are filled with a copy of the
    /// entity's replacement content.
    ///
    /// # Errors
    ///
    /// `INVALID_CHARACTER_ERR` when the name violates the Name production.
    pub fn create_entity_reference(&mut self, name: &str) -> Result<NodeId, DomException> {
        check_name(name)?;
        let reference = self.allocate(NodeKind::EntityRef {
            name: name.to_string(),
        });
        if let Some(entity) = self.entity(name) {
            let replacement: Vec<NodeId> = self.children(entity).collect();
            for child in replacement {
                let copy = self.clone_subtree(child, true);
                self.force_append(reference, copy);
            }
        }
        Ok(reference)
    }

    // -- Name and payload accessors -----------------------------------------

    /// The local name of an element or attribute, the target of a PI, or
    /// the name of an entity reference, entity, notation, or doctype.
    #[must_use]
    pub fn node_name(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Element { name, .. }
            | NodeKind::Attribute { name, .. }
            | NodeKind::EntityRef { name }
            | NodeKind::Entity { name, .. }
            | NodeKind::Notation { name, .. }
            | NodeKind::DocumentType { name, .. } => Some(name),
            NodeKind::ProcessingInstruction { target, .. } => Some(target),
            _ => None,
        }
    }

    /// The namespace URI of an element or attribute.
    #[must_use]
    pub fn node_namespace(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Element { namespace, .. } | NodeKind::Attribute { namespace, .. } => {
                namespace.as_deref()
            }
            _ => None,
        }
    }

    /// The namespace prefix of an element or attribute.
    #[must_use]
    pub fn node_prefix(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Element { prefix, .. } | NodeKind::Attribute { prefix, .. } => {
                prefix.as_deref()
            }
            _ => None,
        }
    }

    /// The rendered qualified name (`prefix:local` or `local`) of an
    /// element or attribute.
    #[must_use]
    pub fn qualified_name(&self, id: NodeId) -> Option<String> {
        match &self.node(id).kind {
            NodeKind::Element { name, prefix, .. } | NodeKind::Attribute { name, prefix, .. } => {
                Some(match prefix {
                    Some(p) => format!("{p}:{name}"),
                    None => name.clone(),
                })
            }
            _ => None,
        }
    }

    /// The character data of a Text, CDATA, or Comment node, or the data
    /// of a processing instruction.
    #[must_use]
    pub fn node_text(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Text { content }
            | NodeKind::CData { content }
            | NodeKind::Comment { content } => Some(content),
            NodeKind::ProcessingInstruction { data, .. } => data.as_deref(),
            _ => None,
        }
    }

    /// Concatenates the text and CDATA content of a node's subtree,
    /// descending through entity references.
    #[must_use]
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        if let NodeKind::Text { content } | NodeKind::CData { content } = &self.node(id).kind {
            out.push_str(content);
        }
        for descendant in self.descendants(id) {
            if let NodeKind::Text { content } | NodeKind::CData { content } =
                &self.node(descendant).kind
            {
                out.push_str(content);
            }
        }
        out
    }

    // -- Traversal ----------------------------------------------------------

    /// The container of a node: its parent, or the owning element for an
    /// attribute node.
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// The first child of a node.
    #[must_use]
    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).first_child
    }

    /// The last child of a node.
    #[must_use]
    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).last_child
    }

    /// The next sibling of a node.
    #[must_use]
    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).next_sibling
    }

    /// The previous sibling of a node.
    #[must_use]
    pub fn prev_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).prev_sibling
    }

    /// Iterates over the direct children of a node.
    #[must_use]
    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children {
            doc: self,
            next: self.node(id).first_child,
        }
    }

    /// Iterates over a node and its ancestors, ending at the document node.
    #[must_use]
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            doc: self,
            next: Some(id),
        }
    }

    /// Iterates over all descendants of a node in document order, the node
    /// itself excluded.
    #[must_use]
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        Descendants {
            doc: self,
            scope: id,
            next: self.node(id).first_child,
        }
    }

    /// The unique element child of the document node, if present.
    #[must_use]
    pub fn root_element(&self) -> Option<NodeId> {
        self.children(self.root)
            .find(|&id| matches!(self.node(id).kind, NodeKind::Element { .. }))
    }

    /// The DocumentType child of the document node, if present.
    #[must_use]
    pub fn doctype(&self) -> Option<NodeId> {
        self.children(self.root)
            .find(|&id| matches!(self.node(id).kind, NodeKind::DocumentType { .. }))
    }

    /// The parsed DTD declaration maps, if a DOCTYPE is present.
    #[must_use]
    pub fn doctype_decls(&self) -> Option<&DtdDeclarations> {
        self.doctype().map(|id| match &self.node(id).kind {
            NodeKind::DocumentType { decls, .. } => decls,
            _ => unreachable!(),
        })
    }

    /// Looks up a declared general entity by name.
    #[must_use]
    pub fn entity(&self, name: &str) -> Option<NodeId> {
        self.doctype_decls()
            .and_then(|decls| decls.entities.get(name).copied())
    }

    // -- Structural mutation ------------------------------------------------

    /// Detaches a node from its parent, leaving it and its subtree alive
    /// but unreachable from the tree. No-op for a node with no parent.
    pub fn detach(&mut self, id: NodeId) {
        let data = self.node(id);
        let parent = data.parent;
        let prev = data.prev_sibling;
        let next = data.next_sibling;
        let Some(parent) = parent else { return };

        match prev {
            Some(prev) => self.node_mut(prev).next_sibling = next,
            None => self.node_mut(parent).first_child = next,
        }
        match next {
            Some(next) => self.node_mut(next).prev_sibling = prev,
            None => self.node_mut(parent).last_child = prev,
        }
        {
            let data = self.node_mut(id);
            data.parent = None;
            data.prev_sibling = None;
            data.next_sibling = None;
        }
        self.bump(parent);
    }

    /// Links `node` as the last child of `parent` without validity checks.
    /// The parser and normalizer use this for structure they already know
    /// to be valid.
    pub(crate) fn force_append(&mut self, parent: NodeId, node: NodeId) {
        self.detach(node);
        let last = self.node(parent).last_child;
        {
            let data = self.node_mut(node);
            data.parent = Some(parent);
            data.prev_sibling = last;
            data.next_sibling = None;
        }
        match last {
            Some(last) => self.node_mut(last).next_sibling = Some(node),
            None => self.node_mut(parent).first_child = Some(node),
        }
        self.node_mut(parent).last_child = Some(node);
        self.bump(node);
    }

    /// Links `node` immediately before `reference` without validity
    /// checks. `reference` must be a child of `parent`.
    pub(crate) fn force_insert_before(
        &mut self,
        parent: NodeId,
        node: NodeId,
        reference: NodeId,
    ) {
        self.detach(node);
        let prev = self.node(reference).prev_sibling;
        {
            let data = self.node_mut(node);
            data.parent = Some(parent);
            data.prev_sibling = prev;
            data.next_sibling = Some(reference);
        }
        self.node_mut(reference).prev_sibling = Some(node);
        match prev {
            Some(prev) => self.node_mut(prev).next_sibling = Some(node),
            None => self.node_mut(parent).first_child = Some(node),
        }
        self.bump(node);
    }

    fn check_owned(&self, id: NodeId) -> Result<(), DomException> {
        if self.owns(id) {
            Ok(())
        } else {
            Err(DomException::new(
                DomExceptionCode::WrongDocument,
                "node belongs to a different document; adopt or import it first",
            ))
        }
    }

    fn check_insertion(&self, parent: NodeId, node: NodeId) -> Result<(), DomException> {
        self.check_owned(parent)?;
        self.check_owned(node)?;

        let parent_kind = &self.node(parent).kind;
        if !parent_kind.allows_children() {
            return Err(DomException::new(
                DomExceptionCode::HierarchyRequest,
                format!("{} nodes cannot hold children", parent_kind.type_name()),
            ));
        }

        // No node may become its own ancestor.
        if self.ancestors(parent).any(|ancestor| ancestor == node) {
            return Err(DomException::new(
                DomExceptionCode::HierarchyRequest,
                "a node cannot become a child of itself or its own descendant",
            ));
        }

        let check_kind = |kind: &NodeKind| -> Result<(), DomException> {
            if parent_kind.allows_child(kind) {
                Ok(())
            } else {
                Err(DomException::new(
                    DomExceptionCode::HierarchyRequest,
                    format!(
                        "a {} node is not allowed under a {} node",
                        kind.type_name(),
                        parent_kind.type_name()
                    ),
                ))
            }
        };

        match &self.node(node).kind {
            NodeKind::DocumentFragment => {
                for child in self.children(node) {
                    check_kind(&self.node(child).kind)?;
                }
                if parent == self.root {
                    let incoming = self
                        .children(node)
                        .filter(|&c| matches!(self.node(c).kind, NodeKind::Element { .. }))
                        .count();
                    self.check_document_slots(node, incoming, 0)?;
                }
                Ok(())
            }
            kind => {
                check_kind(kind)?;
                if parent == self.root {
                    let (elements, doctypes) = match kind {
                        NodeKind::Element { .. } => (1, 0),
                        NodeKind::DocumentType { .. } => (0, 1),
                        _ => (0, 0),
                    };
                    self.check_document_slots(node, elements, doctypes)?;
                }
                Ok(())
            }
        }
    }

    /// Document cardinality: at most one Element and one DocumentType
    /// child. `incoming` is the node (or fragment) about to be inserted.
    fn check_document_slots(
        &self,
        incoming: NodeId,
        new_elements: usize,
        new_doctypes: usize,
    ) -> Result<(), DomException> {
        let mut elements = new_elements;
        let mut doctypes = new_doctypes;
        for child in self.children(self.root) {
            if child == incoming {
                continue;
            }
            match self.node(child).kind {
                NodeKind::Element { .. } => elements += 1,
                NodeKind::DocumentType { .. } => doctypes += 1,
                _ => {}
            }
        }
        if elements > 1 {
            return Err(DomException::new(
                DomExceptionCode::HierarchyRequest,
                "document may hold only one element child",
            ));
        }
        if doctypes > 1 {
            return Err(DomException::new(
                DomExceptionCode::HierarchyRequest,
                "document may hold only one doctype child",
            ));
        }
        Ok(())
    }

    /// Appends `node` as the last child of `parent`, detaching it from any
    /// previous parent first. Inserting a DocumentFragment splices its
    /// children and leaves the fragment empty.
    ///
    /// # Errors
    ///
    /// `HIERARCHY_REQUEST_ERR` for a kind or cycle violation,
    /// `WRONG_DOCUMENT_ERR` for a handle from another document.
    pub fn append_child(&mut self, parent: NodeId, node: NodeId) -> Result<NodeId, DomException> {
        self.check_insertion(parent, node)?;
        if matches!(self.node(node).kind, NodeKind::DocumentFragment) {
            let children: Vec<NodeId> = self.children(node).collect();
            for child in children {
                self.force_append(parent, child);
            }
        } else {
            self.force_append(parent, node);
        }
        Ok(node)
    }

    /// Inserts `node` before `reference` under `parent`. A `None`
    /// reference appends.
    ///
    /// # Errors
    ///
    /// As [`Document::append_child`], plus `NOT_FOUND_ERR` when
    /// `reference` is not a child of `parent`.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        node: NodeId,
        reference: Option<NodeId>,
    ) -> Result<NodeId, DomException> {
        let Some(reference) = reference else {
            return self.append_child(parent, node);
        };
        if self.node(reference).parent != Some(parent) {
            return Err(DomException::new(
                DomExceptionCode::NotFound,
                "reference node is not a child of the given parent",
            ));
        }
        self.check_insertion(parent, node)?;
        if matches!(self.node(node).kind, NodeKind::DocumentFragment) {
            let children: Vec<NodeId> = self.children(node).collect();
            for child in children {
                self.force_insert_before(parent, child, reference);
            }
        } else {
            self.force_insert_before(parent, node, reference);
        }
        Ok(node)
    }

    /// Replaces `old` with `node` under `parent`, returning `old`.
    ///
    /// # Errors
    ///
    /// As [`Document::insert_before`].
    pub fn replace_child(
        &mut self,
        parent: NodeId,
        node: NodeId,
        old: NodeId,
    ) -> Result<NodeId, DomException> {
        if self.node(old).parent != Some(parent) {
            return Err(DomException::new(
                DomExceptionCode::NotFound,
                "node to replace is not a child of the given parent",
            ));
        }
        let anchor = self.node(old).next_sibling;
        self.detach(old);
        let inserted = self.insert_before(parent, node, anchor);
        if inserted.is_err() {
            // Restore the old child on failure.
            match anchor {
                Some(anchor) => self.force_insert_before(parent, old, anchor),
                None => self.force_append(parent, old),
            }
        }
        inserted.map(|_| old)
    }

    /// Removes `child` from `parent`, returning it detached.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND_ERR` when `child` is not a child of `parent`.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<NodeId, DomException> {
        self.check_owned(parent)?;
        self.check_owned(child)?;
        if self.node(child).parent != Some(parent) {
            return Err(DomException::new(
                DomExceptionCode::NotFound,
                "node to remove is not a child of the given parent",
            ));
        }
        self.detach(child);
        Ok(child)
    }

    // -- Attributes -----------------------------------------------------------

    /// The attribute nodes of an element, in declaration order.
    #[must_use]
    pub fn attributes(&self, elem: NodeId) -> &[NodeId] {
        match &self.node(elem).kind {
            NodeKind::Element { attributes, .. } => attributes,
            _ => &[],
        }
    }

    /// Finds an attribute node by its rendered qualified name.
    #[must_use]
    pub fn attribute_node(&self, elem: NodeId, name: &str) -> Option<NodeId> {
        self.attributes(elem)
            .iter()
            .copied()
            .find(|&attr| self.qualified_name(attr).as_deref() == Some(name))
    }

    /// Finds an attribute node by (namespace URI, local name).
    #[must_use]
    pub fn attribute_node_ns(
        &self,
        elem: NodeId,
        namespace: Option<&str>,
        local: &str,
    ) -> Option<NodeId> {
        self.attributes(elem).iter().copied().find(|&attr| {
            match &self.node(attr).kind {
                NodeKind::Attribute {
                    name, namespace: ns, ..
                } => ns.as_deref() == namespace && name == local,
                _ => false,
            }
        })
    }

    /// The value of an attribute node: the concatenated text of its
    /// children, descending through entity references.
    #[must_use]
    pub fn attribute_node_value(&self, attr: NodeId) -> String {
        self.text_content(attr)
    }

    /// The value of the named attribute, if present.
    #[must_use]
    pub fn attribute_value(&self, elem: NodeId, name: &str) -> Option<String> {
        self.attribute_node(elem, name)
            .map(|attr| self.attribute_node_value(attr))
    }

    /// The value of the attribute with the given (namespace, local name),
    /// if present.
    #[must_use]
    pub fn attribute_value_ns(
        &self,
        elem: NodeId,
        namespace: Option<&str>,
        local: &str,
    ) -> Option<String> {
        self.attribute_node_ns(elem, namespace, local)
            .map(|attr| self.attribute_node_value(attr))
    }

    /// Sets an attribute by qualified name, replacing any existing value.
    /// Returns the attribute node.
    ///
    /// # Errors
    ///
    /// `INVALID_CHARACTER_ERR` for an invalid name; `HIERARCHY_REQUEST_ERR`
    /// when `elem` is not an element.
    pub fn set_attribute(
        &mut self,
        elem: NodeId,
        name: &str,
        value: &str,
    ) -> Result<NodeId, DomException> {
        let attr = match self.attribute_node(elem, name) {
            Some(attr) => attr,
            None => {
                let attr = self.create_attribute(name)?;
                self.attach_attribute(elem, attr)?;
                attr
            }
        };
        self.set_attribute_children(attr, value);
        Ok(attr)
    }

    /// Sets a namespace-aware attribute, replacing any existing value for
    /// the same (namespace, local name). Returns the attribute node.
    ///
    /// # Errors
    ///
    /// As [`Document::create_attribute_ns`] plus `HIERARCHY_REQUEST_ERR`
    /// when `elem` is not an element.
    pub fn set_attribute_ns(
        &mut self,
        elem: NodeId,
        namespace: Option<&str>,
        qname: &str,
        value: &str,
    ) -> Result<NodeId, DomException> {
        let (prefix, local) = check_qname(namespace, qname)?;
        let attr = match self.attribute_node_ns(elem, namespace, &local) {
            Some(attr) => {
                // An existing attribute keeps its slot; the prefix follows
                // the caller.
                if let NodeKind::Attribute { prefix: p, .. } = &mut self.node_mut(attr).kind {
                    *p = prefix;
                }
                attr
            }
            None => {
                let attr = self.create_attribute_ns(namespace, qname)?;
                self.attach_attribute(elem, attr)?;
                attr
            }
        };
        self.set_attribute_children(attr, value);
        Ok(attr)
    }

    fn set_attribute_children(&mut self, attr: NodeId, value: &str) {
        let children: Vec<NodeId> = self.children(attr).collect();
        for child in children {
            self.detach(child);
        }
        let text = self.create_text_node(value);
        self.force_append(attr, text);
        if let NodeKind::Attribute {
            specified, is_id, ..
        } = &mut self.node_mut(attr).kind
        {
            *specified = true;
            let register = *is_id;
            if register {
                let value = value.to_string();
                if let Some(owner) = self.node(attr).parent {
                    self.set_id(&value, owner);
                }
            }
        }
        self.bump(attr);
    }

    /// Attaches a free attribute node to an element. Replaces and returns
    /// an existing attribute with the same (namespace, name).
    ///
    /// # Errors
    ///
    /// `INUSE_ATTRIBUTE_ERR` when the attribute already has an owner,
    /// `HIERARCHY_REQUEST_ERR` when either node has the wrong kind,
    /// `WRONG_DOCUMENT_ERR` for foreign handles.
    pub fn set_attribute_node(
        &mut self,
        elem: NodeId,
        attr: NodeId,
    ) -> Result<Option<NodeId>, DomException> {
        self.check_owned(elem)?;
        self.check_owned(attr)?;
        let (namespace, local) = match &self.node(attr).kind {
            NodeKind::Attribute {
                name, namespace, ..
            } => (namespace.clone(), name.clone()),
            kind => {
                return Err(DomException::new(
                    DomExceptionCode::HierarchyRequest,
                    format!("cannot attach a {} node as an attribute", kind.type_name()),
                ))
            }
        };
        if self.node(attr).parent.is_some() {
            return Err(DomException::new(
                DomExceptionCode::InuseAttribute,
                "attribute is already in use on another element",
            ));
        }
        let existing = if namespace.is_some() {
            self.attribute_node_ns(elem, namespace.as_deref(), &local)
        } else {
            let qname = self.qualified_name(attr).unwrap_or(local);
            self.attribute_node(elem, &qname)
        };
        if let Some(existing) = existing {
            self.remove_attribute_node(elem, existing)?;
        }
        self.attach_attribute(elem, attr)?;
        Ok(existing)
    }

    pub(crate) fn attach_attribute(&mut self, elem: NodeId, attr: NodeId) -> Result<(), DomException> {
        match &mut self.node_mut(elem).kind {
            NodeKind::Element { attributes, .. } => {
                attributes.push(attr);
            }
            kind => {
                return Err(DomException::new(
                    DomExceptionCode::HierarchyRequest,
                    format!("{} nodes cannot hold attributes", kind.type_name()),
                ))
            }
        }
        self.node_mut(attr).parent = Some(elem);
        self.bump(elem);
        Ok(())
    }

    /// Removes the named attribute, returning its node if one existed.
    pub fn remove_attribute(&mut self, elem: NodeId, name: &str) -> Option<NodeId> {
        let attr = self.attribute_node(elem, name)?;
        self.remove_attribute_node(elem, attr).ok()
    }

    /// Removes the attribute with the given (namespace, local name),
    /// returning its node if one existed.
    pub fn remove_attribute_ns(
        &mut self,
        elem: NodeId,
        namespace: Option<&str>,
        local: &str,
    ) -> Option<NodeId> {
        let attr = self.attribute_node_ns(elem, namespace, local)?;
        self.remove_attribute_node(elem, attr).ok()
    }

    /// Detaches an attribute node from its owning element.
    ///
    /// # Errors
    ///
    /// `NOT_FOUND_ERR` when the attribute is not owned by the element.
    pub fn remove_attribute_node(
        &mut self,
        elem: NodeId,
        attr: NodeId,
    ) -> Result<NodeId, DomException> {
        let id_value = match &self.node(attr).kind {
            NodeKind::Attribute { is_id: true, .. } => Some(self.attribute_node_value(attr)),
            _ => None,
        };
        let removed = match &mut self.node_mut(elem).kind {
            NodeKind::Element { attributes, .. } => {
                match attributes.iter().position(|&a| a == attr) {
                    Some(pos) => {
                        attributes.remove(pos);
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        };
        if !removed {
            return Err(DomException::new(
                DomExceptionCode::NotFound,
                "attribute is not owned by the given element",
            ));
        }
        self.node_mut(attr).parent = None;
        if let Some(value) = id_value {
            self.id_map.remove(&value);
        }
        self.bump(elem);
        Ok(attr)
    }

    // -- Id map ---------------------------------------------------------------

    /// Registers an element under an ID value.
    pub fn set_id(&mut self, id_value: &str, elem: NodeId) {
        self.id_map.insert(id_value.to_string(), elem);
    }

    /// Looks up an element by a registered ID value.
    #[must_use]
    pub fn element_by_id(&self, id_value: &str) -> Option<NodeId> {
        self.id_map.get(id_value).copied()
    }

    // -- Filtered views --------------------------------------------------------

    /// Collects the descendant elements of `scope` whose rendered
    /// qualified name matches `name` (`"*"` matches every element), in
    /// document order.
    #[must_use]
    pub fn elements_by_tag_name(&self, scope: NodeId, name: &str) -> Vec<NodeId> {
        self.descendants(scope)
            .filter(|&id| {
                matches!(self.node(id).kind, NodeKind::Element { .. })
                    && (name == "*" || self.qualified_name(id).as_deref() == Some(name))
            })
            .collect()
    }

    /// Collects the descendant elements of `scope` matching the namespace
    /// URI and local name (`"*"` wildcards either side), in document order.
    #[must_use]
    pub fn elements_by_tag_name_ns(
        &self,
        scope: NodeId,
        namespace: &str,
        local: &str,
    ) -> Vec<NodeId> {
        self.descendants(scope)
            .filter(|&id| match &self.node(id).kind {
                NodeKind::Element {
                    name, namespace: ns, ..
                } => {
                    (namespace == "*" || ns.as_deref() == Some(namespace))
                        && (local == "*" || name == local)
                }
                _ => false,
            })
            .collect()
    }

    // -- Comparisons -----------------------------------------------------------

    /// True when the two handles address the same node.
    #[must_use]
    pub fn is_same_node(&self, a: NodeId, b: NodeId) -> bool {
        a == b
    }

    /// Structural equality between a node in this document and a node in
    /// `other` (which may be this document): kind, names, values, attribute
    /// sets (order-insensitive), and child lists (order-sensitive).
    #[must_use]
    pub fn is_equal_node(&self, a: NodeId, other: &Document, b: NodeId) -> bool {
        nodes_equal(self, a, other, b)
    }

    /// The position of `b` relative to `a` as a DOM bitmask.
    ///
    /// Attribute nodes compare at their owning element's position,
    /// ordered among themselves by attribute-list index.
    #[must_use]
    pub fn compare_document_position(&self, a: NodeId, b: NodeId) -> u16 {
        if a == b {
            return 0;
        }
        let path_a = self.container_path(a);
        let path_b = self.container_path(b);
        if path_a[0] != path_b[0] {
            // Different roots: disconnected, with an arbitrary but
            // consistent order.
            let order = if path_a[0].as_index() < path_b[0].as_index() {
                POSITION_FOLLOWING
            } else {
                POSITION_PRECEDING
            };
            return POSITION_DISCONNECTED | POSITION_IMPLEMENTATION_SPECIFIC | order;
        }
        if path_a.contains(&b) {
            return POSITION_CONTAINS | POSITION_PRECEDING;
        }
        if path_b.contains(&a) {
            return POSITION_CONTAINED_BY | POSITION_FOLLOWING;
        }
        // Find the divergence point under the common ancestor.
        let mut depth = 0;
        while depth < path_a.len() && depth < path_b.len() && path_a[depth] == path_b[depth] {
            depth += 1;
        }
        let ancestor = path_a[depth - 1];
        let branch_a = path_a.get(depth).copied();
        let branch_b = path_b.get(depth).copied();
        match (branch_a, branch_b) {
            (Some(branch_a), Some(branch_b)) => {
                // Attributes of the same element order by list index and
                // precede child content.
                let attrs = self.attributes(ancestor);
                let attr_a = attrs.iter().position(|&x| x == branch_a);
                let attr_b = attrs.iter().position(|&x| x == branch_b);
                match (attr_a, attr_b) {
                    (Some(ia), Some(ib)) => {
                        if ia < ib {
                            POSITION_FOLLOWING
                        } else {
                            POSITION_PRECEDING
                        }
                    }
                    (Some(_), None) => POSITION_FOLLOWING,
                    (None, Some(_)) => POSITION_PRECEDING,
                    (None, None) => {
                        let mut cursor = self.node(branch_a).next_sibling;
                        while let Some(current) = cursor {
                            if current == branch_b {
                                return POSITION_FOLLOWING;
                            }
                            cursor = self.node(current).next_sibling;
                        }
                        POSITION_PRECEDING
                    }
                }
            }
            // One path ended at the ancestor: covered by the containment
            // checks above.
            _ => POSITION_IMPLEMENTATION_SPECIFIC,
        }
    }

    /// The container chain from the root down to the node itself.
    fn container_path(&self, id: NodeId) -> Vec<NodeId> {
        let mut path: Vec<NodeId> = self.ancestors(id).collect();
        path.reverse();
        path
    }

    // -- Subtree operations ----------------------------------------------------

    /// Deep- or shallow-copies a node within this document. Attribute
    /// nodes and entity-reference replacement content are always copied;
    /// `deep` controls ordinary children.
    pub fn clone_node(&mut self, node: NodeId, deep: bool) -> NodeId {
        self.clone_subtree(node, deep)
    }

    fn clone_subtree(&mut self, src: NodeId, deep: bool) -> NodeId {
        let kind = self.node(src).kind.clone();
        let copy = match kind {
            NodeKind::Element {
                name,
                prefix,
                namespace,
                attributes,
            } => {
                let copy = self.allocate(NodeKind::Element {
                    name,
                    prefix,
                    namespace,
                    attributes: vec![],
                });
                for attr in attributes {
                    let attr_copy = self.clone_subtree(attr, true);
                    // Attribute lists carry no invalid states a clone
                    // could introduce.
                    let _ = self.attach_attribute(copy, attr_copy);
                }
                copy
            }
            other => self.allocate(other),
        };
        let always_deep = matches!(
            self.node(src).kind,
            NodeKind::Attribute { .. } | NodeKind::EntityRef { .. }
        );
        if deep || always_deep {
            let children: Vec<NodeId> = self.children(src).collect();
            for child in children {
                let child_copy = self.clone_subtree(child, true);
                self.force_append(copy, child_copy);
            }
        }
        copy
    }

    /// Copies a node from `source` into this document, returning the new
    /// handle. The source document is left untouched. Imported attributes
    /// become `specified`.
    ///
    /// # Errors
    ///
    /// `NOT_SUPPORTED_ERR` for Document and DocumentType nodes.
    pub fn import_node(
        &mut self,
        source: &Document,
        node: NodeId,
        deep: bool,
    ) -> Result<NodeId, DomException> {
        match source.node(node).kind {
            NodeKind::Document | NodeKind::DocumentType { .. } => Err(DomException::new(
                DomExceptionCode::NotSupported,
                "document and doctype nodes cannot be imported",
            )),
            _ => Ok(self.import_subtree(source, node, deep)),
        }
    }

    fn import_subtree(&mut self, source: &Document, src: NodeId, deep: bool) -> NodeId {
        let kind = source.node(src).kind.clone();
        let copy = match kind {
            NodeKind::Element {
                name,
                prefix,
                namespace,
                attributes,
            } => {
                let copy = self.allocate(NodeKind::Element {
                    name,
                    prefix,
                    namespace,
                    attributes: vec![],
                });
                for attr in attributes {
                    let attr_copy = self.import_subtree(source, attr, true);
                    let _ = self.attach_attribute(copy, attr_copy);
                }
                copy
            }
            NodeKind::Attribute {
                name,
                prefix,
                namespace,
                is_id,
                ..
            } => self.allocate(NodeKind::Attribute {
                name,
                prefix,
                namespace,
                // Imported attributes always count as specified.
                specified: true,
                is_id,
            }),
            other => self.allocate(other),
        };
        let always_deep = matches!(
            source.node(src).kind,
            NodeKind::Attribute { .. } | NodeKind::EntityRef { .. }
        );
        if deep || always_deep {
            let mut cursor = source.node(src).first_child;
            while let Some(child) = cursor {
                let child_copy = self.import_subtree(source, child, true);
                self.force_append(copy, child_copy);
                cursor = source.node(child).next_sibling;
            }
        }
        copy
    }

    /// Moves a subtree from `source` into this document: the node is
    /// detached there, deep-copied here, and the new handle returned.
    ///
    /// # Errors
    ///
    /// `NOT_SUPPORTED_ERR` for Document, DocumentType, Entity, and
    /// Notation nodes.
    pub fn adopt_node(
        &mut self,
        source: &mut Document,
        node: NodeId,
    ) -> Result<NodeId, DomException> {
        match source.node(node).kind {
            NodeKind::Document
            | NodeKind::DocumentType { .. }
            | NodeKind::Entity { .. }
            | NodeKind::Notation { .. } => Err(DomException::new(
                DomExceptionCode::NotSupported,
                "this node kind cannot be adopted",
            )),
            NodeKind::Attribute { .. } => {
                if let Some(owner) = source.node(node).parent {
                    let _ = source.remove_attribute_node(owner, node);
                }
                Ok(self.import_subtree(source, node, true))
            }
            _ => {
                source.detach(node);
                Ok(self.import_subtree(source, node, true))
            }
        }
    }

    /// Renames an element or attribute in place.
    ///
    /// # Errors
    ///
    /// `NOT_SUPPORTED_ERR` for any other node kind; name errors as
    /// [`Document::create_element_ns`].
    pub fn rename_node(
        &mut self,
        node: NodeId,
        namespace: Option<&str>,
        qname: &str,
    ) -> Result<(), DomException> {
        let (new_prefix, new_local) = check_qname(namespace, qname)?;
        match &mut self.node_mut(node).kind {
            NodeKind::Element {
                name,
                prefix,
                namespace: ns,
                ..
            }
            | NodeKind::Attribute {
                name,
                prefix,
                namespace: ns,
                ..
            } => {
                *name = new_local;
                *prefix = new_prefix;
                *ns = namespace.map(str::to_string);
            }
            kind => {
                return Err(DomException::new(
                    DomExceptionCode::NotSupported,
                    format!("{} nodes cannot be renamed", kind.type_name()),
                ))
            }
        }
        self.bump(node);
        Ok(())
    }
}

// -- Structural equality -----------------------------------------------------

#[allow(clippy::too_many_lines)]
fn nodes_equal(da: &Document, a: NodeId, db: &Document, b: NodeId) -> bool {
    let ka = &da.node(a).kind;
    let kb = &db.node(b).kind;
    let payload_equal = match (ka, kb) {
        (NodeKind::Document, NodeKind::Document)
        | (NodeKind::DocumentFragment, NodeKind::DocumentFragment) => true,
        (
            NodeKind::Element {
                name: na,
                prefix: pa,
                namespace: ua,
                attributes: aa,
            },
            NodeKind::Element {
                name: nb,
                prefix: pb,
                namespace: ub,
                attributes: ab,
            },
        ) => {
            na == nb
                && pa == pb
                && ua == ub
                && aa.len() == ab.len()
                && aa.iter().all(|&attr_a| {
                    ab.iter()
                        .any(|&attr_b| nodes_equal(da, attr_a, db, attr_b))
                })
        }
        (
            NodeKind::Attribute {
                name: na,
                prefix: pa,
                namespace: ua,
                ..
            },
            NodeKind::Attribute {
                name: nb,
                prefix: pb,
                namespace: ub,
                ..
            },
        ) => na == nb && pa == pb && ua == ub,
        (NodeKind::Text { content: ca }, NodeKind::Text { content: cb })
        | (NodeKind::CData { content: ca }, NodeKind::CData { content: cb })
        | (NodeKind::Comment { content: ca }, NodeKind::Comment { content: cb }) => ca == cb,
        (
            NodeKind::ProcessingInstruction {
                target: ta,
                data: xa,
            },
            NodeKind::ProcessingInstruction {
                target: tb,
                data: xb,
            },
        ) => ta == tb && xa == xb,
        (NodeKind::EntityRef { name: na }, NodeKind::EntityRef { name: nb }) => na == nb,
        (
            NodeKind::Entity {
                name: na,
                public_id: pa,
                system_id: sa,
                notation_name: xa,
            },
            NodeKind::Entity {
                name: nb,
                public_id: pb,
                system_id: sb,
                notation_name: xb,
            },
        ) => na == nb && pa == pb && sa == sb && xa == xb,
        (
            NodeKind::Notation {
                name: na,
                public_id: pa,
                system_id: sa,
            },
            NodeKind::Notation {
                name: nb,
                public_id: pb,
                system_id: sb,
            },
        ) => na == nb && pa == pb && sa == sb,
        (
            NodeKind::DocumentType {
                name: na,
                public_id: pa,
                system_id: sa,
                internal_subset: ia,
                ..
            },
            NodeKind::DocumentType {
                name: nb,
                public_id: pb,
                system_id: sb,
                internal_subset: ib,
                ..
            },
        ) => na == nb && pa == pb && sa == sb && ia == ib,
        _ => false,
    };
    if !payload_equal {
        return false;
    }

    // Child lists compare in order.
    let mut ca = da.node(a).first_child;
    let mut cb = db.node(b).first_child;
    loop {
        match (ca, cb) {
            (None, None) => return true,
            (Some(child_a), Some(child_b)) => {
                if !nodes_equal(da, child_a, db, child_b) {
                    return false;
                }
                ca = da.node(child_a).next_sibling;
                cb = db.node(child_b).next_sibling;
            }
            _ => return false,
        }
    }
}

// -- Name checks --------------------------------------------------------------

fn check_name(name: &str) -> Result<(), DomException> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(DomException::new(
            DomExceptionCode::InvalidCharacter,
            format!("invalid XML name: {name:?}"),
        ))
    }
}

fn check_qname(
    namespace: Option<&str>,
    qname: &str,
) -> Result<(Option<String>, String), DomException> {
    if !is_valid_qname(qname) {
        return Err(DomException::new(
            DomExceptionCode::InvalidCharacter,
            format!("invalid qualified name: {qname:?}"),
        ));
    }
    let (prefix, local) = split_name(qname);
    if prefix.is_some() && namespace.is_none() {
        return Err(DomException::new(
            DomExceptionCode::Namespace,
            "a prefixed name requires a namespace URI",
        ));
    }
    if prefix == Some("xml") && namespace != Some(XML_NAMESPACE) {
        return Err(DomException::new(
            DomExceptionCode::Namespace,
            "the xml prefix is reserved for its fixed namespace",
        ));
    }
    Ok((prefix.map(str::to_string), local.to_string()))
}

// -- Iterators ----------------------------------------------------------------

/// Iterator over the direct children of a node.
pub struct Children<'a> {
    doc: &'a Document,
    next: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.doc.node(current).next_sibling;
        Some(current)
    }
}

/// Iterator over a node and its ancestors.
pub struct Ancestors<'a> {
    doc: &'a Document,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.doc.node(current).parent;
        Some(current)
    }
}

/// Iterator over all descendants of a node in document order.
pub struct Descendants<'a> {
    doc: &'a Document,
    scope: NodeId,
    next: Option<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;

        // Depth-first: descend, else advance, else climb until a sibling
        // exists inside the scope.
        let data = self.doc.node(current);
        if let Some(child) = data.first_child {
            self.next = Some(child);
        } else {
            let mut at = current;
            loop {
                if at == self.scope {
                    self.next = None;
                    break;
                }
                if let Some(sibling) = self.doc.node(at).next_sibling {
                    self.next = Some(sibling);
                    break;
                }
                match self.doc.node(at).parent {
                    Some(parent) => at = parent,
                    None => {
                        self.next = None;
                        break;
                    }
                }
            }
        }
        Some(current)
    }
}

/// A cached tag-name view over a subtree, revalidated lazily through
/// change sequences.
///
/// # Examples
///
/// ```
/// use domoxide::tree::LiveList;
/// use domoxide::Document;
///
/// let mut doc = Document::parse_str("<r><x/><x/></r>").unwrap();
/// let root = doc.root_element().unwrap();
/// let mut list = LiveList::by_name(root, "x");
/// assert_eq!(list.items(&doc).len(), 2);
///
/// let extra = doc.create_element("x").unwrap();
/// doc.append_child(root, extra).unwrap();
/// assert_eq!(list.items(&doc).len(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct LiveList {
    scope: NodeId,
    namespace: Option<String>,
    name: String,
    by_ns: bool,
    cached: Vec<NodeId>,
    stamp: Option<u64>,
}

impl LiveList {
    /// Creates a view matching descendant elements by rendered qualified
    /// name (`"*"` matches all).
    #[must_use]
    pub fn by_name(scope: NodeId, name: &str) -> Self {
        Self {
            scope,
            namespace: None,
            name: name.to_string(),
            by_ns: false,
            cached: Vec::new(),
            stamp: None,
        }
    }

    /// Creates a view matching descendant elements by namespace URI and
    /// local name (`"*"` wildcards either side).
    #[must_use]
    pub fn by_name_ns(scope: NodeId, namespace: &str, local: &str) -> Self {
        Self {
            scope,
            namespace: Some(namespace.to_string()),
            name: local.to_string(),
            by_ns: true,
            cached: Vec::new(),
            stamp: None,
        }
    }

    /// The current matches, recomputed only when the scope's subtree has
    /// mutated since the last call.
    pub fn items(&mut self, doc: &Document) -> &[NodeId] {
        let current = doc.sequence(self.scope);
        if self.stamp != Some(current) {
            self.cached = if self.by_ns {
                doc.elements_by_tag_name_ns(
                    self.scope,
                    self.namespace.as_deref().unwrap_or("*"),
                    &self.name,
                )
            } else {
                doc.elements_by_tag_name(self.scope, &self.name)
            };
            self.stamp = Some(current);
        }
        &self.cached
    }
}
