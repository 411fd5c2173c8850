//! Node kind definitions and DTD declaration types.
//!
//! The `NodeKind` enum covers the full DOM Core node hierarchy. Each
//! variant carries the kind-specific payload; navigation links (parent,
//! children, siblings) live in `NodeData`, not here.

use std::collections::HashMap;

use super::NodeId;

/// Classified content model from an `<!ELEMENT>` declaration.
///
/// Declarations are classified, never validated against: the only consumer
/// is element-content-whitespace detection during normalization, which
/// treats whitespace under an `ElementOnly` parent as droppable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentModel {
    /// `EMPTY` — no content permitted.
    Empty,
    /// `ANY` — any content permitted.
    Any,
    /// `(#PCDATA ...)` — mixed character and element content.
    Mixed,
    /// A children content particle — element-only content.
    ElementOnly,
}

/// Attribute type from an `<!ATTLIST>` declaration.
///
/// See XML 1.0 §3.3.1: `[54]` AttType
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeType {
    /// `CDATA` string value.
    CData,
    /// `ID` — registers the element in the document id map.
    Id,
    /// `IDREF`.
    IdRef,
    /// `IDREFS`.
    IdRefs,
    /// `ENTITY`.
    Entity,
    /// `ENTITIES`.
    Entities,
    /// `NMTOKEN`.
    NmToken,
    /// `NMTOKENS`.
    NmTokens,
    /// `NOTATION (a|b|...)`.
    Notation(Vec<String>),
    /// `(a|b|...)` enumeration.
    Enumeration(Vec<String>),
}

/// Default declaration from an `<!ATTLIST>` declaration.
///
/// See XML 1.0 §3.3.2: `[60]` DefaultDecl
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultDecl {
    /// `#REQUIRED`.
    Required,
    /// `#IMPLIED`.
    Implied,
    /// `#FIXED "value"` — the attribute always carries this value.
    Fixed(String),
    /// A plain default value.
    Value(String),
}

/// One attribute-list declaration entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttlistDecl {
    /// The declared attribute type.
    pub attr_type: AttributeType,
    /// The declared default.
    pub default: DefaultDecl,
}

impl AttlistDecl {
    /// The default value this declaration supplies for an absent attribute,
    /// if it supplies one.
    #[must_use]
    pub fn default_value(&self) -> Option<&str> {
        match &self.default {
            DefaultDecl::Fixed(v) | DefaultDecl::Value(v) => Some(v),
            DefaultDecl::Required | DefaultDecl::Implied => None,
        }
    }
}

/// The DTD declaration maps owned by a DocumentType node.
///
/// Entities and notations map to arena nodes that are never ordinary
/// children (the standard model gives DocumentType no children); element
/// and attribute-list declarations are plain lookup tables used only for
/// whitespace classification and attribute defaulting.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DtdDeclarations {
    /// General entities by name. Parameter entities are consumed while
    /// parsing the subset and never stored here.
    pub entities: HashMap<String, NodeId>,
    /// Notations by name.
    pub notations: HashMap<String, NodeId>,
    /// Element declarations by name.
    pub element_decls: HashMap<String, ContentModel>,
    /// Attribute-list declarations by (element name, attribute name).
    pub attlist_decls: HashMap<(String, String), AttlistDecl>,
}

/// The kind of a node and its associated data.
///
/// The kind is immutable after creation; only `rename_node` may rewrite
/// the name fields of the Element and Attribute variants in place.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// The document node — there is exactly one per `Document`.
    Document,

    /// A lightweight container for building and splicing sibling runs.
    DocumentFragment,

    /// An element node, e.g., `<div class="x">`.
    Element {
        /// The element's local name (or full `QName` for Level-1 nodes).
        name: String,
        /// Namespace prefix (e.g., `"svg"` in `svg:rect`), if any.
        prefix: Option<String>,
        /// Namespace URI after resolution, if any.
        namespace: Option<String>,
        /// Attribute nodes in declaration order.
        attributes: Vec<NodeId>,
    },

    /// An attribute node. Its value is the concatenated text of its
    /// children, which are restricted to Text and EntityRef.
    Attribute {
        /// The attribute's local name (or full `QName` for Level-1 nodes).
        name: String,
        /// Namespace prefix, if any.
        prefix: Option<String>,
        /// Namespace URI after resolution, if any.
        namespace: Option<String>,
        /// False when the attribute was filled in from a DTD default.
        specified: bool,
        /// True when an `<!ATTLIST>` declaration types this attribute `ID`.
        is_id: bool,
    },

    /// A text node containing character data.
    Text {
        /// The text content (character references already resolved).
        content: String,
    },

    /// A CDATA section, e.g., `<![CDATA[...]]>`.
    CData {
        /// The CDATA content (no escaping applied).
        content: String,
    },

    /// A comment node, e.g., `<!-- ... -->`.
    Comment {
        /// The comment text (without the `<!--` and `-->` delimiters).
        content: String,
    },

    /// A processing instruction, e.g., `<?target data?>`.
    ProcessingInstruction {
        /// The PI target.
        target: String,
        /// The PI data, if any.
        data: Option<String>,
    },

    /// A general entity reference, e.g., `&company;` when kept unexpanded.
    /// Children hold the materialized replacement content.
    EntityRef {
        /// The entity name (without `&` and `;`).
        name: String,
    },

    /// An entity declaration. Children hold the parsed replacement content
    /// for internal entities; external entities stay childless until
    /// resolved.
    Entity {
        /// The entity name.
        name: String,
        /// The PUBLIC identifier for external entities.
        public_id: Option<String>,
        /// The SYSTEM identifier for external entities.
        system_id: Option<String>,
        /// The `NDATA` notation name for unparsed entities.
        notation_name: Option<String>,
    },

    /// A notation declaration.
    Notation {
        /// The notation name.
        name: String,
        /// The PUBLIC identifier.
        public_id: Option<String>,
        /// The SYSTEM identifier.
        system_id: Option<String>,
    },

    /// A document type declaration node, e.g., `<!DOCTYPE html>`.
    ///
    /// See XML 1.0 §2.8: `[28]` doctypedecl
    DocumentType {
        /// The root element name declared in the DOCTYPE.
        name: String,
        /// The PUBLIC identifier, if any.
        public_id: Option<String>,
        /// The SYSTEM identifier (URI), if any.
        system_id: Option<String>,
        /// Verbatim internal subset text, kept for round-tripping.
        internal_subset: Option<String>,
        /// The parsed declaration maps.
        decls: DtdDeclarations,
    },
}

impl NodeKind {
    /// The DOM numeric node type.
    #[must_use]
    pub fn node_type(&self) -> u16 {
        match self {
            Self::Element { .. } => 1,
            Self::Attribute { .. } => 2,
            Self::Text { .. } => 3,
            Self::CData { .. } => 4,
            Self::EntityRef { .. } => 5,
            Self::Entity { .. } => 6,
            Self::ProcessingInstruction { .. } => 7,
            Self::Comment { .. } => 8,
            Self::Document => 9,
            Self::DocumentType { .. } => 10,
            Self::DocumentFragment => 11,
            Self::Notation { .. } => 12,
        }
    }

    /// A short human-readable kind name for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Element { .. } => "element",
            Self::Attribute { .. } => "attribute",
            Self::Text { .. } => "text",
            Self::CData { .. } => "cdata-section",
            Self::EntityRef { .. } => "entity-reference",
            Self::Entity { .. } => "entity",
            Self::ProcessingInstruction { .. } => "processing-instruction",
            Self::Comment { .. } => "comment",
            Self::Document => "document",
            Self::DocumentType { .. } => "document-type",
            Self::DocumentFragment => "document-fragment",
            Self::Notation { .. } => "notation",
        }
    }

    /// True for the CharacterData kinds (Text, CData, Comment).
    #[must_use]
    pub fn is_character_data(&self) -> bool {
        matches!(
            self,
            Self::Text { .. } | Self::CData { .. } | Self::Comment { .. }
        )
    }

    /// True when this kind may hold child nodes at all.
    #[must_use]
    pub fn allows_children(&self) -> bool {
        !matches!(
            self,
            Self::Text { .. }
                | Self::CData { .. }
                | Self::Comment { .. }
                | Self::ProcessingInstruction { .. }
                | Self::Notation { .. }
                | Self::DocumentType { .. }
        )
    }

    /// True when a child of kind `child` is permitted under this kind.
    ///
    /// Document-level cardinality (one Element, one DocumentType) is
    /// checked by the mutators, not here. DocumentFragment insertion is
    /// judged child-by-child against the target, so the fragment kind
    /// itself never appears as a permitted child.
    #[must_use]
    pub fn allows_child(&self, child: &NodeKind) -> bool {
        match self {
            Self::Document => matches!(
                child,
                NodeKind::Element { .. }
                    | NodeKind::ProcessingInstruction { .. }
                    | NodeKind::Comment { .. }
                    | NodeKind::DocumentType { .. }
            ),
            Self::DocumentFragment
            | Self::Element { .. }
            | Self::EntityRef { .. }
            | Self::Entity { .. } => matches!(
                child,
                NodeKind::Element { .. }
                    | NodeKind::Text { .. }
                    | NodeKind::CData { .. }
                    | NodeKind::Comment { .. }
                    | NodeKind::ProcessingInstruction { .. }
                    | NodeKind::EntityRef { .. }
            ),
            Self::Attribute { .. } => {
                matches!(child, NodeKind::Text { .. } | NodeKind::EntityRef { .. })
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_types_match_dom_constants() {
        let elem = NodeKind::Element {
            name: "a".to_string(),
            prefix: None,
            namespace: None,
            attributes: vec![],
        };
        assert_eq!(elem.node_type(), 1);
        assert_eq!(NodeKind::Document.node_type(), 9);
        assert_eq!(NodeKind::DocumentFragment.node_type(), 11);
    }

    #[test]
    fn test_character_data_kinds_are_childless() {
        let text = NodeKind::Text {
            content: String::new(),
        };
        let comment = NodeKind::Comment {
            content: String::new(),
        };
        assert!(!text.allows_children());
        assert!(!comment.allows_children());
        assert!(text.is_character_data());
        assert!(!NodeKind::Document.is_character_data());
    }

    #[test]
    fn test_attribute_child_restrictions() {
        let attr = NodeKind::Attribute {
            name: "id".to_string(),
            prefix: None,
            namespace: None,
            specified: true,
            is_id: false,
        };
        let text = NodeKind::Text {
            content: "v".to_string(),
        };
        let entity_ref = NodeKind::EntityRef {
            name: "e".to_string(),
        };
        let elem = NodeKind::Element {
            name: "x".to_string(),
            prefix: None,
            namespace: None,
            attributes: vec![],
        };
        assert!(attr.allows_child(&text));
        assert!(attr.allows_child(&entity_ref));
        assert!(!attr.allows_child(&elem));
    }

    #[test]
    fn test_document_child_restrictions() {
        let doc = NodeKind::Document;
        assert!(doc.allows_child(&NodeKind::Comment {
            content: String::new()
        }));
        assert!(!doc.allows_child(&NodeKind::Text {
            content: String::new()
        }));
    }

    #[test]
    fn test_attlist_default_value() {
        let fixed = AttlistDecl {
            attr_type: AttributeType::CData,
            default: DefaultDecl::Fixed("always".to_string()),
        };
        let implied = AttlistDecl {
            attr_type: AttributeType::Id,
            default: DefaultDecl::Implied,
        };
        assert_eq!(fixed.default_value(), Some("always"));
        assert_eq!(implied.default_value(), None);
    }
}
