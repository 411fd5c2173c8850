//! The recursive descent document parser.
//!
//! [`XmlParser`] consumes an [`InputBuffer`] and builds a [`Document`].
//! Each grammar production maps to a `parse_*` method; entity replacement
//! text is parsed through nested buffers swapped in place of the main one,
//! so the productions never know which level of expansion they are reading.
//!
//! Recoverable conditions are routed through [`XmlParser::report`], which
//! consults the configured error handler and, in recovery mode, downgrades
//! errors to collected diagnostics. Dead-end conditions (unexpected end of
//! input, invalid characters in references, security limits) always abort.

use std::collections::HashMap;

use crate::config::ResolveRequest;
use crate::error::{handle_error, DomError, ErrorSeverity, ParseDiagnostic, ParseError};
use crate::tree::{
    AttlistDecl, AttributeType, ContentModel, DefaultDecl, Document, DtdDeclarations, NodeId,
    NodeKind,
};

use super::input::{
    is_name_char, is_valid_qname, is_xml11_char, is_xml_char, parse_cdata_content,
    parse_comment_content, parse_pi_content, parse_xml_decl, split_name, validate_pubid,
    InputBuffer, NamespaceResolver, XMLNS_NAMESPACE, XML_NAMESPACE,
};
use super::{FilterAction, FilterPhase, ParseOptions};

/// The five predefined entities (XML 1.0 §4.6).
fn builtin_entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "apos" => Some('\''),
        "quot" => Some('"'),
        _ => None,
    }
}

/// Collapses whitespace per XML 1.0 §3.3.3 for non-CDATA attribute types:
/// leading and trailing spaces dropped, internal runs folded to one space.
fn collapse_whitespace(value: &str) -> String {
    value
        .split(' ')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// An attribute as read from a start tag, before namespace processing.
struct RawAttribute {
    qname: String,
    value: String,
    /// False when the attribute was filled in from an `<!ATTLIST>` default.
    specified: bool,
}

pub(crate) struct XmlParser<'o> {
    input: InputBuffer,
    doc: Document,
    options: &'o ParseOptions,
    ns: NamespaceResolver,

    depth: u32,
    entity_expansions: u32,
    expansion_size: usize,
    xml_1_1: bool,

    diagnostics: Vec<ParseDiagnostic>,
    interrupted: bool,
    /// When > 0 the filter is not consulted: inside rejected subtrees and
    /// while materializing entity replacement trees.
    filter_suppressed: u32,

    /// Parameter entity replacement texts, consumed during subset parsing.
    pe_map: HashMap<String, String>,
    /// Raw replacement text of general internal entities, kept for
    /// expansion accounting and attribute-value expansion.
    entity_values: HashMap<String, String>,
    /// Declarations being accumulated; moved into the DocumentType node
    /// once the DOCTYPE is complete.
    decls: DtdDeclarations,

    /// True once an unread external subset or parameter entity leaves the
    /// entity declarations possibly incomplete: references to undeclared
    /// entities then degrade from errors to warnings (XML 1.0 §4.1).
    has_external_refs: bool,
    /// True while sub-parsing entity replacement text at declaration time,
    /// where namespace prefixes may legitimately be bound only at the
    /// point of use.
    in_entity_decl: bool,
}

impl<'o> XmlParser<'o> {
    pub fn new(mut input: InputBuffer, options: &'o ParseOptions) -> Self {
        input.set_max_name_length(options.max_name_length);
        Self {
            input,
            doc: Document::new(),
            options,
            ns: NamespaceResolver::new(),
            depth: 0,
            entity_expansions: 0,
            expansion_size: 0,
            xml_1_1: false,
            diagnostics: Vec::new(),
            interrupted: false,
            filter_suppressed: 0,
            pe_map: HashMap::new(),
            entity_values: HashMap::new(),
            decls: DtdDeclarations::default(),
            has_external_refs: false,
            in_entity_decl: false,
        }
    }

    /// Parses a complete document.
    pub fn parse(mut self) -> Result<Document, ParseError> {
        match self.parse_document() {
            Ok(()) => {
                self.doc.diagnostics = std::mem::take(&mut self.diagnostics);
                Ok(self.doc)
            }
            Err(mut e) => {
                e.diagnostics = std::mem::take(&mut self.diagnostics);
                Err(e)
            }
        }
    }

    /// Parses the input as element content in the namespace scope of
    /// `context`, returning the parsed top-level nodes in document order.
    /// The nodes are allocated in `target` but left detached; the caller
    /// splices them.
    pub fn parse_fragment(
        mut self,
        target: &mut Document,
        context: NodeId,
    ) -> Result<Vec<NodeId>, ParseError> {
        self.doc = std::mem::take(target);
        let result = self.parse_fragment_content(context);
        let diagnostics = std::mem::take(&mut self.diagnostics);
        *target = self.doc;
        target.diagnostics.extend(diagnostics);
        result
    }

    fn parse_fragment_content(&mut self, context: NodeId) -> Result<Vec<NodeId>, ParseError> {
        if self.options.config.namespaces {
            self.seed_namespace_scope(context);
        }
        let frag = self.doc.create_document_fragment();
        self.parse_content(frag, true)?;
        if !self.input.at_end() && !self.interrupted {
            let err = self.input.fatal("content is not well-formed as a fragment");
            self.doc.detach(frag);
            return Err(err);
        }
        let nodes: Vec<NodeId> = self.doc.children(frag).collect();
        for &node in &nodes {
            self.doc.detach(node);
        }
        self.doc.detach(frag);
        Ok(nodes)
    }

    /// Replays the namespace declarations in force at `context`, walking
    /// its ancestor chain from the root inward.
    fn seed_namespace_scope(&mut self, context: NodeId) {
        let mut path = Vec::new();
        let mut cursor = Some(context);
        while let Some(id) = cursor {
            path.push(id);
            cursor = self.doc.parent(id);
        }
        for &id in path.iter().rev() {
            if !matches!(self.doc.node(id).kind, NodeKind::Element { .. }) {
                continue;
            }
            self.ns.push_scope();
            let attrs: Vec<NodeId> = self.doc.attributes(id).to_vec();
            for attr in attrs {
                let (name, prefix) = match &self.doc.node(attr).kind {
                    NodeKind::Attribute { name, prefix, .. } => (name.clone(), prefix.clone()),
                    _ => continue,
                };
                let value = self.doc.attribute_node_value(attr);
                if prefix.as_deref() == Some("xmlns") {
                    self.ns.bind(Some(name), value);
                } else if prefix.is_none() && name == "xmlns" {
                    self.ns.bind(None, value);
                }
            }
        }
    }

    // -- Error funnel --

    /// Routes a condition through the error handler. Returns `Ok` when
    /// processing may continue: the handler said so, the severity defaults
    /// to continuing, or recovery mode overrides an error verdict.
    fn report(
        &mut self,
        severity: ErrorSeverity,
        type_tag: &'static str,
        message: impl Into<String>,
    ) -> Result<(), ParseError> {
        let message = message.into();
        let error = DomError::new(severity, type_tag, message.clone()).at(self.input.location());
        let mut proceed = handle_error(self.options.config.error_handler(), &error);
        if !proceed && severity == ErrorSeverity::Error && self.options.recover {
            proceed = true;
        }
        self.diagnostics.push(error.to_diagnostic());
        if proceed {
            Ok(())
        } else {
            Err(ParseError {
                message,
                location: self.input.location(),
                diagnostics: Vec::new(),
            })
        }
    }

    // -- Expansion accounting --

    fn charge_expansion(&mut self, size: usize) -> Result<(), ParseError> {
        self.entity_expansions += 1;
        self.expansion_size += size;
        if self.entity_expansions > self.options.max_entity_expansions {
            return Err(self.input.fatal(format!(
                "entity expansion count exceeds maximum ({})",
                self.options.max_entity_expansions
            )));
        }
        if self.expansion_size > self.options.max_expansion_size {
            return Err(self.input.fatal(format!(
                "entity expansion output exceeds maximum ({} bytes)",
                self.options.max_expansion_size
            )));
        }
        Ok(())
    }

    // -- Nested input buffers --

    fn with_nested_buffer<T>(
        &mut self,
        mut buffer: InputBuffer,
        f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        buffer.set_xml_1_1(self.xml_1_1);
        buffer.set_max_name_length(self.options.max_name_length);
        let saved = std::mem::replace(&mut self.input, buffer);
        let result = f(self);
        self.input = saved;
        result
    }

    // -- Filter protocol --

    fn consult_filter(&self, node: NodeId, phase: FilterPhase) -> FilterAction {
        if self.filter_suppressed > 0 {
            return FilterAction::Accept;
        }
        match &self.options.filter {
            Some(filter) => filter(&self.doc, node, phase),
            None => FilterAction::Accept,
        }
    }

    /// Applies the completion verdict for a leaf node already attached to
    /// its parent. `Skip` equals `Reject` for nodes without children.
    fn filter_leaf(&mut self, node: NodeId) {
        match self.consult_filter(node, FilterPhase::Complete) {
            FilterAction::Accept => {}
            FilterAction::Reject | FilterAction::Skip => self.doc.detach(node),
            FilterAction::Interrupt => self.interrupted = true,
        }
    }

    // -- Document structure --

    fn parse_document(&mut self) -> Result<(), ParseError> {
        let root = self.doc.root();

        if self.input.looking_at("<?xml")
            && matches!(self.input.peek_at(5), Some(' ' | '\t' | '\n'))
        {
            let decl = parse_xml_decl(&mut self.input)?;
            if decl.version == "1.1" {
                self.xml_1_1 = true;
                self.input.set_xml_1_1(true);
            } else if decl.version != "1.0" {
                // Later 1.x editions are read as 1.0 (XML 1.0 §2.8).
                self.report(
                    ErrorSeverity::Warning,
                    "unsupported-version",
                    format!("XML version '{}' read as 1.0", decl.version),
                )?;
            }
            if let Some(label) = &decl.encoding {
                if let Err(e) = self.input.set_encoding(label) {
                    return Err(self.input.fatal(e.to_string()));
                }
            }
            self.doc.version = Some(decl.version);
            self.doc.encoding = decl.encoding;
            self.doc.standalone = decl.standalone;
        }

        self.parse_misc()?;

        if self.input.looking_at("<!DOCTYPE") {
            if self.options.config.disallow_doctype {
                self.report(
                    ErrorSeverity::Fatal,
                    "doctype-not-allowed",
                    "document type declarations are disallowed by configuration",
                )?;
            }
            self.parse_doctype()?;
            self.parse_misc()?;
        }

        if !self.interrupted {
            if self.input.peek() == Some('<') {
                self.parse_element(root)?;
            } else {
                self.report(
                    ErrorSeverity::Fatal,
                    "wf-no-root",
                    "document has no root element",
                )?;
            }
        }

        self.parse_misc()?;
        if !self.input.at_end() && !self.interrupted {
            self.report(
                ErrorSeverity::Error,
                "wf-trailing-content",
                "content after the document element",
            )?;
            while !self.input.at_end() {
                self.input.advance(1);
            }
        }
        Ok(())
    }

    /// Comments and processing instructions between document-level
    /// structures. Whitespace here produces no nodes.
    fn parse_misc(&mut self) -> Result<(), ParseError> {
        let root = self.doc.root();
        loop {
            self.input.skip_whitespace();
            if self.interrupted {
                return Ok(());
            }
            if self.input.looking_at("<!--") {
                let content = parse_comment_content(&mut self.input)?;
                if self.options.config.comments {
                    let node = self.doc.create_comment(&content);
                    self.doc.force_append(root, node);
                    self.filter_leaf(node);
                }
            } else if self.input.looking_at("<?") {
                let (target, data) = parse_pi_content(&mut self.input)?;
                let node = self
                    .doc
                    .allocate(NodeKind::ProcessingInstruction { target, data });
                self.doc.force_append(root, node);
                self.filter_leaf(node);
            } else {
                return Ok(());
            }
        }
    }

    // -- DOCTYPE and the subsets --

    fn parse_doctype(&mut self) -> Result<(), ParseError> {
        self.input.expect_str("<!DOCTYPE")?;
        self.input.skip_whitespace_required()?;
        let name = self.input.parse_name()?;
        self.input.skip_whitespace();
        let (public_id, system_id) = self.parse_external_id(false, true)?;
        self.input.skip_whitespace();

        let mut internal_subset = None;
        if self.input.peek() == Some('[') {
            self.input.advance(1);
            let start = self.input.offset();
            self.parse_markup_decls(false)?;
            internal_subset = Some(self.input.text_range(start, self.input.offset()));
            self.input.expect_str("]")?;
            self.input.skip_whitespace();
        }
        self.input.expect_str(">")?;

        // The internal subset wins over the external one, so the external
        // subset is read second (XML 1.0 §2.8).
        if let Some(sys) = system_id.clone() {
            self.has_external_refs = true;
            if let Some(text) = self.fetch_external(public_id.clone(), &sys) {
                let buffer = InputBuffer::from_str(&text);
                self.with_nested_buffer(buffer, |p| {
                    p.skip_text_decl()?;
                    p.parse_markup_decls(true)
                })?;
                self.has_external_refs = false;
            }
        }

        let decls = std::mem::take(&mut self.decls);
        let doctype = self.doc.allocate(NodeKind::DocumentType {
            name,
            public_id,
            system_id,
            internal_subset,
            decls,
        });
        let root = self.doc.root();
        self.doc.force_append(root, doctype);
        Ok(())
    }

    /// Skips the text declaration that may open an external entity
    /// (XML 1.0 §4.3.1).
    fn skip_text_decl(&mut self) -> Result<(), ParseError> {
        if self.input.looking_at("<?xml")
            && matches!(self.input.peek_at(5), Some(' ' | '\t' | '\n'))
        {
            parse_xml_decl(&mut self.input)?;
        }
        Ok(())
    }

    /// Parses a run of markup declarations: the internal subset (up to the
    /// closing `]`), the external subset, or parameter entity replacement
    /// text spliced into either.
    fn parse_markup_decls(&mut self, external: bool) -> Result<(), ParseError> {
        loop {
            self.input.skip_whitespace();
            if self.input.at_end() {
                if !external && self.input.entity_chain().is_empty() {
                    return Err(self
                        .input
                        .fatal("unexpected end of input in internal subset"));
                }
                return Ok(());
            }
            if !external && self.input.entity_chain().is_empty() && self.input.looking_at("]") {
                return Ok(());
            }

            if self.input.looking_at("%") {
                self.parse_pe_reference(external)?;
            } else if self.input.looking_at("<!ENTITY") {
                self.parse_entity_decl()?;
            } else if self.input.looking_at("<!ELEMENT") {
                self.parse_element_decl()?;
            } else if self.input.looking_at("<!ATTLIST") {
                self.parse_attlist_decl()?;
            } else if self.input.looking_at("<!NOTATION") {
                self.parse_notation_decl()?;
            } else if self.input.looking_at("<!--") {
                parse_comment_content(&mut self.input)?;
            } else if self.input.looking_at("<![") && external {
                self.parse_conditional_section()?;
            } else if self.input.looking_at("<?") {
                parse_pi_content(&mut self.input)?;
            } else {
                self.report(
                    ErrorSeverity::Error,
                    "dtd-syntax",
                    "unrecognized declaration in document type definition",
                )?;
                // Recovery: resynchronize past the declaration.
                while !self.input.at_end() && self.input.peek() != Some('>') {
                    self.input.advance(1);
                }
                self.input.advance(1);
            }
        }
    }

    fn parse_pe_reference(&mut self, external: bool) -> Result<(), ParseError> {
        self.input.expect_str("%")?;
        let name = self.input.parse_name()?;
        self.input.expect_str(";")?;
        let chain_name = format!("%{name}");
        if self.input.expands(&chain_name) {
            return Err(self
                .input
                .fatal(format!("parameter entity '%{name};' expands recursively")));
        }
        match self.pe_map.get(&name).cloned() {
            Some(text) => {
                self.charge_expansion(text.len())?;
                let buffer =
                    InputBuffer::from_entity(&text, &chain_name, self.input.entity_chain());
                self.with_nested_buffer(buffer, |p| p.parse_markup_decls(external))?;
            }
            None => {
                self.has_external_refs = true;
                self.report(
                    ErrorSeverity::Warning,
                    "unknown-parameter-entity",
                    format!("reference to undeclared parameter entity '%{name};'"),
                )?;
            }
        }
        Ok(())
    }

    fn parse_entity_decl(&mut self) -> Result<(), ParseError> {
        self.input.expect_str("<!ENTITY")?;
        self.input.skip_whitespace_required()?;
        let is_parameter = if self.input.peek() == Some('%') {
            self.input.advance(1);
            self.input.skip_whitespace_required()?;
            true
        } else {
            false
        };
        let name = self.input.parse_name()?;
        self.input.skip_whitespace_required()?;

        if matches!(self.input.peek(), Some('"' | '\'')) {
            let value = self.parse_entity_value(is_parameter.then_some(&*name))?;
            self.input.skip_whitespace();
            self.input.expect_str(">")?;
            if is_parameter {
                self.pe_map.entry(name).or_insert(value);
            } else if self.decls.entities.contains_key(&name) {
                // The first declaration binds (XML 1.0 §4.2).
                self.report(
                    ErrorSeverity::Warning,
                    "duplicate-entity-decl",
                    format!("entity '{name}' is already declared"),
                )?;
            } else {
                let entity = self.doc.allocate(NodeKind::Entity {
                    name: name.clone(),
                    public_id: None,
                    system_id: None,
                    notation_name: None,
                });
                self.entity_values.insert(name.clone(), value.clone());
                self.build_entity_children(entity, &name, &value)?;
                self.decls.entities.insert(name, entity);
            }
            return Ok(());
        }

        let (public_id, system_id) = self.parse_external_id(true, true)?;
        self.input.skip_whitespace();
        let notation_name = if self.input.looking_at("NDATA") {
            self.input.expect_str("NDATA")?;
            self.input.skip_whitespace_required()?;
            let notation = self.input.parse_name()?;
            self.input.skip_whitespace();
            Some(notation)
        } else {
            None
        };
        self.input.expect_str(">")?;

        if is_parameter {
            match system_id
                .as_deref()
                .and_then(|sys| self.fetch_external(public_id.clone(), sys))
            {
                Some(text) => {
                    self.pe_map.entry(name).or_insert(text);
                }
                None => self.has_external_refs = true,
            }
        } else if !self.decls.entities.contains_key(&name) {
            let entity = self.doc.allocate(NodeKind::Entity {
                name: name.clone(),
                public_id,
                system_id,
                notation_name,
            });
            self.decls.entities.insert(name, entity);
        }
        Ok(())
    }

    /// Parses an entity value literal. Parameter entity and character
    /// references are expanded now; general entity references are kept
    /// verbatim for expansion at the point of use (XML 1.0 §4.4.7).
    ///
    /// `declaring_pe` carries the name of the parameter entity whose value
    /// this is, if any; a reference back to it is recursive even though the
    /// name is not in the map yet.
    fn parse_entity_value(&mut self, declaring_pe: Option<&str>) -> Result<String, ParseError> {
        let quote = match self.input.peek() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(self.input.fatal("expected quoted entity value")),
        };
        self.input.advance(1);
        let mut value = String::new();
        loop {
            let Some(c) = self.input.peek() else {
                return Err(self.input.fatal("unexpected end of input in entity value"));
            };
            if c == quote {
                self.input.advance(1);
                break;
            }
            if c == '%' {
                self.input.advance(1);
                let name = self.input.parse_name()?;
                self.input.expect_str(";")?;
                if declaring_pe == Some(name.as_str()) {
                    return Err(self
                        .input
                        .fatal(format!("parameter entity '%{name};' expands recursively")));
                }
                match self.pe_map.get(&name) {
                    Some(text) => {
                        let text = text.clone();
                        self.charge_expansion(text.len())?;
                        value.push_str(&text);
                    }
                    None => {
                        self.has_external_refs = true;
                        self.report(
                            ErrorSeverity::Warning,
                            "unknown-parameter-entity",
                            format!("reference to undeclared parameter entity '%{name};'"),
                        )?;
                    }
                }
            } else if self.input.looking_at("&#") {
                value.push(self.parse_char_reference()?);
            } else {
                value.push(self.input.next_char()?);
            }
        }
        Ok(value)
    }

    /// Sub-parses internal entity replacement text into children of the
    /// entity node, at declaration time. Replacement text that is not
    /// well-formed content leaves the entity childless.
    fn build_entity_children(
        &mut self,
        entity: NodeId,
        name: &str,
        value: &str,
    ) -> Result<(), ParseError> {
        if value.is_empty() {
            return Ok(());
        }
        let buffer = InputBuffer::from_entity(value, name, self.input.entity_chain());
        self.filter_suppressed += 1;
        let was_in_decl = self.in_entity_decl;
        self.in_entity_decl = true;
        let result = self.with_nested_buffer(buffer, |p| {
            p.parse_content(entity, true)?;
            if !p.input.at_end() {
                return Err(p.input.fatal(format!(
                    "replacement text of entity '{name}' is not well-formed content"
                )));
            }
            Ok(())
        });
        self.in_entity_decl = was_in_decl;
        self.filter_suppressed -= 1;

        if let Err(e) = result {
            let kids: Vec<NodeId> = self.doc.children(entity).collect();
            for kid in kids {
                self.doc.detach(kid);
            }
            self.report(ErrorSeverity::Error, "entity-not-well-formed", e.message)?;
        }
        Ok(())
    }

    fn parse_element_decl(&mut self) -> Result<(), ParseError> {
        self.input.expect_str("<!ELEMENT")?;
        self.input.skip_whitespace_required()?;
        let name = self.input.parse_name()?;
        self.input.skip_whitespace_required()?;

        // The model is classified, not validated against: Mixed when
        // #PCDATA appears in the particle, element-only otherwise.
        let model = if self.input.looking_at("EMPTY") {
            self.input.advance(5);
            ContentModel::Empty
        } else if self.input.looking_at("ANY") {
            self.input.advance(3);
            ContentModel::Any
        } else if self.input.peek() == Some('(') {
            let start = self.input.offset();
            let mut depth = 0u32;
            loop {
                let Some(c) = self.input.peek() else {
                    return Err(self.input.fatal("unexpected end of input in content model"));
                };
                self.input.advance(1);
                match c {
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
            }
            if matches!(self.input.peek(), Some('?' | '*' | '+')) {
                self.input.advance(1);
            }
            let body = self.input.text_range(start, self.input.offset());
            if body.contains("#PCDATA") {
                ContentModel::Mixed
            } else {
                ContentModel::ElementOnly
            }
        } else {
            return Err(self
                .input
                .fatal("expected EMPTY, ANY, or a content particle in element declaration"));
        };

        self.input.skip_whitespace();
        self.input.expect_str(">")?;
        self.decls.element_decls.entry(name).or_insert(model);
        Ok(())
    }

    fn parse_attlist_decl(&mut self) -> Result<(), ParseError> {
        self.input.expect_str("<!ATTLIST")?;
        self.input.skip_whitespace_required()?;
        let elem = self.input.parse_name()?;
        loop {
            let had_ws = self.input.skip_whitespace();
            if self.input.peek() == Some('>') {
                self.input.advance(1);
                return Ok(());
            }
            if self.input.at_end() {
                return Err(self
                    .input
                    .fatal("unexpected end of input in attribute-list declaration"));
            }
            if !had_ws {
                return Err(self
                    .input
                    .fatal("whitespace required in attribute-list declaration"));
            }
            let attr = self.input.parse_name()?;
            self.input.skip_whitespace_required()?;
            let attr_type = self.parse_attribute_type()?;
            self.input.skip_whitespace_required()?;
            let default = self.parse_default_decl()?;
            // The first declaration binds (XML 1.0 §3.3).
            self.decls
                .attlist_decls
                .entry((elem.clone(), attr))
                .or_insert(AttlistDecl { attr_type, default });
        }
    }

    fn parse_attribute_type(&mut self) -> Result<AttributeType, ParseError> {
        // Longest keywords first: ID is a prefix of IDREF and IDREFS.
        let keywords: [(&str, AttributeType); 8] = [
            ("CDATA", AttributeType::CData),
            ("IDREFS", AttributeType::IdRefs),
            ("IDREF", AttributeType::IdRef),
            ("ID", AttributeType::Id),
            ("ENTITIES", AttributeType::Entities),
            ("ENTITY", AttributeType::Entity),
            ("NMTOKENS", AttributeType::NmTokens),
            ("NMTOKEN", AttributeType::NmToken),
        ];
        for (keyword, attr_type) in keywords {
            if self.input.looking_at(keyword) {
                self.input.advance(keyword.len());
                return Ok(attr_type);
            }
        }
        if self.input.looking_at("NOTATION") {
            self.input.advance(8);
            self.input.skip_whitespace_required()?;
            return Ok(AttributeType::Notation(self.parse_enumeration()?));
        }
        if self.input.peek() == Some('(') {
            return Ok(AttributeType::Enumeration(self.parse_enumeration()?));
        }
        Err(self.input.fatal("expected attribute type"))
    }

    fn parse_enumeration(&mut self) -> Result<Vec<String>, ParseError> {
        self.input.expect_str("(")?;
        let mut names = Vec::new();
        loop {
            self.input.skip_whitespace();
            let token = self.input.take_while(is_name_char);
            if token.is_empty() {
                return Err(self.input.fatal("expected name token in enumeration"));
            }
            names.push(token);
            self.input.skip_whitespace();
            match self.input.peek() {
                Some('|') => self.input.advance(1),
                Some(')') => {
                    self.input.advance(1);
                    return Ok(names);
                }
                _ => return Err(self.input.fatal("expected '|' or ')' in enumeration")),
            }
        }
    }

    fn parse_default_decl(&mut self) -> Result<DefaultDecl, ParseError> {
        if self.input.looking_at("#REQUIRED") {
            self.input.advance(9);
            Ok(DefaultDecl::Required)
        } else if self.input.looking_at("#IMPLIED") {
            self.input.advance(8);
            Ok(DefaultDecl::Implied)
        } else if self.input.looking_at("#FIXED") {
            self.input.advance(6);
            self.input.skip_whitespace_required()?;
            Ok(DefaultDecl::Fixed(self.parse_attribute_value()?))
        } else {
            Ok(DefaultDecl::Value(self.parse_attribute_value()?))
        }
    }

    fn parse_notation_decl(&mut self) -> Result<(), ParseError> {
        self.input.expect_str("<!NOTATION")?;
        self.input.skip_whitespace_required()?;
        let name = self.input.parse_name()?;
        self.input.skip_whitespace_required()?;
        let (public_id, system_id) = self.parse_external_id(true, false)?;
        self.input.skip_whitespace();
        self.input.expect_str(">")?;
        if !self.decls.notations.contains_key(&name) {
            let node = self.doc.allocate(NodeKind::Notation {
                name: name.clone(),
                public_id,
                system_id,
            });
            self.decls.notations.insert(name, node);
        }
        Ok(())
    }

    /// Parses an optional or required ExternalID (XML 1.0 §4.2.2).
    /// Notation declarations permit a PUBLIC identifier without a system
    /// literal; everything else requires one.
    fn parse_external_id(
        &mut self,
        id_required: bool,
        system_required: bool,
    ) -> Result<(Option<String>, Option<String>), ParseError> {
        if self.input.looking_at("SYSTEM") {
            self.input.expect_str("SYSTEM")?;
            self.input.skip_whitespace_required()?;
            let system = self.input.parse_quoted_value()?;
            Ok((None, Some(system)))
        } else if self.input.looking_at("PUBLIC") {
            self.input.expect_str("PUBLIC")?;
            self.input.skip_whitespace_required()?;
            let public = self.input.parse_quoted_value()?;
            if let Some(message) = validate_pubid(&public) {
                self.report(ErrorSeverity::Error, "wf-invalid-pubid", message)?;
            }
            let had_ws = self.input.skip_whitespace();
            let system = if had_ws && matches!(self.input.peek(), Some('"' | '\'')) {
                Some(self.input.parse_quoted_value()?)
            } else if system_required {
                return Err(self
                    .input
                    .fatal("PUBLIC identifier requires a system literal"));
            } else {
                None
            };
            Ok((Some(public), system))
        } else if id_required {
            Err(self.input.fatal("expected SYSTEM or PUBLIC"))
        } else {
            Ok((None, None))
        }
    }

    /// External-subset conditional sections (XML 1.0 §3.4). The body is
    /// captured raw, tracking nesting, and re-parsed for INCLUDE sections.
    fn parse_conditional_section(&mut self) -> Result<(), ParseError> {
        self.input.expect_str("<![")?;
        self.input.skip_whitespace();
        let keyword = self.input.take_while(|c| c.is_ascii_alphabetic());
        self.input.skip_whitespace();
        self.input.expect_str("[")?;

        let start = self.input.offset();
        let mut depth = 1u32;
        loop {
            if self.input.at_end() {
                return Err(self
                    .input
                    .fatal("unexpected end of input in conditional section"));
            }
            if self.input.looking_at("<![") {
                depth += 1;
                self.input.advance(3);
            } else if self.input.looking_at("]]>") {
                depth -= 1;
                if depth == 0 {
                    break;
                }
                self.input.advance(3);
            } else {
                self.input.advance(1);
            }
        }
        let body = self.input.text_range(start, self.input.offset());
        self.input.advance(3);

        match keyword.as_str() {
            "INCLUDE" => {
                let buffer = InputBuffer::from_str(&body);
                self.with_nested_buffer(buffer, |p| p.parse_markup_decls(true))?;
            }
            "IGNORE" => {}
            other => self.report(
                ErrorSeverity::Error,
                "dtd-syntax",
                format!("unknown conditional section keyword '{other}'"),
            )?,
        }
        Ok(())
    }

    /// Resolves an external resource: the configured resolver first, then
    /// the system identifier opened directly as a URI when
    /// [`ParseOptions::fetch_external`] allows it. With neither, no
    /// external fetch happens.
    fn fetch_external(&self, public_id: Option<String>, system_id: &str) -> Option<String> {
        let resolver = self.options.config.resource_resolver();
        if resolver.is_none() && !self.options.fetch_external {
            return None;
        }
        let resolved = super::resolve_uri(self.doc.document_uri.as_deref(), system_id);
        if let Some(resolver) = resolver {
            let request = ResolveRequest {
                public_id,
                system_id: Some(resolved.clone()),
                base_uri: self.doc.document_uri.clone(),
            };
            if let Some(text) = resolver(&request) {
                return Some(text);
            }
        }
        if !self.options.fetch_external {
            return None;
        }
        let bytes = super::read_uri(&resolved).ok()?;
        let buffer = InputBuffer::from_bytes(&bytes).ok()?;
        Some(buffer.text_range(0, usize::MAX))
    }

    // -- Entity lookup and expansion --

    /// During subset parsing the declarations live in `self.decls`; after
    /// the DOCTYPE they have moved into the DocumentType node.
    fn lookup_entity(&self, name: &str) -> Option<NodeId> {
        self.decls
            .entities
            .get(name)
            .copied()
            .or_else(|| self.doc.entity(name))
    }

    /// Materializes the children of an external entity on first use, when
    /// a resolver makes that possible.
    fn ensure_entity_parsed(&mut self, entity: NodeId, name: &str) -> Result<(), ParseError> {
        if self.doc.first_child(entity).is_some() || self.entity_values.contains_key(name) {
            return Ok(());
        }
        let (public_id, system_id) = match &self.doc.node(entity).kind {
            NodeKind::Entity {
                public_id,
                system_id: Some(system_id),
                ..
            } => (public_id.clone(), system_id.clone()),
            _ => return Ok(()),
        };
        match self.fetch_external(public_id, &system_id) {
            Some(text) => {
                let mut buffer = InputBuffer::from_str(&text);
                let body = if buffer.looking_at("<?xml")
                    && matches!(buffer.peek_at(5), Some(' ' | '\t' | '\n'))
                    && parse_xml_decl(&mut buffer).is_ok()
                {
                    buffer.text_range(buffer.offset(), usize::MAX)
                } else {
                    text
                };
                self.entity_values.insert(name.to_string(), body.clone());
                self.build_entity_children(entity, name, &body)
            }
            None => self.report(
                ErrorSeverity::Warning,
                "entity-not-resolved",
                format!("external entity '{name}' was not resolved"),
            ),
        }
    }

    fn parse_char_reference(&mut self) -> Result<char, ParseError> {
        self.input.expect_str("&#")?;
        let (digits, radix) = if self.input.peek() == Some('x') {
            self.input.advance(1);
            (self.input.take_while(|c| c.is_ascii_hexdigit()), 16)
        } else {
            (self.input.take_while(|c| c.is_ascii_digit()), 10)
        };
        if digits.is_empty() {
            return Err(self.input.fatal("expected digits in character reference"));
        }
        self.input.expect_str(";")?;
        let value = u32::from_str_radix(&digits, radix).unwrap_or(u32::MAX);
        let xml_1_1 = self.xml_1_1;
        char::from_u32(value)
            .filter(|&c| {
                if xml_1_1 {
                    is_xml11_char(c)
                } else {
                    is_xml_char(c)
                }
            })
            .ok_or_else(|| {
                self.input.fatal(format!(
                    "character reference &#{}{digits}; is not a valid XML character",
                    if radix == 16 { "x" } else { "" }
                ))
            })
    }

    // -- Elements --

    fn parse_element(&mut self, parent: NodeId) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > self.options.max_depth {
            return Err(self.input.fatal(format!(
                "element nesting exceeds maximum depth ({})",
                self.options.max_depth
            )));
        }
        self.input.expect_str("<")?;
        let qname = self.input.parse_name()?;
        let mut attrs = self.parse_attribute_list(&qname)?;
        self.apply_attribute_defaults(&qname, &mut attrs);

        let pushed_scope = self.options.config.namespaces && self.bind_namespaces(&attrs)?;
        let elem = self.build_element(parent, &qname, &attrs)?;

        let start_verdict = self.consult_filter(elem, FilterPhase::Start);
        if start_verdict == FilterAction::Interrupt {
            self.interrupted = true;
            self.finish_element_scope(pushed_scope);
            return Ok(());
        }
        let rejected = start_verdict == FilterAction::Reject;
        if rejected {
            self.filter_suppressed += 1;
        }

        if self.input.looking_at("/>") {
            self.input.advance(2);
        } else {
            self.input.expect_str(">")?;
            self.parse_content(elem, false)?;
            if !self.interrupted {
                self.input.expect_str("</")?;
                let end_name = self.input.parse_name()?;
                if end_name != qname {
                    self.report(
                        ErrorSeverity::Error,
                        "wf-mismatched-tag",
                        format!("end tag '</{end_name}>' does not match start tag '<{qname}>'"),
                    )?;
                }
                self.input.skip_whitespace();
                self.input.expect_str(">")?;
            }
        }

        if rejected {
            self.filter_suppressed -= 1;
        }
        let verdict = if rejected {
            FilterAction::Reject
        } else if self.interrupted {
            FilterAction::Accept
        } else {
            self.consult_filter(elem, FilterPhase::Complete)
        };
        match verdict {
            FilterAction::Accept => {}
            FilterAction::Reject => self.doc.detach(elem),
            FilterAction::Skip => {
                let kids: Vec<NodeId> = self.doc.children(elem).collect();
                for kid in kids {
                    self.doc.detach(kid);
                    self.doc.force_insert_before(parent, kid, elem);
                }
                self.doc.detach(elem);
            }
            FilterAction::Interrupt => self.interrupted = true,
        }
        self.finish_element_scope(pushed_scope);
        Ok(())
    }

    fn finish_element_scope(&mut self, pushed_scope: bool) {
        if pushed_scope {
            self.ns.pop_scope();
        }
        self.depth -= 1;
    }

    fn parse_attribute_list(&mut self, elem_qname: &str) -> Result<Vec<RawAttribute>, ParseError> {
        let mut attrs: Vec<RawAttribute> = Vec::new();
        loop {
            let had_ws = self.input.skip_whitespace();
            match self.input.peek() {
                Some('>') => break,
                Some('/') if self.input.looking_at("/>") => break,
                None => {
                    return Err(self.input.fatal(format!(
                        "unexpected end of input in start tag '<{elem_qname}>'"
                    )));
                }
                _ => {}
            }
            if !had_ws {
                return Err(self.input.fatal("whitespace required before attribute"));
            }
            let qname = self.input.parse_name()?;
            self.input.skip_whitespace();
            self.input.expect_str("=")?;
            self.input.skip_whitespace();
            let value = self.parse_attribute_value()?;

            if attrs.len() as u32 >= self.options.max_attributes {
                return Err(self.input.fatal(format!(
                    "attribute count exceeds maximum ({})",
                    self.options.max_attributes
                )));
            }
            if attrs.iter().any(|a| a.qname == qname) {
                self.report(
                    ErrorSeverity::Error,
                    "wf-duplicate-attribute",
                    format!("duplicate attribute '{qname}'"),
                )?;
                continue;
            }
            attrs.push(RawAttribute {
                qname,
                value,
                specified: true,
            });
        }
        Ok(attrs)
    }

    /// Parses an attribute value literal with normalization (XML 1.0
    /// §3.3.3): tab and newline become space, references are resolved, a
    /// raw `<` is forbidden.
    fn parse_attribute_value(&mut self) -> Result<String, ParseError> {
        let quote = match self.input.peek() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(self.input.fatal("attribute value must be quoted")),
        };
        self.input.advance(1);
        let mut value = String::new();
        loop {
            let Some(c) = self.input.peek() else {
                return Err(self
                    .input
                    .fatal("unexpected end of input in attribute value"));
            };
            if c == quote {
                self.input.advance(1);
                break;
            }
            match c {
                '<' => {
                    self.report(
                        ErrorSeverity::Error,
                        "wf-lt-in-attribute",
                        "'<' not allowed in attribute values",
                    )?;
                    self.input.advance(1);
                    value.push('<');
                }
                '&' => {
                    if self.input.looking_at("&#") {
                        value.push(self.parse_char_reference()?);
                    } else {
                        self.input.advance(1);
                        let name = self.input.parse_name()?;
                        self.input.expect_str(";")?;
                        match builtin_entity(&name) {
                            Some(c) => value.push(c),
                            None => value.push_str(&self.expand_attribute_entity(&name)?),
                        }
                    }
                }
                '\t' | '\n' => {
                    self.input.advance(1);
                    value.push(' ');
                }
                _ => value.push(self.input.next_char()?),
            }
        }
        Ok(value)
    }

    /// Expands a general entity inside an attribute value. Attribute
    /// values always receive the fully expanded text, never a reference
    /// node (XML 1.0 §3.3.3).
    fn expand_attribute_entity(&mut self, name: &str) -> Result<String, ParseError> {
        let Some(entity) = self.lookup_entity(name) else {
            let severity = if self.has_external_refs {
                ErrorSeverity::Warning
            } else {
                ErrorSeverity::Error
            };
            self.report(
                severity,
                "unknown-entity",
                format!("reference to undeclared entity '&{name};'"),
            )?;
            return Ok(String::new());
        };
        if let NodeKind::Entity {
            system_id: Some(_), ..
        } = &self.doc.node(entity).kind
        {
            self.report(
                ErrorSeverity::Error,
                "external-entity-in-attribute",
                format!("external entity '&{name};' cannot appear in an attribute value"),
            )?;
            return Ok(String::new());
        }
        let has_markup = self.doc.children(entity).any(|kid| {
            !matches!(
                self.doc.node(kid).kind,
                NodeKind::Text { .. } | NodeKind::EntityRef { .. }
            )
        });
        if has_markup {
            self.report(
                ErrorSeverity::Error,
                "wf-lt-in-attribute",
                format!("entity '&{name};' contains markup, not allowed in attribute values"),
            )?;
            return Ok(String::new());
        }
        let value = self.doc.text_content(entity);
        self.charge_expansion(value.len())?;
        Ok(value
            .chars()
            .map(|c| if c == '\t' || c == '\n' { ' ' } else { c })
            .collect())
    }

    /// Applies `<!ATTLIST>` information: whitespace collapse for non-CDATA
    /// attribute types and defaults for absent attributes.
    fn apply_attribute_defaults(&mut self, elem_qname: &str, attrs: &mut Vec<RawAttribute>) {
        let Some(decls) = self.doc.doctype_decls() else {
            return;
        };
        for attr in attrs.iter_mut() {
            let key = (elem_qname.to_string(), attr.qname.clone());
            if let Some(decl) = decls.attlist_decls.get(&key) {
                if decl.attr_type != AttributeType::CData {
                    attr.value = collapse_whitespace(&attr.value);
                }
            }
        }
        let defaults: Vec<(String, String)> = decls
            .attlist_decls
            .iter()
            .filter(|((elem, attr), decl)| {
                elem == elem_qname
                    && decl.default_value().is_some()
                    && !attrs.iter().any(|raw| &raw.qname == attr)
            })
            .map(|((_, attr), decl)| {
                (
                    attr.clone(),
                    decl.default_value().unwrap_or_default().to_string(),
                )
            })
            .collect();
        for (qname, value) in defaults {
            attrs.push(RawAttribute {
                qname,
                value,
                specified: false,
            });
        }
    }

    /// Pushes a namespace scope and binds the declarations found among the
    /// attributes. Returns whether a scope was pushed.
    fn bind_namespaces(&mut self, attrs: &[RawAttribute]) -> Result<bool, ParseError> {
        let has_decls = attrs
            .iter()
            .any(|a| a.qname == "xmlns" || a.qname.starts_with("xmlns:"));
        if !has_decls {
            return Ok(false);
        }
        self.ns.push_scope();
        for attr in attrs {
            if attr.qname == "xmlns" {
                self.ns.bind(None, attr.value.clone());
                continue;
            }
            let Some(prefix) = attr.qname.strip_prefix("xmlns:") else {
                continue;
            };
            if prefix == "xmlns" {
                self.report(
                    ErrorSeverity::Error,
                    "reserved-prefix",
                    "the 'xmlns' prefix cannot be declared",
                )?;
            } else if prefix == "xml" && attr.value != XML_NAMESPACE {
                self.report(
                    ErrorSeverity::Error,
                    "reserved-prefix",
                    "the 'xml' prefix is bound permanently to its namespace",
                )?;
            } else if prefix != "xml" && attr.value == XML_NAMESPACE {
                self.report(
                    ErrorSeverity::Error,
                    "reserved-namespace",
                    "the XML namespace cannot be bound to another prefix",
                )?;
            } else if attr.value == XMLNS_NAMESPACE {
                self.report(
                    ErrorSeverity::Error,
                    "reserved-namespace",
                    "the xmlns namespace cannot be declared",
                )?;
            } else if attr.value.is_empty() && !self.xml_1_1 {
                self.report(
                    ErrorSeverity::Error,
                    "namespace-undeclare",
                    format!("undeclaring prefix '{prefix}' requires XML 1.1"),
                )?;
                self.ns.bind(Some(prefix.to_string()), String::new());
            } else {
                self.ns.bind(Some(prefix.to_string()), attr.value.clone());
            }
        }
        Ok(true)
    }

    fn resolve_prefix(&mut self, prefix: &str) -> Result<Option<String>, ParseError> {
        match self.ns.resolve(Some(prefix)) {
            Some(uri) => Ok(Some(uri.to_string())),
            None => {
                // Inside entity replacement text at declaration time the
                // binding may only exist at the point of use.
                let severity = if self.in_entity_decl {
                    ErrorSeverity::Warning
                } else {
                    ErrorSeverity::Error
                };
                self.report(
                    severity,
                    "unbound-namespace-prefix",
                    format!("namespace prefix '{prefix}' is not bound"),
                )?;
                Ok(None)
            }
        }
    }

    fn build_element(
        &mut self,
        parent: NodeId,
        qname: &str,
        attrs: &[RawAttribute],
    ) -> Result<NodeId, ParseError> {
        let namespaces = self.options.config.namespaces;

        let (prefix, local) = if namespaces {
            if !is_valid_qname(qname) {
                self.report(
                    ErrorSeverity::Error,
                    "wf-invalid-qname",
                    format!("'{qname}' is not a valid qualified name"),
                )?;
            }
            let (p, l) = split_name(qname);
            (p.map(str::to_string), l.to_string())
        } else {
            // Level-1 mode: the full qualified name is the name.
            (None, qname.to_string())
        };
        let namespace = if namespaces {
            match &prefix {
                Some(p) => self.resolve_prefix(p)?,
                None => self.ns.resolve(None).map(str::to_string),
            }
        } else {
            None
        };

        let elem = self.doc.allocate(NodeKind::Element {
            name: local,
            prefix,
            namespace,
            attributes: Vec::new(),
        });
        self.doc.force_append(parent, elem);

        let mut seen: Vec<(String, String)> = Vec::new();
        for raw in attrs {
            let (aprefix, alocal) = if namespaces {
                let (p, l) = split_name(&raw.qname);
                (p.map(str::to_string), l.to_string())
            } else {
                (None, raw.qname.clone())
            };
            let anamespace = if namespaces {
                if raw.qname == "xmlns" || aprefix.as_deref() == Some("xmlns") {
                    Some(XMLNS_NAMESPACE.to_string())
                } else {
                    match &aprefix {
                        Some(p) => self.resolve_prefix(p)?,
                        // Unprefixed attributes are never in a namespace.
                        None => None,
                    }
                }
            } else {
                None
            };

            if namespaces {
                if let Some(ns) = &anamespace {
                    let key = (ns.clone(), alocal.clone());
                    if seen.contains(&key) {
                        self.report(
                            ErrorSeverity::Error,
                            "wf-duplicate-attribute",
                            format!("duplicate attribute '{alocal}' in namespace '{ns}'"),
                        )?;
                        continue;
                    }
                    seen.push(key);
                }
            }

            let is_id = self
                .doc
                .doctype_decls()
                .and_then(|d| d.attlist_decls.get(&(qname.to_string(), raw.qname.clone())))
                .is_some_and(|d| d.attr_type == AttributeType::Id);

            let attr_node = self.doc.allocate(NodeKind::Attribute {
                name: alocal,
                prefix: aprefix,
                namespace: anamespace,
                specified: raw.specified,
                is_id,
            });
            if !raw.value.is_empty() {
                let text = self.doc.create_text_node(&raw.value);
                self.doc.force_append(attr_node, text);
            }
            // A qname duplicate that slipped through in recovery mode is
            // dropped here.
            let _ = self.doc.attach_attribute(elem, attr_node);
            if is_id {
                self.doc.set_id(&raw.value, elem);
            }
        }
        Ok(elem)
    }

    // -- Content --

    fn parse_content(&mut self, parent: NodeId, allow_eof: bool) -> Result<(), ParseError> {
        // Between productions no captured text range is outstanding, so
        // the consumed prefix can be dropped once it has grown enough to
        // be worth the compaction.
        const SWALLOW_THRESHOLD: usize = 64 * 1024;

        let mut text = String::new();
        loop {
            if self.interrupted {
                break;
            }
            if self.input.consumed() >= SWALLOW_THRESHOLD {
                self.input.swallow();
            }
            if self.input.at_end() {
                if allow_eof {
                    break;
                }
                self.flush_text(parent, &mut text);
                return Err(self
                    .input
                    .fatal("unexpected end of input in element content"));
            }
            if self.input.looking_at("</") {
                break;
            }

            if self.input.looking_at("<![CDATA[") {
                let content = parse_cdata_content(&mut self.input)?;
                if self.options.config.cdata_sections {
                    self.flush_text(parent, &mut text);
                    let node = self.doc.create_cdata_section(&content);
                    self.doc.force_append(parent, node);
                    self.filter_leaf(node);
                } else {
                    text.push_str(&content);
                }
            } else if self.input.looking_at("<!--") {
                let content = parse_comment_content(&mut self.input)?;
                if self.options.config.comments {
                    self.flush_text(parent, &mut text);
                    let node = self.doc.create_comment(&content);
                    self.doc.force_append(parent, node);
                    self.filter_leaf(node);
                }
            } else if self.input.looking_at("<?") {
                self.flush_text(parent, &mut text);
                let (target, data) = parse_pi_content(&mut self.input)?;
                let node = self
                    .doc
                    .allocate(NodeKind::ProcessingInstruction { target, data });
                self.doc.force_append(parent, node);
                self.filter_leaf(node);
            } else if self.input.peek() == Some('<') {
                if self.input.looking_at("<!") {
                    return Err(self
                        .input
                        .fatal("unexpected markup declaration in content"));
                }
                self.flush_text(parent, &mut text);
                self.parse_element(parent)?;
            } else {
                self.parse_char_run(parent, &mut text)?;
            }
        }
        self.flush_text(parent, &mut text);
        Ok(())
    }

    /// Character data up to the next markup boundary, with references
    /// resolved into the accumulator (or into nodes, for kept entity
    /// references).
    fn parse_char_run(&mut self, parent: NodeId, text: &mut String) -> Result<(), ParseError> {
        loop {
            let Some(c) = self.input.peek() else {
                return Ok(());
            };
            if c == '<' {
                return Ok(());
            }
            if c == '&' {
                if self.input.looking_at("&#") {
                    text.push(self.parse_char_reference()?);
                } else {
                    self.parse_entity_in_content(parent, text)?;
                    if self.interrupted {
                        return Ok(());
                    }
                }
            } else if self.input.looking_at("]]>") {
                self.report(
                    ErrorSeverity::Error,
                    "wf-content",
                    "']]>' not allowed in character data",
                )?;
                self.input.advance(3);
                text.push_str("]]>");
            } else {
                match self.input.next_char() {
                    Ok(c) => text.push(c),
                    Err(e) => {
                        self.report(ErrorSeverity::Error, "wf-invalid-character", e.message)?;
                    }
                }
            }
        }
    }

    fn parse_entity_in_content(
        &mut self,
        parent: NodeId,
        text: &mut String,
    ) -> Result<(), ParseError> {
        self.input.expect_str("&")?;
        let name = self.input.parse_name()?;
        self.input.expect_str(";")?;

        if let Some(c) = builtin_entity(&name) {
            text.push(c);
            return Ok(());
        }

        let Some(entity) = self.lookup_entity(&name) else {
            if self.has_external_refs {
                // The declaration may live in an unread external subset.
                self.report(
                    ErrorSeverity::Warning,
                    "unknown-entity",
                    format!("reference to undeclared entity '&{name};'"),
                )?;
                if self.options.config.entities {
                    self.flush_text(parent, text);
                    let node = self.doc.allocate(NodeKind::EntityRef { name });
                    self.doc.force_append(parent, node);
                    self.filter_leaf(node);
                }
            } else {
                self.report(
                    ErrorSeverity::Error,
                    "unknown-entity",
                    format!("reference to undeclared entity '&{name};'"),
                )?;
            }
            return Ok(());
        };

        if let NodeKind::Entity {
            notation_name: Some(_),
            ..
        } = &self.doc.node(entity).kind
        {
            self.report(
                ErrorSeverity::Error,
                "unparsed-entity",
                format!("reference to unparsed entity '&{name};'"),
            )?;
            return Ok(());
        }

        self.ensure_entity_parsed(entity, &name)?;
        // Charge the materialized size, not the declared one: nested
        // references amplify exponentially (billion laughs).
        let size = self.doc.text_content(entity).len();
        self.charge_expansion(size)?;

        let kids: Vec<NodeId> = self.doc.children(entity).collect();
        if self.options.config.entities {
            self.flush_text(parent, text);
            let reference = self.doc.allocate(NodeKind::EntityRef { name });
            for kid in kids {
                let copy = self.doc.clone_node(kid, true);
                self.doc.force_append(reference, copy);
            }
            self.doc.force_append(parent, reference);
            self.filter_leaf(reference);
        } else if kids
            .iter()
            .all(|&kid| matches!(self.doc.node(kid).kind, NodeKind::Text { .. }))
        {
            // Pure text expands into the accumulator so adjacent runs
            // merge into one Text node.
            for kid in kids {
                if let NodeKind::Text { content } = &self.doc.node(kid).kind {
                    text.push_str(content);
                }
            }
        } else {
            self.flush_text(parent, text);
            for kid in kids {
                let copy = self.doc.clone_node(kid, true);
                self.doc.force_append(parent, copy);
            }
        }
        Ok(())
    }

    /// Appends accumulated character data, merging into a preceding Text
    /// sibling so no two Text nodes end up adjacent.
    fn flush_text(&mut self, parent: NodeId, text: &mut String) {
        if text.is_empty() {
            return;
        }
        let content = std::mem::take(text);
        if let Some(last) = self.doc.last_child(parent) {
            if matches!(self.doc.node(last).kind, NodeKind::Text { .. }) {
                if let NodeKind::Text { content: existing } = &mut self.doc.node_mut(last).kind {
                    existing.push_str(&content);
                }
                return;
            }
        }
        let node = self.doc.create_text_node(&content);
        self.doc.force_append(parent, node);
        self.filter_leaf(node);
    }
}
