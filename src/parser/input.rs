//! Low-level input handling for the XML parser.
//!
//! [`InputBuffer`] holds a fully decoded and line-end-normalized character
//! stream with position tracking (line, column, offset) and the shared
//! lexical primitives: peeking, advancing, name parsing, quoted values,
//! comments, CDATA sections, processing instructions, and the XML
//! declaration.
//!
//! Entity replacement text is parsed through nested buffers. Each nested
//! buffer carries the chain of entity names being expanded, so a reference
//! to an entity already on the chain is detected as recursion
//! (XML 1.0 §4.1 WFC: No Recursion).
//!
//! Line ends are normalized at construction (XML 1.0 §2.11): `\r\n` and
//! bare `\r` become `\n`. Under XML 1.1, NEL (U+0085) and LINE SEPARATOR
//! (U+2028) are additionally treated as line ends at read time.

use encoding_rs::Encoding;

use crate::encoding::{
    decode, declared_label_from_ascii, for_label, labels_compatible, sniff, EncodingError,
};
use crate::error::{ParseError, SourceLocation};

// -------------------------------------------------------------------------
// Security defaults
// -------------------------------------------------------------------------

/// Default maximum element nesting depth.
pub(crate) const DEFAULT_MAX_DEPTH: u32 = 256;

/// Default maximum number of attributes on a single element.
pub(crate) const DEFAULT_MAX_ATTRIBUTES: u32 = 256;

/// Default maximum length (in characters) of an element or attribute name.
pub(crate) const DEFAULT_MAX_NAME_LENGTH: usize = 50_000;

/// Default maximum number of entity expansions per document.
pub(crate) const DEFAULT_MAX_ENTITY_EXPANSIONS: u32 = 10_000;

/// Default maximum total characters produced by entity expansion. Guards
/// against amplification attacks (billion laughs) that stay under the
/// expansion count limit.
pub(crate) const DEFAULT_MAX_EXPANSION_SIZE: usize = 10 * 1024 * 1024; // 10 MB

// -------------------------------------------------------------------------
// XML character classes (XML 1.0 §2.2–2.3)
// -------------------------------------------------------------------------

/// Returns `true` if `c` is a valid `Char` per XML 1.0 §2.2 `[2]`.
///
/// `Char ::= #x9 | #xA | #xD | [#x20-#xD7FF] | [#xE000-#xFFFD] |
/// [#x10000-#x10FFFF]`
pub(crate) fn is_xml_char(c: char) -> bool {
    matches!(c as u32,
        0x09 | 0x0A | 0x0D | 0x20..=0xD7FF | 0xE000..=0xFFFD | 0x0001_0000..=0x0010_FFFF
    )
}

/// Returns `true` if `c` is a valid `Char` per XML 1.1 §2.2 `[2]`.
///
/// XML 1.1 permits the C0 controls (except NUL) that 1.0 forbids.
pub(crate) fn is_xml11_char(c: char) -> bool {
    matches!(c as u32,
        0x01..=0xD7FF | 0xE000..=0xFFFD | 0x0001_0000..=0x0010_FFFF
    )
}

/// Returns `true` if `c` is a valid `NameStartChar` per XML 1.0 §2.3 `[4]`.
pub(crate) fn is_name_start_char(c: char) -> bool {
    matches!(c,
        ':' | 'A'..='Z' | '_' | 'a'..='z' |
        '\u{C0}'..='\u{D6}' | '\u{D8}'..='\u{F6}' | '\u{F8}'..='\u{2FF}' |
        '\u{370}'..='\u{37D}' | '\u{37F}'..='\u{1FFF}' |
        '\u{200C}'..='\u{200D}' | '\u{2070}'..='\u{218F}' |
        '\u{2C00}'..='\u{2FEF}' | '\u{3001}'..='\u{D7FF}' |
        '\u{F900}'..='\u{FDCF}' | '\u{FDF0}'..='\u{FFFD}' |
        '\u{10000}'..='\u{EFFFF}'
    )
}

/// Returns `true` if `c` is a valid `NameChar` per XML 1.0 §2.3 [4a].
pub(crate) fn is_name_char(c: char) -> bool {
    is_name_start_char(c)
        || matches!(c,
            '-' | '.' | '0'..='9' | '\u{B7}' |
            '\u{300}'..='\u{36F}' | '\u{203F}'..='\u{2040}'
        )
}

/// Returns `true` if `c` is a valid `PubidChar` per XML 1.0 §2.3 `[13]`.
pub(crate) fn is_pubid_char(c: char) -> bool {
    matches!(c,
        ' ' | '\r' | '\n' |
        'a'..='z' | 'A'..='Z' | '0'..='9' |
        '-' | '\'' | '(' | ')' | '+' | ',' | '.' | '/' | ':' |
        '=' | '?' | ';' | '!' | '*' | '#' | '@' | '$' | '_' | '%'
    )
}

/// Returns `true` if `s` is a legal `Name` per XML 1.0 §2.3 `[5]`.
pub(crate) fn is_valid_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if is_name_start_char(first) => chars.all(is_name_char),
        _ => false,
    }
}

/// Returns `true` if `s` is a legal `QName` per Namespaces in XML 1.0 §4:
/// at most one colon, with non-empty colon-free prefix and local parts.
pub(crate) fn is_valid_qname(s: &str) -> bool {
    match s.find(':') {
        None => is_valid_name(s),
        Some(pos) => {
            let (prefix, local) = (&s[..pos], &s[pos + 1..]);
            !prefix.is_empty()
                && !local.is_empty()
                && !local.contains(':')
                && is_valid_name(prefix)
                && is_valid_name(local)
        }
    }
}

/// Splits a qualified name into optional prefix and local part.
///
/// `"foo:bar"` → `(Some("foo"), "bar")`; `"bar"` → `(None, "bar")`
pub(crate) fn split_name(name: &str) -> (Option<&str>, &str) {
    match name.find(':') {
        Some(pos) => (Some(&name[..pos]), &name[pos + 1..]),
        None => (None, name),
    }
}

/// Validates that a string contains only valid `PubidChar`s.
///
/// Returns `None` if valid, or a descriptive error message if not.
pub(crate) fn validate_pubid(s: &str) -> Option<String> {
    for c in s.chars() {
        if !is_pubid_char(c) {
            return Some(format!(
                "invalid character '{}' (U+{:04X}) in public ID",
                c.escape_default(),
                c as u32
            ));
        }
    }
    None
}

/// The well-known XML namespace URI, pre-bound to the `xml` prefix.
pub(crate) const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// The well-known xmlns namespace URI.
pub(crate) const XMLNS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

// -------------------------------------------------------------------------
// InputBuffer
// -------------------------------------------------------------------------

/// A decoded, line-end-normalized character stream with lexical helpers.
///
/// The raw bytes are retained so that an encoding declaration read from the
/// stream itself can trigger a re-decode ([`InputBuffer::set_encoding`]).
pub(crate) struct InputBuffer {
    chars: Vec<char>,
    /// Logical offset into the original stream; monotone even after
    /// [`InputBuffer::swallow`] discards the consumed prefix.
    pos: usize,
    /// Count of characters discarded by [`InputBuffer::swallow`]. The
    /// character at logical offset `pos` lives at `chars[pos - base]`.
    base: usize,
    line: u32,
    column: u32,

    /// Raw input bytes past the BOM; present only for byte-based buffers.
    raw: Option<Vec<u8>>,

    /// The encoding the buffer was decoded with.
    encoding: &'static Encoding,

    /// True when the encoding came from a BOM or an explicit caller choice,
    /// so a declaration can refine but not override it.
    certain: bool,

    /// XML 1.1 mode: wider Char production and extra line-end characters.
    xml_1_1: bool,

    /// Maximum name length accepted by [`InputBuffer::parse_name`].
    max_name_length: usize,

    /// The chain of entity names this buffer is an expansion of, outermost
    /// first. Empty for the document buffer.
    entity_chain: Vec<String>,
}

impl InputBuffer {
    /// Creates a buffer over an already decoded string.
    pub fn from_str(input: &str) -> Self {
        Self {
            chars: normalize_line_ends(input.strip_prefix('\u{FEFF}').unwrap_or(input)),
            pos: 0,
            base: 0,
            line: 1,
            column: 1,
            raw: None,
            encoding: encoding_rs::UTF_8,
            certain: true,
            xml_1_1: false,
            max_name_length: DEFAULT_MAX_NAME_LENGTH,
            entity_chain: Vec::new(),
        }
    }

    /// Creates a buffer over raw bytes, sniffing the encoding from the BOM
    /// (XML 1.0 Appendix F) and falling back to an ASCII scan of the XML
    /// declaration, then UTF-8.
    ///
    /// # Errors
    ///
    /// Returns `EncodingError` when the bytes are malformed for the
    /// detected encoding.
    pub fn from_bytes(input: &[u8]) -> Result<Self, EncodingError> {
        let sniffed = sniff(input);
        let body = &input[sniffed.bom_length..];

        let (encoding, certain) = if sniffed.certain {
            (sniffed.encoding, true)
        } else if let Some(label) = declared_label_from_ascii(body) {
            (for_label(&label)?, false)
        } else {
            (sniffed.encoding, false)
        };

        let text = decode(body, encoding)?;
        let text = text.strip_prefix('\u{FEFF}').unwrap_or(&text);
        Ok(Self {
            chars: normalize_line_ends(text),
            pos: 0,
            base: 0,
            line: 1,
            column: 1,
            raw: Some(body.to_vec()),
            encoding,
            certain,
            xml_1_1: false,
            max_name_length: DEFAULT_MAX_NAME_LENGTH,
            entity_chain: Vec::new(),
        })
    }

    /// Creates a nested buffer over entity replacement text. `parent_chain`
    /// is the expansion chain of the buffer the reference occurred in.
    pub fn from_entity(text: &str, entity_name: &str, parent_chain: &[String]) -> Self {
        let mut entity_chain = parent_chain.to_vec();
        entity_chain.push(entity_name.to_string());
        Self {
            chars: normalize_line_ends(text),
            pos: 0,
            base: 0,
            line: 1,
            column: 1,
            raw: None,
            encoding: encoding_rs::UTF_8,
            certain: true,
            xml_1_1: false,
            max_name_length: DEFAULT_MAX_NAME_LENGTH,
            entity_chain,
        }
    }

    /// The entity-expansion chain this buffer belongs to.
    pub fn entity_chain(&self) -> &[String] {
        &self.entity_chain
    }

    /// True when this buffer is (directly or transitively) an expansion of
    /// the named entity.
    pub fn expands(&self, name: &str) -> bool {
        self.entity_chain.iter().any(|n| n == name)
    }

    /// Switches to XML 1.1 character rules.
    pub fn set_xml_1_1(&mut self, on: bool) {
        self.xml_1_1 = on;
    }

    /// Sets the maximum name length.
    pub fn set_max_name_length(&mut self, max: usize) {
        self.max_name_length = max;
    }

    /// The encoding this buffer was decoded with.
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// Applies an encoding declaration read from the stream itself.
    ///
    /// When the buffer was built from bytes and the declared encoding is
    /// incompatible with the one used so far, the retained raw bytes are
    /// re-decoded and the read position re-applied. A BOM-pinned encoding
    /// is never overridden; an incompatible declaration is reported.
    ///
    /// # Errors
    ///
    /// Returns `EncodingError` for an unknown label, a declaration that
    /// contradicts the BOM, or bytes malformed for the declared encoding.
    pub fn set_encoding(&mut self, label: &str) -> Result<(), EncodingError> {
        let declared = for_label(label)?;
        if labels_compatible(declared, self.encoding) {
            return Ok(());
        }
        if self.certain {
            return Err(EncodingError::new(format!(
                "declared encoding {label} contradicts detected encoding {}",
                self.encoding.name()
            )));
        }
        let Some(raw) = &self.raw else {
            // String input is already Unicode; the declaration is advisory.
            return Ok(());
        };
        let text = decode(raw, declared)?;
        let consumed = self.pos;
        self.chars = normalize_line_ends(text.strip_prefix('\u{FEFF}').unwrap_or(&text));
        self.encoding = declared;
        // The declaration itself is ASCII-compatible in any encoding that
        // can declare it, so the consumed prefix maps 1:1.
        self.pos = consumed.min(self.chars.len());
        Ok(())
    }

    // -- Position queries --

    /// The current source location.
    pub fn location(&self) -> SourceLocation {
        SourceLocation {
            line: self.line,
            column: self.column,
            byte_offset: self.pos,
        }
    }

    /// Returns `true` if all input has been consumed.
    pub fn at_end(&self) -> bool {
        self.pos - self.base >= self.chars.len()
    }

    /// The current character offset, usable with
    /// [`InputBuffer::text_range`].
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// The number of consumed characters not yet discarded by
    /// [`InputBuffer::swallow`].
    pub fn consumed(&self) -> usize {
        self.pos - self.base
    }

    /// The text between two previously observed offsets. Offsets from
    /// before the last [`InputBuffer::swallow`] are clamped.
    pub fn text_range(&self, start: usize, end: usize) -> String {
        let lo = start.saturating_sub(self.base).min(self.chars.len());
        let hi = end
            .saturating_sub(self.base)
            .min(self.chars.len())
            .max(lo);
        self.chars[lo..hi].iter().collect()
    }

    /// Discards the consumed prefix, bounding memory for long-lived
    /// buffers. Offsets stay logical: `offset()` keeps counting from the
    /// start of the stream, but `text_range` can no longer reach the
    /// discarded characters. The retained raw bytes go with the prefix;
    /// callers swallow only after the declaration is fully handled.
    pub fn swallow(&mut self) {
        let consumed = self.pos - self.base;
        if consumed == 0 {
            return;
        }
        self.chars.drain(..consumed);
        self.base = self.pos;
        self.raw = None;
    }

    // -- Peek operations --

    /// The character at the current position, not consumed.
    pub fn peek(&self) -> Option<char> {
        self.chars.get(self.pos - self.base).copied()
    }

    /// The character at `current_position + offset`, not consumed.
    pub fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos - self.base + offset).copied()
    }

    // -- Advance operations --

    /// Advances the position by `count` characters, updating line/column.
    pub fn advance(&mut self, count: usize) {
        for _ in 0..count {
            if let Some(&c) = self.chars.get(self.pos - self.base) {
                if self.is_line_end(c) {
                    self.line += 1;
                    self.column = 1;
                } else {
                    self.column += 1;
                }
                self.pos += 1;
            }
        }
    }

    fn is_line_end(&self, c: char) -> bool {
        c == '\n' || (self.xml_1_1 && (c == '\u{85}' || c == '\u{2028}'))
    }

    /// Consumes and returns the next character, mapping XML 1.1 extra line
    /// ends to `\n` and rejecting characters outside the Char production.
    pub fn next_char(&mut self) -> Result<char, ParseError> {
        let Some(&c) = self.chars.get(self.pos - self.base) else {
            return Err(self.fatal("unexpected end of input"));
        };
        let line_end = self.is_line_end(c);
        self.advance(1);
        if line_end {
            return Ok('\n');
        }
        let valid = if self.xml_1_1 {
            is_xml11_char(c)
        } else {
            is_xml_char(c)
        };
        if !valid {
            return Err(self.fatal(format!("invalid XML character: U+{:04X}", c as u32)));
        }
        Ok(c)
    }

    // -- Lookahead and expect --

    /// Returns `true` if the remaining input starts with `s`.
    pub fn looking_at(&self, s: &str) -> bool {
        let mut i = self.pos - self.base;
        for b in s.chars() {
            match self.chars.get(i) {
                Some(&c) if c == b => i += 1,
                _ => return false,
            }
        }
        true
    }

    /// Case-insensitive (ASCII) variant of [`InputBuffer::looking_at`].
    pub fn looking_at_ci(&self, s: &str) -> bool {
        let expected: Vec<char> = s.chars().collect();
        let rel = self.pos - self.base;
        if self.chars.len() - rel < expected.len() {
            return false;
        }
        self.chars[rel..rel + expected.len()]
            .iter()
            .zip(expected.iter())
            .all(|(&a, &b)| a.eq_ignore_ascii_case(&b))
    }

    /// Consumes `expected`, or fails with the location of the mismatch.
    pub fn expect_str(&mut self, expected: &str) -> Result<(), ParseError> {
        for b in expected.chars() {
            match self.peek() {
                Some(c) if c == b => self.advance(1),
                Some(c) => {
                    return Err(self.fatal(format!("expected '{b}', found '{c}'")));
                }
                None => {
                    return Err(self.fatal(format!("expected '{b}', found end of input")));
                }
            }
        }
        Ok(())
    }

    // -- Whitespace --

    /// Skips whitespace characters. Returns `true` if any were consumed.
    pub fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == ' ' || c == '\t' || c == '\n' || c == '\r' {
                self.advance(1);
            } else {
                break;
            }
        }
        self.pos > start
    }

    /// Skips whitespace, failing if none is found.
    pub fn skip_whitespace_required(&mut self) -> Result<(), ParseError> {
        if !self.skip_whitespace() {
            return Err(self.fatal("whitespace required"));
        }
        Ok(())
    }

    // -- Take while --

    /// Consumes characters while `pred` returns `true`.
    pub fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if pred(c) {
                self.advance(1);
            } else {
                break;
            }
        }
        self.chars[start - self.base..self.pos - self.base]
            .iter()
            .collect()
    }

    // -- Name parsing (XML 1.0 §2.3) --

    /// Parses an XML `Name` per XML 1.0 §2.3 production `[5]`.
    pub fn parse_name(&mut self) -> Result<String, ParseError> {
        let first = self
            .peek()
            .ok_or_else(|| self.fatal("expected name, found end of input"))?;
        if !is_name_start_char(first) {
            return Err(self.fatal(format!("invalid name start character: '{first}'")));
        }
        let name = self.take_while(is_name_char);
        if name.chars().count() > self.max_name_length {
            return Err(self.fatal(format!(
                "name length exceeds maximum ({})",
                self.max_name_length
            )));
        }
        Ok(name)
    }

    /// Parses a simple quoted value (single or double quotes, no reference
    /// resolution).
    pub fn parse_quoted_value(&mut self) -> Result<String, ParseError> {
        let quote = self
            .peek()
            .ok_or_else(|| self.fatal("expected quoted value"))?;
        if quote != '"' && quote != '\'' {
            return Err(self.fatal("expected quoted value"));
        }
        self.advance(1);
        let value = self.take_while(|c| c != quote);
        if self.at_end() {
            return Err(self.fatal("unterminated quoted value"));
        }
        self.advance(1);
        Ok(value)
    }

    // -- Error helpers --

    /// Creates a fatal `ParseError` at the current location.
    pub fn fatal(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            location: self.location(),
            diagnostics: Vec::new(),
        }
    }
}

/// Normalizes `\r\n` and bare `\r` to `\n` (XML 1.0 §2.11).
fn normalize_line_ends(input: &str) -> Vec<char> {
    let mut out = Vec::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            out.push('\n');
        } else {
            out.push(c);
        }
    }
    out
}

// -------------------------------------------------------------------------
// Namespace resolver
// -------------------------------------------------------------------------

/// Manages namespace scope during parsing and normalization.
///
/// A stack of binding frames mirrors the element nesting. Each frame holds
/// the `xmlns` declarations introduced on that element; resolution walks
/// the stack from top to bottom.
pub(crate) struct NamespaceResolver {
    stack: Vec<Vec<(Option<String>, String)>>,
}

impl NamespaceResolver {
    /// Creates a new resolver with the `xml` prefix pre-bound.
    pub fn new() -> Self {
        let initial = vec![(Some("xml".to_string()), XML_NAMESPACE.to_string())];
        Self {
            stack: vec![initial],
        }
    }

    /// Pushes a new (empty) namespace scope for an element.
    pub fn push_scope(&mut self) {
        self.stack.push(Vec::new());
    }

    /// Pops the current namespace scope.
    pub fn pop_scope(&mut self) {
        self.stack.pop();
    }

    /// Binds a namespace prefix to a URI in the current scope.
    ///
    /// Use `prefix = None` for the default namespace (`xmlns="..."`).
    pub fn bind(&mut self, prefix: Option<String>, uri: String) {
        if let Some(frame) = self.stack.last_mut() {
            frame.push((prefix, uri));
        }
    }

    /// True when the exact (prefix, uri) pair is already the in-scope
    /// binding for that prefix.
    pub fn is_bound(&self, prefix: Option<&str>, uri: &str) -> bool {
        self.resolve(prefix) == Some(uri)
    }

    /// Resolves a namespace prefix to its URI, walking the stack from top
    /// to bottom. `prefix = None` resolves the default namespace.
    pub fn resolve(&self, prefix: Option<&str>) -> Option<&str> {
        for frame in self.stack.iter().rev() {
            for (p, uri) in frame.iter().rev() {
                let matches = match (prefix, p.as_deref()) {
                    (None, None) => true,
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                };
                if matches {
                    if uri.is_empty() {
                        // xmlns="" undeclares the default namespace
                        return None;
                    }
                    return Some(uri.as_str());
                }
            }
        }
        None
    }

    /// Finds an in-scope prefix already bound to `uri`, preferring the
    /// innermost binding. Used by namespace fixup to reuse declarations.
    pub fn prefix_for(&self, uri: &str) -> Option<Option<&str>> {
        for frame in self.stack.iter().rev() {
            for (p, u) in frame.iter().rev() {
                if u == uri && self.resolve(p.as_deref()) == Some(uri) {
                    return Some(p.as_deref());
                }
            }
        }
        None
    }
}

// -------------------------------------------------------------------------
// Common XML parsing helpers
// -------------------------------------------------------------------------

/// Parses an XML comment (`<!-- ... -->`), returning the content text.
///
/// The opening `<!--` must not have been consumed yet.
///
/// See XML 1.0 §2.5 production `[15]`.
pub(crate) fn parse_comment_content(input: &mut InputBuffer) -> Result<String, ParseError> {
    input.expect_str("<!--")?;
    let mut content = String::new();

    loop {
        if input.at_end() {
            return Err(input.fatal("unexpected end of input in comment"));
        }
        if input.looking_at("-->") {
            input.advance(3);
            break;
        }
        // XML 1.0 forbids -- inside comments
        if input.looking_at("--") {
            return Err(input.fatal("'--' not allowed inside comments"));
        }
        let ch = input.next_char()?;
        content.push(ch);
    }

    Ok(content)
}

/// Parses a CDATA section (`<![CDATA[ ... ]]>`), returning the content.
///
/// The opening `<![CDATA[` must not have been consumed yet.
///
/// See XML 1.0 §2.7 production `[18]`.
pub(crate) fn parse_cdata_content(input: &mut InputBuffer) -> Result<String, ParseError> {
    input.expect_str("<![CDATA[")?;
    let mut content = String::new();

    loop {
        if input.at_end() {
            return Err(input.fatal("unexpected end of input in CDATA section"));
        }
        if input.looking_at("]]>") {
            input.advance(3);
            break;
        }
        let ch = input.next_char()?;
        content.push(ch);
    }

    Ok(content)
}

/// Parses a processing instruction (`<?target data?>`), returning
/// `(target, optional_data)`.
///
/// The opening `<?` must not have been consumed yet.
///
/// See XML 1.0 §2.6 production `[16]`.
pub(crate) fn parse_pi_content(
    input: &mut InputBuffer,
) -> Result<(String, Option<String>), ParseError> {
    input.expect_str("<?")?;
    let target = input.parse_name()?;

    // "xml" (case-insensitive) is reserved for the XML declaration
    if target.eq_ignore_ascii_case("xml") {
        return Err(input.fatal("PI target 'xml' is reserved"));
    }

    // Namespaces in XML 1.0 §3: PI targets must be NCNames (no colons).
    if target.contains(':') {
        return Err(input.fatal("PI target must not contain a colon"));
    }

    let data = if input.skip_whitespace() {
        let mut data = String::new();
        loop {
            if input.at_end() {
                return Err(input.fatal("unexpected end of input in processing instruction"));
            }
            if input.looking_at("?>") {
                input.advance(2);
                break;
            }
            let ch = input.next_char()?;
            data.push(ch);
        }
        if data.is_empty() {
            None
        } else {
            Some(data)
        }
    } else {
        input.expect_str("?>")?;
        None
    };

    Ok((target, data))
}

/// Parsed XML (or text) declaration data.
#[derive(Debug, Clone)]
pub(crate) struct XmlDeclaration {
    /// XML version (e.g. `"1.0"`).
    pub version: String,
    /// Optional encoding declaration.
    pub encoding: Option<String>,
    /// Optional standalone declaration.
    pub standalone: Option<bool>,
}

/// Parses an XML declaration (`<?xml version="1.0" ...?>`).
///
/// The opening `<?xml` must not have been consumed yet (the caller should
/// verify it via `looking_at`).
///
/// See XML 1.0 §2.8 production `[23]`.
pub(crate) fn parse_xml_decl(input: &mut InputBuffer) -> Result<XmlDeclaration, ParseError> {
    input.expect_str("<?xml")?;
    input.skip_whitespace_required()?;

    // version is required
    input.expect_str("version")?;
    input.skip_whitespace();
    input.expect_str("=")?;
    input.skip_whitespace();
    let version = input.parse_quoted_value()?;

    // XML 1.0 §2.8: VersionNum ::= '1.' [0-9]+
    if !is_valid_version_num(&version) {
        return Err(input.fatal(format!("invalid version number: '{version}'")));
    }

    // encoding is optional
    let had_ws = input.skip_whitespace();
    let encoding = if input.looking_at("encoding") {
        if !had_ws {
            return Err(input.fatal("whitespace required before encoding"));
        }
        input.expect_str("encoding")?;
        input.skip_whitespace();
        input.expect_str("=")?;
        input.skip_whitespace();
        let enc = input.parse_quoted_value()?;

        // XML 1.0 §4.3.3: EncName ::= [A-Za-z] ([A-Za-z0-9._] | '-')*
        if !is_valid_encoding_name(&enc) {
            return Err(input.fatal(format!("invalid encoding name: '{enc}'")));
        }

        Some(enc)
    } else {
        None
    };

    // standalone is optional. If encoding was absent, the whitespace
    // consumed when looking for it already separates the fields.
    let had_ws2 = input.skip_whitespace() || (encoding.is_none() && had_ws);
    let standalone = if input.looking_at("standalone") {
        if !had_ws2 {
            return Err(input.fatal("whitespace required before standalone"));
        }
        input.expect_str("standalone")?;
        input.skip_whitespace();
        input.expect_str("=")?;
        input.skip_whitespace();
        let val = input.parse_quoted_value()?;
        match val.as_str() {
            "yes" => Some(true),
            "no" => Some(false),
            _ => return Err(input.fatal("standalone must be 'yes' or 'no'")),
        }
    } else {
        None
    };

    input.skip_whitespace();
    input.expect_str("?>")?;

    Ok(XmlDeclaration {
        version,
        encoding,
        standalone,
    })
}

/// Validates an XML version number per XML 1.0 §2.8.
///
/// `VersionNum ::= '1.' [0-9]+`
fn is_valid_version_num(s: &str) -> bool {
    if let Some(rest) = s.strip_prefix("1.") {
        !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit())
    } else {
        false
    }
}

/// Validates an encoding name per XML 1.0 §4.3.3.
///
/// `EncName ::= [A-Za-z] ([A-Za-z0-9._] | '-')*`
fn is_valid_encoding_name(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.is_empty() || !bytes[0].is_ascii_alphabetic() {
        return false;
    }
    bytes[1..]
        .iter()
        .all(|&b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-')
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_peek_and_advance() {
        let mut input = InputBuffer::from_str("abc");
        assert_eq!(input.peek(), Some('a'));
        assert_eq!(input.peek_at(1), Some('b'));
        input.advance(1);
        assert_eq!(input.peek(), Some('b'));
        input.advance(2);
        assert!(input.at_end());
    }

    #[test]
    fn test_swallow_keeps_logical_offsets() {
        let mut input = InputBuffer::from_str("<a>hello</a><b/>");
        input.advance(12); // past "<a>hello</a>"
        assert_eq!(input.consumed(), 12);
        input.swallow();
        assert_eq!(input.consumed(), 0);
        assert_eq!(input.offset(), 12);
        assert_eq!(input.location().byte_offset, 12);
        assert!(input.looking_at("<b/>"));
        assert_eq!(input.peek(), Some('<'));
        assert_eq!(input.peek_at(1), Some('b'));

        let start = input.offset();
        input.advance(4);
        assert_eq!(input.text_range(start, input.offset()), "<b/>");
        assert!(input.at_end());
    }

    #[test]
    fn test_swallow_clamps_stale_ranges() {
        let mut input = InputBuffer::from_str("abcdef");
        input.advance(3);
        input.swallow();
        // A range wholly inside the discarded prefix yields nothing.
        assert_eq!(input.text_range(0, 3), "");
        assert_eq!(input.text_range(3, 5), "de");
    }

    #[test]
    fn test_line_column_tracking() {
        let mut input = InputBuffer::from_str("ab\ncd");
        assert_eq!(input.location().line, 1);
        assert_eq!(input.location().column, 1);
        input.advance(2); // past "ab"
        assert_eq!(input.location().column, 3);
        input.advance(1); // past "\n"
        assert_eq!(input.location().line, 2);
        assert_eq!(input.location().column, 1);
    }

    #[test]
    fn test_line_ends_normalized_at_construction() {
        let mut input = InputBuffer::from_str("a\r\nb\rc");
        assert_eq!(input.next_char().unwrap(), 'a');
        assert_eq!(input.next_char().unwrap(), '\n');
        assert_eq!(input.next_char().unwrap(), 'b');
        assert_eq!(input.next_char().unwrap(), '\n');
        assert_eq!(input.next_char().unwrap(), 'c');
        assert!(input.at_end());
    }

    #[test]
    fn test_xml11_nel_is_line_end() {
        let mut input = InputBuffer::from_str("a\u{85}b");
        input.set_xml_1_1(true);
        assert_eq!(input.next_char().unwrap(), 'a');
        assert_eq!(input.next_char().unwrap(), '\n');
        assert_eq!(input.location().line, 2);
        assert_eq!(input.next_char().unwrap(), 'b');
    }

    #[test]
    fn test_control_char_rejected_in_1_0_allowed_in_1_1() {
        let mut input = InputBuffer::from_str("\u{1}");
        assert!(input.next_char().is_err());

        let mut input = InputBuffer::from_str("\u{1}");
        input.set_xml_1_1(true);
        assert_eq!(input.next_char().unwrap(), '\u{1}');
    }

    #[test]
    fn test_bom_stripped_from_str() {
        let input = InputBuffer::from_str("\u{FEFF}<r/>");
        assert_eq!(input.peek(), Some('<'));
    }

    #[test]
    fn test_from_bytes_utf16_bom() {
        let input = InputBuffer::from_bytes(b"\xFF\xFE<\x00r\x00/\x00>\x00").unwrap();
        assert_eq!(input.encoding().name(), "UTF-16LE");
        let text: String = (0..4).filter_map(|i| input.peek_at(i)).collect();
        assert_eq!(text, "<r/>");
    }

    #[test]
    fn test_from_bytes_declared_latin1() {
        let bytes = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><r a=\"caf\xE9\"/>";
        let input = InputBuffer::from_bytes(bytes).unwrap();
        assert_eq!(input.encoding().name(), "windows-1252");
    }

    #[test]
    fn test_set_encoding_redecode() {
        let bytes = b"<r>caf\xE9</r>";
        let mut input = InputBuffer::from_bytes(bytes);
        // Not valid UTF-8 and no declaration: the initial decode fails.
        assert!(input.is_err());

        // With a declaration the ASCII scan finds the label up front.
        let bytes = b"<?xml version='1.0' encoding='ISO-8859-1'?><r>caf\xE9</r>";
        input = InputBuffer::from_bytes(bytes);
        assert!(input.is_ok());
    }

    #[test]
    fn test_set_encoding_contradicting_bom_fails() {
        let mut input = InputBuffer::from_bytes(b"\xFF\xFE<\x00r\x00/\x00>\x00").unwrap();
        assert!(input.set_encoding("ISO-8859-1").is_err());
        // UTF-16 refines the BOM-detected variant, no contradiction.
        assert!(input.set_encoding("UTF-16").is_ok());
    }

    #[test]
    fn test_parse_name() {
        let mut input = InputBuffer::from_str("foo:bar ");
        assert_eq!(input.parse_name().unwrap(), "foo:bar");
    }

    #[test]
    fn test_parse_name_length_limit() {
        let long_name = "a".repeat(100);
        let mut input = InputBuffer::from_str(&long_name);
        input.set_max_name_length(50);
        let result = input.parse_name();
        assert!(result.is_err());
        assert!(result.unwrap_err().message.contains("name length"));
    }

    #[test]
    fn test_parse_quoted_value() {
        let mut input = InputBuffer::from_str("'hello'");
        assert_eq!(input.parse_quoted_value().unwrap(), "hello");
        let mut input = InputBuffer::from_str("\"world\"x");
        assert_eq!(input.parse_quoted_value().unwrap(), "world");
        assert_eq!(input.peek(), Some('x'));
    }

    #[test]
    fn test_skip_whitespace() {
        let mut input = InputBuffer::from_str("  \t\n  abc");
        assert!(input.skip_whitespace());
        assert_eq!(input.peek(), Some('a'));
        assert!(!input.skip_whitespace());
    }

    #[test]
    fn test_looking_at() {
        let input = InputBuffer::from_str("<!--comment-->");
        assert!(input.looking_at("<!--"));
        assert!(!input.looking_at("<![CDATA["));
        assert!(InputBuffer::from_str("DOCTYPE").looking_at_ci("doctype"));
    }

    #[test]
    fn test_take_while() {
        let mut input = InputBuffer::from_str("12345abc");
        let digits = input.take_while(|c| c.is_ascii_digit());
        assert_eq!(digits, "12345");
        assert_eq!(input.peek(), Some('a'));
    }

    #[test]
    fn test_entity_chain_detects_recursion() {
        let doc_chain: [String; 0] = [];
        let outer = InputBuffer::from_entity("text &inner;", "outer", &doc_chain);
        assert!(outer.expands("outer"));
        assert!(!outer.expands("inner"));

        let inner = InputBuffer::from_entity("text", "inner", outer.entity_chain());
        assert!(inner.expands("outer"));
        assert!(inner.expands("inner"));
    }

    #[test]
    fn test_name_validation() {
        assert!(is_valid_name("foo"));
        assert!(is_valid_name("foo:bar"));
        assert!(is_valid_name("_x-1.2"));
        assert!(!is_valid_name("1foo"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("a b"));

        assert!(is_valid_qname("foo"));
        assert!(is_valid_qname("foo:bar"));
        assert!(!is_valid_qname(":bar"));
        assert!(!is_valid_qname("foo:"));
        assert!(!is_valid_qname("a:b:c"));
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("foo:bar"), (Some("foo"), "bar"));
        assert_eq!(split_name("bar"), (None, "bar"));
    }

    #[test]
    fn test_namespace_resolver() {
        let mut ns = NamespaceResolver::new();

        // xml prefix is pre-bound
        assert_eq!(ns.resolve(Some("xml")), Some(XML_NAMESPACE));
        assert_eq!(ns.resolve(None), None); // no default namespace

        ns.push_scope();
        ns.bind(None, "http://default".to_string());
        ns.bind(Some("foo".to_string()), "http://foo".to_string());

        assert_eq!(ns.resolve(None), Some("http://default"));
        assert_eq!(ns.resolve(Some("foo")), Some("http://foo"));
        assert!(ns.is_bound(Some("foo"), "http://foo"));

        ns.pop_scope();
        assert_eq!(ns.resolve(None), None);
        assert_eq!(ns.resolve(Some("foo")), None);
    }

    #[test]
    fn test_namespace_undeclare_default() {
        let mut ns = NamespaceResolver::new();
        ns.push_scope();
        ns.bind(None, "http://default".to_string());
        assert_eq!(ns.resolve(None), Some("http://default"));

        ns.push_scope();
        ns.bind(None, String::new()); // xmlns=""
        assert_eq!(ns.resolve(None), None);

        ns.pop_scope();
        assert_eq!(ns.resolve(None), Some("http://default"));
    }

    #[test]
    fn test_prefix_for_reuses_innermost_binding() {
        let mut ns = NamespaceResolver::new();
        ns.push_scope();
        ns.bind(Some("a".to_string()), "urn:x".to_string());
        assert_eq!(ns.prefix_for("urn:x"), Some(Some("a")));

        ns.push_scope();
        // Shadow the prefix with a different URI: the old binding is no
        // longer usable for urn:x.
        ns.bind(Some("a".to_string()), "urn:y".to_string());
        assert_eq!(ns.prefix_for("urn:x"), None);
        ns.pop_scope();
        ns.pop_scope();
    }

    #[test]
    fn test_parse_comment_content() {
        let mut input = InputBuffer::from_str("<!-- hello -->");
        assert_eq!(parse_comment_content(&mut input).unwrap(), " hello ");

        let mut input = InputBuffer::from_str("<!-- a -- b -->");
        assert!(parse_comment_content(&mut input).is_err());
    }

    #[test]
    fn test_parse_cdata_content() {
        let mut input = InputBuffer::from_str("<![CDATA[some <data>]]>");
        assert_eq!(parse_cdata_content(&mut input).unwrap(), "some <data>");
    }

    #[test]
    fn test_parse_pi_content() {
        let mut input = InputBuffer::from_str("<?target data?>");
        let (target, data) = parse_pi_content(&mut input).unwrap();
        assert_eq!(target, "target");
        assert_eq!(data.as_deref(), Some("data"));

        let mut input = InputBuffer::from_str("<?target?>");
        let (target, data) = parse_pi_content(&mut input).unwrap();
        assert_eq!(target, "target");
        assert_eq!(data, None);

        let mut input = InputBuffer::from_str("<?xml version='1.0'?>");
        assert!(parse_pi_content(&mut input).is_err());
    }

    #[test]
    fn test_parse_xml_decl() {
        let mut input = InputBuffer::from_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
        let decl = parse_xml_decl(&mut input).unwrap();
        assert_eq!(decl.version, "1.0");
        assert_eq!(decl.encoding.as_deref(), Some("UTF-8"));
        assert_eq!(decl.standalone, None);
    }

    #[test]
    fn test_parse_xml_decl_standalone() {
        let mut input =
            InputBuffer::from_str("<?xml version=\"1.1\" encoding=\"UTF-8\" standalone=\"yes\"?>");
        let decl = parse_xml_decl(&mut input).unwrap();
        assert_eq!(decl.version, "1.1");
        assert_eq!(decl.standalone, Some(true));
    }

    #[test]
    fn test_is_name_chars() {
        assert!(is_name_start_char('a'));
        assert!(is_name_start_char('Z'));
        assert!(is_name_start_char('_'));
        assert!(is_name_start_char(':'));
        assert!(!is_name_start_char('0'));
        assert!(!is_name_start_char('-'));

        assert!(is_name_char('a'));
        assert!(is_name_char('0'));
        assert!(is_name_char('-'));
        assert!(is_name_char('.'));
        assert!(!is_name_char(' '));
    }

    #[test]
    fn test_validate_pubid() {
        assert!(validate_pubid("-//W3C//DTD XHTML 1.0//EN").is_none());
        assert!(validate_pubid("bad\"quote").is_some());
    }
}
