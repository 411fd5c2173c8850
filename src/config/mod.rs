//! The named configuration parameter set driving parsing, normalization,
//! and serialization.
//!
//! Parameters are addressed by their DOM Level 3 names (`"entities"`,
//! `"comments"`, `"canonical-form"`, …). Most are plain booleans; two —
//! `"infoset"` and `"canonical-form"` — are virtual meta-parameters:
//! reading one checks whether its whole group of primitive parameters sits
//! at the values the mode requires, and writing `true` sets the group at
//! once. Optional DOM features this engine does not implement (validation,
//! character normalization, datatype normalization) are locked at their
//! defaults; setting them to any other value answers `NotSupported`, as the
//! DOM permits for optional parameters.
//!
//! Handler hooks (error handler, resource resolver) are typed fields with
//! dedicated setters rather than name-routed values.

use std::fmt;
use std::sync::Arc;

use crate::error::ErrorHandler;

/// A request to resolve an external resource (DTD subset or external
/// entity) to an input source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    /// The public identifier from the declaration, if any.
    pub public_id: Option<String>,
    /// The system identifier (usually a URI) from the declaration.
    pub system_id: Option<String>,
    /// The base URI of the document containing the reference.
    pub base_uri: Option<String>,
}

/// User-supplied resource resolver hook.
///
/// Returns the replacement text for the requested resource, or `None` to
/// fall back to opening the system identifier directly as a URI.
pub type ResourceResolver = Arc<dyn Fn(&ResolveRequest) -> Option<String> + Send + Sync>;

/// An error raised by [`DomConfig::get`] or [`DomConfig::set`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The parameter name is not recognized.
    NotFound(String),
    /// The parameter exists but cannot take the requested value.
    NotSupported(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(name) => write!(f, "unknown configuration parameter: {name}"),
            Self::NotSupported(name) => {
                write!(f, "unsupported value for configuration parameter: {name}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Names of every recognized parameter, for enumeration.
pub const PARAMETER_NAMES: &[&str] = &[
    "canonical-form",
    "cdata-sections",
    "charset-overrides-xml-encoding",
    "check-character-normalization",
    "comments",
    "datatype-normalization",
    "disallow-doctype",
    "discard-default-content",
    "element-content-whitespace",
    "entities",
    "format-pretty-print",
    "infoset",
    "namespace-declarations",
    "namespaces",
    "normalize-characters",
    "split-cdata-sections",
    "supported-media-types-only",
    "validate",
    "validate-if-schema",
    "well-formed",
    "xml-declaration",
];

/// The configuration parameter set.
///
/// Constructed with documented defaults; consumers pass a value in
/// explicitly — there is no process-wide default instance.
///
/// # Examples
///
/// ```
/// use domoxide::config::DomConfig;
///
/// let mut config = DomConfig::new();
/// assert_eq!(config.get("entities"), Ok(true));
/// config.set("canonical-form", true).unwrap();
/// assert_eq!(config.get("entities"), Ok(false));
/// assert_eq!(config.get("canonical-form"), Ok(true));
/// ```
#[derive(Clone)]
pub struct DomConfig {
    pub(crate) cdata_sections: bool,
    pub(crate) charset_overrides_xml_encoding: bool,
    pub(crate) comments: bool,
    pub(crate) disallow_doctype: bool,
    pub(crate) discard_default_content: bool,
    pub(crate) element_content_whitespace: bool,
    pub(crate) entities: bool,
    pub(crate) format_pretty_print: bool,
    pub(crate) namespace_declarations: bool,
    pub(crate) namespaces: bool,
    pub(crate) split_cdata_sections: bool,
    pub(crate) xml_declaration: bool,
    pub(crate) error_handler: Option<ErrorHandler>,
    pub(crate) resource_resolver: Option<ResourceResolver>,
}

impl Default for DomConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DomConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomConfig")
            .field("cdata_sections", &self.cdata_sections)
            .field(
                "charset_overrides_xml_encoding",
                &self.charset_overrides_xml_encoding,
            )
            .field("comments", &self.comments)
            .field("disallow_doctype", &self.disallow_doctype)
            .field("discard_default_content", &self.discard_default_content)
            .field(
                "element_content_whitespace",
                &self.element_content_whitespace,
            )
            .field("entities", &self.entities)
            .field("format_pretty_print", &self.format_pretty_print)
            .field("namespace_declarations", &self.namespace_declarations)
            .field("namespaces", &self.namespaces)
            .field("split_cdata_sections", &self.split_cdata_sections)
            .field("xml_declaration", &self.xml_declaration)
            .field("error_handler", &self.error_handler.is_some())
            .field("resource_resolver", &self.resource_resolver.is_some())
            .finish()
    }
}

impl DomConfig {
    /// Creates a configuration with the DOM Level 3 defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cdata_sections: true,
            charset_overrides_xml_encoding: true,
            comments: true,
            disallow_doctype: false,
            discard_default_content: true,
            element_content_whitespace: true,
            entities: true,
            format_pretty_print: false,
            namespace_declarations: true,
            namespaces: true,
            split_cdata_sections: true,
            xml_declaration: true,
            error_handler: None,
            resource_resolver: None,
        }
    }

    /// Reads a parameter by name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] for an unrecognized name.
    pub fn get(&self, name: &str) -> Result<bool, ConfigError> {
        match name {
            "cdata-sections" => Ok(self.cdata_sections),
            "charset-overrides-xml-encoding" => Ok(self.charset_overrides_xml_encoding),
            "comments" => Ok(self.comments),
            "disallow-doctype" => Ok(self.disallow_doctype),
            "discard-default-content" => Ok(self.discard_default_content),
            "element-content-whitespace" => Ok(self.element_content_whitespace),
            "entities" => Ok(self.entities),
            "format-pretty-print" => Ok(self.format_pretty_print),
            "namespace-declarations" => Ok(self.namespace_declarations),
            "namespaces" => Ok(self.namespaces),
            "split-cdata-sections" => Ok(self.split_cdata_sections),
            "xml-declaration" => Ok(self.xml_declaration),
            "well-formed" => Ok(true),
            "check-character-normalization"
            | "datatype-normalization"
            | "normalize-characters"
            | "supported-media-types-only"
            | "validate"
            | "validate-if-schema" => Ok(false),
            "infoset" => Ok(self.is_infoset()),
            "canonical-form" => Ok(self.is_canonical()),
            _ => Err(ConfigError::NotFound(name.to_string())),
        }
    }

    /// Writes a parameter by name.
    ///
    /// Writing `true` to a meta-parameter sets its whole group; writing
    /// `false` to one is accepted and changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] for an unrecognized name and
    /// [`ConfigError::NotSupported`] when a locked parameter is set away
    /// from its fixed value.
    pub fn set(&mut self, name: &str, value: bool) -> Result<(), ConfigError> {
        match name {
            "cdata-sections" => self.cdata_sections = value,
            "charset-overrides-xml-encoding" => self.charset_overrides_xml_encoding = value,
            "comments" => self.comments = value,
            "disallow-doctype" => self.disallow_doctype = value,
            "discard-default-content" => self.discard_default_content = value,
            "element-content-whitespace" => self.element_content_whitespace = value,
            "entities" => self.entities = value,
            "format-pretty-print" => self.format_pretty_print = value,
            "namespace-declarations" => self.namespace_declarations = value,
            "namespaces" => self.namespaces = value,
            "split-cdata-sections" => self.split_cdata_sections = value,
            "xml-declaration" => self.xml_declaration = value,
            "well-formed" => {
                if !value {
                    return Err(ConfigError::NotSupported(name.to_string()));
                }
            }
            "check-character-normalization"
            | "datatype-normalization"
            | "normalize-characters"
            | "supported-media-types-only"
            | "validate"
            | "validate-if-schema" => {
                if value {
                    return Err(ConfigError::NotSupported(name.to_string()));
                }
            }
            "infoset" => {
                if value {
                    self.entities = false;
                    self.cdata_sections = false;
                    self.namespace_declarations = true;
                    self.element_content_whitespace = true;
                    self.comments = true;
                    self.namespaces = true;
                }
            }
            "canonical-form" => {
                if value {
                    self.entities = false;
                    self.cdata_sections = false;
                    self.namespaces = true;
                    self.namespace_declarations = true;
                    self.element_content_whitespace = true;
                    self.format_pretty_print = false;
                    self.xml_declaration = false;
                }
            }
            _ => return Err(ConfigError::NotFound(name.to_string())),
        }
        Ok(())
    }

    /// Returns `true` when the named parameter could be set to the value
    /// without error.
    #[must_use]
    pub fn can_set(&self, name: &str, value: bool) -> bool {
        self.clone().set(name, value).is_ok()
    }

    /// True when every parameter in the infoset group holds its required
    /// value.
    #[must_use]
    pub fn is_infoset(&self) -> bool {
        !self.entities
            && !self.cdata_sections
            && self.namespace_declarations
            && self.element_content_whitespace
            && self.comments
            && self.namespaces
    }

    /// True when every parameter in the canonical-form group holds its
    /// required value.
    #[must_use]
    pub fn is_canonical(&self) -> bool {
        !self.entities
            && !self.cdata_sections
            && self.namespaces
            && self.namespace_declarations
            && self.element_content_whitespace
            && !self.format_pretty_print
            && !self.xml_declaration
    }

    /// Installs an error handler consulted for recoverable conditions.
    pub fn set_error_handler(&mut self, handler: Option<ErrorHandler>) {
        self.error_handler = handler;
    }

    /// Returns the installed error handler, if any.
    #[must_use]
    pub fn error_handler(&self) -> Option<&ErrorHandler> {
        self.error_handler.as_ref()
    }

    /// Installs a resource resolver consulted for external DTD subsets and
    /// entities.
    pub fn set_resource_resolver(&mut self, resolver: Option<ResourceResolver>) {
        self.resource_resolver = resolver;
    }

    /// Returns the installed resource resolver, if any.
    #[must_use]
    pub fn resource_resolver(&self) -> Option<&ResourceResolver> {
        self.resource_resolver.as_ref()
    }
}
